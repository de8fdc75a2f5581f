//! Canonical tenants, accounts, and features returned to callers.

// self
use crate::{
	_prelude::*,
	id::{AccountId, NativeId, TenantId},
};

/// Capabilities that can be enabled per cloud account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeatureName {
	/// Archival of cloud-native snapshots.
	CloudNativeArchival,
	/// Archival encryption with customer-managed keys.
	CloudNativeArchivalEncryption,
	/// Blob storage protection.
	CloudNativeBlobProtection,
	/// Virtual machine and disk protection.
	CloudNativeProtection,
	/// Azure SQL Database protection.
	AzureSqlDbProtection,
	/// Azure SQL Managed Instance protection.
	AzureSqlMiProtection,
	/// Compute provisioned in the customer account.
	Exocompute,
}
impl FeatureName {
	/// Every supported feature.
	pub const ALL: [FeatureName; 7] = [
		FeatureName::CloudNativeArchival,
		FeatureName::CloudNativeArchivalEncryption,
		FeatureName::CloudNativeBlobProtection,
		FeatureName::CloudNativeProtection,
		FeatureName::AzureSqlDbProtection,
		FeatureName::AzureSqlMiProtection,
		FeatureName::Exocompute,
	];

	/// Wire name, e.g. `CLOUD_NATIVE_PROTECTION`.
	pub const fn as_str(self) -> &'static str {
		match self {
			FeatureName::CloudNativeArchival => "CLOUD_NATIVE_ARCHIVAL",
			FeatureName::CloudNativeArchivalEncryption => "CLOUD_NATIVE_ARCHIVAL_ENCRYPTION",
			FeatureName::CloudNativeBlobProtection => "CLOUD_NATIVE_BLOB_PROTECTION",
			FeatureName::CloudNativeProtection => "CLOUD_NATIVE_PROTECTION",
			FeatureName::AzureSqlDbProtection => "AZURE_SQL_DB_PROTECTION",
			FeatureName::AzureSqlMiProtection => "AZURE_SQL_MI_PROTECTION",
			FeatureName::Exocompute => "EXOCOMPUTE",
		}
	}
}
impl Display for FeatureName {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Connection status of a feature.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeatureStatus {
	/// Fully onboarded.
	Connected,
	/// Removed or disabled.
	Disabled,
	/// Onboarding in progress.
	Connecting,
	/// Onboarded, but the service principal lacks required permissions.
	MissingPermissions,
}

/// Azure cloud the tenant lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CloudType {
	/// Azure public cloud.
	#[serde(rename = "AZUREPUBLICCLOUD")]
	Public,
	/// Azure China cloud.
	#[serde(rename = "AZURECHINACLOUD")]
	China,
}

/// Azure tenant registered with the control plane.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Tenant {
	/// Control-plane tenant identifier.
	pub id: TenantId,
	/// Cloud the tenant lives in.
	pub cloud_type: CloudType,
	/// Tenant domain, e.g. `acme.onmicrosoft.com`.
	pub domain_name: String,
	/// Application (client) id used to access the tenant.
	pub client_id: String,
	/// Application display name.
	pub app_name: String,
	/// Number of subscriptions in the tenant.
	pub subscription_count: u32,
}

/// Azure subscription registered with the control plane.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudAccount {
	/// Control-plane account identifier.
	pub id: AccountId,
	/// Azure subscription id.
	pub native_id: NativeId,
	/// Subscription display name.
	pub name: String,
	/// Owning tenant.
	pub tenant_id: TenantId,
	/// Enabled features, at most one per name, sorted by name then regions.
	pub features: Vec<Feature>,
}
impl CloudAccount {
	/// Looks up a feature by name.
	pub fn feature(&self, name: FeatureName) -> Result<&Feature> {
		self.features
			.iter()
			.find(|feature| feature.name == name)
			.ok_or_else(|| Error::not_found("feature", format!("{}/{name}", self.id)))
	}

	/// Returns `true` when the account carries `name`.
	pub fn has_feature(&self, name: FeatureName) -> bool {
		self.features.iter().any(|feature| feature.name == name)
	}
}

/// A feature enabled on one account.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Feature {
	/// Feature name.
	pub name: FeatureName,
	/// Connection status.
	pub status: FeatureStatus,
	/// Azure regions the feature covers.
	pub regions: BTreeSet<String>,
	/// Resource group created for the feature, if any.
	pub resource_group: Option<ResourceGroup>,
	/// User-assigned managed identity, if any.
	pub managed_identity: Option<ManagedIdentity>,
}
impl Feature {
	/// Regions joined with `,` in sorted order.
	pub fn region_key(&self) -> String {
		self.regions.iter().map(String::as_str).collect::<Vec<_>>().join(",")
	}
}

/// Azure resource group owned by a feature.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceGroup {
	/// Resource group name.
	pub name: String,
	/// Azure resource id.
	pub native_id: String,
	/// Region hosting the resource group.
	pub region: String,
	/// Resource group tags.
	pub tags: BTreeMap<String, String>,
}

/// User-assigned managed identity owned by a feature.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ManagedIdentity {
	/// Identity name.
	pub name: String,
	/// Azure resource id.
	pub native_id: String,
	/// Service principal object id.
	pub principal_id: String,
	/// Resource group holding the identity.
	pub resource_group_name: String,
}
