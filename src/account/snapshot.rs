//! Raw per-feature listings as returned by `allAzureCloudAccountTenants`.
//!
//! Every raw type derives `Ord` so the reconciler can put records into a canonical order before
//! merging them.

// self
use crate::{
	_prelude::*,
	account::{
		CloudType, Feature, FeatureName, FeatureStatus, ManagedIdentity, ResourceGroup, Tenant,
	},
	graphql,
	id::{AccountId, NativeId, TenantId},
};

const ENDPOINT: &str = "azure cloud account tenants";

/// Tenants and subscriptions listed for a single feature.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RawSnapshot {
	/// Feature the listing was requested for.
	pub feature: FeatureName,
	/// Listed tenants.
	pub tenants: Vec<RawTenant>,
}
impl RawSnapshot {
	/// Decodes a GraphQL response body listing tenants for `feature`.
	pub fn from_response(feature: FeatureName, body: &[u8]) -> Result<Self> {
		let tenants = graphql::decode_data(ENDPOINT, body)?;

		Ok(Self { feature, tenants })
	}
}

/// Tenant entry of a raw listing.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTenant {
	/// Control-plane tenant identifier.
	#[serde(rename = "azureCloudAccountTenantRubrikId")]
	pub id: TenantId,
	/// Cloud the tenant lives in.
	pub cloud_type: CloudType,
	/// Tenant domain.
	pub domain_name: String,
	/// Application (client) id.
	pub client_id: String,
	/// Application display name.
	pub app_name: String,
	/// Number of subscriptions in the tenant.
	#[serde(default)]
	pub subscription_count: u32,
	/// Subscriptions carrying the requested feature.
	#[serde(default)]
	pub subscriptions: Vec<RawSubscription>,
}
impl From<&RawTenant> for Tenant {
	fn from(raw: &RawTenant) -> Self {
		Self {
			id: raw.id.clone(),
			cloud_type: raw.cloud_type,
			domain_name: raw.domain_name.clone(),
			client_id: raw.client_id.clone(),
			app_name: raw.app_name.clone(),
			subscription_count: raw.subscription_count,
		}
	}
}

/// Subscription entry of a raw listing.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSubscription {
	/// Control-plane account identifier.
	pub id: AccountId,
	/// Subscription display name.
	pub name: String,
	/// Azure subscription id.
	pub native_id: NativeId,
	/// Detail of the requested feature; absent when the subscription does not carry it.
	#[serde(default)]
	pub feature_detail: Option<RawFeatureDetail>,
}

/// Feature detail of a raw subscription.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFeatureDetail {
	/// Feature name.
	pub feature: FeatureName,
	/// Connection status.
	pub status: FeatureStatus,
	/// Regions, in backend order.
	#[serde(default)]
	pub regions: Vec<String>,
	/// Resource group, if any.
	#[serde(default)]
	pub resource_group: Option<RawResourceGroup>,
	/// User-assigned managed identity, if any.
	#[serde(default)]
	pub user_assigned_managed_identity: Option<RawManagedIdentity>,
}
impl From<&RawFeatureDetail> for Feature {
	fn from(raw: &RawFeatureDetail) -> Self {
		Self {
			name: raw.feature,
			status: raw.status,
			regions: raw.regions.iter().cloned().collect(),
			resource_group: raw.resource_group.as_ref().map(Into::into),
			managed_identity: raw.user_assigned_managed_identity.as_ref().map(Into::into),
		}
	}
}

/// Resource group of a raw feature detail.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawResourceGroup {
	/// Resource group name.
	pub name: String,
	/// Azure resource id.
	pub native_id: String,
	/// Region hosting the resource group.
	pub region: String,
	/// Tags, in backend order.
	#[serde(default)]
	pub tags: Vec<RawTag>,
}
impl From<&RawResourceGroup> for ResourceGroup {
	fn from(raw: &RawResourceGroup) -> Self {
		let mut sorted = raw.tags.iter().collect::<Vec<_>>();

		sorted.sort();

		let mut tags = BTreeMap::new();

		// Duplicate keys keep the smallest value.
		for tag in sorted {
			tags.entry(tag.key.clone()).or_insert_with(|| tag.value.clone());
		}

		Self {
			name: raw.name.clone(),
			native_id: raw.native_id.clone(),
			region: raw.region.clone(),
			tags,
		}
	}
}

/// Key/value tag.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RawTag {
	/// Tag key.
	pub key: String,
	/// Tag value.
	pub value: String,
}

/// Managed identity of a raw feature detail.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawManagedIdentity {
	/// Identity name.
	pub name: String,
	/// Azure resource id.
	pub native_id: String,
	/// Service principal object id.
	pub principal_id: String,
	/// Resource group holding the identity.
	pub resource_group_name: String,
}
impl From<&RawManagedIdentity> for ManagedIdentity {
	fn from(raw: &RawManagedIdentity) -> Self {
		Self {
			name: raw.name.clone(),
			native_id: raw.native_id.clone(),
			principal_id: raw.principal_id.clone(),
			resource_group_name: raw.resource_group_name.clone(),
		}
	}
}
