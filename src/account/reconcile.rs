//! Deterministic merge of per-feature snapshots.
//!
//! Records are first put into a canonical order (account id, feature name, full record content),
//! so "first seen" no longer depends on the order snapshots or pages arrived in. The merge then
//! keeps the first entry per account, per tenant, and per (account, feature) pair. Output lists
//! are sorted before they are returned, which makes two reconciliations of permuted inputs
//! serialize byte-identically.

// std
use std::cmp::Ordering;
// self
use crate::{
	_prelude::*,
	account::{CloudAccount, Feature, RawSnapshot, RawSubscription, Tenant},
	id::{AccountId, TenantId},
	obs::{self, OperationKind, OperationOutcome, OperationSpan},
};

/// Canonical tenants and accounts assembled from one or more snapshots.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
	/// Tenants sorted by domain name, then id.
	pub tenants: Vec<Tenant>,
	/// Accounts sorted by name, then id.
	pub accounts: Vec<CloudAccount>,
}
impl Reconciliation {
	/// Looks up an account by id.
	pub fn account(&self, id: &str) -> Result<&CloudAccount> {
		self.accounts
			.iter()
			.find(|account| account.id.as_str() == id)
			.ok_or_else(|| Error::not_found("cloud account", id))
	}

	/// Looks up a tenant by id.
	pub fn tenant(&self, id: &str) -> Result<&Tenant> {
		self.tenants
			.iter()
			.find(|tenant| tenant.id.as_str() == id)
			.ok_or_else(|| Error::not_found("tenant", id))
	}

	/// Accounts owned by `tenant_id`, in output order.
	pub fn accounts_in<'a>(&'a self, tenant_id: &'a str) -> impl Iterator<Item = &'a CloudAccount> {
		self.accounts.iter().filter(move |account| account.tenant_id.as_str() == tenant_id)
	}

	/// Consumes the reconciliation, returning the account with `id`.
	pub fn into_account(self, id: &str) -> Result<CloudAccount> {
		self.accounts
			.into_iter()
			.find(|account| account.id.as_str() == id)
			.ok_or_else(|| Error::not_found("cloud account", id))
	}
}

/// Folds `snapshots` into canonical tenants and accounts.
///
/// At most one feature is kept per (account, feature name); later duplicates are skipped, never
/// merged into the kept entry.
pub fn reconcile(snapshots: &[RawSnapshot]) -> Reconciliation {
	const KIND: OperationKind = OperationKind::Reconcile;

	let _span = OperationSpan::new(KIND, "reconcile").entered();

	obs::record_operation_outcome(KIND, OperationOutcome::Attempt);

	let tenants = merge_tenants(snapshots);
	let (accounts, skipped) = merge_accounts(snapshots);

	obs::event!(
		debug,
		snapshots = snapshots.len(),
		tenants = tenants.len(),
		accounts = accounts.len(),
		skipped,
		"Reconciled cloud account snapshots."
	);
	obs::record_operation_outcome(KIND, OperationOutcome::Success);

	Reconciliation { tenants, accounts }
}

fn merge_tenants(snapshots: &[RawSnapshot]) -> Vec<Tenant> {
	let mut records = snapshots
		.iter()
		.flat_map(|snapshot| snapshot.tenants.iter().map(Tenant::from))
		.collect::<Vec<_>>();

	records.sort();

	let mut merged = BTreeMap::<TenantId, Tenant>::new();

	for tenant in records {
		merged.entry(tenant.id.clone()).or_insert(tenant);
	}

	let mut tenants = merged.into_values().collect::<Vec<_>>();

	tenants.sort_by(|a, b| a.domain_name.cmp(&b.domain_name).then_with(|| a.id.cmp(&b.id)));

	tenants
}

fn merge_accounts(snapshots: &[RawSnapshot]) -> (Vec<CloudAccount>, usize) {
	let mut records = snapshots
		.iter()
		.flat_map(|snapshot| snapshot.tenants.iter())
		.flat_map(|tenant| tenant.subscriptions.iter().map(move |raw| (raw, &tenant.id)))
		.collect::<Vec<_>>();

	records.sort_by(|(a, a_tenant), (b, b_tenant)| {
		canonical_order(a, b).then_with(|| a_tenant.cmp(b_tenant))
	});

	let mut merged = BTreeMap::<AccountId, CloudAccount>::new();
	let mut skipped = 0;

	for (raw, tenant_id) in records {
		let account = merged.entry(raw.id.clone()).or_insert_with(|| CloudAccount {
			id: raw.id.clone(),
			native_id: raw.native_id.clone(),
			name: raw.name.clone(),
			tenant_id: tenant_id.clone(),
			features: Vec::new(),
		});
		let Some(detail) = &raw.feature_detail else {
			continue;
		};

		if account.has_feature(detail.feature) {
			skipped += 1;

			continue;
		}

		account.features.push(Feature::from(detail));
	}

	let mut accounts = merged
		.into_values()
		.map(|mut account| {
			account.features.sort_by(feature_order);

			account
		})
		.collect::<Vec<_>>();

	accounts.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));

	(accounts, skipped)
}

fn canonical_order(a: &RawSubscription, b: &RawSubscription) -> Ordering {
	let feature = |raw: &RawSubscription| raw.feature_detail.as_ref().map(|detail| detail.feature);

	a.id.cmp(&b.id).then_with(|| feature(a).cmp(&feature(b))).then_with(|| a.cmp(b))
}

fn feature_order(a: &Feature, b: &Feature) -> Ordering {
	a.name.as_str().cmp(b.name.as_str()).then_with(|| a.region_key().cmp(&b.region_key()))
}
