//! High-level Azure cloud account operations built on the core components.

// std
use std::time::Duration as StdDuration;
// self
use crate::{
	_prelude::*,
	account::{self, CloudAccount, FeatureName, RawSnapshot, Reconciliation},
	auth::{TokenSource, TokenSourceConfig},
	context::Context,
	error::{self, ConfigError, ProtocolError, RemoteError},
	graphql::{self, GraphqlClient, RequestExecutor},
	http::{self, HttpTransport},
	id::{AccountId, TaskChainId},
	obs,
	task::{GraphqlTaskChainCheck, TaskChainState, TaskChainTracker},
};
#[cfg(feature = "reqwest")]
use crate::{auth::CredentialEnvironment, http::ReqwestHttpClient};

/// Connection settings for [`Client::connect`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
	/// Account base URL, e.g. `https://acme.my.example.com/`.
	pub account_url: Url,
	/// Token source tuning.
	pub token: TokenSourceConfig,
	/// Task chain poll interval.
	pub poll_interval: StdDuration,
}
impl ClientConfig {
	/// Creates a configuration for `account_url` with default tuning.
	pub fn new(account_url: Url) -> Self {
		Self {
			account_url,
			token: TokenSourceConfig::default(),
			poll_interval: TaskChainTracker::DEFAULT_POLL_INTERVAL,
		}
	}

	/// Parses `account_url` and creates a configuration with default tuning.
	pub fn parse(account_url: &str) -> Result<Self, ConfigError> {
		let url = Url::parse(account_url)
			.map_err(|source| ConfigError::InvalidEndpoint { endpoint: "account", source })?;

		Ok(Self::new(url))
	}

	/// Overrides the token source tuning.
	pub fn with_token_config(mut self, token: TokenSourceConfig) -> Self {
		self.token = token;

		self
	}

	/// Overrides the task chain poll interval.
	pub fn with_poll_interval(mut self, interval: StdDuration) -> Self {
		self.poll_interval = interval;

		self
	}

	/// GraphQL endpoint derived from the account URL.
	pub fn graphql_endpoint(&self) -> Result<Url, ConfigError> {
		let endpoint = self
			.account_url
			.join("/api/graphql")
			.map_err(|source| ConfigError::InvalidEndpoint { endpoint: "graphql", source })?;

		http::validate_endpoint("graphql", &endpoint)?;

		Ok(endpoint)
	}
}

/// Azure cloud account client.
#[derive(Debug)]
pub struct Client<E>
where
	E: RequestExecutor,
{
	executor: E,
	tracker: TaskChainTracker,
}
impl<E> Client<E>
where
	E: RequestExecutor,
{
	/// Wraps an executor using the default tracker.
	pub fn new(executor: E) -> Self {
		Self { executor, tracker: TaskChainTracker::default() }
	}

	/// Overrides the task chain tracker.
	pub fn with_tracker(mut self, tracker: TaskChainTracker) -> Self {
		self.tracker = tracker;

		self
	}

	/// Underlying executor.
	pub fn executor(&self) -> &E {
		&self.executor
	}

	/// Lists Azure accounts carrying any of `features`, one query per distinct feature.
	pub async fn azure_cloud_accounts(
		&self,
		ctx: &Context,
		features: &[FeatureName],
	) -> Result<Reconciliation> {
		const OPERATION: &str = "azure_cloud_accounts";

		let features = features.iter().copied().collect::<BTreeSet<_>>();
		let mut snapshots = Vec::with_capacity(features.len());

		for feature in features {
			let snapshot = self
				.snapshot(ctx, feature)
				.await
				.map_err(|err| err.context(OPERATION, format!("feature={feature}")))?;

			snapshots.push(snapshot);
		}

		Ok(account::reconcile(&snapshots))
	}

	/// Returns the account with `id`, carrying only the listed `features`.
	pub async fn azure_cloud_account(
		&self,
		ctx: &Context,
		id: &AccountId,
		features: &[FeatureName],
	) -> Result<CloudAccount> {
		const OPERATION: &str = "azure_cloud_account";

		self.azure_cloud_accounts(ctx, features)
			.await?
			.into_account(id)
			.map_err(|err| err.context(OPERATION, format!("account={id}")))
	}

	/// Waits for the task chain `id` to finish.
	pub async fn wait_for_task_chain(
		&self,
		ctx: &Context,
		id: &TaskChainId,
	) -> Result<TaskChainState> {
		const OPERATION: &str = "wait_for_task_chain";

		let check = GraphqlTaskChainCheck::new(&self.executor, id.clone());

		self.tracker
			.wait_for_completion(ctx, &check)
			.await
			.map_err(|err| err.context(OPERATION, format!("task_chain={id}")))
	}

	/// Removes `feature` from the account `id` and waits for the backend job.
	///
	/// Fails with [`Error::NotFound`] when the account does not exist or does not carry the
	/// feature; callers wanting idempotent removal check [`Error::is_not_found`].
	pub async fn remove_azure_cloud_account_feature(
		&self,
		ctx: &Context,
		id: &AccountId,
		feature: FeatureName,
		delete_snapshots: bool,
	) -> Result<TaskChainState> {
		const OPERATION: &str = "remove_azure_cloud_account_feature";

		let detail = format!("account={id} feature={feature}");
		let result = async {
			let account = self.azure_cloud_account(ctx, id, &[feature]).await?;

			account.feature(feature)?;

			let task_chain_id = self.start_disable_job(ctx, id, feature, delete_snapshots).await?;

			obs::event!(
				info,
				account_id = %id,
				feature = %feature,
				task_chain_id = %task_chain_id,
				"Started feature removal job."
			);

			self.wait_for_task_chain(ctx, &task_chain_id).await
		}
		.await;

		result.map_err(|err| err.context(OPERATION, detail))
	}

	async fn snapshot(&self, ctx: &Context, feature: FeatureName) -> Result<RawSnapshot> {
		let variables = serde_json::json!({ "feature": feature });
		let body = self
			.executor
			.request(ctx, graphql::AZURE_CLOUD_ACCOUNT_TENANTS_QUERY, variables)
			.await?;

		RawSnapshot::from_response(feature, &body)
	}

	async fn start_disable_job(
		&self,
		ctx: &Context,
		id: &AccountId,
		feature: FeatureName,
		delete_snapshots: bool,
	) -> Result<TaskChainId> {
		const ENDPOINT: &str = "start disable azure cloud account job";

		#[derive(Deserialize)]
		#[serde(rename_all = "camelCase")]
		struct JobResult {
			#[serde(default)]
			job_ids: Vec<JobId>,
			#[serde(default)]
			errors: Vec<JobError>,
		}
		#[derive(Deserialize)]
		#[serde(rename_all = "camelCase")]
		struct JobId {
			job_id: TaskChainId,
		}
		#[derive(Deserialize)]
		struct JobError {
			error: String,
		}

		let variables = serde_json::json!({
			"feature": feature,
			"cloudAccountIds": [id],
			"deleteSnapshots": delete_snapshots,
		});
		let body = self
			.executor
			.request(ctx, graphql::DISABLE_AZURE_CLOUD_ACCOUNT_MUTATION, variables)
			.await?;
		let result: JobResult = graphql::decode_data(ENDPOINT, &body)?;

		if let Some(rejected) = result.errors.into_iter().next() {
			return Err(RemoteError {
				endpoint: ENDPOINT,
				status: 200,
				code: "JOB_REJECTED".into(),
				message: error::body_snippet(rejected.error.as_bytes()),
			}
			.into());
		}

		match <[JobId; 1]>::try_from(result.job_ids) {
			Ok([job]) => Ok(job.job_id),
			Err(job_ids) => Err(ProtocolError::InvalidResponse {
				endpoint: ENDPOINT,
				reason: format!("expected exactly one job id, got {}", job_ids.len()),
			}
			.into()),
		}
	}
}
impl<C> Client<GraphqlClient<C>>
where
	C: ?Sized + HttpTransport,
{
	/// Builds a GraphQL-backed client over an existing token source.
	pub fn with_token_source(config: &ClientConfig, tokens: Arc<TokenSource<C>>) -> Result<Self> {
		let executor = GraphqlClient::new(config.graphql_endpoint()?, tokens)?
			.with_attempt_timeout(config.token.attempt_timeout);

		Ok(Self::new(executor)
			.with_tracker(TaskChainTracker::new().with_poll_interval(config.poll_interval)))
	}
}
#[cfg(feature = "reqwest")]
impl Client<GraphqlClient<ReqwestHttpClient>> {
	/// Builds a reqwest-backed client authenticating with `environment`.
	pub fn connect(environment: CredentialEnvironment, config: &ClientConfig) -> Result<Self> {
		let tokens = Arc::new(TokenSource::new(environment, config.token));

		Self::with_token_source(config, tokens)
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::collections::VecDeque;
	// self
	use super::*;
	use crate::graphql::RequestFuture;

	struct Recorded {
		query: &'static str,
		variables: serde_json::Value,
	}

	#[derive(Default)]
	struct ScriptedExecutor {
		responses: Mutex<VecDeque<String>>,
		recorded: Mutex<Vec<Recorded>>,
	}
	impl ScriptedExecutor {
		fn new(responses: impl IntoIterator<Item = String>) -> Self {
			Self {
				responses: Mutex::new(responses.into_iter().collect()),
				recorded: Default::default(),
			}
		}

		fn queries(&self) -> Vec<&'static str> {
			self.recorded.lock().iter().map(|recorded| recorded.query).collect()
		}
	}
	impl RequestExecutor for ScriptedExecutor {
		fn request<'a>(
			&'a self,
			_ctx: &'a Context,
			query: &'static str,
			variables: serde_json::Value,
		) -> RequestFuture<'a> {
			self.recorded.lock().push(Recorded { query, variables });

			let next = self.responses.lock().pop_front();

			Box::pin(async move {
				next.map(String::into_bytes)
					.ok_or_else(|| Error::not_found("scripted response", "exhausted"))
			})
		}
	}

	fn listing(feature: &str) -> String {
		serde_json::json!({ "data": { "result": [{
			"cloudType": "AZUREPUBLICCLOUD",
			"azureCloudAccountTenantRubrikId": "T1",
			"domainName": "acme.onmicrosoft.com",
			"clientId": "app",
			"appName": "acme",
			"subscriptionCount": 1,
			"subscriptions": [{
				"id": "A1",
				"name": "prod",
				"nativeId": "sub-1",
				"featureDetail": {
					"feature": feature,
					"status": "CONNECTED",
					"regions": ["eastus"]
				}
			}]
		}]}})
		.to_string()
	}

	fn empty_listing() -> String {
		r#"{"data":{"result":[]}}"#.into()
	}

	fn status(state: &str) -> String {
		serde_json::json!({ "data": { "result": { "taskchain": { "id": "1", "state": state } } } })
			.to_string()
	}

	fn account_id() -> AccountId {
		AccountId::new("A1").expect("Fixture account id should be valid.")
	}

	#[tokio::test]
	async fn listing_queries_each_feature_once() {
		let executor =
			ScriptedExecutor::new([listing("CLOUD_NATIVE_PROTECTION"), listing("EXOCOMPUTE")]);
		let client = Client::new(executor);
		let merged = client
			.azure_cloud_accounts(&Context::background(), &[
				FeatureName::Exocompute,
				FeatureName::CloudNativeProtection,
				FeatureName::Exocompute,
			])
			.await
			.expect("Listing should succeed.");
		let recorded = client.executor().recorded.lock();

		assert_eq!(recorded.len(), 2);
		assert_eq!(recorded[0].variables["feature"], "CLOUD_NATIVE_PROTECTION");
		assert_eq!(recorded[1].variables["feature"], "EXOCOMPUTE");
		assert_eq!(merged.accounts[0].features.len(), 2);
	}

	#[tokio::test]
	async fn missing_account_is_not_found() {
		let client = Client::new(ScriptedExecutor::new([empty_listing()]));
		let err = client
			.azure_cloud_account(&Context::background(), &account_id(), &[FeatureName::Exocompute])
			.await
			.expect_err("Unknown account should be reported.");

		assert!(err.is_not_found());
		assert!(err.to_string().contains("account=A1"));
	}

	#[tokio::test(start_paused = true)]
	async fn removal_starts_job_and_waits() {
		let job = r#"{"data":{"result":{"jobIds":[{"jobId":"tc-42"}],"errors":[]}}}"#.to_owned();
		let executor = ScriptedExecutor::new([
			listing("EXOCOMPUTE"),
			job,
			status("RUNNING"),
			status("SUCCEEDED"),
		]);
		let client = Client::new(executor);
		let state = client
			.remove_azure_cloud_account_feature(
				&Context::background(),
				&account_id(),
				FeatureName::Exocompute,
				true,
			)
			.await
			.expect("Removal should succeed.");

		assert_eq!(state, TaskChainState::Succeeded);
		assert_eq!(client.executor().queries(), vec![
			graphql::AZURE_CLOUD_ACCOUNT_TENANTS_QUERY,
			graphql::DISABLE_AZURE_CLOUD_ACCOUNT_MUTATION,
			graphql::TASK_CHAIN_STATUS_QUERY,
			graphql::TASK_CHAIN_STATUS_QUERY,
		]);

		let recorded = client.executor().recorded.lock();

		assert_eq!(recorded[1].variables["cloudAccountIds"][0], "A1");
		assert_eq!(recorded[1].variables["deleteSnapshots"], true);
		assert_eq!(recorded[2].variables["taskchainId"], "tc-42");
	}

	#[tokio::test]
	async fn removing_absent_feature_is_not_found() {
		let client = Client::new(ScriptedExecutor::new([empty_listing()]));
		let err = client
			.remove_azure_cloud_account_feature(
				&Context::background(),
				&account_id(),
				FeatureName::CloudNativeProtection,
				false,
			)
			.await
			.expect_err("Absent feature should be reported.");

		assert!(err.is_not_found());
		assert_eq!(client.executor().queries().len(), 1, "No job should be started.");
	}

	#[tokio::test]
	async fn rejected_job_surfaces_remote_error() {
		let job = r#"{"data":{"result":{"jobIds":[],"errors":[{"error":"subscription locked"}]}}}"#;
		let client = Client::new(ScriptedExecutor::new([listing("EXOCOMPUTE"), job.to_owned()]));
		let err = client
			.remove_azure_cloud_account_feature(
				&Context::background(),
				&account_id(),
				FeatureName::Exocompute,
				false,
			)
			.await
			.expect_err("Rejected job should fail.");

		match err.root() {
			Error::Remote(remote) => assert_eq!(remote.message, "subscription locked"),
			other => panic!("Unexpected error: {other:?}."),
		}
	}

	#[tokio::test(start_paused = true)]
	async fn failed_job_carries_task_chain_id() {
		let job = r#"{"data":{"result":{"jobIds":[{"jobId":"tc-7"}]}}}"#.to_owned();
		let client =
			Client::new(ScriptedExecutor::new([listing("EXOCOMPUTE"), job, status("FAILED")]));
		let err = client
			.remove_azure_cloud_account_feature(
				&Context::background(),
				&account_id(),
				FeatureName::Exocompute,
				false,
			)
			.await
			.expect_err("Failed job should surface.");

		match err.root() {
			Error::TaskChain { task_chain_id, state: TaskChainState::Failed } =>
				assert_eq!(task_chain_id, "tc-7"),
			other => panic!("Unexpected error: {other:?}."),
		}
	}

	#[test]
	fn config_derives_graphql_endpoint() {
		let config = ClientConfig::parse("https://acme.my.example.com/some/path")
			.expect("Account URL should parse.");

		assert_eq!(
			config.graphql_endpoint().expect("Endpoint should be valid.").as_str(),
			"https://acme.my.example.com/api/graphql"
		);
		assert!(matches!(
			ClientConfig::parse("http://acme.my.example.com")
				.and_then(|config| config.graphql_endpoint()),
			Err(ConfigError::InsecureEndpoint { .. })
		));
	}
}
