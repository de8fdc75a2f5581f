//! Control-plane query execution and GraphQL envelope decoding.
//!
//! Core components depend only on [`RequestExecutor`], which sends a query plus variables and
//! hands back the raw response body. [`GraphqlClient`] is the shipped implementation: it posts to
//! `/api/graphql` with a bearer token from a shared [`TokenSource`], bounds every request by a
//! per-attempt deadline, and on an HTTP 401 drops the rejected token and retries exactly once.
//! [`decode_data`] turns an envelope of the form `{"data": {"result": ...}}` or
//! `{"errors": [...]}` into the typed result.

// std
use std::time::Duration as StdDuration;
// self
use crate::{
	_prelude::*,
	auth::{Token, TokenSource, TokenSourceConfig},
	context::Context,
	error::{self, ConfigError, ProtocolError, RemoteError, TransportError},
	http::{self, HttpTransport, JsonRequest, TransportResponse},
	obs::{self, OperationKind, OperationOutcome, OperationSpan},
};

const OPERATION: &str = "query";
const ENDPOINT: &str = "graphql endpoint";

/// Lists Azure tenants together with their subscriptions' detail for a single feature.
pub const AZURE_CLOUD_ACCOUNT_TENANTS_QUERY: &str = r#"query SdkAzureCloudAccountTenants(
	$feature: CloudAccountFeature!
) {
	result: allAzureCloudAccountTenants(feature: $feature, includeSubscriptionDetails: true) {
		cloudType
		azureCloudAccountTenantRubrikId
		domainName
		clientId
		appName
		subscriptionCount
		subscriptions {
			id
			name
			nativeId
			featureDetail {
				feature
				status
				regions
				resourceGroup { name nativeId region tags { key value } }
				userAssignedManagedIdentity { name nativeId principalId resourceGroupName }
			}
		}
	}
}"#;

/// Reads the state of a task chain.
pub const TASK_CHAIN_STATUS_QUERY: &str = r#"query SdkTaskChainStatus($taskchainId: String!) {
	result: getKorgTaskchainStatus(taskchainId: $taskchainId) {
		taskchain { id state }
	}
}"#;

/// Starts the job removing one feature from Azure subscriptions.
pub const DISABLE_AZURE_CLOUD_ACCOUNT_MUTATION: &str = r#"
mutation SdkStartDisableAzureCloudAccountJob(
	$feature: CloudAccountFeature!
	$cloudAccountIds: [UUID!]!
	$deleteSnapshots: Boolean!
) {
	result: startDisableAzureCloudAccountJob(input: {
		feature: $feature
		cloudAccountIds: $cloudAccountIds
		deleteSnapshots: $deleteSnapshots
	}) {
		jobIds { jobId }
		errors { error }
	}
}"#;

/// Boxed future returned by [`RequestExecutor::request`].
pub type RequestFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<u8>>> + 'a + Send>>;

/// Sends structured control-plane queries.
///
/// Implementations return the raw body of a successful response; callers decode it with
/// [`decode_data`].
pub trait RequestExecutor
where
	Self: Send + Sync,
{
	/// Executes `query` with `variables`.
	fn request<'a>(
		&'a self,
		ctx: &'a Context,
		query: &'static str,
		variables: serde_json::Value,
	) -> RequestFuture<'a>;
}

/// [`RequestExecutor`] posting GraphQL documents with bearer authentication.
pub struct GraphqlClient<C>
where
	C: ?Sized + HttpTransport,
{
	endpoint: Url,
	tokens: Arc<TokenSource<C>>,
	attempt_timeout: StdDuration,
}
impl<C> GraphqlClient<C>
where
	C: ?Sized + HttpTransport,
{
	/// Creates a client for `endpoint` sharing the token source's transport.
	pub fn new(endpoint: Url, tokens: Arc<TokenSource<C>>) -> Result<Self, ConfigError> {
		http::validate_endpoint("graphql", &endpoint)?;

		Ok(Self {
			endpoint,
			tokens,
			attempt_timeout: TokenSourceConfig::DEFAULT_ATTEMPT_TIMEOUT,
		})
	}

	/// Overrides the deadline applied to every control-plane request.
	pub fn with_attempt_timeout(mut self, timeout: StdDuration) -> Self {
		self.attempt_timeout = timeout;

		self
	}

	/// Deadline applied to every control-plane request.
	pub fn attempt_timeout(&self) -> StdDuration {
		self.attempt_timeout
	}

	/// Query endpoint.
	pub fn endpoint(&self) -> &Url {
		&self.endpoint
	}

	/// Token source used for authentication.
	pub fn token_source(&self) -> &Arc<TokenSource<C>> {
		&self.tokens
	}

	async fn execute(
		&self,
		ctx: &Context,
		query: &'static str,
		variables: serde_json::Value,
	) -> Result<Vec<u8>> {
		#[derive(Serialize)]
		struct Document<'a> {
			query: &'a str,
			variables: serde_json::Value,
		}

		let body =
			serde_json::to_vec(&Document { query, variables }).map_err(ConfigError::Serialize)?;
		let token = self.tokens.acquire(ctx).await?;
		let mut response = self.send(ctx, &token, body.clone()).await?;

		if response.status == 401 {
			obs::event!(info, "Control plane rejected the bearer token; refreshing once.");

			self.tokens.invalidate_if(&token).await;

			let token = self.tokens.acquire(ctx).await?;

			response = self.send(ctx, &token, body).await?;
		}

		interpret(response)
	}

	async fn send(&self, ctx: &Context, token: &Token, body: Vec<u8>) -> Result<TransportResponse> {
		let request =
			JsonRequest { url: &self.endpoint, bearer: Some(token.secret().expose()), body };
		let attempt_ctx = ctx.with_timeout(self.attempt_timeout);
		let outcome = tokio::select! {
			biased;
			_ = attempt_ctx.done() => None,
			response = self.tokens.http_client.post_json(request) => Some(response),
		};

		match outcome {
			Some(Ok(response)) => Ok(response),
			Some(Err(TransportError::TimedOut)) =>
				Err(Error::Timeout { operation: OPERATION, attempts: 1 }),
			Some(Err(err)) => Err(err.into()),
			None => match ctx.interrupted() {
				Some(reason) => Err(Error::Canceled { operation: OPERATION, reason }),
				None => Err(Error::Timeout { operation: OPERATION, attempts: 1 }),
			},
		}
	}
}
impl<C> RequestExecutor for GraphqlClient<C>
where
	C: ?Sized + HttpTransport,
{
	fn request<'a>(
		&'a self,
		ctx: &'a Context,
		query: &'static str,
		variables: serde_json::Value,
	) -> RequestFuture<'a> {
		Box::pin(async move {
			const KIND: OperationKind = OperationKind::Query;

			let span = OperationSpan::new(KIND, "request");

			obs::record_operation_outcome(KIND, OperationOutcome::Attempt);

			let result = span.instrument(self.execute(ctx, query, variables)).await;

			obs::record_operation_outcome(KIND, OperationOutcome::of(&result));

			result
		})
	}
}
impl<C> Debug for GraphqlClient<C>
where
	C: ?Sized + HttpTransport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("GraphqlClient")
			.field("endpoint", &self.endpoint.as_str())
			.field("tokens", &self.tokens)
			.field("attempt_timeout", &self.attempt_timeout)
			.finish()
	}
}

#[derive(Deserialize)]
struct Envelope {
	#[serde(default)]
	data: Option<serde_json::Value>,
	#[serde(default)]
	errors: Vec<GraphqlError>,
}

#[derive(Deserialize)]
struct GraphqlError {
	message: String,
	#[serde(default)]
	extensions: Option<GraphqlErrorExtensions>,
}

#[derive(Deserialize)]
struct GraphqlErrorExtensions {
	#[serde(default)]
	code: Option<String>,
}

/// Decodes the `data.result` member of a GraphQL envelope.
///
/// A non-empty `errors` array becomes [`Error::Remote`]; an empty body, a missing result, or a
/// result of the wrong shape becomes [`Error::Protocol`].
pub fn decode_data<T>(endpoint: &'static str, body: &[u8]) -> Result<T>
where
	T: serde::de::DeserializeOwned,
{
	const STATUS: u16 = 200;

	if body.is_empty() {
		return Err(ProtocolError::EmptyBody { endpoint, status: STATUS }.into());
	}

	let envelope: Envelope = http::decode_json(endpoint, STATUS, body)?;

	if let Some(remote) = remote_error(endpoint, STATUS, &envelope.errors) {
		return Err(remote.into());
	}

	let result = envelope
		.data
		.and_then(|mut data| data.get_mut("result").map(serde_json::Value::take))
		.filter(|result| !result.is_null())
		.ok_or_else(|| ProtocolError::InvalidResponse {
			endpoint,
			reason: "envelope carries no `data.result`".into(),
		})?;

	serde_path_to_error::deserialize(result).map_err(|source| {
		let snippet = error::body_snippet(body);

		ProtocolError::MalformedBody { endpoint, status: STATUS, snippet, source }.into()
	})
}

fn remote_error(
	endpoint: &'static str,
	status: u16,
	errors: &[GraphqlError],
) -> Option<RemoteError> {
	let first = errors.first()?;
	let code = first
		.extensions
		.as_ref()
		.and_then(|extensions| extensions.code.clone())
		.unwrap_or_else(|| "GRAPHQL_ERROR".into());
	let message =
		errors.iter().map(|error| error.message.as_str()).collect::<Vec<_>>().join("; ");

	Some(RemoteError { endpoint, status, code, message: error::body_snippet(message.as_bytes()) })
}

fn interpret(response: TransportResponse) -> Result<Vec<u8>> {
	#[derive(Deserialize)]
	struct FailureBody {
		#[serde(default)]
		errors: Vec<GraphqlError>,
		#[serde(default)]
		message: Option<String>,
	}

	let status = response.status;

	if response.body.is_empty() {
		return Err(ProtocolError::EmptyBody { endpoint: ENDPOINT, status }.into());
	}
	if !response.is_json() {
		return Err(ProtocolError::UnexpectedContentType {
			endpoint: ENDPOINT,
			status,
			content_type: response.content_type.unwrap_or_else(|| "<missing>".into()),
			snippet: error::body_snippet(&response.body),
		}
		.into());
	}
	if response.is_success() {
		return Ok(response.body);
	}

	let failure: FailureBody = http::decode_json(ENDPOINT, status, &response.body)?;

	Err(remote_error(ENDPOINT, status, &failure.errors)
		.unwrap_or_else(|| RemoteError {
			endpoint: ENDPOINT,
			status,
			code: format!("HTTP_{status}"),
			message: error::body_snippet(
				failure.message.as_deref().map(str::as_bytes).unwrap_or(&response.body),
			),
		})
		.into())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[derive(Debug, Deserialize, PartialEq)]
	struct Echo {
		value: u32,
	}

	#[test]
	fn decode_data_extracts_result() {
		let echo: Echo = decode_data("test", br#"{"data":{"result":{"value":7}}}"#)
			.expect("Result member should decode.");

		assert_eq!(echo, Echo { value: 7 });
	}

	#[test]
	fn decode_data_surfaces_graphql_errors() {
		let body = serde_json::json!({
			"data": null,
			"errors": [
				{ "message": "boom", "extensions": { "code": "FORBIDDEN" } },
				{ "message": "again" }
			]
		});
		let err = decode_data::<Echo>("test", body.to_string().as_bytes())
			.expect_err("GraphQL errors should surface.");

		match err {
			Error::Remote(remote) => {
				assert_eq!(remote.code, "FORBIDDEN");
				assert_eq!(remote.message, "boom; again");
			},
			other => panic!("Unexpected error: {other:?}."),
		}
	}

	#[test]
	fn decode_data_rejects_missing_or_malformed_results() {
		assert!(matches!(
			decode_data::<Echo>("test", b""),
			Err(Error::Protocol(ProtocolError::EmptyBody { .. }))
		));
		assert!(matches!(
			decode_data::<Echo>("test", br#"{"data":{}}"#),
			Err(Error::Protocol(ProtocolError::InvalidResponse { .. }))
		));

		match decode_data::<Echo>("test", br#"{"data":{"result":{"value":"x"}}}"#) {
			Err(Error::Protocol(ProtocolError::MalformedBody { source, .. })) =>
				assert_eq!(source.path().to_string(), "value"),
			other => panic!("Unexpected result: {other:?}."),
		}
	}

	#[test]
	fn interpret_maps_http_failures() {
		let err = interpret(TransportResponse {
			status: 403,
			content_type: Some("application/json".into()),
			body: br#"{"message":"not allowed"}"#.to_vec(),
		})
		.expect_err("Forbidden should surface as a remote error.");

		match err {
			Error::Remote(remote) => {
				assert_eq!(remote.status, 403);
				assert_eq!(remote.code, "HTTP_403");
				assert_eq!(remote.message, "not allowed");
			},
			other => panic!("Unexpected error: {other:?}."),
		}

		assert!(matches!(
			interpret(TransportResponse {
				status: 502,
				content_type: Some("text/html".into()),
				body: b"<html>bad gateway</html>".to_vec(),
			}),
			Err(Error::Protocol(ProtocolError::UnexpectedContentType { status: 502, .. }))
		));
	}

	#[cfg(feature = "reqwest")]
	#[tokio::test(start_paused = true)]
	async fn unauthorized_response_refreshes_token_once() {
		// self
		use crate::{
			_preludet::*,
			auth::{CredentialEnvironment, TokenSourceConfig},
		};

		let expires_at = OffsetDateTime::now_utc() + Duration::hours(1);
		let transport = Arc::new(ScriptedHttpClient::new([
			ScriptedOutcome::json(200, token_body(expires_at)),
			ScriptedOutcome::json(401, r#"{"message":"token revoked"}"#),
			ScriptedOutcome::json(200, token_body(expires_at)),
			ScriptedOutcome::json(200, r#"{"data":{"result":{"value":1}}}"#),
		]));
		let tokens: Arc<TokenSource<ScriptedHttpClient>> = Arc::new(TokenSource::with_http_client(
			CredentialEnvironment::ServiceAccount(test_service_account(
				"https://acme.example.com/api/client_token",
			)),
			TokenSourceConfig::default(),
			transport.clone(),
		));
		let client = GraphqlClient::new(
			Url::parse("https://acme.example.com/api/graphql").expect("Endpoint should parse."),
			tokens.clone(),
		)
		.expect("HTTPS endpoint should be accepted.");
		let body = client
			.request(&Context::background(), TASK_CHAIN_STATUS_QUERY, serde_json::json!({}))
			.await
			.expect("Retried request should succeed.");
		let echo: Echo = decode_data("test", &body).expect("Body should decode.");

		assert_eq!(echo, Echo { value: 1 });
		assert_eq!(transport.call_count(), 4);
		assert_eq!(tokens.metrics().network_attempts(), 2);
		assert_eq!(transport.recorded_bodies()[1]["query"], TASK_CHAIN_STATUS_QUERY);
	}

	#[cfg(feature = "reqwest")]
	fn scripted_client<T>(transport: Arc<T>) -> GraphqlClient<T>
	where
		T: HttpTransport,
	{
		// self
		use crate::{
			_preludet::*,
			auth::{CredentialEnvironment, TokenSourceConfig},
		};

		let tokens: Arc<TokenSource<T>> = Arc::new(TokenSource::with_http_client(
			CredentialEnvironment::ServiceAccount(test_service_account(
				"https://acme.example.com/api/client_token",
			)),
			TokenSourceConfig::default(),
			transport,
		));

		GraphqlClient::new(
			Url::parse("https://acme.example.com/api/graphql").expect("Endpoint should parse."),
			tokens,
		)
		.expect("HTTPS endpoint should be accepted.")
	}

	#[cfg(feature = "reqwest")]
	#[tokio::test(start_paused = true)]
	async fn hung_request_times_out_per_attempt() {
		// self
		use crate::_preludet::*;

		let expires_at = OffsetDateTime::now_utc() + Duration::hours(1);
		let transport = Arc::new(ScriptedHttpClient::new([
			ScriptedOutcome::json(200, token_body(expires_at)),
			ScriptedOutcome::Hang,
		]));
		let client =
			scripted_client(transport.clone()).with_attempt_timeout(StdDuration::from_secs(5));
		let started = tokio::time::Instant::now();
		let err = client
			.request(&Context::background(), TASK_CHAIN_STATUS_QUERY, serde_json::json!({}))
			.await
			.expect_err("A hung request should hit the attempt deadline.");

		assert!(err.is_timeout(), "Unexpected error: {err:?}.");
		assert!(!err.is_canceled());
		assert!(started.elapsed() >= StdDuration::from_secs(5));
		assert_eq!(transport.call_count(), 2);
	}

	#[cfg(feature = "reqwest")]
	#[tokio::test(start_paused = true)]
	async fn caller_deadline_on_hung_request_is_cancellation() {
		// self
		use crate::{_preludet::*, context::Interrupt};

		let expires_at = OffsetDateTime::now_utc() + Duration::hours(1);
		let transport = Arc::new(ScriptedHttpClient::new([
			ScriptedOutcome::json(200, token_body(expires_at)),
			ScriptedOutcome::Hang,
		]));
		let client = scripted_client(transport);
		let ctx = Context::background().with_timeout(StdDuration::from_secs(1));
		let err = client
			.request(&ctx, TASK_CHAIN_STATUS_QUERY, serde_json::json!({}))
			.await
			.expect_err("The caller deadline should stop the request.");

		assert!(matches!(
			err,
			Error::Canceled { operation: OPERATION, reason: Interrupt::DeadlineExceeded }
		));
	}

	/// Issues a distinct token per token-endpoint call and rejects only the first one issued;
	/// control-plane responses take one second so concurrent requests overlap.
	#[cfg(feature = "reqwest")]
	#[derive(Debug, Default)]
	struct RotatingTransport {
		issued: Mutex<Vec<String>>,
	}
	#[cfg(feature = "reqwest")]
	impl RotatingTransport {
		fn issued(&self) -> usize {
			self.issued.lock().len()
		}
	}
	#[cfg(feature = "reqwest")]
	impl HttpTransport for RotatingTransport {
		fn post_json<'a>(&'a self, request: JsonRequest<'a>) -> http::TransportFuture<'a> {
			fn json(status: u16, body: String) -> TransportResponse {
				TransportResponse {
					status,
					content_type: Some("application/json".into()),
					body: body.into_bytes(),
				}
			}

			let Some(bearer) = request.bearer else {
				let mut issued = self.issued.lock();
				let expires_at = OffsetDateTime::now_utc()
					+ Duration::hours(1)
					+ Duration::seconds(issued.len() as i64);
				let token = crate::_preludet::unsigned_jwt(expires_at);
				let body = serde_json::json!({ "access_token": token }).to_string();

				issued.push(token);

				return Box::pin(async move { Ok(json(200, body)) });
			};
			let rejected = self.issued.lock().first().is_some_and(|first| first == bearer);

			Box::pin(async move {
				tokio::time::sleep(StdDuration::from_secs(1)).await;

				if rejected {
					Ok(json(401, r#"{"message":"token revoked"}"#.into()))
				} else {
					Ok(json(200, r#"{"data":{"result":{"value":3}}}"#.into()))
				}
			})
		}
	}

	#[cfg(feature = "reqwest")]
	#[tokio::test(start_paused = true)]
	async fn concurrent_rejections_of_one_token_refresh_once() {
		let transport = Arc::new(RotatingTransport::default());
		let client = scripted_client(transport.clone());
		let ctx = Context::background();
		let (first, second) = tokio::join!(
			client.request(&ctx, TASK_CHAIN_STATUS_QUERY, serde_json::json!({})),
			client.request(&ctx, TASK_CHAIN_STATUS_QUERY, serde_json::json!({})),
		);

		for body in [first, second] {
			let body = body.expect("Both requests should succeed after one refresh.");
			let echo: Echo = decode_data("test", &body).expect("Body should decode.");

			assert_eq!(echo, Echo { value: 3 });
		}

		assert_eq!(transport.issued(), 2);
		assert_eq!(client.token_source().metrics().network_attempts(), 2);
	}
}
