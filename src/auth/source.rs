//! Cached bearer token acquisition with per-attempt deadlines and bounded retry.
//!
//! [`TokenSource::acquire`] serializes callers on one async lock. Inside the lock the cached
//! token is reused while it stays valid for longer than the configured skew; otherwise the
//! credential environment is resolved and the token endpoint is called. Each call runs under a
//! per-attempt deadline derived from the caller's [`Context`]. Only attempts that exceed that
//! deadline are retried; transport, protocol, and remote errors surface immediately, and caller
//! cancellation is never retried.

mod metrics;

pub use metrics::TokenMetrics;

// std
use std::time::Duration as StdDuration;
// self
use crate::{
	_prelude::*,
	auth::{CredentialEnvironment, Token, TokenGrant},
	context::Context,
	error::{self, ProtocolError, RemoteError, TransportError},
	http::{self, HttpTransport, JsonRequest, TransportResponse},
	obs::{self, OperationKind, OperationOutcome, OperationSpan},
};
#[cfg(feature = "reqwest")] use crate::http::ReqwestHttpClient;

const OPERATION: &str = "acquire_token";
const ENDPOINT: &str = "token endpoint";

/// Tuning knobs for [`TokenSource`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TokenSourceConfig {
	/// A cached token is reused only while it stays valid for longer than this window.
	pub expiry_skew: Duration,
	/// Deadline applied to every token endpoint call.
	pub attempt_timeout: StdDuration,
	/// Maximum number of token endpoint calls per acquisition.
	pub max_attempts: u32,
}
impl TokenSourceConfig {
	/// Default expiry skew (60 seconds).
	pub const DEFAULT_EXPIRY_SKEW: Duration = Duration::seconds(60);
	/// Default per-attempt deadline (15 seconds).
	pub const DEFAULT_ATTEMPT_TIMEOUT: StdDuration = StdDuration::from_secs(15);
	/// Default attempt budget.
	pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

	/// Overrides the expiry skew; negative values clamp to zero.
	pub fn with_expiry_skew(mut self, skew: Duration) -> Self {
		self.expiry_skew = if skew.is_negative() { Duration::ZERO } else { skew };

		self
	}

	/// Overrides the per-attempt deadline.
	pub fn with_attempt_timeout(mut self, timeout: StdDuration) -> Self {
		self.attempt_timeout = timeout;

		self
	}

	/// Overrides the attempt budget; zero clamps to a single attempt.
	pub fn with_max_attempts(mut self, attempts: u32) -> Self {
		self.max_attempts = attempts.max(1);

		self
	}
}
impl Default for TokenSourceConfig {
	fn default() -> Self {
		Self {
			expiry_skew: Self::DEFAULT_EXPIRY_SKEW,
			attempt_timeout: Self::DEFAULT_ATTEMPT_TIMEOUT,
			max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
		}
	}
}

/// Caching bearer token source shared by every control-plane request.
pub struct TokenSource<C>
where
	C: ?Sized + HttpTransport,
{
	/// HTTP transport used for token endpoint calls.
	pub http_client: Arc<C>,
	environment: CredentialEnvironment,
	config: TokenSourceConfig,
	cached: AsyncMutex<Option<Token>>,
	metrics: Arc<TokenMetrics>,
}
impl<C> TokenSource<C>
where
	C: ?Sized + HttpTransport,
{
	/// Creates a token source that issues requests through the provided transport.
	pub fn with_http_client(
		environment: CredentialEnvironment,
		config: TokenSourceConfig,
		http_client: impl Into<Arc<C>>,
	) -> Self {
		Self {
			http_client: http_client.into(),
			environment,
			config,
			cached: AsyncMutex::new(None),
			metrics: Default::default(),
		}
	}

	/// Active configuration.
	pub fn config(&self) -> &TokenSourceConfig {
		&self.config
	}

	/// Acquisition counters.
	pub fn metrics(&self) -> &TokenMetrics {
		&self.metrics
	}

	/// Returns a token valid for longer than the configured skew, fetching a new one when the
	/// cache is empty or stale.
	pub async fn acquire(&self, ctx: &Context) -> Result<Token> {
		const KIND: OperationKind = OperationKind::AcquireToken;

		let span = OperationSpan::new(KIND, "acquire");

		obs::record_operation_outcome(KIND, OperationOutcome::Attempt);
		self.metrics.record_acquisition();

		let result = span
			.instrument(async move {
				ctx.ensure_active(OPERATION)?;

				let mut cached = tokio::select! {
					biased;
					reason = ctx.done() =>
						return Err(Error::Canceled { operation: OPERATION, reason }),
					guard = self.cached.lock() => guard,
				};
				let now = OffsetDateTime::now_utc();

				if let Some(token) =
					cached.as_ref().filter(|token| token.is_fresh_at(now, self.config.expiry_skew))
				{
					self.metrics.record_cache_hit();

					return Ok(token.clone());
				}

				let grant = self.environment.resolve()?;
				let token = self.fetch(ctx, &grant).await?;

				obs::event!(
					debug,
					principal = %grant.principal,
					expires_at = %token.expires_at(),
					"Acquired a new bearer token."
				);

				*cached = Some(token.clone());

				Ok(token)
			})
			.await;

		if result.is_err() {
			self.metrics.record_failure();
		}

		obs::record_operation_outcome(KIND, OperationOutcome::of(&result));

		result
	}

	/// Drops the cached token so the next [`acquire`](Self::acquire) fetches a new one.
	pub async fn invalidate(&self) {
		self.cached.lock().await.take();
	}

	/// Drops the cached token only while it is still `rejected`.
	///
	/// Returns `true` when the cache was cleared. A token fetched by another caller after the
	/// rejection is kept, so concurrent rejections of one token cause a single refetch.
	pub async fn invalidate_if(&self, rejected: &Token) -> bool {
		let mut cached = self.cached.lock().await;

		if cached.as_ref().is_some_and(|token| token.secret() == rejected.secret()) {
			cached.take();

			true
		} else {
			false
		}
	}

	async fn fetch(&self, ctx: &Context, grant: &TokenGrant) -> Result<Token> {
		let max_attempts = self.config.max_attempts.max(1);

		for attempt in 1..=max_attempts {
			let attempt_ctx = ctx.with_timeout(self.config.attempt_timeout);
			let request =
				JsonRequest { url: &grant.token_url, bearer: None, body: grant.body.clone() };

			self.metrics.record_network_attempt();

			let outcome = tokio::select! {
				biased;
				_ = attempt_ctx.done() => None,
				response = self.http_client.post_json(request) => Some(response),
			};

			match outcome {
				Some(Ok(response)) => return parse_token_response(response),
				Some(Err(TransportError::TimedOut)) => {},
				Some(Err(err)) => return Err(err.into()),
				None =>
					if let Some(reason) = ctx.interrupted() {
						return Err(Error::Canceled { operation: OPERATION, reason });
					},
			}

			obs::event!(
				warn,
				attempt,
				max_attempts,
				principal = %grant.principal,
				"Token endpoint attempt timed out."
			);
		}

		Err(Error::Timeout { operation: OPERATION, attempts: max_attempts })
	}
}
#[cfg(feature = "reqwest")]
impl TokenSource<ReqwestHttpClient> {
	/// Creates a token source backed by a default reqwest client.
	pub fn new(environment: CredentialEnvironment, config: TokenSourceConfig) -> Self {
		Self::with_http_client(environment, config, ReqwestHttpClient::default())
	}
}
impl<C> Debug for TokenSource<C>
where
	C: ?Sized + HttpTransport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenSource")
			.field("environment", &self.environment)
			.field("config", &self.config)
			.field("metrics", &self.metrics)
			.finish_non_exhaustive()
	}
}

#[derive(Deserialize)]
struct TokenSuccessBody {
	access_token: String,
	#[serde(default)]
	expires_in: Option<i64>,
}

#[derive(Deserialize)]
struct TokenErrorBody {
	error: String,
	#[serde(default, alias = "message")]
	error_description: Option<String>,
}

fn parse_token_response(response: TransportResponse) -> Result<Token> {
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
	if !response.is_success() {
		let body: TokenErrorBody = http::decode_json(ENDPOINT, status, &response.body)?;

		return Err(RemoteError {
			endpoint: ENDPOINT,
			status,
			code: body.error,
			message: error::body_snippet(body.error_description.unwrap_or_default().as_bytes()),
		}
		.into());
	}

	let body: TokenSuccessBody = http::decode_json(ENDPOINT, status, &response.body)?;
	let fallback = body
		.expires_in
		.map(|seconds| OffsetDateTime::now_utc() + Duration::seconds(seconds));

	Token::from_jwt(body.access_token, fallback).map_err(|err| {
		ProtocolError::InvalidResponse { endpoint: ENDPOINT, reason: err.to_string() }.into()
	})
}
