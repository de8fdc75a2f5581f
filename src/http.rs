//! Transport primitives for JSON POST exchanges with the token and control-plane endpoints.
//!
//! [`HttpTransport`] is the client's only dependency on an HTTP stack. The token source and the
//! GraphQL executor hand it a [`JsonRequest`] and receive a [`TransportResponse`] carrying the
//! raw status, content type, and body; interpretation of those bytes (JSON checks, error
//! payloads, snippets) stays in the callers so custom transports never need to replicate it.

// std
#[cfg(feature = "reqwest")] use std::ops::Deref;
// crates.io
#[cfg(feature = "reqwest")]
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderValue};
// self
use crate::{
	_prelude::*,
	error::{self, ConfigError, ProtocolError, TransportError},
};

/// Boxed future returned by [`HttpTransport::post_json`].
pub type TransportFuture<'a> =
	Pin<Box<dyn Future<Output = Result<TransportResponse, TransportError>> + 'a + Send>>;

/// MIME type used for every request and expected on every response.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Outbound JSON POST request.
#[derive(Clone)]
pub struct JsonRequest<'a> {
	/// Target endpoint.
	pub url: &'a Url,
	/// Bearer token attached as `Authorization: Bearer <token>`, if any.
	pub bearer: Option<&'a str>,
	/// Serialized JSON body.
	pub body: Vec<u8>,
}
impl Debug for JsonRequest<'_> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("JsonRequest")
			.field("url", &self.url.as_str())
			.field("bearer", &self.bearer.map(|_| "<redacted>"))
			.field("body_len", &self.body.len())
			.finish()
	}
}

/// Raw response captured by a transport.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransportResponse {
	/// HTTP status code.
	pub status: u16,
	/// `Content-Type` header value, if present.
	pub content_type: Option<String>,
	/// Response body bytes.
	pub body: Vec<u8>,
}
impl TransportResponse {
	/// Returns `true` for 2xx statuses.
	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}

	/// Returns `true` when the `Content-Type` names JSON (parameters such as charset are
	/// ignored).
	pub fn is_json(&self) -> bool {
		self.content_type.as_deref().is_some_and(|value| {
			let essence = value.split(';').next().unwrap_or_default().trim();

			essence.eq_ignore_ascii_case(JSON_CONTENT_TYPE)
				|| essence.to_ascii_lowercase().ends_with("+json")
		})
	}
}

/// Abstraction over HTTP stacks capable of sending JSON POST requests.
///
/// Implementations must set `Content-Type` and `Accept` to [`JSON_CONTENT_TYPE`], attach the
/// bearer token when present, and report any HTTP status as a successful
/// [`TransportResponse`]. Only failures that prevent a response from arriving map to
/// [`TransportError`]. Deadlines are enforced by the callers, so implementations do not need
/// their own timeouts.
pub trait HttpTransport
where
	Self: 'static + Send + Sync,
{
	/// Sends `request` and captures the raw response.
	fn post_json<'a>(&'a self, request: JsonRequest<'a>) -> TransportFuture<'a>;
}

/// Thin wrapper around [`ReqwestClient`] so shared HTTP behavior lives in one place.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestHttpClient(pub ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestHttpClient {
	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}
}
#[cfg(feature = "reqwest")]
impl AsRef<ReqwestClient> for ReqwestHttpClient {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl Deref for ReqwestHttpClient {
	type Target = ReqwestClient;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl HttpTransport for ReqwestHttpClient {
	fn post_json<'a>(&'a self, request: JsonRequest<'a>) -> TransportFuture<'a> {
		Box::pin(async move {
			let mut builder = self
				.0
				.post(request.url.clone())
				.header(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE))
				.header(ACCEPT, HeaderValue::from_static(JSON_CONTENT_TYPE))
				.body(request.body);

			if let Some(token) = request.bearer {
				builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
			}

			let response = builder.send().await?;
			let status = response.status().as_u16();
			let content_type = response
				.headers()
				.get(CONTENT_TYPE)
				.and_then(|value| value.to_str().ok())
				.map(ToOwned::to_owned);
			let body = response.bytes().await?.to_vec();

			Ok(TransportResponse { status, content_type, body })
		})
	}
}

/// Decodes a JSON body, reporting the failing path and a bounded body preview.
pub(crate) fn decode_json<T>(
	endpoint: &'static str,
	status: u16,
	body: &[u8],
) -> Result<T, ProtocolError>
where
	T: serde::de::DeserializeOwned,
{
	let de = &mut serde_json::Deserializer::from_slice(body);

	serde_path_to_error::deserialize(de).map_err(|source| ProtocolError::MalformedBody {
		endpoint,
		status,
		snippet: error::body_snippet(body),
		source,
	})
}

/// Ensures `url` uses HTTPS; plain HTTP is only accepted for loopback hosts.
pub fn validate_endpoint(endpoint: &'static str, url: &Url) -> Result<(), ConfigError> {
	let loopback = match url.host() {
		Some(url::Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
		Some(url::Host::Ipv4(addr)) => addr.is_loopback(),
		Some(url::Host::Ipv6(addr)) => addr.is_loopback(),
		None => false,
	};

	match url.scheme() {
		"https" => Ok(()),
		"http" if loopback => Ok(()),
		_ => Err(ConfigError::InsecureEndpoint { endpoint, url: url.to_string() }),
	}
}
