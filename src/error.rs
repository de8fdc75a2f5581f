//! Client-wide error taxonomy shared by the token source, tracker, reconciler, and executor.

// self
use crate::{_prelude::*, context::Interrupt, id::IdentifierError, task::TaskChainState};

/// Client-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Maximum number of bytes of a remote body embedded in diagnostics.
pub const BODY_SNIPPET_LIMIT: usize = 512;

/// Canonical error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Transport failure (DNS, TCP, TLS).
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// Malformed, empty, or non-JSON response.
	#[error(transparent)]
	Protocol(#[from] ProtocolError),
	/// Well-formed error payload returned by the remote service.
	#[error(transparent)]
	Remote(#[from] RemoteError),

	/// Every attempt exceeded its per-attempt deadline.
	#[error("{operation} timed out after {attempts} attempt(s).")]
	Timeout {
		/// Operation that timed out.
		operation: &'static str,
		/// Number of attempts made before giving up.
		attempts: u32,
	},
	/// Entity is absent after a successful read.
	#[error("{entity} `{id}` was not found.")]
	NotFound {
		/// Kind of entity that was looked up.
		entity: &'static str,
		/// Identifier used for the lookup.
		id: String,
	},
	/// Task chain reached a terminal state other than success.
	#[error("Task chain `{task_chain_id}` finished in state {state}.")]
	TaskChain {
		/// Identifier of the failed task chain.
		task_chain_id: String,
		/// Last observed state.
		state: TaskChainState,
	},
	/// Caller cancelled the operation or its deadline elapsed.
	#[error("{operation} was interrupted: {reason}.")]
	Canceled {
		/// Operation that observed the interruption.
		operation: &'static str,
		/// Cancellation or deadline.
		reason: Interrupt,
	},
	/// Failure annotated with the operation and identifiers that produced it.
	#[error("{operation} ({detail}) failed: {source}")]
	Context {
		/// Operation name.
		operation: &'static str,
		/// Identifiers relevant to the failure (account id, feature, task chain id).
		detail: String,
		/// Wrapped failure.
		#[source]
		source: Box<Error>,
	},
}
impl Error {
	/// Wraps the error with the operation name and identifying detail.
	pub fn context(self, operation: &'static str, detail: impl Into<String>) -> Self {
		Self::Context { operation, detail: detail.into(), source: Box::new(self) }
	}

	/// Returns the innermost error, looking through [`Error::Context`] wrappers.
	pub fn root(&self) -> &Error {
		match self {
			Error::Context { source, .. } => source.root(),
			other => other,
		}
	}

	/// Flat category of the error.
	pub fn kind(&self) -> ErrorKind {
		match self {
			Error::Config(_) => ErrorKind::Config,
			Error::Transport(_) => ErrorKind::Transport,
			Error::Protocol(_) => ErrorKind::Protocol,
			Error::Remote(_) => ErrorKind::Remote,
			Error::Timeout { .. } => ErrorKind::Timeout,
			Error::NotFound { .. } => ErrorKind::NotFound,
			Error::TaskChain { .. } => ErrorKind::TaskChain,
			Error::Canceled { .. } => ErrorKind::Canceled,
			Error::Context { source, .. } => source.kind(),
		}
	}

	/// Returns `true` when every attempt timed out.
	pub fn is_timeout(&self) -> bool {
		self.kind() == ErrorKind::Timeout
	}

	/// Returns `true` when the caller cancelled or the caller deadline elapsed.
	pub fn is_canceled(&self) -> bool {
		self.kind() == ErrorKind::Canceled
	}

	/// Returns `true` when the requested entity does not exist.
	pub fn is_not_found(&self) -> bool {
		self.kind() == ErrorKind::NotFound
	}

	pub(crate) fn not_found(entity: &'static str, id: impl Display) -> Self {
		Self::NotFound { entity, id: id.to_string() }
	}
}

/// Flat error categories returned by [`Error::kind`].
///
/// | Kind        | Recovered locally                 |
/// |-------------|-----------------------------------|
/// | `Timeout`   | Yes, bounded retry (token source) |
/// | `Protocol`  | No                                |
/// | `Remote`    | No                                |
/// | `NotFound`  | No                                |
/// | `TaskChain` | No                                |
/// | `Canceled`  | No                                |
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
	/// Configuration problem.
	Config,
	/// Network-level failure.
	Transport,
	/// Contract violation by the remote side.
	Protocol,
	/// Structured remote error.
	Remote,
	/// Attempt budget exhausted on timeouts.
	Timeout,
	/// Semantic absence of an entity.
	NotFound,
	/// Terminal job failure.
	TaskChain,
	/// Caller-initiated abort.
	Canceled,
}

/// Configuration and validation failures.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// Endpoint URL cannot be parsed.
	#[error("The {endpoint} endpoint is not a valid URL.")]
	InvalidEndpoint {
		/// Which endpoint failed validation.
		endpoint: &'static str,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Endpoint must use HTTPS.
	#[error("The {endpoint} endpoint must use HTTPS: {url}.")]
	InsecureEndpoint {
		/// Which endpoint failed validation.
		endpoint: &'static str,
		/// Endpoint URL that failed validation.
		url: String,
	},
	/// Identifier validation failed.
	#[error(transparent)]
	InvalidIdentifier(#[from] IdentifierError),
	/// Required credential variable is absent from the environment.
	#[error("Environment variable `{name}` is not set.")]
	MissingEnvironment {
		/// Variable name.
		name: &'static str,
	},
	/// Credential file could not be read.
	#[error("Credential file `{path}` could not be read.")]
	CredentialFile {
		/// Path that failed.
		path: String,
		/// Underlying IO failure.
		#[source]
		source: std::io::Error,
	},
	/// Credential payload is malformed.
	#[error("Credential payload is malformed.")]
	CredentialParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
	},
	/// Request payload could not be serialized.
	#[error("Request payload could not be serialized.")]
	Serialize(#[source] serde_json::Error),
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Contract violations by the remote side; never retried.
#[derive(Debug, ThisError)]
pub enum ProtocolError {
	/// Response carried no body.
	#[error("{endpoint} returned an empty body (HTTP {status}).")]
	EmptyBody {
		/// Endpoint label.
		endpoint: &'static str,
		/// HTTP status code.
		status: u16,
	},
	/// Response `Content-Type` is not JSON.
	#[error("{endpoint} returned non-JSON content `{content_type}` (HTTP {status}): {snippet}")]
	UnexpectedContentType {
		/// Endpoint label.
		endpoint: &'static str,
		/// HTTP status code.
		status: u16,
		/// Received content type, or `<missing>`.
		content_type: String,
		/// Bounded preview of the body.
		snippet: String,
	},
	/// Body failed to parse as the expected shape.
	#[error("{endpoint} returned a malformed body (HTTP {status}): {snippet}")]
	MalformedBody {
		/// Endpoint label.
		endpoint: &'static str,
		/// HTTP status code.
		status: u16,
		/// Bounded preview of the body.
		snippet: String,
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
	},
	/// Body parsed but violates a semantic expectation.
	#[error("{endpoint} returned an invalid response: {reason}.")]
	InvalidResponse {
		/// Endpoint label.
		endpoint: &'static str,
		/// What was wrong.
		reason: String,
	},
}

/// Structured error payload returned by the remote service.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("{endpoint} rejected the request (HTTP {status}): {code}: {message}")]
pub struct RemoteError {
	/// Endpoint label.
	pub endpoint: &'static str,
	/// HTTP status code.
	pub status: u16,
	/// Remote error code.
	pub code: String,
	/// Human-readable message, capped to [`BODY_SNIPPET_LIMIT`] bytes.
	pub message: String,
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the remote endpoint.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying HTTP client gave up on its own timeout.
	#[error("HTTP client timed out while calling the remote endpoint.")]
	TimedOut,
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the remote endpoint.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		if e.is_timeout() { Self::TimedOut } else { Self::network(e) }
	}
}

/// Returns at most [`BODY_SNIPPET_LIMIT`] bytes of `body`, cut on a UTF-8 boundary.
pub fn body_snippet(body: &[u8]) -> String {
	let text = String::from_utf8_lossy(body);

	if text.len() <= BODY_SNIPPET_LIMIT {
		return text.into_owned();
	}

	let mut end = BODY_SNIPPET_LIMIT;

	while !text.is_char_boundary(end) {
		end -= 1;
	}

	format!("{}...", &text[..end])
}
