//! Credential environments and the token-endpoint request bodies they produce.
//!
//! [`CredentialEnvironment`] is an explicit value handed to the token source. Only the
//! [`CredentialEnvironment::Ambient`] strategy consults process-wide state, and the token source
//! resolves it exclusively while holding its acquisition lock.

// std
use std::path::Path;
// self
use crate::{_prelude::*, auth::TokenSecret, error::ConfigError, http};

/// Variable naming a service account JSON file.
pub const ENV_SERVICE_ACCOUNT_FILE: &str = "POLARIS_SERVICEACCOUNT_FILE";
/// Variable carrying the service account client id.
pub const ENV_CLIENT_ID: &str = "POLARIS_SERVICEACCOUNT_CLIENTID";
/// Variable carrying the service account client secret.
pub const ENV_CLIENT_SECRET: &str = "POLARIS_SERVICEACCOUNT_CLIENTSECRET";
/// Variable carrying the service account name.
pub const ENV_NAME: &str = "POLARIS_SERVICEACCOUNT_NAME";
/// Variable carrying the service account token endpoint.
pub const ENV_ACCESS_TOKEN_URI: &str = "POLARIS_SERVICEACCOUNT_ACCESSTOKENURI";

/// Service account credentials as downloaded from the control plane.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAccount {
	/// OAuth-style client identifier.
	pub client_id: String,
	/// Client secret; redacted in formatters.
	pub client_secret: TokenSecret,
	/// Service account display name.
	pub name: String,
	/// Token endpoint.
	pub access_token_uri: Url,
}
impl ServiceAccount {
	/// Creates service account credentials.
	pub fn new(
		client_id: impl Into<String>,
		client_secret: impl Into<String>,
		name: impl Into<String>,
		access_token_uri: Url,
	) -> Self {
		Self {
			client_id: client_id.into(),
			client_secret: TokenSecret::new(client_secret),
			name: name.into(),
			access_token_uri,
		}
	}

	/// Parses the JSON credential file format.
	pub fn from_json(bytes: &[u8]) -> Result<Self, ConfigError> {
		let de = &mut serde_json::Deserializer::from_slice(bytes);

		serde_path_to_error::deserialize(de)
			.map_err(|source| ConfigError::CredentialParse { source })
	}

	/// Reads and parses a JSON credential file.
	pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let bytes = std::fs::read(path).map_err(|source| ConfigError::CredentialFile {
			path: path.display().to_string(),
			source,
		})?;

		Self::from_json(&bytes)
	}
}
impl Debug for ServiceAccount {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ServiceAccount")
			.field("client_id", &self.client_id)
			.field("client_secret", &self.client_secret)
			.field("name", &self.name)
			.field("access_token_uri", &self.access_token_uri.as_str())
			.finish()
	}
}

/// Local (username/password) user credentials.
#[derive(Clone)]
pub struct LocalUser {
	/// Account base URL, e.g. `https://acme.example.com/`.
	pub account_url: Url,
	/// Login name.
	pub username: String,
	/// Password; redacted in formatters.
	pub password: TokenSecret,
}
impl LocalUser {
	/// Creates local user credentials.
	pub fn new(account_url: Url, username: impl Into<String>, password: impl Into<String>) -> Self {
		Self { account_url, username: username.into(), password: TokenSecret::new(password) }
	}
}
impl Debug for LocalUser {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("LocalUser")
			.field("account_url", &self.account_url.as_str())
			.field("username", &self.username)
			.field("password", &self.password)
			.finish()
	}
}

/// Strategy used to obtain credentials for token acquisition.
#[derive(Clone, Debug)]
pub enum CredentialEnvironment {
	/// Explicit service account.
	ServiceAccount(ServiceAccount),
	/// Explicit local user.
	LocalUser(LocalUser),
	/// Service account described by `POLARIS_SERVICEACCOUNT_*` process variables, resolved on
	/// every token fetch.
	///
	/// When `POLARIS_SERVICEACCOUNT_FILE` is set, the file is read with blocking I/O while the
	/// token source holds its acquisition lock. Callers on latency-sensitive executors should
	/// prefer [`ServiceAccount::from_file`] once at startup with the explicit variant.
	Ambient,
}
impl CredentialEnvironment {
	/// Resolves the token endpoint and request body, reading process variables for
	/// [`CredentialEnvironment::Ambient`].
	pub fn resolve(&self) -> Result<TokenGrant, ConfigError> {
		self.resolve_with(|name| std::env::var(name).ok())
	}

	/// Resolves the token endpoint and request body using `lookup` for ambient variables.
	pub fn resolve_with<F>(&self, lookup: F) -> Result<TokenGrant, ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		match self {
			Self::ServiceAccount(account) => TokenGrant::service_account(account),
			Self::LocalUser(user) => TokenGrant::local_user(user),
			Self::Ambient => TokenGrant::service_account(&ambient_service_account(lookup)?),
		}
	}
}

/// Token endpoint request produced by a resolved [`CredentialEnvironment`].
#[derive(Clone)]
pub struct TokenGrant {
	/// Token endpoint.
	pub token_url: Url,
	/// Serialized JSON body.
	pub body: Vec<u8>,
	/// Non-secret label for diagnostics (client id or username).
	pub principal: String,
}
impl TokenGrant {
	fn service_account(account: &ServiceAccount) -> Result<Self, ConfigError> {
		#[derive(Serialize)]
		struct Body<'a> {
			client_id: &'a str,
			client_secret: &'a str,
			name: &'a str,
		}

		http::validate_endpoint("token", &account.access_token_uri)?;

		let body = serde_json::to_vec(&Body {
			client_id: &account.client_id,
			client_secret: account.client_secret.expose(),
			name: &account.name,
		})
		.map_err(ConfigError::Serialize)?;

		Ok(Self {
			token_url: account.access_token_uri.clone(),
			body,
			principal: account.client_id.clone(),
		})
	}

	fn local_user(user: &LocalUser) -> Result<Self, ConfigError> {
		#[derive(Serialize)]
		struct Body<'a> {
			username: &'a str,
			password: &'a str,
			domain_type: &'static str,
		}

		let token_url = user
			.account_url
			.join("/api/session")
			.map_err(|source| ConfigError::InvalidEndpoint { endpoint: "token", source })?;

		http::validate_endpoint("token", &token_url)?;

		let body = serde_json::to_vec(&Body {
			username: &user.username,
			password: user.password.expose(),
			domain_type: "localOrSSO",
		})
		.map_err(ConfigError::Serialize)?;

		Ok(Self { token_url, body, principal: user.username.clone() })
	}
}
impl Debug for TokenGrant {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenGrant")
			.field("token_url", &self.token_url.as_str())
			.field("principal", &self.principal)
			.field("body", &"<redacted>")
			.finish()
	}
}

fn ambient_service_account<F>(lookup: F) -> Result<ServiceAccount, ConfigError>
where
	F: Fn(&str) -> Option<String>,
{
	if let Some(path) = lookup(ENV_SERVICE_ACCOUNT_FILE) {
		return ServiceAccount::from_file(path);
	}

	let required = |name: &'static str| {
		lookup(name)
			.filter(|value| !value.is_empty())
			.ok_or(ConfigError::MissingEnvironment { name })
	};
	let raw_uri = required(ENV_ACCESS_TOKEN_URI)?;
	let access_token_uri = Url::parse(&raw_uri)
		.map_err(|source| ConfigError::InvalidEndpoint { endpoint: "token", source })?;

	Ok(ServiceAccount::new(
		required(ENV_CLIENT_ID)?,
		required(ENV_CLIENT_SECRET)?,
		required(ENV_NAME)?,
		access_token_uri,
	))
}
