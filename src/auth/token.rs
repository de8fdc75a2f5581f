//! Bearer token model: redacted raw value, opaque claims, and expiry.
//!
//! Claims are decoded from the JWT payload segment but never verified; signature trust is
//! delegated to the issuer and the TLS channel. A [`Token`] is immutable, so refreshing always
//! replaces the cached value wholesale.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde_json::{Map, Value};
// self
use crate::_prelude::*;

/// Errors produced while decoding a bearer token.
#[derive(Debug, ThisError)]
pub enum TokenDecodeError {
	/// Value does not have the `header.payload.signature` shape.
	#[error("Token is not a compact JWT.")]
	NotJwt,
	/// Payload segment is not base64url.
	#[error("Token payload is not valid base64url.")]
	Base64(#[from] base64::DecodeError),
	/// Payload segment is not a JSON object.
	#[error("Token payload is not a JSON object.")]
	Json(#[from] serde_json::Error),
	/// Neither the claims nor the response supplied an expiry.
	#[error("Token carries no expiry.")]
	MissingExpiry,
	/// Expiry cannot be represented.
	#[error("Token expiry is out of range.")]
	ExpiryOutOfRange,
}

/// Redacted token wrapper keeping the raw bearer value out of logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSecret(String);
impl TokenSecret {
	/// Wraps a raw token value.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Returns the raw token value. Callers must avoid logging this string.
	pub fn expose(&self) -> &str {
		&self.0
	}
}
impl Debug for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("TokenSecret(<redacted>)")
	}
}
impl Display for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("<redacted>")
	}
}

/// Opaque, unverified JWT claims.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenClaims(Map<String, Value>);
impl TokenClaims {
	/// Looks up a raw claim.
	pub fn get(&self, name: &str) -> Option<&Value> {
		self.0.get(name)
	}

	/// `sub` claim, when present.
	pub fn subject(&self) -> Option<&str> {
		self.get("sub").and_then(Value::as_str)
	}

	/// `exp` claim converted to an instant, when present and representable.
	pub fn expires_at(&self) -> Option<OffsetDateTime> {
		let exp = self.get("exp")?;
		let seconds = exp.as_i64().or_else(|| exp.as_f64().map(|value| value as i64))?;

		OffsetDateTime::from_unix_timestamp(seconds).ok()
	}

	fn decode(raw: &str) -> Result<Self, TokenDecodeError> {
		let mut segments = raw.split('.');
		let (Some(_header), Some(payload), Some(_signature), None) =
			(segments.next(), segments.next(), segments.next(), segments.next())
		else {
			return Err(TokenDecodeError::NotJwt);
		};
		let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('='))?;

		Ok(Self(serde_json::from_slice(&bytes)?))
	}
}

/// Cached bearer credential.
#[derive(Clone)]
pub struct Token {
	secret: TokenSecret,
	claims: TokenClaims,
	expires_at: OffsetDateTime,
}
impl Token {
	/// Decodes a compact JWT, taking the expiry from its `exp` claim or, failing that, from
	/// `fallback_expires_at`.
	pub fn from_jwt(
		raw: impl Into<String>,
		fallback_expires_at: Option<OffsetDateTime>,
	) -> Result<Self, TokenDecodeError> {
		let raw = raw.into();
		let claims = TokenClaims::decode(&raw)?;
		let expires_at = claims
			.expires_at()
			.or(fallback_expires_at)
			.ok_or(TokenDecodeError::MissingExpiry)?;

		Ok(Self { secret: TokenSecret::new(raw), claims, expires_at })
	}

	/// Raw bearer value.
	pub fn secret(&self) -> &TokenSecret {
		&self.secret
	}

	/// Decoded claims.
	pub fn claims(&self) -> &TokenClaims {
		&self.claims
	}

	/// Expiry instant.
	pub fn expires_at(&self) -> OffsetDateTime {
		self.expires_at
	}

	/// Returns `true` when the token stays valid for more than `skew` after `now`.
	pub fn is_fresh_at(&self, now: OffsetDateTime, skew: Duration) -> bool {
		self.expires_at - now > skew
	}

	/// Value for the `Authorization` header.
	pub fn authorization_value(&self) -> String {
		format!("Bearer {}", self.secret.expose())
	}
}
impl Debug for Token {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Token")
			.field("secret", &self.secret)
			.field("subject", &self.claims.subject())
			.field("expires_at", &self.expires_at)
			.finish()
	}
}
