//! Control-plane client core: cached bearer tokens with bounded retry, cancellable task chain
//! tracking, and deterministic reconciliation of per-feature cloud account snapshots.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod account;
pub mod auth;
pub mod client;
pub mod context;
pub mod error;
pub mod graphql;
pub mod http;
pub mod id;
pub mod obs;
pub mod task;
#[cfg(all(any(test, feature = "test"), feature = "reqwest"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// std
	use std::collections::VecDeque;
	// crates.io
	use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
	// self
	use crate::{
		auth::{CredentialEnvironment, ServiceAccount, TokenSource, TokenSourceConfig},
		error::TransportError,
		http::{HttpTransport, JsonRequest, ReqwestHttpClient, TransportFuture, TransportResponse},
	};

	/// Token source alias used by reqwest-backed integration tests.
	pub type ReqwestTestTokenSource = TokenSource<ReqwestHttpClient>;

	/// Builds a reqwest HTTP client that accepts the self-signed certificates produced by
	/// `httpmock` during tests.
	pub fn test_reqwest_http_client() -> ReqwestHttpClient {
		let client = ReqwestClient::builder()
			.danger_accept_invalid_certs(true)
			.danger_accept_invalid_hostnames(true)
			.build()
			.expect("Failed to build insecure Reqwest client for tests.");

		ReqwestHttpClient::with_client(client)
	}

	/// Service account credentials pointing at the provided token endpoint.
	pub fn test_service_account(token_url: &str) -> ServiceAccount {
		ServiceAccount::new(
			"client|test-client",
			"test-secret",
			"test-account",
			Url::parse(token_url).expect("Failed to parse test token endpoint URL."),
		)
	}

	/// Constructs a [`TokenSource`] for the provided token endpoint backed by the insecure
	/// reqwest transport used across integration tests.
	pub fn build_reqwest_test_token_source(
		token_url: &str,
		config: TokenSourceConfig,
	) -> Arc<ReqwestTestTokenSource> {
		let environment = CredentialEnvironment::ServiceAccount(test_service_account(token_url));

		Arc::new(TokenSource::with_http_client(environment, config, test_reqwest_http_client()))
	}

	/// Encodes an unsigned JWT carrying the provided expiry instant.
	pub fn unsigned_jwt(expires_at: OffsetDateTime) -> String {
		let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
		let payload = URL_SAFE_NO_PAD.encode(
			serde_json::json!({ "sub": "test-subject", "exp": expires_at.unix_timestamp() })
				.to_string(),
		);

		format!("{header}.{payload}.signature")
	}

	/// JSON success body as returned by the token endpoint.
	pub fn token_body(expires_at: OffsetDateTime) -> String {
		serde_json::json!({ "access_token": unsigned_jwt(expires_at) }).to_string()
	}

	/// One scripted outcome replayed by [`ScriptedHttpClient`].
	#[derive(Clone, Debug)]
	pub enum ScriptedOutcome {
		/// Never completes, forcing the per-attempt deadline to fire.
		Hang,
		/// Completes with the provided response after an optional delay.
		Respond {
			/// Simulated transit time.
			delay: std::time::Duration,
			/// Response handed back to the token source.
			response: TransportResponse,
		},
	}
	impl ScriptedOutcome {
		/// Immediate JSON response with the provided status and body.
		pub fn json(status: u16, body: impl Into<String>) -> Self {
			Self::Respond {
				delay: std::time::Duration::ZERO,
				response: TransportResponse {
					status,
					content_type: Some("application/json".into()),
					body: body.into().into_bytes(),
				},
			}
		}

		/// Immediate response with an arbitrary content type.
		pub fn raw(status: u16, content_type: Option<&str>, body: impl Into<Vec<u8>>) -> Self {
			Self::Respond {
				delay: std::time::Duration::ZERO,
				response: TransportResponse {
					status,
					content_type: content_type.map(Into::into),
					body: body.into(),
				},
			}
		}
	}

	/// Token transport replaying a fixed script of outcomes and counting calls.
	#[derive(Debug, Default)]
	pub struct ScriptedHttpClient {
		script: Mutex<VecDeque<ScriptedOutcome>>,
		calls: Mutex<Vec<serde_json::Value>>,
	}
	impl ScriptedHttpClient {
		/// Creates a transport that replays `outcomes` in order.
		pub fn new(outcomes: impl IntoIterator<Item = ScriptedOutcome>) -> Self {
			Self { script: Mutex::new(outcomes.into_iter().collect()), calls: Default::default() }
		}

		/// Number of requests dispatched so far.
		pub fn call_count(&self) -> usize {
			self.calls.lock().len()
		}

		/// Request bodies dispatched so far.
		pub fn recorded_bodies(&self) -> Vec<serde_json::Value> {
			self.calls.lock().clone()
		}
	}
	impl HttpTransport for ScriptedHttpClient {
		fn post_json<'a>(&'a self, request: JsonRequest<'a>) -> TransportFuture<'a> {
			let recorded =
				serde_json::from_slice(&request.body).unwrap_or(serde_json::Value::Null);

			self.calls.lock().push(recorded);

			let next = self.script.lock().pop_front();

			Box::pin(async move {
				match next {
					Some(ScriptedOutcome::Hang) => std::future::pending().await,
					Some(ScriptedOutcome::Respond { delay, response }) => {
						tokio::time::sleep(delay).await;

						Ok(response)
					},
					None => Err(TransportError::network(std::io::Error::other(
						"Scripted transport ran out of outcomes.",
					))),
				}
			})
		}
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, BTreeSet, HashMap},
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::Mutex;
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(all(test, feature = "reqwest"))] use httpmock as _;
