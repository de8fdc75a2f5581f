// std
use std::time::Duration as StdDuration;
// crates.io
use httpmock::prelude::*;
// self
use polaris_sdk::{
	_preludet::*,
	auth::{CredentialEnvironment, LocalUser, TokenSource, TokenSourceConfig},
	context::Context,
	error::{ProtocolError, RemoteError},
	http::ReqwestHttpClient,
};

const TOKEN_PATH: &str = "/api/client_token";

#[tokio::test]
async fn token_is_fetched_once_and_cached() {
	let server = MockServer::start_async().await;
	let expires_at = OffsetDateTime::now_utc() + Duration::hours(1);
	let mock = server
		.mock_async(|when, then| {
			when.method(POST)
				.path(TOKEN_PATH)
				.header("content-type", "application/json")
				.header("accept", "application/json")
				.body_includes("\"client_id\":\"client|test-client\"")
				.body_includes("\"name\":\"test-account\"");
			then.status(200)
				.header("content-type", "application/json")
				.body(token_body(expires_at));
		})
		.await;
	let source =
		build_reqwest_test_token_source(&server.url(TOKEN_PATH), TokenSourceConfig::default());
	let ctx = Context::background();
	let first = source.acquire(&ctx).await.expect("Initial acquisition should succeed.");
	let second = source.acquire(&ctx).await.expect("Cached acquisition should succeed.");

	assert_eq!(first.secret(), second.secret());
	assert_eq!(first.expires_at().unix_timestamp(), expires_at.unix_timestamp());
	assert_eq!(first.claims().subject(), Some("test-subject"));

	mock.assert_calls_async(1).await;
}

#[tokio::test]
async fn error_body_is_fatal_and_not_retried() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path(TOKEN_PATH);
			then.status(401)
				.header("content-type", "application/json")
				.body("{\"error\":\"invalid_client\",\"error_description\":\"unknown client\"}");
		})
		.await;
	let source =
		build_reqwest_test_token_source(&server.url(TOKEN_PATH), TokenSourceConfig::default());
	let err = source
		.acquire(&Context::background())
		.await
		.expect_err("Rejected credentials should surface.");

	match err {
		Error::Remote(RemoteError { status, code, message, .. }) => {
			assert_eq!(status, 401);
			assert_eq!(code, "invalid_client");
			assert_eq!(message, "unknown client");
		},
		other => panic!("Unexpected error: {other:?}."),
	}

	mock.assert_calls_async(1).await;
}

#[tokio::test]
async fn non_json_response_is_protocol_error() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path(TOKEN_PATH);
			then.status(502).header("content-type", "text/html").body("<html>Bad Gateway</html>");
		})
		.await;
	let source =
		build_reqwest_test_token_source(&server.url(TOKEN_PATH), TokenSourceConfig::default());
	let err = source
		.acquire(&Context::background())
		.await
		.expect_err("HTML responses should be rejected.");

	assert!(matches!(
		err,
		Error::Protocol(ProtocolError::UnexpectedContentType { status: 502, .. })
	));

	mock.assert_calls_async(1).await;
}

#[tokio::test]
async fn slow_endpoint_exhausts_attempt_budget() {
	let server = MockServer::start_async().await;
	let expires_at = OffsetDateTime::now_utc() + Duration::hours(1);

	server
		.mock_async(|when, then| {
			when.method(POST).path(TOKEN_PATH);
			then.status(200)
				.header("content-type", "application/json")
				.body(token_body(expires_at))
				.delay(StdDuration::from_secs(5));
		})
		.await;

	let config = TokenSourceConfig::default()
		.with_attempt_timeout(StdDuration::from_millis(200))
		.with_max_attempts(2);
	let source = build_reqwest_test_token_source(&server.url(TOKEN_PATH), config);
	let err = source
		.acquire(&Context::background())
		.await
		.expect_err("Every attempt should time out.");

	assert!(err.is_timeout());
	assert!(matches!(err, Error::Timeout { attempts: 2, .. }));
	assert_eq!(source.metrics().network_attempts(), 2);
}

#[tokio::test]
async fn local_user_posts_session_credentials() {
	let server = MockServer::start_async().await;
	let expires_at = OffsetDateTime::now_utc() + Duration::hours(1);
	let mock = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/api/session")
				.body_includes("\"username\":\"admin\"")
				.body_includes("\"domain_type\":\"localOrSSO\"");
			then.status(200)
				.header("content-type", "application/json; charset=utf-8")
				.body(token_body(expires_at));
		})
		.await;
	let user = LocalUser::new(
		Url::parse(&server.base_url()).expect("Mock base URL should parse."),
		"admin",
		"hunter2",
	);
	let source: TokenSource<ReqwestHttpClient> = TokenSource::with_http_client(
		CredentialEnvironment::LocalUser(user),
		TokenSourceConfig::default(),
		test_reqwest_http_client(),
	);
	let token = source
		.acquire(&Context::background())
		.await
		.expect("Local user acquisition should succeed.");

	assert!(token.authorization_value().starts_with("Bearer "));

	mock.assert_calls_async(1).await;
}
