#![cfg(feature = "reqwest")]

// std
use std::sync::Arc;
// crates.io
use httpmock::prelude::*;
use parking_lot::Mutex;
use url::Url;
// self
use warehouse_iam::{
	creds::{NativeTokenKind, ResolvedCredentials, SdkSession},
	error::{AuthError, Error},
	http::{ReqwestHttpClient, RetryPolicy},
	plugin::{self, BrowserLauncher, ParamMap, PluginEnv},
};

const START_URL: &str = "https://portal.sso.us-west-2.amazonaws.com/start";
const VERIFICATION_URL: &str = "https://device.sso.us-west-2.amazonaws.com/?user_code=ABCD-EFGH";
const REGISTER_BODY: &str =
	r#"{"clientId":"client-1234","clientSecret":"secret-abcd","clientSecretExpiresAt":1764892800}"#;
// `interval` of one second keeps the real-time poll wait short.
const GRANT_BODY: &str = r#"{"deviceCode":"device-9876","userCode":"ABCD-EFGH","verificationUri":"https://device.sso.us-west-2.amazonaws.com/","verificationUriComplete":"https://device.sso.us-west-2.amazonaws.com/?user_code=ABCD-EFGH","expiresIn":600,"interval":1}"#;
const TOKEN_BODY: &str =
	r#"{"accessToken":"idc-access-token","tokenType":"Bearer","expiresIn":3600}"#;

struct PortalBrowser {
	opened: Mutex<Vec<Url>>,
}
impl PortalBrowser {
	fn arc() -> Arc<Self> {
		Arc::new(Self { opened: Mutex::default() })
	}

	fn opened(&self) -> Vec<Url> {
		self.opened.lock().clone()
	}
}
impl BrowserLauncher for PortalBrowser {
	fn open(&self, url: &Url) -> Result<(), AuthError> {
		self.opened.lock().push(url.clone());

		Ok(())
	}
}

fn portal_env(server: &MockServer, browser: Arc<PortalBrowser>) -> PluginEnv {
	let endpoint = Url::parse(&server.url("/")).expect("The mock endpoint should parse.");

	PluginEnv::new(Arc::new(ReqwestHttpClient::default()), browser)
		.with_retry(RetryPolicy::no_retry())
		.with_session(SdkSession::new().with_endpoint(endpoint))
}

fn device_params() -> ParamMap {
	ParamMap::new().set("start_url", START_URL).set("idc_region", "us-west-2")
}

#[tokio::test]
async fn device_grant_produces_a_native_token() {
	let server = MockServer::start_async().await;
	let register_mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/client/register").header("content-type", "application/json");
			then.status(200).header("content-type", "application/json").body(REGISTER_BODY);
		})
		.await;
	let device_mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/device_authorization");
			then.status(200).header("content-type", "application/json").body(GRANT_BODY);
		})
		.await;
	let token_mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(200).header("content-type", "application/json").body(TOKEN_BODY);
		})
		.await;
	let browser = PortalBrowser::arc();
	let env = portal_env(&server, browser.clone());
	let plugin = plugin::resolve("browser_identity_center", &device_params(), &env)
		.expect("The browser_identity_center identifier should resolve.");
	let resolved = plugin
		.fetch_credentials()
		.await
		.expect("The device grant should produce a token.");
	let ResolvedCredentials::Native(holder) = resolved else {
		panic!("A native-token holder should be produced.");
	};

	assert_eq!(holder.token.expose(), "idc-access-token");
	assert_eq!(holder.kind, NativeTokenKind::AccessToken);
	assert!(holder.expiration.is_some());
	assert_eq!(
		browser.opened().iter().map(Url::as_str).collect::<Vec<_>>(),
		[VERIFICATION_URL],
	);

	register_mock.assert_async().await;
	device_mock.assert_async().await;
	token_mock.assert_async().await;
}

#[tokio::test]
async fn denied_grants_surface_as_device_denial() {
	let server = MockServer::start_async().await;
	let _register_mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/client/register");
			then.status(200).header("content-type", "application/json").body(REGISTER_BODY);
		})
		.await;
	let _device_mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/device_authorization");
			then.status(200).header("content-type", "application/json").body(GRANT_BODY);
		})
		.await;
	let token_mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(400)
				.header("content-type", "application/json")
				.body(r#"{"error":"access_denied","error_description":"Denied by the operator."}"#);
		})
		.await;
	let env = portal_env(&server, PortalBrowser::arc());
	let plugin = plugin::resolve("browser_identity_center", &device_params(), &env)
		.expect("The browser_identity_center identifier should resolve.");
	let error = plugin
		.fetch_credentials()
		.await
		.expect_err("The denied grant should surface.");

	assert!(matches!(
		error,
		Error::Auth(AuthError::DeviceDenied { ref reason })
			if reason == "access_denied: Denied by the operator."
	));

	token_mock.assert_async().await;
}
