//! Managed identity-center plugins.
//!
//! [`IdcBrowserPlugin`] runs the OAuth device-authorization grant against the
//! identity-center OIDC service: register a public client, start a device grant, send
//! the user to the verification page and poll for the issued access token.
//! [`IdpTokenPlugin`] skips negotiation entirely and wraps a token the caller already
//! holds. Both produce [`NativeToken`] holders, which the control plane accepts in
//! place of signing keys.

// crates.io
use serde_json::{Value, json};
use tokio::time;
// self
use crate::{
	_prelude::*,
	cache::{CacheKey, qualifier_fingerprint},
	creds::{NativeToken, NativeTokenKind, ResolvedCredentials, SecretString},
	http::{self, AuthHttpClient, OutboundRequest, RawResponse, RetryPolicy, send_with_retry},
	obs::{self, FlowKind},
	plugin::{
		BrowserLauncher, IdpPlugin, PluginEnv, PluginFuture, PluginKind, browser,
		params::ParamMap,
	},
};

const REGISTER_ACTION: &str = "RegisterClient";
const START_ACTION: &str = "StartDeviceAuthorization";
const TOKEN_ACTION: &str = "CreateToken";
const DEVICE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";
const CLIENT_TYPE: &str = "public";
const CONNECT_SCOPE: &str = "redshift:connect";
/// Client display name registered when `idc_client_display_name` is not configured.
pub const DEFAULT_DISPLAY_NAME: &str = "warehouse-iam";
/// Poll cadence applied when the grant response does not carry an `interval`.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
/// Seconds added to the cadence on every `slow_down` response.
pub const SLOW_DOWN_STEP_SECS: u64 = 5;

/// Interactive device-authorization login against the managed identity center.
///
/// The grant never touches the loopback listener; the user finishes authorization on
/// the provider's own verification page while this plugin polls the token endpoint.
pub struct IdcBrowserPlugin {
	start_url: Url,
	idc_region: String,
	display_name: String,
	register_url: Url,
	device_url: Url,
	token_url: Url,
	window: Duration,
	browser: Arc<dyn BrowserLauncher>,
	http: Arc<dyn AuthHttpClient>,
	retry: RetryPolicy,
}
impl IdcBrowserPlugin {
	/// Validates `start_url`, `idc_region` and the optional display name and wait
	/// window, honoring the session's endpoint override when present.
	pub fn new(params: &ParamMap, env: &PluginEnv) -> Result<Self, ConfigError> {
		const PLUGIN: &str = "browser_identity_center";

		let start_url = params.require_https_url(PLUGIN, "start_url")?;
		let idc_region = params.require(PLUGIN, "idc_region")?.to_owned();
		let display_name =
			params.get("idc_client_display_name").unwrap_or(DEFAULT_DISPLAY_NAME).to_owned();
		let window = browser::response_window(PLUGIN, params)?;
		let endpoint = match &env.session.endpoint {
			Some(endpoint) => endpoint.clone(),
			None => oidc_endpoint(&idc_region)?,
		};

		Ok(Self {
			start_url,
			idc_region,
			display_name,
			register_url: join_endpoint(&endpoint, "client/register")?,
			device_url: join_endpoint(&endpoint, "device_authorization")?,
			token_url: join_endpoint(&endpoint, "token")?,
			window,
			browser: env.browser.clone(),
			http: env.http.clone(),
			retry: env.retry,
		})
	}

	async fn device_login(&self) -> Result<ResolvedCredentials> {
		let started = OffsetDateTime::now_utc();
		let registration = self.register_client().await?;
		let grant = self.start_device_authorization(&registration).await?;
		let verification =
			grant.verification_uri_complete.as_deref().unwrap_or(&grant.verification_uri);
		let verification = Url::parse(verification).map_err(|e| AuthError::MalformedResponse {
			action: START_ACTION,
			reason: format!("verification URI `{verification}` is invalid: {e}"),
		})?;

		self.browser.open(&verification)?;

		match time::timeout(
			self.window.unsigned_abs(),
			self.poll_for_token(&registration, &grant, started),
		)
		.await
		{
			Ok(result) => result,
			Err(_) => Err(Error::AuthTimeout { waited: self.window }),
		}
	}

	async fn register_client(&self) -> Result<ClientRegistration> {
		let body = json!({
			"clientName": self.display_name,
			"clientType": CLIENT_TYPE,
			"scopes": [CONNECT_SCOPE],
		});
		let response = self.post_json(REGISTER_ACTION, &self.register_url, &body).await?;

		if !response.is_success() {
			return Err(rejection(REGISTER_ACTION, &response));
		}

		Ok(http::decode_json(REGISTER_ACTION, &response.body)?)
	}

	async fn start_device_authorization(
		&self,
		registration: &ClientRegistration,
	) -> Result<DeviceGrant> {
		let body = json!({
			"clientId": registration.client_id,
			"clientSecret": registration.client_secret.expose(),
			"startUrl": self.start_url.as_str(),
		});
		let response = self.post_json(START_ACTION, &self.device_url, &body).await?;

		if !response.is_success() {
			return Err(rejection(START_ACTION, &response));
		}

		Ok(http::decode_json(START_ACTION, &response.body)?)
	}

	// Pacing follows the device-grant rules: wait `interval` between polls, stretch it
	// by [`SLOW_DOWN_STEP_SECS`] on `slow_down`, keep going through
	// `authorization_pending`.
	async fn poll_for_token(
		&self,
		registration: &ClientRegistration,
		grant: &DeviceGrant,
		started: OffsetDateTime,
	) -> Result<ResolvedCredentials> {
		let mut interval =
			Duration::seconds(grant.interval.unwrap_or(DEFAULT_POLL_INTERVAL_SECS) as _);

		loop {
			time::sleep(interval.unsigned_abs()).await;

			let body = json!({
				"clientId": registration.client_id,
				"clientSecret": registration.client_secret.expose(),
				"deviceCode": grant.device_code,
				"grantType": DEVICE_GRANT_TYPE,
			});
			let response = self.post_json(TOKEN_ACTION, &self.token_url, &body).await?;

			if response.is_success() {
				let token =
					http::decode_json::<CreateTokenResponse>(TOKEN_ACTION, &response.body)?;
				let expiration = token
					.expires_in
					.map(|secs| OffsetDateTime::now_utc() + Duration::seconds(secs as _));

				return Ok(NativeToken::new(
					token.access_token,
					NativeTokenKind::AccessToken,
					expiration,
				)
				.into());
			}

			let failure = DeviceFailure::from_body(&response.body);

			match failure.error.as_str() {
				"authorization_pending" => {},
				"slow_down" => interval += Duration::seconds(SLOW_DOWN_STEP_SECS as _),
				// The device code lapsed before the user finished; the caller sees the
				// same timeout kind as an elapsed window.
				"expired_token" =>
					return Err(Error::AuthTimeout {
						waited: OffsetDateTime::now_utc() - started,
					}),
				"access_denied" =>
					return Err(AuthError::DeviceDenied { reason: failure.reason() }.into()),
				_ => return Err(rejection(TOKEN_ACTION, &response)),
			}
		}
	}

	async fn post_json(
		&self,
		action: &'static str,
		url: &Url,
		body: &Value,
	) -> Result<RawResponse, TransportError> {
		let body = body.to_string();

		send_with_retry(self.http.as_ref(), self.retry, OutboundRequest {
			context: action,
			url,
			content_type: http::JSON,
			headers: &[],
			body: body.as_bytes(),
		})
		.await
	}
}
impl IdpPlugin for IdcBrowserPlugin {
	fn kind(&self) -> PluginKind {
		PluginKind::BrowserIdentityCenter
	}

	fn cache_key(&self) -> CacheKey {
		CacheKey::new(
			PluginKind::BrowserIdentityCenter,
			format!("{}/{}", self.idc_region, self.start_url),
		)
	}

	fn fetch_credentials(&self) -> PluginFuture<'_, ResolvedCredentials> {
		Box::pin(obs::observe_flow(
			FlowKind::DeviceLogin,
			PluginKind::BrowserIdentityCenter.as_str(),
			self.device_login(),
		))
	}
}
impl Debug for IdcBrowserPlugin {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("IdcBrowserPlugin")
			.field("start_url", &self.start_url.as_str())
			.field("idc_region", &self.idc_region)
			.field("display_name", &self.display_name)
			.field("window", &self.window)
			.finish()
	}
}

/// Passthrough for a managed-identity token the caller already obtained.
pub struct IdpTokenPlugin {
	token: SecretString,
	kind: NativeTokenKind,
}
impl IdpTokenPlugin {
	/// Validates `token` and `token_type`.
	pub fn new(params: &ParamMap) -> Result<Self, ConfigError> {
		const PLUGIN: &str = "idp_token";

		let token = params.require(PLUGIN, "token")?.to_owned();
		let kind = match params.require(PLUGIN, "token_type")? {
			"ACCESS_TOKEN" => NativeTokenKind::AccessToken,
			"EXT_JWT" => NativeTokenKind::ExtJwt,
			other =>
				return Err(ConfigError::invalid_parameter(
					PLUGIN,
					"token_type",
					format!("`{other}` is not `ACCESS_TOKEN` or `EXT_JWT`"),
				)),
		};

		Ok(Self { token: token.into(), kind })
	}
}
impl IdpPlugin for IdpTokenPlugin {
	fn kind(&self) -> PluginKind {
		PluginKind::IdpToken
	}

	// The raw token never lands in the key; its fingerprint does.
	fn cache_key(&self) -> CacheKey {
		let material = format!("{}\n{}", self.kind.as_str(), self.token.expose());

		CacheKey::new(PluginKind::IdpToken, qualifier_fingerprint(&material))
	}

	fn fetch_credentials(&self) -> PluginFuture<'_, ResolvedCredentials> {
		Box::pin(async move { Ok(NativeToken::new(self.token.clone(), self.kind, None).into()) })
	}
}
impl Debug for IdpTokenPlugin {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("IdpTokenPlugin").field("kind", &self.kind).finish()
	}
}

fn oidc_endpoint(region: &str) -> Result<Url, ConfigError> {
	let url = format!("https://oidc.{region}.amazonaws.com/");

	Url::parse(&url).map_err(|e| ConfigError::InvalidEndpoint { url, reason: e.to_string() })
}

fn join_endpoint(endpoint: &Url, path: &str) -> Result<Url, ConfigError> {
	endpoint.join(path).map_err(|e| ConfigError::InvalidEndpoint {
		url: format!("{endpoint}{path}"),
		reason: e.to_string(),
	})
}

fn rejection(action: &'static str, response: &RawResponse) -> Error {
	let failure = DeviceFailure::from_body(&response.body);
	let reason = if failure.error.is_empty() {
		format!("HTTP {}: {}", response.status, response.body_preview())
	} else {
		failure.reason()
	};

	AuthError::ProviderRejected { reason, status: Some(response.status) }.into()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClientRegistration {
	client_id: String,
	client_secret: SecretString,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceGrant {
	device_code: String,
	verification_uri: String,
	#[serde(default)]
	verification_uri_complete: Option<String>,
	/// Poll cadence in seconds; absent from some providers.
	#[serde(default)]
	interval: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateTokenResponse {
	access_token: String,
	#[serde(default)]
	expires_in: Option<u64>,
}

/// Error envelope used by every endpoint of the OIDC service.
#[derive(Default, Deserialize)]
struct DeviceFailure {
	#[serde(default)]
	error: String,
	#[serde(default)]
	error_description: Option<String>,
}
impl DeviceFailure {
	fn from_body(body: &[u8]) -> Self {
		serde_json::from_slice(body).unwrap_or_default()
	}

	fn reason(&self) -> String {
		match &self.error_description {
			Some(description) => format!("{}: {description}", self.error),
			None => self.error.clone(),
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{_preludet::*, creds::SdkSession};

	const REGISTER_BODY: &str = r#"{"clientId":"client-1234","clientSecret":"secret-abcd","clientSecretExpiresAt":1764892800}"#;
	const GRANT_BODY: &str = r#"{"deviceCode":"device-9876","userCode":"ABCD-EFGH","verificationUri":"https://device.sso.us-west-2.amazonaws.com/","verificationUriComplete":"https://device.sso.us-west-2.amazonaws.com/?user_code=ABCD-EFGH","expiresIn":600,"interval":1}"#;
	const PENDING_BODY: &str =
		r#"{"error":"authorization_pending","error_description":"Authorization is pending."}"#;
	const TOKEN_BODY: &str =
		r#"{"accessToken":"idc-access-token","tokenType":"Bearer","expiresIn":3600}"#;

	fn device_params() -> ParamMap {
		ParamMap::new()
			.set("start_url", "https://portal.sso.us-west-2.amazonaws.com/start")
			.set("idc_region", "us-west-2")
	}

	#[tokio::test(start_paused = true)]
	async fn device_grant_polls_until_the_token_arrives() {
		let client = RecordingClient::arc([
			json_ok(REGISTER_BODY),
			json_ok(GRANT_BODY),
			status_body(400, PENDING_BODY),
			json_ok(TOKEN_BODY),
		]);
		let browser = RecordingBrowser::arc();
		let env = PluginEnv::new(client.clone(), browser.clone())
			.with_retry(RetryPolicy::no_retry());
		let plugin =
			IdcBrowserPlugin::new(&device_params(), &env).expect("Params should validate.");
		let resolved =
			plugin.fetch_credentials().await.expect("The grant should produce a token.");
		let ResolvedCredentials::Native(holder) = resolved else {
			panic!("A native-token holder should be produced.");
		};

		assert_eq!(holder.token.expose(), "idc-access-token");
		assert_eq!(holder.kind, NativeTokenKind::AccessToken);
		assert!(holder.expiration.is_some());
		assert_eq!(
			browser.opened().iter().map(Url::as_str).collect::<Vec<_>>(),
			["https://device.sso.us-west-2.amazonaws.com/?user_code=ABCD-EFGH"],
		);

		let requests = client.requests();

		assert_eq!(
			requests.iter().map(|request| request.url.as_str()).collect::<Vec<_>>(),
			[
				"https://oidc.us-west-2.amazonaws.com/client/register",
				"https://oidc.us-west-2.amazonaws.com/device_authorization",
				"https://oidc.us-west-2.amazonaws.com/token",
				"https://oidc.us-west-2.amazonaws.com/token",
			],
		);
		assert_eq!(requests[0].content_type, http::JSON);
		assert_eq!(
			serde_json::from_str::<Value>(&requests[0].body).expect("Body should be JSON."),
			serde_json::json!({
				"clientName": DEFAULT_DISPLAY_NAME,
				"clientType": "public",
				"scopes": ["redshift:connect"],
			}),
		);
		assert_eq!(
			serde_json::from_str::<Value>(&requests[3].body).expect("Body should be JSON."),
			serde_json::json!({
				"clientId": "client-1234",
				"clientSecret": "secret-abcd",
				"deviceCode": "device-9876",
				"grantType": DEVICE_GRANT_TYPE,
			}),
		);
	}

	#[tokio::test(start_paused = true)]
	async fn slow_down_stretches_the_poll_cadence() {
		let client = RecordingClient::arc([
			json_ok(REGISTER_BODY),
			json_ok(GRANT_BODY),
			status_body(400, r#"{"error":"slow_down"}"#),
			status_body(400, PENDING_BODY),
			json_ok(TOKEN_BODY),
		]);
		let env = PluginEnv::new(client, RecordingBrowser::arc())
			.with_retry(RetryPolicy::no_retry());
		let plugin =
			IdcBrowserPlugin::new(&device_params(), &env).expect("Params should validate.");
		let started = time::Instant::now();

		plugin.fetch_credentials().await.expect("The grant should produce a token.");

		// One second before the first poll, then six before each of the remaining two.
		assert_eq!(started.elapsed().as_secs(), 13);
	}

	#[tokio::test(start_paused = true)]
	async fn expired_device_codes_surface_as_timeouts() {
		let client = RecordingClient::arc([
			json_ok(REGISTER_BODY),
			json_ok(GRANT_BODY),
			status_body(400, r#"{"error":"expired_token"}"#),
		]);
		let env = PluginEnv::new(client, RecordingBrowser::arc())
			.with_retry(RetryPolicy::no_retry());
		let plugin =
			IdcBrowserPlugin::new(&device_params(), &env).expect("Params should validate.");
		let error =
			plugin.fetch_credentials().await.expect_err("An expired code should fail.");

		assert!(matches!(error, Error::AuthTimeout { .. }));
	}

	#[tokio::test(start_paused = true)]
	async fn denied_grants_map_to_device_denial() {
		let client = RecordingClient::arc([
			json_ok(REGISTER_BODY),
			json_ok(GRANT_BODY),
			status_body(400, r#"{"error":"access_denied","error_description":"Denied by the user."}"#),
		]);
		let env = PluginEnv::new(client, RecordingBrowser::arc())
			.with_retry(RetryPolicy::no_retry());
		let plugin =
			IdcBrowserPlugin::new(&device_params(), &env).expect("Params should validate.");
		let error = plugin.fetch_credentials().await.expect_err("A denial should fail.");

		assert!(matches!(
			error,
			Error::Auth(AuthError::DeviceDenied { ref reason })
				if reason == "access_denied: Denied by the user."
		));
	}

	#[tokio::test(start_paused = true)]
	async fn the_window_bounds_the_wait() {
		let grant = r#"{"deviceCode":"device-9876","userCode":"ABCD-EFGH","verificationUri":"https://device.sso.us-west-2.amazonaws.com/","interval":3600}"#;
		let client = RecordingClient::arc([json_ok(REGISTER_BODY), json_ok(grant)]);
		let env = PluginEnv::new(client, RecordingBrowser::arc())
			.with_retry(RetryPolicy::no_retry());
		let params = device_params().set("idp_response_timeout", "10");
		let plugin = IdcBrowserPlugin::new(&params, &env).expect("Params should validate.");
		let error =
			plugin.fetch_credentials().await.expect_err("The window should elapse first.");

		assert!(matches!(
			error,
			Error::AuthTimeout { waited } if waited == Duration::seconds(10)
		));
	}

	#[tokio::test]
	async fn registration_rejections_carry_the_provider_code() {
		let client = RecordingClient::arc([status_body(
			400,
			r#"{"error":"invalid_client","error_description":"Unknown client."}"#,
		)]);
		let env = PluginEnv::new(client, RecordingBrowser::arc())
			.with_retry(RetryPolicy::no_retry());
		let plugin =
			IdcBrowserPlugin::new(&device_params(), &env).expect("Params should validate.");
		let error =
			plugin.fetch_credentials().await.expect_err("Registration should fail.");

		assert!(matches!(
			error,
			Error::Auth(AuthError::ProviderRejected { ref reason, status: Some(400) })
				if reason == "invalid_client: Unknown client."
		));
	}

	#[test]
	fn the_session_endpoint_override_redirects_the_service() {
		let env = offline_env().with_session(
			SdkSession::new().with_endpoint(test_url("idc/")),
		);
		let plugin =
			IdcBrowserPlugin::new(&device_params(), &env).expect("Params should validate.");

		assert_eq!(plugin.register_url, test_url("idc/client/register"));
		assert_eq!(plugin.token_url, test_url("idc/token"));
	}

	#[tokio::test]
	async fn token_passthrough_yields_the_native_holder() {
		let params = ParamMap::new().set("token", "caller-jwt").set("token_type", "EXT_JWT");
		let plugin = IdpTokenPlugin::new(&params).expect("Params should validate.");
		let resolved =
			plugin.fetch_credentials().await.expect("Passthrough should never fail.");
		let ResolvedCredentials::Native(holder) = resolved else {
			panic!("A native-token holder should be produced.");
		};

		assert_eq!(holder.token.expose(), "caller-jwt");
		assert_eq!(holder.kind, NativeTokenKind::ExtJwt);
		assert_eq!(holder.expiration, None);
	}

	#[test]
	fn unknown_token_types_are_rejected() {
		let params = ParamMap::new().set("token", "caller-jwt").set("token_type", "BEARER");
		let error = IdpTokenPlugin::new(&params).expect_err("The type should be rejected.");

		assert!(matches!(
			error,
			ConfigError::InvalidParameter { plugin: "idp_token", name: "token_type", .. }
		));
	}

	#[test]
	fn passthrough_cache_keys_fingerprint_the_token() {
		let build = |token: &str, token_type: &str| {
			IdpTokenPlugin::new(
				&ParamMap::new().set("token", token).set("token_type", token_type),
			)
			.expect("Params should validate.")
			.cache_key()
		};
		let key = build("caller-jwt", "EXT_JWT");

		assert_eq!(key.kind, PluginKind::IdpToken);
		assert!(!key.qualifier.contains("caller-jwt"));
		assert_ne!(key.qualifier, build("other-jwt", "EXT_JWT").qualifier);
		assert_ne!(key.qualifier, build("caller-jwt", "ACCESS_TOKEN").qualifier);
	}
}
