//! JWT-exchange plugins: a tenant-issued or caller-supplied token traded for
//! temporary credentials via the web-identity grant.

// self
use crate::{
	_prelude::*,
	cache::{CacheKey, qualifier_fingerprint},
	creds::{ResolvedCredentials, SecretString},
	http::{self, AuthHttpClient, OutboundRequest, RetryPolicy, send_with_retry},
	obs::{self, FlowKind},
	plugin::{IdpPlugin, PluginEnv, PluginFuture, PluginKind, params::ParamMap, saml::AZURE_AUTHORITY},
	sts::{StsClient, WebIdentityAssumeRequest},
};

const DEFAULT_SESSION_NAME: &str = "warehouse-iam";

/// Pieces both JWT plugins share: the role-assumption client and the target role.
#[derive(Debug)]
struct JwtExchange {
	sts: StsClient,
	role_arn: String,
	session_name: String,
	duration_seconds: Option<u64>,
}
impl JwtExchange {
	fn from_params(
		plugin: &'static str,
		params: &ParamMap,
		env: &PluginEnv,
	) -> Result<Self, ConfigError> {
		let role_arn = params.require(plugin, "role_arn")?.to_owned();
		let session_name =
			params.get("role_session_name").unwrap_or(DEFAULT_SESSION_NAME).to_owned();
		let duration_seconds = params.get_u64(plugin, "duration_seconds")?;
		let region = env.region_for(params);
		let sts = StsClient::new(env, &region)?;

		Ok(Self { sts, role_arn, session_name, duration_seconds })
	}

	async fn assume(&self, token: &str) -> Result<ResolvedCredentials> {
		let credentials = self
			.sts
			.assume_role_with_web_identity(WebIdentityAssumeRequest {
				token,
				role_arn: &self.role_arn,
				session_name: &self.session_name,
				duration_seconds: self.duration_seconds,
			})
			.await?;

		Ok(credentials.into())
	}
}

/// Non-interactive client-credentials grant against an Azure AD tenant; the returned
/// JWT is exchanged for temporary credentials.
pub struct AzureJwtPlugin {
	tenant: String,
	client_id: String,
	client_secret: SecretString,
	scope: String,
	token_endpoint: Url,
	exchange: JwtExchange,
	http: Arc<dyn AuthHttpClient>,
	retry: RetryPolicy,
}
impl AzureJwtPlugin {
	/// Validates `idp_tenant`, `client_id`, `client_secret`, and `role_arn`.
	pub fn new(params: &ParamMap, env: &PluginEnv) -> Result<Self, ConfigError> {
		const PLUGIN: &str = "azure_jwt";

		let tenant = params.require(PLUGIN, "idp_tenant")?.to_owned();
		let client_id = params.require(PLUGIN, "client_id")?.to_owned();
		let client_secret = SecretString::from(params.require(PLUGIN, "client_secret")?);
		let scope = params.get("scope").unwrap_or("openid").to_owned();
		let token_endpoint = azure_v2_token_endpoint(&tenant)?;

		Ok(Self {
			tenant,
			client_id,
			client_secret,
			scope,
			token_endpoint,
			exchange: JwtExchange::from_params(PLUGIN, params, env)?,
			http: env.http.clone(),
			retry: env.retry,
		})
	}

	async fn acquire_and_assume(&self) -> Result<ResolvedCredentials> {
		const ACTION: &str = "AzureClientCredentials";

		let mut form = BTreeMap::new();

		form.insert("grant_type", "client_credentials".to_owned());
		form.insert("client_id", self.client_id.clone());
		form.insert("client_secret", self.client_secret.expose().to_owned());
		form.insert("scope", self.scope.clone());

		let body = http::encode_form(&form);
		let headers = [("accept", http::JSON.to_owned())];
		let response = send_with_retry(self.http.as_ref(), self.retry, OutboundRequest {
			context: ACTION,
			url: &self.token_endpoint,
			content_type: http::FORM_URLENCODED,
			headers: &headers,
			body: body.as_bytes(),
		})
		.await?;

		if !response.is_success() {
			return Err(AuthError::ProviderRejected {
				reason: response.body_preview(),
				status: Some(response.status),
			}
			.into());
		}

		let token = http::decode_json::<AzureTokenResponse>(ACTION, &response.body)?;

		self.exchange.assume(&token.access_token).await
	}
}
impl IdpPlugin for AzureJwtPlugin {
	fn kind(&self) -> PluginKind {
		PluginKind::AzureJwt
	}

	fn cache_key(&self) -> CacheKey {
		CacheKey::new(
			PluginKind::AzureJwt,
			format!("{}/{}/{}", self.tenant, self.client_id, self.exchange.role_arn),
		)
	}

	fn fetch_credentials(&self) -> PluginFuture<'_, ResolvedCredentials> {
		Box::pin(obs::observe_flow(
			FlowKind::JwtExchange,
			"azure_jwt",
			self.acquire_and_assume(),
		))
	}
}
impl Debug for AzureJwtPlugin {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AzureJwtPlugin")
			.field("tenant", &self.tenant)
			.field("client_id", &self.client_id)
			.field("scope", &self.scope)
			.field("exchange", &self.exchange)
			.finish()
	}
}

/// Caller-supplied web-identity token; assumption is the whole flow.
#[derive(Debug)]
pub struct JwtPlugin {
	token: SecretString,
	exchange: JwtExchange,
}
impl JwtPlugin {
	/// Validates `web_identity_token` and `role_arn`.
	pub fn new(params: &ParamMap, env: &PluginEnv) -> Result<Self, ConfigError> {
		const PLUGIN: &str = "jwt";

		let token = SecretString::from(params.require(PLUGIN, "web_identity_token")?);

		Ok(Self { token, exchange: JwtExchange::from_params(PLUGIN, params, env)? })
	}
}
impl IdpPlugin for JwtPlugin {
	fn kind(&self) -> PluginKind {
		PluginKind::Jwt
	}

	// The token itself never lands in the key; its fingerprint does.
	fn cache_key(&self) -> CacheKey {
		let material = format!("{}\n{}", self.exchange.role_arn, self.token.expose());

		CacheKey::new(PluginKind::Jwt, qualifier_fingerprint(&material))
	}

	fn fetch_credentials(&self) -> PluginFuture<'_, ResolvedCredentials> {
		Box::pin(self.exchange.assume(self.token.expose()))
	}
}

#[derive(Debug, Deserialize)]
struct AzureTokenResponse {
	access_token: String,
}

fn azure_v2_token_endpoint(tenant: &str) -> Result<Url, ConfigError> {
	let url = format!("{AZURE_AUTHORITY}/{tenant}/oauth2/v2.0/token");

	Url::parse(&url).map_err(|e| ConfigError::InvalidEndpoint { url, reason: e.to_string() })
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::_preludet::*;

	const STS_BODY: &str = r#"{
		"AssumeRoleWithWebIdentityResponse": {
			"AssumeRoleWithWebIdentityResult": {
				"Credentials": {
					"AccessKeyId": "ASIAJWT",
					"SecretAccessKey": "secret",
					"SessionToken": "token",
					"Expiration": 1756000000
				}
			}
		}
	}"#;

	fn azure_params() -> ParamMap {
		ParamMap::new()
			.set("idp_tenant", "contoso.example")
			.set("client_id", "client-123")
			.set("client_secret", "hunter2")
			.set("role_arn", "arn:aws:iam::123456789012:role/warehouse-reader")
	}

	#[tokio::test]
	async fn azure_jwt_acquires_then_assumes() {
		let token_body = r#"{"token_type": "Bearer", "access_token": "header.payload.sig"}"#;
		let client = RecordingClient::arc([json_ok(token_body), json_ok(STS_BODY)]);
		let plugin = AzureJwtPlugin::new(&azure_params(), &scripted_env(client.clone()))
			.expect("Azure JWT params should validate.");
		let resolved =
			plugin.fetch_credentials().await.expect("The grant chain should complete.");

		match resolved {
			ResolvedCredentials::Temporary(credentials) => {
				assert_eq!(credentials.access_key_id, "ASIAJWT");
			},
			other => panic!("Expected temporary credentials, got {other:?}"),
		}

		let requests = client.requests();

		assert_eq!(requests.len(), 2);
		assert_eq!(
			requests[0].url.as_str(),
			"https://login.microsoftonline.com/contoso.example/oauth2/v2.0/token",
		);
		assert!(requests[0].body.contains("grant_type=client_credentials"));
		assert!(requests[0].body.contains("client_secret=hunter2"));
		assert!(requests[0].body.contains("scope=openid"));
		assert_eq!(requests[1].context, "AssumeRoleWithWebIdentity");
		assert!(requests[1].body.contains("WebIdentityToken=header.payload.sig"));
		assert!(requests[1].body.contains("RoleSessionName=warehouse-iam"));
	}

	#[tokio::test]
	async fn azure_jwt_surfaces_tenant_rejections() {
		let rejection = r#"{"error": "invalid_client", "error_description": "bad secret"}"#;
		let client = RecordingClient::arc([status_body(401, rejection)]);
		let plugin = AzureJwtPlugin::new(&azure_params(), &scripted_env(client))
			.expect("Azure JWT params should validate.");
		let error = plugin
			.fetch_credentials()
			.await
			.expect_err("A 401 from the tenant should fail the flow.");

		assert!(matches!(
			error,
			Error::Auth(AuthError::ProviderRejected { status: Some(401), .. })
		));
	}

	#[tokio::test]
	async fn jwt_passes_the_caller_token_through() {
		let client = RecordingClient::arc([json_ok(STS_BODY)]);
		let params = ParamMap::new()
			.set("web_identity_token", "caller.jwt.token")
			.set("role_arn", "arn:aws:iam::123456789012:role/warehouse-reader")
			.set("role_session_name", "etl-batch");
		let plugin = JwtPlugin::new(&params, &scripted_env(client.clone()))
			.expect("JWT params should validate.");
		let resolved = plugin.fetch_credentials().await.expect("Assumption should complete.");

		assert!(matches!(resolved, ResolvedCredentials::Temporary(_)));

		let request = client.single_request();

		assert!(request.body.contains("WebIdentityToken=caller.jwt.token"));
		assert!(request.body.contains("RoleSessionName=etl-batch"));
	}

	#[test]
	fn jwt_cache_keys_fingerprint_the_token() {
		let params = ParamMap::new()
			.set("web_identity_token", "caller.jwt.token")
			.set("role_arn", "arn:aws:iam::123456789012:role/warehouse-reader");
		let plugin =
			JwtPlugin::new(&params, &offline_env()).expect("JWT params should validate.");
		let key = plugin.cache_key();

		assert_eq!(key.kind, PluginKind::Jwt);
		assert!(!key.qualifier.contains("caller.jwt.token"));

		let other = JwtPlugin::new(
			&ParamMap::new()
				.set("web_identity_token", "different.jwt.token")
				.set("role_arn", "arn:aws:iam::123456789012:role/warehouse-reader"),
			&offline_env(),
		)
		.expect("JWT params should validate.");

		assert_ne!(key, other.cache_key());
	}

	#[test]
	fn missing_role_arn_fails_fast() {
		let params = ParamMap::new().set("web_identity_token", "caller.jwt.token");

		assert!(matches!(
			JwtPlugin::new(&params, &offline_env()),
			Err(ConfigError::MissingParameter { plugin: "jwt", name: "role_arn" })
		));
	}
}
