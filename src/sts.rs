//! Role-assumption client over the security-token-service Query API.
//!
//! Assertions and web-identity tokens authenticate the calls themselves, so nothing
//! here is request-signed. Responses are requested as JSON; the error envelope is
//! classified into the crate taxonomy in [`failure_to_error`].

// self
use crate::{
	_prelude::*,
	creds::TemporaryCredentials,
	http::{self, AuthHttpClient, OutboundRequest, RawResponse, RetryPolicy, send_with_retry},
	obs::{self, FlowKind},
	plugin::PluginEnv,
};

const API_VERSION: &str = "2011-06-15";
const SAML_ACTION: &str = "AssumeRoleWithSAML";
const WEB_IDENTITY_ACTION: &str = "AssumeRoleWithWebIdentity";

/// Facade over the two role-assumption grants the plugins use.
#[derive(Clone)]
pub struct StsClient {
	endpoint: Url,
	http: Arc<dyn AuthHttpClient>,
	retry: RetryPolicy,
}
impl StsClient {
	/// Client for `region`, honoring the session's endpoint override when present.
	pub fn new(env: &PluginEnv, region: &str) -> Result<Self, ConfigError> {
		let endpoint = match &env.session.endpoint {
			Some(endpoint) => endpoint.clone(),
			None => regional_endpoint(region)?,
		};

		Ok(Self::with_endpoint(env, endpoint))
	}

	/// Client against an explicit endpoint.
	pub fn with_endpoint(env: &PluginEnv, endpoint: Url) -> Self {
		Self { endpoint, http: env.http.clone(), retry: env.retry }
	}

	/// Exchanges a SAML assertion for temporary credentials.
	pub async fn assume_role_with_saml(
		&self,
		request: SamlAssumeRequest<'_>,
	) -> Result<TemporaryCredentials> {
		let mut form = BTreeMap::new();

		form.insert("Action", SAML_ACTION.to_owned());
		form.insert("Version", API_VERSION.to_owned());
		form.insert("SAMLAssertion", request.assertion.to_owned());
		form.insert("RoleArn", request.role_arn.to_owned());
		form.insert("PrincipalArn", request.principal_arn.to_owned());

		if let Some(duration) = request.duration_seconds {
			form.insert("DurationSeconds", duration.to_string());
		}

		self.exchange(SAML_ACTION, &form).await
	}

	/// Exchanges a web-identity token for temporary credentials.
	pub async fn assume_role_with_web_identity(
		&self,
		request: WebIdentityAssumeRequest<'_>,
	) -> Result<TemporaryCredentials> {
		let mut form = BTreeMap::new();

		form.insert("Action", WEB_IDENTITY_ACTION.to_owned());
		form.insert("Version", API_VERSION.to_owned());
		form.insert("WebIdentityToken", request.token.to_owned());
		form.insert("RoleArn", request.role_arn.to_owned());
		form.insert("RoleSessionName", request.session_name.to_owned());

		if let Some(duration) = request.duration_seconds {
			form.insert("DurationSeconds", duration.to_string());
		}

		self.exchange(WEB_IDENTITY_ACTION, &form).await
	}

	async fn exchange(
		&self,
		action: &'static str,
		form: &BTreeMap<&'static str, String>,
	) -> Result<TemporaryCredentials> {
		obs::observe_flow(FlowKind::RoleAssumption, action, async move {
			let body = http::encode_form(form);
			let headers = [("accept", http::JSON.to_owned())];
			let response = send_with_retry(self.http.as_ref(), self.retry, OutboundRequest {
				context: action,
				url: &self.endpoint,
				content_type: http::FORM_URLENCODED,
				headers: &headers,
				body: body.as_bytes(),
			})
			.await?;

			if !response.is_success() {
				return Err(failure_to_error(action, &response));
			}

			decode_credentials(action, &response.body)
		})
		.await
	}
}
impl Debug for StsClient {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("StsClient").field("endpoint", &self.endpoint.as_str()).finish()
	}
}

/// Inputs for the SAML grant.
#[derive(Clone, Copy, Debug)]
pub struct SamlAssumeRequest<'a> {
	/// Base64-encoded assertion, exactly as delivered by the provider.
	pub assertion: &'a str,
	/// Role to assume.
	pub role_arn: &'a str,
	/// SAML provider principal paired with the role in the assertion.
	pub principal_arn: &'a str,
	/// Requested credential lifetime.
	pub duration_seconds: Option<u64>,
}

/// Inputs for the web-identity grant.
#[derive(Clone, Copy, Debug)]
pub struct WebIdentityAssumeRequest<'a> {
	/// OIDC token proving the identity.
	pub token: &'a str,
	/// Role to assume.
	pub role_arn: &'a str,
	/// Session name recorded by the provider.
	pub session_name: &'a str,
	/// Requested credential lifetime.
	pub duration_seconds: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireCredentials {
	access_key_id: String,
	secret_access_key: String,
	session_token: Option<String>,
	// Epoch seconds; the Query API serializes timestamps as doubles in JSON.
	expiration: f64,
}

#[derive(Debug, Deserialize)]
struct SamlEnvelope {
	#[serde(rename = "AssumeRoleWithSAMLResponse")]
	response: SamlResponse,
}
#[derive(Debug, Deserialize)]
struct SamlResponse {
	#[serde(rename = "AssumeRoleWithSAMLResult")]
	result: AssumeResult,
}
#[derive(Debug, Deserialize)]
struct WebIdentityEnvelope {
	#[serde(rename = "AssumeRoleWithWebIdentityResponse")]
	response: WebIdentityResponse,
}
#[derive(Debug, Deserialize)]
struct WebIdentityResponse {
	#[serde(rename = "AssumeRoleWithWebIdentityResult")]
	result: AssumeResult,
}
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AssumeResult {
	credentials: WireCredentials,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
	#[serde(rename = "Error")]
	error: ErrorBody,
}
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorBody {
	code: String,
	message: String,
}

fn regional_endpoint(region: &str) -> Result<Url, ConfigError> {
	let url = format!("https://sts.{region}.amazonaws.com/");

	Url::parse(&url).map_err(|e| ConfigError::InvalidEndpoint { url, reason: e.to_string() })
}

fn decode_credentials(action: &'static str, body: &[u8]) -> Result<TemporaryCredentials> {
	let credentials = match action {
		SAML_ACTION =>
			http::decode_json::<SamlEnvelope>(action, body)?.response.result.credentials,
		_ => http::decode_json::<WebIdentityEnvelope>(action, body)?.response.result.credentials,
	};
	let expiration = OffsetDateTime::from_unix_timestamp(credentials.expiration as i64)
		.map_err(|e| AuthError::MalformedResponse { action, reason: e.to_string() })?;

	Ok(TemporaryCredentials::new(
		credentials.access_key_id,
		credentials.secret_access_key,
		credentials.session_token.map(Into::into),
		Some(expiration),
	))
}

fn failure_to_error(action: &'static str, response: &RawResponse) -> Error {
	let (code, message) = match http::decode_json::<ErrorEnvelope>(action, &response.body) {
		Ok(envelope) => (envelope.error.code, envelope.error.message),
		Err(_) => (format!("HTTP {}", response.status), response.body_preview()),
	};

	match code.as_str() {
		"AccessDenied" | "AccessDeniedException" =>
			AuthError::AccessDenied { action, reason: message }.into(),
		"IDPCommunicationError" =>
			TransportError::Network { context: action, message: format!("{code}: {message}") }
				.into(),
		"Throttling" | "ThrottlingException" | "RequestLimitExceeded" => TransportError::Upstream {
			context: action,
			status: response.status,
			attempts: 1,
			message: format!("{code}: {message}"),
		}
		.into(),
		_ => AuthError::ProviderRejected {
			reason: format!("{code}: {message}"),
			status: Some(response.status),
		}
		.into(),
	}
}
