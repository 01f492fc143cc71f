//! Browser-SAML plugin variants and the assertion handling they share.
//!
//! Four variants (`browser_saml`, `okta_browser`, `ping_browser`, `jumpcloud_browser`)
//! only differ in how the login URL is formed; the callback delivers the assertion
//! directly. The Azure variant runs an authorization-code flow instead and exchanges
//! the code at the tenant token endpoint for the assertion. All five end in the same
//! SAML role assumption.

// std
use std::sync::OnceLock;
// crates.io
use base64::{
	Engine as _,
	engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
};
use rand::{Rng, distr::Alphanumeric};
use regex::Regex;
// self
use crate::{
	_prelude::*,
	cache::CacheKey,
	creds::ResolvedCredentials,
	http::{self, AuthHttpClient, OutboundRequest, RetryPolicy, send_with_retry},
	obs::{self, FlowKind},
	plugin::{
		IdpPlugin, PluginEnv, PluginFuture, PluginKind,
		browser::{BrowserFlow, CallbackQuery},
		params::ParamMap,
	},
	sts::{SamlAssumeRequest, StsClient},
};

const ROLE_ATTRIBUTE_NAME: &str = "https://aws.amazon.com/SAML/Attributes/Role";
pub(crate) const AZURE_AUTHORITY: &str = "https://login.microsoftonline.com";
const STATE_LEN: usize = 32;

/// A federation assertion as delivered by the provider, decoded for role extraction.
#[derive(Clone)]
pub struct SamlAssertion {
	encoded: String,
	document: String,
}
impl SamlAssertion {
	/// Parses the value of a `SAMLResponse` callback parameter.
	pub fn from_callback(value: &str) -> Result<Self, AuthError> {
		// Form decoding turns `+` into a space; assertions never contain spaces, so
		// restore them before decoding.
		let restored = value.trim().replace(' ', "+");
		let bytes = STANDARD
			.decode(&restored)
			.map_err(|e| AuthError::MalformedAssertion { reason: e.to_string() })?;
		let document = String::from_utf8(bytes)
			.map_err(|e| AuthError::MalformedAssertion { reason: e.to_string() })?;

		Ok(Self::from_xml(document))
	}

	/// Wraps an already-decoded assertion document.
	pub fn from_xml(document: String) -> Self {
		Self { encoded: STANDARD.encode(document.as_bytes()), document }
	}

	/// Parses the `access_token` a tenant token endpoint returns for
	/// `urn:ietf:params:oauth:token-type:saml2`.
	///
	/// The token is base64url with unreliable padding, so padding is stripped before
	/// decoding.
	pub fn from_azure_token(token: &str) -> Result<Self, AuthError> {
		let trimmed = token.trim().trim_end_matches('=');
		let bytes = URL_SAFE_NO_PAD
			.decode(trimmed)
			.map_err(|e| AuthError::MalformedAssertion { reason: e.to_string() })?;
		let document = String::from_utf8(bytes)
			.map_err(|e| AuthError::MalformedAssertion { reason: e.to_string() })?;

		Ok(Self::from_xml(document))
	}

	/// Standard-base64 encoding of the document, as the role-assumption call expects.
	pub fn encoded(&self) -> &str {
		&self.encoded
	}

	/// All provider/role pairs carried in the role attribute, in document order.
	pub fn role_pairs(&self) -> Vec<RolePair> {
		role_attribute_pattern()
			.captures_iter(&self.document)
			.flat_map(|attribute| {
				attribute_value_pattern()
					.captures_iter(&attribute[1])
					.filter_map(|value| RolePair::from_attribute_value(&value[1]))
					.collect::<Vec<_>>()
			})
			.collect()
	}

	/// Picks the role to assume: `preferred` when named, else the first pair.
	pub fn select_role(&self, preferred: Option<&str>) -> Result<RolePair, AuthError> {
		let pairs = self.role_pairs();
		let Some(first) = pairs.first().cloned() else {
			return Err(AuthError::MalformedAssertion {
				reason: "no role attribute in the assertion".into(),
			});
		};

		match preferred {
			None => Ok(first),
			Some(role) =>
				pairs.into_iter().find(|pair| pair.role_arn == role).ok_or_else(|| {
					AuthError::MalformedAssertion {
						reason: format!("preferred role {role} not among the assertion's roles"),
					}
				}),
		}
	}
}
impl Debug for SamlAssertion {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SamlAssertion").field("bytes", &self.document.len()).finish()
	}
}

/// One provider/role pair from a SAML role attribute.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RolePair {
	/// SAML provider principal.
	pub provider_arn: String,
	/// Role to assume.
	pub role_arn: String,
}
impl RolePair {
	// Attribute values carry the pair in either order; the principal is the half
	// naming a saml-provider.
	fn from_attribute_value(value: &str) -> Option<Self> {
		let (first, second) = value.split_once(',')?;
		let (first, second) = (first.trim(), second.trim());

		if first.contains(":saml-provider/") {
			Some(Self { provider_arn: first.into(), role_arn: second.into() })
		} else if second.contains(":saml-provider/") {
			Some(Self { provider_arn: second.into(), role_arn: first.into() })
		} else {
			None
		}
	}
}

fn role_attribute_pattern() -> &'static Regex {
	static PATTERN: OnceLock<Regex> = OnceLock::new();

	PATTERN.get_or_init(|| {
		Regex::new(&format!(
			r#"(?is)<(?:[a-z0-9]+:)?attribute\s[^>]*name="{}"[^>]*>(.*?)</(?:[a-z0-9]+:)?attribute>"#,
			regex::escape(ROLE_ATTRIBUTE_NAME),
		))
		.expect("Role attribute pattern is a valid regex.")
	})
}

fn attribute_value_pattern() -> &'static Regex {
	static PATTERN: OnceLock<Regex> = OnceLock::new();

	PATTERN.get_or_init(|| {
		Regex::new(r"(?is)<(?:[a-z0-9]+:)?attributevalue[^>]*>\s*([^<]+?)\s*</(?:[a-z0-9]+:)?attributevalue>")
			.expect("Attribute value pattern is a valid regex.")
	})
}

/// Pieces every SAML variant shares: the browser flow, the role-assumption client, and
/// the role/duration preferences.
#[derive(Debug)]
struct SamlFlow {
	browser: BrowserFlow,
	sts: StsClient,
	preferred_role: Option<String>,
	duration_seconds: Option<u64>,
}
impl SamlFlow {
	fn from_params(
		plugin: &'static str,
		params: &ParamMap,
		env: &PluginEnv,
	) -> Result<Self, ConfigError> {
		let browser = BrowserFlow::from_params(plugin, params, env)?;
		let region = env.region_for(params);
		let sts = StsClient::new(env, &region)?;
		let preferred_role = params.get("preferred_role").map(str::to_owned);
		let duration_seconds = params.get_u64(plugin, "duration_seconds")?;

		Ok(Self { browser, sts, preferred_role, duration_seconds })
	}

	// The preferred role changes which credentials come back, so it is part of the
	// cache identity.
	fn cache_qualifier(&self, base: &str) -> String {
		match &self.preferred_role {
			Some(role) => format!("{base}#{role}"),
			None => base.to_owned(),
		}
	}

	async fn complete(&self, assertion: SamlAssertion) -> Result<ResolvedCredentials> {
		let role = assertion.select_role(self.preferred_role.as_deref())?;
		let credentials = self
			.sts
			.assume_role_with_saml(SamlAssumeRequest {
				assertion: assertion.encoded(),
				role_arn: &role.role_arn,
				principal_arn: &role.provider_arn,
				duration_seconds: self.duration_seconds,
			})
			.await?;

		Ok(credentials.into())
	}
}

/// Browser login against a provider whose callback delivers the assertion directly.
///
/// Covers the generic variant plus the Okta, Ping, and JumpCloud presets, which only
/// differ in how the login URL is formed.
#[derive(Debug)]
pub struct BrowserSamlPlugin {
	kind: PluginKind,
	login_url: Url,
	flow: SamlFlow,
}
impl BrowserSamlPlugin {
	/// The generic variant: `login_url` names the provider's start page.
	pub fn browser_saml(params: &ParamMap, env: &PluginEnv) -> Result<Self, ConfigError> {
		Self::from_login_url(PluginKind::BrowserSaml, "browser_saml", params, env)
	}

	/// The Okta preset: the login URL is the app-embed link formed from `idp_host`,
	/// `app_id`, and `app_name` (default `amazon_aws`).
	pub fn okta(params: &ParamMap, env: &PluginEnv) -> Result<Self, ConfigError> {
		const PLUGIN: &str = "okta_browser";

		let host = host_param(PLUGIN, params)?;
		let app_id = params.require(PLUGIN, "app_id")?;
		let app_name = params.get("app_name").unwrap_or("amazon_aws");
		let embed = format!("https://{host}/home/{app_name}/{app_id}");
		let login_url = Url::parse(&embed)
			.map_err(|e| ConfigError::invalid_parameter(PLUGIN, "app_id", e.to_string()))?;

		Ok(Self {
			kind: PluginKind::OktaBrowser,
			login_url,
			flow: SamlFlow::from_params(PLUGIN, params, env)?,
		})
	}

	/// The Ping preset: a generic login URL, with `partner_sp_id` appended when set.
	pub fn ping(params: &ParamMap, env: &PluginEnv) -> Result<Self, ConfigError> {
		const PLUGIN: &str = "ping_browser";

		let mut plugin = Self::from_login_url(PluginKind::PingBrowser, PLUGIN, params, env)?;

		if let Some(partner) = params.get("partner_sp_id") {
			plugin.login_url.query_pairs_mut().append_pair("PartnerSpId", partner);
		}

		Ok(plugin)
	}

	/// The JumpCloud preset: the generic flow under its own identifier.
	pub fn jumpcloud(params: &ParamMap, env: &PluginEnv) -> Result<Self, ConfigError> {
		Self::from_login_url(PluginKind::JumpcloudBrowser, "jumpcloud_browser", params, env)
	}

	fn from_login_url(
		kind: PluginKind,
		plugin: &'static str,
		params: &ParamMap,
		env: &PluginEnv,
	) -> Result<Self, ConfigError> {
		let login_url = params.require_https_url(plugin, "login_url")?;

		Ok(Self { kind, login_url, flow: SamlFlow::from_params(plugin, params, env)? })
	}

	async fn login_and_exchange(&self) -> Result<ResolvedCredentials> {
		let listener = self.flow.browser.bind().await?;
		let query = self
			.flow
			.browser
			.launch_and_wait(&listener, &self.login_url, &["SAMLResponse"])
			.await?;

		drop(listener);

		if let Some(error) = query.provider_error() {
			return Err(error.into());
		}

		let value = query.get("SAMLResponse").ok_or_else(|| AuthError::InvalidCallback {
			reason: "callback carried no SAMLResponse parameter".into(),
		})?;
		let assertion = SamlAssertion::from_callback(value)?;

		self.flow.complete(assertion).await
	}
}
impl IdpPlugin for BrowserSamlPlugin {
	fn kind(&self) -> PluginKind {
		self.kind
	}

	fn cache_key(&self) -> CacheKey {
		CacheKey::new(self.kind, self.flow.cache_qualifier(self.login_url.as_str()))
	}

	fn fetch_credentials(&self) -> PluginFuture<'_, ResolvedCredentials> {
		Box::pin(obs::observe_flow(
			FlowKind::BrowserLogin,
			self.kind.as_str(),
			self.login_and_exchange(),
		))
	}
}

/// Browser authorization-code login against an Azure AD tenant.
///
/// The callback delivers a code rather than the assertion; the code is exchanged at
/// the tenant token endpoint for a SAML token, which then flows through the shared
/// role assumption.
pub struct AzureBrowserPlugin {
	tenant: String,
	client_id: String,
	authorize_endpoint: Url,
	token_endpoint: Url,
	flow: SamlFlow,
	http: Arc<dyn AuthHttpClient>,
	retry: RetryPolicy,
}
impl AzureBrowserPlugin {
	/// Validates `idp_tenant` + `client_id` and prepares the tenant endpoints.
	pub fn new(params: &ParamMap, env: &PluginEnv) -> Result<Self, ConfigError> {
		const PLUGIN: &str = "azure_browser";

		let tenant = params.require(PLUGIN, "idp_tenant")?.to_owned();
		let client_id = params.require(PLUGIN, "client_id")?.to_owned();
		let authorize_endpoint = azure_endpoint(&tenant, "authorize")?;
		let token_endpoint = azure_endpoint(&tenant, "token")?;

		Ok(Self {
			tenant,
			client_id,
			authorize_endpoint,
			token_endpoint,
			flow: SamlFlow::from_params(PLUGIN, params, env)?,
			http: env.http.clone(),
			retry: env.retry,
		})
	}

	fn authorize_url(&self, redirect_uri: &str, state: &str) -> Url {
		let mut url = self.authorize_endpoint.clone();
		let mut pairs = url.query_pairs_mut();

		pairs.append_pair("client_id", &self.client_id);
		pairs.append_pair("response_type", "code");
		pairs.append_pair("redirect_uri", redirect_uri);
		pairs.append_pair("scope", "openid");
		pairs.append_pair("state", state);

		drop(pairs);

		url
	}

	async fn login_and_exchange(&self) -> Result<ResolvedCredentials> {
		let listener = self.flow.browser.bind().await?;
		let redirect_uri = format!("http://localhost:{}/callback", listener.port());
		let state = random_string(STATE_LEN);
		let authorize_url = self.authorize_url(&redirect_uri, &state);
		let query =
			self.flow.browser.launch_and_wait(&listener, &authorize_url, &["code"]).await?;

		drop(listener);

		if let Some(error) = query.provider_error() {
			return Err(error.into());
		}

		validate_state(&query, &state)?;

		let code = query.get("code").ok_or_else(|| AuthError::InvalidCallback {
			reason: "callback carried no code parameter".into(),
		})?;
		let assertion = self.exchange_code(code, &redirect_uri).await?;

		self.flow.complete(assertion).await
	}

	async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<SamlAssertion> {
		const ACTION: &str = "AzureTokenExchange";

		let mut form = BTreeMap::new();

		form.insert("grant_type", "authorization_code".to_owned());
		form.insert("requested_token_type", "urn:ietf:params:oauth:token-type:saml2".to_owned());
		form.insert("code", code.to_owned());
		form.insert("client_id", self.client_id.clone());
		form.insert("resource", self.client_id.clone());
		form.insert("redirect_uri", redirect_uri.to_owned());

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

		Ok(SamlAssertion::from_azure_token(&token.access_token)?)
	}
}
impl IdpPlugin for AzureBrowserPlugin {
	fn kind(&self) -> PluginKind {
		PluginKind::AzureBrowser
	}

	fn cache_key(&self) -> CacheKey {
		let base = format!("{}/{}", self.tenant, self.client_id);

		CacheKey::new(PluginKind::AzureBrowser, self.flow.cache_qualifier(&base))
	}

	fn fetch_credentials(&self) -> PluginFuture<'_, ResolvedCredentials> {
		Box::pin(obs::observe_flow(
			FlowKind::BrowserLogin,
			"azure_browser",
			self.login_and_exchange(),
		))
	}
}
impl Debug for AzureBrowserPlugin {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AzureBrowserPlugin")
			.field("tenant", &self.tenant)
			.field("client_id", &self.client_id)
			.field("flow", &self.flow)
			.finish()
	}
}

#[derive(Debug, Deserialize)]
struct AzureTokenResponse {
	access_token: String,
}

fn azure_endpoint(tenant: &str, leaf: &str) -> Result<Url, ConfigError> {
	let url = format!("{AZURE_AUTHORITY}/{tenant}/oauth2/{leaf}");

	Url::parse(&url).map_err(|e| ConfigError::InvalidEndpoint { url, reason: e.to_string() })
}

fn host_param(plugin: &'static str, params: &ParamMap) -> Result<String, ConfigError> {
	let host = params.require(plugin, "idp_host")?;

	if host.contains('/') || host.contains(':') {
		return Err(ConfigError::invalid_parameter(
			plugin,
			"idp_host",
			"must be a bare host name",
		));
	}

	Ok(host.to_owned())
}

fn validate_state(query: &CallbackQuery, expected: &str) -> Result<(), AuthError> {
	if query.get("state") == Some(expected) {
		Ok(())
	} else {
		Err(AuthError::InvalidCallback { reason: "authorization state mismatch".into() })
	}
}

fn random_string(len: usize) -> String {
	rand::rng().sample_iter(Alphanumeric).take(len).map(char::from).collect()
}
