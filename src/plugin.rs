//! Identity-provider plugin framework: the capability trait, the closed identifier
//! set, and the shared context plugins are constructed with.

pub mod browser;
pub mod idc;
pub mod jwt;
pub mod params;
pub mod resolver;
pub mod saml;

pub use params::ParamMap;
pub use resolver::resolve;

// self
use crate::{
	_prelude::*,
	cache::CacheKey,
	creds::{ResolvedCredentials, SdkSession},
	error::AuthError,
	http::{AuthHttpClient, RetryPolicy},
};
#[cfg(feature = "reqwest")] use crate::http::ReqwestHttpClient;

/// Boxed future returned by plugin operations.
pub type PluginFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// Single capability every identity source implements: negotiate with the provider and
/// produce a credential holder.
///
/// Implementations validate their parameters eagerly at construction, so by the time a
/// plugin exists, `fetch_credentials` can only fail on provider or transport grounds.
pub trait IdpPlugin
where
	Self: Debug + Send + Sync,
{
	/// Which member of the closed plugin set this is.
	fn kind(&self) -> PluginKind;

	/// Cache key derived from the plugin identity and its distinguishing parameter.
	fn cache_key(&self) -> CacheKey;

	/// Negotiates with the identity source and produces a holder.
	fn fetch_credentials(&self) -> PluginFuture<'_, ResolvedCredentials>;
}

/// Closed set of supported plugin identifiers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginKind {
	/// Static access keys straight from the connection configuration.
	Direct,
	/// Named local profile.
	Profile,
	/// Generic browser SAML flow against a caller-supplied login URL.
	BrowserSaml,
	/// Browser SAML flow against an Okta app-embed URL.
	OktaBrowser,
	/// Browser authorization-code flow against an Azure AD tenant.
	AzureBrowser,
	/// Browser SAML flow against a Ping federation endpoint.
	PingBrowser,
	/// Browser SAML flow against a JumpCloud SSO URL.
	JumpcloudBrowser,
	/// Non-interactive Azure AD client-credentials grant exchanged as a web identity.
	AzureJwt,
	/// Caller-supplied JWT exchanged as a web identity.
	Jwt,
	/// Device-authorization flow against the identity-center OIDC service.
	BrowserIdentityCenter,
	/// Caller-supplied managed-identity token, passed through unchanged.
	IdpToken,
}
impl PluginKind {
	/// Every supported identifier, in declaration order.
	pub const ALL: [Self; 11] = [
		Self::Direct,
		Self::Profile,
		Self::BrowserSaml,
		Self::OktaBrowser,
		Self::AzureBrowser,
		Self::PingBrowser,
		Self::JumpcloudBrowser,
		Self::AzureJwt,
		Self::Jwt,
		Self::BrowserIdentityCenter,
		Self::IdpToken,
	];

	/// Returns the configuration identifier for this plugin.
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Direct => "direct",
			Self::Profile => "profile",
			Self::BrowserSaml => "browser_saml",
			Self::OktaBrowser => "okta_browser",
			Self::AzureBrowser => "azure_browser",
			Self::PingBrowser => "ping_browser",
			Self::JumpcloudBrowser => "jumpcloud_browser",
			Self::AzureJwt => "azure_jwt",
			Self::Jwt => "jwt",
			Self::BrowserIdentityCenter => "browser_identity_center",
			Self::IdpToken => "idp_token",
		}
	}

	/// Translates a configuration identifier into the enum, if it names one.
	pub fn from_identifier(identifier: &str) -> Option<Self> {
		Self::ALL.into_iter().find(|kind| kind.as_str() == identifier)
	}
}
impl Display for PluginKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Region assumed when neither the parameters nor the session name one.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Shared context plugin constructors receive from the resolver.
///
/// Owns the transport, the browser launcher, the transport retry policy, and the
/// host-injected SDK session handed to holder-only plugins.
#[derive(Clone)]
pub struct PluginEnv {
	/// Transport shared by every outbound exchange.
	pub http: Arc<dyn AuthHttpClient>,
	/// Launcher used by interactive flows.
	pub browser: Arc<dyn BrowserLauncher>,
	/// Retry policy applied to role-assumption and token endpoints.
	pub retry: RetryPolicy,
	/// SDK session injected into direct/profile holders.
	pub session: SdkSession,
}
impl PluginEnv {
	/// Builds a context around caller-provided transport and launcher.
	pub fn new(http: Arc<dyn AuthHttpClient>, browser: Arc<dyn BrowserLauncher>) -> Self {
		Self { http, browser, retry: RetryPolicy::default(), session: SdkSession::new() }
	}

	/// Replaces the transport retry policy.
	pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
		self.retry = retry;

		self
	}

	/// Sets the SDK session injected into direct/profile holders.
	pub fn with_session(mut self, session: SdkSession) -> Self {
		self.session = session;

		self
	}

	/// Region for role-assumption and control-plane endpoints: the `region`
	/// parameter, else the session's region, else [`DEFAULT_REGION`].
	pub fn region_for(&self, params: &ParamMap) -> String {
		params
			.get("region")
			.or_else(|| self.session.region.as_deref().filter(|region| !region.is_empty()))
			.unwrap_or(DEFAULT_REGION)
			.to_owned()
	}
}
#[cfg(feature = "reqwest")]
impl Default for PluginEnv {
	fn default() -> Self {
		Self::new(Arc::new(ReqwestHttpClient::default()), Arc::new(SystemBrowser))
	}
}
impl Debug for PluginEnv {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("PluginEnv")
			.field("retry", &self.retry)
			.field("session", &self.session)
			.finish()
	}
}

/// Launches the system browser for interactive flows.
///
/// A seam so tests and headless hosts can substitute their own delivery of the login
/// URL to the user.
pub trait BrowserLauncher
where
	Self: Send + Sync,
{
	/// Opens `url` in the user's browser.
	fn open(&self, url: &Url) -> Result<(), AuthError>;
}

/// Default launcher delegating to the operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemBrowser;
impl BrowserLauncher for SystemBrowser {
	fn open(&self, url: &Url) -> Result<(), AuthError> {
		open::that(url.as_str())
			.map_err(|e| AuthError::BrowserLaunch { reason: e.to_string() })
	}
}
