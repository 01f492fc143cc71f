//! Identifier dispatch: one entry point turning a configured plugin identifier and its
//! parameters into a ready-to-run [`IdpPlugin`].
//!
//! The non-federated sources live here too; [`DirectPlugin`] and [`ProfilePlugin`] wrap
//! connection-supplied material without any provider negotiation.

// self
use crate::{
	_prelude::*,
	cache::CacheKey,
	creds::{AwsDirectCredentials, AwsProfileCredentials, ResolvedCredentials, SecretString},
	plugin::{
		IdpPlugin, PluginEnv, PluginFuture, PluginKind,
		idc::{IdcBrowserPlugin, IdpTokenPlugin},
		jwt::{AzureJwtPlugin, JwtPlugin},
		params::ParamMap,
		saml::{AzureBrowserPlugin, BrowserSamlPlugin},
	},
};

/// Builds the plugin named by `identifier`.
///
/// Parameter validation happens here, eagerly; the returned plugin can only fail on
/// provider or transport grounds. Unknown identifiers are configuration errors, kept
/// distinct from authentication failures so callers can surface them before any
/// interactive flow starts.
pub fn resolve(
	identifier: &str,
	params: &ParamMap,
	env: &PluginEnv,
) -> Result<Arc<dyn IdpPlugin>, ConfigError> {
	let kind = PluginKind::from_identifier(identifier)
		.ok_or_else(|| ConfigError::UnknownPlugin { identifier: identifier.to_owned() })?;
	let plugin: Arc<dyn IdpPlugin> = match kind {
		PluginKind::Direct => Arc::new(DirectPlugin::new(params, env)?),
		PluginKind::Profile => Arc::new(ProfilePlugin::new(params, env)?),
		PluginKind::BrowserSaml => Arc::new(BrowserSamlPlugin::browser_saml(params, env)?),
		PluginKind::OktaBrowser => Arc::new(BrowserSamlPlugin::okta(params, env)?),
		PluginKind::AzureBrowser => Arc::new(AzureBrowserPlugin::new(params, env)?),
		PluginKind::PingBrowser => Arc::new(BrowserSamlPlugin::ping(params, env)?),
		PluginKind::JumpcloudBrowser => Arc::new(BrowserSamlPlugin::jumpcloud(params, env)?),
		PluginKind::AzureJwt => Arc::new(AzureJwtPlugin::new(params, env)?),
		PluginKind::Jwt => Arc::new(JwtPlugin::new(params, env)?),
		PluginKind::BrowserIdentityCenter => Arc::new(IdcBrowserPlugin::new(params, env)?),
		PluginKind::IdpToken => Arc::new(IdpTokenPlugin::new(params)?),
	};

	Ok(plugin)
}

/// Static access keys taken straight from the connection configuration.
#[derive(Debug)]
pub struct DirectPlugin {
	holder: AwsDirectCredentials,
}
impl DirectPlugin {
	/// Validates `access_key_id`, `secret_access_key` and the optional
	/// `session_token`.
	pub fn new(params: &ParamMap, env: &PluginEnv) -> Result<Self, ConfigError> {
		const PLUGIN: &str = "direct";

		let access_key_id = params.require(PLUGIN, "access_key_id")?;
		let secret_access_key = params.require(PLUGIN, "secret_access_key")?;
		let session_token = params.get("session_token").map(SecretString::from);

		Ok(Self {
			holder: AwsDirectCredentials::new(
				access_key_id,
				secret_access_key,
				session_token,
				env.session.clone(),
			)?,
		})
	}
}
impl IdpPlugin for DirectPlugin {
	fn kind(&self) -> PluginKind {
		PluginKind::Direct
	}

	// The key identifier is not secret; it distinguishes configurations well enough.
	fn cache_key(&self) -> CacheKey {
		CacheKey::new(PluginKind::Direct, self.holder.access_key_id.clone())
	}

	fn fetch_credentials(&self) -> PluginFuture<'_, ResolvedCredentials> {
		Box::pin(async move { Ok(self.holder.clone().into()) })
	}
}

/// Named local profile resolved by the host's configuration layer.
#[derive(Debug)]
pub struct ProfilePlugin {
	holder: AwsProfileCredentials,
}
impl ProfilePlugin {
	/// Validates the `profile` name.
	pub fn new(params: &ParamMap, env: &PluginEnv) -> Result<Self, ConfigError> {
		let profile = params.require("profile", "profile")?;

		Ok(Self { holder: AwsProfileCredentials::new(profile, env.session.clone())? })
	}
}
impl IdpPlugin for ProfilePlugin {
	fn kind(&self) -> PluginKind {
		PluginKind::Profile
	}

	fn cache_key(&self) -> CacheKey {
		CacheKey::new(PluginKind::Profile, self.holder.profile.clone())
	}

	fn fetch_credentials(&self) -> PluginFuture<'_, ResolvedCredentials> {
		Box::pin(async move { Ok(self.holder.clone().into()) })
	}
}
