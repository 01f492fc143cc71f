//! Shared scaffolding for plugins that send the user through a system browser.

pub mod listener;
pub use listener::{CallbackListener, CallbackQuery};

// self
use crate::{
	_prelude::*,
	plugin::{BrowserLauncher, PluginEnv, params::ParamMap},
};

/// Port the loopback listener binds when `listen_port` is not configured.
pub const DEFAULT_LISTEN_PORT: u16 = 7890;
/// Seconds to wait for the identity provider when `idp_response_timeout` is not configured.
pub const DEFAULT_RESPONSE_TIMEOUT_SECS: u64 = 120;
/// Smallest accepted `idp_response_timeout`, in seconds.
pub const MIN_RESPONSE_TIMEOUT_SECS: u64 = 10;

/// Reads `idp_response_timeout` and applies the default and the lower bound.
///
/// Shared by the callback-listener flows and the device-grant flow, which both
/// wait on the same configured window.
pub(crate) fn response_window(
	plugin: &'static str,
	params: &ParamMap,
) -> Result<Duration, ConfigError> {
	let timeout_secs = params
		.get_u64(plugin, "idp_response_timeout")?
		.unwrap_or(DEFAULT_RESPONSE_TIMEOUT_SECS);

	if timeout_secs < MIN_RESPONSE_TIMEOUT_SECS {
		return Err(ConfigError::invalid_parameter(
			plugin,
			"idp_response_timeout",
			format!("must be at least {MIN_RESPONSE_TIMEOUT_SECS} seconds"),
		));
	}

	Ok(Duration::seconds(timeout_secs as _))
}

/// One interactive browser login: a loopback listener, a launched browser and a
/// bounded wait for the federation callback.
pub struct BrowserFlow {
	listen_port: u16,
	window: Duration,
	launcher: Arc<dyn BrowserLauncher>,
}
impl BrowserFlow {
	/// Reads `listen_port` and `idp_response_timeout` and captures the environment's
	/// browser launcher.
	///
	/// `listen_port` `0` binds an ephemeral port; the redirect URI must then be built
	/// from [`CallbackListener::port`] after binding.
	pub fn from_params(
		plugin: &'static str,
		params: &ParamMap,
		env: &PluginEnv,
	) -> Result<Self, ConfigError> {
		let listen_port =
			params.get_u16(plugin, "listen_port")?.unwrap_or(DEFAULT_LISTEN_PORT);

		Ok(Self {
			listen_port,
			window: response_window(plugin, params)?,
			launcher: env.browser.clone(),
		})
	}

	/// The wait window applied to [`Self::launch_and_wait`].
	pub fn window(&self) -> Duration {
		self.window
	}

	/// Binds the loopback listener on the configured port.
	pub async fn bind(&self) -> Result<CallbackListener> {
		Ok(CallbackListener::bind(self.listen_port).await?)
	}

	/// Opens `login_url` in the system browser, then waits on `listener` until a
	/// callback carrying one of `expected` arrives or the window elapses.
	pub async fn launch_and_wait(
		&self,
		listener: &CallbackListener,
		login_url: &Url,
		expected: &[&str],
	) -> Result<CallbackQuery> {
		self.launcher.open(login_url)?;

		listener.wait_for_callback(expected, self.window).await
	}
}
impl Debug for BrowserFlow {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("BrowserFlow")
			.field("listen_port", &self.listen_port)
			.field("window", &self.window)
			.finish()
	}
}
