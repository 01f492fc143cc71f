//! Crate-level error types shared across plugins, the cache, and the fetcher.
//!
//! Every variant keeps its payload as plain data (`String` messages at the leaves) so
//! the whole tree derives [`Clone`]; single-flight waiters receive the leader's failure
//! verbatim instead of a lossy re-wrap.

// self
use crate::_prelude::*;

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Canonical error exposed by public APIs.
#[derive(Clone, Debug, ThisError)]
pub enum Error {
	/// Cache-layer failure.
	#[error("{0}")]
	Store(
		#[from]
		#[source]
		crate::cache::StoreError,
	),
	/// Local configuration problem; never retried.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// The identity provider or control plane refused authentication.
	#[error(transparent)]
	Auth(#[from] AuthError),
	/// Transport failure reaching an identity provider or the control plane.
	#[error(transparent)]
	Transport(#[from] TransportError),

	/// Interactive login did not complete within the configured window; never retried.
	#[error("Authentication timed out after waiting {waited} for the identity provider.")]
	AuthTimeout {
		/// How long the flow waited before giving up.
		waited: Duration,
	},
}
impl Error {
	/// Coarse classification of this error, independent of the exact variant.
	pub fn kind(&self) -> ErrorKind {
		match self {
			Self::Store(_) => ErrorKind::Cache,
			Self::Config(_) => ErrorKind::Configuration,
			Self::Auth(_) => ErrorKind::Authentication,
			Self::Transport(_) => ErrorKind::Network,
			Self::AuthTimeout { .. } => ErrorKind::AuthTimeout,
		}
	}
}

/// Coarse error classification used by callers and metrics labels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
	/// Unknown plugin, missing/invalid parameter, malformed holder construction.
	Configuration,
	/// Browser callback or device grant not received in time.
	AuthTimeout,
	/// Provider rejection, denied role assumption, unusable assertion.
	Authentication,
	/// Transport failure or exhausted retry budget.
	Network,
	/// Credential store backend failure.
	Cache,
}
impl ErrorKind {
	/// Stable label for logs and metrics.
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Configuration => "configuration",
			Self::AuthTimeout => "auth_timeout",
			Self::Authentication => "authentication",
			Self::Network => "network",
			Self::Cache => "cache",
		}
	}
}
impl Display for ErrorKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Configuration and validation failures.
#[derive(Clone, Debug, ThisError)]
pub enum ConfigError {
	/// Identifier does not name a supported plugin.
	#[error("Unknown plugin identifier `{identifier}`.")]
	UnknownPlugin {
		/// The identifier as supplied by the connection configuration.
		identifier: String,
	},
	/// A plugin's required connection parameter is absent.
	#[error("Plugin `{plugin}` is missing the required parameter `{name}`.")]
	MissingParameter {
		/// Plugin identifier.
		plugin: &'static str,
		/// Parameter name.
		name: &'static str,
	},
	/// A parameter is present but failed the plugin's validation.
	#[error("Parameter `{name}` of plugin `{plugin}` is invalid: {reason}.")]
	InvalidParameter {
		/// Plugin identifier.
		plugin: &'static str,
		/// Parameter name.
		name: &'static str,
		/// Human-readable validation failure.
		reason: String,
	},
	/// Two mutually exclusive parameters were both supplied.
	#[error("Plugin `{plugin}` accepts only one of `{first}` and `{second}`.")]
	ConflictingParameters {
		/// Plugin identifier.
		plugin: &'static str,
		/// First of the conflicting parameter names.
		first: &'static str,
		/// Second of the conflicting parameter names.
		second: &'static str,
	},
	/// An endpoint URL could not be parsed or uses a forbidden scheme.
	#[error("Endpoint `{url}` is invalid: {reason}.")]
	InvalidEndpoint {
		/// The offending URL string.
		url: String,
		/// Human-readable parsing or scheme failure.
		reason: String,
	},

	/// Direct credentials require both halves of the key pair.
	#[error("Direct credentials require a non-empty access key id and secret access key.")]
	MissingKeyMaterial,
	/// Profile holders require a non-empty profile name.
	#[error("Profile name must not be empty.")]
	EmptyProfile,
	/// A profile session carries no resolved credentials to sign with.
	#[error("Profile `{profile}` has no session-resolved credentials.")]
	UnresolvedProfile {
		/// The profile name.
		profile: String,
	},
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed: {reason}.")]
	HttpClientBuild {
		/// Human-readable builder failure.
		reason: String,
	},
}
impl ConfigError {
	/// Wraps a transport builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl Display) -> Self {
		Self::HttpClientBuild { reason: src.to_string() }
	}

	/// Flags `name` as invalid for `plugin` with the provided reason.
	pub fn invalid_parameter(
		plugin: &'static str,
		name: &'static str,
		reason: impl Into<String>,
	) -> Self {
		Self::InvalidParameter { plugin, name, reason: reason.into() }
	}
}

/// Authentication failures reported by identity providers or the control plane.
#[derive(Clone, Debug, ThisError)]
pub enum AuthError {
	/// The identity provider rejected the login or token request.
	#[error("Identity provider rejected the request: {reason}.")]
	ProviderRejected {
		/// Provider-supplied error description.
		reason: String,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// Role assumption or the cluster-credentials call was denied.
	#[error("Access denied by `{action}`: {reason}.")]
	AccessDenied {
		/// The API action that refused the request.
		action: &'static str,
		/// Service-supplied error description.
		reason: String,
	},
	/// A federation assertion could not be decoded or names no usable role.
	#[error("Federation assertion is malformed: {reason}.")]
	MalformedAssertion {
		/// Human-readable decoding or extraction failure.
		reason: String,
	},
	/// The browser callback did not carry the expected parameters.
	#[error("Browser callback is invalid: {reason}.")]
	InvalidCallback {
		/// Human-readable validation failure.
		reason: String,
	},
	/// The user or the service denied the device authorization grant.
	#[error("Device authorization was denied: {reason}.")]
	DeviceDenied {
		/// Service-supplied error description.
		reason: String,
	},
	/// The system browser could not be launched for an interactive flow.
	#[error("Browser could not be launched: {reason}.")]
	BrowserLaunch {
		/// Underlying launcher failure description.
		reason: String,
	},
	/// An endpoint responded 2xx but the payload could not be decoded.
	#[error("Response from `{action}` could not be decoded: {reason}.")]
	MalformedResponse {
		/// The API action whose response failed to decode.
		action: &'static str,
		/// Decode failure, including the JSON path when known.
		reason: String,
	},
}

/// Transport-level failures (network, retry exhaustion, listener IO).
///
/// Payloads are message strings rather than boxed sources so the variants stay
/// cloneable for the flight-sharing layer.
#[derive(Clone, Debug, ThisError)]
pub enum TransportError {
	/// The underlying HTTP client reported a network failure.
	#[error("Network error while calling `{context}`: {message}.")]
	Network {
		/// The API action or endpoint being called.
		context: &'static str,
		/// Transport-specific failure description.
		message: String,
	},
	/// Upstream kept answering with retryable statuses until the budget ran out.
	#[error("`{context}` still failing with HTTP {status} after {attempts} attempts: {message}.")]
	Upstream {
		/// The API action or endpoint being called.
		context: &'static str,
		/// Final HTTP status observed.
		status: u16,
		/// Number of attempts made, including the first.
		attempts: u32,
		/// Truncated response body preview.
		message: String,
	},
	/// Local IO failure on the callback listener.
	#[error("Callback listener failed: {message}.")]
	Listener {
		/// Underlying IO failure description.
		message: String,
	},
}
impl TransportError {
	/// Wraps a transport-specific network failure.
	pub fn network(context: &'static str, src: impl Display) -> Self {
		Self::Network { context, message: src.to_string() }
	}

	/// Wraps a callback-listener IO failure.
	pub fn listener(src: impl Display) -> Self {
		Self::Listener { message: src.to_string() }
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn kinds_cover_the_public_taxonomy() {
		let config: Error = ConfigError::EmptyProfile.into();
		let auth: Error =
			AuthError::AccessDenied { action: "GetClusterCredentials", reason: "nope".into() }
				.into();
		let transport: Error = TransportError::network("AssumeRoleWithSAML", "refused").into();
		let timeout = Error::AuthTimeout { waited: Duration::seconds(5) };

		assert_eq!(config.kind(), ErrorKind::Configuration);
		assert_eq!(auth.kind(), ErrorKind::Authentication);
		assert_eq!(transport.kind(), ErrorKind::Network);
		assert_eq!(timeout.kind(), ErrorKind::AuthTimeout);
	}

	#[test]
	fn errors_clone_with_identical_display() {
		let original: Error = AuthError::ProviderRejected {
			reason: "invalid_grant".into(),
			status: Some(400),
		}
		.into();
		let shared = original.clone();

		assert_eq!(original.to_string(), shared.to_string());
		assert_eq!(original.kind(), shared.kind());
	}

	#[test]
	fn store_error_converts_with_source() {
		let store_error = crate::cache::StoreError::Backend { message: "map poisoned".into() };
		let error: Error = store_error.clone().into();

		assert!(matches!(error, Error::Store(_)));
		assert!(error.to_string().contains("map poisoned"));

		let source = StdError::source(&error)
			.expect("Top-level error should expose the store error as its source.");

		assert_eq!(source.to_string(), store_error.to_string());
	}
}
