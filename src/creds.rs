//! Credential holder family: capability traits, concrete holders, and the closed union
//! the rest of the crate passes around.

pub mod db;
pub mod holder;
pub mod secret;

pub use db::*;
pub use holder::*;
pub use secret::*;

// self
use crate::_prelude::*;

/// Capability of producing the minimal mapping needed to construct a cloud SDK session,
/// plus expiry tracking for holders that carry an expiration.
pub trait SessionSource {
	/// Minimal key/value mapping an SDK session can be built from.
	fn session_credentials(&self) -> BTreeMap<String, String>;

	/// Returns `true` if the holder has expired at the provided instant.
	///
	/// Non-expiring holders keep the default.
	fn is_expired_at(&self, _instant: OffsetDateTime) -> bool {
		false
	}

	/// Convenience helper checking against the current UTC instant.
	fn is_expired(&self) -> bool {
		self.is_expired_at(OffsetDateTime::now_utc())
	}
}

/// Capability of handing back the SDK session injected at construction.
pub trait SdkSessionHandle {
	/// The session object supplied at construction, unchanged.
	fn sdk_session(&self) -> &SdkSession;

	/// Always `true` for holders implementing this trait.
	fn has_associated_session(&self) -> bool {
		true
	}
}

/// Closed union over every holder variant a plugin can produce.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolvedCredentials {
	/// Temporary keys from a role-assumption exchange.
	Temporary(TemporaryCredentials),
	/// Static keys straight from the connection configuration.
	Direct(AwsDirectCredentials),
	/// Named local profile.
	Profile(AwsProfileCredentials),
	/// Managed-identity access token; bypasses role assumption.
	Native(NativeToken),
}
impl ResolvedCredentials {
	/// Stable label for logs and metrics.
	pub fn variant(&self) -> &'static str {
		match self {
			Self::Temporary(_) => "temporary",
			Self::Direct(_) => "direct",
			Self::Profile(_) => "profile",
			Self::Native(_) => "native",
		}
	}

	/// Returns `true` if the underlying holder has expired at the provided instant.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		match self {
			Self::Temporary(holder) => holder.is_expired_at(instant),
			Self::Direct(holder) => holder.is_expired_at(instant),
			Self::Profile(holder) => holder.is_expired_at(instant),
			Self::Native(token) => token.is_expired_at(instant),
		}
	}

	/// Convenience helper checking against the current UTC instant.
	pub fn is_expired(&self) -> bool {
		self.is_expired_at(OffsetDateTime::now_utc())
	}

	/// SDK session mapping for the holder variants that support one.
	///
	/// Native tokens construct no SDK session and return `None`.
	pub fn session_credentials(&self) -> Option<BTreeMap<String, String>> {
		match self {
			Self::Temporary(holder) => Some(holder.session_credentials()),
			Self::Direct(holder) => Some(holder.session_credentials()),
			Self::Profile(holder) => Some(holder.session_credentials()),
			Self::Native(_) => None,
		}
	}
}
impl From<TemporaryCredentials> for ResolvedCredentials {
	fn from(holder: TemporaryCredentials) -> Self {
		Self::Temporary(holder)
	}
}
impl From<AwsDirectCredentials> for ResolvedCredentials {
	fn from(holder: AwsDirectCredentials) -> Self {
		Self::Direct(holder)
	}
}
impl From<AwsProfileCredentials> for ResolvedCredentials {
	fn from(holder: AwsProfileCredentials) -> Self {
		Self::Profile(holder)
	}
}
impl From<NativeToken> for ResolvedCredentials {
	fn from(token: NativeToken) -> Self {
		Self::Native(token)
	}
}
