//! Final database credential artifact handed to the wire-protocol connector.

// self
use crate::{_prelude::*, creds::secret::SecretString};

/// Ephemeral database username/password pair returned by the control plane.
///
/// Its expiration is independent of the cloud credential that paid for it. Ownership
/// transfers entirely to the caller; this crate keeps no copy.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbCredentials {
	/// Database user the session must authenticate as.
	pub db_user: String,
	/// One-time database password; callers must avoid logging it.
	pub db_password: SecretString,
	/// Instant (UTC) after which the pair is no longer accepted.
	pub expiration: OffsetDateTime,
}
impl DbCredentials {
	/// Returns `true` if the pair has expired at the provided instant.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		self.expiration <= instant
	}

	/// Convenience helper checking against the current UTC instant.
	pub fn is_expired(&self) -> bool {
		self.is_expired_at(OffsetDateTime::now_utc())
	}
}
impl Debug for DbCredentials {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("DbCredentials")
			.field("db_user", &self.db_user)
			.field("db_password", &"<redacted>")
			.field("expiration", &self.expiration)
			.finish()
	}
}
