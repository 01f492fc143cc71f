//! Credential cache contracts: keys, the storage seam, and its error type.

pub mod memory;

pub use memory::MemoryStore;

// crates.io
use base64::{Engine as _, engine::general_purpose::STANDARD_NO_PAD};
use sha2::{Digest, Sha256};
// self
use crate::{_prelude::*, creds::ResolvedCredentials, plugin::PluginKind};

/// Boxed future returned by [`CredentialStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Storage backend contract for resolved credentials.
///
/// The shipped [`MemoryStore`] is process-scoped; hosts may provide their own
/// implementation, but persistence beyond process lifetime is not this crate's concern.
pub trait CredentialStore
where
	Self: Send + Sync,
{
	/// Persists or replaces the credentials cached under `key`.
	fn save<'a>(
		&'a self,
		key: &'a CacheKey,
		credentials: ResolvedCredentials,
	) -> StoreFuture<'a, ()>;

	/// Fetches the credentials cached under `key`, if present.
	fn fetch<'a>(&'a self, key: &'a CacheKey) -> StoreFuture<'a, Option<ResolvedCredentials>>;

	/// Removes and returns the credentials cached under `key`.
	fn invalidate<'a>(&'a self, key: &'a CacheKey)
	-> StoreFuture<'a, Option<ResolvedCredentials>>;
}

/// Error type produced by [`CredentialStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by backends that encode records.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

/// Unique key identifying one plugin's cached credentials.
///
/// The qualifier is the plugin's distinguishing parameter (profile name, IdP host,
/// tenant, start URL) or a [`qualifier_fingerprint`] when the parameter is itself a
/// secret.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
	/// Which plugin produced the entry.
	pub kind: PluginKind,
	/// The plugin's distinguishing parameter.
	pub qualifier: String,
}
impl CacheKey {
	/// Builds a key from a plugin kind and its distinguishing parameter.
	pub fn new(kind: PluginKind, qualifier: impl Into<String>) -> Self {
		Self { kind, qualifier: qualifier.into() }
	}
}
impl Display for CacheKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "{}:{}", self.kind.as_str(), self.qualifier)
	}
}

/// Stable, non-reversible fingerprint for secret-bearing qualifiers.
///
/// Base64 (no padding) of the SHA-256 digest, so cache keys never embed the secret.
pub fn qualifier_fingerprint(material: &str) -> String {
	STANDARD_NO_PAD.encode(Sha256::digest(material.as_bytes()))
}
