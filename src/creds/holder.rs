//! Immutable credential holder types produced by identity-provider plugins.

// self
use crate::{
	_prelude::*,
	creds::{SdkSessionHandle, SessionSource, secret::SecretString},
	error::ConfigError,
};

/// Opaque handle describing an externally constructed cloud SDK session.
///
/// The crate never builds SDK sessions itself; the host injects one and holders hand it
/// back unchanged. For profile-based holders the host's configuration layer resolves
/// the profile and records the resulting keys in [`SdkSession::credentials`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SdkSession {
	/// Region the session was configured for, if any.
	pub region: Option<String>,
	/// Control-plane endpoint override, if any.
	pub endpoint: Option<Url>,
	/// Session-resolved static keys, when the host already materialized them.
	pub credentials: Option<SessionKeys>,
}
impl SdkSession {
	/// Creates an empty session handle.
	pub fn new() -> Self {
		Self::default()
	}

	/// Sets the session region.
	pub fn with_region(mut self, region: impl Into<String>) -> Self {
		self.region = Some(region.into());

		self
	}

	/// Sets a control-plane endpoint override.
	pub fn with_endpoint(mut self, endpoint: Url) -> Self {
		self.endpoint = Some(endpoint);

		self
	}

	/// Attaches the keys the host resolved for this session.
	pub fn with_credentials(mut self, credentials: SessionKeys) -> Self {
		self.credentials = Some(credentials);

		self
	}
}

/// Static keys resolved by the host's configuration layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionKeys {
	/// Access key identifier.
	pub access_key_id: String,
	/// Secret access key.
	pub secret_access_key: SecretString,
	/// Session token when the keys are themselves temporary.
	pub session_token: Option<SecretString>,
}

/// Temporary cloud credentials obtained from a role-assumption exchange.
///
/// Instances are never mutated after construction; the refresh coordinator replaces
/// them wholesale once expired.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporaryCredentials {
	/// Access key identifier.
	pub access_key_id: String,
	/// Secret access key; callers must avoid logging it.
	pub secret_access_key: SecretString,
	/// Session token bound to the key pair, if issued.
	pub session_token: Option<SecretString>,
	/// Expiry instant (always UTC), if the issuer communicated one.
	pub expiration: Option<OffsetDateTime>,
}
impl TemporaryCredentials {
	/// Builds a holder from a role-assumption response.
	pub fn new(
		access_key_id: impl Into<String>,
		secret_access_key: impl Into<SecretString>,
		session_token: Option<SecretString>,
		expiration: Option<OffsetDateTime>,
	) -> Self {
		Self {
			access_key_id: access_key_id.into(),
			secret_access_key: secret_access_key.into(),
			session_token,
			expiration,
		}
	}
}
impl SessionSource for TemporaryCredentials {
	fn session_credentials(&self) -> BTreeMap<String, String> {
		let mut mapping = BTreeMap::new();

		mapping.insert("aws_access_key_id".into(), self.access_key_id.clone());
		mapping.insert("aws_secret_access_key".into(), self.secret_access_key.expose().into());

		if let Some(token) = &self.session_token {
			mapping.insert("aws_session_token".into(), token.expose().into());
		}

		mapping
	}

	// Expiry is inclusive: a holder whose expiration equals the probe instant is
	// already expired.
	fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		self.expiration.is_some_and(|expiration| expiration <= instant)
	}
}
impl Debug for TemporaryCredentials {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TemporaryCredentials")
			.field("access_key_id", &self.access_key_id)
			.field("secret_access_key", &"<redacted>")
			.field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
			.field("expiration", &self.expiration)
			.finish()
	}
}

/// Long-lived static keys supplied directly by the connection configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AwsDirectCredentials {
	/// Access key identifier.
	pub access_key_id: String,
	/// Secret access key.
	pub secret_access_key: SecretString,
	/// Optional session token for pre-issued temporary keys.
	pub session_token: Option<SecretString>,
	/// SDK session injected by the host at construction.
	pub session: SdkSession,
}
impl AwsDirectCredentials {
	/// Validates and builds a direct-credentials holder.
	pub fn new(
		access_key_id: impl Into<String>,
		secret_access_key: impl Into<SecretString>,
		session_token: Option<SecretString>,
		session: SdkSession,
	) -> Result<Self, ConfigError> {
		let access_key_id = access_key_id.into();
		let secret_access_key = secret_access_key.into();

		if access_key_id.is_empty() || secret_access_key.is_empty() {
			return Err(ConfigError::MissingKeyMaterial);
		}

		Ok(Self { access_key_id, secret_access_key, session_token, session })
	}
}
impl SessionSource for AwsDirectCredentials {
	fn session_credentials(&self) -> BTreeMap<String, String> {
		let mut mapping = BTreeMap::new();

		mapping.insert("aws_access_key_id".into(), self.access_key_id.clone());
		mapping.insert("aws_secret_access_key".into(), self.secret_access_key.expose().into());

		if let Some(token) = &self.session_token {
			mapping.insert("aws_session_token".into(), token.expose().into());
		}

		mapping
	}
}
impl SdkSessionHandle for AwsDirectCredentials {
	fn sdk_session(&self) -> &SdkSession {
		&self.session
	}
}

/// Named local profile plus the SDK session built from it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AwsProfileCredentials {
	/// Profile name.
	pub profile: String,
	/// SDK session injected by the host at construction.
	pub session: SdkSession,
}
impl AwsProfileCredentials {
	/// Validates and builds a profile-credentials holder.
	pub fn new(profile: impl Into<String>, session: SdkSession) -> Result<Self, ConfigError> {
		let profile = profile.into();

		if profile.is_empty() {
			return Err(ConfigError::EmptyProfile);
		}

		Ok(Self { profile, session })
	}
}
impl SessionSource for AwsProfileCredentials {
	fn session_credentials(&self) -> BTreeMap<String, String> {
		[("profile".into(), self.profile.clone())].into_iter().collect()
	}
}
impl SdkSessionHandle for AwsProfileCredentials {
	fn sdk_session(&self) -> &SdkSession {
		&self.session
	}
}

/// Access token from a managed identity service, used without role assumption.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeToken {
	/// The token itself; callers must avoid logging it.
	pub token: SecretString,
	/// How the control plane should interpret the token.
	pub kind: NativeTokenKind,
	/// Expiry instant (always UTC), when the issuing service communicated one.
	pub expiration: Option<OffsetDateTime>,
}
impl NativeToken {
	/// Builds a native-token holder.
	pub fn new(
		token: impl Into<SecretString>,
		kind: NativeTokenKind,
		expiration: Option<OffsetDateTime>,
	) -> Self {
		Self { token: token.into(), kind, expiration }
	}

	/// Returns `true` if the token has expired at the provided instant.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		self.expiration.is_some_and(|expiration| expiration <= instant)
	}
}
impl Debug for NativeToken {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("NativeToken")
			.field("token", &"<redacted>")
			.field("kind", &self.kind)
			.field("expiration", &self.expiration)
			.finish()
	}
}

/// Wire label for a [`NativeToken`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NativeTokenKind {
	/// Access token issued by the managed identity service itself.
	AccessToken,
	/// External JWT accepted by the control plane's token exchange.
	ExtJwt,
}
impl NativeTokenKind {
	/// Label sent to the control plane.
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::AccessToken => "ACCESS_TOKEN",
			Self::ExtJwt => "EXT_JWT",
		}
	}
}
