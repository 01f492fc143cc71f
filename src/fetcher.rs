//! Control-plane exchange turning a resolved identity into database credentials.
//!
//! Key-shaped identities sign the call; native tokens authenticate it as a bearer
//! header instead. Either way the output is the same ephemeral [`DbCredentials`] pair
//! the wire-protocol connector logs in with.

// self
use crate::{
	_prelude::*,
	creds::{DbCredentials, ResolvedCredentials, SecretString},
	http::{self, AuthHttpClient, OutboundRequest, RawResponse, RetryPolicy, send_with_retry},
	obs::{self, FlowKind},
	plugin::PluginEnv,
	sign::{self, SigningKeys},
};

const API_VERSION: &str = "2012-12-01";
const ACTION: &str = "GetClusterCredentials";
const SERVICE: &str = "redshift";

/// Client for the control plane's cluster-credentials call.
#[derive(Clone)]
pub struct ClusterCredentialsFetcher {
	endpoint: Url,
	region: String,
	http: Arc<dyn AuthHttpClient>,
	retry: RetryPolicy,
}
impl ClusterCredentialsFetcher {
	/// Fetcher for `region`, honoring the session's endpoint override when present.
	pub fn new(env: &PluginEnv, region: &str) -> Result<Self, ConfigError> {
		let endpoint = match &env.session.endpoint {
			Some(endpoint) => endpoint.clone(),
			None => regional_endpoint(region)?,
		};

		Ok(Self::with_endpoint(env, region, endpoint))
	}

	/// Fetcher against an explicit endpoint.
	pub fn with_endpoint(env: &PluginEnv, region: &str, endpoint: Url) -> Self {
		Self { endpoint, region: region.to_owned(), http: env.http.clone(), retry: env.retry }
	}

	/// Exchanges `identity` for an ephemeral database user/password pair.
	///
	/// A denial from the control plane maps to the authentication kind; transport
	/// failures stay network errors so callers can tell refusal from unreachability.
	pub async fn fetch(
		&self,
		identity: &ResolvedCredentials,
		request: &ClusterCredentialsRequest,
	) -> Result<DbCredentials> {
		obs::observe_flow(FlowKind::ClusterCredentials, ACTION, self.exchange(identity, request))
			.await
	}

	async fn exchange(
		&self,
		identity: &ResolvedCredentials,
		request: &ClusterCredentialsRequest,
	) -> Result<DbCredentials> {
		let form = request.to_form();
		let body = http::encode_form(&form);
		let mut headers = match call_auth(identity)? {
			CallAuth::Signed(keys) => sign::sign_post(
				&keys,
				&self.region,
				SERVICE,
				&self.endpoint,
				http::FORM_URLENCODED,
				body.as_bytes(),
				OffsetDateTime::now_utc(),
			)?,
			CallAuth::Bearer(token) => vec![("authorization", format!("Bearer {token}"))],
		};

		headers.push(("accept", http::JSON.to_owned()));

		let response = send_with_retry(self.http.as_ref(), self.retry, OutboundRequest {
			context: ACTION,
			url: &self.endpoint,
			content_type: http::FORM_URLENCODED,
			headers: &headers,
			body: body.as_bytes(),
		})
		.await?;

		if !response.is_success() {
			return Err(failure_to_error(&response));
		}

		decode_db_credentials(&response.body)
	}
}
impl Debug for ClusterCredentialsFetcher {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ClusterCredentialsFetcher")
			.field("endpoint", &self.endpoint.as_str())
			.field("region", &self.region)
			.finish()
	}
}

/// Inputs for the cluster-credentials call.
#[derive(Clone, Debug)]
pub struct ClusterCredentialsRequest {
	cluster_identifier: String,
	db_user: String,
	db_name: Option<String>,
	auto_create: Option<bool>,
	db_groups: Vec<String>,
	duration_seconds: Option<u64>,
}
impl ClusterCredentialsRequest {
	/// Request for `db_user` on the named cluster.
	pub fn new(cluster_identifier: impl Into<String>, db_user: impl Into<String>) -> Self {
		Self {
			cluster_identifier: cluster_identifier.into(),
			db_user: db_user.into(),
			db_name: None,
			auto_create: None,
			db_groups: Vec::new(),
			duration_seconds: None,
		}
	}

	/// Database to scope the credentials to.
	pub fn with_db_name(mut self, db_name: impl Into<String>) -> Self {
		self.db_name = Some(db_name.into());

		self
	}

	/// Asks the control plane to create the database user if absent.
	pub fn with_auto_create(mut self, auto_create: bool) -> Self {
		self.auto_create = Some(auto_create);

		self
	}

	/// Database groups the session joins.
	pub fn with_db_groups(
		mut self,
		db_groups: impl IntoIterator<Item = impl Into<String>>,
	) -> Self {
		self.db_groups = db_groups.into_iter().map(Into::into).collect();

		self
	}

	/// Requested credential lifetime.
	pub fn with_duration_seconds(mut self, duration_seconds: u64) -> Self {
		self.duration_seconds = Some(duration_seconds);

		self
	}

	// List parameters use the Query API's indexed member form, one pair per entry.
	fn to_form(&self) -> BTreeMap<String, String> {
		let mut form = BTreeMap::new();

		form.insert("Action".to_owned(), ACTION.to_owned());
		form.insert("Version".to_owned(), API_VERSION.to_owned());
		form.insert("ClusterIdentifier".to_owned(), self.cluster_identifier.clone());
		form.insert("DbUser".to_owned(), self.db_user.clone());

		if let Some(db_name) = &self.db_name {
			form.insert("DbName".to_owned(), db_name.clone());
		}

		if let Some(auto_create) = self.auto_create {
			form.insert("AutoCreate".to_owned(), auto_create.to_string());
		}

		for (index, group) in self.db_groups.iter().enumerate() {
			form.insert(format!("DbGroups.member.{}", index + 1), group.clone());
		}

		if let Some(duration) = self.duration_seconds {
			form.insert("DurationSeconds".to_owned(), duration.to_string());
		}

		form
	}
}

enum CallAuth<'a> {
	Signed(SigningKeys<'a>),
	Bearer(&'a str),
}

fn call_auth(identity: &ResolvedCredentials) -> Result<CallAuth<'_>, ConfigError> {
	Ok(match identity {
		ResolvedCredentials::Temporary(holder) => CallAuth::Signed(SigningKeys {
			access_key_id: &holder.access_key_id,
			secret_access_key: holder.secret_access_key.expose(),
			session_token: holder.session_token.as_ref().map(SecretString::expose),
		}),
		ResolvedCredentials::Direct(holder) => CallAuth::Signed(SigningKeys {
			access_key_id: &holder.access_key_id,
			secret_access_key: holder.secret_access_key.expose(),
			session_token: holder.session_token.as_ref().map(SecretString::expose),
		}),
		ResolvedCredentials::Profile(holder) => {
			let keys = holder.session.credentials.as_ref().ok_or_else(|| {
				ConfigError::UnresolvedProfile { profile: holder.profile.clone() }
			})?;

			CallAuth::Signed(SigningKeys {
				access_key_id: &keys.access_key_id,
				secret_access_key: keys.secret_access_key.expose(),
				session_token: keys.session_token.as_ref().map(SecretString::expose),
			})
		},
		ResolvedCredentials::Native(token) => CallAuth::Bearer(token.token.expose()),
	})
}

fn regional_endpoint(region: &str) -> Result<Url, ConfigError> {
	let url = format!("https://{SERVICE}.{region}.amazonaws.com/");

	Url::parse(&url).map_err(|e| ConfigError::InvalidEndpoint { url, reason: e.to_string() })
}

fn decode_db_credentials(body: &[u8]) -> Result<DbCredentials> {
	let wire = http::decode_json::<FetchEnvelope>(ACTION, body)?.response.result;
	let expiration = OffsetDateTime::from_unix_timestamp(wire.expiration as i64)
		.map_err(|e| AuthError::MalformedResponse { action: ACTION, reason: e.to_string() })?;

	Ok(DbCredentials {
		db_user: wire.db_user,
		db_password: wire.db_password.into(),
		expiration,
	})
}

fn failure_to_error(response: &RawResponse) -> Error {
	let (code, message) = match http::decode_json::<ErrorEnvelope>(ACTION, &response.body) {
		Ok(envelope) => (envelope.error.code, envelope.error.message),
		Err(_) => (format!("HTTP {}", response.status), response.body_preview()),
	};

	match code.as_str() {
		"AccessDenied" | "AccessDeniedException" | "UnauthorizedOperation" =>
			AuthError::AccessDenied { action: ACTION, reason: message }.into(),
		"Throttling" | "ThrottlingException" | "RequestLimitExceeded" => TransportError::Upstream {
			context: ACTION,
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

#[derive(Debug, Deserialize)]
struct FetchEnvelope {
	#[serde(rename = "GetClusterCredentialsResponse")]
	response: FetchResponse,
}
#[derive(Debug, Deserialize)]
struct FetchResponse {
	#[serde(rename = "GetClusterCredentialsResult")]
	result: WireDbCredentials,
}
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireDbCredentials {
	db_user: String,
	db_password: String,
	// Epoch seconds; the Query API serializes timestamps as doubles in JSON.
	expiration: f64,
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

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		_preludet::*,
		creds::{
			AwsProfileCredentials, NativeToken, NativeTokenKind, SdkSession, SessionKeys,
			TemporaryCredentials,
		},
		error::ErrorKind,
	};

	const CREDENTIALS_BODY: &str = r#"{
		"GetClusterCredentialsResponse": {
			"GetClusterCredentialsResult": {
				"DbUser": "IAM:alice",
				"DbPassword": "ephemeral-pw",
				"Expiration": 1756000000.0
			}
		}
	}"#;

	fn temporary_identity() -> ResolvedCredentials {
		TemporaryCredentials::new(
			"ASIAEXAMPLE",
			"signing-secret",
			Some("session-token".into()),
			None,
		)
		.into()
	}

	fn request() -> ClusterCredentialsRequest {
		ClusterCredentialsRequest::new("analytics-cluster", "alice")
	}

	fn header<'a>(recorded: &'a RecordedRequest, name: &str) -> Option<&'a str> {
		recorded
			.headers
			.iter()
			.find(|(header_name, _)| header_name == name)
			.map(|(_, value)| value.as_str())
	}

	#[tokio::test]
	async fn key_identities_sign_the_call() {
		let client = RecordingClient::arc([json_ok(CREDENTIALS_BODY)]);
		let fetcher = ClusterCredentialsFetcher::with_endpoint(
			&scripted_env(client.clone()),
			"us-east-1",
			test_url("/"),
		);
		let credentials = fetcher
			.fetch(&temporary_identity(), &request())
			.await
			.expect("A 2xx envelope should decode.");

		assert_eq!(credentials.db_user, "IAM:alice");
		assert_eq!(credentials.db_password.expose(), "ephemeral-pw");
		assert_eq!(
			credentials.expiration,
			OffsetDateTime::from_unix_timestamp(1_756_000_000).expect("Epoch should map.")
		);

		let recorded = client.single_request();

		assert!(recorded.body.contains("Action=GetClusterCredentials"));
		assert!(recorded.body.contains("ClusterIdentifier=analytics-cluster"));
		assert!(recorded.body.contains("DbUser=alice"));
		assert!(
			header(&recorded, "authorization")
				.expect("The call should be signed.")
				.starts_with("AWS4-HMAC-SHA256 Credential=ASIAEXAMPLE/")
		);
		assert!(header(&recorded, "x-amz-date").is_some());
		assert_eq!(header(&recorded, "x-amz-security-token"), Some("session-token"));
		assert_eq!(header(&recorded, "accept"), Some(http::JSON));
	}

	#[tokio::test]
	async fn optional_fields_serialize_in_member_form() {
		let client = RecordingClient::arc([json_ok(CREDENTIALS_BODY)]);
		let fetcher = ClusterCredentialsFetcher::with_endpoint(
			&scripted_env(client.clone()),
			"us-east-1",
			test_url("/"),
		);
		let request = request()
			.with_db_name("analytics")
			.with_auto_create(true)
			.with_db_groups(["analysts", "readers"])
			.with_duration_seconds(900);

		fetcher
			.fetch(&temporary_identity(), &request)
			.await
			.expect("A 2xx envelope should decode.");

		let body = client.single_request().body;

		assert!(body.contains("DbName=analytics"));
		assert!(body.contains("AutoCreate=true"));
		assert!(body.contains("DbGroups.member.1=analysts&DbGroups.member.2=readers"));
		assert!(body.contains("DurationSeconds=900"));
	}

	#[tokio::test]
	async fn native_tokens_authenticate_as_bearer() {
		let client = RecordingClient::arc([json_ok(CREDENTIALS_BODY)]);
		let fetcher = ClusterCredentialsFetcher::with_endpoint(
			&scripted_env(client.clone()),
			"us-east-1",
			test_url("/"),
		);
		let identity: ResolvedCredentials =
			NativeToken::new("idc-access-token", NativeTokenKind::AccessToken, None).into();

		fetcher
			.fetch(&identity, &request())
			.await
			.expect("A 2xx envelope should decode.");

		let recorded = client.single_request();

		assert_eq!(header(&recorded, "authorization"), Some("Bearer idc-access-token"));
		assert_eq!(header(&recorded, "x-amz-date"), None);
	}

	#[tokio::test]
	async fn profiles_sign_with_their_session_keys() {
		let client = RecordingClient::arc([json_ok(CREDENTIALS_BODY)]);
		let session = SdkSession::new().with_credentials(SessionKeys {
			access_key_id: "AKIAPROFILE".into(),
			secret_access_key: "profile-secret".into(),
			session_token: None,
		});
		let identity: ResolvedCredentials = AwsProfileCredentials::new("analytics", session)
			.expect("The profile name is non-empty.")
			.into();
		let fetcher = ClusterCredentialsFetcher::with_endpoint(
			&scripted_env(client.clone()),
			"us-east-1",
			test_url("/"),
		);

		fetcher.fetch(&identity, &request()).await.expect("A 2xx envelope should decode.");

		assert!(
			header(&client.single_request(), "authorization")
				.expect("The call should be signed.")
				.starts_with("AWS4-HMAC-SHA256 Credential=AKIAPROFILE/")
		);
	}

	#[tokio::test]
	async fn unresolved_profiles_fail_before_any_call() {
		let client = RecordingClient::arc([json_ok(CREDENTIALS_BODY)]);
		let identity: ResolvedCredentials =
			AwsProfileCredentials::new("analytics", SdkSession::new())
				.expect("The profile name is non-empty.")
				.into();
		let fetcher = ClusterCredentialsFetcher::with_endpoint(
			&scripted_env(client.clone()),
			"us-east-1",
			test_url("/"),
		);
		let error = fetcher
			.fetch(&identity, &request())
			.await
			.expect_err("Signing without keys should fail.");

		assert!(matches!(
			error,
			Error::Config(ConfigError::UnresolvedProfile { ref profile }) if profile == "analytics"
		));
		assert!(client.requests().is_empty());
	}

	#[tokio::test]
	async fn denial_is_distinct_from_unreachability() {
		let denial = r#"{"Error":{"Code":"AccessDenied","Message":"User not authorized"}}"#;
		let client = RecordingClient::arc([
			status_body(403, denial),
			Err(TransportError::network(ACTION, "connection refused")),
		]);
		let env = scripted_env(client);
		let fetcher =
			ClusterCredentialsFetcher::with_endpoint(&env, "us-east-1", test_url("/"));
		let denied = fetcher
			.fetch(&temporary_identity(), &request())
			.await
			.expect_err("A 403 should fail.");
		let unreachable = fetcher
			.fetch(&temporary_identity(), &request())
			.await
			.expect_err("A transport failure should fail.");

		assert_eq!(denied.kind(), ErrorKind::Authentication);
		assert!(matches!(
			denied,
			Error::Auth(AuthError::AccessDenied { action: "GetClusterCredentials", .. })
		));
		assert_eq!(unreachable.kind(), ErrorKind::Network);
	}

	#[tokio::test]
	async fn the_session_endpoint_override_redirects_the_call() {
		let client = RecordingClient::arc([json_ok(CREDENTIALS_BODY), json_ok(CREDENTIALS_BODY)]);
		let browser = RecordingBrowser::arc();
		let env = PluginEnv::new(client.clone(), browser).with_retry(RetryPolicy::no_retry());
		let regional = ClusterCredentialsFetcher::new(&env, "eu-north-1")
			.expect("The regional endpoint should form.");
		let overridden = ClusterCredentialsFetcher::new(
			&env.clone().with_session(SdkSession::new().with_endpoint(test_url("control/"))),
			"eu-north-1",
		)
		.expect("The override should be honored.");

		regional
			.fetch(&temporary_identity(), &request())
			.await
			.expect("A 2xx envelope should decode.");
		overridden
			.fetch(&temporary_identity(), &request())
			.await
			.expect("A 2xx envelope should decode.");

		let requests = client.requests();

		assert_eq!(requests[0].url.as_str(), "https://redshift.eu-north-1.amazonaws.com/");
		assert_eq!(requests[1].url, test_url("control/"));
	}
}
