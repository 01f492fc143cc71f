//! Request signing for the control-plane credentials call.
//!
//! Implements the V4 HMAC-SHA256 signing process for the one request shape this crate
//! sends: a form POST with an empty query string. Pure functions over explicit inputs
//! so signatures are reproducible in tests.

// crates.io
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
// self
use crate::{_prelude::*, error::ConfigError};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Borrowed key material a request is signed with.
#[derive(Clone, Copy, Debug)]
pub struct SigningKeys<'a> {
	/// Access key identifier placed in the credential scope.
	pub access_key_id: &'a str,
	/// Secret access key feeding the derivation chain.
	pub secret_access_key: &'a str,
	/// Session token, signed alongside the request when present.
	pub session_token: Option<&'a str>,
}

/// Signs a form POST and returns the headers to attach.
///
/// Produces `x-amz-date`, `authorization`, and (when a session token is present)
/// `x-amz-security-token`. The `host` header is signed from the URL; the transport
/// sends it implicitly.
pub fn sign_post(
	keys: &SigningKeys<'_>,
	region: &str,
	service: &str,
	url: &Url,
	content_type: &str,
	body: &[u8],
	at: OffsetDateTime,
) -> Result<Vec<(&'static str, String)>, ConfigError> {
	let host = host_header(url)?;
	let (date, stamp) = amz_timestamp(at);
	let mut canonical_headers = format!("content-type:{content_type}\nhost:{host}\nx-amz-date:{stamp}\n");
	let mut signed_headers = String::from("content-type;host;x-amz-date");

	if let Some(token) = keys.session_token {
		canonical_headers.push_str(&format!("x-amz-security-token:{token}\n"));
		signed_headers.push_str(";x-amz-security-token");
	}

	// Form POSTs carry no query string; the empty component is still part of the
	// canonical request.
	let canonical_request = format!(
		"POST\n{path}\n{query}\n{canonical_headers}\n{signed_headers}\n{payload_hash}",
		path = url.path(),
		query = url.query().unwrap_or(""),
		payload_hash = hex::encode(Sha256::digest(body)),
	);
	let scope = format!("{date}/{region}/{service}/aws4_request");
	let string_to_sign = format!(
		"{ALGORITHM}\n{stamp}\n{scope}\n{hash}",
		hash = hex::encode(Sha256::digest(canonical_request.as_bytes())),
	);
	let signing_key = derive_signing_key(keys.secret_access_key, &date, region, service);
	let signature = hex::encode(hmac(&signing_key, string_to_sign.as_bytes()));
	let authorization = format!(
		"{ALGORITHM} Credential={access_key}/{scope}, SignedHeaders={signed_headers}, \
		 Signature={signature}",
		access_key = keys.access_key_id,
	);
	let mut headers = vec![("x-amz-date", stamp), ("authorization", authorization)];

	if let Some(token) = keys.session_token {
		headers.push(("x-amz-security-token", token.to_owned()));
	}

	Ok(headers)
}

/// Runs the dated key-derivation chain for one signing scope.
pub fn derive_signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
	let k_date = hmac(format!("AWS4{secret}").as_bytes(), date.as_bytes());
	let k_region = hmac(&k_date, region.as_bytes());
	let k_service = hmac(&k_region, service.as_bytes());

	hmac(&k_service, b"aws4_request")
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
	let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any size.");

	mac.update(data);

	mac.finalize().into_bytes().to_vec()
}

fn host_header(url: &Url) -> Result<String, ConfigError> {
	let host = url.host_str().ok_or_else(|| ConfigError::InvalidEndpoint {
		url: url.to_string(),
		reason: "missing host".into(),
	})?;

	Ok(match url.port() {
		Some(port) => format!("{host}:{port}"),
		None => host.to_owned(),
	})
}

fn amz_timestamp(at: OffsetDateTime) -> (String, String) {
	let date = format!("{:04}{:02}{:02}", at.year(), u8::from(at.month()), at.day());
	let stamp = format!("{date}T{:02}{:02}{:02}Z", at.hour(), at.minute(), at.second());

	(date, stamp)
}
