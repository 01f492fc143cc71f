//! Transport primitives for identity-provider and control-plane calls.
//!
//! [`AuthHttpClient`] is the crate's only dependency on an HTTP stack. Every outbound
//! exchange in this crate is a POST (Query-API forms, OAuth token forms, or JSON
//! bodies), so the trait exposes a single [`post`](AuthHttpClient::post) operation and
//! returns the raw status, retry hint, and body for the caller to classify.
//! [`send_with_retry`] layers the fixed transport retry policy on top; authorization
//! decisions are never retried there, only network failures and retryable statuses.

// crates.io
#[cfg(feature = "reqwest")] use reqwest::header::{CONTENT_TYPE, HeaderMap, RETRY_AFTER};
use serde::de::DeserializeOwned;
#[cfg(feature = "reqwest")] use time::format_description::well_known::Rfc2822;
// self
use crate::{
	_prelude::*,
	error::{AuthError, ConfigError, TransportError},
};

/// `Content-Type` for URL-encoded form posts.
pub const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";
/// `Content-Type` for JSON posts.
pub const JSON: &str = "application/json";
/// Longest response-body preview embedded in error messages.
const BODY_PREVIEW_LIMIT: usize = 256;

/// Boxed future returned by [`AuthHttpClient`] implementations.
pub type HttpFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TransportError>> + 'a + Send>>;

/// Abstraction over HTTP transports capable of executing the crate's outbound calls.
///
/// Implementations are shared behind `Arc<dyn AuthHttpClient>` across plugins, the
/// role-assumption client, and the fetcher, so the trait is object-safe and carries no
/// associated types. The `context` on each request names the API action being called
/// and must be threaded into any transport error the implementation produces.
pub trait AuthHttpClient
where
	Self: Send + Sync,
{
	/// Executes a POST and returns the raw response regardless of status.
	///
	/// Implementations must only fail for transport-level problems (DNS, TCP, TLS,
	/// body streaming); non-2xx statuses are data, not errors.
	fn post<'a>(&'a self, request: OutboundRequest<'a>) -> HttpFuture<'a, RawResponse>;
}

/// One outbound POST, borrowed from the flow that issues it.
#[derive(Clone, Copy, Debug)]
pub struct OutboundRequest<'a> {
	/// API action or endpoint label, used in error context and spans.
	pub context: &'static str,
	/// Target URL.
	pub url: &'a Url,
	/// `Content-Type` of the body.
	pub content_type: &'static str,
	/// Additional headers (authorization, dates, accept hints).
	pub headers: &'a [(&'static str, String)],
	/// Encoded request body.
	pub body: &'a [u8],
}

/// Raw response captured by the transport: status, retry hint, body.
#[derive(Clone, Debug)]
pub struct RawResponse {
	/// HTTP status code.
	pub status: u16,
	/// Relative `Retry-After` hint, when the server sent one.
	pub retry_after: Option<Duration>,
	/// Response body bytes.
	pub body: Vec<u8>,
}
impl RawResponse {
	/// Returns `true` for 2xx statuses.
	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}

	/// Lossy body preview truncated for embedding in error messages.
	pub fn body_preview(&self) -> String {
		let text = String::from_utf8_lossy(&self.body);
		let mut preview = text.trim().to_owned();

		if preview.len() > BODY_PREVIEW_LIMIT {
			let mut cut = BODY_PREVIEW_LIMIT;

			while !preview.is_char_boundary(cut) {
				cut -= 1;
			}

			preview.truncate(cut);
			preview.push('…');
		}

		preview
	}
}

/// Fixed retry policy for transport sends.
///
/// Only network failures and retryable statuses (429, 5xx) consume attempts; every
/// other status is returned to the caller untouched.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
	/// Total attempts, including the first.
	pub max_attempts: u32,
	/// Backoff before the second attempt.
	pub initial_backoff: Duration,
	/// Upper bound for any single backoff.
	pub max_backoff: Duration,
}
impl RetryPolicy {
	/// Policy that sends exactly once.
	pub fn no_retry() -> Self {
		Self { max_attempts: 1, ..Default::default() }
	}

	/// Backoff before attempt `next_attempt` (1-based), jittered.
	fn backoff_before(&self, next_attempt: u32) -> Duration {
		let exponent = next_attempt.saturating_sub(2).min(16);
		let base = self.initial_backoff.saturating_mul(1 << exponent).min(self.max_backoff);
		let jitter_ms = base.whole_milliseconds().max(0) as u64 / 4;

		base + Duration::milliseconds(rand::random_range(0..=jitter_ms) as i64)
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_attempts: 3,
			initial_backoff: Duration::milliseconds(500),
			max_backoff: Duration::seconds(5),
		}
	}
}

/// Sends `request`, retrying network failures and retryable statuses per `policy`.
///
/// A server-provided `Retry-After` hint overrides the computed backoff for that
/// attempt. The final failure carries the attempt count.
pub async fn send_with_retry(
	client: &dyn AuthHttpClient,
	policy: RetryPolicy,
	request: OutboundRequest<'_>,
) -> Result<RawResponse, TransportError> {
	let mut attempt = 0;

	loop {
		attempt += 1;

		let failure = match client.post(request).await {
			Ok(response) if response.status == 429 || response.status >= 500 =>
				Ok(response),
			Ok(response) => return Ok(response),
			Err(error) => Err(error),
		};

		if attempt >= policy.max_attempts {
			return match failure {
				Ok(response) => Err(TransportError::Upstream {
					context: request.context,
					status: response.status,
					attempts: attempt,
					message: response.body_preview(),
				}),
				Err(error) => Err(error),
			};
		}

		let backoff = match &failure {
			Ok(response) => response.retry_after.unwrap_or_else(|| policy.backoff_before(attempt + 1)),
			Err(_) => policy.backoff_before(attempt + 1),
		};

		tokio::time::sleep(backoff.unsigned_abs()).await;
	}
}

/// Decodes a JSON payload, reporting the failing path in the error message.
pub(crate) fn decode_json<T>(action: &'static str, body: &[u8]) -> Result<T, AuthError>
where
	T: DeserializeOwned,
{
	let deserializer = &mut serde_json::Deserializer::from_slice(body);

	serde_path_to_error::deserialize(deserializer)
		.map_err(|e| AuthError::MalformedResponse { action, reason: e.to_string() })
}

/// Encodes a form body deterministically from sorted pairs.
pub(crate) fn encode_form<K: AsRef<str>>(pairs: &BTreeMap<K, String>) -> String {
	let mut serializer = url::form_urlencoded::Serializer::new(String::new());

	for (name, value) in pairs {
		serializer.append_pair(name.as_ref(), value);
	}

	serializer.finish()
}

/// Thin wrapper around [`ReqwestClient`] so shared HTTP behavior lives in one place.
/// Token and Query-API endpoints answer directly rather than redirecting, so custom
/// clients should disable redirect following before being wrapped here.
#[cfg(feature = "reqwest")]
#[derive(Clone, Default)]
pub struct ReqwestHttpClient(pub ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestHttpClient {
	/// Wraps an existing [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}

	/// Builds a client that skips certificate verification.
	///
	/// Backs the `ssl_insecure` connection option; only for identity providers behind
	/// self-signed corporate certificates.
	pub fn insecure() -> Result<Self, ConfigError> {
		let client = ReqwestClient::builder()
			.danger_accept_invalid_certs(true)
			.build()
			.map_err(ConfigError::http_client_build)?;

		Ok(Self(client))
	}
}
#[cfg(feature = "reqwest")]
impl AsRef<ReqwestClient> for ReqwestHttpClient {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl AuthHttpClient for ReqwestHttpClient {
	fn post<'a>(&'a self, request: OutboundRequest<'a>) -> HttpFuture<'a, RawResponse> {
		Box::pin(async move {
			let mut builder = self
				.0
				.post(request.url.clone())
				.header(CONTENT_TYPE, request.content_type)
				.body(request.body.to_vec());

			for (name, value) in request.headers {
				builder = builder.header(*name, value);
			}

			let response = builder
				.send()
				.await
				.map_err(|e| TransportError::network(request.context, e))?;
			let status = response.status().as_u16();
			let retry_after = parse_retry_after(response.headers());
			let body = response
				.bytes()
				.await
				.map_err(|e| TransportError::network(request.context, e))?
				.to_vec();

			Ok(RawResponse { status, retry_after, body })
		})
	}
}

#[cfg(feature = "reqwest")]
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
	let value = headers.get(RETRY_AFTER)?;
	let raw = value.to_str().ok()?.trim();

	if let Ok(secs) = raw.parse::<u64>() {
		return Some(Duration::seconds(secs as i64));
	}
	if let Ok(moment) = OffsetDateTime::parse(raw, &Rfc2822) {
		let delta = moment - OffsetDateTime::now_utc();

		if delta.is_positive() {
			return Some(delta);
		}
	}

	None
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::{AtomicU32, Ordering};
	// self
	use super::*;

	struct ScriptedClient {
		calls: AtomicU32,
		script: Vec<Result<RawResponse, TransportError>>,
	}
	impl ScriptedClient {
		fn new(script: Vec<Result<RawResponse, TransportError>>) -> Self {
			Self { calls: AtomicU32::new(0), script }
		}

		fn calls(&self) -> u32 {
			self.calls.load(Ordering::SeqCst)
		}
	}
	impl AuthHttpClient for ScriptedClient {
		fn post<'a>(&'a self, _request: OutboundRequest<'a>) -> HttpFuture<'a, RawResponse> {
			let index = self.calls.fetch_add(1, Ordering::SeqCst) as usize;

			Box::pin(async move {
				self.script
					.get(index)
					.cloned()
					.unwrap_or_else(|| panic!("Scripted client ran out of responses."))
			})
		}
	}

	fn ok(status: u16, body: &str) -> Result<RawResponse, TransportError> {
		Ok(RawResponse { status, retry_after: None, body: body.as_bytes().to_vec() })
	}

	fn request(url: &Url) -> OutboundRequest<'_> {
		OutboundRequest {
			context: "TestAction",
			url,
			content_type: FORM_URLENCODED,
			headers: &[],
			body: b"",
		}
	}

	#[tokio::test]
	async fn retries_retryable_statuses_then_succeeds() {
		let url = Url::parse("https://svc.example/").expect("Fixture URL should parse.");
		let client = ScriptedClient::new(vec![ok(503, "busy"), ok(200, "done")]);
		let policy = RetryPolicy {
			initial_backoff: Duration::milliseconds(1),
			..Default::default()
		};
		let response = send_with_retry(&client, policy, request(&url))
			.await
			.expect("Second attempt should succeed.");

		assert_eq!(response.status, 200);
		assert_eq!(client.calls(), 2);
	}

	#[tokio::test]
	async fn exhausted_budget_reports_attempts() {
		let url = Url::parse("https://svc.example/").expect("Fixture URL should parse.");
		let client = ScriptedClient::new(vec![ok(500, "a"), ok(500, "b"), ok(500, "c")]);
		let policy = RetryPolicy {
			initial_backoff: Duration::milliseconds(1),
			..Default::default()
		};
		let error = send_with_retry(&client, policy, request(&url))
			.await
			.expect_err("Budget exhaustion should fail.");

		assert!(matches!(
			error,
			TransportError::Upstream { status: 500, attempts: 3, .. }
		));
		assert_eq!(client.calls(), 3);
	}

	#[tokio::test]
	async fn client_errors_are_not_retried() {
		let url = Url::parse("https://svc.example/").expect("Fixture URL should parse.");
		let client = ScriptedClient::new(vec![ok(403, "denied")]);
		let response = send_with_retry(&client, RetryPolicy::default(), request(&url))
			.await
			.expect("4xx should be returned as data.");

		assert_eq!(response.status, 403);
		assert_eq!(client.calls(), 1);
	}

	#[test]
	fn body_preview_truncates_on_char_boundary() {
		let body = "é".repeat(300);
		let response = RawResponse { status: 200, retry_after: None, body: body.into_bytes() };
		let preview = response.body_preview();

		assert!(preview.chars().count() <= BODY_PREVIEW_LIMIT + 1);
		assert!(preview.ends_with('…'));
	}

	#[test]
	fn form_encoding_is_deterministic() {
		let mut pairs = BTreeMap::new();

		pairs.insert("Action", "GetClusterCredentials".to_owned());
		pairs.insert("DbUser", "alice liddell".to_owned());

		assert_eq!(encode_form(&pairs), "Action=GetClusterCredentials&DbUser=alice+liddell");
	}
}
