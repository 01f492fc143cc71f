//! Identity plumbing for a cloud data-warehouse driver, from connection options to the
//! ephemeral database credentials that open the wire session.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod cache;
pub mod creds;
pub mod error;
pub mod fetcher;
pub mod http;
pub mod manager;
pub mod obs;
pub mod plugin;
pub mod sign;
pub mod sts;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Offline transport and browser doubles for tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// self
	use crate::{
		http::{AuthHttpClient, HttpFuture, OutboundRequest, RawResponse, RetryPolicy},
		plugin::{BrowserLauncher, PluginEnv},
	};

	/// Deterministic HTTPS base for offline request assertions.
	///
	/// Relative paths join the same base, so `test_url("idc/")` joined with
	/// `client/register` equals `test_url("idc/client/register")`.
	pub fn test_url(path: &str) -> Url {
		Url::parse("https://mock.warehouse.test/")
			.expect("The test base URL should parse.")
			.join(path)
			.expect("The test path should join the base URL.")
	}

	/// 200 script entry carrying a JSON body.
	pub fn json_ok(body: &str) -> Result<RawResponse, TransportError> {
		status_body(200, body)
	}

	/// Script entry with an explicit status and body.
	pub fn status_body(status: u16, body: &str) -> Result<RawResponse, TransportError> {
		Ok(RawResponse { status, retry_after: None, body: body.as_bytes().to_vec() })
	}

	/// Transport that never reaches the network; every send fails.
	///
	/// For tests that only exercise construction and validation.
	pub fn offline_client() -> Arc<dyn AuthHttpClient> {
		RecordingClient::arc([])
	}

	/// Environment around [`offline_client`] and a recording launcher.
	pub fn offline_env() -> PluginEnv {
		PluginEnv::new(offline_client(), RecordingBrowser::arc())
	}

	/// Environment around a scripted transport, with retries disabled so scripts stay
	/// aligned one-to-one with attempts.
	pub fn scripted_env(client: Arc<RecordingClient>) -> PluginEnv {
		PluginEnv::new(client, RecordingBrowser::arc()).with_retry(RetryPolicy::no_retry())
	}

	/// One POST captured by [`RecordingClient`], with the body decoded lossily.
	#[derive(Clone, Debug)]
	pub struct RecordedRequest {
		/// API action the caller attached to the request.
		pub context: &'static str,
		/// Target URL.
		pub url: Url,
		/// `Content-Type` of the body.
		pub content_type: &'static str,
		/// Extra headers in send order.
		pub headers: Vec<(String, String)>,
		/// Body as text.
		pub body: String,
	}

	/// Transport double that records every request and answers from a fixed script.
	///
	/// Once the script is exhausted, further sends fail like an unreachable host.
	#[derive(Default)]
	pub struct RecordingClient {
		script: Mutex<Vec<Result<RawResponse, TransportError>>>,
		requests: Mutex<Vec<RecordedRequest>>,
	}
	impl RecordingClient {
		/// Shared client answering with `script` in order.
		pub fn arc<I>(script: I) -> Arc<Self>
		where
			I: IntoIterator<Item = Result<RawResponse, TransportError>>,
		{
			Arc::new(Self {
				script: Mutex::new(script.into_iter().collect()),
				requests: Mutex::new(Vec::new()),
			})
		}

		/// Every request recorded so far, in send order.
		pub fn requests(&self) -> Vec<RecordedRequest> {
			self.requests.lock().clone()
		}

		/// The one request a single-call test expects.
		pub fn single_request(&self) -> RecordedRequest {
			let mut requests = self.requests();

			assert_eq!(requests.len(), 1, "Expected exactly one recorded request.");

			requests.remove(0)
		}
	}
	impl AuthHttpClient for RecordingClient {
		fn post<'a>(&'a self, request: OutboundRequest<'a>) -> HttpFuture<'a, RawResponse> {
			self.requests.lock().push(RecordedRequest {
				context: request.context,
				url: request.url.clone(),
				content_type: request.content_type,
				headers: request
					.headers
					.iter()
					.map(|(name, value)| ((*name).to_owned(), value.clone()))
					.collect(),
				body: String::from_utf8_lossy(request.body).into_owned(),
			});

			let next = {
				let mut script = self.script.lock();

				if script.is_empty() { None } else { Some(script.remove(0)) }
			};

			Box::pin(async move {
				next.unwrap_or_else(|| {
					Err(TransportError::network(request.context, "No scripted response remains."))
				})
			})
		}
	}

	/// Launcher double that records each URL instead of opening a browser.
	#[derive(Debug, Default)]
	pub struct RecordingBrowser {
		opened: Mutex<Vec<Url>>,
	}
	impl RecordingBrowser {
		/// Shared launcher with an empty record.
		pub fn arc() -> Arc<Self> {
			Arc::new(Self::default())
		}

		/// Every URL launched so far, in order.
		pub fn opened(&self) -> Vec<Url> {
			self.opened.lock().clone()
		}
	}
	impl BrowserLauncher for RecordingBrowser {
		fn open(&self, url: &Url) -> Result<(), AuthError> {
			self.opened.lock().push(url.clone());

			Ok(())
		}
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::Client as ReqwestClient;
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{AuthError, ConfigError, Error, Result, TransportError};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use httpmock as _;
