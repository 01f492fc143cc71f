//! Ephemeral loopback listener that receives one federation callback.

// std
use std::io;
// crates.io
use tokio::{
	io::{AsyncReadExt, AsyncWriteExt},
	net::{TcpListener, TcpStream},
	time,
};
// self
use crate::{
	_prelude::*,
	error::{AuthError, TransportError},
};

const MAX_REQUEST_BYTES: usize = 8192;

/// Query parameters delivered by the federation callback.
#[derive(Clone, Debug)]
pub struct CallbackQuery(BTreeMap<String, String>);
impl CallbackQuery {
	/// Returns a callback parameter, if the provider sent it.
	pub fn get(&self, name: &str) -> Option<&str> {
		self.0.get(name).map(String::as_str)
	}

	/// Maps a provider-reported `error` parameter, when present.
	pub fn provider_error(&self) -> Option<AuthError> {
		let error = self.get("error")?;
		let reason = match self.get("error_description") {
			Some(description) if !description.is_empty() => format!("{error}: {description}"),
			_ => error.to_owned(),
		};

		Some(AuthError::ProviderRejected { reason, status: None })
	}
}

/// Bound loopback listener for one in-flight browser login.
///
/// The socket is owned by this value; dropping it on any exit path releases the port.
pub struct CallbackListener {
	listener: TcpListener,
	port: u16,
}
impl CallbackListener {
	/// Binds the loopback listener; port `0` picks an ephemeral one.
	pub async fn bind(port: u16) -> Result<Self, TransportError> {
		let listener =
			TcpListener::bind(("127.0.0.1", port)).await.map_err(TransportError::listener)?;
		let port = listener.local_addr().map_err(TransportError::listener)?.port();

		Ok(Self { listener, port })
	}

	/// The bound port, for building redirect URIs.
	pub fn port(&self) -> u16 {
		self.port
	}

	/// Serves connections until one GET carries an expected parameter (or `error`),
	/// or the window elapses.
	///
	/// Non-matching requests (other methods, `favicon.ico`, bare probes) are answered
	/// 404 and the wait continues. The browser tab receives a self-closing page on a
	/// matching callback and an error page when the provider reported a failure.
	pub async fn wait_for_callback(
		&self,
		expected: &[&str],
		window: Duration,
	) -> Result<CallbackQuery> {
		time::timeout(window.unsigned_abs(), self.serve(expected))
			.await
			.map_err(|_| Error::AuthTimeout { waited: window })?
	}

	async fn serve(&self, expected: &[&str]) -> Result<CallbackQuery> {
		loop {
			let (mut stream, _) =
				self.listener.accept().await.map_err(|e| Error::from(TransportError::listener(e)))?;

			// Browsers pre-open and reset connections; a failed exchange on one
			// connection never aborts the wait.
			match Self::handle_connection(&mut stream, expected).await {
				Ok(Some(query)) => return Ok(query),
				Ok(None) | Err(_) => continue,
			}
		}
	}

	async fn handle_connection(
		stream: &mut TcpStream,
		expected: &[&str],
	) -> io::Result<Option<CallbackQuery>> {
		let mut buffer = Vec::with_capacity(1024);
		let mut chunk = [0_u8; 1024];

		loop {
			let read = stream.read(&mut chunk).await?;

			if read == 0 {
				break;
			}

			buffer.extend_from_slice(&chunk[..read]);

			if buffer.windows(4).any(|window| window == b"\r\n\r\n")
				|| buffer.len() > MAX_REQUEST_BYTES
			{
				break;
			}
		}

		let head = String::from_utf8_lossy(&buffer);
		let Some(query) = Self::parse_get_query(&head) else {
			respond(stream, "404 Not Found", not_found_html()).await?;

			return Ok(None);
		};

		if let Some(error) = query.get("error") {
			let description = query.get("error_description").unwrap_or("");

			respond(stream, "200 OK", &error_html(error, description)).await?;

			return Ok(Some(query));
		}
		if expected.iter().any(|name| query.get(name).is_some()) {
			respond(stream, "200 OK", success_html()).await?;

			return Ok(Some(query));
		}

		respond(stream, "404 Not Found", not_found_html()).await?;

		Ok(None)
	}

	fn parse_get_query(head: &str) -> Option<CallbackQuery> {
		let request_line = head.lines().next()?;
		let mut parts = request_line.split_whitespace();

		if parts.next()? != "GET" {
			return None;
		}

		let target = parts.next()?;
		let (_, raw_query) = target.split_once('?')?;
		let pairs = url::form_urlencoded::parse(raw_query.as_bytes())
			.map(|(name, value)| (name.into_owned(), value.into_owned()))
			.collect::<BTreeMap<_, _>>();

		if pairs.is_empty() { None } else { Some(CallbackQuery(pairs)) }
	}
}
impl Debug for CallbackListener {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CallbackListener").field("port", &self.port).finish()
	}
}

async fn respond(stream: &mut TcpStream, status: &str, body: &str) -> io::Result<()> {
	let response = format!(
		"HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: \
		 {length}\r\nConnection: close\r\n\r\n{body}",
		length = body.len(),
	);

	stream.write_all(response.as_bytes()).await?;
	stream.shutdown().await
}

fn success_html() -> &'static str {
	"<!DOCTYPE html>\n<html>\n<head><title>Login complete</title></head>\n<body>\n<p>Identity \
	 provider login complete. You can close this window and return to your client.</p>\n<script>\
	 window.close();</script>\n</body>\n</html>"
}

fn error_html(error: &str, description: &str) -> String {
	format!(
		"<!DOCTYPE html>\n<html>\n<head><title>Login failed</title></head>\n<body>\n<p>Identity \
		 provider reported <code>{}</code>: {}</p>\n<p>Close this window and check your client \
		 for details.</p>\n</body>\n</html>",
		html_escape(error),
		html_escape(description),
	)
}

fn not_found_html() -> &'static str {
	"<!DOCTYPE html>\n<html><body><p>Not found.</p></body></html>"
}

fn html_escape(raw: &str) -> String {
	raw.replace('&', "&amp;")
		.replace('<', "&lt;")
		.replace('>', "&gt;")
		.replace('"', "&quot;")
		.replace('\'', "&#39;")
}
