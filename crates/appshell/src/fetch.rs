//! Request/response vocabulary shared by the cache controller and the
//! endpoint resolver, and the network seam both are driven through.

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{ACCEPT, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};

/// Error type for network fetches
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
	#[error("request to '{uri}' failed: {message}")]
	Network { uri: String, message: String },
	#[error("invalid request: {0}")]
	InvalidRequest(String),
}

impl FetchError {
	pub fn network(uri: impl Into<String>, message: impl Into<String>) -> Self {
		Self::Network {
			uri: uri.into(),
			message: message.into(),
		}
	}
}

/// How a request was initiated. Only [`RequestMode::Navigate`] influences
/// routing; the other modes are carried through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
	/// Top-level document navigation.
	Navigate,
	/// Same-origin subresource load.
	SameOrigin,
	/// Cross-origin capable request.
	Cors,
	#[default]
	NoCors,
}

/// A request as seen by the interception layer.
#[derive(Debug, Clone)]
pub struct FetchRequest {
	pub method: Method,
	pub uri: Uri,
	pub headers: HeaderMap,
	pub body: Bytes,
	pub mode: RequestMode,
}

impl FetchRequest {
	pub fn new(method: Method, uri: Uri) -> Self {
		Self {
			method,
			uri,
			headers: HeaderMap::new(),
			body: Bytes::new(),
			mode: RequestMode::default(),
		}
	}

	/// A plain GET, the shape the cache controller stores.
	pub fn get(uri: Uri) -> Self {
		Self::new(Method::GET, uri)
	}

	/// A top-level navigation GET with an HTML `Accept` header.
	pub fn navigate(uri: Uri) -> Self {
		let mut request = Self::new(Method::GET, uri);
		request.mode = RequestMode::Navigate;
		request.headers.insert(
			ACCEPT,
			HeaderValue::from_static("text/html,application/xhtml+xml"),
		);
		request
	}

	pub fn with_header(mut self, name: http::header::HeaderName, value: HeaderValue) -> Self {
		self.headers.insert(name, value);
		self
	}

	pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
		self.body = body.into();
		self
	}

	/// True for navigation-mode requests and for requests whose `Accept`
	/// header asks for an HTML document.
	pub fn is_navigation(&self) -> bool {
		if self.mode == RequestMode::Navigate {
			return true;
		}
		self.headers
			.get(ACCEPT)
			.and_then(|accept| accept.to_str().ok())
			.is_some_and(|accept| accept.contains("text/html"))
	}
}

/// A response as stored in and served from cache partitions.
#[derive(Debug, Clone)]
pub struct FetchResponse {
	pub status: StatusCode,
	pub headers: HeaderMap,
	pub body: Bytes,
}

impl FetchResponse {
	pub fn new(status: StatusCode) -> Self {
		Self {
			status,
			headers: HeaderMap::new(),
			body: Bytes::new(),
		}
	}

	/// A 200 response with the given body.
	pub fn ok(body: impl Into<Bytes>) -> Self {
		Self::new(StatusCode::OK).with_body(body)
	}

	pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
		self.body = body.into();
		self
	}

	pub fn with_header(mut self, name: http::header::HeaderName, value: HeaderValue) -> Self {
		self.headers.insert(name, value);
		self
	}

	/// The `Content-Type` header value, if present and valid UTF-8.
	pub fn content_type(&self) -> Option<&str> {
		self.headers
			.get(CONTENT_TYPE)
			.and_then(|value| value.to_str().ok())
	}
}

/// Network seam. The controller and resolver never talk to the network
/// directly; they go through this trait so tests can script responses and
/// count calls.
#[async_trait]
pub trait Fetch: Send + Sync {
	/// Perform the request. Transport failures (unreachable host, reset
	/// connection) surface as `Err`; HTTP error statuses are `Ok` responses.
	async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError>;
}
