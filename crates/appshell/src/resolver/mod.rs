//! Endpoint resolution for serverless functions.
//!
//! The application calls backend functions by logical name. Which base path
//! serves them differs between hosting setups (platform rewrites, a
//! dedicated functions prefix, the plain default), so the resolver probes an
//! ordered candidate list, memoizes the first base that answers, and tries
//! that base first on every later call.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use itertools::Itertools;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use crate::fetch::{Fetch, FetchError, FetchRequest, FetchResponse, RequestMode};


/// Base path functions are served under when nothing else is configured.
pub const DEFAULT_BASE: &str = "/api";

/// Environment variable consulted by [`ResolverConfig::from_env`].
pub const BASE_OVERRIDE_ENV: &str = "APPSHELL_FUNCTIONS_BASE";

/// Error type for endpoint resolution
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
	#[error("function '{function}' not found under '{base}'")]
	NotFoundAtBase { base: String, function: String },
	#[error("request to '{url}' failed: {source}")]
	Network {
		url: String,
		#[source]
		source: FetchError,
	},
	#[error("failed to encode request body: {0}")]
	Encode(#[from] serde_json::Error),
	/// Unreachable with a default-carrying config; exists so exhaustion
	/// without a recorded error still has a value to return.
	#[error("no endpoint candidates configured")]
	NoCandidates,
}

/// Where to look for functions.
#[derive(Debug, Clone, Default)]
pub struct ResolverConfig {
	/// Explicit base-path override, tried before the default.
	pub base_override: Option<String>,
}

impl ResolverConfig {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_base_override(mut self, base: impl Into<String>) -> Self {
		self.base_override = Some(base.into());
		self
	}

	/// Read the override from `APPSHELL_FUNCTIONS_BASE`; unset or empty
	/// means no override.
	pub fn from_env() -> Self {
		let base_override = std::env::var(BASE_OVERRIDE_ENV)
			.ok()
			.filter(|value| !value.is_empty());
		Self { base_override }
	}

	/// Configured candidates in probe order: the override if any, then the
	/// default, deduplicated.
	pub fn candidates(&self) -> Vec<String> {
		self.base_override
			.iter()
			.cloned()
			.chain(std::iter::once(DEFAULT_BASE.to_string()))
			.unique()
			.collect()
	}
}

/// Request options for [`EndpointResolver::call`]. The resolver builds a
/// fresh request from these per attempt, so a retry against the next
/// candidate never sees anything a previous attempt did.
#[derive(Debug, Clone)]
pub struct CallOptions {
	pub method: Method,
	pub headers: HeaderMap,
	pub body: Bytes,
}

impl Default for CallOptions {
	fn default() -> Self {
		Self {
			method: Method::GET,
			headers: HeaderMap::new(),
			body: Bytes::new(),
		}
	}
}

impl CallOptions {
	pub fn new(method: Method) -> Self {
		Self {
			method,
			..Self::default()
		}
	}

	pub fn with_header(mut self, name: http::header::HeaderName, value: HeaderValue) -> Self {
		self.headers.insert(name, value);
		self
	}

	pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
		self.body = body.into();
		self
	}
}

/// Result of a JSON convenience call: the raw response plus its leniently
/// parsed body. `data` is an empty object when the body was empty or not
/// JSON; callers treat missing fields as the signal.
#[derive(Debug)]
pub struct JsonCall {
	pub response: FetchResponse,
	pub data: Value,
}

/// Resolves and calls named serverless functions.
///
/// The memoized base lives on the instance rather than in process-global
/// state, so independent resolvers cannot leak resolution results into each
/// other. The memo is a last-writer-wins register: concurrent calls may race
/// to set it, and any value they store is a base that just answered.
pub struct EndpointResolver {
	config: ResolverConfig,
	fetch: Arc<dyn Fetch>,
	resolved_base: Mutex<Option<String>>,
}

impl EndpointResolver {
	pub fn new(fetch: Arc<dyn Fetch>, config: ResolverConfig) -> Self {
		Self {
			config,
			fetch,
			resolved_base: Mutex::new(None),
		}
	}

	/// The base path that served the most recent answered call, if any.
	pub fn resolved_base(&self) -> Option<String> {
		self.resolved_base.lock().clone()
	}

	/// Seed or clear the memo, e.g. with a known-good base carried over
	/// from a previous session.
	pub fn set_resolved_base(&self, base: Option<String>) {
		*self.resolved_base.lock() = base;
	}

	/// Probe order for the next call: the memoized base first if present,
	/// then the configured candidates, deduplicated.
	fn candidate_order(&self) -> Vec<String> {
		let memo = self.resolved_base.lock().clone();
		memo.into_iter()
			.chain(self.config.candidates())
			.unique()
			.collect()
	}

	/// Call `function` under the first candidate base that answers.
	///
	/// A 404 means "not served here" and moves on to the next candidate, as
	/// does a transport failure. Any other status is that base's definitive
	/// answer: the base is memoized and the response returned as-is, error
	/// statuses included. Once every candidate is exhausted the last
	/// recorded error is returned.
	pub async fn call(
		&self,
		function: &str,
		options: CallOptions,
	) -> Result<FetchResponse, ResolveError> {
		let function = function.trim_start_matches('/');
		let mut last_error = None;

		for base in self.candidate_order() {
			let url = join_base(&base, function);
			let request = match build_request(&url, &options) {
				Ok(request) => request,
				Err(source) => {
					tracing::debug!("skipping malformed candidate url '{}': {}", url, source);
					last_error = Some(ResolveError::Network { url, source });
					continue;
				},
			};
			match self.fetch.fetch(request).await {
				Err(source) => {
					tracing::debug!("candidate '{}' unreachable: {}", base, source);
					last_error = Some(ResolveError::Network { url, source });
				},
				Ok(response) if response.status == StatusCode::NOT_FOUND => {
					tracing::debug!("function '{}' not found under '{}'", function, base);
					last_error = Some(ResolveError::NotFoundAtBase {
						base,
						function: function.to_string(),
					});
				},
				Ok(response) => {
					tracing::debug!("function '{}' resolved under '{}'", function, base);
					*self.resolved_base.lock() = Some(base);
					return Ok(response);
				},
			}
		}
		Err(last_error.unwrap_or(ResolveError::NoCandidates))
	}

	/// JSON convenience over [`EndpointResolver::call`]: POSTs `body` as
	/// JSON and parses the response leniently.
	pub async fn call_json<T: Serialize + ?Sized>(
		&self,
		function: &str,
		body: &T,
	) -> Result<JsonCall, ResolveError> {
		self.call_json_with(function, body, CallOptions::new(Method::POST))
			.await
	}

	/// [`EndpointResolver::call_json`] with explicit options. Headers the
	/// caller set win over the JSON content-type; the options body is
	/// replaced by the serialized one.
	pub async fn call_json_with<T: Serialize + ?Sized>(
		&self,
		function: &str,
		body: &T,
		options: CallOptions,
	) -> Result<JsonCall, ResolveError> {
		let payload = serde_json::to_vec(body)?;
		let mut options = options.with_body(payload);
		if !options.headers.contains_key(CONTENT_TYPE) {
			options
				.headers
				.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
		}

		let response = self.call(function, options).await?;
		let data = match serde_json::from_slice::<Value>(&response.body) {
			Ok(data) => data,
			Err(err) => {
				tracing::debug!(
					"response from '{}' is not json ({}), yielding empty object",
					function,
					err
				);
				Value::Object(serde_json::Map::new())
			},
		};
		Ok(JsonCall { response, data })
	}
}

impl fmt::Debug for EndpointResolver {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("EndpointResolver")
			.field("config", &self.config)
			.field("resolved_base", &self.resolved_base())
			.finish_non_exhaustive()
	}
}

/// Join a base path and a function name without doubling slashes.
fn join_base(base: &str, function: &str) -> String {
	format!(
		"{}/{}",
		base.trim_end_matches('/'),
		function.trim_start_matches('/')
	)
}

fn build_request(url: &str, options: &CallOptions) -> Result<FetchRequest, FetchError> {
	let uri: Uri = url
		.parse()
		.map_err(|err: http::uri::InvalidUri| FetchError::InvalidRequest(err.to_string()))?;
	Ok(FetchRequest {
		method: options.method.clone(),
		uri,
		headers: options.headers.clone(),
		body: options.body.clone(),
		mode: RequestMode::Cors,
	})
}
