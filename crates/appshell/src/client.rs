//! Real network [`Fetch`] over reqwest, available behind the `client`
//! feature.

use async_trait::async_trait;

use crate::fetch::{Fetch, FetchError, FetchRequest, FetchResponse};

/// [`Fetch`] implementation backed by a shared [`reqwest::Client`].
///
/// Request URIs must be absolute here; relative candidate bases only make
/// sense inside a browser-like host that supplies the origin.
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
	client: reqwest::Client,
}

impl HttpFetcher {
	pub fn new() -> Self {
		Self::default()
	}

	/// Use a preconfigured client, e.g. one with timeouts or a proxy.
	pub fn with_client(client: reqwest::Client) -> Self {
		Self { client }
	}
}

#[async_trait]
impl Fetch for HttpFetcher {
	async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
		let uri = request.uri.to_string();
		let mut builder = self
			.client
			.request(request.method, uri.as_str())
			.headers(request.headers);
		if !request.body.is_empty() {
			builder = builder.body(request.body);
		}

		let response = builder
			.send()
			.await
			.map_err(|err| FetchError::network(uri.clone(), err.to_string()))?;

		let status = response.status();
		let headers = response.headers().clone();
		let body = response
			.bytes()
			.await
			.map_err(|err| FetchError::network(uri, err.to_string()))?;

		Ok(FetchResponse {
			status,
			headers,
			body,
		})
	}
}
