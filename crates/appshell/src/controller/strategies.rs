//! The two serving strategies behind fetch interception.
//!
//! Failure handling is asymmetric on purpose: navigation failures degrade
//! through cache layers down to the offline document, while asset failures
//! surface to the caller once the cache has nothing. Storage failures on
//! either path are logged and swallowed.

use std::sync::Arc;

use http::StatusCode;

use super::CacheController;
use crate::cache::{CacheError, CachePartition, RequestKey};
use crate::fetch::{FetchError, FetchRequest, FetchResponse};

impl CacheController {
	/// Network-first, for navigations. Fresh documents are returned without
	/// being stored. On network failure: exact cached match, then the
	/// offline fallback document, then the original error.
	pub(super) async fn serve_network_first(
		&self,
		request: &FetchRequest,
	) -> Result<FetchResponse, FetchError> {
		let err = match self.fetch.fetch(request.clone()).await {
			Ok(response) => return Ok(response),
			Err(err) => err,
		};
		tracing::warn!(
			"navigation fetch for '{}' failed, trying cache: {}",
			request.uri,
			err
		);

		let key = RequestKey::new(request.method.clone(), &request.uri);
		if let Some(cached) = self.cached_response(&key).await {
			return Ok(cached);
		}
		let fallback = RequestKey::get(&self.config.offline_fallback);
		if let Some(offline) = self.cached_response(&fallback).await {
			return Ok(offline);
		}
		Err(err)
	}

	/// Cache-first, for assets. Misses go to the network; 200 responses are
	/// stored in the dynamic partition and the entry bound re-established.
	/// Non-200 responses flow back unstored.
	pub(super) async fn serve_cache_first(
		&self,
		request: &FetchRequest,
	) -> Result<FetchResponse, FetchError> {
		let key = RequestKey::new(request.method.clone(), &request.uri);
		if let Some(cached) = self.cached_response(&key).await {
			return Ok(cached);
		}

		let response = match self.fetch.fetch(request.clone()).await {
			Ok(response) => response,
			Err(err) => {
				tracing::warn!("asset fetch for '{}' failed: {}", request.uri, err);
				return Err(err);
			},
		};
		if response.status == StatusCode::OK {
			self.store_dynamic(key, response.clone()).await;
		}
		Ok(response)
	}

	/// Best-effort insert into the dynamic partition followed by eviction
	/// back to the configured bound.
	async fn store_dynamic(&self, key: RequestKey, response: FetchResponse) {
		let name = self.config.cache_names().dynamic_partition();
		let partition = match self.storage.open(&name).await {
			Ok(partition) => partition,
			Err(err) => {
				tracing::warn!("failed to open cache partition '{}': {}", name, err);
				return;
			},
		};
		if let Err(err) = partition.put(key, response).await {
			tracing::warn!("failed to store response in '{}': {}", name, err);
			return;
		}
		if let Err(err) = self.evict_to_bound(partition.as_ref()).await {
			tracing::warn!("failed to trim cache partition '{}': {}", name, err);
		}
	}

	/// Delete oldest-first until the partition is back within the bound.
	/// Each iteration re-enumerates live keys, so concurrent inserts and
	/// racing evictions converge instead of stacking up.
	async fn evict_to_bound(&self, partition: &dyn CachePartition) -> Result<(), CacheError> {
		loop {
			let keys = partition.keys().await?;
			if keys.len() <= self.config.max_dynamic_entries {
				return Ok(());
			}
			let Some(oldest) = keys.into_iter().next() else {
				return Ok(());
			};
			// delete() returning false means another eviction got there
			// first; the re-enumeration accounts for it either way.
			if partition.delete(&oldest).await? {
				tracing::debug!("evicted oldest dynamic entry '{}'", oldest);
			}
		}
	}

	/// Exact-match lookup across the current partitions, static first.
	/// Lookup failures count as misses.
	async fn cached_response(&self, key: &RequestKey) -> Option<FetchResponse> {
		let names = self.config.cache_names();
		for name in [names.static_partition(), names.dynamic_partition()] {
			let Some(partition) = self.partition_if_present(&name).await else {
				continue;
			};
			match partition.get(key).await {
				Ok(Some(response)) => return Some(response),
				Ok(None) => {},
				Err(err) => {
					tracing::warn!("cache lookup in '{}' failed: {}", name, err);
				},
			}
		}
		None
	}

	/// Open a partition only if it already exists. Lookups must not create
	/// partitions as a side effect.
	async fn partition_if_present(&self, name: &str) -> Option<Arc<dyn CachePartition>> {
		match self.storage.has(name).await {
			Ok(true) => {},
			Ok(false) => return None,
			Err(err) => {
				tracing::warn!("cache storage check for '{}' failed: {}", name, err);
				return None;
			},
		}
		match self.storage.open(name).await {
			Ok(partition) => Some(partition),
			Err(err) => {
				tracing::warn!("failed to open cache partition '{}': {}", name, err);
				None
			},
		}
	}
}
