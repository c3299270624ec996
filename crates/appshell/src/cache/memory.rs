//! In-memory implementation of the cache storage traits.

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;

use super::{CacheError, CachePartition, CacheStorage, RequestKey};
use crate::fetch::FetchResponse;

/// A single partition backed by an [`IndexMap`], which preserves insertion
/// order across lookups and removals and so satisfies the oldest-first
/// enumeration contract directly.
#[derive(Default)]
struct MemoryPartition {
	entries: Mutex<IndexMap<RequestKey, FetchResponse>>,
}

#[async_trait]
impl CachePartition for MemoryPartition {
	async fn get(&self, key: &RequestKey) -> Result<Option<FetchResponse>, CacheError> {
		Ok(self.entries.lock().get(key).cloned())
	}

	async fn put(&self, key: RequestKey, response: FetchResponse) -> Result<(), CacheError> {
		// IndexMap::insert keeps the original position when the key exists.
		self.entries.lock().insert(key, response);
		Ok(())
	}

	async fn delete(&self, key: &RequestKey) -> Result<bool, CacheError> {
		// shift_remove, not swap_remove: removal must not disturb the
		// insertion order of the surviving entries.
		Ok(self.entries.lock().shift_remove(key).is_some())
	}

	async fn keys(&self) -> Result<Vec<RequestKey>, CacheError> {
		Ok(self.entries.lock().keys().cloned().collect())
	}

	async fn len(&self) -> Result<usize, CacheError> {
		Ok(self.entries.lock().len())
	}
}

/// In-memory implementation of [`CacheStorage`].
///
/// Suitable for tests and for embedding the shell runtime in a single
/// process. Durable deployments plug in a storage backed by the platform's
/// persistent cache instead.
#[derive(Default)]
pub struct MemoryCacheStorage {
	partitions: Mutex<IndexMap<String, Arc<MemoryPartition>>>,
}

impl MemoryCacheStorage {
	/// Create a new storage with no partitions.
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
	async fn open(&self, name: &str) -> Result<Arc<dyn CachePartition>, CacheError> {
		let mut partitions = self.partitions.lock();
		let partition = partitions
			.entry(name.to_string())
			.or_insert_with(|| Arc::new(MemoryPartition::default()));
		Ok(Arc::clone(partition) as Arc<dyn CachePartition>)
	}

	async fn has(&self, name: &str) -> Result<bool, CacheError> {
		Ok(self.partitions.lock().contains_key(name))
	}

	async fn delete(&self, name: &str) -> Result<bool, CacheError> {
		Ok(self.partitions.lock().shift_remove(name).is_some())
	}

	async fn names(&self) -> Result<Vec<String>, CacheError> {
		Ok(self.partitions.lock().keys().cloned().collect())
	}
}
