//! Named cache partitions and the storage abstraction over them.
//!
//! A partition is a persistent key-value store from request descriptor to
//! stored response. Two partitions exist per deployed version: a static one
//! populated from the install manifest and a dynamic one populated lazily and
//! bounded by the controller's eviction policy.

pub mod memory;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use http::{Method, Uri};

use crate::fetch::FetchResponse;

/// Error type for cache storage operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
	#[error("cache backend error: {0}")]
	Backend(String),
	#[error("cache quota exceeded")]
	QuotaExceeded,
}

/// Key identifying a stored response: request method plus the origin-relative
/// URL (path and query).
///
/// Keys are origin-relative on purpose. The controller never caches
/// cross-origin traffic, so `/assets/logo.svg` requested absolutely and
/// relatively must land on the same entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
	method: Method,
	path_and_query: String,
}

impl RequestKey {
	pub fn new(method: Method, uri: &Uri) -> Self {
		let mut path_and_query = String::from(uri.path());
		if path_and_query.is_empty() {
			path_and_query.push('/');
		}
		if let Some(query) = uri.query() {
			path_and_query.push('?');
			path_and_query.push_str(query);
		}
		Self {
			method,
			path_and_query,
		}
	}

	pub fn get(uri: &Uri) -> Self {
		Self::new(Method::GET, uri)
	}

	pub fn method(&self) -> &Method {
		&self.method
	}

	pub fn path_and_query(&self) -> &str {
		&self.path_and_query
	}
}

impl fmt::Display for RequestKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} {}", self.method, self.path_and_query)
	}
}

/// Builds the versioned partition names for one deployment.
///
/// Bumping the version makes both names change, which is what lets activation
/// of a new version garbage-collect everything the old version stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheNames {
	prefix: String,
	version: String,
}

impl CacheNames {
	pub fn new(prefix: impl Into<String>, version: impl Into<String>) -> Self {
		Self {
			prefix: prefix.into(),
			version: version.into(),
		}
	}

	/// Name of the static partition, e.g. `shell-static-v2`.
	pub fn static_partition(&self) -> String {
		format!("{}-static-{}", self.prefix, self.version)
	}

	/// Name of the dynamic partition, e.g. `shell-dynamic-v2`.
	pub fn dynamic_partition(&self) -> String {
		format!("{}-dynamic-{}", self.prefix, self.version)
	}

	/// Whether `name` belongs to this deployment. Anything else is a
	/// leftover from a prior version and safe to delete.
	pub fn is_current(&self, name: &str) -> bool {
		name == self.static_partition() || name == self.dynamic_partition()
	}
}

/// A single named cache partition.
///
/// The enumeration order of [`CachePartition::keys`] is the partition's
/// insertion order, oldest first. The eviction policy depends on this:
/// implementations must maintain an explicit insertion-ordered index rather
/// than relying on incidental hash-map ordering.
#[async_trait]
pub trait CachePartition: Send + Sync {
	/// Exact-match lookup.
	async fn get(&self, key: &RequestKey) -> Result<Option<FetchResponse>, CacheError>;

	/// Insert or replace. Replacing an existing key keeps its original
	/// position in the insertion order.
	async fn put(&self, key: RequestKey, response: FetchResponse) -> Result<(), CacheError>;

	/// Remove an entry. Returns whether the key was present.
	async fn delete(&self, key: &RequestKey) -> Result<bool, CacheError>;

	/// All live keys, oldest insertion first.
	async fn keys(&self) -> Result<Vec<RequestKey>, CacheError>;

	/// Live entry count.
	async fn len(&self) -> Result<usize, CacheError>;
}

/// Storage owning the set of named partitions, the seam between the
/// controller and whatever persistence the platform provides.
#[async_trait]
pub trait CacheStorage: Send + Sync {
	/// Open a partition, creating it on first use.
	async fn open(&self, name: &str) -> Result<Arc<dyn CachePartition>, CacheError>;

	/// Whether a partition with this name exists.
	async fn has(&self, name: &str) -> Result<bool, CacheError>;

	/// Delete a whole partition. Returns whether it existed.
	async fn delete(&self, name: &str) -> Result<bool, CacheError>;

	/// Names of all live partitions, oldest creation first.
	async fn names(&self) -> Result<Vec<String>, CacheError>;
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_request_key_is_origin_relative() {
		let relative = RequestKey::get(&Uri::from_static("/assets/logo.svg"));
		let absolute = RequestKey::get(&Uri::from_static(
			"https://consultingsite.example/assets/logo.svg",
		));
		assert_eq!(relative, absolute);
		assert_eq!(relative.path_and_query(), "/assets/logo.svg");
	}

	#[test]
	fn test_request_key_keeps_query_and_method() {
		let plain = RequestKey::get(&Uri::from_static("/search"));
		let with_query = RequestKey::get(&Uri::from_static("/search?q=pricing"));
		assert_ne!(plain, with_query);
		assert_eq!(with_query.path_and_query(), "/search?q=pricing");

		let head = RequestKey::new(Method::HEAD, &Uri::from_static("/search"));
		assert_ne!(plain, head);
		assert_eq!(head.method(), &Method::HEAD);
		assert_eq!(plain.method(), &Method::GET);
	}

	#[test]
	fn test_request_key_empty_path_is_root() {
		let bare = RequestKey::get(&Uri::from_static("https://consultingsite.example"));
		let root = RequestKey::get(&Uri::from_static("/"));
		assert_eq!(bare, root);
	}

	#[test]
	fn test_cache_names() {
		let names = CacheNames::new("shell", "v2");
		assert_eq!(names.static_partition(), "shell-static-v2");
		assert_eq!(names.dynamic_partition(), "shell-dynamic-v2");
		assert!(names.is_current("shell-static-v2"));
		assert!(names.is_current("shell-dynamic-v2"));
		assert!(!names.is_current("shell-static-v1"));
		assert!(!names.is_current("unrelated"));
	}
}
