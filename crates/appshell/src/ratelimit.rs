//! Client-side submission rate limiting for lead-generation forms.
//!
//! Per-form attempt counts live in client-local string storage as one
//! serialized map, keyed by form identifier. The limiter is advisory: it
//! exists to stop accidental double-submits and casual abuse, so storage
//! failures fail open rather than blocking a legitimate submission.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_BLOCK: Duration = Duration::from_secs(30 * 60);

/// Key the serialized map is stored under.
pub const DEFAULT_STORAGE_KEY: &str = "form-rate-limits";

/// Error type for storage areas
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
	#[error("storage unavailable: {0}")]
	Unavailable(String),
	#[error("storage quota exceeded")]
	QuotaExceeded,
}

/// String key-value storage in the shape of the platform's local storage.
/// Synchronous by contract; implementations must not block on I/O.
pub trait StorageArea: Send + Sync {
	fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
	fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
}

/// In-memory [`StorageArea`].
#[derive(Default)]
pub struct MemoryStorage {
	items: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
	pub fn new() -> Self {
		Self::default()
	}
}

impl StorageArea for MemoryStorage {
	fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
		Ok(self.items.lock().get(key).cloned())
	}

	fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
		self.items.lock().insert(key.to_string(), value.to_string());
		Ok(())
	}
}

/// Attempt budget per form: `max_attempts` within `window`, then a flat
/// block of `block`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
	pub max_attempts: u32,
	pub window: Duration,
	pub block: Duration,
}

impl Default for RateLimitPolicy {
	fn default() -> Self {
		Self {
			max_attempts: DEFAULT_MAX_ATTEMPTS,
			window: DEFAULT_WINDOW,
			block: DEFAULT_BLOCK,
		}
	}
}

/// Per-form state, persisted in the serialized map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormRecord {
	pub attempts: u32,
	#[serde(rename = "firstAttemptTimestamp")]
	pub first_attempt: u64,
	#[serde(
		rename = "blockedUntilTimestamp",
		default,
		skip_serializing_if = "Option::is_none"
	)]
	pub blocked_until: Option<u64>,
}

/// Verdict for one submission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionOutcome {
	Allowed { remaining: u32 },
	Blocked { retry_after: Duration },
}

impl SubmissionOutcome {
	pub fn is_allowed(&self) -> bool {
		matches!(self, SubmissionOutcome::Allowed { .. })
	}
}

/// Counts submission attempts per form identifier against a
/// [`RateLimitPolicy`], persisting state through a [`StorageArea`].
pub struct SubmissionLimiter {
	policy: RateLimitPolicy,
	storage: Arc<dyn StorageArea>,
	storage_key: String,
}

impl SubmissionLimiter {
	pub fn new(storage: Arc<dyn StorageArea>) -> Self {
		Self {
			policy: RateLimitPolicy::default(),
			storage,
			storage_key: DEFAULT_STORAGE_KEY.to_string(),
		}
	}

	pub fn with_policy(mut self, policy: RateLimitPolicy) -> Self {
		self.policy = policy;
		self
	}

	pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
		self.storage_key = key.into();
		self
	}

	/// Record one attempt for `form_id` and return the verdict.
	pub fn register_attempt(&self, form_id: &str) -> SubmissionOutcome {
		self.register_attempt_at(form_id, now_millis())
	}

	/// Clock-explicit variant of [`register_attempt`](Self::register_attempt).
	pub fn register_attempt_at(&self, form_id: &str, now: u64) -> SubmissionOutcome {
		let mut records = self.load();
		let outcome = match records.get_mut(form_id) {
			Some(record) => self.apply(record, now),
			None => {
				records.insert(form_id.to_string(), fresh_record(now));
				SubmissionOutcome::Allowed {
					remaining: self.policy.max_attempts.saturating_sub(1),
				}
			},
		};
		self.store(&records);
		outcome
	}

	fn apply(&self, record: &mut FormRecord, now: u64) -> SubmissionOutcome {
		if let Some(blocked_until) = record.blocked_until {
			if now < blocked_until {
				// Attempts during a block do not extend it.
				return SubmissionOutcome::Blocked {
					retry_after: Duration::from_millis(blocked_until - now),
				};
			}
			// Block elapsed; this attempt opens a fresh window.
			*record = fresh_record(now);
			return SubmissionOutcome::Allowed {
				remaining: self.policy.max_attempts.saturating_sub(1),
			};
		}

		let window_millis = self.policy.window.as_millis() as u64;
		if now.saturating_sub(record.first_attempt) > window_millis {
			*record = fresh_record(now);
			return SubmissionOutcome::Allowed {
				remaining: self.policy.max_attempts.saturating_sub(1),
			};
		}

		record.attempts = record.attempts.saturating_add(1);
		if record.attempts > self.policy.max_attempts {
			let block_millis = self.policy.block.as_millis() as u64;
			record.blocked_until = Some(now + block_millis);
			return SubmissionOutcome::Blocked {
				retry_after: self.policy.block,
			};
		}
		SubmissionOutcome::Allowed {
			remaining: self.policy.max_attempts - record.attempts,
		}
	}

	/// Read the whole map. Unreadable or unparseable state degrades to an
	/// empty map so the limiter fails open.
	fn load(&self) -> HashMap<String, FormRecord> {
		let raw = match self.storage.get_item(&self.storage_key) {
			Ok(Some(raw)) => raw,
			Ok(None) => return HashMap::new(),
			Err(err) => {
				tracing::warn!("failed to read rate-limit state '{}': {}", self.storage_key, err);
				return HashMap::new();
			},
		};
		match serde_json::from_str(&raw) {
			Ok(records) => records,
			Err(err) => {
				tracing::warn!("discarding corrupt rate-limit state '{}': {}", self.storage_key, err);
				HashMap::new()
			},
		}
	}

	fn store(&self, records: &HashMap<String, FormRecord>) {
		let raw = match serde_json::to_string(records) {
			Ok(raw) => raw,
			Err(err) => {
				tracing::warn!("failed to serialize rate-limit state: {}", err);
				return;
			},
		};
		if let Err(err) = self.storage.set_item(&self.storage_key, &raw) {
			tracing::warn!("failed to persist rate-limit state '{}': {}", self.storage_key, err);
		}
	}
}

fn fresh_record(now: u64) -> FormRecord {
	FormRecord {
		attempts: 1,
		first_attempt: now,
		blocked_until: None,
	}
}

fn now_millis() -> u64 {
	std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.unwrap()
		.as_millis() as u64
}

#[cfg(test)]
mod tests {
	use super::*;

	/// Storage that always fails, as in a privacy mode that forbids writes.
	struct BrokenStorage;

	impl StorageArea for BrokenStorage {
		fn get_item(&self, _key: &str) -> Result<Option<String>, StorageError> {
			Err(StorageError::Unavailable("access denied".to_string()))
		}

		fn set_item(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
			Err(StorageError::QuotaExceeded)
		}
	}

	fn limiter(storage: Arc<dyn StorageArea>) -> SubmissionLimiter {
		SubmissionLimiter::new(storage).with_policy(RateLimitPolicy {
			max_attempts: 3,
			window: Duration::from_secs(60),
			block: Duration::from_secs(300),
		})
	}

	#[test]
	fn test_allows_up_to_the_limit_then_blocks() {
		let limiter = limiter(Arc::new(MemoryStorage::new()));

		assert_eq!(
			limiter.register_attempt_at("contact", 1_000),
			SubmissionOutcome::Allowed { remaining: 2 }
		);
		assert_eq!(
			limiter.register_attempt_at("contact", 2_000),
			SubmissionOutcome::Allowed { remaining: 1 }
		);
		assert_eq!(
			limiter.register_attempt_at("contact", 3_000),
			SubmissionOutcome::Allowed { remaining: 0 }
		);
		assert_eq!(
			limiter.register_attempt_at("contact", 4_000),
			SubmissionOutcome::Blocked {
				retry_after: Duration::from_secs(300)
			}
		);
	}

	#[test]
	fn test_attempts_during_block_do_not_extend_it() {
		let limiter = limiter(Arc::new(MemoryStorage::new()));
		for now in [1_000, 2_000, 3_000, 4_000] {
			limiter.register_attempt_at("contact", now);
		}

		// Blocked at t=4s until t=304s; retrying counts down, not up.
		assert_eq!(
			limiter.register_attempt_at("contact", 104_000),
			SubmissionOutcome::Blocked {
				retry_after: Duration::from_secs(200)
			}
		);
		assert_eq!(
			limiter.register_attempt_at("contact", 204_000),
			SubmissionOutcome::Blocked {
				retry_after: Duration::from_secs(100)
			}
		);
	}

	#[test]
	fn test_expired_block_opens_fresh_window() {
		let limiter = limiter(Arc::new(MemoryStorage::new()));
		for now in [1_000, 2_000, 3_000, 4_000] {
			limiter.register_attempt_at("contact", now);
		}

		assert_eq!(
			limiter.register_attempt_at("contact", 304_000),
			SubmissionOutcome::Allowed { remaining: 2 }
		);
	}

	#[test]
	fn test_window_elapses_and_resets_the_count() {
		let limiter = limiter(Arc::new(MemoryStorage::new()));
		limiter.register_attempt_at("contact", 1_000);
		limiter.register_attempt_at("contact", 2_000);

		// Past the 60s window measured from the first attempt.
		assert_eq!(
			limiter.register_attempt_at("contact", 62_000),
			SubmissionOutcome::Allowed { remaining: 2 }
		);
	}

	#[test]
	fn test_forms_are_limited_independently() {
		let limiter = limiter(Arc::new(MemoryStorage::new()));
		for now in [1_000, 2_000, 3_000, 4_000] {
			limiter.register_attempt_at("contact", now);
		}

		assert!(!limiter.register_attempt_at("contact", 5_000).is_allowed());
		assert!(limiter.register_attempt_at("newsletter", 5_000).is_allowed());
	}

	#[test]
	fn test_state_round_trips_through_shared_storage() {
		let storage = Arc::new(MemoryStorage::new());
		let first = limiter(storage.clone());
		let second = limiter(storage.clone());

		first.register_attempt_at("contact", 1_000);
		assert_eq!(
			second.register_attempt_at("contact", 2_000),
			SubmissionOutcome::Allowed { remaining: 1 }
		);

		let raw = storage.get_item(DEFAULT_STORAGE_KEY).unwrap().unwrap();
		assert!(raw.contains("\"firstAttemptTimestamp\":1000"));
		assert!(raw.contains("\"attempts\":2"));
		assert!(!raw.contains("blockedUntilTimestamp"));
	}

	#[test]
	fn test_storage_failures_fail_open() {
		let limiter = limiter(Arc::new(BrokenStorage));

		// Every attempt reads empty state and is allowed; nothing panics.
		for now in [1_000, 2_000, 3_000, 4_000, 5_000] {
			assert_eq!(
				limiter.register_attempt_at("contact", now),
				SubmissionOutcome::Allowed { remaining: 2 }
			);
		}
	}

	#[test]
	fn test_oversized_persisted_attempt_count_blocks() {
		// Schema-valid state a hostile or buggy writer could leave behind:
		// the counter must not wrap around and let submissions through.
		let storage = Arc::new(MemoryStorage::new());
		storage
			.set_item(
				DEFAULT_STORAGE_KEY,
				r#"{"contact":{"attempts":4294967295,"firstAttemptTimestamp":1000}}"#,
			)
			.unwrap();
		let limiter = limiter(storage);

		assert_eq!(
			limiter.register_attempt_at("contact", 2_000),
			SubmissionOutcome::Blocked {
				retry_after: Duration::from_secs(300)
			}
		);
	}

	#[test]
	fn test_corrupt_state_is_discarded_and_rewritten() {
		let storage = Arc::new(MemoryStorage::new());
		storage.set_item(DEFAULT_STORAGE_KEY, "not json at all").unwrap();
		let limiter = limiter(storage.clone());

		assert_eq!(
			limiter.register_attempt_at("contact", 1_000),
			SubmissionOutcome::Allowed { remaining: 2 }
		);
		let raw = storage.get_item(DEFAULT_STORAGE_KEY).unwrap().unwrap();
		let parsed: HashMap<String, FormRecord> = serde_json::from_str(&raw).unwrap();
		assert_eq!(parsed["contact"].attempts, 1);
	}

	#[test]
	fn test_default_policy_values() {
		let policy = RateLimitPolicy::default();
		assert_eq!(policy.max_attempts, 5);
		assert_eq!(policy.window, Duration::from_secs(600));
		assert_eq!(policy.block, Duration::from_secs(1800));
	}

	#[test]
	fn test_record_wire_shape() {
		let record = FormRecord {
			attempts: 3,
			first_attempt: 1_700_000_000_000,
			blocked_until: Some(1_700_000_900_000),
		};
		let value = serde_json::to_value(&record).unwrap();
		assert_eq!(
			value,
			serde_json::json!({
				"attempts": 3,
				"firstAttemptTimestamp": 1_700_000_000_000u64,
				"blockedUntilTimestamp": 1_700_000_900_000u64,
			})
		);
	}
}
