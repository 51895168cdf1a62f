//! Storage backend traits and the built-in reference implementations.
//!
//! [`StorageBackend`] is the single external collaborator the coordinator relies on for
//! durability. It is deliberately narrow — a `get_or_null`/`put`/`remove`/`clear` surface — so
//! that in-memory, on-disk, and secrets-manager-backed implementations can all satisfy it
//! without the coordinator knowing which one it has.

mod memory;

#[cfg(feature = "json-file-storage")] mod json_file;
#[cfg(feature = "redis")] mod redis_backend;

pub use memory::InMemoryStorage;
#[cfg(feature = "json-file-storage")] pub use json_file::JsonFileStorage;
#[cfg(feature = "redis")] pub use redis_backend::RedisStorage;

use std::sync::Arc;

use async_trait::async_trait;

use crate::Result;

/// A stored `(value, store_time)` pair.
///
/// `store_time` is a millisecond timestamp; a value `<= 0` means "invalidated" and is always
/// stale regardless of the configured [`crate::StalenessPolicy`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageEntry<V> {
	/// The stored value.
	pub value: V,
	/// Millisecond timestamp at which `value` was stored.
	pub store_time: i64,
}

impl<V> StorageEntry<V> {
	/// Construct a new entry.
	pub fn new(value: V, store_time: i64) -> Self {
		Self { value, store_time }
	}

	/// Whether this entry carries the "invalidated" marker (`store_time <= 0`).
	pub fn is_invalidated(&self) -> bool {
		self.store_time <= 0
	}
}

/// Opaque key→(value, store_time) mapping backing a [`crate::ResourceCoordinator`] family.
///
/// Implementations must be safe against concurrent task access: the backend is shared across
/// every key in a family. `storeTime` units are backend-defined but must be monotonic-comparable
/// across `put` calls for a single backend instance.
#[async_trait]
pub trait StorageBackend<K, V>: Send + Sync
where
	K: Send + Sync,
	V: Send + Sync,
{
	/// Look up the stored entry for `key`, if any.
	async fn get_or_null(&self, key: &K) -> Result<Option<StorageEntry<V>>>;

	/// Store `value` for `key`. When `store_time` is `None` the backend substitutes "now".
	async fn put(&self, key: &K, value: V, store_time: Option<i64>) -> Result<()>;

	/// Remove the entry for `key`, if present.
	async fn remove(&self, key: &K) -> Result<()>;

	/// Remove every entry for this backend.
	async fn clear(&self) -> Result<()>;
}

#[async_trait]
impl<K, V> StorageBackend<K, V> for Arc<dyn StorageBackend<K, V>>
where
	K: Send + Sync,
	V: Send + Sync,
{
	async fn get_or_null(&self, key: &K) -> Result<Option<StorageEntry<V>>> {
		(**self).get_or_null(key).await
	}

	async fn put(&self, key: &K, value: V, store_time: Option<i64>) -> Result<()> {
		(**self).put(key, value, store_time).await
	}

	async fn remove(&self, key: &K) -> Result<()> {
		(**self).remove(key).await
	}

	async fn clear(&self) -> Result<()> {
		(**self).clear().await
	}
}

/// Constructs a [`StorageBackend`] for a named family.
///
/// A factory is resolved once, at coordinator-construction time, from either an explicitly
/// supplied instance or the process-wide [`crate::config::Config`] default.
pub trait StorageFactory<K, V>: Send + Sync
where
	K: Send + Sync,
	V: Send + Sync,
{
	/// Build a backend scoped to `storage_name`.
	fn create(&self, storage_name: &str) -> Result<Arc<dyn StorageBackend<K, V>>>;
}

impl<K, V, F> StorageFactory<K, V> for F
where
	K: Send + Sync,
	V: Send + Sync,
	F: Fn(&str) -> Result<Arc<dyn StorageBackend<K, V>>> + Send + Sync,
{
	fn create(&self, storage_name: &str) -> Result<Arc<dyn StorageBackend<K, V>>> {
		self(storage_name)
	}
}

/// Injectable wall-clock source, swappable for deterministic tests.
///
/// Defaults to [`SystemClock`], which reads [`chrono::Utc::now`].
pub trait TimestampProvider: Send + Sync {
	/// Current time as a millisecond timestamp.
	fn now_millis(&self) -> i64;
}

/// [`TimestampProvider`] backed by the system wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl TimestampProvider for SystemClock {
	fn now_millis(&self) -> i64 {
		chrono::Utc::now().timestamp_millis()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn invalidated_entries_have_nonpositive_store_time() {
		let fresh = StorageEntry::new(1, 1_000);
		let invalidated = StorageEntry::new(1, 0);

		assert!(!fresh.is_invalidated());
		assert!(invalidated.is_invalidated());
	}
}
