//! Process-local in-memory storage backend.

use std::{collections::HashMap, hash::Hash, sync::Arc};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
	Result,
	storage::{StorageBackend, StorageEntry, SystemClock, TimestampProvider},
};

/// Default [`StorageBackend`]: a process-local map guarded by a single [`RwLock`].
#[derive(Debug)]
pub struct InMemoryStorage<K, V> {
	entries: RwLock<HashMap<K, StorageEntry<V>>>,
	clock: Arc<dyn TimestampProvider>,
}

impl<K, V> InMemoryStorage<K, V>
where
	K: Eq + Hash,
{
	/// Build an empty backend using the system wall clock.
	pub fn new() -> Self {
		Self::with_clock(Arc::new(SystemClock))
	}

	/// Build an empty backend using a caller-supplied clock (for deterministic tests).
	pub fn with_clock(clock: Arc<dyn TimestampProvider>) -> Self {
		Self { entries: RwLock::new(HashMap::new()), clock }
	}
}

impl<K, V> Default for InMemoryStorage<K, V>
where
	K: Eq + Hash,
{
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl<K, V> StorageBackend<K, V> for InMemoryStorage<K, V>
where
	K: Eq + Hash + Clone + Send + Sync,
	V: Clone + Send + Sync,
{
	async fn get_or_null(&self, key: &K) -> Result<Option<StorageEntry<V>>> {
		Ok(self.entries.read().await.get(key).cloned())
	}

	async fn put(&self, key: &K, value: V, store_time: Option<i64>) -> Result<()> {
		let store_time = store_time.unwrap_or_else(|| self.clock.now_millis());

		self.entries.write().await.insert(key.clone(), StorageEntry::new(value, store_time));

		Ok(())
	}

	async fn remove(&self, key: &K) -> Result<()> {
		self.entries.write().await.remove(key);

		Ok(())
	}

	async fn clear(&self) -> Result<()> {
		self.entries.write().await.clear();

		Ok(())
	}
}
