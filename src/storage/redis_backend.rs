//! Redis-backed storage (feature `redis`).

use std::{marker::PhantomData, sync::Arc};

use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{Serialize, de::DeserializeOwned};

use crate::{
	Result,
	storage::{StorageBackend, StorageEntry},
};

#[derive(Serialize, serde::Deserialize)]
struct PersistedValue<V> {
	value: V,
	#[serde(rename = "storeTime")]
	store_time: i64,
}

/// Storage backend keeping one JSON blob per key in Redis under a namespaced key.
///
/// Entries never expire on their own (the coordinator, not the backend, owns staleness), so no
/// `EX`/`PEXPIRE` is applied: there is no LRU or size-bounded eviction here.
pub struct RedisStorage<K, V> {
	client: redis::Client,
	namespace: Arc<str>,
	_marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> RedisStorage<K, V>
where
	K: ToString + Send + Sync,
	V: Serialize + DeserializeOwned + Send + Sync,
{
	/// Build a backend talking to `client`, namespacing keys under `namespace`.
	pub fn new(client: redis::Client, namespace: impl Into<Arc<str>>) -> Self {
		Self { client, namespace: namespace.into(), _marker: PhantomData }
	}

	fn redis_key(&self, key: &K) -> String {
		format!("{}:{}", self.namespace, key.to_string())
	}
}

#[async_trait]
impl<K, V> StorageBackend<K, V> for RedisStorage<K, V>
where
	K: ToString + Send + Sync,
	V: Serialize + DeserializeOwned + Clone + Send + Sync,
{
	async fn get_or_null(&self, key: &K) -> Result<Option<StorageEntry<V>>> {
		let mut conn = self.client.get_multiplexed_async_connection().await?;
		let raw: Option<String> = conn.get(self.redis_key(key)).await?;

		match raw {
			Some(json) => {
				let persisted: PersistedValue<V> = serde_json::from_str(&json)?;

				Ok(Some(StorageEntry::new(persisted.value, persisted.store_time)))
			},
			None => Ok(None),
		}
	}

	async fn put(&self, key: &K, value: V, store_time: Option<i64>) -> Result<()> {
		let store_time = store_time.unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
		let payload = serde_json::to_string(&PersistedValue { value, store_time })?;
		let mut conn = self.client.get_multiplexed_async_connection().await?;

		conn.set::<_, _, ()>(self.redis_key(key), payload).await?;

		Ok(())
	}

	async fn remove(&self, key: &K) -> Result<()> {
		let mut conn = self.client.get_multiplexed_async_connection().await?;

		conn.del::<_, ()>(self.redis_key(key)).await?;

		Ok(())
	}

	async fn clear(&self) -> Result<()> {
		let mut conn = self.client.get_multiplexed_async_connection().await?;
		let pattern = format!("{}:*", self.namespace);
		let keys: Vec<String> = conn.keys(pattern).await?;

		if !keys.is_empty() {
			conn.del::<_, ()>(keys).await?;
		}

		Ok(())
	}
}
