//! JSON-file-backed storage, the default `Persistent` preset backend.
//!
//! One JSON file per family holds every key's entry using the persisted layout
//! `{ "value": <encoded V>, "storeTime": <int64> }`, aggregated into a list. This is a reference
//! implementation, not a high-throughput one — each mutation rewrites the whole file under a
//! single [`tokio::sync::Mutex`], which is adequate for the modest key cardinalities this
//! coordinator targets (process-local caches, not a database).

use std::{marker::PhantomData, path::PathBuf};

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use tokio::{fs, sync::Mutex};

use crate::{
	Error, Result,
	storage::{StorageBackend, StorageEntry},
};

#[derive(Serialize, serde::Deserialize)]
struct PersistedRecord<K, V> {
	key: K,
	value: V,
	#[serde(rename = "storeTime")]
	store_time: i64,
}

/// Storage backend persisting a family's entries to a single JSON file on disk.
pub struct JsonFileStorage<K, V> {
	path: PathBuf,
	lock: Mutex<()>,
	_marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> JsonFileStorage<K, V>
where
	K: Serialize + DeserializeOwned + PartialEq + Clone + Send + Sync,
	V: Serialize + DeserializeOwned + Clone + Send + Sync,
{
	/// Point a backend at `path`, creating the file lazily on first write.
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into(), lock: Mutex::new(()), _marker: PhantomData }
	}

	async fn load(&self) -> Result<Vec<PersistedRecord<K, V>>> {
		match fs::read(&self.path).await {
			Ok(bytes) if bytes.is_empty() => Ok(Vec::new()),
			Ok(bytes) => serde_json::from_slice(&bytes)
				.map_err(|err| Error::Decode(format!("{} ({err})", self.path.display()))),
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
			Err(err) => Err(err.into()),
		}
	}

	async fn store(&self, records: &[PersistedRecord<K, V>]) -> Result<()> {
		let bytes = serde_json::to_vec(records)?;

		if let Some(parent) = self.path.parent() {
			fs::create_dir_all(parent).await?;
		}

		fs::write(&self.path, bytes).await?;

		Ok(())
	}
}

#[async_trait]
impl<K, V> StorageBackend<K, V> for JsonFileStorage<K, V>
where
	K: Serialize + DeserializeOwned + PartialEq + Clone + Send + Sync,
	V: Serialize + DeserializeOwned + Clone + Send + Sync,
{
	async fn get_or_null(&self, key: &K) -> Result<Option<StorageEntry<V>>> {
		let _guard = self.lock.lock().await;
		let records = self.load().await?;

		Ok(records
			.into_iter()
			.find(|record| &record.key == key)
			.map(|record| StorageEntry::new(record.value, record.store_time)))
	}

	async fn put(&self, key: &K, value: V, store_time: Option<i64>) -> Result<()> {
		let _guard = self.lock.lock().await;
		let mut records = self.load().await?;
		let store_time = store_time.unwrap_or_else(|| chrono::Utc::now().timestamp_millis());

		match records.iter_mut().find(|record| &record.key == key) {
			Some(record) => {
				record.value = value;
				record.store_time = store_time;
			},
			None => records.push(PersistedRecord { key: key.clone(), value, store_time }),
		}

		self.store(&records).await
	}

	async fn remove(&self, key: &K) -> Result<()> {
		let _guard = self.lock.lock().await;
		let mut records = self.load().await?;

		records.retain(|record| &record.key != key);

		self.store(&records).await
	}

	async fn clear(&self) -> Result<()> {
		let _guard = self.lock.lock().await;

		self.store(&[]).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn put_persists_across_instances() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("family.json");

		{
			let storage: JsonFileStorage<String, i32> = JsonFileStorage::new(&path);
			storage.put(&"a".to_string(), 7, Some(123)).await.unwrap();
		}

		let storage: JsonFileStorage<String, i32> = JsonFileStorage::new(&path);
		let entry = storage.get_or_null(&"a".to_string()).await.unwrap().unwrap();

		assert_eq!(entry.value, 7);
		assert_eq!(entry.store_time, 123);
	}

	#[tokio::test]
	async fn remove_and_clear_roundtrip() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("family.json");
		let storage: JsonFileStorage<String, i32> = JsonFileStorage::new(&path);

		storage.put(&"a".to_string(), 1, Some(1)).await.unwrap();
		storage.put(&"b".to_string(), 2, Some(1)).await.unwrap();
		storage.remove(&"a".to_string()).await.unwrap();

		assert!(storage.get_or_null(&"a".to_string()).await.unwrap().is_none());

		storage.clear().await.unwrap();

		assert!(storage.get_or_null(&"b".to_string()).await.unwrap().is_none());
	}
}
