//! The `fetch` external collaborator consumed by [`crate::cache::KeyCoordinator`].

use std::future::Future;

use async_trait::async_trait;

use crate::Result;

/// Loads the authoritative value for `key` from an external origin.
///
/// Fallible and suspendable; a failure never mutates storage.
#[async_trait]
pub trait Fetch<K, V>: Send + Sync {
	/// Fetch the current value for `key`.
	async fn fetch(&self, key: &K) -> Result<V>;
}

#[async_trait]
impl<K, V, F, Fut> Fetch<K, V> for F
where
	K: Send + Sync,
	V: Send + Sync,
	F: Fn(&K) -> Fut + Send + Sync,
	Fut: Future<Output = Result<V>> + Send,
{
	async fn fetch(&self, key: &K) -> Result<V> {
		self(key).await
	}
}
