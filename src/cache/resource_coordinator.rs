//! The per-family registry of [`KeyCoordinator`]s.

use std::{collections::HashMap, hash::Hash, sync::Arc};

use futures::Stream;
use tokio::sync::Mutex;

use crate::{
	Result,
	cache::KeyCoordinator,
	config::Config,
	fetch::Fetch,
	logger::Logger,
	metrics_sink::MetricsSink,
	policy::StalenessPolicy,
	resource::Resource,
	storage::{InMemoryStorage, StorageBackend, SystemClock, TimestampProvider},
};

/// A family-level registry mapping keys to their [`KeyCoordinator`], plus the shared storage,
/// fetcher, and staleness policy every key in the family is built from.
///
/// Construction presets ([`ResourceCoordinator::in_memory`], [`ResourceCoordinator::persistent`],
/// [`ResourceCoordinator::secure`]) resolve a shared [`StorageBackend`]; [`ResourceCoordinator::with_storage`]
/// accepts any backend directly.
pub struct ResourceCoordinator<K, V> {
	storage: Arc<dyn StorageBackend<K, V>>,
	fetch: Option<Arc<dyn Fetch<K, V>>>,
	policy: Arc<dyn StalenessPolicy<K, V>>,
	clock: Arc<dyn TimestampProvider>,
	logger: Arc<dyn Logger>,
	enable_last_emitted: bool,
	metrics: Option<Arc<dyn MetricsSink>>,
	registry: Mutex<HashMap<K, Arc<KeyCoordinator<K, V>>>>,
}

impl<K, V> ResourceCoordinator<K, V>
where
	K: Eq + Hash + Clone + Send + Sync + 'static,
	V: Clone + PartialEq + Send + Sync + 'static,
{
	/// Build a family backed by an arbitrary storage backend.
	pub fn with_storage(
		storage: Arc<dyn StorageBackend<K, V>>,
		fetch: Option<Arc<dyn Fetch<K, V>>>,
		policy: Arc<dyn StalenessPolicy<K, V>>,
	) -> Self {
		Self {
			storage,
			fetch,
			policy,
			clock: Arc::new(SystemClock),
			logger: Config::logger(),
			enable_last_emitted: true,
			metrics: None,
			registry: Mutex::new(HashMap::new()),
		}
	}

	/// Build a family backed by the registered in-memory-storage factory — [`InMemoryStorage`]
	/// unless overridden via [`Config::set_in_memory_storage_factory`].
	pub fn in_memory(fetch: Option<Arc<dyn Fetch<K, V>>>, policy: Arc<dyn StalenessPolicy<K, V>>) -> Self {
		let storage = Config::in_memory_storage_factory::<K, V>()
			.create("in-memory")
			.unwrap_or_else(|_| Arc::new(InMemoryStorage::new()));

		Self::with_storage(storage, fetch, policy)
	}

	/// Build a family backed by the registered persistent-storage factory.
	///
	/// Fails with [`crate::Error::ConfigurationMissing`] if no factory has been registered via
	/// [`Config::set_persistent_storage_factory`].
	pub fn persistent(
		storage_name: &str,
		fetch: Option<Arc<dyn Fetch<K, V>>>,
		policy: Arc<dyn StalenessPolicy<K, V>>,
	) -> Result<Self> {
		let storage = Config::persistent_storage_factory::<K, V>()?.create(storage_name)?;

		Ok(Self::with_storage(storage, fetch, policy))
	}

	/// Build a family backed by the registered secure-storage factory.
	///
	/// The in-memory last-emitted slot is disabled so secrets never linger in process memory
	/// past the moment they are emitted to a subscriber.
	pub fn secure(
		storage_name: &str,
		fetch: Option<Arc<dyn Fetch<K, V>>>,
		policy: Arc<dyn StalenessPolicy<K, V>>,
	) -> Result<Self> {
		let storage = Config::secure_storage_factory::<K, V>()?.create(storage_name)?;
		let mut coordinator = Self::with_storage(storage, fetch, policy);

		coordinator.enable_last_emitted = false;

		Ok(coordinator)
	}

	/// Override the default logger (a [`TracingLogger`] unless [`Config::set_logger`] was called).
	pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
		self.logger = logger;
		self
	}

	/// Override the default clock, primarily for deterministic tests.
	pub fn with_clock(mut self, clock: Arc<dyn TimestampProvider>) -> Self {
		self.clock = clock;
		self
	}

	/// Report cache hits/misses/refresh outcomes for every key in this family into `metrics`,
	/// tagged with `family` (feature `metrics`).
	#[cfg(feature = "metrics")]
	pub fn with_metrics(mut self, family: impl Into<Arc<str>>, metrics: Arc<crate::metrics::CoordinatorMetrics>) -> Self {
		self.metrics = Some(Arc::new(crate::metrics::FamilyMetrics::new(family.into(), metrics)));
		self
	}

	/// A cold stream of [`Resource`] transitions for `key`, creating its [`KeyCoordinator`] on
	/// first touch.
	pub async fn as_stream(
		&self,
		key: K,
		force_reload: bool,
	) -> Result<impl Stream<Item = Resource<V>> + Send + 'static> {
		self.coordinator_for(key).await.as_stream(force_reload)
	}

	/// The first non-`Loading` (or loading-with-data, if `allow_loading_state`) emission for `key`.
	pub async fn get(&self, key: K, force_reload: bool, allow_loading_state: bool) -> Result<Resource<V>> {
		self.coordinator_for(key).await.get(force_reload, allow_loading_state).await
	}

	/// Marks `key`'s entry stale, optionally waiting for a forced reload to complete.
	pub async fn invalidate(&self, key: K, force_reload: bool, emit_loading_on_reload: bool) -> Result<()> {
		self.coordinator_for(key).await.invalidate(force_reload, emit_loading_on_reload).await
	}

	/// In-place edit of `key`'s cached value, preserving `storeTime`.
	pub async fn update_cached_value(
		&self,
		key: K,
		edit: impl FnOnce(Option<V>) -> Option<V> + Send,
		notify_on_null: bool,
	) -> Result<()> {
		self.coordinator_for(key).await.update_cached_value(edit, notify_on_null).await
	}

	/// Like [`Self::update_cached_value`], but `edit` may itself fail, aborting the write.
	pub async fn try_update_cached_value<E>(
		&self,
		key: K,
		edit: impl FnOnce(Option<V>) -> std::result::Result<Option<V>, E> + Send,
		notify_on_null: bool,
	) -> Result<()>
	where
		E: Into<crate::Error>,
	{
		self.coordinator_for(key).await.try_update_cached_value(edit, notify_on_null).await
	}

	/// The stored value for `key`, if any.
	pub async fn get_cached_value(&self, key: K, synchronized: bool) -> Result<Option<V>> {
		self.coordinator_for(key).await.get_cached_value(synchronized).await
	}

	/// Writes `value` for `key` and emits `Success(value)`.
	pub async fn put_value(&self, key: K, value: V) -> Result<()> {
		self.coordinator_for(key).await.put_value(value).await
	}

	/// Closes `key`'s coordinator, removes it from the registry, and deletes it from storage.
	pub async fn remove(&self, key: &K) -> Result<()> {
		let coordinator = { self.registry.lock().await.remove(key) };

		if let Some(coordinator) = coordinator {
			coordinator.close();
		}

		self.storage.remove(key).await
	}

	/// Detaches every [`KeyCoordinator`] from the registry, optionally closes each one, then
	/// clears the shared storage.
	///
	/// The registry lock is released before closing any coordinator (detach-then-close): closing
	/// a subscriber could itself call back into the family, so the lock must never be held while
	/// foreign code might re-enter it.
	pub async fn clear_all(&self, close_subscriptions: bool) -> Result<()> {
		let coordinators: Vec<_> = { self.registry.lock().await.drain().map(|(_, coordinator)| coordinator).collect() };

		if close_subscriptions {
			for coordinator in &coordinators {
				coordinator.close();
			}
		}

		self.storage.clear().await
	}

	async fn coordinator_for(&self, key: K) -> Arc<KeyCoordinator<K, V>> {
		let mut registry = self.registry.lock().await;

		if let Some(coordinator) = registry.get(&key) {
			return Arc::clone(coordinator);
		}

		let coordinator = KeyCoordinator::new_with_metrics(
			key.clone(),
			Arc::clone(&self.storage),
			self.fetch.clone(),
			Arc::clone(&self.policy),
			Arc::clone(&self.clock),
			Arc::clone(&self.logger),
			self.enable_last_emitted,
			self.metrics.clone(),
		);

		registry.insert(key, Arc::clone(&coordinator));

		coordinator
	}
}
