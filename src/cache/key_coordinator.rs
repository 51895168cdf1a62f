//! The per-key state machine, single-flight guard, and broadcast engine.

use std::sync::{
	Arc,
	atomic::{AtomicBool, Ordering},
};

use async_stream::stream;
use futures::{Stream, StreamExt};
use tokio::sync::{Mutex, broadcast};

use crate::{
	Error, Result,
	fetch::Fetch,
	logger::{LogLevel, Logger},
	metrics_sink::MetricsSink,
	policy::StalenessPolicy,
	resource::Resource,
	storage::{StorageBackend, TimestampProvider},
};

struct RefreshState<V> {
	is_loading: bool,
	should_reload: bool,
	last_emitted: Option<V>,
}

/// Coordinates fetching, caching, and broadcast for a single key within a family.
///
/// There is no true reentrant lock here (see DESIGN.md): subscriber notification goes through
/// [`broadcast::Sender`], which is message-passing rather than synchronous callback invocation,
/// so no foreign code ever runs on the stack of a held lock. A plain [`Mutex`] over the refresh
/// bookkeeping is therefore sufficient to satisfy the single-flight and durability-before-notify
/// invariants a reentrant one would otherwise be needed for.
pub struct KeyCoordinator<K, V> {
	key: K,
	storage: Arc<dyn StorageBackend<K, V>>,
	fetch: Option<Arc<dyn Fetch<K, V>>>,
	policy: Arc<dyn StalenessPolicy<K, V>>,
	clock: Arc<dyn TimestampProvider>,
	logger: Arc<dyn Logger>,
	enable_last_emitted: bool,
	metrics: Option<Arc<dyn MetricsSink>>,
	state: Mutex<RefreshState<V>>,
	bus: broadcast::Sender<Resource<V>>,
	closed: AtomicBool,
}

impl<K, V> KeyCoordinator<K, V>
where
	K: Clone + Send + Sync + 'static,
	V: Clone + PartialEq + Send + Sync + 'static,
{
	/// Construct a coordinator for `key`. `enable_last_emitted` disables the in-memory
	/// last-value slot for security-sensitive families (the `Secure` preset).
	pub fn new(
		key: K,
		storage: Arc<dyn StorageBackend<K, V>>,
		fetch: Option<Arc<dyn Fetch<K, V>>>,
		policy: Arc<dyn StalenessPolicy<K, V>>,
		clock: Arc<dyn TimestampProvider>,
		logger: Arc<dyn Logger>,
		enable_last_emitted: bool,
	) -> Arc<Self> {
		Self::new_with_metrics(key, storage, fetch, policy, clock, logger, enable_last_emitted, None)
	}

	pub(crate) fn new_with_metrics(
		key: K,
		storage: Arc<dyn StorageBackend<K, V>>,
		fetch: Option<Arc<dyn Fetch<K, V>>>,
		policy: Arc<dyn StalenessPolicy<K, V>>,
		clock: Arc<dyn TimestampProvider>,
		logger: Arc<dyn Logger>,
		enable_last_emitted: bool,
		metrics: Option<Arc<dyn MetricsSink>>,
	) -> Arc<Self> {
		let (bus, _) = broadcast::channel(64);

		Arc::new(Self {
			key,
			storage,
			fetch,
			policy,
			clock,
			logger,
			enable_last_emitted,
			metrics,
			state: Mutex::new(RefreshState { is_loading: false, should_reload: false, last_emitted: None }),
			bus,
			closed: AtomicBool::new(false),
		})
	}

	/// The key this coordinator serves.
	pub fn key(&self) -> &K {
		&self.key
	}

	/// A cold stream of [`Resource`] transitions: on subscribe, a reload is requested, a
	/// synthetic `Loading(lastEmitted)` item is emitted, and the shared bus is then forwarded
	/// with consecutive-duplicate suppression scoped to this subscription.
	pub fn as_stream(
		self: &Arc<Self>,
		force_reload: bool,
	) -> Result<impl Stream<Item = Resource<V>> + Send + 'static> {
		self.ensure_open()?;

		let this = Arc::clone(self);

		Ok(stream! {
			let mut receiver = this.bus.subscribe();
			let initial = Resource::loading(this.state.lock().await.last_emitted.clone());

			yield initial.clone();

			let mut previous = initial;

			this.spawn_request_loading(force_reload);

			loop {
				match receiver.recv().await {
					Ok(item) => {
						if item != previous {
							previous = item.clone();

							yield item;
						}
					},
					Err(broadcast::error::RecvError::Lagged(_)) => continue,
					Err(broadcast::error::RecvError::Closed) => break,
				}
			}
		})
	}

	/// The first emission satisfying `state != Loading || (allowLoadingState && data.is_some())`.
	pub async fn get(self: &Arc<Self>, force_reload: bool, allow_loading_state: bool) -> Result<Resource<V>> {
		let mut stream = Box::pin(self.as_stream(force_reload)?);

		while let Some(item) = stream.next().await {
			if !item.is_loading() || (allow_loading_state && item.data().is_some()) {
				return Ok(item);
			}
		}

		Err(Error::Closed)
	}

	/// Marks the stored entry stale (`storeTime = 0`, value preserved) and, when `force_reload`
	/// is set and at least one subscriber is listening, waits for the next non-`Loading`
	/// emission from a freshly driven reload.
	pub async fn invalidate(self: &Arc<Self>, force_reload: bool, emit_loading_on_reload: bool) -> Result<()> {
		self.ensure_open()?;

		if let Some(entry) = self.storage.get_or_null(&self.key).await? {
			self.storage.put(&self.key, entry.value, Some(0)).await?;
		}

		if emit_loading_on_reload {
			let last_emitted = self.state.lock().await.last_emitted.clone();

			self.emit(Resource::loading(last_emitted)).await;
		}

		if force_reload && self.bus.receiver_count() > 0 {
			let mut stream = Box::pin(self.as_stream(force_reload)?);

			while let Some(item) = stream.next().await {
				if !item.is_loading() {
					break;
				}
			}
		}

		Ok(())
	}

	/// Reads the stored entry, applies `edit`, and writes back preserving `storeTime` so the
	/// edit does not itself reset staleness.
	pub async fn update_cached_value(
		&self,
		edit: impl FnOnce(Option<V>) -> Option<V> + Send,
		notify_on_null: bool,
	) -> Result<()> {
		self.try_update_cached_value(|existing| Ok::<_, Error>(edit(existing)), notify_on_null).await
	}

	/// Like [`Self::update_cached_value`], but `edit` may itself fail (e.g. a pagination
	/// consistency check), aborting the write and leaving storage untouched.
	pub async fn try_update_cached_value<E>(
		&self,
		edit: impl FnOnce(Option<V>) -> std::result::Result<Option<V>, E> + Send,
		notify_on_null: bool,
	) -> Result<()>
	where
		E: Into<Error>,
	{
		self.ensure_open()?;

		let existing = self.storage.get_or_null(&self.key).await?;
		let new_value = edit(existing.as_ref().map(|entry| entry.value.clone())).map_err(Into::into)?;

		match new_value {
			Some(value) => {
				let store_time = existing.as_ref().map(|entry| entry.store_time).unwrap_or(0);

				self.storage.put(&self.key, value.clone(), Some(store_time)).await?;
				self.emit(Resource::success(Some(value))).await;
			},
			None =>
				if existing.is_some() {
					self.storage.remove(&self.key).await?;

					if notify_on_null {
						self.emit(Resource::success(None)).await;
					}
				},
		}

		Ok(())
	}

	/// The stored value, if any. `synchronized` documents intent only: this implementation
	/// never holds `state` while calling the storage backend, so both call sites behave
	/// identically (see the module doc comment on why no reentrant lock is needed here).
	pub async fn get_cached_value(&self, _synchronized: bool) -> Result<Option<V>> {
		Ok(self.storage.get_or_null(&self.key).await?.map(|entry| entry.value))
	}

	/// Writes `value` with the current timestamp and emits `Success(value)`.
	pub async fn put_value(&self, value: V) -> Result<()> {
		self.ensure_open()?;

		let now = self.clock.now_millis();

		self.storage.put(&self.key, value.clone(), Some(now)).await?;
		self.emit(Resource::success(Some(value))).await;

		Ok(())
	}

	/// Removes the stored entry and clears the last-emitted slot.
	pub async fn clear_cache(&self) -> Result<()> {
		self.storage.remove(&self.key).await?;
		self.state.lock().await.last_emitted = None;

		Ok(())
	}

	/// Closes the broadcast bus; future subscriptions fail with [`Error::Closed`].
	pub fn close(&self) {
		self.closed.store(true, Ordering::SeqCst);
	}

	fn ensure_open(&self) -> Result<()> {
		if self.closed.load(Ordering::SeqCst) { Err(Error::Closed) } else { Ok(()) }
	}

	fn spawn_request_loading(self: &Arc<Self>, force_reload: bool) {
		let this = Arc::clone(self);

		tokio::spawn(async move {
			this.request_loading(force_reload).await;
		});
	}

	/// Drives one reload pass, re-looping if a reload was requested while the previous pass was
	/// still running, rather than tail-recursing (see DESIGN.md): Rust's `async fn` recursion
	/// needs explicit boxing, and the tail call here is exactly a loop in disguise.
	async fn request_loading(self: Arc<Self>, mut force_reload: bool) {
		loop {
			{
				let mut state = self.state.lock().await;

				if force_reload {
					state.should_reload = true;
				}

				if state.is_loading {
					return;
				}

				state.is_loading = true;
			}

			if self.fetch.is_some() {
				self.load_from_external().await;
			} else {
				self.load_from_cache().await;
			}

			let should_reload = {
				let mut state = self.state.lock().await;

				state.is_loading = false;
				std::mem::take(&mut state.should_reload)
			};

			if should_reload {
				force_reload = true;
			} else {
				break;
			}
		}
	}

	async fn load_from_cache(&self) {
		self.state.lock().await.should_reload = false;

		match self.storage.get_or_null(&self.key).await {
			Ok(entry) => {
				if let Some(metrics) = &self.metrics {
					metrics.record_hit(false);
				}

				self.emit(Resource::success(entry.map(|entry| entry.value))).await;
			},
			Err(err) => {
				self.logger.trace(LogLevel::Error, "failed to read cached entry", Some(&err));
				self.emit(Resource::error(None, &err)).await;
			},
		}
	}

	async fn load_from_external(&self) {
		let now = self.clock.now_millis();
		let cache = match self.storage.get_or_null(&self.key).await {
			Ok(cache) => cache,
			Err(err) => {
				self.logger.trace(LogLevel::Error, "failed to read cached entry", Some(&err));
				self.state.lock().await.should_reload = false;
				self.emit(Resource::error(None, &err)).await;

				return;
			},
		};
		let cached_value = cache.as_ref().map(|entry| entry.value.clone());
		let last_emitted = self.state.lock().await.last_emitted.clone();

		if last_emitted != cached_value {
			self.emit(Resource::loading(cached_value.clone())).await;
		}

		let needs_origin = {
			let mut state = self.state.lock().await;
			let should_reload = std::mem::take(&mut state.should_reload);

			should_reload || cache.as_ref().is_some_and(|entry| self.policy.is_stale(&self.key, entry, now))
		};

		if let Some(entry) = &cache {
			if !needs_origin {
				if let Some(metrics) = &self.metrics {
					metrics.record_hit(false);
				}

				self.emit(Resource::success(Some(entry.value.clone()))).await;

				return;
			}
		}

		if let Some(metrics) = &self.metrics {
			metrics.record_miss();
		}

		let fetch = self.fetch.as_ref().expect("load_from_external only runs when a fetcher is configured");
		let started_at = std::time::Instant::now();

		match fetch.fetch(&self.key).await {
			Ok(value) => {
				if let Err(err) = self.storage.put(&self.key, value.clone(), Some(now)).await {
					self.logger.trace(LogLevel::Error, "failed to persist fetched value", Some(&err));
					self.emit(Resource::error(cached_value, &err)).await;

					return;
				}

				if let Some(metrics) = &self.metrics {
					metrics.record_refresh_success(started_at.elapsed());
				}

				self.emit(Resource::success(Some(value))).await;
			},
			Err(err) => {
				self.logger.trace(LogLevel::Warning, "origin fetch failed, serving cached value", Some(&err));

				if let Some(metrics) = &self.metrics {
					metrics.record_refresh_error();

					if cached_value.is_some() {
						metrics.record_hit(true);
					}
				}

				self.emit(Resource::error(cached_value, &err)).await;
			},
		}
	}

	async fn emit(&self, resource: Resource<V>) {
		if self.enable_last_emitted {
			self.state.lock().await.last_emitted = resource.data().cloned();
		}

		let _ = self.bus.send(resource);
	}
}
