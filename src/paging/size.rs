//! Size+page pagination: pages are fetched by a 1-based page number against a fixed page size,
//! tracked via a persisted `next_page` cursor.

use std::{future::Future, sync::Arc};

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::Mutex;

use crate::{
	Error, Result,
	cache::ResourceCoordinator,
	fetch::Fetch,
	logger::Logger,
	paging::bundle::{DefaultPageBundleFactory, PageBundle, PageBundleFactory},
	policy::{NeverStale, StalenessPolicy},
	resource::Resource,
	storage::{StorageBackend, TimestampProvider},
};

/// A single page response from a size+page origin call: items plus opaque metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageResponse<V, M> {
	/// Items returned for the requested page.
	pub items: Vec<V>,
	/// Opaque, user-extensible metadata (e.g. a total item count).
	pub meta: Option<M>,
}

/// Loads page `page` (1-based) of up to `size` items.
#[async_trait]
pub trait LoadSizePage<K, V, M>: Send + Sync {
	/// Fetch page `page` (starting at 1) of up to `size` items.
	async fn load_page(&self, key: &K, page: u64, size: u64) -> Result<PageResponse<V, M>>;
}

#[async_trait]
impl<K, V, M, F, Fut> LoadSizePage<K, V, M> for F
where
	K: Send + Sync,
	V: Send + Sync,
	M: Send + Sync,
	F: Fn(&K, u64, u64) -> Fut + Send + Sync,
	Fut: Future<Output = Result<PageResponse<V, M>>> + Send,
{
	async fn load_page(&self, key: &K, page: u64, size: u64) -> Result<PageResponse<V, M>> {
		self(key, page, size).await
	}
}

/// Pluggable extension points for the size+page variant.
///
/// Default implementations are no-ops: [`Self::check_consistency`] never rejects a page,
/// [`Self::build_meta`] discards the response's metadata, and [`Self::can_reuse_cache`] always
/// refetches page one rather than reusing the existing bundle.
pub trait SizePagingHooks<V, M>: Send + Sync {
	/// Validate `response` against the bundle accumulated so far, beyond the duplicate check.
	fn check_consistency(&self, _old: &PageBundle<V, M>, _response: &PageResponse<V, M>) -> Result<()> {
		Ok(())
	}

	/// Derive the bundle's `meta` from the accumulated bundle and the latest response.
	fn build_meta(&self, _old: &PageBundle<V, M>, response: &PageResponse<V, M>) -> Option<M>
	where
		M: Clone,
	{
		response.meta.clone()
	}

	/// Whether a freshly-fetched first page response can reuse `cache` unchanged.
	fn can_reuse_cache(&self, _cache: &PageBundle<V, M>, _first_response: &PageResponse<V, M>) -> bool {
		false
	}
}

/// [`SizePagingHooks`] with every hook at its documented default.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultSizePagingHooks;

impl<V, M> SizePagingHooks<V, M> for DefaultSizePagingHooks {}

struct FirstPageFetch<K, V, M> {
	storage: Arc<dyn StorageBackend<K, PageBundle<V, M>>>,
	load_page: Arc<dyn LoadSizePage<K, V, M>>,
	hooks: Arc<dyn SizePagingHooks<V, M>>,
	factory: Arc<dyn PageBundleFactory<V, M>>,
	page_size: u64,
}

#[async_trait]
impl<K, V, M> Fetch<K, PageBundle<V, M>> for FirstPageFetch<K, V, M>
where
	K: Send + Sync,
	V: Clone + PartialEq + Send + Sync,
	M: Clone + Send + Sync,
{
	async fn fetch(&self, key: &K) -> Result<PageBundle<V, M>> {
		let cache = self.storage.get_or_null(key).await?.map(|entry| entry.value);
		let response = self.load_page.load_page(key, 1, self.page_size).await?;

		if let Some(cache) = &cache {
			if self.hooks.can_reuse_cache(cache, &response) {
				return Ok(cache.clone());
			}
		}

		let loaded_all = (response.items.len() as u64) < self.page_size;
		let next_page = if loaded_all { None } else { Some(2) };

		Ok(self.factory.create(response.items, loaded_all, next_page, response.meta))
	}
}

/// Size+page pagination coordinator.
///
/// `next_page` is a persisted cursor rather than `items.len() / page_size`, so a short
/// intermediate page never desynchronizes the cursor from the item count.
pub struct SizePageableCoordinator<K, V, M = ()> {
	resource: ResourceCoordinator<K, PageBundle<V, M>>,
	load_page: Arc<dyn LoadSizePage<K, V, M>>,
	hooks: Arc<dyn SizePagingHooks<V, M>>,
	factory: Arc<dyn PageBundleFactory<V, M>>,
	page_size: u64,
	duplicates_detection_enabled: bool,
	loading: Mutex<bool>,
}

impl<K, V, M> SizePageableCoordinator<K, V, M>
where
	K: Eq + std::hash::Hash + Clone + Send + Sync + 'static,
	V: Clone + PartialEq + Send + Sync + 'static,
	M: Clone + PartialEq + Send + Sync + 'static,
{
	/// Build a coordinator backed by an arbitrary storage backend.
	///
	/// `page_size` must be at least 1 (`pageSize >= 1`). When
	/// `duplicates_detection_enabled`, `loadNextPage` verifies the new page shares no item with
	/// the accumulated bundle before merging it in, failing with [`Error::InconsistentPageData`]
	/// on overlap.
	pub fn with_storage(
		storage: Arc<dyn StorageBackend<K, PageBundle<V, M>>>,
		load_page: impl LoadSizePage<K, V, M> + 'static,
		page_size: u64,
		duplicates_detection_enabled: bool,
		cache_duration: Option<std::time::Duration>,
		hooks: Arc<dyn SizePagingHooks<V, M>>,
	) -> Self {
		Self::with_storage_and_factory(
			storage,
			load_page,
			page_size,
			duplicates_detection_enabled,
			cache_duration,
			hooks,
			Arc::new(DefaultPageBundleFactory),
		)
	}

	/// Like [`Self::with_storage`], but lets the caller override [`PageBundle`] construction via a
	/// [`PageBundleFactory`].
	#[allow(clippy::too_many_arguments)]
	pub fn with_storage_and_factory(
		storage: Arc<dyn StorageBackend<K, PageBundle<V, M>>>,
		load_page: impl LoadSizePage<K, V, M> + 'static,
		page_size: u64,
		duplicates_detection_enabled: bool,
		cache_duration: Option<std::time::Duration>,
		hooks: Arc<dyn SizePagingHooks<V, M>>,
		factory: Arc<dyn PageBundleFactory<V, M>>,
	) -> Self {
		assert!(page_size >= 1, "page_size must be at least 1");

		let load_page: Arc<dyn LoadSizePage<K, V, M>> = Arc::new(load_page);
		let first_page_fetch = FirstPageFetch {
			storage: Arc::clone(&storage),
			load_page: Arc::clone(&load_page),
			hooks: Arc::clone(&hooks),
			factory: Arc::clone(&factory),
			page_size,
		};
		let policy: Arc<dyn StalenessPolicy<K, PageBundle<V, M>>> = match cache_duration {
			Some(duration) => Arc::new(crate::policy::FixedDuration::new(duration)),
			None => Arc::new(NeverStale),
		};

		Self {
			resource: ResourceCoordinator::with_storage(storage, Some(Arc::new(first_page_fetch)), policy),
			load_page,
			hooks,
			factory,
			page_size,
			duplicates_detection_enabled,
			loading: Mutex::new(false),
		}
	}

	/// Build a coordinator backed by the process-local [`crate::storage::InMemoryStorage`], using
	/// the default (no-op) [`SizePagingHooks`].
	pub fn in_memory(
		load_page: impl LoadSizePage<K, V, M> + 'static,
		page_size: u64,
		duplicates_detection_enabled: bool,
		cache_duration: Option<std::time::Duration>,
	) -> Self {
		Self::with_storage(
			Arc::new(crate::storage::InMemoryStorage::new()),
			load_page,
			page_size,
			duplicates_detection_enabled,
			cache_duration,
			Arc::new(DefaultSizePagingHooks),
		)
	}

	/// Override the default logger used by the inner [`ResourceCoordinator`].
	pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
		self.resource = self.resource.with_logger(logger);
		self
	}

	/// Override the default clock used by the inner [`ResourceCoordinator`].
	pub fn with_clock(mut self, clock: Arc<dyn TimestampProvider>) -> Self {
		self.resource = self.resource.with_clock(clock);
		self
	}

	/// A cold stream of [`Resource`] transitions over the cached [`PageBundle`] for `key`.
	pub async fn as_stream(
		&self,
		key: K,
		force_reload: bool,
	) -> Result<impl Stream<Item = Resource<PageBundle<V, M>>> + Send + 'static> {
		self.resource.as_stream(key, force_reload).await
	}

	/// The first non-`Loading` emission of the cached bundle for `key`.
	pub async fn get(&self, key: K, force_reload: bool, allow_loading_state: bool) -> Result<Resource<PageBundle<V, M>>> {
		self.resource.get(key, force_reload, allow_loading_state).await
	}

	/// Marks `key`'s first-page cache stale, forcing a reload of page one on next access.
	pub async fn invalidate(&self, key: K, force_reload: bool, emit_loading_on_reload: bool) -> Result<()> {
		self.resource.invalidate(key, force_reload, emit_loading_on_reload).await
	}

	/// The cached bundle for `key`, if any.
	pub async fn get_cached_value(&self, key: K) -> Result<Option<PageBundle<V, M>>> {
		self.resource.get_cached_value(key, true).await
	}

	/// Closes `key`'s coordinator and erases it from both registry and storage.
	pub async fn remove(&self, key: &K) -> Result<()> {
		self.resource.remove(key).await
	}

	/// Loads the next page for `key` and merges it into the cached bundle.
	///
	/// A no-op once the cached bundle reports `loaded_all`. Rejects with [`Error::Closed`] if
	/// another `loadNextPage` call (for any key) is already in flight on this coordinator.
	pub async fn load_next_page(&self, key: K) -> Result<()> {
		{
			let mut loading = self.loading.lock().await;

			if *loading {
				return Err(Error::Closed);
			}

			*loading = true;
		}

		let result = self.load_next_page_inner(key).await;

		*self.loading.lock().await = false;

		result
	}

	async fn load_next_page_inner(&self, key: K) -> Result<()> {
		let snapshot = self.resource.get(key.clone(), false, false).await?.data().cloned();

		if snapshot.as_ref().is_some_and(|bundle| bundle.loaded_all) {
			return Ok(());
		}

		let next_page = snapshot.as_ref().and_then(|bundle| bundle.next_page).unwrap_or(1);
		let response = self.load_page.load_page(&key, next_page, self.page_size).await?;
		let page_size = self.page_size;
		let duplicates_detection_enabled = self.duplicates_detection_enabled;
		let hooks = Arc::clone(&self.hooks);
		let factory = Arc::clone(&self.factory);

		self.resource
			.try_update_cached_value(
				key,
				move |existing| {
					// A concurrent update since the snapshot above wins; discard this page.
					if existing != snapshot {
						return Ok(existing);
					}

					let old = existing.unwrap_or_else(PageBundle::empty);

					if duplicates_detection_enabled {
						let duplicate = response.items.iter().any(|item| old.items.contains(item));

						if duplicate {
							return Err(Error::InconsistentPageData);
						}
					}

					hooks.check_consistency(&old, &response)?;

					let meta = hooks.build_meta(&old, &response);
					let loaded_all = (response.items.len() as u64) < page_size;
					let next_page = if loaded_all { None } else { Some(next_page + 1) };
					let mut items = old.items;

					items.extend(response.items.iter().cloned());

					Ok(Some(factory.create(items, loaded_all, next_page, meta)))
				},
				true,
			)
			.await
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn coordinator_with_pages(
		responses: std::collections::HashMap<u64, Vec<i32>>,
	) -> SizePageableCoordinator<&'static str, i32, ()> {
		let responses = Arc::new(responses);
		let load_page = move |_key: &&'static str, page: u64, _size: u64| {
			let responses = Arc::clone(&responses);

			async move { Ok(PageResponse { items: responses.get(&page).cloned().unwrap_or_default(), meta: None }) }
		};

		SizePageableCoordinator::in_memory(load_page, 2, false, None)
	}

	#[tokio::test]
	async fn s6_size_pagination_two_pages_of_two() {
		let mut responses = std::collections::HashMap::new();

		responses.insert(1, vec![1, 2]);
		responses.insert(2, vec![3]);

		let coordinator = coordinator_with_pages(responses);

		coordinator.get("k", false, false).await.unwrap();
		coordinator.load_next_page("k").await.unwrap();

		let bundle = coordinator.get_cached_value("k").await.unwrap().unwrap();

		assert_eq!(bundle.items, vec![1, 2, 3]);
		assert_eq!(bundle.next_page, None);
		assert!(bundle.loaded_all);
	}

	#[tokio::test]
	async fn loaded_all_makes_further_calls_no_ops() {
		let mut responses = std::collections::HashMap::new();

		responses.insert(1, vec![1]);

		let coordinator = coordinator_with_pages(responses);

		coordinator.get("k", false, false).await.unwrap();

		let first = coordinator.get_cached_value("k").await.unwrap().unwrap();

		assert!(first.loaded_all);

		coordinator.load_next_page("k").await.unwrap();

		let second = coordinator.get_cached_value("k").await.unwrap().unwrap();

		assert_eq!(first, second);
	}

	#[tokio::test]
	async fn duplicate_detection_rejects_overlap() {
		let mut responses = std::collections::HashMap::new();

		responses.insert(1, vec![1, 2]);
		responses.insert(2, vec![2, 3]);

		let coordinator: SizePageableCoordinator<&'static str, i32, ()> = SizePageableCoordinator::with_storage(
			Arc::new(crate::storage::InMemoryStorage::new()),
			{
				let responses = Arc::new(responses);

				move |_key: &&'static str, page: u64, _size: u64| {
					let responses = Arc::clone(&responses);

					async move { Ok(PageResponse { items: responses.get(&page).cloned().unwrap_or_default(), meta: None }) }
				}
			},
			2,
			true,
			None,
			Arc::new(DefaultSizePagingHooks),
		);

		coordinator.get("k", false, false).await.unwrap();

		let result = coordinator.load_next_page("k").await;

		assert!(matches!(result, Err(Error::InconsistentPageData)));
	}

	struct TaggingBundleFactory;

	impl PageBundleFactory<i32, &'static str> for TaggingBundleFactory {
		fn create(
			&self,
			items: Vec<i32>,
			loaded_all: bool,
			next_page: Option<u64>,
			_meta: Option<&'static str>,
		) -> PageBundle<i32, &'static str> {
			PageBundle { items, loaded_all, next_page, meta: Some("tagged") }
		}
	}

	#[tokio::test]
	async fn custom_bundle_factory_overrides_meta() {
		let mut responses = std::collections::HashMap::new();

		responses.insert(1, vec![1, 2]);

		let coordinator: SizePageableCoordinator<&'static str, i32, &'static str> =
			SizePageableCoordinator::with_storage_and_factory(
				Arc::new(crate::storage::InMemoryStorage::new()),
				{
					let responses = Arc::new(responses);

					move |_key: &&'static str, page: u64, _size: u64| {
						let responses = Arc::clone(&responses);

						async move { Ok(PageResponse { items: responses.get(&page).cloned().unwrap_or_default(), meta: None }) }
					}
				},
				2,
				false,
				None,
				Arc::new(DefaultSizePagingHooks),
				Arc::new(TaggingBundleFactory),
			);

		coordinator.get("k", false, false).await.unwrap();

		let bundle = coordinator.get_cached_value("k").await.unwrap().unwrap();

		assert_eq!(bundle.meta, Some("tagged"));
	}
}
