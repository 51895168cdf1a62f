//! Offset+intersection pagination: pages are fetched by numeric offset, and each `loadNextPage`
//! call re-requests a trailing slice of already-loaded items to detect server-side reordering.

use std::{future::Future, marker::PhantomData, sync::Arc};

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

/// Loads one page of items at `offset` with at most `limit` entries.
#[async_trait]
pub trait LoadOffsetPage<K, V>: Send + Sync {
	/// Fetch `limit` items starting at `offset`.
	async fn load_page(&self, key: &K, offset: u64, limit: u64) -> Result<Vec<V>>;
}

#[async_trait]
impl<K, V, F, Fut> LoadOffsetPage<K, V> for F
where
	K: Send + Sync,
	V: Send + Sync,
	F: Fn(&K, u64, u64) -> Fut + Send + Sync,
	Fut: Future<Output = Result<Vec<V>>> + Send,
{
	async fn load_page(&self, key: &K, offset: u64, limit: u64) -> Result<Vec<V>> {
		self(key, offset, limit).await
	}
}

/// Fetcher plugged into the inner [`ResourceCoordinator`] that loads (or reuses) the first page.
///
/// Reuse predicate: if a cache already exists and its prefix equals the freshly-fetched first
/// page, the whole cache — including pages loaded past the first — is reused unchanged, so a
/// later `invalidate` + refresh cycle doesn't throw away pages 2..n just because page 1 still
/// matches.
struct FirstPageFetch<K, V, M> {
	storage: Arc<dyn StorageBackend<K, PageBundle<V, M>>>,
	load_page: Arc<dyn LoadOffsetPage<K, V>>,
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
		let first_page = self.load_page.load_page(key, 0, self.page_size).await?;

		if let Some(cache) = &cache {
			if cache.items.len() >= first_page.len() && cache.items[..first_page.len()] == first_page[..] {
				return Ok(cache.clone());
			}
		}

		let loaded_all = (first_page.len() as u64) < self.page_size;

		Ok(self.factory.create(first_page, loaded_all, None, None))
	}
}

/// Offset+intersection pagination coordinator.
///
/// `loadNextPage` re-requests the trailing `intersection_count` items of the already-loaded
/// prefix on every page call, so a mismatch between the expected and actual overlap surfaces a
/// server-side reordering as [`Error::InconsistentPageData`] instead of silently corrupting the
/// cached list.
pub struct OffsetPageableCoordinator<K, V, M = ()> {
	resource: ResourceCoordinator<K, PageBundle<V, M>>,
	load_page: Arc<dyn LoadOffsetPage<K, V>>,
	factory: Arc<dyn PageBundleFactory<V, M>>,
	page_size: u64,
	intersection_count: u64,
	/// Single-flight guard scoped to the whole coordinator, not per key: `loadNextPage` has its
	/// own non-reentrant single-flight boolean at the coordinator level.
	loading: Mutex<bool>,
	_marker: PhantomData<fn() -> V>,
}

impl<K, V, M> OffsetPageableCoordinator<K, V, M>
where
	K: Eq + std::hash::Hash + Clone + Send + Sync + 'static,
	V: Clone + PartialEq + Send + Sync + 'static,
	M: Clone + PartialEq + Send + Sync + 'static,
{
	/// Build a coordinator backed by an arbitrary storage backend.
	///
	/// `page_size` must exceed `intersection_count` (`pageSize > intersectionCount >= 0`);
	/// `cache_duration` governs how long a first-page fetch is considered fresh before a
	/// subscribe triggers a refetch (`None` means never refetch the first page on its own).
	pub fn with_storage(
		storage: Arc<dyn StorageBackend<K, PageBundle<V, M>>>,
		load_page: impl LoadOffsetPage<K, V> + 'static,
		page_size: u64,
		intersection_count: u64,
		cache_duration: Option<std::time::Duration>,
	) -> Self {
		Self::with_storage_and_factory(
			storage,
			load_page,
			page_size,
			intersection_count,
			cache_duration,
			Arc::new(DefaultPageBundleFactory),
		)
	}

	/// Like [`Self::with_storage`], but lets the caller override [`PageBundle`] construction (e.g.
	/// to derive `meta` from the first page's response) via a [`PageBundleFactory`].
	pub fn with_storage_and_factory(
		storage: Arc<dyn StorageBackend<K, PageBundle<V, M>>>,
		load_page: impl LoadOffsetPage<K, V> + 'static,
		page_size: u64,
		intersection_count: u64,
		cache_duration: Option<std::time::Duration>,
		factory: Arc<dyn PageBundleFactory<V, M>>,
	) -> Self {
		assert!(page_size > intersection_count, "page_size must exceed intersection_count");

		let load_page: Arc<dyn LoadOffsetPage<K, V>> = Arc::new(load_page);
		let first_page_fetch = FirstPageFetch {
			storage: Arc::clone(&storage),
			load_page: Arc::clone(&load_page),
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
			factory,
			page_size,
			intersection_count,
			loading: Mutex::new(false),
			_marker: PhantomData,
		}
	}

	/// Build a coordinator backed by the process-local [`crate::storage::InMemoryStorage`].
	pub fn in_memory(
		load_page: impl LoadOffsetPage<K, V> + 'static,
		page_size: u64,
		intersection_count: u64,
		cache_duration: Option<std::time::Duration>,
	) -> Self {
		Self::with_storage(
			Arc::new(crate::storage::InMemoryStorage::new()),
			load_page,
			page_size,
			intersection_count,
			cache_duration,
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
	/// Rejects with [`Error::Closed`] if another `loadNextPage` call (for any key) is already in
	/// flight on this coordinator. Fails with [`Error::InconsistentPageData`] if the newly
	/// fetched page's overlap with the cached tail doesn't match what was expected, leaving the
	/// cached bundle untouched; callers should respond by calling [`Self::invalidate`].
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
		let current = self.resource.get(key.clone(), false, false).await?.data().cloned();
		let loaded = current.as_ref().map(|bundle| bundle.items.len() as u64).unwrap_or(0);

		if current.as_ref().is_some_and(|bundle| bundle.loaded_all) {
			return Ok(());
		}

		let offset = loaded.saturating_sub(self.intersection_count);
		let expected_overlap = if offset == 0 { loaded } else { self.intersection_count };
		let new_page = self.load_page.load_page(&key, offset, self.page_size).await?;
		let page_size = self.page_size;
		let intersection_count = self.intersection_count;

		let new_page_len = new_page.len() as u64;
		let loaded_all = new_page_len < page_size;
		let _ = intersection_count;
		let factory = Arc::clone(&self.factory);

		self.resource
			.try_update_cached_value(
				key,
				move |existing| {
					let old_items = existing.map(|bundle| bundle.items).unwrap_or_default();

					if expected_overlap > 0 {
						let overlap = expected_overlap as usize;

						if old_items.len() < overlap
							|| new_page.len() < overlap
							|| old_items[old_items.len() - overlap..] != new_page[..overlap]
						{
							return Err(Error::InconsistentPageData);
						}
					}

					let mut items = old_items;
					items.extend(new_page.into_iter().skip(expected_overlap as usize));

					Ok(Some(factory.create(items, loaded_all, None, None)))
				},
				true,
			)
			.await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::policy::NeverStale;

	fn coordinator_with_pages(
		pages: Arc<tokio::sync::Mutex<Vec<(u64, u64)>>>,
		responses: std::collections::HashMap<(u64, u64), Vec<i32>>,
	) -> OffsetPageableCoordinator<&'static str, i32, ()> {
		let responses = Arc::new(responses);
		let load_page = move |_key: &&'static str, offset: u64, limit: u64| {
			let pages = Arc::clone(&pages);
			let responses = Arc::clone(&responses);

			async move {
				pages.lock().await.push((offset, limit));

				Ok(responses.get(&(offset, limit)).cloned().unwrap_or_default())
			}
		};

		OffsetPageableCoordinator::in_memory(load_page, 3, 1, None)
	}

	#[tokio::test]
	async fn s5_offset_pagination_four_items_intersection_one() {
		let calls = Arc::new(tokio::sync::Mutex::new(Vec::new()));
		let mut responses = std::collections::HashMap::new();

		responses.insert((0, 3), vec![1, 2, 3]);
		responses.insert((2, 3), vec![3, 4]);

		let coordinator = coordinator_with_pages(calls, responses);

		coordinator.get("k", false, false).await.unwrap();
		coordinator.load_next_page("k").await.unwrap();

		let bundle = coordinator.get_cached_value("k").await.unwrap().unwrap();

		assert_eq!(bundle.items, vec![1, 2, 3, 4]);
		assert!(bundle.loaded_all);
	}

	#[tokio::test]
	async fn s7_inconsistent_next_page_errors_and_preserves_cache() {
		let calls = Arc::new(tokio::sync::Mutex::new(Vec::new()));
		let mut responses = std::collections::HashMap::new();

		responses.insert((0, 3), vec![1, 2, 3]);
		responses.insert((2, 3), vec![99, 4, 5]);

		let coordinator = coordinator_with_pages(calls, responses);

		coordinator.get("k", false, false).await.unwrap();

		let result = coordinator.load_next_page("k").await;

		assert!(matches!(result, Err(Error::InconsistentPageData)));

		let bundle = coordinator.get_cached_value("k").await.unwrap().unwrap();

		assert_eq!(bundle.items, vec![1, 2, 3]);
		assert!(!bundle.loaded_all);
	}

	#[tokio::test]
	async fn reentrant_load_next_page_is_rejected() {
		let coordinator: OffsetPageableCoordinator<&'static str, i32, ()> = OffsetPageableCoordinator::in_memory(
			|_: &&'static str, _: u64, _: u64| async {
				tokio::time::sleep(std::time::Duration::from_millis(20)).await;
				Ok(vec![1, 2, 3])
			},
			3,
			1,
			None,
		);

		let a = coordinator.load_next_page("k");
		let b = coordinator.load_next_page("k");
		let (a, b) = tokio::join!(a, b);

		assert!(a.is_ok() ^ b.is_ok(), "exactly one concurrent call should be rejected");
		let _ = NeverStale;
	}

	struct CountingBundleFactory {
		builds: Arc<std::sync::atomic::AtomicU32>,
	}

	impl PageBundleFactory<i32, ()> for CountingBundleFactory {
		fn create(
			&self,
			items: Vec<i32>,
			loaded_all: bool,
			next_page: Option<u64>,
			meta: Option<()>,
		) -> PageBundle<i32, ()> {
			self.builds.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

			PageBundle { items, loaded_all, next_page, meta }
		}
	}

	#[tokio::test]
	async fn custom_bundle_factory_is_used_for_every_page() {
		let builds = Arc::new(std::sync::atomic::AtomicU32::new(0));
		let coordinator: OffsetPageableCoordinator<&'static str, i32, ()> =
			OffsetPageableCoordinator::with_storage_and_factory(
				Arc::new(crate::storage::InMemoryStorage::new()),
				|_: &&'static str, offset: u64, _: u64| async move {
					Ok(if offset == 0 { vec![1, 2, 3] } else { vec![3, 4] })
				},
				3,
				1,
				None,
				Arc::new(CountingBundleFactory { builds: Arc::clone(&builds) }),
			);

		coordinator.get("k", false, false).await.unwrap();
		coordinator.load_next_page("k").await.unwrap();

		assert_eq!(builds.load(std::sync::atomic::Ordering::SeqCst), 2);
	}
}
