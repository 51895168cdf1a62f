//! End-to-end coordinator scenarios (S1-S4; S5-S7 live alongside the pagination code in
//! `src/paging/{offset,size}.rs` since they exercise `PageableCoordinator` internals directly).

use std::sync::{
	Arc,
	atomic::{AtomicU32, Ordering},
};

use futures::StreamExt;
use resource_coordinator::{Error, FixedDuration, InMemoryStorage, Resource, ResourceCoordinator};

use crate::common::FixedClock;

fn family_with_clock(
	clock: Arc<FixedClock>,
	fetch: Option<Arc<dyn resource_coordinator::Fetch<&'static str, i32>>>,
) -> ResourceCoordinator<&'static str, i32> {
	ResourceCoordinator::with_storage(
		Arc::new(InMemoryStorage::with_clock(Arc::clone(&clock) as Arc<dyn resource_coordinator::TimestampProvider>)),
		fetch,
		Arc::new(FixedDuration::from_millis(100)),
	)
	.with_clock(clock)
}

fn family_fetch(calls: Arc<AtomicU32>) -> Arc<dyn resource_coordinator::Fetch<&'static str, i32>> {
	Arc::new(move |_: &&'static str| {
		let calls = Arc::clone(&calls);

		async move {
			calls.fetch_add(1, Ordering::SeqCst);

			Ok(2)
		}
	})
}

#[tokio::test]
async fn s1_fresh_hit_skips_fetch() {
	let clock = Arc::new(FixedClock::new(1_000));
	let storage = Arc::new(InMemoryStorage::with_clock(Arc::clone(&clock) as Arc<dyn resource_coordinator::TimestampProvider>));

	storage.put(&"k", 1, Some(1_000)).await.unwrap();

	let calls = Arc::new(AtomicU32::new(0));
	let family = ResourceCoordinator::with_storage(
		Arc::clone(&storage) as Arc<dyn resource_coordinator::StorageBackend<&'static str, i32>>,
		Some(family_fetch(Arc::clone(&calls))),
		Arc::new(FixedDuration::from_millis(100)),
	)
	.with_clock(Arc::clone(&clock) as Arc<dyn resource_coordinator::TimestampProvider>);

	let resource = family.get("k", false, false).await.unwrap();

	assert!(matches!(resource, Resource::Success { data: Some(1) }));
	assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn s2_stale_refresh_emits_loading_then_success() {
	let clock = Arc::new(FixedClock::new(1_000));
	let storage = Arc::new(InMemoryStorage::with_clock(Arc::clone(&clock) as Arc<dyn resource_coordinator::TimestampProvider>));

	storage.put(&"k", 1, Some(500)).await.unwrap();

	let calls = Arc::new(AtomicU32::new(0));
	let family = ResourceCoordinator::with_storage(
		Arc::clone(&storage) as Arc<dyn resource_coordinator::StorageBackend<&'static str, i32>>,
		Some(family_fetch(Arc::clone(&calls))),
		Arc::new(FixedDuration::from_millis(100)),
	)
	.with_clock(Arc::clone(&clock) as Arc<dyn resource_coordinator::TimestampProvider>);

	let mut stream = Box::pin(family.as_stream("k", false).await.unwrap());
	let first = stream.next().await.unwrap();
	let second = stream.next().await.unwrap();

	assert!(matches!(first, Resource::Loading { data: Some(1) }));
	assert!(matches!(second, Resource::Success { data: Some(2) }));

	let entry = storage.get_or_null(&"k").await.unwrap().unwrap();

	assert_eq!(entry.value, 2);
	assert_eq!(entry.store_time, 1_000);
	assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn s3_fetch_error_preserves_prior_cache() {
	let clock = Arc::new(FixedClock::new(1_000));
	let storage = Arc::new(InMemoryStorage::with_clock(Arc::clone(&clock) as Arc<dyn resource_coordinator::TimestampProvider>));

	storage.put(&"k", 1, Some(500)).await.unwrap();

	let fetch: Arc<dyn resource_coordinator::Fetch<&'static str, i32>> =
		Arc::new(|_: &&'static str| async { Err::<i32, _>(Error::origin_message("boom")) });
	let family = ResourceCoordinator::with_storage(
		Arc::clone(&storage) as Arc<dyn resource_coordinator::StorageBackend<&'static str, i32>>,
		Some(fetch),
		Arc::new(FixedDuration::from_millis(100)),
	)
	.with_clock(Arc::clone(&clock) as Arc<dyn resource_coordinator::TimestampProvider>);

	let mut stream = Box::pin(family.as_stream("k", false).await.unwrap());
	let first = stream.next().await.unwrap();
	let second = stream.next().await.unwrap();

	assert!(matches!(first, Resource::Loading { data: Some(1) }));
	match second {
		Resource::Error { data: Some(1), .. } => {},
		other => panic!("expected Error carrying stale data, got {other:?}"),
	}

	let entry = storage.get_or_null(&"k").await.unwrap().unwrap();

	assert_eq!(entry.value, 1);
	assert_eq!(entry.store_time, 500);
}

#[tokio::test]
async fn s4_concurrent_subscribers_share_one_fetch() {
	let clock = Arc::new(FixedClock::new(0));
	let calls = Arc::new(AtomicU32::new(0));
	let calls_for_fetch = Arc::clone(&calls);
	let fetch: Arc<dyn resource_coordinator::Fetch<&'static str, i32>> =
		Arc::new(move |_: &&'static str| {
			let calls = Arc::clone(&calls_for_fetch);

			async move {
				calls.fetch_add(1, Ordering::SeqCst);
				tokio::time::sleep(std::time::Duration::from_millis(30)).await;

				Ok(9)
			}
		});
	let family = family_with_clock(clock, Some(fetch));
	let family = Arc::new(family);

	let a = Arc::clone(&family);
	let b = Arc::clone(&family);
	let first = tokio::spawn(async move { a.get("k", false, false).await });

	tokio::time::sleep(std::time::Duration::from_millis(10)).await;

	let second = tokio::spawn(async move { b.get("k", false, false).await });
	let (first, second) = tokio::join!(first, second);

	assert!(matches!(first.unwrap().unwrap(), Resource::Success { data: Some(9) }));
	assert!(matches!(second.unwrap().unwrap(), Resource::Success { data: Some(9) }));
	assert_eq!(calls.load(Ordering::SeqCst), 1);
}
