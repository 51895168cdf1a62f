//! Staleness predicates deciding when a cached entry must be refreshed.

use std::sync::Arc;

use crate::storage::StorageEntry;

/// A predicate `(key, entry, now) → bool` deciding whether a cached entry must be refreshed.
///
/// `entry.store_time <= 0` is always stale under every variant except by explicit construction
/// (see [`StalenessPolicy::never_stale`], which truly never refreshes).
pub trait StalenessPolicy<K, V>: Send + Sync {
	/// Whether the given entry is stale at `now` (a millisecond timestamp).
	fn is_stale(&self, key: &K, entry: &StorageEntry<V>, now: i64) -> bool;
}

/// Never refreshes once a value has been stored.
#[derive(Clone, Copy, Debug, Default)]
pub struct NeverStale;

impl<K, V> StalenessPolicy<K, V> for NeverStale {
	fn is_stale(&self, _key: &K, _entry: &StorageEntry<V>, _now: i64) -> bool {
		false
	}
}

/// Refreshes once `duration_millis` has elapsed since `store_time`, or immediately when the
/// entry has been invalidated (`store_time <= 0`).
#[derive(Clone, Copy, Debug)]
pub struct FixedDuration {
	duration_millis: i64,
}

impl FixedDuration {
	/// Build a policy from a [`std::time::Duration`].
	pub fn new(duration: std::time::Duration) -> Self {
		Self { duration_millis: duration.as_millis() as i64 }
	}

	/// Build a policy directly from a millisecond duration.
	pub fn from_millis(duration_millis: i64) -> Self {
		Self { duration_millis }
	}
}

impl<K, V> StalenessPolicy<K, V> for FixedDuration {
	fn is_stale(&self, _key: &K, entry: &StorageEntry<V>, now: i64) -> bool {
		entry.store_time <= 0 || entry.store_time < now - self.duration_millis
	}
}

/// Delegates to a user-supplied closure.
pub struct Delegated<F> {
	f: F,
}

impl<F> Delegated<F> {
	/// Wrap `f` as a [`StalenessPolicy`].
	pub fn new(f: F) -> Self {
		Self { f }
	}
}

impl<K, V, F> StalenessPolicy<K, V> for Delegated<F>
where
	F: Fn(&K, &StorageEntry<V>, i64) -> bool + Send + Sync,
{
	fn is_stale(&self, key: &K, entry: &StorageEntry<V>, now: i64) -> bool {
		(self.f)(key, entry, now)
	}
}

/// Picks a different policy per key or per value, then delegates to it.
///
/// Constructing a [`KeyResolved`] whose resolver can return an equivalent `KeyResolved` for the
/// same key would recurse forever; callers are responsible for avoiding that, since it isn't
/// something this type can check for a dynamically dispatched delegate.
pub struct KeyResolved<K, V> {
	resolve: Box<dyn Fn(&K, &StorageEntry<V>) -> Arc<dyn StalenessPolicy<K, V>> + Send + Sync>,
}

impl<K, V> KeyResolved<K, V> {
	/// Build a policy that resolves a delegate per `(key, entry)` pair.
	pub fn new(
		resolve: impl Fn(&K, &StorageEntry<V>) -> Arc<dyn StalenessPolicy<K, V>> + Send + Sync + 'static,
	) -> Self {
		Self { resolve: Box::new(resolve) }
	}
}

impl<K, V> StalenessPolicy<K, V> for KeyResolved<K, V> {
	fn is_stale(&self, key: &K, entry: &StorageEntry<V>, now: i64) -> bool {
		(self.resolve)(key, entry).is_stale(key, entry, now)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn entry(store_time: i64) -> StorageEntry<i32> {
		StorageEntry::new(1, store_time)
	}

	#[test]
	fn never_stale_is_never_stale() {
		let policy = NeverStale;

		assert!(!StalenessPolicy::<(), i32>::is_stale(&policy, &(), &entry(0), 1_000));
		assert!(!StalenessPolicy::<(), i32>::is_stale(&policy, &(), &entry(-5), 1_000));
	}

	#[test]
	fn fixed_duration_treats_invalidated_as_always_stale() {
		let policy = FixedDuration::from_millis(100);

		assert!(StalenessPolicy::<(), i32>::is_stale(&policy, &(), &entry(0), 1_000));
	}

	#[test]
	fn fixed_duration_respects_window() {
		let policy = FixedDuration::from_millis(100);

		assert!(!StalenessPolicy::<(), i32>::is_stale(&policy, &(), &entry(950), 1_000));
		assert!(StalenessPolicy::<(), i32>::is_stale(&policy, &(), &entry(500), 1_000));
	}

	#[test]
	fn delegated_forwards_to_closure() {
		let policy = Delegated::new(|_key: &(), entry: &StorageEntry<i32>, _now: i64| entry.value > 0);

		assert!(StalenessPolicy::<(), i32>::is_stale(&policy, &(), &entry(1_000), 1_000));
	}

	#[test]
	fn key_resolved_picks_delegate_per_key() {
		let policy: KeyResolved<&'static str, i32> = KeyResolved::new(|key, _entry| {
			if *key == "never" {
				Arc::new(NeverStale) as Arc<dyn StalenessPolicy<&'static str, i32>>
			} else {
				Arc::new(FixedDuration::from_millis(100))
			}
		});

		assert!(!policy.is_stale(&"never", &entry(0), 1_000));
		assert!(policy.is_stale(&"other", &entry(0), 1_000));
	}
}
