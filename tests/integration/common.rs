//! Shared test doubles for the integration suite.

use std::sync::atomic::{AtomicI64, Ordering};

use resource_coordinator::TimestampProvider;

/// A [`TimestampProvider`] whose clock only advances when told to, for deterministic scenario
/// tests.
#[derive(Debug)]
pub struct FixedClock {
	millis: AtomicI64,
}

impl FixedClock {
	/// Build a clock starting at `millis`.
	pub fn new(millis: i64) -> Self {
		Self { millis: AtomicI64::new(millis) }
	}

	/// Move the clock forward (or backward) by `delta` milliseconds.
	pub fn advance(&self, delta: i64) {
		self.millis.fetch_add(delta, Ordering::SeqCst);
	}
}

impl TimestampProvider for FixedClock {
	fn now_millis(&self) -> i64 {
		self.millis.load(Ordering::SeqCst)
	}
}
