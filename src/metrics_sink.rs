//! Minimal metrics-recording seam between [`crate::cache::KeyCoordinator`] and the optional
//! `metrics` feature.
//!
//! Kept feature-independent so `KeyCoordinator`'s constructor shape never changes across feature
//! configurations: when `metrics` is enabled, [`crate::metrics::CoordinatorMetrics`] is wrapped
//! in an implementation of this trait and installed via
//! [`crate::cache::ResourceCoordinator::with_metrics`]; when disabled, every coordinator simply
//! carries `None` and these calls compile away to nothing at each call site.

use std::time::Duration;

/// Per-family counters a [`crate::cache::KeyCoordinator`] reports into, if one is configured.
pub(crate) trait MetricsSink: Send + Sync {
	/// A lookup was served from the cache without an origin call.
	fn record_hit(&self, stale: bool);

	/// A lookup required an origin call because no cached value existed.
	fn record_miss(&self);

	/// An origin call completed successfully in `duration`.
	fn record_refresh_success(&self, duration: Duration);

	/// An origin call failed.
	fn record_refresh_error(&self);
}
