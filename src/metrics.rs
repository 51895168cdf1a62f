//! Optional `metrics`/`metrics-exporter-prometheus` instrumentation (feature `metrics`).
//!
//! A per-family `CoordinatorMetrics` accumulator: every [`crate::cache::ResourceCoordinator`]
//! family can hold one, tagged by its family name, tracking cache hits/misses/stale-serves and
//! refresh outcomes/latency.

// std
use std::sync::{
	Arc, OnceLock,
	atomic::{AtomicU64, Ordering},
};
// crates.io
use metrics::Label;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use smallvec::SmallVec;

use crate::Result;

type LabelSet = SmallVec<[Label; 2]>;

const METRIC_REQUESTS_TOTAL: &str = "resource_cache_requests_total";
const METRIC_HITS_TOTAL: &str = "resource_cache_hits_total";
const METRIC_STALE_TOTAL: &str = "resource_cache_stale_total";
const METRIC_MISSES_TOTAL: &str = "resource_cache_misses_total";
const METRIC_REFRESH_TOTAL: &str = "resource_cache_refresh_total";
const METRIC_REFRESH_DURATION: &str = "resource_cache_refresh_duration_seconds";
const METRIC_REFRESH_ERRORS: &str = "resource_cache_refresh_errors_total";

/// Shared Prometheus handle installed by [`install_default_exporter`].
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the default Prometheus recorder backed by `metrics` (feature `prometheus`).
///
/// Multiple invocations are safe; subsequent calls become no-ops once the recorder is installed.
pub fn install_default_exporter() -> Result<()> {
	if PROMETHEUS_HANDLE.get().is_some() {
		return Ok(());
	}

	let handle = PrometheusBuilder::new()
		.install_recorder()
		.map_err(|err| crate::Error::origin_message(err.to_string()))?;

	let _ = PROMETHEUS_HANDLE.set(handle);

	Ok(())
}

/// Access the global Prometheus exporter handle when installed.
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
	PROMETHEUS_HANDLE.get()
}

/// Thread-safe telemetry accumulator for one [`crate::cache::ResourceCoordinator`] family.
#[derive(Debug, Default)]
pub struct CoordinatorMetrics {
	total_requests: AtomicU64,
	cache_hits: AtomicU64,
	stale_serves: AtomicU64,
	refresh_successes: AtomicU64,
	refresh_errors: AtomicU64,
	last_refresh_micros: AtomicU64,
}

impl CoordinatorMetrics {
	/// Create a new, zeroed accumulator.
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Record a cache hit, tagging whether the served value was stale.
	pub fn record_hit(&self, family: &str, stale: bool) {
		self.total_requests.fetch_add(1, Ordering::Relaxed);
		self.cache_hits.fetch_add(1, Ordering::Relaxed);

		let labels = family_labels(family);

		metrics::counter!(METRIC_REQUESTS_TOTAL, labels.iter()).increment(1);
		metrics::counter!(METRIC_HITS_TOTAL, labels.iter()).increment(1);

		if stale {
			self.stale_serves.fetch_add(1, Ordering::Relaxed);
			metrics::counter!(METRIC_STALE_TOTAL, labels.iter()).increment(1);
		}
	}

	/// Record a cache miss that required an origin fetch.
	pub fn record_miss(&self, family: &str) {
		self.total_requests.fetch_add(1, Ordering::Relaxed);

		let labels = family_labels(family);

		metrics::counter!(METRIC_REQUESTS_TOTAL, labels.iter()).increment(1);
		metrics::counter!(METRIC_MISSES_TOTAL, labels.iter()).increment(1);
	}

	/// Record a successful refresh and its latency.
	pub fn record_refresh_success(&self, family: &str, duration: std::time::Duration) {
		self.refresh_successes.fetch_add(1, Ordering::Relaxed);
		self.last_refresh_micros.store(duration.as_micros() as u64, Ordering::Relaxed);

		metrics::counter!(METRIC_REFRESH_TOTAL, status_labels(family, "success").iter()).increment(1);
		metrics::histogram!(METRIC_REFRESH_DURATION, family_labels(family).iter()).record(duration.as_secs_f64());
	}

	/// Record a failed refresh attempt.
	pub fn record_refresh_error(&self, family: &str) {
		self.refresh_errors.fetch_add(1, Ordering::Relaxed);

		metrics::counter!(METRIC_REFRESH_TOTAL, status_labels(family, "error").iter()).increment(1);
		metrics::counter!(METRIC_REFRESH_ERRORS, family_labels(family).iter()).increment(1);
	}

	/// Take a point-in-time snapshot for status reporting.
	pub fn snapshot(&self) -> CoordinatorMetricsSnapshot {
		CoordinatorMetricsSnapshot {
			total_requests: self.total_requests.load(Ordering::Relaxed),
			cache_hits: self.cache_hits.load(Ordering::Relaxed),
			stale_serves: self.stale_serves.load(Ordering::Relaxed),
			refresh_successes: self.refresh_successes.load(Ordering::Relaxed),
			refresh_errors: self.refresh_errors.load(Ordering::Relaxed),
			last_refresh_micros: match self.last_refresh_micros.load(Ordering::Relaxed) {
				0 => None,
				value => Some(value),
			},
		}
	}
}

/// Read-only snapshot of per-family telemetry counters.
#[derive(Clone, Debug)]
pub struct CoordinatorMetricsSnapshot {
	/// Total number of cache lookups observed.
	pub total_requests: u64,
	/// Count of lookups served from the cache (fresh or stale).
	pub cache_hits: u64,
	/// Count of lookups served from a stale payload.
	pub stale_serves: u64,
	/// Count of successful refresh operations.
	pub refresh_successes: u64,
	/// Count of refresh attempts that resulted in errors.
	pub refresh_errors: u64,
	/// Microsecond latency of the most recent successful refresh.
	pub last_refresh_micros: Option<u64>,
}

impl CoordinatorMetricsSnapshot {
	/// Fraction of lookups served from the cache.
	pub fn hit_rate(&self) -> f64 {
		if self.total_requests == 0 { 0.0 } else { self.cache_hits as f64 / self.total_requests as f64 }
	}

	/// Fraction of lookups served from a stale payload.
	pub fn stale_ratio(&self) -> f64 {
		if self.total_requests == 0 { 0.0 } else { self.stale_serves as f64 / self.total_requests as f64 }
	}
}

/// Binds a [`CoordinatorMetrics`] accumulator to one family name so it can be installed on a
/// [`crate::cache::ResourceCoordinator`] as a [`crate::metrics_sink::MetricsSink`].
pub(crate) struct FamilyMetrics {
	family: Arc<str>,
	metrics: Arc<CoordinatorMetrics>,
}

impl FamilyMetrics {
	pub(crate) fn new(family: Arc<str>, metrics: Arc<CoordinatorMetrics>) -> Self {
		Self { family, metrics }
	}
}

impl crate::metrics_sink::MetricsSink for FamilyMetrics {
	fn record_hit(&self, stale: bool) {
		self.metrics.record_hit(&self.family, stale);
	}

	fn record_miss(&self) {
		self.metrics.record_miss(&self.family);
	}

	fn record_refresh_success(&self, duration: std::time::Duration) {
		self.metrics.record_refresh_success(&self.family, duration);
	}

	fn record_refresh_error(&self) {
		self.metrics.record_refresh_error(&self.family);
	}
}

fn family_labels(family: &str) -> LabelSet {
	let mut labels = LabelSet::with_capacity(1);

	labels.push(Label::new("family", family.to_owned()));

	labels
}

fn status_labels(family: &str, status: &'static str) -> LabelSet {
	let mut labels = family_labels(family);

	labels.push(Label::new("status", status));

	labels
}

#[cfg(test)]
mod tests {
	// std
	use std::borrow::Borrow;
	// crates.io
	use metrics_util::{
		CompositeKey, MetricKind,
		debugging::{DebugValue, DebuggingRecorder},
	};
	// self
	use super::*;

	fn capture_metrics<F>(f: F) -> Vec<(CompositeKey, DebugValue)>
	where
		F: FnOnce(),
	{
		let recorder = DebuggingRecorder::new();
		let snapshotter = recorder.snapshotter();

		metrics::with_local_recorder(&recorder, f);

		snapshotter.snapshot().into_vec().into_iter().map(|(key, _, _, value)| (key, value)).collect()
	}

	fn counter_value(snapshot: &[(CompositeKey, DebugValue)], name: &str, labels: &[(&str, &str)]) -> u64 {
		snapshot
			.iter()
			.find_map(|(key, value)| {
				(key.kind() == MetricKind::Counter
					&& Borrow::<str>::borrow(key.key().name()) == name
					&& labels_match(key, labels))
				.then(|| match value {
					DebugValue::Counter(value) => *value,
					_ => 0,
				})
			})
			.unwrap_or(0)
	}

	fn labels_match(key: &CompositeKey, expected: &[(&str, &str)]) -> bool {
		let mut labels: Vec<_> = key.key().labels().map(|label| (label.key(), label.value())).collect();

		labels.sort_unstable();

		let mut expected_sorted: Vec<_> = expected.to_vec();

		expected_sorted.sort_unstable();

		labels.len() == expected_sorted.len()
			&& labels.into_iter().zip(expected_sorted).all(|((lk, lv), (ek, ev))| lk == ek && lv == ev)
	}

	#[test]
	fn records_hits_misses_and_stale_counts() {
		let metrics = CoordinatorMetrics::new();
		let snapshot = capture_metrics(|| {
			metrics.record_hit("products", false);
			metrics.record_hit("products", true);
			metrics.record_miss("products");
		});
		let base = [("family", "products")];

		assert_eq!(counter_value(&snapshot, "resource_cache_requests_total", &base), 3);
		assert_eq!(counter_value(&snapshot, "resource_cache_hits_total", &base), 2);
		assert_eq!(counter_value(&snapshot, "resource_cache_misses_total", &base), 1);
		assert_eq!(counter_value(&snapshot, "resource_cache_stale_total", &base), 1);

		let local = metrics.snapshot();

		assert_eq!(local.total_requests, 3);
		assert!((local.hit_rate() - (2.0 / 3.0)).abs() < 1e-9);
	}

	#[test]
	fn records_refresh_success_and_errors() {
		let metrics = CoordinatorMetrics::new();

		capture_metrics(|| {
			metrics.record_refresh_success("products", std::time::Duration::from_millis(20));
			metrics.record_refresh_error("products");
		});

		let snapshot = metrics.snapshot();

		assert_eq!(snapshot.refresh_successes, 1);
		assert_eq!(snapshot.refresh_errors, 1);
		assert_eq!(snapshot.last_refresh_micros, Some(20_000));
	}
}
