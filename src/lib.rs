//! A client-side resource cache coordinator implementing the single-source-of-truth pattern for
//! values fetched from an external origin.
//!
//! For each *(resource family, key)* pair the crate coordinates: a pluggable persistent or
//! in-memory store of the last known value with a store-timestamp, a cold subscription stream
//! emitting a [`Resource`] state machine (`Loading` / `Success` / `Error`) to any number of
//! observers, single-flight refresh so concurrent demand for the same key produces at most one
//! origin call, a pluggable [`StalenessPolicy`], and two pagination strategies built on the same
//! primitives.
//!
//! The dependency order is [`StalenessPolicy`] ← [`KeyCoordinator`] ← [`ResourceCoordinator`] ←
//! [`paging`]'s `OffsetPageableCoordinator`/`SizePageableCoordinator`.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod cache;
pub mod config;
pub mod fetch;
pub mod logger;
#[cfg(feature = "metrics")] pub mod metrics;
pub mod paging;
pub mod policy;
pub mod resource;
pub mod storage;

mod error;
mod metrics_sink;

#[cfg(feature = "prometheus")] pub use crate::metrics::install_default_exporter;
#[cfg(feature = "metrics")] pub use crate::metrics::{CoordinatorMetrics, CoordinatorMetricsSnapshot};
pub use crate::{
	cache::{KeyCoordinator, ResourceCoordinator},
	config::Config,
	error::{Error, Result},
	fetch::Fetch,
	logger::{LogLevel, Logger},
	paging::{
		DefaultPageBundleFactory, DefaultSizePagingHooks, LoadOffsetPage, LoadSizePage, OffsetPageableCoordinator,
		PageBundle, PageBundleFactory, PageResponse, SizePageableCoordinator, SizePagingHooks,
	},
	policy::{Delegated, FixedDuration, KeyResolved, NeverStale, StalenessPolicy},
	resource::Resource,
	storage::{InMemoryStorage, StorageBackend, StorageEntry, StorageFactory, SystemClock, TimestampProvider},
};
