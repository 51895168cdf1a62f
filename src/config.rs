//! Process-wide configuration surface.
//!
//! Resolved only at coordinator-construction time, similar in shape to the
//! `PROMETHEUS_HANDLE: OnceLock<PrometheusHandle>` singleton in `src/metrics.rs`: callers may set
//! a default once, early in process startup, and every family constructed afterwards without an
//! explicit override picks it up. Because the factory type is generic over `(K, V)`, the registry
//! is keyed by `TypeId` and stores each factory behind its own `Arc<dyn StorageFactory<K, V>>` —
//! a small type-erased-singleton pattern, not unlike `axum::Extension`'s per-type map.

use std::{
	any::{Any, TypeId},
	sync::{Arc, OnceLock, RwLock},
};

use crate::{
	Error, Result,
	logger::{Logger, TracingLogger},
	storage::{InMemoryStorage, StorageFactory},
};

type FactoryRegistry = RwLock<std::collections::HashMap<TypeId, Box<dyn Any + Send + Sync>>>;

static PERSISTENT_FACTORIES: OnceLock<FactoryRegistry> = OnceLock::new();
static SECURE_FACTORIES: OnceLock<FactoryRegistry> = OnceLock::new();
static IN_MEMORY_FACTORIES: OnceLock<FactoryRegistry> = OnceLock::new();
static LOGGER: OnceLock<Arc<dyn Logger>> = OnceLock::new();

fn registry(lock: &'static OnceLock<FactoryRegistry>) -> &'static FactoryRegistry {
	lock.get_or_init(|| RwLock::new(std::collections::HashMap::new()))
}

fn set_factory<K, V>(lock: &'static OnceLock<FactoryRegistry>, factory: Arc<dyn StorageFactory<K, V>>)
where
	K: Send + Sync + 'static,
	V: Send + Sync + 'static,
{
	let boxed: Box<dyn Any + Send + Sync> = Box::new(factory);

	registry(lock).write().expect("config registry lock poisoned").insert(TypeId::of::<(K, V)>(), boxed);
}

fn get_factory<K, V>(lock: &'static OnceLock<FactoryRegistry>) -> Option<Arc<dyn StorageFactory<K, V>>>
where
	K: Send + Sync + 'static,
	V: Send + Sync + 'static,
{
	registry(lock)
		.read()
		.expect("config registry lock poisoned")
		.get(&TypeId::of::<(K, V)>())
		.and_then(|boxed| boxed.downcast_ref::<Arc<dyn StorageFactory<K, V>>>())
		.cloned()
}

/// Process-wide default configuration for coordinator construction.
pub struct Config;

impl Config {
	/// Register the default persistent-storage factory for `(K, V)`.
	pub fn set_persistent_storage_factory<K, V>(factory: impl StorageFactory<K, V> + 'static)
	where
		K: Send + Sync + 'static,
		V: Send + Sync + 'static,
	{
		set_factory::<K, V>(&PERSISTENT_FACTORIES, Arc::new(factory));
	}

	/// Register the default secure-storage factory for `(K, V)`.
	pub fn set_secure_storage_factory<K, V>(factory: impl StorageFactory<K, V> + 'static)
	where
		K: Send + Sync + 'static,
		V: Send + Sync + 'static,
	{
		set_factory::<K, V>(&SECURE_FACTORIES, Arc::new(factory));
	}

	/// Override the default in-memory-storage factory for `(K, V)`, which otherwise builds a
	/// plain [`InMemoryStorage`].
	pub fn set_in_memory_storage_factory<K, V>(factory: impl StorageFactory<K, V> + 'static)
	where
		K: Send + Sync + 'static,
		V: Send + Sync + 'static,
	{
		set_factory::<K, V>(&IN_MEMORY_FACTORIES, Arc::new(factory));
	}

	/// Install the default [`Logger`] used when a coordinator is built without one.
	pub fn set_logger(logger: impl Logger + 'static) {
		let _ = LOGGER.set(Arc::new(logger));
	}

	/// Resolve the default persistent-storage factory, or a `ConfigurationMissing` error.
	pub fn persistent_storage_factory<K, V>() -> Result<Arc<dyn StorageFactory<K, V>>>
	where
		K: Send + Sync + 'static,
		V: Send + Sync + 'static,
	{
		get_factory::<K, V>(&PERSISTENT_FACTORIES)
			.ok_or(Error::ConfigurationMissing { factory: "persistent" })
	}

	/// Resolve the default secure-storage factory, or a `ConfigurationMissing` error.
	pub fn secure_storage_factory<K, V>() -> Result<Arc<dyn StorageFactory<K, V>>>
	where
		K: Send + Sync + 'static,
		V: Send + Sync + 'static,
	{
		get_factory::<K, V>(&SECURE_FACTORIES).ok_or(Error::ConfigurationMissing { factory: "secure" })
	}

	/// The default in-memory-storage factory: a caller-registered override if one was set via
	/// [`Self::set_in_memory_storage_factory`], otherwise a plain [`InMemoryStorage`] per family.
	pub fn in_memory_storage_factory<K, V>() -> Arc<dyn StorageFactory<K, V>>
	where
		K: Eq + std::hash::Hash + Send + Sync + 'static,
		V: Send + Sync + 'static,
	{
		get_factory::<K, V>(&IN_MEMORY_FACTORIES)
			.unwrap_or_else(|| Arc::new(|_: &str| Ok(Arc::new(InMemoryStorage::new()) as Arc<dyn crate::storage::StorageBackend<K, V>>)))
	}

	/// The process-wide default logger, a no-op-like [`TracingLogger`] unless overridden.
	pub fn logger() -> Arc<dyn Logger> {
		LOGGER.get_or_init(|| Arc::new(TracingLogger)).clone()
	}
}
