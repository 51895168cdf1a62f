//! Crate-wide error types and `Result` alias.

use std::sync::Arc;

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the resource coordinator crate.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
	/// A `fetch`/`loadPage` callable failed. Cached data (if any) survives the failure.
	#[error("origin call failed: {message}")]
	Origin {
		/// Human-readable failure message.
		message: String,
		/// Underlying cause, if the fetcher produced one.
		cause: Option<Arc<dyn std::error::Error + Send + Sync>>,
	},

	/// `loadNextPage` detected an overlap or duplicate mismatch against the cached bundle.
	#[error("inconsistent page data for key")]
	InconsistentPageData,

	/// A persistent/secure family was constructed without the corresponding factory registered.
	#[error("configuration missing: {factory} factory has not been registered")]
	ConfigurationMissing {
		/// Name of the absent factory (`"persistent"` or `"secure"`).
		factory: &'static str,
	},

	/// The storage backend failed to decode a stored representation.
	#[error("failed to decode stored value: {0}")]
	Decode(String),

	/// An operation was invoked on a coordinator that has already been closed.
	#[error("coordinator is closed")]
	Closed,

	/// JSON (de)serialization failure from a storage backend.
	#[error(transparent)]
	Json(#[from] Arc<serde_json::Error>),

	/// I/O failure from a storage backend.
	#[error(transparent)]
	Io(#[from] Arc<std::io::Error>),

	/// Redis backend failure (feature `redis`).
	#[cfg(feature = "redis")]
	#[error(transparent)]
	Redis(#[from] Arc<redis::RedisError>),
}

impl Error {
	/// Build an [`Error::Origin`] from any standard error.
	pub fn origin<E>(cause: E) -> Self
	where
		E: std::error::Error + Send + Sync + 'static,
	{
		Self::Origin { message: cause.to_string(), cause: Some(Arc::new(cause)) }
	}

	/// Build an [`Error::Origin`] from a bare message with no underlying cause.
	pub fn origin_message(message: impl Into<String>) -> Self {
		Self::Origin { message: message.into(), cause: None }
	}
}

impl From<std::io::Error> for Error {
	fn from(value: std::io::Error) -> Self {
		Self::Io(Arc::new(value))
	}
}

impl From<serde_json::Error> for Error {
	fn from(value: serde_json::Error) -> Self {
		Self::Json(Arc::new(value))
	}
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for Error {
	fn from(value: redis::RedisError) -> Self {
		Self::Redis(Arc::new(value))
	}
}
