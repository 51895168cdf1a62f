//! The `Logger` external collaborator, defaulting to a `tracing`-backed sink.

/// Severity level for [`Logger::trace`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
	/// Diagnostic detail, e.g. a cache hit or a scheduled background refresh.
	Debug,
	/// Recoverable anomaly, e.g. serving stale data after a failed refresh.
	Warning,
	/// A failure surfaced to callers, e.g. a decode error.
	Error,
}

/// Logging sink consumed by the coordinator. Defaults to [`TracingLogger`].
pub trait Logger: Send + Sync {
	/// Emit a log line at `level`.
	fn trace(&self, level: LogLevel, message: &str, cause: Option<&crate::Error>);
}

/// [`Logger`] that forwards to the `tracing` crate at the matching level.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
	fn trace(&self, level: LogLevel, message: &str, cause: Option<&crate::Error>) {
		match (level, cause) {
			(LogLevel::Debug, None) => tracing::debug!("{message}"),
			(LogLevel::Debug, Some(cause)) => tracing::debug!(error = %cause, "{message}"),
			(LogLevel::Warning, None) => tracing::warn!("{message}"),
			(LogLevel::Warning, Some(cause)) => tracing::warn!(error = %cause, "{message}"),
			(LogLevel::Error, None) => tracing::error!("{message}"),
			(LogLevel::Error, Some(cause)) => tracing::error!(error = %cause, "{message}"),
		}
	}
}

/// [`Logger`] that discards everything, for tests that don't want log noise.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopLogger;

impl Logger for NoopLogger {
	fn trace(&self, _level: LogLevel, _message: &str, _cause: Option<&crate::Error>) {}
}
