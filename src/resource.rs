//! The `Resource<V>` state machine emitted to subscribers.

use std::sync::Arc;

/// A value in flight through the loading/success/error lifecycle.
///
/// Equality is structural over `(state, data, message)`; the `cause` and `trace` fields on
/// [`Resource::Error`] carry diagnostic detail only and never affect dedup comparisons
/// performed by [`crate::cache::KeyCoordinator`]'s subscription streams.
#[derive(Clone)]
pub enum Resource<V> {
	/// A refresh is in progress. `data` is the last known value, if any.
	Loading {
		/// Last known value, carried through so UIs can render "stale + loading".
		data: Option<V>,
	},
	/// The current authoritative value.
	Success {
		/// The value, or `None` when no fetcher is configured and storage is empty.
		data: Option<V>,
	},
	/// The most recent refresh failed.
	Error {
		/// Previously cached value, if any.
		data: Option<V>,
		/// Human-readable failure description.
		message: String,
		/// Underlying cause of the failure, if available.
		cause: Option<Arc<dyn std::error::Error + Send + Sync>>,
		/// Opaque backtrace-like diagnostic payload.
		trace: Option<String>,
	},
}

impl<V> Resource<V> {
	/// Construct a [`Resource::Loading`] carrying `data`.
	pub fn loading(data: Option<V>) -> Self {
		Self::Loading { data }
	}

	/// Construct a [`Resource::Success`] carrying `data`.
	pub fn success(data: Option<V>) -> Self {
		Self::Success { data }
	}

	/// Construct a [`Resource::Error`] from a [`crate::Error`], preserving `data`.
	pub fn error(data: Option<V>, error: &crate::Error) -> Self {
		Self::Error { data, message: error.to_string(), cause: None, trace: None }
	}

	/// The value carried by this state, if any.
	pub fn data(&self) -> Option<&V> {
		match self {
			Self::Loading { data } | Self::Success { data } | Self::Error { data, .. } =>
				data.as_ref(),
		}
	}

	/// Whether this is a [`Resource::Loading`] state.
	pub fn is_loading(&self) -> bool {
		matches!(self, Self::Loading { .. })
	}

	/// Combine this resource with another, producing a new resource of type `R` via `fn`.
	///
	/// Follows the truth table: `Loading` dominates `Error`; when both sides are `Error`,
	/// `self`'s message is preserved (see DESIGN.md for the tie-break rationale).
	pub fn combine_with<W, R>(&self, other: &Resource<W>, f: impl FnOnce(&V, &W) -> R) -> Resource<R> {
		let combined = |a: Option<&V>, b: Option<&W>| match (a, b) {
			(Some(a), Some(b)) => Some(f(a, b)),
			_ => None,
		};

		match (self, other) {
			(Self::Success { data: a }, Resource::Success { data: b }) =>
				Resource::Success { data: combined(a.as_ref(), b.as_ref()) },
			(Self::Success { data: a }, Resource::Loading { data: b }) =>
				Resource::Loading { data: combined(a.as_ref(), b.as_ref()) },
			(Self::Success { data: a }, Resource::Error { data: b, message, cause, trace }) =>
				Resource::Error {
					data: combined(a.as_ref(), b.as_ref()),
					message: message.clone(),
					cause: cause.clone(),
					trace: trace.clone(),
				},
			(Self::Loading { data: a }, Resource::Success { data: b })
			| (Self::Loading { data: a }, Resource::Loading { data: b })
			| (Self::Loading { data: a }, Resource::Error { data: b, .. }) =>
				Resource::Loading { data: combined(a.as_ref(), b.as_ref()) },
			(Self::Error { data: a, .. }, Resource::Success { data: b })
			| (Self::Error { data: a, .. }, Resource::Loading { data: b }) =>
				Resource::Loading { data: combined(a.as_ref(), b.as_ref()) },
			(Self::Error { data: a, message, cause, trace }, Resource::Error { data: b, .. }) =>
				Resource::Error {
					data: combined(a.as_ref(), b.as_ref()),
					message: message.clone(),
					cause: cause.clone(),
					trace: trace.clone(),
				},
		}
	}
}

impl<V: std::fmt::Debug> std::fmt::Debug for Resource<V> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Loading { data } => f.debug_struct("Loading").field("data", data).finish(),
			Self::Success { data } => f.debug_struct("Success").field("data", data).finish(),
			Self::Error { data, message, .. } =>
				f.debug_struct("Error").field("data", data).field("message", message).finish(),
		}
	}
}

impl<V: PartialEq> PartialEq for Resource<V> {
	fn eq(&self, other: &Self) -> bool {
		match (self, other) {
			(Self::Loading { data: a }, Self::Loading { data: b }) => a == b,
			(Self::Success { data: a }, Self::Success { data: b }) => a == b,
			(
				Self::Error { data: a, message: ma, .. },
				Self::Error { data: b, message: mb, .. },
			) => a == b && ma == mb,
			_ => false,
		}
	}
}

impl<V: Eq> Eq for Resource<V> {}
