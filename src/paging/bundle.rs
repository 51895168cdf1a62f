//! The cached, growing list value both pagination strategies read and write.

/// The aggregated pagination value cached for a key: every item loaded so far plus enough
/// cursor/exhaustion metadata to know whether another page remains.
///
/// `next_page` is populated only by the size+page variant; the offset+intersection variant has
/// no explicit cursor and leaves it `None`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageBundle<V, M> {
	/// Every item loaded so far, in origin order.
	pub items: Vec<V>,
	/// Whether the origin has been exhausted.
	pub loaded_all: bool,
	/// Size-mode cursor for the next page to request; always `None` in offset mode.
	pub next_page: Option<u64>,
	/// Opaque, user-extensible metadata (e.g. a total item count).
	pub meta: Option<M>,
}

impl<V, M> PageBundle<V, M> {
	/// An empty bundle with nothing loaded yet.
	pub fn empty() -> Self {
		Self { items: Vec::new(), loaded_all: false, next_page: None, meta: None }
	}
}

/// Builds a [`PageBundle`] from a page response, letting callers swap in a custom bundle
/// construction (e.g. deriving `meta` from response headers).
///
/// Subclassing is optional: [`DefaultPageBundleFactory`] is used unless a [`PageBundleFactory`]
/// is supplied explicitly.
pub trait PageBundleFactory<V, M>: Send + Sync {
	/// Build a bundle from accumulated `items` and this page's exhaustion/cursor/meta state.
	fn create(&self, items: Vec<V>, loaded_all: bool, next_page: Option<u64>, meta: Option<M>) -> PageBundle<V, M>;
}

/// [`PageBundleFactory`] that constructs a plain [`PageBundle`] verbatim.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultPageBundleFactory;

impl<V, M> PageBundleFactory<V, M> for DefaultPageBundleFactory
where
	V: Send + Sync,
	M: Send + Sync,
{
	fn create(&self, items: Vec<V>, loaded_all: bool, next_page: Option<u64>, meta: Option<M>) -> PageBundle<V, M> {
		PageBundle { items, loaded_all, next_page, meta }
	}
}
