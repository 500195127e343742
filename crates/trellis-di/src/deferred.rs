//! Deferred dependency handles
//!
//! A deferred edge hands its provider a [`DeferredHandle`] instead of a
//! value. The handle holds the scope instance that built the dependent
//! weakly, so it never keeps a closed scope alive, and resolves its target
//! there only when invoked.

use crate::args::downcast;
use crate::cycle_detection::with_cycle_detection_scope;
use crate::error::{DiError, DiResult};
use crate::key::DependencyKey;
use crate::provider::Instance;
use crate::resolver::ScopeNode;
use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

/// Lazily resolves one dependency in the scope its holder was built in.
///
/// Scoped and singleton targets yield the same cached instance on every
/// call; transient targets yield a fresh one.
#[derive(Clone)]
pub struct DeferredHandle {
	node: Weak<ScopeNode>,
	key: DependencyKey,
}

impl DeferredHandle {
	pub(crate) fn new(node: &Arc<ScopeNode>, key: DependencyKey) -> Self {
		Self {
			node: Arc::downgrade(node),
			key,
		}
	}

	pub fn key(&self) -> &DependencyKey {
		&self.key
	}

	fn node(&self) -> DiResult<Arc<ScopeNode>> {
		let node = self
			.node
			.upgrade()
			.ok_or_else(|| DiError::scope_mismatch(&self.key, "the scope of this handle is gone"))?;
		if node.is_closed() {
			return Err(DiError::scope_mismatch(
				&self.key,
				format!("the {} scope of this handle is closed", node.level.name),
			));
		}
		Ok(node)
	}

	/// Resolves the target on the blocking path.
	pub fn get(&self) -> DiResult<Instance> {
		self.node()?.resolve_sync(&self.key)
	}

	pub fn get_as<T: Any + Send + Sync>(&self) -> DiResult<Arc<T>> {
		downcast(self.get()?, &self.key)
	}

	/// Resolves the target on the async path.
	pub async fn get_async(&self) -> DiResult<Instance> {
		let node = self.node()?;
		with_cycle_detection_scope(node.resolve_async(&self.key)).await
	}

	pub async fn get_async_as<T: Any + Send + Sync>(&self) -> DiResult<Arc<T>> {
		downcast(self.get_async().await?, &self.key)
	}
}

impl fmt::Debug for DeferredHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("DeferredHandle")
			.field("key", &self.key)
			.field("live", &(self.node.strong_count() > 0))
			.finish()
	}
}
