//! Resolvers and scope instances
//!
//! A [`ResolverFactory`] is the compiled form of a registry. Every
//! [`Resolver`] it hands out wraps one scope instance: a node in a tree that
//! mirrors the scope ladder, carrying its own cache, per-slot construction
//! locks, cleanup stack and context values.
//!
//! Entering a scope creates a child node one or more levels deeper; the
//! skipped skippable levels in between are created as intermediate nodes
//! owned by the new resolver. Closing a node first closes its live children,
//! then unwinds its own cleanup stack newest first.

use crate::args::downcast;
use crate::cleanup::{CleanupStack, settle};
use crate::cycle_detection::with_cycle_detection_scope;
use crate::error::{DiError, DiResult};
use crate::key::DependencyKey;
use crate::planner::{CacheOwner, Graph, ProviderWorkflow, ResolutionPlan};
use crate::provider::{Instance, Slot};
use crate::registry::ProviderRegistry;
use crate::scope::{ScopeCache, ScopeLadder, ScopeLevel, ScopeName};
use crate::settings::ResolverSettings;
use crate::synthesizer::DispatchTable;
use futures::future::BoxFuture;
use parking_lot::{Mutex, ReentrantMutex};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Values attached to a scope at entry, read by from-context edges.
#[derive(Clone, Default)]
pub struct ContextMap {
	values: HashMap<DependencyKey, Instance>,
}

impl ContextMap {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert(&mut self, key: impl Into<DependencyKey>, value: Instance) -> &mut Self {
		self.values.insert(key.into(), value);
		self
	}

	/// Stores `value` under the key of its own type.
	pub fn insert_value<T: Any + Send + Sync>(&mut self, value: T) -> &mut Self {
		self.insert(DependencyKey::of::<T>(), Arc::new(value))
	}

	/// Builder-style [`insert`](Self::insert).
	pub fn with(mut self, key: impl Into<DependencyKey>, value: Instance) -> Self {
		self.insert(key, value);
		self
	}

	pub fn get(&self, key: &DependencyKey) -> Option<&Instance> {
		self.values.get(key)
	}

	pub fn len(&self) -> usize {
		self.values.len()
	}

	pub fn is_empty(&self) -> bool {
		self.values.is_empty()
	}
}

impl fmt::Debug for ContextMap {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_set().entries(self.values.keys()).finish()
	}
}

/// State shared by every scope instance of one compiled factory.
pub(crate) struct FactoryShared {
	pub(crate) graph: Graph,
	pub(crate) table: DispatchTable,
	next_node_id: AtomicU64,
}

/// One live scope instance.
pub(crate) struct ScopeNode {
	pub(crate) id: u64,
	pub(crate) level: ScopeLevel,
	parent: Option<Arc<ScopeNode>>,
	shared: Arc<FactoryShared>,
	pub(crate) cache: ScopeCache,
	thread_locks: Mutex<HashMap<Slot, Arc<ReentrantMutex<()>>>>,
	cooperative_locks: Mutex<HashMap<Slot, Arc<tokio::sync::Mutex<()>>>>,
	pub(crate) cleanup: CleanupStack,
	context: ContextMap,
	children: Mutex<Vec<Weak<ScopeNode>>>,
	closed: AtomicBool,
}

impl ScopeNode {
	fn create(
		shared: &Arc<FactoryShared>,
		parent: Option<&Arc<ScopeNode>>,
		level: ScopeLevel,
		context: ContextMap,
	) -> Arc<Self> {
		let node = Arc::new(Self {
			id: shared.next_node_id.fetch_add(1, Ordering::Relaxed),
			level,
			parent: parent.cloned(),
			shared: shared.clone(),
			cache: ScopeCache::new(),
			thread_locks: Mutex::new(HashMap::new()),
			cooperative_locks: Mutex::new(HashMap::new()),
			cleanup: CleanupStack::new(),
			context,
			children: Mutex::new(Vec::new()),
			closed: AtomicBool::new(false),
		});
		if let Some(parent) = parent {
			let mut children = parent.children.lock();
			children.retain(|child| child.strong_count() > 0);
			children.push(Arc::downgrade(&node));
		}
		tracing::trace!(scope = %node.level.name, id = node.id, "scope entered");
		node
	}

	pub(crate) fn is_closed(&self) -> bool {
		self.closed.load(Ordering::Acquire)
	}

	pub(crate) fn resolve_sync(self: &Arc<Self>, key: &DependencyKey) -> DiResult<Instance> {
		let routine = self.shared.table.routine(&self.shared.graph, key)?;
		routine.resolve_sync(self)
	}

	pub(crate) async fn resolve_async(self: &Arc<Self>, key: &DependencyKey) -> DiResult<Instance> {
		let routine = self.shared.table.routine(&self.shared.graph, key)?;
		routine.resolve_async(self).await
	}

	/// Scope instance that caches `workflow`'s value, found by walking up
	/// from this node; this node itself for uncached providers.
	pub(crate) fn owner_for(self: &Arc<Self>, workflow: &ProviderWorkflow) -> DiResult<Arc<ScopeNode>> {
		if self.is_closed() {
			return Err(DiError::scope_mismatch(
				&workflow.key,
				format!("the {} scope is closed", self.level.name),
			));
		}
		if self.level.depth < workflow.scope.depth {
			return Err(DiError::scope_mismatch(
				&workflow.key,
				format!(
					"requires the {} scope, resolver is at {}",
					workflow.scope.name, self.level.name
				),
			));
		}
		let depth = match workflow.cache {
			CacheOwner::None => return Ok(self.clone()),
			CacheOwner::Root => self.shared.graph.ladder().root_level().depth,
			CacheOwner::Level(depth) => depth,
		};
		let mut node = self;
		while node.level.depth > depth {
			match &node.parent {
				Some(parent) => node = parent,
				None => break,
			}
		}
		if node.level.depth != depth {
			return Err(DiError::scope_mismatch(
				&workflow.key,
				format!("no enclosing scope at depth {}", depth),
			));
		}
		Ok(node.clone())
	}

	pub(crate) fn thread_lock(&self, slot: Slot) -> Arc<ReentrantMutex<()>> {
		self.thread_locks
			.lock()
			.entry(slot)
			.or_insert_with(|| Arc::new(ReentrantMutex::new(())))
			.clone()
	}

	pub(crate) fn cooperative_lock(&self, slot: Slot) -> Arc<tokio::sync::Mutex<()>> {
		self.cooperative_locks
			.lock()
			.entry(slot)
			.or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
			.clone()
	}

	/// Nearest context value for `key`, searching outward.
	pub(crate) fn context_lookup(&self, key: &DependencyKey) -> Option<Instance> {
		let mut node = Some(self);
		while let Some(current) = node {
			if let Some(value) = current.context.get(key) {
				return Some(value.clone());
			}
			node = current.parent.as_deref();
		}
		None
	}

	fn take_children(&self) -> Vec<Arc<ScopeNode>> {
		let mut children = self.children.lock();
		children.drain(..).rev().filter_map(|child| child.upgrade()).collect()
	}

	fn mark_closed(&self) -> bool {
		!self.closed.swap(true, Ordering::AcqRel)
	}

	/// Closes live children, newest first, then unwinds this node's stack.
	pub(crate) fn close_sync(&self) -> Vec<DiError> {
		if !self.mark_closed() {
			return Vec::new();
		}
		let mut errors = Vec::new();
		for child in self.take_children() {
			errors.extend(child.close_sync());
		}
		errors.extend(self.cleanup.drain_sync());
		tracing::trace!(scope = %self.level.name, id = self.id, errors = errors.len(), "scope exited");
		errors
	}

	pub(crate) fn close_async(self: Arc<Self>) -> BoxFuture<'static, Vec<DiError>> {
		Box::pin(async move {
			if !self.mark_closed() {
				return Vec::new();
			}
			let mut errors = Vec::new();
			for child in self.take_children() {
				errors.extend(child.close_async().await);
			}
			errors.extend(self.cleanup.drain_async().await);
			tracing::trace!(scope = %self.level.name, id = self.id, errors = errors.len(), "scope exited");
			errors
		})
	}
}

/// Handle on one scope instance.
///
/// A resolver owns its scope instance: [`close`](Self::close) (or
/// [`close_async`](Self::close_async)) runs the teardowns registered there.
/// Dropping an unclosed resolver closes it on the blocking path and logs a
/// warning.
pub struct Resolver {
	node: Arc<ScopeNode>,
	/// Skipped levels created on entry, outermost first.
	intermediates: Vec<Arc<ScopeNode>>,
}

impl Resolver {
	fn graph(&self) -> &Graph {
		&self.node.shared.graph
	}

	/// Name of this resolver's scope level.
	pub fn scope(&self) -> &ScopeName {
		&self.node.level.name
	}

	pub fn level(&self) -> &ScopeLevel {
		&self.node.level
	}

	pub fn is_closed(&self) -> bool {
		self.node.is_closed()
	}

	/// Resolves `key` on the blocking path.
	pub fn resolve(&self, key: &DependencyKey) -> DiResult<Instance> {
		self.node.resolve_sync(key)
	}

	/// Resolves `key` on the async path.
	pub async fn resolve_async(&self, key: &DependencyKey) -> DiResult<Instance> {
		with_cycle_detection_scope(self.node.resolve_async(key)).await
	}

	/// Resolves the key of type `T`.
	///
	/// # Examples
	///
	/// ```
	/// use trellis_di::{DependencyKey, ProviderRegistry, ProviderSpec};
	///
	/// let mut registry = ProviderRegistry::new();
	/// registry
	/// 	.add(ProviderSpec::builder(DependencyKey::of::<String>())
	/// 		.factory(|_| Ok("hello".to_string()))
	/// 		.singleton()
	/// 		.build()
	/// 		.unwrap())
	/// 	.unwrap();
	///
	/// let root = registry.compile().unwrap().root().unwrap();
	/// assert_eq!(root.get::<String>().unwrap().as_str(), "hello");
	/// root.close().unwrap();
	/// ```
	pub fn get<T: Any + Send + Sync>(&self) -> DiResult<Arc<T>> {
		let key = DependencyKey::of::<T>();
		downcast(self.resolve(&key)?, &key)
	}

	pub async fn get_async<T: Any + Send + Sync>(&self) -> DiResult<Arc<T>> {
		let key = DependencyKey::of::<T>();
		downcast(self.resolve_async(&key).await?, &key)
	}

	/// Resolves the `tag`-qualified key of type `T`.
	pub fn get_tagged<T: Any + Send + Sync>(&self, tag: &str) -> DiResult<Arc<T>> {
		let key = DependencyKey::of::<T>().tagged(tag);
		downcast(self.resolve(&key)?, &key)
	}

	/// Resolves every registered implementation of `base`, unqualified first.
	pub fn resolve_all(&self, base: &DependencyKey) -> DiResult<Vec<Instance>> {
		self.graph()
			.implementations(base)
			.iter()
			.map(|key| self.resolve(key))
			.collect()
	}

	pub async fn resolve_all_async(&self, base: &DependencyKey) -> DiResult<Vec<Instance>> {
		let keys = self.graph().implementations(base);
		let mut values = Vec::with_capacity(keys.len());
		for key in &keys {
			values.push(self.resolve_async(key).await?);
		}
		Ok(values)
	}

	/// Nearest context value for `key` in this scope or an enclosing one.
	pub fn context_value(&self, key: &DependencyKey) -> Option<Instance> {
		self.node.context_lookup(key)
	}

	/// Enters a deeper scope.
	///
	/// With `None` the next non-skippable level is entered; skippable levels
	/// on the way are created as intermediates owned by the returned resolver.
	pub fn enter_scope(&self, target: Option<&str>, context: ContextMap) -> DiResult<Resolver> {
		if self.is_closed() {
			return Err(DiError::scope_mismatch(
				self.scope(),
				"cannot enter a scope from a closed resolver",
			));
		}
		let target = target.map(ScopeName::from);
		let levels = self.graph().ladder().descent(&self.node.level, target.as_ref())?;
		let Some((last, skipped)) = levels.split_last() else {
			return Err(DiError::scope_mismatch(self.scope(), "no scope to enter"));
		};
		let shared = &self.node.shared;
		let mut parent = self.node.clone();
		let mut intermediates = Vec::with_capacity(skipped.len());
		for level in skipped {
			let node = ScopeNode::create(shared, Some(&parent), level.clone(), ContextMap::new());
			intermediates.push(node.clone());
			parent = node;
		}
		let node = ScopeNode::create(shared, Some(&parent), last.clone(), context);
		Ok(Resolver {
			node,
			intermediates,
		})
	}

	/// Runs `f` in a deeper scope and closes that scope on every exit path.
	///
	/// An error from `f` wins; teardown failures are attached to it as
	/// suppressed.
	pub fn with_scope<T, F>(&self, target: Option<&str>, context: ContextMap, f: F) -> DiResult<T>
	where
		F: FnOnce(&Resolver) -> DiResult<T>,
	{
		let scope = self.enter_scope(target, context)?;
		let outcome = f(&scope);
		let errors = scope.close_errors_sync();
		settle(outcome, errors)
	}

	/// Async [`with_scope`](Self::with_scope); teardown is awaited.
	pub async fn with_scope_async<T, F>(
		&self,
		target: Option<&str>,
		context: ContextMap,
		f: F,
	) -> DiResult<T>
	where
		F: for<'r> FnOnce(&'r Resolver) -> BoxFuture<'r, DiResult<T>>,
	{
		let scope = self.enter_scope(target, context)?;
		let outcome = f(&scope).await;
		let errors = scope.close_errors_async().await;
		settle(outcome, errors)
	}

	fn close_errors_sync(&self) -> Vec<DiError> {
		let mut errors = self.node.close_sync();
		for node in self.intermediates.iter().rev() {
			errors.extend(node.close_sync());
		}
		errors
	}

	async fn close_errors_async(&self) -> Vec<DiError> {
		let mut errors = self.node.clone().close_async().await;
		for node in self.intermediates.iter().rev() {
			errors.extend(node.clone().close_async().await);
		}
		errors
	}

	/// Closes this scope on the blocking path.
	///
	/// Teardowns that must be awaited fail with
	/// [`DiError::AsyncRequiredInSyncContext`]; use
	/// [`close_async`](Self::close_async) when any are registered.
	pub fn close(&self) -> DiResult<()> {
		settle(Ok(()), self.close_errors_sync())
	}

	pub async fn close_async(&self) -> DiResult<()> {
		settle(Ok(()), self.close_errors_async().await)
	}
}

impl fmt::Debug for Resolver {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Resolver")
			.field("scope", &self.node.level.name)
			.field("id", &self.node.id)
			.field("closed", &self.is_closed())
			.finish()
	}
}

impl Drop for Resolver {
	fn drop(&mut self) {
		if self.is_closed() {
			return;
		}
		tracing::warn!(scope = %self.node.level.name, id = self.node.id, "resolver dropped without close");
		let _ = self.close_errors_sync();
	}
}

/// Compiled registry: hands out root resolvers.
pub struct ResolverFactory {
	shared: Arc<FactoryShared>,
	generation: u64,
}

impl ResolverFactory {
	pub(crate) fn new(graph: Graph, generation: u64) -> Self {
		Self {
			shared: Arc::new(FactoryShared {
				graph,
				table: DispatchTable::new(),
				next_node_id: AtomicU64::new(0),
			}),
			generation,
		}
	}

	/// A fresh root resolver; each root owns its own singletons.
	pub fn root(&self) -> DiResult<Resolver> {
		self.root_with_context(ContextMap::new())
	}

	/// Root resolver whose scope carries `context`.
	pub fn root_with_context(&self, context: ContextMap) -> DiResult<Resolver> {
		let path = self.shared.graph.ladder().root_path();
		let Some((root, above)) = path.split_last() else {
			return Err(DiError::Settings("scope ladder has no root level".to_string()));
		};
		let mut parent: Option<Arc<ScopeNode>> = None;
		let mut intermediates = Vec::with_capacity(above.len());
		for level in above {
			let node = ScopeNode::create(&self.shared, parent.as_ref(), level.clone(), ContextMap::new());
			intermediates.push(node.clone());
			parent = Some(node);
		}
		let node = ScopeNode::create(&self.shared, parent.as_ref(), root.clone(), context);
		Ok(Resolver {
			node,
			intermediates,
		})
	}

	/// Workflows planned so far, dependencies first.
	pub fn plan(&self) -> ResolutionPlan {
		self.shared.graph.plan()
	}

	/// Whether `registry` changed since this factory was compiled from it.
	pub fn is_stale(&self, registry: &ProviderRegistry) -> bool {
		registry.generation() != self.generation
	}

	pub fn generation(&self) -> u64 {
		self.generation
	}

	pub fn settings(&self) -> &ResolverSettings {
		self.shared.graph.settings()
	}

	pub fn ladder(&self) -> &ScopeLadder {
		self.shared.graph.ladder()
	}

	/// Number of slot routines synthesized so far.
	pub fn synthesized(&self) -> usize {
		self.shared.table.len()
	}
}

impl fmt::Debug for ResolverFactory {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ResolverFactory")
			.field("generation", &self.generation)
			.field("planned", &self.shared.graph.len())
			.finish()
	}
}
