//! Resolution synthesizer
//!
//! Each planned slot gets a [`SlotRoutine`]: its workflow, direct links to the
//! routines of its eager dependencies, and two build strategies picked once
//! from the workflow (blocking and async). Routines live in a
//! [`DispatchTable`] indexed by slot, so a resolution is a walk over
//! pre-linked routines with no further key lookups.

use crate::args::{ArgValue, ResolvedArgs};
use crate::cleanup::{CleanupEntry, release_late_async, release_late_sync};
use crate::cycle_detection::{ResolutionGuard, begin_resolution};
use crate::deferred::DeferredHandle;
use crate::error::{DiError, DiResult};
use crate::key::DependencyKey;
use crate::planner::{ArgTarget, CacheOwner, EdgeSource, Graph, LockStrategy, ProviderWorkflow};
use crate::provider::{Acquired, Instance, ProviderBody, ProviderKind, Slot};
use crate::resolver::ScopeNode;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

type SyncStrategy = fn(&SlotRoutine, &Arc<ScopeNode>) -> DiResult<Instance>;
type AsyncStrategy =
	for<'a> fn(&'a SlotRoutine, &'a Arc<ScopeNode>) -> BoxFuture<'a, DiResult<Instance>>;

enum Link {
	Slot(Arc<SlotRoutine>),
	All(Vec<Arc<SlotRoutine>>),
	Deferred(DependencyKey),
	Context(DependencyKey),
}

/// Executable form of one planned slot.
pub(crate) struct SlotRoutine {
	workflow: Arc<ProviderWorkflow>,
	links: Vec<Link>,
	max_depth: usize,
	build_sync: SyncStrategy,
	build_async: AsyncStrategy,
}

/// Slot routines synthesized so far.
#[derive(Default)]
pub(crate) struct DispatchTable {
	routines: RwLock<HashMap<Slot, Arc<SlotRoutine>>>,
}

impl DispatchTable {
	pub(crate) fn new() -> Self {
		Self::default()
	}

	/// Routine serving `key`, planning and synthesizing it on first use.
	pub(crate) fn routine(&self, graph: &Graph, key: &DependencyKey) -> DiResult<Arc<SlotRoutine>> {
		let workflow = graph.ensure(key)?;
		self.synthesize(graph, workflow)
	}

	pub(crate) fn len(&self) -> usize {
		self.routines.read().len()
	}

	fn by_slot(&self, graph: &Graph, slot: Slot, key: &DependencyKey) -> DiResult<Arc<SlotRoutine>> {
		if let Some(routine) = self.routines.read().get(&slot) {
			return Ok(routine.clone());
		}
		let workflow = graph
			.workflow(slot)
			.ok_or_else(|| DiError::not_registered(key))?;
		self.synthesize(graph, workflow)
	}

	fn synthesize(&self, graph: &Graph, workflow: Arc<ProviderWorkflow>) -> DiResult<Arc<SlotRoutine>> {
		if let Some(routine) = self.routines.read().get(&workflow.slot) {
			return Ok(routine.clone());
		}
		let mut links = Vec::with_capacity(workflow.wiring.len());
		for edge in &workflow.wiring {
			let link = match &edge.source {
				EdgeSource::Slot(slot) => Link::Slot(self.by_slot(graph, *slot, &edge.key)?),
				EdgeSource::All(slots) => Link::All(
					slots
						.iter()
						.map(|slot| self.by_slot(graph, *slot, &edge.key))
						.collect::<DiResult<_>>()?,
				),
				EdgeSource::Deferred(key) => Link::Deferred(key.clone()),
				EdgeSource::Context(key) => Link::Context(key.clone()),
			};
			links.push(link);
		}
		let (build_sync, build_async) = strategies(&workflow);
		let slot = workflow.slot;
		let routine = Arc::new(SlotRoutine {
			workflow,
			links,
			max_depth: graph.settings().max_resolution_depth,
			build_sync,
			build_async,
		});
		Ok(self.routines.write().entry(slot).or_insert(routine).clone())
	}
}

fn strategies(workflow: &ProviderWorkflow) -> (SyncStrategy, AsyncStrategy) {
	if workflow.kind() == ProviderKind::Instance {
		return (instance_sync, instance_async);
	}
	if !workflow.requires_async {
		let build_sync: SyncStrategy = match (workflow.cache, workflow.lock) {
			(CacheOwner::None, _) => transient_sync,
			(_, LockStrategy::None) => unlocked_sync,
			(_, _) => locked_sync,
		};
		return (build_sync, blocking_async);
	}
	let build_async: AsyncStrategy = match (workflow.cache, workflow.lock) {
		(CacheOwner::None, _) => transient_async,
		(_, LockStrategy::None) => unlocked_async,
		(_, _) => locked_async,
	};
	(fail_async_required, build_async)
}

impl SlotRoutine {
	fn key(&self) -> &DependencyKey {
		&self.workflow.key
	}

	fn slot(&self) -> Slot {
		self.workflow.slot
	}

	pub(crate) fn resolve_sync(&self, node: &Arc<ScopeNode>) -> DiResult<Instance> {
		(self.build_sync)(self, node)
	}

	pub(crate) fn resolve_async<'a>(
		&'a self,
		node: &'a Arc<ScopeNode>,
	) -> BoxFuture<'a, DiResult<Instance>> {
		(self.build_async)(self, node)
	}

	fn guard(&self) -> DiResult<ResolutionGuard> {
		begin_resolution(self.slot(), self.key(), self.max_depth)
	}

	fn context(&self, node: &Arc<ScopeNode>, key: &DependencyKey) -> DiResult<ArgValue> {
		node.context_lookup(key)
			.map(ArgValue::Value)
			.ok_or_else(|| DiError::not_registered(key))
	}

	fn args_sync(&self, node: &Arc<ScopeNode>) -> DiResult<ResolvedArgs> {
		let mut args = ResolvedArgs::new(self.key().clone(), self.workflow.spec.type_args().clone());
		for (edge, link) in self.workflow.wiring.iter().zip(&self.links) {
			let value = match link {
				Link::Slot(routine) => ArgValue::Value(routine.resolve_sync(node)?),
				Link::All(routines) => ArgValue::All(
					routines
						.iter()
						.map(|routine| routine.resolve_sync(node))
						.collect::<DiResult<_>>()?,
				),
				Link::Deferred(key) => ArgValue::Deferred(DeferredHandle::new(node, key.clone())),
				Link::Context(key) => self.context(node, key)?,
			};
			deliver(&mut args, &edge.target, value);
		}
		Ok(args)
	}

	async fn args_async(&self, node: &Arc<ScopeNode>) -> DiResult<ResolvedArgs> {
		let mut args = ResolvedArgs::new(self.key().clone(), self.workflow.spec.type_args().clone());
		for (edge, link) in self.workflow.wiring.iter().zip(&self.links) {
			let value = match link {
				Link::Slot(routine) => ArgValue::Value(routine.resolve_async(node).await?),
				Link::All(routines) => {
					let mut values = Vec::with_capacity(routines.len());
					for routine in routines {
						values.push(routine.resolve_async(node).await?);
					}
					ArgValue::All(values)
				}
				Link::Deferred(key) => ArgValue::Deferred(DeferredHandle::new(node, key.clone())),
				Link::Context(key) => self.context(node, key)?,
			};
			deliver(&mut args, &edge.target, value);
		}
		Ok(args)
	}

	/// Pushes the release onto the owner's stack before the value escapes.
	///
	/// An owner that closed while the body ran has already unwound; the
	/// release then runs here and the resolution fails.
	fn track(&self, owner: &ScopeNode, acquired: Acquired) -> Result<Instance, CleanupEntry> {
		let entry = CleanupEntry {
			kind: self.workflow.kind(),
			key: self.key().clone(),
			release: acquired.release,
		};
		match owner.cleanup.push(entry) {
			None => Ok(acquired.value),
			Some(late) => Err(late),
		}
	}

	fn closed_during_construction(&self, owner: &ScopeNode, errors: Vec<DiError>) -> DiError {
		DiError::scope_mismatch(
			self.key(),
			format!("the {} scope closed during construction", owner.level.name),
		)
		.with_suppressed(errors)
	}

	fn invoke_sync(&self, owner: &ScopeNode, args: ResolvedArgs) -> DiResult<Instance> {
		let result = match self.workflow.spec.body() {
			ProviderBody::Instance(value) => Ok(value.clone()),
			ProviderBody::Sync(body) => body(&args),
			ProviderBody::Acquire(body) => body(&args).and_then(|acquired| {
				self.track(owner, acquired).map_err(|late| {
					self.closed_during_construction(owner, release_late_sync(late))
				})
			}),
			ProviderBody::Async(_) | ProviderBody::AcquireAsync(_) => {
				Err(DiError::async_required(self.key()))
			}
		};
		result.map_err(|err| err.for_key(self.key()))
	}

	async fn invoke_async(&self, owner: &ScopeNode, args: ResolvedArgs) -> DiResult<Instance> {
		let result = match self.workflow.spec.body() {
			ProviderBody::Async(body) => body(args).await,
			ProviderBody::AcquireAsync(body) => match body(args).await {
				Ok(acquired) => match self.track(owner, acquired) {
					Ok(value) => Ok(value),
					Err(late) => Err(
						self.closed_during_construction(owner, release_late_async(late).await)
					),
				},
				Err(err) => Err(err),
			},
			_ => return self.invoke_sync(owner, args),
		};
		result.map_err(|err| err.for_key(self.key()))
	}

	fn construct_sync(&self, owner: &Arc<ScopeNode>) -> DiResult<Instance> {
		tracing::trace!(key = %self.key(), slot = %self.slot(), scope = %owner.level.name, "constructing");
		let args = self.args_sync(owner)?;
		self.invoke_sync(owner, args)
	}

	async fn construct_async(&self, owner: &Arc<ScopeNode>) -> DiResult<Instance> {
		tracing::trace!(key = %self.key(), slot = %self.slot(), scope = %owner.level.name, "constructing");
		let args = self.args_async(owner).await?;
		self.invoke_async(owner, args).await
	}
}

fn deliver(args: &mut ResolvedArgs, target: &ArgTarget, value: ArgValue) {
	match target {
		ArgTarget::Positional(_) => args.push_positional(value),
		ArgTarget::Keyword(name) => args.push_keyword(name.clone(), value),
		ArgTarget::Rest => args.push_rest(value),
		ArgTarget::RestKeyword(name) => args.push_rest_keyword(name.clone(), value),
	}
}

fn instance_value(routine: &SlotRoutine, node: &Arc<ScopeNode>) -> DiResult<Instance> {
	node.owner_for(&routine.workflow)?;
	match routine.workflow.spec.body() {
		ProviderBody::Instance(value) => Ok(value.clone()),
		_ => Err(DiError::invalid_spec(routine.key(), "instance provider without a value")),
	}
}

fn instance_sync(routine: &SlotRoutine, node: &Arc<ScopeNode>) -> DiResult<Instance> {
	instance_value(routine, node)
}

fn instance_async<'a>(
	routine: &'a SlotRoutine,
	node: &'a Arc<ScopeNode>,
) -> BoxFuture<'a, DiResult<Instance>> {
	Box::pin(futures::future::ready(instance_value(routine, node)))
}

fn fail_async_required(routine: &SlotRoutine, _node: &Arc<ScopeNode>) -> DiResult<Instance> {
	Err(DiError::async_required(routine.key()))
}

/// Async entry for slots that never suspend: runs the blocking strategy.
fn blocking_async<'a>(
	routine: &'a SlotRoutine,
	node: &'a Arc<ScopeNode>,
) -> BoxFuture<'a, DiResult<Instance>> {
	Box::pin(futures::future::ready((routine.build_sync)(routine, node)))
}

fn transient_sync(routine: &SlotRoutine, node: &Arc<ScopeNode>) -> DiResult<Instance> {
	let owner = node.owner_for(&routine.workflow)?;
	let _guard = routine.guard()?;
	routine.construct_sync(&owner)
}

fn unlocked_sync(routine: &SlotRoutine, node: &Arc<ScopeNode>) -> DiResult<Instance> {
	let owner = node.owner_for(&routine.workflow)?;
	if let Some(value) = owner.cache.get(routine.slot()) {
		return Ok(value);
	}
	let _guard = routine.guard()?;
	let value = routine.construct_sync(&owner)?;
	Ok(owner.cache.insert_if_absent(routine.slot(), value))
}

fn locked_sync(routine: &SlotRoutine, node: &Arc<ScopeNode>) -> DiResult<Instance> {
	let owner = node.owner_for(&routine.workflow)?;
	if let Some(value) = owner.cache.get(routine.slot()) {
		return Ok(value);
	}
	let _guard = routine.guard()?;
	let lock = owner.thread_lock(routine.slot());
	let _held = lock.lock();
	if let Some(value) = owner.cache.get(routine.slot()) {
		return Ok(value);
	}
	let value = routine.construct_sync(&owner)?;
	owner.cache.insert(routine.slot(), value.clone());
	Ok(value)
}

fn transient_async<'a>(
	routine: &'a SlotRoutine,
	node: &'a Arc<ScopeNode>,
) -> BoxFuture<'a, DiResult<Instance>> {
	Box::pin(async move {
		let owner = node.owner_for(&routine.workflow)?;
		let _guard = routine.guard()?;
		routine.construct_async(&owner).await
	})
}

fn unlocked_async<'a>(
	routine: &'a SlotRoutine,
	node: &'a Arc<ScopeNode>,
) -> BoxFuture<'a, DiResult<Instance>> {
	Box::pin(async move {
		let owner = node.owner_for(&routine.workflow)?;
		if let Some(value) = owner.cache.get(routine.slot()) {
			return Ok(value);
		}
		let _guard = routine.guard()?;
		let value = routine.construct_async(&owner).await?;
		Ok(owner.cache.insert_if_absent(routine.slot(), value))
	})
}

fn locked_async<'a>(
	routine: &'a SlotRoutine,
	node: &'a Arc<ScopeNode>,
) -> BoxFuture<'a, DiResult<Instance>> {
	Box::pin(async move {
		let owner = node.owner_for(&routine.workflow)?;
		if let Some(value) = owner.cache.get(routine.slot()) {
			return Ok(value);
		}
		let _guard = routine.guard()?;
		let lock = owner.cooperative_lock(routine.slot());
		let _held = lock.lock().await;
		if let Some(value) = owner.cache.get(routine.slot()) {
			return Ok(value);
		}
		let value = routine.construct_async(&owner).await?;
		owner.cache.insert(routine.slot(), value.clone());
		Ok(value)
	})
}
