//! Dependency graph planner
//!
//! Turns provider specs into [`ProviderWorkflow`]s: per-slot metadata that
//! fixes everything the synthesizer needs before a single value is built.
//!
//! Planning is a depth-first walk over eager and resolve-all edges:
//!
//! - a key revisited while still on the walk is a cycle, reported with its
//!   path; deferred edges are not followed and so break cycles,
//! - each provider's scope is fixed (declared, or inferred from its deepest
//!   dependency) and checked against its dependencies,
//! - cache ownership follows from lifetime and scope,
//! - the async requirement propagates from dependencies to dependents in
//!   post-order,
//! - every edge is pre-wired to an argument position and a value source.
//!
//! Template requests are specialized and decorator chains materialized the
//! first time their key is planned; the result is memoized in the graph.

use crate::decoration::{DecoratorRule, materialize_chain};
use crate::error::{DiError, DiResult};
use crate::generic::{Substitution, TemplateMatch, select_template, specialize};
use crate::key::DependencyKey;
use crate::provider::{ArgShape, EdgeMode, Lifetime, ProviderKind, ProviderSpec, Slot};
use crate::registry::implementations_in;
use crate::scope::{ScopeLadder, ScopeLevel};
use crate::settings::ResolverSettings;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Scope instance that caches a provider's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheOwner {
	/// Not cached (transient).
	None,
	/// The root resolver.
	Root,
	/// The nearest scope instance at this depth.
	Level(u8),
}

/// Lock taken around cached construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockStrategy {
	/// No lock; the first value stored wins.
	None,
	/// Reentrant thread lock for blocking construction.
	Thread,
	/// Cooperative (async) lock for construction that suspends.
	Cooperative,
}

/// Argument position an edge's value is delivered to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArgTarget {
	Positional(usize),
	Keyword(Arc<str>),
	Rest,
	RestKeyword(Arc<str>),
}

/// Where an edge's value comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EdgeSource {
	Slot(Slot),
	/// Resolved on demand through a deferred handle.
	Deferred(DependencyKey),
	/// Every implementation, in collection order.
	All(Vec<Slot>),
	/// Looked up in the enclosing scopes' context values.
	Context(DependencyKey),
}

/// One pre-wired edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WiredEdge {
	pub key: DependencyKey,
	pub target: ArgTarget,
	pub source: EdgeSource,
}

/// Planned metadata for one slot.
#[derive(Debug)]
pub struct ProviderWorkflow {
	pub(crate) slot: Slot,
	pub(crate) key: DependencyKey,
	pub(crate) lifetime: Lifetime,
	pub(crate) scope: ScopeLevel,
	pub(crate) cache: CacheOwner,
	pub(crate) requires_async: bool,
	pub(crate) lock: LockStrategy,
	pub(crate) wiring: Vec<WiredEdge>,
	pub(crate) spec: Arc<ProviderSpec>,
}

impl ProviderWorkflow {
	pub fn slot(&self) -> Slot {
		self.slot
	}

	pub fn key(&self) -> &DependencyKey {
		&self.key
	}

	pub fn kind(&self) -> ProviderKind {
		self.spec.kind()
	}

	pub fn lifetime(&self) -> Lifetime {
		self.lifetime
	}

	pub fn scope(&self) -> &ScopeLevel {
		&self.scope
	}

	pub fn cache(&self) -> CacheOwner {
		self.cache
	}

	/// Whether this provider or anything it eagerly depends on is async.
	pub fn requires_async(&self) -> bool {
		self.requires_async
	}

	pub fn lock(&self) -> LockStrategy {
		self.lock
	}

	pub fn wiring(&self) -> &[WiredEdge] {
		&self.wiring
	}

	pub fn needs_cleanup(&self) -> bool {
		self.spec.needs_cleanup()
	}

	pub fn spec(&self) -> &ProviderSpec {
		&self.spec
	}
}

/// Read-only view of every planned workflow, dependencies first.
#[derive(Debug, Clone)]
pub struct ResolutionPlan {
	workflows: Vec<Arc<ProviderWorkflow>>,
}

impl ResolutionPlan {
	pub fn workflows(&self) -> &[Arc<ProviderWorkflow>] {
		&self.workflows
	}

	pub fn get(&self, key: &DependencyKey) -> Option<&Arc<ProviderWorkflow>> {
		self.workflows.iter().find(|w| &w.key == key)
	}

	pub fn get_by_slot(&self, slot: Slot) -> Option<&Arc<ProviderWorkflow>> {
		self.workflows.iter().find(|w| w.slot == slot)
	}

	pub fn len(&self) -> usize {
		self.workflows.len()
	}

	pub fn is_empty(&self) -> bool {
		self.workflows.is_empty()
	}
}

/// Registry contents frozen at compile time.
pub(crate) struct Snapshot {
	pub(crate) settings: Arc<ResolverSettings>,
	pub(crate) ladder: Arc<ScopeLadder>,
	/// Active registrations in slot order.
	pub(crate) specs: Vec<Arc<ProviderSpec>>,
	pub(crate) decorators: Vec<Arc<DecoratorRule>>,
	pub(crate) first_free_slot: u32,
}

#[derive(Default)]
struct GraphState {
	nodes: HashMap<Slot, Arc<ProviderWorkflow>>,
	by_key: HashMap<DependencyKey, Slot>,
	/// Materialized decoration layers not planned yet.
	layers: HashMap<DependencyKey, ProviderSpec>,
	order: Vec<Slot>,
	next_slot: u32,
}

impl GraphState {
	fn fresh_slot(&mut self) -> Slot {
		let slot = Slot(self.next_slot);
		self.next_slot += 1;
		slot
	}
}

/// Planned provider graph of one registry snapshot; extended lazily.
pub(crate) struct Graph {
	snapshot: Snapshot,
	concrete: HashMap<DependencyKey, Arc<ProviderSpec>>,
	templates: Vec<Arc<ProviderSpec>>,
	state: RwLock<GraphState>,
}

impl Graph {
	pub(crate) fn new(snapshot: Snapshot) -> Self {
		let (templates, concrete): (Vec<_>, Vec<_>) =
			snapshot.specs.iter().cloned().partition(|spec| spec.is_template());
		let concrete = concrete
			.into_iter()
			.map(|spec| (spec.key().clone(), spec))
			.collect();
		let state = GraphState {
			next_slot: snapshot.first_free_slot,
			..Default::default()
		};
		Self {
			snapshot,
			concrete,
			templates,
			state: RwLock::new(state),
		}
	}

	pub(crate) fn settings(&self) -> &ResolverSettings {
		&self.snapshot.settings
	}

	pub(crate) fn ladder(&self) -> &Arc<ScopeLadder> {
		&self.snapshot.ladder
	}

	pub(crate) fn len(&self) -> usize {
		self.state.read().nodes.len()
	}

	/// Workflow for `key`, planning it (and everything it reaches) on first use.
	pub(crate) fn ensure(&self, key: &DependencyKey) -> DiResult<Arc<ProviderWorkflow>> {
		{
			let state = self.state.read();
			if let Some(workflow) = state.by_key.get(key).and_then(|slot| state.nodes.get(slot)) {
				return Ok(workflow.clone());
			}
		}
		let mut state = self.state.write();
		let mut planner = Planner {
			graph: self,
			state: &mut *state,
			stack: Vec::new(),
			deferred: Vec::new(),
			journal: Journal::default(),
		};
		let outcome = planner
			.plan(key)
			.and_then(|slot| planner.plan_deferred().map(|()| slot));
		let slot = match outcome {
			Ok(slot) => slot,
			Err(err) => {
				planner.rollback();
				return Err(err);
			}
		};
		state
			.nodes
			.get(&slot)
			.cloned()
			.ok_or_else(|| DiError::not_registered(key))
	}

	pub(crate) fn workflow(&self, slot: Slot) -> Option<Arc<ProviderWorkflow>> {
		self.state.read().nodes.get(&slot).cloned()
	}

	/// Registered implementations of `base`, unqualified first.
	pub(crate) fn implementations(&self, base: &DependencyKey) -> Vec<DependencyKey> {
		implementations_in(self.snapshot.specs.iter(), base)
	}

	/// Plans every concrete registration.
	pub(crate) fn plan_all(&self) -> DiResult<()> {
		let keys: Vec<DependencyKey> = self
			.snapshot
			.specs
			.iter()
			.filter(|spec| !spec.is_template())
			.map(|spec| spec.key().clone())
			.collect();
		for key in keys {
			self.ensure(&key)?;
		}
		Ok(())
	}

	/// Fails when a decorator matches no registration.
	pub(crate) fn check_decorators(&self) -> DiResult<()> {
		for rule in &self.snapshot.decorators {
			let target = rule.target();
			let matched = if target.is_open() {
				self.concrete.keys().any(|key| rule.applies_to(key).is_some())
					|| self.templates.iter().any(|t| {
						t.key().base_token() == target.base_token() && t.key().tag() == target.tag()
					})
			} else {
				self.concrete.contains_key(target) || self.template_for(target).is_ok()
			};
			if !matched {
				return Err(DiError::invalid_spec(
					target,
					"decorator matches no registration",
				));
			}
		}
		Ok(())
	}

	fn template_for(&self, key: &DependencyKey) -> DiResult<TemplateMatch> {
		let token = key.base_token();
		let candidates: Vec<Arc<ProviderSpec>> = self
			.templates
			.iter()
			.filter(|t| t.key().base_token() == token)
			.cloned()
			.collect();
		if candidates.is_empty() {
			return Err(DiError::not_registered(key));
		}
		select_template(key, &candidates, self.settings().template_tie_break)
	}

	pub(crate) fn plan(&self) -> ResolutionPlan {
		let state = self.state.read();
		let workflows = state
			.order
			.iter()
			.filter_map(|slot| state.nodes.get(slot).cloned())
			.collect();
		ResolutionPlan { workflows }
	}
}

struct PendingDeferred {
	target: DependencyKey,
	dependent: DependencyKey,
	depth: u8,
}

/// Graph mutations made by one planning pass, undone when the pass fails.
#[derive(Default)]
struct Journal {
	planned: Vec<(DependencyKey, Slot)>,
	layers_added: Vec<DependencyKey>,
	layers_taken: Vec<(DependencyKey, ProviderSpec)>,
}

struct Planner<'g> {
	graph: &'g Graph,
	state: &'g mut GraphState,
	stack: Vec<(DependencyKey, Slot)>,
	deferred: Vec<PendingDeferred>,
	journal: Journal,
}

impl Planner<'_> {
	fn plan(&mut self, key: &DependencyKey) -> DiResult<Slot> {
		if let Some(slot) = self.state.by_key.get(key) {
			return Ok(*slot);
		}
		if let Some(pos) = self.stack.iter().position(|(k, _)| k == key) {
			let mut path: Vec<String> = self.stack[pos..].iter().map(|(k, _)| k.to_string()).collect();
			path.push(key.to_string());
			return Err(DiError::CircularDependencyDetected {
				key: key.to_string(),
				slot: self.stack[pos].1,
				path: path.join(" -> "),
			});
		}

		let spec = self.materialize(key)?;
		let slot = spec
			.slot()
			.ok_or_else(|| DiError::invalid_spec(key, "provider has no slot"))?;
		self.stack.push((key.clone(), slot));
		let workflow = self.plan_spec(spec, slot);
		self.stack.pop();
		let workflow = workflow?;

		tracing::trace!(
			key = %key,
			slot = %slot,
			scope = %workflow.scope.name,
			cache = ?workflow.cache,
			requires_async = workflow.requires_async,
			"provider planned"
		);
		self.state.nodes.insert(slot, Arc::new(workflow));
		self.state.by_key.insert(key.clone(), slot);
		self.state.order.push(slot);
		self.journal.planned.push((key.clone(), slot));
		Ok(slot)
	}

	/// Drops every node and layer change made by this pass.
	fn rollback(&mut self) {
		let journal = std::mem::take(&mut self.journal);
		for (key, slot) in &journal.planned {
			self.state.nodes.remove(slot);
			self.state.by_key.remove(key);
		}
		let planned: HashSet<Slot> = journal.planned.iter().map(|(_, slot)| *slot).collect();
		self.state.order.retain(|slot| !planned.contains(slot));
		for (key, layer) in journal.layers_taken {
			self.state.layers.insert(key, layer);
		}
		for key in &journal.layers_added {
			self.state.layers.remove(key);
		}
		tracing::debug!(discarded = planned.len(), "planning pass rolled back");
	}

	/// Plans deferred targets once the walk that found them is complete.
	fn plan_deferred(&mut self) -> DiResult<()> {
		while let Some(pending) = self.deferred.pop() {
			let slot = self.plan(&pending.target)?;
			let target_depth = self.state.nodes[&slot].scope.depth;
			if target_depth > pending.depth {
				return Err(DiError::invalid_spec(
					&pending.dependent,
					format!(
						"cannot bind deeper dependency {} through a deferred edge",
						pending.target
					),
				));
			}
		}
		Ok(())
	}

	/// Concrete spec serving `key`, with its decorator chain applied.
	fn materialize(&mut self, key: &DependencyKey) -> DiResult<Arc<ProviderSpec>> {
		if let DependencyKey::Layer { .. } = key {
			let layer = self
				.state
				.layers
				.remove(key)
				.ok_or_else(|| DiError::not_registered(key))?;
			self.journal.layers_taken.push((key.clone(), layer.clone()));
			return Ok(Arc::new(layer));
		}
		if key.is_open() {
			return Err(DiError::invalid_generic(
				key,
				"an open key cannot be resolved",
			));
		}

		let graph = self.graph;
		let base = match graph.concrete.get(key) {
			Some(spec) => (**spec).clone(),
			None => {
				let matched = graph.template_for(key)?;
				let mut spec = specialize(&matched, key);
				spec.slot = Some(self.state.fresh_slot());
				tracing::debug!(
					key = %key,
					template = %matched.spec.key(),
					slot = ?spec.slot(),
					"template specialized"
				);
				spec
			}
		};

		let rules: Vec<(&DecoratorRule, Substitution)> = graph
			.snapshot
			.decorators
			.iter()
			.filter_map(|rule| rule.applies_to(key).map(|subst| (&**rule, subst)))
			.collect();
		if rules.is_empty() {
			return Ok(Arc::new(base));
		}
		let state = &mut *self.state;
		let mut layers = materialize_chain(base, &rules, || state.fresh_slot());
		let outer = layers
			.pop()
			.ok_or_else(|| DiError::not_registered(key))?;
		for layer in layers {
			self.journal.layers_added.push(layer.key().clone());
			state.layers.insert(layer.key().clone(), layer);
		}
		Ok(Arc::new(outer))
	}

	fn plan_spec(&mut self, spec: Arc<ProviderSpec>, slot: Slot) -> DiResult<ProviderWorkflow> {
		let key = spec.key().clone();
		let ladder = self.graph.ladder().clone();
		let root = ladder.root_level().clone();

		let mut wiring = Vec::with_capacity(spec.edges().len());
		let mut requires_async = spec.is_async();
		let mut deepest: Option<(ScopeLevel, DependencyKey)> = None;
		let mut deferred = Vec::new();
		let mut positional = 0;

		for edge in spec.edges() {
			let target = match &edge.shape {
				ArgShape::Positional => {
					positional += 1;
					ArgTarget::Positional(positional - 1)
				}
				ArgShape::Keyword(name) => ArgTarget::Keyword(name.clone()),
				ArgShape::VarPositional => ArgTarget::Rest,
				ArgShape::VarKeyword(name) => ArgTarget::RestKeyword(name.clone()),
			};
			let source = match edge.mode {
				EdgeMode::Eager => {
					let dep = self.plan(&edge.key)?;
					self.track(dep, &mut requires_async, &mut deepest);
					EdgeSource::Slot(dep)
				}
				EdgeMode::All => {
					let keys = implementations_in(self.graph.snapshot.specs.iter(), &edge.key);
					let mut slots = Vec::with_capacity(keys.len());
					for dep_key in keys {
						let dep = self.plan(&dep_key)?;
						self.track(dep, &mut requires_async, &mut deepest);
						slots.push(dep);
					}
					EdgeSource::All(slots)
				}
				EdgeMode::Deferred => {
					deferred.push(edge.key.clone());
					EdgeSource::Deferred(edge.key.clone())
				}
				EdgeMode::FromContext => EdgeSource::Context(edge.key.clone()),
			};
			wiring.push(WiredEdge {
				key: edge.key.clone(),
				target,
				source,
			});
		}

		let lifetime = spec.lifetime();
		let declared = match spec.declared_scope() {
			Some(name) => Some(
				ladder
					.by_name(name)
					.cloned()
					.ok_or_else(|| DiError::invalid_spec(&key, format!("unknown scope {}", name)))?,
			),
			None => None,
		};
		let scope = match lifetime {
			Lifetime::Singleton => {
				if let Some(level) = declared.filter(|level| level.depth != root.depth) {
					return Err(DiError::invalid_spec(
						&key,
						format!(
							"a singleton lives at the root scope {}, not {}",
							root.name, level.name
						),
					));
				}
				root.clone()
			}
			Lifetime::Scoped | Lifetime::Transient => declared
				.or_else(|| deepest.as_ref().map(|(level, _)| level.clone()))
				.unwrap_or_else(|| root.clone()),
		};
		if let Some((level, dep_key)) = &deepest {
			if level.depth > scope.depth {
				return Err(DiError::invalid_spec(
					&key,
					format!(
						"cannot bind deeper dependency {} ({}) into scope {}",
						dep_key, level.name, scope.name
					),
				));
			}
		}

		let cache = match lifetime {
			Lifetime::Transient => CacheOwner::None,
			Lifetime::Singleton => CacheOwner::Root,
			Lifetime::Scoped => CacheOwner::Level(scope.depth),
		};
		let concurrency_safe = spec
			.concurrency_safe()
			.unwrap_or(self.graph.settings().default_concurrency_safe);
		let lock = if spec.kind() == ProviderKind::Instance
			|| cache == CacheOwner::None
			|| !concurrency_safe
		{
			LockStrategy::None
		} else if requires_async {
			LockStrategy::Cooperative
		} else {
			LockStrategy::Thread
		};

		for target in deferred {
			self.deferred.push(PendingDeferred {
				target,
				dependent: key.clone(),
				depth: scope.depth,
			});
		}

		Ok(ProviderWorkflow {
			slot,
			key,
			lifetime,
			scope,
			cache,
			requires_async,
			lock,
			wiring,
			spec,
		})
	}

	fn track(
		&self,
		dep: Slot,
		requires_async: &mut bool,
		deepest: &mut Option<(ScopeLevel, DependencyKey)>,
	) {
		let Some(workflow) = self.state.nodes.get(&dep) else {
			return;
		};
		*requires_async |= workflow.requires_async;
		let deeper = deepest
			.as_ref()
			.is_none_or(|(level, _)| workflow.scope.depth > level.depth);
		if deeper {
			*deepest = Some((workflow.scope.clone(), workflow.key.clone()));
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::key::{TypeExpr, TypeToken};
	use crate::provider::DependencyEdge;
	use rstest::rstest;

	fn named(name: &str) -> DependencyKey {
		DependencyKey::named(name)
	}

	struct Fixture {
		specs: Vec<ProviderSpec>,
		settings: ResolverSettings,
	}

	impl Fixture {
		fn new() -> Self {
			Self {
				specs: Vec::new(),
				settings: ResolverSettings::default(),
			}
		}

		fn add(mut self, spec: ProviderSpec) -> Self {
			self.specs.push(spec);
			self
		}

		fn graph(self) -> Graph {
			let specs: Vec<Arc<ProviderSpec>> = self
				.specs
				.into_iter()
				.enumerate()
				.map(|(i, mut spec)| {
					spec.slot = Some(Slot(i as u32));
					Arc::new(spec)
				})
				.collect();
			let first_free_slot = specs.len() as u32;
			Graph::new(Snapshot {
				ladder: Arc::new(self.settings.ladder().unwrap()),
				settings: Arc::new(self.settings),
				specs,
				decorators: Vec::new(),
				first_free_slot,
			})
		}
	}

	fn factory(key: DependencyKey, deps: &[DependencyEdge]) -> crate::provider::ProviderSpecBuilder {
		ProviderSpec::builder(key)
			.factory(|_| Ok(()))
			.edges(deps.iter().cloned())
	}

	#[rstest]
	fn test_cycle_reports_path() {
		// Arrange
		let graph = Fixture::new()
			.add(factory(named("A"), &[DependencyEdge::positional(named("B"))]).build().unwrap())
			.add(factory(named("B"), &[DependencyEdge::positional(named("C"))]).build().unwrap())
			.add(factory(named("C"), &[DependencyEdge::positional(named("A"))]).build().unwrap())
			.graph();

		// Act
		let result = graph.ensure(&named("A"));

		// Assert
		match result {
			Err(DiError::CircularDependencyDetected { path, slot, .. }) => {
				assert_eq!(path, "A -> B -> C -> A");
				assert_eq!(slot, Slot(0));
			}
			other => panic!("Expected CircularDependencyDetected, got {:?}", other),
		}
	}

	#[rstest]
	fn test_deferred_edge_breaks_cycle() {
		let graph = Fixture::new()
			.add(factory(named("A"), &[DependencyEdge::positional(named("B"))]).build().unwrap())
			.add(
				factory(named("B"), &[DependencyEdge::positional(named("A")).deferred()])
					.build()
					.unwrap(),
			)
			.graph();

		let workflow = graph.ensure(&named("A")).unwrap();

		assert_eq!(workflow.wiring().len(), 1);
		assert_eq!(graph.len(), 2);
	}

	#[rstest]
	fn test_scope_inference_and_cache_owner() {
		// Arrange
		let graph = Fixture::new()
			.add(factory(named("Session"), &[]).scoped("request").build().unwrap())
			.add(
				factory(named("Handler"), &[DependencyEdge::positional(named("Session"))])
					.build()
					.unwrap(),
			)
			.add(factory(named("Clock"), &[]).singleton().build().unwrap())
			.add(factory(named("Id"), &[]).transient().build().unwrap())
			.graph();

		// Act
		let handler = graph.ensure(&named("Handler")).unwrap();
		let clock = graph.ensure(&named("Clock")).unwrap();
		let id = graph.ensure(&named("Id")).unwrap();

		// Assert
		assert_eq!(handler.scope().name.as_str(), "request");
		assert_eq!(handler.cache(), CacheOwner::Level(3));
		assert_eq!(clock.cache(), CacheOwner::Root);
		assert_eq!(clock.scope().name.as_str(), "app");
		assert_eq!(id.cache(), CacheOwner::None);
		assert_eq!(id.lock(), LockStrategy::None);
		assert_eq!(clock.lock(), LockStrategy::Thread);
	}

	#[rstest]
	fn test_singleton_cannot_bind_deeper_dependency() {
		let graph = Fixture::new()
			.add(factory(named("Session"), &[]).scoped("request").build().unwrap())
			.add(
				factory(named("Pool"), &[DependencyEdge::positional(named("Session"))])
					.singleton()
					.build()
					.unwrap(),
			)
			.graph();

		match graph.ensure(&named("Pool")) {
			Err(DiError::InvalidProviderSpec { message, .. }) => {
				assert!(message.contains("cannot bind deeper dependency"));
			}
			other => panic!("Expected InvalidProviderSpec, got {:?}", other),
		}
	}

	#[rstest]
	#[case(factory(named("X"), &[]).singleton().scope("request"))]
	#[case(factory(named("X"), &[]).scoped("nowhere"))]
	fn test_invalid_scope_declarations(#[case] builder: crate::provider::ProviderSpecBuilder) {
		let graph = Fixture::new().add(builder.build().unwrap()).graph();

		assert!(matches!(
			graph.ensure(&named("X")),
			Err(DiError::InvalidProviderSpec { .. })
		));
	}

	#[rstest]
	fn test_async_propagates_to_dependents() {
		// Arrange
		let graph = Fixture::new()
			.add(
				ProviderSpec::builder(named("Pool"))
					.factory_async(|_| async { Ok(()) })
					.singleton()
					.build()
					.unwrap(),
			)
			.add(
				factory(named("Repo"), &[DependencyEdge::positional(named("Pool"))])
					.singleton()
					.build()
					.unwrap(),
			)
			.graph();

		// Act
		let repo = graph.ensure(&named("Repo")).unwrap();

		// Assert
		assert!(repo.requires_async());
		assert_eq!(repo.lock(), LockStrategy::Cooperative);
	}

	#[rstest]
	fn test_missing_dependency_is_not_registered() {
		let graph = Fixture::new()
			.add(factory(named("A"), &[DependencyEdge::positional(named("Ghost"))]).build().unwrap())
			.graph();

		match graph.ensure(&named("A")) {
			Err(DiError::DependencyNotRegistered { key }) => assert_eq!(key, "Ghost"),
			other => panic!("Expected DependencyNotRegistered, got {:?}", other),
		}
	}

	#[rstest]
	fn test_argument_wiring_targets() {
		// Arrange
		let graph = Fixture::new()
			.add(factory(named("A"), &[]).build().unwrap())
			.add(
				factory(
					named("S"),
					&[
						DependencyEdge::positional(named("A")),
						DependencyEdge::keyword("a", named("A")),
						DependencyEdge::rest(named("A")),
						DependencyEdge::positional(named("A")),
						DependencyEdge::positional(named("Ctx")).from_context(),
						DependencyEdge::positional(named("Plugin")).all(),
					],
				)
				.build()
				.unwrap(),
			)
			.graph();

		// Act
		let workflow = graph.ensure(&named("S")).unwrap();

		// Assert
		let targets: Vec<&ArgTarget> = workflow.wiring().iter().map(|w| &w.target).collect();
		assert_eq!(
			targets,
			vec![
				&ArgTarget::Positional(0),
				&ArgTarget::Keyword(Arc::from("a")),
				&ArgTarget::Rest,
				&ArgTarget::Positional(1),
				&ArgTarget::Positional(2),
				&ArgTarget::Positional(3),
			]
		);
		assert_eq!(workflow.wiring()[4].source, EdgeSource::Context(named("Ctx")));
		assert_eq!(workflow.wiring()[5].source, EdgeSource::All(Vec::new()));
	}

	#[rstest]
	fn test_template_specialization_is_memoized() {
		// Arrange
		let repo = |arg: TypeExpr| DependencyKey::generic(TypeExpr::apply(TypeToken::named("Repo"), [arg]));
		let user = TypeExpr::plain(TypeToken::named("User"));
		let graph = Fixture::new()
			.add(factory(repo(TypeExpr::var("T")), &[]).build().unwrap())
			.graph();

		// Act
		let first = graph.ensure(&repo(user.clone())).unwrap();
		let second = graph.ensure(&repo(user)).unwrap();

		// Assert
		assert_eq!(first.slot(), second.slot());
		assert!(first.slot() >= Slot(1));
		assert_eq!(graph.plan().len(), 1);
	}

	#[rstest]
	fn test_open_request_is_rejected() {
		let repo = DependencyKey::generic(TypeExpr::apply(TypeToken::named("Repo"), [TypeExpr::var("T")]));
		let graph = Fixture::new().add(factory(repo.clone(), &[]).build().unwrap()).graph();

		assert!(matches!(
			graph.ensure(&repo),
			Err(DiError::InvalidGenericArgument { .. })
		));
	}

	#[rstest]
	fn test_plan_is_topological() {
		let graph = Fixture::new()
			.add(factory(named("Top"), &[DependencyEdge::positional(named("Mid"))]).build().unwrap())
			.add(factory(named("Mid"), &[DependencyEdge::positional(named("Leaf"))]).build().unwrap())
			.add(factory(named("Leaf"), &[]).build().unwrap())
			.graph();

		graph.plan_all().unwrap();

		let keys: Vec<String> = graph.plan().workflows().iter().map(|w| w.key().to_string()).collect();
		assert_eq!(keys, vec!["Leaf", "Mid", "Top"]);
	}

	#[rstest]
	fn test_failed_deferred_pass_is_rolled_back() {
		// Arrange
		let graph = Fixture::new()
			.add(factory(named("Session"), &[]).scoped("request").build().unwrap())
			.add(
				factory(named("Service"), &[DependencyEdge::positional(named("Session")).deferred()])
					.singleton()
					.build()
					.unwrap(),
			)
			.graph();

		// Act
		let first = graph.ensure(&named("Service"));
		let second = graph.ensure(&named("Service"));

		// Assert
		assert!(matches!(first, Err(DiError::InvalidProviderSpec { .. })));
		assert!(matches!(second, Err(DiError::InvalidProviderSpec { .. })));
		assert_eq!(graph.len(), 0);
		assert!(graph.plan().is_empty());
	}
}
