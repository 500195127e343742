//! Provider registry
//!
//! Holds exactly one active [`ProviderSpec`] per dependency key, plus the
//! decorator rules layered on top. Every mutation bumps a generation counter
//! so compiled factories can tell they are stale.

use crate::decoration::DecoratorRule;
use crate::error::{DiError, DiResult};
use crate::key::{DependencyKey, TypeToken};
use crate::planner::{Graph, Snapshot};
use crate::provider::{ProviderSpec, Slot};
use crate::resolver::ResolverFactory;
use crate::settings::ResolverSettings;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Mutable map from dependency keys to provider specs.
///
/// # Examples
///
/// ```
/// use trellis_di::{DependencyKey, ProviderRegistry, ProviderSpec};
///
/// struct Config { port: u16 }
///
/// let mut registry = ProviderRegistry::new();
/// registry
/// 	.add(ProviderSpec::builder(DependencyKey::of::<Config>())
/// 		.instance(Config { port: 8080 })
/// 		.build()
/// 		.unwrap())
/// 	.unwrap();
///
/// let factory = registry.compile().unwrap();
/// let root = factory.root().unwrap();
/// assert_eq!(root.get::<Config>().unwrap().port, 8080);
/// # root.close().unwrap();
/// ```
pub struct ProviderRegistry {
	settings: Arc<ResolverSettings>,
	specs: BTreeMap<Slot, Arc<ProviderSpec>>,
	by_key: HashMap<DependencyKey, Slot>,
	decorators: Vec<Arc<DecoratorRule>>,
	next_slot: u32,
	generation: u64,
}

impl ProviderRegistry {
	pub fn new() -> Self {
		Self::with_settings(ResolverSettings::default())
	}

	pub fn with_settings(settings: ResolverSettings) -> Self {
		Self {
			settings: Arc::new(settings),
			specs: BTreeMap::new(),
			by_key: HashMap::new(),
			decorators: Vec::new(),
			next_slot: 0,
			generation: 0,
		}
	}

	pub fn settings(&self) -> &ResolverSettings {
		&self.settings
	}

	fn allocate_slot(&mut self) -> Slot {
		let slot = Slot(self.next_slot);
		self.next_slot += 1;
		slot
	}

	/// Registers `spec`, replacing any provider for the same key.
	///
	/// Returns the fresh slot assigned to the registration.
	pub fn add(&mut self, mut spec: ProviderSpec) -> DiResult<Slot> {
		spec.validate()?;
		if let Some(previous) = self.by_key.get(spec.key()).copied() {
			if !self.settings.validation.implicit_override {
				return Err(DiError::invalid_spec(
					spec.key(),
					format!("already registered at slot {}", previous),
				));
			}
			tracing::debug!(key = %spec.key(), previous = %previous, "replacing provider");
			self.specs.remove(&previous);
		}
		let slot = self.allocate_slot();
		spec.slot = Some(slot);
		self.by_key.insert(spec.key().clone(), slot);
		self.specs.insert(slot, Arc::new(spec));
		self.generation += 1;
		Ok(slot)
	}

	/// Appends a decorator rule; later rules wrap earlier ones.
	pub fn decorate(&mut self, mut rule: DecoratorRule) -> DiResult<Slot> {
		let slot = self.allocate_slot();
		rule.slot = Some(slot);
		rule.spec.slot = Some(slot);
		tracing::debug!(target_key = %rule.target(), slot = %slot, "decorator added");
		self.decorators.push(Arc::new(rule));
		self.generation += 1;
		Ok(slot)
	}

	/// Removes the provider for `key`; decorators targeting it stay registered.
	pub fn remove(&mut self, key: &DependencyKey) -> Option<Arc<ProviderSpec>> {
		let slot = self.by_key.remove(key)?;
		self.generation += 1;
		self.specs.remove(&slot)
	}

	pub fn get_by_identity(&self, key: &DependencyKey) -> Option<&Arc<ProviderSpec>> {
		self.by_key.get(key).and_then(|slot| self.specs.get(slot))
	}

	pub fn get_by_slot(&self, slot: Slot) -> Option<&Arc<ProviderSpec>> {
		self.specs.get(&slot)
	}

	pub fn contains(&self, key: &DependencyKey) -> bool {
		self.by_key.contains_key(key)
	}

	/// Open templates whose key has `token` as base, in slot order.
	pub fn templates_for(&self, token: &TypeToken) -> Vec<Arc<ProviderSpec>> {
		self.specs
			.values()
			.filter(|spec| spec.is_template() && spec.key().base_token() == Some(token))
			.cloned()
			.collect()
	}

	/// Keys implementing `base`: the unqualified registration first, then
	/// every tag-qualified one in slot order.
	pub fn implementations_of(&self, base: &DependencyKey) -> Vec<DependencyKey> {
		implementations_in(self.specs.values(), base)
	}

	pub fn decorators(&self) -> &[Arc<DecoratorRule>] {
		&self.decorators
	}

	/// Number of active registrations (decorators excluded).
	pub fn len(&self) -> usize {
		self.specs.len()
	}

	pub fn is_empty(&self) -> bool {
		self.specs.is_empty()
	}

	pub fn generation(&self) -> u64 {
		self.generation
	}

	/// Compiles the current registrations into a resolver factory.
	///
	/// In strict mode every registration is planned here, so wiring errors
	/// surface now instead of on first request.
	pub fn compile(&self) -> DiResult<ResolverFactory> {
		let ladder = self.settings.ladder()?;
		let snapshot = Snapshot {
			settings: self.settings.clone(),
			ladder: Arc::new(ladder),
			specs: self.specs.values().cloned().collect(),
			decorators: self.decorators.clone(),
			first_free_slot: self.next_slot,
		};
		let graph = Graph::new(snapshot);
		if self.settings.validation.nothing_decorated {
			graph.check_decorators()?;
		}
		if self.settings.strict {
			graph.plan_all()?;
		}
		tracing::debug!(
			providers = self.specs.len(),
			decorators = self.decorators.len(),
			planned = graph.len(),
			generation = self.generation,
			strict = self.settings.strict,
			"registry compiled"
		);
		Ok(ResolverFactory::new(graph, self.generation))
	}
}

impl Default for ProviderRegistry {
	fn default() -> Self {
		Self::new()
	}
}

pub(crate) fn implementations_in<'a>(
	specs: impl Iterator<Item = &'a Arc<ProviderSpec>>,
	base: &DependencyKey,
) -> Vec<DependencyKey> {
	let base = base.untagged();
	let mut unqualified = None;
	let mut tagged = Vec::new();
	for spec in specs {
		let key = spec.key();
		if key == base {
			unqualified = Some(key.clone());
		} else if key.tag().is_some() && key.untagged() == base {
			tagged.push(key.clone());
		}
	}
	unqualified.into_iter().chain(tagged).collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::key::TypeExpr;
	use crate::provider::DependencyEdge;
	use rstest::{fixture, rstest};

	fn spec(key: DependencyKey) -> ProviderSpec {
		ProviderSpec::builder(key).factory(|_| Ok(())).build().unwrap()
	}

	#[fixture]
	fn registry() -> ProviderRegistry {
		ProviderRegistry::new()
	}

	#[rstest]
	fn test_add_replaces_with_fresh_slot(mut registry: ProviderRegistry) {
		// Arrange
		let key = DependencyKey::named("Mailer");
		let first = registry.add(spec(key.clone())).unwrap();

		// Act
		let second = registry.add(spec(key.clone())).unwrap();

		// Assert
		assert!(second > first);
		assert_eq!(registry.len(), 1);
		assert!(registry.get_by_slot(first).is_none());
		assert_eq!(registry.get_by_identity(&key).unwrap().slot(), Some(second));
		assert_eq!(registry.generation(), 2);
	}

	#[rstest]
	fn test_implicit_override_disabled() {
		// Arrange
		let mut settings = ResolverSettings::default();
		settings.validation.implicit_override = false;
		let mut registry = ProviderRegistry::with_settings(settings);
		registry.add(spec(DependencyKey::named("Mailer"))).unwrap();

		// Act
		let result = registry.add(spec(DependencyKey::named("Mailer")));

		// Assert
		assert!(matches!(result, Err(DiError::InvalidProviderSpec { .. })));
	}

	#[rstest]
	fn test_add_rejects_malformed_spec(mut registry: ProviderRegistry) {
		let bad = ProviderSpec::builder(DependencyKey::named("Plugin"))
			.factory(|_| Ok(()))
			.edge(DependencyEdge::rest(DependencyKey::named("Hook")).deferred())
			.build()
			.unwrap();

		assert!(registry.add(bad).is_err());
		assert!(registry.is_empty());
		assert_eq!(registry.generation(), 0);
	}

	#[rstest]
	fn test_implementations_order(mut registry: ProviderRegistry) {
		// Arrange
		let base = DependencyKey::named("Handler");
		registry.add(spec(base.clone().tagged("b"))).unwrap();
		registry.add(spec(base.clone())).unwrap();
		registry.add(spec(base.clone().tagged("a"))).unwrap();
		registry.add(spec(DependencyKey::named("Other"))).unwrap();

		// Act
		let keys = registry.implementations_of(&base);

		// Assert
		let names: Vec<String> = keys.iter().map(ToString::to_string).collect();
		assert_eq!(names, vec!["Handler", "Handler[b]", "Handler[a]"]);
	}

	#[rstest]
	fn test_implementations_of_nothing_is_empty(registry: ProviderRegistry) {
		assert!(registry.implementations_of(&DependencyKey::named("Handler")).is_empty());
	}

	#[rstest]
	fn test_templates_for(mut registry: ProviderRegistry) {
		// Arrange
		let token = TypeToken::named("Repo");
		let open = DependencyKey::generic(TypeExpr::apply(token.clone(), [TypeExpr::var("T")]));
		let closed = DependencyKey::generic(TypeExpr::apply(
			token.clone(),
			[TypeExpr::plain(TypeToken::named("User"))],
		));
		registry.add(spec(open)).unwrap();
		registry.add(spec(closed)).unwrap();

		// Act
		let templates = registry.templates_for(&token);

		// Assert
		assert_eq!(templates.len(), 1);
		assert!(templates[0].is_template());
	}

	#[rstest]
	fn test_remove_bumps_generation(mut registry: ProviderRegistry) {
		let key = DependencyKey::named("Mailer");
		registry.add(spec(key.clone())).unwrap();

		assert!(registry.remove(&key).is_some());
		assert!(registry.remove(&key).is_none());
		assert_eq!(registry.generation(), 2);
		assert!(!registry.contains(&key));
	}
}
