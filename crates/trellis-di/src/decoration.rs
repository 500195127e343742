//! Decorator chains
//!
//! A decorator wraps the provider registered for the same key. Rules stack
//! in registration order, the most recent one outermost. When a decorated key
//! is planned, the chain is materialized as synthetic layer keys: layer 0 is
//! the decorated registration itself, layer *i* receives layer *i - 1*
//! through its inner edge, and the outermost layer takes the original key.

use crate::error::{DiError, DiResult};
use crate::generic::{Substitution, check_bounds, unify_keys};
use crate::key::DependencyKey;
use crate::provider::{EdgeMode, ProviderSpec, Slot};

/// A registered decorator: a wrapping provider plus the index of the edge
/// that receives the wrapped value.
#[derive(Debug, Clone)]
pub struct DecoratorRule {
	pub(crate) spec: ProviderSpec,
	pub(crate) inner: usize,
	pub(crate) slot: Option<Slot>,
}

impl DecoratorRule {
	/// Decorator whose single edge targeting its own key is the inner edge.
	///
	/// # Examples
	///
	/// ```
	/// use trellis_di::{DecoratorRule, DependencyEdge, DependencyKey, ProviderSpec};
	///
	/// struct Cache(u32);
	///
	/// let key = DependencyKey::of::<Cache>();
	/// let spec = ProviderSpec::builder(key.clone())
	/// 	.factory(|args| Ok(Cache(args.positional::<Cache>(0)?.0 + 1)))
	/// 	.edge(DependencyEdge::positional(key))
	/// 	.build()
	/// 	.unwrap();
	/// let rule = DecoratorRule::new(spec).unwrap();
	/// assert_eq!(rule.inner_edge(), 0);
	/// ```
	pub fn new(spec: ProviderSpec) -> DiResult<Self> {
		let candidates: Vec<usize> = spec
			.edges()
			.iter()
			.enumerate()
			.filter(|(_, edge)| edge.key == spec.key)
			.map(|(index, _)| index)
			.collect();
		match candidates.as_slice() {
			[] => Err(DiError::invalid_spec(
				spec.key(),
				"decorator has no edge receiving the decorated value",
			)),
			[index] => Self::with_inner(spec, *index),
			_ => Err(DiError::invalid_spec(
				spec.key(),
				"decorator has several edges on the decorated key; name the inner one",
			)),
		}
	}

	/// Decorator whose edge at `index` receives the decorated value.
	pub fn with_inner(spec: ProviderSpec, index: usize) -> DiResult<Self> {
		spec.validate()?;
		let edge = spec.edges().get(index).ok_or_else(|| {
			DiError::invalid_spec(spec.key(), format!("no edge at index {}", index))
		})?;
		if edge.key != spec.key {
			return Err(DiError::invalid_spec(
				spec.key(),
				format!("inner edge {} does not target the decorated key", edge.key),
			));
		}
		if edge.mode != EdgeMode::Eager || edge.shape.is_variadic() {
			return Err(DiError::invalid_spec(
				spec.key(),
				"inner edge must be an eager positional or keyword edge",
			));
		}
		Ok(Self {
			spec,
			inner: index,
			slot: None,
		})
	}

	/// Key this rule decorates; may be an open template key.
	pub fn target(&self) -> &DependencyKey {
		self.spec.key()
	}

	pub fn inner_edge(&self) -> usize {
		self.inner
	}

	pub fn slot(&self) -> Option<Slot> {
		self.slot
	}

	/// Bindings under which this rule applies to the concrete `key`.
	pub(crate) fn applies_to(&self, key: &DependencyKey) -> Option<Substitution> {
		if !self.target().is_open() {
			return (self.target() == key).then(Substitution::new);
		}
		let subst = unify_keys(self.target(), key)?;
		check_bounds(&self.spec, &subst).ok()?;
		Some(subst)
	}
}

/// Materializes the chain for `base`, innermost first.
///
/// `rules` are the applicable rules in registration order with their
/// bindings; `next_slot` hands out fresh slots for the wrapping layers.
pub(crate) fn materialize_chain(
	base: ProviderSpec,
	rules: &[(&DecoratorRule, Substitution)],
	mut next_slot: impl FnMut() -> Slot,
) -> Vec<ProviderSpec> {
	if rules.is_empty() {
		return vec![base];
	}
	let key = base.key().clone();
	let mut layers = Vec::with_capacity(rules.len() + 1);
	layers.push(base.rekeyed(key.layer(0)));

	for (depth, (rule, subst)) in rules.iter().enumerate() {
		let depth = depth as u32 + 1;
		let layer_key = if depth as usize == rules.len() {
			key.clone()
		} else {
			key.layer(depth)
		};
		let mut spec = rule.spec.rekeyed(layer_key);
		spec.edges = spec
			.edges
			.iter()
			.enumerate()
			.map(|(index, edge)| {
				let mut edge = edge.clone();
				edge.key = if index == rule.inner {
					key.layer(depth - 1)
				} else {
					edge.key.substitute(subst)
				};
				edge
			})
			.collect();
		spec.lifetime = spec.lifetime.or(Some(base.lifetime()));
		spec.scope = spec.scope.or_else(|| base.scope.clone());
		spec.concurrency_safe = spec.concurrency_safe.or(base.concurrency_safe);
		spec.type_params = Vec::new();
		spec.type_args = subst.clone();
		spec.slot = Some(next_slot());
		layers.push(spec);
	}
	layers
}
