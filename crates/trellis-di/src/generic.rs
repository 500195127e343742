//! Generic template matching
//!
//! Open templates are matched against concrete requests by structural
//! unification of their type witnesses. Among the templates that unify and
//! whose bound arguments satisfy every declared bound, the most specific one
//! (most concrete type nodes in its pattern) wins.

use crate::error::{DiError, DiResult};
use crate::key::{DependencyKey, TypeExpr};
use crate::provider::ProviderSpec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Bindings of type variables to concrete expressions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Substitution(BTreeMap<Arc<str>, TypeExpr>);

impl Substitution {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn get(&self, name: &str) -> Option<&TypeExpr> {
		self.0.get(name)
	}

	pub fn bind(&mut self, name: impl AsRef<str>, expr: TypeExpr) {
		self.0.insert(Arc::from(name.as_ref()), expr);
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &TypeExpr)> {
		self.0.iter().map(|(k, v)| (&**k, v))
	}
}

/// Policy for templates of equal specificity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TieBreak {
	/// The template registered last wins.
	#[default]
	LatestRegistration,
	/// Equal-specificity matches are an error.
	Ambiguous,
}

/// Unifies `pattern` against the closed expression `concrete`, extending
/// `subst`. A variable already bound must bind an equal expression.
pub(crate) fn unify(pattern: &TypeExpr, concrete: &TypeExpr, subst: &mut Substitution) -> bool {
	match pattern {
		TypeExpr::Var(name) => match subst.get(name) {
			Some(bound) => bound == concrete,
			None => {
				subst.bind(name, concrete.clone());
				true
			}
		},
		TypeExpr::Apply { base, args } => match concrete {
			TypeExpr::Apply {
				base: other_base,
				args: other_args,
			} => {
				base == other_base
					&& args.len() == other_args.len()
					&& args
						.iter()
						.zip(other_args)
						.all(|(p, c)| unify(p, c, subst))
			}
			TypeExpr::Var(_) => false,
		},
	}
}

/// Unifies two keys: tags must agree and the type witnesses must unify.
pub(crate) fn unify_keys(pattern: &DependencyKey, concrete: &DependencyKey) -> Option<Substitution> {
	if pattern.tag() != concrete.tag() {
		return None;
	}
	let (pattern, concrete) = (pattern.type_expr()?, concrete.type_expr()?);
	let mut subst = Substitution::new();
	unify(&pattern, &concrete, &mut subst).then_some(subst)
}

/// Checks every bound of `spec` against the arguments in `subst`.
pub(crate) fn check_bounds(spec: &ProviderSpec, subst: &Substitution) -> Result<(), String> {
	for param in spec.type_params() {
		if let Some(arg) = subst.get(&param.name) {
			param.bound.check(&param.name, arg)?;
		}
	}
	Ok(())
}

/// Template chosen for a concrete request.
#[derive(Debug)]
pub(crate) struct TemplateMatch {
	pub(crate) spec: Arc<ProviderSpec>,
	pub(crate) subst: Substitution,
}

fn specificity(spec: &ProviderSpec) -> usize {
	spec.key()
		.type_expr()
		.map(|expr| expr.concrete_nodes())
		.unwrap_or(0)
}

/// Picks the template serving `key` among `candidates` (slot order).
pub(crate) fn select_template(
	key: &DependencyKey,
	candidates: &[Arc<ProviderSpec>],
	tie_break: TieBreak,
) -> DiResult<TemplateMatch> {
	let mut valid: Vec<TemplateMatch> = Vec::new();
	let mut violations: Vec<String> = Vec::new();

	for spec in candidates {
		let Some(subst) = unify_keys(spec.key(), key) else {
			continue;
		};
		match check_bounds(spec, &subst) {
			Ok(()) => valid.push(TemplateMatch {
				spec: spec.clone(),
				subst,
			}),
			Err(violation) => violations.push(violation),
		}
	}

	if valid.is_empty() {
		if violations.is_empty() {
			return Err(DiError::not_registered(key));
		}
		return Err(DiError::invalid_generic(key, violations.join("; ")));
	}

	let best = valid
		.iter()
		.map(|m| specificity(&m.spec))
		.max()
		.unwrap_or(0);
	let mut top: Vec<TemplateMatch> = valid
		.into_iter()
		.filter(|m| specificity(&m.spec) == best)
		.collect();

	if top.len() > 1 && tie_break == TieBreak::Ambiguous {
		let names: Vec<String> = top.iter().map(|m| m.spec.key().to_string()).collect();
		return Err(DiError::invalid_generic(
			key,
			format!("ambiguous templates: {}", names.join(", ")),
		));
	}

	top.sort_by_key(|m| m.spec.slot());
	let chosen = top
		.pop()
		.ok_or_else(|| DiError::not_registered(key))?;
	tracing::debug!(
		key = %key,
		template = %chosen.spec.key(),
		specificity = best,
		"template matched"
	);
	Ok(chosen)
}

/// Concrete spec for `key` from a matched template.
pub(crate) fn specialize(template: &TemplateMatch, key: &DependencyKey) -> ProviderSpec {
	let mut spec = template.spec.rekeyed(key.clone());
	spec.edges = spec
		.edges
		.iter()
		.map(|edge| {
			let mut edge = edge.clone();
			edge.key = edge.key.substitute(&template.subst);
			edge
		})
		.collect();
	spec.type_params = Vec::new();
	spec.type_args = template.subst.clone();
	spec
}
