//! Dependency scopes
//!
//! Scopes form a closed, totally ordered ladder. A resolver sits at exactly one
//! level and reaches deeper levels only by monotonic descent; skippable levels
//! may be passed over, non-skippable ones may not.

use crate::error::{DiError, DiResult};
use crate::provider::{Instance, Slot};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Name of a scope level.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeName(Arc<str>);

impl ScopeName {
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Debug for ScopeName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl fmt::Display for ScopeName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for ScopeName {
	fn from(name: &str) -> Self {
		Self(Arc::from(name))
	}
}

impl From<String> for ScopeName {
	fn from(name: String) -> Self {
		Self(Arc::from(name))
	}
}

impl From<StandardScope> for ScopeName {
	fn from(scope: StandardScope) -> Self {
		Self::from(scope.name())
	}
}

/// Levels of the default ladder, shallowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StandardScope {
	/// Process-wide level above the application (skippable).
	Runtime,
	App,
	/// Per-session level (skippable).
	Session,
	Request,
	Action,
	Step,
}

impl StandardScope {
	pub const ALL: [StandardScope; 6] = [
		StandardScope::Runtime,
		StandardScope::App,
		StandardScope::Session,
		StandardScope::Request,
		StandardScope::Action,
		StandardScope::Step,
	];

	pub fn name(self) -> &'static str {
		match self {
			StandardScope::Runtime => "runtime",
			StandardScope::App => "app",
			StandardScope::Session => "session",
			StandardScope::Request => "request",
			StandardScope::Action => "action",
			StandardScope::Step => "step",
		}
	}

	pub fn skippable(self) -> bool {
		matches!(self, StandardScope::Runtime | StandardScope::Session)
	}
}

/// One rung of the ladder.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeLevel {
	pub depth: u8,
	pub name: ScopeName,
	pub skippable: bool,
}

/// Closed, ordered set of scope levels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeLadder {
	levels: Vec<ScopeLevel>,
	root: u8,
}

impl ScopeLadder {
	/// Builds a ladder from `(name, skippable)` pairs, shallowest first.
	///
	/// The root level is the first non-skippable one, so at least one level
	/// must be non-skippable.
	///
	/// # Examples
	///
	/// ```
	/// use trellis_di::ScopeLadder;
	///
	/// let ladder = ScopeLadder::new([("app", false), ("request", false)]).unwrap();
	/// assert_eq!(ladder.root_level().name.as_str(), "app");
	/// ```
	pub fn new<N, I>(levels: I) -> DiResult<Self>
	where
		N: Into<ScopeName>,
		I: IntoIterator<Item = (N, bool)>,
	{
		let mut seen = HashSet::new();
		let mut out = Vec::new();
		for (index, (name, skippable)) in levels.into_iter().enumerate() {
			let name = name.into();
			if !seen.insert(name.clone()) {
				return Err(DiError::Settings(format!("duplicate scope level {}", name)));
			}
			let depth = u8::try_from(index)
				.map_err(|_| DiError::Settings("scope ladder is too deep".to_string()))?;
			out.push(ScopeLevel {
				depth,
				name,
				skippable,
			});
		}
		let root = out
			.iter()
			.find(|level| !level.skippable)
			.map(|level| level.depth)
			.ok_or_else(|| {
				DiError::Settings("scope ladder needs at least one non-skippable level".to_string())
			})?;
		Ok(Self { levels: out, root })
	}

	/// runtime (skippable), app, session (skippable), request, action, step.
	pub fn standard() -> Self {
		let levels = StandardScope::ALL
			.iter()
			.enumerate()
			.map(|(depth, scope)| ScopeLevel {
				depth: depth as u8,
				name: ScopeName::from(*scope),
				skippable: scope.skippable(),
			})
			.collect();
		Self { levels, root: 1 }
	}

	pub fn levels(&self) -> &[ScopeLevel] {
		&self.levels
	}

	pub fn get(&self, depth: u8) -> Option<&ScopeLevel> {
		self.levels.get(depth as usize)
	}

	pub fn by_name(&self, name: &ScopeName) -> Option<&ScopeLevel> {
		self.levels.iter().find(|level| &level.name == name)
	}

	/// Level of the root resolver and of every singleton.
	pub fn root_level(&self) -> &ScopeLevel {
		&self.levels[self.root as usize]
	}

	/// Levels from the top of the ladder down to the root level, inclusive.
	pub(crate) fn root_path(&self) -> Vec<ScopeLevel> {
		self.levels[..=self.root as usize].to_vec()
	}

	/// Levels to create when descending from `from` to `target`, the last
	/// being the target itself.
	///
	/// Without a target, descent passes over skippable levels and stops at the
	/// next non-skippable one.
	pub(crate) fn descent(
		&self,
		from: &ScopeLevel,
		target: Option<&ScopeName>,
	) -> DiResult<Vec<ScopeLevel>> {
		let below = &self.levels[from.depth as usize + 1..];
		match target {
			None => {
				let end = below
					.iter()
					.position(|level| !level.skippable)
					.ok_or_else(|| {
						DiError::scope_mismatch(
							&from.name,
							"no deeper non-skippable scope to enter",
						)
					})?;
				Ok(below[..=end].to_vec())
			}
			Some(name) => {
				let level = self.by_name(name).ok_or_else(|| {
					DiError::scope_mismatch(name, "unknown scope level")
				})?;
				if level.depth <= from.depth {
					return Err(DiError::scope_mismatch(
						name,
						format!("cannot enter from {}: not deeper", from.name),
					));
				}
				let path = &self.levels[from.depth as usize + 1..=level.depth as usize];
				if let Some(blocked) = path[..path.len() - 1].iter().find(|l| !l.skippable) {
					return Err(DiError::scope_mismatch(
						name,
						format!("would skip non-skippable scope {}", blocked.name),
					));
				}
				Ok(path.to_vec())
			}
		}
	}
}

impl Default for ScopeLadder {
	fn default() -> Self {
		Self::standard()
	}
}

/// Per-scope-instance cache of built values, keyed by slot.
#[derive(Default)]
pub(crate) struct ScopeCache {
	cache: RwLock<HashMap<Slot, Instance>>,
}

impl ScopeCache {
	pub(crate) fn new() -> Self {
		Self::default()
	}

	pub(crate) fn get(&self, slot: Slot) -> Option<Instance> {
		let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
		cache.get(&slot).cloned()
	}

	pub(crate) fn insert(&self, slot: Slot, value: Instance) {
		let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
		cache.insert(slot, value);
	}

	/// Stores `value` unless the slot is already populated; returns the cached value.
	pub(crate) fn insert_if_absent(&self, slot: Slot, value: Instance) -> Instance {
		let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
		cache.entry(slot).or_insert(value).clone()
	}

	#[cfg(test)]
	pub(crate) fn len(&self) -> usize {
		self.cache.read().unwrap_or_else(PoisonError::into_inner).len()
	}
}
