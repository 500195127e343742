//! Argument bundles handed to provider bodies

use crate::deferred::DeferredHandle;
use crate::error::{DiError, DiResult};
use crate::generic::Substitution;
use crate::key::{DependencyKey, TypeExpr};
use crate::provider::Instance;
use std::any::Any;
use std::sync::Arc;

/// One wired argument.
#[derive(Clone)]
pub enum ArgValue {
	Value(Instance),
	Deferred(DeferredHandle),
	/// Every implementation of a key, unqualified first.
	All(Vec<Instance>),
}

/// Pre-wired arguments for one provider invocation, in edge order.
#[derive(Clone)]
pub struct ResolvedArgs {
	key: DependencyKey,
	positional: Vec<ArgValue>,
	keyword: Vec<(Arc<str>, ArgValue)>,
	rest: Vec<ArgValue>,
	rest_keyword: Vec<(Arc<str>, ArgValue)>,
	type_args: Substitution,
}

pub(crate) fn downcast<T: Any + Send + Sync>(
	value: Instance,
	key: &DependencyKey,
) -> DiResult<Arc<T>> {
	value.downcast::<T>().map_err(|_| {
		DiError::invalid_spec(
			key,
			format!("value is not a {}", std::any::type_name::<T>()),
		)
	})
}

impl ResolvedArgs {
	pub(crate) fn new(key: DependencyKey, type_args: Substitution) -> Self {
		Self {
			key,
			positional: Vec::new(),
			keyword: Vec::new(),
			rest: Vec::new(),
			rest_keyword: Vec::new(),
			type_args,
		}
	}

	pub(crate) fn push_positional(&mut self, value: ArgValue) {
		self.positional.push(value);
	}

	pub(crate) fn push_keyword(&mut self, name: Arc<str>, value: ArgValue) {
		self.keyword.push((name, value));
	}

	pub(crate) fn push_rest(&mut self, value: ArgValue) {
		self.rest.push(value);
	}

	pub(crate) fn push_rest_keyword(&mut self, name: Arc<str>, value: ArgValue) {
		self.rest_keyword.push((name, value));
	}

	/// Key of the provider being invoked.
	pub fn key(&self) -> &DependencyKey {
		&self.key
	}

	/// Bound type argument of a specialized template.
	pub fn type_argument(&self, name: &str) -> Option<&TypeExpr> {
		self.type_args.get(name)
	}

	pub fn positional_len(&self) -> usize {
		self.positional.len()
	}

	fn missing(&self, what: impl std::fmt::Display) -> DiError {
		DiError::invalid_spec(&self.key, format!("no argument {}", what))
	}

	fn mismatch(&self, what: impl std::fmt::Display, expected: &str) -> DiError {
		DiError::invalid_spec(&self.key, format!("argument {} is not {}", what, expected))
	}

	fn positional_arg(&self, index: usize) -> DiResult<&ArgValue> {
		self.positional
			.get(index)
			.ok_or_else(|| self.missing(index))
	}

	fn keyword_arg(&self, name: &str) -> DiResult<&ArgValue> {
		self.keyword
			.iter()
			.find(|(n, _)| &**n == name)
			.map(|(_, v)| v)
			.ok_or_else(|| self.missing(name))
	}

	fn value_of<'a>(&self, arg: &'a ArgValue, what: impl std::fmt::Display) -> DiResult<&'a Instance> {
		match arg {
			ArgValue::Value(value) => Ok(value),
			_ => Err(self.mismatch(what, "a resolved value")),
		}
	}

	/// Untyped positional value.
	pub fn raw(&self, index: usize) -> DiResult<&Instance> {
		let arg = self.positional_arg(index)?;
		self.value_of(arg, index)
	}

	/// Typed positional value.
	pub fn positional<T: Any + Send + Sync>(&self, index: usize) -> DiResult<Arc<T>> {
		downcast(self.raw(index)?.clone(), &self.key)
	}

	/// Typed keyword value.
	pub fn keyword<T: Any + Send + Sync>(&self, name: &str) -> DiResult<Arc<T>> {
		let arg = self.keyword_arg(name)?;
		downcast(self.value_of(arg, name)?.clone(), &self.key)
	}

	/// Deferred handle passed at a positional index.
	pub fn deferred(&self, index: usize) -> DiResult<&DeferredHandle> {
		match self.positional_arg(index)? {
			ArgValue::Deferred(handle) => Ok(handle),
			_ => Err(self.mismatch(index, "a deferred handle")),
		}
	}

	pub fn deferred_keyword(&self, name: &str) -> DiResult<&DeferredHandle> {
		match self.keyword_arg(name)? {
			ArgValue::Deferred(handle) => Ok(handle),
			_ => Err(self.mismatch(name, "a deferred handle")),
		}
	}

	/// Every implementation collected for a resolve-all edge at `index`.
	pub fn all<T: Any + Send + Sync>(&self, index: usize) -> DiResult<Vec<Arc<T>>> {
		match self.positional_arg(index)? {
			ArgValue::All(values) => values
				.iter()
				.map(|v| downcast(v.clone(), &self.key))
				.collect(),
			_ => Err(self.mismatch(index, "a resolve-all list")),
		}
	}

	pub fn all_keyword<T: Any + Send + Sync>(&self, name: &str) -> DiResult<Vec<Arc<T>>> {
		match self.keyword_arg(name)? {
			ArgValue::All(values) => values
				.iter()
				.map(|v| downcast(v.clone(), &self.key))
				.collect(),
			_ => Err(self.mismatch(name, "a resolve-all list")),
		}
	}

	/// Variadic positional tail; resolve-all entries are flattened.
	pub fn rest<T: Any + Send + Sync>(&self) -> DiResult<Vec<Arc<T>>> {
		let mut out = Vec::new();
		for arg in &self.rest {
			match arg {
				ArgValue::Value(value) => out.push(downcast(value.clone(), &self.key)?),
				ArgValue::All(values) => {
					for value in values {
						out.push(downcast(value.clone(), &self.key)?);
					}
				}
				ArgValue::Deferred(_) => return Err(self.mismatch("rest", "a resolved value")),
			}
		}
		Ok(out)
	}

	/// Variadic keyword map, in edge order.
	pub fn rest_keyword<T: Any + Send + Sync>(&self) -> DiResult<Vec<(Arc<str>, Arc<T>)>> {
		self.rest_keyword
			.iter()
			.map(|(name, arg)| {
				let value = self.value_of(arg, name)?;
				Ok((name.clone(), downcast(value.clone(), &self.key)?))
			})
			.collect()
	}
}
