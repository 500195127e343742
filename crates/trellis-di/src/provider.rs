//! Dependency providers
//!
//! A [`ProviderSpec`] is the registered recipe for one [`DependencyKey`]: the
//! provider kind, the body that produces the value, the ordered dependency
//! edges handed to that body, and the lifetime and scope rules the planner
//! enforces.

use crate::args::ResolvedArgs;
use crate::error::{DiError, DiResult};
use crate::generic::Substitution;
use crate::key::{DependencyKey, TypeExpr};
use crate::scope::ScopeName;
use futures::future::BoxFuture;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Type-erased resolved value.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Future returned by asynchronous provider bodies.
pub type ProviderFuture<T> = BoxFuture<'static, DiResult<T>>;

/// Monotonic registration index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Slot(pub(crate) u32);

impl Slot {
	pub fn index(self) -> u32 {
		self.0
	}
}

impl fmt::Display for Slot {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

/// How a provider produces its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
	/// Fixed, pre-built value.
	Instance,
	/// Direct construction from the wired arguments.
	Construct,
	/// Factory call.
	Factory,
	/// Generator-style resource: acquires a value and hands back its teardown.
	Generator,
	/// Externally managed resource entered and exited by the owning scope.
	ManagedResource,
}

impl ProviderKind {
	/// Whether instances of this kind register a teardown with their scope.
	pub fn needs_cleanup(self) -> bool {
		matches!(self, ProviderKind::Generator | ProviderKind::ManagedResource)
	}

	pub fn as_str(self) -> &'static str {
		match self {
			ProviderKind::Instance => "instance",
			ProviderKind::Construct => "construct",
			ProviderKind::Factory => "factory",
			ProviderKind::Generator => "generator",
			ProviderKind::ManagedResource => "managed-resource",
		}
	}
}

/// How long a built value is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifetime {
	/// Built on every request; never cached.
	Transient,
	/// One instance per root resolver.
	Singleton,
	/// One instance per scope instance at the declared level.
	Scoped,
}

impl Lifetime {
	pub fn as_str(self) -> &'static str {
		match self {
			Lifetime::Transient => "transient",
			Lifetime::Singleton => "singleton",
			Lifetime::Scoped => "scoped",
		}
	}
}

/// Where an edge's value lands in the provider's argument bundle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArgShape {
	Positional,
	Keyword(Arc<str>),
	/// Appended to the variadic positional tail.
	VarPositional,
	/// Added to the variadic keyword map under the given name.
	VarKeyword(Arc<str>),
}

impl ArgShape {
	pub fn is_variadic(&self) -> bool {
		matches!(self, ArgShape::VarPositional | ArgShape::VarKeyword(_))
	}
}

/// How an edge's value is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeMode {
	/// Resolved before the provider body runs.
	Eager,
	/// Passed as a [`DeferredHandle`](crate::DeferredHandle) resolved on demand.
	Deferred,
	/// Every registered implementation of the key, as a list.
	All,
	/// Read from the context values of the enclosing scopes.
	FromContext,
}

/// One ordered dependency of a provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DependencyEdge {
	pub key: DependencyKey,
	pub shape: ArgShape,
	pub mode: EdgeMode,
}

impl DependencyEdge {
	pub fn positional(key: impl Into<DependencyKey>) -> Self {
		Self {
			key: key.into(),
			shape: ArgShape::Positional,
			mode: EdgeMode::Eager,
		}
	}

	pub fn keyword(name: impl AsRef<str>, key: impl Into<DependencyKey>) -> Self {
		Self {
			key: key.into(),
			shape: ArgShape::Keyword(Arc::from(name.as_ref())),
			mode: EdgeMode::Eager,
		}
	}

	pub fn rest(key: impl Into<DependencyKey>) -> Self {
		Self {
			key: key.into(),
			shape: ArgShape::VarPositional,
			mode: EdgeMode::Eager,
		}
	}

	pub fn rest_keyword(name: impl AsRef<str>, key: impl Into<DependencyKey>) -> Self {
		Self {
			key: key.into(),
			shape: ArgShape::VarKeyword(Arc::from(name.as_ref())),
			mode: EdgeMode::Eager,
		}
	}

	/// Hands the provider a deferred handle instead of the value.
	pub fn deferred(mut self) -> Self {
		self.mode = EdgeMode::Deferred;
		self
	}

	/// Collects every implementation of the key.
	pub fn all(mut self) -> Self {
		self.mode = EdgeMode::All;
		self
	}

	/// Reads the value from the scope context instead of a provider.
	pub fn from_context(mut self) -> Self {
		self.mode = EdgeMode::FromContext;
		self
	}
}

pub type SyncBody = Arc<dyn Fn(&ResolvedArgs) -> DiResult<Instance> + Send + Sync>;
pub type AsyncBody = Arc<dyn Fn(ResolvedArgs) -> ProviderFuture<Instance> + Send + Sync>;
pub type AcquireBody = Arc<dyn Fn(&ResolvedArgs) -> DiResult<Acquired> + Send + Sync>;
pub type AcquireAsyncBody = Arc<dyn Fn(ResolvedArgs) -> ProviderFuture<Acquired> + Send + Sync>;

/// Callable that produces a provider's value.
#[derive(Clone)]
pub enum ProviderBody {
	Instance(Instance),
	Sync(SyncBody),
	Async(AsyncBody),
	Acquire(AcquireBody),
	AcquireAsync(AcquireAsyncBody),
}

impl ProviderBody {
	pub fn is_async(&self) -> bool {
		matches!(self, ProviderBody::Async(_) | ProviderBody::AcquireAsync(_))
	}

	fn accepts(&self, kind: ProviderKind) -> bool {
		match self {
			ProviderBody::Instance(_) => kind == ProviderKind::Instance,
			ProviderBody::Sync(_) | ProviderBody::Async(_) => {
				matches!(kind, ProviderKind::Construct | ProviderKind::Factory)
			}
			ProviderBody::Acquire(_) | ProviderBody::AcquireAsync(_) => kind.needs_cleanup(),
		}
	}
}

impl fmt::Debug for ProviderBody {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			ProviderBody::Instance(_) => "Instance",
			ProviderBody::Sync(_) => "Sync",
			ProviderBody::Async(_) => "Async",
			ProviderBody::Acquire(_) => "Acquire",
			ProviderBody::AcquireAsync(_) => "AcquireAsync",
		};
		f.write_str(name)
	}
}

/// Teardown of an acquired resource.
pub enum Release {
	Sync(Box<dyn FnOnce() -> DiResult<()> + Send>),
	Async(Box<dyn FnOnce() -> BoxFuture<'static, DiResult<()>> + Send>),
	None,
}

impl fmt::Debug for Release {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Release::Sync(_) => f.write_str("Release::Sync"),
			Release::Async(_) => f.write_str("Release::Async"),
			Release::None => f.write_str("Release::None"),
		}
	}
}

/// Value produced by a generator or managed resource, paired with its teardown.
///
/// # Examples
///
/// ```
/// use trellis_di::Acquired;
///
/// struct Connection;
///
/// let acquired = Acquired::new(Connection, || {
/// 	// close the connection
/// 	Ok(())
/// });
/// assert!(acquired.value().downcast_ref::<Connection>().is_some());
/// ```
#[derive(Debug)]
pub struct Acquired {
	pub(crate) value: Instance,
	pub(crate) release: Release,
}

impl Acquired {
	/// Value with a synchronous teardown.
	pub fn new<T, F>(value: T, release: F) -> Self
	where
		T: Any + Send + Sync,
		F: FnOnce() -> DiResult<()> + Send + 'static,
	{
		Self {
			value: Arc::new(value),
			release: Release::Sync(Box::new(release)),
		}
	}

	/// Value whose teardown must be awaited; only `close_async` can run it.
	pub fn with_async_release<T, F, Fut>(value: T, release: F) -> Self
	where
		T: Any + Send + Sync,
		F: FnOnce() -> Fut + Send + 'static,
		Fut: Future<Output = DiResult<()>> + Send + 'static,
	{
		Self {
			value: Arc::new(value),
			release: Release::Async(Box::new(move || -> BoxFuture<'static, DiResult<()>> {
				Box::pin(release())
			})),
		}
	}

	/// Value with nothing to tear down.
	pub fn without_release<T: Any + Send + Sync>(value: T) -> Self {
		Self {
			value: Arc::new(value),
			release: Release::None,
		}
	}

	pub fn value(&self) -> &Instance {
		&self.value
	}
}

/// Predicate over a bound type argument.
pub type TypePredicate = Arc<dyn Fn(&TypeExpr) -> bool + Send + Sync>;

/// Restriction on a template's type parameter.
#[derive(Clone)]
pub enum TypeBound {
	Unbounded,
	/// The argument must equal one of the listed types.
	Constraints(Vec<TypeExpr>),
	/// The argument must satisfy a named predicate.
	Satisfies { name: Arc<str>, predicate: TypePredicate },
}

impl TypeBound {
	pub fn one_of(types: impl IntoIterator<Item = TypeExpr>) -> Self {
		TypeBound::Constraints(types.into_iter().collect())
	}

	pub fn satisfies<F>(name: impl AsRef<str>, predicate: F) -> Self
	where
		F: Fn(&TypeExpr) -> bool + Send + Sync + 'static,
	{
		TypeBound::Satisfies {
			name: Arc::from(name.as_ref()),
			predicate: Arc::new(predicate),
		}
	}

	/// Checks `arg`, describing the violation on failure.
	pub(crate) fn check(&self, param: &str, arg: &TypeExpr) -> Result<(), String> {
		match self {
			TypeBound::Unbounded => Ok(()),
			TypeBound::Constraints(allowed) => {
				if allowed.contains(arg) {
					Ok(())
				} else {
					let names: Vec<String> = allowed.iter().map(ToString::to_string).collect();
					Err(format!(
						"{} = {} is not one of [{}]",
						param,
						arg,
						names.join(", ")
					))
				}
			}
			TypeBound::Satisfies { name, predicate } => {
				if predicate(arg) {
					Ok(())
				} else {
					Err(format!("{} = {} does not satisfy {}", param, arg, name))
				}
			}
		}
	}
}

impl fmt::Debug for TypeBound {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			TypeBound::Unbounded => f.write_str("Unbounded"),
			TypeBound::Constraints(types) => f.debug_tuple("Constraints").field(types).finish(),
			TypeBound::Satisfies { name, .. } => write!(f, "Satisfies({})", name),
		}
	}
}

/// Declared type parameter of an open template.
#[derive(Debug, Clone)]
pub struct TypeParam {
	pub name: Arc<str>,
	pub bound: TypeBound,
}

/// Registered recipe for one dependency key.
#[derive(Debug, Clone)]
pub struct ProviderSpec {
	pub(crate) key: DependencyKey,
	pub(crate) kind: ProviderKind,
	pub(crate) body: ProviderBody,
	pub(crate) edges: Vec<DependencyEdge>,
	pub(crate) lifetime: Option<Lifetime>,
	pub(crate) scope: Option<ScopeName>,
	pub(crate) concurrency_safe: Option<bool>,
	pub(crate) type_params: Vec<TypeParam>,
	pub(crate) type_args: Substitution,
	pub(crate) slot: Option<Slot>,
}

impl ProviderSpec {
	/// Starts a spec for `key`.
	///
	/// # Examples
	///
	/// ```
	/// use trellis_di::{DependencyEdge, DependencyKey, ProviderSpec};
	///
	/// struct Config { url: String }
	/// struct Database { url: String }
	///
	/// let spec = ProviderSpec::builder(DependencyKey::of::<Database>())
	/// 	.factory(|args| {
	/// 		let config = args.positional::<Config>(0)?;
	/// 		Ok(Database { url: config.url.clone() })
	/// 	})
	/// 	.edge(DependencyEdge::positional(DependencyKey::of::<Config>()))
	/// 	.singleton()
	/// 	.build()
	/// 	.unwrap();
	/// assert_eq!(spec.edges().len(), 1);
	/// ```
	pub fn builder(key: impl Into<DependencyKey>) -> ProviderSpecBuilder {
		ProviderSpecBuilder::new(key.into())
	}

	/// Serves `key` by forwarding to `source`.
	///
	/// The alias is transient, so it shares whatever caching `source` has.
	pub fn alias(key: impl Into<DependencyKey>, source: impl Into<DependencyKey>) -> Self {
		ProviderSpec {
			key: key.into(),
			kind: ProviderKind::Factory,
			body: ProviderBody::Sync(Arc::new(|args: &ResolvedArgs| args.raw(0).cloned())),
			edges: vec![DependencyEdge::positional(source)],
			lifetime: Some(Lifetime::Transient),
			scope: None,
			concurrency_safe: None,
			type_params: Vec::new(),
			type_args: Substitution::new(),
			slot: None,
		}
	}

	pub fn key(&self) -> &DependencyKey {
		&self.key
	}

	pub fn kind(&self) -> ProviderKind {
		self.kind
	}

	pub fn body(&self) -> &ProviderBody {
		&self.body
	}

	pub fn edges(&self) -> &[DependencyEdge] {
		&self.edges
	}

	/// Effective lifetime: fixed instances are singletons, the default is scoped.
	pub fn lifetime(&self) -> Lifetime {
		if self.kind == ProviderKind::Instance {
			return Lifetime::Singleton;
		}
		self.lifetime.unwrap_or(Lifetime::Scoped)
	}

	pub fn declared_scope(&self) -> Option<&ScopeName> {
		self.scope.as_ref()
	}

	pub fn concurrency_safe(&self) -> Option<bool> {
		self.concurrency_safe
	}

	pub fn is_async(&self) -> bool {
		self.body.is_async()
	}

	pub fn needs_cleanup(&self) -> bool {
		self.kind.needs_cleanup()
	}

	pub fn type_params(&self) -> &[TypeParam] {
		&self.type_params
	}

	/// Type arguments bound when this spec was specialized from a template.
	pub fn type_args(&self) -> &Substitution {
		&self.type_args
	}

	pub fn is_template(&self) -> bool {
		self.key.is_open()
	}

	/// Slot assigned at registration.
	pub fn slot(&self) -> Option<Slot> {
		self.slot
	}

	/// Structural well-formedness.
	pub(crate) fn validate(&self) -> DiResult<()> {
		if !self.body.accepts(self.kind) {
			return Err(DiError::invalid_spec(
				&self.key,
				format!(
					"{:?} body cannot implement a {} provider",
					self.body,
					self.kind.as_str()
				),
			));
		}
		if let DependencyKey::Generic(TypeExpr::Var(_)) = self.key {
			return Err(DiError::invalid_spec(
				&self.key,
				"a bare type variable cannot be registered",
			));
		}
		if matches!(self.key, DependencyKey::Layer { .. }) {
			return Err(DiError::invalid_spec(
				&self.key,
				"decoration layers are managed by the registry",
			));
		}
		if self.kind == ProviderKind::Instance {
			if !self.edges.is_empty() {
				return Err(DiError::invalid_spec(
					&self.key,
					"a fixed instance cannot declare dependencies",
				));
			}
			if matches!(self.lifetime, Some(l) if l != Lifetime::Singleton) {
				return Err(DiError::invalid_spec(
					&self.key,
					"a fixed instance is always a singleton",
				));
			}
			if self.is_template() {
				return Err(DiError::invalid_spec(
					&self.key,
					"a fixed instance cannot be a template",
				));
			}
		}

		let declared = self.key.variables();
		for param in &self.type_params {
			if !declared.contains(&param.name) {
				return Err(DiError::invalid_spec(
					&self.key,
					format!("type parameter {} does not occur in the key", param.name),
				));
			}
		}
		for edge in &self.edges {
			if let Some(var) = edge.key.variables().into_iter().find(|v| !declared.contains(v)) {
				return Err(DiError::invalid_spec(
					&self.key,
					format!("edge {} uses undeclared type variable ?{}", edge.key, var),
				));
			}
			if edge.mode == EdgeMode::Deferred && edge.shape.is_variadic() {
				return Err(DiError::invalid_spec(
					&self.key,
					format!("deferred edge {} cannot be variadic", edge.key),
				));
			}
			if matches!(edge.key, DependencyKey::Layer { .. }) {
				return Err(DiError::invalid_spec(
					&self.key,
					format!("edge {} targets a decoration layer", edge.key),
				));
			}
		}
		Ok(())
	}

	/// The same recipe under another key.
	pub(crate) fn rekeyed(&self, key: DependencyKey) -> ProviderSpec {
		ProviderSpec {
			key,
			..self.clone()
		}
	}
}

/// Builder for [`ProviderSpec`].
pub struct ProviderSpecBuilder {
	key: DependencyKey,
	kind: ProviderKind,
	body: Option<ProviderBody>,
	bodies: usize,
	edges: Vec<DependencyEdge>,
	lifetime: Option<Lifetime>,
	scope: Option<ScopeName>,
	concurrency_safe: Option<bool>,
	type_params: Vec<TypeParam>,
}

impl ProviderSpecBuilder {
	fn new(key: DependencyKey) -> Self {
		Self {
			key,
			kind: ProviderKind::Factory,
			body: None,
			bodies: 0,
			edges: Vec::new(),
			lifetime: None,
			scope: None,
			concurrency_safe: None,
			type_params: Vec::new(),
		}
	}

	fn set_body(mut self, kind: ProviderKind, body: ProviderBody) -> Self {
		self.kind = kind;
		self.body = Some(body);
		self.bodies += 1;
		self
	}

	/// Serves a pre-built value.
	pub fn instance<T: Any + Send + Sync>(self, value: T) -> Self {
		self.instance_arc(Arc::new(value))
	}

	pub fn instance_arc(self, value: Instance) -> Self {
		self.set_body(ProviderKind::Instance, ProviderBody::Instance(value))
	}

	/// Builds the value directly from its arguments.
	pub fn construct<T, F>(self, f: F) -> Self
	where
		T: Any + Send + Sync,
		F: Fn(&ResolvedArgs) -> DiResult<T> + Send + Sync + 'static,
	{
		self.set_body(ProviderKind::Construct, sync_body(f))
	}

	pub fn factory<T, F>(self, f: F) -> Self
	where
		T: Any + Send + Sync,
		F: Fn(&ResolvedArgs) -> DiResult<T> + Send + Sync + 'static,
	{
		self.set_body(ProviderKind::Factory, sync_body(f))
	}

	pub fn factory_async<T, F, Fut>(self, f: F) -> Self
	where
		T: Any + Send + Sync,
		F: Fn(ResolvedArgs) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = DiResult<T>> + Send + 'static,
	{
		let body: AsyncBody = Arc::new(move |args: ResolvedArgs| -> ProviderFuture<Instance> {
			let fut = f(args);
			Box::pin(async move { Ok(Arc::new(fut.await?) as Instance) })
		});
		self.set_body(ProviderKind::Factory, ProviderBody::Async(body))
	}

	/// Acquires a resource; the returned teardown runs when the owning scope exits.
	pub fn generator<F>(self, f: F) -> Self
	where
		F: Fn(&ResolvedArgs) -> DiResult<Acquired> + Send + Sync + 'static,
	{
		self.set_body(ProviderKind::Generator, ProviderBody::Acquire(Arc::new(f)))
	}

	pub fn generator_async<F, Fut>(self, f: F) -> Self
	where
		F: Fn(ResolvedArgs) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = DiResult<Acquired>> + Send + 'static,
	{
		self.set_body(ProviderKind::Generator, acquire_async_body(f))
	}

	/// Enters an externally managed resource; its exit runs when the owning scope exits.
	pub fn managed<F>(self, f: F) -> Self
	where
		F: Fn(&ResolvedArgs) -> DiResult<Acquired> + Send + Sync + 'static,
	{
		self.set_body(
			ProviderKind::ManagedResource,
			ProviderBody::Acquire(Arc::new(f)),
		)
	}

	pub fn managed_async<F, Fut>(self, f: F) -> Self
	where
		F: Fn(ResolvedArgs) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = DiResult<Acquired>> + Send + 'static,
	{
		self.set_body(ProviderKind::ManagedResource, acquire_async_body(f))
	}

	pub fn edge(mut self, edge: DependencyEdge) -> Self {
		self.edges.push(edge);
		self
	}

	pub fn edges(mut self, edges: impl IntoIterator<Item = DependencyEdge>) -> Self {
		self.edges.extend(edges);
		self
	}

	pub fn lifetime(mut self, lifetime: Lifetime) -> Self {
		self.lifetime = Some(lifetime);
		self
	}

	pub fn singleton(self) -> Self {
		self.lifetime(Lifetime::Singleton)
	}

	pub fn transient(self) -> Self {
		self.lifetime(Lifetime::Transient)
	}

	/// Scoped lifetime cached at the named level.
	pub fn scoped(self, scope: impl Into<ScopeName>) -> Self {
		self.lifetime(Lifetime::Scoped).scope(scope)
	}

	/// Declared scope; when omitted the deepest dependency scope is used.
	pub fn scope(mut self, scope: impl Into<ScopeName>) -> Self {
		self.scope = Some(scope.into());
		self
	}

	pub fn concurrency_safe(mut self, safe: bool) -> Self {
		self.concurrency_safe = Some(safe);
		self
	}

	pub fn type_param(mut self, name: impl AsRef<str>, bound: TypeBound) -> Self {
		self.type_params.push(TypeParam {
			name: Arc::from(name.as_ref()),
			bound,
		});
		self
	}

	/// Finishes the spec; exactly one body must have been given.
	pub fn build(self) -> DiResult<ProviderSpec> {
		let body = match (self.body, self.bodies) {
			(Some(body), 1) => body,
			(None, _) => {
				return Err(DiError::invalid_spec(&self.key, "no provider body given"));
			}
			(Some(_), n) => {
				return Err(DiError::invalid_spec(
					&self.key,
					format!("{} provider bodies given, expected exactly one", n),
				));
			}
		};
		Ok(ProviderSpec {
			key: self.key,
			kind: self.kind,
			body,
			edges: self.edges,
			lifetime: self.lifetime,
			scope: self.scope,
			concurrency_safe: self.concurrency_safe,
			type_params: self.type_params,
			type_args: Substitution::new(),
			slot: None,
		})
	}
}

fn sync_body<T, F>(f: F) -> ProviderBody
where
	T: Any + Send + Sync,
	F: Fn(&ResolvedArgs) -> DiResult<T> + Send + Sync + 'static,
{
	ProviderBody::Sync(Arc::new(move |args: &ResolvedArgs| {
		Ok(Arc::new(f(args)?) as Instance)
	}))
}

fn acquire_async_body<F, Fut>(f: F) -> ProviderBody
where
	F: Fn(ResolvedArgs) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = DiResult<Acquired>> + Send + 'static,
{
	ProviderBody::AcquireAsync(Arc::new(
		move |args: ResolvedArgs| -> ProviderFuture<Acquired> { Box::pin(f(args)) },
	))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::key::TypeToken;
	use rstest::rstest;

	struct Database;

	fn repo_of(arg: TypeExpr) -> DependencyKey {
		DependencyKey::generic(TypeExpr::apply(TypeToken::named("Repo"), [arg]))
	}

	#[rstest]
	fn test_builder_requires_exactly_one_body() {
		// Arrange
		let none = ProviderSpec::builder(DependencyKey::of::<Database>());
		let two = ProviderSpec::builder(DependencyKey::of::<Database>())
			.instance(Database)
			.factory(|_| Ok(Database));

		// Act & Assert
		assert!(matches!(
			none.build(),
			Err(DiError::InvalidProviderSpec { .. })
		));
		assert!(matches!(two.build(), Err(DiError::InvalidProviderSpec { .. })));
	}

	#[rstest]
	fn test_default_lifetimes() {
		let instance = ProviderSpec::builder(DependencyKey::of::<Database>())
			.instance(Database)
			.build()
			.unwrap();
		let factory = ProviderSpec::builder(DependencyKey::of::<Database>())
			.factory(|_| Ok(Database))
			.build()
			.unwrap();

		assert_eq!(instance.lifetime(), Lifetime::Singleton);
		assert_eq!(factory.lifetime(), Lifetime::Scoped);
		assert!(!factory.needs_cleanup());
	}

	#[rstest]
	fn test_generator_needs_cleanup_and_async_flag() {
		let spec = ProviderSpec::builder(DependencyKey::of::<Database>())
			.generator_async(|_| async { Ok(Acquired::without_release(Database)) })
			.build()
			.unwrap();

		assert!(spec.needs_cleanup());
		assert!(spec.is_async());
		assert_eq!(spec.kind(), ProviderKind::Generator);
	}

	#[rstest]
	fn test_validate_rejects_undeclared_edge_variable() {
		// Arrange
		let spec = ProviderSpec::builder(repo_of(TypeExpr::var("T")))
			.factory(|_| Ok(Database))
			.edge(DependencyEdge::positional(repo_of(TypeExpr::var("U"))))
			.build()
			.unwrap();

		// Act
		let result = spec.validate();

		// Assert
		match result {
			Err(DiError::InvalidProviderSpec { message, .. }) => {
				assert!(message.contains("?U"));
			}
			other => panic!("Expected InvalidProviderSpec, got {:?}", other),
		}
	}

	#[rstest]
	fn test_validate_rejects_variadic_deferred_edge() {
		let spec = ProviderSpec::builder(DependencyKey::of::<Database>())
			.factory(|_| Ok(Database))
			.edge(DependencyEdge::rest(DependencyKey::named("Plugin")).deferred())
			.build()
			.unwrap();

		assert!(matches!(
			spec.validate(),
			Err(DiError::InvalidProviderSpec { .. })
		));
	}

	#[rstest]
	fn test_validate_rejects_instance_with_edges() {
		let spec = ProviderSpec::builder(DependencyKey::of::<Database>())
			.instance(Database)
			.edge(DependencyEdge::positional(DependencyKey::named("Config")))
			.build()
			.unwrap();

		assert!(spec.validate().is_err());
	}

	#[rstest]
	#[case(TypeBound::Unbounded, true)]
	#[case(TypeBound::one_of([TypeExpr::plain(TypeToken::named("User"))]), true)]
	#[case(TypeBound::one_of([TypeExpr::plain(TypeToken::named("Order"))]), false)]
	#[case(TypeBound::satisfies("Entity", |t: &TypeExpr| t.to_string().starts_with('U')), true)]
	#[case(TypeBound::satisfies("Entity", |t: &TypeExpr| t.args().len() == 1), false)]
	fn test_type_bound_check(#[case] bound: TypeBound, #[case] ok: bool) {
		let arg = TypeExpr::plain(TypeToken::named("User"));
		assert_eq!(bound.check("T", &arg).is_ok(), ok);
	}

	#[rstest]
	fn test_slot_display() {
		assert_eq!(Slot(7).to_string(), "#7");
	}
}
