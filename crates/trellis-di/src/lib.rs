//! # Trellis Dependency Injection
//!
//! A compiled dependency-injection runtime: providers are registered against
//! structural keys, the registry is compiled into a plan, and resolvers walk
//! that plan through a ladder of nested scopes.
//!
//! ## Features
//!
//! - **Structural keys**: plain types, applied generics (`Repo<User>`),
//!   tag-qualified registrations (`Cache[redis]`)
//! - **Open-generic templates**: `Repo<?T>` serves every `Repo<X>` through
//!   unification, with optional bounds and a configurable tie-break
//! - **Scope ladder**: runtime → app → session → request → action → step,
//!   skippable levels created implicitly on descent
//! - **Planned graph**: cycles, scope violations and missing keys are found
//!   before anything is built (at compile time in strict mode)
//! - **Ordered teardown**: generators and managed resources release in strict
//!   reverse acquisition order when their owning scope exits
//! - **Decorators**: chains wrapping a binding, most recent outermost
//! - **Deferred edges** and **resolve-all edges**
//! - **Sync and async** resolution paths
//!
//! ## Development Tools (dev-tools feature)
//!
//! - **Visualization**: render a compiled plan as Graphviz DOT or Mermaid
//!
//! ## Example
//!
//! ```rust
//! use trellis_di::{Acquired, ContextMap, DependencyEdge, DependencyKey, ProviderRegistry, ProviderSpec};
//!
//! struct Pool { url: String }
//! struct Session { pool: std::sync::Arc<Pool> }
//!
//! let mut registry = ProviderRegistry::new();
//! registry.add(
//! 	ProviderSpec::builder(DependencyKey::of::<Pool>())
//! 		.factory(|_| Ok(Pool { url: "postgres://localhost".into() }))
//! 		.singleton()
//! 		.build()?,
//! )?;
//! registry.add(
//! 	ProviderSpec::builder(DependencyKey::of::<Session>())
//! 		.generator(|args| {
//! 			let pool = args.positional::<Pool>(0)?;
//! 			Ok(Acquired::new(Session { pool }, || Ok(())))
//! 		})
//! 		.edge(DependencyEdge::positional(DependencyKey::of::<Pool>()))
//! 		.scoped("request")
//! 		.build()?,
//! )?;
//!
//! let factory = registry.compile()?;
//! let root = factory.root()?;
//! let url = root.with_scope(Some("request"), ContextMap::new(), |request| {
//! 	let session = request.get::<Session>()?;
//! 	Ok(session.pool.url.clone())
//! })?;
//! assert_eq!(url, "postgres://localhost");
//! root.close()?;
//! # Ok::<(), trellis_di::DiError>(())
//! ```

pub mod args;
mod cleanup;
pub mod cycle_detection;
pub mod decoration;
pub mod deferred;
pub mod error;
pub mod generic;
pub mod key;
pub mod planner;
pub mod provider;
pub mod registry;
pub mod resolver;
pub mod scope;
pub mod settings;
mod synthesizer;

// Development tools
#[cfg(feature = "dev-tools")]
pub mod visualization;

pub use args::{ArgValue, ResolvedArgs};
pub use cycle_detection::{MAX_RESOLUTION_DEPTH, with_cycle_detection_scope};
pub use decoration::DecoratorRule;
pub use deferred::DeferredHandle;
pub use error::{BoxError, DiError, DiResult};
pub use generic::{Substitution, TieBreak};
pub use key::{DependencyKey, TypeExpr, TypeToken};
pub use planner::{
	ArgTarget, CacheOwner, EdgeSource, LockStrategy, ProviderWorkflow, ResolutionPlan, WiredEdge,
};
pub use provider::{
	Acquired, ArgShape, DependencyEdge, EdgeMode, Instance, Lifetime, ProviderBody, ProviderFuture,
	ProviderKind, ProviderSpec, ProviderSpecBuilder, Release, Slot, TypeBound, TypeParam,
	TypePredicate,
};
pub use registry::ProviderRegistry;
pub use resolver::{ContextMap, Resolver, ResolverFactory};
pub use scope::{ScopeLadder, ScopeLevel, ScopeName, StandardScope};
pub use settings::{ResolverSettings, ScopeLevelConfig, ValidationSettings};

/// Commonly used items.
pub mod prelude {
	pub use crate::{
		Acquired, ContextMap, DecoratorRule, DeferredHandle, DependencyEdge, DependencyKey, DiError,
		DiResult, Instance, Lifetime, ProviderRegistry, ProviderSpec, ResolvedArgs, Resolver,
		ResolverFactory, ResolverSettings, StandardScope, TypeBound, TypeExpr, TypeToken,
	};
}
