//! # Trellis
//!
//! Compiled dependency injection for Rust services.
//!
//! Providers are registered against structural keys, compiled into a plan
//! that is checked for cycles and scope violations, and resolved through a
//! ladder of nested scopes whose resources are torn down in strict reverse
//! acquisition order.
//!
//! ## Feature Flags
//!
//! - `di` (default) - The dependency injection runtime
//! - `dev-tools` - Plan rendering as Graphviz DOT or Mermaid
//! - `full` - All features enabled
//!
//! ## Example
//!
//! ```rust
//! # #[cfg(feature = "di")]
//! # fn main() -> Result<(), trellis::di::DiError> {
//! use trellis::di::prelude::*;
//!
//! struct Greeting(String);
//!
//! let mut registry = ProviderRegistry::new();
//! registry.add(
//! 	ProviderSpec::builder(DependencyKey::of::<Greeting>())
//! 		.factory(|_| Ok(Greeting("hello".into())))
//! 		.singleton()
//! 		.build()?,
//! )?;
//!
//! let root = registry.compile()?.root()?;
//! assert_eq!(root.get::<Greeting>()?.0, "hello");
//! root.close()?;
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "di"))]
//! # fn main() {}
//! ```

#[cfg(feature = "di")]
pub mod di;

#[cfg(feature = "di")]
pub use di::{
	DependencyKey, DiError, DiResult, ProviderRegistry, ProviderSpec, Resolver, ResolverFactory,
	ResolverSettings,
};
