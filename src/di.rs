//! Dependency injection module.
//!
//! Re-exports the `trellis-di` runtime: registry, planner, resolvers and
//! scope handling.
//!
//! # Examples
//!
//! ```rust,no_run
//! # #[cfg(feature = "di")]
//! use trellis::di::{ContextMap, ProviderRegistry, StandardScope};
//! ```

pub use trellis_di::*;
