//! Dependency resolution error types.
//!
//! Every variant names the offending dependency key. Wiring errors are
//! programmer errors: they are returned to the immediate caller of
//! `compile`/`resolve` and never retried or swallowed.

use crate::provider::Slot;
use thiserror::Error;

/// Boxed error produced by a provider body or a teardown callback.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for dependency resolution.
pub type DiResult<T> = Result<T, DiError>;

/// Dependency injection errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DiError {
	/// No provider (concrete or template) is registered for the key.
	#[error("dependency not registered: {key}")]
	DependencyNotRegistered {
		/// Requested key.
		key: String,
	},

	/// Invalid scope transition, or a provider requested outside its scope.
	#[error("scope mismatch for {key}: {message}")]
	ScopeMismatch {
		/// Key (or scope name) involved.
		key: String,
		/// What went wrong.
		message: String,
	},

	/// A dependency cycle without a deferred handle on any edge.
	#[error(
		"circular dependency detected at slot {slot} ({key})\n  Path: {path}\nThis forms a cycle that cannot be resolved; defer one edge to break it."
	)]
	CircularDependencyDetected {
		/// Key revisited while still in progress.
		key: String,
		/// Slot of the revisited provider.
		slot: Slot,
		/// Cycle path (format: A -> B -> A).
		path: String,
	},

	/// The chain of nested constructions exceeded the configured depth.
	#[error(
		"maximum resolution depth {depth} exceeded at {key}\nThis likely indicates an extremely deep or circular dependency chain."
	)]
	MaxDepthExceeded {
		/// Key whose construction would exceed the limit.
		key: String,
		/// Configured limit.
		depth: usize,
	},

	/// An async-requiring provider was resolved through the blocking path.
	#[error("{key} requires asynchronous resolution; use resolve_async")]
	AsyncRequiredInSyncContext {
		/// Key whose chain requires async.
		key: String,
	},

	/// Template argument violates a bound, or template matches are ambiguous.
	#[error("invalid generic argument for {key}: {message}")]
	InvalidGenericArgument {
		/// Requested key.
		key: String,
		/// Violated bound or ambiguity description.
		message: String,
	},

	/// Malformed registration or disallowed wiring.
	#[error("invalid provider spec for {key}: {message}")]
	InvalidProviderSpec {
		/// Registered key.
		key: String,
		/// What is malformed.
		message: String,
	},

	/// A provider body returned an error.
	#[error("provider for {key} failed: {source}")]
	Provider {
		/// Key being constructed (empty until the synthesizer attaches it).
		key: String,
		/// Underlying failure.
		#[source]
		source: BoxError,
	},

	/// A teardown callback failed.
	#[error("cleanup of {key} failed: {message}")]
	Cleanup {
		/// Key whose teardown failed.
		key: String,
		/// Failure description.
		message: String,
	},

	/// The primary error, with secondary errors raised while tearing down.
	#[error("{primary} ({} suppressed error(s))", suppressed.len())]
	Suppressed {
		/// Error that wins.
		primary: Box<DiError>,
		/// Errors raised by later cleanups.
		suppressed: Vec<DiError>,
	},

	/// Settings could not be parsed or are inconsistent.
	#[error("invalid settings: {0}")]
	Settings(String),
}

impl DiError {
	/// Wraps an arbitrary error raised inside a provider body.
	///
	/// The key is attached by the resolver when the error propagates out of
	/// the provider's build routine.
	pub fn provider(source: impl Into<BoxError>) -> Self {
		DiError::Provider {
			key: String::new(),
			source: source.into(),
		}
	}

	/// Wraps an error raised inside a teardown callback.
	pub fn cleanup(message: impl Into<String>) -> Self {
		DiError::Cleanup {
			key: String::new(),
			message: message.into(),
		}
	}

	pub(crate) fn not_registered(key: impl ToString) -> Self {
		DiError::DependencyNotRegistered {
			key: key.to_string(),
		}
	}

	pub(crate) fn invalid_spec(key: impl ToString, message: impl Into<String>) -> Self {
		DiError::InvalidProviderSpec {
			key: key.to_string(),
			message: message.into(),
		}
	}

	pub(crate) fn scope_mismatch(key: impl ToString, message: impl Into<String>) -> Self {
		DiError::ScopeMismatch {
			key: key.to_string(),
			message: message.into(),
		}
	}

	pub(crate) fn async_required(key: impl ToString) -> Self {
		DiError::AsyncRequiredInSyncContext {
			key: key.to_string(),
		}
	}

	pub(crate) fn invalid_generic(key: impl ToString, message: impl Into<String>) -> Self {
		DiError::InvalidGenericArgument {
			key: key.to_string(),
			message: message.into(),
		}
	}

	/// Fills in the key of provider and cleanup errors raised without one.
	pub(crate) fn for_key(self, key: impl ToString) -> Self {
		match self {
			DiError::Provider { key: k, source } if k.is_empty() => DiError::Provider {
				key: key.to_string(),
				source,
			},
			DiError::Cleanup { key: k, message } if k.is_empty() => DiError::Cleanup {
				key: key.to_string(),
				message,
			},
			other => other,
		}
	}

	/// Errors attached as secondary to this one, if any.
	pub fn suppressed(&self) -> &[DiError] {
		match self {
			DiError::Suppressed { suppressed, .. } => suppressed,
			_ => &[],
		}
	}

	/// The winning error, looking through [`DiError::Suppressed`].
	pub fn primary(&self) -> &DiError {
		match self {
			DiError::Suppressed { primary, .. } => primary.primary(),
			other => other,
		}
	}

	/// Attaches secondary errors; returns `self` unchanged when there are none.
	pub(crate) fn with_suppressed(self, mut suppressed: Vec<DiError>) -> Self {
		if suppressed.is_empty() {
			return self;
		}
		match self {
			DiError::Suppressed {
				primary,
				suppressed: mut existing,
			} => {
				existing.append(&mut suppressed);
				DiError::Suppressed {
					primary,
					suppressed: existing,
				}
			}
			primary => DiError::Suppressed {
				primary: Box::new(primary),
				suppressed,
			},
		}
	}
}
