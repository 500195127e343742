//! Per-scope teardown stacks
//!
//! Every cleanup-needing instance pushes its release onto the stack of the
//! scope instance that owns it, immediately after construction. Stacks unwind
//! in strict reverse acquisition order. Teardown errors never stop the unwind;
//! they are collected and reported together.

use crate::error::{DiError, DiResult};
use crate::key::DependencyKey;
use crate::provider::{ProviderKind, Release};
use parking_lot::Mutex;

pub(crate) struct CleanupEntry {
	pub(crate) kind: ProviderKind,
	pub(crate) key: DependencyKey,
	pub(crate) release: Release,
}

impl CleanupEntry {
	fn run_sync(self) -> Option<DiError> {
		let result = match self.release {
			Release::Sync(release) => release(),
			Release::Async(_) => Err(DiError::async_required(&self.key)),
			Release::None => Ok(()),
		};
		result.err().map(|err| report(err, &self.key, self.kind))
	}

	async fn run_async(self) -> Option<DiError> {
		let result = match self.release {
			Release::Sync(release) => release(),
			Release::Async(release) => release().await,
			Release::None => Ok(()),
		};
		result.err().map(|err| report(err, &self.key, self.kind))
	}
}

#[derive(Default)]
struct Entries {
	stack: Vec<CleanupEntry>,
	sealed: bool,
}

#[derive(Default)]
pub(crate) struct CleanupStack {
	entries: Mutex<Entries>,
}

impl CleanupStack {
	pub(crate) fn new() -> Self {
		Self::default()
	}

	/// Records a release, or hands it back once the stack has started
	/// unwinding so the caller can run it on the spot.
	pub(crate) fn push(&self, entry: CleanupEntry) -> Option<CleanupEntry> {
		if matches!(entry.release, Release::None) {
			return None;
		}
		let mut entries = self.entries.lock();
		if entries.sealed {
			return Some(entry);
		}
		entries.stack.push(entry);
		None
	}

	#[cfg(test)]
	pub(crate) fn len(&self) -> usize {
		self.entries.lock().stack.len()
	}

	fn seal(&self) {
		self.entries.lock().sealed = true;
	}

	fn pop(&self) -> Option<CleanupEntry> {
		self.entries.lock().stack.pop()
	}

	/// Runs every release synchronously, newest first.
	///
	/// Releases that must be awaited cannot run here; each one is reported as
	/// [`DiError::AsyncRequiredInSyncContext`] and dropped.
	pub(crate) fn drain_sync(&self) -> Vec<DiError> {
		self.seal();
		let mut errors = Vec::new();
		while let Some(entry) = self.pop() {
			errors.extend(entry.run_sync());
		}
		errors
	}

	/// Runs every release, newest first, awaiting asynchronous ones.
	pub(crate) async fn drain_async(&self) -> Vec<DiError> {
		self.seal();
		let mut errors = Vec::new();
		while let Some(entry) = self.pop() {
			errors.extend(entry.run_async().await);
		}
		errors
	}
}

/// Runs a release that arrived after its stack was sealed.
pub(crate) fn release_late_sync(entry: CleanupEntry) -> Vec<DiError> {
	tracing::debug!(key = %entry.key, "owner closed during construction; releasing now");
	entry.run_sync().into_iter().collect()
}

pub(crate) async fn release_late_async(entry: CleanupEntry) -> Vec<DiError> {
	tracing::debug!(key = %entry.key, "owner closed during construction; releasing now");
	entry.run_async().await.into_iter().collect()
}

fn report(err: DiError, key: &DependencyKey, kind: ProviderKind) -> DiError {
	let err = match err {
		DiError::Provider { key: k, source } if k.is_empty() => DiError::Cleanup {
			key: key.to_string(),
			message: source.to_string(),
		},
		other => other.for_key(key),
	};
	tracing::warn!(key = %key, kind = kind.as_str(), error = %err, "cleanup failed");
	err
}

/// Combines an outcome with the errors raised while tearing down.
///
/// The outcome's error wins and teardown errors are attached as suppressed;
/// with a successful outcome the first teardown error surfaces instead.
pub(crate) fn settle<T>(outcome: DiResult<T>, mut errors: Vec<DiError>) -> DiResult<T> {
	match outcome {
		Err(err) => Err(err.with_suppressed(errors)),
		Ok(value) if errors.is_empty() => Ok(value),
		Ok(_) => {
			let first = errors.remove(0);
			Err(first.with_suppressed(errors))
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use futures::future::BoxFuture;
	use rstest::rstest;
	use std::sync::Arc;

	fn entry(name: &str, release: Release) -> CleanupEntry {
		CleanupEntry {
			kind: ProviderKind::Generator,
			key: DependencyKey::named(name),
			release,
		}
	}

	fn logging(log: &Arc<Mutex<Vec<String>>>, name: &str) -> Release {
		let log = log.clone();
		let name = name.to_string();
		Release::Sync(Box::new(move || -> DiResult<()> {
			log.lock().push(name);
			Ok(())
		}))
	}

	#[rstest]
	fn test_drain_sync_runs_in_reverse_order() {
		// Arrange
		let log = Arc::new(Mutex::new(Vec::new()));
		let stack = CleanupStack::new();
		stack.push(entry("a", logging(&log, "a")));
		stack.push(entry("b", logging(&log, "b")));
		stack.push(entry("c", logging(&log, "c")));

		// Act
		let errors = stack.drain_sync();

		// Assert
		assert!(errors.is_empty());
		assert_eq!(*log.lock(), vec!["c", "b", "a"]);
		assert_eq!(stack.len(), 0);
	}

	#[rstest]
	fn test_drain_sync_continues_after_failure() {
		// Arrange
		let log = Arc::new(Mutex::new(Vec::new()));
		let stack = CleanupStack::new();
		stack.push(entry("a", logging(&log, "a")));
		stack.push(entry(
			"broken",
			Release::Sync(Box::new(|| -> DiResult<()> { Err(DiError::cleanup("disk gone")) })),
		));
		stack.push(entry(
			"pending",
			Release::Async(Box::new(|| -> BoxFuture<'static, DiResult<()>> {
				Box::pin(async { Ok::<(), DiError>(()) })
			})),
		));

		// Act
		let errors = stack.drain_sync();

		// Assert
		assert_eq!(errors.len(), 2);
		assert!(matches!(errors[0], DiError::AsyncRequiredInSyncContext { .. }));
		match &errors[1] {
			DiError::Cleanup { key, message } => {
				assert_eq!(key, "broken");
				assert_eq!(message, "disk gone");
			}
			other => panic!("Expected Cleanup, got {:?}", other),
		}
		assert_eq!(*log.lock(), vec!["a"]);
	}

	#[rstest]
	#[tokio::test]
	async fn test_drain_async_awaits_async_release() {
		// Arrange
		let log = Arc::new(Mutex::new(Vec::new()));
		let stack = CleanupStack::new();
		stack.push(entry("a", logging(&log, "a")));
		let async_log = log.clone();
		stack.push(entry(
			"b",
			Release::Async(Box::new(move || -> BoxFuture<'static, DiResult<()>> {
				Box::pin(async move {
					async_log.lock().push("b".to_string());
					Ok::<(), DiError>(())
				})
			})),
		));

		// Act
		let errors = stack.drain_async().await;

		// Assert
		assert!(errors.is_empty());
		assert_eq!(*log.lock(), vec!["b", "a"]);
	}

	#[rstest]
	fn test_settle_prefers_outcome_error() {
		let errors = vec![DiError::cleanup("x"), DiError::cleanup("y")];

		let result: DiResult<()> = settle(Err(DiError::not_registered("A")), errors);

		let err = result.unwrap_err();
		assert!(matches!(err.primary(), DiError::DependencyNotRegistered { .. }));
		assert_eq!(err.suppressed().len(), 2);
	}

	#[rstest]
	fn test_settle_surfaces_first_cleanup_error() {
		let errors = vec![DiError::cleanup("x"), DiError::cleanup("y")];

		let err = settle(Ok(()), errors).unwrap_err();

		assert!(matches!(err.primary(), DiError::Cleanup { message, .. } if message == "x"));
		assert_eq!(err.suppressed().len(), 1);
		assert!(settle(Ok(1), Vec::new()).is_ok());
	}

	#[rstest]
	fn test_push_after_drain_is_handed_back() {
		// Arrange
		let log = Arc::new(Mutex::new(Vec::new()));
		let stack = CleanupStack::new();
		stack.push(entry("early", logging(&log, "early")));
		stack.drain_sync();

		// Act
		let late = stack.push(entry("late", logging(&log, "late")));

		// Assert
		let late = late.expect("sealed stack hands the entry back");
		assert_eq!(stack.len(), 0);
		assert!(release_late_sync(late).is_empty());
		assert_eq!(*log.lock(), vec!["early", "late"]);
	}
}
