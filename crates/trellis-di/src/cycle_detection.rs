//! Run-time re-entrance detection
//!
//! The planner rejects cycles over eager edges before anything is built. What
//! remains is re-entrant construction through deferred handles: a handle
//! invoked while its own target is still being constructed. This module
//! tracks the slots under construction so that case fails with
//! [`DiError::CircularDependencyDetected`] instead of recursing or
//! deadlocking on the slot's lock.
//!
//! ## Features
//!
//! - **Task-local on the async path**: state follows the task across worker
//!   threads; [`with_cycle_detection_scope`] installs it. Every async entry
//!   forks the chain it was called from, so sibling futures joined in one
//!   task never see each other's slots.
//! - **Thread-local otherwise**: the blocking path never suspends, so
//!   per-thread state is exact.
//! - **Depth limiting**: the configured maximum depth stops pathological
//!   chains.
//! - **RAII**: [`ResolutionGuard`] unregisters the slot on drop.
//!
//! Cache hits skip detection entirely.

use crate::error::DiError;
use crate::key::DependencyKey;
use crate::provider::Slot;
use std::cell::RefCell;
use std::collections::HashSet;
use std::future::Future;

/// Default maximum resolution depth.
pub const MAX_RESOLUTION_DEPTH: usize = 100;

/// Slots under construction in the current task or thread.
#[derive(Default, Clone)]
struct CycleDetectionState {
	resolution_set: HashSet<Slot>,
	/// Resolution path (for displaying circular paths)
	resolution_path: Vec<(Slot, DependencyKey)>,
}

tokio::task_local! {
	static TASK_STATE: RefCell<CycleDetectionState>;
}

thread_local! {
	static THREAD_STATE: RefCell<CycleDetectionState> = RefCell::new(CycleDetectionState::default());
}

/// Runs `f` with its own task-local detection state, seeded with a copy of
/// the enclosing chain when called from inside another resolution.
pub async fn with_cycle_detection_scope<F, T>(f: F) -> T
where
	F: Future<Output = T>,
{
	let inherited = TASK_STATE
		.try_with(|state| state.borrow().clone())
		.unwrap_or_default();
	TASK_STATE.scope(RefCell::new(inherited), f).await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Storage {
	Task,
	Thread,
}

fn active_storage() -> Storage {
	if TASK_STATE.try_with(|_| ()).is_ok() {
		Storage::Task
	} else {
		Storage::Thread
	}
}

fn with_storage<R>(storage: Storage, f: impl FnOnce(&RefCell<CycleDetectionState>) -> R) -> Option<R> {
	match storage {
		Storage::Task => TASK_STATE.try_with(f).ok(),
		Storage::Thread => THREAD_STATE.try_with(f).ok(),
	}
}

fn cycle_path(state: &CycleDetectionState, slot: Slot, key: &DependencyKey) -> String {
	let start = state
		.resolution_path
		.iter()
		.position(|(s, _)| *s == slot)
		.unwrap_or(0);
	let mut names: Vec<String> = state.resolution_path[start..]
		.iter()
		.map(|(_, k)| k.to_string())
		.collect();
	names.push(key.to_string());
	names.join(" -> ")
}

/// Records that `slot` is being constructed.
///
/// Fails when the slot is already under construction in this task (or
/// thread), or when the chain would exceed `max_depth`.
pub(crate) fn begin_resolution(
	slot: Slot,
	key: &DependencyKey,
	max_depth: usize,
) -> Result<ResolutionGuard, DiError> {
	let storage = active_storage();
	let outcome = with_storage(storage, |state| {
		let mut s = state.borrow_mut();
		if s.resolution_set.contains(&slot) {
			return Err(DiError::CircularDependencyDetected {
				key: key.to_string(),
				slot,
				path: cycle_path(&s, slot, key),
			});
		}
		if s.resolution_path.len() >= max_depth {
			return Err(DiError::MaxDepthExceeded {
				key: key.to_string(),
				depth: max_depth,
			});
		}
		s.resolution_set.insert(slot);
		s.resolution_path.push((slot, key.clone()));
		Ok(())
	});
	// Thread-local storage is gone only while the thread is shutting down.
	outcome
		.unwrap_or(Ok(()))
		.map(|()| ResolutionGuard { slot, storage })
}

/// RAII guard: removes its slot from the detection state on drop.
#[derive(Debug)]
pub(crate) struct ResolutionGuard {
	slot: Slot,
	storage: Storage,
}

impl Drop for ResolutionGuard {
	fn drop(&mut self) {
		let slot = self.slot;
		let _ = with_storage(self.storage, |state| {
			let mut s = state.borrow_mut();
			s.resolution_set.remove(&slot);
			if let Some(pos) = s.resolution_path.iter().rposition(|(s, _)| *s == slot) {
				s.resolution_path.remove(pos);
			}
		});
	}
}
