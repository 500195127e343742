//! Concurrency tests: single construction of cached values under contention

use rstest::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use trellis_di::{ContextMap, DependencyKey, DiError, ProviderRegistry, ProviderSpec, Resolver};

struct Pool {
	generation: usize,
}

#[rstest]
fn test_threads_share_one_singleton() {
	// Arrange
	let built = Arc::new(AtomicUsize::new(0));
	let counter = built.clone();
	let mut registry = ProviderRegistry::new();
	registry
		.add(
			ProviderSpec::builder(DependencyKey::of::<Pool>())
				.factory(move |_| {
					std::thread::sleep(Duration::from_millis(20));
					Ok(Pool {
						generation: counter.fetch_add(1, Ordering::SeqCst),
					})
				})
				.singleton()
				.build()
				.unwrap(),
		)
		.unwrap();
	let root = registry.compile().unwrap().root().unwrap();

	// Act
	let pools: Vec<Arc<Pool>> = std::thread::scope(|s| {
		let handles: Vec<_> = (0..8).map(|_| s.spawn(|| root.get::<Pool>().unwrap())).collect();
		handles.into_iter().map(|h| h.join().unwrap()).collect()
	});

	// Assert
	assert_eq!(built.load(Ordering::SeqCst), 1);
	assert!(pools.iter().all(|p| Arc::ptr_eq(p, &pools[0])));
	assert_eq!(pools[0].generation, 0);
	root.close().unwrap();
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tasks_share_one_async_singleton() {
	// Arrange
	let built = Arc::new(AtomicUsize::new(0));
	let counter = built.clone();
	let mut registry = ProviderRegistry::new();
	registry
		.add(
			ProviderSpec::builder(DependencyKey::of::<Pool>())
				.factory_async(move |_| {
					let counter = counter.clone();
					async move {
						tokio::time::sleep(Duration::from_millis(20)).await;
						Ok::<_, DiError>(Pool {
							generation: counter.fetch_add(1, Ordering::SeqCst),
						})
					}
				})
				.singleton()
				.build()
				.unwrap(),
		)
		.unwrap();
	let root: Arc<Resolver> = Arc::new(registry.compile().unwrap().root().unwrap());

	// Act
	let tasks: Vec<_> = (0..8)
		.map(|_| {
			let root = root.clone();
			tokio::spawn(async move { root.get_async::<Pool>().await })
		})
		.collect();
	let mut pools = Vec::new();
	for task in tasks {
		pools.push(task.await.unwrap().unwrap());
	}

	// Assert
	assert_eq!(built.load(Ordering::SeqCst), 1);
	assert!(pools.iter().all(|p| Arc::ptr_eq(p, &pools[0])));
	root.close_async().await.unwrap();
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_request_scopes_are_isolated() {
	// Arrange
	let built = Arc::new(AtomicUsize::new(0));
	let counter = built.clone();
	let mut registry = ProviderRegistry::new();
	registry
		.add(
			ProviderSpec::builder(DependencyKey::of::<Pool>())
				.factory(move |_| {
					Ok(Pool {
						generation: counter.fetch_add(1, Ordering::SeqCst),
					})
				})
				.scoped("request")
				.build()
				.unwrap(),
		)
		.unwrap();
	let root = Arc::new(registry.compile().unwrap().root().unwrap());

	// Act
	let tasks: Vec<_> = (0..6)
		.map(|_| {
			let root = root.clone();
			tokio::spawn(async move {
				let request = root.enter_scope(Some("request"), ContextMap::new())?;
				let first = request.get_async::<Pool>().await?;
				let second = request.get_async::<Pool>().await?;
				request.close_async().await?;
				Ok::<_, DiError>((first.generation, Arc::ptr_eq(&first, &second)))
			})
		})
		.collect();
	let mut generations = Vec::new();
	for task in tasks {
		let (generation, shared) = task.await.unwrap().unwrap();
		assert!(shared);
		generations.push(generation);
	}

	// Assert
	generations.sort_unstable();
	assert_eq!(generations, (0..6).collect::<Vec<_>>());
	assert_eq!(built.load(Ordering::SeqCst), 6);
	root.close_async().await.unwrap();
}

#[rstest]
fn test_unlocked_provider_still_caches_first_value() {
	// Arrange
	let mut registry = ProviderRegistry::new();
	registry
		.add(
			ProviderSpec::builder(DependencyKey::of::<Pool>())
				.factory(|_| Ok(Pool { generation: 0 }))
				.concurrency_safe(false)
				.build()
				.unwrap(),
		)
		.unwrap();
	let factory = registry.compile().unwrap();
	let root = factory.root().unwrap();

	// Act
	let pools: Vec<Arc<Pool>> = std::thread::scope(|s| {
		let handles: Vec<_> = (0..4).map(|_| s.spawn(|| root.get::<Pool>().unwrap())).collect();
		handles.into_iter().map(|h| h.join().unwrap()).collect()
	});

	// Assert
	assert!(pools.iter().all(|p| Arc::ptr_eq(p, &root.get::<Pool>().unwrap())));
	let workflow = factory.plan().get(&DependencyKey::of::<Pool>()).cloned().unwrap();
	assert_eq!(workflow.lock(), trellis_di::LockStrategy::None);
	root.close().unwrap();
}
