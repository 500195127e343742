//! Property tests over randomly shaped provider graphs

use proptest::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use trellis_di::{
	DependencyEdge, DependencyKey, DiError, Lifetime, ProviderRegistry, ProviderSpec,
};

fn node_key(index: usize) -> DependencyKey {
	DependencyKey::named(format!("N{}", index))
}

/// For each node, which lower-indexed nodes it depends on, plus its lifetime.
fn dag_strategy() -> impl Strategy<Value = Vec<(Vec<bool>, bool)>> {
	(2usize..10).prop_flat_map(|size| {
		(0..size)
			.map(|index| (prop::collection::vec(any::<bool>(), index), any::<bool>()))
			.collect::<Vec<_>>()
	})
}

fn build_registry(
	shape: &[(Vec<bool>, bool)],
	counters: &Arc<Vec<AtomicUsize>>,
	back_edge: bool,
) -> ProviderRegistry {
	let mut registry = ProviderRegistry::new();
	for (index, (deps, singleton)) in shape.iter().enumerate() {
		let counters = counters.clone();
		let mut edges: Vec<DependencyEdge> = deps
			.iter()
			.enumerate()
			.filter(|(_, on)| **on)
			.map(|(dep, _)| DependencyEdge::positional(node_key(dep)))
			.collect();
		if back_edge && index == 0 {
			edges.push(DependencyEdge::positional(node_key(shape.len() - 1)));
		}
		let lifetime = if *singleton {
			Lifetime::Singleton
		} else {
			Lifetime::Transient
		};
		let spec = ProviderSpec::builder(node_key(index))
			.factory(move |_| {
				counters[index].fetch_add(1, Ordering::SeqCst);
				Ok(index)
			})
			.edges(edges)
			.lifetime(lifetime)
			.build()
			.unwrap();
		registry.add(spec).unwrap();
	}
	registry
}

proptest! {
	#[test]
	fn acyclic_graphs_compile_and_singletons_build_once(shape in dag_strategy()) {
		let counters: Arc<Vec<AtomicUsize>> =
			Arc::new((0..shape.len()).map(|_| AtomicUsize::new(0)).collect());
		let registry = build_registry(&shape, &counters, false);

		let factory = registry.compile().unwrap();
		let root = factory.root().unwrap();
		for index in 0..shape.len() {
			root.resolve(&node_key(index)).unwrap();
		}
		for index in 0..shape.len() {
			root.resolve(&node_key(index)).unwrap();
		}

		prop_assert_eq!(factory.plan().len(), shape.len());
		for (index, (_, singleton)) in shape.iter().enumerate() {
			let built = counters[index].load(Ordering::SeqCst);
			if *singleton {
				prop_assert_eq!(built, 1);
			} else {
				prop_assert!(built >= 2);
			}
		}
		root.close().unwrap();
	}

	#[test]
	fn back_edge_through_every_node_is_a_cycle(size in 2usize..10) {
		let shape: Vec<(Vec<bool>, bool)> = (0..size)
			.map(|index| ((0..index).map(|dep| dep + 1 == index).collect(), true))
			.collect();
		let counters: Arc<Vec<AtomicUsize>> =
			Arc::new((0..size).map(|_| AtomicUsize::new(0)).collect());
		let registry = build_registry(&shape, &counters, true);

		let result = registry.compile();

		match result {
			Err(DiError::CircularDependencyDetected { path, .. }) => {
				prop_assert_eq!(path.split(" -> ").count(), size + 1);
			}
			other => prop_assert!(false, "expected a cycle, got {:?}", other.map(|_| ())),
		}
		prop_assert!(counters.iter().all(|c| c.load(Ordering::SeqCst) == 0));
	}
}
