//! Decorator tests: chain order, open-template targets and validation

use rstest::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use trellis_di::{
	DecoratorRule, DependencyEdge, DependencyKey, DiError, ProviderRegistry, ProviderSpec,
	ResolverSettings, TypeExpr, TypeToken, ValidationSettings,
};

struct Greeter(String);

fn greeter_key() -> DependencyKey {
	DependencyKey::of::<Greeter>()
}

fn base_greeter(text: &'static str) -> ProviderSpec {
	ProviderSpec::builder(greeter_key())
		.factory(move |_| Ok(Greeter(text.to_string())))
		.singleton()
		.build()
		.unwrap()
}

fn wrapping(key: DependencyKey, open: &'static str, close: &'static str) -> DecoratorRule {
	let spec = ProviderSpec::builder(key.clone())
		.factory(move |args| {
			let inner = args.positional::<Greeter>(0)?;
			Ok(Greeter(format!("{}{}{}", open, inner.0, close)))
		})
		.edge(DependencyEdge::positional(key))
		.build()
		.unwrap();
	DecoratorRule::new(spec).unwrap()
}

fn repo_key(arg: TypeExpr) -> DependencyKey {
	DependencyKey::generic(TypeExpr::apply(TypeToken::named("Repo"), [arg]))
}

#[rstest]
fn test_latest_decorator_is_outermost() {
	// Arrange
	let mut registry = ProviderRegistry::new();
	registry.add(base_greeter("hello")).unwrap();
	registry.decorate(wrapping(greeter_key(), "[", "]")).unwrap();
	registry.decorate(wrapping(greeter_key(), "<", ">")).unwrap();
	let root = registry.compile().unwrap().root().unwrap();

	// Act
	let greeter = root.get::<Greeter>().unwrap();

	// Assert
	assert_eq!(greeter.0, "<[hello]>");
	root.close().unwrap();
}

#[rstest]
fn test_decorated_singleton_is_built_once() {
	// Arrange
	let built = Arc::new(AtomicUsize::new(0));
	let counter = built.clone();
	let mut registry = ProviderRegistry::new();
	registry.add(base_greeter("hi")).unwrap();
	let spec = ProviderSpec::builder(greeter_key())
		.factory(move |args| {
			counter.fetch_add(1, Ordering::SeqCst);
			Ok(Greeter(format!("{}!", args.positional::<Greeter>(0)?.0)))
		})
		.edge(DependencyEdge::positional(greeter_key()))
		.build()
		.unwrap();
	registry.decorate(DecoratorRule::new(spec).unwrap()).unwrap();
	let root = registry.compile().unwrap().root().unwrap();

	// Act
	let first = root.get::<Greeter>().unwrap();
	let second = root.get::<Greeter>().unwrap();

	// Assert
	assert!(Arc::ptr_eq(&first, &second));
	assert_eq!(built.load(Ordering::SeqCst), 1);
	root.close().unwrap();
}

#[rstest]
fn test_transient_decorator_over_singleton_base() {
	// Arrange
	let base_built = Arc::new(AtomicUsize::new(0));
	let wraps = Arc::new(AtomicUsize::new(0));
	let (base_counter, wrap_counter) = (base_built.clone(), wraps.clone());
	let mut registry = ProviderRegistry::new();
	registry
		.add(
			ProviderSpec::builder(greeter_key())
				.factory(move |_| {
					base_counter.fetch_add(1, Ordering::SeqCst);
					Ok(Greeter("base".to_string()))
				})
				.singleton()
				.build()
				.unwrap(),
		)
		.unwrap();
	let spec = ProviderSpec::builder(greeter_key())
		.factory(move |args| {
			let round = wrap_counter.fetch_add(1, Ordering::SeqCst);
			Ok(Greeter(format!("{}#{}", args.positional::<Greeter>(0)?.0, round)))
		})
		.edge(DependencyEdge::positional(greeter_key()))
		.transient()
		.build()
		.unwrap();
	registry.decorate(DecoratorRule::new(spec).unwrap()).unwrap();
	let root = registry.compile().unwrap().root().unwrap();

	// Act
	let first = root.get::<Greeter>().unwrap();
	let second = root.get::<Greeter>().unwrap();

	// Assert
	assert!(!Arc::ptr_eq(&first, &second));
	assert_eq!(first.0, "base#0");
	assert_eq!(second.0, "base#1");
	assert_eq!(base_built.load(Ordering::SeqCst), 1);
	assert_eq!(wraps.load(Ordering::SeqCst), 2);
	root.close().unwrap();
}

#[rstest]
fn test_reregistration_keeps_decorators() {
	// Arrange
	let mut registry = ProviderRegistry::new();
	registry.add(base_greeter("old")).unwrap();
	registry.decorate(wrapping(greeter_key(), "(", ")")).unwrap();
	let before = registry.compile().unwrap().root().unwrap();

	// Act
	registry.add(base_greeter("new")).unwrap();
	let after = registry.compile().unwrap().root().unwrap();

	// Assert
	assert_eq!(before.get::<Greeter>().unwrap().0, "(old)");
	assert_eq!(after.get::<Greeter>().unwrap().0, "(new)");
	before.close().unwrap();
	after.close().unwrap();
}

#[rstest]
fn test_open_decorator_wraps_every_specialization() {
	// Arrange
	let mut registry = ProviderRegistry::new();
	registry
		.add(
			ProviderSpec::builder(repo_key(TypeExpr::var("T")))
				.factory(|args| {
					let t = args.type_argument("T").map(ToString::to_string).unwrap_or_default();
					Ok(Greeter(t))
				})
				.build()
				.unwrap(),
		)
		.unwrap();
	registry
		.decorate(wrapping(repo_key(TypeExpr::var("T")), "cached ", ""))
		.unwrap();
	let root = registry.compile().unwrap().root().unwrap();
	let plain = |name: &str| TypeExpr::plain(TypeToken::named(name));

	// Act
	let users = root.resolve(&repo_key(plain("User"))).unwrap();
	let orders = root.resolve(&repo_key(plain("Order"))).unwrap();

	// Assert
	assert_eq!(users.downcast::<Greeter>().unwrap().0, "cached User");
	assert_eq!(orders.downcast::<Greeter>().unwrap().0, "cached Order");
	root.close().unwrap();
}

#[rstest]
fn test_decorator_without_target_fails_compile() {
	// Arrange
	let mut registry = ProviderRegistry::new();
	registry.decorate(wrapping(greeter_key(), "[", "]")).unwrap();

	// Act
	let result = registry.compile();

	// Assert
	assert!(matches!(result, Err(DiError::InvalidProviderSpec { .. })));
}

#[rstest]
fn test_decorator_without_target_allowed_when_relaxed() {
	// Arrange
	let settings = ResolverSettings {
		validation: ValidationSettings {
			nothing_decorated: false,
			..Default::default()
		},
		..Default::default()
	};
	let mut registry = ProviderRegistry::with_settings(settings);
	registry.decorate(wrapping(greeter_key(), "[", "]")).unwrap();

	// Act
	let result = registry.compile();

	// Assert
	assert!(result.is_ok());
}

#[rstest]
fn test_decorator_needs_inner_edge() {
	let spec = ProviderSpec::builder(greeter_key())
		.factory(|_| Ok(Greeter(String::new())))
		.build()
		.unwrap();

	let result = DecoratorRule::new(spec);

	assert!(matches!(result, Err(DiError::InvalidProviderSpec { .. })));
}
