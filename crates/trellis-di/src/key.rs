//! Dependency identities
//!
//! A [`DependencyKey`] is the structural key used to register and request
//! values. Parameterized identities carry an explicit type witness
//! ([`TypeExpr`]): a base token plus positional argument expressions. Witnesses
//! that still contain type variables are *open* and only appear as template
//! registrations.

use crate::generic::Substitution;
use std::fmt;
use std::sync::Arc;

/// Name of a base type.
///
/// Two tokens are equal when their names are equal.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeToken(Arc<str>);

impl TypeToken {
	/// Token named after the Rust type `T`.
	///
	/// # Examples
	///
	/// ```
	/// use trellis_di::TypeToken;
	///
	/// struct Database;
	/// assert!(TypeToken::of::<Database>().name().ends_with("Database"));
	/// ```
	pub fn of<T: ?Sized + 'static>() -> Self {
		Self(Arc::from(std::any::type_name::<T>()))
	}

	/// Token with an explicit name.
	pub fn named(name: impl AsRef<str>) -> Self {
		Self(Arc::from(name.as_ref()))
	}

	pub fn name(&self) -> &str {
		&self.0
	}
}

impl fmt::Debug for TypeToken {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl fmt::Display for TypeToken {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Type witness: a base token applied to positional arguments, or a type
/// variable bound by a template.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TypeExpr {
	/// `base<args...>`; `args` is empty for plain types.
	Apply {
		/// Base type.
		base: TypeToken,
		/// Positional type arguments.
		args: Vec<TypeExpr>,
	},
	/// Unbound type parameter.
	Var(Arc<str>),
}

impl TypeExpr {
	pub fn of<T: ?Sized + 'static>() -> Self {
		Self::plain(TypeToken::of::<T>())
	}

	pub fn plain(base: TypeToken) -> Self {
		TypeExpr::Apply {
			base,
			args: Vec::new(),
		}
	}

	/// `base<args...>`.
	///
	/// # Examples
	///
	/// ```
	/// use trellis_di::{TypeExpr, TypeToken};
	///
	/// let repo = TypeExpr::apply(TypeToken::named("Repo"), [TypeExpr::var("T")]);
	/// assert!(repo.is_open());
	/// assert_eq!(repo.to_string(), "Repo<?T>");
	/// ```
	pub fn apply(base: TypeToken, args: impl IntoIterator<Item = TypeExpr>) -> Self {
		TypeExpr::Apply {
			base,
			args: args.into_iter().collect(),
		}
	}

	pub fn var(name: impl AsRef<str>) -> Self {
		TypeExpr::Var(Arc::from(name.as_ref()))
	}

	/// Base token, `None` for a bare variable.
	pub fn base(&self) -> Option<&TypeToken> {
		match self {
			TypeExpr::Apply { base, .. } => Some(base),
			TypeExpr::Var(_) => None,
		}
	}

	pub fn args(&self) -> &[TypeExpr] {
		match self {
			TypeExpr::Apply { args, .. } => args,
			TypeExpr::Var(_) => &[],
		}
	}

	/// Whether any type variable occurs in the expression.
	pub fn is_open(&self) -> bool {
		match self {
			TypeExpr::Var(_) => true,
			TypeExpr::Apply { args, .. } => args.iter().any(TypeExpr::is_open),
		}
	}

	/// Type variables in order of first occurrence.
	pub fn variables(&self) -> Vec<Arc<str>> {
		let mut out = Vec::new();
		self.collect_variables(&mut out);
		out
	}

	fn collect_variables(&self, out: &mut Vec<Arc<str>>) {
		match self {
			TypeExpr::Var(name) => {
				if !out.contains(name) {
					out.push(name.clone());
				}
			}
			TypeExpr::Apply { args, .. } => {
				for arg in args {
					arg.collect_variables(out);
				}
			}
		}
	}

	/// Number of concrete type nodes; used as template specificity.
	pub fn concrete_nodes(&self) -> usize {
		match self {
			TypeExpr::Var(_) => 0,
			TypeExpr::Apply { args, .. } => 1 + args.iter().map(TypeExpr::concrete_nodes).sum::<usize>(),
		}
	}

	/// Replaces bound variables; unbound ones are kept.
	pub fn substitute(&self, subst: &Substitution) -> TypeExpr {
		match self {
			TypeExpr::Var(name) => subst.get(name).cloned().unwrap_or_else(|| self.clone()),
			TypeExpr::Apply { base, args } => TypeExpr::Apply {
				base: base.clone(),
				args: args.iter().map(|a| a.substitute(subst)).collect(),
			},
		}
	}
}

impl fmt::Debug for TypeExpr {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Display::fmt(self, f)
	}
}

impl fmt::Display for TypeExpr {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			TypeExpr::Var(name) => write!(f, "?{}", name),
			TypeExpr::Apply { base, args } => {
				write!(f, "{}", base)?;
				if !args.is_empty() {
					f.write_str("<")?;
					for (i, arg) in args.iter().enumerate() {
						if i > 0 {
							f.write_str(", ")?;
						}
						write!(f, "{}", arg)?;
					}
					f.write_str(">")?;
				}
				Ok(())
			}
		}
	}
}

/// Identity under which a provider is registered and requested.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DependencyKey {
	/// Plain type.
	Plain(TypeToken),
	/// Parameterized type (possibly open when registered as a template).
	Generic(TypeExpr),
	/// Tag-qualified variant of a base key.
	Tagged {
		/// Unqualified key.
		base: Box<DependencyKey>,
		/// Qualifier.
		tag: Arc<str>,
	},
	/// Synthetic identity of one decoration layer; depth 0 is the decorated
	/// registration itself.
	Layer {
		/// Decorated key.
		base: Box<DependencyKey>,
		/// Layer index, innermost first.
		depth: u32,
	},
}

impl DependencyKey {
	/// Key for the Rust type `T`.
	///
	/// # Examples
	///
	/// ```
	/// use trellis_di::DependencyKey;
	///
	/// struct Config;
	/// assert_eq!(DependencyKey::of::<Config>(), DependencyKey::of::<Config>());
	/// ```
	pub fn of<T: ?Sized + 'static>() -> Self {
		DependencyKey::Plain(TypeToken::of::<T>())
	}

	pub fn named(name: impl AsRef<str>) -> Self {
		DependencyKey::Plain(TypeToken::named(name))
	}

	/// Key for a type witness. A witness without arguments is a plain key.
	pub fn generic(expr: TypeExpr) -> Self {
		match expr {
			TypeExpr::Apply { base, args } if args.is_empty() => DependencyKey::Plain(base),
			expr => DependencyKey::Generic(expr),
		}
	}

	/// Tag-qualified variant of this key; re-tagging replaces the tag.
	pub fn tagged(self, tag: impl AsRef<str>) -> Self {
		let base = match self {
			DependencyKey::Tagged { base, .. } => base,
			other => Box::new(other),
		};
		DependencyKey::Tagged {
			base,
			tag: Arc::from(tag.as_ref()),
		}
	}

	pub(crate) fn layer(&self, depth: u32) -> Self {
		DependencyKey::Layer {
			base: Box::new(self.clone()),
			depth,
		}
	}

	/// The key with any tag removed.
	pub fn untagged(&self) -> &DependencyKey {
		match self {
			DependencyKey::Tagged { base, .. } => base,
			other => other,
		}
	}

	pub fn tag(&self) -> Option<&str> {
		match self {
			DependencyKey::Tagged { tag, .. } => Some(tag),
			_ => None,
		}
	}

	/// Type witness of the (untagged) key.
	pub fn type_expr(&self) -> Option<TypeExpr> {
		match self {
			DependencyKey::Plain(token) => Some(TypeExpr::plain(token.clone())),
			DependencyKey::Generic(expr) => Some(expr.clone()),
			DependencyKey::Tagged { base, .. } => base.type_expr(),
			DependencyKey::Layer { .. } => None,
		}
	}

	/// Base token of the (untagged) key.
	pub fn base_token(&self) -> Option<&TypeToken> {
		match self {
			DependencyKey::Plain(token) => Some(token),
			DependencyKey::Generic(expr) => expr.base(),
			DependencyKey::Tagged { base, .. } | DependencyKey::Layer { base, .. } => {
				base.base_token()
			}
		}
	}

	pub fn is_open(&self) -> bool {
		match self {
			DependencyKey::Plain(_) => false,
			DependencyKey::Generic(expr) => expr.is_open(),
			DependencyKey::Tagged { base, .. } | DependencyKey::Layer { base, .. } => {
				base.is_open()
			}
		}
	}

	pub fn variables(&self) -> Vec<Arc<str>> {
		match self {
			DependencyKey::Plain(_) => Vec::new(),
			DependencyKey::Generic(expr) => expr.variables(),
			DependencyKey::Tagged { base, .. } | DependencyKey::Layer { base, .. } => {
				base.variables()
			}
		}
	}

	/// Substitutes bound type variables throughout the key.
	pub fn substitute(&self, subst: &Substitution) -> DependencyKey {
		if subst.is_empty() {
			return self.clone();
		}
		match self {
			DependencyKey::Plain(_) => self.clone(),
			DependencyKey::Generic(expr) => DependencyKey::generic(expr.substitute(subst)),
			DependencyKey::Tagged { base, tag } => DependencyKey::Tagged {
				base: Box::new(base.substitute(subst)),
				tag: tag.clone(),
			},
			DependencyKey::Layer { base, depth } => DependencyKey::Layer {
				base: Box::new(base.substitute(subst)),
				depth: *depth,
			},
		}
	}
}

impl From<TypeExpr> for DependencyKey {
	fn from(expr: TypeExpr) -> Self {
		DependencyKey::generic(expr)
	}
}

impl From<TypeToken> for DependencyKey {
	fn from(token: TypeToken) -> Self {
		DependencyKey::Plain(token)
	}
}

impl fmt::Debug for DependencyKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Display::fmt(self, f)
	}
}

impl fmt::Display for DependencyKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			DependencyKey::Plain(token) => write!(f, "{}", token),
			DependencyKey::Generic(expr) => write!(f, "{}", expr),
			DependencyKey::Tagged { base, tag } => write!(f, "{}[{}]", base, tag),
			DependencyKey::Layer { base, depth } => write!(f, "{}@layer{}", base, depth),
		}
	}
}
