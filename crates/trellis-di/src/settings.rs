//! Resolver settings
//!
//! Settings are plain serde data with defaults for every field, loadable from
//! TOML and adjustable through `TRELLIS_*` environment variables.
//!
//! ```toml
//! strict = true
//! default-concurrency-safe = true
//! template-tie-break = "latest-registration"
//! max-resolution-depth = 100
//!
//! [validation]
//! implicit-override = true
//! nothing-decorated = true
//!
//! [[ladder]]
//! name = "app"
//!
//! [[ladder]]
//! name = "request"
//! ```

use crate::cycle_detection::MAX_RESOLUTION_DEPTH;
use crate::error::{DiError, DiResult};
use crate::generic::TieBreak;
use crate::scope::ScopeLadder;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One level of a custom scope ladder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ScopeLevelConfig {
	pub name: String,
	#[serde(default)]
	pub skippable: bool,
}

/// Registration-time checks that can be relaxed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ValidationSettings {
	/// Allow re-registering a key to replace the previous provider.
	pub implicit_override: bool,
	/// Fail compilation when a decorator matches no registration.
	pub nothing_decorated: bool,
}

impl Default for ValidationSettings {
	fn default() -> Self {
		Self {
			implicit_override: true,
			nothing_decorated: true,
		}
	}
}

/// Settings shared by a registry and every resolver compiled from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ResolverSettings {
	/// Plan every registration at compile time.
	pub strict: bool,
	/// Lock cached construction unless a provider opts out.
	pub default_concurrency_safe: bool,
	pub template_tie_break: TieBreak,
	pub max_resolution_depth: usize,
	/// Custom scope ladder; the standard ladder when absent.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub ladder: Option<Vec<ScopeLevelConfig>>,
	pub validation: ValidationSettings,
}

impl Default for ResolverSettings {
	fn default() -> Self {
		Self {
			strict: true,
			default_concurrency_safe: true,
			template_tie_break: TieBreak::LatestRegistration,
			max_resolution_depth: MAX_RESOLUTION_DEPTH,
			ladder: None,
			validation: ValidationSettings::default(),
		}
	}
}

impl ResolverSettings {
	/// Parses settings from TOML; missing fields take their defaults.
	///
	/// # Examples
	///
	/// ```
	/// use trellis_di::{ResolverSettings, TieBreak};
	///
	/// let settings = ResolverSettings::from_toml_str(r#"
	/// strict = false
	/// template-tie-break = "ambiguous"
	/// "#).unwrap();
	/// assert!(!settings.strict);
	/// assert_eq!(settings.template_tie_break, TieBreak::Ambiguous);
	/// assert!(settings.default_concurrency_safe);
	/// ```
	pub fn from_toml_str(source: &str) -> DiResult<Self> {
		let settings: Self = toml::from_str(source).map_err(|e| DiError::Settings(e.to_string()))?;
		settings.validate()?;
		Ok(settings)
	}

	pub fn from_toml_file(path: impl AsRef<Path>) -> DiResult<Self> {
		let path = path.as_ref();
		let source = std::fs::read_to_string(path)
			.map_err(|e| DiError::Settings(format!("{}: {}", path.display(), e)))?;
		Self::from_toml_str(&source)
	}

	pub fn to_toml_string(&self) -> DiResult<String> {
		toml::to_string(self).map_err(|e| DiError::Settings(e.to_string()))
	}

	/// Applies `TRELLIS_STRICT`, `TRELLIS_CONCURRENCY_SAFE`,
	/// `TRELLIS_TIE_BREAK` and `TRELLIS_MAX_DEPTH` from the process environment.
	pub fn with_env_overrides(self) -> DiResult<Self> {
		self.with_overrides_from(|name| std::env::var(name).ok())
	}

	/// Applies the `TRELLIS_*` overrides found through `lookup`.
	pub fn with_overrides_from(
		mut self,
		lookup: impl Fn(&str) -> Option<String>,
	) -> DiResult<Self> {
		if let Some(value) = lookup("TRELLIS_STRICT") {
			self.strict = parse_bool("TRELLIS_STRICT", &value)?;
		}
		if let Some(value) = lookup("TRELLIS_CONCURRENCY_SAFE") {
			self.default_concurrency_safe = parse_bool("TRELLIS_CONCURRENCY_SAFE", &value)?;
		}
		if let Some(value) = lookup("TRELLIS_TIE_BREAK") {
			self.template_tie_break = match value.trim() {
				"latest-registration" | "latest" => TieBreak::LatestRegistration,
				"ambiguous" => TieBreak::Ambiguous,
				other => {
					return Err(DiError::Settings(format!(
						"TRELLIS_TIE_BREAK: unknown policy {:?}",
						other
					)));
				}
			};
		}
		if let Some(value) = lookup("TRELLIS_MAX_DEPTH") {
			self.max_resolution_depth = value
				.trim()
				.parse()
				.map_err(|e| DiError::Settings(format!("TRELLIS_MAX_DEPTH: {}", e)))?;
		}
		self.validate()?;
		Ok(self)
	}

	fn validate(&self) -> DiResult<()> {
		if self.max_resolution_depth == 0 {
			return Err(DiError::Settings(
				"max-resolution-depth must be at least 1".to_string(),
			));
		}
		self.ladder().map(|_| ())
	}

	/// The configured scope ladder.
	pub fn ladder(&self) -> DiResult<ScopeLadder> {
		match &self.ladder {
			None => Ok(ScopeLadder::standard()),
			Some(levels) => ScopeLadder::new(
				levels
					.iter()
					.map(|level| (level.name.as_str(), level.skippable)),
			),
		}
	}
}

fn parse_bool(name: &str, value: &str) -> DiResult<bool> {
	match value.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Ok(true),
		"0" | "false" | "no" | "off" => Ok(false),
		other => Err(DiError::Settings(format!(
			"{}: expected a boolean, got {:?}",
			name, other
		))),
	}
}
