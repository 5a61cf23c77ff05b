//! View configuration
//!
//! Loaded from YAML or built in code, optionally overlaid with
//! `TETHER_TEMPLATE_ROOT` / `TETHER_DEFAULT_ENGINE`.

use crate::error::TetherError;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const ENV_TEMPLATE_ROOT: &str = "TETHER_TEMPLATE_ROOT";
pub const ENV_DEFAULT_ENGINE: &str = "TETHER_DEFAULT_ENGINE";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ViewConfig {
    /// Base directory for relative template paths.
    pub template_root: PathBuf,
    pub default_engine: String,
    /// File extensions recognised as templates, without the dot.
    pub extensions: Vec<String>,
    pub cache_templates: bool,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            template_root: PathBuf::from("."),
            default_engine: "stache".to_string(),
            extensions: vec!["stache".to_string(), "mustache".to_string()],
            cache_templates: true,
        }
    }
}

impl ViewConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, TetherError> {
        let config: ViewConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, TetherError> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml(&yaml)
    }

    /// Defaults overlaid with the environment.
    pub fn from_env() -> Self {
        Self::default().with_env()
    }

    pub fn with_env(self) -> Self {
        self.with_overrides(
            std::env::var(ENV_TEMPLATE_ROOT).ok(),
            std::env::var(ENV_DEFAULT_ENGINE).ok(),
        )
    }

    fn with_overrides(mut self, root: Option<String>, engine: Option<String>) -> Self {
        if let Some(root) = root.filter(|r| !r.is_empty()) {
            self.template_root = PathBuf::from(root);
        }
        if let Some(engine) = engine.filter(|e| !e.is_empty()) {
            self.default_engine = engine;
        }
        self
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.template_root = root.into();
        self
    }

    fn validate(&self) -> Result<(), TetherError> {
        if self.extensions.is_empty() {
            return Err(TetherError::Config(
                "at least one template extension is required".to_string(),
            ));
        }
        if let Some(bad) = self.extensions.iter().find(|e| e.is_empty() || e.starts_with('.')) {
            return Err(TetherError::Config(format!(
                "extension '{bad}' must be a bare name like 'stache'"
            )));
        }
        if !self.supports_engine(&self.default_engine) {
            return Err(TetherError::Config(format!(
                "default engine '{}' is not among the configured extensions",
                self.default_engine
            )));
        }
        Ok(())
    }

    pub fn supports_engine(&self, engine: &str) -> bool {
        self.extensions.iter().any(|e| e == engine)
    }

    /// The engine a template path is compiled with: the explicit override
    /// when given, else the path's extension, else `default_engine` for a
    /// path without one.
    pub fn engine_for(&self, path: &str, explicit: Option<&str>) -> Result<String, TetherError> {
        let unknown = || TetherError::UnknownEngine {
            path: path.to_string(),
        };
        if let Some(engine) = explicit {
            return if self.supports_engine(engine) {
                Ok(engine.to_string())
            } else {
                Err(unknown())
            };
        }
        let file = path.split(['?', '#']).next().unwrap_or(path);
        let name = file.rsplit('/').next().unwrap_or(file);
        match name.rsplit_once('.') {
            Some((_, ext)) if self.supports_engine(ext) => Ok(ext.to_string()),
            Some(_) => Err(unknown()),
            None => Ok(self.default_engine.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_fills_missing_fields_with_defaults() {
        let config = ViewConfig::from_yaml("template_root: views\ncache_templates: false\n").unwrap();
        assert_eq!(config.template_root, PathBuf::from("views"));
        assert!(!config.cache_templates);
        assert_eq!(config.default_engine, "stache");
    }

    #[test]
    fn yaml_is_validated() {
        assert!(matches!(
            ViewConfig::from_yaml("extensions: []"),
            Err(TetherError::Config(_))
        ));
        assert!(matches!(
            ViewConfig::from_yaml("default_engine: ejs"),
            Err(TetherError::Config(_))
        ));
        assert!(ViewConfig::from_yaml("unknown_key: 1").is_err());
    }

    #[test]
    fn environment_overrides_apply_when_set() {
        let config = ViewConfig::default().with_overrides(Some("tpl".into()), Some(String::new()));
        assert_eq!(config.template_root, PathBuf::from("tpl"));
        assert_eq!(config.default_engine, "stache");
    }

    #[test]
    fn engine_comes_from_extension_or_override() {
        let config = ViewConfig::default();
        assert_eq!(config.engine_for("a/b.stache", None).unwrap(), "stache");
        assert_eq!(config.engine_for("b.mustache?v=2", None).unwrap(), "mustache");
        assert_eq!(config.engine_for("/render/view", Some("stache")).unwrap(), "stache");
        assert!(matches!(
            config.engine_for("/render/view.ejs", None),
            Err(TetherError::UnknownEngine { .. })
        ));
        assert!(config.engine_for("x.stache", Some("ejs")).is_err());
    }

    #[test]
    fn extensionless_paths_use_the_default_engine() {
        assert_eq!(ViewConfig::default().engine_for("/render/view", None).unwrap(), "stache");
        let config = ViewConfig::from_yaml("default_engine: mustache").unwrap();
        assert_eq!(config.engine_for("/render/view", None).unwrap(), "mustache");
        assert_eq!(config.engine_for("/render/view.stache", None).unwrap(), "stache");
    }
}
