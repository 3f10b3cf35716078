// src/config.rs

//! Compile configuration.
//!
//! Every field has a default, so a config file only needs to name the
//! settings it changes.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::tree::DEFAULT_DERIVATIVE_EPSILON;

/// Settings for one compilation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileConfig {
    /// Guard used by derivative rules near singularities.
    pub derivative_epsilon: f32,
    /// Prefix of generated local declarations (`Local0`, `Local1`, ...).
    pub local_prefix: String,
    /// Fold constant nodes through the preshader and emit them as literals.
    /// When off, constants still go through the regular shader pass.
    pub fold_constants: bool,
    /// Reuse a local when identical code was already declared in scope.
    pub dedupe_expressions: bool,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            derivative_epsilon: DEFAULT_DERIVATIVE_EPSILON,
            local_prefix: "Local".to_string(),
            fold_constants: true,
            dedupe_expressions: true,
        }
    }
}

impl CompileConfig {
    /// Reads a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("Failed to parse config {}", path.display()))
    }

    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn missing_fields_take_defaults() {
        let config = CompileConfig::from_json(r#"{ "local_prefix": "Tmp" }"#).unwrap();
        assert_eq!(config.local_prefix, "Tmp");
        assert_eq!(config.derivative_epsilon, 0.00001);
        assert!(config.fold_constants);
        assert!(config.dedupe_expressions);
    }

    #[test_log::test]
    fn empty_object_is_default() {
        assert_eq!(CompileConfig::from_json("{}").unwrap(), CompileConfig::default());
    }

    #[test_log::test]
    fn malformed_json_is_an_error() {
        assert!(CompileConfig::from_json("{ local_prefix: }").is_err());
    }

    #[test_log::test]
    fn load_reports_missing_file() {
        let err = CompileConfig::load("/definitely/not/here.json").unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to read config"));
    }
}
