//! Configuration for the builder and the passes.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::error::{Result, TransformError};

/// Settings shared by a [`BlockBuilder`](crate::BlockBuilder) and the
/// traversals driving it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Name prefix for anonymous bindings in dataflow blocks
    pub binding_prefix: SmolStr,

    /// Name prefix for anonymous non-dataflow bindings
    pub output_prefix: SmolStr,

    /// Treat calls to unknown operators as inference failures
    pub strict_inference: bool,

    /// Check module passes' results for well-formedness
    pub check_well_formed: bool,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            binding_prefix: SmolStr::new("lv"),
            output_prefix: SmolStr::new("gv"),
            strict_inference: true,
            check_well_formed: true,
        }
    }
}

impl TransformConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Every check enabled
    pub fn strict() -> Self {
        Self {
            strict_inference: true,
            check_well_formed: true,
            ..Self::default()
        }
    }

    /// Unknown operators stay untyped and results are not re-checked
    pub fn lenient() -> Self {
        Self {
            strict_inference: false,
            check_well_formed: false,
            ..Self::default()
        }
    }

    pub fn with_binding_prefix(mut self, prefix: impl Into<SmolStr>) -> Self {
        self.binding_prefix = prefix.into();
        self
    }

    pub fn with_output_prefix(mut self, prefix: impl Into<SmolStr>) -> Self {
        self.output_prefix = prefix.into();
        self
    }

    pub fn with_strict_inference(mut self, strict: bool) -> Self {
        self.strict_inference = strict;
        self
    }

    pub fn with_well_formed_check(mut self, check: bool) -> Self {
        self.check_well_formed = check;
        self
    }

    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: TransformConfig =
            serde_json::from_str(text).map_err(|e| TransformError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Prefixes must be non-empty and distinct, or generated names collide.
    pub fn validate(&self) -> Result<()> {
        if self.binding_prefix.is_empty() || self.output_prefix.is_empty() {
            return Err(TransformError::Config(
                "name prefixes must not be empty".to_string(),
            ));
        }
        if self.binding_prefix == self.output_prefix {
            return Err(TransformError::Config(format!(
                "binding and output prefixes are both `{}`",
                self.binding_prefix
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TransformConfig::default();
        assert_eq!(config.binding_prefix, "lv");
        assert_eq!(config.output_prefix, "gv");
        assert!(config.strict_inference);
        assert!(config.check_well_formed);
        assert_eq!(TransformConfig::new(), TransformConfig::strict());
    }

    #[test]
    fn test_lenient() {
        let config = TransformConfig::lenient();
        assert!(!config.strict_inference);
        assert!(!config.check_well_formed);
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = TransformConfig::from_json(r#"{ "binding_prefix": "t" }"#).unwrap();
        assert_eq!(config.binding_prefix, "t");
        assert_eq!(config.output_prefix, "gv");
    }

    #[test]
    fn test_from_json_rejects_bad_input() {
        assert!(matches!(
            TransformConfig::from_json("{ not json"),
            Err(TransformError::Config(_))
        ));
        let err = TransformConfig::from_json(r#"{ "binding_prefix": "gv" }"#).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid configuration: binding and output prefixes are both `gv`"
        );
    }

    #[test]
    fn test_builder_setters() {
        let config = TransformConfig::new()
            .with_binding_prefix("a")
            .with_output_prefix("b")
            .with_strict_inference(false)
            .with_well_formed_check(false);
        assert_eq!(config, TransformConfig::lenient().with_binding_prefix("a").with_output_prefix("b"));
    }
}
