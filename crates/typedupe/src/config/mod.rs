//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::path::Path;

impl TypeDedupeConfig {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TypeDedupeConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// SHA256 of the serialized configuration, for diagnostics.
    pub fn hash(&self) -> String {
        let yaml = serde_yaml::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(yaml.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "destination:\n  raw_namespace: raw\n  default_namespace: analytics\ntyping_deduping:\n  td_threads: 3"
        )
        .unwrap();

        let config = TypeDedupeConfig::load(file.path()).unwrap();
        assert_eq!(config.destination.raw_namespace, "raw");
        assert_eq!(config.destination.default_namespace, "analytics");
        assert_eq!(config.typing_deduping.get_td_threads(), 3);
    }

    #[test]
    fn test_defaults() {
        let config = TypeDedupeConfig::from_yaml("destination: {}").unwrap();
        assert_eq!(config.destination.raw_namespace, "airbyte_internal");
        assert_eq!(config.destination.default_namespace, "public");
        assert_eq!(config.destination.max_identifier_length, 128);
        assert!(!config.typing_deduping.disable_type_dedupe);
        assert!(!config.typing_deduping.incremental_typing_deduping);
        assert_eq!(
            config.typing_deduping.get_valve_intervals_ms(),
            vec![-1, 6 * 60 * 60 * 1000]
        );
    }

    #[test]
    fn test_invalid_config_is_rejected_on_parse() {
        let err = TypeDedupeConfig::from_yaml("typing_deduping:\n  td_threads: 0").unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_missing_file() {
        let err = TypeDedupeConfig::load("/nonexistent/typedupe.yaml").unwrap_err();
        assert_eq!(err.exit_code(), 7);
    }

    #[test]
    fn test_hash_is_stable_and_sensitive() {
        let a = TypeDedupeConfig::default();
        let mut b = TypeDedupeConfig::default();
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.hash().len(), 64);

        b.destination.raw_namespace = "other".to_string();
        assert_ne!(a.hash(), b.hash());
    }
}
