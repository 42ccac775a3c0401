//! Configuration loading and validation.
//!
//! A run is described by one YAML document with `source`, `target`,
//! `migration`, `mappings` and `type_mappings` sections. Parsing always
//! validates, so a `Config` in hand is safe to run.

mod types;
mod validation;

pub use types::*;

use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::Result;

impl Config {
    /// Read and validate a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml(&yaml)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Fingerprint of the run settings, reported with each run.
    ///
    /// Passwords are blanked first, so rotating a credential keeps the hash.
    pub fn hash(&self) -> String {
        let mut settings = self.clone();
        settings.source.password.clear();
        settings.target.password.clear();

        let yaml = serde_yaml::to_string(&settings).unwrap_or_default();
        format!("{:x}", Sha256::digest(yaml.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = "source:\n  type: memory\n  database: legacy\n  password: one\ntarget:\n  type: memory\n  database: warehouse\n";

    #[test]
    fn test_hash_ignores_passwords() {
        let config = Config::from_yaml(YAML).unwrap();
        let mut rotated = config.clone();
        rotated.source.password = "two".into();
        assert_eq!(config.hash(), rotated.hash());
        assert_eq!(config.hash().len(), 64);
    }

    #[test]
    fn test_hash_tracks_settings() {
        let config = Config::from_yaml(YAML).unwrap();
        let mut tuned = config.clone();
        tuned.migration.batch_size = Some(10);
        assert_ne!(config.hash(), tuned.hash());
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = Config::load("/nonexistent/dbshift.yaml").unwrap_err();
        assert!(matches!(err, crate::error::MigrateError::Io(_)));
    }
}
