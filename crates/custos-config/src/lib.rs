//! # custos-config
//!
//! TOML configuration for the CUSTOS audit ledger.
//!
//! A [`LedgerConfig`] carries the encoding limits, the writer lock timeout,
//! the verifier batch size, the storage backend and the exporter identity.
//! It is the one place where a hosting process turns a file into a wired-up
//! store and chain linker.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use custos_config::LedgerConfig;
//!
//! let config = LedgerConfig::from_file(Path::new("custos.toml"))?;
//! let store = config.open_store()?;
//! let linker = config.chain_linker(store.clone());
//! ```

pub mod config;

pub use config::{
    AppendConfig, ExportConfig, LedgerConfig, LimitsConfig, StorageBackend, StorageConfig, VerifyConfig,
};

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use custos_contracts::error::LedgerError;
    use custos_core::{EncodingLimits, LedgerStore};
    use custos_store::SyncMode;

    use super::*;

    const FULL_CONFIG: &str = r#"
[limits]
max_payload_bytes = 1024
max_description_bytes = 256
max_payload_depth = 8

[append]
lock_timeout_ms = 250

[verify]
batch_size = 64

[storage]
backend = "file"
data_dir = "/var/lib/custos"
sync = "os-default"

[export]
exporter_id = "custos-prod"
"#;

    // ── Parsing ───────────────────────────────────────────────────────────────

    /// An empty document yields the in-memory defaults.
    #[test]
    fn test_empty_config_uses_defaults() {
        let config = LedgerConfig::from_toml_str("").unwrap();
        assert_eq!(config, LedgerConfig::default());
        assert_eq!(config.encoding_limits(), EncodingLimits::default());
        assert_eq!(config.lock_timeout(), Duration::from_secs(5));
        assert_eq!(config.verify.batch_size, 1024);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.export.exporter_id, "custos");
    }

    #[test]
    fn test_full_config_parses() {
        let config = LedgerConfig::from_toml_str(FULL_CONFIG).unwrap();
        assert_eq!(config.encoding_limits().max_payload_bytes, 1024);
        assert_eq!(config.encoding_limits().max_payload_depth, 8);
        assert_eq!(config.lock_timeout(), Duration::from_millis(250));
        assert_eq!(config.verify.batch_size, 64);
        assert_eq!(config.storage.backend, StorageBackend::File);
        assert_eq!(config.storage.sync, SyncMode::OsDefault);
        assert_eq!(config.export.exporter_id, "custos-prod");
    }

    /// Omitted fields inside a present section keep their defaults.
    #[test]
    fn test_partial_section_keeps_defaults() {
        let config = LedgerConfig::from_toml_str("[limits]\nmax_payload_depth = 4\n").unwrap();
        assert_eq!(config.limits.max_payload_depth, 4);
        assert_eq!(config.limits.max_payload_bytes, EncodingLimits::default().max_payload_bytes);
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        let err = LedgerConfig::from_toml_str("[append\nlock_timeout_ms = 1").unwrap_err();
        assert!(matches!(err, LedgerError::Config { .. }));
        assert!(err.to_string().contains("failed to parse ledger config TOML"));
    }

    #[test]
    fn test_unknown_backend_is_config_error() {
        let err = LedgerConfig::from_toml_str("[storage]\nbackend = \"s3\"\n").unwrap_err();
        assert!(matches!(err, LedgerError::Config { .. }));
    }

    // ── Validation ────────────────────────────────────────────────────────────

    #[test]
    fn test_zero_values_rejected() {
        for doc in [
            "[limits]\nmax_payload_bytes = 0\n",
            "[append]\nlock_timeout_ms = 0\n",
            "[verify]\nbatch_size = 0\n",
            "[export]\nexporter_id = \"  \"\n",
        ] {
            let err = LedgerConfig::from_toml_str(doc).unwrap_err();
            assert!(matches!(err, LedgerError::Config { .. }), "accepted: {doc}");
        }
    }

    #[test]
    fn test_depth_beyond_verifier_rejected() {
        let err = LedgerConfig::from_toml_str("[limits]\nmax_payload_depth = 500\n").unwrap_err();
        assert!(err.to_string().contains("max_payload_depth 500"));
    }

    /// Depths that a re-parsed export bundle could not hold are refused.
    #[test]
    fn test_depth_capped_below_parser_limit() {
        for depth in [125, 128] {
            let err = LedgerConfig::from_toml_str(&format!("[limits]\nmax_payload_depth = {depth}\n")).unwrap_err();
            assert!(matches!(err, LedgerError::Config { .. }), "{depth}");
        }
        let config = LedgerConfig::from_toml_str("[limits]\nmax_payload_depth = 124\n").unwrap();
        assert_eq!(config.encoding_limits().max_payload_depth, 124);
    }

    #[test]
    fn test_default_lock_timeout_matches_linker() {
        assert_eq!(
            LedgerConfig::default().lock_timeout(),
            custos_core::linker::DEFAULT_LOCK_TIMEOUT
        );
    }

    #[test]
    fn test_file_backend_requires_data_dir() {
        let err = LedgerConfig::from_toml_str("[storage]\nbackend = \"file\"\n").unwrap_err();
        assert!(err.to_string().contains("data_dir is required"));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = LedgerConfig::from_file(std::path::Path::new("/nonexistent/custos.toml")).unwrap_err();
        assert!(err.to_string().contains("failed to read ledger config"));
    }

    // ── Wiring ────────────────────────────────────────────────────────────────

    /// The linker honours configured limits.
    #[test]
    fn test_chain_linker_applies_limits() {
        let config = LedgerConfig::from_toml_str("[limits]\nmax_description_bytes = 8\n").unwrap();
        let linker = config.chain_linker(config.open_store().unwrap());

        assert_eq!(linker.limits().max_description_bytes, 8);
        let err = linker
            .append_event("estate-7", "user-42", "claim.validate", "much too long", serde_json::Value::Null)
            .unwrap_err();
        assert!(matches!(err, LedgerError::Encoding { .. }));
    }

    /// The file backend persists across reopen.
    #[test]
    fn test_file_store_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let toml = format!(
            "[storage]\nbackend = \"file\"\ndata_dir = {:?}\n",
            dir.path().display().to_string()
        );
        let config = LedgerConfig::from_toml_str(&toml).unwrap();

        let linker = config.chain_linker(config.open_store().unwrap());
        linker
            .append_event("estate-7", "user-42", "claim.validate", "Validated claim C-100", serde_json::Value::Null)
            .unwrap();

        let reopened = config.open_store().unwrap();
        assert_eq!(reopened.head(&"estate-7".into()).unwrap().sequence, Some(0));
    }

    #[test]
    fn test_with_data_dir_selects_file_backend() {
        let config = LedgerConfig::default().with_data_dir("/tmp/custos");
        assert_eq!(config.storage.backend, StorageBackend::File);
        assert!(config.validate().is_ok());
    }
}
