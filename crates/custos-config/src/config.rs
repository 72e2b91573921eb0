//! Ledger configuration schema.
//!
//! Every section and field has a default, so an empty file is a valid
//! in-memory configuration.
//!
//! Example:
//! ```toml
//! [limits]
//! max_payload_bytes = 65536
//! max_description_bytes = 4096
//! max_payload_depth = 32
//!
//! [append]
//! lock_timeout_ms = 5000
//!
//! [verify]
//! batch_size = 1024
//!
//! [storage]
//! backend = "file"
//! data_dir = "/var/lib/custos"
//! sync = "every-write"
//!
//! [export]
//! exporter_id = "custos-prod"
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use custos_contracts::error::{LedgerError, LedgerResult};
use custos_core::{canonical::MAX_APPEND_PAYLOAD_DEPTH, ChainLinker, EncodingLimits, LedgerStore};
use custos_store::{FileLedgerStore, FileStoreOptions, InMemoryLedgerStore, SyncMode};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub limits: LimitsConfig,
    pub append: AppendConfig,
    pub verify: VerifyConfig,
    pub storage: StorageConfig,
    pub export: ExportConfig,
}

/// Canonical encoding bounds applied to new events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_payload_bytes: usize,
    pub max_description_bytes: usize,
    pub max_payload_depth: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let limits = EncodingLimits::default();
        Self {
            max_payload_bytes: limits.max_payload_bytes,
            max_description_bytes: limits.max_description_bytes,
            max_payload_depth: limits.max_payload_depth,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppendConfig {
    /// Longest wait for a scope's writer lock before `Commit` is returned.
    pub lock_timeout_ms: u64,
}

impl Default for AppendConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: u64::try_from(custos_core::linker::DEFAULT_LOCK_TIMEOUT.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    /// Events read per store round-trip while verifying.
    pub batch_size: usize,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self { batch_size: 1024 }
    }
}

/// Which ledger store implementation to open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageBackend {
    /// Process-local; lost on exit.
    #[default]
    Memory,
    /// JSON-lines segment files under `data_dir`.
    File,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Required for the `file` backend.
    pub data_dir: Option<PathBuf>,
    pub sync: SyncMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Written into every bundle as `exporter_id`.
    pub exporter_id: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            exporter_id: "custos".to_string(),
        }
    }
}

impl LedgerConfig {
    /// Parse and validate a TOML document.
    ///
    /// Returns `LedgerError::Config` if the TOML is malformed, has fields of
    /// the wrong type, or fails [`validate`](Self::validate).
    pub fn from_toml_str(s: &str) -> LedgerResult<Self> {
        let config: LedgerConfig = toml::from_str(s).map_err(|e| LedgerError::Config {
            reason: format!("failed to parse ledger config TOML: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read the file at `path` and parse it as ledger configuration.
    pub fn from_file(path: &Path) -> LedgerResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| LedgerError::Config {
            reason: format!("failed to read ledger config '{}': {e}", path.display()),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Switch to the file backend rooted at `dir`.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage.backend = StorageBackend::File;
        self.storage.data_dir = Some(dir.into());
        self
    }

    pub fn validate(&self) -> LedgerResult<()> {
        let limits = &self.limits;
        if limits.max_payload_bytes == 0 || limits.max_description_bytes == 0 || limits.max_payload_depth == 0 {
            return Err(config_error("[limits] values must be greater than zero"));
        }
        if limits.max_payload_depth > MAX_APPEND_PAYLOAD_DEPTH {
            return Err(config_error(format!(
                "[limits] max_payload_depth {} exceeds the verifiable maximum {MAX_APPEND_PAYLOAD_DEPTH}",
                limits.max_payload_depth
            )));
        }
        if self.append.lock_timeout_ms == 0 {
            return Err(config_error("[append] lock_timeout_ms must be greater than zero"));
        }
        if self.verify.batch_size == 0 {
            return Err(config_error("[verify] batch_size must be greater than zero"));
        }
        if self.storage.backend == StorageBackend::File && self.storage.data_dir.is_none() {
            return Err(config_error("[storage] data_dir is required for the file backend"));
        }
        if self.export.exporter_id.trim().is_empty() {
            return Err(config_error("[export] exporter_id must not be empty"));
        }
        Ok(())
    }

    pub fn encoding_limits(&self) -> EncodingLimits {
        EncodingLimits {
            max_payload_bytes: self.limits.max_payload_bytes,
            max_description_bytes: self.limits.max_description_bytes,
            max_payload_depth: self.limits.max_payload_depth,
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.append.lock_timeout_ms)
    }

    /// Open the configured store.
    pub fn open_store(&self) -> LedgerResult<Arc<dyn LedgerStore>> {
        self.validate()?;
        match (&self.storage.backend, &self.storage.data_dir) {
            (StorageBackend::File, Some(dir)) => {
                info!(dir = %dir.display(), sync = ?self.storage.sync, "opening file ledger store");
                let options = FileStoreOptions {
                    sync_mode: self.storage.sync,
                };
                Ok(Arc::new(FileLedgerStore::open(dir, options)?))
            }
            (StorageBackend::File, None) => Err(config_error("[storage] data_dir is required for the file backend")),
            (StorageBackend::Memory, _) => {
                info!("opening in-memory ledger store");
                Ok(Arc::new(InMemoryLedgerStore::new()))
            }
        }
    }

    /// A chain linker over `store` with the configured limits and timeout.
    pub fn chain_linker(&self, store: Arc<dyn LedgerStore>) -> ChainLinker {
        ChainLinker::new(store)
            .with_limits(self.encoding_limits())
            .with_lock_timeout(self.lock_timeout())
    }
}

fn config_error(reason: impl Into<String>) -> LedgerError {
    LedgerError::Config { reason: reason.into() }
}
