//! # custos-store
//!
//! Ledger stores for the CUSTOS audit ledger.
//!
//! ## Overview
//!
//! - [`InMemoryLedgerStore`]: reference implementation, process lifetime only.
//! - [`FileLedgerStore`]: one JSON-lines segment per scope, synced before an
//!   event becomes visible, torn tails discarded on recovery.
//!
//! Both keep a writer gate per scope: appends to one scope are totally
//! ordered, appends to different scopes proceed in parallel, and readers
//! never wait on a writer.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use custos_core::ChainLinker;
//! use custos_store::{FileLedgerStore, FileStoreOptions};
//!
//! let store = Arc::new(FileLedgerStore::open("/var/lib/custos", FileStoreOptions::default())?);
//! let linker = ChainLinker::new(store);
//! ```

pub mod file;
mod log;
pub mod memory;

pub use file::{FileLedgerStore, FileStoreOptions, SyncMode};
pub use memory::InMemoryLedgerStore;

// ── Tests ─────────────────────────────────────────────────────────────────────
