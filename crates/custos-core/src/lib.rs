//! # custos-core
//!
//! The hashing and append pipeline for the CUSTOS audit ledger.
//!
//! This crate provides:
//! - The canonical encoder and SHA-256 hash engine
//! - The `LedgerStore` / `ScopeWriter` / `Clock` traits
//! - The per-scope `WriterGate` and caller `Cancellation`
//! - The `ChainLinker` that turns append requests into committed events
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use custos_core::ChainLinker;
//! use custos_store::InMemoryLedgerStore;
//!
//! let linker = ChainLinker::new(Arc::new(InMemoryLedgerStore::new()));
//! let event = linker.append_event("estate-7", "user-42", "claim.validate",
//!     "Validated claim C-100", serde_json::json!({ "claim_id": "C-100" }))?;
//! ```

pub mod cancel;
pub mod canonical;
pub mod gate;
pub mod hash;
pub mod linker;
pub mod traits;

pub use cancel::{CancelHandle, Cancellation};
pub use canonical::EncodingLimits;
pub use hash::GENESIS_LINK_HASH;
pub use linker::{AppendRequest, ChainLinker};
pub use traits::{Clock, LedgerStore, ScopeWriter, SystemClock};
