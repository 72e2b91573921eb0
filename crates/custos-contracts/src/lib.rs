//! # custos-contracts
//!
//! Shared types, reports, and error contracts for the CUSTOS audit ledger.
//!
//! All crates in the workspace import from here. No business logic lives in
//! this crate: only data definitions and error types.

pub mod error;
pub mod event;
pub mod export;
pub mod verify;
