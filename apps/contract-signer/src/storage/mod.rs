//! Storage layer for the contract signer.
//!
//! Uses ReDB for embedded key-value storage with ACID transactions.
//! Only the audit log lives here; manifests stay as JSON files next to
//! their templates.

pub mod redb;

pub use self::redb::Storage;
