//! Signature manifests.
//!
//! This module contains:
//! - `types`: Signature records, roles, and signing state
//! - `schema`: Versioned JSON representation and legacy migration
//! - `store`: Atomic, lock-protected file repository

pub mod schema;
pub mod store;
pub mod types;

pub use schema::{CURRENT_SCHEMA_VERSION, DecodedManifest};
pub use store::{ManifestLock, ManifestStore};
pub use types::*;
