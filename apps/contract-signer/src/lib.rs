// Crate-level lint configuration
// Allow noisy pedantic/cargo lints that aren't worth fixing individually
#![allow(clippy::multiple_crate_versions)] // Transitive deps, can't easily fix
#![allow(clippy::missing_errors_doc)] // Would require extensive doc changes
#![allow(clippy::missing_panics_doc)] // Would require extensive doc changes
#![allow(clippy::must_use_candidate)] // Too many false positives for internal APIs
#![allow(clippy::module_name_repetitions)] // Acceptable for clarity (e.g., ContractError in error mod)
#![allow(clippy::doc_markdown)] // Too strict about backticks in docs
#![allow(clippy::missing_const_for_fn)] // Often debatable, runtime doesn't benefit

//! Contract Signer
//!
//! Manifest-based multi-party signing of smart legal contract templates.
//!
//! ## Protocol
//!
//! Each template directory carries a JSON manifest of signature records,
//! partitioned into `parties` and `templateAuthors`. A record binds a
//! signer's certificate to a signature over `templateHash || timestamp`.
//!
//! - **sign**: decrypt the signer's PKCS#12 keystore, hash the template,
//!   sign, and append a record under the per-template lock
//! - **verify**: recompute the template hash and check every record
//!   against its own timestamp and embedded certificate, template authors
//!   first, either stopping at the first failure or collecting all of them
//! - **reset**: clear the manifest to empty buckets
//!
//! ## Security Model
//!
//! - **Self-contained verification**: certificates travel inside the manifest;
//!   self-issued certificates must pass their own signature check
//! - **Tamper detection**: any change to template content, timestamp,
//!   signature, or certificate fails verification
//! - **Secret handling**: keystore passwords never appear on the command line
//!   and are zeroized after use
//! - **Audit trail**: operations are recorded in a hash-chained, Ed25519-signed log

pub mod audit;
pub mod config;
pub mod coordinator;
pub mod crypto;
pub mod error;
pub mod manifest;
pub mod storage;
pub mod telemetry;

// Re-export commonly used types
pub use config::{Settings, VerifyMode};
pub use coordinator::{
    RecordOutcome, RecordStatus, SigningCoordinator, StatusReport, VerificationReport,
    open_audit_logger,
};
pub use error::{ContractError, ContractResult};
pub use manifest::{Manifest, ManifestState, SignatureRecord, SignerPolicy, SignerRole};
