//! Cryptographic collaborators of the signing protocol.
//!
//! This module contains:
//! - `keystore`: PKCS#12 decryption into a private key and certificate
//! - `engine`: Payload construction, signing, and verification
//! - `template`: Deterministic template content hashing

pub mod engine;
pub mod keystore;
pub mod template;

pub use engine::{SignatureEngine, build_payload, certificate_public_key};
pub use keystore::{KeystoreAccessor, KeystorePassword, Pkcs12Keystores, SignerIdentity};
pub use template::{DirectoryHasher, TemplateHasher};
