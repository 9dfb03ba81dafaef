//! On-disk manifest schema.
//!
//! Only schema version 2 is ever written:
//!
//! ```json
//! {
//!   "schemaVersion": 2,
//!   "signatures": {
//!     "parties": [{ "partyName": "...", "signature": "...", "templateHash": "...",
//!                   "timeStamp": 0, "certificatePem": "..." }],
//!     "templateAuthors": [{ "templateAuthor": "...", "signature": "...", "templateHash": "...",
//!                           "timeStamp": 0, "certificatePem": "..." }]
//!   }
//! }
//! ```
//!
//! Two older shapes are read and migrated: the same role-partitioned object
//! without `schemaVersion` (read as version 2), and the flat
//! `{ "signatures": [...] }` array with `certificateString` (version 1).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ContractError, ContractResult};
use crate::manifest::types::{Manifest, SignatureRecord, SignerRole, TimestampMillis};

/// Schema version written by this crate.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Flat signature array with `certificateString`.
const LEGACY_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartyEntry {
    party_name: String,
    signature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    template_hash: Option<String>,
    time_stamp: TimestampMillis,
    certificate_pem: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthorEntry {
    template_author: String,
    signature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    template_hash: Option<String>,
    time_stamp: TimestampMillis,
    certificate_pem: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Buckets {
    parties: Vec<PartyEntry>,
    template_authors: Vec<AuthorEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestDocument {
    schema_version: u32,
    signatures: Buckets,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartitionedDocument {
    signatures: Buckets,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyEntry {
    party_name: String,
    signature: String,
    time_stamp: TimestampMillis,
    certificate_string: String,
}

#[derive(Debug, Deserialize)]
struct LegacyDocument {
    signatures: Vec<LegacyEntry>,
}

impl From<PartyEntry> for SignatureRecord {
    fn from(entry: PartyEntry) -> Self {
        Self {
            signer_id: entry.party_name,
            role: SignerRole::Party,
            signature_hex: entry.signature,
            timestamp: entry.time_stamp,
            certificate_pem: entry.certificate_pem,
            template_hash: entry.template_hash,
        }
    }
}

impl From<AuthorEntry> for SignatureRecord {
    fn from(entry: AuthorEntry) -> Self {
        Self {
            signer_id: entry.template_author,
            role: SignerRole::TemplateAuthor,
            signature_hex: entry.signature,
            timestamp: entry.time_stamp,
            certificate_pem: entry.certificate_pem,
            template_hash: entry.template_hash,
        }
    }
}

impl From<LegacyEntry> for SignatureRecord {
    fn from(entry: LegacyEntry) -> Self {
        Self {
            signer_id: entry.party_name,
            role: SignerRole::Party,
            signature_hex: entry.signature,
            timestamp: entry.time_stamp,
            certificate_pem: entry.certificate_string,
            template_hash: None,
        }
    }
}

impl From<Buckets> for Manifest {
    fn from(buckets: Buckets) -> Self {
        Self {
            parties: buckets.parties.into_iter().map(Into::into).collect(),
            template_authors: buckets
                .template_authors
                .into_iter()
                .map(Into::into)
                .collect(),
        }
    }
}

/// A manifest read from disk, with the schema version it was stored in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedManifest {
    pub manifest: Manifest,
    pub source_version: u32,
}

impl DecodedManifest {
    /// Whether the next save rewrites the file in a newer schema.
    pub fn needs_migration(&self) -> bool {
        self.source_version != CURRENT_SCHEMA_VERSION
    }
}

fn corrupt(path: &Path, reason: impl std::fmt::Display) -> ContractError {
    ContractError::ManifestCorrupt {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Decode manifest bytes in any supported schema version.
///
/// `path` is only used to identify the file in errors.
pub fn decode(bytes: &[u8], path: &Path) -> ContractResult<DecodedManifest> {
    let value: serde_json::Value = serde_json::from_slice(bytes).map_err(|e| corrupt(path, e))?;

    let version = match value.get("schemaVersion") {
        Some(v) => {
            let version = v
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| corrupt(path, "schemaVersion must be a non-negative integer"))?;
            Some(version)
        }
        None => None,
    };

    match version {
        Some(CURRENT_SCHEMA_VERSION) => {
            let doc: ManifestDocument =
                serde_json::from_value(value).map_err(|e| corrupt(path, e))?;
            Ok(DecodedManifest {
                manifest: doc.signatures.into(),
                source_version: CURRENT_SCHEMA_VERSION,
            })
        }
        Some(LEGACY_SCHEMA_VERSION) => decode_legacy(value, path),
        Some(other) => Err(ContractError::UnsupportedSchemaVersion(other)),
        None => match value.get("signatures") {
            Some(serde_json::Value::Array(_)) => decode_legacy(value, path),
            Some(serde_json::Value::Object(_)) => {
                let doc: PartitionedDocument =
                    serde_json::from_value(value).map_err(|e| corrupt(path, e))?;
                Ok(DecodedManifest {
                    manifest: doc.signatures.into(),
                    // Same shape as version 2; only the marker is missing.
                    source_version: 0,
                })
            }
            _ => Err(corrupt(path, "missing 'signatures'")),
        },
    }
}

fn decode_legacy(value: serde_json::Value, path: &Path) -> ContractResult<DecodedManifest> {
    let doc: LegacyDocument = serde_json::from_value(value).map_err(|e| corrupt(path, e))?;
    let mut manifest = Manifest::new();
    for entry in doc.signatures {
        manifest.append(entry.into());
    }
    Ok(DecodedManifest {
        manifest,
        source_version: LEGACY_SCHEMA_VERSION,
    })
}

/// Encode a manifest in the current schema version.
pub fn encode(manifest: &Manifest) -> ContractResult<Vec<u8>> {
    let doc = ManifestDocument {
        schema_version: CURRENT_SCHEMA_VERSION,
        signatures: Buckets {
            parties: manifest
                .parties
                .iter()
                .map(|r| PartyEntry {
                    party_name: r.signer_id.clone(),
                    signature: r.signature_hex.clone(),
                    template_hash: r.template_hash.clone(),
                    time_stamp: r.timestamp,
                    certificate_pem: r.certificate_pem.clone(),
                })
                .collect(),
            template_authors: manifest
                .template_authors
                .iter()
                .map(|r| AuthorEntry {
                    template_author: r.signer_id.clone(),
                    signature: r.signature_hex.clone(),
                    template_hash: r.template_hash.clone(),
                    time_stamp: r.timestamp,
                    certificate_pem: r.certificate_pem.clone(),
                })
                .collect(),
        },
    };

    let mut bytes = serde_json::to_vec_pretty(&doc)?;
    bytes.push(b'\n');
    Ok(bytes)
}
