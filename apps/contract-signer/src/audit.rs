//! Hash-chained audit log for manifest operations.
//!
//! Provides tamper-evident audit logging with:
//! - Sequential entries linked by SHA-256 hashes
//! - Ed25519 signatures on each entry
//! - Chain verification for integrity checking
//!
//! ## Security Properties
//!
//! - **Tamper-evident**: Modifying any entry breaks the hash chain
//! - **Non-repudiation**: Ed25519 signatures prove entry authenticity
//! - **Ordered**: Sequence numbers prevent reordering attacks
//!
//! The signing key is generated on first open and persisted alongside the
//! log, so later processes keep extending the same verifiable chain.

use std::sync::{
    Mutex,
    atomic::{AtomicU64, Ordering},
};

use chrono::{DateTime, Utc};
use ed25519_dalek::{SecretKey, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::error::{ContractError, ContractResult};
use crate::manifest::SignerRole;
use crate::storage::Storage;

/// Metadata key of the persisted Ed25519 secret.
const SIGNING_KEY_META: &str = "signing_key";

/// Genesis hash for the first entry in the chain.
const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Types of auditable events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    ManifestSign,
    ManifestVerify,
    ManifestReset,
}

impl std::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ManifestSign => write!(f, "manifest_sign"),
            Self::ManifestVerify => write!(f, "manifest_verify"),
            Self::ManifestReset => write!(f, "manifest_reset"),
        }
    }
}

/// Actor that triggered an audit event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditActor {
    /// A signer acting in a role.
    Signer { signer_id: String, role: SignerRole },
    /// Operator action without a signer identity (verify, reset).
    System,
}

/// Outcome of an audited operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AuditOutcome {
    /// Operation succeeded.
    Success,
    /// Operation failed.
    Failure { reason: String },
}

impl AuditOutcome {
    /// Outcome of a finished operation result.
    pub fn of<T>(result: &ContractResult<T>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(e) => Self::Failure {
                reason: format!("{}: {e}", e.error_code()),
            },
        }
    }
}

/// A single audit log entry with hash-chain linking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Sequence number (monotonically increasing, starting at 1).
    pub seq: u64,
    /// Timestamp when the entry was created.
    pub timestamp: DateTime<Utc>,
    /// Type of event.
    pub event_type: AuditEventType,
    /// Actor that triggered the event.
    pub actor: AuditActor,
    /// Template the operation touched.
    pub template: String,
    /// Unique id of the audited operation.
    pub operation_id: Uuid,
    /// Outcome of the operation.
    pub outcome: AuditOutcome,
    /// Additional context (JSON-serializable data).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
    /// SHA-256 hash of the previous entry (hex).
    pub prev_hash: String,
    /// Ed25519 signature of this entry (hex).
    pub signature: String,
}

impl AuditEntry {
    /// Compute the canonical bytes for hashing/signing.
    ///
    /// Variable-length fields are length-prefixed so adjacent fields cannot
    /// be shifted into one another. Excludes the signature.
    fn canonical_bytes(&self) -> ContractResult<Vec<u8>> {
        fn field(data: &mut Vec<u8>, bytes: &[u8]) {
            data.extend_from_slice(&(bytes.len() as u64).to_be_bytes());
            data.extend_from_slice(bytes);
        }

        let mut data = Vec::new();
        data.extend_from_slice(&self.seq.to_be_bytes());
        field(&mut data, self.timestamp.to_rfc3339().as_bytes());
        field(&mut data, self.event_type.to_string().as_bytes());
        field(&mut data, &serde_json::to_vec(&self.actor)?);
        field(&mut data, self.template.as_bytes());
        data.extend_from_slice(self.operation_id.as_bytes());
        field(&mut data, &serde_json::to_vec(&self.outcome)?);
        match self.context {
            Some(ref context) => field(&mut data, context.to_string().as_bytes()),
            None => field(&mut data, b""),
        }
        field(&mut data, self.prev_hash.as_bytes());
        Ok(data)
    }

    /// Compute SHA-256 hash of this entry.
    pub fn hash(&self) -> ContractResult<String> {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_bytes()?);
        hasher.update(self.signature.as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }

    /// Verify the signature on this entry.
    pub fn verify_signature(&self, verifying_key: &VerifyingKey) -> bool {
        let Ok(signature_bytes) = hex::decode(&self.signature) else {
            return false;
        };

        let Ok(signature) = ed25519_dalek::Signature::from_slice(&signature_bytes) else {
            return false;
        };

        let Ok(data) = self.canonical_bytes() else {
            return false;
        };
        verifying_key.verify(&data, &signature).is_ok()
    }
}

/// Result of walking the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainStatus {
    /// Every entry links to its predecessor and carries a valid signature.
    Intact { entries: u64 },
    /// The first entry that failed, and why.
    Broken { seq: u64, reason: String },
}

impl ChainStatus {
    pub fn is_intact(&self) -> bool {
        matches!(self, Self::Intact { .. })
    }
}

/// Load the persisted signing key, creating it on first use.
fn load_signing_key(storage: &Storage) -> ContractResult<SigningKey> {
    let stored = Zeroizing::new(storage.get_or_init_meta(SIGNING_KEY_META, || {
        let mut secret = vec![0u8; 32];
        openssl::rand::rand_bytes(&mut secret)?;
        Ok(secret)
    })?);

    let secret: SecretKey = stored.as_slice().try_into().map_err(|_| {
        ContractError::Storage(format!(
            "Audit signing key has {} bytes, expected 32",
            stored.len()
        ))
    })?;
    Ok(SigningKey::from_bytes(&secret))
}

/// Audit logger with hash-chaining and signing.
pub struct AuditLogger {
    storage: Storage,
    signing_key: SigningKey,
    /// Current sequence number (atomic for thread safety).
    current_seq: AtomicU64,
    /// Serialize appends to preserve hash chain integrity.
    append_lock: Mutex<()>,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("verifying_key", &self.verifying_key_hex())
            .field("current_seq", &self.current_seq())
            .finish_non_exhaustive()
    }
}

impl AuditLogger {
    /// Open the audit log, loading or generating its signing key.
    pub fn open(storage: Storage) -> ContractResult<Self> {
        let signing_key = load_signing_key(&storage)?;
        Self::with_signing_key(storage, signing_key)
    }

    /// Create an audit logger with a specific signing key.
    pub fn with_signing_key(storage: Storage, signing_key: SigningKey) -> ContractResult<Self> {
        let current_seq = storage.get_latest_audit_seq()?.unwrap_or(0);

        Ok(Self {
            storage,
            signing_key,
            current_seq: AtomicU64::new(current_seq),
            append_lock: Mutex::new(()),
        })
    }

    /// Get the verifying key for signature verification.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Get the verifying key as hex.
    pub fn verifying_key_hex(&self) -> String {
        hex::encode(self.verifying_key().as_bytes())
    }

    /// Append a new audit entry.
    ///
    /// Returns the sequence number of the new entry.
    pub fn append(
        &self,
        event_type: AuditEventType,
        actor: AuditActor,
        template: &str,
        outcome: AuditOutcome,
        context: Option<serde_json::Value>,
    ) -> ContractResult<u64> {
        let _append_guard = self
            .append_lock
            .lock()
            .map_err(|_e| ContractError::Storage("Audit append lock poisoned".to_string()))?;

        // Another logger over the same storage may have appended.
        let latest = self.storage.get_latest_audit_seq()?.unwrap_or(0);
        let seq = latest.max(self.current_seq.load(Ordering::SeqCst)) + 1;

        let prev_hash = if seq == 1 {
            GENESIS_HASH.to_string()
        } else {
            self.storage
                .get_audit_entry(seq - 1)?
                .ok_or_else(|| ContractError::Storage(format!("Missing audit entry {}", seq - 1)))?
                .hash()?
        };

        let mut entry = AuditEntry {
            seq,
            timestamp: Utc::now(),
            event_type,
            actor,
            template: template.to_string(),
            operation_id: Uuid::new_v4(),
            outcome,
            context,
            prev_hash,
            signature: String::new(),
        };

        let data = entry.canonical_bytes()?;
        let signature = self.signing_key.sign(&data);
        entry.signature = hex::encode(signature.to_bytes());

        self.storage.put_audit_entry(&entry)?;
        self.current_seq.store(seq, Ordering::SeqCst);

        tracing::debug!(
            seq = seq,
            event_type = %event_type,
            template = %entry.template,
            "Audit entry appended"
        );

        Ok(seq)
    }

    /// Verify the hash chain between two sequence numbers, inclusive.
    pub fn verify_chain(&self, start: u64, end: u64) -> ContractResult<ChainStatus> {
        if start == 0 || start > end {
            return Err(ContractError::InvalidInput(format!(
                "Invalid audit range {start}..={end}"
            )));
        }

        let verifying_key = self.verifying_key();
        let mut expected_prev_hash = if start == 1 {
            GENESIS_HASH.to_string()
        } else {
            match self.storage.get_audit_entry(start - 1)? {
                Some(entry) => entry.hash()?,
                None => {
                    return Ok(ChainStatus::Broken {
                        seq: start - 1,
                        reason: "entry missing".to_string(),
                    });
                }
            }
        };

        for seq in start..=end {
            let Some(entry) = self.storage.get_audit_entry(seq)? else {
                return Ok(ChainStatus::Broken {
                    seq,
                    reason: "entry missing".to_string(),
                });
            };

            if entry.seq != seq {
                return Ok(ChainStatus::Broken {
                    seq,
                    reason: format!("stored under {seq} but numbered {}", entry.seq),
                });
            }

            if entry.prev_hash != expected_prev_hash {
                tracing::warn!(
                    seq = seq,
                    expected = %expected_prev_hash,
                    actual = %entry.prev_hash,
                    "Hash chain broken"
                );
                return Ok(ChainStatus::Broken {
                    seq,
                    reason: "previous-hash link does not match".to_string(),
                });
            }

            if !entry.verify_signature(&verifying_key) {
                tracing::warn!(seq = seq, "Invalid signature on audit entry");
                return Ok(ChainStatus::Broken {
                    seq,
                    reason: "signature does not verify".to_string(),
                });
            }

            expected_prev_hash = entry.hash()?;
        }

        Ok(ChainStatus::Intact {
            entries: end - start + 1,
        })
    }

    /// Verify the whole chain as currently stored.
    pub fn verify_all(&self) -> ContractResult<ChainStatus> {
        match self.storage.get_latest_audit_seq()? {
            Some(latest) => self.verify_chain(1, latest),
            None => Ok(ChainStatus::Intact { entries: 0 }),
        }
    }

    /// Get the current sequence number.
    pub fn current_seq(&self) -> u64 {
        self.current_seq.load(Ordering::SeqCst)
    }

    /// Get an audit entry by sequence number.
    pub fn get_entry(&self, seq: u64) -> ContractResult<Option<AuditEntry>> {
        self.storage.get_audit_entry(seq)
    }

    /// List audit entries in a range, inclusive on both ends.
    pub fn list_entries(&self, start: u64, end: u64) -> ContractResult<Vec<AuditEntry>> {
        if start > end {
            return Ok(Vec::new());
        }
        let entries = self
            .storage
            .get_audit_log_range::<AuditEntry>(start, end.saturating_add(1))?;
        Ok(entries.into_iter().map(|(_, entry)| entry).collect())
    }
}
