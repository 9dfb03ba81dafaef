//! Signing coordinator: sign, verify, reset and status over a template manifest.
//!
//! The coordinator owns no cryptography itself. It orchestrates:
//! - Sign: keystore → template hash → payload → signature → append → persist
//! - Verify: recompute the template hash, check every record against its own
//!   timestamp and embedded certificate
//! - Reset: clear the manifest to empty buckets
//!
//! `sign` and `reset` hold the per-template manifest lock across their
//! read-modify-write. Every operation is appended to the audit log when one
//! is configured.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::audit::{AuditActor, AuditEventType, AuditLogger, AuditOutcome};
use crate::config::{Settings, VerifyMode};
use crate::crypto::{
    DirectoryHasher, KeystoreAccessor, Pkcs12Keystores, SignatureEngine, TemplateHasher,
    build_payload, certificate_public_key,
};
use crate::error::{ContractError, ContractResult};
use crate::manifest::{
    ManifestState, ManifestStore, SignatureRecord, SignerPolicy, SignerRole, TimestampMillis,
};
use crate::storage::Storage;

/// Verification result of a single record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecordStatus {
    /// Signature verifies over the current template hash.
    Valid,
    /// Signature does not verify over any hash the record can claim.
    InvalidSignature,
    /// The embedded certificate is unusable or fails its integrity check.
    InvalidCertificate { reason: String },
    /// Signature is genuine but was made over different template content.
    TemplateModified { signed_hash: String },
}

impl RecordStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Valid => write!(f, "valid"),
            Self::InvalidSignature => write!(f, "invalid signature"),
            Self::InvalidCertificate { reason } => write!(f, "invalid certificate ({reason})"),
            Self::TemplateModified { .. } => write!(f, "template modified since signing"),
        }
    }
}

/// Outcome of verifying one signature record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordOutcome {
    pub signer_id: String,
    pub role: SignerRole,
    pub timestamp: TimestampMillis,
    pub status: RecordStatus,
}

impl RecordOutcome {
    /// Convert a failed outcome into the matching error.
    fn to_error(&self) -> Option<ContractError> {
        match &self.status {
            RecordStatus::Valid => None,
            RecordStatus::InvalidSignature => Some(ContractError::SignatureVerificationFailed {
                signer: self.signer_id.clone(),
                reason: "signature does not verify".to_string(),
            }),
            RecordStatus::InvalidCertificate { reason } => {
                Some(ContractError::SignatureVerificationFailed {
                    signer: self.signer_id.clone(),
                    reason: format!("invalid certificate: {reason}"),
                })
            }
            RecordStatus::TemplateModified { .. } => Some(ContractError::TemplateModified {
                signer: self.signer_id.clone(),
            }),
        }
    }
}

/// Result of verifying a template's manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    pub template: String,
    pub template_hash: String,
    pub mode: VerifyMode,
    /// Total records in the manifest, evaluated or not.
    pub total_records: usize,
    /// One outcome per evaluated record, in verification order.
    pub outcomes: Vec<RecordOutcome>,
}

impl VerificationReport {
    /// True when no evaluated record failed. Vacuously true for an empty manifest.
    pub fn is_valid(&self) -> bool {
        self.outcomes.iter().all(|o| o.status.is_valid())
    }

    pub fn first_failure(&self) -> Option<&RecordOutcome> {
        self.outcomes.iter().find(|o| !o.status.is_valid())
    }

    pub fn failures(&self) -> impl Iterator<Item = &RecordOutcome> {
        self.outcomes.iter().filter(|o| !o.status.is_valid())
    }

    /// Records skipped because fail-fast stopped early.
    pub fn skipped(&self) -> usize {
        self.total_records - self.outcomes.len()
    }

    /// The report itself when valid, otherwise the first failure as an error.
    pub fn into_result(self) -> ContractResult<Self> {
        let failure = self.first_failure().and_then(RecordOutcome::to_error);
        match failure {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

/// Signing progress of a template against a signer policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub template: String,
    pub state: ManifestState,
    pub parties: usize,
    pub template_authors: usize,
    /// Required signers without a record.
    pub missing: Vec<(SignerRole, String)>,
}

/// Orchestrates manifest operations over pluggable keystores and hashers.
pub struct SigningCoordinator<K = Pkcs12Keystores, H = DirectoryHasher> {
    settings: Settings,
    store: ManifestStore,
    keystores: K,
    hasher: H,
    engine: SignatureEngine,
    audit_logger: Option<Arc<AuditLogger>>,
}

impl SigningCoordinator {
    /// Coordinator over file-system keystores and directory hashing, without auditing.
    pub fn new(settings: &Settings) -> Self {
        Self::with_components(
            settings,
            Pkcs12Keystores::new(settings),
            DirectoryHasher::new(settings.manifest_file()),
        )
    }

    /// Coordinator as configured, attaching the audit log when enabled.
    ///
    /// The audit database admits one process at a time. When it cannot be
    /// opened the coordinator runs without auditing rather than refusing to
    /// sign.
    pub fn from_settings(settings: &Settings) -> ContractResult<Self> {
        let coordinator = Self::new(settings);
        if !settings.audit_enabled() {
            tracing::debug!("Audit log disabled");
            return Ok(coordinator);
        }

        match open_audit_logger(settings) {
            Ok(logger) => Ok(coordinator.with_audit_logger(Arc::new(logger))),
            Err(err) => {
                tracing::warn!(
                    path = %settings.audit_db_path().display(),
                    error = %err,
                    "Audit log unavailable, continuing without it"
                );
                Ok(coordinator)
            }
        }
    }
}

/// Open the configured audit log, failing when it is disabled or unavailable.
pub fn open_audit_logger(settings: &Settings) -> ContractResult<AuditLogger> {
    if !settings.audit_enabled() {
        return Err(ContractError::Config(
            "Audit log is disabled (CONTRACT_SIGNER_AUDIT)".to_string(),
        ));
    }
    let storage = Storage::open(settings.audit_db_path())?;
    let logger = AuditLogger::open(storage)?;
    tracing::debug!(
        path = %settings.audit_db_path().display(),
        seq = logger.current_seq(),
        "Audit log opened"
    );
    Ok(logger)
}

impl<K: KeystoreAccessor, H: TemplateHasher> SigningCoordinator<K, H> {
    /// Coordinator with explicit collaborators.
    pub fn with_components(settings: &Settings, keystores: K, hasher: H) -> Self {
        Self {
            settings: settings.clone(),
            store: ManifestStore::from_settings(settings),
            keystores,
            hasher,
            engine: SignatureEngine::new(),
            audit_logger: None,
        }
    }

    /// Attach an audit logger.
    pub fn with_audit_logger(mut self, audit_logger: Arc<AuditLogger>) -> Self {
        self.audit_logger = Some(audit_logger);
        self
    }

    pub fn audit_logger(&self) -> Option<&Arc<AuditLogger>> {
        self.audit_logger.as_ref()
    }

    pub fn store(&self) -> &ManifestStore {
        &self.store
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Log an audit event if audit logging is enabled.
    fn audit_log(
        &self,
        event_type: AuditEventType,
        actor: AuditActor,
        template: &str,
        outcome: AuditOutcome,
        context: Option<serde_json::Value>,
    ) {
        if let Some(ref logger) = self.audit_logger
            && let Err(e) = logger.append(event_type, actor, template, outcome, context)
        {
            tracing::warn!(error = %e, template, "Failed to write audit log entry");
        }
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Current content hash of a template.
    pub fn hash_template(&self, template: &str) -> ContractResult<String> {
        let dir = self.settings.template_dir(template)?;
        if !dir.is_dir() {
            return Err(ContractError::TemplateNotFound(template.to_string()));
        }
        self.hasher.hash_template(&dir)
    }

    /// Sign the current content of `template` and append the record.
    pub fn sign(
        &self,
        signer: &str,
        role: SignerRole,
        password: &str,
        template: &str,
    ) -> ContractResult<SignatureRecord> {
        let result = self.sign_inner(signer, role, password, template);

        let context = result.as_ref().ok().map(|record| {
            serde_json::json!({
                "timestamp": record.timestamp,
                "template_hash": record.template_hash,
            })
        });
        self.audit_log(
            AuditEventType::ManifestSign,
            AuditActor::Signer {
                signer_id: signer.to_string(),
                role,
            },
            template,
            AuditOutcome::of(&result),
            context,
        );

        result
    }

    fn sign_inner(
        &self,
        signer: &str,
        role: SignerRole,
        password: &str,
        template: &str,
    ) -> ContractResult<SignatureRecord> {
        crate::config::validate_path_component("signer", signer)?;
        let _lock = self.store.lock(template)?;

        let template_hash = self.hash_template(template)?;
        let identity = self.keystores.open(role, signer, password)?;

        let timestamp = Utc::now().timestamp_millis();
        let payload = build_payload(&template_hash, timestamp);
        let signature_hex = self.engine.sign(&payload, &identity.private_key)?;

        let record = SignatureRecord {
            signer_id: signer.to_string(),
            role,
            signature_hex,
            timestamp,
            certificate_pem: identity.certificate_pem()?,
            template_hash: Some(template_hash),
        };

        let mut manifest = self.store.load_or_empty(template)?;
        manifest.append(record.clone());
        self.store.save(template, &manifest)?;

        tracing::info!(
            template,
            signer,
            %role,
            timestamp,
            records = manifest.len(),
            "Template signed"
        );
        Ok(record)
    }

    /// Verify every record of `template`, template authors first.
    ///
    /// Returns a report even when records fail; the `Err` path is reserved
    /// for missing files and unreadable manifests.
    pub fn verify(&self, template: &str, mode: VerifyMode) -> ContractResult<VerificationReport> {
        let result = self.verify_inner(template, mode);

        let (outcome, context) = match &result {
            Ok(report) => {
                let outcome = match report.first_failure() {
                    None => AuditOutcome::Success,
                    Some(failure) => AuditOutcome::Failure {
                        reason: format!("{}: {}", failure.signer_id, failure.status),
                    },
                };
                let context = serde_json::json!({
                    "mode": report.mode,
                    "evaluated": report.outcomes.len(),
                    "total": report.total_records,
                });
                (outcome, Some(context))
            }
            Err(_) => (AuditOutcome::of(&result), None),
        };
        self.audit_log(
            AuditEventType::ManifestVerify,
            AuditActor::System,
            template,
            outcome,
            context,
        );

        result
    }

    fn verify_inner(&self, template: &str, mode: VerifyMode) -> ContractResult<VerificationReport> {
        let template_hash = self.hash_template(template)?;
        let manifest = self.store.load(template)?;

        let mut outcomes = Vec::with_capacity(manifest.len());
        for record in manifest.records() {
            let status = self.check_record(record, &template_hash);
            let failed = !status.is_valid();

            if failed {
                tracing::warn!(
                    template,
                    signer = %record.signer_id,
                    role = %record.role,
                    status = %status,
                    "Signature verification failed"
                );
            } else {
                tracing::debug!(template, signer = %record.signer_id, "Signature valid");
            }

            outcomes.push(RecordOutcome {
                signer_id: record.signer_id.clone(),
                role: record.role,
                timestamp: record.timestamp,
                status,
            });

            if failed && mode == VerifyMode::FailFast {
                break;
            }
        }

        let report = VerificationReport {
            template: template.to_string(),
            template_hash,
            mode,
            total_records: manifest.len(),
            outcomes,
        };

        tracing::info!(
            template,
            valid = report.is_valid(),
            evaluated = report.outcomes.len(),
            total = report.total_records,
            "Manifest verified"
        );
        Ok(report)
    }

    /// Check one record against the current template hash.
    fn check_record(&self, record: &SignatureRecord, current_hash: &str) -> RecordStatus {
        let public_key = match certificate_public_key(&record.certificate_pem) {
            Ok(key) => key,
            Err(e) => {
                return RecordStatus::InvalidCertificate {
                    reason: e.to_string(),
                };
            }
        };

        // A record may only claim the hash it was signed over. When that
        // differs from the current hash the record can never be valid.
        if let Some(ref signed_hash) = record.template_hash
            && signed_hash != current_hash
        {
            let payload = build_payload(signed_hash, record.timestamp);
            if self
                .engine
                .verify(&payload, &record.signature_hex, &public_key)
            {
                return RecordStatus::TemplateModified {
                    signed_hash: signed_hash.clone(),
                };
            }
            return RecordStatus::InvalidSignature;
        }

        let payload = build_payload(current_hash, record.timestamp);
        if self
            .engine
            .verify(&payload, &record.signature_hex, &public_key)
        {
            RecordStatus::Valid
        } else {
            RecordStatus::InvalidSignature
        }
    }

    /// Clear the manifest of `template` to empty buckets. Idempotent.
    pub fn reset(&self, template: &str) -> ContractResult<()> {
        let result = self.reset_inner(template);
        self.audit_log(
            AuditEventType::ManifestReset,
            AuditActor::System,
            template,
            AuditOutcome::of(&result),
            None,
        );
        result
    }

    fn reset_inner(&self, template: &str) -> ContractResult<()> {
        let _lock = self.store.lock(template)?;
        self.store.reset(template)?;
        tracing::info!(template, "Manifest reset");
        Ok(())
    }

    /// Report signing progress against `policy`. A missing manifest is unsigned.
    pub fn status(&self, template: &str, policy: &SignerPolicy) -> ContractResult<StatusReport> {
        let dir = self.settings.template_dir(template)?;
        if !dir.is_dir() {
            return Err(ContractError::TemplateNotFound(template.to_string()));
        }

        let manifest = self.store.load_or_empty(template)?;
        Ok(StatusReport {
            template: template.to_string(),
            state: manifest.state(policy),
            parties: manifest.parties.len(),
            template_authors: manifest.template_authors.len(),
            missing: policy.missing(&manifest),
        })
    }
}
