//! Manifest data model: signature records partitioned by signer role.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch.
pub type TimestampMillis = i64;

/// Classification of a signer, which selects the manifest bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SignerRole {
    /// A contracting party.
    Party,
    /// The author of the template.
    TemplateAuthor,
}

impl FromStr for SignerRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "party" => Ok(Self::Party),
            "templateauthor" | "author" => Ok(Self::TemplateAuthor),
            _ => Err(format!(
                "Invalid role '{s}'. Must be 'party' or 'template-author'."
            )),
        }
    }
}

impl std::fmt::Display for SignerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Party => write!(f, "party"),
            Self::TemplateAuthor => write!(f, "templateAuthor"),
        }
    }
}

/// One signature over a template, with everything needed to verify it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureRecord {
    /// Party name or template author identifier.
    pub signer_id: String,
    /// Bucket this record belongs to.
    pub role: SignerRole,
    /// Hex-encoded signature bytes.
    pub signature_hex: String,
    /// Signing time, bound into the signed payload.
    pub timestamp: TimestampMillis,
    /// The signer's certificate, so verification is self-contained.
    pub certificate_pem: String,
    /// Template hash at signing time. Absent on records migrated from the flat schema.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_hash: Option<String>,
}

/// Accumulated signatures for one template.
///
/// Append-only until reset; records keep call order within each bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    pub parties: Vec<SignatureRecord>,
    pub template_authors: Vec<SignatureRecord>,
}

impl Manifest {
    /// An empty manifest with both buckets present.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.parties.is_empty() && self.template_authors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.parties.len() + self.template_authors.len()
    }

    /// Append a record to the bucket selected by its role.
    pub fn append(&mut self, record: SignatureRecord) {
        match record.role {
            SignerRole::Party => self.parties.push(record),
            SignerRole::TemplateAuthor => self.template_authors.push(record),
        }
    }

    /// Records for one role, in signing order.
    pub fn bucket(&self, role: SignerRole) -> &[SignatureRecord] {
        match role {
            SignerRole::Party => &self.parties,
            SignerRole::TemplateAuthor => &self.template_authors,
        }
    }

    /// All records in verification order: template authors, then parties.
    pub fn records(&self) -> impl Iterator<Item = &SignatureRecord> {
        self.template_authors.iter().chain(self.parties.iter())
    }

    /// Whether `signer` has at least one record under `role`.
    pub fn has_signed(&self, role: SignerRole, signer: &str) -> bool {
        self.bucket(role).iter().any(|r| r.signer_id == signer)
    }

    /// Signing progress against a caller-defined expected signer set.
    pub fn state(&self, policy: &SignerPolicy) -> ManifestState {
        if self.is_empty() {
            return ManifestState::Unsigned;
        }

        let parties_done = policy
            .required_parties
            .iter()
            .all(|p| self.has_signed(SignerRole::Party, p));
        let authors_done = policy
            .required_authors
            .iter()
            .all(|a| self.has_signed(SignerRole::TemplateAuthor, a));

        if parties_done && authors_done {
            ManifestState::FullySigned
        } else {
            ManifestState::PartiallySigned
        }
    }
}

/// Expected signers for a template. The core never enforces this; it only reports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerPolicy {
    pub required_parties: Vec<String>,
    pub required_authors: Vec<String>,
}

impl SignerPolicy {
    /// Required signers not yet present in `manifest`.
    pub fn missing(&self, manifest: &Manifest) -> Vec<(SignerRole, String)> {
        let parties = self
            .required_parties
            .iter()
            .filter(|p| !manifest.has_signed(SignerRole::Party, p))
            .map(|p| (SignerRole::Party, p.clone()));
        let authors = self
            .required_authors
            .iter()
            .filter(|a| !manifest.has_signed(SignerRole::TemplateAuthor, a))
            .map(|a| (SignerRole::TemplateAuthor, a.clone()));
        authors.chain(parties).collect()
    }
}

/// Signing progress of a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestState {
    /// No records.
    Unsigned,
    /// At least one record, some expected signers missing.
    PartiallySigned,
    /// Every expected signer has a record.
    FullySigned,
}

impl std::fmt::Display for ManifestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unsigned => write!(f, "unsigned"),
            Self::PartiallySigned => write!(f, "partially_signed"),
            Self::FullySigned => write!(f, "fully_signed"),
        }
    }
}
