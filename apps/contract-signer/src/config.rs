//! Configuration derived from environment variables.
//!
//! Configuration is loaded once at startup and validated before any
//! command runs. All paths are derived from `CONTRACT_SIGNER_HOME` unless
//! overridden individually.
//!
//! ## Environment Variables
//!
//! ### Layout
//! - `CONTRACT_SIGNER_HOME`: Base directory (default: `.`)
//! - `CONTRACT_SIGNER_TEMPLATES_DIR`: Template directories (default: `<home>/templates`)
//! - `CONTRACT_SIGNER_PARTIES_DIR`: Party keystores (default: `<home>/parties`)
//! - `CONTRACT_SIGNER_DEVELOPERS_DIR`: Template author keystores (default: `<home>/developers`)
//! - `CONTRACT_SIGNER_KEYSTORE_FILE`: Keystore file name per signer (default: `keystore.p12`)
//! - `CONTRACT_SIGNER_MANIFEST_FILE`: Manifest file name per template (default: `manifest.json`)
//!
//! ### Behaviour
//! - `CONTRACT_SIGNER_VERIFY_MODE`: "fail_fast" or "collect_all" (default: fail_fast)
//! - `CONTRACT_SIGNER_REQUIRED_PARTIES`: Comma-separated party names expected to sign
//! - `CONTRACT_SIGNER_REQUIRED_AUTHORS`: Comma-separated template authors expected to sign
//!
//! ### Audit
//! - `CONTRACT_SIGNER_AUDIT`: Enable the audit log (default: true)
//! - `CONTRACT_SIGNER_AUDIT_DB_PATH`: ReDB file for the audit log (default: `<home>/.data/audit.redb`)
//!
//! ### Secrets and logging
//! - `CONTRACT_SIGNER_KEYSTORE_PASSWORD`: Keystore password (never passed as an argument)
//! - `CONTRACT_SIGNER_LOG_FORMAT`: "text" or "json"
//! - `RUST_LOG`: Log level filter

use std::env;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ContractError, ContractResult};
use crate::manifest::{SignerPolicy, SignerRole};

/// Environment variable holding the keystore password.
pub const KEYSTORE_PASSWORD_ENV: &str = "CONTRACT_SIGNER_KEYSTORE_PASSWORD";

const DEFAULT_KEYSTORE_FILE: &str = "keystore.p12";
const DEFAULT_MANIFEST_FILE: &str = "manifest.json";
const DEFAULT_AUDIT_DB: &str = ".data/audit.redb";

/// Helper to get trimmed env var or empty string.
fn env_trim(name: &str) -> String {
    env::var(name).unwrap_or_default().trim().to_string()
}

/// Helper to get lowercase env var.
fn env_lower(name: &str) -> String {
    env_trim(name).to_lowercase()
}

/// Check if a string value is falsy.
fn is_falsy(value: &str) -> bool {
    matches!(value.trim(), "0" | "false" | "no" | "off")
}

/// Optional path override, relative paths resolved against nothing.
fn env_path(name: &str) -> Option<PathBuf> {
    let value = env_trim(name);
    if value.is_empty() {
        None
    } else {
        Some(PathBuf::from(value))
    }
}

fn env_list(name: &str) -> Vec<String> {
    env_trim(name)
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Reject identifiers that would escape their parent directory.
pub fn validate_path_component(kind: &str, value: &str) -> ContractResult<()> {
    let mut components = Path::new(value).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(c)), None) if c == value => Ok(()),
        _ => Err(ContractError::InvalidInput(format!(
            "{kind} '{value}' must be a single path component"
        ))),
    }
}

/// How verification reacts to a failing record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VerifyMode {
    /// Stop at the first failing record.
    #[default]
    FailFast,
    /// Evaluate every record and report all failures.
    CollectAll,
}

impl FromStr for VerifyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "fail_fast" => Ok(Self::FailFast),
            "collect_all" => Ok(Self::CollectAll),
            other => Err(format!(
                "Invalid verify mode '{other}'. Must be 'fail_fast' or 'collect_all'."
            )),
        }
    }
}

impl std::fmt::Display for VerifyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FailFast => write!(f, "fail_fast"),
            Self::CollectAll => write!(f, "collect_all"),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "Invalid log format '{other}'. Must be 'text' or 'json'."
            )),
        }
    }
}

/// Signer configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    // Layout
    templates_dir: PathBuf,
    parties_dir: PathBuf,
    developers_dir: PathBuf,
    keystore_file: String,
    manifest_file: String,

    // Behaviour
    verify_mode: VerifyMode,
    verify_mode_raw: String,
    policy: SignerPolicy,

    // Audit
    audit_enabled: bool,
    audit_db_path: PathBuf,

    log_format: LogFormat,
    log_format_raw: String,
}

impl Settings {
    /// Load settings from environment variables.
    pub fn from_env() -> Self {
        let home = env_path("CONTRACT_SIGNER_HOME").unwrap_or_else(|| PathBuf::from("."));

        let templates_dir =
            env_path("CONTRACT_SIGNER_TEMPLATES_DIR").unwrap_or_else(|| home.join("templates"));
        let parties_dir =
            env_path("CONTRACT_SIGNER_PARTIES_DIR").unwrap_or_else(|| home.join("parties"));
        let developers_dir =
            env_path("CONTRACT_SIGNER_DEVELOPERS_DIR").unwrap_or_else(|| home.join("developers"));

        let keystore_file = env_trim("CONTRACT_SIGNER_KEYSTORE_FILE");
        let keystore_file = if keystore_file.is_empty() {
            DEFAULT_KEYSTORE_FILE.to_string()
        } else {
            keystore_file
        };

        let manifest_file = env_trim("CONTRACT_SIGNER_MANIFEST_FILE");
        let manifest_file = if manifest_file.is_empty() {
            DEFAULT_MANIFEST_FILE.to_string()
        } else {
            manifest_file
        };

        // Raw values are kept so validate() can reject typos
        let verify_mode_raw = env_trim("CONTRACT_SIGNER_VERIFY_MODE");
        let verify_mode = verify_mode_raw.parse::<VerifyMode>().unwrap_or_default();

        let policy = SignerPolicy {
            required_parties: env_list("CONTRACT_SIGNER_REQUIRED_PARTIES"),
            required_authors: env_list("CONTRACT_SIGNER_REQUIRED_AUTHORS"),
        };

        let audit_enabled = !is_falsy(&env_lower("CONTRACT_SIGNER_AUDIT"));
        let audit_db_path =
            env_path("CONTRACT_SIGNER_AUDIT_DB_PATH").unwrap_or_else(|| home.join(DEFAULT_AUDIT_DB));

        let log_format_raw = env_trim("CONTRACT_SIGNER_LOG_FORMAT");
        let log_format = log_format_raw.parse::<LogFormat>().unwrap_or_default();

        Self {
            templates_dir,
            parties_dir,
            developers_dir,
            keystore_file,
            manifest_file,
            verify_mode,
            verify_mode_raw,
            policy,
            audit_enabled,
            audit_db_path,
            log_format,
            log_format_raw,
        }
    }

    /// Create settings rooted at `home` for tests. Audit is disabled.
    pub fn for_tests(home: &Path) -> Self {
        Self {
            templates_dir: home.join("templates"),
            parties_dir: home.join("parties"),
            developers_dir: home.join("developers"),
            keystore_file: DEFAULT_KEYSTORE_FILE.to_string(),
            manifest_file: DEFAULT_MANIFEST_FILE.to_string(),
            verify_mode: VerifyMode::FailFast,
            verify_mode_raw: String::new(),
            policy: SignerPolicy::default(),
            audit_enabled: false,
            audit_db_path: home.join(DEFAULT_AUDIT_DB),
            log_format: LogFormat::Text,
            log_format_raw: String::new(),
        }
    }

    /// Validate settings.
    ///
    /// Returns an error message if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        validate_path_component("CONTRACT_SIGNER_KEYSTORE_FILE", &self.keystore_file)
            .map_err(|e| e.to_string())?;
        validate_path_component("CONTRACT_SIGNER_MANIFEST_FILE", &self.manifest_file)
            .map_err(|e| e.to_string())?;

        if self.manifest_file == self.keystore_file {
            return Err("CONTRACT_SIGNER_MANIFEST_FILE and CONTRACT_SIGNER_KEYSTORE_FILE \
                 must differ."
                .to_string());
        }

        if !self.verify_mode_raw.is_empty() {
            self.verify_mode_raw
                .parse::<VerifyMode>()
                .map_err(|e| format!("CONTRACT_SIGNER_VERIFY_MODE: {e}"))?;
        }
        if !self.log_format_raw.is_empty() {
            self.log_format_raw
                .parse::<LogFormat>()
                .map_err(|e| format!("CONTRACT_SIGNER_LOG_FORMAT: {e}"))?;
        }

        for name in self
            .policy
            .required_parties
            .iter()
            .chain(&self.policy.required_authors)
        {
            validate_path_component("required signer", name).map_err(|e| e.to_string())?;
        }

        Ok(())
    }

    // Builders used by tests and embedding callers

    #[must_use]
    pub fn with_verify_mode(mut self, verify_mode: VerifyMode) -> Self {
        self.verify_mode = verify_mode;
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: SignerPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_audit(mut self, enabled: bool) -> Self {
        self.audit_enabled = enabled;
        self
    }

    // Derived paths

    /// Directory holding a template's content and manifest.
    pub fn template_dir(&self, template: &str) -> ContractResult<PathBuf> {
        validate_path_component("template name", template)?;
        Ok(self.templates_dir.join(template))
    }

    /// Keystore for a signer, located by role.
    pub fn keystore_path(&self, role: SignerRole, signer: &str) -> ContractResult<PathBuf> {
        validate_path_component("signer name", signer)?;
        let base = match role {
            SignerRole::Party => &self.parties_dir,
            SignerRole::TemplateAuthor => &self.developers_dir,
        };
        Ok(base.join(signer).join(&self.keystore_file))
    }

    // Getters

    pub fn templates_dir(&self) -> &Path {
        &self.templates_dir
    }

    pub fn manifest_file(&self) -> &str {
        &self.manifest_file
    }

    pub fn verify_mode(&self) -> VerifyMode {
        self.verify_mode
    }

    pub fn policy(&self) -> &SignerPolicy {
        &self.policy
    }

    pub fn audit_enabled(&self) -> bool {
        self.audit_enabled
    }

    pub fn audit_db_path(&self) -> &Path {
        &self.audit_db_path
    }

    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }
}
