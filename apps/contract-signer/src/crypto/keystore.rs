//! PKCS#12 keystore access.
//!
//! A keystore bundles a signer's private key and certificate behind a
//! password. Keystores live at `<parties|developers>/<name>/<keystore_file>`.
//!
//! Passwords are held in [`KeystorePassword`] and zeroized on drop. They are
//! never accepted as positional arguments.

use std::fs;
use std::io::{BufRead, ErrorKind};
use std::path::Path;

use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::x509::X509;
use zeroize::Zeroizing;

use crate::config::{KEYSTORE_PASSWORD_ENV, Settings};
use crate::error::{ContractError, ContractResult};
use crate::manifest::SignerRole;

/// Keystore password, wiped from memory on drop.
pub type KeystorePassword = Zeroizing<String>;

/// Private key and certificate recovered from a keystore.
pub struct SignerIdentity {
    pub private_key: PKey<Private>,
    pub certificate: X509,
}

impl std::fmt::Debug for SignerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignerIdentity")
            .field("key_type", &self.private_key.id())
            .field("subject", &self.certificate.subject_name())
            .finish_non_exhaustive()
    }
}

impl SignerIdentity {
    /// The certificate as PEM text, as embedded in manifest records.
    pub fn certificate_pem(&self) -> ContractResult<String> {
        let pem = self.certificate.to_pem()?;
        String::from_utf8(pem)
            .map_err(|e| ContractError::Internal(format!("Certificate PEM is not UTF-8: {e}")))
    }
}

/// Source of signer key material.
pub trait KeystoreAccessor {
    /// Open the keystore of `signer` acting as `role`.
    fn open(&self, role: SignerRole, signer: &str, password: &str)
    -> ContractResult<SignerIdentity>;
}

/// Decrypt a DER-encoded PKCS#12 container.
///
/// The container must hold a private key and a certificate for that key.
pub fn decode_pkcs12(der: &[u8], password: &str) -> ContractResult<SignerIdentity> {
    let pkcs12 = Pkcs12::from_der(der).map_err(|e| {
        ContractError::KeystoreDecryption(format!("Not a PKCS#12 container: {e}"))
    })?;

    // Wrong passwords surface here as a MAC verification failure.
    let parsed = pkcs12.parse2(password).map_err(|e| {
        ContractError::KeystoreDecryption(format!("Wrong password or corrupt keystore: {e}"))
    })?;

    let private_key = parsed
        .pkey
        .ok_or_else(|| ContractError::KeystoreIncomplete("no private key".to_string()))?;
    let certificate = parsed
        .cert
        .ok_or_else(|| ContractError::KeystoreIncomplete("no certificate".to_string()))?;

    let certificate_key = certificate.public_key()?;
    if !private_key.public_eq(&*certificate_key) {
        return Err(ContractError::KeystoreIncomplete(
            "private key does not match certificate".to_string(),
        ));
    }

    Ok(SignerIdentity {
        private_key,
        certificate,
    })
}

/// Read and decrypt a keystore file.
pub fn open_keystore_file(path: &Path, password: &str) -> ContractResult<SignerIdentity> {
    let der = match fs::read(path) {
        Ok(der) => der,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(ContractError::KeystoreNotFound(path.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };
    decode_pkcs12(&der, password)
}

/// File-system keystores laid out per signer role.
#[derive(Debug, Clone)]
pub struct Pkcs12Keystores {
    settings: Settings,
}

impl Pkcs12Keystores {
    pub fn new(settings: &Settings) -> Self {
        Self {
            settings: settings.clone(),
        }
    }
}

impl KeystoreAccessor for Pkcs12Keystores {
    fn open(
        &self,
        role: SignerRole,
        signer: &str,
        password: &str,
    ) -> ContractResult<SignerIdentity> {
        let path = self.settings.keystore_path(role, signer)?;
        tracing::debug!(signer, %role, path = %path.display(), "Opening keystore");
        open_keystore_file(&path, password)
    }
}

/// Password from `CONTRACT_SIGNER_KEYSTORE_PASSWORD`, if set.
pub fn password_from_env() -> Option<KeystorePassword> {
    std::env::var(KEYSTORE_PASSWORD_ENV)
        .ok()
        .map(Zeroizing::new)
}

/// Read a password from the first line of `reader`, without its line ending.
pub fn read_password(mut reader: impl BufRead) -> ContractResult<KeystorePassword> {
    let mut line = Zeroizing::new(String::new());
    reader.read_line(&mut line)?;
    let trimmed = line.trim_end_matches(['\r', '\n']);
    Ok(Zeroizing::new(trimmed.to_string()))
}

/// Read a password from a file; only the first line is used.
pub fn read_password_file(path: &Path) -> ContractResult<KeystorePassword> {
    let file = fs::File::open(path).map_err(|e| {
        ContractError::InvalidInput(format!(
            "Cannot read password file {}: {e}",
            path.display()
        ))
    })?;
    read_password(std::io::BufReader::new(file))
}
