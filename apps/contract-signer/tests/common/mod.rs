//! Shared fixtures: a temporary home with templates and PKCS#12 keystores.

#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;

use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::{X509, X509NameBuilder};
use tempfile::TempDir;

use contract_signer::{Settings, SignerRole, SigningCoordinator};

pub const TEMPLATE: &str = "helloworldstate";
pub const PASSWORD: &str = "123";

/// Key algorithm for a generated keystore.
#[derive(Debug, Clone, Copy)]
pub enum KeyKind {
    Rsa,
    Ec,
}

impl KeyKind {
    pub fn generate(self) -> PKey<Private> {
        match self {
            Self::Rsa => PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap(),
            Self::Ec => {
                let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
                PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
            }
        }
    }
}

/// Self-signed certificate for `key`.
pub fn self_signed(key: &PKey<Private>, common_name: &str) -> X509 {
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, common_name)
        .unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(7).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(365).unwrap())
        .unwrap();
    builder.sign(key, MessageDigest::sha256()).unwrap();
    builder.build()
}

/// A temporary signer home: `templates/`, `parties/`, `developers/`.
pub struct TestHome {
    pub temp: TempDir,
    pub settings: Settings,
}

impl TestHome {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let settings = Settings::for_tests(temp.path());
        let home = Self { temp, settings };
        home.add_template(TEMPLATE);
        home
    }

    pub fn coordinator(&self) -> SigningCoordinator {
        SigningCoordinator::new(&self.settings)
    }

    pub fn template_dir(&self, template: &str) -> PathBuf {
        self.settings.templates_dir().join(template)
    }

    pub fn manifest_path(&self, template: &str) -> PathBuf {
        self.template_dir(template)
            .join(self.settings.manifest_file())
    }

    /// Create a small template with nested content.
    pub fn add_template(&self, template: &str) {
        let dir = self.template_dir(template);
        fs::create_dir_all(dir.join("text")).unwrap();
        fs::create_dir_all(dir.join("model")).unwrap();
        fs::write(
            dir.join("package.json"),
            format!(r#"{{"name":"{template}","version":"0.1.0"}}"#),
        )
        .unwrap();
        fs::write(dir.join("text/grammar.tem.md"), "Hello {{name}}!\n").unwrap();
        fs::write(
            dir.join("model/model.cto"),
            "namespace org.accordproject.helloworld\n",
        )
        .unwrap();
    }

    /// Generate a keystore for `signer` and return its private key.
    pub fn add_keystore(
        &self,
        role: SignerRole,
        signer: &str,
        password: &str,
        kind: KeyKind,
    ) -> PKey<Private> {
        let key = kind.generate();
        let cert = self_signed(&key, signer);
        let der = Pkcs12::builder()
            .name(signer)
            .pkey(&key)
            .cert(&cert)
            .build2(password)
            .unwrap()
            .to_der()
            .unwrap();

        let path = self.settings.keystore_path(role, signer).unwrap();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, der).unwrap();
        key
    }

    pub fn read_manifest_json(&self, template: &str) -> serde_json::Value {
        let bytes = fs::read(self.manifest_path(template)).unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    pub fn write_manifest_json(&self, template: &str, value: &serde_json::Value) {
        fs::write(
            self.manifest_path(template),
            serde_json::to_vec_pretty(value).unwrap(),
        )
        .unwrap();
    }
}

/// Replace one base64 character in the body of a PEM block.
pub fn tamper_pem(pem: &str) -> String {
    let body_start = pem.find('\n').unwrap() + 1;
    // Fourth body line, away from the header and any padding
    let index = body_start + 3 * 65 + 5;
    let original = pem.as_bytes()[index] as char;
    assert!(original.is_ascii_alphanumeric() || original == '+' || original == '/');
    let replacement = if original == 'A' { "B" } else { "A" };

    let mut tampered = pem.to_string();
    tampered.replace_range(index..=index, replacement);
    tampered
}
