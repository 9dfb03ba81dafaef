//! End-to-end tests of the manifest signing protocol.
//!
//! These tests exercise sign, verify, reset and status through the real
//! PKCS#12 keystores and directory hasher in a temporary home.
//!
//! Run with: cargo test --test `manifest_signing`

mod common;

use std::fs;
use std::sync::Arc;

use common::{KeyKind, PASSWORD, TEMPLATE, TestHome, tamper_pem};
use contract_signer::audit::ChainStatus;
use contract_signer::crypto::{SignatureEngine, build_payload};
use contract_signer::storage::Storage;
use contract_signer::{
    ContractError, ManifestState, RecordStatus, SignerPolicy, SignerRole, SigningCoordinator,
    VerifyMode, open_audit_logger,
};

#[test]
fn test_scenario_sign_verify_then_tamper_certificate() {
    let home = TestHome::new();
    home.add_keystore(SignerRole::Party, "acme", PASSWORD, KeyKind::Rsa);
    let coordinator = home.coordinator();

    let record = coordinator
        .sign("acme", SignerRole::Party, PASSWORD, TEMPLATE)
        .unwrap();
    assert_eq!(record.signer_id, "acme");

    let manifest = home.read_manifest_json(TEMPLATE);
    assert_eq!(manifest["schemaVersion"], 2);
    let parties = manifest["signatures"]["parties"].as_array().unwrap();
    assert_eq!(parties.len(), 1);
    assert_eq!(parties[0]["partyName"], "acme");
    assert_eq!(parties[0]["timeStamp"], record.timestamp);
    assert!(
        manifest["signatures"]["templateAuthors"]
            .as_array()
            .unwrap()
            .is_empty()
    );

    let report = coordinator.verify(TEMPLATE, VerifyMode::FailFast).unwrap();
    assert!(report.is_valid());
    assert_eq!(report.outcomes.len(), 1);

    // Mutate the stored certificate by one character
    let mut manifest = manifest;
    let pem = manifest["signatures"]["parties"][0]["certificatePem"]
        .as_str()
        .unwrap()
        .to_string();
    manifest["signatures"]["parties"][0]["certificatePem"] = tamper_pem(&pem).into();
    home.write_manifest_json(TEMPLATE, &manifest);

    let report = coordinator.verify(TEMPLATE, VerifyMode::FailFast).unwrap();
    assert!(!report.is_valid());
    assert_eq!(report.first_failure().unwrap().signer_id, "acme");

    let err = report.into_result().unwrap_err();
    assert!(matches!(
        &err,
        ContractError::SignatureVerificationFailed { signer, .. } if signer == "acme"
    ));
    assert_eq!(err.exit_code(), 1);
}

#[test]
fn test_parties_grow_in_call_order() {
    let home = TestHome::new();
    home.add_keystore(SignerRole::Party, "acme", PASSWORD, KeyKind::Rsa);
    home.add_keystore(SignerRole::Party, "globex", PASSWORD, KeyKind::Ec);
    home.add_keystore(SignerRole::TemplateAuthor, "dan", "456", KeyKind::Ec);
    let coordinator = home.coordinator();

    for signer in ["acme", "globex", "acme"] {
        coordinator
            .sign(signer, SignerRole::Party, PASSWORD, TEMPLATE)
            .unwrap();
    }

    let manifest = coordinator.store().load(TEMPLATE).unwrap();
    let names: Vec<&str> = manifest
        .parties
        .iter()
        .map(|r| r.signer_id.as_str())
        .collect();
    assert_eq!(names, vec!["acme", "globex", "acme"]);
    assert!(manifest.template_authors.is_empty());

    coordinator
        .sign("dan", SignerRole::TemplateAuthor, "456", TEMPLATE)
        .unwrap();
    let manifest = coordinator.store().load(TEMPLATE).unwrap();
    assert_eq!(manifest.parties.len(), 3);
    assert_eq!(manifest.template_authors.len(), 1);

    let json = home.read_manifest_json(TEMPLATE);
    assert_eq!(json["signatures"]["templateAuthors"][0]["templateAuthor"], "dan");
    assert!(json["signatures"]["templateAuthors"][0]["templateHash"].is_string());

    let report = coordinator
        .verify(TEMPLATE, VerifyMode::CollectAll)
        .unwrap();
    assert!(report.is_valid());
    assert_eq!(report.outcomes.len(), 4);
    assert_eq!(report.outcomes[0].signer_id, "dan");
}

#[test]
fn test_reset_is_idempotent_and_verifies_vacuously() {
    let home = TestHome::new();
    home.add_keystore(SignerRole::Party, "acme", PASSWORD, KeyKind::Rsa);
    let coordinator = home.coordinator();

    coordinator
        .sign("acme", SignerRole::Party, PASSWORD, TEMPLATE)
        .unwrap();

    coordinator.reset(TEMPLATE).unwrap();
    let first = fs::read(home.manifest_path(TEMPLATE)).unwrap();
    coordinator.reset(TEMPLATE).unwrap();
    let second = fs::read(home.manifest_path(TEMPLATE)).unwrap();
    assert_eq!(first, second);

    let manifest = coordinator.store().load(TEMPLATE).unwrap();
    assert!(manifest.is_empty());

    let report = coordinator.verify(TEMPLATE, VerifyMode::FailFast).unwrap();
    assert!(report.is_valid());
    assert!(report.outcomes.is_empty());

    // Verified is not the same as signed.
    let status = coordinator
        .status(TEMPLATE, &SignerPolicy::default())
        .unwrap();
    assert_eq!(status.state, ManifestState::Unsigned);
}

#[test]
fn test_fail_fast_skips_records_after_first_failure() {
    let home = TestHome::new();
    for signer in ["acme", "globex", "initech"] {
        home.add_keystore(SignerRole::Party, signer, PASSWORD, KeyKind::Rsa);
    }
    let coordinator = home.coordinator();
    for signer in ["acme", "globex", "initech"] {
        coordinator
            .sign(signer, SignerRole::Party, PASSWORD, TEMPLATE)
            .unwrap();
    }

    let mut manifest = home.read_manifest_json(TEMPLATE);
    let timestamp = manifest["signatures"]["parties"][1]["timeStamp"]
        .as_i64()
        .unwrap();
    manifest["signatures"]["parties"][1]["timeStamp"] = (timestamp + 1).into();
    home.write_manifest_json(TEMPLATE, &manifest);

    let report = coordinator.verify(TEMPLATE, VerifyMode::FailFast).unwrap();
    assert_eq!(report.outcomes.len(), 2);
    assert!(report.outcomes[0].status.is_valid());
    assert_eq!(report.outcomes[1].signer_id, "globex");
    assert_eq!(report.outcomes[1].status, RecordStatus::InvalidSignature);
    assert_eq!(report.skipped(), 1);

    let report = coordinator
        .verify(TEMPLATE, VerifyMode::CollectAll)
        .unwrap();
    assert_eq!(report.outcomes.len(), 3);
    let failing: Vec<&str> = report
        .failures()
        .map(|o| o.signer_id.as_str())
        .collect();
    assert_eq!(failing, vec!["globex"]);
}

#[test]
fn test_collect_all_reports_every_failure() {
    let home = TestHome::new();
    home.add_keystore(SignerRole::Party, "acme", PASSWORD, KeyKind::Ec);
    home.add_keystore(SignerRole::Party, "globex", PASSWORD, KeyKind::Rsa);
    let coordinator = home.coordinator();
    for signer in ["acme", "globex"] {
        coordinator
            .sign(signer, SignerRole::Party, PASSWORD, TEMPLATE)
            .unwrap();
    }

    let mut manifest = home.read_manifest_json(TEMPLATE);
    for i in 0..2 {
        let signature = manifest["signatures"]["parties"][i]["signature"]
            .as_str()
            .unwrap()
            .to_string();
        let flipped = if signature.ends_with('0') { "1" } else { "0" };
        let tampered = format!("{}{flipped}", &signature[..signature.len() - 1]);
        manifest["signatures"]["parties"][i]["signature"] = tampered.into();
    }
    home.write_manifest_json(TEMPLATE, &manifest);

    let report = coordinator
        .verify(TEMPLATE, VerifyMode::CollectAll)
        .unwrap();
    assert_eq!(report.failures().count(), 2);
    assert_eq!(report.skipped(), 0);
}

#[test]
fn test_template_change_reported_as_modified() {
    let home = TestHome::new();
    home.add_keystore(SignerRole::Party, "acme", PASSWORD, KeyKind::Rsa);
    let coordinator = home.coordinator();

    let before = coordinator.hash_template(TEMPLATE).unwrap();
    coordinator
        .sign("acme", SignerRole::Party, PASSWORD, TEMPLATE)
        .unwrap();
    // Signing writes the manifest but leaves the template hash alone.
    assert_eq!(coordinator.hash_template(TEMPLATE).unwrap(), before);

    fs::write(
        home.template_dir(TEMPLATE).join("text/grammar.tem.md"),
        "Hello {{name}}, you owe me!\n",
    )
    .unwrap();
    assert_ne!(coordinator.hash_template(TEMPLATE).unwrap(), before);

    let report = coordinator.verify(TEMPLATE, VerifyMode::FailFast).unwrap();
    assert_eq!(
        report.outcomes[0].status,
        RecordStatus::TemplateModified {
            signed_hash: before
        }
    );
    let err = report.into_result().unwrap_err();
    assert!(matches!(err, ContractError::TemplateModified { ref signer } if signer == "acme"));
    assert_eq!(err.exit_code(), 1);
}

#[test]
fn test_edited_template_hash_is_not_accepted() {
    let home = TestHome::new();
    home.add_keystore(SignerRole::Party, "acme", PASSWORD, KeyKind::Rsa);
    let coordinator = home.coordinator();
    coordinator
        .sign("acme", SignerRole::Party, PASSWORD, TEMPLATE)
        .unwrap();

    // Rewrite the recorded hash while the template stays as signed
    let mut manifest = home.read_manifest_json(TEMPLATE);
    let hash = manifest["signatures"]["parties"][0]["templateHash"]
        .as_str()
        .unwrap()
        .to_string();
    let flipped = if hash.starts_with('0') { "1" } else { "0" };
    manifest["signatures"]["parties"][0]["templateHash"] =
        format!("{flipped}{}", &hash[1..]).into();
    home.write_manifest_json(TEMPLATE, &manifest);

    let report = coordinator.verify(TEMPLATE, VerifyMode::FailFast).unwrap();
    assert!(!report.is_valid());
    assert_eq!(report.outcomes[0].status, RecordStatus::InvalidSignature);
    assert_eq!(report.into_result().unwrap_err().exit_code(), 1);
}

#[test]
fn test_hidden_template_files_are_signed() {
    let home = TestHome::new();
    let dir = home.template_dir(TEMPLATE);
    fs::create_dir_all(dir.join(".logic")).unwrap();
    fs::write(dir.join(".logic/logic.ergo"), "return Pay{ amount: 1 }\n").unwrap();
    home.add_keystore(SignerRole::Party, "acme", PASSWORD, KeyKind::Rsa);
    let coordinator = home.coordinator();

    let signed = coordinator
        .sign("acme", SignerRole::Party, PASSWORD, TEMPLATE)
        .unwrap();
    assert!(coordinator.verify(TEMPLATE, VerifyMode::FailFast).unwrap().is_valid());

    fs::write(dir.join(".logic/logic.ergo"), "return Pay{ amount: 1000000 }\n").unwrap();
    let report = coordinator.verify(TEMPLATE, VerifyMode::FailFast).unwrap();
    assert!(matches!(
        report.outcomes[0].status,
        RecordStatus::TemplateModified { .. }
    ));

    // Restoring the file is not enough once a new hidden file appears
    fs::write(dir.join(".logic/logic.ergo"), "return Pay{ amount: 1 }\n").unwrap();
    assert_eq!(
        coordinator.hash_template(TEMPLATE).unwrap(),
        signed.template_hash.clone().unwrap()
    );
    fs::write(dir.join(".env"), "AMOUNT=1000000\n").unwrap();
    let report = coordinator.verify(TEMPLATE, VerifyMode::FailFast).unwrap();
    assert!(!report.is_valid());
}

#[test]
fn test_wrong_password_does_not_touch_manifest() {
    let home = TestHome::new();
    home.add_keystore(SignerRole::Party, "acme", PASSWORD, KeyKind::Rsa);
    let coordinator = home.coordinator();

    coordinator
        .sign("acme", SignerRole::Party, PASSWORD, TEMPLATE)
        .unwrap();
    let before = fs::read(home.manifest_path(TEMPLATE)).unwrap();

    let err = coordinator
        .sign("acme", SignerRole::Party, "124", TEMPLATE)
        .unwrap_err();
    assert!(matches!(err, ContractError::KeystoreDecryption(_)));
    assert_eq!(err.exit_code(), 3);
    assert_eq!(fs::read(home.manifest_path(TEMPLATE)).unwrap(), before);
}

#[test]
fn test_missing_inputs() {
    let home = TestHome::new();
    home.add_keystore(SignerRole::Party, "acme", PASSWORD, KeyKind::Rsa);
    let coordinator = home.coordinator();

    let err = coordinator
        .sign("acme", SignerRole::Party, PASSWORD, "no-such-template")
        .unwrap_err();
    assert!(matches!(err, ContractError::TemplateNotFound(_)));
    assert_eq!(err.exit_code(), 4);

    // Keystores are looked up by role.
    assert!(matches!(
        coordinator.sign("acme", SignerRole::TemplateAuthor, PASSWORD, TEMPLATE),
        Err(ContractError::KeystoreNotFound(_))
    ));

    assert!(matches!(
        coordinator.verify(TEMPLATE, VerifyMode::FailFast),
        Err(ContractError::ManifestNotFound(_))
    ));
}

#[test]
fn test_corrupt_manifest_is_reported() {
    let home = TestHome::new();
    home.add_keystore(SignerRole::Party, "acme", PASSWORD, KeyKind::Rsa);
    let coordinator = home.coordinator();

    fs::write(home.manifest_path(TEMPLATE), "{ not json").unwrap();
    let err = coordinator
        .verify(TEMPLATE, VerifyMode::FailFast)
        .unwrap_err();
    assert!(matches!(err, ContractError::ManifestCorrupt { .. }));
    assert_eq!(err.exit_code(), 5);

    // Signing refuses to overwrite what it cannot read.
    assert!(matches!(
        coordinator.sign("acme", SignerRole::Party, PASSWORD, TEMPLATE),
        Err(ContractError::ManifestCorrupt { .. })
    ));
}

#[test]
fn test_legacy_manifest_is_verified_and_migrated() {
    let home = TestHome::new();
    let key = home.add_keystore(SignerRole::Party, "acme", PASSWORD, KeyKind::Rsa);
    home.add_keystore(SignerRole::Party, "globex", PASSWORD, KeyKind::Ec);
    let coordinator = home.coordinator();

    // A flat-array manifest signed over the current template content
    let hash = coordinator.hash_template(TEMPLATE).unwrap();
    let timestamp = 1_612_345_678_901_i64;
    let signature = SignatureEngine::new()
        .sign(&build_payload(&hash, timestamp), &key)
        .unwrap();
    let certificate = String::from_utf8(common::self_signed(&key, "acme").to_pem().unwrap())
        .unwrap();
    let legacy = serde_json::json!({
        "signatures": [{
            "partyName": "acme",
            "signature": signature,
            "timeStamp": timestamp,
            "certificateString": certificate,
        }]
    });
    home.write_manifest_json(TEMPLATE, &legacy);

    let report = coordinator.verify(TEMPLATE, VerifyMode::FailFast).unwrap();
    assert!(report.is_valid());
    assert_eq!(report.outcomes.len(), 1);

    coordinator
        .sign("globex", SignerRole::Party, PASSWORD, TEMPLATE)
        .unwrap();
    let migrated = home.read_manifest_json(TEMPLATE);
    assert_eq!(migrated["schemaVersion"], 2);
    let parties = migrated["signatures"]["parties"].as_array().unwrap();
    assert_eq!(parties.len(), 2);
    assert_eq!(parties[0]["partyName"], "acme");
    assert_eq!(parties[0]["certificatePem"], certificate.as_str());
    assert!(parties[0].get("templateHash").is_none());
    assert_eq!(parties[1]["partyName"], "globex");

    assert!(
        coordinator
            .verify(TEMPLATE, VerifyMode::CollectAll)
            .unwrap()
            .is_valid()
    );
}

#[test]
fn test_status_follows_policy() {
    let home = TestHome::new();
    home.add_keystore(SignerRole::Party, "acme", PASSWORD, KeyKind::Rsa);
    home.add_keystore(SignerRole::TemplateAuthor, "dan", PASSWORD, KeyKind::Ec);
    let coordinator = home.coordinator();
    let policy = SignerPolicy {
        required_parties: vec!["acme".to_string()],
        required_authors: vec!["dan".to_string()],
    };

    coordinator
        .sign("acme", SignerRole::Party, PASSWORD, TEMPLATE)
        .unwrap();
    let status = coordinator.status(TEMPLATE, &policy).unwrap();
    assert_eq!(status.state, ManifestState::PartiallySigned);
    assert_eq!(
        status.missing,
        vec![(SignerRole::TemplateAuthor, "dan".to_string())]
    );

    coordinator
        .sign("dan", SignerRole::TemplateAuthor, PASSWORD, TEMPLATE)
        .unwrap();
    let status = coordinator.status(TEMPLATE, &policy).unwrap();
    assert_eq!(status.state, ManifestState::FullySigned);
    assert!(status.missing.is_empty());
}

#[test]
fn test_concurrent_signers_are_all_recorded() {
    let home = TestHome::new();
    let signers = ["acme", "globex", "initech", "umbrella"];
    for signer in signers {
        home.add_keystore(SignerRole::Party, signer, PASSWORD, KeyKind::Ec);
    }
    let coordinator = home.coordinator();

    std::thread::scope(|scope| {
        for signer in signers {
            let coordinator = &coordinator;
            scope.spawn(move || {
                coordinator
                    .sign(signer, SignerRole::Party, PASSWORD, TEMPLATE)
                    .unwrap();
            });
        }
    });

    let manifest = coordinator.store().load(TEMPLATE).unwrap();
    assert_eq!(manifest.parties.len(), signers.len());
    for signer in signers {
        assert!(manifest.has_signed(SignerRole::Party, signer));
    }
}

#[test]
fn test_audit_log_survives_reopen() {
    let home = TestHome::new();
    home.add_keystore(SignerRole::Party, "acme", PASSWORD, KeyKind::Rsa);
    let settings = home.settings.clone().with_audit(true);

    {
        let coordinator = SigningCoordinator::from_settings(&settings).unwrap();
        coordinator
            .sign("acme", SignerRole::Party, PASSWORD, TEMPLATE)
            .unwrap();
        coordinator.verify(TEMPLATE, VerifyMode::FailFast).unwrap();
    }

    let coordinator = SigningCoordinator::from_settings(&settings).unwrap();
    coordinator.reset(TEMPLATE).unwrap();

    let logger = Arc::clone(coordinator.audit_logger().unwrap());
    assert_eq!(logger.current_seq(), 3);
    assert_eq!(
        logger.verify_all().unwrap(),
        ChainStatus::Intact { entries: 3 }
    );

    let entries = logger.list_entries(1, 3).unwrap();
    assert!(entries.iter().all(|e| e.template == TEMPLATE));
}

#[test]
fn test_signing_continues_when_audit_log_is_held() {
    let home = TestHome::new();
    home.add_keystore(SignerRole::Party, "acme", PASSWORD, KeyKind::Rsa);
    let settings = home.settings.clone().with_audit(true);

    // Another holder of the database, as a concurrent process would be
    let _held = Storage::open(settings.audit_db_path()).unwrap();

    let coordinator = SigningCoordinator::from_settings(&settings).unwrap();
    assert!(coordinator.audit_logger().is_none());
    coordinator
        .sign("acme", SignerRole::Party, PASSWORD, TEMPLATE)
        .unwrap();
    assert!(coordinator.verify(TEMPLATE, VerifyMode::FailFast).unwrap().is_valid());

    // Inspecting the log still requires it
    assert!(matches!(
        open_audit_logger(&settings),
        Err(ContractError::Storage(_))
    ));
}
