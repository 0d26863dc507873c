//! Integration tests for signing, listing, removing and verifying signatures

mod common;

use ::common::crypto::{DigestAlgorithm, KeyFamily};
use ::common::package::{OpenMode, Package, PartUri, RelationshipOwner};
use ::common::signing::{
    CertificateSource, SignConfig, SignError, VerifyError, ORIGIN_PART_NAME,
    ORIGIN_RELATIONSHIP_TYPE, SIGNATURE_CONTENT_TYPE,
};
use chrono::{TimeZone, Utc};
use common::TestCertificate;

fn uri(name: &str) -> PartUri {
    PartUri::parse(name).unwrap()
}

/// Sign a fresh sample package, close it, and return its location
fn sign_sample(
    cert: &TestCertificate,
    file_digest: DigestAlgorithm,
    pkcs_digest: DigestAlgorithm,
) -> (tempfile::TempDir, std::path::PathBuf) {
    let (dir, path) = common::sample_package();
    let mut package = Package::open(&path, OpenMode::ReadWrite).unwrap();
    let mut builder = package.signature_builder();
    builder.enqueue_defaults();
    builder
        .sign(&cert.config(file_digest, pkcs_digest))
        .unwrap();
    package.close().unwrap();
    (dir, path)
}

fn assert_signed_and_valid(path: &std::path::Path, expected_method: &str) {
    let mut package = Package::open(path, OpenMode::Read).unwrap();
    let signatures = package.signatures().unwrap();
    assert_eq!(signatures.len(), 1);
    let signature = &signatures[0];
    assert_eq!(signature.signature_method(), Some(expected_method));
    signature.verify(&mut package).unwrap();
}

#[test]
fn test_sign_with_rsa() {
    let cases = [
        (DigestAlgorithm::Sha1, "http://www.w3.org/2000/09/xmldsig#rsa-sha1"),
        (DigestAlgorithm::Sha256, "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256"),
        (DigestAlgorithm::Sha384, "http://www.w3.org/2001/04/xmldsig-more#rsa-sha384"),
        (DigestAlgorithm::Sha512, "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512"),
    ];
    for (digest, method) in cases {
        let (_dir, path) = sign_sample(common::rsa_certificate(), digest, digest);
        assert_signed_and_valid(&path, method);
    }
}

#[test]
fn test_sign_with_ecdsa_p256() {
    let cases = [
        (DigestAlgorithm::Sha1, "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha1"),
        (DigestAlgorithm::Sha256, "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha256"),
        (DigestAlgorithm::Sha384, "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha384"),
        (DigestAlgorithm::Sha512, "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha512"),
    ];
    for (digest, method) in cases {
        let (_dir, path) = sign_sample(common::p256_certificate(), DigestAlgorithm::Sha256, digest);
        assert_signed_and_valid(&path, method);
    }
}

#[test]
fn test_sign_with_ecdsa_p384() {
    let cases = [
        (DigestAlgorithm::Sha256, "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha256"),
        (DigestAlgorithm::Sha384, "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha384"),
        (DigestAlgorithm::Sha512, "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha512"),
    ];
    for (digest, method) in cases {
        let (_dir, path) = sign_sample(common::p384_certificate(), digest, digest);
        assert_signed_and_valid(&path, method);
    }
}

#[test]
fn test_p384_with_sha1_is_unsupported_and_leaves_no_trace() {
    let (_dir, path) = common::sample_package();
    let original = std::fs::read(&path).unwrap();
    let mut package = Package::open(&path, OpenMode::ReadWrite).unwrap();
    let mut builder = package.signature_builder();
    builder.enqueue_defaults();
    let result = builder.sign(
        &common::p384_certificate().config(DigestAlgorithm::Sha256, DigestAlgorithm::Sha1),
    );
    assert!(matches!(result, Err(SignError::UnsupportedAlgorithm(_))));
    assert!(!package.contains_part(&uri(ORIGIN_PART_NAME)));
    package.close().unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), original);
}

#[test]
fn test_md5_file_digest_is_unsupported() {
    let (_dir, path) = common::sample_package();
    let mut package = Package::open(&path, OpenMode::ReadWrite).unwrap();
    let mut builder = package.signature_builder();
    builder.enqueue_defaults();
    let result = builder.sign(
        &common::rsa_certificate().config(DigestAlgorithm::Md5, DigestAlgorithm::Sha256),
    );
    assert!(matches!(result, Err(SignError::UnsupportedAlgorithm(_))));
}

#[test]
fn test_signature_layout_in_container() {
    let cert = common::p256_certificate();
    let (_dir, path) = sign_sample(cert, DigestAlgorithm::Sha256, DigestAlgorithm::Sha256);
    let names = common::entry_names(&path);
    assert!(names.contains(&"package/services/digital-signature/origin.psdor".to_string()));
    assert!(names.contains(&"package/services/digital-signature/_rels/origin.psdor.rels".to_string()));

    let mut package = Package::open(&path, OpenMode::Read).unwrap();
    let signatures = package.signatures().unwrap();
    let signature = &signatures[0];
    let certificate = signature.certificate().unwrap();
    assert_eq!(certificate.key_family(), KeyFamily::EcdsaP256);
    assert_eq!(
        signature.part().unwrap().as_str(),
        format!(
            "/package/services/digital-signature/xml-signature/{}.psdsxs",
            certificate.thumbprint()
        )
    );
    assert_eq!(
        package.media_type(signature.part().unwrap()),
        SIGNATURE_CONTENT_TYPE
    );
    assert_eq!(
        package.media_type(&uri(ORIGIN_PART_NAME)),
        "application/vnd.openxmlformats-package.digital-signature-origin"
    );
    assert!(signature.signing_time().is_some());
}

#[test]
fn test_manifest_covers_enqueued_and_structural_parts() {
    let cert = common::rsa_certificate();
    let (_dir, path) = sign_sample(cert, DigestAlgorithm::Sha256, DigestAlgorithm::Sha256);
    let mut package = Package::open(&path, OpenMode::Read).unwrap();
    let signature = package.signatures().unwrap().remove(0);
    let manifest = signature.document().manifest().unwrap();

    let parts: Vec<&str> = manifest
        .entries()
        .iter()
        .map(|entry| entry.part.as_str())
        .collect();
    assert_eq!(
        parts,
        vec![
            "/[Content_Types].xml",
            "/_rels/.rels",
            "/bin/Sample.Tool.dll",
            "/catalog.json",
            "/extension.vsixmanifest",
            "/package/services/digital-signature/_rels/origin.psdor.rels",
            "/package/services/digital-signature/origin.psdor",
        ]
    );
    let catalog = manifest
        .entries()
        .iter()
        .find(|entry| entry.part == uri("/catalog.json"))
        .unwrap();
    assert_eq!(catalog.reference_uri(), "/catalog.json?ContentType=application/json");
    assert!(manifest
        .entries()
        .iter()
        .all(|entry| entry.digest_algorithm == DigestAlgorithm::Sha256));
}

#[test]
fn test_signing_is_deterministic_for_identical_input() {
    let cert = common::rsa_certificate();
    let time = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
    let config = cert.config(DigestAlgorithm::Sha256, DigestAlgorithm::Sha256);
    let (_dir, path) = common::sample_package();
    let mut package = Package::open(&path, OpenMode::ReadWrite).unwrap();

    let mut builder = package.signature_builder();
    builder.enqueue_defaults();
    let first = builder.sign_at(&config, time).unwrap();

    // re-signing reuses the origin and signature relationships, so every
    // protected part is byte-identical the second time around
    let mut builder = package.signature_builder();
    builder.enqueue_defaults();
    let second = builder.sign_at(&config.with_force(true), time).unwrap();

    assert_eq!(
        first.document().manifest().unwrap(),
        second.document().manifest().unwrap()
    );
    assert_eq!(first.document().to_bytes(), second.document().to_bytes());
    assert_eq!(first.signing_time(), Some(time));
}

#[test]
fn test_signing_does_not_touch_file_before_close() {
    let (_dir, path) = common::sample_package();
    let original = std::fs::read(&path).unwrap();
    let mut package = Package::open(&path, OpenMode::ReadWrite).unwrap();
    let mut builder = package.signature_builder();
    builder.enqueue_defaults();
    builder
        .sign(&common::p256_certificate().config(DigestAlgorithm::Sha256, DigestAlgorithm::Sha256))
        .unwrap();
    assert_eq!(package.signatures().unwrap().len(), 1);
    assert_eq!(std::fs::read(&path).unwrap(), original);

    package.close().unwrap();
    assert_ne!(std::fs::read(&path).unwrap(), original);
}

#[test]
fn test_already_signed_requires_force() {
    let cert = common::p256_certificate();
    let (_dir, path) = sign_sample(cert, DigestAlgorithm::Sha256, DigestAlgorithm::Sha256);

    let mut package = Package::open(&path, OpenMode::ReadWrite).unwrap();
    let mut builder = package.signature_builder();
    builder.enqueue_defaults();
    let result = builder.sign(&cert.config(DigestAlgorithm::Sha256, DigestAlgorithm::Sha256));
    assert!(matches!(result, Err(SignError::AlreadySigned)));
}

#[test]
fn test_resign_with_different_certificate() {
    let (_dir, path) = sign_sample(
        common::rsa_certificate(),
        DigestAlgorithm::Sha1,
        DigestAlgorithm::Sha1,
    );
    let first_part = {
        let mut package = Package::open(&path, OpenMode::Read).unwrap();
        package.signatures().unwrap()[0].part().unwrap().clone()
    };

    let other = common::other_rsa_certificate();
    {
        let mut package = Package::open(&path, OpenMode::ReadWrite).unwrap();
        let mut builder = package.signature_builder();
        builder.enqueue_defaults();
        builder
            .sign(
                &other
                    .config(DigestAlgorithm::Sha256, DigestAlgorithm::Sha256)
                    .with_force(true),
            )
            .unwrap();
        package.close().unwrap();
    }

    let mut package = Package::open(&path, OpenMode::Read).unwrap();
    let signatures = package.signatures().unwrap();
    assert_eq!(signatures.len(), 1);
    let signature = &signatures[0];
    // the existing signature part is overwritten in place
    assert_eq!(signature.part().unwrap(), &first_part);
    assert_eq!(
        signature.signature_method(),
        Some("http://www.w3.org/2001/04/xmldsig-more#rsa-sha256")
    );
    let first_thumbprint = first_part.file_name().trim_end_matches(".psdsxs").to_string();
    assert_ne!(signature.certificate().unwrap().thumbprint(), first_thumbprint);
    signature.verify(&mut package).unwrap();

    let signature_parts = package
        .parts()
        .filter(|part| part.uri().extension() == Some("psdsxs"))
        .count();
    assert_eq!(signature_parts, 1);
}

#[test]
fn test_remove_signature() {
    let cert = common::rsa_certificate();
    let (_dir, path) = sign_sample(cert, DigestAlgorithm::Sha256, DigestAlgorithm::Sha256);

    {
        let mut package = Package::open(&path, OpenMode::ReadWrite).unwrap();
        let mut signatures = package.signatures().unwrap();
        assert_eq!(signatures.len(), 1);
        let signature = &mut signatures[0];
        let part = signature.part().unwrap().clone();

        signature.remove(&mut package).unwrap();
        assert!(signature.part().is_none());
        assert!(!package.contains_part(&part));
        assert!(matches!(
            signature.timestamp_builder(),
            Err(SignError::InvalidOperation(_))
        ));
        assert!(matches!(
            signature.verify(&mut package),
            Err(VerifyError::InvalidOperation(_))
        ));
        assert!(matches!(
            signature.remove(&mut package),
            Err(SignError::InvalidOperation(_))
        ));
        assert!(package.signatures().unwrap().is_empty());
        package.close().unwrap();
    }

    let mut package = Package::open(&path, OpenMode::Read).unwrap();
    assert!(package.signatures().unwrap().is_empty());
    assert!(!common::entry_names(&path)
        .iter()
        .any(|name| name.ends_with(".psdsxs")));
    // the origin stays, so a later sign reuses it
    assert!(package
        .find_relationship_by_type(&RelationshipOwner::Package, ORIGIN_RELATIONSHIP_TYPE)
        .unwrap()
        .is_some());
}

#[test]
fn test_sign_after_remove_reuses_origin() {
    let cert = common::p256_certificate();
    let (_dir, path) = sign_sample(cert, DigestAlgorithm::Sha256, DigestAlgorithm::Sha256);
    {
        let mut package = Package::open(&path, OpenMode::ReadWrite).unwrap();
        let mut signatures = package.signatures().unwrap();
        signatures[0].remove(&mut package).unwrap();
        package.close().unwrap();
    }

    let mut package = Package::open(&path, OpenMode::ReadWrite).unwrap();
    let mut builder = package.signature_builder();
    builder.enqueue_defaults();
    builder
        .sign(&cert.config(DigestAlgorithm::Sha256, DigestAlgorithm::Sha256))
        .unwrap();
    let origins = package
        .relationships(&RelationshipOwner::Package)
        .unwrap()
        .iter()
        .filter(|rel| rel.relationship_type == ORIGIN_RELATIONSHIP_TYPE)
        .count();
    assert_eq!(origins, 1);
    package.close().unwrap();
    assert_signed_and_valid(&path, "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha256");
}

#[test]
fn test_tampered_part_fails_verification() {
    let cert = common::rsa_certificate();
    let (_dir, path) = sign_sample(cert, DigestAlgorithm::Sha256, DigestAlgorithm::Sha256);

    let mut package = Package::open(&path, OpenMode::ReadWrite).unwrap();
    package
        .write_part(&uri("/catalog.json"), br#"{"manifestVersion":"6.6"}"#.to_vec())
        .unwrap();
    let signatures = package.signatures().unwrap();
    match signatures[0].verify(&mut package) {
        Err(VerifyError::DigestMismatch(part)) => assert_eq!(part, "/catalog.json"),
        other => panic!("expected digest mismatch, got {other:?}"),
    }
}

#[test]
fn test_empty_enqueue_set_is_invalid() {
    let (_dir, path) = common::sample_package();
    let mut package = Package::open(&path, OpenMode::ReadWrite).unwrap();
    let result = package
        .signature_builder()
        .sign(&common::p256_certificate().config(DigestAlgorithm::Sha256, DigestAlgorithm::Sha256));
    assert!(matches!(result, Err(SignError::InvalidOperation(_))));
}

#[test]
fn test_enqueue_and_dequeue() {
    let (_dir, path) = common::sample_package();
    let mut package = Package::open(&path, OpenMode::ReadWrite).unwrap();
    let mut builder = package.signature_builder();
    builder.enqueue_defaults();
    assert_eq!(builder.enqueued().len(), 3);
    builder.enqueue_part(uri("/catalog.json"));
    assert_eq!(builder.enqueued().len(), 3);
    assert!(builder.dequeue_part(&uri("/CATALOG.json")));
    assert!(!builder.dequeue_part(&uri("/catalog.json")));
    assert_eq!(builder.enqueued().len(), 2);
}

#[test]
fn test_read_only_package_cannot_be_signed() {
    let (_dir, path) = common::sample_package();
    let mut package = Package::open(&path, OpenMode::Read).unwrap();
    let mut builder = package.signature_builder();
    builder.enqueue_defaults();
    let result = builder.sign(&common::p256_certificate().config(DigestAlgorithm::Sha256, DigestAlgorithm::Sha256));
    assert!(matches!(result, Err(SignError::InvalidOperation(_))));
}

#[test]
fn test_failed_sign_rolls_back() {
    let (_dir, path) = common::sample_package();
    let original = std::fs::read(&path).unwrap();
    let mut package = Package::open(&path, OpenMode::ReadWrite).unwrap();
    let mut builder = package.signature_builder();
    builder.enqueue_part(uri("/does/not/exist.xml"));
    let result = builder.sign(&common::p256_certificate().config(DigestAlgorithm::Sha256, DigestAlgorithm::Sha256));
    assert!(matches!(result, Err(SignError::Package(_))));

    assert!(!package.contains_part(&uri(ORIGIN_PART_NAME)));
    assert!(package
        .find_relationship_by_type(&RelationshipOwner::Package, ORIGIN_RELATIONSHIP_TYPE)
        .unwrap()
        .is_none());
    assert!(!package.is_dirty());
    package.close().unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), original);
}

#[test]
fn test_encrypted_private_key() {
    let cert = common::p256_certificate();
    let encrypted = common::encrypt_private_key(&cert.private_key, "hunter2");

    let source = CertificateSource::Pem {
        certificate: cert.certificate.clone(),
        private_key: Some(encrypted),
    };
    let (_dir, path) = common::sample_package();
    let mut package = Package::open(&path, OpenMode::ReadWrite).unwrap();

    let mut builder = package.signature_builder();
    builder.enqueue_defaults();
    let result = builder.sign(&SignConfig::new(source.clone()));
    assert!(matches!(result, Err(SignError::Certificate(_))));

    let mut builder = package.signature_builder();
    builder.enqueue_defaults();
    builder
        .sign(&SignConfig::new(source).with_password("hunter2"))
        .unwrap();
    package.close().unwrap();
    assert_signed_and_valid(&path, "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha256");
}

#[test]
fn test_certificate_without_matching_key_is_rejected() {
    let cert = common::rsa_certificate();
    let other = common::other_rsa_certificate();
    let (_dir, path) = common::sample_package();
    let original = std::fs::read(&path).unwrap();
    let mut package = Package::open(&path, OpenMode::ReadWrite).unwrap();

    for private_key in [None, Some(other.private_key.clone())] {
        let mut builder = package.signature_builder();
        builder.enqueue_defaults();
        let result = builder.sign(&SignConfig::new(CertificateSource::Pem {
            certificate: cert.certificate.clone(),
            private_key,
        }));
        assert!(matches!(result, Err(SignError::InvalidOperation(_))));
    }

    assert!(package.signatures().unwrap().is_empty());
    package.close().unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), original);
}

#[test]
fn test_certificate_files_on_disk() {
    let cert = common::rsa_certificate();
    let (dir, path) = common::sample_package();
    let combined = dir.path().join("signer.pem");
    std::fs::write(&combined, format!("{}\n{}", cert.certificate, cert.private_key)).unwrap();

    let mut package = Package::open(&path, OpenMode::ReadWrite).unwrap();
    let mut builder = package.signature_builder();
    builder.enqueue_defaults();
    builder
        .sign(&SignConfig::new(CertificateSource::Files {
            certificate: combined,
            private_key: None,
        }))
        .unwrap();
    package.close().unwrap();
    assert_signed_and_valid(&path, "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256");
}

#[test]
fn test_damaged_signature_can_be_replaced_and_removed() {
    let cert = common::rsa_certificate();
    let (_dir, path) = sign_sample(cert, DigestAlgorithm::Sha256, DigestAlgorithm::Sha256);

    let damage = |path: &std::path::Path| {
        let mut package = Package::open(path, OpenMode::ReadWrite).unwrap();
        let location = package.signature_location().unwrap().unwrap();
        package
            .write_part(&location.part, b"<garbage".to_vec())
            .unwrap();
        package.close().unwrap();
        location
    };

    let first = damage(&path);
    let mut package = Package::open(&path, OpenMode::ReadWrite).unwrap();
    assert!(matches!(
        package.signatures(),
        Err(SignError::MalformedSignature(_))
    ));

    // a damaged signature still counts as a signature
    let mut builder = package.signature_builder();
    builder.enqueue_defaults();
    assert!(matches!(
        builder.sign(&cert.config(DigestAlgorithm::Sha256, DigestAlgorithm::Sha256)),
        Err(SignError::AlreadySigned)
    ));

    let mut builder = package.signature_builder();
    builder.enqueue_defaults();
    let signature = builder
        .sign(&cert.config(DigestAlgorithm::Sha256, DigestAlgorithm::Sha256).with_force(true))
        .unwrap();
    assert_eq!(signature.part(), Some(&first.part));
    package.close().unwrap();
    assert_signed_and_valid(&path, "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256");

    let second = damage(&path);
    let mut package = Package::open(&path, OpenMode::ReadWrite).unwrap();
    assert_eq!(package.remove_signature().unwrap(), Some(second.part.clone()));
    assert_eq!(package.remove_signature().unwrap(), None);
    package.close().unwrap();

    let mut package = Package::open(&path, OpenMode::Read).unwrap();
    assert!(package.signatures().unwrap().is_empty());
    assert!(!package.contains_part(&second.part));
    let origin = uri(ORIGIN_PART_NAME);
    assert!(package.contains_part(&origin));
}
