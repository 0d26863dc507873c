//! Shared fixtures for package and signing integration tests
#![allow(dead_code)]

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{header, StatusCode};
use axum::routing::post;
use axum::Router;
use common::crypto::DigestAlgorithm;
use common::signing::{CertificateSource, SignConfig};
use rsa::pkcs8::EncodePrivateKey;
use tempfile::TempDir;
use url::Url;

pub const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="utf-8"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="vsixmanifest" ContentType="text/xml" /><Default Extension="json" ContentType="application/json" /><Default Extension="dll" ContentType="application/octet-stream" /><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml" /></Types>"#;

pub const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="utf-8"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Type="http://schemas.microsoft.com/developer/vsx-schema/2011" Target="/extension.vsixmanifest" Id="R0a1b2c3d4e5f6a7b" /></Relationships>"#;

pub const MANIFEST: &str = r#"<?xml version="1.0" encoding="utf-8"?><PackageManifest Version="2.0.0"><Metadata><Identity Id="Sample.Extension" Version="1.0" /></Metadata></PackageManifest>"#;

/// Write a zip with the given entries, in order
pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let file = File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::FileOptions::default();
    for (name, bytes) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(bytes).unwrap();
    }
    zip.finish().unwrap();
}

/// A small VSIX-shaped package inside a fresh temp dir
pub fn sample_package() -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sample.vsix");
    write_zip(
        &path,
        &[
            ("[Content_Types].xml", CONTENT_TYPES.as_bytes()),
            ("_rels/.rels", ROOT_RELS.as_bytes()),
            ("extension.vsixmanifest", MANIFEST.as_bytes()),
            ("catalog.json", br#"{"manifestVersion":"1.1"}"#),
            ("bin/Sample.Tool.dll", &[0x4D, 0x5A, 0x90, 0x00, 0x03]),
        ],
    );
    (dir, path)
}

/// Zip entry names of a package file
pub fn entry_names(path: &Path) -> Vec<String> {
    let mut archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
    (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect()
}

pub fn read_entry(path: &Path, name: &str) -> Vec<u8> {
    let mut archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
    let mut bytes = Vec::new();
    archive.by_name(name).unwrap().read_to_end(&mut bytes).unwrap();
    bytes
}

/// PEM text of a certificate and its PKCS#8 private key
#[derive(Debug, Clone)]
pub struct TestCertificate {
    pub certificate: String,
    pub private_key: String,
}

impl TestCertificate {
    fn self_signed(key_pair: &rcgen::KeyPair, private_key: String, name: &str) -> Self {
        let params = rcgen::CertificateParams::new(vec![name.to_string()]).unwrap();
        let cert = params.self_signed(key_pair).unwrap();
        Self {
            certificate: cert.pem(),
            private_key,
        }
    }

    pub fn source(&self) -> CertificateSource {
        CertificateSource::Pem {
            certificate: self.certificate.clone(),
            private_key: Some(self.private_key.clone()),
        }
    }

    pub fn config(&self, file_digest: DigestAlgorithm, pkcs_digest: DigestAlgorithm) -> SignConfig {
        SignConfig::new(self.source())
            .with_file_digest(file_digest)
            .with_pkcs_digest(pkcs_digest)
    }
}

fn generate_ec(alg: &'static rcgen::SignatureAlgorithm, name: &str) -> TestCertificate {
    let key_pair = rcgen::KeyPair::generate_for(alg).unwrap();
    let private_key = key_pair.serialize_pem();
    TestCertificate::self_signed(&key_pair, private_key, name)
}

fn generate_rsa(name: &str) -> TestCertificate {
    let key = rsa::RsaPrivateKey::new(&mut rand_core::OsRng, 2048).unwrap();
    let pem = key.to_pkcs8_pem(rsa::pkcs8::LineEnding::LF).unwrap().to_string();
    let key_pair = rcgen::KeyPair::from_pem_and_sign_algo(&pem, &rcgen::PKCS_RSA_SHA256).unwrap();
    TestCertificate::self_signed(&key_pair, pem, name)
}

pub fn rsa_certificate() -> &'static TestCertificate {
    static CERT: OnceLock<TestCertificate> = OnceLock::new();
    CERT.get_or_init(|| generate_rsa("rsa.signer.test"))
}

/// A second RSA identity, for re-signing with a different certificate
pub fn other_rsa_certificate() -> &'static TestCertificate {
    static CERT: OnceLock<TestCertificate> = OnceLock::new();
    CERT.get_or_init(|| generate_rsa("other.signer.test"))
}

pub fn p256_certificate() -> &'static TestCertificate {
    static CERT: OnceLock<TestCertificate> = OnceLock::new();
    CERT.get_or_init(|| generate_ec(&rcgen::PKCS_ECDSA_P256_SHA256, "p256.signer.test"))
}

pub fn p384_certificate() -> &'static TestCertificate {
    static CERT: OnceLock<TestCertificate> = OnceLock::new();
    CERT.get_or_init(|| generate_ec(&rcgen::PKCS_ECDSA_P384_SHA384, "p384.signer.test"))
}

/// Re-encode a PKCS#8 PEM key as an `ENCRYPTED PRIVATE KEY`
pub fn encrypt_private_key(private_key: &str, password: &str) -> String {
    let (_, document) = pkcs8::SecretDocument::from_pem(private_key).unwrap();
    let info = pkcs8::PrivateKeyInfo::try_from(document.as_bytes()).unwrap();
    let iv = [7u8; 16];
    let params =
        pkcs8::pkcs5::pbes2::Parameters::pbkdf2_sha256_aes256cbc(2048, b"opcsign-test-salt", &iv)
            .unwrap();
    info.encrypt_with_params(params, password)
        .unwrap()
        .to_pem("ENCRYPTED PRIVATE KEY", pkcs8::LineEnding::LF)
        .unwrap()
        .to_string()
}

/// Token the mock authority hands out: SEQUENCE { OID 1.2.3.4.5 }
pub const TSA_TOKEN: &[u8] = &[0x30, 0x06, 0x06, 0x04, 0x2A, 0x03, 0x04, 0x05];

#[derive(Debug, Clone, Copy)]
pub enum TsaBehavior {
    Grant,
    Reject,
    Garbage,
    ServerError,
    Hang,
}

fn tsa_response(behavior: TsaBehavior) -> Vec<u8> {
    // TimeStampResp: SEQUENCE { SEQUENCE { INTEGER status } token? }
    match behavior {
        TsaBehavior::Reject => vec![0x30, 0x05, 0x30, 0x03, 0x02, 0x01, 0x02],
        TsaBehavior::Garbage => b"this is not DER".to_vec(),
        _ => {
            let mut body = vec![0x30, 0x03, 0x02, 0x01, 0x00];
            body.extend_from_slice(TSA_TOKEN);
            let mut out = vec![0x30, body.len() as u8];
            out.extend(body);
            out
        }
    }
}

/// Serve a mock time-stamping authority on a loopback port
pub async fn spawn_tsa(behavior: TsaBehavior) -> Url {
    let app = Router::new().route(
        "/",
        post(move |headers: axum::http::HeaderMap, body: Bytes| async move {
            let reply = |status: StatusCode, bytes: Vec<u8>| {
                (status, [(header::CONTENT_TYPE, "application/timestamp-reply")], bytes)
            };
            let query = headers
                .get(header::CONTENT_TYPE)
                .is_some_and(|value| value == "application/timestamp-query");
            if !query || body.first() != Some(&0x30) {
                return reply(StatusCode::BAD_REQUEST, Vec::new());
            }
            match behavior {
                TsaBehavior::ServerError => reply(StatusCode::INTERNAL_SERVER_ERROR, Vec::new()),
                TsaBehavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    reply(StatusCode::OK, tsa_response(behavior))
                }
                _ => reply(StatusCode::OK, tsa_response(behavior)),
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Url::parse(&format!("http://{address}/")).unwrap()
}

/// A loopback URL nothing listens on
pub async fn closed_endpoint() -> Url {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    drop(listener);
    Url::parse(&format!("http://{address}/")).unwrap()
}
