//! RFC 3161 timestamping
//!
//! The signature value is digested and sent to a time-stamping authority as
//! a DER `TimeStampReq`. A granted response carries a token that is embedded
//! as an unsigned XAdES property of the signature.

use std::time::Duration;

use der::asn1::{Any, AnyRef, OctetString};
use der::{Decode, Encode, Sequence};
use tokio_util::sync::CancellationToken;
use url::Url;
use x509_cert::spki::AlgorithmIdentifierOwned;

use crate::crypto::DigestAlgorithm;
use crate::package::{OpenMode, Package};

use super::signature::OpcSignature;
use super::SignError;

pub const DEFAULT_TIMESTAMP_TIMEOUT: Duration = Duration::from_secs(30);

const TIMESTAMP_QUERY_CONTENT_TYPE: &str = "application/timestamp-query";

/// PKIStatus values that come with a token
const STATUS_GRANTED: u32 = 0;
const STATUS_GRANTED_WITH_MODS: u32 = 1;

/// Why a timestamp could not be obtained
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimestampFailure {
    #[error("could not reach the timestamp authority: {0}")]
    Network(String),
    #[error("timestamp authority answered with HTTP {0}")]
    HttpStatus(u16),
    #[error("timestamp authority rejected the request with status {status}")]
    Rejected { status: u32 },
    #[error("malformed timestamp response: {0}")]
    Malformed(String),
    #[error("timestamp request was cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimestampResult {
    Success,
    Failed(TimestampFailure),
}

impl TimestampResult {
    pub fn is_success(&self) -> bool {
        matches!(self, TimestampResult::Success)
    }
}

#[derive(Sequence)]
struct MessageImprint {
    hash_algorithm: AlgorithmIdentifierOwned,
    hashed_message: OctetString,
}

#[derive(Sequence)]
struct TimeStampReq {
    version: u8,
    message_imprint: MessageImprint,
    nonce: u64,
    cert_req: bool,
}

impl TimeStampReq {
    fn new(digest: DigestAlgorithm, hashed: Vec<u8>, nonce: u64) -> Result<Self, der::Error> {
        Ok(Self {
            version: 1,
            message_imprint: MessageImprint {
                hash_algorithm: AlgorithmIdentifierOwned {
                    oid: digest.oid(),
                    parameters: Some(AnyRef::NULL.into()),
                },
                hashed_message: OctetString::new(hashed)?,
            },
            nonce,
            cert_req: true,
        })
    }
}

/// Extract the token from a DER `TimeStampResp`
fn parse_response(bytes: &[u8]) -> Result<Vec<u8>, TimestampFailure> {
    let malformed = |e: &dyn std::fmt::Display| TimestampFailure::Malformed(e.to_string());

    let elements = Vec::<Any>::from_der(bytes).map_err(|e| malformed(&e))?;
    let status_info = elements
        .first()
        .ok_or_else(|| malformed(&"empty response"))?;
    let status_fields =
        Vec::<Any>::from_der(&status_info.to_der().map_err(|e| malformed(&e))?)
            .map_err(|e| malformed(&e))?;
    let status = status_fields
        .first()
        .ok_or_else(|| malformed(&"missing PKIStatus"))
        .and_then(|field| {
            u32::from_der(&field.to_der().map_err(|e| malformed(&e))?).map_err(|e| malformed(&e))
        })?;

    if status != STATUS_GRANTED && status != STATUS_GRANTED_WITH_MODS {
        return Err(TimestampFailure::Rejected { status });
    }
    elements
        .get(1)
        .ok_or_else(|| malformed(&"granted response without a token"))?
        .to_der()
        .map_err(|e| malformed(&e))
}

async fn send(
    endpoint: &Url,
    body: Vec<u8>,
    timeout: Duration,
) -> Result<Vec<u8>, TimestampFailure> {
    let network = |e: reqwest::Error| TimestampFailure::Network(e.to_string());
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(network)?;
    let response = client
        .post(endpoint.clone())
        .header(reqwest::header::CONTENT_TYPE, TIMESTAMP_QUERY_CONTENT_TYPE)
        .body(body)
        .send()
        .await
        .map_err(network)?;
    let status = response.status();
    if !status.is_success() {
        return Err(TimestampFailure::HttpStatus(status.as_u16()));
    }
    let bytes = response.bytes().await.map_err(network)?;
    parse_response(&bytes)
}

/// Requests a timestamp for one signature
///
/// # Examples
///
/// ```ignore
/// let mut signatures = package.signatures()?;
/// let result = signatures[0]
///     .timestamp_builder()?
///     .request(&mut package, &endpoint, DigestAlgorithm::Sha256, &CancellationToken::new())
///     .await?;
/// ```
pub struct TimestampBuilder<'a> {
    signature: &'a mut OpcSignature,
    timeout: Duration,
}

impl<'a> TimestampBuilder<'a> {
    pub(crate) fn new(signature: &'a mut OpcSignature) -> Self {
        Self {
            signature,
            timeout: DEFAULT_TIMESTAMP_TIMEOUT,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Ask `endpoint` for a timestamp over the signature value.
    ///
    /// Network and authority failures are reported as
    /// [`TimestampResult::Failed`]; in that case, and on cancellation, the
    /// signature is left as it was.
    pub async fn request(
        self,
        package: &mut Package,
        endpoint: &Url,
        digest: DigestAlgorithm,
        cancel: &CancellationToken,
    ) -> Result<TimestampResult, SignError> {
        if !digest.is_supported() {
            return Err(SignError::UnsupportedAlgorithm(digest.to_string()));
        }
        if package.mode() == OpenMode::Read {
            return Err(SignError::InvalidOperation(
                "cannot timestamp a signature in a package opened read-only".into(),
            ));
        }
        let part = self
            .signature
            .part()
            .cloned()
            .ok_or_else(|| SignError::InvalidOperation("signature has been removed".into()))?;

        let signature_value = self.signature.document().signature_value()?;
        let request = TimeStampReq::new(digest, digest.digest(&signature_value)?, rand::random())
            .and_then(|request| request.to_der())
            .map_err(|e| SignError::MalformedSignature(format!("cannot encode request: {e}")))?;

        tracing::info!("requesting timestamp from {} ({})", endpoint, digest);
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TimestampFailure::Cancelled),
            outcome = send(endpoint, request, self.timeout) => outcome,
        };

        let token = match outcome {
            Ok(token) => token,
            Err(failure) => {
                tracing::warn!("timestamp failed: {}", failure);
                return Ok(TimestampResult::Failed(failure));
            }
        };

        let document = self.signature.document_mut();
        let previous = document.clone();
        document.set_timestamp_token(&token);
        if let Err(e) = package.write_part(&part, document.to_bytes()) {
            *document = previous;
            return Err(e.into());
        }
        tracing::info!("timestamped signature {}", part);
        Ok(TimestampResult::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // SEQUENCE { SEQUENCE { INTEGER status } [token] }
    fn response(status: u8, token: Option<&[u8]>) -> Vec<u8> {
        let status_info = [0x30, 0x03, 0x02, 0x01, status];
        let mut body = status_info.to_vec();
        if let Some(token) = token {
            body.extend_from_slice(token);
        }
        let mut out = vec![0x30, body.len() as u8];
        out.extend(body);
        out
    }

    // SEQUENCE { OBJECT IDENTIFIER 1.2.3.4.5 }
    const TOKEN: &[u8] = &[0x30, 0x06, 0x06, 0x04, 0x2A, 0x03, 0x04, 0x05];

    #[test]
    fn test_granted_response_yields_token() {
        assert_eq!(parse_response(&response(0, Some(TOKEN))).unwrap(), TOKEN);
        assert_eq!(parse_response(&response(1, Some(TOKEN))).unwrap(), TOKEN);
    }

    #[test]
    fn test_rejected_response() {
        assert_eq!(
            parse_response(&response(2, None)),
            Err(TimestampFailure::Rejected { status: 2 })
        );
    }

    #[test]
    fn test_malformed_responses() {
        assert!(matches!(
            parse_response(b"not der"),
            Err(TimestampFailure::Malformed(_))
        ));
        assert!(matches!(
            parse_response(&response(0, None)),
            Err(TimestampFailure::Malformed(_))
        ));
    }

    #[test]
    fn test_request_encoding() {
        let hashed = DigestAlgorithm::Sha256.digest(b"signature").unwrap();
        let der = TimeStampReq::new(DigestAlgorithm::Sha256, hashed.clone(), 42)
            .unwrap()
            .to_der()
            .unwrap();
        // outer SEQUENCE, then INTEGER 1
        assert_eq!(&der[..1], &[0x30]);
        assert_eq!(&der[2..5], &[0x02, 0x01, 0x01]);
        assert!(der.windows(hashed.len()).any(|window| window == hashed.as_slice()));
        // certReq TRUE closes the request
        assert_eq!(&der[der.len() - 3..], &[0x01, 0x01, 0xFF]);
    }
}
