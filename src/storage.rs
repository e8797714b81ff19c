//! Object store gateway (Amazon S3 and S3-compatible services).
//!
//! Checks and downloads single objects using the S3 REST API with AWS
//! Signature V4 authentication. Signing uses only pure-Rust dependencies
//! (`hmac`, `sha2`).
//!
//! # Addressing
//!
//! - No `endpoint_url`: virtual-hosted style, `https://<bucket>.s3.<region>.amazonaws.com/<key>`
//! - With `endpoint_url` (MinIO, LocalStack): path style, `<endpoint>/<bucket>/<key>`
//!
//! # Errors
//!
//! Every failure is converted into an [`IngestError`] with
//! [`Origin::Storage`]. The S3 `<Code>` element (or a code derived from the
//! HTTP status for bodiless `HEAD` responses) is carried in `code` so the
//! classifier can recognise `NoSuchKey`, `AccessDenied` and friends.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Method;
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::config::StorageConfig;
use crate::error::{ErrorKind, IngestError, Origin};

/// Read access to uploaded document blobs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Existence check; transfers no content.
    async fn verify_exists(&self, key: &str) -> crate::error::Result<()>;

    /// Download the full object.
    async fn fetch(&self, key: &str) -> crate::error::Result<Vec<u8>>;
}

type HmacSha256 = Hmac<Sha256>;

/// AWS credentials used to sign requests.
#[derive(Clone)]
pub struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token,
        }
    }

    /// Load credentials from `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`,
    /// and optionally `AWS_SESSION_TOKEN`.
    pub fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .context("AWS_ACCESS_KEY_ID environment variable not set")?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .context("AWS_SECRET_ACCESS_KEY environment variable not set")?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self::new(access_key_id, secret_access_key, session_token))
    }
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .finish_non_exhaustive()
    }
}

/// [`ObjectStore`] backed by the S3 REST API.
pub struct S3ObjectStore {
    bucket: String,
    region: String,
    endpoint_url: Option<String>,
    creds: AwsCredentials,
    client: reqwest::Client,
}

impl S3ObjectStore {
    pub fn new(config: &StorageConfig, creds: AwsCredentials) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build object store HTTP client")?;

        Ok(Self {
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            endpoint_url: config.endpoint_url.clone(),
            creds,
            client,
        })
    }

    /// Resolve `(url, host, canonical_uri)` for an object key.
    fn locate(&self, key: &str) -> (String, String, String) {
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");

        match self.endpoint_url {
            Some(ref endpoint) => {
                let endpoint = endpoint.trim_end_matches('/');
                let base = if endpoint.contains("://") {
                    endpoint.to_string()
                } else {
                    format!("https://{}", endpoint)
                };
                let host = base
                    .split_once("://")
                    .map(|(_, rest)| rest)
                    .unwrap_or(&base)
                    .to_string();
                let canonical_uri = format!("/{}/{}", uri_encode(&self.bucket), encoded_key);
                (format!("{}{}", base, canonical_uri), host, canonical_uri)
            }
            None => {
                let host = format!("{}.s3.{}.amazonaws.com", self.bucket, self.region);
                let canonical_uri = format!("/{}", encoded_key);
                (format!("https://{}{}", host, canonical_uri), host, canonical_uri)
            }
        }
    }

    /// Build a SigV4-signed request for `method` on `key`.
    fn signed_request(&self, method: Method, key: &str) -> reqwest::RequestBuilder {
        let (url, host, canonical_uri) = self.locate(key);

        let now = Utc::now();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let payload_hash = hex_sha256(b"");

        let mut headers = vec![
            ("host".to_string(), host),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ref token) = self.creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();

        let canonical_request = format!(
            "{}\n{}\n\n{}\n{}\n{}",
            method.as_str(),
            canonical_uri,
            canonical_headers,
            signed_headers,
            payload_hash
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );
        let signing_key = derive_signing_key(
            &self.creds.secret_access_key,
            &date_stamp,
            &self.region,
            "s3",
        );
        let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());
        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.creds.access_key_id, credential_scope, signed_headers, signature
        );

        let mut builder = self
            .client
            .request(method, &url)
            .header("Authorization", authorization)
            .header("x-amz-content-sha256", payload_hash)
            .header("x-amz-date", amz_date);
        if let Some(ref token) = self.creds.session_token {
            builder = builder.header("x-amz-security-token", token);
        }
        builder
    }

    async fn send(&self, method: Method, key: &str) -> crate::error::Result<reqwest::Response> {
        let operation = if method == Method::HEAD { "HeadObject" } else { "GetObject" };
        let resp = self
            .signed_request(method, key)
            .send()
            .await
            .map_err(|e| transport_error(operation, &self.bucket, key, e))?;

        if resp.status().is_success() {
            Ok(resp)
        } else {
            Err(status_error(operation, key, resp).await)
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn verify_exists(&self, key: &str) -> crate::error::Result<()> {
        self.send(Method::HEAD, key).await.map(|_| ())
    }

    async fn fetch(&self, key: &str) -> crate::error::Result<Vec<u8>> {
        let resp = self.send(Method::GET, key).await?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| transport_error("GetObject", &self.bucket, key, e))?;
        Ok(bytes.to_vec())
    }
}

fn transport_error(operation: &str, bucket: &str, key: &str, err: reqwest::Error) -> IngestError {
    let kind = if err.is_timeout() {
        ErrorKind::Timeout
    } else {
        ErrorKind::Transient
    };
    IngestError::new(
        kind,
        Origin::Storage,
        format!("S3 {} failed for s3://{}/{}: {}", operation, bucket, key, err),
    )
}

/// Map a non-2xx S3 response to an [`IngestError`].
async fn status_error(operation: &str, key: &str, resp: reqwest::Response) -> IngestError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    let code = extract_xml_value(&body, "Code")
        .unwrap_or_else(|| default_code(status).to_string());

    let kind = match status {
        404 => ErrorKind::NotFound,
        403 => ErrorKind::AccessDenied,
        429 => ErrorKind::Transient,
        400..=499 => ErrorKind::UpstreamClientError,
        500..=599 => ErrorKind::UpstreamServerError,
        _ => ErrorKind::Transient,
    };

    IngestError::new(
        kind,
        Origin::Storage,
        format!(
            "S3 {} failed (HTTP {}) for key '{}': {}",
            operation, status, key, code
        ),
    )
    .with_code(code)
    .with_status(status)
}

/// Code used when the response carries no XML body (always the case for HEAD).
fn default_code(status: u16) -> &'static str {
    match status {
        400 => "BadRequest",
        403 => "AccessDenied",
        404 => "NotFound",
        429 | 503 => "SlowDown",
        500..=599 => "InternalError",
        _ => "Unknown",
    }
}

// ============ AWS SigV4 Helpers ============

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex_hmac_sha256(key: &[u8], data: &[u8]) -> String {
    hex::encode(hmac_sha256(key, data))
}

/// Derive the AWS SigV4 signing key for a given date, region, and service.
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// URI-encode per RFC 3986, leaving only `A-Z a-z 0-9 - _ . ~` as is.
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}

/// Extract the text content of an XML tag (simple, non-nested).
fn extract_xml_value(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)?;
    Some(xml[start..start + end].to_string())
}
