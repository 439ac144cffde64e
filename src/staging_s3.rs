//! S3 staging store.
//!
//! Writes staged pages to an S3 bucket with signed `PutObject` requests and
//! removes them with `DeleteObject`. The locator handed to the index backend
//! is a presigned `GetObject` URL, or `<public_base_url>/<key>` when the
//! bucket is served publicly.
//!
//! Signing is AWS Signature Version 4 done with `hmac` + `sha2` directly,
//! so no C toolchain is needed.
//!
//! # Configuration
//!
//! ```toml
//! [staging]
//! bucket = "list-search-staging"
//! region = "us-east-1"
//! prefix = "pages/"
//! # endpoint_url = "http://localhost:9000"   # MinIO
//! locator_ttl_secs = 3600
//! ```
//!
//! Custom endpoints use path-style addressing
//! (`<endpoint>/<bucket>/<key>`); AWS uses virtual-hosted style.
//!
//! # Environment Variables
//!
//! - `AWS_ACCESS_KEY_ID` (required)
//! - `AWS_SECRET_ACCESS_KEY` (required)
//! - `AWS_SESSION_TOKEN` (optional)

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use quick_xml::events::Event;
use reqwest::StatusCode;
use sha2::{Digest, Sha256};

use crate::config::StagingConfig;
use crate::error::{truncate_body, Error, Result};
use crate::staging::StagingStore;

type HmacSha256 = Hmac<Sha256>;

// ============ AWS Credentials ============

#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl AwsCredentials {
    /// Load credentials from `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`,
    /// and optionally `AWS_SESSION_TOKEN`.
    pub fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID").map_err(|_| {
            Error::InvalidInput("AWS_ACCESS_KEY_ID environment variable not set".into())
        })?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY").map_err(|_| {
            Error::InvalidInput("AWS_SECRET_ACCESS_KEY environment variable not set".into())
        })?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

// ============ Store ============

#[derive(Debug, Clone)]
pub struct S3StagingSettings {
    pub bucket: String,
    pub region: String,
    pub prefix: String,
    pub endpoint_url: Option<String>,
    pub public_base_url: Option<String>,
    pub locator_ttl: Duration,
    pub timeout: Duration,
}

impl From<&StagingConfig> for S3StagingSettings {
    fn from(c: &StagingConfig) -> Self {
        Self {
            bucket: c.bucket.clone(),
            region: c.region.clone(),
            prefix: c.prefix.clone(),
            endpoint_url: c.endpoint_url.clone(),
            public_base_url: c.public_base_url.clone(),
            locator_ttl: Duration::from_secs(c.locator_ttl_secs),
            timeout: Duration::from_secs(c.timeout_secs),
        }
    }
}

pub struct S3StagingStore {
    http: reqwest::Client,
    settings: S3StagingSettings,
    creds: AwsCredentials,
}

/// Where a request for one object goes, and what gets signed.
#[derive(Debug, PartialEq, Eq)]
struct ObjectTarget {
    url: String,
    host: String,
    canonical_uri: String,
}

impl S3StagingStore {
    pub fn new(settings: S3StagingSettings, creds: AwsCredentials) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| Error::StagingWrite {
                name: String::new(),
                message: format!("failed to build http client: {e}"),
            })?;
        Ok(Self {
            http,
            settings,
            creds,
        })
    }

    fn object_key(&self, name: &str) -> String {
        let prefix = self.settings.prefix.trim_end_matches('/');
        if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", prefix, name)
        }
    }

    fn target(&self, key: &str) -> ObjectTarget {
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");

        match self.settings.endpoint_url {
            Some(ref endpoint) => {
                let (scheme, rest) = match endpoint.strip_prefix("http://") {
                    Some(rest) => ("http", rest),
                    None => ("https", endpoint.trim_start_matches("https://")),
                };
                let host = rest.trim_end_matches('/').to_string();
                let canonical_uri =
                    format!("/{}/{}", uri_encode(&self.settings.bucket), encoded_key);
                ObjectTarget {
                    url: format!("{}://{}{}", scheme, host, canonical_uri),
                    host,
                    canonical_uri,
                }
            }
            None => {
                let host = format!(
                    "{}.s3.{}.amazonaws.com",
                    self.settings.bucket, self.settings.region
                );
                let canonical_uri = format!("/{}", encoded_key);
                ObjectTarget {
                    url: format!("https://{}{}", host, canonical_uri),
                    host,
                    canonical_uri,
                }
            }
        }
    }

    fn credential_scope(&self, date_stamp: &str) -> String {
        format!("{}/{}/s3/aws4_request", date_stamp, self.settings.region)
    }

    fn signature(&self, date_stamp: &str, amz_date: &str, canonical_request: &str) -> String {
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            self.credential_scope(date_stamp),
            hex_sha256(canonical_request.as_bytes())
        );
        let signing_key = derive_signing_key(
            &self.creds.secret_access_key,
            date_stamp,
            &self.settings.region,
            "s3",
        );
        hex_hmac_sha256(&signing_key, string_to_sign.as_bytes())
    }

    /// Headers for a header-signed request, `Authorization` included.
    fn signed_headers(
        &self,
        method: &str,
        target: &ObjectTarget,
        payload_hash: &str,
        now: DateTime<Utc>,
    ) -> Vec<(String, String)> {
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        let mut headers = vec![
            ("host".to_string(), target.host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.to_string()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ref token) = self.creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_names: String = headers
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
            method, target.canonical_uri, canonical_headers, signed_names, payload_hash
        );
        let signature = self.signature(&date_stamp, &amz_date, &canonical_request);

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.creds.access_key_id,
            self.credential_scope(&date_stamp),
            signed_names,
            signature
        );

        let mut out: Vec<(String, String)> =
            headers.into_iter().filter(|(k, _)| k != "host").collect();
        out.push(("Authorization".to_string(), authorization));
        out
    }

    /// Presigned `GetObject` URL valid for `locator_ttl` from `now`.
    fn presign_get(&self, target: &ObjectTarget, now: DateTime<Utc>) -> String {
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        let mut params = vec![
            ("X-Amz-Algorithm".to_string(), "AWS4-HMAC-SHA256".to_string()),
            (
                "X-Amz-Credential".to_string(),
                format!(
                    "{}/{}",
                    self.creds.access_key_id,
                    self.credential_scope(&date_stamp)
                ),
            ),
            ("X-Amz-Date".to_string(), amz_date.clone()),
            (
                "X-Amz-Expires".to_string(),
                self.settings.locator_ttl.as_secs().to_string(),
            ),
            ("X-Amz-SignedHeaders".to_string(), "host".to_string()),
        ];
        if let Some(ref token) = self.creds.session_token {
            params.push(("X-Amz-Security-Token".to_string(), token.clone()));
        }
        params.sort_by(|a, b| a.0.cmp(&b.0));

        let canonical_querystring: String = params
            .iter()
            .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let canonical_request = format!(
            "GET\n{}\n{}\nhost:{}\n\nhost\nUNSIGNED-PAYLOAD",
            target.canonical_uri, canonical_querystring, target.host
        );
        let signature = self.signature(&date_stamp, &amz_date, &canonical_request);

        format!(
            "{}?{}&X-Amz-Signature={}",
            target.url, canonical_querystring, signature
        )
    }

    fn locator(&self, key: &str, target: &ObjectTarget, now: DateTime<Utc>) -> String {
        match self.settings.public_base_url {
            Some(ref base) => {
                let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
                format!("{}/{}", base.trim_end_matches('/'), encoded_key)
            }
            None => self.presign_get(target, now),
        }
    }

    fn request(
        &self,
        method: reqwest::Method,
        target: &ObjectTarget,
        payload_hash: &str,
    ) -> reqwest::RequestBuilder {
        let headers = self.signed_headers(method.as_str(), target, payload_hash, Utc::now());
        let mut req = self.http.request(method, &target.url);
        for (name, value) in headers {
            req = req.header(name, value);
        }
        req
    }
}

#[async_trait]
impl StagingStore for S3StagingStore {
    async fn put(&self, name: &str, content: &[u8]) -> Result<String> {
        let key = self.object_key(name);
        let target = self.target(&key);
        let payload_hash = hex_sha256(content);

        let resp = self
            .request(reqwest::Method::PUT, &target, &payload_hash)
            .header("Content-Type", "application/json")
            .body(content.to_vec())
            .send()
            .await
            .map_err(|e| Error::StagingWrite {
                name: name.to_string(),
                message: format!("failed to put s3://{}/{}: {}", self.settings.bucket, key, e),
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::StagingWrite {
                name: name.to_string(),
                message: describe_s3_failure("PutObject", status, &body),
            });
        }

        tracing::debug!(bucket = %self.settings.bucket, key = %key, bytes = content.len(), "staged object");
        Ok(self.locator(&key, &target, Utc::now()))
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let key = self.object_key(name);
        let target = self.target(&key);

        let resp = self
            .request(reqwest::Method::DELETE, &target, &hex_sha256(b""))
            .send()
            .await
            .map_err(|e| Error::StagingDelete {
                name: name.to_string(),
                message: format!(
                    "failed to delete s3://{}/{}: {}",
                    self.settings.bucket, key, e
                ),
            })?;

        let status = resp.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(Error::StagingDelete {
            name: name.to_string(),
            message: describe_s3_failure("DeleteObject", status, &body),
        })
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

/// Derive the SigV4 signing key.
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

/// RFC 3986 encoding; everything but `A-Z a-z 0-9 - _ . ~` is escaped.
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

// ============ Error bodies ============

/// Pull `Code` and `Message` out of an S3 `<Error>` document.
fn parse_s3_error(xml: &str) -> Option<(String, String)> {
    let mut reader = quick_xml::Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut current: Option<Vec<u8>> = None;
    let mut code = None;
    let mut message = None;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => current = Some(e.local_name().as_ref().to_vec()),
            Ok(Event::Text(te)) => {
                let text = te.unescape().ok()?.into_owned();
                match current.as_deref() {
                    Some(b"Code") => code = Some(text),
                    Some(b"Message") => message = Some(text),
                    _ => {}
                }
            }
            Ok(Event::End(_)) => current = None,
            Ok(Event::Eof) => break,
            Err(_) => return None,
            _ => {}
        }
    }
    Some((code?, message.unwrap_or_default()))
}

fn describe_s3_failure(action: &str, status: StatusCode, body: &str) -> String {
    match parse_s3_error(body) {
        Some((code, message)) => format!("S3 {} failed (HTTP {}): {}: {}", action, status, code, message),
        None => format!("S3 {} failed (HTTP {}): {}", action, status, truncate_body(body)),
    }
}
