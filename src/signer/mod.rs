//! SigV4-style canonical-request signing.
//!
//! Canonicalize method/path/query/headers, hash the payload, derive a signing
//! key through the date/region/service HMAC chain, and attach the signature
//! as the `Authorization` header. Signatures are only valid for a short
//! window (about five minutes), so callers sign immediately before sending —
//! the non-streaming pipeline rebuilds and re-signs the request on every
//! retry attempt for this reason.

use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use secrecy::ExposeSecret;
use sha2::{Digest, Sha256};

use crate::auth::AwsCredentials;
use crate::error::LlmError;

type HmacSha256 = Hmac<Sha256>;

/// How long the upstream accepts a signature after it was produced.
pub const SIGNATURE_TTL: Duration = Duration::from_secs(5 * 60);

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// The request parts the signer reads and the header map it mutates.
pub struct RequestToSign<'a> {
    pub method: &'a str,
    pub url: &'a reqwest::Url,
    pub headers: &'a mut HeaderMap,
    pub body: &'a [u8],
}

/// Signs with the current wall clock.
pub fn sign(
    request: RequestToSign<'_>,
    credentials: &AwsCredentials,
    service: &str,
) -> Result<(), LlmError> {
    sign_at(request, credentials, service, Utc::now())
}

/// Signs at an explicit instant. Deterministic; the wall-clock entry point
/// and the test suite both route through here.
pub fn sign_at(
    request: RequestToSign<'_>,
    credentials: &AwsCredentials,
    service: &str,
    now: DateTime<Utc>,
) -> Result<(), LlmError> {
    let RequestToSign {
        method,
        url,
        headers,
        body,
    } = request;

    if credentials.access_key_id.is_empty() {
        return Err(LlmError::SigningError("empty AWS access key id".into()));
    }
    let secret = credentials.secret_access_key.expose_secret();
    if secret.is_empty() {
        return Err(LlmError::SigningError("empty AWS secret access key".into()));
    }

    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();

    let host = url
        .host_str()
        .ok_or_else(|| LlmError::SigningError("request URL has no host".into()))?;
    let host = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    insert_header(headers, "host", &host)?;
    insert_header(headers, "x-amz-date", &amz_date)?;
    if let Some(token) = &credentials.session_token {
        insert_header(headers, "x-amz-security-token", token.expose_secret())?;
    }

    let payload_hash = hex::encode(Sha256::digest(body));
    let (canonical_headers, signed_headers) = canonical_headers(headers)?;
    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method.to_uppercase(),
        canonical_path(url),
        canonical_query(url),
        canonical_headers,
        signed_headers,
        payload_hash,
    );

    let scope = format!("{date}/{}/{service}/aws4_request", credentials.region);
    let string_to_sign = format!(
        "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
        hex::encode(Sha256::digest(canonical_request.as_bytes())),
    );

    let signing_key = derive_key(secret, &date, &credentials.region, service);
    let signature = hex::encode(hmac(&signing_key, string_to_sign.as_bytes()));

    let authorization = format!(
        "{ALGORITHM} Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
        credentials.access_key_id,
    );
    insert_header(headers, "authorization", &authorization)?;
    Ok(())
}

/// HMAC chain: kSecret -> kDate -> kRegion -> kService -> kSigning.
fn derive_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac(format!("AWS4{secret}").as_bytes(), date.as_bytes());
    let k_region = hmac(&k_date, region.as_bytes());
    let k_service = hmac(&k_region, service.as_bytes());
    hmac(&k_service, b"aws4_request")
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn canonical_path(url: &reqwest::Url) -> String {
    let path = url.path();
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}

fn canonical_query(url: &reqwest::Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            (
                urlencoding::encode(&k).into_owned(),
                urlencoding::encode(&v).into_owned(),
            )
        })
        .collect();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Lowercased, sorted, trimmed header list plus the signed-header names.
fn canonical_headers(headers: &HeaderMap) -> Result<(String, String), LlmError> {
    let mut entries: Vec<(String, String)> = Vec::with_capacity(headers.len());
    for (name, value) in headers {
        let value = value
            .to_str()
            .map_err(|_| LlmError::SigningError(format!("header {name} is not valid UTF-8")))?;
        entries.push((name.as_str().to_lowercase(), value.trim().to_string()));
    }
    entries.sort();

    let canonical = entries
        .iter()
        .map(|(name, value)| format!("{name}:{value}\n"))
        .collect::<String>();
    let signed = entries
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(";");
    Ok((canonical, signed))
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: &str) -> Result<(), LlmError> {
    let value = HeaderValue::from_str(value)
        .map_err(|_| LlmError::SigningError(format!("unencodable value for header {name}")))?;
    headers.insert(HeaderName::from_static(name), value);
    Ok(())
}
