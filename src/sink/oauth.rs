//! OAuth 1.0a request signing (HMAC-SHA1).
//!
//! Only what the Twitter sink needs: an `Authorization` header for a request
//! whose signed parameters are the protocol parameters plus any form or query
//! parameters. JSON bodies are never part of the signature.

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use rand::distr::Alphanumeric;
use rand::Rng;
use sha1::Sha1;

use crate::config::{ConsumerParams, OAuthToken};

type HmacSha1 = Hmac<Sha1>;

const SIGNATURE_METHOD: &str = "HMAC-SHA1";
const VERSION: &str = "1.0";
const NONCE_LEN: usize = 32;

/// A request about to be signed.
#[derive(Debug, Clone)]
pub struct OAuthRequest<'a> {
    method: &'a str,
    url: &'a str,
    consumer: &'a ConsumerParams,
    token: Option<&'a OAuthToken>,
    protocol_params: Vec<(&'a str, &'a str)>,
}

impl<'a> OAuthRequest<'a> {
    /// Start a request. `url` must not carry a query string.
    pub fn new(method: &'a str, url: &'a str, consumer: &'a ConsumerParams) -> Self {
        Self {
            method,
            url,
            consumer,
            token: None,
            protocol_params: Vec::new(),
        }
    }

    /// Sign on behalf of a user (or with a temporary request token).
    pub fn token(mut self, token: &'a OAuthToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Extra `oauth_*` parameter, sent in the header (`oauth_callback`, `oauth_verifier`).
    pub fn protocol_param(mut self, key: &'a str, value: &'a str) -> Self {
        self.protocol_params.push((key, value));
        self
    }

    /// `Authorization` header value with a fresh nonce and timestamp.
    pub fn authorization(&self) -> Result<String> {
        self.authorization_at(&nonce(), unix_timestamp())
    }

    fn authorization_at(&self, nonce: &str, timestamp: u64) -> Result<String> {
        let timestamp = timestamp.to_string();
        let mut header_params: Vec<(&str, &str)> = vec![
            ("oauth_consumer_key", self.consumer.consumer_key.as_str()),
            ("oauth_nonce", nonce),
            ("oauth_signature_method", SIGNATURE_METHOD),
            ("oauth_timestamp", timestamp.as_str()),
            ("oauth_version", VERSION),
        ];
        if let Some(token) = self.token {
            header_params.push(("oauth_token", token.token.as_str()));
        }
        header_params.extend(self.protocol_params.iter().copied());

        // JSON bodies are not part of the signature
        let base = signature_base_string(self.method, self.url, &header_params);
        let signature = sign(
            &base,
            &self.consumer.consumer_secret,
            self.token.map(|t| t.secret.as_str()),
        )?;
        header_params.push(("oauth_signature", signature.as_str()));
        header_params.sort();

        let fields: Vec<String> = header_params
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", percent_encode(k), percent_encode(v)))
            .collect();
        Ok(format!("OAuth {}", fields.join(", ")))
    }
}

/// RFC 3986 encoding: everything but `A-Z a-z 0-9 - . _ ~` is escaped.
pub fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

/// Inverse of form encoding (`+` is a space).
pub fn percent_decode(input: &str) -> Result<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = bytes
                    .get(i + 1..i + 3)
                    .filter(|h| h.iter().all(u8::is_ascii_hexdigit))
                    .and_then(|h| std::str::from_utf8(h).ok())
                    .and_then(|h| u8::from_str_radix(h, 16).ok());
                let Some(byte) = hex else {
                    bail!("Bad percent escape in {input:?}");
                };
                out.push(byte);
                i += 3;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }
    String::from_utf8(out).context("Percent-decoded text is not UTF-8")
}

/// Parse an `application/x-www-form-urlencoded` body.
pub fn parse_form(body: &str) -> Result<Vec<(String, String)>> {
    body.trim()
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            Ok((percent_decode(key)?, percent_decode(value)?))
        })
        .collect()
}

/// `METHOD&url&params`, each part encoded, params sorted after encoding.
pub fn signature_base_string(method: &str, url: &str, params: &[(&str, &str)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (percent_encode(k), percent_encode(v)))
        .collect();
    encoded.sort();
    let normalized: Vec<String> = encoded.iter().map(|(k, v)| format!("{k}={v}")).collect();

    format!(
        "{}&{}&{}",
        method.to_ascii_uppercase(),
        percent_encode(url),
        percent_encode(&normalized.join("&"))
    )
}

/// Base64 HMAC-SHA1 of `base` keyed by `consumer_secret&token_secret`.
pub fn sign(base: &str, consumer_secret: &str, token_secret: Option<&str>) -> Result<String> {
    let key = format!(
        "{}&{}",
        percent_encode(consumer_secret),
        percent_encode(token_secret.unwrap_or(""))
    );
    let mut mac = HmacSha1::new_from_slice(key.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid signing key: {e}"))?;
    mac.update(base.as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

fn nonce() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(NONCE_LEN)
        .map(char::from)
        .collect()
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
