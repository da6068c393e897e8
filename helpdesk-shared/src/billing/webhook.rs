//! Payment processor webhook signatures
//!
//! The processor signs each delivery with a header of the form
//! `t=<unix seconds>,v1=<hex hmac>[,v1=<hex hmac>...]`. The signed payload
//! is `"{t}.{raw body}"` and the key is the endpoint secret without its
//! `whsec_` prefix.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age (or clock skew) of a signed delivery
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("Webhook secret is not configured")]
    MissingSecret,

    #[error("Missing signature header")]
    MissingHeader,

    #[error("Malformed signature header")]
    Malformed,

    #[error("Signature timestamp outside the {SIGNATURE_TOLERANCE_SECS}s tolerance")]
    TimestampOutOfTolerance,

    #[error("No matching signature")]
    Mismatch,
}

/// Parsed `Stripe-Signature` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: i64,
    pub signatures: Vec<String>,
}

impl SignatureHeader {
    pub fn parse(header: &str) -> Result<Self, SignatureError> {
        let mut timestamp = None;
        let mut signatures = Vec::new();

        for part in header.split(',') {
            let Some((key, value)) = part.trim().split_once('=') else {
                continue;
            };
            match key {
                "t" => {
                    timestamp = Some(value.parse::<i64>().map_err(|_| SignatureError::Malformed)?);
                }
                "v1" => signatures.push(value.to_string()),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
        if signatures.is_empty() {
            return Err(SignatureError::Malformed);
        }

        Ok(Self {
            timestamp,
            signatures,
        })
    }
}

fn signing_key(secret: &str) -> &[u8] {
    secret.strip_prefix("whsec_").unwrap_or(secret).as_bytes()
}

fn mac_for(secret: &str, timestamp: i64, payload: &[u8]) -> Result<HmacSha256, SignatureError> {
    let mut mac =
        HmacSha256::new_from_slice(signing_key(secret)).map_err(|_| SignatureError::MissingSecret)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Hex signature for `payload` signed at `timestamp`
///
/// Used by tests and local tooling to produce valid deliveries.
pub fn compute_signature(
    secret: &str,
    timestamp: i64,
    payload: &[u8],
) -> Result<String, SignatureError> {
    Ok(hex::encode(mac_for(secret, timestamp, payload)?.finalize().into_bytes()))
}

/// Verifies a delivery against the endpoint secret
///
/// `now` is the current unix time in seconds. Any one matching `v1`
/// signature is enough.
pub fn verify_signature(
    header: Option<&str>,
    payload: &[u8],
    secret: &str,
    now: i64,
) -> Result<(), SignatureError> {
    if secret.is_empty() {
        return Err(SignatureError::MissingSecret);
    }
    let header = SignatureHeader::parse(header.ok_or(SignatureError::MissingHeader)?)?;

    if (now - header.timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        tracing::warn!(
            timestamp = header.timestamp,
            now,
            "Webhook signature timestamp outside tolerance"
        );
        return Err(SignatureError::TimestampOutOfTolerance);
    }

    let mut matched = false;
    for candidate in &header.signatures {
        let Ok(bytes) = hex::decode(candidate) else {
            continue;
        };
        if mac_for(secret, header.timestamp, payload)?
            .verify_slice(&bytes)
            .is_ok()
        {
            matched = true;
            break;
        }
    }

    if matched {
        Ok(())
    } else {
        tracing::warn!("Webhook signature mismatch");
        Err(SignatureError::Mismatch)
    }
}
