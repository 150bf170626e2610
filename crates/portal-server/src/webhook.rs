//! Stripe webhook signature verification.
//!
//! Header format: `t=<unix seconds>,v1=<hex hmac-sha256>[,v1=...]`, where
//! the MAC covers `"<t>.<raw body>"`.

use ring::hmac;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Missing Stripe-Signature header")]
    MissingHeader,

    #[error("Malformed Stripe-Signature header")]
    Malformed,

    #[error("Timestamp outside the tolerance zone")]
    OutsideTolerance,

    #[error("No signatures found matching the expected signature for payload")]
    NoMatch,
}

/// A verified webhook event.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub created: i64,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: Value,
}

pub struct WebhookVerifier {
    key: hmac::Key,
    tolerance_secs: i64,
}

impl WebhookVerifier {
    pub fn new(secret: &[u8], tolerance_secs: i64) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret),
            tolerance_secs,
        }
    }

    pub fn verify(&self, payload: &[u8], header: Option<&str>, now: i64) -> Result<(), SignatureError> {
        let header = header.ok_or(SignatureError::MissingHeader)?;

        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => {
                    timestamp = Some(value.parse::<i64>().map_err(|_| SignatureError::Malformed)?)
                }
                Some(("v1", value)) => {
                    // Undecodable entries can never match; skip them.
                    if let Ok(sig) = hex::decode(value) {
                        signatures.push(sig);
                    }
                }
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
        if signatures.is_empty() {
            return Err(SignatureError::NoMatch);
        }
        if (now - timestamp).abs() > self.tolerance_secs {
            return Err(SignatureError::OutsideTolerance);
        }

        let signed = signed_payload(timestamp, payload);
        if signatures
            .iter()
            .any(|sig| hmac::verify(&self.key, &signed, sig).is_ok())
        {
            Ok(())
        } else {
            Err(SignatureError::NoMatch)
        }
    }

    /// Header value for `payload` at time `t`, as Stripe would send it.
    #[cfg(test)]
    pub fn sign(&self, payload: &[u8], t: i64) -> String {
        let tag = hmac::sign(&self.key, &signed_payload(t, payload));
        format!("t={t},v1={}", hex::encode(tag.as_ref()))
    }
}

fn signed_payload(timestamp: i64, payload: &[u8]) -> Vec<u8> {
    let mut signed = format!("{timestamp}.").into_bytes();
    signed.extend_from_slice(payload);
    signed
}
