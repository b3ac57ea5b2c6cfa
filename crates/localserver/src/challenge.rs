//! EC-krypto wire types and replay cache (spec.md §3 "Challenge (outer)",
//! §4.4 steps 1-3; SPEC_FULL.md §3 `ChallengeCache`).
//!
//! The outer envelope is a base64-std blob (query `box` or JSON body
//! `{"box": ...}`) that itself decodes to JSON `{msg, sig}`: `msg` is
//! base64-std(JSON bytes) of the signed message, `sig` is base64-std(DER
//! signature) over the literal `msg` text, following the same
//! sign-over-undecoded-base64-text convention as `chain.rs`.

use base64::Engine;
use ecdsa::signature::Verifier;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

const B64STD: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

#[derive(Debug, Error, PartialEq)]
pub enum ChallengeError {
    #[error("extract-failed")]
    ExtractFailed,
    #[error("verify-failed")]
    VerifyFailed,
    #[error("cmd-unmarshal")]
    CmdUnmarshal,
}

/// The decoded outer envelope (spec.md §3 "Msg" / "Sig").
#[derive(Debug, Clone, Deserialize)]
struct ChallengeEnvelope {
    msg: String,
    sig: String,
}

/// The JSON object `msg` decodes to (spec.md §3 "Timestamp, ChallengeId,
/// caller random data, opaque RequestData").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeMessage {
    #[serde(rename = "Timestamp")]
    pub timestamp: i64,
    #[serde(rename = "ChallengeId")]
    pub challenge_id: String,
    #[serde(rename = "ChallengeData")]
    pub challenge_data: String,
    #[serde(rename = "RequestData")]
    pub request_data: serde_json::Value,
}

/// The inner command a verified challenge carries (spec.md §3 "Inner command").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InnerCommand {
    #[serde(rename = "Path")]
    pub path: String,
    /// Base64-std encoded; empty string decodes to an empty body.
    #[serde(rename = "Body", default)]
    pub body: String,
    #[serde(rename = "CallbackUrl", default)]
    pub callback_url: String,
    #[serde(rename = "CallbackHeaders", default)]
    pub callback_headers: HashMap<String, Vec<String>>,
}

impl InnerCommand {
    pub fn body_bytes(&self) -> Vec<u8> {
        if self.body.is_empty() {
            return Vec::new();
        }
        B64STD.decode(&self.body).unwrap_or_default()
    }
}

/// Query-or-body extraction of the outer `box` string (spec.md §4.4 step 1,
/// "two shapes, identical semantics").
#[derive(Debug, Clone, Deserialize)]
pub struct BoxQuery {
    #[serde(rename = "box")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BoxBody {
    #[serde(rename = "box")]
    pub value: Option<String>,
}

/// Extract, verify, and unmarshal a challenge (spec.md §4.4 steps 1-3).
pub fn decode_and_verify(
    box_b64std: &str,
    counter_party: &p256::ecdsa::VerifyingKey,
) -> Result<(ChallengeMessage, InnerCommand), ChallengeError> {
    let envelope_bytes = B64STD.decode(box_b64std).map_err(|_| ChallengeError::ExtractFailed)?;
    let envelope: ChallengeEnvelope =
        serde_json::from_slice(&envelope_bytes).map_err(|_| ChallengeError::ExtractFailed)?;

    let sig_der = B64STD.decode(&envelope.sig).map_err(|_| ChallengeError::ExtractFailed)?;
    let sig = p256::ecdsa::Signature::from_der(&sig_der).map_err(|_| ChallengeError::VerifyFailed)?;
    counter_party
        .verify(envelope.msg.as_bytes(), &sig)
        .map_err(|_| ChallengeError::VerifyFailed)?;

    let msg_bytes = B64STD.decode(&envelope.msg).map_err(|_| ChallengeError::ExtractFailed)?;
    let message: ChallengeMessage =
        serde_json::from_slice(&msg_bytes).map_err(|_| ChallengeError::ExtractFailed)?;

    let inner: InnerCommand =
        serde_json::from_value(message.request_data.clone()).map_err(|_| ChallengeError::CmdUnmarshal)?;

    Ok((message, inner))
}

/// De-duplicates `ChallengeId`s seen within the TTL window, generalizing the
/// teacher's `SignatureCache` (replay defense keyed by raw signature) to this
/// protocol's caller-generated `ChallengeId`.
pub struct ChallengeCache {
    seen: Mutex<HashMap<String, Instant>>,
    ttl: Duration,
}

impl ChallengeCache {
    /// TTL is 2x the challenge timestamp window (300s for a 150s window),
    /// the same replay-window safety-margin ratio used elsewhere in this crate.
    pub fn new() -> Self {
        Self { seen: Mutex::new(HashMap::new()), ttl: Duration::from_secs(300) }
    }

    /// Returns `true` if `challenge_id` was already recorded (a replay);
    /// otherwise records it and returns `false`.
    pub fn check_and_record(&self, challenge_id: &str) -> bool {
        let now = Instant::now();
        let mut seen = self.seen.lock().unwrap();
        seen.retain(|_, first_seen| now.duration_since(*first_seen) < self.ttl);

        if seen.contains_key(challenge_id) {
            return true;
        }
        seen.insert(challenge_id.to_string(), now);
        false
    }
}

impl Default for ChallengeCache {
    fn default() -> Self {
        Self::new()
    }
}
