//! Trust-chain validation (spec.md §3 "Trust chain", §4.2 `ChainValidator`).
//!
//! A chain is an ordered sequence of signed links, each attested by its
//! predecessor, rooted in a preconfigured trusted key indexed by `kid`. The
//! terminal link's public key is an X25519 encryption key, not a signature
//! key.

use base64::Engine;
use ecdsa::signature::Verifier;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

const B64URL: base64::engine::GeneralPurpose = base64::engine::general_purpose::URL_SAFE_NO_PAD;

/// One link of the wire-format chain (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainLink {
    #[serde(rename = "PayloadB64URL")]
    pub payload_b64url: String,
    #[serde(rename = "SignatureB64URL")]
    pub signature_b64url: String,
    #[serde(rename = "SignedBy")]
    pub signed_by: String,
}

/// The wire form is a bare JSON array of links (spec.md §4.3 step 4).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Chain {
    pub links: Vec<ChainLink>,
}

/// The JSON object a link's `Payload` decodes to (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainPayload {
    #[serde(rename = "accountUuid")]
    pub account_uuid: String,
    #[serde(rename = "userUuid")]
    pub user_uuid: String,
    #[serde(rename = "dateTimeSigned")]
    pub date_time_signed: String,
    pub environment: String,
    #[serde(rename = "expirationDate")]
    pub expiration_date: i64,
    #[serde(rename = "publicKey")]
    pub public_key: Jwk,
    #[serde(rename = "signedBy")]
    pub signed_by: String,
    pub version: u32,
}

/// Minimal JWK (spec.md §3). `y` is omitted for X25519.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    pub crv: String,
    pub x: String,
    #[serde(default)]
    pub y: Option<String>,
    #[serde(default)]
    pub kid: String,
}

/// An ECDSA public key on one of the three NIST curves the chain allows for
/// non-terminal links (spec.md §3 invariant).
#[derive(Clone)]
pub enum EcdsaPublicKey {
    P256(p256::ecdsa::VerifyingKey),
    P384(p384::ecdsa::VerifyingKey),
    P521(p521::ecdsa::VerifyingKey),
}

impl EcdsaPublicKey {
    /// Verify `signature_der` over `message` under this key. The
    /// `elliptic_curve` constructors used to build each `VerifyingKey`
    /// already reject off-curve points (spec.md §4.2 step 4e invariant).
    fn verify_der(&self, message: &[u8], signature_der: &[u8]) -> Result<(), ChainError> {
        match self {
            EcdsaPublicKey::P256(key) => {
                let sig = p256::ecdsa::Signature::from_der(signature_der)
                    .map_err(|_| ChainError::SigInvalid)?;
                key.verify(message, &sig).map_err(|_| ChainError::SigInvalid)
            }
            EcdsaPublicKey::P384(key) => {
                let sig = p384::ecdsa::Signature::from_der(signature_der)
                    .map_err(|_| ChainError::SigInvalid)?;
                key.verify(message, &sig).map_err(|_| ChainError::SigInvalid)
            }
            EcdsaPublicKey::P521(key) => {
                let sig = p521::ecdsa::Signature::from_der(signature_der)
                    .map_err(|_| ChainError::SigInvalid)?;
                key.verify(message, &sig).map_err(|_| ChainError::SigInvalid)
            }
        }
    }
}

fn decode_jwk_coord(field: &str) -> Result<Vec<u8>, ()> {
    B64URL.decode(field).map_err(|_| ())
}

/// Convert a JWK to an ECDSA public key on P-256/P-384/P-521, rejecting
/// off-curve points (spec.md §4.2 step 4e).
fn jwk_to_ecdsa(jwk: &Jwk) -> Result<EcdsaPublicKey, ChainError> {
    let x = decode_jwk_coord(&jwk.x).map_err(|_| ChainError::ChildKeyInvalid)?;
    let y = jwk
        .y
        .as_ref()
        .ok_or(ChainError::ChildKeyInvalid)
        .and_then(|y| decode_jwk_coord(y).map_err(|_| ChainError::ChildKeyInvalid))?;

    match jwk.crv.as_str() {
        "P-256" => {
            if x.len() != 32 || y.len() != 32 {
                return Err(ChainError::ChildKeyInvalid);
            }
            let point = p256::EncodedPoint::from_affine_coordinates(
                p256::FieldBytes::from_slice(&x),
                p256::FieldBytes::from_slice(&y),
                false,
            );
            let key = p256::ecdsa::VerifyingKey::from_encoded_point(&point)
                .map_err(|_| ChainError::ChildKeyInvalid)?;
            Ok(EcdsaPublicKey::P256(key))
        }
        "P-384" => {
            if x.len() != 48 || y.len() != 48 {
                return Err(ChainError::ChildKeyInvalid);
            }
            let point = p384::EncodedPoint::from_affine_coordinates(
                p384::FieldBytes::from_slice(&x),
                p384::FieldBytes::from_slice(&y),
                false,
            );
            let key = p384::ecdsa::VerifyingKey::from_encoded_point(&point)
                .map_err(|_| ChainError::ChildKeyInvalid)?;
            Ok(EcdsaPublicKey::P384(key))
        }
        "P-521" => {
            if x.len() != 66 || y.len() != 66 {
                return Err(ChainError::ChildKeyInvalid);
            }
            let point = p521::EncodedPoint::from_affine_coordinates(
                p521::FieldBytes::from_slice(&x),
                p521::FieldBytes::from_slice(&y),
                false,
            );
            let key = p521::ecdsa::VerifyingKey::from_encoded_point(&point)
                .map_err(|_| ChainError::ChildKeyInvalid)?;
            Ok(EcdsaPublicKey::P521(key))
        }
        _ => Err(ChainError::ChildKeyInvalid),
    }
}

/// The terminal link's X25519 encryption key, exactly 32 bytes (spec.md §3).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct X25519PublicKey(pub [u8; 32]);

fn jwk_to_x25519(jwk: &Jwk) -> Result<X25519PublicKey, ChainError> {
    if jwk.crv != "X25519" {
        return Err(ChainError::X25519Invalid);
    }
    let bytes = decode_jwk_coord(&jwk.x).map_err(|_| ChainError::X25519Invalid)?;
    let arr: [u8; 32] = bytes.try_into().map_err(|_| ChainError::X25519Invalid)?;
    Ok(X25519PublicKey(arr))
}

/// Failure modes, each tagged with the failing link index where applicable.
/// Error *names* (not just variants) are part of the testable contract in
/// spec.md §4.2 — order of evaluation is load-bearing, tests depend on it.
#[derive(Debug, Error, PartialEq)]
pub enum ChainError {
    #[error("chain-empty")]
    ChainEmpty,
    #[error("link-missing at index {0}")]
    LinkMissing(usize),
    #[error("root-not-trusted")]
    RootNotTrusted,
    #[error("sig-decode at index {0}")]
    SigDecode(usize),
    #[error("sig-invalid")]
    SigInvalid,
    #[error("payload-decode at index {0}")]
    PayloadDecode(usize),
    #[error("payload-parse at index {0}")]
    PayloadParse(usize),
    #[error("expired at index {0}, kid {1}")]
    Expired(usize, String),
    #[error("child-key-invalid")]
    ChildKeyInvalid,
    #[error("x25519-invalid")]
    X25519Invalid,
}

/// `Validate(chain, trustedKeys) -> (X25519 pub, error)` (spec.md §4.2).
pub struct ChainValidator;

impl ChainValidator {
    /// Walk the chain in the exact order spec.md §4.2 prescribes: tests
    /// depend on which failure fires first, so don't reorder these checks.
    pub fn validate(
        chain: &Chain,
        trusted_keys: &HashMap<String, EcdsaPublicKey>,
        now: i64,
    ) -> Result<X25519PublicKey, ChainError> {
        if chain.links.is_empty() {
            return Err(ChainError::ChainEmpty);
        }

        for (i, link) in chain.links.iter().enumerate() {
            if link.payload_b64url.is_empty() || link.signature_b64url.is_empty() {
                return Err(ChainError::LinkMissing(i));
            }
        }

        let root = trusted_keys
            .get(&chain.links[0].signed_by)
            .cloned()
            .ok_or(ChainError::RootNotTrusted)?;

        let n = chain.links.len();
        let mut parent = root;
        let mut terminal_payload: Option<ChainPayload> = None;

        for (i, link) in chain.links.iter().enumerate() {
            let signature_der = B64URL
                .decode(&link.signature_b64url)
                .map_err(|_| ChainError::SigDecode(i))?;

            parent.verify_der(link.payload_b64url.as_bytes(), &signature_der)?;

            let payload_bytes = B64URL
                .decode(&link.payload_b64url)
                .map_err(|_| ChainError::PayloadDecode(i))?;
            let payload: ChainPayload = serde_json::from_slice(&payload_bytes)
                .map_err(|_| ChainError::PayloadParse(i))?;

            if payload.expiration_date <= now {
                return Err(ChainError::Expired(i, payload.signed_by.clone()));
            }

            if i < n - 1 {
                parent = jwk_to_ecdsa(&payload.public_key)?;
            } else {
                terminal_payload = Some(payload);
            }
        }

        let terminal = terminal_payload.expect("loop always assigns the last index");
        jwk_to_x25519(&terminal.public_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecdsa::signature::Signer as SigSigner;
    use p256::ecdsa::{Signature as P256Sig, SigningKey as P256SigningKey};

    fn b64(bytes: &[u8]) -> String {
        B64URL.encode(bytes)
    }

    fn encode_p256_point(key: &p256::ecdsa::VerifyingKey) -> (String, String) {
        let point = key.to_encoded_point(false);
        (b64(point.x().unwrap()), b64(point.y().unwrap()))
    }

    fn make_link(signer: &P256SigningKey, payload: &ChainPayload, signed_by: &str) -> ChainLink {
        let payload_json = serde_json::to_vec(payload).unwrap();
        let payload_b64 = b64(&payload_json);
        let sig: P256Sig = signer.sign(payload_b64.as_bytes());
        ChainLink {
            payload_b64url: payload_b64,
            signature_b64url: b64(sig.to_der().as_bytes()),
            signed_by: signed_by.to_string(),
        }
    }

    fn p256_jwk(key: &p256::ecdsa::VerifyingKey, kid: &str) -> Jwk {
        let (x, y) = encode_p256_point(key);
        Jwk { crv: "P-256".to_string(), x, y: Some(y), kid: kid.to_string() }
    }

    fn x25519_jwk(pubkey: &[u8; 32]) -> Jwk {
        Jwk { crv: "X25519".to_string(), x: b64(pubkey), y: None, kid: String::new() }
    }

    /// Property 1: a well-formed chain validates and yields the terminal key.
    #[test]
    fn validates_a_well_formed_chain() {
        let root_key = P256SigningKey::random(&mut rand_core::OsRng);
        let mid_key = P256SigningKey::random(&mut rand_core::OsRng);
        let x25519_secret = x25519_dalek::StaticSecret::random_from_rng(rand_core::OsRng);
        let x25519_pub = x25519_dalek::PublicKey::from(&x25519_secret);

        let future = 9_999_999_999i64;

        let mid_payload = ChainPayload {
            account_uuid: "a".into(),
            user_uuid: "u".into(),
            date_time_signed: "now".into(),
            environment: "test".into(),
            expiration_date: future,
            public_key: p256_jwk(mid_key.verifying_key(), "mid"),
            signed_by: "root".into(),
            version: 1,
        };
        let link0 = make_link(&root_key, &mid_payload, "root");

        let term_payload = ChainPayload {
            account_uuid: "a".into(),
            user_uuid: "u".into(),
            date_time_signed: "now".into(),
            environment: "test".into(),
            expiration_date: future,
            public_key: x25519_jwk(x25519_pub.as_bytes()),
            signed_by: "mid".into(),
            version: 1,
        };
        let link1 = make_link(&mid_key, &term_payload, "mid");

        let chain = Chain { links: vec![link0, link1] };
        let mut trusted = HashMap::new();
        trusted.insert("root".to_string(), EcdsaPublicKey::P256(*root_key.verifying_key()));

        let result = ChainValidator::validate(&chain, &trusted, 1_000_000).unwrap();
        assert_eq!(result.0, *x25519_pub.as_bytes());
    }

    #[test]
    fn empty_chain_is_rejected_first() {
        let chain = Chain::default();
        let trusted = HashMap::new();
        assert_eq!(ChainValidator::validate(&chain, &trusted, 0), Err(ChainError::ChainEmpty));
    }

    #[test]
    fn missing_payload_is_rejected_before_trust_lookup() {
        let chain = Chain {
            links: vec![ChainLink {
                payload_b64url: String::new(),
                signature_b64url: "sig".into(),
                signed_by: "root".into(),
            }],
        };
        let trusted = HashMap::new();
        assert_eq!(ChainValidator::validate(&chain, &trusted, 0), Err(ChainError::LinkMissing(0)));
    }

    #[test]
    fn untrusted_root_is_rejected() {
        let chain = Chain {
            links: vec![ChainLink {
                payload_b64url: "cGF5bG9hZA".into(),
                signature_b64url: "c2ln".into(),
                signed_by: "unknown".into(),
            }],
        };
        let trusted = HashMap::new();
        assert_eq!(ChainValidator::validate(&chain, &trusted, 0), Err(ChainError::RootNotTrusted));
    }

    /// Property 2: forgery resistance — tampering with a signed payload
    /// after construction must flip the signature check, never succeed.
    #[test]
    fn tampered_payload_fails_signature_check() {
        let root_key = P256SigningKey::random(&mut rand_core::OsRng);
        let x25519_secret = x25519_dalek::StaticSecret::random_from_rng(rand_core::OsRng);
        let x25519_pub = x25519_dalek::PublicKey::from(&x25519_secret);

        let payload = ChainPayload {
            account_uuid: "a".into(),
            user_uuid: "u".into(),
            date_time_signed: "now".into(),
            environment: "test".into(),
            expiration_date: 9_999_999_999,
            public_key: x25519_jwk(x25519_pub.as_bytes()),
            signed_by: "root".into(),
            version: 1,
        };
        let mut link = make_link(&root_key, &payload, "root");
        // Tamper with the payload text without re-signing.
        link.payload_b64url = b64(b"{\"tampered\":true}");

        let chain = Chain { links: vec![link] };
        let mut trusted = HashMap::new();
        trusted.insert("root".to_string(), EcdsaPublicKey::P256(*root_key.verifying_key()));

        assert_eq!(ChainValidator::validate(&chain, &trusted, 0), Err(ChainError::SigInvalid));
    }

    #[test]
    fn expired_link_is_rejected() {
        let root_key = P256SigningKey::random(&mut rand_core::OsRng);
        let x25519_secret = x25519_dalek::StaticSecret::random_from_rng(rand_core::OsRng);
        let x25519_pub = x25519_dalek::PublicKey::from(&x25519_secret);

        let payload = ChainPayload {
            account_uuid: "a".into(),
            user_uuid: "u".into(),
            date_time_signed: "now".into(),
            environment: "test".into(),
            expiration_date: 100,
            public_key: x25519_jwk(x25519_pub.as_bytes()),
            signed_by: "root".into(),
            version: 1,
        };
        let link = make_link(&root_key, &payload, "root");
        let chain = Chain { links: vec![link] };
        let mut trusted = HashMap::new();
        trusted.insert("root".to_string(), EcdsaPublicKey::P256(*root_key.verifying_key()));

        assert_eq!(
            ChainValidator::validate(&chain, &trusted, 1_000_000),
            Err(ChainError::Expired(0, "root".to_string()))
        );
    }
}
