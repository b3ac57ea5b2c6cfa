//! Key loading and selection (spec.md §4.1).
//!
//! `KeyStore` owns the local RSA private key, the local ECDSA "DB signer",
//! the optional hardware signer, and the counter-party public keys selected
//! by a server-URL heuristic. Every field is set at construction and is an
//! infallible read thereafter.

use p256::pkcs8::DecodePublicKey;
use rsa::pkcs8::DecodePublicKey as _;
use std::sync::Arc;
use thiserror::Error;

use crate::kv::{KvError, KvStore, BUCKET_CONFIG};
use crate::signer::{AbsentHardwareSigner, Signer, SoftwareSigner};

#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("failed to parse embedded key bundle: {0}")]
    BundleParse(String),
    #[error("failed to load RSA private key from persistent config: {0}")]
    RsaLoad(#[from] KvError),
    #[error("failed to parse RSA private key: {0}")]
    RsaParse(String),
}

/// One of the three hard-coded counter-party key bundles.
struct KeyBundle {
    rsa_public_pem: &'static str,
    ecdsa_public_pem: &'static str,
}

const DEV_BUNDLE: KeyBundle = KeyBundle {
    rsa_public_pem: include_str!("../keys/dev_rsa_pub.pem"),
    ecdsa_public_pem: include_str!("../keys/dev_ec_pub.pem"),
};
const REVIEW_BUNDLE: KeyBundle = KeyBundle {
    rsa_public_pem: include_str!("../keys/review_rsa_pub.pem"),
    ecdsa_public_pem: include_str!("../keys/review_ec_pub.pem"),
};
const PROD_BUNDLE: KeyBundle = KeyBundle {
    rsa_public_pem: include_str!("../keys/prod_rsa_pub.pem"),
    ecdsa_public_pem: include_str!("../keys/prod_ec_pub.pem"),
};

/// Select a bundle by the server-URL rules in spec.md §4.1.
fn select_bundle(server_url: &str) -> &'static KeyBundle {
    let host = extract_host(server_url);

    if host.starts_with("localhost") || host.starts_with("127.0.0.1") || host.contains(".ngrok.") {
        &DEV_BUNDLE
    } else if host.ends_with(".herokuapp.com") {
        &REVIEW_BUNDLE
    } else {
        &PROD_BUNDLE
    }
}

fn extract_host(server_url: &str) -> String {
    server_url
        .split("://")
        .last()
        .unwrap_or(server_url)
        .split('/')
        .next()
        .unwrap_or("")
        .to_lowercase()
}

pub struct KeyStore {
    counter_party_ecdsa: p256::ecdsa::VerifyingKey,
    counter_party_rsa: rsa::RsaPublicKey,
    #[allow(dead_code)]
    rsa_private_key: rsa::RsaPrivateKey,
    local_db_signer: Arc<dyn Signer>,
    hardware_signer: Option<Arc<dyn Signer>>,
}

impl KeyStore {
    /// Parsing failure is fatal: the process MUST NOT start (spec.md §4.1).
    /// Construction also fails if the RSA key load from the persistent
    /// "config" bucket fails.
    pub async fn load_default_keys(
        server_url: &str,
        kv: &dyn KvStore,
    ) -> Result<Self, KeyStoreError> {
        let bundle = select_bundle(server_url);

        let counter_party_ecdsa = p256::ecdsa::VerifyingKey::from_public_key_pem(bundle.ecdsa_public_pem)
            .map_err(|e| KeyStoreError::BundleParse(e.to_string()))?;
        let counter_party_rsa = rsa::RsaPublicKey::from_public_key_pem(bundle.rsa_public_pem)
            .map_err(|e| KeyStoreError::BundleParse(e.to_string()))?;

        let rsa_private_key = load_or_bootstrap_rsa_key(kv).await?;

        Ok(Self {
            counter_party_ecdsa,
            counter_party_rsa,
            rsa_private_key,
            local_db_signer: Arc::new(SoftwareSigner::generate()),
            hardware_signer: None,
        })
    }

    /// Construct a `KeyStore` directly from known keys, bypassing bundle
    /// selection and KV-backed RSA loading. Used by integration tests that
    /// need to control the counter-party key pair.
    pub fn for_testing(
        counter_party_ecdsa: p256::ecdsa::VerifyingKey,
        local_db_signer: Arc<dyn Signer>,
    ) -> Self {
        // The textbook RSA example (n = 61*53, e = 17, d = 2753): not secret
        // material, just a structurally valid key so tests needn't generate
        // a real 2048-bit key on every run.
        let rsa_private_key = rsa::RsaPrivateKey::from_components(
            rsa::BigUint::from(3233u32),
            rsa::BigUint::from(17u32),
            rsa::BigUint::from(2753u32),
            vec![rsa::BigUint::from(61u32), rsa::BigUint::from(53u32)],
        )
        .expect("fixed toy RSA components are valid");
        let counter_party_rsa = rsa_private_key.to_public_key();

        Self {
            counter_party_ecdsa,
            counter_party_rsa,
            rsa_private_key,
            local_db_signer,
            hardware_signer: None,
        }
    }

    pub fn with_hardware_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.hardware_signer = Some(signer);
        self
    }

    pub fn counter_party_ecdsa(&self) -> &p256::ecdsa::VerifyingKey {
        &self.counter_party_ecdsa
    }

    pub fn counter_party_rsa(&self) -> &rsa::RsaPublicKey {
        &self.counter_party_rsa
    }

    pub fn local_db_signer(&self) -> &dyn Signer {
        self.local_db_signer.as_ref()
    }

    /// May be present yet report no public key (spec.md §4.1); callers must
    /// treat that identically to "absent".
    pub fn hardware_signer(&self) -> Option<&dyn Signer> {
        self.hardware_signer.as_deref()
    }
}

/// On first boot there is no RSA key in the "config" bucket yet; generate
/// one and persist it. A KV backend *error* (not merely "missing") is fatal
/// per spec.md §4.1's failure semantics.
async fn load_or_bootstrap_rsa_key(kv: &dyn KvStore) -> Result<rsa::RsaPrivateKey, KeyStoreError> {
    use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey};

    match kv.get(BUCKET_CONFIG, "launcher_rsa_private_key").await? {
        Some(bytes) => {
            let pem = String::from_utf8(bytes).map_err(|e| KeyStoreError::RsaParse(e.to_string()))?;
            rsa::RsaPrivateKey::from_pkcs8_pem(&pem).map_err(|e| KeyStoreError::RsaParse(e.to_string()))
        }
        None => {
            let key = rsa::RsaPrivateKey::new(&mut rand_core::OsRng, 2048)
                .map_err(|e| KeyStoreError::RsaParse(e.to_string()))?;
            let pem = key
                .to_pkcs8_pem(rsa::pkcs8::LineEnding::LF)
                .map_err(|e| KeyStoreError::RsaParse(e.to_string()))?;
            kv.set(BUCKET_CONFIG, "launcher_rsa_private_key", pem.as_bytes().to_vec())
                .await?;
            Ok(key)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;

    #[test]
    fn localhost_selects_dev_bundle() {
        assert!(std::ptr::eq(select_bundle("http://localhost:9000"), &DEV_BUNDLE));
        assert!(std::ptr::eq(select_bundle("http://127.0.0.1:9000"), &DEV_BUNDLE));
        assert!(std::ptr::eq(select_bundle("https://foo.ngrok.io"), &DEV_BUNDLE));
    }

    #[test]
    fn herokuapp_selects_review_bundle() {
        assert!(std::ptr::eq(select_bundle("https://my-app.herokuapp.com"), &REVIEW_BUNDLE));
    }

    #[test]
    fn anything_else_selects_prod_bundle() {
        assert!(std::ptr::eq(select_bundle("https://k2.kolide.com"), &PROD_BUNDLE));
    }

    #[tokio::test]
    async fn construction_bootstraps_and_then_reuses_rsa_key() {
        let kv = MemoryKvStore::new();
        let store = KeyStore::load_default_keys("https://k2.kolide.com", &kv).await.unwrap();
        let first_public = store.rsa_private_key.to_public_key();

        let store2 = KeyStore::load_default_keys("https://k2.kolide.com", &kv).await.unwrap();
        assert_eq!(store2.rsa_private_key.to_public_key(), first_public);
    }

    #[test]
    fn local_db_signer_is_never_absent() {
        let signer = Arc::new(SoftwareSigner::generate());
        let pubkey = signer.public().unwrap();
        let store = KeyStore::for_testing(pubkey, signer);
        assert!(store.local_db_signer().public().is_some());
        assert!(store.hardware_signer().is_none());
    }
}
