//! Narrow capability abstraction over a signing key, per spec.md §4.9 ("Dynamic
//! dispatch"). Hardware/secure-enclave signers are an opaque `Signer`; this
//! module only provides the software-backed implementation `LocalDbSigner`
//! wraps.

use p256::ecdsa::signature::Signer as _;
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::pkcs8::DecodePrivateKey;

/// A capability that can produce a public key and sign bytes with it.
///
/// `Public()` may return `None` even after construction succeeds: callers
/// must treat "present signer, no public key" identically to "absent
/// signer" (OS denied access to the hardware key).
pub trait Signer: Send + Sync {
    fn public(&self) -> Option<VerifyingKey>;
    fn sign(&self, message: &[u8]) -> Option<Signature>;
}

/// A P-256 ECDSA key held in process memory. Used as the "DB signer", which
/// per spec.md §4.1 is "never nil after construction; may be a software key".
pub struct SoftwareSigner {
    signing_key: SigningKey,
}

impl SoftwareSigner {
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut rand_core::OsRng),
        }
    }

    pub fn from_pkcs8_pem(pem: &str) -> Result<Self, p256::pkcs8::Error> {
        Ok(Self {
            signing_key: SigningKey::from_pkcs8_pem(pem)?,
        })
    }
}

impl Signer for SoftwareSigner {
    fn public(&self) -> Option<VerifyingKey> {
        Some(*self.signing_key.verifying_key())
    }

    fn sign(&self, message: &[u8]) -> Option<Signature> {
        Some(self.signing_key.sign(message))
    }
}

/// Represents a hardware/secure-enclave signer. Out of scope per spec.md §1;
/// this crate only ever sees it as `Option<Box<dyn Signer>>`, and on the
/// platforms this code targets it is always absent. A real implementation
/// would shell out to a platform keychain/TPM API behind the same trait.
pub struct AbsentHardwareSigner;

impl Signer for AbsentHardwareSigner {
    fn public(&self) -> Option<VerifyingKey> {
        None
    }

    fn sign(&self, _message: &[u8]) -> Option<Signature> {
        None
    }
}

/// Returns `true` if a signer is usable for sealing: present *and* its
/// public half is available (spec.md §4.4 step 8).
pub fn is_usable(signer: &dyn Signer) -> bool {
    signer.public().is_some()
}
