//! Shared application state (spec.md §9 "no true singletons; everything is
//! owned by the Server value").

use std::collections::HashMap;
use std::sync::Arc;

use crate::callback::CallbackSender;
use crate::chain::EcdsaPublicKey;
use crate::challenge::ChallengeCache;
use crate::config::Config;
use crate::identity::IdentityHandle;
use crate::keystore::KeyStore;
use crate::kv::KvStore;
use crate::middleware::presence::PresenceDetector;
use crate::querier::{DistributedAccelerator, Querier};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub keystore: Arc<KeyStore>,
    pub kv: Arc<dyn KvStore>,
    pub callbacks: CallbackSender,
    pub identity: IdentityHandle,
    pub querier: Arc<dyn Querier>,
    pub accelerator: Arc<dyn DistributedAccelerator>,
    pub presence: Arc<dyn PresenceDetector>,
    pub challenges: Arc<ChallengeCache>,
    /// Trust-chain roots indexed by `kid` (spec.md §4.2 `trustedKeys`).
    pub trusted_chain_roots: Arc<HashMap<String, EcdsaPublicKey>>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        keystore: KeyStore,
        kv: Arc<dyn KvStore>,
        querier: Arc<dyn Querier>,
        accelerator: Arc<dyn DistributedAccelerator>,
        presence: Arc<dyn PresenceDetector>,
        trusted_chain_roots: HashMap<String, EcdsaPublicKey>,
    ) -> Self {
        Self {
            config,
            keystore: Arc::new(keystore),
            kv,
            callbacks: crate::callback::spawn_worker(),
            identity: IdentityHandle::new(),
            querier,
            accelerator,
            presence,
            challenges: Arc::new(ChallengeCache::new()),
            trusted_chain_roots: Arc::new(trusted_chain_roots),
        }
    }
}
