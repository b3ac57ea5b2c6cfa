use p256::pkcs8::DecodePublicKey;
use std::collections::HashMap;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use localserver::chain::EcdsaPublicKey;
use localserver::config::Config;
use localserver::keystore::KeyStore;
use localserver::kv::RocksDbStore;
use localserver::middleware::presence::NoopPresenceDetector;
use localserver::querier::UnconfiguredQuerier;
use localserver::server::Server;
use localserver::state::AppState;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "localserver=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting localserver trust endpoint");

    let config = Config::load().expect("failed to load configuration");
    tracing::info!(server_url = %config.server_url, kv_store_path = %config.kv_store_path, "configuration loaded");

    let kv: Arc<dyn localserver::kv::KvStore> =
        Arc::new(RocksDbStore::open(&config.kv_store_path).expect("failed to open kv store"));

    // Parsing failure here is fatal: the process MUST NOT start (spec.md §4.1).
    let keystore =
        KeyStore::load_default_keys(&config.server_url, kv.as_ref()).await.expect("failed to load keys");

    let trusted_chain_roots = load_trust_roots(&config.trusted_chain_roots);

    let querier = Arc::new(UnconfiguredQuerier);
    let state = Arc::new(AppState::new(
        config,
        keystore,
        kv,
        querier.clone(),
        querier,
        Arc::new(NoopPresenceDetector),
        trusted_chain_roots,
    ));

    let server = Server::new(state);
    let interrupt = server.interrupt_handle();

    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("received interrupt signal, shutting down");
        interrupt.interrupt();
    });

    if let Err(err) = server.run().await {
        tracing::error!(error = %err, "server exited with error");
        std::process::exit(1);
    }
}

/// Parse each configured `kid -> PEM` entry into a P-256 chain-of-trust root
/// (spec.md §4.2 `trustedKeys`). An unparseable entry is logged and skipped
/// rather than treated as fatal, since it affects only that one root.
fn load_trust_roots(entries: &HashMap<String, String>) -> HashMap<String, EcdsaPublicKey> {
    let mut roots = HashMap::new();
    for (kid, pem) in entries {
        match p256::ecdsa::VerifyingKey::from_public_key_pem(pem) {
            Ok(key) => {
                roots.insert(kid.clone(), EcdsaPublicKey::P256(key));
            }
            Err(err) => {
                tracing::error!(kid = %kid, error = %err, "failed to parse trusted chain root, skipping");
            }
        }
    }
    roots
}
