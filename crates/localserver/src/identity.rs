//! Identity record and its periodic refresher (spec.md §3 "Identity record",
//! §4.6 "Async identity refresher").

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

use crate::config::{IDENTITY_POLL_INTERVAL, IDENTITY_RECALCULATE_INTERVAL};
use crate::querier::Querier;

/// `{UUID, InstanceId, HardwareSerial}` (spec.md §3). Mutated only by the
/// refresher; read-mostly elsewhere, so it is shared behind a `RwLock`
/// rather than re-queried per request.
#[derive(Debug, Clone, Default)]
pub struct Identity {
    pub uuid: String,
    pub instance_id: String,
    pub hardware_serial: String,
}

/// Shared, owned by the `Server` value (spec.md §9 "no true singletons").
pub struct IdentityHandle {
    inner: Arc<RwLock<Identity>>,
}

impl Clone for IdentityHandle {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl IdentityHandle {
    pub fn new() -> Self {
        Self { inner: Arc::new(RwLock::new(Identity::default())) }
    }

    pub async fn snapshot(&self) -> Identity {
        self.inner.read().await.clone()
    }

    async fn set(&self, identity: Identity) {
        *self.inner.write().await = identity;
    }
}

impl Default for IdentityHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn the periodic refresher task. Readers may race with an in-flight
/// update and observe a stale snapshot; per spec.md §5 that is acceptable.
pub fn spawn_refresher(handle: IdentityHandle, querier: Arc<dyn Querier>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_success: Option<Instant> = None;
        loop {
            tokio::time::sleep(IDENTITY_POLL_INTERVAL).await;

            let due = match last_success {
                None => true,
                Some(t) => t.elapsed() >= IDENTITY_RECALCULATE_INTERVAL,
            };
            if !due {
                continue;
            }

            match querier.identity_fields().await {
                Ok((uuid, instance_id, hardware_serial)) => {
                    handle.set(Identity { uuid, instance_id, hardware_serial }).await;
                    last_success = Some(Instant::now());
                    tracing::debug!("identity refreshed");
                }
                Err(err) => {
                    // Background failures are logged, never surfaced, retried next tick.
                    tracing::warn!(error = %err, "identity refresh failed, will retry next tick");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::querier::QueryError;
    use async_trait::async_trait;

    struct FixedQuerier;

    #[async_trait]
    impl Querier for FixedQuerier {
        async fn query(&self, _sql: &str) -> Result<Vec<crate::querier::Row>, QueryError> {
            Ok(vec![])
        }
        async fn scheduled_query(&self, _name: &str) -> Result<Vec<crate::querier::Row>, QueryError> {
            Ok(vec![])
        }
        async fn identity_fields(&self) -> Result<(String, String, String), QueryError> {
            Ok(("uuid-1".to_string(), "inst-1".to_string(), "serial-1".to_string()))
        }
    }

    #[tokio::test]
    async fn snapshot_starts_empty() {
        let handle = IdentityHandle::new();
        let identity = handle.snapshot().await;
        assert!(identity.uuid.is_empty());
    }

    #[tokio::test]
    async fn set_is_visible_to_subsequent_reads() {
        let handle = IdentityHandle::new();
        handle
            .set(Identity { uuid: "x".into(), instance_id: "y".into(), hardware_serial: "z".into() })
            .await;
        let identity = handle.snapshot().await;
        assert_eq!(identity.uuid, "x");
    }
}
