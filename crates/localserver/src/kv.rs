//! Opaque persistent key-value store (spec.md §1 "treated as an opaque
//! `Get/Set/Delete` byte map", §6 buckets "dt4a info" / "config").
//!
//! One trait, a `rocksdb`-backed production implementation, and an
//! in-memory implementation used only by tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, KvError>;
    async fn set(&self, bucket: &str, key: &str, value: Vec<u8>) -> Result<(), KvError>;
    async fn delete(&self, bucket: &str, key: &str) -> Result<(), KvError>;
}

fn namespaced_key(bucket: &str, key: &str) -> Vec<u8> {
    format!("{bucket}\0{key}").into_bytes()
}

/// Production-backing store. RocksDB has no native buckets, so the bucket
/// name is folded into the key.
pub struct RocksDbStore {
    db: rocksdb::DB,
}

impl RocksDbStore {
    pub fn open(path: &str) -> Result<Self, KvError> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let mut opts = rocksdb::Options::default();
        opts.create_if_missing(true);
        let db = rocksdb::DB::open(&opts, path).map_err(|e| KvError::Backend(e.to_string()))?;
        Ok(Self { db })
    }
}

#[async_trait]
impl KvStore for RocksDbStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        self.db
            .get(namespaced_key(bucket, key))
            .map_err(|e| KvError::Backend(e.to_string()))
    }

    async fn set(&self, bucket: &str, key: &str, value: Vec<u8>) -> Result<(), KvError> {
        self.db
            .put(namespaced_key(bucket, key), value)
            .map_err(|e| KvError::Backend(e.to_string()))
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), KvError> {
        self.db
            .delete(namespaced_key(bucket, key))
            .map_err(|e| KvError::Backend(e.to_string()))
    }
}

/// In-memory store for tests; never used in production.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        Ok(self.entries.lock().unwrap().get(&namespaced_key(bucket, key)).cloned())
    }

    async fn set(&self, bucket: &str, key: &str, value: Vec<u8>) -> Result<(), KvError> {
        self.entries.lock().unwrap().insert(namespaced_key(bucket, key), value);
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), KvError> {
        self.entries.lock().unwrap().remove(&namespaced_key(bucket, key));
        Ok(())
    }
}

/// "dt4a info" bucket (spec.md §6).
pub const BUCKET_DT4A_INFO: &str = "dt4a info";
/// "config" bucket, holds the launcher RSA private key (spec.md §6).
pub const BUCKET_CONFIG: &str = "config";
/// Fallback key used by `Dt4aInfoHandler` when no account UUID is given.
pub const LEGACY_DT4A_KEY: &str = "localserver_zta_info";
