// src/services/run_store.rs
use crate::errors::PageGenError;
use crate::models::{ReferenceImage, RunRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use uuid::Uuid;

/// Persistence for finished runs and uploaded reference images.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn put_run(&self, record: &RunRecord) -> Result<(), PageGenError>;
    async fn get_run(&self, run_id: &Uuid) -> Result<RunRecord, PageGenError>;
    async fn put_reference_images(
        &self,
        upload_id: &Uuid,
        images: &[ReferenceImage],
    ) -> Result<(), PageGenError>;
    async fn get_reference_images(&self, upload_id: &Uuid) -> Result<Vec<ReferenceImage>, PageGenError>;
}

/// Process-local store, used when no Redis URL is configured. Entries
/// expire after the configured TTL, like the Redis keys do.
pub struct MemoryStore {
    ttl: Duration,
    runs: RwLock<HashMap<Uuid, Expiring<RunRecord>>>,
    uploads: RwLock<HashMap<Uuid, Expiring<Vec<ReferenceImage>>>>,
}

struct Expiring<T> {
    value: T,
    expires_at: Instant,
}

impl<T: Clone> Expiring<T> {
    fn live(&self, now: Instant) -> Option<T> {
        (now < self.expires_at).then(|| self.value.clone())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_ttl(Duration::from_secs(DEFAULT_TTL_SECS))
    }
}

const DEFAULT_TTL_SECS: u64 = 86400;

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            runs: RwLock::new(HashMap::new()),
            uploads: RwLock::new(HashMap::new()),
        }
    }

    fn entry<T>(&self, value: T) -> Expiring<T> {
        Expiring {
            value,
            expires_at: Instant::now() + self.ttl,
        }
    }
}

/// Drops expired entries, then inserts. Eviction piggybacks on writes.
fn insert_evicting<T>(map: &mut HashMap<Uuid, Expiring<T>>, key: Uuid, entry: Expiring<T>) {
    let now = Instant::now();
    map.retain(|_, existing| now < existing.expires_at);
    map.insert(key, entry);
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn put_run(&self, record: &RunRecord) -> Result<(), PageGenError> {
        let entry = self.entry(record.clone());
        insert_evicting(&mut *self.runs.write().await, record.id, entry);
        Ok(())
    }

    async fn get_run(&self, run_id: &Uuid) -> Result<RunRecord, PageGenError> {
        self.runs
            .read()
            .await
            .get(run_id)
            .and_then(|entry| entry.live(Instant::now()))
            .ok_or_else(|| PageGenError::NotFound(format!("run {}", run_id)))
    }

    async fn put_reference_images(
        &self,
        upload_id: &Uuid,
        images: &[ReferenceImage],
    ) -> Result<(), PageGenError> {
        let entry = self.entry(images.to_vec());
        insert_evicting(&mut *self.uploads.write().await, *upload_id, entry);
        Ok(())
    }

    async fn get_reference_images(&self, upload_id: &Uuid) -> Result<Vec<ReferenceImage>, PageGenError> {
        self.uploads
            .read()
            .await
            .get(upload_id)
            .and_then(|entry| entry.live(Instant::now()))
            .ok_or_else(|| PageGenError::NotFound(format!("upload {}", upload_id)))
    }
}
