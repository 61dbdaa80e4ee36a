// src/services/redis_service.rs
use crate::errors::PageGenError;
use crate::models::{ReferenceImage, RunRecord};
use crate::services::run_store::RunStore;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

pub struct RedisService {
    conn: ConnectionManager,
    ttl_secs: usize,
}

impl RedisService {
    pub async fn new(redis_url: &str, ttl_secs: u64) -> Result<Self, PageGenError> {
        let client = Client::open(redis_url).map_err(|e| PageGenError::Storage(e.to_string()))?;

        let mut conn = ConnectionManager::new(client)
            .await
            .map_err(|e| PageGenError::Storage(e.to_string()))?;

        // Test connection
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map_err(|e| PageGenError::Storage(e.to_string()))?;

        Ok(Self {
            conn,
            ttl_secs: ttl_secs as usize,
        })
    }

    async fn put_json<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<(), PageGenError> {
        let mut conn = self.conn.clone();
        let value =
            serde_json::to_string(value).map_err(|e| PageGenError::Serialization(e.to_string()))?;

        conn.set_ex::<_, _, ()>(key, value, self.ttl_secs)
            .await
            .map_err(|e| PageGenError::Storage(e.to_string()))
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<T, PageGenError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| PageGenError::Storage(e.to_string()))?;

        let value = value.ok_or_else(|| PageGenError::NotFound(key.to_string()))?;
        serde_json::from_str(&value).map_err(|e| PageGenError::Serialization(e.to_string()))
    }
}

#[async_trait]
impl RunStore for RedisService {
    async fn put_run(&self, record: &RunRecord) -> Result<(), PageGenError> {
        self.put_json(&run_key(&record.id), record).await
    }

    async fn get_run(&self, run_id: &Uuid) -> Result<RunRecord, PageGenError> {
        self.get_json(&run_key(run_id)).await
    }

    async fn put_reference_images(
        &self,
        upload_id: &Uuid,
        images: &[ReferenceImage],
    ) -> Result<(), PageGenError> {
        self.put_json(&upload_key(upload_id), &images).await
    }

    async fn get_reference_images(&self, upload_id: &Uuid) -> Result<Vec<ReferenceImage>, PageGenError> {
        self.get_json(&upload_key(upload_id)).await
    }
}

fn run_key(run_id: &Uuid) -> String {
    format!("run:{}", run_id)
}

fn upload_key(upload_id: &Uuid) -> String {
    format!("uploads:{}", upload_id)
}
