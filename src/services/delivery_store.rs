//! Shared state behind replay protection and per-source rate limiting.
//!
//! Lives in Redis so every ingress instance sees the same deliveries.

use crate::connectors::ConnectorError;
use async_trait::async_trait;
use rand::Rng;
use redis::aio::ConnectionManager;
use std::time::Duration;

const KEY_PREFIX: &str = "previewer";

#[async_trait]
pub trait DeliveryStore: Send + Sync {
    /// Records `delivery_id` for `ttl`; false when it was already recorded.
    async fn first_delivery(&self, delivery_id: &str, ttl: Duration)
        -> Result<bool, ConnectorError>;

    /// Drops the record for `delivery_id` so a redelivery is processed.
    async fn forget(&self, delivery_id: &str) -> Result<(), ConnectorError>;

    /// Counts one request from `source`; false once more than `limit`
    /// requests fell inside the trailing `window`.
    async fn allow(&self, source: &str, limit: u32, window: Duration)
        -> Result<bool, ConnectorError>;
}

#[derive(Clone)]
pub struct RedisDeliveryStore {
    connection: ConnectionManager,
}

impl RedisDeliveryStore {
    pub async fn new(redis_url: &str) -> Result<Self, ConnectorError> {
        let client = redis::Client::open(redis_url).map_err(|err| {
            ConnectorError::Internal(format!("Invalid Redis URL for delivery store: {}", err))
        })?;
        let connection = ConnectionManager::new(client).await.map_err(|err| {
            ConnectorError::ServiceUnavailable(format!("Redis unavailable: {}", err))
        })?;
        Ok(Self { connection })
    }
}

fn unavailable(err: redis::RedisError) -> ConnectorError {
    ConnectorError::ServiceUnavailable(format!("Redis command failed: {}", err))
}

#[async_trait]
impl DeliveryStore for RedisDeliveryStore {
    async fn first_delivery(
        &self,
        delivery_id: &str,
        ttl: Duration,
    ) -> Result<bool, ConnectorError> {
        let mut conn = self.connection.clone();
        let key = format!("{}:delivery:{}", KEY_PREFIX, delivery_id);
        let result: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(result.is_some())
    }

    async fn forget(&self, delivery_id: &str) -> Result<(), ConnectorError> {
        let mut conn = self.connection.clone();
        let key = format!("{}:delivery:{}", KEY_PREFIX, delivery_id);
        let _removed: i64 = redis::cmd("DEL")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn allow(
        &self,
        source: &str,
        limit: u32,
        window: Duration,
    ) -> Result<bool, ConnectorError> {
        let mut conn = self.connection.clone();
        let key = format!("{}:rate:{}", KEY_PREFIX, source);
        let now_ms = chrono::Utc::now().timestamp_millis();
        let window_ms = window.as_millis() as i64;
        let member = format!("{}-{}", now_ms, rand::thread_rng().gen::<u32>());

        let (_, _, count, _): (i64, i64, i64, i64) = redis::pipe()
            .atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(&key)
            .arg(0)
            .arg(now_ms - window_ms)
            .cmd("ZADD")
            .arg(&key)
            .arg(now_ms)
            .arg(&member)
            .cmd("ZCARD")
            .arg(&key)
            .cmd("PEXPIRE")
            .arg(&key)
            .arg(window_ms)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;

        Ok(count <= limit as i64)
    }
}

#[cfg(test)]
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Instant;

    /// Single-process stand-in for tests.
    #[derive(Default)]
    pub struct MemoryDeliveryStore {
        deliveries: Mutex<HashMap<String, Instant>>,
        hits: Mutex<HashMap<String, Vec<Instant>>>,
        pub unavailable: Mutex<bool>,
    }

    impl MemoryDeliveryStore {
        pub fn new() -> Self {
            Self::default()
        }

        fn check_available(&self) -> Result<(), ConnectorError> {
            if *self.unavailable.lock().unwrap() {
                return Err(ConnectorError::ServiceUnavailable("redis down".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl DeliveryStore for MemoryDeliveryStore {
        async fn first_delivery(
            &self,
            delivery_id: &str,
            ttl: Duration,
        ) -> Result<bool, ConnectorError> {
            self.check_available()?;
            let now = Instant::now();
            let mut deliveries = self.deliveries.lock().unwrap();
            match deliveries.get(delivery_id) {
                Some(seen) if now.duration_since(*seen) < ttl => Ok(false),
                _ => {
                    deliveries.insert(delivery_id.to_string(), now);
                    Ok(true)
                }
            }
        }

        async fn forget(&self, delivery_id: &str) -> Result<(), ConnectorError> {
            self.check_available()?;
            self.deliveries.lock().unwrap().remove(delivery_id);
            Ok(())
        }

        async fn allow(
            &self,
            source: &str,
            limit: u32,
            window: Duration,
        ) -> Result<bool, ConnectorError> {
            self.check_available()?;
            let now = Instant::now();
            let mut hits = self.hits.lock().unwrap();
            let entry = hits.entry(source.to_string()).or_default();
            entry.retain(|t| now.duration_since(*t) < window);
            entry.push(now);
            Ok(entry.len() <= limit as usize)
        }
    }
}
