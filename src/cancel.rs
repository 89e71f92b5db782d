use std::{
    collections::HashMap,
    sync::Mutex,
    time::{
        Duration,
        Instant,
    },
};
use async_trait::async_trait;

// how long a cancellation request stays visible
pub const CANCELLATION_TTL: Duration = Duration::from_secs(86_400);

// cooperative abort flags, keyed by run token
#[async_trait]
pub trait CancellationStore: Send + Sync {
    async fn set_with_expiry(&self, token: &str, ttl: Duration) -> anyhow::Result<()>;

    async fn exists(&self, token: &str) -> anyhow::Result<bool>;
}

fn flag_key(token: &str) -> String {
    format!("cancelled-{token}")
}

pub struct RedisCancellationStore {
    con: redis::aio::MultiplexedConnection,
}

impl RedisCancellationStore {
    pub fn new(con: redis::aio::MultiplexedConnection) -> Self {
        Self {
            con: con,
        }
    }
}

#[async_trait]
impl CancellationStore for RedisCancellationStore {
    async fn set_with_expiry(&self, token: &str, ttl: Duration) -> anyhow::Result<()> {
        let mut con = self.con.clone();
        redis::cmd("SETEX")
            .arg(flag_key(token))
            .arg(ttl.as_secs().max(1))
            .arg(1)
            .query_async::<()>(&mut con)
            .await?;
        Ok(())
    }

    async fn exists(&self, token: &str) -> anyhow::Result<bool> {
        let mut con = self.con.clone();
        let count: u32 = redis::cmd("EXISTS")
            .arg(flag_key(token))
            .query_async(&mut con)
            .await?;
        Ok(count > 0)
    }
}

#[derive(Debug, Default)]
pub struct MemoryCancellationStore {
    flags: Mutex<HashMap<String, Instant>>,
}

impl MemoryCancellationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CancellationStore for MemoryCancellationStore {
    async fn set_with_expiry(&self, token: &str, ttl: Duration) -> anyhow::Result<()> {
        self.flags
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(flag_key(token), Instant::now() + ttl);
        Ok(())
    }

    async fn exists(&self, token: &str) -> anyhow::Result<bool> {
        let mut flags = self.flags
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let key = flag_key(token);
        match flags.get(&key) {
            Some(expiry) if *expiry > Instant::now() => Ok(true),

            Some(_) => {
                flags.remove(&key);
                Ok(false)
            },

            None => Ok(false),
        }
    }
}
