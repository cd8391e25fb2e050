//! Redis Backend Driver
//!
//! Liveness is a full write/read/delete round-trip on sentinel keys:
//!
//! ```text
//! SET DEVOPS_TEST_KEY → GET (must match) → INCR SRE_TEST_COUNTER
//!     → DEL both → EXISTS DEVOPS_TEST_KEY (must be 0)
//! ```
//!
//! Every step must succeed in order. A delete that silently does nothing
//! is a failure even when all earlier steps passed.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tracing::{debug, error};

use crate::adapters::connection::ConnectionSlot;
use crate::config::ServiceSpec;
use crate::domain::BackendDriver;
use crate::error::{Error, Result};

/// Backend name used in logs and errors.
pub const BACKEND: &str = "Redis";

/// Sentinel key written and removed every cycle.
pub const TEST_KEY: &str = "DEVOPS_TEST_KEY";

/// Value stored under [`TEST_KEY`].
pub const TEST_PAYLOAD: &str = "DEVOPS_TEST_VALUE";

/// Counter incremented every cycle.
pub const COUNTER_KEY: &str = "SRE_TEST_COUNTER";

// =============================================================================
// Cache Commands
// =============================================================================

/// The handful of cache commands the round-trip needs.
#[async_trait]
pub trait CacheCommands: Send {
    async fn set(&mut self, key: &str, value: &str) -> Result<()>;
    async fn get(&mut self, key: &str) -> Result<Option<String>>;
    async fn incr(&mut self, key: &str) -> Result<i64>;
    async fn del(&mut self, key: &str) -> Result<()>;
    async fn exists(&mut self, key: &str) -> Result<bool>;
}

#[async_trait]
impl CacheCommands for MultiplexedConnection {
    async fn set(&mut self, key: &str, value: &str) -> Result<()> {
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async::<()>(self)
            .await
            .map_err(|e| Error::exercise(BACKEND, format!("SET failed: {}", e)))
    }

    async fn get(&mut self, key: &str) -> Result<Option<String>> {
        redis::cmd("GET")
            .arg(key)
            .query_async::<Option<String>>(self)
            .await
            .map_err(|e| Error::exercise(BACKEND, format!("GET failed: {}", e)))
    }

    async fn incr(&mut self, key: &str) -> Result<i64> {
        redis::cmd("INCR")
            .arg(key)
            .query_async::<i64>(self)
            .await
            .map_err(|e| Error::exercise(BACKEND, format!("INCR failed: {}", e)))
    }

    async fn del(&mut self, key: &str) -> Result<()> {
        redis::cmd("DEL")
            .arg(key)
            .query_async::<()>(self)
            .await
            .map_err(|e| Error::exercise(BACKEND, format!("DEL failed: {}", e)))
    }

    async fn exists(&mut self, key: &str) -> Result<bool> {
        redis::cmd("EXISTS")
            .arg(key)
            .query_async::<i64>(self)
            .await
            .map(|count| count > 0)
            .map_err(|e| Error::exercise(BACKEND, format!("EXISTS failed: {}", e)))
    }
}

/// Run the sentinel round-trip against any cache.
pub async fn cache_round_trip<C: CacheCommands + ?Sized>(conn: &mut C) -> Result<bool> {
    conn.set(TEST_KEY, TEST_PAYLOAD).await?;
    debug!(key = TEST_KEY, value = TEST_PAYLOAD, "Set key");

    match conn.get(TEST_KEY).await? {
        Some(value) if value == TEST_PAYLOAD => debug!(key = TEST_KEY, "Value matches"),
        other => {
            error!(key = TEST_KEY, value = ?other, "Key not found or value mismatch");
            return Ok(false);
        }
    }

    conn.incr(COUNTER_KEY).await?;
    let counter = conn.get(COUNTER_KEY).await?;
    debug!(counter = ?counter, "Incremented counter");

    conn.del(TEST_KEY).await?;
    conn.del(COUNTER_KEY).await?;

    let still_there = conn.exists(TEST_KEY).await?;
    if still_there {
        error!(key = TEST_KEY, "Key still exists after delete");
    }
    Ok(!still_there)
}

// =============================================================================
// Driver
// =============================================================================

/// Build the connection URL for a service.
pub fn connection_url(spec: &ServiceSpec) -> String {
    let auth = &spec.authentication;
    let userinfo = match (&auth.username, &auth.password) {
        (Some(user), Some(pass)) => format!(
            "{}:{}@",
            urlencoding::encode(user),
            urlencoding::encode(pass)
        ),
        (None, Some(pass)) => format!(":{}@", urlencoding::encode(pass)),
        (Some(user), None) => format!("{}@", urlencoding::encode(user)),
        (None, None) => String::new(),
    };
    let db = auth.db.as_ref().and_then(|d| d.index()).unwrap_or(0);

    format!("redis://{}{}:{}/{}", userinfo, spec.fqdn, spec.port, db)
}

/// Driver for one Redis server.
pub struct RedisDriver {
    client: redis::Client,
    slot: ConnectionSlot<MultiplexedConnection>,
}

impl RedisDriver {
    pub fn new(spec: &ServiceSpec) -> Result<Self> {
        let client =
            redis::Client::open(connection_url(spec).as_str()).map_err(|e| Error::Configuration {
                service: spec.name.clone(),
                reason: format!("invalid Redis address: {}", e),
            })?;

        Ok(Self {
            client,
            slot: ConnectionSlot::new(BACKEND),
        })
    }

    pub fn from_spec(spec: &ServiceSpec) -> Result<Box<dyn BackendDriver>> {
        Ok(Box::new(Self::new(spec)?))
    }
}

pub async fn connect(client: &redis::Client) -> Result<MultiplexedConnection> {
    client
        .get_multiplexed_async_connection()
        .await
        .map_err(|e| Error::connection(BACKEND, e))
}

#[async_trait]
impl BackendDriver for RedisDriver {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn get_connection(&mut self, force: bool) -> Result<()> {
        let client = &self.client;
        self.slot
            .get_or_connect(force, |_| true, || connect(client))
            .await
            .map(|_| ())
    }

    async fn exercise(&mut self) -> Result<bool> {
        let result = {
            let conn = self.slot.get_mut()?;
            cache_round_trip(conn).await
        };
        if result.is_err() {
            self.slot.clear();
        }
        result
    }
}

// =============================================================================
// Tests
// =============================================================================
