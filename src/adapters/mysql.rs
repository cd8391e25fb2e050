//! MySQL Backend Driver
//!
//! Liveness is a `SELECT 1` over a single cached connection.

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::Connection;
use tracing::{debug, error};

use crate::adapters::connection::ConnectionSlot;
use crate::config::ServiceSpec;
use crate::domain::BackendDriver;
use crate::error::{Error, Result};

/// Backend name used in logs and errors.
pub const BACKEND: &str = "MySQL";

const PROBE_QUERY: &str = "SELECT 1";

/// Driver for one MySQL server.
pub struct MySqlDriver {
    options: MySqlConnectOptions,
    slot: ConnectionSlot<MySqlConnection>,
}

impl MySqlDriver {
    /// Create a driver for the service's host and credentials.
    pub fn new(spec: &ServiceSpec) -> Self {
        let auth = &spec.authentication;
        let mut options = MySqlConnectOptions::new().host(&spec.fqdn).port(spec.port);
        if let Some(username) = &auth.username {
            options = options.username(username);
        }
        if let Some(password) = &auth.password {
            options = options.password(password);
        }
        if let Some(db) = &auth.db {
            options = options.database(&db.name());
        }

        Self {
            options,
            slot: ConnectionSlot::new(BACKEND),
        }
    }

    /// Registry constructor.
    pub fn from_spec(spec: &ServiceSpec) -> Result<Box<dyn BackendDriver>> {
        Ok(Box::new(Self::new(spec)))
    }
}

/// Open a fresh connection.
pub async fn connect(options: &MySqlConnectOptions) -> Result<MySqlConnection> {
    MySqlConnection::connect_with(options)
        .await
        .map_err(|e| Error::connection(BACKEND, e))
}

#[async_trait]
impl BackendDriver for MySqlDriver {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn get_connection(&mut self, force: bool) -> Result<()> {
        let options = &self.options;
        self.slot
            .get_or_connect(force, |_| true, || connect(options))
            .await
            .map(|_| ())
    }

    async fn exercise(&mut self) -> Result<bool> {
        let result = {
            let conn = self.slot.get_mut()?;
            sqlx::query_scalar::<_, i64>(PROBE_QUERY)
                .fetch_one(&mut *conn)
                .await
        };

        match result {
            Ok(1) => {
                debug!("MySQL query successful");
                Ok(true)
            }
            Ok(other) => {
                error!(value = other, "MySQL query failed");
                Ok(false)
            }
            Err(e) => {
                // A connection that errored is no longer trusted.
                self.slot.clear();
                Err(Error::exercise(BACKEND, e))
            }
        }
    }
}
