//! PostgreSQL Backend Driver

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::Connection;
use tracing::{debug, error};

use crate::adapters::connection::ConnectionSlot;
use crate::config::ServiceSpec;
use crate::domain::BackendDriver;
use crate::error::{Error, Result};

/// Backend name used in logs and errors.
pub const BACKEND: &str = "PostgreSQL";

const PROBE_QUERY: &str = "SELECT 1";

/// Driver for one PostgreSQL server.
pub struct PostgresDriver {
    options: PgConnectOptions,
    slot: ConnectionSlot<PgConnection>,
}

impl PostgresDriver {
    pub fn new(spec: &ServiceSpec) -> Self {
        let auth = &spec.authentication;
        let mut options = PgConnectOptions::new().host(&spec.fqdn).port(spec.port);
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

    pub fn from_spec(spec: &ServiceSpec) -> Result<Box<dyn BackendDriver>> {
        Ok(Box::new(Self::new(spec)))
    }
}

pub async fn connect(options: &PgConnectOptions) -> Result<PgConnection> {
    PgConnection::connect_with(options)
        .await
        .map_err(|e| Error::connection(BACKEND, e))
}

#[async_trait]
impl BackendDriver for PostgresDriver {
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
        // SELECT 1 is INT4 on PostgreSQL
        let result = {
            let conn = self.slot.get_mut()?;
            sqlx::query_scalar::<_, i32>(PROBE_QUERY)
                .fetch_one(&mut *conn)
                .await
        };

        match result {
            Ok(1) => {
                debug!("PostgreSQL query successful");
                Ok(true)
            }
            Ok(other) => {
                error!(value = other, "PostgreSQL query failed");
                Ok(false)
            }
            Err(e) => {
                self.slot.clear();
                Err(Error::exercise(BACKEND, e))
            }
        }
    }
}
