//! Infrastructure Adapters
//!
//! This module contains the backend drivers implementing the
//! [`BackendDriver`](crate::domain::BackendDriver) port, following the
//! Port/Adapter (Hexagonal) architecture pattern.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Domain Layer                              │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │                    Ports (Traits)                           │ │
//! │  │            BackendDriver │ SubProbe │ SubProbeContext        │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                       │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │  MySqlDriver │ PostgresDriver │ RedisDriver │ RabbitMqDriver │ │
//! │  │                  ConnectionSlot (shared)                    │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use plus_monitoring::adapters::RedisDriver;
//! use plus_monitoring::domain::BackendDriver;
//!
//! let mut driver = RedisDriver::new(&spec)?;
//!
//! // Use it through the domain port trait
//! driver.get_connection(false).await?;
//! let healthy = driver.exercise().await?;
//! ```

pub mod connection;
pub mod mysql;
pub mod postgresql;
pub mod rabbitmq;
pub mod redis;

pub use connection::ConnectionSlot;
pub use mysql::MySqlDriver;
pub use postgresql::PostgresDriver;
pub use rabbitmq::{
    broker_health, BrokerSession, ConsumerTracker, MessagePublisher, RabbitMqDriver,
};
pub use self::redis::{cache_round_trip, CacheCommands, RedisDriver};
