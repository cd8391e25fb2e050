//! RabbitMQ Backend Driver
//!
//! A broker is only healthy when messages flow both ways, so the driver
//! runs two sides against one shared connection:
//!
//! - **publish**: the probe loop's exercise declares `SRE_TEST_QUEUE` and
//!   publishes `SRE_TEST_PAYLOAD` with publisher confirms.
//! - **consume**: a sub-probe task subscribes to the same queue and notes
//!   every delivery.
//!
//! Each side writes its own `plus_monitoring_broker{direction=..}` series.
//! The service series is `publish_ok && consumer_fresh`, where fresh means
//! a delivery arrived within [`FRESHNESS_INTERVALS`] check intervals.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, ConfirmSelectOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use prometheus::Gauge;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::adapters::connection::ConnectionSlot;
use crate::config::ServiceSpec;
use crate::domain::{BackendDriver, Direction, SubProbe, SubProbeContext};
use crate::error::{Error, Result};

/// Backend name used in logs and errors.
pub const BACKEND: &str = "RabbitMQ";

/// Queue used by both sides.
pub const QUEUE: &str = "SRE_TEST_QUEUE";

/// Body of every published message.
pub const PAYLOAD: &str = "SRE_TEST_PAYLOAD";

/// Check intervals a consumer may go without a delivery and stay fresh.
pub const FRESHNESS_INTERVALS: u32 = 3;

/// Build the AMQP URL for a service, on the default vhost.
pub fn connection_url(spec: &ServiceSpec) -> String {
    let auth = &spec.authentication;
    let userinfo = match (&auth.username, &auth.password) {
        (Some(user), Some(pass)) => format!(
            "{}:{}@",
            urlencoding::encode(user),
            urlencoding::encode(pass)
        ),
        (Some(user), None) => format!("{}@", urlencoding::encode(user)),
        _ => String::new(),
    };

    format!("amqp://{}{}:{}/%2f", userinfo, spec.fqdn, spec.port)
}

// =============================================================================
// Broker Session
// =============================================================================

/// Connection shared by the publisher and the consumer.
///
/// Access goes through an async mutex so the two sides never race on
/// replacing the cached connection.
#[derive(Clone)]
pub struct BrokerSession {
    url: Arc<str>,
    slot: Arc<Mutex<ConnectionSlot<Arc<Connection>>>>,
}

impl BrokerSession {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Arc::from(url.into()),
            slot: Arc::new(Mutex::new(ConnectionSlot::new(BACKEND))),
        }
    }

    /// Cached connection, reconnecting when forced or no longer connected.
    pub async fn connection(&self, force: bool) -> Result<Arc<Connection>> {
        let mut slot = self.slot.lock().await;
        let url = &self.url;
        slot.get_or_connect(force, |c| c.status().connected(), || connect(url))
            .await
            .map(|conn| conn.clone())
    }

    /// Cached connection without connecting.
    pub async fn current(&self) -> Result<Arc<Connection>> {
        let mut slot = self.slot.lock().await;
        slot.get_mut().map(|conn| conn.clone())
    }

    pub async fn clear(&self) {
        self.slot.lock().await.clear();
    }
}

impl std::fmt::Debug for BrokerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerSession").finish_non_exhaustive()
    }
}

pub async fn connect(url: &str) -> Result<Arc<Connection>> {
    let connection = Connection::connect(
        url,
        ConnectionProperties::default().with_connection_name("plus-monitoring".into()),
    )
    .await
    .map_err(|e| Error::connection(BACKEND, e))?;

    Ok(Arc::new(connection))
}

/// Open a channel and declare the test queue on it.
async fn open_queue(connection: &Connection) -> Result<Channel> {
    let channel = connection
        .create_channel()
        .await
        .map_err(|e| Error::exercise(BACKEND, format!("channel creation failed: {}", e)))?;

    channel
        .queue_declare(QUEUE, QueueDeclareOptions::default(), FieldTable::default())
        .await
        .map_err(|e| Error::exercise(BACKEND, format!("queue declare failed: {}", e)))?;

    Ok(channel)
}

// =============================================================================
// Consumer Tracking
// =============================================================================

/// What the consumer side has observed so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    /// Subscribed (or starting), nothing received since `since`
    Pending { since: Instant },
    /// Last delivery arrived at this instant
    Received(Instant),
    /// The last subscription attempt failed
    Failed,
}

/// Consumer state shared between the consumer task and the publisher.
#[derive(Debug, Clone)]
pub struct ConsumerTracker {
    state: Arc<parking_lot::Mutex<ConsumerState>>,
}

impl ConsumerTracker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(parking_lot::Mutex::new(ConsumerState::Pending {
                since: Instant::now(),
            })),
        }
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.lock()
    }

    /// A subscription is in place. Restarts the grace window after a failure.
    pub fn subscribed(&self) {
        let mut state = self.state.lock();
        if *state == ConsumerState::Failed {
            *state = ConsumerState::Pending {
                since: Instant::now(),
            };
        }
    }

    pub fn received(&self) {
        *self.state.lock() = ConsumerState::Received(Instant::now());
    }

    pub fn failed(&self) {
        *self.state.lock() = ConsumerState::Failed;
    }

    /// True when a delivery arrived within `window`, or the consumer is
    /// still inside its first window.
    pub fn is_fresh(&self, window: Duration) -> bool {
        let now = Instant::now();
        match self.state() {
            ConsumerState::Pending { since } => now.duration_since(since) <= window,
            ConsumerState::Received(at) => now.duration_since(at) <= window,
            ConsumerState::Failed => false,
        }
    }
}

impl Default for ConsumerTracker {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Consumer Sub-probe
// =============================================================================

/// Consumer side of the broker check.
///
/// Subscribes and waits on deliveries indefinitely. When the subscription
/// fails or the stream ends, it records the failure, sleeps one check
/// interval and subscribes again. Stops only on the shutdown token.
pub async fn run_consumer(session: BrokerSession, tracker: ConsumerTracker, ctx: SubProbeContext) {
    let gauge = ctx.sink.direction_gauge(&ctx.labels, Direction::Consume);
    let window = ctx.check_interval * FRESHNESS_INTERVALS;
    let consumer_tag = format!("plus-monitoring-{}", uuid::Uuid::new_v4());

    info!(service = %ctx.labels.name, tag = %consumer_tag, "Starting broker consumer");

    loop {
        let result = tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            result = consume(&session, &tracker, &gauge, &consumer_tag, window) => result,
        };

        if let Err(e) = result {
            error!(service = %ctx.labels.name, backend = BACKEND, "Error reading message: {}", e);
            tracker.failed();
            gauge.set(0.0);
        }

        tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            _ = tokio::time::sleep(ctx.check_interval) => {}
        }
    }

    info!(service = %ctx.labels.name, "Broker consumer stopped");
}

async fn consume(
    session: &BrokerSession,
    tracker: &ConsumerTracker,
    gauge: &Gauge,
    consumer_tag: &str,
    window: Duration,
) -> Result<()> {
    let connection = session.connection(false).await?;
    let channel = open_queue(&connection).await?;

    let mut consumer = channel
        .basic_consume(
            QUEUE,
            consumer_tag,
            BasicConsumeOptions {
                no_ack: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| Error::exercise(BACKEND, format!("basic_consume failed: {}", e)))?;
    tracker.subscribed();

    loop {
        // Staleness only updates the consume series; the wait continues.
        let next = match tokio::time::timeout(window, consumer.next()).await {
            Ok(next) => next,
            Err(_) => {
                warn!(queue = QUEUE, "No message received within {:?}", window);
                gauge.set(0.0);
                continue;
            }
        };

        match next {
            Some(Ok(delivery)) => {
                debug!(queue = QUEUE, bytes = delivery.data.len(), "Received message");
                tracker.received();
                gauge.set(1.0);
            }
            Some(Err(e)) => return Err(Error::exercise(BACKEND, e)),
            None => return Err(Error::connection(BACKEND, "consumer stream closed")),
        }
    }
}

// =============================================================================
// Publishing
// =============================================================================

/// Publisher side of the broker check.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Publish one confirmed message. `Ok(false)` when the broker nacks.
    async fn publish(&self) -> Result<bool>;

    /// Forget the connection after a failed publish.
    async fn reset(&self);
}

#[async_trait]
impl MessagePublisher for BrokerSession {
    async fn publish(&self) -> Result<bool> {
        let connection = self.current().await?;
        let channel = open_queue(&connection).await?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| Error::exercise(BACKEND, format!("confirm select failed: {}", e)))?;

        let confirmation = channel
            .basic_publish(
                "",
                QUEUE,
                BasicPublishOptions::default(),
                PAYLOAD.as_bytes(),
                BasicProperties::default(),
            )
            .await
            .map_err(|e| Error::exercise(BACKEND, format!("publish failed: {}", e)))?
            .await
            .map_err(|e| Error::exercise(BACKEND, format!("publish confirmation failed: {}", e)))?;

        if let Err(e) = channel.close(200, "OK").await {
            debug!("Failed to close publisher channel: {}", e);
        }

        if confirmation.is_nack() {
            error!(queue = QUEUE, "Broker rejected message");
            return Ok(false);
        }

        debug!(queue = QUEUE, payload = PAYLOAD, "Sent message");
        Ok(true)
    }

    async fn reset(&self) {
        self.clear().await;
    }
}

/// Publish once and combine the result with consumer freshness.
///
/// Writes the publish direction to `publish_gauge` when given. Healthy only
/// when the publish was confirmed and a delivery arrived within `window`.
pub async fn broker_health<P: MessagePublisher + ?Sized>(
    publisher: &P,
    tracker: &ConsumerTracker,
    window: Duration,
    publish_gauge: Option<&Gauge>,
) -> Result<bool> {
    let published = publisher.publish().await;

    if let Some(gauge) = publish_gauge {
        gauge.set(if matches!(published, Ok(true)) { 1.0 } else { 0.0 });
    }
    if let Err(Error::Exercise { .. }) = &published {
        publisher.reset().await;
    }

    let fresh = tracker.is_fresh(window);
    if !fresh {
        warn!(
            queue = QUEUE,
            state = ?tracker.state(),
            "Consumer has not received a message within {:?}",
            window
        );
    }

    Ok(published? && fresh)
}

// =============================================================================
// Driver
// =============================================================================

/// Driver for one RabbitMQ server.
pub struct RabbitMqDriver {
    session: BrokerSession,
    tracker: ConsumerTracker,
    check_interval: Duration,
    publish_gauge: Option<Gauge>,
}

impl RabbitMqDriver {
    pub fn new(spec: &ServiceSpec) -> Self {
        Self {
            session: BrokerSession::new(connection_url(spec)),
            tracker: ConsumerTracker::new(),
            check_interval: spec.check_interval,
            publish_gauge: None,
        }
    }

    pub fn from_spec(spec: &ServiceSpec) -> Result<Box<dyn BackendDriver>> {
        Ok(Box::new(Self::new(spec)))
    }

    pub fn tracker(&self) -> &ConsumerTracker {
        &self.tracker
    }

    fn freshness_window(&self) -> Duration {
        self.check_interval * FRESHNESS_INTERVALS
    }
}

#[async_trait]
impl BackendDriver for RabbitMqDriver {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn get_connection(&mut self, force: bool) -> Result<()> {
        self.session.connection(force).await.map(|_| ())
    }

    async fn exercise(&mut self) -> Result<bool> {
        broker_health(
            &self.session,
            &self.tracker,
            self.freshness_window(),
            self.publish_gauge.as_ref(),
        )
        .await
    }

    fn sub_probes(&mut self, ctx: &SubProbeContext) -> Vec<SubProbe> {
        self.publish_gauge = Some(ctx.sink.direction_gauge(&ctx.labels, Direction::Publish));

        let consumer = run_consumer(self.session.clone(), self.tracker.clone(), ctx.clone());
        vec![Box::pin(consumer)]
    }
}

impl std::fmt::Debug for RabbitMqDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RabbitMqDriver")
            .field("check_interval", &self.check_interval)
            .field("consumer", &self.tracker.state())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
