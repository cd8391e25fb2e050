//! Cached connection with the reuse/reconnect policy shared by all drivers.

use std::future::Future;

use tracing::debug;

use crate::error::{Error, Result};

/// At most one live connection, opened lazily.
///
/// The connection is never closed explicitly; it is dropped when replaced
/// or when the owning driver goes away.
pub struct ConnectionSlot<C> {
    backend: &'static str,
    conn: Option<C>,
}

impl<C> ConnectionSlot<C> {
    pub fn new(backend: &'static str) -> Self {
        Self {
            backend,
            conn: None,
        }
    }

    /// True when a connection is cached.
    pub fn is_cached(&self) -> bool {
        self.conn.is_some()
    }

    /// Drop the cached connection.
    pub fn clear(&mut self) {
        self.conn = None;
    }

    /// Return the cached connection, opening a fresh one when `force` is
    /// set or the cached one is absent or fails `is_open`.
    ///
    /// On failure the slot is left empty.
    pub async fn get_or_connect<O, F, Fut>(
        &mut self,
        force: bool,
        is_open: O,
        connect: F,
    ) -> Result<&mut C>
    where
        O: FnOnce(&C) -> bool,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<C>>,
    {
        let reusable = !force && self.conn.as_ref().map(is_open).unwrap_or(false);

        if !reusable {
            self.conn = None;
            match connect().await {
                Ok(conn) => {
                    debug!(backend = self.backend, forced = force, "Connection established");
                    self.conn = Some(conn);
                }
                Err(e) => {
                    debug!(backend = self.backend, forced = force, "Connection attempt failed");
                    return Err(e);
                }
            }
        }

        self.get_mut()
    }

    /// The cached connection, or a connection error when there is none.
    pub fn get_mut(&mut self) -> Result<&mut C> {
        let backend = self.backend;
        self.conn
            .as_mut()
            .ok_or_else(|| Error::connection(backend, "no connection available"))
    }
}

impl<C> std::fmt::Debug for ConnectionSlot<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSlot")
            .field("backend", &self.backend)
            .field("cached", &self.is_cached())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeConn {
        id: usize,
        open: bool,
    }

    async fn open(counter: &AtomicUsize) -> Result<FakeConn> {
        let id = counter.fetch_add(1, Ordering::SeqCst);
        Ok(FakeConn { id, open: true })
    }

    #[tokio::test]
    async fn test_lazy_connect_then_reuse() {
        let opened = AtomicUsize::new(0);
        let mut slot = ConnectionSlot::new("fake");
        assert!(!slot.is_cached());

        let id = slot
            .get_or_connect(false, |c: &FakeConn| c.open, || open(&opened))
            .await
            .unwrap()
            .id;
        assert_eq!(id, 0);

        let id = slot
            .get_or_connect(false, |c: &FakeConn| c.open, || open(&opened))
            .await
            .unwrap()
            .id;
        assert_eq!(id, 0);
        assert_eq!(opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_force_reconnects() {
        let opened = AtomicUsize::new(0);
        let mut slot = ConnectionSlot::new("fake");

        slot.get_or_connect(false, |c: &FakeConn| c.open, || open(&opened))
            .await
            .unwrap();
        let id = slot
            .get_or_connect(true, |c: &FakeConn| c.open, || open(&opened))
            .await
            .unwrap()
            .id;

        assert_eq!(id, 1);
    }

    #[tokio::test]
    async fn test_closed_connection_replaced() {
        let opened = AtomicUsize::new(0);
        let mut slot = ConnectionSlot::new("fake");

        slot.get_or_connect(false, |c: &FakeConn| c.open, || open(&opened))
            .await
            .unwrap()
            .open = false;

        let id = slot
            .get_or_connect(false, |c: &FakeConn| c.open, || open(&opened))
            .await
            .unwrap()
            .id;
        assert_eq!(id, 1);
    }

    #[tokio::test]
    async fn test_failure_leaves_slot_empty() {
        let opened = AtomicUsize::new(0);
        let mut slot = ConnectionSlot::new("fake");
        slot.get_or_connect(false, |c: &FakeConn| c.open, || open(&opened))
            .await
            .unwrap();

        let result = slot
            .get_or_connect(
                true,
                |c: &FakeConn| c.open,
                || async { Err::<FakeConn, _>(Error::connection("fake", "refused")) },
            )
            .await;

        assert!(result.is_err());
        assert!(!slot.is_cached());
        assert!(slot.get_mut().is_err());
    }
}
