use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tokio::sync::{RwLock, mpsc};
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use parley_types::events::ServerEvent;

use crate::error::GatewayError;

/// The registry's view of one live socket: an outbound queue drained by the
/// connection's writer task, plus a token that closes the connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub conn_id: Uuid,
    pub user_id: i64,
    pub connected_at: DateTime<Utc>,
    tx: mpsc::Sender<ServerEvent>,
    closer: CancellationToken,
}

impl ConnectionHandle {
    /// Creates a handle and the receiving end of its outbound queue.
    pub fn channel(user_id: i64, capacity: usize) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            conn_id: Uuid::new_v4(),
            user_id,
            connected_at: Utc::now(),
            tx,
            closer: CancellationToken::new(),
        };
        (handle, rx)
    }

    /// Token cancelled when this connection should shut down.
    pub fn close_signal(&self) -> CancellationToken {
        self.closer.clone()
    }

    pub fn close(&self) {
        self.closer.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closer.is_cancelled()
    }

    async fn deliver(&self, event: ServerEvent, timeout: Duration) -> Result<(), GatewayError> {
        if self.is_closed() {
            return Err(GatewayError::Disconnected);
        }

        match self.tx.send_timeout(event, timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(GatewayError::DeliveryTimeout {
                user_id: self.user_id,
            }),
            Err(SendTimeoutError::Closed(_)) => Err(GatewayError::Disconnected),
        }
    }
}

/// Online user id -> live connection. At most one connection per user; a
/// newer connection replaces the older one.
///
/// Mutation and iteration share one lock. `send` and `broadcast_all` copy the
/// handles they need while holding it, so they never see a half-replaced
/// entry, then deliver without it so one slow socket cannot stall the rest.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    connections: RwLock<HashMap<i64, ConnectionHandle>>,
    delivery_timeout: Duration,
}

impl ConnectionRegistry {
    pub fn new(delivery_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                connections: RwLock::new(HashMap::new()),
                delivery_timeout,
            }),
        }
    }

    /// Registers `handle` as the live connection for its user. Returns the
    /// connection it displaced, if any; the caller decides whether to close it.
    pub async fn admit(&self, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let user_id = handle.user_id;
        let displaced = self.inner.connections.write().await.insert(user_id, handle);
        debug!(user_id, replaced = displaced.is_some(), "connection admitted");
        displaced
    }

    /// Removes whatever connection `user_id` has. No-op when offline.
    pub async fn evict(&self, user_id: i64) -> Option<ConnectionHandle> {
        self.inner.connections.write().await.remove(&user_id)
    }

    /// Removes the entry for `user_id` only if it still belongs to `conn_id`.
    pub async fn evict_connection(&self, user_id: i64, conn_id: Uuid) -> bool {
        let mut connections = self.inner.connections.write().await;
        match connections.get(&user_id) {
            Some(current) if current.conn_id == conn_id => {
                connections.remove(&user_id);
                true
            }
            _ => false,
        }
    }

    /// Queues `event` for `user_id`. Returns false if the user is offline or
    /// the delivery failed; neither is an error to the caller.
    pub async fn send(&self, user_id: i64, event: ServerEvent) -> bool {
        let handle = self.inner.connections.read().await.get(&user_id).cloned();
        let Some(handle) = handle else {
            return false;
        };

        match handle.deliver(event, self.inner.delivery_timeout).await {
            Ok(()) => true,
            Err(e) => {
                drop_stalled(&handle, &e);
                false
            }
        }
    }

    /// Queues `event` for every registered connection. A failure on one
    /// connection closes that connection and does not affect the others.
    pub async fn broadcast_all(&self, event: ServerEvent) {
        let handles: Vec<ConnectionHandle> =
            self.inner.connections.read().await.values().cloned().collect();

        let timeout = self.inner.delivery_timeout;
        let results = join_all(handles.iter().map(|handle| {
            let event = event.clone();
            async move { handle.deliver(event, timeout).await }
        }))
        .await;

        for (handle, result) in handles.iter().zip(results) {
            if let Err(e) = result {
                drop_stalled(handle, &e);
            }
        }
    }

    pub async fn snapshot_user_ids(&self) -> BTreeSet<i64> {
        self.inner.connections.read().await.keys().copied().collect()
    }

    #[cfg(test)]
    pub(crate) async fn is_online(&self, user_id: i64) -> bool {
        self.inner.connections.read().await.contains_key(&user_id)
    }

    /// Signals every registered connection to close.
    pub async fn close_all(&self) {
        for handle in self.inner.connections.read().await.values() {
            handle.close();
        }
    }
}

/// A failed delivery drops the event and closes the connection; its own
/// cleanup path performs the eviction and the offline announcement.
fn drop_stalled(handle: &ConnectionHandle, err: &GatewayError) {
    if !handle.is_closed() {
        warn!(
            user_id = handle.user_id,
            conn_id = %handle.conn_id,
            "dropping delivery and closing connection: {}",
            err
        );
    }
    handle.close();
}
