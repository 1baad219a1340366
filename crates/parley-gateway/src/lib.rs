//! Live side of Parley: who is connected, how chat frames are relayed, and
//! how presence events fan out.
//!
//! The pieces, leaves first:
//!
//! - [`registry::ConnectionRegistry`]: user id -> live connection handle
//! - [`dispatcher::Dispatcher`]: targeted sends and broadcasts on top of the registry
//! - [`presence::PresenceTracker`]: online/offline announcements
//! - [`relay::MessageRelay`]: persists chat frames and routes both key views
//! - [`connection`]: the per-socket task tying it all together

pub mod auth;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod presence;
pub mod registry;
pub mod relay;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use crate::auth::Authenticator;
use crate::dispatcher::Dispatcher;
use crate::presence::PresenceTracker;
use crate::registry::ConnectionRegistry;
use crate::relay::MessageRelay;
use crate::store::MessageStore;

/// Tunables for the live gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// How long an enqueue onto a connection's outbound queue may wait
    /// before the delivery is dropped and the connection is closed.
    pub delivery_timeout: Duration,
    /// Upper bound on a single socket write.
    pub write_timeout: Duration,
    /// Ping interval. Two missed pongs drop the connection.
    pub heartbeat_interval: Duration,
    /// Capacity of each connection's outbound queue.
    pub outbound_queue: usize,
    /// Send `read_receipt` events back to the original sender on `mark_read`.
    pub notify_read_receipts: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            delivery_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(15),
            outbound_queue: 256,
            notify_read_receipts: false,
        }
    }
}

/// Everything a connection task needs. Cheap to clone.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    config: GatewayConfig,
    authenticator: Arc<dyn Authenticator>,
    dispatcher: Dispatcher,
    presence: PresenceTracker,
    relay: MessageRelay,
}

impl Gateway {
    pub fn new(
        config: GatewayConfig,
        authenticator: Arc<dyn Authenticator>,
        store: Arc<dyn MessageStore>,
    ) -> Self {
        let registry = ConnectionRegistry::new(config.delivery_timeout);
        let dispatcher = Dispatcher::new(registry);
        let presence = PresenceTracker::new(dispatcher.clone());
        let relay = MessageRelay::new(store, dispatcher.clone(), config.notify_read_receipts);

        Self {
            inner: Arc::new(GatewayInner {
                config,
                authenticator,
                dispatcher,
                presence,
                relay,
            }),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    pub fn authenticator(&self) -> &Arc<dyn Authenticator> {
        &self.inner.authenticator
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.inner.presence
    }

    pub fn relay(&self) -> &MessageRelay {
        &self.inner.relay
    }

    /// Closes every live connection. Each connection's own cleanup evicts it
    /// and announces it offline.
    pub async fn shutdown(&self) {
        self.inner.dispatcher.registry().close_all().await;
    }
}
