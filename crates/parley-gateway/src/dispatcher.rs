use tracing::{debug, info};

use parley_types::events::ServerEvent;

use crate::registry::ConnectionRegistry;

/// Fans ephemeral events out to one or all connections. Holds no state of
/// its own; every send goes through the registry's locking.
///
/// Shared by the presence tracker, the relay, and the REST layer (key
/// rotation).
#[derive(Clone)]
pub struct Dispatcher {
    registry: ConnectionRegistry,
}

impl Dispatcher {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Send a targeted event to a specific user.
    pub async fn send_to_user(&self, user_id: i64, event: ServerEvent) -> bool {
        let kind = event.kind();
        let delivered = self.registry.send(user_id, event).await;
        debug!(user_id, kind, delivered, "targeted event");
        delivered
    }

    /// Broadcast an event to all connected clients.
    pub async fn broadcast(&self, event: ServerEvent) {
        self.registry.broadcast_all(event).await;
    }

    /// Typing indicator, best-effort, recipient only.
    pub async fn typing(&self, sender_id: i64, recipient_id: i64) -> bool {
        self.send_to_user(recipient_id, ServerEvent::Typing { sender_id })
            .await
    }

    /// Tells `other_party_id` that `reader_id` has read their messages.
    pub async fn read_receipt(&self, reader_id: i64, other_party_id: i64) -> bool {
        self.send_to_user(other_party_id, ServerEvent::ReadReceipt { sender_id: reader_id })
            .await
    }

    /// Announces a public key rotation to everyone online.
    pub async fn identity_change(&self, user_id: i64, new_public_key: String) {
        info!(user_id, "broadcasting identity change");
        self.broadcast(ServerEvent::IdentityChange {
            user_id,
            new_public_key,
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::registry::ConnectionHandle;

    #[tokio::test]
    async fn identity_change_reaches_everyone() {
        let dispatcher = Dispatcher::new(ConnectionRegistry::new(Duration::from_millis(50)));
        let (a, mut a_rx) = ConnectionHandle::channel(1, 8);
        let (b, mut b_rx) = ConnectionHandle::channel(2, 8);
        dispatcher.registry().admit(a).await;
        dispatcher.registry().admit(b).await;

        dispatcher.identity_change(1, "new-pk".into()).await;

        let expected = ServerEvent::IdentityChange {
            user_id: 1,
            new_public_key: "new-pk".into(),
        };
        assert_eq!(a_rx.try_recv().unwrap(), expected);
        assert_eq!(b_rx.try_recv().unwrap(), expected);
    }

    #[tokio::test]
    async fn typing_goes_to_recipient_only() {
        let dispatcher = Dispatcher::new(ConnectionRegistry::new(Duration::from_millis(50)));
        let (a, mut a_rx) = ConnectionHandle::channel(1, 8);
        let (b, mut b_rx) = ConnectionHandle::channel(2, 8);
        dispatcher.registry().admit(a).await;
        dispatcher.registry().admit(b).await;

        assert!(dispatcher.typing(1, 2).await);
        assert_eq!(b_rx.try_recv().unwrap(), ServerEvent::Typing { sender_id: 1 });
        assert!(a_rx.try_recv().is_err());

        assert!(!dispatcher.typing(1, 3).await);
    }
}
