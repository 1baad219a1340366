use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use parley_types::events::{PresenceStatus, ServerEvent};

use crate::dispatcher::Dispatcher;
use crate::registry::ConnectionHandle;

/// Online/offline bookkeeping. The online set is read straight from the
/// registry, so the two can never disagree.
///
/// Each admit or evict and the status broadcast that follows it run under
/// `transitions`, so watchers see status changes in registry order.
#[derive(Clone)]
pub struct PresenceTracker {
    dispatcher: Dispatcher,
    transitions: Arc<Mutex<()>>,
}

impl PresenceTracker {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            transitions: Arc::new(Mutex::new(())),
        }
    }

    /// Admits a connection, closes any connection it displaces, sends the
    /// newcomer the current online set, then tells everyone (newcomer
    /// included) that the user is online.
    pub async fn on_connect(&self, handle: ConnectionHandle) {
        let user_id = handle.user_id;
        let conn_id = handle.conn_id;
        let _transition = self.transitions.lock().await;

        if let Some(displaced) = self.dispatcher.registry().admit(handle).await {
            info!(
                user_id,
                old_conn = %displaced.conn_id,
                new_conn = %conn_id,
                "closing displaced connection"
            );
            displaced.close();
        }

        let online_user_ids = self.online_users().await;
        self.dispatcher
            .send_to_user(user_id, ServerEvent::InitialState { online_user_ids })
            .await;

        self.dispatcher
            .broadcast(ServerEvent::StatusChange {
                user_id,
                status: PresenceStatus::Online,
            })
            .await;
    }

    /// Evicts the connection and announces the user offline. Does nothing if
    /// a newer connection for the same user has already taken over, so a
    /// displaced socket never marks a reconnected user offline. Returns
    /// whether the offline announcement was made.
    pub async fn on_disconnect(&self, user_id: i64, conn_id: Uuid) -> bool {
        let _transition = self.transitions.lock().await;
        if !self
            .dispatcher
            .registry()
            .evict_connection(user_id, conn_id)
            .await
        {
            return false;
        }

        self.dispatcher
            .broadcast(ServerEvent::StatusChange {
                user_id,
                status: PresenceStatus::Offline,
            })
            .await;
        true
    }

    /// Point-in-time online set.
    pub async fn online_users(&self) -> BTreeSet<i64> {
        self.dispatcher.registry().snapshot_user_ids().await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;
    use crate::registry::ConnectionRegistry;

    fn tracker() -> PresenceTracker {
        let registry = ConnectionRegistry::new(Duration::from_millis(50));
        PresenceTracker::new(Dispatcher::new(registry))
    }

    fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        events
    }

    fn status(user_id: i64, status: PresenceStatus) -> ServerEvent {
        ServerEvent::StatusChange { user_id, status }
    }

    #[tokio::test]
    async fn connect_sends_initial_state_then_online() {
        let presence = tracker();
        let (a, mut a_rx) = ConnectionHandle::channel(1, 8);
        presence.on_connect(a).await;

        let (b, mut b_rx) = ConnectionHandle::channel(2, 8);
        presence.on_connect(b).await;

        assert_eq!(
            drain(&mut b_rx),
            vec![
                ServerEvent::InitialState { online_user_ids: BTreeSet::from([1, 2]) },
                status(2, PresenceStatus::Online),
            ]
        );
        assert_eq!(
            drain(&mut a_rx),
            vec![
                ServerEvent::InitialState { online_user_ids: BTreeSet::from([1]) },
                status(1, PresenceStatus::Online),
                status(2, PresenceStatus::Online),
            ]
        );
    }

    #[tokio::test]
    async fn disconnect_announces_offline_exactly_once() {
        let presence = tracker();
        let (a, mut a_rx) = ConnectionHandle::channel(1, 8);
        let (b, _b_rx) = ConnectionHandle::channel(2, 8);
        let b_conn = b.conn_id;
        presence.on_connect(a).await;
        presence.on_connect(b).await;
        drain(&mut a_rx);

        assert!(presence.on_disconnect(2, b_conn).await);
        assert!(!presence.on_disconnect(2, b_conn).await);

        assert_eq!(drain(&mut a_rx), vec![status(2, PresenceStatus::Offline)]);
        assert_eq!(presence.online_users().await, BTreeSet::from([1]));
    }

    #[tokio::test]
    async fn reconnect_closes_old_connection_and_stays_online() {
        let presence = tracker();
        let (watcher, mut watcher_rx) = ConnectionHandle::channel(9, 16);
        presence.on_connect(watcher).await;

        let (old, _old_rx) = ConnectionHandle::channel(1, 8);
        let old_conn = old.conn_id;
        let old_signal = old.close_signal();
        presence.on_connect(old).await;

        let (new, _new_rx) = ConnectionHandle::channel(1, 8);
        presence.on_connect(new).await;
        assert!(old_signal.is_cancelled());

        drain(&mut watcher_rx);
        // cleanup of the displaced socket must not mark the user offline
        assert!(!presence.on_disconnect(1, old_conn).await);
        assert!(drain(&mut watcher_rx).is_empty());
        assert!(presence.online_users().await.contains(&1));
    }

    fn last_status_of(events: &[ServerEvent], user_id: i64) -> Option<PresenceStatus> {
        events.iter().rev().find_map(|ev| match ev {
            ServerEvent::StatusChange { user_id: id, status } if *id == user_id => Some(*status),
            _ => None,
        })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_disconnect_and_reconnect_ends_online() {
        let presence = tracker();
        let (watcher, mut watcher_rx) = ConnectionHandle::channel(9, 64);
        presence.on_connect(watcher).await;

        for _ in 0..200 {
            let (old, _old_rx) = ConnectionHandle::channel(1, 8);
            let old_conn = old.conn_id;
            presence.on_connect(old).await;
            drain(&mut watcher_rx);

            let (new, _new_rx) = ConnectionHandle::channel(1, 8);
            let leaving = presence.clone();
            let joining = presence.clone();
            let (left, joined) = tokio::join!(
                tokio::spawn(async move { leaving.on_disconnect(1, old_conn).await }),
                tokio::spawn(async move { joining.on_connect(new).await }),
            );
            left.unwrap();
            joined.unwrap();

            assert!(presence.online_users().await.contains(&1));
            assert_eq!(
                last_status_of(&drain(&mut watcher_rx), 1),
                Some(PresenceStatus::Online)
            );
        }
    }
}
