use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use parley_types::events::GatewayEvent;

pub type EventSender = mpsc::UnboundedSender<GatewayEvent>;

/// Tracks the live connections bound to each user's channel.
///
/// Channel identity is exactly the user identity: every connection a user
/// opens joins the same channel, and `broadcast` fans out to all of them.
/// Owned by the server process and passed explicitly; there is no global
/// instance.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    channels: Arc<RwLock<HashMap<i64, HashMap<Uuid, EventSender>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a connection to `channel(user_id)`. Additive: a second device or
    /// tab joins alongside existing bindings. Returns the connection id used
    /// to leave later.
    pub async fn join(&self, user_id: i64, sender: EventSender) -> Uuid {
        let conn_id = Uuid::new_v4();
        self.channels
            .write()
            .await
            .entry(user_id)
            .or_default()
            .insert(conn_id, sender);
        conn_id
    }

    /// Remove one connection's binding. The channel survives while other
    /// connections for the same user remain; the map entry is dropped once
    /// the last one leaves.
    pub async fn leave(&self, user_id: i64, conn_id: Uuid) {
        let mut channels = self.channels.write().await;
        if let Some(members) = channels.get_mut(&user_id) {
            members.remove(&conn_id);
            if members.is_empty() {
                channels.remove(&user_id);
            }
        }
    }

    /// Deliver an event to every connection currently bound to the user's
    /// channel. Best-effort: no bound connections means the event is
    /// silently dropped, never queued.
    pub async fn broadcast(&self, user_id: i64, event: GatewayEvent) {
        let channels = self.channels.read().await;
        if let Some(members) = channels.get(&user_id) {
            for sender in members.values() {
                let _ = sender.send(event.clone());
            }
        }
    }

    /// Number of live connections on a user's channel.
    pub async fn connection_count(&self, user_id: i64) -> usize {
        self.channels
            .read()
            .await
            .get(&user_id)
            .map_or(0, HashMap::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(msg: &str) -> GatewayEvent {
        GatewayEvent::Status { msg: msg.into() }
    }

    #[tokio::test]
    async fn broadcast_reaches_every_connection_once() {
        let registry = SessionRegistry::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();

        registry.join(1, tx1).await;
        registry.join(1, tx2).await;
        assert_eq!(registry.connection_count(1).await, 2);

        registry.broadcast(1, status("ping")).await;

        assert_eq!(rx1.recv().await.unwrap(), status("ping"));
        assert_eq!(rx2.recv().await.unwrap(), status("ping"));
        assert!(rx1.try_recv().is_err(), "delivered more than once");
        assert!(rx2.try_recv().is_err(), "delivered more than once");
    }

    #[tokio::test]
    async fn leave_removes_only_that_connection() {
        let registry = SessionRegistry::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();

        let conn1 = registry.join(7, tx1).await;
        registry.join(7, tx2).await;

        registry.leave(7, conn1).await;
        assert_eq!(registry.connection_count(7).await, 1);

        registry.broadcast(7, status("still here")).await;
        assert!(rx1.try_recv().is_err());
        assert_eq!(rx2.recv().await.unwrap(), status("still here"));
    }

    #[tokio::test]
    async fn broadcast_to_empty_channel_is_a_noop() {
        let registry = SessionRegistry::new();
        // No join: delivery is silently dropped, not an error.
        registry.broadcast(42, status("anyone?")).await;
        assert_eq!(registry.connection_count(42).await, 0);
    }

    #[tokio::test]
    async fn channel_entry_dropped_after_last_leave() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        let conn = registry.join(3, tx).await;
        registry.leave(3, conn).await;

        assert!(registry.channels.read().await.get(&3).is_none());
    }
}
