use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error};

use parley_db::{Database, StoreError};
use parley_types::events::GatewayEvent;

use crate::registry::SessionRegistry;

/// Why a send request was rejected. Reported to the originating connection
/// only, never broadcast.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("Receiver ID and content are required.")]
    MissingField,
    #[error("Receiver not found.")]
    ReceiverNotFound,
    #[error("Message could not be stored.")]
    StoreUnavailable,
}

/// Relay one direct message: validate, persist, fan out.
///
/// The request moves Received -> Validated -> Persisted -> Delivered, or
/// stops at Rejected with a `RelayError`. Delivery is fire-and-forget: an
/// offline receiver does not fail the send, the message is already durable
/// and shows up on the next history fetch.
pub async fn relay_message(
    db: Arc<Database>,
    registry: &SessionRegistry,
    sender_id: i64,
    receiver_id: Option<i64>,
    content: Option<String>,
) -> Result<GatewayEvent, RelayError> {
    // Received -> Validated
    let receiver_id = receiver_id.ok_or(RelayError::MissingField)?;
    let content = content
        .filter(|c| !c.is_empty())
        .ok_or(RelayError::MissingField)?;

    // Validated -> Persisted. Receiver resolution and the append share one
    // transaction inside the store, so rejection never leaves a partial write.
    let row = tokio::task::spawn_blocking(move || {
        db.insert_message(sender_id, receiver_id, &content)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        RelayError::StoreUnavailable
    })?
    .map_err(|e| match e {
        StoreError::ReceiverNotFound => RelayError::ReceiverNotFound,
        StoreError::EmptyContent => RelayError::MissingField,
        other => {
            error!("message insert failed: {}", other);
            RelayError::StoreUnavailable
        }
    })?;

    let event = GatewayEvent::ReceiveMessage {
        id: row.id,
        sender_id: row.sender_id,
        receiver_id: row.receiver_id,
        content: row.content,
        timestamp: row.created_at,
    };

    // Persisted -> Delivered: the receiver's channel, then the sender's own
    // channel so every device of the sender sees the message with the
    // server-assigned timestamp.
    registry.broadcast(receiver_id, event.clone()).await;
    registry.broadcast(sender_id, event.clone()).await;

    debug!("relayed message {} from {} to {}", row.id, sender_id, receiver_id);
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn db_with_users() -> (Arc<Database>, i64, i64) {
        let db = Database::open_in_memory().unwrap();
        let a = db.create_user("alice", "hash").unwrap();
        let b = db.create_user("bob", "hash").unwrap();
        (Arc::new(db), a, b)
    }

    #[tokio::test]
    async fn message_is_persisted_and_fanned_out_to_both_channels() {
        let (db, alice, bob) = db_with_users();
        let registry = SessionRegistry::new();

        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        registry.join(alice, tx_a).await;
        registry.join(bob, tx_b).await;

        let sent = relay_message(db.clone(), &registry, alice, Some(bob), Some("hi".into()))
            .await
            .unwrap();

        assert_eq!(db.message_count().unwrap(), 1);

        let got_a = rx_a.recv().await.unwrap();
        let got_b = rx_b.recv().await.unwrap();
        // Sender echo and receiver copy are the same event, same timestamp
        assert_eq!(got_a, got_b);
        assert_eq!(got_a, sent);

        match got_b {
            GatewayEvent::ReceiveMessage { sender_id, receiver_id, content, .. } => {
                assert_eq!(sender_id, alice);
                assert_eq!(receiver_id, bob);
                assert_eq!(content, "hi");
            }
            other => panic!("expected receive_message, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn unknown_receiver_is_rejected_without_a_store_write() {
        let (db, alice, _) = db_with_users();
        let registry = SessionRegistry::new();

        let err = relay_message(db.clone(), &registry, alice, Some(999), Some("hi".into()))
            .await
            .unwrap_err();

        assert_eq!(err, RelayError::ReceiverNotFound);
        assert_eq!(db.message_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_fields_are_rejected_before_the_store() {
        let (db, alice, bob) = db_with_users();
        let registry = SessionRegistry::new();

        let err = relay_message(db.clone(), &registry, alice, None, Some("hi".into()))
            .await
            .unwrap_err();
        assert_eq!(err, RelayError::MissingField);

        let err = relay_message(db.clone(), &registry, alice, Some(bob), Some(String::new()))
            .await
            .unwrap_err();
        assert_eq!(err, RelayError::MissingField);

        assert_eq!(db.message_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn offline_receiver_does_not_block_persistence() {
        let (db, alice, bob) = db_with_users();
        let registry = SessionRegistry::new();
        // Nobody joined: both broadcasts are no-ops.

        relay_message(db.clone(), &registry, alice, Some(bob), Some("hello?".into()))
            .await
            .unwrap();

        assert_eq!(db.message_count().unwrap(), 1);
    }
}
