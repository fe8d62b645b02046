use serde::{Deserialize, Serialize};

/// Events sent over the WebSocket gateway, server -> client.
/// The `type` tag is the wire event name: `ready`, `status`,
/// `receive_message`, `error`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// Server confirms the connection is bound to an identity
    Ready { user_id: i64, username: String },

    /// Self-notification of a connect/disconnect on the user's own channel
    Status { msg: String },

    /// A direct message, delivered to both participants' channels.
    /// Timestamp is the server-assigned value, textual, so both clients
    /// order by a single source of truth.
    ReceiveMessage {
        id: i64,
        sender_id: i64,
        receiver_id: i64,
        content: String,
        timestamp: String,
    },

    /// A send intent was rejected; delivered to the originating
    /// connection only, never broadcast.
    Error { message: String },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Ask the server to relay a direct message.
    /// Fields are optional so a malformed intent still parses and can be
    /// rejected with a useful error instead of a deserialization failure.
    SendMessage {
        #[serde(default)]
        receiver_id: Option<i64>,
        #[serde(default)]
        content: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_match_wire_protocol() {
        let event = GatewayEvent::ReceiveMessage {
            id: 1,
            sender_id: 1,
            receiver_id: 2,
            content: "hi".into(),
            timestamp: "2026-01-01T00:00:00Z".into(),
        };
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "receive_message");
        assert_eq!(json["data"]["sender_id"], 1);
        assert_eq!(json["data"]["timestamp"], "2026-01-01T00:00:00Z");

        let status = GatewayEvent::Status { msg: "alice connected".into() };
        let json: serde_json::Value = serde_json::to_value(&status).unwrap();
        assert_eq!(json["type"], "status");

        let error = GatewayEvent::Error { message: "Receiver not found.".into() };
        let json: serde_json::Value = serde_json::to_value(&error).unwrap();
        assert_eq!(json["type"], "error");
    }

    #[test]
    fn send_command_tolerates_missing_fields() {
        let cmd: ClientCommand =
            serde_json::from_str(r#"{"type": "send_message", "data": {}}"#).unwrap();
        let ClientCommand::SendMessage { receiver_id, content } = cmd;
        assert!(receiver_id.is_none());
        assert!(content.is_none());
    }
}
