// Session message protocol using JSON serialization
use serde::{Deserialize, Serialize};

/// Wrapper for session messages with correlation ID
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMessage {
    /// Message ID for request/response correlation (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<u32>,

    /// The actual message (flattened into the same JSON object)
    #[serde(flatten)]
    pub body: SessionBody,
}

/// Messages exchanged between a service and its session worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SessionBody {
    /// Worker announces itself after connecting its side of the channel
    Hello {
        pid: u32,
    },

    /// Ask the worker to show a user-visible notification
    Notify {
        title: String,
        body: String,
    },

    /// Positive acknowledgment of a correlated request
    Ack,

    /// Error acknowledgment of a correlated request
    Error {
        message: String,
    },

    /// Service is going down; the worker should exit
    Shutdown,
}

impl SessionMessage {
    /// Create a message expecting a correlated reply
    pub fn request(message_id: u32, body: SessionBody) -> Self {
        Self {
            message_id: Some(message_id),
            body,
        }
    }

    /// Create a fire-and-forget notification (no message_id)
    pub fn notification(body: SessionBody) -> Self {
        Self {
            message_id: None,
            body,
        }
    }

    /// Parse a message from a JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize the message to a JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips_through_json() {
        let msg = SessionMessage::request(
            7,
            SessionBody::Notify {
                title: "update".to_string(),
                body: "service paused".to_string(),
            },
        );
        let json = msg.to_json().unwrap();
        let parsed = SessionMessage::from_json(&json).unwrap();
        assert_eq!(parsed.message_id, Some(7));
        assert_eq!(parsed.body, msg.body);
    }

    #[test]
    fn notification_omits_message_id() {
        let msg = SessionMessage::notification(SessionBody::Shutdown);
        let json = msg.to_json().unwrap();
        assert!(!json.contains("message_id"));
        assert_eq!(json, r#"{"type":"Shutdown"}"#);
    }

    #[test]
    fn tagged_body_parses_by_type_field() {
        let parsed = SessionMessage::from_json(r#"{"message_id":1,"type":"Hello","pid":4242}"#)
            .unwrap();
        assert_eq!(parsed.message_id, Some(1));
        assert_eq!(parsed.body, SessionBody::Hello { pid: 4242 });
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(SessionMessage::from_json("not json").is_err());
        assert!(SessionMessage::from_json(r#"{"type":"NoSuchBody"}"#).is_err());
    }
}
