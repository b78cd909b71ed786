//! Wire formats for the per-connection event protocol.

use aria_nlu::PipelineReply;
use serde::{Deserialize, Serialize};

/// A natural-language query submitted by a client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryPayload {
    #[serde(default)]
    pub client: String,
    pub value: String,
    #[serde(default)]
    pub extra: serde_json::Value,
}

/// Events received from a connected client.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Mode-selection handshake, required once per connection.
    Init { mode: String },
    /// Wake trigger; only meaningful in hotword mode.
    HotwordDetected,
    /// Query submission; only meaningful in query mode.
    Query(QueryPayload),
}

/// Events sent to a connected client.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Processing has begun for the carried payload.
    Thinking { on: bool, payload: QueryPayload },
    /// A hotword fired somewhere; start recording.
    Record,
    /// Successful pipeline result.
    Answer { client: String, reply: PipelineReply },
    /// Query rejected: the session queue is full.
    Busy { payload: QueryPayload },
    /// Failure signal (pipeline or protocol).
    Error { code: String, message: String },
}

impl ServerEvent {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Serialize for the wire. `None` only on serializer failure, which
    /// callers treat as a dropped send.
    pub fn encode(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init() {
        let event: ClientEvent = serde_json::from_str(r#"{"type":"init","mode":"hotword"}"#).unwrap();
        assert!(matches!(event, ClientEvent::Init { mode } if mode == "hotword"));
    }

    #[test]
    fn parse_hotword_detected() {
        let event: ClientEvent = serde_json::from_str(r#"{"type":"hotword-detected"}"#).unwrap();
        assert!(matches!(event, ClientEvent::HotwordDetected));
    }

    #[test]
    fn parse_query_with_defaults() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"type":"query","value":"hello there"}"#).unwrap();
        let ClientEvent::Query(payload) = event else {
            panic!("expected query");
        };
        assert_eq!(payload.value, "hello there");
        assert_eq!(payload.client, "");
        assert!(payload.extra.is_null());
    }

    #[test]
    fn parse_full_query() {
        let event: ClientEvent = serde_json::from_str(
            r#"{"type":"query","client":"web-app","value":"what time is it","extra":{"tz":"UTC"}}"#,
        )
        .unwrap();
        let ClientEvent::Query(payload) = event else {
            panic!("expected query");
        };
        assert_eq!(payload.client, "web-app");
        assert_eq!(payload.extra["tz"], "UTC");
    }

    #[test]
    fn malformed_event_fails() {
        assert!(serde_json::from_str::<ClientEvent>(r#"{"type":"dance"}"#).is_err());
        assert!(serde_json::from_str::<ClientEvent>("not json").is_err());
    }

    #[test]
    fn thinking_carries_original_payload() {
        let payload = QueryPayload {
            client: "web-app".into(),
            value: "hello".into(),
            extra: serde_json::Value::Null,
        };
        let json = ServerEvent::Thinking {
            on: true,
            payload: payload.clone(),
        }
        .encode()
        .unwrap();
        assert!(json.contains("\"type\":\"thinking\""));
        assert!(json.contains("\"on\":true"));
        assert!(json.contains("\"value\":\"hello\""));
    }

    #[test]
    fn record_is_bare() {
        assert_eq!(ServerEvent::Record.encode().unwrap(), r#"{"type":"record"}"#);
    }

    #[test]
    fn error_event_shape() {
        let json = ServerEvent::error("pipeline-not-ready", "model not loaded")
            .encode()
            .unwrap();
        assert!(json.contains("\"type\":\"error\""));
        assert!(json.contains("pipeline-not-ready"));
    }

    #[test]
    fn answer_embeds_reply() {
        let json = ServerEvent::Answer {
            client: "web-app".into(),
            reply: PipelineReply {
                intent: "greeting".into(),
                answer: "Hello!".into(),
                matched: true,
            },
        }
        .encode()
        .unwrap();
        assert!(json.contains("\"type\":\"answer\""));
        assert!(json.contains("\"intent\":\"greeting\""));
    }
}
