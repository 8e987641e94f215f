//! Frame types for client-backend communication over the session WebSocket.

use serde::{Deserialize, Serialize};

/// Messages sent FROM the client TO the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// User-originated input, typed or voice-transcribed
    TextMessage {
        text: String,
        /// Client-generated message id, echoed back for correlation
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<serde_json::Value>,
    },
    /// Rotate the auth credential on a live session without reconnecting
    RefreshToken { token: String },
    /// Diagnostic ping
    TestMessage { text: String, id: String },
}

/// Messages sent FROM the backend TO the client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Session established — first frame after the socket opens
    Connected {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    /// Avatar/UI mood state update
    StateChange { state: String },
    /// Streaming partial reply, appended to the accumulating transcript
    TextDelta { text: String },
    /// Finalized transcription of the user's speech
    Transcription { text: String },
    /// Backend is working on a reply
    Processing { text: String },
    /// Finalized assistant reply
    Response { text: String },
    /// Assistant speech, base64-encoded
    AudioResponse { audio: String },
    /// Ack of a `refresh_token` frame
    TokenRefreshed,
    /// Tool invocation notice
    FunctionCall {
        function: String,
        arguments: serde_json::Value,
    },
    /// User-visible failure
    Error { message: String },
    /// Informational toast
    Notice { message: String },
    /// Unsolicited assistant message
    ProactiveMessage {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        emotion: Option<String>,
    },
    /// Transient avatar animation cue
    IdleAnimation { emotion: String },
}

impl ClientFrame {
    /// Serialize to the wire representation.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl ServerFrame {
    /// Parse one inbound text frame. Unknown `type` values and malformed
    /// JSON both surface as `Err` so the caller can log and drop them.
    pub fn from_json(text: &str) -> serde_json::Result<ServerFrame> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_message_serde() {
        let msg = ClientFrame::TextMessage {
            text: "hola".to_string(),
            id: "1".to_string(),
            metadata: None,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "text_message");
        assert_eq!(json["text"], "hola");
        assert_eq!(json["id"], "1");
        // metadata=None should be skipped by skip_serializing_if
        assert!(json.get("metadata").is_none());
    }

    #[test]
    fn text_message_metadata_serde() {
        let msg = ClientFrame::TextMessage {
            text: "hola".to_string(),
            id: "2".to_string(),
            metadata: Some(serde_json::json!({"source": "voice"})),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["metadata"]["source"], "voice");
    }

    #[test]
    fn refresh_token_serde() {
        let msg = ClientFrame::RefreshToken {
            token: "tok-abc".to_string(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "refresh_token");
        assert_eq!(json["token"], "tok-abc");
    }

    #[test]
    fn test_message_serde() {
        let msg = ClientFrame::TestMessage {
            text: "ping".to_string(),
            id: "t1".to_string(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "test_message");
    }

    #[test]
    fn connected_uses_camel_case_session_id() {
        let frame = ServerFrame::from_json(r#"{"type":"connected","sessionId":"s-1"}"#).unwrap();
        match frame {
            ServerFrame::Connected { session_id } => assert_eq!(session_id, "s-1"),
            _ => panic!("Expected Connected"),
        }
    }

    #[test]
    fn response_serde() {
        let frame = ServerFrame::from_json(r#"{"type":"response","text":"hi there"}"#).unwrap();
        match frame {
            ServerFrame::Response { text } => assert_eq!(text, "hi there"),
            _ => panic!("Expected Response"),
        }
    }

    #[test]
    fn token_refreshed_has_no_fields() {
        let frame = ServerFrame::from_json(r#"{"type":"token_refreshed"}"#).unwrap();
        assert!(matches!(frame, ServerFrame::TokenRefreshed));
    }

    #[test]
    fn proactive_message_optional_emotion() {
        let frame =
            ServerFrame::from_json(r#"{"type":"proactive_message","message":"miss you"}"#).unwrap();
        match frame {
            ServerFrame::ProactiveMessage { message, emotion } => {
                assert_eq!(message, "miss you");
                assert!(emotion.is_none());
            }
            _ => panic!("Expected ProactiveMessage"),
        }

        let frame = ServerFrame::from_json(
            r#"{"type":"proactive_message","message":"hey","emotion":"happy"}"#,
        )
        .unwrap();
        match frame {
            ServerFrame::ProactiveMessage { emotion, .. } => {
                assert_eq!(emotion.as_deref(), Some("happy"));
            }
            _ => panic!("Expected ProactiveMessage"),
        }
    }

    #[test]
    fn function_call_serde() {
        let frame = ServerFrame::from_json(
            r#"{"type":"function_call","function":"set_mood","arguments":{"mood":"calm"}}"#,
        )
        .unwrap();
        match frame {
            ServerFrame::FunctionCall {
                function,
                arguments,
            } => {
                assert_eq!(function, "set_mood");
                assert_eq!(arguments["mood"], "calm");
            }
            _ => panic!("Expected FunctionCall"),
        }
    }

    #[test]
    fn unknown_type_is_an_error() {
        assert!(ServerFrame::from_json(r#"{"type":"mystery","x":1}"#).is_err());
        assert!(ServerFrame::from_json("not json at all").is_err());
    }

    #[test]
    fn server_frame_roundtrip_all_variants() {
        let variants: Vec<ServerFrame> = vec![
            ServerFrame::Connected {
                session_id: "s".into(),
            },
            ServerFrame::StateChange {
                state: "happy".into(),
            },
            ServerFrame::TextDelta { text: "he".into() },
            ServerFrame::Transcription {
                text: "hola".into(),
            },
            ServerFrame::Processing {
                text: "thinking".into(),
            },
            ServerFrame::Response {
                text: "hola!".into(),
            },
            ServerFrame::AudioResponse {
                audio: "UklGRg==".into(),
            },
            ServerFrame::TokenRefreshed,
            ServerFrame::FunctionCall {
                function: "f".into(),
                arguments: serde_json::json!({}),
            },
            ServerFrame::Error {
                message: "oops".into(),
            },
            ServerFrame::Notice {
                message: "fyi".into(),
            },
            ServerFrame::ProactiveMessage {
                message: "hey".into(),
                emotion: Some("warm".into()),
            },
            ServerFrame::IdleAnimation {
                emotion: "sleepy".into(),
            },
        ];
        for frame in variants {
            let json_str = serde_json::to_string(&frame).unwrap();
            let _: ServerFrame = serde_json::from_str(&json_str).unwrap();
        }
    }

    #[test]
    fn client_frame_roundtrip_all_variants() {
        let variants: Vec<ClientFrame> = vec![
            ClientFrame::TextMessage {
                text: "x".into(),
                id: "1".into(),
                metadata: None,
            },
            ClientFrame::RefreshToken { token: "t".into() },
            ClientFrame::TestMessage {
                text: "y".into(),
                id: "2".into(),
            },
        ];
        for frame in variants {
            let json_str = frame.to_json().unwrap();
            let _: ClientFrame = serde_json::from_str(&json_str).unwrap();
        }
    }
}
