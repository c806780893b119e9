//! Wire protocol for the realtime duplex transport.
//!
//! Tagged unions mirroring the remote event schema. Inbound kinds the session
//! does not handle deserialize into [`ServerEvent::Unknown`] so a protocol
//! addition never breaks the dispatch loop.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events this side writes to the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit,
    #[serde(rename = "response.create")]
    ResponseCreate,
    #[serde(rename = "response.cancel")]
    ResponseCancel,
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },
}

/// Events the remote side emits.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated,
    #[serde(rename = "session.updated")]
    SessionUpdated,
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputAudioTranscriptionCompleted { transcript: String },
    #[serde(rename = "response.audio.delta")]
    ResponseAudioDelta { delta: String },
    #[serde(rename = "response.audio_transcript.delta")]
    ResponseAudioTranscriptDelta { delta: String },
    #[serde(rename = "response.audio.done")]
    ResponseAudioDone,
    #[serde(rename = "response.done")]
    ResponseDone,
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped,
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        call_id: String,
        name: String,
        arguments: String,
    },
    #[serde(rename = "error")]
    Error { error: ErrorDetail },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
}

/// Configuration handshake payload sent as the first outbound event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub model: String,
    pub voice: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    pub modalities: Vec<String>,
    pub input_audio_format: String,
    pub output_audio_format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<AudioTranscription>,
    pub turn_detection: TurnDetection,
    pub tools: Vec<ToolDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioTranscription {
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnDetection {
    ServerVad {
        threshold: f32,
        prefix_padding_ms: u32,
        silence_duration_ms: u32,
    },
}

/// One entry of the tool manifest advertised during the handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDef {
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            kind: "function".to_string(),
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Items injectable into the remote conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ConversationItem {
    #[serde(rename = "message")]
    Message {
        role: ItemRole,
        content: Vec<ItemContent>,
    },
    #[serde(rename = "function_call_output")]
    FunctionCallOutput { call_id: String, output: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemRole {
    User,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ItemContent {
    #[serde(rename = "input_text")]
    InputText { text: String },
}

impl ConversationItem {
    /// A plain user text turn, the same shape the remote transcribes captured
    /// audio into.
    pub fn user_text(text: impl Into<String>) -> Self {
        ConversationItem::Message {
            role: ItemRole::User,
            content: vec![ItemContent::InputText { text: text.into() }],
        }
    }

    pub fn function_output(call_id: impl Into<String>, output: &Value) -> Self {
        ConversationItem::FunctionCallOutput {
            call_id: call_id.into(),
            output: output.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_events_carry_dotted_type_tags() {
        let event = ClientEvent::InputAudioBufferAppend {
            audio: "AAAA".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "input_audio_buffer.append");
        assert_eq!(json["audio"], "AAAA");

        let commit = serde_json::to_value(&ClientEvent::InputAudioBufferCommit).unwrap();
        assert_eq!(commit["type"], "input_audio_buffer.commit");
    }

    #[test]
    fn server_events_tolerate_extra_fields() {
        let event: ServerEvent = serde_json::from_str(
            r#"{"type":"response.audio.delta","event_id":"ev_1","response_id":"r_1","delta":"UklG"}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            ServerEvent::ResponseAudioDelta {
                delta: "UklG".to_string()
            }
        );
    }

    #[test]
    fn unrecognized_server_event_kinds_fall_back_to_unknown() {
        let event: ServerEvent =
            serde_json::from_str(r#"{"type":"rate_limits.updated","rate_limits":[]}"#).unwrap();
        assert_eq!(event, ServerEvent::Unknown);
    }

    #[test]
    fn function_call_arguments_done_round_trips() {
        let event: ServerEvent = serde_json::from_str(
            r#"{"type":"response.function_call_arguments.done","call_id":"call_7","name":"report_concern","arguments":"{\"severity\":\"low\"}"}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            ServerEvent::FunctionCallArgumentsDone {
                call_id: "call_7".to_string(),
                name: "report_concern".to_string(),
                arguments: "{\"severity\":\"low\"}".to_string(),
            }
        );
    }

    #[test]
    fn turn_detection_serializes_as_server_vad() {
        let config = TurnDetection::ServerVad {
            threshold: 0.5,
            prefix_padding_ms: 200,
            silence_duration_ms: 700,
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["type"], "server_vad");
        assert_eq!(json["silence_duration_ms"], 700);
    }

    #[test]
    fn function_output_item_embeds_serialized_result() {
        let item = ConversationItem::function_output("call_1", &serde_json::json!({"ok": true}));
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["type"], "function_call_output");
        assert_eq!(json["call_id"], "call_1");
        assert_eq!(json["output"], r#"{"ok":true}"#);
    }

    #[test]
    fn user_text_item_is_a_user_message() {
        let json = serde_json::to_value(ConversationItem::user_text("hello")).unwrap();
        assert_eq!(json["type"], "message");
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"][0]["type"], "input_text");
        assert_eq!(json["content"][0]["text"], "hello");
    }
}
