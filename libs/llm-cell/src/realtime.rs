//! Realtime voice provider protocol: typed events, control frames, and the
//! websocket client the voice bridge drives.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use crate::error::LlmError;
use crate::types::ToolDefinition;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Provider error codes that are part of normal operation and must not be
/// surfaced to the caller.
pub const BENIGN_ERROR_CODES: [&str; 3] = [
    "response_cancel_not_active",
    "input_audio_buffer_commit_empty",
    "conversation_already_has_active_response",
];

/// Typed view over the provider's event stream. Unknown events are preserved
/// with their type string so the bridge can log and ignore them.
#[derive(Debug, Clone)]
pub enum RealtimeEvent {
    SessionUpdated {
        session: Value,
    },
    AudioDelta {
        delta: String,
    },
    InputTranscriptionDelta {
        item_id: Option<String>,
        delta: String,
    },
    InputTranscriptionCompleted {
        item_id: Option<String>,
        transcript: Option<String>,
    },
    ItemCreated {
        item: Value,
    },
    ItemDelta {
        item_id: Option<String>,
        delta: Value,
    },
    ItemCompleted {
        item_id: Option<String>,
    },
    AssistantTranscriptDelta {
        delta: String,
    },
    AssistantTranscriptDone {
        transcript: Option<String>,
    },
    FunctionCallArgumentsDone {
        call_id: Option<String>,
        name: String,
        arguments: String,
    },
    Error {
        code: Option<String>,
        message: Option<String>,
    },
    Unknown {
        event_type: String,
    },
}

impl RealtimeEvent {
    pub fn is_benign_error(&self) -> bool {
        match self {
            RealtimeEvent::Error { code: Some(code), .. } => {
                BENIGN_ERROR_CODES.contains(&code.as_str())
            }
            _ => false,
        }
    }
}

fn string_field(value: &Value, field: &str) -> Option<String> {
    value.get(field).and_then(Value::as_str).map(str::to_string)
}

/// Map one raw provider event into the typed vocabulary.
///
/// Transcription events have shipped under several names; any
/// input-transcription delta/completed pair is normalized into the same two
/// variants, matching the "any naming" rule.
pub fn parse_realtime_event(raw: &str) -> Result<RealtimeEvent, LlmError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| LlmError::Transport(format!("bad event: {}", e)))?;
    let event_type = value
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let event = match event_type.as_str() {
        "session.updated" => RealtimeEvent::SessionUpdated {
            session: value.get("session").cloned().unwrap_or(Value::Null),
        },
        "response.audio.delta" => RealtimeEvent::AudioDelta {
            delta: string_field(&value, "delta").unwrap_or_default(),
        },
        "input_audio_buffer.transcription.delta"
        | "conversation.item.input_audio_transcription.delta" => {
            let delta = match value.get("delta") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Object(map)) => map
                    .get("transcript")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                _ => String::new(),
            };
            RealtimeEvent::InputTranscriptionDelta {
                item_id: string_field(&value, "item_id"),
                delta,
            }
        }
        "input_audio_buffer.transcription.completed"
        | "conversation.item.input_audio_transcription.completed" => {
            RealtimeEvent::InputTranscriptionCompleted {
                item_id: string_field(&value, "item_id"),
                transcript: string_field(&value, "transcript"),
            }
        }
        "conversation.item.created" => RealtimeEvent::ItemCreated {
            item: value.get("item").cloned().unwrap_or(Value::Null),
        },
        "conversation.item.delta" => RealtimeEvent::ItemDelta {
            item_id: string_field(&value, "item_id"),
            delta: value.get("delta").cloned().unwrap_or(Value::Null),
        },
        "conversation.item.completed" => RealtimeEvent::ItemCompleted {
            item_id: string_field(&value, "item_id"),
        },
        "response.audio_transcript.delta" | "response.output_text.delta" => {
            let delta = match value.get("delta") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Object(map)) => map
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                _ => String::new(),
            };
            RealtimeEvent::AssistantTranscriptDelta { delta }
        }
        "response.audio_transcript.done" | "response.output_text.done" => {
            RealtimeEvent::AssistantTranscriptDone {
                transcript: string_field(&value, "transcript"),
            }
        }
        // Legacy text-only completion event.
        "response.text.done" => RealtimeEvent::AssistantTranscriptDone {
            transcript: string_field(&value, "text"),
        },
        "response.function_call_arguments.done" => RealtimeEvent::FunctionCallArgumentsDone {
            call_id: string_field(&value, "call_id"),
            name: string_field(&value, "name").unwrap_or_default(),
            arguments: string_field(&value, "arguments").unwrap_or_else(|| "{}".to_string()),
        },
        "error" => {
            let error = value.get("error").cloned().unwrap_or(Value::Null);
            RealtimeEvent::Error {
                code: string_field(&error, "code"),
                message: string_field(&error, "message"),
            }
        }
        other => RealtimeEvent::Unknown {
            event_type: other.to_string(),
        },
    };

    Ok(event)
}

// ==============================================================================
// CONTROL FRAMES
// ==============================================================================

/// Session configuration declaring audio formats, server VAD, and the tool
/// declarations shared with the text channels.
pub fn session_update_frame(instructions: &str, tools: &[ToolDefinition]) -> Value {
    let tool_entries: Vec<Value> = tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.parameters,
            })
        })
        .collect();

    json!({
        "type": "session.update",
        "session": {
            "modalities": ["text", "audio"],
            "instructions": instructions,
            "voice": "alloy",
            "input_audio_format": "pcm16",
            "output_audio_format": "pcm16",
            "input_audio_transcription": { "model": "whisper-1" },
            "turn_detection": {
                "type": "server_vad",
                "threshold": 0.6,
                "prefix_padding_ms": 300,
                "silence_duration_ms": 600,
                "create_response": true
            },
            "tools": tool_entries,
            "tool_choice": "auto",
            "temperature": 0.7
        }
    })
}

/// Response trigger instructing the assistant to speak specific text.
pub fn greeting_frame(greeting_text: &str) -> Value {
    json!({
        "type": "response.create",
        "response": {
            "modalities": ["text", "audio"],
            "instructions": format!("Start the conversation by saying: {}", greeting_text)
        }
    })
}

pub fn response_create_frame(instructions: Option<&str>) -> Value {
    json!({
        "type": "response.create",
        "response": {
            "modalities": ["text", "audio"],
            "instructions": instructions
        }
    })
}

pub fn audio_append_frame(audio_base64: &str) -> Value {
    json!({ "type": "input_audio_buffer.append", "audio": audio_base64 })
}

pub fn audio_commit_frame() -> Value {
    json!({ "type": "input_audio_buffer.commit" })
}

pub fn response_cancel_frame() -> Value {
    json!({ "type": "response.cancel" })
}

pub fn function_output_frame(call_id: &str, output: &Value) -> Value {
    json!({
        "type": "conversation.item.create",
        "item": {
            "type": "function_call_output",
            "call_id": call_id,
            "output": output.to_string(),
        }
    })
}

// ==============================================================================
// CLIENT
// ==============================================================================

pub struct RealtimeSender {
    sink: SplitSink<WsStream, WsMessage>,
}

impl RealtimeSender {
    pub async fn send(&mut self, frame: Value) -> Result<(), LlmError> {
        self.sink
            .send(WsMessage::Text(frame.to_string().into()))
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))
    }

    pub async fn close(&mut self) {
        let _ = self.sink.close().await;
    }
}

pub struct RealtimeReceiver {
    stream: SplitStream<WsStream>,
}

impl RealtimeReceiver {
    /// Next typed event, or None when the upstream socket closes.
    pub async fn next_event(&mut self) -> Option<Result<RealtimeEvent, LlmError>> {
        loop {
            match self.stream.next().await? {
                Ok(WsMessage::Text(text)) => {
                    return Some(parse_realtime_event(text.as_str()));
                }
                Ok(WsMessage::Close(_)) => return None,
                Ok(_) => continue,
                Err(e) => return Some(Err(LlmError::Transport(e.to_string()))),
            }
        }
    }
}

pub struct RealtimeClient;

impl RealtimeClient {
    /// Open the provider socket and split it into a writer/reader pair so
    /// the bridge's two workers can own their halves.
    pub async fn connect(
        url: &str,
        api_key: &str,
    ) -> Result<(RealtimeSender, RealtimeReceiver), LlmError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| LlmError::Transport(e.to_string()))?;
        request.headers_mut().insert(
            "Authorization",
            format!("Bearer {}", api_key)
                .parse()
                .map_err(|_| LlmError::Transport("invalid api key header".to_string()))?,
        );
        request.headers_mut().insert(
            "OpenAI-Beta",
            "realtime=v1"
                .parse()
                .map_err(|_| LlmError::Transport("invalid beta header".to_string()))?,
        );

        debug!("Connecting to realtime provider at {}", url);
        let (stream, _) = connect_async(request)
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;
        info!("Connected to realtime provider");

        let (sink, stream) = stream.split();
        Ok((RealtimeSender { sink }, RealtimeReceiver { stream }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_audio_delta() {
        let event =
            parse_realtime_event(r#"{"type":"response.audio.delta","delta":"AAAA"}"#).unwrap();
        assert!(matches!(event, RealtimeEvent::AudioDelta { delta } if delta == "AAAA"));
    }

    #[test]
    fn input_transcription_names_are_normalized() {
        for raw in [
            r#"{"type":"input_audio_buffer.transcription.completed","transcript":"hi"}"#,
            r#"{"type":"conversation.item.input_audio_transcription.completed","item_id":"i1","transcript":"hi"}"#,
        ] {
            let event = parse_realtime_event(raw).unwrap();
            assert!(matches!(
                event,
                RealtimeEvent::InputTranscriptionCompleted { transcript: Some(t), .. } if t == "hi"
            ));
        }
    }

    #[test]
    fn benign_error_codes_are_flagged() {
        let event = parse_realtime_event(
            r#"{"type":"error","error":{"code":"response_cancel_not_active","message":"no response"}}"#,
        )
        .unwrap();
        assert!(event.is_benign_error());

        let fatal = parse_realtime_event(
            r#"{"type":"error","error":{"code":"server_error","message":"boom"}}"#,
        )
        .unwrap();
        assert!(!fatal.is_benign_error());
    }

    #[test]
    fn unknown_events_keep_their_type() {
        let event = parse_realtime_event(r#"{"type":"rate_limits.updated"}"#).unwrap();
        assert!(matches!(
            event,
            RealtimeEvent::Unknown { event_type } if event_type == "rate_limits.updated"
        ));
    }

    #[test]
    fn session_frame_declares_vad_and_tools() {
        let tools = vec![ToolDefinition {
            name: "check_availability".to_string(),
            description: "d".to_string(),
            parameters: json!({"type":"object"}),
        }];
        let frame = session_update_frame("be helpful", &tools);
        assert_eq!(frame["session"]["turn_detection"]["threshold"], 0.6);
        assert_eq!(frame["session"]["turn_detection"]["prefix_padding_ms"], 300);
        assert_eq!(frame["session"]["turn_detection"]["silence_duration_ms"], 600);
        assert_eq!(frame["session"]["tools"][0]["name"], "check_availability");
        assert_eq!(frame["session"]["input_audio_format"], "pcm16");
    }

    #[test]
    fn function_output_frame_embeds_call_id() {
        let frame = function_output_frame("call_9", &json!({"success": true}));
        assert_eq!(frame["item"]["call_id"], "call_9");
        assert_eq!(frame["item"]["type"], "function_call_output");
    }
}
