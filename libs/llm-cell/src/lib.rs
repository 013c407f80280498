//! LLM port: chat completions with tool declarations for the text channels,
//! plus the realtime event vocabulary and client used by the voice bridge.

pub mod backoff;
pub mod chat;
pub mod error;
pub mod realtime;
pub mod types;

pub use backoff::BackoffSchedule;
pub use chat::{ChatCompletion, OpenAiChatClient};
pub use error::LlmError;
pub use realtime::{
    audio_append_frame, audio_commit_frame, function_output_frame, greeting_frame,
    parse_realtime_event, response_cancel_frame, response_create_frame, session_update_frame,
    RealtimeClient, RealtimeEvent, RealtimeReceiver, RealtimeSender, BENIGN_ERROR_CODES,
};
pub use types::{
    ChatMessage, ChatRequest, ChatResponse, ResponseFormat, Role, ToolCall, ToolDefinition,
};
