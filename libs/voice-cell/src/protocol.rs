//! Client-side frame vocabulary for the voice websocket.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Base64 PCM16 chunk to append to the input buffer.
    Audio { data: String },
    /// Finalize the input buffer; the provider may auto-respond.
    Commit,
    /// Cancel the active assistant response, if any.
    Interrupt,
    /// Close the session gracefully.
    EndSession,
    Ping,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Base64 PCM16 chunk from the assistant.
    Audio { data: String },
    Pong,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_round_trip_the_wire_shape() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"audio","data":"AAAA"}"#).unwrap();
        assert_eq!(frame, ClientFrame::Audio { data: "AAAA".to_string() });

        let frame: ClientFrame = serde_json::from_str(r#"{"type":"interrupt"}"#).unwrap();
        assert_eq!(frame, ClientFrame::Interrupt);

        let out = serde_json::to_string(&ServerFrame::Pong).unwrap();
        assert_eq!(out, r#"{"type":"pong"}"#);
    }
}
