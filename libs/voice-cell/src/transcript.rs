//! Transcript reconciliation over the provider's event stream.
//!
//! Three sources feed the transcript: per-item buffers keyed by the
//! provider's item id, a rolling customer buffer for input-transcription
//! deltas, and a rolling assistant buffer for output deltas. Entries are
//! sanitized (trimmed, JSON artifacts dropped) and deduplicated against the
//! last committed `{speaker}:{text}` fingerprint.

use std::collections::HashMap;

use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use conversation_cell::{FunctionCallRecord, Speaker, TranscriptSegment};

#[derive(Debug, Clone)]
struct PendingItem {
    speaker: Speaker,
    text: String,
}

#[derive(Default)]
pub struct TranscriptReconciler {
    transcript: Vec<TranscriptSegment>,
    function_calls: Vec<FunctionCallRecord>,
    pending_items: HashMap<String, PendingItem>,
    customer_buffer: String,
    assistant_buffer: String,
    last_fingerprint: Option<String>,
}

impl TranscriptReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transcript(&self) -> &[TranscriptSegment] {
        &self.transcript
    }

    pub fn function_calls(&self) -> &[FunctionCallRecord] {
        &self.function_calls
    }

    pub fn into_artifacts(self) -> (Vec<TranscriptSegment>, Vec<FunctionCallRecord>) {
        (self.transcript, self.function_calls)
    }

    /// Most recent customer utterances, newest first, bounded. Used to
    /// backfill a slot selection behind a vague confirmation.
    pub fn recent_customer_texts(&self, limit: usize) -> Vec<String> {
        self.transcript
            .iter()
            .rev()
            .filter(|segment| segment.speaker == Speaker::Customer)
            .take(limit)
            .map(|segment| segment.text.clone())
            .collect()
    }

    pub fn record_function_call(&mut self, name: &str, arguments: Value) {
        self.function_calls.push(FunctionCallRecord {
            function: name.to_string(),
            arguments,
            timestamp: Utc::now(),
        });
    }

    // ------------------------------------------------------------------
    // Delta buffers
    // ------------------------------------------------------------------

    pub fn push_customer_delta(&mut self, delta: &str) {
        self.customer_buffer.push_str(delta);
    }

    pub fn push_assistant_delta(&mut self, delta: &str) {
        self.assistant_buffer.push_str(delta);
    }

    /// Commit the customer buffer (or the provided full transcript).
    /// Returns true when a transcript entry was actually appended.
    pub fn commit_customer(&mut self, transcript: Option<&str>) -> bool {
        let text = transcript
            .map(str::to_string)
            .unwrap_or_else(|| self.customer_buffer.trim().to_string());
        self.customer_buffer.clear();
        self.append_entry(Speaker::Customer, &text)
    }

    pub fn commit_assistant(&mut self, transcript: Option<&str>) -> bool {
        let text = transcript
            .map(str::to_string)
            .unwrap_or_else(|| self.assistant_buffer.trim().to_string());
        self.assistant_buffer.clear();
        self.append_entry(Speaker::Assistant, &text)
    }

    // ------------------------------------------------------------------
    // Conversation items
    // ------------------------------------------------------------------

    /// Seed a pending item; items created already-completed finalize
    /// immediately.
    pub fn item_created(&mut self, item: &Value) -> bool {
        let Some(item_id) = item.get("id").and_then(Value::as_str) else {
            return false;
        };
        let Some(speaker) = speaker_from_role(item.get("role").and_then(Value::as_str)) else {
            return false;
        };

        let texts = extract_texts(item.get("content"));
        let pending = self
            .pending_items
            .entry(item_id.to_string())
            .or_insert_with(|| PendingItem {
                speaker,
                text: String::new(),
            });
        if !texts.is_empty() {
            pending.text.push_str(texts.join(" ").trim());
        }

        if item.get("status").and_then(Value::as_str) == Some("completed") {
            return self.finalize_item(item_id);
        }
        false
    }

    pub fn item_delta(&mut self, item_id: Option<&str>, delta: &Value) {
        let Some(item_id) = item_id else { return };
        let Some(pending) = self.pending_items.get_mut(item_id) else {
            return;
        };
        let texts = extract_texts(delta.get("content"));
        if !texts.is_empty() {
            pending.text.push_str(texts.join(" ").trim());
        }
    }

    pub fn item_completed(&mut self, item_id: Option<&str>) -> bool {
        match item_id {
            Some(item_id) => self.finalize_item(item_id),
            None => false,
        }
    }

    fn finalize_item(&mut self, item_id: &str) -> bool {
        let Some(pending) = self.pending_items.remove(item_id) else {
            return false;
        };
        let text = pending.text.trim().to_string();
        if text.is_empty() {
            debug!("Skipping empty pending item {}", item_id);
            return false;
        }
        self.append_entry(pending.speaker, &text)
    }

    // ------------------------------------------------------------------
    // Finalization
    // ------------------------------------------------------------------

    /// Flush both delta buffers and drain pending items into the
    /// transcript. Called once when the session ends.
    pub fn finalize_buffers(&mut self) {
        if !self.customer_buffer.trim().is_empty() {
            let text = self.customer_buffer.trim().to_string();
            self.customer_buffer.clear();
            self.append_entry(Speaker::Customer, &text);
        }
        if !self.assistant_buffer.trim().is_empty() {
            let text = self.assistant_buffer.trim().to_string();
            self.assistant_buffer.clear();
            self.append_entry(Speaker::Assistant, &text);
        }

        let pending_ids: Vec<String> = self.pending_items.keys().cloned().collect();
        for item_id in pending_ids {
            self.finalize_item(&item_id);
        }
    }

    // ------------------------------------------------------------------
    // Sanitation
    // ------------------------------------------------------------------

    /// Append a sanitized entry: non-empty after trim, not a JSON object or
    /// array (tool artifacts, not speech), and not a repeat of the last
    /// committed entry.
    pub fn append_entry(&mut self, speaker: Speaker, raw_text: &str) -> bool {
        let text = raw_text.trim();
        if text.is_empty() {
            return false;
        }

        if text.starts_with('{') || text.starts_with('[') {
            if let Ok(parsed) = serde_json::from_str::<Value>(text) {
                if parsed.is_object() || parsed.is_array() {
                    return false;
                }
            }
        }

        let fingerprint = format!("{:?}:{}", speaker, text);
        if self.last_fingerprint.as_deref() == Some(fingerprint.as_str()) {
            return false;
        }

        debug!("Captured transcript entry [{:?}]: {}", speaker, text);
        self.transcript.push(TranscriptSegment {
            speaker,
            text: text.to_string(),
            timestamp: Utc::now(),
        });
        self.last_fingerprint = Some(fingerprint);
        true
    }
}

fn speaker_from_role(role: Option<&str>) -> Option<Speaker> {
    match role {
        Some("user") | Some("customer") | Some("caller") => Some(Speaker::Customer),
        Some("assistant") | Some("system") => Some(Speaker::Assistant),
        _ => None,
    }
}

/// Pull speech text out of an item content array: plain text entries plus
/// audio entries that carry a transcript.
fn extract_texts(content: Option<&Value>) -> Vec<String> {
    let Some(entries) = content.and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut texts = Vec::new();
    for entry in entries {
        match entry.get("type").and_then(Value::as_str) {
            Some("text") | Some("input_text") | Some("output_text") => {
                if let Some(text) = entry.get("text").and_then(Value::as_str) {
                    texts.push(text.to_string());
                }
            }
            Some("input_audio") | Some("audio") => {
                if let Some(transcript) = entry.get("transcript").and_then(Value::as_str) {
                    texts.push(transcript.to_string());
                }
            }
            _ => {}
        }
    }
    texts
}
