use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::metadata::ConversationMetadata;

// ==============================================================================
// CHANNEL / STATUS ENUMS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Voice,
    Sms,
    Email,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Voice => write!(f, "voice"),
            Channel::Sms => write!(f, "sms"),
            Channel::Email => write!(f, "email"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    Completed,
    Failed,
}

impl fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversationStatus::Active => write!(f, "active"),
            ConversationStatus::Completed => write!(f, "completed"),
            ConversationStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

// ==============================================================================
// CUSTOMER
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: Uuid,
    pub name: String,
    /// Unique and non-null. When only an email is known, a deterministic
    /// `email:<digest>` placeholder is stored and `synthesized_phone` is set;
    /// synthesized values never collide with real numbers.
    pub phone: String,
    pub email: Option<String>,
    #[serde(default)]
    pub synthesized_phone: bool,
    #[serde(default)]
    pub is_new_client: bool,
    #[serde(default)]
    pub has_allergies: bool,
    #[serde(default)]
    pub is_pregnant: bool,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    pub fn new(name: &str, phone: &str, email: Option<&str>) -> Self {
        let now = Utc::now();
        Self {
            id: shared_utils::new_id(),
            name: name.to_string(),
            phone: phone.to_string(),
            email: email.map(|e| e.to_string()),
            synthesized_phone: phone.starts_with("email:"),
            is_new_client: true,
            has_allergies: false,
            is_pregnant: false,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Deterministic phone placeholder for email-only contacts.
///
/// `email:` prefix plus the first 10 hex chars of SHA-256 of the lowercased
/// address. The prefix keeps it disjoint from any dialable number.
pub fn synthesize_phone_from_email(email: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(email.trim().to_lowercase().as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    format!("email:{}", &hex[..10])
}

// ==============================================================================
// CONVERSATION
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub customer_id: Option<Uuid>,
    pub channel: Channel,
    pub status: ConversationStatus,
    pub initiated_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub satisfaction_score: Option<i32>,
    pub sentiment: Option<Sentiment>,
    pub outcome: Option<ConversationOutcome>,
    pub summary: Option<String>,
    pub subject: Option<String>,
    #[serde(default)]
    pub metadata: ConversationMetadata,
}

impl Conversation {
    pub fn new(customer_id: Option<Uuid>, channel: Channel) -> Self {
        let now = Utc::now();
        Self {
            id: shared_utils::new_id(),
            customer_id,
            channel,
            status: ConversationStatus::Active,
            initiated_at: now,
            last_activity_at: now,
            completed_at: None,
            satisfaction_score: None,
            sentiment: None,
            outcome: None,
            summary: None,
            subject: None,
            metadata: ConversationMetadata::default(),
        }
    }
}

// ==============================================================================
// MESSAGE + CHANNEL DETAILS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub direction: Direction,
    pub content: String,
    pub sent_at: DateTime<Utc>,
    #[serde(default)]
    pub processed: bool,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Message {
    pub fn inbound(conversation_id: Uuid, content: &str) -> Self {
        Self::new(conversation_id, Direction::Inbound, content)
    }

    pub fn outbound(conversation_id: Uuid, content: &str) -> Self {
        Self::new(conversation_id, Direction::Outbound, content)
    }

    fn new(conversation_id: Uuid, direction: Direction, content: &str) -> Self {
        Self {
            id: shared_utils::new_id(),
            conversation_id,
            direction,
            content: content.to_string(),
            sent_at: Utc::now(),
            processed: false,
            metadata: serde_json::Map::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Customer,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCallRecord {
    pub function: String,
    pub arguments: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// 1:1 with the single inbound message of a voice conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceDetails {
    pub message_id: Uuid,
    pub duration_seconds: i64,
    pub recording_url: Option<String>,
    pub transcript_segments: Vec<TranscriptSegment>,
    pub function_calls: Vec<FunctionCallRecord>,
    pub interruption_count: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsDetails {
    pub message_id: Uuid,
    pub from_number: String,
    pub to_number: String,
    pub provider_message_id: String,
    pub delivery_status: Option<String>,
    #[serde(default = "default_segments")]
    pub segments: i32,
}

fn default_segments() -> i32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailDetails {
    pub message_id: Uuid,
    pub subject: String,
    pub from_address: String,
    pub to_address: String,
    pub body_text: String,
    pub body_html: Option<String>,
    #[serde(default)]
    pub attachments: Vec<String>,
}

/// Analytics event attached to a conversation (tool metrics, calendar
/// failures, escalations).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunicationEvent {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub message_id: Option<Uuid>,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub details: serde_json::Value,
}

impl CommunicationEvent {
    pub fn new(conversation_id: Uuid, event_type: &str, details: serde_json::Value) -> Self {
        Self {
            id: shared_utils::new_id(),
            conversation_id,
            message_id: None,
            event_type: event_type.to_string(),
            timestamp: Utc::now(),
            details,
        }
    }
}

// ==============================================================================
// APPOINTMENT
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Completed,
    Cancelled,
    NoShow,
    Rescheduled,
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Scheduled => write!(f, "scheduled"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
            AppointmentStatus::NoShow => write!(f, "no_show"),
            AppointmentStatus::Rescheduled => write!(f, "rescheduled"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BookedBy {
    Ai,
    Staff,
}

/// Local appointment row. `calendar_event_id` is the foreign key into the
/// calendar of record and must round-trip for any non-cancelled appointment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub calendar_event_id: String,
    pub appointment_datetime: DateTime<Utc>,
    pub service_type: String,
    pub provider: Option<String>,
    pub duration_minutes: i32,
    pub status: AppointmentStatus,
    pub booked_by: BookedBy,
    pub special_requests: Option<String>,
    pub cancellation_reason: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ==============================================================================
// SCORING
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
    Mixed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConversationOutcome {
    AppointmentScheduled,
    AppointmentRescheduled,
    AppointmentCancelled,
    InfoRequest,
    Escalated,
    Abandoned,
    Unresolved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationScore {
    pub satisfaction_score: i32,
    pub sentiment: Sentiment,
    pub outcome: ConversationOutcome,
    pub summary: String,
}

impl ConversationScore {
    /// Defaults used whenever scoring fails or there is nothing to score.
    pub fn neutral() -> Self {
        Self {
            satisfaction_score: 5,
            sentiment: Sentiment::Neutral,
            outcome: ConversationOutcome::Unresolved,
            summary: String::new(),
        }
    }
}
