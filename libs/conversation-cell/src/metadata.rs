//! In-flight conversation control block.
//!
//! The metadata map is authoritative for booking enforcement: lost metadata
//! means lost guarantees. It serializes as a flat JSON object so the stored
//! form stays inspectable, and unknown keys round-trip via the flattened
//! `extra` map.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One numbered slot inside a pending offer. Index is 1-based.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OfferedSlot {
    pub index: usize,
    pub start: String,
    pub start_time: String,
    pub end: String,
    pub end_time: String,
}

/// The current availability offer made to the customer, plus any captured
/// selection against it. Offers expire four hours after they were made.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PendingSlotOffers {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offered_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub slots: Vec<OfferedSlot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_option_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_slot: Option<OfferedSlot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_by_message_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_content_preview: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_at: Option<DateTime<Utc>>,
}

impl PendingSlotOffers {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expires) if expires < now)
    }

    pub fn has_selection(&self) -> bool {
        self.selected_slot.is_some() || self.selected_option_index.is_some()
    }
}

/// Anchor for reschedule/cancel requests that arrive without an
/// appointment_id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastAppointment {
    pub calendar_event_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancellation_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConversationMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_slot_offers: Option<PendingSlotOffers>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_booking_intent: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_booking_service: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_appointment: Option<LastAppointment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ConversationMetadata {
    pub fn clear_booking_intent(&mut self) {
        self.pending_booking_intent = None;
        self.pending_booking_service = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_keys_round_trip() {
        let raw = serde_json::json!({
            "pending_booking_intent": true,
            "campaign_tag": "spring-promo"
        });
        let parsed: ConversationMetadata = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.pending_booking_intent, Some(true));

        let back = serde_json::to_value(&parsed).unwrap();
        assert_eq!(back["campaign_tag"], "spring-promo");
    }

    #[test]
    fn expiry_checks_use_expires_at() {
        let mut offers = PendingSlotOffers::default();
        let now = Utc::now();
        assert!(!offers.is_expired(now));

        offers.expires_at = Some(now - chrono::Duration::minutes(1));
        assert!(offers.is_expired(now));

        offers.expires_at = Some(now + chrono::Duration::hours(4));
        assert!(!offers.is_expired(now));
    }
}
