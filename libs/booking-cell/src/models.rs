use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use conversation_cell::OfferedSlot;

/// One bookable interval as handed to the model and the customer.
///
/// `start`/`end` are ISO 8601 with the spa's offset; `start_time`/`end_time`
/// are 12-hour clock labels.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Slot {
    pub start: String,
    pub end: String,
    pub start_time: String,
    pub end_time: String,
}

impl Slot {
    pub fn to_offered(&self, index: usize) -> OfferedSlot {
        OfferedSlot {
            index,
            start: self.start.clone(),
            start_time: self.start_time.clone(),
            end: self.end.clone(),
            end_time: self.end_time.clone(),
        }
    }
}

/// Tool result for `check_availability`. Serialized verbatim into the tool
/// history, so field names are part of the model-facing contract.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CheckAvailabilityResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
    #[serde(default)]
    pub available_slots: Vec<Slot>,
    #[serde(default)]
    pub all_slots: Vec<Slot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability_summary: Option<String>,
    #[serde(default)]
    pub suggested_slots: Vec<Slot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckAvailabilityResult {
    pub fn failure(date: &str, service_type: &str, error: &str) -> Self {
        Self {
            success: false,
            date: Some(date.to_string()),
            service_type: Some(service_type.to_string()),
            error: Some(error.to_string()),
            ..Default::default()
        }
    }

    /// The slot list offers are recorded from: prefer `all_slots`, fall back
    /// to `available_slots`.
    pub fn offerable_slots(&self) -> &[Slot] {
        if !self.all_slots.is_empty() {
            &self.all_slots
        } else {
            &self.available_slots
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({ "success": false }))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BookingResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub argument_adjustments: Option<Adjustments>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BookingResult {
    pub fn failure(error: &str) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            ..Default::default()
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({ "success": false }))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RescheduleResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appointment_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RescheduleResult {
    pub fn failure(error: &str) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            ..Default::default()
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({ "success": false }))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CancelResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appointment_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancellation_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CancelResult {
    pub fn failure(error: &str) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            ..Default::default()
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({ "success": false }))
    }
}

/// Record of a field the enforcement layer overwrote while normalizing the
/// model's booking arguments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldAdjustment {
    pub original: String,
    pub normalized: String,
}

pub type Adjustments = HashMap<String, FieldAdjustment>;

/// Outcome of an orchestrated booking. A mismatch is a first-class value, not
/// an error: the model receives it as a structured tool result and is
/// expected to re-offer slots.
#[derive(Debug, Clone)]
pub enum BookingOutcome {
    Booked(BookingResult),
    Mismatch {
        error: String,
        pending_slot_options: Vec<OfferedSlot>,
    },
    CalendarFailed {
        reason: String,
    },
}

impl BookingOutcome {
    pub fn is_booked(&self) -> bool {
        matches!(self, BookingOutcome::Booked(result) if result.success)
    }

    /// Serialize for the tool history. The mismatch arm carries the
    /// machine-readable `code` and the still-open options.
    pub fn to_tool_result(&self) -> Value {
        match self {
            BookingOutcome::Booked(result) => result.to_value(),
            BookingOutcome::Mismatch {
                error,
                pending_slot_options,
            } => json!({
                "success": false,
                "error": error,
                "code": "slot_selection_mismatch",
                "pending_slot_options": pending_slot_options,
            }),
            BookingOutcome::CalendarFailed { reason } => json!({
                "success": false,
                "error": reason,
            }),
        }
    }
}
