//! Slot offer storage, selection capture, and booking enforcement.
//!
//! All state lives in conversation metadata; the engine holds no resources.
//! Callers are responsible for running inside the conversation's
//! serialization guard so record/capture/enforce observe a consistent map.

use std::sync::OnceLock;

use chrono::{Duration, Utc};
use regex::Regex;
use tracing::{info, warn};

use conversation_cell::{
    Conversation, ConversationStore, Message, OfferedSlot, PendingSlotOffers, StoreError,
};
use shared_utils::naive_wall_time;

use crate::error::BookingError;
use crate::models::{Adjustments, CheckAvailabilityResult, FieldAdjustment};

const OFFER_TTL_HOURS: i64 = 4;
const SELECTION_PREVIEW_CHARS: usize = 120;

fn choice_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d{1,2})\b").expect("valid choice regex"))
}

pub struct SlotSelectionEngine;

impl SlotSelectionEngine {
    // ------------------------------------------------------------------
    // Slot offer storage
    // ------------------------------------------------------------------

    /// Replace `pending_slot_offers` with a fresh, numbered offer payload.
    ///
    /// An empty slot list clears any pending offers instead. When the
    /// previous offer carried a selection, it is preserved against the new
    /// list: first by matching the selected slot's `start`, then by reusing
    /// the selected index if it is still in range.
    pub async fn record_offers(
        store: &dyn ConversationStore,
        conversation: &mut Conversation,
        tool_call_id: Option<&str>,
        service_type_arg: Option<&str>,
        date_arg: Option<&str>,
        output: &CheckAvailabilityResult,
    ) -> Result<(), StoreError> {
        let slots = output.offerable_slots();

        if slots.is_empty() {
            if conversation.metadata.pending_slot_offers.take().is_some() {
                store
                    .persist_metadata(conversation.id, &conversation.metadata)
                    .await?;
            }
            return Ok(());
        }

        let now = Utc::now();
        let mut payload = PendingSlotOffers {
            source_tool_call_id: tool_call_id.map(str::to_string),
            service_type: output
                .service_type
                .clone()
                .or_else(|| service_type_arg.map(str::to_string)),
            date: output.date.clone().or_else(|| date_arg.map(str::to_string)),
            offered_at: Some(now),
            expires_at: Some(now + Duration::hours(OFFER_TTL_HOURS)),
            slots: slots
                .iter()
                .enumerate()
                .map(|(idx, slot)| slot.to_offered(idx + 1))
                .collect(),
            ..Default::default()
        };

        let mut preserved_selection = false;
        if let Some(existing) = &conversation.metadata.pending_slot_offers {
            let mut matched: Option<(usize, OfferedSlot)> = None;

            if let Some(selected) = &existing.selected_slot {
                if !selected.start.is_empty() {
                    matched = payload
                        .slots
                        .iter()
                        .find(|slot| slot.start == selected.start)
                        .map(|slot| (slot.index, slot.clone()));
                }
            }

            if matched.is_none() {
                if let Some(index) = existing.selected_option_index {
                    if index >= 1 && index <= payload.slots.len() {
                        matched = Some((index, payload.slots[index - 1].clone()));
                    }
                }
            }

            match matched {
                Some((index, slot)) => {
                    payload.selected_option_index = Some(index);
                    payload.selected_slot = Some(slot);
                    payload.selected_by_message_id = existing.selected_by_message_id;
                    payload.selected_content_preview = existing.selected_content_preview.clone();
                    payload.selected_at = existing.selected_at;
                    preserved_selection = true;
                }
                None if existing.has_selection() => {
                    info!(
                        "Clearing stale slot selection for conversation_id={} after refreshed availability",
                        conversation.id
                    );
                }
                None => {}
            }
        }

        let slot_times: Vec<&str> = payload
            .slots
            .iter()
            .take(3)
            .map(|s| s.start_time.as_str())
            .collect();

        if preserved_selection {
            info!(
                "Re-checked availability and preserved user selection: conversation_id={}, selected_option={:?}, new_slots={:?}",
                conversation.id, payload.selected_option_index, slot_times
            );
        } else {
            info!(
                "Stored {} slot offers for conversation_id={}, date={:?}, slots={:?}",
                payload.slots.len(),
                conversation.id,
                payload.date,
                slot_times
            );
        }

        conversation.metadata.pending_slot_offers = Some(payload);
        store
            .persist_metadata(conversation.id, &conversation.metadata)
            .await
    }

    pub async fn clear_offers(
        store: &dyn ConversationStore,
        conversation: &mut Conversation,
    ) -> Result<(), StoreError> {
        if conversation.metadata.pending_slot_offers.take().is_some() {
            store
                .persist_metadata(conversation.id, &conversation.metadata)
                .await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Access helpers
    // ------------------------------------------------------------------

    /// Current offers, deleting them on read when expired.
    pub async fn pending_offers(
        store: &dyn ConversationStore,
        conversation: &mut Conversation,
        enforce_expiry: bool,
    ) -> Result<Option<PendingSlotOffers>, StoreError> {
        let Some(pending) = conversation.metadata.pending_slot_offers.clone() else {
            return Ok(None);
        };

        if enforce_expiry && pending.is_expired(Utc::now()) {
            conversation.metadata.pending_slot_offers = None;
            store
                .persist_metadata(conversation.id, &conversation.metadata)
                .await?;
            return Ok(None);
        }

        Ok(Some(pending))
    }

    /// Slot projection included in mismatch payloads, regardless of expiry.
    pub fn pending_slot_summary(conversation: &Conversation) -> Vec<OfferedSlot> {
        conversation
            .metadata
            .pending_slot_offers
            .as_ref()
            .map(|pending| pending.slots.clone())
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Selection capture
    // ------------------------------------------------------------------

    /// Try to read a slot choice out of an inbound message. Returns whether
    /// a selection was captured; metadata is only mutated on success.
    pub async fn capture_selection(
        store: &dyn ConversationStore,
        conversation: &mut Conversation,
        message: &Message,
    ) -> Result<bool, StoreError> {
        let Some(pending) = Self::pending_offers(store, conversation, true).await? else {
            return Ok(false);
        };
        if pending.slots.is_empty() {
            return Ok(false);
        }

        let content = message.content.trim();
        if content.is_empty() {
            return Ok(false);
        }

        let Some(choice_index) = Self::extract_choice(content, &pending.slots) else {
            return Ok(false);
        };
        if choice_index < 1 || choice_index > pending.slots.len() {
            return Ok(false);
        }

        let Some(pending) = conversation.metadata.pending_slot_offers.as_mut() else {
            return Ok(false);
        };
        pending.selected_option_index = Some(choice_index);
        pending.selected_slot = Some(pending.slots[choice_index - 1].clone());
        pending.selected_by_message_id = Some(message.id);
        pending.selected_content_preview =
            Some(content.chars().take(SELECTION_PREVIEW_CHARS).collect());
        pending.selected_at = Some(Utc::now());

        info!(
            "Captured slot selection: conversation_id={}, choice={}, slot={}",
            conversation.id,
            choice_index,
            pending.slots[choice_index - 1].start_time
        );

        store
            .persist_metadata(conversation.id, &conversation.metadata)
            .await?;
        Ok(true)
    }

    /// Extraction order: standalone option number, then start-time label,
    /// then ISO start substring. Clock expressions ("3 pm", "3:00") never
    /// count as option numbers.
    pub fn extract_choice(message_text: &str, slots: &[OfferedSlot]) -> Option<usize> {
        let normalized = message_text.trim().to_lowercase();
        if normalized.is_empty() {
            return None;
        }

        for found in choice_regex().find_iter(&normalized) {
            let choice_idx: usize = match found.as_str().parse() {
                Ok(n) => n,
                Err(_) => continue,
            };

            let prev_char = normalized[..found.start()].chars().last();
            let next_char = normalized[found.end()..].chars().next();
            let remainder = normalized[found.end()..].trim_start();

            let looks_like_time = prev_char == Some(':')
                || next_char == Some(':')
                || ["am", "pm", "a.m", "p.m"]
                    .iter()
                    .any(|suffix| remainder.starts_with(suffix));
            if looks_like_time {
                continue;
            }

            if choice_idx >= 1 && choice_idx <= slots.len() {
                return Some(choice_idx);
            }
        }

        let condensed_text = normalized.replace(' ', "");
        for slot in slots {
            let label = slot.start_time.trim().to_lowercase();
            if label.is_empty() {
                continue;
            }
            let label_condensed = label.replace(' ', "");
            if normalized.contains(&label) || condensed_text.contains(&label_condensed) {
                return Some(slot.index);
            }
        }

        for slot in slots {
            if !slot.start.is_empty() && normalized.contains(&slot.start.to_lowercase()) {
                return Some(slot.index);
            }
        }

        None
    }

    // ------------------------------------------------------------------
    // Enforcement
    // ------------------------------------------------------------------

    /// Timezone-aware equality on the naive wall time; exact string match
    /// when either side fails to parse.
    pub fn slot_matches_request(slot: &OfferedSlot, requested_iso: &str) -> bool {
        if slot.start.is_empty() || requested_iso.is_empty() {
            return false;
        }
        match (naive_wall_time(&slot.start), naive_wall_time(requested_iso)) {
            (Ok(slot_dt), Ok(requested_dt)) => slot_dt == requested_dt,
            _ => slot.start == requested_iso,
        }
    }

    /// Validate and normalize `book_appointment` arguments against the
    /// pending offers, immediately before execution.
    ///
    /// A captured user selection always wins over the timestamp the model
    /// supplied; the overwrite is reported in the returned adjustments. When
    /// only the requested time matches, that slot is adopted as the
    /// selection and written back to metadata.
    pub async fn enforce_booking(
        store: &dyn ConversationStore,
        conversation: &mut Conversation,
        arguments: &mut serde_json::Map<String, serde_json::Value>,
    ) -> Result<Adjustments, BookingError> {
        let requested_start = arguments
            .get("start_time")
            .or_else(|| arguments.get("start"))
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let Some(mut pending) = Self::pending_offers(store, conversation, true).await? else {
            warn!(
                "Booking attempt without pending slot offers. conversation_id={}, requested_start={:?}. \
                 The model may have stated availability without calling check_availability.",
                conversation.id, requested_start
            );
            return Err(BookingError::SlotSelectionMismatch(
                "You must call check_availability first to verify the requested time is available, \
                 then let the guest choose from the returned slots before booking."
                    .to_string(),
            ));
        };

        if pending.slots.is_empty() {
            return Err(BookingError::SlotSelectionMismatch(
                "No stored slot offers to validate against.".to_string(),
            ));
        }

        let mut selected_slot: Option<OfferedSlot> = None;

        if let Some(choice_index) = pending.selected_option_index {
            if choice_index >= 1 && choice_index <= pending.slots.len() {
                let candidate = pending.slots[choice_index - 1].clone();

                // The guest's explicit selection always takes precedence,
                // even when the model passes a different time.
                if let Some(requested) = &requested_start {
                    if !Self::slot_matches_request(&candidate, requested) {
                        info!(
                            "Numbered selection takes precedence for conversation_id={}: choice_index={} is {}, model requested {}. Using selection.",
                            conversation.id, choice_index, candidate.start_time, requested
                        );
                    }
                }
                selected_slot = Some(candidate);
            }
        }

        if selected_slot.is_none() {
            if let Some(requested) = &requested_start {
                for slot in &pending.slots {
                    if Self::slot_matches_request(slot, requested) {
                        pending.selected_option_index = Some(slot.index);
                        pending.selected_slot = Some(slot.clone());
                        if pending.selected_at.is_none() {
                            pending.selected_at = Some(Utc::now());
                        }
                        info!(
                            "Slot selection via time match: conversation_id={}, requested={}, matched_slot={}",
                            conversation.id, requested, slot.start_time
                        );
                        selected_slot = Some(slot.clone());
                        break;
                    }
                }
            }
        }

        let Some(slot) = selected_slot else {
            let offered_times: Vec<&str> = pending
                .slots
                .iter()
                .take(3)
                .map(|s| s.start_time.as_str())
                .collect();
            warn!(
                "Slot selection mismatch: conversation_id={}, requested={:?}, offered_slots={:?}",
                conversation.id, requested_start, offered_times
            );
            return Err(BookingError::SlotSelectionMismatch(format!(
                "Requested start time is not one of the offered slots ({}). \
                 Ask the guest to choose from the options before booking.",
                offered_times.join(", ")
            )));
        };

        if slot.start.is_empty() {
            return Err(BookingError::SlotSelectionMismatch(
                "Selected slot is missing a start timestamp.".to_string(),
            ));
        }
        let slot_iso = slot.start.clone();

        arguments.insert("start_time".to_string(), slot_iso.clone().into());
        arguments.insert("start".to_string(), slot_iso.clone().into());

        let missing_service = arguments
            .get("service_type")
            .and_then(|v| v.as_str())
            .map(str::is_empty)
            .unwrap_or(true);
        if missing_service {
            if let Some(service_type) = &pending.service_type {
                arguments.insert("service_type".to_string(), service_type.clone().into());
            }
        }
        let missing_date = arguments
            .get("date")
            .and_then(|v| v.as_str())
            .map(str::is_empty)
            .unwrap_or(true);
        if missing_date {
            if let Some(date) = &pending.date {
                arguments.insert("date".to_string(), date.clone().into());
            }
        }

        let mut adjustments = Adjustments::new();
        if let Some(original) = requested_start {
            if original != slot_iso {
                adjustments.insert(
                    "start_time".to_string(),
                    FieldAdjustment {
                        original,
                        normalized: slot_iso,
                    },
                );
            }
        }

        conversation.metadata.pending_slot_offers = Some(pending);
        store
            .persist_metadata(conversation.id, &conversation.metadata)
            .await
            .map_err(BookingError::Store)?;

        Ok(adjustments)
    }
}
