//! Typed facade over the booking tools, shared by every channel.
//!
//! `check_availability` keeps the offer ledger current; `book_appointment`
//! runs enforcement first and converts a mismatch into a structured result
//! the model can recover from.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{info, warn};

use conversation_cell::{
    Appointment, AppointmentStatus, BookedBy, CommunicationEvent, Conversation,
    ConversationStore, Customer, LastAppointment,
};
use shared_config::ServicesCatalog;
use shared_utils::parse_iso_datetime;

use crate::calendar::CalendarPort;
use crate::error::BookingError;
use crate::models::{BookingOutcome, CancelResult, CheckAvailabilityResult, RescheduleResult};
use crate::slot_selection::SlotSelectionEngine;
use crate::tools::{
    handle_book_appointment, handle_cancel_appointment, handle_check_availability,
    handle_reschedule_appointment, BookingParams,
};

pub struct BookingOrchestrator {
    calendar: Arc<dyn CalendarPort>,
    store: Arc<dyn ConversationStore>,
    catalog: ServicesCatalog,
}

impl BookingOrchestrator {
    pub fn new(
        calendar: Arc<dyn CalendarPort>,
        store: Arc<dyn ConversationStore>,
        catalog: ServicesCatalog,
    ) -> Self {
        Self {
            calendar,
            store,
            catalog,
        }
    }

    pub fn catalog(&self) -> &ServicesCatalog {
        &self.catalog
    }

    // Availability ---------------------------------------------------------

    /// Fetch availability and register slot offers for later enforcement.
    pub async fn check_availability(
        &self,
        conversation: &mut Conversation,
        date: &str,
        service_type: &str,
        limit: Option<usize>,
        tool_call_id: Option<&str>,
    ) -> Result<CheckAvailabilityResult, BookingError> {
        let result = handle_check_availability(
            self.calendar.as_ref(),
            &self.catalog,
            date,
            service_type,
            limit,
        )
        .await;

        if result.success {
            SlotSelectionEngine::record_offers(
                self.store.as_ref(),
                conversation,
                tool_call_id,
                Some(service_type),
                Some(date),
                &result,
            )
            .await?;
        } else {
            SlotSelectionEngine::clear_offers(self.store.as_ref(), conversation).await?;
            if let Some(error) = &result.error {
                if error.contains("unavailable") {
                    self.emit_calendar_error(conversation, "check_availability", error)
                        .await;
                }
            }
        }

        Ok(result)
    }

    async fn emit_calendar_error(&self, conversation: &Conversation, tool: &str, error: &str) {
        let event = CommunicationEvent::new(
            conversation.id,
            "calendar_error",
            json!({ "tool": tool, "error": error }),
        );
        if let Err(e) = self.store.add_event(&event).await {
            warn!("Failed to record calendar_error event: {}", e);
        }
    }

    // Booking --------------------------------------------------------------

    /// Book against previously offered slots.
    ///
    /// Contact details are resolved from the arguments, then the linked
    /// customer, then details collected across turns in metadata.
    pub async fn book_appointment(
        &self,
        conversation: &mut Conversation,
        customer: Option<&Customer>,
        arguments: Value,
    ) -> Result<BookingOutcome, BookingError> {
        let mut args = arguments.as_object().cloned().unwrap_or_default();

        let adjustments =
            match SlotSelectionEngine::enforce_booking(self.store.as_ref(), conversation, &mut args)
                .await
            {
                Ok(adjustments) => adjustments,
                Err(BookingError::SlotSelectionMismatch(message)) => {
                    return Ok(BookingOutcome::Mismatch {
                        error: message,
                        pending_slot_options: SlotSelectionEngine::pending_slot_summary(
                            conversation,
                        ),
                    });
                }
                Err(other) => return Err(other),
            };

        let arg_str = |key: &str| -> Option<String> {
            args.get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let metadata = &conversation.metadata;
        let customer_name = arg_str("customer_name")
            .or_else(|| customer.map(|c| c.name.clone()))
            .or_else(|| metadata.customer_name.clone());
        let customer_phone = arg_str("customer_phone")
            .or_else(|| customer.map(|c| c.phone.clone()))
            .or_else(|| metadata.customer_phone.clone());
        let customer_email = arg_str("customer_email")
            .or_else(|| customer.and_then(|c| c.email.clone()))
            .or_else(|| metadata.customer_email.clone());

        let (Some(customer_name), Some(customer_phone)) = (customer_name, customer_phone) else {
            return Ok(BookingOutcome::CalendarFailed {
                reason: "customer_name and customer_phone are required to book.".to_string(),
            });
        };

        let Some(start_time) = arg_str("start_time").or_else(|| arg_str("start")) else {
            return Ok(BookingOutcome::CalendarFailed {
                reason: "start_time is required to book.".to_string(),
            });
        };
        let Some(service_type) = arg_str("service_type") else {
            return Ok(BookingOutcome::CalendarFailed {
                reason: "service_type is required to book.".to_string(),
            });
        };

        let params = BookingParams {
            customer_name,
            customer_phone,
            customer_email,
            start_time,
            service_type,
            provider: arg_str("provider"),
            notes: arg_str("notes"),
        };

        let mut result =
            handle_book_appointment(self.calendar.as_ref(), &self.catalog, &params).await;

        if !result.success {
            let reason = result
                .error
                .unwrap_or_else(|| "Calendar booking failed".to_string());
            self.emit_calendar_error(conversation, "book_appointment", &reason)
                .await;
            return Ok(BookingOutcome::CalendarFailed { reason });
        }

        if !adjustments.is_empty() {
            result.argument_adjustments = Some(adjustments);
        }

        let event_id = result.event_id.clone().unwrap_or_default();
        self.record_booked_appointment(conversation, customer, &params, &event_id)
            .await?;

        Ok(BookingOutcome::Booked(result))
    }

    async fn record_booked_appointment(
        &self,
        conversation: &mut Conversation,
        customer: Option<&Customer>,
        params: &BookingParams,
        event_id: &str,
    ) -> Result<(), BookingError> {
        let start = parse_iso_datetime(&params.start_time)
            .map_err(|e| BookingError::InvalidInput(e.to_string()))?;

        match customer {
            Some(customer) => {
                let now = Utc::now();
                let appointment = Appointment {
                    id: shared_utils::new_id(),
                    customer_id: customer.id,
                    calendar_event_id: event_id.to_string(),
                    appointment_datetime: start,
                    service_type: params.service_type.clone(),
                    provider: params.provider.clone(),
                    duration_minutes: self.catalog.duration_minutes(&params.service_type),
                    status: AppointmentStatus::Scheduled,
                    booked_by: BookedBy::Ai,
                    special_requests: params.notes.clone(),
                    cancellation_reason: None,
                    cancelled_at: None,
                    created_at: now,
                    updated_at: now,
                };
                self.store.upsert_appointment(&appointment).await?;
            }
            None => {
                warn!(
                    "Booked event {} without a resolved customer; no appointment row written",
                    event_id
                );
            }
        }

        conversation.metadata.last_appointment = Some(LastAppointment {
            calendar_event_id: event_id.to_string(),
            service_type: Some(params.service_type.clone()),
            provider: params.provider.clone(),
            start_time: Some(params.start_time.clone()),
            status: "scheduled".to_string(),
            cancellation_reason: None,
        });
        // One booking consumes the offer: a repeat of the same call must
        // fail enforcement instead of double-booking.
        conversation.metadata.pending_slot_offers = None;
        conversation.metadata.clear_booking_intent();
        self.store
            .persist_metadata(conversation.id, &conversation.metadata)
            .await?;

        info!(
            "Recorded booking for conversation {}: event {}",
            conversation.id, event_id
        );
        Ok(())
    }

    // Reschedule / cancel --------------------------------------------------

    /// Reschedule, resolving a missing appointment id from the conversation's
    /// last appointment anchor.
    pub async fn reschedule_appointment(
        &self,
        conversation: &mut Conversation,
        appointment_id: Option<&str>,
        new_start_time: &str,
        service_type: Option<&str>,
        provider: Option<&str>,
    ) -> Result<RescheduleResult, BookingError> {
        let Some(appointment_id) = self.resolve_event_id(conversation, appointment_id) else {
            return Ok(RescheduleResult::failure(
                "Missing appointment_id for reschedule.",
            ));
        };

        let service_type = service_type.map(str::to_string).or_else(|| {
            conversation
                .metadata
                .last_appointment
                .as_ref()
                .and_then(|last| last.service_type.clone())
        });

        let result = handle_reschedule_appointment(
            self.calendar.as_ref(),
            &self.catalog,
            &appointment_id,
            new_start_time,
            service_type.as_deref(),
            provider,
        )
        .await;

        if result.success {
            if let Ok(new_start) = parse_iso_datetime(new_start_time) {
                if let Some(mut appointment) =
                    self.store.find_appointment_by_event(&appointment_id).await?
                {
                    appointment.appointment_datetime = new_start;
                    appointment.status = AppointmentStatus::Scheduled;
                    if let Some(service) = &service_type {
                        appointment.service_type = service.clone();
                    }
                    appointment.updated_at = Utc::now();
                    self.store.upsert_appointment(&appointment).await?;
                }
            }

            conversation.metadata.last_appointment = Some(LastAppointment {
                calendar_event_id: appointment_id.clone(),
                service_type,
                provider: provider.map(str::to_string),
                start_time: Some(new_start_time.to_string()),
                status: "scheduled".to_string(),
                cancellation_reason: None,
            });
            self.store
                .persist_metadata(conversation.id, &conversation.metadata)
                .await?;
        }

        Ok(result)
    }

    pub async fn cancel_appointment(
        &self,
        conversation: &mut Conversation,
        appointment_id: Option<&str>,
        cancellation_reason: Option<&str>,
    ) -> Result<CancelResult, BookingError> {
        let Some(appointment_id) = self.resolve_event_id(conversation, appointment_id) else {
            return Ok(CancelResult::failure(
                "Missing appointment_id for cancellation.",
            ));
        };

        let result = handle_cancel_appointment(
            self.calendar.as_ref(),
            &appointment_id,
            cancellation_reason,
        )
        .await;

        if result.success {
            if let Some(mut appointment) =
                self.store.find_appointment_by_event(&appointment_id).await?
            {
                appointment.status = AppointmentStatus::Cancelled;
                appointment.cancellation_reason = cancellation_reason.map(str::to_string);
                appointment.cancelled_at = Some(Utc::now());
                appointment.updated_at = Utc::now();
                self.store.upsert_appointment(&appointment).await?;
            }

            conversation.metadata.last_appointment = Some(LastAppointment {
                calendar_event_id: appointment_id.clone(),
                service_type: None,
                provider: None,
                start_time: None,
                status: "cancelled".to_string(),
                cancellation_reason: cancellation_reason.map(str::to_string),
            });
            self.store
                .persist_metadata(conversation.id, &conversation.metadata)
                .await?;
        }

        Ok(result)
    }

    fn resolve_event_id(
        &self,
        conversation: &Conversation,
        appointment_id: Option<&str>,
    ) -> Option<String> {
        appointment_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .or_else(|| {
                conversation
                    .metadata
                    .last_appointment
                    .as_ref()
                    .map(|last| last.calendar_event_id.clone())
            })
    }
}
