//! Pure tool handlers over the calendar port and the services catalog.
//!
//! These functions never touch conversation state; offer persistence and
//! enforcement are the orchestrator's job.

use chrono::{Duration, NaiveDate};
use tracing::{error, info, warn};

use shared_config::ServicesCatalog;
use shared_utils::parse_iso_datetime;

use crate::calendar::{CalendarError, CalendarPort, CreateEventRequest};
use crate::models::{BookingResult, CancelResult, CheckAvailabilityResult, RescheduleResult};

const DEFAULT_SLOT_LIMIT: usize = 10;

/// Arguments for a `book_appointment` execution, already normalized by the
/// slot-selection engine.
#[derive(Debug, Clone)]
pub struct BookingParams {
    pub customer_name: String,
    pub customer_phone: String,
    pub customer_email: Option<String>,
    pub start_time: String,
    pub service_type: String,
    pub provider: Option<String>,
    pub notes: Option<String>,
}

pub async fn handle_check_availability(
    calendar: &dyn CalendarPort,
    catalog: &ServicesCatalog,
    date: &str,
    service_type: &str,
    limit: Option<usize>,
) -> CheckAvailabilityResult {
    let parsed_date = match NaiveDate::parse_from_str(date, "%Y-%m-%d") {
        Ok(parsed) => parsed,
        Err(_) => {
            return CheckAvailabilityResult::failure(
                date,
                service_type,
                "Invalid date format; expected YYYY-MM-DD.",
            );
        }
    };

    if catalog.service(service_type).is_none() {
        return CheckAvailabilityResult::failure(
            date,
            service_type,
            &format!("Unknown service type: {}", service_type),
        );
    }

    let slots = match calendar.available_slots(parsed_date, service_type).await {
        Ok(slots) => slots,
        Err(CalendarError::InvalidInput(msg)) => {
            return CheckAvailabilityResult::failure(date, service_type, &msg);
        }
        Err(CalendarError::Unavailable(msg)) => {
            error!("Availability lookup failed for {} on {}: {}", service_type, date, msg);
            return CheckAvailabilityResult::failure(
                date,
                service_type,
                "The calendar is temporarily unavailable. Please try again shortly.",
            );
        }
    };

    let availability_summary = match (slots.first(), slots.last()) {
        (Some(first), Some(last)) => Some(format!(
            "We have availability from {} to {}.",
            first.start_time, last.end_time
        )),
        _ => None,
    };

    let mut suggested_slots = Vec::new();
    if let Some(first) = slots.first() {
        suggested_slots.push(first.clone());
    }
    if slots.len() > 1 {
        if let Some(last) = slots.last() {
            suggested_slots.push(last.clone());
        }
    }

    let limit = limit.unwrap_or(DEFAULT_SLOT_LIMIT);
    let available_slots: Vec<_> = slots.iter().take(limit).cloned().collect();

    info!(
        "Availability for {} on {}: {} slots ({} offered)",
        service_type,
        date,
        slots.len(),
        available_slots.len()
    );

    CheckAvailabilityResult {
        success: true,
        date: Some(date.to_string()),
        service_type: Some(service_type.to_string()),
        available_slots,
        all_slots: slots,
        availability_summary,
        suggested_slots,
        error: None,
    }
}

pub async fn handle_book_appointment(
    calendar: &dyn CalendarPort,
    catalog: &ServicesCatalog,
    params: &BookingParams,
) -> BookingResult {
    let start = match parse_iso_datetime(&params.start_time) {
        Ok(start) => start,
        Err(e) => {
            return BookingResult::failure(&format!("Invalid start time format: {}", e));
        }
    };

    let duration_minutes = catalog.duration_minutes(&params.service_type);
    let end = start + Duration::minutes(duration_minutes as i64);
    let service_name = catalog.display_name(&params.service_type);
    let summary = format!("{} - {}", service_name, params.customer_name);

    let request = CreateEventRequest {
        start,
        end,
        summary: summary.clone(),
        customer_name: params.customer_name.clone(),
        customer_phone: params.customer_phone.clone(),
        customer_email: params.customer_email.clone(),
        service_name: service_name.clone(),
        provider: params.provider.clone(),
        notes: params.notes.clone(),
    };

    let event_id = match calendar.create_event(&request).await {
        Ok(Some(event_id)) => Some(event_id),
        Ok(None) => {
            // The provider accepted the write but dropped the id; recover by
            // looking for the event we just described.
            warn!("Calendar insert returned without an event id; attempting fallback lookup");
            calendar
                .find_event(start, end, &summary)
                .await
                .unwrap_or(None)
        }
        Err(e) => {
            error!("Calendar booking error: {}", e);
            match calendar.find_event(start, end, &summary).await {
                Ok(Some(found)) => {
                    warn!("Calendar reported an error but a matching event exists; treating as success");
                    Some(found)
                }
                _ => None,
            }
        }
    };

    match event_id {
        Some(event_id) => {
            info!(
                "Booked {} for {} at {} (event {})",
                params.service_type, params.customer_name, params.start_time, event_id
            );
            BookingResult {
                success: true,
                event_id: Some(event_id),
                start_time: Some(params.start_time.clone()),
                service: Some(service_name),
                service_type: Some(params.service_type.clone()),
                provider: params.provider.clone(),
                duration_minutes: Some(duration_minutes),
                notes: params.notes.clone(),
                argument_adjustments: None,
                error: None,
            }
        }
        None => BookingResult::failure(
            "Failed to book appointment. Please try again or contact staff.",
        ),
    }
}

pub async fn handle_reschedule_appointment(
    calendar: &dyn CalendarPort,
    catalog: &ServicesCatalog,
    appointment_id: &str,
    new_start_time: &str,
    service_type: Option<&str>,
    provider: Option<&str>,
) -> RescheduleResult {
    let new_start = match parse_iso_datetime(new_start_time) {
        Ok(start) => start,
        Err(e) => {
            return RescheduleResult::failure(&format!("Invalid new start time format: {}", e));
        }
    };

    let duration_minutes = service_type
        .map(|s| catalog.duration_minutes(s))
        .unwrap_or(60);
    let new_end = new_start + Duration::minutes(duration_minutes as i64);

    match calendar.update_event(appointment_id, new_start, new_end).await {
        Ok(true) => {
            info!(
                "Rescheduled appointment {} to {}",
                appointment_id, new_start_time
            );
            RescheduleResult {
                success: true,
                appointment_id: Some(appointment_id.to_string()),
                new_start_time: Some(new_start_time.to_string()),
                service_type: service_type.map(str::to_string),
                provider: provider.map(str::to_string),
                error: None,
            }
        }
        Ok(false) => RescheduleResult::failure("Calendar reschedule failed."),
        Err(e) => {
            error!("Calendar reschedule error for {}: {}", appointment_id, e);
            RescheduleResult::failure("Calendar reschedule failed.")
        }
    }
}

pub async fn handle_cancel_appointment(
    calendar: &dyn CalendarPort,
    appointment_id: &str,
    cancellation_reason: Option<&str>,
) -> CancelResult {
    match calendar.delete_event(appointment_id).await {
        Ok(true) => {
            info!("Cancelled appointment {}", appointment_id);
            CancelResult {
                success: true,
                appointment_id: Some(appointment_id.to_string()),
                cancellation_reason: cancellation_reason.map(str::to_string),
                error: None,
            }
        }
        Ok(false) => CancelResult::failure("Calendar cancellation failed."),
        Err(e) => {
            error!("Calendar cancellation error for {}: {}", appointment_id, e);
            CancelResult::failure("Calendar cancellation failed.")
        }
    }
}
