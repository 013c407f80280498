use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use crate::models::Slot;

#[derive(Error, Debug)]
pub enum CalendarError {
    /// Provider is unreachable or answered outside its contract. Transient;
    /// the turn does not retry it.
    #[error("calendar unavailable: {0}")]
    Unavailable(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

#[derive(Debug, Clone)]
pub struct CreateEventRequest {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub summary: String,
    pub customer_name: String,
    pub customer_phone: String,
    pub customer_email: Option<String>,
    pub service_name: String,
    pub provider: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EventDetails {
    pub id: String,
    pub summary: String,
    pub description: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub status: String,
}

/// Abstract interface to the calendar of record.
///
/// `create_event` may legitimately return `Ok(None)` when the provider
/// accepted the write but lost the response; callers recover through
/// `find_event` within a ±1 minute window.
#[async_trait]
pub trait CalendarPort: Send + Sync {
    /// Free slots for one day and service, in natural clock order. The scan
    /// walks business hours, advancing 30 minutes on free steps and jumping
    /// to the end of a busy interval on collision.
    async fn available_slots(
        &self,
        date: NaiveDate,
        service_type: &str,
    ) -> Result<Vec<Slot>, CalendarError>;

    async fn create_event(
        &self,
        request: &CreateEventRequest,
    ) -> Result<Option<String>, CalendarError>;

    /// Best-effort lookup of an event with the given summary starting within
    /// one minute of `start`.
    async fn find_event(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        summary: &str,
    ) -> Result<Option<String>, CalendarError>;

    async fn update_event(
        &self,
        event_id: &str,
        new_start: DateTime<Utc>,
        new_end: DateTime<Utc>,
    ) -> Result<bool, CalendarError>;

    async fn delete_event(&self, event_id: &str) -> Result<bool, CalendarError>;

    async fn get_event(&self, event_id: &str) -> Result<Option<EventDetails>, CalendarError>;
}
