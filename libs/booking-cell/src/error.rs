use thiserror::Error;

use conversation_cell::StoreError;

use crate::calendar::CalendarError;

#[derive(Error, Debug)]
pub enum BookingError {
    /// The requested booking does not line up with any offered slot. This is
    /// an expected outcome, returned to the model as a structured tool
    /// result rather than surfaced as a transport error.
    #[error("{0}")]
    SlotSelectionMismatch(String),

    #[error("Calendar unavailable: {0}")]
    CalendarUnavailable(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<CalendarError> for BookingError {
    fn from(err: CalendarError) -> Self {
        match err {
            CalendarError::InvalidInput(msg) => BookingError::InvalidInput(msg),
            CalendarError::Unavailable(msg) => BookingError::CalendarUnavailable(msg),
        }
    }
}
