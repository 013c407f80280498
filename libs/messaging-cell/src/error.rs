use thiserror::Error;

use booking_cell::BookingError;
use conversation_cell::StoreError;
use llm_cell::LlmError;

#[derive(Error, Debug)]
pub enum MessagingError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Booking(#[from] BookingError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}
