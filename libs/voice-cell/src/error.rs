use thiserror::Error;

use booking_cell::BookingError;
use conversation_cell::StoreError;
use llm_cell::LlmError;

#[derive(Error, Debug)]
pub enum VoiceSessionError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Booking(#[from] BookingError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("Voice transport error: {0}")]
    Transport(String),
}
