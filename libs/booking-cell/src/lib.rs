//! Booking core: the calendar port, the slot-offer/selection/enforcement
//! engine, the four booking tool handlers, and the orchestrator facade that
//! binds them to conversation state.
//!
//! The invariant this cell exists to hold: a time is never booked unless it
//! was previously offered to the customer and selected, and a captured
//! selection always beats whatever timestamp the model passes.

pub mod calendar;
pub mod error;
pub mod google_calendar;
pub mod models;
pub mod orchestrator;
pub mod slot_selection;
pub mod tools;

pub use calendar::{CalendarError, CalendarPort, CreateEventRequest, EventDetails};
pub use error::BookingError;
pub use google_calendar::GoogleCalendarClient;
pub use models::{
    Adjustments, BookingOutcome, BookingResult, CancelResult, CheckAvailabilityResult,
    FieldAdjustment, RescheduleResult, Slot,
};
pub use orchestrator::BookingOrchestrator;
pub use slot_selection::SlotSelectionEngine;
pub use tools::{
    handle_book_appointment, handle_cancel_appointment, handle_check_availability,
    handle_reschedule_appointment, BookingParams,
};
