//! Conversation data model and store.
//!
//! Owns the entities shared by every channel (customers, conversations,
//! messages, channel detail records, appointments) and the persistence seam
//! the rest of the system talks to. Conversation metadata is the in-flight
//! control block for booking enforcement; every mutation goes through
//! `ConversationStore::persist_metadata`, which writes the whole map.

pub mod error;
pub mod locks;
pub mod memory;
pub mod metadata;
pub mod models;
pub mod store;
pub mod supabase_store;

pub use error::StoreError;
pub use locks::ConversationLocks;
pub use memory::InMemoryConversationStore;
pub use metadata::{ConversationMetadata, LastAppointment, OfferedSlot, PendingSlotOffers};
pub use models::{
    synthesize_phone_from_email, Appointment, AppointmentStatus, BookedBy, Channel,
    CommunicationEvent, Conversation, ConversationOutcome, ConversationScore, ConversationStatus,
    Customer, Direction, EmailDetails, FunctionCallRecord, Message, Sentiment, SmsDetails,
    Speaker, TranscriptSegment, VoiceDetails,
};
pub use store::ConversationStore;
pub use supabase_store::SupabaseConversationStore;
