use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::metadata::ConversationMetadata;
use crate::models::{
    Appointment, Channel, CommunicationEvent, Conversation, ConversationScore, Customer,
    EmailDetails, Message, SmsDetails, VoiceDetails,
};

/// Persistence seam for the conversation domain.
///
/// Implementations must keep two contracts the booking core depends on:
/// message ordering (by `sent_at`, insertion order breaking ties) and
/// whole-map metadata writes. Callers serialize access per conversation via
/// `ConversationLocks`; the store itself is free of cross-row transactions.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    // Customers -----------------------------------------------------------

    async fn find_customer_by_phone(&self, phone: &str) -> Result<Option<Customer>, StoreError>;

    async fn get_customer(&self, id: Uuid) -> Result<Option<Customer>, StoreError>;

    async fn create_customer(&self, customer: &Customer) -> Result<Customer, StoreError>;

    async fn update_customer(&self, customer: &Customer) -> Result<(), StoreError>;

    // Conversations -------------------------------------------------------

    async fn create_conversation(
        &self,
        conversation: &Conversation,
    ) -> Result<Conversation, StoreError>;

    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>, StoreError>;

    async fn find_active_conversation(
        &self,
        customer_id: Uuid,
        channel: Channel,
    ) -> Result<Option<Conversation>, StoreError>;

    /// Replace the conversation's metadata map with the given value.
    ///
    /// This is the single write path for metadata; partial in-place updates
    /// are not offered on purpose.
    async fn persist_metadata(
        &self,
        conversation_id: Uuid,
        metadata: &ConversationMetadata,
    ) -> Result<(), StoreError>;

    async fn touch_last_activity(
        &self,
        conversation_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// active -> completed. No-op when the conversation already left active.
    async fn complete_conversation(&self, conversation_id: Uuid) -> Result<(), StoreError>;

    /// active -> failed. No-op when the conversation already left active.
    async fn fail_conversation(&self, conversation_id: Uuid) -> Result<(), StoreError>;

    async fn record_score(
        &self,
        conversation_id: Uuid,
        score: &ConversationScore,
    ) -> Result<(), StoreError>;

    // Messages ------------------------------------------------------------

    async fn add_message(&self, message: &Message) -> Result<Message, StoreError>;

    async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>, StoreError>;

    async fn set_message_processed(&self, message_id: Uuid) -> Result<(), StoreError>;

    // Analytics events -----------------------------------------------------

    async fn add_event(&self, event: &CommunicationEvent) -> Result<(), StoreError>;

    // Channel details ------------------------------------------------------

    async fn add_voice_details(&self, details: &VoiceDetails) -> Result<(), StoreError>;

    async fn add_sms_details(&self, details: &SmsDetails) -> Result<(), StoreError>;

    async fn add_email_details(&self, details: &EmailDetails) -> Result<(), StoreError>;

    // Appointments ---------------------------------------------------------

    async fn find_appointment_by_event(
        &self,
        calendar_event_id: &str,
    ) -> Result<Option<Appointment>, StoreError>;

    /// Insert or update the row keyed by `calendar_event_id`.
    async fn upsert_appointment(&self, appointment: &Appointment) -> Result<(), StoreError>;
}
