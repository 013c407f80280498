//! In-memory store used by tests and local development.
//!
//! Keeps the same ordering and whole-map metadata contracts as the REST
//! implementation. Insertion order is preserved so the `sent_at` tiebreak
//! matches the documented guarantee.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::metadata::ConversationMetadata;
use crate::models::{
    Appointment, Channel, CommunicationEvent, Conversation, ConversationScore,
    ConversationStatus, Customer, EmailDetails, Message, SmsDetails, VoiceDetails,
};
use crate::store::ConversationStore;

#[derive(Default)]
struct Inner {
    customers: Vec<Customer>,
    conversations: HashMap<Uuid, Conversation>,
    messages: Vec<Message>,
    events: Vec<CommunicationEvent>,
    voice_details: Vec<VoiceDetails>,
    sms_details: Vec<SmsDetails>,
    email_details: Vec<EmailDetails>,
    appointments: Vec<Appointment>,
}

pub struct InMemoryConversationStore {
    inner: RwLock<Inner>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    pub async fn appointments(&self) -> Vec<Appointment> {
        self.inner.read().await.appointments.clone()
    }

    pub async fn voice_details(&self) -> Vec<VoiceDetails> {
        self.inner.read().await.voice_details.clone()
    }

    pub async fn events(&self) -> Vec<CommunicationEvent> {
        self.inner.read().await.events.clone()
    }
}

impl Default for InMemoryConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn find_customer_by_phone(&self, phone: &str) -> Result<Option<Customer>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.customers.iter().find(|c| c.phone == phone).cloned())
    }

    async fn get_customer(&self, id: Uuid) -> Result<Option<Customer>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.customers.iter().find(|c| c.id == id).cloned())
    }

    async fn create_customer(&self, customer: &Customer) -> Result<Customer, StoreError> {
        let mut inner = self.inner.write().await;
        if inner.customers.iter().any(|c| c.phone == customer.phone) {
            return Err(StoreError::InvalidInput(format!(
                "duplicate phone: {}",
                customer.phone
            )));
        }
        inner.customers.push(customer.clone());
        Ok(customer.clone())
    }

    async fn update_customer(&self, customer: &Customer) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        match inner.customers.iter_mut().find(|c| c.id == customer.id) {
            Some(existing) => {
                *existing = customer.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("customer {}", customer.id))),
        }
    }

    async fn create_conversation(
        &self,
        conversation: &Conversation,
    ) -> Result<Conversation, StoreError> {
        let mut inner = self.inner.write().await;
        inner
            .conversations
            .insert(conversation.id, conversation.clone());
        Ok(conversation.clone())
    }

    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.conversations.get(&id).cloned())
    }

    async fn find_active_conversation(
        &self,
        customer_id: Uuid,
        channel: Channel,
    ) -> Result<Option<Conversation>, StoreError> {
        let inner = self.inner.read().await;
        let mut candidates: Vec<&Conversation> = inner
            .conversations
            .values()
            .filter(|c| {
                c.customer_id == Some(customer_id)
                    && c.channel == channel
                    && c.status == ConversationStatus::Active
            })
            .collect();
        candidates.sort_by_key(|c| std::cmp::Reverse(c.last_activity_at));
        Ok(candidates.first().map(|c| (*c).clone()))
    }

    async fn persist_metadata(
        &self,
        conversation_id: Uuid,
        metadata: &ConversationMetadata,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        match inner.conversations.get_mut(&conversation_id) {
            Some(conversation) => {
                conversation.metadata = metadata.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!(
                "conversation {}",
                conversation_id
            ))),
        }
    }

    async fn touch_last_activity(
        &self,
        conversation_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        match inner.conversations.get_mut(&conversation_id) {
            Some(conversation) => {
                conversation.last_activity_at = at;
                Ok(())
            }
            None => Err(StoreError::NotFound(format!(
                "conversation {}",
                conversation_id
            ))),
        }
    }

    async fn complete_conversation(&self, conversation_id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(conversation) = inner.conversations.get_mut(&conversation_id) {
            if conversation.status == ConversationStatus::Active {
                conversation.status = ConversationStatus::Completed;
                conversation.completed_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn fail_conversation(&self, conversation_id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(conversation) = inner.conversations.get_mut(&conversation_id) {
            if conversation.status == ConversationStatus::Active {
                conversation.status = ConversationStatus::Failed;
                conversation.completed_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn record_score(
        &self,
        conversation_id: Uuid,
        score: &ConversationScore,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        match inner.conversations.get_mut(&conversation_id) {
            Some(conversation) => {
                conversation.satisfaction_score = Some(score.satisfaction_score);
                conversation.sentiment = Some(score.sentiment);
                conversation.outcome = Some(score.outcome);
                conversation.summary = Some(score.summary.clone());
                Ok(())
            }
            None => Err(StoreError::NotFound(format!(
                "conversation {}",
                conversation_id
            ))),
        }
    }

    async fn add_message(&self, message: &Message) -> Result<Message, StoreError> {
        let mut inner = self.inner.write().await;
        if message.content.trim().is_empty() {
            return Err(StoreError::InvalidInput(
                "message content must be non-empty".to_string(),
            ));
        }
        inner.messages.push(message.clone());
        if let Some(conversation) = inner.conversations.get_mut(&message.conversation_id) {
            conversation.last_activity_at = message.sent_at;
        }
        Ok(message.clone())
    }

    async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>, StoreError> {
        let inner = self.inner.read().await;
        let mut messages: Vec<Message> = inner
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        // Stable sort keeps insertion order for equal timestamps.
        messages.sort_by_key(|m| m.sent_at);
        Ok(messages)
    }

    async fn set_message_processed(&self, message_id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        match inner.messages.iter_mut().find(|m| m.id == message_id) {
            Some(message) => {
                message.processed = true;
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("message {}", message_id))),
        }
    }

    async fn add_event(&self, event: &CommunicationEvent) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.events.push(event.clone());
        Ok(())
    }

    async fn add_voice_details(&self, details: &VoiceDetails) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.voice_details.push(details.clone());
        Ok(())
    }

    async fn add_sms_details(&self, details: &SmsDetails) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.sms_details.push(details.clone());
        Ok(())
    }

    async fn add_email_details(&self, details: &EmailDetails) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.email_details.push(details.clone());
        Ok(())
    }

    async fn find_appointment_by_event(
        &self,
        calendar_event_id: &str,
    ) -> Result<Option<Appointment>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .appointments
            .iter()
            .find(|a| a.calendar_event_id == calendar_event_id)
            .cloned())
    }

    async fn upsert_appointment(&self, appointment: &Appointment) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        match inner
            .appointments
            .iter_mut()
            .find(|a| a.calendar_event_id == appointment.calendar_event_id)
        {
            Some(existing) => *existing = appointment.clone(),
            None => inner.appointments.push(appointment.clone()),
        }
        Ok(())
    }
}
