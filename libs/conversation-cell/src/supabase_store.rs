use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_database::SupabaseClient;

use crate::error::StoreError;
use crate::metadata::ConversationMetadata;
use crate::models::{
    Appointment, Channel, CommunicationEvent, Conversation, ConversationScore, Customer,
    EmailDetails, Message, SmsDetails, VoiceDetails,
};
use crate::store::ConversationStore;

/// REST-backed store over PostgREST-style row endpoints.
pub struct SupabaseConversationStore {
    supabase: SupabaseClient,
}

impl SupabaseConversationStore {
    pub fn new(supabase: SupabaseClient) -> Self {
        Self { supabase }
    }

    fn parse_rows<T: serde::de::DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>, StoreError> {
        rows.into_iter()
        .map(|row| {
            serde_json::from_value(row)
                .map_err(|e| StoreError::Database(format!("Failed to parse row: {}", e)))
        })
        .collect()
    }

    async fn fetch_one<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Option<T>, StoreError> {
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, path, None)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(Self::parse_rows(rows)?.into_iter().next())
    }
}

#[async_trait]
impl ConversationStore for SupabaseConversationStore {
    async fn find_customer_by_phone(&self, phone: &str) -> Result<Option<Customer>, StoreError> {
        let path = format!(
            "/rest/v1/customers?phone=eq.{}",
            urlencoding::encode(phone)
        );
        self.fetch_one(&path).await
    }

    async fn get_customer(&self, id: Uuid) -> Result<Option<Customer>, StoreError> {
        self.fetch_one(&format!("/rest/v1/customers?id=eq.{}", id))
            .await
    }

    async fn create_customer(&self, customer: &Customer) -> Result<Customer, StoreError> {
        let body = serde_json::to_value(customer)
            .map_err(|e| StoreError::Database(e.to_string()))?;
        let rows = self
            .supabase
            .insert_returning("customers", body)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Self::parse_rows(rows)?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Database("customer insert returned no rows".to_string()))
    }

    async fn update_customer(&self, customer: &Customer) -> Result<(), StoreError> {
        let body = json!({
            "name": customer.name,
            "email": customer.email,
            "is_new_client": customer.is_new_client,
            "has_allergies": customer.has_allergies,
            "is_pregnant": customer.is_pregnant,
            "notes": customer.notes,
            "updated_at": Utc::now().to_rfc3339(),
        });
        let filter = format!("id=eq.{}", customer.id);
        self.supabase
            .patch_returning("customers", &filter, body)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    async fn create_conversation(
        &self,
        conversation: &Conversation,
    ) -> Result<Conversation, StoreError> {
        let body = serde_json::to_value(conversation)
            .map_err(|e| StoreError::Database(e.to_string()))?;
        let rows = self
            .supabase
            .insert_returning("conversations", body)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Self::parse_rows(rows)?
            .into_iter()
            .next()
            .ok_or_else(|| {
                StoreError::Database("conversation insert returned no rows".to_string())
            })
    }

    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>, StoreError> {
        self.fetch_one(&format!("/rest/v1/conversations?id=eq.{}", id))
            .await
    }

    async fn find_active_conversation(
        &self,
        customer_id: Uuid,
        channel: Channel,
    ) -> Result<Option<Conversation>, StoreError> {
        let path = format!(
            "/rest/v1/conversations?customer_id=eq.{}&channel=eq.{}&status=eq.active&order=last_activity_at.desc&limit=1",
            customer_id, channel
        );
        self.fetch_one(&path).await
    }

    async fn persist_metadata(
        &self,
        conversation_id: Uuid,
        metadata: &ConversationMetadata,
    ) -> Result<(), StoreError> {
        // Whole-map write: the stored JSON column is replaced, never merged.
        let body = json!({
            "metadata": serde_json::to_value(metadata)
                .map_err(|e| StoreError::Database(e.to_string()))?,
        });
        let filter = format!("id=eq.{}", conversation_id);
        let rows = self
            .supabase
            .patch_returning("conversations", &filter, body)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        if rows.is_empty() {
            return Err(StoreError::NotFound(format!(
                "conversation {}",
                conversation_id
            )));
        }
        debug!("Persisted metadata for conversation {}", conversation_id);
        Ok(())
    }

    async fn touch_last_activity(
        &self,
        conversation_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let body = json!({ "last_activity_at": at.to_rfc3339() });
        let filter = format!("id=eq.{}", conversation_id);
        self.supabase
            .patch_returning("conversations", &filter, body)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    async fn complete_conversation(&self, conversation_id: Uuid) -> Result<(), StoreError> {
        let body = json!({
            "status": "completed",
            "completed_at": Utc::now().to_rfc3339(),
        });
        // Guarded transition: only an active conversation can complete.
        let filter = format!("id=eq.{}&status=eq.active", conversation_id);
        let rows = self
            .supabase
            .patch_returning("conversations", &filter, body)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        if rows.is_empty() {
            warn!(
                "Conversation {} was not active; completion skipped",
                conversation_id
            );
        }
        Ok(())
    }

    async fn fail_conversation(&self, conversation_id: Uuid) -> Result<(), StoreError> {
        let body = json!({
            "status": "failed",
            "completed_at": Utc::now().to_rfc3339(),
        });
        let filter = format!("id=eq.{}&status=eq.active", conversation_id);
        self.supabase
            .patch_returning("conversations", &filter, body)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    async fn record_score(
        &self,
        conversation_id: Uuid,
        score: &ConversationScore,
    ) -> Result<(), StoreError> {
        let body = json!({
            "satisfaction_score": score.satisfaction_score,
            "sentiment": score.sentiment,
            "outcome": score.outcome,
            "summary": score.summary,
        });
        let filter = format!("id=eq.{}", conversation_id);
        self.supabase
            .patch_returning("conversations", &filter, body)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    async fn add_message(&self, message: &Message) -> Result<Message, StoreError> {
        if message.content.trim().is_empty() {
            return Err(StoreError::InvalidInput(
                "message content must be non-empty".to_string(),
            ));
        }
        let body = serde_json::to_value(message)
            .map_err(|e| StoreError::Database(e.to_string()))?;
        let rows = self
            .supabase
            .insert_returning("communication_messages", body)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        let created: Message = Self::parse_rows(rows)?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Database("message insert returned no rows".to_string()))?;

        self.touch_last_activity(message.conversation_id, message.sent_at)
            .await?;
        Ok(created)
    }

    async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>, StoreError> {
        // sent_at then id keeps ties in insertion order (ids are assigned
        // monotonically enough for a single conversation's writes).
        let path = format!(
            "/rest/v1/communication_messages?conversation_id=eq.{}&order=sent_at.asc,id.asc",
            conversation_id
        );
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, None)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Self::parse_rows(rows)
    }

    async fn set_message_processed(&self, message_id: Uuid) -> Result<(), StoreError> {
        let body = json!({ "processed": true });
        let filter = format!("id=eq.{}", message_id);
        self.supabase
            .patch_returning("communication_messages", &filter, body)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    async fn add_event(&self, event: &CommunicationEvent) -> Result<(), StoreError> {
        let body = serde_json::to_value(event)
            .map_err(|e| StoreError::Database(e.to_string()))?;
        self.supabase
            .insert_returning("communication_events", body)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    async fn add_voice_details(&self, details: &VoiceDetails) -> Result<(), StoreError> {
        let body = serde_json::to_value(details)
            .map_err(|e| StoreError::Database(e.to_string()))?;
        self.supabase
            .insert_returning("voice_call_details", body)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    async fn add_sms_details(&self, details: &SmsDetails) -> Result<(), StoreError> {
        let body = serde_json::to_value(details)
            .map_err(|e| StoreError::Database(e.to_string()))?;
        self.supabase
            .insert_returning("sms_details", body)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    async fn add_email_details(&self, details: &EmailDetails) -> Result<(), StoreError> {
        let body = serde_json::to_value(details)
            .map_err(|e| StoreError::Database(e.to_string()))?;
        self.supabase
            .insert_returning("email_details", body)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    async fn find_appointment_by_event(
        &self,
        calendar_event_id: &str,
    ) -> Result<Option<Appointment>, StoreError> {
        let path = format!(
            "/rest/v1/appointments?calendar_event_id=eq.{}",
            urlencoding::encode(calendar_event_id)
        );
        self.fetch_one(&path).await
    }

    async fn upsert_appointment(&self, appointment: &Appointment) -> Result<(), StoreError> {
        match self
            .find_appointment_by_event(&appointment.calendar_event_id)
            .await?
        {
            Some(existing) => {
                let body = json!({
                    "appointment_datetime": appointment.appointment_datetime.to_rfc3339(),
                    "service_type": appointment.service_type,
                    "provider": appointment.provider,
                    "duration_minutes": appointment.duration_minutes,
                    "status": appointment.status,
                    "special_requests": appointment.special_requests,
                    "cancellation_reason": appointment.cancellation_reason,
                    "cancelled_at": appointment.cancelled_at.map(|t| t.to_rfc3339()),
                    "updated_at": Utc::now().to_rfc3339(),
                });
                let filter = format!("id=eq.{}", existing.id);
                self.supabase
                    .patch_returning("appointments", &filter, body)
                    .await
                    .map_err(|e| StoreError::Database(e.to_string()))?;
            }
            None => {
                let body = serde_json::to_value(appointment)
                    .map_err(|e| StoreError::Database(e.to_string()))?;
                self.supabase
                    .insert_returning("appointments", body)
                    .await
                    .map_err(|e| StoreError::Database(e.to_string()))?;
            }
        }
        Ok(())
    }
}
