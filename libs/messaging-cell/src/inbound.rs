//! Inbound webhook service: customer resolution, conversation threading,
//! selection capture, one turn, and outbound delivery.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use booking_cell::SlotSelectionEngine;
use conversation_cell::{
    synthesize_phone_from_email, Channel, Conversation, ConversationLocks, ConversationStore,
    Customer, EmailDetails, Message, SmsDetails,
};
use shared_config::AppConfig;

use crate::error::MessagingError;
use crate::outbound::OutboundMessenger;
use crate::turn::TurnOrchestrator;

#[derive(Debug, Clone, Deserialize)]
pub struct InboundSmsRequest {
    pub from: String,
    pub to: String,
    pub body: String,
    pub provider_message_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InboundEmailRequest {
    pub from: String,
    pub to: String,
    pub subject: Option<String>,
    pub body_text: String,
    pub body_html: Option<String>,
}

pub struct InboundMessagingService {
    store: Arc<dyn ConversationStore>,
    turn: Arc<TurnOrchestrator>,
    messenger: Arc<dyn OutboundMessenger>,
    locks: ConversationLocks,
    config: Arc<AppConfig>,
}

impl InboundMessagingService {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        turn: Arc<TurnOrchestrator>,
        messenger: Arc<dyn OutboundMessenger>,
        locks: ConversationLocks,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            store,
            turn,
            messenger,
            locks,
            config,
        }
    }

    /// Resolve the sender, thread the message into an active SMS
    /// conversation, run one turn, and return the reply text for the
    /// webhook response.
    pub async fn handle_inbound_sms(
        &self,
        request: InboundSmsRequest,
    ) -> Result<String, MessagingError> {
        if request.body.trim().is_empty() {
            return Err(MessagingError::InvalidRequest(
                "sms body must be non-empty".to_string(),
            ));
        }

        let customer = self
            .find_or_create_customer(None, Some(&request.from), None)
            .await?;
        let mut conversation = self
            .find_or_create_conversation(&customer, Channel::Sms, None)
            .await?;

        let _guard = self.locks.acquire(conversation.id).await;
        // Re-read under the guard so this turn observes committed state.
        if let Some(latest) = self.store.get_conversation(conversation.id).await? {
            conversation = latest;
        }

        let mut inbound = Message::inbound(conversation.id, &request.body);
        inbound.metadata.insert("from".to_string(), json!(request.from));
        inbound.metadata.insert("to".to_string(), json!(request.to));
        let inbound = self.store.add_message(&inbound).await?;
        self.store
            .add_sms_details(&SmsDetails {
                message_id: inbound.id,
                from_number: request.from.clone(),
                to_number: request.to.clone(),
                provider_message_id: request.provider_message_id.clone(),
                delivery_status: Some("received".to_string()),
                segments: 1,
            })
            .await?;

        self.collect_contact_details(&mut conversation, &customer)
            .await?;
        SlotSelectionEngine::capture_selection(self.store.as_ref(), &mut conversation, &inbound)
            .await?;

        let (text, outbound) = match self.turn.run_turn(&mut conversation, Some(&customer)).await {
            Ok(reply) => reply,
            Err(e) => {
                self.store.fail_conversation(conversation.id).await?;
                return Err(e);
            }
        };
        self.store.set_message_processed(inbound.id).await?;

        let provider_message_id = match self.messenger.send_sms(&request.from, &text).await {
            Ok(id) => Some(id),
            Err(e) => {
                // The webhook response still carries the reply text.
                warn!("Outbound SMS delivery failed: {}", e);
                None
            }
        };
        self.store
            .add_sms_details(&SmsDetails {
                message_id: outbound.id,
                from_number: self.config.twilio_phone_number.clone(),
                to_number: request.from.clone(),
                provider_message_id: provider_message_id.unwrap_or_default(),
                delivery_status: Some("sent".to_string()),
                segments: 1,
            })
            .await?;

        info!(
            "Handled inbound SMS for conversation {} ({} chars replied)",
            conversation.id,
            text.len()
        );
        Ok(text)
    }

    /// Email analogue, keyed by the synthesized-phone rule when the sender
    /// is only known by address.
    pub async fn handle_inbound_email(
        &self,
        request: InboundEmailRequest,
    ) -> Result<String, MessagingError> {
        if request.body_text.trim().is_empty() {
            return Err(MessagingError::InvalidRequest(
                "email body must be non-empty".to_string(),
            ));
        }

        let customer = self
            .find_or_create_customer(None, None, Some(&request.from))
            .await?;
        let subject = request
            .subject
            .clone()
            .unwrap_or_else(|| format!("Message from {}", self.config.spa_name));
        let mut conversation = self
            .find_or_create_conversation(&customer, Channel::Email, Some(&subject))
            .await?;

        let _guard = self.locks.acquire(conversation.id).await;
        if let Some(latest) = self.store.get_conversation(conversation.id).await? {
            conversation = latest;
        }

        let mut inbound = Message::inbound(conversation.id, &request.body_text);
        inbound.metadata.insert("from".to_string(), json!(request.from));
        inbound.metadata.insert("subject".to_string(), json!(subject));
        let inbound = self.store.add_message(&inbound).await?;
        self.store
            .add_email_details(&EmailDetails {
                message_id: inbound.id,
                subject: subject.clone(),
                from_address: request.from.clone(),
                to_address: request.to.clone(),
                body_text: request.body_text.clone(),
                body_html: request.body_html.clone(),
                attachments: Vec::new(),
            })
            .await?;

        self.collect_contact_details(&mut conversation, &customer)
            .await?;
        SlotSelectionEngine::capture_selection(self.store.as_ref(), &mut conversation, &inbound)
            .await?;

        let (text, outbound) = match self.turn.run_turn(&mut conversation, Some(&customer)).await {
            Ok(reply) => reply,
            Err(e) => {
                self.store.fail_conversation(conversation.id).await?;
                return Err(e);
            }
        };
        self.store.set_message_processed(inbound.id).await?;

        let reply_subject = if subject.to_lowercase().starts_with("re:") {
            subject.clone()
        } else {
            format!("Re: {}", subject)
        };
        if let Err(e) = self
            .messenger
            .send_email(&request.from, &reply_subject, &text)
            .await
        {
            warn!("Outbound email delivery failed: {}", e);
        }
        self.store
            .add_email_details(&EmailDetails {
                message_id: outbound.id,
                subject: reply_subject,
                from_address: self.config.spa_email.clone(),
                to_address: request.from.clone(),
                body_text: text.clone(),
                body_html: None,
                attachments: Vec::new(),
            })
            .await?;

        info!("Handled inbound email for conversation {}", conversation.id);
        Ok(text)
    }

    /// Phone is the unique customer key; email-only contacts get the
    /// deterministic synthesized placeholder, which never matches a real
    /// number.
    async fn find_or_create_customer(
        &self,
        name: Option<&str>,
        phone: Option<&str>,
        email: Option<&str>,
    ) -> Result<Customer, MessagingError> {
        let phone_value = match (phone, email) {
            (Some(phone), _) if !phone.trim().is_empty() => phone.trim().to_string(),
            (_, Some(email)) if !email.trim().is_empty() => synthesize_phone_from_email(email),
            _ => {
                return Err(MessagingError::InvalidRequest(
                    "customer phone or email is required".to_string(),
                ))
            }
        };

        if let Some(mut existing) = self.store.find_customer_by_phone(&phone_value).await? {
            let mut updated = false;
            if let Some(email) = email {
                if existing.email.as_deref() != Some(email) {
                    existing.email = Some(email.to_string());
                    updated = true;
                }
            }
            if let Some(name) = name {
                if !name.is_empty() && existing.name != name {
                    existing.name = name.to_string();
                    updated = true;
                }
            }
            if updated {
                self.store.update_customer(&existing).await?;
            }
            return Ok(existing);
        }

        let customer = Customer::new(name.unwrap_or("Unknown"), &phone_value, email);
        Ok(self.store.create_customer(&customer).await?)
    }

    async fn find_or_create_conversation(
        &self,
        customer: &Customer,
        channel: Channel,
        subject: Option<&str>,
    ) -> Result<Conversation, MessagingError> {
        if let Some(existing) = self
            .store
            .find_active_conversation(customer.id, channel)
            .await?
        {
            return Ok(existing);
        }

        let mut conversation = Conversation::new(Some(customer.id), channel);
        conversation.subject = subject.map(str::to_string);
        Ok(self.store.create_conversation(&conversation).await?)
    }

    /// Keep contact details in metadata current so the deterministic
    /// booking path can complete without another round trip.
    async fn collect_contact_details(
        &self,
        conversation: &mut Conversation,
        customer: &Customer,
    ) -> Result<(), MessagingError> {
        let mut changed = false;
        if customer.name != "Unknown"
            && conversation.metadata.customer_name.as_deref() != Some(customer.name.as_str())
        {
            conversation.metadata.customer_name = Some(customer.name.clone());
            changed = true;
        }
        if conversation.metadata.customer_phone.as_deref() != Some(customer.phone.as_str()) {
            conversation.metadata.customer_phone = Some(customer.phone.clone());
            changed = true;
        }
        if let Some(email) = &customer.email {
            if conversation.metadata.customer_email.as_deref() != Some(email.as_str()) {
                conversation.metadata.customer_email = Some(email.clone());
                changed = true;
            }
        }
        if changed {
            self.store
                .persist_metadata(conversation.id, &conversation.metadata)
                .await?;
        }
        Ok(())
    }
}
