//! One request/response turn for the text channels.
//!
//! Sequence per inbound message: preemptive availability lookup on booking
//! intent, deterministic booking when a selection and contact details are
//! already on file, then a single model call with a bounded tool-execution
//! loop. The turn always produces an outbound message, possibly an apology.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use booking_cell::{BookingOrchestrator, BookingOutcome, SlotSelectionEngine};
use conversation_cell::{Conversation, ConversationStore, Customer, Direction, Message};
use llm_cell::{ChatCompletion, ChatMessage, ChatRequest, ToolCall};
use shared_config::AppConfig;
use shared_utils::{format_for_display, parse_iso_datetime, spa_date};

use crate::error::MessagingError;
use crate::intent;
use crate::prompts;
use crate::tool_defs::tool_definitions;

const MAX_TOOL_DEPTH: usize = 3;
const PREEMPTIVE_CALL_ID: &str = "preemptive_call";

pub struct TurnOrchestrator {
    llm: Arc<dyn ChatCompletion>,
    booking: Arc<BookingOrchestrator>,
    store: Arc<dyn ConversationStore>,
    config: Arc<AppConfig>,
}

impl TurnOrchestrator {
    pub fn new(
        llm: Arc<dyn ChatCompletion>,
        booking: Arc<BookingOrchestrator>,
        store: Arc<dyn ConversationStore>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            llm,
            booking,
            store,
            config,
        }
    }

    pub fn booking(&self) -> &BookingOrchestrator {
        &self.booking
    }

    /// Run one turn and persist the outbound assistant message.
    ///
    /// Callers must hold the conversation's serialization guard.
    pub async fn run_turn(
        &self,
        conversation: &mut Conversation,
        customer: Option<&Customer>,
    ) -> Result<(String, Message), MessagingError> {
        let channel = conversation.channel.to_string();
        let messages = self.store.list_messages(conversation.id).await?;
        let last_inbound = messages
            .iter()
            .rev()
            .find(|m| m.direction == Direction::Inbound)
            .cloned();

        // The linked customer can supply contact details when the caller
        // did not pass one in.
        let linked_customer = match (customer, conversation.customer_id) {
            (None, Some(customer_id)) => self.store.get_customer(customer_id).await?,
            _ => None,
        };
        let customer = customer.or(linked_customer.as_ref());

        let synthetic = self
            .preemptive_availability(conversation, last_inbound.as_ref())
            .await?;

        if let Some(reply) = self.deterministic_booking(conversation, customer, &channel).await? {
            return Ok(reply);
        }

        let text = self
            .model_turn(conversation, customer, &channel, &messages, synthetic)
            .await?;

        let outbound = Message::outbound(conversation.id, &text);
        let outbound = self.store.add_message(&outbound).await?;
        Ok((text, outbound))
    }

    /// Step 2: on booking intent with no fresh offers, run the availability
    /// tool up front and inject it into the model's tool history.
    async fn preemptive_availability(
        &self,
        conversation: &mut Conversation,
        last_inbound: Option<&Message>,
    ) -> Result<Option<(ToolCall, Value)>, MessagingError> {
        let Some(inbound) = last_inbound else {
            return Ok(None);
        };

        let mentioned_service = self.booking.catalog().match_service_in_text(&inbound.content);
        // A trigger verb is enough; so is naming a service together with a
        // clock phrase ("Botox tomorrow at 2pm").
        let has_intent = intent::detect_booking_intent(&inbound.content)
            || (mentioned_service.is_some() && intent::has_clock_phrase(&inbound.content));
        if !has_intent {
            return Ok(None);
        }

        let service = mentioned_service
            .or_else(|| conversation.metadata.pending_booking_service.clone());
        let Some(service) = service else {
            return Ok(None);
        };

        conversation.metadata.pending_booking_intent = Some(true);
        conversation.metadata.pending_booking_service = Some(service.clone());
        self.store
            .persist_metadata(conversation.id, &conversation.metadata)
            .await?;

        let fresh_offers =
            SlotSelectionEngine::pending_offers(self.store.as_ref(), conversation, true).await?;
        if fresh_offers.is_some() {
            return Ok(None);
        }

        let today = spa_date(Utc::now());
        let Some(date) = intent::extract_date(&inbound.content, today) else {
            return Ok(None);
        };

        info!(
            "Preemptive availability check for conversation {}: {} on {}",
            conversation.id, service, date
        );
        let result = self
            .booking
            .check_availability(conversation, &date, &service, None, Some(PREEMPTIVE_CALL_ID))
            .await?;

        let call = ToolCall {
            id: PREEMPTIVE_CALL_ID.to_string(),
            name: "check_availability".to_string(),
            arguments: json!({ "date": date, "service_type": service }),
        };
        Ok(Some((call, result.to_value())))
    }

    /// Step 3: with a captured selection and full contact details, book
    /// directly and answer from a template. The model never sees this turn,
    /// which keeps it from talking past a completed booking.
    async fn deterministic_booking(
        &self,
        conversation: &mut Conversation,
        customer: Option<&Customer>,
        channel: &str,
    ) -> Result<Option<(String, Message)>, MessagingError> {
        let Some(pending) =
            SlotSelectionEngine::pending_offers(self.store.as_ref(), conversation, true).await?
        else {
            return Ok(None);
        };
        let Some(selected) = pending.selected_slot.clone() else {
            return Ok(None);
        };

        let name = conversation
            .metadata
            .customer_name
            .clone()
            .or_else(|| customer.map(|c| c.name.clone()))
            // A placeholder name is not enough to put on a calendar event.
            .filter(|n| !n.trim().is_empty() && n.as_str() != "Unknown");
        let phone = conversation
            .metadata
            .customer_phone
            .clone()
            .or_else(|| customer.map(|c| c.phone.clone()))
            .filter(|p| !p.trim().is_empty());
        if name.is_none() || phone.is_none() {
            return Ok(None);
        }

        let args = json!({
            "service_type": pending.service_type,
            "customer_name": name,
            "customer_phone": phone,
        });

        match self
            .booking
            .book_appointment(conversation, customer, args)
            .await?
        {
            BookingOutcome::Booked(result) if result.success => {
                let start_iso = result
                    .start_time
                    .clone()
                    .unwrap_or_else(|| selected.start.clone());
                let display = parse_iso_datetime(&start_iso)
                    .map(|dt| format_for_display(dt, channel))
                    .unwrap_or(start_iso);
                let service_name = result
                    .service
                    .clone()
                    .unwrap_or_else(|| "appointment".to_string());

                let text = prompts::booking_confirmation(&service_name, &display);
                let outbound = Message::outbound(conversation.id, &text);
                let outbound = self.store.add_message(&outbound).await?;

                info!(
                    "Deterministic booking completed for conversation {} without a model call",
                    conversation.id
                );
                Ok(Some((text, outbound)))
            }
            other => {
                warn!(
                    "Deterministic booking did not complete for conversation {}: {}",
                    conversation.id,
                    other.to_tool_result()
                );
                Ok(None)
            }
        }
    }

    /// Steps 4-5: single model call plus a bounded tool loop.
    async fn model_turn(
        &self,
        conversation: &mut Conversation,
        customer: Option<&Customer>,
        channel: &str,
        messages: &[Message],
        synthetic: Option<(ToolCall, Value)>,
    ) -> Result<String, MessagingError> {
        let mut history =
            vec![ChatMessage::system(&prompts::system_prompt(channel, &self.config))];
        for message in messages {
            match message.direction {
                Direction::Inbound => history.push(ChatMessage::user(&message.content)),
                Direction::Outbound => history.push(ChatMessage::assistant(&message.content)),
            }
        }
        if let Some((call, result)) = synthetic {
            history.push(ChatMessage::assistant_tool_calls(vec![call.clone()]));
            history.push(ChatMessage::tool_result(&call.id, &result.to_string()));
        }

        let tools = tool_definitions(self.booking.catalog());
        let max_tokens = prompts::max_tokens_for_channel(channel);

        for depth in 0..MAX_TOOL_DEPTH {
            let request = ChatRequest::new(&self.config.openai_messaging_model, history.clone())
                .with_tools(tools.clone())
                .with_max_tokens(max_tokens);

            let response = match self.llm.complete(request).await {
                Ok(response) => response,
                Err(e) => {
                    error!(
                        "Model call failed for conversation {} after retries: {}",
                        conversation.id, e
                    );
                    return Ok(prompts::fallback_response(channel, &self.config));
                }
            };

            if !response.has_tool_calls() {
                let text = response.content.trim().to_string();
                if text.is_empty() {
                    return Ok(prompts::fallback_response(channel, &self.config));
                }
                return Ok(text);
            }

            history.push(ChatMessage::assistant_tool_calls(response.tool_calls.clone()));
            for call in &response.tool_calls {
                let result = self.execute_tool(conversation, customer, call).await;
                history.push(ChatMessage::tool_result(&call.id, &result.to_string()));
            }

            if depth + 1 == MAX_TOOL_DEPTH {
                warn!(
                    "Tool loop cap reached for conversation {}; surfacing fallback",
                    conversation.id
                );
            }
        }

        Ok(prompts::fallback_response(channel, &self.config))
    }

    /// Execute one model-requested tool call, in emission order.
    pub async fn execute_tool(
        &self,
        conversation: &mut Conversation,
        customer: Option<&Customer>,
        call: &ToolCall,
    ) -> Value {
        let args = &call.arguments;
        let str_arg =
            |key: &str| -> Option<&str> { args.get(key).and_then(Value::as_str).filter(|s| !s.is_empty()) };

        match call.name.as_str() {
            "check_availability" => {
                let date = str_arg("date").unwrap_or_default().to_string();
                let service_type = str_arg("service_type").unwrap_or_default().to_string();
                let limit = args.get("limit").and_then(Value::as_u64).map(|n| n as usize);
                match self
                    .booking
                    .check_availability(conversation, &date, &service_type, limit, Some(&call.id))
                    .await
                {
                    Ok(result) => result.to_value(),
                    Err(e) => json!({ "success": false, "error": e.to_string() }),
                }
            }
            "book_appointment" => {
                match self
                    .booking
                    .book_appointment(conversation, customer, args.clone())
                    .await
                {
                    Ok(outcome) => outcome.to_tool_result(),
                    Err(e) => json!({ "success": false, "error": e.to_string() }),
                }
            }
            "reschedule_appointment" => {
                let new_start_time = str_arg("new_start_time").unwrap_or_default().to_string();
                match self
                    .booking
                    .reschedule_appointment(
                        conversation,
                        str_arg("appointment_id"),
                        &new_start_time,
                        str_arg("service_type"),
                        str_arg("provider"),
                    )
                    .await
                {
                    Ok(result) => result.to_value(),
                    Err(e) => json!({ "success": false, "error": e.to_string() }),
                }
            }
            "cancel_appointment" => {
                match self
                    .booking
                    .cancel_appointment(
                        conversation,
                        str_arg("appointment_id"),
                        str_arg("cancellation_reason"),
                    )
                    .await
                {
                    Ok(result) => result.to_value(),
                    Err(e) => json!({ "success": false, "error": e.to_string() }),
                }
            }
            other => {
                warn!("Model requested unknown tool {}", other);
                json!({ "success": false, "error": format!("Unknown function: {}", other) })
            }
        }
    }
}
