//! Satisfaction/sentiment/outcome scoring over a completed conversation.
//!
//! Any failure on this path (transport, rate limits exhausted, malformed
//! JSON) degrades to neutral defaults; scoring never fails a conversation.

use std::sync::Arc;

use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use conversation_cell::{
    ConversationOutcome, ConversationScore, ConversationStore, Direction, Sentiment, StoreError,
};
use llm_cell::{ChatCompletion, ChatMessage, ChatRequest};
use shared_config::AppConfig;

const SCORING_TEMPERATURE: f32 = 0.3;

pub struct ConversationScoringService {
    llm: Arc<dyn ChatCompletion>,
    store: Arc<dyn ConversationStore>,
    config: Arc<AppConfig>,
}

impl ConversationScoringService {
    pub fn new(
        llm: Arc<dyn ChatCompletion>,
        store: Arc<dyn ConversationStore>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self { llm, store, config }
    }

    /// Score one conversation and persist the result. Returns the score that
    /// was written (possibly the neutral defaults).
    pub async fn score_conversation(
        &self,
        conversation_id: Uuid,
    ) -> Result<ConversationScore, StoreError> {
        let Some(conversation) = self.store.get_conversation(conversation_id).await? else {
            return Err(StoreError::NotFound(format!(
                "conversation {}",
                conversation_id
            )));
        };

        let messages = self.store.list_messages(conversation_id).await?;
        if messages.is_empty() {
            let score = ConversationScore::neutral();
            self.store.record_score(conversation_id, &score).await?;
            info!(
                "Conversation {} has no messages; recorded neutral score",
                conversation_id
            );
            return Ok(score);
        }

        let mut context_lines = vec![format!("Channel: {}", conversation.channel)];
        for message in &messages {
            let speaker = match message.direction {
                Direction::Inbound => "Customer",
                Direction::Outbound => self.config.assistant_name.as_str(),
            };
            context_lines.push(format!("{}: {}", speaker, message.content));
        }
        let context = context_lines.join("\n");

        let score = match self.request_score(&context).await {
            Ok(score) => score,
            Err(e) => {
                warn!(
                    "Scoring failed for conversation {}: {}; recording neutral defaults",
                    conversation_id, e
                );
                ConversationScore::neutral()
            }
        };

        self.store.record_score(conversation_id, &score).await?;
        info!(
            "Scored conversation {}: satisfaction={}, outcome={:?}",
            conversation_id, score.satisfaction_score, score.outcome
        );
        Ok(score)
    }

    async fn request_score(&self, context: &str) -> Result<ConversationScore, llm_cell::LlmError> {
        let system = format!(
            r#"You are an expert at analyzing customer service conversations across voice, SMS, and email.
Analyze the following conversation between {} (the spa's receptionist) and a customer.

Provide your analysis in JSON format with these fields:
- satisfaction_score: score from 1-10 (1=very dissatisfied, 10=very satisfied)
- sentiment: overall sentiment (positive, neutral, negative, mixed)
- outcome: what happened? Options: appointment_scheduled, appointment_rescheduled, appointment_cancelled, info_request, escalated, abandoned, unresolved
- summary: brief 1-2 sentence description of the conversation

Consider:
- Did the customer accomplish their goal?
- Were there repeated clarifications needed?
- Did the customer express gratitude or positive feedback?
- Were there negative words or frustration indicators?
- Was the conversation efficient or drawn out?"#,
            self.config.assistant_name
        );

        let request = ChatRequest::new(
            &self.config.openai_scoring_model,
            vec![ChatMessage::system(&system), ChatMessage::user(context)],
        )
        .with_temperature(SCORING_TEMPERATURE)
        .json_object();

        let response = self.llm.complete(request).await?;
        let parsed: Value = serde_json::from_str(response.content.trim()).map_err(|e| {
            error!("Scoring response was not valid JSON: {}", e);
            llm_cell::LlmError::MalformedJson(e.to_string())
        })?;

        Ok(Self::score_from_json(&parsed))
    }

    /// Field-by-field parse with clamping to the closed sets; anything
    /// unrecognized lands on the neutral default for that field.
    fn score_from_json(value: &Value) -> ConversationScore {
        let satisfaction_score = value
            .get("satisfaction_score")
            .and_then(Value::as_i64)
            .map(|n| n.clamp(1, 10) as i32)
            .unwrap_or(5);

        let sentiment = match value.get("sentiment").and_then(Value::as_str) {
            Some("positive") => Sentiment::Positive,
            Some("negative") => Sentiment::Negative,
            Some("mixed") => Sentiment::Mixed,
            _ => Sentiment::Neutral,
        };

        let outcome = match value.get("outcome").and_then(Value::as_str) {
            Some("appointment_scheduled") => ConversationOutcome::AppointmentScheduled,
            Some("appointment_rescheduled") => ConversationOutcome::AppointmentRescheduled,
            Some("appointment_cancelled") => ConversationOutcome::AppointmentCancelled,
            Some("info_request") => ConversationOutcome::InfoRequest,
            Some("escalated") => ConversationOutcome::Escalated,
            Some("abandoned") => ConversationOutcome::Abandoned,
            _ => ConversationOutcome::Unresolved,
        };

        let summary = value
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        ConversationScore {
            satisfaction_score,
            sentiment,
            outcome,
            summary,
        }
    }
}
