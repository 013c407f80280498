//! Per-call voice session over the realtime provider.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use booking_cell::SlotSelectionEngine;
use conversation_cell::{
    Channel, Conversation, ConversationLocks, ConversationStore, Customer, Message, Speaker,
    VoiceDetails,
};
use insights_cell::ConversationScoringService;
use llm_cell::{
    audio_append_frame, audio_commit_frame, function_output_frame, greeting_frame,
    response_cancel_frame, response_create_frame, session_update_frame, RealtimeClient,
    RealtimeEvent, RealtimeSender, ToolCall,
};
use messaging_cell::{prompts, tool_definitions, TurnOrchestrator};
use shared_config::AppConfig;

use crate::error::VoiceSessionError;
use crate::protocol::{ClientFrame, ServerFrame};
use crate::transcript::TranscriptReconciler;

/// Grace given to the upstream socket to flush before the session hard-stops.
const DISCONNECT_GRACE: Duration = Duration::from_secs(3);
/// How many recent customer utterances the selection backfill replays.
const BACKFILL_SCAN_LIMIT: usize = 5;

/// Write half of the provider connection, seam for tests.
#[async_trait::async_trait]
trait UpstreamSink: Send {
    async fn send(&mut self, frame: Value) -> Result<(), llm_cell::LlmError>;
}

#[async_trait::async_trait]
impl UpstreamSink for RealtimeSender {
    async fn send(&mut self, frame: Value) -> Result<(), llm_cell::LlmError> {
        RealtimeSender::send(self, frame).await
    }
}

pub struct VoiceSession {
    store: Arc<dyn ConversationStore>,
    turn: Arc<TurnOrchestrator>,
    scoring: Arc<ConversationScoringService>,
    locks: ConversationLocks,
    config: Arc<AppConfig>,
}

impl VoiceSession {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        turn: Arc<TurnOrchestrator>,
        scoring: Arc<ConversationScoringService>,
        locks: ConversationLocks,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            store,
            turn,
            scoring,
            locks,
            config,
        }
    }

    /// Drive one call to completion. The transport handler feeds client
    /// frames through `client_rx` and relays `server_tx` frames back; this
    /// task owns the provider socket. Returns the conversation id.
    pub async fn run(
        &self,
        caller_phone: Option<String>,
        mut client_rx: mpsc::Receiver<ClientFrame>,
        server_tx: mpsc::Sender<ServerFrame>,
    ) -> Result<Uuid, VoiceSessionError> {
        let customer = match &caller_phone {
            Some(phone) => self.store.find_customer_by_phone(phone).await?,
            None => None,
        };
        let mut conversation =
            Conversation::new(customer.as_ref().map(|c| c.id), Channel::Voice);
        if let Some(customer) = &customer {
            conversation.metadata.customer_name = Some(customer.name.clone());
            conversation.metadata.customer_phone = Some(customer.phone.clone());
            conversation.metadata.customer_email = customer.email.clone();
        }
        let mut conversation = self.store.create_conversation(&conversation).await?;
        info!("Voice session started: conversation {}", conversation.id);

        let (mut upstream_tx, mut upstream_rx) = RealtimeClient::connect(
            &self.config.openai_realtime_url,
            &self.config.openai_api_key,
        )
        .await?;

        let instructions = prompts::system_prompt("voice", &self.config);
        let tools = tool_definitions(self.turn.booking().catalog());
        upstream_tx
            .send(session_update_frame(&instructions, &tools))
            .await?;
        upstream_tx
            .send(greeting_frame(&prompts::voice_greeting(&self.config)))
            .await?;

        let identity = format!(
            "You are {}, the virtual receptionist for {}. Stay in character, keep the focus on spa services, and never describe yourself as a model or name a technology provider.",
            self.config.assistant_name, self.config.spa_name
        );

        let started = Instant::now();
        let mut reconciler = TranscriptReconciler::new();
        let mut interruptions: i32 = 0;
        let mut awaiting_response = false;
        let finalize_guard = AtomicBool::new(false);

        let loop_result: Result<(), VoiceSessionError> = loop {
            tokio::select! {
                frame = client_rx.recv() => match frame {
                    None => {
                        debug!("Client channel closed; ending session");
                        break Ok(());
                    }
                    Some(ClientFrame::Audio { data }) => {
                        if data.is_empty() {
                            debug!("Empty audio payload; skipping append");
                            continue;
                        }
                        if let Err(e) = upstream_tx.send(audio_append_frame(&data)).await {
                            break Err(e.into());
                        }
                    }
                    Some(ClientFrame::Commit) => {
                        if let Err(e) = upstream_tx.send(audio_commit_frame()).await {
                            break Err(e.into());
                        }
                        awaiting_response = true;
                    }
                    Some(ClientFrame::Interrupt) => {
                        // A benign error comes back when nothing is active.
                        interruptions += 1;
                        if let Err(e) = upstream_tx.send(response_cancel_frame()).await {
                            break Err(e.into());
                        }
                    }
                    Some(ClientFrame::EndSession) => {
                        debug!("Client requested end of session");
                        break Ok(());
                    }
                    Some(ClientFrame::Ping) => {
                        let _ = server_tx.send(ServerFrame::Pong).await;
                    }
                },
                event = upstream_rx.next_event() => match event {
                    None => {
                        debug!("Upstream socket closed; ending session");
                        break Ok(());
                    }
                    Some(Err(e)) => {
                        error!("Upstream event error: {}", e);
                        break Ok(());
                    }
                    Some(Ok(event)) => {
                        if let Err(e) = self
                            .handle_event(
                                event,
                                &mut conversation,
                                customer.as_ref(),
                                &mut reconciler,
                                &mut awaiting_response,
                                &identity,
                                &mut upstream_tx,
                                &server_tx,
                            )
                            .await
                        {
                            break Err(e);
                        }
                    }
                },
            }
        };

        // Give in-flight upstream work a short window to flush, then stop
        // issuing commands entirely.
        let _ = tokio::time::timeout(DISCONNECT_GRACE, upstream_tx.close()).await;

        self.finalize(
            &finalize_guard,
            &mut conversation,
            reconciler,
            interruptions,
            started,
        )
        .await?;

        loop_result.map(|_| conversation.id)
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_event(
        &self,
        event: RealtimeEvent,
        conversation: &mut Conversation,
        customer: Option<&Customer>,
        reconciler: &mut TranscriptReconciler,
        awaiting_response: &mut bool,
        identity: &str,
        upstream_tx: &mut dyn UpstreamSink,
        server_tx: &mpsc::Sender<ServerFrame>,
    ) -> Result<(), VoiceSessionError> {
        match event {
            RealtimeEvent::SessionUpdated { session } => {
                debug!(
                    "Session updated - transcription enabled: {}",
                    session.get("input_audio_transcription").is_some()
                );
            }
            RealtimeEvent::AudioDelta { delta } => {
                if !delta.is_empty() {
                    let _ = server_tx.send(ServerFrame::Audio { data: delta }).await;
                }
            }
            RealtimeEvent::InputTranscriptionDelta { delta, .. } => {
                reconciler.push_customer_delta(&delta);
            }
            RealtimeEvent::InputTranscriptionCompleted { transcript, .. } => {
                let appended = reconciler.commit_customer(transcript.as_deref());
                self.after_commit(appended, reconciler, awaiting_response, identity, upstream_tx)
                    .await?;
            }
            RealtimeEvent::ItemCreated { item } => {
                let appended = reconciler.item_created(&item);
                self.after_commit(appended, reconciler, awaiting_response, identity, upstream_tx)
                    .await?;
            }
            RealtimeEvent::ItemDelta { item_id, delta } => {
                reconciler.item_delta(item_id.as_deref(), &delta);
            }
            RealtimeEvent::ItemCompleted { item_id } => {
                let appended = reconciler.item_completed(item_id.as_deref());
                self.after_commit(appended, reconciler, awaiting_response, identity, upstream_tx)
                    .await?;
            }
            RealtimeEvent::AssistantTranscriptDelta { delta } => {
                reconciler.push_assistant_delta(&delta);
            }
            RealtimeEvent::AssistantTranscriptDone { transcript } => {
                reconciler.commit_assistant(transcript.as_deref());
            }
            RealtimeEvent::FunctionCallArgumentsDone {
                call_id,
                name,
                arguments,
            } => {
                self.dispatch_function_call(
                    conversation,
                    customer,
                    reconciler,
                    identity,
                    upstream_tx,
                    call_id,
                    &name,
                    &arguments,
                )
                .await?;
            }
            RealtimeEvent::Error { code, message } => {
                let benign = code
                    .as_deref()
                    .map(|c| llm_cell::BENIGN_ERROR_CODES.contains(&c))
                    .unwrap_or(false);
                if benign {
                    info!("Benign provider error {:?}: {:?}", code, message);
                } else {
                    error!("Provider error {:?}: {:?}", code, message);
                }
            }
            RealtimeEvent::Unknown { event_type } => {
                debug!("Ignoring unknown provider event: {}", event_type);
            }
        }
        Ok(())
    }

    /// Customer speech releases a pending response request.
    async fn after_commit(
        &self,
        appended: bool,
        reconciler: &TranscriptReconciler,
        awaiting_response: &mut bool,
        identity: &str,
        upstream_tx: &mut dyn UpstreamSink,
    ) -> Result<(), VoiceSessionError> {
        if !appended || !*awaiting_response {
            return Ok(());
        }
        let last_speaker = reconciler.transcript().last().map(|s| s.speaker);
        if last_speaker == Some(Speaker::Customer) {
            *awaiting_response = false;
            upstream_tx.send(response_create_frame(Some(identity))).await?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn dispatch_function_call(
        &self,
        conversation: &mut Conversation,
        customer: Option<&Customer>,
        reconciler: &mut TranscriptReconciler,
        identity: &str,
        upstream_tx: &mut dyn UpstreamSink,
        call_id: Option<String>,
        name: &str,
        raw_arguments: &str,
    ) -> Result<(), VoiceSessionError> {
        let arguments: Value = serde_json::from_str(raw_arguments).unwrap_or_else(|_| json!({}));
        reconciler.record_function_call(name, arguments.clone());

        let _guard = self.locks.acquire(conversation.id).await;

        if name == "book_appointment" {
            self.backfill_selection(conversation, reconciler).await?;
        }

        let call = ToolCall {
            id: call_id.clone().unwrap_or_default(),
            name: name.to_string(),
            arguments,
        };
        let result = self.turn.execute_tool(conversation, customer, &call).await;
        let tool_succeeded = result.get("success").and_then(Value::as_bool).unwrap_or(false);
        info!(
            "Voice tool call {} for conversation {}: success={}",
            name,
            conversation.id,
            tool_succeeded
        );

        if let Some(call_id) = call_id {
            upstream_tx
                .send(function_output_frame(&call_id, &result))
                .await?;
            upstream_tx
                .send(response_create_frame(Some(identity)))
                .await?;
        }
        Ok(())
    }

    /// Recover selections like "that time works" by replaying the capture
    /// logic over recent customer utterances, newest first.
    async fn backfill_selection(
        &self,
        conversation: &mut Conversation,
        reconciler: &TranscriptReconciler,
    ) -> Result<(), VoiceSessionError> {
        let has_selection = conversation
            .metadata
            .pending_slot_offers
            .as_ref()
            .map(|pending| pending.selected_slot.is_some())
            .unwrap_or(false);
        if has_selection {
            return Ok(());
        }

        for text in reconciler.recent_customer_texts(BACKFILL_SCAN_LIMIT) {
            let probe = Message::inbound(conversation.id, &text);
            if SlotSelectionEngine::capture_selection(self.store.as_ref(), conversation, &probe)
                .await?
            {
                info!(
                    "Backfilled slot selection for conversation {} from transcript: {}",
                    conversation.id, text
                );
                break;
            }
        }
        Ok(())
    }

    /// Runs exactly once per session, even when several disconnect paths
    /// race: flush the reconciler, persist the single inbound message plus
    /// voice details, complete the conversation, and score it.
    async fn finalize(
        &self,
        guard: &AtomicBool,
        conversation: &mut Conversation,
        mut reconciler: TranscriptReconciler,
        interruptions: i32,
        started: Instant,
    ) -> Result<(), VoiceSessionError> {
        if guard.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let lock = self.locks.acquire(conversation.id).await;

        reconciler.finalize_buffers();
        let (transcript, function_calls) = reconciler.into_artifacts();

        let content = match transcript.first() {
            Some(first) => {
                let preview: String = first.text.chars().take(100).collect();
                format!("Voice call starting with: {}...", preview)
            }
            None => "Voice call with no captured speech".to_string(),
        };

        let inbound = self
            .store
            .add_message(&Message::inbound(conversation.id, &content))
            .await?;
        self.store
            .add_voice_details(&VoiceDetails {
                message_id: inbound.id,
                duration_seconds: started.elapsed().as_secs() as i64,
                recording_url: None,
                transcript_segments: transcript,
                function_calls,
                interruption_count: interruptions,
            })
            .await?;
        self.store.complete_conversation(conversation.id).await?;

        if let Err(e) = self.scoring.score_conversation(conversation.id).await {
            warn!(
                "Scoring failed for voice conversation {}: {}",
                conversation.id, e
            );
        }

        info!(
            "Voice session finalized: conversation {} ({} interruptions)",
            conversation.id, interruptions
        );

        drop(lock);
        self.locks.release(conversation.id).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;

    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
    use tokio::sync::Mutex;

    use booking_cell::{
        BookingOrchestrator, CalendarError, CalendarPort, CheckAvailabilityResult,
        CreateEventRequest, EventDetails, Slot,
    };
    use conversation_cell::{ConversationStatus, InMemoryConversationStore};
    use llm_cell::{ChatCompletion, ChatRequest, ChatResponse, LlmError};
    use shared_config::ServicesCatalog;
    use shared_utils::{clock_label, SPA_TZ};

    struct FakeSink {
        frames: Vec<Value>,
    }

    #[async_trait]
    impl UpstreamSink for FakeSink {
        async fn send(&mut self, frame: Value) -> Result<(), LlmError> {
            self.frames.push(frame);
            Ok(())
        }
    }

    struct FakeChat {
        responses: Mutex<VecDeque<ChatResponse>>,
    }

    #[async_trait]
    impl ChatCompletion for FakeChat {
        async fn complete(&self, _request: ChatRequest) -> Result<ChatResponse, LlmError> {
            self.responses
                .lock()
                .await
                .pop_front()
                .ok_or_else(|| LlmError::Api("no scripted response".to_string()))
        }
    }

    struct FakeCalendar;

    #[async_trait]
    impl CalendarPort for FakeCalendar {
        async fn available_slots(
            &self,
            _date: NaiveDate,
            _service_type: &str,
        ) -> Result<Vec<Slot>, CalendarError> {
            Ok(build_slots(3))
        }

        async fn create_event(
            &self,
            _request: &CreateEventRequest,
        ) -> Result<Option<String>, CalendarError> {
            Ok(Some("evt-voice-1".to_string()))
        }

        async fn find_event(
            &self,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
            _summary: &str,
        ) -> Result<Option<String>, CalendarError> {
            Ok(None)
        }

        async fn update_event(
            &self,
            _event_id: &str,
            _new_start: DateTime<Utc>,
            _new_end: DateTime<Utc>,
        ) -> Result<bool, CalendarError> {
            Ok(true)
        }

        async fn delete_event(&self, _event_id: &str) -> Result<bool, CalendarError> {
            Ok(true)
        }

        async fn get_event(
            &self,
            _event_id: &str,
        ) -> Result<Option<EventDetails>, CalendarError> {
            Ok(None)
        }
    }

    fn build_slots(count: usize) -> Vec<Slot> {
        let base = SPA_TZ
            .with_ymd_and_hms(2025, 11, 20, 10, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        (0..count)
            .map(|i| {
                let start = base + ChronoDuration::hours(i as i64);
                let end = start + ChronoDuration::minutes(30);
                Slot {
                    start: start.with_timezone(&SPA_TZ).to_rfc3339(),
                    end: end.with_timezone(&SPA_TZ).to_rfc3339(),
                    start_time: clock_label(start),
                    end_time: clock_label(end),
                }
            })
            .collect()
    }

    struct Fixture {
        session: VoiceSession,
        store: Arc<InMemoryConversationStore>,
        conversation: Conversation,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryConversationStore::new());
        let config = Arc::new(AppConfig::from_env());
        let chat = Arc::new(FakeChat {
            responses: Mutex::new(VecDeque::new()),
        });
        let booking = Arc::new(BookingOrchestrator::new(
            Arc::new(FakeCalendar) as Arc<dyn CalendarPort>,
            store.clone() as Arc<dyn ConversationStore>,
            ServicesCatalog::standard(),
        ));
        let turn = Arc::new(TurnOrchestrator::new(
            chat.clone() as Arc<dyn ChatCompletion>,
            booking,
            store.clone() as Arc<dyn ConversationStore>,
            config.clone(),
        ));
        let scoring = Arc::new(ConversationScoringService::new(
            chat as Arc<dyn ChatCompletion>,
            store.clone() as Arc<dyn ConversationStore>,
            config.clone(),
        ));
        let session = VoiceSession::new(
            store.clone() as Arc<dyn ConversationStore>,
            turn,
            scoring,
            ConversationLocks::new(),
            config,
        );

        let conversation = Conversation::new(None, Channel::Voice);
        let conversation = store.create_conversation(&conversation).await.unwrap();

        Fixture {
            session,
            store,
            conversation,
        }
    }

    async fn seed_offers(fixture: &mut Fixture) {
        let slots = build_slots(3);
        let output = CheckAvailabilityResult {
            success: true,
            date: Some("2025-11-20".to_string()),
            service_type: Some("botox".to_string()),
            available_slots: slots.clone(),
            all_slots: slots,
            availability_summary: None,
            suggested_slots: Vec::new(),
            error: None,
        };
        SlotSelectionEngine::record_offers(
            fixture.store.as_ref(),
            &mut fixture.conversation,
            Some("call-voice"),
            Some("botox"),
            Some("2025-11-20"),
            &output,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn benign_interrupt_errors_are_swallowed() {
        let mut fixture = fixture().await;
        let mut sink = FakeSink { frames: Vec::new() };
        let mut reconciler = TranscriptReconciler::new();
        let mut awaiting = false;

        let event = llm_cell::parse_realtime_event(
            r#"{"type":"error","error":{"code":"response_cancel_not_active","message":"no active response"}}"#,
        )
        .unwrap();

        fixture
            .session
            .handle_event(
                event,
                &mut fixture.conversation,
                None,
                &mut reconciler,
                &mut awaiting,
                "identity",
                &mut sink,
                &mpsc::channel(4).0,
            )
            .await
            .unwrap();

        assert!(reconciler.transcript().is_empty());
        assert!(sink.frames.is_empty());
    }

    #[tokio::test]
    async fn vague_confirmation_backfills_selection_and_books() {
        let mut fixture = fixture().await;
        seed_offers(&mut fixture).await;

        let mut reconciler = TranscriptReconciler::new();
        reconciler.append_entry(Speaker::Assistant, "We have 10:00 AM or 2:00 PM open.");
        reconciler.append_entry(Speaker::Customer, "10:00 AM works for me.");

        let mut sink = FakeSink { frames: Vec::new() };
        let arguments = json!({
            "customer_name": "Jess Carter",
            "customer_phone": "+15550001111",
            "service_type": "botox",
        })
        .to_string();

        fixture
            .session
            .dispatch_function_call(
                &mut fixture.conversation,
                None,
                &mut reconciler,
                "identity",
                &mut sink,
                Some("call_77".to_string()),
                "book_appointment",
                &arguments,
            )
            .await
            .unwrap();

        // The selection was recovered from the transcript and enforcement
        // passed: the tool result reports success and the follow-up
        // response.create was issued.
        assert_eq!(sink.frames.len(), 2);
        assert_eq!(sink.frames[0]["item"]["call_id"], "call_77");
        assert!(sink.frames[0]["item"]["output"]
            .as_str()
            .unwrap()
            .contains("\"success\":true"));
        assert_eq!(sink.frames[1]["type"], "response.create");

        let last = fixture
            .conversation
            .metadata
            .last_appointment
            .as_ref()
            .unwrap();
        assert_eq!(last.calendar_event_id, "evt-voice-1");
        assert_eq!(reconciler.function_calls().len(), 1);
    }

    #[tokio::test]
    async fn booking_without_offers_reports_mismatch_to_the_model() {
        let mut fixture = fixture().await;
        let mut reconciler = TranscriptReconciler::new();
        let mut sink = FakeSink { frames: Vec::new() };

        fixture
            .session
            .dispatch_function_call(
                &mut fixture.conversation,
                None,
                &mut reconciler,
                "identity",
                &mut sink,
                Some("call_1".to_string()),
                "book_appointment",
                r#"{"customer_name":"A","customer_phone":"+1555","start_time":"2025-11-20T14:00:00","service_type":"botox"}"#,
            )
            .await
            .unwrap();

        let output = sink.frames[0]["item"]["output"].as_str().unwrap();
        assert!(output.contains("slot_selection_mismatch"));
    }

    #[tokio::test]
    async fn finalize_runs_exactly_once_and_scores_with_defaults() {
        let fixture = fixture().await;
        let mut conversation = fixture.conversation.clone();

        let mut reconciler = TranscriptReconciler::new();
        reconciler.append_entry(
            Speaker::Customer,
            "Hi, I'd like to ask about laser hair removal pricing.",
        );

        let guard = AtomicBool::new(false);
        fixture
            .session
            .finalize(
                &guard,
                &mut conversation,
                reconciler,
                2,
                Instant::now(),
            )
            .await
            .unwrap();

        // A second path racing to finalize is a no-op.
        fixture
            .session
            .finalize(
                &guard,
                &mut conversation,
                TranscriptReconciler::new(),
                0,
                Instant::now(),
            )
            .await
            .unwrap();

        let messages = fixture
            .store
            .list_messages(conversation.id)
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0]
            .content
            .starts_with("Voice call starting with: Hi, I'd like to ask"));

        let details = fixture.store.voice_details().await;
        assert_eq!(details.len(), 1);
        assert_eq!(details[0].interruption_count, 2);
        assert_eq!(details[0].transcript_segments.len(), 1);

        let stored = fixture
            .store
            .get_conversation(conversation.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, ConversationStatus::Completed);
        // The scoring model is unreachable in tests; defaults are recorded.
        assert_eq!(stored.satisfaction_score, Some(5));
    }

    #[tokio::test]
    async fn empty_transcript_still_produces_scored_conversation() {
        let fixture = fixture().await;
        let mut conversation = fixture.conversation.clone();

        let guard = AtomicBool::new(false);
        fixture
            .session
            .finalize(
                &guard,
                &mut conversation,
                TranscriptReconciler::new(),
                0,
                Instant::now(),
            )
            .await
            .unwrap();

        let messages = fixture
            .store
            .list_messages(conversation.id)
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "Voice call with no captured speech");

        let stored = fixture
            .store
            .get_conversation(conversation.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, ConversationStatus::Completed);
        assert_eq!(stored.satisfaction_score, Some(5));
        assert_eq!(stored.summary.as_deref(), Some(""));
    }
}
