use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde_json::json;
use tokio::sync::Mutex;

use booking_cell::{
    BookingOrchestrator, CalendarError, CalendarPort, CreateEventRequest, EventDetails, Slot,
    SlotSelectionEngine,
};
use conversation_cell::{
    Channel, Conversation, ConversationLocks, ConversationStore, Customer,
    InMemoryConversationStore, Message,
};
use llm_cell::{ChatCompletion, ChatRequest, ChatResponse, LlmError, Role, ToolCall};
use messaging_cell::{
    InboundMessagingService, InboundSmsRequest, NullMessenger, TurnOrchestrator,
};
use shared_config::{AppConfig, ServicesCatalog};
use shared_utils::{clock_label, SPA_TZ};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

struct FakeChat {
    responses: Mutex<VecDeque<ChatResponse>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl FakeChat {
    fn scripted(responses: Vec<ChatResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    async fn call_count(&self) -> usize {
        self.requests.lock().await.len()
    }

    async fn request(&self, index: usize) -> ChatRequest {
        self.requests.lock().await[index].clone()
    }
}

#[async_trait]
impl ChatCompletion for FakeChat {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        self.requests.lock().await.push(request);
        self.responses
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| LlmError::Api("no scripted response".to_string()))
    }
}

fn tool_call_response(name: &str, arguments: serde_json::Value) -> ChatResponse {
    ChatResponse {
        content: String::new(),
        tool_calls: vec![ToolCall {
            id: "call_1".to_string(),
            name: name.to_string(),
            arguments,
        }],
    }
}

struct FakeCalendar {
    slots: Vec<Slot>,
    availability_calls: Mutex<usize>,
    created: Mutex<Vec<CreateEventRequest>>,
}

impl FakeCalendar {
    fn new(slots: Vec<Slot>) -> Self {
        Self {
            slots,
            availability_calls: Mutex::new(0),
            created: Mutex::new(Vec::new()),
        }
    }

    async fn availability_call_count(&self) -> usize {
        *self.availability_calls.lock().await
    }

    async fn created_count(&self) -> usize {
        self.created.lock().await.len()
    }
}

#[async_trait]
impl CalendarPort for FakeCalendar {
    async fn available_slots(
        &self,
        _date: NaiveDate,
        _service_type: &str,
    ) -> Result<Vec<Slot>, CalendarError> {
        *self.availability_calls.lock().await += 1;
        Ok(self.slots.clone())
    }

    async fn create_event(
        &self,
        request: &CreateEventRequest,
    ) -> Result<Option<String>, CalendarError> {
        let mut created = self.created.lock().await;
        created.push(request.clone());
        Ok(Some(format!("evt-{}", created.len())))
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

    async fn get_event(&self, _event_id: &str) -> Result<Option<EventDetails>, CalendarError> {
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

fn build_slots(count: usize) -> Vec<Slot> {
    let base = SPA_TZ
        .with_ymd_and_hms(2025, 11, 20, 10, 0, 0)
        .unwrap()
        .with_timezone(&Utc);
    (0..count)
        .map(|i| {
            let start = base + Duration::hours(i as i64);
            let end = start + Duration::minutes(60);
            Slot {
                start: start.with_timezone(&SPA_TZ).to_rfc3339(),
                end: end.with_timezone(&SPA_TZ).to_rfc3339(),
                start_time: clock_label(start),
                end_time: clock_label(end),
            }
        })
        .collect()
}

struct Harness {
    chat: Arc<FakeChat>,
    calendar: Arc<FakeCalendar>,
    store: Arc<InMemoryConversationStore>,
    turn: TurnOrchestrator,
    conversation: Conversation,
    customer: Customer,
}

async fn harness(responses: Vec<ChatResponse>, slots: Vec<Slot>) -> Harness {
    let chat = Arc::new(FakeChat::scripted(responses));
    let calendar = Arc::new(FakeCalendar::new(slots));
    let store = Arc::new(InMemoryConversationStore::new());
    let config = Arc::new(AppConfig::from_env());

    let customer = Customer::new("Jess Carter", "+15550001111", Some("jess@example.com"));
    store.create_customer(&customer).await.unwrap();
    let conversation = Conversation::new(Some(customer.id), Channel::Sms);
    store.create_conversation(&conversation).await.unwrap();

    let booking = Arc::new(BookingOrchestrator::new(
        calendar.clone() as Arc<dyn CalendarPort>,
        store.clone() as Arc<dyn ConversationStore>,
        ServicesCatalog::standard(),
    ));
    let turn = TurnOrchestrator::new(
        chat.clone() as Arc<dyn ChatCompletion>,
        booking,
        store.clone() as Arc<dyn ConversationStore>,
        config,
    );

    Harness {
        chat,
        calendar,
        store,
        turn,
        conversation,
        customer,
    }
}

async fn add_inbound(h: &Harness, content: &str) -> Message {
    let message = Message::inbound(h.conversation.id, content);
    h.store.add_message(&message).await.unwrap()
}

// ---------------------------------------------------------------------------
// Preemptive availability
// ---------------------------------------------------------------------------

#[tokio::test]
async fn preemptive_call_injects_availability_into_tool_history() {
    let mut h = harness(
        vec![ChatResponse::text(
            "We have availability at 4 PM. Would you like to take it?",
        )],
        build_slots(10),
    )
    .await;
    add_inbound(&h, "can you book me for botox tomorrow at 4 pm").await;

    let customer = h.customer.clone();
    let (text, _outbound) = h
        .turn
        .run_turn(&mut h.conversation, Some(&customer))
        .await
        .unwrap();

    assert!(text.starts_with("We have availability"));
    assert_eq!(h.calendar.availability_call_count().await, 1);
    assert_eq!(h.chat.call_count().await, 1);

    // The model saw a synthetic tool-call/result pair.
    let request = h.chat.request(0).await;
    let tool_call_entry = request
        .messages
        .iter()
        .find(|m| m.tool_calls.is_some())
        .expect("synthetic tool call present");
    assert_eq!(
        tool_call_entry.tool_calls.as_ref().unwrap()[0].name,
        "check_availability"
    );
    let tool_result_entry = request
        .messages
        .iter()
        .find(|m| m.role == Role::Tool && m.tool_call_id.as_deref() == Some("preemptive_call"))
        .expect("preemptive tool result present");
    assert!(tool_result_entry.content.contains("available_slots"));

    // Intent flags and offers are written back.
    let metadata = &h.conversation.metadata;
    assert_eq!(metadata.pending_booking_intent, Some(true));
    assert_eq!(metadata.pending_booking_service.as_deref(), Some("botox"));
    let offers = metadata.pending_slot_offers.as_ref().unwrap();
    assert_eq!(offers.slots.len(), 10);
    assert_eq!(offers.source_tool_call_id.as_deref(), Some("preemptive_call"));
}

#[tokio::test]
async fn model_can_still_request_the_tool_after_preemptive_check() {
    let mut h = harness(
        vec![
            tool_call_response(
                "check_availability",
                json!({ "date": "2025-11-21", "service_type": "botox" }),
            ),
            ChatResponse::text("Here are the options once more."),
        ],
        build_slots(5),
    )
    .await;
    add_inbound(&h, "book me a botox appointment tomorrow").await;

    let customer = h.customer.clone();
    let (text, _) = h
        .turn
        .run_turn(&mut h.conversation, Some(&customer))
        .await
        .unwrap();

    // Preemptive call plus the model-requested call.
    assert_eq!(h.calendar.availability_call_count().await, 2);
    assert_eq!(h.chat.call_count().await, 2);
    assert_eq!(text, "Here are the options once more.");
}

#[tokio::test]
async fn info_requests_never_probe_availability() {
    let mut h = harness(
        vec![ChatResponse::text("We offer Botox, fillers, facials, and more!")],
        build_slots(5),
    )
    .await;
    add_inbound(&h, "What services do you offer?").await;

    let customer = h.customer.clone();
    let (text, _) = h
        .turn
        .run_turn(&mut h.conversation, Some(&customer))
        .await
        .unwrap();

    assert!(text.contains("We offer"));
    assert_eq!(h.calendar.availability_call_count().await, 0);
    assert_eq!(h.chat.call_count().await, 1);
    assert_eq!(h.conversation.metadata.pending_booking_intent, None);
}

#[tokio::test]
async fn greetings_never_probe_availability() {
    let mut h = harness(
        vec![ChatResponse::text("Hello! How can I help you today?")],
        build_slots(5),
    )
    .await;
    add_inbound(&h, "Hi there!").await;

    let customer = h.customer.clone();
    let (text, _) = h
        .turn
        .run_turn(&mut h.conversation, Some(&customer))
        .await
        .unwrap();

    assert!(text.contains("Hello"));
    assert_eq!(h.calendar.availability_call_count().await, 0);
}

// ---------------------------------------------------------------------------
// Deterministic booking
// ---------------------------------------------------------------------------

#[tokio::test]
async fn auto_books_without_model_when_slot_and_details_are_complete() {
    let mut h = harness(Vec::new(), build_slots(5)).await;

    // Offers on file with a captured selection plus contact details.
    h.turn
        .booking()
        .check_availability(&mut h.conversation, "2025-11-20", "botox", None, Some("auto-test"))
        .await
        .unwrap();
    let selection = add_inbound(&h, "Option 1 sounds perfect").await;
    assert!(SlotSelectionEngine::capture_selection(
        h.store.as_ref(),
        &mut h.conversation,
        &selection
    )
    .await
    .unwrap());

    let customer = h.customer.clone();
    let (text, outbound) = h
        .turn
        .run_turn(&mut h.conversation, Some(&customer))
        .await
        .unwrap();

    assert_eq!(h.chat.call_count().await, 0);
    assert_eq!(h.calendar.created_count().await, 1);
    assert!(text.contains("Booked"));
    assert!(!outbound.content.is_empty());

    let last = h.conversation.metadata.last_appointment.as_ref().unwrap();
    assert_eq!(last.status, "scheduled");
    assert!(h.conversation.metadata.pending_slot_offers.is_none());
    assert_eq!(h.store.appointments().await.len(), 1);
}

#[tokio::test]
async fn selection_without_contact_details_falls_through_to_the_model() {
    let h = harness(
        vec![ChatResponse::text("Could I get your name and number?")],
        build_slots(5),
    )
    .await;

    // An unidentified guest: no linked customer, no metadata contact
    // details.
    let mut conversation = Conversation::new(None, Channel::Sms);
    h.store.create_conversation(&conversation).await.unwrap();

    h.turn
        .booking()
        .check_availability(&mut conversation, "2025-11-20", "botox", None, None)
        .await
        .unwrap();
    let selection = Message::inbound(conversation.id, "2");
    let selection = h.store.add_message(&selection).await.unwrap();
    SlotSelectionEngine::capture_selection(h.store.as_ref(), &mut conversation, &selection)
        .await
        .unwrap();

    let (text, _) = h.turn.run_turn(&mut conversation, None).await.unwrap();

    assert_eq!(h.chat.call_count().await, 1);
    assert_eq!(h.calendar.created_count().await, 0);
    assert!(text.contains("name and number"));
}

// ---------------------------------------------------------------------------
// Failure handling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn model_failure_yields_channel_apology() {
    let mut h = harness(Vec::new(), build_slots(2)).await;
    add_inbound(&h, "Hi!").await;

    let customer = h.customer.clone();
    let (text, outbound) = h
        .turn
        .run_turn(&mut h.conversation, Some(&customer))
        .await
        .unwrap();

    assert!(text.contains("unavailable"));
    assert_eq!(outbound.content, text);
}

#[tokio::test]
async fn runaway_tool_requests_are_capped() {
    // The model keeps asking for tools; the loop stops at depth three and
    // surfaces an apology instead of spinning.
    let responses = (0..5)
        .map(|_| {
            tool_call_response(
                "check_availability",
                json!({ "date": "2025-11-20", "service_type": "botox" }),
            )
        })
        .collect();
    let mut h = harness(responses, build_slots(3)).await;
    add_inbound(&h, "book botox tomorrow").await;

    let customer = h.customer.clone();
    let (text, _) = h
        .turn
        .run_turn(&mut h.conversation, Some(&customer))
        .await
        .unwrap();

    assert_eq!(h.chat.call_count().await, 3);
    assert!(text.contains("unavailable") || text.contains("follow up"));
}

// ---------------------------------------------------------------------------
// End-to-end SMS booking through the inbound service
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sms_flow_books_exactly_once() {
    let slots = build_slots(10);
    let chat = Arc::new(FakeChat::scripted(vec![ChatResponse::text(
        "We have 2:00 PM available tomorrow. Shall I book it? Reply with the option number.",
    )]));
    let calendar = Arc::new(FakeCalendar::new(slots));
    let store = Arc::new(InMemoryConversationStore::new());
    let config = Arc::new(AppConfig::from_env());

    let booking = Arc::new(BookingOrchestrator::new(
        calendar.clone() as Arc<dyn CalendarPort>,
        store.clone() as Arc<dyn ConversationStore>,
        ServicesCatalog::standard(),
    ));
    let turn = Arc::new(TurnOrchestrator::new(
        chat.clone() as Arc<dyn ChatCompletion>,
        booking,
        store.clone() as Arc<dyn ConversationStore>,
        config.clone(),
    ));
    let service = InboundMessagingService::new(
        store.clone() as Arc<dyn ConversationStore>,
        turn,
        Arc::new(NullMessenger),
        ConversationLocks::new(),
        config,
    );

    // The guest is already on file, so contact details resolve without
    // another round trip.
    let customer = Customer::new("Jess Carter", "+15550001111", Some("jess@example.com"));
    store.create_customer(&customer).await.unwrap();

    // Turn 1: booking intent triggers the preemptive check and an offer.
    let reply1 = service
        .handle_inbound_sms(InboundSmsRequest {
            from: "+15550001111".to_string(),
            to: "+15559990000".to_string(),
            body: "I'd like Botox tomorrow at 2pm".to_string(),
            provider_message_id: "SM1".to_string(),
        })
        .await
        .unwrap();
    assert!(reply1.contains("2:00 PM"));
    assert_eq!(calendar.availability_call_count().await, 1);

    // Turn 2: the guest picks option 5 (2:00 PM); the booking happens
    // deterministically, once.
    let reply2 = service
        .handle_inbound_sms(InboundSmsRequest {
            from: "+15550001111".to_string(),
            to: "+15559990000".to_string(),
            body: "5".to_string(),
            provider_message_id: "SM2".to_string(),
        })
        .await
        .unwrap();

    assert!(reply2.contains("Booked"));
    assert_eq!(calendar.created_count().await, 1);
    assert_eq!(store.appointments().await.len(), 1);
    assert_eq!(chat.call_count().await, 1);
}
