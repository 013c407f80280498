use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde_json::json;
use tokio::sync::Mutex;

use booking_cell::{
    BookingOrchestrator, BookingOutcome, CalendarError, CalendarPort, CreateEventRequest,
    EventDetails, Slot, SlotSelectionEngine,
};
use conversation_cell::{
    AppointmentStatus, Channel, Conversation, ConversationStore, Customer,
    InMemoryConversationStore, Message,
};
use shared_config::ServicesCatalog;
use shared_utils::{clock_label, SPA_TZ};

// ---------------------------------------------------------------------------
// Fake calendar port
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeCalendarState {
    created: Vec<CreateEventRequest>,
    updated: Vec<(String, DateTime<Utc>)>,
    deleted: Vec<String>,
}

struct FakeCalendar {
    slots: Vec<Slot>,
    state: Mutex<FakeCalendarState>,
    create_returns_id: bool,
    findable_event: Option<String>,
    fail_availability: std::sync::atomic::AtomicBool,
}

impl FakeCalendar {
    fn with_slots(slots: Vec<Slot>) -> Self {
        Self {
            slots,
            state: Mutex::new(FakeCalendarState::default()),
            create_returns_id: true,
            findable_event: None,
            fail_availability: std::sync::atomic::AtomicBool::new(false),
        }
    }

    fn losing_create_responses(mut self, findable: &str) -> Self {
        self.create_returns_id = false;
        self.findable_event = Some(findable.to_string());
        self
    }

    fn set_fail_availability(&self, fail: bool) {
        self.fail_availability
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    async fn created_count(&self) -> usize {
        self.state.lock().await.created.len()
    }
}

#[async_trait]
impl CalendarPort for FakeCalendar {
    async fn available_slots(
        &self,
        _date: NaiveDate,
        _service_type: &str,
    ) -> Result<Vec<Slot>, CalendarError> {
        if self.fail_availability.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(CalendarError::Unavailable("connection refused".to_string()));
        }
        Ok(self.slots.clone())
    }

    async fn create_event(
        &self,
        request: &CreateEventRequest,
    ) -> Result<Option<String>, CalendarError> {
        let mut state = self.state.lock().await;
        state.created.push(request.clone());
        if self.create_returns_id {
            Ok(Some(format!("evt-{}", state.created.len())))
        } else {
            Ok(None)
        }
    }

    async fn find_event(
        &self,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
        _summary: &str,
    ) -> Result<Option<String>, CalendarError> {
        Ok(self.findable_event.clone())
    }

    async fn update_event(
        &self,
        event_id: &str,
        new_start: DateTime<Utc>,
        _new_end: DateTime<Utc>,
    ) -> Result<bool, CalendarError> {
        let mut state = self.state.lock().await;
        state.updated.push((event_id.to_string(), new_start));
        Ok(true)
    }

    async fn delete_event(&self, event_id: &str) -> Result<bool, CalendarError> {
        let mut state = self.state.lock().await;
        state.deleted.push(event_id.to_string());
        Ok(true)
    }

    async fn get_event(&self, _event_id: &str) -> Result<Option<EventDetails>, CalendarError> {
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn build_slots(count: usize) -> Vec<Slot> {
    let base = SPA_TZ
        .with_ymd_and_hms(2025, 11, 20, 10, 0, 0)
        .unwrap()
        .with_timezone(&Utc);
    (0..count)
        .map(|i| {
            let start = base + Duration::hours(i as i64);
            let end = start + Duration::minutes(30);
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
    calendar: Arc<FakeCalendar>,
    store: Arc<InMemoryConversationStore>,
    orchestrator: BookingOrchestrator,
    conversation: Conversation,
    customer: Customer,
}

async fn harness_with(calendar: FakeCalendar) -> Harness {
    let calendar = Arc::new(calendar);
    let store = Arc::new(InMemoryConversationStore::new());
    let customer = Customer::new("Jess Carter", "+15550001111", Some("jess@example.com"));
    store.create_customer(&customer).await.unwrap();
    let conversation = Conversation::new(Some(customer.id), Channel::Sms);
    store.create_conversation(&conversation).await.unwrap();
    let orchestrator = BookingOrchestrator::new(
        calendar.clone() as Arc<dyn CalendarPort>,
        store.clone() as Arc<dyn ConversationStore>,
        ServicesCatalog::standard(),
    );
    Harness {
        calendar,
        store,
        orchestrator,
        conversation,
        customer,
    }
}

// ---------------------------------------------------------------------------
// Availability
// ---------------------------------------------------------------------------

#[tokio::test]
async fn successful_availability_records_offers() {
    let mut h = harness_with(FakeCalendar::with_slots(build_slots(10))).await;

    let result = h
        .orchestrator
        .check_availability(&mut h.conversation, "2025-11-20", "botox", None, Some("call-1"))
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.available_slots.len(), 10);
    let pending = h.conversation.metadata.pending_slot_offers.as_ref().unwrap();
    assert_eq!(pending.slots.len(), 10);
    assert_eq!(pending.source_tool_call_id.as_deref(), Some("call-1"));
    assert_eq!(pending.service_type.as_deref(), Some("botox"));
}

#[tokio::test]
async fn failed_availability_clears_offers() {
    let mut h = harness_with(FakeCalendar::with_slots(build_slots(3))).await;
    h.orchestrator
        .check_availability(&mut h.conversation, "2025-11-20", "botox", None, None)
        .await
        .unwrap();
    assert!(h.conversation.metadata.pending_slot_offers.is_some());

    h.calendar.set_fail_availability(true);
    let result = h
        .orchestrator
        .check_availability(&mut h.conversation, "2025-11-20", "botox", None, None)
        .await
        .unwrap();

    assert!(!result.success);
    assert!(h.conversation.metadata.pending_slot_offers.is_none());

    // The transient failure is also recorded as an analytics event.
    let events = h.store.events().await;
    assert!(events.iter().any(|e| e.event_type == "calendar_error"));
}

#[tokio::test]
async fn invalid_date_is_a_tool_error() {
    let mut h = harness_with(FakeCalendar::with_slots(build_slots(3))).await;
    let result = h
        .orchestrator
        .check_availability(&mut h.conversation, "next tuesday", "botox", None, None)
        .await
        .unwrap();
    assert!(!result.success);
    assert!(result.error.unwrap().contains("YYYY-MM-DD"));
}

// ---------------------------------------------------------------------------
// Booking
// ---------------------------------------------------------------------------

#[tokio::test]
async fn booking_selected_slot_creates_one_event_and_clears_offers() {
    let slots = build_slots(10);
    let mut h = harness_with(FakeCalendar::with_slots(slots.clone())).await;

    h.orchestrator
        .check_availability(&mut h.conversation, "2025-11-20", "botox", None, None)
        .await
        .unwrap();

    let selection = Message::inbound(h.conversation.id, "Option 5");
    assert!(SlotSelectionEngine::capture_selection(
        h.store.as_ref(),
        &mut h.conversation,
        &selection
    )
    .await
    .unwrap());

    let customer = h.customer.clone();
    let outcome = h
        .orchestrator
        .book_appointment(
            &mut h.conversation,
            Some(&customer),
            json!({ "service_type": "botox" }),
        )
        .await
        .unwrap();

    assert!(outcome.is_booked());
    assert_eq!(h.calendar.created_count().await, 1);

    // Appointment row exists and anchors to the calendar event.
    let rows = h.store.appointments().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, AppointmentStatus::Scheduled);
    assert_eq!(rows[0].service_type, "botox");

    // Metadata: last_appointment written, offers and intent flags cleared.
    let last = h.conversation.metadata.last_appointment.as_ref().unwrap();
    assert_eq!(last.status, "scheduled");
    assert_eq!(last.start_time.as_deref(), Some(slots[4].start.as_str()));
    assert!(h.conversation.metadata.pending_slot_offers.is_none());
    assert_eq!(h.conversation.metadata.pending_booking_intent, None);
}

#[tokio::test]
async fn second_identical_booking_fails_mismatch_with_single_event() {
    let mut h = harness_with(FakeCalendar::with_slots(build_slots(5))).await;

    h.orchestrator
        .check_availability(&mut h.conversation, "2025-11-20", "botox", None, None)
        .await
        .unwrap();
    let selection = Message::inbound(h.conversation.id, "1");
    SlotSelectionEngine::capture_selection(h.store.as_ref(), &mut h.conversation, &selection)
        .await
        .unwrap();

    let customer = h.customer.clone();
    let args = json!({ "service_type": "botox" });
    let first = h
        .orchestrator
        .book_appointment(&mut h.conversation, Some(&customer), args.clone())
        .await
        .unwrap();
    assert!(first.is_booked());

    let second = h
        .orchestrator
        .book_appointment(&mut h.conversation, Some(&customer), args)
        .await
        .unwrap();
    match second {
        BookingOutcome::Mismatch { .. } => {}
        other => panic!("expected mismatch, got {:?}", other.to_tool_result()),
    }

    assert_eq!(h.calendar.created_count().await, 1);
    assert_eq!(h.store.appointments().await.len(), 1);
}

#[tokio::test]
async fn hallucinated_booking_never_touches_the_calendar() {
    let mut h = harness_with(FakeCalendar::with_slots(build_slots(5))).await;
    let before = serde_json::to_value(&h.conversation.metadata).unwrap();

    let customer = h.customer.clone();
    let outcome = h
        .orchestrator
        .book_appointment(
            &mut h.conversation,
            Some(&customer),
            json!({ "start_time": "2025-11-20T14:00:00", "service_type": "botox" }),
        )
        .await
        .unwrap();

    let tool_result = outcome.to_tool_result();
    assert_eq!(tool_result["success"], json!(false));
    assert_eq!(tool_result["code"], json!("slot_selection_mismatch"));

    assert_eq!(h.calendar.created_count().await, 0);
    assert!(h.store.appointments().await.is_empty());
    let after = serde_json::to_value(&h.conversation.metadata).unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn lost_create_response_recovers_via_fallback_lookup() {
    let mut h = harness_with(
        FakeCalendar::with_slots(build_slots(3)).losing_create_responses("evt-found"),
    )
    .await;

    h.orchestrator
        .check_availability(&mut h.conversation, "2025-11-20", "botox", None, None)
        .await
        .unwrap();
    let selection = Message::inbound(h.conversation.id, "1");
    SlotSelectionEngine::capture_selection(h.store.as_ref(), &mut h.conversation, &selection)
        .await
        .unwrap();

    let customer = h.customer.clone();
    let outcome = h
        .orchestrator
        .book_appointment(
            &mut h.conversation,
            Some(&customer),
            json!({ "service_type": "botox" }),
        )
        .await
        .unwrap();

    match outcome {
        BookingOutcome::Booked(result) => {
            assert_eq!(result.event_id.as_deref(), Some("evt-found"));
        }
        other => panic!("expected booked, got {:?}", other.to_tool_result()),
    }
}

#[tokio::test]
async fn booked_start_always_comes_from_the_offer_list() {
    // Quantified invariant: the booked start equals a slot in the
    // immediately preceding offers even when the model asks for another.
    let slots = build_slots(3);
    let mut h = harness_with(FakeCalendar::with_slots(slots.clone())).await;

    h.orchestrator
        .check_availability(&mut h.conversation, "2025-11-20", "botox", None, None)
        .await
        .unwrap();
    let selection = Message::inbound(h.conversation.id, "Option 1");
    SlotSelectionEngine::capture_selection(h.store.as_ref(), &mut h.conversation, &selection)
        .await
        .unwrap();

    let customer = h.customer.clone();
    let outcome = h
        .orchestrator
        .book_appointment(
            &mut h.conversation,
            Some(&customer),
            json!({ "start_time": slots[1].start, "service_type": "botox" }),
        )
        .await
        .unwrap();

    let BookingOutcome::Booked(result) = outcome else {
        panic!("expected booked outcome");
    };
    assert_eq!(result.start_time.as_deref(), Some(slots[0].start.as_str()));
    let adjustments = result.argument_adjustments.unwrap();
    assert_eq!(adjustments["start_time"].original, slots[1].start);
    assert_eq!(adjustments["start_time"].normalized, slots[0].start);

    let created = h.calendar.state.lock().await;
    assert_eq!(
        created.created[0].start,
        shared_utils::parse_iso_datetime(&slots[0].start).unwrap()
    );
}

// ---------------------------------------------------------------------------
// Reschedule / cancel
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reschedule_resolves_id_from_last_appointment() {
    let mut h = harness_with(FakeCalendar::with_slots(build_slots(3))).await;

    h.orchestrator
        .check_availability(&mut h.conversation, "2025-11-20", "botox", None, None)
        .await
        .unwrap();
    let selection = Message::inbound(h.conversation.id, "1");
    SlotSelectionEngine::capture_selection(h.store.as_ref(), &mut h.conversation, &selection)
        .await
        .unwrap();
    let customer = h.customer.clone();
    h.orchestrator
        .book_appointment(
            &mut h.conversation,
            Some(&customer),
            json!({ "service_type": "botox" }),
        )
        .await
        .unwrap();

    let result = h
        .orchestrator
        .reschedule_appointment(
            &mut h.conversation,
            None,
            "2025-11-21T15:00:00-05:00",
            None,
            None,
        )
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.appointment_id.as_deref(), Some("evt-1"));

    let rows = h.store.appointments().await;
    assert_eq!(rows[0].status, AppointmentStatus::Scheduled);
    assert_eq!(
        rows[0].appointment_datetime,
        shared_utils::parse_iso_datetime("2025-11-21T15:00:00-05:00").unwrap()
    );
    let last = h.conversation.metadata.last_appointment.as_ref().unwrap();
    assert_eq!(last.start_time.as_deref(), Some("2025-11-21T15:00:00-05:00"));
}

#[tokio::test]
async fn cancel_updates_row_and_metadata() {
    let mut h = harness_with(FakeCalendar::with_slots(build_slots(3))).await;

    h.orchestrator
        .check_availability(&mut h.conversation, "2025-11-20", "botox", None, None)
        .await
        .unwrap();
    let selection = Message::inbound(h.conversation.id, "1");
    SlotSelectionEngine::capture_selection(h.store.as_ref(), &mut h.conversation, &selection)
        .await
        .unwrap();
    let customer = h.customer.clone();
    h.orchestrator
        .book_appointment(
            &mut h.conversation,
            Some(&customer),
            json!({ "service_type": "botox" }),
        )
        .await
        .unwrap();

    let result = h
        .orchestrator
        .cancel_appointment(&mut h.conversation, None, Some("feeling unwell"))
        .await
        .unwrap();
    assert!(result.success);

    let rows = h.store.appointments().await;
    assert_eq!(rows[0].status, AppointmentStatus::Cancelled);
    assert_eq!(rows[0].cancellation_reason.as_deref(), Some("feeling unwell"));
    assert!(rows[0].cancelled_at.is_some());

    let last = h.conversation.metadata.last_appointment.as_ref().unwrap();
    assert_eq!(last.status, "cancelled");
    assert_eq!(last.cancellation_reason.as_deref(), Some("feeling unwell"));
}

#[tokio::test]
async fn cancel_without_any_anchor_fails_cleanly() {
    let mut h = harness_with(FakeCalendar::with_slots(build_slots(3))).await;
    let result = h
        .orchestrator
        .cancel_appointment(&mut h.conversation, None, None)
        .await
        .unwrap();
    assert!(!result.success);
    assert!(result.error.unwrap().contains("Missing appointment_id"));
}
