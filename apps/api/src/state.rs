use std::sync::Arc;

use booking_cell::{BookingOrchestrator, CalendarPort, GoogleCalendarClient};
use conversation_cell::{ConversationLocks, ConversationStore, SupabaseConversationStore};
use insights_cell::ConversationScoringService;
use llm_cell::{ChatCompletion, OpenAiChatClient};
use messaging_cell::{
    InboundMessagingService, NullMessenger, OutboundMessenger, RestMessenger, TurnOrchestrator,
};
use shared_config::{AppConfig, ServicesCatalog};
use shared_database::SupabaseClient;
use voice_cell::VoiceSession;

/// Shared application state: every port is constructed once here and handed
/// into the orchestrators.
pub struct AppState {
    pub inbound: Arc<InboundMessagingService>,
    pub voice: Arc<VoiceSession>,
}

impl AppState {
    pub fn build(config: AppConfig) -> Self {
        let config = Arc::new(config);
        let catalog = ServicesCatalog::standard();

        let store: Arc<dyn ConversationStore> = Arc::new(SupabaseConversationStore::new(
            SupabaseClient::new(&config),
        ));
        let llm: Arc<dyn ChatCompletion> =
            Arc::new(OpenAiChatClient::new(&config.openai_api_key));
        let calendar: Arc<dyn CalendarPort> =
            Arc::new(GoogleCalendarClient::new(&config, catalog.clone()));

        let messenger: Arc<dyn OutboundMessenger> =
            if config.is_sms_configured() || config.is_email_configured() {
                Arc::new(RestMessenger::new(&config))
            } else {
                Arc::new(NullMessenger)
            };

        let booking = Arc::new(BookingOrchestrator::new(
            calendar,
            store.clone(),
            catalog,
        ));
        let turn = Arc::new(TurnOrchestrator::new(
            llm.clone(),
            booking,
            store.clone(),
            config.clone(),
        ));
        let scoring = Arc::new(ConversationScoringService::new(
            llm,
            store.clone(),
            config.clone(),
        ));

        let locks = ConversationLocks::new();
        let inbound = Arc::new(InboundMessagingService::new(
            store.clone(),
            turn.clone(),
            messenger,
            locks.clone(),
            config.clone(),
        ));
        let voice = Arc::new(VoiceSession::new(store, turn, scoring, locks, config));

        Self { inbound, voice }
    }
}
