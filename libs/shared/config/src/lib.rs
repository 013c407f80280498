use std::env;
use tracing::warn;

pub mod services;

pub use services::{ProviderInfo, ServiceInfo, ServicesCatalog};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub openai_api_key: String,
    pub openai_messaging_model: String,
    pub openai_scoring_model: String,
    pub openai_realtime_url: String,
    pub google_calendar_id: String,
    pub google_calendar_token: String,
    pub google_calendar_base_url: String,
    pub twilio_account_sid: String,
    pub twilio_auth_token: String,
    pub twilio_phone_number: String,
    pub email_relay_url: String,
    pub email_relay_token: String,
    pub spa_name: String,
    pub spa_phone: String,
    pub spa_email: String,
    pub spa_address: String,
    pub spa_hours: String,
    pub assistant_name: String,
    pub business_open_hour: u32,
    pub business_close_hour: u32,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: read_var("SUPABASE_URL", ""),
            supabase_anon_key: read_var("SUPABASE_ANON_PUBLIC_KEY", ""),
            openai_api_key: read_var("OPENAI_API_KEY", ""),
            openai_messaging_model: read_var("OPENAI_MESSAGING_MODEL", "gpt-4o-mini"),
            openai_scoring_model: read_var("OPENAI_SCORING_MODEL", "gpt-4.1-mini"),
            openai_realtime_url: read_var(
                "OPENAI_REALTIME_URL",
                "wss://api.openai.com/v1/realtime?model=gpt-realtime-mini",
            ),
            google_calendar_id: read_var("GOOGLE_CALENDAR_ID", "primary"),
            google_calendar_token: read_var("GOOGLE_CALENDAR_TOKEN", ""),
            google_calendar_base_url: read_var(
                "GOOGLE_CALENDAR_BASE_URL",
                "https://www.googleapis.com/calendar/v3",
            ),
            twilio_account_sid: read_var("TWILIO_ACCOUNT_SID", ""),
            twilio_auth_token: read_var("TWILIO_AUTH_TOKEN", ""),
            twilio_phone_number: read_var("TWILIO_PHONE_NUMBER", ""),
            email_relay_url: read_var("EMAIL_RELAY_URL", ""),
            email_relay_token: read_var("EMAIL_RELAY_TOKEN", ""),
            spa_name: read_var("MED_SPA_NAME", "Luxury Med Spa"),
            spa_phone: read_var("MED_SPA_PHONE", "+1234567890"),
            spa_email: read_var("MED_SPA_EMAIL", "hello@luxurymedspa.example"),
            spa_address: read_var("MED_SPA_ADDRESS", "123 Beauty Lane, Beverly Hills, CA 90210"),
            spa_hours: read_var(
                "MED_SPA_HOURS",
                "Monday-Friday: 9am-7pm, Saturday: 10am-5pm, Sunday: Closed",
            ),
            assistant_name: read_var("AI_ASSISTANT_NAME", "Ava"),
            business_open_hour: read_numeric_var("BUSINESS_OPEN_HOUR", 9),
            business_close_hour: read_numeric_var("BUSINESS_CLOSE_HOUR", 19),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.openai_api_key.is_empty()
    }

    pub fn is_calendar_configured(&self) -> bool {
        !self.google_calendar_token.is_empty() && !self.google_calendar_base_url.is_empty()
    }

    pub fn is_sms_configured(&self) -> bool {
        !self.twilio_account_sid.is_empty()
            && !self.twilio_auth_token.is_empty()
            && !self.twilio_phone_number.is_empty()
    }

    pub fn is_email_configured(&self) -> bool {
        !self.email_relay_url.is_empty() && !self.email_relay_token.is_empty()
    }
}

fn read_var(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| {
        if default.is_empty() {
            warn!("{} not set, using empty value", name);
        }
        default.to_string()
    })
}

fn read_numeric_var(name: &str, default: u32) -> u32 {
    match env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} is not a number, using default {}", name, default);
            default
        }),
        Err(_) => default,
    }
}
