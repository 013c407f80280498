use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use messaging_cell::{OutboundMessenger, RestMessenger};
use shared_config::AppConfig;

fn config_with(sid: &str) -> AppConfig {
    let mut config = AppConfig::from_env();
    config.twilio_account_sid = sid.to_string();
    config.twilio_auth_token = "auth-token".to_string();
    config.twilio_phone_number = "+15559990000".to_string();
    config
}

#[tokio::test]
async fn sms_send_posts_form_and_returns_sid() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/2010-04-01/Accounts/AC123/Messages.json"))
        .and(body_string_contains("To=%2B15550001111"))
        .and(body_string_contains("Body=See+you+at+2"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "sid": "SM42" })))
        .mount(&server)
        .await;

    let messenger = RestMessenger::with_twilio_base_url(&config_with("AC123"), &server.uri());
    let sid = messenger
        .send_sms("+15550001111", "See you at 2")
        .await
        .unwrap();
    assert_eq!(sid, "SM42");
}

#[tokio::test]
async fn provider_rejection_is_a_delivery_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad credentials"))
        .mount(&server)
        .await;

    let messenger = RestMessenger::with_twilio_base_url(&config_with("AC123"), &server.uri());
    let result = messenger.send_sms("+15550001111", "hello").await;
    assert!(result.is_err());
}

#[tokio::test]
async fn email_relay_returns_message_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/relay"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "message_id": "em-7" })),
        )
        .mount(&server)
        .await;

    let mut config = config_with("AC123");
    config.email_relay_url = format!("{}/relay", server.uri());
    config.email_relay_token = "relay-token".to_string();

    let messenger = RestMessenger::with_twilio_base_url(&config, &server.uri());
    let id = messenger
        .send_email("guest@example.com", "Re: Booking", "Confirmed.")
        .await
        .unwrap();
    assert_eq!(id, "em-7");
}
