//! Gemini transport tests against a mock HTTP server.

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chatmeter::gemini::types::{CountTokensRequest, GeminiContent, GenerateContentRequest};
use chatmeter::{
    Error, GeminiClient, GeminiService, GeminiSettings, PricingTable, RemoteService,
    RequestLifecycleController, RequestState, Role, Speaker, Turn,
};

const MODEL: &str = "gemini-1.5-pro-latest";
const KEY: &str = "test-key";

fn client(server: &MockServer) -> GeminiClient {
    GeminiClient::with_options(Some(KEY.to_string()), Some(server.uri()), None).unwrap()
}

fn service(server: &MockServer) -> GeminiService {
    GeminiService::new(client(server), GeminiSettings::new(MODEL))
}

fn count_path() -> String {
    format!("/models/{MODEL}:countTokens")
}

fn generate_path() -> String {
    format!("/models/{MODEL}:generateContent")
}

fn reply_body(text: &str, output_tokens: u64) -> serde_json::Value {
    json!({
        "candidates": [{
            "content": { "role": "model", "parts": [{ "text": text }] },
            "finishReason": "STOP"
        }],
        "usageMetadata": {
            "promptTokenCount": 62,
            "candidatesTokenCount": output_tokens,
            "totalTokenCount": 62 + output_tokens
        }
    })
}

#[tokio::test]
async fn count_tokens_sends_key_and_wrapped_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(count_path()))
        .and(header("x-goog-api-key", KEY))
        .and(body_partial_json(json!({
            "generateContentRequest": {
                "model": format!("models/{MODEL}"),
                "contents": [{ "role": "user", "parts": [{ "text": "Hi" }] }]
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "totalTokens": 62 })))
        .expect(1)
        .mount(&server)
        .await;

    let request = CountTokensRequest {
        generate_content_request: GenerateContentRequest {
            model: Some(format!("models/{MODEL}")),
            contents: vec![GeminiContent::new("user", "Hi")],
            system_instruction: None,
            generation_config: None,
        },
    };
    let response = client(&server).count_tokens(MODEL, &request).await.unwrap();
    assert_eq!(response.total_tokens, 62);
}

#[tokio::test]
async fn system_instruction_travels_with_counts_and_turns() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(count_path()))
        .and(body_partial_json(json!({
            "generateContentRequest": {
                "systemInstruction": { "parts": [{ "text": "be brief" }] }
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "totalTokens": 9 })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(generate_path()))
        .and(body_partial_json(json!({
            "systemInstruction": { "parts": [{ "text": "be brief" }] },
            "contents": [{ "role": "user", "parts": [{ "text": "Hi" }] }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(reply_body("Hello", 8)))
        .expect(1)
        .mount(&server)
        .await;

    let service = service(&server);
    service.set_system_instruction("be brief").await.unwrap();
    assert_eq!(service.count_tokens(Role::System, "be brief").await.unwrap(), 9);
    let reply = service
        .send_turn(vec![Turn::new(Speaker::User, "Hi")], Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(reply.text, "Hello");
    assert_eq!(reply.output_tokens, 8);
}

#[tokio::test]
async fn blank_system_instruction_counts_zero_without_a_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;
    let service = service(&server);
    assert_eq!(service.count_tokens(Role::System, "  ").await.unwrap(), 0);
}

#[tokio::test]
async fn rate_limit_carries_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(generate_path()))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "17")
                .set_body_json(json!({
                    "error": { "code": 429, "message": "quota exceeded", "status": "RESOURCE_EXHAUSTED" }
                })),
        )
        .mount(&server)
        .await;

    let err = service(&server)
        .send_turn(vec![Turn::new(Speaker::User, "Hi")], Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(err.is_rate_limit());
    match err {
        Error::RateLimit {
            message,
            retry_after,
        } => {
            assert_eq!(message, "quota exceeded");
            assert_eq!(retry_after, Some(17));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn status_codes_map_to_error_kinds() {
    let cases: [(u16, fn(&Error) -> bool); 5] = [
        (401, |e: &Error| e.is_authentication()),
        (403, |e: &Error| matches!(e, Error::Permission { .. })),
        (404, |e: &Error| matches!(e, Error::NotFound { .. })),
        (500, |e: &Error| matches!(e, Error::InternalServer { .. })),
        (503, |e: &Error| matches!(e, Error::ServiceUnavailable { .. })),
    ];
    for (status, check) in cases {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(status).set_body_string("nope"))
            .mount(&server)
            .await;
        let err = service(&server)
            .count_tokens(Role::User, "Hi")
            .await
            .unwrap_err();
        assert!(check(&err), "status {status} gave {err:?}");
        assert_eq!(err.status_code(), Some(status));
        assert!(err.is_service_error());
    }
}

#[tokio::test]
async fn unexpected_status_is_a_generic_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(418).set_body_json(json!({
            "error": { "message": "short and stout", "status": "TEAPOT" }
        })))
        .mount(&server)
        .await;
    let err = service(&server)
        .count_tokens(Role::User, "Hi")
        .await
        .unwrap_err();
    match err {
        Error::Api {
            status_code,
            status,
            message,
        } => {
            assert_eq!(status_code, 418);
            assert_eq!(status.as_deref(), Some("TEAPOT"));
            assert_eq!(message, "short and stout");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn blocked_prompt_is_an_empty_reply() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(generate_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "promptFeedback": { "blockReason": "SAFETY" }
        })))
        .mount(&server)
        .await;
    let err = service(&server)
        .send_turn(vec![Turn::new(Speaker::User, "Hi")], Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::EmptyReply { .. }), "{err:?}");
    assert!(err.to_string().contains("SAFETY"));
}

#[tokio::test]
async fn slow_reply_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(generate_path()))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(reply_body("late", 1))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;
    let err = service(&server)
        .send_turn(
            vec![Turn::new(Speaker::User, "Hi")],
            Duration::from_millis(100),
        )
        .await
        .unwrap_err();
    assert!(err.is_timeout(), "{err:?}");
}

#[tokio::test]
async fn controller_over_http_bills_the_turn() {
    let server = MockServer::start().await;
    // The system instruction is measured against a single-space user turn.
    Mock::given(method("POST"))
        .and(path(count_path()))
        .and(body_string_contains(r#""text":" ""#))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "totalTokens": 50 })))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(count_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "totalTokens": 62 })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(generate_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(reply_body("Hello", 8)))
        .expect(1)
        .mount(&server)
        .await;

    let mut c = RequestLifecycleController::new(
        service(&server),
        "be helpful",
        PricingTable::gemini_15_pro(),
    );
    assert_eq!(c.initialize().await.unwrap(), 50);
    let receipt = c.send("Hi").await.unwrap();
    assert_eq!(receipt.input_tokens, 12);
    assert_eq!(receipt.output_tokens, 8);
    assert!((receipt.account.session_cost - 0.000126).abs() < 1e-12);
    assert_eq!(c.ledger().len(), 3);
}

#[tokio::test]
async fn controller_over_http_keeps_turn_after_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(count_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "totalTokens": 20 })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(generate_path()))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(reply_body("late", 1))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let mut c = RequestLifecycleController::new(
        service(&server),
        "be helpful",
        PricingTable::gemini_15_pro(),
    )
    .with_timeout(Duration::from_millis(100));
    c.initialize().await.unwrap();
    let err = c.send("Hi").await.unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(c.ledger().len(), 2);
    assert_eq!(c.state(), RequestState::Idle);
    assert_eq!(c.last_outcome(), Some(RequestState::TimedOut));
}
