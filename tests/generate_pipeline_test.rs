//! Non-streaming pipeline against stub backends.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use omnillm::prelude::*;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn catalog_for(base_url: &str) -> Arc<StaticCatalog> {
    Arc::new(
        StaticCatalog::new().with_model(
            ModelInfo::new(ProviderId::OpenAi, "gpt-test").with_base_url(base_url.to_string()),
        ),
    )
}

fn client_for(base_url: &str) -> Client {
    Client::builder()
        .catalog(catalog_for(base_url))
        .credentials(ProviderId::OpenAi, Credentials::api_key("sk-test"))
        .build()
        .unwrap()
}

#[tokio::test]
async fn generate_decodes_a_stub_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({ "model": "gpt-test" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"content": "hi"}}],
            "usage": {"input_tokens": 3, "output_tokens": 1},
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server.uri());
    let context = ChatContext::from_messages(vec![Message::user("hello")]).unwrap();
    let response = client
        .generate(ProviderId::OpenAi, "gpt-test", context, GenerationOptions::new())
        .await
        .unwrap();

    assert_eq!(response.text(), "hi");
    assert_eq!(response.usage.input_tokens, 3);
    assert_eq!(response.usage.output_tokens, 1);
    // The response context is the request context plus the assistant turn.
    assert_eq!(response.context.messages.len(), 2);
    assert_eq!(response.context.messages[1].role, MessageRole::Assistant);
}

#[tokio::test]
async fn http_500_is_surfaced_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "error": {"message": "upstream exploded"},
        })))
        // The load-bearing assertion: exactly one attempt.
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server.uri());
    let context = ChatContext::from_messages(vec![Message::user("hello")]).unwrap();
    let err = client
        .generate(ProviderId::OpenAi, "gpt-test", context, GenerationOptions::new())
        .await
        .unwrap_err();

    match err {
        LlmError::ApiError { status, message, .. } => {
            assert_eq!(status, 500);
            assert_eq!(message, "upstream exploded");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn transport_errors_retry_to_the_attempt_ceiling() {
    // A listener that accepts and immediately closes every connection makes
    // reqwest fail at the transport level, which the default policy retries.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicU32::new(0));
    let accepted_clone = accepted.clone();
    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                break;
            };
            accepted_clone.fetch_add(1, Ordering::SeqCst);
            drop(socket);
        }
    });

    let client = client_for(&format!("http://{addr}"));
    let context = ChatContext::from_messages(vec![Message::user("hello")]).unwrap();
    let err = client
        .generate(ProviderId::OpenAi, "gpt-test", context, GenerationOptions::new())
        .await
        .unwrap_err();

    assert!(matches!(err, LlmError::TransportError { .. }));
    assert_eq!(accepted.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn denied_models_never_reach_the_network() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let catalog = Arc::new(
        StaticCatalog::new()
            .with_model(
                ModelInfo::new(ProviderId::OpenAi, "gpt-test").with_base_url(server.uri()),
            )
            .deny(ProviderId::OpenAi, "gpt-test"),
    );
    let client = Client::builder()
        .catalog(catalog)
        .credentials(ProviderId::OpenAi, Credentials::api_key("sk-test"))
        .build()
        .unwrap();

    let context = ChatContext::from_messages(vec![Message::user("hello")]).unwrap();
    let err = client
        .generate(ProviderId::OpenAi, "gpt-test", context, GenerationOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, LlmError::ModelNotAllowed(_)));
}

#[tokio::test]
async fn unknown_models_are_not_found() {
    let client = client_for("http://127.0.0.1:1");
    let context = ChatContext::from_messages(vec![Message::user("hello")]).unwrap();
    let err = client
        .generate(ProviderId::OpenAi, "missing", context, GenerationOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, LlmError::ModelNotFound(_)));
}
