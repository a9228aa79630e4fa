//! End-to-end Bedrock streaming: signed request out, binary event-stream in.

use std::sync::Arc;

use futures_util::StreamExt;
use omnillm::codec::eventstream::{HeaderValue, encode_event, encode_frame};
use omnillm::prelude::*;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MODEL: &str = "anthropic.claude-3-haiku";

fn client_for(base_url: &str) -> Client {
    let catalog = Arc::new(
        StaticCatalog::new().with_model(
            ModelInfo::new(ProviderId::Bedrock, MODEL).with_base_url(base_url.to_string()),
        ),
    );
    Client::builder()
        .catalog(catalog)
        .credentials(
            ProviderId::Bedrock,
            Credentials::Aws(AwsCredentials::new("AKID", "secret", "us-east-1")),
        )
        .build()
        .unwrap()
}

fn converse_stream_body() -> Vec<u8> {
    [
        encode_event("messageStart", br#"{"role":"assistant"}"#),
        encode_event(
            "contentBlockDelta",
            br#"{"contentBlockIndex":0,"delta":{"text":"Hel"}}"#,
        ),
        encode_event(
            "contentBlockDelta",
            br#"{"contentBlockIndex":0,"delta":{"text":"lo"}}"#,
        ),
        encode_event("contentBlockStop", br#"{"contentBlockIndex":0}"#),
        encode_event("messageStop", br#"{"stopReason":"end_turn"}"#),
        encode_event(
            "metadata",
            br#"{"usage":{"inputTokens":6,"outputTokens":2}}"#,
        ),
    ]
    .concat()
}

#[tokio::test]
async fn binary_event_stream_decodes_to_ordered_chunks() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/model/{MODEL}/converse-stream")))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            converse_stream_body(),
            "application/vnd.amazon.eventstream",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server.uri());
    let context = ChatContext::from_messages(vec![Message::user("hi")]).unwrap();
    let handle = client
        .stream(ProviderId::Bedrock, MODEL, context, GenerationOptions::new())
        .await
        .unwrap();

    let chunks: Vec<StreamChunk> = handle
        .chunks
        .map(|item| item.unwrap())
        .collect::<Vec<_>>()
        .await;

    assert_eq!(
        chunks[0],
        StreamChunk::Content {
            delta: "Hel".to_string()
        }
    );
    assert_eq!(
        chunks[1],
        StreamChunk::Content {
            delta: "lo".to_string()
        }
    );

    let meta = handle.metadata.resolve().await.unwrap();
    assert_eq!(meta.finish_reason, Some(FinishReason::Stop));
    assert_eq!(meta.usage.input_tokens, 6);
    assert_eq!(meta.usage.output_tokens, 2);
}

#[tokio::test]
async fn corrupted_frame_fails_the_stream_with_a_framing_error() {
    let mut body = converse_stream_body();
    // Flip one bit in the final CRC byte of the last frame.
    let last = body.len() - 1;
    body[last] ^= 0x01;

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/model/{MODEL}/converse-stream")))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(body, "application/vnd.amazon.eventstream"),
        )
        .mount(&server)
        .await;

    let client = client_for(&server.uri());
    let context = ChatContext::from_messages(vec![Message::user("hi")]).unwrap();
    let handle = client
        .stream(ProviderId::Bedrock, MODEL, context, GenerationOptions::new())
        .await
        .unwrap();

    let items: Vec<_> = handle.chunks.collect().await;
    assert!(matches!(items.last(), Some(Err(LlmError::FramingError(_)))));
    assert!(matches!(
        handle.metadata.resolve().await,
        Err(LlmError::FramingError(_))
    ));
}

#[tokio::test]
async fn in_band_exception_frames_terminate_the_stream() {
    let body: Vec<u8> = [
        encode_event(
            "contentBlockDelta",
            br#"{"contentBlockIndex":0,"delta":{"text":"par"}}"#,
        ),
        encode_frame(
            &[
                (
                    ":message-type",
                    HeaderValue::String("exception".to_string()),
                ),
                (
                    ":exception-type",
                    HeaderValue::String("throttlingException".to_string()),
                ),
            ],
            br#"{"message":"Too many tokens"}"#,
        ),
    ]
    .concat();

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/model/{MODEL}/converse-stream")))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(body, "application/vnd.amazon.eventstream"),
        )
        .mount(&server)
        .await;

    let client = client_for(&server.uri());
    let context = ChatContext::from_messages(vec![Message::user("hi")]).unwrap();
    let handle = client
        .stream(ProviderId::Bedrock, MODEL, context, GenerationOptions::new())
        .await
        .unwrap();

    let items: Vec<_> = handle.chunks.collect().await;
    assert_eq!(items.len(), 2);
    assert!(items[0].is_ok());
    match &items[1] {
        Err(LlmError::ApiError { message, .. }) => {
            assert!(message.contains("throttlingException"));
        }
        other => panic!("unexpected item: {other:?}"),
    }
}

#[tokio::test]
async fn non_streaming_converse_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/model/{MODEL}/converse")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "output": {"message": {"role": "assistant", "content": [{"text": "hello"}]}},
            "stopReason": "end_turn",
            "usage": {"inputTokens": 4, "outputTokens": 1},
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server.uri());
    let context = ChatContext::from_messages(vec![Message::user("hi")]).unwrap();
    let response = client
        .generate(ProviderId::Bedrock, MODEL, context, GenerationOptions::new())
        .await
        .unwrap();

    assert_eq!(response.text(), "hello");
    assert_eq!(response.usage.input_tokens, 4);
}
