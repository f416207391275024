mod harness;

use axum::http::StatusCode;
use conduit_core::{ErrorKind, RequestContext};
use conduit_engine::Engine;
use conduit_llm::{Message, MessageRequest};
use harness::config::ConfigBuilder;
use harness::mock_upstream::{MockUpstream, Reply};

fn request(model: &str) -> MessageRequest {
    MessageRequest::new(model, vec![Message::user("Hello")])
}

#[tokio::test]
async fn client_errors_are_rejections() {
    let mock = MockUpstream::scripted([
        Reply::Fail(StatusCode::BAD_REQUEST),
        Reply::Fail(StatusCode::TOO_MANY_REQUESTS),
    ])
    .await
    .unwrap();
    let engine = harness::engine(&mock);
    let context = RequestContext::new();

    let err = engine
        .create_message(&request("claude/claude-sonnet-4-5"), &context)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProviderRejected);
    assert!(err.to_string().contains("mock upstream failure"));

    let err = engine
        .create_message(&request("gpt/gpt-5"), &context)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProviderRejected);
}

#[tokio::test]
async fn server_errors_are_transport_failures() {
    let mock = MockUpstream::scripted([
        Reply::Fail(StatusCode::SERVICE_UNAVAILABLE),
        Reply::Fail(StatusCode::INTERNAL_SERVER_ERROR),
    ])
    .await
    .unwrap();
    let engine = harness::engine(&mock);
    let context = RequestContext::new();

    let err = engine
        .create_message(&request("gemini/gemini-2.5-flash"), &context)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProviderTransport);

    let err = engine
        .create_message(&request("local/llama-3.1-8b"), &context)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProviderTransport);
}

#[tokio::test]
async fn failed_stream_request_errors_before_the_first_event() {
    let mock = MockUpstream::scripted([Reply::Fail(StatusCode::UNAUTHORIZED)]).await.unwrap();
    let engine = harness::engine(&mock);

    let result = engine
        .stream_message(&request("claude/claude-sonnet-4-5"), &RequestContext::new())
        .await;

    let Err(err) = result else {
        panic!("expected the stream request to fail");
    };
    assert_eq!(err.kind(), ErrorKind::ProviderRejected);
}

#[tokio::test]
async fn unknown_provider_never_reaches_the_upstream() {
    let mock = MockUpstream::start().await.unwrap();
    let engine = harness::engine(&mock);

    let err = engine
        .create_message(&request("bedrock/claude"), &RequestContext::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);

    let err = engine
        .create_message(&request("no-slash"), &RequestContext::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);

    assert_eq!(mock.request_count(), 0);
}

#[tokio::test]
async fn unreachable_upstream_is_a_transport_failure() {
    // Reserve a port, then free it so nothing is listening
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = ConfigBuilder::new()
        .with_provider("local", "openai_chat", &format!("http://{addr}/v1"))
        .build();
    let engine = Engine::from_config(&config).unwrap();

    let err = engine
        .create_message(&request("local/llama-3.1-8b"), &RequestContext::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProviderTransport);
}
