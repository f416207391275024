mod harness;

use conduit_core::RequestContext;
use conduit_engine::{Engine, RunOptions, StopCause, TOOL_LIMIT_MESSAGE, ToolError, ToolRegistry};
use conduit_llm::{ContentBlock, Message, MessageRequest, StreamEvent, Usage};
use futures_util::StreamExt;
use harness::config::ConfigBuilder;
use harness::mock_upstream::{MockUpstream, Reply};
use serde_json::{Value, json};

fn weather_tools() -> ToolRegistry {
    let mut tools = ToolRegistry::new();
    tools.register_fn("get_weather", |input: Value, _ctx| async move {
        match input.get("city").and_then(Value::as_str) {
            Some(city) => Ok(format!("sunny in {city}")),
            None => Err(ToolError::InvalidInput("missing city".into())),
        }
    });
    tools
}

fn request(model: &str) -> MessageRequest {
    let mut request = MessageRequest::new(model, vec![Message::user("What's the weather in Paris?")]);
    request.tools = vec![conduit_llm::Tool::function(
        "get_weather",
        "Current weather for a city",
        json!({ "type": "object", "properties": { "city": { "type": "string" } }, "required": ["city"] }),
    )];
    request
}

#[tokio::test]
async fn tool_loop_round_trips_through_anthropic() {
    let mock = MockUpstream::scripted([
        Reply::tool_call("toolu_1", "get_weather", json!({ "city": "Paris" })),
        Reply::text("It is sunny in Paris."),
    ])
    .await
    .unwrap();
    let engine = harness::engine(&mock);

    let result = engine
        .run(
            request("claude/claude-sonnet-4-5"),
            RunOptions::default().with_tools(weather_tools()),
            &RequestContext::new(),
        )
        .await
        .unwrap();

    assert_eq!(result.stop, StopCause::Completed);
    assert_eq!(result.text(), "It is sunny in Paris.");
    assert_eq!(result.turns, 2);
    assert_eq!(result.tool_calls, 1);
    assert_eq!(result.usage, Usage::new(20, 10));
    assert_eq!(result.messages.len(), 4);

    // Second request carries the assistant tool call and its result
    let requests = mock.requests();
    assert_eq!(requests.len(), 2);
    let messages = requests[1].body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[1]["content"][0]["type"], "tool_use");
    assert_eq!(messages[2]["content"][0]["type"], "tool_result");
    assert_eq!(messages[2]["content"][0]["tool_use_id"], "toolu_1");
    assert_eq!(requests[1].body["tools"][0]["name"], "get_weather");
}

#[tokio::test]
async fn tool_loop_streams_through_openai_chat() {
    let mock = MockUpstream::scripted([
        Reply::tool_call("call_1", "get_weather", json!({ "city": "Paris" })),
        Reply::text("It is sunny in Paris."),
    ])
    .await
    .unwrap();
    let engine = harness::engine(&mock);

    let mut stream = engine.run_stream(
        request("local/llama-3.1-8b"),
        RunOptions::default().with_tools(weather_tools()),
        &RequestContext::new(),
    );

    let mut events = Vec::new();
    while let Some(event) = stream.next().await {
        events.push(event);
    }

    let stops = events.iter().filter(|e| matches!(e, StreamEvent::MessageStop)).count();
    assert_eq!(stops, 2);
    assert!(events.iter().any(|e| matches!(
        e,
        StreamEvent::ToolCall { name, is_error: false, .. } if name == "get_weather"
    )));
    assert!(matches!(events.last(), Some(StreamEvent::MessageStop)));

    let result = stream.finish().await.unwrap();
    assert_eq!(result.stop, StopCause::Completed);
    assert_eq!(result.text(), "It is sunny in Paris.");

    // The tool result goes back as a `tool` role message
    let requests = mock.requests();
    let messages = requests[1].body["messages"].as_array().unwrap();
    let tool_message = messages.iter().find(|m| m["role"] == "tool").unwrap();
    assert_eq!(tool_message["tool_call_id"], "call_1");
    assert_eq!(tool_message["content"], "sunny in Paris");
}

#[tokio::test]
async fn tool_loop_over_gemini_uses_function_responses() {
    let mock = MockUpstream::scripted([
        Reply::tool_call("ignored", "get_weather", json!({ "city": "Paris" })),
        Reply::text("It is sunny in Paris."),
    ])
    .await
    .unwrap();
    let engine = harness::engine(&mock);

    let result = engine
        .run(
            request("gemini/gemini-2.5-flash"),
            RunOptions::default().with_tools(weather_tools()),
            &RequestContext::new(),
        )
        .await
        .unwrap();
    assert_eq!(result.stop, StopCause::Completed);

    let requests = mock.requests();
    let contents = requests[1].body["contents"].as_array().unwrap();
    let response_part = contents
        .iter()
        .flat_map(|c| c["parts"].as_array().cloned().unwrap_or_default())
        .find(|p| p.get("functionResponse").is_some())
        .unwrap();
    assert_eq!(response_part["functionResponse"]["name"], "get_weather");
}

#[tokio::test]
async fn configured_budget_limits_an_endless_tool_loop() {
    let mock = MockUpstream::scripted((0..10).map(|i| {
        Reply::tool_call(&format!("call_{i}"), "get_weather", json!({ "city": "Paris" }))
    }))
    .await
    .unwrap();
    let config = ConfigBuilder::new().with_mock(&mock).with_run(2, 10).build();
    let engine = Engine::from_config(&config).unwrap();

    let result = engine
        .run(
            request("gpt/gpt-5"),
            engine.run_options().with_tools(weather_tools()),
            &RequestContext::new(),
        )
        .await
        .unwrap();

    assert_eq!(result.stop, StopCause::MaxToolCalls);
    assert_eq!(result.tool_calls, 2);
    assert_eq!(mock.request_count(), 2);
}

#[tokio::test]
async fn over_budget_calls_get_the_limit_message() {
    let mock = MockUpstream::scripted([Reply::tool_call("call_1", "get_weather", json!({ "city": "Paris" }))])
        .await
        .unwrap();
    let engine = harness::engine(&mock);

    let result = engine
        .run(
            request("claude/claude-sonnet-4-5"),
            RunOptions::default().with_tools(weather_tools()).max_tool_calls(0),
            &RequestContext::new(),
        )
        .await
        .unwrap();

    assert_eq!(result.stop, StopCause::MaxToolCalls);
    assert_eq!(result.tool_calls, 0);
    let Some(ContentBlock::ToolResult { content, is_error, .. }) = result.messages.last().and_then(|m| m.content.first())
    else {
        panic!("expected a tool result");
    };
    assert!(*is_error);
    assert_eq!(content[0].as_text(), Some(TOOL_LIMIT_MESSAGE));
}
