use std::time::Duration;

use aipia::constants;
use aipia::web_server::{
    accept_frame, answer_pending, build_router, AppState, ErrorKind, FrameOutcome, ServerEvent,
};
use aipia::{ChatSession, CompletionClient, Role};
use axum::http::StatusCode;
use axum_test::{TestServer, WsMessage};
use serde_json::{json, Value};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

const MODEL: &str = "llama-3.3-70b-versatile";

fn client_for(uri: &str) -> CompletionClient {
    CompletionClient::new(format!("{uri}/v1/chat/completions"), "gsk_test").unwrap()
}

fn reply(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{"message": {"role": "assistant", "content": content}}]
    }))
}

fn socket_server(remote_uri: &str) -> TestServer {
    let state = AppState::new(client_for(remote_uri), MODEL, "You plan trips.");
    TestServer::builder()
        .http_transport()
        .build(build_router(state))
        .unwrap()
}

#[tokio::test]
async fn test_index_renders_chat_page() {
    let state = AppState::new(client_for("http://127.0.0.1:9"), MODEL, constants::SYSTEM_PROMPT);
    let server = TestServer::new(build_router(state)).unwrap();

    let response = server.get("/").await;
    response.assert_status_ok();
    let html = response.text();
    assert!(html.contains("<title>Aipia</title>"));
    assert!(html.contains(constants::APP_CAPTION));
    assert!(html.contains(constants::INPUT_PLACEHOLDER));
    // The instruction is sent to the model, never rendered.
    assert!(!html.contains("専属AIコンシェルジュ"));
}

#[tokio::test]
async fn test_static_assets_and_missing_files() {
    let state = AppState::new(client_for("http://127.0.0.1:9"), MODEL, constants::SYSTEM_PROMPT);
    let server = TestServer::new(build_router(state)).unwrap();

    server.get("/static/chat.js").await.assert_status_ok();
    server
        .get("/static/does-not-exist.js")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[test_log::test(tokio::test)]
async fn test_socket_sends_history_then_turns_in_order() {
    let remote = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(reply("**Day 1**: Fushimi Inari"))
        .expect(1)
        .mount(&remote)
        .await;
    let server = socket_server(&remote.uri());

    let mut ws = server.get_websocket("/ws").await.into_websocket().await;
    assert_eq!(ws.receive_json::<Value>().await, json!({"type": "history", "turns": []}));

    ws.send_json(&json!({"type": "submit", "content": "Plan a 3-day trip to Kyoto"}))
        .await;
    assert_eq!(
        ws.receive_json::<Value>().await,
        json!({"type": "turn", "role": "user", "content": "Plan a 3-day trip to Kyoto"})
    );
    assert_eq!(
        ws.receive_json::<Value>().await,
        json!({
            "type": "turn",
            "role": "assistant",
            "content": "**Day 1**: Fushimi Inari",
            "html": "<p><strong>Day 1</strong>: Fushimi Inari</p>\n"
        })
    );
}

#[tokio::test]
async fn test_socket_shows_user_turn_while_reply_is_pending() {
    let remote = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(reply("Day 1: ...").set_delay(Duration::from_secs(3)))
        .expect(1)
        .mount(&remote)
        .await;
    let server = socket_server(&remote.uri());

    let mut ws = server.get_websocket("/ws").await.into_websocket().await;
    let _history: Value = ws.receive_json().await;
    ws.send_json(&json!({"type": "submit", "content": "Kyoto"})).await;

    let user_turn = tokio::time::timeout(Duration::from_secs(1), ws.receive_json::<Value>())
        .await
        .expect("user turn should arrive before the model replies");
    assert_eq!(user_turn["role"], "user");
    assert_eq!(user_turn["content"], "Kyoto");

    let assistant_turn: Value = ws.receive_json().await;
    assert_eq!(assistant_turn["role"], "assistant");
}

#[tokio::test]
async fn test_socket_skips_blank_and_binary_frames() {
    let remote = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(reply("Sapporo it is"))
        .expect(1)
        .mount(&remote)
        .await;
    let server = socket_server(&remote.uri());

    let mut ws = server.get_websocket("/ws").await.into_websocket().await;
    let _history: Value = ws.receive_json().await;

    ws.send_json(&json!({"type": "submit", "content": "   "})).await;
    ws.send_message(WsMessage::Binary(vec![1, 2, 3].into())).await;
    ws.send_json(&json!({"type": "submit", "content": "Hokkaido"})).await;

    // Nothing came back for the skipped frames: the next event is the real submission.
    let first: Value = ws.receive_json().await;
    assert_eq!(first, json!({"type": "turn", "role": "user", "content": "Hokkaido"}));
    let second: Value = ws.receive_json().await;
    assert_eq!(second["content"], "Sapporo it is");
}

#[tokio::test]
async fn test_socket_reports_bad_frame_and_remote_failure() {
    let remote = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "5"))
        .expect(1)
        .mount(&remote)
        .await;
    let server = socket_server(&remote.uri());

    let mut ws = server.get_websocket("/ws").await.into_websocket().await;
    let _history: Value = ws.receive_json().await;

    ws.send_text("not json").await;
    let bad: Value = ws.receive_json().await;
    assert_eq!(bad["type"], "error");
    assert_eq!(bad["kind"], "bad_frame");

    ws.send_json(&json!({"type": "submit", "content": "Okinawa"})).await;
    let user: Value = ws.receive_json().await;
    assert_eq!(user["role"], "user");
    let failure: Value = ws.receive_json().await;
    assert_eq!(failure["type"], "error");
    assert_eq!(failure["kind"], "rate_limit");
    assert_eq!(failure["retry_after_secs"], 5);
}

#[tokio::test]
async fn test_each_socket_gets_its_own_session() {
    let remote = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(reply("ok"))
        .expect(1)
        .mount(&remote)
        .await;
    let server = socket_server(&remote.uri());

    let mut first = server.get_websocket("/ws").await.into_websocket().await;
    let _history: Value = first.receive_json().await;
    first.send_json(&json!({"type": "submit", "content": "Nagano"})).await;
    let _user: Value = first.receive_json().await;
    let _reply: Value = first.receive_json().await;

    let mut second = server.get_websocket("/ws").await.into_websocket().await;
    assert_eq!(
        second.receive_json::<Value>().await,
        json!({"type": "history", "turns": []})
    );
}

#[tokio::test]
async fn test_answer_pending_appends_reply_after_accept() {
    let remote = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(reply("Day 1: ..."))
        .expect(1)
        .mount(&remote)
        .await;
    let client = client_for(&remote.uri());
    let mut session = ChatSession::new("prompt");

    let outcome = accept_frame(&mut session, r#"{"type":"submit","content":"Kyoto"}"#);
    assert!(matches!(outcome, FrameOutcome::Accepted(ServerEvent::Turn(_))));
    // Accepting alone never reaches the model.
    assert!(remote.received_requests().await.unwrap().is_empty());

    let event = answer_pending(&mut session, &client, MODEL).await;
    assert!(matches!(&event, ServerEvent::Turn(view) if view.role == Role::Assistant));
    assert_eq!(session.visible_turns().len(), 2);
}

#[tokio::test]
async fn test_answer_pending_failure_keeps_user_turn() {
    let remote = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&remote)
        .await;
    let client = client_for(&remote.uri());
    let mut session = ChatSession::new("prompt");

    accept_frame(&mut session, r#"{"type":"submit","content":"Okinawa"}"#);
    let event = answer_pending(&mut session, &client, MODEL).await;

    assert!(matches!(
        event,
        ServerEvent::Error {
            kind: ErrorKind::Status,
            ..
        }
    ));
    assert_eq!(session.visible_turns().len(), 1);
}
