// Copyright (c) 2026 Elias Bachaalany
// SPDX-License-Identifier: MIT

//! Conversation flows driven through the in-memory connector.
//!
//! The test plays the remote agent through a `MemoryPeer`.

use agentlink::transport::memory::{MemoryConnector, MemoryPeer, MemoryServer};
use agentlink::{
    AgentError, ConnectOptions, ConnectionStatus, ControlAction, ErrorKind, Message, Session,
    SessionEvent, SessionState, Tool, ToolResult, ToolServer, Transport,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// =============================================================================
// Test Helpers
// =============================================================================

const WAIT: Duration = Duration::from_secs(2);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn frame(value: Value) -> Message {
    Message::decode(&value.to_string()).expect("valid test frame")
}

fn assistant(text: &str) -> Message {
    frame(json!({
        "type": "assistant",
        "session_id": "sess_1",
        "message": {"role": "assistant", "content": [{"type": "text", "text": text}]}
    }))
}

fn result(text: &str) -> Message {
    frame(json!({
        "type": "result",
        "subtype": "success",
        "session_id": "sess_1",
        "duration_ms": 10,
        "num_turns": 1,
        "total_cost_usd": 0.001,
        "usage": {"input_tokens": 5, "output_tokens": 1},
        "result": text
    }))
}

fn tool_call(call_id: &str, tool: &str, input: Value) -> Message {
    frame(json!({
        "type": "tool_call",
        "session_id": "sess_1",
        "payload": {"callId": call_id, "toolName": tool, "input": input}
    }))
}

fn session_with(servers: Vec<ToolServer>) -> (Session, MemoryServer) {
    init_tracing();
    let (connector, server) = MemoryConnector::new();
    let mut builder = Session::builder()
        .url("ws://agent.test/v1/session")
        .token("t0k3n")
        .model("sonnet")
        .connector(connector);
    for s in servers {
        builder = builder.tool_server(s);
    }
    (builder.build().expect("build session"), server)
}

/// Accept the connection, check the init frame, and acknowledge it.
async fn accept_and_ready(server: &mut MemoryServer) -> (MemoryPeer, Message) {
    let mut peer = server.accept().await.expect("connection");
    let init = peer.recv().await.expect("init frame");
    peer.send(&frame(json!({
        "type": "system",
        "subtype": "init",
        "session_id": "outer",
        "data": {"session_id": "sess_1"}
    })))
    .unwrap();
    (peer, init)
}

async fn ready_session(servers: Vec<ToolServer>) -> (Session, MemoryPeer) {
    let (session, mut server) = session_with(servers);
    let (connected, (peer, _init)) = tokio::join!(session.connect(), accept_and_ready(&mut server));
    connected.expect("connect");
    (session, peer)
}

async fn wait_buffered(session: &Session, n: usize) {
    tokio::time::timeout(WAIT, async {
        while session.buffered_len().await < n {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("messages were not buffered in time");
}

fn math_server(calls: Arc<Mutex<Vec<Value>>>) -> ToolServer {
    ToolServer::new("math").tool(
        Tool::new("add")
            .description("Add two integers")
            .schema(json!({
                "type": "object",
                "properties": {"a": {"type": "integer"}, "b": {"type": "integer"}},
                "required": ["a", "b"]
            }))
            .handler(move |input| {
                calls.lock().unwrap().push(input.clone());
                let a: i64 = agentlink::tools::arg(input, "a")?;
                let b: i64 = agentlink::tools::arg(input, "b")?;
                Ok(ToolResult::text(format!("{}", a + b)))
            }),
    )
}

/// Proves nothing else was written: a marker ping round-trips first.
async fn assert_no_more_frames(session: &Session, peer: &mut MemoryPeer) {
    peer.send(&Message::ping(Some(99))).unwrap();
    let marker = tokio::time::timeout(WAIT, session.receive())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(marker, Message::ping(Some(99)));
    assert!(peer.try_recv_raw().is_none());
}

// =============================================================================
// Handshake
// =============================================================================

#[tokio::test]
async fn test_init_carries_options_and_tool_descriptors() {
    let (session, mut server) = session_with(vec![math_server(Arc::default())]);
    let (connected, (peer, init)) =
        tokio::join!(session.connect(), accept_and_ready(&mut server));
    connected.unwrap();

    assert_eq!(peer.target().token.as_deref(), Some("t0k3n"));
    let Message::Init(init) = init else {
        panic!("Expected init, got {init:?}");
    };
    assert_eq!(init.payload.options["model"], "sonnet");
    assert_eq!(init.payload.tool_servers.len(), 1);
    let descriptor = &init.payload.tool_servers[0];
    assert_eq!(descriptor["type"], "sdk");
    assert_eq!(descriptor["tools"][0]["name"], "add");
    assert!(descriptor["tools"][0].get("handler").is_none());

    assert_eq!(session.session_id().await, "sess_1");
    assert_eq!(session.state().await, SessionState::Ready);
    assert_eq!(session.status().await, ConnectionStatus::Connected);
}

#[tokio::test]
async fn test_connect_failure_then_retry() {
    init_tracing();
    let (connector, mut server) = MemoryConnector::new();
    connector.refuse_next(AgentError::connection("connection refused"));
    let session = Session::builder()
        .url("ws://agent.test")
        .connector(connector)
        .build()
        .unwrap();
    let mut events = session.subscribe();

    let err = session.connect().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert_eq!(session.state().await, SessionState::Error);

    let reported = tokio::time::timeout(WAIT, async {
        loop {
            if let SessionEvent::Error(e) = events.recv().await.unwrap() {
                return e;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(reported.kind(), ErrorKind::Connection);

    let (connected, _) = tokio::join!(session.connect(), accept_and_ready(&mut server));
    connected.unwrap();
    assert_eq!(session.state().await, SessionState::Ready);
}

#[tokio::test]
async fn test_send_auto_connects_and_carries_session_id() {
    let (session, mut server) = session_with(vec![]);

    let agent = tokio::spawn(async move {
        let (mut peer, _) = accept_and_ready(&mut server).await;
        let user = peer.recv().await.unwrap();
        (peer, user)
    });

    let id = session.send("hello").await.unwrap();
    let (_peer, user) = agent.await.unwrap();
    let Message::User(user) = user else {
        panic!("Expected user message");
    };
    assert_eq!(user.id, id);
    assert_eq!(user.session_id, "sess_1");
    assert_eq!(user.message.content, json!("hello"));
}

// =============================================================================
// Turns
// =============================================================================

#[tokio::test]
async fn test_basic_turn() {
    let (session, mut peer) = ready_session(vec![]).await;
    assert_eq!(session.state().await, SessionState::Ready);

    session.send("2+2?").await.unwrap();
    assert_eq!(session.state().await, SessionState::Processing);
    assert_eq!(peer.recv().await.unwrap().text().as_deref(), Some("2+2?"));

    peer.send(&result("4")).unwrap();
    let message = session.receive_timeout(WAIT).await.unwrap();
    assert_eq!(session.state().await, SessionState::Ready);

    let Message::Result(done) = &message else {
        panic!("Expected result, got {message:?}");
    };
    assert_eq!(done.result.as_deref(), Some("4"));
    assert_eq!(done.usage.total(), 6);
}

#[tokio::test]
async fn test_receive_preserves_arrival_order() {
    let (session, peer) = ready_session(vec![]).await;

    let texts: Vec<String> = (0..20).map(|i| format!("part {i}")).collect();
    for text in &texts {
        peer.send(&assistant(text)).unwrap();
    }
    wait_buffered(&session, texts.len()).await;

    for expected in &texts {
        let message = session.receive().await.unwrap();
        assert_eq!(message.text().as_deref(), Some(expected.as_str()));
    }
    assert_eq!(session.buffered_len().await, 0);
}

#[tokio::test]
async fn test_pending_receive_resolved_by_next_message() {
    let (session, peer) = ready_session(vec![]).await;
    let session = Arc::new(session);

    let waiter = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.receive().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    peer.send(&assistant("first")).unwrap();
    peer.send(&assistant("second")).unwrap();

    let first = tokio::time::timeout(WAIT, waiter).await.unwrap().unwrap().unwrap();
    assert_eq!(first.text().as_deref(), Some("first"));
    let second = session.receive_timeout(WAIT).await.unwrap();
    assert_eq!(second.text().as_deref(), Some("second"));
}

#[tokio::test]
async fn test_send_and_collect() {
    let (session, mut server) = session_with(vec![]);

    let agent = tokio::spawn(async move {
        let (mut peer, _) = accept_and_ready(&mut server).await;
        peer.recv().await.unwrap();
        peer.send(&assistant("thinking")).unwrap();
        peer.send(&result("done")).unwrap();
        peer
    });

    let turn = session.send_and_collect("go").await.unwrap();
    let _peer = agent.await.unwrap();
    assert_eq!(turn.len(), 2);
    assert_eq!(turn[0].text().as_deref(), Some("thinking"));
    assert!(turn[1].is_result());
}

// =============================================================================
// Tools
// =============================================================================

#[tokio::test]
async fn test_tool_round_trip() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let (session, mut peer) = ready_session(vec![math_server(calls.clone())]).await;
    let mut events = session.subscribe();

    session.send("add 7 and 15").await.unwrap();
    peer.recv().await.unwrap();

    peer.send(&tool_call("c1", "add", json!({"a": 7, "b": 15}))).unwrap();
    let reply = tokio::time::timeout(WAIT, peer.recv()).await.unwrap().unwrap();
    let Message::ToolResult(reply) = reply else {
        panic!("Expected tool result, got {reply:?}");
    };
    assert_eq!(reply.payload.call_id, "c1");
    assert!(!reply.payload.result.is_error);
    assert!(reply.payload.result.text_content().contains("22"));
    assert_eq!(*calls.lock().unwrap(), vec![json!({"a": 7, "b": 15})]);

    peer.send(&result("22")).unwrap();
    let message = session.receive_timeout(WAIT).await.unwrap();
    assert!(message.is_result(), "tool calls must not reach receive()");

    let mut states = Vec::new();
    while let Ok(event) = events.receiver.try_recv() {
        match event {
            SessionEvent::StateChanged(state) => states.push(state),
            SessionEvent::Message(Message::ToolCall(_)) => panic!("tool call was reported"),
            _ => {}
        }
    }
    assert_eq!(
        states,
        vec![
            SessionState::Processing,
            SessionState::WaitingTool,
            SessionState::Processing,
            SessionState::Ready
        ]
    );

    assert_no_more_frames(&session, &mut peer).await;
}

#[tokio::test]
async fn test_unknown_tool_gets_error_result() {
    let (session, mut peer) = ready_session(vec![]).await;

    peer.send(&tool_call("c7", "teleport", json!({}))).unwrap();
    let Message::ToolResult(reply) = peer.recv().await.unwrap() else {
        panic!("Expected tool result");
    };
    assert_eq!(reply.payload.call_id, "c7");
    assert!(reply.payload.result.is_error);
    assert!(reply.payload.result.text_content().contains("teleport"));

    assert_no_more_frames(&session, &mut peer).await;
}

#[tokio::test]
async fn test_failing_handler_gets_exactly_one_error_result() {
    let server = ToolServer::new("flaky")
        .tool(Tool::new("explode").handler(|_| panic!("handler exploded")))
        .tool(Tool::new("refuse").handler(|_| Err(agentlink::ToolError::failed("not today"))));
    let (session, mut peer) = ready_session(vec![server]).await;
    let mut events = session.subscribe();

    let cases = [
        ("c1", "explode", "handler exploded"),
        ("c2", "refuse", "not today"),
    ];
    for (call_id, tool, needle) in cases {
        peer.send(&tool_call(call_id, tool, json!({}))).unwrap();
        let Message::ToolResult(reply) = peer.recv().await.unwrap() else {
            panic!("Expected tool result");
        };
        assert_eq!(reply.payload.call_id, call_id);
        assert!(reply.payload.result.is_error);
        assert!(reply.payload.result.text_content().contains(needle));
    }

    assert_no_more_frames(&session, &mut peer).await;
    assert_ne!(session.state().await, SessionState::Error);

    let mut tool_errors = Vec::new();
    while let Ok(event) = events.receiver.try_recv() {
        if let SessionEvent::Error(err) = event {
            assert_eq!(err.kind(), ErrorKind::ToolExecution);
            tool_errors.push(err.to_string());
        }
    }
    assert_eq!(tool_errors.len(), 2);
    assert!(tool_errors[0].contains("handler exploded"));
    assert!(tool_errors[1].contains("not today"));
}

// =============================================================================
// Transport Behavior
// =============================================================================

#[tokio::test]
async fn test_disconnected_send_is_flushed_in_order() {
    init_tracing();
    let (connector, mut server) = MemoryConnector::new();
    let (transport, _events) =
        Transport::new(ConnectOptions::new("ws://agent.test"), Arc::new(connector));

    let a = Message::user("sess_1", json!("msgA"));
    let b = Message::user("sess_1", json!("msgB"));
    transport.send(&a).await.unwrap();
    transport.send(&b).await.unwrap();
    assert_eq!(transport.status().await, ConnectionStatus::Disconnected);
    assert_eq!(transport.queued_len().await, 2);

    transport.connect().await.unwrap();
    let mut peer = server.accept().await.unwrap();
    assert_eq!(peer.recv().await.unwrap(), a);
    assert_eq!(peer.recv().await.unwrap(), b);
    assert!(peer.try_recv_raw().is_none());
}

#[tokio::test]
async fn test_malformed_frame_is_reported_and_skipped() {
    let (session, peer) = ready_session(vec![]).await;
    let mut events = session.subscribe();

    peer.send(&assistant("before")).unwrap();
    peer.send_raw("{\"type\": \"assistant\", \"message\": ").unwrap();
    peer.send_raw(r#"{"type": "hologram"}"#).unwrap();
    peer.send(&assistant("after")).unwrap();

    assert_eq!(
        session.receive_timeout(WAIT).await.unwrap().text().as_deref(),
        Some("before")
    );
    assert_eq!(
        session.receive_timeout(WAIT).await.unwrap().text().as_deref(),
        Some("after")
    );
    assert_eq!(session.status().await, ConnectionStatus::Connected);
    assert_eq!(session.state().await, SessionState::Ready);

    let mut protocol_errors = 0;
    while let Ok(event) = events.receiver.try_recv() {
        if let SessionEvent::Error(err) = event {
            assert_eq!(err.kind(), ErrorKind::Protocol);
            protocol_errors += 1;
        }
    }
    assert_eq!(protocol_errors, 2);
}

// =============================================================================
// Close
// =============================================================================

#[tokio::test]
async fn test_close_keeps_buffered_messages() {
    let (session, mut peer) = ready_session(vec![]).await;
    let mut events = session.subscribe();

    peer.send(&assistant("late")).unwrap();
    wait_buffered(&session, 1).await;

    session.close().await;
    assert_eq!(
        peer.recv().await.unwrap(),
        Message::control(ControlAction::Close)
    );
    assert_eq!(session.receive().await.unwrap().text().as_deref(), Some("late"));
    assert!(matches!(
        session.receive().await,
        Err(AgentError::SessionClosed)
    ));

    let mut closed = false;
    while let Ok(event) = events.receiver.try_recv() {
        closed |= matches!(event, SessionEvent::Closed);
    }
    assert!(closed);

    // Closing twice is a no-op.
    session.close().await;
    assert_eq!(session.state().await, SessionState::Completed);
}
