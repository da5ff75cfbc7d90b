// Copyright (c) 2026 Elias Bachaalany
// SPDX-License-Identifier: MIT

//! Session management for the agentlink SDK.
//!
//! A session is one conversation over one [`Transport`]. It performs the
//! init handshake, hands inbound messages to [`Session::receive`] in arrival
//! order, and answers tool calls from its [`ToolRegistry`] without exposing
//! them to the caller.

use crate::error::{AgentError, Result};
use crate::protocol::{ChatMessage, ControlAction, Message, UserMessage};
use crate::tools::ToolRegistry;
use crate::transport::{Connector, Transport, TransportEvent, WebSocketConnector};
use crate::types::{
    ConnectOptions, ConnectionStatus, McpServerConfig, MessageOptions, PermissionMode,
    SessionOptions, SessionState, ToolServer,
};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tracing::{debug, warn};

// =============================================================================
// Events
// =============================================================================

/// Something observable happened on the session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// An inbound message was delivered. Tool calls are not reported.
    Message(Message),
    StateChanged(SessionState),
    StatusChanged(ConnectionStatus),
    /// A contained failure: connect failure, undecodable frame, failed tool reply.
    Error(AgentError),
    Closed,
}

/// Handler for session events.
pub type EventHandler = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// A subscription to session events.
///
/// Events are delivered via the broadcast channel receiver.
pub struct EventSubscription {
    pub receiver: broadcast::Receiver<SessionEvent>,
}

impl EventSubscription {
    /// Receive the next event.
    pub async fn recv(&mut self) -> std::result::Result<SessionEvent, broadcast::error::RecvError> {
        self.receiver.recv().await
    }
}

// =============================================================================
// Shared State
// =============================================================================

struct Shared {
    state: SessionState,
    session_id: String,
    ready: bool,
    closed: bool,
    buffer: VecDeque<Message>,
    pending: Option<oneshot::Sender<Result<Message>>>,
    ready_tx: Option<oneshot::Sender<Result<()>>>,
    handlers: HashMap<u64, EventHandler>,
    next_handler_id: u64,
}

/// Returns `Some(session_id)` if the message completes the init handshake.
fn readiness_ack(message: &Message) -> Option<Option<String>> {
    match message {
        Message::Control(control)
            if matches!(
                control.payload.action,
                ControlAction::Ready | ControlAction::SessionInfo
            ) =>
        {
            Some(
                control
                    .payload
                    .data
                    .get("session_id")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            )
        }
        Message::System(system) if system.is_init() => {
            Some(system.resolved_session_id().map(str::to_string))
        }
        _ => None,
    }
}

fn deliver(shared: &mut Shared, message: Message) {
    shared.buffer.push_back(message);
    let Some(tx) = shared.pending.take() else {
        return;
    };
    if let Some(next) = shared.buffer.pop_front() {
        // Receiver gone (timed out): keep the message for the next receive.
        if let Err(Ok(unsent)) = tx.send(Ok(next)) {
            shared.buffer.push_front(unsent);
        }
    }
}

struct Inner {
    shared: Mutex<Shared>,
    transport: Transport,
    registry: ToolRegistry,
    options: SessionOptions,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl Inner {
    fn emit(&self, shared: &Shared, event: SessionEvent) {
        let _ = self.event_tx.send(event.clone());
        for handler in shared.handlers.values() {
            handler(&event);
        }
    }

    fn set_state(&self, shared: &mut Shared, state: SessionState) {
        if shared.state == state || shared.state == SessionState::Completed {
            return;
        }
        debug!(from = %shared.state, to = %state, "Session state changed");
        shared.state = state;
        self.emit(shared, SessionEvent::StateChanged(state));
    }

    async fn handle(&self, event: TransportEvent) {
        match event {
            TransportEvent::Message(message) => self.route(message).await,
            TransportEvent::StatusChanged(status) => {
                let shared = self.shared.lock().await;
                self.emit(&shared, SessionEvent::StatusChanged(status));
            }
            TransportEvent::Error(err) => {
                let shared = self.shared.lock().await;
                self.emit(&shared, SessionEvent::Error(err));
            }
            TransportEvent::Closed => self.remote_closed().await,
        }
    }

    async fn route(&self, message: Message) {
        let mut shared = self.shared.lock().await;

        if shared.closed {
            deliver(&mut shared, message);
            return;
        }

        if !shared.ready && shared.ready_tx.is_some() {
            if let Some(session_id) = readiness_ack(&message) {
                if let Some(id) = session_id {
                    if shared.session_id.is_empty() {
                        shared.session_id = id;
                    }
                }
                debug!(session_id = %shared.session_id, "Session ready");
                shared.ready = true;
                self.set_state(&mut shared, SessionState::Ready);
                if let Some(tx) = shared.ready_tx.take() {
                    let _ = tx.send(Ok(()));
                }
                return;
            }

            if let Message::Error(err) = &message {
                warn!(error = %err.message, "Session rejected during init");
                let failure = AgentError::Session(err.message.clone());
                self.emit(&shared, SessionEvent::Error(failure.clone()));
                if let Some(tx) = shared.ready_tx.take() {
                    let _ = tx.send(Err(failure));
                }
                self.set_state(&mut shared, SessionState::Error);
            }
        }

        if let Message::ToolCall(call) = &message {
            self.set_state(&mut shared, SessionState::WaitingTool);
            let session_id = if shared.session_id.is_empty() {
                call.session_id.clone()
            } else {
                Some(shared.session_id.clone())
            };
            drop(shared);

            let result = self.registry.dispatch(&call.payload);
            let failure = result
                .is_error
                .then(|| AgentError::ToolExecution(result.text_content()));
            let reply = Message::tool_result(session_id, call.payload.call_id.clone(), result);
            let sent = self.transport.send(&reply).await;

            let mut shared = self.shared.lock().await;
            if let Some(failure) = failure {
                self.emit(&shared, SessionEvent::Error(failure));
            }
            if let Err(err) = sent {
                warn!(call_id = %call.payload.call_id, error = %err, "Tool result not sent");
                self.emit(&shared, SessionEvent::Error(err));
            }
            if shared.state == SessionState::WaitingTool {
                self.set_state(&mut shared, SessionState::Processing);
            }
            return;
        }

        if message.is_result() {
            self.set_state(&mut shared, SessionState::Ready);
        }

        deliver(&mut shared, message.clone());
        self.emit(&shared, SessionEvent::Message(message));
    }

    async fn remote_closed(&self) {
        let mut shared = self.shared.lock().await;
        if shared.closed {
            return;
        }
        debug!("Session closed by remote");
        shared.closed = true;
        shared.ready = false;
        if let Some(tx) = shared.ready_tx.take() {
            let failure =
                AgentError::Session("connection closed before the session was ready".into());
            self.emit(&shared, SessionEvent::Error(failure.clone()));
            let _ = tx.send(Err(failure));
        }
        if let Some(tx) = shared.pending.take() {
            let _ = tx.send(Err(AgentError::SessionClosed));
        }
        self.set_state(&mut shared, SessionState::Completed);
        self.emit(&shared, SessionEvent::Closed);
    }
}

async fn run_event_loop(inner: Weak<Inner>, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.handle(event).await;
    }
    debug!("Session event loop stopped");
}

// =============================================================================
// Session
// =============================================================================

/// A conversation with the remote agent.
///
/// # Example
///
/// ```no_run
/// use agentlink::{Message, Session};
///
/// #[tokio::main]
/// async fn main() -> agentlink::Result<()> {
///     let session = Session::builder()
///         .url("wss://agent.example.com/v1/session")
///         .token("secret")
///         .model("sonnet")
///         .build()?;
///
///     session.send("What is 2+2?").await?;
///     loop {
///         let message = session.receive().await?;
///         if let Some(text) = message.text() {
///             println!("{text}");
///         }
///         if message.is_result() {
///             break;
///         }
///     }
///     session.close().await;
///     Ok(())
/// }
/// ```
pub struct Session {
    inner: Arc<Inner>,
    lifecycle: Mutex<()>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
}

impl Session {
    /// Create a session over the given connector.
    pub fn new(
        target: ConnectOptions,
        options: SessionOptions,
        connector: Arc<dyn Connector>,
    ) -> Result<Self> {
        if target.url.is_empty() {
            return Err(AgentError::validation("Session url is required"));
        }
        target.target_url()?;

        let registry = ToolRegistry::from_servers(&options.tool_servers);
        let (transport, events_rx) = Transport::new(target, connector);
        let (event_tx, _) = broadcast::channel(1024);

        Ok(Self {
            inner: Arc::new(Inner {
                shared: Mutex::new(Shared {
                    state: SessionState::Idle,
                    session_id: String::new(),
                    ready: false,
                    closed: false,
                    buffer: VecDeque::new(),
                    pending: None,
                    ready_tx: None,
                    handlers: HashMap::new(),
                    next_handler_id: 1,
                }),
                transport,
                registry,
                options,
                event_tx,
            }),
            lifecycle: Mutex::new(()),
            events_rx: Mutex::new(Some(events_rx)),
        })
    }

    /// Create a session builder for fluent configuration.
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    // =========================================================================
    // Session Properties
    // =========================================================================

    pub async fn state(&self) -> SessionState {
        self.inner.shared.lock().await.state
    }

    pub async fn status(&self) -> ConnectionStatus {
        self.inner.transport.status().await
    }

    /// Server-assigned id. Empty until the handshake completes.
    pub async fn session_id(&self) -> String {
        self.inner.shared.lock().await.session_id.clone()
    }

    /// Messages waiting for [`receive`](Self::receive).
    pub async fn buffered_len(&self) -> usize {
        self.inner.shared.lock().await.buffer.len()
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.inner.registry
    }

    // =========================================================================
    // Event Handling
    // =========================================================================

    /// Subscribe to session events.
    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            receiver: self.inner.event_tx.subscribe(),
        }
    }

    /// Register a callback-based event handler.
    ///
    /// Returns an unsubscribe closure. Handlers run on the session's event
    /// stream and must not block.
    pub async fn on<F>(&self, handler: F) -> impl FnOnce()
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let mut shared = self.inner.shared.lock().await;
        let id = shared.next_handler_id;
        shared.next_handler_id += 1;
        shared.handlers.insert(id, Arc::new(handler));

        let inner = Arc::downgrade(&self.inner);
        move || {
            tokio::spawn(async move {
                if let Some(inner) = inner.upgrade() {
                    inner.shared.lock().await.handlers.remove(&id);
                }
            });
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Connect and complete the init handshake.
    ///
    /// Returns immediately once the session is ready. Fails with the
    /// transport's error if the connection cannot be opened, or with a
    /// session error if the server rejects the session.
    pub async fn connect(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;

        if let Some(events) = self.events_rx.lock().await.take() {
            tokio::spawn(run_event_loop(Arc::downgrade(&self.inner), events));
        }

        let ready_rx = {
            let mut shared = self.inner.shared.lock().await;
            if shared.closed {
                return Err(AgentError::SessionClosed);
            }
            if shared.ready {
                return Ok(());
            }
            let (tx, rx) = oneshot::channel();
            shared.ready_tx = Some(tx);
            self.inner.set_state(&mut shared, SessionState::Initializing);
            rx
        };

        if let Err(err) = self.open().await {
            let mut shared = self.inner.shared.lock().await;
            shared.ready_tx = None;
            self.inner.set_state(&mut shared, SessionState::Error);
            return Err(err);
        }

        ready_rx.await?
    }

    async fn open(&self) -> Result<()> {
        self.inner.transport.connect().await?;

        let options = serde_json::to_value(&self.inner.options)?;
        let servers = self
            .inner
            .options
            .tool_servers
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        self.inner
            .transport
            .send(&Message::init(options, servers))
            .await
    }

    /// Close the session.
    ///
    /// Sends a best-effort close notice, disconnects, and fails any pending
    /// [`receive`](Self::receive) with [`AgentError::SessionClosed`].
    /// Already buffered messages stay readable.
    pub async fn close(&self) {
        {
            let shared = self.inner.shared.lock().await;
            if shared.closed {
                return;
            }
        }

        if self.inner.transport.status().await == ConnectionStatus::Connected {
            if let Err(err) = self
                .inner
                .transport
                .send(&Message::control(ControlAction::Close))
                .await
            {
                debug!(error = %err, "Close notice not sent");
            }
        }
        self.inner.transport.disconnect().await;

        let mut shared = self.inner.shared.lock().await;
        if shared.closed {
            return;
        }
        shared.closed = true;
        shared.ready = false;
        if let Some(tx) = shared.ready_tx.take() {
            let _ = tx.send(Err(AgentError::SessionClosed));
        }
        if let Some(tx) = shared.pending.take() {
            let _ = tx.send(Err(AgentError::SessionClosed));
        }
        self.inner.set_state(&mut shared, SessionState::Completed);
        self.inner.emit(&shared, SessionEvent::Closed);
    }

    // =========================================================================
    // Messaging
    // =========================================================================

    /// Send a user message, connecting first if needed.
    ///
    /// Returns the message id once the message is handed to the transport.
    /// Replies arrive through [`receive`](Self::receive).
    pub async fn send(&self, options: impl Into<MessageOptions>) -> Result<String> {
        self.connect().await?;
        let options = options.into();

        let (message, id, previous) = {
            let mut shared = self.inner.shared.lock().await;
            if shared.closed {
                return Err(AgentError::SessionClosed);
            }
            let previous = shared.state;
            self.inner.set_state(&mut shared, SessionState::Processing);
            let id = uuid::Uuid::new_v4().to_string();
            let message = Message::User(UserMessage {
                id: id.clone(),
                session_id: shared.session_id.clone(),
                message: ChatMessage::new("user", options.content),
                parent_tool_use_id: options.parent_tool_use_id,
            });
            (message, id, previous)
        };

        if let Err(err) = self.inner.transport.send(&message).await {
            let mut shared = self.inner.shared.lock().await;
            if shared.state == SessionState::Processing {
                self.inner.set_state(&mut shared, previous);
            }
            return Err(err);
        }
        Ok(id)
    }

    /// Wait for the next inbound message.
    ///
    /// Buffered messages are returned oldest first. Only one call may wait
    /// at a time; a second concurrent call fails with a validation error.
    pub async fn receive(&self) -> Result<Message> {
        let rx = {
            let mut shared = self.inner.shared.lock().await;
            if let Some(message) = shared.buffer.pop_front() {
                return Ok(message);
            }
            if shared.closed {
                return Err(AgentError::SessionClosed);
            }
            if let Some(pending) = &shared.pending {
                if !pending.is_closed() {
                    return Err(AgentError::validation("receive() is already pending"));
                }
            }
            let (tx, rx) = oneshot::channel();
            shared.pending = Some(tx);
            rx
        };

        rx.await?
    }

    /// [`receive`](Self::receive) with a deadline.
    ///
    /// A message arriving after the deadline is kept for the next receive.
    pub async fn receive_timeout(&self, timeout: Duration) -> Result<Message> {
        match tokio::time::timeout(timeout, self.receive()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(AgentError::Timeout(timeout)),
        }
    }

    /// Send a message and collect every message of the turn.
    ///
    /// Stops after the turn's result or an error message.
    pub async fn send_and_collect(
        &self,
        options: impl Into<MessageOptions>,
    ) -> Result<Vec<Message>> {
        self.send(options).await?;

        let mut turn = Vec::new();
        loop {
            let message = self.receive().await?;
            let done = matches!(message, Message::Result(_) | Message::Error(_));
            turn.push(message);
            if done {
                return Ok(turn);
            }
        }
    }

    /// Ask the server to abort the current turn, connecting first if needed.
    pub async fn interrupt(&self) -> Result<()> {
        self.connect().await?;
        self.inner
            .transport
            .send(&Message::control(ControlAction::Interrupt))
            .await
    }

    /// Send a liveness ping, connecting first if needed.
    pub async fn ping(&self) -> Result<()> {
        self.connect().await?;
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .ok()
            .map(|d| d.as_millis() as u64);
        self.inner.transport.send(&Message::ping(timestamp)).await
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("transport", &self.inner.transport)
            .field("tools", &self.inner.registry)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Session Builder
// =============================================================================

/// Builder for creating a session.
///
/// The url and token fall back to `AGENTLINK_URL` and `AGENTLINK_TOKEN`.
#[derive(Default)]
pub struct SessionBuilder {
    target: ConnectOptions,
    options: SessionOptions,
    connector: Option<Arc<dyn Connector>>,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the endpoint url (`ws://` or `wss://`).
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.target.url = url.into();
        self
    }

    /// Set the bearer credential.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.target.token = Some(token.into());
        self
    }

    /// Replace all session options.
    pub fn options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.options.model = Some(model.into());
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.options.system_prompt = Some(prompt.into());
        self
    }

    pub fn append_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.options.append_system_prompt = Some(prompt.into());
        self
    }

    pub fn max_turns(mut self, turns: u32) -> Self {
        self.options.max_turns = Some(turns);
        self
    }

    pub fn max_budget_usd(mut self, budget: f64) -> Self {
        self.options.max_budget_usd = Some(budget);
        self
    }

    pub fn max_thinking_tokens(mut self, tokens: u32) -> Self {
        self.options.max_thinking_tokens = Some(tokens);
        self
    }

    pub fn allowed_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.allowed_tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn disallowed_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.disallowed_tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn permission_mode(mut self, mode: PermissionMode) -> Self {
        self.options.permission_mode = Some(mode);
        self
    }

    pub fn cwd(mut self, cwd: impl Into<String>) -> Self {
        self.options.cwd = Some(cwd.into());
        self
    }

    /// Declare an external MCP server, passed through to the agent.
    pub fn mcp_server(mut self, name: impl Into<String>, config: McpServerConfig) -> Self {
        self.options.mcp_servers.insert(name.into(), config);
        self
    }

    /// Add an in-process tool server.
    pub fn tool_server(mut self, server: ToolServer) -> Self {
        self.options.tool_servers.push(server);
        self
    }

    /// Replace the WebSocket connector.
    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Build the session.
    pub fn build(self) -> Result<Session> {
        let mut target = self.target;
        if let Some(env) = ConnectOptions::from_env() {
            if target.url.is_empty() {
                target.url = env.url;
            }
            if target.token.is_none() {
                target.token = env.token;
            }
        }

        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(WebSocketConnector));
        Session::new(target, self.options, connector)
    }
}
