//! Session manager: owns the single live stream, its timers and the
//! session-scoped state, and publishes changes to observers.
//!
//! All mutation happens on one actor task. [`SessionManager`] is the
//! cloneable handle consumers hold; it sends commands to the actor and reads
//! published snapshots without waiting on it. Transport events and timer
//! firings reach the actor tagged with the [`ConnectionId`] of the session
//! that produced them, and anything tagged with an older session is ignored.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::classifier::{Classified, ControlFrame, FrameContext, classify};
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::log::MessageLog;
use crate::message::{ChatMessage, OutboundPayload, Role};
use crate::notice::Notice;
use crate::observer::{
    Channel, MessageCallback, MessageSubscribers, MessageSubscription, Observer, ObserverRegistry,
};
use crate::storage::DurableState;
use crate::timer::ScheduledTask;
use crate::transport::{
    CloseInfo, ConnectionId, Connector, Frame, TransportEvent, TransportEvents, TransportHandle,
};
use crate::unread::UnreadSet;

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

enum Command {
    Connect {
        hint: Option<String>,
    },
    Disconnect,
    Send {
        payload: OutboundPayload,
        respond_to: oneshot::Sender<Result<ChatMessage, SessionError>>,
    },
    Subscribe {
        callback: MessageCallback,
        respond_to: oneshot::Sender<Result<MessageSubscription, SessionError>>,
    },
    MarkAsRead {
        id: String,
    },
    MarkAllAsRead,
    Flush {
        respond_to: oneshot::Sender<()>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TimerKind {
    IdleTimeout,
    Reconnect,
}

/// State published by the actor for synchronous reads.
#[derive(Default)]
struct View {
    connected: bool,
    chat_id: Option<String>,
    log: MessageLog,
    unread: UnreadSet,
}

struct Shared {
    view: RwLock<View>,
    observers: ObserverRegistry,
    notices: broadcast::Sender<Notice>,
    durable: DurableState,
}

/// Handle to the session actor.
///
/// Construct one per application and pass clones to whoever needs it. When
/// the last clone is dropped the actor tears down any live session and
/// exits. Callbacks handed to [`observe`](Self::observe) or
/// [`subscribe`](Self::subscribe) are owned by the manager, so they must
/// capture a [`WeakSessionManager`] rather than a clone.
#[derive(Clone)]
pub struct SessionManager {
    sender: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
}

/// Non-owning handle from [`SessionManager::downgrade`]. Does not keep the
/// actor alive.
#[derive(Clone)]
pub struct WeakSessionManager {
    sender: mpsc::WeakUnboundedSender<Command>,
    shared: Weak<Shared>,
}

impl WeakSessionManager {
    /// `None` once every [`SessionManager`] is gone.
    pub fn upgrade(&self) -> Option<SessionManager> {
        Some(SessionManager {
            sender: self.sender.upgrade()?,
            shared: self.shared.upgrade()?,
        })
    }
}

impl SessionManager {
    /// Spawn the session actor. Must be called from within a tokio runtime.
    pub fn new(config: SessionConfig, connector: impl Connector, durable: DurableState) -> Self {
        let (notices, _) = broadcast::channel(config.notice_capacity.max(1));
        let shared = Arc::new(Shared {
            view: RwLock::new(View::default()),
            observers: ObserverRegistry::new(),
            notices,
            durable,
        });

        let (sender, receiver) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (timers_tx, timers_rx) = mpsc::unbounded_channel();

        let mut actor = SessionActor {
            config,
            connector: Arc::new(connector),
            shared: shared.clone(),
            commands: receiver,
            events_tx,
            events_rx,
            timers_tx,
            timers_rx,
            next_connection: 0,
            session: None,
            reconnect_attempt: 0,
        };
        tokio::spawn(async move { actor.run().await });

        Self { sender, shared }
    }

    pub fn downgrade(&self) -> WeakSessionManager {
        WeakSessionManager {
            sender: self.sender.downgrade(),
            shared: Arc::downgrade(&self.shared),
        }
    }

    fn enqueue(&self, command: Command) -> Result<(), SessionError> {
        self.sender.send(command).map_err(|_| SessionError::ActorGone)
    }

    // ── Lifecycle ──

    /// Tear down any existing session and open a new one, optionally asking
    /// the server to resume `hint`. Returns immediately; progress is
    /// published through the observer channels.
    pub fn connect(&self, hint: Option<&str>) -> Result<(), SessionError> {
        self.enqueue(Command::Connect {
            hint: hint.map(str::to_string),
        })
    }

    /// Connect using the chat id kept in durable storage, if any.
    pub fn resume(&self) -> Result<(), SessionError> {
        let stored = self.shared.durable.chat_id();
        self.connect(stored.as_deref())
    }

    /// Tear down the current session. A no-op without one.
    pub fn disconnect(&self) -> Result<(), SessionError> {
        self.enqueue(Command::Disconnect)
    }

    /// Forget the stored chat and registration, then disconnect.
    pub fn end_chat(&self) -> Result<(), SessionError> {
        self.shared.durable.clear_chat_id();
        self.shared.durable.clear_registration();
        self.disconnect()
    }

    /// Resolves once every command sent before it, and every transport
    /// event or timer firing already queued, has been applied.
    pub async fn flush(&self) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(Command::Flush { respond_to: tx })?;
        rx.await.map_err(|_| SessionError::ActorGone)
    }

    // ── Messaging ──

    /// Send a payload on the open session and return the message built for it.
    pub async fn send(
        &self,
        payload: impl Into<OutboundPayload>,
    ) -> Result<ChatMessage, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(Command::Send {
            payload: payload.into(),
            respond_to: tx,
        })?;
        rx.await.map_err(|_| SessionError::ActorGone)?
    }

    pub async fn send_text(&self, text: &str) -> Result<ChatMessage, SessionError> {
        self.send(OutboundPayload::Text(text.to_string())).await
    }

    /// Receive every inbound message of the current session.
    ///
    /// Fails with [`SessionError::NotConnected`] when there is no session.
    /// The subscription ends with the session; unsubscribing afterwards is
    /// a no-op.
    pub async fn subscribe<F>(&self, callback: F) -> Result<MessageSubscription, SessionError>
    where
        F: Fn(&ChatMessage) + Send + Sync + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.enqueue(Command::Subscribe {
            callback: Arc::new(callback),
            respond_to: tx,
        })?;
        rx.await.map_err(|_| SessionError::ActorGone)?
    }

    pub fn mark_as_read(&self, id: &str) -> Result<(), SessionError> {
        self.enqueue(Command::MarkAsRead { id: id.to_string() })
    }

    pub fn mark_all_as_read(&self) -> Result<(), SessionError> {
        self.enqueue(Command::MarkAllAsRead)
    }

    // ── Snapshots ──

    pub fn is_connected(&self) -> bool {
        self.shared.view.read().connected
    }

    /// Chat id of the current session. `None` without a session or before
    /// the server assigned one.
    pub fn current_chat_id(&self) -> Option<String> {
        self.shared
            .view
            .read()
            .chat_id
            .clone()
            .filter(|id| !id.is_empty())
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.shared.view.read().log.to_vec()
    }

    pub fn chronological_messages(&self) -> Vec<ChatMessage> {
        self.shared.view.read().log.chronological()
    }

    pub fn message(&self, id: &str) -> Option<ChatMessage> {
        self.shared.view.read().log.get(id).cloned()
    }

    pub fn message_count(&self) -> usize {
        self.shared.view.read().log.len()
    }

    /// First message sent by a human agent, if the chat was handed off.
    pub fn handoff_message(&self) -> Option<ChatMessage> {
        self.shared.view.read().log.handoff().cloned()
    }

    pub fn latest_with_buttons(&self) -> Option<ChatMessage> {
        self.shared.view.read().log.latest_with_buttons().cloned()
    }

    pub fn unread(&self) -> Vec<String> {
        self.shared.view.read().unread.ids()
    }

    pub fn unread_count(&self) -> usize {
        self.shared.view.read().unread.len()
    }

    pub fn is_unread(&self, id: &str) -> bool {
        self.shared.view.read().unread.contains(id)
    }

    // ── Durable state ──

    pub fn stored_chat_id(&self) -> Option<String> {
        self.shared.durable.chat_id()
    }

    pub fn clear_chat_id(&self) {
        self.shared.durable.clear_chat_id();
    }

    pub fn is_registered(&self) -> bool {
        self.shared.durable.is_registered()
    }

    pub fn set_registered(&self, registered: bool) {
        self.shared.durable.set_registered(registered);
    }

    pub fn clear_registration(&self) {
        self.shared.durable.clear_registration();
    }

    // ── Observation ──

    /// Call `callback` whenever `channel` changes.
    pub fn observe<F>(&self, channel: Channel, callback: F) -> Observer
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.observers.subscribe(channel, callback)
    }

    pub fn observers(&self) -> &ObserverRegistry {
        &self.shared.observers
    }

    /// User-visible warnings and errors.
    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.shared.notices.subscribe()
    }
}

/// One connect-to-disconnect period.
struct Session {
    id: ConnectionId,
    chat_id: String,
    transport: Option<TransportHandle>,
    open: bool,
    subscribers: MessageSubscribers,
    idle_timer: Option<ScheduledTask>,
    reconnect_timer: Option<ScheduledTask>,
}

struct SessionActor {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedReceiver<Command>,
    events_tx: mpsc::UnboundedSender<(ConnectionId, TransportEvent)>,
    events_rx: mpsc::UnboundedReceiver<(ConnectionId, TransportEvent)>,
    timers_tx: mpsc::UnboundedSender<(ConnectionId, TimerKind)>,
    timers_rx: mpsc::UnboundedReceiver<(ConnectionId, TimerKind)>,
    next_connection: u64,
    session: Option<Session>,
    /// Reconnect attempts since the last successful open.
    reconnect_attempt: u32,
}

impl SessionActor {
    async fn run(&mut self) {
        debug!("Session actor started for {}", self.config.endpoint);

        loop {
            tokio::select! {
                biased;

                Some((id, event)) = self.events_rx.recv() => {
                    self.handle_transport_event(id, event);
                }
                Some((id, kind)) = self.timers_rx.recv() => {
                    self.handle_timer(id, kind);
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
            }
        }

        self.teardown();
        debug!("Session actor shutting down");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { hint } => self.connect(hint, 0),
            Command::Disconnect => {
                if !self.teardown() {
                    debug!("Disconnect without a session");
                }
            }
            Command::Send {
                payload,
                respond_to,
            } => {
                let result = self.handle_send(payload);
                if let Err(err @ SessionError::NotConnected) = &result {
                    self.publish_notice(Notice::from(err));
                }
                let _ = respond_to.send(result);
            }
            Command::Subscribe {
                callback,
                respond_to,
            } => {
                let result = match &self.session {
                    Some(session) => Ok(session.subscribers.add(callback)),
                    None => Err(SessionError::NotConnected),
                };
                let _ = respond_to.send(result);
            }
            Command::MarkAsRead { id } => {
                let changed = self.shared.view.write().unread.acknowledge(&id);
                if changed {
                    self.shared.observers.notify(Channel::Unread);
                }
            }
            Command::MarkAllAsRead => {
                let changed = self.shared.view.write().unread.acknowledge_all();
                if changed {
                    self.shared.observers.notify(Channel::Unread);
                }
            }
            Command::Flush { respond_to } => {
                let _ = respond_to.send(());
            }
        }
    }

    // ── Lifecycle ──

    fn connect(&mut self, hint: Option<String>, attempt: u32) {
        self.teardown();
        self.reconnect_attempt = attempt;

        self.next_connection += 1;
        let id = ConnectionId(self.next_connection);
        let chat_id = hint.unwrap_or_default();
        let url = self.config.endpoint_for(Some(&chat_id));
        info!("{}: connecting to {}", id, url);

        // The record exists before the connector can report anything.
        self.session = Some(Session {
            id,
            chat_id: chat_id.clone(),
            transport: None,
            open: false,
            subscribers: MessageSubscribers::new(),
            idle_timer: None,
            reconnect_timer: None,
        });
        self.shared.view.write().chat_id = Some(chat_id);

        let handle = self
            .connector
            .open(&url, TransportEvents::new(id, self.events_tx.clone()));
        if let Some(session) = self.session.as_mut() {
            session.transport = Some(handle);
        }
    }

    /// Discard the current session and clear everything scoped to it.
    /// Returns `false` when there was nothing to tear down.
    fn teardown(&mut self) -> bool {
        let Some(mut session) = self.session.take() else {
            return false;
        };
        info!("{}: disconnecting", session.id);

        if let Some(mut timer) = session.idle_timer.take() {
            timer.cancel();
        }
        if let Some(mut timer) = session.reconnect_timer.take() {
            timer.cancel();
        }
        if let Some(transport) = session.transport.take() {
            transport.close();
        }
        session.subscribers.clear();

        {
            let mut view = self.shared.view.write();
            view.log.clear();
            view.unread.clear();
            view.connected = false;
            view.chat_id = None;
        }

        self.shared.observers.notify(Channel::Connection);
        self.shared.observers.notify(Channel::Unread);
        self.shared.observers.notify(Channel::Messages);
        true
    }

    /// The current session, if `id` belongs to it.
    fn current(&mut self, id: ConnectionId) -> Option<&mut Session> {
        self.session.as_mut().filter(|s| s.id == id)
    }

    // ── Transport events ──

    fn handle_transport_event(&mut self, id: ConnectionId, event: TransportEvent) {
        if self.current(id).is_none() {
            debug!("{}: ignoring stale {} event", id, event.name());
            return;
        }

        match event {
            TransportEvent::Opened => self.handle_opened(id),
            TransportEvent::Frame(Frame::Text(raw)) => self.handle_frame(id, &raw),
            TransportEvent::Frame(Frame::Binary(data)) => {
                debug!("{}: ignoring binary frame ({} bytes)", id, data.len());
            }
            TransportEvent::Closed(close) => self.handle_closed(id, close),
            TransportEvent::Failed { reason } => {
                let err = SessionError::TransportUnavailable { reason };
                warn!("{}: {}", id, err);
                self.transport_lost(id);
                self.report_failure(id, err);
            }
        }
    }

    fn handle_opened(&mut self, id: ConnectionId) {
        let idle_timeout = self.config.idle_timeout;
        let timers = self.timers_tx.clone();
        let Some(session) = self.current(id) else {
            return;
        };
        if session.transport.is_none() {
            debug!("{}: open reported after close", id);
            return;
        }

        session.open = true;
        if let Some(timeout) = idle_timeout {
            session.idle_timer = Some(ScheduledTask::after(timeout, async move {
                let _ = timers.send((id, TimerKind::IdleTimeout));
            }));
        }
        self.reconnect_attempt = 0;
        self.shared.view.write().connected = true;

        info!("{}: connected", id);
        self.shared.observers.notify(Channel::Connection);
    }

    fn handle_closed(&mut self, id: ConnectionId, close: CloseInfo) {
        if close.clean {
            info!("{}: connection closed (code {}) {}", id, close.code, close.reason);
        } else {
            warn!("{}: connection dropped (code {}) {}", id, close.code, close.reason);
        }
        self.transport_lost(id);

        if !close.clean {
            self.report_failure(
                id,
                SessionError::AbnormalClosure {
                    code: close.code,
                    reason: close.reason,
                },
            );
        }
    }

    /// Surface a failure to the user and retry it when it took the
    /// transport down.
    fn report_failure(&mut self, id: ConnectionId, err: SessionError) {
        debug!("{}: {} ({})", id, err, err.error_code());
        self.publish_notice(Notice::from(&err));
        if err.is_transport_failure() {
            self.schedule_reconnect(id);
        }
    }

    /// The stream is gone but the session record and its log stay until
    /// the next disconnect or connect.
    fn transport_lost(&mut self, id: ConnectionId) {
        let Some(session) = self.current(id) else {
            return;
        };
        session.open = false;
        session.transport = None;
        if let Some(mut timer) = session.idle_timer.take() {
            timer.cancel();
        }

        let was_connected = std::mem::replace(&mut self.shared.view.write().connected, false);
        if was_connected {
            self.shared.observers.notify(Channel::Connection);
        }
    }

    fn schedule_reconnect(&mut self, id: ConnectionId) {
        let attempt = self.reconnect_attempt;
        let Some(delay) = self.config.reconnect.delay_for(attempt) else {
            if self.config.reconnect.enabled {
                warn!("{}: giving up after {} reconnect attempts", id, attempt);
            }
            return;
        };
        let timers = self.timers_tx.clone();
        let Some(session) = self.current(id) else {
            return;
        };
        info!("{}: reconnecting in {:?} (attempt {})", id, delay, attempt + 1);
        session.reconnect_timer = Some(ScheduledTask::after(delay, async move {
            let _ = timers.send((id, TimerKind::Reconnect));
        }));
    }

    fn handle_frame(&mut self, id: ConnectionId, raw: &str) {
        let Some(session) = self.current(id) else {
            return;
        };
        if session.transport.is_none() {
            debug!("{}: ignoring frame after close", id);
            return;
        }

        let ctx = FrameContext {
            chat_id: &session.chat_id,
            received_at: now_millis(),
            new_id: &new_id,
        };
        match classify(raw, &ctx) {
            Ok(Classified::Control(ControlFrame::StoreChatId { chat_id })) => {
                info!("{}: server assigned chat id {}", id, chat_id);
                session.chat_id = chat_id.clone();
                self.shared.durable.set_chat_id(&chat_id);
                self.shared.view.write().chat_id = Some(chat_id);
            }
            Ok(Classified::Message(msg)) => {
                let subscribers = session.subscribers.clone();
                self.deliver(msg, &subscribers);
            }
            Err(e) => {
                let err = SessionError::from(e);
                warn!("{}: dropping frame ({} bytes): {}", id, raw.len(), err);
            }
        }
    }

    fn deliver(&self, msg: ChatMessage, subscribers: &MessageSubscribers) {
        let msg = self.shared.view.write().log.push(msg, new_id).clone();
        debug!("Received {} message {}", msg.role, msg.id);
        self.shared.observers.notify(Channel::Messages);

        subscribers.dispatch(&msg);

        let added = self.shared.view.write().unread.add(msg.id.clone());
        if added {
            self.shared.observers.notify(Channel::Unread);
        }
    }

    // ── Outbound ──

    fn handle_send(&mut self, payload: OutboundPayload) -> Result<ChatMessage, SessionError> {
        let record_outbound = self.config.record_outbound;
        let session = self.session.as_mut().ok_or(SessionError::NotConnected)?;
        let transport = match &session.transport {
            Some(transport) if session.open => transport,
            _ => return Err(SessionError::NotConnected),
        };

        let text = payload
            .wire_text()
            .map_err(|e| SessionError::ProtocolViolation {
                reason: e.to_string(),
            })?;
        transport.send(text)?;

        let msg = ChatMessage::new(
            new_id(),
            Role::User,
            payload.display_content(),
            session.chat_id.clone(),
            now_millis(),
        );
        debug!("{}: sent message {}", session.id, msg.id);

        if !record_outbound {
            return Ok(msg);
        }
        let msg = self.shared.view.write().log.push(msg, new_id).clone();
        self.shared.observers.notify(Channel::Messages);
        Ok(msg)
    }

    // ── Timers ──

    fn handle_timer(&mut self, id: ConnectionId, kind: TimerKind) {
        let Some(session) = self.current(id) else {
            debug!("{}: ignoring stale {:?} timer", id, kind);
            return;
        };

        match kind {
            TimerKind::IdleTimeout => {
                session.idle_timer = None;
                info!("{}: idle timeout", id);
                self.teardown();
            }
            TimerKind::Reconnect => {
                session.reconnect_timer = None;
                let chat_id = session.chat_id.clone();
                let attempt = self.reconnect_attempt + 1;
                info!("{}: reconnect attempt {}", id, attempt);
                self.connect(Some(chat_id), attempt);
            }
        }
    }

    fn publish_notice(&self, notice: Notice) {
        debug!("Notice: {}", notice);
        // No receivers is fine.
        let _ = self.shared.notices.send(notice);
    }
}
