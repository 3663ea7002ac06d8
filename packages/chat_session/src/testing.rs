//! In-memory transport for tests and demos.
//!
//! [`ScriptedConnector`] records every connection the session manager
//! opens. Each [`ScriptedConnection`] lets the caller play the server:
//! report the open, push frames, close cleanly or drop the stream, and
//! inspect what the client sent.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use url::Url;

use crate::transport::{
    CloseInfo, ConnectionId, Connector, Frame, Outbound, TransportEvent, TransportEvents,
    TransportHandle,
};

#[derive(Clone, Default)]
pub struct ScriptedConnector {
    connections: Arc<Mutex<Vec<ScriptedConnection>>>,
    auto_open: bool,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A connector whose connections report `Opened` as soon as they are created.
    pub fn auto_open() -> Self {
        Self {
            auto_open: true,
            ..Self::default()
        }
    }

    pub fn connections(&self) -> Vec<ScriptedConnection> {
        self.connections.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn last(&self) -> Option<ScriptedConnection> {
        self.connections.lock().last().cloned()
    }
}

impl Connector for ScriptedConnector {
    fn open(&self, url: &Url, events: TransportEvents) -> TransportHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = ScriptedConnection {
            inner: Arc::new(ConnectionInner {
                url: url.clone(),
                events,
                outbound: Mutex::new(rx),
                sent: Mutex::new(Vec::new()),
                close_requested: AtomicBool::new(false),
            }),
        };
        if self.auto_open {
            connection.open();
        }
        self.connections.lock().push(connection);
        TransportHandle::new(tx)
    }
}

struct ConnectionInner {
    url: Url,
    events: TransportEvents,
    outbound: Mutex<mpsc::UnboundedReceiver<Outbound>>,
    sent: Mutex<Vec<String>>,
    close_requested: AtomicBool,
}

/// The server side of one scripted connection.
#[derive(Clone)]
pub struct ScriptedConnection {
    inner: Arc<ConnectionInner>,
}

impl ScriptedConnection {
    pub fn id(&self) -> ConnectionId {
        self.inner.events.connection()
    }

    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    /// Value of the `chat_id` query parameter, if any.
    pub fn chat_id_param(&self) -> Option<String> {
        self.inner
            .url
            .query_pairs()
            .find(|(k, _)| k == "chat_id")
            .map(|(_, v)| v.into_owned())
    }

    pub fn open(&self) {
        self.inner.events.emit(TransportEvent::Opened);
    }

    pub fn text(&self, frame: &str) {
        self.inner
            .events
            .emit(TransportEvent::Frame(Frame::Text(frame.to_string())));
    }

    pub fn binary(&self, data: &[u8]) {
        self.inner
            .events
            .emit(TransportEvent::Frame(Frame::Binary(data.to_vec())));
    }

    /// Server closes with a completed handshake.
    pub fn close(&self, code: u16, reason: &str) {
        self.inner
            .events
            .emit(TransportEvent::Closed(CloseInfo::clean(code, reason)));
    }

    /// Stream drops without a close handshake.
    pub fn drop_connection(&self, code: u16, reason: &str) {
        self.inner.events.emit(TransportEvent::Closed(CloseInfo {
            code,
            reason: reason.to_string(),
            clean: false,
        }));
    }

    /// The connection could not be established.
    pub fn fail(&self, reason: &str) {
        self.inner.events.emit(TransportEvent::Failed {
            reason: reason.to_string(),
        });
    }

    fn drain(&self) {
        let mut outbound = self.inner.outbound.lock();
        while let Ok(item) = outbound.try_recv() {
            match item {
                Outbound::Text(text) => self.inner.sent.lock().push(text),
                Outbound::Close => self.inner.close_requested.store(true, Ordering::SeqCst),
            }
        }
    }

    /// Text frames the client has sent so far.
    pub fn sent(&self) -> Vec<String> {
        self.drain();
        self.inner.sent.lock().clone()
    }

    /// Whether the client asked to close this connection.
    pub fn close_requested(&self) -> bool {
        self.drain();
        self.inner.close_requested.load(Ordering::SeqCst)
    }

    /// Whether the client dropped its handle to this connection.
    pub fn released(&self) -> bool {
        self.drain();
        self.inner.outbound.lock().is_closed()
    }
}
