//! Transport seam: open a stream to an address, send text frames, receive
//! frames asynchronously, detect closure.
//!
//! A [`Connector`] never blocks. It hands back a [`TransportHandle`] right
//! away and reports progress through [`TransportEvents`], tagged with the
//! [`ConnectionId`] of the session that asked for the connection.

mod websocket;

pub use websocket::WsConnector;

use tokio::sync::mpsc;
use url::Url;

use crate::error::SessionError;

/// Identifies one connection attempt (and the session built around it).
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// One inbound frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

/// How a connection ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
    /// A close handshake completed.
    pub clean: bool,
}

impl CloseInfo {
    /// Close status used when the stream dropped without a close frame.
    pub const ABNORMAL: u16 = 1006;
    pub const NORMAL: u16 = 1000;
    /// Close frame carried no status code.
    pub const NO_STATUS: u16 = 1005;

    pub fn clean(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            clean: true,
        }
    }

    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self {
            code: Self::ABNORMAL,
            reason: reason.into(),
            clean: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Frame(Frame),
    Closed(CloseInfo),
    /// The connection could not be established.
    Failed { reason: String },
}

impl TransportEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TransportEvent::Opened => "opened",
            TransportEvent::Frame(_) => "frame",
            TransportEvent::Closed(_) => "closed",
            TransportEvent::Failed { .. } => "failed",
        }
    }
}

/// Event sink handed to a connector for one connection.
#[derive(Clone, Debug)]
pub struct TransportEvents {
    connection: ConnectionId,
    tx: mpsc::UnboundedSender<(ConnectionId, TransportEvent)>,
}

impl TransportEvents {
    pub fn new(
        connection: ConnectionId,
        tx: mpsc::UnboundedSender<(ConnectionId, TransportEvent)>,
    ) -> Self {
        Self { connection, tx }
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Report an event. Returns `false` once nobody is listening.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx.send((self.connection, event)).is_ok()
    }
}

/// Outbound instruction for a live connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close,
}

/// Write side of a connection. Dropping it closes the connection.
#[derive(Debug)]
pub struct TransportHandle {
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl TransportHandle {
    pub fn new(outbound: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { outbound }
    }

    /// Hand a text frame to the connection's writer.
    pub fn send(&self, text: String) -> Result<(), SessionError> {
        self.outbound
            .send(Outbound::Text(text))
            .map_err(|_| SessionError::NotConnected)
    }

    /// Start a normal close. Safe to call on a connection that is already gone.
    pub fn close(&self) {
        let _ = self.outbound.send(Outbound::Close);
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

/// Opens connections. Implementations spawn their own I/O and must not block.
pub trait Connector: Send + Sync + 'static {
    fn open(&self, url: &Url, events: TransportEvents) -> TransportHandle;
}
