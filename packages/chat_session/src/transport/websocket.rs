//! WebSocket transport over tokio-tungstenite.

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, info, warn};
use url::Url;

use super::{
    CloseInfo, Connector, Frame, Outbound, TransportEvent, TransportEvents, TransportHandle,
};

/// Connects with `tokio_tungstenite::connect_async`, one task per connection.
#[derive(Clone, Debug, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for WsConnector {
    fn open(&self, url: &Url, events: TransportEvents) -> TransportHandle {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_connection(url.clone(), events, outbound_rx));
        TransportHandle::new(outbound_tx)
    }
}

async fn run_connection(
    url: Url,
    events: TransportEvents,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    let connection = events.connection();

    let ws_stream = match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok((ws_stream, _)) => ws_stream,
        Err(e) => {
            warn!("{}: failed to connect to {}: {}", connection, url, e);
            events.emit(TransportEvent::Failed {
                reason: describe_connect_error(&e),
            });
            return;
        }
    };

    info!("{}: WebSocket connected to {}", connection, url);
    events.emit(TransportEvent::Opened);

    let (mut ws_write, mut ws_read) = ws_stream.split();

    let close = loop {
        tokio::select! {
            cmd = outbound.recv() => match cmd {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = ws_write.send(Message::Text(text.into())).await {
                        break CloseInfo::abnormal(e.to_string());
                    }
                }
                // Close requested, or every handle was dropped.
                Some(Outbound::Close) | None => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: String::new().into(),
                    };
                    let _ = ws_write.send(Message::Close(Some(frame))).await;
                    break CloseInfo::clean(CloseInfo::NORMAL, "");
                }
            },

            msg = ws_read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    events.emit(TransportEvent::Frame(Frame::Text(text.as_str().to_owned())));
                }
                Some(Ok(Message::Binary(data))) => {
                    events.emit(TransportEvent::Frame(Frame::Binary(data.to_vec())));
                }
                Some(Ok(Message::Close(frame))) => {
                    break match frame {
                        Some(frame) => {
                            CloseInfo::clean(u16::from(frame.code), frame.reason.as_str())
                        }
                        None => CloseInfo::clean(CloseInfo::NO_STATUS, ""),
                    };
                }
                // Ping/pong are answered by tungstenite itself.
                Some(Ok(_)) => {}
                Some(Err(e)) => break CloseInfo::abnormal(e.to_string()),
                None => break CloseInfo::abnormal(""),
            },
        }
    };

    debug!(
        "{}: WebSocket closed (code {}, clean {})",
        connection, close.code, close.clean
    );
    events.emit(TransportEvent::Closed(close));
}

/// Human-readable connect failure, separating "nobody is listening" from
/// other errors.
fn describe_connect_error(err: &tungstenite::Error) -> String {
    let unreachable = match err {
        tungstenite::Error::Io(io_err) => matches!(
            io_err.kind(),
            std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
        ),
        _ => false,
    };
    if unreachable {
        "server is unavailable".to_string()
    } else {
        err.to_string()
    }
}
