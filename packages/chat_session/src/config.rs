//! Runtime configuration for a [`SessionManager`](crate::SessionManager).

use std::time::Duration;

use url::Url;

use crate::reconnect::ReconnectPolicy;

/// Path of the user chat stream below the server's base WebSocket URL.
pub const CHAT_STREAM_PATH: &str = "/ws/chat/user";

/// Query parameter carrying the chat id hint.
pub const CHAT_ID_PARAM: &str = "chat_id";

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_NOTICE_CAPACITY: usize = 64;

#[derive(Clone, Debug, PartialEq)]
pub struct SessionConfig {
    /// Stream endpoint, without the chat id query parameter.
    pub endpoint: Url,
    /// Disconnect after this long connected. `None` disables the timer.
    pub idle_timeout: Option<Duration>,
    pub reconnect: ReconnectPolicy,
    /// Append locally sent messages to the message log.
    pub record_outbound: bool,
    /// Notices buffered per receiver before the slowest one starts lagging.
    pub notice_capacity: usize,
}

impl SessionConfig {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
            reconnect: ReconnectPolicy::disabled(),
            record_outbound: true,
            notice_capacity: DEFAULT_NOTICE_CAPACITY,
        }
    }

    /// Build the config from the server's base WebSocket URL
    /// (e.g. `wss://chat.example.com`), appending [`CHAT_STREAM_PATH`].
    pub fn from_base_url(ws_url: &str) -> Result<Self, url::ParseError> {
        let mut endpoint = Url::parse(ws_url)?;
        let base = endpoint.path().trim_end_matches('/').to_string();
        endpoint.set_path(&format!("{}{}", base, CHAT_STREAM_PATH));
        endpoint.set_query(None);
        Ok(Self::new(endpoint))
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_record_outbound(mut self, record_outbound: bool) -> Self {
        self.record_outbound = record_outbound;
        self
    }

    /// The URL to open for a session, with the chat id hint appended when
    /// one is given.
    pub fn endpoint_for(&self, hint: Option<&str>) -> Url {
        let mut url = self.endpoint.clone();
        if let Some(hint) = hint.filter(|h| !h.is_empty()) {
            url.query_pairs_mut().append_pair(CHAT_ID_PARAM, hint);
        }
        url
    }
}
