//! Chat Session - realtime connection manager for a chat client
//!
//! This crate owns a single bidirectional message stream to a chat server,
//! turns inbound frames into canonical messages, keeps the session's message
//! log and unread set, and publishes changes on three observer channels.
//! It has no terminal or UI knowledge; a rendering layer subscribes and reads
//! snapshots.
//!
//! # Example
//!
//! ```no_run
//! use chat_session::{Channel, DurableState, SessionConfig, SessionManager, WsConnector};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = SessionConfig::from_base_url("wss://chat.example.com").unwrap();
//!     let manager = SessionManager::new(config, WsConnector::new(), DurableState::in_memory());
//!
//!     let view = manager.downgrade();
//!     manager.observe(Channel::Messages, move || {
//!         if let Some(view) = view.upgrade() {
//!             println!("{} messages", view.messages().len());
//!         }
//!     });
//!
//!     manager.resume().unwrap();
//!     manager.flush().await.unwrap();
//!
//!     let _sub = manager
//!         .subscribe(|msg| println!("{}: {}", msg.role, msg.content))
//!         .await
//!         .unwrap();
//!
//!     manager.send_text("Hello").await.unwrap();
//! }
//! ```

pub mod classifier;
pub mod config;
mod error;
pub mod log;
mod manager;
pub mod message;
pub mod notice;
pub mod observer;
pub mod reconnect;
pub mod storage;
pub mod testing;
pub mod timer;
pub mod transport;
pub mod unread;

pub use config::SessionConfig;
pub use error::{ClassifyError, SessionError, StorageError};
pub use manager::{SessionManager, WeakSessionManager};
pub use message::{
    ActionButton, ChatMessage, MessageKind, OutboundPayload, ResolutionResponse, Role,
};
pub use notice::{Notice, NoticeLevel};
pub use observer::{Channel, MessageSubscription, Observer, ObserverRegistry};
pub use reconnect::ReconnectPolicy;
pub use storage::{DurableState, FileStore, KeyValueStore, MemoryStore};
pub use transport::{Connector, WsConnector};
pub use unread::UnreadSet;
