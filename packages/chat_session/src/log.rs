//! Append-only message log for the active session.
//!
//! Insertion order is arrival order. Messages can arrive out of order with
//! respect to `created_at`, so readers that display a transcript should use
//! [`MessageLog::chronological`].

use std::collections::HashSet;

use crate::message::ChatMessage;

#[derive(Debug, Default)]
pub struct MessageLog {
    messages: Vec<ChatMessage>,
    ids: HashSet<String>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message.
    ///
    /// Ids stay unique within the log: a message whose id is already taken
    /// is re-keyed with `new_id` rather than dropped.
    pub fn push(&mut self, mut msg: ChatMessage, new_id: impl Fn() -> String) -> &ChatMessage {
        if self.ids.contains(&msg.id) {
            let fresh = new_id();
            tracing::debug!("Duplicate message id {} re-keyed as {}", msg.id, fresh);
            msg.id = fresh;
        }
        self.ids.insert(msg.id.clone());
        self.messages.push(msg);
        &self.messages[self.messages.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn get(&self, id: &str) -> Option<&ChatMessage> {
        if !self.ids.contains(id) {
            return None;
        }
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter()
    }

    pub fn to_vec(&self) -> Vec<ChatMessage> {
        self.messages.clone()
    }

    /// Messages ordered by `created_at`, ties kept in arrival order.
    pub fn chronological(&self) -> Vec<ChatMessage> {
        let mut sorted = self.messages.clone();
        sorted.sort_by_key(|m| m.created_at);
        sorted
    }

    /// The first message carrying an `agent_id`: the point where a human
    /// agent took over the conversation.
    pub fn handoff(&self) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.agent_id.is_some())
    }

    /// Most recent message that offers action buttons.
    pub fn latest_with_buttons(&self) -> Option<&ChatMessage> {
        self.messages.iter().rev().find(|m| m.has_buttons())
    }

    /// Returns whether anything was removed.
    pub fn clear(&mut self) -> bool {
        let had_any = !self.messages.is_empty();
        self.messages.clear();
        self.ids.clear();
        had_any
    }
}
