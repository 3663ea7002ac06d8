//! Set of message ids not yet acknowledged by the consuming UI.

use std::collections::HashSet;

/// Insertion-ordered set of unread message ids.
#[derive(Debug, Default)]
pub struct UnreadSet {
    order: Vec<String>,
    members: HashSet<String>,
}

impl UnreadSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the id was not already unread.
    pub fn add(&mut self, id: impl Into<String>) -> bool {
        let id = id.into();
        if self.members.insert(id.clone()) {
            self.order.push(id);
            true
        } else {
            false
        }
    }

    /// Remove a single id. Returns `true` if the set changed.
    pub fn acknowledge(&mut self, id: &str) -> bool {
        if self.members.remove(id) {
            self.order.retain(|existing| existing != id);
            true
        } else {
            false
        }
    }

    /// Returns `true` if anything was unread.
    pub fn acknowledge_all(&mut self) -> bool {
        self.clear()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Unread ids in arrival order.
    pub fn ids(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn clear(&mut self) -> bool {
        let had_any = !self.order.is_empty();
        self.order.clear();
        self.members.clear();
        had_any
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_idempotent() {
        let mut unread = UnreadSet::new();
        assert!(unread.add("a"));
        assert!(!unread.add("a"));
        assert_eq!(unread.len(), 1);
    }

    #[test]
    fn acknowledge_removes_only_that_id() {
        let mut unread = UnreadSet::new();
        unread.add("a");
        unread.add("b");
        unread.add("c");

        assert!(unread.acknowledge("b"));
        assert_eq!(unread.ids(), ["a", "c"]);
        assert!(!unread.acknowledge("b"));
        assert!(!unread.acknowledge("missing"));
    }

    #[test]
    fn acknowledge_all_reports_change() {
        let mut unread = UnreadSet::new();
        assert!(!unread.acknowledge_all());
        unread.add("a");
        assert!(unread.acknowledge_all());
        assert!(unread.is_empty());
        assert!(!unread.contains("a"));
    }
}
