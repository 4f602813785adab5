use std::collections::HashSet;

use crate::models::{ChatRoom, Sender};

/// Owner-side unread accounting. Counts rooms, not messages.
#[derive(Debug, Default)]
pub struct UnreadTracker {
    unread: HashSet<String>,
    open: Option<String>,
}

impl UnreadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from a fresh listing. The open room counts as read.
    pub fn reconcile(&mut self, rooms: &[ChatRoom]) {
        self.unread = rooms
            .iter()
            .filter(|r| !r.is_read && !r.is_deleted)
            .filter(|r| self.open.as_deref() != Some(r.room_id.as_str()))
            .map(|r| r.room_id.clone())
            .collect();
    }

    /// Apply a message notification. Returns true if the room just became unread.
    pub fn on_message(&mut self, room_id: &str, sender: Sender) -> bool {
        if sender == Sender::Owner || self.open.as_deref() == Some(room_id) {
            return false;
        }
        self.unread.insert(room_id.to_string())
    }

    pub fn set_open(&mut self, room_id: Option<&str>) {
        self.open = room_id.map(str::to_string);
    }

    pub fn open_room(&self) -> Option<&str> {
        self.open.as_deref()
    }

    pub fn mark_read(&mut self, room_id: &str) -> bool {
        self.unread.remove(room_id)
    }

    pub fn mark_all_read(&mut self) {
        self.unread.clear();
    }

    pub fn remove(&mut self, room_id: &str) {
        self.unread.remove(room_id);
        if self.open.as_deref() == Some(room_id) {
            self.open = None;
        }
    }

    pub fn is_unread(&self, room_id: &str) -> bool {
        self.unread.contains(room_id)
    }

    pub fn unread_rooms(&self) -> Vec<String> {
        let mut rooms: Vec<String> = self.unread.iter().cloned().collect();
        rooms.sort();
        rooms
    }

    pub fn count(&self) -> usize {
        self.unread.len()
    }
}
