//! Messages of one conversation, in arrival order.

use std::ops::Range;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::model::Message;
use crate::row_sync::RowSyncTracker;

struct State {
    messages: Vec<Message>,
    rows: RowSyncTracker,
}

/// Append-only list of the messages in one conversation. The published
/// count is sent while the list is locked, so it only ever grows.
pub struct MessageList {
    state: Mutex<State>,
    available: watch::Sender<usize>,
}

impl Default for MessageList {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageList {
    pub fn new() -> Self {
        let (available, _) = watch::channel(0);
        Self {
            state: Mutex::new(State {
                messages: Vec::new(),
                rows: RowSyncTracker::new(),
            }),
            available,
        }
    }

    /// Appends one message and returns its row.
    pub fn append(&self, message: Message) -> usize {
        let mut state = self.state.lock();
        state.messages.push(message);
        let row = state.rows.record_appended(1).start;
        self.available.send_replace(state.messages.len());
        row
    }

    /// Appends in order. An empty batch changes nothing and notifies no one.
    pub fn append_all(&self, messages: impl IntoIterator<Item = Message>) -> Range<usize> {
        let mut state = self.state.lock();
        let before = state.messages.len();
        state.messages.extend(messages);
        let len = state.messages.len();
        let appended = state.rows.record_appended(len - before);
        if !appended.is_empty() {
            self.available.send_replace(len);
        }
        appended
    }

    /// Rows appended since the last call, ascending.
    pub fn rows_to_insert(&self) -> Vec<usize> {
        self.state.lock().rows.claim_new_positions()
    }

    pub fn message(&self, row: usize) -> Option<Message> {
        self.state.lock().messages.get(row).cloned()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.state.lock().messages.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe_available(&self) -> watch::Receiver<usize> {
        self.available.subscribe()
    }
}
