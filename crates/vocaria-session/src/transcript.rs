//! Client-side Transcript Store.
//!
//! Append-only, ordered by acceptance. Messages never change once appended;
//! the only mutable part is the sync state kept beside each message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vocaria_core::{Message, MessageDraft, MessageId, RoomContext, Sender, SyncState};

/// A message together with its persistence status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub message: Message,
    pub sync: SyncState,
}

#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<Message>,
    sync: Vec<SyncState>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Accepts a draft, assigning the next id. Returns the stored message.
    pub fn append(
        &mut self,
        draft: MessageDraft,
        room: Option<RoomContext>,
        now: DateTime<Utc>,
        sync: SyncState,
    ) -> &Message {
        let id = MessageId(self.messages.len() as u64 + 1);
        self.messages.push(draft.accept(id, room, now));
        self.sync.push(sync);
        &self.messages[self.messages.len() - 1]
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        Self::index(id).and_then(|i| self.messages.get(i))
    }

    pub fn sync_state(&self, id: MessageId) -> Option<&SyncState> {
        Self::index(id).and_then(|i| self.sync.get(i))
    }

    /// Updates the sync state of `id`. Returns `false` for unknown ids.
    pub fn mark_sync(&mut self, id: MessageId, state: SyncState) -> bool {
        match Self::index(id).and_then(|i| self.sync.get_mut(i)) {
            Some(slot) => {
                *slot = state;
                true
            }
            None => false,
        }
    }

    /// The newest visitor message, ignoring system notices.
    pub fn last_visitor_message(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.sender == Sender::Visitor)
    }

    pub fn visitor_message_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.sender == Sender::Visitor)
            .count()
    }

    pub fn entries(&self) -> Vec<TranscriptEntry> {
        self.messages
            .iter()
            .zip(self.sync.iter())
            .map(|(message, sync)| TranscriptEntry {
                message: message.clone(),
                sync: sync.clone(),
            })
            .collect()
    }

    fn index(id: MessageId) -> Option<usize> {
        usize::try_from(id.0).ok()?.checked_sub(1)
    }
}
