//! Message store for one conversation
//!
//! Holds the ordered message list and applies history loads, realtime merges
//! and optimistic sends without breaking id uniqueness.

use std::collections::HashMap;

use fleetchat_shared::{DeliveryStatus, Message, MessageId};

/// Ordered, id-unique message list
#[derive(Debug, Default, Clone)]
pub struct MessageStore {
    messages: Vec<Message>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the contents with a freshly fetched history
    ///
    /// Duplicate ids collapse to their last occurrence; the list is then
    /// stably sorted by `created_at`, so an already ordered history is kept
    /// exactly as fetched. Local entries the server has not stored yet
    /// (still sending, or failed and awaiting a retry) are kept after it.
    pub fn load(&mut self, history: Vec<Message>) {
        let mut last_index: HashMap<MessageId, usize> = HashMap::with_capacity(history.len());
        for (index, message) in history.iter().enumerate() {
            last_index.insert(message.id.clone(), index);
        }

        let before = history.len();
        let mut messages: Vec<Message> = history
            .into_iter()
            .enumerate()
            .filter(|(index, message)| last_index.get(&message.id) == Some(index))
            .map(|(_, message)| message)
            .collect();
        messages.sort_by_key(|m| m.created_at);

        if messages.len() != before {
            tracing::warn!(
                fetched = before,
                kept = messages.len(),
                "Dropped duplicate ids from history"
            );
        }

        let pending = std::mem::take(&mut self.messages)
            .into_iter()
            .filter(|m| m.id.is_local() && m.status != DeliveryStatus::Sent);
        messages.extend(pending);
        self.messages = messages;
    }

    /// Add a message at the end, or update it in place if its id is known
    pub fn append(&mut self, message: Message) {
        match self.position(&message.id) {
            Some(index) => self.messages[index] = message,
            None => self.messages.push(message),
        }
    }

    /// Insert a local entry ahead of the server round trip
    ///
    /// Returns the temporary id to confirm or fail later.
    pub fn append_optimistic(&mut self, mut draft: Message) -> MessageId {
        if !draft.id.is_local() {
            draft.id = MessageId::local();
        }
        draft.status = DeliveryStatus::Sending;
        let id = draft.id.clone();
        self.messages.push(draft);
        id
    }

    /// Replace an optimistic entry with the server's record
    ///
    /// When the entry is gone (a history load replaced the store) the record
    /// is merged through `append`, which also covers a refetch that already
    /// delivered it.
    pub fn confirm(&mut self, temp_id: &MessageId, mut confirmed: Message) {
        confirmed.status = DeliveryStatus::Sent;

        if let Some(existing) = self.position(&confirmed.id) {
            // Server copy already present; drop the local placeholder
            self.messages[existing] = confirmed;
            self.messages.retain(|m| m.id != *temp_id);
            return;
        }

        match self.position(temp_id) {
            Some(index) => self.messages[index] = confirmed,
            None => self.append(confirmed),
        }
    }

    /// Mark an optimistic entry as failed; returns false if it is gone
    pub fn fail(&mut self, temp_id: &MessageId) -> bool {
        match self.position(temp_id) {
            Some(index) => {
                self.messages[index].status = DeliveryStatus::Failed;
                true
            }
            None => false,
        }
    }

    /// Put a failed optimistic text entry back into `sending`
    ///
    /// Returns the body to send again, or `None` when the entry is not a
    /// failed local text message.
    pub fn resend(&mut self, temp_id: &MessageId) -> Option<String> {
        let index = self.position(temp_id)?;
        let entry = &mut self.messages[index];
        if !entry.id.is_local() || entry.status != DeliveryStatus::Failed {
            return None;
        }
        let body = entry.content.clone()?;
        entry.status = DeliveryStatus::Sending;
        Some(body)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == *id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn position(&self, id: &MessageId) -> Option<usize> {
        self.messages.iter().position(|m| m.id == *id)
    }
}
