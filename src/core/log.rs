//! The session log: an ordered, id-indexed record of everything the terminal
//! shows. Entries are append-only except that a `Processing` entry is
//! replaced in place, exactly once, by its terminal counterpart.

use std::collections::HashMap;

pub type EntryId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    User,
    Server,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Processing,
    Final,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub id: EntryId,
    pub sender: Sender,
    pub text: String,
    pub tool: Option<String>,
    pub state: EntryState,
}

/// The terminal text a settled invocation is replaced with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success(String),
    Error(String),
}

#[derive(Default)]
pub struct SessionLog {
    order: Vec<EntryId>,
    slots: HashMap<EntryId, LogEntry>,
    next_id: EntryId,
}

impl SessionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a terminal entry and returns its id.
    pub fn push(&mut self, sender: Sender, text: impl Into<String>) -> EntryId {
        self.append(sender, text.into(), None, EntryState::Final)
    }

    /// Appends a `Processing` placeholder for an in-flight invocation.
    pub fn begin(&mut self, tool: &str) -> EntryId {
        self.append(
            Sender::Server,
            "Processing...".to_string(),
            Some(tool.to_string()),
            EntryState::Processing,
        )
    }

    /// Replaces a `Processing` entry in place with its terminal form.
    /// Returns false when the id is unknown or already settled, in which
    /// case nothing changes.
    pub fn settle(&mut self, id: EntryId, outcome: Outcome) -> bool {
        let Some(entry) = self.slots.get_mut(&id) else {
            return false;
        };
        if entry.state != EntryState::Processing {
            return false;
        }
        match outcome {
            Outcome::Success(text) => {
                entry.sender = Sender::Server;
                entry.text = text;
            }
            Outcome::Error(text) => {
                entry.sender = Sender::System;
                entry.text = text;
            }
        }
        entry.state = EntryState::Final;
        true
    }

    /// Entries in display order.
    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.order.iter().filter_map(|id| self.slots.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn processing_count(&self) -> usize {
        self.slots
            .values()
            .filter(|entry| entry.state == EntryState::Processing)
            .count()
    }

    fn append(
        &mut self,
        sender: Sender,
        text: String,
        tool: Option<String>,
        state: EntryState,
    ) -> EntryId {
        let id = self.next_id;
        self.next_id += 1;
        self.order.push(id);
        self.slots.insert(
            id,
            LogEntry {
                id,
                sender,
                text,
                tool,
                state,
            },
        );
        id
    }
}
