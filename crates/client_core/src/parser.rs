//! Streaming recovery of sequence lists from the controller's shared output.
//!
//! The controller broadcasts every log line to every connected remote, and a
//! `LIST` response has no length prefix and no terminator. A cycle starts at
//! our device's header line and ends at the first line that is not a list
//! item, whoever it was addressed to.

use serde::{Deserialize, Serialize};
use shared::{
    domain::DeviceIdentity,
    protocol::{empty_list_notice, list_header, list_item_name, LIST_ITEM_MARKER},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ParseEvent {
    Ignored,
    SnapshotCleared,
    ItemAdded(String),
    SnapshotFinalized(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    Idle,
    Collecting,
}

pub struct ResponseParser {
    header: String,
    empty_notice: String,
    state: ParserState,
    accumulator: Vec<String>,
}

impl ResponseParser {
    pub fn new(device: &DeviceIdentity) -> Self {
        Self {
            header: list_header(device),
            empty_notice: empty_list_notice(device),
            state: ParserState::Idle,
            accumulator: Vec::new(),
        }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Abandons any partial cycle. Must run before every `LIST` probe is sent
    /// so a late answer to an older probe cannot leak into the new cycle.
    pub fn reset(&mut self) {
        self.state = ParserState::Idle;
        self.accumulator.clear();
    }

    pub fn consume(&mut self, line: &str) -> ParseEvent {
        match self.state {
            ParserState::Idle => self.consume_idle(line),
            ParserState::Collecting => self.consume_collecting(line),
        }
    }

    fn consume_idle(&mut self, line: &str) -> ParseEvent {
        if line.contains(&self.header) {
            self.accumulator.clear();
            self.state = ParserState::Collecting;
            return ParseEvent::SnapshotCleared;
        }
        if line.contains(&self.empty_notice) {
            self.accumulator.clear();
            return ParseEvent::SnapshotFinalized(Vec::new());
        }
        ParseEvent::Ignored
    }

    fn consume_collecting(&mut self, line: &str) -> ParseEvent {
        if line.contains(LIST_ITEM_MARKER) {
            // A marker with a blank name neither adds nor terminates.
            let Some(name) = list_item_name(line) else {
                return ParseEvent::Ignored;
            };
            if self.accumulator.iter().any(|known| known == name) {
                return ParseEvent::Ignored;
            }
            self.accumulator.push(name.to_string());
            return ParseEvent::ItemAdded(name.to_string());
        }
        if line.contains(&self.header) {
            return ParseEvent::Ignored;
        }
        self.state = ParserState::Idle;
        ParseEvent::SnapshotFinalized(std::mem::take(&mut self.accumulator))
    }
}

#[cfg(test)]
#[path = "tests/parser_tests.rs"]
mod tests;
