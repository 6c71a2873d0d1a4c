use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use shared::{
    domain::{default_dispenser_name, Slot},
    error::CommandRejection,
};

pub mod gesture;
pub mod parser;
pub mod session;
pub mod transport;

pub use gesture::{CancelPolicy, GestureAction, GestureConfig, GestureRecognizer};
pub use parser::{ParseEvent, ResponseParser};
pub use session::{SessionConfig, SessionController, SessionError, SessionHandle, SessionInput};

/// Everything the session reports to the UI, log and persistence layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Raw inbound line, for the on-screen log.
    StatusLine(String),
    Parse(ParseEvent),
    SnapshotChanged(Vec<String>),
    /// A command reached the transport.
    Sent(String),
    Triggered {
        slot: Slot,
        name: String,
    },
    /// A long press asks the UI to start the local rename flow.
    RenameRequested {
        slot: Slot,
        current_name: String,
    },
    SequenceExecuted(String),
    SequenceStored(String),
    SequenceDeleted(String),
    Rejected(CommandRejection),
    Disconnected {
        reason: Option<String>,
    },
}

/// Sequence names believed to exist on the controller for this device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequenceSnapshot {
    names: Vec<String>,
}

impl SequenceSnapshot {
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|known| known == name)
    }

    pub fn clear(&mut self) {
        self.names.clear();
    }

    /// Read-your-writes insert right after a create command is issued.
    pub fn insert(&mut self, name: &str) -> bool {
        if self.contains(name) {
            return false;
        }
        self.names.push(name.to_string());
        true
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.names.len();
        self.names.retain(|known| known != name);
        before != self.names.len()
    }

    /// Applies a parser event. Returns true when a cycle finalized and the
    /// snapshot was replaced.
    pub fn apply(&mut self, event: &ParseEvent) -> bool {
        match event {
            ParseEvent::Ignored => false,
            ParseEvent::SnapshotCleared => {
                self.names.clear();
                false
            }
            ParseEvent::ItemAdded(name) => {
                self.insert(name);
                false
            }
            ParseEvent::SnapshotFinalized(names) => {
                self.names = names.clone();
                true
            }
        }
    }
}

/// Display-name lookup for dispenser slots.
pub trait DispenserDirectory: Send + Sync {
    fn name(&self, slot: Slot) -> String;
}

/// In-memory directory shared between the session and whoever handles renames.
#[derive(Debug, Clone, Default)]
pub struct SharedDispenserNames {
    names: Arc<RwLock<Vec<String>>>,
}

impl SharedDispenserNames {
    pub fn new(names: Vec<String>) -> Self {
        Self {
            names: Arc::new(RwLock::new(names)),
        }
    }

    pub fn set(&self, slot: Slot, name: impl Into<String>) {
        let mut guard = self.names.write().unwrap_or_else(|err| err.into_inner());
        if guard.len() <= slot.0 {
            let len = guard.len();
            guard.extend((len..=slot.0).map(|index| default_dispenser_name(Slot(index))));
        }
        guard[slot.0] = name.into();
    }

    pub fn all(&self) -> Vec<String> {
        self.names
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .clone()
    }
}

impl DispenserDirectory for SharedDispenserNames {
    fn name(&self, slot: Slot) -> String {
        self.names
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .get(slot.0)
            .cloned()
            .unwrap_or_else(|| default_dispenser_name(slot))
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
