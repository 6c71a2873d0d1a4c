//! Line-oriented text protocol spoken by the dispenser controller.
//!
//! Outbound commands are built by the `build_*` functions below; inbound
//! sentinels are matched by the helpers at the end of the module. The protocol
//! has no framing beyond one message per line, so list parsing relies on the
//! sentinels and the list-item marker alone.

use crate::{
    domain::{looks_like_device_identity, DeviceIdentity, Slot, MAX_SLOTS},
    error::CommandError,
};

/// Prefix of every list entry in a `LIST` response.
pub const LIST_ITEM_MARKER: &str = "  - ";

/// `PILL {n}` for the 1-based slot number.
pub fn build_trigger(slot: Slot, slot_count: usize) -> Result<String, CommandError> {
    let max = slot_count.min(MAX_SLOTS);
    if slot.0 >= max {
        return Err(CommandError::InvalidSlot {
            slot: slot.wire_number(),
            max,
        });
    }
    Ok(format!("PILL {}", slot.wire_number()))
}

pub fn build_create_sequence(
    device: &DeviceIdentity,
    name: &str,
    counts: &[u32],
) -> Result<String, CommandError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(CommandError::EmptyIntent(
            "sequence name must not be empty".into(),
        ));
    }
    if name.contains(LIST_ITEM_MARKER) {
        return Err(CommandError::EmptyIntent(format!(
            "sequence name {name:?} contains the list item marker"
        )));
    }
    if counts.iter().all(|count| *count == 0) {
        return Err(CommandError::EmptyIntent(
            "at least one dispenser count must be set".into(),
        ));
    }
    let counts = counts
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",");
    Ok(format!("SEQUENCE {device} {name} ({counts})"))
}

pub fn build_list(device: &DeviceIdentity) -> String {
    format!("LIST {device}")
}

pub fn build_execute(device: &DeviceIdentity, name: &str) -> String {
    format!("EXECUTE {device} {name}")
}

pub fn build_delete(device: &DeviceIdentity, name: &str) -> String {
    format!("DELETE {device} {name}")
}

/// Expands shorthand typed at the console into a full command.
///
/// `LIST` gains the device identity, and `SEQUENCE`/`EXECUTE`/`DELETE` get it
/// injected after the verb unless their first argument already is one.
/// Returns `None` for blank input.
pub fn expand_console_command(device: &DeviceIdentity, raw: &str) -> Option<String> {
    let command = raw.trim();
    if command.is_empty() {
        return None;
    }
    if command == "LIST" {
        return Some(build_list(device));
    }
    for verb in ["SEQUENCE", "EXECUTE", "DELETE"] {
        let Some(rest) = command.strip_prefix(verb) else {
            continue;
        };
        if !rest.starts_with(char::is_whitespace) {
            continue;
        }
        let rest = rest.trim_start();
        let first = rest.split_whitespace().next().unwrap_or_default();
        if looks_like_device_identity(first) {
            return Some(command.to_string());
        }
        return Some(format!("{verb} {device} {rest}"));
    }
    Some(command.to_string())
}

pub fn list_header(device: &DeviceIdentity) -> String {
    format!("[INFO] Sequences for device {device}")
}

pub fn empty_list_notice(device: &DeviceIdentity) -> String {
    format!("[INFO] No sequences found for device {device}")
}

/// Name carried by a list item line, trimmed. `None` when the line is not an
/// item or the name is blank. The name ends at a second marker, if any.
pub fn list_item_name(line: &str) -> Option<&str> {
    let name = line.split(LIST_ITEM_MARKER).nth(1)?.trim();
    (!name.is_empty()).then_some(name)
}

/// Firmware acknowledgement of a stored or deleted sequence for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    Stored(String),
    Deleted(String),
}

pub fn parse_confirmation(device: &DeviceIdentity, line: &str) -> Option<Confirmation> {
    let line = line.trim_end();
    let suffix = format!("' for device {device}");
    let quoted = |marker: &str| -> Option<String> {
        let (_, rest) = line.split_once(marker)?;
        let name = rest.strip_suffix(suffix.as_str())?;
        (!name.is_empty()).then(|| name.to_string())
    };
    if let Some(name) = quoted("[SEQ] Stored sequence '") {
        return Some(Confirmation::Stored(name));
    }
    quoted("[SEQ] Deleted sequence '").map(Confirmation::Deleted)
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
