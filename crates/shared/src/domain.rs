use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::IdentityError;

/// Number of servo channels the controller firmware drives.
pub const MAX_SLOTS: usize = 6;
/// Number of dispensers the remote shows by default.
pub const DEFAULT_SLOT_COUNT: usize = 2;

const IDENTITY_PREFIX: &str = "device_";
const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Opaque per-install token that scopes commands and responses to this remote.
///
/// It is embedded verbatim in commands and matched verbatim in responses, so
/// it may not be empty or contain whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceIdentity(String);

impl DeviceIdentity {
    pub fn new(raw: impl Into<String>) -> Result<Self, IdentityError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(IdentityError::Empty);
        }
        if raw.chars().any(char::is_whitespace) {
            return Err(IdentityError::Whitespace(raw));
        }
        Ok(Self(raw))
    }

    /// `device_{epoch millis in base 36}_{5 random base-36 chars}`.
    pub fn generate() -> Self {
        let millis = Utc::now().timestamp_millis().max(0) as u128;
        let random = Uuid::new_v4().as_u128() % 36u128.pow(5);
        Self(format!(
            "{IDENTITY_PREFIX}{}_{:0>5}",
            to_base36(millis),
            to_base36(random)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for DeviceIdentity {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DeviceIdentity> for String {
    fn from(value: DeviceIdentity) -> Self {
        value.0
    }
}

/// True when `token` already carries a generated identity (`device_\w+`).
pub fn looks_like_device_identity(token: &str) -> bool {
    token
        .strip_prefix(IDENTITY_PREFIX)
        .and_then(|rest| rest.chars().next())
        .is_some_and(|c| c.is_alphanumeric() || c == '_')
}

fn to_base36(mut value: u128) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(BASE36[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    String::from_utf8(digits).unwrap_or_default()
}

/// Zero-based dispenser index as seen by the UI. The wire uses `index + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Slot(pub usize);

impl Slot {
    /// Builds a slot from the 1-based number printed on the device.
    pub fn from_wire_number(number: usize) -> Option<Self> {
        number.checked_sub(1).map(Slot)
    }

    pub fn wire_number(self) -> usize {
        self.0 + 1
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A named set of per-slot dispense counts stored on the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequence {
    pub name: String,
    pub counts: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispenseAction {
    ManualDispense,
    SequenceExecute,
    Rename,
}

impl DispenseAction {
    pub fn label(self) -> &'static str {
        match self {
            DispenseAction::ManualDispense => "Manual Dispense",
            DispenseAction::SequenceExecute => "Sequence Execute",
            DispenseAction::Rename => "Rename",
        }
    }

    pub fn as_db_str(self) -> &'static str {
        match self {
            DispenseAction::ManualDispense => "manual_dispense",
            DispenseAction::SequenceExecute => "sequence_execute",
            DispenseAction::Rename => "rename",
        }
    }

    pub fn from_db_str(raw: &str) -> Option<Self> {
        match raw {
            "manual_dispense" => Some(DispenseAction::ManualDispense),
            "sequence_execute" => Some(DispenseAction::SequenceExecute),
            "rename" => Some(DispenseAction::Rename),
            _ => None,
        }
    }
}

pub fn default_dispenser_name(slot: Slot) -> String {
    format!("Dispenser {}", slot.wire_number())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_whitespace_identities() {
        assert_eq!(DeviceIdentity::new(""), Err(IdentityError::Empty));
        assert!(matches!(
            DeviceIdentity::new("dev 1"),
            Err(IdentityError::Whitespace(_))
        ));
        assert!(DeviceIdentity::new("d1").is_ok());
    }

    #[test]
    fn generated_identity_has_expected_shape() {
        let identity = DeviceIdentity::generate();
        let rest = identity
            .as_str()
            .strip_prefix("device_")
            .expect("prefix");
        let (stamp, random) = rest.split_once('_').expect("two parts");
        assert!(!stamp.is_empty());
        assert_eq!(random.len(), 5);
        assert!(rest
            .chars()
            .all(|c| c == '_' || c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn recognizes_generated_identity_tokens() {
        assert!(looks_like_device_identity("device_abc"));
        assert!(looks_like_device_identity(&DeviceIdentity::generate().to_string()));
        assert!(!looks_like_device_identity("device_"));
        assert!(!looks_like_device_identity("Morning"));
    }

    #[test]
    fn base36_matches_known_values() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }

    #[test]
    fn slot_wire_numbers_are_one_based() {
        assert_eq!(Slot(0).wire_number(), 1);
        assert_eq!(Slot::from_wire_number(2), Some(Slot(1)));
        assert_eq!(Slot::from_wire_number(0), None);
        assert_eq!(default_dispenser_name(Slot(1)), "Dispenser 2");
    }

    #[test]
    fn identity_deserialization_validates() {
        let ok: DeviceIdentity = serde_json::from_str("\"d1\"").expect("valid");
        assert_eq!(ok.as_str(), "d1");
        assert!(serde_json::from_str::<DeviceIdentity>("\"a b\"").is_err());
    }
}
