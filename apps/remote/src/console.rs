//! Line commands typed at the remote's prompt.

use shared::domain::Slot;
use thiserror::Error;

pub const HELP: &str = "\
commands:
  press N | release N | cancel N   raw gesture input for dispenser N (1-based)
  tap N                            short press: dispense once
  hold N                           long press: rename dispenser N
  list                             refresh stored sequences
  create NAME c1,c2,...            store a sequence of per-dispenser counts
  exec NAME | delete NAME          run or remove a stored sequence
  rename N NEW NAME                rename dispenser N
  names | log | help | quit
anything else is sent to the controller as typed";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Press(Slot),
    Release(Slot),
    Cancel(Slot),
    Tap(Slot),
    Hold(Slot),
    List,
    Create { name: String, counts: Vec<u32> },
    Execute(String),
    Delete(String),
    Rename { slot: Slot, name: String },
    Names,
    Log,
    Help,
    Quit,
    Raw(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsoleError {
    #[error("`{0}` needs a dispenser number")]
    MissingSlot(&'static str),
    #[error("dispenser number must be 1 or more, got {0:?}")]
    InvalidSlot(String),
    #[error("`{0}` needs a name")]
    MissingName(&'static str),
    #[error("counts must be comma separated whole numbers, got {0:?}")]
    InvalidCounts(String),
}

/// `Ok(None)` for a blank line.
pub fn parse_line(line: &str) -> Result<Option<ConsoleCommand>, ConsoleError> {
    let line = line.trim();
    let Some(verb) = line.split_whitespace().next() else {
        return Ok(None);
    };
    let rest = line[verb.len()..].trim();

    let command = match verb {
        "press" => ConsoleCommand::Press(slot_arg("press", rest)?),
        "release" => ConsoleCommand::Release(slot_arg("release", rest)?),
        "cancel" => ConsoleCommand::Cancel(slot_arg("cancel", rest)?),
        "tap" => ConsoleCommand::Tap(slot_arg("tap", rest)?),
        "hold" => ConsoleCommand::Hold(slot_arg("hold", rest)?),
        "list" => ConsoleCommand::List,
        "create" => {
            let mut parts = rest.split_whitespace();
            let name = parts.next().ok_or(ConsoleError::MissingName("create"))?;
            let raw_counts: String = parts.collect();
            ConsoleCommand::Create {
                name: name.to_string(),
                counts: parse_counts(&raw_counts)?,
            }
        }
        "exec" => ConsoleCommand::Execute(name_arg("exec", rest)?),
        "delete" => ConsoleCommand::Delete(name_arg("delete", rest)?),
        "rename" => {
            let first = rest
                .split_whitespace()
                .next()
                .ok_or(ConsoleError::MissingSlot("rename"))?;
            let slot = parse_slot(first)?;
            let name = rest[first.len()..].trim();
            if name.is_empty() {
                return Err(ConsoleError::MissingName("rename"));
            }
            ConsoleCommand::Rename {
                slot,
                name: name.to_string(),
            }
        }
        "names" => ConsoleCommand::Names,
        "log" => ConsoleCommand::Log,
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        _ => ConsoleCommand::Raw(line.to_string()),
    };
    Ok(Some(command))
}

fn slot_arg(verb: &'static str, rest: &str) -> Result<Slot, ConsoleError> {
    let raw = rest
        .split_whitespace()
        .next()
        .ok_or(ConsoleError::MissingSlot(verb))?;
    parse_slot(raw)
}

fn parse_slot(raw: &str) -> Result<Slot, ConsoleError> {
    raw.parse::<usize>()
        .ok()
        .and_then(Slot::from_wire_number)
        .ok_or_else(|| ConsoleError::InvalidSlot(raw.to_string()))
}

fn name_arg(verb: &'static str, rest: &str) -> Result<String, ConsoleError> {
    if rest.is_empty() {
        return Err(ConsoleError::MissingName(verb));
    }
    Ok(rest.to_string())
}

fn parse_counts(raw: &str) -> Result<Vec<u32>, ConsoleError> {
    let raw = raw.trim().trim_start_matches('(').trim_end_matches(')');
    if raw.is_empty() {
        return Err(ConsoleError::InvalidCounts(raw.to_string()));
    }
    raw.split(',')
        .map(|count| count.trim().parse::<u32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| ConsoleError::InvalidCounts(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_gesture_commands_with_one_based_slots() {
        assert_eq!(
            parse_line("tap 1"),
            Ok(Some(ConsoleCommand::Tap(Slot(0))))
        );
        assert_eq!(
            parse_line("  press 2 "),
            Ok(Some(ConsoleCommand::Press(Slot(1))))
        );
        assert_eq!(
            parse_line("hold 3"),
            Ok(Some(ConsoleCommand::Hold(Slot(2))))
        );
        assert_eq!(
            parse_line("tap 0"),
            Err(ConsoleError::InvalidSlot("0".into()))
        );
        assert_eq!(parse_line("release"), Err(ConsoleError::MissingSlot("release")));
    }

    #[test]
    fn parses_create_with_counts() {
        assert_eq!(
            parse_line("create Morning 2,0"),
            Ok(Some(ConsoleCommand::Create {
                name: "Morning".into(),
                counts: vec![2, 0],
            }))
        );
        assert_eq!(
            parse_line("create Night (1, 3)"),
            Ok(Some(ConsoleCommand::Create {
                name: "Night".into(),
                counts: vec![1, 3],
            }))
        );
        assert!(matches!(
            parse_line("create Morning two"),
            Err(ConsoleError::InvalidCounts(_))
        ));
        assert!(matches!(
            parse_line("create Morning"),
            Err(ConsoleError::InvalidCounts(_))
        ));
        assert_eq!(parse_line("create"), Err(ConsoleError::MissingName("create")));
    }

    #[test]
    fn rename_keeps_spaces_in_new_name() {
        assert_eq!(
            parse_line("rename 1 Vitamin D"),
            Ok(Some(ConsoleCommand::Rename {
                slot: Slot(0),
                name: "Vitamin D".into(),
            }))
        );
        assert_eq!(parse_line("rename 1"), Err(ConsoleError::MissingName("rename")));
    }

    #[test]
    fn unknown_and_uppercase_commands_pass_through() {
        assert_eq!(
            parse_line("EXECUTE Morning"),
            Ok(Some(ConsoleCommand::Raw("EXECUTE Morning".into())))
        );
        assert_eq!(
            parse_line("LIST"),
            Ok(Some(ConsoleCommand::Raw("LIST".into())))
        );
        assert_eq!(parse_line("list"), Ok(Some(ConsoleCommand::List)));
        assert_eq!(parse_line("   "), Ok(None));
    }
}
