//! Console front end: turns typed commands into session inputs and session
//! events into printed lines, names and dispensing log entries.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use client_core::{ClientEvent, DispenserDirectory, SessionHandle, SessionInput, SharedDispenserNames};
use shared::{
    domain::{DeviceIdentity, DispenseAction, Slot},
    protocol::build_create_sequence,
};
use storage::Storage;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

use crate::console::{parse_line, ConsoleCommand, HELP};

/// Extra time a `hold` keeps the press down past the long-press threshold.
const HOLD_MARGIN: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

#[derive(Debug, Default)]
struct ViewState {
    sequences: Vec<String>,
    pending_rename: Option<Slot>,
}

#[derive(Clone)]
pub struct Remote {
    handle: SessionHandle,
    storage: Storage,
    device: DeviceIdentity,
    names: SharedDispenserNames,
    slot_count: usize,
    hold_for: Duration,
    state: Arc<Mutex<ViewState>>,
}

impl Remote {
    pub fn new(
        handle: SessionHandle,
        storage: Storage,
        device: DeviceIdentity,
        names: SharedDispenserNames,
        slot_count: usize,
        long_press_threshold: Duration,
    ) -> Self {
        Self {
            handle,
            storage,
            device,
            names,
            slot_count,
            hold_for: long_press_threshold + HOLD_MARGIN,
            state: Arc::new(Mutex::new(ViewState::default())),
        }
    }

    /// Handles one typed line. A pending rename takes the whole line as the
    /// new name; a blank line keeps the old one.
    pub async fn handle_line(&self, line: &str) -> Result<Flow> {
        let pending = self.state.lock().await.pending_rename.take();
        if let Some(slot) = pending {
            if line.trim().is_empty() {
                println!("rename cancelled");
            } else {
                self.rename(slot, line).await?;
            }
            return Ok(Flow::Continue);
        }

        match parse_line(line) {
            Ok(Some(command)) => self.handle_command(command).await,
            Ok(None) => Ok(Flow::Continue),
            Err(err) => {
                println!("{err}");
                Ok(Flow::Continue)
            }
        }
    }

    pub async fn handle_command(&self, command: ConsoleCommand) -> Result<Flow> {
        match command {
            ConsoleCommand::Press(slot) => self.input(SessionInput::Press(slot)).await?,
            ConsoleCommand::Release(slot) => self.input(SessionInput::Release(slot)).await?,
            ConsoleCommand::Cancel(slot) => self.input(SessionInput::Cancel(slot)).await?,
            ConsoleCommand::Tap(slot) => {
                self.input(SessionInput::Press(slot)).await?;
                self.input(SessionInput::Release(slot)).await?;
            }
            ConsoleCommand::Hold(slot) => {
                self.input(SessionInput::Press(slot)).await?;
                tokio::time::sleep(self.hold_for).await;
                self.input(SessionInput::Release(slot)).await?;
            }
            ConsoleCommand::List => self.input(SessionInput::RefreshSequences).await?,
            ConsoleCommand::Create { name, mut counts } => {
                if counts.len() > self.slot_count {
                    println!(
                        "got {} counts but only {} dispensers are configured",
                        counts.len(),
                        self.slot_count
                    );
                    return Ok(Flow::Continue);
                }
                counts.resize(self.slot_count, 0);
                if let Err(err) = build_create_sequence(&self.device, &name, &counts) {
                    println!("not sent: {err}");
                    return Ok(Flow::Continue);
                }
                {
                    // Record the name before sending so a second create typed
                    // before the snapshot event arrives is still refused.
                    let mut state = self.state.lock().await;
                    if state.sequences.contains(&name) {
                        println!("a sequence named \"{name}\" already exists, choose a different name");
                        return Ok(Flow::Continue);
                    }
                    state.sequences.push(name.clone());
                }
                self.input(SessionInput::CreateSequence { name, counts })
                    .await?;
            }
            ConsoleCommand::Execute(name) => {
                self.input(SessionInput::ExecuteSequence(name)).await?
            }
            ConsoleCommand::Delete(name) => self.input(SessionInput::DeleteSequence(name)).await?,
            ConsoleCommand::Rename { slot, name } => {
                if slot.0 >= self.slot_count {
                    println!(
                        "dispenser {} is out of range (1-{})",
                        slot.wire_number(),
                        self.slot_count
                    );
                } else {
                    self.rename(slot, &name).await?;
                }
            }
            ConsoleCommand::Names => {
                for (index, name) in self.names.all().iter().take(self.slot_count).enumerate() {
                    println!("{}: {name}", index + 1);
                }
            }
            ConsoleCommand::Log => self.print_log().await?,
            ConsoleCommand::Help => println!("{HELP}"),
            ConsoleCommand::Quit => return Ok(Flow::Quit),
            ConsoleCommand::Raw(text) => self.input(SessionInput::Raw(text)).await?,
        }
        Ok(Flow::Continue)
    }

    pub async fn handle_event(&self, event: ClientEvent) -> Result<()> {
        match event {
            ClientEvent::StatusLine(line) => println!("< {line}"),
            ClientEvent::Sent(command) => println!("> {command}"),
            ClientEvent::Parse(parse) => debug!(event = ?parse, "remote: parse event"),
            ClientEvent::SnapshotChanged(names) => {
                if names.is_empty() {
                    println!("no saved sequences");
                } else {
                    println!("sequences: {}", names.join(", "));
                }
                self.state.lock().await.sequences = names;
            }
            ClientEvent::Triggered { slot, name } => {
                let detail = format!("{name} (Servo {})", slot.wire_number());
                println!("dispensing from: {detail}");
                self.storage
                    .append_log(&self.device, DispenseAction::ManualDispense, &detail)
                    .await?;
            }
            ClientEvent::RenameRequested { slot, current_name } => {
                self.state.lock().await.pending_rename = Some(slot);
                println!("rename \"{current_name}\" to (blank line keeps it):");
            }
            ClientEvent::SequenceExecuted(name) => {
                println!("executing sequence: {name}");
                self.storage
                    .append_log(
                        &self.device,
                        DispenseAction::SequenceExecute,
                        &format!("Sequence: {name}"),
                    )
                    .await?;
            }
            ClientEvent::SequenceStored(name) => println!("controller stored \"{name}\""),
            ClientEvent::SequenceDeleted(name) => println!("controller deleted \"{name}\""),
            ClientEvent::Rejected(rejection) => println!("not sent: {}", rejection.message),
            ClientEvent::Disconnected { reason } => match reason {
                Some(reason) => println!("disconnected: {reason}"),
                None => println!("disconnected"),
            },
        }
        Ok(())
    }

    /// Prints and records session events until the session disconnects.
    pub async fn run_events(self, mut events: broadcast::Receiver<ClientEvent>) {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "remote: event printer lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            let disconnected = matches!(event, ClientEvent::Disconnected { .. });
            if let Err(err) = self.handle_event(event).await {
                warn!(error = %err, "remote: failed to handle session event");
            }
            if disconnected {
                break;
            }
        }
    }

    async fn rename(&self, slot: Slot, new_name: &str) -> Result<()> {
        let current = self.names.name(slot);
        if !self
            .storage
            .rename_dispenser(&self.device, slot, new_name)
            .await?
        {
            println!("name unchanged");
            return Ok(());
        }

        let new_name = new_name.trim();
        self.names.set(slot, new_name);
        self.storage
            .append_log(
                &self.device,
                DispenseAction::Rename,
                &format!("\"{current}\" → \"{new_name}\""),
            )
            .await?;
        println!("dispenser {} is now \"{new_name}\"", slot.wire_number());
        Ok(())
    }

    async fn print_log(&self) -> Result<()> {
        let entries = self.storage.recent_log(&self.device).await?;
        if entries.is_empty() {
            println!("no dispensing history");
        }
        for entry in entries {
            println!(
                "{}  {:<16}  {}",
                entry.recorded_at.format("%Y-%m-%d %H:%M:%S"),
                entry.action.label(),
                entry.detail
            );
        }
        Ok(())
    }

    async fn input(&self, input: SessionInput) -> Result<()> {
        self.handle.send(input).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/app_tests.rs"]
mod tests;
