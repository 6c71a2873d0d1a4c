//! Session controller: the single owner of the controller connection.
//!
//! One loop owns every piece of mutable state (parser, gesture recognizer,
//! snapshot, live timers). Timer tasks only post wakeups back into that loop,
//! so no two transitions ever run at once.

use std::{collections::HashMap, sync::Arc, time::Duration};

use shared::{
    domain::{DeviceIdentity, Slot, DEFAULT_SLOT_COUNT},
    error::{CommandError, CommandRejection},
    protocol::{
        build_create_sequence, build_delete, build_execute, build_list, build_trigger,
        expand_console_command, parse_confirmation, Confirmation,
    },
};
use thiserror::Error;
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    gesture::{GestureAction, GestureConfig, GestureEffect, GestureRecognizer, TimerToken},
    parser::{ParseEvent, ResponseParser},
    transport::{connect_websocket, LineSink, LineSource, TransportError},
    ClientEvent, DispenserDirectory, SequenceSnapshot,
};

const INPUT_QUEUE_CAPACITY: usize = 64;
const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("session is no longer running")]
    Closed,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub slot_count: usize,
    pub gesture: GestureConfig,
    /// Delay before re-listing once the controller confirms a delete.
    pub refresh_after_delete: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            slot_count: DEFAULT_SLOT_COUNT,
            gesture: GestureConfig::default(),
            refresh_after_delete: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionInput {
    Press(Slot),
    Release(Slot),
    Cancel(Slot),
    RefreshSequences,
    CreateSequence { name: String, counts: Vec<u32> },
    ExecuteSequence(String),
    DeleteSequence(String),
    /// Console text, sent after device identity expansion.
    Raw(String),
    Shutdown,
}

/// Cloneable front door to a running [`SessionController`].
#[derive(Clone)]
pub struct SessionHandle {
    inputs: mpsc::Sender<SessionInput>,
    events: broadcast::Sender<ClientEvent>,
}

impl SessionHandle {
    pub async fn send(&self, input: SessionInput) -> Result<(), SessionError> {
        self.inputs
            .send(input)
            .await
            .map_err(|_| SessionError::Closed)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }
}

#[derive(Debug)]
enum Wakeup {
    LongPress { slot: Slot, token: TimerToken },
    Deliver { id: u64, action: GestureAction },
    Refresh { id: u64 },
}

enum Flow {
    Continue,
    Stop(Option<String>),
}

pub struct SessionController {
    device: DeviceIdentity,
    config: SessionConfig,
    sink: Box<dyn LineSink>,
    source: Box<dyn LineSource>,
    parser: ResponseParser,
    gestures: GestureRecognizer,
    snapshot: SequenceSnapshot,
    names: Arc<dyn DispenserDirectory>,
    inputs: mpsc::Receiver<SessionInput>,
    events: broadcast::Sender<ClientEvent>,
    wakeup_tx: mpsc::UnboundedSender<Wakeup>,
    wakeup_rx: mpsc::UnboundedReceiver<Wakeup>,
    long_press_timers: HashMap<TimerToken, JoinHandle<()>>,
    deferred: HashMap<u64, JoinHandle<()>>,
    next_deferred_id: u64,
}

impl SessionController {
    pub fn new(
        device: DeviceIdentity,
        config: SessionConfig,
        names: Arc<dyn DispenserDirectory>,
        sink: Box<dyn LineSink>,
        source: Box<dyn LineSource>,
    ) -> (Self, SessionHandle) {
        let (input_tx, inputs) = mpsc::channel(INPUT_QUEUE_CAPACITY);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (wakeup_tx, wakeup_rx) = mpsc::unbounded_channel();
        let controller = Self {
            parser: ResponseParser::new(&device),
            gestures: GestureRecognizer::new(config.gesture.clone()),
            device,
            config,
            sink,
            source,
            snapshot: SequenceSnapshot::default(),
            names,
            inputs,
            events: events.clone(),
            wakeup_tx,
            wakeup_rx,
            long_press_timers: HashMap::new(),
            deferred: HashMap::new(),
            next_deferred_id: 0,
        };
        let handle = SessionHandle {
            inputs: input_tx,
            events,
        };
        (controller, handle)
    }

    /// Opens the WebSocket to the controller and builds a session over it.
    pub async fn connect(
        url: &str,
        device: DeviceIdentity,
        config: SessionConfig,
        names: Arc<dyn DispenserDirectory>,
    ) -> Result<(Self, SessionHandle), SessionError> {
        let (sink, source) = connect_websocket(url).await?;
        Ok(Self::new(
            device,
            config,
            names,
            Box::new(sink),
            Box::new(source),
        ))
    }

    pub fn device(&self) -> &DeviceIdentity {
        &self.device
    }

    pub fn snapshot(&self) -> &SequenceSnapshot {
        &self.snapshot
    }

    /// Runs until the peer closes, a transport error occurs, or every handle
    /// is dropped / sends `Shutdown`. Sends the initial `LIST` probe first.
    pub async fn run(mut self) -> Result<(), SessionError> {
        info!(device = %self.device, "session: started");
        let mut result = self.refresh_sequences().await.map(|_| Flow::Continue);

        while let Ok(Flow::Continue) = result {
            result = tokio::select! {
                line = self.source.next_line() => match line {
                    Some(Ok(line)) => self.on_line(line).await,
                    Some(Err(err)) => Err(err.into()),
                    None => Ok(Flow::Stop(Some("controller closed the connection".into()))),
                },
                input = self.inputs.recv() => match input {
                    Some(input) => self.on_input(input).await,
                    None => Ok(Flow::Stop(None)),
                },
                Some(wakeup) = self.wakeup_rx.recv() => self.on_wakeup(wakeup).await,
            };
        }

        self.teardown();
        let (outcome, reason) = match result {
            Ok(Flow::Stop(reason)) => (Ok(()), reason),
            Ok(Flow::Continue) => (Ok(()), None),
            Err(err) => {
                let reason = err.to_string();
                (Err(err), Some(reason))
            }
        };
        info!(device = %self.device, reason = ?reason, "session: stopped");
        self.publish(ClientEvent::Disconnected { reason });
        outcome
    }

    async fn on_line(&mut self, line: String) -> Result<Flow, SessionError> {
        debug!(line = %line, "session: inbound");
        self.publish(ClientEvent::StatusLine(line.clone()));

        let event = self.parser.consume(&line);
        if event != ParseEvent::Ignored {
            if self.snapshot.apply(&event) {
                info!(
                    count = self.snapshot.names().len(),
                    "session: sequence list refreshed"
                );
            }
            let finalized = matches!(event, ParseEvent::SnapshotFinalized(_));
            self.publish(ClientEvent::Parse(event));
            if finalized {
                self.publish_snapshot();
            }
        }

        match parse_confirmation(&self.device, &line) {
            Some(Confirmation::Stored(name)) => {
                info!(sequence = %name, "session: controller stored sequence");
                self.publish(ClientEvent::SequenceStored(name));
            }
            Some(Confirmation::Deleted(name)) => {
                info!(sequence = %name, "session: controller deleted sequence");
                self.publish(ClientEvent::SequenceDeleted(name));
                let after = self.config.refresh_after_delete;
                self.defer(after, |id| Wakeup::Refresh { id });
            }
            None => {}
        }
        Ok(Flow::Continue)
    }

    async fn on_input(&mut self, input: SessionInput) -> Result<Flow, SessionError> {
        match input {
            SessionInput::Press(slot) => {
                if let Err(err) = self.check_slot(slot) {
                    self.reject(err);
                    return Ok(Flow::Continue);
                }
                let effects = self.gestures.press(slot);
                self.apply_gesture_effects(effects).await?;
            }
            SessionInput::Release(slot) => {
                let effects = self.gestures.release(slot);
                self.apply_gesture_effects(effects).await?;
            }
            SessionInput::Cancel(slot) => {
                let effects = self.gestures.cancel(slot);
                self.apply_gesture_effects(effects).await?;
            }
            SessionInput::RefreshSequences => self.refresh_sequences().await?,
            SessionInput::CreateSequence { name, counts } => {
                if self.snapshot.contains(name.trim()) {
                    self.reject(CommandError::DuplicateSequence(name.trim().to_string()));
                    return Ok(Flow::Continue);
                }
                match build_create_sequence(&self.device, &name, &counts) {
                    Ok(command) => {
                        if self.snapshot.insert(name.trim()) {
                            self.publish_snapshot();
                        }
                        info!(sequence = %name.trim(), "session: creating sequence");
                        self.send(command).await?;
                    }
                    Err(err) => self.reject(err),
                }
            }
            SessionInput::ExecuteSequence(name) => {
                let name = name.trim().to_string();
                if name.is_empty() {
                    self.reject(CommandError::EmptyIntent(
                        "sequence name must not be empty".into(),
                    ));
                    return Ok(Flow::Continue);
                }
                self.send(build_execute(&self.device, &name)).await?;
                self.publish(ClientEvent::SequenceExecuted(name));
            }
            SessionInput::DeleteSequence(name) => {
                let name = name.trim().to_string();
                if name.is_empty() {
                    self.reject(CommandError::EmptyIntent(
                        "sequence name must not be empty".into(),
                    ));
                    return Ok(Flow::Continue);
                }
                if self.snapshot.remove(&name) {
                    self.publish_snapshot();
                }
                self.send(build_delete(&self.device, &name)).await?;
            }
            SessionInput::Raw(text) => {
                let Some(command) = expand_console_command(&self.device, &text) else {
                    return Ok(Flow::Continue);
                };
                if command == build_list(&self.device) {
                    self.refresh_sequences().await?;
                } else {
                    self.send(command).await?;
                }
            }
            SessionInput::Shutdown => return Ok(Flow::Stop(None)),
        }
        Ok(Flow::Continue)
    }

    async fn on_wakeup(&mut self, wakeup: Wakeup) -> Result<Flow, SessionError> {
        match wakeup {
            Wakeup::LongPress { slot, token } => {
                self.long_press_timers.remove(&token);
                let effects = self.gestures.timer_expired(slot, token);
                self.apply_gesture_effects(effects).await?;
            }
            Wakeup::Deliver { id, action } => {
                self.deferred.remove(&id);
                self.dispatch_action(action).await?;
            }
            Wakeup::Refresh { id } => {
                self.deferred.remove(&id);
                self.refresh_sequences().await?;
            }
        }
        Ok(Flow::Continue)
    }

    async fn apply_gesture_effects(
        &mut self,
        effects: Vec<GestureEffect>,
    ) -> Result<(), SessionError> {
        for effect in effects {
            match effect {
                GestureEffect::ArmTimer { slot, token, after } => {
                    let wakeups = self.wakeup_tx.clone();
                    let timer = tokio::spawn(async move {
                        tokio::time::sleep(after).await;
                        let _ = wakeups.send(Wakeup::LongPress { slot, token });
                    });
                    self.long_press_timers.insert(token, timer);
                }
                GestureEffect::DisarmTimer { token, .. } => {
                    if let Some(timer) = self.long_press_timers.remove(&token) {
                        timer.abort();
                    }
                }
                GestureEffect::Emit { action, after } if after.is_zero() => {
                    self.dispatch_action(action).await?;
                }
                GestureEffect::Emit { action, after } => {
                    self.defer(after, |id| Wakeup::Deliver { id, action });
                }
            }
        }
        Ok(())
    }

    async fn dispatch_action(&mut self, action: GestureAction) -> Result<(), SessionError> {
        match action {
            GestureAction::TriggerRequested(slot) => {
                match build_trigger(slot, self.config.slot_count) {
                    Ok(command) => {
                        let name = self.names.name(slot);
                        info!(slot = slot.0, dispenser = %name, "session: dispensing");
                        self.send(command).await?;
                        self.publish(ClientEvent::Triggered { slot, name });
                    }
                    Err(err) => self.reject(err),
                }
            }
            GestureAction::RenameRequested(slot) => {
                let current_name = self.names.name(slot);
                info!(slot = slot.0, dispenser = %current_name, "session: rename requested");
                self.publish(ClientEvent::RenameRequested { slot, current_name });
            }
        }
        Ok(())
    }

    async fn refresh_sequences(&mut self) -> Result<(), SessionError> {
        self.parser.reset();
        self.snapshot.clear();
        self.publish_snapshot();
        self.send(build_list(&self.device)).await
    }

    async fn send(&mut self, command: String) -> Result<(), SessionError> {
        self.sink.send_line(&command).await?;
        debug!(command = %command, "session: sent");
        self.publish(ClientEvent::Sent(command));
        Ok(())
    }

    fn check_slot(&self, slot: Slot) -> Result<(), CommandError> {
        build_trigger(slot, self.config.slot_count).map(|_| ())
    }

    fn defer(&mut self, after: Duration, wakeup: impl FnOnce(u64) -> Wakeup) {
        let id = self.next_deferred_id;
        self.next_deferred_id += 1;
        let wakeups = self.wakeup_tx.clone();
        let wakeup = wakeup(id);
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = wakeups.send(wakeup);
        });
        self.deferred.insert(id, task);
    }

    fn reject(&self, err: CommandError) {
        warn!(error = %err, "session: command rejected");
        self.publish(ClientEvent::Rejected(CommandRejection::from(err)));
    }

    fn teardown(&mut self) {
        for effect in self.gestures.teardown() {
            if let GestureEffect::DisarmTimer { token, .. } = effect {
                if let Some(timer) = self.long_press_timers.remove(&token) {
                    timer.abort();
                }
            }
        }
        for (_, timer) in self.long_press_timers.drain() {
            timer.abort();
        }
        for (_, task) in self.deferred.drain() {
            task.abort();
        }
    }

    fn publish_snapshot(&self) {
        self.publish(ClientEvent::SnapshotChanged(self.snapshot.names().to_vec()));
    }

    fn publish(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
