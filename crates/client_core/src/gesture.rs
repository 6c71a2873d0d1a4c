//! Press-gesture disambiguation: short press triggers, long press renames.
//!
//! The recognizer never sleeps or spawns. Every input returns the timer and
//! emit effects the owner must carry out, and timer expirations come back in
//! through [`GestureRecognizer::timer_expired`] with the token they were armed
//! with. Only the token currently held by a `Pressed` slot can fire, so an
//! expiration that races a release is discarded instead of double-firing.
//!
//! Per slot:
//!
//! ```text
//!   Idle --press--> Pressed --timer--> Fired --release/cancel--> Idle
//!                      |                        (nothing emitted)
//!                      +--release/cancel--> Idle (trigger after settle)
//! ```

use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};
use shared::domain::Slot;
use tracing::debug;

/// What a pointer cancel (leaving the control, input system abort) means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelPolicy {
    /// Cancel is treated as "stopped holding": a short press still triggers.
    #[default]
    SameAsRelease,
    /// Cancel disarms the press and emits nothing.
    Abort,
}

#[derive(Debug, Clone)]
pub struct GestureConfig {
    pub long_press_threshold: Duration,
    /// Delay between a short-press release and its trigger, so the aborted
    /// long-press feedback settles before the trigger feedback starts.
    pub post_release_settle: Duration,
    pub cancel_policy: CancelPolicy,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            long_press_threshold: Duration::from_millis(600),
            post_release_settle: Duration::from_millis(50),
            cancel_policy: CancelPolicy::SameAsRelease,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GestureAction {
    TriggerRequested(Slot),
    RenameRequested(Slot),
}

impl GestureAction {
    pub fn slot(self) -> Slot {
        match self {
            GestureAction::TriggerRequested(slot) | GestureAction::RenameRequested(slot) => slot,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerToken(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GestureEffect {
    ArmTimer {
        slot: Slot,
        token: TimerToken,
        after: Duration,
    },
    DisarmTimer {
        slot: Slot,
        token: TimerToken,
    },
    Emit {
        action: GestureAction,
        after: Duration,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GesturePhase {
    Idle,
    Pressed,
    Fired,
}

#[derive(Debug, Clone, Copy)]
enum SlotState {
    Pressed { token: TimerToken },
    Fired,
}

#[derive(Debug)]
pub struct GestureRecognizer {
    config: GestureConfig,
    slots: HashMap<Slot, SlotState>,
    next_token: u64,
}

impl GestureRecognizer {
    pub fn new(config: GestureConfig) -> Self {
        Self {
            config,
            slots: HashMap::new(),
            next_token: 0,
        }
    }

    pub fn config(&self) -> &GestureConfig {
        &self.config
    }

    pub fn phase(&self, slot: Slot) -> GesturePhase {
        match self.slots.get(&slot) {
            None => GesturePhase::Idle,
            Some(SlotState::Pressed { .. }) => GesturePhase::Pressed,
            Some(SlotState::Fired) => GesturePhase::Fired,
        }
    }

    pub fn press(&mut self, slot: Slot) -> Vec<GestureEffect> {
        if self.slots.contains_key(&slot) {
            debug!(slot = slot.0, "gesture: press ignored, slot already held");
            return Vec::new();
        }
        let token = TimerToken(self.next_token);
        self.next_token += 1;
        self.slots.insert(slot, SlotState::Pressed { token });
        debug!(slot = slot.0, "gesture: pressed");
        vec![GestureEffect::ArmTimer {
            slot,
            token,
            after: self.config.long_press_threshold,
        }]
    }

    pub fn release(&mut self, slot: Slot) -> Vec<GestureEffect> {
        match self.slots.remove(&slot) {
            None => Vec::new(),
            Some(SlotState::Fired) => {
                debug!(slot = slot.0, "gesture: released after long press");
                Vec::new()
            }
            Some(SlotState::Pressed { token }) => {
                debug!(slot = slot.0, "gesture: short press");
                vec![
                    GestureEffect::DisarmTimer { slot, token },
                    GestureEffect::Emit {
                        action: GestureAction::TriggerRequested(slot),
                        after: self.config.post_release_settle,
                    },
                ]
            }
        }
    }

    pub fn cancel(&mut self, slot: Slot) -> Vec<GestureEffect> {
        match self.config.cancel_policy {
            CancelPolicy::SameAsRelease => self.release(slot),
            CancelPolicy::Abort => match self.slots.remove(&slot) {
                Some(SlotState::Pressed { token }) => {
                    debug!(slot = slot.0, "gesture: press aborted");
                    vec![GestureEffect::DisarmTimer { slot, token }]
                }
                _ => Vec::new(),
            },
        }
    }

    pub fn timer_expired(&mut self, slot: Slot, token: TimerToken) -> Vec<GestureEffect> {
        match self.slots.get(&slot) {
            Some(SlotState::Pressed { token: live }) if *live == token => {
                self.slots.insert(slot, SlotState::Fired);
                debug!(slot = slot.0, "gesture: long press");
                vec![GestureEffect::Emit {
                    action: GestureAction::RenameRequested(slot),
                    after: Duration::ZERO,
                }]
            }
            _ => {
                debug!(slot = slot.0, "gesture: stale timer expiration dropped");
                Vec::new()
            }
        }
    }

    /// Returns every slot to `Idle` and disarms live timers without emitting.
    pub fn teardown(&mut self) -> Vec<GestureEffect> {
        let mut effects: Vec<_> = self
            .slots
            .drain()
            .filter_map(|(slot, state)| match state {
                SlotState::Pressed { token } => Some(GestureEffect::DisarmTimer { slot, token }),
                SlotState::Fired => None,
            })
            .collect();
        effects.sort_by_key(|effect| match effect {
            GestureEffect::DisarmTimer { slot, .. } => *slot,
            _ => Slot(usize::MAX),
        });
        effects
    }
}

#[cfg(test)]
#[path = "tests/gesture_tests.rs"]
mod tests;
