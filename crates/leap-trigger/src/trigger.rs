//! Button disambiguation state machine
//!
//! Turns raw hardware edges into semantic actions:
//!
//! ```text
//!          Press                      Release
//!  Idle ───────────▶ Down ─────────────────────────▶ Up
//!   ▲                 │ click window elapses          │ Press before double window
//!   │                 ▼                               ▼
//!   ├──────────── LongPress                      DoublePress
//!   │                                                 │ double window elapses
//!   └─────────────────────────────────────────────── Press
//! ```
//!
//! A tap cannot be told apart from the first half of a double tap until the
//! double-press window closes, so a single Press is always reported late.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use leap_core::config::Settings;
use leap_core::prelude::*;

use crate::clock::{Scheduler, TimerToken, VirtualClock};

/// Added to the double-press window of raise/lower buttons.
pub const RAISE_LOWER_EXTENSION: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerState {
    #[default]
    Idle,
    Down,
    Up,
}

/// Raw edge reported by the controller in `ButtonEvent.EventType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum ButtonEdge {
    Press,
    Release,
    LongHold,
    #[serde(other)]
    Unknown,
}

/// Disambiguated action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum ButtonAction {
    Press,
    DoublePress,
    LongPress,
}

/// Timing windows for one button. A zero window disables that action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerOptions {
    pub double_click_speed: Duration,
    pub click_speed: Duration,
    pub raise_lower: bool,
}

impl Default for TriggerOptions {
    fn default() -> Self {
        Self {
            double_click_speed: Duration::from_millis(300),
            click_speed: Duration::from_millis(450),
            raise_lower: false,
        }
    }
}

impl TriggerOptions {
    /// Options for the button called `name`: `[trigger]` defaults, then any
    /// `[buttons."name"]` overrides. `raise_lower` applies unless overridden.
    pub fn resolve(settings: &Settings, name: &str, raise_lower: bool) -> Self {
        let mut options = Self {
            double_click_speed: Duration::from_millis(settings.trigger.double_click_speed_ms),
            click_speed: Duration::from_millis(settings.trigger.click_speed_ms),
            raise_lower,
        };

        if let Some(button) = settings.button(name) {
            if let Some(ms) = button.double_click_speed_ms {
                options.double_click_speed = Duration::from_millis(ms);
            }
            if let Some(ms) = button.click_speed_ms {
                options.click_speed = Duration::from_millis(ms);
            }
            if let Some(raise_lower) = button.raise_lower {
                options.raise_lower = raise_lower;
            }
        }

        options
    }

    /// How long after a release a second press still counts as a double press.
    pub fn double_press_window(&self) -> Duration {
        if self.raise_lower {
            self.double_click_speed + RAISE_LOWER_EXTENSION
        } else {
            self.double_click_speed
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    /// Fires LongPress if the button is still down
    LongPress,
    /// Confirms a single Press once no second press arrived
    Confirm,
}

/// Per-button state machine.
#[derive(Debug)]
pub struct Trigger<S: Scheduler> {
    options: TriggerOptions,
    state: TriggerState,
    scheduler: S,
    armed: Option<(TimerToken, TimerKind)>,
    next_token: u64,
}

impl<S: Scheduler> Trigger<S> {
    pub fn new(options: TriggerOptions, scheduler: S) -> Self {
        Self {
            options,
            state: TriggerState::Idle,
            scheduler,
            armed: None,
            next_token: 0,
        }
    }

    pub fn state(&self) -> TriggerState {
        self.state
    }

    pub fn options(&self) -> &TriggerOptions {
        &self.options
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    /// Whether a timer is currently armed.
    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Consume one hardware edge.
    pub fn update(&mut self, edge: ButtonEdge) -> Option<ButtonAction> {
        trace!("{:?} + {:?}", self.state, edge);

        match (self.state, edge) {
            (TriggerState::Idle, ButtonEdge::Press) => {
                self.state = TriggerState::Down;
                if self.options.click_speed.is_zero() {
                    // Long-press timing disabled: report the press immediately
                    self.reset();
                    return Some(ButtonAction::Press);
                }
                self.arm(TimerKind::LongPress, self.options.click_speed);
                None
            }
            (TriggerState::Idle, _) => None,

            (TriggerState::Down, ButtonEdge::Release) => {
                self.disarm();
                self.state = TriggerState::Up;
                if !self.options.double_click_speed.is_zero() {
                    self.arm(TimerKind::Confirm, self.options.double_press_window());
                }
                None
            }
            (TriggerState::Down, _) => {
                self.reset();
                None
            }

            (TriggerState::Up, ButtonEdge::Press)
                if matches!(self.armed, Some((_, TimerKind::Confirm))) =>
            {
                self.reset();
                Some(ButtonAction::DoublePress)
            }
            (TriggerState::Up, _) => {
                self.reset();
                None
            }
        }
    }

    /// Deliver a token from the scheduler. Tokens that are no longer armed
    /// are ignored.
    pub fn fire(&mut self, token: TimerToken) -> Option<ButtonAction> {
        let (armed, kind) = self.armed?;
        if armed != token {
            trace!("Ignoring stale timer {:?}", token);
            return None;
        }

        self.reset();

        match kind {
            TimerKind::LongPress => Some(ButtonAction::LongPress),
            TimerKind::Confirm => Some(ButtonAction::Press),
        }
    }

    /// Cancel any armed timer and return to Idle.
    pub fn reset(&mut self) {
        self.disarm();
        self.state = TriggerState::Idle;
    }

    fn arm(&mut self, kind: TimerKind, delay: Duration) {
        self.disarm();
        self.next_token += 1;
        let token = TimerToken(self.next_token);
        self.scheduler.schedule(token, delay);
        self.armed = Some((token, kind));
    }

    fn disarm(&mut self) {
        if let Some((token, _)) = self.armed.take() {
            self.scheduler.cancel(token);
        }
    }
}

impl Trigger<VirtualClock> {
    /// Trigger driven by a [`VirtualClock`].
    pub fn with_virtual_clock(options: TriggerOptions) -> Self {
        Self::new(options, VirtualClock::new())
    }

    /// Advance the virtual clock, firing due timers in order.
    pub fn advance(&mut self, by: Duration) -> Vec<ButtonAction> {
        let due = self.scheduler.advance(by);
        due.into_iter().filter_map(|token| self.fire(token)).collect()
    }
}
