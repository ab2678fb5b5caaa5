//! # leap-trigger - Button Action Detection
//!
//! Converts raw button edges (Press / Release / LongHold) into Press,
//! DoublePress and LongPress actions using per-button timing windows.
//!
//! ## Public API
//!
//! ### State Machine (`trigger`)
//! - [`Trigger`] - Pure state machine over a [`Scheduler`]
//! - [`TriggerOptions`] - Click / double-click windows and raise/lower flag
//! - [`ButtonEdge`], [`ButtonAction`], [`TriggerState`]
//!
//! ### Timers (`clock`)
//! - [`Scheduler`] - Schedule/cancel seam
//! - [`VirtualClock`] - Deterministic clock for tests
//!
//! ### Runtime (`driver`, `button`)
//! - [`ButtonTrigger`] - Trigger running on its own tokio task
//! - [`ButtonDefinition`] - Identity attached to each action
//! - [`watch_button()`] - Feed a button's status events into its trigger

pub mod button;
pub mod clock;
pub mod driver;
pub mod trigger;

pub use button::{
    event_url, watch_button, ButtonAddress, ButtonDefinition, ButtonStatus, Engraving,
};
pub use clock::{Scheduler, TimerToken, VirtualClock};
pub use driver::{ButtonTrigger, TriggerEvent};
pub use trigger::{
    ButtonAction, ButtonEdge, Trigger, TriggerOptions, TriggerState, RAISE_LOWER_EXTENSION,
};
