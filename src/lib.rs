//! leap-client
//!
//! Client for LEAP home-automation controllers: a TLS session layer with
//! tagged requests and reconnect-safe subscriptions, and a trigger engine
//! that turns raw keypad edges into Press / DoublePress / LongPress actions.
//!
//! The member crates are re-exported under short names:
//!
//! - [`core`] - errors, logging, wire types, credentials, settings
//! - [`session`] - connection, request correlation, subscriptions, pairing
//! - [`trigger`] - button state machine and its tokio driver
//!
//! [`prelude`] collects the types most embedders need.

pub use leap_core as core;
pub use leap_session as session;
pub use leap_trigger as trigger;

pub use leap_core::{Certificate, CertificateRequest, Error, Result, Settings};
pub use leap_session::{Session, SessionEvent, SessionMode};
pub use leap_trigger::{ButtonAction, ButtonTrigger, TriggerEvent, TriggerOptions};

/// Common imports for applications embedding a session and its triggers
pub mod prelude {
    pub use leap_core::prelude::*;
    pub use leap_core::{Certificate, CertificateRequest, CredentialProvider, Settings};
    pub use leap_session::{Session, SessionEvent, SessionMode};
    pub use leap_trigger::{
        watch_button, ButtonAction, ButtonDefinition, ButtonTrigger, TriggerEvent, TriggerOptions,
    };
}
