//! # leap-core - Shared Types
//!
//! Foundation crate for leap-client. Provides the error type, logging setup,
//! wire envelope types, credentials and settings used by the session and
//! trigger crates.
//!
//! ## Public API
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Error enum with `fatal` vs `recoverable` classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ### Wire Types (`message`)
//! - [`Request`], [`CommuniqueType`] - Outgoing tagged requests
//! - [`Response`], [`ResponseStatus`] - Decoded incoming envelopes
//! - [`PairingRequest`] - CSR signing command for physical connections
//!
//! ### Credentials (`certificate`)
//! - [`Certificate`] - `{ca, key, cert}` PEM triple
//! - [`CredentialProvider`] - Injected credential source
//!
//! ### Settings (`config`)
//! - [`Settings`] - Session timing, trigger windows, per-button overrides
//!
//! ## Prelude
//!
//! ```rust
//! use leap_core::prelude::*;
//! ```

pub mod certificate;
pub mod config;
pub mod error;
pub mod logging;
pub mod message;

/// Prelude for common imports used throughout all leap-client crates
pub mod prelude {
    pub use crate::error::{Error, Result, ResultExt};
    pub use tracing::{debug, error, info, instrument, trace, warn};
}

pub use certificate::{Certificate, CertificateRequest, CredentialProvider, NoCredentials};
pub use config::{ButtonSettings, SessionSettings, Settings, TriggerSettings};
pub use error::{Error, Result, ResultExt};
pub use message::{
    CommuniqueType, ExceptionDetail, PairingRequest, Request, Response, ResponseHeader,
    ResponseStatus,
};
