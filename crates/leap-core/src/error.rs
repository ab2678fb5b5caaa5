//! Error types shared by every leap-client crate

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Error types organized by layer
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────
    // Transport Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("TLS configuration error: {message}")]
    Tls { message: String },

    #[error("Certificate error: {message}")]
    Certificate { message: String },

    #[error("connect ETIMEDOUT")]
    InactivityTimeout,

    #[error("Connection not established")]
    NotConnected,

    // ─────────────────────────────────────────────────────────────
    // Protocol Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("{url} no body")]
    NoBody { url: String },

    #[error("{message}")]
    Exception { message: String },

    #[error("Subscription to {url} was not acknowledged: {status}")]
    Subscribe { url: String, status: String },

    // ─────────────────────────────────────────────────────────────
    // Request Lifecycle Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Request cancelled")]
    RequestCancelled,

    #[error("tag \"{tag}\" reused")]
    TagReused { tag: String },

    // ─────────────────────────────────────────────────────────────
    // Mode Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Only available for secure connections")]
    SecureOnly,

    #[error("Only available for physical connections")]
    PhysicalOnly,

    // ─────────────────────────────────────────────────────────────
    // Pairing Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Physical timeout exceeded")]
    PhysicalAccessTimeout,

    #[error("Authentication timeout exceeded")]
    AuthenticationTimeout,

    #[error("Pairing error: {message}")]
    Pairing { message: String },

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ─────────────────────────────────────────────────────────────
    // Channel/Communication Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Channel closed unexpectedly")]
    ChannelClosed,
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls {
            message: message.into(),
        }
    }

    pub fn certificate(message: impl Into<String>) -> Self {
        Self::Certificate {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn no_body(url: impl Into<String>) -> Self {
        Self::NoBody { url: url.into() }
    }

    pub fn exception(message: impl Into<String>) -> Self {
        Self::Exception {
            message: message.into(),
        }
    }

    pub fn subscribe(url: impl Into<String>, status: impl Into<String>) -> Self {
        Self::Subscribe {
            url: url.into(),
            status: status.into(),
        }
    }

    pub fn tag_reused(tag: impl Into<String>) -> Self {
        Self::TagReused { tag: tag.into() }
    }

    pub fn pairing(message: impl Into<String>) -> Self {
        Self::Pairing {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Check if this is a recoverable error
    ///
    /// Recoverable errors are local to one call or one connection; the
    /// session (or a fresh `connect()`) can carry on after them.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::Json(_)
                | Error::Transport { .. }
                | Error::InactivityTimeout
                | Error::NotConnected
                | Error::Protocol { .. }
                | Error::NoBody { .. }
                | Error::Exception { .. }
                | Error::Subscribe { .. }
                | Error::RequestCancelled
                | Error::TagReused { .. }
        )
    }

    /// Check if this error is fatal to the operation that raised it
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Tls { .. }
                | Error::Certificate { .. }
                | Error::PhysicalAccessTimeout
                | Error::AuthenticationTimeout
                | Error::Pairing { .. }
                | Error::SecureOnly
                | Error::PhysicalOnly
        )
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", f(), err);
            err
        })
    }
}
