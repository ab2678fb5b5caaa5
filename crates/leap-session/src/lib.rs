//! # leap-session - Controller Session Layer
//!
//! Speaks the newline-delimited JSON-over-TLS protocol of LEAP controllers.
//!
//! Depends on [`leap_core`] for wire types, errors and settings.
//!
//! ## Public API
//!
//! ### Session (`session`)
//! - [`Session`] - Tagged request/response, subscriptions, pairing gate
//! - [`SessionEvent`] - Connect / Disconnect / Message / Error notifications
//! - [`SessionMode`] - Secure (paired) or physical (pairing) connection
//!
//! ### Transport (`transport`)
//! - [`Transport`] - TLS connector for one `host:port`
//! - [`Connector`] - Seam for substituting the connection source
//! - [`Link`], [`LinkWriter`], [`TransportEvent`] - One live connection
//!
//! ### Building Blocks
//! - [`Framer`] - Splits the byte stream into lines
//! - [`RequestTracker`] - In-flight requests keyed by tag
//! - [`Subscription`] - URL plus update handler, replayed on reconnect
//!
//! ### Pairing (`pairing`)
//! - [`reachable()`] - Probe the pairing port
//! - [`pair()`] - Obtain a client certificate

pub mod framer;
pub mod pairing;
pub mod session;
pub mod subscriptions;
pub mod tracker;
pub mod transport;

pub use framer::Framer;
pub use pairing::{pair, pair_session, reachable};
pub use session::{Session, SessionEvent, SessionMode};
pub use subscriptions::{Handler, Subscription};
pub use tracker::RequestTracker;
pub use transport::{Connector, LocalConnector, Link, LinkWriter, Transport, TransportEvent};

#[cfg(any(test, feature = "test-helpers"))]
pub use transport::{LinkPeer, MockConnector};
