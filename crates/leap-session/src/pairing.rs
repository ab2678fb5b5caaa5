//! Pairing helpers
//!
//! Pairing happens on the anonymous port: connect, wait for someone to press
//! the controller's pairing button, send a CSR and receive a signed client
//! certificate. Generating the CSR and its key is left to the caller.

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

use leap_core::config::SessionSettings;
use leap_core::prelude::*;
use leap_core::{Certificate, CertificateRequest, NoCredentials};

use crate::session::Session;
use crate::transport::Connector;

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Whether `host` accepts TCP connections on the pairing port. Never errors.
pub async fn reachable(host: &str, settings: &SessionSettings) -> bool {
    let addr = format!("{}:{}", host, settings.pairing_port);
    match timeout(settings.reachable_timeout(), TcpStream::connect(&addr)).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            debug!("{} not reachable: {}", addr, e);
            false
        }
        Err(_) => {
            debug!("{} not reachable: timed out", addr);
            false
        }
    }
}

/// Pair with the controller at `host`.
///
/// Blocks until the pairing button is pressed (bounded by
/// `physical_access_timeout_ms`).
pub async fn pair(
    host: &str,
    settings: &SessionSettings,
    request: &CertificateRequest,
) -> Result<Certificate> {
    let (event_tx, mut event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            debug!("Pairing session event: {:?}", event);
        }
    });

    let session = Session::new(host, &NoCredentials, settings.clone(), event_tx);
    pair_session(&session, request).await
}

/// Run the pairing exchange on an unconnected physical session, always
/// disconnecting afterwards.
pub async fn pair_session<C>(session: &Session<C>, request: &CertificateRequest) -> Result<Certificate>
where
    C: Connector + Sync + 'static,
{
    let result = async {
        session.connect().await?;
        session.authenticate(request).await
    }
    .await;

    session.disconnect();
    if let Err(e) = &result {
        warn!("Pairing failed: {}", e);
    }
    result
}
