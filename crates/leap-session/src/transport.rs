//! TLS transport to a controller.
//!
//! A [`Link`] is one live connection: a clonable [`LinkWriter`] for outgoing
//! lines and a receiver of [`TransportEvent`]s. All socket I/O happens in a
//! background task that owns the stream.
//!
//! ## Architecture
//!
//! ```text
//!   LinkWriter ──cmd──▶ ┌────────────────────────┐
//!                       │  I/O task              │ ◀── TLS stream
//!   events ◀───evt───── │  read / write / idle   │ ──▶
//!                       └────────────────────────┘
//! ```
//!
//! [`Connector`] is the seam the session connects through; [`Transport`] is
//! the real TLS implementation and tests substitute in-memory links.

use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, ProtocolVersion, SignatureScheme};
use serde::Serialize;
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

use leap_core::config::SessionSettings;
use leap_core::prelude::*;
use leap_core::Certificate;

const COMMAND_CHANNEL_CAPACITY: usize = 64;
const EVENT_CHANNEL_CAPACITY: usize = 256;
const READ_BUFFER_SIZE: usize = 16 * 1024;

// ---------------------------------------------------------------------------
// Events and commands
// ---------------------------------------------------------------------------

/// Something that happened on a live connection.
#[derive(Debug)]
pub enum TransportEvent {
    /// Raw bytes in arrival order
    Data(Vec<u8>),
    /// The remote closed the connection
    Disconnected,
    /// A socket error or an inactivity timeout; the link may still be usable
    Error(Error),
}

#[derive(Debug)]
enum LinkCommand {
    Write {
        line: String,
        ack: oneshot::Sender<Result<()>>,
    },
    Close,
}

// ---------------------------------------------------------------------------
// Link
// ---------------------------------------------------------------------------

/// Handle for writing to a live connection.
#[derive(Debug, Clone)]
pub struct LinkWriter {
    cmd_tx: mpsc::Sender<LinkCommand>,
}

impl LinkWriter {
    /// Write one line; a trailing newline is added.
    ///
    /// Resolves once the bytes have been handed to the socket.
    pub async fn write_line(&self, mut line: String) -> Result<()> {
        line.push('\n');
        let (ack, ack_rx) = oneshot::channel();

        self.cmd_tx
            .send(LinkCommand::Write { line, ack })
            .await
            .map_err(|_| Error::NotConnected)?;

        ack_rx.await.map_err(|_| Error::NotConnected)?
    }

    /// Serialize `message` as one JSON line and write it.
    pub async fn send<T: Serialize>(&self, message: &T) -> Result<()> {
        let line = serde_json::to_string(message)?;
        trace!("-> {}", line);
        self.write_line(line).await
    }

    /// Ask the I/O task to shut the connection down. Safe to call repeatedly.
    pub fn close(&self) {
        if let Err(mpsc::error::TrySendError::Full(_)) = self.cmd_tx.try_send(LinkCommand::Close) {
            debug!("Link command queue full, connection closes when writers drop");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.cmd_tx.is_closed()
    }
}

/// One established connection.
#[derive(Debug)]
pub struct Link {
    protocol: String,
    writer: LinkWriter,
    events: mpsc::Receiver<TransportEvent>,
}

impl Link {
    /// Run the I/O task over any byte stream.
    pub fn from_stream<S>(stream: S, protocol: impl Into<String>, inactivity: Duration) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        tokio::spawn(run_io_loop(stream, cmd_rx, event_tx, inactivity));

        Self {
            protocol: protocol.into(),
            writer: LinkWriter { cmd_tx },
            events: event_rx,
        }
    }

    /// Negotiated protocol, e.g. `"TLSv1.3"`.
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn writer(&self) -> LinkWriter {
        self.writer.clone()
    }

    pub fn into_parts(self) -> (String, LinkWriter, mpsc::Receiver<TransportEvent>) {
        (self.protocol, self.writer, self.events)
    }
}

async fn run_io_loop<S>(
    stream: S,
    mut cmd_rx: mpsc::Receiver<LinkCommand>,
    event_tx: mpsc::Sender<TransportEvent>,
    inactivity: Duration,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        tokio::select! {
            read = timeout(inactivity, reader.read(&mut buf)) => {
                let event = match read {
                    Err(_) => {
                        warn!("No data for {:?}", inactivity);
                        TransportEvent::Error(Error::InactivityTimeout)
                    }
                    Ok(Ok(0)) => {
                        debug!("Connection closed by peer");
                        let _ = event_tx.send(TransportEvent::Disconnected).await;
                        break;
                    }
                    Ok(Ok(n)) => TransportEvent::Data(buf[..n].to_vec()),
                    Ok(Err(e)) => {
                        warn!("Socket read error: {}", e);
                        let _ = event_tx.send(TransportEvent::Error(Error::transport(e.to_string()))).await;
                        let _ = event_tx.send(TransportEvent::Disconnected).await;
                        break;
                    }
                };

                if event_tx.send(event).await.is_err() {
                    debug!("Event receiver dropped, closing connection");
                    let _ = writer.shutdown().await;
                    break;
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(LinkCommand::Write { line, ack }) => {
                        let result = write_all(&mut writer, line.as_bytes()).await;
                        if let Err(e) = &result {
                            warn!("Socket write error: {}", e);
                        }
                        let _ = ack.send(result);
                    }
                    Some(LinkCommand::Close) | None => {
                        debug!("Closing connection");
                        let _ = writer.shutdown().await;
                        break;
                    }
                }
            }
        }
    }
}

async fn write_all<W: AsyncWrite + Unpin>(writer: &mut W, bytes: &[u8]) -> Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Connector seam
// ---------------------------------------------------------------------------

/// Opens links to one controller endpoint.
#[trait_variant::make(Connector: Send)]
pub trait LocalConnector {
    /// Establish a new connection, failing without retaining anything.
    async fn connect(&self) -> Result<Link>;
}

// ---------------------------------------------------------------------------
// TLS transport
// ---------------------------------------------------------------------------

/// TLS connector for a fixed `host:port`.
///
/// With a certificate the client authenticates itself (secure port); without
/// one it connects anonymously (pairing port). The controller's own
/// certificate is never validated.
#[derive(Debug, Clone)]
pub struct Transport {
    host: String,
    port: u16,
    certificate: Option<Certificate>,
    settings: SessionSettings,
}

impl Transport {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        certificate: Option<Certificate>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            certificate,
            settings,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_secure(&self) -> bool {
        self.certificate.is_some()
    }
}

impl Connector for Transport {
    async fn connect(&self) -> Result<Link> {
        let config = build_client_config(self.certificate.as_ref())?;
        let addr = format!("{}:{}", self.host, self.port);
        let connect_timeout = self.settings.connect_timeout();

        debug!("Connecting to {}", addr);
        let tcp = timeout(connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| Error::transport(format!("connect to {} timed out", addr)))?
            .map_err(|e| Error::transport(format!("connect to {} failed: {}", addr, e)))?;

        enable_keepalive(&tcp, self.settings.keepalive_delay());

        let server_name = ServerName::try_from(self.host.clone())
            .map_err(|e| Error::transport(format!("invalid host {:?}: {}", self.host, e)))?;

        let stream = timeout(
            connect_timeout,
            tokio_rustls::TlsConnector::from(config).connect(server_name, tcp),
        )
        .await
        .map_err(|_| Error::transport(format!("TLS handshake with {} timed out", addr)))?
        .map_err(|e| Error::transport(format!("TLS handshake with {} failed: {}", addr, e)))?;

        let protocol = protocol_name(stream.get_ref().1.protocol_version());
        info!("Connected to {} ({})", addr, protocol);

        Ok(Link::from_stream(
            stream,
            protocol,
            self.settings.inactivity_timeout(),
        ))
    }
}

fn enable_keepalive(tcp: &TcpStream, delay: Duration) {
    let keepalive = TcpKeepalive::new().with_time(delay);
    if let Err(e) = SockRef::from(tcp).set_tcp_keepalive(&keepalive) {
        warn!("Failed to enable TCP keepalive: {}", e);
    }
}

fn protocol_name(version: Option<ProtocolVersion>) -> &'static str {
    match version {
        Some(ProtocolVersion::TLSv1_3) => "TLSv1.3",
        Some(ProtocolVersion::TLSv1_2) => "TLSv1.2",
        _ => "Unknown",
    }
}

/// Build the client TLS configuration for optional client credentials.
pub fn build_client_config(certificate: Option<&Certificate>) -> Result<Arc<ClientConfig>> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::tls(format!("protocol versions: {}", e)))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert { provider }));

    let config = match certificate {
        Some(certificate) => {
            let ca = parse_certificates(certificate.ca.as_bytes())?;
            if ca.is_empty() {
                return Err(Error::certificate("no CA certificate found"));
            }

            let chain = parse_certificates(certificate.cert.as_bytes())?;
            if chain.is_empty() {
                return Err(Error::certificate("no client certificate found"));
            }
            let key = parse_private_key(certificate.key.as_bytes())?;

            builder
                .with_client_auth_cert(chain, key)
                .map_err(|e| Error::tls(format!("client certificate rejected: {}", e)))?
        }
        None => builder.with_no_client_auth(),
    };

    Ok(Arc::new(config))
}

fn parse_certificates(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    CertificateDer::pem_slice_iter(pem)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::certificate(format!("failed to parse certificates: {}", e)))
}

fn parse_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>> {
    PrivateKeyDer::from_pem_slice(pem)
        .map_err(|e| Error::certificate(format!("failed to parse private key: {}", e)))
}

/// Accepts whatever certificate the controller presents while still checking
/// handshake signatures.
#[derive(Debug)]
struct AcceptAnyServerCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

// ---------------------------------------------------------------------------
// In-memory links
// ---------------------------------------------------------------------------

/// The controller side of an in-memory [`Link`].
#[cfg(any(test, feature = "test-helpers"))]
#[derive(Debug)]
pub struct LinkPeer {
    cmd_rx: mpsc::Receiver<LinkCommand>,
    event_tx: mpsc::Sender<TransportEvent>,
}

#[cfg(any(test, feature = "test-helpers"))]
impl Link {
    /// Create a link with no socket behind it, plus the peer that drives it.
    pub fn pair(protocol: impl Into<String>) -> (Link, LinkPeer) {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let link = Link {
            protocol: protocol.into(),
            writer: LinkWriter { cmd_tx },
            events: event_rx,
        };
        (link, LinkPeer { cmd_rx, event_tx })
    }
}

#[cfg(any(test, feature = "test-helpers"))]
impl LinkPeer {
    /// Next line the client wrote, without its newline.
    ///
    /// Returns `None` once the client closed the link.
    pub async fn recv_line(&mut self) -> Option<String> {
        match self.cmd_rx.recv().await? {
            LinkCommand::Write { mut line, ack } => {
                let _ = ack.send(Ok(()));
                if line.ends_with('\n') {
                    line.pop();
                }
                Some(line)
            }
            LinkCommand::Close => {
                self.cmd_rx.close();
                None
            }
        }
    }

    /// Next line the client wrote, parsed as JSON.
    pub async fn recv_json(&mut self) -> Option<serde_json::Value> {
        let line = self.recv_line().await?;
        serde_json::from_str(&line).ok()
    }

    /// Deliver raw bytes to the client.
    pub async fn send_bytes(&self, bytes: impl Into<Vec<u8>>) -> bool {
        self.event_tx
            .send(TransportEvent::Data(bytes.into()))
            .await
            .is_ok()
    }

    /// Deliver one JSON value as a newline-terminated line.
    pub async fn send_json(&self, value: &serde_json::Value) -> bool {
        self.send_bytes(format!("{}\n", value)).await
    }

    /// Simulate the remote end closing the connection.
    pub async fn disconnect(&self) -> bool {
        self.event_tx
            .send(TransportEvent::Disconnected)
            .await
            .is_ok()
    }

    /// Report a socket error to the client.
    pub async fn fail(&self, error: Error) -> bool {
        self.event_tx
            .send(TransportEvent::Error(error))
            .await
            .is_ok()
    }
}

/// Connector handing out queued in-memory links; refuses when empty.
#[cfg(any(test, feature = "test-helpers"))]
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    links: Arc<std::sync::Mutex<std::collections::VecDeque<Link>>>,
}

#[cfg(any(test, feature = "test-helpers"))]
impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a fresh link and return its peer.
    pub fn push_link(&self) -> LinkPeer {
        let (link, peer) = Link::pair("TLSv1.3");
        self.links
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(link);
        peer
    }

    pub fn queued(&self) -> usize {
        self.links.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(any(test, feature = "test-helpers"))]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Link> {
        self.links
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .ok_or_else(|| Error::transport("connect ECONNREFUSED"))
    }
}
