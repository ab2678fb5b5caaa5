//! Session over one controller connection.
//!
//! A [`Session`] multiplexes tagged requests over a single [`Link`], keeps
//! subscriptions alive across reconnects and gates pairing connections on
//! the controller's physical button.
//!
//! ## Modes
//!
//! - **Secure**: the client presented a paired certificate. `read`,
//!   `update`, `command` and `subscribe` are available.
//! - **Physical**: anonymous pairing connection. `connect` waits for the
//!   controller to announce `PhysicalAccess`; only `authenticate` is
//!   available, and every incoming line is an unsolicited message.
//!
//! ## Dispatch
//!
//! ```text
//! line ─▶ Framer ─▶ Response ─┬─ untagged ──▶ one-shot waiters + Message event
//!                             └─ tagged ────▶ pending request (resolve once)
//!                                             or subscription handler
//! ```

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use futures_util::future::join_all;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use uuid::Uuid;

use leap_core::config::SessionSettings;
use leap_core::prelude::*;
use leap_core::{
    Certificate, CertificateRequest, CommuniqueType, CredentialProvider, PairingRequest, Request,
    Response,
};

use crate::framer::Framer;
use crate::subscriptions::{Subscription, SubscriptionTable};
use crate::tracker::RequestTracker;
use crate::transport::{Connector, LinkWriter, Transport, TransportEvent};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Which port and feature set a session uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Secure,
    Physical,
}

/// Lifecycle and unsolicited traffic reported by a session.
#[derive(Debug)]
pub enum SessionEvent {
    /// Connected, gate passed and subscriptions replayed
    Connect { protocol: String },
    /// The connection dropped without `disconnect()` being called
    Disconnect,
    /// An untagged message (or any message on a physical connection)
    Message(Response),
    /// Transport or decode error; the session may still be usable
    Error(Error),
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SessionState {
    /// Set by `disconnect()`; suppresses the Disconnect event
    torn_down: bool,
    /// Bumped whenever the current link is replaced or dropped
    generation: u64,
    writer: Option<LinkWriter>,
    reader: Option<JoinHandle<()>>,
    requests: RequestTracker,
    subscriptions: SubscriptionTable,
    /// Each receives the next unsolicited message, once
    waiters: Vec<oneshot::Sender<Response>>,
}

struct Shared {
    mode: SessionMode,
    settings: SessionSettings,
    events: mpsc::Sender<SessionEvent>,
    state: Mutex<SessionState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Deliver a lifecycle event, waiting for channel space.
    async fn emit(&self, event: SessionEvent) {
        if self.events.send(event).await.is_err() {
            debug!("Session event receiver dropped");
        }
    }

    /// Deliver an unsolicited message without blocking dispatch.
    fn emit_message(&self, response: Response) {
        if let Err(e) = self.events.try_send(SessionEvent::Message(response)) {
            warn!("Failed to emit session message: {}", e);
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        let state = self.lock();
        !state.torn_down && state.generation == generation
    }

    fn decode(&self, line: &str) -> Result<Response> {
        trace!("<- {}", line);
        match self.mode {
            SessionMode::Secure => Response::parse(line),
            SessionMode::Physical => Response::parse_raw(line),
        }
    }

    fn dispatch(&self, response: Response) {
        let tag = match response.tag() {
            Some(tag) if self.mode == SessionMode::Secure => tag.to_string(),
            _ => {
                self.deliver_unsolicited(response);
                return;
            }
        };

        let (pending, subscription) = {
            let mut state = self.lock();
            match state.requests.take(&tag) {
                Some(pending) => {
                    if response.is_successful() {
                        if let Some(subscription) = pending.subscription() {
                            debug!("Subscribed to {} as {}", subscription.url(), tag);
                            state.subscriptions.insert(tag.clone(), subscription.clone());
                        }
                    }
                    (Some(pending), None)
                }
                None => (None, state.subscriptions.get(&tag).cloned()),
            }
        };

        if let Some(pending) = pending {
            debug!(
                "Response for {} {} ({})",
                pending.request().communique_type,
                pending.request().url(),
                response
                    .header
                    .status_code
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default()
            );
            pending.resolve(Ok(response));
        } else if let Some(subscription) = subscription {
            subscription.deliver(response.body);
        } else {
            debug!("No request or subscription for tag {}", tag);
        }
    }

    fn deliver_unsolicited(&self, response: Response) {
        let waiters = std::mem::take(&mut self.lock().waiters);
        for waiter in waiters {
            let _ = waiter.send(response.clone());
        }
        self.emit_message(response);
    }

    fn wait_unsolicited(&self) -> oneshot::Receiver<Response> {
        let (tx, rx) = oneshot::channel();
        self.lock().waiters.push(tx);
        rx
    }

    fn expire(&self, tag: &str) {
        let pending = self.lock().requests.take(tag);
        if let Some(pending) = pending {
            warn!(
                "Request {} to {} timed out",
                tag,
                pending.request().url()
            );
            pending.expire();
        }
    }

    /// The link for `generation` closed on its own.
    async fn connection_lost(&self, generation: u64) {
        {
            let mut state = self.lock();
            if state.torn_down || state.generation != generation {
                return;
            }
            state.generation += 1;
            state.writer = None;
            state.reader = None;
            state.waiters.clear();
        }

        info!("Connection lost");
        self.emit(SessionEvent::Disconnect).await;
    }
}

async fn run_reader(
    shared: Weak<Shared>,
    generation: u64,
    mut events: mpsc::Receiver<TransportEvent>,
) {
    let mut framer = Framer::new();

    while let Some(event) = events.recv().await {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        if !shared.is_current(generation) {
            return;
        }

        match event {
            TransportEvent::Data(bytes) => {
                for line in framer.feed(&bytes) {
                    match line.and_then(|line| shared.decode(&line)) {
                        Ok(response) => shared.dispatch(response),
                        Err(e) => {
                            warn!("Failed to decode message: {}", e);
                            shared.emit(SessionEvent::Error(e)).await;
                        }
                    }
                }
            }
            TransportEvent::Error(e) => {
                warn!("Transport error: {}", e);
                shared.emit(SessionEvent::Error(e)).await;
            }
            TransportEvent::Disconnected => break,
        }
    }

    if let Some(shared) = shared.upgrade() {
        shared.connection_lost(generation).await;
    }
}

fn new_tag() -> String {
    Uuid::new_v4().to_string()
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One controller session. Clones share the same connection.
pub struct Session<C: Connector = Transport> {
    connector: Arc<C>,
    shared: Arc<Shared>,
}

impl<C: Connector> Clone for Session<C> {
    fn clone(&self) -> Self {
        Self {
            connector: self.connector.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl<C: Connector> std::fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("Session")
            .field("mode", &self.shared.mode)
            .field("connected", &state.writer.is_some())
            .field("pending", &state.requests.len())
            .field("subscriptions", &state.subscriptions.len())
            .finish()
    }
}

impl Session<Transport> {
    /// Session to `host` over TLS.
    ///
    /// Secure (port `secure_port`) when `credentials` yields a certificate,
    /// physical (port `pairing_port`) otherwise.
    pub fn new(
        host: impl Into<String>,
        credentials: &dyn CredentialProvider,
        settings: SessionSettings,
        events: mpsc::Sender<SessionEvent>,
    ) -> Self {
        let certificate = credentials.certificate();
        let (mode, port) = match certificate {
            Some(_) => (SessionMode::Secure, settings.secure_port),
            None => (SessionMode::Physical, settings.pairing_port),
        };

        let transport = Transport::new(host, port, certificate, settings.clone());
        Self::with_connector(transport, mode, settings, events)
    }
}

impl<C: Connector + Sync + 'static> Session<C> {
    pub fn with_connector(
        connector: C,
        mode: SessionMode,
        settings: SessionSettings,
        events: mpsc::Sender<SessionEvent>,
    ) -> Self {
        Self {
            connector: Arc::new(connector),
            shared: Arc::new(Shared {
                mode,
                settings,
                events,
                state: Mutex::new(SessionState::default()),
            }),
        }
    }

    pub fn mode(&self) -> SessionMode {
        self.shared.mode
    }

    pub fn is_secure(&self) -> bool {
        self.shared.mode == SessionMode::Secure
    }

    pub fn is_connected(&self) -> bool {
        self.shared
            .lock()
            .writer
            .as_ref()
            .is_some_and(|writer| !writer.is_closed())
    }

    /// Number of requests awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.shared.lock().requests.len()
    }

    /// URLs with an acknowledged subscription.
    pub fn subscriptions(&self) -> Vec<String> {
        self.shared.lock().subscriptions.urls()
    }

    // ── Lifecycle ──────────────────────────────────────────────────────

    /// Connect, replacing any current link.
    ///
    /// Physical sessions wait for the `PhysicalAccess` announcement first.
    /// Subscriptions from earlier connections are replayed before the
    /// Connect event is emitted; individual replay failures are logged.
    pub async fn connect(&self) -> Result<()> {
        let link = match self.connector.connect().await {
            Ok(link) => link,
            Err(e) => {
                warn!("Connect failed: {}", e);
                self.shared
                    .emit(SessionEvent::Error(Error::transport(e.to_string())))
                    .await;
                return Err(e);
            }
        };
        let (protocol, writer, events) = link.into_parts();

        let gate = {
            let mut state = self.shared.lock();
            if let Some(old) = state.writer.take() {
                debug!("Replacing existing connection");
                old.close();
            }
            if let Some(reader) = state.reader.take() {
                reader.abort();
            }

            state.torn_down = false;
            state.generation += 1;
            state.writer = Some(writer);
            state.waiters.clear();

            let gate = match self.shared.mode {
                SessionMode::Physical => {
                    let (tx, rx) = oneshot::channel();
                    state.waiters.push(tx);
                    Some(rx)
                }
                SessionMode::Secure => None,
            };

            state.reader = Some(tokio::spawn(run_reader(
                Arc::downgrade(&self.shared),
                state.generation,
                events,
            )));

            let cancelled = state.requests.cancel_all();
            if cancelled > 0 {
                debug!("Cancelled {} request(s) from the previous connection", cancelled);
            }
            gate
        };

        if let Some(gate) = gate {
            self.await_physical_access(gate).await?;
        }

        self.resubscribe().await;

        info!("Session ready ({})", protocol);
        self.shared.emit(SessionEvent::Connect { protocol }).await;
        Ok(())
    }

    async fn await_physical_access(&self, gate: oneshot::Receiver<Response>) -> Result<()> {
        info!("Waiting for physical access");
        match timeout(self.shared.settings.physical_access_timeout(), gate).await {
            Ok(Ok(message)) if message.grants_physical_access() => {
                debug!("Physical access granted");
                Ok(())
            }
            Ok(Ok(_)) => {
                self.disconnect();
                Err(Error::pairing("Unknown pairing error"))
            }
            Ok(Err(_)) => Err(Error::NotConnected),
            Err(_) => {
                self.disconnect();
                Err(Error::PhysicalAccessTimeout)
            }
        }
    }

    async fn resubscribe(&self) {
        let replay = self.shared.lock().subscriptions.take_all();
        if replay.is_empty() {
            return;
        }

        info!("Restoring {} subscription(s)", replay.len());
        let attempts = replay.into_iter().map(|(old_tag, subscription)| async move {
            let url = subscription.url().to_string();
            match self.subscribe_with(subscription.clone()).await {
                Ok(()) => {}
                Err(e) => {
                    warn!("Failed to restore subscription to {}: {}", url, e);
                    self.shared
                        .lock()
                        .subscriptions
                        .insert(old_tag, subscription);
                }
            }
        });
        join_all(attempts).await;
    }

    /// Tear down: cancel in-flight requests, forget subscriptions and close
    /// the link. No Disconnect event is emitted. Idempotent.
    pub fn disconnect(&self) {
        let (writer, reader) = {
            let mut state = self.shared.lock();
            state.torn_down = true;
            state.generation += 1;
            state.subscriptions.clear();
            state.waiters.clear();
            state.requests.cancel_all();
            (state.writer.take(), state.reader.take())
        };

        if let Some(writer) = writer {
            info!("Disconnecting");
            writer.close();
        }
        if let Some(reader) = reader {
            reader.abort();
        }
    }

    // ── Requests ───────────────────────────────────────────────────────

    fn require_secure(&self) -> Result<()> {
        match self.shared.mode {
            SessionMode::Secure => Ok(()),
            SessionMode::Physical => Err(Error::SecureOnly),
        }
    }

    fn require_physical(&self) -> Result<()> {
        match self.shared.mode {
            SessionMode::Physical => Ok(()),
            SessionMode::Secure => Err(Error::PhysicalOnly),
        }
    }

    fn writer(&self) -> Result<LinkWriter> {
        self.shared.lock().writer.clone().ok_or(Error::NotConnected)
    }

    /// Send a tagged request and wait for its response.
    ///
    /// The slot is registered before the write so a fast reply cannot be
    /// missed. Unanswered requests settle with [`Response::timeout`].
    async fn request(
        &self,
        communique_type: CommuniqueType,
        url: &str,
        body: Option<Value>,
        subscription: Option<Subscription>,
    ) -> Result<Response> {
        self.require_secure()?;

        let tag = new_tag();
        let request = Request::new(communique_type, tag.clone(), url, body);

        let (writer, response_rx) = {
            let mut state = self.shared.lock();
            let writer = state.writer.clone().ok_or(Error::NotConnected)?;

            let shared = Arc::downgrade(&self.shared);
            let timer_tag = tag.clone();
            let request_timeout = self.shared.settings.request_timeout();
            let timer = tokio::spawn(async move {
                tokio::time::sleep(request_timeout).await;
                if let Some(shared) = shared.upgrade() {
                    shared.expire(&timer_tag);
                }
            });

            let rx = state
                .requests
                .register(request.clone(), subscription, Some(timer));
            (writer, rx)
        };

        debug!("{} {} ({})", communique_type, url, tag);
        if let Err(e) = writer.send(&request).await {
            if let Some(pending) = self.shared.lock().requests.take(&tag) {
                pending.resolve(Err(Error::NotConnected));
            }
            return Err(e);
        }

        response_rx.await.map_err(|_| Error::RequestCancelled)?
    }

    /// Read `url` and deserialize its body.
    pub async fn read<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .request(CommuniqueType::ReadRequest, url, None, None)
            .await?;

        if response.body.is_none() {
            return Err(Error::no_body(url));
        }
        if let Some(exception) = response.exception() {
            return Err(Error::exception(exception.message));
        }
        response.body_as()
    }

    /// Update `url` with `body` and deserialize the controller's reply.
    pub async fn update<T, B>(&self, url: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let body = serde_json::to_value(body)?;
        let response = self
            .request(CommuniqueType::UpdateRequest, url, Some(body), None)
            .await?;

        if let Some(exception) = response.exception() {
            return Err(Error::exception(exception.message));
        }
        response.body_as()
    }

    /// Send a command to `url`. Settles once answered or timed out; the
    /// controller's verdict is only logged.
    pub async fn command<B>(&self, url: &str, body: &B) -> Result<()>
    where
        B: Serialize + ?Sized,
    {
        let body = serde_json::to_value(body)?;
        let response = self
            .request(CommuniqueType::CreateRequest, url, Some(body), None)
            .await?;

        if let Some(exception) = response.exception() {
            warn!("Command to {} failed: {}", url, exception.message);
        }
        Ok(())
    }

    /// Subscribe to `url`; `handler` receives each update's body.
    ///
    /// Resolves on the controller's acknowledgement. The handler stays
    /// registered until `disconnect()` and is carried across reconnects.
    pub async fn subscribe<T, F>(&self, url: &str, handler: F) -> Result<()>
    where
        T: DeserializeOwned,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.subscribe_with(Subscription::typed(url, handler)).await
    }

    /// Subscribe with a prepared [`Subscription`].
    pub async fn subscribe_with(&self, subscription: Subscription) -> Result<()> {
        let url = subscription.url().to_string();
        let response = self
            .request(CommuniqueType::SubscribeRequest, &url, None, Some(subscription))
            .await?;

        if response.is_successful() {
            return Ok(());
        }

        let status = response
            .header
            .status_code
            .as_ref()
            .map(ToString::to_string)
            .or_else(|| response.exception().map(|e| e.message))
            .unwrap_or_else(|| "no status".to_string());
        Err(Error::subscribe(url, status))
    }

    // ── Pairing ────────────────────────────────────────────────────────

    /// Have the controller sign `csr` and return the resulting credentials.
    pub async fn authenticate(&self, csr: &CertificateRequest) -> Result<Certificate> {
        self.require_physical()?;
        let writer = self.writer()?;

        let reply = self.shared.wait_unsolicited();
        writer.send(&PairingRequest::new(csr.csr_pem.clone())).await?;

        let message = match timeout(self.shared.settings.authenticate_timeout(), reply).await {
            Ok(Ok(message)) => message,
            Ok(Err(_)) => return Err(Error::NotConnected),
            Err(_) => return Err(Error::AuthenticationTimeout),
        };

        let body = message
            .body
            .ok_or_else(|| Error::pairing("pairing response has no body"))?;
        let certificate = Certificate::from_signing_response(&body, csr)?;
        info!("Pairing complete");
        Ok(certificate)
    }
}
