//! Mock LEAP controller for end-to-end tests
//!
//! Answers a [`Session`](leap_client::Session) over an in-memory
//! [`LinkPeer`] instead of a TLS socket.
//!
//! # Design Philosophy
//!
//! This mock operates at the **link level**, not the socket level. It reads
//! the newline-delimited JSON the session writes and answers with JSON lines,
//! so framing, tag correlation and subscription routing all run for real.
//! TLS, keepalive and inactivity handling are not exercised here; the
//! transport has its own loopback tests.
//!
//! # Limitations
//!
//! - One mock per link. Reconnect tests queue a second link on the
//!   [`MockConnector`] and spawn a second mock for it.
//! - Routes are matched on the exact URL.
//! - Unrouted URLs get a `404 NotFound` exception.
//!
//! # Usage Example
//!
//! ```ignore
//! let connector = MockConnector::new();
//! let controller = MockController::new(connector.push_link())
//!     .route("/zone/1/status", Reply::ok("OneZoneStatus", json!({ "ZoneStatus": { "Level": 50 } })))
//!     .spawn();
//!
//! session.connect().await?;
//! let status: Value = session.read("/zone/1/status").await?;
//! controller.publish("/zone/1/status", "OneZoneStatus", json!({ ... })).await;
//! ```

use leap_client::session::LinkPeer;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// How the mock answers requests to one URL.
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub enum Reply {
    /// `200 OK` with a typed body
    Ok { body_type: String, body: Value },
    /// Same as `Ok`, sent after a delay
    Delayed {
        after: Duration,
        body_type: String,
        body: Value,
    },
    /// `200 OK` with no body at all
    Empty,
    /// Error status with an `ExceptionDetail` message
    Exception { status: String, message: String },
    /// Never answer
    Silent,
}

#[allow(dead_code)]
impl Reply {
    pub fn ok(body_type: &str, body: Value) -> Self {
        Reply::Ok {
            body_type: body_type.to_string(),
            body,
        }
    }

    pub fn delayed(after: Duration, body_type: &str, body: Value) -> Self {
        Reply::Delayed {
            after,
            body_type: body_type.to_string(),
            body,
        }
    }

    pub fn exception(status: &str, message: &str) -> Self {
        Reply::Exception {
            status: status.to_string(),
            message: message.to_string(),
        }
    }
}

/// Control messages from the test to the running mock
enum MockControl {
    Publish {
        url: String,
        body_type: String,
        body: Value,
    },
    Drop,
}

/// Handle for driving the mock from a test
pub struct MockControllerHandle {
    control_tx: mpsc::Sender<MockControl>,
    requests_rx: mpsc::Receiver<Value>,
    task: JoinHandle<()>,
}

#[allow(dead_code)]
impl MockControllerHandle {
    /// Default timeout for request reception
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

    /// Next request the session sent, as JSON
    pub async fn next_request(&mut self) -> Option<Value> {
        tokio::time::timeout(Self::DEFAULT_TIMEOUT, self.requests_rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Send an update to every subscription on `url`
    pub async fn publish(&self, url: &str, body_type: &str, body: Value) {
        let _ = self
            .control_tx
            .send(MockControl::Publish {
                url: url.to_string(),
                body_type: body_type.to_string(),
                body,
            })
            .await;
    }

    /// Close the connection from the controller side
    pub async fn drop_connection(self) {
        let _ = self.control_tx.send(MockControl::Drop).await;
        let _ = self.task.await;
    }

    /// Wait until the session closes the link
    pub async fn closed(self) {
        drop(self.control_tx);
        let _ = self.task.await;
    }
}

/// Scripted controller on one link
pub struct MockController {
    peer: LinkPeer,
    routes: HashMap<String, Reply>,
    /// Subscription tags per URL, in arrival order
    subscribers: HashMap<String, Vec<String>>,
    physical_access: Option<bool>,
    signing_result: Option<(String, String)>,
}

#[allow(dead_code)]
impl MockController {
    pub fn new(peer: LinkPeer) -> Self {
        Self {
            peer,
            routes: HashMap::new(),
            subscribers: HashMap::new(),
            physical_access: None,
            signing_result: None,
        }
    }

    /// Answer requests to `url` with `reply`
    pub fn route(mut self, url: &str, reply: Reply) -> Self {
        self.routes.insert(url.to_string(), reply);
        self
    }

    /// Announce the pairing button state as soon as the link opens
    pub fn physical_access(mut self, granted: bool) -> Self {
        self.physical_access = Some(granted);
        self
    }

    /// Sign CSR commands with the given root and client certificates
    pub fn signs_with(mut self, root: &str, certificate: &str) -> Self {
        self.signing_result = Some((root.to_string(), certificate.to_string()));
        self
    }

    pub fn spawn(self) -> MockControllerHandle {
        let (control_tx, control_rx) = mpsc::channel(32);
        let (requests_tx, requests_rx) = mpsc::channel(64);
        let task = tokio::spawn(self.run(control_rx, requests_tx));

        MockControllerHandle {
            control_tx,
            requests_rx,
            task,
        }
    }

    async fn run(
        mut self,
        mut control_rx: mpsc::Receiver<MockControl>,
        requests_tx: mpsc::Sender<Value>,
    ) {
        if let Some(granted) = self.physical_access {
            let permissions = if granted {
                json!(["Public", "PhysicalAccess"])
            } else {
                json!(["Public"])
            };
            self.peer
                .send_json(&json!({
                    "Header": { "StatusCode": "200 OK", "ContentType": "status;plurality=single" },
                    "CommuniqueType": "ReadResponse",
                    "Body": { "Status": { "Permissions": permissions } }
                }))
                .await;
        }

        let (deferred_tx, mut deferred_rx) = mpsc::unbounded_channel::<Value>();
        let mut ctrl_closed = false;

        loop {
            tokio::select! {
                biased;

                request = self.peer.recv_json() => {
                    let Some(request) = request else {
                        break; // Session closed the link
                    };
                    let _ = requests_tx.try_send(request.clone());
                    self.handle_request(&request, &deferred_tx).await;
                }

                Some(reply) = deferred_rx.recv() => {
                    self.peer.send_json(&reply).await;
                }

                ctrl = control_rx.recv(), if !ctrl_closed => match ctrl {
                    Some(MockControl::Publish { url, body_type, body }) => {
                        self.publish(&url, &body_type, body).await;
                    }
                    Some(MockControl::Drop) => {
                        self.peer.disconnect().await;
                        break;
                    }
                    None => ctrl_closed = true,
                },
            }
        }
    }

    async fn handle_request(&mut self, request: &Value, deferred_tx: &mpsc::UnboundedSender<Value>) {
        if request["Body"]["CommandType"] == "CSR" {
            self.handle_csr().await;
            return;
        }

        let Some(tag) = request["Header"]["ClientTag"].as_str() else {
            return;
        };
        let url = request["Header"]["Url"].as_str().unwrap_or_default().to_string();
        let communique = request["CommuniqueType"].as_str().unwrap_or_default();

        if communique == "SubscribeRequest" {
            self.subscribers
                .entry(url.clone())
                .or_default()
                .push(tag.to_string());
        }

        let response_type = communique.replace("Request", "Response");
        let reply = self.routes.get(&url).cloned().unwrap_or_else(|| {
            Reply::exception("404 NotFound", &format!("{} not found", url))
        });

        let message = match reply {
            Reply::Ok { body_type, body } => {
                envelope(&response_type, tag, &url, "200 OK", Some(&body_type), Some(body))
            }
            Reply::Delayed {
                after,
                body_type,
                body,
            } => {
                let message =
                    envelope(&response_type, tag, &url, "200 OK", Some(&body_type), Some(body));
                let deferred_tx = deferred_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    let _ = deferred_tx.send(message);
                });
                return;
            }
            Reply::Empty => envelope(&response_type, tag, &url, "200 OK", None, None),
            Reply::Exception { status, message } => {
                if let Some(tags) = self.subscribers.get_mut(&url) {
                    tags.retain(|t| t != tag);
                }
                envelope(
                    "ExceptionResponse",
                    tag,
                    &url,
                    &status,
                    Some("ExceptionDetail"),
                    Some(json!({ "Message": message })),
                )
            }
            Reply::Silent => return,
        };

        self.peer.send_json(&message).await;
    }

    async fn handle_csr(&mut self) {
        let Some((root, certificate)) = self.signing_result.clone() else {
            return;
        };
        self.peer
            .send_json(&json!({
                "Header": { "StatusCode": "200 OK", "MessageBodyType": "OneSigningResultDefinition" },
                "CommuniqueType": "CreateResponse",
                "Body": {
                    "SigningResult": { "RootCertificate": root, "Certificate": certificate }
                }
            }))
            .await;
    }

    async fn publish(&mut self, url: &str, body_type: &str, body: Value) {
        let tags = self.subscribers.get(url).cloned().unwrap_or_default();
        for tag in tags {
            let message = envelope("ReadResponse", &tag, url, "200 OK", Some(body_type), Some(body.clone()));
            self.peer.send_json(&message).await;
        }
    }
}

fn envelope(
    communique: &str,
    tag: &str,
    url: &str,
    status: &str,
    body_type: Option<&str>,
    body: Option<Value>,
) -> Value {
    let mut header = json!({ "ClientTag": tag, "Url": url, "StatusCode": status });
    if let Some(body_type) = body_type {
        header["MessageBodyType"] = json!(body_type);
    }

    let mut message = json!({ "CommuniqueType": communique, "Header": header });
    if let Some(body) = body {
        message["Body"] = body;
    }
    message
}
