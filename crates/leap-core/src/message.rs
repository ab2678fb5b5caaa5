//! Wire envelope types for the LEAP line protocol.
//!
//! Every line on the wire is one JSON envelope:
//!
//! ```text
//! {"CommuniqueType": "...", "Header": {"ClientTag": "...", "Url": "...",
//!   "StatusCode": "200 OK", "MessageBodyType": "OneZoneStatus"},
//!  "Body": {"ZoneStatus": {...}}}
//! ```
//!
//! Requests carry a `ClientTag` that the controller echoes in the matching
//! response. Response bodies are single-key wrappers named after the body
//! type; [`Response::parse`] unwraps them so callers see the payload itself.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Error, Result};

/// Body type of controller exception responses.
pub const EXCEPTION_DETAIL: &str = "ExceptionDetail";

/// Message carried by the synthetic response of a request that was never answered.
pub const REQUEST_TIMEOUT_MESSAGE: &str = "Request timeout";

/// Permission the controller grants once its pairing button has been pressed.
pub const PHYSICAL_ACCESS: &str = "PhysicalAccess";

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Parsed `"NNN reason"` status string from a response header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseStatus {
    /// Numeric status, `None` when the string does not start with a number.
    pub code: Option<u16>,
    /// Reason text (the whole string when no code could be parsed).
    pub message: String,
}

impl ResponseStatus {
    /// Parse a status string such as `"200 OK"` or `"404 Not Found"`.
    pub fn parse(value: &str) -> Self {
        let Some((code, message)) = value.split_once(' ') else {
            return Self {
                code: None,
                message: value.to_string(),
            };
        };

        match code.parse::<u16>() {
            Ok(code) => Self {
                code: Some(code),
                message: message.to_string(),
            },
            Err(_) => Self {
                code: None,
                message: value.to_string(),
            },
        }
    }

    /// `true` for any 2xx code.
    pub fn is_successful(&self) -> bool {
        matches!(self.code, Some(200..=299))
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} {}", code, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Request kinds understood by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommuniqueType {
    ReadRequest,
    UpdateRequest,
    CreateRequest,
    SubscribeRequest,
}

impl CommuniqueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommuniqueType::ReadRequest => "ReadRequest",
            CommuniqueType::UpdateRequest => "UpdateRequest",
            CommuniqueType::CreateRequest => "CreateRequest",
            CommuniqueType::SubscribeRequest => "SubscribeRequest",
        }
    }
}

impl fmt::Display for CommuniqueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Header of an outgoing request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RequestHeader {
    pub client_tag: String,
    pub url: String,
}

/// An outgoing tagged request envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Request {
    pub communique_type: CommuniqueType,
    pub header: RequestHeader,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl Request {
    pub fn new(
        communique_type: CommuniqueType,
        tag: impl Into<String>,
        url: impl Into<String>,
        body: Option<Value>,
    ) -> Self {
        Self {
            communique_type,
            header: RequestHeader {
                client_tag: tag.into(),
                url: url.into(),
            },
            body,
        }
    }

    pub fn tag(&self) -> &str {
        &self.header.client_tag
    }

    pub fn url(&self) -> &str {
        &self.header.url
    }
}

/// Display name the controller shows for a paired client.
pub const PAIRING_DISPLAY_NAME: &str = "get_lutron_cert.py";

/// The pairing `Execute` command sent over a physical connection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PairingRequest {
    header: PairingHeader,
    body: PairingBody,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
struct PairingHeader {
    request_type: &'static str,
    url: &'static str,
    client_tag: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
struct PairingBody {
    command_type: &'static str,
    parameters: PairingParameters,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
struct PairingParameters {
    #[serde(rename = "CSR")]
    csr: String,
    display_name: String,
    #[serde(rename = "DeviceUID")]
    device_uid: String,
    role: String,
}

impl PairingRequest {
    /// Build a CSR signing request for `csr_pem`.
    pub fn new(csr_pem: impl Into<String>) -> Self {
        Self {
            header: PairingHeader {
                request_type: "Execute",
                url: "/pair",
                client_tag: "get-cert",
            },
            body: PairingBody {
                command_type: "CSR",
                parameters: PairingParameters {
                    csr: csr_pem.into(),
                    display_name: PAIRING_DISPLAY_NAME.to_string(),
                    device_uid: "000000000000".to_string(),
                    role: "Admin".to_string(),
                },
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Header of an incoming response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseHeader {
    pub client_tag: Option<String>,
    pub url: Option<String>,
    pub status_code: Option<ResponseStatus>,
    pub message_body_type: Option<String>,
}

/// A decoded incoming envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub communique_type: Option<String>,
    pub header: ResponseHeader,
    /// Logical payload. See [`Response::parse`] for the unwrapping rules.
    pub body: Option<Value>,
}

/// Body of an `ExceptionDetail` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExceptionDetail {
    #[serde(default)]
    pub message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawEnvelope {
    #[serde(default)]
    communique_type: Option<String>,
    header: RawHeader,
    #[serde(default)]
    body: Option<Value>,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawHeader {
    #[serde(default)]
    client_tag: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    status_code: Option<String>,
    #[serde(default)]
    message_body_type: Option<String>,
}

impl Response {
    /// Decode one line into a response with its body unwrapped.
    ///
    /// - no `MessageBodyType` in the header: the body is dropped
    /// - `ExceptionDetail`: the body is kept as-is
    /// - anything else: the single-key wrapper is removed and its value kept
    pub fn parse(line: &str) -> Result<Self> {
        let raw = decode_envelope(line)?;
        let body = unwrap_body(raw.header.message_body_type.as_deref(), raw.body);
        Ok(Self::from_raw(raw.communique_type, raw.header, body))
    }

    /// Decode one line leaving the body exactly as sent.
    ///
    /// Used on physical connections, where pairing replies are read raw.
    pub fn parse_raw(line: &str) -> Result<Self> {
        let raw = decode_envelope(line)?;
        Ok(Self::from_raw(raw.communique_type, raw.header, raw.body))
    }

    fn from_raw(communique_type: Option<String>, header: RawHeader, body: Option<Value>) -> Self {
        Self {
            communique_type,
            header: ResponseHeader {
                client_tag: header.client_tag,
                url: header.url,
                status_code: header.status_code.as_deref().map(ResponseStatus::parse),
                message_body_type: header.message_body_type,
            },
            body,
        }
    }

    /// Synthetic response used to settle a request nobody answered.
    pub fn timeout() -> Self {
        Self {
            communique_type: None,
            header: ResponseHeader {
                message_body_type: Some(EXCEPTION_DETAIL.to_string()),
                ..ResponseHeader::default()
            },
            body: Some(json!({ "Message": REQUEST_TIMEOUT_MESSAGE })),
        }
    }

    pub fn tag(&self) -> Option<&str> {
        self.header.client_tag.as_deref()
    }

    /// `true` only when a status is present and it is 2xx.
    pub fn is_successful(&self) -> bool {
        self.header
            .status_code
            .as_ref()
            .is_some_and(ResponseStatus::is_successful)
    }

    /// The exception carried by this response, if it is one.
    pub fn exception(&self) -> Option<ExceptionDetail> {
        if self.header.message_body_type.as_deref() != Some(EXCEPTION_DETAIL) {
            return None;
        }

        let detail = self
            .body
            .clone()
            .and_then(|body| serde_json::from_value(body).ok())
            .unwrap_or_default();
        Some(detail)
    }

    /// Deserialize the body into `T`, treating a missing body as `null`.
    pub fn body_as<T: DeserializeOwned>(&self) -> Result<T> {
        let body = self.body.clone().unwrap_or(Value::Null);
        serde_json::from_value(body).map_err(|e| {
            Error::protocol(format!(
                "unexpected {} body: {e}",
                self.header.message_body_type.as_deref().unwrap_or("empty")
            ))
        })
    }

    /// Whether this unsolicited message grants physical (pairing) access.
    ///
    /// Accepts both the raw `{"Status": {"Permissions": [...]}}` body and the
    /// unwrapped `{"Permissions": [...]}` form.
    pub fn grants_physical_access(&self) -> bool {
        let Some(body) = self.body.as_ref() else {
            return false;
        };

        body.pointer("/Status/Permissions")
            .or_else(|| body.pointer("/Permissions"))
            .and_then(Value::as_array)
            .is_some_and(|permissions| {
                permissions
                    .iter()
                    .any(|p| p.as_str() == Some(PHYSICAL_ACCESS))
            })
    }
}

fn decode_envelope(line: &str) -> Result<RawEnvelope> {
    serde_json::from_str(line).map_err(|e| {
        let end = line.char_indices().nth(120).map_or(line.len(), |(i, _)| i);
        let preview = &line[..end];
        Error::protocol(format!("malformed message ({e}): {preview}"))
    })
}

fn unwrap_body(body_type: Option<&str>, body: Option<Value>) -> Option<Value> {
    match body_type {
        None => None,
        Some(EXCEPTION_DETAIL) => body,
        Some(_) => match body {
            Some(Value::Object(map)) => map.into_iter().next().map(|(_, v)| v),
            Some(Value::Null) | None => None,
            other => other,
        },
    }
    .filter(|value| !value.is_null())
}
