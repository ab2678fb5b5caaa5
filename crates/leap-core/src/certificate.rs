//! Client credentials
//!
//! A [`Certificate`] is the `{ca, key, cert}` PEM triple a paired client
//! presents on the secure port. Sessions never look for credentials on disk;
//! they are handed a [`CredentialProvider`] at construction.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// PEM-encoded client credentials.
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Certificate {
    /// Controller root certificate
    pub ca: String,
    /// Client private key
    pub key: String,
    /// Client certificate signed by the controller
    pub cert: String,
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("ca", &format_args!("{} bytes", self.ca.len()))
            .field("key", &"<redacted>")
            .field("cert", &format_args!("{} bytes", self.cert.len()))
            .finish()
    }
}

impl Certificate {
    pub fn new(ca: impl Into<String>, key: impl Into<String>, cert: impl Into<String>) -> Self {
        Self {
            ca: ca.into(),
            key: key.into(),
            cert: cert.into(),
        }
    }

    /// Build credentials from a raw pairing reply body and the CSR's key.
    pub fn from_signing_response(body: &Value, request: &CertificateRequest) -> Result<Self> {
        let signing = body
            .get("SigningResult")
            .ok_or_else(|| Error::pairing("response has no SigningResult"))?;
        let result: SigningResult = serde_json::from_value(signing.clone())
            .map_err(|e| Error::pairing(format!("invalid SigningResult: {}", e)))?;

        Ok(Self {
            ca: result.root_certificate,
            key: request.key_pem.clone(),
            cert: result.certificate,
        })
    }
}

/// A CSR produced by the caller, together with the private key it was made from.
#[derive(Clone)]
pub struct CertificateRequest {
    pub csr_pem: String,
    pub key_pem: String,
}

impl CertificateRequest {
    pub fn new(csr_pem: impl Into<String>, key_pem: impl Into<String>) -> Self {
        Self {
            csr_pem: csr_pem.into(),
            key_pem: key_pem.into(),
        }
    }
}

impl fmt::Debug for CertificateRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateRequest")
            .field("csr_pem", &format_args!("{} bytes", self.csr_pem.len()))
            .field("key_pem", &"<redacted>")
            .finish()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SigningResult {
    root_certificate: String,
    certificate: String,
}

/// Source of client credentials for a session.
///
/// A session is secure exactly when its provider yields a certificate.
pub trait CredentialProvider: Send + Sync {
    fn certificate(&self) -> Option<Certificate>;
}

impl CredentialProvider for Certificate {
    fn certificate(&self) -> Option<Certificate> {
        Some(self.clone())
    }
}

impl CredentialProvider for Option<Certificate> {
    fn certificate(&self) -> Option<Certificate> {
        self.clone()
    }
}

impl<T: CredentialProvider + ?Sized> CredentialProvider for Arc<T> {
    fn certificate(&self) -> Option<Certificate> {
        (**self).certificate()
    }
}

/// Provider for unpaired clients; sessions built with it run in physical mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCredentials;

impl CredentialProvider for NoCredentials {
    fn certificate(&self) -> Option<Certificate> {
        None
    }
}
