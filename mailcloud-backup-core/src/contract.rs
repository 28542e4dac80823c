//! # contract: the cloud storage interface a backup run talks to
//!
//! This module defines the [`CloudApi`] trait and the plain data types that
//! flow across it. The pipeline only ever sees this trait, so the real HTTP
//! client ([`crate::cloud::MailCloudClient`]) and generated mocks are
//! interchangeable.
//!
//! ## Sequencing
//! A run calls the operations in a fixed order:
//! `authenticate` -> `fetch_csrf_token` -> `resolve_upload_domain` ->
//! `query_free_space` -> (`upload_file` -> `register_file`)*.
//! None of them retries on its own.
//!
//! ## Mocking & Testing
//! The trait is annotated for `mockall`, so tests get a `MockCloudApi` with
//! the `test-export-mocks` feature (on by default).

use std::path::Path;

use async_trait::async_trait;
use mockall::automock;

use crate::config::Credentials;
use crate::receipt::ReceiptError;

/// Anti-forgery token required by every authenticated cloud call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfToken(String);

impl CsrfToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Base URL of the server that accepts binary uploads for this session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadDomain(String);

impl UploadDomain {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// What a successful binary post hands back: the blob's content hash and
/// the size the server recorded. Required to register the blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub hash: String,
    pub size: u64,
}

/// Failure of a single cloud operation.
#[derive(Debug, thiserror::Error)]
pub enum CloudError {
    #[error("{operation} failed with http status {status}: {body}")]
    Http {
        operation: &'static str,
        status: u16,
        body: String,
    },
    #[error("{operation} request could not be sent: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{operation} could not read local data: {source}")]
    Io {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("{operation} returned an unexpected response: {detail}")]
    MalformedResponse {
        operation: &'static str,
        detail: String,
    },
    #[error("upload receipt could not be parsed: {0}")]
    Receipt(#[from] ReceiptError),
    #[error("email address {0:?} has no domain part")]
    InvalidEmail(String),
}

/// Remote operations of the cloud storage service.
///
/// Implementors own the authenticated session; every method after
/// [`CloudApi::authenticate`] assumes the session cookies are in place.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait CloudApi: Send + Sync {
    /// Log in with the account credentials; session cookies are kept on success.
    async fn authenticate(&self, credentials: &Credentials) -> Result<(), CloudError>;

    /// Fetch the CSRF token for this session.
    async fn fetch_csrf_token(&self) -> Result<CsrfToken, CloudError>;

    /// Ask the dispatcher which server takes binary uploads.
    async fn resolve_upload_domain(&self, token: &CsrfToken) -> Result<UploadDomain, CloudError>;

    /// Free space in bytes (`total - used`).
    ///
    /// Returns 0 when the query fails instead of an error, so a failed query
    /// simply admits nothing.
    async fn query_free_space(&self, token: &CsrfToken) -> u64;

    /// Stream a local file to the upload server.
    async fn upload_file(
        &self,
        domain: &UploadDomain,
        local_path: &Path,
        filename: &str,
        mime_type: &str,
    ) -> Result<UploadReceipt, CloudError>;

    /// Commit an uploaded blob under `cloud_path` + `filename`.
    ///
    /// Name collisions are rejected by the server, never overwritten.
    async fn register_file(
        &self,
        cloud_path: &str,
        filename: &str,
        receipt: &UploadReceipt,
        token: &CsrfToken,
    ) -> Result<(), CloudError>;
}
