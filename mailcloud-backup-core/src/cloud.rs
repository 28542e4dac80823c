//! HTTP implementation of [`CloudApi`] for Cloud Mail.Ru.
//!
//! One [`MailCloudClient`] is one session: the underlying `reqwest::Client`
//! keeps the login cookies, and every call after `authenticate` rides on
//! them. Failures are logged with the operation name, HTTP status and body,
//! then returned as [`CloudError`]; nothing is retried.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Response};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::config::{Credentials, NetworkConfig};
use crate::contract::{CloudApi, CloudError, CsrfToken, UploadDomain, UploadReceipt};
use crate::receipt::parse_receipt;

pub const DEFAULT_AUTH_URL: &str = "https://auth.mail.ru/cgi-bin/auth?lang=ru_RU&from=authpopup";
pub const DEFAULT_API_URL: &str = "https://cloud.mail.ru/api/v2/";

/// API version sent with space queries and registrations.
pub const API_VERSION: u32 = 2;
/// Cloud domain ordinal expected by the upload server.
pub const CLOUD_DOMAIN_ORD: u32 = 2;
/// Appended to the seconds timestamp in the upload query.
pub const TIME_AMEND: &str = "0246";
/// Name collisions are rejected, never replaced or renamed.
pub const CONFLICT_POLICY: &str = "strict";

const MIB: u64 = 1024 * 1024;

/// Where the client sends its requests.
#[derive(Debug, Clone)]
pub struct CloudEndpoints {
    /// Full URL of the login form handler.
    pub auth_url: String,
    /// Base of the versioned JSON API, ending with `/`.
    pub api_url: String,
}

impl Default for CloudEndpoints {
    fn default() -> Self {
        Self {
            auth_url: DEFAULT_AUTH_URL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct Envelope<T> {
    body: T,
}

#[derive(Deserialize)]
struct TokenBody {
    token: String,
}

#[derive(Deserialize)]
struct DispatcherBody {
    upload: Vec<DispatcherTarget>,
}

#[derive(Deserialize)]
struct DispatcherTarget {
    url: String,
}

#[derive(Deserialize)]
struct SpaceBody {
    total: u64,
    used: u64,
}

pub struct MailCloudClient {
    http: Client,
    endpoints: CloudEndpoints,
    email: String,
}

impl MailCloudClient {
    /// Build a client for the default Cloud Mail.Ru endpoints.
    pub fn new(email: &str, network: &NetworkConfig) -> Result<Self, CloudError> {
        Self::with_endpoints(email, network, CloudEndpoints::default())
    }

    pub fn with_endpoints(
        email: &str,
        network: &NetworkConfig,
        endpoints: CloudEndpoints,
    ) -> Result<Self, CloudError> {
        let mut builder = Client::builder()
            .cookie_store(true)
            .danger_accept_invalid_certs(!network.verify_ssl);
        if let Some(timeout) = network.timeout {
            builder = builder.timeout(timeout);
        }
        if !network.verify_ssl {
            warn!("TLS certificate verification is disabled");
        }
        let http = builder.build().map_err(|source| CloudError::Transport {
            operation: "client setup",
            source,
        })?;
        Ok(Self {
            http,
            endpoints,
            email: email.to_string(),
        })
    }

    fn api(&self, path: &str) -> String {
        format!("{}{}", self.endpoints.api_url, path)
    }

    fn quoted_email(&self) -> String {
        urlencoding::encode(&self.email).into_owned()
    }

    async fn json_body<T: serde::de::DeserializeOwned>(
        operation: &'static str,
        response: Response,
    ) -> Result<T, CloudError> {
        let response = ensure_success(operation, response).await?;
        let text = response
            .text()
            .await
            .map_err(|source| CloudError::Transport { operation, source })?;
        serde_json::from_str::<Envelope<T>>(&text)
            .map(|envelope| envelope.body)
            .map_err(|e| {
                error!(operation, error = %e, body = %text, "Unexpected response shape");
                CloudError::MalformedResponse {
                    operation,
                    detail: e.to_string(),
                }
            })
    }
}

#[async_trait]
impl CloudApi for MailCloudClient {
    async fn authenticate(&self, credentials: &Credentials) -> Result<(), CloudError> {
        const OP: &str = "authentication";
        let domain = match credentials.email.split_once('@') {
            Some((_, domain)) if !domain.is_empty() => domain,
            _ => {
                error!(email = %credentials.email, "Email address has no domain part");
                return Err(CloudError::InvalidEmail(credentials.email.clone()));
            }
        };
        let page = format!("{}?from=promo", self.endpoints.api_url);
        let form = [
            ("Login", credentials.email.as_str()),
            ("Password", credentials.password.as_str()),
            ("page", page.as_str()),
            ("new_auth_form", "1"),
            ("Domain", domain),
        ];

        debug!(email = %credentials.email, "Sending login request");
        let response = self
            .http
            .post(&self.endpoints.auth_url)
            .form(&form)
            .send()
            .await
            .map_err(|source| transport(OP, source))?;
        ensure_success(OP, response).await?;
        info!(email = %credentials.email, "Authenticated");
        Ok(())
    }

    async fn fetch_csrf_token(&self) -> Result<CsrfToken, CloudError> {
        const OP: &str = "csrf token request";
        let response = self
            .http
            .get(self.api("tokens/csrf"))
            .send()
            .await
            .map_err(|source| transport(OP, source))?;
        let body: TokenBody = Self::json_body(OP, response).await?;
        if body.token.is_empty() {
            error!("CSRF token is empty");
            return Err(CloudError::MalformedResponse {
                operation: OP,
                detail: "empty token".into(),
            });
        }
        debug!("CSRF token obtained");
        Ok(CsrfToken::new(body.token))
    }

    async fn resolve_upload_domain(&self, token: &CsrfToken) -> Result<UploadDomain, CloudError> {
        const OP: &str = "upload domain request";
        let response = self
            .http
            .get(self.api("dispatcher"))
            .query(&[("token", token.as_str())])
            .send()
            .await
            .map_err(|source| transport(OP, source))?;
        let body: DispatcherBody = Self::json_body(OP, response).await?;
        let target = body.upload.into_iter().next().ok_or_else(|| {
            error!("Dispatcher returned no upload servers");
            CloudError::MalformedResponse {
                operation: OP,
                detail: "no upload servers listed".into(),
            }
        })?;
        info!(domain = %target.url, "Upload domain resolved");
        Ok(UploadDomain::new(target.url))
    }

    async fn query_free_space(&self, token: &CsrfToken) -> u64 {
        const OP: &str = "space request";
        let email = self.quoted_email();
        let url = format!(
            "{}?api={}&email={}&x-email={}&token={}&_={}",
            self.api("user/space"),
            API_VERSION,
            email,
            email,
            urlencoding::encode(token.as_str()),
            epoch_millis()
        );

        let outcome = match self.http.get(url).send().await {
            Ok(response) => Self::json_body::<SpaceBody>(OP, response).await,
            Err(source) => Err(transport(OP, source)),
        };
        match outcome {
            Ok(space) => {
                let free = space.total.saturating_sub(space.used).saturating_mul(MIB);
                info!(total_mib = space.total, used_mib = space.used, free_bytes = free, "Cloud space queried");
                free
            }
            Err(e) => {
                warn!(error = %e, "Could not query cloud space, assuming none is left");
                0
            }
        }
    }

    async fn upload_file(
        &self,
        domain: &UploadDomain,
        local_path: &Path,
        filename: &str,
        mime_type: &str,
    ) -> Result<UploadReceipt, CloudError> {
        const OP: &str = "file post";
        let url = format!(
            "{}?cloud_domain={}&x-email={}&fileapi{}{}",
            domain.as_str().trim_end_matches('?'),
            CLOUD_DOMAIN_ORD,
            self.quoted_email(),
            epoch_seconds(),
            TIME_AMEND
        );

        let file = tokio::fs::File::open(local_path).await.map_err(|source| {
            error!(file = %filename, error = %source, "Could not open file for upload");
            CloudError::Io { operation: OP, source }
        })?;
        let length = file
            .metadata()
            .await
            .map_err(|source| CloudError::Io { operation: OP, source })?
            .len();
        let part = Part::stream_with_length(Body::from(file), length)
            .file_name(urlencoding::encode(filename).into_owned())
            .mime_str(mime_type)
            .map_err(|source| transport(OP, source))?;
        let form = Form::new().part("file", part);

        debug!(file = %filename, size = length, mime = %mime_type, "Posting file");
        let response = self
            .http
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(|source| {
                error!(file = %filename, error = %source, "File post could not be sent");
                transport(OP, source)
            })?;
        let response = ensure_success(OP, response).await.map_err(|e| {
            error!(file = %filename, "File post rejected");
            e
        })?;
        let bytes = response
            .bytes()
            .await
            .map_err(|source| transport(OP, source))?;
        let receipt = parse_receipt(&bytes).map_err(|e| {
            error!(file = %filename, error = %e, "File post error, no hash and size obtained");
            CloudError::from(e)
        })?;
        debug!(file = %filename, hash = %receipt.hash, size = receipt.size, "File posted");
        Ok(receipt)
    }

    async fn register_file(
        &self,
        cloud_path: &str,
        filename: &str,
        receipt: &UploadReceipt,
        token: &CsrfToken,
    ) -> Result<(), CloudError> {
        const OP: &str = "file addition";
        let home = format!("{cloud_path}{filename}");
        let size = receipt.size.to_string();
        let api = API_VERSION.to_string();
        let form = [
            ("home", home.as_str()),
            ("hash", receipt.hash.as_str()),
            ("size", size.as_str()),
            ("conflict", CONFLICT_POLICY),
            ("token", token.as_str()),
            ("api", api.as_str()),
            ("email", self.email.as_str()),
            ("x-email", self.email.as_str()),
        ];

        let response = self
            .http
            .post(self.api("file/add"))
            .form(&form)
            .send()
            .await
            .map_err(|source| transport(OP, source))?;
        ensure_success(OP, response).await.map_err(|e| {
            error!(file = %filename, home = %home, "File addition failed");
            e
        })?;
        debug!(file = %filename, home = %home, "File registered");
        Ok(())
    }
}

/// Turn a non-2xx response into [`CloudError::Http`], logging status and body.
async fn ensure_success(operation: &'static str, response: Response) -> Result<Response, CloudError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    error!(operation, status = status.as_u16(), body = %body, "Request unsuccessful");
    Err(CloudError::Http {
        operation,
        status: status.as_u16(),
        body,
    })
}

fn transport(operation: &'static str, source: reqwest::Error) -> CloudError {
    error!(operation, error = %source, "Request could not be completed");
    CloudError::Transport { operation, source }
}

fn epoch_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

fn epoch_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
