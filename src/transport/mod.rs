//! Transport Module
//!
//! Endpoint-level access to the remote storage service.
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                 Transport                   │
//! │  bearer, classification, 401 interception   │
//! └─────────────────────────────────────────────┘
//!                      │
//!          ┌───────────┴───────────┐
//!          ▼                       ▼
//!   ┌──────────────┐        ┌────────────┐
//!   │ReqwestBackend│        │ MockServer │
//!   └──────────────┘        └────────────┘
//! ```
//!
//! Backends only move bytes. Everything the client decides about a response
//! (success, credential failure, server-reported reason) happens here, so the
//! auth-expiry rule applies no matter which component issued the request.

pub mod http;
pub mod types;

pub use http::ReqwestBackend;
pub use types::*;

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};
use url::Url;

use crate::auth::AuthSession;
use crate::error::{ClientError, LoginError};

fn transport_log(msg: &str) {
    debug!("[TRANSPORT] {}", msg);
}

/// Executes raw requests against the storage service.
#[async_trait]
pub trait HttpBackend: Send + Sync {
    /// Send one request. `Err` means no response was received.
    async fn execute(&self, request: ApiRequest) -> Result<RawResponse, BackendError>;
}

/// Streamed download body. The stream fails once the session it was
/// requested under ends.
pub struct DownloadBody {
    pub content_length: Option<u64>,
    pub stream: ByteStream,
    /// Login generation the request was sent under
    pub generation: u64,
}

pub struct Transport {
    base_url: Url,
    backend: Arc<dyn HttpBackend>,
    auth: Arc<AuthSession>,
}

impl Transport {
    pub fn new(base_url: Url, backend: Arc<dyn HttpBackend>, auth: Arc<AuthSession>) -> Self {
        Self {
            base_url,
            backend,
            auth,
        }
    }

    pub fn auth(&self) -> &Arc<AuthSession> {
        &self.auth
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ─── Helpers ─────────────────────────────────────────────────────────

    fn endpoint(&self, route: &str, path: Option<&str>) -> Result<Url, ClientError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let mut url = Url::parse(&format!("{}{}", base, route))
            .map_err(|e| ClientError::Unknown(format!("Invalid endpoint URL: {}", e)))?;
        if let Some(path) = path {
            url.query_pairs_mut().append_pair("path", path);
        }
        Ok(url)
    }

    /// `AuthExpired` unless the credential of `generation` is still live.
    /// Anything in flight when the session ended resolves through here.
    pub(crate) fn ensure_current(&self, generation: u64) -> Result<(), ClientError> {
        if self.auth.is_current(generation) {
            Ok(())
        } else {
            debug!("[TRANSPORT] Session of generation {} ended in flight", generation);
            Err(ClientError::AuthExpired)
        }
    }

    /// Send with the current bearer credential and classify the response.
    /// Also returns the login generation the request went out under.
    async fn send_authorized(
        &self,
        method: Method,
        url: Url,
        body: RequestBody,
    ) -> Result<(RawResponse, u64), ClientError> {
        let credential = self.auth.credential().ok_or(ClientError::NotAuthenticated)?;
        let request = ApiRequest {
            method,
            url,
            authorization: Some(format!("Bearer {}", credential.token.expose_secret())),
            body,
        };
        transport_log(&format!("{:?}", request));
        let label = format!("{} {}", request.method, request.url.path());

        let outcome = self.backend.execute(request).await;
        self.ensure_current(credential.generation)?;
        let response = outcome.map_err(|e| {
            warn!("[TRANSPORT] {} failed: {}", label, e);
            ClientError::Network(e.0)
        })?;

        match ResponseClass::of(response.status) {
            ResponseClass::Success => Ok((response, credential.generation)),
            ResponseClass::AuthError => {
                warn!("[TRANSPORT] {} returned 401", label);
                self.auth.expire(credential.generation);
                Err(ClientError::AuthExpired)
            }
            ResponseClass::ClientError | ResponseClass::ServerError => {
                let err = Self::error_from(response).await;
                warn!("[TRANSPORT] {} failed: {}", label, err);
                Err(err)
            }
        }
    }

    /// Turn a non-success response into a typed error, keeping the server's
    /// reason verbatim.
    async fn error_from(response: RawResponse) -> ClientError {
        let status = response.status;
        let raw = response.bytes().await.unwrap_or_default();
        let body = ErrorBody::parse(&raw);
        let detail = body.details.clone().filter(|d| !d.is_empty());
        let Some(message) = body.reason() else {
            return match status {
                404 => ClientError::NotFound {
                    message: "Not found".to_string(),
                    detail,
                },
                _ => ClientError::Unknown(format!("HTTP {}", status)),
            };
        };
        match status {
            404 => ClientError::NotFound { message, detail },
            409 => ClientError::Conflict { message, detail },
            _ => ClientError::Rejected {
                status,
                message,
                detail,
            },
        }
    }

    async fn expect_ack(&self, method: Method, url: Url, body: RequestBody) -> Result<(), ClientError> {
        let (response, generation) = self.send_authorized(method, url, body).await?;
        // Ack bodies carry nothing we use; drain so the connection can be reused.
        let _ = response.bytes().await;
        self.ensure_current(generation)
    }

    // ─── Endpoints ───────────────────────────────────────────────────────

    /// POST /api/login. Sent without a bearer; a 401 here is a credential
    /// failure, not an expiry.
    pub async fn login(&self, username: &str, password: &SecretString) -> Result<String, LoginError> {
        let url = self
            .endpoint("/api/login", None)
            .map_err(|e| LoginError::ServerError(e.to_string()))?;
        let body = serde_json::to_value(LoginRequest {
            username,
            password: password.expose_secret(),
        })
        .map_err(|e| LoginError::ServerError(e.to_string()))?;
        let request = ApiRequest {
            method: Method::POST,
            url,
            authorization: None,
            body: RequestBody::Json(body),
        };

        let response = self
            .backend
            .execute(request)
            .await
            .map_err(|e| LoginError::Network(e.0))?;
        let status = response.status;
        let raw = response
            .bytes()
            .await
            .map_err(|e| LoginError::Network(e.to_string()))?;

        match ResponseClass::of(status) {
            ResponseClass::Success => {
                let parsed: LoginResponse = serde_json::from_slice(&raw)
                    .map_err(|e| LoginError::ServerError(format!("Malformed login response: {}", e)))?;
                parsed
                    .token
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| LoginError::ServerError("Login response did not include a token".to_string()))
            }
            ResponseClass::AuthError | ResponseClass::ClientError => {
                let reason = ErrorBody::parse(&raw)
                    .reason()
                    .unwrap_or_else(|| "Invalid credentials".to_string());
                Err(LoginError::BadCredentials(reason))
            }
            ResponseClass::ServerError => {
                let reason = ErrorBody::parse(&raw)
                    .reason()
                    .unwrap_or_else(|| format!("HTTP {}", status));
                Err(LoginError::ServerError(reason))
            }
        }
    }

    /// GET /api/list?path=
    pub async fn list(&self, path: &str) -> Result<DirectoryEntryList, ClientError> {
        let url = self.endpoint("/api/list", Some(path))?;
        let (response, generation) = self.send_authorized(Method::GET, url, RequestBody::Empty).await?;
        let raw = response.bytes().await;
        self.ensure_current(generation)?;
        let raw = raw.map_err(|e| ClientError::Network(e.to_string()))?;
        let parsed: ListResponse = serde_json::from_slice(&raw)
            .map_err(|e| ClientError::Unknown(format!("Malformed listing for '{}': {}", path, e)))?;
        Ok(parsed.into())
    }

    /// POST /api/upload (multipart). The `path` field is omitted at root.
    pub async fn upload(&self, target_path: &str, file: FilePart) -> Result<(), ClientError> {
        let url = self.endpoint("/api/upload", None)?;
        let mut fields = Vec::new();
        if !target_path.is_empty() {
            fields.push(("path".to_string(), target_path.to_string()));
        }
        let body = RequestBody::Multipart(MultipartUpload { fields, file });
        self.expect_ack(Method::POST, url, body).await
    }

    /// GET /api/download/{name}?path=
    pub async fn download(&self, name: &str, path: &str) -> Result<DownloadBody, ClientError> {
        let route = format!("/api/download/{}", urlencoding::encode(name));
        let url = self.endpoint(&route, Some(path))?;
        let (response, generation) = self.send_authorized(Method::GET, url, RequestBody::Empty).await?;
        let auth = self.auth.clone();
        let stream = response
            .body
            .map(move |chunk| {
                if auth.is_current(generation) {
                    chunk
                } else {
                    Err(std::io::Error::other("session ended during download"))
                }
            })
            .boxed();
        Ok(DownloadBody {
            content_length: response.content_length,
            stream,
            generation,
        })
    }

    /// POST /api/mkdir
    pub async fn create_directory(&self, name: &str, path: &str) -> Result<(), ClientError> {
        let url = self.endpoint("/api/mkdir", None)?;
        let body = serde_json::to_value(MkdirRequest { name, path })
            .map_err(|e| ClientError::Unknown(e.to_string()))?;
        self.expect_ack(Method::POST, url, RequestBody::Json(body)).await
    }

    /// DELETE /api/delete/{name}?path=
    pub async fn delete_file(&self, name: &str, path: &str) -> Result<(), ClientError> {
        let route = format!("/api/delete/{}", urlencoding::encode(name));
        let url = self.endpoint(&route, Some(path))?;
        self.expect_ack(Method::DELETE, url, RequestBody::Empty).await
    }

    /// DELETE /api/rmdir/{name}?path=
    pub async fn delete_directory(&self, name: &str, path: &str) -> Result<(), ClientError> {
        let route = format!("/api/rmdir/{}", urlencoding::encode(name));
        let url = self.endpoint(&route, Some(path))?;
        self.expect_ack(Method::DELETE, url, RequestBody::Empty).await
    }
}
