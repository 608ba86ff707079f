//! Shared types for the transport layer
//!
//! Request/response envelopes exchanged with an [`HttpBackend`](super::HttpBackend),
//! the JSON bodies of the storage service, and the directory listing model.

use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Streamed request or response body.
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Build a single-chunk [`ByteStream`].
pub fn byte_stream_from(data: impl Into<Bytes>) -> ByteStream {
    let data = data.into();
    stream::once(async move { Ok::<_, std::io::Error>(data) }).boxed()
}

/// Failure where no HTTP response was received at all.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct BackendError(pub String);

/// Body of an outgoing request.
pub enum RequestBody {
    Empty,
    Json(serde_json::Value),
    Multipart(MultipartUpload),
}

/// Multipart upload form: plain text fields plus exactly one file part.
pub struct MultipartUpload {
    pub fields: Vec<(String, String)>,
    pub file: FilePart,
}

pub struct FilePart {
    /// Form field name (`file` for the storage service)
    pub field: String,
    pub file_name: String,
    pub mime_type: String,
    /// Declared length in bytes, when the source knows it
    pub length: Option<u64>,
    pub stream: ByteStream,
}

/// One request as handed to a backend.
pub struct ApiRequest {
    pub method: Method,
    pub url: Url,
    /// Full `Authorization` header value, `None` for the login endpoint
    pub authorization: Option<String>,
    pub body: RequestBody,
}

impl std::fmt::Debug for ApiRequest {
    // Never print the authorization header.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiRequest")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("authorized", &self.authorization.is_some())
            .finish()
    }
}

const PREALLOC_LIMIT: u64 = 64 * 1024;

/// Response as received from a backend; the body is streamed.
pub struct RawResponse {
    pub status: u16,
    pub content_length: Option<u64>,
    pub body: ByteStream,
}

impl RawResponse {
    pub fn from_bytes(status: u16, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            status,
            content_length: Some(data.len() as u64),
            body: byte_stream_from(data),
        }
    }

    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        Self::from_bytes(status, value.to_string())
    }

    /// Collect the whole body. The declared length is only a sizing hint.
    pub async fn bytes(mut self) -> std::io::Result<Bytes> {
        let hint = self.content_length.map_or(0, |n| n.min(PREALLOC_LIMIT) as usize);
        let mut buf = Vec::with_capacity(hint);
        while let Some(chunk) = self.body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(Bytes::from(buf))
    }
}

/// How a response status is treated by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    Success,
    AuthError,
    ClientError,
    ServerError,
}

impl ResponseClass {
    pub fn of(status: u16) -> Self {
        match status {
            200..=299 => ResponseClass::Success,
            401 => ResponseClass::AuthError,
            400..=499 => ResponseClass::ClientError,
            _ => ResponseClass::ServerError,
        }
    }
}

// ─── Wire bodies ─────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LoginResponse {
    pub token: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct MkdirRequest<'a> {
    pub name: &'a str,
    pub path: &'a str,
}

/// Error body. The service uses `error`, some deployments `message`.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    pub error: Option<String>,
    pub message: Option<String>,
    pub details: Option<String>,
}

impl ErrorBody {
    pub fn parse(raw: &[u8]) -> Self {
        serde_json::from_slice(raw).unwrap_or_default()
    }

    pub fn reason(&self) -> Option<String> {
        let present = |field: &Option<String>| field.clone().filter(|s| !s.is_empty());
        present(&self.error).or_else(|| present(&self.message))
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct EntryDto {
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default, rename = "modTime")]
    pub mod_time: Option<String>,
}

/// Listing body. Go encodes empty slices as `null`, hence the options.
#[derive(Debug, Deserialize)]
pub(crate) struct ListResponse {
    #[serde(default)]
    pub directories: Option<Vec<EntryDto>>,
    #[serde(default)]
    pub files: Option<Vec<EntryDto>>,
}

// ─── Listing model ───────────────────────────────────────────────────────

/// One child of a remote directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub name: String,
    /// Size in bytes as reported by the server
    pub size: Option<u64>,
    /// Last modification time (RFC 3339 string as sent by the server)
    pub modified: Option<String>,
}

impl DirectoryEntry {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: None,
            modified: None,
        }
    }
}

impl From<EntryDto> for DirectoryEntry {
    fn from(dto: EntryDto) -> Self {
        Self {
            name: dto.name,
            size: dto.size,
            modified: dto.mod_time,
        }
    }
}

/// Immediate children of one directory, each side sorted by name with
/// duplicates removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntryList {
    pub directories: Vec<DirectoryEntry>,
    pub files: Vec<DirectoryEntry>,
}

impl DirectoryEntryList {
    pub fn new(directories: Vec<DirectoryEntry>, files: Vec<DirectoryEntry>) -> Self {
        Self {
            directories: Self::as_set(directories),
            files: Self::as_set(files),
        }
    }

    fn as_set(mut entries: Vec<DirectoryEntry>) -> Vec<DirectoryEntry> {
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries.dedup_by(|a, b| a.name == b.name);
        entries
    }

    pub fn is_empty(&self) -> bool {
        self.directories.is_empty() && self.files.is_empty()
    }

    pub fn directory_names(&self) -> Vec<&str> {
        self.directories.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn file_names(&self) -> Vec<&str> {
        self.files.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn has_directory(&self, name: &str) -> bool {
        self.directories.iter().any(|e| e.name == name)
    }

    pub fn has_file(&self, name: &str) -> bool {
        self.files.iter().any(|e| e.name == name)
    }
}

impl From<ListResponse> for DirectoryEntryList {
    fn from(resp: ListResponse) -> Self {
        let convert = |v: Option<Vec<EntryDto>>| -> Vec<DirectoryEntry> {
            v.unwrap_or_default().into_iter().map(DirectoryEntry::from).collect()
        };
        Self::new(convert(resp.directories), convert(resp.files))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_class() {
        assert_eq!(ResponseClass::of(200), ResponseClass::Success);
        assert_eq!(ResponseClass::of(204), ResponseClass::Success);
        assert_eq!(ResponseClass::of(401), ResponseClass::AuthError);
        assert_eq!(ResponseClass::of(404), ResponseClass::ClientError);
        assert_eq!(ResponseClass::of(409), ResponseClass::ClientError);
        assert_eq!(ResponseClass::of(500), ResponseClass::ServerError);
        assert_eq!(ResponseClass::of(302), ResponseClass::ServerError);
    }

    #[test]
    fn test_list_response_with_null_sides() {
        let json = r#"{"directories":null,"files":[{"name":"b.txt","size":3,"modTime":"2024-01-01T00:00:00Z"},{"name":"a.txt","size":1}]}"#;
        let resp: ListResponse = serde_json::from_str(json).unwrap();
        let list = DirectoryEntryList::from(resp);
        assert!(list.directories.is_empty());
        assert_eq!(list.file_names(), vec!["a.txt", "b.txt"]);
        assert_eq!(list.files[1].size, Some(3));
        assert_eq!(list.files[1].modified.as_deref(), Some("2024-01-01T00:00:00Z"));
    }

    #[test]
    fn test_entry_list_dedups_names() {
        let list = DirectoryEntryList::new(
            vec![DirectoryEntry::named("docs"), DirectoryEntry::named("docs")],
            vec![],
        );
        assert_eq!(list.directory_names(), vec!["docs"]);
        assert!(list.has_directory("docs"));
        assert!(!list.has_file("docs"));
    }

    #[test]
    fn test_error_body_reason_prefers_error_field() {
        let body = ErrorBody::parse(br#"{"error":"Could not create directory","details":"exists"}"#);
        assert_eq!(body.reason().as_deref(), Some("Could not create directory"));
        assert_eq!(body.details.as_deref(), Some("exists"));

        let body = ErrorBody::parse(br#"{"message":"nope"}"#);
        assert_eq!(body.reason().as_deref(), Some("nope"));

        let body = ErrorBody::parse(br#"{"error":"","message":"quota exceeded"}"#);
        assert_eq!(body.reason().as_deref(), Some("quota exceeded"));

        let body = ErrorBody::parse(b"<html>gateway</html>");
        assert!(body.reason().is_none());
    }

    #[tokio::test]
    async fn test_raw_response_collects_body() {
        let resp = RawResponse::from_bytes(200, "hello");
        assert_eq!(resp.content_length, Some(5));
        assert_eq!(&resp.bytes().await.unwrap()[..], b"hello");
    }

    #[tokio::test]
    async fn test_bogus_content_length_is_only_a_hint() {
        let mut resp = RawResponse::from_bytes(500, "oops");
        resp.content_length = Some(u64::MAX);
        assert_eq!(&resp.bytes().await.unwrap()[..], b"oops");
    }
}
