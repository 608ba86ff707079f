//! reqwest-backed [`HttpBackend`].
//!
//! Request bodies are streamed: uploads go out as a multipart form whose file
//! part wraps the caller's [`ByteStream`], and response bodies are handed back
//! as a stream so downloads never sit in memory in full.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::AUTHORIZATION;
use reqwest::multipart::{Form, Part};

use super::{ApiRequest, BackendError, HttpBackend, MultipartUpload, RawResponse, RequestBody};

pub struct ReqwestBackend {
    client: reqwest::Client,
}

impl ReqwestBackend {
    /// Only connection establishment is bounded; transfers may take as long
    /// as they need.
    pub fn new(connect_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(concat!("webdrive/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }
}

fn build_form(upload: MultipartUpload) -> Result<Form, BackendError> {
    let file = upload.file;
    let body = reqwest::Body::wrap_stream(file.stream);
    let part = match file.length {
        Some(len) => Part::stream_with_length(body, len),
        None => Part::stream(body),
    }
    .file_name(file.file_name)
    .mime_str(&file.mime_type)
    .map_err(|e| BackendError(format!("Invalid MIME type: {}", e)))?;

    let mut form = Form::new();
    for (name, value) in upload.fields {
        form = form.text(name, value);
    }
    Ok(form.part(file.field, part))
}

#[async_trait]
impl HttpBackend for ReqwestBackend {
    async fn execute(&self, request: ApiRequest) -> Result<RawResponse, BackendError> {
        let mut builder = self.client.request(request.method, request.url);
        if let Some(auth) = request.authorization {
            builder = builder.header(AUTHORIZATION, auth);
        }
        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Multipart(upload) => builder.multipart(build_form(upload)?),
        };

        let response = builder
            .send()
            .await
            .map_err(|e| BackendError(format!("Request failed: {}", e)))?;

        let status = response.status().as_u16();
        let content_length = response.content_length();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other))
            .boxed();

        Ok(RawResponse {
            status,
            content_length,
            body,
        })
    }
}
