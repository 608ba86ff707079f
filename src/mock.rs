//! In-memory storage service
//!
//! [`MockServer`] implements [`HttpBackend`] by interpreting requests the way
//! the real service does: same routes, same JSON bodies, same status codes.
//! Tests drive it directly and inspect the calls it received. Available under
//! `cfg(test)` and the `mock` feature.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Method;
use serde_json::json;
use tokio::sync::oneshot;

use crate::path;
use crate::transport::{ApiRequest, BackendError, HttpBackend, RawResponse, RequestBody};

/// Scripted failure for the next request.
#[derive(Debug, Clone)]
pub enum MockFailure {
    /// No response at all
    Network,
    /// Respond with this status and JSON body
    Status(u16, serde_json::Value),
}

/// One request as seen by the server.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: Method,
    /// Route without the name segment, e.g. `/api/delete`
    pub route: String,
    pub name: Option<String>,
    pub query_path: Option<String>,
    pub authorized: bool,
}

/// Releases a listing held by [`MockServer::hold_listing`].
pub struct ListingGate {
    tx: oneshot::Sender<()>,
}

impl ListingGate {
    pub fn release(self) {
        let _ = self.tx.send(());
    }
}

struct Store {
    username: String,
    password: String,
    tokens: HashSet<String>,
    next_token: u64,
    /// Every directory path, root included
    dirs: BTreeSet<String>,
    /// Full file path -> contents
    files: BTreeMap<String, Vec<u8>>,
    failures: VecDeque<MockFailure>,
    uploads: usize,
}

pub struct MockServer {
    store: Mutex<Store>,
    calls: Mutex<Vec<RecordedCall>>,
    gates: Mutex<HashMap<String, oneshot::Receiver<()>>>,
}

fn error_json(status: u16, message: &str) -> RawResponse {
    RawResponse::json(status, &json!({ "error": message }))
}

impl MockServer {
    pub fn new(username: &str, password: &str) -> Self {
        let mut dirs = BTreeSet::new();
        dirs.insert(path::ROOT.to_string());
        Self {
            store: Mutex::new(Store {
                username: username.to_string(),
                password: password.to_string(),
                tokens: HashSet::new(),
                next_token: 1,
                dirs,
                files: BTreeMap::new(),
                failures: VecDeque::new(),
                uploads: 0,
            }),
            calls: Mutex::new(Vec::new()),
            gates: Mutex::new(HashMap::new()),
        }
    }

    fn store(&self) -> std::sync::MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mint a valid token without going through the login route.
    pub fn issue_token(&self) -> String {
        let mut store = self.store();
        let token = format!("mock-token-{}", store.next_token);
        store.next_token += 1;
        store.tokens.insert(token.clone());
        token
    }

    /// Every token issued so far starts answering 401.
    pub fn invalidate_tokens(&self) {
        self.store().tokens.clear();
    }

    pub fn fail_next(&self, failure: MockFailure) {
        self.store().failures.push_back(failure);
    }

    /// Add a directory (and its ancestors).
    pub fn with_directory(&self, dir: &str) -> &Self {
        let mut store = self.store();
        Self::mkdir_all(&mut store, &path::normalize(dir));
        self
    }

    /// Add a file (and its parent directories).
    pub fn with_file(&self, file: &str, contents: &[u8]) -> &Self {
        let file = path::normalize(file);
        let mut store = self.store();
        Self::mkdir_all(&mut store, &path::parent(&file));
        store.files.insert(file, contents.to_vec());
        self
    }

    pub fn file_contents(&self, file: &str) -> Option<Vec<u8>> {
        self.store().files.get(&path::normalize(file)).cloned()
    }

    pub fn has_directory(&self, dir: &str) -> bool {
        self.store().dirs.contains(&path::normalize(dir))
    }

    pub fn upload_count(&self) -> usize {
        self.store().uploads
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Hold the next listing of `dir` until the returned gate is released.
    pub fn hold_listing(&self, dir: &str) -> ListingGate {
        let (tx, rx) = oneshot::channel();
        self.gates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path::normalize(dir), rx);
        ListingGate { tx }
    }

    fn mkdir_all(store: &mut Store, dir: &str) {
        let mut current = String::new();
        for segment in path::segments(dir) {
            current = path::join(&current, segment);
            store.dirs.insert(current.clone());
        }
    }

    fn record(&self, request: &ApiRequest) -> (String, Option<String>) {
        let mut segments: Vec<String> = request
            .url
            .path_segments()
            .map(|s| {
                s.map(|seg| {
                    urlencoding::decode(seg)
                        .map(|c| c.into_owned())
                        .unwrap_or_else(|_| seg.to_string())
                })
                .collect()
            })
            .unwrap_or_default();
        let name = if segments.len() > 2 { segments.pop() } else { None };
        let route = format!("/{}", segments.join("/"));
        let query_path = request
            .url
            .query_pairs()
            .find(|(k, _)| k == "path")
            .map(|(_, v)| v.into_owned());

        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedCall {
                method: request.method.clone(),
                route: route.clone(),
                name: name.clone(),
                query_path,
                authorized: request.authorization.is_some(),
            });
        (route, name)
    }

    fn is_authorized(&self, request: &ApiRequest) -> bool {
        let Some(header) = request.authorization.as_deref() else {
            return false;
        };
        let Some(token) = header.strip_prefix("Bearer ") else {
            return false;
        };
        self.store().tokens.contains(token)
    }

    fn query_path(request: &ApiRequest) -> String {
        request
            .url
            .query_pairs()
            .find(|(k, _)| k == "path")
            .map(|(_, v)| path::normalize(&v))
            .unwrap_or_default()
    }

    fn login(&self, body: RequestBody) -> RawResponse {
        let RequestBody::Json(value) = body else {
            return error_json(400, "Missing credentials");
        };
        let username = value.get("username").and_then(|v| v.as_str()).unwrap_or_default();
        let password = value.get("password").and_then(|v| v.as_str()).unwrap_or_default();
        if username.is_empty() || password.is_empty() {
            return error_json(400, "Missing credentials");
        }
        let valid = {
            let store = self.store();
            store.username == username && store.password == password
        };
        if !valid {
            return error_json(401, "Invalid credentials");
        }
        RawResponse::json(200, &json!({ "token": self.issue_token() }))
    }

    async fn list(&self, dir: String) -> RawResponse {
        let gate = self
            .gates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&dir);
        if let Some(gate) = gate {
            let _ = gate.await;
        }

        let store = self.store();
        if !store.dirs.contains(&dir) {
            return error_json(500, "Could not read directory");
        }
        let directories: Vec<_> = store
            .dirs
            .iter()
            .filter(|d| !d.is_empty() && path::parent(d) == dir)
            .filter_map(|d| path::file_name(d))
            .map(|name| json!({ "name": name, "size": 4096 }))
            .collect();
        let files: Vec<_> = store
            .files
            .iter()
            .filter(|(f, _)| path::parent(f) == dir)
            .filter_map(|(f, data)| path::file_name(f).map(|name| json!({ "name": name, "size": data.len() })))
            .collect();
        // The Go service sends null rather than [] for empty sides.
        let as_json = |v: Vec<serde_json::Value>| if v.is_empty() { serde_json::Value::Null } else { json!(v) };
        RawResponse::json(
            200,
            &json!({ "directories": as_json(directories), "files": as_json(files) }),
        )
    }

    async fn upload(&self, body: RequestBody) -> RawResponse {
        let RequestBody::Multipart(form) = body else {
            return error_json(400, "No file uploaded");
        };
        let dir = form
            .fields
            .iter()
            .find(|(k, _)| k == "path")
            .map(|(_, v)| path::normalize(v))
            .unwrap_or_default();
        let file_name = form.file.file_name.clone();

        let mut data = Vec::new();
        let mut stream = form.file.stream;
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => data.extend_from_slice(&bytes),
                Err(_) => return error_json(400, "Upload interrupted"),
            }
        }

        if path::validate_segment(&file_name).is_err() {
            return error_json(400, "Invalid filename");
        }
        let mut store = self.store();
        Self::mkdir_all(&mut store, &dir);
        store.files.insert(path::join(&dir, &file_name), data);
        store.uploads += 1;
        RawResponse::json(200, &json!({ "message": "File uploaded successfully" }))
    }

    fn download(&self, request: &ApiRequest, name: &str) -> RawResponse {
        let full = path::join(&Self::query_path(request), name);
        match self.store().files.get(&full) {
            Some(data) => RawResponse::from_bytes(200, data.clone()),
            None => error_json(404, "File not found"),
        }
    }

    fn mkdir(&self, body: RequestBody) -> RawResponse {
        let RequestBody::Json(value) = body else {
            return error_json(400, "Path and name are required");
        };
        let name = value.get("name").and_then(|v| v.as_str()).unwrap_or_default();
        let parent = path::normalize(value.get("path").and_then(|v| v.as_str()).unwrap_or_default());
        let target = path::join(&parent, &path::normalize(name));
        let mut store = self.store();
        if store.files.contains_key(&target) {
            return RawResponse::json(
                500,
                &json!({
                    "error": "Could not create directory",
                    "details": format!("mkdir {}: not a directory", target),
                }),
            );
        }
        Self::mkdir_all(&mut store, &target);
        RawResponse::json(200, &json!({ "message": "Directory created successfully" }))
    }

    fn delete_file(&self, request: &ApiRequest, name: &str) -> RawResponse {
        let full = path::join(&Self::query_path(request), name);
        match self.store().files.remove(&full) {
            Some(_) => RawResponse::json(200, &json!({ "message": "File deleted successfully" })),
            None => error_json(500, "Could not delete file"),
        }
    }

    fn delete_directory(&self, request: &ApiRequest, name: &str) -> RawResponse {
        let full = path::join(&Self::query_path(request), name);
        let mut store = self.store();
        if full.is_empty() || !store.dirs.contains(&full) {
            return error_json(404, "Directory not found");
        }
        let prefix = format!("{}/", full);
        store.dirs.retain(|d| d != &full && !d.starts_with(&prefix));
        store.files.retain(|f, _| !f.starts_with(&prefix));
        RawResponse::json(200, &json!({ "message": "Directory deleted successfully" }))
    }
}

#[async_trait]
impl HttpBackend for MockServer {
    async fn execute(&self, request: ApiRequest) -> Result<RawResponse, BackendError> {
        let (route, name) = self.record(&request);

        let failure = self.store().failures.pop_front();
        match failure {
            Some(MockFailure::Network) => return Err(BackendError("connection refused".to_string())),
            Some(MockFailure::Status(status, body)) => return Ok(RawResponse::json(status, &body)),
            None => {}
        }

        if route == "/api/login" && request.method == Method::POST {
            return Ok(self.login(request.body));
        }
        if !self.is_authorized(&request) {
            return Ok(error_json(401, "Unauthorized"));
        }

        let name = name.unwrap_or_default();
        let dir = Self::query_path(&request);
        let response = match (request.method.clone(), route.as_str()) {
            (Method::GET, "/api/list") => self.list(dir).await,
            (Method::POST, "/api/upload") => self.upload(request.body).await,
            (Method::GET, "/api/download") => self.download(&request, &name),
            (Method::POST, "/api/mkdir") => self.mkdir(request.body),
            (Method::DELETE, "/api/delete") => self.delete_file(&request, &name),
            (Method::DELETE, "/api/rmdir") => self.delete_directory(&request, &name),
            _ => error_json(404, "Not found"),
        };
        Ok(response)
    }
}
