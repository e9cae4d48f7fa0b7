//! The HTTP client facade: base URL, auth header injection, 401 handling,
//! timeouts, and a typed error projection the driver can classify on.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum HttpError {
    /// No response reached the server at all (timeout, DNS, connection
    /// refused). The driver treats this as transient and retries.
    #[error("network error: {0}")]
    Network(String),

    /// A response arrived with a non-2xx status.
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },

    /// The request could not even be constructed (bad URL, encoding).
    #[error("request setup error: {0}")]
    Setup(String),
}

pub type Result<T> = std::result::Result<T, HttpError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

/// A file to attach to a multipart request (image/audio/drawing uploads).
pub struct MultipartFile {
    pub field_name: String,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Transport trait for the notes REST API. Implementations:
/// - `ReqwestHttpClient` (in notes-sync-daemon) - a real `reqwest` client
/// - `FakeHttpClient` (below) - a scripted double for driver unit tests
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn request_json(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value>;

    async fn request_multipart(
        &self,
        path: &str,
        file: MultipartFile,
    ) -> Result<Value>;
}

/// Emitted when a 401 arrives while a token was present: the caller MUST
/// clear the secure auth slot and publish a session-expired event before
/// retrying anything.
pub struct SessionExpired;

/// Fired by an `HttpClient` implementation's caller whenever a request comes
/// back `Http { status: 401, .. }` and a bearer token had been attached.
/// `notes-sync-daemon`'s `ReqwestHttpClient` calls this through a callback
/// rather than owning the auth store directly, keeping the facade itself
/// free of any dependency on the rest of the engine.
pub type SessionExpiredHook = Box<dyn Fn() + Send + Sync>;

#[cfg(test)]
pub struct FakeHttpClient {
    responses: RwLock<HashMap<(Method, String), Result<Value>>>,
    calls: RwLock<Vec<(Method, String)>>,
}

#[cfg(test)]
impl FakeHttpClient {
    pub fn new() -> Self {
        Self {
            responses: RwLock::new(HashMap::new()),
            calls: RwLock::new(Vec::new()),
        }
    }

    pub fn script(&self, method: Method, path: impl Into<String>, response: Result<Value>) {
        self.responses
            .write()
            .unwrap()
            .insert((method, path.into()), response);
    }

    pub fn calls(&self) -> Vec<(Method, String)> {
        self.calls.read().unwrap().clone()
    }
}

#[cfg(test)]
impl Default for FakeHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[async_trait]
impl HttpClient for FakeHttpClient {
    async fn request_json(
        &self,
        method: Method,
        path: &str,
        _body: Option<Value>,
    ) -> Result<Value> {
        self.calls
            .write()
            .unwrap()
            .push((method, path.to_string()));
        self.responses
            .read()
            .unwrap()
            .get(&(method, path.to_string()))
            .cloned()
            .unwrap_or_else(|| Err(HttpError::Setup(format!("no script for {path}"))))
    }

    async fn request_multipart(&self, path: &str, _file: MultipartFile) -> Result<Value> {
        self.calls
            .write()
            .unwrap()
            .push((Method::Post, path.to_string()));
        self.responses
            .read()
            .unwrap()
            .get(&(Method::Post, path.to_string()))
            .cloned()
            .unwrap_or_else(|| Err(HttpError::Setup(format!("no script for {path}"))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn fake_client_returns_scripted_response() {
        let client = FakeHttpClient::new();
        client.script(Method::Get, "/notes", Ok(json!({"data": []})));
        let resp = client.request_json(Method::Get, "/notes", None).await.unwrap();
        assert_eq!(resp, json!({"data": []}));
    }

    #[tokio::test]
    async fn fake_client_records_calls() {
        let client = FakeHttpClient::new();
        client.script(Method::Post, "/notes", Ok(json!({"id": 1})));
        client
            .request_json(Method::Post, "/notes", Some(json!({"title": "x"})))
            .await
            .unwrap();
        assert_eq!(client.calls(), vec![(Method::Post, "/notes".to_string())]);
    }

    #[tokio::test]
    async fn unscripted_path_errors() {
        let client = FakeHttpClient::new();
        let err = client.request_json(Method::Get, "/unknown", None).await;
        assert!(matches!(err, Err(HttpError::Setup(_))));
    }
}
