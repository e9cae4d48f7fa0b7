//! A real HTTP client for the notes REST API: base URL, bearer auth header
//! injection, 401 handling, and a single request timeout.

use async_trait::async_trait;
use notes_sync_core::{HttpClient, HttpError, Method, MultipartFile};
use reqwest::Client;
use serde_json::Value;
use std::sync::RwLock;
use std::time::Duration;
use tracing::warn;

/// Called once per 401 observed while a token was attached. Kept
/// synchronous and non-blocking (a channel send) on purpose: clearing the
/// secure auth slots, detaching the push transport, and publishing
/// `auth.changed` all require `.await`, so this client only signals that the
/// session expired and the host process (`main.rs`) performs that sequence
/// from an async context, never owning any part of the rest of the engine
/// itself.
pub type SessionExpiredHook = Box<dyn Fn() + Send + Sync>;

pub struct ReqwestHttpClient {
    client: Client,
    base_url: String,
    token: RwLock<Option<String>>,
    on_session_expired: SessionExpiredHook,
}

impl ReqwestHttpClient {
    pub fn new(base_url: impl Into<String>, timeout_ms: u64, on_session_expired: SessionExpiredHook) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .expect("reqwest client builds with a static timeout");
        Self {
            client,
            base_url: base_url.into(),
            token: RwLock::new(None),
            on_session_expired,
        }
    }

    pub fn set_token(&self, token: Option<String>) {
        *self.token.write().unwrap() = token;
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn had_token(&self) -> bool {
        self.token.read().unwrap().is_some()
    }

    async fn handle_response(
        &self,
        resp: reqwest::Response,
    ) -> std::result::Result<Value, HttpError> {
        let status = resp.status();
        if status.is_success() {
            return resp
                .json()
                .await
                .map_err(|e| HttpError::Setup(e.to_string()));
        }

        let body = resp.text().await.unwrap_or_default();
        if status.as_u16() == 401 && self.had_token() {
            warn!("session expired (401 with token present)");
            (self.on_session_expired)();
        }
        Err(HttpError::Http {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn request_json(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> std::result::Result<Value, HttpError> {
        let mut req = match method {
            Method::Get => self.client.get(self.url(path)),
            Method::Post => self.client.post(self.url(path)),
            Method::Put => self.client.put(self.url(path)),
            Method::Delete => self.client.delete(self.url(path)),
        };
        if let Some(token) = self.token.read().unwrap().clone() {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.json(&body);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| HttpError::Network(e.to_string()))?;
        self.handle_response(resp).await
    }

    async fn request_multipart(
        &self,
        path: &str,
        file: MultipartFile,
    ) -> std::result::Result<Value, HttpError> {
        let part = reqwest::multipart::Part::bytes(file.bytes).file_name(file.file_name);
        let form = reqwest::multipart::Form::new().part(file.field_name, part);

        let mut req = self.client.post(self.url(path)).multipart(form);
        if let Some(token) = self.token.read().unwrap().clone() {
            req = req.bearer_auth(token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| HttpError::Network(e.to_string()))?;
        self.handle_response(resp).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn successful_get_decodes_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/notes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .mount(&server)
            .await;

        let client = ReqwestHttpClient::new(server.uri(), 5000, Box::new(|| {}));
        let resp = client
            .request_json(Method::Get, "/notes", None)
            .await
            .unwrap();
        assert_eq!(resp, json!({"data": []}));
    }

    #[tokio::test]
    async fn unauthorized_with_token_fires_session_expired_hook() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/notes"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        let client = ReqwestHttpClient::new(
            server.uri(),
            5000,
            Box::new(move || fired_clone.store(true, Ordering::SeqCst)),
        );
        client.set_token(Some("abc".into()));

        let err = client.request_json(Method::Get, "/notes", None).await;
        assert!(matches!(err, Err(HttpError::Http { status: 401, .. })));
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn unauthorized_without_token_does_not_fire_hook() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/notes"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        let client = ReqwestHttpClient::new(
            server.uri(),
            5000,
            Box::new(move || fired_clone.store(true, Ordering::SeqCst)),
        );

        let _ = client.request_json(Method::Get, "/notes", None).await;
        assert!(!fired.load(Ordering::SeqCst));
    }
}
