//! HTTP plumbing shared by both session clients.
//!
//! Nothing in here panics or raises on a bad status: a request either yields a
//! [`RawResponse`] (any status) or an [`AppError::Transport`]. Status checking
//! happens in [`RawResponse::expect`], which turns an unexpected status into an
//! [`AppError::Remote`] carrying the server's message verbatim.

use crate::error::{AppError, Service};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, instrument};

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    service: Service,
}

#[derive(Debug, Clone)]
pub struct RawResponse {
    pub service: Service,
    pub status: StatusCode,
    pub body: Value,
}

impl HttpTransport {
    pub fn new(service: Service, base_url: &str, user_agent: &str) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| AppError::Transport {
                service,
                message: format!("Failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            service,
        })
    }

    pub fn service(&self) -> Service {
        self.service
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[instrument(skip(self, body, query), fields(service = %self.service, method = %method, path = %path))]
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        query: &[(&str, String)],
    ) -> Result<RawResponse, AppError> {
        let url = format!("{}{}", self.base_url, path);
        let mut builder = self.client.request(method, &url);
        if !query.is_empty() {
            builder = builder.query(query);
        }
        if let Some(payload) = body {
            builder = builder.json(payload);
        }

        let response = builder.send().await.map_err(|e| AppError::Transport {
            service: self.service,
            message: e.to_string(),
        })?;
        let status = response.status();
        let text = response.text().await.map_err(|e| AppError::Transport {
            service: self.service,
            message: format!("Failed to read response body: {}", e),
        })?;
        debug!(status = %status, bytes = text.len(), "Received response");

        Ok(RawResponse {
            service: self.service,
            status,
            body: decode_body(&text),
        })
    }

    /// Sends a request and requires `expected` as the response status.
    pub async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        query: &[(&str, String)],
        expected: StatusCode,
    ) -> Result<Value, AppError> {
        self.request(method, path, body, query).await?.expect(expected)
    }

    pub async fn call_typed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        query: &[(&str, String)],
        expected: StatusCode,
    ) -> Result<T, AppError> {
        self.request(method, path, body, query).await?.decode(expected)
    }
}

impl RawResponse {
    pub fn expect(self, expected: StatusCode) -> Result<Value, AppError> {
        if self.status == expected {
            return Ok(self.body);
        }
        Err(AppError::Remote {
            service: self.service,
            status: self.status.as_u16(),
            message: rejection_message(&self.body),
            body: self.body,
        })
    }

    pub fn decode<T: DeserializeOwned>(self, expected: StatusCode) -> Result<T, AppError> {
        let service = self.service;
        let body = self.expect(expected)?;
        serde_json::from_value(body).map_err(|e| AppError::MalformedResponse {
            service,
            message: e.to_string(),
        })
    }
}

/// Empty bodies become `{}`; anything that is not JSON is kept as `{"text": raw}`.
pub fn decode_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(text).unwrap_or_else(|_| json!({ "text": text }))
}

fn rejection_message(body: &Value) -> String {
    ["error", "message", "text"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string())
}

/// Percent-encodes each segment of a relative path, keeping `/` separators.
/// Empty and `.` segments are dropped.
pub fn encode_segments(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
