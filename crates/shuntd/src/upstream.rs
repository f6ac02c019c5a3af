//! HTTP upstream invoker.
//!
//! Resolves a credential id to a configured endpoint and performs the
//! call as a plain-HTTP/1.1 POST with the JSON payload, classifying
//! failures into the reasons the cooldown policy understands. TLS and
//! provider-specific wire translation are handled by whatever sits at
//! the configured endpoint (typically a local provider proxy).

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use http_body_util::BodyExt;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use shunt_engine::{FailureReason, InvokeError, Invoker};

/// One upstream endpoint a credential id resolves to.
#[derive(Debug, Clone, Deserialize)]
pub struct Credential {
    /// `host:port` of the endpoint.
    pub address: String,
    /// Request path, e.g. `/v1/chat/completions`.
    #[serde(default = "default_path")]
    pub path: String,
    /// Bearer token sent with each request.
    pub api_key: String,
}

fn default_path() -> String {
    "/v1/chat/completions".to_string()
}

/// Credential book loaded from a TOML file:
///
/// ```toml
/// [credentials.cred-openai]
/// address = "127.0.0.1:8091"
/// api_key = "sk-..."
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialBook {
    #[serde(default)]
    credentials: HashMap<String, Credential>,
}

impl CredentialBook {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading credentials file {}", path.display()))?;
        let book: CredentialBook = toml::from_str(&raw)
            .with_context(|| format!("parsing credentials file {}", path.display()))?;
        Ok(book)
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    fn get(&self, credential_id: &str) -> Option<&Credential> {
        self.credentials.get(credential_id)
    }
}

/// Invoker that POSTs to the credential's configured endpoint.
pub struct HttpInvoker {
    book: CredentialBook,
    timeout: Duration,
}

impl HttpInvoker {
    pub fn new(book: CredentialBook, timeout: Duration) -> Self {
        Self { book, timeout }
    }

    async fn send(
        &self,
        credential: &Credential,
        model: &str,
        payload: &Value,
    ) -> Result<Value, InvokeError> {
        let stream = tokio::net::TcpStream::connect(&credential.address)
            .await
            .map_err(|e| {
                InvokeError::new(FailureReason::Network, format!("connect failed: {e}"))
            })?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| {
                InvokeError::new(FailureReason::Network, format!("handshake failed: {e}"))
            })?;
        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        // The routed model replaces whatever alias the caller used.
        let mut body = payload.clone();
        if let Some(obj) = body.as_object_mut() {
            obj.insert("model".to_string(), json!(model));
        }
        let body_bytes = serde_json::to_vec(&body)
            .map_err(|e| InvokeError::upstream(format!("payload serialization failed: {e}")))?;

        let uri = format!("http://{}{}", credential.address, credential.path);
        let req = http::Request::builder()
            .method("POST")
            .uri(&uri)
            .header("host", &credential.address)
            .header("content-type", "application/json")
            .header("authorization", format!("Bearer {}", credential.api_key))
            .header("user-agent", "shuntd/0.1")
            .body(http_body_util::Full::new(bytes::Bytes::from(body_bytes)))
            .map_err(|e| InvokeError::upstream(format!("request build failed: {e}")))?;

        let resp = sender.send_request(req).await.map_err(|e| {
            InvokeError::new(FailureReason::Network, format!("request failed: {e}"))
        })?;

        let status = resp.status();
        let retry_after = resp
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);

        let collected = resp.into_body().collect().await.map_err(|e| {
            InvokeError::new(FailureReason::Network, format!("body read failed: {e}"))
        })?;
        let raw = collected.to_bytes();

        if status.is_success() {
            let value: Value = serde_json::from_slice(&raw)
                .map_err(|e| InvokeError::upstream(format!("invalid response body: {e}")))?;
            debug!(%uri, %status, "upstream call succeeded");
            return Ok(value);
        }

        let snippet = String::from_utf8_lossy(&raw[..raw.len().min(256)]).to_string();
        let reason = match status.as_u16() {
            429 => FailureReason::RateLimited {
                reset_hint: retry_after,
            },
            401 | 403 => FailureReason::Auth,
            402 => FailureReason::AccountSuspended,
            408 => FailureReason::Timeout,
            _ => FailureReason::Upstream,
        };
        Err(InvokeError::new(
            reason,
            format!("upstream returned {status}: {snippet}"),
        ))
    }
}

#[async_trait]
impl Invoker for HttpInvoker {
    async fn invoke(
        &self,
        credential_id: &str,
        model: &str,
        payload: &Value,
    ) -> Result<Value, InvokeError> {
        let Some(credential) = self.book.get(credential_id) else {
            return Err(InvokeError::new(
                FailureReason::Auth,
                format!("unknown credential {credential_id}"),
            ));
        };

        match tokio::time::timeout(self.timeout, self.send(credential, model, payload)).await {
            Ok(result) => result,
            Err(_) => Err(InvokeError::new(
                FailureReason::Timeout,
                format!("upstream call exceeded {}s", self.timeout.as_secs()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_book_parses() {
        let book: CredentialBook = toml::from_str(
            r#"
            [credentials.cred-a]
            address = "127.0.0.1:8091"
            api_key = "sk-test"

            [credentials.cred-b]
            address = "127.0.0.1:8092"
            path = "/custom"
            api_key = "sk-other"
            "#,
        )
        .unwrap();

        assert_eq!(book.len(), 2);
        let a = book.get("cred-a").unwrap();
        assert_eq!(a.path, "/v1/chat/completions");
        let b = book.get("cred-b").unwrap();
        assert_eq!(b.path, "/custom");
    }

    #[test]
    fn empty_book_parses() {
        let book: CredentialBook = toml::from_str("").unwrap();
        assert!(book.is_empty());
    }

    #[tokio::test]
    async fn unknown_credential_fails_as_auth() {
        let invoker = HttpInvoker::new(
            toml::from_str("").unwrap(),
            Duration::from_secs(1),
        );
        let err = invoker
            .invoke("cred-missing", "gpt-test", &json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.reason, FailureReason::Auth);
    }

    #[tokio::test]
    async fn unreachable_endpoint_fails_as_network() {
        let book: CredentialBook = toml::from_str(
            r#"
            [credentials.cred-a]
            address = "127.0.0.1:1"
            api_key = "sk-test"
            "#,
        )
        .unwrap();
        let invoker = HttpInvoker::new(book, Duration::from_secs(2));

        let err = invoker
            .invoke("cred-a", "gpt-test", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(
            err.reason,
            FailureReason::Network | FailureReason::Timeout
        ));
    }
}
