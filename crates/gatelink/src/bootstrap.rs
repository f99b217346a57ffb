//! Bootstrap call: ask the HTTP API where the gateway lives.

use std::time::Duration;

use gatelink_proto::GatewayEndpoint;
use reqwest::Client;
use tracing::{debug, info};

use crate::error::ClientError;

/// Default REST API base.
pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const ERROR_BODY_SNIPPET_LEN: usize = 220;

/// Where and how to make the bootstrap call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapConfig {
    /// REST API base URL, without a trailing slash.
    pub api_base: String,
    /// Request timeout.
    pub timeout: Duration,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl BootstrapConfig {
    /// Use a different API base.
    #[must_use]
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    /// Use a different timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn endpoint_url(&self) -> String {
        format!("{}/gateway/bot", self.api_base.trim_end_matches('/'))
    }
}

/// Fetch the gateway endpoint and session-start quota.
///
/// # Errors
///
/// Fails on transport errors, non-success statuses, or a body that does not
/// describe an endpoint. None of these are retried.
pub async fn fetch_endpoint(
    config: &BootstrapConfig,
    token: &str,
) -> Result<GatewayEndpoint, ClientError> {
    let http = Client::builder().timeout(config.timeout).build()?;
    let url = config.endpoint_url();
    debug!(url = %url, "fetching gateway endpoint");

    let response = http
        .get(&url)
        .header(reqwest::header::AUTHORIZATION, format!("Bot {token}"))
        .send()
        .await?;
    let status = response.status();
    let body = response.text().await?;

    let endpoint = parse_endpoint(status.as_u16(), &body)?;
    info!(
        url = %endpoint.url,
        shards = endpoint.shards,
        remaining = endpoint.session_start_limit.remaining,
        "gateway endpoint resolved"
    );
    Ok(endpoint)
}

/// Interpret a bootstrap response.
///
/// # Errors
///
/// [`ClientError::BootstrapStatus`] for non-2xx statuses, and
/// [`ClientError::BootstrapBody`] for bodies that do not parse.
pub fn parse_endpoint(status: u16, body: &str) -> Result<GatewayEndpoint, ClientError> {
    if !(200..300).contains(&status) {
        return Err(ClientError::BootstrapStatus {
            status,
            body: summarize_body(body),
        });
    }
    let endpoint: GatewayEndpoint =
        serde_json::from_str(body).map_err(|e| ClientError::BootstrapBody(e.to_string()))?;
    if endpoint.url.is_empty() {
        return Err(ClientError::BootstrapBody("empty gateway url".into()));
    }
    Ok(endpoint)
}

fn summarize_body(body: &str) -> String {
    body.chars().take(ERROR_BODY_SNIPPET_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    const BODY: &str = r#"{"url":"wss://gateway.example","shards":1,"session_start_limit":{"total":1000,"remaining":999,"reset_after":14400000,"max_concurrency":1}}"#;

    /// Answers one request with `status` and `body`, reporting the request head.
    async fn http_once(status: &'static str, body: &'static str) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");
            let mut buf = vec![0u8; 4096];
            let mut head = Vec::new();
            loop {
                let n = stream.read(&mut buf).await.expect("read");
                if n == 0 {
                    break;
                }
                head.extend_from_slice(&buf[..n]);
                if head.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.expect("write");
            let _ = tx.send(String::from_utf8_lossy(&head).into_owned());
        });
        (format!("http://{addr}"), rx)
    }

    #[test]
    fn test_parse_success() {
        let endpoint = parse_endpoint(200, BODY).expect("parse");
        assert_eq!(endpoint.url, "wss://gateway.example");
        assert_eq!(endpoint.session_start_limit.remaining, 999);
    }

    #[test]
    fn test_parse_error_status() {
        let err = parse_endpoint(401, r#"{"message":"401: Unauthorized","code":0}"#)
            .expect_err("401 must fail");
        match err {
            ClientError::BootstrapStatus { status, body } => {
                assert_eq!(status, 401);
                assert!(body.contains("Unauthorized"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_parse_truncates_long_bodies() {
        let long = "x".repeat(1000);
        let Err(ClientError::BootstrapStatus { body, .. }) = parse_endpoint(500, &long) else {
            panic!("expected status error");
        };
        assert_eq!(body.len(), ERROR_BODY_SNIPPET_LEN);
    }

    #[test]
    fn test_parse_malformed_body() {
        assert!(matches!(
            parse_endpoint(200, r#"{"url":"wss://x"}"#),
            Err(ClientError::BootstrapBody(_))
        ));
        assert!(matches!(
            parse_endpoint(200, "not json"),
            Err(ClientError::BootstrapBody(_))
        ));
    }

    #[test]
    fn test_endpoint_url_joins_path() {
        let config = BootstrapConfig::default().with_api_base("http://localhost:1/api/");
        assert_eq!(config.endpoint_url(), "http://localhost:1/api/gateway/bot");
    }

    #[tokio::test]
    async fn test_fetch_sends_bot_authorization() {
        let (base, head) = http_once("200 OK", BODY).await;
        let config = BootstrapConfig::default().with_api_base(base);

        let endpoint = fetch_endpoint(&config, "tok").await.expect("fetch");
        assert_eq!(endpoint.shards, 1);

        let head = head.await.expect("request head").to_ascii_lowercase();
        assert!(head.starts_with("get /gateway/bot "));
        assert!(head.contains("authorization: bot tok"));
    }

    #[tokio::test]
    async fn test_fetch_reports_status() {
        let (base, _head) = http_once("401 Unauthorized", r#"{"message":"401: Unauthorized"}"#).await;
        let config = BootstrapConfig::default().with_api_base(base);

        let result = fetch_endpoint(&config, "bad").await;
        assert!(matches!(
            result,
            Err(ClientError::BootstrapStatus { status: 401, .. })
        ));
    }
}
