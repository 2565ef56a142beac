//! HTTP integration transport

use super::{flag, optional_str, required_str, timeout_override, DispatchFailure, DispatchFailureKind};
use crate::flow::types::Payload;
use anyhow::Result;
use reqwest::{Client, Method, Url};
use serde_json::{json, Value};
use std::time::Duration;

/// Issues one request per call; clients are shared across calls
#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    client: Client,
    /// Used for integrations with `verify_ssl: false`
    insecure_client: Client,
    default_timeout: Duration,
    body_limit: usize,
}

impl HttpDispatcher {
    pub fn new(default_timeout: Duration, body_limit: usize) -> Result<Self> {
        Ok(Self {
            client: Client::builder().build()?,
            insecure_client: Client::builder().danger_accept_invalid_certs(true).build()?,
            default_timeout,
            body_limit,
        })
    }

    /// Send the payload as a JSON body using the merged integration config
    pub async fn send(&self, config: &Value, payload: &Payload) -> Result<Value, DispatchFailure> {
        let raw_url = required_str(config, "url")?;
        let url = Url::parse(raw_url)
            .map_err(|e| DispatchFailure::configuration(format!("malformed url '{}': {}", raw_url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(DispatchFailure::configuration(format!(
                "unsupported url scheme '{}'",
                url.scheme()
            )));
        }

        let method_name = optional_str(config, "method").unwrap_or("POST").to_uppercase();
        let method = Method::from_bytes(method_name.as_bytes())
            .map_err(|_| DispatchFailure::configuration(format!("invalid http method '{}'", method_name)))?;
        let timeout = timeout_override(config, self.default_timeout);
        let client = if flag(config, "verify_ssl", true) {
            &self.client
        } else {
            &self.insecure_client
        };

        let mut request = client
            .request(method.clone(), url.clone())
            .timeout(timeout)
            .json(payload.as_value());
        if let Some(Value::Object(headers)) = config.get("headers") {
            for (name, value) in headers {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                request = request.header(name.as_str(), value);
            }
        }

        tracing::debug!("🌐 {} {}", method, url);
        let response = request.send().await.map_err(|e| classify(&e, timeout))?;
        let status = response.status();
        let body = read_body(response, self.body_limit)
            .await
            .map_err(|e| classify(&e, timeout))?;

        let response_data = json!({
            "status": status.as_u16(),
            "body": body,
        });
        tracing::debug!("📡 Response status: {}", status);

        if status.is_success() {
            Ok(response_data)
        } else {
            Err(DispatchFailure::new(DispatchFailureKind::Status, format!("{} {} returned {}", method, url, status))
                .with_detail(response_data))
        }
    }
}

/// Map a reqwest error to a failure kind
///
/// Builder errors and name resolution failures are configuration problems;
/// everything else on the wire is transport.
fn classify(error: &reqwest::Error, timeout: Duration) -> DispatchFailure {
    if error.is_timeout() {
        return DispatchFailure::timeout(timeout);
    }

    let mut chain = vec![error.to_string()];
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        chain.push(cause.to_string());
        source = std::error::Error::source(cause);
    }
    let message = chain.join(": ");

    let unresolvable = chain
        .iter()
        .any(|cause| cause.contains("dns error") || cause.contains("failed to lookup address"));
    if error.is_builder() || unresolvable {
        DispatchFailure::configuration(message)
    } else {
        DispatchFailure::transport(message)
    }
}

/// Cut `body` to at most `limit` bytes on a char boundary
/// Read at most `limit` bytes of the response body
///
/// The rest of the body is never pulled off the connection.
async fn read_body(mut response: reqwest::Response, limit: usize) -> reqwest::Result<String> {
    let mut body = Vec::new();
    while body.len() < limit {
        match response.chunk().await? {
            Some(chunk) => body.extend_from_slice(&chunk),
            None => break,
        }
    }
    Ok(decode_prefix(&body, limit))
}

/// Text of the first `limit` bytes, dropping a character split by the cut
fn decode_prefix(bytes: &[u8], limit: usize) -> String {
    let bytes = &bytes[..bytes.len().min(limit)];
    let end = match std::str::from_utf8(bytes) {
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        _ => bytes.len(),
    };
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn dispatcher(body_limit: usize) -> HttpDispatcher {
        HttpDispatcher::new(Duration::from_secs(5), body_limit).unwrap()
    }

    #[tokio::test]
    async fn posts_payload_with_configured_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("x-api-key", "secret"))
            .and(body_json(json!({"temperature": 20})))
            .respond_with(ResponseTemplate::new(201).set_body_string("accepted"))
            .expect(1)
            .mount(&server)
            .await;

        let config = json!({
            "url": format!("{}/hook", server.uri()),
            "headers": {"x-api-key": "secret"}
        });
        let response = dispatcher(4096)
            .send(&config, &Payload::new(json!({"temperature": 20})))
            .await
            .unwrap();

        assert_eq!(response, json!({"status": 201, "body": "accepted"}));
    }

    #[tokio::test]
    async fn honours_configured_method() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/state"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let config = json!({"url": format!("{}/state", server.uri()), "method": "put"});
        let response = dispatcher(4096).send(&config, &Payload::new(json!({}))).await.unwrap();

        assert_eq!(response["status"], json!(204));
    }

    #[tokio::test]
    async fn non_success_status_is_a_status_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let config = json!({"url": server.uri()});
        let failure = dispatcher(4096).send(&config, &Payload::new(json!({}))).await.unwrap_err();

        assert_eq!(failure.kind, DispatchFailureKind::Status);
        assert_eq!(failure.detail, Some(json!({"status": 500, "body": "boom"})));
    }

    #[tokio::test]
    async fn stored_body_is_truncated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(100)))
            .mount(&server)
            .await;

        let config = json!({"url": server.uri()});
        let response = dispatcher(10).send(&config, &Payload::new(json!({}))).await.unwrap();

        assert_eq!(response["body"], json!("x".repeat(10)));
    }

    #[tokio::test]
    async fn slow_endpoint_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let config = json!({"url": server.uri(), "timeout_ms": 100});
        let failure = dispatcher(4096).send(&config, &Payload::new(json!({}))).await.unwrap_err();

        assert_eq!(failure.kind, DispatchFailureKind::Timeout);
    }

    #[tokio::test]
    async fn malformed_url_is_a_configuration_failure() {
        for url in ["not a url", "ftp://example.com/upload"] {
            let failure = dispatcher(4096)
                .send(&json!({"url": url}), &Payload::new(json!({})))
                .await
                .unwrap_err();
            assert_eq!(failure.kind, DispatchFailureKind::Configuration);
        }
    }

    #[tokio::test]
    async fn refused_connection_is_a_transport_failure() {
        let failure = dispatcher(4096)
            .send(&json!({"url": "http://127.0.0.1:1/"}), &Payload::new(json!({})))
            .await
            .unwrap_err();

        assert_eq!(failure.kind, DispatchFailureKind::Transport);
    }

    #[tokio::test]
    async fn large_body_is_read_only_up_to_the_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("y".repeat(4 * 1024 * 1024)))
            .mount(&server)
            .await;

        let config = json!({"url": server.uri()});
        let response = dispatcher(64).send(&config, &Payload::new(json!({}))).await.unwrap();

        assert_eq!(response["body"].as_str().map(str::len), Some(64));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(decode_prefix("héllo".as_bytes(), 2), "h");
        assert_eq!(decode_prefix(b"short", 10), "short");
        assert_eq!(decode_prefix(b"ab\xffcd", 10), "ab\u{fffd}cd");
    }
}
