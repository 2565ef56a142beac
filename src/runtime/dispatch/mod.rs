//! Integration dispatcher
//!
//! Sends a payload to the external system an integration describes. The
//! node-local config is shallow-merged over the integration's stored config,
//! then handed to the transport for the integration's kind. Every outcome,
//! including transport and configuration problems, comes back as a value.

use crate::config::EngineConfig;
use crate::flow::types::{Integration, IntegrationKind, Payload};
use crate::runtime::overlay_config;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

// HTTP requests with reqwest
pub mod http;

// MQTT publishes with rumqttc
pub mod mqtt;

pub use http::HttpDispatcher;
pub use mqtt::MqttDispatcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchFailureKind {
    /// Connection, TLS or protocol level failure
    Transport,
    /// The remote answered with a non-2xx status
    Status,
    /// No answer within the configured timeout
    Timeout,
    /// The integration is misconfigured (bad URL, unresolvable host, missing key)
    Configuration,
}

impl std::fmt::Display for DispatchFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DispatchFailureKind::Transport => "transport",
            DispatchFailureKind::Status => "status",
            DispatchFailureKind::Timeout => "timeout",
            DispatchFailureKind::Configuration => "configuration",
        };
        f.write_str(name)
    }
}

/// Structured failure of an integration node
#[derive(Debug, Clone, Error)]
#[error("{kind} error: {message}")]
pub struct DispatchFailure {
    pub kind: DispatchFailureKind,
    pub message: String,
    /// Response captured alongside the failure, e.g. status and body of a 500
    pub detail: Option<Value>,
}

impl DispatchFailure {
    pub fn new(kind: DispatchFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: None,
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(DispatchFailureKind::Configuration, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(DispatchFailureKind::Transport, message)
    }

    pub fn timeout(limit: Duration) -> Self {
        Self::new(DispatchFailureKind::Timeout, format!("no response within {:?}", limit))
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// Everything captured about one dispatch
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Response data on success
    pub result: Result<Value, DispatchFailure>,
}

/// Routes integration calls to the transport for their kind
#[derive(Debug, Clone)]
pub struct IntegrationDispatcher {
    http: HttpDispatcher,
    mqtt: MqttDispatcher,
}

impl IntegrationDispatcher {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        Ok(Self {
            http: HttpDispatcher::new(config.integration_timeout(), config.response_body_limit)?,
            mqtt: MqttDispatcher::new(config.integration_timeout()),
        })
    }

    /// Send `payload` to `integration`
    pub async fn dispatch(&self, integration: &Integration, node_config: &Value, payload: &Payload) -> DispatchOutcome {
        let started_at = Utc::now();
        let config = overlay_config(&integration.config, node_config);
        tracing::debug!(
            "📤 Dispatching to {} integration '{}' ({})",
            integration.kind.as_str(),
            integration.name,
            integration.id
        );

        let result = match integration.kind {
            IntegrationKind::Http => self.http.send(&config, payload).await,
            IntegrationKind::Mqtt => self.mqtt.publish(&config, payload).await,
        };

        match &result {
            Ok(_) => tracing::debug!("✅ Integration '{}' accepted payload", integration.id),
            Err(failure) if failure.kind == DispatchFailureKind::Configuration => {
                tracing::error!("❌ Integration '{}' is misconfigured: {}", integration.id, failure)
            }
            Err(failure) => tracing::warn!("⚠️ Integration '{}' failed: {}", integration.id, failure),
        }

        DispatchOutcome {
            started_at,
            finished_at: Utc::now(),
            result,
        }
    }
}

/// Required string key of a merged integration config
pub(crate) fn required_str<'a>(config: &'a Value, key: &str) -> Result<&'a str, DispatchFailure> {
    config
        .get(key)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| DispatchFailure::configuration(format!("missing '{}' in integration config", key)))
}

pub(crate) fn optional_str<'a>(config: &'a Value, key: &str) -> Option<&'a str> {
    config.get(key).and_then(Value::as_str).filter(|value| !value.is_empty())
}

pub(crate) fn flag(config: &Value, key: &str, default: bool) -> bool {
    config.get(key).and_then(Value::as_bool).unwrap_or(default)
}

/// Per-integration `timeout_ms` override
pub(crate) fn timeout_override(config: &Value, default: Duration) -> Duration {
    config
        .get("timeout_ms")
        .and_then(Value::as_u64)
        .map(Duration::from_millis)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn node_config_overrides_integration_config() {
        let dispatcher = IntegrationDispatcher::new(&EngineConfig::default()).unwrap();
        let integration = Integration {
            id: "int-1".to_string(),
            name: "broken".to_string(),
            kind: IntegrationKind::Http,
            config: json!({"url": "http://localhost/ok"}),
        };

        let outcome = dispatcher
            .dispatch(&integration, &json!({"url": "not a url"}), &Payload::new(json!({})))
            .await;

        let failure = outcome.result.unwrap_err();
        assert_eq!(failure.kind, DispatchFailureKind::Configuration);
        assert!(outcome.finished_at >= outcome.started_at);
    }

    #[test]
    fn config_helpers_read_typed_values() {
        let config = json!({"url": "", "method": "PUT", "tls": true, "timeout_ms": 250});
        assert!(required_str(&config, "url").is_err());
        assert_eq!(optional_str(&config, "method"), Some("PUT"));
        assert!(flag(&config, "tls", false));
        assert!(!flag(&config, "retain", false));
        assert_eq!(timeout_override(&config, Duration::from_secs(1)), Duration::from_millis(250));
        assert_eq!(timeout_override(&json!({}), Duration::from_secs(1)), Duration::from_secs(1));
    }
}
