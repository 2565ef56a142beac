//! MQTT integration transport
//!
//! Each publish opens its own connection, waits for the acknowledgment its
//! QoS calls for, then disconnects. Publishes are therefore independent and
//! safe to retry.

use super::{flag, optional_str, required_str, timeout_override, DispatchFailure};
use crate::flow::types::Payload;
use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing, Packet, QoS, TlsConfiguration, Transport};
use serde_json::{json, Value};
use std::time::Duration;
use uuid::Uuid;

/// Largest packet accepted or sent on a publish connection
const MAX_PACKET_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct MqttDispatcher {
    default_timeout: Duration,
}

/// Broker connection and publish parameters of one integration
#[derive(Debug, Clone)]
struct MqttTarget {
    host: String,
    port: u16,
    topic: String,
    qos: QoS,
    retain: bool,
    username: Option<String>,
    password: Option<String>,
    tls: bool,
    ca_cert: Option<String>,
    client_id: String,
    timeout: Duration,
}

impl MqttTarget {
    fn from_config(config: &Value, default_timeout: Duration) -> Result<Self, DispatchFailure> {
        let tls = flag(config, "tls", false);
        let port = match config.get("port").and_then(Value::as_u64) {
            Some(port) => u16::try_from(port)
                .map_err(|_| DispatchFailure::configuration(format!("invalid mqtt port {}", port)))?,
            None if tls => 8883,
            None => 1883,
        };
        let qos = match config.get("qos").and_then(Value::as_u64).unwrap_or(0) {
            0 => QoS::AtMostOnce,
            1 => QoS::AtLeastOnce,
            2 => QoS::ExactlyOnce,
            other => return Err(DispatchFailure::configuration(format!("invalid mqtt qos {}", other))),
        };
        let client_id = match optional_str(config, "client_id") {
            Some(id) => id.to_string(),
            None => format!("nodedash-{}", &Uuid::new_v4().simple().to_string()[..12]),
        };

        Ok(Self {
            host: required_str(config, "host")?.to_string(),
            port,
            topic: required_str(config, "topic")?.to_string(),
            qos,
            retain: flag(config, "retain", false),
            username: optional_str(config, "username").map(str::to_string),
            password: optional_str(config, "password").map(str::to_string),
            tls,
            ca_cert: optional_str(config, "ca_cert").map(str::to_string),
            client_id,
            timeout: timeout_override(config, default_timeout),
        })
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(self.client_id.clone(), self.host.clone(), self.port);
        options.set_keep_alive(Duration::from_secs(5));
        options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);
        if let Some(username) = &self.username {
            options.set_credentials(username.clone(), self.password.clone().unwrap_or_default());
        }
        if self.tls {
            let transport = match &self.ca_cert {
                Some(ca) => Transport::tls_with_config(TlsConfiguration::Simple {
                    ca: ca.as_bytes().to_vec(),
                    alpn: None,
                    client_auth: None,
                }),
                None => Transport::tls_with_default_config(),
            };
            options.set_transport(transport);
        }
        options
    }
}

impl MqttDispatcher {
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }

    /// Publish the serialized payload to the configured topic
    pub async fn publish(&self, config: &Value, payload: &Payload) -> Result<Value, DispatchFailure> {
        let target = MqttTarget::from_config(config, self.default_timeout)?;
        let body = serde_json::to_vec(payload.as_value())
            .map_err(|e| DispatchFailure::configuration(format!("payload is not serializable: {}", e)))?;

        match tokio::time::timeout(target.timeout, publish_once(&target, body)).await {
            Ok(result) => result,
            Err(_) => Err(DispatchFailure::timeout(target.timeout)),
        }
    }
}

async fn publish_once(target: &MqttTarget, body: Vec<u8>) -> Result<Value, DispatchFailure> {
    let resolved = tokio::net::lookup_host((target.host.as_str(), target.port))
        .await
        .map(|mut addrs| addrs.next().is_some())
        .unwrap_or(false);
    if !resolved {
        return Err(DispatchFailure::configuration(format!(
            "cannot resolve mqtt broker '{}'",
            target.host
        )));
    }

    tracing::debug!(
        "📨 Publishing {} bytes to mqtt://{}:{}/{}",
        body.len(),
        target.host,
        target.port,
        target.topic
    );
    let (client, mut eventloop) = AsyncClient::new(target.options(), 10);
    client
        .publish(target.topic.clone(), target.qos, target.retain, body)
        .await
        .map_err(|e| DispatchFailure::configuration(format!("publish rejected: {}", e)))?;

    let acknowledgment = loop {
        match eventloop.poll().await {
            Ok(Event::Outgoing(Outgoing::Publish(_))) if target.qos == QoS::AtMostOnce => break "sent",
            Ok(Event::Incoming(Packet::PubAck(_))) => break "puback",
            Ok(Event::Incoming(Packet::PubComp(_))) => break "pubcomp",
            Ok(_) => continue,
            Err(e) => {
                return Err(DispatchFailure::transport(format!(
                    "broker {}:{} connection failed: {}",
                    target.host, target.port, e
                )))
            }
        }
    };

    // Best effort: push the DISCONNECT out before dropping the event loop
    let _ = client.disconnect().await;
    let _ = tokio::time::timeout(Duration::from_millis(200), eventloop.poll()).await;

    Ok(json!({
        "topic": target.topic,
        "qos": qos_level(target.qos),
        "acknowledgment": acknowledgment,
    }))
}

fn qos_level(qos: QoS) -> u8 {
    match qos {
        QoS::AtMostOnce => 0,
        QoS::AtLeastOnce => 1,
        QoS::ExactlyOnce => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::dispatch::DispatchFailureKind;
    use std::time::Instant;

    #[test]
    fn target_defaults_follow_tls_flag() {
        let plain = MqttTarget::from_config(&json!({"host": "broker", "topic": "t"}), Duration::from_secs(1)).unwrap();
        assert_eq!(plain.port, 1883);
        assert_eq!(plain.qos, QoS::AtMostOnce);
        assert!(plain.client_id.starts_with("nodedash-"));

        let secure = MqttTarget::from_config(
            &json!({"host": "broker", "topic": "t", "tls": true, "qos": 2}),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(secure.port, 8883);
        assert_eq!(secure.qos, QoS::ExactlyOnce);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let timeout = Duration::from_secs(1);
        for config in [
            json!({"host": "broker"}),
            json!({"topic": "t"}),
            json!({"host": "broker", "topic": "t", "qos": 3}),
            json!({"host": "broker", "topic": "t", "port": 70000}),
        ] {
            let failure = MqttTarget::from_config(&config, timeout).unwrap_err();
            assert_eq!(failure.kind, DispatchFailureKind::Configuration);
        }
    }

    #[tokio::test]
    async fn unreachable_broker_fails_within_timeout() {
        let dispatcher = MqttDispatcher::new(Duration::from_secs(2));
        let started = Instant::now();
        let failure = dispatcher
            .publish(
                &json!({"host": "127.0.0.1", "port": 1, "topic": "sensors/out", "qos": 1}),
                &Payload::new(json!({"temperature": 20})),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            failure.kind,
            DispatchFailureKind::Transport | DispatchFailureKind::Timeout
        ));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn silent_broker_hits_the_timeout() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let holder = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let dispatcher = MqttDispatcher::new(Duration::from_secs(10));
        let failure = dispatcher
            .publish(
                &json!({"host": "127.0.0.1", "port": port, "topic": "t", "qos": 1, "timeout_ms": 200}),
                &Payload::new(json!({})),
            )
            .await
            .unwrap_err();

        assert_eq!(failure.kind, DispatchFailureKind::Timeout);
        holder.abort();
    }
}
