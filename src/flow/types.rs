//! Entity type definitions
//!
//! Devices, labels, functions, integrations and flow graph definitions as the
//! CRUD layer stores them, plus the uplink event and the payload threaded
//! through a run. Graph definitions use plain id cross-references; the
//! runtime rebuilds them into an in-memory graph per run.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// A physical device reporting uplinks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    /// Internal identifier referenced by flow nodes
    pub id: String,
    /// Hardware identifier reported by the network server (e.g. DevEUI)
    pub external_id: String,
    /// Human-readable device name
    pub name: String,
    /// Online/offline status as last reported
    #[serde(default)]
    pub status: DeviceStatus,
    /// Free-form metadata
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    #[default]
    Offline,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Online => "online",
            DeviceStatus::Offline => "offline",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "online" => DeviceStatus::Online,
            _ => DeviceStatus::Offline,
        }
    }
}

/// Named device grouping, many-to-many with devices
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Label {
    pub id: String,
    pub name: String,
}

/// A scripted transform
///
/// `code` is a Lua chunk. `parameters` declare the configuration keys the
/// script expects, `config` holds function-level values for them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    pub id: String,
    pub name: String,
    pub code: String,
    #[serde(default)]
    pub parameters: Vec<FunctionParameter>,
    #[serde(default)]
    pub config: Value,
}

/// Declared configuration parameter of a function
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionParameter {
    pub name: String,
    /// Informational type name ("number", "string", ...)
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
}

/// An external system payloads can be sent to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Integration {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: IntegrationKind,
    /// Kind-specific connection parameters (see `runtime::dispatch`)
    pub config: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrationKind {
    Http,
    Mqtt,
}

impl IntegrationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrationKind::Http => "http",
            IntegrationKind::Mqtt => "mqtt",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "http" => Some(IntegrationKind::Http),
            "mqtt" => Some(IntegrationKind::Mqtt),
            _ => None,
        }
    }
}

/// A stored automation graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    /// Unique flow identifier
    pub id: String,
    /// Human-readable flow name
    pub name: String,
    /// List of nodes in this flow
    #[serde(default)]
    pub nodes: Vec<FlowNode>,
    /// List of directed edges; order is the traversal tie-break
    #[serde(default)]
    pub edges: Vec<FlowEdge>,
}

/// A single node of a stored flow
///
/// `entity_id` references a device, label, function or integration depending
/// on `kind`. `config` is node-local configuration layered over the entity's.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowNode {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub entity_id: String,
    #[serde(default)]
    pub config: Value,
}

/// Node kinds a flow graph is built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Trigger on a specific device
    Device,
    /// Trigger on any device carrying the label
    Label,
    /// Scripted transform
    Function,
    /// HTTP or MQTT dispatch
    Integration,
}

impl NodeKind {
    /// Device and label nodes start runs and pass payloads through unchanged
    pub fn is_trigger(&self) -> bool {
        matches!(self, NodeKind::Device | NodeKind::Label)
    }
}

/// Directed connection between two nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowEdge {
    #[serde(alias = "from")]
    pub source: String,
    #[serde(alias = "to")]
    pub target: String,
}

/// Normalized uplink delivered by the ingestion boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Uplink {
    pub device_external_id: String,
    #[serde(default = "chrono::Utc::now")]
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub data: Map<String, Value>,
}

/// The data record threaded through a run
///
/// Payloads are shared immutably between paths. A function node produces a
/// new payload instead of editing the one it received.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload(Arc<Value>);

impl Payload {
    pub fn new(value: Value) -> Self {
        Self(Arc::new(value))
    }

    pub fn from_uplink(uplink: &Uplink) -> Self {
        Self::new(Value::Object(uplink.data.clone()))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Clone the inner value for storage or transport
    pub fn to_value(&self) -> Value {
        (*self.0).clone()
    }
}

impl Serialize for Payload {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nodes_deserialize_with_type_tag() {
        let node: FlowNode = serde_json::from_value(json!({
            "id": "n1",
            "type": "function",
            "entity_id": "fn-1"
        }))
        .unwrap();
        assert_eq!(node.kind, NodeKind::Function);
        assert!(node.config.is_null());
        assert!(!node.kind.is_trigger());
    }

    #[test]
    fn edges_accept_from_to_aliases() {
        let edge: FlowEdge = serde_json::from_value(json!({"from": "a", "to": "b"})).unwrap();
        assert_eq!(edge.source, "a");
        assert_eq!(edge.target, "b");
    }

    #[test]
    fn payload_clones_share_the_same_value() {
        let payload = Payload::new(json!({"temperature": 20}));
        let copy = payload.clone();
        assert!(Arc::ptr_eq(&payload.0, &copy.0));
        assert_eq!(serde_json::to_value(&copy).unwrap(), json!({"temperature": 20}));
    }
}
