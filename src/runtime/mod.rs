//! Runtime Execution Engine
//!
//! Turns an uplink into flow runs: resolve the triggered flows, build each
//! flow's execution graph, walk it while invoking functions and dispatching
//! integrations, then aggregate and record the outcome.

use serde_json::{Map, Value};

// Execution graph builder on petgraph
pub mod graph;

// Device -> flow matching against the registry
pub mod resolver;

// Sandboxed Lua function invoker
pub mod sandbox;

// HTTP and MQTT integration dispatch
pub mod dispatch;

// Path-isolated breadth-first graph walker
pub mod walker;

// Run status aggregation
pub mod outcome;

// Entry point tying the pieces together for one uplink
pub mod engine;

pub use dispatch::{DispatchFailure, DispatchFailureKind, IntegrationDispatcher};
pub use engine::{FlowEngine, FlowRunOutcome, UplinkReport};
pub use graph::ExecutionGraph;
pub use outcome::{aggregate, NodeOutcome, RunStatus};
pub use resolver::FlowResolver;
pub use sandbox::{FunctionFailure, FunctionFailureKind, FunctionInvoker};
pub use walker::{GraphWalker, WalkReport};

/// Shallow merge: keys of `overlay` replace keys of `base`
///
/// Non-object values contribute nothing, so a null node config leaves the
/// base untouched.
pub(crate) fn overlay_config(base: &Value, overlay: &Value) -> Value {
    let mut merged = match base {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    if let Value::Object(map) = overlay {
        for (key, value) in map {
            merged.insert(key.clone(), value.clone());
        }
    }
    Value::Object(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn overlay_replaces_top_level_keys_only() {
        let base = json!({"url": "http://a", "headers": {"x": "1"}, "method": "POST"});
        let overlay = json!({"headers": {"y": "2"}, "method": "PUT"});
        assert_eq!(
            overlay_config(&base, &overlay),
            json!({"url": "http://a", "headers": {"y": "2"}, "method": "PUT"})
        );
        assert_eq!(overlay_config(&base, &Value::Null), base);
        assert_eq!(overlay_config(&Value::Null, &Value::Null), json!({}));
    }
}
