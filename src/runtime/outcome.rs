//! Outcome aggregation
//!
//! Folds the per-node outcomes of a finished walk into one run status.

use crate::flow::types::NodeKind;
use serde::{Deserialize, Serialize};

/// Overall result of one flow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "partial")]
    PartialSuccess,
    #[serde(rename = "error")]
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::PartialSuccess => "partial",
            RunStatus::Error => "error",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "success" => RunStatus::Success,
            "partial" => RunStatus::PartialSuccess,
            _ => RunStatus::Error,
        }
    }
}

/// Outcome of executing one node once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeOutcome {
    pub node_id: String,
    pub kind: NodeKind,
    pub succeeded: bool,
}

/// Classify a completed walk
///
/// Only function and integration executions count. No counted execution is
/// trivially a success.
pub fn aggregate(outcomes: &[NodeOutcome]) -> RunStatus {
    let (succeeded, failed) = outcomes
        .iter()
        .filter(|outcome| matches!(outcome.kind, NodeKind::Function | NodeKind::Integration))
        .fold((0usize, 0usize), |(ok, err), outcome| {
            if outcome.succeeded {
                (ok + 1, err)
            } else {
                (ok, err + 1)
            }
        });

    match (succeeded, failed) {
        (_, 0) => RunStatus::Success,
        (0, _) => RunStatus::Error,
        _ => RunStatus::PartialSuccess,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(node_id: &str, kind: NodeKind, succeeded: bool) -> NodeOutcome {
        NodeOutcome {
            node_id: node_id.to_string(),
            kind,
            succeeded,
        }
    }

    #[test]
    fn all_succeeding_is_success() {
        let outcomes = [
            outcome("f", NodeKind::Function, true),
            outcome("i", NodeKind::Integration, true),
        ];
        assert_eq!(aggregate(&outcomes), RunStatus::Success);
    }

    #[test]
    fn all_failing_is_error() {
        let outcomes = [
            outcome("f", NodeKind::Function, false),
            outcome("i", NodeKind::Integration, false),
        ];
        assert_eq!(aggregate(&outcomes), RunStatus::Error);
    }

    #[test]
    fn mix_is_partial_success_regardless_of_order() {
        let mut outcomes = vec![
            outcome("f1", NodeKind::Function, true),
            outcome("i1", NodeKind::Integration, true),
            outcome("f2", NodeKind::Function, true),
            outcome("i2", NodeKind::Integration, false),
        ];
        assert_eq!(aggregate(&outcomes), RunStatus::PartialSuccess);
        outcomes.reverse();
        assert_eq!(aggregate(&outcomes), RunStatus::PartialSuccess);
    }

    #[test]
    fn nothing_executable_is_success() {
        assert_eq!(aggregate(&[]), RunStatus::Success);
        assert_eq!(
            aggregate(&[outcome("d", NodeKind::Device, true), outcome("l", NodeKind::Label, true)]),
            RunStatus::Success
        );
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [RunStatus::Success, RunStatus::PartialSuccess, RunStatus::Error] {
            assert_eq!(RunStatus::parse(status.as_str()), status);
            let json = serde_json::to_value(status).unwrap();
            assert_eq!(json, serde_json::Value::String(status.as_str().to_string()));
        }
    }
}
