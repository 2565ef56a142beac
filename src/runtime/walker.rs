//! Graph walker
//!
//! Traversal of an execution graph from its trigger nodes. Every edge out of
//! a node starts its own path, and each path advances down its own edges as
//! soon as its current node finishes, without waiting for sibling paths.
//! Each path carries its own payload and visit trail, so nothing one path
//! does is visible to another. A path ends at a node without outgoing
//! edges, at a failed function or integration node, or when it would
//! revisit a node or exceed the depth bound.
//!
//! Results are reported in edge order (depth first), whatever order the
//! paths actually finish in.

use crate::history::recorder::HistoryRecorder;
use crate::history::types::{elapsed_ms, FunctionRunRecord, IntegrationCallRecord, NodeStatus, PathStatus, PathTrace};
use crate::flow::types::{Function, Integration, Payload};
use crate::runtime::dispatch::IntegrationDispatcher;
use crate::runtime::graph::{ExecutionGraph, GraphNode, NodeSpec};
use crate::runtime::outcome::NodeOutcome;
use crate::runtime::sandbox::FunctionInvoker;
use futures::future::{join_all, BoxFuture};
use petgraph::graph::NodeIndex;
use serde_json::{Map, Value};
use uuid::Uuid;

/// Everything a finished walk produced
#[derive(Debug, Clone, Default)]
pub struct WalkReport {
    /// One entry per function or integration execution
    pub outcomes: Vec<NodeOutcome>,
    /// One entry per completed path
    pub paths: Vec<PathTrace>,
    /// Terminal node id -> payload that reached it (last path wins)
    pub output_data: Map<String, Value>,
}

/// Head of one path
#[derive(Debug, Clone)]
struct Cursor {
    node: NodeIndex,
    payload: Payload,
    /// Nodes already visited on this path, in order
    trail: Vec<NodeIndex>,
}

#[derive(Debug, Default)]
struct Step {
    outcome: Option<NodeOutcome>,
    next: Vec<Cursor>,
    finished: Option<PathTrace>,
    output: Option<(String, Value)>,
}

pub struct GraphWalker {
    invoker: FunctionInvoker,
    dispatcher: IntegrationDispatcher,
    recorder: HistoryRecorder,
    max_path_depth: usize,
}

impl GraphWalker {
    pub fn new(
        invoker: FunctionInvoker,
        dispatcher: IntegrationDispatcher,
        recorder: HistoryRecorder,
        max_path_depth: usize,
    ) -> Self {
        Self {
            invoker,
            dispatcher,
            recorder,
            max_path_depth,
        }
    }

    /// Walk `graph` from the given trigger nodes with `payload`
    pub async fn walk(
        &self,
        graph: &ExecutionGraph,
        flow_run_id: Uuid,
        trigger_node_ids: &[String],
        payload: Payload,
    ) -> WalkReport {
        let heads: Vec<Cursor> = trigger_node_ids
            .iter()
            .filter_map(|id| graph.index_of(id))
            .map(|node| Cursor {
                node,
                payload: payload.clone(),
                trail: Vec::new(),
            })
            .collect();
        tracing::debug!("🔄 Flow run {}: starting {} paths", flow_run_id, heads.len());

        let branches = join_all(
            heads
                .into_iter()
                .map(|cursor| self.follow(graph, flow_run_id, cursor)),
        )
        .await;

        let mut report = WalkReport::default();
        for step in branches.into_iter().flatten() {
            report.outcomes.extend(step.outcome);
            report.paths.extend(step.finished);
            if let Some((node_id, value)) = step.output {
                report.output_data.insert(node_id, value);
            }
        }

        report
    }

    /// Run the path at `cursor` and every path forking from it
    ///
    /// Forks are followed concurrently. The returned steps list this node
    /// first, then each fork's steps in edge order.
    fn follow<'a>(&'a self, graph: &'a ExecutionGraph, flow_run_id: Uuid, cursor: Cursor) -> BoxFuture<'a, Vec<Step>> {
        Box::pin(async move {
            let mut step = self.step(graph, flow_run_id, cursor).await;
            let forks = std::mem::take(&mut step.next);

            let mut steps = vec![step];
            let branches = join_all(
                forks
                    .into_iter()
                    .map(|cursor| self.follow(graph, flow_run_id, cursor)),
            )
            .await;
            steps.extend(branches.into_iter().flatten());
            steps
        })
    }

    /// Execute the node under `cursor` and decide where its path goes next
    async fn step(&self, graph: &ExecutionGraph, flow_run_id: Uuid, cursor: Cursor) -> Step {
        let node = graph.node(cursor.node);

        if cursor.trail.contains(&cursor.node) {
            tracing::warn!(
                "🔁 Flow '{}' run {}: path revisits node '{}', cutting",
                graph.flow_id(),
                flow_run_id,
                node.id
            );
            return cut(graph, &cursor.trail, node, format!("revisited node '{}'", node.id));
        }
        if cursor.trail.len() >= self.max_path_depth {
            tracing::warn!(
                "📏 Flow '{}' run {}: path reached depth {} at node '{}', cutting",
                graph.flow_id(),
                flow_run_id,
                self.max_path_depth,
                node.id
            );
            return cut(
                graph,
                &cursor.trail,
                node,
                format!("path exceeded {} nodes", self.max_path_depth),
            );
        }

        let mut trail = cursor.trail;
        trail.push(cursor.node);

        let (outcome, forwarded) = match &node.spec {
            NodeSpec::Device | NodeSpec::Label => (None, Ok(cursor.payload)),
            NodeSpec::Function { function, node_config } => {
                self.run_function(graph, flow_run_id, node, function, node_config, cursor.payload)
                    .await
            }
            NodeSpec::Integration {
                integration,
                node_config,
            } => {
                self.run_integration(graph, flow_run_id, node, integration, node_config, cursor.payload)
                    .await
            }
        };

        let mut step = Step {
            outcome,
            ..Step::default()
        };
        match forwarded {
            Err(message) => {
                step.finished = Some(PathTrace {
                    nodes: node_ids(graph, &trail),
                    status: PathStatus::Error,
                    failed_node: Some(node.id.clone()),
                    error: Some(message),
                });
            }
            Ok(payload) => {
                let successors = graph.successors(cursor.node);
                if successors.is_empty() {
                    step.output = Some((node.id.clone(), payload.to_value()));
                    step.finished = Some(PathTrace {
                        nodes: node_ids(graph, &trail),
                        status: PathStatus::Success,
                        failed_node: None,
                        error: None,
                    });
                } else {
                    step.next = successors
                        .into_iter()
                        .map(|next| Cursor {
                            node: next,
                            payload: payload.clone(),
                            trail: trail.clone(),
                        })
                        .collect();
                }
            }
        }
        step
    }

    async fn run_function(
        &self,
        graph: &ExecutionGraph,
        flow_run_id: Uuid,
        node: &GraphNode,
        function: &Function,
        node_config: &Value,
        payload: Payload,
    ) -> (Option<NodeOutcome>, Result<Payload, String>) {
        tracing::debug!("🧠 Flow run {}: function node '{}'", flow_run_id, node.id);
        let invocation = self.invoker.invoke(function, node_config, &payload).await;

        let (status, output_data, error_message, error_stack) = match &invocation.result {
            Ok(output) => (NodeStatus::Success, Some(output.to_value()), None, None),
            Err(failure) => (
                NodeStatus::Error,
                None,
                Some(failure.to_string()),
                failure.stack.clone(),
            ),
        };
        self.recorder.function_run(FunctionRunRecord {
            id: Uuid::new_v4(),
            flow_run_id,
            flow_id: graph.flow_id().to_string(),
            function_id: function.id.clone(),
            node_id: node.id.clone(),
            status,
            input_data: payload.to_value(),
            output_data,
            error_message,
            error_stack,
            start_time: invocation.started_at,
            end_time: invocation.finished_at,
            execution_time_ms: elapsed_ms(invocation.started_at, invocation.finished_at),
        });

        let outcome = NodeOutcome {
            node_id: node.id.clone(),
            kind: node.kind(),
            succeeded: invocation.result.is_ok(),
        };
        (Some(outcome), invocation.result.map_err(|failure| failure.to_string()))
    }

    async fn run_integration(
        &self,
        graph: &ExecutionGraph,
        flow_run_id: Uuid,
        node: &GraphNode,
        integration: &Integration,
        node_config: &Value,
        payload: Payload,
    ) -> (Option<NodeOutcome>, Result<Payload, String>) {
        tracing::debug!("📤 Flow run {}: integration node '{}'", flow_run_id, node.id);
        let dispatched = self.dispatcher.dispatch(integration, node_config, &payload).await;

        let (status, response_data, error_message) = match &dispatched.result {
            Ok(response) => (NodeStatus::Success, Some(response.clone()), None),
            Err(failure) => (NodeStatus::Error, failure.detail.clone(), Some(failure.to_string())),
        };
        self.recorder.integration_call(IntegrationCallRecord {
            id: Uuid::new_v4(),
            flow_run_id,
            flow_id: graph.flow_id().to_string(),
            integration_id: integration.id.clone(),
            node_id: node.id.clone(),
            kind: integration.kind,
            status,
            input_data: payload.to_value(),
            response_data,
            error_message: error_message.clone(),
            start_time: dispatched.started_at,
            end_time: dispatched.finished_at,
            execution_time_ms: elapsed_ms(dispatched.started_at, dispatched.finished_at),
        });

        let outcome = NodeOutcome {
            node_id: node.id.clone(),
            kind: node.kind(),
            succeeded: dispatched.result.is_ok(),
        };
        // Integrations never transform the payload
        let forwarded = match error_message {
            Some(message) => Err(message),
            None => Ok(payload),
        };
        (Some(outcome), forwarded)
    }
}

fn cut(graph: &ExecutionGraph, trail: &[NodeIndex], node: &GraphNode, reason: String) -> Step {
    Step {
        finished: Some(PathTrace {
            nodes: node_ids(graph, trail),
            status: PathStatus::Cut,
            failed_node: Some(node.id.clone()),
            error: Some(reason),
        }),
        ..Step::default()
    }
}

fn node_ids(graph: &ExecutionGraph, trail: &[NodeIndex]) -> Vec<String> {
    trail.iter().map(|&index| graph.node(index).id.clone()).collect()
}
