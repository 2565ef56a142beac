//! History recorder
//!
//! Execution code emits records into a bounded channel and moves on; a
//! single writer task drains the channel into the history store. A slow or
//! failing store can delay or lose records but never affects a run's
//! outcome. When the queue is full new records are dropped and logged.

use crate::history::storage::HistoryStore;
use crate::history::types::{DeviceEventRecord, FlowRunRecord, FunctionRunRecord, IntegrationCallRecord};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

#[derive(Debug)]
pub enum HistoryEvent {
    DeviceUplink(DeviceEventRecord),
    FunctionRun(FunctionRunRecord),
    IntegrationCall(IntegrationCallRecord),
    FlowRun(FlowRunRecord),
    /// Acknowledged once every event sent before it has been handled
    Flush(oneshot::Sender<()>),
}

/// Sending half of the history side channel
#[derive(Debug, Clone)]
pub struct HistoryRecorder {
    tx: mpsc::Sender<HistoryEvent>,
}

impl HistoryRecorder {
    /// Start the writer task over `store`, queueing at most `capacity` records
    ///
    /// The task ends once every recorder clone has been dropped and the
    /// channel is drained.
    pub fn spawn(
        store: Arc<dyn HistoryStore>,
        write_timeout: Duration,
        capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel(capacity.max(1));

        let writer = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                write_event(store.as_ref(), event, write_timeout).await;
            }
            tracing::debug!("📚 History writer stopped");
        });

        (Self { tx }, writer)
    }

    pub fn device_uplink(&self, record: DeviceEventRecord) {
        self.emit(HistoryEvent::DeviceUplink(record));
    }

    pub fn function_run(&self, record: FunctionRunRecord) {
        self.emit(HistoryEvent::FunctionRun(record));
    }

    pub fn integration_call(&self, record: IntegrationCallRecord) {
        self.emit(HistoryEvent::IntegrationCall(record));
    }

    pub fn flow_run(&self, record: FlowRunRecord) {
        self.emit(HistoryEvent::FlowRun(record));
    }

    /// Wait until everything emitted so far has been written or dropped
    ///
    /// Unlike records, a flush waits for queue space.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(HistoryEvent::Flush(ack)).await.is_ok() {
            let _ = done.await;
        }
    }

    fn emit(&self, event: HistoryEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::error!("❌ History queue is full, {} dropped", event.describe())
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                tracing::error!("❌ History writer is gone, {} dropped", event.describe())
            }
        }
    }
}

impl HistoryEvent {
    fn describe(&self) -> &'static str {
        match self {
            HistoryEvent::DeviceUplink(_) => "device event",
            HistoryEvent::FunctionRun(_) => "function run",
            HistoryEvent::IntegrationCall(_) => "integration call",
            HistoryEvent::FlowRun(_) => "flow run",
            HistoryEvent::Flush(_) => "flush",
        }
    }
}

async fn write_event(store: &dyn HistoryStore, event: HistoryEvent, write_timeout: Duration) {
    let event = match event {
        HistoryEvent::Flush(ack) => {
            let _ = ack.send(());
            return;
        }
        other => other,
    };

    // All store writes share async_trait's boxed future type
    let what = event.describe();
    let write = match &event {
        HistoryEvent::Flush(_) => return,
        HistoryEvent::DeviceUplink(record) => store.insert_device_event(record),
        HistoryEvent::FunctionRun(record) => store.insert_function_run(record),
        HistoryEvent::IntegrationCall(record) => store.insert_integration_call(record),
        HistoryEvent::FlowRun(record) => store.insert_flow_run(record),
    };

    match tokio::time::timeout(write_timeout, write).await {
        Ok(Ok(())) => tracing::debug!("💾 Recorded {}", what),
        Ok(Err(e)) => tracing::error!("❌ Failed to record {}: {}", what, e),
        Err(_) => tracing::error!("❌ Timed out recording {} after {:?}", what, write_timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::types::{FlowRunDetail, PurgeCounts};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Mutex;
    use uuid::Uuid;

    /// Remembers device events; refuses every other write
    #[derive(Default)]
    struct FlakyStore {
        events: Mutex<Vec<DeviceEventRecord>>,
    }

    #[async_trait]
    impl HistoryStore for FlakyStore {
        async fn insert_device_event(&self, record: &DeviceEventRecord) -> Result<()> {
            self.events.lock().unwrap().push(record.clone());
            Ok(())
        }
        async fn insert_function_run(&self, _record: &FunctionRunRecord) -> Result<()> {
            Err(anyhow!("disk full"))
        }
        async fn insert_integration_call(&self, _record: &IntegrationCallRecord) -> Result<()> {
            Err(anyhow!("disk full"))
        }
        async fn insert_flow_run(&self, _record: &FlowRunRecord) -> Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
        async fn flow_run_detail(&self, _flow_run_id: Uuid) -> Result<Option<FlowRunDetail>> {
            Ok(None)
        }
        async fn flow_runs(&self, _flow_id: &str, _limit: i64) -> Result<Vec<FlowRunRecord>> {
            Ok(vec![])
        }
        async fn device_events(&self, _device_id: &str) -> Result<Vec<DeviceEventRecord>> {
            Ok(self.events.lock().unwrap().clone())
        }
        async fn purge_older_than(&self, _retention_days: u32) -> Result<PurgeCounts> {
            Ok(PurgeCounts::default())
        }
    }

    fn device_event(device_id: &str) -> DeviceEventRecord {
        DeviceEventRecord {
            id: Uuid::new_v4(),
            device_id: device_id.to_string(),
            event: "uplink".to_string(),
            data: json!({"temperature": 20}),
            timestamp: Utc::now(),
        }
    }

    fn flow_run() -> FlowRunRecord {
        let now = Utc::now();
        FlowRunRecord {
            id: Uuid::new_v4(),
            flow_id: "flow".to_string(),
            status: crate::runtime::outcome::RunStatus::Success,
            trigger_source: "device_uplink".to_string(),
            source_id: None,
            execution_path: vec![],
            error_details: None,
            input_data: json!({}),
            output_data: json!({}),
            start_time: now,
            end_time: now,
            execution_time_ms: 0,
        }
    }

    #[tokio::test]
    async fn failing_and_hanging_writes_do_not_block_later_records() {
        let store = Arc::new(FlakyStore::default());
        let (recorder, _writer) = HistoryRecorder::spawn(store.clone(), Duration::from_millis(50), 64);

        let now = Utc::now();
        recorder.function_run(FunctionRunRecord {
            id: Uuid::new_v4(),
            flow_run_id: Uuid::new_v4(),
            flow_id: "flow".to_string(),
            function_id: "fn".to_string(),
            node_id: "f".to_string(),
            status: crate::history::types::NodeStatus::Success,
            input_data: json!({}),
            output_data: Some(json!({})),
            error_message: None,
            error_stack: None,
            start_time: now,
            end_time: now,
            execution_time_ms: 0,
        });
        recorder.flow_run(flow_run());
        recorder.device_uplink(device_event("dev-1"));
        recorder.flush().await;

        let events = store.device_events("dev-1").await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].device_id, "dev-1");
    }

    #[tokio::test]
    async fn writer_stops_when_recorders_are_dropped() {
        let store = Arc::new(FlakyStore::default());
        let (recorder, writer) = HistoryRecorder::spawn(store.clone(), Duration::from_secs(1), 64);
        recorder.device_uplink(device_event("dev-2"));
        drop(recorder);

        tokio::time::timeout(Duration::from_secs(1), writer).await.unwrap().unwrap();
        assert_eq!(store.device_events("dev-2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn full_queue_drops_records_instead_of_blocking() {
        let store = Arc::new(FlakyStore::default());
        let (recorder, _writer) = HistoryRecorder::spawn(store.clone(), Duration::from_millis(200), 1);

        // Writer is stuck on the hanging flow-run write
        recorder.flow_run(flow_run());
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = std::time::Instant::now();
        for _ in 0..3 {
            recorder.device_uplink(device_event("dev-3"));
        }
        assert!(started.elapsed() < Duration::from_millis(50));

        recorder.flush().await;
        assert_eq!(store.device_events("dev-3").await.unwrap().len(), 1);
    }
}
