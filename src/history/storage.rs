//! History store boundary
//!
//! One insert per record kind, plus the read side used by the inspection
//! endpoint and the retention purge used by the maintenance endpoint.

use crate::flow::types::IntegrationKind;
use crate::history::types::{
    DeviceEventRecord, FlowRunDetail, FlowRunRecord, FunctionRunRecord, IntegrationCallRecord,
    NodeStatus, PurgeCounts,
};
use crate::runtime::outcome::RunStatus;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::{sqlite::SqliteRow, sqlite::SqlitePool, Row};
use uuid::Uuid;

#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn insert_device_event(&self, record: &DeviceEventRecord) -> Result<()>;

    async fn insert_function_run(&self, record: &FunctionRunRecord) -> Result<()>;

    async fn insert_integration_call(&self, record: &IntegrationCallRecord) -> Result<()>;

    async fn insert_flow_run(&self, record: &FlowRunRecord) -> Result<()>;

    /// Flow-run record with its function/integration children
    async fn flow_run_detail(&self, flow_run_id: Uuid) -> Result<Option<FlowRunDetail>>;

    /// Flow runs of one flow, newest first
    async fn flow_runs(&self, flow_id: &str, limit: i64) -> Result<Vec<FlowRunRecord>>;

    async fn device_events(&self, device_id: &str) -> Result<Vec<DeviceEventRecord>>;

    /// Delete every history row older than `retention_days`
    async fn purge_older_than(&self, retention_days: u32) -> Result<PurgeCounts>;
}

/// SQLite-backed history store
#[derive(Debug, Clone)]
pub struct SqliteHistoryStore {
    pool: SqlitePool,
}

impl SqliteHistoryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn function_runs_for(&self, flow_run_id: Uuid) -> Result<Vec<FunctionRunRecord>> {
        let rows = sqlx::query("SELECT * FROM function_history WHERE flow_run_id = ? ORDER BY start_time, id")
            .bind(flow_run_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(function_run_from_row).collect()
    }

    async fn integration_calls_for(&self, flow_run_id: Uuid) -> Result<Vec<IntegrationCallRecord>> {
        let rows = sqlx::query("SELECT * FROM integration_history WHERE flow_run_id = ? ORDER BY start_time, id")
            .bind(flow_run_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(integration_call_from_row).collect()
    }
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn insert_device_event(&self, record: &DeviceEventRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO device_history (id, device_id, event, data, timestamp) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(&record.device_id)
        .bind(&record.event)
        .bind(serde_json::to_string(&record.data)?)
        .bind(timestamp(record.timestamp))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_function_run(&self, record: &FunctionRunRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO function_history (
                id, flow_run_id, flow_id, function_id, node_id, status,
                input_data, output_data, error_message, error_stack,
                start_time, end_time, execution_time_ms, timestamp
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.flow_run_id.to_string())
        .bind(&record.flow_id)
        .bind(&record.function_id)
        .bind(&record.node_id)
        .bind(record.status.as_str())
        .bind(serde_json::to_string(&record.input_data)?)
        .bind(optional_json(&record.output_data)?)
        .bind(&record.error_message)
        .bind(&record.error_stack)
        .bind(timestamp(record.start_time))
        .bind(timestamp(record.end_time))
        .bind(record.execution_time_ms)
        .bind(timestamp(record.end_time))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_integration_call(&self, record: &IntegrationCallRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO integration_history (
                id, flow_run_id, flow_id, integration_id, node_id, kind, status,
                input_data, response_data, error_message,
                start_time, end_time, execution_time_ms, timestamp
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.flow_run_id.to_string())
        .bind(&record.flow_id)
        .bind(&record.integration_id)
        .bind(&record.node_id)
        .bind(record.kind.as_str())
        .bind(record.status.as_str())
        .bind(serde_json::to_string(&record.input_data)?)
        .bind(optional_json(&record.response_data)?)
        .bind(&record.error_message)
        .bind(timestamp(record.start_time))
        .bind(timestamp(record.end_time))
        .bind(record.execution_time_ms)
        .bind(timestamp(record.end_time))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_flow_run(&self, record: &FlowRunRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO flow_history (
                id, flow_id, status, trigger_source, source_id, execution_path,
                error_details, input_data, output_data,
                start_time, end_time, execution_time_ms, timestamp
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(&record.flow_id)
        .bind(record.status.as_str())
        .bind(&record.trigger_source)
        .bind(&record.source_id)
        .bind(serde_json::to_string(&record.execution_path)?)
        .bind(&record.error_details)
        .bind(serde_json::to_string(&record.input_data)?)
        .bind(serde_json::to_string(&record.output_data)?)
        .bind(timestamp(record.start_time))
        .bind(timestamp(record.end_time))
        .bind(record.execution_time_ms)
        .bind(timestamp(record.end_time))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn flow_run_detail(&self, flow_run_id: Uuid) -> Result<Option<FlowRunDetail>> {
        let row = sqlx::query("SELECT * FROM flow_history WHERE id = ?")
            .bind(flow_run_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(FlowRunDetail {
            flow_run: flow_run_from_row(&row)?,
            function_runs: self.function_runs_for(flow_run_id).await?,
            integration_calls: self.integration_calls_for(flow_run_id).await?,
        }))
    }

    async fn flow_runs(&self, flow_id: &str, limit: i64) -> Result<Vec<FlowRunRecord>> {
        let rows = sqlx::query("SELECT * FROM flow_history WHERE flow_id = ? ORDER BY timestamp DESC LIMIT ?")
            .bind(flow_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(flow_run_from_row).collect()
    }

    async fn device_events(&self, device_id: &str) -> Result<Vec<DeviceEventRecord>> {
        let rows = sqlx::query("SELECT * FROM device_history WHERE device_id = ? ORDER BY timestamp")
            .bind(device_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let data: String = row.get("data");
                Ok(DeviceEventRecord {
                    id: parse_uuid(row, "id")?,
                    device_id: row.get("device_id"),
                    event: row.get("event"),
                    data: serde_json::from_str(&data)?,
                    timestamp: parse_timestamp(row, "timestamp")?,
                })
            })
            .collect()
    }

    async fn purge_older_than(&self, retention_days: u32) -> Result<PurgeCounts> {
        // Windows reaching past the representable range keep everything
        let cutoff = Utc::now()
            .checked_sub_signed(chrono::Duration::days(i64::from(retention_days)))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let cutoff = timestamp(cutoff);
        tracing::info!("🧹 Purging history older than {} ({} days)", cutoff, retention_days);

        let mut tx = self.pool.begin().await?;

        let device_history = sqlx::query(&purge_statement("device_history"))
            .bind(&cutoff)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let flow_history = sqlx::query(&purge_statement("flow_history"))
            .bind(&cutoff)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let function_history = sqlx::query(&purge_statement("function_history"))
            .bind(&cutoff)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let integration_history = sqlx::query(&purge_statement("integration_history"))
            .bind(&cutoff)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;

        Ok(PurgeCounts {
            device_history,
            flow_history,
            function_history,
            integration_history,
        })
    }
}

fn purge_statement(table: &str) -> String {
    format!("DELETE FROM {} WHERE timestamp < ?", table)
}

/// Fixed-width UTC timestamps so string comparison orders them correctly
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn optional_json(value: &Option<Value>) -> Result<Option<String>> {
    value
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(Into::into)
}

fn parse_uuid(row: &SqliteRow, column: &str) -> Result<Uuid> {
    let raw: String = row.get(column);
    Uuid::parse_str(&raw).map_err(|e| anyhow::anyhow!("Invalid uuid in column '{}': {}", column, e))
}

fn parse_timestamp(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    let raw: String = row.get(column);
    Ok(DateTime::parse_from_rfc3339(&raw)?.with_timezone(&Utc))
}

fn parse_json(row: &SqliteRow, column: &str) -> Result<Option<Value>> {
    let raw: Option<String> = row.get(column);
    raw.map(|text| serde_json::from_str(&text))
        .transpose()
        .map_err(Into::into)
}

fn function_run_from_row(row: &SqliteRow) -> Result<FunctionRunRecord> {
    let status: String = row.get("status");
    Ok(FunctionRunRecord {
        id: parse_uuid(row, "id")?,
        flow_run_id: parse_uuid(row, "flow_run_id")?,
        flow_id: row.get("flow_id"),
        function_id: row.get("function_id"),
        node_id: row.get("node_id"),
        status: NodeStatus::parse(&status),
        input_data: parse_json(row, "input_data")?.unwrap_or(Value::Null),
        output_data: parse_json(row, "output_data")?,
        error_message: row.get("error_message"),
        error_stack: row.get("error_stack"),
        start_time: parse_timestamp(row, "start_time")?,
        end_time: parse_timestamp(row, "end_time")?,
        execution_time_ms: row.get("execution_time_ms"),
    })
}

fn integration_call_from_row(row: &SqliteRow) -> Result<IntegrationCallRecord> {
    let status: String = row.get("status");
    let kind: String = row.get("kind");
    Ok(IntegrationCallRecord {
        id: parse_uuid(row, "id")?,
        flow_run_id: parse_uuid(row, "flow_run_id")?,
        flow_id: row.get("flow_id"),
        integration_id: row.get("integration_id"),
        node_id: row.get("node_id"),
        kind: IntegrationKind::parse(&kind)
            .ok_or_else(|| anyhow::anyhow!("Unknown integration kind '{}' in history", kind))?,
        status: NodeStatus::parse(&status),
        input_data: parse_json(row, "input_data")?.unwrap_or(Value::Null),
        response_data: parse_json(row, "response_data")?,
        error_message: row.get("error_message"),
        start_time: parse_timestamp(row, "start_time")?,
        end_time: parse_timestamp(row, "end_time")?,
        execution_time_ms: row.get("execution_time_ms"),
    })
}

fn flow_run_from_row(row: &SqliteRow) -> Result<FlowRunRecord> {
    let status: String = row.get("status");
    let execution_path: String = row.get("execution_path");
    Ok(FlowRunRecord {
        id: parse_uuid(row, "id")?,
        flow_id: row.get("flow_id"),
        status: RunStatus::parse(&status),
        trigger_source: row.get("trigger_source"),
        source_id: row.get("source_id"),
        execution_path: serde_json::from_str(&execution_path)?,
        error_details: row.get("error_details"),
        input_data: parse_json(row, "input_data")?.unwrap_or(Value::Null),
        output_data: parse_json(row, "output_data")?.unwrap_or(Value::Null),
        start_time: parse_timestamp(row, "start_time")?,
        end_time: parse_timestamp(row, "end_time")?,
        execution_time_ms: row.get("execution_time_ms"),
    })
}
