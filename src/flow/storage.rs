//! Entity store boundary
//!
//! The engine only ever reads entities: a device by external id, its labels,
//! flow definitions, function bodies and integration parameters. Writes belong
//! to the CRUD layer; the `save_*` helpers on the SQLite store exist for that
//! layer and for seeding.

use crate::flow::types::{
    Device, DeviceStatus, Flow, Function, FunctionParameter, Integration, IntegrationKind, Label,
};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{sqlite::SqlitePool, Row};

/// Read-only view of the entity tables used during a run
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn device_by_external_id(&self, external_id: &str) -> Result<Option<Device>>;

    async fn device_label_ids(&self, device_id: &str) -> Result<Vec<String>>;

    async fn flow(&self, flow_id: &str) -> Result<Option<Flow>>;

    async fn list_flows(&self) -> Result<Vec<Flow>>;

    async fn function(&self, function_id: &str) -> Result<Option<Function>>;

    async fn integration(&self, integration_id: &str) -> Result<Option<Integration>>;
}

/// SQLite-backed entity store
#[derive(Debug, Clone)]
pub struct SqliteEntityStore {
    pool: SqlitePool,
}

impl SqliteEntityStore {
    /// Create new store over an initialized pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn save_device(&self, device: &Device) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO devices (id, external_id, name, status, metadata)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                external_id = excluded.external_id,
                name = excluded.name,
                status = excluded.status,
                metadata = excluded.metadata
            "#,
        )
        .bind(&device.id)
        .bind(&device.external_id)
        .bind(&device.name)
        .bind(device.status.as_str())
        .bind(serde_json::to_string(&device.metadata)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn save_label(&self, label: &Label) -> Result<()> {
        sqlx::query(
            "INSERT INTO labels (id, name) VALUES (?, ?) ON CONFLICT(id) DO UPDATE SET name = excluded.name",
        )
        .bind(&label.id)
        .bind(&label.name)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn attach_label(&self, device_id: &str, label_id: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO device_labels (device_id, label_id) VALUES (?, ?)")
            .bind(device_id)
            .bind(label_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn save_function(&self, function: &Function) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO functions (id, name, code, parameters, config)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                code = excluded.code,
                parameters = excluded.parameters,
                config = excluded.config
            "#,
        )
        .bind(&function.id)
        .bind(&function.name)
        .bind(&function.code)
        .bind(serde_json::to_string(&function.parameters)?)
        .bind(serde_json::to_string(&function.config)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn save_integration(&self, integration: &Integration) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO integrations (id, name, kind, config)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                kind = excluded.kind,
                config = excluded.config
            "#,
        )
        .bind(&integration.id)
        .bind(&integration.name)
        .bind(integration.kind.as_str())
        .bind(serde_json::to_string(&integration.config)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Store a new flow or update existing one
    ///
    /// Nodes and edges are kept together as one JSON definition.
    pub async fn save_flow(&self, flow: &Flow) -> Result<()> {
        let definition_json = serde_json::to_string(flow)?;

        sqlx::query(
            r#"
            INSERT INTO flows (id, name, definition, updated_at)
            VALUES (?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                definition = excluded.definition,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&flow.id)
        .bind(&flow.name)
        .bind(&definition_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn delete_flow(&self, flow_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM flows WHERE id = ?")
            .bind(flow_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl EntityStore for SqliteEntityStore {
    async fn device_by_external_id(&self, external_id: &str) -> Result<Option<Device>> {
        let row = sqlx::query(
            "SELECT id, external_id, name, status, metadata FROM devices WHERE external_id = ?",
        )
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let status: String = row.get("status");
                let metadata: String = row.get("metadata");
                Ok(Some(Device {
                    id: row.get("id"),
                    external_id: row.get("external_id"),
                    name: row.get("name"),
                    status: DeviceStatus::parse(&status),
                    metadata: serde_json::from_str(&metadata).unwrap_or(Value::Null),
                }))
            }
            None => Ok(None),
        }
    }

    async fn device_label_ids(&self, device_id: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT label_id FROM device_labels WHERE device_id = ? ORDER BY label_id",
        )
        .bind(device_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|row| row.get("label_id")).collect())
    }

    async fn flow(&self, flow_id: &str) -> Result<Option<Flow>> {
        let row = sqlx::query("SELECT definition FROM flows WHERE id = ?")
            .bind(flow_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let definition_json: String = row.get("definition");
                Ok(Some(serde_json::from_str(&definition_json)?))
            }
            None => Ok(None),
        }
    }

    async fn list_flows(&self) -> Result<Vec<Flow>> {
        let rows = sqlx::query("SELECT id, definition FROM flows ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        let mut flows = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            let definition_json: String = row.get("definition");
            match serde_json::from_str::<Flow>(&definition_json) {
                Ok(flow) => flows.push(flow),
                Err(e) => tracing::warn!("⚠️ Skipping flow '{}' with unreadable definition: {}", id, e),
            }
        }

        Ok(flows)
    }

    async fn function(&self, function_id: &str) -> Result<Option<Function>> {
        let row = sqlx::query("SELECT id, name, code, parameters, config FROM functions WHERE id = ?")
            .bind(function_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let parameters: String = row.get("parameters");
                let config: String = row.get("config");
                Ok(Some(Function {
                    id: row.get("id"),
                    name: row.get("name"),
                    code: row.get("code"),
                    parameters: serde_json::from_str::<Vec<FunctionParameter>>(&parameters)?,
                    config: serde_json::from_str(&config)?,
                }))
            }
            None => Ok(None),
        }
    }

    async fn integration(&self, integration_id: &str) -> Result<Option<Integration>> {
        let row = sqlx::query("SELECT id, name, kind, config FROM integrations WHERE id = ?")
            .bind(integration_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let kind: String = row.get("kind");
                let config: String = row.get("config");
                let kind = IntegrationKind::parse(&kind)
                    .ok_or_else(|| anyhow::anyhow!("Integration '{}' has unknown kind '{}'", integration_id, kind))?;
                Ok(Some(Integration {
                    id: row.get("id"),
                    name: row.get("name"),
                    kind,
                    config: serde_json::from_str(&config)?,
                }))
            }
            None => Ok(None),
        }
    }
}
