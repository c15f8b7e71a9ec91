/// SQLite persistence layer for workflows and execution records
///
/// Nodes and edges are stored as serde-encoded typed records and are decoded
/// and structurally validated on every read, so the engine never sees a
/// workflow that breaks the id/edge invariants.

use crate::error::StoreError;
use crate::workflow::types::{
    Edge, Execution, ExecutionStep, Item, Node, RunStatus, StepOutput, WebhookEndpoint, Workflow,
};
use crate::workflow::validate::validate_structure;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;

/// SQLite-backed store for workflows, executions, steps and webhook endpoints
///
/// Cheap to clone; every clone shares the same connection pool, so each
/// execution can hold its own handle.
#[derive(Debug, Clone)]
pub struct WorkflowStore {
    pool: SqlitePool,
}

impl WorkflowStore {
    /// Open (or create) the database at `database_url` and ensure the schema
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        let store = Self::new(pool);
        store.init_schema().await?;
        Ok(store)
    }

    /// Wrap an existing pool; call [`WorkflowStore::init_schema`] before use
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create tables and indexes. Safe to call multiple times.
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 0,
                nodes TEXT NOT NULL,
                edges TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL REFERENCES workflows(id) ON DELETE CASCADE,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                error TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS execution_steps (
                id TEXT PRIMARY KEY,
                execution_id TEXT NOT NULL REFERENCES executions(id) ON DELETE CASCADE,
                node_id TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                input TEXT NOT NULL,
                output TEXT,
                logs TEXT NOT NULL,
                error TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS webhook_endpoints (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL REFERENCES workflows(id) ON DELETE CASCADE,
                path TEXT NOT NULL,
                method TEXT NOT NULL,
                node_id TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_executions_workflow ON executions(workflow_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_steps_execution ON execution_steps(execution_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_webhooks_route ON webhook_endpoints(path, method)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ---------------------------------------------------------------------
    // Workflows
    // ---------------------------------------------------------------------

    /// Store a new workflow or update an existing one
    ///
    /// Uses UPSERT so create and update share one path; `created_at` is kept
    /// from the first insert.
    pub async fn save_workflow(&self, workflow: &Workflow) -> Result<(), StoreError> {
        let nodes = serde_json::to_string(&workflow.nodes)?;
        let edges = serde_json::to_string(&workflow.edges)?;

        sqlx::query(
            r#"
            INSERT INTO workflows (id, name, active, nodes, edges, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                active = excluded.active,
                nodes = excluded.nodes,
                edges = excluded.edges,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&workflow.id)
        .bind(&workflow.name)
        .bind(workflow.active)
        .bind(&nodes)
        .bind(&edges)
        .bind(workflow.created_at)
        .bind(workflow.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Retrieve a workflow by ID
    pub async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>, StoreError> {
        let row = sqlx::query("SELECT * FROM workflows WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| decode_workflow(&row)).transpose()
    }

    /// All workflows, most recently updated first
    pub async fn list_workflows(&self) -> Result<Vec<Workflow>, StoreError> {
        let rows = sqlx::query("SELECT * FROM workflows ORDER BY updated_at DESC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(decode_workflow).collect()
    }

    /// Like [`WorkflowStore::list_workflows`], but corrupt rows are logged and skipped
    pub async fn list_loadable_workflows(&self) -> Result<Vec<Workflow>, StoreError> {
        let rows = sqlx::query("SELECT * FROM workflows ORDER BY updated_at DESC")
            .fetch_all(&self.pool)
            .await?;

        let mut workflows = Vec::with_capacity(rows.len());
        for row in &rows {
            match decode_workflow(row) {
                Ok(workflow) => workflows.push(workflow),
                Err(e @ StoreError::Corrupt { .. }) => {
                    tracing::warn!("⚠️ Skipping stored workflow: {}", e)
                }
                Err(e) => return Err(e),
            }
        }
        Ok(workflows)
    }

    /// Delete a workflow and, by cascade, its executions, steps and endpoints
    pub async fn delete_workflow(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // ---------------------------------------------------------------------
    // Executions
    // ---------------------------------------------------------------------

    pub async fn create_execution(&self, execution: &Execution) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO executions (id, workflow_id, status, started_at, finished_at, error)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&execution.id)
        .bind(&execution.workflow_id)
        .bind(execution.status.as_str())
        .bind(execution.started_at)
        .bind(execution.finished_at)
        .bind(&execution.error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Move a running execution into a terminal state
    ///
    /// Terminal executions are never rewritten.
    pub async fn finish_execution(
        &self,
        id: &str,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE executions
            SET status = ?, finished_at = ?, error = ?
            WHERE id = ? AND status = 'running'
            "#,
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_execution(&self, id: &str) -> Result<Option<Execution>, StoreError> {
        let row = sqlx::query("SELECT * FROM executions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| decode_execution(&row)).transpose()
    }

    /// Executions newest first, optionally for one workflow
    pub async fn list_executions(
        &self,
        workflow_id: Option<&str>,
    ) -> Result<Vec<Execution>, StoreError> {
        let rows = match workflow_id {
            Some(workflow_id) => {
                sqlx::query(
                    "SELECT * FROM executions WHERE workflow_id = ? ORDER BY started_at DESC, rowid DESC",
                )
                .bind(workflow_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM executions ORDER BY started_at DESC, rowid DESC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.iter().map(decode_execution).collect()
    }

    // ---------------------------------------------------------------------
    // Steps
    // ---------------------------------------------------------------------

    pub async fn create_step(&self, step: &ExecutionStep) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO execution_steps
                (id, execution_id, node_id, status, started_at, finished_at, input, output, logs, error)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&step.id)
        .bind(&step.execution_id)
        .bind(&step.node_id)
        .bind(step.status.as_str())
        .bind(step.started_at)
        .bind(step.finished_at)
        .bind(serde_json::to_string(&step.input)?)
        .bind(step.output.as_ref().map(serde_json::to_string).transpose()?)
        .bind(serde_json::to_string(&step.logs)?)
        .bind(&step.error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Persist the terminal state of a step
    pub async fn finish_step(&self, step: &ExecutionStep) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE execution_steps
            SET status = ?, finished_at = ?, output = ?, logs = ?, error = ?
            WHERE id = ? AND status = 'running'
            "#,
        )
        .bind(step.status.as_str())
        .bind(step.finished_at)
        .bind(step.output.as_ref().map(serde_json::to_string).transpose()?)
        .bind(serde_json::to_string(&step.logs)?)
        .bind(&step.error)
        .bind(&step.id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Steps of one execution in traversal order
    pub async fn list_steps(&self, execution_id: &str) -> Result<Vec<ExecutionStep>, StoreError> {
        let rows = sqlx::query("SELECT * FROM execution_steps WHERE execution_id = ? ORDER BY rowid")
            .bind(execution_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(decode_step).collect()
    }

    // ---------------------------------------------------------------------
    // Webhook endpoints
    // ---------------------------------------------------------------------

    /// Replace every endpoint of a workflow in one transaction
    pub async fn replace_webhook_endpoints(
        &self,
        workflow_id: &str,
        endpoints: &[WebhookEndpoint],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM webhook_endpoints WHERE workflow_id = ?")
            .bind(workflow_id)
            .execute(&mut *tx)
            .await?;

        for endpoint in endpoints {
            sqlx::query(
                "INSERT INTO webhook_endpoints (id, workflow_id, path, method, node_id) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&endpoint.id)
            .bind(workflow_id)
            .bind(&endpoint.path)
            .bind(&endpoint.method)
            .bind(&endpoint.node_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn list_webhook_endpoints(
        &self,
        workflow_id: &str,
    ) -> Result<Vec<WebhookEndpoint>, StoreError> {
        let rows = sqlx::query("SELECT * FROM webhook_endpoints WHERE workflow_id = ? ORDER BY rowid")
            .bind(workflow_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(decode_endpoint).collect()
    }

    /// Exact (path, method) lookup; the earliest registered endpoint wins
    pub async fn find_webhook_endpoint(
        &self,
        path: &str,
        method: &str,
    ) -> Result<Option<WebhookEndpoint>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM webhook_endpoints WHERE path = ? AND method = ? ORDER BY rowid LIMIT 1",
        )
        .bind(path)
        .bind(method)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| decode_endpoint(&row)).transpose()
    }
}

fn decode_json<T: DeserializeOwned>(
    table: &'static str,
    id: &str,
    column: &str,
    raw: &str,
) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Corrupt {
        table,
        id: id.to_string(),
        reason: format!("column '{}': {}", column, e),
    })
}

fn decode_status(table: &'static str, id: &str, raw: &str) -> Result<RunStatus, StoreError> {
    RunStatus::parse(raw).ok_or_else(|| StoreError::Corrupt {
        table,
        id: id.to_string(),
        reason: format!("unknown status '{}'", raw),
    })
}

fn decode_workflow(row: &SqliteRow) -> Result<Workflow, StoreError> {
    let id: String = row.try_get("id")?;
    let nodes_json: String = row.try_get("nodes")?;
    let edges_json: String = row.try_get("edges")?;
    let nodes: Vec<Node> = decode_json("workflows", &id, "nodes", &nodes_json)?;
    let edges: Vec<Edge> = decode_json("workflows", &id, "edges", &edges_json)?;

    let workflow = Workflow {
        name: row.try_get("name")?,
        active: row.try_get("active")?,
        nodes,
        edges,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
        id,
    };

    validate_structure(&workflow).map_err(|e| StoreError::Corrupt {
        table: "workflows",
        id: workflow.id.clone(),
        reason: e.to_string(),
    })?;

    Ok(workflow)
}

fn decode_execution(row: &SqliteRow) -> Result<Execution, StoreError> {
    let id: String = row.try_get("id")?;
    let status: String = row.try_get("status")?;

    Ok(Execution {
        status: decode_status("executions", &id, &status)?,
        workflow_id: row.try_get("workflow_id")?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        error: row.try_get("error")?,
        id,
    })
}

fn decode_step(row: &SqliteRow) -> Result<ExecutionStep, StoreError> {
    let id: String = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    let input: String = row.try_get("input")?;
    let output: Option<String> = row.try_get("output")?;
    let logs: String = row.try_get("logs")?;

    let input: Vec<Item> = decode_json("execution_steps", &id, "input", &input)?;
    let output: Option<StepOutput> = output
        .map(|raw| decode_json("execution_steps", &id, "output", &raw))
        .transpose()?;
    let logs: Vec<String> = decode_json("execution_steps", &id, "logs", &logs)?;

    Ok(ExecutionStep {
        status: decode_status("execution_steps", &id, &status)?,
        execution_id: row.try_get("execution_id")?,
        node_id: row.try_get("node_id")?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        input,
        output,
        logs,
        error: row.try_get("error")?,
        id,
    })
}

fn decode_endpoint(row: &SqliteRow) -> Result<WebhookEndpoint, StoreError> {
    Ok(WebhookEndpoint {
        id: row.try_get("id")?,
        workflow_id: row.try_get("workflow_id")?,
        path: row.try_get("path")?,
        method: row.try_get("method")?,
        node_id: row.try_get("node_id")?,
    })
}
