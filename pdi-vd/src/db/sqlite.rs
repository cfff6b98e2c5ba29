//! SQLite result store
//!
//! Every table is append-only with an AUTOINCREMENT sequence column, so
//! reads return records in the order they were written. Structured payloads
//! are stored as JSON text next to the columns used for filtering.

use super::ResultStore;
use crate::types::{AuditRecord, AuditStage, CategoryResult, FieldConflict, Verdict};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pdi_common::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

const POOL_SIZE: u32 = 8;
const BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Result store backed by a SQLite database
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a database file and ensure the schema exists
    pub async fn open(db_path: &Path) -> Result<Self> {
        let newly_created = !db_path.exists();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        // Concurrent category writers share the file; every pooled
        // connection gets the same pragmas
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path.display()))?
            .create_if_missing(true)
            .busy_timeout(BUSY_TIMEOUT)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new()
            .max_connections(POOL_SIZE)
            .connect_with(options)
            .await?;

        if newly_created {
            info!("Initialized new database: {}", db_path.display());
        } else {
            info!("Opened existing database: {}", db_path.display());
        }

        Self::from_pool(pool).await
    }

    /// Wrap an existing pool and ensure the schema exists
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        create_tables(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Create tables (idempotent)
async fn create_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS category_results (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            request_id TEXT NOT NULL,
            category_id TEXT NOT NULL,
            data_quality_score REAL NOT NULL,
            insufficient_data INTEGER NOT NULL,
            result_json TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS field_conflicts (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            request_id TEXT NOT NULL,
            category TEXT NOT NULL,
            field_name TEXT NOT NULL,
            severity TEXT NOT NULL,
            unresolved INTEGER NOT NULL,
            conflict_json TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS verdicts (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            request_id TEXT NOT NULL,
            route TEXT NOT NULL,
            decision TEXT NOT NULL,
            confidence REAL NOT NULL,
            verdict_json TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audit_records (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            request_id TEXT NOT NULL,
            category TEXT,
            stage TEXT NOT NULL,
            actor TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            input_ref TEXT NOT NULL,
            output_ref TEXT NOT NULL,
            decision_reasoning TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_records_request ON audit_records(request_id)")
        .execute(pool)
        .await?;

    Ok(())
}

#[async_trait]
impl ResultStore for SqliteStore {
    async fn store_category_result(&self, result: &CategoryResult) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        insert_category_result(&mut conn, result).await
    }

    async fn store_conflicts(&self, request_id: Uuid, conflicts: &[FieldConflict]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        insert_conflicts(&mut tx, request_id, conflicts).await?;
        tx.commit().await?;

        Ok(())
    }

    async fn publish_category(&self, result: &CategoryResult) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        insert_conflicts(&mut tx, result.request_id, &result.conflicts).await?;
        insert_category_result(&mut tx, result).await?;
        tx.commit().await?;

        Ok(())
    }

    async fn store_verdict(&self, request_id: Uuid, verdict: &Verdict) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO verdicts (request_id, route, decision, confidence, verdict_json)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(request_id.to_string())
        .bind(verdict.route.to_string())
        .bind(verdict.decision.to_string())
        .bind(verdict.confidence)
        .bind(serde_json::to_string(verdict)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn append_audit(&self, records: &[AuditRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(
                r#"
                INSERT INTO audit_records
                    (request_id, category, stage, actor, timestamp, input_ref, output_ref, decision_reasoning)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(record.request_id.to_string())
            .bind(record.category.as_deref())
            .bind(record.stage.to_string())
            .bind(&record.actor)
            .bind(record.timestamp.to_rfc3339())
            .bind(&record.input_ref)
            .bind(&record.output_ref)
            .bind(&record.decision_reasoning)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    async fn audit_trail(&self, request_id: Uuid) -> Result<Vec<AuditRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT category, stage, actor, timestamp, input_ref, output_ref, decision_reasoning
            FROM audit_records
            WHERE request_id = ?
            ORDER BY seq
            "#,
        )
        .bind(request_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<AuditRecord> {
                let stage: String = row.get("stage");
                let timestamp: String = row.get("timestamp");
                Ok(AuditRecord {
                    request_id,
                    category: row.get("category"),
                    stage: serde_json::from_value::<AuditStage>(serde_json::Value::String(stage))?,
                    actor: row.get("actor"),
                    timestamp: parse_timestamp(&timestamp)?,
                    input_ref: row.get("input_ref"),
                    output_ref: row.get("output_ref"),
                    decision_reasoning: row.get("decision_reasoning"),
                })
            })
            .collect()
    }

    async fn category_results(&self, request_id: Uuid) -> Result<Vec<CategoryResult>> {
        let rows = sqlx::query(
            "SELECT result_json FROM category_results WHERE request_id = ? ORDER BY category_id, seq",
        )
        .bind(request_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<CategoryResult> {
                let json: String = row.get("result_json");
                Ok(serde_json::from_str(&json)?)
            })
            .collect()
    }

    async fn verdicts(&self, request_id: Uuid) -> Result<Vec<Verdict>> {
        let rows = sqlx::query("SELECT verdict_json FROM verdicts WHERE request_id = ? ORDER BY seq")
            .bind(request_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| -> Result<Verdict> {
                let json: String = row.get("verdict_json");
                Ok(serde_json::from_str(&json)?)
            })
            .collect()
    }
}

async fn insert_category_result(conn: &mut SqliteConnection, result: &CategoryResult) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO category_results (request_id, category_id, data_quality_score, insufficient_data, result_json)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(result.request_id.to_string())
    .bind(&result.category_id)
    .bind(result.data_quality_score)
    .bind(result.insufficient_data)
    .bind(serde_json::to_string(result)?)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn insert_conflicts(conn: &mut SqliteConnection, request_id: Uuid, conflicts: &[FieldConflict]) -> Result<()> {
    for conflict in conflicts {
        sqlx::query(
            r#"
            INSERT INTO field_conflicts (request_id, category, field_name, severity, unresolved, conflict_json)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(request_id.to_string())
        .bind(&conflict.category)
        .bind(&conflict.field_name)
        .bind(conflict.severity.to_string())
        .bind(conflict.unresolved)
        .bind(serde_json::to_string(conflict)?)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| pdi_common::Error::Internal(format!("invalid audit timestamp '{}': {}", value, e)))
}
