//! SQLite-backed autopilot record store.

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::store::{RecordStore, StoreError};
use super::types::{AutopilotRecord, CiStatus, PrStage};

const COLUMNS: &str = "pr_number, pr_url, stage, ci_status, last_error, branch, head_sha, \
    source_id, task_id, merge_attempts, consecutive_api_failures, review_submitted, \
    ci_wait_started_at, last_checked, release_tag, created_at, updated_at, fix_requested, \
    fix_issue";

/// SQLite-backed record store.
pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
}

impl SqliteRecordStore {
    /// Open (or create) the database file and its tables.
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|e| StoreError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn =
            Connection::open_in_memory().map_err(|e| StoreError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS autopilot_pr_state (
                pr_number INTEGER PRIMARY KEY,
                pr_url TEXT NOT NULL,
                stage TEXT NOT NULL,
                ci_status TEXT NOT NULL,
                last_error TEXT,
                branch TEXT NOT NULL,
                head_sha TEXT,
                source_id TEXT NOT NULL,
                task_id TEXT NOT NULL,
                merge_attempts INTEGER NOT NULL DEFAULT 0,
                consecutive_api_failures INTEGER NOT NULL DEFAULT 0,
                review_submitted INTEGER NOT NULL DEFAULT 0,
                ci_wait_started_at TEXT,
                last_checked TEXT,
                release_tag TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_autopilot_stage ON autopilot_pr_state(stage);
            "#,
        )
        .map_err(|e| StoreError::Database(e.to_string()))?;

        // Columns added after the first release; fails harmlessly when present.
        let _ = conn.execute(
            "ALTER TABLE autopilot_pr_state ADD COLUMN fix_requested INTEGER NOT NULL DEFAULT 0",
            [],
        );
        let _ = conn.execute("ALTER TABLE autopilot_pr_state ADD COLUMN fix_issue INTEGER", []);
        Ok(())
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<AutopilotRecord> {
        let pr_number: i64 = row.get(0)?;
        let stage: String = row.get(2)?;
        let ci_status: String = row.get(3)?;

        Ok(AutopilotRecord {
            pr_number: pr_number as u64,
            pr_url: row.get(1)?,
            stage: stage.parse().map_err(|e: String| conversion_error(2, e))?,
            ci_status: ci_status.parse().unwrap_or(CiStatus::Pending),
            last_error: row.get(4)?,
            branch: row.get(5)?,
            head_sha: row.get(6)?,
            source_id: row.get(7)?,
            task_id: row.get(8)?,
            merge_attempts: row.get(9)?,
            consecutive_api_failures: row.get(10)?,
            review_submitted: row.get(11)?,
            ci_wait_started_at: parse_optional_time(row.get(12)?),
            last_checked: parse_optional_time(row.get(13)?),
            release_tag: row.get(14)?,
            created_at: parse_time(&row.get::<_, String>(15)?),
            updated_at: parse_time(&row.get::<_, String>(16)?),
            fix_requested: row.get(17)?,
            fix_issue: row.get::<_, Option<i64>>(18)?.map(|n| n as u64),
        })
    }
}

fn conversion_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        message.into(),
    )
}

fn parse_time(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_optional_time(value: Option<String>) -> Option<DateTime<Utc>> {
    value.and_then(|v| {
        DateTime::parse_from_rfc3339(&v)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    })
}

impl RecordStore for SqliteRecordStore {
    fn put(&self, record: &AutopilotRecord) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute(
            &format!(
                "INSERT INTO autopilot_pr_state ({}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, \
                    ?18, ?19) \
                 ON CONFLICT(pr_number) DO UPDATE SET \
                    pr_url = excluded.pr_url, \
                    stage = excluded.stage, \
                    ci_status = excluded.ci_status, \
                    last_error = excluded.last_error, \
                    branch = excluded.branch, \
                    head_sha = excluded.head_sha, \
                    source_id = excluded.source_id, \
                    task_id = excluded.task_id, \
                    merge_attempts = excluded.merge_attempts, \
                    consecutive_api_failures = excluded.consecutive_api_failures, \
                    review_submitted = excluded.review_submitted, \
                    ci_wait_started_at = excluded.ci_wait_started_at, \
                    last_checked = excluded.last_checked, \
                    release_tag = excluded.release_tag, \
                    updated_at = excluded.updated_at, \
                    fix_requested = excluded.fix_requested, \
                    fix_issue = excluded.fix_issue",
                COLUMNS
            ),
            params![
                record.pr_number as i64,
                record.pr_url,
                record.stage.as_str(),
                record.ci_status.as_str(),
                record.last_error,
                record.branch,
                record.head_sha,
                record.source_id,
                record.task_id,
                record.merge_attempts,
                record.consecutive_api_failures,
                record.review_submitted,
                record.ci_wait_started_at.map(|t| t.to_rfc3339()),
                record.last_checked.map(|t| t.to_rfc3339()),
                record.release_tag,
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
                record.fix_requested,
                record.fix_issue.map(|n| n as i64),
            ],
        )
        .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    fn get(&self, pr_number: u64) -> Result<Option<AutopilotRecord>, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.query_row(
            &format!(
                "SELECT {} FROM autopilot_pr_state WHERE pr_number = ?1",
                COLUMNS
            ),
            params![pr_number as i64],
            Self::row_to_record,
        )
        .optional()
        .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn list(&self) -> Result<Vec<AutopilotRecord>, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM autopilot_pr_state ORDER BY pr_number",
                COLUMNS
            ))
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let records = stmt
            .query_map([], Self::row_to_record)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(records)
    }

    fn delete(&self, pr_number: u64) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let rows = conn
            .execute(
                "DELETE FROM autopilot_pr_state WHERE pr_number = ?1",
                params![pr_number as i64],
            )
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(rows > 0)
    }
}
