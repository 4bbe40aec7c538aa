//! Tool invocation log.
//!
//! Records every tool call with its parameters, outcome, and timing. A call
//! is `pending` between `start` and `succeed`/`fail`; `duration_ms` is
//! derived from the two timestamps.

use rusqlite::{params, OptionalExtension, Row};

use crate::db::{unix_now, Database};
use crate::error::Result;

/// Lifecycle state of a logged tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCallStatus {
    Pending,
    Success,
    Error,
}

impl ToolCallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolCallStatus::Pending => "pending",
            ToolCallStatus::Success => "success",
            ToolCallStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ToolCallStatus::Pending),
            "success" => Some(ToolCallStatus::Success),
            "error" => Some(ToolCallStatus::Error),
            _ => None,
        }
    }
}

/// One row of the tool-call log.
#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    pub id: i64,
    pub name: String,
    pub parameters: Option<String>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub status: ToolCallStatus,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub duration_ms: Option<i64>,
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<ToolCallRecord> {
    let status: String = row.get(5)?;
    Ok(ToolCallRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        parameters: row.get(2)?,
        result: row.get(3)?,
        error: row.get(4)?,
        status: ToolCallStatus::parse(&status).unwrap_or(ToolCallStatus::Pending),
        started_at: row.get(6)?,
        completed_at: row.get(7)?,
        duration_ms: row.get(8)?,
    })
}

const SELECT_COLUMNS: &str =
    "id, name, parameters, result, error, status, started_at, completed_at, duration_ms";

/// Log of tool calls over the `tool_calls` table.
#[derive(Debug, Clone)]
pub struct ToolCallLog {
    db: Database,
}

impl ToolCallLog {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Begin a call; returns its id. Status starts as `pending`.
    pub fn start(&self, name: &str, parameters: Option<&str>) -> Result<i64> {
        self.db.with(|conn| {
            conn.execute(
                "INSERT INTO tool_calls (name, parameters, status, started_at)
                 VALUES (?1, ?2, 'pending', ?3)",
                params![name, parameters, unix_now()],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Mark a call successful.
    pub fn succeed(&self, id: i64, result: Option<&str>) -> Result<()> {
        self.finish(id, ToolCallStatus::Success, result, None)
    }

    /// Mark a call failed.
    pub fn fail(&self, id: i64, error: &str) -> Result<()> {
        self.finish(id, ToolCallStatus::Error, None, Some(error))
    }

    fn finish(
        &self,
        id: i64,
        status: ToolCallStatus,
        result: Option<&str>,
        error: Option<&str>,
    ) -> Result<()> {
        let completed = unix_now();
        self.db.with(|conn| {
            conn.execute(
                "UPDATE tool_calls
                 SET status = ?1, result = ?2, error = ?3, completed_at = ?4,
                     duration_ms = (?4 - started_at) * 1000
                 WHERE id = ?5",
                params![status.as_str(), result, error, completed, id],
            )
        })?;
        Ok(())
    }

    /// Record an already-completed call in one step.
    pub fn record(&self, name: &str, parameters: Option<&str>, result: Option<&str>) -> Result<i64> {
        let now = unix_now();
        self.db.with(|conn| {
            conn.execute(
                "INSERT INTO tool_calls
                     (name, parameters, result, status, started_at, completed_at, duration_ms)
                 VALUES (?1, ?2, ?3, 'success', ?4, ?4, 0)",
                params![name, parameters, result, now],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Fetch a call by id.
    pub fn get(&self, id: i64) -> Result<Option<ToolCallRecord>> {
        self.db.with(|conn| {
            conn.query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM tool_calls WHERE id = ?1"),
                params![id],
                row_to_record,
            )
            .optional()
        })
    }

    /// Most recent calls, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<ToolCallRecord>> {
        self.db.with(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM tool_calls
                 ORDER BY started_at DESC, id DESC LIMIT ?1"
            ))?;
            let rows = stmt.query_map(params![limit as i64], row_to_record)?;
            rows.collect()
        })
    }
}
