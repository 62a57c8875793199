use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::ToSql;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use serde_json::Value;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::codec::{decode, encode};
use super::{Trace, TraceSelector, TraceStore, TraceUpdate};

const TRACE_COLUMNS: &str = "id, agent_id, run_id, status, grade, feedback, evaluator, \
                             trace_url, input, output, created_at";

/// SQLite-backed trace store.
///
/// Shares a database with [`SqliteAgentDirectory`](crate::agent::sqlite::SqliteAgentDirectory)
/// when given the same path.
pub struct SqliteTraceStore {
    conn: Mutex<Connection>,
}

impl SqliteTraceStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).context("failed to open trace database")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS agent_traces (
                id         TEXT PRIMARY KEY,
                agent_id   TEXT NOT NULL,
                run_id     TEXT NOT NULL,
                status     TEXT NOT NULL,
                grade      REAL,
                feedback   TEXT,
                evaluator  TEXT,
                trace_url  TEXT,
                input      TEXT,
                output     TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS agent_traces_agent_created
                ON agent_traces (agent_id, created_at);",
        )
        .context("failed to create trace table")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("trace database lock poisoned"))
    }

    fn fetch(conn: &Connection, id: &str) -> Result<Option<Trace>> {
        let sql = format!("SELECT {TRACE_COLUMNS} FROM agent_traces WHERE id = ?1");
        let row = conn
            .query_row(&sql, [id], TraceRow::from_row)
            .optional()
            .with_context(|| format!("failed to read trace {id}"))?;
        row.map(TraceRow::into_trace).transpose()
    }

    fn fetch_existing(conn: &Connection, id: &str) -> Result<Trace> {
        Self::fetch(conn, id)?.ok_or_else(|| anyhow!("trace not found: {id}"))
    }
}

#[async_trait]
impl TraceStore for SqliteTraceStore {
    async fn create_trace(&self, agent_id: &str, run_id: &str, input: &Value) -> Result<Trace> {
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO agent_traces (id, agent_id, run_id, status, input, created_at)
             VALUES (?1, ?2, ?3, 'pending', ?4, ?5)",
            params![id, agent_id, run_id, encode(input), created_at],
        )
        .context("failed to create trace")?;
        Self::fetch_existing(&conn, &id)
    }

    async fn update_trace_input(&self, id: &str, run_id: &str, input: &Value) -> Result<Trace> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE agent_traces
                 SET run_id = ?1, status = 'pending', input = ?2,
                     output = NULL, grade = NULL, feedback = NULL, evaluator = NULL
                 WHERE id = ?3",
                params![run_id, encode(input), id],
            )
            .with_context(|| format!("failed to update input of trace {id}"))?;
        if changed == 0 {
            return Err(anyhow!("trace not found: {id}"));
        }
        Self::fetch_existing(&conn, id)
    }

    async fn complete_trace(&self, id: &str, update: TraceUpdate) -> Result<Trace> {
        if update.is_empty() {
            let conn = self.conn()?;
            return Self::fetch_existing(&conn, id);
        }

        let mut assignments: Vec<&str> = Vec::new();
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(status) = update.status {
            assignments.push("status = ?");
            values.push(Box::new(status.as_str()));
        }
        if let Some(grade) = update.grade {
            assignments.push("grade = ?");
            values.push(Box::new(grade));
        }
        if let Some(feedback) = update.feedback {
            assignments.push("feedback = ?");
            values.push(Box::new(feedback));
        }
        if let Some(evaluator) = update.evaluator {
            assignments.push("evaluator = ?");
            values.push(Box::new(evaluator));
        }
        if let Some(trace_url) = update.trace_url {
            assignments.push("trace_url = ?");
            values.push(Box::new(trace_url));
        }
        if let Some(output) = update.output {
            assignments.push("output = ?");
            values.push(Box::new(encode(&output)));
        }

        let sql = format!(
            "UPDATE agent_traces SET {} WHERE id = ?",
            assignments.join(", ")
        );
        values.push(Box::new(id.to_string()));
        let conn = self.conn()?;
        let changed = conn
            .execute(&sql, params_from_iter(values.iter()))
            .with_context(|| format!("failed to update trace {id}"))?;
        if changed == 0 {
            return Err(anyhow!("trace not found: {id}"));
        }
        Self::fetch_existing(&conn, id)
    }

    async fn get_trace(&self, id: &str) -> Result<Option<Trace>> {
        let conn = self.conn()?;
        Self::fetch(&conn, id)
    }

    async fn find_trace_for_agent(
        &self,
        agent_id: &str,
        selector: &TraceSelector,
    ) -> Result<Option<Trace>> {
        let mut sql = format!("SELECT {TRACE_COLUMNS} FROM agent_traces WHERE agent_id = ?");
        let mut values: Vec<&str> = vec![agent_id];
        if let Some(trace_id) = &selector.trace_id {
            sql.push_str(" AND id = ?");
            values.push(trace_id);
        }
        if let Some(run_id) = &selector.run_id {
            sql.push_str(" AND run_id = ?");
            values.push(run_id);
        }
        sql.push_str(" ORDER BY created_at DESC, rowid DESC LIMIT 1");

        let conn = self.conn()?;
        let row = conn
            .query_row(&sql, params_from_iter(values), TraceRow::from_row)
            .optional()
            .context("failed to look up trace")?;
        row.map(TraceRow::into_trace).transpose()
    }

    async fn list_traces_for_agent(&self, agent_id: &str, take: usize) -> Result<Vec<Trace>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {TRACE_COLUMNS} FROM agent_traces WHERE agent_id = ?1
             ORDER BY created_at DESC, rowid DESC LIMIT ?2"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![agent_id, take as i64], TraceRow::from_row)?
            .collect::<Result<Vec<_>, _>>()
            .context("failed to list traces")?;
        rows.into_iter().map(TraceRow::into_trace).collect()
    }
}

/// A trace exactly as stored, payloads still in text form.
struct TraceRow {
    id: String,
    agent_id: String,
    run_id: String,
    status: String,
    grade: Option<f64>,
    feedback: Option<String>,
    evaluator: Option<String>,
    trace_url: Option<String>,
    input: Option<String>,
    output: Option<String>,
    created_at: String,
}

impl TraceRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            agent_id: row.get(1)?,
            run_id: row.get(2)?,
            status: row.get(3)?,
            grade: row.get(4)?,
            feedback: row.get(5)?,
            evaluator: row.get(6)?,
            trace_url: row.get(7)?,
            input: row.get(8)?,
            output: row.get(9)?,
            created_at: row.get(10)?,
        })
    }

    fn into_trace(self) -> Result<Trace> {
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .with_context(|| format!("trace {} has an invalid timestamp", self.id))?
            .with_timezone(&Utc);
        Ok(Trace {
            status: self.status.parse()?,
            input: decode(self.input.as_deref()),
            output: decode(self.output.as_deref()),
            id: self.id,
            agent_id: self.agent_id,
            run_id: self.run_id,
            grade: self.grade,
            feedback: self.feedback,
            evaluator: self.evaluator,
            trace_url: self.trace_url,
            created_at,
        })
    }
}
