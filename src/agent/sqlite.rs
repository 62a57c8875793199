use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use std::sync::{Mutex, MutexGuard};

use super::{Agent, AgentDirectory};

/// Agent directory backed by SQLite.
pub struct SqliteAgentDirectory {
    conn: Mutex<Connection>,
}

impl SqliteAgentDirectory {
    /// Open or create the agents table in the given database.
    /// Use `":memory:"` for tests.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).context("failed to open agent database")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS agents (
                id           TEXT PRIMARY KEY,
                name         TEXT NOT NULL,
                area         TEXT,
                instructions TEXT,
                model        TEXT
            )",
        )
        .context("failed to create agents table")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("agent database lock poisoned"))
    }

    /// Register or replace an agent.
    pub fn upsert(&self, agent: &Agent) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO agents (id, name, area, instructions, model) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                area = excluded.area,
                instructions = excluded.instructions,
                model = excluded.model",
            params![
                agent.id,
                agent.name,
                agent.area,
                agent.instructions,
                agent.model
            ],
        )
        .with_context(|| format!("failed to save agent {}", agent.id))?;
        Ok(())
    }
}

#[async_trait]
impl AgentDirectory for SqliteAgentDirectory {
    async fn get_agent(&self, id: &str) -> Result<Option<Agent>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, name, area, instructions, model FROM agents WHERE id = ?1",
            [id],
            |row| {
                Ok(Agent {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    area: row.get(2)?,
                    instructions: row.get(3)?,
                    model: row.get(4)?,
                })
            },
        )
        .optional()
        .with_context(|| format!("failed to read agent {id}"))
    }
}
