//! Append-only interaction log.
//!
//! Every model call is recorded: inputs, outputs, timing, tokens, outcome.
//! Appends are best-effort and never fail the caller; a failed write is
//! retried once in the background, and repeated failure increments an
//! observable counter.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

use super::{persistence_err, Database};

/// Outcome of the model call an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutcome {
    Ok,
    /// The call succeeded only after transparent retries.
    Retried,
    Failed,
}

impl LogOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogOutcome::Ok => "ok",
            LogOutcome::Retried => "retried",
            LogOutcome::Failed => "failed",
        }
    }
}

impl std::str::FromStr for LogOutcome {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ok" => Ok(LogOutcome::Ok),
            "retried" => Ok(LogOutcome::Retried),
            "failed" => Ok(LogOutcome::Failed),
            other => Err(crate::error::Error::BadInput(format!(
                "unknown log outcome: {other}"
            ))),
        }
    }
}

/// One recorded model interaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionLogEntry {
    pub id: String,
    pub persona_id: Option<String>,
    pub session_id: Option<String>,
    pub prompt: String,
    pub system_message: String,
    pub response: String,
    pub model_name: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub tokens_used: u32,
    pub duration_ms: u64,
    pub context: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub outcome: LogOutcome,
}

/// Best-effort appender over the shared database.
pub struct InteractionLogger {
    db: Database,
    failed_appends: Arc<AtomicU64>,
    /// Delay before the single background retry.
    retry_delay: Duration,
}

impl InteractionLogger {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            failed_appends: Arc::new(AtomicU64::new(0)),
            retry_delay: Duration::from_millis(250),
        }
    }

    /// Append an entry without ever failing the caller. The write happens
    /// off the calling task; on failure it is retried once after a short
    /// delay, and a second failure only bumps the failure counter.
    pub fn append(&self, entry: InteractionLogEntry) {
        let db = self.db.clone();
        let failed = Arc::clone(&self.failed_appends);
        let retry_delay = self.retry_delay;

        tokio::spawn(async move {
            let first = db.run({
                let entry = entry.clone();
                move |conn| write_entry(conn, &entry)
            });
            if first.await.is_ok() {
                return;
            }
            log::warn!("interaction log append failed, retrying once id={}", entry.id);
            tokio::time::sleep(retry_delay).await;
            let second = db.run(move |conn| write_entry(conn, &entry));
            if second.await.is_err() {
                failed.fetch_add(1, Ordering::Relaxed);
                log::error!("interaction log append failed twice, dropping entry");
            }
        });
    }

    /// Synchronous append used where the caller wants the error.
    pub fn append_blocking(&self, entry: &InteractionLogEntry) -> Result<()> {
        self.db.with_conn(|conn| write_entry(conn, entry))
    }

    /// Number of entries dropped after the retry also failed.
    pub fn failed_appends(&self) -> u64 {
        self.failed_appends.load(Ordering::Relaxed)
    }

    /// Entries recorded for a persona within the trailing window.
    pub fn by_persona(&self, persona_id: &str, window: Duration) -> Result<Vec<InteractionLogEntry>> {
        let secs = window.as_secs() as i64;
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, persona_id, session_id, prompt, system_message, response,
                            model_name, temperature, max_tokens, tokens_used, duration_ms,
                            context_data, outcome, created_at
                     FROM interaction_logs
                     WHERE persona_id = ?1
                       AND created_at >= datetime('now', '-' || ?2 || ' seconds')
                     ORDER BY created_at DESC",
                )
                .map_err(persistence_err)?;
            let rows = stmt
                .query_map(params![persona_id, secs], row_to_entry)
                .map_err(persistence_err)?;
            collect_rows(rows)
        })
    }

    /// All entries for one session, oldest first.
    pub fn by_session(&self, session_id: &str) -> Result<Vec<InteractionLogEntry>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, persona_id, session_id, prompt, system_message, response,
                            model_name, temperature, max_tokens, tokens_used, duration_ms,
                            context_data, outcome, created_at
                     FROM interaction_logs
                     WHERE session_id = ?1
                     ORDER BY created_at ASC, id ASC",
                )
                .map_err(persistence_err)?;
            let rows = stmt
                .query_map(params![session_id], row_to_entry)
                .map_err(persistence_err)?;
            collect_rows(rows)
        })
    }
}

fn write_entry(conn: &rusqlite::Connection, entry: &InteractionLogEntry) -> Result<()> {
    let context = serde_json::to_string(&entry.context)?;
    conn.execute(
        "INSERT INTO interaction_logs
         (id, persona_id, session_id, prompt, system_message, response, model_name,
          temperature, max_tokens, tokens_used, duration_ms, context_data, outcome, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            entry.id,
            entry.persona_id,
            entry.session_id,
            entry.prompt,
            entry.system_message,
            entry.response,
            entry.model_name,
            entry.temperature,
            entry.max_tokens,
            entry.tokens_used,
            entry.duration_ms as i64,
            context,
            entry.outcome.as_str(),
            entry.created_at.to_rfc3339(),
        ],
    )
    .map_err(persistence_err)?;
    Ok(())
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<InteractionLogEntry> {
    let context_data: String = row.get(11)?;
    let outcome: String = row.get(12)?;
    let created_at: String = row.get(13)?;
    Ok(InteractionLogEntry {
        id: row.get(0)?,
        persona_id: row.get(1)?,
        session_id: row.get(2)?,
        prompt: row.get(3)?,
        system_message: row.get(4)?,
        response: row.get(5)?,
        model_name: row.get(6)?,
        temperature: row.get(7)?,
        max_tokens: row.get(8)?,
        tokens_used: row.get(9)?,
        duration_ms: row.get::<_, i64>(10)? as u64,
        context: serde_json::from_str(&context_data).unwrap_or_default(),
        outcome: outcome.parse().unwrap_or(LogOutcome::Ok),
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

fn collect_rows(
    rows: impl Iterator<Item = rusqlite::Result<InteractionLogEntry>>,
) -> Result<Vec<InteractionLogEntry>> {
    let mut entries = Vec::new();
    for row in rows {
        entries.push(row.map_err(persistence_err)?);
    }
    Ok(entries)
}

#[cfg(test)]
pub(crate) fn sample_entry(persona_id: &str, session_id: &str) -> InteractionLogEntry {
    InteractionLogEntry {
        id: uuid::Uuid::new_v4().to_string(),
        persona_id: Some(persona_id.to_string()),
        session_id: Some(session_id.to_string()),
        prompt: "prompt".into(),
        system_message: "system".into(),
        response: "response".into(),
        model_name: "mock-model".into(),
        temperature: 0.7,
        max_tokens: 500,
        tokens_used: 42,
        duration_ms: 12,
        context: HashMap::new(),
        created_at: Utc::now(),
        outcome: LogOutcome::Ok,
    }
}
