//! Session repository: requests, session checkpoints, responses, insights.
//!
//! Requests are idempotent on their id: saving an already-known request is
//! a no-op, and the orchestrator returns the existing session instead of
//! running a new one.

use rusqlite::{params, OptionalExtension};

use crate::error::{Error, Result};
use crate::session::{AnalysisRequest, AnalysisSession, Insight, PersonaResponse};

use super::{persistence_err, Database};

/// Repository for analysis requests and sessions.
#[derive(Clone)]
pub struct SessionStore {
    db: Database,
}

impl SessionStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persist a request if it is new. Returns `false` when the request id
    /// was already recorded.
    pub fn save_request(&self, request: &AnalysisRequest) -> Result<bool> {
        let config = serde_json::to_string(&request.config)?;
        self.db.with_conn(|conn| {
            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO analysis_requests
                     (id, project_id, board_id, mode, config, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        request.request_id,
                        request.project_id,
                        request.board_id,
                        request.mode.as_str(),
                        config,
                        request.created_at.to_rfc3339(),
                    ],
                )
                .map_err(persistence_err)?;
            Ok(inserted > 0)
        })
    }

    /// Checkpoint the full session snapshot (status, results, error).
    pub fn save_session(&self, session: &AnalysisSession) -> Result<()> {
        let results = serde_json::to_string(session)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO analysis_sessions
                 (id, request_id, project_id, board_id, mode, status, results_data,
                  error, created_at, started_at, completed_at, duration_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    session.session_id,
                    session.request_id,
                    session.project_id,
                    session.board_id,
                    session.mode.as_str(),
                    session.status.as_str(),
                    results,
                    session.error,
                    session.created_at.to_rfc3339(),
                    session.started_at.map(|t| t.to_rfc3339()),
                    session.completed_at.map(|t| t.to_rfc3339()),
                    session.duration_ms as i64,
                ],
            )
            .map_err(persistence_err)?;
            Ok(())
        })
    }

    /// Load a session snapshot by id.
    pub fn load_session(&self, session_id: &str) -> Result<AnalysisSession> {
        let data = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT results_data FROM analysis_sessions WHERE id = ?1",
                [session_id],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(persistence_err)
        })?;
        let data = data.ok_or(Error::NotFound {
            kind: "session",
            id: session_id.to_string(),
        })?;
        Ok(serde_json::from_str(&data)?)
    }

    /// The session previously created for a request id, if any.
    pub fn find_by_request(&self, request_id: &str) -> Result<Option<AnalysisSession>> {
        let data = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT results_data FROM analysis_sessions
                 WHERE request_id = ?1 ORDER BY created_at DESC LIMIT 1",
                [request_id],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(persistence_err)
        })?;
        match data {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    /// Persist one accepted response row.
    pub fn save_response(&self, response: &PersonaResponse) -> Result<()> {
        let memories = serde_json::to_string(&response.memories_used)?;
        let influence = serde_json::to_string(&response.traits_influence)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO analysis_responses
                 (id, session_id, persona_id, response_content, reasoning, confidence,
                  emotional_tone, turn_order, round, memories_used, traits_influence,
                  tokens_used, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    response.id,
                    response.session_id,
                    response.persona_id,
                    response.content,
                    response.reasoning_tag,
                    response.confidence,
                    response.emotional_tone,
                    response.turn_order,
                    response.round,
                    memories,
                    influence,
                    response.tokens_used,
                    response.created_at.to_rfc3339(),
                ],
            )
            .map_err(persistence_err)?;
            Ok(())
        })
    }

    /// Persist one synthesized insight row.
    pub fn save_insight(&self, insight: &Insight) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO analysis_insights
                 (id, session_id, insight_text, persona_id, confidence, score, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, datetime('now'))",
                params![
                    insight.id,
                    insight.session_id,
                    insight.text,
                    insight.persona_id,
                    insight.confidence,
                    insight.score,
                ],
            )
            .map_err(persistence_err)?;
            Ok(())
        })
    }

    /// Count persisted responses for a session.
    pub fn response_count(&self, session_id: &str) -> Result<usize> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM analysis_responses WHERE session_id = ?1",
                    [session_id],
                    |row| row.get(0),
                )
                .map_err(persistence_err)?;
            Ok(count as usize)
        })
    }
}
