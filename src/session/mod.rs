//! Analysis sessions: request/response records and the session lifecycle.
//!
//! A session is one invocation of the orchestrator on a `(board, project,
//! mode)` tuple. Its status walks a small state machine whose terminal
//! states are sticky; every transition is checkpointed by the orchestrator.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Analysis mode
// ---------------------------------------------------------------------------

/// The protocol the orchestrator runs over the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    /// Round-robin conversation with convergence detection.
    Discussion,
    /// Parallel single-turn role play.
    Simulation,
    /// Parallel single-turn structured analysis.
    Analysis,
    /// Parallel single-turn comparison of named options.
    Comparison,
    /// Parallel single-turn scoring against a rubric.
    Evaluation,
    /// Parallel single-turn forecasting.
    Prediction,
}

impl AnalysisMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisMode::Discussion => "discussion",
            AnalysisMode::Simulation => "simulation",
            AnalysisMode::Analysis => "analysis",
            AnalysisMode::Comparison => "comparison",
            AnalysisMode::Evaluation => "evaluation",
            AnalysisMode::Prediction => "prediction",
        }
    }

    /// Whether personas respond concurrently rather than in rounds.
    pub fn is_parallel(&self) -> bool {
        !matches!(self, AnalysisMode::Discussion)
    }

    /// The focus tag personas think under, when the mode defines one.
    pub fn focus_tag(&self) -> Option<&'static str> {
        match self {
            AnalysisMode::Simulation => Some("simulation"),
            AnalysisMode::Analysis => Some("analysis"),
            AnalysisMode::Evaluation => Some("evaluation"),
            AnalysisMode::Prediction => Some("prediction"),
            AnalysisMode::Comparison | AnalysisMode::Discussion => None,
        }
    }
}

impl fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "discussion" => Ok(AnalysisMode::Discussion),
            "simulation" => Ok(AnalysisMode::Simulation),
            "analysis" => Ok(AnalysisMode::Analysis),
            "comparison" => Ok(AnalysisMode::Comparison),
            "evaluation" => Ok(AnalysisMode::Evaluation),
            "prediction" => Ok(AnalysisMode::Prediction),
            other => Err(Error::BadInput(format!("unknown analysis mode: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// A request to convene a board. Requests are idempotent on `request_id`:
/// re-submitting one returns the existing session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub request_id: String,
    pub project_id: String,
    pub board_id: String,
    pub mode: AnalysisMode,
    /// Mode-specific configuration (options, criteria, max_rounds, topic).
    #[serde(default)]
    pub config: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl AnalysisRequest {
    pub fn new(
        project_id: impl Into<String>,
        board_id: impl Into<String>,
        mode: AnalysisMode,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            project_id: project_id.into(),
            board_id: board_id.into(),
            mode,
            config: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Convenience accessor for string-valued config keys.
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }

    pub fn config_usize(&self, key: &str) -> Option<usize> {
        self.config.get(key).and_then(Value::as_u64).map(|v| v as usize)
    }
}

// ---------------------------------------------------------------------------
// Status state machine
// ---------------------------------------------------------------------------

/// Lifecycle of an analysis session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal states are sticky.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Cancelled
        )
    }

    /// Whether the machine allows moving to `next`.
    pub fn can_transition(&self, next: SessionStatus) -> bool {
        match (self, next) {
            (SessionStatus::Pending, SessionStatus::Running) => true,
            // A session can fail or be cancelled before it starts.
            (SessionStatus::Pending, SessionStatus::Failed)
            | (SessionStatus::Pending, SessionStatus::Cancelled) => true,
            (SessionStatus::Running, SessionStatus::Completed)
            | (SessionStatus::Running, SessionStatus::Failed)
            | (SessionStatus::Running, SessionStatus::Cancelled) => true,
            _ => false,
        }
    }
}

impl FromStr for SessionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(SessionStatus::Pending),
            "running" => Ok(SessionStatus::Running),
            "completed" => Ok(SessionStatus::Completed),
            "failed" => Ok(SessionStatus::Failed),
            "cancelled" => Ok(SessionStatus::Cancelled),
            other => Err(Error::BadInput(format!("unknown session status: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Responses & synthesis records
// ---------------------------------------------------------------------------

/// One accepted persona turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaResponse {
    pub id: String,
    pub session_id: String,
    pub persona_id: String,
    pub content: String,
    /// "Logical", "Intuitive", or "Mixed".
    pub reasoning_tag: String,
    pub confidence: f64,
    pub emotional_tone: String,
    /// Acceptance order within the session: 0..k-1, gap-free.
    pub turn_order: u32,
    /// Discussion round this turn belongs to (0 for parallel modes).
    pub round: u32,
    pub memories_used: Vec<String>,
    pub traits_influence: HashMap<String, f64>,
    pub tokens_used: u32,
    pub created_at: DateTime<Utc>,
}

/// A synthesized insight attributed to a persona.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insight {
    pub id: String,
    pub session_id: String,
    pub text: String,
    pub persona_id: String,
    pub confidence: f64,
    /// Ranking score: confidence weighted by expertise relevance.
    pub score: f64,
}

/// Recommendations grouped under the persona that made them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaRecommendations {
    pub persona_id: String,
    pub items: Vec<String>,
}

/// Per-persona failure captured without aborting peers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaFailure {
    pub persona_id: String,
    pub error: String,
}

/// Aggregate numbers over the accepted responses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub response_count: usize,
    pub mean_confidence: f64,
    pub total_tokens: u64,
    pub total_duration_ms: u64,
    /// Set when confidence variance across the final round exceeds 0.25.
    pub divergent: bool,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// The full record of one orchestrator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSession {
    pub session_id: String,
    pub request_id: String,
    pub project_id: String,
    pub board_id: String,
    pub mode: AnalysisMode,
    pub status: SessionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub responses: Vec<PersonaResponse>,
    pub insights: Vec<Insight>,
    pub recommendations: Vec<PersonaRecommendations>,
    pub summary: String,
    pub metrics: SessionMetrics,
    pub failures: Vec<PersonaFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AnalysisSession {
    pub fn from_request(request: &AnalysisRequest) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            request_id: request.request_id.clone(),
            project_id: request.project_id.clone(),
            board_id: request.board_id.clone(),
            mode: request.mode,
            status: SessionStatus::Pending,
            started_at: None,
            completed_at: None,
            duration_ms: 0,
            responses: Vec::new(),
            insights: Vec::new(),
            recommendations: Vec::new(),
            summary: String::new(),
            metrics: SessionMetrics::default(),
            failures: Vec::new(),
            error: None,
            created_at: Utc::now(),
        }
    }

    /// Move the session to `next`, enforcing the state machine and
    /// stamping lifecycle timestamps.
    pub fn transition(&mut self, next: SessionStatus) -> Result<()> {
        if !self.status.can_transition(next) {
            return Err(Error::BadInput(format!(
                "invalid session transition {} -> {}",
                self.status.as_str(),
                next.as_str()
            )));
        }
        match next {
            SessionStatus::Running => self.started_at = Some(Utc::now()),
            _ if next.is_terminal() => {
                let finished = Utc::now();
                self.completed_at = Some(finished);
                if let Some(started) = self.started_at {
                    self.duration_ms = (finished - started).num_milliseconds().max(0) as u64;
                }
            }
            _ => {}
        }
        self.status = next;
        Ok(())
    }
}
