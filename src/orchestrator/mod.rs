//! The board orchestrator.
//!
//! Runs one analysis session over a board: fans persona pipelines out under
//! a bounded semaphore for parallel modes, runs rotated round-robin turns
//! for discussions, tolerates per-persona failures, checkpoints every state
//! transition, and synthesizes accepted responses into the session result.

pub mod modes;
pub mod synthesizer;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::board::Board;
use crate::config::{AnalysisConfig, MemoryConfig};
use crate::error::{Error, Result};
use crate::llms::SharedBackend;
use crate::memory::{FlushJob, FlushKind, PersistQueue};
use crate::persona::{ConversationTurn, Persona, ThinkingContext, ThinkingResult};
use crate::session::{
    AnalysisRequest, AnalysisSession, PersonaFailure, PersonaResponse, SessionStatus,
};
use crate::storage::{
    Database, InteractionLogEntry, InteractionLogger, LogOutcome, PersonaStore, SessionStore,
};

/// A persona shared with pipeline tasks. The mutex serializes the
/// persona's own memory writes across its invocations.
pub type SharedPersona = Arc<Mutex<Persona>>;

/// The project a session analyzes.
#[derive(Debug, Clone, Default)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub description: String,
    pub context: HashMap<String, Value>,
}

impl Project {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Self::default()
        }
    }
}

/// An accepted persona turn plus the pipeline by-products the synthesizer
/// consumes.
#[derive(Debug, Clone)]
pub struct AcceptedTurn {
    pub response: PersonaResponse,
    pub insights: Vec<String>,
    pub recommendations: Vec<String>,
    pub duration_ms: u64,
}

/// What a pipeline task reports back: the result and, on success, the
/// persona's exported memory for the persist queue.
type TaskOutcome = (String, Result<(ThinkingResult, Vec<u8>)>);

/// Orchestrates analysis sessions over boards of personas.
pub struct BoardOrchestrator {
    analysis: AnalysisConfig,
    memory: MemoryConfig,
    backend: SharedBackend,
    sessions: SessionStore,
    personas_repo: PersonaStore,
    logger: Arc<InteractionLogger>,
    semaphore: Arc<Semaphore>,
    queues: parking_lot::Mutex<HashMap<String, Arc<PersistQueue>>>,
}

impl BoardOrchestrator {
    pub fn new(
        analysis: AnalysisConfig,
        memory: MemoryConfig,
        backend: SharedBackend,
        db: Database,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(analysis.max_concurrent));
        Self {
            analysis,
            memory,
            backend,
            sessions: SessionStore::new(db.clone()),
            personas_repo: PersonaStore::new(db.clone()),
            logger: Arc::new(InteractionLogger::new(db)),
            semaphore,
            queues: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    pub fn logger(&self) -> &InteractionLogger {
        &self.logger
    }

    /// Run a session, loading the board's personas from the store.
    pub async fn run(
        &self,
        cancel: CancellationToken,
        request: AnalysisRequest,
        board: &Board,
        project: &Project,
    ) -> Result<AnalysisSession> {
        let mut personas = Vec::new();
        for persona_id in board.persona_ids() {
            let mut persona = self.personas_repo.load(&persona_id)?;
            persona.configure_memory(
                self.memory.short_term_limit,
                self.memory.long_term_limit,
                self.memory.decay_rate,
            );
            personas.push((persona_id, Arc::new(Mutex::new(persona))));
        }
        self.run_with_personas(cancel, request, board, project, personas)
            .await
    }

    /// Non-blocking submit: rejects immediately when every pipeline slot is
    /// taken instead of queueing behind running sessions.
    pub async fn try_run(
        &self,
        cancel: CancellationToken,
        request: AnalysisRequest,
        board: &Board,
        project: &Project,
    ) -> Result<AnalysisSession> {
        if self.semaphore.available_permits() == 0 {
            return Err(Error::Busy("all pipeline slots are in use".into()));
        }
        self.run(cancel, request, board, project).await
    }

    /// Run a session over already-materialized personas.
    pub async fn run_with_personas(
        &self,
        cancel: CancellationToken,
        request: AnalysisRequest,
        board: &Board,
        project: &Project,
        personas: Vec<(String, SharedPersona)>,
    ) -> Result<AnalysisSession> {
        // Re-issuing a request is a no-op returning the existing session.
        if let Some(existing) = self.sessions.find_by_request(&request.request_id)? {
            log::info!(
                "request already has a session request_id={} session_id={}",
                request.request_id,
                existing.session_id
            );
            return Ok(existing);
        }

        if board.is_empty() || personas.is_empty() {
            return Err(Error::BadInput("board has no personas".into()));
        }

        let topic = resolve_topic(&request, project);
        let prompt = modes::topic_prompt(&request, &topic)?;

        self.sessions.save_request(&request)?;
        let mut session = AnalysisSession::from_request(&request);
        self.sessions.save_session(&session)?;

        session.transition(SessionStatus::Running)?;
        self.sessions.save_session(&session)?;
        log::info!(
            "session started session_id={} mode={} personas={}",
            session.session_id,
            request.mode,
            personas.len()
        );

        let mut turns: Vec<AcceptedTurn> = Vec::new();
        let mut failures: Vec<PersonaFailure> = Vec::new();

        let deadline = Duration::from_secs(self.analysis.timeout_secs);
        let protocol = self.execute_protocol(
            &cancel,
            &request,
            board,
            project,
            &personas,
            &mut session,
            &mut turns,
            &mut failures,
            &topic,
            &prompt,
        );
        let outcome = tokio::select! {
            result = protocol => result,
            _ = tokio::time::sleep(deadline) => {
                cancel.cancel();
                Err(Error::DeadlineExceeded(format!(
                    "session exceeded {}s", self.analysis.timeout_secs
                )))
            }
        };

        session.failures = failures;
        match outcome {
            Ok(()) if turns.is_empty() => {
                let reason = session
                    .failures
                    .first()
                    .map(|f| f.error.clone())
                    .unwrap_or_else(|| "no responses accepted".into());
                session.error = Some(format!("all personas failed: {reason}"));
                session.transition(SessionStatus::Failed)?;
            }
            Ok(()) => {
                let expertise = collect_expertise(&personas).await;
                let names = collect_names(&personas).await;
                synthesizer::synthesize(&mut session, &turns, &expertise, &names, &topic);
                for insight in &session.insights {
                    self.sessions.save_insight(insight)?;
                }
                session.transition(SessionStatus::Completed)?;
            }
            Err(Error::Cancelled) => {
                session.error = Some("cancelled".into());
                session.transition(SessionStatus::Cancelled)?;
            }
            Err(Error::DeadlineExceeded(msg)) => {
                session.error = Some(format!("deadline exceeded: {msg}"));
                session.transition(SessionStatus::Failed)?;
            }
            Err(err) => {
                session.error = Some(err.to_string());
                session.transition(SessionStatus::Failed)?;
                self.sessions.save_session(&session)?;
                return Err(err);
            }
        }

        self.sessions.save_session(&session)?;
        log::info!(
            "session finished session_id={} status={} responses={}",
            session.session_id,
            session.status.as_str(),
            session.responses.len()
        );
        Ok(session)
    }

    // -----------------------------------------------------------------
    // Protocols
    // -----------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn execute_protocol(
        &self,
        cancel: &CancellationToken,
        request: &AnalysisRequest,
        board: &Board,
        project: &Project,
        personas: &[(String, SharedPersona)],
        session: &mut AnalysisSession,
        turns: &mut Vec<AcceptedTurn>,
        failures: &mut Vec<PersonaFailure>,
        topic: &str,
        prompt: &str,
    ) -> Result<()> {
        let base_context = ThinkingContext {
            topic: topic.to_string(),
            project_context: project.context.clone(),
            board_context: board.metadata.clone(),
            conversation_history: Vec::new(),
            emotional_state: String::new(),
            focus: request
                .mode
                .focus_tag()
                .map(str::to_string)
                .unwrap_or_default(),
        };

        if request.mode.is_parallel() {
            self.parallel_round(cancel, personas, session, turns, failures, prompt, &base_context)
                .await
        } else {
            self.discussion(
                cancel,
                request,
                personas,
                session,
                turns,
                failures,
                prompt,
                &base_context,
            )
            .await
        }
    }

    /// One parallel turn: every persona thinks concurrently under the
    /// pipeline semaphore; acceptance order assigns `turn_order`.
    #[allow(clippy::too_many_arguments)]
    async fn parallel_round(
        &self,
        cancel: &CancellationToken,
        personas: &[(String, SharedPersona)],
        session: &mut AnalysisSession,
        turns: &mut Vec<AcceptedTurn>,
        failures: &mut Vec<PersonaFailure>,
        prompt: &str,
        context: &ThinkingContext,
    ) -> Result<()> {
        let (tx, mut rx) = mpsc::channel::<TaskOutcome>(personas.len().max(1));

        for (persona_id, persona) in personas {
            let tx = tx.clone();
            let cancel = cancel.clone();
            let semaphore = Arc::clone(&self.semaphore);
            let backend = Arc::clone(&self.backend);
            let logger = Arc::clone(&self.logger);
            let persona = Arc::clone(persona);
            let persona_id = persona_id.clone();
            let session_id = session.session_id.clone();
            let prompt = prompt.to_string();
            let context = context.clone();

            tokio::spawn(async move {
                let result = tokio::select! {
                    _ = cancel.cancelled() => Err(Error::Cancelled),
                    result = async {
                        let _permit = semaphore
                            .acquire_owned()
                            .await
                            .map_err(|_| Error::Cancelled)?;
                        let mut persona = persona.lock().await;
                        let thought = persona
                            .think(
                                backend.as_ref(),
                                Some(logger.as_ref()),
                                Some(&session_id),
                                &prompt,
                                &context,
                            )
                            .await?;
                        let blob = persona.memory.export()?;
                        Ok((thought, blob))
                    } => result,
                };
                let _ = tx.send((persona_id, result)).await;
            });
        }
        drop(tx);

        let grace = Duration::from_millis(self.analysis.grace_period_ms);
        let mut cancelled_at: Option<Instant> = None;

        loop {
            let next = match cancelled_at {
                None => {
                    tokio::select! {
                        next = rx.recv() => next,
                        _ = cancel.cancelled() => {
                            cancelled_at = Some(Instant::now());
                            continue;
                        }
                    }
                }
                Some(at) => {
                    // Drain already-admitted tasks only for the grace window.
                    let remaining = grace.saturating_sub(at.elapsed());
                    match timeout(remaining, rx.recv()).await {
                        Ok(next) => next,
                        Err(_) => break,
                    }
                }
            };

            let Some((persona_id, result)) = next else {
                break;
            };
            self.handle_outcome(session, turns, failures, prompt, &persona_id, result, 0)?;
        }

        if cancelled_at.is_some() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Discussion rounds: sequential turns in seat order, rotated by one
    /// each round so nobody always speaks first. Runs at least two rounds,
    /// stopping early only once the last two rounds converge.
    #[allow(clippy::too_many_arguments)]
    async fn discussion(
        &self,
        cancel: &CancellationToken,
        request: &AnalysisRequest,
        personas: &[(String, SharedPersona)],
        session: &mut AnalysisSession,
        turns: &mut Vec<AcceptedTurn>,
        failures: &mut Vec<PersonaFailure>,
        prompt: &str,
        base_context: &ThinkingContext,
    ) -> Result<()> {
        let max_rounds = request
            .config_usize("max_rounds")
            .unwrap_or(self.analysis.max_rounds)
            .max(2);
        let count = personas.len();

        let mut conversation: Vec<ConversationTurn> = Vec::new();
        let mut round_texts: Vec<Vec<String>> = Vec::new();

        for round in 0..max_rounds {
            let mut texts: Vec<String> = Vec::new();

            for seat in 0..count {
                let (persona_id, persona) = &personas[(seat + round) % count];
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }

                let context = ThinkingContext {
                    conversation_history: conversation.clone(),
                    ..base_context.clone()
                };

                let result = tokio::select! {
                    _ = cancel.cancelled() => Err(Error::Cancelled),
                    result = async {
                        let mut persona = persona.lock().await;
                        let thought = persona
                            .think(
                                self.backend.as_ref(),
                                Some(self.logger.as_ref()),
                                Some(&session.session_id),
                                prompt,
                                &context,
                            )
                            .await?;
                        let blob = persona.memory.export()?;
                        Ok((thought, blob))
                    } => result,
                };

                match &result {
                    Ok((thought, _)) => {
                        let speaker = persona.lock().await.name.clone();
                        conversation.push(ConversationTurn {
                            speaker,
                            content: thought.content.clone(),
                            timestamp: chrono::Utc::now(),
                        });
                        texts.push(thought.content.clone());
                    }
                    Err(Error::Cancelled) => {
                        self.log_abandoned(session, prompt, persona_id);
                        failures.push(PersonaFailure {
                            persona_id: persona_id.clone(),
                            error: "cancelled".into(),
                        });
                        return Err(Error::Cancelled);
                    }
                    Err(_) => {}
                }
                self.handle_outcome(
                    session,
                    turns,
                    failures,
                    prompt,
                    persona_id,
                    result,
                    round as u32,
                )?;
            }

            round_texts.push(texts);
            if round >= 1 {
                let len = round_texts.len();
                if synthesizer::rounds_converged(&round_texts[len - 2], &round_texts[len - 1]) {
                    log::debug!(
                        "discussion converged session_id={} after_round={}",
                        session.session_id,
                        round + 1
                    );
                    break;
                }
            }
        }

        Ok(())
    }

    /// Fold one pipeline outcome into the session: accept and persist a
    /// response, or record the per-persona failure and continue.
    fn handle_outcome(
        &self,
        session: &mut AnalysisSession,
        turns: &mut Vec<AcceptedTurn>,
        failures: &mut Vec<PersonaFailure>,
        prompt: &str,
        persona_id: &str,
        result: Result<(ThinkingResult, Vec<u8>)>,
        round: u32,
    ) -> Result<()> {
        match result {
            Ok((thought, memory_blob)) => {
                let response = PersonaResponse {
                    id: Uuid::new_v4().to_string(),
                    session_id: session.session_id.clone(),
                    persona_id: persona_id.to_string(),
                    content: thought.content.clone(),
                    reasoning_tag: thought.reasoning_tag.clone(),
                    confidence: thought.confidence,
                    emotional_tone: thought.emotional_tone.clone(),
                    turn_order: session.responses.len() as u32,
                    round,
                    memories_used: thought.memories_used.clone(),
                    traits_influence: thought.traits_influence.clone(),
                    tokens_used: thought.tokens_used,
                    created_at: chrono::Utc::now(),
                };
                self.sessions.save_response(&response)?;

                let kind = if thought.insights.is_empty() {
                    FlushKind::Interaction
                } else {
                    FlushKind::Knowledge
                };
                self.queue_for(persona_id)
                    .push(FlushJob::new(persona_id, kind, memory_blob));

                turns.push(AcceptedTurn {
                    response: response.clone(),
                    insights: thought.insights,
                    recommendations: thought.recommendations,
                    duration_ms: thought.duration_ms,
                });
                session.responses.push(response);
            }
            Err(Error::Cancelled) => {
                // The pipeline never reached the backend (or was torn down
                // mid-flight); record the abandonment in the log ourselves.
                self.log_abandoned(session, prompt, persona_id);
                failures.push(PersonaFailure {
                    persona_id: persona_id.to_string(),
                    error: "cancelled".into(),
                });
            }
            Err(err) if err.is_structural() => return Err(err),
            Err(err) => {
                log::warn!(
                    "persona failed in session session_id={} persona_id={persona_id} error={err}",
                    session.session_id
                );
                if !failures.iter().any(|f| f.persona_id == persona_id) {
                    failures.push(PersonaFailure {
                        persona_id: persona_id.to_string(),
                        error: err.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Log entry for a turn the orchestrator abandoned before or during the
    /// backend call.
    fn log_abandoned(&self, session: &AnalysisSession, prompt: &str, persona_id: &str) {
        self.logger.append(InteractionLogEntry {
            id: Uuid::new_v4().to_string(),
            persona_id: Some(persona_id.to_string()),
            session_id: Some(session.session_id.clone()),
            prompt: prompt.to_string(),
            system_message: String::new(),
            response: "cancelled".into(),
            model_name: self.backend.model_info().name,
            temperature: 0.0,
            max_tokens: 0,
            tokens_used: 0,
            duration_ms: 0,
            context: HashMap::new(),
            created_at: chrono::Utc::now(),
            outcome: LogOutcome::Failed,
        });
    }

    /// The persist queue serializing one persona's memory flushes. Created
    /// lazily with a flusher task that drains it for the orchestrator's
    /// lifetime.
    fn queue_for(&self, persona_id: &str) -> Arc<PersistQueue> {
        let mut queues = self.queues.lock();
        queues
            .entry(persona_id.to_string())
            .or_insert_with(|| {
                let queue = Arc::new(PersistQueue::default());
                let repo = self.personas_repo.clone();
                let drain = Arc::clone(&queue);
                tokio::spawn(async move {
                    while let Some(job) = drain.pop().await {
                        if let Err(e) = repo.save_memory(&job.persona_id, &job.blob) {
                            log::warn!(
                                "memory flush failed persona_id={} error={e}",
                                job.persona_id
                            );
                        }
                    }
                });
                queue
            })
            .clone()
    }

    /// Close all persist queues; pending flushes still drain.
    pub fn shutdown(&self) {
        for queue in self.queues.lock().values() {
            queue.close();
        }
    }
}

fn resolve_topic(request: &AnalysisRequest, project: &Project) -> String {
    if let Some(topic) = request.config_str("topic") {
        return topic.to_string();
    }
    if !project.description.is_empty() {
        return project.description.clone();
    }
    project.name.clone()
}

async fn collect_expertise(
    personas: &[(String, SharedPersona)],
) -> HashMap<String, Vec<String>> {
    let mut expertise = HashMap::new();
    for (persona_id, persona) in personas {
        let persona = persona.lock().await;
        expertise.insert(persona_id.clone(), persona.traits.expertise_areas.clone());
    }
    expertise
}

async fn collect_names(personas: &[(String, SharedPersona)]) -> HashMap<String, String> {
    let mut names = HashMap::new();
    for (persona_id, persona) in personas {
        names.insert(persona_id.clone(), persona.lock().await.name.clone());
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llms::backend::testing::{MockBackend, Script};
    use crate::llms::RetryBackend;
    use crate::session::AnalysisMode;
    use crate::storage::test_db;

    fn board_of(ids: &[&str]) -> Board {
        let mut board = Board::new("Test board", "");
        for id in ids {
            board.add_member(*id, None);
        }
        board
    }

    fn personas_named(specs: &[(&str, &str, &str)]) -> Vec<(String, SharedPersona)> {
        specs
            .iter()
            .map(|(id, name, overlay)| {
                let persona = Persona::from_overlay_json(*id, *name, "an advisor", overlay).unwrap();
                (id.to_string(), Arc::new(Mutex::new(persona)))
            })
            .collect()
    }

    fn orchestrator(backend: SharedBackend) -> BoardOrchestrator {
        let analysis = AnalysisConfig {
            timeout_secs: 30,
            ..AnalysisConfig::default()
        };
        BoardOrchestrator::new(analysis, MemoryConfig::default(), backend, test_db())
    }

    fn request(mode: AnalysisMode) -> AnalysisRequest {
        let mut request = AnalysisRequest::new("proj", "board", mode);
        request
            .config
            .insert("topic".into(), serde_json::json!("our market entry plan"));
        request
    }

    fn project() -> Project {
        Project::new("proj", "Acme expansion")
    }

    const RICH_REPLY: &str = "The key insight is focus wins markets because attention compounds.\n\
                              What is our runway?\n\
                              I recommend entering one market first.";

    #[tokio::test]
    async fn test_discussion_happy_path() {
        // Three personas with distinct creativity/analytical mixes.
        let orch = orchestrator(Arc::new(MockBackend::ok(RICH_REPLY)));
        let personas = personas_named(&[
            ("p1", "Nova", r#"{"core_dimensions": {"creativity": 9, "analytical": 5}}"#),
            ("p2", "Rig", r#"{"core_dimensions": {"creativity": 5, "analytical": 9}}"#),
            ("p3", "Mid", r#"{"core_dimensions": {"creativity": 7, "analytical": 7}}"#),
        ]);
        let mut req = request(AnalysisMode::Discussion);
        req.config.insert("max_rounds".into(), serde_json::json!(2));
        let board = board_of(&["p1", "p2", "p3"]);

        let session = orch
            .run_with_personas(CancellationToken::new(), req, &board, &project(), personas)
            .await
            .unwrap();

        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.responses.len(), 6);
        let orders: Vec<u32> = session.responses.iter().map(|r| r.turn_order).collect();
        assert_eq!(orders, vec![0, 1, 2, 3, 4, 5]);
        assert!(!session.summary.is_empty());
        assert_eq!(session.metrics.response_count, 6);
        // Round 2 turns carry round index 1.
        assert_eq!(session.responses.iter().filter(|r| r.round == 1).count(), 3);
    }

    #[tokio::test]
    async fn test_discussion_round_two_sees_round_one() {
        // Each persona's round-2 prompt must include every round-1 response.
        // The mock echoes per-call content so the conversation is traceable
        // through each persona's stored memory of its own prompt.
        let backend = Arc::new(MockBackend::scripted(vec![
            Script::Ok("alpha point".into()),
            Script::Ok("beta point".into()),
            Script::Ok("gamma point".into()),
            Script::Ok("closing".into()),
        ]));
        let orch = orchestrator(backend);
        let personas = personas_named(&[
            ("p1", "Nova", "{}"),
            ("p2", "Rig", "{}"),
            ("p3", "Mid", "{}"),
        ]);
        let mut req = request(AnalysisMode::Discussion);
        req.config.insert("max_rounds".into(), serde_json::json!(2));
        let board = board_of(&["p1", "p2", "p3"]);

        let session = orch
            .run_with_personas(CancellationToken::new(), req, &board, &project(), personas.clone())
            .await
            .unwrap();
        assert_eq!(session.status, SessionStatus::Completed);

        // The persona that opened round 2 (rotation puts p2 first) stored a
        // question memory containing the original topic prompt; its logged
        // prompt for round 2 must contain all three round-1 responses.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let logs = orch.logger().by_session(&session.session_id).unwrap();
        let round2_logs: Vec<_> = logs
            .iter()
            .filter(|l| {
                l.prompt.contains("alpha point")
                    && l.prompt.contains("beta point")
                    && l.prompt.contains("gamma point")
            })
            .collect();
        // All three round-2 turns saw the full first round.
        assert_eq!(round2_logs.len(), 3);
    }

    #[tokio::test]
    async fn test_discussion_rotates_first_speaker() {
        let orch = orchestrator(Arc::new(MockBackend::ok("distinct words each round")));
        let personas = personas_named(&[
            ("p1", "Nova", "{}"),
            ("p2", "Rig", "{}"),
            ("p3", "Mid", "{}"),
        ]);
        let mut req = request(AnalysisMode::Discussion);
        req.config.insert("max_rounds".into(), serde_json::json!(2));
        let board = board_of(&["p1", "p2", "p3"]);

        let session = orch
            .run_with_personas(CancellationToken::new(), req, &board, &project(), personas)
            .await
            .unwrap();

        let round1: Vec<&str> = session
            .responses
            .iter()
            .filter(|r| r.round == 0)
            .map(|r| r.persona_id.as_str())
            .collect();
        let round2: Vec<&str> = session
            .responses
            .iter()
            .filter(|r| r.round == 1)
            .map(|r| r.persona_id.as_str())
            .collect();
        assert_eq!(round1, vec!["p1", "p2", "p3"]);
        assert_eq!(round2, vec!["p2", "p3", "p1"]);
    }

    #[tokio::test]
    async fn test_one_persona_fails_session_completes() {
        let mut mock = MockBackend::ok(RICH_REPLY);
        mock.fail_when_system_contains = Some(("Grump".into(), true));
        // No retries so the scripted 500 surfaces immediately.
        let backend = Arc::new(RetryBackend::new(
            Arc::new(mock),
            crate::config::RetryConfig {
                max_retries: 0,
                base_delay_ms: 1,
                max_delay_ms: 1,
                backoff_factor: 1.0,
            },
        ));
        let orch = orchestrator(backend);
        let personas = personas_named(&[
            ("p1", "Nova", "{}"),
            ("p2", "Grump", "{}"),
            ("p3", "Mid", "{}"),
        ]);
        let mut req = request(AnalysisMode::Discussion);
        req.config.insert("max_rounds".into(), serde_json::json!(2));
        let board = board_of(&["p1", "p2", "p3"]);

        let session = orch
            .run_with_personas(CancellationToken::new(), req, &board, &project(), personas)
            .await
            .unwrap();

        assert_eq!(session.status, SessionStatus::Completed);
        // Two healthy personas times two rounds.
        assert_eq!(session.responses.len(), 4);
        assert!(session.failures.iter().any(|f| f.persona_id == "p2"));
        // Mean confidence computed over accepted responses only.
        let expected: f64 = session.responses.iter().map(|r| r.confidence).sum::<f64>()
            / session.responses.len() as f64;
        assert!((session.metrics.mean_confidence - expected).abs() < 1e-9);
        // Gap-free turn order despite the failures.
        let orders: Vec<u32> = session.responses.iter().map(|r| r.turn_order).collect();
        assert_eq!(orders, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_all_personas_fail() {
        let orch = orchestrator(Arc::new(MockBackend::scripted(vec![Script::FatalError(
            "401 unauthorized".into(),
        )])));
        let personas = personas_named(&[("p1", "Nova", "{}"), ("p2", "Rig", "{}")]);
        let board = board_of(&["p1", "p2"]);

        let session = orch
            .run_with_personas(
                CancellationToken::new(),
                request(AnalysisMode::Analysis),
                &board,
                &project(),
                personas,
            )
            .await
            .unwrap();

        assert_eq!(session.status, SessionStatus::Failed);
        assert!(session.error.as_ref().unwrap().contains("backend error"));
        assert!(session.responses.is_empty());
        assert_eq!(session.failures.len(), 2);

        // Interaction log still records the failed calls.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let logs = orch.logger().by_session(&session.session_id).unwrap();
        assert_eq!(logs.len(), 2);
        assert!(logs.iter().all(|l| l.outcome == LogOutcome::Failed));
    }

    #[tokio::test]
    async fn test_parallel_mode_accepts_all() {
        let orch = orchestrator(Arc::new(MockBackend::ok(RICH_REPLY)));
        let personas = personas_named(&[
            ("p1", "Nova", "{}"),
            ("p2", "Rig", "{}"),
            ("p3", "Mid", "{}"),
        ]);
        let board = board_of(&["p1", "p2", "p3"]);

        let session = orch
            .run_with_personas(
                CancellationToken::new(),
                request(AnalysisMode::Simulation),
                &board,
                &project(),
                personas,
            )
            .await
            .unwrap();

        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.responses.len(), 3);
        let mut orders: Vec<u32> = session.responses.iter().map(|r| r.turn_order).collect();
        orders.sort_unstable();
        assert_eq!(orders, vec![0, 1, 2]);
        // Token accounting: session total equals the sum of responses.
        let sum: u64 = session.responses.iter().map(|r| r.tokens_used as u64).sum();
        assert_eq!(session.metrics.total_tokens, sum);
    }

    #[tokio::test]
    async fn test_cancellation_mid_flight() {
        // First call returns fast, the other four hang; cancelling after
        // the first acceptance leaves exactly one persisted response.
        let backend = Arc::new(MockBackend::scripted(vec![
            Script::Ok("quick reply".into()),
            Script::SlowOk("slow reply".into(), 30_000),
        ]));
        let orch = Arc::new(orchestrator(backend.clone()));
        let ids = ["p1", "p2", "p3", "p4", "p5"];
        let personas = personas_named(&[
            ("p1", "P1", "{}"),
            ("p2", "P2", "{}"),
            ("p3", "P3", "{}"),
            ("p4", "P4", "{}"),
            ("p5", "P5", "{}"),
        ]);
        let board = board_of(&ids);
        let cancel = CancellationToken::new();

        let handle = {
            let orch = Arc::clone(&orch);
            let cancel = cancel.clone();
            let personas = personas.clone();
            let board = board.clone();
            tokio::spawn(async move {
                orch.run_with_personas(
                    cancel,
                    request(AnalysisMode::Simulation),
                    &board,
                    &project(),
                    personas,
                )
                .await
            })
        };

        // Wait until every task has reached the backend, then a little
        // longer so the quick one is accepted.
        while backend.call_count() < 5 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();

        let session = handle.await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Cancelled);
        assert_eq!(session.responses.len(), 1);
        assert_eq!(session.responses[0].content, "quick reply");
        assert_eq!(session.failures.len(), 4);

        // All five personas appear in the interaction log; the abandoned
        // four carry a failed outcome.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let logs = orch.logger().by_session(&session.session_id).unwrap();
        assert_eq!(logs.len(), 5);
        assert_eq!(
            logs.iter().filter(|l| l.outcome == LogOutcome::Failed).count(),
            4
        );
    }

    #[tokio::test]
    async fn test_cancelled_personas_have_no_memory_writes() {
        let backend = Arc::new(MockBackend::scripted(vec![
            Script::Ok("quick reply with a key insight line".into()),
            Script::SlowOk("slow".into(), 30_000),
        ]));
        let orch = Arc::new(orchestrator(backend.clone()));
        let personas = personas_named(&[("p1", "A", "{}"), ("p2", "B", "{}"), ("p3", "C", "{}")]);
        let board = board_of(&["p1", "p2", "p3"]);
        let cancel = CancellationToken::new();

        let handle = {
            let orch = Arc::clone(&orch);
            let cancel = cancel.clone();
            let personas = personas.clone();
            let board = board.clone();
            tokio::spawn(async move {
                orch.run_with_personas(
                    cancel,
                    request(AnalysisMode::Analysis),
                    &board,
                    &project(),
                    personas,
                )
                .await
            })
        };

        while backend.call_count() < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        let session = handle.await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Cancelled);

        let mut wrote = 0;
        for (_, persona) in &personas {
            let persona = persona.lock().await;
            if !persona.memory.short_term.is_empty() {
                wrote += 1;
            }
        }
        // Only the persona whose think completed wrote memory.
        assert_eq!(wrote, 1);
    }

    #[tokio::test]
    async fn test_deadline_fails_session() {
        let backend = Arc::new(MockBackend::scripted(vec![Script::SlowOk(
            "late".into(),
            10_000,
        )]));
        let analysis = AnalysisConfig {
            timeout_secs: 1,
            ..AnalysisConfig::default()
        };
        let orch =
            BoardOrchestrator::new(analysis, MemoryConfig::default(), backend, test_db());
        let personas = personas_named(&[("p1", "Nova", "{}")]);
        let board = board_of(&["p1"]);

        let session = orch
            .run_with_personas(
                CancellationToken::new(),
                request(AnalysisMode::Analysis),
                &board,
                &project(),
                personas,
            )
            .await
            .unwrap();

        assert_eq!(session.status, SessionStatus::Failed);
        assert!(session.error.as_ref().unwrap().contains("deadline exceeded"));
    }

    #[tokio::test]
    async fn test_empty_board_rejected() {
        let orch = orchestrator(Arc::new(MockBackend::ok("x")));
        let board = Board::new("empty", "");

        let err = orch
            .run_with_personas(
                CancellationToken::new(),
                request(AnalysisMode::Analysis),
                &board,
                &project(),
                vec![],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BadInput(_)));
    }

    #[tokio::test]
    async fn test_request_idempotent() {
        let orch = orchestrator(Arc::new(MockBackend::ok(RICH_REPLY)));
        let personas = personas_named(&[("p1", "Nova", "{}")]);
        let board = board_of(&["p1"]);
        let req = request(AnalysisMode::Analysis);

        let first = orch
            .run_with_personas(
                CancellationToken::new(),
                req.clone(),
                &board,
                &project(),
                personas.clone(),
            )
            .await
            .unwrap();
        let second = orch
            .run_with_personas(CancellationToken::new(), req, &board, &project(), personas)
            .await
            .unwrap();

        assert_eq!(first.session_id, second.session_id);
        assert_eq!(second.responses.len(), first.responses.len());
    }

    #[tokio::test]
    async fn test_comparison_without_options_rejected() {
        let orch = orchestrator(Arc::new(MockBackend::ok("x")));
        let personas = personas_named(&[("p1", "Nova", "{}")]);
        let board = board_of(&["p1"]);

        let err = orch
            .run_with_personas(
                CancellationToken::new(),
                request(AnalysisMode::Comparison),
                &board,
                &project(),
                personas,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BadInput(_)));
    }

    #[tokio::test]
    async fn test_try_run_rejects_when_saturated() {
        let orch = orchestrator(Arc::new(MockBackend::ok("x")));
        let _permits = Arc::clone(&orch.semaphore)
            .acquire_many_owned(orch.analysis.max_concurrent as u32)
            .await
            .unwrap();
        let board = board_of(&["p1"]);

        let err = orch
            .try_run(
                CancellationToken::new(),
                request(AnalysisMode::Analysis),
                &board,
                &project(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Busy(_)));
    }

    #[tokio::test]
    async fn test_memory_flush_reaches_store() {
        let db = test_db();
        let repo = PersonaStore::new(db.clone());
        let persona = Persona::from_overlay_json("p1", "Nova", "", "{}").unwrap();
        repo.save(&persona).unwrap();

        let analysis = AnalysisConfig {
            timeout_secs: 30,
            ..AnalysisConfig::default()
        };
        let orch = BoardOrchestrator::new(
            analysis,
            MemoryConfig::default(),
            Arc::new(MockBackend::ok(RICH_REPLY)),
            db.clone(),
        );
        let board = board_of(&["p1"]);

        let session = orch
            .run(
                CancellationToken::new(),
                request(AnalysisMode::Analysis),
                &board,
                &project(),
            )
            .await
            .unwrap();
        assert_eq!(session.status, SessionStatus::Completed);

        // The flusher drains asynchronously.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let reloaded = repo.load("p1").unwrap();
        assert!(reloaded
            .memory
            .short_term
            .iter()
            .any(|e| e.content.starts_with("Question:")));
        orch.shutdown();
    }
}
