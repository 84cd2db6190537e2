//! # boardroom
//!
//! An AI advisory board engine. Convene a board of personas - parameterized
//! agents with persistent personality traits and private episodic memory -
//! around a topic, run a mode-specific analysis protocol (discussion,
//! simulation, analysis, comparison, evaluation, prediction) against a
//! language-model backend, and synthesize the per-persona responses into a
//! structured result.
//!
//! The engine is organized around a few pieces:
//!
//! - [`traits`] - base schema + overlay merge into immutable trait profiles
//! - [`memory`] - three-tier episodic memory with consolidation and decay
//! - [`llms`] - the `ModelBackend` contract, retry wrapper, and providers
//! - [`persona`] - the per-persona think pipeline
//! - [`orchestrator`] - board-level fan-out, mode protocols, synthesis
//! - [`session`] - analysis requests, responses, and the session lifecycle
//! - [`storage`] - SQLite persistence and the append-only interaction log

pub mod board;
pub mod config;
pub mod error;
pub mod llms;
pub mod memory;
pub mod orchestrator;
pub mod persona;
pub mod session;
pub mod storage;
pub mod traits;

pub use board::Board;
pub use config::Config;
pub use error::{Error, Result};
pub use llms::{BackendRegistry, ModelBackend, RetryBackend};
pub use memory::{MemoryEntry, MemoryKind, MemoryStore};
pub use orchestrator::{BoardOrchestrator, Project};
pub use persona::{Persona, ThinkingContext, ThinkingResult};
pub use session::{AnalysisMode, AnalysisRequest, AnalysisSession, SessionStatus};
pub use storage::Database;
pub use traits::{BaseSchema, TraitOverlay, TraitProfile};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
