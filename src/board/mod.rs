//! Boards: ordered collections of personas.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One seat on a board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardMember {
    pub persona_id: String,
    /// Optional role tag ("devil's advocate", "chair", ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Seat order; turn order in sequential modes follows it.
    pub position: u32,
}

/// An ordered collection of personas convened around topics.
///
/// A board references personas by id; deleting a persona removes its seat
/// but never touches completed sessions' records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Board {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Template boards serve as blueprints and are never convened directly.
    pub is_template: bool,
    pub members: Vec<BoardMember>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Board {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: description.into(),
            is_template: false,
            members: Vec::new(),
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Seat a persona at the end of the board.
    pub fn add_member(&mut self, persona_id: impl Into<String>, role: Option<String>) {
        let position = self.members.len() as u32;
        self.members.push(BoardMember {
            persona_id: persona_id.into(),
            role,
            position,
        });
        self.updated_at = Utc::now();
    }

    /// Remove a persona's seat, compacting positions.
    pub fn remove_member(&mut self, persona_id: &str) -> bool {
        let before = self.members.len();
        self.members.retain(|m| m.persona_id != persona_id);
        let removed = self.members.len() != before;
        if removed {
            for (i, member) in self.members.iter_mut().enumerate() {
                member.position = i as u32;
            }
            self.updated_at = Utc::now();
        }
        removed
    }

    /// Persona ids in seat order.
    pub fn persona_ids(&self) -> Vec<String> {
        let mut members = self.members.clone();
        members.sort_by_key(|m| m.position);
        members.into_iter().map(|m| m.persona_id).collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
