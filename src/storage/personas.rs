//! Persona repository: trait and memory blobs keyed by persona id.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::memory::MemoryStore;
use crate::persona::Persona;
use crate::traits::TraitProfile;

use super::{persistence_err, Database};

/// Row-level summary used by listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Repository for persona rows.
#[derive(Clone)]
pub struct PersonaStore {
    db: Database,
}

impl PersonaStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or update a persona, including its exported memory.
    pub fn save(&self, persona: &Persona) -> Result<()> {
        let traits = serde_json::to_string(&persona.traits)?;
        let memory = persona.memory.export()?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO personas
                 (id, name, description, traits_config, memory_data, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    persona.id,
                    persona.name,
                    persona.description,
                    traits,
                    String::from_utf8_lossy(&memory).into_owned(),
                    persona.created_at.to_rfc3339(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(persistence_err)?;
            Ok(())
        })
    }

    /// Persist just the memory blob for a persona (queue flush path).
    pub fn save_memory(&self, persona_id: &str, blob: &[u8]) -> Result<()> {
        let blob = String::from_utf8_lossy(blob).into_owned();
        let persona_id = persona_id.to_string();
        self.db.with_conn(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE personas SET memory_data = ?1, updated_at = ?2 WHERE id = ?3",
                    params![blob, Utc::now().to_rfc3339(), persona_id],
                )
                .map_err(persistence_err)?;
            if changed == 0 {
                return Err(Error::NotFound {
                    kind: "persona",
                    id: persona_id.clone(),
                });
            }
            Ok(())
        })
    }

    /// Load a persona, rebuilding traits and memory from their blobs. A
    /// corrupt memory blob degrades to empty memory with a warning rather
    /// than failing the load.
    pub fn load(&self, id: &str) -> Result<Persona> {
        let row = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, name, description, traits_config, memory_data, created_at, updated_at
                 FROM personas WHERE id = ?1",
                [id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()
            .map_err(persistence_err)
        })?;

        let (id, name, description, traits_json, memory_json, created_at, updated_at) =
            row.ok_or(Error::NotFound {
                kind: "persona",
                id: id.to_string(),
            })?;

        let traits: TraitProfile = serde_json::from_str(&traits_json)?;
        let mut memory = MemoryStore::new(id.clone());
        if let Some(blob) = memory_json {
            if !blob.is_empty() {
                if let Err(e) = memory.import(blob.as_bytes()) {
                    log::warn!(
                        "failed to import persona memory, starting empty persona_id={id} error={e}"
                    );
                }
            }
        }

        Ok(Persona::restore(
            id,
            name,
            description.unwrap_or_default(),
            traits,
            memory,
            parse_ts(&created_at),
            parse_ts(&updated_at),
        ))
    }

    /// All personas, most recently updated first.
    pub fn list(&self) -> Result<Vec<PersonaSummary>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, name, description, created_at, updated_at
                     FROM personas ORDER BY updated_at DESC",
                )
                .map_err(persistence_err)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(PersonaSummary {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        description: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                        created_at: parse_ts(&row.get::<_, String>(3)?),
                        updated_at: parse_ts(&row.get::<_, String>(4)?),
                    })
                })
                .map_err(persistence_err)?;
            let mut personas = Vec::new();
            for row in rows {
                personas.push(row.map_err(persistence_err)?);
            }
            Ok(personas)
        })
    }

    /// Delete a persona. Board membership cascades; interaction logs are
    /// retained for audit.
    pub fn delete(&self, id: &str) -> Result<bool> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute("DELETE FROM personas WHERE id = ?1", [id])
                .map_err(persistence_err)?;
            Ok(changed > 0)
        })
    }
}

pub(crate) fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
