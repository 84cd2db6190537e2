//! Board repository: board rows plus ordered membership.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::board::{Board, BoardMember};
use crate::error::{Error, Result};

use super::personas::parse_ts;
use super::{persistence_err, Database};

/// Repository for boards and their seats.
#[derive(Clone)]
pub struct BoardStore {
    db: Database,
}

impl BoardStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or update a board and rewrite its membership rows.
    pub fn save(&self, board: &Board) -> Result<()> {
        let metadata = serde_json::to_string(&board.metadata)?;
        self.db.with_transaction(|tx| {
            tx.execute(
                "INSERT OR REPLACE INTO boards
                 (id, name, description, is_template, metadata, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    board.id,
                    board.name,
                    board.description,
                    board.is_template,
                    metadata,
                    board.created_at.to_rfc3339(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(persistence_err)?;

            tx.execute("DELETE FROM board_personas WHERE board_id = ?1", [&board.id])
                .map_err(persistence_err)?;
            for member in &board.members {
                tx.execute(
                    "INSERT INTO board_personas (board_id, persona_id, role, position, added_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        board.id,
                        member.persona_id,
                        member.role,
                        member.position,
                        Utc::now().to_rfc3339(),
                    ],
                )
                .map_err(persistence_err)?;
            }
            Ok(())
        })
    }

    /// Load a board with its seats in order.
    pub fn load(&self, id: &str) -> Result<Board> {
        let row = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, name, description, is_template, metadata, created_at, updated_at
                 FROM boards WHERE id = ?1",
                [id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, bool>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()
            .map_err(persistence_err)
        })?;

        let (id, name, description, is_template, metadata, created_at, updated_at) =
            row.ok_or(Error::NotFound {
                kind: "board",
                id: id.to_string(),
            })?;

        let members = self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT persona_id, role, position FROM board_personas
                     WHERE board_id = ?1 ORDER BY position ASC",
                )
                .map_err(persistence_err)?;
            let rows = stmt
                .query_map([&id], |row| {
                    Ok(BoardMember {
                        persona_id: row.get(0)?,
                        role: row.get(1)?,
                        position: row.get(2)?,
                    })
                })
                .map_err(persistence_err)?;
            let mut members = Vec::new();
            for row in rows {
                members.push(row.map_err(persistence_err)?);
            }
            Ok(members)
        })?;

        Ok(Board {
            id,
            name,
            description: description.unwrap_or_default(),
            is_template,
            members,
            metadata: metadata
                .and_then(|m| serde_json::from_str(&m).ok())
                .unwrap_or_default(),
            created_at: parse_ts(&created_at),
            updated_at: parse_ts(&updated_at),
        })
    }

    /// All boards: `(id, name, member_count)` ordered by recency.
    pub fn list(&self) -> Result<Vec<(String, String, usize)>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT b.id, b.name, COUNT(bp.persona_id)
                     FROM boards b
                     LEFT JOIN board_personas bp ON bp.board_id = b.id
                     GROUP BY b.id ORDER BY b.updated_at DESC",
                )
                .map_err(persistence_err)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)? as usize,
                    ))
                })
                .map_err(persistence_err)?;
            let mut boards = Vec::new();
            for row in rows {
                boards.push(row.map_err(persistence_err)?);
            }
            Ok(boards)
        })
    }

    pub fn delete(&self, id: &str) -> Result<bool> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute("DELETE FROM boards WHERE id = ?1", [id])
                .map_err(persistence_err)?;
            Ok(changed > 0)
        })
    }
}
