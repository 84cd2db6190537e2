//! Versioned schema migrations.
//!
//! Applied in order inside a transaction each; the `schema_migrations`
//! table records what has run. Referential integrity: board membership and
//! analysis records cascade on parent delete; interaction logs carry no
//! foreign keys so they survive persona deletion for audit.

use rusqlite::Connection;

use crate::error::Result;

struct Migration {
    version: i64,
    name: &'static str,
    up: &'static str,
}

fn migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            name: "create_personas",
            up: "CREATE TABLE IF NOT EXISTS personas (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    description TEXT,
                    traits_config TEXT NOT NULL,
                    memory_data TEXT,
                    created_at DATETIME NOT NULL,
                    updated_at DATETIME NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_personas_name ON personas(name);
                 CREATE INDEX IF NOT EXISTS idx_personas_updated_at ON personas(updated_at);",
        },
        Migration {
            version: 2,
            name: "create_boards",
            up: "CREATE TABLE IF NOT EXISTS boards (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    description TEXT,
                    is_template BOOLEAN DEFAULT FALSE,
                    metadata TEXT,
                    created_at DATETIME NOT NULL,
                    updated_at DATETIME NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_boards_name ON boards(name);
                 CREATE INDEX IF NOT EXISTS idx_boards_is_template ON boards(is_template);",
        },
        Migration {
            version: 3,
            name: "create_board_personas",
            up: "CREATE TABLE IF NOT EXISTS board_personas (
                    board_id TEXT NOT NULL,
                    persona_id TEXT NOT NULL,
                    role TEXT,
                    position INTEGER DEFAULT 0,
                    added_at DATETIME NOT NULL,
                    PRIMARY KEY (board_id, persona_id),
                    FOREIGN KEY (board_id) REFERENCES boards(id) ON DELETE CASCADE,
                    FOREIGN KEY (persona_id) REFERENCES personas(id) ON DELETE CASCADE
                 );
                 CREATE INDEX IF NOT EXISTS idx_board_personas_board
                    ON board_personas(board_id);",
        },
        Migration {
            version: 4,
            name: "create_projects",
            up: "CREATE TABLE IF NOT EXISTS projects (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    description TEXT,
                    metadata TEXT,
                    status TEXT DEFAULT 'active',
                    created_at DATETIME NOT NULL,
                    updated_at DATETIME NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_projects_status ON projects(status);",
        },
        Migration {
            version: 5,
            name: "create_ideas",
            up: "CREATE TABLE IF NOT EXISTS ideas (
                    id TEXT PRIMARY KEY,
                    project_id TEXT NOT NULL,
                    title TEXT NOT NULL,
                    content TEXT,
                    metadata TEXT,
                    status TEXT DEFAULT 'draft',
                    created_at DATETIME NOT NULL,
                    updated_at DATETIME NOT NULL,
                    FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE
                 );
                 CREATE INDEX IF NOT EXISTS idx_ideas_project ON ideas(project_id);",
        },
        Migration {
            version: 6,
            name: "create_documents",
            up: "CREATE TABLE IF NOT EXISTS documents (
                    id TEXT PRIMARY KEY,
                    project_id TEXT NOT NULL,
                    filename TEXT NOT NULL,
                    content_type TEXT NOT NULL,
                    size INTEGER NOT NULL,
                    content_hash TEXT,
                    processed_content TEXT,
                    metadata TEXT,
                    status TEXT DEFAULT 'pending',
                    created_at DATETIME NOT NULL,
                    processed_at DATETIME,
                    FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE
                 );
                 CREATE INDEX IF NOT EXISTS idx_documents_project ON documents(project_id);",
        },
        Migration {
            version: 7,
            name: "create_analysis_requests",
            up: "CREATE TABLE IF NOT EXISTS analysis_requests (
                    id TEXT PRIMARY KEY,
                    project_id TEXT NOT NULL,
                    board_id TEXT NOT NULL,
                    mode TEXT NOT NULL,
                    config TEXT,
                    created_at DATETIME NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_analysis_requests_project
                    ON analysis_requests(project_id);",
        },
        Migration {
            version: 8,
            name: "create_analysis_sessions",
            up: "CREATE TABLE IF NOT EXISTS analysis_sessions (
                    id TEXT PRIMARY KEY,
                    request_id TEXT NOT NULL,
                    project_id TEXT NOT NULL,
                    board_id TEXT NOT NULL,
                    mode TEXT NOT NULL,
                    status TEXT DEFAULT 'pending',
                    results_data TEXT,
                    error TEXT,
                    created_at DATETIME NOT NULL,
                    started_at DATETIME,
                    completed_at DATETIME,
                    duration_ms INTEGER DEFAULT 0,
                    FOREIGN KEY (request_id) REFERENCES analysis_requests(id) ON DELETE CASCADE
                 );
                 CREATE INDEX IF NOT EXISTS idx_analysis_sessions_request
                    ON analysis_sessions(request_id);
                 CREATE INDEX IF NOT EXISTS idx_analysis_sessions_status
                    ON analysis_sessions(status);",
        },
        Migration {
            version: 9,
            name: "create_analysis_responses",
            up: "CREATE TABLE IF NOT EXISTS analysis_responses (
                    id TEXT PRIMARY KEY,
                    session_id TEXT NOT NULL,
                    persona_id TEXT NOT NULL,
                    response_content TEXT NOT NULL,
                    reasoning TEXT,
                    confidence REAL DEFAULT 0.5,
                    emotional_tone TEXT,
                    turn_order INTEGER DEFAULT 0,
                    round INTEGER DEFAULT 0,
                    memories_used TEXT,
                    traits_influence TEXT,
                    tokens_used INTEGER DEFAULT 0,
                    created_at DATETIME NOT NULL,
                    FOREIGN KEY (session_id) REFERENCES analysis_sessions(id) ON DELETE CASCADE
                 );
                 CREATE INDEX IF NOT EXISTS idx_analysis_responses_session
                    ON analysis_responses(session_id);
                 CREATE INDEX IF NOT EXISTS idx_analysis_responses_order
                    ON analysis_responses(turn_order);",
        },
        Migration {
            version: 10,
            name: "create_analysis_insights",
            up: "CREATE TABLE IF NOT EXISTS analysis_insights (
                    id TEXT PRIMARY KEY,
                    session_id TEXT NOT NULL,
                    insight_text TEXT NOT NULL,
                    persona_id TEXT,
                    confidence REAL DEFAULT 0.5,
                    score REAL DEFAULT 0.0,
                    created_at DATETIME NOT NULL,
                    FOREIGN KEY (session_id) REFERENCES analysis_sessions(id) ON DELETE CASCADE
                 );
                 CREATE INDEX IF NOT EXISTS idx_analysis_insights_session
                    ON analysis_insights(session_id);",
        },
        Migration {
            version: 11,
            name: "create_interaction_logs",
            up: "CREATE TABLE IF NOT EXISTS interaction_logs (
                    id TEXT PRIMARY KEY,
                    persona_id TEXT,
                    session_id TEXT,
                    prompt TEXT NOT NULL,
                    system_message TEXT,
                    response TEXT NOT NULL,
                    model_name TEXT NOT NULL,
                    temperature REAL,
                    max_tokens INTEGER,
                    tokens_used INTEGER,
                    duration_ms INTEGER,
                    context_data TEXT,
                    outcome TEXT DEFAULT 'ok',
                    created_at DATETIME NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_interaction_logs_persona
                    ON interaction_logs(persona_id);
                 CREATE INDEX IF NOT EXISTS idx_interaction_logs_session
                    ON interaction_logs(session_id);
                 CREATE INDEX IF NOT EXISTS idx_interaction_logs_created
                    ON interaction_logs(created_at);",
        },
        Migration {
            version: 12,
            name: "create_system_config",
            up: "CREATE TABLE IF NOT EXISTS system_config (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    description TEXT,
                    updated_at DATETIME NOT NULL
                 );
                 INSERT OR IGNORE INTO system_config (key, value, description, updated_at) VALUES
                    ('default_mode', 'discussion', 'Mode used when a request omits one', datetime('now')),
                    ('max_concurrent', '5', 'Concurrent persona pipelines', datetime('now')),
                    ('log_retention_days', '90', 'Days to retain interaction logs', datetime('now'));",
        },
    ]
}

/// Apply every pending migration, newest schema version wins.
pub(crate) fn run_all(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at DATETIME NOT NULL
         )",
        [],
    )?;

    let current: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    for migration in migrations() {
        if migration.version <= current {
            continue;
        }
        conn.execute_batch(migration.up)?;
        conn.execute(
            "INSERT INTO schema_migrations (version, name, applied_at)
             VALUES (?1, ?2, datetime('now'))",
            rusqlite::params![migration.version, migration.name],
        )?;
        log::info!(
            "applied migration version={} name={}",
            migration.version,
            migration.name
        );
    }

    Ok(())
}
