/// SQL DDL for the envoy database.
/// Singletons are single-row tables pinned to `id = 1`.
pub const SCHEMA_VERSION: u32 = 1;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS players (
    user_id TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    country TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_players_country_unique
    ON players(lower(country))
    WHERE country IS NOT NULL AND country <> '';

CREATE TABLE IF NOT EXISTS threads (
    user_id TEXT PRIMARY KEY,
    messages_json TEXT NOT NULL,
    summary TEXT NOT NULL,
    last_updated TEXT NOT NULL,
    summary_last_updated TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS game_state (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    phase TEXT NOT NULL,
    state_text TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS cooldown (
    user_id TEXT PRIMARY KEY,
    last_message_at REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS strategy_journal (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    commitments TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS press_lock (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    locked INTEGER NOT NULL
);

INSERT OR IGNORE INTO game_state (id, phase, state_text, updated_at) VALUES (1, '', '', '');
INSERT OR IGNORE INTO strategy_journal (id, commitments) VALUES (1, '');
INSERT OR IGNORE INTO press_lock (id, locked) VALUES (1, 0);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;
