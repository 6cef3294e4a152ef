/// Current schema version, stored in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 2;

/// Migrations keyed by the version they bring the database to.
///
/// Each step only creates what is missing so that tables owned by other
/// code in the same file are left alone.
pub const MIGRATIONS: &[(i64, &str)] = &[(1, PENDING_UPLOADS), (2, ASSET_CACHE)];

const PENDING_UPLOADS: &str = r#"
-- Records waiting for upstream delivery. AUTOINCREMENT keeps ids from
-- being reused after deletion.
CREATE TABLE IF NOT EXISTS pending_uploads (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    payload TEXT NOT NULL,
    enqueued_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_pending_uploads_order
    ON pending_uploads(enqueued_at, id);
"#;

const ASSET_CACHE: &str = r#"
-- One row per cache generation; at most one is active.
CREATE TABLE IF NOT EXISTS cache_generations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Captured responses, keyed by normalized request.
CREATE TABLE IF NOT EXISTS cache_entries (
    generation_id INTEGER NOT NULL,
    request_key TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    PRIMARY KEY (generation_id, request_key)
);
"#;
