/// Schema for the local queue and tile tables.
pub const SCHEMA: &str = r#"
-- Alerts waiting for delivery
CREATE TABLE IF NOT EXISTS sos_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    latitude REAL NOT NULL,
    longitude REAL NOT NULL,
    message TEXT,
    captured_at TEXT NOT NULL,
    queued_at INTEGER NOT NULL,
    status TEXT NOT NULL,
    retries INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_sos_queue_status ON sos_queue(status);
CREATE INDEX IF NOT EXISTS idx_sos_queue_queued_at ON sos_queue(queued_at);

-- Map tiles keyed by sha256(url); seq breaks inserted_at ties
CREATE TABLE IF NOT EXISTS tile_cache (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    tile_key TEXT NOT NULL UNIQUE,
    url TEXT NOT NULL,
    data BLOB NOT NULL,
    size INTEGER NOT NULL,
    inserted_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tile_cache_inserted ON tile_cache(inserted_at, seq);
"#;
