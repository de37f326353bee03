// Ordered schema migrations
// Applied migrations are recorded in bridge_migrations by index; downgrade
// is not supported

/// Bootstrap script, safe to run on every open.
pub const BOOTSTRAP: &str = "
CREATE TABLE IF NOT EXISTS bridge_migrations (
    script_index INTEGER PRIMARY KEY,
    applied_at   INTEGER NOT NULL
);
";

/// Migration scripts in application order. Never reorder or edit an entry
/// that has shipped; append a new one instead.
pub const MIGRATIONS: &[&str] = &[
    // 0: initial schema
    "
    CREATE TABLE sessions (
        session_id      TEXT PRIMARY KEY,
        created_at      INTEGER NOT NULL,
        url             TEXT,
        safe_mode       INTEGER NOT NULL DEFAULT 0,
        allowlist       TEXT NOT NULL DEFAULT '[]',
        snapshot_config TEXT,
        status          TEXT NOT NULL DEFAULT 'active',
        ended_at        INTEGER
    );

    CREATE TABLE events (
        event_id   TEXT NOT NULL,
        session_id TEXT NOT NULL,
        type       TEXT NOT NULL,
        timestamp  INTEGER NOT NULL,
        data       TEXT NOT NULL,
        PRIMARY KEY (session_id, event_id)
    );
    CREATE INDEX idx_events_session_ts ON events (session_id, timestamp);

    CREATE TABLE network_requests (
        network_id  TEXT NOT NULL,
        session_id  TEXT NOT NULL,
        timestamp   INTEGER NOT NULL,
        method      TEXT NOT NULL,
        url         TEXT NOT NULL,
        status      INTEGER NOT NULL DEFAULT 0,
        duration_ms INTEGER NOT NULL DEFAULT 0,
        error_type  TEXT NOT NULL DEFAULT 'none',
        PRIMARY KEY (session_id, network_id)
    );
    CREATE INDEX idx_network_session_ts ON network_requests (session_id, timestamp);

    CREATE TABLE error_fingerprints (
        hash           TEXT NOT NULL,
        session_id     TEXT NOT NULL,
        count          INTEGER NOT NULL DEFAULT 1,
        first_seen     INTEGER NOT NULL,
        last_seen      INTEGER NOT NULL,
        sample_message TEXT NOT NULL,
        sample_stack   TEXT NOT NULL,
        PRIMARY KEY (hash, session_id)
    );
    CREATE INDEX idx_fingerprints_hash ON error_fingerprints (hash);
    ",
    // 1: snapshots and chunk-retrievable assets
    "
    CREATE TABLE snapshots (
        snapshot_id      TEXT PRIMARY KEY,
        session_id       TEXT NOT NULL,
        timestamp        INTEGER NOT NULL,
        trigger_kind     TEXT NOT NULL,
        trigger_event_id TEXT,
        selector         TEXT,
        url              TEXT NOT NULL DEFAULT '',
        dom_mode         INTEGER NOT NULL DEFAULT 0,
        png_mode         INTEGER NOT NULL DEFAULT 0,
        style_mode       TEXT NOT NULL DEFAULT 'computed-lite',
        dom_payload      TEXT,
        styles_payload   TEXT,
        truncation_dom    INTEGER NOT NULL DEFAULT 0,
        truncation_styles INTEGER NOT NULL DEFAULT 0,
        truncation_png    INTEGER NOT NULL DEFAULT 0,
        redaction        TEXT,
        png_asset_id     INTEGER
    );
    CREATE INDEX idx_snapshots_session_ts ON snapshots (session_id, timestamp);

    CREATE TABLE snapshot_assets (
        asset_id    INTEGER PRIMARY KEY AUTOINCREMENT,
        snapshot_id TEXT NOT NULL,
        kind        TEXT NOT NULL DEFAULT 'png',
        bytes       BLOB NOT NULL,
        size_bytes  INTEGER NOT NULL
    );
    CREATE INDEX idx_assets_snapshot ON snapshot_assets (snapshot_id);
    ",
];
