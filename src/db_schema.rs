use rusqlite::{Connection, Result as SqlResult};

// Schema definitions
pub const MEDIA_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS media (
    -- Absolute file path, primary key; upserts replace the whole row
    path          TEXT PRIMARY KEY NOT NULL,

    -- WGS-84 decimal degrees, both mandatory for a record to exist
    latitude      REAL NOT NULL,
    longitude     REAL NOT NULL,
    altitude      REAL,

    -- Capture time, %Y-%m-%dT%H:%M:%S at second precision (lexically sortable)
    taken_at      TEXT NOT NULL,

    -- Filesystem mtime (unix seconds) observed at extraction, change-detection only
    file_modified INTEGER NOT NULL
)
"#;

pub const SCHEMA_SQL: &[&str] = &[
    MEDIA_TABLE,
    "CREATE INDEX IF NOT EXISTS idx_media_taken_at ON media (taken_at);",
    "CREATE INDEX IF NOT EXISTS idx_media_lat_lon ON media (latitude, longitude);",
];

pub fn initialize_schema(conn: &Connection) -> SqlResult<()> {
    for sql in SCHEMA_SQL {
        conn.execute(sql, [])?;
    }
    Ok(())
}
