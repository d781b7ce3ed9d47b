//! SQLite metadata store with migrations
//!
//! Authoritative row store for vector entries. The ANN graph is rebuilt from
//! these rows whenever it is missing or stale.

use crate::chunk::Metadata;
use crate::error::{DocseekError, Result};
use crate::store::VectorEntry;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Row};
use std::path::Path;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Database manager with migration support
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Open (or create) the database at `db_path` and run migrations
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DocseekError::io(e, format!("Failed to create database directory: {:?}", parent))
            })?;
        }

        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA busy_timeout = 5000;
                ",
            )
        });

        let pool = Pool::builder()
            .max_size(16)
            .build(manager)
            .map_err(|e| DocseekError::Pool(format!("Failed to create connection pool: {}", e)))?;

        let db = Self { pool };
        db.migrate()?;

        Ok(db)
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| DocseekError::Pool(format!("Failed to get connection: {}", e)))
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM _migrations",
            [],
            |row| row.get(0),
        )?;

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::info!("Applying migration {}", version);
                conn.execute_batch(migration)?;
                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Insert or replace rows in one transaction, keyed by chunk id
    pub fn upsert_entries(&self, entries: &[VectorEntry]) -> Result<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO vectors
                    (id, chunk_id, file_id, content, metadata, vector, timestamp, model)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;

            for entry in entries {
                let metadata = serde_json::to_string(&entry.metadata)
                    .map_err(|e| DocseekError::json(e, "Failed to encode chunk metadata"))?;
                stmt.execute(params![
                    entry.id as i64,
                    entry.chunk_id,
                    entry.file_id,
                    entry.content,
                    metadata,
                    encode_vector(&entry.vector),
                    entry.timestamp,
                    entry.model,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Every stored row, ordered by id
    pub fn load_entries(&self) -> Result<Vec<VectorEntry>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, chunk_id, file_id, content, metadata, vector, timestamp, model
             FROM vectors ORDER BY id",
        )?;

        let entries = stmt
            .query_map([], row_to_entry)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Delete every row of `file_id`, returning how many were removed
    pub fn delete_by_file_id(&self, file_id: &str) -> Result<usize> {
        let conn = self.get_conn()?;
        let removed = conn.execute("DELETE FROM vectors WHERE file_id = ?1", params![file_id])?;
        Ok(removed)
    }

    pub fn clear(&self) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute("DELETE FROM vectors", [])?;
        Ok(())
    }
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<VectorEntry> {
    let metadata_json: String = row.get(4)?;
    let metadata: Metadata = serde_json::from_str(&metadata_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let blob: Vec<u8> = row.get(5)?;

    Ok(VectorEntry {
        id: row.get::<_, i64>(0)? as u64,
        chunk_id: row.get(1)?,
        file_id: row.get(2)?,
        content: row.get(3)?,
        metadata,
        vector: decode_vector(&blob),
        timestamp: row.get(6)?,
        model: row.get(7)?,
    })
}

/// Little-endian f32 encoding
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Database migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: vector metadata
    r#"
    CREATE TABLE vectors (
        id INTEGER PRIMARY KEY,
        chunk_id TEXT UNIQUE NOT NULL,
        file_id TEXT NOT NULL,
        content TEXT NOT NULL,
        metadata TEXT NOT NULL,  -- JSON object
        vector BLOB NOT NULL,    -- little-endian f32
        timestamp INTEGER NOT NULL
    );

    CREATE INDEX idx_vectors_file_id ON vectors(file_id);
    CREATE INDEX idx_vectors_timestamp ON vectors(timestamp);
    "#,
    // Migration 2: embedding model per row; older rows came from the default model
    r#"
    ALTER TABLE vectors ADD COLUMN model TEXT NOT NULL DEFAULT 'all-MiniLM-L6-v2';

    CREATE INDEX idx_vectors_model ON vectors(model);
    "#,
];

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn entry(id: u64, chunk_id: &str, file_id: &str, content: &str) -> VectorEntry {
        let mut metadata = Metadata::new();
        metadata.insert("type".to_string(), json!("pdf"));
        VectorEntry {
            id,
            chunk_id: chunk_id.to_string(),
            file_id: file_id.to_string(),
            vector: vec![0.5, -1.25, 3.0],
            content: content.to_string(),
            metadata,
            timestamp: 1_700_000_000_000,
            model: "all-MiniLM-L6-v2".to_string(),
        }
    }

    #[test]
    fn test_database_creation() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("test.db");

        let _db = Database::new(&db_path).unwrap();
        assert!(db_path.exists());
    }

    #[test]
    fn test_migrations() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("test.db")).unwrap();

        let conn = db.get_conn().unwrap();
        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM _migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, MIGRATIONS.len() as i32);
    }

    #[test]
    fn test_reopen_keeps_rows() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        {
            let db = Database::new(&db_path).unwrap();
            db.upsert_entries(&[entry(0, "c1", "f1", "hello")]).unwrap();
        }

        let db = Database::new(&db_path).unwrap();
        let entries = db.load_entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].vector, vec![0.5, -1.25, 3.0]);
        assert_eq!(entries[0].metadata["type"], json!("pdf"));
    }

    #[test]
    fn test_upsert_replaces_by_chunk_id() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("test.db")).unwrap();

        db.upsert_entries(&[entry(0, "c1", "f1", "old")]).unwrap();
        db.upsert_entries(&[entry(5, "c1", "f1", "new")]).unwrap();

        let entries = db.load_entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, 5);
        assert_eq!(entries[0].content, "new");
    }

    #[test]
    fn test_delete_by_file_id() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("test.db")).unwrap();

        db.upsert_entries(&[
            entry(0, "a1", "A", "one"),
            entry(1, "a2", "A", "two"),
            entry(2, "b1", "B", "three"),
        ])
        .unwrap();

        assert_eq!(db.delete_by_file_id("A").unwrap(), 2);
        assert_eq!(db.delete_by_file_id("missing").unwrap(), 0);

        let remaining: Vec<String> = db
            .load_entries()
            .unwrap()
            .into_iter()
            .map(|e| e.chunk_id)
            .collect();
        assert_eq!(remaining, vec!["b1"]);
    }

    #[test]
    fn test_clear() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("test.db")).unwrap();
        db.upsert_entries(&[entry(0, "c1", "f1", "x")]).unwrap();

        db.clear().unwrap();
        assert!(db.load_entries().unwrap().is_empty());
    }

    #[test]
    fn test_model_column_round_trips() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("test.db")).unwrap();

        let mut tagged = entry(0, "c1", "f1", "x");
        tagged.model = "bge-small-en-v1.5".to_string();
        db.upsert_entries(&[tagged]).unwrap();

        assert_eq!(db.load_entries().unwrap()[0].model, "bge-small-en-v1.5");
    }

    #[test]
    fn test_rows_without_model_get_default() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("test.db")).unwrap();

        let conn = db.get_conn().unwrap();
        conn.execute(
            "INSERT INTO vectors (id, chunk_id, file_id, content, metadata, vector, timestamp)
             VALUES (0, 'old', 'f1', 'legacy', '{}', ?1, 0)",
            params![encode_vector(&[1.0, 0.0])],
        )
        .unwrap();
        drop(conn);

        assert_eq!(db.load_entries().unwrap()[0].model, "all-MiniLM-L6-v2");
    }

    #[test]
    fn test_vector_encoding() {
        let vector = vec![1.0, -0.0, f32::MAX, 0.125];
        assert_eq!(decode_vector(&encode_vector(&vector)), vector);
    }
}
