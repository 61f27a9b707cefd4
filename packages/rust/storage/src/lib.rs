//! libSQL storage layer for the persisted embedding index.
//!
//! The [`Storage`] struct wraps a local libSQL database holding document
//! chunks, their embeddings, and build metadata.
//!
//! **Access rules:**
//! - Ingestion: read-write (sole writer) via [`Storage::open`]
//! - Pipeline runs: read-only via [`Storage::open_readonly`]

mod migrations;

use std::path::Path;

use chrono::Utc;
use libsql::{Connection, Database, Value, params};
use newsagent_shared::{DocumentChunk, NewsAgentError, Result};

/// Index metadata key for the embedding model name.
pub const META_EMBEDDING_MODEL: &str = "embedding_model";

/// Index metadata key for the last build timestamp.
pub const META_BUILT_AT: &str = "built_at";

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

fn storage_err(e: impl std::fmt::Display) -> NewsAgentError {
    NewsAgentError::Storage(e.to_string())
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| NewsAgentError::io(parent, e))?;
            }
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing index at `path` in read-only mode.
    ///
    /// Fails with [`NewsAgentError::IndexUnavailable`] when the file is missing
    /// or was never initialized by ingestion.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(NewsAgentError::IndexUnavailable(format!(
                "no index file at {}",
                path.display()
            )));
        }

        let unavailable = |e: libsql::Error| {
            NewsAgentError::IndexUnavailable(format!("{}: {e}", path.display()))
        };

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(unavailable)?;
        let conn = db.connect().map_err(unavailable)?;

        let storage = Self {
            db,
            conn,
            readonly: true,
        };

        if storage.get_schema_version().await == 0 {
            return Err(NewsAgentError::IndexUnavailable(format!(
                "{} is not an initialized index",
                path.display()
            )));
        }
        Ok(storage)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        NewsAgentError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(NewsAgentError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Chunk operations
    // -----------------------------------------------------------------------

    /// Replace every stored chunk with `chunks`, in order.
    ///
    /// Chunks whose id is already present in the batch are skipped. Returns the
    /// number of chunks actually stored.
    pub async fn replace_chunks(&self, chunks: &[DocumentChunk]) -> Result<usize> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();

        let tx = self.conn.transaction().await.map_err(storage_err)?;
        tx.execute("DELETE FROM chunks", params![])
            .await
            .map_err(storage_err)?;

        let mut stored = 0;
        for (position, chunk) in chunks.iter().enumerate() {
            let changed = tx
                .execute(
                    "INSERT OR IGNORE INTO chunks (id, source_id, position, text, embedding, dims, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        chunk.id.as_str(),
                        chunk.source_id.as_str(),
                        position as i64,
                        chunk.text.as_str(),
                        Value::Blob(encode_embedding(&chunk.embedding)),
                        chunk.embedding.len() as i64,
                        now.as_str()
                    ],
                )
                .await
                .map_err(storage_err)?;
            stored += changed as usize;
        }

        tx.commit().await.map_err(storage_err)?;
        tracing::debug!(stored, offered = chunks.len(), "replaced chunk table");
        Ok(stored)
    }

    /// Load every chunk in ingestion order.
    pub async fn list_chunks(&self) -> Result<Vec<DocumentChunk>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, source_id, text, embedding FROM chunks ORDER BY position",
                params![],
            )
            .await
            .map_err(storage_err)?;

        let mut chunks = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            let embedding = match row.get_value(3).map_err(storage_err)? {
                Value::Blob(bytes) => decode_embedding(&bytes)?,
                other => {
                    return Err(NewsAgentError::Storage(format!(
                        "unexpected embedding column type: {other:?}"
                    )));
                }
            };
            chunks.push(DocumentChunk {
                id: row.get::<String>(0).map_err(storage_err)?,
                source_id: row.get::<String>(1).map_err(storage_err)?,
                text: row.get::<String>(2).map_err(storage_err)?,
                embedding,
            });
        }
        Ok(chunks)
    }

    /// Number of stored chunks.
    pub async fn count_chunks(&self) -> Result<usize> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM chunks", params![])
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(row.get::<i64>(0).map_err(storage_err)? as usize),
            None => Ok(0),
        }
    }

    // -----------------------------------------------------------------------
    // Index metadata
    // -----------------------------------------------------------------------

    /// Set a metadata value, replacing any previous one.
    pub async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO index_meta (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Get a metadata value.
    pub async fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query("SELECT value FROM index_meta WHERE key = ?1", params![key])
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(Some(row.get::<String>(0).map_err(storage_err)?)),
            None => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// Embedding encoding
// ---------------------------------------------------------------------------

/// Encode an embedding as little-endian `f32` bytes.
pub fn encode_embedding(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode little-endian `f32` bytes back into an embedding.
pub fn decode_embedding(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(NewsAgentError::Storage(format!(
            "embedding blob of {} bytes is not a whole number of f32 values",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_db() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("na_test_{}.db", Uuid::now_v7()))
    }

    fn chunk(id: &str, source: &str, text: &str, embedding: Vec<f32>) -> DocumentChunk {
        DocumentChunk {
            id: id.into(),
            text: text.into(),
            source_id: source.into(),
            embedding,
        }
    }

    #[tokio::test]
    async fn open_creates_schema() {
        let path = temp_db();
        let storage = Storage::open(&path).await.expect("open");
        assert_eq!(storage.get_schema_version().await, 1);
        assert_eq!(storage.count_chunks().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reopen_does_not_reapply_migrations() {
        let path = temp_db();
        drop(Storage::open(&path).await.unwrap());
        let storage = Storage::open(&path).await.expect("reopen");
        assert_eq!(storage.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn replace_chunks_roundtrip_preserves_order() {
        let storage = Storage::open(&temp_db()).await.unwrap();
        let chunks = vec![
            chunk("b", "data/b.md", "second", vec![0.0, 1.0]),
            chunk("a", "data/a.md", "first", vec![1.0, 0.0]),
        ];
        let stored = storage.replace_chunks(&chunks).await.expect("replace");
        assert_eq!(stored, 2);

        let loaded = storage.list_chunks().await.expect("list");
        assert_eq!(loaded, chunks);
    }

    #[tokio::test]
    async fn replace_chunks_discards_previous_build_and_duplicates() {
        let storage = Storage::open(&temp_db()).await.unwrap();
        storage
            .replace_chunks(&[chunk("old", "old.md", "old", vec![1.0])])
            .await
            .unwrap();

        let stored = storage
            .replace_chunks(&[
                chunk("new", "new.md", "new", vec![1.0]),
                chunk("new", "new.md", "new", vec![1.0]),
            ])
            .await
            .unwrap();
        assert_eq!(stored, 1);

        let loaded = storage.list_chunks().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "new");
    }

    #[tokio::test]
    async fn meta_upsert() {
        let storage = Storage::open(&temp_db()).await.unwrap();
        assert!(storage.get_meta(META_EMBEDDING_MODEL).await.unwrap().is_none());
        storage.set_meta(META_EMBEDDING_MODEL, "embedding-001").await.unwrap();
        storage.set_meta(META_EMBEDDING_MODEL, "embedding-002").await.unwrap();
        assert_eq!(
            storage.get_meta(META_EMBEDDING_MODEL).await.unwrap().as_deref(),
            Some("embedding-002")
        );
    }

    #[tokio::test]
    async fn readonly_missing_file_is_index_unavailable() {
        let result = Storage::open_readonly(&temp_db()).await;
        assert!(matches!(result, Err(NewsAgentError::IndexUnavailable(_))));
    }

    #[tokio::test]
    async fn readonly_rejects_uninitialized_file() {
        let path = temp_db();
        std::fs::write(&path, b"").unwrap();
        let result = Storage::open_readonly(&path).await;
        assert!(matches!(result, Err(NewsAgentError::IndexUnavailable(_))));
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let path = temp_db();
        let rw = Storage::open(&path).await.unwrap();
        rw.replace_chunks(&[chunk("a", "a.md", "text", vec![0.5])])
            .await
            .unwrap();
        drop(rw);

        let ro = Storage::open_readonly(&path).await.unwrap();
        assert_eq!(ro.count_chunks().await.unwrap(), 1);
        let result = ro.replace_chunks(&[]).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("read-only"));
    }

    #[test]
    fn decode_rejects_truncated_blob() {
        assert!(decode_embedding(&[0, 0, 128]).is_err());
        let bytes = encode_embedding(&[1.5, -2.0]);
        assert_eq!(decode_embedding(&bytes).unwrap(), vec![1.5, -2.0]);
    }
}
