use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

const DDL: &str = "
CREATE TABLE IF NOT EXISTS prompt_embeddings (
    hash       TEXT NOT NULL,
    model      TEXT NOT NULL,
    dim        INTEGER NOT NULL,
    vector     BLOB NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (hash, model)
);
";

/// (prompt hash, model) → vector store. Vectors from different models for
/// the same prompt live side by side.
pub trait EmbeddingCache: Send + Sync {
    fn get(&self, hash: &str, model: &str) -> Result<Option<Vec<f32>>>;
    fn put(&self, hash: &str, model: &str, vector: &[f32]) -> Result<()>;
    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_vector(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

/// SQLite-backed cache, shared safely by concurrent runs through WAL.
pub struct SqliteEmbeddingCache {
    conn: Mutex<Connection>,
}

impl SqliteEmbeddingCache {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create cache directory: {}", parent.display()))?;
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("failed to open embedding cache: {}", db_path.display()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
        conn.execute_batch(DDL)
            .context("failed to initialize embedding cache schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("embedding cache lock poisoned"))
    }
}

impl EmbeddingCache for SqliteEmbeddingCache {
    fn get(&self, hash: &str, model: &str) -> Result<Option<Vec<f32>>> {
        let conn = self.conn()?;
        let blob: Option<Vec<u8>> = conn
            .query_row(
                "SELECT vector FROM prompt_embeddings WHERE hash = ?1 AND model = ?2",
                params![hash, model],
                |row| row.get(0),
            )
            .optional()?;
        Ok(blob.and_then(|b| decode_vector(&b)))
    }

    fn put(&self, hash: &str, model: &str, vector: &[f32]) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO prompt_embeddings (hash, model, dim, vector, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                hash,
                model,
                vector.len() as i64,
                encode_vector(vector),
                chrono::Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn len(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM prompt_embeddings", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

/// In-memory cache for tests and one-off runs.
#[derive(Default)]
pub struct MemoryEmbeddingCache {
    entries: Mutex<HashMap<(String, String), Vec<f32>>>,
}

impl MemoryEmbeddingCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EmbeddingCache for MemoryEmbeddingCache {
    fn get(&self, hash: &str, model: &str) -> Result<Option<Vec<f32>>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| anyhow!("embedding cache lock poisoned"))?;
        Ok(entries
            .get(&(hash.to_string(), model.to_string()))
            .cloned())
    }

    fn put(&self, hash: &str, model: &str, vector: &[f32]) -> Result<()> {
        self.entries
            .lock()
            .map_err(|_| anyhow!("embedding cache lock poisoned"))?
            .insert((hash.to_string(), model.to_string()), vector.to_vec());
        Ok(())
    }

    fn len(&self) -> Result<usize> {
        Ok(self
            .entries
            .lock()
            .map_err(|_| anyhow!("embedding cache lock poisoned"))?
            .len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn sqlite_roundtrip_and_persistence() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cache/embeddings.db");
        {
            let cache = SqliteEmbeddingCache::open(&path).unwrap();
            cache.put("h1", "m1", &[0.5, -1.25, 3.0]).unwrap();
            assert_eq!(cache.len().unwrap(), 1);
        }
        let cache = SqliteEmbeddingCache::open(&path).unwrap();
        assert_eq!(cache.get("h1", "m1").unwrap(), Some(vec![0.5, -1.25, 3.0]));
    }

    #[test]
    fn model_mismatch_is_a_miss() {
        let tmp = TempDir::new().unwrap();
        let cache = SqliteEmbeddingCache::open(&tmp.path().join("e.db")).unwrap();
        cache.put("h1", "m1", &[1.0]).unwrap();
        assert_eq!(cache.get("h1", "m2").unwrap(), None);

        let mem = MemoryEmbeddingCache::new();
        mem.put("h1", "m1", &[1.0]).unwrap();
        assert_eq!(mem.get("h1", "m2").unwrap(), None);
        assert_eq!(mem.get("h1", "m1").unwrap(), Some(vec![1.0]));
    }

    #[test]
    fn models_do_not_overwrite_each_other() {
        let tmp = TempDir::new().unwrap();
        let sqlite = SqliteEmbeddingCache::open(&tmp.path().join("e.db")).unwrap();
        let mem = MemoryEmbeddingCache::new();
        for cache in [&sqlite as &dyn EmbeddingCache, &mem] {
            cache.put("h1", "model", &[1.0, 0.0]).unwrap();
            cache.put("h1", "heuristic-hash-2", &[0.0, 1.0]).unwrap();
            assert_eq!(cache.get("h1", "model").unwrap(), Some(vec![1.0, 0.0]));
            assert_eq!(cache.get("h1", "heuristic-hash-2").unwrap(), Some(vec![0.0, 1.0]));
            assert_eq!(cache.len().unwrap(), 2);
        }
    }

    #[test]
    fn odd_blob_length_is_rejected() {
        assert_eq!(decode_vector(&[0, 0, 0]), None);
        assert_eq!(decode_vector(&encode_vector(&[2.0])), Some(vec![2.0]));
    }
}
