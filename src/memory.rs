use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

use crate::llm::LlmClient;

// Matches the embedding width of the default model; used for the zero-vector
// placeholder when the embedding endpoint is unreachable.
const EMBEDDING_FALLBACK_DIM: usize = 1024;

/// Long-term memory: an embedded vector collection.
///
/// Texts are embedded through the LLM's embedding endpoint at write and
/// query time (no caching, no batching) and ranked by cosine similarity.
/// Entries are immutable; the only deletion path is a full wipe.
pub struct VectorMemory {
    conn: Mutex<Connection>,
    llm: LlmClient,
}

#[derive(Debug, Clone)]
pub struct MemoryRecord {
    pub id: String,
    pub text: String,
    pub timestamp: String,
}

impl VectorMemory {
    pub fn open(path: impl AsRef<Path>, llm: LlmClient) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open memory database")?;
        Self::with_connection(conn, llm)
    }

    #[cfg(test)]
    pub fn open_in_memory(llm: LlmClient) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, llm)
    }

    fn with_connection(conn: Connection, llm: LlmClient) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS memories (
                id TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                embedding BLOB NOT NULL
            )",
            [],
        )
        .context("Failed to create memories table")?;

        Ok(Self {
            conn: Mutex::new(conn),
            llm,
        })
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("Memory database lock poisoned"))
    }

    /// Store a new memory. Embedding failures degrade to a zero vector so
    /// the text itself is never lost.
    pub async fn add(&self, text: &str) -> Result<()> {
        let embedding = match self.llm.embed(text).await {
            Ok(vector) => vector,
            Err(e) => {
                tracing::warn!("Embedding failed, storing placeholder vector: {}", e);
                vec![0.0; EMBEDDING_FALLBACK_DIM]
            }
        };

        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO memories (id, text, timestamp, embedding) VALUES (?1, ?2, ?3, ?4)",
            params![
                Uuid::new_v4().to_string(),
                text,
                Utc::now().to_rfc3339(),
                encode_embedding(&embedding),
            ],
        )
        .context("Failed to insert memory")?;

        tracing::info!("Memory saved: {}...", text.chars().take(30).collect::<String>());
        Ok(())
    }

    /// Find the `top_k` most similar memories to the query.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<String>> {
        let query_embedding = match self.llm.embed(query).await {
            Ok(vector) => vector,
            Err(e) => {
                tracing::warn!("Query embedding failed, skipping memory search: {}", e);
                return Ok(Vec::new());
            }
        };

        let mut scored = {
            let conn = self.lock_conn()?;
            let mut stmt = conn.prepare("SELECT text, embedding FROM memories")?;
            let rows = stmt
                .query_map([], |row| {
                    let text: String = row.get(0)?;
                    let blob: Vec<u8> = row.get(1)?;
                    Ok((text, blob))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(text, blob)| {
                    let embedding = decode_embedding(&blob);
                    let score = cosine_similarity(&query_embedding, &embedding);
                    (text, score)
                })
                .collect::<Vec<_>>()
        };

        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(top_k);
        Ok(scored.into_iter().map(|(text, _)| text).collect())
    }

    /// Most recent memories, newest first.
    pub fn peek_recent(&self, limit: usize) -> Result<Vec<MemoryRecord>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, text, timestamp FROM memories ORDER BY timestamp DESC LIMIT ?1",
        )?;
        let records = stmt
            .query_map([limit as i64], |row| {
                Ok(MemoryRecord {
                    id: row.get(0)?,
                    text: row.get(1)?,
                    timestamp: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.lock_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Drop every memory in the collection.
    pub fn wipe(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute("DELETE FROM memories", [])?;
        tracing::info!("Memory collection wiped");
        Ok(())
    }
}

fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_encoding_round_trips() {
        let vector = vec![0.5, -1.25, 3.0];
        assert_eq!(decode_embedding(&encode_embedding(&vector)), vector);
    }

    #[test]
    fn cosine_similarity_ranks_aligned_vectors_highest() {
        let query = [1.0, 0.0];
        assert!(cosine_similarity(&query, &[1.0, 0.0]) > cosine_similarity(&query, &[0.5, 0.5]));
        assert_eq!(cosine_similarity(&query, &[0.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&query, &[1.0]), 0.0);
    }

    fn offline_llm() -> LlmClient {
        // unreachable endpoint: add() degrades to the placeholder vector
        LlmClient::new(
            "http://127.0.0.1:1".to_string(),
            "gemma2:27b".to_string(),
            std::time::Duration::from_secs(1),
            std::time::Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn add_peek_and_wipe_round_trip() {
        let memory = VectorMemory::open_in_memory(offline_llm()).unwrap();

        memory.add("User said: I got the job").await.unwrap();
        memory.add("User said: moving next month").await.unwrap();
        assert_eq!(memory.count().unwrap(), 2);

        let recent = memory.peek_recent(10).unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent.iter().any(|r| r.text.contains("got the job")));
        assert!(!recent[0].id.is_empty());

        memory.wipe().unwrap();
        assert_eq!(memory.count().unwrap(), 0);
        assert!(memory.peek_recent(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn search_degrades_to_empty_when_embedding_fails() {
        let memory = VectorMemory::open_in_memory(offline_llm()).unwrap();
        memory.add("User said: I got the job").await.unwrap();
        let results = memory.search("job", 3).await.unwrap();
        assert!(results.is_empty());
    }
}
