//! SQLite-backed store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::migrations::run_migrations;
use super::{SiccStore, rank_by_vector, rank_hybrid};
use crate::agents::PatternAssignment;
use crate::error::{SiccError, SiccResult};
use crate::learning::Pattern;
use crate::memory::{HybridWeights, Memory, MemoryFilters, MemoryHit};
use crate::metrics::PerformanceMetric;
use crate::supervisor::ApprovalDecision;
use crate::types::ConversationRecord;

const MEMORY_COLUMNS: &str = "id, conversation_id, content, embedding, relevance, initial_relevance, metadata_json, created_at, deleted_at";

/// Store persisting to a single SQLite database
///
/// `rusqlite::Connection` is not `Sync`, so access is serialised through a
/// tokio `Mutex`; every statement runs synchronously while the lock is held.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a database file and run migrations
    pub fn open(path: impl AsRef<Path>) -> SiccResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    SiccError::Other(anyhow::anyhow!(
                        "failed to create database directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let conn = Connection::open(path)?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        tracing::debug!(path = %path.display(), "Opened SICC database");
        Self::from_connection(conn)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> SiccResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Wrap an existing connection and run migrations
    pub fn from_connection(conn: Connection) -> SiccResult<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        run_migrations(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    fn live_memories(
        conn: &Connection,
        conversation_id: Option<&str>,
        exclude_conversation_id: Option<&str>,
    ) -> SiccResult<Vec<Memory>> {
        let sql = format!(
            "SELECT {} FROM sicc_memories
             WHERE deleted_at IS NULL
               AND (?1 IS NULL OR conversation_id = ?1)
               AND (?2 IS NULL OR conversation_id != ?2)
             ORDER BY created_at ASC, id ASC",
            MEMORY_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![conversation_id, exclude_conversation_id], row_to_memory)?;

        let mut memories = Vec::new();
        for row in rows {
            memories.push(row?);
        }
        Ok(memories)
    }

    fn candidates(conn: &Connection, filters: &MemoryFilters) -> SiccResult<Vec<Memory>> {
        Self::live_memories(
            conn,
            filters.conversation_id.as_deref(),
            filters.exclude_conversation_id.as_deref(),
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row mapping
// ─────────────────────────────────────────────────────────────────────────────

fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

fn json_column<T: serde::de::DeserializeOwned>(index: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn row_to_memory(row: &Row) -> rusqlite::Result<Memory> {
    let blob: Vec<u8> = row.get(3)?;
    let metadata_json: String = row.get(6)?;
    let deleted_at: Option<i64> = row.get(8)?;

    Ok(Memory {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        content: row.get(2)?,
        embedding: blob_to_embedding(&blob),
        relevance: row.get(4)?,
        initial_relevance: row.get(5)?,
        metadata: json_column(6, &metadata_json)?,
        created_at: millis_to_datetime(row.get(7)?),
        deleted_at: deleted_at.map(millis_to_datetime),
    })
}

fn row_to_pattern(row: &Row) -> rusqlite::Result<Pattern> {
    let data_json: String = row.get(0)?;
    let version: i64 = row.get(1)?;
    let mut pattern: Pattern = json_column(0, &data_json)?;
    pattern.version = version as u64;
    Ok(pattern)
}

fn row_to_json<T: serde::de::DeserializeOwned>(row: &Row) -> rusqlite::Result<T> {
    let data_json: String = row.get(0)?;
    json_column(0, &data_json)
}

fn collect<T>(rows: impl Iterator<Item = rusqlite::Result<T>>) -> SiccResult<Vec<T>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

// ─────────────────────────────────────────────────────────────────────────────
// SiccStore
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl SiccStore for SqliteStore {
    async fn insert_memory(&self, memory: &Memory) -> SiccResult<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO sicc_memories (id, conversation_id, content, embedding, relevance, initial_relevance, metadata_json, created_at, deleted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                &memory.id,
                &memory.conversation_id,
                &memory.content,
                embedding_to_blob(&memory.embedding),
                memory.relevance,
                memory.initial_relevance,
                serde_json::to_string(&memory.metadata)?,
                memory.created_at.timestamp_millis(),
                memory.deleted_at.map(|d| d.timestamp_millis()),
            ],
        )?;
        Ok(())
    }

    async fn get_memory(&self, id: &str) -> SiccResult<Option<Memory>> {
        let db = self.db.lock().await;
        let sql = format!("SELECT {} FROM sicc_memories WHERE id = ?1", MEMORY_COLUMNS);
        Ok(db.query_row(&sql, params![id], row_to_memory).optional()?)
    }

    async fn list_memories(&self, conversation_id: Option<&str>) -> SiccResult<Vec<Memory>> {
        let db = self.db.lock().await;
        Self::live_memories(&db, conversation_id, None)
    }

    async fn soft_delete_memory(&self, id: &str, at: DateTime<Utc>) -> SiccResult<bool> {
        let db = self.db.lock().await;
        let changed = db.execute(
            "UPDATE sicc_memories SET deleted_at = ?2 WHERE id = ?1 AND deleted_at IS NULL",
            params![id, at.timestamp_millis()],
        )?;
        Ok(changed > 0)
    }

    async fn delete_memories(&self, ids: &[String]) -> SiccResult<usize> {
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM sicc_memories WHERE id = ?1")?;
            for id in ids {
                removed += stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    async fn update_memory_relevance(&self, id: &str, relevance: f64) -> SiccResult<bool> {
        let db = self.db.lock().await;
        let changed = db.execute(
            "UPDATE sicc_memories SET relevance = ?2 WHERE id = ?1",
            params![id, relevance],
        )?;
        Ok(changed > 0)
    }

    async fn count_deleted_memories(&self) -> SiccResult<usize> {
        let db = self.db.lock().await;
        let count: i64 = db.query_row(
            "SELECT COUNT(*) FROM sicc_memories WHERE deleted_at IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    async fn search_similar_memories(
        &self,
        embedding: &[f32],
        max_results: usize,
        filters: &MemoryFilters,
    ) -> SiccResult<Vec<MemoryHit>> {
        let candidates = {
            let db = self.db.lock().await;
            Self::candidates(&db, filters)?
        };
        Ok(rank_by_vector(candidates, embedding, max_results, filters))
    }

    async fn search_memories_hybrid(
        &self,
        query_text: &str,
        embedding: &[f32],
        max_results: usize,
        weights: HybridWeights,
        filters: &MemoryFilters,
    ) -> SiccResult<Vec<MemoryHit>> {
        let candidates = {
            let db = self.db.lock().await;
            Self::candidates(&db, filters)?
        };
        Ok(rank_hybrid(
            candidates,
            query_text,
            embedding,
            max_results,
            weights,
            filters,
        ))
    }

    async fn upsert_pattern(&self, pattern: &Pattern) -> SiccResult<Pattern> {
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;

        let current: Option<i64> = tx
            .query_row(
                "SELECT version FROM sicc_patterns WHERE id = ?1",
                params![&pattern.id],
                |row| row.get(0),
            )
            .optional()?;

        let mut stored = pattern.clone();
        stored.version = current.map(|v| v as u64 + 1).unwrap_or(1);

        tx.execute(
            "INSERT INTO sicc_patterns (id, pattern_type, status, confidence, version, data_json, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                pattern_type = excluded.pattern_type,
                status = excluded.status,
                confidence = excluded.confidence,
                version = excluded.version,
                data_json = excluded.data_json,
                updated_at = excluded.updated_at",
            params![
                &stored.id,
                &stored.pattern_type,
                stored.status.as_str(),
                stored.confidence,
                stored.version as i64,
                serde_json::to_string(&stored)?,
                Utc::now().timestamp_millis(),
            ],
        )?;
        tx.commit()?;

        Ok(stored)
    }

    async fn get_pattern(&self, id: &str) -> SiccResult<Option<Pattern>> {
        let db = self.db.lock().await;
        Ok(db
            .query_row(
                "SELECT data_json, version FROM sicc_patterns WHERE id = ?1",
                params![id],
                row_to_pattern,
            )
            .optional()?)
    }

    async fn list_patterns(&self) -> SiccResult<Vec<Pattern>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare("SELECT data_json, version FROM sicc_patterns ORDER BY id ASC")?;
        let rows = stmt.query_map([], row_to_pattern)?;
        collect(rows)
    }

    async fn upsert_assignment(&self, assignment: &PatternAssignment) -> SiccResult<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO sicc_assignments (pattern_id, agent, confidence, data_json, assigned_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(pattern_id) DO UPDATE SET
                agent = excluded.agent,
                confidence = excluded.confidence,
                data_json = excluded.data_json,
                assigned_at = excluded.assigned_at",
            params![
                &assignment.pattern_id,
                assignment.agent.as_str(),
                assignment.confidence,
                serde_json::to_string(assignment)?,
                assignment.assigned_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    async fn list_assignments(&self) -> SiccResult<Vec<PatternAssignment>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare("SELECT data_json FROM sicc_assignments ORDER BY pattern_id ASC")?;
        let rows = stmt.query_map([], row_to_json::<PatternAssignment>)?;
        collect(rows)
    }

    async fn append_decision(&self, decision: &ApprovalDecision) -> SiccResult<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO sicc_decisions (learning_log_id, pattern_id, status, data_json, decided_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                &decision.learning_log_id,
                &decision.pattern_id,
                decision.status.as_str(),
                serde_json::to_string(decision)?,
                decision.decided_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    async fn list_decisions(&self, pattern_id: Option<&str>) -> SiccResult<Vec<ApprovalDecision>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT data_json FROM sicc_decisions
             WHERE (?1 IS NULL OR pattern_id = ?1)
             ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![pattern_id], row_to_json::<ApprovalDecision>)?;
        collect(rows)
    }

    async fn append_metric(&self, metric: &PerformanceMetric) -> SiccResult<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO sicc_metrics (id, metric_type, agent, data_json, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                &metric.id,
                metric.metric_type.as_str(),
                metric.agent.map(|a| a.as_str()),
                serde_json::to_string(metric)?,
                metric.recorded_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    async fn list_metrics(&self) -> SiccResult<Vec<PerformanceMetric>> {
        let db = self.db.lock().await;
        let mut stmt =
            db.prepare("SELECT data_json FROM sicc_metrics ORDER BY recorded_at ASC, seq ASC")?;
        let rows = stmt.query_map([], row_to_json::<PerformanceMetric>)?;
        collect(rows)
    }

    async fn save_conversation(&self, record: &ConversationRecord) -> SiccResult<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO sicc_conversations (id, data_json, started_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET data_json = excluded.data_json",
            params![
                &record.id,
                serde_json::to_string(record)?,
                record.started_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    async fn list_conversations(&self) -> SiccResult<Vec<ConversationRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare("SELECT data_json FROM sicc_conversations ORDER BY id ASC")?;
        let rows = stmt.query_map([], row_to_json::<ConversationRecord>)?;
        collect(rows)
    }

    async fn clear(&self) -> SiccResult<()> {
        let db = self.db.lock().await;
        db.execute_batch(
            "DELETE FROM sicc_memories;
             DELETE FROM sicc_patterns;
             DELETE FROM sicc_assignments;
             DELETE FROM sicc_decisions;
             DELETE FROM sicc_metrics;
             DELETE FROM sicc_conversations;",
        )?;
        Ok(())
    }
}
