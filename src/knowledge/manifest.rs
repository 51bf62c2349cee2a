//! Index Manifest - rusqlite 기반 인덱싱 기록
//!
//! 컬렉션별로 어떤 청크가 어떤 내용 해시로 인덱싱됐는지 기록합니다.
//! 재인덱싱 시 바뀌지 않은 청크는 임베딩을 건너뛰고, 사라진 청크는 삭제 대상이 됩니다.
//! 건너뛰기는 같은 임베딩 공간(`EmbeddingSpace::key`)으로 기록된 청크에만 적용됩니다.
//! 저장 위치: <index.path>/manifest.db

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use serde::Serialize;

// ============================================================================
// Types
// ============================================================================

/// 기록할 청크 정보
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub chunk_id: String,
    pub source_id: String,
    pub chunk_index: u32,
    pub content_hash: String,
}

/// 매니페스트 통계
#[derive(Debug, Clone, Serialize)]
pub struct ManifestStats {
    pub chunk_count: usize,
    pub source_count: usize,
    pub last_indexed: Option<DateTime<Utc>>,
    pub db_path: PathBuf,
}

// ============================================================================
// IndexManifest
// ============================================================================

/// 인덱싱 매니페스트
#[derive(Clone)]
pub struct IndexManifest {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl IndexManifest {
    /// 매니페스트 열기 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create manifest directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open manifest database")?;

        let manifest = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        manifest.initialize()?;
        Ok(manifest)
    }

    /// 읽기 전용으로 열기 (없으면 None)
    pub fn open_existing(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        Self::open(path).map(Some)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS chunks (
                collection TEXT NOT NULL,
                chunk_id TEXT NOT NULL,
                source_id TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                content_hash TEXT NOT NULL,
                embedding TEXT NOT NULL DEFAULT '',
                indexed_at TEXT NOT NULL,
                PRIMARY KEY (collection, chunk_id)
            )",
            [],
        )
        .context("Failed to create chunks table")?;

        // 임베딩 공간 열이 없던 매니페스트 마이그레이션
        let has_embedding = conn
            .prepare("SELECT name FROM pragma_table_info('chunks') WHERE name = 'embedding'")?
            .exists([])?;
        if !has_embedding {
            conn.execute(
                "ALTER TABLE chunks ADD COLUMN embedding TEXT NOT NULL DEFAULT ''",
                [],
            )
            .context("Failed to add embedding column")?;
            tracing::info!("Migrated index manifest at {:?}", self.db_path);
        }

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(collection, source_id)",
            [],
        )
        .context("Failed to create source index")?;

        tracing::debug!("Index manifest initialized at {:?}", self.db_path);
        Ok(())
    }

    /// 컬렉션의 청크 ID → 내용 해시
    ///
    /// `embedding` 공간으로 기록된 청크만 돌려줍니다. 다른 공간의 청크는 다시 임베딩해야 합니다.
    pub fn chunk_hashes(
        &self,
        collection: &str,
        embedding: &str,
    ) -> Result<HashMap<String, String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT chunk_id, content_hash FROM chunks
             WHERE collection = ?1 AND embedding = ?2",
        )?;

        let rows = stmt.query_map(params![collection, embedding], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut hashes = HashMap::new();
        for row in rows {
            let (id, hash) = row?;
            hashes.insert(id, hash);
        }
        Ok(hashes)
    }

    /// 소스 하나의 청크 ID 목록
    pub fn chunk_ids_for_source(&self, collection: &str, source_id: &str) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT chunk_id FROM chunks
             WHERE collection = ?1 AND source_id = ?2
             ORDER BY chunk_index",
        )?;

        let ids = stmt
            .query_map(params![collection, source_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    /// 청크 기록 (같은 ID면 덮어쓰기, 한 트랜잭션)
    pub fn record(
        &self,
        collection: &str,
        embedding: &str,
        entries: &[ManifestEntry],
    ) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let mut conn = self.lock()?;
        let now = Utc::now().to_rfc3339();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO chunks
                    (collection, chunk_id, source_id, chunk_index, content_hash, embedding, indexed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for entry in entries {
                stmt.execute(params![
                    collection,
                    entry.chunk_id,
                    entry.source_id,
                    entry.chunk_index,
                    entry.content_hash,
                    embedding,
                    now
                ])?;
            }
        }
        tx.commit().context("Failed to commit manifest entries")?;

        Ok(entries.len())
    }

    /// 청크 기록 삭제
    pub fn remove(&self, collection: &str, chunk_ids: &[String]) -> Result<usize> {
        if chunk_ids.is_empty() {
            return Ok(0);
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut removed = 0;
        {
            let mut stmt =
                tx.prepare("DELETE FROM chunks WHERE collection = ?1 AND chunk_id = ?2")?;
            for id in chunk_ids {
                removed += stmt.execute(params![collection, id])?;
            }
        }
        tx.commit().context("Failed to commit manifest removal")?;

        Ok(removed)
    }

    /// 컬렉션 기록 전체 삭제
    pub fn reset(&self, collection: &str) -> Result<usize> {
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM chunks WHERE collection = ?1", params![collection])?;
        tracing::info!("Reset manifest for '{}' ({} entries)", collection, removed);
        Ok(removed)
    }

    /// 컬렉션 청크 수
    pub fn count(&self, collection: &str) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chunks WHERE collection = ?1",
            params![collection],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// 컬렉션 통계
    pub fn stats(&self, collection: &str) -> Result<ManifestStats> {
        let conn = self.lock()?;

        let (chunks, sources, last): (i64, i64, Option<String>) = conn.query_row(
            "SELECT COUNT(*), COUNT(DISTINCT source_id), MAX(indexed_at)
             FROM chunks WHERE collection = ?1",
            params![collection],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        Ok(ManifestStats {
            chunk_count: chunks as usize,
            source_count: sources as usize,
            last_indexed: last.and_then(parse_datetime),
            db_path: self.db_path.clone(),
        })
    }
}

/// RFC3339 문자열을 DateTime<Utc>로 파싱
fn parse_datetime(s: String) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

// ============================================================================
// Tests
// ============================================================================
