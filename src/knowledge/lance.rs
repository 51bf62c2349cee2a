//! LanceDB Vector Index - 디스크 영속 벡터 컬렉션
//!
//! 컬렉션 하나가 LanceDB 테이블 하나입니다.
//! 업서트는 `id` 기준 merge-insert라서 같은 청크가 두 번 들어가지 않습니다.
//! 컬렉션을 만든 임베딩 프로바이더는 테이블 스키마 메타데이터에 기록됩니다.
//! ref: https://lancedb.github.io/lancedb/

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int32Array, RecordBatch, RecordBatchIterator,
    StringArray,
};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::table::Table;
use lancedb::DistanceType;

use crate::error::RagError;

use super::vector::{
    check_dimensions, space_mismatch, EmbeddingSpace, Metadata, VectorEntry, VectorHit,
    VectorIndex,
};

/// 스키마 메타데이터 키 (컬렉션을 만든 임베딩 프로바이더)
const EMBEDDING_PROVIDER_KEY: &str = "lokal_rag.embedding_provider";

// ============================================================================
// LanceVectorIndex
// ============================================================================

/// LanceDB 벡터 인덱스 구현
pub struct LanceVectorIndex {
    path: PathBuf,
    name: String,
    space: EmbeddingSpace,
    schema: SchemaRef,
    table: Table,
}

impl LanceVectorIndex {
    /// DB 연결
    async fn connect(path: &Path) -> Result<Connection> {
        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid path encoding"))?;

        lancedb::connect(path_str)
            .execute()
            .await
            .context("Failed to connect to LanceDB")
    }

    async fn table_exists(db: &Connection, name: &str) -> Result<bool> {
        let names = db
            .table_names()
            .execute()
            .await
            .context("Failed to list LanceDB tables")?;
        Ok(names.iter().any(|n| n == name))
    }

    /// 컬렉션 열기 또는 생성 (인덱싱용)
    ///
    /// 이미 있는 컬렉션이 다른 임베딩 공간(프로바이더 또는 차원)으로 만들어졌으면 설정 에러입니다.
    pub async fn create_or_open(
        path: &Path,
        collection: &str,
        space: &EmbeddingSpace,
    ) -> std::result::Result<Self, RagError> {
        if !path.exists() {
            tokio::fs::create_dir_all(path)
                .await
                .with_context(|| format!("Failed to create index directory {:?}", path))?;
        }

        let db = Self::connect(path).await?;

        let table = if Self::table_exists(&db, collection).await? {
            db.open_table(collection)
                .execute()
                .await
                .context("Failed to open existing collection")?
        } else {
            tracing::info!(
                "Creating collection '{}' for embeddings from {} at {:?}",
                collection,
                space,
                path
            );
            db.create_empty_table(collection, Arc::new(Self::create_schema(space)))
                .execute()
                .await
                .context("Failed to create collection")?
        };

        let index = Self::from_table(path, collection, table).await?;
        if index.space != *space {
            return Err(space_mismatch(collection, &index.space, space));
        }
        Ok(index)
    }

    /// 기존 컬렉션 열기 (서빙용)
    ///
    /// 컬렉션이 없으면 인덱싱을 먼저 하라는 설정 에러를 돌려줍니다.
    pub async fn open(path: &Path, collection: &str) -> std::result::Result<Self, RagError> {
        let missing = || {
            RagError::configuration(
                format!("Collection '{}' not found at {:?}", collection, path),
                format!(
                    "Run `lokal-rag index --dir <documents> --collection {}` first.",
                    collection
                ),
            )
        };

        if !path.exists() {
            return Err(missing());
        }

        let db = Self::connect(path).await?;
        if !Self::table_exists(&db, collection).await? {
            return Err(missing());
        }

        let table = db
            .open_table(collection)
            .execute()
            .await
            .context("Failed to open collection")?;

        Self::from_table(path, collection, table).await
    }

    /// 테이블 스키마에서 임베딩 공간 복원
    async fn from_table(
        path: &Path,
        collection: &str,
        table: Table,
    ) -> std::result::Result<Self, RagError> {
        let schema = table.schema().await.context("Failed to read collection schema")?;
        let dimension = match schema
            .field_with_name("embedding")
            .context("Collection has no embedding column")?
            .data_type()
        {
            DataType::FixedSizeList(_, n) => *n as usize,
            other => {
                return Err(anyhow::anyhow!("Unexpected embedding column type: {:?}", other).into())
            }
        };

        let provider = schema.metadata().get(EMBEDDING_PROVIDER_KEY).ok_or_else(|| {
            RagError::configuration(
                format!(
                    "Collection '{}' does not record which embedding provider built it",
                    collection
                ),
                "Re-index into a new collection with `lokal-rag index --dir <documents> --collection <new name>`.",
            )
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            name: collection.to_string(),
            space: EmbeddingSpace::new(provider, dimension),
            schema,
            table,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 컬렉션 테이블 스키마
    fn create_schema(space: &EmbeddingSpace) -> Schema {
        let metadata = HashMap::from([(
            EMBEDDING_PROVIDER_KEY.to_string(),
            space.provider.clone(),
        )]);

        Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("source_id", DataType::Utf8, false),
            Field::new("chunk_index", DataType::Int32, false),
            Field::new("text", DataType::Utf8, false),
            Field::new("content_hash", DataType::Utf8, false),
            Field::new("metadata", DataType::Utf8, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    space.dimension as i32,
                ),
                false,
            ),
        ])
        .with_metadata(metadata)
    }

    /// 엔트리들을 Arrow RecordBatch로 변환
    fn entries_to_batch(&self, entries: &[VectorEntry]) -> Result<RecordBatch> {
        if entries.is_empty() {
            anyhow::bail!("Cannot create batch from empty entries");
        }

        let ids: Vec<&str> = entries.iter().map(|e| e.id.as_str()).collect();
        let sources: Vec<&str> = entries.iter().map(|e| e.source_id.as_str()).collect();
        let chunk_indices: Vec<i32> = entries.iter().map(|e| e.chunk_index as i32).collect();
        let texts: Vec<&str> = entries.iter().map(|e| e.text.as_str()).collect();
        let hashes: Vec<&str> = entries.iter().map(|e| e.content_hash.as_str()).collect();
        let metadata: Vec<String> = entries
            .iter()
            .map(|e| serde_json::to_string(&e.metadata))
            .collect::<std::result::Result<_, _>>()
            .context("Failed to serialize chunk metadata")?;

        // 임베딩을 FixedSizeList로 변환
        let embeddings_flat: Vec<f32> = entries
            .iter()
            .flat_map(|e| e.embedding.iter().copied())
            .collect();

        let values = Float32Array::from(embeddings_flat);
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let embeddings_list = FixedSizeListArray::try_new(
            field,
            self.space.dimension as i32,
            Arc::new(values) as Arc<dyn Array>,
            None,
        )
        .context("Failed to create embedding array")?;

        let batch = RecordBatch::try_new(
            Arc::clone(&self.schema),
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(StringArray::from(sources)),
                Arc::new(Int32Array::from(chunk_indices)),
                Arc::new(StringArray::from(texts)),
                Arc::new(StringArray::from(hashes)),
                Arc::new(StringArray::from(metadata)),
                Arc::new(embeddings_list),
            ],
        )
        .context("Failed to create RecordBatch")?;

        Ok(batch)
    }
}

/// 문자열 컬럼 추출
fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| anyhow::anyhow!("Missing {} column", name))
}

/// SQL 문자열 리터럴 이스케이프
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[async_trait]
impl VectorIndex for LanceVectorIndex {
    fn collection(&self) -> &str {
        &self.name
    }

    fn space(&self) -> &EmbeddingSpace {
        &self.space
    }

    async fn upsert(&self, entries: &[VectorEntry]) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }
        check_dimensions(entries, self.space.dimension)?;

        let batch = self.entries_to_batch(entries)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        let mut merge = self.table.merge_insert(&["id"]);
        merge
            .when_matched_update_all(None)
            .when_not_matched_insert_all();
        merge
            .execute(Box::new(batches))
            .await
            .context("Failed to upsert vectors")?;

        Ok(entries.len())
    }

    async fn delete(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let before_count = self.count().await?;

        let list = ids.iter().map(|id| quote(id)).collect::<Vec<_>>().join(", ");
        self.table
            .delete(&format!("id IN ({})", list))
            .await
            .context("Failed to delete vectors")?;

        let after_count = self.count().await?;
        Ok(before_count.saturating_sub(after_count))
    }

    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<VectorHit>> {
        if embedding.len() != self.space.dimension {
            anyhow::bail!(
                "Query embedding has dimension {}, collection '{}' expects {}",
                embedding.len(),
                self.name,
                self.space.dimension
            );
        }

        let stream = self
            .table
            .vector_search(embedding.to_vec())
            .context("Failed to create vector search")?
            .distance_type(DistanceType::Cosine)
            .limit(top_k)
            .execute()
            .await
            .context("Failed to execute vector search")?;

        let batches: Vec<RecordBatch> = stream.try_collect().await?;
        let mut hits = Vec::new();

        for batch in batches {
            let ids = string_column(&batch, "id")?;
            let texts = string_column(&batch, "text")?;
            let metadata = string_column(&batch, "metadata")?;

            // _distance 컬럼 (LanceDB가 자동 추가, 코사인 거리)
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| anyhow::anyhow!("Missing _distance column"))?;

            for i in 0..batch.num_rows() {
                let metadata: Metadata = serde_json::from_str(metadata.value(i))
                    .context("Failed to parse chunk metadata")?;

                hits.push(VectorHit {
                    id: ids.value(i).to_string(),
                    text: texts.value(i).to_string(),
                    metadata,
                    // 코사인 거리 -> 코사인 유사도
                    score: 1.0 - distances.value(i),
                });
            }
        }

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn count(&self) -> Result<usize> {
        self.table
            .count_rows(None)
            .await
            .context("Failed to count rows")
    }

    async fn list_ids(&self) -> Result<Vec<String>> {
        let stream = self
            .table
            .query()
            .execute()
            .await
            .context("Failed to scan collection")?;
        let batches: Vec<RecordBatch> = stream.try_collect().await?;

        let mut ids = Vec::new();
        for batch in batches {
            let column = string_column(&batch, "id")?;
            ids.extend((0..batch.num_rows()).map(|i| column.value(i).to_string()));
        }
        Ok(ids)
    }
}

// ============================================================================
// Tests
// ============================================================================
