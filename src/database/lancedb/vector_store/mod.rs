
use std::path::Path;
use std::sync::Arc;

use arrow::array::{
    Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray, UInt32Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use chrono::Utc;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::Connection;
use tracing::{debug, info};
use uuid::Uuid;

use super::{ChunkMetadata, NewEmbedding};
use crate::{LecternError, Result};

/// Upper bound on rows per insert request. Larger jobs are split into
/// multiple sequential requests.
pub const MAX_ROWS_PER_INSERT: usize = 1000;

const TABLE_NAME: &str = "embeddings";

/// Vector store backed by LanceDB, holding one row per transcript chunk.
pub struct VectorStore {
    connection: Connection,
    vector_dimension: usize,
}

/// One similarity-search hit.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub id: String,
    pub metadata: ChunkMetadata,
    pub distance: f32,
}

/// Scope restriction for similarity search.
#[derive(Debug, Clone, Copy)]
pub enum SearchScope<'a> {
    Lecture(&'a str),
    Course(&'a str),
}

impl VectorStore {
    pub async fn new<P: AsRef<Path>>(db_path: P, vector_dimension: usize) -> Result<Self> {
        let db_path = db_path.as_ref();
        debug!("Initializing LanceDB at path: {:?}", db_path);

        std::fs::create_dir_all(db_path)?;

        let uri = format!("file://{}", db_path.display());
        let connection = lancedb::connect(&uri)
            .execute()
            .await
            .map_err(|e| LecternError::Database(format!("Failed to connect to LanceDB: {e}")))?;

        let store = Self {
            connection,
            vector_dimension,
        };
        store.initialize_table().await?;

        info!("Vector store initialized successfully");
        Ok(store)
    }

    async fn initialize_table(&self) -> Result<()> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| LecternError::Database(format!("Failed to list tables: {e}")))?;

        if table_names.contains(&TABLE_NAME.to_string()) {
            debug!("Embeddings table already exists");
            return Ok(());
        }

        self.connection
            .create_empty_table(TABLE_NAME, self.schema())
            .execute()
            .await
            .map_err(|e| LecternError::Database(format!("Failed to create table: {e}")))?;

        info!(
            "Embeddings table created with {} dimensions",
            self.vector_dimension
        );
        Ok(())
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, false)),
                    self.vector_dimension as i32,
                ),
                false,
            ),
            Field::new("lecture_id", DataType::Utf8, false),
            Field::new("course_id", DataType::Utf8, true),
            Field::new("content", DataType::Utf8, false),
            Field::new("chunk_index", DataType::UInt32, false),
            Field::new("created_at", DataType::Utf8, false),
        ]))
    }

    /// Insert embeddings, splitting into requests of at most
    /// [`MAX_ROWS_PER_INSERT`] rows. Returns the generated row ids in the
    /// same order as the input.
    pub async fn insert_embeddings(&mut self, records: Vec<NewEmbedding>) -> Result<Vec<String>> {
        if records.is_empty() {
            debug!("No embeddings to store");
            return Ok(vec![]);
        }

        for record in &records {
            if record.vector.len() != self.vector_dimension {
                return Err(LecternError::DataConsistency(format!(
                    "Embedding dimension mismatch: expected {}, got {}",
                    self.vector_dimension,
                    record.vector.len()
                )));
            }
        }

        let ids: Vec<String> = records.iter().map(|_| Uuid::new_v4().to_string()).collect();

        let table = self.open_table().await?;
        for (record_window, id_window) in records
            .chunks(MAX_ROWS_PER_INSERT)
            .zip(ids.chunks(MAX_ROWS_PER_INSERT))
        {
            let batch = self.create_record_batch(record_window, id_window)?;
            let schema = batch.schema();
            let reader = RecordBatchIterator::new(std::iter::once(Ok(batch)), schema);
            table
                .add(reader)
                .execute()
                .await
                .map_err(|e| LecternError::Database(format!("Failed to insert embeddings: {e}")))?;
            debug!("Stored insert request of {} embeddings", record_window.len());
        }

        info!("Successfully stored {} embeddings", records.len());
        Ok(ids)
    }

    fn create_record_batch(&self, records: &[NewEmbedding], ids: &[String]) -> Result<RecordBatch> {
        let len = records.len();
        let created_at = Utc::now().to_rfc3339();

        let mut lecture_ids = Vec::with_capacity(len);
        let mut course_ids = Vec::with_capacity(len);
        let mut contents = Vec::with_capacity(len);
        let mut chunk_indices = Vec::with_capacity(len);
        let mut flat_values = Vec::with_capacity(len * self.vector_dimension);

        for record in records {
            lecture_ids.push(record.metadata.lecture_id.as_str());
            course_ids.push(record.metadata.course_id.as_deref());
            contents.push(record.metadata.content.as_str());
            chunk_indices.push(record.metadata.chunk_index);
            flat_values.extend_from_slice(&record.vector);
        }

        let item_field = Arc::new(Field::new("item", DataType::Float32, false));
        let vector_array = FixedSizeListArray::try_new(
            item_field,
            self.vector_dimension as i32,
            Arc::new(Float32Array::from(flat_values)),
            None,
        )
        .map_err(|e| LecternError::Database(format!("Failed to create vector array: {e}")))?;

        let id_strs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from(id_strs)),
            Arc::new(vector_array),
            Arc::new(StringArray::from(lecture_ids)),
            Arc::new(StringArray::from(course_ids)),
            Arc::new(StringArray::from(contents)),
            Arc::new(UInt32Array::from(chunk_indices)),
            Arc::new(StringArray::from(vec![created_at.as_str(); len])),
        ];

        RecordBatch::try_new(self.schema(), arrays)
            .map_err(|e| LecternError::Database(format!("Failed to create record batch: {e}")))
    }

    /// Similarity search restricted to one lecture or one course.
    pub async fn search_similar(
        &self,
        query_vector: &[f32],
        limit: usize,
        scope: SearchScope<'_>,
    ) -> Result<Vec<SearchResult>> {
        debug!("Searching for similar vectors with limit: {}", limit);

        let table = self.open_table().await?;
        let filter = match scope {
            SearchScope::Lecture(id) => format!("lecture_id = '{}'", escape_literal(id)),
            SearchScope::Course(id) => format!("course_id = '{}'", escape_literal(id)),
        };

        let mut results = table
            .vector_search(query_vector)
            .map_err(|e| LecternError::Database(format!("Failed to create vector search: {e}")))?
            .column("vector")
            .limit(limit)
            .only_if(filter)
            .execute()
            .await
            .map_err(|e| LecternError::Database(format!("Failed to execute search: {e}")))?;

        let mut search_results = Vec::new();
        while let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| LecternError::Database(format!("Failed to read result stream: {e}")))?
        {
            search_results.extend(parse_search_batch(&batch)?);
        }

        debug!("Parsed {} search results", search_results.len());
        Ok(search_results)
    }

    /// Delete every embedding row belonging to a lecture. Used when a
    /// transcript update invalidates previously indexed chunks.
    pub async fn delete_lecture_embeddings(&mut self, lecture_id: &str) -> Result<()> {
        debug!("Deleting embeddings for lecture: {}", lecture_id);

        let table = self.open_table().await?;
        let predicate = format!("lecture_id = '{}'", escape_literal(lecture_id));
        table.delete(&predicate).await.map_err(|e| {
            LecternError::Database(format!("Failed to delete lecture embeddings: {e}"))
        })?;

        info!("Deleted embeddings for lecture: {}", lecture_id);
        Ok(())
    }

    pub async fn count_embeddings(&self) -> Result<u64> {
        let table = self.open_table().await?;
        let count = table
            .count_rows(None)
            .await
            .map_err(|e| LecternError::Database(format!("Failed to count rows: {e}")))?;
        Ok(count as u64)
    }

    async fn open_table(&self) -> Result<lancedb::Table> {
        self.connection
            .open_table(TABLE_NAME)
            .execute()
            .await
            .map_err(|e| LecternError::Database(format!("Failed to open table: {e}")))
    }
}

fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .ok_or_else(|| LecternError::Database(format!("Missing {name} column")))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| LecternError::Database(format!("Invalid {name} column type")))
}

fn parse_search_batch(batch: &RecordBatch) -> Result<Vec<SearchResult>> {
    let ids = string_column(batch, "id")?;
    let lecture_ids = string_column(batch, "lecture_id")?;
    let course_ids = string_column(batch, "course_id")?;
    let contents = string_column(batch, "content")?;
    let created_ats = string_column(batch, "created_at")?;

    let chunk_indices = batch
        .column_by_name("chunk_index")
        .ok_or_else(|| LecternError::Database("Missing chunk_index column".to_string()))?
        .as_any()
        .downcast_ref::<UInt32Array>()
        .ok_or_else(|| LecternError::Database("Invalid chunk_index column type".to_string()))?;

    let distances = batch
        .column_by_name("_distance")
        .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

    let mut results = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let metadata = ChunkMetadata {
            lecture_id: lecture_ids.value(row).to_string(),
            course_id: if course_ids.is_null(row) {
                None
            } else {
                Some(course_ids.value(row).to_string())
            },
            content: contents.value(row).to_string(),
            chunk_index: chunk_indices.value(row),
            created_at: created_ats.value(row).to_string(),
        };

        let distance =
            distances.map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) });

        results.push(SearchResult {
            id: ids.value(row).to_string(),
            metadata,
            distance,
        });
    }

    Ok(results)
}
