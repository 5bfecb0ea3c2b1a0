// LanceDB vector database module
// Stores transcript chunk embeddings and serves similarity search.


pub mod vector_store;

use serde::{Deserialize, Serialize};

/// One transcript chunk ready to be written to the vector store. The row id
/// is generated at insert time and returned to the caller for stamping onto
/// transcript segments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEmbedding {
    /// The vector embedding (768 dimensions for nomic-embed-text)
    pub vector: Vec<f32>,
    /// Metadata about the chunk this embedding represents
    pub metadata: ChunkMetadata,
}

/// Metadata stored alongside each embedding row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Lecture the chunk was extracted from
    pub lecture_id: String,
    /// Course the lecture belongs to, if any; enables course-wide search
    pub course_id: Option<String>,
    /// The chunk text itself
    pub content: String,
    /// Position of this chunk within the lecture's chunk sequence
    pub chunk_index: u32,
    /// RFC 3339 timestamp of when the embedding was written
    pub created_at: String,
}
