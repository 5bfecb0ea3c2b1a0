#[cfg(test)]
mod tests;

use std::sync::Arc;

use chrono::Utc;
use itertools::Itertools;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::Result;
use crate::database::lancedb::vector_store::VectorStore;
use crate::database::lancedb::{ChunkMetadata, NewEmbedding};
use crate::database::sqlite::Database;
use crate::database::sqlite::models::Lecture;
use crate::embeddings::chunking::{ChunkerConfig, chunk_text};
use crate::embeddings::client::EmbeddingClient;
use crate::transcript::{
    TranscriptSegment, concatenated_text, pending_text_len, split_at_watermark,
};

/// What an indexing round did, for logging and the transcript-update
/// response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IndexingOutcome {
    pub segments_total: usize,
    pub segments_embedded: usize,
    pub chunks_embedded: usize,
    /// Pending text was below the embedding threshold and was left to
    /// accumulate.
    pub deferred: bool,
    /// The stored transcript violated the watermark invariant and was
    /// re-embedded from scratch.
    pub full_reindex: bool,
}

/// Incremental transcript indexer. Each transcript submission is compared
/// against the stored copy; only the unembedded suffix is chunked and
/// embedded, and the combined transcript is persisted with fresh embedding
/// id stamps.
pub struct TranscriptIndexer {
    database: Database,
    vector_store: Arc<Mutex<VectorStore>>,
    embedding_client: EmbeddingClient,
    chunker_config: ChunkerConfig,
}

impl TranscriptIndexer {
    pub fn new(
        database: Database,
        vector_store: Arc<Mutex<VectorStore>>,
        embedding_client: EmbeddingClient,
        chunker_config: ChunkerConfig,
    ) -> Self {
        Self {
            database,
            vector_store,
            embedding_client,
            chunker_config,
        }
    }

    /// Apply one transcript submission for a lecture.
    ///
    /// Embedding-id stamps are written only after the vector rows exist, so
    /// a crash between the insert and the stamp re-embeds the same text on
    /// the next round (at-least-once; orphaned rows are tolerated, missing
    /// coverage is not).
    pub async fn apply_transcript_update(
        &self,
        lecture: &Lecture,
        incoming: Vec<TranscriptSegment>,
    ) -> Result<IndexingOutcome> {
        let stored = self.database.get_transcript(&lecture.id).await?;
        let split = split_at_watermark(&stored, &incoming);

        let mut combined = incoming;
        let mut outcome = IndexingOutcome {
            segments_total: combined.len(),
            full_reindex: split.needs_full_reindex,
            ..IndexingOutcome::default()
        };

        if split.needs_full_reindex {
            warn!(lecture_id = %lecture.id, "re-embedding entire transcript");
            self.vector_store
                .lock()
                .await
                .delete_lecture_embeddings(&lecture.id)
                .await?;
            for segment in &mut combined {
                segment.embedding_ids = None;
            }
        } else {
            // Carry the stored stamps onto the already-covered prefix.
            for (segment, stored_segment) in combined
                .iter_mut()
                .zip(&stored)
                .take(split.embedded_prefix_len)
            {
                segment.embedding_ids = stored_segment.embedding_ids.clone();
            }
        }

        let prefix_len = if split.needs_full_reindex {
            0
        } else {
            split.embedded_prefix_len
        };
        let pending = &combined[prefix_len..];
        let pending_len = pending_text_len(pending);

        if pending.is_empty() || pending_len < self.chunker_config.min_index_len() {
            debug!(
                lecture_id = %lecture.id,
                pending_len,
                threshold = self.chunker_config.min_index_len(),
                "pending transcript text below embedding threshold, deferring"
            );
            outcome.deferred = !pending.is_empty();
            self.persist(lecture, &combined).await?;
            return Ok(outcome);
        }

        let text = concatenated_text(pending);
        let chunks = chunk_text(&text, &self.chunker_config);
        let vectors = self.embedding_client.embed_batch(&chunks).await?;

        let chunk_offset = prior_chunk_count(&combined[..prefix_len]);
        let created_at = Utc::now().to_rfc3339();
        let records = chunks
            .iter()
            .zip(vectors)
            .enumerate()
            .map(|(index, (content, vector))| NewEmbedding {
                vector,
                metadata: ChunkMetadata {
                    lecture_id: lecture.id.clone(),
                    course_id: lecture.course_id.clone(),
                    content: content.clone(),
                    chunk_index: (chunk_offset + index) as u32,
                    created_at: created_at.clone(),
                },
            })
            .collect();

        let ids = self
            .vector_store
            .lock()
            .await
            .insert_embeddings(records)
            .await?;

        // Chunks span segment boundaries, so every segment in the round
        // gets the round's full id list.
        stamp_segments(&mut combined[prefix_len..], &ids);

        outcome.segments_embedded = combined.len() - prefix_len;
        outcome.chunks_embedded = ids.len();

        self.persist(lecture, &combined).await?;

        info!(
            lecture_id = %lecture.id,
            segments = outcome.segments_total,
            embedded = outcome.segments_embedded,
            chunks = outcome.chunks_embedded,
            "indexed transcript update"
        );
        Ok(outcome)
    }

    async fn persist(&self, lecture: &Lecture, segments: &[TranscriptSegment]) -> Result<()> {
        self.database
            .replace_transcript(&lecture.id, segments)
            .await?;
        self.database.touch_lecture(&lecture.id).await
    }
}

/// Number of distinct vector rows covering the already-embedded prefix.
/// Segments embedded in the same round share an id list, so duplicates are
/// collapsed.
pub(crate) fn prior_chunk_count(prefix: &[TranscriptSegment]) -> usize {
    prefix
        .iter()
        .filter_map(|s| s.embedding_ids.as_ref())
        .flatten()
        .unique()
        .count()
}

pub(crate) fn stamp_segments(segments: &mut [TranscriptSegment], ids: &[String]) {
    for segment in segments {
        segment.embedding_ids = Some(ids.to_vec());
    }
}
