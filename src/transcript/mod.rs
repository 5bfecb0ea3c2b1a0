#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// One segment of a lecture transcript as produced by the live-transcription
/// client.
///
/// Segments are append-only: the client re-submits the full transcript with
/// new segments at the tail, and the indexer only ever attaches
/// `embedding_ids`. Embedded segments always form a contiguous prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub text: String,
    #[serde(alias = "startOffsetSeconds")]
    pub start_offset_seconds: f64,
    /// Vector-store row ids covering this segment, in insertion order.
    /// `None` until the segment has been through an embedding round.
    #[serde(
        default,
        alias = "embeddingIds",
        skip_serializing_if = "Option::is_none"
    )]
    pub embedding_ids: Option<Vec<String>>,
}

impl TranscriptSegment {
    pub fn new(text: impl Into<String>, start_offset_seconds: f64) -> Self {
        Self {
            text: text.into(),
            start_offset_seconds,
            embedding_ids: None,
        }
    }

    pub fn is_embedded(&self) -> bool {
        self.embedding_ids.is_some()
    }
}

/// Result of comparing a stored transcript against a freshly submitted one.
#[derive(Debug, Clone, PartialEq)]
pub struct WatermarkSplit {
    /// Index of the last embedded stored segment, or `None` for an empty or
    /// fully unembedded transcript.
    pub watermark: Option<usize>,
    /// Number of leading incoming segments that are already covered.
    pub embedded_prefix_len: usize,
    /// Stored segments violated the contiguous-prefix invariant; everything
    /// must be re-embedded from scratch.
    pub needs_full_reindex: bool,
}

/// Scan the stored transcript for the embedding watermark and decide which
/// part of the incoming transcript still needs embedding.
///
/// The scan walks stored segments from index 0 and stops at the first
/// segment without `embedding_ids`; the watermark is the index just before
/// it. A stamped segment appearing *after* an unstamped one is a consistency
/// violation: it is logged and answered with a full re-index rather than an
/// error, trading duplicate embedding work for a correct index.
///
/// Submitting a transcript that is shorter than or reordered relative to the
/// stored one is undefined behavior; writers are expected to follow the
/// single-writer append-only discipline.
pub fn split_at_watermark(
    stored: &[TranscriptSegment],
    incoming: &[TranscriptSegment],
) -> WatermarkSplit {
    let mut watermark: Option<usize> = None;

    for (index, segment) in stored.iter().enumerate() {
        if segment.is_embedded() {
            watermark = Some(index);
        } else {
            // Anything stamped beyond the first gap is an invalid pattern.
            if stored[index..].iter().any(TranscriptSegment::is_embedded) {
                warn!(
                    gap_index = index,
                    stored_segments = stored.len(),
                    "embedded transcript segments are not a contiguous prefix; scheduling full re-index"
                );
                return WatermarkSplit {
                    watermark: None,
                    embedded_prefix_len: 0,
                    needs_full_reindex: true,
                };
            }
            break;
        }
    }

    let embedded_prefix_len = watermark.map_or(0, |w| w + 1).min(incoming.len());

    WatermarkSplit {
        watermark,
        embedded_prefix_len,
        needs_full_reindex: false,
    }
}

/// Total text length of the segments pending embedding.
pub fn pending_text_len(segments: &[TranscriptSegment]) -> usize {
    segments.iter().map(|s| s.text.len()).sum()
}

/// Concatenate segment texts for chunking, preserving segment order.
pub fn concatenated_text(segments: &[TranscriptSegment]) -> String {
    let mut text = String::with_capacity(pending_text_len(segments) + segments.len());
    for (i, segment) in segments.iter().enumerate() {
        if i > 0 && !text.ends_with(char::is_whitespace) {
            text.push(' ');
        }
        text.push_str(&segment.text);
    }
    text
}
