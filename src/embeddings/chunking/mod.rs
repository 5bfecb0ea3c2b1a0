
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Configuration for transcript chunking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkerConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Characters of the previous chunk repeated at the start of the next.
    pub chunk_overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 100,
        }
    }
}

impl ChunkerConfig {
    /// Pending text shorter than this is left to accumulate instead of being
    /// embedded as an undersized chunk.
    pub fn min_index_len(&self) -> usize {
        self.chunk_size / 2
    }
}

/// Paragraph breaks are the preferred split points, then sentence endings,
/// then any whitespace.
const SENTENCE_SEPARATORS: [&str; 4] = [". ", "! ", "? ", "\n"];

/// Split text into overlapping chunks of at most `chunk_size` characters.
///
/// Split points are chosen at the latest paragraph boundary inside the
/// window, falling back to the latest sentence boundary, then whitespace,
/// then a hard cut. Consecutive chunks overlap by `chunk_overlap`
/// characters. The output is a pure function of the input and config, which
/// the indexer relies on for idempotence.
pub fn chunk_text(text: &str, config: &ChunkerConfig) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    if text.len() <= config.chunk_size {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let window_end = floor_char_boundary(text, (start + config.chunk_size).min(text.len()));

        if window_end == text.len() {
            push_chunk(&mut chunks, &text[start..]);
            break;
        }

        let split = find_split(text, start, window_end);
        push_chunk(&mut chunks, &text[start..split]);

        // Back up by the overlap, but always make forward progress.
        let mut next_start = floor_char_boundary(text, split.saturating_sub(config.chunk_overlap));
        if next_start <= start {
            next_start = ceil_char_boundary(text, start + 1);
        }
        start = next_start;
    }

    debug!(
        chunks = chunks.len(),
        text_len = text.len(),
        chunk_size = config.chunk_size,
        "chunked transcript text"
    );

    chunks
}

/// Pick the split point inside `(start, window_end]`, preferring paragraph
/// then sentence then whitespace boundaries.
fn find_split(text: &str, start: usize, window_end: usize) -> usize {
    let window = &text[start..window_end];

    if let Some(pos) = window.rfind("\n\n") {
        let split = start + pos + 2;
        if split > start {
            return split;
        }
    }

    let sentence_split = SENTENCE_SEPARATORS
        .iter()
        .filter_map(|sep| window.rfind(sep).map(|pos| pos + sep.len()))
        .max();
    if let Some(pos) = sentence_split {
        let split = start + pos;
        if split > start {
            return split;
        }
    }

    if let Some(pos) = window.rfind(' ') {
        let split = start + pos + 1;
        if split > start {
            return split;
        }
    }

    // No usable boundary; hard cut at the window edge.
    window_end
}

fn push_chunk(chunks: &mut Vec<String>, chunk: &str) {
    if !chunk.trim().is_empty() {
        chunks.push(chunk.to_string());
    }
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(text: &str, mut index: usize) -> usize {
    while index < text.len() && !text.is_char_boundary(index) {
        index += 1;
    }
    index
}
