use super::*;

fn unembedded(text: &str) -> TranscriptSegment {
    TranscriptSegment::new(text, 0.0)
}

fn embedded(text: &str, ids: &[&str]) -> TranscriptSegment {
    TranscriptSegment {
        text: text.to_string(),
        start_offset_seconds: 0.0,
        embedding_ids: Some(ids.iter().map(|id| (*id).to_string()).collect()),
    }
}

#[test]
fn empty_stored_transcript_has_no_watermark() {
    let incoming = vec![unembedded("a"), unembedded("b")];
    let split = split_at_watermark(&[], &incoming);
    assert_eq!(split.watermark, None);
    assert_eq!(split.embedded_prefix_len, 0);
    assert!(!split.needs_full_reindex);
}

#[test]
fn fully_unembedded_stored_transcript() {
    let stored = vec![unembedded("a"), unembedded("b")];
    let split = split_at_watermark(&stored, &stored);
    assert_eq!(split.watermark, None);
    assert_eq!(split.embedded_prefix_len, 0);
}

#[test]
fn watermark_at_last_embedded_segment() {
    let stored = vec![
        embedded("a", &["e1"]),
        embedded("b", &["e1"]),
        unembedded("c"),
    ];
    let incoming = vec![
        embedded("a", &["e1"]),
        embedded("b", &["e1"]),
        unembedded("c"),
        unembedded("d"),
    ];
    let split = split_at_watermark(&stored, &incoming);
    assert_eq!(split.watermark, Some(1));
    assert_eq!(split.embedded_prefix_len, 2);
    assert!(!split.needs_full_reindex);
}

#[test]
fn fully_embedded_transcript_leaves_only_new_tail() {
    let stored = vec![embedded("a", &["e1"]), embedded("b", &["e1"])];
    let incoming = vec![
        embedded("a", &["e1"]),
        embedded("b", &["e1"]),
        unembedded("c"),
    ];
    let split = split_at_watermark(&stored, &incoming);
    assert_eq!(split.watermark, Some(1));
    assert_eq!(split.embedded_prefix_len, 2);
}

#[test]
fn gap_pattern_triggers_full_reindex() {
    // Embedded segment after an unembedded one violates the prefix invariant.
    let stored = vec![embedded("a", &["e1"]), unembedded("b"), embedded("c", &["e2"])];
    let split = split_at_watermark(&stored, &stored);
    assert!(split.needs_full_reindex);
    assert_eq!(split.watermark, None);
    assert_eq!(split.embedded_prefix_len, 0);
}

#[test]
fn resubmitting_unchanged_transcript_leaves_nothing_pending() {
    let stored = vec![embedded("a", &["e1"]), embedded("b", &["e1"])];
    let split = split_at_watermark(&stored, &stored);
    assert_eq!(split.embedded_prefix_len, stored.len());
    assert!(!split.needs_full_reindex);
}

#[test]
fn pending_text_len_sums_segment_text() {
    let segments = vec![unembedded("abc"), unembedded("defgh")];
    assert_eq!(pending_text_len(&segments), 8);
}

#[test]
fn concatenated_text_inserts_separators() {
    let segments = vec![unembedded("one"), unembedded("two "), unembedded("three")];
    assert_eq!(concatenated_text(&segments), "one two three");
}

#[test]
fn segment_json_accepts_camel_case_aliases() {
    let json = r#"{"text":"hi","startOffsetSeconds":12.5,"embeddingIds":["e1"]}"#;
    let segment: TranscriptSegment = serde_json::from_str(json).expect("parses");
    assert_eq!(segment.text, "hi");
    assert!((segment.start_offset_seconds - 12.5).abs() < f64::EPSILON);
    assert_eq!(segment.embedding_ids, Some(vec!["e1".to_string()]));
}
