use super::*;

fn stamped(text: &str, ids: &[&str]) -> TranscriptSegment {
    TranscriptSegment {
        text: text.to_string(),
        start_offset_seconds: 0.0,
        embedding_ids: Some(ids.iter().map(|id| (*id).to_string()).collect()),
    }
}

#[test]
fn prior_chunk_count_collapses_shared_round_ids() {
    // Two segments embedded in the same round carry identical id lists.
    let prefix = vec![
        stamped("a", &["e1", "e2"]),
        stamped("b", &["e1", "e2"]),
        stamped("c", &["e3"]),
    ];
    assert_eq!(prior_chunk_count(&prefix), 3);
}

#[test]
fn prior_chunk_count_ignores_unstamped_segments() {
    let prefix = vec![stamped("a", &["e1"]), TranscriptSegment::new("b", 10.0)];
    assert_eq!(prior_chunk_count(&prefix), 1);
}

#[test]
fn prior_chunk_count_of_empty_prefix_is_zero() {
    assert_eq!(prior_chunk_count(&[]), 0);
}

#[test]
fn stamping_gives_every_segment_the_full_id_list() {
    let mut segments = vec![
        TranscriptSegment::new("c", 20.0),
        TranscriptSegment::new("d", 30.0),
    ];
    let ids = vec!["e4".to_string(), "e5".to_string()];

    stamp_segments(&mut segments, &ids);

    for segment in &segments {
        assert_eq!(segment.embedding_ids.as_deref(), Some(ids.as_slice()));
    }
}

#[test]
fn outcome_default_reports_nothing_embedded() {
    let outcome = IndexingOutcome::default();
    assert_eq!(outcome.chunks_embedded, 0);
    assert!(!outcome.deferred);
    assert!(!outcome.full_reindex);
}
