//! End-to-end indexing rounds against a mock embedding service and a
//! scratch vector store, following a live lecture as its transcript grows.

use std::sync::Arc;

use tempfile::TempDir;
use tokio::sync::Mutex;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use lectern::config::EmbeddingConfig;
use lectern::database::lancedb::vector_store::VectorStore;
use lectern::database::sqlite::Database;
use lectern::database::sqlite::models::NewLecture;
use lectern::embeddings::chunking::ChunkerConfig;
use lectern::embeddings::client::EmbeddingClient;
use lectern::indexer::TranscriptIndexer;
use lectern::transcript::TranscriptSegment;

const TEST_DIM: usize = 5;

fn embedding_config_for(server: &MockServer) -> EmbeddingConfig {
    let uri = url::Url::parse(&server.uri()).expect("mock server uri parses");
    EmbeddingConfig {
        host: uri.host_str().expect("mock server has host").to_string(),
        port: uri.port().expect("mock server has port"),
        ..EmbeddingConfig::default()
    }
}

fn segment(len: usize, seed: usize) -> TranscriptSegment {
    // Sentence-shaped filler so the chunker has boundaries to work with.
    let sentence = format!("Segment {seed} of the lecture continues. ");
    let mut text = String::new();
    while text.len() < len {
        text.push_str(&sentence);
    }
    text.truncate(len);
    TranscriptSegment::new(text, seed as f64 * 30.0)
}

async fn build_indexer(
    server: &MockServer,
) -> (TranscriptIndexer, Database, Arc<Mutex<VectorStore>>, TempDir) {
    let temp_dir = TempDir::new().expect("temp dir");
    let database = Database::new_in_memory().await.expect("database opens");
    let vector_store = Arc::new(Mutex::new(
        VectorStore::new(temp_dir.path().join("vectors"), TEST_DIM)
            .await
            .expect("vector store opens"),
    ));
    let client = EmbeddingClient::new(&embedding_config_for(server)).expect("client builds");
    let indexer = TranscriptIndexer::new(
        database.clone(),
        Arc::clone(&vector_store),
        client,
        ChunkerConfig::default(),
    );
    (indexer, database, vector_store, temp_dir)
}

#[tokio::test]
async fn rounds_advance_the_watermark_and_defer_short_suffixes() {
    let server = MockServer::start().await;
    // Exactly one embedding request across all three rounds: the first and
    // third rounds defer because their pending text is under half a chunk.
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "embeddings": [[0.1, 0.2, 0.3, 0.4, 0.5]] })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (indexer, database, vector_store, _temp_dir) = build_indexer(&server).await;
    let lecture = database
        .create_lecture(NewLecture {
            id: "lec-1".to_string(),
            course_id: None,
            owner_id: "user-1".to_string(),
            title: "Optics".to_string(),
        })
        .await
        .expect("lecture created");

    // Round 1: A,B. 400 chars pending, below the 500-char threshold.
    let outcome = indexer
        .apply_transcript_update(&lecture, vec![segment(200, 0), segment(200, 1)])
        .await
        .expect("round 1 applies");
    assert!(outcome.deferred);
    assert_eq!(outcome.chunks_embedded, 0);

    let stored = database
        .get_transcript(&lecture.id)
        .await
        .expect("transcript loads");
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().all(|s| !s.is_embedded()));

    // Round 2: A-D. 800 chars pending, one chunk, everything stamped with
    // the same id list.
    let incoming: Vec<TranscriptSegment> = (0..4).map(|i| segment(200, i)).collect();
    let outcome = indexer
        .apply_transcript_update(&lecture, incoming)
        .await
        .expect("round 2 applies");
    assert!(!outcome.deferred);
    assert_eq!(outcome.segments_embedded, 4);
    assert_eq!(outcome.chunks_embedded, 1);

    let stored = database
        .get_transcript(&lecture.id)
        .await
        .expect("transcript loads");
    assert_eq!(stored.len(), 4);
    let first_ids = stored[0].embedding_ids.clone().expect("stamped");
    assert_eq!(first_ids.len(), 1);
    for segment in &stored {
        assert_eq!(segment.embedding_ids.as_ref(), Some(&first_ids));
    }
    assert_eq!(
        vector_store
            .lock()
            .await
            .count_embeddings()
            .await
            .expect("count"),
        1
    );

    // Round 3: A-E. Only E is pending and it is below the threshold, so
    // nothing is embedded and E stays unstamped.
    let mut incoming: Vec<TranscriptSegment> = (0..4).map(|i| segment(200, i)).collect();
    incoming.push(segment(200, 4));
    let outcome = indexer
        .apply_transcript_update(&lecture, incoming)
        .await
        .expect("round 3 applies");
    assert!(outcome.deferred);
    assert_eq!(outcome.chunks_embedded, 0);

    let stored = database
        .get_transcript(&lecture.id)
        .await
        .expect("transcript loads");
    assert_eq!(stored.len(), 5);
    assert_eq!(stored[3].embedding_ids.as_ref(), Some(&first_ids));
    assert!(!stored[4].is_embedded());
}

#[tokio::test]
async fn resubmitting_an_unchanged_transcript_makes_no_embedding_calls() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "embeddings": [[0.1, 0.2, 0.3, 0.4, 0.5]] })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (indexer, database, _vector_store, _temp_dir) = build_indexer(&server).await;
    let lecture = database
        .create_lecture(NewLecture {
            id: "lec-1".to_string(),
            course_id: None,
            owner_id: "user-1".to_string(),
            title: "Optics".to_string(),
        })
        .await
        .expect("lecture created");

    let incoming: Vec<TranscriptSegment> = (0..4).map(|i| segment(200, i)).collect();
    indexer
        .apply_transcript_update(&lecture, incoming.clone())
        .await
        .expect("first submission applies");

    // The retry carries no embedding ids; the stored watermark supplies
    // them and the pending suffix is empty.
    let outcome = indexer
        .apply_transcript_update(&lecture, incoming)
        .await
        .expect("retry applies");
    assert_eq!(outcome.chunks_embedded, 0);
    assert!(!outcome.deferred);

    let stored = database
        .get_transcript(&lecture.id)
        .await
        .expect("transcript loads");
    assert!(stored.iter().all(TranscriptSegment::is_embedded));
}

#[tokio::test]
async fn watermark_gap_triggers_a_full_reindex() {
    let server = MockServer::start().await;
    // One request for the initial indexing, one for the repair round.
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "embeddings": [[0.1, 0.2, 0.3, 0.4, 0.5]] })),
        )
        .expect(2)
        .mount(&server)
        .await;

    let (indexer, database, vector_store, _temp_dir) = build_indexer(&server).await;
    let lecture = database
        .create_lecture(NewLecture {
            id: "lec-1".to_string(),
            course_id: None,
            owner_id: "user-1".to_string(),
            title: "Optics".to_string(),
        })
        .await
        .expect("lecture created");

    let incoming: Vec<TranscriptSegment> = (0..4).map(|i| segment(200, i)).collect();
    indexer
        .apply_transcript_update(&lecture, incoming.clone())
        .await
        .expect("initial round applies");

    // Corrupt the stored pattern: clear the stamp in the middle.
    let mut corrupted = database
        .get_transcript(&lecture.id)
        .await
        .expect("transcript loads");
    corrupted[1].embedding_ids = None;
    database
        .replace_transcript(&lecture.id, &corrupted)
        .await
        .expect("corruption written");

    let outcome = indexer
        .apply_transcript_update(&lecture, incoming)
        .await
        .expect("repair round applies");
    assert!(outcome.full_reindex);
    assert_eq!(outcome.segments_embedded, 4);

    // The old rows were dropped before re-embedding.
    assert_eq!(
        vector_store
            .lock()
            .await
            .count_embeddings()
            .await
            .expect("count"),
        1
    );
    let stored = database
        .get_transcript(&lecture.id)
        .await
        .expect("transcript loads");
    assert!(stored.iter().all(TranscriptSegment::is_embedded));
}
