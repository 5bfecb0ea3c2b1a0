use super::*;
use crate::database::sqlite::models::NewLecture;

async fn test_coordinator() -> StreamCoordinator {
    let database = Database::new_in_memory().await.expect("database opens");
    let generation =
        GenerationClient::new(&GenerationConfig::default()).expect("client builds");
    StreamCoordinator::new(
        database,
        generation,
        ContextConfig::default(),
        GenerationConfig::default(),
        Arc::new(OwnerOnlyGuard),
        Arc::new(NoopToolRunner),
    )
}

fn request(id: &str, message: &str) -> ChatRequest {
    ChatRequest {
        id: id.to_string(),
        message: message.to_string(),
        attachments: vec![],
    }
}

async fn seed_lecture(coordinator: &StreamCoordinator, owner_id: &str) -> Lecture {
    coordinator
        .database
        .create_lecture(NewLecture {
            id: "lec-1".to_string(),
            course_id: None,
            owner_id: owner_id.to_string(),
            title: "Thermodynamics".to_string(),
        })
        .await
        .expect("lecture created")
}

#[test]
fn rejects_blank_message_id() {
    let result = request("  ", "hello").validate();
    assert!(matches!(result, Err(LecternError::Validation(_))));
}

#[test]
fn rejects_blank_message_text() {
    let result = request("m1", "   ").validate();
    assert!(matches!(result, Err(LecternError::Validation(_))));
}

#[test]
fn turn_states_render_snake_case() {
    assert_eq!(TurnState::ContextAssembled.to_string(), "context_assembled");
    assert_eq!(TurnState::Failed.to_string(), "failed");
}

#[tokio::test]
async fn owner_only_guard_matches_on_identity() {
    assert!(OwnerOnlyGuard.can_access("user-1", "user-1").await);
    assert!(!OwnerOnlyGuard.can_access("user-2", "user-1").await);
}

#[tokio::test]
async fn noop_tool_runner_reports_unavailable() {
    let output = NoopToolRunner
        .run("lookup_slide", &serde_json::json!({}))
        .await
        .expect("runner never fails");
    assert!(output.contains("lookup_slide"));
    assert!(output.contains("not available"));
}

#[test]
fn history_keeps_only_visible_text() {
    let now = chrono::Utc::now().naive_utc();
    let history = vec![
        Message {
            id: "m1".to_string(),
            lecture_id: Some("lec-1".to_string()),
            chat_id: None,
            role: MessageRole::User,
            parts: vec![MessagePart::Text {
                text: "question".to_string(),
            }],
            attachments: vec![],
            created_at: now,
        },
        Message {
            id: "m2".to_string(),
            lecture_id: Some("lec-1".to_string()),
            chat_id: None,
            role: MessageRole::Assistant,
            parts: vec![
                MessagePart::Reasoning {
                    text: "private thinking".to_string(),
                },
                MessagePart::ToolCall {
                    name: "lookup_slide".to_string(),
                    arguments: serde_json::json!({}),
                },
                MessagePart::Text {
                    text: "answer".to_string(),
                },
            ],
            attachments: vec![],
            created_at: now,
        },
    ];

    let prompt = history_to_prompt(&history);

    assert_eq!(prompt.len(), 2);
    assert_eq!(prompt[1].role, "assistant");
    assert_eq!(prompt[1].content, "answer");
    assert!(!prompt.iter().any(|m| m.content.contains("private thinking")));
}

#[tokio::test]
async fn prepare_turn_rejects_non_owner() {
    let coordinator = test_coordinator().await;
    let lecture = seed_lecture(&coordinator, "owner").await;

    let result = coordinator
        .prepare_turn("intruder", ChatScope::Lecture(lecture), request("m1", "hi"))
        .await;

    assert!(matches!(result, Err(LecternError::Authorization(_))));
}

#[tokio::test]
async fn prepare_turn_persists_the_user_message() {
    let coordinator = test_coordinator().await;
    let lecture = seed_lecture(&coordinator, "owner").await;

    let prepared = coordinator
        .prepare_turn(
            "owner",
            ChatScope::Lecture(lecture.clone()),
            request("m1", "What is entropy?"),
        )
        .await
        .expect("turn prepares");

    let messages = coordinator
        .database
        .list_lecture_messages(&lecture.id)
        .await
        .expect("messages listed");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, "m1");
    assert_eq!(messages[0].role, MessageRole::User);
    assert_eq!(prepared.owner, MessageOwner::Lecture(lecture.id));
}

#[tokio::test]
async fn retried_prepare_does_not_duplicate_the_user_message() {
    let coordinator = test_coordinator().await;
    let lecture = seed_lecture(&coordinator, "owner").await;

    for _ in 0..2 {
        coordinator
            .prepare_turn(
                "owner",
                ChatScope::Lecture(lecture.clone()),
                request("m1", "What is entropy?"),
            )
            .await
            .expect("turn prepares");
    }

    let messages = coordinator
        .database
        .list_lecture_messages(&lecture.id)
        .await
        .expect("messages listed");
    assert_eq!(messages.len(), 1);
}

#[tokio::test]
async fn prompt_starts_with_the_system_message_and_ends_with_the_user() {
    let coordinator = test_coordinator().await;
    let lecture = seed_lecture(&coordinator, "owner").await;

    coordinator
        .database
        .replace_transcript(&lecture.id, &[crate::transcript::TranscriptSegment::new(
            "Entropy measures disorder in a closed system.",
            0.0,
        )])
        .await
        .expect("transcript stored");

    let prepared = coordinator
        .prepare_turn(
            "owner",
            ChatScope::Lecture(lecture),
            request("m1", "What is entropy?"),
        )
        .await
        .expect("turn prepares");

    assert_eq!(prepared.messages[0].role, "system");
    assert!(prepared.messages[0].content.contains("Entropy measures"));
    let last = prepared.messages.last().expect("prompt is non-empty");
    assert_eq!(last.role, "user");
    assert_eq!(last.content, "What is entropy?");
    assert!(prepared.context_tokens > 0);
}

#[tokio::test]
async fn course_scope_creates_the_chat_lazily() {
    let coordinator = test_coordinator().await;
    let course = coordinator
        .database
        .create_course("owner", "Statistics")
        .await
        .expect("course created");

    let prepared = coordinator
        .prepare_turn(
            "owner",
            ChatScope::Course(course.clone()),
            request("m1", "Summarize the course so far"),
        )
        .await
        .expect("turn prepares");

    let MessageOwner::Chat(chat_id) = prepared.owner else {
        panic!("course turn must be owned by a chat");
    };
    let messages = coordinator
        .database
        .list_chat_messages(&chat_id)
        .await
        .expect("messages listed");
    assert_eq!(messages.len(), 1);
}
