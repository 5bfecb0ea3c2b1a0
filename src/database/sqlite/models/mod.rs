
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};

use crate::transcript::TranscriptSegment;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Course {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Lecture {
    pub id: String,
    pub course_id: Option<String>,
    pub owner_id: String,
    pub title: String,
    pub created_at: NaiveDateTime,
    /// Bumped on every transcript update; course chat uses it as the
    /// document recency signal.
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLecture {
    pub id: String,
    pub course_id: Option<String>,
    pub owner_id: String,
    pub title: String,
}

/// Course-scoped conversation, created lazily on the first course-wide chat
/// turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Chat {
    pub id: String,
    pub course_id: String,
    pub owner_id: String,
    pub created_at: NaiveDateTime,
}

/// Storage row for one transcript segment. `embedding_ids` is a JSON array
/// of vector-store row ids, NULL while the segment is unembedded.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct TranscriptSegmentRow {
    pub lecture_id: String,
    pub seq: i64,
    pub text: String,
    pub start_offset_seconds: f64,
    pub embedding_ids: Option<String>,
}

impl TranscriptSegmentRow {
    pub fn into_segment(self) -> Result<TranscriptSegment> {
        let embedding_ids = self
            .embedding_ids
            .as_deref()
            .map(serde_json::from_str::<Vec<String>>)
            .transpose()
            .with_context(|| {
                format!(
                    "Invalid embedding_ids JSON for lecture {} segment {}",
                    self.lecture_id, self.seq
                )
            })?;

        Ok(TranscriptSegment {
            text: self.text,
            start_offset_seconds: self.start_offset_seconds,
            embedding_ids,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
        }
    }
}

/// One ordered content block inside a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePart {
    Text { text: String },
    Reasoning { text: String },
    ToolCall {
        name: String,
        arguments: serde_json::Value,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
}

/// A message belongs to exactly one lecture conversation or one course chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageOwner {
    Lecture(String),
    Chat(String),
}

/// Persisted conversation message. Append-only: created once per turn via an
/// idempotent upsert and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub lecture_id: Option<String>,
    pub chat_id: Option<String>,
    pub role: MessageRole,
    pub parts: Vec<MessagePart>,
    pub attachments: Vec<Attachment>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    /// Caller-supplied for user messages (retry idempotence key),
    /// server-generated for assistant messages.
    pub id: String,
    pub owner: MessageOwner,
    pub role: MessageRole,
    pub parts: Vec<MessagePart>,
    pub attachments: Vec<Attachment>,
}

impl NewMessage {
    pub fn lecture_ids(&self) -> (Option<&str>, Option<&str>) {
        match &self.owner {
            MessageOwner::Lecture(id) => (Some(id.as_str()), None),
            MessageOwner::Chat(id) => (None, Some(id.as_str())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct MessageRow {
    pub id: String,
    pub lecture_id: Option<String>,
    pub chat_id: Option<String>,
    pub role: MessageRole,
    pub parts: String,
    pub attachments: String,
    pub created_at: NaiveDateTime,
}

impl MessageRow {
    pub fn into_message(self) -> Result<Message> {
        let parts: Vec<MessagePart> = serde_json::from_str(&self.parts)
            .with_context(|| format!("Invalid parts JSON for message {}", self.id))?;
        let attachments: Vec<Attachment> = serde_json::from_str(&self.attachments)
            .with_context(|| format!("Invalid attachments JSON for message {}", self.id))?;

        Ok(Message {
            id: self.id,
            lecture_id: self.lecture_id,
            chat_id: self.chat_id,
            role: self.role,
            parts,
            attachments,
            created_at: self.created_at,
        })
    }
}
