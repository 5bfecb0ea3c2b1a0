
use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use super::models::{
    Chat, Course, Lecture, Message, MessageRow, NewLecture, NewMessage, TranscriptSegmentRow,
};
use crate::transcript::TranscriptSegment;

pub struct CourseQueries;

impl CourseQueries {
    pub async fn create(pool: &SqlitePool, owner_id: &str, title: &str) -> Result<Course> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();

        sqlx::query("INSERT INTO courses (id, owner_id, title, created_at) VALUES (?, ?, ?, ?)")
            .bind(&id)
            .bind(owner_id)
            .bind(title)
            .bind(now)
            .execute(pool)
            .await
            .context("Failed to create course")?;

        Self::get_by_id(pool, &id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created course"))
    }

    pub async fn get_by_id(pool: &SqlitePool, id: &str) -> Result<Option<Course>> {
        sqlx::query_as::<_, Course>(
            "SELECT id, owner_id, title, created_at FROM courses WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get course by id")
    }
}

pub struct LectureQueries;

impl LectureQueries {
    pub async fn create(pool: &SqlitePool, new_lecture: NewLecture) -> Result<Lecture> {
        let now = Utc::now().naive_utc();

        sqlx::query(
            "INSERT INTO lectures (id, course_id, owner_id, title, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&new_lecture.id)
        .bind(&new_lecture.course_id)
        .bind(&new_lecture.owner_id)
        .bind(&new_lecture.title)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create lecture")?;

        Self::get_by_id(pool, &new_lecture.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created lecture"))
    }

    pub async fn get_by_id(pool: &SqlitePool, id: &str) -> Result<Option<Lecture>> {
        sqlx::query_as::<_, Lecture>(
            "SELECT id, course_id, owner_id, title, created_at, updated_at
             FROM lectures WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get lecture by id")
    }

    pub async fn list_for_course(pool: &SqlitePool, course_id: &str) -> Result<Vec<Lecture>> {
        sqlx::query_as::<_, Lecture>(
            "SELECT id, course_id, owner_id, title, created_at, updated_at
             FROM lectures WHERE course_id = ? ORDER BY updated_at DESC",
        )
        .bind(course_id)
        .fetch_all(pool)
        .await
        .context("Failed to list lectures for course")
    }

    pub async fn touch(pool: &SqlitePool, id: &str) -> Result<()> {
        let now = Utc::now().naive_utc();
        sqlx::query("UPDATE lectures SET updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(id)
            .execute(pool)
            .await
            .context("Failed to touch lecture")?;
        Ok(())
    }

    pub async fn count(pool: &SqlitePool) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM lectures")
            .fetch_one(pool)
            .await
            .context("Failed to count lectures")?;
        Ok(count)
    }
}

pub struct TranscriptQueries;

impl TranscriptQueries {
    pub async fn list_for_lecture(
        pool: &SqlitePool,
        lecture_id: &str,
    ) -> Result<Vec<TranscriptSegment>> {
        let rows = sqlx::query_as::<_, TranscriptSegmentRow>(
            "SELECT lecture_id, seq, text, start_offset_seconds, embedding_ids
             FROM transcript_segments WHERE lecture_id = ? ORDER BY seq",
        )
        .bind(lecture_id)
        .fetch_all(pool)
        .await
        .context("Failed to load transcript segments")?;

        rows.into_iter()
            .map(TranscriptSegmentRow::into_segment)
            .collect()
    }

    /// Replace the lecture's transcript with the combined, re-stamped
    /// segment list in one transaction.
    pub async fn replace_for_lecture(
        pool: &SqlitePool,
        lecture_id: &str,
        segments: &[TranscriptSegment],
    ) -> Result<()> {
        let mut tx = pool
            .begin()
            .await
            .context("Failed to begin transcript transaction")?;

        sqlx::query("DELETE FROM transcript_segments WHERE lecture_id = ?")
            .bind(lecture_id)
            .execute(&mut *tx)
            .await
            .context("Failed to clear previous transcript rows")?;

        for (seq, segment) in segments.iter().enumerate() {
            let embedding_ids = segment
                .embedding_ids
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .context("Failed to serialize embedding ids")?;

            sqlx::query(
                "INSERT INTO transcript_segments
                     (lecture_id, seq, text, start_offset_seconds, embedding_ids)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(lecture_id)
            .bind(seq as i64)
            .bind(&segment.text)
            .bind(segment.start_offset_seconds)
            .bind(embedding_ids)
            .execute(&mut *tx)
            .await
            .context("Failed to insert transcript segment")?;
        }

        tx.commit()
            .await
            .context("Failed to commit transcript transaction")?;

        debug!(
            lecture_id,
            segments = segments.len(),
            "persisted combined transcript"
        );
        Ok(())
    }
}

pub struct ChatQueries;

impl ChatQueries {
    /// Fetch the course chat, creating it on first use.
    pub async fn get_or_create(
        pool: &SqlitePool,
        course_id: &str,
        owner_id: &str,
    ) -> Result<Chat> {
        if let Some(chat) = Self::get_for_course(pool, course_id).await? {
            return Ok(chat);
        }

        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();

        // A concurrent first turn may have won the race; the UNIQUE
        // constraint makes the loser fall back to the existing row.
        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO chats (id, course_id, owner_id, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(course_id)
        .bind(owner_id)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create chat")?;

        if inserted.rows_affected() > 0 {
            debug!(course_id, chat_id = %id, "created course chat lazily");
        }

        Self::get_for_course(pool, course_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve course chat"))
    }

    pub async fn get_for_course(pool: &SqlitePool, course_id: &str) -> Result<Option<Chat>> {
        sqlx::query_as::<_, Chat>(
            "SELECT id, course_id, owner_id, created_at FROM chats WHERE course_id = ?",
        )
        .bind(course_id)
        .fetch_optional(pool)
        .await
        .context("Failed to get chat for course")
    }
}

pub struct MessageQueries;

impl MessageQueries {
    /// Idempotent create keyed on the message id. A retry with the same id
    /// rewrites the same row instead of appending a duplicate.
    pub async fn upsert(pool: &SqlitePool, new_message: NewMessage) -> Result<Message> {
        let (lecture_id, chat_id) = new_message.lecture_ids();
        let parts =
            serde_json::to_string(&new_message.parts).context("Failed to serialize parts")?;
        let attachments = serde_json::to_string(&new_message.attachments)
            .context("Failed to serialize attachments")?;
        let now = Utc::now().naive_utc();

        sqlx::query(
            "INSERT INTO messages (id, lecture_id, chat_id, role, parts, attachments, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET
                 parts = excluded.parts,
                 attachments = excluded.attachments",
        )
        .bind(&new_message.id)
        .bind(lecture_id)
        .bind(chat_id)
        .bind(new_message.role)
        .bind(&parts)
        .bind(&attachments)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to upsert message")?;

        Self::get_by_id(pool, &new_message.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve upserted message"))
    }

    pub async fn get_by_id(pool: &SqlitePool, id: &str) -> Result<Option<Message>> {
        let row = sqlx::query_as::<_, MessageRow>(
            "SELECT id, lecture_id, chat_id, role, parts, attachments, created_at
             FROM messages WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get message by id")?;

        row.map(MessageRow::into_message).transpose()
    }

    pub async fn list_for_lecture(pool: &SqlitePool, lecture_id: &str) -> Result<Vec<Message>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT id, lecture_id, chat_id, role, parts, attachments, created_at
             FROM messages WHERE lecture_id = ? ORDER BY created_at, rowid",
        )
        .bind(lecture_id)
        .fetch_all(pool)
        .await
        .context("Failed to list messages for lecture")?;

        rows.into_iter().map(MessageRow::into_message).collect()
    }

    pub async fn list_for_chat(pool: &SqlitePool, chat_id: &str) -> Result<Vec<Message>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT id, lecture_id, chat_id, role, parts, attachments, created_at
             FROM messages WHERE chat_id = ? ORDER BY created_at, rowid",
        )
        .bind(chat_id)
        .fetch_all(pool)
        .await
        .context("Failed to list messages for chat")?;

        rows.into_iter().map(MessageRow::into_message).collect()
    }

    pub async fn count(pool: &SqlitePool) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM messages")
            .fetch_one(pool)
            .await
            .context("Failed to count messages")?;
        Ok(count)
    }
}
