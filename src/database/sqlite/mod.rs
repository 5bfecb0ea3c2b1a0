
pub mod models;
pub mod queries;

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use tracing::{debug, info};

use crate::transcript::TranscriptSegment;
use crate::{LecternError, Result};
use models::{Chat, Lecture, Message, NewLecture, NewMessage};
use queries::{ChatQueries, CourseQueries, LectureQueries, MessageQueries, TranscriptQueries};

pub type DbPool = Pool<Sqlite>;

fn db_err(err: anyhow::Error) -> LecternError {
    LecternError::Database(format!("{:#}", err))
}

#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    pub async fn new<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .map_err(LecternError::database)?;

        let database = Self { pool };
        database.run_migrations().await?;

        Ok(database)
    }

    /// In-memory database for tests.
    pub async fn new_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(LecternError::database)?;

        let database = Self { pool };
        database.run_migrations().await?;

        Ok(database)
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("src/database/sqlite/migrations")
            .run(&self.pool)
            .await
            .map_err(LecternError::database)?;

        debug!("Database migrations completed successfully");
        Ok(())
    }

    // Course operations
    pub async fn create_course(&self, owner_id: &str, title: &str) -> Result<models::Course> {
        CourseQueries::create(&self.pool, owner_id, title)
            .await
            .map_err(db_err)
    }

    pub async fn get_course(&self, id: &str) -> Result<Option<models::Course>> {
        CourseQueries::get_by_id(&self.pool, id).await.map_err(db_err)
    }

    // Lecture operations
    pub async fn create_lecture(&self, new_lecture: NewLecture) -> Result<Lecture> {
        LectureQueries::create(&self.pool, new_lecture)
            .await
            .map_err(db_err)
    }

    pub async fn get_lecture(&self, id: &str) -> Result<Option<Lecture>> {
        LectureQueries::get_by_id(&self.pool, id).await.map_err(db_err)
    }

    pub async fn list_course_lectures(&self, course_id: &str) -> Result<Vec<Lecture>> {
        LectureQueries::list_for_course(&self.pool, course_id)
            .await
            .map_err(db_err)
    }

    pub async fn touch_lecture(&self, id: &str) -> Result<()> {
        LectureQueries::touch(&self.pool, id).await.map_err(db_err)
    }

    pub async fn count_lectures(&self) -> Result<i64> {
        LectureQueries::count(&self.pool).await.map_err(db_err)
    }

    // Transcript operations
    pub async fn get_transcript(&self, lecture_id: &str) -> Result<Vec<TranscriptSegment>> {
        TranscriptQueries::list_for_lecture(&self.pool, lecture_id)
            .await
            .map_err(db_err)
    }

    pub async fn replace_transcript(
        &self,
        lecture_id: &str,
        segments: &[TranscriptSegment],
    ) -> Result<()> {
        TranscriptQueries::replace_for_lecture(&self.pool, lecture_id, segments)
            .await
            .map_err(db_err)
    }

    // Chat operations
    pub async fn get_or_create_chat(&self, course_id: &str, owner_id: &str) -> Result<Chat> {
        ChatQueries::get_or_create(&self.pool, course_id, owner_id)
            .await
            .map_err(db_err)
    }

    // Message operations
    pub async fn upsert_message(&self, new_message: NewMessage) -> Result<Message> {
        MessageQueries::upsert(&self.pool, new_message)
            .await
            .map_err(db_err)
    }

    pub async fn get_message(&self, id: &str) -> Result<Option<Message>> {
        MessageQueries::get_by_id(&self.pool, id).await.map_err(db_err)
    }

    pub async fn list_lecture_messages(&self, lecture_id: &str) -> Result<Vec<Message>> {
        MessageQueries::list_for_lecture(&self.pool, lecture_id)
            .await
            .map_err(db_err)
    }

    pub async fn list_chat_messages(&self, chat_id: &str) -> Result<Vec<Message>> {
        MessageQueries::list_for_chat(&self.pool, chat_id)
            .await
            .map_err(db_err)
    }

    pub async fn count_messages(&self) -> Result<i64> {
        MessageQueries::count(&self.pool).await.map_err(db_err)
    }
}
