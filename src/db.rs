use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool, sqlite::{SqliteConnectOptions, SqlitePoolOptions}};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum Role {
    Student,
    Instructor,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "STUDENT",
            Role::Instructor => "INSTRUCTOR",
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub role: Role,
}

#[derive(Debug, Clone, FromRow)]
pub struct Room {
    pub id: i64,
    pub code: String,
    pub title: String,
    pub instructor_id: i64,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum SessionStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, FromRow)]
pub struct ChatSession {
    pub id: i64,
    pub room_id: i64,
    pub session_date: NaiveDate,
    pub title: String,
    pub status: SessionStatus,
    pub created_at: NaiveDateTime,
    pub end_time: Option<NaiveDateTime>,
}

impl ChatSession {
    pub fn is_open(&self) -> bool {
        self.status == SessionStatus::Open
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum MessageType {
    Text,
    Code,
    File,
    Image,
}

impl MessageType {
    pub fn has_attachment(&self) -> bool {
        matches!(self, MessageType::File | MessageType::Image)
    }
}

/// A message row joined with its sender name and whichever extension row it owns.
#[derive(Debug, Clone, FromRow)]
pub struct ChatMessage {
    pub id: i64,
    pub session_id: i64,
    pub sender_id: i64,
    pub sender_name: String,
    pub content: String,
    pub message_type: MessageType,
    pub edited: bool,
    pub deleted: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub language: Option<String>,
    pub file_name: Option<String>,
    pub file_url: Option<String>,
}

pub async fn connect(database_url: &str) -> anyhow::Result<SqlitePool> {
    let options: SqliteConnectOptions = database_url.parse()?;
    let db_pool = SqlitePoolOptions::new()
        .max_connections(16)
        .connect_with(options.foreign_keys(true))
        .await?;

    sqlx::migrate!().run(&db_pool).await?;

    Ok(db_pool)
}
