use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::{
    AppError, AppResult,
    clock::Clock,
    db::{ChatMessage, MessageType, SessionStatus},
    users::UserDirectory,
};

pub const MAX_PAGE_SIZE: u32 = 100;

const MESSAGE_SELECT: &str = "SELECT m.id,m.session_id,m.sender_id,u.name AS sender_name,m.content,m.message_type,\
    m.edited,m.deleted,m.created_at,m.updated_at,c.language,a.file_name,a.file_url \
    FROM chat_messages m \
    JOIN users u ON u.id=m.sender_id \
    LEFT JOIN code_blocks c ON c.message_id=m.id \
    LEFT JOIN attachments a ON a.message_id=m.id";

/// Guards message updates against a session closed since the last check.
const WHILE_OPEN: &str = "EXISTS (SELECT 1 FROM chat_sessions s WHERE s.id=chat_messages.session_id AND s.status='OPEN')";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    #[serde(default)]
    pub content: String,
    #[serde(default = "default_message_type")]
    pub message_type: MessageType,
    pub language: Option<String>,
    pub file_name: Option<String>,
    pub file_url: Option<String>,
}

fn default_message_type() -> MessageType {
    MessageType::Text
}

impl SendMessageRequest {
    pub fn text(content: impl Into<String>) -> Self {
        Self { content: content.into(), message_type: MessageType::Text, language: None, file_name: None, file_url: None }
    }

    pub fn code(content: impl Into<String>, language: Option<&str>) -> Self {
        Self { message_type: MessageType::Code, language: language.map(str::to_owned), ..Self::text(content) }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditMessageRequest {
    pub content: String,
    pub language: Option<String>,
}

/// A message as clients see it, with its extension flattened in. Deleted
/// messages keep their place in history but carry no content.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: i64,
    pub session_id: i64,
    pub sender_id: i64,
    pub sender_name: String,
    pub content: String,
    pub message_type: MessageType,
    pub edited: bool,
    pub deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<ChatMessage> for MessageView {
    fn from(message: ChatMessage) -> Self {
        let deleted = message.deleted;
        MessageView {
            id: message.id,
            session_id: message.session_id,
            sender_id: message.sender_id,
            sender_name: message.sender_name,
            content: if deleted { String::new() } else { message.content },
            message_type: message.message_type,
            edited: message.edited,
            deleted,
            language: message.language.filter(|_| !deleted),
            file_name: message.file_name.filter(|_| !deleted),
            file_url: message.file_url.filter(|_| !deleted),
            created_at: message.created_at,
            updated_at: message.updated_at,
        }
    }
}

/// One backward slice of history, newest first.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub messages: Vec<MessageView>,
    /// Older messages may exist past the last one in this page.
    pub has_next: bool,
}

fn is_blank(value: Option<&str>) -> bool {
    value.is_none_or(|v| v.trim().is_empty())
}

fn validate(request: &SendMessageRequest) -> AppResult<()> {
    match request.message_type {
        MessageType::Code if is_blank(request.language.as_deref()) => {
            Err(AppError::validation("language is required for code messages"))
        }
        MessageType::Text | MessageType::Code if request.content.trim().is_empty() => {
            Err(AppError::validation("message content must not be blank"))
        }
        MessageType::File | MessageType::Image
            if is_blank(request.file_name.as_deref()) || is_blank(request.file_url.as_deref()) =>
        {
            Err(AppError::validation("attachments need a file name and url"))
        }
        _ => Ok(()),
    }
}

#[derive(Clone)]
pub struct MessagePipeline {
    db_pool: SqlitePool,
    users: UserDirectory,
    clock: Arc<dyn Clock>,
}

impl MessagePipeline {
    pub fn new(db_pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { users: UserDirectory::new(db_pool.clone()), db_pool, clock }
    }

    pub async fn append_message(&self, session_id: i64, sender_id: i64, request: SendMessageRequest) -> AppResult<MessageView> {
        self.ensure_open(session_id).await?;

        self.users.get(sender_id).await.map_err(|err| match err {
            AppError::UserNotFound => AppError::Unauthorized,
            other => other,
        })?;

        validate(&request)?;

        let now = self.clock.now();
        let mut tx = self.db_pool.begin().await?;

        // the session may have closed since the check above
        let inserted = sqlx::query(
            "INSERT INTO chat_messages (session_id,sender_id,content,message_type,created_at,updated_at) \
             SELECT ?,?,?,?,?,? WHERE EXISTS (SELECT 1 FROM chat_sessions WHERE id=? AND status='OPEN')",
        )
        .bind(session_id)
        .bind(sender_id)
        .bind(&request.content)
        .bind(request.message_type)
        .bind(now)
        .bind(now)
        .bind(session_id)
        .execute(&mut *tx)
        .await?;
        if inserted.rows_affected() == 0 {
            return Err(AppError::SessionClosed);
        }
        let id = inserted.last_insert_rowid();

        match request.message_type {
            MessageType::Code => {
                sqlx::query("INSERT INTO code_blocks (message_id,language,code) VALUES (?,?,?)")
                    .bind(id)
                    .bind(request.language.as_deref().map(str::trim))
                    .bind(&request.content)
                    .execute(&mut *tx)
                    .await?;
            }
            MessageType::File | MessageType::Image => {
                sqlx::query("INSERT INTO attachments (message_id,file_name,file_url) VALUES (?,?,?)")
                    .bind(id)
                    .bind(&request.file_name)
                    .bind(&request.file_url)
                    .execute(&mut *tx)
                    .await?;
            }
            MessageType::Text => {}
        }

        tx.commit().await?;

        Ok(self.load(id).await?.into())
    }

    pub async fn edit_message(&self, message_id: i64, editor_id: i64, request: EditMessageRequest) -> AppResult<MessageView> {
        let message = self.writable(message_id, editor_id).await?;
        if message.deleted {
            return Err(AppError::validation("deleted messages cannot be edited"));
        }
        if request.content.trim().is_empty() && !message.message_type.has_attachment() {
            return Err(AppError::validation("message content must not be blank"));
        }
        if request.language.is_some() && is_blank(request.language.as_deref()) {
            return Err(AppError::validation("language must not be blank"));
        }

        self.apply_edit(&message, &request).await
    }

    /// The write half of an edit. Rechecks the session inside the
    /// transaction since a close may have committed after `writable`.
    async fn apply_edit(&self, message: &ChatMessage, request: &EditMessageRequest) -> AppResult<MessageView> {
        let mut tx = self.db_pool.begin().await?;

        let updated = sqlx::query(&format!("UPDATE chat_messages SET content=?,edited=1,updated_at=? WHERE id=? AND {WHILE_OPEN}"))
            .bind(&request.content)
            .bind(self.clock.now())
            .bind(message.id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if updated == 0 {
            return Err(AppError::SessionClosed);
        }

        if message.message_type == MessageType::Code {
            sqlx::query("UPDATE code_blocks SET code=?,language=COALESCE(?,language) WHERE message_id=?")
                .bind(&request.content)
                .bind(request.language.as_deref().map(str::trim))
                .bind(message.id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        Ok(self.load(message.id).await?.into())
    }

    pub async fn delete_message(&self, message_id: i64, requester_id: i64) -> AppResult<MessageView> {
        let message = self.writable(message_id, requester_id).await?;
        if message.deleted {
            return Ok(message.into());
        }

        self.apply_delete(&message).await
    }

    async fn apply_delete(&self, message: &ChatMessage) -> AppResult<MessageView> {
        let updated = sqlx::query(&format!("UPDATE chat_messages SET deleted=1,updated_at=? WHERE id=? AND {WHILE_OPEN}"))
            .bind(self.clock.now())
            .bind(message.id)
            .execute(&self.db_pool)
            .await?
            .rows_affected();
        if updated == 0 {
            return Err(AppError::SessionClosed);
        }

        Ok(self.load(message.id).await?.into())
    }

    /// Up to `size` messages older than `before_id` (or the newest ones), id
    /// descending. Costs one bounded query regardless of history length.
    pub async fn page_backward(&self, session_id: i64, before_id: Option<i64>, size: u32) -> AppResult<MessagePage> {
        if !(1..=MAX_PAGE_SIZE).contains(&size) {
            return Err(AppError::validation(format!("page size must be between 1 and {MAX_PAGE_SIZE}")));
        }
        self.session_status(session_id).await?;

        let mut messages: Vec<MessageView> = sqlx::query_as::<_, ChatMessage>(&format!(
            "{MESSAGE_SELECT} WHERE m.session_id=? AND (? IS NULL OR m.id<?) ORDER BY m.id DESC LIMIT ?"
        ))
        .bind(session_id)
        .bind(before_id)
        .bind(before_id)
        .bind(i64::from(size) + 1)
        .fetch_all(&self.db_pool)
        .await?
        .into_iter()
        .map(MessageView::from)
        .collect();

        let has_next = messages.len() > size as usize;
        messages.truncate(size as usize);

        Ok(MessagePage { messages, has_next })
    }

    /// The session a message belongs to; fixed for the message's lifetime.
    pub async fn session_of(&self, message_id: i64) -> AppResult<i64> {
        let (session_id,): (i64,) = sqlx::query_as("SELECT session_id FROM chat_messages WHERE id=?")
            .bind(message_id)
            .fetch_optional(&self.db_pool)
            .await?
            .ok_or(AppError::MessageNotFound)?;
        Ok(session_id)
    }

    async fn writable(&self, message_id: i64, user_id: i64) -> AppResult<ChatMessage> {
        let message = self.load(message_id).await?;
        self.ensure_open(message.session_id).await?;
        if message.sender_id != user_id {
            return Err(AppError::Unauthorized);
        }
        Ok(message)
    }

    async fn load(&self, message_id: i64) -> AppResult<ChatMessage> {
        sqlx::query_as::<_, ChatMessage>(&format!("{MESSAGE_SELECT} WHERE m.id=?"))
            .bind(message_id)
            .fetch_optional(&self.db_pool)
            .await?
            .ok_or(AppError::MessageNotFound)
    }

    async fn session_status(&self, session_id: i64) -> AppResult<SessionStatus> {
        let (status,): (SessionStatus,) = sqlx::query_as("SELECT status FROM chat_sessions WHERE id=?")
            .bind(session_id)
            .fetch_optional(&self.db_pool)
            .await?
            .ok_or(AppError::SessionNotFound)?;
        Ok(status)
    }

    async fn ensure_open(&self, session_id: i64) -> AppResult<()> {
        match self.session_status(session_id).await? {
            SessionStatus::Open => Ok(()),
            SessionStatus::Closed => Err(AppError::SessionClosed),
        }
    }
}
