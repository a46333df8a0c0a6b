use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::{
    AppError, AppResult,
    auth::Principal,
    clock::Clock,
    db::{ChatSession, SessionStatus},
    locks::KeyedLocks,
    rooms::{RoomDirectory, is_unique_violation},
};

const SESSION_COLUMNS: &str = "id,room_id,session_date,title,status,created_at,end_time";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub id: i64,
    pub room_id: i64,
    pub session_date: NaiveDate,
    pub title: String,
    pub status: SessionStatus,
    pub created_at: NaiveDateTime,
    pub end_time: Option<NaiveDateTime>,
}

impl From<ChatSession> for SessionView {
    fn from(session: ChatSession) -> Self {
        SessionView {
            id: session.id,
            room_id: session.room_id,
            session_date: session.session_date,
            title: session.title,
            status: session.status,
            created_at: session.created_at,
            end_time: session.end_time,
        }
    }
}

/// Owns the OPEN/CLOSED state machine of each room's daily session.
///
/// Every transition for a room runs under that room's lock, so "at most one
/// OPEN session per room" holds across concurrent starts, reopens and closes.
pub struct SessionLifecycleManager {
    db_pool: SqlitePool,
    rooms: RoomDirectory,
    clock: Arc<dyn Clock>,
    room_locks: KeyedLocks<i64>,
    close_cutoff_time: NaiveTime,
}

impl SessionLifecycleManager {
    pub fn new(db_pool: SqlitePool, rooms: RoomDirectory, clock: Arc<dyn Clock>, close_cutoff_time: NaiveTime) -> Self {
        Self { db_pool, rooms, clock, room_locks: KeyedLocks::new(), close_cutoff_time }
    }

    pub async fn start_or_resume(&self, room_code: &str, principal: &Principal) -> AppResult<SessionView> {
        if !principal.is_instructor() {
            return Err(AppError::Unauthorized);
        }
        let room = self.rooms.find_by_code(room_code).await?;
        RoomDirectory::ensure_owner(&room, principal)?;

        let _guard = self.room_locks.lock(room.id).await;

        if self.find_open(room.id).await?.is_some() {
            return Err(AppError::AlreadyActiveSession);
        }

        let now = self.clock.now();
        let today = now.date();
        let session = match self.find_on_date(room.id, today).await? {
            None => self.create(room.id, now).await?,
            Some(session) => {
                if now.time() >= self.close_cutoff_time {
                    return Err(AppError::CutoffExceeded);
                }
                self.reopen(session.id).await?
            }
        };

        Ok(session.into())
    }

    async fn create(&self, room_id: i64, now: NaiveDateTime) -> AppResult<ChatSession> {
        let title = now.date().format("%Y-%m-%d").to_string();
        let result = sqlx::query("INSERT INTO chat_sessions (room_id,session_date,title,status,created_at) VALUES (?,?,?,'OPEN',?)")
            .bind(room_id)
            .bind(now.date())
            .bind(&title)
            .bind(now)
            .execute(&self.db_pool)
            .await;

        let id = match result {
            Ok(done) => done.last_insert_rowid(),
            Err(err) if is_unique_violation(&err) => return Err(AppError::AlreadyActiveSession),
            Err(err) => return Err(err.into()),
        };
        info!(session_id = id, room_id, "session started");

        Ok(ChatSession {
            id,
            room_id,
            session_date: now.date(),
            title,
            status: SessionStatus::Open,
            created_at: now,
            end_time: None,
        })
    }

    async fn reopen(&self, session_id: i64) -> AppResult<ChatSession> {
        let result = sqlx::query("UPDATE chat_sessions SET status='OPEN',end_time=NULL WHERE id=? AND status='CLOSED'")
            .bind(session_id)
            .execute(&self.db_pool)
            .await;

        match result {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => return Err(AppError::AlreadyActiveSession),
            Err(err) => return Err(err.into()),
        }
        info!(session_id, "session reopened");

        self.load(session_id).await
    }

    pub async fn find_active(&self, room_code: &str, principal: &Principal) -> AppResult<Option<SessionView>> {
        let room = self.rooms.find_by_code(room_code).await?;
        self.rooms.ensure_member(&room, principal).await?;

        match self.find_open(room.id).await? {
            Some(session) => Ok(Some(session.into())),
            None if principal.is_instructor() => Ok(None),
            None => Err(AppError::SessionNotStarted),
        }
    }

    /// Closes the session, stamping `end_time`. Closing an already closed
    /// session leaves it untouched.
    pub async fn close(&self, session_id: i64) -> AppResult<SessionView> {
        let session = self.load(session_id).await?;
        let _guard = self.room_locks.lock(session.room_id).await;

        let closed = sqlx::query("UPDATE chat_sessions SET status='CLOSED',end_time=? WHERE id=? AND status='OPEN'")
            .bind(self.clock.now())
            .bind(session_id)
            .execute(&self.db_pool)
            .await?
            .rows_affected();

        if closed > 0 {
            info!(session_id, room_id = session.room_id, "session closed");
        } else {
            debug!(session_id, "session already closed");
        }

        Ok(self.load(session_id).await?.into())
    }

    pub async fn close_as(&self, room_code: &str, session_id: i64, principal: &Principal) -> AppResult<SessionView> {
        let room = self.rooms.find_by_code(room_code).await?;
        RoomDirectory::ensure_owner(&room, principal)?;

        let session = self.load(session_id).await?;
        if session.room_id != room.id {
            return Err(AppError::SessionNotFound);
        }

        self.close(session_id).await
    }

    /// Closed sessions of a room, most recent date first.
    pub async fn get_archive(&self, room_code: &str, principal: &Principal) -> AppResult<Vec<SessionView>> {
        let room = self.rooms.find_by_code(room_code).await?;
        self.rooms.ensure_member(&room, principal).await?;

        let sessions = sqlx::query_as::<_, ChatSession>(&format!(
            "SELECT {SESSION_COLUMNS} FROM chat_sessions WHERE room_id=? AND status='CLOSED' ORDER BY session_date DESC, id DESC"
        ))
        .bind(room.id)
        .fetch_all(&self.db_pool)
        .await?;

        Ok(sessions.into_iter().map(SessionView::from).collect())
    }

    /// With `require_closed`, an OPEN session is reported as not found; point
    /// lookups by id are meant for archived sessions.
    pub async fn get_by_id(&self, session_id: i64, require_closed: bool) -> AppResult<SessionView> {
        let session = self.load(session_id).await?;
        if require_closed && session.is_open() {
            return Err(AppError::SessionNotFound);
        }
        Ok(session.into())
    }

    pub async fn get_in_room(&self, room_code: &str, session_id: i64, principal: &Principal) -> AppResult<SessionView> {
        let room = self.rooms.find_by_code(room_code).await?;
        self.rooms.ensure_member(&room, principal).await?;

        let session = self.get_by_id(session_id, true).await?;
        if session.room_id != room.id {
            return Err(AppError::SessionNotFound);
        }
        Ok(session)
    }

    /// Loads a session the principal may read or write through: the room's
    /// owner or an enrolled user.
    pub async fn ensure_session_member(&self, session_id: i64, principal: &Principal) -> AppResult<ChatSession> {
        let session = self.load(session_id).await?;
        let room = self.rooms.find_by_id(session.room_id).await?;
        self.rooms.ensure_member(&room, principal).await?;
        Ok(session)
    }

    pub async fn open_sessions_on(&self, date: NaiveDate) -> AppResult<Vec<ChatSession>> {
        Ok(sqlx::query_as::<_, ChatSession>(&format!(
            "SELECT {SESSION_COLUMNS} FROM chat_sessions WHERE status='OPEN' AND session_date=? ORDER BY id"
        ))
        .bind(date)
        .fetch_all(&self.db_pool)
        .await?)
    }

    pub async fn load(&self, session_id: i64) -> AppResult<ChatSession> {
        sqlx::query_as::<_, ChatSession>(&format!("SELECT {SESSION_COLUMNS} FROM chat_sessions WHERE id=?"))
            .bind(session_id)
            .fetch_optional(&self.db_pool)
            .await?
            .ok_or(AppError::SessionNotFound)
    }

    async fn find_open(&self, room_id: i64) -> AppResult<Option<ChatSession>> {
        Ok(sqlx::query_as::<_, ChatSession>(&format!(
            "SELECT {SESSION_COLUMNS} FROM chat_sessions WHERE room_id=? AND status='OPEN'"
        ))
        .bind(room_id)
        .fetch_optional(&self.db_pool)
        .await?)
    }

    async fn find_on_date(&self, room_id: i64, date: NaiveDate) -> AppResult<Option<ChatSession>> {
        Ok(sqlx::query_as::<_, ChatSession>(&format!(
            "SELECT {SESSION_COLUMNS} FROM chat_sessions WHERE room_id=? AND session_date=?"
        ))
        .bind(room_id)
        .bind(date)
        .fetch_optional(&self.db_pool)
        .await?)
    }
}
