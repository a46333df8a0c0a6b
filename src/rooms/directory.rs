use std::sync::Arc;

use rand::Rng;
use sqlx::SqlitePool;
use tracing::info;

use crate::{AppError, AppResult, auth::Principal, clock::Clock, db::Room};

const CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const CODE_ATTEMPTS: usize = 5;

fn random_room_code(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| CODE_CHARSET[rng.random_range(0..CODE_CHARSET.len())] as char)
        .collect()
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

/// Rooms and their enrollments.
#[derive(Clone)]
pub struct RoomDirectory {
    db_pool: SqlitePool,
    clock: Arc<dyn Clock>,
    code_length: usize,
}

impl RoomDirectory {
    pub fn new(db_pool: SqlitePool, clock: Arc<dyn Clock>, code_length: usize) -> Self {
        Self { db_pool, clock, code_length }
    }

    pub async fn create(&self, principal: &Principal, title: &str) -> AppResult<Room> {
        if !principal.is_instructor() {
            return Err(AppError::Unauthorized);
        }
        let title = title.trim();
        if title.is_empty() {
            return Err(AppError::validation("room title must not be blank"));
        }

        let created_at = self.clock.now();
        for _ in 0..CODE_ATTEMPTS {
            let code = random_room_code(self.code_length);
            let result = sqlx::query("INSERT INTO rooms (code,title,instructor_id,created_at) VALUES (?,?,?,?)")
                .bind(&code)
                .bind(title)
                .bind(principal.user_id)
                .bind(created_at)
                .execute(&self.db_pool)
                .await;

            match result {
                Ok(done) => {
                    info!(room_code = %code, instructor_id = principal.user_id, "room created");
                    return Ok(Room {
                        id: done.last_insert_rowid(),
                        code,
                        title: title.to_owned(),
                        instructor_id: principal.user_id,
                        created_at,
                    });
                }
                Err(err) if is_unique_violation(&err) => continue,
                Err(err) => return Err(err.into()),
            }
        }

        Err(anyhow::anyhow!("could not allocate a unique room code").into())
    }

    pub async fn find_by_code(&self, code: &str) -> AppResult<Room> {
        sqlx::query_as::<_, Room>("SELECT id,code,title,instructor_id,created_at FROM rooms WHERE code=?")
            .bind(code)
            .fetch_optional(&self.db_pool)
            .await?
            .ok_or(AppError::RoomNotFound)
    }

    pub async fn find_by_id(&self, room_id: i64) -> AppResult<Room> {
        sqlx::query_as::<_, Room>("SELECT id,code,title,instructor_id,created_at FROM rooms WHERE id=?")
            .bind(room_id)
            .fetch_optional(&self.db_pool)
            .await?
            .ok_or(AppError::RoomNotFound)
    }

    pub async fn join(&self, code: &str, principal: &Principal) -> AppResult<Room> {
        let room = self.find_by_code(code).await?;
        let result = sqlx::query("INSERT INTO enrollments (user_id,room_id,created_at) VALUES (?,?,?)")
            .bind(principal.user_id)
            .bind(room.id)
            .bind(self.clock.now())
            .execute(&self.db_pool)
            .await;

        match result {
            Ok(_) => Ok(room),
            Err(err) if is_unique_violation(&err) => Err(AppError::AlreadyEnrolled),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn leave(&self, code: &str, principal: &Principal) -> AppResult<()> {
        let room = self.find_by_code(code).await?;
        sqlx::query("DELETE FROM enrollments WHERE user_id=? AND room_id=?")
            .bind(principal.user_id)
            .bind(room.id)
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }

    /// The owning instructor and enrolled users are members.
    pub async fn is_member(&self, room: &Room, user_id: i64) -> AppResult<bool> {
        if room.instructor_id == user_id {
            return Ok(true);
        }
        let enrolled = sqlx::query("SELECT 1 FROM enrollments WHERE user_id=? AND room_id=?")
            .bind(user_id)
            .bind(room.id)
            .fetch_optional(&self.db_pool)
            .await?
            .is_some();
        Ok(enrolled)
    }

    pub async fn ensure_member(&self, room: &Room, principal: &Principal) -> AppResult<()> {
        if self.is_member(room, principal.user_id).await? {
            Ok(())
        } else {
            Err(AppError::Unauthorized)
        }
    }

    pub fn ensure_owner(room: &Room, principal: &Principal) -> AppResult<()> {
        if principal.is_instructor() && room.instructor_id == principal.user_id {
            Ok(())
        } else {
            Err(AppError::Unauthorized)
        }
    }
}
