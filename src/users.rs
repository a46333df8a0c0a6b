use sqlx::SqlitePool;

use crate::{AppError, AppResult, db::{Role, User}};

#[derive(Clone)]
pub struct UserDirectory {
    db_pool: SqlitePool,
}

impl UserDirectory {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    pub async fn find(&self, user_id: i64) -> AppResult<Option<User>> {
        Ok(sqlx::query_as::<_, User>("SELECT id,name,role FROM users WHERE id=?")
            .bind(user_id)
            .fetch_optional(&self.db_pool)
            .await?)
    }

    pub async fn get(&self, user_id: i64) -> AppResult<User> {
        self.find(user_id).await?.ok_or(AppError::UserNotFound)
    }

    pub async fn create(&self, name: &str, role: Role) -> AppResult<User> {
        let id = sqlx::query("INSERT INTO users (name,role) VALUES (?,?)")
            .bind(name)
            .bind(role)
            .execute(&self.db_pool)
            .await?
            .last_insert_rowid();

        Ok(User { id, name: name.to_owned(), role })
    }
}
