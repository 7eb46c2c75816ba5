use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use grace_group::GroupHost;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::{
    domain::{GroupId, UserId, UserProfile},
    protocol::{GroupSummary, MemberSummary},
};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn create_user(&self, username: &str) -> Result<UserId> {
        let rec = sqlx::query(
            "INSERT INTO users (username) VALUES (?)
             ON CONFLICT(username) DO UPDATE SET username=excluded.username
             RETURNING id",
        )
        .bind(username)
        .fetch_one(&self.pool)
        .await?;
        Ok(UserId(rec.get::<i64, _>(0)))
    }

    pub async fn user_profile(&self, user_id: UserId) -> Result<Option<UserProfile>> {
        let row = sqlx::query(
            "SELECT id, username, created_at, first_seen_at FROM users WHERE id = ?",
        )
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| UserProfile {
            user_id: UserId(r.get::<i64, _>(0)),
            username: r.get::<String, _>(1),
            created_at: r.get::<DateTime<Utc>, _>(2),
            first_seen_at: r.get::<Option<DateTime<Utc>>, _>(3),
        }))
    }

    /// Stamps the user's first visit. Returns true only for the call that
    /// actually transitioned `first_seen_at` from NULL; later calls are no-ops.
    pub async fn record_first_seen(&self, user_id: UserId, seen_at: DateTime<Utc>) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE users SET first_seen_at = ? WHERE id = ? AND first_seen_at IS NULL",
        )
        .bind(seen_at)
        .bind(user_id.0)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    pub async fn recent_users(&self, since: DateTime<Utc>) -> Result<Vec<UserProfile>> {
        let rows = sqlx::query(
            "SELECT id, username, created_at, first_seen_at
             FROM users
             WHERE datetime(created_at) > datetime(?)
             ORDER BY datetime(created_at) DESC",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| UserProfile {
                user_id: UserId(r.get::<i64, _>(0)),
                username: r.get::<String, _>(1),
                created_at: r.get::<DateTime<Utc>, _>(2),
                first_seen_at: r.get::<Option<DateTime<Utc>>, _>(3),
            })
            .collect())
    }

    pub async fn create_group(&self, name: &str) -> Result<GroupId> {
        let rec = sqlx::query(
            "INSERT INTO groups (name) VALUES (?)
             ON CONFLICT(name) DO UPDATE SET name=excluded.name
             RETURNING id",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(GroupId(rec.get::<i64, _>(0)))
    }

    pub async fn find_group(&self, group_id: GroupId) -> Result<Option<GroupSummary>> {
        let row = sqlx::query("SELECT id, name FROM groups WHERE id = ?")
            .bind(group_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| GroupSummary {
            group_id: GroupId(r.get::<i64, _>(0)),
            name: r.get::<String, _>(1),
        }))
    }

    pub async fn list_groups(&self) -> Result<Vec<GroupSummary>> {
        let rows = sqlx::query("SELECT id, name FROM groups ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| GroupSummary {
                group_id: GroupId(r.get::<i64, _>(0)),
                name: r.get::<String, _>(1),
            })
            .collect())
    }

    pub async fn is_group_member(&self, group_id: GroupId, user_id: UserId) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM group_members WHERE group_id = ? AND user_id = ?")
            .bind(group_id.0)
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Membership is a set: a duplicate insert is absorbed by the conflict
    /// clause and reported as false, so racing duplicate logins cannot create
    /// a second row.
    pub async fn add_group_member(&self, group_id: GroupId, user_id: UserId) -> Result<bool> {
        let inserted = sqlx::query(
            "INSERT INTO group_members (group_id, user_id) VALUES (?, ?)
             ON CONFLICT(group_id, user_id) DO NOTHING",
        )
        .bind(group_id.0)
        .bind(user_id.0)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(inserted > 0)
    }

    pub async fn group_member_count(&self, group_id: GroupId) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM group_members WHERE group_id = ?")
                .bind(group_id.0)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    pub async fn list_group_members(&self, group_id: GroupId) -> Result<Vec<MemberSummary>> {
        let rows = sqlx::query(
            "SELECT u.id, u.username, m.added_at
             FROM group_members m
             INNER JOIN users u ON u.id = m.user_id
             WHERE m.group_id = ?
             ORDER BY lower(u.username) ASC",
        )
        .bind(group_id.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| MemberSummary {
                group_id,
                user_id: UserId(r.get::<i64, _>(0)),
                username: r.get::<String, _>(1),
                added_at: r.get::<DateTime<Utc>, _>(2),
            })
            .collect())
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[async_trait]
impl GroupHost for Storage {
    async fn find_group(&self, group_id: GroupId) -> Result<Option<GroupSummary>> {
        Storage::find_group(self, group_id).await
    }

    async fn is_member(&self, group_id: GroupId, user_id: UserId) -> Result<bool> {
        self.is_group_member(group_id, user_id).await
    }

    async fn add_member(&self, group_id: GroupId, user_id: UserId) -> Result<bool> {
        self.add_group_member(group_id, user_id).await
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
