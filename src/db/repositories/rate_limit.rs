use crate::entities::{prelude::*, rate_limit_windows};
use anyhow::Result;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait, QueryFilter,
    Statement,
};

pub struct RateLimitRepository {
    conn: DatabaseConnection,
}

/// Counter state after an increment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    pub admitted: bool,
    pub count: i64,
}

/// One statement, so SQLite takes the write lock up front and concurrent
/// connections queue on the busy timeout instead of failing an upgrade.
const INCREMENT_IF_BELOW: &str = r"
INSERT INTO rate_limit_windows (key, window_start_ms, count, last_seen_ms)
VALUES (?, ?, ?, ?)
ON CONFLICT (key) DO UPDATE SET
    count = CASE
        WHEN rate_limit_windows.window_start_ms = excluded.window_start_ms
            THEN rate_limit_windows.count + excluded.count
        ELSE excluded.count
    END,
    window_start_ms = excluded.window_start_ms,
    last_seen_ms = excluded.last_seen_ms
WHERE CASE
        WHEN rate_limit_windows.window_start_ms = excluded.window_start_ms
            THEN rate_limit_windows.count + excluded.count
        ELSE excluded.count
    END <= ?
RETURNING count";

impl RateLimitRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// Adds `cost` to the key's counter for `window_start_ms` only if the
    /// result stays within `limit`. A row from an older window is reset.
    pub async fn increment_if_below(
        &self,
        key: &str,
        window_start_ms: i64,
        cost: i64,
        limit: i64,
        now_ms: i64,
    ) -> Result<WindowCount> {
        if cost > limit {
            return Ok(WindowCount {
                admitted: false,
                count: self.current_count(key, window_start_ms).await?,
            });
        }

        let row = self
            .conn
            .query_one(Statement::from_sql_and_values(
                DbBackend::Sqlite,
                INCREMENT_IF_BELOW,
                [
                    key.into(),
                    window_start_ms.into(),
                    cost.into(),
                    now_ms.into(),
                    limit.into(),
                ],
            ))
            .await?;

        match row {
            Some(row) => Ok(WindowCount {
                admitted: true,
                count: row.try_get::<i64>("", "count")?,
            }),
            None => Ok(WindowCount {
                admitted: false,
                count: self.current_count(key, window_start_ms).await?,
            }),
        }
    }

    async fn current_count(&self, key: &str, window_start_ms: i64) -> Result<i64> {
        Ok(RateLimitWindows::find_by_id(key.to_string())
            .one(&self.conn)
            .await?
            .filter(|row| row.window_start_ms == window_start_ms)
            .map_or(0, |row| row.count))
    }

    pub async fn evict_idle(&self, cutoff_ms: i64) -> Result<u64> {
        let result = RateLimitWindows::delete_many()
            .filter(rate_limit_windows::Column::LastSeenMs.lt(cutoff_ms))
            .exec(&self.conn)
            .await?;
        Ok(result.rows_affected)
    }
}
