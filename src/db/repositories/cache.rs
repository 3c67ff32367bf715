use crate::entities::{prelude::*, search_cache, search_inflight};
use anyhow::Result;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait, QueryFilter, Set,
    Statement,
};

pub struct CacheRepository {
    conn: DatabaseConnection,
}

/// Raw cache row: the serialized page with its recording and expiry times.
#[derive(Debug, Clone)]
pub struct CachedPayload {
    pub payload_json: String,
    pub recorded_at_ms: i64,
    pub expires_at_ms: i64,
}

/// Takes the token when the fingerprint is free or its holder's token has
/// lapsed. A single statement, so the check and the write share one lock.
const ACQUIRE_INFLIGHT: &str = r"
INSERT INTO search_inflight (fingerprint, token, expires_at_ms)
VALUES (?, ?, ?)
ON CONFLICT (fingerprint) DO UPDATE SET
    token = excluded.token,
    expires_at_ms = excluded.expires_at_ms
WHERE search_inflight.expires_at_ms <= ?";

impl CacheRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn get(&self, fingerprint: &str) -> Result<Option<CachedPayload>> {
        let row = SearchCache::find_by_id(fingerprint.to_string())
            .one(&self.conn)
            .await?;

        Ok(row.map(|m| CachedPayload {
            payload_json: m.payload_json,
            recorded_at_ms: m.recorded_at_ms,
            expires_at_ms: m.expires_at_ms,
        }))
    }

    /// Entries are replaced whole, never patched.
    pub async fn set(&self, fingerprint: &str, payload: CachedPayload) -> Result<()> {
        let active_model = search_cache::ActiveModel {
            fingerprint: Set(fingerprint.to_string()),
            payload_json: Set(payload.payload_json),
            recorded_at_ms: Set(payload.recorded_at_ms),
            expires_at_ms: Set(payload.expires_at_ms),
        };

        SearchCache::insert(active_model)
            .on_conflict(
                sea_orm::sea_query::OnConflict::column(search_cache::Column::Fingerprint)
                    .update_columns([
                        search_cache::Column::PayloadJson,
                        search_cache::Column::RecordedAtMs,
                        search_cache::Column::ExpiresAtMs,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&self.conn)
            .await?;

        Ok(())
    }

    pub async fn purge_expired(&self, now_ms: i64) -> Result<u64> {
        let result = SearchCache::delete_many()
            .filter(search_cache::Column::ExpiresAtMs.lte(now_ms))
            .exec(&self.conn)
            .await?;
        Ok(result.rows_affected)
    }

    pub async fn try_acquire_inflight(
        &self,
        fingerprint: &str,
        token: &str,
        now_ms: i64,
        expires_at_ms: i64,
    ) -> Result<bool> {
        let result = self
            .conn
            .execute(Statement::from_sql_and_values(
                DbBackend::Sqlite,
                ACQUIRE_INFLIGHT,
                [
                    fingerprint.into(),
                    token.into(),
                    expires_at_ms.into(),
                    now_ms.into(),
                ],
            ))
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Only the holder of `token` can release it.
    pub async fn release_inflight(&self, fingerprint: &str, token: &str) -> Result<bool> {
        let result = SearchInflight::delete_many()
            .filter(search_inflight::Column::Fingerprint.eq(fingerprint))
            .filter(search_inflight::Column::Token.eq(token))
            .exec(&self.conn)
            .await?;
        Ok(result.rows_affected > 0)
    }

    pub async fn purge_expired_inflight(&self, now_ms: i64) -> Result<u64> {
        let result = SearchInflight::delete_many()
            .filter(search_inflight::Column::ExpiresAtMs.lte(now_ms))
            .exec(&self.conn)
            .await?;
        Ok(result.rows_affected)
    }
}
