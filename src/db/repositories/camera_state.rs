use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;

use crate::error::Error;
use crate::store::StateStore;

/// Camera state repository backed by the `camera_state` table
#[derive(Clone)]
pub struct PgStateStore {
    pool: Arc<PgPool>,
}

impl PgStateStore {
    /// Create a new camera state repository
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StateStore for PgStateStore {
    async fn ping(&self) -> Result<(), Error> {
        sqlx::query("SELECT 1")
            .execute(&*self.pool)
            .await
            .map_err(|e| Error::Store(format!("Failed to ping database: {}", e)))?;

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        let value = sqlx::query_scalar::<_, String>(
            r#"
            SELECT value
            FROM camera_state
            WHERE key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Store(format!("Failed to get {}: {}", key, e)))?;

        Ok(value)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> Result<bool, Error> {
        let result = match expected {
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO camera_state (key, value, updated_at)
                    VALUES ($1, $2, now())
                    ON CONFLICT (key) DO NOTHING
                    "#,
                )
                .bind(key)
                .bind(value)
                .execute(&*self.pool)
                .await
            }
            Some(expected) => {
                sqlx::query(
                    r#"
                    UPDATE camera_state
                    SET value = $3, updated_at = now()
                    WHERE key = $1 AND value = $2
                    "#,
                )
                .bind(key)
                .bind(expected)
                .bind(value)
                .execute(&*self.pool)
                .await
            }
        }
        .map_err(|e| Error::Store(format!("Failed to update {}: {}", key, e)))?;

        Ok(result.rows_affected() == 1)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, Error> {
        // LIKE would treat the '_' in "cam_" as a wildcard
        let keys = sqlx::query_scalar::<_, String>(
            r#"
            SELECT key
            FROM camera_state
            WHERE left(key, char_length($1)) = $1
            ORDER BY key
            "#,
        )
        .bind(prefix)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Store(format!("Failed to scan {}*: {}", prefix, e)))?;

        Ok(keys)
    }

    async fn delete_if(&self, key: &str, expected: &str) -> Result<bool, Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM camera_state
            WHERE key = $1 AND value = $2
            "#,
        )
        .bind(key)
        .bind(expected)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Store(format!("Failed to delete {}: {}", key, e)))?;

        Ok(result.rows_affected() == 1)
    }

    async fn flush_all(&self) -> Result<(), Error> {
        sqlx::query("DELETE FROM camera_state")
            .execute(&*self.pool)
            .await
            .map_err(|e| Error::Store(format!("Failed to clear camera state: {}", e)))?;

        Ok(())
    }
}
