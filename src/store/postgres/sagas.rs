// src/store/postgres/sagas.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, types::Json};

use crate::{error::AppError, models::saga::Saga, store::SagaStore};

pub struct PgSagaStore {
    pool: PgPool,
}

impl PgSagaStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SagaStore for PgSagaStore {
    async fn save(&self, saga: &Saga) -> Result<(), AppError> {
        let meta = saga.meta();
        sqlx::query(
            r#"
            INSERT INTO sagas (id, kind, body, terminal, next_retry_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                body = EXCLUDED.body,
                terminal = EXCLUDED.terminal,
                next_retry_at = EXCLUDED.next_retry_at,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&meta.id)
        .bind(saga.kind().as_str())
        .bind(Json(saga))
        .bind(saga.is_terminal())
        .bind(meta.next_retry_at)
        .bind(meta.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Option<Saga>, AppError> {
        let row: Option<(Json<Saga>,)> = sqlx::query_as("SELECT body FROM sagas WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(body,)| body.0))
    }

    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<Saga>, AppError> {
        let rows: Vec<(Json<Saga>,)> = sqlx::query_as(
            r#"
            SELECT body FROM sagas
            WHERE NOT terminal AND (next_retry_at IS NULL OR next_retry_at <= $1)
            ORDER BY updated_at
            LIMIT 100
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(body,)| body.0).collect())
    }

    async fn open_orders_for_product(&self, product_id: i64) -> Result<i64, AppError> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM sagas
            WHERE NOT terminal
              AND kind = 'place_order'
              AND body->'input'->'items' @> jsonb_build_array(jsonb_build_object('productId', $1::BIGINT))
            "#,
        )
        .bind(product_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn prune(&self, before: DateTime<Utc>) -> Result<u64, AppError> {
        let (pruned,): (i64,) = sqlx::query_as(
            r#"
            WITH pruned AS (
                DELETE FROM sagas WHERE terminal AND updated_at < $1 RETURNING id
            ), movements AS (
                DELETE FROM stock_movements m
                USING pruned
                WHERE split_part(m.op_key, ':', 1) = pruned.id
            )
            SELECT COUNT(*) FROM pruned
            "#,
        )
        .bind(before)
        .fetch_one(&self.pool)
        .await?;
        Ok(pruned as u64)
    }
}
