use chrono::{DateTime, Utc};
use common::error::{AppError, Res};
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use crate::models::usage::{QuotaDimension, UsageCounter, next_month_start};

/// Seeds a zeroed counter for every dimension of a fresh subscription.
pub async fn init_counters(
    conn: &mut sqlx::PgConnection,
    subscription_id: Uuid,
    reset_at: DateTime<Utc>,
) -> Res<()> {
    for dimension in QuotaDimension::ALL {
        sqlx::query(
            "INSERT INTO usage_counters (subscription_id, dimension, count, reset_at)
             VALUES ($1, $2, 0, $3)
             ON CONFLICT (subscription_id, dimension) DO NOTHING",
        )
        .bind(subscription_id)
        .bind(dimension.to_string())
        .bind(reset_at)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

pub async fn get_counter<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    subscription_id: Uuid,
    dimension: QuotaDimension,
) -> Res<Option<UsageCounter>> {
    sqlx::query_as::<_, UsageCounter>(
        "SELECT * FROM usage_counters WHERE subscription_id = $1 AND dimension = $2",
    )
    .bind(subscription_id)
    .bind(dimension.to_string())
    .fetch_optional(executor)
    .await
    .map_err(AppError::from)
}

/// Monthly reset, guarded by `reset_at` so concurrent callers and repeated
/// calls collapse to a single zeroing per month boundary.
pub async fn reset_if_due<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    subscription_id: Uuid,
    dimension: QuotaDimension,
    now: DateTime<Utc>,
) -> Res<()> {
    sqlx::query(
        "UPDATE usage_counters
         SET count = 0, reset_at = $3
         WHERE subscription_id = $1 AND dimension = $2 AND reset_at <= $4",
    )
    .bind(subscription_id)
    .bind(dimension.to_string())
    .bind(next_month_start(now))
    .bind(now)
    .execute(executor)
    .await?;
    Ok(())
}

/// Conditional increment-with-cap in a single statement. Returns the counter
/// after the increment, or `None` when the cap blocked it. The check and the
/// write are one atomic operation against the row, so two racing consumers can
/// never both pass a check only one should.
pub async fn try_increment<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    subscription_id: Uuid,
    dimension: QuotaDimension,
    limit: Option<i64>,
) -> Res<Option<UsageCounter>> {
    sqlx::query_as::<_, UsageCounter>(
        "UPDATE usage_counters
         SET count = count + 1
         WHERE subscription_id = $1 AND dimension = $2
           AND ($3::bigint IS NULL OR count < $3)
         RETURNING *",
    )
    .bind(subscription_id)
    .bind(dimension.to_string())
    .bind(limit)
    .fetch_optional(executor)
    .await
    .map_err(AppError::from)
}
