use chrono::{DateTime, Utc};
use common::error::{AppError, Res};
use sqlx::{Executor, PgPool, Postgres};
use uuid::Uuid;

use crate::{
    dtos::sub::SubscriptionCreate,
    models::{sub::Subscription, usage::next_month_start},
};

pub async fn get_by_id<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    id: Uuid,
) -> Res<Option<Subscription>> {
    sqlx::query_as::<_, Subscription>("SELECT * FROM subscriptions WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
        .map_err(AppError::from)
}

/// All non-terminal rows for a user. More than one is an invariant violation;
/// callers decide how loudly to complain.
pub async fn get_non_terminal_by_user<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    user_id: Uuid,
) -> Res<Vec<Subscription>> {
    sqlx::query_as::<_, Subscription>(
        "SELECT * FROM subscriptions WHERE user_id = $1 AND status IN ('trial', 'active')
         ORDER BY created_at DESC",
    )
    .bind(user_id)
    .fetch_all(executor)
    .await
    .map_err(AppError::from)
}

pub async fn get_by_external_subscription_id<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    external_subscription_id: &str,
) -> Res<Option<Subscription>> {
    sqlx::query_as::<_, Subscription>(
        "SELECT * FROM subscriptions WHERE external_subscription_id = $1
         ORDER BY created_at DESC LIMIT 1",
    )
    .bind(external_subscription_id)
    .fetch_optional(executor)
    .await
    .map_err(AppError::from)
}

/// Creates a subscription as one logically atomic unit: any prior non-terminal
/// row for the user is cancelled, the new row is inserted and its usage
/// counters are initialized at zero, all inside a single transaction. The
/// partial unique index on (user_id) backs this up at the store level.
pub async fn create_with_counters(pool: &PgPool, data: SubscriptionCreate) -> Res<Subscription> {
    let now = Utc::now();
    let mut tx = pool.begin().await?;

    let displaced = sqlx::query(
        "UPDATE subscriptions
         SET status = 'cancelled', current_period_end = $2, cancel_at_period_end = FALSE,
             auto_renew = FALSE, cancellation_reason = 'superseded by new subscription',
             updated_at = $2
         WHERE user_id = $1 AND status IN ('trial', 'active')",
    )
    .bind(data.user_id)
    .bind(now)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if displaced > 0 {
        log::info!(
            "Cancelled {} prior subscription(s) for user {} before create",
            displaced,
            data.user_id
        );
    }

    let subscription = sqlx::query_as::<_, Subscription>(
        r#"
        INSERT INTO subscriptions (user_id, plan_id, status, current_period_start,
                                   current_period_end, auto_renew, external_order_id,
                                   external_subscription_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING *
        "#,
    )
    .bind(data.user_id)
    .bind(&data.plan_id)
    .bind(data.status.to_string())
    .bind(data.current_period_start)
    .bind(data.current_period_end)
    .bind(data.auto_renew)
    .bind(&data.external_order_id)
    .bind(&data.external_subscription_id)
    .fetch_one(&mut *tx)
    .await?;

    crate::usage::init_counters(&mut *tx, subscription.id, next_month_start(now)).await?;

    tx.commit().await?;
    Ok(subscription)
}

pub async fn renew<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    id: Uuid,
    new_period_start: DateTime<Utc>,
    new_period_end: DateTime<Utc>,
) -> Res<Subscription> {
    sqlx::query_as::<_, Subscription>(
        r#"
        UPDATE subscriptions
        SET current_period_start = $2, current_period_end = $3,
            cancel_at_period_end = FALSE, updated_at = now()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(new_period_start)
    .bind(new_period_end)
    .fetch_one(executor)
    .await
    .map_err(AppError::from)
}

/// Flags the subscription to lapse at period end. Access continues until then.
pub async fn set_cancel_at_period_end<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    id: Uuid,
    reason: Option<String>,
) -> Res<Subscription> {
    sqlx::query_as::<_, Subscription>(
        r#"
        UPDATE subscriptions
        SET cancel_at_period_end = TRUE, auto_renew = FALSE,
            cancellation_reason = COALESCE($2, cancellation_reason), updated_at = now()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(reason)
    .fetch_one(executor)
    .await
    .map_err(AppError::from)
}

/// Toggles renewal. Disabling auto-renew is the same thing as cancelling at
/// period end; re-enabling clears the pending lapse.
pub async fn set_auto_renew<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    id: Uuid,
    auto_renew: bool,
) -> Res<Subscription> {
    sqlx::query_as::<_, Subscription>(
        r#"
        UPDATE subscriptions
        SET auto_renew = $2, cancel_at_period_end = NOT $2, updated_at = now()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(auto_renew)
    .fetch_one(executor)
    .await
    .map_err(AppError::from)
}

pub async fn cancel_now<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    id: Uuid,
    reason: Option<String>,
    now: DateTime<Utc>,
) -> Res<Subscription> {
    sqlx::query_as::<_, Subscription>(
        r#"
        UPDATE subscriptions
        SET status = 'cancelled', current_period_end = $3, cancel_at_period_end = FALSE,
            auto_renew = FALSE, cancellation_reason = $2, updated_at = $3
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(reason)
    .bind(now)
    .fetch_one(executor)
    .await
    .map_err(AppError::from)
}

/// Cancels every non-terminal subscription of a user in one statement.
pub async fn cancel_non_terminal_for_user<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    user_id: Uuid,
    reason: Option<String>,
    now: DateTime<Utc>,
) -> Res<Vec<Subscription>> {
    sqlx::query_as::<_, Subscription>(
        r#"
        UPDATE subscriptions
        SET status = 'cancelled', current_period_end = $3, cancel_at_period_end = FALSE,
            auto_renew = FALSE, cancellation_reason = $2, updated_at = $3
        WHERE user_id = $1 AND status IN ('trial', 'active')
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(reason)
    .bind(now)
    .fetch_all(executor)
    .await
    .map_err(AppError::from)
}

/// Closes out a row whose period has elapsed. The terminal status comes from
/// `Subscription::lapse_status`: a pending at-period-end cancellation ends as
/// cancelled, everything else as expired. The guard re-checks status and
/// period against the store, so a stale caller is a no-op.
pub async fn close_lapsed<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    subscription: &Subscription,
) -> Res<Option<Subscription>> {
    sqlx::query_as::<_, Subscription>(
        r#"
        UPDATE subscriptions
        SET status = $2, cancel_at_period_end = FALSE, updated_at = now()
        WHERE id = $1 AND status IN ('trial', 'active') AND current_period_end <= now()
        RETURNING *
        "#,
    )
    .bind(subscription.id)
    .bind(subscription.lapse_status().to_string())
    .fetch_optional(executor)
    .await
    .map_err(AppError::from)
}

/// Filtered scan for the periodic sweep: every non-terminal subscription whose
/// period has elapsed is closed out, mirroring `Subscription::lapse_status`
/// set-wide. Idempotent and safe to re-run.
pub async fn expire_due<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    now: DateTime<Utc>,
) -> Res<Vec<Uuid>> {
    sqlx::query_scalar::<_, Uuid>(
        r#"
        UPDATE subscriptions
        SET status = CASE WHEN cancel_at_period_end THEN 'cancelled' ELSE 'expired' END,
            cancel_at_period_end = FALSE, updated_at = $1
        WHERE status IN ('trial', 'active') AND current_period_end <= $1
        RETURNING id
        "#,
    )
    .bind(now)
    .fetch_all(executor)
    .await
    .map_err(AppError::from)
}
