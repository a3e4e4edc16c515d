use chrono::{DateTime, Utc};
use common::error::{AppError, Res};
use serde::Serialize;
use sqlx::PgPool;
use std::{future::Future, time::Duration};
use uuid::Uuid;

use api_subs::services::sub::{CreateSubscription, self as sub_service};
use catalog::FeatureFlag;
use db::models::{plan::Plan, sub::Subscription, usage::QuotaDimension};

/// Snapshot of one quota dimension for a user, returned by both the advisory
/// check and a successful consume.
#[derive(Debug, Clone, Serialize)]
pub struct QuotaStatus {
    pub dimension: QuotaDimension,
    pub allowed: bool,
    pub current: i64,
    pub limit: Option<i64>,
    pub reset_at: DateTime<Utc>,
}

/// Quota decision: under the limit or unlimited.
pub fn quota_allowed(current: i64, limit: Option<i64>) -> bool {
    limit.is_none_or(|l| current < l)
}

/// Caps a store round-trip. A future that outlives the deadline becomes an
/// `Unavailable` error, which every entitlement path treats as "deny".
async fn with_deadline<T>(
    timeout_ms: u64,
    fut: impl Future<Output = Res<T>>,
) -> Res<T> {
    match tokio::time::timeout(Duration::from_millis(timeout_ms), fut).await {
        Ok(res) => res,
        Err(_) => Err(AppError::Unavailable(
            "store operation exceeded its deadline".to_string(),
        )),
    }
}

/// The subscription backing a user's entitlements. Users without one get a
/// free-plan subscription created on first use, so every quota counter has a
/// subscription row to hang off.
async fn ensure_subscription(pool: &PgPool, user_id: Uuid) -> Res<Subscription> {
    if let Some(subscription) = sub_service::get_active_subscription(pool, user_id).await? {
        return Ok(subscription);
    }

    log::info!("User {} has no subscription, provisioning free plan", user_id);
    sub_service::create_subscription(
        pool,
        CreateSubscription {
            user_id,
            plan_id: "free".to_string(),
            trial: false,
            external_order_id: None,
            external_subscription_id: None,
        },
    )
    .await
}

async fn active_plan(pool: &PgPool, user_id: Uuid) -> Res<(Plan, Option<Subscription>)> {
    match sub_service::get_active_subscription(pool, user_id).await? {
        Some(subscription) => {
            let plan = catalog::plan_for_entitlement(pool, &subscription.plan_id).await;
            Ok((plan, Some(subscription)))
        }
        None => Ok((catalog::fallback_free(), None)),
    }
}

/// Whether the user's plan tier unlocks a feature. No active subscription is
/// treated as the free plan. Read-only; retried once on store unavailability.
pub async fn can_use_feature(
    pool: &PgPool,
    timeout_ms: u64,
    user_id: Uuid,
    flag: FeatureFlag,
) -> Res<bool> {
    let lookup = with_deadline(timeout_ms, active_plan(pool, user_id)).await;
    let (plan, _) = match lookup {
        Ok(found) => found,
        Err(AppError::Unavailable(_)) => {
            tokio::time::sleep(Duration::from_millis(50)).await;
            with_deadline(timeout_ms, active_plan(pool, user_id)).await?
        }
        Err(e) => return Err(e),
    };

    Ok(flag.allowed_for(&plan))
}

/// Advisory quota read. Performs the lazy monthly reset first, so repeated
/// calls after the boundary all report zero against the same next reset
/// instant. Must not be used to gate a side effect; that is `consume`'s job.
pub async fn check_quota(
    pool: &PgPool,
    timeout_ms: u64,
    user_id: Uuid,
    dimension: QuotaDimension,
) -> Res<QuotaStatus> {
    let first = with_deadline(timeout_ms, quota_snapshot(pool, user_id, dimension)).await;
    match first {
        Ok(status) => Ok(status),
        // Reads are idempotent, one local retry after a short backoff.
        Err(AppError::Unavailable(_)) => {
            tokio::time::sleep(Duration::from_millis(50)).await;
            with_deadline(timeout_ms, quota_snapshot(pool, user_id, dimension)).await
        }
        Err(e) => Err(e),
    }
}

async fn quota_snapshot(
    pool: &PgPool,
    user_id: Uuid,
    dimension: QuotaDimension,
) -> Res<QuotaStatus> {
    let subscription = ensure_subscription(pool, user_id).await?;
    let plan = catalog::plan_for_entitlement(pool, &subscription.plan_id).await;
    let limit = plan.limit_for(dimension);

    db::usage::reset_if_due(pool, subscription.id, dimension, Utc::now()).await?;
    let counter = counter_or_init(pool, subscription.id, dimension).await?;

    Ok(QuotaStatus {
        dimension,
        allowed: quota_allowed(counter.count, limit),
        current: counter.count,
        limit,
        reset_at: counter.reset_at,
    })
}

async fn counter_or_init(
    pool: &PgPool,
    subscription_id: Uuid,
    dimension: QuotaDimension,
) -> Res<db::models::usage::UsageCounter> {
    if let Some(counter) = db::usage::get_counter(pool, subscription_id, dimension).await? {
        return Ok(counter);
    }

    // Counters are seeded at subscription creation; a missing row means the
    // subscription predates this dimension.
    let mut conn = pool.acquire().await?;
    db::usage::init_counters(
        &mut conn,
        subscription_id,
        db::models::usage::next_month_start(Utc::now()),
    )
    .await?;

    db::usage::get_counter(pool, subscription_id, dimension)
        .await?
        .ok_or_else(|| {
            AppError::Internal(format!(
                "Usage counter missing for subscription {} dimension {}",
                subscription_id, dimension
            ))
        })
}

/// Validates and increments a quota counter as one atomic operation. Callers
/// invoke this immediately before the quota-gated action and skip the action
/// on failure. A deadline here is a denial, never retried: retrying a consume
/// could double-count.
pub async fn consume(
    pool: &PgPool,
    timeout_ms: u64,
    user_id: Uuid,
    dimension: QuotaDimension,
) -> Res<QuotaStatus> {
    with_deadline(timeout_ms, consume_inner(pool, user_id, dimension)).await
}

async fn consume_inner(
    pool: &PgPool,
    user_id: Uuid,
    dimension: QuotaDimension,
) -> Res<QuotaStatus> {
    let subscription = ensure_subscription(pool, user_id).await?;
    let plan = catalog::plan_for_entitlement(pool, &subscription.plan_id).await;
    let limit = plan.limit_for(dimension);

    // Guarantees the row exists before the conditional increment, so a `None`
    // from try_increment can only mean the cap blocked it.
    counter_or_init(pool, subscription.id, dimension).await?;
    db::usage::reset_if_due(pool, subscription.id, dimension, Utc::now()).await?;

    match db::usage::try_increment(pool, subscription.id, dimension, limit).await? {
        Some(counter) => Ok(QuotaStatus {
            dimension,
            allowed: true,
            current: counter.count,
            limit,
            reset_at: counter.reset_at,
        }),
        None => {
            let counter = counter_or_init(pool, subscription.id, dimension).await?;
            Err(AppError::QuotaExceeded {
                dimension: dimension.to_string(),
                limit: limit.unwrap_or(counter.count),
                current: counter.count,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_dimension_is_always_allowed() {
        assert!(quota_allowed(0, None));
        assert!(quota_allowed(1_000_000, None));
    }

    #[test]
    fn capped_dimension_allows_up_to_the_limit() {
        // basic plan, letter_creation limit 5: five consumes pass, the sixth
        // would see current == limit and is denied.
        for current in 0..5 {
            assert!(quota_allowed(current, Some(5)), "count {} under 5", current);
        }
        assert!(!quota_allowed(5, Some(5)));
        assert!(!quota_allowed(6, Some(5)));
    }

    #[test]
    fn zero_limit_blocks_everything() {
        assert!(!quota_allowed(0, Some(0)));
    }
}
