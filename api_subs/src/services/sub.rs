use chrono::{DateTime, Months, Utc};
use common::error::{AppError, Res};
use sqlx::PgPool;
use uuid::Uuid;

use db::{
    dtos::sub::SubscriptionCreate,
    models::{
        plan::BillingInterval,
        sub::{Subscription, SubscriptionStatus},
    },
};

pub struct CreateSubscription {
    pub user_id: Uuid,
    pub plan_id: String,
    pub trial: bool,
    pub external_order_id: Option<String>,
    pub external_subscription_id: Option<String>,
}

/// End of a billing period starting at `from`. Lifetime plans never renew, so
/// their single period is pushed far enough out that it never elapses.
pub fn compute_period_end(interval: BillingInterval, from: DateTime<Utc>) -> DateTime<Utc> {
    match interval {
        BillingInterval::Monthly => from + Months::new(1),
        BillingInterval::Yearly => from + Months::new(12),
        BillingInterval::Lifetime => from + Months::new(12 * 100),
    }
}

/// Creates a subscription for a user. Any prior trial/active subscription is
/// cancelled in the same transaction, so no reader ever observes two active
/// rows for one user.
pub async fn create_subscription(pool: &PgPool, req: CreateSubscription) -> Res<Subscription> {
    let plan = db::plan::get_plan(pool, &req.plan_id)
        .await?
        .ok_or_else(|| AppError::BadRequest(format!("Unknown plan: {}", req.plan_id)))?;

    let now = Utc::now();
    let status = if req.trial {
        SubscriptionStatus::Trial
    } else {
        SubscriptionStatus::Active
    };

    let subscription = db::sub::create_with_counters(
        pool,
        SubscriptionCreate {
            user_id: req.user_id,
            plan_id: plan.id.clone(),
            status,
            current_period_start: now,
            current_period_end: compute_period_end(plan.interval(), now),
            auto_renew: plan.interval() != BillingInterval::Lifetime,
            external_order_id: req.external_order_id,
            external_subscription_id: req.external_subscription_id,
        },
    )
    .await?;

    log::info!(
        "Subscription {} created for user {} on plan {} ({})",
        subscription.id,
        subscription.user_id,
        subscription.plan_id,
        subscription.status
    );
    Ok(subscription)
}

/// Advances the billing period of an active subscription. The new period
/// starts where the old one ended; a pending at-period-end cancellation is
/// cleared by a successful renewal.
pub async fn renew_subscription(
    pool: &PgPool,
    subscription_id: Uuid,
    new_period_end: Option<DateTime<Utc>>,
) -> Res<Subscription> {
    let subscription = db::sub::get_by_id(pool, subscription_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Subscription not found: {}", subscription_id)))?;

    if subscription.status() != SubscriptionStatus::Active {
        return Err(AppError::Conflict(format!(
            "Only active subscriptions can be renewed, status is {}",
            subscription.status
        )));
    }

    let plan = catalog::plan_for_entitlement(pool, &subscription.plan_id).await;
    if plan.interval() == BillingInterval::Lifetime {
        return Err(AppError::BadRequest(
            "Lifetime subscriptions do not renew".to_string(),
        ));
    }

    let new_start = subscription.current_period_end;
    let new_end = new_period_end.unwrap_or_else(|| compute_period_end(plan.interval(), new_start));

    let renewed = db::sub::renew(pool, subscription_id, new_start, new_end).await?;
    log::info!(
        "Subscription {} renewed until {}",
        renewed.id,
        renewed.current_period_end
    );
    Ok(renewed)
}

/// How a cancel request resolves against the subscription's current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelAction {
    /// Status stays active and access continues until the period lapses.
    FlagAtPeriodEnd,
    /// Status becomes cancelled and the period is closed at now.
    CancelNow,
}

pub fn cancel_action(status: SubscriptionStatus, at_period_end: bool) -> Res<CancelAction> {
    match status {
        SubscriptionStatus::Cancelled => Err(AppError::Conflict(
            "Subscription is already cancelled".to_string(),
        )),
        SubscriptionStatus::Expired => Err(AppError::Conflict(
            "Subscription has already expired".to_string(),
        )),
        SubscriptionStatus::Trial | SubscriptionStatus::Active => Ok(if at_period_end {
            CancelAction::FlagAtPeriodEnd
        } else {
            CancelAction::CancelNow
        }),
    }
}

/// Cancels a subscription. With `at_period_end` the status stays active and
/// access continues until the period lapses; otherwise the subscription is
/// cancelled immediately and the period is closed at now.
pub async fn cancel_subscription(
    pool: &PgPool,
    subscription_id: Uuid,
    at_period_end: bool,
    reason: Option<String>,
) -> Res<Subscription> {
    let subscription = db::sub::get_by_id(pool, subscription_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Subscription not found: {}", subscription_id)))?;

    let cancelled = match cancel_action(subscription.status(), at_period_end)? {
        CancelAction::FlagAtPeriodEnd => {
            db::sub::set_cancel_at_period_end(pool, subscription_id, reason).await?
        }
        CancelAction::CancelNow => {
            db::sub::cancel_now(pool, subscription_id, reason, Utc::now()).await?
        }
    };

    log::info!(
        "Subscription {} cancelled (at_period_end: {})",
        cancelled.id,
        at_period_end
    );
    Ok(cancelled)
}

/// Cancels whatever non-terminal subscription the user currently holds,
/// without needing its id. Companion to `cancel_subscription`, kept as a
/// separately named operation instead of an overload.
pub async fn cancel_active_for_user(
    pool: &PgPool,
    user_id: Uuid,
    reason: Option<String>,
) -> Res<Vec<Subscription>> {
    let cancelled = db::sub::cancel_non_terminal_for_user(pool, user_id, reason, Utc::now()).await?;
    for sub in &cancelled {
        log::info!("Subscription {} cancelled for user {}", sub.id, user_id);
    }
    Ok(cancelled)
}

/// The user's current trial/active subscription, if any. An elapsed period is
/// closed out on read, so a stale row never grants access past its period end.
pub async fn get_active_subscription(pool: &PgPool, user_id: Uuid) -> Res<Option<Subscription>> {
    let rows = db::sub::get_non_terminal_by_user(pool, user_id).await?;

    if rows.len() > 1 {
        // Should be unreachable with the partial unique index in place.
        log::error!(
            "Invariant violation: user {} holds {} non-terminal subscriptions",
            user_id,
            rows.len()
        );
    }

    let Some(subscription) = rows.into_iter().next() else {
        return Ok(None);
    };

    if subscription.is_period_elapsed(Utc::now()) {
        if let Some(closed) = db::sub::close_lapsed(pool, &subscription).await? {
            log::info!(
                "Subscription {} lazily closed on read ({})",
                closed.id,
                closed.status
            );
        }
        return Ok(None);
    }

    Ok(Some(subscription))
}

/// Periodic sweep closing out every elapsed trial/active subscription: rows
/// flagged to cancel at period end become cancelled, the rest expire. Runs
/// outside the request path and is safe to skip a cycle.
pub async fn expire_due_subscriptions(pool: &PgPool) -> Res<usize> {
    let closed = db::sub::expire_due(pool, Utc::now()).await?;
    for id in &closed {
        log::info!("Subscription {} closed by sweep", id);
    }
    Ok(closed.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn monthly_period_ends_one_month_out() {
        let from = Utc.with_ymd_and_hms(2026, 8, 15, 10, 0, 0).unwrap();
        assert_eq!(
            compute_period_end(BillingInterval::Monthly, from),
            Utc.with_ymd_and_hms(2026, 9, 15, 10, 0, 0).unwrap()
        );
    }

    #[test]
    fn monthly_period_clamps_short_months() {
        let from = Utc.with_ymd_and_hms(2026, 1, 31, 0, 0, 0).unwrap();
        assert_eq!(
            compute_period_end(BillingInterval::Monthly, from),
            Utc.with_ymd_and_hms(2026, 2, 28, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn yearly_period_ends_one_year_out() {
        let from = Utc.with_ymd_and_hms(2026, 8, 15, 10, 0, 0).unwrap();
        assert_eq!(
            compute_period_end(BillingInterval::Yearly, from),
            Utc.with_ymd_and_hms(2027, 8, 15, 10, 0, 0).unwrap()
        );
    }

    #[test]
    fn lifetime_period_never_elapses_in_practice() {
        let from = Utc.with_ymd_and_hms(2026, 8, 15, 10, 0, 0).unwrap();
        let end = compute_period_end(BillingInterval::Lifetime, from);
        assert!(end > from + Months::new(12 * 99));
    }

    #[test]
    fn cancelling_twice_is_a_conflict() {
        assert!(matches!(
            cancel_action(SubscriptionStatus::Cancelled, false),
            Err(AppError::Conflict(_))
        ));
        assert!(matches!(
            cancel_action(SubscriptionStatus::Cancelled, true),
            Err(AppError::Conflict(_))
        ));
    }

    #[test]
    fn cancelling_an_expired_subscription_is_a_conflict() {
        assert!(matches!(
            cancel_action(SubscriptionStatus::Expired, false),
            Err(AppError::Conflict(_))
        ));
    }

    #[test]
    fn at_period_end_cancel_only_flags_the_subscription() {
        assert_eq!(
            cancel_action(SubscriptionStatus::Active, true).unwrap(),
            CancelAction::FlagAtPeriodEnd
        );
        assert_eq!(
            cancel_action(SubscriptionStatus::Trial, true).unwrap(),
            CancelAction::FlagAtPeriodEnd
        );
    }

    #[test]
    fn immediate_cancel_closes_the_subscription_now() {
        assert_eq!(
            cancel_action(SubscriptionStatus::Active, false).unwrap(),
            CancelAction::CancelNow
        );
    }
}
