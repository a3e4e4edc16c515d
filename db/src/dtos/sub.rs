use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::sub::SubscriptionStatus;

/// Everything needed to insert a subscription row. The lifecycle service
/// computes the period bounds from the plan's billing interval.
#[derive(Debug, Clone)]
pub struct SubscriptionCreate {
    pub user_id: Uuid,
    pub plan_id: String,
    pub status: SubscriptionStatus,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub auto_renew: bool,
    pub external_order_id: Option<String>,
    pub external_subscription_id: Option<String>,
}
