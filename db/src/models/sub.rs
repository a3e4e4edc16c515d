use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: String,
    pub status: String,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub cancel_at_period_end: bool,
    pub auto_renew: bool,
    pub cancellation_reason: Option<String>,
    pub external_order_id: Option<String>,
    pub external_subscription_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn status(&self) -> SubscriptionStatus {
        SubscriptionStatus::from_str(&self.status).unwrap_or(SubscriptionStatus::Expired)
    }

    pub fn is_period_elapsed(&self, now: DateTime<Utc>) -> bool {
        now >= self.current_period_end
    }

    /// Terminal status a lapsed row ends in. A pending at-period-end
    /// cancellation was a cancellation in flight, so the lapse completes it;
    /// everything else simply expires.
    pub fn lapse_status(&self) -> SubscriptionStatus {
        if self.cancel_at_period_end {
            SubscriptionStatus::Cancelled
        } else {
            SubscriptionStatus::Expired
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionStatus {
    Trial,
    Active,
    Cancelled,
    Expired,
}

impl SubscriptionStatus {
    /// Terminal states are kept for audit history and never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Cancelled | SubscriptionStatus::Expired
        )
    }

    pub fn grants_access(&self) -> bool {
        matches!(self, SubscriptionStatus::Trial | SubscriptionStatus::Active)
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriptionStatus::Trial => write!(f, "trial"),
            SubscriptionStatus::Active => write!(f, "active"),
            SubscriptionStatus::Cancelled => write!(f, "cancelled"),
            SubscriptionStatus::Expired => write!(f, "expired"),
        }
    }
}

impl FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trial" => Ok(SubscriptionStatus::Trial),
            "active" => Ok(SubscriptionStatus::Active),
            "cancelled" => Ok(SubscriptionStatus::Cancelled),
            "expired" => Ok(SubscriptionStatus::Expired),
            other => Err(format!("unknown subscription status: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn terminal_states_do_not_grant_access() {
        assert!(SubscriptionStatus::Trial.grants_access());
        assert!(SubscriptionStatus::Active.grants_access());
        assert!(!SubscriptionStatus::Cancelled.grants_access());
        assert!(!SubscriptionStatus::Expired.grants_access());
        assert!(SubscriptionStatus::Cancelled.is_terminal());
        assert!(!SubscriptionStatus::Active.is_terminal());
    }

    #[test]
    fn period_elapsed_is_inclusive() {
        let end = Utc.with_ymd_and_hms(2026, 9, 1, 0, 0, 0).unwrap();
        let sub = Subscription {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            plan_id: "basic".to_string(),
            status: "active".to_string(),
            current_period_start: Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap(),
            current_period_end: end,
            cancel_at_period_end: false,
            auto_renew: true,
            cancellation_reason: None,
            external_order_id: None,
            external_subscription_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(!sub.is_period_elapsed(end - chrono::Duration::seconds(1)));
        assert!(sub.is_period_elapsed(end));
    }

    #[test]
    fn lapsed_pending_cancellation_completes_as_cancelled() {
        let mut sub = Subscription {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            plan_id: "basic".to_string(),
            status: "active".to_string(),
            current_period_start: Utc::now(),
            current_period_end: Utc::now(),
            cancel_at_period_end: true,
            auto_renew: false,
            cancellation_reason: None,
            external_order_id: None,
            external_subscription_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(sub.lapse_status(), SubscriptionStatus::Cancelled);

        sub.cancel_at_period_end = false;
        assert_eq!(sub.lapse_status(), SubscriptionStatus::Expired);
    }
}
