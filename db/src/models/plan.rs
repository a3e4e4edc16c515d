use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::models::usage::QuotaDimension;

/// A subscription plan tier. `None` limits mean the dimension is unlimited.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub rank: i32,
    pub price_cents: i64,
    pub currency: String,
    pub billing_interval: String,
    pub ai_generation_limit: Option<i64>,
    pub letter_creation_limit: Option<i64>,
    pub cv_creation_limit: Option<i64>,
    pub export_limit: Option<i64>,
    pub features: Vec<String>,
    pub active: bool,
}

impl Plan {
    pub fn limit_for(&self, dimension: QuotaDimension) -> Option<i64> {
        match dimension {
            QuotaDimension::AiGeneration => self.ai_generation_limit,
            QuotaDimension::LetterCreation => self.letter_creation_limit,
            QuotaDimension::CvCreation => self.cv_creation_limit,
            QuotaDimension::Export => self.export_limit,
        }
    }

    pub fn interval(&self) -> BillingInterval {
        BillingInterval::from_str(&self.billing_interval).unwrap_or(BillingInterval::Monthly)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillingInterval {
    Monthly,
    Yearly,
    /// One-time purchase, never renews and never expires.
    Lifetime,
}

impl std::fmt::Display for BillingInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BillingInterval::Monthly => write!(f, "monthly"),
            BillingInterval::Yearly => write!(f, "yearly"),
            BillingInterval::Lifetime => write!(f, "lifetime"),
        }
    }
}

impl FromStr for BillingInterval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "monthly" => Ok(BillingInterval::Monthly),
            "yearly" => Ok(BillingInterval::Yearly),
            "lifetime" => Ok(BillingInterval::Lifetime),
            other => Err(format!("unknown billing interval: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_with_limits() -> Plan {
        Plan {
            id: "basic".to_string(),
            name: "Basic".to_string(),
            rank: 1,
            price_cents: 900,
            currency: "usd".to_string(),
            billing_interval: "monthly".to_string(),
            ai_generation_limit: Some(30),
            letter_creation_limit: Some(5),
            cv_creation_limit: Some(2),
            export_limit: None,
            features: vec![],
            active: true,
        }
    }

    #[test]
    fn limit_lookup_by_dimension() {
        let plan = plan_with_limits();
        assert_eq!(plan.limit_for(QuotaDimension::LetterCreation), Some(5));
        assert_eq!(plan.limit_for(QuotaDimension::Export), None);
    }

    #[test]
    fn interval_parses_with_monthly_fallback() {
        let mut plan = plan_with_limits();
        assert_eq!(plan.interval(), BillingInterval::Monthly);
        plan.billing_interval = "lifetime".to_string();
        assert_eq!(plan.interval(), BillingInterval::Lifetime);
        plan.billing_interval = "bogus".to_string();
        assert_eq!(plan.interval(), BillingInterval::Monthly);
    }
}
