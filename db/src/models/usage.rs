use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// One monthly-capped countable resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuotaDimension {
    AiGeneration,
    LetterCreation,
    CvCreation,
    Export,
}

impl QuotaDimension {
    pub const ALL: [QuotaDimension; 4] = [
        QuotaDimension::AiGeneration,
        QuotaDimension::LetterCreation,
        QuotaDimension::CvCreation,
        QuotaDimension::Export,
    ];
}

impl std::fmt::Display for QuotaDimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuotaDimension::AiGeneration => write!(f, "ai_generation"),
            QuotaDimension::LetterCreation => write!(f, "letter_creation"),
            QuotaDimension::CvCreation => write!(f, "cv_creation"),
            QuotaDimension::Export => write!(f, "export"),
        }
    }
}

impl FromStr for QuotaDimension {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ai_generation" => Ok(QuotaDimension::AiGeneration),
            "letter_creation" => Ok(QuotaDimension::LetterCreation),
            "cv_creation" => Ok(QuotaDimension::CvCreation),
            "export" => Ok(QuotaDimension::Export),
            other => Err(format!("unknown quota dimension: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UsageCounter {
    pub subscription_id: Uuid,
    pub dimension: String,
    pub count: i64,
    pub reset_at: DateTime<Utc>,
}

/// First instant of the calendar month after `now`, in UTC. Stable for every
/// call within the same month, which keeps the lazy reset idempotent.
pub fn next_month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_round_trips_through_strings() {
        for dim in QuotaDimension::ALL {
            assert_eq!(QuotaDimension::from_str(&dim.to_string()), Ok(dim));
        }
        assert!(QuotaDimension::from_str("pdf_render").is_err());
    }

    #[test]
    fn next_month_start_mid_month() {
        let now = Utc.with_ymd_and_hms(2026, 8, 27, 13, 45, 12).unwrap();
        assert_eq!(
            next_month_start(now),
            Utc.with_ymd_and_hms(2026, 9, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn next_month_start_rolls_over_december() {
        let now = Utc.with_ymd_and_hms(2026, 12, 31, 23, 59, 59).unwrap();
        assert_eq!(
            next_month_start(now),
            Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn next_month_start_is_stable_within_a_month() {
        let a = Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2026, 8, 31, 23, 59, 59).unwrap();
        assert_eq!(next_month_start(a), next_month_start(b));
    }
}
