use serde::{Deserialize, Serialize};
use std::str::FromStr;

use db::models::plan::Plan;

/// Capability matrix: each flag names the minimum plan rank that unlocks it.
/// Quota dimensions cap how often a feature runs; flags gate whether it runs
/// at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureFlag {
    AiGeneration,
    PdfExport,
    CvBuilder,
    DocxExport,
    PremiumTemplates,
    PrioritySupport,
}

impl FeatureFlag {
    pub fn min_rank(&self) -> i32 {
        match self {
            FeatureFlag::AiGeneration => 0,
            FeatureFlag::PdfExport => 0,
            FeatureFlag::CvBuilder => 1,
            FeatureFlag::DocxExport => 2,
            FeatureFlag::PremiumTemplates => 2,
            FeatureFlag::PrioritySupport => 3,
        }
    }

    pub fn allowed_for(&self, plan: &Plan) -> bool {
        plan.rank >= self.min_rank()
    }
}

impl std::fmt::Display for FeatureFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeatureFlag::AiGeneration => write!(f, "ai_generation"),
            FeatureFlag::PdfExport => write!(f, "pdf_export"),
            FeatureFlag::CvBuilder => write!(f, "cv_builder"),
            FeatureFlag::DocxExport => write!(f, "docx_export"),
            FeatureFlag::PremiumTemplates => write!(f, "premium_templates"),
            FeatureFlag::PrioritySupport => write!(f, "priority_support"),
        }
    }
}

impl FromStr for FeatureFlag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ai_generation" => Ok(FeatureFlag::AiGeneration),
            "pdf_export" => Ok(FeatureFlag::PdfExport),
            "cv_builder" => Ok(FeatureFlag::CvBuilder),
            "docx_export" => Ok(FeatureFlag::DocxExport),
            "premium_templates" => Ok(FeatureFlag::PremiumTemplates),
            "priority_support" => Ok(FeatureFlag::PrioritySupport),
            other => Err(format!("unknown feature flag: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::default_plans;

    #[test]
    fn free_plan_gets_only_rank_zero_features() {
        let plans = default_plans();
        let free = plans.iter().find(|p| p.id == "free").unwrap();
        assert!(FeatureFlag::AiGeneration.allowed_for(free));
        assert!(FeatureFlag::PdfExport.allowed_for(free));
        assert!(!FeatureFlag::CvBuilder.allowed_for(free));
        assert!(!FeatureFlag::DocxExport.allowed_for(free));
        assert!(!FeatureFlag::PrioritySupport.allowed_for(free));
    }

    #[test]
    fn lifetime_matches_premium_capabilities() {
        let plans = default_plans();
        let premium = plans.iter().find(|p| p.id == "premium").unwrap();
        let lifetime = plans.iter().find(|p| p.id == "lifetime").unwrap();
        for flag in [
            FeatureFlag::AiGeneration,
            FeatureFlag::PdfExport,
            FeatureFlag::CvBuilder,
            FeatureFlag::DocxExport,
            FeatureFlag::PremiumTemplates,
            FeatureFlag::PrioritySupport,
        ] {
            assert_eq!(flag.allowed_for(premium), flag.allowed_for(lifetime));
        }
    }

    #[test]
    fn flag_names_round_trip() {
        for flag in [
            FeatureFlag::AiGeneration,
            FeatureFlag::PdfExport,
            FeatureFlag::CvBuilder,
            FeatureFlag::DocxExport,
            FeatureFlag::PremiumTemplates,
            FeatureFlag::PrioritySupport,
        ] {
            assert_eq!(FeatureFlag::from_str(&flag.to_string()), Ok(flag));
        }
    }
}
