use common::error::{AppError, Res};
use db::models::plan::Plan;
use sqlx::PgPool;

pub mod features;

pub use features::FeatureFlag;

/// Rank shared by premium and lifetime plans (lifetime is premium paid once).
pub const PREMIUM_RANK: i32 = 3;

/// The built-in catalog. Seeded into the store on first boot and used directly
/// whenever the store cannot answer, so entitlement checks always have a plan
/// to fall back to.
pub fn default_plans() -> Vec<Plan> {
    vec![
        Plan {
            id: "free".to_string(),
            name: "Free".to_string(),
            rank: 0,
            price_cents: 0,
            currency: "usd".to_string(),
            billing_interval: "monthly".to_string(),
            ai_generation_limit: Some(3),
            letter_creation_limit: Some(3),
            cv_creation_limit: Some(1),
            export_limit: Some(5),
            features: vec!["ai_generation".to_string(), "pdf_export".to_string()],
            active: true,
        },
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
            export_limit: Some(30),
            features: vec![
                "ai_generation".to_string(),
                "pdf_export".to_string(),
                "cv_builder".to_string(),
            ],
            active: true,
        },
        Plan {
            id: "pro".to_string(),
            name: "Pro".to_string(),
            rank: 2,
            price_cents: 1900,
            currency: "usd".to_string(),
            billing_interval: "monthly".to_string(),
            ai_generation_limit: Some(150),
            letter_creation_limit: Some(50),
            cv_creation_limit: Some(10),
            export_limit: None,
            features: vec![
                "ai_generation".to_string(),
                "pdf_export".to_string(),
                "cv_builder".to_string(),
                "docx_export".to_string(),
                "premium_templates".to_string(),
            ],
            active: true,
        },
        Plan {
            id: "premium".to_string(),
            name: "Premium".to_string(),
            rank: PREMIUM_RANK,
            price_cents: 2900,
            currency: "usd".to_string(),
            billing_interval: "monthly".to_string(),
            ai_generation_limit: None,
            letter_creation_limit: None,
            cv_creation_limit: None,
            export_limit: None,
            features: vec![
                "ai_generation".to_string(),
                "pdf_export".to_string(),
                "cv_builder".to_string(),
                "docx_export".to_string(),
                "premium_templates".to_string(),
                "priority_support".to_string(),
            ],
            active: true,
        },
        Plan {
            id: "lifetime".to_string(),
            name: "Lifetime".to_string(),
            rank: PREMIUM_RANK,
            price_cents: 19900,
            currency: "usd".to_string(),
            billing_interval: "lifetime".to_string(),
            ai_generation_limit: None,
            letter_creation_limit: None,
            cv_creation_limit: None,
            export_limit: None,
            features: vec![
                "ai_generation".to_string(),
                "pdf_export".to_string(),
                "cv_builder".to_string(),
                "docx_export".to_string(),
                "premium_templates".to_string(),
                "priority_support".to_string(),
            ],
            active: true,
        },
    ]
}

/// The most restrictive known plan. Entitlement paths fail closed to this.
pub fn fallback_free() -> Plan {
    default_plans()
        .into_iter()
        .find(|p| p.id == "free")
        .expect("built-in catalog contains the free plan")
}

/// Inserts the default catalog when the plans table is empty.
pub async fn seed_defaults(pool: &PgPool) -> Res<()> {
    if db::plan::count_plans(pool).await? > 0 {
        return Ok(());
    }
    for plan in default_plans() {
        db::plan::insert_plan(pool, &plan).await?;
        log::info!("Seeded plan {} (rank {})", plan.id, plan.rank);
    }
    Ok(())
}

pub async fn get_plan(pool: &PgPool, plan_id: &str) -> Res<Plan> {
    db::plan::get_plan(pool, plan_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Plan not found: {}", plan_id)))
}

/// Plan lookup for entitlement decisions. Never errors: an unreachable store
/// or an unknown plan id degrades to the free plan, not to "allow".
pub async fn plan_for_entitlement(pool: &PgPool, plan_id: &str) -> Plan {
    match db::plan::get_plan(pool, plan_id).await {
        Ok(Some(plan)) => plan,
        Ok(None) => {
            log::warn!(
                "Plan {} referenced by a subscription is missing from the catalog, \
                 failing closed to free",
                plan_id
            );
            fallback_free()
        }
        Err(e) => {
            log::error!("Catalog lookup for plan {} failed: {}, failing closed", plan_id, e);
            fallback_free()
        }
    }
}

/// Active plans ordered by rank. Falls back to the built-in catalog when the
/// store cannot be read, so the pricing page never renders empty.
pub async fn list_active(pool: &PgPool) -> Vec<Plan> {
    match db::plan::list_active_plans(pool).await {
        Ok(plans) if !plans.is_empty() => plans,
        Ok(_) => default_plans(),
        Err(e) => {
            log::error!("Catalog listing failed: {}, serving built-in defaults", e);
            default_plans()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::models::usage::QuotaDimension;

    #[test]
    fn defaults_are_rank_ordered_and_complete() {
        let plans = default_plans();
        let ids: Vec<&str> = plans.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["free", "basic", "pro", "premium", "lifetime"]);

        let ranks: Vec<i32> = plans.iter().map(|p| p.rank).collect();
        let mut sorted = ranks.clone();
        sorted.sort();
        assert_eq!(ranks, sorted);
    }

    #[test]
    fn lifetime_ranks_equal_to_premium() {
        let plans = default_plans();
        let premium = plans.iter().find(|p| p.id == "premium").unwrap();
        let lifetime = plans.iter().find(|p| p.id == "lifetime").unwrap();
        assert_eq!(premium.rank, lifetime.rank);
        assert_eq!(lifetime.billing_interval, "lifetime");
    }

    #[test]
    fn basic_letter_limit_is_five() {
        let plans = default_plans();
        let basic = plans.iter().find(|p| p.id == "basic").unwrap();
        assert_eq!(basic.limit_for(QuotaDimension::LetterCreation), Some(5));
    }

    #[test]
    fn fallback_is_the_most_restrictive_plan() {
        let free = fallback_free();
        assert_eq!(free.rank, 0);
        for dim in QuotaDimension::ALL {
            assert!(free.limit_for(dim).is_some(), "free must cap {}", dim);
        }
    }
}
