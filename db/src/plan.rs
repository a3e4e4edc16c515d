use common::error::{AppError, Res};
use sqlx::{Executor, Postgres};

use crate::models::plan::Plan;

pub async fn get_plan<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    plan_id: &str,
) -> Res<Option<Plan>> {
    sqlx::query_as::<_, Plan>("SELECT * FROM plans WHERE id = $1")
        .bind(plan_id)
        .fetch_optional(executor)
        .await
        .map_err(AppError::from)
}

pub async fn list_active_plans<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
) -> Res<Vec<Plan>> {
    sqlx::query_as::<_, Plan>("SELECT * FROM plans WHERE active = TRUE ORDER BY rank, price_cents")
        .fetch_all(executor)
        .await
        .map_err(AppError::from)
}

pub async fn count_plans<'e, E: Executor<'e, Database = Postgres>>(executor: E) -> Res<i64> {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM plans")
        .fetch_one(executor)
        .await
        .map_err(AppError::from)
}

pub async fn insert_plan<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    plan: &Plan,
) -> Res<()> {
    sqlx::query(
        r#"
        INSERT INTO plans (id, name, rank, price_cents, currency, billing_interval,
                           ai_generation_limit, letter_creation_limit, cv_creation_limit,
                           export_limit, features, active)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(&plan.id)
    .bind(&plan.name)
    .bind(plan.rank)
    .bind(plan.price_cents)
    .bind(&plan.currency)
    .bind(&plan.billing_interval)
    .bind(plan.ai_generation_limit)
    .bind(plan.letter_creation_limit)
    .bind(plan.cv_creation_limit)
    .bind(plan.export_limit)
    .bind(&plan.features)
    .bind(plan.active)
    .execute(executor)
    .await?;
    Ok(())
}
