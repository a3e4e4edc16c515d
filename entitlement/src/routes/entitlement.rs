use actix_web::{Responder, get, post, web};
use common::{
    env_config::Config,
    error::{AppError, Res},
    http::Success,
    jwt::JwtClaims,
};
use sqlx::PgPool;
use std::{str::FromStr, sync::Arc};

use crate::{
    dtos::entitlement::{ConsumeRequest, FeatureResponse, QuotaResponse},
    services,
};
use catalog::FeatureFlag;
use db::models::usage::QuotaDimension;

/// Advisory quota read for one dimension. Never gates a side effect; callers
/// that are about to perform the action must POST /consume instead.
///
/// # Output
/// - Success: Returns `{allowed, current, limit, reset_at}` for the dimension
/// - Error: Returns 400 for an unknown dimension
#[get("/quota/{dimension}")]
pub async fn get_quota(
    claims: web::ReqData<JwtClaims>,
    path: web::Path<String>,
    pool: web::Data<Arc<PgPool>>,
    config: web::Data<Arc<Config>>,
) -> Res<impl Responder> {
    let dimension = QuotaDimension::from_str(&path.into_inner())
        .map_err(AppError::BadRequest)?;

    let quota = services::entitlement::check_quota(
        pool.get_ref().as_ref(),
        config.store_timeout_ms,
        claims.user_id,
        dimension,
    )
    .await?;

    Success::ok(QuotaResponse { quota })
}

/// Atomically validates and records one unit of usage.
///
/// # Input
/// - `req`: JSON payload with the `dimension` to consume
///
/// # Output
/// - Success: Returns the counter state after the increment
/// - Error: 403 with `{dimension, limit, current}` when the quota is spent;
///   503 when the store misses its deadline (the action must not proceed)
#[post("/consume")]
pub async fn post_consume(
    claims: web::ReqData<JwtClaims>,
    req: web::Json<ConsumeRequest>,
    pool: web::Data<Arc<PgPool>>,
    config: web::Data<Arc<Config>>,
) -> Res<impl Responder> {
    let dimension =
        QuotaDimension::from_str(&req.dimension).map_err(AppError::BadRequest)?;

    let quota = services::entitlement::consume(
        pool.get_ref().as_ref(),
        config.store_timeout_ms,
        claims.user_id,
        dimension,
    )
    .await?;

    Success::ok(QuotaResponse { quota })
}

/// Whether the user's plan tier unlocks a feature flag.
///
/// # Output
/// - Success: Returns `{feature, allowed}`; no active subscription is judged
///   as the free plan
/// - Error: Returns 400 for an unknown flag
#[get("/feature/{flag}")]
pub async fn get_feature(
    claims: web::ReqData<JwtClaims>,
    path: web::Path<String>,
    pool: web::Data<Arc<PgPool>>,
    config: web::Data<Arc<Config>>,
) -> Res<impl Responder> {
    let feature = FeatureFlag::from_str(&path.into_inner())
        .map_err(AppError::BadRequest)?;

    let allowed = services::entitlement::can_use_feature(
        pool.get_ref().as_ref(),
        config.store_timeout_ms,
        claims.user_id,
        feature,
    )
    .await?;

    Success::ok(FeatureResponse { feature, allowed })
}
