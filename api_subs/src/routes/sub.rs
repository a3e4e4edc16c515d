use actix_web::{Responder, get, post, web};
use common::{
    env_config::Config,
    error::{AppError, Res},
    http::Success,
    jwt::JwtClaims,
    pay,
};
use sqlx::PgPool;
use std::sync::Arc;

use crate::{
    dtos::sub::{
        CancelRequest, CheckoutRequest, CheckoutResponse, PlansResponse, SubscriptionResponse,
        UpdateAutoRenewRequest,
    },
    services,
};

/// Retrieves all available subscription plans, cheapest tier first.
///
/// # Output
/// - Success: Returns a JSON object containing an array of plans. Falls back
///   to the built-in catalog when the store cannot be read.
#[get("/plans")]
pub async fn get_plans(pool: web::Data<Arc<PgPool>>) -> Res<impl Responder> {
    let plans = catalog::list_active(pool.get_ref().as_ref()).await;
    Success::ok(PlansResponse { plans })
}

/// Retrieves the authenticated user's current subscription.
///
/// # Output
/// - Success: Returns the trial/active subscription. A subscription whose
///   period has elapsed is closed out on read and reported as 404.
/// - Error: Returns 404 Not Found if no active subscription exists
#[get("/current")]
pub async fn get_current(
    claims: web::ReqData<JwtClaims>,
    pool: web::Data<Arc<PgPool>>,
) -> Res<impl Responder> {
    let subscription =
        services::sub::get_active_subscription(pool.get_ref().as_ref(), claims.user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("No active subscription found".to_string()))?;

    Success::ok(SubscriptionResponse { subscription })
}

/// Creates a payment-provider checkout session for a catalog plan.
///
/// # Input
/// - `req`: JSON payload with `plan_id`, `success_url` and `cancel_url`
///
/// # Output
/// - Success: Returns a JSON object with the URL of the hosted checkout page.
///   The subscription itself is created when the provider's webhook confirms
///   the completed checkout, not here.
#[post("/checkout")]
pub async fn post_checkout(
    claims: web::ReqData<JwtClaims>,
    req: web::Json<CheckoutRequest>,
    pool: web::Data<Arc<PgPool>>,
    config: web::Data<Arc<Config>>,
) -> Res<impl Responder> {
    let plan = catalog::get_plan(pool.get_ref().as_ref(), &req.plan_id).await?;

    let client = pay::create_client(&config.stripe_secret_key);
    let customer = pay::create_customer(&client, &claims.email, &claims.email).await?;

    let session = services::pay::create_checkout_session(
        &client,
        &customer,
        claims.user_id,
        &plan,
        &req.success_url,
        &req.cancel_url,
    )
    .await?;

    Success::created(CheckoutResponse {
        url: session.url.unwrap_or_else(|| "".to_string()),
    })
}

/// Cancels the authenticated user's current subscription.
///
/// # Input
/// - `req`: JSON payload with `at_period_end` (default false) and an optional
///   `reason`
///
/// # Output
/// - Success: Returns the updated subscription. With `at_period_end` the
///   status stays active until the period lapses; otherwise access ends now.
/// - Error: 404 when there is nothing to cancel, 409 on double-cancel
#[post("/cancel")]
pub async fn post_cancel(
    claims: web::ReqData<JwtClaims>,
    req: web::Json<CancelRequest>,
    pool: web::Data<Arc<PgPool>>,
) -> Res<impl Responder> {
    let pool = pool.get_ref().as_ref();
    let subscription = services::sub::get_active_subscription(pool, claims.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("No active subscription found".to_string()))?;

    let cancelled = services::sub::cancel_subscription(
        pool,
        subscription.id,
        req.at_period_end,
        req.reason.clone(),
    )
    .await?;

    Success::ok(SubscriptionResponse {
        subscription: cancelled,
    })
}

/// Updates the auto-renewal setting for the user's current subscription.
///
/// # Input
/// - `req`: JSON payload with `auto_renew`; disabling it is equivalent to
///   cancelling at period end
///
/// # Output
/// - Success: Returns the updated subscription
/// - Error: Returns 404 Not Found if no subscription exists
#[post("/auto-renew")]
pub async fn post_auto_renew(
    claims: web::ReqData<JwtClaims>,
    req: web::Json<UpdateAutoRenewRequest>,
    pool: web::Data<Arc<PgPool>>,
) -> Res<impl Responder> {
    let pool = pool.get_ref().as_ref();
    let subscription = services::sub::get_active_subscription(pool, claims.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("No active subscription found".to_string()))?;

    let updated = db::sub::set_auto_renew(pool, subscription.id, req.auto_renew).await?;

    Success::ok(SubscriptionResponse {
        subscription: updated,
    })
}
