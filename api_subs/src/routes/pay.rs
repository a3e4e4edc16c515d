use actix_web::{Responder, post, web};
use common::{
    env_config::Config,
    error::{AppError, Res},
    http::Success,
};
use sqlx::PgPool;
use std::sync::Arc;

use crate::{dtos::pay::WebhookResponse, services};

/// Handles payment-provider webhook events.
///
/// # Input
/// - `payload`: Raw string containing the webhook event data
/// - `req`: HTTP request containing the provider signature in headers
///
/// # Output
/// - Success: Returns 200 OK once the event is recorded and applied. A
///   duplicate event id is acknowledged without re-applying effects.
/// - Error: Returns 400 Bad Request for a missing or invalid signature
///
/// # Note
/// This endpoint is called by the payment provider's servers, not by the
/// dashboard. Configure it in the provider dashboard and set the signing
/// secret in the environment as STRIPE_WEBHOOK_SECRET.
#[post("/webhook")]
async fn post_webhook(
    payload: String,
    req: actix_web::HttpRequest,
    pool: web::Data<Arc<PgPool>>,
    config: web::Data<Arc<Config>>,
) -> Res<impl Responder> {
    let signature = match req.headers().get("stripe-signature") {
        Some(signature) => signature.to_str().unwrap_or(""),
        None => return Err(AppError::BadRequest("Stripe signature missing".to_string())),
    };

    let event =
        services::pay::construct_event(&payload, signature, &config.stripe_webhook_secret)?;
    services::pay::apply_event(pool.get_ref().as_ref(), event).await?;

    Success::ok(WebhookResponse { received: true })
}
