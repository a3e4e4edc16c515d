use chrono::{TimeZone, Utc};
use common::error::{AppError, Res};
use sqlx::PgPool;
use std::collections::HashMap;
use stripe::{
    CheckoutSession, CheckoutSessionMode, Client, CreateCheckoutSession, CreateProduct, Currency,
    Customer, Event, EventObject, EventType, Expandable, Product, Webhook,
};
use uuid::Uuid;

use crate::services::sub::{CreateSubscription, self as sub_service};
use db::models::{plan::BillingInterval, plan::Plan, sub::SubscriptionStatus};

/// Checkout mode for a plan: recurring plans subscribe, lifetime is a one-time
/// payment.
pub fn checkout_mode(interval: BillingInterval) -> CheckoutSessionMode {
    match interval {
        BillingInterval::Lifetime => CheckoutSessionMode::Payment,
        _ => CheckoutSessionMode::Subscription,
    }
}

fn recurring_for(
    interval: BillingInterval,
) -> Option<stripe::CreateCheckoutSessionLineItemsPriceDataRecurring> {
    let interval = match interval {
        BillingInterval::Monthly => {
            stripe::CreateCheckoutSessionLineItemsPriceDataRecurringInterval::Month
        }
        BillingInterval::Yearly => {
            stripe::CreateCheckoutSessionLineItemsPriceDataRecurringInterval::Year
        }
        BillingInterval::Lifetime => return None,
    };
    Some(stripe::CreateCheckoutSessionLineItemsPriceDataRecurring {
        interval,
        interval_count: Some(1),
    })
}

/// Creates a checkout session for a catalog plan. The user id rides along as
/// the client reference and the plan id in the session metadata, so the
/// webhook can map the completed session back to our records.
pub async fn create_checkout_session(
    client: &Client,
    customer: &Customer,
    user_id: Uuid,
    plan: &Plan,
    success_url: &str,
    cancel_url: &str,
) -> Res<CheckoutSession> {
    let product_name = format!("Letterdesk {}", plan.name);
    let product = Product::create(client, CreateProduct::new(&product_name))
        .await
        .map_err(AppError::from)?;

    let user_ref = user_id.to_string();
    let mut metadata = HashMap::new();
    metadata.insert("plan_id".to_string(), plan.id.clone());

    let params = CreateCheckoutSession {
        payment_method_types: Some(vec![stripe::CreateCheckoutSessionPaymentMethodTypes::Card]),
        line_items: Some(vec![stripe::CreateCheckoutSessionLineItems {
            price_data: Some(stripe::CreateCheckoutSessionLineItemsPriceData {
                currency: Currency::USD,
                product: Some(product.id.to_string()),
                recurring: recurring_for(plan.interval()),
                unit_amount: Some(plan.price_cents),
                ..Default::default()
            }),
            quantity: Some(1),
            ..Default::default()
        }]),
        mode: Some(checkout_mode(plan.interval())),
        success_url: Some(success_url),
        cancel_url: Some(cancel_url),
        customer: Some(customer.id.clone()),
        client_reference_id: Some(user_ref.as_str()),
        metadata: Some(metadata),
        ..Default::default()
    };
    CheckoutSession::create(client, params)
        .await
        .map_err(AppError::from)
}

/// Creates an event for the webhook based on the request payload and signature.
/// Requires a webhook secret key.
pub fn construct_event(payload: &str, signature: &str, webhook_secret: &str) -> Res<Event> {
    match Webhook::construct_event(payload, signature, webhook_secret) {
        Ok(event) => Ok(event),
        Err(e) => {
            log::warn!("Error constructing webhook event: {}", e);
            Err(AppError::BadRequest(format!("Webhook Error: {}", e)))
        }
    }
}

fn expandable_id<T: stripe::Object>(expandable: &Expandable<T>) -> String
where
    T::Id: ToString,
{
    match expandable {
        Expandable::Id(id) => id.to_string(),
        Expandable::Object(obj) => obj.id().to_string(),
    }
}

/// Applies a provider notification. Delivery is at-least-once: the event id
/// is inserted inside a transaction that only commits once the event's
/// effects have been applied. A failed application rolls the id back, so the
/// provider's redelivery is not mistaken for a duplicate and gets retried;
/// a real duplicate is dropped before any effect runs.
pub async fn apply_event(pool: &PgPool, event: Event) -> Res<()> {
    let event_id = event.id.to_string();
    let event_type = event.type_.to_string();

    let mut tx = pool.begin().await?;
    if !db::webhook::record_event_if_new(&mut *tx, &event_id, &event_type).await? {
        log::info!("Duplicate webhook event {} ({}), skipping", event_id, event_type);
        return Ok(());
    }

    log::info!("Processing webhook event {} ({})", event_id, event_type);
    dispatch_event(pool, event).await?;

    tx.commit().await?;
    Ok(())
}

async fn dispatch_event(pool: &PgPool, event: Event) -> Res<()> {
    let event_type = event.type_.to_string();

    match event.type_ {
        EventType::CheckoutSessionCompleted => {
            if let EventObject::CheckoutSession(session) = event.data.object {
                apply_checkout_completed(pool, session).await?;
            }
        }
        EventType::CustomerSubscriptionUpdated => {
            if let EventObject::Subscription(subscription) = event.data.object {
                apply_subscription_updated(pool, subscription).await?;
            }
        }
        EventType::CustomerSubscriptionDeleted => {
            if let EventObject::Subscription(subscription) = event.data.object {
                apply_subscription_deleted(pool, subscription).await?;
            }
        }
        EventType::InvoicePaymentFailed => {
            if let EventObject::Invoice(invoice) = event.data.object {
                let external_id = invoice.subscription.as_ref().map(|s| expandable_id(s));
                // No immediate revocation. Access is honored through the
                // current period end and the expiry sweep closes it out.
                log::warn!(
                    "Payment failed for provider subscription {:?}, grace window applies",
                    external_id
                );
            }
        }
        EventType::PaymentIntentSucceeded => {
            if let EventObject::PaymentIntent(payment_intent) = event.data.object {
                log::info!("PaymentIntent was successful: {}", payment_intent.id);
            }
        }
        _ => {
            log::info!("Unhandled event type: {}", event_type);
        }
    }

    Ok(())
}

async fn apply_checkout_completed(pool: &PgPool, session: CheckoutSession) -> Res<()> {
    let Some(user_id) = session
        .client_reference_id
        .as_deref()
        .and_then(|s| Uuid::parse_str(s).ok())
    else {
        log::warn!(
            "Checkout session {} completed without a usable client reference, ignoring",
            session.id
        );
        return Ok(());
    };

    let Some(plan_id) = session
        .metadata
        .as_ref()
        .and_then(|m| m.get("plan_id"))
        .cloned()
    else {
        log::warn!(
            "Checkout session {} completed without a plan_id in metadata, ignoring",
            session.id
        );
        return Ok(());
    };

    let external_subscription_id = session.subscription.as_ref().map(|s| expandable_id(s));

    sub_service::create_subscription(
        pool,
        CreateSubscription {
            user_id,
            plan_id,
            trial: false,
            external_order_id: Some(session.id.to_string()),
            external_subscription_id,
        },
    )
    .await?;
    Ok(())
}

async fn apply_subscription_updated(
    pool: &PgPool,
    provider_sub: stripe::Subscription,
) -> Res<()> {
    let external_id = provider_sub.id.to_string();
    let Some(stored) = db::sub::get_by_external_subscription_id(pool, &external_id).await? else {
        log::warn!(
            "Provider subscription {} updated but no internal record maps to it",
            external_id
        );
        return Ok(());
    };

    let provider_end = Utc
        .timestamp_opt(provider_sub.current_period_end, 0)
        .single();

    if stored.status() == SubscriptionStatus::Active {
        if let Some(provider_end) = provider_end {
            if provider_end > stored.current_period_end {
                sub_service::renew_subscription(pool, stored.id, Some(provider_end)).await?;
            }
        }
    }

    if provider_sub.cancel_at_period_end && !stored.cancel_at_period_end {
        db::sub::set_cancel_at_period_end(pool, stored.id, None).await?;
        log::info!(
            "Subscription {} flagged to lapse at period end by provider",
            stored.id
        );
    }

    Ok(())
}

async fn apply_subscription_deleted(
    pool: &PgPool,
    provider_sub: stripe::Subscription,
) -> Res<()> {
    let external_id = provider_sub.id.to_string();
    let Some(stored) = db::sub::get_by_external_subscription_id(pool, &external_id).await? else {
        log::warn!(
            "Provider subscription {} deleted but no internal record maps to it",
            external_id
        );
        return Ok(());
    };

    match sub_service::cancel_subscription(pool, stored.id, false, Some("provider cancellation".to_string())).await {
        Ok(_) => Ok(()),
        // Already terminal locally; the provider catching up is not an error.
        Err(AppError::Conflict(msg)) => {
            log::info!("Subscription {} already terminal: {}", stored.id, msg);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifetime_plans_check_out_as_one_time_payments() {
        assert_eq!(
            checkout_mode(BillingInterval::Lifetime),
            CheckoutSessionMode::Payment
        );
        assert_eq!(
            checkout_mode(BillingInterval::Monthly),
            CheckoutSessionMode::Subscription
        );
        assert_eq!(
            checkout_mode(BillingInterval::Yearly),
            CheckoutSessionMode::Subscription
        );
    }

    #[test]
    fn recurring_intervals_map_per_plan() {
        assert!(recurring_for(BillingInterval::Lifetime).is_none());
        let monthly = recurring_for(BillingInterval::Monthly).unwrap();
        assert_eq!(monthly.interval_count, Some(1));
    }
}
