mod cors;

use std::{sync::Arc, time::Duration};

use actix_web::{
    App, HttpServer,
    web::{self},
};
use common::env_config::Config;
use limiter::window::FixedWindowStore;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // get env vars
    let config = Config::from_env();
    let config_data = config.clone();

    // get info
    let is_production = config.environment == "production";
    let origin = config.cors_allowed_origin.clone();

    // init logger
    logger::setup().expect("Failed to set up logger");

    // init db connection
    let pool = db::setup(&config.database_url, is_production)
        .await
        .expect("Failed to set up database");

    // seed the plan catalog on first boot
    catalog::seed_defaults(&pool)
        .await
        .expect("Failed to seed plan catalog");

    // shared rate-limit window store, purged by a background sweep
    let window_store = Arc::new(FixedWindowStore::new());

    spawn_expiry_sweep(pool.clone(), config.expiry_sweep_secs);
    spawn_limiter_sweep(window_store.clone(), config.limiter_sweep_secs);

    HttpServer::new(move || {
        let window_store = window_store.clone();
        App::new()
            .app_data(web::Data::new(pool.clone()))
            .app_data(web::Data::new(config_data.clone()))
            .wrap(limiter::overload_middleware(100)) // max 100 requests per second
            .wrap(logger::middleware()) // 4th
            .wrap(limiter::middleware(window_store)) // 3rd
            .wrap(extractor::middleware()) // 2nd
            .wrap(cors::middleware(&origin)) // 1st
            .service(
                web::scope("/api")
                    .service(api_subs::mount_webhook())
                    .service(
                        web::scope("/dashboard")
                            .wrap(extractor::require_auth())
                            .service(api_subs::mount_subs())
                            .service(entitlement::mount_entitlement()),
                    ),
            )
    })
    .bind((config.server_host.as_str(), config.server_port))?
    .workers(config.num_workers)
    .run()
    .await
}

/// Flips subscriptions whose period has passed to expired. Reads already
/// treat an elapsed period as expired; this sweep makes the stored rows
/// catch up.
fn spawn_expiry_sweep(pool: Arc<sqlx::PgPool>, every_secs: u64) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(every_secs.max(1)));
        ticker.tick().await; // first tick fires immediately, skip it
        loop {
            ticker.tick().await;
            match api_subs::services::sub::expire_due_subscriptions(&pool).await {
                Ok(0) => {}
                Ok(n) => log::info!("Expiry sweep transitioned {} subscriptions", n),
                Err(err) => log::error!("Expiry sweep failed: {}", err),
            }
        }
    });
}

fn spawn_limiter_sweep(store: Arc<FixedWindowStore>, every_secs: u64) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(every_secs.max(1)));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            store.purge_expired(chrono::Utc::now());
        }
    });
}
