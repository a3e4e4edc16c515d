use std::{future::Future, pin::Pin, rc::Rc, sync::Arc};

use actix_web::{
    Error, HttpMessage,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
    http::header::{HeaderName, HeaderValue},
};
use chrono::Utc;
use common::{error::AppError, jwt::JwtClaims};

use crate::window::{Decision, FixedWindowStore, classify};

/// Per-identity fixed-window throttle. Authenticated requests are keyed by
/// user id, anonymous ones by network address. Successful responses still
/// carry the informational x-ratelimit-* headers so clients can self-throttle.
pub struct FixedWindowLimiter {
    store: Arc<FixedWindowStore>,
}

impl FixedWindowLimiter {
    pub fn new(store: Arc<FixedWindowStore>) -> Self {
        Self { store }
    }
}

impl<S, B> Transform<S, ServiceRequest> for FixedWindowLimiter
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: actix_web::body::MessageBody + 'static,
{
    type Response = ServiceResponse<actix_web::body::BoxBody>;
    type Error = Error;
    type Transform = FixedWindowLimiterService<S>;
    type InitError = ();
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(FixedWindowLimiterService {
            service: Rc::new(service),
            store: self.store.clone(),
        }))
    }
}

pub struct FixedWindowLimiterService<S> {
    service: Rc<S>,
    store: Arc<FixedWindowStore>,
}

fn apply_headers<B>(res: &mut ServiceResponse<B>, decision: &Decision) {
    let headers = res.headers_mut();
    headers.insert(
        HeaderName::from_static("x-ratelimit-limit"),
        HeaderValue::from(decision.limit),
    );
    headers.insert(
        HeaderName::from_static("x-ratelimit-remaining"),
        HeaderValue::from(decision.remaining),
    );
    headers.insert(
        HeaderName::from_static("x-ratelimit-reset"),
        HeaderValue::from(decision.reset_epoch),
    );
}

impl<S, B> Service<ServiceRequest> for FixedWindowLimiterService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: actix_web::body::MessageBody + 'static,
{
    type Response = ServiceResponse<actix_web::body::BoxBody>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let srv = Rc::clone(&self.service);
        let store = self.store.clone();

        // Identity: user id when the extractor decoded a token, else peer IP.
        // The extensions borrow must end before connection_info() re-borrows
        // the same cell mutably.
        let claims_identity = req
            .extensions()
            .get::<JwtClaims>()
            .map(|claims| claims.user_id.to_string());
        let identity = claims_identity
            .or_else(|| {
                req.connection_info()
                    .realip_remote_addr()
                    .map(|addr| addr.to_string())
            })
            .unwrap_or_else(|| "unknown".to_string());

        let class = classify(req.path());
        let decision = store.check(&identity, class, Utc::now());

        Box::pin(async move {
            if !decision.allowed {
                log::debug!(
                    "Rate limited identity {} on class {} ({}/{})",
                    identity,
                    class.name,
                    decision.limit,
                    decision.limit
                );
                let mut res = req.error_response(AppError::RateLimited {
                    retry_after_secs: decision.retry_after_secs,
                });
                apply_headers(&mut res, &decision);
                return Ok(res);
            }

            let mut res = srv.call(req).await.map(|res| res.map_into_boxed_body())?;
            apply_headers(&mut res, &decision);
            Ok(res)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{App, HttpResponse, test, web};
    use std::sync::Arc;

    async fn ping() -> HttpResponse {
        HttpResponse::Ok().json(serde_json::json!({ "ok": true }))
    }

    #[actix_web::test]
    async fn responses_carry_rate_limit_headers() {
        let store = Arc::new(FixedWindowStore::new());
        let app = test::init_service(
            App::new()
                .wrap(FixedWindowLimiter::new(store))
                .route("/ping", web::get().to(ping)),
        )
        .await;

        let res = test::call_service(&app, test::TestRequest::get().uri("/ping").to_request()).await;
        assert!(res.status().is_success());
        assert!(res.headers().contains_key("x-ratelimit-limit"));
        assert!(res.headers().contains_key("x-ratelimit-remaining"));
        assert!(res.headers().contains_key("x-ratelimit-reset"));
    }

    #[actix_web::test]
    async fn over_limit_requests_get_429_with_retry_after() {
        let store = Arc::new(FixedWindowStore::new());
        let class = classify("/api/auth/login");
        let app = test::init_service(
            App::new()
                .wrap(FixedWindowLimiter::new(store))
                .route("/api/auth/login", web::get().to(ping)),
        )
        .await;

        let mut last_status = None;
        for _ in 0..=class.max_requests {
            let res = test::call_service(
                &app,
                test::TestRequest::get().uri("/api/auth/login").to_request(),
            )
            .await;
            last_status = Some(res.status());
        }

        assert_eq!(last_status.unwrap().as_u16(), 429);
    }
}
