use std::{future::Future, pin::Pin, sync::Arc};

use actix_web::{
    Error,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
};
use futures::future::{Ready, ok};

use common::jwt::get_jwt_claims_or_error;

/// Turns away requests that reached an authenticated scope without valid
/// claims. Must sit inside (after) the extraction middleware.
pub struct RequireAuth {}

impl RequireAuth {
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for RequireAuth {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, B> Transform<S, ServiceRequest> for RequireAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: actix_web::body::MessageBody + 'static,
{
    type Response = ServiceResponse<actix_web::body::BoxBody>;
    type Error = Error;
    type Transform = RequireAuthService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(RequireAuthService {
            service: Arc::new(service),
        })
    }
}

pub struct RequireAuthService<S> {
    service: Arc<S>,
}

impl<S, B> Service<ServiceRequest> for RequireAuthService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: actix_web::body::MessageBody + 'static,
{
    type Response = ServiceResponse<actix_web::body::BoxBody>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let srv = Arc::clone(&self.service);

        Box::pin(async move {
            if let Err(response) = get_jwt_claims_or_error(&req) {
                let (http_req, _) = req.into_parts();
                return Ok(ServiceResponse::new(http_req, response));
            }
            srv.call(req).await.map(|res| res.map_into_boxed_body())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{App, HttpResponse, test, web};
    use common::{
        env_config::{Config, JwtConfig},
        jwt::{ClaimsSpec, generate_jwt},
    };
    use uuid::Uuid;

    async fn whoami(claims: web::ReqData<common::jwt::JwtClaims>) -> HttpResponse {
        HttpResponse::Ok().json(serde_json::json!({ "email": claims.email }))
    }

    fn test_config() -> Arc<Config> {
        Arc::new(Config {
            environment: "development".to_string(),
            database_url: String::new(),
            jwt_config: JwtConfig {
                secret: "test-secret".to_string(),
                expiration_hours: 1,
            },
            server_host: "127.0.0.1".to_string(),
            server_port: 8080,
            num_workers: 1,
            cors_allowed_origin: String::new(),
            console_logging_enabled: false,
            stripe_secret_key: String::new(),
            stripe_webhook_secret: String::new(),
            store_timeout_ms: 2000,
            expiry_sweep_secs: 300,
            limiter_sweep_secs: 600,
        })
    }

    #[actix_web::test]
    async fn missing_token_is_rejected_with_401() {
        let config = test_config();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(config))
                .wrap(RequireAuth::new())
                .wrap(crate::middleware::extractor::ExtractionMiddleware::new())
                .route("/whoami", web::get().to(whoami)),
        )
        .await;

        let res =
            test::call_service(&app, test::TestRequest::get().uri("/whoami").to_request()).await;
        assert_eq!(res.status().as_u16(), 401);
    }

    #[actix_web::test]
    async fn valid_token_reaches_the_handler() {
        let config = test_config();
        let token = generate_jwt(
            ClaimsSpec {
                user_id: Uuid::new_v4(),
                email: "writer@example.com".to_string(),
            },
            &config.jwt_config,
        )
        .unwrap();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(config))
                .wrap(RequireAuth::new())
                .wrap(crate::middleware::extractor::ExtractionMiddleware::new())
                .route("/whoami", web::get().to(whoami)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/whoami")
            .insert_header(("Authorization", format!("Bearer {}", token)))
            .to_request();
        let res = test::call_service(&app, req).await;
        assert!(res.status().is_success());
    }
}
