use actix_web::HttpResponse;
use thiserror::Error;

pub type Res<T> = std::result::Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    // === CONVERSION ERRORS ===
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JWT error: {0}")]
    JWT(#[from] jsonwebtoken::errors::Error),

    #[error("Stripe error: {0}")]
    Stripe(#[from] stripe::StripeError),

    // === APPLICATION ERRORS ===
    #[error("Authorization error: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Resource conflict: {0}")]
    Conflict(String),

    #[error("Quota exceeded for {dimension}: {current}/{limit}")]
    QuotaExceeded {
        dimension: String,
        limit: i64,
        current: i64,
    },

    #[error("Too Many Requests: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn to_http_response(&self) -> HttpResponse {
        let is_dev = cfg!(debug_assertions);

        let to_internal_json = |err_msg: &str| {
            if is_dev {
                serde_json::json!({ "error": err_msg })
            } else {
                serde_json::json!({ "error": "Internal server error" })
            }
        };

        match self {
            // === CONVERSION ERRORS ===
            AppError::Database(error) => {
                log::error!("Database error: {}", error);
                HttpResponse::InternalServerError().json(to_internal_json(&error.to_string()))
            }
            AppError::JWT(error) => {
                log::error!("JWT error: {}", error);
                HttpResponse::InternalServerError().json(to_internal_json(&error.to_string()))
            }
            AppError::Stripe(error) => {
                log::error!("Stripe error: {}", error);
                HttpResponse::InternalServerError().json(to_internal_json(&error.to_string()))
            }

            // === APPLICATION ERRORS ===
            AppError::Unauthorized(_) => {
                HttpResponse::Unauthorized().json(serde_json::json!({ "error": self.to_string() }))
            }
            AppError::Forbidden(_) => {
                HttpResponse::Forbidden().json(serde_json::json!({ "error": self.to_string() }))
            }
            AppError::NotFound(_) => {
                HttpResponse::NotFound().json(serde_json::json!({ "error": self.to_string() }))
            }
            AppError::BadRequest(_) => {
                HttpResponse::BadRequest().json(serde_json::json!({ "error": self.to_string() }))
            }
            AppError::Conflict(_) => {
                HttpResponse::Conflict().json(serde_json::json!({ "error": self.to_string() }))
            }

            // Expected denial, not an error-level event. The body carries the
            // quota metadata so clients can render remaining/limit/reset.
            AppError::QuotaExceeded {
                dimension,
                limit,
                current,
            } => {
                log::debug!(
                    "Quota exceeded for dimension {}: {}/{}",
                    dimension,
                    current,
                    limit
                );
                HttpResponse::Forbidden().json(serde_json::json!({
                    "error": self.to_string(),
                    "dimension": dimension,
                    "limit": limit,
                    "current": current,
                }))
            }

            AppError::RateLimited { retry_after_secs } => HttpResponse::TooManyRequests()
                .insert_header(("Retry-After", retry_after_secs.to_string()))
                .json(serde_json::json!({
                    "error": self.to_string(),
                    "retry_after_seconds": retry_after_secs,
                })),

            AppError::Unavailable(error) => {
                log::error!("Service unavailable: {}", error);
                HttpResponse::ServiceUnavailable()
                    .json(serde_json::json!({ "error": "Service temporarily unavailable" }))
            }

            AppError::Internal(error) => {
                log::error!("Internal error: {}", error);
                HttpResponse::InternalServerError().json(to_internal_json(&error.to_string()))
            }
        }
    }
}

impl actix_web::ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        self.to_http_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;

    #[test]
    fn quota_exceeded_maps_to_forbidden_with_metadata() {
        let err = AppError::QuotaExceeded {
            dimension: "letter_creation".to_string(),
            limit: 5,
            current: 5,
        };
        let resp = err.to_http_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn rate_limited_sets_retry_after() {
        let err = AppError::RateLimited {
            retry_after_secs: 42,
        };
        let resp = err.to_http_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry = resp
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        assert_eq!(retry, "42");
    }

    #[test]
    fn conflict_maps_to_409() {
        let err = AppError::Conflict("subscription is already cancelled".to_string());
        assert_eq!(err.to_http_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn unavailable_maps_to_503() {
        let err = AppError::Unavailable("store timed out".to_string());
        assert_eq!(
            err.to_http_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
