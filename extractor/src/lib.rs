use middleware::{extractor::ExtractionMiddleware, guard::RequireAuth};

pub mod middleware {
    pub mod extractor;
    pub mod guard;
}

/// Decodes the bearer token (when present) and stashes the claims on the
/// request. Does not reject anything on its own.
pub fn middleware() -> ExtractionMiddleware {
    ExtractionMiddleware::new()
}

/// Rejects requests whose claims were not extracted. Wrap scopes that must
/// only serve authenticated users.
pub fn require_auth() -> RequireAuth {
    RequireAuth::new()
}
