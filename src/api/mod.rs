pub mod health;
pub mod job;
pub mod validation;

use actix_web::middleware::DefaultHeaders;

/// Permissive CORS headers attached to every response
pub fn cors_headers() -> DefaultHeaders {
    DefaultHeaders::new()
        .add(("Access-Control-Allow-Origin", "*"))
        .add(("Access-Control-Allow-Methods", "GET,POST,OPTIONS"))
        .add(("Access-Control-Allow-Headers", "Content-Type,Authorization"))
}
