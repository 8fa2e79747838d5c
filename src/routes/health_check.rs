use actix_web::HttpResponse;

/// Liveness probe; no auth, no body.
pub async fn health_check() -> HttpResponse {
    tracing::debug!("Health check requested");
    HttpResponse::Ok().finish()
}
