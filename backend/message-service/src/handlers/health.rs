use actix_web::HttpResponse;
use chrono::Utc;
use serde_json::json;

/// GET /health
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "UP",
        "service": "message-service",
        "timestamp": Utc::now(),
    }))
}
