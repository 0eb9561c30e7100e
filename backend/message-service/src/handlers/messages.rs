//! Ingress and query handlers for the message API.
//!
//! The ingress response only acknowledges hand-off to the broker;
//! downstream processing outcomes are observed through the query
//! endpoints.

use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::db::ProcessedMessageRepository;
use crate::error::AppError;
use crate::models::{MessageEvent, ProcessingStatus};
use crate::services::MessageProducer;

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/messages")
            .route("", web::post().to(publish_message))
            .route("", web::get().to(list_messages))
            .route("/batch", web::post().to(publish_batch))
            .route("/status/{status}", web::get().to(messages_by_status))
            .route("/sender/{sender}", web::get().to(messages_by_sender)),
    );
}

/// POST /messages
///
/// 202 once the message is enqueued; the broker confirmation is logged
/// asynchronously and never blocks this response.
pub async fn publish_message(
    producer: web::Data<Arc<MessageProducer>>,
    payload: web::Json<MessageEvent>,
) -> Result<HttpResponse, AppError> {
    let event = payload.into_inner();
    event.validate()?;

    info!(sender = %event.sender, "received publish request");

    match producer.publish(event) {
        Ok(published) => Ok(HttpResponse::Accepted().json(json!({
            "status": "SUCCESS",
            "message": "Message accepted for delivery",
            "messageId": published.id,
            "timestamp": published.created_at,
        }))),
        Err(err) => Ok(HttpResponse::InternalServerError().json(json!({
            "status": "ERROR",
            "message": "Failed to hand off message to the broker",
            "error": err.to_string(),
            "timestamp": Utc::now(),
        }))),
    }
}

#[derive(Debug, Deserialize)]
pub struct BatchParams {
    #[serde(default = "default_batch_count")]
    pub count: u32,
}

fn default_batch_count() -> u32 {
    5
}

/// POST /messages/batch?count=K
///
/// Publishes K generated test messages.
pub async fn publish_batch(
    producer: web::Data<Arc<MessageProducer>>,
    params: web::Query<BatchParams>,
) -> Result<HttpResponse, AppError> {
    let count = params.count;
    info!(count, "received batch publish request");

    for i in 0..count {
        let event = MessageEvent {
            id: Some(Uuid::new_v4().to_string()),
            content: format!("Test message {}", i + 1),
            sender: "BatchProducer".to_string(),
            metadata: Some("batch-test".to_string()),
            created_at: None,
        };

        if let Err(err) = producer.publish(event) {
            return Ok(HttpResponse::InternalServerError().json(json!({
                "status": "ERROR",
                "message": "Failed to send batch messages",
                "error": err.to_string(),
                "timestamp": Utc::now(),
            })));
        }
    }

    Ok(HttpResponse::Accepted().json(json!({
        "status": "SUCCESS",
        "message": format!("{} messages sent to the broker", count),
        "timestamp": Utc::now(),
    })))
}

/// GET /messages
pub async fn list_messages(
    repository: web::Data<ProcessedMessageRepository>,
) -> Result<HttpResponse, AppError> {
    let messages = repository.find_all().await?;

    Ok(HttpResponse::Ok().json(json!({
        "total": messages.len(),
        "messages": messages,
        "timestamp": Utc::now(),
    })))
}

/// GET /messages/status/{status}
pub async fn messages_by_status(
    repository: web::Data<ProcessedMessageRepository>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let status: ProcessingStatus = path.into_inner().parse().map_err(AppError::BadRequest)?;
    let messages = repository.find_by_status(status).await?;

    Ok(HttpResponse::Ok().json(json!({
        "status": status,
        "total": messages.len(),
        "messages": messages,
        "timestamp": Utc::now(),
    })))
}

/// GET /messages/sender/{sender}
pub async fn messages_by_sender(
    repository: web::Data<ProcessedMessageRepository>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let sender = path.into_inner();
    let messages = repository.find_by_sender(&sender).await?;

    Ok(HttpResponse::Ok().json(json!({
        "sender": sender,
        "total": messages.len(),
        "messages": messages,
        "timestamp": Utc::now(),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};

    fn test_producer() -> web::Data<Arc<MessageProducer>> {
        // The rdkafka client connects lazily, so a producer pointed at
        // an unreachable broker still enqueues locally.
        let producer =
            MessageProducer::new("localhost:9092", "message-events".to_string()).unwrap();
        web::Data::new(Arc::new(producer))
    }

    #[actix_web::test]
    async fn publish_rejects_blank_content() {
        let app = test::init_service(
            App::new()
                .app_data(test_producer())
                .route("/messages", web::post().to(publish_message)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/messages")
            .set_json(json!({"content": "   ", "sender": "alice"}))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), 400);
    }

    #[actix_web::test]
    async fn publish_rejects_blank_sender() {
        let app = test::init_service(
            App::new()
                .app_data(test_producer())
                .route("/messages", web::post().to(publish_message)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/messages")
            .set_json(json!({"content": "hi", "sender": ""}))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), 400);
    }

    #[actix_web::test]
    async fn publish_assigns_id_and_timestamp() {
        let app = test::init_service(
            App::new()
                .app_data(test_producer())
                .route("/messages", web::post().to(publish_message)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/messages")
            .set_json(json!({"content": "hi", "sender": "alice"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 202);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "SUCCESS");

        let message_id = body["messageId"].as_str().unwrap();
        assert!(Uuid::parse_str(message_id).is_ok());

        let timestamp: chrono::DateTime<Utc> =
            body["timestamp"].as_str().unwrap().parse().unwrap();
        assert!(timestamp <= Utc::now());
    }

    #[actix_web::test]
    async fn publish_keeps_explicit_id() {
        let app = test::init_service(
            App::new()
                .app_data(test_producer())
                .route("/messages", web::post().to(publish_message)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/messages")
            .set_json(json!({"messageId": "m1", "content": "hi", "sender": "alice"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 202);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["messageId"], "m1");
    }

    #[actix_web::test]
    async fn batch_publish_accepts_count() {
        let app = test::init_service(
            App::new()
                .app_data(test_producer())
                .route("/messages/batch", web::post().to(publish_batch)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/messages/batch?count=3")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 202);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["message"], "3 messages sent to the broker");
    }
}
