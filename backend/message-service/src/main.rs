use actix_web::{middleware, web, App, HttpServer};
use message_service::db::{self, ProcessedMessageRepository};
use message_service::handlers::{health, messages};
use message_service::services::{admin, MessageConsumer, MessageProcessor, MessageProducer};
use message_service::{metrics, Config};
use std::io;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting message service");

    let config = Config::from_env()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;

    let pool = db::create_pool(&config.database).await.map_err(|e| {
        tracing::error!(error = %e, "failed to connect to database");
        io::Error::new(io::ErrorKind::Other, e)
    })?;
    db::run_migrations(&pool)
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

    // The broker may still be starting; provisioning failure is not fatal.
    if let Err(e) = admin::ensure_topics(&config.kafka).await {
        tracing::warn!(error = %e, "topic provisioning failed, continuing");
    }

    let repository = ProcessedMessageRepository::new(pool.clone());
    let producer = Arc::new(
        MessageProducer::new(&config.kafka.brokers, config.kafka.topic.clone())
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?,
    );

    let processor = MessageProcessor::new(repository.clone());
    let consumer = Arc::new(
        MessageConsumer::new(&config.kafka, processor)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?,
    );
    tokio::spawn(consumer.start());

    let addr = format!("{}:{}", config.app.host, config.app.port);
    tracing::info!(%addr, "starting HTTP server");

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(producer.clone()))
            .app_data(web::Data::new(repository.clone()))
            .wrap(middleware::Logger::default())
            .route("/health", web::get().to(health::health))
            .route("/metrics", web::get().to(metrics::serve_metrics))
            .configure(messages::register_routes)
    })
    .bind(&addr)?
    .run()
    .await
}
