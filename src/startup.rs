use crate::configuration::Settings;
use crate::routes;
use crate::services::worker::spawn_workers;
use crate::services::{AppContext, Ingress, RedisDeliveryStore};
use actix_web::{dev::Server, web, App, HttpServer};
use sqlx::{Pool, Postgres};
use std::net::TcpListener;
use std::sync::Arc;
use tracing_actix_web::TracingLogger;

fn io_error<E: std::fmt::Display>(err: E) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, err.to_string())
}

pub async fn run(
    listener: TcpListener,
    pg_pool: Pool<Postgres>,
    settings: Settings,
) -> Result<Server, std::io::Error> {
    let ctx = AppContext::connect(&settings, pg_pool).map_err(io_error)?;

    let deliveries = RedisDeliveryStore::new(&settings.redis.url)
        .await
        .map_err(io_error)?;
    let ingress = web::Data::new(Ingress::new(settings.webhook.clone(), Arc::new(deliveries)));

    let (queue, workers) = spawn_workers(ctx);
    tracing::info!(workers = workers.len(), "Job workers running");
    let queue = web::Data::new(queue);

    // ingress answers 400 for oversized bodies; this only bounds buffering
    let payload_config = web::PayloadConfig::new(settings.webhook.max_payload_bytes.saturating_mul(2));

    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .app_data(payload_config.clone())
            .service(web::scope("/health_check").service(routes::health_check))
            .service(
                web::scope("/webhooks/github")
                    .service(routes::webhook::receive_handler)
                    .service(routes::webhook::status_handler),
            )
            .app_data(ingress.clone())
            .app_data(queue.clone())
    })
    .listen(listener)?
    .run();

    Ok(server)
}
