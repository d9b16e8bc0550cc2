// apps/billing/src/health.rs

//! `GET /health` for the consumer: the current `HealthSnapshot` as JSON,
//! 200 while the consumer can take messages and 503 otherwise.

use actix_web::dev::Server;
use actix_web::{web, App, HttpResponse, HttpServer};
use ingest::consumer::health::ConsumerHealth;

async fn health_handler(health: web::Data<ConsumerHealth>) -> HttpResponse {
  let snapshot = health.snapshot();
  if snapshot.is_ready() {
    HttpResponse::Ok().json(snapshot)
  } else {
    HttpResponse::ServiceUnavailable().json(snapshot)
  }
}

pub fn configure_health_routes(cfg: &mut web::ServiceConfig) {
  cfg.route("/health", web::get().to(health_handler));
}

/// Binds the health server; signals are left to the caller.
pub fn health_server(health: ConsumerHealth, address: &str) -> std::io::Result<Server> {
  let server = HttpServer::new(move || {
    App::new()
      .app_data(web::Data::new(health.clone()))
      .wrap(tracing_actix_web::TracingLogger::default())
      .configure(configure_health_routes)
  })
  .workers(1)
  .disable_signals()
  .bind(address)?
  .run();
  Ok(server)
}
