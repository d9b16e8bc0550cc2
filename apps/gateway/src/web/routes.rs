// apps/gateway/src/web/routes.rs

use crate::web::handlers::{billing_handlers, inventory_handlers};
use actix_web::{web, HttpResponse};

async fn health_check_handler() -> HttpResponse {
  HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

/// Routes of the gateway. Methods not listed on a resource get a 405.
pub fn configure_app_routes(cfg: &mut web::ServiceConfig) {
  cfg
    .route("/health", web::get().to(health_check_handler))
    .service(
      web::scope("/api")
        .route("/billing", web::post().to(billing_handlers::submit_billing_handler))
        .service(
          web::resource("/movies")
            .route(web::get().to(inventory_handlers::proxy_collection_handler))
            .route(web::post().to(inventory_handlers::proxy_collection_handler))
            .route(web::delete().to(inventory_handlers::proxy_collection_handler)),
        )
        .service(
          web::resource("/movies/{tail:.*}")
            .route(web::get().to(inventory_handlers::proxy_item_handler))
            .route(web::put().to(inventory_handlers::proxy_item_handler))
            .route(web::delete().to(inventory_handlers::proxy_item_handler)),
        ),
    );
}
