// apps/gateway/src/web/handlers/inventory_handlers.rs

use crate::errors::AppError;
use crate::state::AppState;
use actix_web::{web, HttpRequest, HttpResponse};
use tracing::instrument;

#[instrument(name = "handler::proxy_collection", skip_all)]
pub async fn proxy_collection_handler(
  app_state: web::Data<AppState>,
  req: HttpRequest,
  body: web::Bytes,
) -> Result<HttpResponse, AppError> {
  app_state.inventory.forward(&req, "", body.to_vec()).await
}

#[instrument(name = "handler::proxy_item", skip(app_state, req, body), fields(tail = %tail))]
pub async fn proxy_item_handler(
  app_state: web::Data<AppState>,
  req: HttpRequest,
  tail: web::Path<String>,
  body: web::Bytes,
) -> Result<HttpResponse, AppError> {
  app_state.inventory.forward(&req, &tail, body.to_vec()).await
}

#[cfg(test)]
mod tests {
  use crate::state::test_support::memory_state_with;
  use crate::web::configure_app_routes;
  use actix_web::{http::StatusCode, test, web, App, HttpRequest, HttpResponse, HttpServer};
  use ingest::broker::MemoryBroker;
  use serde_json::{json, Value};

  async fn echo(req: HttpRequest, body: web::Bytes) -> HttpResponse {
    let header = |name: &str| req.headers().get(name).and_then(|v| v.to_str().ok()).map(str::to_string);
    HttpResponse::Created().insert_header(("x-upstream", "inventory")).json(json!({
      "method": req.method().as_str(),
      "path": req.path(),
      "query": req.query_string(),
      "custom": header("x-custom"),
      "proxy_authorization": header("proxy-authorization"),
      "body": String::from_utf8_lossy(&body),
    }))
  }

  /// Starts an echo upstream on an ephemeral port and returns its movies URL.
  fn spawn_upstream() -> String {
    let server = HttpServer::new(|| App::new().default_service(web::to(echo)))
      .workers(1)
      .bind(("127.0.0.1", 0))
      .unwrap();
    let addr = server.addrs()[0];
    actix_web::rt::spawn(server.run());
    format!("http://{}/api/movies", addr)
  }

  #[actix_web::test]
  async fn forwards_method_path_query_headers_and_body() {
    let inventory_url = spawn_upstream();
    let state = memory_state_with(&MemoryBroker::new(), &[("INVENTORY_URL", inventory_url.as_str())]);
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(configure_app_routes)).await;

    let req = test::TestRequest::put()
      .uri("/api/movies/42/cast?lang=en")
      .insert_header(("x-custom", "kept"))
      .insert_header(("proxy-authorization", "Basic dropped"))
      .set_payload(r#"{"title":"Heat"}"#)
      .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::CREATED);
    assert_eq!(resp.headers().get("x-upstream").unwrap(), "inventory");
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["method"], "PUT");
    assert_eq!(body["path"], "/api/movies/42/cast");
    assert_eq!(body["query"], "lang=en");
    assert_eq!(body["custom"], "kept");
    assert_eq!(body["proxy_authorization"], Value::Null);
    assert_eq!(body["body"], r#"{"title":"Heat"}"#);
  }

  #[actix_web::test]
  async fn collection_root_is_forwarded_without_a_trailing_slash() {
    let inventory_url = spawn_upstream();
    let state = memory_state_with(&MemoryBroker::new(), &[("INVENTORY_URL", inventory_url.as_str())]);
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(configure_app_routes)).await;

    let resp = test::call_service(&app, test::TestRequest::get().uri("/api/movies").to_request()).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["method"], "GET");
    assert_eq!(body["path"], "/api/movies");
  }

  #[actix_web::test]
  async fn unreachable_upstream_is_a_bad_gateway() {
    let state = memory_state_with(
      &MemoryBroker::new(),
      &[("INVENTORY_URL", "http://127.0.0.1:1/api/movies"), ("PROXY_TIMEOUT_MS", "2000")],
    );
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(configure_app_routes)).await;

    let resp = test::call_service(&app, test::TestRequest::delete().uri("/api/movies/7").to_request()).await;
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body, json!({"error": "Inventory service unavailable"}));
  }

  #[actix_web::test]
  async fn unlisted_methods_are_not_forwarded() {
    let state = memory_state_with(&MemoryBroker::new(), &[("INVENTORY_URL", "http://127.0.0.1:1/api/movies")]);
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(configure_app_routes)).await;

    let resp = test::call_service(&app, test::TestRequest::put().uri("/api/movies").to_request()).await;
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
  }
}
