//! Shared test helpers for API integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use catalog_messaging::memory::InMemoryLog;
use catalog_product::application::search_projection::InMemoryProductSearchIndex;
use catalog_test_support::{FixedClock, InMemoryEventStore};
use catalog_unit_of_work::event_bus::DomainEventBus;
use catalog_unit_of_work::publisher::TransportIntegrationPublisher;
use catalog_unit_of_work::unit_of_work::UnitOfWork;
use http_body_util::BodyExt;
use tower::ServiceExt;

use catalog_service::app;
use catalog_service::config::DEFAULT_PRODUCT_TOPIC;
use catalog_service::state::AppState;

/// Everything a test needs to drive the API and inspect its side effects.
pub struct TestApp {
    pub router: Router,
    pub store: InMemoryEventStore,
    pub log: InMemoryLog,
    pub index: InMemoryProductSearchIndex,
}

/// Build the full app router over in-memory stores and a fixed clock. Uses
/// the same route structure as `main.rs`.
pub fn build_test_app() -> TestApp {
    let store = InMemoryEventStore::new();
    let log = InMemoryLog::new();
    let index = InMemoryProductSearchIndex::new();
    let unit_of_work = UnitOfWork::new(
        Arc::new(store.clone()),
        Arc::new(DomainEventBus::empty()),
        Arc::new(TransportIntegrationPublisher::new(
            Arc::new(log.clone()),
            DEFAULT_PRODUCT_TOPIC,
        )),
    );
    let app_state = AppState::new(
        Arc::new(FixedClock::standard()),
        Arc::new(store.clone()),
        unit_of_work,
        Arc::new(index.clone()),
    );

    TestApp {
        router: app::router(app_state),
        store,
        log,
        index,
    }
}

/// Send a POST request with a JSON body and return the response.
pub async fn post_json(
    app: Router,
    uri: &str,
    body: &serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap();

    send(app, request).await
}

/// Send a GET request and return the response.
pub async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    send(app, request).await
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&body_bytes).unwrap_or(serde_json::Value::Null);

    (status, json)
}
