//! Routes for the Product bounded context.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use catalog_product::application::query_handlers::{self, ProductView};
use catalog_product::application::command_handlers;
use catalog_product::domain::commands;

use crate::error::ApiError;
use crate::state::AppState;

/// Request body for POST /api/v1/products.
#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    /// Client-chosen identifier; generated when absent.
    pub product_id: Option<Uuid>,
    /// Stock keeping unit.
    pub sku: String,
    /// Display name.
    pub name: String,
    /// Price in minor currency units.
    pub price_cents: i64,
    /// ISO 4217 currency code.
    pub currency: String,
}

/// Request body for POST /api/v1/products/{id}/price.
#[derive(Debug, Deserialize)]
pub struct ChangePriceRequest {
    /// New price in minor currency units.
    pub price_cents: i64,
}

/// Request body for POST /api/v1/products/{id}/discontinue.
#[derive(Debug, Default, Deserialize)]
pub struct DiscontinueRequest {
    /// Optional free-text reason.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Response body returned after a command is successfully handled.
#[derive(Debug, Serialize)]
pub struct CommandResponse {
    /// The product the command applied to.
    pub product_id: Uuid,
    /// IDs of the domain events produced and persisted.
    pub event_ids: Vec<Uuid>,
}

/// POST /api/v1/products
#[instrument(skip(state, request), fields(sku = %request.sku))]
async fn create_product(
    State(state): State<AppState>,
    Json(request): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<CommandResponse>), ApiError> {
    let command = commands::CreateProduct {
        correlation_id: Uuid::new_v4(),
        product_id: request.product_id.unwrap_or_else(Uuid::now_v7),
        sku: request.sku,
        name: request.name,
        price_cents: request.price_cents,
        currency: request.currency,
    };

    info!(correlation_id = %command.correlation_id, product_id = %command.product_id, "handling create_product command");

    let stored_events = command_handlers::handle_create_product(
        &command,
        state.clock.as_ref(),
        &*state.event_repository,
        &state.unit_of_work,
    )
    .await?;

    let event_ids = stored_events.iter().map(|e| e.event_id).collect();

    Ok((
        StatusCode::CREATED,
        Json(CommandResponse {
            product_id: command.product_id,
            event_ids,
        }),
    ))
}

/// POST /api/v1/products/{id}/price
#[instrument(skip(state, request))]
async fn change_price(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
    Json(request): Json<ChangePriceRequest>,
) -> Result<Json<CommandResponse>, ApiError> {
    let command = commands::ChangePrice {
        correlation_id: Uuid::new_v4(),
        product_id,
        new_price_cents: request.price_cents,
    };

    info!(correlation_id = %command.correlation_id, "handling change_price command");

    let stored_events = command_handlers::handle_change_price(
        &command,
        state.clock.as_ref(),
        &*state.event_repository,
        &state.unit_of_work,
    )
    .await?;

    let event_ids = stored_events.iter().map(|e| e.event_id).collect();

    Ok(Json(CommandResponse {
        product_id,
        event_ids,
    }))
}

/// POST /api/v1/products/{id}/discontinue
#[instrument(skip(state, request))]
async fn discontinue_product(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
    Json(request): Json<DiscontinueRequest>,
) -> Result<Json<CommandResponse>, ApiError> {
    let command = commands::DiscontinueProduct {
        correlation_id: Uuid::new_v4(),
        product_id,
        reason: request.reason,
    };

    info!(correlation_id = %command.correlation_id, "handling discontinue_product command");

    let stored_events = command_handlers::handle_discontinue_product(
        &command,
        state.clock.as_ref(),
        &*state.event_repository,
        &state.unit_of_work,
    )
    .await?;

    let event_ids = stored_events.iter().map(|e| e.event_id).collect();

    Ok(Json(CommandResponse {
        product_id,
        event_ids,
    }))
}

/// GET /api/v1/products/{id}
#[instrument(skip(state))]
async fn get_product(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> Result<Json<ProductView>, ApiError> {
    let view = query_handlers::get_product_by_id(product_id, &*state.event_repository).await?;
    Ok(Json(view))
}

/// Returns the router for the product context.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_product))
        .route("/{id}", get(get_product))
        .route("/{id}/price", post(change_price))
        .route("/{id}/discontinue", post(discontinue_product))
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::testing::{TestHarness, failing_harness};

    async fn send(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&body_bytes).unwrap_or(Value::Null);
        (status, json)
    }

    fn create_body(product_id: Uuid) -> Value {
        serde_json::json!({
            "product_id": product_id,
            "sku": "SKU-100",
            "name": "Trail Shoe",
            "price_cents": 12_999,
            "currency": "USD",
        })
    }

    #[tokio::test]
    async fn test_create_product_returns_201_with_event_ids() {
        // Arrange
        let harness = TestHarness::new();
        let app = router().with_state(harness.state.clone());
        let product_id = Uuid::new_v4();

        // Act
        let (status, json) = send(app, "POST", "/", Some(create_body(product_id))).await;

        // Assert
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["product_id"], product_id.to_string());
        let event_ids = json["event_ids"].as_array().unwrap();
        assert_eq!(event_ids.len(), 1);
        for id in event_ids {
            Uuid::parse_str(id.as_str().unwrap()).unwrap();
        }
        assert_eq!(harness.store.events(product_id).len(), 1);
        assert_eq!(harness.log.topic_messages("catalog.products").len(), 1);
    }

    #[tokio::test]
    async fn test_create_product_returns_400_for_invalid_price() {
        let harness = TestHarness::new();
        let app = router().with_state(harness.state.clone());
        let mut body = create_body(Uuid::new_v4());
        body["price_cents"] = serde_json::json!(0);

        let (status, json) = send(app, "POST", "/", Some(body)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "validation_error");
        assert!(harness.log.topic_messages("catalog.products").is_empty());
    }

    #[tokio::test]
    async fn test_create_product_returns_422_for_missing_fields() {
        let harness = TestHarness::new();
        let app = router().with_state(harness.state.clone());

        let (status, _) = send(app, "POST", "/", Some(serde_json::json!({}))).await;

        // Axum returns 422 for deserialization failures.
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_change_price_then_get_returns_updated_view() {
        // Arrange
        let harness = TestHarness::new();
        let product_id = Uuid::new_v4();
        send(
            router().with_state(harness.state.clone()),
            "POST",
            "/",
            Some(create_body(product_id)),
        )
        .await;

        // Act
        let (status, _) = send(
            router().with_state(harness.state.clone()),
            "POST",
            &format!("/{product_id}/price"),
            Some(serde_json::json!({ "price_cents": 9_999 })),
        )
        .await;
        let (view_status, view) = send(
            router().with_state(harness.state.clone()),
            "GET",
            &format!("/{product_id}"),
            None,
        )
        .await;

        // Assert
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view_status, StatusCode::OK);
        assert_eq!(view["price_cents"], 9_999);
        assert_eq!(view["version"], 2);
        assert_eq!(view["discontinued"], false);
    }

    #[tokio::test]
    async fn test_discontinue_twice_returns_409() {
        let harness = TestHarness::new();
        let product_id = Uuid::new_v4();
        send(
            router().with_state(harness.state.clone()),
            "POST",
            "/",
            Some(create_body(product_id)),
        )
        .await;
        let uri = format!("/{product_id}/discontinue");
        send(
            router().with_state(harness.state.clone()),
            "POST",
            &uri,
            Some(serde_json::json!({ "reason": "recall" })),
        )
        .await;

        let (status, json) = send(
            router().with_state(harness.state.clone()),
            "POST",
            &uri,
            Some(serde_json::json!({})),
        )
        .await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["error"], "invalid_state");
    }

    #[tokio::test]
    async fn test_get_unknown_product_returns_404() {
        let harness = TestHarness::new();
        let app = router().with_state(harness.state.clone());

        let (status, json) = send(app, "GET", &format!("/{}", Uuid::new_v4()), None).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "aggregate_not_found");
    }

    #[tokio::test]
    async fn test_create_product_returns_500_when_transaction_cannot_start() {
        let app = router().with_state(failing_harness());

        let (status, json) = send(app, "POST", "/", Some(create_body(Uuid::new_v4()))).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["error"], "infrastructure_error");
    }
}
