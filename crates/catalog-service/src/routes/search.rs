//! Product search over the projection's read model.

use axum::extract::{Query, State};
use axum::{Json, Router, routing::get};
use catalog_core::error::DomainError;
use catalog_product::application::search_projection::ProductDocument;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::ApiError;
use crate::state::AppState;

/// Query string for GET /api/v1/search.
#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    /// Case-insensitive fragment of a product name or SKU.
    #[serde(default)]
    pub q: String,
}

/// Search results.
#[derive(Debug, Serialize)]
pub struct SearchResponse {
    /// The query as received.
    pub query: String,
    /// Matching active products ordered by name.
    pub results: Vec<ProductDocument>,
}

/// GET /api/v1/search?q=
#[instrument(skip(state))]
async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, ApiError> {
    let results = state
        .search_index
        .search(&params.q)
        .await
        .map_err(|e| DomainError::Infrastructure(e.to_string()))?;
    Ok(Json(SearchResponse {
        query: params.q,
        results,
    }))
}

/// Returns the router for product search.
pub fn router() -> Router<AppState> {
    Router::new().route("/", get(search))
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use catalog_product::application::search_projection::ProductSearchIndex;
    use serde_json::Value;
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::testing::TestHarness;

    fn document(name: &str, sku: &str) -> ProductDocument {
        ProductDocument {
            product_id: Uuid::new_v4(),
            sku: sku.into(),
            name: name.into(),
            price_cents: 4_500,
            currency: "EUR".into(),
            discontinued: false,
        }
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body_bytes).unwrap())
    }

    #[tokio::test]
    async fn test_search_returns_matching_documents() {
        // Arrange
        let harness = TestHarness::new();
        harness.index.upsert(document("Headlamp", "LAMP-1")).await.unwrap();
        harness.index.upsert(document("Camp Stove", "STOVE-1")).await.unwrap();
        let app = router().with_state(harness.state.clone());

        // Act
        let (status, json) = get(app, "/?q=lamp").await;

        // Assert
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["query"], "lamp");
        let results = json["results"].as_array().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["sku"], "LAMP-1");
    }

    #[tokio::test]
    async fn test_search_without_query_lists_everything() {
        let harness = TestHarness::new();
        harness.index.upsert(document("Headlamp", "LAMP-1")).await.unwrap();
        harness.index.upsert(document("Camp Stove", "STOVE-1")).await.unwrap();
        let app = router().with_state(harness.state.clone());

        let (status, json) = get(app, "/").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["results"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_search_returns_500_when_index_is_down() {
        let harness = TestHarness::new();
        harness.index.set_unavailable(true);
        let app = router().with_state(harness.state.clone());

        let (status, json) = get(app, "/?q=lamp").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["error"], "infrastructure_error");
    }
}
