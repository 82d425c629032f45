//! HTTP surface of the gateway.

use crate::gateway::Gateway;
use crate::health::{health_handler, readiness_handler, HealthState};
use async_graphql_axum::{GraphQLRequest, GraphQLResponse};
use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// ServeMux - main gateway handler
///
/// Routes `POST /graphql` to the gateway, serves the Playground on
/// `GET /graphql` and exposes `/health` and `/ready`.
#[derive(Clone)]
pub struct ServeMux {
    gateway: Arc<Gateway>,
}

impl ServeMux {
    pub fn new(gateway: Gateway) -> Self {
        Self {
            gateway: Arc::new(gateway),
        }
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// Execute a request while it is tracked for graceful shutdown.
    ///
    /// Requests rejected before execution (parse or validation failures)
    /// answer 400; everything else answers 200 with field errors inline.
    pub async fn handle_http(&self, request: GraphQLRequest) -> Response {
        let _guard = self.gateway.shutdown_coordinator().request_guard();
        let response = self.gateway.execute(request.into_inner()).await;

        let status = if is_request_error(&response) {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::OK
        };
        (status, GraphQLResponse::from(response)).into_response()
    }

    /// Convert to Axum router
    pub fn into_router(self) -> Router {
        let health_state = Arc::new(HealthState {
            gateway: self.gateway.clone(),
            shutdown: self.gateway.shutdown_coordinator().clone(),
        });

        Router::new()
            .route(
                "/graphql",
                post(handle_graphql_post).get(graphql_playground),
            )
            .with_state(Arc::new(self))
            .route("/health", get(health_handler))
            .route("/ready", get(readiness_handler).with_state(health_state))
            .layer(TraceLayer::new_for_http())
    }
}

/// Parse and validation errors carry no path; field errors always do.
/// Only a response made of the former was rejected before execution.
fn is_request_error(response: &async_graphql::Response) -> bool {
    !response.errors.is_empty() && response.errors.iter().all(|e| e.path.is_empty())
}

async fn handle_graphql_post(
    State(mux): State<Arc<ServeMux>>,
    request: GraphQLRequest,
) -> Response {
    mux.handle_http(request).await
}

/// Serve the GraphQL Playground UI for ad-hoc exploration.
async fn graphql_playground() -> impl IntoResponse {
    Html(async_graphql::http::playground_source(
        async_graphql::http::GraphQLPlaygroundConfig::new("/graphql"),
    ))
}
