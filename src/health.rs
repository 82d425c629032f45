//! Health check endpoints for container orchestration.
//!
//! - `/health` - Liveness probe: 200 while the process is serving
//! - `/ready` - Readiness probe: 200 unless the gateway is draining, with the
//!   response cache and upstream reported as components

use crate::cache::CacheStats;
use crate::gateway::Gateway;
use crate::shutdown::ShutdownCoordinator;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub checks: Vec<ComponentHealth>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual component health check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ComponentHealth {
    pub fn new(name: impl Into<String>, status: HealthStatus) -> Self {
        Self {
            name: name.into(),
            status,
            message: None,
            details: None,
        }
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl HealthResponse {
    pub fn healthy() -> Self {
        Self {
            status: HealthStatus::Healthy,
            message: None,
            checks: Vec::new(),
        }
    }

    pub fn healthy_with_message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::healthy()
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
            checks: Vec::new(),
        }
    }

    /// Add a component check; the overall status only ever gets worse
    pub fn with_check(mut self, check: ComponentHealth) -> Self {
        match (self.status, check.status) {
            (HealthStatus::Healthy, HealthStatus::Degraded) => self.status = HealthStatus::Degraded,
            (_, HealthStatus::Unhealthy) => self.status = HealthStatus::Unhealthy,
            _ => {}
        }
        self.checks.push(check);
        self
    }
}

impl IntoResponse for HealthResponse {
    fn into_response(self) -> Response {
        let status_code = match self.status {
            HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status_code, Json(self)).into_response()
    }
}

/// Shared state for the readiness handler
#[derive(Clone)]
pub struct HealthState {
    pub gateway: Arc<Gateway>,
    pub shutdown: ShutdownCoordinator,
}

/// Liveness probe handler - `/health`
pub async fn health_handler() -> HealthResponse {
    HealthResponse::healthy_with_message("Gateway is running")
}

/// Readiness probe handler - `/ready`
///
/// Does not call the upstream; it reports configuration and cache
/// occupancy only, so the probe never adds upstream load.
pub async fn readiness_handler(State(state): State<Arc<HealthState>>) -> HealthResponse {
    if state.shutdown.is_shutting_down() {
        return HealthResponse::unhealthy("Gateway is shutting down");
    }

    let contexts = state.gateway.contexts();
    HealthResponse::healthy()
        .with_check(cache_check(contexts.cache_stats()))
        .with_check(
            ComponentHealth::new("upstream", HealthStatus::Healthy)
                .message(format!("configured for {}", contexts.upstream_base_url())),
        )
}

fn cache_check(stats: CacheStats) -> ComponentHealth {
    let details = serde_json::to_value(&stats).ok();
    let check = if stats.max_size == 0 {
        ComponentHealth::new("response_cache", HealthStatus::Degraded).message("caching disabled")
    } else {
        ComponentHealth::new("response_cache", HealthStatus::Healthy)
            .message(format!("{}/{} entries", stats.size, stats.max_size))
    };
    match details {
        Some(details) => check.details(details),
        None => check,
    }
}
