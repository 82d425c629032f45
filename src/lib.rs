//! # movies-gateway
//!
//! A small GraphQL gateway that serves locally seeded users and proxies
//! posts from a REST upstream.
//!
//! ## Features
//!
//! - **Declarative Schema**: executable schema built from an SDL document and
//!   a static `(type, field)` resolver table
//! - **Per-request Upstream Clients**: every request gets its own
//!   [`MoviesApi`] bound to a shared HTTP pool
//! - **Response Caching**: process-wide upstream cache honoring
//!   `Cache-Control`, with TTL expiry and bounded size
//! - **Field-level Errors**: a failing upstream nulls its own field, with an
//!   `extensions.code` on the error
//! - **Operations**: health probes, request tracing and graceful shutdown
//!
//! ## Main Components
//!
//! - [`Gateway`]: The main entry point for executing and serving requests.
//! - [`GatewayBuilder`]: Configuration builder for the gateway.
//! - [`SchemaBuilder`]: Turns SDL and resolvers into a [`GatewaySchema`].
//! - [`HttpDataSource`]: Cached, retrying REST client behind [`MoviesApi`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use movies_gateway::{Gateway, GatewayConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = GatewayConfig::from_env()?;
//!     let gateway = Gateway::builder().build()?;
//!
//!     let app = gateway.into_router();
//!     let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
//!     axum::serve(listener, app).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod context;
pub mod data_source;
pub mod error;
pub mod format;
pub mod gateway;
pub mod health;
pub mod resolvers;
pub mod runtime;
pub mod schema;
pub mod shutdown;
pub mod upstream;

pub use cache::{create_response_cache, CacheConfig, CacheStats, ResponseCache, SharedResponseCache};
pub use config::GatewayConfig;
pub use context::{RequestContext, RequestContextFactory};
pub use data_source::{
    BearerAuthInterceptor, CachePolicy, DataSourceConfig, HttpDataSource, RequestInterceptor,
    RetryConfig, UpstreamRequest,
};
pub use error::{Error, Result};
pub use gateway::{Gateway, GatewayBuilder};
pub use health::{ComponentHealth, HealthResponse, HealthState, HealthStatus};
pub use resolvers::{ResolveParams, Resolver, ResolverRegistry, User};
pub use runtime::ServeMux;
pub use schema::{GatewaySchema, OutputShape, SchemaBuilder, TYPE_DEFS};
pub use shutdown::{
    run_with_graceful_shutdown, RequestGuard, ShutdownConfig, ShutdownCoordinator, ShutdownState,
};
pub use upstream::{MoviesApi, Post};
