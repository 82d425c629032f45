//! Gateway builder and main orchestration

use crate::cache::{create_response_cache, CacheConfig};
use crate::config::GatewayConfig;
use crate::context::RequestContextFactory;
use crate::data_source::{BearerAuthInterceptor, DataSourceConfig, RequestInterceptor};
use crate::resolvers::{default_resolvers, seed_users, Resolver, ResolverRegistry, User};
use crate::runtime::ServeMux;
use crate::schema::{GatewaySchema, SchemaBuilder, TYPE_DEFS};
use crate::shutdown::{run_with_graceful_shutdown, ShutdownConfig, ShutdownCoordinator};
use crate::upstream::DEFAULT_MOVIES_ORIGIN;
use crate::Result;
use axum::Router;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Main Gateway struct - entry point for the library
///
/// Owns the executable schema and the factory that hands every request its
/// own upstream clients. Created via the [`GatewayBuilder`].
///
/// # Example
///
/// ```rust,no_run
/// use movies_gateway::Gateway;
///
/// # async fn example() -> movies_gateway::Result<()> {
/// let gateway = Gateway::builder().build()?;
///
/// let response = gateway
///     .execute(async_graphql::Request::new("{ user(id: 2) { name } }"))
///     .await;
/// assert!(response.errors.is_empty());
///
/// gateway.serve("0.0.0.0:4000").await?;
/// # Ok(())
/// # }
/// ```
pub struct Gateway {
    schema: GatewaySchema,
    contexts: RequestContextFactory,
    shutdown: ShutdownCoordinator,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("contexts", &self.contexts)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }

    pub fn schema(&self) -> &GatewaySchema {
        &self.schema
    }

    pub fn contexts(&self) -> &RequestContextFactory {
        &self.contexts
    }

    pub fn shutdown_coordinator(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    /// Execute one GraphQL request.
    ///
    /// A fresh [`RequestContext`](crate::context::RequestContext) is attached
    /// to the request and dropped with it. Validation failures come back with
    /// `data: null`; resolver failures null only their own field.
    #[instrument(
        skip_all,
        fields(operation = request.operation_name.as_deref().unwrap_or("anonymous"))
    )]
    pub async fn execute(&self, request: async_graphql::Request) -> async_graphql::Response {
        let request = request.data(self.contexts.create());
        let response = self.schema.execute(request).await;

        if response.is_err() {
            debug!(errors = response.errors.len(), "Request completed with errors");
        }
        response
    }

    /// Convert gateway into Axum router
    pub fn into_router(self) -> Router {
        ServeMux::new(self).into_router()
    }

    /// Bind `addr` and serve until SIGINT/SIGTERM, then drain in-flight requests.
    pub async fn serve(self, addr: impl AsRef<str>) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(addr.as_ref()).await?;
        info!(addr = %listener.local_addr()?, "Gateway listening");

        let coordinator = self.shutdown.clone();
        run_with_graceful_shutdown(listener, self.into_router(), coordinator).await?;
        Ok(())
    }
}

/// Builder for creating a Gateway
///
/// # Example
///
/// ```rust,no_run
/// use movies_gateway::cache::CacheConfig;
/// use movies_gateway::data_source::DataSourceConfig;
/// use movies_gateway::Gateway;
/// use std::time::Duration;
///
/// # fn example() -> movies_gateway::Result<()> {
/// let gateway = Gateway::builder()
///     .upstream(DataSourceConfig::new("http://localhost:3000"))
///     .cache(CacheConfig {
///         max_size: 100,
///         default_ttl: Duration::from_secs(30),
///     })
///     .bearer_token("secret")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct GatewayBuilder {
    type_defs: String,
    users: Vec<User>,
    base_resolvers: Option<ResolverRegistry>,
    resolvers: ResolverRegistry,
    upstream: DataSourceConfig,
    cache_config: CacheConfig,
    interceptors: Vec<Arc<dyn RequestInterceptor>>,
    shutdown_config: ShutdownConfig,
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayBuilder {
    pub fn new() -> Self {
        Self {
            type_defs: TYPE_DEFS.to_string(),
            users: seed_users(),
            base_resolvers: None,
            resolvers: ResolverRegistry::new(),
            upstream: DataSourceConfig::new(DEFAULT_MOVIES_ORIGIN),
            cache_config: CacheConfig::default(),
            interceptors: Vec::new(),
            shutdown_config: ShutdownConfig::default(),
        }
    }

    /// Builder preloaded from environment configuration
    pub fn from_config(config: &GatewayConfig) -> Self {
        let builder = Self::new()
            .upstream(config.data_source())
            .cache(config.cache())
            .shutdown(ShutdownConfig {
                timeout: config.shutdown_timeout,
                ..ShutdownConfig::default()
            });

        match &config.upstream_bearer_token {
            Some(token) => builder.bearer_token(token.clone()),
            None => builder,
        }
    }

    /// Replace the SDL document
    pub fn type_defs(mut self, type_defs: impl Into<String>) -> Self {
        self.type_defs = type_defs.into();
        self
    }

    /// Replace the seeded users served by `Query.user`
    pub fn users(mut self, users: Vec<User>) -> Self {
        self.users = users;
        self
    }

    /// Replace the built-in resolver table, e.g. for a different document
    pub fn resolvers(mut self, registry: ResolverRegistry) -> Self {
        self.base_resolvers = Some(registry);
        self
    }

    /// Register a resolver, overriding the table's entry for the same field
    pub fn resolver<R>(mut self, type_name: &str, field: &str, resolver: R) -> Self
    where
        R: Resolver + 'static,
    {
        self.resolvers.register(type_name, field, resolver);
        self
    }

    pub fn upstream(mut self, config: DataSourceConfig) -> Self {
        self.upstream = config;
        self
    }

    pub fn cache(mut self, config: CacheConfig) -> Self {
        self.cache_config = config;
        self
    }

    /// Add a request interceptor, applied in registration order
    pub fn interceptor(mut self, interceptor: Arc<dyn RequestInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Send `Authorization: Bearer <token>` upstream
    pub fn bearer_token(self, token: impl Into<String>) -> Self {
        self.interceptor(Arc::new(BearerAuthInterceptor::new(token)))
    }

    pub fn shutdown(mut self, config: ShutdownConfig) -> Self {
        self.shutdown_config = config;
        self
    }

    /// Build the gateway.
    ///
    /// Fails with [`Error::SchemaParse`](crate::Error::SchemaParse) on a bad
    /// SDL document or resolver table and with
    /// [`Error::Config`](crate::Error::Config) on a bad upstream configuration.
    pub fn build(self) -> Result<Gateway> {
        let mut resolvers = self
            .base_resolvers
            .unwrap_or_else(|| default_resolvers(self.users));
        resolvers.extend(self.resolvers);

        let schema = SchemaBuilder::new(self.type_defs)
            .with_resolvers(resolvers)
            .build()?;

        let client = self.upstream.build_client()?;
        let cache = create_response_cache(self.cache_config);
        let contexts =
            RequestContextFactory::new(self.upstream, client, cache, Arc::new(self.interceptors));

        info!(upstream = contexts.upstream_base_url(), "Gateway built");

        Ok(Gateway {
            schema,
            contexts,
            shutdown: ShutdownCoordinator::new(self.shutdown_config),
        })
    }
}
