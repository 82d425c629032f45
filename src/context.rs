//! Per-request collaborators visible to resolvers
//!
//! A [`RequestContextFactory`] lives for the whole process and owns the
//! shared pieces (HTTP client, upstream configuration, interceptors and the
//! response cache). [`RequestContextFactory::create`] is called once per
//! incoming request and hands out a fresh [`RequestContext`].

use crate::cache::{CacheStats, SharedResponseCache};
use crate::data_source::{DataSourceConfig, HttpDataSource, Interceptors};
use crate::upstream::MoviesApi;
use std::sync::Arc;

/// Collaborators for one request, dropped when its response is produced
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Upstream client for posts
    pub movies: MoviesApi,
}

/// Builds a [`RequestContext`] for every request
#[derive(Clone)]
pub struct RequestContextFactory {
    upstream: Arc<DataSourceConfig>,
    client: reqwest::Client,
    cache: SharedResponseCache,
    interceptors: Interceptors,
}

impl std::fmt::Debug for RequestContextFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContextFactory")
            .field("upstream", &self.upstream.base_url)
            .field("cache", &self.cache)
            .finish()
    }
}

impl RequestContextFactory {
    pub fn new(
        upstream: DataSourceConfig,
        client: reqwest::Client,
        cache: SharedResponseCache,
        interceptors: Interceptors,
    ) -> Self {
        Self {
            upstream: Arc::new(upstream),
            client,
            cache,
            interceptors,
        }
    }

    /// Build the context for one request. Performs no I/O.
    pub fn create(&self) -> RequestContext {
        let source = HttpDataSource::new(
            self.upstream.clone(),
            self.client.clone(),
            self.cache.clone(),
            self.interceptors.clone(),
        );

        RequestContext {
            movies: MoviesApi::new(source),
        }
    }

    /// The process-wide response cache
    pub fn cache(&self) -> &SharedResponseCache {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn upstream_base_url(&self) -> &str {
        &self.upstream.base_url
    }
}
