//! Client for the posts ("movies") REST upstream

use crate::data_source::HttpDataSource;
use crate::Result;
use serde::{Deserialize, Serialize};
use tracing::instrument;

/// Default upstream origin
pub const DEFAULT_MOVIES_ORIGIN: &str = "https://jsonplaceholder.typicode.com";

/// A post as served by the upstream
///
/// Ids are kept as raw JSON so that both numeric and string ids survive
/// decoding; the schema coerces them to `ID` on output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub user_id: serde_json::Value,
    pub id: serde_json::Value,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
}

/// Per-request upstream client
///
/// A new instance is built for every incoming request; the response cache
/// inside the data source is the only state shared between instances.
#[derive(Debug, Clone)]
pub struct MoviesApi {
    source: HttpDataSource,
}

impl MoviesApi {
    pub fn new(source: HttpDataSource) -> Self {
        Self { source }
    }

    pub fn data_source(&self) -> &HttpDataSource {
        &self.source
    }

    /// `GET /posts`
    #[instrument(skip(self))]
    pub async fn fetch_all_posts(&self) -> Result<Vec<Post>> {
        self.source.get("/posts").await
    }

    /// `GET /posts/{id}`
    ///
    /// An upstream 404 is returned as
    /// [`Error::UpstreamNotFound`](crate::Error::UpstreamNotFound).
    #[instrument(skip(self))]
    pub async fn fetch_post(&self, id: &str) -> Result<Post> {
        self.source.get(&post_path(id)).await
    }
}

/// Upstream path of one post; the id is percent-encoded so it stays a
/// single path segment
fn post_path(id: &str) -> String {
    format!("/posts/{}", urlencoding::encode(id))
}
