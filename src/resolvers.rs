//! Field resolvers
//!
//! Resolvers are registered in a [`ResolverRegistry`] under
//! `(type name, field name)`. The schema builder reads the table once at
//! startup; fields without an entry fall back to reading the same-named key
//! of their parent object.
//!
//! Resolvers produce plain JSON. `Value::Null` means "no value" and is a
//! successful outcome; failures are returned as [`Error`](crate::Error) and
//! become field-level GraphQL errors.

use crate::context::RequestContext;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Inputs handed to a resolver
#[derive(Debug, Clone, Copy)]
pub struct ResolveParams<'a> {
    /// Parent object, `None` for root fields
    pub parent: Option<&'a Value>,
    /// Field arguments as JSON
    pub args: &'a Map<String, Value>,
    /// Per-request collaborators
    pub context: &'a RequestContext,
}

impl<'a> ResolveParams<'a> {
    /// Fetch a required argument
    pub fn arg(&self, name: &str) -> Result<&'a Value> {
        let args: &'a Map<String, Value> = self.args;
        args.get(name)
            .ok_or_else(|| Error::Validation(format!("missing argument `{}`", name)))
    }
}

/// Produces the value of one schema field
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, params: ResolveParams<'_>) -> Result<Value>;
}

/// Static `(type, field) -> resolver` table
#[derive(Clone, Default)]
pub struct ResolverRegistry {
    resolvers: HashMap<(String, String), Arc<dyn Resolver>>,
}

impl std::fmt::Debug for ResolverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<String> = self
            .resolvers
            .keys()
            .map(|(ty, field)| format!("{}.{}", ty, field))
            .collect();
        keys.sort();
        f.debug_struct("ResolverRegistry").field("fields", &keys).finish()
    }
}

impl ResolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resolver, replacing any previous one for the same field
    pub fn register<R>(
        &mut self,
        type_name: impl Into<String>,
        field: impl Into<String>,
        resolver: R,
    )
    where
        R: Resolver + 'static,
    {
        self.resolvers
            .insert((type_name.into(), field.into()), Arc::new(resolver));
    }

    /// Builder-style [`register`](Self::register)
    pub fn with<R>(
        mut self,
        type_name: impl Into<String>,
        field: impl Into<String>,
        resolver: R,
    ) -> Self
    where
        R: Resolver + 'static,
    {
        self.register(type_name, field, resolver);
        self
    }

    /// Take every entry of `other`, replacing existing ones
    pub fn extend(&mut self, other: ResolverRegistry) {
        self.resolvers.extend(other.resolvers);
    }

    pub fn get(&self, type_name: &str, field: &str) -> Option<Arc<dyn Resolver>> {
        self.resolvers
            .get(&(type_name.to_string(), field.to_string()))
            .cloned()
    }

    /// All registered `(type, field)` pairs
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.resolvers
            .keys()
            .map(|(ty, field)| (ty.as_str(), field.as_str()))
    }

    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }
}

/// A locally seeded user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: u64,
    pub name: String,
}

impl User {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// The users every gateway starts with
pub fn seed_users() -> Vec<User> {
    vec![User::new(1, "Kate Chopin"), User::new(2, "Paul Auster")]
}

/// Canonical string form of an id argument.
///
/// Strings are taken as-is and integers use their decimal form, so `1` and
/// `"1"` are the same id while `"01"` is not.
pub fn normalize_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    }
}

/// `Query.user(id)`: linear scan of the local users
#[derive(Debug, Clone)]
pub struct UserResolver {
    users: Arc<[User]>,
}

impl UserResolver {
    pub fn new(users: impl Into<Arc<[User]>>) -> Self {
        Self {
            users: users.into(),
        }
    }

    pub fn find(&self, id: &str) -> Option<&User> {
        self.users.iter().find(|user| user.id.to_string() == id)
    }
}

#[async_trait]
impl Resolver for UserResolver {
    async fn resolve(&self, params: ResolveParams<'_>) -> Result<Value> {
        let Some(id) = normalize_id(params.arg("id")?) else {
            return Ok(Value::Null);
        };

        match self.find(&id) {
            Some(user) => {
                debug!(user_id = %id, "User found");
                Ok(serde_json::to_value(user)?)
            }
            None => {
                debug!(user_id = %id, "No user with this id");
                Ok(Value::Null)
            }
        }
    }
}

/// `Query.movie`: every post from the upstream, unmodified
#[derive(Debug, Clone, Copy, Default)]
pub struct MovieListResolver;

#[async_trait]
impl Resolver for MovieListResolver {
    async fn resolve(&self, params: ResolveParams<'_>) -> Result<Value> {
        let posts = params.context.movies.fetch_all_posts().await?;
        debug!(count = posts.len(), "Fetched posts from upstream");
        Ok(serde_json::to_value(posts)?)
    }
}

/// `Query.post(id)`: a single upstream post
#[derive(Debug, Clone, Copy, Default)]
pub struct PostResolver;

#[async_trait]
impl Resolver for PostResolver {
    async fn resolve(&self, params: ResolveParams<'_>) -> Result<Value> {
        let id = normalize_id(params.arg("id")?)
            .ok_or_else(|| Error::Validation("post id must be a string or integer".into()))?;
        let post = params.context.movies.fetch_post(&id).await?;
        Ok(serde_json::to_value(post)?)
    }
}

/// Resolver table for the built-in schema
pub fn default_resolvers(users: Vec<User>) -> ResolverRegistry {
    ResolverRegistry::new()
        .with("Query", "user", UserResolver::new(users))
        .with("Query", "movie", MovieListResolver)
        .with("Query", "post", PostResolver)
}
