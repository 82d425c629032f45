//! Declarative schema loading
//!
//! The gateway's contract is an SDL document. [`SchemaBuilder`] parses it
//! once at startup and turns every object type into an executable
//! [`async_graphql::dynamic::Object`], wiring each field either to the
//! resolver registered for `(type, field)` or to a default resolver that
//! reads the same-named key of the parent JSON object.
//!
//! Every value a resolver produces is coerced against the field's declared
//! type before it reaches the executor. A mismatch is reported as
//! [`Error::SchemaCoercion`] on that field.
//!
//! Fields never fail towards the executor. A resolver or coercion error is
//! recorded on the request with the field's response path and the field
//! renders as `null`. Declared non-null types are applied afterwards by
//! [`format_response`](crate::format::format_response).
//!
//! Any problem with the document or the resolver table is an
//! [`Error::SchemaParse`]; callers are expected to abort startup.

use crate::context::RequestContext;
use crate::format::format_response;
use crate::resolvers::{ResolveParams, Resolver, ResolverRegistry};
use crate::{Error, Result};
use async_graphql::dynamic::{
    Field, FieldFuture, FieldValue, InputValue, Object, ResolverContext, Scalar, Schema, TypeRef,
};
use async_graphql::parser::types::{
    BaseType, FieldDefinition, ObjectType, Type, TypeKind, TypeSystemDefinition,
};
use async_graphql::{PathSegment, QueryPathNode, QueryPathSegment, Value as GqlValue};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// The gateway's type definitions
pub const TYPE_DEFS: &str = r#"
type User {
  id: ID!
  name: String
}

type Post {
  userId: ID!
  id: ID!
  title: String
  body: String
}

type Query {
  "Look up a local user by id"
  user(id: ID!): User
  "Every post from the upstream"
  movie: [Post]
  "A single upstream post"
  post(id: ID!): Post
}
"#;

const BUILTIN_SCALARS: [&str; 5] = ["ID", "String", "Int", "Float", "Boolean"];

/// Output type of a field, resolved against the document's object types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputShape {
    Scalar { name: String, nullable: bool },
    Object { name: String, nullable: bool },
    List { item: Box<OutputShape>, nullable: bool },
}

impl OutputShape {
    fn from_type(ty: &Type, objects: &HashSet<String>) -> Self {
        let nullable = ty.nullable;
        match &ty.base {
            BaseType::Named(name) if objects.contains(name.as_str()) => OutputShape::Object {
                name: name.to_string(),
                nullable,
            },
            BaseType::Named(name) => OutputShape::Scalar {
                name: name.to_string(),
                nullable,
            },
            BaseType::List(item) => OutputShape::List {
                item: Box::new(Self::from_type(item, objects)),
                nullable,
            },
        }
    }

    pub fn nullable(&self) -> bool {
        match self {
            OutputShape::Scalar { nullable, .. }
            | OutputShape::Object { nullable, .. }
            | OutputShape::List { nullable, .. } => *nullable,
        }
    }

    /// The declared type, as written in the document
    pub fn type_ref(&self) -> TypeRef {
        let inner = match self {
            OutputShape::Scalar { name, .. } | OutputShape::Object { name, .. } => {
                TypeRef::Named(name.clone().into())
            }
            OutputShape::List { item, .. } => TypeRef::List(Box::new(item.type_ref())),
        };
        if self.nullable() {
            inner
        } else {
            TypeRef::NonNull(Box::new(inner))
        }
    }

    /// The type registered with the executor: the declared type with every
    /// level nullable, so a failed field is rendered as `null` in place
    pub fn executable_type_ref(&self) -> TypeRef {
        match self {
            OutputShape::Scalar { name, .. } | OutputShape::Object { name, .. } => {
                TypeRef::Named(name.clone().into())
            }
            OutputShape::List { item, .. } => {
                TypeRef::List(Box::new(item.executable_type_ref()))
            }
        }
    }

    /// Coerce a resolved JSON value into something the executor can render.
    ///
    /// Values that cannot be coerced become `None`, and the reason is pushed
    /// to `failures`. Inside a list only the offending item is nulled.
    pub fn coerce<'a>(
        &self,
        value: Value,
        failures: &mut Vec<CoercionFailure>,
    ) -> Option<FieldValue<'a>> {
        self.coerce_at(value, &mut Vec::new(), failures)
    }

    fn coerce_at<'a>(
        &self,
        value: Value,
        indices: &mut Vec<usize>,
        failures: &mut Vec<CoercionFailure>,
    ) -> Option<FieldValue<'a>> {
        match self.coerce_value(value, indices, failures) {
            Ok(value) => value,
            Err(error) => {
                failures.push(CoercionFailure {
                    indices: indices.clone(),
                    error,
                });
                None
            }
        }
    }

    fn coerce_value<'a>(
        &self,
        value: Value,
        indices: &mut Vec<usize>,
        failures: &mut Vec<CoercionFailure>,
    ) -> Result<Option<FieldValue<'a>>> {
        if value.is_null() {
            return if self.nullable() {
                Ok(None)
            } else {
                Err(Error::SchemaCoercion(format!(
                    "non-null field of type {} resolved to null",
                    self.type_ref()
                )))
            };
        }

        match (self, value) {
            (OutputShape::Scalar { name, .. }, value) => {
                Ok(Some(FieldValue::value(coerce_scalar(name, value)?)))
            }
            (OutputShape::Object { .. }, value @ Value::Object(_)) => {
                Ok(Some(FieldValue::owned_any(value)))
            }
            (OutputShape::Object { name, .. }, other) => Err(Error::SchemaCoercion(format!(
                "expected an object for {}, got {}",
                name,
                describe(&other)
            ))),
            (OutputShape::List { item, .. }, Value::Array(items)) => {
                let mut values = Vec::with_capacity(items.len());
                for (index, element) in items.into_iter().enumerate() {
                    indices.push(index);
                    values.push(
                        item.coerce_at(element, indices, failures)
                            .unwrap_or(FieldValue::NULL),
                    );
                    indices.pop();
                }
                Ok(Some(FieldValue::list(values)))
            }
            (OutputShape::List { .. }, other) => Err(Error::SchemaCoercion(format!(
                "expected a list, got {}",
                describe(&other)
            ))),
        }
    }
}

/// A value that failed coercion, located by its list indices below the field
#[derive(Debug)]
pub struct CoercionFailure {
    pub indices: Vec<usize>,
    pub error: Error,
}

/// Declared output shape of every field, by type name then field name
pub type FieldTypes = HashMap<String, HashMap<String, OutputShape>>;

/// Result coercion for scalars.
///
/// `ID` accepts strings and integers, `String` also renders numbers and
/// booleans, `Int` must fit in 32 bits. Custom scalars pass through.
pub fn coerce_scalar(name: &str, value: Value) -> Result<GqlValue> {
    let mismatch = |value: &Value| {
        Error::SchemaCoercion(format!("cannot represent {} as {}", describe(value), name))
    };

    match name {
        "ID" => match value {
            Value::String(s) => Ok(GqlValue::String(s)),
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(GqlValue::String(n.to_string())),
            other => Err(mismatch(&other)),
        },
        "String" => match value {
            Value::String(s) => Ok(GqlValue::String(s)),
            Value::Number(n) => Ok(GqlValue::String(n.to_string())),
            Value::Bool(b) => Ok(GqlValue::String(b.to_string())),
            other => Err(mismatch(&other)),
        },
        "Int" => match &value {
            Value::Number(n) => n
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .map(GqlValue::from)
                .ok_or_else(|| mismatch(&value)),
            other => Err(mismatch(other)),
        },
        "Float" => match value {
            Value::Number(n) => Ok(GqlValue::Number(n)),
            other => Err(mismatch(&other)),
        },
        "Boolean" => match value {
            Value::Bool(b) => Ok(GqlValue::Boolean(b)),
            other => Err(mismatch(&other)),
        },
        _ => Ok(GqlValue::from_json(value)?),
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".into(),
        Value::Bool(b) => format!("boolean {}", b),
        Value::Number(n) => format!("number {}", n),
        Value::String(s) => format!("string {:?}", s),
        Value::Array(_) => "a list".into(),
        Value::Object(_) => "an object".into(),
    }
}

fn arguments_to_json(ctx: &ResolverContext<'_>) -> Result<Map<String, Value>> {
    let mut args = Map::new();
    for (name, value) in ctx.args.iter() {
        args.insert(name.to_string(), value.as_value().clone().into_json()?);
    }
    Ok(args)
}

/// Executable schema built from SDL
#[derive(Clone)]
pub struct GatewaySchema {
    schema: Schema,
    type_defs: Arc<str>,
    query_root: Arc<str>,
    types: Arc<FieldTypes>,
}

impl std::fmt::Debug for GatewaySchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewaySchema").finish_non_exhaustive()
    }
}

impl GatewaySchema {
    /// Execute a request, then order and complete `data` against the
    /// operation that ran
    pub async fn execute(&self, request: async_graphql::Request) -> async_graphql::Response {
        let query = request.query.clone();
        let operation_name = request.operation_name.clone();

        let mut response = self.schema.execute(request).await;
        format_response(
            &mut response,
            &query,
            operation_name.as_deref(),
            &self.types,
            &self.query_root,
        );
        response
    }

    /// SDL of the executable schema
    pub fn sdl(&self) -> String {
        self.schema.sdl()
    }

    /// The document the schema was built from
    pub fn type_defs(&self) -> &str {
        &self.type_defs
    }
}

/// Builds a [`GatewaySchema`] from SDL and a resolver table
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    type_defs: String,
    resolvers: ResolverRegistry,
}

impl Default for SchemaBuilder {
    fn default() -> Self {
        Self::new(TYPE_DEFS)
    }
}

impl SchemaBuilder {
    pub fn new(type_defs: impl Into<String>) -> Self {
        Self {
            type_defs: type_defs.into(),
            resolvers: ResolverRegistry::new(),
        }
    }

    pub fn with_resolvers(mut self, resolvers: ResolverRegistry) -> Self {
        self.resolvers = resolvers;
        self
    }

    pub fn build(self) -> Result<GatewaySchema> {
        let document = async_graphql::parser::parse_schema(&self.type_defs)
            .map_err(|e| Error::SchemaParse(e.to_string()))?;

        let mut query_root = "Query".to_string();
        let mut objects: BTreeMap<String, ObjectType> = BTreeMap::new();
        let mut scalars: Vec<String> = Vec::new();

        for definition in document.definitions {
            match definition {
                TypeSystemDefinition::Schema(schema) => {
                    let schema = schema.node;
                    if schema.mutation.is_some() || schema.subscription.is_some() {
                        return Err(Error::SchemaParse(
                            "only the query root operation is supported".into(),
                        ));
                    }
                    if let Some(query) = schema.query {
                        query_root = query.node.to_string();
                    }
                }
                TypeSystemDefinition::Type(ty) => {
                    let ty = ty.node;
                    let name = ty.name.node.to_string();
                    if ty.extend {
                        return Err(Error::SchemaParse(format!(
                            "type extensions are not supported ({})",
                            name
                        )));
                    }
                    match ty.kind {
                        TypeKind::Object(object) => {
                            if objects.insert(name.clone(), object).is_some() {
                                return Err(Error::SchemaParse(format!(
                                    "type {} is defined twice",
                                    name
                                )));
                            }
                        }
                        TypeKind::Scalar => {
                            if !BUILTIN_SCALARS.contains(&name.as_str()) {
                                scalars.push(name);
                            }
                        }
                        _ => {
                            return Err(Error::SchemaParse(format!(
                                "type {} uses an unsupported kind; \
                                 only object and scalar types are allowed",
                                name
                            )));
                        }
                    }
                }
                TypeSystemDefinition::Directive(directive) => {
                    return Err(Error::SchemaParse(format!(
                        "directive definitions are not supported (@{})",
                        directive.node.name.node
                    )));
                }
            }
        }

        for root in ["Mutation", "Subscription"] {
            if objects.contains_key(root) {
                return Err(Error::SchemaParse(format!("{} type is not supported", root)));
            }
        }
        if !objects.contains_key(&query_root) {
            return Err(Error::SchemaParse(format!(
                "query root type {} is not defined",
                query_root
            )));
        }

        for (type_name, field_name) in self.resolvers.fields() {
            let known = objects.get(type_name).is_some_and(|object| {
                object
                    .fields
                    .iter()
                    .any(|field| field.node.name.node.as_str() == field_name)
            });
            if !known {
                return Err(Error::SchemaParse(format!(
                    "resolver registered for unknown field {}.{}",
                    type_name, field_name
                )));
            }
        }

        let object_names: HashSet<String> = objects.keys().cloned().collect();
        let known_types = |name: &str| {
            BUILTIN_SCALARS.contains(&name)
                || scalars.iter().any(|s| s == name)
                || object_names.contains(name)
        };

        let mut builder = Schema::build(&query_root, None, None);
        for scalar in &scalars {
            builder = builder.register(Scalar::new(scalar.as_str()));
        }

        let mut types = FieldTypes::new();
        for (type_name, object) in &objects {
            let mut dynamic_object = Object::new(type_name.as_str());
            let fields = types.entry(type_name.clone()).or_default();
            for field in &object.fields {
                let field = &field.node;
                let base = base_type_name(&field.ty.node);
                if !known_types(base) {
                    return Err(Error::SchemaParse(format!(
                        "{}.{} references unknown type {}",
                        type_name, field.name.node, base
                    )));
                }
                let shape = OutputShape::from_type(&field.ty.node, &object_names);
                fields.insert(field.name.node.to_string(), shape.clone());
                dynamic_object =
                    dynamic_object.field(self.build_field(type_name, field, shape, &object_names)?);
            }
            builder = builder.register(dynamic_object);
        }

        let schema = builder
            .finish()
            .map_err(|e| Error::SchemaParse(e.to_string()))?;

        info!(
            types = objects.len(),
            resolvers = self.resolvers.len(),
            "GraphQL schema loaded"
        );

        Ok(GatewaySchema {
            schema,
            type_defs: self.type_defs.into(),
            query_root: query_root.into(),
            types: Arc::new(types),
        })
    }

    fn build_field(
        &self,
        type_name: &str,
        definition: &FieldDefinition,
        shape: OutputShape,
        objects: &HashSet<String>,
    ) -> Result<Field> {
        let field_name = definition.name.node.to_string();
        let shape = Arc::new(shape);
        let resolver = self.resolvers.get(type_name, &field_name);

        if resolver.is_none() && !definition.arguments.is_empty() {
            return Err(Error::SchemaParse(format!(
                "{}.{} takes arguments but has no resolver",
                type_name, field_name
            )));
        }

        let mut arguments = Vec::with_capacity(definition.arguments.len());
        for argument in &definition.arguments {
            let argument = &argument.node;
            let ty = &argument.ty.node;
            let base = base_type_name(ty);
            if objects.contains(base) {
                return Err(Error::SchemaParse(format!(
                    "argument {}.{}({}) must be a scalar",
                    type_name, field_name, argument.name.node
                )));
            }
            arguments.push(InputValue::new(
                argument.name.node.to_string(),
                OutputShape::from_type(ty, objects).type_ref(),
            ));
        }

        debug!(
            field = %format!("{}.{}", type_name, field_name),
            custom_resolver = resolver.is_some(),
            "Registering field"
        );

        let key = field_name.clone();
        let mut field = Field::new(field_name, shape.executable_type_ref(), move |ctx| {
            let shape = shape.clone();
            let resolver = resolver.clone();
            let key = key.clone();
            FieldFuture::new(async move {
                let parent = ctx.parent_value.downcast_ref::<Value>();
                let value = match resolver {
                    Some(resolver) => match run_resolver(&ctx, resolver.as_ref(), parent).await {
                        Ok(value) => value,
                        Err(e) => {
                            report_field_error(&ctx, &e, &[]);
                            return Ok(None);
                        }
                    },
                    None => parent
                        .and_then(|parent| parent.get(&key))
                        .cloned()
                        .unwrap_or(Value::Null),
                };

                let mut failures = Vec::new();
                let value = shape.coerce(value, &mut failures);
                for failure in &failures {
                    report_field_error(&ctx, &failure.error, &failure.indices);
                }
                Ok::<_, async_graphql::Error>(value)
            })
        });

        for argument in arguments {
            field = field.argument(argument);
        }
        if let Some(description) = &definition.description {
            field = field.description(description.node.clone());
        }
        Ok(field)
    }
}

async fn run_resolver(
    ctx: &ResolverContext<'_>,
    resolver: &dyn Resolver,
    parent: Option<&Value>,
) -> Result<Value> {
    let context = ctx
        .data_opt::<RequestContext>()
        .ok_or_else(|| Error::Config("request has no upstream context".into()))?;
    let args = arguments_to_json(ctx)?;
    resolver
        .resolve(ResolveParams {
            parent,
            args: &args,
            context,
        })
        .await
}

/// Record `error` against the field being resolved, or against one of its
/// list items when `indices` is not empty
fn report_field_error(ctx: &ResolverContext<'_>, error: &Error, indices: &[usize]) {
    let mut server_error = error.to_field_error().into_server_error(ctx.item.pos);
    server_error.path = response_path(ctx.path_node.as_ref());
    server_error
        .path
        .extend(indices.iter().copied().map(PathSegment::Index));

    debug!(path = ?server_error.path, code = error.code(), "Field resolved to null");
    ctx.add_error(server_error);
}

fn response_path(node: Option<&QueryPathNode<'_>>) -> Vec<PathSegment> {
    let mut path = Vec::new();
    let mut current = node;
    while let Some(node) = current {
        path.push(match node.segment {
            QueryPathSegment::Name(name) => PathSegment::Field(name.to_string()),
            QueryPathSegment::Index(index) => PathSegment::Index(index),
        });
        current = node.parent;
    }
    path.reverse();
    path
}

fn base_type_name(ty: &Type) -> &str {
    match &ty.base {
        BaseType::Named(name) => name.as_str(),
        BaseType::List(item) => base_type_name(item),
    }
}
