//! Response formatting against the executed operation
//!
//! The executor resolves sibling fields concurrently, so the keys of `data`
//! arrive in completion order, and every output type it sees is nullable.
//! [`format_response`] re-orders each object to follow the query document
//! and applies the declared non-null types: a `null` in a non-null position
//! nulls the nearest nullable ancestor, or `data` itself.
//!
//! Errors are not added here. A null in a non-null position always comes
//! from a field that already recorded its error.

use crate::schema::{FieldTypes, OutputShape};
use async_graphql::indexmap::IndexMap;
use async_graphql::parser::types::{
    DocumentOperations, ExecutableDocument, FragmentDefinition, OperationDefinition, Selection,
    SelectionSet,
};
use async_graphql::{Name, Positioned, Response, Value};
use std::collections::HashMap;
use tracing::debug;

/// A non-null position resolved to null
struct InvalidValue;

/// One response key of an object, with the sub-selections of every place
/// the key is selected
struct CollectedField<'a> {
    key: &'a Name,
    name: &'a Name,
    selections: Vec<&'a SelectionSet>,
}

struct Formatter<'a> {
    types: &'a FieldTypes,
    fragments: &'a HashMap<Name, Positioned<FragmentDefinition>>,
}

/// Re-format `response.data` to match the operation that produced it.
///
/// Responses without object data, such as rejected requests, are left
/// untouched.
pub fn format_response(
    response: &mut Response,
    query: &str,
    operation_name: Option<&str>,
    types: &FieldTypes,
    query_root: &str,
) {
    let Value::Object(data) = &mut response.data else {
        return;
    };
    let document = match async_graphql::parser::parse_query(query) {
        Ok(document) => document,
        Err(e) => {
            debug!("Leaving response unformatted, query does not parse: {}", e);
            return;
        }
    };
    let Some(operation) = select_operation(&document, operation_name) else {
        debug!(?operation_name, "Leaving response unformatted, no such operation");
        return;
    };

    let formatter = Formatter {
        types,
        fragments: &document.fragments,
    };
    let data = std::mem::take(data);
    response.data = match formatter.format_object(
        Some(query_root),
        &[&operation.selection_set.node],
        data,
    ) {
        Ok(data) => Value::Object(data),
        Err(InvalidValue) => Value::Null,
    };
}

fn select_operation<'a>(
    document: &'a ExecutableDocument,
    operation_name: Option<&str>,
) -> Option<&'a OperationDefinition> {
    match (&document.operations, operation_name) {
        (DocumentOperations::Single(operation), _) => Some(&operation.node),
        (DocumentOperations::Multiple(operations), Some(name)) => {
            operations.get(name).map(|operation| &operation.node)
        }
        (DocumentOperations::Multiple(operations), None) if operations.len() == 1 => {
            operations.values().next().map(|operation| &operation.node)
        }
        _ => None,
    }
}

impl<'a> Formatter<'a> {
    fn collect_fields(
        &self,
        selections: &[&'a SelectionSet],
        fields: &mut Vec<CollectedField<'a>>,
    ) {
        for selection_set in selections {
            for selection in &selection_set.items {
                match &selection.node {
                    Selection::Field(field) => {
                        let field = &field.node;
                        let key = &field.response_key().node;
                        let selection_set = &field.selection_set.node;
                        match fields.iter_mut().find(|collected| collected.key == key) {
                            Some(collected) => collected.selections.push(selection_set),
                            None => fields.push(CollectedField {
                                key,
                                name: &field.name.node,
                                selections: vec![selection_set],
                            }),
                        }
                    }
                    Selection::FragmentSpread(spread) => {
                        let name = &spread.node.fragment_name.node;
                        if let Some(fragment) = self.fragments.get(name) {
                            self.collect_fields(&[&fragment.node.selection_set.node], fields);
                        }
                    }
                    Selection::InlineFragment(fragment) => {
                        self.collect_fields(&[&fragment.node.selection_set.node], fields);
                    }
                }
            }
        }
    }

    /// Order `input` by the selection and complete each field. `type_name`
    /// is `None` below fields the document does not declare, such as
    /// introspection, where only ordering applies.
    fn format_object(
        &self,
        type_name: Option<&str>,
        selections: &[&'a SelectionSet],
        mut input: IndexMap<Name, Value>,
    ) -> Result<IndexMap<Name, Value>, InvalidValue> {
        let mut fields = Vec::new();
        self.collect_fields(selections, &mut fields);

        let field_types = type_name.and_then(|name| self.types.get(name));
        let mut output = IndexMap::with_capacity(input.len());
        for field in fields {
            let Some(value) = input.shift_remove(field.key) else {
                continue;
            };
            let value = match field_types.and_then(|types| types.get(field.name.as_str())) {
                Some(shape) => self.format_value(shape, &field.selections, value)?,
                None => self.reorder(&field.selections, value),
            };
            output.insert(field.key.clone(), value);
        }
        output.extend(input);
        Ok(output)
    }

    fn format_value(
        &self,
        shape: &OutputShape,
        selections: &[&'a SelectionSet],
        value: Value,
    ) -> Result<Value, InvalidValue> {
        let value = match (shape, value) {
            (OutputShape::Object { name, .. }, Value::Object(object)) => {
                match self.format_object(Some(name.as_str()), selections, object) {
                    Ok(object) => Value::Object(object),
                    Err(InvalidValue) => Value::Null,
                }
            }
            (OutputShape::List { item, .. }, Value::List(items)) => items
                .into_iter()
                .map(|value| self.format_value(item, selections, value))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List)
                .unwrap_or(Value::Null),
            (_, value) => value,
        };

        if matches!(value, Value::Null) && !shape.nullable() {
            return Err(InvalidValue);
        }
        Ok(value)
    }

    fn reorder(&self, selections: &[&'a SelectionSet], value: Value) -> Value {
        match value {
            Value::Object(object) => match self.format_object(None, selections, object) {
                Ok(object) => Value::Object(object),
                Err(InvalidValue) => Value::Null,
            },
            Value::List(items) => Value::List(
                items
                    .into_iter()
                    .map(|value| self.reorder(selections, value))
                    .collect(),
            ),
            other => other,
        }
    }
}
