use crate::error::SchemaBuildError;
use peregrine_common::{JsonMap, VertexSchema};
use serde_json::Value;
use std::collections::BTreeMap;

use super::linker::RelationField;

pub const TAG_NUMERIC: &str = "NUMERIC";
pub const TAG_STRING: &str = "STRING";
pub const TAG_BOOL: &str = "BOOL";
pub const TAG_STRING_LIST: &str = "STRING_LIST";
const TAG_STRING_LIST_ALIAS: &str = "STRLIST";

/// Identity field injected into every vertex type.
pub const ID_FIELD: &str = "id";

#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Numeric,
    String,
    Bool,
    StringList,
    Object(ObjectDescriptor),
    List(Box<FieldKind>),
}

impl FieldKind {
    fn primitive(tag: &str) -> Option<FieldKind> {
        match tag {
            TAG_NUMERIC => Some(FieldKind::Numeric),
            TAG_STRING => Some(FieldKind::String),
            TAG_BOOL => Some(FieldKind::Bool),
            TAG_STRING_LIST | TAG_STRING_LIST_ALIAS => Some(FieldKind::StringList),
            _ => None,
        }
    }

    /// Serialize back to the sample-map form the store reports.
    pub fn to_sample(&self) -> Value {
        match self {
            FieldKind::Numeric => Value::String(TAG_NUMERIC.into()),
            FieldKind::String => Value::String(TAG_STRING.into()),
            FieldKind::Bool => Value::String(TAG_BOOL.into()),
            FieldKind::StringList => Value::String(TAG_STRING_LIST.into()),
            FieldKind::Object(object) => Value::Object(object.to_sample()),
            FieldKind::List(inner) => Value::Array(vec![inner.to_sample()]),
        }
    }

    /// Scalar or list-of-string kinds usable as query arguments.
    pub fn is_argument(&self) -> bool {
        match self {
            FieldKind::Numeric | FieldKind::String | FieldKind::Bool | FieldKind::StringList => true,
            FieldKind::List(inner) => matches!(**inner, FieldKind::String),
            FieldKind::Object(_) => false,
        }
    }
}

/// Named object type with fields in sorted order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectDescriptor {
    pub name: String,
    pub fields: BTreeMap<String, FieldKind>,
}

impl ObjectDescriptor {
    pub fn to_sample(&self) -> JsonMap {
        self.fields
            .iter()
            .map(|(name, kind)| (name.clone(), kind.to_sample()))
            .collect()
    }

    /// Every nested object descriptor, depth first.
    pub fn nested(&self) -> Vec<&ObjectDescriptor> {
        fn collect<'a>(kind: &'a FieldKind, out: &mut Vec<&'a ObjectDescriptor>) {
            match kind {
                FieldKind::Object(object) => {
                    out.push(object);
                    for child in object.fields.values() {
                        collect(child, out);
                    }
                }
                FieldKind::List(inner) => collect(inner, out),
                _ => {}
            }
        }

        let mut out = Vec::new();
        for kind in self.fields.values() {
            collect(kind, &mut out);
        }
        out
    }
}

/// A queryable vertex type.
#[derive(Debug, Clone, PartialEq)]
pub struct VertexType {
    /// Label as stored in the graph.
    pub label: String,
    /// GraphQL type name.
    pub name: String,
    pub object: ObjectDescriptor,
    pub relations: BTreeMap<String, RelationField>,
}

impl VertexType {
    /// Sorted property and relationship field names.
    pub fn field_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .object
            .fields
            .keys()
            .chain(self.relations.keys())
            .cloned()
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

/// GraphQL type name for a store label.
pub fn type_name(label: &str) -> String {
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Infer a vertex type from its schema entry. `None` when there is no sample.
pub fn infer_vertex(schema: &VertexSchema, errors: &mut Vec<SchemaBuildError>) -> Option<VertexType> {
    let sample = schema.data.as_ref()?;
    let name = type_name(&schema.label);
    let mut object = infer_object(&name, sample, errors);
    object.fields.insert(ID_FIELD.to_string(), FieldKind::String);

    Some(VertexType {
        label: schema.label.clone(),
        name,
        object,
        relations: BTreeMap::new(),
    })
}

/// Infer an object descriptor. Unusable fields are dropped and reported.
pub fn infer_object(name: &str, sample: &JsonMap, errors: &mut Vec<SchemaBuildError>) -> ObjectDescriptor {
    let mut fields = BTreeMap::new();
    for (field, value) in sample {
        match infer_field(name, field, value, errors) {
            Ok(kind) => {
                fields.insert(field.clone(), kind);
            }
            Err(e) => {
                tracing::warn!("Dropping field: {}", e);
                errors.push(e);
            }
        }
    }
    ObjectDescriptor {
        name: name.to_string(),
        fields,
    }
}

fn infer_field(
    object: &str,
    field: &str,
    value: &Value,
    errors: &mut Vec<SchemaBuildError>,
) -> Result<FieldKind, SchemaBuildError> {
    match value {
        Value::String(tag) => FieldKind::primitive(tag).ok_or_else(|| SchemaBuildError::UnsupportedFieldType {
            object: object.to_string(),
            field: field.to_string(),
            tag: tag.clone(),
        }),
        Value::Object(map) => infer_nested(object, field, map, errors).map(FieldKind::Object),
        Value::Array(items) => infer_list(object, field, items, errors),
        other => Err(SchemaBuildError::UnsupportedFieldType {
            object: object.to_string(),
            field: field.to_string(),
            tag: shape_name(other).to_string(),
        }),
    }
}

fn infer_nested(
    object: &str,
    field: &str,
    sample: &JsonMap,
    errors: &mut Vec<SchemaBuildError>,
) -> Result<ObjectDescriptor, SchemaBuildError> {
    let nested = infer_object(&format!("{}_{}", object, field), sample, errors);
    if nested.fields.is_empty() {
        return Err(SchemaBuildError::EmptyObjectType {
            object: object.to_string(),
            field: field.to_string(),
        });
    }
    Ok(nested)
}

// Only the first element describes the element shape.
fn infer_list(
    object: &str,
    field: &str,
    items: &[Value],
    errors: &mut Vec<SchemaBuildError>,
) -> Result<FieldKind, SchemaBuildError> {
    let first = items.first().ok_or_else(|| SchemaBuildError::EmptySliceType {
        object: object.to_string(),
        field: field.to_string(),
    })?;
    let element = infer_field(object, field, first, errors)?;
    Ok(FieldKind::List(Box::new(element)))
}

fn shape_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
