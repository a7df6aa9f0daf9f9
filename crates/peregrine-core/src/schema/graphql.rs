// Second pass of the schema build: catalog descriptors become a dynamic
// GraphQL schema whose root resolvers compile and run traversals.

use crate::error::QueryError;
use crate::query::{
    compile_count, compile_query, reconstruct, reduce_count, Accessibility, CompileOptions, QueryArgs, Selection,
    TraversalProgram, TraversalRecord,
};
use crate::schema::{Catalog, FieldKind, ObjectDescriptor, RelationField, VertexType};
use crate::storage::GraphStore;
use async_graphql::dynamic::{
    Enum, EnumItem, Field, FieldFuture, FieldValue, InputValue, Object, ResolverContext, Scalar, Schema, SchemaError,
    TypeRef,
};
use async_graphql::{Name, SelectionField, Value as GqlValue};
use peregrine_common::JsonMap;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const QUERY_ROOT: &str = "Query";
pub const JSON_SCALAR: &str = "JSON";
pub const ACCESSIBILITY_ENUM: &str = "Accessibility";
pub const VERSION_FIELD: &str = "_schema_version";

/// Resource paths the caller may read, attached to every GraphQL request.
#[derive(Debug, Clone, Default)]
pub struct RequestScope {
    pub resources: Vec<String>,
}

struct Resolution {
    graph: String,
    store: Arc<dyn GraphStore>,
    catalog: Arc<Catalog>,
    options: CompileOptions,
}

impl Resolution {
    fn arguments(&self, ctx: &ResolverContext<'_>) -> async_graphql::Result<QueryArgs> {
        let mut arguments = JsonMap::new();
        for (name, value) in ctx.args.iter() {
            arguments.insert(name.to_string(), value.as_value().clone().into_json()?);
        }
        let scope = ctx
            .ctx
            .data::<RequestScope>()
            .map(|scope| scope.resources.clone())
            .unwrap_or_default();
        Ok(QueryArgs::from_arguments(&arguments, &self.options).with_scope(scope))
    }

    fn vertex_type(&self, type_name: &str) -> async_graphql::Result<&VertexType> {
        self.catalog
            .get(type_name)
            .ok_or_else(|| async_graphql::Error::new(format!("unknown type {}", type_name)))
    }

    async fn run(&self, program: &TraversalProgram) -> async_graphql::Result<Vec<TraversalRecord>> {
        self.store.run_traversal(&self.graph, program).await.map_err(|e| {
            let err = QueryError::store(e);
            tracing::error!("Traversal on graph {} failed: {}", self.graph, err);
            async_graphql::Error::new(err.to_string())
        })
    }
}

/// Build the executable schema for one graph.
pub fn materialize(
    graph: &str,
    version: &str,
    catalog: Arc<Catalog>,
    store: Arc<dyn GraphStore>,
    options: CompileOptions,
) -> Result<Schema, SchemaError> {
    let shared = Arc::new(Resolution {
        graph: graph.to_string(),
        store,
        catalog: catalog.clone(),
        options,
    });

    let mut query = Object::new(QUERY_ROOT).field(version_field(version));
    for vertex_type in catalog.types.values() {
        query = query
            .field(list_field(&shared, vertex_type))
            .field(count_field(&shared, vertex_type));
    }

    // Object types by name; the first definition of a name wins.
    let mut descriptors: BTreeMap<&str, &ObjectDescriptor> = catalog
        .types
        .values()
        .map(|vertex_type| (vertex_type.object.name.as_str(), &vertex_type.object))
        .collect();
    for vertex_type in catalog.types.values() {
        for nested in vertex_type.object.nested() {
            let existing = descriptors.get(nested.name.as_str()).copied();
            match existing {
                None => {
                    descriptors.insert(nested.name.as_str(), nested);
                }
                Some(existing) if existing == nested => {}
                Some(_) => tracing::warn!(
                    "Object type {} is defined twice with different fields, keeping the first",
                    nested.name
                ),
            }
        }
    }

    let no_relations = BTreeMap::new();
    let objects: Vec<Object> = descriptors
        .values()
        .map(|descriptor| {
            let relations = catalog
                .types
                .get(&descriptor.name)
                .map_or(&no_relations, |vertex_type| &vertex_type.relations);
            object_type(descriptor, relations, &descriptors)
        })
        .collect();

    let accessibility = Accessibility::VARIANTS
        .iter()
        .fold(Enum::new(ACCESSIBILITY_ENUM), |e, a| e.item(EnumItem::new(a.as_str())));

    let mut builder = Schema::build(QUERY_ROOT, None, None)
        .register(Scalar::new(JSON_SCALAR))
        .register(accessibility)
        .register(query);
    for object in objects {
        builder = builder.register(object);
    }
    builder.finish()
}

fn version_field(version: &str) -> Field {
    let version = version.to_string();
    Field::new(VERSION_FIELD, TypeRef::named_nn(TypeRef::STRING), move |_| {
        let version = version.clone();
        FieldFuture::new(async move { Ok(Some(FieldValue::value(version))) })
    })
}

fn list_field(shared: &Arc<Resolution>, vertex_type: &VertexType) -> Field {
    let resolution = shared.clone();
    let type_name = vertex_type.name.clone();
    let field = Field::new(&vertex_type.name, TypeRef::named_list(&vertex_type.name), move |ctx| {
        let shared = resolution.clone();
        let type_name = type_name.clone();
        FieldFuture::new(async move {
            let root = shared.vertex_type(&type_name)?;
            let args = shared.arguments(&ctx)?;
            let selection = selection_of(ctx.ctx.field());
            let compiled = compile_query(&shared.catalog, root, &args, &selection, &shared.options);
            let records = shared.run(&compiled.program).await?;
            let rows = reconstruct(&compiled.render, &records);
            Ok(Some(FieldValue::list(rows.into_iter().map(FieldValue::owned_any))))
        })
    });

    let field = field
        .argument(InputValue::new("id", TypeRef::named(TypeRef::STRING)))
        .argument(InputValue::new("ids", TypeRef::named_list(TypeRef::STRING)))
        .argument(
            InputValue::new("first", TypeRef::named(TypeRef::INT))
                .default_value(GqlValue::Number(shared.options.default_limit.into())),
        )
        .argument(
            InputValue::new("offset", TypeRef::named(TypeRef::INT))
                .default_value(GqlValue::Number(shared.options.default_offset.into())),
        )
        .argument(InputValue::new("sort", TypeRef::named(JSON_SCALAR)));
    let field = common_arguments(field);

    vertex_type
        .object
        .fields
        .iter()
        .filter(|(name, kind)| kind.is_argument() && !is_builtin_argument(name))
        .fold(field, |field, (name, kind)| field.argument(InputValue::new(name, type_ref(kind))))
}

fn count_field(shared: &Arc<Resolution>, vertex_type: &VertexType) -> Field {
    let resolution = shared.clone();
    let type_name = vertex_type.name.clone();
    let field = Field::new(
        format!("_{}_count", vertex_type.name),
        TypeRef::named_nn(TypeRef::INT),
        move |ctx| {
            let shared = resolution.clone();
            let type_name = type_name.clone();
            FieldFuture::new(async move {
                let root = shared.vertex_type(&type_name)?;
                let args = shared.arguments(&ctx)?;
                let program = compile_count(root, &args, &shared.options);
                let records = shared.run(&program).await?;
                let total = reduce_count(&records);
                Ok(Some(FieldValue::value(GqlValue::Number(total.into()))))
            })
        },
    );
    common_arguments(field)
}

fn common_arguments(field: Field) -> Field {
    field
        .argument(InputValue::new("project_id", TypeRef::named_list(TypeRef::STRING)))
        .argument(InputValue::new("filter", TypeRef::named(JSON_SCALAR)))
        .argument(
            InputValue::new("accessibility", TypeRef::named(ACCESSIBILITY_ENUM))
                .default_value(GqlValue::Enum(Name::new(Accessibility::All.as_str()))),
        )
}

fn is_builtin_argument(name: &str) -> bool {
    name == "project_id" || crate::query::compiler::RESERVED_ARGUMENTS.contains(&name)
}

fn selection_of(field: SelectionField<'_>) -> Selection {
    Selection {
        name: field.name().to_string(),
        children: field.selection_set().map(selection_of).collect(),
    }
}

fn object_type(
    descriptor: &ObjectDescriptor,
    relations: &BTreeMap<String, RelationField>,
    descriptors: &BTreeMap<&str, &ObjectDescriptor>,
) -> Object {
    let object = descriptor
        .fields
        .iter()
        .filter(|(name, _)| !relations.contains_key(*name))
        .filter(|(name, kind)| match referenced_object(kind) {
            Some(nested) if descriptors.get(nested.name.as_str()).map_or(false, |d| *d != nested) => {
                tracing::warn!(
                    "Dropping field {}.{}: type name {} is taken by another shape",
                    descriptor.name,
                    name,
                    nested.name
                );
                false
            }
            _ => true,
        })
        .fold(Object::new(&descriptor.name), |object, (name, kind)| {
            object.field(property_field(name, kind))
        });
    relations
        .values()
        .fold(object, |object, relation| object.field(relation_field(relation)))
}

fn referenced_object(kind: &FieldKind) -> Option<&ObjectDescriptor> {
    match kind {
        FieldKind::Object(object) => Some(object),
        FieldKind::List(inner) => referenced_object(inner),
        _ => None,
    }
}

fn type_ref(kind: &FieldKind) -> TypeRef {
    match kind {
        FieldKind::Numeric => TypeRef::named(TypeRef::FLOAT),
        FieldKind::String => TypeRef::named(TypeRef::STRING),
        FieldKind::Bool => TypeRef::named(TypeRef::BOOLEAN),
        FieldKind::StringList => TypeRef::named_list(TypeRef::STRING),
        FieldKind::Object(object) => TypeRef::named(&object.name),
        FieldKind::List(inner) => TypeRef::List(Box::new(type_ref(inner))),
    }
}

fn property_field(name: &str, kind: &FieldKind) -> Field {
    let key = name.to_string();
    let kind = Arc::new(kind.clone());
    Field::new(name, type_ref(&kind), move |ctx| {
        let key = key.clone();
        let kind = kind.clone();
        FieldFuture::new(async move {
            let parent = ctx.parent_value.try_downcast_ref::<JsonMap>()?;
            Ok(parent.get(&key).and_then(|value| field_value(&kind, value)))
        })
    })
}

fn relation_field(relation: &RelationField) -> Field {
    let key = relation.field.clone();
    Field::new(&relation.field, TypeRef::named_list(&relation.destination), move |ctx| {
        let key = key.clone();
        FieldFuture::new(async move {
            let parent = ctx.parent_value.try_downcast_ref::<JsonMap>()?;
            let children: Vec<FieldValue> = match parent.get(&key) {
                Some(Value::Array(items)) => items
                    .iter()
                    .filter_map(|item| item.as_object().cloned())
                    .map(FieldValue::owned_any)
                    .collect(),
                _ => Vec::new(),
            };
            Ok(Some(FieldValue::list(children)))
        })
    })
}

/// Convert a stored JSON value to the declared kind. Values of the wrong
/// shape resolve to null.
fn field_value(kind: &FieldKind, value: &Value) -> Option<FieldValue<'static>> {
    match (kind, value) {
        (_, Value::Null) => None,
        (FieldKind::Object(_), Value::Object(map)) => Some(FieldValue::owned_any(map.clone())),
        (FieldKind::List(inner), Value::Array(items)) => Some(FieldValue::list(
            items
                .iter()
                .map(|item| field_value(inner, item).unwrap_or(FieldValue::NULL)),
        )),
        (FieldKind::StringList, Value::Array(items)) => Some(FieldValue::list(
            items
                .iter()
                .map(|item| scalar(&FieldKind::String, item).map_or(FieldValue::NULL, FieldValue::value)),
        )),
        (FieldKind::StringList, single) => {
            scalar(&FieldKind::String, single).map(|v| FieldValue::list(vec![FieldValue::value(v)]))
        }
        (FieldKind::Object(_) | FieldKind::List(_), _) => None,
        (kind, value) => scalar(kind, value).map(FieldValue::value),
    }
}

fn scalar(kind: &FieldKind, value: &Value) -> Option<GqlValue> {
    match (kind, value) {
        (FieldKind::Numeric, Value::Number(n)) => Some(GqlValue::Number(n.clone())),
        (FieldKind::Numeric, Value::String(s)) => s
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(GqlValue::Number),
        (FieldKind::String, Value::String(s)) => Some(GqlValue::String(s.clone())),
        (FieldKind::String, Value::Number(n)) => Some(GqlValue::String(n.to_string())),
        (FieldKind::String, Value::Bool(b)) => Some(GqlValue::String(b.to_string())),
        (FieldKind::Bool, Value::Bool(b)) => Some(GqlValue::Boolean(*b)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryGraphStore;
    use peregrine_common::{Edge, SchemaDocument, Vertex};
    use serde_json::json;

    async fn fixture() -> (Arc<MemoryGraphStore>, Schema) {
        let store = Arc::new(MemoryGraphStore::new());
        store.add_graph("g").await.unwrap();
        store
            .add_vertex(
                "g",
                Vertex::new(
                    "p1",
                    "Patient",
                    json!({"age": 30, "alive": true, "aliases": ["x"], "address": {"city": "Oslo"}}),
                ),
            )
            .await
            .unwrap();
        store.add_vertex("g", Vertex::new("s1", "Specimen", json!({"kind": "blood"}))).await.unwrap();
        store.add_edge("g", Edge::new("has_sample", "p1", "s1")).await.unwrap();

        let doc = SchemaDocument::new("g")
            .with_vertex(
                "Patient",
                json!({"age": "NUMERIC", "alive": "BOOL", "aliases": "STRING_LIST", "address": {"city": "STRING"}}),
            )
            .with_vertex("Specimen", json!({"kind": "STRING"}))
            .with_edge("has_sample", "Patient", "Specimen");
        let catalog = Arc::new(Catalog::build(&doc));
        let schema = materialize("g", "v1", catalog, store.clone(), CompileOptions::default()).unwrap();
        (store, schema)
    }

    #[tokio::test]
    async fn test_materialized_schema_resolves_nested_values() {
        let (_store, schema) = fixture().await;
        let response = schema
            .execute(
                "{ patient { id age alive aliases address { city } has_sample { id kind } } _schema_version }",
            )
            .await;

        assert!(response.errors.is_empty(), "{:?}", response.errors);
        let data = response.data.into_json().unwrap();
        assert_eq!(
            data,
            json!({
                "patient": [{
                    "id": "p1",
                    "age": 30,
                    "alive": true,
                    "aliases": ["x"],
                    "address": {"city": "Oslo"},
                    "has_sample": [{"id": "s1", "kind": "blood"}]
                }],
                "_schema_version": "v1"
            })
        );
    }

    #[tokio::test]
    async fn test_count_field() {
        let (_store, schema) = fixture().await;
        let response = schema.execute("{ _patient_count _specimen_count }").await;

        assert!(response.errors.is_empty(), "{:?}", response.errors);
        assert_eq!(
            response.data.into_json().unwrap(),
            json!({"_patient_count": 1, "_specimen_count": 1})
        );
    }

    #[tokio::test]
    async fn test_unknown_field_is_a_validation_error() {
        let (_store, schema) = fixture().await;
        let response = schema.execute("{ patient { nope } }").await;
        assert!(!response.errors.is_empty());
    }

    #[tokio::test]
    async fn test_edge_labelled_id_keeps_identity() {
        let store = Arc::new(MemoryGraphStore::new());
        store.add_graph("g").await.unwrap();
        store.add_vertex("g", Vertex::new("p1", "Patient", json!({"age": 3}))).await.unwrap();
        store.add_vertex("g", Vertex::new("s1", "Specimen", json!({"kind": "blood"}))).await.unwrap();
        store.add_edge("g", Edge::new("id", "p1", "s1")).await.unwrap();

        let doc = SchemaDocument::new("g")
            .with_vertex("Patient", json!({"age": "NUMERIC"}))
            .with_vertex("Specimen", json!({"kind": "STRING"}))
            .with_edge("id", "Patient", "Specimen");
        let catalog = Arc::new(Catalog::build(&doc));
        let schema = materialize("g", "v1", catalog, store, CompileOptions::default()).unwrap();

        let response = schema.execute("{ patient { id id_to_specimen { id kind } } }").await;
        assert!(response.errors.is_empty(), "{:?}", response.errors);
        assert_eq!(
            response.data.into_json().unwrap(),
            json!({"patient": [{"id": "p1", "id_to_specimen": [{"id": "s1", "kind": "blood"}]}]})
        );
    }

    #[tokio::test]
    async fn test_conflicting_nested_type_names_keep_first() {
        let store = Arc::new(MemoryGraphStore::new());
        store.add_graph("g").await.unwrap();
        store
            .add_vertex("g", Vertex::new("p1", "Patient", json!({"a": {"b": {"y": 1}}, "a_b": {"x": "q"}})))
            .await
            .unwrap();

        // `a.b` and `a_b` both name a `patient_a_b` type
        let doc = SchemaDocument::new("g").with_vertex(
            "Patient",
            json!({"a": {"b": {"y": "NUMERIC"}}, "a_b": {"x": "STRING"}}),
        );
        let catalog = Arc::new(Catalog::build(&doc));
        let schema = materialize("g", "v1", catalog, store, CompileOptions::default()).unwrap();

        let response = schema.execute("{ patient { id a { b { y } } } }").await;
        assert!(response.errors.is_empty(), "{:?}", response.errors);
        assert_eq!(
            response.data.into_json().unwrap(),
            json!({"patient": [{"id": "p1", "a": {"b": {"y": 1}}}]})
        );

        let response = schema.execute("{ patient { a_b { x } } }").await;
        assert!(!response.errors.is_empty());
    }

    #[test]
    fn test_scalar_coercion() {
        assert_eq!(scalar(&FieldKind::String, &json!(3)), Some(GqlValue::String("3".into())));
        assert_eq!(scalar(&FieldKind::Bool, &json!("yes")), None);
        assert!(scalar(&FieldKind::Numeric, &json!("2.5")).is_some());
        assert!(field_value(&FieldKind::Object(ObjectDescriptor::default()), &json!("flat")).is_none());
    }
}
