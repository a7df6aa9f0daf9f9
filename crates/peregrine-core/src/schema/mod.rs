pub mod cache;
pub mod graphql;
pub mod infer;
pub mod linker;

pub use cache::{CompiledSchema, SchemaCache};
pub use infer::{type_name, FieldKind, ObjectDescriptor, VertexType};
pub use linker::RelationField;

use crate::error::SchemaBuildError;
use peregrine_common::SchemaDocument;
use std::collections::BTreeMap;

/// Queryable vertex types of one graph, keyed by GraphQL type name.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub types: BTreeMap<String, VertexType>,
    /// Fields dropped during inference.
    pub errors: Vec<SchemaBuildError>,
}

impl Catalog {
    /// First pass of the schema build: inference, then relationship linking.
    pub fn build(doc: &SchemaDocument) -> Self {
        let mut errors = Vec::new();
        let mut types = BTreeMap::new();

        for vertex in &doc.vertices {
            let Some(vertex_type) = infer::infer_vertex(vertex, &mut errors) else {
                tracing::debug!("Vertex label {} has no property sample, skipping", vertex.label);
                continue;
            };
            if let Some(previous) = types.insert(vertex_type.name.clone(), vertex_type) {
                tracing::warn!(
                    "Vertex label {} maps to an existing type name {}, keeping the later one",
                    previous.label,
                    previous.name
                );
            }
        }

        let relations = linker::link(&mut types, &doc.edges);
        tracing::debug!(
            "Catalog for graph {}: {} types, {} relationships, {} dropped fields",
            doc.graph,
            types.len(),
            relations,
            errors.len()
        );

        Self { types, errors }
    }

    pub fn get(&self, type_name: &str) -> Option<&VertexType> {
        self.types.get(type_name)
    }

    pub fn relation(&self, type_name: &str, field: &str) -> Option<&RelationField> {
        self.types.get(type_name)?.relations.get(field)
    }

    /// Sorted field names of every type.
    pub fn field_mapping(&self) -> BTreeMap<String, Vec<String>> {
        self.types
            .iter()
            .map(|(name, vertex_type)| (name.clone(), vertex_type.field_names()))
            .collect()
    }
}
