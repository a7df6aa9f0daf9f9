use peregrine_common::EdgeSchema;
use std::collections::{BTreeMap, BTreeSet};

use super::infer::{type_name, VertexType, ID_FIELD};

/// Relationship field on a source type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationField {
    /// Source GraphQL type name.
    pub source: String,
    pub field: String,
    /// Edge label followed in the store.
    pub edge_label: String,
    /// Destination GraphQL type name.
    pub destination: String,
}

/// Attach relationship fields for every edge whose endpoints both resolved
/// to a type. Returns the number of relationship fields registered.
pub fn link(types: &mut BTreeMap<String, VertexType>, edges: &[EdgeSchema]) -> usize {
    let linkable: Vec<(String, &str, String)> = edges
        .iter()
        .map(|edge| (type_name(&edge.from), edge.label.as_str(), type_name(&edge.to)))
        .filter(|(from, _, to)| types.contains_key(from) && types.contains_key(to))
        .collect();

    // Distinct destinations per (source, edge label).
    let mut destinations: BTreeMap<(&str, &str), BTreeSet<&str>> = BTreeMap::new();
    for (from, label, to) in &linkable {
        destinations
            .entry((from.as_str(), *label))
            .or_default()
            .insert(to.as_str());
    }

    let mut registered = 0;
    for (from, label, to) in &linkable {
        let ambiguous = destinations
            .get(&(from.as_str(), *label))
            .map_or(false, |set| set.len() > 1);
        // the identity field is never shadowed
        let field = if ambiguous || *label == ID_FIELD {
            format!("{}_to_{}", label, to)
        } else {
            label.to_string()
        };

        let Some(source) = types.get_mut(from) else { continue };
        if source.relations.contains_key(&field) {
            continue;
        }
        if source.object.fields.remove(&field).is_some() {
            tracing::warn!(
                "Relationship {}.{} shadows a property field of the same name",
                from,
                field
            );
        }
        source.relations.insert(
            field.clone(),
            RelationField {
                source: from.clone(),
                field,
                edge_label: label.to_string(),
                destination: to.clone(),
            },
        );
        registered += 1;
    }
    registered
}
