use crate::query::compiler::RenderTree;
use crate::query::traversal::{data_key, gid_key, TraversalRecord};
use peregrine_common::JsonMap;
use serde_json::Value;
use std::collections::HashMap;

/// Rebuild one nested object per render record.
pub fn reconstruct(tree: &RenderTree, records: &[TraversalRecord]) -> Vec<JsonMap> {
    let mut out = Vec::with_capacity(records.len());
    for record in records {
        let TraversalRecord::Render(row) = record else {
            tracing::debug!("Ignoring non-render record during reconstruction");
            continue;
        };
        match reconstruct_row(tree, row) {
            Some(object) => out.push(object),
            None => tracing::debug!("Skipping record without a root vertex"),
        }
    }
    out
}

fn reconstruct_row(tree: &RenderTree, row: &JsonMap) -> Option<JsonMap> {
    let mut present: HashMap<&str, JsonMap> = HashMap::new();
    for node in tree.nodes() {
        let gid = row.get(&gid_key(&node.alias)).and_then(Value::as_str).unwrap_or("");
        if gid.is_empty() {
            continue;
        }
        let mut data = match row.get(&data_key(&node.alias)) {
            Some(Value::Object(map)) => map.clone(),
            _ => JsonMap::new(),
        };
        data.insert("id".to_string(), Value::String(gid.to_string()));
        present.insert(node.alias.as_str(), data);
    }

    // A present parent always carries its relationship fields, even when the hop found nothing.
    for node in tree.nodes() {
        let Some(parent) = node.parent.as_deref() else { continue };
        if let Some(parent_data) = present.get_mut(parent) {
            parent_data.insert(node.field.clone(), Value::Array(Vec::new()));
        }
    }

    // Children were minted after their parents, so folding in reverse
    // completes every subtree before it is attached.
    for node in tree.nodes().iter().rev() {
        let Some(parent) = node.parent.as_deref() else { continue };
        let Some(child) = present.remove(node.alias.as_str()) else { continue };
        if let Some(parent_data) = present.get_mut(parent) {
            parent_data.insert(node.field.clone(), Value::Array(vec![Value::Object(child)]));
        }
    }

    let root = tree.nodes().first()?;
    present.remove(root.alias.as_str())
}

/// Total of the count records; zero when the store returned none.
pub fn reduce_count(records: &[TraversalRecord]) -> u64 {
    records
        .iter()
        .map(|record| match record {
            TraversalRecord::Count(n) => *n,
            TraversalRecord::Render(_) => 0,
        })
        .sum()
}
