// Traversal Program - the flattened, store-facing form of a GraphQL query.
// One program per request; never cached because it embeds request arguments.

use peregrine_common::JsonMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Store field holding a vertex identity.
pub const GID_FIELD: &str = "_gid";
/// Store field holding a vertex label.
pub const LABEL_FIELD: &str = "_label";

/// Boolean predicate evaluated against the vertex at the current position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Eq { field: String, value: Value },
    Within { field: String, values: Vec<Value> },
    Without { field: String, values: Vec<Value> },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Predicate::Eq { field: field.into(), value }
    }

    pub fn within(field: impl Into<String>, values: Vec<Value>) -> Self {
        Predicate::Within { field: field.into(), values }
    }

    pub fn without(field: impl Into<String>, values: Vec<Value>) -> Self {
        Predicate::Without { field: field.into(), values }
    }

    /// Evaluate against a vertex. List-valued properties match when any
    /// element matches; numbers compare by value regardless of int/float form.
    pub fn matches(&self, gid: &str, label: &str, data: &JsonMap) -> bool {
        match self {
            Predicate::Eq { field, value } => {
                field_value(gid, label, data, field).map_or(false, |v| value_matches(&v, value))
            }
            Predicate::Within { field, values } => field_value(gid, label, data, field)
                .map_or(false, |v| values.iter().any(|candidate| value_matches(&v, candidate))),
            Predicate::Without { field, values } => field_value(gid, label, data, field)
                .map_or(true, |v| !values.iter().any(|candidate| value_matches(&v, candidate))),
            Predicate::And(children) => children.iter().all(|p| p.matches(gid, label, data)),
            Predicate::Or(children) => children.iter().any(|p| p.matches(gid, label, data)),
            Predicate::Not(inner) => !inner.matches(gid, label, data),
        }
    }
}

fn field_value(gid: &str, label: &str, data: &JsonMap, field: &str) -> Option<Value> {
    match field {
        GID_FIELD => Some(Value::String(gid.to_string())),
        LABEL_FIELD => Some(Value::String(label.to_string())),
        _ => data.get(field).cloned(),
    }
}

fn value_matches(actual: &Value, expected: &Value) -> bool {
    match actual {
        Value::Array(items) => items.iter().any(|item| scalar_eq(item, expected)),
        other => scalar_eq(other, expected),
    }
}

fn scalar_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    /// Start from every vertex with `label`, or only from `ids` when non-empty.
    SeedByLabel { label: String, ids: Vec<String> },
    Has { predicate: Predicate },
    /// Follow outgoing `edge` edges to vertices labelled `label`. A position
    /// with no match continues as an empty sentinel instead of being dropped.
    OutNull { edge: String, label: String },
    As { alias: String },
    Select { alias: String },
    Skip { n: u64 },
    Limit { n: u64 },
    Render { aliases: Vec<String> },
    Count,
}

/// Ordered sequence of traversal steps.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TraversalProgram {
    steps: Vec<Step>,
}

impl TraversalProgram {
    pub fn seed(label: impl Into<String>, ids: Vec<String>) -> Self {
        Self {
            steps: vec![Step::SeedByLabel { label: label.into(), ids }],
        }
    }

    pub fn has(&mut self, predicate: Predicate) -> &mut Self {
        self.steps.push(Step::Has { predicate });
        self
    }

    pub fn out_null(&mut self, edge: impl Into<String>, label: impl Into<String>) -> &mut Self {
        self.steps.push(Step::OutNull { edge: edge.into(), label: label.into() });
        self
    }

    pub fn mark(&mut self, alias: impl Into<String>) -> &mut Self {
        self.steps.push(Step::As { alias: alias.into() });
        self
    }

    pub fn select(&mut self, alias: impl Into<String>) -> &mut Self {
        self.steps.push(Step::Select { alias: alias.into() });
        self
    }

    pub fn skip(&mut self, n: u64) -> &mut Self {
        self.steps.push(Step::Skip { n });
        self
    }

    pub fn limit(&mut self, n: u64) -> &mut Self {
        self.steps.push(Step::Limit { n });
        self
    }

    pub fn render(&mut self, aliases: Vec<String>) -> &mut Self {
        self.steps.push(Step::Render { aliases });
        self
    }

    pub fn count(&mut self) -> &mut Self {
        self.steps.push(Step::Count);
        self
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// One row of traversal output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraversalRecord {
    /// `<alias>_gid` / `<alias>_data` pairs for every rendered alias.
    Render(JsonMap),
    Count(u64),
}

pub fn gid_key(alias: &str) -> String {
    format!("{}_gid", alias)
}

pub fn data_key(alias: &str) -> String {
    format!("{}_data", alias)
}
