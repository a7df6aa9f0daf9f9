use crate::error::FilterError;
use crate::query::traversal::{Predicate, GID_FIELD};
use peregrine_common::JsonMap;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    Within { field: String, values: Vec<Value> },
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
}

impl From<FilterExpr> for Predicate {
    fn from(expr: FilterExpr) -> Self {
        match expr {
            FilterExpr::Within { field, values } => Predicate::Within { field, values },
            FilterExpr::And(children) => Predicate::And(children.into_iter().map(Predicate::from).collect()),
            FilterExpr::Or(children) => Predicate::Or(children.into_iter().map(Predicate::from).collect()),
        }
    }
}

/// Result of compiling a client filter.
///
/// `clauses` are applied as successive `has` steps; `errors` lists the
/// fields that were skipped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledFilter {
    pub clauses: Vec<FilterExpr>,
    pub errors: Vec<FilterError>,
}

impl CompiledFilter {
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }
}

pub fn compile_filter(filter: &Value) -> CompiledFilter {
    let mut compiler = FilterCompiler::default();
    match filter {
        Value::Object(map) => {
            for (key, value) in map {
                if key.eq_ignore_ascii_case("and") {
                    // top-level AND flattens into the implicit conjunction
                    let children = compiler.group(key, value);
                    compiler.clauses.extend(children);
                } else {
                    compiler.entry(key, value);
                }
            }
        }
        Value::Null => {}
        other => compiler.reject("filter", format!("expected an object, got {}", other)),
    }

    for error in &compiler.errors {
        tracing::warn!("Skipping filter clause: {}", error);
    }
    CompiledFilter {
        clauses: compiler.clauses,
        errors: compiler.errors,
    }
}

#[derive(Default)]
struct FilterCompiler {
    clauses: Vec<FilterExpr>,
    errors: Vec<FilterError>,
}

impl FilterCompiler {
    fn entry(&mut self, key: &str, value: &Value) {
        if let Some(expr) = self.expr(key, value) {
            self.clauses.push(expr);
        }
    }

    fn expr(&mut self, key: &str, value: &Value) -> Option<FilterExpr> {
        if key.eq_ignore_ascii_case("and") {
            let children = self.group(key, value);
            return conjunction(children);
        }
        if key.eq_ignore_ascii_case("or") {
            let children = self.group(key, value);
            return match children.len() {
                0 => None,
                1 => children.into_iter().next(),
                _ => Some(FilterExpr::Or(children)),
            };
        }
        self.field(key, value)
    }

    /// Children of a combinator, each the conjunction of one filter object.
    fn group(&mut self, key: &str, value: &Value) -> Vec<FilterExpr> {
        let objects: Vec<&JsonMap> = match value {
            Value::Array(items) => {
                let mut objects = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::Object(map) => objects.push(map),
                        other => self.reject(key, format!("combinator element must be an object, got {}", other)),
                    }
                }
                objects
            }
            Value::Object(map) => vec![map],
            other => {
                self.reject(key, format!("combinator value must be a list of objects, got {}", other));
                Vec::new()
            }
        };

        objects
            .into_iter()
            .filter_map(|map| {
                let children: Vec<FilterExpr> = map.iter().filter_map(|(k, v)| self.expr(k, v)).collect();
                conjunction(children)
            })
            .collect()
    }

    fn field(&mut self, key: &str, value: &Value) -> Option<FilterExpr> {
        let field = if key == "id" { GID_FIELD } else { key };
        match value {
            Value::Array(values) if values.is_empty() => {
                self.reject(key, "empty value list".to_string());
                None
            }
            Value::Array(values) if values.len() == 1 => Some(FilterExpr::Within {
                field: field.to_string(),
                values: values.clone(),
            }),
            Value::Array(values) => Some(FilterExpr::Or(
                values
                    .iter()
                    .map(|v| FilterExpr::Within {
                        field: field.to_string(),
                        values: vec![v.clone()],
                    })
                    .collect(),
            )),
            other => {
                self.reject(key, format!("expected a list of values, got {}", other));
                None
            }
        }
    }

    fn reject(&mut self, field: &str, reason: String) {
        self.errors.push(FilterError::InvalidFilterState {
            field: field.to_string(),
            reason,
        });
    }
}

fn conjunction(mut children: Vec<FilterExpr>) -> Option<FilterExpr> {
    match children.len() {
        0 => None,
        1 => children.pop(),
        _ => Some(FilterExpr::And(children)),
    }
}
