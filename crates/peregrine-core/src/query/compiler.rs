use crate::query::filter::{compile_filter, FilterExpr};
use crate::query::traversal::{Predicate, TraversalProgram};
use crate::schema::{Catalog, VertexType};
use peregrine_common::config::AppConfig;
use peregrine_common::JsonMap;
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;

pub const ROOT_ALIAS: &str = "f0";

/// Arguments with compiler-defined meaning; everything else is an equality
/// or membership filter on a vertex property.
pub const RESERVED_ARGUMENTS: [&str; 7] = ["id", "ids", "first", "offset", "accessibility", "sort", "filter"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    pub default_limit: u64,
    pub default_offset: u64,
    /// Vertex property holding the resource path for accessibility filtering.
    pub resource_field: String,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for CompileOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            default_limit: config.query.default_limit,
            default_offset: config.query.default_offset,
            resource_field: config.auth.resource_field.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Accessibility {
    #[default]
    All,
    Accessible,
    Unaccessible,
}

impl Accessibility {
    pub const VARIANTS: [Accessibility; 3] = [Accessibility::All, Accessibility::Accessible, Accessibility::Unaccessible];

    pub fn as_str(&self) -> &'static str {
        match self {
            Accessibility::All => "all",
            Accessibility::Accessible => "accessible",
            Accessibility::Unaccessible => "unaccessible",
        }
    }
}

impl FromStr for Accessibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Accessibility::All),
            "accessible" => Ok(Accessibility::Accessible),
            "unaccessible" => Ok(Accessibility::Unaccessible),
            other => Err(format!("unknown accessibility {}", other)),
        }
    }
}

/// Parsed root-field arguments.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryArgs {
    pub id: Option<String>,
    pub ids: Vec<String>,
    pub first: u64,
    pub offset: u64,
    /// Non-reserved arguments, in sorted order.
    pub filters: BTreeMap<String, Value>,
    pub filter: Vec<FilterExpr>,
    pub accessibility: Accessibility,
    /// Resource paths readable by the caller.
    pub scope: Vec<String>,
}

impl QueryArgs {
    pub fn new(options: &CompileOptions) -> Self {
        Self {
            first: options.default_limit,
            offset: options.default_offset,
            ..Default::default()
        }
    }

    pub fn from_arguments(arguments: &JsonMap, options: &CompileOptions) -> Self {
        let mut args = Self::new(options);
        for (name, value) in arguments {
            if value.is_null() {
                continue;
            }
            match name.as_str() {
                "id" => args.id = value.as_str().map(str::to_string),
                "ids" => {
                    args.ids = value
                        .as_array()
                        .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
                        .unwrap_or_default()
                }
                "first" => args.first = value.as_u64().unwrap_or(options.default_limit),
                "offset" => args.offset = value.as_u64().unwrap_or(options.default_offset),
                "accessibility" => {
                    args.accessibility = value
                        .as_str()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or_default()
                }
                "filter" => args.filter = compile_filter(value).clauses,
                "sort" => tracing::debug!("Ignoring sort argument {}", value),
                _ => {
                    args.filters.insert(name.clone(), value.clone());
                }
            }
        }
        args
    }

    pub fn with_scope(mut self, scope: Vec<String>) -> Self {
        self.scope = scope;
        self
    }

    /// `ids` takes precedence over `id`.
    fn seed_ids(&self) -> Vec<String> {
        if !self.ids.is_empty() {
            self.ids.clone()
        } else {
            self.id.iter().cloned().collect()
        }
    }
}

/// Requested sub-fields of a GraphQL field, by field name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Selection {
    pub name: String,
    pub children: Vec<Selection>,
}

impl Selection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, child: Selection) -> Self {
        self.children.push(child);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderNode {
    pub alias: String,
    pub parent: Option<String>,
    /// Field name under the parent; empty for the root.
    pub field: String,
}

/// Alias forest rooted at `f0`, in creation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderTree {
    nodes: Vec<RenderNode>,
}

impl Default for RenderTree {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderTree {
    pub fn new() -> Self {
        Self {
            nodes: vec![RenderNode {
                alias: ROOT_ALIAS.to_string(),
                parent: None,
                field: String::new(),
            }],
        }
    }

    pub fn mint(&mut self, parent: &str, field: &str) -> String {
        let alias = format!("f{}", self.nodes.len());
        self.nodes.push(RenderNode {
            alias: alias.clone(),
            parent: Some(parent.to_string()),
            field: field.to_string(),
        });
        alias
    }

    pub fn nodes(&self) -> &[RenderNode] {
        &self.nodes
    }

    pub fn aliases(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.alias.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub program: TraversalProgram,
    pub render: RenderTree,
}

/// Compile a root list field and its selection into one traversal.
pub fn compile_query(
    catalog: &Catalog,
    root: &VertexType,
    args: &QueryArgs,
    selection: &Selection,
    options: &CompileOptions,
) -> CompiledQuery {
    let mut program = seeded(root, args, options);
    program.mark(ROOT_ALIAS).skip(args.offset).limit(args.first);

    let mut planner = Planner {
        catalog,
        args,
        program,
        render: RenderTree::new(),
    };
    planner.walk(root, selection, ROOT_ALIAS);

    let Planner { mut program, render, .. } = planner;
    program.render(render.aliases());
    tracing::debug!("Compiled {} query into {} steps", root.name, program.len());

    CompiledQuery { program, render }
}

/// Compile a count field: same seeding and filters, no selection walk.
pub fn compile_count(root: &VertexType, args: &QueryArgs, options: &CompileOptions) -> TraversalProgram {
    let mut program = seeded(root, args, options);
    program.count();
    program
}

fn seeded(root: &VertexType, args: &QueryArgs, options: &CompileOptions) -> TraversalProgram {
    let mut program = TraversalProgram::seed(root.label.clone(), args.seed_ids());

    for (field, value) in &args.filters {
        match value {
            Value::Array(values) if values.is_empty() => {}
            Value::Array(values) => {
                program.has(Predicate::within(field.clone(), values.clone()));
            }
            other => {
                program.has(Predicate::eq(field.clone(), other.clone()));
            }
        }
    }
    for clause in &args.filter {
        program.has(clause.clone().into());
    }

    let scope = || args.scope.iter().cloned().map(Value::String).collect::<Vec<_>>();
    match args.accessibility {
        Accessibility::All => {}
        Accessibility::Accessible => {
            program.has(Predicate::within(options.resource_field.clone(), scope()));
        }
        Accessibility::Unaccessible => {
            program.has(Predicate::without(options.resource_field.clone(), scope()));
        }
    }
    program
}

struct Planner<'a> {
    catalog: &'a Catalog,
    args: &'a QueryArgs,
    program: TraversalProgram,
    render: RenderTree,
}

impl<'a> Planner<'a> {
    fn walk(&mut self, vertex_type: &VertexType, selection: &Selection, current: &str) {
        let catalog = self.catalog;
        let mut moved = false;
        for child in &selection.children {
            let Some(relation) = vertex_type.relations.get(&child.name) else {
                continue;
            };
            let Some(destination) = catalog.get(&relation.destination) else {
                tracing::warn!(
                    "Relationship {}.{} points at unknown type {}",
                    vertex_type.name,
                    child.name,
                    relation.destination
                );
                continue;
            };

            if moved {
                self.program.select(current);
            }
            let alias = self.render.mint(current, &child.name);
            self.program
                .out_null(relation.edge_label.clone(), destination.label.clone())
                .mark(alias.clone())
                .skip(self.args.offset)
                .limit(self.args.first);
            self.walk(destination, child, &alias);
            moved = true;
        }
    }
}
