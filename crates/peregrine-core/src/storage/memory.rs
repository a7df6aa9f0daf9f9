use super::{GraphLabels, GraphStore};
use crate::query::traversal::{data_key, gid_key, Step, TraversalProgram, TraversalRecord};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use peregrine_common::{Edge, GraphDump, JsonMap, SchemaDocument, SchemaTimestamp, Vertex, VertexSchema};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct GraphData {
    vertices: BTreeMap<String, Vertex>,
    edges: BTreeMap<String, Edge>,
    schema: Option<SchemaDocument>,
    revision: u64,
    timestamp: SchemaTimestamp,
}

impl GraphData {
    fn new() -> Self {
        let mut data = Self::default();
        data.touch_schema();
        data
    }

    fn touch_schema(&mut self) {
        self.revision += 1;
        self.timestamp = format!("{}#{}", Utc::now().to_rfc3339(), self.revision);
    }

    fn insert_edge(&mut self, mut edge: Edge) -> Result<()> {
        if !self.vertices.contains_key(&edge.from) {
            bail!("edge {} source vertex {} not found", edge.label, edge.from);
        }
        if !self.vertices.contains_key(&edge.to) {
            bail!("edge {} destination vertex {} not found", edge.label, edge.to);
        }
        if edge.gid.is_empty() {
            edge.gid = uuid::Uuid::new_v4().to_string();
        }
        self.edges.insert(edge.gid.clone(), edge);
        Ok(())
    }
}

/// In-process graph store. Holds whole graphs in memory and interprets
/// traversal programs directly.
#[derive(Debug, Default)]
pub struct MemoryGraphStore {
    graphs: RwLock<BTreeMap<String, GraphData>>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from graph dumps. Dumps without a schema get one
    /// sampled from their vertices and edges.
    pub fn from_dumps(dumps: Vec<GraphDump>) -> Self {
        let mut graphs = BTreeMap::new();
        for dump in dumps {
            let mut data = GraphData::new();
            for vertex in dump.vertices {
                data.vertices.insert(vertex.gid.clone(), vertex);
            }
            for edge in dump.edges {
                if let Err(e) = data.insert_edge(edge) {
                    tracing::warn!("Skipping edge in dump for graph {}: {}", dump.graph, e);
                }
            }
            let schema = dump
                .schema
                .unwrap_or_else(|| sample_schema(&dump.graph, data.vertices.values(), data.edges.values(), &data.vertices));
            tracing::info!(
                "Loaded graph {} ({} vertices, {} edges, {} vertex labels)",
                dump.graph,
                data.vertices.len(),
                data.edges.len(),
                schema.vertices.len()
            );
            data.schema = Some(schema);
            graphs.insert(dump.graph, data);
        }
        Self {
            graphs: RwLock::new(graphs),
        }
    }

    /// Replace a graph's schema. This is the only write that changes the
    /// schema timestamp.
    pub async fn set_schema(&self, graph: &str, schema: SchemaDocument) -> Result<()> {
        let mut graphs = self.graphs.write().await;
        let data = graphs.get_mut(graph).ok_or_else(|| anyhow!("graph {} not found", graph))?;
        data.schema = Some(schema);
        data.touch_schema();
        Ok(())
    }
}

/// Derive a schema document from stored data: one sample per label, merged
/// over every vertex of that label, plus the distinct edge endpoints.
pub fn sample_schema<'a>(
    graph: &str,
    vertices: impl Iterator<Item = &'a Vertex>,
    edges: impl Iterator<Item = &'a Edge>,
    index: &BTreeMap<String, Vertex>,
) -> SchemaDocument {
    let mut samples: BTreeMap<String, JsonMap> = BTreeMap::new();
    for vertex in vertices {
        let sample = samples.entry(vertex.label.clone()).or_default();
        for (key, value) in &vertex.data {
            if sample.contains_key(key) {
                continue;
            }
            if let Some(tag) = sample_value(value) {
                sample.insert(key.clone(), tag);
            }
        }
    }

    let mut links = BTreeSet::new();
    for edge in edges {
        if let (Some(from), Some(to)) = (index.get(&edge.from), index.get(&edge.to)) {
            links.insert((edge.label.clone(), from.label.clone(), to.label.clone()));
        }
    }

    SchemaDocument {
        graph: graph.to_string(),
        vertices: samples
            .into_iter()
            .map(|(label, data)| VertexSchema { label, data: Some(data) })
            .collect(),
        edges: links
            .into_iter()
            .map(|(label, from, to)| peregrine_common::EdgeSchema { label, from, to })
            .collect(),
    }
}

fn sample_value(value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Bool(_) => Some(Value::String("BOOL".into())),
        Value::Number(_) => Some(Value::String("NUMERIC".into())),
        Value::String(_) => Some(Value::String("STRING".into())),
        Value::Array(items) => {
            if !items.is_empty() && items.iter().all(Value::is_string) {
                return Some(Value::String("STRING_LIST".into()));
            }
            let element = items.iter().find_map(sample_value)?;
            Some(Value::Array(vec![element]))
        }
        Value::Object(map) => {
            let nested: JsonMap = map
                .iter()
                .filter_map(|(k, v)| sample_value(v).map(|tag| (k.clone(), tag)))
                .collect();
            if nested.is_empty() {
                None
            } else {
                Some(Value::Object(nested))
            }
        }
    }
}

#[derive(Clone)]
struct Traveler<'a> {
    current: Option<&'a Vertex>,
    marks: HashMap<String, Option<&'a Vertex>>,
}

fn execute<'a>(data: &'a GraphData, program: &TraversalProgram) -> Result<Vec<TraversalRecord>> {
    let mut steps = program.steps().iter();
    let mut travelers: Vec<Traveler<'a>> = match steps.next() {
        Some(Step::SeedByLabel { label, ids }) => seed(data, label, ids),
        _ => bail!("traversal must start with a seed step"),
    };

    for step in steps {
        match step {
            Step::SeedByLabel { .. } => bail!("seed step is only valid at the start of a traversal"),
            Step::Has { predicate } => travelers.retain(|t| {
                t.current
                    .map_or(false, |v| predicate.matches(&v.gid, &v.label, &v.data))
            }),
            Step::OutNull { edge, label } => {
                travelers = travelers
                    .into_iter()
                    .flat_map(|t| out_null(data, t, edge, label))
                    .collect();
            }
            Step::As { alias } => {
                for t in &mut travelers {
                    t.marks.insert(alias.clone(), t.current);
                }
            }
            Step::Select { alias } => {
                for t in &mut travelers {
                    t.current = *t
                        .marks
                        .get(alias)
                        .ok_or_else(|| anyhow!("select of unknown alias {}", alias))?;
                }
            }
            Step::Skip { n } => {
                travelers = travelers.into_iter().skip(*n as usize).collect();
            }
            Step::Limit { n } => travelers.truncate(*n as usize),
            Step::Render { aliases } => {
                return Ok(travelers.iter().map(|t| render(t, aliases)).collect());
            }
            Step::Count => return Ok(vec![TraversalRecord::Count(travelers.len() as u64)]),
        }
    }
    bail!("traversal must end with a render or count step")
}

fn seed<'a>(data: &'a GraphData, label: &str, ids: &[String]) -> Vec<Traveler<'a>> {
    let start = |v: &'a Vertex| Traveler {
        current: Some(v),
        marks: HashMap::new(),
    };
    if ids.is_empty() {
        data.vertices.values().filter(|v| v.label == label).map(start).collect()
    } else {
        ids.iter()
            .filter_map(|id| data.vertices.get(id))
            .filter(|v| v.label == label)
            .map(start)
            .collect()
    }
}

fn out_null<'a>(data: &'a GraphData, traveler: Traveler<'a>, edge: &str, label: &str) -> Vec<Traveler<'a>> {
    let Some(current) = traveler.current else {
        return vec![traveler];
    };
    let targets: Vec<&'a Vertex> = data
        .edges
        .values()
        .filter(|e| e.from == current.gid && e.label == edge)
        .filter_map(|e| data.vertices.get(&e.to))
        .filter(|v| v.label == label)
        .collect();

    if targets.is_empty() {
        return vec![Traveler {
            current: None,
            marks: traveler.marks,
        }];
    }
    targets
        .into_iter()
        .map(|v| Traveler {
            current: Some(v),
            marks: traveler.marks.clone(),
        })
        .collect()
}

fn render(traveler: &Traveler<'_>, aliases: &[String]) -> TraversalRecord {
    let mut row = JsonMap::new();
    for alias in aliases {
        let marked = traveler.marks.get(alias).copied().flatten();
        let (gid, data) = match marked {
            Some(v) => (v.gid.clone(), v.data.clone()),
            None => (String::new(), JsonMap::new()),
        };
        row.insert(gid_key(alias), Value::String(gid));
        row.insert(data_key(alias), Value::Object(data));
    }
    TraversalRecord::Render(row)
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn get_schema(&self, graph: &str) -> Result<SchemaDocument> {
        let graphs = self.graphs.read().await;
        let data = graphs.get(graph).ok_or_else(|| anyhow!("graph {} not found", graph))?;
        Ok(data.schema.clone().unwrap_or_else(|| SchemaDocument::new(graph)))
    }

    async fn get_timestamp(&self, graph: &str) -> Result<SchemaTimestamp> {
        let graphs = self.graphs.read().await;
        graphs
            .get(graph)
            .map(|data| data.timestamp.clone())
            .ok_or_else(|| anyhow!("graph {} not found", graph))
    }

    async fn run_traversal(&self, graph: &str, program: &TraversalProgram) -> Result<Vec<TraversalRecord>> {
        let graphs = self.graphs.read().await;
        let data = graphs.get(graph).ok_or_else(|| anyhow!("graph {} not found", graph))?;
        let records = execute(data, program)?;
        tracing::debug!("Traversal on {} returned {} records", graph, records.len());
        Ok(records)
    }

    async fn add_vertex(&self, graph: &str, vertex: Vertex) -> Result<()> {
        let mut graphs = self.graphs.write().await;
        let data = graphs.get_mut(graph).ok_or_else(|| anyhow!("graph {} not found", graph))?;
        if vertex.gid.is_empty() {
            bail!("vertex id must not be empty");
        }
        data.vertices.insert(vertex.gid.clone(), vertex);
        Ok(())
    }

    async fn get_vertex(&self, graph: &str, gid: &str) -> Result<Option<Vertex>> {
        let graphs = self.graphs.read().await;
        let data = graphs.get(graph).ok_or_else(|| anyhow!("graph {} not found", graph))?;
        Ok(data.vertices.get(gid).cloned())
    }

    async fn delete_vertex(&self, graph: &str, gid: &str) -> Result<()> {
        let mut graphs = self.graphs.write().await;
        let data = graphs.get_mut(graph).ok_or_else(|| anyhow!("graph {} not found", graph))?;
        if data.vertices.remove(gid).is_none() {
            bail!("vertex {} not found", gid);
        }
        data.edges.retain(|_, e| e.from != gid && e.to != gid);
        Ok(())
    }

    async fn add_edge(&self, graph: &str, edge: Edge) -> Result<()> {
        let mut graphs = self.graphs.write().await;
        let data = graphs.get_mut(graph).ok_or_else(|| anyhow!("graph {} not found", graph))?;
        data.insert_edge(edge)
    }

    async fn get_edge(&self, graph: &str, gid: &str) -> Result<Option<Edge>> {
        let graphs = self.graphs.read().await;
        let data = graphs.get(graph).ok_or_else(|| anyhow!("graph {} not found", graph))?;
        Ok(data.edges.get(gid).cloned())
    }

    async fn delete_edge(&self, graph: &str, gid: &str) -> Result<()> {
        let mut graphs = self.graphs.write().await;
        let data = graphs.get_mut(graph).ok_or_else(|| anyhow!("graph {} not found", graph))?;
        data.edges
            .remove(gid)
            .map(|_| ())
            .ok_or_else(|| anyhow!("edge {} not found", gid))
    }

    async fn list_labels(&self, graph: &str) -> Result<GraphLabels> {
        let graphs = self.graphs.read().await;
        let data = graphs.get(graph).ok_or_else(|| anyhow!("graph {} not found", graph))?;
        let vertex_labels: BTreeSet<&str> = data.vertices.values().map(|v| v.label.as_str()).collect();
        let edge_labels: BTreeSet<&str> = data.edges.values().map(|e| e.label.as_str()).collect();
        Ok(GraphLabels {
            vertex_labels: vertex_labels.into_iter().map(str::to_string).collect(),
            edge_labels: edge_labels.into_iter().map(str::to_string).collect(),
        })
    }

    async fn add_graph(&self, graph: &str) -> Result<()> {
        let mut graphs = self.graphs.write().await;
        if graphs.contains_key(graph) {
            bail!("graph {} already exists", graph);
        }
        graphs.insert(graph.to_string(), GraphData::new());
        tracing::info!("Created graph {}", graph);
        Ok(())
    }

    async fn delete_graph(&self, graph: &str) -> Result<()> {
        let mut graphs = self.graphs.write().await;
        graphs
            .remove(graph)
            .map(|_| ())
            .ok_or_else(|| anyhow!("graph {} not found", graph))
    }

    async fn list_graphs(&self) -> Result<Vec<String>> {
        Ok(self.graphs.read().await.keys().cloned().collect())
    }
}
