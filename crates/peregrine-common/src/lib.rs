use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

pub mod config;
pub mod scope;

/// JSON object used for vertex/edge payloads and property sample maps.
pub type JsonMap = Map<String, Value>;

/// Marker of the last schema mutation of a graph, as reported by the store.
pub type SchemaTimestamp = String;

/// Stored description of a graph: vertex labels with a sample of their
/// property shapes, and the edge labels connecting them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SchemaDocument {
    pub graph: String,
    #[serde(default)]
    pub vertices: Vec<VertexSchema>,
    #[serde(default)]
    pub edges: Vec<EdgeSchema>,
}

/// One vertex label and its property sample.
///
/// Sample values are either a type tag (`"STRING"`, `"NUMERIC"`, ...), a nested
/// sample map, or a list whose first element describes the element shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VertexSchema {
    pub label: String,
    #[serde(default)]
    pub data: Option<JsonMap>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EdgeSchema {
    pub label: String,
    pub from: String,
    pub to: String,
}

impl SchemaDocument {
    pub fn new(graph: impl Into<String>) -> Self {
        Self {
            graph: graph.into(),
            vertices: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn with_vertex(mut self, label: impl Into<String>, data: Value) -> Self {
        let data = match data {
            Value::Object(map) => Some(map),
            _ => None,
        };
        self.vertices.push(VertexSchema { label: label.into(), data });
        self
    }

    pub fn with_edge(mut self, label: impl Into<String>, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.push(EdgeSchema {
            label: label.into(),
            from: from.into(),
            to: to.into(),
        });
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Vertex {
    pub gid: String,
    pub label: String,
    #[serde(default)]
    pub data: JsonMap,
}

impl Vertex {
    pub fn new(gid: impl Into<String>, label: impl Into<String>, data: Value) -> Self {
        Self {
            gid: gid.into(),
            label: label.into(),
            data: match data {
                Value::Object(map) => map,
                _ => JsonMap::new(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Edge {
    #[serde(default)]
    pub gid: String,
    pub label: String,
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub data: JsonMap,
}

impl Edge {
    /// New edge with a generated id.
    pub fn new(label: impl Into<String>, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            gid: Uuid::new_v4().to_string(),
            label: label.into(),
            from: from.into(),
            to: to.into(),
            data: JsonMap::new(),
        }
    }
}

/// Full contents of one graph, used to seed a store from disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphDump {
    pub graph: String,
    #[serde(default)]
    pub schema: Option<SchemaDocument>,
    #[serde(default)]
    pub vertices: Vec<Vertex>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

#[derive(Debug, Error)]
pub enum DumpError {
    #[error("failed to read graph dump: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse graph dump: {0}")]
    Parse(#[from] serde_json::Error),
}

impl GraphDump {
    /// Load a JSON file holding an array of graph dumps.
    pub fn load_all(path: impl AsRef<Path>) -> Result<Vec<GraphDump>, DumpError> {
        let raw = std::fs::read_to_string(path)?;
        let dumps = serde_json::from_str(&raw)?;
        Ok(dumps)
    }
}
