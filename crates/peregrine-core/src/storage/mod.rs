pub mod memory;

pub use memory::MemoryGraphStore;

use crate::query::{TraversalProgram, TraversalRecord};
use anyhow::Result;
use async_trait::async_trait;
use peregrine_common::{Edge, SchemaDocument, SchemaTimestamp, Vertex};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphLabels {
    pub vertex_labels: Vec<String>,
    pub edge_labels: Vec<String>,
}

/// Capability the query engine needs from a graph database.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn get_schema(&self, graph: &str) -> Result<SchemaDocument>;

    /// Marker that changes whenever the graph's schema changes.
    async fn get_timestamp(&self, graph: &str) -> Result<SchemaTimestamp>;

    /// Execute a traversal program; the result is fully materialized.
    async fn run_traversal(&self, graph: &str, program: &TraversalProgram) -> Result<Vec<TraversalRecord>>;

    async fn add_vertex(&self, graph: &str, vertex: Vertex) -> Result<()>;
    async fn get_vertex(&self, graph: &str, gid: &str) -> Result<Option<Vertex>>;
    async fn delete_vertex(&self, graph: &str, gid: &str) -> Result<()>;

    async fn add_edge(&self, graph: &str, edge: Edge) -> Result<()>;
    async fn get_edge(&self, graph: &str, gid: &str) -> Result<Option<Edge>>;
    async fn delete_edge(&self, graph: &str, gid: &str) -> Result<()>;

    async fn list_labels(&self, graph: &str) -> Result<GraphLabels>;

    async fn add_graph(&self, graph: &str) -> Result<()>;
    async fn delete_graph(&self, graph: &str) -> Result<()>;
    async fn list_graphs(&self) -> Result<Vec<String>>;
}
