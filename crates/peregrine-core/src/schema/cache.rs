// Schema Cache - one compiled GraphQL schema per graph, rebuilt when the
// store's schema timestamp or the caller's authorization scope changes.

use super::graphql::materialize;
use super::Catalog;
use crate::error::QueryError;
use crate::query::CompileOptions;
use crate::storage::GraphStore;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use peregrine_common::SchemaTimestamp;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Immutable build result; replaced wholesale on rebuild.
pub struct CompiledSchema {
    pub graph: String,
    pub version: SchemaTimestamp,
    pub scope_fingerprint: String,
    pub catalog: Arc<Catalog>,
    pub schema: async_graphql::dynamic::Schema,
    pub built_at: DateTime<Utc>,
}

impl CompiledSchema {
    fn is_fresh(&self, version: &str, scope_fingerprint: &str) -> bool {
        self.version == version && self.scope_fingerprint == scope_fingerprint
    }
}

#[derive(Default)]
struct GraphSlot {
    current: RwLock<Option<Arc<CompiledSchema>>>,
    rebuild: Mutex<()>,
}

impl GraphSlot {
    async fn current(&self) -> Option<Arc<CompiledSchema>> {
        self.current.read().await.clone()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchemaCacheStats {
    pub graphs: usize,
    pub hits: u64,
    pub rebuilds: u64,
}

pub struct SchemaCache {
    store: Arc<dyn GraphStore>,
    options: CompileOptions,
    slots: DashMap<String, Arc<GraphSlot>>,
    hits: AtomicU64,
    rebuilds: AtomicU64,
}

impl SchemaCache {
    pub fn new(store: Arc<dyn GraphStore>, options: CompileOptions) -> Self {
        Self {
            store,
            options,
            slots: DashMap::new(),
            hits: AtomicU64::new(0),
            rebuilds: AtomicU64::new(0),
        }
    }

    /// Current schema for `graph`, rebuilding it first when stale.
    ///
    /// A failed rebuild keeps serving the previous schema; with no previous
    /// schema the graph is unavailable.
    pub async fn resolve(&self, graph: &str, scope_fingerprint: &str) -> Result<Arc<CompiledSchema>, QueryError> {
        let slot = self.slot(graph);

        let version = match self.store.get_timestamp(graph).await {
            Ok(version) => version,
            Err(e) => {
                tracing::error!("Failed to read schema timestamp for graph {}: {:#}", graph, e);
                return self.stale_or_unavailable(graph, &slot).await;
            }
        };

        if let Some(current) = slot.current().await {
            if current.is_fresh(&version, scope_fingerprint) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Schema cache HIT for graph {} ({})", graph, version);
                return Ok(current);
            }
        }

        let _rebuilding = slot.rebuild.lock().await;
        // another request may have finished the same rebuild while we waited
        if let Some(current) = slot.current().await {
            if current.is_fresh(&version, scope_fingerprint) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(current);
            }
        }

        match self.build(graph, &version, scope_fingerprint).await {
            Ok(compiled) => {
                let compiled = Arc::new(compiled);
                *slot.current.write().await = Some(compiled.clone());
                self.rebuilds.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    "Rebuilt GraphQL schema for graph {} at version {} ({} types)",
                    graph,
                    version,
                    compiled.catalog.types.len()
                );
                Ok(compiled)
            }
            Err(e) => {
                tracing::error!("Schema rebuild failed: {}", e);
                self.stale_or_unavailable(graph, &slot).await
            }
        }
    }

    async fn build(&self, graph: &str, version: &str, scope_fingerprint: &str) -> Result<CompiledSchema, QueryError> {
        let doc = self.store.get_schema(graph).await.map_err(QueryError::store)?;
        let catalog = Arc::new(Catalog::build(&doc));
        for error in &catalog.errors {
            tracing::warn!("Graph {}: {}", graph, error);
        }

        let schema = materialize(graph, version, catalog.clone(), self.store.clone(), self.options.clone())
            .map_err(|e| QueryError::SchemaMaterialization {
                graph: graph.to_string(),
                reason: e.to_string(),
            })?;

        Ok(CompiledSchema {
            graph: graph.to_string(),
            version: version.to_string(),
            scope_fingerprint: scope_fingerprint.to_string(),
            catalog,
            schema,
            built_at: Utc::now(),
        })
    }

    async fn stale_or_unavailable(&self, graph: &str, slot: &GraphSlot) -> Result<Arc<CompiledSchema>, QueryError> {
        match slot.current().await {
            Some(previous) => {
                tracing::warn!("Serving previous schema for graph {} (version {})", graph, previous.version);
                Ok(previous)
            }
            None => {
                // never built: drop the slot so unknown graph names don't accumulate
                self.slots.remove(graph);
                Err(QueryError::SchemaUnavailable {
                    graph: graph.to_string(),
                })
            }
        }
    }

    fn slot(&self, graph: &str) -> Arc<GraphSlot> {
        self.slots
            .entry(graph.to_string())
            .or_insert_with(|| Arc::new(GraphSlot::default()))
            .value()
            .clone()
    }

    /// Drop the compiled schema so the next request rebuilds it.
    pub fn invalidate(&self, graph: &str) -> bool {
        let removed = self.slots.remove(graph).is_some();
        if removed {
            tracing::info!("Invalidated schema cache for graph {}", graph);
        }
        removed
    }

    /// Every schema currently built, ordered by graph name.
    pub async fn compiled(&self) -> Vec<Arc<CompiledSchema>> {
        let slots: Vec<Arc<GraphSlot>> = self.slots.iter().map(|slot| slot.value().clone()).collect();
        let mut compiled = Vec::with_capacity(slots.len());
        for slot in slots {
            if let Some(current) = slot.current().await {
                compiled.push(current);
            }
        }
        compiled.sort_by(|a, b| a.graph.cmp(&b.graph));
        compiled
    }

    pub fn stats(&self) -> SchemaCacheStats {
        SchemaCacheStats {
            graphs: self.slots.len(),
            hits: self.hits.load(Ordering::Relaxed),
            rebuilds: self.rebuilds.load(Ordering::Relaxed),
        }
    }
}
