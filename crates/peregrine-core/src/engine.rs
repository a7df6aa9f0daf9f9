use crate::auth::AuthScopeCache;
use crate::error::QueryError;
use crate::query::CompileOptions;
use crate::schema::graphql::RequestScope;
use crate::schema::{CompiledSchema, SchemaCache};
use crate::storage::GraphStore;
use peregrine_common::config::AppConfig;
use peregrine_common::scope::scope_fingerprint;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineConfig {
    pub compile: CompileOptions,
}

impl From<&AppConfig> for EngineConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            compile: CompileOptions::from(config),
        }
    }
}

/// GraphQL entry point over a graph store. Created once at startup and
/// shared by every request handler.
#[derive(Clone)]
pub struct QueryEngine {
    store: Arc<dyn GraphStore>,
    auth: Arc<AuthScopeCache>,
    schemas: Arc<SchemaCache>,
}

impl QueryEngine {
    pub fn new(store: Arc<dyn GraphStore>, auth: Arc<AuthScopeCache>, config: EngineConfig) -> Self {
        let schemas = Arc::new(SchemaCache::new(store.clone(), config.compile));
        Self { store, auth, schemas }
    }

    /// Execute a GraphQL request against `graph` on behalf of `credential`.
    ///
    /// Field-level failures (store errors inside a resolver) come back inside
    /// the response; only a graph with no usable schema fails the call.
    pub async fn query(
        &self,
        graph: &str,
        credential: &str,
        request: async_graphql::Request,
    ) -> Result<async_graphql::Response, QueryError> {
        let (compiled, scope) = self.prepare(graph, credential).await?;
        let request = request.data(scope);
        let response = compiled.schema.execute(request).await;
        if !response.errors.is_empty() {
            tracing::debug!("Query on graph {} finished with {} errors", graph, response.errors.len());
        }
        Ok(response)
    }

    /// Field names per vertex type, as exposed by the compiled schema.
    pub async fn field_mapping(&self, graph: &str, credential: &str) -> Result<BTreeMap<String, Vec<String>>, QueryError> {
        let (compiled, _) = self.prepare(graph, credential).await?;
        Ok(compiled.catalog.field_mapping())
    }

    async fn prepare(&self, graph: &str, credential: &str) -> Result<(Arc<CompiledSchema>, RequestScope), QueryError> {
        let resources = self.auth.lookup(credential).await;
        let fingerprint = scope_fingerprint(&resources);
        let compiled = self.schemas.resolve(graph, &fingerprint).await?;
        Ok((
            compiled,
            RequestScope { resources },
        ))
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    pub fn schema_cache(&self) -> &SchemaCache {
        &self.schemas
    }

    pub fn auth_cache(&self) -> &AuthScopeCache {
        &self.auth
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthorizationService, HttpAuthorizationService, Permission, ResourceMapping};
    use crate::error::AuthError;
    use crate::query::{TraversalProgram, TraversalRecord};
    use crate::storage::{GraphLabels, MemoryGraphStore};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use peregrine_common::{Edge, SchemaDocument, SchemaTimestamp, Vertex};
    use serde_json::{json, Value};
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct StaticAuthorization(Vec<&'static str>);

    #[async_trait]
    impl AuthorizationService for StaticAuthorization {
        async fn resource_mapping(&self, _credential: &str) -> Result<ResourceMapping, AuthError> {
            let read = Permission {
                service: "peregrine".into(),
                method: "read".into(),
            };
            Ok(self.0.iter().map(|p| (p.to_string(), vec![read.clone()])).collect())
        }
    }

    fn auth(paths: Vec<&'static str>) -> Arc<AuthScopeCache> {
        Arc::new(AuthScopeCache::new(
            Arc::new(StaticAuthorization(paths)),
            "peregrine",
            Duration::from_secs(3600),
        ))
    }

    async fn synthea() -> Arc<MemoryGraphStore> {
        let store = Arc::new(MemoryGraphStore::new());
        store.add_graph("synthea").await.unwrap();
        store
            .set_schema(
                "synthea",
                SchemaDocument::new("synthea")
                    .with_vertex(
                        "Patient",
                        json!({"age": "NUMERIC", "project_id": "STRING", "auth_resource_path": "STRING"}),
                    )
                    .with_vertex("Specimen", json!({"kind": "STRING"}))
                    .with_edge("has_sample", "Patient", "Specimen"),
            )
            .await
            .unwrap();

        for (gid, age, project, path) in [
            ("p1", 34, "P1", "/programs/a"),
            ("p2", 51, "P2", "/programs/b"),
            ("p3", 12, "P3", "/programs/c"),
        ] {
            store
                .add_vertex(
                    "synthea",
                    Vertex::new(gid, "Patient", json!({"age": age, "project_id": project, "auth_resource_path": path})),
                )
                .await
                .unwrap();
        }
        store.add_vertex("synthea", Vertex::new("s1", "Specimen", json!({"kind": "blood"}))).await.unwrap();
        store.add_edge("synthea", Edge::new("has_sample", "p1", "s1")).await.unwrap();
        store
    }

    async fn engine_with(store: Arc<MemoryGraphStore>, auth: Arc<AuthScopeCache>) -> QueryEngine {
        QueryEngine::new(store, auth, EngineConfig::default())
    }

    async fn run(engine: &QueryEngine, query: &str) -> Value {
        let response = engine
            .query("synthea", "bearer token", async_graphql::Request::new(query))
            .await
            .unwrap();
        assert!(response.errors.is_empty(), "{:?}", response.errors);
        response.data.into_json().unwrap()
    }

    #[tokio::test]
    async fn test_flat_listing_with_first() {
        let engine = engine_with(synthea().await, auth(vec![])).await;
        let data = run(&engine, "{ patient(first: 2) { id age } }").await;

        let patients = data["patient"].as_array().unwrap();
        assert_eq!(patients.len(), 2);
        for patient in patients {
            assert!(patient["id"].is_string());
            assert!(patient["age"].is_number());
        }
        assert_eq!(patients[0], json!({"id": "p1", "age": 34}));
    }

    #[tokio::test]
    async fn test_missing_relationship_is_empty_list() {
        let engine = engine_with(synthea().await, auth(vec![])).await;
        let data = run(&engine, "{ patient { id specimen: has_sample { id } } }").await;

        assert_eq!(
            data["patient"],
            json!([
                {"id": "p1", "specimen": [{"id": "s1"}]},
                {"id": "p2", "specimen": []},
                {"id": "p3", "specimen": []}
            ])
        );
    }

    #[tokio::test]
    async fn test_filter_argument_or_of_values() {
        let engine = engine_with(synthea().await, auth(vec![])).await;
        let data = run(
            &engine,
            r#"{ patient(filter: {AND: [{project_id: ["P1", "P2"]}]}) { id } }"#,
        )
        .await;

        assert_eq!(data["patient"], json!([{"id": "p1"}, {"id": "p2"}]));

        // conjoined with a plain argument
        let data = run(
            &engine,
            r#"{ patient(age: 51, filter: {AND: [{project_id: ["P1", "P2"]}]}) { id } }"#,
        )
        .await;
        assert_eq!(data["patient"], json!([{"id": "p2"}]));
    }

    #[tokio::test]
    async fn test_authorization_outage_uses_empty_scope() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/mapping"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let service = HttpAuthorizationService::new(
            format!("{}/auth/mapping", mock_server.uri()),
            Duration::from_secs(5),
        );
        let auth = Arc::new(AuthScopeCache::new(Arc::new(service), "peregrine", Duration::from_secs(3600)));
        let engine = engine_with(synthea().await, auth).await;

        let data = run(&engine, "{ all: patient { id } mine: patient(accessibility: accessible) { id } }").await;
        assert_eq!(data["all"].as_array().unwrap().len(), 3);
        assert_eq!(data["mine"], json!([]));
    }

    #[tokio::test]
    async fn test_unchanged_timestamp_does_not_rebuild() {
        let engine = engine_with(synthea().await, auth(vec!["/programs/a"])).await;

        let first = run(&engine, "{ patient { id } }").await;
        let second = run(&engine, "{ patient { id } }").await;
        assert_eq!(first, second);
        assert_eq!(engine.schema_cache().stats().rebuilds, 1);
    }

    #[tokio::test]
    async fn test_schema_change_is_picked_up() {
        let store = synthea().await;
        let engine = engine_with(store.clone(), auth(vec![])).await;
        run(&engine, "{ patient { id } }").await;

        store
            .set_schema(
                "synthea",
                SchemaDocument::new("synthea").with_vertex("Patient", json!({"age": "NUMERIC", "name": "STRING"})),
            )
            .await
            .unwrap();
        store
            .add_vertex("synthea", Vertex::new("p4", "Patient", json!({"name": "Ada"})))
            .await
            .unwrap();

        let data = run(&engine, r#"{ patient(ids: ["p4"]) { id name } }"#).await;
        assert_eq!(data["patient"], json!([{"id": "p4", "name": "Ada"}]));
        assert_eq!(engine.schema_cache().stats().rebuilds, 2);
    }

    #[tokio::test]
    async fn test_accessibility_partitions_by_scope() {
        let engine = engine_with(synthea().await, auth(vec!["/programs/a", "/programs/c"])).await;
        let data = run(
            &engine,
            "{ yes: patient(accessibility: accessible) { id } no: patient(accessibility: unaccessible) { id } }",
        )
        .await;

        assert_eq!(data["yes"], json!([{"id": "p1"}, {"id": "p3"}]));
        assert_eq!(data["no"], json!([{"id": "p2"}]));
    }

    #[tokio::test]
    async fn test_count_and_pagination() {
        let engine = engine_with(synthea().await, auth(vec![])).await;
        let data = run(
            &engine,
            r#"{ _patient_count page: patient(first: 1, offset: 1) { id } some: _patient_count(project_id: ["P1", "P3"]) }"#,
        )
        .await;

        assert_eq!(data["_patient_count"], json!(3));
        assert_eq!(data["page"], json!([{"id": "p2"}]));
        assert_eq!(data["some"], json!(2));
    }

    #[tokio::test]
    async fn test_ids_precedence_and_idempotence() {
        let engine = engine_with(synthea().await, auth(vec![])).await;
        let query = r#"{ patient(id: "p1", ids: ["p3", "p2"]) { id has_sample { kind } } }"#;

        let first = run(&engine, query).await;
        assert_eq!(
            first["patient"],
            json!([{"id": "p3", "has_sample": []}, {"id": "p2", "has_sample": []}])
        );
        assert_eq!(run(&engine, query).await, first);
    }

    #[tokio::test]
    async fn test_field_mapping() {
        let engine = engine_with(synthea().await, auth(vec![])).await;
        let mapping = engine.field_mapping("synthea", "bearer token").await.unwrap();

        assert_eq!(
            mapping["patient"],
            vec!["age", "auth_resource_path", "has_sample", "id", "project_id"]
        );
        assert_eq!(mapping["specimen"], vec!["id", "kind"]);
    }

    #[tokio::test]
    async fn test_unknown_graph_is_unavailable() {
        let engine = engine_with(synthea().await, auth(vec![])).await;
        let result = engine
            .query("nope", "bearer token", async_graphql::Request::new("{ patient { id } }"))
            .await;
        assert!(matches!(result, Err(QueryError::SchemaUnavailable { .. })));
    }

    /// Serves a fixed schema but fails every traversal.
    struct BrokenTraversals(MemoryGraphStore);

    #[async_trait]
    impl GraphStore for BrokenTraversals {
        async fn get_schema(&self, graph: &str) -> Result<SchemaDocument> {
            self.0.get_schema(graph).await
        }
        async fn get_timestamp(&self, graph: &str) -> Result<SchemaTimestamp> {
            self.0.get_timestamp(graph).await
        }
        async fn run_traversal(&self, _graph: &str, _program: &TraversalProgram) -> Result<Vec<TraversalRecord>> {
            Err(anyhow!("connection reset"))
        }
        async fn add_vertex(&self, graph: &str, vertex: Vertex) -> Result<()> {
            self.0.add_vertex(graph, vertex).await
        }
        async fn get_vertex(&self, graph: &str, gid: &str) -> Result<Option<Vertex>> {
            self.0.get_vertex(graph, gid).await
        }
        async fn delete_vertex(&self, graph: &str, gid: &str) -> Result<()> {
            self.0.delete_vertex(graph, gid).await
        }
        async fn add_edge(&self, graph: &str, edge: Edge) -> Result<()> {
            self.0.add_edge(graph, edge).await
        }
        async fn get_edge(&self, graph: &str, gid: &str) -> Result<Option<Edge>> {
            self.0.get_edge(graph, gid).await
        }
        async fn delete_edge(&self, graph: &str, gid: &str) -> Result<()> {
            self.0.delete_edge(graph, gid).await
        }
        async fn list_labels(&self, graph: &str) -> Result<GraphLabels> {
            self.0.list_labels(graph).await
        }
        async fn add_graph(&self, graph: &str) -> Result<()> {
            self.0.add_graph(graph).await
        }
        async fn delete_graph(&self, graph: &str) -> Result<()> {
            self.0.delete_graph(graph).await
        }
        async fn list_graphs(&self) -> Result<Vec<String>> {
            self.0.list_graphs().await
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_a_field_error() {
        let inner = MemoryGraphStore::new();
        inner.add_graph("synthea").await.unwrap();
        inner
            .set_schema("synthea", SchemaDocument::new("synthea").with_vertex("Patient", json!({"age": "NUMERIC"})))
            .await
            .unwrap();
        let engine = QueryEngine::new(Arc::new(BrokenTraversals(inner)), auth(vec![]), EngineConfig::default());

        let response = engine
            .query("synthea", "bearer token", async_graphql::Request::new("{ patient { id } }"))
            .await
            .unwrap();
        assert_eq!(response.errors.len(), 1);
        assert!(response.errors[0].message.contains("connection reset"));
    }
}
