pub mod auth;
pub mod engine;
pub mod error;
pub mod query;
pub mod schema;
pub mod storage;

pub use auth::{AuthScopeCache, AuthorizationService, HttpAuthorizationService};
pub use engine::{EngineConfig, QueryEngine};
pub use error::{AuthError, FilterError, QueryError, SchemaBuildError};
pub use schema::graphql::RequestScope;
pub use storage::{GraphStore, MemoryGraphStore};

// Re-export common types for convenience
pub use peregrine_common::{Edge, GraphDump, SchemaDocument, Vertex};
