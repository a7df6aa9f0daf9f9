use thiserror::Error;

/// Problems found while inferring a type from a property sample.
///
/// These never fail a schema build: the offending field is dropped and the
/// error is logged and collected in the build report.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaBuildError {
    #[error("{object}.{field}: unsupported field type {tag}")]
    UnsupportedFieldType {
        object: String,
        field: String,
        tag: String,
    },
    #[error("{object}.{field}: nested object has no usable fields")]
    EmptyObjectType { object: String, field: String },
    #[error("{object}.{field}: list sample is empty")]
    EmptySliceType { object: String, field: String },
}

/// A filter argument that cannot be compiled; the offending field is skipped.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("invalid filter state for {field}: {reason}")]
    InvalidFilterState { field: String, reason: String },
}

/// Authorization service failures. Recovered to an empty scope by the cache.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authorization request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("authorization service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to parse authorization mapping: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors surfaced to the caller of the query engine.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("no compiled schema available for graph {graph}")]
    SchemaUnavailable { graph: String },
    #[error("failed to build GraphQL schema for graph {graph}: {reason}")]
    SchemaMaterialization { graph: String, reason: String },
    #[error("store execution failed: {0}")]
    StoreExecution(String),
}

impl QueryError {
    pub fn store(err: anyhow::Error) -> Self {
        QueryError::StoreExecution(format!("{:#}", err))
    }
}
