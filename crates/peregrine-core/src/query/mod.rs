pub mod compiler;
pub mod filter;
pub mod reconstruct;
pub mod traversal;

pub use compiler::{
    compile_count, compile_query, Accessibility, CompileOptions, CompiledQuery, QueryArgs, RenderNode, RenderTree,
    Selection,
};
pub use filter::{compile_filter, CompiledFilter, FilterExpr};
pub use reconstruct::{reconstruct, reduce_count};
pub use traversal::{Predicate, Step, TraversalProgram, TraversalRecord};
