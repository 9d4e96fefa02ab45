// src/lib.rs
// DocFlow: a streaming document aggregation pipeline engine

pub mod aggregation;
pub mod cursor;
pub mod dependency;
pub mod document;
pub mod error;
pub mod expression;
pub mod field_path;
pub mod logging;
pub mod query;
pub mod value;

// Public exports
pub use aggregation::accumulator::{Accumulator, AccumulatorOp};
pub use aggregation::stage::{PipelineContext, Stage, StageKind};
pub use aggregation::Pipeline;
pub use cursor::{DocumentCursor, DocumentSink, MemoryCursor, MemorySink};
pub use dependency::{DependencyTracker, Projection};
pub use document::Document;
pub use error::{DocFlowError, Result};
pub use expression::{Expression, OperatorKind};
pub use field_path::FieldPath;
pub use logging::{get_log_level, init_from_env, set_log_level, LogLevel};
pub use query::Query;
pub use value::Value;
