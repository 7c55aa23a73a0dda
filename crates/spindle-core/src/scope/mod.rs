//! Execution scope: deadline resolution, per-attempt context, cancellation.

pub mod context;
pub mod deadline;
pub mod registry;

pub use context::{CancelHandle, TaskContext, TaskMetadata, create_scope};
pub use deadline::resolve;
pub use registry::{CancellationRegistry, Registration};
