//! Task Record Store.
//!
//! One `Task` per media item under analysis. Records live in an owned arena
//! (`TaskStore`) keyed by `TaskId` and change only through `TaskStore::apply`,
//! which runs the pure `reduce` step over the previous record. The scheduler
//! engine is the single writer; nothing else holds a mutable reference.

mod reduce;
mod store;
mod types;

pub use reduce::{reduce, TaskUpdate, TransitionError};
pub use store::{Applied, TaskCounts, TaskStore};
pub use types::{JobId, Task, TaskError, TaskId, TaskOutcome, TaskStatus};
