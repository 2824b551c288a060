pub mod error;
pub mod model;
pub mod protocol;
pub mod subtask;
pub mod task;

pub use error::{ErrorKind, TaskError};
pub use model::ModelParams;
pub use subtask::{SubTask, SubTaskStatus};
pub use task::TaskRequest;
