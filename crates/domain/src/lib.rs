pub mod clock;
pub mod entities;
pub mod events;
pub mod repositories;
pub mod services;
pub mod task;

pub use clock::*;
pub use entities::*;
pub use events::*;
pub use repositories::*;
pub use services::*;
pub use task::{
    CompletionHandler, DeadExecutionHandler, ExecutableTask, ExecutionComplete, ExecutionContext,
    ExecutionOperations, ExecutionResult, FailureHandler,
};
pub use taskloop_errors::{SchedulerError, SchedulerResult};
