mod dispatcher;
mod executor;
mod memory_queue;
mod pg_queue;
mod registry;
mod worker;

pub use dispatcher::Dispatcher;
pub use executor::{ExecutionResult, JobExecutor};
pub use memory_queue::{DeadLetter, MemoryQueue};
pub use pg_queue::PgQueue;
pub use registry::{JobHandler, JobRegistry};
pub use worker::{WorkerConfig, WorkerPool};
