pub mod executor;
pub mod pool;

pub use executor::{ConversionExecutor, PREVIEW_CHARS};
pub use pool::{JobHandler, JobQueue, WorkerPool};
