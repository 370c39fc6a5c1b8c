pub mod model;
pub mod registry;

pub use model::{url_filename, Job, JobPhase, JobResult, JobSource, JobStatus};
pub use registry::JobRegistry;
