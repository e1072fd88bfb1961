pub mod audit;
pub mod service;
pub mod sweep;

pub use audit::TracingAuditSink;
pub use service::WorkflowService;
pub use sweep::{ExpiryScanner, SweepFailure, SweepReport};
