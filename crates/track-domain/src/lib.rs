// track-domain library entry point
pub mod errors;
pub mod stage;
pub mod stage_log;
pub mod tracked_unit;
pub use errors::DomainError;
pub use stage::{RejectReason, Stage, Status};
pub use stage_log::{StageLog, StageLogEntry};
pub use tracked_unit::TrackedUnit;
