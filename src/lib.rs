pub mod modules;

pub use modules::coordinator::{Coordinator, CoordinatorError, Phase, Session, Stage, StageStatus};
pub use modules::types::{Candidate, Record, RecordField};
