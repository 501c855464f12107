//! Trial search workflow: criteria, normalized records, ranking, and orchestration.

pub mod ranking;
pub mod trial;
