//! draftgate: a checkpointed workflow engine that drafts clinical exercises,
//! loops them through safety and quality review, and parks them at a human
//! gate before finalizing.

pub mod blackboard;
pub mod checkpoint;
pub mod collaborators;
pub mod config;
pub mod engine;
pub mod errors;
pub mod events;
pub mod router;
pub mod steps;
pub mod telemetry;
pub mod util;
