//! # plexus-orchestrator
//!
//! The autonomous side of Plexus:
//! - [`AgentOrchestrator`] drives persisted task graphs: dependency
//!   scheduling, template substitution between node outputs, at-most-once
//!   node dispatch, terminal-state propagation.
//! - [`ToolExecutor`] executes a single node's tool and reports exactly one
//!   terminal event back.
//! - [`GraphPlanner`] turns natural-language requests into task graphs via
//!   the AI backend.
//! - [`TelemetrySensor`] fires autonomous graph requests from observed
//!   file-system events.
//!
//! All of them talk to each other only through broker topics.

mod error;
mod executor;
mod orchestrator;
mod planner;
mod sensor;
mod template;

pub use error::{ExecutorError, OrchestratorError};
pub use executor::ToolExecutor;
pub use orchestrator::AgentOrchestrator;
pub use planner::GraphPlanner;
pub use sensor::TelemetrySensor;
pub use template::{resolve_input, TemplateError};
