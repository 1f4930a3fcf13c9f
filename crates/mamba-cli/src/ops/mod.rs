//! Orchestration of the core pipeline.

pub mod context;
pub mod install;

pub use context::Context;
