//! Core library for the `micromamba` workspace.
//!
//! The pipeline runs leaf-first: [`fetch`] loads channel metadata, [`pool`]
//! indexes it next to the installed [`prefix`] records, [`solver`] picks a
//! consistent package set, and [`transaction`] diffs and applies it using
//! the shared package [`cache`].

pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod fsutil;
pub mod http;
pub mod pool;
pub mod prefix;
pub mod pubgrub_adapter;
pub mod reporter;
pub mod retry;
pub mod solver;
pub mod transaction;

pub use config::Config;
pub use error::{Error, ErrorKind};
pub use reporter::{NullReporter, Reporter};

/// User Agent string for core operations
pub const USER_AGENT: &str = concat!("mamba-core/", env!("CARGO_PKG_VERSION"));
