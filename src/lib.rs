//! Host Updater Library
//!
//! Checksum-gated update orchestration for host services, with per-module
//! state backup, phase-ordered rollback and one-shot migrations.

pub mod cli;
pub mod core;
pub mod error;
pub mod models;
pub mod preflight;
pub mod services;
pub mod utils;

pub use error::{Error, Result};
