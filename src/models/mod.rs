//! Data models.

pub mod backup;
pub mod config;
pub mod manifest;
pub mod migration;
pub mod module;
pub mod outcome;
pub mod rollback;
pub mod snapshot;
