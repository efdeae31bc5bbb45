//! Core business logic modules.

pub mod checksum;
pub mod hotfix;
pub mod markers;
pub mod migration;
pub mod orchestrator;
pub mod permissions;
pub mod registry;
pub mod rollback;
pub mod state;
