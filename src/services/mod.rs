//! Access to host collaborators: processes, the service manager, databases.

pub mod database;
pub mod process;
pub mod systemd;
