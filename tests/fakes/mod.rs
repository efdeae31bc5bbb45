//! In-memory service and database collaborators for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use host_updater::models::backup::DatabaseSpec;
use host_updater::services::database::DatabaseControl;
use host_updater::services::systemd::ServiceControl;
use host_updater::Result;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

/// Service manager that keeps unit state in memory and records every call.
#[derive(Default)]
pub struct FakeServices {
    /// name -> (active, enabled)
    units: Mutex<BTreeMap<String, (bool, bool)>>,
    calls: Mutex<Vec<String>>,
}

impl FakeServices {
    pub fn with_unit(self, name: &str, active: bool, enabled: bool) -> Self {
        self.units
            .lock()
            .unwrap()
            .insert(name.to_string(), (active, enabled));
        self
    }

    pub fn state(&self, name: &str) -> (bool, bool) {
        self.units.lock().unwrap().get(name).copied().unwrap_or_default()
    }

    pub fn set(&self, name: &str, active: bool, enabled: bool) {
        self.units
            .lock()
            .unwrap()
            .insert(name.to_string(), (active, enabled));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, verb: &str, name: &str) {
        self.calls.lock().unwrap().push(format!("{} {}", verb, name));
    }

    fn update(&self, name: &str, f: impl FnOnce(&mut (bool, bool))) {
        let mut units = self.units.lock().unwrap();
        f(units.entry(name.to_string()).or_default());
    }
}

#[async_trait]
impl ServiceControl for FakeServices {
    async fn is_active(&self, name: &str) -> Result<bool> {
        Ok(self.state(name).0)
    }

    async fn is_enabled(&self, name: &str) -> Result<bool> {
        Ok(self.state(name).1)
    }

    async fn start(&self, name: &str) -> Result<()> {
        self.record("start", name);
        self.update(name, |s| s.0 = true);
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<()> {
        self.record("stop", name);
        self.update(name, |s| s.0 = false);
        Ok(())
    }

    async fn enable(&self, name: &str) -> Result<()> {
        self.record("enable", name);
        self.update(name, |s| s.1 = true);
        Ok(())
    }

    async fn disable(&self, name: &str) -> Result<()> {
        self.record("disable", name);
        self.update(name, |s| s.1 = false);
        Ok(())
    }
}

/// Database tool that dumps by copying the spec's path, or fails for Postgres.
#[derive(Default)]
pub struct FileDatabases;

#[async_trait]
impl DatabaseControl for FileDatabases {
    async fn dump(&self, spec: &DatabaseSpec, dest: &Path) -> Result<()> {
        let src = spec
            .path
            .as_ref()
            .ok_or_else(|| host_updater::Error::other("no database server in tests"))?;
        std::fs::copy(src, dest)?;
        Ok(())
    }

    async fn restore(&self, spec: &DatabaseSpec, src: &Path) -> Result<()> {
        let dest = spec
            .path
            .as_ref()
            .ok_or_else(|| host_updater::Error::other("no database server in tests"))?;
        std::fs::copy(src, dest)?;
        Ok(())
    }
}
