//! Service manager access.

use crate::models::backup::ServiceState;
use crate::services::process::{run_checked, run_command};
use crate::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Operations the backup engine needs from the service manager.
#[async_trait]
pub trait ServiceControl: Send + Sync {
    async fn is_active(&self, name: &str) -> Result<bool>;
    async fn is_enabled(&self, name: &str) -> Result<bool>;
    async fn start(&self, name: &str) -> Result<()>;
    async fn stop(&self, name: &str) -> Result<()>;
    async fn enable(&self, name: &str) -> Result<()>;
    async fn disable(&self, name: &str) -> Result<()>;

    /// Record the active/enabled combination of a service.
    async fn capture(&self, name: &str) -> Result<ServiceState> {
        Ok(ServiceState {
            name: name.to_string(),
            active: self.is_active(name).await?,
            enabled: self.is_enabled(name).await?,
        })
    }

    /// Bring a service back to a recorded state.
    ///
    /// Enable/disable is applied before start/stop so that every combination,
    /// including disabled-but-running, is reachable.
    async fn apply(&self, state: &ServiceState) -> Result<()> {
        if state.enabled {
            self.enable(&state.name).await?;
        } else {
            self.disable(&state.name).await?;
        }
        if state.active {
            self.start(&state.name).await?;
        } else {
            self.stop(&state.name).await?;
        }
        Ok(())
    }
}

/// `systemctl`-backed service control.
#[derive(Debug, Clone)]
pub struct Systemctl {
    timeout: Duration,
}

impl Systemctl {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn query(&self, verb: &str, name: &str) -> Result<bool> {
        // is-active / is-enabled answer through the exit code.
        let output = run_command("systemctl", &[verb, name], self.timeout).await?;
        Ok(output.success())
    }

    async fn act(&self, verb: &str, name: &str) -> Result<()> {
        run_checked("systemctl", &[verb, name], self.timeout).await?;
        tracing::info!("systemctl {} {}", verb, name);
        Ok(())
    }
}

impl Default for Systemctl {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

#[async_trait]
impl ServiceControl for Systemctl {
    async fn is_active(&self, name: &str) -> Result<bool> {
        self.query("is-active", name).await
    }

    async fn is_enabled(&self, name: &str) -> Result<bool> {
        self.query("is-enabled", name).await
    }

    async fn start(&self, name: &str) -> Result<()> {
        self.act("start", name).await
    }

    async fn stop(&self, name: &str) -> Result<()> {
        self.act("stop", name).await
    }

    async fn enable(&self, name: &str) -> Result<()> {
        self.act("enable", name).await
    }

    async fn disable(&self, name: &str) -> Result<()> {
        self.act("disable", name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ServiceControl for Recorder {
        async fn is_active(&self, _name: &str) -> Result<bool> {
            Ok(true)
        }
        async fn is_enabled(&self, _name: &str) -> Result<bool> {
            Ok(false)
        }
        async fn start(&self, name: &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!("start {name}"));
            Ok(())
        }
        async fn stop(&self, name: &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!("stop {name}"));
            Ok(())
        }
        async fn enable(&self, name: &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!("enable {name}"));
            Ok(())
        }
        async fn disable(&self, name: &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!("disable {name}"));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_apply_orders_enablement_before_activation() {
        let recorder = Recorder::default();
        let state = ServiceState {
            name: "navidrome".to_string(),
            active: true,
            enabled: false,
        };
        recorder.apply(&state).await.unwrap();

        let calls = recorder.calls.lock().unwrap().clone();
        assert_eq!(calls, vec!["disable navidrome", "start navidrome"]);
    }

    #[tokio::test]
    async fn test_capture_uses_queries() {
        let recorder = Recorder::default();
        let state = recorder.capture("gitea").await.unwrap();
        assert!(state.active);
        assert!(!state.enabled);
    }
}
