//! Monitor-mode control for the wireless adapter.
//!
//! The real implementation shells out to `airmon-ng`; the trait lets the
//! controller be driven by a fake in tests.

use std::future::Future;

use tokio::process::Command;
use tracing::{debug, info};

use crate::error::AdapterModeError;

/// Switches an interface into monitor mode and back.
pub trait AdapterControl: Send + Sync {
    /// Puts `interface` into monitor mode.
    fn enable(&self, interface: &str) -> impl Future<Output = Result<(), AdapterModeError>> + Send;

    /// Takes `monitor_interface` out of monitor mode.
    fn disable(
        &self,
        monitor_interface: &str,
    ) -> impl Future<Output = Result<(), AdapterModeError>> + Send;
}

/// `airmon-ng start|stop`, optionally through `sudo`.
#[derive(Debug, Clone)]
pub struct Airmon {
    tool: String,
    use_sudo: bool,
}

impl Airmon {
    pub fn new(tool: impl Into<String>, use_sudo: bool) -> Self {
        Self {
            tool: tool.into(),
            use_sudo,
        }
    }

    fn command(&self) -> Command {
        if self.use_sudo {
            let mut cmd = Command::new("sudo");
            cmd.arg(&self.tool);
            cmd
        } else {
            Command::new(&self.tool)
        }
    }

    async fn run(&self, action: &'static str, interface: &str) -> Result<(), AdapterModeError> {
        debug!("Running {} {} {}", self.tool, action, interface);

        let output = self
            .command()
            .args([action, interface])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| AdapterModeError::Spawn {
                tool: self.tool.clone(),
                source,
            })?;

        if !output.status.success() {
            debug!(
                "{} stderr: {}",
                self.tool,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Err(AdapterModeError::NonZeroExit {
                tool: self.tool.clone(),
                action,
                interface: interface.to_string(),
                status: output.status,
            });
        }

        Ok(())
    }
}

impl Default for Airmon {
    fn default() -> Self {
        Self::new("airmon-ng", true)
    }
}

impl AdapterControl for Airmon {
    async fn enable(&self, interface: &str) -> Result<(), AdapterModeError> {
        self.run("start", interface).await?;
        info!("Monitor mode enabled on {}", interface);
        Ok(())
    }

    async fn disable(&self, monitor_interface: &str) -> Result<(), AdapterModeError> {
        self.run("stop", monitor_interface).await?;
        info!("Monitor mode disabled on {}", monitor_interface);
        Ok(())
    }
}
