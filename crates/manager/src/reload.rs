use async_trait::async_trait;
use ssl_manager_common::{ManagerError, Result};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{info, warn};

const RELOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// 通知反向代理重新加载证书；容器名为空时不做任何事
#[async_trait]
pub trait ReloadSignaler: Send + Sync {
    async fn reload(&self, container: &str) -> Result<()>;
}

/// `<runtime> exec <container> nginx -s reload`
#[derive(Debug, Clone)]
pub struct ContainerReloader {
    runtime: String,
}

impl ContainerReloader {
    pub fn new(runtime: impl Into<String>) -> Self {
        Self {
            runtime: runtime.into(),
        }
    }
}

#[async_trait]
impl ReloadSignaler for ContainerReloader {
    async fn reload(&self, container: &str) -> Result<()> {
        let container = container.trim();
        if container.is_empty() {
            return Ok(());
        }

        let mut command = Command::new(&self.runtime);
        command
            .args(["exec", container, "nginx", "-s", "reload"])
            .kill_on_drop(true);

        let output = match timeout(RELOAD_TIMEOUT, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                return Err(ManagerError::reload(format!(
                    "failed to run {}: {}",
                    self.runtime, err
                )));
            }
            Err(_) => {
                return Err(ManagerError::reload(format!(
                    "reload of {} timed out after {:?}",
                    container, RELOAD_TIMEOUT
                )));
            }
        };

        if !output.status.success() {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            warn!(
                container = %container,
                status = %output.status,
                output = %combined.trim(),
                "nginx reload failed"
            );
            return Err(ManagerError::reload(format!(
                "{} exec {} exited with {}",
                self.runtime, container, output.status
            )));
        }

        info!(container = %container, "nginx reloaded");
        Ok(())
    }
}
