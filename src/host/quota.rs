//! Project quota administration through the `xfs_quota` command

use crate::domain::ports::QuotaTool;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// [`QuotaTool`] running `xfs_quota -x -c <command> <mount point>`
#[derive(Debug, Clone)]
pub struct XfsQuota {
    program: String,
    mount_point: PathBuf,
    timeout: Duration,
}

impl XfsQuota {
    pub fn new(program: impl Into<String>, mount_point: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            mount_point: mount_point.into(),
            timeout,
        }
    }

    async fn run(&self, command: String) -> Result<()> {
        let child = Command::new(&self.program)
            .arg("-x")
            .arg("-c")
            .arg(&command)
            .arg(&self.mount_point)
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| Error::Timeout {
                operation: format!("{} '{}'", self.program, command),
            })?
            .map_err(|e| Error::ProcessLaunchFailed {
                command: self.program.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::QuotaCommand {
                command,
                reason: format!("{}: {}", output.status, stderr.trim()),
            });
        }

        debug!(
            program = %self.program,
            mount = %self.mount_point.display(),
            command = %command,
            "Quota command succeeded"
        );
        Ok(())
    }
}

#[async_trait]
impl QuotaTool for XfsQuota {
    async fn reset_limits(&self, project: &str) -> Result<()> {
        self.run(format!("limit -p bsoft=0 bhard=0 {}", project)).await
    }

    async fn remove_project(&self, project: &str) -> Result<()> {
        self.run(format!("project -C {}", project)).await
    }
}
