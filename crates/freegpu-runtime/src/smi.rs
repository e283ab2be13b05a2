//! `nvidia-smi` backed providers
//!
//! Each query runs the device-management tool as a child process and waits
//! for it to exit before the captured stdout is parsed. There is no timeout
//! and no retry.

use async_trait::async_trait;
use freegpu_core::{
    parse_compute_processes, parse_inventory, ComputeProcess, DeviceRecord, FreeGpuError,
    FreeGpuResult, SmiConfig,
};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::traits::{BusyProvider, InventoryProvider};

/// Provider that scrapes `nvidia-smi --format=csv,noheader` output
#[derive(Debug, Clone)]
pub struct NvidiaSmi {
    config: SmiConfig,
}

impl NvidiaSmi {
    /// Create a new provider
    pub fn new(config: SmiConfig) -> Self {
        Self { config }
    }

    pub fn program(&self) -> String {
        self.config.program.display().to_string()
    }

    fn build_command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd
    }

    /// Run one query and return its full stdout
    async fn query(&self, args: &[String]) -> FreeGpuResult<String> {
        debug!(program = %self.program(), args = ?args, "Running device query");

        let output = self
            .build_command(args)
            .output()
            .await
            .map_err(|source| FreeGpuError::ToolSpawn {
                program: self.program(),
                source,
            })?;

        if !output.status.success() {
            return Err(FreeGpuError::ToolFailed {
                program: self.program(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        String::from_utf8(output.stdout).map_err(|e| FreeGpuError::Parse {
            line: 0,
            message: format!("{} output is not valid UTF-8: {}", self.program(), e),
        })
    }

    /// Run the tool without arguments, printing its usual table to the terminal
    pub async fn display(&self) -> FreeGpuResult<()> {
        let status = Command::new(&self.config.program)
            .stdin(Stdio::null())
            .status()
            .await
            .map_err(|source| FreeGpuError::ToolSpawn {
                program: self.program(),
                source,
            })?;

        if !status.success() {
            warn!(program = %self.program(), status = %status, "Diagnostic display failed");
        }

        Ok(())
    }
}

impl Default for NvidiaSmi {
    fn default() -> Self {
        Self::new(SmiConfig::default())
    }
}

#[async_trait]
impl InventoryProvider for NvidiaSmi {
    async fn inventory(&self) -> FreeGpuResult<Vec<DeviceRecord>> {
        let stdout = self.query(&self.config.inventory_args).await?;
        let records = parse_inventory(&stdout)?;
        debug!(devices = records.len(), "Parsed device inventory");
        Ok(records)
    }
}

#[async_trait]
impl BusyProvider for NvidiaSmi {
    async fn compute_processes(&self) -> FreeGpuResult<Vec<ComputeProcess>> {
        let stdout = self.query(&self.config.compute_apps_args).await?;
        let processes = parse_compute_processes(&stdout)?;
        debug!(processes = processes.len(), "Parsed compute processes");
        Ok(processes)
    }
}
