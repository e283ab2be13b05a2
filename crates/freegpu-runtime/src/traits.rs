//! Provider and device-context trait definitions

use async_trait::async_trait;
use freegpu_core::{ComputeProcess, DeviceRecord, FreeGpuResult};
use serde::Serialize;

/// Source of the device inventory snapshot
#[async_trait]
pub trait InventoryProvider: Send + Sync {
    /// List every device as `(index, bus id)`
    async fn inventory(&self) -> FreeGpuResult<Vec<DeviceRecord>>;
}

/// Source of the active compute-process snapshot
#[async_trait]
pub trait BusyProvider: Send + Sync {
    /// List every running compute process as `(pid, bus id)`
    async fn compute_processes(&self) -> FreeGpuResult<Vec<ComputeProcess>>;
}

/// Handle to the device context that was made active for this process
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceHandle {
    /// Local device index inside the visible device set
    pub device: u32,
    /// Whether a buffer was actually allocated on the device
    pub materialized: bool,
    /// Backend that produced the handle
    pub backend: &'static str,
}

/// The host runtime's device-context switching primitive
pub trait DeviceContext {
    /// Make `ordinal` the active device
    fn set_device(&mut self, ordinal: u32) -> FreeGpuResult<()>;

    /// Allocate a trivial buffer on the active device so its context exists
    fn materialize(&mut self) -> FreeGpuResult<DeviceHandle>;

    /// Get the backend name
    fn name(&self) -> &'static str;
}
