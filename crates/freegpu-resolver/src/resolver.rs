//! Device availability resolver
//!
//! Joins the device inventory with the active compute processes on bus id
//! and reports the devices nobody is computing on. The result is only a
//! snapshot: two processes resolving at the same instant can both see the
//! same device as idle, and nothing here reserves it.

use freegpu_core::{
    busy_set, BusId, BusySet, DeviceRecord, FreeGpuError, FreeGpuResult, Inventory,
};
use freegpu_runtime::{BusyProvider, InventoryProvider};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Inventory, busy devices and idle devices captured by one resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceSnapshot {
    /// Every device the inventory query reported
    pub devices: Vec<DeviceRecord>,
    /// Bus ids with at least one compute process
    pub busy: Vec<BusId>,
    /// Idle device indices, ascending
    pub idle: Vec<u32>,
}

/// Resolves idle devices from an inventory and a busy-device source
pub struct Resolver {
    inventory: Arc<dyn InventoryProvider>,
    busy: Arc<dyn BusyProvider>,
}

impl Resolver {
    /// Create a resolver from two separate providers
    pub fn new(inventory: Arc<dyn InventoryProvider>, busy: Arc<dyn BusyProvider>) -> Self {
        Self { inventory, busy }
    }

    /// Create a resolver from a provider that answers both queries
    pub fn from_provider<P>(provider: P) -> Self
    where
        P: InventoryProvider + BusyProvider + 'static,
    {
        let provider = Arc::new(provider);
        Self {
            inventory: provider.clone(),
            busy: provider,
        }
    }

    /// Query both sources, inventory first, and compute the idle set
    pub async fn snapshot(&self) -> FreeGpuResult<DeviceSnapshot> {
        let devices = self.inventory.inventory().await?;
        let processes = self.busy.compute_processes().await?;
        let busy = busy_set(&processes);

        let idle = idle_devices(&devices, &busy)?;

        info!(
            devices = devices.len(),
            busy = busy.len(),
            idle = ?idle,
            "Resolved idle GPUs"
        );

        Ok(DeviceSnapshot {
            devices,
            busy: busy.into_iter().collect(),
            idle,
        })
    }

    /// Indices of devices without any compute process, ascending
    pub async fn list_idle_devices(&self) -> FreeGpuResult<Vec<u32>> {
        Ok(self.snapshot().await?.idle)
    }
}

/// Remove every busy device from the inventory
///
/// A busy bus id the inventory never reported means the two snapshots
/// disagree, and is an error rather than something to skip.
pub fn idle_devices(devices: &[DeviceRecord], busy: &BusySet) -> FreeGpuResult<Vec<u32>> {
    let mut inventory = Inventory::from_records(devices)?;

    for bus_id in busy {
        match inventory.remove(bus_id) {
            Some(index) => debug!(gpu = index, bus_id = %bus_id, "GPU is busy"),
            None => return Err(FreeGpuError::UnknownBusId(bus_id.to_string())),
        }
    }

    Ok(inventory.sorted_indices())
}
