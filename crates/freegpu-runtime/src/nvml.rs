//! NVML backed providers

use async_trait::async_trait;
use freegpu_core::{BusId, ComputeProcess, DeviceRecord, FreeGpuError, FreeGpuResult};
use nvml_wrapper::error::NvmlError;
use nvml_wrapper::Nvml;
use once_cell::sync::OnceCell;
use tracing::debug;

use crate::traits::{BusyProvider, InventoryProvider};

/// Provider that reads device state from NVML directly
///
/// NVML is loaded on the first query, so a provider that is never asked
/// anything never touches the driver library.
#[derive(Default)]
pub struct NvmlProvider {
    nvml: OnceCell<Nvml>,
}

impl NvmlProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn nvml(&self) -> FreeGpuResult<&Nvml> {
        self.nvml.get_or_try_init(|| {
            debug!("Initializing NVML");
            Nvml::init().map_err(nvml_error)
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.nvml.get().is_some()
    }

    fn bus_ids(&self) -> FreeGpuResult<Vec<(u32, BusId)>> {
        let nvml = self.nvml()?;
        let count = nvml.device_count().map_err(nvml_error)?;
        let mut devices = Vec::with_capacity(count as usize);
        for index in 0..count {
            let device = nvml.device_by_index(index).map_err(nvml_error)?;
            let pci = device.pci_info().map_err(nvml_error)?;
            devices.push((index, BusId::new(pci.bus_id)));
        }
        Ok(devices)
    }
}

#[async_trait]
impl InventoryProvider for NvmlProvider {
    async fn inventory(&self) -> FreeGpuResult<Vec<DeviceRecord>> {
        let records: Vec<DeviceRecord> = self
            .bus_ids()?
            .into_iter()
            .map(|(index, bus_id)| DeviceRecord { index, bus_id })
            .collect();
        debug!(devices = records.len(), "Read device inventory from NVML");
        Ok(records)
    }
}

#[async_trait]
impl BusyProvider for NvmlProvider {
    async fn compute_processes(&self) -> FreeGpuResult<Vec<ComputeProcess>> {
        let mut processes = Vec::new();
        for (index, bus_id) in self.bus_ids()? {
            let device = self.nvml()?.device_by_index(index).map_err(nvml_error)?;
            for info in device.running_compute_processes().map_err(nvml_error)? {
                processes.push(ComputeProcess {
                    pid: info.pid,
                    bus_id: bus_id.clone(),
                });
            }
        }
        debug!(processes = processes.len(), "Read compute processes from NVML");
        Ok(processes)
    }
}

fn nvml_error(err: NvmlError) -> FreeGpuError {
    FreeGpuError::Device(format!("NVML: {}", err))
}
