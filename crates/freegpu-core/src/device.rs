//! GPU device records and `nvidia-smi` CSV parsing

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::{FreeGpuError, FreeGpuResult};

/// PCI bus identifier of a GPU, e.g. `00000000:3B:00.0`
///
/// This is the join key between the inventory and the compute-process
/// snapshots; ordinal indices are not.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BusId(String);

impl BusId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BusId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One line of the device inventory query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Ordinal used by the CUDA runtime to select the device
    pub index: u32,
    /// Hardware bus identifier
    pub bus_id: BusId,
}

impl DeviceRecord {
    pub fn new(index: u32, bus_id: impl Into<String>) -> Self {
        Self {
            index,
            bus_id: BusId::new(bus_id),
        }
    }
}

/// One line of the active compute-process query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeProcess {
    pub pid: u32,
    pub bus_id: BusId,
}

impl ComputeProcess {
    pub fn new(pid: u32, bus_id: impl Into<String>) -> Self {
        Self {
            pid,
            bus_id: BusId::new(bus_id),
        }
    }
}

/// Device inventory keyed by bus id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    by_bus_id: BTreeMap<BusId, u32>,
}

impl Inventory {
    /// Build the inventory mapping, rejecting a bus id reported twice
    pub fn from_records(records: &[DeviceRecord]) -> FreeGpuResult<Self> {
        let mut by_bus_id = BTreeMap::new();
        for record in records {
            if by_bus_id.insert(record.bus_id.clone(), record.index).is_some() {
                return Err(FreeGpuError::DuplicateBusId(record.bus_id.to_string()));
            }
        }
        Ok(Self { by_bus_id })
    }

    /// Remove a device, returning its index if it was present
    pub fn remove(&mut self, bus_id: &BusId) -> Option<u32> {
        self.by_bus_id.remove(bus_id)
    }

    /// Remaining device indices in ascending order
    pub fn sorted_indices(&self) -> Vec<u32> {
        let mut indices: Vec<u32> = self.by_bus_id.values().copied().collect();
        indices.sort_unstable();
        indices
    }
}

/// Bus ids with at least one compute process attached
pub type BusySet = BTreeSet<BusId>;

/// Collapse compute processes to the set of busy bus ids
pub fn busy_set(processes: &[ComputeProcess]) -> BusySet {
    processes.iter().map(|p| p.bus_id.clone()).collect()
}

/// Parse `index, bus_id` lines from `--query-gpu=index,gpu_bus_id --format=csv,noheader`
pub fn parse_inventory(output: &str) -> FreeGpuResult<Vec<DeviceRecord>> {
    Ok(parse_pairs(output, "device index")?
        .into_iter()
        .map(|(index, bus_id)| DeviceRecord { index, bus_id })
        .collect())
}

/// Parse `pid, bus_id` lines from `--query-compute-apps=pid,gpu_bus_id --format=csv,noheader`
pub fn parse_compute_processes(output: &str) -> FreeGpuResult<Vec<ComputeProcess>> {
    Ok(parse_pairs(output, "pid")?
        .into_iter()
        .map(|(pid, bus_id)| ComputeProcess { pid, bus_id })
        .collect())
}

fn parse_pairs(output: &str, what: &str) -> FreeGpuResult<Vec<(u32, BusId)>> {
    let mut pairs = Vec::new();

    for (n, line) in output.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() != 2 {
            return Err(FreeGpuError::Parse {
                line: n + 1,
                message: format!(
                    "expected 2 comma-separated fields, got {}: {:?}",
                    fields.len(),
                    line
                ),
            });
        }

        let number = fields[0].trim().parse::<u32>().map_err(|e| FreeGpuError::Parse {
            line: n + 1,
            message: format!("invalid {} {:?}: {}", what, fields[0].trim(), e),
        })?;

        let bus_id = fields[1].trim();
        if bus_id.is_empty() {
            return Err(FreeGpuError::Parse {
                line: n + 1,
                message: format!("empty bus id: {:?}", line),
            });
        }

        pairs.push((number, BusId::new(bus_id)));
    }

    Ok(pairs)
}
