//! freegpu-runtime: External collaborators of the resolver
//!
//! This crate provides:
//! - Provider traits for the device inventory and busy-device snapshots
//! - The `nvidia-smi` process provider, and an NVML provider behind `nvml`
//! - Device-context backends (CUDA behind `cuda`)

pub mod context;
#[cfg(feature = "nvml")]
pub mod nvml;
pub mod smi;
pub mod traits;

pub use context::DetachedContext;
#[cfg(feature = "cuda")]
pub use context::CudaDeviceContext;
#[cfg(feature = "nvml")]
pub use nvml::NvmlProvider;
pub use smi::NvidiaSmi;
pub use traits::{BusyProvider, DeviceContext, DeviceHandle, InventoryProvider};
