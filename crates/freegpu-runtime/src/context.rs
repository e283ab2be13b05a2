//! Device-context backends

use freegpu_core::FreeGpuResult;
use tracing::{debug, info};

use crate::traits::{DeviceContext, DeviceHandle};

/// Context that only tracks the active device index
///
/// Used when the binary is built without CUDA support or when the caller
/// asked not to touch the device.
#[derive(Debug, Default)]
pub struct DetachedContext {
    active: u32,
}

impl DetachedContext {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeviceContext for DetachedContext {
    fn set_device(&mut self, ordinal: u32) -> FreeGpuResult<()> {
        debug!(gpu = ordinal, "Active device set");
        self.active = ordinal;
        Ok(())
    }

    fn materialize(&mut self) -> FreeGpuResult<DeviceHandle> {
        info!(gpu = self.active, "Skipping device materialization");
        Ok(DeviceHandle {
            device: self.active,
            materialized: false,
            backend: self.name(),
        })
    }

    fn name(&self) -> &'static str {
        "detached"
    }
}

#[cfg(feature = "cuda")]
pub use cuda::CudaDeviceContext;

#[cfg(feature = "cuda")]
mod cuda {
    use cudarc::driver::{CudaContext, CudaSlice};
    use freegpu_core::{FreeGpuError, FreeGpuResult};
    use tracing::{debug, info};

    use crate::traits::{DeviceContext, DeviceHandle};

    /// CUDA driver context
    ///
    /// The one-element buffer holds the CUDA context alive as long as this
    /// value, so keep it around for the lifetime of the job.
    #[derive(Default)]
    pub struct CudaDeviceContext {
        active: u32,
        buffer: Option<CudaSlice<f32>>,
    }

    impl CudaDeviceContext {
        pub fn new() -> Self {
            Self::default()
        }

        fn handle(&self) -> DeviceHandle {
            DeviceHandle {
                device: self.active,
                materialized: true,
                backend: self.name(),
            }
        }
    }

    impl DeviceContext for CudaDeviceContext {
        fn set_device(&mut self, ordinal: u32) -> FreeGpuResult<()> {
            self.active = ordinal;
            self.buffer = None;
            Ok(())
        }

        fn materialize(&mut self) -> FreeGpuResult<DeviceHandle> {
            if self.buffer.is_some() {
                debug!(gpu = self.active, "CUDA context already materialized");
                return Ok(self.handle());
            }

            let ctx = CudaContext::new(self.active as usize).map_err(|e| {
                FreeGpuError::Device(format!(
                    "Failed to create CUDA context on device {}: {}",
                    self.active, e
                ))
            })?;
            let buffer = ctx.default_stream().alloc_zeros::<f32>(1).map_err(|e| {
                FreeGpuError::Device(format!(
                    "Failed to allocate on device {}: {}",
                    self.active, e
                ))
            })?;

            info!(gpu = self.active, "CUDA context materialized");

            self.buffer = Some(buffer);

            Ok(self.handle())
        }

        fn name(&self) -> &'static str {
            "cuda"
        }
    }
}
