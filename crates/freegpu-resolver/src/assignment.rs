//! Single-device assignment for the current process

use freegpu_core::{FreeGpuError, FreeGpuResult, Restriction};
use freegpu_runtime::{DeviceContext, DeviceHandle};
use serde::Serialize;
use tracing::info;

use crate::resolver::Resolver;

/// Where the assigned ordinal came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AssignmentSource {
    /// Claimed from the idle devices found at start-up
    Idle { idle: Vec<u32> },
    /// Taken from an existing device restriction
    Restricted { value: String },
}

/// Device bound to this process for its lifetime
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Assignment {
    /// Physical device ordinal
    pub ordinal: u32,
    pub source: AssignmentSource,
}

impl Assignment {
    /// Device index inside this process's visible device set
    ///
    /// A restriction already scopes the process to the reserved devices, so
    /// the first of them is local device 0.
    pub fn local_device(&self) -> u32 {
        match self.source {
            AssignmentSource::Idle { .. } => self.ordinal,
            AssignmentSource::Restricted { .. } => 0,
        }
    }
}

/// Assignment together with the materialized device context
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Selection {
    pub assignment: Assignment,
    pub device: DeviceHandle,
}

/// Pick the device to claim from the ascending idle list
///
/// The highest idle index wins.
pub fn choose_idle(idle: &[u32], total: usize) -> FreeGpuResult<u32> {
    idle.last()
        .copied()
        .ok_or(FreeGpuError::NoIdleDevice { total })
}

/// Decide which device this process uses
///
/// Does not touch the device context.
pub async fn resolve_assignment(
    resolver: &Resolver,
    restriction: &Restriction,
) -> FreeGpuResult<Assignment> {
    match restriction {
        Restriction::Unset => {
            let snapshot = resolver.snapshot().await?;
            let ordinal = choose_idle(&snapshot.idle, snapshot.devices.len())?;
            Ok(Assignment {
                ordinal,
                source: AssignmentSource::Idle {
                    idle: snapshot.idle,
                },
            })
        }
        Restriction::List { first, raw } => Ok(Assignment {
            ordinal: *first,
            source: AssignmentSource::Restricted { value: raw.clone() },
        }),
        Restriction::Single(ordinal) => Ok(Assignment {
            ordinal: *ordinal,
            source: AssignmentSource::Restricted {
                value: ordinal.to_string(),
            },
        }),
    }
}

/// Resolve the assignment, bind it, and materialize the device context
///
/// Only a claimed idle device is made active; under a restriction the
/// runtime's default device already is the reserved one. The context is
/// materialized in every case so initialization failures surface now.
pub async fn resolve_single_device<C>(
    resolver: &Resolver,
    restriction: &Restriction,
    context: &mut C,
) -> FreeGpuResult<Selection>
where
    C: DeviceContext + ?Sized,
{
    let assignment = resolve_assignment(resolver, restriction).await?;

    if let AssignmentSource::Idle { .. } = assignment.source {
        context.set_device(assignment.ordinal)?;
    }

    let device = context.materialize()?;

    info!(
        gpu = assignment.ordinal,
        local_device = device.device,
        backend = context.name(),
        restricted = restriction.is_set(),
        "Assigned GPU"
    );

    Ok(Selection { assignment, device })
}
