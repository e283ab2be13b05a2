//! freegpu-resolver: Idle GPU resolution for freegpu
//!
//! This crate decides which GPU the current process runs on:
//! - Idle device resolution from inventory and compute-process snapshots
//! - The single-device assignment policy

pub mod assignment;
pub mod resolver;

pub use assignment::{
    choose_idle, resolve_assignment, resolve_single_device, Assignment, AssignmentSource,
    Selection,
};
pub use resolver::{idle_devices, DeviceSnapshot, Resolver};
