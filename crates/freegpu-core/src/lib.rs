//! freegpu-core: Core types for freegpu
//!
//! This crate provides the fundamental types used throughout freegpu:
//! - Device records and `nvidia-smi` output parsing
//! - The device-restriction variable
//! - Configuration types
//! - Error handling

pub mod config;
pub mod device;
pub mod error;
pub mod restriction;

pub use config::*;
pub use device::*;
pub use error::*;
pub use restriction::*;
