//! Device restriction from `CUDA_VISIBLE_DEVICES`

use crate::{FreeGpuError, FreeGpuResult};

/// Default name of the device-restriction variable
pub const CUDA_VISIBLE_DEVICES: &str = "CUDA_VISIBLE_DEVICES";

/// State of the device-restriction variable at start-up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Restriction {
    /// Variable not set; an idle device has to be claimed
    Unset,
    /// A single device is reserved
    Single(u32),
    /// Several devices are reserved; only the first is parsed
    List { first: u32, raw: String },
}

impl Restriction {
    /// Interpret the raw variable value
    pub fn from_env_value(value: Option<&str>) -> FreeGpuResult<Self> {
        let Some(value) = value else {
            return Ok(Restriction::Unset);
        };

        if let Some((first, _)) = value.split_once(',') {
            let first = parse_ordinal(value, first)?;
            Ok(Restriction::List {
                first,
                raw: value.to_string(),
            })
        } else {
            Ok(Restriction::Single(parse_ordinal(value, value)?))
        }
    }

    /// Read the variable from the process environment
    pub fn from_env(var: &str) -> FreeGpuResult<Self> {
        match std::env::var(var) {
            Ok(value) => Self::from_env_value(Some(&value)),
            Err(std::env::VarError::NotPresent) => Self::from_env_value(None),
            Err(std::env::VarError::NotUnicode(raw)) => Err(FreeGpuError::InvalidRestriction {
                value: raw.to_string_lossy().into_owned(),
                message: "not valid unicode".to_string(),
            }),
        }
    }

    pub fn is_set(&self) -> bool {
        !matches!(self, Restriction::Unset)
    }
}

fn parse_ordinal(value: &str, token: &str) -> FreeGpuResult<u32> {
    token
        .trim()
        .parse::<u32>()
        .map_err(|e| FreeGpuError::InvalidRestriction {
            value: value.to_string(),
            message: format!("{:?} is not a device ordinal: {}", token.trim(), e),
        })
}
