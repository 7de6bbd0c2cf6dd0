//! Deployment mode.
//!
//! A process runs either as the central hub or as one tenant's satellite.
//! Behavioral asymmetries (which tasks execute where, which collections a
//! receiver may overwrite) hang off this single value, injected at startup.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Deployment mode of the running process.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    /// Central server: owns global catalog data, arbitrates conflicts.
    Hub,
    /// Tenant-scoped mirror: owns its local operational data.
    Satellite,
}

impl Mode {
    pub fn is_hub(self) -> bool {
        matches!(self, Mode::Hub)
    }

    pub fn is_satellite(self) -> bool {
        matches!(self, Mode::Satellite)
    }
}

impl FromStr for Mode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "HUB" => Ok(Mode::Hub),
            "SATELLITE" => Ok(Mode::Satellite),
            other => Err(DomainError::validation(format!("unknown mode: {other}"))),
        }
    }
}

impl core::fmt::Display for Mode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Mode::Hub => write!(f, "HUB"),
            Mode::Satellite => write!(f, "SATELLITE"),
        }
    }
}
