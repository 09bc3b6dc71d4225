use half::f16;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Where the embedding model runs, as requested by configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    /// Use an accelerator if the backend has one, the CPU otherwise.
    #[default]
    Auto,
    Accelerator,
    Cpu,
}

impl DevicePreference {
    /// Resolves the preference into a concrete device. Meant to be called once
    /// per run; the result is handed to the embedder.
    pub fn resolve(self, accelerator_available: bool) -> Device {
        match self {
            Self::Auto | Self::Accelerator if accelerator_available => Device::Accelerator,
            Self::Accelerator => {
                warn!("accelerator requested but the backend has none, falling back to cpu");
                Device::Cpu
            }
            Self::Auto | Self::Cpu => Device::Cpu,
        }
    }
}

impl std::str::FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "accelerator" | "gpu" | "cuda" => Ok(Self::Accelerator),
            "cpu" => Ok(Self::Cpu),
            other => Err(format!("unknown device `{other}`")),
        }
    }
}

/// A resolved execution device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Accelerator,
    Cpu,
}

impl Device {
    /// Accelerators compute in half precision, the CPU in full precision.
    pub fn precision(self) -> Precision {
        match self {
            Self::Accelerator => Precision::Half,
            Self::Cpu => Precision::Full,
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accelerator => f.write_str("accelerator"),
            Self::Cpu => f.write_str("cpu"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    /// IEEE 754 binary16
    Half,
    /// IEEE 754 binary32
    Full,
}

impl Precision {
    /// Rounds every component to this precision. Never changes the length.
    pub fn apply(self, vector: &mut [f32]) {
        if self == Self::Half {
            for v in vector.iter_mut() {
                *v = f16::from_f32(*v).to_f32();
            }
        }
    }
}
