//! Runtime image selection and building.

mod builder;
mod selector;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::detect::RuntimeFlavor;

pub use builder::{ImageBuilder, BUILD_TIMEOUT, IMAGE_ENV};
pub use selector::ImageSelector;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("unsupported flavor '{0}' (expected auto, accelerated or fallback)")]
    UnsupportedFlavor(String),

    #[error("failed to build {flavor} image: {reason}")]
    BuildFailure { flavor: RuntimeFlavor, reason: String },

    #[error("image {image} not found; build it with {}", .script.display())]
    ImageNotFound { image: String, script: PathBuf },

    #[error("{0}")]
    Runtime(String),
}

/// Flavor asked for by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlavorRequest {
    #[default]
    Auto,
    Accelerated,
    #[serde(rename = "fallback")]
    SoftwareFallback,
}

impl FlavorRequest {
    pub fn as_str(self) -> &'static str {
        match self {
            FlavorRequest::Auto => "auto",
            FlavorRequest::Accelerated => "accelerated",
            FlavorRequest::SoftwareFallback => "fallback",
        }
    }
}

impl FromStr for FlavorRequest {
    type Err = ImageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(FlavorRequest::Auto),
            "accelerated" | "nvidia" | "gpu" => Ok(FlavorRequest::Accelerated),
            "fallback" | "software" | "mesa" => Ok(FlavorRequest::SoftwareFallback),
            _ => Err(ImageError::UnsupportedFlavor(s.to_string())),
        }
    }
}

impl fmt::Display for FlavorRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<RuntimeFlavor> for FlavorRequest {
    fn from(flavor: RuntimeFlavor) -> Self {
        match flavor {
            RuntimeFlavor::Accelerated => FlavorRequest::Accelerated,
            RuntimeFlavor::SoftwareFallback => FlavorRequest::SoftwareFallback,
        }
    }
}

/// A resolved image, ready to launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeImageRef {
    pub flavor: RuntimeFlavor,
    pub image_name: String,
    /// Built during this resolution (false if it already existed)
    pub built: bool,
}
