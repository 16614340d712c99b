//! Flavor to image resolution.

use std::sync::Arc;

use super::{FlavorRequest, ImageBuilder, ImageError, RuntimeImageRef};
use crate::container::ContainerRuntime;
use crate::detect::{CapabilityDetector, CapabilityProfile, RuntimeFlavor};

/// Maps a [`FlavorRequest`] to an image, building it when missing.
pub struct ImageSelector {
    runtime: Arc<dyn ContainerRuntime>,
    detector: CapabilityDetector,
    builder: ImageBuilder,
    image_override: Option<String>,
    auto_build: bool,
    force_rebuild: bool,
}

impl ImageSelector {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, builder: ImageBuilder) -> Self {
        Self {
            runtime,
            detector: CapabilityDetector::new(),
            builder,
            image_override: None,
            auto_build: true,
            force_rebuild: false,
        }
    }

    pub fn with_detector(mut self, detector: CapabilityDetector) -> Self {
        self.detector = detector;
        self
    }

    /// Use this image name regardless of flavor.
    pub fn with_image_override(mut self, image: Option<String>) -> Self {
        self.image_override = image;
        self
    }

    pub fn with_auto_build(mut self, auto_build: bool) -> Self {
        self.auto_build = auto_build;
        self
    }

    pub fn with_force_rebuild(mut self, force_rebuild: bool) -> Self {
        self.force_rebuild = force_rebuild;
        self
    }

    pub fn detect(&self) -> CapabilityProfile {
        self.detector.detect(self.runtime.as_ref())
    }

    /// Resolve `request`, probing the host if it is `Auto`.
    pub fn resolve(&self, request: FlavorRequest) -> Result<RuntimeImageRef, ImageError> {
        let profile = self.detect();
        self.resolve_with(request, &profile)
    }

    /// Resolve `request` against an already detected profile.
    ///
    /// Only `Auto` may fall back to the software image; explicit requests
    /// surface their failure.
    pub fn resolve_with(
        &self,
        request: FlavorRequest,
        profile: &CapabilityProfile,
    ) -> Result<RuntimeImageRef, ImageError> {
        if !self.runtime.is_available() {
            return Err(ImageError::Runtime(format!(
                "container runtime '{}' not available",
                self.runtime.name()
            )));
        }

        match request {
            FlavorRequest::Accelerated => self.ensure(RuntimeFlavor::Accelerated),
            FlavorRequest::SoftwareFallback => self.ensure(RuntimeFlavor::SoftwareFallback),
            FlavorRequest::Auto => match profile.runtime_flavor {
                RuntimeFlavor::SoftwareFallback => self.ensure(RuntimeFlavor::SoftwareFallback),
                RuntimeFlavor::Accelerated => match self.ensure(RuntimeFlavor::Accelerated) {
                    Ok(image) => Ok(image),
                    Err(e @ (ImageError::BuildFailure { .. } | ImageError::ImageNotFound { .. })) => {
                        log::warn!("Accelerated image unavailable ({}), using fallback", e);
                        self.ensure(RuntimeFlavor::SoftwareFallback)
                    }
                    Err(e) => Err(e),
                },
            },
        }
    }

    fn image_name(&self, flavor: RuntimeFlavor) -> String {
        self.image_override
            .clone()
            .unwrap_or_else(|| flavor.image_name().to_string())
    }

    fn ensure(&self, flavor: RuntimeFlavor) -> Result<RuntimeImageRef, ImageError> {
        let image_name = self.image_name(flavor);

        if !self.force_rebuild {
            let exists = self
                .runtime
                .image_exists(&image_name)
                .map_err(|e| ImageError::Runtime(e.to_string()))?;
            if exists {
                log::debug!("Image {} present", image_name);
                return Ok(RuntimeImageRef {
                    flavor,
                    image_name,
                    built: false,
                });
            }
            if !self.auto_build {
                return Err(ImageError::ImageNotFound {
                    image: image_name,
                    script: self.builder.script_hint(flavor),
                });
            }
        }

        self.builder.build(flavor, &image_name)?;
        Ok(RuntimeImageRef {
            flavor,
            image_name,
            built: true,
        })
    }
}
