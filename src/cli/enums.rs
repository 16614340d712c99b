//! CLI enum types for flavor and runtime options.

use clap::ValueEnum;

use crate::config::RuntimeKind;
use crate::images::FlavorRequest;

/// Runtime image flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Flavor {
    #[default]
    Auto,
    Accelerated,
    Fallback,
}

impl From<Flavor> for FlavorRequest {
    fn from(f: Flavor) -> Self {
        match f {
            Flavor::Auto => FlavorRequest::Auto,
            Flavor::Accelerated => FlavorRequest::Accelerated,
            Flavor::Fallback => FlavorRequest::SoftwareFallback,
        }
    }
}

/// Backend hosting the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Runtime {
    #[default]
    Docker,
    Process,
}

impl From<Runtime> for RuntimeKind {
    fn from(r: Runtime) -> Self {
        match r {
            Runtime::Docker => RuntimeKind::Docker,
            Runtime::Process => RuntimeKind::Process,
        }
    }
}
