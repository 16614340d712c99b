//! Host acceleration detection.
//!
//! Detection is advisory: it only picks the default flavor, and callers may
//! override it. It never fails; any probing error means software fallback.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::container::ContainerRuntime;

/// Helper binaries whose presence means GPU pass-through is installed.
pub const HELPER_BINARIES: [&str; 2] = ["nvidia-container-runtime", "nvidia-container-toolkit"];

/// Acceleration strategy of a runtime image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeFlavor {
    Accelerated,
    SoftwareFallback,
}

impl RuntimeFlavor {
    pub fn as_str(self) -> &'static str {
        match self {
            RuntimeFlavor::Accelerated => "accelerated",
            RuntimeFlavor::SoftwareFallback => "fallback",
        }
    }

    /// Default image name for this flavor.
    pub fn image_name(self) -> &'static str {
        match self {
            RuntimeFlavor::Accelerated => "depthgate-accelerated",
            RuntimeFlavor::SoftwareFallback => "depthgate-fallback",
        }
    }

    /// Script that builds [`image_name`](Self::image_name).
    pub fn build_script(self) -> &'static str {
        match self {
            RuntimeFlavor::Accelerated => "build-accelerated.sh",
            RuntimeFlavor::SoftwareFallback => "build-fallback.sh",
        }
    }
}

impl fmt::Display for RuntimeFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of probing the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityProfile {
    pub acceleration_available: bool,
    pub runtime_flavor: RuntimeFlavor,
    /// Which signal decided the result
    pub evidence: String,
}

impl CapabilityProfile {
    fn accelerated(evidence: String) -> Self {
        Self {
            acceleration_available: true,
            runtime_flavor: RuntimeFlavor::Accelerated,
            evidence,
        }
    }

    fn fallback(evidence: String) -> Self {
        Self {
            acceleration_available: false,
            runtime_flavor: RuntimeFlavor::SoftwareFallback,
            evidence,
        }
    }
}

/// Search `path` (a `PATH`-style list) for an executable named `name`.
pub fn find_on_path(name: &str, path: &OsString) -> Option<PathBuf> {
    std::env::split_paths(path)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Probes helper binaries, then the container runtime.
#[derive(Debug, Clone)]
pub struct CapabilityDetector {
    helper_binaries: Vec<String>,
    search_path: Option<OsString>,
}

impl Default for CapabilityDetector {
    fn default() -> Self {
        Self {
            helper_binaries: HELPER_BINARIES.iter().map(|s| s.to_string()).collect(),
            search_path: std::env::var_os("PATH"),
        }
    }
}

impl CapabilityDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Search this `PATH` list instead of the process environment.
    pub fn with_search_path(mut self, path: OsString) -> Self {
        self.search_path = Some(path);
        self
    }

    /// Detect acceleration support. The first positive signal wins.
    pub fn detect(&self, runtime: &dyn ContainerRuntime) -> CapabilityProfile {
        if let Some(path) = &self.search_path {
            for helper in &self.helper_binaries {
                if let Some(found) = find_on_path(helper, path) {
                    log::debug!("Acceleration helper found at {}", found.display());
                    return CapabilityProfile::accelerated(format!(
                        "helper binary {}",
                        found.display()
                    ));
                }
            }
        }

        match runtime.reports_acceleration() {
            Ok(true) => {
                CapabilityProfile::accelerated(format!("{} reports a GPU runtime", runtime.name()))
            }
            Ok(false) => CapabilityProfile::fallback("no acceleration signal".to_string()),
            Err(e) => {
                log::info!("Acceleration detection inconclusive, using fallback: {}", e);
                CapabilityProfile::fallback(format!("detection inconclusive: {}", e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::testing::FakeRuntime;
    use tempfile::TempDir;

    fn empty_path() -> (TempDir, OsString) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().as_os_str().to_os_string();
        (dir, path)
    }

    #[cfg(unix)]
    #[test]
    fn test_helper_binary_short_circuits() {
        use std::os::unix::fs::PermissionsExt;

        let (dir, path) = empty_path();
        let helper = dir.path().join("nvidia-container-toolkit");
        std::fs::write(&helper, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&helper, std::fs::Permissions::from_mode(0o755)).unwrap();

        let runtime = FakeRuntime::new();
        let profile = CapabilityDetector::new()
            .with_search_path(path)
            .detect(&runtime);
        assert!(profile.acceleration_available);
        assert_eq!(profile.runtime_flavor, RuntimeFlavor::Accelerated);
        assert!(profile.evidence.contains("nvidia-container-toolkit"));
    }

    #[cfg(unix)]
    #[test]
    fn test_non_executable_helper_ignored() {
        let (dir, path) = empty_path();
        std::fs::write(dir.path().join("nvidia-container-runtime"), "").unwrap();
        let runtime = FakeRuntime::new();
        let profile = CapabilityDetector::new()
            .with_search_path(path)
            .detect(&runtime);
        assert_eq!(profile.runtime_flavor, RuntimeFlavor::SoftwareFallback);
    }

    #[test]
    fn test_runtime_signal() {
        let (_dir, path) = empty_path();
        let runtime = FakeRuntime::new().with_acceleration(Ok(true));
        let profile = CapabilityDetector::new()
            .with_search_path(path)
            .detect(&runtime);
        assert_eq!(profile.runtime_flavor, RuntimeFlavor::Accelerated);
    }

    #[test]
    fn test_probe_error_falls_back() {
        let (_dir, path) = empty_path();
        let runtime = FakeRuntime::new().with_acceleration(Err("daemon down".to_string()));
        let profile = CapabilityDetector::new()
            .with_search_path(path)
            .detect(&runtime);
        assert!(!profile.acceleration_available);
        assert_eq!(profile.runtime_flavor, RuntimeFlavor::SoftwareFallback);
        assert!(profile.evidence.contains("inconclusive"));
    }

    #[test]
    fn test_flavor_names() {
        assert_eq!(RuntimeFlavor::Accelerated.image_name(), "depthgate-accelerated");
        assert_eq!(RuntimeFlavor::SoftwareFallback.build_script(), "build-fallback.sh");
        assert_eq!(RuntimeFlavor::SoftwareFallback.to_string(), "fallback");
    }
}
