//! Build script discovery and execution.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use super::ImageError;
use crate::container::{run_checked, RuntimeError};
use crate::detect::RuntimeFlavor;

/// Upper bound on a single image build.
pub const BUILD_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Variable carrying the target image name into the build script.
pub const IMAGE_ENV: &str = "DEPTHGATE_IMAGE";

/// Runs the per-flavor build scripts.
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    search_dirs: Vec<PathBuf>,
    timeout: Duration,
}

impl ImageBuilder {
    /// Search `extra_dirs` first, then `./docker`, then the user data dir.
    pub fn new(extra_dirs: Vec<PathBuf>) -> Self {
        let mut search_dirs = extra_dirs;
        search_dirs.push(PathBuf::from("docker"));
        if let Some(data) = dirs::data_dir() {
            search_dirs.push(data.join("depthgate").join("docker"));
        }
        Self::with_search_dirs(search_dirs)
    }

    /// Search exactly `search_dirs`.
    pub fn with_search_dirs(search_dirs: Vec<PathBuf>) -> Self {
        Self {
            search_dirs,
            timeout: BUILD_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn search_dirs(&self) -> &[PathBuf] {
        &self.search_dirs
    }

    pub fn find_script(&self, flavor: RuntimeFlavor) -> Option<PathBuf> {
        self.search_dirs
            .iter()
            .map(|dir| dir.join(flavor.build_script()))
            .find(|path| path.is_file())
    }

    /// Where the script for `flavor` would be expected, for hints.
    pub fn script_hint(&self, flavor: RuntimeFlavor) -> PathBuf {
        self.find_script(flavor)
            .unwrap_or_else(|| Path::new("docker").join(flavor.build_script()))
    }

    /// Build `image` with the script for `flavor`.
    pub fn build(&self, flavor: RuntimeFlavor, image: &str) -> Result<(), ImageError> {
        let script = self.find_script(flavor).ok_or_else(|| ImageError::BuildFailure {
            flavor,
            reason: format!(
                "build script {} not found (searched {})",
                flavor.build_script(),
                self.search_dirs
                    .iter()
                    .map(|d| d.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        })?;

        let script = script.canonicalize().unwrap_or(script);
        log::info!("Building {} image {} with {}", flavor, image, script.display());

        let mut cmd = Command::new("sh");
        cmd.arg(&script).arg(image).env(IMAGE_ENV, image);
        if let Some(dir) = script.parent().filter(|d| !d.as_os_str().is_empty()) {
            cmd.current_dir(dir);
        }

        match run_checked(cmd, self.timeout, "build") {
            Ok(_) => {
                log::info!("Built {}", image);
                Ok(())
            }
            Err(e) => {
                let reason = match e {
                    RuntimeError::Failed { stderr, .. } if !stderr.is_empty() => {
                        format!("build script exited non-zero: {}", stderr)
                    }
                    RuntimeError::Failed { .. } => "build script exited non-zero".to_string(),
                    other => other.to_string(),
                };
                Err(ImageError::BuildFailure { flavor, reason })
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_script(dir: &Path, flavor: RuntimeFlavor, body: &str) {
        std::fs::write(dir.join(flavor.build_script()), body).unwrap();
    }

    #[test]
    fn test_first_search_dir_wins() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        write_script(first.path(), RuntimeFlavor::Accelerated, "exit 0\n");
        write_script(second.path(), RuntimeFlavor::Accelerated, "exit 0\n");

        let builder = ImageBuilder::with_search_dirs(vec![
            first.path().to_path_buf(),
            second.path().to_path_buf(),
        ]);
        let found = builder.find_script(RuntimeFlavor::Accelerated).unwrap();
        assert!(found.starts_with(first.path()));
        assert!(builder.find_script(RuntimeFlavor::SoftwareFallback).is_none());
    }

    #[test]
    fn test_script_gets_image_name_and_cwd() {
        let dir = TempDir::new().unwrap();
        write_script(
            dir.path(),
            RuntimeFlavor::SoftwareFallback,
            "echo \"$1 $DEPTHGATE_IMAGE\" > built.txt\n",
        );
        let builder = ImageBuilder::with_search_dirs(vec![dir.path().to_path_buf()]);
        builder
            .build(RuntimeFlavor::SoftwareFallback, "my-image")
            .unwrap();

        let built = std::fs::read_to_string(dir.path().join("built.txt")).unwrap();
        assert_eq!(built.trim(), "my-image my-image");
    }

    #[test]
    fn test_missing_script_is_build_failure() {
        let dir = TempDir::new().unwrap();
        let builder = ImageBuilder::with_search_dirs(vec![dir.path().to_path_buf()]);
        let err = builder.build(RuntimeFlavor::Accelerated, "img").unwrap_err();
        match err {
            ImageError::BuildFailure { flavor, reason } => {
                assert_eq!(flavor, RuntimeFlavor::Accelerated);
                assert!(reason.contains("build-accelerated.sh"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_non_zero_exit_is_build_failure() {
        let dir = TempDir::new().unwrap();
        write_script(
            dir.path(),
            RuntimeFlavor::Accelerated,
            "echo 'no cuda base image' >&2\nexit 2\n",
        );
        let builder = ImageBuilder::with_search_dirs(vec![dir.path().to_path_buf()]);
        let err = builder.build(RuntimeFlavor::Accelerated, "img").unwrap_err();
        assert!(err.to_string().contains("no cuda base image"));
    }

    #[test]
    fn test_build_timeout_is_build_failure() {
        let dir = TempDir::new().unwrap();
        write_script(dir.path(), RuntimeFlavor::SoftwareFallback, "sleep 5\n");
        let builder = ImageBuilder::with_search_dirs(vec![dir.path().to_path_buf()])
            .with_timeout(Duration::from_millis(200));
        let err = builder
            .build(RuntimeFlavor::SoftwareFallback, "img")
            .unwrap_err();
        assert!(matches!(err, ImageError::BuildFailure { .. }));
        assert!(err.to_string().contains("timed out"));
    }
}
