//! Launch specification for an environment.

use std::path::PathBuf;

use crate::detect::RuntimeFlavor;

/// Label put on every container this crate starts.
pub const MANAGED_LABEL: &str = "depthgate.managed=true";

/// Mount point of the working directory inside the container.
pub const CONTAINER_WORKDIR: &str = "/workspace";

const X11_SOCKET_DIR: &str = "/tmp/.X11-unix";

/// Everything a runtime needs to start one environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub image: String,
    pub flavor: RuntimeFlavor,
    /// Host device nodes to pass through
    pub devices: Vec<PathBuf>,
    pub port: u16,
    /// Host directory mounted at [`CONTAINER_WORKDIR`]
    pub workdir: Option<PathBuf>,
    /// Display target passed through as `DISPLAY`
    pub display: Option<String>,
}

impl LaunchSpec {
    pub fn new(image: impl Into<String>, flavor: RuntimeFlavor, port: u16) -> Self {
        Self {
            image: image.into(),
            flavor,
            devices: Vec::new(),
            port,
            workdir: None,
            display: None,
        }
    }

    /// Acceleration and display variables for the environment. Opaque
    /// pass-through values.
    pub fn environment(&self) -> Vec<(String, String)> {
        let mut env: Vec<(String, String)> = match self.flavor {
            RuntimeFlavor::Accelerated => vec![
                ("NVIDIA_VISIBLE_DEVICES".to_string(), "all".to_string()),
                ("NVIDIA_DRIVER_CAPABILITIES".to_string(), "all".to_string()),
            ],
            RuntimeFlavor::SoftwareFallback => vec![
                ("LIBGL_ALWAYS_SOFTWARE".to_string(), "1".to_string()),
                ("GALLIUM_DRIVER".to_string(), "llvmpipe".to_string()),
            ],
        };
        if let Some(display) = &self.display {
            env.push(("DISPLAY".to_string(), display.clone()));
        }
        env
    }

    /// Arguments for the server inside the environment.
    pub fn server_args(&self, bind_host: &str) -> Vec<String> {
        vec![
            "serve".to_string(),
            "--host".to_string(),
            bind_host.to_string(),
            "--port".to_string(),
            self.port.to_string(),
        ]
    }

    /// Full `docker run` argument list (without the leading `docker`).
    ///
    /// No `--rm`: an environment that dies during startup must keep its logs
    /// until they are read. The runtime removes the container on stop.
    pub fn docker_args(&self) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "run".into(),
            "-d".into(),
            "--label".into(),
            MANAGED_LABEL.into(),
        ];

        if self.flavor == RuntimeFlavor::Accelerated {
            args.extend(["--gpus".to_string(), "all".to_string()]);
        }

        for device in &self.devices {
            args.push("--device".into());
            args.push(device.display().to_string());
        }

        if self.display.is_some() {
            args.push("-v".into());
            args.push(format!("{}:{}:rw", X11_SOCKET_DIR, X11_SOCKET_DIR));
        }

        if let Some(workdir) = &self.workdir {
            args.push("-v".into());
            args.push(format!("{}:{}:rw", workdir.display(), CONTAINER_WORKDIR));
            args.push("-w".into());
            args.push(CONTAINER_WORKDIR.into());
        }

        args.push("-p".into());
        args.push(format!("{}:{}", self.port, self.port));

        for (key, value) in self.environment() {
            args.push("-e".into());
            args.push(format!("{}={}", key, value));
        }

        args.push(self.image.clone());
        args.extend(self.server_args("0.0.0.0"));
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(args: &[String], value: &str) -> Option<usize> {
        args.iter().position(|a| a == value)
    }

    #[test]
    fn test_fallback_spec_has_no_gpu() {
        let spec = LaunchSpec::new("depthgate-fallback", RuntimeFlavor::SoftwareFallback, 8001);
        let args = spec.docker_args();
        assert!(position(&args, "--gpus").is_none());
        assert!(position(&args, "--rm").is_none());
        assert_eq!(&args[..2], &["run", "-d"]);
        assert!(args.contains(&"LIBGL_ALWAYS_SOFTWARE=1".to_string()));
        assert!(args.contains(&"8001:8001".to_string()));
    }

    #[test]
    fn test_accelerated_spec_requests_gpu() {
        let spec = LaunchSpec::new("depthgate-accelerated", RuntimeFlavor::Accelerated, 8000);
        let args = spec.docker_args();
        let gpus = position(&args, "--gpus").unwrap();
        assert_eq!(args[gpus + 1], "all");
        assert!(args.contains(&"NVIDIA_VISIBLE_DEVICES=all".to_string()));
    }

    #[test]
    fn test_devices_listed_individually() {
        let mut spec = LaunchSpec::new("img", RuntimeFlavor::SoftwareFallback, 8000);
        spec.devices = vec![
            PathBuf::from("/dev/bus/usb/002/003"),
            PathBuf::from("/dev/bus/usb/002/005"),
        ];
        let args = spec.docker_args();
        assert_eq!(args.iter().filter(|a| *a == "--device").count(), 2);
        assert!(!args.iter().any(|a| a.starts_with("/dev:")));
    }

    #[test]
    fn test_image_precedes_server_command() {
        let mut spec = LaunchSpec::new("img", RuntimeFlavor::SoftwareFallback, 9000);
        spec.display = Some(":0".to_string());
        spec.workdir = Some(PathBuf::from("/home/me/project"));
        let args = spec.docker_args();

        let image = position(&args, "img").unwrap();
        assert_eq!(
            &args[image + 1..],
            &["serve", "--host", "0.0.0.0", "--port", "9000"]
        );
        assert!(args.contains(&"DISPLAY=:0".to_string()));
        assert!(args.contains(&"/home/me/project:/workspace:rw".to_string()));
    }
}
