//! Subcommand handlers.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::args::{Args, ConfigAction, ServeArgs};
use crate::config::{default_path, Config, ConfigError};
use crate::container::DockerRuntime;
use crate::detect::CapabilityDetector;
use crate::driver::SimulatedDriver;
use crate::gateway::{resolve_image, Gateway, GatewayError, GatewayOptions};
use crate::rpc::{serve, RpcService};
use crate::shutdown;

/// Apply CLI flags on top of the loaded configuration.
pub fn gateway_options(args: &Args, config: &Config) -> GatewayOptions {
    let mut options = GatewayOptions::from_config(config);
    if let Some(host) = &args.host {
        options.host = host.clone();
    }
    if let Some(port) = args.port {
        options.port = Some(port);
    }
    if let Some(timeout) = args.timeout {
        options.startup_timeout = Duration::from_secs(timeout);
    }
    if let Some(flavor) = args.flavor {
        options.flavor = flavor.into();
    }
    if let Some(image) = &args.image {
        options.image = Some(image.clone());
    }
    if let Some(runtime) = args.runtime {
        options.runtime = runtime.into();
    }
    if args.no_auto_build {
        options.auto_build = false;
    }
    options.auto_start = !args.no_auto_start;
    options.force_rebuild = args.force_rebuild;
    options
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error: {}", e),
    }
}

/// Default action: open the gateway, report, optionally hold, then close.
pub async fn run_gateway(args: &Args, config: &Config) -> Result<(), GatewayError> {
    let options = gateway_options(args, config);

    if args.build_only {
        let runtime = options.build_runtime()?;
        let (_, image) = resolve_image(&options, runtime).await?;
        println!(
            "Image ready: {} ({}{})",
            image.image_name,
            image.flavor,
            if image.built { ", built" } else { "" }
        );
        return Ok(());
    }

    let gateway = Gateway::open(options).await?;
    print_json(&gateway.info());

    let device = gateway.get_device_info().await?;
    log::info!(
        "Device driver '{}' ({}), state {:?}",
        device.driver,
        if device.simulation_mode { "simulated" } else { "hardware" },
        device.state
    );

    if args.hold {
        println!("Environment running. Press Ctrl+C to stop.");
        shutdown::wait_for_signal().await;
    }

    gateway.close().await
}

/// Run the RPC server until a shutdown signal arrives.
pub async fn run_serve(serve_args: &ServeArgs, config: &Config) -> std::io::Result<()> {
    let serial = serve_args
        .serial
        .clone()
        .or_else(|| config.server.serial.clone());
    let driver = match serial {
        Some(serial) => SimulatedDriver::new(serial),
        None => SimulatedDriver::default(),
    };
    let lock_timeout = Duration::from_millis(
        serve_args
            .lock_timeout_ms
            .unwrap_or(config.server.lock_timeout_ms),
    );

    let listener =
        tokio::net::TcpListener::bind((serve_args.host.as_str(), serve_args.port)).await?;
    let service = Arc::new(RpcService::new(Arc::new(driver), lock_timeout));
    serve(listener, service, shutdown::wait_for_signal()).await
}

/// Print the capability profile as JSON.
pub async fn run_detect() -> Result<(), GatewayError> {
    let profile = tokio::task::spawn_blocking(|| {
        CapabilityDetector::new().detect(&DockerRuntime::default())
    })
    .await
    .map_err(|e| GatewayError::Task(e.to_string()))?;
    print_json(&profile);
    Ok(())
}

/// Handle config subcommand actions.
pub fn handle_config_action(
    action: ConfigAction,
    config: &Config,
    path: Option<&Path>,
) -> Result<(), ConfigError> {
    let config_path = path.map(Path::to_path_buf).unwrap_or_else(default_path);
    match action {
        ConfigAction::Show => {
            let rendered = toml::to_string_pretty(config).map_err(|e| {
                ConfigError::SerializeError {
                    path: config_path.clone(),
                    source: e,
                }
            })?;
            println!("{}", rendered);
            if config_path.exists() {
                println!("# Config file: {} (exists)", config_path.display());
            } else {
                println!("# Config file: {} (not found)", config_path.display());
            }
        }
        ConfigAction::Init => {
            if config_path.exists() {
                eprintln!("Config file already exists: {}", config_path.display());
                eprintln!("Use 'depthgate config show' to view current settings.");
                return Ok(());
            }
            Config::default().save(&config_path)?;
            println!("Created config file: {}", config_path.display());
        }
    }
    Ok(())
}
