//! CLI argument parsing with clap.

use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

use super::enums::{Flavor, Runtime};

/// Gateway to a depth/color sensor running in an isolated environment
#[derive(Parser, Debug)]
#[command(name = "depthgate")]
#[command(version, about = "Depth camera gateway", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Host the environment is reached on
    #[arg(long)]
    pub host: Option<String>,

    /// First port to try for the environment
    #[arg(long)]
    pub port: Option<u16>,

    /// Seconds to wait for the environment to become ready
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Runtime image flavor
    #[arg(long, value_enum)]
    pub flavor: Option<Flavor>,

    /// Image name to use instead of the flavor default
    #[arg(long)]
    pub image: Option<String>,

    /// Debug logging
    #[arg(long, short)]
    pub verbose: bool,

    /// Connect to an already running server instead of starting one
    #[arg(long)]
    pub no_auto_start: bool,

    /// Fail instead of building a missing image
    #[arg(long)]
    pub no_auto_build: bool,

    /// Resolve and build the image, then exit
    #[arg(long)]
    pub build_only: bool,

    /// Rebuild the image even if it exists
    #[arg(long)]
    pub force_rebuild: bool,

    /// Backend hosting the environment
    #[arg(long, value_enum)]
    pub runtime: Option<Runtime>,

    /// Keep the environment running until Ctrl+C
    #[arg(long)]
    pub hold: bool,

    /// Config file path
    #[arg(long, short)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the RPC server in the foreground (inside the environment)
    Serve(ServeArgs),
    /// Print the host's acceleration capability
    Detect,
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ServeArgs {
    /// Address to bind
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port to bind
    #[arg(long, default_value = "8000")]
    pub port: u16,

    /// Longest a request waits for the session lock, in milliseconds
    #[arg(long)]
    pub lock_timeout_ms: Option<u64>,

    /// Serial reported by the simulated sensor
    #[arg(long)]
    pub serial: Option<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
    /// Create default config file
    Init,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["depthgate"]);
        assert!(args.command.is_none());
        assert!(args.host.is_none());
        assert!(args.port.is_none());
        assert!(args.flavor.is_none());
        assert!(!args.verbose);
        assert!(!args.no_auto_start);
        assert!(!args.no_auto_build);
        assert!(!args.build_only);
        assert!(!args.hold);
    }

    #[test]
    fn test_args_flavor_values() {
        let args = Args::parse_from(["depthgate", "--flavor", "auto"]);
        assert_eq!(args.flavor, Some(Flavor::Auto));

        let args = Args::parse_from(["depthgate", "--flavor", "accelerated"]);
        assert_eq!(args.flavor, Some(Flavor::Accelerated));

        let args = Args::parse_from(["depthgate", "--flavor", "fallback"]);
        assert_eq!(args.flavor, Some(Flavor::Fallback));

        assert!(Args::try_parse_from(["depthgate", "--flavor", "quantum"]).is_err());
    }

    #[test]
    fn test_args_gateway_flags() {
        let args = Args::parse_from([
            "depthgate",
            "--host",
            "10.0.0.2",
            "--port",
            "9000",
            "--timeout",
            "120",
            "--image",
            "custom:dev",
            "--no-auto-build",
            "--build-only",
            "--runtime",
            "process",
            "-v",
        ]);
        assert_eq!(args.host.as_deref(), Some("10.0.0.2"));
        assert_eq!(args.port, Some(9000));
        assert_eq!(args.timeout, Some(120));
        assert_eq!(args.image.as_deref(), Some("custom:dev"));
        assert!(args.no_auto_build);
        assert!(args.build_only);
        assert_eq!(args.runtime, Some(Runtime::Process));
        assert!(args.verbose);
    }

    #[test]
    fn test_args_serve_subcommand() {
        let args = Args::parse_from(["depthgate", "serve", "--host", "0.0.0.0", "--port", "8123"]);
        match args.command {
            Some(Command::Serve(serve)) => {
                assert_eq!(serve.host, "0.0.0.0");
                assert_eq!(serve.port, 8123);
                assert!(serve.lock_timeout_ms.is_none());
            }
            _ => panic!("Expected Serve subcommand"),
        }
    }

    #[test]
    fn test_args_serve_defaults() {
        let args = Args::parse_from(["depthgate", "serve"]);
        match args.command {
            Some(Command::Serve(serve)) => {
                assert_eq!(serve.host, "127.0.0.1");
                assert_eq!(serve.port, 8000);
            }
            _ => panic!("Expected Serve subcommand"),
        }
    }

    #[test]
    fn test_args_detect_subcommand() {
        let args = Args::parse_from(["depthgate", "detect"]);
        assert!(matches!(args.command, Some(Command::Detect)));
    }

    #[test]
    fn test_args_config_subcommands() {
        let args = Args::parse_from(["depthgate", "config", "show"]);
        assert!(matches!(
            args.command,
            Some(Command::Config {
                action: ConfigAction::Show
            })
        ));

        let args = Args::parse_from(["depthgate", "-c", "/tmp/test.toml", "config", "init"]);
        assert_eq!(args.config, Some(PathBuf::from("/tmp/test.toml")));
        assert!(matches!(
            args.command,
            Some(Command::Config {
                action: ConfigAction::Init
            })
        ));
    }
}
