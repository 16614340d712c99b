use clap::Parser;
use tracing_subscriber::EnvFilter;

use depthgate::cli::{self, Args, Command};
use depthgate::config::Config;
use depthgate::shutdown;

fn init_logging(verbose: bool) {
    let default = if verbose { "depthgate=debug" } else { "depthgate=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init_logging(args.verbose);

    let config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let result: Result<(), Box<dyn std::error::Error>> = match &args.command {
        Some(Command::Config { action }) => {
            cli::handle_config_action(action.clone(), &config, args.config.as_deref())
                .map_err(Into::into)
        }
        Some(Command::Detect) => cli::run_detect().await.map_err(Into::into),
        Some(Command::Serve(serve_args)) => {
            if let Err(e) = shutdown::install_handler() {
                log::warn!("Failed to install signal handler: {}", e);
            }
            cli::run_serve(serve_args, &config).await.map_err(Into::into)
        }
        None => {
            if let Err(e) = shutdown::install_handler() {
                log::warn!("Failed to install signal handler: {}", e);
            }
            cli::run_gateway(&args, &config).await.map_err(Into::into)
        }
    };

    if let Err(e) = result {
        log::error!("{}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
