//! Command-line interface definitions and helpers.

mod args;
mod commands;
mod enums;

pub use args::{Args, Command, ConfigAction, ServeArgs};
pub use commands::{gateway_options, handle_config_action, run_detect, run_gateway, run_serve};
pub use enums::{Flavor, Runtime};
