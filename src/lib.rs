//! depthgate library crate.
//!
//! Exposes the gateway components: capability detection, image selection,
//! environment supervision, the device session and its RPC surface.

pub mod autocapture;
pub mod cli;
pub mod config;
pub mod container;
pub mod detect;
pub mod driver;
pub mod gateway;
pub mod images;
pub mod imaging;
pub mod rpc;
pub mod session;
pub mod shutdown;
pub mod supervisor;

pub use gateway::{Gateway, GatewayError, GatewayInfo, GatewayOptions};
