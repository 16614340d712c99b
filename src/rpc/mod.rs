//! JSON-over-HTTP RPC surface for the device session.
//!
//! This module provides:
//! - The wire types via [`RpcRequest`] and [`RpcEnvelope`]
//! - The server side via [`RpcService`] and [`serve`]
//! - The typed client via [`RpcClient`]

mod client;
mod protocol;
mod server;

pub use client::{ClientError, DecodedImage, RpcClient, DEFAULT_TIMEOUT};
pub use protocol::{
    AutoCaptureParams, CaptureParams, ColorImageParams, ConnectParams, DepthImageParams,
    IrImageParams, Method, PingReply, RpcEnvelope, RpcRequest, DEFAULT_CAPTURE_TIMEOUT_MS,
    RPC_PATH,
};
pub use server::{router, serve, RpcService};
