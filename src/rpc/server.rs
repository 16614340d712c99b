//! RPC server hosting the device session.
//!
//! Serves `POST /rpc` with axum. Every request is answered with an
//! [`RpcEnvelope`]; session-protocol errors never fail the HTTP request.

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::response::Json;
use axum::routing::post;
use axum::Router;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpListener;

use super::protocol::{
    AutoCaptureParams, CaptureParams, ColorImageParams, ConnectParams, DepthImageParams,
    IrImageParams, Method, PingReply, RpcEnvelope, RpcRequest, RPC_PATH,
};
use crate::autocapture::AutoCapture;
use crate::driver::{Capture, SensorDriver};
use crate::imaging::{self, ColorFormat, DepthFormat, ImagePayload, ImagingError, IrFormat};
use crate::session::{DeviceSession, ErrorKind, SessionError, SessionPhase, SharedSession};

type Reply = RpcEnvelope<Value>;

/// The dispatch table: owns the one session and the auto-capture engine.
pub struct RpcService {
    session: SharedSession,
    auto: AutoCapture,
}

fn to_reply<T: Serialize>(message: impl Into<String>, payload: T) -> Reply {
    match serde_json::to_value(payload) {
        Ok(value) => RpcEnvelope::ok(message, Some(value)),
        Err(e) => RpcEnvelope::fail(ErrorKind::Internal, format!("Failed to encode reply: {}", e)),
    }
}

fn fail(e: SessionError) -> Reply {
    RpcEnvelope::fail(e.kind(), e.to_string())
}

fn parse_params<P: DeserializeOwned + Default>(params: Value) -> Result<P, Reply> {
    if params.is_null() {
        return Ok(P::default());
    }
    serde_json::from_value(params).map_err(|e| {
        RpcEnvelope::fail(ErrorKind::InvalidRequest, format!("Invalid params: {}", e))
    })
}

impl RpcService {
    pub fn new(driver: Arc<dyn SensorDriver>, lock_timeout: Duration) -> Self {
        let session = SharedSession::new(DeviceSession::new(driver), lock_timeout);
        Self {
            auto: AutoCapture::new(session.clone()),
            session,
        }
    }

    pub fn session(&self) -> &SharedSession {
        &self.session
    }

    pub fn auto_capture(&self) -> &AutoCapture {
        &self.auto
    }

    /// Parse a raw request body and dispatch it.
    pub async fn handle_body(&self, body: &[u8]) -> Reply {
        match serde_json::from_slice::<RpcRequest>(body) {
            Ok(request) => self.dispatch(request).await,
            Err(e) => RpcEnvelope::fail(ErrorKind::InvalidRequest, format!("Malformed request: {}", e)),
        }
    }

    pub async fn dispatch(&self, request: RpcRequest) -> Reply {
        let method: Method = match request.method.parse() {
            Ok(m) => m,
            Err(msg) => return RpcEnvelope::fail(ErrorKind::InvalidRequest, msg),
        };
        log::debug!("rpc {}", method);

        let reply = match self.call(method, request.params).await {
            Ok(reply) => reply,
            Err(reply) => reply,
        };
        if !reply.success {
            log::debug!("rpc {} failed: {}", method, reply.message);
        }
        reply
    }

    async fn call(&self, method: Method, params: Value) -> Result<Reply, Reply> {
        Ok(match method {
            Method::Ping => to_reply(
                "pong",
                PingReply {
                    pong: true,
                    version: env!("CARGO_PKG_VERSION").to_string(),
                },
            ),
            Method::DeviceConnect => {
                let p: ConnectParams = parse_params(params)?;
                let info = self
                    .session
                    .run(move |s| s.connect_value(p.config))
                    .await
                    .map_err(fail)?;
                to_reply(format!("Device {} connected", info.serial), info)
            }
            Method::DeviceStart => {
                self.session.run(|s| s.start()).await.map_err(fail)?;
                RpcEnvelope::ok("Device started", None)
            }
            Method::DeviceStop => {
                self.with_auto_paused(|s| s.stop()).await?;
                RpcEnvelope::ok("Device stopped", None)
            }
            Method::DeviceDisconnect => {
                self.with_auto_paused(|s| s.disconnect()).await?;
                self.auto.cache().clear();
                RpcEnvelope::ok("Device disconnected", None)
            }
            Method::GetDeviceInfo => {
                let mut info = self.session.acquire().await.map_err(fail)?.info();
                info.auto_capture = Some(self.auto.status());
                to_reply("ok", info)
            }
            Method::GetCapture => {
                let p: CaptureParams = parse_params(params)?;
                let timeout = Duration::from_millis(p.timeout_ms);
                let capture = self
                    .session
                    .run(move |s| s.get_capture(timeout))
                    .await
                    .map_err(fail)?;
                let summary = capture.summary();
                to_reply(format!("Capture {}", summary), summary)
            }
            Method::GetColorImage => {
                let p: ColorImageParams = parse_params(params)?;
                p.format.parse::<ColorFormat>().map_err(imaging_fail)?;
                let payload = self
                    .extract(move |c| imaging::color_payload(c, &p.format, p.quality))
                    .await?;
                to_reply(format!("{} color image", payload.format), payload)
            }
            Method::GetDepthImage => {
                let p: DepthImageParams = parse_params(params)?;
                p.format.parse::<DepthFormat>().map_err(imaging_fail)?;
                let payload = self
                    .extract(move |c| {
                        imaging::depth_payload(c, &p.format, p.min_depth, p.max_depth)
                    })
                    .await?;
                to_reply(format!("{} depth image", payload.format), payload)
            }
            Method::GetIrImage => {
                let p: IrImageParams = parse_params(params)?;
                p.format.parse::<IrFormat>().map_err(imaging_fail)?;
                let payload = self
                    .extract(move |c| imaging::ir_payload(c, &p.format))
                    .await?;
                to_reply(format!("{} IR image", payload.format), payload)
            }
            Method::StartAutoCapture => {
                let p: AutoCaptureParams = parse_params(params)?;
                let status = self.auto.start(p.interval_ms).await.map_err(fail)?;
                let message = if status.already_running {
                    "Auto capture already running"
                } else {
                    "Auto capture started"
                };
                to_reply(message, status)
            }
            Method::StopAutoCapture => to_reply("Auto capture stopped", self.auto.stop().await),
            Method::GetLatestCapture => match self.auto.cache().latest() {
                Some(frame) => to_reply("ok", frame.summary()),
                None => RpcEnvelope::fail(ErrorKind::NoFrameYet, "no frame yet"),
            },
        })
    }

    /// Run `op` with auto-capture stopped. On failure the session is
    /// unchanged, so the loop is put back as it was.
    async fn with_auto_paused<F>(&self, op: F) -> Result<(), Reply>
    where
        F: FnOnce(&mut DeviceSession) -> Result<(), SessionError> + Send + 'static,
    {
        let paused = self.auto.pause().await;
        match self.session.run(op).await {
            Ok(()) => Ok(()),
            Err(e) => {
                if let Some(paused) = paused {
                    self.auto.resume(paused);
                }
                Err(fail(e))
            }
        }
    }

    /// Encode from the current capture without holding the session lock
    /// during encoding.
    async fn extract<F>(&self, encode: F) -> Result<ImagePayload, Reply>
    where
        F: FnOnce(&Capture) -> Result<ImagePayload, ImagingError> + Send + 'static,
    {
        let capture = self
            .session
            .acquire()
            .await
            .map_err(fail)?
            .current_capture()
            .map_err(fail)?;
        tokio::task::spawn_blocking(move || encode(&capture))
            .await
            .map_err(|e| RpcEnvelope::fail(ErrorKind::Internal, format!("encode task failed: {}", e)))?
            .map_err(imaging_fail)
    }

    /// Stop auto-capture and release the device. Used on server shutdown.
    pub async fn shutdown(&self) {
        self.auto.stop().await;
        let result = self
            .session
            .run(|s| {
                if s.phase() == SessionPhase::Idle {
                    return Ok(());
                }
                s.disconnect()
            })
            .await;
        if let Err(e) = result {
            log::warn!("Device release during shutdown failed: {}", e);
        }
    }
}

fn imaging_fail(e: ImagingError) -> Reply {
    fail(SessionError::from(e))
}

async fn handle_rpc(State(service): State<Arc<RpcService>>, body: Bytes) -> Json<Reply> {
    Json(service.handle_body(&body).await)
}

pub fn router(service: Arc<RpcService>) -> Router {
    Router::new()
        .route(RPC_PATH, post(handle_rpc))
        .with_state(service)
}

/// Serve until `shutdown` resolves, then release the device.
pub async fn serve<F>(listener: TcpListener, service: Arc<RpcService>, shutdown: F) -> io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        log::info!("RPC server listening on http://{}{}", addr, RPC_PATH);
    }

    axum::serve(listener, router(Arc::clone(&service)))
        .with_graceful_shutdown(shutdown)
        .await?;

    log::info!("RPC server shutting down");
    service.shutdown().await;
    Ok(())
}
