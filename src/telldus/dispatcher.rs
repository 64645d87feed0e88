use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::watch;
use tracing::debug;

use super::method::Method;
use super::protocol::{self, ResultCode};
use super::supervisor::LinkState;
use crate::config::TellstickConfig;

const RESPONSE_BUFFER: usize = 1024;

/// A canonical command for one telldusd device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceRequest {
    pub device_id: i32,
    pub method: Method,
    /// Only sent for [`Method::Dim`].
    pub level: u8,
}

impl DeviceRequest {
    pub fn encode(&self) -> String {
        match self.method {
            Method::Dim => protocol::request(
                self.method.daemon_function(),
                &[self.device_id, i32::from(self.level)],
            ),
            _ => protocol::request(self.method.daemon_function(), &[self.device_id]),
        }
    }
}

impl fmt::Display for DeviceRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.method {
            Method::Dim => write!(f, "dim device {} to {}", self.device_id, self.level),
            method => write!(f, "{} device {}", method, self.device_id),
        }
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to connect to {}: {source}", path.display())]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write request: {0}")]
    Write(#[source] std::io::Error),
    #[error("failed to read response: {0}")]
    Read(#[source] std::io::Error),
    #[error("{0} timed out after {1:?}")]
    Timeout(&'static str, Duration),
    #[error("unexpected response '{0}'")]
    BadResponse(String),
}

/// What happened to a single best-effort command.
#[derive(Debug)]
pub enum DispatchOutcome {
    Completed(ResultCode),
    /// The event connection is down, so the command was not sent.
    NotConnected,
    Failed(DispatchError),
}

pub trait Dispatch: Send + Sync {
    fn dispatch(&self, request: DeviceRequest) -> impl Future<Output = DispatchOutcome> + Send;
}

/// Sends commands over a fresh telldusd client socket per request.
pub struct CommandDispatcher {
    socket_path: PathBuf,
    timeout: Duration,
    link: watch::Receiver<LinkState>,
}

impl CommandDispatcher {
    pub fn new(config: &TellstickConfig, link: watch::Receiver<LinkState>) -> Self {
        Self {
            socket_path: config.socket_client.clone(),
            timeout: config.socket_timeout,
            link,
        }
    }

    async fn exchange(&self, request: &str) -> Result<ResultCode, DispatchError> {
        let timeout = self.timeout;
        let mut socket = tokio::time::timeout(timeout, UnixStream::connect(&self.socket_path))
            .await
            .map_err(|_| DispatchError::Timeout("connect", timeout))?
            .map_err(|source| DispatchError::Connect {
                path: self.socket_path.clone(),
                source,
            })?;

        tokio::time::timeout(timeout, socket.write_all(request.as_bytes()))
            .await
            .map_err(|_| DispatchError::Timeout("write", timeout))?
            .map_err(DispatchError::Write)?;

        let mut buf = [0u8; RESPONSE_BUFFER];
        let n = tokio::time::timeout(timeout, socket.read(&mut buf))
            .await
            .map_err(|_| DispatchError::Timeout("read", timeout))?
            .map_err(DispatchError::Read)?;

        let response = String::from_utf8_lossy(&buf[..n]);
        debug!("telldusd response: {}", response);
        protocol::parse_int(&response)
            .map(ResultCode)
            .ok_or_else(|| DispatchError::BadResponse(response.into_owned()))
    }
}

impl Dispatch for CommandDispatcher {
    async fn dispatch(&self, request: DeviceRequest) -> DispatchOutcome {
        let state = *self.link.borrow();
        if state != LinkState::Connected {
            return DispatchOutcome::NotConnected;
        }

        let message = request.encode();
        debug!("Sending to telldusd: {}", message);
        match self.exchange(&message).await {
            Ok(code) => DispatchOutcome::Completed(code),
            Err(e) => DispatchOutcome::Failed(e),
        }
    }
}
