use std::convert::Infallible;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::UnixStream;
use tokio::sync::watch;
use tracing::{debug, error, info};

use super::DeviceEvent;
use super::parser::RawEventParser;
use crate::config::TellstickConfig;

const READ_BUFFER: usize = 1024;

/// Whether the long-lived telldusd event connection is currently up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connected,
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("failed to connect: {0}")]
    Dial(#[source] std::io::Error),
    #[error("read failed: {0}")]
    Read(#[source] std::io::Error),
    #[error("{0} timed out after {1:?}")]
    Timeout(&'static str, Duration),
    #[error("socket closed by telldusd")]
    Closed,
}

/// Receives every event parsed from the daemon, in arrival order.
pub trait EventSink: Send + Sync {
    fn handle_event(&self, event: DeviceEvent) -> impl Future<Output = ()> + Send;
}

/// Keeps the telldusd event socket connected and feeds its records to a sink.
pub struct Supervisor {
    socket_path: PathBuf,
    reconnect_delay: Duration,
    dial_timeout: Duration,
    idle_timeout: Option<Duration>,
    state_tx: watch::Sender<LinkState>,
}

impl Supervisor {
    pub fn new(config: &TellstickConfig) -> Self {
        let (state_tx, _) = watch::channel(LinkState::Disconnected);
        Self {
            socket_path: config.socket_events.clone(),
            reconnect_delay: config.reconnect_delay,
            dial_timeout: config.socket_timeout,
            idle_timeout: config.event_idle_timeout,
            state_tx,
        }
    }

    /// Read-only view of the link state.
    pub fn link(&self) -> watch::Receiver<LinkState> {
        self.state_tx.subscribe()
    }

    /// Connect, read, reconnect after a fixed delay. Never returns.
    pub async fn run<S: EventSink>(&self, sink: &S) {
        loop {
            info!(
                "Connecting to telldusd events socket {}",
                self.socket_path.display()
            );

            let Err(e) = self.run_session(sink).await;
            error!(
                "telldusd connection error: {}. Please verify that '{}' is readable. Retry in {:?}",
                e,
                self.socket_path.display(),
                self.reconnect_delay
            );
            self.state_tx.send_replace(LinkState::Disconnected);
            tokio::time::sleep(self.reconnect_delay).await;
        }
    }

    /// Runs one connection until it fails; a session only ends in error.
    async fn run_session<S: EventSink>(&self, sink: &S) -> Result<Infallible, LinkError> {
        let connect = UnixStream::connect(&self.socket_path);
        let mut stream = tokio::time::timeout(self.dial_timeout, connect)
            .await
            .map_err(|_| LinkError::Timeout("connect", self.dial_timeout))?
            .map_err(LinkError::Dial)?;

        info!("Connected to telldusd events socket");
        self.state_tx.send_replace(LinkState::Connected);

        let mut parser = RawEventParser::new();
        let mut buf = [0u8; READ_BUFFER];
        loop {
            let n = match self.idle_timeout {
                Some(idle) => tokio::time::timeout(idle, stream.read(&mut buf))
                    .await
                    .map_err(|_| LinkError::Timeout("read", idle))?,
                None => stream.read(&mut buf).await,
            }
            .map_err(LinkError::Read)?;

            if n == 0 {
                return Err(LinkError::Closed);
            }
            debug!("Read {} bytes from telldusd", n);

            for event in parser.feed(&buf[..n]) {
                sink.handle_event(event).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::UnixListener;
    use tokio::sync::mpsc;

    struct ChannelSink(mpsc::UnboundedSender<DeviceEvent>);

    impl EventSink for ChannelSink {
        async fn handle_event(&self, event: DeviceEvent) {
            let _ = self.0.send(event);
        }
    }

    fn test_config(path: PathBuf) -> TellstickConfig {
        TellstickConfig {
            socket_events: path,
            socket_client: PathBuf::from("/nonexistent"),
            map_turn_on_to: String::new(),
            map_turn_off_to: String::new(),
            split_temperature_and_humidity: false,
            reverse_mapping_on_incoming: false,
            reconnect_delay: Duration::from_millis(50),
            socket_timeout: Duration::from_secs(1),
            event_idle_timeout: None,
        }
    }

    #[tokio::test]
    async fn test_reconnects_until_socket_appears_and_after_it_drops() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("TelldusEvents");
        let supervisor = Supervisor::new(&test_config(path.clone()));
        let mut link = supervisor.link();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(async move {
            let sink = ChannelSink(tx);
            supervisor.run(&sink).await;
        });

        // Let a few dials fail before the daemon shows up.
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(*link.borrow(), LinkState::Disconnected);

        let listener = UnixListener::bind(&path).unwrap();
        let timeout = Duration::from_secs(5);

        let (mut conn, _) = tokio::time::timeout(timeout, listener.accept())
            .await
            .unwrap()
            .unwrap();
        tokio::time::timeout(timeout, link.wait_for(|s| *s == LinkState::Connected))
            .await
            .unwrap()
            .unwrap();

        let body = "class:sensor;protocol:fineoffset;id:11;temp:4.5;";
        let record = format!("16:TDRawDeviceEvent{}:{}i1s", body.len(), body);
        conn.write_all(record.as_bytes()).await.unwrap();
        let event = tokio::time::timeout(timeout, rx.recv()).await.unwrap().unwrap();
        assert_eq!(event.id, "11");
        assert_eq!(event.temp, "4.5");

        drop(conn);
        tokio::time::timeout(timeout, link.wait_for(|s| *s == LinkState::Disconnected))
            .await
            .unwrap()
            .unwrap();

        // A second connection arrives after the fixed delay.
        let (_conn, _) = tokio::time::timeout(timeout, listener.accept())
            .await
            .unwrap()
            .unwrap();

        handle.abort();
    }

    #[tokio::test]
    async fn test_idle_timeout_counts_as_transport_loss() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("TelldusEvents");
        let listener = UnixListener::bind(&path).unwrap();

        let mut config = test_config(path);
        config.event_idle_timeout = Some(Duration::from_millis(50));
        let supervisor = Supervisor::new(&config);
        let (tx, _rx) = mpsc::unbounded_channel();
        let sink = ChannelSink(tx);

        let server = tokio::spawn(async move {
            let (conn, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(1)).await;
            drop(conn);
        });

        let result = supervisor.run_session(&sink).await;
        assert!(matches!(result, Err(LinkError::Timeout("read", _))));
        server.abort();
    }

    #[tokio::test]
    async fn test_missing_socket_is_a_dial_error() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = Supervisor::new(&test_config(dir.path().join("absent")));
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = supervisor.run_session(&ChannelSink(tx)).await;
        assert!(matches!(result, Err(LinkError::Dial(_))));
    }
}
