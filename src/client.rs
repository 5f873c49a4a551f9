//! Operator side of the protocol.
//!
//! The client turns operator input lines into batches, runs `/` commands
//! locally and keeps its connection under a [`HealthMonitor`].

use crate::commands::{self, CommandError, LocalCommand};
use crate::config::ClientConfig;
use crate::health::{
    ConnectionState, Connector, HealthError, HealthEvent, HealthMonitor, SharedTransport,
    TcpConnector, TcpTransport, Transport,
};
use crate::protocol::{self, ProtocolError, Response, WireMessage, KILL};
use std::io;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("server is not connected")]
    NotConnected,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Health(#[from] HealthError),
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// What handling one input line did.
#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    /// Message added to the pending batch.
    Queued { pending: usize },
    Sent { count: usize },
    /// Empty line with nothing pending.
    Idle,
    KillSent,
    Reconnected,
    /// `/connect` while connected under the ignore policy.
    AlreadyConnected,
    Devices(Vec<String>),
    Help(String),
    Exit,
}

pub struct Client<C: Connector> {
    config: ClientConfig,
    monitor: HealthMonitor<C>,
    batch: Vec<WireMessage>,
}

impl<C: Connector> Client<C> {
    /// Open the initial connection and start monitoring it.
    pub async fn connect(
        connector: C,
        config: ClientConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<HealthEvent<C::Transport>>), ClientError> {
        let transport = connector.connect(&config.server_addr).await?;
        info!(addr = %config.server_addr, "connected to server");

        let (mut monitor, events) = HealthMonitor::new(
            connector,
            config.server_addr.clone(),
            transport,
            config.health.clone(),
        );
        monitor.start();

        let client = Self {
            config,
            monitor,
            batch: Vec::new(),
        };
        Ok((client, events))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn monitor(&self) -> &HealthMonitor<C> {
        &self.monitor
    }

    pub fn state(&self) -> ConnectionState {
        self.monitor.state()
    }

    pub fn is_connected(&self) -> bool {
        self.monitor.is_connected()
    }

    pub fn transport(&self) -> SharedTransport<C::Transport> {
        self.monitor.transport()
    }

    pub fn pending(&self) -> &[WireMessage] {
        &self.batch
    }

    /// Send one batch as a single line. A failed write is handed to the
    /// health monitor.
    pub async fn send_batch(&self, messages: &[WireMessage]) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }

        let line = protocol::encode_batch(messages)?;
        self.write_line(&line).await?;
        debug!(count = messages.len(), "batch sent");
        Ok(())
    }

    /// Ask the server to shut down.
    pub async fn send_kill(&self) -> Result<(), ClientError> {
        self.write_line(KILL).await?;
        info!("kill command sent");
        Ok(())
    }

    async fn write_line(&self, line: &str) -> Result<(), ClientError> {
        let transport = self.monitor.transport();
        let result = transport.lock().await.write_line(line).await;
        if let Err(e) = result {
            warn!(error = %e, "write to server failed");
            self.monitor.report_failure();
            return Err(ClientError::Io(e));
        }
        Ok(())
    }

    /// Process one line of operator input.
    ///
    /// An empty line sends the pending batch; the batch is kept if sending
    /// fails. Lines starting with `/` are commands. Anything else is parsed as
    /// `<id> <value>...` and queued, but only while connected.
    pub async fn handle_line(&mut self, line: &str) -> Result<LineOutcome, ClientError> {
        let line = line.trim();

        if line.is_empty() {
            if self.batch.is_empty() {
                return Ok(LineOutcome::Idle);
            }
            self.send_batch(&self.batch).await?;
            let count = self.batch.len();
            self.batch.clear();
            return Ok(LineOutcome::Sent { count });
        }

        if commands::is_command(line) {
            let command: LocalCommand = line.parse()?;
            return self.run_command(command).await;
        }

        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }

        let message = protocol::parse_input_line(line)?;
        self.batch.push(message);
        Ok(LineOutcome::Queued {
            pending: self.batch.len(),
        })
    }

    pub async fn run_command(&mut self, command: LocalCommand) -> Result<LineOutcome, ClientError> {
        match command {
            LocalCommand::Exit => Ok(LineOutcome::Exit),
            LocalCommand::Kill => {
                self.send_kill().await?;
                Ok(LineOutcome::KillSent)
            }
            LocalCommand::Terminate => {
                self.send_kill().await?;
                Ok(LineOutcome::Exit)
            }
            LocalCommand::Connect => {
                if self.monitor.reconnect(self.config.connect_policy).await? {
                    Ok(LineOutcome::Reconnected)
                } else {
                    Ok(LineOutcome::AlreadyConnected)
                }
            }
            LocalCommand::Devices => Ok(LineOutcome::Devices(
                self.config.devices.iter().map(|d| d.describe()).collect(),
            )),
            LocalCommand::Help => Ok(LineOutcome::Help(LocalCommand::help_text())),
        }
    }

    /// Stop monitoring and close the current transport.
    pub async fn close(&mut self) -> Result<(), ClientError> {
        self.monitor.stop();
        let transport = self.monitor.transport();
        let result = transport.lock().await.close().await;
        result.map_err(ClientError::from)
    }
}

impl Client<TcpConnector> {
    /// Take the response reader of the current TCP connection. Yields `None`
    /// once it has already been taken.
    pub async fn take_responses(&self) -> Option<ResponseReader> {
        ResponseReader::from_transport(&self.monitor.transport()).await
    }
}

/// Reads server response lines from the read half of a TCP connection.
pub struct ResponseReader {
    lines: Lines<BufReader<OwnedReadHalf>>,
}

impl ResponseReader {
    pub fn new(reader: OwnedReadHalf) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
        }
    }

    pub async fn from_transport(transport: &SharedTransport<TcpTransport>) -> Option<Self> {
        transport.lock().await.take_reader().map(Self::new)
    }

    /// Next response, or `None` once the server closed the connection.
    /// Cancel safe.
    pub async fn next(&mut self) -> Result<Option<Response>, ClientError> {
        loop {
            match self.lines.next_line().await? {
                None => return Ok(None),
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => return Ok(Some(protocol::decode_response(&line)?)),
            }
        }
    }
}
