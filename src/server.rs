//! TCP front end for a [`Ship`].
//!
//! Each accepted connection gets its own task that reads newline-delimited
//! frames, routes every message of a batch to the registry and answers with one
//! response line per message. A `__kill__` line from any peer shuts the whole
//! service down.

use crate::config::ServerConfig;
use crate::device::Message;
use crate::protocol::{self, Frame, ProtocolError, Response, WireMessage, MAX_LINE_SIZE};
use crate::ship::Ship;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Requests shutdown of a running [`Server`] from outside.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    signal: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.signal.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.signal.borrow()
    }
}

pub struct Server {
    listener: TcpListener,
    ship: Arc<Ship>,
    shutdown: ShutdownHandle,
}

impl Server {
    pub async fn bind(config: &ServerConfig, ship: Arc<Ship>) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        let (signal, _) = watch::channel(false);

        Ok(Self {
            listener,
            ship,
            shutdown: ShutdownHandle {
                signal: Arc::new(signal),
            },
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn ship(&self) -> &Arc<Ship> {
        &self.ship
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Accept connections until shutdown is requested, then stop the
    /// registry's scheduler and return.
    pub async fn run(self) -> Result<(), ServerError> {
        let addr = self.local_addr()?;
        let mut stop = self.shutdown.signal.subscribe();
        info!(%addr, "server listening");

        while !*stop.borrow() {
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        info!(%peer, "new connection");
                        let ship = Arc::clone(&self.ship);
                        let shutdown = self.shutdown.clone();
                        let stop = self.shutdown.signal.subscribe();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, peer, ship, shutdown, stop).await {
                                warn!(%peer, error = %e, "connection error");
                            }
                            info!(%peer, "connection closed");
                        });
                    }
                    Err(e) => error!(error = %e, "failed to accept connection"),
                },
            }
        }

        self.ship.stop();
        info!(%addr, "server stopped");
        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    ship: Arc<Ship>,
    shutdown: ShutdownHandle,
    mut stop: watch::Receiver<bool>,
) -> io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        // `wait_for` sees a shutdown that happened before this task started.
        let read = tokio::select! {
            read = read_bounded_line(&mut reader, &mut buf, MAX_LINE_SIZE) => read?,
            _ = stop.wait_for(|stopped| *stopped) => return Ok(()),
        };

        let responses = match read {
            LineRead::Eof => return Ok(()),
            LineRead::TooLong(len) => {
                let e = ProtocolError::MessageTooLarge(len);
                warn!(%peer, error = %e, "discarding oversized line");
                vec![Response::error("", format!("failed to parse message: {}", e))]
            }
            LineRead::Line => {
                let line = String::from_utf8_lossy(&buf);
                match protocol::parse_frame(&line) {
                    Ok(Frame::Heartbeat) | Ok(Frame::Empty) => continue,
                    Ok(Frame::Kill) => {
                        warn!(%peer, "received kill command, shutting down");
                        shutdown.shutdown();
                        return Ok(());
                    }
                    Ok(Frame::Batch(batch)) => route_batch(&ship, batch, peer),
                    Err(e) => {
                        warn!(%peer, error = %e, "error parsing message");
                        vec![Response::error("", format!("failed to parse message: {}", e))]
                    }
                }
            }
        };

        for response in &responses {
            write_response(&mut writer, response).await?;
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum LineRead {
    Eof,
    Line,
    /// The line was consumed but not kept. Carries its full length.
    TooLong(usize),
}

/// Read one `\n`-terminated line into `buf`, keeping at most `limit` bytes in
/// memory. Bytes of a longer line are consumed and dropped up to its newline.
async fn read_bounded_line<R>(reader: &mut R, buf: &mut Vec<u8>, limit: usize) -> io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let mut total = 0;

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            if total == 0 {
                return Ok(LineRead::Eof);
            }
            break;
        }

        let (chunk, done) = match available.iter().position(|&b| b == b'\n') {
            Some(end) => (&available[..=end], true),
            None => (available, false),
        };
        let len = chunk.len();
        total += len;
        if total <= limit {
            buf.extend_from_slice(chunk);
        } else {
            buf.clear();
        }
        reader.consume(len);

        if done {
            break;
        }
    }

    if total > limit {
        Ok(LineRead::TooLong(total))
    } else {
        Ok(LineRead::Line)
    }
}

fn route_batch(ship: &Ship, batch: Vec<WireMessage>, peer: SocketAddr) -> Vec<Response> {
    batch
        .into_iter()
        .map(|wire| {
            let message = Message::from_wire(wire.clone(), peer.to_string());
            match ship.handle_message(&message) {
                Ok(()) => {
                    debug!(%peer, device = %wire.id, "message handled");
                    Response::success(&wire)
                }
                Err(e) => {
                    warn!(%peer, device = %wire.id, error = %e, "error handling message");
                    Response::error(wire.id, e)
                }
            }
        })
        .collect()
}

async fn write_response(writer: &mut OwnedWriteHalf, response: &Response) -> io::Result<()> {
    let mut line = protocol::encode_response(response)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await
}
