//! TCP front end.
//!
//! Each accepted socket gets a reader loop and a writer task. The reader
//! frames input into requests for the relay, and the writer drains the
//! connection's outbox. Neither ever waits on a worker.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use protocol::{ClientRequest, ErrorCode, FrameError, MAX_FRAME_SIZE, Response, encode_line};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::actor::{RelayHandle, RelayMessage};
use crate::error::{Error, Result};
use crate::framing::{Frame, FrameBuffer};
use crate::pending::ConnectionId;

const READ_CHUNK: usize = 8 * 1024;
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct Server {
    listener: TcpListener,
    connection_timeout: Duration,
}

impl Server {
    pub async fn bind(host: &str, port: u16, connection_timeout: Duration) -> Result<Self> {
        let addr = format!("{host}:{port}");
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| Error::Bind { addr, source })?;
        Ok(Self {
            listener,
            connection_timeout,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` resolves.
    pub async fn serve(self, handle: RelayHandle, shutdown: impl Future<Output = ()>) -> Result<()> {
        let addr = self.local_addr()?;
        info!(%addr, "relay listening");
        tokio::pin!(shutdown);

        let mut next_connection: ConnectionId = 1;
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let connection = next_connection;
                        next_connection += 1;
                        debug!(connection, %peer, "accepted connection");
                        let handle = handle.clone();
                        let timeout = self.connection_timeout;
                        tokio::spawn(handle_connection(stream, connection, handle, timeout));
                    }
                    Err(err) => {
                        error!(error = %err, "failed to accept connection");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                () = &mut shutdown => {
                    info!("listener stopped");
                    return Ok(());
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    connection: ConnectionId,
    handle: RelayHandle,
    timeout: Duration,
) {
    let (mut reader, mut writer) = stream.into_split();
    let (outbox, mut responses) = mpsc::unbounded_channel::<Response>();
    if !handle.send(RelayMessage::Connected {
        connection,
        outbox: outbox.clone(),
    }) {
        return;
    }

    let writer_task = tokio::spawn(async move {
        while let Some(response) = responses.recv().await {
            let bytes = match encode_line(&response) {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(connection, error = %err, "failed to encode response");
                    continue;
                }
            };
            if let Err(err) = writer.write_all(&bytes).await {
                debug!(connection, error = %err, "write failed");
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    let mut frames = FrameBuffer::new(MAX_FRAME_SIZE);
    let mut chunk = vec![0u8; READ_CHUNK];
    'read: loop {
        let read = match tokio::time::timeout(timeout, reader.read(&mut chunk)).await {
            Err(_) => {
                info!(connection, "closing inactive connection");
                break;
            }
            Ok(Err(err)) => {
                debug!(connection, error = %err, "read failed");
                break;
            }
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => n,
        };

        for frame in frames.push(&chunk[..read]) {
            let request = match frame {
                Frame::Line(line) => ClientRequest::parse(&line),
                Frame::Oversized => Err(FrameError::new(
                    None,
                    ErrorCode::ParseError,
                    format!("frame exceeds {MAX_FRAME_SIZE} bytes"),
                )),
                Frame::InvalidUtf8 => Err(FrameError::new(
                    None,
                    ErrorCode::ParseError,
                    "frame is not valid UTF-8",
                )),
            };
            match request {
                Ok(mut request) => {
                    request.ensure_id();
                    if !handle.send(RelayMessage::Request {
                        connection,
                        request,
                    }) {
                        break 'read;
                    }
                }
                Err(err) => {
                    debug!(connection, error = %err, "bad frame");
                    let _ = outbox.send(err.into_response());
                }
            }
        }
    }

    debug!(connection, "connection closed");
    handle.send(RelayMessage::Disconnected { connection });
    drop(outbox);
    let _ = writer_task.await;
}
