// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Socket transports.
//!
//! Simulators expose `com.apple.webinspectord` on a Unix-domain socket;
//! with a user-space proxy in between, the proxy listens on TCP and wants a
//! one-line JSON `{socketPath}` preamble before raw protocol bytes flow.
//! Device-mode callers hand us an already-connected USB-mux service stream
//! that frames records itself.

use bytes::{Bytes, BytesMut};
use serde_json::json;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{hexdump, Transport};
use crate::error::{Error, Result};

/// Tunables shared by all socket transports.
#[derive(Debug, Clone)]
pub struct SocketOpts {
    /// Read buffer size per `read` call.
    pub chunk_size: usize,
    /// Dump every frame at `trace` level.
    pub hexdump: bool,
}

impl Default for SocketOpts {
    fn default() -> Self {
        Self { chunk_size: 16 * 1024, hexdump: false }
    }
}

/// Connect to the simulator's inspector daemon over a Unix-domain socket.
pub async fn connect_unix(path: &str, opts: SocketOpts) -> Result<Transport> {
    let stream = UnixStream::connect(path)
        .await
        .map_err(|e| Error::Transport(format!("connect {path}: {e}")))?;
    debug!(path, "connected to webinspectord socket");
    Ok(spawn(stream, opts, false))
}

/// Connect over TCP (simulator daemons reachable through port forwarding).
pub async fn connect_tcp(addr: &str, opts: SocketOpts) -> Result<Transport> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| Error::Transport(format!("connect {addr}: {e}")))?;
    debug!(addr, "connected to webinspectord over tcp");
    Ok(spawn(stream, opts, false))
}

/// Connect through a user-space proxy: TCP, then a JSON `{socketPath}`
/// preamble naming the daemon socket the proxy should dial.
pub async fn connect_proxy(addr: &str, socket_path: &str, opts: SocketOpts) -> Result<Transport> {
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|e| Error::Transport(format!("connect proxy {addr}: {e}")))?;
    let preamble = format!("{}\n", json!({ "socketPath": socket_path }));
    stream
        .write_all(preamble.as_bytes())
        .await
        .map_err(|e| Error::Transport(format!("proxy preamble: {e}")))?;
    debug!(addr, socket_path, "proxy preamble sent");
    Ok(spawn(stream, opts, false))
}

/// Wrap an established device-service stream. The USB-mux Web Inspector
/// service frames records itself, so the transport is preframed.
pub fn from_device_stream<S>(stream: S, opts: SocketOpts) -> Transport
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    spawn(stream, opts, true)
}

/// Spawn reader/writer tasks around a duplex stream.
fn spawn<S>(stream: S, opts: SocketOpts, preframed: bool) -> Transport
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut read_half, mut write_half) = tokio::io::split(stream);
    let cancel = CancellationToken::new();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Bytes>(64);
    let (inbound_tx, inbound_rx) = mpsc::channel::<Bytes>(64);

    let writer_cancel = cancel.clone();
    let writer_opts = opts.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = writer_cancel.cancelled() => break,
                record = outbound_rx.recv() => {
                    let Some(record) = record else { break };
                    if writer_opts.hexdump {
                        trace!("send\n{}", hexdump(&record));
                    }
                    if let Err(e) = write_half.write_all(&record).await {
                        debug!(err = %e, "socket write failed");
                        writer_cancel.cancel();
                        break;
                    }
                }
            }
        }
    });

    let reader_cancel = cancel.clone();
    tokio::spawn(async move {
        let mut buf = BytesMut::with_capacity(opts.chunk_size);
        loop {
            buf.reserve(opts.chunk_size);
            tokio::select! {
                _ = reader_cancel.cancelled() => break,
                read = read_half.read_buf(&mut buf) => {
                    match read {
                        Ok(0) => {
                            debug!("socket closed by peer");
                            reader_cancel.cancel();
                            break;
                        }
                        Ok(_) => {
                            let chunk = buf.split().freeze();
                            if opts.hexdump {
                                trace!("recv\n{}", hexdump(&chunk));
                            }
                            if inbound_tx.send(chunk).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            debug!(err = %e, "socket read failed");
                            reader_cancel.cancel();
                            break;
                        }
                    }
                }
            }
        }
    });

    Transport::from_parts(outbound_tx, inbound_rx, cancel, preframed)
}
