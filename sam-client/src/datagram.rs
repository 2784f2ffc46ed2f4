//! Datagram sessions: `STYLE=DATAGRAM` over the control connection, frames over UDP.

use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sam_core::chunk::{self, SendPlan};
use sam_core::datagram::{encode_frame, parse_inbound};
use sam_core::{
    CommandBuilder, DatagramHeader, DatagramOptions, Destination, KeyPair, SessionConfig,
    SessionIdentity, Style, MAX_DATAGRAM_SIZE,
};
use tokio::net::UdpSocket;
use tracing::{debug, info, trace, warn};

use crate::control::ControlClient;
use crate::error::{Error, Result};

/// Pause between consecutive chunks of one payload.
pub const CHUNK_PAUSE: Duration = Duration::from_millis(50);
/// Extra room in receive buffers for the source destination and separator.
pub const RECV_SLACK: usize = 4096;
const POOL_CAPACITY: usize = 8;

/// Reusable receive buffers.
#[derive(Debug, Default)]
struct BufferPool {
    free: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    fn take(&self, len: usize) -> Vec<u8> {
        let mut buf = self
            .free
            .lock()
            .ok()
            .and_then(|mut free| free.pop())
            .unwrap_or_default();
        buf.resize(len, 0);
        buf
    }

    fn give(&self, buf: Vec<u8>) {
        if let Ok(mut free) = self.free.lock() {
            if free.len() < POOL_CAPACITY {
                free.push(buf);
            }
        }
    }
}

/// A datagram session. Outbound frames carry a header line; inbound frames are
/// `<source> <payload>` and are only accepted from the bridge's address.
#[derive(Debug)]
pub struct DatagramSession {
    config: Arc<SessionConfig>,
    identity: SessionIdentity,
    control: ControlClient,
    socket: UdpSocket,
    bridge_udp: SocketAddr,
    options: Option<DatagramOptions>,
    remote: Option<Destination>,
    pool: BufferPool,
}

impl DatagramSession {
    /// Bind a UDP socket on `udp_port` (0 picks one), then create the session with
    /// `PORT=`/`HOST=` pointing the bridge at it. `options` selects the extended header.
    /// The session id comes from the config's tunnel name, or is generated.
    pub async fn create(
        config: SessionConfig,
        udp_port: u16,
        options: Option<DatagramOptions>,
    ) -> Result<Self> {
        let identity = config.identity();
        Self::create_with_identity(config, identity, udp_port, options).await
    }

    pub async fn create_with_identity(
        config: SessionConfig,
        identity: SessionIdentity,
        udp_port: u16,
        options: Option<DatagramOptions>,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let commands =
            CommandBuilder::with_identity(&config, identity.clone())?.with_style(Style::Datagram);
        let mut control = ControlClient::connect(&config).await?;
        let bind = SocketAddr::new(control.local_addr().ip(), udp_port);
        let socket = UdpSocket::bind(bind).await?;
        let local = socket.local_addr()?;
        let bridge_udp = SocketAddr::new(control.bridge_addr().ip(), config.datagram_port);
        let extras = [
            format!("PORT={}", local.port()),
            format!("HOST={}", local.ip()),
        ];
        control.create_session(&commands, &extras).await?;
        info!(id = identity.id(), udp = %local, bridge = %bridge_udp, "datagram session ready");
        Ok(Self {
            config,
            identity,
            control,
            socket,
            bridge_udp,
            options,
            remote: None,
            pool: BufferPool::default(),
        })
    }

    pub fn id(&self) -> &str {
        self.identity.id()
    }

    pub fn keys(&self) -> Option<&KeyPair> {
        self.identity.keys()
    }

    pub fn local_port(&self) -> Result<u16> {
        Ok(self.socket.local_addr()?.port())
    }

    pub fn bridge_addr(&self) -> SocketAddr {
        self.bridge_udp
    }

    pub fn remote(&self) -> Option<&Destination> {
        self.remote.as_ref()
    }

    /// Fix the destination used by [`send`](Self::send).
    pub fn dial(&mut self, destination: Destination) {
        self.remote = Some(destination);
    }

    /// `NAMING LOOKUP` on a fresh control connection.
    pub async fn lookup(&self, name: &str) -> Result<Destination> {
        let mut client = ControlClient::connect(&self.config).await?;
        let destination = client.lookup(name).await?;
        client.close().await?;
        Ok(destination)
    }

    pub async fn send(&self, payload: &[u8]) -> Result<usize> {
        let remote = self.remote.as_ref().ok_or(Error::NoRemote)?;
        self.send_to(payload, remote).await
    }

    /// Send one payload. Payloads above the recommended size go out as numbered chunks;
    /// payloads above the hard limit are rejected before any I/O.
    pub async fn send_to(&self, payload: &[u8], destination: &Destination) -> Result<usize> {
        let header = DatagramHeader::new(self.id(), destination, self.options);
        match chunk::plan(payload.len())? {
            SendPlan::Single => {
                let frame = encode_frame(&header, payload);
                self.socket.send_to(&frame, self.bridge_udp).await?;
                trace!(len = payload.len(), "datagram sent");
                Ok(payload.len())
            }
            SendPlan::Chunked { chunk_size, total } => {
                debug!(len = payload.len(), total, "sending chunked datagram");
                send_chunked(&header, payload, chunk_size, total, |frame| async move {
                    self.socket.send_to(&frame, self.bridge_udp).await
                })
                .await
            }
        }
    }

    /// Receive one datagram into `buf`. Frames from any address other than the bridge are
    /// dropped. If the payload does not fit, `buf` is filled and `BufferTooSmall` is returned
    /// with the full payload length, for payloads up to the maximum datagram size.
    pub async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, Destination)> {
        let mut frame = self.pool.take(buf.len().max(MAX_DATAGRAM_SIZE) + RECV_SLACK);
        let result = self.recv_frame(&mut frame, buf).await;
        self.pool.give(frame);
        result
    }

    async fn recv_frame(&self, frame: &mut [u8], buf: &mut [u8]) -> Result<(usize, Destination)> {
        loop {
            let (n, from) = self.socket.recv_from(frame).await?;
            if !from_bridge(from, self.bridge_udp.ip()) {
                warn!(%from, "dropping datagram from non-bridge address");
                continue;
            }
            return deliver(&frame[..n], buf);
        }
    }

    pub async fn recv_timeout(
        &self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<(usize, Destination)> {
        match tokio::time::timeout(timeout, self.recv_from(buf)).await {
            Ok(res) => res,
            Err(_) => Err(Error::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                "datagram receive timed out",
            ))),
        }
    }

    /// Close the control connection, then the UDP socket. The control failure wins if both fail.
    pub async fn close(self) -> Result<()> {
        info!(id = self.id(), "closing datagram session");
        let control = self.control.close().await;
        let data = self.socket.into_std().map(drop);
        close_outcome(control, data)
    }
}

/// Send `payload` as numbered chunks through `send`, pausing between chunks. Stops at the
/// first failing chunk and reports how many payload bytes went out before it.
async fn send_chunked<F, Fut>(
    header: &DatagramHeader,
    payload: &[u8],
    chunk_size: usize,
    total: usize,
    mut send: F,
) -> Result<usize>
where
    F: FnMut(Vec<u8>) -> Fut,
    Fut: Future<Output = io::Result<usize>>,
{
    let mut delivered = 0;
    for (index, range) in chunk::split_into_chunks(payload.len(), chunk_size)
        .into_iter()
        .enumerate()
    {
        if index > 0 {
            tokio::time::sleep(CHUNK_PAUSE).await;
        }
        let chunk_header = header.clone().with_chunk(index, total);
        let frame = encode_frame(&chunk_header, &payload[range.clone()]);
        if let Err(source) = send(frame).await {
            warn!(index, total, delivered, error = %source, "chunk send failed");
            return Err(Error::PartialDelivery {
                chunk: index,
                total,
                delivered,
                source,
            });
        }
        delivered += range.len();
    }
    Ok(delivered)
}

fn close_outcome(control: io::Result<()>, data: io::Result<()>) -> Result<()> {
    match (control, data) {
        (Err(c), Err(d)) => {
            warn!(error = %d, "datagram socket close failed");
            Err(c.into())
        }
        (Err(c), Ok(())) => Err(c.into()),
        (Ok(()), Err(d)) => Err(d.into()),
        (Ok(()), Ok(())) => Ok(()),
    }
}

fn from_bridge(from: SocketAddr, bridge: IpAddr) -> bool {
    from.ip() == bridge
}

fn deliver(frame: &[u8], buf: &mut [u8]) -> Result<(usize, Destination)> {
    let (from, payload) = parse_inbound(frame)?;
    if payload.len() > buf.len() {
        let copied = buf.len();
        buf.copy_from_slice(&payload[..copied]);
        return Err(Error::BufferTooSmall {
            copied,
            frame_len: payload.len(),
            from,
        });
    }
    buf[..payload.len()].copy_from_slice(payload);
    Ok((payload.len(), from))
}
