//! Bidirectional stream handed out by accept and connect.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use sam_core::{Destination, StreamPeer};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

/// Stream to a remote destination. Bytes the control reader buffered past the reply lines
/// are returned first.
#[derive(Debug)]
pub struct SamConn {
    stream: TcpStream,
    pending: Vec<u8>,
    local: Option<Destination>,
    peer: StreamPeer,
}

impl SamConn {
    pub(crate) fn new(
        stream: TcpStream,
        pending: Vec<u8>,
        local: Option<Destination>,
        peer: StreamPeer,
    ) -> Self {
        Self {
            stream,
            pending,
            local,
            peer,
        }
    }

    pub fn local_destination(&self) -> Option<&Destination> {
        self.local.as_ref()
    }

    pub fn remote_destination(&self) -> &Destination {
        &self.peer.destination
    }

    pub fn peer(&self) -> &StreamPeer {
        &self.peer
    }

    pub fn from_port(&self) -> Option<u16> {
        self.peer.from_port
    }

    pub fn to_port(&self) -> Option<u16> {
        self.peer.to_port
    }

    /// Raw socket plus any bytes already read from it.
    pub fn into_parts(self) -> (TcpStream, Vec<u8>) {
        (self.stream, self.pending)
    }
}

impl AsyncRead for SamConn {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.pending.is_empty() {
            let n = this.pending.len().min(buf.remaining());
            buf.put_slice(&this.pending[..n]);
            this.pending.drain(..n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for SamConn {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}
