//! One control connection to the bridge: line-oriented request/reply over TCP.

use std::io;
use std::net::SocketAddr;

use sam_core::state::Outcome;
use sam_core::{
    AcceptMachine, CommandBuilder, ControlMachine, ControlState, Destination, KeyPair, Request,
    SessionConfig, StreamPeer,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::conn::SamConn;
use crate::error::{Error, Result};

/// Handshaken control connection. Issues one command at a time.
#[derive(Debug)]
pub struct ControlClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    machine: ControlMachine,
    bridge: SocketAddr,
    local: SocketAddr,
}

impl ControlClient {
    /// Open a TCP connection to the configured bridge and complete `HELLO`.
    pub async fn connect(config: &SessionConfig) -> Result<Self> {
        let bridge = &config.bridge;
        let stream = TcpStream::connect((bridge.host.as_str(), bridge.port)).await?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        let local = stream.local_addr()?;
        let (read, write) = stream.into_split();
        let mut client = Self {
            reader: BufReader::new(read),
            writer: write,
            machine: ControlMachine::new(),
            bridge: peer,
            local,
        };
        client.hello(config).await?;
        Ok(client)
    }

    async fn hello(&mut self, config: &SessionConfig) -> Result<()> {
        self.machine.hello_sent()?;
        self.write_line(&sam_core::emit::hello(config)).await?;
        let line = self.read_line().await?.ok_or(Error::Closed)?;
        let version = self.machine.on_hello_reply(&line)?;
        debug!(bridge = %self.bridge, version, "handshake complete");
        Ok(())
    }

    pub fn state(&self) -> ControlState {
        self.machine.state()
    }

    /// Version agreed in the handshake.
    pub fn version(&self) -> Option<&str> {
        self.machine.version()
    }

    pub fn bridge_addr(&self) -> SocketAddr {
        self.bridge
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Next reply line, `None` on EOF.
    async fn read_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(line))
    }

    /// Send one command and read its single reply line.
    async fn request(&mut self, req: Request, command: &str) -> Result<Outcome> {
        self.machine.begin(req)?;
        trace!(command = req.name(), "sending");
        if let Err(e) = self.write_line(command).await {
            self.machine.close();
            return Err(e);
        }
        let line = match self.read_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                self.machine.close();
                return Err(Error::Closed);
            }
            Err(e) => {
                self.machine.close();
                return Err(e);
            }
        };
        Ok(self.machine.on_reply(&line)?)
    }

    /// `DEST GENERATE` with the configured signature type.
    pub async fn generate_destination(&mut self, config: &SessionConfig) -> Result<KeyPair> {
        let command = sam_core::emit::generate_destination(config);
        match self.request(Request::DestGenerate, &command).await? {
            Outcome::Keys(keys) => Ok(keys),
            other => Err(unexpected(other)),
        }
    }

    /// `NAMING LOOKUP`: resolve a name or b32 address.
    pub async fn lookup(&mut self, name: &str) -> Result<Destination> {
        let command = sam_core::emit::lookup(name);
        match self.request(Request::Lookup, &command).await? {
            Outcome::Resolved(dest) => {
                debug!(name, "name resolved");
                Ok(dest)
            }
            other => Err(unexpected(other)),
        }
    }

    /// `SESSION CREATE`. The session lives as long as this connection stays open.
    /// Returns the private destination the bridge echoed, if any.
    pub async fn create_session(
        &mut self,
        commands: &CommandBuilder<'_>,
        extras: &[String],
    ) -> Result<Option<String>> {
        let command = commands.create_with(extras);
        match self.request(Request::SessionCreate, &command).await? {
            Outcome::SessionCreated(echoed) => {
                debug!(id = commands.id(), "session created");
                Ok(echoed)
            }
            other => Err(unexpected(other)),
        }
    }

    /// `STREAM CONNECT`. On success the connection becomes the data stream.
    pub async fn connect_stream(
        mut self,
        commands: &CommandBuilder<'_>,
        destination: &Destination,
    ) -> Result<SamConn> {
        match self
            .request(Request::StreamConnect, &commands.connect(destination))
            .await?
        {
            Outcome::StreamOk => {}
            other => return Err(unexpected(other)),
        }
        let identity = commands.identity();
        let peer = StreamPeer {
            destination: destination.clone(),
            from_port: nonzero(identity.from_port()),
            to_port: nonzero(identity.to_port()),
        };
        let local = identity.keys().map(|k| k.public().clone());
        self.into_conn(local, peer)
    }

    /// `STREAM ACCEPT`: wait for the status line, then the peer destination line.
    /// `phase` must already be started.
    pub async fn accept_stream(
        mut self,
        commands: &CommandBuilder<'_>,
        phase: &mut AcceptMachine,
    ) -> Result<SamConn> {
        match self.accept_handshake(commands, phase).await {
            Ok(peer) => {
                let local = commands.identity().keys().map(|k| k.public().clone());
                self.into_conn(local, peer)
            }
            Err(e) => {
                phase.fail();
                self.machine.close();
                Err(e)
            }
        }
    }

    async fn accept_handshake(
        &mut self,
        commands: &CommandBuilder<'_>,
        phase: &mut AcceptMachine,
    ) -> Result<StreamPeer> {
        self.machine.begin(Request::StreamAccept)?;
        self.write_line(&commands.accept()).await?;
        phase.accept_sent();
        let status = self.read_line().await?.ok_or(Error::Closed)?;
        phase.on_status(&status)?;
        trace!(id = commands.id(), "accept status ok, waiting for peer");
        let dest_line = self.read_line().await?;
        let peer = phase.on_destination(dest_line.as_deref())?;
        self.machine.close();
        Ok(peer)
    }

    /// Release the control connection. Any session bound to it ends.
    pub async fn close(mut self) -> io::Result<()> {
        self.machine.close();
        self.writer.shutdown().await
    }

    /// Hand the socket over as a data stream, keeping bytes already buffered.
    fn into_conn(self, local: Option<Destination>, peer: StreamPeer) -> Result<SamConn> {
        let pending = self.reader.buffer().to_vec();
        let stream = self
            .reader
            .into_inner()
            .reunite(self.writer)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(SamConn::new(stream, pending, local, peer))
    }
}

fn nonzero(port: u16) -> Option<u16> {
    (port != 0).then_some(port)
}

fn unexpected(outcome: Outcome) -> Error {
    Error::Reply(sam_core::ReplyError::Malformed(format!(
        "unexpected outcome {outcome:?}"
    )))
}
