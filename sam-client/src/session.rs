//! Stream sessions: the session-owning control connection plus per-operation connections.

use std::sync::Arc;

use sam_core::{CommandBuilder, Destination, KeyPair, SessionConfig, SessionIdentity, Style};
use tracing::info;

use crate::conn::SamConn;
use crate::control::ControlClient;
use crate::error::Result;
use crate::listener::StreamListener;

/// A `STYLE=STREAM` session. Closing it (or dropping it) ends the session on the bridge.
#[derive(Debug)]
pub struct StreamSession {
    config: Arc<SessionConfig>,
    identity: SessionIdentity,
    control: ControlClient,
    echoed: Option<String>,
}

impl StreamSession {
    /// Create a session with a transient destination and an id derived from the config.
    pub async fn create(config: SessionConfig) -> Result<Self> {
        let identity = config.identity();
        Self::create_with_identity(config, identity).await
    }

    /// Create a session under a persistent key pair.
    pub async fn create_with_keys(config: SessionConfig, keys: KeyPair) -> Result<Self> {
        let identity = config.identity().with_keys(keys);
        Self::create_with_identity(config, identity).await
    }

    pub async fn create_with_identity(
        config: SessionConfig,
        identity: SessionIdentity,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let commands =
            CommandBuilder::with_identity(&config, identity.clone())?.with_style(Style::Stream);
        let mut control = ControlClient::connect(&config).await?;
        let echoed = control.create_session(&commands, &[]).await?;
        info!(id = identity.id(), bridge = %control.bridge_addr(), "stream session ready");
        Ok(Self {
            config,
            identity,
            control,
            echoed,
        })
    }

    pub fn id(&self) -> &str {
        self.identity.id()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn keys(&self) -> Option<&KeyPair> {
        self.identity.keys()
    }

    /// Our public destination, when the session runs under known keys.
    pub fn local_destination(&self) -> Option<&Destination> {
        self.identity.keys().map(KeyPair::public)
    }

    /// Private destination string the bridge returned in `SESSION STATUS`.
    pub fn echoed_destination(&self) -> Option<&str> {
        self.echoed.as_deref()
    }

    pub fn version(&self) -> Option<&str> {
        self.control.version()
    }

    pub fn listen(&self) -> StreamListener {
        StreamListener::new(self.config.clone(), self.identity.clone())
    }

    /// Open an outbound stream on a fresh control connection.
    pub async fn connect(&self, destination: &Destination) -> Result<SamConn> {
        let commands = CommandBuilder::with_identity(&self.config, self.identity.clone())?;
        let client = ControlClient::connect(&self.config).await?;
        let conn = client.connect_stream(&commands, destination).await?;
        info!(id = self.id(), peer = %destination, "stream connected");
        Ok(conn)
    }

    /// Resolve `name`, then connect to it.
    pub async fn dial(&self, name: &str) -> Result<SamConn> {
        let destination = self.lookup(name).await?;
        self.connect(&destination).await
    }

    /// `NAMING LOOKUP` on a fresh control connection.
    pub async fn lookup(&self, name: &str) -> Result<Destination> {
        let mut client = ControlClient::connect(&self.config).await?;
        let destination = client.lookup(name).await?;
        client.close().await?;
        Ok(destination)
    }

    pub async fn close(self) -> Result<()> {
        info!(id = self.id(), "closing stream session");
        self.control.close().await?;
        Ok(())
    }
}
