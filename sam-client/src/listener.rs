//! Inbound streams. Each accept runs on its own control connection, raced against a deadline.

use std::sync::Arc;
use std::time::Duration;

use sam_core::{AcceptMachine, CommandBuilder, SessionConfig, SessionIdentity, Style};
use tracing::{debug, warn};

use crate::conn::SamConn;
use crate::control::ControlClient;
use crate::error::{Error, Result};

pub const DEFAULT_ACCEPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Accepts inbound streams for one session.
#[derive(Debug, Clone)]
pub struct StreamListener {
    config: Arc<SessionConfig>,
    identity: SessionIdentity,
    timeout: Duration,
}

impl StreamListener {
    pub(crate) fn new(config: Arc<SessionConfig>, identity: SessionIdentity) -> Self {
        Self {
            config,
            identity,
            timeout: DEFAULT_ACCEPT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn id(&self) -> &str {
        self.identity.id()
    }

    /// Wait for one inbound stream. On timeout the in-flight accept task is detached.
    pub async fn accept(&self) -> Result<SamConn> {
        let mut task = tokio::spawn(accept_once(self.config.clone(), self.identity.clone()));
        tokio::select! {
            joined = &mut task => match joined {
                Ok(res) => res,
                Err(e) => Err(Error::Task(e.to_string())),
            },
            _ = tokio::time::sleep(self.timeout) => {
                warn!(id = self.id(), timeout = ?self.timeout, "accept timed out");
                Err(Error::AcceptTimeout(self.timeout))
            }
        }
    }
}

async fn accept_once(config: Arc<SessionConfig>, identity: SessionIdentity) -> Result<SamConn> {
    let commands = CommandBuilder::with_identity(&config, identity)?.with_style(Style::Stream);
    let mut phase = AcceptMachine::new();
    phase.start();
    let client = match ControlClient::connect(&config).await {
        Ok(c) => c,
        Err(e) => {
            phase.fail();
            return Err(e);
        }
    };
    let conn = client.accept_stream(&commands, &mut phase).await?;
    debug!(id = commands.id(), peer = %conn.remote_destination(), "stream accepted");
    Ok(conn)
}
