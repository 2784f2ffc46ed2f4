//! Command rendering: config + session identity -> newline-terminated SAM command lines.
//!
//! Tokens are joined with single spaces and never compacted, so an omitted option leaves a
//! double space behind. The bridge tolerates this and it keeps output byte-stable.

use crate::config::{ConfigError, SessionConfig, Style};
use crate::identity::{Destination, SessionIdentity};

/// `HELLO VERSION MIN=.. MAX=..`
pub fn hello(config: &SessionConfig) -> String {
    format!(
        "HELLO VERSION MIN={} MAX={}\n",
        config.min_version(),
        config.max_version()
    )
}

/// `NAMING LOOKUP NAME=..`
pub fn lookup(name: &str) -> String {
    format!("NAMING LOOKUP NAME={}\n", name)
}

/// `DEST GENERATE SIGNATURE_TYPE=..`
pub fn generate_destination(config: &SessionConfig) -> String {
    format!("DEST GENERATE {}\n", config.signature_token())
}

fn line(tokens: &[&str]) -> String {
    let mut out = tokens.join(" ");
    out.push('\n');
    out
}

/// Renders the commands of one session. Borrows the config for the session's lifetime.
#[derive(Debug, Clone)]
pub struct CommandBuilder<'a> {
    config: &'a SessionConfig,
    identity: SessionIdentity,
    style: Option<Style>,
}

impl<'a> CommandBuilder<'a> {
    /// Builder with an identity derived from the config (random id if no tunnel name).
    pub fn new(config: &'a SessionConfig) -> Result<Self, ConfigError> {
        Self::with_identity(config, config.identity())
    }

    /// Fails if `config` does not validate; no command is rendered from an invalid config.
    pub fn with_identity(
        config: &'a SessionConfig,
        identity: SessionIdentity,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            identity,
            style: None,
        })
    }

    /// Override the configured style (datagram transports force `DATAGRAM`).
    pub fn with_style(mut self, style: Style) -> Self {
        self.style = Some(style);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        self.config
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    pub fn id(&self) -> &str {
        self.identity.id()
    }

    pub fn hello(&self) -> String {
        hello(self.config)
    }

    pub fn generate_destination(&self) -> String {
        generate_destination(self.config)
    }

    pub fn lookup(&self, name: &str) -> String {
        lookup(name)
    }

    fn style_token(&self) -> String {
        match self.style {
            Some(s) => format!("STYLE={}", s.as_str()),
            None => self.config.style_token(),
        }
    }

    fn ports_token(&self) -> String {
        self.config
            .ports_token(self.identity.from_port(), self.identity.to_port())
    }

    fn destination_token(&self) -> String {
        match self.identity.keys() {
            Some(keys) => format!("DESTINATION={}", keys.private()),
            None => "DESTINATION=TRANSIENT".to_string(),
        }
    }

    /// `SESSION CREATE` with every option token.
    pub fn create(&self) -> String {
        self.create_with(&[])
    }

    /// `SESSION CREATE` with extra trailing options (e.g. `PORT=` for datagram delivery).
    pub fn create_with(&self, extras: &[String]) -> String {
        let style = self.style_token();
        let ports = self.ports_token();
        let id = format!("ID={}", self.id());
        let dest = self.destination_token();
        let sig = self.config.signature_token();
        let opts = self.config.option_string();
        let mut tokens = vec![
            "SESSION CREATE",
            style.as_str(),
            ports.as_str(),
            id.as_str(),
            dest.as_str(),
            sig.as_str(),
            opts.as_str(),
        ];
        tokens.extend(extras.iter().map(String::as_str));
        line(&tokens)
    }

    /// `STREAM CONNECT ID=.. [FROM_PORT=.. TO_PORT=..] DESTINATION=..`
    pub fn connect(&self, dest: &Destination) -> String {
        let id = format!("ID={}", self.id());
        let ports = self.ports_token();
        let dest = format!("DESTINATION={}", dest);
        line(&["STREAM CONNECT", id.as_str(), ports.as_str(), dest.as_str()])
    }

    /// `STREAM ACCEPT ID=.. [FROM_PORT=.. TO_PORT=..] SILENT=false`
    pub fn accept(&self) -> String {
        let id = format!("ID={}", self.id());
        let ports = self.ports_token();
        line(&["STREAM ACCEPT", id.as_str(), ports.as_str(), "SILENT=false"])
    }
}
