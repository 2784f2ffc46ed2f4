//! Session configuration: every tunable transport parameter and its `key=value` rendering.
//!
//! A [`SessionConfig`] is built once through [`SessionConfig::builder`], validated in
//! `build()`, and read-only afterwards. Each option group is a named sub-struct with its own
//! pure serializer; an omitted option renders as an empty string so command layouts stay
//! fixed.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::identity::SessionIdentity;

pub const DEFAULT_BRIDGE_HOST: &str = "127.0.0.1";
pub const DEFAULT_BRIDGE_PORT: u16 = 7656;
/// UDP port the bridge listens on for outbound datagrams.
pub const DEFAULT_DATAGRAM_PORT: u16 = 7655;
pub const DEFAULT_SIGNATURE_TYPE: &str = "EdDSA_SHA512_Ed25519";
pub const DEFAULT_SAM_MIN: &str = "3.0";
pub const DEFAULT_SAM_MAX: &str = "3.3";
/// Leaseset encryption types used when the option is explicitly set to an empty value.
pub const DEFAULT_LEASESET_ENC_TYPE: &str = "4";
/// Leaseset encryption types used when the option was never configured.
pub const UNSET_LEASESET_ENC_TYPE: &str = "4,0";

/// Configuration error; always raised before any command is built.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid leaseset encryption type {token:?} in {value:?}")]
    InvalidLeaseSetEncType { value: String, token: String },
    #[error("invalid bridge address: {0}")]
    InvalidAddress(String),
    #[error("invalid tunnel name: {0:?}")]
    InvalidTunnelName(String),
    #[error("invalid access list entry: {0:?}")]
    InvalidAccessListEntry(String),
}

/// SAM protocol version in `major.minor` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SamVersion {
    pub major: u8,
    pub minor: u8,
}

impl SamVersion {
    pub const V3_0: SamVersion = SamVersion { major: 3, minor: 0 };
    pub const V3_1: SamVersion = SamVersion { major: 3, minor: 1 };
    pub const V3_3: SamVersion = SamVersion { major: 3, minor: 3 };

    /// Parse `major.minor` (or bare `major`); falls back to 3.1 when unparsable.
    pub fn parse_or_default(s: &str) -> Self {
        s.parse().unwrap_or(Self::V3_1)
    }
}

impl FromStr for SamVersion {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (major, minor) = match s.split_once('.') {
            Some((a, b)) => (a, b),
            None => (s, "0"),
        };
        Ok(SamVersion {
            major: major.parse().map_err(|_| ())?,
            minor: minor.parse().map_err(|_| ())?,
        })
    }
}

impl fmt::Display for SamVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Control-channel address of the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeAddr {
    pub host: String,
    pub port: u16,
}

impl BridgeAddr {
    /// Parse `host` or `host:port`. A missing port means the default control port.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ConfigError::InvalidAddress(s.to_string()));
        }
        // Bracketed IPv6 with or without a port.
        if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| ConfigError::InvalidAddress(s.to_string()))?;
            let port = match tail.strip_prefix(':') {
                Some(p) => parse_port(p, s)?,
                None if tail.is_empty() => DEFAULT_BRIDGE_PORT,
                None => return Err(ConfigError::InvalidAddress(s.to_string())),
            };
            return Ok(BridgeAddr {
                host: host.to_string(),
                port,
            });
        }
        match s.split_once(':') {
            Some((host, port)) if !host.is_empty() && !port.contains(':') => Ok(BridgeAddr {
                host: host.to_string(),
                port: parse_port(port, s)?,
            }),
            Some(_) => Err(ConfigError::InvalidAddress(s.to_string())),
            None => Ok(BridgeAddr {
                host: s.to_string(),
                port: DEFAULT_BRIDGE_PORT,
            }),
        }
    }
}

fn parse_port(p: &str, whole: &str) -> Result<u16, ConfigError> {
    p.parse()
        .map_err(|_| ConfigError::InvalidAddress(whole.to_string()))
}

impl Default for BridgeAddr {
    fn default() -> Self {
        Self {
            host: DEFAULT_BRIDGE_HOST.to_string(),
            port: DEFAULT_BRIDGE_PORT,
        }
    }
}

impl fmt::Display for BridgeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Session transport style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Style {
    Stream,
    Datagram,
    Raw,
}

impl Style {
    pub fn as_str(&self) -> &'static str {
        match self {
            Style::Stream => "STREAM",
            Style::Datagram => "DATAGRAM",
            Style::Raw => "RAW",
        }
    }
}

/// Style, signature and port options of `SESSION CREATE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub style: Option<Style>,
    pub signature_type: Option<String>,
    pub from_port: u16,
    pub to_port: u16,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            style: Some(Style::Stream),
            signature_type: Some(DEFAULT_SIGNATURE_TYPE.to_string()),
            from_port: 0,
            to_port: 0,
        }
    }
}

/// Tunnel direction; selects the `inbound.` / `outbound.` prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    fn prefix(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Shape of the tunnels in one direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelOptions {
    pub length: u8,
    pub length_variance: i8,
    pub quantity: u8,
    pub backup_quantity: u8,
    pub allow_zero_hop: bool,
}

impl Default for TunnelOptions {
    fn default() -> Self {
        Self {
            length: 3,
            length_variance: 1,
            quantity: 2,
            backup_quantity: 3,
            allow_zero_hop: false,
        }
    }
}

impl TunnelOptions {
    fn length_token(&self, dir: Direction) -> String {
        format!("{}.length={}", dir.prefix(), self.length)
    }

    fn variance_token(&self, dir: Direction) -> String {
        format!("{}.lengthVariance={}", dir.prefix(), self.length_variance)
    }

    fn backup_token(&self, dir: Direction) -> String {
        format!("{}.backupQuantity={}", dir.prefix(), self.backup_quantity)
    }

    fn quantity_token(&self, dir: Direction) -> String {
        format!("{}.quantity={}", dir.prefix(), self.quantity)
    }

    fn zero_hop_token(&self, dir: Direction) -> String {
        if self.allow_zero_hop {
            format!("{}.allowZeroHop=true", dir.prefix())
        } else {
            String::new()
        }
    }
}

/// Bridge-side idle policy: shrink the tunnel pool or close the session when idle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdleOptions {
    pub reduce_on_idle: bool,
    pub reduce_idle_time: Duration,
    pub reduce_quantity: u8,
    pub close_on_idle: bool,
}

impl Default for IdleOptions {
    fn default() -> Self {
        Self {
            reduce_on_idle: false,
            reduce_idle_time: Duration::from_secs(15 * 60),
            reduce_quantity: 1,
            close_on_idle: false,
        }
    }
}

impl IdleOptions {
    /// `i2cp.reduceOnIdle=true i2cp.reduceIdleTime=<ms> i2cp.reduceQuantity=<n>` or empty.
    pub fn reduce_tokens(&self) -> String {
        if !self.reduce_on_idle {
            return String::new();
        }
        format!(
            "i2cp.reduceOnIdle=true i2cp.reduceIdleTime={} i2cp.reduceQuantity={}",
            self.reduce_idle_time.as_millis(),
            self.reduce_quantity
        )
    }

    /// `i2cp.closeOnIdle=true i2cp.closeIdleTime=<ms>` or empty.
    pub fn close_tokens(&self, idle_timeout: Duration) -> String {
        if !self.close_on_idle {
            return String::new();
        }
        format!(
            "i2cp.closeOnIdle=true i2cp.closeIdleTime={}",
            idle_timeout.as_millis()
        )
    }
}

/// Leaseset encryption and private-leaseset keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeaseSetOptions {
    pub encrypt: bool,
    pub key: Option<String>,
    pub private_key: Option<String>,
    pub private_signing_key: Option<String>,
    /// `None` = never configured, `Some("")` = explicitly empty.
    pub encryption_types: Option<String>,
}

impl LeaseSetOptions {
    fn encrypt_token(&self) -> String {
        if self.encrypt {
            "i2cp.encryptLeaseSet=true".to_string()
        } else {
            String::new()
        }
    }

    /// Three tokens, in key / private key / private signing key order.
    fn key_tokens(&self) -> [String; 3] {
        let tok = |name: &str, v: &Option<String>| match v {
            Some(v) if !v.is_empty() => format!("i2cp.{}={}", name, v),
            _ => String::new(),
        };
        [
            tok("leaseSetKey", &self.key),
            tok("leaseSetPrivateKey", &self.private_key),
            tok("leaseSetPrivateSigningKey", &self.private_signing_key),
        ]
    }

    /// Effective comma-separated type list.
    pub fn effective_encryption_types(&self) -> &str {
        match self.encryption_types.as_deref() {
            None => UNSET_LEASESET_ENC_TYPE,
            Some("") => DEFAULT_LEASESET_ENC_TYPE,
            Some(v) => v,
        }
    }

    fn encryption_type_token(&self) -> String {
        format!("i2cp.leaseSetEncType={}", self.effective_encryption_types())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let value = self.effective_encryption_types();
        for token in value.split(',') {
            if token.parse::<u16>().is_err() {
                return Err(ConfigError::InvalidLeaseSetEncType {
                    value: value.to_string(),
                    token: token.to_string(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessListType {
    Whitelist,
    Blacklist,
    None,
}

/// Streaming access control.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessList {
    pub kind: Option<AccessListType>,
    pub members: Vec<String>,
}

impl AccessList {
    fn type_token(&self) -> String {
        match self.kind {
            Some(AccessListType::Whitelist) => "i2cp.enableAccessList=true".to_string(),
            Some(AccessListType::Blacklist) => "i2cp.enableBlackList=true".to_string(),
            Some(AccessListType::None) | None => String::new(),
        }
    }

    fn members_token(&self) -> String {
        if self.kind.is_none() || self.members.is_empty() {
            return String::new();
        }
        format!("i2cp.accessList={}", self.members.join(","))
    }
}

/// Transport hints passed through to the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportOptions {
    pub compression: bool,
    pub fast_receive: bool,
    pub reliability: String,
    pub idle_timeout: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            compression: true,
            fast_receive: false,
            reliability: "none".to_string(),
            idle_timeout: Duration::from_secs(5 * 60),
        }
    }
}

impl TransportOptions {
    fn gzip_token(&self) -> String {
        format!("i2cp.gzip={}", self.compression)
    }

    fn reliability_token(&self) -> String {
        if self.reliability.is_empty() {
            String::new()
        } else {
            format!("i2cp.messageReliability={}", self.reliability)
        }
    }

    fn fast_receive_token(&self) -> String {
        if self.fast_receive {
            "i2cp.fastReceive=true".to_string()
        } else {
            String::new()
        }
    }
}

/// Every tunable parameter of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub bridge: BridgeAddr,
    pub datagram_port: u16,
    pub tunnel_name: Option<String>,
    pub sam_min: String,
    pub sam_max: String,
    pub session: SessionOptions,
    pub inbound: TunnelOptions,
    pub outbound: TunnelOptions,
    pub idle: IdleOptions,
    pub leaseset: LeaseSetOptions,
    pub access: AccessList,
    pub transport: TransportOptions,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bridge: BridgeAddr::default(),
            datagram_port: DEFAULT_DATAGRAM_PORT,
            tunnel_name: None,
            sam_min: DEFAULT_SAM_MIN.to_string(),
            sam_max: DEFAULT_SAM_MAX.to_string(),
            session: SessionOptions::default(),
            inbound: TunnelOptions::default(),
            outbound: TunnelOptions::default(),
            idle: IdleOptions::default(),
            leaseset: LeaseSetOptions::default(),
            access: AccessList::default(),
            transport: TransportOptions::default(),
        }
    }
}

impl SessionConfig {
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder {
            config: SessionConfig::default(),
        }
    }

    /// Minimum version for `HELLO`; blank means 3.1.
    pub fn min_version(&self) -> &str {
        if self.sam_min.is_empty() {
            "3.1"
        } else {
            &self.sam_min
        }
    }

    /// Maximum version for `HELLO`; blank means 3.3.
    pub fn max_version(&self) -> &str {
        if self.sam_max.is_empty() {
            DEFAULT_SAM_MAX
        } else {
            &self.sam_max
        }
    }

    /// Numeric max version used for feature gating.
    pub fn negotiated_max(&self) -> SamVersion {
        SamVersion::parse_or_default(&self.sam_max)
    }

    /// Port and signature tokens need SAM 3.1 or newer.
    pub fn supports_ports(&self) -> bool {
        self.negotiated_max() >= SamVersion::V3_1
    }

    /// Identity for a new session: configured tunnel name (or a random one) and ports.
    pub fn identity(&self) -> SessionIdentity {
        SessionIdentity::new(self.tunnel_name.as_deref())
            .with_ports(self.session.from_port, self.session.to_port)
    }

    pub fn style_token(&self) -> String {
        format!("STYLE={}", self.session.style.unwrap_or(Style::Stream).as_str())
    }

    /// `SIGNATURE_TYPE=...` when supported and set.
    pub fn signature_token(&self) -> String {
        if !self.supports_ports() {
            return String::new();
        }
        match self.session.signature_type.as_deref() {
            Some(sig) if !sig.is_empty() => format!("SIGNATURE_TYPE={}", sig),
            _ => String::new(),
        }
    }

    /// `FROM_PORT=a TO_PORT=b` (either may be absent) when supported and non-zero.
    pub fn ports_token(&self, from_port: u16, to_port: u16) -> String {
        if !self.supports_ports() {
            return String::new();
        }
        let mut parts = Vec::with_capacity(2);
        if from_port != 0 {
            parts.push(format!("FROM_PORT={}", from_port));
        }
        if to_port != 0 {
            parts.push(format!("TO_PORT={}", to_port));
        }
        parts.join(" ")
    }

    fn zero_hop_tokens(&self) -> String {
        [
            self.inbound.zero_hop_token(Direction::Inbound),
            self.outbound.zero_hop_token(Direction::Outbound),
            self.transport.fast_receive_token(),
        ]
        .into_iter()
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
    }

    /// All option tokens in wire order. Omitted options stay as empty entries.
    pub fn option_tokens(&self) -> Vec<String> {
        let [lsk, lspk, lspsk] = self.leaseset.key_tokens();
        vec![
            self.inbound.length_token(Direction::Inbound),
            self.outbound.length_token(Direction::Outbound),
            self.inbound.variance_token(Direction::Inbound),
            self.outbound.variance_token(Direction::Outbound),
            self.inbound.backup_token(Direction::Inbound),
            self.outbound.backup_token(Direction::Outbound),
            self.inbound.quantity_token(Direction::Inbound),
            self.outbound.quantity_token(Direction::Outbound),
            self.zero_hop_tokens(),
            self.transport.gzip_token(),
            self.idle.reduce_tokens(),
            self.idle.close_tokens(self.transport.idle_timeout),
            self.transport.reliability_token(),
            self.leaseset.encrypt_token(),
            lsk,
            lspk,
            lspsk,
            self.access.type_token(),
            self.access.members_token(),
            self.leaseset.encryption_type_token(),
        ]
    }

    /// Option tokens joined with single spaces.
    pub fn option_string(&self) -> String {
        self.option_tokens().join(" ")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(name) = &self.tunnel_name {
            if name.contains(char::is_whitespace) || name.contains('=') {
                return Err(ConfigError::InvalidTunnelName(name.clone()));
            }
        }
        for m in &self.access.members {
            if m.is_empty() || m.contains(',') || m.contains(char::is_whitespace) {
                return Err(ConfigError::InvalidAccessListEntry(m.clone()));
            }
        }
        self.leaseset.validate()
    }
}

/// Defaulted builder; `build()` validates.
#[derive(Debug, Clone)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    pub fn bridge(mut self, bridge: BridgeAddr) -> Self {
        self.config.bridge = bridge;
        self
    }

    /// Parse and set the bridge control address (`host` or `host:port`).
    pub fn bridge_address(mut self, addr: &str) -> Result<Self, ConfigError> {
        self.config.bridge = BridgeAddr::parse(addr)?;
        Ok(self)
    }

    pub fn datagram_port(mut self, port: u16) -> Self {
        self.config.datagram_port = port;
        self
    }

    pub fn tunnel_name(mut self, name: impl Into<String>) -> Self {
        self.config.tunnel_name = Some(name.into());
        self
    }

    pub fn sam_versions(mut self, min: impl Into<String>, max: impl Into<String>) -> Self {
        self.config.sam_min = min.into();
        self.config.sam_max = max.into();
        self
    }

    pub fn style(mut self, style: Style) -> Self {
        self.config.session.style = Some(style);
        self
    }

    pub fn signature_type(mut self, sig: impl Into<String>) -> Self {
        self.config.session.signature_type = Some(sig.into());
        self
    }

    pub fn ports(mut self, from_port: u16, to_port: u16) -> Self {
        self.config.session.from_port = from_port;
        self.config.session.to_port = to_port;
        self
    }

    pub fn inbound(mut self, tunnels: TunnelOptions) -> Self {
        self.config.inbound = tunnels;
        self
    }

    pub fn outbound(mut self, tunnels: TunnelOptions) -> Self {
        self.config.outbound = tunnels;
        self
    }

    /// Same length / quantity on both directions.
    pub fn tunnel_length(mut self, length: u8) -> Self {
        self.config.inbound.length = length;
        self.config.outbound.length = length;
        self
    }

    pub fn tunnel_quantity(mut self, quantity: u8) -> Self {
        self.config.inbound.quantity = quantity;
        self.config.outbound.quantity = quantity;
        self
    }

    pub fn allow_zero_hop(mut self, inbound: bool, outbound: bool) -> Self {
        self.config.inbound.allow_zero_hop = inbound;
        self.config.outbound.allow_zero_hop = outbound;
        self
    }

    pub fn reduce_on_idle(mut self, idle_time: Duration, quantity: u8) -> Self {
        self.config.idle.reduce_on_idle = true;
        self.config.idle.reduce_idle_time = idle_time;
        self.config.idle.reduce_quantity = quantity;
        self
    }

    pub fn close_on_idle(mut self, idle_timeout: Duration) -> Self {
        self.config.idle.close_on_idle = true;
        self.config.transport.idle_timeout = idle_timeout;
        self
    }

    pub fn encrypt_leaseset(mut self, encrypt: bool) -> Self {
        self.config.leaseset.encrypt = encrypt;
        self
    }

    pub fn leaseset_keys(
        mut self,
        key: Option<String>,
        private_key: Option<String>,
        private_signing_key: Option<String>,
    ) -> Self {
        self.config.leaseset.key = key;
        self.config.leaseset.private_key = private_key;
        self.config.leaseset.private_signing_key = private_signing_key;
        self
    }

    /// Comma-separated integers, e.g. `"4"` or `"4,0"`. Empty selects the default.
    pub fn leaseset_encryption_types(mut self, types: impl Into<String>) -> Self {
        self.config.leaseset.encryption_types = Some(types.into());
        self
    }

    pub fn access_list(mut self, kind: AccessListType, members: Vec<String>) -> Self {
        self.config.access = AccessList {
            kind: Some(kind),
            members,
        };
        self
    }

    pub fn compression(mut self, enabled: bool) -> Self {
        self.config.transport.compression = enabled;
        self
    }

    pub fn fast_receive(mut self, enabled: bool) -> Self {
        self.config.transport.fast_receive = enabled;
        self
    }

    pub fn reliability(mut self, reliability: impl Into<String>) -> Self {
        self.config.transport.reliability = reliability.into();
        self
    }

    pub fn build(self) -> Result<SessionConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
