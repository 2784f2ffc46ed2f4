//! Load session config from file and environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use sam_core::config::{AccessListType, Style, TunnelOptions};
use sam_core::{BridgeAddr, DatagramOptions, SessionConfig};
use serde::Deserialize;

use crate::error::{Error, Result};

/// Config file. Paths: ~/.config/sam-client/config.toml, then /etc/sam-client/config.toml.
/// Env overrides: SAM_HOST, SAM_PORT, SAM_UDP_PORT, SAM_TUNNEL_NAME.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Bridge control address, `host[:port]` (default 127.0.0.1:7656).
    #[serde(default = "default_bridge")]
    pub bridge: String,
    /// Bridge datagram port (default 7655).
    #[serde(default = "default_datagram_port")]
    pub datagram_port: u16,
    /// Local UDP port for datagram sessions (default 0, auto).
    #[serde(default)]
    pub udp_port: u16,
    pub tunnel_name: Option<String>,
    #[serde(default = "default_sam_min")]
    pub sam_min: String,
    #[serde(default = "default_sam_max")]
    pub sam_max: String,
    pub style: Option<Style>,
    pub signature_type: Option<String>,
    #[serde(default)]
    pub from_port: u16,
    #[serde(default)]
    pub to_port: u16,
    #[serde(default)]
    pub inbound: TunnelSection,
    #[serde(default)]
    pub outbound: TunnelSection,
    #[serde(default)]
    pub idle: IdleSection,
    #[serde(default)]
    pub leaseset: LeaseSetSection,
    #[serde(default)]
    pub access: AccessSection,
    #[serde(default)]
    pub transport: TransportSection,
    pub datagram: Option<DatagramOptions>,
}

fn default_bridge() -> String {
    format!(
        "{}:{}",
        sam_core::config::DEFAULT_BRIDGE_HOST,
        sam_core::config::DEFAULT_BRIDGE_PORT
    )
}
fn default_datagram_port() -> u16 {
    sam_core::config::DEFAULT_DATAGRAM_PORT
}
fn default_sam_min() -> String {
    sam_core::config::DEFAULT_SAM_MIN.to_string()
}
fn default_sam_max() -> String {
    sam_core::config::DEFAULT_SAM_MAX.to_string()
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            bridge: default_bridge(),
            datagram_port: default_datagram_port(),
            udp_port: 0,
            tunnel_name: None,
            sam_min: default_sam_min(),
            sam_max: default_sam_max(),
            style: None,
            signature_type: None,
            from_port: 0,
            to_port: 0,
            inbound: TunnelSection::default(),
            outbound: TunnelSection::default(),
            idle: IdleSection::default(),
            leaseset: LeaseSetSection::default(),
            access: AccessSection::default(),
            transport: TransportSection::default(),
            datagram: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TunnelSection {
    pub length: u8,
    pub length_variance: i8,
    pub quantity: u8,
    pub backup_quantity: u8,
    pub allow_zero_hop: bool,
}

impl Default for TunnelSection {
    fn default() -> Self {
        let t = TunnelOptions::default();
        Self {
            length: t.length,
            length_variance: t.length_variance,
            quantity: t.quantity,
            backup_quantity: t.backup_quantity,
            allow_zero_hop: t.allow_zero_hop,
        }
    }
}

impl From<TunnelSection> for TunnelOptions {
    fn from(s: TunnelSection) -> Self {
        TunnelOptions {
            length: s.length,
            length_variance: s.length_variance,
            quantity: s.quantity,
            backup_quantity: s.backup_quantity,
            allow_zero_hop: s.allow_zero_hop,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IdleSection {
    /// Seconds idle before shrinking the tunnel pool. Unset disables.
    pub reduce_after_secs: Option<u64>,
    pub reduce_quantity: Option<u8>,
    /// Seconds idle before closing the session. Unset disables.
    pub close_after_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LeaseSetSection {
    pub encrypt: bool,
    pub key: Option<String>,
    pub private_key: Option<String>,
    pub private_signing_key: Option<String>,
    pub encryption_types: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AccessSection {
    pub kind: Option<AccessListType>,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransportSection {
    pub compression: Option<bool>,
    pub fast_receive: bool,
    pub reliability: Option<String>,
}

/// Everything the binary needs: the session config plus datagram-only settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub session: SessionConfig,
    pub udp_port: u16,
    pub datagram: Option<DatagramOptions>,
}

impl ConfigFile {
    pub fn from_toml(s: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Apply env-style overrides. `var` returns the value of a variable, if set.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        let host = var("SAM_HOST");
        let port = var("SAM_PORT");
        if host.is_some() || port.is_some() {
            let current = BridgeAddr::parse(&self.bridge)?;
            let host = host.unwrap_or(current.host);
            let port = match port {
                Some(p) => parse_port("SAM_PORT", &p)?,
                None => current.port,
            };
            self.bridge = BridgeAddr { host, port }.to_string();
        }
        if let Some(p) = var("SAM_UDP_PORT") {
            self.datagram_port = parse_port("SAM_UDP_PORT", &p)?;
        }
        if let Some(name) = var("SAM_TUNNEL_NAME") {
            self.tunnel_name = Some(name);
        }
        Ok(())
    }

    pub fn into_settings(self) -> Result<Settings> {
        let mut b = SessionConfig::builder()
            .bridge_address(&self.bridge)?
            .datagram_port(self.datagram_port)
            .sam_versions(self.sam_min, self.sam_max)
            .ports(self.from_port, self.to_port)
            .inbound(self.inbound.into())
            .outbound(self.outbound.into())
            .encrypt_leaseset(self.leaseset.encrypt)
            .fast_receive(self.transport.fast_receive);
        if let Some(name) = self.tunnel_name {
            b = b.tunnel_name(name);
        }
        if let Some(style) = self.style {
            b = b.style(style);
        }
        if let Some(sig) = self.signature_type {
            b = b.signature_type(sig);
        }
        if let Some(secs) = self.idle.reduce_after_secs {
            b = b.reduce_on_idle(
                Duration::from_secs(secs),
                self.idle.reduce_quantity.unwrap_or(1),
            );
        }
        if let Some(secs) = self.idle.close_after_secs {
            b = b.close_on_idle(Duration::from_secs(secs));
        }
        let ls = self.leaseset;
        b = b.leaseset_keys(ls.key, ls.private_key, ls.private_signing_key);
        if let Some(types) = ls.encryption_types {
            b = b.leaseset_encryption_types(types);
        }
        if let Some(kind) = self.access.kind {
            b = b.access_list(kind, self.access.members);
        }
        if let Some(c) = self.transport.compression {
            b = b.compression(c);
        }
        if let Some(r) = self.transport.reliability {
            b = b.reliability(r);
        }
        Ok(Settings {
            session: b.build()?,
            udp_port: self.udp_port,
            datagram: self.datagram,
        })
    }
}

fn parse_port(var: &str, value: &str) -> Result<u16> {
    value.trim().parse::<u16>().map_err(|_| Error::ConfigFile {
        path: format!("${var}"),
        message: format!("invalid port {value:?}"),
    })
}

/// Load settings: defaults, then the first config file found, then env vars.
pub fn load() -> Result<Settings> {
    let mut file = load_file(&config_paths())?.unwrap_or_default();
    file.apply_overrides(|k| std::env::var(k).ok())?;
    file.into_settings()
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/sam-client/config.toml"));
    }
    out.push(PathBuf::from("/etc/sam-client/config.toml"));
    out
}

/// First existing file wins. A file that exists but does not parse is an error.
fn load_file(paths: &[PathBuf]) -> Result<Option<ConfigFile>> {
    for p in paths {
        if p.exists() {
            let s = std::fs::read_to_string(p).map_err(|e| file_error(p, e))?;
            let c = ConfigFile::from_toml(&s).map_err(|e| file_error(p, e))?;
            return Ok(Some(c));
        }
    }
    Ok(None)
}

fn file_error(path: &Path, e: impl std::fmt::Display) -> Error {
    Error::ConfigFile {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_match_core() {
        let s = ConfigFile::default().into_settings().unwrap();
        assert_eq!(s.session, SessionConfig::default());
        assert_eq!(s.udp_port, 0);
        assert!(s.datagram.is_none());
    }

    #[test]
    fn parses_sections() {
        let f = ConfigFile::from_toml(
            r#"
bridge = "10.0.0.2"
tunnel_name = "echo"
style = "DATAGRAM"

[inbound]
length = 1
quantity = 4

[idle]
close_after_secs = 600

[access]
kind = "whitelist"
members = ["a.b32.i2p", "b.b32.i2p"]

[datagram]
send_tags = 40
"#,
        )
        .unwrap();
        let s = f.into_settings().unwrap();
        assert_eq!(s.session.bridge.host, "10.0.0.2");
        assert_eq!(s.session.bridge.port, 7656);
        assert_eq!(s.session.tunnel_name.as_deref(), Some("echo"));
        assert_eq!(s.session.inbound.length, 1);
        assert_eq!(s.session.inbound.quantity, 4);
        assert_eq!(s.session.outbound.length, 3);
        assert!(s.session.idle.close_on_idle);
        assert_eq!(s.session.transport.idle_timeout, Duration::from_secs(600));
        assert_eq!(s.session.access.members.len(), 2);
        assert_eq!(s.datagram.unwrap().send_tags, 40);
    }

    #[test]
    fn unknown_fields_rejected() {
        assert!(ConfigFile::from_toml("bogus = 1").is_err());
        assert!(ConfigFile::from_toml("[inbound]\nlenght = 2").is_err());
    }

    #[test]
    fn bad_leaseset_types_fail_build() {
        let f = ConfigFile::from_toml("[leaseset]\nencryption_types = \"4,x\"").unwrap();
        assert!(matches!(f.into_settings(), Err(Error::Config(_))));
    }

    #[test]
    fn env_overrides() {
        let mut f = ConfigFile::default();
        f.apply_overrides(env(&[
            ("SAM_HOST", "192.168.1.9"),
            ("SAM_UDP_PORT", "17655"),
            ("SAM_TUNNEL_NAME", "svc"),
        ]))
        .unwrap();
        let s = f.into_settings().unwrap();
        assert_eq!(s.session.bridge.to_string(), "192.168.1.9:7656");
        assert_eq!(s.session.datagram_port, 17655);
        assert_eq!(s.session.tunnel_name.as_deref(), Some("svc"));

        let mut f = ConfigFile::default();
        f.apply_overrides(env(&[("SAM_PORT", "7000")])).unwrap();
        assert_eq!(f.bridge, "127.0.0.1:7000");
    }

    #[test]
    fn invalid_override_is_error() {
        let mut f = ConfigFile::default();
        assert!(matches!(
            f.apply_overrides(env(&[("SAM_PORT", "seventy")])),
            Err(Error::ConfigFile { .. })
        ));
    }

    #[test]
    fn missing_file_is_not_error() {
        let p = std::env::temp_dir().join("sam-client-does-not-exist/config.toml");
        assert!(load_file(&[p]).unwrap().is_none());
    }

    #[test]
    fn broken_file_is_error() {
        let dir = std::env::temp_dir().join(format!("sam-client-cfg-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let p = dir.join("config.toml");
        std::fs::write(&p, "bridge = [").unwrap();
        assert!(matches!(load_file(&[p.clone()]), Err(Error::ConfigFile { .. })));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
