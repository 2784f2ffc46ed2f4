//! Session identity: tunnel id, destination strings and key pairs.
//! Key generation and base32 formatting belong to the bridge; here they are opaque strings.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Length of a generated tunnel id.
pub const SESSION_ID_LEN: usize = 12;

const ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

/// Public destination on the anonymous network (base64 or `.b32.i2p` form).
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Destination(String);

impl Destination {
    /// Wrap a destination string. Surrounding whitespace is dropped; empty input is rejected.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() || s.contains(char::is_whitespace) {
            return None;
        }
        Some(Destination(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the short `.b32.i2p` form.
    pub fn is_b32(&self) -> bool {
        self.0.ends_with(".b32.i2p")
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Destination key pair as returned by `DEST GENERATE` or `SESSION CREATE ... TRANSIENT`.
/// `private` is the full private destination string handed back to the bridge.
#[derive(Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct KeyPair {
    public: Destination,
    private: String,
}

impl KeyPair {
    pub fn new(public: Destination, private: impl Into<String>) -> Self {
        Self {
            public,
            private: private.into(),
        }
    }

    pub fn public(&self) -> &Destination {
        &self.public
    }

    /// Wire form used as `DESTINATION=` in `SESSION CREATE`.
    pub fn private(&self) -> &str {
        &self.private
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .field("private", &"<redacted>")
            .finish()
    }
}

/// Per-session identity: tunnel id, optional keys, local port bindings.
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    id: String,
    keys: Option<KeyPair>,
    from_port: u16,
    to_port: u16,
}

impl SessionIdentity {
    /// Use `id` when given (and non-empty), otherwise generate one.
    pub fn new(id: Option<&str>) -> Self {
        let id = match id {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => generate_session_id(),
        };
        Self {
            id,
            keys: None,
            from_port: 0,
            to_port: 0,
        }
    }

    pub fn with_keys(mut self, keys: KeyPair) -> Self {
        self.keys = Some(keys);
        self
    }

    /// Port bindings; 0 means unset and the token is omitted.
    pub fn with_ports(mut self, from_port: u16, to_port: u16) -> Self {
        self.from_port = from_port;
        self.to_port = to_port;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn keys(&self) -> Option<&KeyPair> {
        self.keys.as_ref()
    }

    pub fn from_port(&self) -> u16 {
        self.from_port
    }

    pub fn to_port(&self) -> u16 {
        self.to_port
    }
}

/// Random lowercase tunnel id of `SESSION_ID_LEN` characters.
pub fn generate_session_id() -> String {
    let mut rng = rand::thread_rng();
    (0..SESSION_ID_LEN)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect()
}
