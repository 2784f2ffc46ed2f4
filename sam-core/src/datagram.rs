//! Datagram framing for the secondary (UDP) channel.
//!
//! Outbound frame: `<rev> <session-id> <destination>[ options][ <index> <total>]\n<payload>`.
//! Inbound frame from the bridge: `<source-destination> <payload>`.

use serde::{Deserialize, Serialize};

use crate::identity::Destination;

/// Largest payload sent as a single frame.
pub const RECOMMENDED_SIZE: usize = 11 * 1024;
/// Hard payload limit; anything larger is rejected before I/O.
pub const MAX_DATAGRAM_SIZE: usize = 31 * 1024;
/// Bytes reserved for the frame header when chunking.
pub const HEADER_ALLOWANCE: usize = 256;
/// Longest source destination accepted in an inbound frame.
pub const MAX_SOURCE_LEN: usize = 4096;

pub const LEGACY_REVISION: &str = "3.1";
pub const EXTENDED_REVISION: &str = "3.3";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DatagramError {
    #[error("datagram of {len} bytes exceeds maximum of {max}")]
    TooLarge { len: usize, max: usize },
    #[error("no source separator in inbound frame")]
    MissingSeparator,
    #[error("invalid source destination {0:?}")]
    InvalidSource(String),
    #[error("malformed datagram header: {0:?}")]
    MalformedHeader(String),
    #[error("chunk {index} out of range for total {total}")]
    InvalidChunk { index: usize, total: usize },
}

/// Per-session tuning; presence selects the extended (`3.3`) header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatagramOptions {
    pub send_tags: u32,
    pub tag_threshold: u32,
    pub expires: u32,
    pub send_leaseset: bool,
}

impl DatagramOptions {
    fn append_tokens(&self, out: &mut String) {
        if self.send_tags > 0 {
            out.push_str(&format!(" SEND_TAGS={}", self.send_tags));
        }
        if self.tag_threshold > 0 {
            out.push_str(&format!(" TAG_THRESHOLD={}", self.tag_threshold));
        }
        if self.expires > 0 {
            out.push_str(&format!(" EXPIRES={}", self.expires));
        }
        if self.send_leaseset {
            out.push_str(" SEND_LEASESET=true");
        }
    }

    fn apply(&mut self, key: &str, value: &str) -> Option<()> {
        match key {
            "SEND_TAGS" => self.send_tags = value.parse().ok()?,
            "TAG_THRESHOLD" => self.tag_threshold = value.parse().ok()?,
            "EXPIRES" => self.expires = value.parse().ok()?,
            "SEND_LEASESET" => self.send_leaseset = value.parse().ok()?,
            _ => return None,
        }
        Some(())
    }
}

/// Position of one chunk in a chunked send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkIndex {
    pub index: usize,
    pub total: usize,
}

/// Header line of an outbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatagramHeader {
    pub session_id: String,
    pub destination: Destination,
    pub options: Option<DatagramOptions>,
    pub chunk: Option<ChunkIndex>,
}

impl DatagramHeader {
    pub fn new(
        session_id: &str,
        destination: &Destination,
        options: Option<DatagramOptions>,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            destination: destination.clone(),
            options,
            chunk: None,
        }
    }

    pub fn with_chunk(mut self, index: usize, total: usize) -> Self {
        self.chunk = Some(ChunkIndex { index, total });
        self
    }

    pub fn revision(&self) -> &'static str {
        if self.options.is_some() {
            EXTENDED_REVISION
        } else {
            LEGACY_REVISION
        }
    }

    /// Header line including the trailing newline.
    pub fn encode(&self) -> String {
        let mut out = format!("{} {} {}", self.revision(), self.session_id, self.destination);
        if let Some(opts) = &self.options {
            opts.append_tokens(&mut out);
        }
        if let Some(c) = self.chunk {
            out.push_str(&format!(" {} {}", c.index, c.total));
        }
        out.push('\n');
        out
    }

    /// Parse a header from the front of `bytes`. Returns the header and its length.
    pub fn parse(bytes: &[u8]) -> Result<(Self, usize), DatagramError> {
        let nl = bytes
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| malformed(bytes))?;
        let line = std::str::from_utf8(&bytes[..nl]).map_err(|_| malformed(&bytes[..nl]))?;
        let tokens: Vec<&str> = line.split(' ').filter(|t| !t.is_empty()).collect();
        if tokens.len() < 3 {
            return Err(malformed(line.as_bytes()));
        }
        let mut options = match tokens[0] {
            LEGACY_REVISION => None,
            EXTENDED_REVISION => Some(DatagramOptions::default()),
            _ => return Err(malformed(line.as_bytes())),
        };
        let destination =
            Destination::parse(tokens[2]).ok_or_else(|| malformed(line.as_bytes()))?;
        let mut rest = &tokens[3..];
        let mut chunk = None;
        if rest.len() >= 2 {
            let (head, tail) = rest.split_at(rest.len() - 2);
            if let (Ok(index), Ok(total)) = (tail[0].parse(), tail[1].parse()) {
                chunk = Some(ChunkIndex { index, total });
                rest = head;
            }
        }
        for tok in rest {
            let applied = match (options.as_mut(), tok.split_once('=')) {
                (Some(opts), Some((k, v))) => opts.apply(k, v),
                _ => None,
            };
            if applied.is_none() {
                return Err(malformed(line.as_bytes()));
            }
        }
        Ok((
            DatagramHeader {
                session_id: tokens[1].to_string(),
                destination,
                options,
                chunk,
            },
            nl + 1,
        ))
    }
}

fn malformed(bytes: &[u8]) -> DatagramError {
    DatagramError::MalformedHeader(String::from_utf8_lossy(bytes).into_owned())
}

/// Header followed by payload bytes.
pub fn encode_frame(header: &DatagramHeader, payload: &[u8]) -> Vec<u8> {
    let head = header.encode();
    let mut out = Vec::with_capacity(head.len() + payload.len());
    out.extend_from_slice(head.as_bytes());
    out.extend_from_slice(payload);
    out
}

/// Split an inbound frame into source destination and payload at the first space.
pub fn parse_inbound(frame: &[u8]) -> Result<(Destination, &[u8]), DatagramError> {
    let sep = frame
        .iter()
        .take(MAX_SOURCE_LEN + 1)
        .position(|&b| b == b' ')
        .ok_or(DatagramError::MissingSeparator)?;
    let source = std::str::from_utf8(&frame[..sep])
        .ok()
        .and_then(Destination::parse)
        .ok_or_else(|| {
            DatagramError::InvalidSource(String::from_utf8_lossy(&frame[..sep]).into_owned())
        })?;
    Ok((source, &frame[sep + 1..]))
}
