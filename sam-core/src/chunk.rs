//! Chunking: size classes for outbound datagrams, split into ordered pieces, reassemble.
//!
//! The bridge treats every chunk as its own datagram and gives no ordering guarantee, so
//! reassembly is keyed by the explicit index/total carried with each piece.

use std::collections::BTreeMap;
use std::ops::Range;

use crate::datagram::{DatagramError, HEADER_ALLOWANCE, MAX_DATAGRAM_SIZE, RECOMMENDED_SIZE};

/// Payload bytes per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = RECOMMENDED_SIZE - HEADER_ALLOWANCE;

/// How a payload of a given length goes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendPlan {
    Single,
    Chunked { chunk_size: usize, total: usize },
}

/// Classify a payload length. Oversized payloads are rejected here, before any I/O.
pub fn plan(len: usize) -> Result<SendPlan, DatagramError> {
    if len > MAX_DATAGRAM_SIZE {
        return Err(DatagramError::TooLarge {
            len,
            max: MAX_DATAGRAM_SIZE,
        });
    }
    if len <= RECOMMENDED_SIZE {
        return Ok(SendPlan::Single);
    }
    Ok(SendPlan::Chunked {
        chunk_size: DEFAULT_CHUNK_SIZE,
        total: len.div_ceil(DEFAULT_CHUNK_SIZE),
    })
}

/// Split `total_len` bytes into consecutive ranges of at most `chunk_size`.
pub fn split_into_chunks(total_len: usize, chunk_size: usize) -> Vec<Range<usize>> {
    let size = if chunk_size == 0 {
        DEFAULT_CHUNK_SIZE
    } else {
        chunk_size
    };
    let mut out = Vec::new();
    let mut start = 0;
    while start < total_len {
        let end = (start + size).min(total_len);
        out.push(start..end);
        start = end;
    }
    out
}

/// Collects the pieces of one chunked payload in any arrival order.
#[derive(Debug, Clone)]
pub struct ChunkAssembly {
    total: usize,
    received: BTreeMap<usize, Vec<u8>>,
}

impl ChunkAssembly {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            received: BTreeMap::new(),
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Store chunk `index`. Returns true once every chunk is present. Duplicates overwrite.
    pub fn mark_received(
        &mut self,
        index: usize,
        total: usize,
        payload: Vec<u8>,
    ) -> Result<bool, DatagramError> {
        if total != self.total || index >= self.total {
            return Err(DatagramError::InvalidChunk { index, total });
        }
        self.received.insert(index, payload);
        Ok(self.is_complete())
    }

    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.received.len() == self.total
    }

    /// Concatenate chunks in index order. `None` until complete.
    pub fn reassemble_into_bytes(&self) -> Option<Vec<u8>> {
        if !self.is_complete() {
            return None;
        }
        let len = self.received.values().map(Vec::len).sum();
        let mut out = Vec::with_capacity(len);
        for payload in self.received.values() {
            out.extend_from_slice(payload);
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_classes() {
        assert_eq!(plan(0).unwrap(), SendPlan::Single);
        assert_eq!(plan(RECOMMENDED_SIZE).unwrap(), SendPlan::Single);
        assert_eq!(
            plan(RECOMMENDED_SIZE + 1).unwrap(),
            SendPlan::Chunked {
                chunk_size: 11008,
                total: 2
            }
        );
        assert_eq!(
            plan(MAX_DATAGRAM_SIZE).unwrap(),
            SendPlan::Chunked {
                chunk_size: 11008,
                total: 3
            }
        );
        assert_eq!(
            plan(MAX_DATAGRAM_SIZE + 1),
            Err(DatagramError::TooLarge {
                len: MAX_DATAGRAM_SIZE + 1,
                max: MAX_DATAGRAM_SIZE
            })
        );
    }

    #[test]
    fn twenty_thousand_bytes_make_two_chunks() {
        let SendPlan::Chunked { chunk_size, total } = plan(20_000).unwrap() else {
            panic!("expected chunked plan");
        };
        let ranges = split_into_chunks(20_000, chunk_size);
        assert_eq!(ranges.len(), total);
        assert_eq!(ranges[0].len(), 11008);
        assert_eq!(ranges[1].len(), 8992);
    }

    #[test]
    fn split_covers_payload() {
        let ranges = split_into_chunks(100, 30);
        assert_eq!(ranges, vec![0..30, 30..60, 60..90, 90..100]);
        assert!(split_into_chunks(0, 30).is_empty());
        assert_eq!(split_into_chunks(DEFAULT_CHUNK_SIZE * 2, 0).len(), 2);
    }

    #[test]
    fn reassemble_out_of_order() {
        let data: Vec<u8> = (0..25_000u32).map(|i| (i % 251) as u8).collect();
        let ranges = split_into_chunks(data.len(), DEFAULT_CHUNK_SIZE);
        let total = ranges.len();
        let mut asm = ChunkAssembly::new(total);
        for (i, r) in ranges.iter().enumerate().rev() {
            let done = asm.mark_received(i, total, data[r.clone()].to_vec()).unwrap();
            assert_eq!(done, i == 0);
        }
        assert_eq!(asm.reassemble_into_bytes().unwrap(), data);
    }

    #[test]
    fn reassembly_rejects_foreign_chunks() {
        let mut asm = ChunkAssembly::new(2);
        assert!(asm.mark_received(2, 2, vec![]).is_err());
        assert!(asm.mark_received(0, 3, vec![]).is_err());
        assert!(!asm.mark_received(0, 2, vec![1]).unwrap());
        assert!(asm.reassemble_into_bytes().is_none());
    }
}
