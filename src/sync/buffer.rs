//! Segmented sync buffer codec.
//!
//! Layout (little-endian, fixed-int):
//!
//! ```text
//! preamble : magic u32 | version u16 | kind u16 | header_count u32 | body_len u32 | checksum u64
//! body     : segment*
//! segment  : user_actor_id u32 | unit_count u32 | units_offset u32 | next_offset u32 | unit*
//! ```
//!
//! Offsets are relative to the body start. `next_offset` links the segments
//! into a list ending with `END_OF_LIST`. The checksum is the first 8 bytes
//! of the body's SHA3-256 digest.

use bincode::Options;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};

use super::units::SyncUnit;
use crate::error::SyncError;

pub const SYNC_MAGIC: u32 = 0x4453_594e;
pub const SYNC_VERSION: u16 = 1;
pub const PREAMBLE_SIZE: usize = 24;
pub const SEGMENT_HEADER_SIZE: usize = 16;
pub const END_OF_LIST: u32 = u32::MAX;

pub(crate) fn wire_options() -> impl Options + Copy {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct Preamble {
    magic: u32,
    version: u16,
    kind: u16,
    header_count: u32,
    body_len: u32,
    checksum: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct SegmentHeader {
    user_actor_id: u32,
    unit_count: u32,
    units_offset: u32,
    next_offset: u32,
}

/// Units of one actor, keyed by its caller-assigned sync id.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSegment<U> {
    pub user_actor_id: u32,
    pub units: Vec<U>,
}

/// Groups `(user_actor_id, unit)` pairs into segments, keeping first-seen
/// actor order and per-actor record order.
pub fn group_segments<U>(records: impl IntoIterator<Item = (u32, U)>) -> Vec<SyncSegment<U>> {
    let mut segments: Vec<SyncSegment<U>> = Vec::new();
    for (id, unit) in records {
        match segments.iter_mut().find(|s| s.user_actor_id == id) {
            Some(segment) => segment.units.push(unit),
            None => segments.push(SyncSegment {
                user_actor_id: id,
                units: vec![unit],
            }),
        }
    }
    segments
}

fn checksum(body: &[u8]) -> u64 {
    let mut hasher = Sha3_256::new();
    hasher.update(body);
    let digest = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(head)
}

/// Bytes `encode` will produce for `segments`.
pub fn encoded_size<U: SyncUnit>(segments: &[SyncSegment<U>]) -> usize {
    PREAMBLE_SIZE
        + segments
            .iter()
            .map(|s| SEGMENT_HEADER_SIZE + s.units.len() * U::WIRE_SIZE)
            .sum::<usize>()
}

pub fn encode<U: SyncUnit>(segments: &[SyncSegment<U>]) -> Result<Vec<u8>, SyncError> {
    let opts = wire_options();
    let mut body = Vec::with_capacity(encoded_size(segments) - PREAMBLE_SIZE);
    for (i, segment) in segments.iter().enumerate() {
        let start = body.len();
        let units_offset = start + SEGMENT_HEADER_SIZE;
        let end = units_offset + segment.units.len() * U::WIRE_SIZE;
        let header = SegmentHeader {
            user_actor_id: segment.user_actor_id,
            unit_count: segment.units.len() as u32,
            units_offset: units_offset as u32,
            next_offset: if i + 1 == segments.len() {
                END_OF_LIST
            } else {
                end as u32
            },
        };
        opts.serialize_into(&mut body, &header)?;
        for unit in &segment.units {
            opts.serialize_into(&mut body, unit)?;
        }
    }
    let preamble = Preamble {
        magic: SYNC_MAGIC,
        version: SYNC_VERSION,
        kind: U::KIND,
        header_count: segments.len() as u32,
        body_len: body.len() as u32,
        checksum: checksum(&body),
    };
    let mut out = Vec::with_capacity(PREAMBLE_SIZE + body.len());
    opts.serialize_into(&mut out, &preamble)?;
    out.extend_from_slice(&body);
    Ok(out)
}

fn slice(bytes: &[u8], at: usize, len: usize) -> Result<&[u8], SyncError> {
    let end = at.checked_add(len).ok_or(SyncError::Truncated {
        needed: usize::MAX,
        available: bytes.len(),
    })?;
    bytes.get(at..end).ok_or(SyncError::Truncated {
        needed: end,
        available: bytes.len(),
    })
}

/// Decodes a buffer. With `resolve_links` the segment list is walked through
/// `next_offset`, rejecting out-of-range or backward links; otherwise the
/// `header_count` segments are read back to back.
pub fn decode<U: SyncUnit>(bytes: &[u8], resolve_links: bool) -> Result<Vec<SyncSegment<U>>, SyncError> {
    let opts = wire_options();
    let preamble: Preamble = opts.deserialize(slice(bytes, 0, PREAMBLE_SIZE)?)?;
    if preamble.magic != SYNC_MAGIC {
        return Err(SyncError::BadMagic(preamble.magic));
    }
    if preamble.version != SYNC_VERSION {
        return Err(SyncError::UnsupportedVersion(preamble.version));
    }
    if preamble.kind != U::KIND {
        return Err(SyncError::UnitKindMismatch {
            expected: U::KIND,
            found: preamble.kind,
        });
    }
    let body = slice(bytes, PREAMBLE_SIZE, preamble.body_len as usize)?;
    if checksum(body) != preamble.checksum {
        return Err(SyncError::ChecksumMismatch);
    }

    let max_headers = body.len() / SEGMENT_HEADER_SIZE;
    if preamble.header_count as usize > max_headers {
        return Err(SyncError::CountOutOfRange {
            field: "header_count",
            count: preamble.header_count,
            max: max_headers,
        });
    }
    let mut segments = Vec::with_capacity(preamble.header_count as usize);
    let mut offset = 0usize;
    for _ in 0..preamble.header_count {
        let header: SegmentHeader = opts.deserialize(slice(body, offset, SEGMENT_HEADER_SIZE)?)?;
        let mut at = header.units_offset as usize;
        let max_units = body.len().saturating_sub(at) / U::WIRE_SIZE;
        if header.unit_count as usize > max_units {
            return Err(SyncError::CountOutOfRange {
                field: "unit_count",
                count: header.unit_count,
                max: max_units,
            });
        }
        let mut units = Vec::with_capacity(header.unit_count as usize);
        for _ in 0..header.unit_count {
            units.push(opts.deserialize(slice(body, at, U::WIRE_SIZE)?)?);
            at += U::WIRE_SIZE;
        }
        segments.push(SyncSegment {
            user_actor_id: header.user_actor_id,
            units,
        });
        if resolve_links {
            if header.next_offset == END_OF_LIST {
                break;
            }
            let next = header.next_offset as usize;
            if next <= offset || next >= body.len() {
                return Err(SyncError::BrokenLink(header.next_offset));
            }
            offset = next;
        } else {
            offset = at;
        }
    }
    Ok(segments)
}
