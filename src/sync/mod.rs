//! Sync layer: buffered mirror of damage, fracture and transform records.
//!
//! One buffer per unit kind is written per step on the authoritative side
//! and read on the mirroring side. Records are grouped by the caller-assigned
//! `user_actor_id` of each actor. The byte transport is the host's business;
//! it plugs in through [`SyncHandler`].

pub mod buffer;
pub mod units;

pub use buffer::{
    decode, encode, encoded_size, group_segments, SyncSegment, END_OF_LIST, PREAMBLE_SIZE,
    SEGMENT_HEADER_SIZE, SYNC_MAGIC, SYNC_VERSION,
};
pub use units::{ChunkTransformUnit, DamageEventUnit, FractureEventUnit, SyncUnit, NO_CHUNK};

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::SyncError;

/// Host-side transport for one unit kind.
///
/// Writing: `on_write_begin(size)` returns a byte buffer the encoded records
/// are written into (or `None` to skip this step), then `on_write_done`
/// reports how many segments went out. Reading: `on_read_begin` returns the
/// next received buffer, if any, and `on_read_done` receives a summary once
/// the records were applied.
pub trait SyncHandler<U: SyncUnit>: Send + Sync {
    fn on_write_begin(&mut self, size: usize) -> Option<&mut Vec<u8>>;

    fn on_write_done(&mut self, header_count: u32);

    /// Whether the reader should walk the segment links instead of trusting
    /// the contiguous layout.
    fn on_pre_process_read_begin(&mut self) -> bool {
        false
    }

    fn on_read_begin(&mut self) -> Option<Vec<u8>>;

    fn on_read_done(&mut self, message: &str);
}

/// Encodes `segments` through `handler`. Returns false when the handler
/// declined the write.
pub fn write_segments<U: SyncUnit>(
    handler: &mut dyn SyncHandler<U>,
    segments: &[SyncSegment<U>],
) -> Result<bool, SyncError> {
    let bytes = encode(segments)?;
    let Some(out) = handler.on_write_begin(bytes.len()) else {
        return Ok(false);
    };
    out.clear();
    out.extend_from_slice(&bytes);
    handler.on_write_done(segments.len() as u32);
    debug!(kind = U::KIND, segments = segments.len(), bytes = bytes.len(), "sync buffer written");
    Ok(true)
}

/// Pulls and decodes the next buffer from `handler`. A buffer that fails to
/// decode is reported through `on_read_done` and returned as the error.
pub fn read_segments<U: SyncUnit>(
    handler: &mut dyn SyncHandler<U>,
) -> Result<Option<Vec<SyncSegment<U>>>, SyncError> {
    let resolve_links = handler.on_pre_process_read_begin();
    let Some(bytes) = handler.on_read_begin() else {
        return Ok(None);
    };
    match decode::<U>(&bytes, resolve_links) {
        Ok(segments) => Ok(Some(segments)),
        Err(err) => {
            warn!(kind = U::KIND, error = %err, "dropping undecodable sync buffer");
            handler.on_read_done(&format!("rejected: {err}"));
            Err(err)
        }
    }
}

/// In-process transport: written buffers are queued on a shared channel and
/// handed to whichever handler reads from it.
pub struct LoopbackSyncHandler<U> {
    channel: Arc<Mutex<VecDeque<Vec<u8>>>>,
    scratch: Vec<u8>,
    writes: bool,
    reads: bool,
    resolve_links: bool,
    written: u64,
    read_messages: Vec<String>,
    _unit: PhantomData<fn() -> U>,
}

impl<U> std::fmt::Debug for LoopbackSyncHandler<U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackSyncHandler")
            .field("queued", &self.channel.lock().len())
            .field("writes", &self.writes)
            .field("reads", &self.reads)
            .finish()
    }
}

impl<U> Default for LoopbackSyncHandler<U> {
    fn default() -> Self {
        Self::new()
    }
}

impl<U> LoopbackSyncHandler<U> {
    /// A handler that both writes to and reads from its own channel.
    pub fn new() -> Self {
        Self {
            channel: Arc::new(Mutex::new(VecDeque::new())),
            scratch: Vec::new(),
            writes: true,
            reads: true,
            resolve_links: false,
            written: 0,
            read_messages: Vec::new(),
            _unit: PhantomData,
        }
    }

    fn with_role(&self, writes: bool, reads: bool) -> Self {
        Self {
            channel: Arc::clone(&self.channel),
            writes,
            reads,
            ..Self::new()
        }
    }

    /// Write-only end sharing this handler's channel.
    pub fn writer(&self) -> Self {
        self.with_role(true, false)
    }

    /// Read-only end sharing this handler's channel.
    pub fn reader(&self) -> Self {
        self.with_role(false, true)
    }

    pub fn resolving_links(mut self, resolve: bool) -> Self {
        self.resolve_links = resolve;
        self
    }

    /// Buffers written and not read yet.
    pub fn queued(&self) -> usize {
        self.channel.lock().len()
    }

    pub fn buffers_written(&self) -> u64 {
        self.written
    }

    pub fn read_messages(&self) -> &[String] {
        &self.read_messages
    }
}

impl<U: SyncUnit> SyncHandler<U> for LoopbackSyncHandler<U> {
    fn on_write_begin(&mut self, size: usize) -> Option<&mut Vec<u8>> {
        if !self.writes {
            return None;
        }
        self.scratch.clear();
        self.scratch.reserve(size);
        Some(&mut self.scratch)
    }

    fn on_write_done(&mut self, _header_count: u32) {
        self.channel.lock().push_back(std::mem::take(&mut self.scratch));
        self.written += 1;
    }

    fn on_pre_process_read_begin(&mut self) -> bool {
        self.resolve_links
    }

    fn on_read_begin(&mut self) -> Option<Vec<u8>> {
        if !self.reads {
            return None;
        }
        self.channel.lock().pop_front()
    }

    fn on_read_done(&mut self, message: &str) {
        self.read_messages.push(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transform(chunk: u32) -> ChunkTransformUnit {
        ChunkTransformUnit {
            chunk_index: chunk,
            position: [chunk as f32, 1.0, 2.0],
            rotation: [0.0, 0.0, 0.0, 1.0],
        }
    }

    #[test]
    fn test_loopback_preserves_order() {
        let server = LoopbackSyncHandler::<ChunkTransformUnit>::new();
        let mut writer = server.writer();
        let mut reader = server.reader().resolving_links(true);
        let first = group_segments([(1, transform(0)), (2, transform(1))]);
        let second = group_segments([(1, transform(5))]);
        assert!(write_segments(&mut writer, &first).unwrap());
        assert!(write_segments(&mut writer, &second).unwrap());
        assert_eq!(server.queued(), 2);
        assert_eq!(read_segments(&mut reader).unwrap(), Some(first));
        assert_eq!(read_segments(&mut reader).unwrap(), Some(second));
        assert_eq!(read_segments(&mut reader).unwrap(), None);
    }

    #[test]
    fn test_roles_are_exclusive() {
        let base = LoopbackSyncHandler::<ChunkTransformUnit>::new();
        let mut reader = base.reader();
        let segments = group_segments([(3, transform(2))]);
        assert!(!write_segments(&mut reader, &segments).unwrap());
        let mut writer = base.writer();
        write_segments(&mut writer, &segments).unwrap();
        assert_eq!(read_segments(&mut writer).unwrap(), None);
        assert_eq!(writer.buffers_written(), 1);
    }

    #[test]
    fn test_undecodable_buffer_reported() {
        let mut handler = LoopbackSyncHandler::<ChunkTransformUnit>::new();
        handler.channel.lock().push_back(vec![1, 2, 3]);
        assert!(matches!(
            read_segments(&mut handler),
            Err(SyncError::Truncated { .. })
        ));
        assert_eq!(handler.read_messages().len(), 1);
        assert!(handler.read_messages()[0].starts_with("rejected"));
    }
}
