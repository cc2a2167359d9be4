//! Error types for the destructible runtime.
//!
//! Fallible entry points return `Result<_, DestructibleError>` and leave the
//! scene untouched on `Err`. Budget pressure is never an error; it shows up
//! as destruction flags in the regular reports.

use crate::actor::ActorId;
use crate::chunk::ChunkIndex;

/// Which scoped buffer an acquire targeted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    ChunkEvents,
    PhysicsActors,
}

impl std::fmt::Display for BufferKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BufferKind::ChunkEvents => write!(f, "chunk event"),
            BufferKind::PhysicsActors => write!(f, "physics actor"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DestructibleError {
    #[error("invalid asset: {0}")]
    InvalidAsset(String),

    #[error("chunk {index} out of range (asset has {count} chunks)")]
    ChunkOutOfRange { index: ChunkIndex, count: usize },

    #[error("unknown destructible actor {0}")]
    UnknownActor(ActorId),

    #[error("invalid joint descriptor: {0}")]
    InvalidJointDesc(&'static str),

    #[error("no joint endpoint resolved to a live physics actor")]
    JointUnresolved,

    #[error("{0} buffer already acquired")]
    BufferAlreadyAcquired(BufferKind),

    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("config I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] ron::error::SpannedError),

    #[error("config encode error: {0}")]
    ConfigEncode(#[from] ron::Error),

    #[error("sync error: {0}")]
    Sync(#[from] SyncError),
}

/// Failures while decoding a sync buffer.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("buffer truncated: needed {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("bad magic 0x{0:08x}")]
    BadMagic(u32),

    #[error("unsupported version {0}")]
    UnsupportedVersion(u16),

    #[error("unit kind mismatch: expected {expected}, found {found}")]
    UnitKindMismatch { expected: u16, found: u16 },

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("{field} of {count} exceeds the {max} that fit in the body")]
    CountOutOfRange {
        field: &'static str,
        count: u32,
        max: usize,
    },

    #[error("segment link at offset {0} is out of bounds or cyclic")]
    BrokenLink(u32),

    #[error("encoding error: {0}")]
    Encoding(#[from] bincode::Error),
}

pub type Result<T, E = DestructibleError> = std::result::Result<T, E>;
