use mc_types::{BlobEntry, BlobId, Checksum};

use crate::pin::{PinHandle, PinSet};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RecordState {
    /// Placeholder reserving space while content is streamed in.
    Ingesting,
    /// Shadow copy in the destination folder of an in-flight move.
    Moving,
    Ready,
}

/// In-memory state of one blob file inside one storage folder.
#[derive(Clone)]
pub(crate) struct BlobRecord {
    pub id: BlobId,
    pub checksum: Checksum,
    /// Uncompressed length in bytes.
    pub size: u64,
    /// Bytes accounted against the folder. For a placeholder this is the
    /// reservation (its uncompressed length), not the final file size.
    pub compressed_size: u64,
    pub reference_count: u64,
    pub state: RecordState,
    pub pins: PinSet,
}

impl BlobRecord {
    pub(crate) fn placeholder(
        id: BlobId,
        checksum: Checksum,
        size: u64,
        reserved: u64,
        pin: PinHandle,
    ) -> Self {
        Self {
            id,
            checksum,
            size,
            compressed_size: reserved,
            reference_count: 0,
            state: RecordState::Ingesting,
            pins: PinSet::with(pin),
        }
    }

    /// Destination-side copy of `source`, pinned by the move itself.
    pub(crate) fn shadow(source: &BlobRecord, pin: PinHandle) -> Self {
        Self {
            reference_count: 0,
            state: RecordState::Moving,
            pins: PinSet::with(pin),
            ..source.clone()
        }
    }

    pub(crate) fn ready(
        id: BlobId,
        checksum: Checksum,
        size: u64,
        compressed_size: u64,
        reference_count: u64,
    ) -> Self {
        Self {
            id,
            checksum,
            size,
            compressed_size,
            reference_count,
            state: RecordState::Ready,
            pins: PinSet::default(),
        }
    }

    /// Record restored from folder metadata. References are not persisted,
    /// the owner re-establishes them after start-up.
    pub(crate) fn from_entry(entry: &BlobEntry) -> Self {
        Self::ready(entry.id, entry.checksum, entry.size, entry.compressed_size, 0)
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.state == RecordState::Ready
    }

    /// Metadata entry, or `None` for move shadows which are never saved.
    pub(crate) fn to_entry(&self) -> Option<BlobEntry> {
        let is_ready = match self.state {
            RecordState::Ready => true,
            RecordState::Ingesting => false,
            RecordState::Moving => return None,
        };
        Some(BlobEntry {
            id: self.id,
            checksum: self.checksum,
            size: self.size,
            compressed_size: self.compressed_size,
            is_ready,
        })
    }
}
