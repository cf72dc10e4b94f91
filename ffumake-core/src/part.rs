use std::fmt;

/// Selects which end of the target disk a block index is counted from.
///
/// The numeric values are part of the FFU wire format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum DiskAccessMethod {
    /// Block index counted forwards from the first block of the disk.
    DiskBegin = 0,
    /// Block index counted backwards from the last block of the disk
    /// (index 0 is the last block).
    DiskEnd = 2,
}

impl DiskAccessMethod {
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// One target write position for a block payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DiskLocation {
    pub access_method: DiskAccessMethod,
    pub block_index: u32,
}

impl DiskLocation {
    pub fn new(access_method: DiskAccessMethod, block_index: u32) -> Self {
        Self {
            access_method,
            block_index,
        }
    }
}

/// A contiguous, block-aligned region of the source image destined for a
/// specific place on the target disk.
///
/// Flash parts are produced by [`crate::split`] and consumed, unchanged, by
/// [`crate::payload::generate`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlashPart {
    /// Human readable name, usually the partition name (e.g., "EFIESP").
    pub name: String,
    /// How `start_block` addresses the target disk.
    pub access_method: DiskAccessMethod,
    /// Target block index of the first block of this part. For
    /// [`DiskAccessMethod::DiskEnd`] this is the index of the part's first
    /// block counted backwards from the end of the disk.
    pub start_block: u32,
    /// Byte offset of the part within the source stream.
    pub source_offset: u64,
    /// Length of the part in bytes. Must be a multiple of the block size.
    pub length: u64,
    /// Number of blocks on the addressed disk.
    pub disk_blocks: u32,
}

impl FlashPart {
    /// Number of whole blocks in this part, or `None` if the length is not
    /// block aligned.
    pub fn block_count(&self, block_size: u32) -> Option<u32> {
        let block_size = u64::from(block_size);
        if block_size == 0 || self.length % block_size != 0 {
            return None;
        }
        u32::try_from(self.length / block_size).ok()
    }

    /// Target location of the `n`th block of this part.
    ///
    /// Blocks are always read forwards from `source_offset`, so for a part
    /// addressed from the disk end the backwards index shrinks as `n` grows.
    pub fn location(&self, n: u32) -> Option<DiskLocation> {
        let index = match self.access_method {
            DiskAccessMethod::DiskBegin => self.start_block.checked_add(n)?,
            DiskAccessMethod::DiskEnd => self.start_block.checked_sub(n)?,
        };
        Some(DiskLocation::new(self.access_method, index))
    }
}

impl fmt::Display for FlashPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let anchor = match self.access_method {
            DiskAccessMethod::DiskBegin => "begin",
            DiskAccessMethod::DiskEnd => "end",
        };
        write!(
            f,
            "{:<20} {:>10} bytes @ 0x{:010x} -> block {} from {}",
            self.name, self.length, self.source_offset, self.start_block, anchor
        )
    }
}
