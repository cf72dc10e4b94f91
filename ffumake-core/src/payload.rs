//! Block deduplication.
//!
//! Every block of every flash part is read in source order and keyed by the
//! SHA-256 digest of its content. The first block with a given key allocates a
//! [`BlockPayload`]; later blocks with the same key only append a
//! [`DiskLocation`] to it. Payloads therefore come out in first-occurrence
//! order, which is also the order of the write descriptor table.
//!
//! All-zero blocks are by far the most common duplicate. Their location list is
//! capped at `max_blank_blocks`; once the cap is reached further blank blocks
//! are left out of the descriptor table altogether.
use crate::error::{Error, Result};
use crate::part::{DiskLocation, FlashPart};
use log::{debug, trace, warn};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};

/// SHA-256 digest of a block's exact content.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentKey([u8; 32]);

impl ContentKey {
    pub fn of(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0[..8] {
            write!(f, "{b:02x}")?;
        }
        f.write_str("..")
    }
}

/// One distinct block of content and every place it must be written.
#[derive(Clone, Debug)]
pub struct BlockPayload {
    key: ContentKey,
    data: Vec<u8>,
    locations: Vec<DiskLocation>,
}

impl BlockPayload {
    pub fn key(&self) -> ContentKey {
        self.key
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Target locations in the order they were discovered.
    pub fn locations(&self) -> &[DiskLocation] {
        &self.locations
    }

    /// Number of blocks this payload represents. A payload is always exactly
    /// one block of content.
    pub fn block_count(&self) -> u32 {
        1
    }

    pub fn is_blank(&self) -> bool {
        is_blank(&self.data)
    }
}

fn is_blank(data: &[u8]) -> bool {
    data.iter().all(|&b| b == 0)
}

/// Run-scoped accumulator of deduplicated payloads.
///
/// Nothing here is global: a fresh set is created per conversion, so the
/// generator can be driven block by block from tests.
#[derive(Debug)]
pub struct PayloadSet {
    block_size: u32,
    max_blank_blocks: u32,
    payloads: Vec<BlockPayload>,
    by_key: HashMap<ContentKey, usize>,
    blank_recorded: u32,
    blank_dropped: u64,
    blocks_seen: u64,
}

impl PayloadSet {
    pub fn new(block_size: u32, max_blank_blocks: u32) -> Result<Self> {
        if block_size == 0 {
            return Err(Error::config("block size must be non-zero"));
        }
        Ok(Self {
            block_size,
            max_blank_blocks,
            payloads: Vec::new(),
            by_key: HashMap::new(),
            blank_recorded: 0,
            blank_dropped: 0,
            blocks_seen: 0,
        })
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Records one block of content at `location`.
    ///
    /// Returns `false` if the block was dropped by the blank-block cap.
    pub fn add_block(&mut self, data: &[u8], location: DiskLocation) -> Result<bool> {
        if data.len() != self.block_size as usize {
            return Err(Error::config(format!(
                "block of {} bytes does not match block size {}",
                data.len(),
                self.block_size
            )));
        }
        self.blocks_seen += 1;

        if is_blank(data) {
            if self.blank_recorded >= self.max_blank_blocks {
                if self.blank_dropped == 0 {
                    warn!(
                        "Blank block cap of {} reached; further blank blocks are left undescribed",
                        self.max_blank_blocks
                    );
                }
                self.blank_dropped += 1;
                return Ok(false);
            }
            self.blank_recorded += 1;
        }

        let key = ContentKey::of(data);
        match self.by_key.get(&key) {
            Some(&i) => {
                debug_assert_eq!(self.payloads[i].data, data);
                trace!("Block {:?} duplicates payload #{} ({:?})", location, i, key);
                self.payloads[i].locations.push(location);
            }
            None => {
                self.by_key.insert(key, self.payloads.len());
                self.payloads.push(BlockPayload {
                    key,
                    data: data.to_vec(),
                    locations: vec![location],
                });
            }
        }
        Ok(true)
    }

    pub fn payloads(&self) -> &[BlockPayload] {
        &self.payloads
    }

    pub fn into_payloads(self) -> Vec<BlockPayload> {
        self.payloads
    }

    /// Number of blank blocks left out because of the cap.
    pub fn blank_dropped(&self) -> u64 {
        self.blank_dropped
    }

    /// Number of blocks offered to [`PayloadSet::add_block`], dropped or not.
    pub fn blocks_seen(&self) -> u64 {
        self.blocks_seen
    }
}

/// Validates `part` against `block_size` and its disk extent, returning its
/// block count.
fn check_part(part: &FlashPart, block_size: u32) -> Result<u32> {
    let blocks = part.block_count(block_size).ok_or_else(|| {
        Error::config(format!(
            "flash part '{}' is {} bytes, not a multiple of the {} byte block size",
            part.name, part.length, block_size
        ))
    })?;
    if blocks == 0 {
        return Ok(0);
    }
    let first = part.location(0);
    let last = part.location(blocks - 1);
    let in_extent = |loc: Option<DiskLocation>| loc.is_some_and(|l| l.block_index < part.disk_blocks);
    if !in_extent(first) || !in_extent(last) {
        return Err(Error::config(format!(
            "flash part '{}' ({} blocks from block {}) exceeds the {} block disk",
            part.name, blocks, part.start_block, part.disk_blocks
        )));
    }
    Ok(blocks)
}

/// Reads every block of `parts` from `source` and deduplicates them.
///
/// `on_progress` is called with the number of blocks processed so far after
/// each block.
///
/// # Errors
///
/// - [`Error::Configuration`] if `block_size` is zero, a part is not block
///   aligned, a part addresses blocks outside its disk, or the source ends
///   inside a part.
/// - [`Error::Io`] on read failure.
pub fn generate<R, F>(
    source: &mut R,
    parts: &[FlashPart],
    block_size: u32,
    max_blank_blocks: u32,
    mut on_progress: F,
) -> Result<PayloadSet>
where
    R: Read + Seek,
    F: FnMut(u64),
{
    let mut set = PayloadSet::new(block_size, max_blank_blocks)?;
    let mut buffer = vec![0u8; block_size as usize];
    let mut done: u64 = 0;

    for part in parts {
        let blocks = check_part(part, block_size)?;
        debug!("Generating payloads for {}", part);
        source.seek(SeekFrom::Start(part.source_offset))?;

        for n in 0..blocks {
            source.read_exact(&mut buffer).map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof => Error::config(format!(
                    "source ends inside flash part '{}' (block {} of {})",
                    part.name, n, blocks
                )),
                _ => Error::Io(e),
            })?;
            let location = part
                .location(n)
                .ok_or_else(|| Error::config(format!("block {n} of '{}' has no location", part.name)))?;
            set.add_block(&buffer, location)?;
            done += 1;
            on_progress(done);
        }
    }

    Ok(set)
}

/// Total number of blocks in `parts`, for progress reporting.
pub fn total_blocks(parts: &[FlashPart], block_size: u32) -> u64 {
    parts
        .iter()
        .filter_map(|p| p.block_count(block_size))
        .map(u64::from)
        .sum()
}
