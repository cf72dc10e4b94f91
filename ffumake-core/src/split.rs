//! Splits a raw disk image into [`FlashPart`]s.
//!
//! A GPT image yields the primary GPT, every partition not named in the
//! exclusion list, and the backup GPT (addressed from the end of the disk).
//! An image without a GPT is a single part covering everything.
//!
//! The image length does not have to be a multiple of the block size: the
//! last block is zero padded through [`ZeroPadded`], so every part handed to
//! the payload generator is block aligned.
use crate::error::{Error, Result};
use crate::gpt::{self, Gpt};
use crate::part::{DiskAccessMethod, FlashPart};
use log::{debug, info};
use std::io::{self, Read, Seek, SeekFrom};

/// Result of splitting an image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SplitImage {
    pub parts: Vec<FlashPart>,
    /// Disk extent in blocks, after padding the final block.
    pub disk_blocks: u32,
    /// Image length rounded up to a whole number of blocks.
    pub padded_len: u64,
}

/// Checks that `sector_size` and `block_size` are usable together.
pub fn validate_geometry(block_size: u32, sector_size: u32) -> Result<()> {
    if sector_size == 0 || !sector_size.is_power_of_two() {
        return Err(Error::config(format!(
            "sector size {sector_size} is not a power of two"
        )));
    }
    if block_size == 0 || block_size % sector_size != 0 {
        return Err(Error::config(format!(
            "block size {block_size} is not a non-zero multiple of the {sector_size} byte sector size"
        )));
    }
    Ok(())
}

/// Half-open block range `[start, end)` from a byte range, widened outward to
/// block boundaries.
fn block_span(start: u64, end: u64, block_size: u64) -> (u64, u64) {
    (start / block_size, end.div_ceil(block_size))
}

/// Hands out block ranges in ascending order, trimming any overlap with
/// ranges already handed out.
struct Claims {
    block_size: u64,
    disk_blocks: u64,
    claimed_until: u64,
    parts: Vec<FlashPart>,
}

impl Claims {
    fn claim(&mut self, name: &str, access_method: DiskAccessMethod, start: u64, end: u64) {
        let start = start.max(self.claimed_until);
        let end = end.min(self.disk_blocks);
        if start >= end {
            debug!("Flash part '{}' is entirely covered by earlier parts", name);
            return;
        }
        let start_block = match access_method {
            DiskAccessMethod::DiskBegin => start,
            DiskAccessMethod::DiskEnd => self.disk_blocks - 1 - start,
        };
        // Both bounds are below disk_blocks, which fits in a u32.
        let start_block = start_block as u32;
        self.parts.push(FlashPart {
            name: name.to_string(),
            access_method,
            start_block,
            source_offset: start * self.block_size,
            length: (end - start) * self.block_size,
            disk_blocks: self.disk_blocks as u32,
        });
        self.claimed_until = end;
    }
}

/// Splits the image in `source` into flash parts.
///
/// `exclusions` names partitions that are left out entirely.
///
/// # Errors
///
/// - [`Error::Configuration`] for an unusable block/sector size, an image too
///   large to address with 32-bit block indices, or a GPT that describes
///   regions outside the image.
/// - [`Error::Io`] if the image cannot be read.
pub fn split_into_flash_parts<R: Read + Seek>(
    source: &mut R,
    image_len: u64,
    block_size: u32,
    exclusions: &[String],
    sector_size: u32,
) -> Result<SplitImage> {
    validate_geometry(block_size, sector_size)?;
    let bs = u64::from(block_size);
    let disk_blocks = image_len.div_ceil(bs);
    if disk_blocks > u64::from(u32::MAX) {
        return Err(Error::config(format!(
            "image of {image_len} bytes has more than 2^32 blocks of {block_size} bytes"
        )));
    }
    let padded_len = disk_blocks * bs;

    let mut claims = Claims {
        block_size: bs,
        disk_blocks,
        claimed_until: 0,
        parts: Vec::new(),
    };

    match gpt::read(source, sector_size, image_len)? {
        None => {
            info!("No GPT found; treating the image as a single flash part");
            claims.claim("Image", DiskAccessMethod::DiskBegin, 0, disk_blocks);
        }
        Some(table) => split_gpt(&table, image_len, sector_size, exclusions, &mut claims)?,
    }

    for part in &claims.parts {
        debug!("  {}", part);
    }
    info!(
        "Split image into {} flash part(s) over {} blocks",
        claims.parts.len(),
        disk_blocks
    );

    Ok(SplitImage {
        parts: claims.parts,
        disk_blocks: disk_blocks as u32,
        padded_len,
    })
}

fn split_gpt(
    table: &Gpt,
    image_len: u64,
    sector_size: u32,
    exclusions: &[String],
    claims: &mut Claims,
) -> Result<()> {
    let sector = u64::from(sector_size);
    let bs = claims.block_size;
    let header = &table.header;

    // DiskEnd indices count back from the last block, so that block must end
    // exactly where the image (and the backup GPT header) ends.
    if image_len % bs != 0 {
        return Err(Error::config(format!(
            "GPT image of {image_len} bytes is not a multiple of the {bs} byte block size"
        )));
    }

    let primary_end = header.entries_lba * sector + header.entries_len();
    let (start, end) = block_span(0, primary_end, bs);
    claims.claim("GPT", DiskAccessMethod::DiskBegin, start, end);

    let mut partitions: Vec<_> = table.partitions.iter().collect();
    partitions.sort_by_key(|p| p.first_lba);
    for p in partitions {
        if exclusions.iter().any(|x| *x == p.name) {
            info!("Excluding partition '{}'", p.name);
            continue;
        }
        let byte_end = p
            .last_lba
            .checked_add(1)
            .ok_or_else(|| Error::config(format!("partition '{}' has an invalid last LBA", p.name)))?
            .saturating_mul(sector);
        if byte_end > image_len {
            return Err(Error::config(format!(
                "partition '{}' ends at byte {} beyond the {} byte image",
                p.name, byte_end, image_len
            )));
        }
        let (start, end) = block_span(p.first_lba * sector, byte_end, bs);
        claims.claim(&p.name, DiskAccessMethod::DiskBegin, start, end);
    }

    let backup_start = header
        .backup_lba
        .checked_sub(header.entries_sectors(sector_size))
        .ok_or_else(|| Error::config("backup GPT overlaps the start of the disk"))?;
    let backup_end = header
        .backup_lba
        .checked_add(1)
        .ok_or_else(|| Error::config("backup GPT LBA is invalid"))?
        .saturating_mul(sector);
    if backup_end > image_len {
        return Err(Error::config(format!(
            "backup GPT at LBA {} lies beyond the image",
            header.backup_lba
        )));
    }
    let (start, end) = block_span(backup_start * sector, backup_end, bs);
    claims.claim("BackupGPT", DiskAccessMethod::DiskEnd, start, end);
    Ok(())
}

/// A reader that extends `inner` with zeros up to `padded_len` bytes.
pub struct ZeroPadded<R> {
    inner: R,
    inner_len: u64,
    padded_len: u64,
    pos: u64,
}

impl<R: Read + Seek> ZeroPadded<R> {
    pub fn new(mut inner: R, inner_len: u64, padded_len: u64) -> io::Result<Self> {
        inner.seek(SeekFrom::Start(0))?;
        Ok(Self {
            inner,
            inner_len,
            padded_len: padded_len.max(inner_len),
            pos: 0,
        })
    }
}

impl<R: Read> Read for ZeroPadded<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.padded_len || buf.is_empty() {
            return Ok(0);
        }
        let n = if self.pos < self.inner_len {
            let want = (self.inner_len - self.pos).min(buf.len() as u64) as usize;
            self.inner.read(&mut buf[..want])?
        } else {
            let want = (self.padded_len - self.pos).min(buf.len() as u64) as usize;
            buf[..want].fill(0);
            want
        };
        self.pos += n as u64;
        Ok(n)
    }
}

impl<R: Seek> Seek for ZeroPadded<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(p) => Some(p),
            SeekFrom::End(d) => self.padded_len.checked_add_signed(d),
            SeekFrom::Current(d) => self.pos.checked_add_signed(d),
        }
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid seek"))?;
        self.inner.seek(SeekFrom::Start(target.min(self.inner_len)))?;
        self.pos = target;
        Ok(target)
    }
}
