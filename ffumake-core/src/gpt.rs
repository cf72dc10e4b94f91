//! Minimal GUID Partition Table reader.
//!
//! Only what the splitter needs is decoded: where the entry arrays live and
//! the name and LBA range of each used partition. CRCs are not checked.
use crate::error::{Error, Result};
use std::io::{Read, Seek, SeekFrom};

pub const GPT_SIGNATURE: &[u8; 8] = b"EFI PART";

const MIN_ENTRY_SIZE: u32 = 128;
const NAME_OFFSET: usize = 56;
const NAME_UNITS: usize = 36;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GptHeader {
    pub backup_lba: u64,
    pub first_usable_lba: u64,
    pub entries_lba: u64,
    pub num_entries: u32,
    pub entry_size: u32,
}

impl GptHeader {
    /// Size of the partition entry array in bytes.
    pub fn entries_len(&self) -> u64 {
        u64::from(self.num_entries) * u64::from(self.entry_size)
    }

    /// Sectors occupied by one copy of the partition entry array.
    pub fn entries_sectors(&self, sector_size: u32) -> u64 {
        self.entries_len().div_ceil(u64::from(sector_size))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GptPartition {
    pub name: String,
    pub first_lba: u64,
    /// Inclusive.
    pub last_lba: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Gpt {
    pub header: GptHeader,
    /// Used partitions, in table order.
    pub partitions: Vec<GptPartition>,
}

fn le_u32(b: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([b[off], b[off + 1], b[off + 2], b[off + 3]])
}

fn le_u64(b: &[u8], off: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&b[off..off + 8]);
    u64::from_le_bytes(bytes)
}

fn read_at<R: Read + Seek>(source: &mut R, offset: u64, buf: &mut [u8]) -> Result<()> {
    source.seek(SeekFrom::Start(offset))?;
    source.read_exact(buf)?;
    Ok(())
}

fn parse_name(raw: &[u8]) -> String {
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .take(NAME_UNITS)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|&u| u != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

/// Reads the primary GPT of an image of `image_len` bytes.
///
/// Returns `Ok(None)` if the image is too small or LBA 1 does not carry the
/// GPT signature.
pub fn read<R: Read + Seek>(source: &mut R, sector_size: u32, image_len: u64) -> Result<Option<Gpt>> {
    let sector = u64::from(sector_size);
    if image_len < 2 * sector {
        return Ok(None);
    }

    let mut lba1 = vec![0u8; sector_size as usize];
    read_at(source, sector, &mut lba1)?;
    if lba1.len() < 92 || &lba1[..8] != GPT_SIGNATURE {
        return Ok(None);
    }

    let header = GptHeader {
        backup_lba: le_u64(&lba1, 32),
        first_usable_lba: le_u64(&lba1, 40),
        entries_lba: le_u64(&lba1, 72),
        num_entries: le_u32(&lba1, 80),
        entry_size: le_u32(&lba1, 84),
    };

    if header.entry_size < MIN_ENTRY_SIZE || header.entry_size % 8 != 0 {
        return Err(Error::config(format!(
            "GPT entry size {} is invalid",
            header.entry_size
        )));
    }
    let entries_start = header.entries_lba.saturating_mul(sector);
    if header.entries_lba < 2 || entries_start.saturating_add(header.entries_len()) > image_len {
        return Err(Error::config(
            "GPT partition entry array lies outside the image",
        ));
    }

    let mut entries = vec![0u8; header.entries_len() as usize];
    read_at(source, entries_start, &mut entries)?;

    let mut partitions = Vec::new();
    for raw in entries.chunks_exact(header.entry_size as usize) {
        // An all-zero partition type GUID marks an unused entry.
        if raw[..16].iter().all(|&b| b == 0) {
            continue;
        }
        let partition = GptPartition {
            name: parse_name(&raw[NAME_OFFSET..NAME_OFFSET + NAME_UNITS * 2]),
            first_lba: le_u64(raw, 32),
            last_lba: le_u64(raw, 40),
        };
        if partition.last_lba < partition.first_lba {
            return Err(Error::config(format!(
                "partition '{}' ends before it starts",
                partition.name
            )));
        }
        partitions.push(partition);
    }

    Ok(Some(Gpt { header, partitions }))
}
