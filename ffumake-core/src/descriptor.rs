//! Write descriptor encoding.
//!
//! Each [`BlockPayload`] becomes one write descriptor, little-endian with no
//! padding:
//!
//! ```text
//! LocationCount    u32
//! BlockCount       u32
//! [reserved u32 = 0]                    (compressed header variant only)
//! (DiskAccessMethod u32, BlockIndex u32) * LocationCount
//! ```
use crate::error::{Error, Result};
use crate::header::FormatVersion;
use crate::payload::BlockPayload;

const ENTRY_SIZE: usize = 8;
const LOCATION_SIZE: usize = 8;
const RESERVED_SIZE: usize = 4;

/// Encoded size of a descriptor with `locations` entries.
pub fn encoded_len(locations: usize, format: FormatVersion) -> usize {
    let reserved = if format.compressed_descriptors() {
        RESERVED_SIZE
    } else {
        0
    };
    ENTRY_SIZE + reserved + locations * LOCATION_SIZE
}

/// Appends the encoded descriptor for `payload` to `out`.
pub fn encode_into(payload: &BlockPayload, format: FormatVersion, out: &mut Vec<u8>) -> Result<()> {
    let locations = payload.locations();
    let count = u32::try_from(locations.len())
        .map_err(|_| Error::config("too many locations for one write descriptor"))?;

    out.reserve(encoded_len(locations.len(), format));
    out.extend_from_slice(&count.to_le_bytes());
    out.extend_from_slice(&payload.block_count().to_le_bytes());
    if format.compressed_descriptors() {
        out.extend_from_slice(&0u32.to_le_bytes());
    }
    for loc in locations {
        out.extend_from_slice(&loc.access_method.as_u32().to_le_bytes());
        out.extend_from_slice(&loc.block_index.to_le_bytes());
    }
    Ok(())
}

/// Encodes a single write descriptor.
pub fn encode(payload: &BlockPayload, format: FormatVersion) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    encode_into(payload, format, &mut out)?;
    Ok(out)
}

/// The concatenated write descriptors of a run, together with the totals the
/// store header needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DescriptorTable {
    bytes: Vec<u8>,
    count: u32,
}

impl DescriptorTable {
    /// Encodes one descriptor per payload, in payload order.
    pub fn encode(payloads: &[BlockPayload], format: FormatVersion) -> Result<Self> {
        let count = u32::try_from(payloads.len())
            .map_err(|_| Error::config("too many write descriptors"))?;
        let total = payloads
            .iter()
            .map(|p| encoded_len(p.locations().len(), format))
            .sum();
        let mut bytes = Vec::with_capacity(total);
        for payload in payloads {
            encode_into(payload, format, &mut bytes)?;
        }
        u32::try_from(bytes.len())
            .map_err(|_| Error::config("write descriptor table exceeds 4 GiB"))?;
        Ok(Self { bytes, count })
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Exact byte length of the table. Fits in a `u32` by construction.
    pub fn byte_len(&self) -> u32 {
        self.bytes.len() as u32
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}
