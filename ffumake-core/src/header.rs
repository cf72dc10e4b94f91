//! Store header encoding.
//!
//! The store header describes the write descriptor table that follows it, so
//! it can only be completed once every descriptor has been encoded. That
//! ordering is made explicit with two types: a [`StoreHeaderTemplate`] holds
//! the validated configuration, and [`StoreHeaderTemplate::finalize`] folds in
//! the totals of a [`DescriptorTable`] to produce an encodable [`StoreHeader`].
use crate::descriptor::DescriptorTable;
use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Width of one NUL padded platform identifier field.
pub const PLATFORM_ID_FIELD_LEN: usize = 192;

const STORE_MINOR_VERSION: u16 = 0;
const FULL_FLASH_MAJOR_VERSION: u16 = 2;

/// Container format revision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FormatVersion {
    V1,
    /// V1 with the compression-ready descriptor layout.
    V1Compressed,
    V2,
}

impl FormatVersion {
    /// Whether each write descriptor carries the reserved compressed-size word.
    pub fn compressed_descriptors(self) -> bool {
        matches!(self, Self::V1Compressed)
    }

    fn store_major_version(self) -> u16 {
        match self {
            Self::V1 | Self::V1Compressed => 1,
            Self::V2 => 2,
        }
    }

    fn full_flash_minor_version(self) -> u16 {
        match self {
            Self::V1Compressed => 1,
            Self::V1 | Self::V2 => 0,
        }
    }

    fn has_compression_field(self) -> bool {
        !matches!(self, Self::V1)
    }
}

impl FromStr for FormatVersion {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "v1" | "1" => Ok(Self::V1),
            "v1-compressed" | "v1c" => Ok(Self::V1Compressed),
            "v2" | "2" => Ok(Self::V2),
            other => Err(format!("unknown format version '{other}'")),
        }
    }
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::V1 => "v1",
            Self::V1Compressed => "v1-compressed",
            Self::V2 => "v2",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum UpdateType {
    Full = 0,
    Partial = 1,
}

impl FromStr for UpdateType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "partial" => Ok(Self::Partial),
            other => Err(format!("unknown update type '{other}'")),
        }
    }
}

/// Payload compression selector recorded in the header.
///
/// Only [`CompressionAlgorithm::None`] can currently be encoded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum CompressionAlgorithm {
    None = 0,
    Xpress = 1,
}

impl FromStr for CompressionAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Self::None),
            "xpress" => Ok(Self::Xpress),
            other => Err(format!("unknown compression algorithm '{other}'")),
        }
    }
}

/// Validated header configuration, waiting for descriptor totals.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreHeaderTemplate {
    platform_ids: Vec<String>,
    block_size: u32,
    update_type: UpdateType,
    format: FormatVersion,
    compression: CompressionAlgorithm,
}

impl StoreHeaderTemplate {
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the platform ids cannot be encoded
    /// for `format`, `block_size` is zero, or `compression` is not `None`.
    pub fn new(
        platform_ids: Vec<String>,
        block_size: u32,
        update_type: UpdateType,
        format: FormatVersion,
        compression: CompressionAlgorithm,
    ) -> Result<Self> {
        if block_size == 0 {
            return Err(Error::config("block size must be non-zero"));
        }
        if compression != CompressionAlgorithm::None {
            return Err(if format.has_compression_field() {
                Error::config(format!("{compression:?} compression is not implemented"))
            } else {
                Error::config(format!("format {format} cannot record a compression algorithm"))
            });
        }
        validate_platform_ids(&platform_ids, format)?;

        Ok(Self {
            platform_ids,
            block_size,
            update_type,
            format,
            compression,
        })
    }

    pub fn format(&self) -> FormatVersion {
        self.format
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Completes the header with the totals of the encoded descriptor table.
    pub fn finalize(self, table: &DescriptorTable) -> StoreHeader {
        StoreHeader {
            write_descriptor_count: table.count(),
            write_descriptor_length: table.byte_len(),
            template: self,
        }
    }
}

fn validate_platform_ids(ids: &[String], format: FormatVersion) -> Result<()> {
    if ids.is_empty() {
        return Err(Error::config("at least one platform id is required"));
    }
    for id in ids {
        if id.is_empty() || !id.is_ascii() || id.contains([';', '\0']) {
            return Err(Error::config(format!(
                "platform id '{id}' must be non-empty ASCII without ';' or NUL"
            )));
        }
        if id.len() >= PLATFORM_ID_FIELD_LEN {
            return Err(Error::config(format!(
                "platform id '{id}' is longer than {} bytes",
                PLATFORM_ID_FIELD_LEN - 1
            )));
        }
    }
    if format != FormatVersion::V2 && joined_ids(ids).len() >= PLATFORM_ID_FIELD_LEN {
        return Err(Error::config(format!(
            "platform ids do not fit the {PLATFORM_ID_FIELD_LEN} byte field of format {format}"
        )));
    }
    Ok(())
}

fn joined_ids(ids: &[String]) -> String {
    ids.join(";")
}

fn push_platform_field(out: &mut Vec<u8>, id: &str) {
    let mut field = [0u8; PLATFORM_ID_FIELD_LEN];
    field[..id.len()].copy_from_slice(id.as_bytes());
    out.extend_from_slice(&field);
}

/// A complete store header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreHeader {
    template: StoreHeaderTemplate,
    write_descriptor_count: u32,
    write_descriptor_length: u32,
}

impl StoreHeader {
    pub fn write_descriptor_count(&self) -> u32 {
        self.write_descriptor_count
    }

    pub fn write_descriptor_length(&self) -> u32 {
        self.write_descriptor_length
    }

    /// Bytes of block data described by the descriptor table.
    pub fn payload_size(&self) -> u64 {
        u64::from(self.write_descriptor_count) * u64::from(self.template.block_size)
    }

    pub fn encode(&self) -> Vec<u8> {
        let t = &self.template;
        let mut out = Vec::with_capacity(256 + t.platform_ids.len() * PLATFORM_ID_FIELD_LEN);

        out.extend_from_slice(&(t.update_type as u32).to_le_bytes());
        out.extend_from_slice(&t.format.store_major_version().to_le_bytes());
        out.extend_from_slice(&STORE_MINOR_VERSION.to_le_bytes());
        out.extend_from_slice(&FULL_FLASH_MAJOR_VERSION.to_le_bytes());
        out.extend_from_slice(&t.format.full_flash_minor_version().to_le_bytes());

        match t.format {
            FormatVersion::V1 | FormatVersion::V1Compressed => {
                push_platform_field(&mut out, &joined_ids(&t.platform_ids));
            }
            FormatVersion::V2 => {
                out.extend_from_slice(&(t.platform_ids.len() as u32).to_le_bytes());
                for id in &t.platform_ids {
                    push_platform_field(&mut out, id);
                }
            }
        }

        out.extend_from_slice(&t.block_size.to_le_bytes());
        out.extend_from_slice(&self.write_descriptor_count.to_le_bytes());
        out.extend_from_slice(&self.write_descriptor_length.to_le_bytes());
        // Validate descriptors, then the initial, flash-only and final
        // table index/count pairs. None of them are produced.
        for _ in 0..8 {
            out.extend_from_slice(&0u32.to_le_bytes());
        }

        if t.format.has_compression_field() {
            out.extend_from_slice(&(t.compression as u32).to_le_bytes());
        }
        if t.format == FormatVersion::V2 {
            // NumOfStores, StoreIndex
            out.extend_from_slice(&1u16.to_le_bytes());
            out.extend_from_slice(&1u16.to_le_bytes());
            out.extend_from_slice(&self.payload_size().to_le_bytes());
        }
        out
    }
}

/// Encodes a store header in one call.
pub fn encode(
    platform_ids: &[String],
    block_size: u32,
    table: &DescriptorTable,
    update_type: UpdateType,
    format: FormatVersion,
    compression: CompressionAlgorithm,
) -> Result<Vec<u8>> {
    let template =
        StoreHeaderTemplate::new(platform_ids.to_vec(), block_size, update_type, format, compression)?;
    Ok(template.finalize(table).encode())
}
