//! Contains the end-to-end conversion from a raw disk image to a container.
//!
//! The stages run strictly in order, each consuming the previous one's output:
//! 1.  Open (and, if needed, decompress) the source image.
//! 2.  Split it into flash parts.
//! 3.  Deduplicate the parts' blocks into payloads.
//! 4.  Encode the write descriptor table.
//! 5.  Finalize and encode the store header with the table's totals.
//! 6.  Write header and table (and optionally payload data) to a new file.
use crate::container;
use crate::descriptor::DescriptorTable;
use crate::error::{Error, Result};
use crate::exclusion;
use crate::header::{CompressionAlgorithm, FormatVersion, StoreHeaderTemplate, UpdateType};
use crate::payload;
use crate::source;
use crate::split::{self, ZeroPadded};
use log::info;
use std::path::PathBuf;

/// Default device sector size in bytes.
pub const DEFAULT_SECTOR_SIZE: u32 = 512;
/// Default block size in bytes (128 KiB).
pub const DEFAULT_BLOCK_SIZE: u32 = 0x20000;
/// Default cap on recorded all-zero blocks.
pub const DEFAULT_MAX_BLANK_BLOCKS: u32 = 100;

/// Everything a conversion needs to know.
#[derive(Clone, Debug)]
pub struct ConvertOptions {
    pub input: PathBuf,
    pub output: PathBuf,
    pub platform_ids: Vec<String>,
    pub sector_size: u32,
    pub block_size: u32,
    pub max_blank_blocks: u32,
    pub format: FormatVersion,
    pub update_type: UpdateType,
    pub compression: CompressionAlgorithm,
    /// Optional line-delimited list of partition names to leave out.
    pub exclusion_list: Option<PathBuf>,
    /// Append block payload bytes after the descriptor table.
    pub with_payload_data: bool,
}

impl ConvertOptions {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>, platform_ids: Vec<String>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            platform_ids,
            sector_size: DEFAULT_SECTOR_SIZE,
            block_size: DEFAULT_BLOCK_SIZE,
            max_blank_blocks: DEFAULT_MAX_BLANK_BLOCKS,
            format: FormatVersion::V1,
            update_type: UpdateType::Full,
            compression: CompressionAlgorithm::None,
            exclusion_list: None,
            with_payload_data: false,
        }
    }
}

/// Totals of a finished conversion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConvertSummary {
    pub flash_parts: usize,
    pub blocks_read: u64,
    pub write_descriptor_count: u32,
    pub write_descriptor_length: u32,
    pub blank_blocks_dropped: u64,
    pub bytes_written: u64,
}

/// Converts `options.input` into a new container at `options.output`.
///
/// # Arguments
///
/// * `options` - Paths and format settings.
/// * `on_generate_start` - Closure called once splitting is done, with the
///   number of blocks that will be read.
/// * `on_generate_progress` - Closure called with the number of blocks read so far.
///
/// # Errors
///
/// This function will return an error if:
/// - The input image or exclusion list does not exist ([`Error::NotFound`]).
/// - The output already exists ([`Error::AlreadyExists`]).
/// - The sizes, image layout or format options are invalid ([`Error::Configuration`]).
/// - An I/O error occurs on either file ([`Error::Io`]).
///
/// Nothing is created at `options.output` unless every stage succeeds.
pub fn run<F>(
    options: &ConvertOptions,
    on_generate_start: impl FnOnce(u64),
    mut on_generate_progress: F,
) -> Result<ConvertSummary>
where
    F: FnMut(u64),
{
    if options.output.exists() {
        return Err(Error::AlreadyExists {
            path: options.output.clone(),
        });
    }
    split::validate_geometry(options.block_size, options.sector_size)?;
    let template = StoreHeaderTemplate::new(
        options.platform_ids.clone(),
        options.block_size,
        options.update_type,
        options.format,
        options.compression,
    )?;
    let exclusions = match &options.exclusion_list {
        Some(path) => exclusion::load(path)?,
        None => Vec::new(),
    };

    let mut image = source::open_image(&options.input)?;
    let image_len = image.len();
    info!("Source image {} is {} bytes", options.input.display(), image_len);

    let layout = split::split_into_flash_parts(
        image.file_mut(),
        image_len,
        options.block_size,
        &exclusions,
        options.sector_size,
    )?;

    let total = payload::total_blocks(&layout.parts, options.block_size);
    on_generate_start(total);
    let payloads = {
        let mut padded = ZeroPadded::new(image.file_mut(), image_len, layout.padded_len)?;
        payload::generate(
            &mut padded,
            &layout.parts,
            options.block_size,
            options.max_blank_blocks,
            &mut on_generate_progress,
        )?
    };
    // The source is no longer needed; release it (and any temp copy) now.
    drop(image);

    info!(
        "{} blocks deduplicated into {} payload(s), {} blank block(s) dropped",
        payloads.blocks_seen(),
        payloads.payloads().len(),
        payloads.blank_dropped()
    );

    let table = DescriptorTable::encode(payloads.payloads(), template.format())?;
    let header = template.finalize(&table);
    let container = container::assemble(&header.encode(), table.as_bytes());

    let payload_data = options.with_payload_data.then(|| payloads.payloads());
    let bytes_written = container::write_new(&options.output, &container, payload_data)?;

    Ok(ConvertSummary {
        flash_parts: layout.parts.len(),
        blocks_read: payloads.blocks_seen(),
        write_descriptor_count: header.write_descriptor_count(),
        write_descriptor_length: header.write_descriptor_length(),
        blank_blocks_dropped: payloads.blank_dropped(),
        bytes_written,
    })
}
