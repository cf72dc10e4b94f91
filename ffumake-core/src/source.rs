//! Opens the source disk image.
//!
//! Compressed images (`.gz`, `.xz`, `.zst`) are decompressed to a temporary
//! file first, because splitting needs random access to the image.
use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use log::info;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, TempPath};
use xz2::read::XzDecoder;
use zstd::stream::read::Decoder as ZstdDecoder;

/// An opened source image.
///
/// If the image was decompressed to a temp file, this struct holds the handle
/// and the file is deleted on drop.
#[derive(Debug)]
pub struct SourceImage {
    file: File,
    len: u64,
    path: PathBuf,
    _temp_handle: Option<TempPath>,
}

impl SourceImage {
    /// Length of the (decompressed) image in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Path the image data is read from. For compressed inputs this is the
    /// temporary decompressed copy.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }
}

fn decoder_for(path: &Path, file: File) -> io::Result<Option<Box<dyn Read>>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    Ok(match ext.as_str() {
        "gz" | "gzip" => Some(Box::new(GzDecoder::new(BufReader::new(file))) as Box<dyn Read>),
        "xz" => Some(Box::new(XzDecoder::new(BufReader::new(file))) as Box<dyn Read>),
        "zst" | "zstd" => Some(Box::new(ZstdDecoder::new(BufReader::new(file))?) as Box<dyn Read>),
        _ => None,
    })
}

/// Opens `path`, decompressing it first if its extension says so.
///
/// # Errors
///
/// [`Error::NotFound`] if `path` does not exist, [`Error::Io`] for any read
/// or decompression failure.
pub fn open_image(path: &Path) -> Result<SourceImage> {
    let file = File::open(path).map_err(|e| Error::from_open(e, path))?;

    let Some(mut reader) = decoder_for(path, file.try_clone()?)? else {
        let len = file.metadata()?.len();
        return Ok(SourceImage {
            file,
            len,
            path: path.to_path_buf(),
            _temp_handle: None,
        });
    };

    info!("Decompressing {}", path.display());
    let mut temp_file = NamedTempFile::new()?;
    let len = {
        let mut writer = BufWriter::new(&mut temp_file);
        let len = io::copy(&mut reader, &mut writer)?;
        writer.flush()?;
        len
    };
    info!("Decompressed {} bytes", len);

    // Hand over ownership of the temp file to the SourceImage struct.
    let (mut file, temp_path) = temp_file.into_parts();
    file.seek(SeekFrom::Start(0))?;
    Ok(SourceImage {
        file,
        len,
        path: temp_path.to_path_buf(),
        _temp_handle: Some(temp_path),
    })
}
