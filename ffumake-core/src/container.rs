//! Container assembly.
//!
//! A container is the store header followed by the write descriptor table.
//! Block payload bytes are only appended when explicitly requested.
use crate::error::{Error, Result};
use crate::payload::BlockPayload;
use log::info;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Concatenates the encoded store header and descriptor table.
pub fn assemble(header: &[u8], descriptors: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(header.len() + descriptors.len());
    out.extend_from_slice(header);
    out.extend_from_slice(descriptors);
    out
}

/// Writes the container to `out`, optionally followed by every payload's
/// content in descriptor order. Returns the number of bytes written.
pub fn write_to<W: Write>(out: &mut W, container: &[u8], payloads: Option<&[BlockPayload]>) -> io::Result<u64> {
    out.write_all(container)?;
    let mut written = container.len() as u64;
    for payload in payloads.unwrap_or_default() {
        out.write_all(payload.data())?;
        written += payload.data().len() as u64;
    }
    out.flush()?;
    Ok(written)
}

/// Creates `path` holding the container, never replacing an existing file.
///
/// The data is written to a temporary file in the destination directory and
/// moved into place only once complete, so a failed write leaves nothing
/// behind.
///
/// # Errors
///
/// [`Error::AlreadyExists`] if `path` exists, [`Error::Io`] otherwise.
pub fn write_new(path: &Path, container: &[u8], payloads: Option<&[BlockPayload]>) -> Result<u64> {
    if path.exists() {
        return Err(Error::AlreadyExists {
            path: path.to_path_buf(),
        });
    }
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut temp = NamedTempFile::new_in(dir)?;
    let written = {
        let mut writer = BufWriter::new(temp.as_file_mut());
        write_to(&mut writer, container, payloads)?
    };
    temp.as_file().sync_all()?;

    temp.persist_noclobber(path).map_err(|e| {
        if e.error.kind() == io::ErrorKind::AlreadyExists {
            Error::AlreadyExists {
                path: path.to_path_buf(),
            }
        } else {
            Error::Io(e.error)
        }
    })?;

    info!("Wrote {} bytes to {}", written, path.display());
    Ok(written)
}
