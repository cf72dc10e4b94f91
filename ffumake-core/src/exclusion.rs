//! Partition exclusion lists.
//!
//! One partition name per line. Surrounding whitespace is ignored, as are
//! empty lines and lines starting with `#`.
use crate::error::{Error, Result};
use std::fs;
use std::path::Path;

pub fn parse(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(String::from)
        .collect()
}

/// Reads the exclusion list at `path`.
///
/// # Errors
///
/// [`Error::NotFound`] if the file does not exist, [`Error::Io`] otherwise.
pub fn load(path: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path).map_err(|e| Error::from_open(e, path))?;
    let names = parse(&text);
    log::debug!("Loaded {} excluded partition name(s) from {}", names.len(), path.display());
    Ok(names)
}
