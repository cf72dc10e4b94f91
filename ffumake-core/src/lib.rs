//! The core, UI-agnostic library for the `ffumake` utility.
//!
//! `ffumake-core` turns a raw disk image into a Full Flash Update (FFU) style
//! container: a store header, a table of write descriptors, and (optionally)
//! the deduplicated block data those descriptors refer to. It can be used by
//! any front-end, whether it's a command-line interface (like `ffumake`) or a
//! build system.
//!
//! The library is structured into several key modules:
//! - [`split`]: Splits an image into [`part::FlashPart`]s using its GPT.
//! - [`payload`]: Deduplicates blocks into [`payload::BlockPayload`]s.
//! - [`descriptor`]: Encodes the write descriptor table.
//! - [`header`]: Encodes the store header from the table's totals.
//! - [`container`]: Assembles and writes the output file.
//!
//! The primary entry point is [`convert::run`], which reports progress via
//! callbacks so the calling application can display it in any way it chooses.
//!
//! ## Example
//!
//! ```rust,no_run
//! use ffumake_core::convert::{self, ConvertOptions};
//!
//! fn main() -> ffumake_core::Result<()> {
//!     let mut options = ConvertOptions::new(
//!         "disk.img",
//!         "flash.ffu",
//!         vec!["Qualcomm.MSM8994.P6211".to_string()],
//!     );
//!     options.block_size = 128 * 1024;
//!
//!     let summary = convert::run(&options, |_total| {}, |_done| {})?;
//!     println!("{} write descriptors", summary.write_descriptor_count);
//!     Ok(())
//! }
//! ```

pub mod container;
pub mod convert;
pub mod descriptor;
mod error;
pub mod exclusion;
pub mod gpt;
pub mod header;
pub mod part;
pub mod payload;
pub mod source;
pub mod split;

pub use error::{Error, ErrorKind, Result};
