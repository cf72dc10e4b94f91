use anyhow::Result;
use clap::Parser;
use console::style;
use ffumake_core::convert::{self, ConvertOptions};
use ffumake_core::header::{CompressionAlgorithm, FormatVersion, UpdateType};
use ffumake_core::ErrorKind;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "ffumake")]
#[command(about = "Convert a raw disk image into an FFU flash update container", version)]
struct Cli {
    /// Raw disk image to convert (may be .gz, .xz or .zst compressed)
    #[arg(required = true)]
    input: PathBuf,

    /// Container file to create (must not exist)
    #[arg(required = true)]
    output: PathBuf,

    /// Target platform identifier (repeat for several)
    #[arg(short = 'p', long = "platform-id", required = true)]
    platform_ids: Vec<String>,

    /// Device sector size in bytes
    #[arg(short = 's', long, default_value_t = convert::DEFAULT_SECTOR_SIZE)]
    sector_size: u32,

    /// Block size in bytes
    #[arg(short = 'b', long, default_value_t = convert::DEFAULT_BLOCK_SIZE)]
    block_size: u32,

    /// Maximum number of all-zero blocks recorded in the descriptor table
    #[arg(short = 'm', long, default_value_t = convert::DEFAULT_MAX_BLANK_BLOCKS)]
    max_blank_blocks: u32,

    /// Container format: v1, v1-compressed or v2
    #[arg(short = 'f', long, default_value = "v1")]
    format: FormatVersion,

    /// Update type: full or partial
    #[arg(short = 'u', long, default_value = "full")]
    update_type: UpdateType,

    /// Payload compression: none or xpress
    #[arg(short = 'c', long, default_value = "none")]
    compression: CompressionAlgorithm,

    /// File listing partition names to leave out, one per line
    #[arg(short = 'x', long = "exclusions")]
    exclusion_list: Option<PathBuf>,

    /// Append the block payload data after the descriptor table
    #[arg(long)]
    with_payload_data: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn into_options(self) -> ConvertOptions {
        let mut options = ConvertOptions::new(self.input, self.output, self.platform_ids);
        options.sector_size = self.sector_size;
        options.block_size = self.block_size;
        options.max_blank_blocks = self.max_blank_blocks;
        options.format = self.format;
        options.update_type = self.update_type;
        options.compression = self.compression;
        options.exclusion_list = self.exclusion_list;
        options.with_payload_data = self.with_payload_data;
        options
    }
}

/// Process exit code for a failed run.
fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<ffumake_core::Error>().map(|e| e.kind()) {
        Some(ErrorKind::NotFound) => 2,
        Some(ErrorKind::AlreadyExists) => 3,
        Some(ErrorKind::Configuration) => 4,
        Some(ErrorKind::Io) => 5,
        None => 1,
    }
}

fn convert(options: ConvertOptions) -> Result<()> {
    log::debug!("{options:?}");
    println!("  Image:  {}", style(options.input.display()).cyan());
    println!("  Output: {}", style(options.output.display()).cyan());
    println!(
        "  Format: {} ({} byte blocks, {} byte sectors)",
        options.format, options.block_size, options.sector_size
    );
    println!();

    let generate_pb = ProgressBar::new(0);

    let on_generate_start = |blocks| {
        generate_pb.set_length(blocks);
        generate_pb.set_prefix("Scanning");
        generate_pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{prefix:12} [{elapsed_precise}] [{bar:40.green/black}] {pos}/{len} blocks ({per_sec}, {eta})",
                )
                .unwrap()
                .progress_chars("■ "),
        );
    };
    let on_generate_progress = |blocks| generate_pb.set_position(blocks);

    let result = convert::run(&options, on_generate_start, on_generate_progress);

    match result {
        Ok(summary) => {
            generate_pb.finish_with_message("Scan complete.");
            println!(
                "\n✨ Wrote {} ({} bytes): {} write descriptors over {} flash parts, {} blank blocks dropped.",
                style(options.output.display()).cyan(),
                summary.bytes_written,
                summary.write_descriptor_count,
                summary.flash_parts,
                summary.blank_blocks_dropped,
            );
            Ok(())
        }
        Err(e) => {
            generate_pb.finish_and_clear();
            Err(e.into())
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    match convert(cli.into_options()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", style("ERROR:").red().bold(), e);
            ExitCode::from(exit_code(&e))
        }
    }
}
