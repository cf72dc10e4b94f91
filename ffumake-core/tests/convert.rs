use ffumake_core::ErrorKind;
use ffumake_core::convert::{self, ConvertOptions, ConvertSummary};
use ffumake_core::header::{FormatVersion, PLATFORM_ID_FIELD_LEN};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const BLOCK: usize = 4096;

/// Offset of BlockSizeInBytes in a V1 store header.
const V1_BLOCK_SIZE_OFFSET: usize = 12 + PLATFORM_ID_FIELD_LEN;
const V1_HEADER_LEN: usize = V1_BLOCK_SIZE_OFFSET + 12 + 32;

fn u32_at(b: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(b[off..off + 4].try_into().unwrap())
}

/// One decoded write descriptor: location list as (access method, block index).
type Descriptor = Vec<(u32, u32)>;

fn parse_descriptors(mut table: &[u8], compressed: bool) -> Vec<Descriptor> {
    let mut out = Vec::new();
    while !table.is_empty() {
        let count = u32_at(table, 0) as usize;
        assert_eq!(u32_at(table, 4), 1, "block count");
        let mut off = 8;
        if compressed {
            assert_eq!(u32_at(table, off), 0);
            off += 4;
        }
        let locations = (0..count)
            .map(|i| (u32_at(table, off + 8 * i), u32_at(table, off + 8 * i + 4)))
            .collect();
        out.push(locations);
        table = &table[off + 8 * count..];
    }
    out
}

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn image(&self, name: &str, data: &[u8]) -> PathBuf {
        let path = self.path(name);
        fs::write(&path, data).unwrap();
        path
    }
}

fn options(input: &Path, output: &Path) -> ConvertOptions {
    let mut o = ConvertOptions::new(input, output, vec!["Contoso.Test.Board".to_string()]);
    o.block_size = BLOCK as u32;
    o.max_blank_blocks = 10;
    o
}

fn run(o: &ConvertOptions) -> (ConvertSummary, Vec<u8>) {
    let summary = convert::run(o, |_| {}, |_| {}).unwrap();
    (summary, fs::read(&o.output).unwrap())
}

fn block(fill: u8) -> Vec<u8> {
    vec![fill; BLOCK]
}

#[test]
fn three_block_example() {
    let fx = Fixture::new();
    let input = fx.image("disk.img", &[block(0x11), block(0x22), block(0x11)].concat());
    let (summary, bytes) = run(&options(&input, &fx.path("out.ffu")));

    assert_eq!(summary.write_descriptor_count, 2);
    assert_eq!(u32_at(&bytes, V1_BLOCK_SIZE_OFFSET), BLOCK as u32);
    assert_eq!(u32_at(&bytes, V1_BLOCK_SIZE_OFFSET + 4), 2);
    let table_len = u32_at(&bytes, V1_BLOCK_SIZE_OFFSET + 8) as usize;
    assert_eq!(bytes.len(), V1_HEADER_LEN + table_len);

    let descriptors = parse_descriptors(&bytes[V1_HEADER_LEN..], false);
    assert_eq!(descriptors, vec![vec![(0, 0), (0, 2)], vec![(0, 1)]]);
}

#[test]
fn identical_inputs_give_identical_containers() {
    let fx = Fixture::new();
    let data: Vec<u8> = (0..9).flat_map(|i| block((i % 4) as u8)).collect();
    let input = fx.image("disk.img", &data);
    let (_, first) = run(&options(&input, &fx.path("a.ffu")));
    let (_, second) = run(&options(&input, &fx.path("b.ffu")));
    assert_eq!(first, second);
}

#[test]
fn duplicate_content_lands_in_one_descriptor() {
    let fx = Fixture::new();
    let fills = [5u8, 6, 5, 7, 6, 5, 8, 7];
    let data: Vec<u8> = fills.iter().flat_map(|&f| block(f)).collect();
    let input = fx.image("disk.img", &data);
    let mut o = options(&input, &fx.path("out.ffu"));
    o.format = FormatVersion::V1Compressed;
    let (summary, bytes) = run(&o);

    // V1Compressed adds a compression selector word to the header.
    let descriptors = parse_descriptors(&bytes[V1_HEADER_LEN + 4..], true);
    assert_eq!(descriptors.len() as u32, summary.write_descriptor_count);

    let mut owner: HashMap<u8, usize> = HashMap::new();
    for (d, locations) in descriptors.iter().enumerate() {
        for &(_, index) in locations {
            let fill = fills[index as usize];
            assert_eq!(*owner.entry(fill).or_insert(d), d, "fill {fill} split across descriptors");
        }
    }
    assert_eq!(owner.len(), 4);
    let located: usize = descriptors.iter().map(Vec::len).sum();
    assert_eq!(located, fills.len());
}

#[test]
fn blank_cap_limits_zero_block_locations() {
    let fx = Fixture::new();
    let mut data = block(0x33);
    data.extend(vec![0u8; 20 * BLOCK]);
    let input = fx.image("sparse.img", &data);

    let mut o = options(&input, &fx.path("capped.ffu"));
    o.max_blank_blocks = 4;
    let (summary, bytes) = run(&o);
    assert_eq!(summary.blank_blocks_dropped, 16);
    let descriptors = parse_descriptors(&bytes[V1_HEADER_LEN..], false);
    assert_eq!(descriptors[1].len(), 4);

    let mut o = options(&input, &fx.path("uncapped.ffu"));
    o.max_blank_blocks = 20;
    let (summary, bytes) = run(&o);
    assert_eq!(summary.blank_blocks_dropped, 0);
    let descriptors = parse_descriptors(&bytes[V1_HEADER_LEN..], false);
    assert_eq!(descriptors[1].len(), 20);
}

#[test]
fn unaligned_image_is_padded_by_the_splitter() {
    let fx = Fixture::new();
    let mut data = block(0x44);
    data.extend(vec![0x44u8; 100]);
    let input = fx.image("odd.img", &data);
    let (summary, bytes) = run(&options(&input, &fx.path("out.ffu")));
    assert_eq!(summary.blocks_read, 2);
    // The padded tail differs from the full block.
    assert_eq!(u32_at(&bytes, V1_BLOCK_SIZE_OFFSET + 4), 2);
}

#[test]
fn payload_data_is_opt_in() {
    let fx = Fixture::new();
    let input = fx.image("disk.img", &[block(1), block(2), block(1)].concat());
    let mut o = options(&input, &fx.path("full.ffu"));
    o.with_payload_data = true;
    let (summary, bytes) = run(&o);
    let table_len = summary.write_descriptor_length as usize;
    let data = &bytes[V1_HEADER_LEN + table_len..];
    assert_eq!(data, &[block(1), block(2)].concat()[..]);
}

#[test]
fn existing_output_is_left_untouched() {
    let fx = Fixture::new();
    let input = fx.image("disk.img", &block(1));
    let output = fx.image("out.ffu", b"previous");
    let err = convert::run(&options(&input, &output), |_| {}, |_| {}).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    assert_eq!(fs::read(&output).unwrap(), b"previous");
}

#[test]
fn missing_inputs_are_not_found() {
    let fx = Fixture::new();
    let output = fx.path("out.ffu");
    let err = convert::run(&options(&fx.path("nope.img"), &output), |_| {}, |_| {}).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(!output.exists());

    let input = fx.image("disk.img", &block(1));
    let mut o = options(&input, &output);
    o.exclusion_list = Some(fx.path("missing.txt"));
    let err = convert::run(&o, |_| {}, |_| {}).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(!output.exists());
}

#[test]
fn bad_geometry_is_a_configuration_error() {
    let fx = Fixture::new();
    let input = fx.image("disk.img", &block(1));
    let output = fx.path("out.ffu");
    let mut o = options(&input, &output);
    o.block_size = 1000;
    let err = convert::run(&o, |_| {}, |_| {}).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(!output.exists());
}

#[test]
fn progress_covers_every_block() {
    let fx = Fixture::new();
    let input = fx.image("disk.img", &[block(1), block(2), block(3)].concat());
    let mut total = 0;
    let mut last = 0;
    convert::run(
        &options(&input, &fx.path("out.ffu")),
        |t| total = t,
        |n| last = n,
    )
    .unwrap();
    assert_eq!(total, 3);
    assert_eq!(last, 3);
}

const SECTOR: usize = 512;
const GPT_BLOCK: usize = 2048;
const GPT_ENTRY_SIZE: usize = 128;
const GPT_ENTRIES: usize = 4;

/// Builds a 64 sector GPT disk: EFIESP (blocks 2-3, one repeated fill),
/// Data (blocks 4-7) and MainOS (blocks 8-13, a distinct fill per block).
/// The backup header sits in the last sector.
fn gpt_disk() -> Vec<u8> {
    let sectors = 64u64;
    let mut image = vec![0u8; sectors as usize * SECTOR];
    let parts: [(&str, u64, u64); 3] = [("EFIESP", 8, 15), ("Data", 16, 31), ("MainOS", 32, 55)];

    let hdr = &mut image[SECTOR..2 * SECTOR];
    hdr[..8].copy_from_slice(b"EFI PART");
    hdr[8..12].copy_from_slice(&0x0001_0000u32.to_le_bytes());
    hdr[12..16].copy_from_slice(&92u32.to_le_bytes());
    hdr[24..32].copy_from_slice(&1u64.to_le_bytes());
    hdr[32..40].copy_from_slice(&(sectors - 1).to_le_bytes());
    hdr[40..48].copy_from_slice(&3u64.to_le_bytes());
    hdr[48..56].copy_from_slice(&(sectors - 3).to_le_bytes());
    hdr[72..80].copy_from_slice(&2u64.to_le_bytes());
    hdr[80..84].copy_from_slice(&(GPT_ENTRIES as u32).to_le_bytes());
    hdr[84..88].copy_from_slice(&(GPT_ENTRY_SIZE as u32).to_le_bytes());

    for (i, (name, first, last)) in parts.iter().enumerate() {
        let off = 2 * SECTOR + i * GPT_ENTRY_SIZE;
        let e = &mut image[off..off + GPT_ENTRY_SIZE];
        e[..16].copy_from_slice(&[0xA2; 16]);
        e[16..32].copy_from_slice(&[i as u8 + 1; 16]);
        e[32..40].copy_from_slice(&first.to_le_bytes());
        e[40..48].copy_from_slice(&last.to_le_bytes());
        for (j, unit) in name.encode_utf16().enumerate() {
            e[56 + 2 * j..58 + 2 * j].copy_from_slice(&unit.to_le_bytes());
        }
    }

    image[2 * GPT_BLOCK..4 * GPT_BLOCK].fill(0xE5);
    image[4 * GPT_BLOCK..8 * GPT_BLOCK].fill(0xDA);
    for b in 8..14 {
        image[b * GPT_BLOCK..(b + 1) * GPT_BLOCK].fill(0x10 + b as u8);
    }
    let backup = (sectors as usize - 1) * SECTOR;
    image[backup..backup + 8].copy_from_slice(b"EFI PART");
    image
}

/// V2 store header length with one platform id.
const V2_HEADER_LEN: usize = 12 + 4 + PLATFORM_ID_FIELD_LEN + 12 + 32 + 4 + 4 + 8;

fn convert_gpt(fx: &Fixture, exclusions: Option<&str>, out: &str) -> (Vec<u8>, Vec<Descriptor>) {
    let input = fx.image("gpt.img", &gpt_disk());
    let mut o = options(&input, &fx.path(out));
    o.block_size = GPT_BLOCK as u32;
    o.format = FormatVersion::V2;
    if let Some(list) = exclusions {
        let path = fx.path("exclude.txt");
        fs::write(&path, list).unwrap();
        o.exclusion_list = Some(path);
    }
    let (summary, bytes) = run(&o);
    let descriptors = parse_descriptors(&bytes[V2_HEADER_LEN..], false);
    assert_eq!(descriptors.len() as u32, summary.write_descriptor_count);
    (bytes, descriptors)
}

#[test]
fn gpt_image_addresses_partitions_and_backup_table() {
    let fx = Fixture::new();
    let (bytes, descriptors) = convert_gpt(&fx, None, "gpt.ffu");

    // Primary GPT, EFIESP, Data, six MainOS blocks, backup GPT.
    assert_eq!(descriptors.len(), 10);
    assert_eq!(descriptors[0], vec![(0, 0)]);
    assert_eq!(descriptors[1], vec![(0, 2), (0, 3)]);
    assert_eq!(descriptors[2], vec![(0, 4), (0, 5), (0, 6), (0, 7)]);
    let main: Vec<u32> = descriptors[3..9].iter().map(|d| d[0].1).collect();
    assert_eq!(main, vec![8, 9, 10, 11, 12, 13]);
    // DiskEnd (2), last block of the disk.
    assert_eq!(descriptors[9], vec![(2, 0)]);

    // V2 header: major version 2, one platform id, store fields after the tables.
    assert_eq!(u16::from_le_bytes([bytes[4], bytes[5]]), 2);
    assert_eq!(u32_at(&bytes, 12), 1);
    let block_size_offset = 16 + PLATFORM_ID_FIELD_LEN;
    assert_eq!(u32_at(&bytes, block_size_offset), GPT_BLOCK as u32);
    assert_eq!(u32_at(&bytes, block_size_offset + 4), 10);
    let compression_offset = block_size_offset + 12 + 32;
    assert_eq!(u32_at(&bytes, compression_offset), 0);
    let payload_size = u64::from_le_bytes(
        bytes[compression_offset + 8..compression_offset + 16]
            .try_into()
            .unwrap(),
    );
    assert_eq!(payload_size, 10 * GPT_BLOCK as u64);
}

#[test]
fn excluded_partition_blocks_are_not_described() {
    let fx = Fixture::new();
    let (_, descriptors) = convert_gpt(&fx, Some("# skip user data\nData\n"), "gpt.ffu");

    assert_eq!(descriptors.len(), 9);
    let described: Vec<(u32, u32)> = descriptors.iter().flatten().copied().collect();
    for index in 4..8 {
        assert!(!described.contains(&(0, index)), "block {index} of Data is described");
    }
    assert!(described.contains(&(2, 0)));
}
