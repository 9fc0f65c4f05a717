//! Synthetic archives for integration tests

#![allow(dead_code, clippy::expect_used, clippy::unwrap_used)]

use std::path::{Path, PathBuf};

use ggpack_formats::bundle::{BlockDecompressor, BundleBuilder, BundleError, BundleResult};
use ggpack_formats::index::IndexBuilder;
use ggpack_formats::record::{
    DirectoryEntry, DirectoryRecord, FileRecord, FreeRecord, RootRecord,
};
use ggpack_storage::SessionConfig;

/// Block size of the data bundle
pub const ART_BLOCK: u32 = 16;

/// Extracted size of the data bundle
pub const ART_SIZE: u32 = 40;

pub const README: &[u8] = b"hello world, this is the readme";
pub const CONFIG: &[u8] = b"[video]\nwidth=800\n";
pub const ROCK: &[u8] = b"ROCKROCK01";
pub const TREE: &[u8] = b"TREE01";
pub const SKY: &[u8] = b"SKYSKYSKY012";

/// Test codec: marker byte 0x8C followed by the data xored with 0x5A
pub struct XorCodec;

impl BlockDecompressor for XorCodec {
    fn decompress(&self, compressed: &[u8], _expected: usize) -> BundleResult<Vec<u8>> {
        match compressed.split_first() {
            Some((0x8C, rest)) => Ok(rest.iter().map(|b| b ^ 0x5A).collect()),
            _ => Err(BundleError::DecompressionFailed("bad marker".to_string())),
        }
    }
}

/// Codec that always drops the last byte of a block
pub struct ShortCodec;

impl BlockDecompressor for ShortCodec {
    fn decompress(&self, compressed: &[u8], expected: usize) -> BundleResult<Vec<u8>> {
        Ok(compressed
            .iter()
            .skip(1)
            .map(|b| b ^ 0x5A)
            .take(expected.saturating_sub(1))
            .collect())
    }
}

pub fn xor_encode(block: &[u8]) -> Vec<u8> {
    std::iter::once(0x8C)
        .chain(block.iter().map(|b| b ^ 0x5A))
        .collect()
}

/// Route session logs to the test harness; filtered by `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Directory tree node
pub enum Node {
    Dir(String, Vec<Node>),
    File(String, Vec<u8>),
}

pub fn dir(name: &str, children: Vec<Node>) -> Node {
    Node::Dir(name.to_string(), children)
}

pub fn file(name: &str, payload: impl AsRef<[u8]>) -> Node {
    Node::File(name.to_string(), payload.as_ref().to_vec())
}

fn dir_len(name: &str, children: usize) -> u64 {
    DirectoryRecord::build(name, [0; 32], &vec![DirectoryEntry { name_hash: 0, offset: 0 }; children])
        .unwrap()
        .len() as u64
}

/// Lay out `node` at `position`, returning its bytes
fn lay_out(node: &Node, position: u64) -> Vec<u8> {
    match node {
        Node::File(name, payload) => FileRecord::build(name, payload).unwrap(),
        Node::Dir(name, children) => {
            let mut next = position + dir_len(name, children.len());
            let mut body = Vec::new();
            let mut entries = Vec::new();
            for (i, child) in children.iter().enumerate() {
                let bytes = lay_out(child, next);
                entries.push(DirectoryEntry {
                    name_hash: i as u32,
                    offset: next,
                });
                next += bytes.len() as u64;
                body.extend(bytes);
            }
            let mut out = DirectoryRecord::build(name, [0xD1; 32], &entries).unwrap();
            out.extend(body);
            out
        }
    }
}

/// Assemble an archive: a root record, the unnamed top directory holding
/// `top`, and optionally a free record of `free` bytes at the end
pub fn assemble(top: Vec<Node>, free: Option<u32>) -> Vec<u8> {
    let children = if free.is_some() { 2 } else { 1 };
    let root_len = RootRecord::build(3, &vec![0; children]).unwrap().len() as u64;

    let tree = lay_out(&Node::Dir(String::new(), top), root_len);
    let free_position = root_len + tree.len() as u64;

    let mut pointers = vec![root_len];
    if free.is_some() {
        pointers.push(free_position);
    }
    let mut out = RootRecord::build(3, &pointers).unwrap();
    out.extend(tree);
    if let Some(length) = free {
        out.extend(FreeRecord::build(length, 0).unwrap());
        out.resize(out.len() + length as usize - 16, 0xEE);
    }
    out
}

/// Extracted contents of the `Art` bundle:
///
/// ```text
/// [0,10) rock  [10,16) tree  [16,24) free  [24,36) sky + sky_alias  [36,40) tail
/// ```
pub fn art_contents() -> Vec<u8> {
    let mut data = vec![0u8; ART_SIZE as usize];
    data[0..10].copy_from_slice(ROCK);
    data[10..16].copy_from_slice(TREE);
    data[24..36].copy_from_slice(SKY);
    data
}

pub fn index_image() -> Vec<u8> {
    let mut builder = IndexBuilder::new().with_path_block_size(32);
    let art = builder.add_bundle("Art", ART_SIZE);
    builder
        .add_file("art/rock.dds", art, 0, 10)
        .add_file("art/tree.dds", art, 10, 6)
        .add_file("art/sky.dds", art, 24, 12)
        .add_file("art/sky_alias.dds", art, 24, 12);
    builder.build().unwrap()
}

/// The standard archive: two top-level files under `Data/` and a
/// `Bundles2/` directory with the index and the `Art` bundle
pub fn standard_archive(compressed: bool, free: Option<u32>) -> Vec<u8> {
    let art = BundleBuilder::new().with_block_size(ART_BLOCK);
    let index = BundleBuilder::new().with_block_size(64);
    let (art, index) = if compressed {
        (
            art.build_with(&art_contents(), xor_encode).unwrap(),
            index.build_with(&index_image(), xor_encode).unwrap(),
        )
    } else {
        (
            art.build_stored(&art_contents()).unwrap(),
            index.build_stored(&index_image()).unwrap(),
        )
    };

    archive_with_bundles(art, index, free)
}

/// The standard layout around prebuilt `Art` and index bundles
pub fn archive_with_bundles(art: Vec<u8>, index: Vec<u8>, free: Option<u32>) -> Vec<u8> {
    assemble(
        vec![
            dir(
                "Data",
                vec![file("readme.txt", README), file("config.ini", CONFIG)],
            ),
            dir(
                "Bundles2",
                vec![file("_.index.bin", index), file("Art.bundle.bin", art)],
            ),
        ],
        free,
    )
}

/// Temporary workspace holding one archive and its cache directory
pub struct Workspace {
    pub dir: tempfile::TempDir,
    pub archive: PathBuf,
}

impl Workspace {
    pub fn new(bytes: &[u8]) -> Self {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("Content.ggpk");
        std::fs::write(&archive, bytes).unwrap();
        Self { dir, archive }
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.dir.path().join("keep")
    }

    /// Configuration with no headroom and a small growth policy
    pub fn config(&self) -> SessionConfig {
        SessionConfig::new(self.cache_dir())
            .with_bundle_headroom(0)
            .with_growth(2, 64)
    }

    pub fn bytes(&self) -> Vec<u8> {
        std::fs::read(&self.archive).unwrap()
    }

    pub fn path(&self) -> &Path {
        &self.archive
    }
}

pub fn read_u64(bytes: &[u8], position: usize) -> u64 {
    u64::from_le_bytes(bytes[position..position + 8].try_into().unwrap())
}
