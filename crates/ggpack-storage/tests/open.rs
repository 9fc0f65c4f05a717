//! Opening archives: directory walk, index resolution, sidecar reuse and
//! reads

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

mod common;

use common::*;
use ggpack_formats::bundle::BundleBuilder;
use ggpack_formats::index::IndexBuilder;
use ggpack_storage::{ArchiveSession, CatalogEntry, SessionConfig, StorageError};
use pretty_assertions::assert_eq;

#[test]
fn test_catalog_of_standard_archive() {
    let ws = Workspace::new(&standard_archive(false, None));
    let session = ArchiveSession::open(ws.path(), ws.config()).unwrap();
    let catalog = session.catalog();

    assert!(matches!(catalog.get("."), Some(CatalogEntry::Root(_))));
    assert!(matches!(catalog.get("./"), Some(CatalogEntry::Directory(_))));
    assert!(matches!(catalog.get("./Data/"), Some(CatalogEntry::Directory(_))));
    assert!(matches!(catalog.get("./Bundles2/"), Some(CatalogEntry::Directory(_))));
    assert!(matches!(
        catalog.get("./Data/readme.txt"),
        Some(CatalogEntry::File(_))
    ));

    let top = catalog.get("./").unwrap();
    assert_eq!(top.reference_position(), 12);

    let rock = catalog.get("./art/rock.dds").unwrap().bundled().unwrap();
    assert_eq!(rock.bundle, "./Bundles2/Art.bundle.bin");
    assert_eq!((rock.offset, rock.length), (0, 10));
    assert_eq!(rock.hash, ggpack_formats::path_hash("art/rock.dds"));

    assert!(session.report().is_clean());
    assert!(!session.report().from_cache);
    assert!(session.sidecar_path().is_file());
}

#[test]
fn test_reads() {
    let ws = Workspace::new(&standard_archive(false, None));
    let mut session = ArchiveSession::open(ws.path(), ws.config()).unwrap();

    assert_eq!(session.read("./Data/readme.txt").unwrap(), README);
    assert_eq!(session.read("./Data/config.ini").unwrap(), CONFIG);
    assert_eq!(session.read("./art/rock.dds").unwrap(), ROCK);
    assert_eq!(session.read("./art/tree.dds").unwrap(), TREE);
    assert_eq!(session.read("./art/sky.dds").unwrap(), SKY);
    assert_eq!(session.read("./art/sky_alias.dds").unwrap(), SKY);
}

#[test]
fn test_read_limited() {
    let ws = Workspace::new(&standard_archive(false, None));
    let mut session = ArchiveSession::open(ws.path(), ws.config()).unwrap();

    assert_eq!(session.read_limited("./Data/readme.txt", Some(5)).unwrap(), b"hello");
    assert_eq!(session.read_limited("./art/sky.dds", Some(3)).unwrap(), b"SKY");
    assert_eq!(session.read_limited("./art/tree.dds", Some(1000)).unwrap(), TREE);
}

#[test]
fn test_compressed_bundles_need_codec() {
    let ws = Workspace::new(&standard_archive(true, None));
    let mut session = ArchiveSession::open_with_decompressor(
        ws.path(),
        ws.config(),
        Box::new(XorCodec),
    )
    .unwrap();
    assert_eq!(session.read("./art/sky.dds").unwrap(), SKY);

    // the index cannot be decoded, so only top-level files are reachable
    let ws = Workspace::new(&standard_archive(true, None));
    let mut session = ArchiveSession::open(ws.path(), ws.config()).unwrap();
    assert!(session.report().index_error.is_some());
    assert!(session.index().is_none());
    assert_eq!(session.read("./Data/readme.txt").unwrap(), README);
    assert!(matches!(
        session.read("./art/sky.dds"),
        Err(StorageError::NotFound(_))
    ));
}

#[test]
fn test_decoded_size_mismatch() {
    let ws = Workspace::new(&standard_archive(true, None));
    let session =
        ArchiveSession::open_with_decompressor(ws.path(), ws.config(), Box::new(ShortCodec))
            .unwrap();
    let reason = session.report().index_error.clone().unwrap();
    assert!(reason.starts_with("Decompression failed"), "{reason}");

    let art = BundleBuilder::new()
        .with_block_size(ART_BLOCK)
        .build_with(&art_contents(), xor_encode)
        .unwrap();
    let index = BundleBuilder::new()
        .with_block_size(64)
        .build_stored(&index_image())
        .unwrap();
    let ws = Workspace::new(&archive_with_bundles(art, index, None));
    let mut session =
        ArchiveSession::open_with_decompressor(ws.path(), ws.config(), Box::new(ShortCodec))
            .unwrap();
    assert!(session.report().is_clean());
    let err = session.read("./art/sky.dds").unwrap_err();
    assert!(matches!(err, StorageError::DecompressionFailed(_)), "{err}");
}

#[test]
fn test_corrupt_index_keeps_top_level_files() {
    let mut builder = IndexBuilder::new().with_path_block_size(32);
    let art = builder.add_bundle("Art", ART_SIZE);
    builder
        .add_file("art/rock.dds", art, 0, 10)
        .add_file("art/bad.dds", 7, 0, 1);
    let image = builder.build().unwrap();
    let index = BundleBuilder::new().with_block_size(64).build_stored(&image).unwrap();
    let art = BundleBuilder::new()
        .with_block_size(ART_BLOCK)
        .build_stored(&art_contents())
        .unwrap();
    let ws = Workspace::new(&archive_with_bundles(art, index, None));

    let mut session = ArchiveSession::open(ws.path(), ws.config()).unwrap();
    let reason = session.report().index_error.clone().unwrap();
    assert!(reason.starts_with("Index corrupt"), "{reason}");
    assert!(!session.report().is_clean());
    assert!(!session.catalog().contains("./art/rock.dds"));
    assert_eq!(session.read("./Data/readme.txt").unwrap(), README);

    session.write("./Data/config.ini", b"[audio]").unwrap();
    session.close().unwrap();

    let mut cached = ArchiveSession::open(ws.path(), ws.config()).unwrap();
    assert!(cached.report().from_cache);
    assert!(cached.report().index_error.is_some());
    assert_eq!(cached.read("./Data/config.ini").unwrap(), b"[audio]");
}

#[test]
fn test_sidecar_reuse_gives_identical_catalog() {
    let ws = Workspace::new(&standard_archive(false, Some(64)));
    let scanned = ArchiveSession::open(ws.path(), ws.config()).unwrap();
    let cached = ArchiveSession::open(ws.path(), ws.config()).unwrap();

    assert!(cached.report().from_cache);
    assert_eq!(cached.catalog(), scanned.catalog());

    let rescanned =
        ArchiveSession::open(ws.path(), ws.config().with_force_rescan(true)).unwrap();
    assert!(!rescanned.report().from_cache);
    assert_eq!(rescanned.catalog(), scanned.catalog());
}

#[test]
fn test_stale_sidecar_is_ignored() {
    let ws = Workspace::new(&standard_archive(false, None));
    drop(ArchiveSession::open(ws.path(), ws.config()).unwrap());

    let mut bytes = ws.bytes();
    bytes.extend_from_slice(&[0u8; 10]);
    std::fs::write(ws.path(), bytes).unwrap();

    let session = ArchiveSession::open(ws.path(), ws.config()).unwrap();
    assert!(!session.report().from_cache);
}

#[test]
fn test_malformed_sidecar_triggers_rescan() {
    let ws = Workspace::new(&standard_archive(false, None));
    let sidecar = {
        let session = ArchiveSession::open(ws.path(), ws.config()).unwrap();
        session.sidecar_path().to_path_buf()
    };
    let text = std::fs::read_to_string(&sidecar).unwrap();
    let mut lines: Vec<&str> = text.lines().collect();
    lines.push("broken\tline");
    std::fs::write(&sidecar, lines.join("\n")).unwrap();

    let session = ArchiveSession::open(ws.path(), ws.config()).unwrap();
    assert!(!session.report().from_cache);
    assert!(session.catalog().contains("./art/rock.dds"));
}

#[test]
fn test_free_list_head_is_recorded() {
    let ws = Workspace::new(&standard_archive(false, Some(64)));
    let session = ArchiveSession::open(ws.path(), ws.config()).unwrap();
    assert_eq!(session.catalog().free_list_ref(), Some(20));
}

#[test]
fn test_unknown_tag_is_reported() {
    let mut bytes = standard_archive(false, Some(32));
    let free = read_u64(&bytes, 20) as usize;
    bytes[free + 4..free + 8].copy_from_slice(b"JUNK");
    let ws = Workspace::new(&bytes);

    let session = ArchiveSession::open(ws.path(), ws.config()).unwrap();
    let report = session.report();
    assert_eq!(report.unknown_tags, vec![(free as u64, "JUNK".to_string())]);
    assert!(report.dangling.is_empty());
    assert!(report.ensure_no_dangling().is_ok());
    assert!(!report.is_clean());
    assert_eq!(session.catalog().free_list_ref(), None);
}

#[test]
fn test_out_of_bounds_pointer_is_reported() {
    let mut bytes = standard_archive(false, Some(32));
    bytes[20..28].copy_from_slice(&u64::MAX.to_le_bytes());
    let ws = Workspace::new(&bytes);

    let session = ArchiveSession::open(ws.path(), ws.config()).unwrap();
    assert_eq!(session.report().out_of_bounds, vec![(20, u64::MAX)]);
    assert!(session.catalog().contains("./Data/readme.txt"));
}

#[test]
fn test_invalid_archives() {
    let ws = Workspace::new(&[0u8; 50]);
    assert!(matches!(
        ArchiveSession::open(ws.path(), ws.config()),
        Err(StorageError::InvalidFormat(_))
    ));

    let mut bytes = standard_archive(false, None);
    bytes[4..8].copy_from_slice(b"NOPE");
    let ws = Workspace::new(&bytes);
    assert!(matches!(
        ArchiveSession::open(ws.path(), ws.config()),
        Err(StorageError::InvalidFormat(_))
    ));
}

#[test]
fn test_archive_without_index() {
    let bytes = assemble(vec![file("only.txt", vec![7u8; 120])], None);
    let ws = Workspace::new(&bytes);
    let mut session = ArchiveSession::open(ws.path(), ws.config()).unwrap();
    assert!(session.index().is_none());
    assert_eq!(session.read("./only.txt").unwrap(), vec![7u8; 120]);
}

#[test]
fn test_lookups() {
    let ws = Workspace::new(&standard_archive(false, None));
    let mut session = ArchiveSession::open(ws.path(), ws.config()).unwrap();
    assert!(matches!(
        session.read("./missing.txt"),
        Err(StorageError::NotFound(_))
    ));
    assert!(matches!(
        session.read("./Data/"),
        Err(StorageError::InvalidFormat(_))
    ));
}

#[test]
fn test_invalid_config_is_rejected() {
    let ws = Workspace::new(&standard_archive(false, None));
    let config = SessionConfig::new(ws.cache_dir()).with_index_path("Bundles2/_.index.bin");
    assert!(matches!(
        ArchiveSession::open(ws.path(), config),
        Err(StorageError::Config(_))
    ));
}
