//! Boundary scenarios: empty table, single ref, prefix compression,
//! namespace-boundary restarts, object-index fallback under overflow,
//! and footer CRC corruption.

use crate::block_source::MemoryBlockSource;
use crate::framing::ObjectId;
use crate::record::{Ref, RefValue, Storage};
use crate::table::{Footer, TableReader, TableWriter};
use reftable_config::WriterOptions;
use std::sync::Arc;

fn id(byte: u8) -> ObjectId {
    ObjectId::from_slice(&[byte; 20]).unwrap()
}

fn write_table(opts: &WriterOptions, min: u64, max: u64, refs: Vec<Ref>) -> Vec<u8> {
    TableWriter::write(Vec::new(), opts, min, max, refs, Vec::new()).unwrap()
}

#[test]
fn empty_table_has_no_refs_and_valid_crc() {
    let opts = WriterOptions::default();
    let bytes = write_table(&opts, 1, 1, Vec::new());
    assert_eq!(&bytes[0..4], b"REFT");

    let reader = Arc::new(TableReader::open(MemoryBlockSource::new(bytes)).unwrap());
    assert_eq!(reader.max_update_index(), 1);
    let mut cursor = reader.clone().ref_cursor(false).unwrap();
    assert_eq!(cursor.next().unwrap(), None);
}

#[test]
fn single_unpeeled_ref_roundtrips_with_update_index() {
    let opts = WriterOptions::default();
    let refs = vec![Ref {
        name: "refs/heads/main".to_string(),
        storage: Storage::New,
        update_index: 5,
        value: RefValue::Unpeeled(id(0x11)),
    }];
    let bytes = write_table(&opts, 5, 5, refs);
    let reader = Arc::new(TableReader::open(MemoryBlockSource::new(bytes)).unwrap());

    let mut cursor = reader.clone().seek_ref("refs/heads/main", false).unwrap();
    let found = cursor.next().unwrap().expect("ref must be present");
    assert_eq!(found.name, "refs/heads/main");
    assert_eq!(found.update_index, 5);
    assert_eq!(found.storage, Storage::Packed);
    match found.value {
        RefValue::Unpeeled(got) => assert_eq!(got, id(0x11)),
        other => panic!("expected unpeeled ref, got {other:?}"),
    }
}

#[test]
fn prefix_compressed_entries_seek_correctly() {
    let opts = WriterOptions::default();
    let refs = vec![
        Ref { name: "refs/heads/a".into(), storage: Storage::New, update_index: 1, value: RefValue::Unpeeled(id(1)) },
        Ref { name: "refs/heads/b".into(), storage: Storage::New, update_index: 1, value: RefValue::Unpeeled(id(2)) },
        Ref { name: "refs/heads/c".into(), storage: Storage::New, update_index: 1, value: RefValue::Unpeeled(id(3)) },
    ];
    let bytes = write_table(&opts, 1, 1, refs);
    let reader = Arc::new(TableReader::open(MemoryBlockSource::new(bytes)).unwrap());

    let mut cursor = reader.clone().seek_ref("refs/heads/b", false).unwrap();
    let found = cursor.next().unwrap().unwrap();
    assert_eq!(found.name, "refs/heads/b");

    let mut all = reader.ref_cursor(false).unwrap();
    let mut names = Vec::new();
    while let Some(r) = all.next().unwrap() {
        names.push(r.name);
    }
    assert_eq!(names, vec!["refs/heads/a", "refs/heads/b", "refs/heads/c"]);
}

#[test]
fn namespace_boundary_forces_restart() {
    // Regardless of restart_interval, a zero-shared-prefix transition
    // (refs/heads/z -> refs/tags/v1) must be a mandatory restart; verify
    // this indirectly through the block writer restart count, which the
    // block-level test suite already checks directly. Here we confirm
    // the table still seeks correctly across that boundary.
    let opts = WriterOptions::default().restart_interval(1000);
    let refs = vec![
        Ref { name: "refs/heads/z".into(), storage: Storage::New, update_index: 1, value: RefValue::Unpeeled(id(1)) },
        Ref { name: "refs/tags/v1".into(), storage: Storage::New, update_index: 1, value: RefValue::Unpeeled(id(2)) },
    ];
    let bytes = write_table(&opts, 1, 1, refs);
    let reader = Arc::new(TableReader::open(MemoryBlockSource::new(bytes)).unwrap());
    let mut cursor = reader.seek_ref("refs/tags/v1", false).unwrap();
    let found = cursor.next().unwrap().unwrap();
    assert_eq!(found.name, "refs/tags/v1");
}

#[test]
fn object_index_falls_back_to_scan_when_position_list_overflows() {
    // A tiny ref-block size forces roughly one ref per block, so 300
    // refs sharing one object ID produce a ~300-entry block-position
    // list that cannot fit the same tiny block budget used for the
    // object section — this must degrade to `ScanRequired` rather than
    // error out.
    let opts = WriterOptions::default().ref_block_size(64);
    let shared = id(0x42);
    let refs: Vec<Ref> = (0..300)
        .map(|i| Ref {
            name: format!("refs/heads/b{i:04}"),
            storage: Storage::New,
            update_index: 1,
            value: RefValue::Unpeeled(shared),
        })
        .collect();
    let bytes = write_table(&opts, 1, 1, refs);
    let footer = Footer::parse(&bytes[bytes.len() - 68..]).unwrap();
    assert_ne!(footer.object_offset, 0, "object section must be present");

    let reader = TableReader::open(MemoryBlockSource::new(bytes)).unwrap();
    let found = reader.refs_by_object_id(&shared).unwrap();
    assert_eq!(found.len(), 300);
}

#[test]
fn seek_ref_binary_search_spans_multiple_aligned_blocks() {
    // A small ref block size lands five refs across three aligned
    // blocks (one in the first, two in each of the next two) while
    // staying under the four-block threshold that would otherwise grow
    // a ref index (writer.rs's `REF_INDEX_THRESHOLD`) — this exercises
    // the default, non-indexed `binary_search_ref_block` seek path
    // rather than `find_leaf_block`.
    let opts = WriterOptions::default().ref_block_size(80).index_objects(false);
    let refs: Vec<Ref> = (0..5u8)
        .map(|i| Ref {
            name: format!("refs/heads/branch-{i:04}"),
            storage: Storage::New,
            update_index: 1,
            value: RefValue::Unpeeled(id(i)),
        })
        .collect();
    let bytes = write_table(&opts, 1, 1, refs);
    let footer = Footer::parse(&bytes[bytes.len() - 68..]).unwrap();
    assert_eq!(
        footer.ref_index_offset, 0,
        "too few blocks to warrant a ref index; seek must fall back to binary search"
    );

    let reader = Arc::new(TableReader::open(MemoryBlockSource::new(bytes)).unwrap());
    let mut middle = reader.clone().seek_ref("refs/heads/branch-0003", false).unwrap();
    assert_eq!(middle.next().unwrap().unwrap().name, "refs/heads/branch-0003");

    let mut last = reader.seek_ref("refs/heads/branch-0004", false).unwrap();
    assert_eq!(last.next().unwrap().unwrap().name, "refs/heads/branch-0004");
}

#[test]
fn flipping_a_footer_crc_bit_is_detected() {
    let opts = WriterOptions::default();
    let mut bytes = write_table(&opts, 1, 1, Vec::new());
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    let source = MemoryBlockSource::new(bytes);
    let reader = Arc::new(TableReader::open(source).unwrap());
    let err = reader.ref_cursor(false).unwrap_err();
    assert!(matches!(err, crate::error::ReftableError::InvalidCrc));
}
