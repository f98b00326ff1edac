// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Malformed-image quirks that must be tolerated.
//!
//! Real-world ISOs violate the standards in a handful of known ways; each
//! of the tolerances gets a test here: master a clean image, corrupt it
//! the way the wild images do, and check that `open` still accepts it.

use std::io::Cursor;

use iso9660::{AddOptions, Clock, FixedClock, Image, IsoOptions, IsoTime, PathKind, SECTOR_SIZE};

fn clock() -> Box<dyn Clock> {
    Box::new(FixedClock(IsoTime {
        year: 2025,
        month: 6,
        day: 15,
        hour: 12,
        minute: 0,
        second: 0,
        centiseconds: 0,
        gmt_offset: 0,
    }))
}

fn simple_image() -> Vec<u8> {
    let mut image = Image::new(IsoOptions::default().clock(clock())).unwrap();
    image
        .add_data(b"foo\n".to_vec(), "/FOO.;1", AddOptions::default())
        .unwrap();
    let mut bytes = Vec::new();
    image.write_fp(&mut bytes).unwrap();
    bytes
}

fn udf_image() -> Vec<u8> {
    let mut image = Image::new(IsoOptions::default().clock(clock()).udf()).unwrap();
    image
        .add_data(
            b"foo\n".to_vec(),
            "/FOO.;1",
            AddOptions::default().udf("/foo"),
        )
        .unwrap();
    let mut bytes = Vec::new();
    image.write_fp(&mut bytes).unwrap();
    bytes
}

fn open(bytes: Vec<u8>) -> Image {
    Image::open(Box::new(Cursor::new(bytes))).unwrap()
}

/// Recomputes the UDF tag header checksum (sum of bytes 0..4 and 5..16
/// modulo 256) after a test mutated the tag.
fn fix_udf_tag_checksum(sector: &mut [u8]) {
    let mut sum = 0u8;
    for (index, &byte) in sector.iter().take(16).enumerate() {
        if index != 4 {
            sum = sum.wrapping_add(byte);
        }
    }
    sector[4] = sum;
}

#[test]
fn big_endian_path_table_stored_little_endian() {
    // A subdirectory makes the parent-number fields meaningful, so the
    // mis-endianed Type M copy genuinely fails strict parsing.
    let mut image = Image::new(IsoOptions::default().clock(clock())).unwrap();
    image.add_directory("/DIR1", AddOptions::default()).unwrap();
    image
        .add_data(b"foo\n".to_vec(), "/DIR1/FOO.;1", AddOptions::default())
        .unwrap();
    let mut bytes = Vec::new();
    image.write_fp(&mut bytes).unwrap();

    // Overwrite the Type M table (extent 21) with the Type L bytes
    // (extent 19), as some mastering tools do.
    let le: Vec<u8> = bytes[19 * SECTOR_SIZE..20 * SECTOR_SIZE].to_vec();
    bytes[21 * SECTOR_SIZE..22 * SECTOR_SIZE].copy_from_slice(&le);

    let image = open(bytes);
    assert_eq!(
        image
            .get_file_from_iso(PathKind::Iso("/DIR1/FOO.;1"))
            .unwrap(),
        b"foo\n"
    );
}

#[test]
fn duplicate_dot_entry_is_dropped() {
    let mut bytes = simple_image();
    // The root directory starts with the dot record (34 bytes) followed
    // by dotdot. Overwrite dotdot with a copy of dot, producing the
    // duplicate-'.' layout seen in the wild.
    let root = 23 * SECTOR_SIZE;
    let dot: Vec<u8> = bytes[root..root + 34].to_vec();
    bytes[root + 34..root + 68].copy_from_slice(&dot);

    let image = open(bytes);
    assert_eq!(
        image.get_file_from_iso(PathKind::Iso("/FOO.;1")).unwrap(),
        b"foo\n"
    );
}

#[test]
fn descriptor_version_other_than_one() {
    let mut bytes = simple_image();
    bytes[16 * SECTOR_SIZE + 6] = 2;
    let image = open(bytes);
    assert_eq!(image.space_size(), 25);
}

#[test]
fn file_structure_version_other_than_one() {
    let mut bytes = simple_image();
    bytes[16 * SECTOR_SIZE + 881] = 2;
    let image = open(bytes);
    assert_eq!(
        image.get_file_from_iso(PathKind::Iso("/FOO.;1")).unwrap(),
        b"foo\n"
    );
}

#[test]
fn eltorito_initial_entry_with_dirty_tail() {
    let mut image = Image::new(IsoOptions::default().clock(clock())).unwrap();
    image
        .add_data(b"boot\n".to_vec(), "/BOOT.;1", AddOptions::default())
        .unwrap();
    image
        .add_eltorito(
            "/BOOT.;1",
            Some("/BOOT.CAT;1"),
            iso9660::EltoritoOptions::default(),
        )
        .unwrap();
    let mut bytes = Vec::new();
    image.write_fp(&mut bytes).unwrap();

    // Scribble on the initial entry's unused trailing bytes (catalog at
    // extent 25, initial entry at offset 32, tail at 44..64). These
    // bytes are outside the validation entry, so no checksum needs
    // fixing.
    let catalog = 25 * SECTOR_SIZE;
    bytes[catalog + 44..catalog + 64].fill(0x5A);

    let parsed = open(bytes);
    assert_eq!(
        parsed.get_file_from_iso(PathKind::Iso("/BOOT.;1")).unwrap(),
        b"boot\n"
    );
}

#[test]
fn udf_anchor_with_wrong_tag_location() {
    let mut bytes = udf_image();
    // Record a bogus location in the anchor tag at extent 256 and repair
    // the header checksum so only the location is wrong.
    let anchor = 256 * SECTOR_SIZE;
    bytes[anchor + 12..anchor + 16].copy_from_slice(&512u32.to_le_bytes());
    fix_udf_tag_checksum(&mut bytes[anchor..anchor + SECTOR_SIZE]);

    let mut parsed = open(bytes);
    assert_eq!(
        parsed.get_file_from_iso(PathKind::Udf("/foo")).unwrap(),
        b"foo\n"
    );

    // Re-mastering silently fixes the recorded location.
    let mut rewritten = Vec::new();
    parsed.write_fp(&mut rewritten).unwrap();
    let anchor = &rewritten[256 * SECTOR_SIZE..256 * SECTOR_SIZE + 16];
    assert_eq!(&anchor[12..16], &256u32.to_le_bytes());
}

#[test]
fn udf_file_set_terminator_with_unexpected_tag() {
    let mut bytes = udf_image();
    // The file set terminator lives at extent 258; give it tag
    // identifier 9 instead of 8 and repair the checksum.
    let term = 258 * SECTOR_SIZE;
    bytes[term..term + 2].copy_from_slice(&9u16.to_le_bytes());
    fix_udf_tag_checksum(&mut bytes[term..term + SECTOR_SIZE]);

    let parsed = open(bytes);
    assert_eq!(
        parsed.get_file_from_iso(PathKind::Udf("/foo")).unwrap(),
        b"foo\n"
    );
}

#[test]
fn zero_byte_udf_file_entry_reads_fail_cleanly() {
    let mut bytes = udf_image();
    // Zero the file's File Entry at extent 261; the node must survive
    // parse but reads through the UDF plane fail with an input error.
    bytes[261 * SECTOR_SIZE..262 * SECTOR_SIZE].fill(0);

    let parsed = open(bytes);
    assert!(matches!(
        parsed.get_file_from_iso(PathKind::Udf("/foo")),
        Err(iso9660::Error::InvalidInput(_))
    ));
    // The ISO plane still reads the payload.
    assert_eq!(
        parsed.get_file_from_iso(PathKind::Iso("/FOO.;1")).unwrap(),
        b"foo\n"
    );
}

#[test]
fn corrupt_both_endian_field_is_rejected() {
    let mut bytes = simple_image();
    // Break the big-endian half of the PVD space_size; this is not one of
    // the tolerated quirks and must fail.
    bytes[16 * SECTOR_SIZE + 84] ^= 0xFF;
    let err = Image::open(Box::new(Cursor::new(bytes))).unwrap_err();
    assert!(matches!(err, iso9660::Error::EndianMismatch { .. }));
}

#[test]
fn corrupt_validation_checksum_is_rejected() {
    let mut image = Image::new(IsoOptions::default().clock(clock())).unwrap();
    image
        .add_data(b"boot\n".to_vec(), "/BOOT.;1", AddOptions::default())
        .unwrap();
    image
        .add_eltorito(
            "/BOOT.;1",
            Some("/BOOT.CAT;1"),
            iso9660::EltoritoOptions::default(),
        )
        .unwrap();
    let mut bytes = Vec::new();
    image.write_fp(&mut bytes).unwrap();

    bytes[25 * SECTOR_SIZE + 28] ^= 0xFF;
    let err = Image::open(Box::new(Cursor::new(bytes))).unwrap_err();
    assert!(matches!(err, iso9660::Error::BadChecksum { .. }));
}
