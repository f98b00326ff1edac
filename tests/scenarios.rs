// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! End-to-end mastering scenarios driven through the public façade,
//! checked against the on-disc byte layout.

use std::io::Cursor;

use iso9660::{
    AddOptions, Clock, EltoritoOptions, FixedClock, Image, IsoOptions, IsoTime, PathKind,
    SECTOR_SIZE,
};

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

fn write_to_bytes(image: &mut Image) -> Vec<u8> {
    let mut out = Vec::new();
    image.write_fp(&mut out).unwrap();
    out
}

fn sector(bytes: &[u8], extent: u32) -> &[u8] {
    let start = extent as usize * SECTOR_SIZE;
    &bytes[start..start + SECTOR_SIZE]
}

#[test]
fn scenario_single_file_layout() {
    let mut image = Image::new(IsoOptions::default().clock(clock())).unwrap();
    image
        .add_data(b"foo\n".to_vec(), "/FOO.;1", AddOptions::default())
        .unwrap();
    let bytes = write_to_bytes(&mut image);

    // Image size: 25 extents of 2048 bytes.
    assert_eq!(bytes.len(), 51200);

    // PVD at extent 16 reports space_size 25.
    let pvd = sector(&bytes, 16);
    assert_eq!(pvd[0], 1);
    assert_eq!(&pvd[1..6], b"CD001");
    assert_eq!(&pvd[80..84], &25u32.to_le_bytes());

    // Path tables at 19 (L) and 21 (M).
    assert_eq!(&pvd[140..144], &19u32.to_le_bytes());
    assert_eq!(&pvd[148..152], &21u32.to_be_bytes());

    // Root directory record (embedded at 156) points at extent 23.
    assert_eq!(&pvd[156 + 2..156 + 6], &23u32.to_le_bytes());

    // The file record in the root directory points at extent 24, and the
    // payload is exactly the four bytes.
    let root = sector(&bytes, 23);
    let foo_record = find_record(root, b"FOO.;1").expect("record for /FOO.;1");
    assert_eq!(&foo_record[2..6], &24u32.to_le_bytes());
    assert_eq!(&foo_record[10..14], &4u32.to_le_bytes());
    assert_eq!(&sector(&bytes, 24)[..4], b"foo\n");
    assert!(sector(&bytes, 24)[4..].iter().all(|&b| b == 0));
}

/// Finds a directory record by identifier within one directory sector.
fn find_record<'a>(dir_data: &'a [u8], ident: &[u8]) -> Option<&'a [u8]> {
    let mut pos = 0;
    while pos < dir_data.len() && dir_data[pos] != 0 {
        let len = dir_data[pos] as usize;
        let record = &dir_data[pos..pos + len];
        let ident_len = record[32] as usize;
        if &record[33..33 + ident_len] == ident {
            return Some(record);
        }
        pos += len;
    }
    None
}

#[test]
fn scenario_rock_ridge_symlink_record_length() {
    let mut image = Image::new(
        IsoOptions::default()
            .clock(clock())
            .rock_ridge("1.09")
            .unwrap(),
    )
    .unwrap();
    image
        .add_data(
            b"foo\n".to_vec(),
            "/FOO.;1",
            AddOptions::default().rr_name("foo"),
        )
        .unwrap();
    image
        .add_symlink("/SYM.;1", "sym", "foo", AddOptions::default())
        .unwrap();
    let bytes = write_to_bytes(&mut image);

    // Find the root directory from the PVD.
    let pvd = sector(&bytes, 16);
    let root_extent = u32::from_le_bytes(pvd[158..162].try_into().unwrap());
    let root = sector(&bytes, root_extent);

    let sym = find_record(root, b"SYM.;1").expect("record for /SYM.;1");
    assert_eq!(sym.len(), 126);
    // The SL field carries the single component "foo".
    let su = &sym[40..];
    let sl_pos = su
        .windows(2)
        .position(|pair| pair == b"SL")
        .expect("SL field present");
    let sl = &su[sl_pos..];
    assert_eq!(sl[2], 11); // 5 header + 1 flags + 2 + 3 component
    assert_eq!(&sl[8..11], b"foo");

    // Reading through the Rock Ridge name traverses the symlink.
    let parsed = Image::open(Box::new(Cursor::new(bytes))).unwrap();
    assert_eq!(
        parsed.get_file_from_iso(PathKind::RockRidge("/sym")).unwrap(),
        b"foo\n"
    );
    assert_eq!(
        parsed
            .get_record(PathKind::Iso("/SYM.;1"))
            .unwrap()
            .symlink_target
            .as_deref(),
        Some("foo")
    );
}

#[test]
fn scenario_joliet_directory_layout() {
    let mut image = Image::new(IsoOptions::default().clock(clock()).joliet(3)).unwrap();
    image
        .add_directory("/DIR1", AddOptions::default().joliet("/dir1"))
        .unwrap();
    let bytes = write_to_bytes(&mut image);

    // SVD at extent 17 with the level-3 escape.
    let svd = sector(&bytes, 17);
    assert_eq!(svd[0], 2);
    assert_eq!(&svd[88..91], b"%/E");

    // The Joliet root lives at extent 30.
    assert_eq!(&svd[156 + 2..156 + 6], &30u32.to_le_bytes());

    // The Joliet path table contains dir1 as 8 bytes of UCS-2 BE with
    // extent 31.
    let joliet_pt_le = u32::from_le_bytes(svd[140..144].try_into().unwrap());
    let pt = sector(&bytes, joliet_pt_le);
    // First record: root (1 byte identifier, 10 bytes).
    assert_eq!(pt[0], 1);
    let dir1 = &pt[10..];
    assert_eq!(dir1[0], 8); // identifier length in bytes
    assert_eq!(&dir1[2..6], &31u32.to_le_bytes());
    assert_eq!(&dir1[8..16], &[0, b'd', 0, b'i', 0, b'r', 0, b'1']);

    let parsed = Image::open(Box::new(Cursor::new(bytes))).unwrap();
    assert!(parsed.get_record(PathKind::Joliet("/dir1")).unwrap().is_dir);
}

#[test]
fn scenario_eltorito_layout() {
    let mut image = Image::new(IsoOptions::default().clock(clock())).unwrap();
    image
        .add_data(b"boot\n".to_vec(), "/BOOT.;1", AddOptions::default())
        .unwrap();
    image
        .add_eltorito("/BOOT.;1", Some("/BOOT.CAT;1"), EltoritoOptions::default())
        .unwrap();
    let bytes = write_to_bytes(&mut image);

    // Boot record at extent 17.
    let boot_record = sector(&bytes, 17);
    assert_eq!(boot_record[0], 0);
    assert_eq!(&boot_record[1..6], b"CD001");
    assert_eq!(&boot_record[7..30], b"EL TORITO SPECIFICATION");
    // It points at the catalog at extent 25.
    assert_eq!(&boot_record[71..75], &25u32.to_le_bytes());

    // The validation entry's 16-bit word sum is zero.
    let catalog = sector(&bytes, 25);
    let sum: u16 = catalog[..32]
        .chunks_exact(2)
        .fold(0u16, |acc, pair| {
            acc.wrapping_add(u16::from_le_bytes([pair[0], pair[1]]))
        });
    assert_eq!(sum, 0);
    assert_eq!(catalog[30], 0x55);
    assert_eq!(catalog[31], 0xAA);

    // The initial entry loads from extent 26.
    assert_eq!(catalog[32], 0x88);
    assert_eq!(&catalog[40..44], &26u32.to_le_bytes());
    assert_eq!(&sector(&bytes, 26)[..5], b"boot\n");
}

#[test]
fn scenario_udf_layout() {
    let mut image = Image::new(IsoOptions::default().clock(clock()).udf()).unwrap();
    image
        .add_data(
            b"foo\n".to_vec(),
            "/FOO.;1",
            AddOptions::default().udf("/foo"),
        )
        .unwrap();
    let bytes = write_to_bytes(&mut image);

    // Anchor at 256 with tag identifier 2.
    let anchor = sector(&bytes, 256);
    assert_eq!(u16::from_le_bytes([anchor[0], anchor[1]]), 2);

    // File set descriptor at 257 (tag 256).
    let fsd = sector(&bytes, 257);
    assert_eq!(u16::from_le_bytes([fsd[0], fsd[1]]), 256);

    // The file identifier descriptor area at 260 names "foo" (8-bit
    // compressed, so the raw bytes appear after the parent FID).
    let fids = sector(&bytes, 260);
    assert_eq!(u16::from_le_bytes([fids[0], fids[1]]), 257);
    assert!(fids.windows(4).any(|window| window == [8, b'f', b'o', b'o']));

    // The file entry at 261 (tag 261).
    let fe = sector(&bytes, 261);
    assert_eq!(u16::from_le_bytes([fe[0], fe[1]]), 261);

    // The LVID at 64 reports one file and one directory.
    let lvid = sector(&bytes, 64);
    assert_eq!(u16::from_le_bytes([lvid[0], lvid[1]]), 9);
    assert_eq!(&lvid[128..132], &1u32.to_le_bytes());
    assert_eq!(&lvid[132..136], &1u32.to_le_bytes());

    // The payload is reachable through both planes of the parsed image.
    let parsed = Image::open(Box::new(Cursor::new(bytes))).unwrap();
    assert_eq!(
        parsed.get_file_from_iso(PathKind::Udf("/foo")).unwrap(),
        b"foo\n"
    );
    assert_eq!(
        parsed.get_file_from_iso(PathKind::Iso("/FOO.;1")).unwrap(),
        b"foo\n"
    );
}

#[test]
fn scenario_hard_link_lifecycle() {
    let mut image = Image::new(IsoOptions::default().clock(clock())).unwrap();
    image
        .add_data(b"foo\n".to_vec(), "/FOO.;1", AddOptions::default())
        .unwrap();
    image
        .add_hard_link(
            iso9660::LinkTarget::Iso("/FOO.;1"),
            iso9660::LinkTarget::Iso("/BAR.;1"),
            None,
        )
        .unwrap();
    image.rm_hard_link(PathKind::Iso("/FOO.;1")).unwrap();
    let bytes = write_to_bytes(&mut image);

    let parsed = Image::open(Box::new(Cursor::new(bytes))).unwrap();
    assert_eq!(
        parsed.get_file_from_iso(PathKind::Iso("/BAR.;1")).unwrap(),
        b"foo\n"
    );
    assert!(matches!(
        parsed.get_record(PathKind::Iso("/FOO.;1")),
        Err(iso9660::Error::NotFound(_))
    ));
    // The payload still occupies the first data extent.
    assert_eq!(parsed.get_record(PathKind::Iso("/BAR.;1")).unwrap().extent, 24);
}

#[test]
fn writes_are_deterministic() {
    let build = || {
        let mut image = Image::new(
            IsoOptions::default()
                .clock(clock())
                .joliet(3)
                .rock_ridge("1.12")
                .unwrap(),
        )
        .unwrap();
        image
            .add_data(
                b"payload one".to_vec(),
                "/A.;1",
                AddOptions::default().rr_name("a").joliet("/a"),
            )
            .unwrap();
        image
            .add_directory(
                "/DIR1",
                AddOptions::default().rr_name("dir1").joliet("/dir1"),
            )
            .unwrap();
        image
            .add_data(
                b"payload two".to_vec(),
                "/DIR1/B.;1",
                AddOptions::default().rr_name("b").joliet("/dir1/b"),
            )
            .unwrap();
        write_to_bytes(&mut image)
    };
    assert_eq!(build(), build());
}

#[test]
fn cross_plane_payloads_are_identical() {
    let mut image = Image::new(IsoOptions::default().clock(clock()).joliet(3).udf()).unwrap();
    image
        .add_data(
            b"shared payload".to_vec(),
            "/FILE.;1",
            AddOptions::default().joliet("/file").udf("/file"),
        )
        .unwrap();
    let bytes = write_to_bytes(&mut image);
    let parsed = Image::open(Box::new(Cursor::new(bytes))).unwrap();
    let via_iso = parsed.get_file_from_iso(PathKind::Iso("/FILE.;1")).unwrap();
    let via_joliet = parsed.get_file_from_iso(PathKind::Joliet("/file")).unwrap();
    let via_udf = parsed.get_file_from_iso(PathKind::Udf("/file")).unwrap();
    assert_eq!(via_iso, via_joliet);
    assert_eq!(via_iso, via_udf);

    let mut reader = parsed.open_file_from_iso(PathKind::Iso("/FILE.;1")).unwrap();
    assert_eq!(reader.length(), 14);
    let mut buf = Vec::new();
    std::io::Read::read_to_end(&mut reader, &mut buf).unwrap();
    assert_eq!(buf, b"shared payload");
}

#[test]
fn boundary_file_sizes() {
    let mut image = Image::new(IsoOptions::default().clock(clock())).unwrap();
    image
        .add_data(vec![0x11; 2048], "/EXACT.;1", AddOptions::default())
        .unwrap();
    image
        .add_data(vec![0x22; 2049], "/OVER.;1", AddOptions::default())
        .unwrap();
    let bytes = write_to_bytes(&mut image);

    let pvd = sector(&bytes, 16);
    let root_extent = u32::from_le_bytes(pvd[158..162].try_into().unwrap());
    let root = sector(&bytes, root_extent);

    let exact = find_record(root, b"EXACT.;1").unwrap();
    let exact_extent = u32::from_le_bytes(exact[2..6].try_into().unwrap());
    let over = find_record(root, b"OVER.;1").unwrap();
    let over_extent = u32::from_le_bytes(over[2..6].try_into().unwrap());

    // 2048 bytes occupy exactly one extent; 2049 bytes occupy two, the
    // second holding only the final byte.
    assert_eq!(over_extent, exact_extent + 1);
    assert_eq!(u32::from_le_bytes(over[10..14].try_into().unwrap()), 2049);
    let tail = sector(&bytes, over_extent + 1);
    assert_eq!(tail[0], 0x22);
    assert!(tail[1..].iter().all(|&b| b == 0));
}

#[test]
fn model_roundtrip_through_write_and_open() {
    let mut image = Image::new(
        IsoOptions::default()
            .clock(clock())
            .joliet(3)
            .rock_ridge("1.09")
            .unwrap(),
    )
    .unwrap();
    image
        .add_directory(
            "/DIR1",
            AddOptions::default().rr_name("dir1").joliet("/dir1"),
        )
        .unwrap();
    image
        .add_data(
            b"deep file".to_vec(),
            "/DIR1/DEEP.;1",
            AddOptions::default().rr_name("deep").joliet("/dir1/deep"),
        )
        .unwrap();
    let bytes = write_to_bytes(&mut image);
    let parsed = Image::open(Box::new(Cursor::new(bytes))).unwrap();

    // Every observable from the original model survives.
    assert!(parsed.has_joliet());
    assert!(parsed.has_rock_ridge());
    let walked = parsed.walk(PathKind::Iso("/")).unwrap();
    assert_eq!(walked[0].1, vec!["DIR1"]);
    assert_eq!(
        parsed
            .get_file_from_iso(PathKind::RockRidge("/dir1/deep"))
            .unwrap(),
        b"deep file"
    );
    assert_eq!(
        parsed
            .get_record(PathKind::Iso("/DIR1/DEEP.;1"))
            .unwrap()
            .rr_name
            .as_deref(),
        Some("deep")
    );
}
