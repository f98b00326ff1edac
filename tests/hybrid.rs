// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Hybrid scenarios: parse an existing image, mutate it, and re-master.
//!
//! These exercise the full parse -> mutate -> plan -> write cycle rather
//! than mastering from scratch, which is where cross-links between the
//! planes are easiest to break.

use std::io::Cursor;

use iso9660::{
    AddOptions, Clock, EltoritoOptions, Error, FixedClock, Image, IsoOptions, IsoTime, PathKind,
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

fn master(image: &mut Image) -> Vec<u8> {
    let mut out = Vec::new();
    image.write_fp(&mut out).unwrap();
    out
}

fn reopen(bytes: Vec<u8>) -> Image {
    Image::open(Box::new(Cursor::new(bytes))).unwrap()
}

#[test]
fn add_file_to_parsed_image() {
    let mut image = Image::new(IsoOptions::default().clock(clock())).unwrap();
    image
        .add_data(b"first\n".to_vec(), "/FIRST.;1", AddOptions::default())
        .unwrap();
    let mut parsed = reopen(master(&mut image));

    parsed
        .add_data(b"second\n".to_vec(), "/SECOND.;1", AddOptions::default())
        .unwrap();
    let again = reopen(master(&mut parsed));
    assert_eq!(
        again.get_file_from_iso(PathKind::Iso("/FIRST.;1")).unwrap(),
        b"first\n"
    );
    assert_eq!(
        again.get_file_from_iso(PathKind::Iso("/SECOND.;1")).unwrap(),
        b"second\n"
    );
    // One extra payload extent beyond the original 25.
    assert_eq!(again.space_size(), 26);
}

#[test]
fn remove_file_from_parsed_image_frees_its_extent() {
    let mut image = Image::new(IsoOptions::default().clock(clock())).unwrap();
    image
        .add_data(b"keep".to_vec(), "/KEEP.;1", AddOptions::default())
        .unwrap();
    image
        .add_data(b"drop".to_vec(), "/DROP.;1", AddOptions::default())
        .unwrap();
    let mut parsed = reopen(master(&mut image));
    assert_eq!(parsed.space_size(), 26);

    parsed.rm_file(PathKind::Iso("/DROP.;1")).unwrap();
    let again = reopen(master(&mut parsed));
    assert_eq!(again.space_size(), 25);
    assert!(matches!(
        again.get_record(PathKind::Iso("/DROP.;1")),
        Err(Error::NotFound(_))
    ));
    assert_eq!(
        again.get_file_from_iso(PathKind::Iso("/KEEP.;1")).unwrap(),
        b"keep"
    );
}

#[test]
fn add_directory_then_remove_it_again() {
    let mut image = Image::new(IsoOptions::default().clock(clock())).unwrap();
    image.add_directory("/DIR1", AddOptions::default()).unwrap();
    let mut parsed = reopen(master(&mut image));

    // Removing a non-empty directory fails and leaves the tree intact.
    parsed
        .add_data(b"x".to_vec(), "/DIR1/FILE.;1", AddOptions::default())
        .unwrap();
    assert!(matches!(
        parsed.rm_directory("/DIR1", AddOptions::default()),
        Err(Error::DirectoryNotEmpty(_))
    ));
    parsed.rm_file(PathKind::Iso("/DIR1/FILE.;1")).unwrap();
    parsed.rm_directory("/DIR1", AddOptions::default()).unwrap();

    let again = reopen(master(&mut parsed));
    assert!(again.get_record(PathKind::Iso("/DIR1")).is_err());
}

#[test]
fn eltorito_added_after_parse() {
    let mut image = Image::new(IsoOptions::default().clock(clock())).unwrap();
    image
        .add_data(b"boot\n".to_vec(), "/BOOT.;1", AddOptions::default())
        .unwrap();
    let mut parsed = reopen(master(&mut image));

    parsed
        .add_eltorito("/BOOT.;1", Some("/BOOT.CAT;1"), EltoritoOptions::default())
        .unwrap();
    let bytes = master(&mut parsed);

    // The boot record shifted every later extent by one; the catalog and
    // boot file still line up.
    let boot_record = &bytes[17 * SECTOR_SIZE..18 * SECTOR_SIZE];
    assert_eq!(&boot_record[7..30], b"EL TORITO SPECIFICATION");
    let again = reopen(bytes);
    assert_eq!(
        again.get_file_from_iso(PathKind::Iso("/BOOT.;1")).unwrap(),
        b"boot\n"
    );
    assert_eq!(
        again
            .get_file_from_iso(PathKind::Iso("/BOOT.CAT;1"))
            .unwrap()
            .len(),
        SECTOR_SIZE
    );
}

#[test]
fn rm_eltorito_keeps_the_boot_file() {
    let mut image = Image::new(IsoOptions::default().clock(clock())).unwrap();
    image
        .add_data(b"boot\n".to_vec(), "/BOOT.;1", AddOptions::default())
        .unwrap();
    image
        .add_eltorito("/BOOT.;1", Some("/BOOT.CAT;1"), EltoritoOptions::default())
        .unwrap();
    let mut parsed = reopen(master(&mut image));

    parsed.rm_eltorito().unwrap();
    let again = reopen(master(&mut parsed));
    assert_eq!(
        again.get_file_from_iso(PathKind::Iso("/BOOT.;1")).unwrap(),
        b"boot\n"
    );
    assert!(again.get_record(PathKind::Iso("/BOOT.CAT;1")).is_err());
}

#[test]
fn multi_boot_sections_survive_roundtrip() {
    let mut image = Image::new(IsoOptions::default().clock(clock())).unwrap();
    image
        .add_data(b"bios boot\n".to_vec(), "/BOOT.;1", AddOptions::default())
        .unwrap();
    image
        .add_data(vec![0xE9; 4096], "/EFIBOOT.;1", AddOptions::default())
        .unwrap();
    image
        .add_eltorito("/BOOT.;1", Some("/BOOT.CAT;1"), EltoritoOptions::default())
        .unwrap();
    image
        .add_eltorito(
            "/EFIBOOT.;1",
            None,
            EltoritoOptions {
                efi: true,
                ..EltoritoOptions::default()
            },
        )
        .unwrap();
    let bytes = master(&mut image);
    let again = reopen(bytes);

    // Both payloads are reachable after the roundtrip.
    assert_eq!(
        again.get_file_from_iso(PathKind::Iso("/BOOT.;1")).unwrap(),
        b"bios boot\n"
    );
    assert_eq!(
        again
            .get_file_from_iso(PathKind::Iso("/EFIBOOT.;1"))
            .unwrap()
            .len(),
        4096
    );
}

#[test]
fn set_hidden_roundtrips() {
    let mut image = Image::new(IsoOptions::default().clock(clock())).unwrap();
    image
        .add_data(b"shy".to_vec(), "/HIDDEN.;1", AddOptions::default())
        .unwrap();
    image.set_hidden(PathKind::Iso("/HIDDEN.;1")).unwrap();
    let mut parsed = reopen(master(&mut image));
    assert!(
        parsed
            .get_record(PathKind::Iso("/HIDDEN.;1"))
            .unwrap()
            .hidden
    );

    parsed.clear_hidden(PathKind::Iso("/HIDDEN.;1")).unwrap();
    let again = reopen(master(&mut parsed));
    assert!(
        !again
            .get_record(PathKind::Iso("/HIDDEN.;1"))
            .unwrap()
            .hidden
    );
}

#[test]
fn duplicate_pvd_occupies_extent_17() {
    let mut image = Image::new(IsoOptions::default().clock(clock())).unwrap();
    image
        .add_data(b"foo\n".to_vec(), "/FOO.;1", AddOptions::default())
        .unwrap();
    image.duplicate_pvd().unwrap();
    let bytes = master(&mut image);

    // Extents 16 and 17 hold byte-identical PVDs; the terminator moved to
    // 18.
    assert_eq!(
        &bytes[16 * SECTOR_SIZE..17 * SECTOR_SIZE],
        &bytes[17 * SECTOR_SIZE..18 * SECTOR_SIZE]
    );
    assert_eq!(bytes[18 * SECTOR_SIZE], 255);

    let again = reopen(bytes);
    assert_eq!(
        again.get_file_from_iso(PathKind::Iso("/FOO.;1")).unwrap(),
        b"foo\n"
    );
}

#[test]
fn modify_file_in_place_rewrites_without_remaster() {
    let mut image = Image::new(IsoOptions::default().clock(clock())).unwrap();
    image
        .add_data(b"original".to_vec(), "/DATA.;1", AddOptions::default())
        .unwrap();
    let bytes = master(&mut image);

    let mut parsed = Image::open_fp(Box::new(Cursor::new(bytes))).unwrap();
    parsed
        .modify_file_in_place(b"updated!", PathKind::Iso("/DATA.;1"))
        .unwrap();
    // Growing past the allocated extent is refused.
    assert!(matches!(
        parsed.modify_file_in_place(&[0u8; 4096], PathKind::Iso("/DATA.;1")),
        Err(Error::InvalidInput(_))
    ));
    assert_eq!(
        parsed.get_file_from_iso(PathKind::Iso("/DATA.;1")).unwrap(),
        b"updated!"
    );
}

#[test]
fn modify_file_in_place_requires_write_access() {
    let mut image = Image::new(IsoOptions::default().clock(clock())).unwrap();
    image
        .add_data(b"original".to_vec(), "/DATA.;1", AddOptions::default())
        .unwrap();
    let bytes = master(&mut image);

    let mut parsed = reopen(bytes);
    assert!(matches!(
        parsed.modify_file_in_place(b"updated!", PathKind::Iso("/DATA.;1")),
        Err(Error::InvalidInput(_))
    ));
}

#[test]
fn deep_directory_relocation_survives_roundtrip() {
    let mut image = Image::new(
        IsoOptions::default()
            .clock(clock())
            .rock_ridge("1.09")
            .unwrap(),
    )
    .unwrap();
    let mut path = String::new();
    for depth in 1..=8 {
        path.push_str(&format!("/D{depth}"));
        let opts = AddOptions::default().rr_name(&format!("d{depth}"));
        image.add_directory(&path, opts).unwrap();
    }
    image
        .add_data(
            b"bottom".to_vec(),
            &format!("{path}/FILE.;1"),
            AddOptions::default().rr_name("file"),
        )
        .unwrap();
    let again = reopen(master(&mut image));

    // The physical location is under RR_MOVED, the logical path still
    // resolves through the CL placeholder.
    assert!(again.get_record(PathKind::Iso("/RR_MOVED/D8")).unwrap().is_dir);
    assert_eq!(
        again
            .get_file_from_iso(PathKind::Iso(&format!("{path}/FILE.;1")))
            .unwrap(),
        b"bottom"
    );
    assert_eq!(
        again
            .get_file_from_iso(PathKind::RockRidge(
                "/d1/d2/d3/d4/d5/d6/d7/d8/file"
            ))
            .unwrap(),
        b"bottom"
    );
}

#[test]
fn xa_images_roundtrip() {
    let mut image = Image::new(IsoOptions::default().clock(clock()).xa()).unwrap();
    image
        .add_data(b"xa data".to_vec(), "/XAFILE.;1", AddOptions::default())
        .unwrap();
    let bytes = master(&mut image);
    // The PVD application-use area carries the XA signature.
    let pvd = &bytes[16 * SECTOR_SIZE..17 * SECTOR_SIZE];
    assert_eq!(&pvd[883 + 141..883 + 149], b"CD-XA001");

    let again = reopen(bytes);
    assert_eq!(
        again.get_file_from_iso(PathKind::Iso("/XAFILE.;1")).unwrap(),
        b"xa data"
    );
}

#[test]
fn isohybrid_mbr_and_padding() {
    let mut image = Image::new(IsoOptions::default().clock(clock())).unwrap();
    let mut boot = vec![0u8; 2048];
    boot[0x40..0x44].copy_from_slice(&[0xFB, 0xC0, 0x78, 0x70]);
    image
        .add_data(boot, "/ISOLINUX.BIN;1", AddOptions::default())
        .unwrap();
    image
        .add_eltorito(
            "/ISOLINUX.BIN;1",
            Some("/BOOT.CAT;1"),
            EltoritoOptions {
                sector_count: Some(4),
                ..EltoritoOptions::default()
            },
        )
        .unwrap();
    image.add_isohybrid(false, false).unwrap();
    let bytes = master(&mut image);

    // Padded to a whole MiB, with an MBR signature up front.
    assert_eq!(bytes.len() % (1024 * 1024), 0);
    assert_eq!(bytes[510], 0x55);
    assert_eq!(bytes[511], 0xAA);
    // Partition type 0x17 in slot 1.
    assert_eq!(bytes[446 + 4], 0x17);

    let again = reopen(bytes);
    assert!(again
        .get_file_from_iso(PathKind::Iso("/ISOLINUX.BIN;1"))
        .is_ok());
}

#[test]
fn boot_info_table_patch_is_visible() {
    let mut image = Image::new(IsoOptions::default().clock(clock())).unwrap();
    let boot = vec![0xA5u8; 2048];
    image
        .add_data(boot, "/BOOT.;1", AddOptions::default())
        .unwrap();
    image
        .add_eltorito(
            "/BOOT.;1",
            Some("/BOOT.CAT;1"),
            EltoritoOptions {
                boot_info_table: true,
                ..EltoritoOptions::default()
            },
        )
        .unwrap();
    let bytes = master(&mut image);

    let again = reopen(bytes);
    let patched = again.get_file_from_iso(PathKind::Iso("/BOOT.;1")).unwrap();
    // Offsets 8..24 carry the table: PVD extent 16, boot file extent 26,
    // length 2048, then the checksum; 24..64 are zeroed.
    assert_eq!(&patched[8..12], &16u32.to_le_bytes());
    assert_eq!(&patched[12..16], &26u32.to_le_bytes());
    assert_eq!(&patched[16..20], &2048u32.to_le_bytes());
    assert!(patched[24..64].iter().all(|&b| b == 0));
    // Bytes outside the table are untouched.
    assert_eq!(patched[0], 0xA5);
    assert_eq!(patched[64], 0xA5);
}

#[test]
fn udf_symlink_roundtrip() {
    let mut image = Image::new(
        IsoOptions::default()
            .clock(clock())
            .rock_ridge("1.09")
            .unwrap()
            .udf(),
    )
    .unwrap();
    image
        .add_data(
            b"target data".to_vec(),
            "/FOO.;1",
            AddOptions::default().rr_name("foo").udf("/foo"),
        )
        .unwrap();
    image
        .add_symlink(
            "/SYM.;1",
            "sym",
            "foo",
            AddOptions::default().udf("/sym"),
        )
        .unwrap();
    let again = reopen(master(&mut image));

    let record = again.get_record(PathKind::Udf("/sym")).unwrap();
    assert_eq!(record.symlink_target.as_deref(), Some("foo"));
    assert_eq!(
        again.get_record(PathKind::Iso("/SYM.;1")).unwrap().symlink_target.as_deref(),
        Some("foo")
    );
}

#[test]
fn joliet_only_directory_add_and_remove() {
    let mut image = Image::new(IsoOptions::default().clock(clock()).joliet(3)).unwrap();
    image.add_joliet_directory("/joliet only").unwrap();
    let mut parsed = reopen(master(&mut image));
    assert!(
        parsed
            .get_record(PathKind::Joliet("/joliet only"))
            .unwrap()
            .is_dir
    );
    // The ISO tree never saw it.
    assert!(parsed.get_record(PathKind::Iso("/joliet only")).is_err());

    parsed.rm_joliet_directory("/joliet only").unwrap();
    let again = reopen(master(&mut parsed));
    assert!(again.get_record(PathKind::Joliet("/joliet only")).is_err());
}

#[test]
fn enhanced_descriptor_roundtrips() {
    let mut options = IsoOptions::default().clock(clock());
    options.enhanced = true;
    options.interchange_level = 4;
    let mut image = Image::new(options).unwrap();
    image
        .add_data(b"level 4".to_vec(), "/lowercase name", AddOptions::default())
        .unwrap();
    let bytes = master(&mut image);
    // The enhanced descriptor is a type-2 descriptor with version 2.
    let evd = &bytes[17 * SECTOR_SIZE..18 * SECTOR_SIZE];
    assert_eq!(evd[0], 2);
    assert_eq!(evd[6], 2);

    let again = reopen(bytes);
    assert_eq!(
        again
            .get_file_from_iso(PathKind::Iso("/lowercase name"))
            .unwrap(),
        b"level 4"
    );
}

#[test]
fn hard_links_across_planes_share_payload() {
    let mut image = Image::new(IsoOptions::default().clock(clock()).joliet(3).udf()).unwrap();
    image
        .add_data(b"shared".to_vec(), "/FOO.;1", AddOptions::default())
        .unwrap();
    image
        .add_hard_link(
            iso9660::LinkTarget::Iso("/FOO.;1"),
            iso9660::LinkTarget::Joliet("/foo"),
            None,
        )
        .unwrap();
    image
        .add_hard_link(
            iso9660::LinkTarget::Iso("/FOO.;1"),
            iso9660::LinkTarget::Udf("/foo"),
            None,
        )
        .unwrap();
    let again = reopen(master(&mut image));
    let iso = again.get_record(PathKind::Iso("/FOO.;1")).unwrap();
    let joliet = again.get_record(PathKind::Joliet("/foo")).unwrap();
    let udf = again.get_record(PathKind::Udf("/foo")).unwrap();
    assert_eq!(iso.extent, joliet.extent);
    assert_eq!(iso.extent, udf.extent);
    assert_eq!(
        again.get_file_from_iso(PathKind::Udf("/foo")).unwrap(),
        b"shared"
    );
}

#[test]
fn boot_catalog_hard_link_exposes_catalog_bytes() {
    let mut image = Image::new(IsoOptions::default().clock(clock())).unwrap();
    image
        .add_data(b"boot\n".to_vec(), "/BOOT.;1", AddOptions::default())
        .unwrap();
    image
        .add_eltorito("/BOOT.;1", Some("/BOOT.CAT;1"), EltoritoOptions::default())
        .unwrap();
    image
        .add_hard_link(
            iso9660::LinkTarget::BootCatalog,
            iso9660::LinkTarget::Iso("/CATALINK.;1"),
            None,
        )
        .unwrap();
    let again = reopen(master(&mut image));
    let linked = again
        .get_file_from_iso(PathKind::Iso("/CATALINK.;1"))
        .unwrap();
    // The linked file is the catalog itself: validation entry up front.
    assert_eq!(linked[0], 0x01);
    assert_eq!(linked[30], 0x55);
    assert_eq!(linked[31], 0xAA);
}
