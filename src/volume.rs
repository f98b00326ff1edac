// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Volume Descriptor structures for ISO 9660 filesystems.
//!
//! Volume descriptors are located starting at sector 16 (after the 32KB
//! system area). Each descriptor is exactly 2048 bytes (one sector).
//!
//! The volume descriptor set must contain:
//! - At least one Primary Volume Descriptor (type 1)
//! - A Volume Descriptor Set Terminator (type 255)
//!
//! Supplementary descriptors (type 2) carry the Joliet tree (identified by
//! UCS-2 escape sequences) or an ISO 9660:1999 enhanced hierarchy
//! (identified by descriptor version 2). For bootable ISOs using El
//! Torito, a Boot Record (type 0) is also present. Duplicate PVDs are
//! permitted and must match the primary except for a caller-owned window
//! of the application-use area.
//!
//! Reference: ECMA-119 Section 8

use crate::directory::RawDirRecord;
use crate::error::{Error, Result};
use crate::types::{
    BothEndian16, BothEndian32, SECTOR_SIZE, VolumeDateTime, trim_str_field, write_str_field,
};

/// Standard identifier for ISO 9660 volume descriptors.
pub const STANDARD_IDENTIFIER: &[u8; 5] = b"CD001";

/// The XA signature recorded in the application-use area of XA images.
pub const XA_SIGNATURE: &[u8; 8] = b"CD-XA001";

/// Offset of the XA signature within the application-use area.
pub const XA_SIGNATURE_OFFSET: usize = 141;

/// Size of the caller-owned window at the end of the used application-use
/// area that may differ between a primary PVD and its duplicates.
pub const APPLICATION_USE_WINDOW: usize = 17;

/// Volume descriptor type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VolumeDescriptorType {
    /// Boot Record (El Torito)
    BootRecord = 0,
    /// Primary Volume Descriptor
    Primary = 1,
    /// Supplementary Volume Descriptor (Joliet or enhanced)
    Supplementary = 2,
    /// Volume Partition Descriptor
    Partition = 3,
    /// Volume Descriptor Set Terminator
    Terminator = 255,
}

/// Which hierarchy a type-1/type-2 descriptor describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VdKind {
    /// The primary hierarchy
    Primary,
    /// A Joliet hierarchy with the given UCS-2 level (1-3)
    Joliet(u8),
    /// An ISO 9660:1999 enhanced hierarchy (descriptor version 2)
    Enhanced,
}

/// A Primary or Supplementary Volume Descriptor in parsed form.
///
/// The same layout serves both; only the type code, version, escape
/// sequences and character-set rules differ.
#[derive(Debug, Clone)]
pub struct VolumeDescriptor {
    /// Which hierarchy this descriptor describes
    pub kind: VdKind,
    /// System identifier (32 bytes)
    pub system_ident: [u8; 32],
    /// Volume identifier (32 bytes)
    pub volume_ident: [u8; 32],
    /// Volume space size in logical blocks
    pub space_size: u32,
    /// Escape sequences (SVD) or zeros (PVD)
    pub escape_sequences: [u8; 32],
    /// Volume set size
    pub set_size: u16,
    /// Volume sequence number
    pub seqnum: u16,
    /// Logical block size (always 2048 here)
    pub log_block_size: u16,
    /// Path table size in bytes
    pub path_table_size: u32,
    /// Extent of the Type L path table
    pub path_table_location_le: u32,
    /// Extent of the optional Type L path table (0 when absent)
    pub opt_path_table_location_le: u32,
    /// Extent of the Type M path table
    pub path_table_location_be: u32,
    /// Extent of the optional Type M path table (0 when absent)
    pub opt_path_table_location_be: u32,
    /// Extent of the root directory
    pub root_dir_extent: u32,
    /// Data length of the root directory in bytes
    pub root_dir_size: u32,
    /// Volume set identifier (128 bytes)
    pub volume_set_ident: [u8; 128],
    /// Publisher identifier (128 bytes)
    pub publisher_ident: [u8; 128],
    /// Data preparer identifier (128 bytes)
    pub preparer_ident: [u8; 128],
    /// Application identifier (128 bytes)
    pub application_ident: [u8; 128],
    /// Copyright file identifier (37 bytes)
    pub copyright_file_ident: [u8; 37],
    /// Abstract file identifier (37 bytes)
    pub abstract_file_ident: [u8; 37],
    /// Bibliographic file identifier (37 bytes)
    pub bibliographic_file_ident: [u8; 37],
    /// Volume creation date and time
    pub creation_date: VolumeDateTime,
    /// Volume modification date and time
    pub modification_date: VolumeDateTime,
    /// Volume expiration date and time
    pub expiration_date: VolumeDateTime,
    /// Volume effective date and time
    pub effective_date: VolumeDateTime,
    /// File structure version (1, tolerated otherwise)
    pub file_structure_version: u8,
    /// Application use area (512 bytes)
    pub application_use: Box<[u8; 512]>,
}

impl VolumeDescriptor {
    /// Creates a descriptor with default field values for a new image.
    #[must_use]
    pub fn new(kind: VdKind, sys_ident: &str, vol_ident: &str, now: VolumeDateTime) -> Self {
        let mut descriptor = Self {
            kind,
            system_ident: [b' '; 32],
            volume_ident: [b' '; 32],
            space_size: 0,
            escape_sequences: [0; 32],
            set_size: 1,
            seqnum: 1,
            log_block_size: SECTOR_SIZE as u16,
            path_table_size: 0,
            path_table_location_le: 0,
            opt_path_table_location_le: 0,
            path_table_location_be: 0,
            opt_path_table_location_be: 0,
            root_dir_extent: 0,
            root_dir_size: 0,
            volume_set_ident: [b' '; 128],
            publisher_ident: [b' '; 128],
            preparer_ident: [b' '; 128],
            application_ident: [b' '; 128],
            copyright_file_ident: [b' '; 37],
            abstract_file_ident: [b' '; 37],
            bibliographic_file_ident: [b' '; 37],
            creation_date: now,
            modification_date: now,
            expiration_date: VolumeDateTime::unspecified(),
            effective_date: VolumeDateTime::unspecified(),
            file_structure_version: 1,
            application_use: Box::new([0; 512]),
        };
        if let VdKind::Joliet(level) = kind {
            // Joliet identifiers are UCS-2; space padding stays ASCII as
            // the escape sequences make the charset explicit.
            let escape: &[u8] = match level {
                1 => b"%/@",
                2 => b"%/C",
                _ => b"%/E",
            };
            descriptor.escape_sequences[..escape.len()].copy_from_slice(escape);
        }
        write_str_field(&mut descriptor.system_ident, sys_ident.as_bytes());
        write_str_field(&mut descriptor.volume_ident, vol_ident.as_bytes());
        descriptor
    }

    /// Parses a type-1 or type-2 descriptor out of one sector.
    ///
    /// `strict` turns tolerated quirks (descriptor version or file
    /// structure version other than 1) into hard errors.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidIso`-class errors on malformed descriptors.
    pub fn parse(buf: &[u8], strict: bool) -> Result<Self> {
        if buf.len() < SECTOR_SIZE {
            return Err(Error::UnexpectedEndOfData);
        }
        if &buf[1..6] != STANDARD_IDENTIFIER {
            return Err(Error::BadMagic {
                what: "volume descriptor",
                found: buf[1..6].to_vec(),
            });
        }
        let type_code = buf[0];
        let version = buf[6];
        let kind = match type_code {
            1 => VdKind::Primary,
            2 => {
                let escapes = &buf[88..120];
                if escapes.starts_with(b"%/@") || escapes.starts_with(b"%/C")
                    || escapes.starts_with(b"%/E")
                {
                    let level = match escapes[2] {
                        b'@' => 1,
                        b'C' => 2,
                        _ => 3,
                    };
                    VdKind::Joliet(level)
                } else {
                    VdKind::Enhanced
                }
            }
            _ => return Err(Error::InvalidIso("not a primary or supplementary descriptor")),
        };
        let expected_version = if kind == VdKind::Enhanced { 2 } else { 1 };
        if version != expected_version {
            if strict {
                return Err(Error::InvalidIso("unexpected volume descriptor version"));
            }
            log::warn!("volume descriptor version is {version}, expected {expected_version}");
        }

        let space_size = BothEndian32::parse(&buf[80..88], "volume space size")?.get();
        let set_size = BothEndian16::parse(&buf[120..124], "volume set size")?.get();
        let seqnum = BothEndian16::parse(&buf[124..128], "volume sequence number")?.get();
        let log_block_size = BothEndian16::parse(&buf[128..132], "logical block size")?.get();
        if log_block_size != SECTOR_SIZE as u16 {
            return Err(Error::InvalidIso("logical block size is not 2048"));
        }
        let path_table_size = BothEndian32::parse(&buf[132..140], "path table size")?.get();
        let root = RawDirRecord::parse(&buf[156..190])?;

        let file_structure_version = buf[881];
        if file_structure_version != 1 {
            if strict {
                return Err(Error::InvalidIso("file structure version is not 1"));
            }
            log::warn!("file structure version is {file_structure_version}, expected 1");
        }

        let mut descriptor = Self::new(
            kind,
            "",
            "",
            VolumeDateTime::parse(&buf[813..830])?,
        );
        descriptor.system_ident.copy_from_slice(&buf[8..40]);
        descriptor.volume_ident.copy_from_slice(&buf[40..72]);
        descriptor.space_size = space_size;
        descriptor.escape_sequences.copy_from_slice(&buf[88..120]);
        descriptor.set_size = set_size;
        descriptor.seqnum = seqnum;
        descriptor.log_block_size = log_block_size;
        descriptor.path_table_size = path_table_size;
        descriptor.path_table_location_le =
            u32::from_le_bytes([buf[140], buf[141], buf[142], buf[143]]);
        descriptor.opt_path_table_location_le =
            u32::from_le_bytes([buf[144], buf[145], buf[146], buf[147]]);
        descriptor.path_table_location_be =
            u32::from_be_bytes([buf[148], buf[149], buf[150], buf[151]]);
        descriptor.opt_path_table_location_be =
            u32::from_be_bytes([buf[152], buf[153], buf[154], buf[155]]);
        descriptor.root_dir_extent = root.extent;
        descriptor.root_dir_size = root.data_length;
        descriptor.volume_set_ident.copy_from_slice(&buf[190..318]);
        descriptor.publisher_ident.copy_from_slice(&buf[318..446]);
        descriptor.preparer_ident.copy_from_slice(&buf[446..574]);
        descriptor.application_ident.copy_from_slice(&buf[574..702]);
        descriptor.copyright_file_ident.copy_from_slice(&buf[702..739]);
        descriptor.abstract_file_ident.copy_from_slice(&buf[739..776]);
        descriptor
            .bibliographic_file_ident
            .copy_from_slice(&buf[776..813]);
        descriptor.creation_date = VolumeDateTime::parse(&buf[813..830])?;
        descriptor.modification_date = VolumeDateTime::parse(&buf[830..847])?;
        descriptor.expiration_date = VolumeDateTime::parse(&buf[847..864])?;
        descriptor.effective_date = VolumeDateTime::parse(&buf[864..881])?;
        descriptor.file_structure_version = file_structure_version;
        descriptor.application_use.copy_from_slice(&buf[883..1395]);
        Ok(descriptor)
    }

    /// Serializes this descriptor into one sector.
    ///
    /// `root_record` is the 34-byte root directory record to embed.
    #[must_use]
    pub fn record(&self, root_record: &[u8]) -> Vec<u8> {
        let mut out = vec![0u8; SECTOR_SIZE];
        let (type_code, version) = match self.kind {
            VdKind::Primary => (1u8, 1u8),
            VdKind::Joliet(_) => (2, 1),
            VdKind::Enhanced => (2, 2),
        };
        out[0] = type_code;
        out[1..6].copy_from_slice(STANDARD_IDENTIFIER);
        out[6] = version;
        out[8..40].copy_from_slice(&self.system_ident);
        out[40..72].copy_from_slice(&self.volume_ident);
        BothEndian32::new(self.space_size).write_to(&mut out[80..88]);
        out[88..120].copy_from_slice(&self.escape_sequences);
        BothEndian16::new(self.set_size).write_to(&mut out[120..124]);
        BothEndian16::new(self.seqnum).write_to(&mut out[124..128]);
        BothEndian16::new(self.log_block_size).write_to(&mut out[128..132]);
        BothEndian32::new(self.path_table_size).write_to(&mut out[132..140]);
        out[140..144].copy_from_slice(&self.path_table_location_le.to_le_bytes());
        out[144..148].copy_from_slice(&self.opt_path_table_location_le.to_le_bytes());
        out[148..152].copy_from_slice(&self.path_table_location_be.to_be_bytes());
        out[152..156].copy_from_slice(&self.opt_path_table_location_be.to_be_bytes());
        debug_assert_eq!(root_record.len(), 34);
        out[156..156 + root_record.len()].copy_from_slice(root_record);
        out[190..318].copy_from_slice(&self.volume_set_ident);
        out[318..446].copy_from_slice(&self.publisher_ident);
        out[446..574].copy_from_slice(&self.preparer_ident);
        out[574..702].copy_from_slice(&self.application_ident);
        out[702..739].copy_from_slice(&self.copyright_file_ident);
        out[739..776].copy_from_slice(&self.abstract_file_ident);
        out[776..813].copy_from_slice(&self.bibliographic_file_ident);
        self.creation_date.write_to(&mut out[813..830]);
        self.modification_date.write_to(&mut out[830..847]);
        self.expiration_date.write_to(&mut out[847..864]);
        self.effective_date.write_to(&mut out[864..881]);
        out[881] = self.file_structure_version;
        out[883..1395].copy_from_slice(&self.application_use[..]);
        out
    }

    /// Marks the application-use area with the XA signature.
    pub fn set_xa(&mut self) {
        self.application_use[XA_SIGNATURE_OFFSET..XA_SIGNATURE_OFFSET + XA_SIGNATURE.len()]
            .copy_from_slice(XA_SIGNATURE);
    }

    /// Returns whether the application-use area carries the XA signature.
    #[must_use]
    pub fn has_xa(&self) -> bool {
        &self.application_use[XA_SIGNATURE_OFFSET..XA_SIGNATURE_OFFSET + XA_SIGNATURE.len()]
            == XA_SIGNATURE
    }

    /// Returns the volume identifier with padding trimmed.
    #[must_use]
    pub fn volume_ident_str(&self) -> String {
        String::from_utf8_lossy(trim_str_field(&self.volume_ident)).into_owned()
    }
}

/// Boot Record Volume Descriptor for El Torito.
///
/// The Boot Record contains the identifier "EL TORITO SPECIFICATION" and
/// a pointer to the Boot Catalog in the first four bytes of its
/// system-use area.
///
/// Reference: El Torito Specification Section 2.0
#[derive(Debug, Clone)]
pub struct BootRecordVolumeDescriptor {
    /// Boot system identifier (32 bytes)
    pub boot_system_ident: [u8; 32],
    /// Boot identifier (32 bytes)
    pub boot_ident: [u8; 32],
    /// Boot system use area (1977 bytes); El Torito stores the catalog
    /// extent in the first four bytes, little-endian
    pub boot_system_use: Box<[u8; 1977]>,
}

impl BootRecordVolumeDescriptor {
    /// El Torito boot system identifier string.
    pub const EL_TORITO_ID: &'static [u8; 23] = b"EL TORITO SPECIFICATION";

    /// Creates a new El Torito boot record pointing at `catalog_extent`.
    #[must_use]
    pub fn new_eltorito(catalog_extent: u32) -> Self {
        let mut boot_system_ident = [0u8; 32];
        boot_system_ident[..23].copy_from_slice(Self::EL_TORITO_ID);
        let mut boot_system_use = Box::new([0u8; 1977]);
        boot_system_use[..4].copy_from_slice(&catalog_extent.to_le_bytes());
        Self {
            boot_system_ident,
            boot_ident: [0; 32],
            boot_system_use,
        }
    }

    /// Parses a boot record out of one sector.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::BadMagic`] when the sector is not a boot
    /// record.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < SECTOR_SIZE {
            return Err(Error::UnexpectedEndOfData);
        }
        if buf[0] != 0 || &buf[1..6] != STANDARD_IDENTIFIER {
            return Err(Error::BadMagic {
                what: "boot record",
                found: buf[..6].to_vec(),
            });
        }
        let mut boot_system_ident = [0u8; 32];
        boot_system_ident.copy_from_slice(&buf[7..39]);
        let mut boot_ident = [0u8; 32];
        boot_ident.copy_from_slice(&buf[39..71]);
        let mut boot_system_use = Box::new([0u8; 1977]);
        boot_system_use.copy_from_slice(&buf[71..2048]);
        Ok(Self {
            boot_system_ident,
            boot_ident,
            boot_system_use,
        })
    }

    /// Returns whether this boot record announces El Torito.
    #[must_use]
    pub fn is_eltorito(&self) -> bool {
        self.boot_system_ident.starts_with(Self::EL_TORITO_ID)
    }

    /// Returns the boot catalog extent recorded in the system-use area.
    #[must_use]
    pub fn catalog_extent(&self) -> u32 {
        u32::from_le_bytes([
            self.boot_system_use[0],
            self.boot_system_use[1],
            self.boot_system_use[2],
            self.boot_system_use[3],
        ])
    }

    /// Updates the recorded boot catalog extent.
    pub fn set_catalog_extent(&mut self, extent: u32) {
        self.boot_system_use[..4].copy_from_slice(&extent.to_le_bytes());
    }

    /// Serializes this descriptor into one sector.
    #[must_use]
    pub fn record(&self) -> Vec<u8> {
        let mut out = vec![0u8; SECTOR_SIZE];
        out[0] = VolumeDescriptorType::BootRecord as u8;
        out[1..6].copy_from_slice(STANDARD_IDENTIFIER);
        out[6] = 1;
        out[7..39].copy_from_slice(&self.boot_system_ident);
        out[39..71].copy_from_slice(&self.boot_ident);
        out[71..2048].copy_from_slice(&self.boot_system_use[..]);
        out
    }
}

/// Serializes a Volume Descriptor Set Terminator sector.
///
/// Reference: ECMA-119 Section 8.3
#[must_use]
pub fn terminator_record() -> Vec<u8> {
    let mut out = vec![0u8; SECTOR_SIZE];
    out[0] = VolumeDescriptorType::Terminator as u8;
    out[1..6].copy_from_slice(STANDARD_IDENTIFIER);
    out[6] = 1;
    out
}

/// A Volume Partition Descriptor, parsed and re-emitted opaquely.
#[derive(Debug, Clone)]
pub struct VolumePartitionDescriptor {
    /// The full descriptor sector
    pub data: Box<[u8; SECTOR_SIZE]>,
}

impl VolumePartitionDescriptor {
    /// Wraps a raw partition descriptor sector.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::UnexpectedEndOfData`] on a short buffer.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < SECTOR_SIZE {
            return Err(Error::UnexpectedEndOfData);
        }
        let mut data = Box::new([0u8; SECTOR_SIZE]);
        data.copy_from_slice(&buf[..SECTOR_SIZE]);
        Ok(Self { data })
    }

    /// Serializes this descriptor into one sector.
    #[must_use]
    pub fn record(&self) -> Vec<u8> {
        self.data.to_vec()
    }
}

/// Compares a duplicate PVD sector against the primary's sector, ignoring
/// the caller-owned application-use window.
///
/// The window is the [`APPLICATION_USE_WINDOW`] bytes that immediately
/// precede the trailing zeros of the used application-use area.
#[must_use]
pub fn duplicate_pvd_matches(primary: &[u8], duplicate: &[u8]) -> bool {
    if primary.len() != SECTOR_SIZE || duplicate.len() != SECTOR_SIZE {
        return false;
    }
    // Find the end of the used application-use area in the primary.
    let app_use = &primary[883..1395];
    let used = app_use.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    let window_start = 883 + used.saturating_sub(APPLICATION_USE_WINDOW);
    let window_end = 883 + used;
    primary[..window_start] == duplicate[..window_start]
        && primary[window_end..] == duplicate[window_end..]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_pvd() -> VolumeDescriptor {
        let mut descriptor = VolumeDescriptor::new(
            VdKind::Primary,
            "LINUX",
            "CDROM",
            VolumeDateTime::unspecified(),
        );
        descriptor.space_size = 25;
        descriptor.path_table_size = 10;
        descriptor.path_table_location_le = 19;
        descriptor.path_table_location_be = 21;
        descriptor.root_dir_extent = 23;
        descriptor.root_dir_size = 2048;
        descriptor
    }

    fn root_record() -> Vec<u8> {
        crate::directory::record_bytes(
            &[0x00],
            23,
            2048,
            &crate::types::DirRecordDateTime::unspecified(),
            crate::directory::FileFlags::DIRECTORY,
            &[],
        )
    }

    #[test]
    fn test_pvd_record_layout() {
        let bytes = sample_pvd().record(&root_record());
        assert_eq!(bytes.len(), SECTOR_SIZE);
        assert_eq!(bytes[0], 1);
        assert_eq!(&bytes[1..6], b"CD001");
        assert_eq!(bytes[6], 1);
        // System identifier at offset 8, volume identifier at 40.
        assert!(bytes[8..40].starts_with(b"LINUX"));
        assert!(bytes[40..72].starts_with(b"CDROM"));
        // space_size both-endian at offset 80.
        assert_eq!(&bytes[80..84], &25u32.to_le_bytes());
        assert_eq!(&bytes[84..88], &25u32.to_be_bytes());
        // Logical block size 2048 at offset 128.
        assert_eq!(&bytes[128..130], &2048u16.to_le_bytes());
        // Path table locations.
        assert_eq!(&bytes[140..144], &19u32.to_le_bytes());
        assert_eq!(&bytes[148..152], &21u32.to_be_bytes());
        // File structure version.
        assert_eq!(bytes[881], 1);
    }

    #[test]
    fn test_pvd_parse_roundtrip() {
        let original = sample_pvd();
        let bytes = original.record(&root_record());
        let parsed = VolumeDescriptor::parse(&bytes, true).unwrap();
        assert_eq!(parsed.kind, VdKind::Primary);
        assert_eq!(parsed.space_size, 25);
        assert_eq!(parsed.path_table_location_le, 19);
        assert_eq!(parsed.path_table_location_be, 21);
        assert_eq!(parsed.root_dir_extent, 23);
        assert_eq!(parsed.root_dir_size, 2048);
        assert_eq!(parsed.volume_ident_str(), "CDROM");
        // Re-emission is byte exact.
        assert_eq!(parsed.record(&root_record()), bytes);
    }

    #[test]
    fn test_joliet_svd_escape_sequences() {
        let svd = VolumeDescriptor::new(
            VdKind::Joliet(3),
            "",
            "CDROM",
            VolumeDateTime::unspecified(),
        );
        let bytes = svd.record(&root_record());
        assert_eq!(bytes[0], 2);
        assert_eq!(&bytes[88..91], b"%/E");
        let parsed = VolumeDescriptor::parse(&bytes, true).unwrap();
        assert_eq!(parsed.kind, VdKind::Joliet(3));
    }

    #[test]
    fn test_enhanced_vd_version_2() {
        let vd = VolumeDescriptor::new(
            VdKind::Enhanced,
            "",
            "CDROM",
            VolumeDateTime::unspecified(),
        );
        let bytes = vd.record(&root_record());
        assert_eq!(bytes[0], 2);
        assert_eq!(bytes[6], 2);
        let parsed = VolumeDescriptor::parse(&bytes, true).unwrap();
        assert_eq!(parsed.kind, VdKind::Enhanced);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = sample_pvd().record(&root_record());
        bytes[3] = b'X';
        assert!(matches!(
            VolumeDescriptor::parse(&bytes, true),
            Err(Error::BadMagic { .. })
        ));
    }

    #[test]
    fn test_nonstandard_version_tolerated_unless_strict() {
        let mut bytes = sample_pvd().record(&root_record());
        bytes[6] = 3;
        assert!(VolumeDescriptor::parse(&bytes, false).is_ok());
        assert!(VolumeDescriptor::parse(&bytes, true).is_err());
    }

    #[test]
    fn test_xa_signature() {
        let mut pvd = sample_pvd();
        assert!(!pvd.has_xa());
        pvd.set_xa();
        assert!(pvd.has_xa());
        let bytes = pvd.record(&root_record());
        let parsed = VolumeDescriptor::parse(&bytes, true).unwrap();
        assert!(parsed.has_xa());
    }

    #[test]
    fn test_boot_record_roundtrip() {
        let record = BootRecordVolumeDescriptor::new_eltorito(25);
        let bytes = record.record();
        assert_eq!(bytes[0], 0);
        assert_eq!(&bytes[7..30], b"EL TORITO SPECIFICATION");
        let parsed = BootRecordVolumeDescriptor::parse(&bytes).unwrap();
        assert!(parsed.is_eltorito());
        assert_eq!(parsed.catalog_extent(), 25);
        assert_eq!(parsed.record(), bytes);
    }

    #[test]
    fn test_terminator_record() {
        let bytes = terminator_record();
        assert_eq!(bytes[0], 255);
        assert_eq!(&bytes[1..6], b"CD001");
        assert_eq!(bytes[6], 1);
        assert!(bytes[7..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_duplicate_pvd_window() {
        let mut pvd = sample_pvd();
        // Occupy some application use so the window is interior.
        pvd.application_use[..100].copy_from_slice(&[0xAB; 100]);
        let primary = pvd.record(&root_record());

        let mut dup = pvd.clone();
        // Mutate inside the 17-byte window preceding the used area's end.
        dup.application_use[90] = 0xCD;
        let dup_bytes = dup.record(&root_record());
        assert!(duplicate_pvd_matches(&primary, &dup_bytes));

        // Mutating outside the window breaks the match.
        let mut bad = pvd.clone();
        bad.application_use[10] = 0xCD;
        let bad_bytes = bad.record(&root_record());
        assert!(!duplicate_pvd_matches(&primary, &bad_bytes));
    }
}
