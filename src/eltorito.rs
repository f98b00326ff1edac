// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! El Torito Boot Catalog structures for bootable ISO 9660 images.
//!
//! El Torito is an extension to ISO 9660 that allows booting from
//! CD-ROM/DVD. The boot catalog contains entries describing available boot
//! images and how they should be loaded:
//!
//! 1. Validation Entry (required, first entry)
//! 2. Initial/Default Entry (required, second entry)
//! 3. Section Header Entries (optional, for multi-platform boot)
//! 4. Section Entries (optional, additional boot images), possibly with
//!    selection-criteria extension records
//!
//! Parsing runs the catalog through a small state machine, entry by
//! 32-byte entry, mirroring the order above.
//!
//! Reference: "El Torito" Bootable CD-ROM Format Specification Version 1.0

use crate::crc::{boot_info_table_checksum, eltorito_word_sum};
use crate::error::{Error, Result};

/// Size of each boot catalog entry in bytes.
pub const BOOT_CATALOG_ENTRY_SIZE: usize = 32;

/// Required boot-load size (in 512-byte sectors) for isohybrid images.
pub const ISOHYBRID_BOOT_LOAD_SIZE: u16 = 4;

/// Platform IDs for El Torito.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum PlatformId {
    /// 80x86 (BIOS)
    #[default]
    X86 = 0x00,
    /// PowerPC
    PowerPC = 0x01,
    /// Mac
    Mac = 0x02,
    /// EFI (UEFI systems)
    Efi = 0xEF,
}

impl PlatformId {
    /// Decodes a platform id byte.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidIso`] on unknown ids.
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(Self::X86),
            0x01 => Ok(Self::PowerPC),
            0x02 => Ok(Self::Mac),
            0xEF => Ok(Self::Efi),
            _ => Err(Error::InvalidIso("unknown El Torito platform id")),
        }
    }
}

/// Boot media types for El Torito.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum BootMediaType {
    /// No emulation - boot image is loaded directly
    #[default]
    NoEmulation = 0x00,
    /// 1.2 MB floppy emulation
    Floppy1_2M = 0x01,
    /// 1.44 MB floppy emulation
    Floppy1_44M = 0x02,
    /// 2.88 MB floppy emulation
    Floppy2_88M = 0x03,
    /// Hard disk emulation
    HardDisk = 0x04,
}

impl BootMediaType {
    /// Decodes a media type byte.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidIso`] on values above 4.
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(Self::NoEmulation),
            0x01 => Ok(Self::Floppy1_2M),
            0x02 => Ok(Self::Floppy1_44M),
            0x03 => Ok(Self::Floppy2_88M),
            0x04 => Ok(Self::HardDisk),
            _ => Err(Error::InvalidIso("invalid El Torito boot media type")),
        }
    }

    /// Parses the textual media name accepted by the façade.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidInput`] on unknown names.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "noemul" => Ok(Self::NoEmulation),
            "floppy1.2" => Ok(Self::Floppy1_2M),
            "floppy1.44" => Ok(Self::Floppy1_44M),
            "floppy2.88" => Ok(Self::Floppy2_88M),
            "hdemul" => Ok(Self::HardDisk),
            _ => Err(Error::InvalidInput(
                "media name must be one of noemul, floppy1.2, floppy1.44, floppy2.88, hdemul",
            )),
        }
    }

    /// Required payload size in bytes for emulated media, `None` for no
    /// emulation and hard disk emulation.
    #[must_use]
    pub fn required_size(self) -> Option<u64> {
        match self {
            Self::Floppy1_2M => Some(1_228_800),
            Self::Floppy1_44M => Some(1_474_560),
            Self::Floppy2_88M => Some(2_949_120),
            Self::NoEmulation | Self::HardDisk => None,
        }
    }
}

/// Validation Entry (first entry in boot catalog).
///
/// The checksum is chosen such that the sum of all little-endian 16-bit
/// words in the entry is zero (carry discarded).
///
/// Reference: El Torito Specification Section 2.1
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationEntry {
    /// Platform ID
    pub platform_id: PlatformId,
    /// ID string (24 bytes, manufacturer/developer)
    pub id_string: [u8; 24],
}

impl ValidationEntry {
    /// Key bytes that must terminate a valid entry.
    pub const KEY_BYTES: (u8, u8) = (0x55, 0xAA);

    /// Creates a new validation entry for the specified platform.
    #[must_use]
    pub fn new(platform_id: PlatformId) -> Self {
        Self {
            platform_id,
            id_string: [0; 24],
        }
    }

    /// Parses a validation entry, verifying key bytes and checksum.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidIso`-class errors on any validation failure.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < BOOT_CATALOG_ENTRY_SIZE {
            return Err(Error::UnexpectedEndOfData);
        }
        if buf[0] != 0x01 {
            return Err(Error::InvalidIso("El Torito validation entry header id not 1"));
        }
        let platform_id = PlatformId::from_u8(buf[1])?;
        if buf[30] != Self::KEY_BYTES.0 || buf[31] != Self::KEY_BYTES.1 {
            return Err(Error::InvalidIso("El Torito validation entry key bytes wrong"));
        }
        let sum = eltorito_word_sum(&buf[..BOOT_CATALOG_ENTRY_SIZE]);
        if sum != 0 {
            return Err(Error::BadChecksum {
                what: "El Torito validation entry",
                expected: 0,
                found: u32::from(sum),
            });
        }
        let mut id_string = [0u8; 24];
        id_string.copy_from_slice(&buf[4..28]);
        Ok(Self {
            platform_id,
            id_string,
        })
    }

    /// Serializes the entry, computing the balancing checksum.
    #[must_use]
    pub fn record(&self) -> [u8; BOOT_CATALOG_ENTRY_SIZE] {
        let mut out = [0u8; BOOT_CATALOG_ENTRY_SIZE];
        out[0] = 0x01;
        out[1] = self.platform_id as u8;
        out[4..28].copy_from_slice(&self.id_string);
        out[30] = Self::KEY_BYTES.0;
        out[31] = Self::KEY_BYTES.1;
        let sum = eltorito_word_sum(&out);
        let checksum = 0u16.wrapping_sub(sum);
        out[28..30].copy_from_slice(&checksum.to_le_bytes());
        debug_assert_eq!(eltorito_word_sum(&out), 0);
        out
    }
}

/// An Initial/Default Entry or Section Entry.
///
/// The two layouts differ only in the tail: the initial entry's final 20
/// bytes are unused, while a section entry carries a selection-criteria
/// type byte and 19 criteria bytes there.
///
/// Reference: El Torito Specification Sections 2.2 and 2.4
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootEntry {
    /// Boot indicator (0x88 = bootable, 0x00 = not bootable)
    pub bootable: bool,
    /// Boot media emulation type
    pub media_type: BootMediaType,
    /// Load segment (0 = use the traditional 0x7C0)
    pub load_segment: u16,
    /// System type (copied from the partition table for HD emulation)
    pub system_type: u8,
    /// Number of 512-byte virtual sectors to load
    pub sector_count: u16,
    /// Logical block address of the boot image
    pub load_rba: u32,
    /// Selection criteria type (section entries only)
    pub selection_criteria_type: u8,
    /// Selection criteria bytes; 19 from the entry itself, extended in
    /// 30-byte increments by 0x44 extension records
    pub selection_criteria: Vec<u8>,
    /// Inode of the boot image payload, when managed by this image
    pub inode: Option<usize>,
    /// Whether a boot info table is patched into the payload at write time
    pub boot_info_table: bool,
}

impl BootEntry {
    /// Creates a new bootable entry.
    #[must_use]
    pub fn new(media_type: BootMediaType, sector_count: u16) -> Self {
        Self {
            bootable: true,
            media_type,
            load_segment: 0,
            system_type: 0,
            sector_count,
            load_rba: 0,
            selection_criteria_type: 0,
            selection_criteria: vec![0; 19],
            inode: None,
            boot_info_table: false,
        }
    }

    /// Parses an initial entry.
    ///
    /// The trailing 20 bytes should be zero per the specification, but
    /// ISOs in the wild fail that; by default a warning is logged and the
    /// bytes are ignored, `strict` turns this into an error.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidIso`-class errors on malformed entries.
    pub fn parse_initial(buf: &[u8], strict: bool) -> Result<Self> {
        let mut entry = Self::parse_common(buf)?;
        if buf[12..32].iter().any(|&b| b != 0) {
            if strict {
                return Err(Error::InvalidIso(
                    "El Torito initial entry trailing bytes not zero",
                ));
            }
            log::warn!("El Torito initial entry trailing bytes not zero; ignoring");
        }
        entry.selection_criteria_type = 0;
        entry.selection_criteria = vec![0; 19];
        Ok(entry)
    }

    /// Parses a section entry, including its selection criteria.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidIso`-class errors on malformed entries.
    pub fn parse_section(buf: &[u8]) -> Result<Self> {
        let mut entry = Self::parse_common(buf)?;
        entry.selection_criteria_type = buf[12];
        entry.selection_criteria = buf[13..32].to_vec();
        Ok(entry)
    }

    fn parse_common(buf: &[u8]) -> Result<Self> {
        if buf.len() < BOOT_CATALOG_ENTRY_SIZE {
            return Err(Error::UnexpectedEndOfData);
        }
        let bootable = match buf[0] {
            0x88 => true,
            0x00 => false,
            _ => return Err(Error::InvalidIso("invalid El Torito boot indicator")),
        };
        let media_type = BootMediaType::from_u8(buf[1])?;
        if buf[5] != 0 {
            return Err(Error::InvalidIso("El Torito unused field must be 0"));
        }
        Ok(Self {
            bootable,
            media_type,
            load_segment: u16::from_le_bytes([buf[2], buf[3]]),
            system_type: buf[4],
            sector_count: u16::from_le_bytes([buf[6], buf[7]]),
            load_rba: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
            selection_criteria_type: 0,
            selection_criteria: vec![0; 19],
            inode: None,
            boot_info_table: false,
        })
    }

    /// Serializes this entry as the initial entry (zero tail).
    #[must_use]
    pub fn record_initial(&self) -> [u8; BOOT_CATALOG_ENTRY_SIZE] {
        let mut out = self.record_header();
        out[12..32].fill(0);
        out
    }

    /// Serializes this entry as a section entry, plus any 0x44 extension
    /// records needed for overlong selection criteria.
    #[must_use]
    pub fn record_section(&self) -> Vec<u8> {
        let mut out = self.record_header().to_vec();
        out[12] = self.selection_criteria_type;
        let inline = self.selection_criteria.len().min(19);
        out[13..13 + inline].copy_from_slice(&self.selection_criteria[..inline]);
        // Extension records carry 30 further bytes each.
        let mut cursor = inline;
        while cursor < self.selection_criteria.len() {
            let mut ext = [0u8; BOOT_CATALOG_ENTRY_SIZE];
            ext[0] = 0x44;
            let chunk = (self.selection_criteria.len() - cursor).min(30);
            ext[2..2 + chunk].copy_from_slice(&self.selection_criteria[cursor..cursor + chunk]);
            if self.selection_criteria.len() > cursor + chunk {
                ext[1] = 0x01; // more extensions follow
            }
            out.extend_from_slice(&ext);
            cursor += chunk;
        }
        out
    }

    fn record_header(&self) -> [u8; BOOT_CATALOG_ENTRY_SIZE] {
        let mut out = [0u8; BOOT_CATALOG_ENTRY_SIZE];
        out[0] = if self.bootable { 0x88 } else { 0x00 };
        out[1] = self.media_type as u8;
        out[2..4].copy_from_slice(&self.load_segment.to_le_bytes());
        out[4] = self.system_type;
        out[5] = 0;
        out[6..8].copy_from_slice(&self.sector_count.to_le_bytes());
        out[8..12].copy_from_slice(&self.load_rba.to_le_bytes());
        out
    }
}

/// Section Header Entry for multi-platform boot support.
///
/// Reference: El Torito Specification Section 2.3
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionHeader {
    /// Platform ID for this section
    pub platform_id: PlatformId,
    /// ID string (28 bytes)
    pub id_string: [u8; 28],
    /// Boot entries in this section
    pub entries: Vec<BootEntry>,
}

impl SectionHeader {
    /// Header indicator for a non-final section header.
    pub const MORE_HEADERS: u8 = 0x90;
    /// Header indicator for the final section header.
    pub const FINAL_HEADER: u8 = 0x91;

    /// Creates a new empty section for `platform_id`.
    #[must_use]
    pub fn new(platform_id: PlatformId) -> Self {
        Self {
            platform_id,
            id_string: [0; 28],
            entries: Vec::new(),
        }
    }

    /// Parses a section header entry (without its section entries).
    ///
    /// Returns the header and its declared entry count.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidIso`-class errors on malformed headers.
    pub fn parse(buf: &[u8]) -> Result<(Self, u16)> {
        if buf.len() < BOOT_CATALOG_ENTRY_SIZE {
            return Err(Error::UnexpectedEndOfData);
        }
        if buf[0] != Self::MORE_HEADERS && buf[0] != Self::FINAL_HEADER {
            return Err(Error::InvalidIso("not an El Torito section header"));
        }
        let platform_id = PlatformId::from_u8(buf[1])?;
        let declared = u16::from_le_bytes([buf[2], buf[3]]);
        let mut id_string = [0u8; 28];
        id_string.copy_from_slice(&buf[4..32]);
        Ok((
            Self {
                platform_id,
                id_string,
                entries: Vec::new(),
            },
            declared,
        ))
    }

    /// Serializes this header with the given finality indicator.
    #[must_use]
    pub fn record(&self, is_final: bool) -> [u8; BOOT_CATALOG_ENTRY_SIZE] {
        let mut out = [0u8; BOOT_CATALOG_ENTRY_SIZE];
        out[0] = if is_final {
            Self::FINAL_HEADER
        } else {
            Self::MORE_HEADERS
        };
        out[1] = self.platform_id as u8;
        out[2..4].copy_from_slice(&(self.entries.len() as u16).to_le_bytes());
        out[4..32].copy_from_slice(&self.id_string);
        out
    }
}

/// Parse states for the boot catalog state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CatalogState {
    ExpectingValidation,
    ExpectingInitial,
    ExpectingSectionHeaderOrDone,
    ExpectingSectionEntry,
}

/// An El Torito Boot Catalog: a validation entry, an initial/default
/// entry, and zero or more sections of additional boot entries.
#[derive(Debug, Clone)]
pub struct BootCatalog {
    /// The validation entry
    pub validation: ValidationEntry,
    /// The initial/default entry
    pub initial: BootEntry,
    /// Additional sections for multi-platform boot
    pub sections: Vec<SectionHeader>,
    /// Extent of the catalog itself; set by the planner
    pub extent: u32,
    /// Inode backing the catalog's synthetic file record, when one exists
    pub inode: Option<usize>,
}

impl BootCatalog {
    /// Creates a catalog with a single default boot entry.
    #[must_use]
    pub fn new(platform_id: PlatformId, media_type: BootMediaType, sector_count: u16) -> Self {
        Self {
            validation: ValidationEntry::new(platform_id),
            initial: BootEntry::new(media_type, sector_count),
            sections: Vec::new(),
            extent: 0,
            inode: None,
        }
    }

    /// Parses a complete catalog image through the entry state machine.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidIso`-class errors on malformed catalogs.
    pub fn parse(data: &[u8], strict: bool) -> Result<Self> {
        let mut state = CatalogState::ExpectingValidation;
        let mut validation = None;
        let mut initial = None;
        let mut sections: Vec<SectionHeader> = Vec::new();
        let mut remaining_in_section: u16 = 0;

        for chunk in data.chunks(BOOT_CATALOG_ENTRY_SIZE) {
            if chunk.len() < BOOT_CATALOG_ENTRY_SIZE {
                break;
            }
            match state {
                CatalogState::ExpectingValidation => {
                    validation = Some(ValidationEntry::parse(chunk)?);
                    state = CatalogState::ExpectingInitial;
                }
                CatalogState::ExpectingInitial => {
                    initial = Some(BootEntry::parse_initial(chunk, strict)?);
                    state = CatalogState::ExpectingSectionHeaderOrDone;
                }
                CatalogState::ExpectingSectionHeaderOrDone => match chunk[0] {
                    0x00 => break,
                    SectionHeader::MORE_HEADERS | SectionHeader::FINAL_HEADER => {
                        // Only the final header (0x91) moves to the
                        // section-entry state; entries after a 0x90 header
                        // arrive through the 0x88 arm below.
                        let is_final = chunk[0] == SectionHeader::FINAL_HEADER;
                        let (header, declared) = SectionHeader::parse(chunk)?;
                        sections.push(header);
                        if is_final {
                            remaining_in_section = declared;
                            state = CatalogState::ExpectingSectionEntry;
                        }
                    }
                    0x88 => {
                        // Sectionless extra entries observed in the wild;
                        // fold them into an implicit x86 section.
                        let entry = BootEntry::parse_section(chunk)?;
                        if sections.is_empty() {
                            sections.push(SectionHeader::new(PlatformId::X86));
                        }
                        sections
                            .last_mut()
                            .expect("just pushed")
                            .entries
                            .push(entry);
                    }
                    0x44 => {
                        let last = sections
                            .last_mut()
                            .and_then(|section| section.entries.last_mut())
                            .ok_or(Error::InvalidIso(
                                "El Torito extension record without a section entry",
                            ))?;
                        last.selection_criteria.extend_from_slice(&chunk[2..32]);
                    }
                    _ => return Err(Error::InvalidIso("invalid El Torito boot catalog entry")),
                },
                CatalogState::ExpectingSectionEntry => match chunk[0] {
                    0x88 => {
                        let entry = BootEntry::parse_section(chunk)?;
                        sections
                            .last_mut()
                            .expect("section header precedes entries")
                            .entries
                            .push(entry);
                        remaining_in_section = remaining_in_section.saturating_sub(1);
                        if remaining_in_section == 0 {
                            state = CatalogState::ExpectingSectionHeaderOrDone;
                        }
                    }
                    0x00 => {
                        // A zero byte here is ambiguous between an unbootable
                        // entry and the end of the catalog; treat it as the
                        // terminator, as every known producer does.
                        log::warn!(
                            "El Torito catalog ended inside a section; treating 0x00 as terminator"
                        );
                        break;
                    }
                    0x44 => {
                        let last = sections
                            .last_mut()
                            .and_then(|section| section.entries.last_mut())
                            .ok_or(Error::InvalidIso(
                                "El Torito extension record without a section entry",
                            ))?;
                        last.selection_criteria.extend_from_slice(&chunk[2..32]);
                    }
                    _ => return Err(Error::InvalidIso("invalid El Torito section entry")),
                },
            }
        }

        Ok(Self {
            validation: validation.ok_or(Error::InvalidIso("missing El Torito validation entry"))?,
            initial: initial.ok_or(Error::InvalidIso("missing El Torito initial entry"))?,
            sections,
            extent: 0,
            inode: None,
        })
    }

    /// Adds a section with one entry for an additional platform.
    pub fn add_section_entry(&mut self, platform_id: PlatformId, entry: BootEntry) {
        let mut header = SectionHeader::new(platform_id);
        header.entries.push(entry);
        self.sections.push(header);
    }

    /// All boot entries (initial first), immutably.
    #[must_use]
    pub fn entries(&self) -> Vec<&BootEntry> {
        let mut out = vec![&self.initial];
        for section in &self.sections {
            out.extend(section.entries.iter());
        }
        out
    }

    /// All boot entries (initial first), mutably.
    pub fn entries_mut(&mut self) -> Vec<&mut BootEntry> {
        let mut out = vec![&mut self.initial];
        for section in &mut self.sections {
            out.extend(section.entries.iter_mut());
        }
        out
    }

    /// Serializes the catalog, padded to a full sector.
    #[must_use]
    pub fn record(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(crate::types::SECTOR_SIZE);
        out.extend_from_slice(&self.validation.record());
        out.extend_from_slice(&self.initial.record_initial());
        let section_count = self.sections.len();
        for (index, section) in self.sections.iter().enumerate() {
            out.extend_from_slice(&section.record(index + 1 == section_count));
            for entry in &section.entries {
                out.extend_from_slice(&entry.record_section());
            }
        }
        out.resize(out.len().div_ceil(crate::types::SECTOR_SIZE) * crate::types::SECTOR_SIZE, 0);
        out
    }
}

/// The boot info table patched into a boot file at offsets 8..64.
///
/// Layout: PVD extent (LE32), boot file extent (LE32), boot file length
/// (LE32), 32-bit checksum of the file's words from byte 64, then 40 zero
/// bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootInfoTable {
    /// Extent of the PVD (16)
    pub pvd_extent: u32,
    /// Extent of the boot file
    pub boot_file_extent: u32,
    /// Length of the boot file in bytes
    pub boot_file_length: u32,
    /// Checksum of the boot file from byte 64 onward
    pub checksum: u32,
}

impl BootInfoTable {
    /// Computes the table for a boot file's contents.
    #[must_use]
    pub fn for_file(pvd_extent: u32, boot_file_extent: u32, contents: &[u8]) -> Self {
        let tail = contents.get(64..).unwrap_or(&[]);
        Self {
            pvd_extent,
            boot_file_extent,
            boot_file_length: contents.len() as u32,
            checksum: boot_info_table_checksum(tail),
        }
    }

    /// Patches the table into `contents` in place.
    ///
    /// Files shorter than 64 bytes are left untouched.
    pub fn patch(&self, contents: &mut [u8]) {
        if contents.len() < 64 {
            return;
        }
        contents[8..12].copy_from_slice(&self.pvd_extent.to_le_bytes());
        contents[12..16].copy_from_slice(&self.boot_file_extent.to_le_bytes());
        contents[16..20].copy_from_slice(&self.boot_file_length.to_le_bytes());
        contents[20..24].copy_from_slice(&self.checksum.to_le_bytes());
        contents[24..64].fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_entry_checksum_balances() {
        let entry = ValidationEntry::new(PlatformId::X86);
        let bytes = entry.record();
        assert_eq!(eltorito_word_sum(&bytes), 0);
        assert_eq!(bytes[30], 0x55);
        assert_eq!(bytes[31], 0xAA);
    }

    #[test]
    fn test_validation_entry_roundtrip() {
        let mut entry = ValidationEntry::new(PlatformId::Efi);
        entry.id_string[..4].copy_from_slice(b"TEST");
        let parsed = ValidationEntry::parse(&entry.record()).unwrap();
        assert_eq!(parsed, entry);
    }

    #[test]
    fn test_validation_entry_bad_checksum_rejected() {
        let mut bytes = ValidationEntry::new(PlatformId::X86).record();
        bytes[28] ^= 0xFF;
        assert!(matches!(
            ValidationEntry::parse(&bytes),
            Err(Error::BadChecksum { .. })
        ));
    }

    #[test]
    fn test_initial_entry_roundtrip() {
        let mut entry = BootEntry::new(BootMediaType::NoEmulation, 4);
        entry.load_rba = 26;
        let bytes = entry.record_initial();
        assert_eq!(bytes[0], 0x88);
        assert_eq!(u16::from_le_bytes([bytes[6], bytes[7]]), 4);
        assert_eq!(u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]), 26);
        let parsed = BootEntry::parse_initial(&bytes, true).unwrap();
        assert_eq!(parsed.load_rba, 26);
        assert_eq!(parsed.media_type, BootMediaType::NoEmulation);
    }

    #[test]
    fn test_initial_entry_dirty_tail_tolerated() {
        let mut bytes = BootEntry::new(BootMediaType::NoEmulation, 4).record_initial();
        bytes[31] = 0x5A;
        assert!(BootEntry::parse_initial(&bytes, false).is_ok());
        assert!(BootEntry::parse_initial(&bytes, true).is_err());
    }

    #[test]
    fn test_catalog_roundtrip_single_boot() {
        let mut catalog = BootCatalog::new(PlatformId::X86, BootMediaType::NoEmulation, 4);
        catalog.initial.load_rba = 26;
        let bytes = catalog.record();
        assert_eq!(bytes.len(), crate::types::SECTOR_SIZE);

        let parsed = BootCatalog::parse(&bytes, true).unwrap();
        assert_eq!(parsed.validation.platform_id, PlatformId::X86);
        assert_eq!(parsed.initial.load_rba, 26);
        assert!(parsed.sections.is_empty());
    }

    #[test]
    fn test_catalog_roundtrip_multi_boot() {
        let mut catalog = BootCatalog::new(PlatformId::X86, BootMediaType::NoEmulation, 4);
        catalog.initial.load_rba = 26;
        let mut efi = BootEntry::new(BootMediaType::NoEmulation, 8);
        efi.load_rba = 28;
        catalog.add_section_entry(PlatformId::Efi, efi);

        let bytes = catalog.record();
        // The single section header must carry the final indicator.
        assert_eq!(bytes[64], SectionHeader::FINAL_HEADER);
        assert_eq!(bytes[65], 0xEF);

        let parsed = BootCatalog::parse(&bytes, true).unwrap();
        assert_eq!(parsed.sections.len(), 1);
        assert_eq!(parsed.sections[0].platform_id, PlatformId::Efi);
        assert_eq!(parsed.sections[0].entries.len(), 1);
        assert_eq!(parsed.sections[0].entries[0].load_rba, 28);
    }

    #[test]
    fn test_catalog_selection_criteria_extension() {
        let mut catalog = BootCatalog::new(PlatformId::X86, BootMediaType::NoEmulation, 4);
        let mut entry = BootEntry::new(BootMediaType::NoEmulation, 8);
        entry.selection_criteria = (0u8..40).collect();
        catalog.add_section_entry(PlatformId::Efi, entry);

        let bytes = catalog.record();
        let parsed = BootCatalog::parse(&bytes, true).unwrap();
        let roundtripped = &parsed.sections[0].entries[0].selection_criteria;
        // 19 inline + 30 from one extension record = 49 bytes, zero padded.
        assert_eq!(roundtripped.len(), 49);
        assert_eq!(&roundtripped[..40], &(0u8..40).collect::<Vec<_>>()[..]);
        assert!(roundtripped[40..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_catalog_zero_terminator_inside_section() {
        // A catalog whose section header declares more entries than are
        // present, followed by zeros: tolerated, 0x00 ends the catalog.
        let mut catalog = BootCatalog::new(PlatformId::X86, BootMediaType::NoEmulation, 4);
        let mut header = SectionHeader::new(PlatformId::Efi);
        header.entries.push(BootEntry::new(BootMediaType::NoEmulation, 8));
        catalog.sections.push(header);
        let mut bytes = catalog.record();
        // Overstate the entry count.
        bytes[66] = 2;
        let parsed = BootCatalog::parse(&bytes, true).unwrap();
        assert_eq!(parsed.sections[0].entries.len(), 1);
    }

    #[test]
    fn test_media_types() {
        assert_eq!(BootMediaType::from_name("noemul").unwrap(), BootMediaType::NoEmulation);
        assert_eq!(
            BootMediaType::Floppy1_44M.required_size(),
            Some(1_474_560)
        );
        assert!(BootMediaType::from_name("cassette").is_err());
        assert!(BootMediaType::from_u8(5).is_err());
    }

    #[test]
    fn test_boot_info_table_patch() {
        let mut contents = vec![0xA5u8; 2048];
        let table = BootInfoTable::for_file(16, 26, &contents);
        assert_eq!(table.boot_file_length, 2048);
        let expected_checksum = boot_info_table_checksum(&contents[64..]);
        table.patch(&mut contents);
        assert_eq!(&contents[8..12], &16u32.to_le_bytes());
        assert_eq!(&contents[12..16], &26u32.to_le_bytes());
        assert_eq!(&contents[16..20], &2048u32.to_le_bytes());
        assert_eq!(&contents[20..24], &expected_checksum.to_le_bytes());
        assert!(contents[24..64].iter().all(|&b| b == 0));
        // Bytes outside the table are untouched.
        assert_eq!(contents[64], 0xA5);
        assert_eq!(&contents[..8], &[0xA5; 8]);
    }
}
