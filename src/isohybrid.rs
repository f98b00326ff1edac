// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Isohybrid MBR and GPT structures.
//!
//! An isohybrid image carries an MBR in the otherwise-unused system area so
//! the same bytes boot both as an optical disc and as a USB mass-storage
//! device. The MBR's first partition spans the whole image; in EFI mode a
//! hybrid GPT is layered on top (primary at 512-byte LBA 1, secondary at
//! the end of the image) with a partition covering the image, one per EFI
//! boot image, and a Mac partition when requested.
//!
//! All LBA values in this module are 512-byte sectors, not 2048-byte
//! logical blocks; an ISO extent `e` sits at LBA `e * 4`.
//!
//! Layout follows the syslinux isohybrid conventions.

use crate::crc::crc32_ieee;
use crate::error::{Error, Result};

/// Size of the MBR boot code area.
pub const MBR_CODE_SIZE: usize = 432;

/// Number of GPT partition entries reserved in each array.
pub const GPT_ENTRY_COUNT: u32 = 128;

/// Size of one GPT partition entry.
pub const GPT_ENTRY_SIZE: usize = 128;

/// 512-byte LBAs occupied by one GPT partition entry array.
pub const GPT_ARRAY_LBAS: u64 = (GPT_ENTRY_COUNT as u64 * GPT_ENTRY_SIZE as u64) / 512;

/// The signature word required at offset 0x40 of an isohybrid-capable boot
/// file (isolinux `isohdpfx` handshake).
pub const ISOHYBRID_BOOT_SIGNATURE: [u8; 4] = [0xFB, 0xC0, 0x78, 0x70];

/// GUID in GPT's mixed-endian byte layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Guid(pub [u8; 16]);

impl Guid {
    /// Microsoft basic data partition type.
    pub const BASIC_DATA: Self = Self([
        0xA2, 0xA0, 0xD0, 0xEB, 0xE5, 0xB9, 0x33, 0x44, 0x87, 0xC0, 0x68, 0xB6, 0xB7, 0x26,
        0x99, 0xC7,
    ]);
    /// Apple HFS/HFS+ partition type (Mac boot partitions).
    pub const APPLE_HFS: Self = Self([
        0x00, 0x53, 0x46, 0x48, 0x00, 0x00, 0xAA, 0x11, 0xAA, 0x11, 0x00, 0x30, 0x65, 0x43,
        0xEC, 0xAC,
    ]);

    /// Derives a deterministic unique GUID from the MBR disk id and an
    /// index, keeping image output reproducible.
    #[must_use]
    pub fn derived(mbr_id: u32, index: u32) -> Self {
        let mut out = [0u8; 16];
        let mut state = u64::from(mbr_id) << 32 | u64::from(index).wrapping_mul(0x9E37_79B9);
        for chunk in out.chunks_mut(8) {
            state = state
                .wrapping_mul(0x5851_F42D_4C95_7F2D)
                .wrapping_add(0x1405_7B7E_F767_814F);
            chunk.copy_from_slice(&state.to_le_bytes());
        }
        // Version 4 / variant bits, matching what a random GUID would carry.
        out[7] = (out[7] & 0x0F) | 0x40;
        out[8] = (out[8] & 0x3F) | 0x80;
        Self(out)
    }
}

/// One partition covered by the hybrid GPT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GptPartition {
    /// Partition type GUID
    pub type_guid: Guid,
    /// Unique partition GUID
    pub unique_guid: Guid,
    /// First 512-byte LBA
    pub first_lba: u64,
    /// Last 512-byte LBA, inclusive
    pub last_lba: u64,
    /// Partition name (stored UTF-16LE, up to 36 units)
    pub name: &'static str,
}

impl GptPartition {
    fn record(&self) -> [u8; GPT_ENTRY_SIZE] {
        let mut out = [0u8; GPT_ENTRY_SIZE];
        out[..16].copy_from_slice(&self.type_guid.0);
        out[16..32].copy_from_slice(&self.unique_guid.0);
        out[32..40].copy_from_slice(&self.first_lba.to_le_bytes());
        out[40..48].copy_from_slice(&self.last_lba.to_le_bytes());
        // Attributes stay zero.
        for (index, unit) in self.name.encode_utf16().take(36).enumerate() {
            out[56 + index * 2..58 + index * 2].copy_from_slice(&unit.to_le_bytes());
        }
        out
    }
}

/// The isohybrid state attached to an image.
#[derive(Debug, Clone)]
pub struct IsoHybrid {
    /// MBR boot code (the isohdpfx stub carried by the source image, or
    /// zeros when none was supplied)
    pub mbr_code: Box<[u8; MBR_CODE_SIZE]>,
    /// Disk signature at offset 440
    pub mbr_id: u32,
    /// Which MBR slot (1-4) carries the spanning partition
    pub part_entry: u8,
    /// MBR partition type: 0x17 normally, 0x00 in EFI mode
    pub part_type: u8,
    /// Drive geometry: heads per cylinder
    pub geometry_heads: u8,
    /// Drive geometry: sectors per track
    pub geometry_sectors: u8,
    /// Whether a hybrid GPT is written
    pub efi: bool,
    /// Whether a Mac partition is added to the GPT
    pub mac: bool,
    /// (LBA, 512-sector count) of each EFI boot image; filled by the
    /// planner
    pub efi_runs: Vec<(u64, u64)>,
    /// (LBA, 512-sector count) of the Mac boot image, when present
    pub mac_run: Option<(u64, u64)>,
}

impl IsoHybrid {
    /// Creates isohybrid state for a freshly mastered image.
    #[must_use]
    pub fn new(mac: bool, efi: bool) -> Self {
        Self {
            mbr_code: Box::new([0; MBR_CODE_SIZE]),
            mbr_id: 0,
            part_entry: 1,
            part_type: if efi { 0x00 } else { 0x17 },
            geometry_heads: 64,
            geometry_sectors: 32,
            efi,
            mac,
            efi_runs: Vec::new(),
            mac_run: None,
        }
    }

    /// Reconstructs isohybrid state from a parsed system area.
    ///
    /// Returns `None` when the system area carries no MBR signature.
    #[must_use]
    pub fn parse(system_area: &[u8]) -> Option<Self> {
        if system_area.len() < 512 || system_area[510] != 0x55 || system_area[511] != 0xAA {
            return None;
        }
        if system_area[..MBR_CODE_SIZE].iter().all(|&b| b == 0) {
            return None;
        }
        let mut mbr_code = Box::new([0u8; MBR_CODE_SIZE]);
        mbr_code.copy_from_slice(&system_area[..MBR_CODE_SIZE]);
        let mbr_id = u32::from_le_bytes([
            system_area[440],
            system_area[441],
            system_area[442],
            system_area[443],
        ]);
        // Find the first used partition slot.
        let mut part_entry = 1u8;
        let mut part_type = 0x17u8;
        for slot in 0..4u8 {
            let offset = 446 + usize::from(slot) * 16;
            if system_area[offset + 4] != 0 || system_area[offset] == 0x80 {
                part_entry = slot + 1;
                part_type = system_area[offset + 4];
                break;
            }
        }
        let efi = system_area.len() > 1024 && &system_area[512..520] == b"EFI PART";
        Some(Self {
            mbr_code,
            mbr_id,
            part_entry,
            part_type,
            geometry_heads: 64,
            geometry_sectors: 32,
            efi,
            mac: false,
            efi_runs: Vec::new(),
            mac_run: None,
        })
    }

    /// Rounds an image size up to the full-MiB boundary isohybrid images
    /// are padded to.
    #[must_use]
    pub fn padded_size(image_size: u64) -> u64 {
        image_size.div_ceil(1024 * 1024) * (1024 * 1024)
    }

    fn chs(&self, lba: u64) -> [u8; 3] {
        let sectors = u64::from(self.geometry_sectors);
        let heads = u64::from(self.geometry_heads);
        let cylinder = lba / (sectors * heads);
        let head = (lba / sectors) % heads;
        let sector = (lba % sectors) + 1;
        if cylinder > 1023 {
            return [0xFE, 0xFF, 0xFF];
        }
        [
            head as u8,
            ((sector & 0x3F) | ((cylinder >> 2) & 0xC0)) as u8,
            (cylinder & 0xFF) as u8,
        ]
    }

    /// Serializes the 512-byte MBR sector for an image of
    /// `image_size` bytes (already padded).
    #[must_use]
    pub fn record_mbr(&self, image_size: u64) -> [u8; 512] {
        let mut out = [0u8; 512];
        out[..MBR_CODE_SIZE].copy_from_slice(&self.mbr_code[..]);
        out[440..444].copy_from_slice(&self.mbr_id.to_le_bytes());
        let total_lbas = image_size / 512;
        let offset = 446 + (usize::from(self.part_entry) - 1) * 16;
        out[offset] = 0x80; // bootable
        out[offset + 1..offset + 4].copy_from_slice(&self.chs(0));
        out[offset + 4] = self.part_type;
        out[offset + 5..offset + 8].copy_from_slice(&self.chs(total_lbas - 1));
        out[offset + 8..offset + 12].copy_from_slice(&0u32.to_le_bytes());
        out[offset + 12..offset + 16]
            .copy_from_slice(&(total_lbas.min(u64::from(u32::MAX)) as u32).to_le_bytes());
        out[510] = 0x55;
        out[511] = 0xAA;
        out
    }

    /// Builds the partition list for the hybrid GPT.
    fn gpt_partitions(&self, total_lbas: u64) -> Vec<GptPartition> {
        let mut parts = vec![GptPartition {
            type_guid: Guid::BASIC_DATA,
            unique_guid: Guid::derived(self.mbr_id, 1),
            first_lba: 0,
            last_lba: total_lbas - 1,
            name: "ISOHybrid ISO",
        }];
        for (index, &(lba, count)) in self.efi_runs.iter().enumerate() {
            parts.push(GptPartition {
                type_guid: Guid::BASIC_DATA,
                unique_guid: Guid::derived(self.mbr_id, 2 + index as u32),
                first_lba: lba,
                last_lba: lba + count - 1,
                name: "ISOHybrid",
            });
        }
        if let Some((lba, count)) = self.mac_run {
            parts.push(GptPartition {
                type_guid: Guid::APPLE_HFS,
                unique_guid: Guid::derived(self.mbr_id, 0x4D41_4321),
                first_lba: lba,
                last_lba: lba + count - 1,
                name: "ISOHybrid",
            });
        }
        parts
    }

    fn gpt_array_bytes(&self, total_lbas: u64) -> Vec<u8> {
        let mut array = vec![0u8; GPT_ENTRY_COUNT as usize * GPT_ENTRY_SIZE];
        for (index, part) in self.gpt_partitions(total_lbas).iter().enumerate() {
            array[index * GPT_ENTRY_SIZE..(index + 1) * GPT_ENTRY_SIZE]
                .copy_from_slice(&part.record());
        }
        array
    }

    fn gpt_header(
        &self,
        total_lbas: u64,
        current_lba: u64,
        backup_lba: u64,
        array_lba: u64,
        array_crc: u32,
    ) -> [u8; 512] {
        let mut out = [0u8; 512];
        out[..8].copy_from_slice(b"EFI PART");
        out[8..12].copy_from_slice(&0x0001_0000u32.to_le_bytes()); // revision 1.0
        out[12..16].copy_from_slice(&92u32.to_le_bytes()); // header size
        out[24..32].copy_from_slice(&current_lba.to_le_bytes());
        out[32..40].copy_from_slice(&backup_lba.to_le_bytes());
        // Usable range: between the two header+array regions.
        let first_usable = 2 + GPT_ARRAY_LBAS;
        let last_usable = total_lbas - 2 - GPT_ARRAY_LBAS;
        out[40..48].copy_from_slice(&first_usable.to_le_bytes());
        out[48..56].copy_from_slice(&last_usable.to_le_bytes());
        out[56..72].copy_from_slice(&Guid::derived(self.mbr_id, 0).0);
        out[72..80].copy_from_slice(&array_lba.to_le_bytes());
        out[80..84].copy_from_slice(&GPT_ENTRY_COUNT.to_le_bytes());
        out[84..88].copy_from_slice(&(GPT_ENTRY_SIZE as u32).to_le_bytes());
        out[88..92].copy_from_slice(&array_crc.to_le_bytes());
        let header_crc = crc32_ieee(&out[..92]);
        out[16..20].copy_from_slice(&header_crc.to_le_bytes());
        out
    }

    /// Serializes the primary GPT: header at LBA 1 followed by the
    /// partition entry array.
    #[must_use]
    pub fn record_primary_gpt(&self, image_size: u64) -> Vec<u8> {
        let total_lbas = image_size / 512;
        let array = self.gpt_array_bytes(total_lbas);
        let array_crc = crc32_ieee(&array);
        let header = self.gpt_header(total_lbas, 1, total_lbas - 1, 2, array_crc);
        let mut out = header.to_vec();
        out.extend_from_slice(&array);
        out
    }

    /// Serializes the secondary GPT: partition array followed by the
    /// backup header, ending at the image's final LBA.
    #[must_use]
    pub fn record_secondary_gpt(&self, image_size: u64) -> Vec<u8> {
        let total_lbas = image_size / 512;
        let array = self.gpt_array_bytes(total_lbas);
        let array_crc = crc32_ieee(&array);
        let array_lba = total_lbas - 1 - GPT_ARRAY_LBAS;
        let header = self.gpt_header(total_lbas, total_lbas - 1, 1, array_lba, array_crc);
        let mut out = array;
        out.extend_from_slice(&header);
        out
    }
}

/// Validates that a boot file is isohybrid-capable: the isohdpfx
/// signature word at offset 0x40 and a boot-load size of 4 sectors.
///
/// # Errors
///
/// Fails with [`Error::InvalidInput`] when either check fails.
pub fn check_boot_file(contents: &[u8], boot_load_size: u16) -> Result<()> {
    if boot_load_size != crate::eltorito::ISOHYBRID_BOOT_LOAD_SIZE {
        return Err(Error::InvalidInput(
            "isohybrid requires an El Torito boot-load size of 4",
        ));
    }
    if contents.len() < 0x44 || contents[0x40..0x44] != ISOHYBRID_BOOT_SIGNATURE {
        return Err(Error::InvalidInput(
            "boot file does not carry the isohybrid signature",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    fn hybrid_with_code() -> IsoHybrid {
        let mut hybrid = IsoHybrid::new(false, false);
        hybrid.mbr_code[0] = 0x33; // any nonzero stub
        hybrid.mbr_id = 0xDEAD_BEEF;
        hybrid
    }

    #[test]
    fn test_padded_size() {
        assert_eq!(IsoHybrid::padded_size(1), MIB);
        assert_eq!(IsoHybrid::padded_size(MIB), MIB);
        assert_eq!(IsoHybrid::padded_size(MIB + 1), 2 * MIB);
    }

    #[test]
    fn test_mbr_layout() {
        let hybrid = hybrid_with_code();
        let mbr = hybrid.record_mbr(MIB);
        assert_eq!(mbr[510], 0x55);
        assert_eq!(mbr[511], 0xAA);
        assert_eq!(&mbr[440..444], &0xDEAD_BEEFu32.to_le_bytes());
        // Partition slot 1 at offset 446: bootable, type 0x17, spans the
        // 2048 LBAs of one MiB.
        assert_eq!(mbr[446], 0x80);
        assert_eq!(mbr[446 + 4], 0x17);
        assert_eq!(&mbr[446 + 8..446 + 12], &0u32.to_le_bytes());
        assert_eq!(&mbr[446 + 12..446 + 16], &2048u32.to_le_bytes());
    }

    #[test]
    fn test_mbr_parse_roundtrip() {
        let hybrid = hybrid_with_code();
        let mut system_area = vec![0u8; 32768];
        system_area[..512].copy_from_slice(&hybrid.record_mbr(MIB));
        let parsed = IsoHybrid::parse(&system_area).unwrap();
        assert_eq!(parsed.mbr_id, 0xDEAD_BEEF);
        assert_eq!(parsed.part_entry, 1);
        assert_eq!(parsed.part_type, 0x17);
        assert!(!parsed.efi);
    }

    #[test]
    fn test_parse_rejects_blank_system_area() {
        assert!(IsoHybrid::parse(&[0u8; 32768]).is_none());
    }

    #[test]
    fn test_gpt_crcs_verify() {
        let mut hybrid = hybrid_with_code();
        hybrid.efi = true;
        hybrid.part_type = 0x00;
        hybrid.efi_runs.push((104, 8));
        let image_size = 4 * MIB;
        let gpt = hybrid.record_primary_gpt(image_size);

        // Array CRC recorded at header offset 88 must match the array.
        let array = &gpt[512..];
        let recorded_array_crc = u32::from_le_bytes([gpt[88], gpt[89], gpt[90], gpt[91]]);
        assert_eq!(recorded_array_crc, crc32_ieee(array));

        // Header CRC verifies with its own field zeroed.
        let mut header = gpt[..92].to_vec();
        let recorded = u32::from_le_bytes([header[16], header[17], header[18], header[19]]);
        header[16..20].fill(0);
        assert_eq!(recorded, crc32_ieee(&header));
        assert_eq!(&gpt[..8], b"EFI PART");
    }

    #[test]
    fn test_gpt_partition_inventory() {
        let mut hybrid = hybrid_with_code();
        hybrid.efi = true;
        hybrid.mac = true;
        hybrid.efi_runs.push((104, 8));
        hybrid.mac_run = Some((112, 4));
        let total_lbas = (4 * MIB) / 512;
        let parts = hybrid.gpt_partitions(total_lbas);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].name, "ISOHybrid ISO");
        assert_eq!(parts[0].first_lba, 0);
        assert_eq!(parts[0].last_lba, total_lbas - 1);
        assert_eq!(parts[1].type_guid, Guid::BASIC_DATA);
        assert_eq!(parts[1].first_lba, 104);
        assert_eq!(parts[1].last_lba, 111);
        assert_eq!(parts[2].type_guid, Guid::APPLE_HFS);
        // Unique GUIDs are distinct and deterministic.
        assert_ne!(parts[0].unique_guid, parts[1].unique_guid);
        assert_eq!(parts, hybrid.gpt_partitions(total_lbas));
    }

    #[test]
    fn test_secondary_gpt_mirrors_primary_array() {
        let mut hybrid = hybrid_with_code();
        hybrid.efi = true;
        let image_size = 2 * MIB;
        let primary = hybrid.record_primary_gpt(image_size);
        let secondary = hybrid.record_secondary_gpt(image_size);
        // Same array bytes, different header placement.
        let array_len = GPT_ENTRY_COUNT as usize * GPT_ENTRY_SIZE;
        assert_eq!(&primary[512..512 + array_len], &secondary[..array_len]);
        let header = &secondary[array_len..];
        let total_lbas = image_size / 512;
        assert_eq!(
            u64::from_le_bytes(header[24..32].try_into().unwrap()),
            total_lbas - 1
        );
        assert_eq!(u64::from_le_bytes(header[32..40].try_into().unwrap()), 1);
    }

    #[test]
    fn test_check_boot_file() {
        let mut contents = vec![0u8; 2048];
        assert!(check_boot_file(&contents, 4).is_err());
        contents[0x40..0x44].copy_from_slice(&ISOHYBRID_BOOT_SIGNATURE);
        assert!(check_boot_file(&contents, 4).is_ok());
        assert!(check_boot_file(&contents, 8).is_err());
    }
}
