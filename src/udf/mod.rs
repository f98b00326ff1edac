// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! UDF 2.60 structures.
//!
//! A UDF-bridge image overlays a second descriptor tree on the same
//! sectors as the ISO 9660 structures: a volume recognition sequence
//! (BEA01/NSR03/TEA01), a main and a reserve volume descriptor sequence,
//! two anchor pointers, a logical volume integrity descriptor, and a file
//! set rooted at the partition start whose File Entries and File
//! Identifier Descriptors mirror the directory tree.
//!
//! Every descriptor is wrapped in a 16-byte tag carrying a header
//! checksum, a CRC over the descriptor body, and the extent the tag lives
//! at. [`tag`]/[`parse_tag`] own that plumbing; the descriptor types
//! serialize their bodies only.
//!
//! Reference: ECMA-167 3rd edition and OSTA UDF 2.60.

pub mod entries;
pub mod osta;

use crate::crc::crc16_ccitt;
use crate::error::{Error, Result};
use crate::types::SECTOR_SIZE;

pub use entries::{
    FileCharacteristics, UdfFileEntry, UdfFileIdentifier, UdfFileType, UdfTimestamp,
};

/// The UDF revision implemented (BCD 2.60).
pub const UDF_REVISION: u16 = 0x0260;

/// Tag identifiers for the descriptors this library understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum TagIdent {
    /// Primary Volume Descriptor
    PrimaryVolume = 1,
    /// Anchor Volume Descriptor Pointer
    AnchorPointer = 2,
    /// Implementation Use Volume Descriptor
    ImplementationUse = 4,
    /// Partition Descriptor
    Partition = 5,
    /// Logical Volume Descriptor
    LogicalVolume = 6,
    /// Unallocated Space Descriptor
    UnallocatedSpace = 7,
    /// Terminating Descriptor
    Terminating = 8,
    /// Logical Volume Integrity Descriptor
    LogicalVolumeIntegrity = 9,
    /// File Set Descriptor
    FileSet = 256,
    /// File Identifier Descriptor
    FileIdentifier = 257,
    /// File Entry
    FileEntry = 261,
}

/// Computes the tag header checksum: the sum of tag bytes 0..4 and 5..16
/// modulo 256.
#[must_use]
pub fn tag_checksum(tag: &[u8]) -> u8 {
    tag.iter()
        .take(16)
        .enumerate()
        .filter(|&(index, _)| index != 4)
        .fold(0u8, |sum, (_, &b)| sum.wrapping_add(b))
}

/// Wraps a descriptor body in a tag and pads the result to one sector.
///
/// The descriptor CRC covers exactly `body`; `location` is recorded as the
/// tag location and must be the extent this sector will occupy.
#[must_use]
pub fn tag(ident: TagIdent, serial: u16, location: u32, body: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; SECTOR_SIZE.max(16 + body.len())];
    out[0..2].copy_from_slice(&(ident as u16).to_le_bytes());
    out[2..4].copy_from_slice(&3u16.to_le_bytes()); // descriptor version (NSR03)
    out[6..8].copy_from_slice(&serial.to_le_bytes());
    out[8..10].copy_from_slice(&crc16_ccitt(body).to_le_bytes());
    out[10..12].copy_from_slice(&(body.len() as u16).to_le_bytes());
    out[12..16].copy_from_slice(&location.to_le_bytes());
    out[4] = tag_checksum(&out[..16]);
    out[16..16 + body.len()].copy_from_slice(body);
    out
}

/// A parsed descriptor tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedTag {
    /// Tag identifier
    pub ident: u16,
    /// Tag serial number
    pub serial: u16,
    /// Recorded tag location
    pub location: u32,
    /// Length of the CRC-covered body
    pub crc_length: usize,
}

/// Parses and verifies the tag at the start of `buf`, read from
/// `extent`.
///
/// The tag checksum and descriptor CRC are always enforced. A recorded
/// location that disagrees with `extent` is an error unless
/// `tolerate_location` is set, in which case a warning is logged and the
/// actual extent wins (the known anchor quirk; the location is silently
/// fixed on re-emission).
///
/// # Errors
///
/// Fails with `InvalidIso`-class errors on any verification failure.
pub fn parse_tag(buf: &[u8], extent: u32, tolerate_location: bool) -> Result<ParsedTag> {
    if buf.len() < 16 {
        return Err(Error::UnexpectedEndOfData);
    }
    let ident = u16::from_le_bytes([buf[0], buf[1]]);
    let version = u16::from_le_bytes([buf[2], buf[3]]);
    if version != 2 && version != 3 {
        return Err(Error::InvalidIso("unknown UDF descriptor version"));
    }
    let checksum = tag_checksum(&buf[..16]);
    if checksum != buf[4] {
        return Err(Error::BadChecksum {
            what: "UDF tag",
            expected: u32::from(buf[4]),
            found: u32::from(checksum),
        });
    }
    let crc_length = usize::from(u16::from_le_bytes([buf[10], buf[11]]));
    if 16 + crc_length > buf.len() {
        return Err(Error::InvalidIso("UDF descriptor CRC length out of range"));
    }
    let recorded_crc = u16::from_le_bytes([buf[8], buf[9]]);
    let computed_crc = crc16_ccitt(&buf[16..16 + crc_length]);
    if recorded_crc != computed_crc {
        return Err(Error::BadChecksum {
            what: "UDF descriptor",
            expected: u32::from(recorded_crc),
            found: u32::from(computed_crc),
        });
    }
    let location = u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]);
    if location != extent {
        if !tolerate_location {
            return Err(Error::BadTagLocation {
                expected: extent,
                found: location,
            });
        }
        log::warn!(
            "UDF tag at extent {extent} records location {location}; fixing on next write"
        );
    }
    Ok(ParsedTag {
        ident,
        serial: u16::from_le_bytes([buf[6], buf[7]]),
        location: extent,
        crc_length,
    })
}

/// An ECMA-167 entity identifier (regid).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Regid {
    /// Flags byte
    pub flags: u8,
    /// Identifier (23 bytes)
    pub id: [u8; 23],
    /// Identifier suffix (8 bytes)
    pub suffix: [u8; 8],
}

impl Regid {
    /// The implementation identifier this library stamps.
    pub const IMPLEMENTATION: &'static [u8] = b"*iso9660";

    /// Creates a regid with the given identifier and suffix bytes.
    #[must_use]
    pub fn new(id: &[u8], suffix: [u8; 8]) -> Self {
        let mut id_field = [0u8; 23];
        let len = id.len().min(23);
        id_field[..len].copy_from_slice(&id[..len]);
        Self {
            flags: 0,
            id: id_field,
            suffix,
        }
    }

    /// The OSTA domain identifier with the UDF revision suffix.
    #[must_use]
    pub fn osta_domain() -> Self {
        let mut suffix = [0u8; 8];
        suffix[..2].copy_from_slice(&UDF_REVISION.to_le_bytes());
        Self::new(b"*OSTA UDF Compliant", suffix)
    }

    /// A UDF entity identifier (carries the revision and OS class).
    #[must_use]
    pub fn udf_entity(id: &[u8]) -> Self {
        let mut suffix = [0u8; 8];
        suffix[..2].copy_from_slice(&UDF_REVISION.to_le_bytes());
        Self::new(id, suffix)
    }

    /// This library's implementation regid.
    #[must_use]
    pub fn implementation() -> Self {
        Self::new(Self::IMPLEMENTATION, [0; 8])
    }

    /// Serializes the 32-byte regid.
    #[must_use]
    pub fn record(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out[0] = self.flags;
        out[1..24].copy_from_slice(&self.id);
        out[24..32].copy_from_slice(&self.suffix);
        out
    }

    /// Parses a 32-byte regid.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::UnexpectedEndOfData`] on short input.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 32 {
            return Err(Error::UnexpectedEndOfData);
        }
        let mut id = [0u8; 23];
        id.copy_from_slice(&buf[1..24]);
        let mut suffix = [0u8; 8];
        suffix.copy_from_slice(&buf[24..32]);
        Ok(Self {
            flags: buf[0],
            id,
            suffix,
        })
    }
}

/// Serializes the 64-byte OSTA Compressed Unicode charspec.
#[must_use]
pub fn charspec() -> [u8; 64] {
    let mut out = [0u8; 64];
    out[1..24].copy_from_slice(b"OSTA Compressed Unicode");
    out
}

/// A short extent descriptor (length, location).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExtentAd {
    /// Extent length in bytes
    pub len: u32,
    /// Extent location (absolute logical block)
    pub loc: u32,
}

impl ExtentAd {
    /// Serializes the 8-byte extent descriptor.
    #[must_use]
    pub fn record(&self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[..4].copy_from_slice(&self.len.to_le_bytes());
        out[4..].copy_from_slice(&self.loc.to_le_bytes());
        out
    }

    /// Parses an 8-byte extent descriptor.
    #[must_use]
    pub fn parse(buf: &[u8]) -> Self {
        Self {
            len: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            loc: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }
    }
}

/// A long allocation descriptor (length, partition-relative block,
/// partition reference).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LongAd {
    /// Extent length in bytes
    pub len: u32,
    /// Logical block number within the partition
    pub block: u32,
    /// Partition reference number
    pub part_ref: u16,
}

impl LongAd {
    /// Serializes the 16-byte long allocation descriptor.
    #[must_use]
    pub fn record(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[..4].copy_from_slice(&self.len.to_le_bytes());
        out[4..8].copy_from_slice(&self.block.to_le_bytes());
        out[8..10].copy_from_slice(&self.part_ref.to_le_bytes());
        out
    }

    /// Parses a 16-byte long allocation descriptor.
    #[must_use]
    pub fn parse(buf: &[u8]) -> Self {
        Self {
            len: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            block: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            part_ref: u16::from_le_bytes([buf[8], buf[9]]),
        }
    }
}

/// Serializes one sector of the volume recognition sequence (BEA01,
/// NSR03 or TEA01).
#[must_use]
pub fn recognition_sector(ident: &[u8; 5]) -> Vec<u8> {
    let mut out = vec![0u8; SECTOR_SIZE];
    out[0] = 0; // structure type
    out[1..6].copy_from_slice(ident);
    out[6] = 1; // structure version
    out
}

/// Checks a recognition sector's identifier.
#[must_use]
pub fn recognition_ident(buf: &[u8]) -> Option<[u8; 5]> {
    if buf.len() < 7 {
        return None;
    }
    let mut ident = [0u8; 5];
    ident.copy_from_slice(&buf[1..6]);
    matches!(&ident, b"BEA01" | b"NSR02" | b"NSR03" | b"TEA01" | b"BOOT2").then_some(ident)
}

/// The UDF Primary Volume Descriptor.
#[derive(Debug, Clone)]
pub struct UdfPrimaryVolumeDescriptor {
    /// Volume descriptor sequence number
    pub seqnum: u32,
    /// Volume identifier
    pub volume_ident: String,
    /// Volume set identifier
    pub volume_set_ident: String,
    /// Recording date and time
    pub recording_date: UdfTimestamp,
}

impl UdfPrimaryVolumeDescriptor {
    /// Parses the descriptor body from a full sector.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidIso`-class errors on malformed dstrings.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        Ok(Self {
            seqnum: u32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]),
            volume_ident: osta::read_dstring(&buf[24..56])?,
            volume_set_ident: osta::read_dstring(&buf[72..200])?,
            recording_date: UdfTimestamp::parse(&buf[392..404])?,
        })
    }

    /// Serializes this descriptor into one tagged sector at `location`.
    ///
    /// # Errors
    ///
    /// Fails when an identifier does not fit its dstring field.
    pub fn record(&self, location: u32) -> Result<Vec<u8>> {
        let mut body = vec![0u8; 496];
        body[0..4].copy_from_slice(&self.seqnum.to_le_bytes());
        body[4..8].copy_from_slice(&1u32.to_le_bytes()); // primary vd number
        osta::write_dstring(&mut body[8..40], &self.volume_ident)?;
        body[40..42].copy_from_slice(&1u16.to_le_bytes()); // volume seqnum
        body[42..44].copy_from_slice(&1u16.to_le_bytes()); // max volume seqnum
        body[44..46].copy_from_slice(&2u16.to_le_bytes()); // interchange level
        body[46..48].copy_from_slice(&2u16.to_le_bytes()); // max interchange level
        body[48..52].copy_from_slice(&1u32.to_le_bytes()); // charset list
        body[52..56].copy_from_slice(&1u32.to_le_bytes()); // max charset list
        osta::write_dstring(&mut body[56..184], &self.volume_set_ident)?;
        body[184..248].copy_from_slice(&charspec()); // descriptor charset
        body[248..312].copy_from_slice(&charspec()); // explanatory charset
        // Volume abstract and copyright notice extents stay zero.
        body[344..376].copy_from_slice(&Regid::implementation().record()); // application id
        body[376..388].copy_from_slice(&self.recording_date.record());
        body[388..420].copy_from_slice(&Regid::implementation().record()); // impl id
        // Implementation use, predecessor location and flags stay zero.
        Ok(tag(TagIdent::PrimaryVolume, 0, location, &body))
    }
}

/// The Implementation Use Volume Descriptor (UDF LV Info).
#[derive(Debug, Clone)]
pub struct UdfImplementationUseVolumeDescriptor {
    /// Volume descriptor sequence number
    pub seqnum: u32,
    /// Logical volume identifier
    pub logical_volume_ident: String,
}

impl UdfImplementationUseVolumeDescriptor {
    /// Parses the descriptor body from a full sector.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidIso`-class errors on malformed dstrings.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        Ok(Self {
            seqnum: u32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]),
            logical_volume_ident: osta::read_dstring(&buf[116..244])?,
        })
    }

    /// Serializes this descriptor into one tagged sector at `location`.
    ///
    /// # Errors
    ///
    /// Fails when an identifier does not fit its dstring field.
    pub fn record(&self, location: u32) -> Result<Vec<u8>> {
        let mut body = vec![0u8; 496];
        body[0..4].copy_from_slice(&self.seqnum.to_le_bytes());
        body[4..36].copy_from_slice(&Regid::udf_entity(b"*UDF LV Info").record());
        // Implementation use: LV Info.
        body[36..100].copy_from_slice(&charspec());
        osta::write_dstring(&mut body[100..228], &self.logical_volume_ident)?;
        // LVInfo1-3 stay empty.
        body[336..368].copy_from_slice(&Regid::implementation().record());
        Ok(tag(TagIdent::ImplementationUse, 0, location, &body))
    }
}

/// The UDF Partition Descriptor.
#[derive(Debug, Clone)]
pub struct UdfPartitionDescriptor {
    /// Volume descriptor sequence number
    pub seqnum: u32,
    /// Partition number (0)
    pub partition_number: u16,
    /// First logical block of the partition
    pub start: u32,
    /// Partition length in logical blocks
    pub length: u32,
}

impl UdfPartitionDescriptor {
    /// Parses the descriptor body from a full sector.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::UnexpectedEndOfData`] on short input.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 196 {
            return Err(Error::UnexpectedEndOfData);
        }
        Ok(Self {
            seqnum: u32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]),
            partition_number: u16::from_le_bytes([buf[22], buf[23]]),
            start: u32::from_le_bytes([buf[188], buf[189], buf[190], buf[191]]),
            length: u32::from_le_bytes([buf[192], buf[193], buf[194], buf[195]]),
        })
    }

    /// Serializes this descriptor into one tagged sector at `location`.
    #[must_use]
    pub fn record(&self, location: u32) -> Vec<u8> {
        let mut body = vec![0u8; 496];
        body[0..4].copy_from_slice(&self.seqnum.to_le_bytes());
        body[4..6].copy_from_slice(&1u16.to_le_bytes()); // flags: allocated
        body[6..8].copy_from_slice(&self.partition_number.to_le_bytes());
        body[8..40].copy_from_slice(&Regid::new(b"+NSR03", [0; 8]).record());
        // Partition contents use stays zero.
        body[168..172].copy_from_slice(&1u32.to_le_bytes()); // access type: read only
        body[172..176].copy_from_slice(&self.start.to_le_bytes());
        body[176..180].copy_from_slice(&self.length.to_le_bytes());
        body[180..212].copy_from_slice(&Regid::implementation().record());
        tag(TagIdent::Partition, 0, location, &body)
    }
}

/// The UDF Logical Volume Descriptor.
#[derive(Debug, Clone)]
pub struct UdfLogicalVolumeDescriptor {
    /// Volume descriptor sequence number
    pub seqnum: u32,
    /// Logical volume identifier
    pub logical_volume_ident: String,
    /// Location of the File Set Descriptor (long_ad)
    pub fsd_location: LongAd,
    /// Integrity sequence extent
    pub integrity_extent: ExtentAd,
}

impl UdfLogicalVolumeDescriptor {
    /// Parses the descriptor body from a full sector.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidIso`-class errors on malformed dstrings.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let block_size = u32::from_le_bytes([buf[212], buf[213], buf[214], buf[215]]);
        if block_size != SECTOR_SIZE as u32 {
            return Err(Error::InvalidIso("UDF logical block size is not 2048"));
        }
        Ok(Self {
            seqnum: u32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]),
            logical_volume_ident: osta::read_dstring(&buf[84..212])?,
            fsd_location: LongAd::parse(&buf[248..264]),
            integrity_extent: ExtentAd::parse(&buf[432..440]),
        })
    }

    /// Serializes this descriptor into one tagged sector at `location`.
    ///
    /// # Errors
    ///
    /// Fails when an identifier does not fit its dstring field.
    pub fn record(&self, location: u32) -> Result<Vec<u8>> {
        // Body includes one type-1 partition map (6 bytes) past the fixed
        // 424-byte prefix.
        let mut body = vec![0u8; 446];
        body[0..4].copy_from_slice(&self.seqnum.to_le_bytes());
        body[4..68].copy_from_slice(&charspec());
        osta::write_dstring(&mut body[68..196], &self.logical_volume_ident)?;
        body[196..200].copy_from_slice(&(SECTOR_SIZE as u32).to_le_bytes());
        body[200..232].copy_from_slice(&Regid::osta_domain().record());
        body[232..248].copy_from_slice(&self.fsd_location.record());
        body[248..252].copy_from_slice(&6u32.to_le_bytes()); // map table length
        body[252..256].copy_from_slice(&1u32.to_le_bytes()); // one partition map
        body[256..288].copy_from_slice(&Regid::implementation().record());
        body[416..424].copy_from_slice(&self.integrity_extent.record());
        // Type 1 partition map.
        body[424] = 1; // map type
        body[425] = 6; // map length
        body[426..428].copy_from_slice(&1u16.to_le_bytes()); // volume seqnum
        body[428..430].copy_from_slice(&0u16.to_le_bytes()); // partition number
        Ok(tag(TagIdent::LogicalVolume, 0, location, &body))
    }
}

/// The Unallocated Space Descriptor (empty free-space list).
#[derive(Debug, Clone, Default)]
pub struct UdfUnallocatedSpaceDescriptor {
    /// Volume descriptor sequence number
    pub seqnum: u32,
}

impl UdfUnallocatedSpaceDescriptor {
    /// Parses the descriptor body from a full sector.
    #[must_use]
    pub fn parse(buf: &[u8]) -> Self {
        Self {
            seqnum: u32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]),
        }
    }

    /// Serializes this descriptor into one tagged sector at `location`.
    #[must_use]
    pub fn record(&self, location: u32) -> Vec<u8> {
        let mut body = vec![0u8; 8];
        body[0..4].copy_from_slice(&self.seqnum.to_le_bytes());
        // Zero allocation descriptors follow.
        tag(TagIdent::UnallocatedSpace, 0, location, &body)
    }
}

/// Serializes a Terminating Descriptor at `location`.
#[must_use]
pub fn terminating_descriptor(location: u32) -> Vec<u8> {
    tag(TagIdent::Terminating, 0, location, &[0u8; 496])
}

/// Serializes an Anchor Volume Descriptor Pointer at `location`.
#[must_use]
pub fn anchor_record(location: u32, main: ExtentAd, reserve: ExtentAd) -> Vec<u8> {
    let mut body = vec![0u8; 496];
    body[0..8].copy_from_slice(&main.record());
    body[8..16].copy_from_slice(&reserve.record());
    tag(TagIdent::AnchorPointer, 0, location, &body)
}

/// Parses an anchor's main and reserve extents.
#[must_use]
pub fn parse_anchor(buf: &[u8]) -> (ExtentAd, ExtentAd) {
    (ExtentAd::parse(&buf[16..24]), ExtentAd::parse(&buf[24..32]))
}

/// The Logical Volume Integrity Descriptor.
#[derive(Debug, Clone)]
pub struct UdfLogicalVolumeIntegrityDescriptor {
    /// Recording date and time
    pub recording_date: UdfTimestamp,
    /// Next unique id to hand out
    pub unique_id: u64,
    /// Partition size in logical blocks
    pub size_table: u32,
    /// Number of files on the volume
    pub num_files: u32,
    /// Number of directories on the volume
    pub num_dirs: u32,
}

impl UdfLogicalVolumeIntegrityDescriptor {
    /// Parses the descriptor body from a full sector.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::UnexpectedEndOfData`] on short input.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 158 {
            return Err(Error::UnexpectedEndOfData);
        }
        Ok(Self {
            recording_date: UdfTimestamp::parse(&buf[16..28])?,
            unique_id: u64::from_le_bytes(buf[48..56].try_into().expect("length checked")),
            size_table: u32::from_le_bytes([buf[92], buf[93], buf[94], buf[95]]),
            num_files: u32::from_le_bytes([buf[128], buf[129], buf[130], buf[131]]),
            num_dirs: u32::from_le_bytes([buf[132], buf[133], buf[134], buf[135]]),
        })
    }

    /// Serializes this descriptor into one tagged sector at `location`.
    #[must_use]
    pub fn record(&self, location: u32) -> Vec<u8> {
        let mut body = vec![0u8; 126];
        body[0..12].copy_from_slice(&self.recording_date.record());
        body[12..16].copy_from_slice(&1u32.to_le_bytes()); // integrity type: close
        // Next integrity extent stays zero.
        body[32..40].copy_from_slice(&self.unique_id.to_le_bytes());
        body[64..68].copy_from_slice(&1u32.to_le_bytes()); // one partition
        body[68..72].copy_from_slice(&46u32.to_le_bytes()); // impl use length
        body[72..76].copy_from_slice(&0u32.to_le_bytes()); // free space
        body[76..80].copy_from_slice(&self.size_table.to_le_bytes());
        // Implementation use.
        body[80..112].copy_from_slice(&Regid::implementation().record());
        body[112..116].copy_from_slice(&self.num_files.to_le_bytes());
        body[116..120].copy_from_slice(&self.num_dirs.to_le_bytes());
        body[120..122].copy_from_slice(&UDF_REVISION.to_le_bytes()); // min read
        body[122..124].copy_from_slice(&UDF_REVISION.to_le_bytes()); // min write
        body[124..126].copy_from_slice(&UDF_REVISION.to_le_bytes()); // max write
        tag(TagIdent::LogicalVolumeIntegrity, 0, location, &body)
    }
}

/// The File Set Descriptor.
#[derive(Debug, Clone)]
pub struct UdfFileSetDescriptor {
    /// Recording date and time
    pub recording_date: UdfTimestamp,
    /// Logical volume identifier
    pub logical_volume_ident: String,
    /// File set identifier
    pub file_set_ident: String,
    /// Root directory ICB (long_ad)
    pub root_icb: LongAd,
}

impl UdfFileSetDescriptor {
    /// Parses the descriptor body from a full sector.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidIso`-class errors on malformed dstrings.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        Ok(Self {
            recording_date: UdfTimestamp::parse(&buf[16..28])?,
            logical_volume_ident: osta::read_dstring(&buf[112..240])?,
            file_set_ident: osta::read_dstring(&buf[304..336])?,
            root_icb: LongAd::parse(&buf[400..416]),
        })
    }

    /// Serializes this descriptor into one tagged sector at `location`
    /// (partition-relative tag location).
    ///
    /// # Errors
    ///
    /// Fails when an identifier does not fit its dstring field.
    pub fn record(&self, location: u32) -> Result<Vec<u8>> {
        let mut body = vec![0u8; 496];
        body[0..12].copy_from_slice(&self.recording_date.record());
        body[12..14].copy_from_slice(&3u16.to_le_bytes()); // interchange level
        body[14..16].copy_from_slice(&3u16.to_le_bytes()); // max interchange level
        body[16..20].copy_from_slice(&1u32.to_le_bytes()); // charset list
        body[20..24].copy_from_slice(&1u32.to_le_bytes()); // max charset list
        // File set number and descriptor number stay zero.
        body[32..96].copy_from_slice(&charspec());
        osta::write_dstring(&mut body[96..224], &self.logical_volume_ident)?;
        body[224..288].copy_from_slice(&charspec());
        osta::write_dstring(&mut body[288..320], &self.file_set_ident)?;
        // Copyright and abstract identifiers stay empty.
        body[384..400].copy_from_slice(&self.root_icb.record());
        body[400..432].copy_from_slice(&Regid::osta_domain().record());
        Ok(tag(TagIdent::FileSet, 0, location, &body))
    }
}

/// One of the two (main, reserve) volume descriptor sequences.
#[derive(Debug, Clone)]
pub struct UdfDescriptorSet {
    /// The UDF primary volume descriptor
    pub pvd: UdfPrimaryVolumeDescriptor,
    /// The implementation use volume descriptor
    pub impl_use: UdfImplementationUseVolumeDescriptor,
    /// The partition descriptor
    pub partition: UdfPartitionDescriptor,
    /// The logical volume descriptor
    pub logical_volume: UdfLogicalVolumeDescriptor,
    /// The unallocated space descriptor
    pub unallocated: UdfUnallocatedSpaceDescriptor,
}

impl UdfDescriptorSet {
    /// Creates the descriptor set for a new image.
    #[must_use]
    pub fn new(volume_ident: &str, volume_set_ident: &str, now: UdfTimestamp) -> Self {
        Self {
            pvd: UdfPrimaryVolumeDescriptor {
                seqnum: 0,
                volume_ident: volume_ident.into(),
                volume_set_ident: volume_set_ident.into(),
                recording_date: now,
            },
            impl_use: UdfImplementationUseVolumeDescriptor {
                seqnum: 1,
                logical_volume_ident: volume_ident.into(),
            },
            partition: UdfPartitionDescriptor {
                seqnum: 2,
                partition_number: 0,
                start: 0,
                length: 0,
            },
            logical_volume: UdfLogicalVolumeDescriptor {
                seqnum: 3,
                logical_volume_ident: volume_ident.into(),
                fsd_location: LongAd {
                    len: SECTOR_SIZE as u32,
                    block: 0,
                    part_ref: 0,
                },
                integrity_extent: ExtentAd { len: SECTOR_SIZE as u32, loc: 64 },
            },
            unallocated: UdfUnallocatedSpaceDescriptor { seqnum: 4 },
        }
    }

    /// Serializes the six-sector descriptor sequence starting at
    /// `start_extent` (five descriptors plus the terminator).
    ///
    /// # Errors
    ///
    /// Fails when an identifier does not fit its dstring field.
    pub fn record_sequence(&self, start_extent: u32) -> Result<Vec<Vec<u8>>> {
        Ok(vec![
            self.pvd.record(start_extent)?,
            self.impl_use.record(start_extent + 1)?,
            self.partition.record(start_extent + 2),
            self.logical_volume.record(start_extent + 3)?,
            self.unallocated.record(start_extent + 4),
            terminating_descriptor(start_extent + 5),
        ])
    }
}
