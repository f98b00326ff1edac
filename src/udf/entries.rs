// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! UDF File Entries, File Identifier Descriptors, and the UDF tree.
//!
//! Each directory is a File Entry whose data area holds a sequence of File
//! Identifier Descriptors (the parent FID first); each regular file is a
//! File Entry whose short allocation descriptors point at the payload. A
//! symlink is a File Entry of type 12 whose payload encodes a typed
//! component path.
//!
//! An all-zero sector where a File Entry should be is tolerated on parse:
//! the node is kept but flagged unreadable, and reads through the façade
//! fail with an input error rather than a parse error.

use bitflags::bitflags;

use crate::error::{Error, Result};
use crate::udf::{LongAd, Regid, TagIdent, osta, parse_tag, tag};

/// Maximum bytes one short allocation descriptor can cover.
pub const MAX_SHORT_AD_LEN: u32 = 0x3FFF_F800;

/// A 12-byte UDF timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdfTimestamp {
    /// Full year
    pub year: u16,
    /// Month (1-12)
    pub month: u8,
    /// Day (1-31)
    pub day: u8,
    /// Hour (0-23)
    pub hour: u8,
    /// Minute (0-59)
    pub minute: u8,
    /// Second (0-59)
    pub second: u8,
    /// Hundredths of a second
    pub centiseconds: u8,
    /// Hundreds of microseconds
    pub hundreds_microseconds: u8,
    /// Microseconds
    pub microseconds: u8,
    /// Timezone offset in minutes from UTC
    pub tz_offset_minutes: i16,
}

impl UdfTimestamp {
    /// Encoded size in bytes.
    pub const LEN: usize = 12;

    /// Builds a timestamp from the library's injected clock value.
    #[must_use]
    pub fn from_time(time: &crate::types::IsoTime) -> Self {
        Self {
            year: time.year,
            month: time.month,
            day: time.day,
            hour: time.hour,
            minute: time.minute,
            second: time.second,
            centiseconds: time.centiseconds,
            hundreds_microseconds: 0,
            microseconds: 0,
            tz_offset_minutes: i16::from(time.gmt_offset) * 15,
        }
    }

    /// Parses the 12-byte timestamp.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::UnexpectedEndOfData`] on short input.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::LEN {
            return Err(Error::UnexpectedEndOfData);
        }
        let type_tz = u16::from_le_bytes([buf[0], buf[1]]);
        // Sign-extend the 12-bit timezone field.
        let raw_tz = type_tz & 0x0FFF;
        let tz_offset_minutes = if raw_tz == 0x07FF || raw_tz == 0x0800 {
            0 // "no timezone" sentinel
        } else if raw_tz & 0x0800 != 0 {
            (raw_tz | 0xF000) as i16
        } else {
            raw_tz as i16
        };
        Ok(Self {
            year: u16::from_le_bytes([buf[2], buf[3]]),
            month: buf[4],
            day: buf[5],
            hour: buf[6],
            minute: buf[7],
            second: buf[8],
            centiseconds: buf[9],
            hundreds_microseconds: buf[10],
            microseconds: buf[11],
            tz_offset_minutes,
        })
    }

    /// Serializes the 12-byte timestamp (type 1, local time).
    #[must_use]
    pub fn record(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        let tz = (self.tz_offset_minutes as u16) & 0x0FFF;
        let type_tz = (1u16 << 12) | tz;
        out[0..2].copy_from_slice(&type_tz.to_le_bytes());
        out[2..4].copy_from_slice(&self.year.to_le_bytes());
        out[4] = self.month;
        out[5] = self.day;
        out[6] = self.hour;
        out[7] = self.minute;
        out[8] = self.second;
        out[9] = self.centiseconds;
        out[10] = self.hundreds_microseconds;
        out[11] = self.microseconds;
        out
    }

    /// The all-zero timestamp used before a clock value is available.
    #[must_use]
    pub const fn unspecified() -> Self {
        Self {
            year: 1900,
            month: 0,
            day: 0,
            hour: 0,
            minute: 0,
            second: 0,
            centiseconds: 0,
            hundreds_microseconds: 0,
            microseconds: 0,
            tz_offset_minutes: 0,
        }
    }
}

/// UDF file types recorded in the ICB tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UdfFileType {
    /// A directory
    Directory = 4,
    /// A regular file
    File = 5,
    /// A symbolic link
    Symlink = 12,
}

impl UdfFileType {
    /// Decodes the ICB file type byte.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidIso`] on unsupported types.
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            4 => Ok(Self::Directory),
            5 => Ok(Self::File),
            12 => Ok(Self::Symlink),
            _ => Err(Error::InvalidIso("unsupported UDF file type")),
        }
    }
}

bitflags! {
    /// File characteristics of a File Identifier Descriptor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FileCharacteristics: u8 {
        /// Existence bit: the file need not be shown to the user
        const HIDDEN = 0x01;
        /// The FID names a directory
        const DIRECTORY = 0x02;
        /// The FID is deleted
        const DELETED = 0x04;
        /// The FID names the parent directory
        const PARENT = 0x08;
    }
}

/// A short allocation descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShortAd {
    /// Extent length in bytes (type bits excluded)
    pub len: u32,
    /// Partition-relative logical block
    pub block: u32,
}

impl ShortAd {
    /// Serializes the 8-byte short allocation descriptor.
    #[must_use]
    pub fn record(&self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[..4].copy_from_slice(&(self.len & 0x3FFF_FFFF).to_le_bytes());
        out[4..].copy_from_slice(&self.block.to_le_bytes());
        out
    }

    /// Parses an 8-byte short allocation descriptor.
    #[must_use]
    pub fn parse(buf: &[u8]) -> Self {
        Self {
            len: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) & 0x3FFF_FFFF,
            block: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }
    }
}

/// Splits a payload length into short allocation descriptor runs.
#[must_use]
pub fn split_into_short_ads(length: u64, start_block: u32) -> Vec<ShortAd> {
    if length == 0 {
        return Vec::new();
    }
    let mut out = Vec::new();
    let mut left = length;
    let mut block = start_block;
    while left > 0 {
        let run = left.min(u64::from(MAX_SHORT_AD_LEN));
        out.push(ShortAd {
            len: run as u32,
            block,
        });
        left -= run;
        block += crate::types::sectors_for_size(run);
    }
    out
}

/// A UDF File Entry in parsed form.
#[derive(Debug, Clone)]
pub struct UdfFileEntry {
    /// ICB file type
    pub file_type: UdfFileType,
    /// Owning user id (0xFFFFFFFF = unset)
    pub uid: u32,
    /// Owning group id (0xFFFFFFFF = unset)
    pub gid: u32,
    /// UDF permission bits
    pub permissions: u32,
    /// Link count
    pub link_count: u16,
    /// Information length in bytes
    pub info_length: u64,
    /// Logical blocks recorded
    pub log_blocks: u64,
    /// Access time
    pub access_time: UdfTimestamp,
    /// Modification time
    pub modification_time: UdfTimestamp,
    /// Attribute time
    pub attribute_time: UdfTimestamp,
    /// Unique id (0 for the root directory)
    pub unique_id: u64,
    /// Allocation descriptors
    pub alloc_descs: Vec<ShortAd>,
}

impl UdfFileEntry {
    /// Default permissions for files (owner/group/other read).
    pub const FILE_PERMS: u32 = 0x14A5;
    /// Default permissions for directories (read + execute).
    pub const DIR_PERMS: u32 = 0x14ED;

    /// Creates a File Entry with default attributes.
    #[must_use]
    pub fn new(file_type: UdfFileType, unique_id: u64, now: UdfTimestamp) -> Self {
        let permissions = match file_type {
            UdfFileType::Directory => Self::DIR_PERMS,
            _ => Self::FILE_PERMS,
        };
        Self {
            file_type,
            uid: u32::MAX,
            gid: u32::MAX,
            permissions,
            link_count: 1,
            info_length: 0,
            log_blocks: 0,
            access_time: now,
            modification_time: now,
            attribute_time: now,
            unique_id,
            alloc_descs: Vec::new(),
        }
    }

    /// Parses a File Entry sector read from `extent`.
    ///
    /// Returns `None` for the tolerated all-zero File Entry.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidIso`-class errors on malformed entries.
    pub fn parse(buf: &[u8], extent: u32) -> Result<Option<Self>> {
        if buf.iter().all(|&b| b == 0) {
            return Ok(None);
        }
        let parsed = parse_tag(buf, extent, false)?;
        if parsed.ident != TagIdent::FileEntry as u16 {
            return Err(Error::InvalidIso("expected a UDF file entry tag"));
        }
        let file_type = UdfFileType::from_u8(buf[27])?;
        let alloc_len =
            usize::try_from(u32::from_le_bytes([buf[172], buf[173], buf[174], buf[175]]))
                .expect("u32 fits usize");
        if 176 + alloc_len > buf.len() {
            return Err(Error::InvalidIso("allocation descriptors overrun file entry"));
        }
        let alloc_descs = buf[176..176 + alloc_len]
            .chunks_exact(8)
            .map(ShortAd::parse)
            .filter(|ad| ad.len > 0)
            .collect();
        Ok(Some(Self {
            file_type,
            uid: u32::from_le_bytes([buf[36], buf[37], buf[38], buf[39]]),
            gid: u32::from_le_bytes([buf[40], buf[41], buf[42], buf[43]]),
            permissions: u32::from_le_bytes([buf[44], buf[45], buf[46], buf[47]]),
            link_count: u16::from_le_bytes([buf[48], buf[49]]),
            info_length: u64::from_le_bytes(buf[56..64].try_into().expect("fixed slice")),
            log_blocks: u64::from_le_bytes(buf[64..72].try_into().expect("fixed slice")),
            access_time: UdfTimestamp::parse(&buf[72..84])?,
            modification_time: UdfTimestamp::parse(&buf[84..96])?,
            attribute_time: UdfTimestamp::parse(&buf[96..108])?,
            unique_id: u64::from_le_bytes(buf[160..168].try_into().expect("fixed slice")),
            alloc_descs,
        }))
    }

    /// Serializes this File Entry into one tagged sector at `location`.
    #[must_use]
    pub fn record(&self, location: u32) -> Vec<u8> {
        let alloc_len = self.alloc_descs.len() * 8;
        let mut body = vec![0u8; 160 + alloc_len];
        // ICB tag.
        body[4..6].copy_from_slice(&4u16.to_le_bytes()); // strategy 4
        body[8..10].copy_from_slice(&1u16.to_le_bytes()); // max entries
        body[11] = self.file_type as u8;
        // Flags: short allocation descriptors (0), archive bit set.
        body[18..20].copy_from_slice(&0x0020u16.to_le_bytes());
        body[20..24].copy_from_slice(&self.uid.to_le_bytes());
        body[24..28].copy_from_slice(&self.gid.to_le_bytes());
        body[28..32].copy_from_slice(&self.permissions.to_le_bytes());
        body[32..34].copy_from_slice(&self.link_count.to_le_bytes());
        body[40..48].copy_from_slice(&self.info_length.to_le_bytes());
        body[48..56].copy_from_slice(&self.log_blocks.to_le_bytes());
        body[56..68].copy_from_slice(&self.access_time.record());
        body[68..80].copy_from_slice(&self.modification_time.record());
        body[80..92].copy_from_slice(&self.attribute_time.record());
        body[92..96].copy_from_slice(&1u32.to_le_bytes()); // checkpoint
        body[112..144].copy_from_slice(&Regid::implementation().record());
        body[144..152].copy_from_slice(&self.unique_id.to_le_bytes());
        body[156..160].copy_from_slice(&(alloc_len as u32).to_le_bytes());
        for (index, ad) in self.alloc_descs.iter().enumerate() {
            body[160 + index * 8..168 + index * 8].copy_from_slice(&ad.record());
        }
        tag(TagIdent::FileEntry, 0, location, &body)
    }
}

/// A File Identifier Descriptor in parsed form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdfFileIdentifier {
    /// File characteristics
    pub characteristics: FileCharacteristics,
    /// Decoded file identifier (empty for the parent FID)
    pub name: String,
    /// ICB of the named File Entry
    pub icb: LongAd,
}

impl UdfFileIdentifier {
    /// Creates a parent FID pointing at `icb`.
    #[must_use]
    pub fn parent(icb: LongAd) -> Self {
        Self {
            characteristics: FileCharacteristics::DIRECTORY | FileCharacteristics::PARENT,
            name: String::new(),
            icb,
        }
    }

    /// Creates a FID naming a child.
    #[must_use]
    pub fn child(name: &str, is_dir: bool, icb: LongAd) -> Self {
        let mut characteristics = FileCharacteristics::empty();
        if is_dir {
            characteristics |= FileCharacteristics::DIRECTORY;
        }
        Self {
            characteristics,
            name: name.into(),
            icb,
        }
    }

    /// Encoded length of a FID with `name`, including tag and padding.
    ///
    /// # Errors
    ///
    /// Propagates name encoding failures.
    pub fn encoded_len(name: &str) -> Result<usize> {
        let l_fi = if name.is_empty() {
            0
        } else {
            osta::encode(name)?.len()
        };
        Ok((38 + l_fi).div_ceil(4) * 4)
    }

    /// Length this FID occupies on disc.
    #[must_use]
    pub fn len(&self) -> usize {
        Self::encoded_len(&self.name).expect("name was validated on insertion")
    }

    /// Parses one FID at the start of `buf`, read from `extent`.
    ///
    /// Returns the FID and its encoded length.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidIso`-class errors on malformed descriptors.
    pub fn parse(buf: &[u8], extent: u32) -> Result<(Self, usize)> {
        let parsed = parse_tag(buf, extent, false)?;
        if parsed.ident != TagIdent::FileIdentifier as u16 {
            return Err(Error::InvalidIso("expected a UDF file identifier tag"));
        }
        let l_fi = usize::from(buf[19]);
        let l_iu = usize::from(u16::from_le_bytes([buf[36], buf[37]]));
        let total = (38 + l_fi + l_iu).div_ceil(4) * 4;
        if total > buf.len() {
            return Err(Error::UnexpectedEndOfData);
        }
        let name_start = 38 + l_iu;
        let name = if l_fi == 0 {
            String::new()
        } else {
            osta::decode(&buf[name_start..name_start + l_fi])?
        };
        Ok((
            Self {
                characteristics: FileCharacteristics::from_bits_truncate(buf[18]),
                name,
                icb: LongAd::parse(&buf[20..36]),
            },
            total,
        ))
    }

    /// Serializes this FID for a directory data area at `location`.
    ///
    /// # Errors
    ///
    /// Propagates name encoding failures.
    pub fn record(&self, location: u32) -> Result<Vec<u8>> {
        let encoded_name = if self.name.is_empty() {
            Vec::new()
        } else {
            osta::encode(&self.name)?
        };
        let total = (38 + encoded_name.len()).div_ceil(4) * 4;
        let mut body = vec![0u8; total - 16];
        body[0..2].copy_from_slice(&1u16.to_le_bytes()); // file version number
        body[2] = self.characteristics.bits();
        body[3] = encoded_name.len() as u8;
        body[4..20].copy_from_slice(&self.icb.record());
        // L_IU = 0; identifier follows directly.
        body[22..22 + encoded_name.len()].copy_from_slice(&encoded_name);
        Ok(tag_unpadded(TagIdent::FileIdentifier, location, &body))
    }
}

/// Like [`tag`] but without sector padding, for descriptors embedded in a
/// directory data area.
fn tag_unpadded(ident: TagIdent, location: u32, body: &[u8]) -> Vec<u8> {
    let mut out = tag(ident, 0, location, body);
    out.truncate(16 + body.len());
    out
}

/// One typed component of a UDF symlink path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UdfPathComponent {
    /// The filesystem root
    Root,
    /// The parent directory
    Parent,
    /// The current directory
    Current,
    /// A named component
    Name(String),
}

/// Encodes a symlink component list into its on-disc payload.
///
/// Each component is `{type, length, identifier}` with types 2 (root),
/// 3 (parent), 4 (current) and 5 (name).
///
/// # Errors
///
/// Propagates name encoding failures.
pub fn encode_symlink(components: &[UdfPathComponent]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for component in components {
        match component {
            UdfPathComponent::Root => out.extend_from_slice(&[2, 0]),
            UdfPathComponent::Parent => out.extend_from_slice(&[3, 0]),
            UdfPathComponent::Current => out.extend_from_slice(&[4, 0]),
            UdfPathComponent::Name(name) => {
                let encoded = osta::encode(name)?;
                out.push(5);
                out.push(encoded.len() as u8);
                out.extend_from_slice(&encoded);
            }
        }
    }
    Ok(out)
}

/// Decodes a symlink payload back into components.
///
/// # Errors
///
/// Fails with [`Error::InvalidIso`] on malformed component records.
pub fn decode_symlink(payload: &[u8]) -> Result<Vec<UdfPathComponent>> {
    let mut out = Vec::new();
    let mut cursor = 0usize;
    while cursor + 2 <= payload.len() {
        let comp_type = payload[cursor];
        let len = usize::from(payload[cursor + 1]);
        cursor += 2;
        if cursor + len > payload.len() {
            return Err(Error::InvalidIso("symlink component overruns payload"));
        }
        out.push(match comp_type {
            2 => UdfPathComponent::Root,
            3 => UdfPathComponent::Parent,
            4 => UdfPathComponent::Current,
            5 => UdfPathComponent::Name(osta::decode(&payload[cursor..cursor + len])?),
            _ => return Err(Error::InvalidIso("unknown symlink component type")),
        });
        cursor += len;
    }
    Ok(out)
}

/// Builds the component list for a POSIX-style target path.
#[must_use]
pub fn symlink_components_for_target(target: &str) -> Vec<UdfPathComponent> {
    let mut components = Vec::new();
    if target.starts_with('/') {
        components.push(UdfPathComponent::Root);
    }
    for part in target.split('/').filter(|part| !part.is_empty()) {
        components.push(match part {
            "." => UdfPathComponent::Current,
            ".." => UdfPathComponent::Parent,
            name => UdfPathComponent::Name(name.into()),
        });
    }
    components
}

/// Renders a component list back into a POSIX-style path.
#[must_use]
pub fn symlink_target_string(components: &[UdfPathComponent]) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut absolute = false;
    for component in components {
        match component {
            UdfPathComponent::Root => absolute = true,
            UdfPathComponent::Parent => parts.push("..".into()),
            UdfPathComponent::Current => parts.push(".".into()),
            UdfPathComponent::Name(name) => parts.push(name.clone()),
        }
    }
    let joined = parts.join("/");
    if absolute { format!("/{joined}") } else { joined }
}

/// One node of the in-memory UDF tree.
#[derive(Debug, Clone)]
pub struct UdfNode {
    /// File name (empty for the root)
    pub name: String,
    /// Parent node; `None` only for the root
    pub parent: Option<usize>,
    /// Children in FID emission order (directories only)
    pub children: Vec<usize>,
    /// File type
    pub kind: UdfFileType,
    /// Inode index for files and symlink payloads
    pub inode: Option<usize>,
    /// Unique id recorded in the File Entry
    pub unique_id: u64,
    /// Absolute extent of the File Entry; set by the planner
    pub fe_extent: u32,
    /// Absolute extent of the FID area (directories); set by the planner
    pub fid_extent: u32,
    /// Byte length of the FID area (directories)
    pub fid_data_len: u32,
    /// Access/modification/attribute times
    pub times: (UdfTimestamp, UdfTimestamp, UdfTimestamp),
    /// Hidden in the FID characteristics
    pub hidden: bool,
    /// A tolerated all-zero File Entry; reads fail
    pub unreadable: bool,
}

/// The arena-backed UDF tree. Node 0 is the root directory.
#[derive(Debug, Clone)]
pub struct UdfTree {
    nodes: Vec<UdfNode>,
    next_unique_id: u64,
}

impl UdfTree {
    /// Creates a tree containing only the root directory.
    #[must_use]
    pub fn new(now: UdfTimestamp) -> Self {
        Self {
            nodes: vec![UdfNode {
                name: String::new(),
                parent: None,
                children: Vec::new(),
                kind: UdfFileType::Directory,
                inode: None,
                unique_id: 0,
                fe_extent: 0,
                fid_extent: 0,
                fid_data_len: 0,
                times: (now, now, now),
                hidden: false,
                unreadable: false,
            }],
            next_unique_id: 16,
        }
    }

    /// The root node id.
    #[must_use]
    pub fn root(&self) -> usize {
        0
    }

    /// Returns a node by id.
    ///
    /// # Panics
    ///
    /// Panics when `id` is out of range; ids are only produced by this
    /// tree.
    #[must_use]
    pub fn node(&self, id: usize) -> &UdfNode {
        &self.nodes[id]
    }

    /// Returns a node mutably.
    ///
    /// # Panics
    ///
    /// Panics when `id` is out of range.
    pub fn node_mut(&mut self, id: usize) -> &mut UdfNode {
        &mut self.nodes[id]
    }

    /// Adds a child node, keeping siblings in name order.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidInput`] when the parent is not a
    /// directory or the name is taken.
    pub fn add(
        &mut self,
        parent: usize,
        name: &str,
        kind: UdfFileType,
        inode: Option<usize>,
        now: UdfTimestamp,
    ) -> Result<usize> {
        if self.nodes[parent].kind != UdfFileType::Directory {
            return Err(Error::InvalidInput("UDF parent is not a directory"));
        }
        if self.find_child(parent, name).is_some() {
            return Err(Error::InvalidInput("a UDF child with this name already exists"));
        }
        // Reject names that cannot be encoded up front.
        let _ = UdfFileIdentifier::encoded_len(name)?;
        let unique_id = self.next_unique_id;
        self.next_unique_id += 1;
        let id = self.nodes.len();
        self.nodes.push(UdfNode {
            name: name.into(),
            parent: Some(parent),
            children: Vec::new(),
            kind,
            inode,
            unique_id,
            fe_extent: 0,
            fid_extent: 0,
            fid_data_len: 0,
            times: (now, now, now),
            hidden: false,
            unreadable: false,
        });
        let position = self.nodes[parent]
            .children
            .iter()
            .position(|&child| self.nodes[child].name.as_str() > name)
            .unwrap_or(self.nodes[parent].children.len());
        self.nodes[parent].children.insert(position, id);
        Ok(id)
    }

    /// Detaches `id` from its parent.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidInput`] for the root and
    /// [`Error::DirectoryNotEmpty`] for non-empty directories.
    pub fn remove(&mut self, id: usize) -> Result<()> {
        let Some(parent) = self.nodes[id].parent else {
            return Err(Error::InvalidInput("cannot remove the UDF root"));
        };
        if self.nodes[id].kind == UdfFileType::Directory && !self.nodes[id].children.is_empty() {
            return Err(Error::DirectoryNotEmpty(self.nodes[id].name.clone()));
        }
        self.nodes[parent].children.retain(|&child| child != id);
        self.nodes[id].parent = None;
        Ok(())
    }

    /// Finds a direct child by name.
    #[must_use]
    pub fn find_child(&self, parent: usize, name: &str) -> Option<usize> {
        self.nodes[parent]
            .children
            .iter()
            .copied()
            .find(|&child| self.nodes[child].name == name)
    }

    /// Resolves an absolute `/`-separated path.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidInput`] for relative paths and
    /// [`Error::NotFound`] for missing components.
    pub fn resolve(&self, path: &str) -> Result<usize> {
        if !path.starts_with('/') {
            return Err(Error::InvalidInput("path must start with '/'"));
        }
        let mut cursor = self.root();
        for part in path.split('/').filter(|part| !part.is_empty()) {
            cursor = self
                .find_child(cursor, part)
                .ok_or_else(|| Error::NotFound(path.into()))?;
        }
        Ok(cursor)
    }

    /// Directories in breadth-first order (root first).
    #[must_use]
    pub fn directories_breadth_first(&self) -> Vec<usize> {
        let mut order = vec![self.root()];
        let mut cursor = 0;
        while cursor < order.len() {
            let dir = order[cursor];
            for &child in &self.nodes[dir].children {
                if self.nodes[child].kind == UdfFileType::Directory {
                    order.push(child);
                }
            }
            cursor += 1;
        }
        order
    }

    /// Counts (files, directories) for the LVID, the root included.
    #[must_use]
    pub fn census(&self) -> (u32, u32) {
        let mut files = 0u32;
        let mut dirs = 0u32;
        for (id, node) in self.nodes.iter().enumerate() {
            if id != 0 && node.parent.is_none() {
                continue; // tombstone
            }
            match node.kind {
                UdfFileType::Directory => dirs += 1,
                UdfFileType::File | UdfFileType::Symlink => files += 1,
            }
        }
        (files, dirs)
    }

    /// The unique id the LVID should advertise next.
    #[must_use]
    pub fn next_unique_id(&self) -> u64 {
        self.next_unique_id
    }

    /// Notes an id seen during parse so later additions stay unique.
    pub fn observe_unique_id(&mut self, id: u64) {
        if id >= self.next_unique_id {
            self.next_unique_id = id + 1;
        }
    }

    /// Computes the byte length of a directory's FID area (parent FID
    /// plus one FID per child).
    ///
    /// # Errors
    ///
    /// Propagates name encoding failures.
    pub fn fid_area_len(&self, dir: usize) -> Result<u32> {
        let mut len = UdfFileIdentifier::encoded_len("")?;
        for &child in &self.nodes[dir].children {
            len += UdfFileIdentifier::encoded_len(&self.nodes[child].name)?;
        }
        Ok(len as u32)
    }
}
