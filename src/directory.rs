// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Directory Record structures and the in-memory directory tree.
//!
//! Directory records describe files and directories within the filesystem.
//! Each record has a variable length (minimum 34 bytes) and contains
//! metadata about the file/directory including location, size, and
//! attributes, plus an optional system-use area holding Rock Ridge fields
//! and/or an XA suffix.
//!
//! The same structures serve both the ISO 9660 tree and the Joliet tree;
//! only the identifier encoding differs (d-characters vs. UCS-2 BE).
//!
//! Reference: ECMA-119 Section 9.1

use bitflags::bitflags;
use fallible_iterator::FallibleIterator;

use crate::error::{Error, Result};
use crate::rockridge::RockRidgeEntry;
use crate::types::{BothEndian16, BothEndian32, DirRecordDateTime, SECTOR_SIZE};

bitflags! {
    /// File flags for directory records.
    ///
    /// Reference: ECMA-119 Section 9.1.6
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FileFlags: u8 {
        /// File is hidden (existence bit).
        const HIDDEN = 0x01;
        /// Entry is a directory.
        const DIRECTORY = 0x02;
        /// Entry is an associated file.
        const ASSOCIATED = 0x04;
        /// Extended attribute record describes the record format.
        const RECORD = 0x08;
        /// Owner/group permissions are in the extended attribute record.
        const PROTECTION = 0x10;
        /// This is not the final directory record for this file
        /// (multi-extent).
        const MULTI_EXTENT = 0x80;
    }
}

/// Minimum size of a directory record (33-byte header plus a 1-byte
/// identifier).
pub const DIRECTORY_RECORD_MIN_SIZE: usize = 34;

/// Length of the XA suffix appended to the system-use area of every record
/// on XA images.
pub const XA_RECORD_LEN: usize = 14;

/// Largest byte count one directory record can describe; longer payloads
/// continue in a multi-extent chain.
pub const MAX_EXTENT_RUN: u64 = 0xFFFF_F800;

/// The identifier byte of a `.` entry.
pub const IDENT_DOT: &[u8] = &[0x00];
/// The identifier byte of a `..` entry.
pub const IDENT_DOTDOT: &[u8] = &[0x01];

/// Emits the 14-byte XA suffix (zero attributes, `XA` signature).
#[must_use]
pub fn xa_suffix() -> [u8; XA_RECORD_LEN] {
    let mut out = [0u8; XA_RECORD_LEN];
    out[6] = b'X';
    out[7] = b'A';
    out
}

/// Compares two on-disc identifiers in directory-record order.
///
/// `\x00` (dot) sorts first, `\x01` (dotdot) second, everything else in
/// byte order. This is the order children are kept in and the order the
/// path table sorts identifiers with; it is not plain lexicographic order
/// because of the two reserved identifiers.
#[must_use]
pub fn ident_cmp(a: &[u8], b: &[u8]) -> core::cmp::Ordering {
    use core::cmp::Ordering;
    let rank = |ident: &[u8]| -> u8 {
        if ident == IDENT_DOT {
            0
        } else if ident == IDENT_DOTDOT {
            1
        } else {
            2
        }
    };
    let (rank_a, rank_b) = (rank(a), rank(b));
    if rank_a != rank_b {
        return rank_a.cmp(&rank_b);
    }
    if rank_a == 2 { a.cmp(b) } else { Ordering::Equal }
}

/// Computes the encoded length of a record with the given identifier and
/// system-use lengths.
///
/// The identifier is followed by a pad byte when its length is even (so
/// the system-use area starts on an even offset), and the whole record is
/// padded to an even length.
#[must_use]
pub fn record_len(ident_len: usize, su_len: usize) -> usize {
    let mut len = 33 + ident_len;
    if ident_len % 2 == 0 {
        len += 1;
    }
    len += su_len;
    if len % 2 == 1 {
        len += 1;
    }
    len
}

/// A directory record as read from or written to disc.
///
/// This is the wire-level view; tree-level state (children, inode links,
/// Rock Ridge overlays) lives in [`DirNode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDirRecord {
    /// Length of this directory record
    pub len_dr: u8,
    /// Extended attribute record length
    pub xattr_len: u8,
    /// Location of extent (first logical block of the data)
    pub extent: u32,
    /// Data length in bytes
    pub data_length: u32,
    /// Recording date and time
    pub date: DirRecordDateTime,
    /// File flags
    pub flags: FileFlags,
    /// File unit size (interleaved files, 0 otherwise)
    pub file_unit_size: u8,
    /// Interleave gap size (interleaved files, 0 otherwise)
    pub interleave_gap: u8,
    /// Volume sequence number
    pub seqnum: u16,
    /// File identifier
    pub ident: Vec<u8>,
    /// System-use bytes (XA suffix plus Rock Ridge fields)
    pub system_use: Vec<u8>,
}

impl RawDirRecord {
    /// Parses one record out of `buf`.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidIso`] variants on malformed records.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < DIRECTORY_RECORD_MIN_SIZE {
            return Err(Error::UnexpectedEndOfData);
        }
        let len_dr = buf[0];
        if usize::from(len_dr) > buf.len() || usize::from(len_dr) < DIRECTORY_RECORD_MIN_SIZE {
            return Err(Error::InvalidIso("directory record length out of range"));
        }
        let extent = BothEndian32::parse(&buf[2..10], "directory record extent")?.get();
        let data_length = BothEndian32::parse(&buf[10..18], "directory record data length")?.get();
        let date = DirRecordDateTime::parse(&buf[18..25])?;
        let flags = FileFlags::from_bits_truncate(buf[25]);
        let seqnum = BothEndian16::parse(&buf[28..32], "directory record seqnum")?.get();
        let ident_len = usize::from(buf[32]);
        if 33 + ident_len > usize::from(len_dr) {
            return Err(Error::InvalidIso("directory record identifier overruns record"));
        }
        let ident = buf[33..33 + ident_len].to_vec();
        let mut su_start = 33 + ident_len;
        if ident_len % 2 == 0 {
            su_start += 1;
        }
        let system_use = if su_start < usize::from(len_dr) {
            buf[su_start..usize::from(len_dr)].to_vec()
        } else {
            Vec::new()
        };
        Ok(Self {
            len_dr,
            xattr_len: buf[1],
            extent,
            data_length,
            date,
            flags,
            file_unit_size: buf[26],
            interleave_gap: buf[27],
            seqnum,
            ident,
            system_use,
        })
    }

    /// Returns whether this record describes a directory.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.flags.contains(FileFlags::DIRECTORY)
    }

    /// Returns whether this record is a `.` entry.
    #[must_use]
    pub fn is_dot(&self) -> bool {
        self.ident == IDENT_DOT
    }

    /// Returns whether this record is a `..` entry.
    #[must_use]
    pub fn is_dotdot(&self) -> bool {
        self.ident == IDENT_DOTDOT
    }
}

/// Serializes one directory record.
///
/// `su` is the complete system-use area (already including any XA suffix
/// and Rock Ridge bytes). The returned vector has the even, padded length
/// computed by [`record_len`].
#[must_use]
pub fn record_bytes(
    ident: &[u8],
    extent: u32,
    data_length: u32,
    date: &DirRecordDateTime,
    flags: FileFlags,
    su: &[u8],
) -> Vec<u8> {
    let total = record_len(ident.len(), su.len());
    debug_assert!(total <= 255, "directory record exceeds its length field");
    let mut out = vec![0u8; total];
    out[0] = total as u8;
    out[1] = 0; // xattr length
    BothEndian32::new(extent).write_to(&mut out[2..10]);
    BothEndian32::new(data_length).write_to(&mut out[10..18]);
    date.write_to(&mut out[18..25]);
    out[25] = flags.bits();
    out[26] = 0; // file unit size
    out[27] = 0; // interleave gap
    BothEndian16::new(1).write_to(&mut out[28..32]);
    out[32] = ident.len() as u8;
    out[33..33 + ident.len()].copy_from_slice(ident);
    let mut su_start = 33 + ident.len();
    if ident.len() % 2 == 0 {
        su_start += 1;
    }
    out[su_start..su_start + su.len()].copy_from_slice(su);
    out
}

/// Iterates the raw records stored in one directory's data area.
///
/// Records never span a logical block; when the byte at the cursor is zero
/// the iterator skips to the next block boundary, and ends when the data
/// area is exhausted.
pub struct DirRecordIter<'a> {
    data: &'a [u8],
    cursor: usize,
}

impl<'a> DirRecordIter<'a> {
    /// Creates an iterator over a directory data area.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, cursor: 0 }
    }
}

impl FallibleIterator for DirRecordIter<'_> {
    type Item = RawDirRecord;
    type Error = Error;

    fn next(&mut self) -> Result<Option<RawDirRecord>> {
        loop {
            if self.cursor >= self.data.len() {
                return Ok(None);
            }
            if self.data[self.cursor] == 0 {
                // Zero fill to the end of the logical block; records resume
                // at the next boundary.
                let next = (self.cursor / SECTOR_SIZE + 1) * SECTOR_SIZE;
                self.cursor = next;
                continue;
            }
            let record = RawDirRecord::parse(&self.data[self.cursor..])?;
            self.cursor += usize::from(record.len_dr);
            return Ok(Some(record));
        }
    }
}

/// What a tree node represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A directory with children
    Directory,
    /// A regular file referencing an inode
    File,
    /// A Rock Ridge relocation placeholder: a zero-length entry at the
    /// logical location of a directory that was moved under `RR_MOVED`,
    /// carrying a `CL` link to the moved extent
    RelocationPlaceholder,
}

/// Identifies a node within a [`DirTree`] arena.
pub type NodeId = usize;

/// One node of an in-memory directory tree.
#[derive(Debug, Clone)]
pub struct DirNode {
    /// On-disc identifier (d-characters or UCS-2 BE)
    pub ident: Vec<u8>,
    /// Parent node; `None` only for the root
    pub parent: Option<NodeId>,
    /// Children in directory-record order (directories only)
    pub children: Vec<NodeId>,
    /// What this node is
    pub kind: NodeKind,
    /// File flags recorded for this node (HIDDEN and DIRECTORY bits are
    /// meaningful here; MULTI_EXTENT is synthesized at write time)
    pub flags: FileFlags,
    /// Recording date
    pub date: DirRecordDateTime,
    /// Inode index for files; `None` for directories
    pub inode: Option<usize>,
    /// Directory data length in bytes (multiple of 2048); set by the
    /// planner, unused for files
    pub data_length: u64,
    /// First extent of this node's data; set by the planner
    pub extent: u32,
    /// Rock Ridge overlay, when the image carries Rock Ridge
    pub rock_ridge: Option<RockRidgeEntry>,
    /// Rock Ridge overlay of this directory's `.` record
    pub rr_dot: Option<RockRidgeEntry>,
    /// Rock Ridge overlay of this directory's `..` record
    pub rr_dotdot: Option<RockRidgeEntry>,
    /// For a relocation placeholder: the node id of the moved directory
    pub relocation_target: Option<NodeId>,
    /// For a relocated directory: the node id of its logical parent (the
    /// directory the placeholder lives in)
    pub logical_parent: Option<NodeId>,
}

impl DirNode {
    fn directory(ident: Vec<u8>, parent: Option<NodeId>, date: DirRecordDateTime) -> Self {
        Self {
            ident,
            parent,
            children: Vec::new(),
            kind: NodeKind::Directory,
            flags: FileFlags::DIRECTORY,
            date,
            inode: None,
            data_length: 0,
            extent: 0,
            rock_ridge: None,
            rr_dot: None,
            rr_dotdot: None,
            relocation_target: None,
            logical_parent: None,
        }
    }

    fn file(ident: Vec<u8>, parent: NodeId, inode: usize, date: DirRecordDateTime) -> Self {
        Self {
            ident,
            parent: Some(parent),
            children: Vec::new(),
            kind: NodeKind::File,
            flags: FileFlags::empty(),
            date,
            inode: Some(inode),
            data_length: 0,
            extent: 0,
            rock_ridge: None,
            rr_dot: None,
            rr_dotdot: None,
            relocation_target: None,
            logical_parent: None,
        }
    }

    /// Returns whether this node is a directory.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    /// Returns whether the hidden flag is set.
    #[must_use]
    pub fn is_hidden(&self) -> bool {
        self.flags.contains(FileFlags::HIDDEN)
    }
}

/// An arena-backed directory tree for one plane (ISO 9660 or Joliet).
///
/// Node 0 is always the root. Children are kept sorted with [`ident_cmp`];
/// removal leaves tombstones in the arena (nodes whose parent link is
/// cleared), which the planner simply never visits.
#[derive(Debug, Clone)]
pub struct DirTree {
    nodes: Vec<DirNode>,
}

impl DirTree {
    /// Creates a tree containing only a root directory.
    #[must_use]
    pub fn new(date: DirRecordDateTime) -> Self {
        Self {
            nodes: vec![DirNode::directory(IDENT_DOT.to_vec(), None, date)],
        }
    }

    /// The root node id.
    #[must_use]
    pub fn root(&self) -> NodeId {
        0
    }

    /// Returns a node by id.
    ///
    /// # Panics
    ///
    /// Panics when `id` is out of range; ids are only produced by this
    /// tree.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &DirNode {
        &self.nodes[id]
    }

    /// Returns a node mutably.
    ///
    /// # Panics
    ///
    /// Panics when `id` is out of range.
    pub fn node_mut(&mut self, id: NodeId) -> &mut DirNode {
        &mut self.nodes[id]
    }

    /// Number of live nodes (excluding tombstones).
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.iter_live().count()
    }

    fn iter_live(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len())
            .filter(|&id| id == 0 || self.nodes[id].parent.is_some())
    }

    /// Adds a directory under `parent`, keeping children sorted.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidInput`] when a child with the same
    /// identifier already exists or `parent` is not a directory.
    pub fn add_directory(
        &mut self,
        parent: NodeId,
        ident: Vec<u8>,
        date: DirRecordDateTime,
    ) -> Result<NodeId> {
        self.check_can_insert(parent, &ident)?;
        let id = self.nodes.len();
        self.nodes.push(DirNode::directory(ident, Some(parent), date));
        self.insert_sorted(parent, id);
        Ok(id)
    }

    /// Adds a file under `parent`, keeping children sorted.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidInput`] when a child with the same
    /// identifier already exists or `parent` is not a directory.
    pub fn add_file(
        &mut self,
        parent: NodeId,
        ident: Vec<u8>,
        inode: usize,
        date: DirRecordDateTime,
    ) -> Result<NodeId> {
        self.check_can_insert(parent, &ident)?;
        let id = self.nodes.len();
        self.nodes.push(DirNode::file(ident, parent, inode, date));
        self.insert_sorted(parent, id);
        Ok(id)
    }

    fn check_can_insert(&self, parent: NodeId, ident: &[u8]) -> Result<()> {
        if !self.nodes[parent].is_dir() {
            return Err(Error::InvalidInput("parent is not a directory"));
        }
        if self.find_child(parent, ident).is_some() {
            return Err(Error::InvalidInput("a child with this name already exists"));
        }
        Ok(())
    }

    fn insert_sorted(&mut self, parent: NodeId, id: NodeId) {
        let position = self.nodes[parent]
            .children
            .iter()
            .position(|&child| {
                ident_cmp(&self.nodes[child].ident, &self.nodes[id].ident)
                    == core::cmp::Ordering::Greater
            })
            .unwrap_or(self.nodes[parent].children.len());
        self.nodes[parent].children.insert(position, id);
    }

    /// Detaches `id` from its parent, leaving a tombstone in the arena.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidInput`] when removing the root and with
    /// [`Error::DirectoryNotEmpty`] when removing a directory that still
    /// has children.
    pub fn remove(&mut self, id: NodeId) -> Result<()> {
        let Some(parent) = self.nodes[id].parent else {
            return Err(Error::InvalidInput("cannot remove the root directory"));
        };
        if self.nodes[id].is_dir() && !self.nodes[id].children.is_empty() {
            return Err(Error::DirectoryNotEmpty(
                String::from_utf8_lossy(&self.nodes[id].ident).into_owned(),
            ));
        }
        self.nodes[parent].children.retain(|&child| child != id);
        self.nodes[id].parent = None;
        Ok(())
    }

    /// Moves `id` under `new_parent` (Rock Ridge deep-directory
    /// relocation), keeping the target's children sorted.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidInput`] when the node is the root or the
    /// target already has a child with the same identifier.
    pub fn reparent(&mut self, id: NodeId, new_parent: NodeId) -> Result<()> {
        let Some(old_parent) = self.nodes[id].parent else {
            return Err(Error::InvalidInput("cannot reparent the root directory"));
        };
        self.check_can_insert(new_parent, &self.nodes[id].ident.clone())?;
        self.nodes[old_parent].children.retain(|&child| child != id);
        self.nodes[id].parent = Some(new_parent);
        self.insert_sorted(new_parent, id);
        Ok(())
    }

    /// Finds a direct child of `parent` by on-disc identifier.
    #[must_use]
    pub fn find_child(&self, parent: NodeId, ident: &[u8]) -> Option<NodeId> {
        self.nodes[parent]
            .children
            .iter()
            .copied()
            .find(|&child| self.nodes[child].ident == ident)
    }

    /// Finds a direct child of `parent` by its Rock Ridge name.
    #[must_use]
    pub fn find_child_rr(&self, parent: NodeId, name: &[u8]) -> Option<NodeId> {
        self.nodes[parent].children.iter().copied().find(|&child| {
            self.nodes[child]
                .rock_ridge
                .as_ref()
                .and_then(RockRidgeEntry::name)
                == Some(name)
        })
    }

    /// Depth of `id`, counting the root as 1.
    #[must_use]
    pub fn depth(&self, id: NodeId) -> usize {
        let mut depth = 1;
        let mut cursor = id;
        while let Some(parent) = self.nodes[cursor].parent {
            depth += 1;
            cursor = parent;
        }
        depth
    }

    /// Builds the `/`-joined path of `id`.
    ///
    /// With `rockridge` set, Rock Ridge alternate names are used for the
    /// components that have them.
    #[must_use]
    pub fn full_path(&self, id: NodeId, rockridge: bool, joliet: bool) -> String {
        let mut parts: Vec<String> = Vec::new();
        let mut cursor = id;
        while let Some(parent) = self.nodes[cursor].parent {
            let node = &self.nodes[cursor];
            let name = if rockridge {
                node.rock_ridge
                    .as_ref()
                    .and_then(RockRidgeEntry::name)
                    .map_or_else(
                        || ident_to_string(&node.ident, joliet),
                        |name| String::from_utf8_lossy(name).into_owned(),
                    )
            } else {
                ident_to_string(&node.ident, joliet)
            };
            parts.push(name);
            cursor = parent;
        }
        parts.reverse();
        format!("/{}", parts.join("/"))
    }

    /// Lists the directories of this tree in path-table order: the root
    /// first, then breadth-first with siblings in identifier order.
    #[must_use]
    pub fn directories_in_path_table_order(&self) -> Vec<NodeId> {
        let mut order = vec![self.root()];
        let mut cursor = 0;
        while cursor < order.len() {
            let dir = order[cursor];
            for &child in &self.nodes[dir].children {
                if self.nodes[child].is_dir() {
                    order.push(child);
                }
            }
            cursor += 1;
        }
        order
    }
}

/// Converts an on-disc identifier to a display string.
#[must_use]
pub fn ident_to_string(ident: &[u8], joliet: bool) -> String {
    if joliet {
        decode_ucs2_be(ident)
    } else {
        String::from_utf8_lossy(ident).into_owned()
    }
}

/// Encodes a name as UCS-2 big-endian for the Joliet tree.
///
/// # Errors
///
/// Fails with [`Error::IdentifierTooLong`] past 64 code units and
/// [`Error::InvalidIdentifier`] for characters outside the BMP or the
/// Joliet-forbidden set (`*/:;?\`).
pub fn encode_ucs2_be(name: &str) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(name.len() * 2);
    let mut units = 0usize;
    for ch in name.chars() {
        let code = u32::from(ch);
        if code > 0xFFFF {
            return Err(Error::InvalidIdentifier {
                identifier: name.into(),
                reason: "joliet names are limited to the basic multilingual plane",
            });
        }
        if matches!(ch, '*' | '/' | ':' | ';' | '?' | '\\') {
            return Err(Error::InvalidIdentifier {
                identifier: name.into(),
                reason: "character forbidden in joliet names",
            });
        }
        out.extend_from_slice(&(code as u16).to_be_bytes());
        units += 1;
    }
    if units > 64 {
        return Err(Error::IdentifierTooLong {
            identifier: name.into(),
            max_length: 64,
        });
    }
    Ok(out)
}

/// Decodes a UCS-2 big-endian identifier.
#[must_use]
pub fn decode_ucs2_be(ident: &[u8]) -> String {
    ident
        .chunks_exact(2)
        .map(|pair| {
            let unit = u16::from_be_bytes([pair[0], pair[1]]);
            char::from_u32(u32::from(unit)).unwrap_or(char::REPLACEMENT_CHARACTER)
        })
        .collect()
}

/// Validates an ISO 9660 file identifier for the given interchange level.
///
/// Level 1 requires `8.3;version` uppercase d-characters; levels 2 and 3
/// allow up to 30 characters of name plus the version; level 4 only
/// requires a non-empty identifier without separators.
///
/// # Errors
///
/// Fails with the matching `InvalidInput`-class error.
pub fn validate_file_ident(ident: &[u8], level: u8) -> Result<()> {
    if ident.is_empty() {
        return Err(Error::InvalidInput("empty file identifier"));
    }
    if level == 4 {
        if ident.contains(&b'/') || ident == IDENT_DOT || ident == IDENT_DOTDOT {
            return Err(Error::InvalidIdentifier {
                identifier: String::from_utf8_lossy(ident).into_owned(),
                reason: "reserved identifier",
            });
        }
        return Ok(());
    }

    crate::types::check_d_chars(ident)?;

    // Split off ";version".
    let (name, version) = match ident.iter().position(|&b| b == b';') {
        Some(split) => (&ident[..split], Some(&ident[split + 1..])),
        None => (&ident[..], None),
    };
    if let Some(version) = version {
        if version.is_empty() || version.len() > 5 || !version.iter().all(u8::is_ascii_digit) {
            return Err(Error::InvalidIdentifier {
                identifier: String::from_utf8_lossy(ident).into_owned(),
                reason: "version must be 1-5 decimal digits",
            });
        }
        let value: u32 = core::str::from_utf8(version)
            .expect("digits are ascii")
            .parse()
            .expect("checked digits");
        if !(1..=32767).contains(&value) {
            return Err(Error::InvalidIdentifier {
                identifier: String::from_utf8_lossy(ident).into_owned(),
                reason: "version out of range 1..=32767",
            });
        }
    }

    // Split "base.ext".
    let dot_count = name.iter().filter(|&&b| b == b'.').count();
    if dot_count > 1 {
        return Err(Error::InvalidIdentifier {
            identifier: String::from_utf8_lossy(ident).into_owned(),
            reason: "more than one dot in file identifier",
        });
    }
    let (base, ext) = match name.iter().position(|&b| b == b'.') {
        Some(split) => (&name[..split], &name[split + 1..]),
        None => (&name[..], &name[..0]),
    };

    match level {
        1 => {
            if base.len() > 8 || ext.len() > 3 {
                return Err(Error::IdentifierTooLong {
                    identifier: String::from_utf8_lossy(ident).into_owned(),
                    max_length: 12,
                });
            }
        }
        2 | 3 => {
            if name.len() > 30 {
                return Err(Error::IdentifierTooLong {
                    identifier: String::from_utf8_lossy(ident).into_owned(),
                    max_length: 30,
                });
            }
        }
        _ => return Err(Error::InvalidInput("interchange level must be 1-4")),
    }
    Ok(())
}

/// Validates an ISO 9660 directory identifier for the given interchange
/// level.
///
/// # Errors
///
/// Fails with the matching `InvalidInput`-class error.
pub fn validate_dir_ident(ident: &[u8], level: u8) -> Result<()> {
    if ident.is_empty() {
        return Err(Error::InvalidInput("empty directory identifier"));
    }
    if level == 4 {
        if ident.contains(&b'/') {
            return Err(Error::InvalidIdentifier {
                identifier: String::from_utf8_lossy(ident).into_owned(),
                reason: "separator in directory identifier",
            });
        }
        return Ok(());
    }
    if !ident.iter().all(|&b| crate::types::is_d_char(b)) {
        return Err(Error::InvalidIdentifier {
            identifier: String::from_utf8_lossy(ident).into_owned(),
            reason: "contains characters outside the d-character set",
        });
    }
    let max = match level {
        1 => 8,
        2 | 3 => 31,
        _ => return Err(Error::InvalidInput("interchange level must be 1-4")),
    };
    if ident.len() > max {
        return Err(Error::IdentifierTooLong {
            identifier: String::from_utf8_lossy(ident).into_owned(),
            max_length: max,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> DirRecordDateTime {
        DirRecordDateTime::unspecified()
    }

    #[test]
    fn test_record_len_padding() {
        // 1-byte identifier: 33 + 1 = 34, already even.
        assert_eq!(record_len(1, 0), 34);
        // "FOO.;1" (6 bytes): 33 + 6 + 1 pad = 40.
        assert_eq!(record_len(6, 0), 40);
        // With 75 bytes of system use the total 115 pads to 116.
        assert_eq!(record_len(6, 75), 116);
        // With 86 bytes of system use: 126, already even.
        assert_eq!(record_len(6, 86), 126);
    }

    #[test]
    fn test_record_roundtrip() {
        let bytes = record_bytes(
            b"FOO.;1",
            24,
            4,
            &date(),
            FileFlags::empty(),
            &[],
        );
        assert_eq!(bytes.len(), 40);
        assert_eq!(bytes[0], 40);
        let parsed = RawDirRecord::parse(&bytes).unwrap();
        assert_eq!(parsed.ident, b"FOO.;1");
        assert_eq!(parsed.extent, 24);
        assert_eq!(parsed.data_length, 4);
        assert!(!parsed.is_dir());
        assert!(parsed.system_use.is_empty());
    }

    #[test]
    fn test_record_roundtrip_with_system_use() {
        let su = vec![b'N', b'M', 8, 1, 0, b'f', b'o', b'o'];
        let bytes = record_bytes(b"FOO.;1", 24, 4, &date(), FileFlags::empty(), &su);
        let parsed = RawDirRecord::parse(&bytes).unwrap();
        assert_eq!(parsed.system_use, su);
    }

    #[test]
    fn test_dir_record_iter_skips_sector_padding() {
        let mut data = vec![0u8; 4096];
        let first = record_bytes(b"A", 30, 2048, &date(), FileFlags::DIRECTORY, &[]);
        data[..first.len()].copy_from_slice(&first);
        // Second record placed at the start of the next sector, simulating
        // the no-span padding rule.
        let second = record_bytes(b"B", 31, 2048, &date(), FileFlags::DIRECTORY, &[]);
        data[2048..2048 + second.len()].copy_from_slice(&second);

        let mut iter = DirRecordIter::new(&data);
        let records: Vec<_> = core::iter::from_fn(|| iter.next().unwrap()).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].ident, b"A");
        assert_eq!(records[1].ident, b"B");
    }

    #[test]
    fn test_ident_cmp_reserved_first() {
        use core::cmp::Ordering;
        assert_eq!(ident_cmp(IDENT_DOT, IDENT_DOTDOT), Ordering::Less);
        assert_eq!(ident_cmp(IDENT_DOTDOT, b"AAA"), Ordering::Less);
        assert_eq!(ident_cmp(b"BAR.;1", b"FOO.;1"), Ordering::Less);
        assert_eq!(ident_cmp(b"FOO.;1", b"FOO.;1"), Ordering::Equal);
    }

    #[test]
    fn test_tree_sorted_insertion() {
        let mut tree = DirTree::new(date());
        let root = tree.root();
        tree.add_file(root, b"ZZZ.;1".to_vec(), 0, date()).unwrap();
        tree.add_file(root, b"AAA.;1".to_vec(), 0, date()).unwrap();
        tree.add_directory(root, b"MID".to_vec(), date()).unwrap();
        let idents: Vec<_> = tree
            .node(root)
            .children
            .iter()
            .map(|&child| tree.node(child).ident.clone())
            .collect();
        assert_eq!(idents, vec![b"AAA.;1".to_vec(), b"MID".to_vec(), b"ZZZ.;1".to_vec()]);
    }

    #[test]
    fn test_tree_duplicate_rejected() {
        let mut tree = DirTree::new(date());
        let root = tree.root();
        tree.add_file(root, b"FOO.;1".to_vec(), 0, date()).unwrap();
        assert!(tree.add_file(root, b"FOO.;1".to_vec(), 0, date()).is_err());
    }

    #[test]
    fn test_tree_remove_nonempty_dir_fails() {
        let mut tree = DirTree::new(date());
        let root = tree.root();
        let dir = tree.add_directory(root, b"DIR1".to_vec(), date()).unwrap();
        tree.add_file(dir, b"FOO.;1".to_vec(), 0, date()).unwrap();
        assert!(matches!(
            tree.remove(dir),
            Err(Error::DirectoryNotEmpty(_))
        ));
    }

    #[test]
    fn test_tree_depth_and_path() {
        let mut tree = DirTree::new(date());
        let root = tree.root();
        let a = tree.add_directory(root, b"A".to_vec(), date()).unwrap();
        let b = tree.add_directory(a, b"B".to_vec(), date()).unwrap();
        let f = tree.add_file(b, b"FOO.;1".to_vec(), 0, date()).unwrap();
        assert_eq!(tree.depth(root), 1);
        assert_eq!(tree.depth(b), 3);
        assert_eq!(tree.full_path(f, false, false), "/A/B/FOO.;1");
    }

    #[test]
    fn test_path_table_order_is_breadth_first() {
        let mut tree = DirTree::new(date());
        let root = tree.root();
        let b = tree.add_directory(root, b"B".to_vec(), date()).unwrap();
        let a = tree.add_directory(root, b"A".to_vec(), date()).unwrap();
        let deep = tree.add_directory(a, b"DEEP".to_vec(), date()).unwrap();
        assert_eq!(
            tree.directories_in_path_table_order(),
            vec![root, a, b, deep]
        );
    }

    #[test]
    fn test_ucs2_roundtrip() {
        let encoded = encode_ucs2_be("dir1").unwrap();
        assert_eq!(encoded, vec![0, b'd', 0, b'i', 0, b'r', 0, b'1']);
        assert_eq!(decode_ucs2_be(&encoded), "dir1");
    }

    #[test]
    fn test_ucs2_limits() {
        let long: String = "x".repeat(65);
        assert!(matches!(
            encode_ucs2_be(&long),
            Err(Error::IdentifierTooLong { .. })
        ));
        assert!(encode_ucs2_be("a:b").is_err());
    }

    #[test]
    fn test_validate_file_ident_level1() {
        assert!(validate_file_ident(b"FOO.;1", 1).is_ok());
        assert!(validate_file_ident(b"README.TXT;1", 1).is_ok());
        assert!(validate_file_ident(b"TOOLONGNAME.TXT;1", 1).is_err());
        assert!(validate_file_ident(b"FOO.TOOL;1", 1).is_err());
        assert!(validate_file_ident(b"foo.txt;1", 1).is_err());
        assert!(validate_file_ident(b"FOO.;0", 1).is_err());
        assert!(validate_file_ident(b"FOO.;40000", 1).is_err());
    }

    #[test]
    fn test_validate_file_ident_levels() {
        let thirty = [b'A'; 30];
        let mut ident = thirty.to_vec();
        ident.extend_from_slice(b";1");
        assert!(validate_file_ident(&ident, 1).is_err());
        assert!(validate_file_ident(&ident, 3).is_ok());
        assert!(validate_file_ident(b"lowercase name", 4).is_ok());
    }

    #[test]
    fn test_validate_dir_ident() {
        assert!(validate_dir_ident(b"DIR1", 1).is_ok());
        assert!(validate_dir_ident(b"DIRECTORY1", 1).is_err());
        assert!(validate_dir_ident(b"DIRECTORY1", 2).is_ok());
        assert!(validate_dir_ident(b"dir one", 4).is_ok());
    }

    #[test]
    fn test_xa_suffix_signature() {
        let suffix = xa_suffix();
        assert_eq!(&suffix[6..8], b"XA");
        assert_eq!(suffix.len(), XA_RECORD_LEN);
    }
}
