// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Path Table structures for ISO 9660 filesystems.
//!
//! Path tables provide a fast way to locate directories without traversing
//! the directory hierarchy. Each entry contains the directory name, its
//! extent, and the 1-indexed number of its parent entry. The table is
//! ordered by directory depth, then parent number, then identifier, with
//! the reserved `\x00`/`\x01` identifiers pinned to the front. This is not
//! plain byte order, so the comparison lives here and nowhere else.
//!
//! Two copies are stored per descriptor set: one with little-endian
//! numeric fields (Type L) and one with big-endian fields (Type M). Both
//! are regenerated from the directory tree on every layout run.
//!
//! Reference: ECMA-119 Sections 9.3 and 9.4

use crate::directory::{DirTree, NodeId, ident_cmp};
use crate::error::{Error, Result};

/// Fixed header size of a path table record (before the identifier).
pub const PATH_TABLE_RECORD_HEADER: usize = 8;

/// Byte count past which a path table spills into a second 4096-byte
/// extent pair.
pub const PATH_TABLE_GROW_THRESHOLD: usize = 4094;

/// Path Table Record.
///
/// Reference: ECMA-119 Section 9.4
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTableRecord {
    /// Extended attribute record length
    pub xattr_len: u8,
    /// Location of the directory extent
    pub extent: u32,
    /// 1-indexed number of the parent directory's record
    pub parent_num: u16,
    /// Directory identifier (`\x00` for the root record)
    pub ident: Vec<u8>,
    /// Depth of this directory, root = 1; reconstructed on parse
    pub depth: u16,
    /// The tree node this record describes
    pub node: NodeId,
}

impl PathTableRecord {
    /// Returns the encoded size of a record with identifier length
    /// `len_di` (identifiers of odd length gain a pad byte).
    #[must_use]
    pub fn record_length(len_di: usize) -> usize {
        PATH_TABLE_RECORD_HEADER + len_di + (len_di % 2)
    }

    /// Encoded size of this record.
    #[must_use]
    pub fn size(&self) -> usize {
        Self::record_length(self.ident.len())
    }

    /// Parses one record from `buf` with the given endianness, using the
    /// records that came before it to reconstruct depth.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::UnexpectedEndOfData`] on a short buffer and
    /// [`Error::InvalidIso`] on a nonsense parent number.
    pub fn parse(buf: &[u8], big_endian: bool, prior: &[PathTableRecord]) -> Result<Self> {
        if buf.len() < PATH_TABLE_RECORD_HEADER {
            return Err(Error::UnexpectedEndOfData);
        }
        let len_di = usize::from(buf[0]);
        if len_di == 0 || buf.len() < PATH_TABLE_RECORD_HEADER + len_di {
            return Err(Error::UnexpectedEndOfData);
        }
        let (extent, parent_num) = if big_endian {
            (
                u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]),
                u16::from_be_bytes([buf[6], buf[7]]),
            )
        } else {
            (
                u32::from_le_bytes([buf[2], buf[3], buf[4], buf[5]]),
                u16::from_le_bytes([buf[6], buf[7]]),
            )
        };
        let ident = buf[8..8 + len_di].to_vec();
        let depth = if ident == [0x00] {
            1
        } else {
            let parent_index = usize::from(parent_num)
                .checked_sub(1)
                .ok_or(Error::InvalidIso("path table parent number is zero"))?;
            let parent = prior
                .get(parent_index)
                .ok_or(Error::InvalidIso("path table parent number out of range"))?;
            parent.depth + 1
        };
        Ok(Self {
            xattr_len: buf[1],
            extent,
            parent_num,
            ident,
            depth,
            node: 0,
        })
    }

    /// Serializes this record with little-endian numeric fields (Type L).
    #[must_use]
    pub fn record_little_endian(&self) -> Vec<u8> {
        self.record(self.extent.to_le_bytes(), self.parent_num.to_le_bytes())
    }

    /// Serializes this record with big-endian numeric fields (Type M).
    #[must_use]
    pub fn record_big_endian(&self) -> Vec<u8> {
        self.record(self.extent.to_be_bytes(), self.parent_num.to_be_bytes())
    }

    fn record(&self, extent: [u8; 4], parent: [u8; 2]) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size());
        out.push(self.ident.len() as u8);
        out.push(self.xattr_len);
        out.extend_from_slice(&extent);
        out.extend_from_slice(&parent);
        out.extend_from_slice(&self.ident);
        if self.ident.len() % 2 == 1 {
            out.push(0);
        }
        out
    }
}

/// Orders two records per ECMA-119 Section 9.3: depth, then parent
/// number, then identifier with the reserved bytes first.
#[must_use]
pub fn path_table_cmp(a: &PathTableRecord, b: &PathTableRecord) -> core::cmp::Ordering {
    a.depth
        .cmp(&b.depth)
        .then_with(|| a.parent_num.cmp(&b.parent_num))
        .then_with(|| ident_cmp(&a.ident, &b.ident))
}

/// A path table regenerated from one directory tree.
#[derive(Debug, Clone, Default)]
pub struct PathTable {
    /// Records in emission order
    pub records: Vec<PathTableRecord>,
}

impl PathTable {
    /// Builds the table from a tree, assigning 1-indexed directory numbers
    /// in breadth-first order. The extent fields are filled from the
    /// nodes, so the planner must have run first.
    #[must_use]
    pub fn from_tree(tree: &DirTree) -> Self {
        let order = tree.directories_in_path_table_order();
        let mut records: Vec<PathTableRecord> = Vec::with_capacity(order.len());
        // Maps node ids to their 1-indexed record number.
        let mut numbers = std::collections::HashMap::new();
        for (index, &dir) in order.iter().enumerate() {
            let number = (index + 1) as u16;
            numbers.insert(dir, number);
            let node = tree.node(dir);
            let (ident, parent_num) = if dir == tree.root() {
                (vec![0x00], 1)
            } else {
                (
                    node.ident.clone(),
                    *numbers
                        .get(&node.parent.expect("non-root directory has a parent"))
                        .expect("parents precede children in breadth-first order"),
                )
            };
            records.push(PathTableRecord {
                xattr_len: 0,
                extent: node.extent,
                parent_num,
                ident,
                depth: tree.depth(dir) as u16,
                node: dir,
            });
        }
        debug_assert!(records.windows(2).all(|pair| {
            path_table_cmp(&pair[0], &pair[1]) != core::cmp::Ordering::Greater
        }));
        Self { records }
    }

    /// Parses a whole table image.
    ///
    /// `big_endian` selects the expected byte order. A big-endian table
    /// whose records only make sense little-endian is a known quirk: it is
    /// re-parsed little-endian with a warning instead of failing.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidIso`-class errors on malformed records.
    pub fn parse(data: &[u8], size: usize, big_endian: bool) -> Result<Self> {
        match Self::parse_strict(data, size, big_endian) {
            Ok(table) => Ok(table),
            Err(err) if big_endian => {
                log::warn!(
                    "big-endian path table did not parse ({err}); retrying as little-endian"
                );
                Self::parse_strict(data, size, false)
            }
            Err(err) => Err(err),
        }
    }

    fn parse_strict(data: &[u8], size: usize, big_endian: bool) -> Result<Self> {
        let data = data.get(..size).ok_or(Error::UnexpectedEndOfData)?;
        let mut records = Vec::new();
        let mut cursor = 0usize;
        while cursor < data.len() {
            if data[cursor] == 0 {
                break;
            }
            let record = PathTableRecord::parse(&data[cursor..], big_endian, &records)?;
            cursor += record.size();
            records.push(record);
        }
        // The reconstructed depths only make sense when records are in
        // sorted order; reject tables where a child precedes its parent.
        for (index, record) in records.iter().enumerate() {
            if record.ident != [0x00] && usize::from(record.parent_num) > index {
                return Err(Error::InvalidIso("path table entry precedes its parent"));
            }
        }
        Ok(Self { records })
    }

    /// Total byte size of the table.
    #[must_use]
    pub fn size(&self) -> usize {
        self.records.iter().map(PathTableRecord::size).sum()
    }

    /// Number of 2048-byte extents reserved for each copy of this table:
    /// a 4096-byte pair, doubled past the growth threshold.
    #[must_use]
    pub fn reserved_extents(&self) -> u32 {
        if self.size() > PATH_TABLE_GROW_THRESHOLD {
            4
        } else {
            2
        }
    }

    /// Serializes the table in the requested endianness.
    #[must_use]
    pub fn record(&self, big_endian: bool) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size());
        for record in &self.records {
            if big_endian {
                out.extend_from_slice(&record.record_big_endian());
            } else {
                out.extend_from_slice(&record.record_little_endian());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DirRecordDateTime;

    fn sample_tree() -> DirTree {
        let mut tree = DirTree::new(DirRecordDateTime::unspecified());
        let root = tree.root();
        let boot = tree
            .add_directory(root, b"BOOT".to_vec(), DirRecordDateTime::unspecified())
            .unwrap();
        tree.add_directory(root, b"APPS".to_vec(), DirRecordDateTime::unspecified())
            .unwrap();
        tree.add_directory(boot, b"GRUB".to_vec(), DirRecordDateTime::unspecified())
            .unwrap();
        tree
    }

    #[test]
    fn test_record_length_padding() {
        // Root record: 8 + 1 (id) + 1 (padding) = 10.
        assert_eq!(PathTableRecord::record_length(1), 10);
        // "TEST" = 4 chars: 8 + 4 = 12, even, no padding.
        assert_eq!(PathTableRecord::record_length(4), 12);
        // "ABC" = 3 chars: 8 + 3 + 1 = 12.
        assert_eq!(PathTableRecord::record_length(3), 12);
    }

    #[test]
    fn test_from_tree_order_and_numbers() {
        let table = PathTable::from_tree(&sample_tree());
        let idents: Vec<_> = table.records.iter().map(|r| r.ident.clone()).collect();
        assert_eq!(
            idents,
            vec![
                vec![0x00],
                b"APPS".to_vec(),
                b"BOOT".to_vec(),
                b"GRUB".to_vec()
            ]
        );
        assert_eq!(table.records[0].parent_num, 1);
        assert_eq!(table.records[1].parent_num, 1);
        assert_eq!(table.records[2].parent_num, 1);
        // GRUB's parent is BOOT, record number 3.
        assert_eq!(table.records[3].parent_num, 3);
        assert_eq!(table.records[3].depth, 3);
    }

    #[test]
    fn test_roundtrip_both_endiannesses() {
        let table = PathTable::from_tree(&sample_tree());
        let le = table.record(false);
        let be = table.record(true);
        assert_eq!(le.len(), table.size());
        assert_eq!(be.len(), table.size());

        let from_le = PathTable::parse(&le, le.len(), false).unwrap();
        let from_be = PathTable::parse(&be, be.len(), true).unwrap();
        for (a, b) in from_le.records.iter().zip(from_be.records.iter()) {
            assert_eq!(a.ident, b.ident);
            assert_eq!(a.extent, b.extent);
            assert_eq!(a.parent_num, b.parent_num);
            assert_eq!(a.depth, b.depth);
        }
    }

    #[test]
    fn test_quirk_little_endian_bytes_in_big_endian_table() {
        // A table recorded little-endian but presented as the Type M copy
        // must be accepted (known malformed-image quirk).
        let table = PathTable::from_tree(&sample_tree());
        let le_bytes = table.record(false);
        let reparsed = PathTable::parse(&le_bytes, le_bytes.len(), true).unwrap();
        assert_eq!(reparsed.records.len(), table.records.len());
        assert_eq!(reparsed.records[3].depth, 3);
    }

    #[test]
    fn test_reserved_extents_growth() {
        let mut tree = DirTree::new(DirRecordDateTime::unspecified());
        let root = tree.root();
        // ~500 directories of 8-byte names: 500 * 16 bytes = 8000 bytes,
        // past the 4094-byte growth threshold.
        for i in 0..500 {
            let name = format!("DIR{i:05}");
            tree.add_directory(root, name.into_bytes(), DirRecordDateTime::unspecified())
                .unwrap();
        }
        let table = PathTable::from_tree(&tree);
        assert!(table.size() > PATH_TABLE_GROW_THRESHOLD);
        assert_eq!(table.reserved_extents(), 4);

        let small = PathTable::from_tree(&sample_tree());
        assert_eq!(small.reserved_extents(), 2);
    }

    #[test]
    fn test_parse_rejects_zero_parent() {
        // len_di 4, xattr 0, extent 10 LE, parent 0 -> invalid.
        let mut buf = vec![4u8, 0, 10, 0, 0, 0, 0, 0];
        buf.extend_from_slice(b"TEST");
        let err = PathTable::parse(&buf, buf.len(), false).unwrap_err();
        assert!(matches!(err, Error::InvalidIso(_)));
    }
}
