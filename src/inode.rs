// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Content-addressed file payloads.
//!
//! A file that is visible under several names (ISO 9660, Joliet, UDF, and
//! hard links within one tree) is stored exactly once. Each payload is an
//! [`Inode`] carrying its length, its assigned extent, the place its bytes
//! come from, and back-references to every directory record that names it.
//! Removing the last name frees the payload; adding a name to an existing
//! payload only adds a back-reference.
//!
//! Zero-length files all share one sentinel inode with no extent.

use std::cell::RefCell;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::Result;

/// Default buffer size for payload copies.
pub const COPY_BUFFER_SIZE: usize = 65536;

/// A random-access input stream.
///
/// Every stream handed to the library (the backing image for `open`, file
/// sources for `add_fp`) only needs to be readable and seekable.
pub trait ReadSeek: Read + Seek {}
impl<T: Read + Seek> ReadSeek for T {}

/// A random-access stream that can also be written, as required by
/// `open_fp` in read-write mode and `modify_file_in_place`.
pub trait ReadWriteSeek: Read + Write + Seek {}
impl<T: Read + Write + Seek> ReadWriteSeek for T {}

/// Identifies a directory plane that can reference an inode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plane {
    /// The ISO 9660 tree (with or without a Rock Ridge overlay).
    Iso,
    /// The Joliet tree.
    Joliet,
    /// The UDF file-entry graph.
    Udf,
    /// The synthetic El Torito boot catalog record.
    BootCatalog,
}

/// A back-reference from a directory record to an inode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InodeRef {
    /// Which plane the referencing record lives in
    pub plane: Plane,
    /// Index of the record within that plane's node arena
    pub node: usize,
}

/// Where an inode's bytes come from.
pub enum InodeSource {
    /// A window into the image's own backing stream, produced by `open`.
    /// The offset is absolute within the backing stream.
    Image {
        /// Byte offset of the payload within the backing stream
        offset: u64,
    },
    /// A caller-supplied stream, handed over by `add_fp`.
    Stream {
        /// The stream the payload is read from
        fp: RefCell<Box<dyn ReadSeek>>,
        /// Byte offset of the payload within that stream
        offset: u64,
    },
    /// Payload bytes held in memory.
    Data(Vec<u8>),
    /// Reads as zeros; used for allocated-but-unwritten payloads.
    ZeroFill,
}

impl core::fmt::Debug for InodeSource {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            InodeSource::Image { offset } => {
                f.debug_struct("Image").field("offset", offset).finish()
            }
            InodeSource::Stream { offset, .. } => f
                .debug_struct("Stream")
                .field("offset", offset)
                .finish_non_exhaustive(),
            InodeSource::Data(data) => f.debug_tuple("Data").field(&data.len()).finish(),
            InodeSource::ZeroFill => f.write_str("ZeroFill"),
        }
    }
}

/// A content-addressed payload shared by every record that names it.
#[derive(Debug)]
pub struct Inode {
    /// Payload length in bytes
    pub length: u64,
    /// First extent assigned by the layout planner
    pub extent: u32,
    /// Where the bytes come from
    pub source: InodeSource,
    /// Every directory record that references this payload
    pub refs: Vec<InodeRef>,
    /// Set when a boot info table patch overlays the first bytes of the
    /// payload at write time
    pub boot_info_patch: Option<Vec<u8>>,
}

impl Inode {
    /// Creates an inode backed by in-memory bytes.
    #[must_use]
    pub fn from_data(data: Vec<u8>) -> Self {
        Self {
            length: data.len() as u64,
            extent: 0,
            source: InodeSource::Data(data),
            refs: Vec::new(),
            boot_info_patch: None,
        }
    }

    /// Creates an inode backed by a caller-supplied stream window.
    #[must_use]
    pub fn from_stream(fp: Box<dyn ReadSeek>, offset: u64, length: u64) -> Self {
        Self {
            length,
            extent: 0,
            source: InodeSource::Stream {
                fp: RefCell::new(fp),
                offset,
            },
            refs: Vec::new(),
            boot_info_patch: None,
        }
    }

    /// Creates an inode backed by a window into the image's own stream.
    #[must_use]
    pub fn from_image(offset: u64, length: u64) -> Self {
        Self {
            length,
            extent: 0,
            source: InodeSource::Image { offset },
            refs: Vec::new(),
            boot_info_patch: None,
        }
    }

    /// Creates the shared sentinel for zero-length payloads.
    #[must_use]
    pub fn empty_sentinel() -> Self {
        Self {
            length: 0,
            extent: 0,
            source: InodeSource::ZeroFill,
            refs: Vec::new(),
            boot_info_patch: None,
        }
    }

    /// Adds a back-reference, returning the new reference count.
    pub fn add_ref(&mut self, r: InodeRef) -> usize {
        if !self.refs.contains(&r) {
            self.refs.push(r);
        }
        self.refs.len()
    }

    /// Drops a back-reference, returning the remaining reference count.
    pub fn remove_ref(&mut self, r: InodeRef) -> usize {
        self.refs.retain(|existing| *existing != r);
        self.refs.len()
    }

    /// Number of logical blocks this payload occupies.
    #[must_use]
    pub fn block_count(&self) -> u32 {
        crate::types::sectors_for_size(self.length)
    }
}

/// Copies `length` bytes from `reader` (positioned at the payload start) to
/// `writer` using a bounce buffer.
///
/// # Errors
///
/// Propagates I/O errors from either stream.
pub fn copy_data(
    reader: &mut dyn Read,
    writer: &mut dyn Write,
    length: u64,
    buffer_size: usize,
) -> Result<u64> {
    let mut buf = vec![0u8; buffer_size.max(1)];
    let mut left = length;
    while left > 0 {
        let chunk = (left.min(buf.len() as u64)) as usize;
        reader.read_exact(&mut buf[..chunk])?;
        writer.write_all(&buf[..chunk])?;
        left -= chunk as u64;
    }
    Ok(length)
}

/// Writes `length` zero bytes to `writer`.
///
/// # Errors
///
/// Propagates I/O errors from the writer.
pub fn write_zeros(writer: &mut dyn Write, length: u64) -> Result<u64> {
    let buf = [0u8; 4096];
    let mut left = length;
    while left > 0 {
        let chunk = (left.min(buf.len() as u64)) as usize;
        writer.write_all(&buf[..chunk])?;
        left -= chunk as u64;
    }
    Ok(length)
}

/// Copies an inode's payload into `writer`.
///
/// [`InodeSource::Image`] windows are read by the owning image, which has
/// the backing stream; calling this helper on one is a logic error.
///
/// # Errors
///
/// Fails with an I/O error when a source stream cannot be read, or with
/// [`crate::Error::Internal`] for an image-backed inode.
pub fn copy_inode(inode: &Inode, writer: &mut dyn Write, buffer_size: usize) -> Result<u64> {
    match &inode.source {
        InodeSource::Image { .. } => Err(crate::error::Error::Internal(
            "image-backed inode must be copied through its image",
        )),
        InodeSource::Stream { fp, offset } => {
            let mut fp = fp.borrow_mut();
            fp.seek(SeekFrom::Start(*offset))?;
            copy_data(&mut *fp, writer, inode.length, buffer_size)
        }
        InodeSource::Data(data) => {
            writer.write_all(data)?;
            Ok(data.len() as u64)
        }
        InodeSource::ZeroFill => write_zeros(writer, inode.length),
    }
}
