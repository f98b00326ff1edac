// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! ISO 9660 (ECMA-119) filesystem image library: parse, mutate, remaster.
//!
//! This library provides a pure in-memory model of ISO 9660 optical-disc
//! images. An existing image can be parsed from any seekable stream,
//! mutated through the [`Image`] façade, and re-mastered back to bytes; a
//! new image can equally be built from scratch. On top of raw ISO 9660 it
//! supports the extensions that commonly coexist in one image:
//!
//! - **Joliet**: UCS-2 long filenames via a Supplementary Volume
//!   Descriptor.
//! - **Rock Ridge**: POSIX semantics (long names, symlinks, permissions,
//!   deep-directory relocation) via SUSP system-use fields.
//! - **El Torito**: bootable-CD metadata including multi-boot sections,
//!   emulation modes, and boot info tables.
//! - **UDF 2.60**: a bridge descriptor tree and file-entry graph overlaid
//!   on the same sectors.
//! - **Isohybrid**: an MBR (optionally with a hybrid GPT) so the image
//!   also boots from USB mass storage.
//!
//! A file visible under several names (ISO, Joliet, UDF, hard links) is
//! stored exactly once behind a content-addressed inode, and the layout
//! planner re-derives every extent number, size field, checksum and CRC
//! before each write.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use iso9660::{Image, IsoOptions, AddOptions, PathKind};
//!
//! // Create a simple image
//! let mut image = Image::new(IsoOptions::default())?;
//! image.add_data(b"Hello, World!".to_vec(), "/README.TXT;1", AddOptions::default())?;
//! image.write(std::path::Path::new("hello.iso"))?;
//!
//! // Parse it back
//! let file = std::fs::File::open("hello.iso")?;
//! let image = Image::open(Box::new(file))?;
//! let data = image.get_file_from_iso(PathKind::Iso("/README.TXT;1"))?;
//! ```
//!
//! # Determinism
//!
//! Given the same mutations and the same injected [`Clock`], `write`
//! produces byte-identical output: the planner assigns extents in a fixed
//! order and nothing reads the ambient environment. Tests pin a
//! [`FixedClock`] to compare images byte for byte.
//!
//! # References
//!
//! - [ECMA-119](https://www.ecma-international.org/publications-and-standards/standards/ecma-119/):
//!   Volume and File Structure of CDROM for Information Interchange
//! - [El Torito Specification](https://pdos.csail.mit.edu/6.828/2014/readings/boot-cdrom.pdf):
//!   Bootable CD-ROM Format Specification Version 1.0
//! - ECMA-167 and OSTA UDF 2.60
//! - IEEE P1282 (Rock Ridge) and SUSP 1.12

mod crc;
mod directory;
mod eltorito;
mod error;
mod image;
mod inode;
mod isohybrid;
mod layout;
mod parse;
mod path_table;
mod rockridge;
mod types;
mod udf;
mod volume;

// The façade.
pub use image::{
    AddOptions, EltoritoOptions, Image, IsoFileReader, IsoOptions, LinkTarget, PathKind, Record,
};

// Error types.
pub use error::{Error, ErrorKind, Result};

// Clock injection.
pub use types::{Clock, FixedClock, IsoTime, SECTOR_SIZE};

// Wire-level types useful to embedders.
pub use directory::{DirRecordIter, FileFlags, RawDirRecord};
pub use eltorito::{BootCatalog, BootEntry, BootInfoTable, BootMediaType, PlatformId};
pub use inode::{ReadSeek, ReadWriteSeek};
pub use path_table::{PathTable, PathTableRecord};
pub use rockridge::{RR_MAX_FILENAME_LENGTH, RockRidgeEntry, RockRidgeVersion, SlComponent};
pub use types::{BothEndian16, BothEndian32, DirRecordDateTime, VolumeDateTime};
pub use volume::{BootRecordVolumeDescriptor, VolumeDescriptor, VolumeDescriptorType};
