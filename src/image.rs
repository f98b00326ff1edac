// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The in-memory image model and its public façade.
//!
//! An [`Image`] aggregates every plane an ISO can carry at once: the
//! ISO 9660 tree (optionally overlaid with Rock Ridge), the Joliet tree,
//! the UDF tree, the El Torito boot catalog and the isohybrid MBR/GPT.
//! File payloads live in a content-addressed inode table shared by all
//! planes, so a file visible under four names is stored once.
//!
//! Mutations only touch the in-memory model and mark the image dirty; the
//! layout planner re-runs before the next write (or immediately in strict
//! mode) and re-assigns every extent. A failed mutation leaves the model
//! unchanged.

use std::cell::RefCell;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::directory::{
    DirTree, FileFlags, NodeId, NodeKind, encode_ucs2_be, ident_to_string, validate_dir_ident,
    validate_file_ident,
};
use crate::eltorito::{BootCatalog, BootEntry, BootMediaType, PlatformId};
use crate::error::{Error, Result};
use crate::inode::{COPY_BUFFER_SIZE, Inode, InodeRef, InodeSource, Plane, ReadSeek,
    ReadWriteSeek, copy_data};
use crate::isohybrid::IsoHybrid;
use crate::rockridge::{
    ContinuationArea, PxEntry, RR_MAX_FILENAME_LENGTH, RockRidgeEntry, RockRidgeVersion,
    symlink_components_for_target,
};
use crate::types::{
    Clock, DirRecordDateTime, IsoTime, SECTOR_SIZE, SYSTEM_AREA_SIZE, VolumeDateTime,
};
use crate::udf::entries::{
    UdfFileType, UdfTimestamp, UdfTree, encode_symlink, symlink_components_for_target as
    udf_symlink_components, symlink_target_string,
};
use crate::udf::{
    UdfDescriptorSet, UdfFileSetDescriptor, UdfLogicalVolumeIntegrityDescriptor,
};
use crate::volume::{VdKind, VolumeDescriptor, VolumePartitionDescriptor};

/// Default name of the Rock Ridge relocation directory.
pub const RR_MOVED_NAME: &[u8] = b"RR_MOVED";

/// The backing stream of a parsed image.
pub(crate) enum Backing {
    /// No backing stream (freshly created image)
    None,
    /// Read-only stream from `open`
    Read(RefCell<Box<dyn ReadSeek>>),
    /// Read-write stream from `open_fp`
    ReadWrite(RefCell<Box<dyn ReadWriteSeek>>),
}

impl Backing {
    pub(crate) fn is_none(&self) -> bool {
        matches!(self, Backing::None)
    }

    /// Reads exactly `buf.len()` bytes at `offset`.
    pub(crate) fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        match self {
            Backing::None => Err(Error::Internal("no backing stream to read from")),
            Backing::Read(fp) => {
                let mut fp = fp.borrow_mut();
                fp.seek(SeekFrom::Start(offset))?;
                fp.read_exact(buf)?;
                Ok(())
            }
            Backing::ReadWrite(fp) => {
                let mut fp = fp.borrow_mut();
                fp.seek(SeekFrom::Start(offset))?;
                fp.read_exact(buf)?;
                Ok(())
            }
        }
    }

    /// Copies `length` bytes at `offset` into `out`.
    pub(crate) fn copy_to(
        &self,
        offset: u64,
        length: u64,
        out: &mut dyn Write,
        buffer_size: usize,
    ) -> Result<u64> {
        match self {
            Backing::None => Err(Error::Internal("no backing stream to read from")),
            Backing::Read(fp) => {
                let mut fp = fp.borrow_mut();
                fp.seek(SeekFrom::Start(offset))?;
                copy_data(&mut *fp, out, length, buffer_size)
            }
            Backing::ReadWrite(fp) => {
                let mut fp = fp.borrow_mut();
                fp.seek(SeekFrom::Start(offset))?;
                copy_data(&mut *fp, out, length, buffer_size)
            }
        }
    }

    /// Writes `data` at `offset`; requires a read-write backing.
    pub(crate) fn write_all_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        match self {
            Backing::ReadWrite(fp) => {
                let mut fp = fp.borrow_mut();
                fp.seek(SeekFrom::Start(offset))?;
                fp.write_all(data)?;
                Ok(())
            }
            Backing::Read(_) => Err(Error::InvalidInput(
                "operation requires a stream opened for writing",
            )),
            Backing::None => Err(Error::Internal("no backing stream to write to")),
        }
    }
}

/// Creation options for [`Image::new`].
pub struct IsoOptions {
    /// Interchange level (1-4)
    pub interchange_level: u8,
    /// Rock Ridge dialect to carry, if any
    pub rock_ridge: Option<RockRidgeVersion>,
    /// Joliet UCS-2 level (1-3) to carry, if any
    pub joliet: Option<u8>,
    /// Whether to carry an ISO 9660:1999 enhanced descriptor
    pub enhanced: bool,
    /// Whether to carry a UDF 2.60 bridge
    pub udf: bool,
    /// Whether to mark the image as XA and suffix directory records
    pub xa: bool,
    /// Strict mode: tolerated quirks become errors, and every mutation
    /// re-runs the planner eagerly
    pub strict: bool,
    /// System identifier for the PVD
    pub sys_ident: String,
    /// Volume identifier for the PVD
    pub vol_ident: String,
    /// Volume set identifier for the PVD
    pub vol_set_ident: String,
    /// Application identifier for the PVD
    pub app_ident: String,
    /// Injected clock; `None` stamps unspecified dates
    pub clock: Option<Box<dyn Clock>>,
}

impl Default for IsoOptions {
    fn default() -> Self {
        Self {
            interchange_level: 1,
            rock_ridge: None,
            joliet: None,
            enhanced: false,
            udf: false,
            xa: false,
            strict: false,
            sys_ident: String::new(),
            vol_ident: String::from("CDROM"),
            vol_set_ident: String::new(),
            app_ident: String::new(),
            clock: None,
        }
    }
}

impl IsoOptions {
    /// Sets the interchange level (1-4).
    #[must_use]
    pub fn interchange_level(mut self, level: u8) -> Self {
        self.interchange_level = level;
        self
    }

    /// Enables Rock Ridge with the given version string ("1.09"/"1.12").
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidInput`] on unknown versions.
    pub fn rock_ridge(mut self, version: &str) -> Result<Self> {
        self.rock_ridge = Some(RockRidgeVersion::from_str(version)?);
        Ok(self)
    }

    /// Enables Joliet at the given UCS-2 level (1-3).
    #[must_use]
    pub fn joliet(mut self, level: u8) -> Self {
        self.joliet = Some(level.clamp(1, 3));
        self
    }

    /// Enables the UDF 2.60 bridge.
    #[must_use]
    pub fn udf(mut self) -> Self {
        self.udf = true;
        self
    }

    /// Enables XA markers.
    #[must_use]
    pub fn xa(mut self) -> Self {
        self.xa = true;
        self
    }

    /// Enables strict mode.
    #[must_use]
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Sets the volume identifier.
    #[must_use]
    pub fn vol_ident(mut self, ident: &str) -> Self {
        self.vol_ident = ident.into();
        self
    }

    /// Sets the system identifier.
    #[must_use]
    pub fn sys_ident(mut self, ident: &str) -> Self {
        self.sys_ident = ident.into();
        self
    }

    /// Injects a clock.
    #[must_use]
    pub fn clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }
}

/// Optional names for [`Image::add_fp`] and friends.
#[derive(Debug, Clone, Default)]
pub struct AddOptions {
    /// Joliet path to also record
    pub joliet_path: Option<String>,
    /// Rock Ridge name for the ISO record
    pub rr_name: Option<String>,
    /// UDF path to also record
    pub udf_path: Option<String>,
    /// POSIX mode bits for the Rock Ridge `PX` field
    pub file_mode: Option<u32>,
}

impl AddOptions {
    /// Sets the Joliet path.
    #[must_use]
    pub fn joliet(mut self, path: &str) -> Self {
        self.joliet_path = Some(path.into());
        self
    }

    /// Sets the Rock Ridge name.
    #[must_use]
    pub fn rr_name(mut self, name: &str) -> Self {
        self.rr_name = Some(name.into());
        self
    }

    /// Sets the UDF path.
    #[must_use]
    pub fn udf(mut self, path: &str) -> Self {
        self.udf_path = Some(path.into());
        self
    }

    /// Sets the POSIX file mode.
    #[must_use]
    pub fn file_mode(mut self, mode: u32) -> Self {
        self.file_mode = Some(mode);
        self
    }
}

/// Options for [`Image::add_eltorito`].
#[derive(Debug, Clone)]
pub struct EltoritoOptions {
    /// Number of 512-byte virtual sectors to load; defaults to the
    /// boot-load size
    pub sector_count: Option<u16>,
    /// Load segment (0 = traditional 0x7C0)
    pub load_seg: u16,
    /// Boot media emulation ("noemul", "floppy1.2", "floppy1.44",
    /// "floppy2.88", "hdemul")
    pub media_name: String,
    /// Whether the entry is marked bootable
    pub bootable: bool,
    /// Whether to patch a boot info table into the boot file
    pub boot_info_table: bool,
    /// Shorthand for `platform_id = Efi`
    pub efi: bool,
    /// Platform id for the entry
    pub platform_id: Option<PlatformId>,
}

impl Default for EltoritoOptions {
    fn default() -> Self {
        Self {
            sector_count: None,
            load_seg: 0,
            media_name: "noemul".into(),
            bootable: true,
            boot_info_table: false,
            efi: false,
            platform_id: None,
        }
    }
}

/// Identifies exactly one record for queries and single-record mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind<'a> {
    /// An ISO 9660 path of on-disc identifiers
    Iso(&'a str),
    /// An ISO path of Rock Ridge names
    RockRidge(&'a str),
    /// A Joliet path
    Joliet(&'a str),
    /// A UDF path
    Udf(&'a str),
}

/// A link endpoint for [`Image::add_hard_link`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkTarget<'a> {
    /// An ISO 9660 path
    Iso(&'a str),
    /// A Joliet path
    Joliet(&'a str),
    /// A UDF path
    Udf(&'a str),
    /// The El Torito boot catalog (source only)
    BootCatalog,
}

/// A read-only snapshot of one directory record, as returned by
/// [`Image::get_record`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Display name of the record (empty for a root)
    pub name: String,
    /// Rock Ridge name, when present
    pub rr_name: Option<String>,
    /// Whether the record is a directory
    pub is_dir: bool,
    /// Whether the hidden flag is set
    pub hidden: bool,
    /// Payload length in bytes (directory data length for directories)
    pub data_length: u64,
    /// First extent of the record's data
    pub extent: u32,
    /// Rock Ridge symlink target, when the record is a symlink
    pub symlink_target: Option<String>,
}

/// The UDF state of an image.
#[derive(Debug)]
pub(crate) struct UdfState {
    /// Main volume descriptor sequence
    pub(crate) main: UdfDescriptorSet,
    /// Reserve volume descriptor sequence
    pub(crate) reserve: UdfDescriptorSet,
    /// Logical volume integrity descriptor
    pub(crate) lvid: UdfLogicalVolumeIntegrityDescriptor,
    /// File set descriptor
    pub(crate) fsd: UdfFileSetDescriptor,
    /// The UDF directory tree
    pub(crate) tree: UdfTree,
}

/// Extent assignments computed by the layout planner.
#[derive(Debug, Clone, Default)]
pub(crate) struct LayoutExtents {
    pub(crate) boot_record: Option<u32>,
    pub(crate) joliet_vd: Option<u32>,
    pub(crate) enhanced_vd: Option<u32>,
    pub(crate) vpds: Vec<u32>,
    pub(crate) terminator: u32,
    pub(crate) version_vd: Option<u32>,
    pub(crate) udf_bea: Option<u32>,
    pub(crate) iso_pt_le: u32,
    pub(crate) iso_pt_be: u32,
    pub(crate) iso_pt_size: u32,
    pub(crate) joliet_pt_le: Option<u32>,
    pub(crate) joliet_pt_be: Option<u32>,
    pub(crate) joliet_pt_size: u32,
    pub(crate) rr_ce_start: u32,
    pub(crate) catalog: Option<u32>,
    pub(crate) udf_main: u32,
    pub(crate) udf_reserve: u32,
    pub(crate) udf_lvid: u32,
    pub(crate) udf_anchor2: u32,
    pub(crate) udf_fsd: u32,
    pub(crate) udf_fs_term: u32,
    pub(crate) total_size: u64,
}

/// An ISO 9660 image: the root aggregate of all planes.
pub struct Image {
    pub(crate) options: IsoOptions,
    pub(crate) now: IsoTime,
    pub(crate) initialized: bool,
    pub(crate) dirty: bool,
    pub(crate) backing: Backing,
    pub(crate) system_area: Vec<u8>,
    pub(crate) pvd: VolumeDescriptor,
    pub(crate) duplicate_pvds: usize,
    pub(crate) joliet_vd: Option<VolumeDescriptor>,
    pub(crate) enhanced_vd: Option<VolumeDescriptor>,
    pub(crate) vpds: Vec<VolumePartitionDescriptor>,
    pub(crate) version_vd: bool,
    pub(crate) iso_tree: DirTree,
    pub(crate) joliet_tree: Option<DirTree>,
    pub(crate) inodes: Vec<Inode>,
    pub(crate) rr_ce: ContinuationArea,
    pub(crate) rr_moved_name: Vec<u8>,
    pub(crate) rr_moved_rr_name: Vec<u8>,
    pub(crate) rr_moved_dir: Option<NodeId>,
    pub(crate) eltorito: Option<BootCatalog>,
    pub(crate) isohybrid: Option<IsoHybrid>,
    pub(crate) udf: Option<UdfState>,
    pub(crate) space_size: u32,
    pub(crate) extents: LayoutExtents,
    pub(crate) planned: bool,
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("now", &self.now)
            .field("initialized", &self.initialized)
            .field("dirty", &self.dirty)
            .field("system_area", &self.system_area)
            .field("pvd", &self.pvd)
            .field("duplicate_pvds", &self.duplicate_pvds)
            .field("joliet_vd", &self.joliet_vd)
            .field("enhanced_vd", &self.enhanced_vd)
            .field("vpds", &self.vpds)
            .field("version_vd", &self.version_vd)
            .field("iso_tree", &self.iso_tree)
            .field("joliet_tree", &self.joliet_tree)
            .field("inodes", &self.inodes)
            .field("rr_ce", &self.rr_ce)
            .field("rr_moved_name", &self.rr_moved_name)
            .field("rr_moved_rr_name", &self.rr_moved_rr_name)
            .field("rr_moved_dir", &self.rr_moved_dir)
            .field("eltorito", &self.eltorito)
            .field("isohybrid", &self.isohybrid)
            .field("udf", &self.udf)
            .field("space_size", &self.space_size)
            .field("extents", &self.extents)
            .field("planned", &self.planned)
            .finish_non_exhaustive()
    }
}

impl Image {
    /// Creates a new, empty image with the chosen extensions.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidInput`] on out-of-range options.
    pub fn new(options: IsoOptions) -> Result<Self> {
        if !(1..=4).contains(&options.interchange_level) {
            return Err(Error::InvalidInput("interchange level must be 1-4"));
        }
        let now = options
            .clock
            .as_ref()
            .map_or_else(IsoTime::unspecified, |clock| clock.now());
        let now_vd = VolumeDateTime::from_time(&now);
        let now_dr = DirRecordDateTime::from_time(&now);
        let now_udf = UdfTimestamp::from_time(&now);

        let mut pvd = VolumeDescriptor::new(
            VdKind::Primary,
            &options.sys_ident,
            &options.vol_ident,
            now_vd,
        );
        if !options.vol_set_ident.is_empty() {
            crate::types::write_str_field(
                &mut pvd.volume_set_ident,
                options.vol_set_ident.as_bytes(),
            );
        }
        if !options.app_ident.is_empty() {
            crate::types::write_str_field(&mut pvd.application_ident, options.app_ident.as_bytes());
        }
        if options.xa {
            pvd.set_xa();
        }

        let joliet_vd = options.joliet.map(|level| {
            VolumeDescriptor::new(
                VdKind::Joliet(level),
                &options.sys_ident,
                &options.vol_ident,
                now_vd,
            )
        });
        let enhanced_vd = options.enhanced.then(|| {
            VolumeDescriptor::new(
                VdKind::Enhanced,
                &options.sys_ident,
                &options.vol_ident,
                now_vd,
            )
        });

        let udf = options.udf.then(|| {
            let set = UdfDescriptorSet::new(&options.vol_ident, &options.vol_set_ident, now_udf);
            UdfState {
                reserve: set.clone(),
                fsd: UdfFileSetDescriptor {
                    recording_date: now_udf,
                    logical_volume_ident: options.vol_ident.clone(),
                    file_set_ident: options.vol_ident.clone(),
                    root_icb: crate::udf::LongAd::default(),
                },
                lvid: UdfLogicalVolumeIntegrityDescriptor {
                    recording_date: now_udf,
                    unique_id: 16,
                    size_table: 0,
                    num_files: 0,
                    num_dirs: 1,
                },
                tree: UdfTree::new(now_udf),
                main: set,
            }
        });

        let mut image = Self {
            now,
            initialized: true,
            dirty: true,
            backing: Backing::None,
            system_area: vec![0u8; SYSTEM_AREA_SIZE],
            pvd,
            duplicate_pvds: 0,
            joliet_vd,
            enhanced_vd,
            vpds: Vec::new(),
            version_vd: true,
            iso_tree: DirTree::new(now_dr),
            joliet_tree: options.joliet.map(|_| DirTree::new(now_dr)),
            inodes: vec![Inode::empty_sentinel()],
            rr_ce: ContinuationArea::default(),
            rr_moved_name: RR_MOVED_NAME.to_vec(),
            rr_moved_rr_name: b"rr_moved".to_vec(),
            rr_moved_dir: None,
            eltorito: None,
            isohybrid: None,
            udf,
            space_size: 0,
            extents: LayoutExtents::default(),
            planned: false,
            options,
        };
        if let Some(version) = image.options.rock_ridge {
            image.init_rock_ridge_root(version);
        }
        Ok(image)
    }

    /// Parses an image from a read-only stream.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidIso`-class errors on malformed images.
    pub fn open(stream: Box<dyn ReadSeek>) -> Result<Self> {
        crate::parse::parse_image(Backing::Read(RefCell::new(stream)), false)
    }

    /// Parses an image from a read-write stream, enabling
    /// [`Image::modify_file_in_place`].
    ///
    /// # Errors
    ///
    /// Fails with `InvalidIso`-class errors on malformed images.
    pub fn open_fp(stream: Box<dyn ReadWriteSeek>) -> Result<Self> {
        crate::parse::parse_image(Backing::ReadWrite(RefCell::new(stream)), false)
    }

    /// Releases the backing stream and marks the image uninitialized.
    pub fn close(&mut self) {
        self.backing = Backing::None;
        self.initialized = false;
    }

    /// Re-runs the layout planner immediately.
    ///
    /// # Errors
    ///
    /// Propagates planner failures.
    pub fn force_consistency(&mut self) -> Result<()> {
        self.check_initialized()?;
        crate::layout::plan(self)
    }

    /// Writes the image to a new file at `path`.
    ///
    /// # Errors
    ///
    /// Propagates planner and I/O failures.
    pub fn write(&mut self, path: &std::path::Path) -> Result<()> {
        let mut out = std::fs::File::create(path)?;
        self.write_fp(&mut out)
    }

    /// Masters the image into `out`.
    ///
    /// The stream receives the complete image sequentially, starting at
    /// its current position.
    ///
    /// # Errors
    ///
    /// Propagates planner and I/O failures; the stream state is undefined
    /// after an error.
    pub fn write_fp(&mut self, out: &mut dyn Write) -> Result<()> {
        self.check_initialized()?;
        if self.dirty || !self.planned {
            crate::layout::plan(self)?;
        }
        crate::layout::write_image(self, out)
    }

    // ------------------------------------------------------------------
    // Mutation: files and directories
    // ------------------------------------------------------------------

    /// Adds a file whose payload is read from `src` at write time.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidInput`-class errors on bad paths or names.
    pub fn add_fp(
        &mut self,
        src: Box<dyn ReadSeek>,
        length: u64,
        iso_path: &str,
        opts: AddOptions,
    ) -> Result<()> {
        let inode = self.intern_inode(length, |len| Inode::from_stream(src, 0, len));
        self.add_inode_records(inode, length, iso_path, &opts)
    }

    /// Adds a file whose payload is the given bytes.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidInput`-class errors on bad paths or names.
    pub fn add_data(&mut self, data: Vec<u8>, iso_path: &str, opts: AddOptions) -> Result<()> {
        let length = data.len() as u64;
        let inode = self.intern_inode(length, |_| Inode::from_data(data));
        self.add_inode_records(inode, length, iso_path, &opts)
    }

    /// Adds a file from the local filesystem.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidInput`-class errors on bad paths or names and
    /// propagates I/O failures.
    pub fn add_file(
        &mut self,
        local: &std::path::Path,
        iso_path: &str,
        opts: AddOptions,
    ) -> Result<()> {
        let file = std::fs::File::open(local)?;
        let length = file.metadata()?.len();
        self.add_fp(Box::new(file), length, iso_path, opts)
    }

    fn intern_inode(&mut self, length: u64, build: impl FnOnce(u64) -> Inode) -> usize {
        if length == 0 {
            return 0; // the shared zero-length sentinel
        }
        self.inodes.push(build(length));
        self.inodes.len() - 1
    }

    fn add_inode_records(
        &mut self,
        inode: usize,
        length: u64,
        iso_path: &str,
        opts: &AddOptions,
    ) -> Result<()> {
        self.check_initialized()?;
        if length > crate::directory::MAX_EXTENT_RUN && self.options.interchange_level < 3 {
            return Err(Error::InvalidInput(
                "files over 4 GiB require interchange level 3",
            ));
        }
        let (parent, ident) = self.resolve_iso_parent(iso_path)?;
        validate_file_ident(&ident, self.options.interchange_level)?;
        if let Some(rr_name) = &opts.rr_name {
            if self.options.rock_ridge.is_none() {
                return Err(Error::ExtensionAbsent("rock ridge"));
            }
            if rr_name.len() > RR_MAX_FILENAME_LENGTH {
                return Err(Error::IdentifierTooLong {
                    identifier: rr_name.clone(),
                    max_length: RR_MAX_FILENAME_LENGTH,
                });
            }
        } else if self.options.rock_ridge.is_some() {
            return Err(Error::InvalidInput(
                "rr_name is required on a rock ridge image",
            ));
        }
        // Resolve the secondary planes up front so a late failure cannot
        // leave a half-added file behind.
        if let Some(joliet_path) = &opts.joliet_path {
            let tree = self
                .joliet_tree
                .as_ref()
                .ok_or(Error::ExtensionAbsent("joliet"))?;
            let (parent_path, name) = split_parent(joliet_path)?;
            resolve_in_tree(tree, parent_path, true)?;
            encode_ucs2_be(name)?;
        }
        if let Some(udf_path) = &opts.udf_path {
            let udf = self.udf.as_ref().ok_or(Error::ExtensionAbsent("udf"))?;
            let (parent_path, _) = split_parent(udf_path)?;
            udf.tree.resolve(parent_path)?;
        }

        let node = self
            .iso_tree
            .add_file(parent, ident, inode, DirRecordDateTime::from_time(&self.now))?;
        if let Some(version) = self.options.rock_ridge {
            let entry = RockRidgeEntry::new(
                version,
                opts.rr_name.as_ref().map(|name| name.as_bytes()),
                PxEntry::file(opts.file_mode.unwrap_or(0o0100444)),
                DirRecordDateTime::from_time(&self.now),
            );
            self.iso_tree.node_mut(node).rock_ridge = Some(entry);
        }
        self.inodes[inode].add_ref(InodeRef {
            plane: Plane::Iso,
            node,
        });

        if let Some(joliet_path) = &opts.joliet_path {
            let joliet_node = self.add_joliet_file_record(joliet_path, inode)?;
            self.inodes[inode].add_ref(InodeRef {
                plane: Plane::Joliet,
                node: joliet_node,
            });
        }
        if let Some(udf_path) = &opts.udf_path {
            let udf_node = self.add_udf_file_record(udf_path, UdfFileType::File, Some(inode))?;
            self.inodes[inode].add_ref(InodeRef {
                plane: Plane::Udf,
                node: udf_node,
            });
        }
        self.mark_dirty()
    }

    fn add_joliet_file_record(&mut self, joliet_path: &str, inode: usize) -> Result<NodeId> {
        let tree = self
            .joliet_tree
            .as_mut()
            .ok_or(Error::ExtensionAbsent("joliet"))?;
        let (parent, name) = split_parent(joliet_path)?;
        let parent = resolve_in_tree(tree, parent, true)?;
        let ident = encode_ucs2_be(name)?;
        tree.add_file(parent, ident, inode, DirRecordDateTime::from_time(&self.now))
    }

    fn add_udf_file_record(
        &mut self,
        udf_path: &str,
        kind: UdfFileType,
        inode: Option<usize>,
    ) -> Result<usize> {
        let now = UdfTimestamp::from_time(&self.now);
        let udf = self.udf.as_mut().ok_or(Error::ExtensionAbsent("udf"))?;
        let (parent, name) = split_parent(udf_path)?;
        let parent = udf.tree.resolve(parent)?;
        udf.tree.add(parent, name, kind, inode, now)
    }

    /// Adds a directory to the ISO tree (and optionally the Joliet and
    /// UDF trees).
    ///
    /// On a Rock Ridge image, a directory deeper than seven levels is
    /// relocated under the `RR_MOVED` directory with `CL`/`PL`/`RE`
    /// linkage; without Rock Ridge the same depth is an error.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidInput`-class errors on bad paths or names.
    pub fn add_directory(&mut self, iso_path: &str, opts: AddOptions) -> Result<()> {
        self.check_initialized()?;
        let (parent, ident) = self.resolve_iso_parent(iso_path)?;
        validate_dir_ident(&ident, self.options.interchange_level)?;
        if self.options.rock_ridge.is_some() && opts.rr_name.is_none() {
            return Err(Error::InvalidInput(
                "rr_name is required on a rock ridge image",
            ));
        }
        if let Some(joliet_path) = &opts.joliet_path {
            let tree = self
                .joliet_tree
                .as_ref()
                .ok_or(Error::ExtensionAbsent("joliet"))?;
            let (parent_path, name) = split_parent(joliet_path)?;
            resolve_in_tree(tree, parent_path, true)?;
            encode_ucs2_be(name)?;
        }
        if let Some(udf_path) = &opts.udf_path {
            let udf = self.udf.as_ref().ok_or(Error::ExtensionAbsent("udf"))?;
            let (parent_path, _) = split_parent(udf_path)?;
            udf.tree.resolve(parent_path)?;
        }

        let depth = self.iso_tree.depth(parent) + 1;
        let node = if depth > 8 {
            let Some(version) = self.options.rock_ridge else {
                return Err(Error::DirectoryTooDeep);
            };
            self.add_relocated_directory(parent, ident, version, opts.rr_name.as_deref())?
        } else {
            let node = self.iso_tree.add_directory(
                parent,
                ident,
                DirRecordDateTime::from_time(&self.now),
            )?;
            if let Some(version) = self.options.rock_ridge {
                self.attach_dir_rock_ridge(
                    node,
                    version,
                    opts.rr_name.as_deref().map(str::as_bytes),
                    opts.file_mode.unwrap_or(0o040555),
                );
            }
            node
        };
        debug_assert!(self.iso_tree.node(node).is_dir());

        if let Some(joliet_path) = &opts.joliet_path {
            self.add_joliet_directory(joliet_path)?;
        }
        if let Some(udf_path) = &opts.udf_path {
            self.add_udf_file_record(udf_path, UdfFileType::Directory, None)?;
        }
        self.mark_dirty()
    }

    /// Adds a directory that exists only in the Joliet tree.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidInput`-class errors on bad paths or names.
    pub fn add_joliet_directory(&mut self, joliet_path: &str) -> Result<()> {
        self.check_initialized()?;
        let now = DirRecordDateTime::from_time(&self.now);
        let tree = self
            .joliet_tree
            .as_mut()
            .ok_or(Error::ExtensionAbsent("joliet"))?;
        let (parent, name) = split_parent(joliet_path)?;
        let parent = resolve_in_tree(tree, parent, true)?;
        let ident = encode_ucs2_be(name)?;
        tree.add_directory(parent, ident, now)?;
        self.mark_dirty()
    }

    fn attach_dir_rock_ridge(
        &mut self,
        node: NodeId,
        version: RockRidgeVersion,
        rr_name: Option<&[u8] >,
        mode: u32,
    ) {
        let now = DirRecordDateTime::from_time(&self.now);
        let entry = RockRidgeEntry::new(version, rr_name, PxEntry::directory(mode), now);
        let node_ref = self.iso_tree.node_mut(node);
        node_ref.rock_ridge = Some(entry);
        node_ref.rr_dot = Some(RockRidgeEntry::new(
            version,
            None,
            PxEntry::directory(mode),
            now,
        ));
        node_ref.rr_dotdot = Some(RockRidgeEntry::new(
            version,
            None,
            PxEntry::directory(mode),
            now,
        ));
    }

    fn init_rock_ridge_root(&mut self, version: RockRidgeVersion) {
        let now = DirRecordDateTime::from_time(&self.now);
        let root = self.iso_tree.root();
        let mut dot = RockRidgeEntry::new(version, None, PxEntry::directory(0o040555), now);
        dot.sp = Some(if self.options.xa { 14 } else { 0 });
        dot.er = true;
        self.iso_tree.node_mut(root).rr_dot = Some(dot);
        self.iso_tree.node_mut(root).rr_dotdot = Some(RockRidgeEntry::new(
            version,
            None,
            PxEntry::directory(0o040555),
            now,
        ));
    }

    fn ensure_rr_moved(&mut self, version: RockRidgeVersion) -> Result<NodeId> {
        if let Some(dir) = self.rr_moved_dir {
            return Ok(dir);
        }
        let root = self.iso_tree.root();
        let ident = self.rr_moved_name.clone();
        let node = self
            .iso_tree
            .add_directory(root, ident, DirRecordDateTime::from_time(&self.now))?;
        let rr_name = self.rr_moved_rr_name.clone();
        self.attach_dir_rock_ridge(node, version, Some(&rr_name), 0o040555);
        self.rr_moved_dir = Some(node);
        Ok(node)
    }

    fn add_relocated_directory(
        &mut self,
        logical_parent: NodeId,
        ident: Vec<u8>,
        version: RockRidgeVersion,
        rr_name: Option<&str>,
    ) -> Result<NodeId> {
        let rr_moved = self.ensure_rr_moved(version)?;
        let now = DirRecordDateTime::from_time(&self.now);

        // The directory physically lives under RR_MOVED.
        let moved = self
            .iso_tree
            .add_directory(rr_moved, ident.clone(), now)?;
        self.attach_dir_rock_ridge(
            moved,
            version,
            rr_name.map(str::as_bytes),
            0o040555,
        );
        if let Some(entry) = &mut self.iso_tree.node_mut(moved).rock_ridge {
            entry.relocated = true;
        }
        // The dotdot of the moved directory carries PL back to the
        // logical parent (extent patched by the planner).
        if let Some(dotdot) = &mut self.iso_tree.node_mut(moved).rr_dotdot {
            dotdot.pl_extent = Some(0);
        }
        self.iso_tree.node_mut(moved).logical_parent = Some(logical_parent);

        // A zero-length placeholder with CL sits at the logical location.
        let placeholder = self
            .iso_tree
            .add_file(logical_parent, ident, 0, now)?;
        let node_ref = self.iso_tree.node_mut(placeholder);
        node_ref.kind = NodeKind::RelocationPlaceholder;
        node_ref.relocation_target = Some(moved);
        let mut entry = RockRidgeEntry::new(
            version,
            rr_name.map(str::as_bytes),
            PxEntry::directory(0o040555),
            now,
        );
        entry.cl_extent = Some(0); // patched by the planner
        node_ref.rock_ridge = Some(entry);
        Ok(moved)
    }

    /// Removes a file (all of its names across all planes).
    ///
    /// # Errors
    ///
    /// Fails with [`Error::NotFound`] on unresolved paths and
    /// [`Error::WrongRecordType`] on directories.
    pub fn rm_file(&mut self, path: PathKind<'_>) -> Result<()> {
        self.check_initialized()?;
        let (plane, node) = self.resolve(path)?;
        let inode = match (plane, node) {
            (Plane::Iso, node) => {
                if self.iso_tree.node(node).is_dir() {
                    return Err(Error::WrongRecordType(path_display(path)));
                }
                self.iso_tree.node(node).inode
            }
            (Plane::Joliet, node) => {
                let tree = self.joliet_tree.as_ref().expect("resolved in joliet");
                if tree.node(node).is_dir() {
                    return Err(Error::WrongRecordType(path_display(path)));
                }
                tree.node(node).inode
            }
            (Plane::Udf, node) => {
                let udf = self.udf.as_ref().expect("resolved in udf");
                if udf.tree.node(node).kind == UdfFileType::Directory {
                    return Err(Error::WrongRecordType(path_display(path)));
                }
                udf.tree.node(node).inode
            }
            (Plane::BootCatalog, _) => return Err(Error::InvalidInput("cannot remove the boot catalog")),
        };
        let Some(inode) = inode else {
            // A symlink or other payloadless record: drop just this name.
            return self.remove_record(plane, node);
        };
        // Drop every name that references the payload.
        let refs = self.inodes[inode].refs.clone();
        for r in refs {
            self.remove_record(r.plane, r.node)?;
        }
        self.inodes[inode].refs.clear();
        self.mark_dirty()
    }

    fn remove_record(&mut self, plane: Plane, node: usize) -> Result<()> {
        match plane {
            Plane::Iso => {
                let inode = self.iso_tree.node(node).inode;
                self.iso_tree.remove(node)?;
                if let Some(inode) = inode {
                    self.inodes[inode].remove_ref(InodeRef { plane, node });
                }
            }
            Plane::Joliet => {
                let tree = self.joliet_tree.as_mut().ok_or(Error::ExtensionAbsent("joliet"))?;
                let inode = tree.node(node).inode;
                tree.remove(node)?;
                if let Some(inode) = inode {
                    self.inodes[inode].remove_ref(InodeRef { plane, node });
                }
            }
            Plane::Udf => {
                let udf = self.udf.as_mut().ok_or(Error::ExtensionAbsent("udf"))?;
                let inode = udf.tree.node(node).inode;
                udf.tree.remove(node)?;
                if let Some(inode) = inode {
                    self.inodes[inode].remove_ref(InodeRef { plane, node });
                }
            }
            Plane::BootCatalog => {
                return Err(Error::InvalidInput("cannot remove the boot catalog record"));
            }
        }
        self.mark_dirty()
    }

    /// Removes an empty directory from the ISO tree (and optionally its
    /// Joliet/UDF counterparts named in `opts`).
    ///
    /// # Errors
    ///
    /// Fails with [`Error::DirectoryNotEmpty`] when children remain.
    pub fn rm_directory(&mut self, iso_path: &str, opts: AddOptions) -> Result<()> {
        self.check_initialized()?;
        let node = self.resolve_iso(iso_path, false)?;
        if !self.iso_tree.node(node).is_dir() {
            return Err(Error::WrongRecordType(iso_path.into()));
        }
        self.iso_tree.remove(node)?;
        if self.rr_moved_dir == Some(node) {
            self.rr_moved_dir = None;
        }
        if let Some(joliet_path) = &opts.joliet_path {
            self.rm_joliet_directory(joliet_path)?;
        }
        if let Some(udf_path) = &opts.udf_path {
            let udf = self.udf.as_mut().ok_or(Error::ExtensionAbsent("udf"))?;
            let node = udf.tree.resolve(udf_path)?;
            udf.tree.remove(node)?;
        }
        self.mark_dirty()
    }

    /// Removes an empty directory from the Joliet tree.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::DirectoryNotEmpty`] when children remain.
    pub fn rm_joliet_directory(&mut self, joliet_path: &str) -> Result<()> {
        self.check_initialized()?;
        let tree = self
            .joliet_tree
            .as_mut()
            .ok_or(Error::ExtensionAbsent("joliet"))?;
        let node = resolve_in_tree(tree, joliet_path, true)?;
        tree.remove(node)?;
        self.mark_dirty()
    }

    /// Adds another name for an existing payload.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidInput`-class errors on bad combinations.
    pub fn add_hard_link(
        &mut self,
        old: LinkTarget<'_>,
        new: LinkTarget<'_>,
        rr_name: Option<&str>,
    ) -> Result<()> {
        self.check_initialized()?;
        let inode = match old {
            LinkTarget::Iso(path) => {
                let node = self.resolve_iso(path, false)?;
                self.iso_tree
                    .node(node)
                    .inode
                    .ok_or(Error::WrongRecordType(path.into()))?
            }
            LinkTarget::Joliet(path) => {
                let tree = self.joliet_tree.as_ref().ok_or(Error::ExtensionAbsent("joliet"))?;
                let node = resolve_in_tree(tree, path, true)?;
                tree.node(node)
                    .inode
                    .ok_or(Error::WrongRecordType(path.into()))?
            }
            LinkTarget::Udf(path) => {
                let udf = self.udf.as_ref().ok_or(Error::ExtensionAbsent("udf"))?;
                let node = udf.tree.resolve(path)?;
                udf.tree
                    .node(node)
                    .inode
                    .ok_or(Error::WrongRecordType(path.into()))?
            }
            LinkTarget::BootCatalog => {
                let catalog = self
                    .eltorito
                    .as_ref()
                    .ok_or(Error::ExtensionAbsent("el torito"))?;
                catalog
                    .inode
                    .ok_or(Error::InvalidInput("boot catalog has no payload yet"))?
            }
        };
        let length = self.inodes[inode].length;
        match new {
            LinkTarget::Iso(path) => {
                let (parent, ident) = self.resolve_iso_parent(path)?;
                validate_file_ident(&ident, self.options.interchange_level)?;
                let node = self.iso_tree.add_file(
                    parent,
                    ident,
                    inode,
                    DirRecordDateTime::from_time(&self.now),
                )?;
                if let Some(version) = self.options.rock_ridge {
                    let entry = RockRidgeEntry::new(
                        version,
                        rr_name.map(str::as_bytes),
                        PxEntry::file(0o0100444),
                        DirRecordDateTime::from_time(&self.now),
                    );
                    self.iso_tree.node_mut(node).rock_ridge = Some(entry);
                }
                self.inodes[inode].add_ref(InodeRef { plane: Plane::Iso, node });
            }
            LinkTarget::Joliet(path) => {
                let node = self.add_joliet_file_record(path, inode)?;
                self.inodes[inode].add_ref(InodeRef {
                    plane: Plane::Joliet,
                    node,
                });
            }
            LinkTarget::Udf(path) => {
                let node = self.add_udf_file_record(path, UdfFileType::File, Some(inode))?;
                self.inodes[inode].add_ref(InodeRef { plane: Plane::Udf, node });
            }
            LinkTarget::BootCatalog => {
                return Err(Error::InvalidInput("boot catalog cannot be a link target"));
            }
        }
        debug_assert_eq!(self.inodes[inode].length, length);
        self.mark_dirty()
    }

    /// Removes a single name without touching the payload's other names.
    ///
    /// The payload itself is freed when its last name goes away.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::NotFound`] on unresolved paths.
    pub fn rm_hard_link(&mut self, path: PathKind<'_>) -> Result<()> {
        self.check_initialized()?;
        let (plane, node) = self.resolve(path)?;
        match plane {
            Plane::Iso if self.iso_tree.node(node).is_dir() => {
                return Err(Error::WrongRecordType(path_display(path)));
            }
            _ => {}
        }
        self.remove_record(plane, node)
    }

    /// Adds a symbolic link.
    ///
    /// The ISO record is a zero-length file; the Rock Ridge overlay
    /// stores `rr_target` as `SL` components, and the UDF plane (when
    /// `udf_path` is given) stores a component-list payload for
    /// `udf_target`. When both are present the logical targets must
    /// match.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidInput`-class errors on bad combinations.
    pub fn add_symlink(
        &mut self,
        iso_path: &str,
        rr_name: &str,
        rr_target: &str,
        opts: AddOptions,
    ) -> Result<()> {
        self.check_initialized()?;
        let Some(version) = self.options.rock_ridge else {
            return Err(Error::ExtensionAbsent("rock ridge"));
        };
        let (parent, ident) = self.resolve_iso_parent(iso_path)?;
        validate_file_ident(&ident, self.options.interchange_level)?;
        let now = DirRecordDateTime::from_time(&self.now);
        let node = self.iso_tree.add_file(parent, ident, 0, now)?;
        let mut entry = RockRidgeEntry::new(
            version,
            Some(rr_name.as_bytes()),
            PxEntry {
                mode: 0o0120555,
                links: 1,
                uid: 0,
                gid: 0,
                serial: 0,
            },
            now,
        );
        entry.symlink_components = symlink_components_for_target(rr_target);
        self.iso_tree.node_mut(node).rock_ridge = Some(entry);
        self.iso_tree.node_mut(node).inode = None;
        self.inodes[0].add_ref(InodeRef { plane: Plane::Iso, node });

        if let Some(joliet_path) = &opts.joliet_path {
            self.add_joliet_file_record(joliet_path, 0)?;
        }
        if let Some(udf_path) = &opts.udf_path {
            if self.udf.is_none() {
                return Err(Error::ExtensionAbsent("udf"));
            }
            let payload = encode_symlink(&udf_symlink_components(rr_target))?;
            let length = payload.len() as u64;
            let inode = self.intern_inode(length, |_| Inode::from_data(payload));
            let udf_node = self.add_udf_file_record(udf_path, UdfFileType::Symlink, Some(inode))?;
            self.inodes[inode].add_ref(InodeRef {
                plane: Plane::Udf,
                node: udf_node,
            });
        }
        self.mark_dirty()
    }

    // ------------------------------------------------------------------
    // Mutation: El Torito, isohybrid, PVD
    // ------------------------------------------------------------------

    /// Makes the image bootable via El Torito.
    ///
    /// `bootfile_path` must name an existing ISO file; `bootcat_path` is
    /// where the synthetic catalog record appears. Calling this again
    /// appends a section entry instead of replacing the catalog.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidInput`-class errors on bad parameters.
    pub fn add_eltorito(
        &mut self,
        bootfile_path: &str,
        bootcat_path: Option<&str>,
        opts: EltoritoOptions,
    ) -> Result<()> {
        self.check_initialized()?;
        let boot_node = self.resolve_iso(bootfile_path, false)?;
        let inode = self
            .iso_tree
            .node(boot_node)
            .inode
            .ok_or(Error::WrongRecordType(bootfile_path.into()))?;
        let media_type = BootMediaType::from_name(&opts.media_name)?;
        if let Some(required) = media_type.required_size() {
            if self.inodes[inode].length != required {
                return Err(Error::InvalidInput(
                    "boot file size does not match the emulated media",
                ));
            }
        }
        let sector_count = opts.sector_count.unwrap_or(4);
        let platform_id = opts.platform_id.unwrap_or(if opts.efi {
            PlatformId::Efi
        } else {
            PlatformId::X86
        });

        let mut entry = BootEntry::new(media_type, sector_count);
        entry.bootable = opts.bootable;
        entry.load_segment = opts.load_seg;
        entry.inode = Some(inode);
        entry.boot_info_table = opts.boot_info_table;
        if opts.boot_info_table && self.inodes[inode].length < 64 {
            return Err(Error::InvalidInput(
                "boot file too small for a boot info table",
            ));
        }

        if let Some(catalog) = &mut self.eltorito {
            catalog.add_section_entry(platform_id, entry);
            return self.mark_dirty();
        }

        let mut catalog = BootCatalog::new(platform_id, media_type, sector_count);
        catalog.initial = entry;
        // The catalog appears as a synthetic file; its inode is filled
        // with the serialized catalog at write time.
        if let Some(bootcat_path) = bootcat_path {
            let (parent, ident) = self.resolve_iso_parent(bootcat_path)?;
            validate_file_ident(&ident, self.options.interchange_level)?;
            // The payload is regenerated from the catalog at write time;
            // only the length matters here.
            let cat_inode = {
                let mut inode = Inode::from_data(Vec::new());
                inode.length = SECTOR_SIZE as u64;
                self.inodes.push(inode);
                self.inodes.len() - 1
            };
            let node = self.iso_tree.add_file(
                parent,
                ident,
                cat_inode,
                DirRecordDateTime::from_time(&self.now),
            )?;
            if let Some(version) = self.options.rock_ridge {
                let name = bootcat_path.rsplit('/').next().unwrap_or("boot.cat").to_lowercase();
                let entry = RockRidgeEntry::new(
                    version,
                    Some(name.as_bytes()),
                    PxEntry::file(0o0100444),
                    DirRecordDateTime::from_time(&self.now),
                );
                self.iso_tree.node_mut(node).rock_ridge = Some(entry);
            }
            self.inodes[cat_inode].add_ref(InodeRef { plane: Plane::Iso, node });
            catalog.inode = Some(cat_inode);
        }
        self.eltorito = Some(catalog);
        self.mark_dirty()
    }

    /// Removes the El Torito catalog (the boot files stay).
    ///
    /// # Errors
    ///
    /// Fails with [`Error::ExtensionAbsent`] when no catalog exists.
    pub fn rm_eltorito(&mut self) -> Result<()> {
        self.check_initialized()?;
        let catalog = self
            .eltorito
            .take()
            .ok_or(Error::ExtensionAbsent("el torito"))?;
        if let Some(inode) = catalog.inode {
            let refs = self.inodes[inode].refs.clone();
            for r in refs {
                self.remove_record(r.plane, r.node)?;
            }
            self.inodes[inode].refs.clear();
        }
        self.mark_dirty()
    }

    /// Adds an isohybrid MBR (and, in EFI mode, a hybrid GPT).
    ///
    /// Requires an El Torito catalog whose default entry points at an
    /// isohybrid-capable boot file.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidInput`-class errors when prerequisites are
    /// missing.
    pub fn add_isohybrid(&mut self, mac: bool, efi: bool) -> Result<()> {
        self.check_initialized()?;
        let catalog = self
            .eltorito
            .as_ref()
            .ok_or(Error::InvalidInput("isohybrid requires El Torito"))?;
        let inode = catalog
            .initial
            .inode
            .ok_or(Error::InvalidInput("boot entry has no payload"))?;
        let mut head = vec![0u8; 0x44];
        self.read_inode_prefix(inode, &mut head)?;
        crate::isohybrid::check_boot_file(&head, catalog.initial.sector_count)?;
        self.isohybrid = Some(IsoHybrid::new(mac, efi));
        self.mark_dirty()
    }

    /// Removes the isohybrid structures.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::ExtensionAbsent`] when none exist.
    pub fn rm_isohybrid(&mut self) -> Result<()> {
        self.check_initialized()?;
        if self.isohybrid.take().is_none() {
            return Err(Error::ExtensionAbsent("isohybrid"));
        }
        self.mark_dirty()
    }

    /// Appends a duplicate PVD.
    ///
    /// # Errors
    ///
    /// Propagates planner failures in strict mode.
    pub fn duplicate_pvd(&mut self) -> Result<()> {
        self.check_initialized()?;
        self.duplicate_pvds += 1;
        self.mark_dirty()
    }

    /// Sets the hidden flag on a record.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::NotFound`] on unresolved paths.
    pub fn set_hidden(&mut self, path: PathKind<'_>) -> Result<()> {
        self.set_hidden_flag(path, true)
    }

    /// Clears the hidden flag on a record.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::NotFound`] on unresolved paths.
    pub fn clear_hidden(&mut self, path: PathKind<'_>) -> Result<()> {
        self.set_hidden_flag(path, false)
    }

    fn set_hidden_flag(&mut self, path: PathKind<'_>, hidden: bool) -> Result<()> {
        self.check_initialized()?;
        let (plane, node) = self.resolve(path)?;
        match plane {
            Plane::Iso => {
                let flags = &mut self.iso_tree.node_mut(node).flags;
                flags.set(FileFlags::HIDDEN, hidden);
            }
            Plane::Joliet => {
                let tree = self.joliet_tree.as_mut().expect("resolved in joliet");
                tree.node_mut(node).flags.set(FileFlags::HIDDEN, hidden);
            }
            Plane::Udf => {
                let udf = self.udf.as_mut().expect("resolved in udf");
                udf.tree.node_mut(node).hidden = hidden;
            }
            Plane::BootCatalog => {
                return Err(Error::InvalidInput("boot catalog cannot be hidden"));
            }
        }
        self.mark_dirty()
    }

    /// Renames the Rock Ridge relocation directory (default `RR_MOVED`).
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidInput`] after the directory exists.
    pub fn set_relocated_name(&mut self, iso_name: &str, rr_name: &str) -> Result<()> {
        self.check_initialized()?;
        if self.rr_moved_dir.is_some() {
            return Err(Error::InvalidInput(
                "relocation directory name must be set before any deep directory",
            ));
        }
        validate_dir_ident(iso_name.as_bytes(), self.options.interchange_level)?;
        self.rr_moved_name = iso_name.as_bytes().to_vec();
        self.rr_moved_rr_name = rr_name.as_bytes().to_vec();
        Ok(())
    }

    /// Rewrites a file's payload directly in the backing stream without
    /// re-mastering.
    ///
    /// The new contents must fit in the extents the file already
    /// occupies; the stream must have been opened read-write.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidInput`-class errors on size or mode violations.
    pub fn modify_file_in_place(&mut self, data: &[u8], path: PathKind<'_>) -> Result<()> {
        self.check_initialized()?;
        let (plane, node) = self.resolve(path)?;
        let inode = match plane {
            Plane::Iso => self.iso_tree.node(node).inode,
            Plane::Joliet => self
                .joliet_tree
                .as_ref()
                .expect("resolved in joliet")
                .node(node)
                .inode,
            Plane::Udf => self.udf.as_ref().expect("resolved in udf").tree.node(node).inode,
            Plane::BootCatalog => None,
        }
        .ok_or(Error::WrongRecordType(path_display(path)))?;

        let old_blocks = self.inodes[inode].block_count();
        let new_blocks = crate::types::sectors_for_size(data.len() as u64);
        if new_blocks != old_blocks {
            return Err(Error::InvalidInput(
                "modify_file_in_place must not change the extent count",
            ));
        }
        let extent = self.inodes[inode].extent;
        // Write the payload, zero-padding the final block.
        let mut padded = data.to_vec();
        padded.resize(usize::try_from(new_blocks).expect("fits") * SECTOR_SIZE, 0);
        self.backing
            .write_all_at(u64::from(extent) * SECTOR_SIZE as u64, &padded)?;
        self.inodes[inode].length = data.len() as u64;
        self.inodes[inode].source = InodeSource::Image {
            offset: u64::from(extent) * SECTOR_SIZE as u64,
        };

        // Rewrite the size fields of every referencing directory record by
        // re-serializing the affected directory data in place.
        let refs = self.inodes[inode].refs.clone();
        for r in refs {
            match r.plane {
                Plane::Iso => {
                    let parent = self.iso_tree.node(r.node).parent.expect("files have parents");
                    let data = crate::layout::serialize_dir_data(self, Plane::Iso, parent)?;
                    let extent = self.iso_tree.node(parent).extent;
                    self.backing
                        .write_all_at(u64::from(extent) * SECTOR_SIZE as u64, &data)?;
                }
                Plane::Joliet => {
                    let parent = self
                        .joliet_tree
                        .as_ref()
                        .expect("ref in joliet")
                        .node(r.node)
                        .parent
                        .expect("files have parents");
                    let data = crate::layout::serialize_dir_data(self, Plane::Joliet, parent)?;
                    let extent = self
                        .joliet_tree
                        .as_ref()
                        .expect("ref in joliet")
                        .node(parent)
                        .extent;
                    self.backing
                        .write_all_at(u64::from(extent) * SECTOR_SIZE as u64, &data)?;
                }
                Plane::Udf => {
                    let fe_extent = self
                        .udf
                        .as_ref()
                        .expect("ref in udf")
                        .tree
                        .node(r.node)
                        .fe_extent;
                    let sector = crate::layout::serialize_udf_file_entry(self, r.node)?;
                    self.backing
                        .write_all_at(u64::from(fe_extent) * SECTOR_SIZE as u64, &sector)?;
                }
                Plane::BootCatalog => {}
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Looks up one record.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::NotFound`] on unresolved paths.
    pub fn get_record(&self, path: PathKind<'_>) -> Result<Record> {
        self.check_initialized()?;
        let (plane, node) = self.resolve(path)?;
        Ok(self.record_snapshot(plane, node))
    }

    fn record_snapshot(&self, plane: Plane, node: usize) -> Record {
        match plane {
            Plane::Iso => {
                let n = self.iso_tree.node(node);
                Record {
                    name: ident_to_string(&n.ident, false),
                    rr_name: n
                        .rock_ridge
                        .as_ref()
                        .and_then(RockRidgeEntry::name)
                        .map(|name| String::from_utf8_lossy(name).into_owned()),
                    is_dir: n.is_dir(),
                    hidden: n.is_hidden(),
                    data_length: match n.inode {
                        Some(inode) => self.inodes[inode].length,
                        None => n.data_length,
                    },
                    extent: match n.inode {
                        Some(inode) if inode != 0 => self.inodes[inode].extent,
                        _ => n.extent,
                    },
                    symlink_target: n
                        .rock_ridge
                        .as_ref()
                        .and_then(RockRidgeEntry::symlink_target),
                }
            }
            Plane::Joliet => {
                let tree = self.joliet_tree.as_ref().expect("resolved in joliet");
                let n = tree.node(node);
                Record {
                    name: ident_to_string(&n.ident, true),
                    rr_name: None,
                    is_dir: n.is_dir(),
                    hidden: n.is_hidden(),
                    data_length: match n.inode {
                        Some(inode) => self.inodes[inode].length,
                        None => n.data_length,
                    },
                    extent: match n.inode {
                        Some(inode) if inode != 0 => self.inodes[inode].extent,
                        _ => n.extent,
                    },
                    symlink_target: None,
                }
            }
            Plane::Udf => {
                let udf = self.udf.as_ref().expect("resolved in udf");
                let n = udf.tree.node(node);
                let symlink_target = (n.kind == UdfFileType::Symlink)
                    .then(|| {
                        n.inode.and_then(|inode| {
                            let mut payload = Vec::new();
                            self.copy_inode_payload(inode, &mut payload).ok()?;
                            crate::udf::entries::decode_symlink(&payload)
                                .ok()
                                .map(|components| symlink_target_string(&components))
                        })
                    })
                    .flatten();
                Record {
                    name: n.name.clone(),
                    rr_name: None,
                    is_dir: n.kind == UdfFileType::Directory,
                    hidden: n.hidden,
                    data_length: n
                        .inode
                        .map_or(u64::from(n.fid_data_len), |inode| self.inodes[inode].length),
                    extent: n
                        .inode
                        .map_or(n.fid_extent, |inode| self.inodes[inode].extent),
                    symlink_target,
                }
            }
            Plane::BootCatalog => Record {
                name: String::new(),
                rr_name: None,
                is_dir: false,
                hidden: false,
                data_length: SECTOR_SIZE as u64,
                extent: self.eltorito.as_ref().map_or(0, |catalog| catalog.extent),
                symlink_target: None,
            },
        }
    }

    /// Lists the children of a directory, in directory-record order.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::NotFound`] or [`Error::WrongRecordType`].
    pub fn list_children(&self, path: PathKind<'_>) -> Result<Vec<Record>> {
        self.check_initialized()?;
        let (plane, node) = self.resolve(path)?;
        match plane {
            Plane::Iso => {
                if !self.iso_tree.node(node).is_dir() {
                    return Err(Error::WrongRecordType(path_display(path)));
                }
                Ok(self
                    .iso_tree
                    .node(node)
                    .children
                    .iter()
                    .map(|&child| self.record_snapshot(Plane::Iso, child))
                    .collect())
            }
            Plane::Joliet => {
                let tree = self.joliet_tree.as_ref().expect("resolved in joliet");
                if !tree.node(node).is_dir() {
                    return Err(Error::WrongRecordType(path_display(path)));
                }
                Ok(tree
                    .node(node)
                    .children
                    .iter()
                    .map(|&child| self.record_snapshot(Plane::Joliet, child))
                    .collect())
            }
            Plane::Udf => {
                let udf = self.udf.as_ref().expect("resolved in udf");
                if udf.tree.node(node).kind != UdfFileType::Directory {
                    return Err(Error::WrongRecordType(path_display(path)));
                }
                Ok(udf
                    .tree
                    .node(node)
                    .children
                    .iter()
                    .map(|&child| self.record_snapshot(Plane::Udf, child))
                    .collect())
            }
            Plane::BootCatalog => Err(Error::WrongRecordType(path_display(path))),
        }
    }

    /// Walks the tree depth-first from `path`, yielding
    /// `(dirpath, directories, files)` triples.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::NotFound`] or [`Error::WrongRecordType`].
    pub fn walk(&self, path: PathKind<'_>) -> Result<Vec<(String, Vec<String>, Vec<String>)>> {
        self.check_initialized()?;
        let (plane, start) = self.resolve(path)?;
        let joliet = plane == Plane::Joliet;
        let rockridge = matches!(path, PathKind::RockRidge(_));
        let tree = match plane {
            Plane::Iso => &self.iso_tree,
            Plane::Joliet => self.joliet_tree.as_ref().expect("resolved in joliet"),
            _ => return Err(Error::InvalidInput("walk is not supported on this plane")),
        };
        if !tree.node(start).is_dir() {
            return Err(Error::WrongRecordType(path_display(path)));
        }
        let mut out = Vec::new();
        let mut stack = vec![start];
        while let Some(dir) = stack.pop() {
            let mut dirs = Vec::new();
            let mut files = Vec::new();
            for &child in &tree.node(dir).children {
                let node = tree.node(child);
                let name = if rockridge {
                    node.rock_ridge
                        .as_ref()
                        .and_then(RockRidgeEntry::name)
                        .map_or_else(
                            || ident_to_string(&node.ident, joliet),
                            |n| String::from_utf8_lossy(n).into_owned(),
                        )
                } else {
                    ident_to_string(&node.ident, joliet)
                };
                if node.is_dir() {
                    dirs.push(name);
                    stack.push(child);
                } else {
                    files.push(name);
                }
            }
            out.push((tree.full_path(dir, rockridge, joliet), dirs, files));
        }
        Ok(out)
    }

    /// Reads a file's entire payload into memory.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::NotFound`] or [`Error::WrongRecordType`].
    pub fn get_file_from_iso(&self, path: PathKind<'_>) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.get_file_from_iso_fp(path, &mut out)?;
        Ok(out)
    }

    /// Streams a file's payload into `out`.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::NotFound`] or [`Error::WrongRecordType`].
    pub fn get_file_from_iso_fp(&self, path: PathKind<'_>, out: &mut dyn Write) -> Result<u64> {
        self.check_initialized()?;
        let inode = self.resolve_readable_inode(path)?;
        self.copy_inode_payload(inode, out)
    }

    pub(crate) fn copy_inode_payload(&self, inode: usize, out: &mut dyn Write) -> Result<u64> {
        let node = &self.inodes[inode];
        match &node.source {
            InodeSource::Image { offset } => {
                self.backing.copy_to(*offset, node.length, out, COPY_BUFFER_SIZE)
            }
            _ => crate::inode::copy_inode(node, out, COPY_BUFFER_SIZE),
        }
    }

    fn resolve_readable_inode(&self, path: PathKind<'_>) -> Result<usize> {
        let (plane, node) = self.resolve(path)?;
        match plane {
            Plane::Iso => {
                let n = self.iso_tree.node(node);
                if n.is_dir() {
                    return Err(Error::WrongRecordType(path_display(path)));
                }
                n.inode.ok_or(Error::WrongRecordType(path_display(path)))
            }
            Plane::Joliet => {
                let tree = self.joliet_tree.as_ref().expect("resolved in joliet");
                let n = tree.node(node);
                if n.is_dir() {
                    return Err(Error::WrongRecordType(path_display(path)));
                }
                n.inode.ok_or(Error::WrongRecordType(path_display(path)))
            }
            Plane::Udf => {
                let udf = self.udf.as_ref().expect("resolved in udf");
                let n = udf.tree.node(node);
                if n.kind == UdfFileType::Directory {
                    return Err(Error::WrongRecordType(path_display(path)));
                }
                if n.unreadable {
                    return Err(Error::InvalidInput(
                        "file entry is unreadable (zero-byte UDF entry)",
                    ));
                }
                n.inode.ok_or(Error::WrongRecordType(path_display(path)))
            }
            Plane::BootCatalog => Err(Error::WrongRecordType(path_display(path))),
        }
    }

    /// Opens a file for incremental reading.
    ///
    /// The returned reader borrows the image, so the image cannot be
    /// mutated while a reader is live.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::NotFound`] or [`Error::WrongRecordType`].
    pub fn open_file_from_iso(&self, path: PathKind<'_>) -> Result<IsoFileReader<'_>> {
        self.check_initialized()?;
        let inode = self.resolve_readable_inode(path)?;
        Ok(IsoFileReader {
            image: self,
            inode,
            pos: 0,
            length: self.inodes[inode].length,
        })
    }

    /// Builds the `/`-joined full path of the record `path` resolves to.
    ///
    /// With `rockridge` set, Rock Ridge alternate names are used for
    /// components that have them.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::NotFound`] on unresolved paths.
    pub fn full_path_from_dirrecord(&self, path: PathKind<'_>, rockridge: bool) -> Result<String> {
        self.check_initialized()?;
        let (plane, node) = self.resolve(path)?;
        match plane {
            Plane::Iso => Ok(self.iso_tree.full_path(node, rockridge, false)),
            Plane::Joliet => Ok(self
                .joliet_tree
                .as_ref()
                .expect("resolved in joliet")
                .full_path(node, false, true)),
            Plane::Udf => {
                let udf = self.udf.as_ref().expect("resolved in udf");
                let mut parts = Vec::new();
                let mut cursor = node;
                while let Some(parent) = udf.tree.node(cursor).parent {
                    parts.push(udf.tree.node(cursor).name.clone());
                    cursor = parent;
                }
                parts.reverse();
                Ok(format!("/{}", parts.join("/")))
            }
            Plane::BootCatalog => Err(Error::WrongRecordType(path_display(path))),
        }
    }

    /// Returns the POSIX mode bits of a record's Rock Ridge `PX` field.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::ExtensionAbsent`] without Rock Ridge.
    pub fn file_mode(&self, path: PathKind<'_>) -> Result<Option<u32>> {
        self.check_initialized()?;
        if self.options.rock_ridge.is_none() {
            return Err(Error::ExtensionAbsent("rock ridge"));
        }
        let (plane, node) = self.resolve(path)?;
        if plane != Plane::Iso {
            return Ok(None);
        }
        Ok(self
            .iso_tree
            .node(node)
            .rock_ridge
            .as_ref()
            .and_then(|entry| entry.px.map(|px| px.mode)))
    }

    /// Whether the image carries Rock Ridge.
    #[must_use]
    pub fn has_rock_ridge(&self) -> bool {
        self.options.rock_ridge.is_some()
    }

    /// Whether the image carries a Joliet tree.
    #[must_use]
    pub fn has_joliet(&self) -> bool {
        self.joliet_tree.is_some()
    }

    /// Whether the image carries a UDF bridge.
    #[must_use]
    pub fn has_udf(&self) -> bool {
        self.udf.is_some()
    }

    /// The volume space size reported by the PVD after the last plan.
    #[must_use]
    pub fn space_size(&self) -> u32 {
        self.space_size
    }

    // ------------------------------------------------------------------
    // Resolution plumbing
    // ------------------------------------------------------------------

    fn check_initialized(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(Error::NotInitialized)
        }
    }

    fn mark_dirty(&mut self) -> Result<()> {
        self.dirty = true;
        self.planned = false;
        if self.options.strict {
            crate::layout::plan(self)?;
        }
        Ok(())
    }

    fn resolve(&self, path: PathKind<'_>) -> Result<(Plane, usize)> {
        match path {
            PathKind::Iso(p) => Ok((Plane::Iso, self.resolve_iso(p, false)?)),
            PathKind::RockRidge(p) => {
                if self.options.rock_ridge.is_none() {
                    return Err(Error::ExtensionAbsent("rock ridge"));
                }
                Ok((Plane::Iso, self.resolve_iso(p, true)?))
            }
            PathKind::Joliet(p) => {
                let tree = self
                    .joliet_tree
                    .as_ref()
                    .ok_or(Error::ExtensionAbsent("joliet"))?;
                Ok((Plane::Joliet, resolve_in_tree(tree, p, true)?))
            }
            PathKind::Udf(p) => {
                let udf = self.udf.as_ref().ok_or(Error::ExtensionAbsent("udf"))?;
                Ok((Plane::Udf, udf.tree.resolve(p)?))
            }
        }
    }

    /// Resolves an ISO path; with `rockridge` set, components match Rock
    /// Ridge names and symlinks are followed.
    fn resolve_iso(&self, path: &str, rockridge: bool) -> Result<NodeId> {
        if !path.starts_with('/') {
            return Err(Error::InvalidInput("path must start with '/'"));
        }
        let mut cursor = self.iso_tree.root();
        let mut hops = 0usize;
        let components: Vec<&str> = path.split('/').filter(|part| !part.is_empty()).collect();
        let mut index = 0;
        while index < components.len() {
            let part = components[index];
            let found = if rockridge {
                self.iso_tree
                    .find_child_rr(cursor, part.as_bytes())
                    .or_else(|| find_iso_child(&self.iso_tree, cursor, part))
            } else {
                find_iso_child(&self.iso_tree, cursor, part)
            };
            let mut node = found.ok_or_else(|| Error::NotFound(path.into()))?;
            // Follow relocation placeholders transparently.
            if let Some(target) = self.iso_tree.node(node).relocation_target {
                node = target;
            }
            // Follow Rock Ridge symlinks when resolving by RR name.
            if rockridge {
                if let Some(target) = self
                    .iso_tree
                    .node(node)
                    .rock_ridge
                    .as_ref()
                    .and_then(RockRidgeEntry::symlink_target)
                {
                    hops += 1;
                    if hops > 16 {
                        return Err(Error::InvalidInput("symlink loop"));
                    }
                    let base = if target.starts_with('/') {
                        self.iso_tree.root()
                    } else {
                        cursor
                    };
                    let mut link_cursor = base;
                    for link_part in target.split('/').filter(|part| !part.is_empty()) {
                        link_cursor = match link_part {
                            "." => link_cursor,
                            ".." => self
                                .iso_tree
                                .node(link_cursor)
                                .parent
                                .unwrap_or(self.iso_tree.root()),
                            name => self
                                .iso_tree
                                .find_child_rr(link_cursor, name.as_bytes())
                                .or_else(|| find_iso_child(&self.iso_tree, link_cursor, name))
                                .ok_or_else(|| Error::NotFound(target.clone()))?,
                        };
                    }
                    node = link_cursor;
                }
            }
            cursor = node;
            index += 1;
        }
        Ok(cursor)
    }

    /// Splits an ISO path into (resolved parent node, final identifier).
    fn resolve_iso_parent(&self, path: &str) -> Result<(NodeId, Vec<u8>)> {
        let (parent_path, name) = split_parent(path)?;
        let parent = self.resolve_iso(parent_path, false)?;
        if !self.iso_tree.node(parent).is_dir() {
            return Err(Error::WrongRecordType(parent_path.into()));
        }
        Ok((parent, name.as_bytes().to_vec()))
    }

    fn read_inode_prefix(&self, inode: usize, buf: &mut [u8]) -> Result<()> {
        let node = &self.inodes[inode];
        if node.length < buf.len() as u64 {
            return Err(Error::InvalidInput("file too short"));
        }
        match &node.source {
            InodeSource::Image { offset } => self.backing.read_exact_at(*offset, buf),
            InodeSource::Stream { fp, offset } => {
                let mut fp = fp.borrow_mut();
                fp.seek(SeekFrom::Start(*offset))?;
                fp.read_exact(buf)?;
                Ok(())
            }
            InodeSource::Data(data) => {
                buf.copy_from_slice(&data[..buf.len()]);
                Ok(())
            }
            InodeSource::ZeroFill => {
                buf.fill(0);
                Ok(())
            }
        }
    }
}

/// Finds an ISO child by exact identifier or by identifier minus the
/// `;version` suffix.
fn find_iso_child(tree: &DirTree, parent: NodeId, part: &str) -> Option<NodeId> {
    tree.find_child(parent, part.as_bytes()).or_else(|| {
        tree.node(parent).children.iter().copied().find(|&child| {
            let ident = &tree.node(child).ident;
            let base = ident
                .iter()
                .position(|&b| b == b';')
                .map_or(&ident[..], |pos| &ident[..pos]);
            base == part.as_bytes()
        })
    })
}

/// Resolves an absolute path within one tree by display name.
fn resolve_in_tree(tree: &DirTree, path: &str, joliet: bool) -> Result<NodeId> {
    if !path.starts_with('/') {
        return Err(Error::InvalidInput("path must start with '/'"));
    }
    let mut cursor = tree.root();
    for part in path.split('/').filter(|part| !part.is_empty()) {
        let ident: Vec<u8> = if joliet {
            match encode_ucs2_be(part) {
                Ok(ident) => ident,
                Err(_) => return Err(Error::NotFound(path.into())),
            }
        } else {
            part.as_bytes().to_vec()
        };
        cursor = tree
            .find_child(cursor, &ident)
            .ok_or_else(|| Error::NotFound(path.into()))?;
    }
    Ok(cursor)
}

/// Splits an absolute path into (parent path, final component).
fn split_parent(path: &str) -> Result<(&str, &str)> {
    if !path.starts_with('/') || path == "/" {
        return Err(Error::InvalidInput("path must be absolute and name a child"));
    }
    let trimmed = path.trim_end_matches('/');
    let split = trimmed.rfind('/').expect("absolute path contains a slash");
    let (parent, name) = trimmed.split_at(split);
    let name = &name[1..];
    if name.is_empty() {
        return Err(Error::InvalidInput("path must name a child"));
    }
    Ok((if parent.is_empty() { "/" } else { parent }, name))
}

fn path_display(path: PathKind<'_>) -> String {
    match path {
        PathKind::Iso(p) | PathKind::RockRidge(p) | PathKind::Joliet(p) | PathKind::Udf(p) => {
            p.into()
        }
    }
}

/// An open handle to a file inside an image.
///
/// Implements [`Read`] and [`Seek`]; the image cannot be mutated while a
/// handle is live, so handles never observe a moved extent.
pub struct IsoFileReader<'a> {
    image: &'a Image,
    inode: usize,
    pos: u64,
    length: u64,
}

impl IsoFileReader<'_> {
    /// Total length of the file in bytes.
    #[must_use]
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Whether the handle is readable (always true).
    #[must_use]
    pub fn readable(&self) -> bool {
        true
    }

    /// Whether the handle is seekable (always true).
    #[must_use]
    pub fn seekable(&self) -> bool {
        true
    }

    /// Current position, like `tell`.
    #[must_use]
    pub fn tell(&self) -> u64 {
        self.pos
    }
}

impl Read for IsoFileReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.pos >= self.length {
            return Ok(0);
        }
        let want = (self.length - self.pos).min(buf.len() as u64) as usize;
        let mut chunk = vec![0u8; want];
        let node = &self.image.inodes[self.inode];
        match &node.source {
            InodeSource::Image { offset } => {
                self.image
                    .backing
                    .read_exact_at(offset + self.pos, &mut chunk)
                    .map_err(|err| std::io::Error::other(err.to_string()))?;
            }
            InodeSource::Stream { fp, offset } => {
                let mut fp = fp.borrow_mut();
                fp.seek(SeekFrom::Start(offset + self.pos))?;
                fp.read_exact(&mut chunk)?;
            }
            InodeSource::Data(data) => {
                let start = usize::try_from(self.pos).expect("payload fits in memory");
                chunk.copy_from_slice(&data[start..start + want]);
            }
            InodeSource::ZeroFill => {}
        }
        buf[..want].copy_from_slice(&chunk);
        self.pos += want as u64;
        Ok(want)
    }
}

impl Seek for IsoFileReader<'_> {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => i128::from(offset),
            SeekFrom::End(delta) => i128::from(self.length) + i128::from(delta),
            SeekFrom::Current(delta) => i128::from(self.pos) + i128::from(delta),
        };
        if target < 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek before start",
            ));
        }
        self.pos = target.min(i128::from(u64::MAX)) as u64;
        Ok(self.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FixedClock;

    fn fixed_clock() -> Box<dyn Clock> {
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

    fn new_image() -> Image {
        Image::new(IsoOptions::default().clock(fixed_clock())).unwrap()
    }

    #[test]
    fn test_add_and_query_file() {
        let mut image = new_image();
        image
            .add_data(b"foo\n".to_vec(), "/FOO.;1", AddOptions::default())
            .unwrap();
        let record = image.get_record(PathKind::Iso("/FOO.;1")).unwrap();
        assert!(!record.is_dir);
        assert_eq!(record.data_length, 4);
        // Version-less lookup also resolves.
        assert!(image.get_record(PathKind::Iso("/FOO.")).is_ok());
        assert_eq!(image.get_file_from_iso(PathKind::Iso("/FOO.;1")).unwrap(), b"foo\n");
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut image = new_image();
        image
            .add_data(b"a".to_vec(), "/FOO.;1", AddOptions::default())
            .unwrap();
        assert!(
            image
                .add_data(b"b".to_vec(), "/FOO.;1", AddOptions::default())
                .is_err()
        );
    }

    #[test]
    fn test_level1_name_enforced() {
        let mut image = new_image();
        let err = image
            .add_data(b"x".to_vec(), "/WAYTOOLONGNAME.TXT;1", AddOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::IdentifierTooLong { .. }));
    }

    #[test]
    fn test_depth_limit_without_rock_ridge() {
        let mut image = new_image();
        let mut path = String::new();
        for depth in 1..=7 {
            path.push_str(&format!("/D{depth}"));
            image.add_directory(&path, AddOptions::default()).unwrap();
        }
        path.push_str("/D8");
        assert!(matches!(
            image.add_directory(&path, AddOptions::default()),
            Err(Error::DirectoryTooDeep)
        ));
    }

    #[test]
    fn test_deep_directory_relocated_with_rock_ridge() {
        let mut image = Image::new(
            IsoOptions::default()
                .clock(fixed_clock())
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
        // RR_MOVED appeared at the root and holds the deep directory.
        let rr_moved = image.get_record(PathKind::Iso("/RR_MOVED")).unwrap();
        assert!(rr_moved.is_dir);
        let moved = image.get_record(PathKind::Iso("/RR_MOVED/D8")).unwrap();
        assert!(moved.is_dir);
        // The logical path still resolves through the placeholder.
        let through = image.get_record(PathKind::Iso(&path)).unwrap();
        assert!(through.is_dir);
    }

    #[test]
    fn test_hard_link_shares_inode() {
        let mut image = new_image();
        image
            .add_data(b"foo\n".to_vec(), "/FOO.;1", AddOptions::default())
            .unwrap();
        image
            .add_hard_link(LinkTarget::Iso("/FOO.;1"), LinkTarget::Iso("/BAR.;1"), None)
            .unwrap();
        assert_eq!(image.get_file_from_iso(PathKind::Iso("/BAR.;1")).unwrap(), b"foo\n");
        // Removing one name keeps the payload alive.
        image.rm_hard_link(PathKind::Iso("/FOO.;1")).unwrap();
        assert!(image.get_record(PathKind::Iso("/FOO.;1")).is_err());
        assert_eq!(image.get_file_from_iso(PathKind::Iso("/BAR.;1")).unwrap(), b"foo\n");
    }

    #[test]
    fn test_rm_file_removes_all_names() {
        let mut image = Image::new(
            IsoOptions::default().clock(fixed_clock()).joliet(3),
        )
        .unwrap();
        image
            .add_data(
                b"foo\n".to_vec(),
                "/FOO.;1",
                AddOptions::default().joliet("/foo"),
            )
            .unwrap();
        image.rm_file(PathKind::Iso("/FOO.;1")).unwrap();
        assert!(image.get_record(PathKind::Iso("/FOO.;1")).is_err());
        assert!(image.get_record(PathKind::Joliet("/foo")).is_err());
    }

    #[test]
    fn test_symlink_resolution() {
        let mut image = Image::new(
            IsoOptions::default()
                .clock(fixed_clock())
                .rock_ridge("1.09")
                .unwrap(),
        )
        .unwrap();
        image
            .add_data(
                b"foo\n".to_vec(),
                "/FOO.;1",
                AddOptions::default().rr_name("foo"),
            )
            .unwrap();
        image
            .add_symlink("/SYM.;1", "sym", "foo", AddOptions::default())
            .unwrap();
        let record = image.get_record(PathKind::Iso("/SYM.;1")).unwrap();
        assert_eq!(record.symlink_target.as_deref(), Some("foo"));
        // Resolving the RR name traverses the link.
        assert_eq!(
            image.get_file_from_iso(PathKind::RockRidge("/sym")).unwrap(),
            b"foo\n"
        );
    }

    #[test]
    fn test_walk() {
        let mut image = new_image();
        image.add_directory("/DIR1", AddOptions::default()).unwrap();
        image
            .add_data(b"a".to_vec(), "/DIR1/FILE.;1", AddOptions::default())
            .unwrap();
        image
            .add_data(b"b".to_vec(), "/TOP.;1", AddOptions::default())
            .unwrap();
        let walked = image.walk(PathKind::Iso("/")).unwrap();
        assert_eq!(walked[0].0, "/");
        assert_eq!(walked[0].1, vec!["DIR1"]);
        assert_eq!(walked[0].2, vec!["TOP.;1"]);
        assert!(walked.iter().any(|(dir, _, files)| dir == "/DIR1"
            && files == &vec!["FILE.;1".to_string()]));
    }

    #[test]
    fn test_open_file_reader_seek() {
        let mut image = new_image();
        image
            .add_data(b"hello world".to_vec(), "/HELLO.;1", AddOptions::default())
            .unwrap();
        let mut reader = image.open_file_from_iso(PathKind::Iso("/HELLO.;1")).unwrap();
        assert_eq!(reader.length(), 11);
        reader.seek(SeekFrom::Start(6)).unwrap();
        let mut buf = String::new();
        reader.read_to_string(&mut buf).unwrap();
        assert_eq!(buf, "world");
        assert_eq!(reader.tell(), 11);
    }

    #[test]
    fn test_uninitialized_rejected() {
        let mut image = new_image();
        image.close();
        assert!(matches!(
            image.get_record(PathKind::Iso("/")),
            Err(Error::NotInitialized)
        ));
    }

    #[test]
    fn test_extension_absent_errors() {
        let mut image = new_image();
        assert!(matches!(
            image.add_joliet_directory("/dir"),
            Err(Error::ExtensionAbsent("joliet"))
        ));
        assert!(matches!(
            image.get_record(PathKind::Udf("/foo")),
            Err(Error::ExtensionAbsent("udf"))
        ));
        image
            .add_data(b"x".to_vec(), "/X.;1", AddOptions::default())
            .unwrap();
        assert!(matches!(
            image.add_symlink("/S.;1", "s", "x", AddOptions::default()),
            Err(Error::ExtensionAbsent("rock ridge"))
        ));
    }

    #[test]
    fn test_split_parent() {
        assert_eq!(split_parent("/FOO.;1").unwrap(), ("/", "FOO.;1"));
        assert_eq!(split_parent("/A/B/C").unwrap(), ("/A/B", "C"));
        assert!(split_parent("/").is_err());
        assert!(split_parent("relative").is_err());
    }
}
