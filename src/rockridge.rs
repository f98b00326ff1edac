// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! SUSP and Rock Ridge system-use fields.
//!
//! Rock Ridge layers POSIX semantics over ISO 9660 by storing tagged
//! subfields in the system-use area of each directory record: long names
//! (`NM`), POSIX attributes (`PX`), timestamps (`TF`), symbolic links
//! (`SL`), device numbers (`PN`), sparse files (`SF`), and the
//! deep-directory relocation triple (`CL`/`PL`/`RE`). SUSP itself
//! contributes the `SP` marker, the `ER` extension reference, `ES`, and the
//! `CE` continuation mechanism used when a record's inline system-use area
//! overflows.
//!
//! Two dialects are supported: RRIP 1.09 (`RRIP_1991A`, with the `RR`
//! presence bitmap) and RRIP 1.12 (`IEEE_P1282`, with serial numbers in
//! `PX`).
//!
//! Subfields that do not fit inline are packed into shared 2048-byte
//! continuation blocks; [`ContinuationBlock`] is the bump-allocating arena
//! for those, and it can also replay an on-disc layout during parse so a
//! re-mastered image reproduces the original packing.

use bitflags::bitflags;

use crate::error::{Error, Result};
use crate::types::{DirRecordDateTime, SECTOR_SIZE};

/// The longest Rock Ridge name this library will record.
pub const RR_MAX_FILENAME_LENGTH: usize = 248;

/// Which Rock Ridge dialect an image carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RockRidgeVersion {
    /// RRIP_1991A revision 1.09: `RR` bitmap present, 36-byte `PX`.
    V1_09,
    /// IEEE P1282 revision 1.12: no `RR` bitmap, 44-byte `PX` with serial.
    V1_12,
}

impl RockRidgeVersion {
    /// Parses the textual version accepted by the façade ("1.09"/"1.12").
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for any other string.
    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "1.09" => Ok(Self::V1_09),
            "1.12" => Ok(Self::V1_12),
            _ => Err(Error::InvalidInput("rock ridge version must be 1.09 or 1.12")),
        }
    }

    /// Size of a `PX` field in this dialect.
    #[must_use]
    pub fn px_len(self) -> usize {
        match self {
            Self::V1_09 => 36,
            Self::V1_12 => 44,
        }
    }
}

bitflags! {
    /// Flag byte of a `TF` timestamp field.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TfFlags: u8 {
        /// Creation time recorded
        const CREATION = 0x01;
        /// Last access time recorded
        const ACCESS = 0x02;
        /// Last modification time recorded
        const MODIFY = 0x04;
        /// Last attribute change time recorded
        const ATTRIBUTES = 0x08;
        /// Last backup time recorded
        const BACKUP = 0x10;
        /// Expiration time recorded
        const EXPIRATION = 0x20;
        /// Effective time recorded
        const EFFECTIVE = 0x40;
        /// Timestamps use the 17-byte long form
        const LONG_FORM = 0x80;
    }
}

bitflags! {
    /// Flag byte of an `NM` alternate-name field.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NmFlags: u8 {
        /// The name continues in the next `NM` field
        const CONTINUE = 0x01;
        /// The name refers to the current directory
        const CURRENT = 0x02;
        /// The name refers to the parent directory
        const PARENT = 0x04;
    }
}

bitflags! {
    /// Flag byte of an `SL` symlink component record.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SlComponentFlags: u8 {
        /// The component continues in the next component record
        const CONTINUE = 0x01;
        /// The component is `.`
        const CURRENT = 0x02;
        /// The component is `..`
        const PARENT = 0x04;
        /// The component is the filesystem root
        const ROOT = 0x08;
    }
}

/// A `PX` POSIX attributes field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PxEntry {
    /// POSIX file mode bits
    pub mode: u32,
    /// POSIX link count
    pub links: u32,
    /// Owning user id
    pub uid: u32,
    /// Owning group id
    pub gid: u32,
    /// File serial number (1.12 only; ignored when emitting 1.09)
    pub serial: u32,
}

impl PxEntry {
    /// Default attributes for a regular file.
    #[must_use]
    pub fn file(mode: u32) -> Self {
        Self {
            mode,
            links: 1,
            uid: 0,
            gid: 0,
            serial: 0,
        }
    }

    /// Default attributes for a directory.
    #[must_use]
    pub fn directory(mode: u32) -> Self {
        Self {
            mode,
            links: 2,
            uid: 0,
            gid: 0,
            serial: 0,
        }
    }
}

/// A `PN` POSIX device number field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PnEntry {
    /// High 32 bits of the device number
    pub dev_high: u32,
    /// Low 32 bits of the device number
    pub dev_low: u32,
}

/// One component of an `SL` symlink target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlComponent {
    /// The current directory (`.`)
    Current,
    /// The parent directory (`..`)
    Parent,
    /// The filesystem root (`/`)
    Root,
    /// A named component
    Name(Vec<u8>),
}

impl SlComponent {
    /// Encoded size of this component record.
    #[must_use]
    pub fn record_len(&self) -> usize {
        match self {
            SlComponent::Name(name) => 2 + name.len(),
            _ => 2,
        }
    }
}

/// A `TF` timestamp field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TfEntry {
    /// Which timestamps are recorded
    pub flags: TfFlags,
    /// The recorded timestamps, in flag-bit order
    pub times: Vec<DirRecordDateTime>,
}

impl TfEntry {
    /// The usual creation/modify/access/attributes set stamped on new
    /// records.
    #[must_use]
    pub fn stamped(now: DirRecordDateTime) -> Self {
        let flags = TfFlags::ACCESS | TfFlags::MODIFY | TfFlags::ATTRIBUTES;
        Self {
            flags,
            times: vec![now, now, now],
        }
    }

    /// Encoded size of this field.
    #[must_use]
    pub fn len(&self) -> usize {
        let stamp = if self.flags.contains(TfFlags::LONG_FORM) {
            17
        } else {
            DirRecordDateTime::LEN
        };
        5 + self.times.len() * stamp
    }
}

/// The Rock Ridge overlay of one directory record.
///
/// Subfields are split into the set emitted inline in the record's
/// system-use area (`dr` side) and the set that overflowed to a
/// continuation area (`ce` side). The split is recomputed by
/// [`RockRidgeEntry::split_for_su_space`] whenever the record is laid out.
#[derive(Debug, Clone, Default)]
pub struct RockRidgeEntry {
    /// Dialect in effect for this record's image
    pub version: Option<RockRidgeVersion>,
    /// `SP` present (root's dot record only); value is bytes-to-skip
    pub sp: Option<u8>,
    /// `RR` presence bitmap emitted (1.09 only)
    pub rr: bool,
    /// `PX` POSIX attributes
    pub px: Option<PxEntry>,
    /// `PN` device numbers
    pub pn: Option<PnEntry>,
    /// Alternate name (concatenation of all `NM` fragments)
    pub alternate_name: Option<Vec<u8>>,
    /// Symlink target components (concatenation of all `SL` fields)
    pub symlink_components: Vec<SlComponent>,
    /// `TF` timestamps
    pub tf: Option<TfEntry>,
    /// `SF` sparse-file data, carried opaquely (virtual size high/low,
    /// table depth)
    pub sf: Option<(u32, u32, u8)>,
    /// `CL` child link: extent of the relocated directory
    pub cl_extent: Option<u32>,
    /// `PL` parent link: extent of the logical parent directory
    pub pl_extent: Option<u32>,
    /// `RE` relocated marker
    pub relocated: bool,
    /// `ES` extension sequence numbers, carried opaquely
    pub es_sequences: Vec<u8>,
    /// `ER` extension reference present (root's dot record only)
    pub er: bool,
    /// Movable fields that overflowed to the continuation area; recomputed
    /// by [`RockRidgeEntry::plan_overflow`]
    pub ce_overflow: CeFields,
    /// Continuation area placement assigned by the planner: block index,
    /// offset within the block, and length
    pub ce_slot: Option<CeSlot>,
}

bitflags! {
    /// Fields that may be moved from the inline system-use area to a
    /// continuation area when the record would exceed 255 bytes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CeFields: u8 {
        /// The `NM` alternate name
        const NM = 0x01;
        /// The `SL` symlink fields
        const SL = 0x02;
        /// The `TF` timestamps
        const TF = 0x04;
    }
}

/// Placement of a record's continuation entries within the image's
/// continuation blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CeSlot {
    /// Index into the image's continuation block list
    pub block: usize,
    /// Byte offset within the block
    pub offset: u32,
    /// Length of the continuation entries in bytes
    pub len: u32,
}

/// The ER strings identifying each dialect.
struct ErStrings {
    id: &'static [u8],
    descriptor: &'static [u8],
    source: &'static [u8],
}

fn er_strings(version: RockRidgeVersion) -> ErStrings {
    match version {
        RockRidgeVersion::V1_09 => ErStrings {
            id: b"RRIP_1991A",
            descriptor: b"THE ROCK RIDGE INTERCHANGE PROTOCOL PROVIDES SUPPORT FOR POSIX FILE SYSTEM SEMANTICS",
            source: b"PLEASE CONTACT DISC PUBLISHER FOR SPECIFICATION SOURCE.  SEE PUBLISHER IDENTIFIER IN PRIMARY VOLUME DESCRIPTOR FOR CONTACT INFORMATION.",
        },
        RockRidgeVersion::V1_12 => ErStrings {
            id: b"IEEE_P1282",
            descriptor: b"THE IEEE P1282 PROTOCOL PROVIDES SUPPORT FOR POSIX FILE SYSTEM SEMANTICS.",
            source: b"PLEASE CONTACT THE IEEE STANDARDS DEPARTMENT, PISCATAWAY, NJ, USA FOR THE P1282 SPECIFICATION.",
        },
    }
}

impl RockRidgeEntry {
    /// Creates the overlay stamped on a newly added file or directory.
    #[must_use]
    pub fn new(
        version: RockRidgeVersion,
        name: Option<&[u8]>,
        px: PxEntry,
        now: DirRecordDateTime,
    ) -> Self {
        Self {
            version: Some(version),
            rr: version == RockRidgeVersion::V1_09,
            px: Some(px),
            alternate_name: name.map(<[u8]>::to_vec),
            tf: Some(TfEntry::stamped(now)),
            ..Self::default()
        }
    }

    /// Dialect in effect, defaulting to 1.09 when unset.
    #[must_use]
    pub fn version_or_default(&self) -> RockRidgeVersion {
        self.version.unwrap_or(RockRidgeVersion::V1_09)
    }

    /// Computes the `RR` presence bitmap for this entry.
    #[must_use]
    pub fn rr_bitmap(&self) -> u8 {
        let mut flags = 0u8;
        if self.px.is_some() {
            flags |= 1 << 0;
        }
        if self.pn.is_some() {
            flags |= 1 << 1;
        }
        if !self.symlink_components.is_empty() {
            flags |= 1 << 2;
        }
        if self.alternate_name.is_some() {
            flags |= 1 << 3;
        }
        if self.cl_extent.is_some() {
            flags |= 1 << 4;
        }
        if self.pl_extent.is_some() {
            flags |= 1 << 5;
        }
        if self.relocated {
            flags |= 1 << 6;
        }
        if self.tf.is_some() {
            flags |= 1 << 7;
        }
        flags
    }

    fn nm_len(&self) -> usize {
        self.alternate_name.as_ref().map_or(0, |name| 5 + name.len())
    }

    fn sl_len(&self) -> usize {
        if self.symlink_components.is_empty() {
            return 0;
        }
        5 + 1
            + self
                .symlink_components
                .iter()
                .map(SlComponent::record_len)
                .sum::<usize>()
    }

    fn er_len(&self) -> usize {
        if !self.er {
            return 0;
        }
        let strings = er_strings(self.version_or_default());
        8 + strings.id.len() + strings.descriptor.len() + strings.source.len()
    }

    /// Total encoded size of the subfields that stay on the `dr` side,
    /// excluding any `CE` field.
    #[must_use]
    pub fn dr_fields_len(&self) -> usize {
        let version = self.version_or_default();
        let mut len = 0;
        if self.sp.is_some() {
            len += 7;
        }
        if self.rr {
            len += 5;
        }
        if !self.ce_overflow.contains(CeFields::NM) {
            len += self.nm_len();
        }
        if !self.ce_overflow.contains(CeFields::SL) {
            len += self.sl_len();
        }
        len += self.px.map_or(0, |_| version.px_len());
        if self.pn.is_some() {
            len += 20;
        }
        if self.cl_extent.is_some() {
            len += 12;
        }
        if self.pl_extent.is_some() {
            len += 12;
        }
        if let Some(tf) = &self.tf {
            if !self.ce_overflow.contains(CeFields::TF) {
                len += tf.len();
            }
        }
        if self.sf.is_some() {
            len += 21;
        }
        if self.relocated {
            len += 4;
        }
        if !self.es_sequences.is_empty() {
            len += 5 * self.es_sequences.len();
        }
        len
    }

    /// Size of the continuation-area side: the `ER` field plus any fields
    /// moved there by [`RockRidgeEntry::plan_overflow`].
    #[must_use]
    pub fn ce_fields_len(&self) -> usize {
        let mut len = self.er_len();
        if self.ce_overflow.contains(CeFields::NM) {
            len += self.nm_len();
        }
        if self.ce_overflow.contains(CeFields::SL) {
            len += self.sl_len();
        }
        if self.ce_overflow.contains(CeFields::TF) {
            len += self.tf.as_ref().map_or(0, TfEntry::len);
        }
        len
    }

    /// Length the record's inline system-use area will occupy, including
    /// the `CE` field when a continuation area is needed.
    #[must_use]
    pub fn dr_len(&self) -> usize {
        let mut len = self.dr_fields_len();
        if self.ce_fields_len() > 0 {
            len += 28;
        }
        len
    }

    /// Decides which movable fields overflow to the continuation area so
    /// that the whole directory record stays within its 255-byte length
    /// field. `su_prefix_len` is the size of anything that precedes the
    /// Rock Ridge fields in the system-use area (the XA suffix).
    pub fn plan_overflow(&mut self, ident_len: usize, su_prefix_len: usize) {
        self.ce_overflow = CeFields::empty();
        let base = 33 + ident_len + usize::from(ident_len % 2 == 0) + su_prefix_len;
        if base + self.dr_len() <= 254 {
            return;
        }
        for field in [CeFields::NM, CeFields::SL, CeFields::TF] {
            self.ce_overflow |= field;
            if base + self.dr_len() <= 254 {
                return;
            }
        }
    }

    /// Emits the inline (`dr` side) system-use bytes.
    ///
    /// `ce_location`/`ce_offset`/`ce_len` describe the continuation slot
    /// when one is in use (extent number, byte offset, byte length).
    #[must_use]
    pub fn record_dr(&self, ce: Option<(u32, u32, u32)>) -> Vec<u8> {
        let version = self.version_or_default();
        let mut out = Vec::with_capacity(self.dr_len());

        if let Some(skip) = self.sp {
            out.extend_from_slice(&[b'S', b'P', 7, 1, 0xBE, 0xEF, skip]);
        }
        if self.rr {
            out.extend_from_slice(&[b'R', b'R', 5, 1, self.rr_bitmap()]);
        }
        if !self.ce_overflow.contains(CeFields::NM) {
            self.emit_nm(&mut out);
        }
        if !self.ce_overflow.contains(CeFields::SL) {
            self.emit_sl(&mut out);
        }
        if let Some(px) = &self.px {
            out.extend_from_slice(&[b'P', b'X', version.px_len() as u8, 1]);
            push_both_endian_32(&mut out, px.mode);
            push_both_endian_32(&mut out, px.links);
            push_both_endian_32(&mut out, px.uid);
            push_both_endian_32(&mut out, px.gid);
            if version == RockRidgeVersion::V1_12 {
                push_both_endian_32(&mut out, px.serial);
            }
        }
        if let Some(pn) = &self.pn {
            out.extend_from_slice(&[b'P', b'N', 20, 1]);
            push_both_endian_32(&mut out, pn.dev_high);
            push_both_endian_32(&mut out, pn.dev_low);
        }
        if let Some(extent) = self.cl_extent {
            out.extend_from_slice(&[b'C', b'L', 12, 1]);
            push_both_endian_32(&mut out, extent);
        }
        if let Some(extent) = self.pl_extent {
            out.extend_from_slice(&[b'P', b'L', 12, 1]);
            push_both_endian_32(&mut out, extent);
        }
        if !self.ce_overflow.contains(CeFields::TF) {
            self.emit_tf(&mut out);
        }
        if let Some((high, low, depth)) = self.sf {
            out.extend_from_slice(&[b'S', b'F', 21, 1]);
            push_both_endian_32(&mut out, high);
            push_both_endian_32(&mut out, low);
            out.push(depth);
        }
        if self.relocated {
            out.extend_from_slice(&[b'R', b'E', 4, 1]);
        }
        for &seq in &self.es_sequences {
            out.extend_from_slice(&[b'E', b'S', 5, 1, seq]);
        }
        if let Some((location, offset, len)) = ce {
            out.extend_from_slice(&[b'C', b'E', 28, 1]);
            push_both_endian_32(&mut out, location);
            push_both_endian_32(&mut out, offset);
            push_both_endian_32(&mut out, len);
        }

        out
    }

    fn emit_nm(&self, out: &mut Vec<u8>) {
        if let Some(name) = &self.alternate_name {
            out.extend_from_slice(&[b'N', b'M', (5 + name.len()) as u8, 1, 0]);
            out.extend_from_slice(name);
        }
    }

    fn emit_sl(&self, out: &mut Vec<u8>) {
        if self.symlink_components.is_empty() {
            return;
        }
        out.extend_from_slice(&[b'S', b'L', self.sl_len() as u8, 1, 0]);
        for component in &self.symlink_components {
            match component {
                SlComponent::Current => {
                    out.extend_from_slice(&[SlComponentFlags::CURRENT.bits(), 0]);
                }
                SlComponent::Parent => {
                    out.extend_from_slice(&[SlComponentFlags::PARENT.bits(), 0]);
                }
                SlComponent::Root => {
                    out.extend_from_slice(&[SlComponentFlags::ROOT.bits(), 0]);
                }
                SlComponent::Name(name) => {
                    out.push(0);
                    out.push(name.len() as u8);
                    out.extend_from_slice(name);
                }
            }
        }
    }

    fn emit_tf(&self, out: &mut Vec<u8>) {
        if let Some(tf) = &self.tf {
            out.extend_from_slice(&[b'T', b'F', tf.len() as u8, 1, tf.flags.bits()]);
            for time in &tf.times {
                let mut stamp = [0u8; DirRecordDateTime::LEN];
                time.write_to(&mut stamp);
                out.extend_from_slice(&stamp);
            }
        }
    }

    /// Emits the continuation-area (`ce` side) bytes.
    #[must_use]
    pub fn record_ce(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.ce_fields_len());
        if self.ce_overflow.contains(CeFields::NM) {
            self.emit_nm(&mut out);
        }
        if self.ce_overflow.contains(CeFields::SL) {
            self.emit_sl(&mut out);
        }
        if self.ce_overflow.contains(CeFields::TF) {
            self.emit_tf(&mut out);
        }
        if self.er {
            let strings = er_strings(self.version_or_default());
            let len = self.er_len();
            out.extend_from_slice(&[
                b'E',
                b'R',
                len as u8,
                1,
                strings.id.len() as u8,
                strings.descriptor.len() as u8,
                strings.source.len() as u8,
                1,
            ]);
            out.extend_from_slice(strings.id);
            out.extend_from_slice(strings.descriptor);
            out.extend_from_slice(strings.source);
        }
        out
    }

    /// Returns the alternate name as the path component handle.
    #[must_use]
    pub fn name(&self) -> Option<&[u8]> {
        self.alternate_name.as_deref()
    }

    /// Returns the symlink target as a POSIX path string, when this record
    /// is a symlink.
    #[must_use]
    pub fn symlink_target(&self) -> Option<String> {
        if self.symlink_components.is_empty() {
            return None;
        }
        let mut parts: Vec<String> = Vec::new();
        let mut absolute = false;
        for component in &self.symlink_components {
            match component {
                SlComponent::Current => parts.push(".".into()),
                SlComponent::Parent => parts.push("..".into()),
                SlComponent::Root => absolute = true,
                SlComponent::Name(name) => {
                    parts.push(String::from_utf8_lossy(name).into_owned());
                }
            }
        }
        let joined = parts.join("/");
        Some(if absolute { format!("/{joined}") } else { joined })
    }
}

/// Splits a POSIX path into `SL` components.
#[must_use]
pub fn symlink_components_for_target(target: &str) -> Vec<SlComponent> {
    let mut components = Vec::new();
    if target.starts_with('/') {
        components.push(SlComponent::Root);
    }
    for part in target.split('/').filter(|part| !part.is_empty()) {
        components.push(match part {
            "." => SlComponent::Current,
            ".." => SlComponent::Parent,
            name => SlComponent::Name(name.as_bytes().to_vec()),
        });
    }
    components
}

fn push_both_endian_32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
    out.extend_from_slice(&value.to_be_bytes());
}

fn read_both_endian_32(buf: &[u8], field: &'static str) -> Result<u32> {
    Ok(crate::types::BothEndian32::parse(buf, field)?.get())
}

/// Parses the system-use area of one directory record into a
/// [`RockRidgeEntry`].
///
/// `su` is the record's inline system-use bytes (after any XA suffix has
/// been stripped). When a `CE` field is found, its (extent, offset, length)
/// triple is returned so the caller can fetch and feed the continuation
/// bytes through [`parse_su_area`] again with the same entry.
///
/// # Errors
///
/// Fails with [`Error::InvalidIso`] variants on malformed subfields.
pub fn parse_su_area(
    entry: &mut RockRidgeEntry,
    su: &[u8],
) -> Result<Option<(u32, u32, u32)>> {
    let mut ce = None;
    let mut cursor = 0usize;

    while cursor + 4 <= su.len() {
        let sig = [su[cursor], su[cursor + 1]];
        if sig == [0, 0] {
            break;
        }
        let len = usize::from(su[cursor + 2]);
        if len < 4 || cursor + len > su.len() {
            return Err(Error::InvalidIso("system use field overruns its area"));
        }
        let body = &su[cursor + 4..cursor + len];
        match &sig {
            b"SP" => {
                if len != 7 || body[0] != 0xBE || body[1] != 0xEF {
                    return Err(Error::InvalidIso("bad SP field"));
                }
                entry.sp = Some(body[2]);
            }
            b"RR" => {
                if len != 5 {
                    return Err(Error::InvalidIso("bad RR field length"));
                }
                entry.rr = true;
                entry.version = Some(RockRidgeVersion::V1_09);
            }
            b"CE" => {
                if len != 28 {
                    return Err(Error::InvalidIso("bad CE field length"));
                }
                let location = read_both_endian_32(&body[0..8], "CE location")?;
                let offset = read_both_endian_32(&body[8..16], "CE offset")?;
                let length = read_both_endian_32(&body[16..24], "CE length")?;
                ce = Some((location, offset, length));
            }
            b"PX" => {
                let version = match len {
                    36 => RockRidgeVersion::V1_09,
                    44 => RockRidgeVersion::V1_12,
                    _ => return Err(Error::InvalidIso("bad PX field length")),
                };
                if entry.version.is_none() {
                    entry.version = Some(version);
                }
                let serial = if len == 44 {
                    read_both_endian_32(&body[32..40], "PX serial")?
                } else {
                    0
                };
                entry.px = Some(PxEntry {
                    mode: read_both_endian_32(&body[0..8], "PX mode")?,
                    links: read_both_endian_32(&body[8..16], "PX links")?,
                    uid: read_both_endian_32(&body[16..24], "PX uid")?,
                    gid: read_both_endian_32(&body[24..32], "PX gid")?,
                    serial,
                });
            }
            b"PN" => {
                if len != 20 {
                    return Err(Error::InvalidIso("bad PN field length"));
                }
                entry.pn = Some(PnEntry {
                    dev_high: read_both_endian_32(&body[0..8], "PN dev high")?,
                    dev_low: read_both_endian_32(&body[8..16], "PN dev low")?,
                });
            }
            b"NM" => {
                if body.is_empty() {
                    return Err(Error::InvalidIso("bad NM field length"));
                }
                let flags = NmFlags::from_bits_truncate(body[0]);
                let fragment = &body[1..];
                if flags.contains(NmFlags::CURRENT) || flags.contains(NmFlags::PARENT) {
                    // Dot and dotdot carry no stored name.
                } else {
                    entry
                        .alternate_name
                        .get_or_insert_with(Vec::new)
                        .extend_from_slice(fragment);
                }
            }
            b"SL" => {
                if body.is_empty() {
                    return Err(Error::InvalidIso("bad SL field length"));
                }
                let mut pos = 1; // skip flags byte
                while pos + 2 <= body.len() {
                    let flags = SlComponentFlags::from_bits_truncate(body[pos]);
                    let comp_len = usize::from(body[pos + 1]);
                    pos += 2;
                    if pos + comp_len > body.len() {
                        return Err(Error::InvalidIso("SL component overruns its field"));
                    }
                    let component = if flags.contains(SlComponentFlags::ROOT) {
                        SlComponent::Root
                    } else if flags.contains(SlComponentFlags::PARENT) {
                        SlComponent::Parent
                    } else if flags.contains(SlComponentFlags::CURRENT) {
                        SlComponent::Current
                    } else {
                        SlComponent::Name(body[pos..pos + comp_len].to_vec())
                    };
                    entry.symlink_components.push(component);
                    pos += comp_len;
                }
            }
            b"TF" => {
                if body.is_empty() {
                    return Err(Error::InvalidIso("bad TF field length"));
                }
                let flags = TfFlags::from_bits_truncate(body[0]);
                let stamp = if flags.contains(TfFlags::LONG_FORM) {
                    17
                } else {
                    DirRecordDateTime::LEN
                };
                let mut times = Vec::new();
                let mut pos = 1;
                while pos + stamp <= body.len() {
                    if flags.contains(TfFlags::LONG_FORM) {
                        // Long-form stamps are folded down to the short form;
                        // only parse-and-preserve fidelity of the instant is
                        // required here.
                        let vd = crate::types::VolumeDateTime::parse(&body[pos..pos + 17])?;
                        times.push(fold_long_form(&vd));
                    } else {
                        times.push(DirRecordDateTime::parse(&body[pos..pos + stamp])?);
                    }
                    pos += stamp;
                }
                entry.tf = Some(TfEntry {
                    flags: flags - TfFlags::LONG_FORM,
                    times,
                });
            }
            b"SF" => {
                if len != 21 {
                    return Err(Error::InvalidIso("bad SF field length"));
                }
                entry.sf = Some((
                    read_both_endian_32(&body[0..8], "SF virtual size high")?,
                    read_both_endian_32(&body[8..16], "SF virtual size low")?,
                    body[16],
                ));
            }
            b"CL" => {
                if len != 12 {
                    return Err(Error::InvalidIso("bad CL field length"));
                }
                entry.cl_extent = Some(read_both_endian_32(&body[0..8], "CL extent")?);
            }
            b"PL" => {
                if len != 12 {
                    return Err(Error::InvalidIso("bad PL field length"));
                }
                entry.pl_extent = Some(read_both_endian_32(&body[0..8], "PL extent")?);
            }
            b"RE" => {
                entry.relocated = true;
            }
            b"ES" => {
                if len != 5 {
                    return Err(Error::InvalidIso("bad ES field length"));
                }
                entry.es_sequences.push(body[0]);
            }
            b"ER" => {
                if body.len() < 4 {
                    return Err(Error::InvalidIso("bad ER field length"));
                }
                let id_len = usize::from(body[0]);
                entry.er = true;
                if body.len() >= 4 + id_len {
                    let id = &body[4..4 + id_len];
                    if id == b"RRIP_1991A" {
                        entry.version = Some(RockRidgeVersion::V1_09);
                    } else if id == b"IEEE_P1282" || id == b"IEEE_1282" {
                        entry.version = Some(RockRidgeVersion::V1_12);
                    }
                }
            }
            _ => {
                log::debug!(
                    "skipping unknown system use field {:?}",
                    core::str::from_utf8(&sig).unwrap_or("??")
                );
            }
        }
        cursor += len;
    }

    Ok(ce)
}

/// Folds a long-form (17-byte) timestamp down to the 7-byte form.
fn fold_long_form(vd: &crate::types::VolumeDateTime) -> DirRecordDateTime {
    let digits2 = |d: &[u8; 2]| (d[0].wrapping_sub(b'0')) * 10 + d[1].wrapping_sub(b'0');
    let year = u16::from(vd.year[0].wrapping_sub(b'0')) * 1000
        + u16::from(vd.year[1].wrapping_sub(b'0')) * 100
        + u16::from(vd.year[2].wrapping_sub(b'0')) * 10
        + u16::from(vd.year[3].wrapping_sub(b'0'));
    DirRecordDateTime {
        years_since_1900: year.saturating_sub(1900).min(255) as u8,
        month: digits2(&vd.month),
        day: digits2(&vd.day),
        hour: digits2(&vd.hour),
        minute: digits2(&vd.minute),
        second: digits2(&vd.second),
        gmt_offset: vd.gmt_offset,
    }
}

/// One 2048-byte continuation area shared by several records.
///
/// Entries are bump-allocated: each new span starts where the previous one
/// ended. During parse the exact spans found on disc are replayed through
/// [`ContinuationBlock::track_entry`] instead, so a re-mastered image
/// reproduces the original packing.
#[derive(Debug, Clone, Default)]
pub struct ContinuationBlock {
    /// Extent assigned by the layout planner
    pub extent: u32,
    /// Allocated `(offset, length)` spans, sorted by offset
    spans: Vec<(u32, u32)>,
}

impl ContinuationBlock {
    /// Creates an empty block.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes used from the start of the block through the last span.
    #[must_use]
    pub fn used(&self) -> u32 {
        self.spans
            .last()
            .map_or(0, |&(offset, len)| offset + len)
    }

    /// Tries to bump-allocate `len` bytes, returning the offset on success.
    pub fn try_allocate(&mut self, len: u32) -> Option<u32> {
        let offset = self.used();
        if offset + len > SECTOR_SIZE as u32 {
            return None;
        }
        self.spans.push((offset, len));
        Some(offset)
    }

    /// Records a span observed during parse.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidIso`] when the span falls outside the
    /// block.
    pub fn track_entry(&mut self, offset: u32, len: u32) -> Result<()> {
        if offset + len > SECTOR_SIZE as u32 {
            return Err(Error::InvalidIso("continuation entry overruns its block"));
        }
        self.spans.push((offset, len));
        self.spans.sort_unstable();
        Ok(())
    }
}

/// The set of continuation blocks belonging to one image.
#[derive(Debug, Clone, Default)]
pub struct ContinuationArea {
    /// Blocks in creation order
    pub blocks: Vec<ContinuationBlock>,
}

impl ContinuationArea {
    /// Allocates `len` bytes in the first block with room, creating a new
    /// block when none fits. Returns (block index, offset).
    pub fn allocate(&mut self, len: u32) -> (usize, u32) {
        for (index, block) in self.blocks.iter_mut().enumerate() {
            if let Some(offset) = block.try_allocate(len) {
                return (index, offset);
            }
        }
        let mut block = ContinuationBlock::new();
        let offset = block
            .try_allocate(len)
            .expect("continuation entry larger than a block");
        self.blocks.push(block);
        (self.blocks.len() - 1, offset)
    }

    /// Finds the block parsed at `extent`, creating it when first seen.
    pub fn block_for_extent(&mut self, extent: u32) -> usize {
        if let Some(index) = self.blocks.iter().position(|block| block.extent == extent) {
            return index;
        }
        let mut block = ContinuationBlock::new();
        block.extent = extent;
        self.blocks.push(block);
        self.blocks.len() - 1
    }

    /// Clears all spans but keeps the blocks, ready for a planner re-run.
    pub fn reset(&mut self) {
        self.blocks.clear();
    }

    /// Number of blocks (one extent each).
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamped_entry(version: RockRidgeVersion, name: &[u8]) -> RockRidgeEntry {
        RockRidgeEntry::new(
            version,
            Some(name),
            PxEntry::file(0o0100444),
            DirRecordDateTime::unspecified(),
        )
    }

    #[test]
    fn test_dr_len_109_file() {
        // RR(5) + NM(5+3) + PX(36) + TF(26) = 75 for a 3-byte name.
        let entry = stamped_entry(RockRidgeVersion::V1_09, b"foo");
        assert_eq!(entry.dr_fields_len(), 75);
    }

    #[test]
    fn test_dr_len_109_symlink() {
        // RR(5) + NM(8) + SL(11) + PX(36) + TF(26) = 86 for "sym" -> "foo".
        let mut entry = stamped_entry(RockRidgeVersion::V1_09, b"sym");
        entry.symlink_components = symlink_components_for_target("foo");
        assert_eq!(entry.dr_fields_len(), 86);
    }

    #[test]
    fn test_dr_len_112_px() {
        let entry = stamped_entry(RockRidgeVersion::V1_12, b"foo");
        // 1.12 drops RR(5) but grows PX to 44.
        assert_eq!(entry.dr_fields_len(), 8 + 44 + 26);
    }

    #[test]
    fn test_record_parse_roundtrip() {
        let mut entry = stamped_entry(RockRidgeVersion::V1_09, b"longname.txt");
        entry.symlink_components = symlink_components_for_target("/a/../b");
        let bytes = entry.record_dr(None);
        assert_eq!(bytes.len(), entry.dr_fields_len());

        let mut parsed = RockRidgeEntry::default();
        let ce = parse_su_area(&mut parsed, &bytes).unwrap();
        assert!(ce.is_none());
        assert_eq!(parsed.alternate_name.as_deref(), Some(&b"longname.txt"[..]));
        assert_eq!(parsed.px, entry.px);
        assert_eq!(parsed.symlink_components, entry.symlink_components);
        assert_eq!(parsed.symlink_target().as_deref(), Some("/a/../b"));
        assert_eq!(parsed.version, Some(RockRidgeVersion::V1_09));
    }

    #[test]
    fn test_sp_er_ce_roundtrip() {
        let entry = RockRidgeEntry {
            version: Some(RockRidgeVersion::V1_09),
            sp: Some(0),
            rr: true,
            px: Some(PxEntry::directory(0o040555)),
            tf: Some(TfEntry::stamped(DirRecordDateTime::unspecified())),
            er: true,
            ..RockRidgeEntry::default()
        };
        let ce_bytes = entry.record_ce();
        assert_eq!(ce_bytes.len(), entry.ce_fields_len());
        // ER for RRIP_1991A: 8 + 10 + 84 + 135 = 237.
        assert_eq!(ce_bytes.len(), 237);

        let dr_bytes = entry.record_dr(Some((24, 0, ce_bytes.len() as u32)));
        let mut parsed = RockRidgeEntry::default();
        let ce = parse_su_area(&mut parsed, &dr_bytes).unwrap();
        assert_eq!(ce, Some((24, 0, 237)));
        assert_eq!(parsed.sp, Some(0));

        parse_su_area(&mut parsed, &ce_bytes).unwrap();
        assert!(parsed.er);
        assert_eq!(parsed.version, Some(RockRidgeVersion::V1_09));
    }

    #[test]
    fn test_cl_pl_re_roundtrip() {
        let mut entry = RockRidgeEntry::default();
        entry.version = Some(RockRidgeVersion::V1_09);
        entry.cl_extent = Some(29);
        let bytes = entry.record_dr(None);
        let mut parsed = RockRidgeEntry::default();
        parse_su_area(&mut parsed, &bytes).unwrap();
        assert_eq!(parsed.cl_extent, Some(29));

        let mut back = RockRidgeEntry::default();
        back.version = Some(RockRidgeVersion::V1_09);
        back.pl_extent = Some(23);
        back.relocated = true;
        let bytes = back.record_dr(None);
        let mut parsed = RockRidgeEntry::default();
        parse_su_area(&mut parsed, &bytes).unwrap();
        assert_eq!(parsed.pl_extent, Some(23));
        assert!(parsed.relocated);
    }

    #[test]
    fn test_plan_overflow_moves_long_name_to_ce() {
        let name = vec![b'x'; RR_MAX_FILENAME_LENGTH];
        let mut entry = stamped_entry(RockRidgeVersion::V1_09, &name);
        entry.plan_overflow(12, 0);
        assert!(entry.ce_overflow.contains(CeFields::NM));
        // Inline side now fits: RR(5) + PX(36) + TF(26) + CE(28).
        assert_eq!(entry.dr_len(), 95);
        assert_eq!(entry.ce_fields_len(), 5 + RR_MAX_FILENAME_LENGTH);
        // The overflowed name still parses back from the CE bytes.
        let ce_bytes = entry.record_ce();
        let mut parsed = RockRidgeEntry::default();
        parse_su_area(&mut parsed, &ce_bytes).unwrap();
        assert_eq!(parsed.alternate_name.as_deref(), Some(name.as_slice()));
    }

    #[test]
    fn test_plan_overflow_keeps_short_names_inline() {
        let mut entry = stamped_entry(RockRidgeVersion::V1_09, b"foo");
        entry.plan_overflow(6, 0);
        assert!(entry.ce_overflow.is_empty());
        assert_eq!(entry.dr_len(), 75);
    }

    #[test]
    fn test_continuation_bump_allocation() {
        let mut area = ContinuationArea::default();
        let (block_a, offset_a) = area.allocate(237);
        assert_eq!((block_a, offset_a), (0, 0));
        let (block_b, offset_b) = area.allocate(100);
        assert_eq!((block_b, offset_b), (0, 237));
        // An entry that cannot fit in the remaining suffix opens a new block.
        let (block_c, offset_c) = area.allocate(2048 - 237);
        assert_eq!((block_c, offset_c), (1, 0));
        assert_eq!(area.block_count(), 2);
    }

    #[test]
    fn test_continuation_tracking_rejects_overrun() {
        let mut block = ContinuationBlock::new();
        assert!(block.track_entry(2000, 100).is_err());
        assert!(block.track_entry(0, 237).is_ok());
        assert_eq!(block.used(), 237);
    }

    #[test]
    fn test_rr_bitmap() {
        let mut entry = stamped_entry(RockRidgeVersion::V1_09, b"foo");
        entry.symlink_components = symlink_components_for_target("target");
        // PX | SL | NM | TF
        assert_eq!(entry.rr_bitmap(), 0b1000_1101);
    }

    #[test]
    fn test_symlink_component_split() {
        let components = symlink_components_for_target("/usr/../lib");
        assert_eq!(
            components,
            vec![
                SlComponent::Root,
                SlComponent::Name(b"usr".to_vec()),
                SlComponent::Parent,
                SlComponent::Name(b"lib".to_vec()),
            ]
        );
    }
}
