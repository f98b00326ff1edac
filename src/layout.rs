// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The layout planner and the re-mastering writer.
//!
//! [`plan`] assigns an extent to every extent-owning node of the model
//! (descriptors, path tables, directories, Rock Ridge continuation
//! blocks, the boot catalog, UDF structures, file payloads) and updates
//! every size and cross-reference. The assignment is a pure function of
//! the model: two runs over the same model produce identical extents,
//! which is what makes `write` deterministic.
//!
//! Sizes feeding extent placement (directory data lengths, path table
//! sizes, continuation area packing) depend only on tree shapes, never on
//! the extent numbers themselves, so the fixed point converges
//! immediately; the loop still verifies convergence and gives up after
//! eight rounds rather than loop forever on a model bug.
//!
//! [`write_image`] then emits the planned image strictly sequentially, so
//! any `io::Write` sink works.

use std::io::Write;

use crate::directory::{
    DirTree, FileFlags, IDENT_DOT, IDENT_DOTDOT, MAX_EXTENT_RUN, NodeId, NodeKind, record_bytes,
    record_len, xa_suffix,
};
use crate::eltorito::BootInfoTable;
use crate::error::{Error, Result};
use crate::image::{Image, LayoutExtents};
use crate::inode::{COPY_BUFFER_SIZE, InodeSource, Plane, write_zeros};
use crate::isohybrid::IsoHybrid;
use crate::path_table::PathTable;
use crate::rockridge::RockRidgeEntry;
use crate::types::{SECTOR_SIZE, SYSTEM_AREA_SECTORS, sectors_for_size};
use crate::udf::entries::{ShortAd, UdfFileEntry, UdfFileIdentifier, UdfFileType,
    split_into_short_ads};
use crate::udf::{ExtentAd, LongAd};

/// Extent cursor that skips reserved ranges.
struct Allocator {
    cursor: u32,
    reserved: Vec<(u32, u32)>,
}

impl Allocator {
    fn new(start: u32, reserved: Vec<(u32, u32)>) -> Self {
        Self {
            cursor: start,
            reserved,
        }
    }

    fn overlaps_reserved(&self, start: u32, blocks: u32) -> Option<u32> {
        for &(r_start, r_blocks) in &self.reserved {
            if start < r_start + r_blocks && r_start < start + blocks {
                return Some(r_start + r_blocks);
            }
        }
        None
    }

    fn alloc(&mut self, blocks: u32) -> u32 {
        let blocks = blocks.max(1);
        loop {
            match self.overlaps_reserved(self.cursor, blocks) {
                Some(skip_to) => self.cursor = skip_to,
                None => {
                    let out = self.cursor;
                    self.cursor += blocks;
                    return out;
                }
            }
        }
    }

    fn end(&self) -> u32 {
        self.cursor
    }
}

/// Runs the planner to a fixed point.
///
/// # Errors
///
/// Fails with [`Error::Internal`] when the layout does not converge in
/// eight rounds (a model bug) and propagates size-computation failures.
pub(crate) fn plan(image: &mut Image) -> Result<()> {
    let mut previous = None;
    for _ in 0..8 {
        assign(image)?;
        if previous == Some(image.space_size) {
            image.dirty = false;
            image.planned = true;
            return Ok(());
        }
        previous = Some(image.space_size);
    }
    Err(Error::Internal("layout planner did not converge"))
}

fn assign(image: &mut Image) -> Result<()> {
    plan_rock_ridge(image);
    plan_dir_sizes(image)?;

    // --- Volume descriptor set -------------------------------------
    let mut cursor = SYSTEM_AREA_SECTORS + 1; // PVD occupies 16
    cursor += image.duplicate_pvds as u32;
    let mut extents = LayoutExtents::default();
    if image.eltorito.is_some() {
        extents.boot_record = Some(cursor);
        cursor += 1;
    }
    if image.joliet_vd.is_some() {
        extents.joliet_vd = Some(cursor);
        cursor += 1;
    }
    if image.enhanced_vd.is_some() {
        extents.enhanced_vd = Some(cursor);
        cursor += 1;
    }
    extents.vpds = (0..image.vpds.len() as u32).map(|index| cursor + index).collect();
    cursor += image.vpds.len() as u32;
    extents.terminator = cursor;
    cursor += 1;
    if image.udf.is_some() {
        extents.udf_bea = Some(cursor);
        cursor += 3; // BEA01, NSR03, TEA01
    }
    if image.version_vd {
        extents.version_vd = Some(cursor);
        cursor += 1;
    }

    // --- UDF fixed structures --------------------------------------
    let mut reserved = Vec::new();
    let mut udf_partition_start = 0u32;
    let mut udf_area_end = None;
    if let Some(udf) = &mut image.udf {
        extents.udf_main = 32;
        extents.udf_reserve = 48;
        extents.udf_lvid = 64;
        udf_partition_start = 257;
        extents.udf_fsd = 257;
        extents.udf_fs_term = 258;

        // File entries and FID areas, breadth-first from the root.
        let mut udf_cursor = 259u32;
        let root = udf.tree.root();
        udf.tree.node_mut(root).fe_extent = udf_cursor;
        udf_cursor += 1;
        let root_fid_len = udf.tree.fid_area_len(root)?;
        udf.tree.node_mut(root).fid_extent = udf_cursor;
        udf.tree.node_mut(root).fid_data_len = root_fid_len;
        udf_cursor += sectors_for_size(u64::from(root_fid_len)).max(1);
        for dir in udf.tree.directories_breadth_first() {
            let children = udf.tree.node(dir).children.clone();
            for child in children {
                udf.tree.node_mut(child).fe_extent = udf_cursor;
                udf_cursor += 1;
                if udf.tree.node(child).kind == UdfFileType::Directory {
                    let fid_len = udf.tree.fid_area_len(child)?;
                    udf.tree.node_mut(child).fid_extent = udf_cursor;
                    udf.tree.node_mut(child).fid_data_len = fid_len;
                    udf_cursor += sectors_for_size(u64::from(fid_len)).max(1);
                }
            }
        }

        reserved.push((32, 6));
        reserved.push((48, 6));
        reserved.push((64, 1));
        reserved.push((256, udf_cursor - 256));
        udf_area_end = Some(udf_cursor);
    }

    let mut alloc = Allocator::new(cursor, reserved);

    // --- Path tables ------------------------------------------------
    let iso_pt = PathTable::from_tree(&image.iso_tree);
    extents.iso_pt_size = iso_pt.size() as u32;
    let iso_pt_extents = iso_pt.reserved_extents();
    extents.iso_pt_le = alloc.alloc(iso_pt_extents);
    extents.iso_pt_be = alloc.alloc(iso_pt_extents);
    if let Some(joliet_tree) = &image.joliet_tree {
        let joliet_pt = PathTable::from_tree(joliet_tree);
        extents.joliet_pt_size = joliet_pt.size() as u32;
        let joliet_pt_extents = joliet_pt.reserved_extents();
        extents.joliet_pt_le = Some(alloc.alloc(joliet_pt_extents));
        extents.joliet_pt_be = Some(alloc.alloc(joliet_pt_extents));
    }

    // --- Directories ------------------------------------------------
    for dir in image.iso_tree.directories_in_path_table_order() {
        let blocks = sectors_for_size(image.iso_tree.node(dir).data_length);
        image.iso_tree.node_mut(dir).extent = alloc.alloc(blocks);
    }
    // Rock Ridge continuation blocks.
    extents.rr_ce_start = alloc.end();
    for block in &mut image.rr_ce.blocks {
        block.extent = alloc.alloc(1);
    }
    if let Some(joliet_tree) = &mut image.joliet_tree {
        for dir in joliet_tree.directories_in_path_table_order() {
            let blocks = sectors_for_size(joliet_tree.node(dir).data_length);
            joliet_tree.node_mut(dir).extent = alloc.alloc(blocks);
        }
    }

    // --- El Torito catalog ------------------------------------------
    // The boot catalog and data extents follow the UDF area.
    if let Some(end) = udf_area_end {
        alloc.cursor = alloc.cursor.max(end);
    }
    if let Some(catalog) = &mut image.eltorito {
        let blocks = sectors_for_size(catalog.record().len() as u64);
        catalog.extent = alloc.alloc(blocks);
        extents.catalog = Some(catalog.extent);
    }

    // --- Data extents -----------------------------------------------
    let catalog_inode = image.eltorito.as_ref().and_then(|catalog| catalog.inode);
    for index in 1..image.inodes.len() {
        if Some(index) == catalog_inode {
            continue; // lives inside the catalog's own extent
        }
        if image.inodes[index].refs.is_empty() || image.inodes[index].length == 0 {
            image.inodes[index].extent = 0;
            continue;
        }
        let blocks = image.inodes[index].block_count();
        image.inodes[index].extent = alloc.alloc(blocks);
    }

    // --- Trailer ----------------------------------------------------
    let mut space = alloc.end();
    if image.udf.is_some() {
        space = space.max(udf_partition_start + 1);
        // Second anchor at space-2 with one reserved trailing extent.
        extents.udf_anchor2 = space;
        space += 2;
    }
    image.space_size = space;
    extents.total_size = u64::from(space) * SECTOR_SIZE as u64;
    if let Some(hybrid) = &image.isohybrid {
        // In EFI mode the secondary GPT lives in the padding tail, so the
        // tail must hold at least its 33 LBAs.
        let tail = if hybrid.efi {
            (1 + crate::isohybrid::GPT_ARRAY_LBAS) * 512
        } else {
            0
        };
        extents.total_size = IsoHybrid::padded_size(extents.total_size + tail);
    }

    // --- Back-references --------------------------------------------
    if let Some(catalog) = &mut image.eltorito {
        if let Some(inode) = catalog.inode {
            image.inodes[inode].extent = catalog.extent;
            image.inodes[inode].length = sectors_for_size(catalog.record().len() as u64) as u64
                * SECTOR_SIZE as u64;
        }
        for entry in catalog.entries_mut() {
            if let Some(inode) = entry.inode {
                entry.load_rba = image.inodes[inode].extent;
            }
        }
    }

    image.pvd.space_size = space;
    image.pvd.path_table_size = extents.iso_pt_size;
    image.pvd.path_table_location_le = extents.iso_pt_le;
    image.pvd.path_table_location_be = extents.iso_pt_be;
    let iso_root = image.iso_tree.root();
    image.pvd.root_dir_extent = image.iso_tree.node(iso_root).extent;
    image.pvd.root_dir_size = image.iso_tree.node(iso_root).data_length as u32;
    if let (Some(vd), Some(tree)) = (&mut image.joliet_vd, &image.joliet_tree) {
        vd.space_size = space;
        vd.path_table_size = extents.joliet_pt_size;
        vd.path_table_location_le = extents.joliet_pt_le.expect("joliet planned");
        vd.path_table_location_be = extents.joliet_pt_be.expect("joliet planned");
        let root = tree.root();
        vd.root_dir_extent = tree.node(root).extent;
        vd.root_dir_size = tree.node(root).data_length as u32;
    }
    if let Some(vd) = &mut image.enhanced_vd {
        vd.space_size = space;
        vd.path_table_size = extents.iso_pt_size;
        vd.path_table_location_le = extents.iso_pt_le;
        vd.path_table_location_be = extents.iso_pt_be;
        vd.root_dir_extent = image.pvd.root_dir_extent;
        vd.root_dir_size = image.pvd.root_dir_size;
    }

    patch_relocation_links(image);

    if let Some(udf) = &mut image.udf {
        let partition_len = space - udf_partition_start;
        for set in [&mut udf.main, &mut udf.reserve] {
            set.partition.start = udf_partition_start;
            set.partition.length = partition_len;
            set.logical_volume.fsd_location = LongAd {
                len: SECTOR_SIZE as u32,
                block: 0,
                part_ref: 0,
            };
            set.logical_volume.integrity_extent = ExtentAd {
                len: SECTOR_SIZE as u32,
                loc: extents.udf_lvid,
            };
        }
        let root = udf.tree.root();
        udf.fsd.root_icb = LongAd {
            len: SECTOR_SIZE as u32,
            block: udf.tree.node(root).fe_extent - udf_partition_start,
            part_ref: 0,
        };
        let (num_files, num_dirs) = udf.tree.census();
        udf.lvid.num_files = num_files;
        udf.lvid.num_dirs = num_dirs;
        udf.lvid.size_table = partition_len;
        udf.lvid.unique_id = udf.tree.next_unique_id();
    }

    if image.isohybrid.is_some() {
        // Collect (platform, LBA run) pairs first; the initial entry
        // follows the validation platform, section entries their header.
        let mut runs: Vec<(crate::eltorito::PlatformId, u64, u64)> = Vec::new();
        if let Some(catalog) = &image.eltorito {
            let mut push = |platform, inode: Option<usize>| {
                if let Some(inode) = inode {
                    runs.push((
                        platform,
                        u64::from(image.inodes[inode].extent) * 4,
                        image.inodes[inode].length.div_ceil(512),
                    ));
                }
            };
            push(catalog.validation.platform_id, catalog.initial.inode);
            for section in &catalog.sections {
                for entry in &section.entries {
                    push(section.platform_id, entry.inode);
                }
            }
        }
        let hybrid = image.isohybrid.as_mut().expect("checked above");
        hybrid.part_type = if hybrid.efi { 0x00 } else { 0x17 };
        hybrid.efi_runs.clear();
        hybrid.mac_run = None;
        for (platform, lba, count) in runs {
            match platform {
                crate::eltorito::PlatformId::Efi => hybrid.efi_runs.push((lba, count)),
                crate::eltorito::PlatformId::Mac => hybrid.mac_run = Some((lba, count)),
                _ => {}
            }
        }
    }

    image.extents = extents;
    Ok(())
}

/// Plans one Rock Ridge entry's overflow split and continuation slot.
fn assign_ce(
    ce: &mut crate::rockridge::ContinuationArea,
    entry: &mut RockRidgeEntry,
    ident_len: usize,
    su_prefix: usize,
) {
    entry.plan_overflow(ident_len, su_prefix);
    let len = entry.ce_fields_len() as u32;
    entry.ce_slot = if len > 0 {
        let (block, offset) = ce.allocate(len);
        Some(crate::rockridge::CeSlot { block, offset, len })
    } else {
        None
    };
}

/// Plans Rock Ridge overflow splits and continuation-area slots.
///
/// Order is deterministic: directories in path-table order, and within
/// each the dot entry, the dotdot entry, then children in record order.
fn plan_rock_ridge(image: &mut Image) {
    if image.options.rock_ridge.is_none() {
        return;
    }
    let su_prefix = if image.options.xa {
        crate::directory::XA_RECORD_LEN
    } else {
        0
    };
    let tree = &mut image.iso_tree;
    let ce = &mut image.rr_ce;
    ce.reset();

    for dir in tree.directories_in_path_table_order() {
        let children = tree.node(dir).children.clone();
        if let Some(entry) = tree.node_mut(dir).rr_dot.as_mut() {
            assign_ce(ce, entry, 1, su_prefix);
        }
        if let Some(entry) = tree.node_mut(dir).rr_dotdot.as_mut() {
            assign_ce(ce, entry, 1, su_prefix);
        }
        for child in children {
            let ident_len = tree.node(child).ident.len();
            if let Some(entry) = tree.node_mut(child).rock_ridge.as_mut() {
                assign_ce(ce, entry, ident_len, su_prefix);
            }
        }
    }
}

/// Computes directory data lengths for both trees.
fn plan_dir_sizes(image: &mut Image) -> Result<()> {
    let xa = image.options.xa;
    plan_tree_dir_sizes(&mut image.iso_tree, xa, &image.inodes);
    if let Some(tree) = &mut image.joliet_tree {
        plan_tree_dir_sizes(tree, false, &image.inodes);
    }
    Ok(())
}

fn su_len_for(entry: Option<&RockRidgeEntry>, xa: bool) -> usize {
    let mut len = if xa { crate::directory::XA_RECORD_LEN } else { 0 };
    if let Some(entry) = entry {
        len += entry.dr_len();
    }
    len
}

fn plan_tree_dir_sizes(tree: &mut DirTree, xa: bool, inodes: &[crate::inode::Inode]) {
    for dir in tree.directories_in_path_table_order() {
        let node = tree.node(dir);
        let mut used = record_len(1, su_len_for(node.rr_dot.as_ref(), xa));
        used += record_len(1, su_len_for(node.rr_dotdot.as_ref(), xa));
        for &child in &node.children {
            let child_node = tree.node(child);
            let su = su_len_for(child_node.rock_ridge.as_ref(), xa);
            let size = record_len(child_node.ident.len(), su);
            let records = match child_node.kind {
                NodeKind::File => child_node
                    .inode
                    .map_or(1, |inode| extent_run_count(inodes[inode].length)),
                _ => 1,
            };
            for _ in 0..records {
                if used % SECTOR_SIZE + size > SECTOR_SIZE {
                    used = used.div_ceil(SECTOR_SIZE) * SECTOR_SIZE;
                }
                used += size;
            }
        }
        let data_length = (used.div_ceil(SECTOR_SIZE) * SECTOR_SIZE).max(SECTOR_SIZE);
        tree.node_mut(dir).data_length = data_length as u64;
    }
}

fn extent_run_count(length: u64) -> usize {
    if length == 0 {
        1
    } else {
        usize::try_from(length.div_ceil(MAX_EXTENT_RUN)).expect("fits")
    }
}

/// Patches `CL`/`PL` extents after directory extents are known.
fn patch_relocation_links(image: &mut Image) {
    for id in collect_live(&image.iso_tree) {
        if let Some(target) = image.iso_tree.node(id).relocation_target {
            let extent = image.iso_tree.node(target).extent;
            if let Some(entry) = image.iso_tree.node_mut(id).rock_ridge.as_mut() {
                entry.cl_extent = Some(extent);
            }
        }
        if let Some(logical_parent) = image.iso_tree.node(id).logical_parent {
            let extent = image.iso_tree.node(logical_parent).extent;
            if let Some(dotdot) = image.iso_tree.node_mut(id).rr_dotdot.as_mut() {
                dotdot.pl_extent = Some(extent);
            }
        }
    }
}

fn collect_live(tree: &DirTree) -> Vec<NodeId> {
    let mut out = Vec::new();
    let mut stack = vec![tree.root()];
    while let Some(node) = stack.pop() {
        out.push(node);
        stack.extend(tree.node(node).children.iter().copied());
    }
    out
}

// ---------------------------------------------------------------------
// Serialization
// ---------------------------------------------------------------------

fn ce_params(image: &Image, entry: &RockRidgeEntry) -> Option<(u32, u32, u32)> {
    entry.ce_slot.map(|slot| {
        (
            image.rr_ce.blocks[slot.block].extent,
            slot.offset,
            slot.len,
        )
    })
}

fn su_bytes(image: &Image, entry: Option<&RockRidgeEntry>) -> Vec<u8> {
    let mut out = Vec::new();
    if image.options.xa {
        out.extend_from_slice(&xa_suffix());
    }
    if let Some(entry) = entry {
        out.extend_from_slice(&entry.record_dr(ce_params(image, entry)));
    }
    out
}

/// Serializes the data area of one directory in the given plane.
///
/// # Errors
///
/// Fails with [`Error::Internal`] when the planner has not sized the
/// directory yet.
pub(crate) fn serialize_dir_data(image: &Image, plane: Plane, dir: NodeId) -> Result<Vec<u8>> {
    let tree = match plane {
        Plane::Iso => &image.iso_tree,
        Plane::Joliet => image
            .joliet_tree
            .as_ref()
            .ok_or(Error::Internal("joliet plane without a joliet tree"))?,
        _ => return Err(Error::Internal("directory data exists only for ISO planes")),
    };
    let node = tree.node(dir);
    if node.data_length == 0 {
        return Err(Error::Internal("directory was not sized by the planner"));
    }
    let mut out = vec![0u8; usize::try_from(node.data_length).expect("directory fits memory")];
    let mut pos = 0usize;

    // Joliet records carry no system-use area; XA and Rock Ridge belong
    // to the primary hierarchy only.
    let rr = |entry: Option<&RockRidgeEntry>| -> Vec<u8> {
        if plane == Plane::Iso {
            su_bytes(image, entry)
        } else {
            Vec::new()
        }
    };

    // Dot entry.
    let dot = record_bytes(
        IDENT_DOT,
        node.extent,
        node.data_length as u32,
        &node.date,
        FileFlags::DIRECTORY,
        &rr(node.rr_dot.as_ref()),
    );
    out[pos..pos + dot.len()].copy_from_slice(&dot);
    pos += dot.len();

    // Dotdot entry describes the physical parent (the root points at
    // itself).
    let parent = node.parent.unwrap_or(dir);
    let parent_node = tree.node(parent);
    let dotdot = record_bytes(
        IDENT_DOTDOT,
        parent_node.extent,
        parent_node.data_length as u32,
        &parent_node.date,
        FileFlags::DIRECTORY,
        &rr(node.rr_dotdot.as_ref()),
    );
    out[pos..pos + dotdot.len()].copy_from_slice(&dotdot);
    pos += dotdot.len();

    for &child in &node.children {
        let child_node = tree.node(child);
        let su = rr(child_node.rock_ridge.as_ref());
        let mut emit = |bytes: &[u8], pos: &mut usize| {
            if *pos % SECTOR_SIZE + bytes.len() > SECTOR_SIZE {
                *pos = (*pos).div_ceil(SECTOR_SIZE) * SECTOR_SIZE;
            }
            out[*pos..*pos + bytes.len()].copy_from_slice(bytes);
            *pos += bytes.len();
        };
        match child_node.kind {
            NodeKind::Directory => {
                let mut flags = FileFlags::DIRECTORY;
                if child_node.is_hidden() {
                    flags |= FileFlags::HIDDEN;
                }
                let bytes = record_bytes(
                    &child_node.ident,
                    child_node.extent,
                    child_node.data_length as u32,
                    &child_node.date,
                    flags,
                    &su,
                );
                emit(&bytes, &mut pos);
            }
            NodeKind::RelocationPlaceholder => {
                let bytes = record_bytes(
                    &child_node.ident,
                    0,
                    0,
                    &child_node.date,
                    FileFlags::empty(),
                    &su,
                );
                emit(&bytes, &mut pos);
            }
            NodeKind::File => {
                let (extent, length) = match child_node.inode {
                    Some(inode) if inode != 0 => {
                        (image.inodes[inode].extent, image.inodes[inode].length)
                    }
                    _ => (0, 0),
                };
                let runs = extent_run_count(length);
                let mut remaining = length;
                for run in 0..runs {
                    let run_len = remaining.min(MAX_EXTENT_RUN);
                    remaining -= run_len;
                    let mut flags = FileFlags::empty();
                    if child_node.is_hidden() {
                        flags |= FileFlags::HIDDEN;
                    }
                    if run + 1 < runs {
                        flags |= FileFlags::MULTI_EXTENT;
                    }
                    let run_extent =
                        extent + (run as u32) * sectors_for_size(MAX_EXTENT_RUN);
                    let bytes = record_bytes(
                        &child_node.ident,
                        run_extent,
                        run_len as u32,
                        &child_node.date,
                        flags,
                        &su,
                    );
                    emit(&bytes, &mut pos);
                }
            }
        }
    }
    Ok(out)
}

/// Serializes the continuation-area blocks.
fn serialize_ce_blocks(image: &Image) -> Vec<(u32, Vec<u8>)> {
    let mut buffers: Vec<Vec<u8>> = image
        .rr_ce
        .blocks
        .iter()
        .map(|_| vec![0u8; SECTOR_SIZE])
        .collect();
    let mut write_entry = |entry: &RockRidgeEntry| {
        if let Some(slot) = entry.ce_slot {
            let bytes = entry.record_ce();
            let offset = slot.offset as usize;
            buffers[slot.block][offset..offset + bytes.len()].copy_from_slice(&bytes);
        }
    };
    for node in collect_live(&image.iso_tree) {
        let n = image.iso_tree.node(node);
        if let Some(entry) = &n.rr_dot {
            write_entry(entry);
        }
        if let Some(entry) = &n.rr_dotdot {
            write_entry(entry);
        }
        if let Some(entry) = &n.rock_ridge {
            write_entry(entry);
        }
    }
    image
        .rr_ce
        .blocks
        .iter()
        .zip(buffers)
        .map(|(block, buffer)| (block.extent, buffer))
        .collect()
}

/// Serializes one UDF File Entry sector for a tree node.
///
/// # Errors
///
/// Fails with [`Error::Internal`] when the node's plane state is
/// inconsistent.
pub(crate) fn serialize_udf_file_entry(image: &Image, node: usize) -> Result<Vec<u8>> {
    let udf = image
        .udf
        .as_ref()
        .ok_or(Error::Internal("udf entry without udf state"))?;
    let part_start = udf.main.partition.start;
    let n = udf.tree.node(node);
    let mut entry = UdfFileEntry::new(n.kind, n.unique_id, n.times.0);
    entry.access_time = n.times.0;
    entry.modification_time = n.times.1;
    entry.attribute_time = n.times.2;
    match n.kind {
        UdfFileType::Directory => {
            entry.link_count = 1 + n
                .children
                .iter()
                .filter(|&&child| udf.tree.node(child).kind == UdfFileType::Directory)
                .count() as u16
                + u16::from(n.parent.is_some());
            entry.info_length = u64::from(n.fid_data_len);
            entry.log_blocks = u64::from(sectors_for_size(u64::from(n.fid_data_len)).max(1));
            entry.alloc_descs = vec![ShortAd {
                len: n.fid_data_len,
                block: n.fid_extent - part_start,
            }];
        }
        UdfFileType::File | UdfFileType::Symlink => {
            let (length, extent) = n.inode.map_or((0, 0), |inode| {
                (image.inodes[inode].length, image.inodes[inode].extent)
            });
            entry.info_length = length;
            entry.log_blocks = u64::from(sectors_for_size(length));
            entry.alloc_descs = if length == 0 {
                Vec::new()
            } else {
                split_into_short_ads(length, extent - part_start)
            };
        }
    }
    Ok(entry.record(n.fe_extent - part_start))
}

/// Serializes the FID area of a UDF directory.
fn serialize_udf_fid_area(image: &Image, dir: usize) -> Result<Vec<u8>> {
    let udf = image.udf.as_ref().ok_or(Error::Internal("no udf state"))?;
    let part_start = udf.main.partition.start;
    let n = udf.tree.node(dir);
    let base_block = n.fid_extent - part_start;
    let mut out = Vec::with_capacity(n.fid_data_len as usize);

    let parent = n.parent.unwrap_or(dir);
    let parent_node = udf.tree.node(parent);
    let parent_fid = UdfFileIdentifier::parent(LongAd {
        len: SECTOR_SIZE as u32,
        block: parent_node.fe_extent - part_start,
        part_ref: 0,
    });
    out.extend_from_slice(&parent_fid.record(base_block)?);

    for &child in &n.children {
        let child_node = udf.tree.node(child);
        let mut fid = UdfFileIdentifier::child(
            &child_node.name,
            child_node.kind == UdfFileType::Directory,
            LongAd {
                len: SECTOR_SIZE as u32,
                block: child_node.fe_extent - part_start,
                part_ref: 0,
            },
        );
        if child_node.hidden {
            fid.characteristics |= crate::udf::entries::FileCharacteristics::HIDDEN;
        }
        let location = base_block + (out.len() / SECTOR_SIZE) as u32;
        out.extend_from_slice(&fid.record(location)?);
    }
    debug_assert_eq!(out.len() as u32, n.fid_data_len);
    Ok(out)
}

enum Chunk {
    Bytes(Vec<u8>),
    Payload(usize),
}

/// Emits the planned image sequentially into `out`.
///
/// # Errors
///
/// Propagates serialization and I/O failures.
pub(crate) fn write_image(image: &mut Image, out: &mut dyn Write) -> Result<()> {
    let mut chunks: Vec<(u64, Chunk)> = Vec::new();
    let block = |extent: u32| u64::from(extent) * SECTOR_SIZE as u64;

    // System area, with the isohybrid MBR and primary GPT overlaid.
    let mut system_area = image.system_area.clone();
    if let Some(hybrid) = &image.isohybrid {
        let mbr = hybrid.record_mbr(image.extents.total_size);
        system_area[..512].copy_from_slice(&mbr);
        if hybrid.efi {
            let gpt = hybrid.record_primary_gpt(image.extents.total_size);
            system_area[512..512 + gpt.len()].copy_from_slice(&gpt);
        }
    }
    chunks.push((0, Chunk::Bytes(system_area)));

    // Volume descriptors.
    let iso_root = image.iso_tree.root();
    let root_record = record_bytes(
        IDENT_DOT,
        image.iso_tree.node(iso_root).extent,
        image.iso_tree.node(iso_root).data_length as u32,
        &image.iso_tree.node(iso_root).date,
        FileFlags::DIRECTORY,
        &[],
    );
    let pvd_bytes = image.pvd.record(&root_record);
    chunks.push((block(16), Chunk::Bytes(pvd_bytes.clone())));
    for dup in 0..image.duplicate_pvds {
        chunks.push((block(17 + dup as u32), Chunk::Bytes(pvd_bytes.clone())));
    }
    if let (Some(extent), Some(catalog)) = (image.extents.boot_record, &image.eltorito) {
        let record = crate::volume::BootRecordVolumeDescriptor::new_eltorito(catalog.extent);
        chunks.push((block(extent), Chunk::Bytes(record.record())));
    }
    if let (Some(extent), Some(vd), Some(tree)) = (
        image.extents.joliet_vd,
        &image.joliet_vd,
        &image.joliet_tree,
    ) {
        let joliet_root = tree.root();
        let joliet_root_record = record_bytes(
            IDENT_DOT,
            tree.node(joliet_root).extent,
            tree.node(joliet_root).data_length as u32,
            &tree.node(joliet_root).date,
            FileFlags::DIRECTORY,
            &[],
        );
        chunks.push((block(extent), Chunk::Bytes(vd.record(&joliet_root_record))));
    }
    if let (Some(extent), Some(vd)) = (image.extents.enhanced_vd, &image.enhanced_vd) {
        chunks.push((block(extent), Chunk::Bytes(vd.record(&root_record))));
    }
    for (vpd, &extent) in image.vpds.iter().zip(image.extents.vpds.iter()) {
        chunks.push((block(extent), Chunk::Bytes(vpd.record())));
    }
    chunks.push((
        block(image.extents.terminator),
        Chunk::Bytes(crate::volume::terminator_record()),
    ));
    // The version volume descriptor is an all-zero sector; the gap
    // emission covers it.

    // UDF structures.
    if let Some(udf) = &image.udf {
        if let Some(bea) = image.extents.udf_bea {
            chunks.push((block(bea), Chunk::Bytes(crate::udf::recognition_sector(b"BEA01"))));
            chunks.push((
                block(bea + 1),
                Chunk::Bytes(crate::udf::recognition_sector(b"NSR03")),
            ));
            chunks.push((
                block(bea + 2),
                Chunk::Bytes(crate::udf::recognition_sector(b"TEA01")),
            ));
        }
        for (start, set) in [
            (image.extents.udf_main, &udf.main),
            (image.extents.udf_reserve, &udf.reserve),
        ] {
            for (offset, sector) in set.record_sequence(start)?.into_iter().enumerate() {
                chunks.push((block(start + offset as u32), Chunk::Bytes(sector)));
            }
        }
        chunks.push((
            block(image.extents.udf_lvid),
            Chunk::Bytes(udf.lvid.record(image.extents.udf_lvid)),
        ));
        let main_extent = ExtentAd {
            len: 16 * SECTOR_SIZE as u32,
            loc: image.extents.udf_main,
        };
        let reserve_extent = ExtentAd {
            len: 16 * SECTOR_SIZE as u32,
            loc: image.extents.udf_reserve,
        };
        chunks.push((
            block(256),
            Chunk::Bytes(crate::udf::anchor_record(256, main_extent, reserve_extent)),
        ));
        chunks.push((
            block(image.extents.udf_anchor2),
            Chunk::Bytes(crate::udf::anchor_record(
                image.extents.udf_anchor2,
                main_extent,
                reserve_extent,
            )),
        ));
        // File set descriptor and its terminator (partition-relative tag
        // locations).
        let part_start = udf.main.partition.start;
        chunks.push((
            block(image.extents.udf_fsd),
            Chunk::Bytes(udf.fsd.record(image.extents.udf_fsd - part_start)?),
        ));
        chunks.push((
            block(image.extents.udf_fs_term),
            Chunk::Bytes(crate::udf::terminating_descriptor(
                image.extents.udf_fs_term - part_start,
            )),
        ));
        // File entries and FID areas.
        let mut nodes = vec![udf.tree.root()];
        let mut index = 0;
        while index < nodes.len() {
            let dir = nodes[index];
            nodes.extend(udf.tree.node(dir).children.iter().copied());
            index += 1;
        }
        for node in nodes {
            let n = udf.tree.node(node);
            if n.unreadable {
                // Preserve the tolerated zero file entry.
                chunks.push((block(n.fe_extent), Chunk::Bytes(vec![0u8; SECTOR_SIZE])));
                continue;
            }
            chunks.push((block(n.fe_extent), Chunk::Bytes(serialize_udf_file_entry(image, node)?)));
            if n.kind == UdfFileType::Directory {
                chunks.push((block(n.fid_extent), Chunk::Bytes(serialize_udf_fid_area(image, node)?)));
            }
        }
    }

    // Path tables.
    let iso_pt = PathTable::from_tree(&image.iso_tree);
    chunks.push((block(image.extents.iso_pt_le), Chunk::Bytes(iso_pt.record(false))));
    chunks.push((block(image.extents.iso_pt_be), Chunk::Bytes(iso_pt.record(true))));
    if let (Some(le), Some(be), Some(tree)) = (
        image.extents.joliet_pt_le,
        image.extents.joliet_pt_be,
        &image.joliet_tree,
    ) {
        let joliet_pt = PathTable::from_tree(tree);
        chunks.push((block(le), Chunk::Bytes(joliet_pt.record(false))));
        chunks.push((block(be), Chunk::Bytes(joliet_pt.record(true))));
    }

    // Directory data.
    for dir in image.iso_tree.directories_in_path_table_order() {
        chunks.push((
            block(image.iso_tree.node(dir).extent),
            Chunk::Bytes(serialize_dir_data(image, Plane::Iso, dir)?),
        ));
    }
    for (extent, buffer) in serialize_ce_blocks(image) {
        chunks.push((block(extent), Chunk::Bytes(buffer)));
    }
    if let Some(tree) = &image.joliet_tree {
        for dir in tree.directories_in_path_table_order() {
            chunks.push((
                block(tree.node(dir).extent),
                Chunk::Bytes(serialize_dir_data(image, Plane::Joliet, dir)?),
            ));
        }
    }

    // Boot catalog.
    if let Some(catalog) = &image.eltorito {
        chunks.push((block(catalog.extent), Chunk::Bytes(catalog.record())));
    }

    // Data payloads.
    let catalog_inode = image.eltorito.as_ref().and_then(|catalog| catalog.inode);
    for index in 1..image.inodes.len() {
        if Some(index) == catalog_inode
            || image.inodes[index].refs.is_empty()
            || image.inodes[index].length == 0
        {
            continue;
        }
        chunks.push((block(image.inodes[index].extent), Chunk::Payload(index)));
    }

    // Precompute boot info table patches.
    let mut patches: Vec<(usize, BootInfoTable)> = Vec::new();
    if let Some(catalog) = &image.eltorito {
        for entry in catalog.entries() {
            if !entry.boot_info_table {
                continue;
            }
            let Some(inode) = entry.inode else { continue };
            let table = compute_boot_info_table(image, inode)?;
            patches.push((inode, table));
        }
    }

    // Sequential emission.
    chunks.sort_by_key(|&(offset, _)| offset);
    let mut pos = 0u64;
    for (offset, chunk) in chunks {
        if offset < pos {
            return Err(Error::Internal("overlapping extent assignment"));
        }
        write_zeros(out, offset - pos)?;
        pos = offset;
        match chunk {
            Chunk::Bytes(bytes) => {
                out.write_all(&bytes)?;
                pos += bytes.len() as u64;
            }
            Chunk::Payload(inode) => {
                let patch = patches
                    .iter()
                    .find(|&&(patched, _)| patched == inode)
                    .map(|&(_, table)| table);
                pos += write_payload(image, inode, patch, out)?;
            }
        }
    }

    // Trailing zeros up to the padded size, minus the secondary GPT.
    let total = image.extents.total_size;
    if let Some(hybrid) = &image.isohybrid {
        if hybrid.efi {
            let secondary = hybrid.record_secondary_gpt(total);
            let gpt_start = total - secondary.len() as u64;
            write_zeros(out, gpt_start - pos)?;
            out.write_all(&secondary)?;
            pos = total;
        }
    }
    write_zeros(out, total - pos)?;
    Ok(())
}

/// Streams one inode's payload, zero-padded to its block count, applying
/// an optional boot info table patch to the first 64 bytes.
fn write_payload(
    image: &Image,
    inode: usize,
    patch: Option<BootInfoTable>,
    out: &mut dyn Write,
) -> Result<u64> {
    let node = &image.inodes[inode];
    let length = node.length;
    let padded = u64::from(node.block_count()) * SECTOR_SIZE as u64;

    if let Some(table) = patch {
        let mut head = vec![0u8; 64.min(usize::try_from(length).unwrap_or(64))];
        read_inode_at(image, inode, 0, &mut head)?;
        table.patch(&mut head);
        out.write_all(&head)?;
        let copied = copy_inode_tail(image, inode, head.len() as u64, out)?;
        write_zeros(out, padded - head.len() as u64 - copied)?;
        return Ok(padded);
    }

    match &node.source {
        InodeSource::Image { offset } => {
            image.backing.copy_to(*offset, length, out, COPY_BUFFER_SIZE)?;
        }
        _ => {
            crate::inode::copy_inode(node, out, COPY_BUFFER_SIZE)?;
        }
    }
    write_zeros(out, padded - length)?;
    Ok(padded)
}

fn read_inode_at(image: &Image, inode: usize, offset: u64, buf: &mut [u8]) -> Result<()> {
    let node = &image.inodes[inode];
    match &node.source {
        InodeSource::Image { offset: base } => image.backing.read_exact_at(base + offset, buf),
        InodeSource::Stream { fp, offset: base } => {
            use std::io::{Read, Seek, SeekFrom};
            let mut fp = fp.borrow_mut();
            fp.seek(SeekFrom::Start(base + offset))?;
            fp.read_exact(buf)?;
            Ok(())
        }
        InodeSource::Data(data) => {
            let start = usize::try_from(offset).expect("in-memory payload");
            buf.copy_from_slice(&data[start..start + buf.len()]);
            Ok(())
        }
        InodeSource::ZeroFill => {
            buf.fill(0);
            Ok(())
        }
    }
}

fn copy_inode_tail(image: &Image, inode: usize, from: u64, out: &mut dyn Write) -> Result<u64> {
    let node = &image.inodes[inode];
    let remaining = node.length.saturating_sub(from);
    if remaining == 0 {
        return Ok(0);
    }
    match &node.source {
        InodeSource::Image { offset } => {
            image
                .backing
                .copy_to(offset + from, remaining, out, COPY_BUFFER_SIZE)
        }
        InodeSource::Stream { fp, offset } => {
            use std::io::{Seek, SeekFrom};
            let mut fp = fp.borrow_mut();
            fp.seek(SeekFrom::Start(offset + from))?;
            crate::inode::copy_data(&mut *fp, out, remaining, COPY_BUFFER_SIZE)
        }
        InodeSource::Data(data) => {
            let start = usize::try_from(from).expect("in-memory payload");
            out.write_all(&data[start..])?;
            Ok(remaining)
        }
        InodeSource::ZeroFill => write_zeros(out, remaining),
    }
}

/// Computes the boot info table for an inode by streaming its tail.
fn compute_boot_info_table(image: &Image, inode: usize) -> Result<BootInfoTable> {
    struct ChecksumSink {
        sum: u32,
        pending: [u8; 4],
        pending_len: usize,
    }
    impl Write for ChecksumSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            for &byte in buf {
                self.pending[self.pending_len] = byte;
                self.pending_len += 1;
                if self.pending_len == 4 {
                    self.sum = self.sum.wrapping_add(u32::from_le_bytes(self.pending));
                    self.pending_len = 0;
                    self.pending = [0; 4];
                }
            }
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    let node = &image.inodes[inode];
    let mut sink = ChecksumSink {
        sum: 0,
        pending: [0; 4],
        pending_len: 0,
    };
    copy_inode_tail(image, inode, 64, &mut sink)?;
    if sink.pending_len > 0 {
        sink.sum = sink.sum.wrapping_add(u32::from_le_bytes(sink.pending));
    }
    Ok(BootInfoTable {
        pvd_extent: 16,
        boot_file_extent: node.extent,
        boot_file_length: node.length as u32,
        checksum: sink.sum,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{AddOptions, Image, IsoOptions};
    use crate::types::{FixedClock, IsoTime};

    fn clock() -> Box<dyn crate::types::Clock> {
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

    #[test]
    fn test_minimal_layout_extents() {
        let mut image = Image::new(IsoOptions::default().clock(clock())).unwrap();
        image
            .add_data(b"foo\n".to_vec(), "/FOO.;1", AddOptions::default())
            .unwrap();
        plan(&mut image).unwrap();
        // PVD 16, terminator 17, version 18, PT LE 19, PT BE 21, root 23,
        // payload 24, space 25.
        assert_eq!(image.extents.terminator, 17);
        assert_eq!(image.extents.version_vd, Some(18));
        assert_eq!(image.extents.iso_pt_le, 19);
        assert_eq!(image.extents.iso_pt_be, 21);
        assert_eq!(image.iso_tree.node(image.iso_tree.root()).extent, 23);
        assert_eq!(image.inodes[1].extent, 24);
        assert_eq!(image.space_size, 25);
        assert_eq!(image.pvd.space_size, 25);
    }

    #[test]
    fn test_planner_is_idempotent() {
        let mut image = Image::new(IsoOptions::default().clock(clock())).unwrap();
        image
            .add_data(vec![0xAB; 5000], "/BIG.;1", AddOptions::default())
            .unwrap();
        plan(&mut image).unwrap();
        let first = (image.space_size, image.inodes[1].extent);
        plan(&mut image).unwrap();
        assert_eq!(first, (image.space_size, image.inodes[1].extent));
    }

    #[test]
    fn test_eltorito_layout_extents() {
        let mut image = Image::new(IsoOptions::default().clock(clock())).unwrap();
        image
            .add_data(b"boot\n".to_vec(), "/BOOT.;1", AddOptions::default())
            .unwrap();
        image
            .add_eltorito("/BOOT.;1", Some("/BOOT.CAT;1"), crate::image::EltoritoOptions::default())
            .unwrap();
        plan(&mut image).unwrap();
        // PVD 16, boot record 17, terminator 18, version 19, PTs 20/22,
        // root 24, catalog 25, boot file 26.
        assert_eq!(image.extents.boot_record, Some(17));
        assert_eq!(image.extents.terminator, 18);
        assert_eq!(image.extents.iso_pt_le, 20);
        assert_eq!(image.iso_tree.node(image.iso_tree.root()).extent, 24);
        let catalog = image.eltorito.as_ref().unwrap();
        assert_eq!(catalog.extent, 25);
        assert_eq!(catalog.initial.load_rba, 26);
        assert_eq!(image.space_size, 27);
    }

    #[test]
    fn test_joliet_layout_extents() {
        let mut image = Image::new(IsoOptions::default().clock(clock()).joliet(3)).unwrap();
        image
            .add_directory("/DIR1", AddOptions::default().joliet("/dir1"))
            .unwrap();
        plan(&mut image).unwrap();
        // PVD 16, SVD 17, terminator 18, version 19, ISO PTs 20/22,
        // Joliet PTs 24/26, ISO root 28, DIR1 29, Joliet root 30, dir1 31.
        assert_eq!(image.extents.joliet_vd, Some(17));
        assert_eq!(image.extents.iso_pt_le, 20);
        assert_eq!(image.extents.joliet_pt_le, Some(24));
        assert_eq!(image.iso_tree.node(image.iso_tree.root()).extent, 28);
        let joliet = image.joliet_tree.as_ref().unwrap();
        assert_eq!(joliet.node(joliet.root()).extent, 30);
        let dir1 = joliet.node(joliet.root()).children[0];
        assert_eq!(joliet.node(dir1).extent, 31);
    }

    #[test]
    fn test_udf_layout_extents() {
        let mut image = Image::new(IsoOptions::default().clock(clock()).udf()).unwrap();
        image
            .add_data(
                b"foo\n".to_vec(),
                "/FOO.;1",
                AddOptions::default().udf("/foo"),
            )
            .unwrap();
        plan(&mut image).unwrap();
        let udf = image.udf.as_ref().unwrap();
        assert_eq!(image.extents.udf_fsd, 257);
        assert_eq!(image.extents.udf_fs_term, 258);
        let root = udf.tree.root();
        assert_eq!(udf.tree.node(root).fe_extent, 259);
        assert_eq!(udf.tree.node(root).fid_extent, 260);
        let foo = udf.tree.node(root).children[0];
        assert_eq!(udf.tree.node(foo).fe_extent, 261);
        assert_eq!(udf.lvid.num_files, 1);
        assert_eq!(udf.lvid.num_dirs, 1);
        // Data goes after the UDF entries; anchor 2 sits at space-2.
        assert_eq!(image.inodes[1].extent, 262);
        assert_eq!(image.extents.udf_anchor2, image.space_size - 2);
    }

    #[test]
    fn test_dir_growth_on_many_children() {
        let mut image = Image::new(IsoOptions::default().clock(clock())).unwrap();
        // Each record is 48 bytes (33 + 10-byte name + pad); ~60 children
        // exceed one sector with dot/dotdot included.
        for index in 0..60 {
            let path = format!("/FILE{index:04}.;1");
            image
                .add_data(b"x".to_vec(), &path, AddOptions::default())
                .unwrap();
        }
        plan(&mut image).unwrap();
        let root = image.iso_tree.root();
        assert_eq!(image.iso_tree.node(root).data_length, 4096);
    }

    #[test]
    fn test_file_of_exactly_one_block() {
        let mut image = Image::new(IsoOptions::default().clock(clock())).unwrap();
        image
            .add_data(vec![0x5A; 2048], "/ONE.;1", AddOptions::default())
            .unwrap();
        image
            .add_data(vec![0x5A; 2049], "/TWO.;1", AddOptions::default())
            .unwrap();
        plan(&mut image).unwrap();
        // 2048 bytes occupy one extent; 2049 occupy two.
        assert_eq!(image.inodes[1].block_count(), 1);
        assert_eq!(image.inodes[2].block_count(), 2);
        assert_eq!(image.inodes[2].extent, image.inodes[1].extent + 1);
        assert_eq!(image.space_size, 25 + 2);
    }
}
