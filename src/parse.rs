// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Parsing an existing image into the in-memory model.
//!
//! The parser reads the volume descriptor set in extent order,
//! materializes every plane it finds (ISO 9660 tree with Rock Ridge,
//! Joliet tree, El Torito catalog, UDF structures, isohybrid MBR), and
//! cross-links file payloads by content address: records in different
//! planes that point at the same extent share one inode.
//!
//! The tolerated malformed-image quirks from real-world ISOs (big-endian
//! path table stored little-endian, duplicate `.` entries, descriptor
//! version oddities, wrong anchor tag locations, non-terminator file set
//! terminators) warn through `log` and continue; strict mode turns the
//! descriptor-version class of them into errors.

use std::collections::HashMap;

use fallible_iterator::FallibleIterator;

use crate::directory::{DirRecordIter, DirTree, FileFlags, NodeId, NodeKind, RawDirRecord,
    XA_RECORD_LEN};
use crate::eltorito::BootCatalog;
use crate::error::{Error, Result};
use crate::image::{Backing, Image, IsoOptions, UdfState};
use crate::inode::{Inode, InodeRef, Plane};
use crate::isohybrid::IsoHybrid;
use crate::rockridge::{ContinuationArea, RockRidgeEntry, parse_su_area};
use crate::types::{SECTOR_SIZE, SYSTEM_AREA_SIZE};
use crate::udf::entries::{FileCharacteristics, UdfFileEntry, UdfFileIdentifier, UdfFileType,
    UdfTree};
use crate::udf::{
    TagIdent, UdfDescriptorSet, UdfFileSetDescriptor, UdfImplementationUseVolumeDescriptor,
    UdfLogicalVolumeDescriptor, UdfLogicalVolumeIntegrityDescriptor, UdfPartitionDescriptor,
    UdfPrimaryVolumeDescriptor, parse_anchor, parse_tag, recognition_ident,
};
use crate::volume::{BootRecordVolumeDescriptor, VdKind, VolumeDescriptor,
    VolumePartitionDescriptor, duplicate_pvd_matches};

fn read_sector(backing: &Backing, extent: u32) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; SECTOR_SIZE];
    backing.read_exact_at(u64::from(extent) * SECTOR_SIZE as u64, &mut buf)?;
    Ok(buf)
}

fn read_data(backing: &Backing, extent: u32, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    backing.read_exact_at(u64::from(extent) * SECTOR_SIZE as u64, &mut buf)?;
    Ok(buf)
}

/// Parses a complete image from `backing`.
///
/// # Errors
///
/// Fails with `InvalidIso`-class errors on malformed images.
pub(crate) fn parse_image(backing: Backing, strict: bool) -> Result<Image> {
    let mut system_area = vec![0u8; SYSTEM_AREA_SIZE];
    backing.read_exact_at(0, &mut system_area)?;

    // --- Volume descriptor set -------------------------------------
    let mut pvd: Option<VolumeDescriptor> = None;
    let mut pvd_sector: Option<Vec<u8>> = None;
    let mut duplicate_pvds = 0usize;
    let mut joliet_vd = None;
    let mut enhanced_vd = None;
    let mut vpds: Vec<VolumePartitionDescriptor> = Vec::new();
    let mut boot_record: Option<BootRecordVolumeDescriptor> = None;
    let mut extent = 16u32;
    let terminator_extent;
    loop {
        let sector = read_sector(&backing, extent)?;
        match sector[0] {
            0 => boot_record = Some(BootRecordVolumeDescriptor::parse(&sector)?),
            1 => {
                if let Some(first) = &pvd_sector {
                    if !duplicate_pvd_matches(first, &sector) {
                        log::warn!("duplicate PVD at extent {extent} differs from the primary");
                    }
                    duplicate_pvds += 1;
                } else {
                    pvd = Some(VolumeDescriptor::parse(&sector, strict)?);
                    pvd_sector = Some(sector);
                }
            }
            2 => {
                let vd = VolumeDescriptor::parse(&sector, strict)?;
                match vd.kind {
                    VdKind::Joliet(_) => joliet_vd = Some(vd),
                    _ => enhanced_vd = Some(vd),
                }
            }
            3 => vpds.push(VolumePartitionDescriptor::parse(&sector)?),
            255 => {
                terminator_extent = extent;
                break;
            }
            _ => return Err(Error::InvalidIso("unknown volume descriptor type")),
        }
        extent += 1;
        if extent > 16 + 256 {
            return Err(Error::InvalidIso("volume descriptor set has no terminator"));
        }
    }
    let pvd = pvd.ok_or(Error::InvalidIso("image has no primary volume descriptor"))?;

    // --- UDF volume recognition sequence ---------------------------
    let mut udf_present = false;
    let mut probe = terminator_extent + 1;
    while let Ok(sector) = read_sector(&backing, probe) {
        let Some(ident) = recognition_ident(&sector) else { break };
        if &ident == b"NSR03" || &ident == b"NSR02" {
            udf_present = true;
        }
        if &ident == b"TEA01" {
            probe += 1;
            break;
        }
        probe += 1;
    }
    // Anything between the last descriptor-ish sector and the path table
    // is the version volume descriptor genisoimage leaves behind.
    let version_vd = pvd.path_table_location_le > probe;

    let xa = pvd.has_xa();

    // --- Build the image shell -------------------------------------
    let mut image = Image::new(IsoOptions {
        interchange_level: 3,
        strict,
        xa,
        ..IsoOptions::default()
    })?;
    image.backing = backing;
    image.system_area = system_area;
    image.version_vd = version_vd;
    image.duplicate_pvds = duplicate_pvds;
    image.space_size = pvd.space_size;
    image.pvd = pvd;
    image.joliet_vd = joliet_vd;
    image.enhanced_vd = enhanced_vd;
    image.vpds = vpds;
    image.options.joliet = match image.joliet_vd.as_ref().map(|vd| vd.kind) {
        Some(VdKind::Joliet(level)) => Some(level),
        _ => None,
    };
    image.options.enhanced = image.enhanced_vd.is_some();

    // --- ISO 9660 tree (with Rock Ridge) ---------------------------
    let mut inode_map: HashMap<(u32, u64), usize> = HashMap::new();
    let root_extent = image.pvd.root_dir_extent;
    let root_size = image.pvd.root_dir_size;
    let mut tree = DirTree::new(crate::types::DirRecordDateTime::unspecified());
    let mut rr_ce = ContinuationArea::default();
    let mut rr_version = None;
    parse_directory(
        &image.backing,
        &mut tree,
        0,
        root_extent,
        root_size,
        xa,
        &mut image.inodes,
        &mut inode_map,
        &mut rr_ce,
        &mut rr_version,
        Plane::Iso,
        0,
    )?;
    image.iso_tree = tree;
    image.rr_ce = rr_ce;
    image.options.rock_ridge = rr_version;
    link_relocations(&mut image);

    // --- Joliet tree ------------------------------------------------
    if let Some(vd) = &image.joliet_vd {
        let mut tree = DirTree::new(crate::types::DirRecordDateTime::unspecified());
        let (root_extent, root_size) = (vd.root_dir_extent, vd.root_dir_size);
        let mut no_ce = ContinuationArea::default();
        let mut no_rr = None;
        parse_directory(
            &image.backing,
            &mut tree,
            0,
            root_extent,
            root_size,
            false,
            &mut image.inodes,
            &mut inode_map,
            &mut no_ce,
            &mut no_rr,
            Plane::Joliet,
            0,
        )?;
        image.joliet_tree = Some(tree);
    }

    // Cross-check the little-endian path table against the tree; the
    // big-endian copy is validated leniently (known quirk).
    let pt_data = read_data(
        &image.backing,
        image.pvd.path_table_location_le,
        image.pvd.path_table_size as usize,
    )?;
    let _ = crate::path_table::PathTable::parse(&pt_data, image.pvd.path_table_size as usize, false)?;
    if image.pvd.path_table_location_be != 0 {
        let be_data = read_data(
            &image.backing,
            image.pvd.path_table_location_be,
            image.pvd.path_table_size as usize,
        )?;
        let _ =
            crate::path_table::PathTable::parse(&be_data, image.pvd.path_table_size as usize, true)?;
    }

    // --- El Torito ---------------------------------------------------
    if let Some(record) = &boot_record {
        if record.is_eltorito() {
            let catalog_extent = record.catalog_extent();
            let catalog_data = read_sector(&image.backing, catalog_extent)?;
            let mut catalog = BootCatalog::parse(&catalog_data, strict)?;
            catalog.extent = catalog_extent;
            catalog.inode = inode_map
                .iter()
                .find(|&(&(extent, _), _)| extent == catalog_extent)
                .map(|(_, &inode)| inode);
            for entry in catalog.entries_mut() {
                entry.inode = inode_map
                    .iter()
                    .find(|&(&(extent, _), _)| extent == entry.load_rba)
                    .map(|(_, &inode)| inode);
            }
            image.eltorito = Some(catalog);
        }
    }

    // --- Isohybrid ---------------------------------------------------
    image.isohybrid = IsoHybrid::parse(&image.system_area);

    // --- UDF ---------------------------------------------------------
    if udf_present {
        image.udf = Some(parse_udf(&image.backing, &mut image.inodes, &mut inode_map)?);
        image.options.udf = true;
    }

    image.dirty = false;
    image.planned = false;
    Ok(image)
}

/// Recursively parses one directory's records into the tree.
fn parse_directory(
    backing: &Backing,
    tree: &mut DirTree,
    dir: NodeId,
    extent: u32,
    size: u32,
    xa: bool,
    inodes: &mut Vec<Inode>,
    inode_map: &mut HashMap<(u32, u64), usize>,
    rr_ce: &mut ContinuationArea,
    rr_version: &mut Option<crate::rockridge::RockRidgeVersion>,
    plane: Plane,
    depth: usize,
) -> Result<()> {
    if depth > 64 {
        return Err(Error::InvalidIso("directory tree too deep or cyclic"));
    }
    tree.node_mut(dir).extent = extent;
    tree.node_mut(dir).data_length = u64::from(size);
    let data = read_data(backing, extent, size as usize)?;
    let mut iter = DirRecordIter::new(&data);
    let mut seen_dot = false;
    let mut seen_dotdot = false;
    // Multi-extent accumulation state.
    let mut pending: Option<(RawDirRecord, u64)> = None;

    while let Some(record) = iter.next()? {
        if record.is_dot() {
            if seen_dot {
                log::warn!("duplicate '.' entry in directory at extent {extent}; ignoring");
                continue;
            }
            seen_dot = true;
            let entry = parse_record_rr(backing, &record, xa, rr_ce, rr_version)?;
            tree.node_mut(dir).date = record.date;
            if plane == Plane::Iso {
                tree.node_mut(dir).rr_dot = entry;
            }
            continue;
        }
        if record.is_dotdot() {
            seen_dotdot = true;
            let entry = parse_record_rr(backing, &record, xa, rr_ce, rr_version)?;
            if plane == Plane::Iso {
                tree.node_mut(dir).rr_dotdot = entry;
            }
            continue;
        }

        if record.flags.contains(FileFlags::MULTI_EXTENT) {
            match &mut pending {
                Some((first, total)) if first.ident == record.ident => {
                    *total += u64::from(record.data_length);
                }
                Some(_) => {
                    return Err(Error::InvalidIso(
                        "interleaved multi-extent records are not supported",
                    ));
                }
                None => pending = Some((record.clone(), u64::from(record.data_length))),
            }
            continue;
        }
        let (record, total_length) = match pending.take() {
            Some((first, total)) if first.ident == record.ident => {
                (first, total + u64::from(record.data_length))
            }
            Some(_) => {
                return Err(Error::InvalidIso(
                    "multi-extent chain interrupted by another record",
                ));
            }
            None => {
                let len = u64::from(record.data_length);
                (record, len)
            }
        };

        if record.is_dir() {
            let child = tree.add_directory(dir, record.ident.clone(), record.date)?;
            tree.node_mut(child).flags = record.flags;
            let entry = parse_record_rr(backing, &record, xa, rr_ce, rr_version)?;
            tree.node_mut(child).rock_ridge = entry;
            parse_directory(
                backing,
                tree,
                child,
                record.extent,
                record.data_length,
                xa,
                inodes,
                inode_map,
                rr_ce,
                rr_version,
                plane,
                depth + 1,
            )?;
        } else {
            let inode = if total_length == 0 {
                0
            } else {
                *inode_map
                    .entry((record.extent, total_length))
                    .or_insert_with(|| {
                        inodes.push(Inode::from_image(
                            u64::from(record.extent) * SECTOR_SIZE as u64,
                            total_length,
                        ));
                        inodes.len() - 1
                    })
            };
            let child = tree.add_file(dir, record.ident.clone(), inode, record.date)?;
            tree.node_mut(child).flags = record.flags - FileFlags::DIRECTORY;
            let entry = parse_record_rr(backing, &record, xa, rr_ce, rr_version)?;
            if let Some(entry) = &entry {
                // A zero-length record with CL is a relocation
                // placeholder, resolved once the whole tree is parsed.
                if entry.cl_extent.is_some() {
                    tree.node_mut(child).kind = NodeKind::RelocationPlaceholder;
                }
            }
            tree.node_mut(child).rock_ridge = entry;
            if inode != 0 {
                inodes[inode].add_ref(InodeRef { plane, node: child });
                inodes[inode].extent = record.extent;
            }
        }
    }
    if !seen_dotdot {
        log::debug!("directory at extent {extent} has no '..' entry");
    }
    Ok(())
}

/// Parses a record's system-use area, following continuation areas.
fn parse_record_rr(
    backing: &Backing,
    record: &RawDirRecord,
    xa: bool,
    rr_ce: &mut ContinuationArea,
    rr_version: &mut Option<crate::rockridge::RockRidgeVersion>,
) -> Result<Option<RockRidgeEntry>> {
    let su = if xa && record.system_use.len() >= XA_RECORD_LEN {
        &record.system_use[XA_RECORD_LEN..]
    } else {
        &record.system_use[..]
    };
    if su.len() < 4 {
        return Ok(None);
    }
    let mut entry = RockRidgeEntry::default();
    let mut ce = parse_su_area(&mut entry, su)?;
    let mut first_slot = None;
    let mut hops = 0;
    while let Some((ce_extent, offset, len)) = ce {
        hops += 1;
        if hops > 8 {
            return Err(Error::InvalidIso("continuation area chain too long"));
        }
        let block_index = rr_ce.block_for_extent(ce_extent);
        rr_ce.blocks[block_index].track_entry(offset, len)?;
        if first_slot.is_none() {
            first_slot = Some(crate::rockridge::CeSlot {
                block: block_index,
                offset,
                len,
            });
        }
        let block = read_sector(backing, ce_extent)?;
        let start = offset as usize;
        let end = (offset + len) as usize;
        if end > block.len() {
            return Err(Error::InvalidIso("continuation entry overruns its extent"));
        }
        ce = parse_su_area(&mut entry, &block[start..end])?;
    }
    entry.ce_slot = first_slot;
    if entry.version.is_none() && entry.px.is_none() && entry.alternate_name.is_none()
        && entry.sp.is_none() && !entry.er && entry.symlink_components.is_empty()
        && entry.tf.is_none() && entry.cl_extent.is_none() && entry.pl_extent.is_none()
        && !entry.relocated
    {
        return Ok(None);
    }
    if let Some(version) = entry.version {
        if rr_version.is_none() {
            *rr_version = Some(version);
        }
    }
    Ok(Some(entry))
}

/// Resolves CL placeholders against the relocated directories.
fn link_relocations(image: &mut Image) {
    let mut placeholders = Vec::new();
    let mut dirs_by_extent: HashMap<u32, NodeId> = HashMap::new();
    let mut stack = vec![image.iso_tree.root()];
    while let Some(node) = stack.pop() {
        let n = image.iso_tree.node(node);
        stack.extend(n.children.iter().copied());
        if n.is_dir() {
            dirs_by_extent.insert(n.extent, node);
        }
        if n.kind == NodeKind::RelocationPlaceholder {
            if let Some(entry) = &n.rock_ridge {
                if let Some(target_extent) = entry.cl_extent {
                    placeholders.push((node, target_extent));
                }
            }
        }
    }
    for (placeholder, target_extent) in placeholders {
        let Some(&target) = dirs_by_extent.get(&target_extent) else {
            log::warn!("CL entry points at extent {target_extent} which is not a directory");
            continue;
        };
        let logical_parent = image.iso_tree.node(placeholder).parent;
        image.iso_tree.node_mut(placeholder).relocation_target = Some(target);
        image.iso_tree.node_mut(target).logical_parent = logical_parent;
        if let Some(physical_parent) = image.iso_tree.node(target).parent {
            image.rr_moved_dir = Some(physical_parent);
            image.rr_moved_name = image.iso_tree.node(physical_parent).ident.clone();
        }
    }
}

/// Parses the UDF plane.
fn parse_udf(
    backing: &Backing,
    inodes: &mut Vec<Inode>,
    inode_map: &mut HashMap<(u32, u64), usize>,
) -> Result<UdfState> {
    // Anchor at 256; its recorded location is tolerated to be wrong.
    let anchor_sector = read_sector(backing, 256)?;
    let tag = parse_tag(&anchor_sector, 256, true)?;
    if tag.ident != TagIdent::AnchorPointer as u16 {
        return Err(Error::InvalidIso("no UDF anchor at extent 256"));
    }
    let (main_extent, reserve_extent) = parse_anchor(&anchor_sector);

    let mut read_set = |start: u32| -> Result<UdfDescriptorSet> {
        let mut pvd = None;
        let mut impl_use = None;
        let mut partition = None;
        let mut logical_volume = None;
        let mut unallocated = None;
        for offset in 0..16u32 {
            let sector = read_sector(backing, start + offset)?;
            let tag = match parse_tag(&sector, start + offset, false) {
                Ok(tag) => tag,
                Err(_) if offset > 0 => break,
                Err(err) => return Err(err),
            };
            match tag.ident {
                ident if ident == TagIdent::PrimaryVolume as u16 => {
                    pvd = Some(UdfPrimaryVolumeDescriptor::parse(&sector)?);
                }
                ident if ident == TagIdent::ImplementationUse as u16 => {
                    impl_use = Some(UdfImplementationUseVolumeDescriptor::parse(&sector)?);
                }
                ident if ident == TagIdent::Partition as u16 => {
                    partition = Some(UdfPartitionDescriptor::parse(&sector)?);
                }
                ident if ident == TagIdent::LogicalVolume as u16 => {
                    logical_volume = Some(UdfLogicalVolumeDescriptor::parse(&sector)?);
                }
                ident if ident == TagIdent::UnallocatedSpace as u16 => {
                    unallocated = Some(crate::udf::UdfUnallocatedSpaceDescriptor::parse(&sector));
                }
                ident if ident == TagIdent::Terminating as u16 => break,
                _ => {}
            }
        }
        Ok(UdfDescriptorSet {
            pvd: pvd.ok_or(Error::InvalidIso("UDF sequence missing primary descriptor"))?,
            impl_use: impl_use
                .ok_or(Error::InvalidIso("UDF sequence missing implementation use"))?,
            partition: partition.ok_or(Error::InvalidIso("UDF sequence missing partition"))?,
            logical_volume: logical_volume
                .ok_or(Error::InvalidIso("UDF sequence missing logical volume"))?,
            unallocated: unallocated
                .ok_or(Error::InvalidIso("UDF sequence missing unallocated space"))?,
        })
    };

    let main = read_set(main_extent.loc)?;
    let reserve = if reserve_extent.loc != 0 {
        read_set(reserve_extent.loc)?
    } else {
        main.clone()
    };

    let lvid_extent = main.logical_volume.integrity_extent.loc;
    let lvid_sector = read_sector(backing, lvid_extent)?;
    parse_tag(&lvid_sector, lvid_extent, false)?;
    let lvid = UdfLogicalVolumeIntegrityDescriptor::parse(&lvid_sector)?;

    let part_start = main.partition.start;
    let fsd_block = main.logical_volume.fsd_location.block;
    let fsd_sector = read_sector(backing, part_start + fsd_block)?;
    parse_tag(&fsd_sector, fsd_block, false)?;
    let fsd = UdfFileSetDescriptor::parse(&fsd_sector)?;

    // The file set terminator follows; its tag identifier should be 8
    // but is not in some images (known quirk).
    if let Ok(term_sector) = read_sector(backing, part_start + fsd_block + 1) {
        if let Ok(term_tag) = parse_tag(&term_sector, fsd_block + 1, false) {
            if term_tag.ident != TagIdent::Terminating as u16 {
                log::warn!(
                    "UDF file set terminator has tag identifier {}; expected 8",
                    term_tag.ident
                );
            }
        }
    }

    let mut tree = UdfTree::new(crate::udf::entries::UdfTimestamp::unspecified());
    let root = tree.root();
    parse_udf_directory(
        backing,
        &mut tree,
        root,
        part_start + fsd.root_icb.block,
        part_start,
        inodes,
        inode_map,
        0,
    )?;

    Ok(UdfState {
        main,
        reserve,
        lvid,
        fsd,
        tree,
    })
}

/// Recursively parses a UDF directory File Entry and its FID area.
fn parse_udf_directory(
    backing: &Backing,
    tree: &mut UdfTree,
    node: usize,
    fe_extent: u32,
    part_start: u32,
    inodes: &mut Vec<Inode>,
    inode_map: &mut HashMap<(u32, u64), usize>,
    depth: usize,
) -> Result<()> {
    if depth > 64 {
        return Err(Error::InvalidIso("UDF tree too deep or cyclic"));
    }
    let sector = read_sector(backing, fe_extent)?;
    let Some(entry) = UdfFileEntry::parse(&sector, fe_extent - part_start)? else {
        tree.node_mut(node).unreadable = true;
        tree.node_mut(node).fe_extent = fe_extent;
        return Ok(());
    };
    {
        let n = tree.node_mut(node);
        n.fe_extent = fe_extent;
        n.unique_id = entry.unique_id;
        n.times = (
            entry.access_time,
            entry.modification_time,
            entry.attribute_time,
        );
    }
    tree.observe_unique_id(entry.unique_id);

    let Some(first_ad) = entry.alloc_descs.first() else {
        return Ok(());
    };
    let fid_extent = part_start + first_ad.block;
    let fid_len = first_ad.len;
    {
        let n = tree.node_mut(node);
        n.fid_extent = fid_extent;
        n.fid_data_len = fid_len;
    }
    let data = read_data(backing, fid_extent, fid_len as usize)?;
    let mut cursor = 0usize;
    while cursor < data.len() {
        let block_location = first_ad.block + (cursor / SECTOR_SIZE) as u32;
        let (fid, consumed) = UdfFileIdentifier::parse(&data[cursor..], block_location)?;
        cursor += consumed;
        if fid.characteristics.contains(FileCharacteristics::PARENT)
            || fid.characteristics.contains(FileCharacteristics::DELETED)
        {
            continue;
        }
        let child_fe_extent = part_start + fid.icb.block;
        if fid.characteristics.contains(FileCharacteristics::DIRECTORY) {
            let child = tree.add(
                node,
                &fid.name,
                UdfFileType::Directory,
                None,
                crate::udf::entries::UdfTimestamp::unspecified(),
            )?;
            tree.node_mut(child).hidden =
                fid.characteristics.contains(FileCharacteristics::HIDDEN);
            parse_udf_directory(
                backing,
                tree,
                child,
                child_fe_extent,
                part_start,
                inodes,
                inode_map,
                depth + 1,
            )?;
        } else {
            let child_sector = read_sector(backing, child_fe_extent)?;
            let child_entry = UdfFileEntry::parse(&child_sector, child_fe_extent - part_start)?;
            let (kind, inode, unreadable) = match child_entry {
                None => (UdfFileType::File, None, true),
                Some(child_entry) => {
                    let length = child_entry.info_length;
                    let inode = if length == 0 {
                        Some(0)
                    } else {
                        let data_extent = part_start
                            + child_entry
                                .alloc_descs
                                .first()
                                .map_or(0, |ad| ad.block);
                        Some(*inode_map.entry((data_extent, length)).or_insert_with(|| {
                            inodes.push(Inode::from_image(
                                u64::from(data_extent) * SECTOR_SIZE as u64,
                                length,
                            ));
                            inodes.last_mut().expect("just pushed").extent = data_extent;
                            inodes.len() - 1
                        }))
                    };
                    (child_entry.file_type, inode, false)
                }
            };
            let child = tree.add(
                node,
                &fid.name,
                kind,
                inode,
                crate::udf::entries::UdfTimestamp::unspecified(),
            )?;
            {
                let n = tree.node_mut(child);
                n.fe_extent = child_fe_extent;
                n.unreadable = unreadable;
                n.hidden = fid.characteristics.contains(FileCharacteristics::HIDDEN);
            }
            if let Some(inode) = inode {
                if inode != 0 {
                    inodes[inode].add_ref(InodeRef {
                        plane: Plane::Udf,
                        node: child,
                    });
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{AddOptions, IsoOptions, PathKind};
    use crate::types::{FixedClock, IsoTime};
    use std::io::Cursor;

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

    fn roundtrip(image: &mut Image) -> Image {
        let mut bytes = Vec::new();
        image.write_fp(&mut bytes).unwrap();
        Image::open(Box::new(Cursor::new(bytes))).unwrap()
    }

    #[test]
    fn test_parse_minimal_image() {
        let mut image = Image::new(IsoOptions::default().clock(clock())).unwrap();
        image
            .add_data(b"foo\n".to_vec(), "/FOO.;1", AddOptions::default())
            .unwrap();
        let parsed = roundtrip(&mut image);
        assert_eq!(parsed.space_size(), 25);
        assert!(!parsed.has_joliet());
        assert!(!parsed.has_rock_ridge());
        assert_eq!(
            parsed.get_file_from_iso(PathKind::Iso("/FOO.;1")).unwrap(),
            b"foo\n"
        );
    }

    #[test]
    fn test_parse_preserves_directories() {
        let mut image = Image::new(IsoOptions::default().clock(clock())).unwrap();
        image.add_directory("/DIR1", AddOptions::default()).unwrap();
        image
            .add_data(b"nested".to_vec(), "/DIR1/FILE.;1", AddOptions::default())
            .unwrap();
        let parsed = roundtrip(&mut image);
        let record = parsed.get_record(PathKind::Iso("/DIR1")).unwrap();
        assert!(record.is_dir);
        assert_eq!(
            parsed
                .get_file_from_iso(PathKind::Iso("/DIR1/FILE.;1"))
                .unwrap(),
            b"nested"
        );
    }

    #[test]
    fn test_parse_rock_ridge_names() {
        let mut image = Image::new(
            IsoOptions::default()
                .clock(clock())
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
        let parsed = roundtrip(&mut image);
        assert!(parsed.has_rock_ridge());
        let record = parsed.get_record(PathKind::Iso("/FOO.;1")).unwrap();
        assert_eq!(record.rr_name.as_deref(), Some("foo"));
        assert_eq!(
            parsed
                .get_file_from_iso(PathKind::RockRidge("/foo"))
                .unwrap(),
            b"foo\n"
        );
    }

    #[test]
    fn test_parse_joliet_tree() {
        let mut image = Image::new(IsoOptions::default().clock(clock()).joliet(3)).unwrap();
        image
            .add_data(
                b"payload".to_vec(),
                "/FOO.;1",
                AddOptions::default().joliet("/long file name.txt"),
            )
            .unwrap();
        let parsed = roundtrip(&mut image);
        assert!(parsed.has_joliet());
        assert_eq!(
            parsed
                .get_file_from_iso(PathKind::Joliet("/long file name.txt"))
                .unwrap(),
            b"payload"
        );
        // Both planes share one payload, hence one inode.
        let iso = parsed.get_record(PathKind::Iso("/FOO.;1")).unwrap();
        let joliet = parsed
            .get_record(PathKind::Joliet("/long file name.txt"))
            .unwrap();
        assert_eq!(iso.extent, joliet.extent);
    }

    #[test]
    fn test_parse_eltorito() {
        let mut image = Image::new(IsoOptions::default().clock(clock())).unwrap();
        image
            .add_data(b"boot\n".to_vec(), "/BOOT.;1", AddOptions::default())
            .unwrap();
        image
            .add_eltorito(
                "/BOOT.;1",
                Some("/BOOT.CAT;1"),
                crate::image::EltoritoOptions::default(),
            )
            .unwrap();
        let parsed = roundtrip(&mut image);
        let catalog = parsed.eltorito.as_ref().unwrap();
        assert_eq!(catalog.extent, 25);
        assert_eq!(catalog.initial.load_rba, 26);
        assert!(catalog.initial.inode.is_some());
    }

    #[test]
    fn test_parse_udf_plane() {
        let mut image = Image::new(IsoOptions::default().clock(clock()).udf()).unwrap();
        image
            .add_data(
                b"foo\n".to_vec(),
                "/FOO.;1",
                AddOptions::default().udf("/foo"),
            )
            .unwrap();
        let parsed = roundtrip(&mut image);
        assert!(parsed.has_udf());
        assert_eq!(
            parsed.get_file_from_iso(PathKind::Udf("/foo")).unwrap(),
            b"foo\n"
        );
        let udf = parsed.udf.as_ref().unwrap();
        assert_eq!(udf.lvid.num_files, 1);
        assert_eq!(udf.lvid.num_dirs, 1);
    }

    #[test]
    fn test_reopen_after_rewrite_is_stable() {
        let mut image = Image::new(IsoOptions::default().clock(clock())).unwrap();
        image
            .add_data(b"foo\n".to_vec(), "/FOO.;1", AddOptions::default())
            .unwrap();
        let mut first = Vec::new();
        image.write_fp(&mut first).unwrap();
        let mut reopened = Image::open(Box::new(Cursor::new(first.clone()))).unwrap();
        let mut second = Vec::new();
        reopened.write_fp(&mut second).unwrap();
        assert_eq!(first, second);
    }
}
