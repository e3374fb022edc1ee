//! Canonicalization ahead of encoding: glyphs re-packed into their canonical
//! byte form, table offsets reassigned, checksums made self-consistent.

use std::borrow::Cow;
use std::collections::HashSet;

use bytes::BufMut;

use crate::checksum::compute_checksum;
use crate::error::{bail, bail_if, WoffleErr};
use crate::glyph::{bbox_of, read_glyph, store_glyph, Glyph, Outline};
use crate::round4;
use crate::sfnt::{
    collection_header_size, search_metadata, FontCollection, SFNT_ENTRY_SIZE, SFNT_HEADER_SIZE,
};
use crate::table_tags::{is_transformed_tag, tag_to_u32, CFF, GLYF, HEAD, LOCA};

const CHECKSUM_ADJUSTMENT_OFFSET: usize = 8;
const INDEX_TO_LOC_FORMAT_OFFSET: usize = 51;

pub(crate) fn normalize_font_collection(collection: &mut FontCollection) -> Result<(), WoffleErr> {
    let mut glyf_done: HashSet<usize> = HashSet::new();
    for font_idx in 0..collection.fonts.len() {
        make_head_editable(collection, font_idx)?;
        collection.remove_digital_signature(font_idx);
        normalize_glyphs(collection, font_idx, &mut glyf_done)?;
    }
    normalize_offsets(collection);
    for font_idx in 0..collection.fonts.len() {
        fix_checksums(collection, font_idx)?;
    }
    Ok(())
}

fn make_head_editable(collection: &mut FontCollection, font_idx: usize) -> Result<(), WoffleErr> {
    let head_idx = match collection.table_index(font_idx, HEAD) {
        Some(idx) => idx,
        None => bail!(Semantic),
    };
    collection.tables[head_idx].data.to_mut();
    Ok(())
}

/// Rewrite glyf into canonical per-glyph packing and rebuild loca from it.
/// Prefers the short loca format, falling back to the long one when offsets
/// outgrow it.
fn normalize_glyphs(
    collection: &mut FontCollection,
    font_idx: usize,
    glyf_done: &mut HashSet<usize>,
) -> Result<(), WoffleErr> {
    let cff = collection.table_index(font_idx, CFF);
    let glyf = collection.table_index(font_idx, GLYF);
    let loca = collection.table_index(font_idx, LOCA);

    // CFF with neither glyf nor loca is fine as-is.
    if cff.is_some() && glyf.is_none() && loca.is_none() {
        return Ok(());
    }
    let (glyf_idx, loca_idx) = match (glyf, loca) {
        (Some(glyf_idx), Some(loca_idx)) => (glyf_idx, loca_idx),
        _ => bail!(Semantic),
    };
    // Shared glyf in a collection is rewritten once.
    if !glyf_done.insert(glyf_idx) {
        return Ok(());
    }

    let mut index_format = collection.index_format(font_idx)?;
    let num_glyphs = collection.num_glyphs(font_idx)?;

    let rebuilt = match rebuild_glyf_and_loca(collection, font_idx, index_format, num_glyphs)? {
        Some(tables) => tables,
        None => {
            // Short loca offsets overflowed; rewrite with the long format.
            bail_if!(index_format != 0, Bounds);
            index_format = 1;
            match rebuild_glyf_and_loca(collection, font_idx, index_format, num_glyphs)? {
                Some(tables) => tables,
                None => bail!(Bounds),
            }
        }
    };
    let (glyf_data, loca_data) = rebuilt;

    let glyf_table = &mut collection.tables[glyf_idx];
    glyf_table.length = glyf_data.len() as u32;
    glyf_table.data = Cow::Owned(glyf_data);
    let loca_table = &mut collection.tables[loca_idx];
    loca_table.length = loca_data.len() as u32;
    loca_table.data = Cow::Owned(loca_data);

    let head_idx = match collection.table_index(font_idx, HEAD) {
        Some(idx) => idx,
        None => bail!(Semantic),
    };
    collection.tables[head_idx].data.to_mut()[INDEX_TO_LOC_FORMAT_OFFSET] = index_format as u8;
    Ok(())
}

/// Returns `None` when the short loca format cannot hold the offsets.
fn rebuild_glyf_and_loca(
    collection: &FontCollection,
    font_idx: usize,
    index_format: u16,
    num_glyphs: usize,
) -> Result<Option<(Vec<u8>, Vec<u8>)>, WoffleErr> {
    let entry_size = if index_format == 0 { 2 } else { 4 };
    let mut glyf: Vec<u8> = Vec::new();
    let mut loca: Vec<u8> = Vec::with_capacity((num_glyphs + 1) * entry_size);

    for i in 0..num_glyphs {
        store_loca_entry(&mut loca, index_format, glyf.len() as u32);

        let data = collection.glyph_data(font_idx, i)?;
        let mut glyph = read_glyph(data)?;
        normalize_simple_glyph_bounding_box(&mut glyph);
        let glyph_bytes = store_glyph(&glyph);

        glyf.extend_from_slice(&glyph_bytes);
        glyf.resize(round4!(glyf.len()), 0);
        bail_if!(glyf.len() > u32::MAX as usize, Bounds);
        if index_format == 0 && glyf.len() >= (1 << 17) {
            return Ok(None);
        }
    }
    store_loca_entry(&mut loca, index_format, glyf.len() as u32);

    Ok(Some((glyf, loca)))
}

fn store_loca_entry(loca: &mut Vec<u8>, index_format: u16, value: u32) {
    if index_format == 0 {
        loca.put_u16((value >> 1) as u16);
    } else {
        loca.put_u32(value);
    }
}

/// Pin a simple glyph's bounding box to the exact extrema of its points.
/// Composite boxes are left as stored, as is a glyph with nothing to take
/// extrema of.
fn normalize_simple_glyph_bounding_box(glyph: &mut Glyph) {
    let contours = match &glyph.outline {
        Outline::Simple(contours) => contours,
        _ => return,
    };
    if contours.is_empty() || contours[0].is_empty() {
        return;
    }
    let (x_min, y_min, x_max, y_max) = bbox_of(contours.iter().flatten());
    glyph.x_min = x_min as i16;
    glyph.y_min = y_min as i16;
    glyph.x_max = x_max as i16;
    glyph.y_max = y_max as i16;
}

/// Reassign table offsets to the layout the decoder will also produce:
/// directories first, then each table once in first-reference order, padded
/// to 4 bytes.
fn normalize_offsets(collection: &mut FontCollection) {
    let num_fonts = collection.fonts.len();
    let mut offset: u32 = if collection.is_collection() {
        (collection_header_size(collection.header_version, num_fonts)
            + collection
                .fonts
                .iter()
                .map(|font| SFNT_HEADER_SIZE + SFNT_ENTRY_SIZE * font.num_tables())
                .sum::<usize>()) as u32
    } else {
        (SFNT_HEADER_SIZE + SFNT_ENTRY_SIZE * collection.fonts[0].num_tables()) as u32
    };

    let mut seen = vec![false; collection.tables.len()];
    for font_idx in 0..num_fonts {
        let indices: Vec<usize> = collection.fonts[font_idx]
            .tables
            .iter()
            .filter(|(tag, _)| !is_transformed_tag(**tag))
            .map(|(_, &idx)| idx)
            .collect();
        for idx in indices {
            if seen[idx] {
                continue;
            }
            seen[idx] = true;
            let table = &mut collection.tables[idx];
            table.offset = offset;
            offset = offset.wrapping_add(round4!(table.length));
        }
    }
}

/// Zero `head.checksumAdjustment`, recompute every table checksum, then
/// store `0xB1B0AFBA - file_checksum` back into head.
fn fix_checksums(collection: &mut FontCollection, font_idx: usize) -> Result<(), WoffleErr> {
    let head_idx = match collection.table_index(font_idx, HEAD) {
        Some(idx) => idx,
        None => bail!(Semantic),
    };
    bail_if!(collection.tables[head_idx].length < 12, Format);
    let head = collection.tables[head_idx].data.to_mut();
    head[CHECKSUM_ADJUSTMENT_OFFSET..CHECKSUM_ADJUSTMENT_OFFSET + 4].fill(0);

    let indices: Vec<usize> = collection.fonts[font_idx]
        .tables
        .iter()
        .filter(|(tag, _)| !is_transformed_tag(**tag))
        .map(|(_, &idx)| idx)
        .collect();

    let mut file_checksum: u32 = 0;
    for &idx in &indices {
        let table = &mut collection.tables[idx];
        table.checksum = compute_checksum(&table.data);
        file_checksum = file_checksum.wrapping_add(table.checksum);
    }
    file_checksum = file_checksum.wrapping_add(compute_header_checksum(collection, font_idx));

    let adjustment = 0xB1B0AFBAu32.wrapping_sub(file_checksum);
    let head = collection.tables[head_idx].data.to_mut();
    head[CHECKSUM_ADJUSTMENT_OFFSET..CHECKSUM_ADJUSTMENT_OFFSET + 4]
        .copy_from_slice(&adjustment.to_be_bytes());
    Ok(())
}

/// The checksum of the offset table and directory this font will be written
/// with, computed arithmetically.
fn compute_header_checksum(collection: &FontCollection, font_idx: usize) -> u32 {
    let font = &collection.fonts[font_idx];
    let num_tables = font.num_tables() as u16;
    let (search_range, entry_selector, range_shift) = search_metadata(num_tables);

    let mut checksum = tag_to_u32(font.flavor);
    checksum = checksum.wrapping_add(((num_tables as u32) << 16) | search_range as u32);
    checksum = checksum.wrapping_add(((entry_selector as u32) << 16) | range_shift as u32);
    for (&tag, &idx) in &font.tables {
        if is_transformed_tag(tag) {
            continue;
        }
        let table = &collection.tables[idx];
        checksum = checksum.wrapping_add(tag_to_u32(tag));
        checksum = checksum.wrapping_add(table.checksum);
        checksum = checksum.wrapping_add(table.offset);
        checksum = checksum.wrapping_add(table.length);
    }
    checksum
}
