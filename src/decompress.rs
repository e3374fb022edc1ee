//! Library for converting WOFF2 format font files back to SFNT.

use std::collections::BTreeMap;
use std::io::Write;

use brotli_decompressor::DecompressorWriter;
use bytes::{Buf, BufMut};
use font_types::Tag;

use crate::buffer::BufExt;
use crate::checksum::compute_checksum;
use crate::error::{bail, bail_if, bail_with_msg_if, usize_will_overflow, WoffleErr};
use crate::headers::{
    CollectionDirectory, CollectionDirectoryEntry, Woff2TableDirectory, WoffHeader,
    FLAG_TRANSFORM,
};
use crate::reconstruct::reconstruct_glyf;
use crate::round4;
use crate::sfnt::{
    collection_header_size, search_metadata, SFNT_ENTRY_SIZE, SFNT_HEADER_SIZE,
};
use crate::table_tags::{tag_to_u32, GLYF, HEAD, LOCA};
use crate::DEFAULT_MAX_SIZE;

// Over 14k test fonts the max compression ratio seen to date was ~20.
// >100 suggests someone wrote a bad uncompressed size.
const MAX_PLAUSIBLE_COMPRESSION_RATIO: f32 = 100.0;

/// Cap on the sum of uncompressed table lengths a container may declare,
/// the same 30 MiB limit OTS enforces.
const MAX_UNCOMPRESSED_SUM: u64 = 30 * 1024 * 1024;

const CHECKSUM_ADJUSTMENT_OFFSET: usize = 8;

/// Output interface for the WOFF2 decoder.
///
/// Writes to arbitrary offsets are supported so directory entries and
/// checksums can be fixed up after their tables are written. Reading the
/// current size is supported so tables can be laid out while appending.
pub trait Woff2Out {
    /// Append `src` at the end of the output.
    fn write(&mut self, src: &[u8]) -> Result<(), WoffleErr>;

    /// Overwrite bytes at `offset`, growing the output if needed.
    fn write_at(&mut self, offset: usize, src: &[u8]) -> Result<(), WoffleErr>;

    fn size(&self) -> usize;
}

/// Sink backed by a caller-owned growable buffer, hard-capped at `max_size`.
pub struct Woff2VecOut<'a> {
    buf: &'a mut Vec<u8>,
    max_size: usize,
}

impl<'a> Woff2VecOut<'a> {
    pub fn new(buf: &'a mut Vec<u8>, max_size: usize) -> Self {
        Self { buf, max_size }
    }
}

impl Woff2Out for Woff2VecOut<'_> {
    fn write(&mut self, src: &[u8]) -> Result<(), WoffleErr> {
        let offset = self.buf.len();
        self.write_at(offset, src)
    }

    fn write_at(&mut self, offset: usize, src: &[u8]) -> Result<(), WoffleErr> {
        bail_if!(usize_will_overflow(offset, src.len()), Bounds);
        let end = offset + src.len();
        bail_if!(end > self.max_size, Bounds);
        if end > self.buf.len() {
            self.buf.resize(end, 0);
        }
        self.buf[offset..end].copy_from_slice(src);
        Ok(())
    }

    fn size(&self) -> usize {
        self.buf.len()
    }
}

/// Read `totalSfntSize` out of a WOFF2 header for output-buffer sizing.
/// Returns 0 when the header is malformed; callers clamp the result to a
/// maximum they trust ([`DEFAULT_MAX_SIZE`]).
pub fn compute_woff2_final_size(data: &[u8]) -> usize {
    let mut input = data;
    if input.try_skip(16).is_err() {
        return 0;
    }
    match input.try_get_u32() {
        Ok(total_sfnt_size) => total_sfnt_size as usize,
        Err(_) => 0,
    }
}

/// Convert a WOFF2 container back into SFNT bytes, written to `out`.
pub fn convert_woff2_to_ttf(data: &[u8], out: &mut impl Woff2Out) -> Result<(), WoffleErr> {
    let mut input = data;

    let header = WoffHeader::parse(&mut input)?;
    let mut table_directory = Woff2TableDirectory::parse(&mut input, header.num_tables as usize)?;
    let mut collection_directory = if header.is_collection() {
        CollectionDirectory::parse(&mut input, &table_directory)?
    } else {
        CollectionDirectory::for_single_font(header.flavor, &table_directory)
    };

    // The compressed stream, metadata and private blocks must tile the rest
    // of the file exactly, with 4-byte padding between sections.
    let compressed_offset = data.len() - input.len();
    let compressed_end = compressed_offset as u64 + header.total_compressed_size as u64;
    bail_if!(compressed_end > data.len() as u64, Truncated);
    let mut src_offset = round4!(compressed_end);
    if header.meta_offset != 0 {
        bail_if!(src_offset != header.meta_offset as u64, Format);
        src_offset = round4!(header.meta_offset as u64 + header.meta_length as u64);
        bail_if!(src_offset > u32::MAX as u64, Bounds);
    }
    if header.priv_offset != 0 {
        bail_if!(src_offset != header.priv_offset as u64, Format);
        src_offset = round4!(header.priv_offset as u64 + header.priv_length as u64);
        bail_if!(src_offset > u32::MAX as u64, Bounds);
    }
    bail_if!(src_offset != round4!(data.len() as u64), Format);

    let uncompressed_size = table_directory.uncompressed_size();
    bail_if!(uncompressed_size > MAX_UNCOMPRESSED_SUM, Bounds);
    bail_if!(uncompressed_size == 0, Format);

    // Re-order tables in output (OTSpec) order and lay out the destination.
    collection_directory.sort_tables_within_each_font(&table_directory);
    layout_destination(&header, &mut table_directory, &collection_directory)?;

    let compression_ratio = header.total_sfnt_size as f32 / data.len() as f32;
    bail_with_msg_if!(
        compression_ratio > MAX_PLAUSIBLE_COMPRESSION_RATIO,
        Format,
        "implausible compression ratio {:.1}",
        compression_ratio
    );

    let compressed = &data[compressed_offset..compressed_end as usize];
    let decompressed = brotli_decompress(compressed, uncompressed_size as usize)?;

    let (header_bytes, font_infos) = generate_header(&header, &table_directory, &collection_directory);
    out.write(&header_bytes)?;

    let mut table_metadata: Vec<Option<TableMetadata>> = vec![None; table_directory.len()];
    for font_idx in 0..collection_directory.fonts.len() {
        reconstruct_font(
            &decompressed,
            &table_directory,
            &collection_directory.fonts[font_idx],
            &font_infos[font_idx],
            &mut table_metadata,
            out,
            font_idx,
        )?;
    }

    Ok(())
}

/// Decode into an owned buffer sized from the header and clamped to
/// [`DEFAULT_MAX_SIZE`].
pub fn decompress_woff2(data: &[u8]) -> Result<Vec<u8>, WoffleErr> {
    let final_size = compute_woff2_final_size(data).min(DEFAULT_MAX_SIZE);
    let mut buf: Vec<u8> = Vec::with_capacity(final_size);
    let mut out = Woff2VecOut::new(&mut buf, DEFAULT_MAX_SIZE);
    convert_woff2_to_ttf(data, &mut out)?;
    Ok(buf)
}

fn brotli_decompress(compressed: &[u8], expected_size: usize) -> Result<Vec<u8>, WoffleErr> {
    let mut output: Vec<u8> = Vec::with_capacity(expected_size);
    let mut decompressor = DecompressorWriter::new(&mut output, 4096);
    bail_if!(decompressor.write_all(compressed).is_err(), Compression);
    bail_if!(decompressor.close().is_err(), Compression);
    drop(decompressor);
    // The stream must decompress to exactly the declared total.
    bail_if!(output.len() != expected_size, Compression);
    Ok(output)
}

/// Assign destination offsets in emission order: the first table right after
/// the directories, each next one rounded up to 4 bytes, shared tables once.
/// The header's `totalSfntSize` must agree with the resulting layout.
fn layout_destination(
    header: &WoffHeader,
    table_directory: &mut Woff2TableDirectory,
    collection_directory: &CollectionDirectory,
) -> Result<(), WoffleErr> {
    let mut offset = first_table_offset(header, collection_directory) as u64;
    let mut assigned = vec![false; table_directory.len()];
    for font in &collection_directory.fonts {
        for &table_index in &font.table_indices {
            if assigned[table_index as usize] {
                continue;
            }
            assigned[table_index as usize] = true;
            let entry = &mut table_directory.tables[table_index as usize];
            bail_if!(offset > u32::MAX as u64, Bounds);
            entry.dst_offset = offset as u32;
            offset += round4!(entry.dst_length as u64);
        }
    }
    bail_if!(offset > u32::MAX as u64, Bounds);
    bail_if!(offset != header.total_sfnt_size as u64, Format);
    Ok(())
}

fn first_table_offset(header: &WoffHeader, collection_directory: &CollectionDirectory) -> usize {
    let mut offset = 0;
    if header.is_collection() {
        offset += collection_header_size(
            collection_directory.version,
            collection_directory.fonts.len(),
        );
    }
    for font in &collection_directory.fonts {
        offset += SFNT_HEADER_SIZE + SFNT_ENTRY_SIZE * font.table_indices.len();
    }
    offset
}

struct FontInfo {
    /// Checksum of this font's offset table and zero-filled directory.
    header_checksum: u32,
    /// Table tag to the absolute offset of its directory entry in the output.
    table_entry_by_tag: BTreeMap<Tag, usize>,
}

#[derive(Clone, Copy)]
struct TableMetadata {
    checksum: u32,
    dst_offset: u32,
    dst_length: u32,
}

impl TableMetadata {
    fn entry_checksum_contribution(&self) -> u32 {
        self.checksum
            .wrapping_add(self.dst_offset)
            .wrapping_add(self.dst_length)
    }
}

/// Write the TTC header (for collections) and every font's offset table with
/// zero-filled directory entries. Real values are patched in as tables are
/// reconstructed.
fn generate_header(
    header: &WoffHeader,
    table_directory: &Woff2TableDirectory,
    collection_directory: &CollectionDirectory,
) -> (Vec<u8>, Vec<FontInfo>) {
    let num_fonts = collection_directory.fonts.len();
    let mut output: Vec<u8> =
        Vec::with_capacity(first_table_offset(header, collection_directory));
    let mut font_infos: Vec<FontInfo> = Vec::with_capacity(num_fonts);

    if header.is_collection() {
        output.put_u32(tag_to_u32(header.flavor)); // TAG ttcf
        output.put_u32(collection_directory.version); // FIXED version
        output.put_u32(num_fonts as u32); // ULONG numFonts

        // Offset table locations are fully determined by the directory
        // sizes, so they can be written up front.
        let mut table_directory_offset = (collection_header_size(
            collection_directory.version,
            num_fonts,
        )) as u32;
        for font in &collection_directory.fonts {
            output.put_u32(table_directory_offset);
            table_directory_offset +=
                (SFNT_HEADER_SIZE + SFNT_ENTRY_SIZE * font.table_indices.len()) as u32;
        }

        if collection_directory.version == 0x00020000 {
            output.put_u32(0); // ULONG ulDsigTag
            output.put_u32(0); // ULONG ulDsigLength
            output.put_u32(0); // ULONG ulDsigOffset
        }
    }

    for font in &collection_directory.fonts {
        let start_offset = output.len();
        let num_tables = font.table_indices.len() as u16;
        let (search_range, entry_selector, range_shift) = search_metadata(num_tables);
        output.put_u32(tag_to_u32(font.flavor)); // sfnt version
        output.put_u16(num_tables);
        output.put_u16(search_range);
        output.put_u16(entry_selector);
        output.put_u16(range_shift);

        let mut info = FontInfo {
            header_checksum: 0,
            table_entry_by_tag: BTreeMap::new(),
        };
        for &table_index in &font.table_indices {
            let tag = table_directory.tables[table_index as usize].tag;
            info.table_entry_by_tag.insert(tag, output.len());
            output.put_u32(tag_to_u32(tag));
            output.put_u32(0); // checksum, patched later
            output.put_u32(0); // offset, patched later
            output.put_u32(0); // length, patched later
        }
        info.header_checksum = compute_checksum(&output[start_offset..]);
        font_infos.push(info);
    }

    (output, font_infos)
}

fn pad4(out: &mut impl Woff2Out) -> Result<(), WoffleErr> {
    let zeroes = [0u8; 3];
    let pad_bytes = round4!(out.size()) - out.size();
    if pad_bytes > 0 {
        out.write(&zeroes[..pad_bytes])?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn reconstruct_font(
    decompressed: &[u8],
    table_directory: &Woff2TableDirectory,
    font_entry: &CollectionDirectoryEntry,
    font_info: &FontInfo,
    table_metadata: &mut [Option<TableMetadata>],
    out: &mut impl Woff2Out,
    font_idx: usize,
) -> Result<(), WoffleErr> {
    // 'glyf' without 'loca' doesn't make sense, and both must agree on
    // being transformed.
    match (font_entry.glyf_idx, font_entry.loca_idx) {
        (Some(glyf_idx), Some(loca_idx)) => {
            let glyf = &table_directory.tables[glyf_idx as usize];
            let loca = &table_directory.tables[loca_idx as usize];
            bail_with_msg_if!(
                glyf.flags & FLAG_TRANSFORM != loca.flags & FLAG_TRANSFORM,
                Semantic,
                "cannot transform just one of glyf/loca"
            );
        }
        (Some(_), None) | (None, Some(_)) => {
            bail_with_msg_if!(true, Semantic, "cannot have just one of glyf/loca");
        }
        (None, None) => {}
    }

    let mut font_checksum: u32 = font_info.header_checksum;
    // loca data is produced while glyf is reconstructed, then written when
    // the loop reaches loca's own slot in the layout.
    let mut pending_loca: Option<(Vec<u8>, u32)> = None;

    for &table_index in &font_entry.table_indices {
        let table_index = table_index as usize;
        let table = &table_directory.tables[table_index];

        let metadata = if let Some(metadata) = table_metadata[table_index] {
            // A table may be shared between fonts of a collection, but a
            // repeat inside the first font can only be the loca slot that
            // glyf processing filled in.
            bail_if!(font_idx == 0 && table.tag != LOCA, Format);
            metadata
        } else if table.flags & FLAG_TRANSFORM == 0 {
            let table_data = table.slice(decompressed)?;

            // head is summed as if checkSumAdjustment were zero; the real
            // adjustment is written last.
            let checksum_adjustment = if table.tag == HEAD {
                bail_if!(table.transform_length < 12, Format);
                u32::from_be_bytes(table_data[8..12].try_into().unwrap())
            } else {
                0
            };
            let checksum = compute_checksum(table_data).wrapping_sub(checksum_adjustment);

            bail_if!(out.size() != table.dst_offset as usize, Bounds);
            out.write(table_data)?;
            pad4(out)?;

            let metadata = TableMetadata {
                checksum,
                dst_offset: table.dst_offset,
                dst_length: table.dst_length,
            };
            table_metadata[table_index] = Some(metadata);
            metadata
        } else if table.tag == GLYF {
            let loca_idx = match font_entry.loca_idx {
                Some(idx) => idx as usize,
                None => bail!(Semantic),
            };
            let loca_entry = &table_directory.tables[loca_idx];

            let transformed = table.slice(decompressed)?;
            let reconstructed =
                reconstruct_glyf(transformed, table.dst_length, loca_entry.dst_length)?;

            bail_if!(out.size() != table.dst_offset as usize, Bounds);
            out.write(&reconstructed.glyf)?;
            pad4(out)?;

            pending_loca = Some((reconstructed.loca, reconstructed.loca_checksum));

            let metadata = TableMetadata {
                checksum: reconstructed.glyf_checksum,
                dst_offset: table.dst_offset,
                dst_length: table.dst_length,
            };
            table_metadata[table_index] = Some(metadata);
            metadata
        } else if table.tag == LOCA {
            let (loca_bytes, loca_checksum) = match pending_loca.take() {
                Some(pending) => pending,
                None => bail!(Semantic),
            };

            bail_if!(out.size() != table.dst_offset as usize, Bounds);
            out.write(&loca_bytes)?;
            pad4(out)?;

            let metadata = TableMetadata {
                checksum: loca_checksum,
                dst_offset: table.dst_offset,
                dst_length: table.dst_length,
            };
            table_metadata[table_index] = Some(metadata);
            metadata
        } else {
            // transform for the tag is not known
            bail!(Format);
        };

        font_checksum = font_checksum.wrapping_add(metadata.checksum);

        // Patch the real values into this font's zero-filled directory
        // entry, and account for them in the font checksum.
        let entry_offset = match font_info.table_entry_by_tag.get(&table.tag) {
            Some(&offset) => offset,
            None => bail!(Format),
        };
        let mut entry = [0u8; 12];
        entry[0..4].copy_from_slice(&metadata.checksum.to_be_bytes());
        entry[4..8].copy_from_slice(&metadata.dst_offset.to_be_bytes());
        entry[8..12].copy_from_slice(&metadata.dst_length.to_be_bytes());
        out.write_at(entry_offset + 4, &entry)?;
        font_checksum = font_checksum.wrapping_add(metadata.entry_checksum_contribution());
    }

    // Update 'head' checkSumAdjustment: every table was summed with the
    // adjustment taken as zero, so the stored value is 0xB1B0AFBA minus the
    // font checksum.
    if let Some(head_idx) = font_entry.head_idx {
        let head_metadata = match table_metadata[head_idx as usize] {
            Some(metadata) => metadata,
            None => bail!(Format),
        };
        bail_if!(head_metadata.dst_length < 12, Format);
        let adjustment = 0xB1B0AFBAu32.wrapping_sub(font_checksum);
        out.write_at(
            head_metadata.dst_offset as usize + CHECKSUM_ADJUSTMENT_OFFSET,
            &adjustment.to_be_bytes(),
        )?;
    }

    Ok(())
}
