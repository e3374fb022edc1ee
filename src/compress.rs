//! Library for converting SFNT font files to their WOFF2 versions.

use std::collections::HashMap;

use brotli::enc::backward_references::BrotliEncoderMode;
use brotli::enc::BrotliEncoderParams;
use bytes::BufMut;
use font_types::Tag;

use crate::error::{bail, bail_if, bail_with_msg_if, WoffleErr};
use crate::headers::{WOFF2_HEADER_SIZE, WOFF2_SIGNATURE};
use crate::normalize::normalize_font_collection;
use crate::round4;
use crate::sfnt::{
    collection_header_size, Font, FontCollection, SFNT_ENTRY_SIZE, SFNT_HEADER_SIZE,
};
use crate::table_tags::{
    is_transformed_tag, known_tag_index, tag_to_u32, transformed_tag, GLYF, HEAD, LOCA, TTCF,
};
use crate::transform::transform_glyf_and_loca;
use crate::variable_length::{base128_size, put_255_u16, put_base128, size_of_255_u16};

/// Encoding knobs. The defaults are the reference configuration: quality 11,
/// no extended metadata.
pub struct Woff2Params {
    /// Brotli quality, 1..=11.
    pub brotli_quality: u8,
    /// Uncompressed XML metadata to embed, if any.
    pub extended_metadata: Vec<u8>,
}

impl Default for Woff2Params {
    fn default() -> Self {
        Self {
            brotli_quality: 11,
            extended_metadata: Vec::new(),
        }
    }
}

/// Upper bound for sizing the output buffer of [`convert_ttf_to_woff2`].
///
/// Except for the header, which is 32 bytes larger in WOFF2 format, every
/// part of the output should come out smaller than its input counterpart
/// (short directory, transforms, compression). Some headroom anyway.
pub fn max_woff2_compressed_size(data: &[u8], extended_metadata: &[u8]) -> usize {
    data.len() + 1024 + extended_metadata.len()
}

fn compressed_buffer_size(original_size: usize) -> usize {
    original_size + (original_size >> 2) + 10240
}

fn brotli_compress(data: &[u8], mode: BrotliEncoderMode, quality: u8) -> Result<Vec<u8>, WoffleErr> {
    let params = BrotliEncoderParams {
        quality: quality as i32,
        mode,
        ..BrotliEncoderParams::default()
    };
    let mut compressed: Vec<u8> = Vec::with_capacity(compressed_buffer_size(data.len()));
    let mut input = data;
    match brotli::BrotliCompress(&mut input, &mut compressed, &params) {
        Ok(_) => Ok(compressed),
        Err(_) => Err(WoffleErr::Compression),
    }
}

/// One directory entry of the output container, in emission order.
struct EncTable {
    tag: Tag,
    src_length: u32,
    transform_length: u32,
    transformed: bool,
}

impl EncTable {
    fn entry_size(&self) -> usize {
        let mut size = if (known_tag_index(self.tag) & 0x3f) != 0x3f {
            1
        } else {
            5
        };
        size += base128_size(self.src_length);
        if self.transformed {
            size += base128_size(self.transform_length);
        }
        size
    }

    fn store(&self, out: &mut Vec<u8>) {
        let flag_byte = known_tag_index(self.tag);
        out.put_u8(flag_byte);
        // 0x3f means an arbitrary tag; bits 6 and 7 stay zero.
        if (flag_byte & 0x3f) == 0x3f {
            out.put_u32(tag_to_u32(self.tag));
        }
        put_base128(out, self.src_length);
        if self.transformed {
            put_base128(out, self.transform_length);
        }
    }
}

/// Convert SFNT bytes into a WOFF2 container written into `result`, sized by
/// the caller from [`max_woff2_compressed_size`]. Returns the output length.
pub fn convert_ttf_to_woff2(
    data: &[u8],
    result: &mut [u8],
    params: &Woff2Params,
) -> Result<usize, WoffleErr> {
    let woff2 = compress_woff2(data, params)?;
    bail_with_msg_if!(
        woff2.len() > result.len(),
        Bounds,
        "result allocation was too small ({} vs {} bytes)",
        result.len(),
        woff2.len()
    );
    result[..woff2.len()].copy_from_slice(&woff2);
    Ok(woff2.len())
}

/// Convert SFNT bytes into an owned WOFF2 container.
pub fn compress_woff2(data: &[u8], params: &Woff2Params) -> Result<Vec<u8>, WoffleErr> {
    let quality = params.brotli_quality.clamp(1, 11);

    let mut collection = FontCollection::parse(data)?;
    normalize_font_collection(&mut collection)?;
    let mut twins_by_glyf = HashMap::new();
    for font_idx in 0..collection.fonts.len() {
        transform_glyf_and_loca(&mut collection, font_idx, &mut twins_by_glyf)?;
    }

    // Collect every table payload, transformed twins standing in for their
    // originals, into one combined buffer compressed as a single stream.
    let mut enc_tables: Vec<EncTable> = Vec::new();
    let mut font_dir_indices: Vec<Vec<u16>> = Vec::with_capacity(collection.fonts.len());
    let mut dir_index_of: HashMap<usize, u16> = HashMap::new();
    let mut transform_buf: Vec<u8> = Vec::new();
    for font in &collection.fonts {
        let mut indices = Vec::with_capacity(font.num_tables());
        for tag in output_ordered_tags(font) {
            let table_idx = match font.tables.get(&tag) {
                Some(&table_idx) => table_idx,
                None => bail!(Format),
            };
            if let Some(&dir_index) = dir_index_of.get(&table_idx) {
                indices.push(dir_index);
                continue;
            }

            let table = &collection.tables[table_idx];
            let twin = font
                .tables
                .get(&transformed_tag(tag))
                .map(|&twin_idx| &collection.tables[twin_idx]);
            let (payload, transform_length, transformed) = match twin {
                Some(twin) => (&twin.data, twin.length, true),
                None => (&table.data, table.length, false),
            };
            transform_buf.extend_from_slice(payload);

            bail_if!(enc_tables.len() >= u16::MAX as usize, Bounds);
            let dir_index = enc_tables.len() as u16;
            dir_index_of.insert(table_idx, dir_index);
            enc_tables.push(EncTable {
                tag,
                src_length: table.length,
                transform_length,
                transformed,
            });
            indices.push(dir_index);
        }
        font_dir_indices.push(indices);
    }
    bail_if!(enc_tables.is_empty(), Format);

    // Compress all transformed data in one stream.
    let compressed = brotli_compress(&transform_buf, BrotliEncoderMode::BROTLI_MODE_FONT, quality)?;

    let compressed_metadata = if params.extended_metadata.is_empty() {
        Vec::new()
    } else {
        brotli_compress(
            &params.extended_metadata,
            BrotliEncoderMode::BROTLI_MODE_TEXT,
            quality,
        )?
    };

    let woff2_length = compute_woff2_length(
        &collection,
        &enc_tables,
        &font_dir_indices,
        compressed.len(),
        compressed_metadata.len(),
    )?;
    bail_if!(woff2_length > u32::MAX as u64, Bounds);

    let total_sfnt_size = compute_uncompressed_length(&collection);
    bail_if!(total_sfnt_size > u32::MAX as u64, Bounds);
    bail_if!(compressed.len() > u32::MAX as usize, Bounds);

    let first_font = &collection.fonts[0];
    let head = match collection.find_table(0, HEAD) {
        Some(table) => table,
        None => bail!(Semantic),
    };
    bail_if!(head.length < 8, Format);

    let mut out: Vec<u8> = Vec::with_capacity(woff2_length as usize);

    // WOFF2 header (http://www.w3.org/TR/WOFF2/#woff20Header)
    out.put_u32(tag_to_u32(WOFF2_SIGNATURE));
    if collection.fonts.len() == 1 {
        out.put_u32(tag_to_u32(first_font.flavor));
    } else {
        out.put_u32(tag_to_u32(TTCF));
    }
    out.put_u32(woff2_length as u32);
    out.put_u16(enc_tables.len() as u16);
    out.put_u16(0); // reserved
    out.put_u32(total_sfnt_size as u32);
    out.put_u32(compressed.len() as u32); // totalCompressedSize
    out.put_slice(&head.data[4..8]); // head.fontRevision
    if compressed_metadata.is_empty() {
        out.put_u32(0); // metaOffset
        out.put_u32(0); // metaLength
        out.put_u32(0); // metaOrigLength
    } else {
        out.put_u32((woff2_length as usize - compressed_metadata.len()) as u32);
        out.put_u32(compressed_metadata.len() as u32);
        out.put_u32(params.extended_metadata.len() as u32);
    }
    out.put_u32(0); // privOffset
    out.put_u32(0); // privLength

    // table directory (http://www.w3.org/TR/WOFF2/#table_dir_format)
    for table in &enc_tables {
        table.store(&mut out);
    }

    // for collections only, the collection directory
    if collection.fonts.len() > 1 {
        out.put_u32(collection.header_version);
        put_255_u16(&mut out, collection.fonts.len() as u16);
        for (font, indices) in collection.fonts.iter().zip(&font_dir_indices) {
            put_255_u16(&mut out, indices.len() as u16);
            out.put_u32(tag_to_u32(font.flavor));
            for &index in indices {
                put_255_u16(&mut out, index);
            }
        }
    }

    // single compressed payload (http://www.w3.org/TR/WOFF2/#table_format)
    out.put_slice(&compressed);
    out.resize(round4!(out.len()), 0);
    out.put_slice(&compressed_metadata);

    bail_with_msg_if!(
        out.len() as u64 != woff2_length,
        Format,
        "mismatch between computed and actual length ({} vs {})",
        woff2_length,
        out.len()
    );
    Ok(out)
}

fn compute_woff2_length(
    collection: &FontCollection,
    enc_tables: &[EncTable],
    font_dir_indices: &[Vec<u16>],
    compressed_len: usize,
    compressed_metadata_len: usize,
) -> Result<u64, WoffleErr> {
    let mut size = WOFF2_HEADER_SIZE as u64;
    for table in enc_tables {
        size += table.entry_size() as u64;
    }

    if collection.fonts.len() > 1 {
        size += 4; // UInt32 version of the TTC header
        size += size_of_255_u16(collection.fonts.len() as u16) as u64;
        for (font, indices) in collection.fonts.iter().zip(font_dir_indices) {
            bail_if!(indices.len() > u16::MAX as usize, Bounds);
            size += size_of_255_u16(indices.len() as u16) as u64;
            size += 4; // UInt32 flavor
            for &index in indices {
                size += size_of_255_u16(index) as u64;
            }
        }
    }

    size += compressed_len as u64;
    size = round4!(size);
    size += compressed_metadata_len as u64;
    Ok(size)
}

/// Directory emission order: ascending tag order, except that a loca entry
/// must immediately follow its glyf entry.
fn output_ordered_tags(font: &Font) -> Vec<Tag> {
    let mut tags: Vec<Tag> = font
        .tables
        .keys()
        .copied()
        .filter(|&tag| !is_transformed_tag(tag) && tag != LOCA)
        .collect();
    if font.tables.contains_key(&LOCA) {
        match tags.iter().position(|&tag| tag == GLYF) {
            Some(glyf_pos) => tags.insert(glyf_pos + 1, LOCA),
            None => tags.push(LOCA),
        }
    }
    tags
}

/// The size of the SFNT the decoder will lay out; shared tables counted
/// once. A one-font collection is emitted as a standalone font, so only a
/// real multi-font collection pays for the TTC header.
fn compute_uncompressed_length(collection: &FontCollection) -> u64 {
    let mut size: u64 = if collection.fonts.len() > 1 {
        collection_header_size(collection.header_version, collection.fonts.len()) as u64
    } else {
        0
    };
    let mut seen = vec![false; collection.tables.len()];
    for font in &collection.fonts {
        size += (SFNT_HEADER_SIZE + SFNT_ENTRY_SIZE * font.num_tables()) as u64;
        for (&tag, &table_idx) in &font.tables {
            if is_transformed_tag(tag) || seen[table_idx] {
                continue;
            }
            seen[table_idx] = true;
            size += round4!(collection.tables[table_idx].length as u64);
        }
    }
    size
}
