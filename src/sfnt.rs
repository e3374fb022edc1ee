//! Data model for fonts in SFNT format: the table directory is parsed, table
//! bytes are kept as views into the input until something (normalization,
//! reconstruction) needs to replace them.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};

use bytes::{Buf, BufMut};
use font_types::Tag;

use crate::error::{bail, bail_if, u32_will_overflow, WoffleErr};
use crate::round4;
use crate::table_tags::{is_transformed_tag, tag_from_u32, tag_to_u32, DSIG, GLYF, HEAD, LOCA, TTCF};

pub(crate) const SFNT_HEADER_SIZE: usize = 12;
pub(crate) const SFNT_ENTRY_SIZE: usize = 16;

/// One font table. `data` either borrows from the buffer the font was parsed
/// from or owns a replacement; never both.
pub struct Table<'a> {
    pub tag: Tag,
    pub checksum: u32,
    pub offset: u32,
    pub length: u32,
    pub data: Cow<'a, [u8]>,
}

/// A single font: a flavor plus references into the collection's dense table
/// store, iterated in ascending tag order.
pub struct Font {
    pub flavor: Tag,
    pub tables: BTreeMap<Tag, usize>,
}

impl Font {
    /// Number of real tables, pseudo-tagged transform twins excluded.
    pub fn num_tables(&self) -> usize {
        self.tables
            .keys()
            .filter(|&&tag| !is_transformed_tag(tag))
            .count()
    }
}

/// One or more fonts over a shared table store. A standalone font is a
/// collection of one with `header_version == 0`.
pub struct FontCollection<'a> {
    /// 0 for a standalone font, 0x00010000 / 0x00020000 for a TTC.
    pub header_version: u32,
    pub tables: Vec<Table<'a>>,
    pub fonts: Vec<Font>,
}

/// Search metadata of the SFNT offset table, recomputed on every write.
/// Truncation to the 16-bit fields mirrors the format itself.
pub(crate) fn search_metadata(num_tables: u16) -> (u16, u16, u16) {
    let mut max_pow2: u16 = 0;
    while 1u32 << (max_pow2 + 1) <= num_tables as u32 {
        max_pow2 += 1;
    }
    let search_range = (1u32 << max_pow2) << 4;
    let range_shift = ((num_tables as u32) << 4) - search_range;
    (search_range as u16, max_pow2, range_shift as u16)
}

/// Size of the TTC header. 0 if the version indicates a standalone font.
pub(crate) fn collection_header_size(header_version: u32, num_fonts: usize) -> usize {
    let mut size: usize = 0;
    if header_version == 0x00020000 {
        size += 12; // ulDsig{Tag,Length,Offset}
    }
    if header_version == 0x00010000 || header_version == 0x00020000 {
        size += 12 // TTCTag, Version, numFonts
            + 4 * num_fonts; // OffsetTable[numFonts]
    }
    size
}

impl<'a> FontCollection<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, WoffleErr> {
        let mut peek = data;
        let flavor = tag_from_u32(peek.try_get_u32()?);
        if flavor == TTCF {
            Self::parse_collection(data)
        } else {
            let mut tables = Vec::new();
            let font = parse_font(data, 0, &mut tables, None)?;
            Ok(FontCollection {
                header_version: 0,
                tables,
                fonts: vec![font],
            })
        }
    }

    fn parse_collection(data: &'a [u8]) -> Result<Self, WoffleErr> {
        let mut input = data;
        let _ttc_tag = input.try_get_u32()?;
        let header_version = input.try_get_u32()?;
        bail_if!(
            header_version != 0x00010000 && header_version != 0x00020000,
            Format
        );
        let num_fonts = input.try_get_u32()?;
        bail_if!(num_fonts == 0, Format);
        bail_if!(num_fonts > u16::MAX as u32, Bounds);

        let mut offsets = Vec::with_capacity(num_fonts as usize);
        for _ in 0..num_fonts {
            offsets.push(input.try_get_u32()?);
        }

        let mut tables = Vec::new();
        let mut fonts = Vec::with_capacity(num_fonts as usize);
        // Reuse identity: two fonts referencing the same source region get
        // the same table index.
        let mut index_by_region: HashMap<(u32, u32), usize> = HashMap::new();
        for offset in offsets {
            fonts.push(parse_font(
                data,
                offset as usize,
                &mut tables,
                Some(&mut index_by_region),
            )?);
        }

        Ok(FontCollection {
            header_version,
            tables,
            fonts,
        })
    }

    pub fn is_collection(&self) -> bool {
        self.header_version != 0
    }

    pub(crate) fn table_index(&self, font_idx: usize, tag: Tag) -> Option<usize> {
        self.fonts[font_idx].tables.get(&tag).copied()
    }

    pub(crate) fn find_table(&self, font_idx: usize, tag: Tag) -> Option<&Table<'a>> {
        self.table_index(font_idx, tag).map(|idx| &self.tables[idx])
    }

    /// Glyph count derived from the loca and head tables.
    pub(crate) fn num_glyphs(&self, font_idx: usize) -> Result<usize, WoffleErr> {
        let loca = match self.find_table(font_idx, LOCA) {
            Some(table) => table,
            None => bail!(Semantic),
        };
        let entry_size = if self.index_format(font_idx)? == 0 { 2 } else { 4 };
        let num_entries = loca.length as usize / entry_size;
        bail_if!(num_entries == 0, Format);
        Ok(num_entries - 1)
    }

    /// `indexToLocFormat` from byte 51 of the head table.
    pub(crate) fn index_format(&self, font_idx: usize) -> Result<u16, WoffleErr> {
        let head = match self.find_table(font_idx, HEAD) {
            Some(table) => table,
            None => bail!(Semantic),
        };
        bail_if!(head.length < 52, Format);
        Ok(head.data[51] as u16)
    }

    /// The raw bytes of one glyph, located through loca.
    pub(crate) fn glyph_data(&self, font_idx: usize, glyph_index: usize) -> Result<&[u8], WoffleErr> {
        let index_format = self.index_format(font_idx)?;
        let loca = match self.find_table(font_idx, LOCA) {
            Some(table) => table,
            None => bail!(Semantic),
        };
        let glyf = match self.find_table(font_idx, GLYF) {
            Some(table) => table,
            None => bail!(Semantic),
        };

        let mut loca_buf: &[u8] = &loca.data;
        let (start, end) = if index_format == 0 {
            bail_if!(loca_buf.remaining() < 2 * glyph_index + 4, Truncated);
            loca_buf.advance(2 * glyph_index);
            let offset1 = loca_buf.try_get_u16()? as usize * 2;
            let offset2 = loca_buf.try_get_u16()? as usize * 2;
            (offset1, offset2)
        } else {
            bail_if!(loca_buf.remaining() < 4 * glyph_index + 8, Truncated);
            loca_buf.advance(4 * glyph_index);
            let offset1 = loca_buf.try_get_u32()? as usize;
            let offset2 = loca_buf.try_get_u32()? as usize;
            (offset1, offset2)
        };
        bail_if!(end < start || end > glyf.length as usize, Bounds);
        Ok(&glyf.data[start..end])
    }

    /// Drop the digital-signature table from every font that carries it.
    pub(crate) fn remove_digital_signature(&mut self, font_idx: usize) {
        self.fonts[font_idx].tables.remove(&DSIG);
    }

    /// Serialize a standalone font: header with recomputed search metadata,
    /// directory in tag order, each table zero-padded to 4 bytes at its
    /// recorded offset.
    pub fn write(&self) -> Result<Vec<u8>, WoffleErr> {
        bail_if!(self.is_collection() || self.fonts.len() != 1, Format);
        let font = &self.fonts[0];
        let num_tables = font.num_tables();
        bail_if!(num_tables > u16::MAX as usize, Bounds);

        let mut total = (SFNT_HEADER_SIZE + SFNT_ENTRY_SIZE * num_tables) as u32;
        for &idx in font.tables.values() {
            let table = &self.tables[idx];
            bail_if!(
                u32_will_overflow(table.offset, round4!(table.length)),
                Bounds
            );
            total = total.max(table.offset + round4!(table.length));
        }

        let mut out = vec![0u8; total as usize];
        let mut header = &mut out[..];
        header.put_u32(tag_to_u32(font.flavor));
        header.put_u16(num_tables as u16);
        let (search_range, entry_selector, range_shift) = search_metadata(num_tables as u16);
        header.put_u16(search_range);
        header.put_u16(entry_selector);
        header.put_u16(range_shift);
        for &idx in font.tables.values() {
            let table = &self.tables[idx];
            header.put_u32(tag_to_u32(table.tag));
            header.put_u32(table.checksum);
            header.put_u32(table.offset);
            header.put_u32(table.length);
        }

        for &idx in font.tables.values() {
            let table = &self.tables[idx];
            let start = table.offset as usize;
            out[start..start + table.length as usize].copy_from_slice(&table.data);
        }

        Ok(out)
    }
}

/// Parse one SFNT directory at `offset` and register its tables. When
/// `index_by_region` is given (collections), identical source regions map to
/// a single shared table.
fn parse_font<'a>(
    data: &'a [u8],
    offset: usize,
    tables: &mut Vec<Table<'a>>,
    mut index_by_region: Option<&mut HashMap<(u32, u32), usize>>,
) -> Result<Font, WoffleErr> {
    bail_if!(offset > data.len(), Truncated);
    let mut input = &data[offset..];

    // searchRange, entrySelector and rangeShift are recomputed on write, so
    // skip them here.
    let flavor = tag_from_u32(input.try_get_u32()?);
    let num_tables = input.try_get_u16()?;
    input.try_get_u16()?;
    input.try_get_u16()?;
    input.try_get_u16()?;

    let mut font = Font {
        flavor,
        tables: BTreeMap::new(),
    };
    let mut intervals: BTreeMap<u32, u32> = BTreeMap::new();
    for _ in 0..num_tables {
        let tag = tag_from_u32(input.try_get_u32()?);
        let checksum = input.try_get_u32()?;
        let table_offset = input.try_get_u32()?;
        let length = input.try_get_u32()?;

        bail_if!(table_offset & 3 != 0, Format);
        bail_if!(
            length as usize > data.len()
                || data.len() - (length as usize) < table_offset as usize,
            Bounds
        );
        bail_if!(font.tables.contains_key(&tag), Format);

        let region = (table_offset, length);
        let reused = index_by_region
            .as_ref()
            .and_then(|map| map.get(&region).copied());
        let index = match reused {
            Some(index) => index,
            None => {
                let start = table_offset as usize;
                tables.push(Table {
                    tag,
                    checksum,
                    offset: table_offset,
                    length,
                    data: Cow::Borrowed(&data[start..start + length as usize]),
                });
                let index = tables.len() - 1;
                if let Some(map) = index_by_region.as_mut() {
                    map.insert(region, index);
                }
                index
            }
        };
        intervals.insert(table_offset, length);
        font.tables.insert(tag, index);
    }

    // Tables must not overlap in the source byte stream.
    let mut last_offset = (SFNT_HEADER_SIZE + SFNT_ENTRY_SIZE * num_tables as usize) as u64;
    for (&start, &length) in &intervals {
        bail_if!((start as u64) < last_offset, Format);
        last_offset = start as u64 + length as u64;
    }

    Ok(font)
}
