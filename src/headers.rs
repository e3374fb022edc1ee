//! WOFF2 wire structures: the file header, the compact table directory and
//! the TTC collection directory.

use std::ops::{Deref, DerefMut};

use bytes::Buf;
use font_types::Tag;

use crate::error::{bail, bail_if, bail_with_msg_if, u32_will_overflow, WoffleErr};
use crate::table_tags::{tag_from_u32, GLYF, HEAD, KNOWN_TABLE_TAGS, LOCA, TTCF};
use crate::variable_length::BufVariableExt;

pub(crate) const WOFF2_SIGNATURE: Tag = Tag::new(b"wOF2");
pub(crate) const WOFF2_HEADER_SIZE: usize = 48;

// Per-table flag bits, stored next to the 6-bit known-tag index.
pub(crate) const FLAG_CONTINUE_STREAM: u32 = 1 << 4;
pub(crate) const FLAG_TRANSFORM: u32 = 1 << 5;

/// The 48-byte WOFF2 file header.
///
/// <https://www.w3.org/TR/WOFF2/#woff20Header>
pub(crate) struct WoffHeader {
    /// The "sfnt version" of the input font, or `ttcf`.
    pub flavor: Tag,
    /// Total size of the WOFF2 file.
    pub length: u32,
    /// Number of entries in the table directory.
    pub num_tables: u16,
    /// Reserved; must be 0.
    pub reserved: u16,
    /// Total size needed for the uncompressed font data, including the sfnt
    /// header, directory and per-table padding.
    pub total_sfnt_size: u32,
    /// Total length of the compressed data block.
    pub total_compressed_size: u32,
    pub major_version: u16,
    pub minor_version: u16,
    /// Offset to the compressed metadata block, from the start of the file.
    pub meta_offset: u32,
    pub meta_length: u32,
    pub meta_orig_length: u32,
    /// Offset to the private data block, from the start of the file.
    pub priv_offset: u32,
    pub priv_length: u32,
}

impl WoffHeader {
    pub fn parse(input: &mut &[u8]) -> Result<Self, WoffleErr> {
        let input_len = input.len();
        bail_if!(input_len > u32::MAX as usize, Bounds);
        let input_len_u32 = input_len as u32;

        let signature = tag_from_u32(input.try_get_u32()?);
        bail_if!(signature != WOFF2_SIGNATURE, Format);

        let header = Self {
            flavor: tag_from_u32(input.try_get_u32()?),
            length: input.try_get_u32()?,
            num_tables: input.try_get_u16()?,
            reserved: input.try_get_u16()?,
            total_sfnt_size: input.try_get_u32()?,
            total_compressed_size: input.try_get_u32()?,
            major_version: input.try_get_u16()?,
            minor_version: input.try_get_u16()?,
            meta_offset: input.try_get_u32()?,
            meta_length: input.try_get_u32()?,
            meta_orig_length: input.try_get_u32()?,
            priv_offset: input.try_get_u32()?,
            priv_length: input.try_get_u32()?,
        };

        bail_if!(header.length != input_len_u32, Format);
        bail_if!(header.num_tables == 0, Format);
        bail_if!(header.reserved != 0, Format);
        if header.meta_offset != 0 {
            bail_if!(
                header.meta_offset >= input_len_u32
                    || input_len_u32 - header.meta_offset < header.meta_length,
                Bounds
            );
        }
        if header.priv_offset != 0 {
            bail_if!(
                header.priv_offset >= input_len_u32
                    || input_len_u32 - header.priv_offset < header.priv_length,
                Bounds
            );
        }

        Ok(header)
    }

    pub fn is_collection(&self) -> bool {
        self.flavor == TTCF
    }
}

/// One parsed entry of the compact table directory.
pub(crate) struct Woff2TableEntry {
    pub tag: Tag,
    pub flags: u32,
    /// Offset of this table's payload within the decompressed stream. The
    /// compressed bytes form a single run owned by the first entry.
    pub src_offset: u32,
    /// Length of this table's payload within the decompressed stream.
    pub transform_length: u32,
    /// Offset of the reconstructed table within the output font.
    pub dst_offset: u32,
    /// Length of the reconstructed table.
    pub dst_length: u32,
}

impl Woff2TableEntry {
    pub fn slice<'a>(&self, decompressed: &'a [u8]) -> Result<&'a [u8], WoffleErr> {
        let start = self.src_offset as usize;
        let end = start + self.transform_length as usize;
        match decompressed.get(start..end) {
            Some(slice) => Ok(slice),
            None => bail!(Bounds),
        }
    }
}

pub(crate) struct Woff2TableDirectory {
    pub tables: Vec<Woff2TableEntry>,
}

impl Deref for Woff2TableDirectory {
    type Target = Vec<Woff2TableEntry>;
    fn deref(&self) -> &Self::Target {
        &self.tables
    }
}
impl DerefMut for Woff2TableDirectory {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.tables
    }
}

impl Woff2TableDirectory {
    /// Parse the short-format directory. Entries record their slice of the
    /// decompressed stream as a running sum of transform lengths.
    ///
    /// <https://www.w3.org/TR/WOFF2/#table_dir_format>
    pub fn parse(input: &mut &[u8], num_tables: usize) -> Result<Self, WoffleErr> {
        let mut src_offset: u32 = 0;
        let mut tables = Vec::with_capacity(num_tables);
        for i in 0..num_tables {
            let flag_byte = input.try_get_u8()?;
            // Bits 6 and 7 are reserved and must be 0.
            bail_if!(flag_byte & 0xc0 != 0, Format);

            let tag = match KNOWN_TABLE_TAGS.get((flag_byte & 0x3f) as usize) {
                Some(tag) => *tag,
                None => tag_from_u32(input.try_get_u32()?),
            };

            let mut flags: u32 = 0;
            if i > 0 {
                flags |= FLAG_CONTINUE_STREAM;
            }
            // glyf and loca are always stored transformed
            if tag == GLYF || tag == LOCA {
                flags |= FLAG_TRANSFORM;
            }

            let dst_length = input.try_get_base128_u32()?;
            let mut transform_length = dst_length;
            if flags & FLAG_TRANSFORM != 0 {
                transform_length = input.try_get_base128_u32()?;
                bail_if!(tag == LOCA && transform_length != 0, Format);
            }

            bail_if!(u32_will_overflow(src_offset, transform_length), Bounds);
            tables.push(Woff2TableEntry {
                tag,
                flags,
                src_offset,
                transform_length,
                dst_offset: 0, // assigned once the output layout is known
                dst_length,
            });
            src_offset += transform_length;
        }
        Ok(Self { tables })
    }

    /// Total number of bytes the decompressed stream must hold.
    pub fn uncompressed_size(&self) -> u64 {
        self.tables
            .iter()
            .map(|table| table.transform_length as u64)
            .sum()
    }
}

/// <https://www.w3.org/TR/WOFF2/#collection_dir_format>
pub(crate) struct CollectionDirectory {
    /// The version of the TTC header in the original font.
    pub version: u32,
    pub fonts: Vec<CollectionDirectoryEntry>,
}

impl CollectionDirectory {
    pub fn parse(
        input: &mut &[u8],
        table_directory: &Woff2TableDirectory,
    ) -> Result<Self, WoffleErr> {
        let version = input.try_get_u32()?;
        let num_fonts = input.try_get_255_u16()?;

        bail_if!(version != 0x00010000 && version != 0x00020000, Format);
        bail_if!(num_fonts == 0, Format);

        let mut fonts = Vec::with_capacity(num_fonts as usize);
        for _ in 0..num_fonts {
            fonts.push(CollectionDirectoryEntry::parse(input, table_directory)?);
        }

        Ok(Self { version, fonts })
    }

    /// A synthetic one-font directory so standalone fonts and collections
    /// share the reconstruction path.
    pub fn for_single_font(flavor: Tag, table_directory: &Woff2TableDirectory) -> Self {
        let table_indices: Vec<u16> = (0..table_directory.len() as u16).collect();
        let mut head_idx: Option<u16> = None;
        let mut glyf_idx: Option<u16> = None;
        let mut loca_idx: Option<u16> = None;
        for (table_index, table) in table_directory.iter().enumerate() {
            if table.tag == HEAD {
                head_idx = Some(table_index as u16);
            } else if table.tag == GLYF {
                glyf_idx = Some(table_index as u16);
            } else if table.tag == LOCA {
                loca_idx = Some(table_index as u16);
            }
        }
        Self {
            version: 0,
            fonts: vec![CollectionDirectoryEntry {
                flavor,
                table_indices,
                head_idx,
                glyf_idx,
                loca_idx,
            }],
        }
    }

    /// The SFNT output lists each font's tables in ascending tag order.
    pub fn sort_tables_within_each_font(&mut self, tables: &Woff2TableDirectory) {
        for font in &mut self.fonts {
            font.table_indices
                .sort_by_cached_key(|idx| tables[*idx as usize].tag);
        }
    }
}

pub(crate) struct CollectionDirectoryEntry {
    /// The "sfnt version" of the font
    pub flavor: Tag,
    /// Which of the directory's tables this font references.
    pub table_indices: Vec<u16>,

    pub head_idx: Option<u16>,
    pub glyf_idx: Option<u16>,
    pub loca_idx: Option<u16>,
}

impl CollectionDirectoryEntry {
    pub fn parse(
        input: &mut &[u8],
        tables: &Woff2TableDirectory,
    ) -> Result<Self, WoffleErr> {
        let num_tables = input.try_get_255_u16()?;
        let flavor = tag_from_u32(input.try_get_u32()?);

        bail_if!(num_tables == 0, Format);

        let mut head_idx: Option<u16> = None;
        let mut glyf_idx: Option<u16> = None;
        let mut loca_idx: Option<u16> = None;
        let mut table_indices = Vec::with_capacity(num_tables as usize);
        for _ in 0..num_tables {
            let table_index = input.try_get_255_u16()?;
            bail_if!(table_index as usize >= tables.len(), Format);

            let tag = tables[table_index as usize].tag;
            if tag == HEAD {
                head_idx = Some(table_index);
            } else if tag == GLYF {
                glyf_idx = Some(table_index);
            } else if tag == LOCA {
                loca_idx = Some(table_index);
            }

            table_indices.push(table_index);
        }

        // If we have both glyf and loca make sure they are consecutive.
        // Reject if we only have one.
        match (glyf_idx, loca_idx) {
            (Some(glyf_idx), Some(loca_idx)) => {
                bail_with_msg_if!(
                    glyf_idx > loca_idx || loca_idx - glyf_idx != 1,
                    Semantic,
                    "TTC font has non-consecutive glyf/loca"
                );
            }
            (Some(_), None) | (None, Some(_)) => bail!(Semantic),
            (None, None) => {}
        };

        Ok(Self {
            flavor,
            table_indices,
            head_idx,
            glyf_idx,
            loca_idx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    fn minimal_header_bytes() -> Vec<u8> {
        let mut out = Vec::new();
        out.put_slice(b"wOF2");
        out.put_slice(b"\x00\x01\x00\x00"); // flavor
        out.put_u32(48); // length; patched below if data follows
        out.put_u16(1); // numTables
        out.put_u16(0); // reserved
        out.put_u32(1000); // totalSfntSize
        out.put_u32(20); // totalCompressedSize
        out.put_u16(1); // majorVersion
        out.put_u16(0); // minorVersion
        out.put_u32(0); // metaOffset
        out.put_u32(0); // metaLength
        out.put_u32(0); // metaOrigLength
        out.put_u32(0); // privOffset
        out.put_u32(0); // privLength
        out
    }

    #[test]
    fn header_parses() {
        let bytes = minimal_header_bytes();
        let mut input = &bytes[..];
        let header = WoffHeader::parse(&mut input).unwrap();
        assert_eq!(header.num_tables, 1);
        assert_eq!(header.total_compressed_size, 20);
        assert!(!header.is_collection());
    }

    #[test]
    fn header_rejects_bad_signature() {
        let mut bytes = minimal_header_bytes();
        bytes[0] = b'x';
        assert!(WoffHeader::parse(&mut &bytes[..]).is_err());
    }

    #[test]
    fn header_rejects_nonzero_reserved() {
        let mut bytes = minimal_header_bytes();
        bytes[15] = 1;
        assert_eq!(
            WoffHeader::parse(&mut &bytes[..]).err(),
            Some(WoffleErr::Format)
        );
    }

    #[test]
    fn header_rejects_length_mismatch() {
        let mut bytes = minimal_header_bytes();
        bytes.push(0);
        assert_eq!(
            WoffHeader::parse(&mut &bytes[..]).err(),
            Some(WoffleErr::Format)
        );
    }

    #[test]
    fn directory_reads_known_and_explicit_tags() {
        let mut bytes = Vec::new();
        // entry 0: known tag 10 = glyf, transformed: origLength 100, transformLength 60
        bytes.put_u8(10);
        bytes.put_u8(100);
        bytes.put_u8(60);
        // entry 1: known tag 11 = loca, transformLength must be 0
        bytes.put_u8(11);
        bytes.put_u8(4);
        bytes.put_u8(0);
        // entry 2: explicit tag
        bytes.put_u8(63);
        bytes.put_slice(b"ZZZZ");
        bytes.put_u8(7);

        let mut input = &bytes[..];
        let directory = Woff2TableDirectory::parse(&mut input, 3).unwrap();
        assert_eq!(directory.tables[0].tag, GLYF);
        assert_eq!(directory.tables[0].flags, FLAG_TRANSFORM);
        assert_eq!(directory.tables[0].transform_length, 60);
        assert_eq!(directory.tables[0].dst_length, 100);
        assert_eq!(directory.tables[1].tag, LOCA);
        assert_eq!(directory.tables[1].src_offset, 60);
        assert_eq!(directory.tables[2].tag, Tag::new(b"ZZZZ"));
        assert_eq!(
            directory.tables[2].flags,
            FLAG_CONTINUE_STREAM
        );
        assert_eq!(directory.uncompressed_size(), 67);
    }

    #[test]
    fn directory_rejects_reserved_flag_bits() {
        let bytes = [0x40u8, 0, 0];
        let mut input = &bytes[..];
        assert_eq!(
            Woff2TableDirectory::parse(&mut input, 1).err(),
            Some(WoffleErr::Format)
        );
    }

    #[test]
    fn directory_rejects_transformed_loca_payload() {
        let bytes = [11u8, 4, 2];
        let mut input = &bytes[..];
        assert_eq!(
            Woff2TableDirectory::parse(&mut input, 1).err(),
            Some(WoffleErr::Format)
        );
    }
}
