//! End-to-end container tests: encode, decode and the
//! encode-decode-encode byte-identity oracle.

use woffle::{
    compress_woff2, compute_woff2_final_size, convert_ttf_to_woff2, convert_woff2_to_ttf,
    decompress_woff2, max_woff2_compressed_size, Woff2Params, Woff2VecOut, DEFAULT_MAX_SIZE,
};

fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn pad4(out: &mut Vec<u8>) {
    while out.len() % 4 != 0 {
        out.push(0);
    }
}

fn build_head() -> Vec<u8> {
    let mut head = Vec::new();
    put_u32(&mut head, 0x00010000); // version
    put_u32(&mut head, 0x00010000); // fontRevision
    put_u32(&mut head, 0); // checkSumAdjustment
    put_u32(&mut head, 0x5F0F3CF5); // magicNumber
    put_u16(&mut head, 0x0003); // flags
    put_u16(&mut head, 1000); // unitsPerEm
    head.extend_from_slice(&[0u8; 8]); // created
    head.extend_from_slice(&[0u8; 8]); // modified
    put_u16(&mut head, 0); // xMin
    put_u16(&mut head, 0); // yMin
    put_u16(&mut head, 100); // xMax
    put_u16(&mut head, 100); // yMax
    put_u16(&mut head, 0); // macStyle
    put_u16(&mut head, 8); // lowestRecPPEM
    put_u16(&mut head, 2); // fontDirectionHint
    put_u16(&mut head, 0); // indexToLocFormat: short
    put_u16(&mut head, 0); // glyphDataFormat
    assert_eq!(head.len(), 54);
    head
}

fn build_hhea(num_hmetrics: u16) -> Vec<u8> {
    let mut hhea = Vec::new();
    put_u32(&mut hhea, 0x00010000); // version
    put_u16(&mut hhea, 800); // ascender
    put_u16(&mut hhea, (-200i16) as u16); // descender
    put_u16(&mut hhea, 200); // lineGap
    put_u16(&mut hhea, 500); // advanceWidthMax
    put_u16(&mut hhea, 0); // minLeftSideBearing
    put_u16(&mut hhea, 0); // minRightSideBearing
    put_u16(&mut hhea, 100); // xMaxExtent
    put_u16(&mut hhea, 1); // caretSlopeRise
    put_u16(&mut hhea, 0); // caretSlopeRun
    put_u16(&mut hhea, 0); // caretOffset
    hhea.extend_from_slice(&[0u8; 8]); // reserved
    put_u16(&mut hhea, 0); // metricDataFormat
    put_u16(&mut hhea, num_hmetrics);
    assert_eq!(hhea.len(), 36);
    hhea
}

fn build_maxp(num_glyphs: u16) -> Vec<u8> {
    let mut maxp = Vec::new();
    put_u32(&mut maxp, 0x00010000);
    put_u16(&mut maxp, num_glyphs);
    maxp.extend_from_slice(&[0u8; 26]);
    assert_eq!(maxp.len(), 32);
    maxp
}

/// The canonical encoding of a one-contour triangle with points
/// (0,0) (100,0) (50,100), all on-curve.
fn triangle_glyph() -> Vec<u8> {
    let mut glyph = Vec::new();
    put_u16(&mut glyph, 1); // numberOfContours
    put_u16(&mut glyph, 0); // xMin
    put_u16(&mut glyph, 0); // yMin
    put_u16(&mut glyph, 100); // xMax
    put_u16(&mut glyph, 100); // yMax
    put_u16(&mut glyph, 2); // endPtsOfContours
    put_u16(&mut glyph, 0); // instructionLength
    glyph.extend_from_slice(&[0x31, 0x33, 0x27]); // flags
    glyph.extend_from_slice(&[100, 50]); // x deltas
    glyph.extend_from_slice(&[100]); // y deltas
    glyph
}

/// The nine required tables of a minimal TrueType font, with the given
/// glyph records.
fn build_tables(glyphs: &[&[u8]]) -> Vec<([u8; 4], Vec<u8>)> {
    let num_glyphs = glyphs.len() as u16;

    let mut glyf = Vec::new();
    let mut loca = Vec::new();
    for glyph in glyphs {
        put_u16(&mut loca, (glyf.len() / 2) as u16);
        glyf.extend_from_slice(glyph);
        pad4(&mut glyf);
    }
    put_u16(&mut loca, (glyf.len() / 2) as u16);

    let mut hmtx = Vec::new();
    for _ in 0..num_glyphs {
        put_u16(&mut hmtx, 500);
        put_u16(&mut hmtx, 0);
    }

    vec![
        (*b"cmap", vec![0, 0, 0, 0]),
        (*b"glyf", glyf),
        (*b"head", build_head()),
        (*b"hhea", build_hhea(num_glyphs)),
        (*b"hmtx", hmtx),
        (*b"loca", loca),
        (*b"maxp", build_maxp(num_glyphs)),
        (*b"name", vec![0, 0, 0, 0, 0, 6]),
        (*b"post", {
            let mut post = vec![0u8; 32];
            post[..4].copy_from_slice(&0x00030000u32.to_be_bytes());
            post
        }),
    ]
}

fn build_font(glyphs: &[&[u8]]) -> Vec<u8> {
    let tables = build_tables(glyphs);
    let mut out = Vec::new();
    put_u32(&mut out, 0x00010000); // flavor
    put_u16(&mut out, tables.len() as u16);
    put_u16(&mut out, 0); // searchRange: the encoder recomputes these
    put_u16(&mut out, 0); // entrySelector
    put_u16(&mut out, 0); // rangeShift

    let mut offset = (12 + 16 * tables.len()) as u32;
    for (tag, data) in &tables {
        out.extend_from_slice(tag);
        put_u32(&mut out, 0); // checksum, ignored on read
        put_u32(&mut out, offset);
        put_u32(&mut out, data.len() as u32);
        offset += (data.len() as u32 + 3) & !3;
    }
    for (_, data) in &tables {
        out.extend_from_slice(data);
        pad4(&mut out);
    }
    out
}

/// Two-font collection referencing one shared set of tables.
fn build_ttc(glyphs: &[&[u8]], num_fonts: usize) -> Vec<u8> {
    let tables = build_tables(glyphs);
    let dir_size = 12 + 16 * tables.len();
    let header_size = 12 + 4 * num_fonts;

    let mut table_offsets = Vec::new();
    let mut offset = (header_size + num_fonts * dir_size) as u32;
    for (_, data) in &tables {
        table_offsets.push(offset);
        offset += (data.len() as u32 + 3) & !3;
    }

    let mut out = Vec::new();
    out.extend_from_slice(b"ttcf");
    put_u32(&mut out, 0x00010000);
    put_u32(&mut out, num_fonts as u32);
    for font_idx in 0..num_fonts {
        put_u32(&mut out, (header_size + font_idx * dir_size) as u32);
    }
    for _ in 0..num_fonts {
        put_u32(&mut out, 0x00010000); // flavor
        put_u16(&mut out, tables.len() as u16);
        put_u16(&mut out, 0);
        put_u16(&mut out, 0);
        put_u16(&mut out, 0);
        for ((tag, data), table_offset) in tables.iter().zip(&table_offsets) {
            out.extend_from_slice(tag);
            put_u32(&mut out, 0);
            put_u32(&mut out, *table_offset);
            put_u32(&mut out, data.len() as u32);
        }
    }
    for (_, data) in &tables {
        out.extend_from_slice(data);
        pad4(&mut out);
    }
    out
}

/// Parse an SFNT directory into (tag, checksum, offset, length) entries.
fn parse_directory(data: &[u8]) -> Vec<([u8; 4], u32, u32, u32)> {
    let num_tables = u16::from_be_bytes(data[4..6].try_into().unwrap()) as usize;
    let mut entries = Vec::with_capacity(num_tables);
    for i in 0..num_tables {
        let base = 12 + 16 * i;
        entries.push((
            data[base..base + 4].try_into().unwrap(),
            u32::from_be_bytes(data[base + 4..base + 8].try_into().unwrap()),
            u32::from_be_bytes(data[base + 8..base + 12].try_into().unwrap()),
            u32::from_be_bytes(data[base + 12..base + 16].try_into().unwrap()),
        ))
    }
    entries
}

fn find_entry(data: &[u8], tag: &[u8; 4]) -> ([u8; 4], u32, u32, u32) {
    parse_directory(data)
        .into_iter()
        .find(|entry| &entry.0 == tag)
        .unwrap()
}

fn ulong_sum(data: &[u8]) -> u32 {
    let mut checksum: u32 = 0;
    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        checksum = checksum.wrapping_add(u32::from_be_bytes(chunk.try_into().unwrap()));
    }
    let mut tail = [0u8; 4];
    tail[..chunks.remainder().len()].copy_from_slice(chunks.remainder());
    checksum.wrapping_add(u32::from_be_bytes(tail))
}

fn encode(ttf: &[u8]) -> Vec<u8> {
    let mut result = vec![0u8; max_woff2_compressed_size(ttf, &[])];
    let length = convert_ttf_to_woff2(ttf, &mut result, &Woff2Params::default()).unwrap();
    result.truncate(length);
    result
}

#[test]
fn minimal_font_round_trips() {
    let ttf = build_font(&[&[]]);
    let woff2 = encode(&ttf);

    assert_eq!(&woff2[0..4], b"wOF2");
    assert_eq!(&woff2[4..8], &0x00010000u32.to_be_bytes());
    assert_eq!(u32::from_be_bytes(woff2[8..12].try_into().unwrap()) as usize, woff2.len());

    let ttf2 = decompress_woff2(&woff2).unwrap();
    assert_eq!(compute_woff2_final_size(&woff2), ttf2.len());

    // Header round-trip: flavor and table count survive.
    assert_eq!(&ttf2[0..4], &0x00010000u32.to_be_bytes());
    let entries = parse_directory(&ttf2);
    assert_eq!(entries.len(), 9);

    // Emitted tables appear in ascending tag order.
    let tags: Vec<[u8; 4]> = entries.iter().map(|entry| entry.0).collect();
    let mut sorted = tags.clone();
    sorted.sort();
    assert_eq!(tags, sorted);

    // An all-empty glyf table has zero length and equal loca offsets.
    let (_, _, _, glyf_length) = find_entry(&ttf2, b"glyf");
    assert_eq!(glyf_length, 0);
    let (_, _, loca_offset, loca_length) = find_entry(&ttf2, b"loca");
    assert_eq!(loca_length, 4);
    let loca_offset = loca_offset as usize;
    assert_eq!(&ttf2[loca_offset..loca_offset + 4], &[0, 0, 0, 0]);

    // head still carries its magic number.
    let (_, _, head_offset, _) = find_entry(&ttf2, b"head");
    let magic_offset = head_offset as usize + 12;
    assert_eq!(
        &ttf2[magic_offset..magic_offset + 4],
        &0x5F0F3CF5u32.to_be_bytes()
    );
}

#[test]
fn checksum_adjustment_is_self_consistent() {
    let ttf = build_font(&[&[], &triangle_glyph()]);
    let woff2 = encode(&ttf);
    let ttf2 = decompress_woff2(&woff2).unwrap();

    let (_, _, head_offset, _) = find_entry(&ttf2, b"head");
    let adjustment_offset = head_offset as usize + 8;
    let adjustment =
        u32::from_be_bytes(ttf2[adjustment_offset..adjustment_offset + 4].try_into().unwrap());

    let mut zeroed = ttf2.clone();
    zeroed[adjustment_offset..adjustment_offset + 4].fill(0);
    assert_eq!(adjustment, 0xB1B0AFBAu32.wrapping_sub(ulong_sum(&zeroed)));
}

#[test]
fn encode_decode_encode_is_byte_identical() {
    let ttf = build_font(&[&[], &triangle_glyph()]);
    let woff2 = encode(&ttf);
    let ttf2 = decompress_woff2(&woff2).unwrap();
    let woff2_again = encode(&ttf2);
    assert_eq!(woff2, woff2_again);
}

#[test]
fn triangle_glyph_survives_the_transform() {
    let ttf = build_font(&[&[], &triangle_glyph()]);
    let woff2 = encode(&ttf);
    let ttf2 = decompress_woff2(&woff2).unwrap();

    let (_, _, glyf_offset, glyf_length) = find_entry(&ttf2, b"glyf");
    assert_eq!(glyf_length, 20);
    let glyf = &ttf2[glyf_offset as usize..(glyf_offset + glyf_length) as usize];
    assert_eq!(glyf, &triangle_glyph()[..]);

    let (_, _, loca_offset, loca_length) = find_entry(&ttf2, b"loca");
    assert_eq!(loca_length, 6);
    let loca = &ttf2[loca_offset as usize..(loca_offset + loca_length) as usize];
    assert_eq!(loca, &[0, 0, 0, 0, 0, 10]);
}

#[test]
fn lying_total_sfnt_size_is_rejected_before_any_write() {
    let ttf = build_font(&[&[]]);
    let mut woff2 = encode(&ttf);
    woff2[16..20].copy_from_slice(&(31u32 << 20).to_be_bytes());

    let mut output: Vec<u8> = Vec::new();
    let mut out = Woff2VecOut::new(&mut output, DEFAULT_MAX_SIZE);
    assert!(convert_woff2_to_ttf(&woff2, &mut out).is_err());
    assert!(output.is_empty());
}

#[test]
fn oversized_uncompressed_declaration_is_rejected() {
    // A directory declaring a single 31 MiB untransformed cmap table.
    let mut woff2 = Vec::new();
    woff2.extend_from_slice(b"wOF2");
    put_u32(&mut woff2, 0x00010000); // flavor
    put_u32(&mut woff2, 53); // length, patched to match below
    put_u16(&mut woff2, 1); // numTables
    put_u16(&mut woff2, 0); // reserved
    put_u32(&mut woff2, 31 << 20); // totalSfntSize
    put_u32(&mut woff2, 0); // totalCompressedSize
    put_u16(&mut woff2, 0);
    put_u16(&mut woff2, 0);
    put_u32(&mut woff2, 0); // metaOffset
    put_u32(&mut woff2, 0); // metaLength
    put_u32(&mut woff2, 0); // metaOrigLength
    put_u32(&mut woff2, 0); // privOffset
    put_u32(&mut woff2, 0); // privLength
    woff2.push(0); // flag byte: known tag 0 = cmap, no transform
    woff2.extend_from_slice(&[0x8F, 0xC0, 0x80, 0x00]); // Base128 31 MiB
    assert_eq!(woff2.len(), 53);

    assert!(decompress_woff2(&woff2).is_err());
}

#[test]
fn collection_round_trips() {
    let ttc = build_ttc(&[&[], &triangle_glyph()], 2);
    let woff2 = encode(&ttc);
    assert_eq!(&woff2[4..8], b"ttcf");

    let ttc2 = decompress_woff2(&woff2).unwrap();
    assert_eq!(&ttc2[0..4], b"ttcf");
    assert_eq!(
        u32::from_be_bytes(ttc2[8..12].try_into().unwrap()),
        2 // numFonts
    );

    let woff2_again = encode(&ttc2);
    assert_eq!(woff2, woff2_again);
}

#[test]
fn hostile_inputs_fail_cleanly() {
    assert!(decompress_woff2(&[]).is_err());
    assert!(decompress_woff2(&[0u8; 48]).is_err());
    assert!(decompress_woff2(&[0xffu8; 64]).is_err());

    let ttf = build_font(&[&[]]);
    let woff2 = encode(&ttf);
    for cut in [1, 12, 47, woff2.len() - 1] {
        assert!(decompress_woff2(&woff2[..cut]).is_err());
    }

    // Flipping the reserved field must be fatal.
    let mut mutated = woff2.clone();
    mutated[15] = 1;
    assert!(decompress_woff2(&mutated).is_err());
}
