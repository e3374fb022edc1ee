//! The glyf/loca preprocessing transform: each glyph is decomposed into the
//! seven parallel substreams of the transformed glyf table. The transformed
//! tables are registered as pseudo-tagged twins of the originals.

use std::borrow::Cow;
use std::collections::HashMap;

use bytes::BufMut;

use crate::error::{bail, bail_if, WoffleErr};
use crate::glyph::{bbox_of, encode_triplet, read_glyph, Glyph, Outline};
use crate::sfnt::{FontCollection, Table};
use crate::table_tags::{transformed_tag, GLYF, LOCA};
use crate::variable_length::put_255_u16;

#[derive(Default)]
struct GlyfStreams {
    n_contour: Vec<u8>,
    n_points: Vec<u8>,
    flag: Vec<u8>,
    glyph: Vec<u8>,
    composite: Vec<u8>,
    bbox_bitmap: Vec<u8>,
    bbox: Vec<u8>,
    instruction: Vec<u8>,
}

impl GlyfStreams {
    fn set_bbox_bit(&mut self, glyph_index: usize) {
        self.bbox_bitmap[glyph_index >> 3] |= 0x80 >> (glyph_index & 7);
    }
}

/// Build the transformed glyf and loca twins for one font. In a collection,
/// a glyf table shared between fonts is transformed once and its twins are
/// shared the same way.
pub(crate) fn transform_glyf_and_loca(
    collection: &mut FontCollection<'_>,
    font_idx: usize,
    twins_by_glyf: &mut HashMap<usize, (usize, usize)>,
) -> Result<(), WoffleErr> {
    let glyf = collection.table_index(font_idx, GLYF);
    let loca = collection.table_index(font_idx, LOCA);
    let glyf_idx = match (glyf, loca) {
        (Some(glyf_idx), Some(_)) => glyf_idx,
        // CFF-flavored fonts carry no glyf/loca and ride along untransformed.
        (None, None) => return Ok(()),
        _ => bail!(Semantic),
    };

    if let Some(&(glyf_twin, loca_twin)) = twins_by_glyf.get(&glyf_idx) {
        let font = &mut collection.fonts[font_idx];
        font.tables.insert(transformed_tag(GLYF), glyf_twin);
        font.tables.insert(transformed_tag(LOCA), loca_twin);
        return Ok(());
    }

    let num_glyphs = collection.num_glyphs(font_idx)?;
    bail_if!(num_glyphs > u16::MAX as usize, Bounds);
    let index_format = collection.index_format(font_idx)?;

    let mut streams = GlyfStreams {
        bbox_bitmap: vec![0u8; (num_glyphs + 7) >> 3],
        ..GlyfStreams::default()
    };
    for i in 0..num_glyphs {
        let data = collection.glyph_data(font_idx, i)?;
        let glyph = read_glyph(data)?;
        write_glyph_to_streams(&glyph, i, &mut streams)?;
    }

    let transformed = assemble(num_glyphs as u16, index_format, &streams)?;

    let glyf_twin = collection.tables.len();
    collection.tables.push(Table {
        tag: transformed_tag(GLYF),
        checksum: 0,
        offset: 0,
        length: transformed.len() as u32,
        data: Cow::Owned(transformed),
    });
    // loca is reconstructed from glyf on decode; its twin is empty.
    let loca_twin = collection.tables.len();
    collection.tables.push(Table {
        tag: transformed_tag(LOCA),
        checksum: 0,
        offset: 0,
        length: 0,
        data: Cow::Owned(Vec::new()),
    });

    let font = &mut collection.fonts[font_idx];
    font.tables.insert(transformed_tag(GLYF), glyf_twin);
    font.tables.insert(transformed_tag(LOCA), loca_twin);
    twins_by_glyf.insert(glyf_idx, (glyf_twin, loca_twin));
    Ok(())
}

fn write_glyph_to_streams(
    glyph: &Glyph,
    glyph_index: usize,
    streams: &mut GlyfStreams,
) -> Result<(), WoffleErr> {
    match &glyph.outline {
        Outline::Empty => streams.n_contour.put_i16(0),
        Outline::Simple(contours) => {
            bail_if!(contours.len() > i16::MAX as usize, Bounds);
            streams.n_contour.put_i16(contours.len() as i16);
            for contour in contours {
                bail_if!(contour.len() > u16::MAX as usize, Bounds);
                put_255_u16(&mut streams.n_points, contour.len() as u16);
            }

            let mut last_x = 0;
            let mut last_y = 0;
            for point in contours.iter().flatten() {
                encode_triplet(
                    &mut streams.flag,
                    &mut streams.glyph,
                    point.on_curve,
                    point.x - last_x,
                    point.y - last_y,
                );
                last_x = point.x;
                last_y = point.y;
            }

            bail_if!(glyph.instructions.len() > u16::MAX as usize, Bounds);
            put_255_u16(&mut streams.glyph, glyph.instructions.len() as u16);
            streams.instruction.put_slice(&glyph.instructions);

            // The decoder recomputes a simple glyph's bbox from its points;
            // store it explicitly only when the stored one disagrees.
            let computed = bbox_of(contours.iter().flatten());
            let stored = (
                glyph.x_min as i32,
                glyph.y_min as i32,
                glyph.x_max as i32,
                glyph.y_max as i32,
            );
            if stored != computed {
                streams.set_bbox_bit(glyph_index);
                put_stored_bbox(glyph, &mut streams.bbox);
            }
        }
        Outline::Composite {
            data,
            have_instructions,
        } => {
            streams.n_contour.put_i16(-1);
            streams.composite.put_slice(data);
            streams.set_bbox_bit(glyph_index);
            put_stored_bbox(glyph, &mut streams.bbox);
            if *have_instructions {
                bail_if!(glyph.instructions.len() > u16::MAX as usize, Bounds);
                put_255_u16(&mut streams.glyph, glyph.instructions.len() as u16);
                streams.instruction.put_slice(&glyph.instructions);
            }
        }
    }
    Ok(())
}

fn put_stored_bbox(glyph: &Glyph, out: &mut impl BufMut) {
    out.put_i16(glyph.x_min);
    out.put_i16(glyph.y_min);
    out.put_i16(glyph.x_max);
    out.put_i16(glyph.y_max);
}

/// Transformed-glyf header followed by the seven substream payloads.
fn assemble(
    num_glyphs: u16,
    index_format: u16,
    streams: &GlyfStreams,
) -> Result<Vec<u8>, WoffleErr> {
    let substreams: [&[u8]; 7] = [
        &streams.n_contour,
        &streams.n_points,
        &streams.flag,
        &streams.glyph,
        &streams.composite,
        &[], // bbox, sized below with its bitmap prefix
        &streams.instruction,
    ];

    let bbox_size = streams.bbox_bitmap.len() + streams.bbox.len();
    let total: usize = substreams.iter().map(|s| s.len()).sum::<usize>() + bbox_size;
    let mut out = Vec::with_capacity((2 + substreams.len()) * 4 + total);

    out.put_u32(0); // version
    out.put_u16(num_glyphs);
    out.put_u16(index_format);
    for (i, substream) in substreams.iter().enumerate() {
        let size = if i == 5 { bbox_size } else { substream.len() };
        bail_if!(size > u32::MAX as usize, Bounds);
        out.put_u32(size as u32);
    }
    out.put_slice(&streams.n_contour);
    out.put_slice(&streams.n_points);
    out.put_slice(&streams.flag);
    out.put_slice(&streams.glyph);
    out.put_slice(&streams.composite);
    out.put_slice(&streams.bbox_bitmap);
    out.put_slice(&streams.bbox);
    out.put_slice(&streams.instruction);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glyph::Point;

    fn streams_for(glyph: &Glyph) -> GlyfStreams {
        let mut streams = GlyfStreams {
            bbox_bitmap: vec![0u8; 1],
            ..GlyfStreams::default()
        };
        write_glyph_to_streams(glyph, 0, &mut streams).unwrap();
        streams
    }

    #[test]
    fn empty_glyph_writes_only_a_contour_count() {
        let streams = streams_for(&Glyph::default());
        assert_eq!(streams.n_contour, &[0, 0]);
        assert!(streams.n_points.is_empty());
        assert!(streams.glyph.is_empty());
        assert_eq!(streams.bbox_bitmap, &[0]);
    }

    #[test]
    fn simple_glyph_with_exact_bbox_skips_the_bbox_stream() {
        let glyph = Glyph {
            x_min: 0,
            y_min: 0,
            x_max: 100,
            y_max: 100,
            outline: Outline::Simple(vec![vec![
                Point { x: 0, y: 0, on_curve: true },
                Point { x: 100, y: 0, on_curve: true },
                Point { x: 50, y: 100, on_curve: true },
            ]]),
            ..Glyph::default()
        };
        let streams = streams_for(&glyph);
        assert_eq!(streams.n_contour, &[0, 1]);
        assert_eq!(streams.n_points, &[3]);
        assert_eq!(streams.flag, &[1, 11, 86]);
        // triplet data then the 255UInt16 instruction length
        assert_eq!(streams.glyph, &[0, 100, 49, 99, 0]);
        assert_eq!(streams.bbox_bitmap, &[0]);
        assert!(streams.bbox.is_empty());
    }

    #[test]
    fn simple_glyph_with_widened_bbox_stores_it() {
        let glyph = Glyph {
            x_min: -5,
            y_min: 0,
            x_max: 100,
            y_max: 100,
            outline: Outline::Simple(vec![vec![
                Point { x: 0, y: 0, on_curve: true },
                Point { x: 100, y: 100, on_curve: true },
            ]]),
            ..Glyph::default()
        };
        let streams = streams_for(&glyph);
        assert_eq!(streams.bbox_bitmap, &[0x80]);
        assert_eq!(streams.bbox.len(), 8);
    }

    #[test]
    fn composite_glyph_always_stores_its_bbox() {
        let glyph = Glyph {
            x_min: 1,
            y_min: 2,
            x_max: 3,
            y_max: 4,
            outline: Outline::Composite {
                data: vec![0x00, 0x08, 0x00, 0x01, 0x05, 0x06, 0x40, 0x00],
                have_instructions: false,
            },
            ..Glyph::default()
        };
        let streams = streams_for(&glyph);
        assert_eq!(streams.n_contour, &[0xff, 0xff]);
        assert_eq!(streams.composite.len(), 8);
        assert_eq!(streams.bbox_bitmap, &[0x80]);
        assert_eq!(streams.bbox, &[0, 1, 0, 2, 0, 3, 0, 4]);
        assert!(streams.glyph.is_empty());
    }
}
