//! Reconstruction of the original glyf and loca tables from the seven
//! transformed substreams.

use arrayvec::ArrayVec;
use bytes::{Buf, BufMut};

use crate::buffer::BufExt;
use crate::checksum::compute_checksum;
use crate::error::{bail, bail_if, bail_with_msg_if, u32_will_overflow, WoffleErr};
use crate::glyph::{
    decode_triplet, size_of_composite, write_bbox, write_glyph_points, Point,
    COMPOSITE_GLYPH_BEGIN,
};
use crate::round4;
use crate::variable_length::BufVariableExt;

const NUM_SUB_STREAMS: usize = 7;

// 98% of Google Fonts have no glyph above 5k bytes. Largest glyph ever
// observed was 72k bytes.
const DEFAULT_GLYPH_BUF_SIZE: usize = 5120;

pub(crate) struct GlyfAndLoca {
    pub glyf: Vec<u8>,
    pub glyf_checksum: u32,
    pub loca: Vec<u8>,
    pub loca_checksum: u32,
}

/// Rebuild the glyf and loca tables from a transformed glyf payload. The
/// declared destination lengths come from the container directory; the
/// rebuilt tables match them exactly.
pub(crate) fn reconstruct_glyf(
    data: &[u8],
    glyf_dst_length: u32,
    loca_dst_length: u32,
) -> Result<GlyfAndLoca, WoffleErr> {
    let mut input = data;
    let _version = input.try_get_u32()?;
    let num_glyphs = input.try_get_u16()? as usize;
    let index_format = input.try_get_u16()?;

    let entry_size: u32 = if index_format == 0 { 2 } else { 4 };
    bail_if!(
        loca_dst_length != entry_size * (num_glyphs as u32 + 1),
        Semantic
    );

    let mut offset = (2 + NUM_SUB_STREAMS) * 4;
    bail_if!(offset > data.len(), Truncated);

    // Invariant from here on: data.len() >= offset
    let mut substreams: ArrayVec<&[u8], NUM_SUB_STREAMS> = ArrayVec::new();
    for _ in 0..NUM_SUB_STREAMS {
        let substream_size = input.try_get_u32()? as usize;
        bail_if!(substream_size > data.len() - offset, Truncated);
        substreams.push(&data[offset..offset + substream_size]);
        offset += substream_size;
    }

    let mut n_contour_stream = substreams[0];
    let mut n_points_stream = substreams[1];
    let mut flag_stream = substreams[2];
    let mut glyph_stream = substreams[3];
    let mut composite_stream = substreams[4];
    let bitmap_length = (num_glyphs + 7) >> 3;
    bail_if!(bitmap_length > substreams[5].len(), Truncated);
    let (bbox_bitmap, mut bbox_stream) = substreams[5].split_at(bitmap_length);
    let mut instruction_stream = substreams[6];

    let mut glyf: Vec<u8> = Vec::new();
    let mut loca_values: Vec<u32> = Vec::with_capacity(num_glyphs + 1);
    let mut glyph_buf: Vec<u8> = Vec::with_capacity(DEFAULT_GLYPH_BUF_SIZE);

    for _ in 0..num_glyphs {
        loca_values.push(glyf.len() as u32);
        glyph_buf.clear();

        let n_contours = n_contour_stream.try_get_i16()?;
        if n_contours == -1 {
            reconstruct_composite_glyph(
                &mut composite_stream,
                &mut glyph_stream,
                &mut instruction_stream,
                &mut glyph_buf,
            )?;
        } else if n_contours > 0 {
            reconstruct_simple_glyph(
                n_contours as usize,
                &mut n_points_stream,
                &mut flag_stream,
                &mut glyph_stream,
                &mut instruction_stream,
                &mut glyph_buf,
            )?;
        } else if n_contours != 0 {
            // 0 is the empty glyph; anything below -1 is meaningless
            bail!(Format);
        }

        let padded = round4!(glyph_buf.len());
        bail_if!(
            padded > glyf_dst_length as usize - glyf.len(),
            Bounds
        );
        glyf.extend_from_slice(&glyph_buf);
        glyf.resize(round4!(glyf.len()), 0);
    }
    loca_values.push(glyf.len() as u32);

    // Bbox override pass: a set bitmap bit replaces the recomputed (or, for
    // composites, zeroed) bounding box with eight explicit bytes.
    for i in 0..num_glyphs {
        if bbox_bitmap[i >> 3] & (0x80 >> (i & 7)) == 0 {
            continue;
        }
        let start = loca_values[i] as usize;
        bail_with_msg_if!(
            loca_values[i + 1] - loca_values[i] < 10,
            Format,
            "glyph too small to hold a bbox"
        );
        bail_if!(bbox_stream.remaining() < 8, Truncated);
        bbox_stream.try_copy_to_slice(&mut glyf[start + 2..start + 10])?;
    }

    // The directory's layout wins: pad the table out to its declared length.
    glyf.resize(glyf_dst_length as usize, 0);
    let glyf_checksum = compute_checksum(&glyf);

    let mut loca: Vec<u8> = Vec::with_capacity(loca_dst_length as usize);
    for &value in &loca_values {
        if index_format == 0 {
            bail_if!(value >> 1 > u16::MAX as u32, Bounds);
            loca.put_u16((value >> 1) as u16);
        } else {
            loca.put_u32(value);
        }
    }
    let loca_checksum = compute_checksum(&loca);

    Ok(GlyfAndLoca {
        glyf,
        glyf_checksum,
        loca,
        loca_checksum,
    })
}

fn reconstruct_composite_glyph(
    composite_stream: &mut &[u8],
    glyph_stream: &mut &[u8],
    instruction_stream: &mut &[u8],
    glyph_buf: &mut Vec<u8>,
) -> Result<(), WoffleErr> {
    let mut probe: &[u8] = *composite_stream;
    let (composite_size, have_instructions) = size_of_composite(&mut probe)?;

    let instruction_size = if have_instructions {
        glyph_stream.try_get_255_u16()?
    } else {
        0
    };

    glyph_buf.put_i16(-1);
    // Placeholder bbox; composites rely on the override pass.
    glyph_buf.put_slice(&[0u8; 8]);
    debug_assert_eq!(glyph_buf.len(), COMPOSITE_GLYPH_BEGIN);
    composite_stream.try_read_bytes_into(composite_size, glyph_buf)?;

    if have_instructions {
        glyph_buf.put_u16(instruction_size);
        instruction_stream.try_read_bytes_into(instruction_size as usize, glyph_buf)?;
    }
    Ok(())
}

fn reconstruct_simple_glyph(
    n_contours: usize,
    n_points_stream: &mut &[u8],
    flag_stream: &mut &[u8],
    glyph_stream: &mut &[u8],
    instruction_stream: &mut &[u8],
    glyph_buf: &mut Vec<u8>,
) -> Result<(), WoffleErr> {
    let mut n_points_vec: Vec<u16> = Vec::with_capacity(n_contours);
    let mut total_n_points: u32 = 0;
    for _ in 0..n_contours {
        let n_points_contour = n_points_stream.try_get_255_u16()?;
        n_points_vec.push(n_points_contour);
        bail_if!(
            u32_will_overflow(total_n_points, n_points_contour as u32),
            Bounds
        );
        total_n_points += n_points_contour as u32;
    }

    let flag_size = total_n_points as usize;
    bail_if!(flag_size > flag_stream.len(), Truncated);
    let flags_buf = &flag_stream[..flag_size];

    let mut points: Vec<Point> = Vec::with_capacity(flag_size);
    let triplet_bytes_consumed = decode_triplet(flags_buf, *glyph_stream, &mut points)?;
    flag_stream.advance(flag_size);
    glyph_stream.advance(triplet_bytes_consumed);

    let instruction_size = glyph_stream.try_get_255_u16()?;
    bail_if!(
        total_n_points >= (1 << 27) || (instruction_size as u32) >= (1 << 30),
        Bounds
    );

    glyph_buf.put_i16(n_contours as i16);
    write_bbox(&points, glyph_buf);

    let mut end_point: i32 = -1;
    for n_points_contour in n_points_vec {
        end_point += n_points_contour as i32;
        bail_if!(end_point >= 65536, Semantic);
        glyph_buf.put_u16(end_point as u16);
    }

    glyph_buf.put_u16(instruction_size);
    instruction_stream.try_read_bytes_into(instruction_size as usize, glyph_buf)?;

    write_glyph_points(&points, glyph_buf);
    Ok(())
}
