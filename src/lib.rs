//! Bidirectional codec between the WOFF2 web-font container and the
//! underlying SFNT (TrueType/OpenType) container.
//!
//! Encoding normalizes the font, preprocesses glyf/loca into the seven-way
//! transformed representation, compresses everything as a single brotli
//! stream and frames it; decoding parses the container, inflates the stream
//! once and reconstructs byte-exact tables, fixing SFNT checksums up last.

mod buffer;
mod checksum;
mod compress;
mod decompress;
mod error;
mod glyph;
mod headers;
mod normalize;
mod reconstruct;
mod sfnt;
pub mod table_tags;
mod transform;
mod variable_length;

pub use compress::{
    compress_woff2, convert_ttf_to_woff2, max_woff2_compressed_size, Woff2Params,
};
pub use decompress::{
    compute_woff2_final_size, convert_woff2_to_ttf, decompress_woff2, Woff2Out, Woff2VecOut,
};
pub use error::WoffleErr;
pub use sfnt::{Font, FontCollection, Table};

/// Ceiling callers apply to [`compute_woff2_final_size`] results, so a lying
/// header cannot make them allocate arbitrarily.
pub const DEFAULT_MAX_SIZE: usize = 30 * 1024 * 1024;

// Round a value up to the nearest multiple of 4. Don't round the value in
// the case that rounding up overflows.
//
// A macro to make it generic over the integer type without horrible bounds.
macro_rules! round4 {
    ($value:expr) => {
        match $value.checked_add(3) {
            Some(value_plus_3) => value_plus_3 & !3,
            None => $value,
        }
    };
}
pub(crate) use round4;
