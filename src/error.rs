use std::fmt;

/// What went wrong, coarsely. The public surface only promises that a failed
/// conversion returns an error; the kind exists so tests and debugging can
/// tell rejection causes apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WoffleErr {
    /// A read extended past the end of its buffer.
    Truncated,
    /// Structurally invalid container or table data.
    Format,
    /// A computed offset or size exceeded its ceiling.
    Bounds,
    /// Tables that are individually well-formed but inconsistent with each
    /// other.
    Semantic,
    /// The external compressor failed, or disagreed with the directory about
    /// sizes.
    Compression,
}

impl fmt::Display for WoffleErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            WoffleErr::Truncated => "unexpected end of data",
            WoffleErr::Format => "malformed font data",
            WoffleErr::Bounds => "offset or size out of bounds",
            WoffleErr::Semantic => "inconsistent font tables",
            WoffleErr::Compression => "compression failure",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for WoffleErr {}

impl From<bytes::TryGetError> for WoffleErr {
    fn from(_value: bytes::TryGetError) -> Self {
        Self::Truncated
    }
}

pub(crate) fn usize_will_overflow(a: usize, b: usize) -> bool {
    a.checked_add(b).is_none()
}

pub(crate) fn u32_will_overflow(a: u32, b: u32) -> bool {
    a.checked_add(b).is_none()
}

#[cfg(not(feature = "debug"))]
mod regular {
    macro_rules! bail {
        ($kind:ident) => {
            return Err(crate::error::WoffleErr::$kind)
        };
    }
    pub(crate) use bail;

    macro_rules! bail_if {
        ($cond:expr, $kind:ident) => {
            if $cond {
                return Err(crate::error::WoffleErr::$kind);
            }
        };
    }
    pub(crate) use bail_if;

    macro_rules! bail_with_msg_if {
        ($cond:expr, $kind:ident, $($msg:expr),*) => {
            if $cond {
                #[cfg(feature = "font_compression_bin")]
                eprintln!($($msg),*);
                return Err(crate::error::WoffleErr::$kind);
            }
        };
    }
    pub(crate) use bail_with_msg_if;
}
#[cfg(not(feature = "debug"))]
pub(crate) use regular::*;

#[cfg(feature = "debug")]
mod debug {
    macro_rules! bail {
        ($kind:ident) => {
            panic!("{}", stringify!($kind))
        };
    }
    pub(crate) use bail;

    macro_rules! bail_if {
        ($cond:expr, $kind:ident) => {
            if $cond {
                panic!("{}: {}", stringify!($kind), stringify!($cond))
            }
        };
    }
    pub(crate) use bail_if;

    macro_rules! bail_with_msg_if {
        ($cond:expr, $kind:ident, $($msg:expr),*) => {
            if $cond {
                panic!($($msg),*);
            }
        };
    }
    pub(crate) use bail_with_msg_if;
}
#[cfg(feature = "debug")]
pub(crate) use debug::*;
