//! Length-capped reading helpers layered over [`bytes::Buf`].

use bytes::Buf;

use crate::error::{bail_if, WoffleErr};

/// Hard cap on any single length-driven read. Rejects pathological lengths
/// before they turn into allocations.
const ONE_GIGABYTE: usize = 1024 * 1024 * 1024;

pub(crate) trait BufExt {
    /// Append `n` bytes from the buffer onto `buf`.
    fn try_read_bytes_into(&mut self, n: usize, buf: &mut Vec<u8>) -> Result<(), WoffleErr>;

    /// Advance past `n` bytes.
    fn try_skip(&mut self, n: usize) -> Result<(), WoffleErr>;
}

impl<T: Buf> BufExt for T {
    fn try_read_bytes_into(&mut self, n: usize, buf: &mut Vec<u8>) -> Result<(), WoffleErr> {
        bail_if!(n > ONE_GIGABYTE, Bounds);
        bail_if!(n > self.remaining(), Truncated);
        let orig_len = buf.len();
        buf.resize(orig_len + n, 0);
        self.try_copy_to_slice(&mut buf[orig_len..])?;
        Ok(())
    }

    fn try_skip(&mut self, n: usize) -> Result<(), WoffleErr> {
        bail_if!(n > ONE_GIGABYTE, Bounds);
        bail_if!(n > self.remaining(), Truncated);
        self.advance(n);
        Ok(())
    }
}
