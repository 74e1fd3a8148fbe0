use rand::Rng;

use crate::errno::Errno;
use crate::Result;

/// Fill `buf` from the operating system's entropy source.
pub fn random_buf(buf: &mut [u8]) -> Result<()> {
    if buf.is_empty() {
        return Ok(());
    }
    getrandom::getrandom(buf).map_err(|e| {
        tracing::warn!("getrandom failed: {}", e);
        e.raw_os_error()
            .map(crate::errno::convert_errno)
            .unwrap_or(Errno::Io)
    })
}

/// Uniform value in `0..upper`. Returns 0 when `upper` is 0.
pub fn random_uniform(upper: usize) -> usize {
    if upper == 0 {
        return 0;
    }
    rand::thread_rng().gen_range(0..upper)
}
