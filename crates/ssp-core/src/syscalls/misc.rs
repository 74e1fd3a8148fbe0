//! Arguments, environment, clocks, randomness and scheduling.

use std::mem::MaybeUninit;

use tracing::trace;

use crate::argv_environ::ArgvEnviron;
use crate::errno::Errno;
use crate::random::random_buf;
use crate::sys;
use crate::types::{Clockid, Timestamp};
use crate::Result;

/// `(argc, argv_buf_size)`.
pub fn args_sizes_get(argv_environ: &ArgvEnviron) -> Result<(usize, usize)> {
    trace!("args_sizes_get()");
    Ok(argv_environ.args_sizes())
}

pub fn args_get(argv_environ: &ArgvEnviron, argv: &mut [u32], argv_buf: &mut [u8]) -> Result<()> {
    trace!("args_get(argv_len={}, argv_buf_len={})", argv.len(), argv_buf.len());
    argv_environ.args_get(argv, argv_buf)
}

/// `(environ_count, environ_buf_size)`.
pub fn environ_sizes_get(argv_environ: &ArgvEnviron) -> Result<(usize, usize)> {
    trace!("environ_sizes_get()");
    Ok(argv_environ.environ_sizes())
}

pub fn environ_get(
    argv_environ: &ArgvEnviron,
    environ: &mut [u32],
    environ_buf: &mut [u8],
) -> Result<()> {
    trace!(
        "environ_get(environ_len={}, environ_buf_len={})",
        environ.len(),
        environ_buf.len()
    );
    argv_environ.environ_get(environ, environ_buf)
}

/// `clock_id` is the raw wire value; unknown clocks fail with `Inval`.
pub fn clock_res_get(clock_id: u32) -> Result<Timestamp> {
    trace!("clock_res_get(id={:?})", clock_id);
    let id = sys::convert_clockid(Clockid::try_from(clock_id)?);
    let mut ts = MaybeUninit::<libc::timespec>::uninit();
    // SAFETY: `ts` is a valid out pointer.
    sys::cvt(unsafe { libc::clock_getres(id, ts.as_mut_ptr()) })?;
    // SAFETY: clock_getres succeeded.
    let ts = unsafe { ts.assume_init() };
    Ok(sys::convert_timespec(ts.tv_sec as i64, ts.tv_nsec as i64))
}

pub fn clock_time_get(clock_id: u32, precision: Timestamp) -> Result<Timestamp> {
    trace!("clock_time_get(id={:?}, precision={})", clock_id, precision);
    let id = sys::convert_clockid(Clockid::try_from(clock_id)?);
    let mut ts = MaybeUninit::<libc::timespec>::uninit();
    // SAFETY: `ts` is a valid out pointer.
    sys::cvt(unsafe { libc::clock_gettime(id, ts.as_mut_ptr()) })?;
    // SAFETY: clock_gettime succeeded.
    let ts = unsafe { ts.assume_init() };
    Ok(sys::convert_timespec(ts.tv_sec as i64, ts.tv_nsec as i64))
}

pub fn random_get(buf: &mut [u8]) -> Result<()> {
    trace!("random_get(buf_len={})", buf.len());
    random_buf(buf)
}

pub fn sched_yield() -> Result<()> {
    trace!("sched_yield()");
    // SAFETY: plain syscall.
    if unsafe { libc::sched_yield() } < 0 {
        return Err(Errno::last());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clocks() {
        let res = clock_res_get(Clockid::Monotonic as u32).unwrap();
        assert!(res > 0);
        let a = clock_time_get(Clockid::Monotonic as u32, 0).unwrap();
        let b = clock_time_get(Clockid::Monotonic as u32, 0).unwrap();
        assert!(b >= a);

        let now = clock_time_get(Clockid::Realtime as u32, 0).unwrap();
        // Some time after 2020.
        assert!(now > 1_577_836_800 * 1_000_000_000);

        assert_eq!(clock_time_get(17, 0).unwrap_err(), Errno::Inval);
    }

    #[test]
    fn test_args_roundtrip_through_shims() {
        let ae = ArgvEnviron::new(["a", "bc"], ["K=V"]).unwrap();
        let (argc, size) = args_sizes_get(&ae).unwrap();
        let mut argv = vec![0u32; argc];
        let mut buf = vec![0u8; size];
        args_get(&ae, &mut argv, &mut buf).unwrap();
        assert_eq!(argv, vec![0, 2]);
        assert_eq!(buf, b"a\0bc\0");

        let (count, size) = environ_sizes_get(&ae).unwrap();
        assert_eq!((count, size), (1, 4));
    }

    #[test]
    fn test_random_and_yield() {
        let mut buf = [0u8; 32];
        random_get(&mut buf).unwrap();
        sched_yield().unwrap();
    }
}
