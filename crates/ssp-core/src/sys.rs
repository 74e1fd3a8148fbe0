//! Thin helpers over raw libc calls.
//!
//! Everything here returns [`crate::Result`] with the host `errno` already
//! translated.

use std::ffi::{CStr, CString};
use std::mem::MaybeUninit;
use std::os::fd::RawFd;

use crate::errno::Errno;
use crate::types::{Clockid, Filestat, Filetype, Fstflags, Timestamp};
use crate::Result;

const NSEC_PER_SEC: u64 = 1_000_000_000;

/// Map a `-1` return to the current `errno`.
#[inline]
pub fn cvt(ret: libc::c_int) -> Result<libc::c_int> {
    nix::errno::Errno::result(ret).map_err(Errno::from)
}

#[inline]
pub fn cvt_size(ret: libc::ssize_t) -> Result<usize> {
    if ret < 0 {
        Err(Errno::last())
    } else {
        Ok(ret as usize)
    }
}

/// Path argument for `*at` calls. Embedded NUL bytes are rejected.
pub fn cstring(bytes: &[u8]) -> Result<CString> {
    CString::new(bytes).map_err(|_| Errno::Ilseq)
}

pub fn close(fd: RawFd) {
    // SAFETY: the caller owns `fd` and never uses it again.
    let _ = unsafe { libc::close(fd) };
}

pub fn fstat(fd: RawFd) -> Result<libc::stat> {
    let mut st = MaybeUninit::<libc::stat>::uninit();
    // SAFETY: `st` is a valid out pointer.
    cvt(unsafe { libc::fstat(fd, st.as_mut_ptr()) })?;
    // SAFETY: fstat succeeded and filled the structure.
    Ok(unsafe { st.assume_init() })
}

pub fn fstatat(dirfd: RawFd, path: &CStr, follow: bool) -> Result<libc::stat> {
    let flags = if follow { 0 } else { libc::AT_SYMLINK_NOFOLLOW };
    let mut st = MaybeUninit::<libc::stat>::uninit();
    // SAFETY: `path` is NUL terminated and `st` is a valid out pointer.
    cvt(unsafe { libc::fstatat(dirfd, path.as_ptr(), st.as_mut_ptr(), flags) })?;
    // SAFETY: fstatat succeeded and filled the structure.
    Ok(unsafe { st.assume_init() })
}

pub fn openat(dirfd: RawFd, path: &CStr, flags: libc::c_int, mode: libc::mode_t) -> Result<RawFd> {
    // SAFETY: `path` is NUL terminated.
    cvt(unsafe { libc::openat(dirfd, path.as_ptr(), flags, libc::c_uint::from(mode)) })
}

/// Read a symbolic link's target, growing the buffer until it fits.
pub fn readlinkat(dirfd: RawFd, path: &CStr) -> Result<Vec<u8>> {
    let mut len = 256usize;
    loop {
        let mut buf = vec![0u8; len];
        // SAFETY: `buf` has room for `len` bytes.
        let ret = unsafe {
            libc::readlinkat(dirfd, path.as_ptr(), buf.as_mut_ptr().cast(), len)
        };
        let n = cvt_size(ret)?;
        if n < len {
            buf.truncate(n);
            return Ok(buf);
        }
        len = len.checked_mul(2).ok_or(Errno::Nametoolong)?;
    }
}

/// Seconds and nanoseconds to a saturating nanosecond timestamp.
pub fn convert_timespec(sec: i64, nsec: i64) -> Timestamp {
    if sec < 0 {
        return 0;
    }
    let sec = sec as u64;
    if sec >= u64::MAX / NSEC_PER_SEC {
        return u64::MAX;
    }
    (sec * NSEC_PER_SEC).saturating_add(nsec.max(0) as u64)
}

/// Nanosecond timestamp to a `timespec`, clamping seconds to `time_t`.
pub fn convert_timestamp(ts: Timestamp) -> libc::timespec {
    let sec = ts / NSEC_PER_SEC;
    libc::timespec {
        tv_sec: libc::time_t::try_from(sec).unwrap_or(libc::time_t::MAX),
        tv_nsec: (ts % NSEC_PER_SEC) as _,
    }
}

pub fn convert_clockid(id: Clockid) -> libc::clockid_t {
    match id {
        Clockid::Realtime => libc::CLOCK_REALTIME,
        Clockid::Monotonic => libc::CLOCK_MONOTONIC,
        Clockid::ProcessCputimeId => libc::CLOCK_PROCESS_CPUTIME_ID,
        Clockid::ThreadCputimeId => libc::CLOCK_THREAD_CPUTIME_ID,
    }
}

pub fn convert_stat(st: &libc::stat) -> Filestat {
    Filestat {
        st_dev: st.st_dev as u64,
        st_ino: st.st_ino as u64,
        st_filetype: Filetype::from_mode(st.st_mode).into(),
        st_nlink: st.st_nlink as u64,
        st_size: st.st_size as u64,
        st_atim: convert_timespec(st.st_atime as i64, st.st_atime_nsec as i64),
        st_mtim: convert_timespec(st.st_mtime as i64, st.st_mtime_nsec as i64),
        st_ctim: convert_timespec(st.st_ctime as i64, st.st_ctime_nsec as i64),
    }
}

/// Build the `times` argument for `futimens`/`utimensat`.
pub fn utimens_args(st_atim: Timestamp, st_mtim: Timestamp, fstflags: u16) -> Result<[libc::timespec; 2]> {
    let flags = Fstflags::from_bits(fstflags).ok_or(Errno::Inval)?;
    if flags.contains(Fstflags::ATIM | Fstflags::ATIM_NOW)
        || flags.contains(Fstflags::MTIM | Fstflags::MTIM_NOW)
    {
        return Err(Errno::Inval);
    }
    let pick = |set: Fstflags, now: Fstflags, ts: Timestamp| {
        if flags.contains(now) {
            libc::timespec {
                tv_sec: 0,
                tv_nsec: libc::UTIME_NOW,
            }
        } else if flags.contains(set) {
            convert_timestamp(ts)
        } else {
            libc::timespec {
                tv_sec: 0,
                tv_nsec: libc::UTIME_OMIT,
            }
        }
    };
    Ok([
        pick(Fstflags::ATIM, Fstflags::ATIM_NOW, st_atim),
        pick(Fstflags::MTIM, Fstflags::MTIM_NOW, st_mtim),
    ])
}

/// File status flags from `F_GETFL`.
pub fn get_fl(fd: RawFd) -> Result<libc::c_int> {
    // SAFETY: F_GETFL takes no argument.
    cvt(unsafe { libc::fcntl(fd, libc::F_GETFL) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_timespec_saturates() {
        assert_eq!(convert_timespec(-5, 100), 0);
        assert_eq!(convert_timespec(1, 5), 1_000_000_005);
        assert_eq!(convert_timespec(i64::MAX, 0), u64::MAX);
    }

    #[test]
    fn test_convert_timestamp() {
        let ts = convert_timestamp(3_000_000_007);
        assert_eq!(ts.tv_sec, 3);
        assert_eq!(ts.tv_nsec, 7);
    }

    #[test]
    fn test_utimens_args_rejects_conflicts() {
        let both = (Fstflags::ATIM | Fstflags::ATIM_NOW).bits();
        assert_eq!(utimens_args(0, 0, both).unwrap_err(), Errno::Inval);
        assert_eq!(utimens_args(0, 0, 0x40).unwrap_err(), Errno::Inval);

        let times = utimens_args(5, 0, (Fstflags::ATIM | Fstflags::MTIM_NOW).bits()).unwrap();
        assert_eq!(times[0].tv_nsec, 5);
        assert_eq!(times[1].tv_nsec, libc::UTIME_NOW);

        let omit = utimens_args(0, 0, 0).unwrap();
        assert_eq!(omit[0].tv_nsec, libc::UTIME_OMIT);
    }

    #[test]
    fn test_cstring_rejects_nul() {
        assert_eq!(cstring(b"a\0b").unwrap_err(), Errno::Ilseq);
        assert_eq!(cstring(b"ab").unwrap().as_bytes(), b"ab");
    }

    #[test]
    fn test_readlinkat_long_target() {
        let dir = tempfile::TempDir::new().unwrap();
        let target = "x".repeat(600);
        std::os::unix::fs::symlink(&target, dir.path().join("l")).unwrap();
        let path = CString::new(dir.path().join("l").to_str().unwrap()).unwrap();
        let got = readlinkat(libc::AT_FDCWD, &path).unwrap();
        assert_eq!(got, target.as_bytes());
    }
}
