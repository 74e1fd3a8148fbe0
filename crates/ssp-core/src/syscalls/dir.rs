//! Directory iteration.

use std::ffi::CStr;
use std::ptr::NonNull;

use tracing::trace;

use crate::errno::Errno;
use crate::fd_table::FdTable;
use crate::types::{Dircookie, Dirent, Fd, Filetype, Rights, DIRCOOKIE_START};
use crate::Result;

/// Append as much of `elem` as fits.
fn readdir_put(buf: &mut [u8], bufused: &mut usize, elem: &[u8]) {
    let avail = buf.len() - *bufused;
    let n = elem.len().min(avail);
    buf[*bufused..*bufused + n].copy_from_slice(&elem[..n]);
    *bufused += n;
}

/// Fill `buf` with directory entries starting at `cookie`.
///
/// Each entry is a [`Dirent`] header followed by the name. The last entry
/// may be cut short; a caller that sees `bufused == buf.len()` should read
/// again from the last complete entry's `d_next`.
pub fn fd_readdir(curfds: &FdTable, fd: Fd, buf: &mut [u8], cookie: Dircookie) -> Result<usize> {
    trace!(
        "fd_readdir(fd={:?}, buf_len={}, cookie={:#x?})",
        fd,
        buf.len(),
        cookie
    );
    let object = curfds.get(fd, Rights::FD_READDIR, Rights::empty())?;
    let mut state = object.directory().ok_or(Errno::Notdir)?.lock();

    let dp = match state.handle {
        Some(dp) => dp,
        None => {
            // SAFETY: the stream takes over the descriptor; the object closes
            // it through closedir from now on.
            let dp = NonNull::new(unsafe { libc::fdopendir(object.number()) })
                .ok_or_else(Errno::last)?;
            state.handle = Some(dp);
            state.offset = DIRCOOKIE_START;
            dp
        }
    };

    if state.offset != cookie {
        if cookie == DIRCOOKIE_START {
            // SAFETY: `dp` is a live stream guarded by `state`.
            unsafe { libc::rewinddir(dp.as_ptr()) };
        } else {
            // SAFETY: as above; the cookie came from an earlier telldir.
            unsafe { libc::seekdir(dp.as_ptr(), cookie as libc::c_long) };
        }
        state.offset = cookie;
    }

    let mut bufused = 0;
    while bufused < buf.len() {
        nix::errno::Errno::clear();
        // SAFETY: `dp` is a live stream guarded by `state`.
        let de = unsafe { libc::readdir(dp.as_ptr()) };
        if de.is_null() {
            let err = nix::errno::Errno::last_raw();
            if err == 0 || bufused > 0 {
                break;
            }
            return Err(crate::errno::convert_errno(err));
        }
        // SAFETY: readdir returned a valid entry that lives until the next call.
        let de = unsafe { &*de };
        // SAFETY: as above.
        state.offset = unsafe { libc::telldir(dp.as_ptr()) } as Dircookie;

        // SAFETY: d_name is NUL terminated.
        let name = unsafe { CStr::from_ptr(de.d_name.as_ptr()) }.to_bytes();
        let header = Dirent {
            d_next: state.offset,
            d_ino: de.d_ino as u64,
            d_namlen: name.len() as u32,
            d_type: Filetype::from_dirent_type(de.d_type).into(),
        };
        readdir_put(buf, &mut bufused, &header.to_bytes());
        readdir_put(buf, &mut bufused, name);
    }
    trace!("     | *bufused={:?}", bufused);
    Ok(bufused)
}

/// Complete entries in a buffer filled by [`fd_readdir`].
pub fn parse_dirents(buf: &[u8]) -> Vec<(Dirent, &[u8])> {
    let mut out = Vec::new();
    let mut rest = buf;
    while let Some(header) = Dirent::from_bytes(rest) {
        let end = Dirent::SIZE + header.d_namlen as usize;
        if rest.len() < end {
            break;
        }
        out.push((header, &rest[Dirent::SIZE..end]));
        rest = &rest[end..];
    }
    out
}
