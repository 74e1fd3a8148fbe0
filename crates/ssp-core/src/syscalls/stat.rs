//! File attributes by handle and by path.

use tracing::trace;

use crate::errno::Errno;
use crate::fd_table::FdTable;
use crate::path::path_get;
use crate::sys;
use crate::types::{Fd, Filesize, Filestat, Lookupflags, Rights, Timestamp};
use crate::Result;

pub fn fd_filestat_get(curfds: &FdTable, fd: Fd) -> Result<Filestat> {
    trace!("fd_filestat_get(fd={:?})", fd);
    let object = curfds.get(fd, Rights::FD_FILESTAT_GET, Rights::empty())?;
    let st = sys::fstat(object.number())?;
    let mut stat = sys::convert_stat(&st);
    // The handle knows better than st_mode whether a socket is dgram or stream.
    stat.st_filetype = object.filetype().into();
    trace!("     | *buf={:?}", stat);
    Ok(stat)
}

pub fn fd_filestat_set_size(curfds: &FdTable, fd: Fd, st_size: Filesize) -> Result<()> {
    trace!("fd_filestat_set_size(fd={:?}, st_size={})", fd, st_size);
    let object = curfds.get(fd, Rights::FD_FILESTAT_SET_SIZE, Rights::empty())?;
    let size = libc::off_t::try_from(st_size).map_err(|_| Errno::Inval)?;
    // SAFETY: plain syscall on a descriptor we hold a reference to.
    sys::cvt(unsafe { libc::ftruncate(object.number(), size) })?;
    Ok(())
}

pub fn fd_filestat_set_times(
    curfds: &FdTable,
    fd: Fd,
    st_atim: Timestamp,
    st_mtim: Timestamp,
    fstflags: u16,
) -> Result<()> {
    trace!(
        "fd_filestat_set_times(fd={:?}, st_atim={}, st_mtim={}, fstflags={:#x})",
        fd,
        st_atim,
        st_mtim,
        fstflags
    );
    let times = sys::utimens_args(st_atim, st_mtim, fstflags)?;
    let object = curfds.get(fd, Rights::FD_FILESTAT_SET_TIMES, Rights::empty())?;
    // SAFETY: `times` holds two timespecs.
    sys::cvt(unsafe { libc::futimens(object.number(), times.as_ptr()) })?;
    Ok(())
}

pub fn path_filestat_get(
    curfds: &FdTable,
    fd: Fd,
    flags: Lookupflags,
    path: &[u8],
) -> Result<Filestat> {
    trace!(
        "path_filestat_get(fd={:?}, flags={:?}, path={:?})",
        fd,
        flags,
        String::from_utf8_lossy(path)
    );
    let pa = path_get(
        curfds,
        fd,
        flags,
        path,
        Rights::PATH_FILESTAT_GET,
        Rights::empty(),
        false,
    )?;
    let st = sys::fstatat(pa.fd(), pa.path(), pa.follow())?;
    let stat = sys::convert_stat(&st);
    trace!("     | *buf={:?}", stat);
    Ok(stat)
}

pub fn path_filestat_set_times(
    curfds: &FdTable,
    fd: Fd,
    flags: Lookupflags,
    path: &[u8],
    st_atim: Timestamp,
    st_mtim: Timestamp,
    fstflags: u16,
) -> Result<()> {
    trace!(
        "path_filestat_set_times(fd={:?}, flags={:?}, path={:?}, fstflags={:#x})",
        fd,
        flags,
        String::from_utf8_lossy(path),
        fstflags
    );
    let times = sys::utimens_args(st_atim, st_mtim, fstflags)?;
    let pa = path_get(
        curfds,
        fd,
        flags,
        path,
        Rights::PATH_FILESTAT_SET_TIMES,
        Rights::empty(),
        false,
    )?;
    // SAFETY: path is NUL terminated and `times` holds two timespecs.
    sys::cvt(unsafe {
        libc::utimensat(pa.fd(), pa.path().as_ptr(), times.as_ptr(), pa.at_flags())
    })?;
    Ok(())
}
