//! Handle management: close, renumber, fdstat, prestats.

use tracing::trace;

use crate::errno::Errno;
use crate::fd_table::FdTable;
use crate::prestats::FdPrestats;
use crate::sys;
use crate::types::{Fd, Fdflags, Fdstat, Prestat, Rights};
use crate::Result;

pub fn fd_close(curfds: &FdTable, prestats: &FdPrestats, fd: Fd) -> Result<()> {
    trace!("fd_close(fd={:?})", fd);
    curfds.close(prestats, fd)
}

pub fn fd_renumber(curfds: &FdTable, prestats: &FdPrestats, from: Fd, to: Fd) -> Result<()> {
    trace!("fd_renumber(from={:?}, to={:?})", from, to);
    curfds.renumber(prestats, to, from)
}

pub fn fd_prestat_get(prestats: &FdPrestats, fd: Fd) -> Result<Prestat> {
    trace!("fd_prestat_get(fd={:?})", fd);
    prestats.prestat(fd)
}

pub fn fd_prestat_dir_name(prestats: &FdPrestats, fd: Fd, path: &mut [u8]) -> Result<()> {
    trace!("fd_prestat_dir_name(fd={:?}, path_len={})", fd, path.len());
    prestats.dir_name(fd, path)
}

pub fn fd_fdstat_get(curfds: &FdTable, fd: Fd) -> Result<Fdstat> {
    trace!("fd_fdstat_get(fd={:?})", fd);
    let entry = curfds.entry(fd, Rights::empty(), Rights::empty())?;
    let fl = sys::get_fl(entry.object.number())?;

    let has = |flag: libc::c_int| (fl & flag) == flag;
    let mut flags = Fdflags::empty();
    flags.set(Fdflags::APPEND, has(libc::O_APPEND));
    flags.set(Fdflags::DSYNC, has(libc::O_DSYNC));
    flags.set(Fdflags::NONBLOCK, has(libc::O_NONBLOCK));
    #[cfg(any(target_os = "linux", target_os = "android"))]
    flags.set(Fdflags::RSYNC, has(libc::O_RSYNC));
    flags.set(Fdflags::SYNC, has(libc::O_SYNC));

    let stat = Fdstat {
        fs_filetype: entry.object.filetype().into(),
        fs_flags: flags.bits(),
        fs_rights_base: entry.rights_base.bits(),
        fs_rights_inheriting: entry.rights_inheriting.bits(),
    };
    trace!("     | *buf={:?}", stat);
    Ok(stat)
}

pub fn fd_fdstat_set_flags(curfds: &FdTable, fd: Fd, fdflags: Fdflags) -> Result<()> {
    trace!("fd_fdstat_set_flags(fd={:?}, fdflags={:?})", fd, fdflags);
    let mut noflags = 0;
    if fdflags.contains(Fdflags::APPEND) {
        noflags |= libc::O_APPEND;
    }
    if fdflags.contains(Fdflags::DSYNC) {
        noflags |= libc::O_DSYNC;
    }
    if fdflags.contains(Fdflags::NONBLOCK) {
        noflags |= libc::O_NONBLOCK;
    }
    if fdflags.contains(Fdflags::RSYNC) {
        noflags |= rsync_flag();
    }
    if fdflags.contains(Fdflags::SYNC) {
        noflags |= libc::O_SYNC;
    }

    let object = curfds.get(fd, Rights::FD_FDSTAT_SET_FLAGS, Rights::empty())?;
    // SAFETY: F_SETFL takes an int argument.
    sys::cvt(unsafe { libc::fcntl(object.number(), libc::F_SETFL, noflags) })?;
    Ok(())
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn rsync_flag() -> libc::c_int {
    libc::O_RSYNC
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn rsync_flag() -> libc::c_int {
    libc::O_SYNC
}

/// Drop rights from a handle. Adding rights fails with `Notcapable`.
pub fn fd_fdstat_set_rights(
    curfds: &FdTable,
    fd: Fd,
    fs_rights_base: Rights,
    fs_rights_inheriting: Rights,
) -> Result<()> {
    trace!(
        "fd_fdstat_set_rights(fd={:?}, base={:?}, inheriting={:?})",
        fd,
        fs_rights_base,
        fs_rights_inheriting
    );
    curfds.set_rights(fd, fs_rights_base, fs_rights_inheriting)
}

/// Raw fdflags from a guest; unknown bits are rejected.
pub fn parse_fdflags(raw: u16) -> Result<Fdflags> {
    Fdflags::from_bits(raw).ok_or(Errno::Inval)
}
