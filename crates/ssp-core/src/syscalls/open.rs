use std::os::fd::{FromRawFd, OwnedFd};

use tracing::{debug, trace};

use crate::errno::Errno;
use crate::fd_table::{determine_type_rights, FdTable};
use crate::path::path_get;
use crate::sys;
use crate::types::{Fd, Fdflags, Lookupflags, Oflags, Rights};
use crate::Result;

/// Host open flags plus the rights the parent directory must carry to
/// allow them.
fn open_flags(oflags: Oflags, base: Rights, inheriting: Rights, fs_flags: Fdflags) -> (libc::c_int, Rights, Rights) {
    let read = base.intersects(Rights::FD_READ | Rights::FD_READDIR);
    let write = base.intersects(
        Rights::FD_DATASYNC | Rights::FD_WRITE | Rights::FD_ALLOCATE | Rights::FD_FILESTAT_SET_SIZE,
    );
    let mut noflags = match (read, write) {
        (true, true) => libc::O_RDWR,
        (false, true) => libc::O_WRONLY,
        _ => libc::O_RDONLY,
    };

    let mut needed_base = Rights::PATH_OPEN;
    let mut needed_inheriting = base | inheriting;

    if oflags.contains(Oflags::CREAT) {
        noflags |= libc::O_CREAT;
        needed_base |= Rights::PATH_CREATE_FILE;
    }
    if oflags.contains(Oflags::DIRECTORY) {
        noflags |= libc::O_DIRECTORY;
    }
    if oflags.contains(Oflags::EXCL) {
        noflags |= libc::O_EXCL;
    }
    if oflags.contains(Oflags::TRUNC) {
        noflags |= libc::O_TRUNC;
        needed_base |= Rights::PATH_FILESTAT_SET_SIZE;
    }

    if fs_flags.contains(Fdflags::APPEND) {
        noflags |= libc::O_APPEND;
    }
    if fs_flags.contains(Fdflags::DSYNC) {
        noflags |= libc::O_DSYNC;
        needed_inheriting |= Rights::FD_DATASYNC;
    }
    if fs_flags.contains(Fdflags::NONBLOCK) {
        noflags |= libc::O_NONBLOCK;
    }
    if fs_flags.contains(Fdflags::RSYNC) {
        #[cfg(any(target_os = "linux", target_os = "android"))]
        {
            noflags |= libc::O_RSYNC;
        }
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        {
            noflags |= libc::O_SYNC;
        }
        needed_inheriting |= Rights::FD_SYNC;
    }
    if fs_flags.contains(Fdflags::SYNC) {
        noflags |= libc::O_SYNC;
        needed_inheriting |= Rights::FD_SYNC;
    }
    if write && noflags & (libc::O_APPEND | libc::O_TRUNC) == 0 {
        needed_inheriting |= Rights::FD_SEEK;
    }
    (noflags, needed_base, needed_inheriting)
}

/// Open `path` beneath directory handle `dirfd` and install the result.
///
/// The new handle's rights are the requested ones, capped by what the
/// opened file's type can support.
#[allow(clippy::too_many_arguments)]
pub fn path_open(
    curfds: &FdTable,
    dirfd: Fd,
    dirflags: Lookupflags,
    path: &[u8],
    oflags: Oflags,
    fs_rights_base: Rights,
    fs_rights_inheriting: Rights,
    fs_flags: Fdflags,
) -> Result<Fd> {
    trace!(
        "path_open(dirfd={:?}, dirflags={:?}, path={:?}, oflags={:?}, fs_rights_base={:?}, fs_rights_inheriting={:?}, fs_flags={:?})",
        dirfd,
        dirflags,
        String::from_utf8_lossy(path),
        oflags,
        fs_rights_base,
        fs_rights_inheriting,
        fs_flags
    );
    let (mut noflags, needed_base, needed_inheriting) =
        open_flags(oflags, fs_rights_base, fs_rights_inheriting, fs_flags);

    let pa = path_get(
        curfds,
        dirfd,
        dirflags,
        path,
        needed_base,
        needed_inheriting,
        oflags.contains(Oflags::CREAT),
    )?;
    if !pa.follow() {
        noflags |= libc::O_NOFOLLOW;
    }
    noflags |= libc::O_CLOEXEC;

    let nfd = match sys::openat(pa.fd(), pa.path(), noflags, 0o666) {
        Ok(nfd) => nfd,
        Err(Errno::Nxio) => {
            // Opening a socket yields ENXIO on Linux.
            let is_socket = sys::fstatat(pa.fd(), pa.path(), pa.follow())
                .map(|st| st.st_mode & libc::S_IFMT == libc::S_IFSOCK)
                .unwrap_or(false);
            return Err(if is_socket { Errno::Notsup } else { Errno::Nxio });
        }
        Err(Errno::Notdir) if noflags & (libc::O_NOFOLLOW | libc::O_DIRECTORY) != 0 => {
            // O_NOFOLLOW|O_DIRECTORY on a symlink reports ENOTDIR on Linux.
            let is_symlink = sys::fstatat(pa.fd(), pa.path(), false)
                .map(|st| st.st_mode & libc::S_IFMT == libc::S_IFLNK)
                .unwrap_or(false);
            return Err(if is_symlink { Errno::Loop } else { Errno::Notdir });
        }
        Err(e) => return Err(nofollow_errno(e, pa.follow())),
    };
    drop(pa);

    // SAFETY: openat returned a fresh descriptor we now own.
    let host = unsafe { OwnedFd::from_raw_fd(nfd) };
    let (filetype, max_base, max_inheriting) =
        determine_type_rights(std::os::fd::AsRawFd::as_raw_fd(&host))?;

    let fd = curfds.insert_fd(
        host,
        filetype,
        fs_rights_base & max_base,
        fs_rights_inheriting & max_inheriting,
    )?;
    debug!("path_open -> fd {} ({:?})", fd, filetype);
    Ok(fd)
}

/// FreeBSD reports EMLINK for O_NOFOLLOW on a symlink.
fn nofollow_errno(err: Errno, follow: bool) -> Errno {
    match err {
        Errno::Mlink if !follow => Errno::Loop,
        e => e,
    }
}
