//! Namespace operations beneath directory handles.

use tracing::trace;

use crate::errno::Errno;
use crate::fd_table::FdTable;
use crate::path::{path_get, path_get_nofollow};
use crate::sys;
use crate::types::{Fd, Lookupflags, Rights};
use crate::Result;

fn lossy(path: &[u8]) -> std::borrow::Cow<'_, str> {
    String::from_utf8_lossy(path)
}

pub fn path_create_directory(curfds: &FdTable, fd: Fd, path: &[u8]) -> Result<()> {
    trace!("path_create_directory(fd={:?}, path={:?})", fd, lossy(path));
    let pa = path_get_nofollow(
        curfds,
        fd,
        path,
        Rights::PATH_CREATE_DIRECTORY,
        Rights::empty(),
        true,
    )?;
    // SAFETY: path is NUL terminated.
    sys::cvt(unsafe { libc::mkdirat(pa.fd(), pa.path().as_ptr(), 0o777) })?;
    Ok(())
}

pub fn path_link(
    curfds: &FdTable,
    old_fd: Fd,
    old_flags: Lookupflags,
    old_path: &[u8],
    new_fd: Fd,
    new_path: &[u8],
) -> Result<()> {
    trace!(
        "path_link(old_fd={:?}, old_flags={:?}, old_path={:?}, new_fd={:?}, new_path={:?})",
        old_fd,
        old_flags,
        lossy(old_path),
        new_fd,
        lossy(new_path)
    );
    let old = path_get(
        curfds,
        old_fd,
        old_flags,
        old_path,
        Rights::PATH_LINK_SOURCE,
        Rights::empty(),
        false,
    )?;
    let new = path_get_nofollow(
        curfds,
        new_fd,
        new_path,
        Rights::PATH_LINK_TARGET,
        Rights::empty(),
        true,
    )?;

    let flags = if old.follow() { libc::AT_SYMLINK_FOLLOW } else { 0 };
    // SAFETY: both paths are NUL terminated.
    let ret = unsafe {
        libc::linkat(
            old.fd(),
            old.path().as_ptr(),
            new.fd(),
            new.path().as_ptr(),
            flags,
        )
    };
    match sys::cvt(ret) {
        Ok(_) => Ok(()),
        Err(Errno::Notsup) if !old.follow() => {
            // Some systems refuse hard links to symlinks; copy the link instead.
            let target = sys::readlinkat(old.fd(), old.path()).map_err(|_| Errno::Notsup)?;
            let target = sys::cstring(&target)?;
            // SAFETY: both strings are NUL terminated.
            sys::cvt(unsafe { libc::symlinkat(target.as_ptr(), new.fd(), new.path().as_ptr()) })?;
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Read a symlink's target into `buf`, truncating. Returns the bytes written.
pub fn path_readlink(curfds: &FdTable, fd: Fd, path: &[u8], buf: &mut [u8]) -> Result<usize> {
    trace!(
        "path_readlink(fd={:?}, path={:?}, buf_len={})",
        fd,
        lossy(path),
        buf.len()
    );
    let pa = path_get_nofollow(
        curfds,
        fd,
        path,
        Rights::PATH_READLINK,
        Rights::empty(),
        false,
    )?;
    // readlink rejects empty buffers, but an empty guest buffer is valid.
    let empty = buf.is_empty();
    let mut scratch = [0u8; 1];
    let target: &mut [u8] = if empty { &mut scratch } else { buf };
    // SAFETY: `target` is valid for its length and the path is NUL terminated.
    let n = sys::cvt_size(unsafe {
        libc::readlinkat(
            pa.fd(),
            pa.path().as_ptr(),
            target.as_mut_ptr().cast(),
            target.len(),
        )
    })?;
    let bufused = if empty { 0 } else { n };
    trace!("     | *bufused={:?}", bufused);
    Ok(bufused)
}

pub fn path_rename(
    curfds: &FdTable,
    old_fd: Fd,
    old_path: &[u8],
    new_fd: Fd,
    new_path: &[u8],
) -> Result<()> {
    trace!(
        "path_rename(old_fd={:?}, old_path={:?}, new_fd={:?}, new_path={:?})",
        old_fd,
        lossy(old_path),
        new_fd,
        lossy(new_path)
    );
    let old = path_get_nofollow(
        curfds,
        old_fd,
        old_path,
        Rights::PATH_RENAME_SOURCE,
        Rights::empty(),
        true,
    )?;
    let new = path_get_nofollow(
        curfds,
        new_fd,
        new_path,
        Rights::PATH_RENAME_TARGET,
        Rights::empty(),
        true,
    )?;
    // SAFETY: both paths are NUL terminated.
    sys::cvt(unsafe {
        libc::renameat(old.fd(), old.path().as_ptr(), new.fd(), new.path().as_ptr())
    })?;
    Ok(())
}

/// Create a symlink at `new_path` pointing to `old_path`. The target is
/// stored verbatim; lookups through it stay confined to the sandbox.
pub fn path_symlink(curfds: &FdTable, old_path: &[u8], fd: Fd, new_path: &[u8]) -> Result<()> {
    trace!(
        "path_symlink(old_path={:?}, fd={:?}, new_path={:?})",
        lossy(old_path),
        fd,
        lossy(new_path)
    );
    let target = sys::cstring(old_path)?;
    let pa = path_get_nofollow(curfds, fd, new_path, Rights::PATH_SYMLINK, Rights::empty(), true)?;
    // SAFETY: both strings are NUL terminated.
    sys::cvt(unsafe { libc::symlinkat(target.as_ptr(), pa.fd(), pa.path().as_ptr()) })?;
    Ok(())
}

pub fn path_unlink_file(curfds: &FdTable, fd: Fd, path: &[u8]) -> Result<()> {
    trace!("path_unlink_file(fd={:?}, path={:?})", fd, lossy(path));
    let pa = path_get_nofollow(
        curfds,
        fd,
        path,
        Rights::PATH_UNLINK_FILE,
        Rights::empty(),
        true,
    )?;
    // SAFETY: path is NUL terminated.
    match sys::cvt(unsafe { libc::unlinkat(pa.fd(), pa.path().as_ptr(), 0) }) {
        Ok(_) => Ok(()),
        // Some systems report EPERM when unlinking a directory.
        Err(Errno::Perm) => {
            let is_dir = sys::fstatat(pa.fd(), pa.path(), false)
                .map(|st| st.st_mode & libc::S_IFMT == libc::S_IFDIR)
                .unwrap_or(false);
            Err(if is_dir { Errno::Isdir } else { Errno::Perm })
        }
        Err(e) => Err(e),
    }
}

pub fn path_remove_directory(curfds: &FdTable, fd: Fd, path: &[u8]) -> Result<()> {
    trace!("path_remove_directory(fd={:?}, path={:?})", fd, lossy(path));
    let pa = path_get_nofollow(
        curfds,
        fd,
        path,
        Rights::PATH_REMOVE_DIRECTORY,
        Rights::empty(),
        true,
    )?;
    // SAFETY: path is NUL terminated.
    match sys::cvt(unsafe { libc::unlinkat(pa.fd(), pa.path().as_ptr(), libc::AT_REMOVEDIR) }) {
        Ok(_) => Ok(()),
        // POSIX allows EEXIST for a non-empty directory.
        Err(Errno::Exist) => Err(Errno::Notempty),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::OwnedFd;
    use tempfile::TempDir;

    fn setup() -> (TempDir, FdTable) {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("f"), b"content").unwrap();
        let table = FdTable::new();
        let root: OwnedFd = std::fs::File::open(dir.path()).unwrap().into();
        table.insert_existing(3, root).unwrap();
        (dir, table)
    }

    #[test]
    fn test_mkdir_and_rmdir() {
        let (dir, table) = setup();
        path_create_directory(&table, 3, b"d").unwrap();
        assert!(dir.path().join("d").is_dir());
        assert_eq!(path_create_directory(&table, 3, b"d").unwrap_err(), Errno::Exist);

        std::fs::write(dir.path().join("d/inner"), b"").unwrap();
        assert_eq!(path_remove_directory(&table, 3, b"d").unwrap_err(), Errno::Notempty);
        std::fs::remove_file(dir.path().join("d/inner")).unwrap();
        path_remove_directory(&table, 3, b"d").unwrap();
        assert!(!dir.path().join("d").exists());
    }

    #[test]
    fn test_unlink_directory_is_isdir() {
        let (dir, table) = setup();
        std::fs::create_dir(dir.path().join("d")).unwrap();
        assert_eq!(path_unlink_file(&table, 3, b"d").unwrap_err(), Errno::Isdir);
        path_unlink_file(&table, 3, b"f").unwrap();
        assert!(!dir.path().join("f").exists());
    }

    #[test]
    fn test_symlink_and_readlink() {
        let (_dir, table) = setup();
        path_symlink(&table, b"f", 3, b"l").unwrap();

        let mut buf = [0u8; 16];
        let n = path_readlink(&table, 3, b"l", &mut buf).unwrap();
        assert_eq!(&buf[..n], b"f");

        assert_eq!(path_readlink(&table, 3, b"l", &mut []).unwrap(), 0);
        assert_eq!(path_readlink(&table, 3, b"f", &mut buf).unwrap_err(), Errno::Inval);
    }

    #[test]
    fn test_readlink_truncates() {
        let (_dir, table) = setup();
        path_symlink(&table, b"a-long-target", 3, b"l").unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(path_readlink(&table, 3, b"l", &mut buf).unwrap(), 4);
        assert_eq!(&buf, b"a-lo");
    }

    #[test]
    fn test_rename_and_link() {
        let (dir, table) = setup();
        path_rename(&table, 3, b"f", 3, b"g").unwrap();
        assert!(dir.path().join("g").exists());
        assert!(!dir.path().join("f").exists());

        path_link(&table, 3, Lookupflags::empty(), b"g", 3, b"h").unwrap();
        assert_eq!(std::fs::read(dir.path().join("h")).unwrap(), b"content");
    }

    #[test]
    fn test_rename_out_of_sandbox() {
        let (_dir, table) = setup();
        assert_eq!(
            path_rename(&table, 3, b"f", 3, b"../escaped").unwrap_err(),
            Errno::Notcapable
        );
    }
}
