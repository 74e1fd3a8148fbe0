//! Data transfer, seeking and sync on open handles.

use std::os::fd::RawFd;

use tracing::trace;

use crate::errno::Errno;
use crate::fd_table::FdTable;
use crate::sys;
use crate::types::{Advice, Ciovec, Fd, Filedelta, Filesize, Iovec, Rights, Whence};
use crate::Result;

fn iov_count(len: usize) -> Result<libc::c_int> {
    libc::c_int::try_from(len).map_err(|_| Errno::Inval)
}

pub fn fd_read(curfds: &FdTable, fd: Fd, iovs: &mut [Iovec<'_>]) -> Result<usize> {
    trace!("fd_read(fd={:?}, iovs_len={})", fd, iovs.len());
    let object = curfds.get(fd, Rights::FD_READ, Rights::empty())?;
    // SAFETY: `IoSliceMut` is ABI compatible with `struct iovec`.
    let n = sys::cvt_size(unsafe {
        libc::readv(
            object.number(),
            iovs.as_ptr().cast::<libc::iovec>(),
            iov_count(iovs.len())?,
        )
    })?;
    trace!("     | *nread={:?}", n);
    Ok(n)
}

pub fn fd_write(curfds: &FdTable, fd: Fd, iovs: &[Ciovec<'_>]) -> Result<usize> {
    trace!("fd_write(fd={:?}, iovs_len={})", fd, iovs.len());
    let object = curfds.get(fd, Rights::FD_WRITE, Rights::empty())?;
    // SAFETY: `IoSlice` is ABI compatible with `struct iovec`.
    let n = sys::cvt_size(unsafe {
        libc::writev(
            object.number(),
            iovs.as_ptr().cast::<libc::iovec>(),
            iov_count(iovs.len())?,
        )
    })?;
    trace!("     | *nwritten={:?}", n);
    Ok(n)
}

pub fn fd_pread(curfds: &FdTable, fd: Fd, iovs: &mut [Iovec<'_>], offset: Filesize) -> Result<usize> {
    trace!(
        "fd_pread(fd={:?}, iovs_len={}, offset={})",
        fd,
        iovs.len(),
        offset
    );
    if iovs.is_empty() {
        return Err(Errno::Inval);
    }
    let object = curfds.get(fd, Rights::FD_READ | Rights::FD_SEEK, Rights::empty())?;
    let offset = libc::off_t::try_from(offset).map_err(|_| Errno::Inval)?;
    let n = preadv(object.number(), iovs, offset)?;
    trace!("     | *nread={:?}", n);
    Ok(n)
}

pub fn fd_pwrite(curfds: &FdTable, fd: Fd, iovs: &[Ciovec<'_>], offset: Filesize) -> Result<usize> {
    trace!(
        "fd_pwrite(fd={:?}, iovs_len={}, offset={})",
        fd,
        iovs.len(),
        offset
    );
    if iovs.is_empty() {
        return Err(Errno::Inval);
    }
    let object = curfds.get(fd, Rights::FD_WRITE | Rights::FD_SEEK, Rights::empty())?;
    let offset = libc::off_t::try_from(offset).map_err(|_| Errno::Inval)?;
    let n = pwritev(object.number(), iovs, offset)?;
    trace!("     | *nwritten={:?}", n);
    Ok(n)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn preadv(fd: RawFd, iovs: &mut [Iovec<'_>], offset: libc::off_t) -> Result<usize> {
    // SAFETY: `IoSliceMut` is ABI compatible with `struct iovec`.
    sys::cvt_size(unsafe {
        libc::preadv(
            fd,
            iovs.as_ptr().cast::<libc::iovec>(),
            iov_count(iovs.len())?,
            offset,
        )
    })
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn preadv(fd: RawFd, iovs: &mut [Iovec<'_>], offset: libc::off_t) -> Result<usize> {
    if let [single] = iovs {
        // SAFETY: the slice is valid for `len` bytes.
        return sys::cvt_size(unsafe {
            libc::pread(fd, single.as_mut_ptr().cast(), single.len(), offset)
        });
    }
    let total: usize = iovs.iter().map(|iov| iov.len()).sum();
    let mut buf = vec![0u8; total];
    // SAFETY: `buf` is valid for `total` bytes.
    let n = sys::cvt_size(unsafe { libc::pread(fd, buf.as_mut_ptr().cast(), total, offset) })?;
    let mut rest = &buf[..n];
    for iov in iovs.iter_mut() {
        let take = rest.len().min(iov.len());
        iov[..take].copy_from_slice(&rest[..take]);
        rest = &rest[take..];
        if rest.is_empty() {
            break;
        }
    }
    Ok(n)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn pwritev(fd: RawFd, iovs: &[Ciovec<'_>], offset: libc::off_t) -> Result<usize> {
    // SAFETY: `IoSlice` is ABI compatible with `struct iovec`.
    sys::cvt_size(unsafe {
        libc::pwritev(
            fd,
            iovs.as_ptr().cast::<libc::iovec>(),
            iov_count(iovs.len())?,
            offset,
        )
    })
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn pwritev(fd: RawFd, iovs: &[Ciovec<'_>], offset: libc::off_t) -> Result<usize> {
    let buf: Vec<u8> = iovs.iter().flat_map(|iov| iov.iter().copied()).collect();
    // SAFETY: `buf` is valid for its length.
    sys::cvt_size(unsafe { libc::pwrite(fd, buf.as_ptr().cast(), buf.len(), offset) })
}

pub fn fd_seek(curfds: &FdTable, fd: Fd, offset: Filedelta, whence: Whence) -> Result<Filesize> {
    trace!(
        "fd_seek(fd={:?}, offset={}, whence={:?})",
        fd,
        offset,
        whence
    );
    // Asking for the current position is a tell, not a seek.
    let rights = if offset == 0 && whence == Whence::Cur {
        Rights::FD_TELL
    } else {
        Rights::FD_SEEK | Rights::FD_TELL
    };
    let object = curfds.get(fd, rights, Rights::empty())?;
    let nwhence = match whence {
        Whence::Set => libc::SEEK_SET,
        Whence::Cur => libc::SEEK_CUR,
        Whence::End => libc::SEEK_END,
    };
    let offset = libc::off_t::try_from(offset).map_err(|_| Errno::Inval)?;
    // SAFETY: plain syscall on a descriptor we hold a reference to.
    let ret = unsafe { libc::lseek(object.number(), offset, nwhence) };
    if ret < 0 {
        return Err(Errno::last());
    }
    trace!("     | *newoffset={:?}", ret);
    Ok(ret as Filesize)
}

pub fn fd_tell(curfds: &FdTable, fd: Fd) -> Result<Filesize> {
    trace!("fd_tell(fd={:?})", fd);
    let object = curfds.get(fd, Rights::FD_TELL, Rights::empty())?;
    // SAFETY: plain syscall on a descriptor we hold a reference to.
    let ret = unsafe { libc::lseek(object.number(), 0, libc::SEEK_CUR) };
    if ret < 0 {
        return Err(Errno::last());
    }
    Ok(ret as Filesize)
}

pub fn fd_sync(curfds: &FdTable, fd: Fd) -> Result<()> {
    trace!("fd_sync(fd={:?})", fd);
    let object = curfds.get(fd, Rights::FD_SYNC, Rights::empty())?;
    // SAFETY: plain syscall on a descriptor we hold a reference to.
    sys::cvt(unsafe { libc::fsync(object.number()) })?;
    Ok(())
}

pub fn fd_datasync(curfds: &FdTable, fd: Fd) -> Result<()> {
    trace!("fd_datasync(fd={:?})", fd);
    let object = curfds.get(fd, Rights::FD_DATASYNC, Rights::empty())?;
    datasync(object.number())
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn datasync(fd: RawFd) -> Result<()> {
    // SAFETY: plain syscall.
    sys::cvt(unsafe { libc::fdatasync(fd) })?;
    Ok(())
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn datasync(fd: RawFd) -> Result<()> {
    // SAFETY: plain syscall.
    sys::cvt(unsafe { libc::fsync(fd) })?;
    Ok(())
}

/// `advice` is the raw wire value; unknown values fail with `Inval`.
pub fn fd_advise(
    curfds: &FdTable,
    fd: Fd,
    offset: Filesize,
    len: Filesize,
    advice: u8,
) -> Result<()> {
    trace!(
        "fd_advise(fd={:?}, offset={}, len={}, advice={})",
        fd,
        offset,
        len,
        advice
    );
    let advice = Advice::try_from(advice)?;
    let object = curfds.get(fd, Rights::FD_ADVISE, Rights::empty())?;
    fadvise(object.number(), offset, len, advice)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn fadvise(fd: RawFd, offset: Filesize, len: Filesize, advice: Advice) -> Result<()> {
    let nadvice = match advice {
        Advice::Normal => libc::POSIX_FADV_NORMAL,
        Advice::Sequential => libc::POSIX_FADV_SEQUENTIAL,
        Advice::Random => libc::POSIX_FADV_RANDOM,
        Advice::Willneed => libc::POSIX_FADV_WILLNEED,
        Advice::Dontneed => libc::POSIX_FADV_DONTNEED,
        Advice::Noreuse => libc::POSIX_FADV_NOREUSE,
    };
    let offset = libc::off_t::try_from(offset).map_err(|_| Errno::Inval)?;
    let len = libc::off_t::try_from(len).map_err(|_| Errno::Inval)?;
    // SAFETY: plain syscall; returns the error number directly.
    let ret = unsafe { libc::posix_fadvise(fd, offset, len, nadvice) };
    if ret != 0 {
        return Err(crate::errno::convert_errno(ret));
    }
    Ok(())
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn fadvise(_fd: RawFd, _offset: Filesize, _len: Filesize, _advice: Advice) -> Result<()> {
    // Advisory only; accepting it without acting is correct.
    Ok(())
}

pub fn fd_allocate(curfds: &FdTable, fd: Fd, offset: Filesize, len: Filesize) -> Result<()> {
    trace!("fd_allocate(fd={:?}, offset={}, len={})", fd, offset, len);
    let object = curfds.get(fd, Rights::FD_ALLOCATE, Rights::empty())?;
    let offset = libc::off_t::try_from(offset).map_err(|_| Errno::Inval)?;
    let len = libc::off_t::try_from(len).map_err(|_| Errno::Inval)?;
    let end = offset.checked_add(len).ok_or(Errno::Fbig)?;
    allocate(object.number(), offset, len, end)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn allocate(fd: RawFd, offset: libc::off_t, len: libc::off_t, _end: libc::off_t) -> Result<()> {
    // SAFETY: plain syscall; returns the error number directly.
    let ret = unsafe { libc::posix_fallocate(fd, offset, len) };
    if ret != 0 {
        return Err(crate::errno::convert_errno(ret));
    }
    Ok(())
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn allocate(fd: RawFd, _offset: libc::off_t, _len: libc::off_t, end: libc::off_t) -> Result<()> {
    // No posix_fallocate: extend with ftruncate when the range passes EOF.
    let st = sys::fstat(fd)?;
    if st.st_size < end {
        // SAFETY: plain syscall.
        sys::cvt(unsafe { libc::ftruncate(fd, end) })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fd_object::FdObjectRef;
    use crate::rights::RIGHTS_REGULAR_FILE_BASE;
    use crate::types::Filetype;
    use std::io::{IoSlice, IoSliceMut};
    use std::os::fd::IntoRawFd;
    use tempfile::TempDir;

    fn file_handle(table: &FdTable, dir: &TempDir, rights: Rights) -> Fd {
        let f = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(dir.path().join("data"))
            .unwrap();
        let obj = FdObjectRef::new(Filetype::RegularFile, f.into_raw_fd());
        table.insert(obj, rights, Rights::empty()).unwrap()
    }

    #[test]
    fn test_write_seek_read() {
        let dir = TempDir::new().unwrap();
        let table = FdTable::new();
        let fd = file_handle(&table, &dir, RIGHTS_REGULAR_FILE_BASE);

        let n = fd_write(&table, fd, &[IoSlice::new(b"hello "), IoSlice::new(b"world")]).unwrap();
        assert_eq!(n, 11);
        assert_eq!(fd_tell(&table, fd).unwrap(), 11);
        assert_eq!(fd_seek(&table, fd, 0, Whence::Set).unwrap(), 0);

        let mut a = [0u8; 5];
        let mut b = [0u8; 16];
        let n = fd_read(&table, fd, &mut [IoSliceMut::new(&mut a), IoSliceMut::new(&mut b)]).unwrap();
        assert_eq!(n, 11);
        assert_eq!(&a, b"hello");
        assert_eq!(&b[..6], b" world");
    }

    #[test]
    fn test_positional_io() {
        let dir = TempDir::new().unwrap();
        let table = FdTable::new();
        let fd = file_handle(&table, &dir, RIGHTS_REGULAR_FILE_BASE);

        fd_pwrite(&table, fd, &[IoSlice::new(b"abc"), IoSlice::new(b"def")], 2).unwrap();
        assert_eq!(fd_tell(&table, fd).unwrap(), 0);

        let mut x = [0u8; 2];
        let mut y = [0u8; 2];
        let n = fd_pread(&table, fd, &mut [IoSliceMut::new(&mut x), IoSliceMut::new(&mut y)], 3).unwrap();
        assert_eq!(n, 4);
        assert_eq!(&x, b"bc");
        assert_eq!(&y, b"de");

        assert_eq!(fd_pread(&table, fd, &mut [], 0).unwrap_err(), Errno::Inval);
        assert_eq!(fd_pwrite(&table, fd, &[], 0).unwrap_err(), Errno::Inval);
    }

    #[test]
    fn test_tell_only_handle() {
        let dir = TempDir::new().unwrap();
        let table = FdTable::new();
        let fd = file_handle(&table, &dir, Rights::FD_TELL);
        assert_eq!(fd_seek(&table, fd, 0, Whence::Cur).unwrap(), 0);
        assert_eq!(
            fd_seek(&table, fd, 1, Whence::Set).unwrap_err(),
            Errno::Notcapable
        );
    }

    #[test]
    fn test_read_without_right() {
        let dir = TempDir::new().unwrap();
        let table = FdTable::new();
        let fd = file_handle(&table, &dir, Rights::FD_WRITE);
        let mut buf = [0u8; 4];
        assert_eq!(
            fd_read(&table, fd, &mut [IoSliceMut::new(&mut buf)]).unwrap_err(),
            Errno::Notcapable
        );
    }

    #[test]
    fn test_advise_and_allocate() {
        let dir = TempDir::new().unwrap();
        let table = FdTable::new();
        let fd = file_handle(&table, &dir, RIGHTS_REGULAR_FILE_BASE);
        fd_advise(&table, fd, 0, 0, Advice::Sequential as u8).unwrap();
        assert_eq!(fd_advise(&table, fd, 0, 0, 9).unwrap_err(), Errno::Inval);

        fd_allocate(&table, fd, 0, 4096).unwrap();
        let len = std::fs::metadata(dir.path().join("data")).unwrap().len();
        assert_eq!(len, 4096);

        fd_sync(&table, fd).unwrap();
        fd_datasync(&table, fd).unwrap();
    }
}
