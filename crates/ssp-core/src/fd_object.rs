//! Reference-counted wrapper around one host resource.

use std::fmt;
use std::os::fd::RawFd;
use std::ptr::NonNull;

use tracing::trace;

use crate::locking::Mutex;
use crate::refcount::RefCount;
use crate::types::{Dircookie, Filetype, DIRCOOKIE_START};

/// Directory iteration cursor. The `DIR*` is opened on first `fd_readdir`.
pub struct DirState {
    pub(crate) handle: Option<NonNull<libc::DIR>>,
    pub(crate) offset: Dircookie,
}

// SAFETY: the stream is only touched while holding the owning object's mutex.
unsafe impl Send for DirState {}

impl DirState {
    fn new() -> Self {
        Self {
            handle: None,
            offset: DIRCOOKIE_START,
        }
    }
}

pub struct FdObject {
    refcount: RefCount,
    filetype: Filetype,
    number: RawFd,
    directory: Option<Mutex<DirState>>,
}

impl FdObject {
    pub fn filetype(&self) -> Filetype {
        self.filetype
    }

    pub fn number(&self) -> RawFd {
        self.number
    }

    /// Iteration state; `None` unless the object is a directory.
    pub fn directory(&self) -> Option<&Mutex<DirState>> {
        self.directory.as_ref()
    }
}

impl Drop for FdObject {
    fn drop(&mut self) {
        let dir = self
            .directory
            .take()
            .and_then(|state| state.into_inner().handle);
        match dir {
            Some(dir) => {
                trace!("closedir(fd={})", self.number);
                // SAFETY: the stream was opened by fdopendir and owns `number`.
                unsafe { libc::closedir(dir.as_ptr()) };
            }
            None => {
                trace!("close(fd={})", self.number);
                crate::sys::close(self.number);
            }
        }
    }
}

/// Owning handle to a shared [`FdObject`].
///
/// Cloning takes a reference; dropping releases it. The host descriptor is
/// closed exactly when the last handle goes away.
pub struct FdObjectRef {
    ptr: NonNull<FdObject>,
}

// SAFETY: `FdObject` is internally synchronized (atomic count, mutex for
// the directory cursor, immutable otherwise).
unsafe impl Send for FdObjectRef {}
unsafe impl Sync for FdObjectRef {}

impl FdObjectRef {
    /// Take ownership of host descriptor `number`.
    pub fn new(filetype: Filetype, number: RawFd) -> Self {
        let directory = (filetype == Filetype::Directory).then(|| Mutex::new(DirState::new()));
        let object = Box::new(FdObject {
            refcount: RefCount::new(1),
            filetype,
            number,
            directory,
        });
        Self {
            ptr: NonNull::from(Box::leak(object)),
        }
    }

    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        a.ptr == b.ptr
    }

    /// Number of live handles to this object.
    pub fn ref_count(this: &Self) -> u32 {
        this.refcount.get()
    }
}

impl std::ops::Deref for FdObjectRef {
    type Target = FdObject;

    fn deref(&self) -> &FdObject {
        // SAFETY: we hold a reference, so the allocation is alive.
        unsafe { self.ptr.as_ref() }
    }
}

impl Clone for FdObjectRef {
    fn clone(&self) -> Self {
        self.refcount.acquire();
        Self { ptr: self.ptr }
    }
}

impl Drop for FdObjectRef {
    fn drop(&mut self) {
        if self.refcount.release() {
            // SAFETY: this was the last reference; the box came from `new`.
            drop(unsafe { Box::from_raw(self.ptr.as_ptr()) });
        }
    }
}

impl fmt::Debug for FdObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FdObjectRef")
            .field("filetype", &self.filetype)
            .field("number", &self.number)
            .field("refs", &self.refcount.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipe() -> (RawFd, RawFd) {
        let mut fds = [0; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        (fds[0], fds[1])
    }

    fn is_open(fd: RawFd) -> bool {
        unsafe { libc::fcntl(fd, libc::F_GETFD) != -1 }
    }

    #[test]
    fn test_closes_at_last_release() {
        let (r, w) = pipe();
        let obj = FdObjectRef::new(Filetype::SocketStream, r);
        let second = obj.clone();
        assert_eq!(FdObjectRef::ref_count(&obj), 2);
        assert!(FdObjectRef::ptr_eq(&obj, &second));

        drop(obj);
        assert!(is_open(r));
        drop(second);
        assert!(!is_open(r));
        crate::sys::close(w);
    }

    #[test]
    fn test_directory_state_only_for_directories() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = std::ffi::CString::new(dir.path().to_str().unwrap()).unwrap();
        let fd = unsafe { libc::open(path.as_ptr(), libc::O_RDONLY | libc::O_DIRECTORY) };
        assert!(fd >= 0);
        let obj = FdObjectRef::new(Filetype::Directory, fd);
        assert!(obj.directory().is_some());
        assert_eq!(obj.directory().unwrap().lock().offset, DIRCOOKIE_START);

        let (r, w) = pipe();
        let other = FdObjectRef::new(Filetype::SocketStream, r);
        assert!(other.directory().is_none());
        crate::sys::close(w);
    }

    #[test]
    fn test_closedir_after_stream_opened() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = std::ffi::CString::new(dir.path().to_str().unwrap()).unwrap();
        let fd = unsafe { libc::open(path.as_ptr(), libc::O_RDONLY | libc::O_DIRECTORY) };
        let obj = FdObjectRef::new(Filetype::Directory, fd);
        {
            let mut state = obj.directory().unwrap().lock();
            state.handle = NonNull::new(unsafe { libc::fdopendir(fd) });
            assert!(state.handle.is_some());
        }
        drop(obj);
        assert!(!is_open(fd));
    }
}
