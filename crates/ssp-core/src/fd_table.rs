//! Capability handle table.
//!
//! Maps guest handles to `(object, rights_base, rights_inheriting)`. Every
//! operation that touches a handle goes through [`FdTable::get`] or
//! [`FdTable::entry`], so the rights check lives in exactly one place.

use std::os::fd::{IntoRawFd, OwnedFd, RawFd};

use tracing::{debug, trace};

use crate::errno::Errno;
use crate::fd_object::FdObjectRef;
use crate::locking::RwLock;
use crate::prestats::FdPrestats;
use crate::random::random_uniform;
use crate::rights::*;
use crate::sys;
use crate::types::{Fd, Filetype, Rights};
use crate::Result;

/// Largest table size; handles must fit in a `u32`.
const MAX_TABLE_SIZE: usize = 1 << 31;

/// One occupied slot.
#[derive(Debug, Clone)]
pub struct FdEntry {
    pub object: FdObjectRef,
    pub rights_base: Rights,
    pub rights_inheriting: Rights,
}

#[derive(Default)]
struct Inner {
    entries: Vec<Option<FdEntry>>,
    used: usize,
}

impl Inner {
    fn size(&self) -> usize {
        self.entries.len()
    }

    /// Ensure slot `min` exists and that `incr` more entries keep the table
    /// at most half full.
    fn grow(&mut self, min: usize, incr: usize) -> Result<()> {
        let size = self.size();
        let wanted = self.used.checked_add(incr).and_then(|n| n.checked_mul(2));
        let wanted = wanted.ok_or(Errno::Nomem)?;
        if size > min && size >= wanted {
            return Ok(());
        }

        let mut new_size = size.max(1);
        while new_size <= min || new_size < wanted {
            new_size = new_size.checked_mul(2).ok_or(Errno::Nomem)?;
        }
        if new_size > MAX_TABLE_SIZE {
            return Err(Errno::Nomem);
        }
        self.entries
            .try_reserve_exact(new_size - size)
            .map_err(|_| Errno::Nomem)?;
        self.entries.resize_with(new_size, || None);
        debug!("fd table grown from {} to {} slots", size, new_size);
        Ok(())
    }

    fn entry(&self, fd: Fd, base: Rights, inheriting: Rights) -> Result<&FdEntry> {
        let entry = self
            .entries
            .get(fd as usize)
            .and_then(Option::as_ref)
            .ok_or(Errno::Badf)?;
        if !entry.rights_base.contains(base) || !entry.rights_inheriting.contains(inheriting) {
            return Err(Errno::Notcapable);
        }
        Ok(entry)
    }

    fn attach(&mut self, fd: Fd, entry: FdEntry) {
        let slot = &mut self.entries[fd as usize];
        debug_assert!(slot.is_none(), "attaching to occupied slot {}", fd);
        *slot = Some(entry);
        self.used += 1;
    }

    /// Empty slot `fd`, returning its entry so the caller can release it
    /// after dropping the table lock.
    fn detach(&mut self, fd: Fd) -> Option<FdEntry> {
        let old = self.entries.get_mut(fd as usize).and_then(Option::take);
        if old.is_some() {
            self.used -= 1;
        }
        old
    }
}

#[derive(Default)]
pub struct FdTable {
    inner: RwLock<Inner>,
}

impl FdTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of slots, occupied or not.
    pub fn size(&self) -> usize {
        self.inner.read().size()
    }

    /// Number of occupied slots.
    pub fn used(&self) -> usize {
        self.inner.read().used
    }

    /// Install a host descriptor at a fixed handle, deriving its type and
    /// rights from the descriptor itself. Used for stdio and preopens.
    ///
    /// `host` is consumed either way; on failure it is closed.
    pub fn insert_existing(&self, fd: Fd, host: OwnedFd) -> Result<()> {
        let raw = host.into_raw_fd();
        let (filetype, rights_base, rights_inheriting) = match determine_type_rights(raw) {
            Ok(classified) => classified,
            Err(e) => {
                sys::close(raw);
                return Err(e);
            }
        };
        let object = FdObjectRef::new(filetype, raw);

        let mut inner = self.inner.write();
        inner.grow(fd as usize, 1)?;
        if inner.entries[fd as usize].is_some() {
            return Err(Errno::Exist);
        }
        debug!(
            "insert_existing(fd={}, host={}, type={:?})",
            fd,
            raw,
            object.filetype()
        );
        inner.attach(
            fd,
            FdEntry {
                object,
                rights_base,
                rights_inheriting,
            },
        );
        Ok(())
    }

    /// Install `object` at a uniformly random free handle.
    pub fn insert(&self, object: FdObjectRef, base: Rights, inheriting: Rights) -> Result<Fd> {
        let mut inner = self.inner.write();
        // On failure `object` drops here, releasing the caller's reference.
        inner.grow(0, 1)?;

        let size = inner.size();
        let fd = loop {
            let candidate = random_uniform(size);
            if inner.entries[candidate].is_none() {
                break candidate as Fd;
            }
        };
        inner.attach(
            fd,
            FdEntry {
                object,
                rights_base: base,
                rights_inheriting: inheriting,
            },
        );
        Ok(fd)
    }

    /// Wrap a freshly opened host descriptor and insert it.
    pub fn insert_fd(
        &self,
        host: OwnedFd,
        filetype: Filetype,
        base: Rights,
        inheriting: Rights,
    ) -> Result<Fd> {
        let object = FdObjectRef::new(filetype, host.into_raw_fd());
        self.insert(object, base, inheriting)
    }

    /// Look up a handle and take a reference to its object. The table lock
    /// is dropped before returning.
    pub fn get(&self, fd: Fd, base: Rights, inheriting: Rights) -> Result<FdObjectRef> {
        let inner = self.inner.read();
        inner.entry(fd, base, inheriting).map(|e| e.object.clone())
    }

    /// Like [`FdTable::get`] but also returns the handle's rights.
    pub fn entry(&self, fd: Fd, base: Rights, inheriting: Rights) -> Result<FdEntry> {
        let inner = self.inner.read();
        inner.entry(fd, base, inheriting).cloned()
    }

    /// Look up several handles under a single read lock.
    pub fn get_many<I>(&self, lookups: I) -> Vec<Result<FdObjectRef>>
    where
        I: IntoIterator<Item = (Fd, Rights)>,
    {
        let inner = self.inner.read();
        lookups
            .into_iter()
            .map(|(fd, base)| {
                inner
                    .entry(fd, base, Rights::empty())
                    .map(|e| e.object.clone())
            })
            .collect()
    }

    /// Replace a handle's rights. The new rights must be a subset of the
    /// current ones.
    pub fn set_rights(&self, fd: Fd, base: Rights, inheriting: Rights) -> Result<()> {
        let mut inner = self.inner.write();
        inner.entry(fd, base, inheriting)?;
        if let Some(Some(entry)) = inner.entries.get_mut(fd as usize) {
            entry.rights_base = base;
            entry.rights_inheriting = inheriting;
        }
        Ok(())
    }

    /// Move `from` onto `to`, closing whatever `to` held.
    pub fn renumber(&self, prestats: &FdPrestats, to: Fd, from: Fd) -> Result<()> {
        if prestats.contains(to) || prestats.contains(from) {
            return Err(Errno::Notsup);
        }

        let replaced = {
            let mut inner = self.inner.write();
            let moved = inner.entry(from, Rights::empty(), Rights::empty())?.clone();
            inner.entry(to, Rights::empty(), Rights::empty())?;
            if from == to {
                return Ok(());
            }
            inner.detach(from);
            let replaced = inner.detach(to);
            inner.attach(to, moved);
            replaced
        };
        debug!("renumber(from={}, to={})", from, to);
        drop(replaced);
        Ok(())
    }

    /// Remove a handle and release its object. Preopens cannot be closed.
    pub fn close(&self, prestats: &FdPrestats, fd: Fd) -> Result<()> {
        if prestats.contains(fd) {
            return Err(Errno::Notsup);
        }
        let entry = {
            let mut inner = self.inner.write();
            inner.entry(fd, Rights::empty(), Rights::empty())?;
            inner.detach(fd)
        };
        trace!("close(fd={})", fd);
        drop(entry);
        Ok(())
    }
}

/// Classify a host descriptor and compute the rights it may carry.
pub fn determine_type_rights(fd: RawFd) -> Result<(Filetype, Rights, Rights)> {
    let st = sys::fstat(fd)?;
    let (filetype, mut base, inheriting) = match st.st_mode & libc::S_IFMT {
        libc::S_IFBLK => (
            Filetype::BlockDevice,
            RIGHTS_BLOCK_DEVICE_BASE,
            RIGHTS_BLOCK_DEVICE_INHERITING,
        ),
        libc::S_IFCHR => {
            // SAFETY: isatty only inspects the descriptor.
            if unsafe { libc::isatty(fd) } != 0 {
                (Filetype::CharacterDevice, RIGHTS_TTY_BASE, RIGHTS_TTY_INHERITING)
            } else {
                (
                    Filetype::CharacterDevice,
                    RIGHTS_CHARACTER_DEVICE_BASE,
                    RIGHTS_CHARACTER_DEVICE_INHERITING,
                )
            }
        }
        libc::S_IFDIR => (
            Filetype::Directory,
            RIGHTS_DIRECTORY_BASE,
            RIGHTS_DIRECTORY_INHERITING,
        ),
        libc::S_IFREG => (
            Filetype::RegularFile,
            RIGHTS_REGULAR_FILE_BASE,
            RIGHTS_REGULAR_FILE_INHERITING,
        ),
        libc::S_IFSOCK => (
            socket_type(fd)?,
            RIGHTS_SOCKET_BASE,
            RIGHTS_SOCKET_INHERITING,
        ),
        libc::S_IFIFO => (
            Filetype::SocketStream,
            RIGHTS_SOCKET_BASE,
            RIGHTS_SOCKET_INHERITING,
        ),
        _ => return Err(Errno::Inval),
    };

    match sys::get_fl(fd)? & libc::O_ACCMODE {
        libc::O_RDONLY => base.remove(Rights::FD_WRITE),
        libc::O_WRONLY => base.remove(Rights::FD_READ),
        _ => {}
    }
    Ok((filetype, base, inheriting))
}

fn socket_type(fd: RawFd) -> Result<Filetype> {
    let mut kind: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    // SAFETY: `kind` and `len` are valid out pointers of matching size.
    sys::cvt(unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_TYPE,
            (&mut kind as *mut libc::c_int).cast(),
            &mut len,
        )
    })?;
    match kind {
        libc::SOCK_DGRAM => Ok(Filetype::SocketDgram),
        libc::SOCK_STREAM => Ok(Filetype::SocketStream),
        _ => Err(Errno::Inval),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::FromRawFd;

    fn pipe() -> (OwnedFd, OwnedFd) {
        let mut fds = [0; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) }
    }

    fn pipe_object() -> (FdObjectRef, OwnedFd) {
        let (r, w) = pipe();
        (FdObjectRef::new(Filetype::SocketStream, r.into_raw_fd()), w)
    }

    #[test]
    fn test_load_factor_after_every_insert() {
        let table = FdTable::new();
        let mut keep = Vec::new();
        for _ in 0..100 {
            let (obj, w) = pipe_object();
            table.insert(obj, RIGHTS_SOCKET_BASE, Rights::empty()).unwrap();
            keep.push(w);
            assert!(table.used() * 2 <= table.size());
        }
        assert_eq!(table.used(), 100);
    }

    #[test]
    fn test_get_checks_rights() {
        let table = FdTable::new();
        let (obj, _w) = pipe_object();
        let fd = table
            .insert(obj, Rights::FD_READ, Rights::empty())
            .unwrap();

        assert!(table.get(fd, Rights::FD_READ, Rights::empty()).is_ok());
        assert_eq!(
            table.get(fd, Rights::FD_WRITE, Rights::empty()).unwrap_err(),
            Errno::Notcapable
        );
        assert_eq!(
            table.get(fd, Rights::empty(), Rights::FD_READ).unwrap_err(),
            Errno::Notcapable
        );
        assert_eq!(
            table.get(fd + 1000, Rights::empty(), Rights::empty()).unwrap_err(),
            Errno::Badf
        );
    }

    #[test]
    fn test_lookup_acquires_reference() {
        let table = FdTable::new();
        let (obj, _w) = pipe_object();
        let fd = table.insert(obj, Rights::FD_READ, Rights::empty()).unwrap();
        let got = table.get(fd, Rights::empty(), Rights::empty()).unwrap();
        assert_eq!(FdObjectRef::ref_count(&got), 2);
        drop(got);
        let got = table.get(fd, Rights::empty(), Rights::empty()).unwrap();
        assert_eq!(FdObjectRef::ref_count(&got), 2);
    }

    #[test]
    fn test_close_releases_object() {
        let table = FdTable::new();
        let prestats = FdPrestats::new();
        let (obj, _w) = pipe_object();
        let raw = obj.number();
        let fd = table.insert(obj, Rights::FD_READ, Rights::empty()).unwrap();

        let held = table.get(fd, Rights::empty(), Rights::empty()).unwrap();
        table.close(&prestats, fd).unwrap();
        assert_eq!(table.used(), 0);
        assert_ne!(unsafe { libc::fcntl(raw, libc::F_GETFD) }, -1);
        drop(held);
        assert_eq!(unsafe { libc::fcntl(raw, libc::F_GETFD) }, -1);

        assert_eq!(table.close(&prestats, fd).unwrap_err(), Errno::Badf);
    }

    #[test]
    fn test_renumber_moves_entry() {
        let table = FdTable::new();
        let prestats = FdPrestats::new();
        let (a, _wa) = pipe_object();
        let (b, _wb) = pipe_object();
        let b_raw = b.number();
        let fa = table.insert(a, Rights::FD_READ, Rights::empty()).unwrap();
        let fb = table.insert(b, Rights::FD_WRITE, Rights::empty()).unwrap();

        table.renumber(&prestats, fb, fa).unwrap();
        assert_eq!(table.used(), 1);
        let e = table.entry(fb, Rights::empty(), Rights::empty()).unwrap();
        assert_eq!(e.rights_base, Rights::FD_READ);
        assert_eq!(
            table.get(fa, Rights::empty(), Rights::empty()).unwrap_err(),
            Errno::Badf
        );
        assert_eq!(unsafe { libc::fcntl(b_raw, libc::F_GETFD) }, -1);
    }

    #[test]
    fn test_renumber_to_self_and_missing() {
        let table = FdTable::new();
        let prestats = FdPrestats::new();
        let (a, _wa) = pipe_object();
        let fa = table.insert(a, Rights::FD_READ, Rights::empty()).unwrap();
        table.renumber(&prestats, fa, fa).unwrap();
        assert_eq!(table.used(), 1);
        assert_eq!(
            table.renumber(&prestats, fa + 1000, fa).unwrap_err(),
            Errno::Badf
        );
        assert_eq!(table.used(), 1);
    }

    #[test]
    fn test_set_rights_only_drops() {
        let table = FdTable::new();
        let (obj, _w) = pipe_object();
        let fd = table
            .insert(obj, Rights::FD_READ | Rights::FD_WRITE, Rights::empty())
            .unwrap();
        table.set_rights(fd, Rights::FD_READ, Rights::empty()).unwrap();
        assert_eq!(
            table
                .set_rights(fd, Rights::FD_READ | Rights::FD_WRITE, Rights::empty())
                .unwrap_err(),
            Errno::Notcapable
        );
    }

    #[test]
    fn test_insert_existing_classifies() {
        let table = FdTable::new();
        let (r, w) = pipe();
        table.insert_existing(5, r).unwrap();
        table.insert_existing(6, w).unwrap();
        assert!(table.size() > 6);

        let read_end = table.entry(5, Rights::empty(), Rights::empty()).unwrap();
        assert_eq!(read_end.object.filetype(), Filetype::SocketStream);
        assert!(read_end.rights_base.contains(Rights::FD_READ));
        assert!(!read_end.rights_base.contains(Rights::FD_WRITE));

        let write_end = table.entry(6, Rights::empty(), Rights::empty()).unwrap();
        assert!(!write_end.rights_base.contains(Rights::FD_READ));

        let (r2, _w2) = pipe();
        assert_eq!(table.insert_existing(5, r2).unwrap_err(), Errno::Exist);
    }

    #[test]
    fn test_determine_directory_and_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let d = std::fs::File::open(dir.path()).unwrap();
        let (ft, base, inh) = determine_type_rights(std::os::fd::AsRawFd::as_raw_fd(&d)).unwrap();
        assert_eq!(ft, Filetype::Directory);
        assert_eq!(base, RIGHTS_DIRECTORY_BASE);
        assert_eq!(inh, RIGHTS_DIRECTORY_INHERITING);

        let path = dir.path().join("f");
        std::fs::write(&path, b"x").unwrap();
        let f = std::fs::File::open(&path).unwrap();
        let (ft, base, _) = determine_type_rights(std::os::fd::AsRawFd::as_raw_fd(&f)).unwrap();
        assert_eq!(ft, Filetype::RegularFile);
        assert!(!base.contains(Rights::FD_WRITE));
    }

    #[test]
    fn test_concurrent_insert_get_close() {
        let table = FdTable::new();
        let prestats = FdPrestats::new();
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..500 {
                        let (r, _w) = pipe();
                        let fd = table
                            .insert_fd(r, Filetype::SocketStream, Rights::FD_READ, Rights::empty())
                            .unwrap();
                        let got = table.get(fd, Rights::FD_READ, Rights::empty()).unwrap();
                        assert_eq!(FdObjectRef::ref_count(&got), 2);
                        table.close(&prestats, fd).unwrap();
                        assert_eq!(FdObjectRef::ref_count(&got), 1);
                    }
                });
            }
        });
        assert_eq!(table.used(), 0);
    }
}
