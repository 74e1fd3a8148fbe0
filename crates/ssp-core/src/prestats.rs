//! Preopened sandbox roots, indexed by handle.

use tracing::debug;

use crate::errno::Errno;
use crate::locking::RwLock;
use crate::types::{Fd, Prestat, PREOPENTYPE_DIR};
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FdPrestat {
    pub dir: String,
}

#[derive(Default)]
pub struct FdPrestats {
    inner: RwLock<Vec<Option<FdPrestat>>>,
}

impl FdPrestats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `dir` as the guest-visible name of preopen `fd`.
    pub fn insert(&self, dir: &str, fd: Fd) -> Result<()> {
        let mut entries = self.inner.write();
        let idx = fd as usize;
        if entries.len() <= idx {
            let mut size = entries.len().max(1);
            while size <= idx {
                size = size.checked_mul(2).ok_or(Errno::Nomem)?;
            }
            let len = entries.len();
            entries
                .try_reserve_exact(size - len)
                .map_err(|_| Errno::Nomem)?;
            entries.resize_with(size, || None);
        }
        if entries[idx].is_some() {
            return Err(Errno::Exist);
        }
        debug!("preopen {} -> {:?}", fd, dir);
        entries[idx] = Some(FdPrestat {
            dir: dir.to_owned(),
        });
        Ok(())
    }

    pub fn get(&self, fd: Fd) -> Result<FdPrestat> {
        self.inner
            .read()
            .get(fd as usize)
            .and_then(Option::clone)
            .ok_or(Errno::Badf)
    }

    pub fn contains(&self, fd: Fd) -> bool {
        matches!(self.inner.read().get(fd as usize), Some(Some(_)))
    }

    /// Preopens are permanent.
    pub fn remove(&self, fd: Fd) -> Result<()> {
        self.get(fd)?;
        Err(Errno::Notsup)
    }

    /// All registered preopens in handle order.
    pub fn list(&self) -> Vec<(Fd, FdPrestat)> {
        self.inner
            .read()
            .iter()
            .enumerate()
            .filter_map(|(fd, p)| p.clone().map(|p| (fd as Fd, p)))
            .collect()
    }

    pub fn prestat(&self, fd: Fd) -> Result<Prestat> {
        let entry = self.get(fd)?;
        Ok(Prestat {
            pr_type: PREOPENTYPE_DIR,
            pr_name_len: u32::try_from(entry.dir.len()).map_err(|_| Errno::Nametoolong)?,
        })
    }

    /// Copy the directory name into `buf`, which must be large enough.
    pub fn dir_name(&self, fd: Fd, buf: &mut [u8]) -> Result<()> {
        let entry = self.get(fd)?;
        let name = entry.dir.as_bytes();
        if buf.len() < name.len() {
            return Err(Errno::Inval);
        }
        buf[..name.len()].copy_from_slice(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_lookup() {
        let p = FdPrestats::new();
        p.insert("/sandbox", 3).unwrap();
        p.insert("/tmp", 9).unwrap();
        assert!(p.contains(3));
        assert!(!p.contains(4));
        assert!(!p.contains(100));
        assert_eq!(p.get(9).unwrap().dir, "/tmp");
        assert_eq!(p.get(4).unwrap_err(), Errno::Badf);
        assert_eq!(p.list().len(), 2);
    }

    #[test]
    fn test_prestat_and_dir_name() {
        let p = FdPrestats::new();
        p.insert("/sandbox", 3).unwrap();
        let st = p.prestat(3).unwrap();
        assert_eq!(st.pr_type, PREOPENTYPE_DIR);
        assert_eq!(st.pr_name_len, 8);

        let mut buf = [0u8; 8];
        p.dir_name(3, &mut buf).unwrap();
        assert_eq!(&buf, b"/sandbox");

        let mut short = [0u8; 4];
        assert_eq!(p.dir_name(3, &mut short).unwrap_err(), Errno::Inval);
    }

    #[test]
    fn test_append_only() {
        let p = FdPrestats::new();
        p.insert("/a", 3).unwrap();
        assert_eq!(p.insert("/b", 3).unwrap_err(), Errno::Exist);
        assert_eq!(p.remove(3).unwrap_err(), Errno::Notsup);
        assert_eq!(p.remove(4).unwrap_err(), Errno::Badf);
        assert!(p.contains(3));
    }
}
