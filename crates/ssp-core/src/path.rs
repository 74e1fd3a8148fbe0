//! Sandboxed path resolution.
//!
//! Paths are walked one component at a time with `openat(O_NOFOLLOW)`,
//! expanding symbolic links by hand, so that no lookup can climb above
//! the directory handle it started from. The kernel's own resolution is
//! only ever applied to a single final component.

use std::ffi::{CStr, CString};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use tracing::trace;

use crate::errno::Errno;
use crate::fd_object::FdObjectRef;
use crate::fd_table::FdTable;
use crate::sys;
use crate::types::{Fd, Lookupflags, Rights};
use crate::Result;

/// Depth of the directory stack, counting the starting directory.
pub const MAX_DIRECTORY_DEPTH: usize = 128;
/// Nesting depth of partially processed symlink targets.
pub const MAX_PATH_NESTING: usize = 32;
/// Total symlink expansions allowed in one lookup.
pub const MAX_SYMLINK_EXPANSIONS: usize = 128;

/// Result of a lookup: a directory descriptor and the name to use with it.
///
/// Dropping the lease closes the directory descriptor (if one was opened
/// during the walk) and releases the handle's object.
#[derive(Debug)]
pub struct PathAccess {
    dir: Option<OwnedFd>,
    path: CString,
    follow: bool,
    object: FdObjectRef,
}

impl PathAccess {
    /// Directory to resolve [`PathAccess::path`] against.
    pub fn fd(&self) -> RawFd {
        match &self.dir {
            Some(dir) => dir.as_raw_fd(),
            None => self.object.number(),
        }
    }

    pub fn path(&self) -> &CStr {
        &self.path
    }

    /// Whether the final component may still be a symlink to follow.
    pub fn follow(&self) -> bool {
        self.follow
    }

    pub fn object(&self) -> &FdObjectRef {
        &self.object
    }

    /// `AT_SYMLINK_NOFOLLOW` unless the lease asks to follow.
    pub fn at_flags(&self) -> libc::c_int {
        if self.follow {
            0
        } else {
            libc::AT_SYMLINK_NOFOLLOW
        }
    }
}

/// A pathname being consumed component by component.
struct PathCursor {
    bytes: Vec<u8>,
    pos: usize,
}

impl PathCursor {
    fn new(bytes: Vec<u8>) -> Self {
        Self { bytes, pos: 0 }
    }

    fn is_exhausted(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    /// Next component and whether slashes followed it.
    fn next_component(&mut self) -> (Vec<u8>, bool) {
        let rest = &self.bytes[self.pos..];
        let len = rest.iter().position(|&b| b == b'/').unwrap_or(rest.len());
        let component = rest[..len].to_vec();
        let slashes = rest[len..].iter().take_while(|&&b| b == b'/').count();
        self.pos += len + slashes;
        (component, slashes > 0)
    }
}

/// Walk state shared by the component loop and symlink expansion.
struct Walk {
    dirs: Vec<OwnedFd>,
    paths: Vec<PathCursor>,
    expansions: usize,
    root: RawFd,
}

impl Walk {
    fn current_dir(&self) -> RawFd {
        self.dirs.last().map_or(self.root, AsRawFd::as_raw_fd)
    }

    fn current_path(&mut self) -> &mut PathCursor {
        let last = self.paths.len() - 1;
        &mut self.paths[last]
    }

    fn push_symlink(&mut self, mut target: Vec<u8>, ends_with_slashes: bool) -> Result<()> {
        self.expansions += 1;
        if self.expansions == MAX_SYMLINK_EXPANSIONS {
            return Err(Errno::Loop);
        }

        if self.current_path().is_exhausted() {
            // Nothing left of the current path; the target replaces it.
            self.paths.pop();
        } else if self.paths.len() == MAX_PATH_NESTING {
            return Err(Errno::Loop);
        }

        // Keep the trailing slash so a non-directory target fails with ENOTDIR.
        if ends_with_slashes {
            target.push(b'/');
        }
        self.paths.push(PathCursor::new(target));
        Ok(())
    }
}

/// Resolve `path` beneath handle `fd`, which must hold `base` and
/// `inheriting` rights.
///
/// When `needs_final_component` is false, a trailing-slash component is
/// entered as a directory rather than returned.
pub fn path_get(
    curfds: &FdTable,
    fd: Fd,
    flags: Lookupflags,
    path: &[u8],
    base: Rights,
    inheriting: Rights,
    needs_final_component: bool,
) -> Result<PathAccess> {
    if path.contains(&0) {
        return Err(Errno::Ilseq);
    }
    let object = curfds.get(fd, base, inheriting)?;
    trace!(
        "path_get(fd={}, path={:?}, flags={:?})",
        fd,
        String::from_utf8_lossy(path),
        flags
    );

    let mut walk = Walk {
        dirs: Vec::new(),
        paths: vec![PathCursor::new(path.to_vec())],
        expansions: 0,
        root: object.number(),
    };

    loop {
        let (file, ends_with_slashes) = walk.current_path().next_component();

        if file.is_empty() {
            return Err(if ends_with_slashes {
                Errno::Notcapable
            } else {
                Errno::Noent
            });
        }

        let more_components = walk.paths.len() > 1 || !walk.current_path().is_exhausted();

        if file == b"." {
            // Nothing to do.
        } else if file == b".." {
            // Popping the starting directory would escape the sandbox.
            if walk.dirs.pop().is_none() {
                return Err(Errno::Notcapable);
            }
        } else if more_components || (ends_with_slashes && !needs_final_component) {
            let name = sys::cstring(&file)?;
            match sys::openat(
                walk.current_dir(),
                &name,
                libc::O_RDONLY | libc::O_DIRECTORY | libc::O_NOFOLLOW | libc::O_CLOEXEC,
                0,
            ) {
                Ok(newdir) => {
                    // SAFETY: openat returned a fresh descriptor we now own.
                    let newdir = unsafe { OwnedFd::from_raw_fd(newdir) };
                    if walk.dirs.len() + 1 == MAX_DIRECTORY_DEPTH {
                        return Err(Errno::Nametoolong);
                    }
                    walk.dirs.push(newdir);
                }
                Err(Errno::Loop | Errno::Mlink | Errno::Notdir) => {
                    match sys::readlinkat(walk.current_dir(), &name) {
                        Ok(target) => {
                            walk.push_symlink(target, ends_with_slashes)?;
                            continue;
                        }
                        // Not a symlink after all, so it is a plain non-directory.
                        Err(Errno::Inval) => return Err(Errno::Notdir),
                        Err(e) => return Err(e),
                    }
                }
                Err(e) => return Err(e),
            }
        } else {
            let name = sys::cstring(&file)?;
            if ends_with_slashes || flags.contains(Lookupflags::SYMLINK_FOLLOW) {
                match sys::readlinkat(walk.current_dir(), &name) {
                    Ok(target) => {
                        walk.push_symlink(target, ends_with_slashes)?;
                        continue;
                    }
                    Err(Errno::Inval | Errno::Noent) => {}
                    Err(e) => return Err(e),
                }
            }

            let mut file = file;
            if ends_with_slashes {
                file.push(b'/');
            }
            return Ok(finish(walk, sys::cstring(&file)?, object));
        }

        if walk.current_path().is_exhausted() {
            if walk.paths.len() == 1 {
                // Paths like ".", "a/.." or "dir/" when the name isn't needed.
                return Ok(finish(walk, CString::from(c"."), object));
            }
            // Done with a symlink target; resume the path that referenced it.
            walk.paths.pop();
        }
    }
}

/// Close every directory but the innermost and hand out the lease.
fn finish(mut walk: Walk, path: CString, object: FdObjectRef) -> PathAccess {
    let dir = walk.dirs.pop();
    drop(walk);
    PathAccess {
        dir,
        path,
        follow: false,
        object,
    }
}

/// [`path_get`] without `SYMLINK_FOLLOW`.
pub fn path_get_nofollow(
    curfds: &FdTable,
    fd: Fd,
    path: &[u8],
    base: Rights,
    inheriting: Rights,
    needs_final_component: bool,
) -> Result<PathAccess> {
    path_get(
        curfds,
        fd,
        Lookupflags::empty(),
        path,
        base,
        inheriting,
        needs_final_component,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    fn setup() -> (TempDir, FdTable, Fd) {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        fs::write(dir.path().join("a/b/file"), b"hi").unwrap();
        let table = FdTable::new();
        let handle: OwnedFd = fs::File::open(dir.path()).unwrap().into();
        table.insert_existing(3, handle).unwrap();
        (dir, table, 3)
    }

    fn get(table: &FdTable, fd: Fd, path: &str, follow: bool) -> Result<PathAccess> {
        let flags = if follow {
            Lookupflags::SYMLINK_FOLLOW
        } else {
            Lookupflags::empty()
        };
        path_get(table, fd, flags, path.as_bytes(), Rights::empty(), Rights::empty(), true)
    }

    #[test]
    fn test_nested_component() {
        let (_dir, table, fd) = setup();
        let pa = get(&table, fd, "a/b/file", false).unwrap();
        assert_eq!(pa.path().to_bytes(), b"file");
        assert_ne!(pa.fd(), pa.object().number());
        let st = sys::fstatat(pa.fd(), pa.path(), false).unwrap();
        assert_eq!(st.st_size, 2);
    }

    #[test]
    fn test_dot_paths_resolve_to_root() {
        let (_dir, table, fd) = setup();
        for p in [".", "a/..", "a/b/../..", "./."] {
            let pa = get(&table, fd, p, false).unwrap();
            assert_eq!(pa.path().to_bytes(), b".", "{}", p);
            assert_eq!(pa.fd(), pa.object().number());
        }
    }

    #[test]
    fn test_escape_is_not_capable() {
        let (_dir, table, fd) = setup();
        assert_eq!(get(&table, fd, "..", false).unwrap_err(), Errno::Notcapable);
        assert_eq!(
            get(&table, fd, "../../../etc/passwd", false).unwrap_err(),
            Errno::Notcapable
        );
        assert_eq!(
            get(&table, fd, "a/../../x", false).unwrap_err(),
            Errno::Notcapable
        );
        assert_eq!(get(&table, fd, "/etc/passwd", false).unwrap_err(), Errno::Notcapable);
    }

    #[test]
    fn test_empty_and_nul() {
        let (_dir, table, fd) = setup();
        assert_eq!(get(&table, fd, "", false).unwrap_err(), Errno::Noent);
        assert_eq!(get(&table, fd, "a\0b", false).unwrap_err(), Errno::Ilseq);
    }

    #[test]
    fn test_trailing_slash_retained() {
        let (_dir, table, fd) = setup();
        let pa = get(&table, fd, "a/b/", false).unwrap();
        assert_eq!(pa.path().to_bytes(), b"b/");

        let pa = path_get_nofollow(&table, fd, b"a/b/", Rights::empty(), Rights::empty(), false)
            .unwrap();
        assert_eq!(pa.path().to_bytes(), b".");
    }

    #[test]
    fn test_file_as_directory() {
        let (_dir, table, fd) = setup();
        assert_eq!(
            get(&table, fd, "a/b/file/x", false).unwrap_err(),
            Errno::Notdir
        );
    }

    #[test]
    fn test_symlink_expansion() {
        let (dir, table, fd) = setup();
        symlink("a/b", dir.path().join("link")).unwrap();
        symlink("b/file", dir.path().join("a/flink")).unwrap();

        let pa = get(&table, fd, "link/file", false).unwrap();
        assert_eq!(pa.path().to_bytes(), b"file");

        // Final component is left alone without SYMLINK_FOLLOW.
        let pa = get(&table, fd, "a/flink", false).unwrap();
        assert_eq!(pa.path().to_bytes(), b"flink");

        let pa = get(&table, fd, "a/flink", true).unwrap();
        assert_eq!(pa.path().to_bytes(), b"file");
    }

    #[test]
    fn test_absolute_symlink_is_not_capable() {
        let (dir, table, fd) = setup();
        symlink("/etc", dir.path().join("etc")).unwrap();
        assert_eq!(get(&table, fd, "etc/passwd", false).unwrap_err(), Errno::Notcapable);
        assert_eq!(get(&table, fd, "etc", true).unwrap_err(), Errno::Notcapable);
    }

    #[test]
    fn test_symlink_loop() {
        let (dir, table, fd) = setup();
        symlink("loop", dir.path().join("loop")).unwrap();
        assert_eq!(get(&table, fd, "loop/x", false).unwrap_err(), Errno::Loop);
        assert_eq!(get(&table, fd, "loop", true).unwrap_err(), Errno::Loop);
    }

    #[test]
    fn test_rights_checked_before_walk() {
        let (_dir, table, fd) = setup();
        let err = path_get_nofollow(&table, fd, b"a", Rights::FD_READ, Rights::empty(), true)
            .unwrap_err();
        assert_eq!(err, Errno::Notcapable);
    }

    #[test]
    fn test_directory_depth_cap() {
        let (dir, table, fd) = setup();
        let deep = "d/".repeat(MAX_DIRECTORY_DEPTH);
        fs::create_dir_all(dir.path().join(&deep)).unwrap();

        // Trailing slashes with no final component open every directory.
        let open_all = |n: usize| {
            let path = "d/".repeat(n);
            path_get_nofollow(&table, fd, path.as_bytes(), Rights::empty(), Rights::empty(), false)
        };
        let pa = open_all(MAX_DIRECTORY_DEPTH - 1).unwrap();
        assert_eq!(pa.path().to_bytes(), b".");
        assert_eq!(
            open_all(MAX_DIRECTORY_DEPTH).unwrap_err(),
            Errno::Nametoolong
        );
    }

    /// Links `s0 -> s1/x -> s2/x ...`, each leaving a pending component.
    fn nested_chain(dir: &TempDir, n: usize) {
        for i in 0..n {
            symlink(format!("s{}/x", i + 1), dir.path().join(format!("s{}", i))).unwrap();
        }
    }

    #[test]
    fn test_path_nesting_below_cap() {
        let (dir, table, fd) = setup();
        nested_chain(&dir, MAX_PATH_NESTING - 1);
        // Every target is pushed; the walk then fails on the missing last link.
        assert_eq!(get(&table, fd, "s0/x", false).unwrap_err(), Errno::Noent);
    }

    #[test]
    fn test_path_nesting_cap() {
        let (dir, table, fd) = setup();
        nested_chain(&dir, MAX_PATH_NESTING);
        assert_eq!(get(&table, fd, "s0/x", false).unwrap_err(), Errno::Loop);
    }
}
