//! Maximum rights per file type.
//!
//! A handle never holds more than its type's maximum, whatever rights
//! its parent directory was willing to hand down.

use crate::types::Rights;

pub const RIGHTS_ALL: Rights = Rights::all();

pub const RIGHTS_BLOCK_DEVICE_BASE: Rights = RIGHTS_ALL;
pub const RIGHTS_BLOCK_DEVICE_INHERITING: Rights = RIGHTS_ALL;
pub const RIGHTS_CHARACTER_DEVICE_BASE: Rights = RIGHTS_ALL;
pub const RIGHTS_CHARACTER_DEVICE_INHERITING: Rights = RIGHTS_ALL;

pub const RIGHTS_DIRECTORY_BASE: Rights = Rights::FD_FDSTAT_SET_FLAGS
    .union(Rights::FD_SYNC)
    .union(Rights::FD_ADVISE)
    .union(Rights::PATH_CREATE_DIRECTORY)
    .union(Rights::PATH_CREATE_FILE)
    .union(Rights::PATH_LINK_SOURCE)
    .union(Rights::PATH_LINK_TARGET)
    .union(Rights::PATH_OPEN)
    .union(Rights::FD_READDIR)
    .union(Rights::PATH_READLINK)
    .union(Rights::PATH_RENAME_SOURCE)
    .union(Rights::PATH_RENAME_TARGET)
    .union(Rights::PATH_FILESTAT_GET)
    .union(Rights::PATH_FILESTAT_SET_SIZE)
    .union(Rights::PATH_FILESTAT_SET_TIMES)
    .union(Rights::FD_FILESTAT_GET)
    .union(Rights::FD_FILESTAT_SET_TIMES)
    .union(Rights::PATH_SYMLINK)
    .union(Rights::PATH_UNLINK_FILE)
    .union(Rights::PATH_REMOVE_DIRECTORY)
    .union(Rights::POLL_FD_READWRITE);
pub const RIGHTS_DIRECTORY_INHERITING: Rights =
    RIGHTS_DIRECTORY_BASE.union(RIGHTS_REGULAR_FILE_BASE);

pub const RIGHTS_REGULAR_FILE_BASE: Rights = Rights::FD_DATASYNC
    .union(Rights::FD_READ)
    .union(Rights::FD_SEEK)
    .union(Rights::FD_FDSTAT_SET_FLAGS)
    .union(Rights::FD_SYNC)
    .union(Rights::FD_TELL)
    .union(Rights::FD_WRITE)
    .union(Rights::FD_ADVISE)
    .union(Rights::FD_ALLOCATE)
    .union(Rights::FD_FILESTAT_GET)
    .union(Rights::FD_FILESTAT_SET_SIZE)
    .union(Rights::FD_FILESTAT_SET_TIMES)
    .union(Rights::POLL_FD_READWRITE);
pub const RIGHTS_REGULAR_FILE_INHERITING: Rights = Rights::empty();

pub const RIGHTS_SOCKET_BASE: Rights = Rights::FD_READ
    .union(Rights::FD_FDSTAT_SET_FLAGS)
    .union(Rights::FD_WRITE)
    .union(Rights::FD_FILESTAT_GET)
    .union(Rights::POLL_FD_READWRITE)
    .union(Rights::SOCK_SHUTDOWN);
pub const RIGHTS_SOCKET_INHERITING: Rights = RIGHTS_ALL;

pub const RIGHTS_TTY_BASE: Rights = Rights::FD_READ
    .union(Rights::FD_FDSTAT_SET_FLAGS)
    .union(Rights::FD_WRITE)
    .union(Rights::FD_FILESTAT_GET)
    .union(Rights::POLL_FD_READWRITE);
pub const RIGHTS_TTY_INHERITING: Rights = Rights::empty();

/// `(base, inheriting)` ceiling for a freshly classified handle.
pub fn max_rights(filetype: crate::types::Filetype) -> (Rights, Rights) {
    use crate::types::Filetype;
    match filetype {
        Filetype::BlockDevice => (RIGHTS_BLOCK_DEVICE_BASE, RIGHTS_BLOCK_DEVICE_INHERITING),
        Filetype::CharacterDevice => (
            RIGHTS_CHARACTER_DEVICE_BASE,
            RIGHTS_CHARACTER_DEVICE_INHERITING,
        ),
        Filetype::Directory => (RIGHTS_DIRECTORY_BASE, RIGHTS_DIRECTORY_INHERITING),
        Filetype::RegularFile => (RIGHTS_REGULAR_FILE_BASE, RIGHTS_REGULAR_FILE_INHERITING),
        Filetype::SocketDgram | Filetype::SocketStream => {
            (RIGHTS_SOCKET_BASE, RIGHTS_SOCKET_INHERITING)
        }
        Filetype::SymbolicLink | Filetype::Unknown => (Rights::empty(), Rights::empty()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Filetype;

    #[test]
    fn test_directory_sets() {
        assert!(RIGHTS_DIRECTORY_BASE.contains(Rights::PATH_OPEN | Rights::FD_READDIR));
        assert!(!RIGHTS_DIRECTORY_BASE.contains(Rights::FD_READ));
        assert!(RIGHTS_DIRECTORY_INHERITING.contains(RIGHTS_REGULAR_FILE_BASE));
    }

    #[test]
    fn test_leaf_types_do_not_inherit() {
        assert!(RIGHTS_REGULAR_FILE_INHERITING.is_empty());
        assert!(RIGHTS_TTY_INHERITING.is_empty());
        assert!(!RIGHTS_TTY_BASE.contains(Rights::FD_SEEK));
    }

    #[test]
    fn test_max_rights_dispatch() {
        assert_eq!(
            max_rights(Filetype::SocketDgram),
            (RIGHTS_SOCKET_BASE, RIGHTS_SOCKET_INHERITING)
        );
        assert_eq!(max_rights(Filetype::Unknown).0, Rights::empty());
    }
}
