//! WASI preview1 wire types.
//!
//! Everything in this module crosses a WebAssembly linear-memory boundary,
//! so the `#[repr(C)]` structs carry raw integers (never Rust enums) and
//! their layouts are pinned by the compile-time assertions at the bottom.

use std::mem::{align_of, offset_of, size_of};

use bitflags::bitflags;

use crate::errno::Errno;

pub type Fd = u32;
pub type Filesize = u64;
pub type Filedelta = i64;
pub type Timestamp = u64;
pub type Dircookie = u64;
pub type Userdata = u64;
pub type Inode = u64;
pub type Device = u64;
pub type Linkcount = u64;

/// Cookie addressing the first entry of a directory.
pub const DIRCOOKIE_START: Dircookie = 0;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Filetype {
    Unknown = 0,
    BlockDevice = 1,
    CharacterDevice = 2,
    Directory = 3,
    RegularFile = 4,
    SocketDgram = 5,
    SocketStream = 6,
    SymbolicLink = 7,
}

impl Filetype {
    /// Classify a `st_mode` value. Sockets and FIFOs both report as
    /// stream sockets since a path lookup cannot query the socket type.
    pub fn from_mode(mode: libc::mode_t) -> Self {
        match mode & libc::S_IFMT {
            libc::S_IFBLK => Filetype::BlockDevice,
            libc::S_IFCHR => Filetype::CharacterDevice,
            libc::S_IFDIR => Filetype::Directory,
            libc::S_IFIFO => Filetype::SocketStream,
            libc::S_IFLNK => Filetype::SymbolicLink,
            libc::S_IFREG => Filetype::RegularFile,
            libc::S_IFSOCK => Filetype::SocketStream,
            _ => Filetype::Unknown,
        }
    }

    /// Classify a `dirent::d_type` value.
    pub fn from_dirent_type(d_type: u8) -> Self {
        match d_type {
            libc::DT_BLK => Filetype::BlockDevice,
            libc::DT_CHR => Filetype::CharacterDevice,
            libc::DT_DIR => Filetype::Directory,
            libc::DT_FIFO => Filetype::SocketStream,
            libc::DT_LNK => Filetype::SymbolicLink,
            libc::DT_REG => Filetype::RegularFile,
            libc::DT_SOCK => Filetype::SocketStream,
            _ => Filetype::Unknown,
        }
    }
}

impl From<Filetype> for u8 {
    fn from(t: Filetype) -> u8 {
        t as u8
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set = 0,
    Cur = 1,
    End = 2,
}

impl TryFrom<u8> for Whence {
    type Error = Errno;

    fn try_from(raw: u8) -> Result<Self, Errno> {
        match raw {
            0 => Ok(Whence::Set),
            1 => Ok(Whence::Cur),
            2 => Ok(Whence::End),
            _ => Err(Errno::Inval),
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advice {
    Normal = 0,
    Sequential = 1,
    Random = 2,
    Willneed = 3,
    Dontneed = 4,
    Noreuse = 5,
}

impl TryFrom<u8> for Advice {
    type Error = Errno;

    fn try_from(raw: u8) -> Result<Self, Errno> {
        match raw {
            0 => Ok(Advice::Normal),
            1 => Ok(Advice::Sequential),
            2 => Ok(Advice::Random),
            3 => Ok(Advice::Willneed),
            4 => Ok(Advice::Dontneed),
            5 => Ok(Advice::Noreuse),
            _ => Err(Errno::Inval),
        }
    }
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clockid {
    Realtime = 0,
    Monotonic = 1,
    ProcessCputimeId = 2,
    ThreadCputimeId = 3,
}

impl TryFrom<u32> for Clockid {
    type Error = Errno;

    fn try_from(raw: u32) -> Result<Self, Errno> {
        match raw {
            0 => Ok(Clockid::Realtime),
            1 => Ok(Clockid::Monotonic),
            2 => Ok(Clockid::ProcessCputimeId),
            3 => Ok(Clockid::ThreadCputimeId),
            _ => Err(Errno::Inval),
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eventtype {
    Clock = 0,
    FdRead = 1,
    FdWrite = 2,
}

impl TryFrom<u8> for Eventtype {
    type Error = Errno;

    fn try_from(raw: u8) -> Result<Self, Errno> {
        match raw {
            0 => Ok(Eventtype::Clock),
            1 => Ok(Eventtype::FdRead),
            2 => Ok(Eventtype::FdWrite),
            _ => Err(Errno::Inval),
        }
    }
}

pub const PREOPENTYPE_DIR: u8 = 0;

bitflags! {
    /// Operations permitted on a handle.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Rights: u64 {
        const FD_DATASYNC = 1 << 0;
        const FD_READ = 1 << 1;
        const FD_SEEK = 1 << 2;
        const FD_FDSTAT_SET_FLAGS = 1 << 3;
        const FD_SYNC = 1 << 4;
        const FD_TELL = 1 << 5;
        const FD_WRITE = 1 << 6;
        const FD_ADVISE = 1 << 7;
        const FD_ALLOCATE = 1 << 8;
        const PATH_CREATE_DIRECTORY = 1 << 9;
        const PATH_CREATE_FILE = 1 << 10;
        const PATH_LINK_SOURCE = 1 << 11;
        const PATH_LINK_TARGET = 1 << 12;
        const PATH_OPEN = 1 << 13;
        const FD_READDIR = 1 << 14;
        const PATH_READLINK = 1 << 15;
        const PATH_RENAME_SOURCE = 1 << 16;
        const PATH_RENAME_TARGET = 1 << 17;
        const PATH_FILESTAT_GET = 1 << 18;
        const PATH_FILESTAT_SET_SIZE = 1 << 19;
        const PATH_FILESTAT_SET_TIMES = 1 << 20;
        const FD_FILESTAT_GET = 1 << 21;
        const FD_FILESTAT_SET_SIZE = 1 << 22;
        const FD_FILESTAT_SET_TIMES = 1 << 23;
        const PATH_SYMLINK = 1 << 24;
        const PATH_REMOVE_DIRECTORY = 1 << 25;
        const PATH_UNLINK_FILE = 1 << 26;
        const POLL_FD_READWRITE = 1 << 27;
        const SOCK_SHUTDOWN = 1 << 28;
        const SOCK_ACCEPT = 1 << 29;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Fdflags: u16 {
        const APPEND = 1 << 0;
        const DSYNC = 1 << 1;
        const NONBLOCK = 1 << 2;
        const RSYNC = 1 << 3;
        const SYNC = 1 << 4;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Oflags: u16 {
        const CREAT = 1 << 0;
        const DIRECTORY = 1 << 1;
        const EXCL = 1 << 2;
        const TRUNC = 1 << 3;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Lookupflags: u32 {
        const SYMLINK_FOLLOW = 1 << 0;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Fstflags: u16 {
        const ATIM = 1 << 0;
        const ATIM_NOW = 1 << 1;
        const MTIM = 1 << 2;
        const MTIM_NOW = 1 << 3;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Subclockflags: u16 {
        const SUBSCRIPTION_CLOCK_ABSTIME = 1 << 0;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Eventrwflags: u16 {
        const FD_READWRITE_HANGUP = 1 << 0;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Riflags: u16 {
        const RECV_PEEK = 1 << 0;
        const RECV_WAITALL = 1 << 1;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Roflags: u16 {
        const RECV_DATA_TRUNCATED = 1 << 0;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Sdflags: u8 {
        const RD = 1 << 0;
        const WR = 1 << 1;
    }
}

/// Header of one directory entry; the name follows it in the buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dirent {
    pub d_next: Dircookie,
    pub d_ino: Inode,
    pub d_namlen: u32,
    pub d_type: u8,
}

impl Dirent {
    pub const SIZE: usize = size_of::<Dirent>();

    /// Byte image as stored in guest memory. Padding is zeroed.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..8].copy_from_slice(&self.d_next.to_le_bytes());
        out[8..16].copy_from_slice(&self.d_ino.to_le_bytes());
        out[16..20].copy_from_slice(&self.d_namlen.to_le_bytes());
        out[20] = self.d_type;
        out
    }

    /// Parse a header back out of a readdir buffer.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        let u64_at = |at: usize| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[at..at + 8]);
            u64::from_le_bytes(raw)
        };
        let mut namlen = [0u8; 4];
        namlen.copy_from_slice(&bytes[16..20]);
        Some(Self {
            d_next: u64_at(0),
            d_ino: u64_at(8),
            d_namlen: u32::from_le_bytes(namlen),
            d_type: bytes[20],
        })
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Fdstat {
    pub fs_filetype: u8,
    pub fs_flags: u16,
    pub fs_rights_base: u64,
    pub fs_rights_inheriting: u64,
}

impl Fdstat {
    pub fn filetype(&self) -> u8 {
        self.fs_filetype
    }

    pub fn flags(&self) -> Fdflags {
        Fdflags::from_bits_truncate(self.fs_flags)
    }

    pub fn rights_base(&self) -> Rights {
        Rights::from_bits_retain(self.fs_rights_base)
    }

    pub fn rights_inheriting(&self) -> Rights {
        Rights::from_bits_retain(self.fs_rights_inheriting)
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Filestat {
    pub st_dev: Device,
    pub st_ino: Inode,
    pub st_filetype: u8,
    pub st_nlink: Linkcount,
    pub st_size: Filesize,
    pub st_atim: Timestamp,
    pub st_mtim: Timestamp,
    pub st_ctim: Timestamp,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Prestat {
    pub pr_type: u8,
    pub pr_name_len: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionClock {
    pub clock_id: u32,
    pub timeout: Timestamp,
    pub precision: Timestamp,
    pub flags: u16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionFdReadwrite {
    pub file_descriptor: Fd,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union SubscriptionContents {
    pub clock: SubscriptionClock,
    pub fd_readwrite: SubscriptionFdReadwrite,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct SubscriptionU {
    pub tag: u8,
    pub u: SubscriptionContents,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct Subscription {
    pub userdata: Userdata,
    pub u: SubscriptionU,
}

impl Subscription {
    pub fn clock(userdata: Userdata, clock: SubscriptionClock) -> Self {
        Self {
            userdata,
            u: SubscriptionU {
                tag: Eventtype::Clock as u8,
                u: SubscriptionContents { clock },
            },
        }
    }

    pub fn fd_read(userdata: Userdata, fd: Fd) -> Self {
        Self::fd_readwrite(userdata, Eventtype::FdRead, fd)
    }

    pub fn fd_write(userdata: Userdata, fd: Fd) -> Self {
        Self::fd_readwrite(userdata, Eventtype::FdWrite, fd)
    }

    fn fd_readwrite(userdata: Userdata, kind: Eventtype, fd: Fd) -> Self {
        // Zero the whole union so the unused clock bytes are defined.
        let mut contents = SubscriptionContents {
            clock: SubscriptionClock::default(),
        };
        contents.fd_readwrite = SubscriptionFdReadwrite {
            file_descriptor: fd,
        };
        Self {
            userdata,
            u: SubscriptionU {
                tag: kind as u8,
                u: contents,
            },
        }
    }

    /// Raw tag byte; may hold values outside [`Eventtype`].
    pub fn tag(&self) -> u8 {
        self.u.tag
    }

    pub fn clock_contents(&self) -> Option<SubscriptionClock> {
        if self.u.tag != Eventtype::Clock as u8 {
            return None;
        }
        // SAFETY: every field of the union is plain integer data.
        Some(unsafe { self.u.u.clock })
    }

    pub fn fd_readwrite_contents(&self) -> Option<SubscriptionFdReadwrite> {
        if self.u.tag != Eventtype::FdRead as u8 && self.u.tag != Eventtype::FdWrite as u8 {
            return None;
        }
        // SAFETY: every field of the union is plain integer data.
        Some(unsafe { self.u.u.fd_readwrite })
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("Subscription");
        s.field("userdata", &self.userdata).field("tag", &self.u.tag);
        if let Some(clock) = self.clock_contents() {
            s.field("clock", &clock);
        } else if let Some(rw) = self.fd_readwrite_contents() {
            s.field("fd_readwrite", &rw);
        }
        s.finish()
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventFdReadwrite {
    pub nbytes: Filesize,
    pub flags: u16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Event {
    pub userdata: Userdata,
    pub error: u16,
    pub event_type: u8,
    pub fd_readwrite: EventFdReadwrite,
}

impl Event {
    pub fn errno(&self) -> Errno {
        if self.error == 0 {
            Errno::Success
        } else {
            crate::errno::from_raw(self.error).unwrap_or(Errno::Nosys)
        }
    }
}

/// Scatter/gather element for reads. ABI-compatible with `struct iovec`.
pub type Iovec<'a> = std::io::IoSliceMut<'a>;
/// Scatter/gather element for writes. ABI-compatible with `struct iovec`.
pub type Ciovec<'a> = std::io::IoSlice<'a>;

const _: () = {
    assert!(size_of::<Dirent>() == 24);
    assert!(align_of::<Dirent>() == 8);
    assert!(offset_of!(Dirent, d_next) == 0);
    assert!(offset_of!(Dirent, d_ino) == 8);
    assert!(offset_of!(Dirent, d_namlen) == 16);
    assert!(offset_of!(Dirent, d_type) == 20);

    assert!(size_of::<Fdstat>() == 24);
    assert!(align_of::<Fdstat>() == 8);
    assert!(offset_of!(Fdstat, fs_filetype) == 0);
    assert!(offset_of!(Fdstat, fs_flags) == 2);
    assert!(offset_of!(Fdstat, fs_rights_base) == 8);
    assert!(offset_of!(Fdstat, fs_rights_inheriting) == 16);

    assert!(size_of::<Filestat>() == 64);
    assert!(align_of::<Filestat>() == 8);
    assert!(offset_of!(Filestat, st_dev) == 0);
    assert!(offset_of!(Filestat, st_ino) == 8);
    assert!(offset_of!(Filestat, st_filetype) == 16);
    assert!(offset_of!(Filestat, st_nlink) == 24);
    assert!(offset_of!(Filestat, st_size) == 32);
    assert!(offset_of!(Filestat, st_atim) == 40);
    assert!(offset_of!(Filestat, st_mtim) == 48);
    assert!(offset_of!(Filestat, st_ctim) == 56);

    assert!(size_of::<Prestat>() == 8);
    assert!(align_of::<Prestat>() == 4);
    assert!(offset_of!(Prestat, pr_type) == 0);
    assert!(offset_of!(Prestat, pr_name_len) == 4);

    assert!(size_of::<SubscriptionClock>() == 32);
    assert!(offset_of!(SubscriptionClock, clock_id) == 0);
    assert!(offset_of!(SubscriptionClock, timeout) == 8);
    assert!(offset_of!(SubscriptionClock, precision) == 16);
    assert!(offset_of!(SubscriptionClock, flags) == 24);
    assert!(size_of::<SubscriptionFdReadwrite>() == 4);
    assert!(size_of::<SubscriptionContents>() == 32);
    assert!(size_of::<SubscriptionU>() == 40);
    assert!(offset_of!(SubscriptionU, tag) == 0);
    assert!(offset_of!(SubscriptionU, u) == 8);
    assert!(size_of::<Subscription>() == 48);
    assert!(align_of::<Subscription>() == 8);
    assert!(offset_of!(Subscription, userdata) == 0);
    assert!(offset_of!(Subscription, u) == 8);

    assert!(size_of::<EventFdReadwrite>() == 16);
    assert!(offset_of!(EventFdReadwrite, nbytes) == 0);
    assert!(offset_of!(EventFdReadwrite, flags) == 8);
    assert!(size_of::<Event>() == 32);
    assert!(align_of::<Event>() == 8);
    assert!(offset_of!(Event, userdata) == 0);
    assert!(offset_of!(Event, error) == 8);
    assert!(offset_of!(Event, event_type) == 10);
    assert!(offset_of!(Event, fd_readwrite) == 16);

    assert!(size_of::<Iovec<'static>>() == size_of::<libc::iovec>());
    assert!(size_of::<Ciovec<'static>>() == size_of::<libc::iovec>());
};
