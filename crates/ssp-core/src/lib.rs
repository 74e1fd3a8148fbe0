//! ssp-core: capability-secured POSIX syscall shim.
//!
//! A process-local table of WASI handles, each carrying a rights mask, and
//! the preview1 calls built on top of it. Path lookups are walked by hand
//! beneath a directory handle so they stay confined to it even on systems
//! without kernel sandboxing.
//!
//! ```no_run
//! use ssp_core::{syscalls, Lookupflags, Sandbox};
//!
//! let sandbox = Sandbox::builder().preopen("/srv/data", "/data").build()?;
//! let stat = syscalls::path_filestat_get(&sandbox.curfds, 3, Lookupflags::SYMLINK_FOLLOW, b"report.txt")?;
//! println!("{} bytes", stat.st_size);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod argv_environ;
pub mod errno;
pub mod fd_object;
pub mod fd_table;
pub mod locking;
pub mod path;
pub mod prestats;
pub mod random;
pub mod refcount;
pub mod rights;
pub mod sandbox;
pub mod sys;
pub mod syscalls;
pub mod types;

pub use argv_environ::ArgvEnviron;
pub use errno::{convert_errno, Errno};
pub use fd_object::{FdObject, FdObjectRef};
pub use fd_table::{FdEntry, FdTable};
pub use path::{path_get, path_get_nofollow, PathAccess};
pub use prestats::{FdPrestat, FdPrestats};
pub use sandbox::{Sandbox, SandboxBuilder, SandboxError};
pub use types::*;

/// Result of every shim call.
pub type Result<T> = std::result::Result<T, Errno>;
