//! Sandbox context: the handle table, its preopens and the program's
//! arguments, plus a builder that installs stdio and preopened directories.

use std::fs::OpenOptions;
use std::io;
use std::os::fd::{AsFd, OwnedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::argv_environ::ArgvEnviron;
use crate::errno::Errno;
use crate::fd_table::FdTable;
use crate::prestats::FdPrestats;
use crate::types::Fd;

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("cannot duplicate host descriptor {fd}: {source}")]
    Stdio { fd: Fd, source: io::Error },

    #[error("cannot open preopen directory {}: {source}", path.display())]
    Preopen { path: PathBuf, source: io::Error },

    #[error("cannot install handle {fd}: {errno}")]
    Install { fd: Fd, errno: Errno },

    #[error("invalid argument or environment string: {0}")]
    ArgvEnviron(Errno),
}

pub struct Sandbox {
    pub curfds: FdTable,
    pub prestats: FdPrestats,
    pub argv_environ: ArgvEnviron,
}

impl Sandbox {
    pub fn builder() -> SandboxBuilder {
        SandboxBuilder::default()
    }

    /// Map a guest path to the preopen whose name is its longest prefix,
    /// returning the handle and the path relative to it.
    pub fn resolve_preopen(&self, guest_path: &str) -> Option<(Fd, String)> {
        self.prestats
            .list()
            .into_iter()
            .filter_map(|(fd, prestat)| {
                strip_preopen(&prestat.dir, guest_path).map(|rest| (prestat.dir.len(), fd, rest))
            })
            .max_by_key(|&(len, _, _)| len)
            .map(|(_, fd, rest)| (fd, rest))
    }
}

fn strip_preopen(dir: &str, path: &str) -> Option<String> {
    let dir_trimmed = dir.trim_end_matches('/');
    let rest = if dir == "." {
        if path.starts_with('/') {
            return None;
        }
        path.strip_prefix("./").unwrap_or(path)
    } else if dir_trimmed.is_empty() {
        // "/" matches every absolute path.
        path.strip_prefix('/')?
    } else {
        let rest = path.strip_prefix(dir_trimmed)?;
        if !rest.is_empty() && !rest.starts_with('/') {
            return None;
        }
        rest
    };
    let rest = rest.trim_start_matches('/');
    Some(if rest.is_empty() { ".".to_owned() } else { rest.to_owned() })
}

#[derive(Debug, Default, Clone)]
pub struct SandboxBuilder {
    inherit_stdio: bool,
    preopens: Vec<(PathBuf, String)>,
    args: Vec<String>,
    env: Vec<String>,
}

impl SandboxBuilder {
    /// Expose duplicates of the host's stdin, stdout and stderr as handles
    /// 0, 1 and 2.
    pub fn inherit_stdio(mut self) -> Self {
        self.inherit_stdio = true;
        self
    }

    /// Preopen host directory `host`, visible to the guest as `guest`.
    pub fn preopen(mut self, host: impl AsRef<Path>, guest: impl Into<String>) -> Self {
        self.preopens.push((host.as_ref().to_path_buf(), guest.into()));
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add a `KEY=VALUE` environment entry.
    pub fn env(mut self, entry: impl Into<String>) -> Self {
        self.env.push(entry.into());
        self
    }

    pub fn envs<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.env.extend(entries.into_iter().map(Into::into));
        self
    }

    pub fn build(self) -> Result<Sandbox, SandboxError> {
        let curfds = FdTable::new();
        let prestats = FdPrestats::new();

        if self.inherit_stdio {
            let stdio = [
                io::stdin().as_fd().try_clone_to_owned(),
                io::stdout().as_fd().try_clone_to_owned(),
                io::stderr().as_fd().try_clone_to_owned(),
            ];
            for (fd, host) in (0..).zip(stdio) {
                let host = host.map_err(|source| SandboxError::Stdio { fd, source })?;
                curfds
                    .insert_existing(fd, host)
                    .map_err(|errno| SandboxError::Install { fd, errno })?;
            }
            debug!("inherited stdio");
        }

        for (fd, (host, guest)) in (3..).zip(self.preopens) {
            let dir = OpenOptions::new()
                .read(true)
                .custom_flags(libc::O_DIRECTORY)
                .open(&host)
                .map_err(|source| SandboxError::Preopen {
                    path: host.clone(),
                    source,
                })?;
            curfds
                .insert_existing(fd, OwnedFd::from(dir))
                .map_err(|errno| SandboxError::Install { fd, errno })?;
            prestats
                .insert(&guest, fd)
                .map_err(|errno| SandboxError::Install { fd, errno })?;
            info!("preopened {} as {:?} (fd {})", host.display(), guest, fd);
        }

        let argv_environ =
            ArgvEnviron::new(&self.args, &self.env).map_err(SandboxError::ArgvEnviron)?;

        Ok(Sandbox {
            curfds,
            prestats,
            argv_environ,
        })
    }
}
