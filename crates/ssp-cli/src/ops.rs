//! Subcommands that run through the shim layer.

use std::io::{IoSlice, IoSliceMut};

use anyhow::{bail, Context, Result};
use ssp_config::{log_cli_debug, log_cli_info};
use ssp_core::syscalls::*;
use ssp_core::{
    Clockid, Errno, Event, Fd, Fdflags, Filestat, Lookupflags, Oflags, Rights, Sandbox,
    Subscription, SubscriptionClock, DIRCOOKIE_START,
};

const READDIR_BUF: usize = 4096;
const COPY_BUF: usize = 64 * 1024;
const STDOUT: Fd = 1;

/// Map a guest path onto its preopen handle and the path beneath it.
fn resolve(sandbox: &Sandbox, path: &str) -> Result<(Fd, String)> {
    match sandbox.resolve_preopen(path) {
        Some((fd, rel)) => {
            log_cli_debug!("Resolved guest path", path = path, fd = fd, rel = rel.as_str());
            Ok((fd, rel))
        }
        None => bail!("{}: not beneath any preopened directory", path),
    }
}

fn open(sandbox: &Sandbox, path: &str, oflags: Oflags, rights: Rights) -> Result<Fd> {
    let (dir, rel) = resolve(sandbox, path)?;
    let fd = path_open(
        &sandbox.curfds,
        dir,
        Lookupflags::SYMLINK_FOLLOW,
        rel.as_bytes(),
        oflags,
        rights,
        Rights::empty(),
        Fdflags::empty(),
    )
    .with_context(|| format!("{}: open", path))?;
    Ok(fd)
}

fn filetype_name(filetype: u8) -> &'static str {
    match filetype {
        1 => "block device",
        2 => "character device",
        3 => "directory",
        4 => "regular file",
        5 => "datagram socket",
        6 => "stream socket",
        7 => "symbolic link",
        _ => "unknown",
    }
}

pub fn ls(sandbox: &Sandbox, path: &str) -> Result<()> {
    let fd = open(sandbox, path, Oflags::DIRECTORY, Rights::FD_READDIR)?;
    let mut names = Vec::new();
    let mut buf = vec![0u8; READDIR_BUF];
    let mut cookie = DIRCOOKIE_START;
    loop {
        let n = fd_readdir(&sandbox.curfds, fd, &mut buf, cookie)
            .with_context(|| format!("{}: readdir", path))?;
        let entries = parse_dirents(&buf[..n]);
        for (dirent, name) in &entries {
            cookie = dirent.d_next;
            if *name != b"." && *name != b".." {
                names.push(String::from_utf8_lossy(name).into_owned());
            }
        }
        if n < buf.len() || entries.is_empty() {
            break;
        }
    }
    fd_close(&sandbox.curfds, &sandbox.prestats, fd)?;

    names.sort();
    for name in names {
        println!("{}", name);
    }
    Ok(())
}

pub fn cat(sandbox: &Sandbox, path: &str) -> Result<()> {
    let fd = open(sandbox, path, Oflags::empty(), Rights::FD_READ)?;
    let mut buf = vec![0u8; COPY_BUF];
    loop {
        let n = fd_read(&sandbox.curfds, fd, &mut [IoSliceMut::new(&mut buf)])
            .with_context(|| format!("{}: read", path))?;
        if n == 0 {
            break;
        }
        let mut chunk = &buf[..n];
        while !chunk.is_empty() {
            let written = fd_write(&sandbox.curfds, STDOUT, &[IoSlice::new(chunk)])
                .context("stdout: write")?;
            chunk = &chunk[written..];
        }
    }
    fd_close(&sandbox.curfds, &sandbox.prestats, fd)?;
    Ok(())
}

fn stat_json(path: &str, st: &Filestat) -> serde_json::Value {
    serde_json::json!({
        "path": path,
        "type": filetype_name(st.st_filetype),
        "dev": st.st_dev,
        "ino": st.st_ino,
        "nlink": st.st_nlink,
        "size": st.st_size,
        "atim": st.st_atim,
        "mtim": st.st_mtim,
        "ctim": st.st_ctim,
    })
}

pub fn stat(sandbox: &Sandbox, path: &str, json: bool) -> Result<()> {
    let (dir, rel) = resolve(sandbox, path)?;
    let st = path_filestat_get(&sandbox.curfds, dir, Lookupflags::SYMLINK_FOLLOW, rel.as_bytes())
        .with_context(|| format!("{}: stat", path))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&stat_json(path, &st))?);
    } else {
        println!("  File: {}", path);
        println!("  Type: {}", filetype_name(st.st_filetype));
        println!("  Size: {}", st.st_size);
        println!(" Inode: {}  Links: {}", st.st_ino, st.st_nlink);
        println!("Modify: {}", st.st_mtim);
    }
    Ok(())
}

pub fn readlink(sandbox: &Sandbox, path: &str) -> Result<()> {
    let (dir, rel) = resolve(sandbox, path)?;
    let mut buf = vec![0u8; 4096];
    let n = path_readlink(&sandbox.curfds, dir, rel.as_bytes(), &mut buf)
        .with_context(|| format!("{}: readlink", path))?;
    println!("{}", String::from_utf8_lossy(&buf[..n]));
    Ok(())
}

pub fn mkdir(sandbox: &Sandbox, path: &str) -> Result<()> {
    let (dir, rel) = resolve(sandbox, path)?;
    path_create_directory(&sandbox.curfds, dir, rel.as_bytes())
        .with_context(|| format!("{}: mkdir", path))?;
    log_cli_info!("Created directory", path = path);
    Ok(())
}

pub fn rm(sandbox: &Sandbox, path: &str, directory: bool) -> Result<()> {
    let (dir, rel) = resolve(sandbox, path)?;
    if directory {
        path_remove_directory(&sandbox.curfds, dir, rel.as_bytes())
            .with_context(|| format!("{}: rmdir", path))?;
    } else {
        path_unlink_file(&sandbox.curfds, dir, rel.as_bytes())
            .with_context(|| format!("{}: unlink", path))?;
    }
    log_cli_info!("Removed", path = path, directory = directory);
    Ok(())
}

pub fn sleep(sandbox: &Sandbox, millis: u64) -> Result<()> {
    let sub = Subscription::clock(
        0,
        SubscriptionClock {
            clock_id: Clockid::Monotonic as u32,
            timeout: millis.saturating_mul(1_000_000),
            ..Default::default()
        },
    );
    let mut events = [Event::default(); 1];
    poll_oneoff(&sandbox.curfds, &[sub], &mut events).context("poll_oneoff")?;
    match events[0].errno() {
        Errno::Success => Ok(()),
        errno => Err(errno).context("clock subscription"),
    }
}

pub fn preopens(sandbox: &Sandbox) -> Result<()> {
    for (fd, _) in sandbox.prestats.list() {
        let prestat = fd_prestat_get(&sandbox.prestats, fd)?;
        let mut name = vec![0u8; prestat.pr_name_len as usize];
        fd_prestat_dir_name(&sandbox.prestats, fd, &mut name)?;
        println!("{}\t{}", fd, String::from_utf8_lossy(&name));
    }
    Ok(())
}
