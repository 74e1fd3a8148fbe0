//! Message I/O and shutdown on already-connected sockets.

use tracing::trace;

use crate::errno::Errno;
use crate::fd_table::FdTable;
use crate::sys;
use crate::types::{Ciovec, Fd, Iovec, Riflags, Rights, Roflags, Sdflags};
use crate::Result;

fn zeroed_msghdr() -> libc::msghdr {
    // SAFETY: msghdr is plain data; all-zero is a valid empty header.
    unsafe { std::mem::zeroed() }
}

/// Returns `(bytes_received, roflags)`.
pub fn sock_recv(
    curfds: &FdTable,
    sock: Fd,
    ri_data: &mut [Iovec<'_>],
    ri_flags: Riflags,
) -> Result<(usize, Roflags)> {
    trace!(
        "sock_recv(sock={:?}, ri_data_len={}, ri_flags={:?})",
        sock,
        ri_data.len(),
        ri_flags
    );
    let mut hdr = zeroed_msghdr();
    hdr.msg_iov = ri_data.as_mut_ptr().cast::<libc::iovec>();
    hdr.msg_iovlen = ri_data.len() as _;

    let mut nflags = 0;
    if ri_flags.contains(Riflags::RECV_PEEK) {
        nflags |= libc::MSG_PEEK;
    }
    if ri_flags.contains(Riflags::RECV_WAITALL) {
        nflags |= libc::MSG_WAITALL;
    }

    let object = curfds.get(sock, Rights::FD_READ, Rights::empty())?;
    // SAFETY: `hdr` points at `ri_data`, which outlives the call.
    let n = sys::cvt_size(unsafe { libc::recvmsg(object.number(), &mut hdr, nflags) })?;

    let mut ro_flags = Roflags::empty();
    if hdr.msg_flags & libc::MSG_TRUNC != 0 {
        ro_flags |= Roflags::RECV_DATA_TRUNCATED;
    }
    trace!("     | *ro_datalen={:?}", n);
    Ok((n, ro_flags))
}

pub fn sock_send(curfds: &FdTable, sock: Fd, si_data: &[Ciovec<'_>]) -> Result<usize> {
    trace!("sock_send(sock={:?}, si_data_len={})", sock, si_data.len());
    let mut hdr = zeroed_msghdr();
    hdr.msg_iov = si_data.as_ptr().cast::<libc::iovec>().cast_mut();
    hdr.msg_iovlen = si_data.len() as _;

    let object = curfds.get(sock, Rights::FD_WRITE, Rights::empty())?;
    // SAFETY: sendmsg only reads through `msg_iov`.
    let n = sys::cvt_size(unsafe { libc::sendmsg(object.number(), &hdr, 0) })?;
    trace!("     | *so_datalen={:?}", n);
    Ok(n)
}

/// `how` is the raw wire value; it must name at least one direction.
pub fn sock_shutdown(curfds: &FdTable, sock: Fd, how: u8) -> Result<()> {
    trace!("sock_shutdown(sock={:?}, how={:#x})", sock, how);
    let how = match Sdflags::from_bits(how) {
        Some(f) if f == Sdflags::RD => libc::SHUT_RD,
        Some(f) if f == Sdflags::WR => libc::SHUT_WR,
        Some(f) if f == Sdflags::RD | Sdflags::WR => libc::SHUT_RDWR,
        _ => return Err(Errno::Inval),
    };
    let object = curfds.get(sock, Rights::SOCK_SHUTDOWN, Rights::empty())?;
    // SAFETY: plain syscall on a descriptor we hold a reference to.
    sys::cvt(unsafe { libc::shutdown(object.number(), how) })?;
    Ok(())
}
