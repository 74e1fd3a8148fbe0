//! `poll_oneoff`: wait on clocks and descriptor readiness.

use tracing::{trace, warn};

use crate::errno::{convert_errno, Errno};
use crate::fd_object::FdObjectRef;
use crate::fd_table::FdTable;
use crate::types::{
    Clockid, Event, EventFdReadwrite, Eventrwflags, Eventtype, Filesize, Rights, Subclockflags,
    Subscription, SubscriptionClock, Userdata,
};
use crate::Result;

fn event(userdata: Userdata, error: Errno, event_type: u8) -> Event {
    Event {
        userdata,
        error: error.raw(),
        event_type,
        fd_readwrite: EventFdReadwrite::default(),
    }
}

/// Wait for any of `subscriptions` and describe what happened in `events`.
///
/// Returns the number of events written. `events` must have room for one
/// event per subscription.
pub fn poll_oneoff(
    curfds: &FdTable,
    subscriptions: &[Subscription],
    events: &mut [Event],
) -> Result<usize> {
    trace!(
        "poll_oneoff(nsubscriptions={}, events_len={})",
        subscriptions.len(),
        events.len()
    );
    if subscriptions.is_empty() || events.len() < subscriptions.len() {
        return Err(Errno::Inval);
    }

    if let [only] = subscriptions {
        if let Some(clock) = only.clock_contents() {
            events[0] = event(only.userdata, Errno::Success, Eventtype::Clock as u8);
            if let Err(e) = clock_sleep(&clock) {
                events[0].error = e.raw();
            }
            trace!("     | *nevents=1");
            return Ok(1);
        }
    }

    let nevents = poll_general(curfds, subscriptions, events)?;
    trace!("     | *nevents={:?}", nevents);
    Ok(nevents)
}

fn poll_general(
    curfds: &FdTable,
    subscriptions: &[Subscription],
    events: &mut [Event],
) -> Result<usize> {
    // Acquire every descriptor under one read lock; the lock is gone
    // before poll() blocks.
    let mut lookups = curfds
        .get_many(
            subscriptions
                .iter()
                .filter_map(|s| s.fd_readwrite_contents())
                .map(|rw| (rw.file_descriptor, Rights::POLL_FD_READWRITE)),
        )
        .into_iter();

    let mut objects: Vec<Option<FdObjectRef>> = Vec::with_capacity(subscriptions.len());
    let mut pfds: Vec<libc::pollfd> = Vec::with_capacity(subscriptions.len());
    let mut clock_subscription: Option<(Userdata, SubscriptionClock)> = None;
    let mut nevents = 0;

    let unused = libc::pollfd {
        fd: -1,
        events: 0,
        revents: 0,
    };

    for s in subscriptions {
        let tag = s.tag();
        if s.fd_readwrite_contents().is_some() {
            match lookups.next().unwrap_or(Err(Errno::Badf)) {
                Ok(object) => {
                    pfds.push(libc::pollfd {
                        fd: object.number(),
                        events: if tag == Eventtype::FdRead as u8 {
                            libc::POLLRDNORM
                        } else {
                            libc::POLLWRNORM
                        },
                        revents: 0,
                    });
                    objects.push(Some(object));
                }
                Err(e) => {
                    pfds.push(unused);
                    objects.push(None);
                    events[nevents] = event(s.userdata, e, tag);
                    nevents += 1;
                }
            }
            continue;
        }

        pfds.push(unused);
        objects.push(None);
        match s.clock_contents() {
            Some(clock)
                if clock_subscription.is_none()
                    && !Subclockflags::from_bits_truncate(clock.flags)
                        .contains(Subclockflags::SUBSCRIPTION_CLOCK_ABSTIME) =>
            {
                clock_subscription = Some((s.userdata, clock));
            }
            _ => {
                // Absolute clocks, extra clocks and unknown tags.
                events[nevents] = event(s.userdata, Errno::Nosys, tag);
                nevents += 1;
            }
        }
    }

    let timeout = if nevents != 0 {
        0
    } else if let Some((_, clock)) = &clock_subscription {
        let ms = clock.timeout / 1_000_000;
        libc::c_int::try_from(ms).unwrap_or(-1)
    } else {
        -1
    };

    // SAFETY: `pfds` holds `len` initialized entries.
    let ret = unsafe { libc::poll(pfds.as_mut_ptr(), pfds.len() as libc::nfds_t, timeout) };
    if ret == -1 {
        return Err(Errno::last());
    }

    if ret == 0 && nevents == 0 {
        if let Some((userdata, _)) = clock_subscription {
            events[nevents] = event(userdata, Errno::Success, Eventtype::Clock as u8);
            nevents += 1;
        }
        return Ok(nevents);
    }

    for (s, pfd) in subscriptions.iter().zip(&pfds) {
        if pfd.fd < 0 {
            continue;
        }
        let tag = s.tag();
        let nbytes = if tag == Eventtype::FdRead as u8 {
            readable_bytes(pfd.fd)
        } else {
            0
        };
        let revents = pfd.revents;
        let ev = if revents & libc::POLLNVAL != 0 {
            event(s.userdata, Errno::Badf, tag)
        } else if revents & libc::POLLERR != 0 {
            event(s.userdata, Errno::Io, tag)
        } else if revents & libc::POLLHUP != 0 {
            Event {
                fd_readwrite: EventFdReadwrite {
                    nbytes,
                    flags: Eventrwflags::FD_READWRITE_HANGUP.bits(),
                },
                ..event(s.userdata, Errno::Success, tag)
            }
        } else if revents & (libc::POLLRDNORM | libc::POLLWRNORM) != 0 {
            Event {
                fd_readwrite: EventFdReadwrite { nbytes, flags: 0 },
                ..event(s.userdata, Errno::Success, tag)
            }
        } else {
            continue;
        };
        events[nevents] = ev;
        nevents += 1;
    }

    drop(objects);
    Ok(nevents)
}

/// Bytes available to read, as a hint. Zero if unknown.
fn readable_bytes(fd: libc::c_int) -> Filesize {
    let mut n: libc::c_int = 0;
    // SAFETY: FIONREAD writes one int.
    if unsafe { libc::ioctl(fd, libc::FIONREAD as _, &mut n) } == 0 {
        Filesize::try_from(n).unwrap_or(0)
    } else {
        0
    }
}

fn clock_sleep(clock: &SubscriptionClock) -> Result<()> {
    let Ok(clock_id) = Clockid::try_from(clock.clock_id) else {
        return Err(Errno::Notsup);
    };
    let abstime = Subclockflags::from_bits_truncate(clock.flags)
        .contains(Subclockflags::SUBSCRIPTION_CLOCK_ABSTIME);
    sleep_until(clock_id, clock.timeout, abstime)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn sleep_until(clock_id: Clockid, timeout: u64, abstime: bool) -> Result<()> {
    let ts = crate::sys::convert_timestamp(timeout);
    let flags = if abstime { libc::TIMER_ABSTIME } else { 0 };
    // SAFETY: `ts` is a valid timespec; no remainder is requested.
    let ret = unsafe {
        libc::clock_nanosleep(
            crate::sys::convert_clockid(clock_id),
            flags,
            &ts,
            std::ptr::null_mut(),
        )
    };
    if ret != 0 {
        warn!("clock_nanosleep({:?}) failed: {}", clock_id, ret);
        return Err(convert_errno(ret));
    }
    Ok(())
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn sleep_until(clock_id: Clockid, timeout: u64, abstime: bool) -> Result<()> {
    use crate::locking::{Cond, Mutex};

    match (clock_id, abstime) {
        (Clockid::Monotonic, true) => Err(Errno::Nosys),
        (Clockid::Realtime, true) => {
            // No absolute sleep primitive; wait out a condition variable.
            let mutex = Mutex::new(());
            let cond = Cond::new();
            drop(cond.wait_until_realtime(mutex.lock(), timeout));
            Ok(())
        }
        (Clockid::Monotonic | Clockid::Realtime, false) => {
            let ts = crate::sys::convert_timestamp(timeout);
            // SAFETY: `ts` is a valid timespec; no remainder is requested.
            crate::sys::cvt(unsafe { libc::nanosleep(&ts, std::ptr::null_mut()) })?;
            Ok(())
        }
        _ => {
            warn!("cannot sleep on {:?}", clock_id);
            Err(Errno::Notsup)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Filetype;
    use std::time::{Duration, Instant};

    fn relative(userdata: Userdata, ns: u64) -> Subscription {
        Subscription::clock(
            userdata,
            SubscriptionClock {
                clock_id: Clockid::Monotonic as u32,
                timeout: ns,
                ..Default::default()
            },
        )
    }

    fn pipe_handle(table: &FdTable) -> (u32, libc::c_int) {
        let mut fds = [0; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        let obj = FdObjectRef::new(Filetype::SocketStream, fds[0]);
        let fd = table
            .insert(obj, Rights::FD_READ | Rights::POLL_FD_READWRITE, Rights::empty())
            .unwrap();
        (fd, fds[1])
    }

    #[test]
    fn test_no_subscriptions() {
        let table = FdTable::new();
        let mut events = [Event::default(); 1];
        assert_eq!(poll_oneoff(&table, &[], &mut events).unwrap_err(), Errno::Inval);
    }

    #[test]
    fn test_clock_only_zero_timeout() {
        let table = FdTable::new();
        let mut events = [Event::default(); 1];
        let n = poll_oneoff(&table, &[relative(42, 0)], &mut events).unwrap();
        assert_eq!(n, 1);
        assert_eq!(events[0].userdata, 42);
        assert_eq!(events[0].errno(), Errno::Success);
        assert_eq!(events[0].event_type, Eventtype::Clock as u8);
    }

    #[test]
    fn test_clock_only_sleeps() {
        let table = FdTable::new();
        let mut events = [Event::default(); 1];
        let start = Instant::now();
        poll_oneoff(&table, &[relative(1, 20_000_000)], &mut events).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_unknown_clock_reports_notsup() {
        let table = FdTable::new();
        let mut events = [Event::default(); 1];
        let sub = Subscription::clock(
            7,
            SubscriptionClock {
                clock_id: 99,
                ..Default::default()
            },
        );
        assert_eq!(poll_oneoff(&table, &[sub], &mut events).unwrap(), 1);
        assert_eq!(events[0].errno(), Errno::Notsup);
    }

    #[test]
    fn test_fd_read_ready() {
        let table = FdTable::new();
        let (fd, w) = pipe_handle(&table);
        assert_eq!(unsafe { libc::write(w, b"abc".as_ptr().cast(), 3) }, 3);

        let subs = [Subscription::fd_read(5, fd), relative(6, 1_000_000_000)];
        let mut events = [Event::default(); 2];
        let n = poll_oneoff(&table, &subs, &mut events).unwrap();
        assert_eq!(n, 1);
        assert_eq!(events[0].userdata, 5);
        assert_eq!(events[0].event_type, Eventtype::FdRead as u8);
        assert_eq!(events[0].fd_readwrite.nbytes, 3);
        crate::sys::close(w);
    }

    #[test]
    fn test_timeout_fires_clock_event() {
        let table = FdTable::new();
        let (fd, w) = pipe_handle(&table);
        let subs = [Subscription::fd_read(5, fd), relative(6, 10_000_000)];
        let mut events = [Event::default(); 2];
        let n = poll_oneoff(&table, &subs, &mut events).unwrap();
        assert_eq!(n, 1);
        assert_eq!(events[0].userdata, 6);
        assert_eq!(events[0].event_type, Eventtype::Clock as u8);
        crate::sys::close(w);
    }

    #[test]
    fn test_hangup() {
        let table = FdTable::new();
        let (fd, w) = pipe_handle(&table);
        crate::sys::close(w);
        let mut events = [Event::default(); 1];
        let n = poll_oneoff(&table, &[Subscription::fd_read(1, fd)], &mut events).unwrap();
        assert_eq!(n, 1);
        assert_eq!(
            events[0].fd_readwrite.flags,
            Eventrwflags::FD_READWRITE_HANGUP.bits()
        );
    }

    #[test]
    fn test_bad_handle_is_immediate_event() {
        let table = FdTable::new();
        let subs = [Subscription::fd_write(9, 1234), relative(2, 5_000_000_000)];
        let mut events = [Event::default(); 2];
        let start = Instant::now();
        let n = poll_oneoff(&table, &subs, &mut events).unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(n, 1);
        assert_eq!(events[0].userdata, 9);
        assert_eq!(events[0].errno(), Errno::Badf);
    }

    #[test]
    fn test_absolute_clock_in_general_path() {
        let table = FdTable::new();
        let (fd, w) = pipe_handle(&table);
        let abs = Subscription::clock(
            3,
            SubscriptionClock {
                clock_id: Clockid::Realtime as u32,
                flags: Subclockflags::SUBSCRIPTION_CLOCK_ABSTIME.bits(),
                ..Default::default()
            },
        );
        let mut events = [Event::default(); 2];
        let n = poll_oneoff(&table, &[Subscription::fd_read(1, fd), abs], &mut events).unwrap();
        assert_eq!(n, 1);
        assert_eq!(events[0].userdata, 3);
        assert_eq!(events[0].errno(), Errno::Nosys);
        crate::sys::close(w);
    }
}
