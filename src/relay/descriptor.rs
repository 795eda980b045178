//! Descriptor preparation before the pump takes over.

use std::io;
use std::mem;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};

use tracing::warn;

fn status_flags(fd: BorrowedFd<'_>) -> io::Result<libc::c_int> {
    // SAFETY: F_GETFL on a borrowed, open descriptor
    let flags = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFL) };
    if flags == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(flags)
}

fn set_status_flags(fd: BorrowedFd<'_>, flags: libc::c_int) -> io::Result<()> {
    // SAFETY: F_SETFL on a borrowed, open descriptor
    if unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFL, flags) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Puts `fd` in `O_NONBLOCK` mode, keeping its other status flags.
pub fn set_nonblocking(fd: BorrowedFd<'_>) -> io::Result<()> {
    let flags = status_flags(fd)?;
    if flags & libc::O_NONBLOCK != 0 {
        return Ok(());
    }
    set_status_flags(fd, flags | libc::O_NONBLOCK)
}

/// Puts a descriptor's status flags back the way they were when saved.
///
/// Status flags live on the open file description, so switching a dup of an
/// inherited stdin or stdout to non-blocking also changes it for the parent
/// shell. Keep one of these alive across the relay to undo that on return.
#[derive(Debug)]
pub struct StatusFlagsGuard {
    fd: OwnedFd,
    flags: libc::c_int,
}

impl StatusFlagsGuard {
    pub fn save(fd: BorrowedFd<'_>) -> io::Result<Self> {
        let flags = status_flags(fd)?;
        Ok(Self {
            fd: fd.try_clone_to_owned()?,
            flags,
        })
    }
}

impl Drop for StatusFlagsGuard {
    fn drop(&mut self) {
        if let Err(e) = set_status_flags(self.fd.as_fd(), self.flags) {
            warn!(error = %e, "unable to restore descriptor flags");
        }
    }
}

/// Asks the kernel for a receive buffer of `bytes` on a socket source.
///
/// Returns the size the kernel actually granted, or `None` when `fd` is not
/// a socket. The kernel may clamp the request to its own maximum.
pub fn grow_receive_buffer(fd: BorrowedFd<'_>, bytes: usize) -> io::Result<Option<usize>> {
    let raw = fd.as_raw_fd();
    let optval: libc::c_int = bytes.min(libc::c_int::MAX as usize) as libc::c_int;
    let optlen = mem::size_of::<libc::c_int>() as libc::socklen_t;

    // SAFETY: optval is a live c_int of the advertised length
    let rc = unsafe {
        libc::setsockopt(
            raw,
            libc::SOL_SOCKET,
            libc::SO_RCVBUF,
            &optval as *const _ as *const libc::c_void,
            optlen,
        )
    };
    if rc == -1 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ENOTSOCK) {
            return Ok(None);
        }
        return Err(err);
    }

    let mut granted: libc::c_int = 0;
    let mut len = optlen;
    // SAFETY: granted/len are live and sized for SO_RCVBUF
    let rc = unsafe {
        libc::getsockopt(
            raw,
            libc::SOL_SOCKET,
            libc::SO_RCVBUF,
            &mut granted as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(Some(granted.max(0) as usize))
}
