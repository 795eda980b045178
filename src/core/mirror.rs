//! Backing memory for the byte ring
//!
//! The ring wants to hand out one contiguous slice no matter where its
//! cursors sit. Two layouts provide that:
//! - Mirrored: one shared memory object mapped twice back-to-back, so offset
//!   `capacity + i` is the same physical byte as `i`. No copies, ever.
//! - Flat: one anonymous region of `2 * capacity` bytes. The upper half is
//!   kept in step with the lower half by copying on commit, only for bytes
//!   that land on the far side of the wrap.

use std::fmt;
use std::io;
use std::ptr;
use std::str::FromStr;

use memmap2::MmapMut;

use crate::error::InitError;

/// Largest capacity a ring may have. Cursors are `u32`, so outstanding bytes
/// must fit in 31 bits for `end - start` to stay unambiguous.
pub const MAX_CAPACITY: usize = 1 << 31;

/// How the ring's memory is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackingKind {
    /// Two virtual views of one physical region.
    Mirrored,
    /// A single region with explicit wrap copies.
    Flat,
}

impl BackingKind {
    /// Best layout available on this platform.
    pub fn preferred() -> Self {
        if cfg!(any(target_os = "linux", target_os = "android")) {
            Self::Mirrored
        } else {
            Self::Flat
        }
    }

    /// True when this layout is a step down from what the platform offers.
    pub fn is_fallback(self) -> bool {
        self != Self::preferred()
    }
}

impl Default for BackingKind {
    fn default() -> Self {
        Self::preferred()
    }
}

impl fmt::Display for BackingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mirrored => f.write_str("mirrored"),
            Self::Flat => f.write_str("flat"),
        }
    }
}

impl FromStr for BackingKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mirrored" => Ok(Self::Mirrored),
            "flat" => Ok(Self::Flat),
            other => Err(format!("unknown backing `{other}', expected `mirrored' or `flat'")),
        }
    }
}

/// Page size of the running system.
pub fn page_size() -> Result<usize, InitError> {
    // SAFETY: sysconf has no memory-safety preconditions
    let rc = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if rc <= 0 {
        return Err(InitError::PageSize(io::Error::last_os_error()));
    }
    Ok(rc as usize)
}

/// Rounds `hint` up to a power-of-two number of pages.
///
/// A zero hint still yields one page. Requests beyond [`MAX_CAPACITY`], or
/// whose doubled size would not fit the address space, are rejected.
pub fn capacity_for(hint: usize, page_size: usize) -> Result<usize, InitError> {
    debug_assert!(page_size.is_power_of_two());
    let too_large = || InitError::CapacityTooLarge { hint };

    let pages = hint
        .div_ceil(page_size)
        .max(1)
        .checked_next_power_of_two()
        .ok_or_else(too_large)?;
    let capacity = pages.checked_mul(page_size).ok_or_else(too_large)?;

    if capacity > MAX_CAPACITY || capacity.checked_mul(2).is_none() {
        return Err(too_large());
    }
    Ok(capacity)
}

/// Memory behind a ring of `capacity` bytes, addressable over `2 * capacity`.
pub(crate) enum Backing {
    Mirrored(MirrorMap),
    Flat(MmapMut),
}

impl Backing {
    pub(crate) fn map(kind: BackingKind, capacity: usize) -> Result<Self, InitError> {
        debug_assert!(capacity.is_power_of_two() && capacity <= MAX_CAPACITY);
        match kind {
            BackingKind::Mirrored => MirrorMap::new(capacity).map(Self::Mirrored),
            BackingKind::Flat => MmapMut::map_anon(capacity * 2)
                .map(Self::Flat)
                .map_err(|e| InitError::map("anonymous region", e)),
        }
    }

    pub(crate) fn kind(&self) -> BackingKind {
        match self {
            Self::Mirrored(_) => BackingKind::Mirrored,
            Self::Flat(_) => BackingKind::Flat,
        }
    }

    #[inline(always)]
    pub(crate) fn as_ptr(&self) -> *const u8 {
        match self {
            Self::Mirrored(m) => m.base as *const u8,
            Self::Flat(m) => m.as_ptr(),
        }
    }

    #[inline(always)]
    pub(crate) fn as_mut_ptr(&mut self) -> *mut u8 {
        match self {
            Self::Mirrored(m) => m.base,
            Self::Flat(m) => m.as_mut_ptr(),
        }
    }

    /// Makes `len` bytes just written at physical `offset` visible through
    /// both halves. `drain_offset` is the masked drain cursor at commit time.
    ///
    /// Only the flat layout has work to do:
    /// - bytes written past `capacity` are copied down to their home offset;
    /// - bytes written below `drain_offset` (the ring is wrapped) are copied
    ///   up, since a drain window starting at `drain_offset` reads them
    ///   through the upper half.
    #[inline]
    pub(crate) fn sync_ingest(
        &mut self,
        offset: usize,
        len: usize,
        drain_offset: usize,
        capacity: usize,
    ) {
        let Self::Flat(map) = self else {
            return;
        };
        let base = map.as_mut_ptr();
        let end = offset + len;

        if end > capacity {
            let from = offset.max(capacity);
            // SAFETY: [from, end) lies in the upper half and [from - capacity,
            // end - capacity) in the lower half; both inside the 2x region.
            unsafe {
                ptr::copy_nonoverlapping(base.add(from), base.add(from - capacity), end - from);
            }
        }

        if offset < drain_offset {
            // Wrapped: the free span is [offset, drain_offset), so end <= capacity.
            // SAFETY: source in the lower half, destination in the upper half.
            unsafe {
                ptr::copy_nonoverlapping(base.add(offset), base.add(offset + capacity), len);
            }
        }
    }
}

/// Two adjacent shared mappings of one memory object.
///
/// Owns the whole `2 * capacity` address range from the moment it is
/// reserved, so a failure half-way through setup still unmaps everything.
pub(crate) struct MirrorMap {
    base: *mut u8,
    len: usize,
}

// SAFETY: the mapping is exclusively owned; nothing else holds its address.
unsafe impl Send for MirrorMap {}

#[cfg(any(target_os = "linux", target_os = "android"))]
impl MirrorMap {
    fn new(capacity: usize) -> Result<Self, InitError> {
        use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

        let len = capacity * 2;

        // SAFETY: the name is NUL-terminated and outlives the call
        let fd = unsafe { libc::memfd_create(b"pcap-relay-ring\0".as_ptr().cast(), libc::MFD_CLOEXEC) };
        if fd == -1 {
            return Err(InitError::map("memfd_create", io::Error::last_os_error()));
        }
        // SAFETY: memfd_create just returned this descriptor to us
        let memfd = unsafe { OwnedFd::from_raw_fd(fd) };

        // SAFETY: valid descriptor, capacity <= 2^31 fits off_t
        if unsafe { libc::ftruncate(memfd.as_raw_fd(), capacity as libc::off_t) } == -1 {
            return Err(InitError::map("ftruncate", io::Error::last_os_error()));
        }

        // Reserve the full range first so the two views land back-to-back.
        // SAFETY: anonymous PROT_NONE mapping at a kernel-chosen address
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(InitError::map("reserve", io::Error::last_os_error()));
        }
        let map = Self {
            base: base.cast(),
            len,
        };

        for half in 0..2 {
            // SAFETY: each view replaces half of the reservation we own
            let view = unsafe {
                libc::mmap(
                    map.base.add(half * capacity).cast(),
                    capacity,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_SHARED | libc::MAP_FIXED,
                    memfd.as_raw_fd(),
                    0,
                )
            };
            if view == libc::MAP_FAILED {
                return Err(InitError::map("mirror view", io::Error::last_os_error()));
            }
        }

        // The views keep the memory object alive; memfd closes on return.
        Ok(map)
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
impl MirrorMap {
    fn new(_capacity: usize) -> Result<Self, InitError> {
        Err(InitError::Unsupported)
    }
}

impl Drop for MirrorMap {
    fn drop(&mut self) {
        if self.base.is_null() {
            return;
        }
        // SAFETY: base/len describe exactly the range reserved in `new`
        unsafe {
            libc::munmap(self.base.cast(), self.len);
        }
        self.base = ptr::null_mut();
    }
}
