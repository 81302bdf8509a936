//! Per-process descriptor table.
//!
//! A descriptor is a table slot that may reference one kernel object, with
//! a small state machine of its own: `Free` (unused) -> `Reserved`
//! (claimed, about to be installed) -> `Open` (referencing an object) ->
//! `Destroyed` (the object it referenced was destroyed out from under it;
//! discovered lazily, on the next `dereference`). `Reserved` exists so that
//! installing a descriptor is two steps — claim the slot, then fill it —
//! with no window where a concurrent `dereference` of the same fd can see
//! a half-built entry.

use alloc::vec::Vec;
use spin::Mutex;

use crate::lib::error::Errno;

use super::endpoint::Endpoint;
use super::process::Process;
use super::thread::Thread;
use super::{ObjRef, Object, Permissions};

/// Number of descriptor slots per process.
pub const DESC_TABLE_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DescriptorState {
    Free,
    Reserved,
    Open,
    Destroyed,
}

#[derive(Clone)]
pub struct Descriptor {
    state: DescriptorState,
    object: Option<Object>,
    permissions: Permissions,
    cookie: usize,
}

impl Descriptor {
    const fn free() -> Self {
        Self {
            state: DescriptorState::Free,
            object: None,
            permissions: Permissions::empty(),
            cookie: 0,
        }
    }

    pub fn object(&self) -> Option<&Object> {
        self.object.as_ref()
    }

    pub fn permissions(&self) -> Permissions {
        self.permissions
    }

    pub fn cookie(&self) -> usize {
        self.cookie
    }

    pub fn is_owner(&self) -> bool {
        self.permissions.contains(Permissions::OWNER)
    }

    fn is_free(&self) -> bool {
        self.state == DescriptorState::Free
    }

    fn is_reserved(&self) -> bool {
        self.state == DescriptorState::Reserved
    }

    fn is_open(&self) -> bool {
        self.state == DescriptorState::Open
    }

    fn is_closeable(&self) -> bool {
        matches!(self.state, DescriptorState::Open | DescriptorState::Destroyed)
    }
}

impl Object {
    pub fn as_process(&self) -> Option<&ObjRef<Process>> {
        match self {
            Object::Process(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_thread(&self) -> Option<&ObjRef<Thread>> {
        match self {
            Object::Thread(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_endpoint(&self) -> Option<&ObjRef<Endpoint>> {
        match self {
            Object::Endpoint(e) => Some(e),
            _ => None,
        }
    }
}

pub struct DescriptorTable {
    entries: Mutex<Vec<Descriptor>>,
}

impl DescriptorTable {
    pub fn new() -> Self {
        let entries = (0..DESC_TABLE_SIZE).map(|_| Descriptor::free()).collect();
        Self { entries: Mutex::new(entries) }
    }

    /// Looks up an object by descriptor, checking the descriptor is open
    /// and the object behind it hasn't been destroyed. Returns a cloned
    /// `Object` handle carrying its own reference-count contribution; the
    /// caller must drop it when done to release that reference.
    ///
    /// A descriptor whose object was destroyed out from under it is
    /// transitioned to `Destroyed` here, on first discovery, and the
    /// object's `close` hook runs as if the descriptor had been closed —
    /// this is the lazy cleanup path every other accessor relies on.
    pub fn dereference(&self, fd: usize) -> Result<Object, Errno> {
        if fd >= DESC_TABLE_SIZE {
            return Err(Errno::EBADF);
        }
        let mut entries = self.entries.lock();
        let desc = &mut entries[fd];

        if desc.state == DescriptorState::Destroyed {
            return Err(Errno::EIO);
        }
        if !desc.is_open() {
            return Err(Errno::EBADF);
        }

        let object = desc.object.as_ref().expect("open descriptor with no object").clone();
        if object.is_destroyed() {
            let permissions = desc.permissions;
            let cookie = desc.cookie;
            let closed = desc.object.take().expect("open descriptor with no object");
            desc.state = DescriptorState::Destroyed;
            drop(entries);
            closed.close(&Descriptor { state: DescriptorState::Destroyed, object: None, permissions, cookie });
            return Err(Errno::EIO);
        }

        Ok(object)
    }

    /// Looks up `fd` the same way [`dereference`](Self::dereference) does,
    /// additionally requiring the descriptor carry every bit in `required`
    /// — `EPERM` if not, checked after the `EBADF`/`EIO` checks so a bad or
    /// dead descriptor never gets reported as a permission failure. Hands
    /// back the cookie attributed to `fd` itself; syscalls that act on the
    /// sending side of IPC read their own descriptor's cookie this way
    /// rather than the receiver's.
    pub fn dereference_checked(&self, fd: usize, required: Permissions) -> Result<(Object, usize), Errno> {
        let (object, permissions, cookie) = self.dereference_full(fd)?;
        if !permissions.contains(required) {
            return Err(Errno::EPERM);
        }
        Ok((object, cookie))
    }

    /// Looks up a descriptor's object, permissions, and cookie together,
    /// for callers (`mint`, `dup`, `dereference_checked`) that need all
    /// three without a second table walk.
    fn dereference_full(&self, fd: usize) -> Result<(Object, Permissions, usize), Errno> {
        if fd >= DESC_TABLE_SIZE {
            return Err(Errno::EBADF);
        }
        let entries = self.entries.lock();
        let desc = &entries[fd];
        if desc.state == DescriptorState::Destroyed {
            return Err(Errno::EIO);
        }
        if !desc.is_open() {
            return Err(Errno::EBADF);
        }
        let object = desc.object.as_ref().expect("open descriptor with no object").clone();
        let permissions = desc.permissions;
        let cookie = desc.cookie;
        drop(entries);

        if object.is_destroyed() {
            return Err(Errno::EIO);
        }
        Ok((object, permissions, cookie))
    }

    pub fn reserve(&self, fd: usize) -> Result<(), Errno> {
        if fd >= DESC_TABLE_SIZE {
            return Err(Errno::EBADF);
        }
        let mut entries = self.entries.lock();
        if !entries[fd].is_free() {
            return Err(Errno::EBADF);
        }
        entries[fd].state = DescriptorState::Reserved;
        Ok(())
    }

    pub fn free_reserved(&self, fd: usize) {
        let mut entries = self.entries.lock();
        debug_assert!(entries[fd].is_reserved());
        entries[fd] = Descriptor::free();
    }

    /// Installs `object` into a previously reserved slot and runs its
    /// `open` hook. The hook runs after the table lock is released, same
    /// as every other object-hook call site in this module.
    pub fn open(&self, fd: usize, object: Object, permissions: Permissions, cookie: usize) {
        {
            let mut entries = self.entries.lock();
            debug_assert!(entries[fd].is_reserved());
            entries[fd] = Descriptor { state: DescriptorState::Open, object: Some(object.clone()), permissions, cookie };
        }
        let opened = Descriptor { state: DescriptorState::Open, object: None, permissions, cookie };
        object.open(&opened);
    }

    /// Closes `fd`: removes it from the table and, if it was open, runs
    /// the object's `close` hook before the table's reference to the
    /// object is dropped.
    pub fn close(&self, fd: usize) -> Result<(), Errno> {
        if fd >= DESC_TABLE_SIZE {
            return Err(Errno::EBADF);
        }
        let mut entries = self.entries.lock();
        if !entries[fd].is_closeable() {
            return Err(Errno::EBADF);
        }
        let closed = core::mem::replace(&mut entries[fd], Descriptor::free());
        drop(entries);

        if let Some(object) = &closed.object {
            object.close(&closed);
        }
        Ok(())
    }

    /// Destroys the object referenced by `fd`, without touching the
    /// descriptor itself. A later access through any descriptor pointing
    /// at the same object observes it destroyed via `dereference`'s lazy
    /// `EIO` path.
    pub fn destroy_referenced(&self, fd: usize) -> Result<(), Errno> {
        let object = self.dereference(fd)?;
        object.destroy();
        drop(object);
        Ok(())
    }

    /// Duplicates `fd` into `new_fd` within the same table, preserving
    /// permissions and cookie.
    pub fn dup(&self, fd: usize, new_fd: usize) -> Result<(), Errno> {
        let (object, permissions, cookie) = self.dereference_full(fd)?;
        self.reserve(new_fd)?;
        self.open(new_fd, object, permissions, cookie);
        Ok(())
    }

    /// Closes every currently open descriptor, running each referenced
    /// object's `close` hook. Used when a process is destroyed.
    pub fn close_all(&self) {
        let closed: Vec<Descriptor> = {
            let mut entries = self.entries.lock();
            entries
                .iter_mut()
                .filter(|d| d.is_open())
                .map(|d| core::mem::replace(d, Descriptor::free()))
                .collect()
        };
        for desc in &closed {
            if let Some(object) = &desc.object {
                object.close(desc);
            }
        }
    }
}

/// Installs a possibly-attenuated copy of the object behind `owner_fd` at
/// `target_fd` in `target_process`. `owner_fd` must carry the `OWNER` bit
/// and `perms` must be a non-empty subset of the object's full permission
/// set; minting broader permissions than the owner descriptor itself holds
/// is rejected with `EINVAL`, not silently clamped.
pub fn mint(
    current: &Process,
    owner_fd: usize,
    target_process_fd: usize,
    target_fd: usize,
    perms: Permissions,
    cookie: usize,
) -> Result<(), Errno> {
    let (owner_object, owner_perms, _) = current.descriptors().dereference_full(owner_fd)?;

    let all_perms = owner_object.all_permissions();
    if !all_perms.contains(perms) || perms.is_empty() {
        return Err(Errno::EINVAL);
    }
    if !owner_perms.contains(Permissions::OWNER) {
        return Err(Errno::EPERM);
    }

    let (target_process_object, target_process_perms, _) =
        current.descriptors().dereference_full(target_process_fd)?;
    let target_process = target_process_object.as_process().ok_or(Errno::EBADF)?;
    if !target_process_perms.contains(Permissions::OPEN) {
        return Err(Errno::EPERM);
    }

    target_process.descriptors().reserve(target_fd)?;
    target_process.descriptors().open(target_fd, owner_object, perms, cookie);
    Ok(())
}
