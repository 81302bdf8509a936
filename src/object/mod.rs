//! Kernel object model.
//!
//! Objects come in three kinds: [`process::Process`], [`thread::Thread`],
//! [`endpoint::Endpoint`]. Rather than a runtime table of function pointers
//! per kind (construct one, wire `open`/`close`/`destroy`/`free` into it,
//! hope every kind filled in the fields it needed), [`Object`] is a sum
//! type and the per-kind behavior is an exhaustive `match`: a kind that
//! forgets to handle a hook fails to compile, not segfaults at runtime.
//!
//! Reference counting mirrors the same add-ref/sub-ref/destroy/free chain
//! every kind shares, generalized once in [`ObjRef`] instead of repeated
//! per kind.

pub mod descriptor;
pub mod endpoint;
pub mod process;
pub mod thread;

use core::ops::Deref;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use bitflags::bitflags;

use self::descriptor::Descriptor;
use self::endpoint::Endpoint;
use self::process::Process;
use self::thread::Thread;

bitflags! {
    /// Permission bits, shared across every object kind. Which subset is
    /// meaningful for a given kind is `Object::all_permissions`; `OWNER` is
    /// orthogonal to all of them and gates `mint`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Permissions: u32 {
        const SEND          = 1 << 0;
        const RECEIVE       = 1 << 1;
        const CREATE_THREAD = 1 << 2;
        const MAP           = 1 << 3;
        const OPEN          = 1 << 4;
        const START         = 1 << 5;
        const JOIN          = 1 << 6;
        const OWNER         = 1 << 7;
    }
}

/// Embedded in every concrete object type. Tracks the reference count
/// [`ObjRef`] maintains and whether `destroy` has already run, independent
/// of whether the last reference has been dropped yet — an object can be
/// destroyed while descriptors in other processes still reference it.
pub struct ObjectHeader {
    ref_count: AtomicUsize,
    destroyed: AtomicBool,
}

impl ObjectHeader {
    pub const fn new() -> Self {
        Self {
            ref_count: AtomicUsize::new(1),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Marks the object destroyed. Returns `true` the first time this is
    /// called for a given object, `false` on every call after — callers use
    /// this to run their teardown exactly once.
    pub fn mark_destroyed(&self) -> bool {
        self.destroyed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Implemented by every concrete object type (`Process`, `Thread`,
/// `Endpoint`). `on_zero_refs` runs exactly once, when the last [`ObjRef`]
/// pointing at `this` is dropped: it must run `destroy` if it hasn't
/// already (an object can be freed without ever having been explicitly
/// destroyed) and then release the object's backing storage.
pub trait KernelObject {
    fn header(&self) -> &ObjectHeader;
    fn on_zero_refs(this: NonNull<Self>)
    where
        Self: Sized;
}

/// A reference-counted handle to a kernel object, generalizing the
/// add-ref/sub-ref/destroy/free chain every kind follows. Cloning
/// increments the embedded header's count; dropping the last clone frees
/// the object via `T::on_zero_refs`.
pub struct ObjRef<T: KernelObject>(NonNull<T>);

impl<T: KernelObject> ObjRef<T> {
    /// Wraps a freshly constructed object. The caller must have just built
    /// `ptr` with its header's ref count already at 1 (the count
    /// [`ObjectHeader::new`] starts at).
    ///
    /// # Safety
    /// `ptr` must point at a live, fully initialized `T` that no other
    /// `ObjRef` currently wraps.
    pub unsafe fn from_raw(ptr: NonNull<T>) -> Self {
        Self(ptr)
    }

    pub fn as_ptr(&self) -> NonNull<T> {
        self.0
    }

    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        a.0 == b.0
    }
}

impl<T: KernelObject> Deref for ObjRef<T> {
    type Target = T;
    fn deref(&self) -> &T {
        // Safety: a live ObjRef always holds a ref-count contribution, so
        // the pointee cannot have been freed.
        unsafe { self.0.as_ref() }
    }
}

impl<T: KernelObject> Clone for ObjRef<T> {
    fn clone(&self) -> Self {
        self.header().ref_count.fetch_add(1, Ordering::Relaxed);
        Self(self.0)
    }
}

impl<T: KernelObject> Drop for ObjRef<T> {
    fn drop(&mut self) {
        let prev = self.header().ref_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "object reference count underflowed");
        if prev == 1 {
            T::on_zero_refs(self.0);
        }
    }
}

// Safety: every field reachable through a `T: KernelObject` is behind its
// own lock; the header itself is only ever touched through atomics.
unsafe impl<T: KernelObject + Sync> Send for ObjRef<T> {}
unsafe impl<T: KernelObject + Sync> Sync for ObjRef<T> {}

/// The sum-type runtime object, one variant per kind.
#[derive(Clone)]
pub enum Object {
    Process(ObjRef<Process>),
    Thread(ObjRef<Thread>),
    Endpoint(ObjRef<Endpoint>),
}

impl Object {
    /// The permission bits meaningful for this object's kind. `mint`
    /// rejects any requested permission outside this mask.
    pub fn all_permissions(&self) -> Permissions {
        match self {
            Object::Process(_) => Permissions::CREATE_THREAD | Permissions::MAP | Permissions::OPEN,
            Object::Thread(_) => Permissions::START | Permissions::JOIN,
            Object::Endpoint(_) => Permissions::SEND | Permissions::RECEIVE,
        }
    }

    /// Runs when a descriptor referencing this object transitions to open.
    pub fn open(&self, desc: &Descriptor) {
        if let Object::Endpoint(ep) = self {
            if desc.permissions().contains(Permissions::RECEIVE) {
                ep.add_receiver();
            }
        }
    }

    /// Runs when an open descriptor referencing this object is closed.
    pub fn close(&self, desc: &Descriptor) {
        if let Object::Endpoint(ep) = self {
            if desc.permissions().contains(Permissions::RECEIVE) {
                ep.remove_receiver();
            }
        }
    }

    /// Marks the object destroyed and runs its kind-specific teardown.
    /// Idempotent: a second call on an already-destroyed object is a no-op.
    pub fn destroy(&self) {
        match self {
            Object::Process(p) => p.destroy(),
            Object::Thread(_) => {}
            Object::Endpoint(ep) => ep.destroy(),
        }
    }

    pub fn is_destroyed(&self) -> bool {
        match self {
            Object::Process(p) => p.header().is_destroyed(),
            Object::Thread(t) => t.header().is_destroyed(),
            Object::Endpoint(ep) => ep.header().is_destroyed(),
        }
    }
}
