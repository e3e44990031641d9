//! Binding foreign driver threads to the managed runtime for one callback.

use std::cell::Cell;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};

/// Kind of native thread entering the runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadRole {
    /// Buffer-ready thread. Fires every period and must not hold up runtime shutdown.
    Realtime,
    /// Notification thread. Infrequent, may block.
    Ordinary,
}

/// Outcome of a successful attach.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Attachment {
    /// The thread was already known to the runtime; nothing to undo.
    AlreadyAttached,
    /// This call bound the thread; it must be detached afterwards.
    Attached,
}

/// Runtime-specific failure code of an attach attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttachError(pub i32);

/// How the managed side reaches driver half-buffers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BufferAccess {
    /// Views over the driver's memory, no copies.
    #[default]
    Direct,
    /// Intermediate managed arrays copied in before and out after each upcall.
    Copy,
    /// Neither is available.
    Unsupported,
}

/// The managed runtime the upcalls run in.
pub trait ManagedRuntime: Send + Sync {
    /// Bind the calling native thread.
    fn attach_current_thread(&self, role: ThreadRole) -> Result<Attachment, AttachError>;
    /// Release the binding made by the matching `attach_current_thread`.
    fn detach_current_thread(&self);
    /// Buffer access capability, consulted once per configuration.
    fn buffer_access(&self) -> BufferAccess {
        BufferAccess::Direct
    }
}

/// Per-callback binding of the current thread. Never leaves the thread it was made on.
pub struct CallContext<'a> {
    role: ThreadRole,
    runtime: &'a dyn ManagedRuntime,
    _thread_bound: PhantomData<*const ()>,
}

impl<'a> CallContext<'a> {
    /// Role the thread was bound with.
    pub fn role(&self) -> ThreadRole {
        self.role
    }

    /// Runtime the thread is bound to.
    pub fn runtime(&self) -> &'a dyn ManagedRuntime {
        self.runtime
    }
}

struct DetachOnDrop<'a> {
    runtime: &'a dyn ManagedRuntime,
}

impl Drop for DetachOnDrop<'_> {
    fn drop(&mut self) {
        self.runtime.detach_current_thread();
    }
}

/// Run `body` with the calling thread bound to `runtime`.
///
/// Returns `None` without running `body` when the thread cannot be bound, and
/// `None` when `body` panics; neither escapes to the driver's thread. The thread
/// is detached afterwards only if this call attached it.
pub fn with_managed_context<R>(
    runtime: &dyn ManagedRuntime,
    role: ThreadRole,
    body: impl FnOnce(&CallContext<'_>) -> R,
) -> Option<R> {
    let attachment = runtime.attach_current_thread(role).ok()?;
    let _guard = match attachment {
        Attachment::Attached => Some(DetachOnDrop { runtime }),
        Attachment::AlreadyAttached => None,
    };
    let ctx = CallContext {
        role,
        runtime,
        _thread_bound: PhantomData,
    };
    panic::catch_unwind(AssertUnwindSafe(|| body(&ctx))).ok()
}

thread_local! {
    static DIRECT_ATTACHED: Cell<bool> = const { Cell::new(false) };
}

/// Runtime for Rust hosts: every thread can run upcalls and driver memory is
/// directly addressable.
#[derive(Clone, Copy, Debug, Default)]
pub struct DirectRuntime {
    access: BufferAccess,
}

impl DirectRuntime {
    /// Runtime with zero-copy buffer access.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runtime reporting the given buffer access capability.
    pub fn with_access(access: BufferAccess) -> Self {
        Self { access }
    }
}

impl ManagedRuntime for DirectRuntime {
    fn attach_current_thread(&self, _role: ThreadRole) -> Result<Attachment, AttachError> {
        Ok(DIRECT_ATTACHED.with(|attached| {
            if attached.replace(true) {
                Attachment::AlreadyAttached
            } else {
                Attachment::Attached
            }
        }))
    }

    fn detach_current_thread(&self) {
        DIRECT_ATTACHED.with(|attached| attached.set(false));
    }

    fn buffer_access(&self) -> BufferAccess {
        self.access
    }
}
