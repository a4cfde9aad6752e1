//! Owned local and global references.
//!
//! [`LocalRef`] is scoped to the [`ThreadContext`] it was obtained from and
//! is deleted when it goes out of scope, so bounded per-thread local tables
//! are never exhausted by forgotten references. [`GlobalRef`] is valid on any
//! thread until dropped; dropping it never panics and never calls into a
//! runtime that has been shut down.

use crate::context::ThreadContext;
use crate::error::Result;
use crate::helper::Bridge;
use crate::sys::RawRef;
use std::fmt;

/// A local reference owned by the current call scope.
pub struct LocalRef<'ctx> {
    ctx: &'ctx ThreadContext,
    raw: RawRef,
}

impl<'ctx> LocalRef<'ctx> {
    /// Takes ownership of a local reference returned by the runtime.
    ///
    /// `raw` may be null, in which case nothing is deleted on drop.
    pub fn adopt(ctx: &'ctx ThreadContext, raw: RawRef) -> Self {
        LocalRef { ctx, raw }
    }

    /// The underlying reference.
    #[must_use]
    pub fn raw(&self) -> RawRef {
        self.raw
    }

    /// True if the reference is null.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.raw.is_null()
    }

    /// Promotes the referenced object to a new global reference.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NullPointer`](crate::Error::NullPointer) for a null
    /// reference, and [`Error::ReferenceExhaustion`](crate::Error::ReferenceExhaustion)
    /// if the runtime refuses the allocation.
    pub fn to_global(&self) -> Result<GlobalRef> {
        self.ctx.new_global_ref(self.raw)
    }

    /// Releases ownership without deleting the reference.
    #[must_use]
    pub fn into_raw(self) -> RawRef {
        let raw = self.raw;
        std::mem::forget(self);
        raw
    }
}

impl Drop for LocalRef<'_> {
    fn drop(&mut self) {
        if !self.raw.is_null() {
            self.ctx.delete_local_ref(self.raw);
        }
    }
}

impl fmt::Debug for LocalRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LocalRef").field(&self.raw).finish()
    }
}

/// A global reference, valid across threads until dropped.
///
/// A `GlobalRef` remembers the [`Bridge`] that issued it so the release goes
/// through that bridge's shutdown-aware delete path.
pub struct GlobalRef {
    bridge: &'static Bridge,
    raw: RawRef,
}

impl GlobalRef {
    /// Wraps a global reference issued through `bridge`.
    ///
    /// Callers must own `raw`; it is deleted on drop.
    pub(crate) fn from_raw(bridge: &'static Bridge, raw: RawRef) -> Self {
        GlobalRef { bridge, raw }
    }

    /// The underlying reference. Never null.
    #[must_use]
    pub fn raw(&self) -> RawRef {
        self.raw
    }

    /// The bridge that issued this reference.
    #[must_use]
    pub fn bridge(&self) -> &'static Bridge {
        self.bridge
    }

    /// Allocates an independent global reference to the same object.
    ///
    /// # Errors
    ///
    /// Fails if the current thread cannot attach or the runtime refuses the
    /// allocation.
    pub fn try_clone(&self) -> Result<GlobalRef> {
        let ctx = self.bridge.attach()?;
        ctx.new_global_ref(self.raw)
    }
}

impl Drop for GlobalRef {
    fn drop(&mut self) {
        self.bridge.release_global(self.raw);
    }
}

impl fmt::Debug for GlobalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("GlobalRef").field(&self.raw).finish()
    }
}
