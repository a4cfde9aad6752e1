//! Per-thread call context and the thread-local class-loader override.
//!
//! A [`ThreadContext`] is what [`attach`](crate::helper::attach) hands back:
//! proof that the calling thread is bound to the runtime, plus the handle
//! through which every foreign primitive is issued. It is deliberately
//! `!Send`; a context belongs to the thread that attached.

use crate::error::{Error, Result};
use crate::exception;
use crate::helper::Bridge;
use crate::loader::RuntimeHandle;
use crate::refs::{GlobalRef, LocalRef};
use crate::sys::{HostRuntime, JNI_EDETACHED, RawRef};
use jace_log::{debug, trace};
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;

/// The calling thread's binding to the runtime.
pub struct ThreadContext {
    bridge: &'static Bridge,
    vm: RuntimeHandle,
    _not_send: PhantomData<*const ()>,
}

impl ThreadContext {
    pub(crate) fn new(bridge: &'static Bridge, vm: RuntimeHandle) -> Self {
        ThreadContext {
            bridge,
            vm,
            _not_send: PhantomData,
        }
    }

    /// The bridge this context was attached through.
    #[must_use]
    pub fn bridge(&self) -> &'static Bridge {
        self.bridge
    }

    /// The raw primitive interface.
    #[must_use]
    pub fn vm(&self) -> &dyn HostRuntime {
        self.vm.as_ref()
    }

    // ---- references ---------------------------------------------------------

    /// Creates a new local reference to `obj`. A null `obj` yields a null
    /// reference without calling the runtime.
    ///
    /// # Errors
    ///
    /// Fails fast after shutdown and with
    /// [`Error::ReferenceExhaustion`] when the local table is full.
    pub fn new_local_ref(&self, obj: RawRef) -> Result<LocalRef<'_>> {
        let raw = self.bridge.new_local_ref(&self.vm, obj)?;
        Ok(LocalRef::adopt(self, raw))
    }

    /// Deletes a local reference; a no-op after shutdown.
    pub fn delete_local_ref(&self, obj: RawRef) {
        self.bridge.delete_local_ref(&self.vm, obj);
    }

    /// Creates a new global reference to `obj`.
    ///
    /// # Errors
    ///
    /// Fails fast after shutdown, with [`Error::NullPointer`] for a null
    /// `obj` and with [`Error::ReferenceExhaustion`] when the runtime
    /// refuses.
    pub fn new_global_ref(&self, obj: RawRef) -> Result<GlobalRef> {
        self.bridge.new_global_ref(&self.vm, obj)
    }

    /// Deletes a global reference; a no-op after shutdown.
    pub fn delete_global_ref(&self, obj: RawRef) {
        self.bridge.delete_global_ref(&self.vm, obj);
    }

    /// Wraps a local reference returned by the runtime.
    pub fn adopt_local(&self, raw: RawRef) -> LocalRef<'_> {
        LocalRef::adopt(self, raw)
    }

    // ---- exceptions ---------------------------------------------------------

    /// Translates and returns any pending foreign exception.
    ///
    /// # Errors
    ///
    /// Returns the translated [`Error::Foreign`] if an exception was pending,
    /// or [`Error::RuntimeInterop`] if translation itself failed.
    pub fn check_exception(&self) -> Result<()> {
        exception::catch_and_throw(self)
    }

    // ---- helpers used across the crate --------------------------------------

    /// `FindClass` without exception translation; the caller checks for null.
    pub(crate) fn find_class_local(&self, name: &str) -> LocalRef<'_> {
        LocalRef::adopt(self, self.vm.find_class(name))
    }

    /// Creates a new string and returns its local reference.
    ///
    /// # Errors
    ///
    /// Returns the translated foreign exception if allocation throws.
    pub fn new_string(&self, text: &str) -> Result<LocalRef<'_>> {
        let raw = self.vm.new_string_utf(text);
        if raw.is_null() {
            self.check_exception()?;
            return Err(Error::ReferenceExhaustion {
                operation: "NewStringUTF",
                kind: "local",
                hint: "The runtime could not allocate the string.",
            });
        }
        Ok(LocalRef::adopt(self, raw))
    }

    /// Reads a foreign string into a Rust string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RuntimeInterop`] if the characters cannot be
    /// retrieved.
    pub fn string_chars(&self, string: RawRef) -> Result<String> {
        self.vm.get_string_utf_chars(string).ok_or_else(|| {
            Error::interop("Unable to retrieve the character string for an exception message.")
        })
    }
}

impl fmt::Debug for ThreadContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadContext")
            .field("thread", &std::thread::current().id())
            .field("shutdown", &self.bridge.has_shutdown())
            .finish()
    }
}

// ============================================================================
// Thread-local class-loader override
// ============================================================================

thread_local! {
    // Dropped at thread exit; `GlobalRef`'s drop releases it best-effort.
    static CLASS_LOADER: RefCell<Option<GlobalRef>> = const { RefCell::new(None) };
}

/// Installs `loader` as the calling thread's class loader, or clears the
/// override with `None` or a null reference.
///
/// The loader is pinned with a new global reference; the previous override
/// is released.
///
/// # Errors
///
/// Fails if the global reference cannot be created.
pub fn set_class_loader(ctx: &ThreadContext, loader: Option<RawRef>) -> Result<()> {
    let pinned = match loader {
        Some(raw) if !raw.is_null() => Some(ctx.new_global_ref(raw)?),
        _ => None,
    };
    let action = if pinned.is_some() { "set" } else { "cleared" };
    let previous = CLASS_LOADER.with(|slot| std::mem::replace(&mut *slot.borrow_mut(), pinned));
    drop(previous);
    trace!("class loader override {action} on {:?}", std::thread::current().id());
    Ok(())
}

/// The calling thread's class-loader override, as a new local reference.
///
/// # Errors
///
/// Fails if the local reference cannot be created.
pub fn class_loader(ctx: &ThreadContext) -> Result<Option<LocalRef<'_>>> {
    let raw = CLASS_LOADER
        .try_with(|slot| slot.borrow().as_ref().map(GlobalRef::raw))
        .ok()
        .flatten();
    match raw {
        Some(raw) => Ok(Some(ctx.new_local_ref(raw)?)),
        None => Ok(None),
    }
}

/// True if the calling thread has a class-loader override installed.
pub fn has_class_loader() -> bool {
    CLASS_LOADER
        .try_with(|slot| slot.borrow().is_some())
        .unwrap_or(false)
}

/// Thread teardown: clears the class-loader override and detaches the
/// thread, if the runtime is still alive and the thread is bound.
pub fn on_thread_destruction(bridge: &'static Bridge) {
    if bridge.has_shutdown() {
        return;
    }
    let Ok(vm) = bridge.runtime() else {
        return;
    };

    let override_set = has_class_loader();
    if override_set || vm.get_env() != JNI_EDETACHED {
        if override_set {
            let previous = CLASS_LOADER.with(|slot| slot.borrow_mut().take());
            drop(previous);
        }
        bridge.detach();
        debug!("thread {:?} torn down", std::thread::current().id());
    }
}

#[cfg(all(test, feature = "sandbox"))]
mod tests {
    use super::*;
    use crate::descriptor::ClassDescriptor;
    use crate::sandbox::testing;
    use jace_log::Level;

    #[test]
    fn test_class_loader_override_round_trip() {
        static WIDGET: ClassDescriptor = ClassDescriptor::new("plugin/Widget", "Lplugin/Widget;");

        let ctx = testing::attach();
        assert!(matches!(WIDGET.resolve(&ctx), Err(Error::ClassNotFound { .. })));
        assert!(!has_class_loader());

        let loader_class = ctx.find_class_local("java/lang/ClassLoader");
        let vm = ctx.vm();
        let init = vm.get_method_id(loader_class.raw(), "<init>", "()V", false).unwrap();
        let loader = ctx.adopt_local(vm.new_object(loader_class.raw(), init));

        set_class_loader(&ctx, Some(loader.raw())).unwrap();
        assert!(has_class_loader());
        let installed = class_loader(&ctx).unwrap().unwrap();
        assert!(vm.is_same_object(installed.raw(), loader.raw()));
        assert_ne!(installed.raw(), loader.raw());
        drop(installed);

        assert!(WIDGET.resolve(&ctx).is_ok());

        set_class_loader(&ctx, None).unwrap();
        assert!(!has_class_loader());
        assert!(class_loader(&ctx).unwrap().is_none());
    }

    #[test]
    fn test_null_loader_clears_override() {
        let log = testing::LogCapture::start();
        let ctx = testing::attach();
        let thread = std::thread::current().id();

        set_class_loader(&ctx, Some(RawRef::NULL)).unwrap();
        assert!(!has_class_loader());
        assert!(log.contains(Level::Trace, &format!("override cleared on {thread:?}")));
        assert!(!log.contains(Level::Trace, &format!("override set on {thread:?}")));

        set_class_loader(&ctx, None).unwrap();
        assert!(!log.contains(Level::Trace, &format!("override set on {thread:?}")));
    }

    #[test]
    fn test_reference_traffic_is_counted() {
        let (bridge, sandbox) = testing::isolated();
        let ctx = bridge.attach().unwrap();
        let text = ctx.new_string("counted").unwrap();
        let locals = sandbox.local_ref_count();
        let globals = sandbox.global_ref_count();

        let copy = ctx.new_local_ref(text.raw()).unwrap();
        assert_eq!(sandbox.local_ref_count(), locals + 1);
        drop(copy);
        assert_eq!(sandbox.local_ref_count(), locals);

        let global = ctx.new_global_ref(text.raw()).unwrap();
        assert_eq!(bridge.global_ref_count(), 1);
        assert_eq!(sandbox.global_ref_count(), globals + 1);
        drop(global);
        assert_eq!(bridge.global_ref_count(), 0);
        assert_eq!(sandbox.global_ref_count(), globals);
        assert_eq!(ctx.string_chars(text.raw()).unwrap(), "counted");
    }

    #[test]
    fn test_thread_destruction_detaches() {
        let (bridge, sandbox) = testing::isolated();
        std::thread::spawn(move || {
            let ctx = bridge.attach().unwrap();
            let loader_class = ctx.find_class_local("java/lang/ClassLoader");
            let vm = ctx.vm();
            let init = vm.get_method_id(loader_class.raw(), "<init>", "()V", false).unwrap();
            let loader = ctx.adopt_local(vm.new_object(loader_class.raw(), init));
            set_class_loader(&ctx, Some(loader.raw())).unwrap();
            drop(loader);
            drop(loader_class);
            drop(ctx);

            on_thread_destruction(bridge);
            assert!(!has_class_loader());
            assert_eq!(bridge.runtime().unwrap().get_env(), JNI_EDETACHED);
        })
        .join()
        .unwrap();
        assert_eq!(bridge.global_ref_count(), 0);
        assert_eq!(sandbox.calls_after_destroy(), 0);
    }
}
