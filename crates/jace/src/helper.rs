//! Process-wide runtime ownership, thread attachment and reference traffic.
//!
//! A [`Bridge`] owns the loader, the runtime handle and the shutdown flag.
//! The process has one default bridge ([`bridge()`]); the free functions in
//! this module operate on it.
//!
//! # The shutdown invariant
//!
//! Native objects holding global references may be dropped on any thread at
//! any time, including while the runtime is being torn down at process exit.
//! A reference delete issued into a destroyed runtime is memory-unsafe, so:
//!
//! - the shutdown flag is only ever written while holding the bridge mutex;
//! - every local and global reference delete checks the flag while holding
//!   the same mutex, and becomes a no-op once it is set;
//! - reference creation after shutdown fails fast without calling the
//!   runtime.
//!
//! This gives all deletes a single total order relative to the shutdown
//! transition.

use crate::context::ThreadContext;
use crate::error::{Error, Result};
use crate::loader::{self, RuntimeHandle, VmLoader};
use crate::options::OptionList;
use crate::refs::GlobalRef;
use crate::sys::{JNI_OK, RawRef, RawValue, TypeKind};
use jace_log::{debug, info, trace, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

struct VmState {
    loader: Option<Box<dyn VmLoader>>,
    runtime: Option<RuntimeHandle>,
    shutdown: bool,
}

/// Owner of one host runtime and its shutdown state.
pub struct Bridge {
    state: Mutex<VmState>,
    // Mirror of `state.shutdown` for lock-free queries; written under `state`.
    shutdown: AtomicBool,
    global_refs: AtomicUsize,
}

static BRIDGE: Bridge = Bridge::new();

/// Returns the process-wide bridge.
pub fn bridge() -> &'static Bridge {
    &BRIDGE
}

impl Bridge {
    /// Creates a bridge with no runtime.
    #[must_use]
    pub const fn new() -> Self {
        Bridge {
            state: Mutex::new(VmState {
                loader: None,
                runtime: None,
                shutdown: false,
            }),
            shutdown: AtomicBool::new(false),
            global_refs: AtomicUsize::new(0),
        }
    }

    /// Creates the runtime through `loader`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RuntimeInit`] if a runtime was already created or
    /// adopted by this bridge, if the bridge has shut down, or if the loader
    /// fails to load or create the VM. A VM that was created but then fails
    /// the core class check or the shutdown hook registration is unloaded
    /// again, and bootstrap may be retried.
    pub fn bootstrap(
        &'static self,
        loader: &dyn VmLoader,
        options: &OptionList,
        ignore_unrecognized: bool,
    ) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.shutdown {
                return Err(Error::runtime_init(
                    "Unable to create the virtual machine. The VM has already been shutdown.",
                ));
            }
            if state.runtime.is_some() {
                return Err(Error::runtime_init(
                    "Unable to create the virtual machine. A virtual machine already exists.",
                ));
            }

            let loader = loader.clone_box();
            loader::load(loader.as_ref())?;

            let vm = loader
                .create_vm(options, ignore_unrecognized)
                .map_err(|rc| {
                    Error::runtime_init(format!(
                        "Unable to create the virtual machine. The error was {rc}"
                    ))
                })?;

            info!(
                "created virtual machine (JNI version {:#x}, {} options)",
                vm.version(),
                options.len()
            );
            state.loader = Some(loader);
            state.runtime = Some(vm);
        }

        let installed = self
            .verify_bootstrap_classes()
            .and_then(|()| self.install_shutdown_hook());
        if let Err(e) = installed {
            self.abandon_runtime();
            return Err(e);
        }
        Ok(())
    }

    // Drops a runtime whose bootstrap did not complete, so bootstrap can be
    // retried.
    fn abandon_runtime(&self) {
        let loader = {
            let mut state = self.state.lock();
            state.runtime = None;
            state.loader.take()
        };
        warn!("bootstrap failed; unloading the virtual machine");
        if let Some(loader) = loader {
            loader.unload_vm();
        }
    }

    // Registers `jace.util.ShutdownHook` with `Runtime.addShutdownHook`, so
    // the bridge learns when the runtime exits on its own.
    fn install_shutdown_hook(&'static self) -> Result<()> {
        let ctx = self.attach()?;
        let vm = ctx.vm();
        let failed = |message: &str| {
            let error = Error::runtime_init(message);
            match ctx.check_exception() {
                Err(cause) => error.caused_by(&cause),
                Ok(()) => error,
            }
        };

        let runtime_class = ctx.find_class_local("java/lang/Runtime");
        if runtime_class.is_null() {
            return Err(failed("Assert failed: Unable to find the class, java.lang.Runtime."));
        }
        let get_runtime = vm
            .get_method_id(runtime_class.raw(), "getRuntime", "()Ljava/lang/Runtime;", true)
            .ok_or_else(|| failed("Assert failed: Unable to find the method, Runtime.getRuntime()."))?;
        let runtime = ctx.adopt_local(
            vm.call_static_method(runtime_class.raw(), get_runtime, TypeKind::Object)
                .as_ref(),
        );
        if runtime.is_null() {
            return Err(failed("Assert failed: Unable to invoke the method, Runtime.getRuntime()."));
        }
        let add_hook = vm
            .get_method_id(
                runtime_class.raw(),
                "addShutdownHook",
                "(Ljava/lang/Thread;)V",
                false,
            )
            .ok_or_else(|| {
                failed("Assert failed: Unable to find the method, Runtime.addShutdownHook().")
            })?;

        let hook_class = ctx.find_class_local("jace/util/ShutdownHook");
        if hook_class.is_null() {
            return Err(failed(
                "Assert failed: Unable to find the class, jace.util.ShutdownHook. Did you forget to include jace-runtime.jar in your classpath at runtime?",
            ));
        }
        let get_instance = vm
            .get_method_id(hook_class.raw(), "getInstance", "()Ljace/util/ShutdownHook;", true)
            .ok_or_else(|| {
                failed("Assert failed: Unable to find the method, ShutdownHook.getInstance().")
            })?;
        let hook = ctx.adopt_local(
            vm.call_static_method(hook_class.raw(), get_instance, TypeKind::Object)
                .as_ref(),
        );
        if hook.is_null() {
            return Err(failed(
                "Assert failed: Unable to invoke the method, ShutdownHook.getInstance().",
            ));
        }

        vm.call_method_a(
            runtime.raw(),
            add_hook,
            TypeKind::Void,
            &[RawValue::Object(hook.raw())],
        );
        if vm.exception_check() {
            return Err(failed(
                "Assert failed: Unable to invoke the method, Runtime.addShutdownHook().",
            ));
        }
        debug!("registered jace.util.ShutdownHook");
        Ok(())
    }

    fn verify_bootstrap_classes(&'static self) -> Result<()> {
        let ctx = self.attach()?;
        for name in ["java/lang/Object", "java/lang/Class", "java/lang/Throwable"] {
            let class = ctx.find_class_local(name);
            if class.is_null() {
                ctx.vm().exception_clear();
                return Err(Error::runtime_init(format!(
                    "Assert failed: Unable to find the class, {}.",
                    name.replace('/', ".")
                )));
            }
        }
        Ok(())
    }

    /// Installs `loader` without creating a VM.
    ///
    /// The next [`attach`](Self::attach) adopts the single VM the loader
    /// reports as already created.
    pub fn set_vm_loader(&self, loader: &dyn VmLoader) {
        let mut state = self.state.lock();
        state.loader = Some(loader.clone_box());
    }

    /// Returns the runtime, adopting an already-created VM from the loader
    /// on first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RuntimeInit`] if there is no loader, or if the loader
    /// does not report exactly one created VM.
    pub fn runtime(&self) -> Result<RuntimeHandle> {
        let mut state = self.state.lock();
        if let Some(vm) = &state.runtime {
            return Ok(Arc::clone(vm));
        }

        let Some(loader) = &state.loader else {
            return Err(Error::runtime_init(
                "JNIHelper::getJavaVM\nUnable to find the JVM loader",
            ));
        };

        let mut vms = loader.created_vms();
        if vms.len() != 1 {
            return Err(Error::runtime_init(format!(
                "JNIHelper::getJavaVM\nLooking for exactly 1 JVM, but {} were found.",
                vms.len()
            )));
        }
        let vm = vms.remove(0);
        debug!("adopted running virtual machine");
        state.runtime = Some(Arc::clone(&vm));
        Ok(vm)
    }

    /// Binds the calling thread to the runtime.
    ///
    /// Repeated calls from the same thread are cheap and return independent
    /// contexts for the same binding.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RuntimeInit`] if the bridge has shut down, has no
    /// runtime, or the runtime refuses to register the thread.
    pub fn attach(&'static self) -> Result<ThreadContext> {
        if self.has_shutdown() {
            return Err(Error::runtime_init("The VM has already been shutdown."));
        }

        let vm = self.runtime()?;
        let rc = vm.attach_current_thread();
        if rc != JNI_OK {
            return Err(Error::runtime_init(format!(
                "JNIHelper::attach\nUnable to attach the current thread. The specific JNI error code is {rc}"
            )));
        }

        Ok(ThreadContext::new(self, vm))
    }

    /// Unbinds the calling thread. Safe to call on a thread that never
    /// attached, before bootstrap, or after shutdown.
    pub fn detach(&self) {
        if self.has_shutdown() {
            return;
        }
        let vm = self.state.lock().runtime.clone();
        if let Some(vm) = vm {
            let rc = vm.detach_current_thread();
            debug!("detached thread {:?} (rc {rc})", std::thread::current().id());
        }
    }

    /// Disables all further runtime interaction and unloads the VM.
    ///
    /// A runtime that already signalled its own shutdown is released
    /// without being unloaded.
    pub fn shutdown(&self) {
        let (loader, signalled) = {
            let mut state = self.state.lock();
            let signalled = state.shutdown;
            state.shutdown = true;
            self.shutdown.store(true, Ordering::SeqCst);
            state.runtime = None;
            (state.loader.take(), signalled)
        };

        info!("virtual machine shut down");
        match loader {
            Some(_) if signalled => debug!("runtime already exited; skipping unload"),
            Some(loader) => loader.unload_vm(),
            None => {}
        }
    }

    /// Records that the runtime itself is shutting down (for example from a
    /// VM shutdown hook). Unlike [`shutdown`](Self::shutdown) nothing is
    /// unloaded; the runtime is already going away.
    pub fn signal_vm_shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        self.shutdown.store(true, Ordering::SeqCst);
        info!("virtual machine signalled shutdown");
    }

    /// True once [`shutdown`](Self::shutdown) or
    /// [`signal_vm_shutdown`](Self::signal_vm_shutdown) has run.
    pub fn has_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Number of global references issued by this bridge and not yet
    /// released.
    pub fn global_ref_count(&self) -> usize {
        self.global_refs.load(Ordering::SeqCst)
    }

    // ---- reference traffic --------------------------------------------------

    pub(crate) fn new_local_ref(&self, vm: &RuntimeHandle, obj: RawRef) -> Result<RawRef> {
        if self.has_shutdown() {
            return Err(post_shutdown("newLocalRef"));
        }
        if obj.is_null() {
            return Ok(RawRef::NULL);
        }
        let local = vm.new_local_ref(obj);
        if local.is_null() {
            return Err(Error::ReferenceExhaustion {
                operation: "JNIHelper::newLocalRef",
                kind: "local",
                hint: "It is likely that you have exceeded the maximum local reference count.",
            });
        }
        Ok(local)
    }

    pub(crate) fn delete_local_ref(&self, vm: &RuntimeHandle, obj: RawRef) {
        let state = self.state.lock();
        if state.shutdown {
            trace!("skipping local delete of {obj:?} after shutdown");
            return;
        }
        vm.delete_local_ref(obj);
    }

    pub(crate) fn new_global_ref(
        &'static self,
        vm: &RuntimeHandle,
        obj: RawRef,
    ) -> Result<GlobalRef> {
        if self.has_shutdown() {
            return Err(post_shutdown("newGlobalRef"));
        }
        if obj.is_null() {
            return Err(Error::NullPointer {
                operation: "JNIHelper::newGlobalRef",
            });
        }
        let global = vm.new_global_ref(obj);
        if global.is_null() {
            return Err(Error::ReferenceExhaustion {
                operation: "JNIHelper::newGlobalRef",
                kind: "global",
                hint: "It is likely that you have exceeded the max heap size of your virtual machine.",
            });
        }
        self.global_refs.fetch_add(1, Ordering::SeqCst);
        Ok(GlobalRef::from_raw(self, global))
    }

    pub(crate) fn delete_global_ref(&self, vm: &RuntimeHandle, obj: RawRef) {
        let state = self.state.lock();
        if state.shutdown {
            trace!("skipping global delete of {obj:?} after shutdown");
            return;
        }
        vm.delete_global_ref(obj);
        self.global_refs.fetch_sub(1, Ordering::SeqCst);
    }

    /// Release path for dropped [`GlobalRef`]s: attaches if needed and
    /// swallows every failure.
    pub(crate) fn release_global(&'static self, obj: RawRef) {
        if obj.is_null() || self.has_shutdown() {
            return;
        }
        match self.attach() {
            Ok(ctx) => ctx.delete_global_ref(obj),
            Err(e) => debug!("suppressed failure releasing {obj:?}: {e}"),
        }
    }
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new()
    }
}

fn post_shutdown(operation: &str) -> Error {
    warn!("{operation} called after the virtual machine shut down");
    Error::interop(format!(
        "JNIHelper::{operation}\nThe VM has already been shutdown."
    ))
}

// ============================================================================
// Process-wide entry points
// ============================================================================

/// Creates the process runtime. See [`Bridge::bootstrap`].
///
/// # Errors
///
/// Returns [`Error::RuntimeInit`] on any bootstrap failure.
pub fn bootstrap(loader: &dyn VmLoader, options: &OptionList) -> Result<()> {
    jace_log::init_from_env();
    bridge().bootstrap(loader, options, false)
}

/// Installs a loader for an already-running VM. See [`Bridge::set_vm_loader`].
pub fn set_vm_loader(loader: &dyn VmLoader) {
    bridge().set_vm_loader(loader);
}

/// Attaches the calling thread to the process runtime.
///
/// # Errors
///
/// Returns [`Error::RuntimeInit`] if the runtime is missing or shut down.
pub fn attach() -> Result<ThreadContext> {
    bridge().attach()
}

/// Detaches the calling thread from the process runtime.
pub fn detach() {
    bridge().detach();
}

/// Shuts the process runtime down.
pub fn shutdown() {
    bridge().shutdown();
}

/// Host-side shutdown notification.
pub fn signal_vm_shutdown() {
    bridge().signal_vm_shutdown();
}

/// True once the process runtime has shut down.
pub fn has_shutdown() -> bool {
    bridge().has_shutdown()
}

/// Outstanding global references issued by the process bridge.
pub fn global_ref_count() -> usize {
    bridge().global_ref_count()
}
