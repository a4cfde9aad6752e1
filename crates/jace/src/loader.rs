//! Loader strategies for the host runtime.
//!
//! A [`VmLoader`] knows how to bring a runtime into the process and how to
//! create (or find) a VM in it. The bridge consumes loaders through this
//! trait only; locating a JVM on disk, reading registry keys and similar
//! platform lookups belong to loader implementations outside this crate.
//!
//! Three strategies ship here:
//!
//! - [`StaticVmLoader`]: the runtime is linked into the process and created
//!   through a factory function.
//! - [`ExistingVmLoader`]: wraps a runtime that is already running, for
//!   example when native code is called from inside a JVM.
//! - [`DynamicVmLoader`] (feature `dynamic`): opens a `libjvm` by path and
//!   drives it through its JNI function tables.

use crate::error::{Error, Result};
use crate::options::OptionList;
use crate::sys::{HostRuntime, JNI_EEXIST, JNI_VERSION_1_6};
use jace_log::warn;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// A shared handle to a running host runtime.
pub type RuntimeHandle = Arc<dyn HostRuntime>;

/// Factory used by [`StaticVmLoader`] to create a runtime.
pub type RuntimeFactory =
    Arc<dyn Fn(&OptionList, bool) -> std::result::Result<RuntimeHandle, i32> + Send + Sync>;

/// Strategy for loading and creating the host runtime.
pub trait VmLoader: Send + Sync {
    /// JNI version requested from the VM.
    fn version(&self) -> i32;

    /// Loads the runtime library, if the strategy needs to.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RuntimeInit`] if the library cannot be loaded.
    fn load_vm(&self) -> Result<()>;

    /// Unloads the runtime library, if the strategy loaded one.
    fn unload_vm(&self);

    /// `JNI_CreateJavaVM`: returns the new runtime or a JNI status code.
    fn create_vm(
        &self,
        options: &OptionList,
        ignore_unrecognized: bool,
    ) -> std::result::Result<RuntimeHandle, i32>;

    /// `JNI_GetCreatedJavaVMs`: the runtimes already created in this
    /// process through this loader.
    fn created_vms(&self) -> Vec<RuntimeHandle>;

    /// Clones this loader behind a fresh box.
    fn clone_box(&self) -> Box<dyn VmLoader>;
}

impl Clone for Box<dyn VmLoader> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

// ============================================================================
// Static loader
// ============================================================================

/// Creates the runtime through a directly linked factory.
///
/// At most one VM can be created per loader family (clones share the created
/// VM), matching the one-VM-per-process rule of the JNI invocation API.
#[derive(Clone)]
pub struct StaticVmLoader {
    version: i32,
    factory: RuntimeFactory,
    created: Arc<Mutex<Option<RuntimeHandle>>>,
}

impl StaticVmLoader {
    /// Creates a loader around `factory`.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&OptionList, bool) -> std::result::Result<RuntimeHandle, i32>
            + Send
            + Sync
            + 'static,
    {
        StaticVmLoader {
            version: JNI_VERSION_1_6,
            factory: Arc::new(factory),
            created: Arc::new(Mutex::new(None)),
        }
    }

    /// Requests a different JNI version.
    #[must_use]
    pub fn with_version(mut self, version: i32) -> Self {
        self.version = version;
        self
    }

    /// A loader for the embedded sandbox runtime with the given classes.
    #[cfg(feature = "sandbox")]
    pub fn sandbox(builder: crate::sandbox::SandboxBuilder) -> Self {
        StaticVmLoader::new(move |options, ignore| {
            let vm = builder.clone().build(options, ignore)?;
            Ok(vm as RuntimeHandle)
        })
    }
}

impl fmt::Debug for StaticVmLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticVmLoader")
            .field("version", &format_args!("{:#x}", self.version))
            .field("created", &self.created.lock().is_some())
            .finish()
    }
}

impl VmLoader for StaticVmLoader {
    fn version(&self) -> i32 {
        self.version
    }

    fn load_vm(&self) -> Result<()> {
        Ok(())
    }

    /// Destroys the VM this loader created. The slot stays occupied, so a
    /// second VM cannot be created afterwards.
    fn unload_vm(&self) {
        if let Some(vm) = self.created.lock().as_ref() {
            let rc = vm.destroy();
            if rc != crate::sys::JNI_OK {
                warn!("DestroyJavaVM returned {}", rc);
            }
        }
    }

    fn create_vm(
        &self,
        options: &OptionList,
        ignore_unrecognized: bool,
    ) -> std::result::Result<RuntimeHandle, i32> {
        let mut created = self.created.lock();
        if created.is_some() {
            return Err(JNI_EEXIST);
        }
        let vm = (self.factory)(options, ignore_unrecognized)?;
        *created = Some(Arc::clone(&vm));
        Ok(vm)
    }

    fn created_vms(&self) -> Vec<RuntimeHandle> {
        self.created.lock().iter().cloned().collect()
    }

    fn clone_box(&self) -> Box<dyn VmLoader> {
        Box::new(self.clone())
    }
}

// ============================================================================
// Existing-VM loader
// ============================================================================

/// Adopts a runtime that is already running in the process.
///
/// `create_vm` always fails with `JNI_EEXIST`; the runtime is picked up
/// through [`VmLoader::created_vms`] instead.
#[derive(Clone)]
pub struct ExistingVmLoader {
    vm: RuntimeHandle,
}

impl ExistingVmLoader {
    /// Wraps `vm`.
    pub fn new(vm: RuntimeHandle) -> Self {
        ExistingVmLoader { vm }
    }
}

impl fmt::Debug for ExistingVmLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExistingVmLoader")
            .field("version", &format_args!("{:#x}", self.vm.version()))
            .finish()
    }
}

impl VmLoader for ExistingVmLoader {
    fn version(&self) -> i32 {
        self.vm.version()
    }

    fn load_vm(&self) -> Result<()> {
        Ok(())
    }

    fn unload_vm(&self) {}

    fn create_vm(&self, _: &OptionList, _: bool) -> std::result::Result<RuntimeHandle, i32> {
        Err(JNI_EEXIST)
    }

    fn created_vms(&self) -> Vec<RuntimeHandle> {
        vec![Arc::clone(&self.vm)]
    }

    fn clone_box(&self) -> Box<dyn VmLoader> {
        Box::new(self.clone())
    }
}

// ============================================================================
// Dynamic loader
// ============================================================================

#[cfg(feature = "dynamic")]
pub use dynamic::DynamicVmLoader;

#[cfg(feature = "dynamic")]
mod dynamic {
    use super::{RuntimeHandle, VmLoader};
    use crate::error::{Error, Result};
    use crate::jni::{
        CreateJavaVm, GetCreatedJavaVms, JavaVM, JavaVMInitArgs, JavaVMOption, JniRuntime, jint,
        jsize,
    };
    use crate::options::{AbortHook, ExitHook, Hook, OptionList};
    use crate::sys::{JNI_EEXIST, JNI_EINVAL, JNI_ERR, JNI_OK, JNI_VERSION_1_6};
    use jace_log::{debug, info, warn};
    use libloading::{Library, Symbol};
    use parking_lot::Mutex;
    use std::ffi::{CString, c_void};
    use std::fmt;
    use std::path::{Path, PathBuf};
    use std::ptr;
    use std::sync::Arc;

    const CREATE_SYMBOL: &[u8] = b"JNI_CreateJavaVM\0";
    const CREATED_SYMBOL: &[u8] = b"JNI_GetCreatedJavaVMs\0";

    // The runtime calls hooks through C function pointers; these hold the
    // Rust hooks the trampolines forward to.
    static EXIT_HOOK: Mutex<Option<ExitHook>> = Mutex::new(None);
    static ABORT_HOOK: Mutex<Option<AbortHook>> = Mutex::new(None);

    extern "system" fn exit_trampoline(status: jint) {
        let hook = *EXIT_HOOK.lock();
        if let Some(hook) = hook {
            hook(status);
        }
    }

    extern "system" fn abort_trampoline() {
        let hook = *ABORT_HOOK.lock();
        if let Some(hook) = hook {
            hook();
        }
    }

    /// Opens the runtime library at a path and creates the VM through its
    /// exported `JNI_CreateJavaVM`.
    ///
    /// Clones share the library and the created VM. The library stays mapped
    /// while any [`JniRuntime`] created from it is alive.
    #[derive(Clone)]
    pub struct DynamicVmLoader {
        path: PathBuf,
        version: i32,
        library: Arc<Mutex<Option<Arc<Library>>>>,
        created: Arc<Mutex<Option<RuntimeHandle>>>,
    }

    impl DynamicVmLoader {
        /// A loader for the library at `path`, e.g. `.../lib/server/libjvm.so`.
        pub fn new(path: impl AsRef<Path>) -> Self {
            DynamicVmLoader {
                path: path.as_ref().to_path_buf(),
                version: JNI_VERSION_1_6,
                library: Arc::new(Mutex::new(None)),
                created: Arc::new(Mutex::new(None)),
            }
        }

        /// Requests a different JNI version.
        #[must_use]
        pub fn with_version(mut self, version: i32) -> Self {
            self.version = version;
            self
        }

        /// Path of the runtime library.
        pub fn path(&self) -> &Path {
            &self.path
        }

        fn runtime(&self, vm: *mut JavaVM, library: &Arc<Library>) -> RuntimeHandle {
            // SAFETY: `vm` came from the library's own invocation API, and the
            // runtime keeps the library mapped.
            let runtime = unsafe { JniRuntime::from_raw(vm, self.version) };
            Arc::new(runtime.owned_by(Arc::<Library>::clone(library)))
        }
    }

    impl fmt::Debug for DynamicVmLoader {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("DynamicVmLoader")
                .field("path", &self.path)
                .field("version", &format_args!("{:#x}", self.version))
                .field("loaded", &self.library.lock().is_some())
                .field("created", &self.created.lock().is_some())
                .finish()
        }
    }

    /// Binds a hook option to its trampoline. `vfprintf` receives a C
    /// `va_list`, which cannot be forwarded, so it is dropped.
    fn extra_info(hook: Hook) -> Option<*mut c_void> {
        match hook {
            Hook::Exit(h) => {
                *EXIT_HOOK.lock() = Some(h);
                Some(exit_trampoline as extern "system" fn(jint) as *mut c_void)
            }
            Hook::Abort(h) => {
                *ABORT_HOOK.lock() = Some(h);
                Some(abort_trampoline as extern "system" fn() as *mut c_void)
            }
            Hook::Vfprintf(_) => {
                warn!("the vfprintf hook cannot be forwarded to a loaded runtime; dropping it");
                None
            }
        }
    }

    impl VmLoader for DynamicVmLoader {
        fn version(&self) -> i32 {
            self.version
        }

        fn load_vm(&self) -> Result<()> {
            let mut slot = self.library.lock();
            if slot.is_some() {
                return Ok(());
            }
            // SAFETY: loading runs the library's initializers; a JVM library's
            // are sound to run once per process.
            let library = unsafe { Library::new(&self.path) }.map_err(|e| {
                Error::runtime_init(format!("Unable to open {}: {e}", self.path.display()))
            })?;
            info!("loaded virtual machine library {}", self.path.display());
            *slot = Some(Arc::new(library));
            Ok(())
        }

        /// Destroys the VM this loader created and releases the library.
        /// The library is unmapped once the last runtime handle is dropped.
        fn unload_vm(&self) {
            if let Some(vm) = self.created.lock().take() {
                let rc = vm.destroy();
                if rc != JNI_OK {
                    warn!("DestroyJavaVM returned {}", rc);
                }
            }
            if self.library.lock().take().is_some() {
                debug!("released virtual machine library {}", self.path.display());
            }
        }

        fn create_vm(
            &self,
            options: &OptionList,
            ignore_unrecognized: bool,
        ) -> std::result::Result<RuntimeHandle, i32> {
            let mut created = self.created.lock();
            if created.is_some() {
                return Err(JNI_EEXIST);
            }
            let Some(library) = self.library.lock().clone() else {
                warn!("create_vm called before the library was loaded");
                return Err(JNI_ERR);
            };
            // SAFETY: the symbol has the JNI invocation API signature.
            let create: Symbol<CreateJavaVm> =
                unsafe { library.get(CREATE_SYMBOL) }.map_err(|e| {
                    warn!("{} exports no JNI_CreateJavaVM: {e}", self.path.display());
                    JNI_ERR
                })?;

            let mut strings = Vec::new();
            let mut raw = Vec::new();
            for option in options.render() {
                let extra = match option.extra_info {
                    Some(hook) => match extra_info(hook) {
                        Some(ptr) => ptr,
                        None => continue,
                    },
                    None => ptr::null_mut(),
                };
                let string = CString::new(option.option_string).map_err(|_| JNI_EINVAL)?;
                raw.push(JavaVMOption {
                    optionString: string.as_ptr().cast_mut(),
                    extraInfo: extra,
                });
                strings.push(string);
            }
            let mut args = JavaVMInitArgs {
                version: self.version,
                nOptions: raw.len() as jint,
                options: raw.as_mut_ptr(),
                ignoreUnrecognized: u8::from(ignore_unrecognized),
            };

            let mut vm: *mut JavaVM = ptr::null_mut();
            let mut env: *mut c_void = ptr::null_mut();
            // SAFETY: `args` and the option strings outlive the call.
            let rc = unsafe { create(&mut vm, &mut env, (&mut args as *mut JavaVMInitArgs).cast()) };
            if rc != JNI_OK || vm.is_null() {
                return Err(if rc == JNI_OK { JNI_ERR } else { rc });
            }

            let runtime = self.runtime(vm, &library);
            *created = Some(Arc::clone(&runtime));
            Ok(runtime)
        }

        fn created_vms(&self) -> Vec<RuntimeHandle> {
            if let Some(vm) = self.created.lock().as_ref() {
                return vec![Arc::clone(vm)];
            }
            let Some(library) = self.library.lock().clone() else {
                return Vec::new();
            };
            // SAFETY: the symbol has the JNI invocation API signature.
            let Ok(get_created) = (unsafe { library.get::<GetCreatedJavaVms>(CREATED_SYMBOL) })
            else {
                return Vec::new();
            };
            let mut vms: [*mut JavaVM; 4] = [ptr::null_mut(); 4];
            let mut count: jsize = 0;
            // SAFETY: the buffer holds `vms.len()` entries.
            let rc = unsafe { get_created(vms.as_mut_ptr(), vms.len() as jsize, &mut count) };
            if rc != JNI_OK {
                warn!("JNI_GetCreatedJavaVMs returned {}", rc);
                return Vec::new();
            }
            vms.iter()
                .take(count.max(0) as usize)
                .filter(|vm| !vm.is_null())
                .map(|vm| self.runtime(*vm, &library))
                .collect()
        }

        fn clone_box(&self) -> Box<dyn VmLoader> {
            Box::new(self.clone())
        }
    }
}

pub(crate) fn load(loader: &dyn VmLoader) -> Result<()> {
    loader.load_vm().map_err(|e| {
        Error::runtime_init("Unable to load the virtual machine library.").caused_by(&e)
    })
}

#[cfg(all(test, feature = "sandbox"))]
mod tests {
    use super::*;
    use crate::sandbox::Sandbox;

    #[test]
    fn test_static_loader_creates_once() {
        let loader = StaticVmLoader::sandbox(Sandbox::builder());
        assert!(loader.created_vms().is_empty());

        let vm = loader.create_vm(&OptionList::new(), false).unwrap();
        assert_eq!(loader.created_vms().len(), 1);
        assert!(Arc::ptr_eq(&loader.created_vms()[0], &vm));

        let again = loader.clone_box().create_vm(&OptionList::new(), false);
        assert_eq!(again.err(), Some(JNI_EEXIST));
    }

    #[cfg(feature = "dynamic")]
    #[test]
    fn test_dynamic_loader_reports_missing_library() {
        let loader = DynamicVmLoader::new("/nonexistent/jace/libjvm.so");
        assert!(loader.created_vms().is_empty());
        assert_eq!(loader.create_vm(&OptionList::new(), false).err(), Some(crate::sys::JNI_ERR));

        match load(&loader) {
            Err(Error::RuntimeInit { message }) => {
                assert!(message.contains("Unable to load"), "{message}");
                assert!(message.contains("/nonexistent/jace/libjvm.so"), "{message}");
            }
            other => panic!("expected RuntimeInit, got {other:?}"),
        }
        // Nothing was loaded, so unloading is a no-op.
        loader.unload_vm();
        assert!(format!("{loader:?}").contains("loaded: false"));
    }

    #[test]
    fn test_existing_loader_reports_vm() {
        let vm: RuntimeHandle = Sandbox::builder().build(&OptionList::new(), false).unwrap();
        let loader = ExistingVmLoader::new(Arc::clone(&vm));
        assert_eq!(loader.created_vms().len(), 1);
        assert_eq!(loader.version(), vm.version());
        assert!(loader.create_vm(&OptionList::new(), false).is_err());
    }
}
