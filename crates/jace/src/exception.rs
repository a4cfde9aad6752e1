//! Translation of foreign exceptions into typed Rust errors.
//!
//! Every exception proxy type registers a factory keyed by its dotted
//! foreign class name. When a call leaves an exception pending, the bridge
//! clears it and walks the exception's class hierarchy, most specific
//! first, until a registered factory is found:
//!
//! ```text
//! demo.GrandchildException   (not registered)
//!   -> demo.ChildException   (registered: translated as ChildException)
//! ```
//!
//! The chosen factory wraps the exception in its proxy type, which is
//! boxed as a [`Throwable`] inside [`ForeignException`] and can be
//! recovered with [`ForeignException::downcast_ref`]. If the walk reaches
//! the root without a match, translation fails with
//! [`Error::RuntimeInterop`] naming the original class. Any failure while
//! classifying is likewise reported as [`Error::RuntimeInterop`].
//!
//! Every type declared with [`declare_exception!`](crate::declare_exception)
//! adds itself to [`EXCEPTION_FACTORIES`] at link time, and the process-wide
//! [`registry`] is filled from that slice the first time it is used. The
//! built-in `java.lang` proxies arrive the same way. Private registries are
//! populated explicitly with [`ExceptionRegistry::enlist`].
//!
//! ```
//! use jace::declare_exception;
//! use jace::exception;
//!
//! declare_exception! {
//!     /// `demo.QuotaExceeded`
//!     pub struct QuotaExceeded => "demo/QuotaExceeded";
//! }
//!
//! assert!(exception::registry().lookup("demo.QuotaExceeded").is_some());
//! ```

use crate::context::ThreadContext;
use crate::descriptor::{self, ClassDescriptor};
use crate::error::{Error, Result};
use crate::lang::JThrowable;
use crate::method::JMethod;
use crate::object::{JString, ObjectHandle, ObjectProxy};
use crate::sys::{JNI_OK, RawRef, TypeKind};
use crate::value::JavaType;
use fxhash::FxHashMap;
use jace_log::{debug, trace};
use linkme::distributed_slice;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

static GET_MESSAGE: JMethod<JString> = JMethod::new("getMessage");

/// A proxy for a foreign `java.lang.Throwable`.
///
/// Implemented by [`declare_exception!`](crate::declare_exception); the
/// methods here exist so proxies can travel as trait objects.
pub trait Throwable: Any + Send + Sync + fmt::Debug {
    /// The embedded handle.
    fn object_handle(&self) -> &ObjectHandle;

    /// `self` as [`Any`], for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// `self` as a boxed [`Any`], for downcasting by value.
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync>;

    /// `Throwable.getMessage()`.
    ///
    /// # Errors
    ///
    /// Returns the translated exception if `getMessage` throws.
    fn message(&self, ctx: &ThreadContext) -> Result<Option<String>> {
        let raw = self.object_handle().raw();
        GET_MESSAGE
            .call_on(ctx, JThrowable::class_descriptor(), raw, &[])?
            .to_option(ctx)
    }
}

/// Builds the proxy for one foreign exception class.
pub trait ExceptionFactory: Send + Sync {
    /// Dotted name of the foreign class this factory handles.
    fn class_name(&self) -> &str;

    /// Wraps `throwable` in the factory's proxy type. The caller keeps
    /// ownership of `throwable`.
    ///
    /// # Errors
    ///
    /// Fails if the proxy cannot pin the reference.
    fn create(&self, ctx: &ThreadContext, throwable: RawRef) -> Result<Box<dyn Throwable>>;
}

/// The factory for a proxy type declared with
/// [`declare_exception!`](crate::declare_exception).
pub struct ProxyFactory<T> {
    class_name: String,
    _proxy: PhantomData<fn() -> T>,
}

impl<T: Throwable + ObjectProxy> ProxyFactory<T> {
    /// A factory keyed by `T`'s descriptor.
    #[must_use]
    pub fn new() -> Self {
        ProxyFactory {
            class_name: T::class_descriptor().dotted_name(),
            _proxy: PhantomData,
        }
    }
}

impl<T: Throwable + ObjectProxy> Default for ProxyFactory<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Throwable + ObjectProxy> ExceptionFactory for ProxyFactory<T> {
    fn class_name(&self) -> &str {
        &self.class_name
    }

    fn create(&self, ctx: &ThreadContext, throwable: RawRef) -> Result<Box<dyn Throwable>> {
        let proxy = T::from_ref(ctx, throwable)?;
        Ok(Box::new(proxy))
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Append-only map from dotted foreign class names to factories.
pub struct ExceptionRegistry {
    factories: RwLock<FxHashMap<String, Arc<dyn ExceptionFactory>>>,
}

impl ExceptionRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        ExceptionRegistry {
            factories: RwLock::new(FxHashMap::default()),
        }
    }

    /// Adds `factory` under its class name. The first registration for a
    /// name wins; returns false if the name was already taken.
    pub fn register(&self, factory: Arc<dyn ExceptionFactory>) -> bool {
        let name = factory.class_name().to_owned();
        let mut factories = self.factories.write();
        if factories.contains_key(&name) {
            return false;
        }
        trace!("registered exception factory for {name}");
        factories.insert(name, factory);
        true
    }

    /// Registers the proxy type `T`.
    pub fn enlist<T: Throwable + ObjectProxy>(&self) -> bool {
        self.register(Arc::new(ProxyFactory::<T>::new()))
    }

    /// The factory registered for `class_name` (dotted).
    #[must_use]
    pub fn lookup(&self, class_name: &str) -> Option<Arc<dyn ExceptionFactory>> {
        self.factories.read().get(class_name).cloned()
    }

    /// Number of registered factories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.factories.read().len()
    }

    /// True if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.read().is_empty()
    }

    /// Clears and translates the calling thread's pending exception.
    ///
    /// Returns `Ok(())` when nothing is pending.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Foreign`] with the translated exception, or
    /// [`Error::RuntimeInterop`] if translation fails.
    pub fn catch_and_throw(&self, ctx: &ThreadContext) -> Result<()> {
        let vm = ctx.vm();
        if !vm.exception_check() {
            return Ok(());
        }
        let thrown = ctx.adopt_local(vm.exception_occurred());
        vm.exception_clear();
        if thrown.is_null() {
            return Err(Error::interop(
                "A foreign exception was pending but could not be retrieved.",
            ));
        }
        Err(Error::Foreign(self.translate(ctx, thrown.raw())?))
    }

    /// Translates `throwable` through the most specific registered factory
    /// in its class hierarchy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RuntimeInterop`] if no ancestor is registered or the
    /// hierarchy cannot be inspected.
    pub fn translate(&self, ctx: &ThreadContext, throwable: RawRef) -> Result<ForeignException> {
        let vm = ctx.vm();
        let mut class = ctx.adopt_local(vm.get_object_class(throwable));
        if class.is_null() {
            vm.exception_clear();
            return Err(Error::interop("Unable to get the class of a foreign exception."));
        }
        let original = classify(ctx, class.raw())?;
        let mut name = original.clone();

        loop {
            if let Some(factory) = self.lookup(&name) {
                if name != original {
                    debug!("translating {original} through its ancestor {name}");
                }
                let proxy = factory.create(ctx, throwable).map_err(|e| {
                    Error::interop(format!("Unable to wrap the foreign exception {original}."))
                        .caused_by(&e)
                })?;
                let message = raw_message(ctx, throwable)?;
                return Ok(ForeignException {
                    class_name: original,
                    message,
                    throwable: proxy,
                });
            }

            let parent = ctx.adopt_local(vm.get_superclass(class.raw()));
            if vm.exception_check() {
                vm.exception_clear();
                return Err(Error::interop(format!(
                    "Unable to get the superclass of {name} while translating {original}."
                )));
            }
            if parent.is_null() {
                break;
            }
            name = classify(ctx, parent.raw())?;
            class = parent;
        }

        Err(Error::interop(format!(
            "Can't find any linked in parent exception for {original}"
        )))
    }
}

impl Default for ExceptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExceptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let factories = self.factories.read();
        let mut names: Vec<&str> = factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("ExceptionRegistry")
            .field("factories", &names)
            .finish()
    }
}

fn classify(ctx: &ThreadContext, class: RawRef) -> Result<String> {
    descriptor::class_name(ctx, class).map_err(|e| {
        Error::interop("Unable to classify a foreign exception.").caused_by(&e)
    })
}

// `Throwable.getMessage()` through raw primitives; a throwing `getMessage`
// must not re-enter translation.
fn raw_message(ctx: &ThreadContext, throwable: RawRef) -> Result<Option<String>> {
    let vm = ctx.vm();
    let base = ctx.find_class_local("java/lang/Throwable");
    let get_message = if base.is_null() {
        None
    } else {
        vm.get_method_id(base.raw(), "getMessage", "()Ljava/lang/String;", false)
    };
    let Some(get_message) = get_message else {
        vm.exception_clear();
        return Err(Error::interop(
            "Unable to find the method, java.lang.Throwable.getMessage().",
        ));
    };
    let message = ctx.adopt_local(vm.call_method(throwable, get_message, TypeKind::Object).as_ref());
    if vm.exception_check() {
        vm.exception_clear();
        return Err(Error::interop(
            "Unable to read the message of a foreign exception.",
        ));
    }
    if message.is_null() {
        return Ok(None);
    }
    ctx.string_chars(message.raw()).map(Some)
}

/// Registers one declared exception type into a registry.
pub type Enlister = fn(&ExceptionRegistry) -> bool;

/// Link-time list of every type declared with
/// [`declare_exception!`](crate::declare_exception).
#[distributed_slice]
pub static EXCEPTION_FACTORIES: [Enlister];

static REGISTRY: Lazy<ExceptionRegistry> = Lazy::new(|| {
    let registry = ExceptionRegistry::new();
    for enlist in EXCEPTION_FACTORIES {
        enlist(&registry);
    }
    debug!("exception registry holds {} factories", registry.len());
    registry
});

/// The process-wide registry.
pub fn registry() -> &'static ExceptionRegistry {
    &REGISTRY
}

/// Registers `T` in the process-wide registry.
///
/// Declared types are already registered; this covers hand-written
/// [`Throwable`] implementations.
pub fn enlist<T: Throwable + ObjectProxy>() -> bool {
    registry().enlist::<T>()
}

/// Translates the pending exception through the process-wide registry.
///
/// # Errors
///
/// See [`ExceptionRegistry::catch_and_throw`].
pub fn catch_and_throw(ctx: &ThreadContext) -> Result<()> {
    registry().catch_and_throw(ctx)
}

/// Makes a new `class(message)` exception pending on the calling thread.
///
/// Used by native code that reports failures back to the runtime.
///
/// # Errors
///
/// Fails if `class` cannot be resolved or the runtime refuses.
pub fn throw_new(ctx: &ThreadContext, class: &ClassDescriptor, message: &str) -> Result<()> {
    let class_ref = class.resolve(ctx)?;
    if ctx.vm().throw_new(class_ref, message) != JNI_OK {
        return Err(Error::interop(format!("Unable to throw a new {class}.")));
    }
    Ok(())
}

// ============================================================================
// ForeignException
// ============================================================================

/// A translated foreign exception.
pub struct ForeignException {
    class_name: String,
    message: Option<String>,
    throwable: Box<dyn Throwable>,
}

impl ForeignException {
    /// Dotted name of the exception's own class, which may be more specific
    /// than the proxy type it was translated to.
    #[must_use]
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// `getMessage()` as read during translation.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// The proxy chosen by translation.
    #[must_use]
    pub fn throwable(&self) -> &dyn Throwable {
        self.throwable.as_ref()
    }

    /// The pinned exception object.
    #[must_use]
    pub fn raw(&self) -> RawRef {
        self.throwable.object_handle().raw()
    }

    /// True if the proxy is a `T`.
    #[must_use]
    pub fn is<T: Throwable>(&self) -> bool {
        self.throwable.as_any().is::<T>()
    }

    /// The proxy as a `T`, if it is one.
    #[must_use]
    pub fn downcast_ref<T: Throwable>(&self) -> Option<&T> {
        self.throwable.as_any().downcast_ref::<T>()
    }

    /// Consumes the exception, returning the proxy if it is a `T`.
    #[must_use]
    pub fn downcast<T: Throwable>(self) -> Option<T> {
        self.throwable.into_any().downcast::<T>().ok().map(|proxy| *proxy)
    }

    /// Makes the exception pending again on the calling thread, for native
    /// code returning control to the runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RuntimeInterop`] if the runtime refuses.
    pub fn rethrow(&self, ctx: &ThreadContext) -> Result<()> {
        if ctx.vm().throw(self.raw()) != JNI_OK {
            return Err(Error::interop(format!(
                "Unable to rethrow {}.",
                self.class_name
            )));
        }
        Ok(())
    }
}

impl fmt::Display for ForeignException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {message}", self.class_name),
            None => f.write_str(&self.class_name),
        }
    }
}

impl fmt::Debug for ForeignException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignException")
            .field("class_name", &self.class_name)
            .field("message", &self.message)
            .field("throwable", &self.throwable)
            .finish()
    }
}

impl std::error::Error for ForeignException {}

/// Declares an exception proxy type.
///
/// Like [`declare_proxy!`](crate::declare_proxy), and additionally
/// implements [`Throwable`] and adds the type to
/// [`EXCEPTION_FACTORIES`](crate::exception::EXCEPTION_FACTORIES), so the
/// process registry translates to it without any runtime registration.
#[macro_export]
macro_rules! declare_exception {
    ($(#[$meta:meta])* $vis:vis struct $name:ident => $class:literal;) => {
        $crate::declare_proxy! {
            $(#[$meta])*
            $vis struct $name => $class;
        }

        const _: () = {
            fn enlist(registry: &$crate::exception::ExceptionRegistry) -> bool {
                registry.enlist::<$name>()
            }

            #[$crate::__private::linkme::distributed_slice($crate::exception::EXCEPTION_FACTORIES)]
            #[linkme(crate = $crate::__private::linkme)]
            static ENLIST: $crate::exception::Enlister = enlist;
        };

        impl $crate::exception::Throwable for $name {
            fn object_handle(&self) -> &$crate::object::ObjectHandle {
                &self.handle
            }

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }

            fn into_any(
                self: ::std::boxed::Box<Self>,
            ) -> ::std::boxed::Box<dyn ::std::any::Any + ::std::marker::Send + ::std::marker::Sync>
            {
                self
            }
        }
    };
}

#[cfg(all(test, feature = "sandbox"))]
mod tests {
    use super::*;
    use crate::lang::{IllegalArgumentException, JRuntimeException};
    use crate::sandbox::testing;

    crate::declare_exception! {
        struct AppException => "demo/AppException";
    }

    crate::declare_exception! {
        struct ChildException => "demo/ChildException";
    }

    fn raise(ctx: &ThreadContext, class: &str, message: &str) -> Error {
        static RAISE: JMethod<()> = JMethod::new("raise");
        let thrower = ClassDescriptor::for_class("demo/Thrower");
        let class = JString::new(ctx, class).unwrap();
        let message = JString::new(ctx, message).unwrap();
        RAISE
            .call_static(ctx, thrower, &[&class, &message])
            .unwrap_err()
    }

    #[test]
    fn test_exact_match_keeps_dynamic_type() {
        let ctx = testing::attach();
        let err = raise(&ctx, "demo.ChildException", "child");
        let foreign = err.as_foreign().unwrap();
        assert_eq!(foreign.class_name(), "demo.ChildException");
        assert!(foreign.is::<ChildException>());
        assert!(!foreign.is::<AppException>());
        assert_eq!(foreign.message(), Some("child"));
    }

    #[test]
    fn test_subclass_walks_to_registered_ancestor() {
        let ctx = testing::attach();
        let err = raise(&ctx, "demo.GrandchildException", "deep");
        let foreign = err.as_foreign().unwrap();
        assert_eq!(foreign.class_name(), "demo.GrandchildException");
        assert!(foreign.downcast_ref::<ChildException>().is_some());
        assert_eq!(foreign.to_string(), "demo.GrandchildException: deep");
    }

    #[test]
    fn test_builtin_ancestor() {
        let ctx = testing::attach();
        let err = raise(&ctx, "java.lang.ArrayStoreException", "wrong slot");
        let foreign = err.as_foreign().unwrap();
        assert!(foreign.is::<JRuntimeException>());

        let err = raise(&ctx, "java.lang.IllegalArgumentException", "bad");
        let Error::Foreign(foreign) = err else {
            panic!("expected a foreign exception");
        };
        let proxy = foreign.downcast::<IllegalArgumentException>().unwrap();
        assert_eq!(proxy.message(&ctx).unwrap().as_deref(), Some("bad"));
    }

    #[test]
    fn test_unregistered_hierarchy_is_interop_error() {
        let registry = ExceptionRegistry::new();
        assert!(registry.is_empty());
        let ctx = testing::attach();
        let class = ClassDescriptor::for_class("demo.AppException");
        throw_new(&ctx, class, "nobody home").unwrap();

        let err = registry.catch_and_throw(&ctx).unwrap_err();
        match err {
            Error::RuntimeInterop { message } => {
                assert_eq!(message, "Can't find any linked in parent exception for demo.AppException");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(!ctx.vm().exception_check());
    }

    #[test]
    fn test_nothing_pending() {
        let ctx = testing::attach();
        assert!(catch_and_throw(&ctx).is_ok());
    }

    #[test]
    fn test_first_registration_wins() {
        let registry = ExceptionRegistry::new();
        assert!(registry.enlist::<AppException>());
        assert!(!registry.enlist::<AppException>());
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.lookup("demo.AppException").unwrap().class_name(),
            "demo.AppException"
        );
        assert!(registry.lookup("demo/AppException").is_none());
    }

    #[test]
    fn test_rethrow_restores_pending() {
        let ctx = testing::attach();
        let err = raise(&ctx, "demo.AppException", "again");
        let foreign = err.as_foreign().unwrap();
        foreign.rethrow(&ctx).unwrap();
        assert!(ctx.vm().exception_check());

        let again = ctx.check_exception().unwrap_err();
        let again = again.as_foreign().unwrap();
        assert!(again.is::<AppException>());
        assert!(ctx.vm().is_same_object(again.raw(), foreign.raw()));
    }

    #[test]
    fn test_declared_types_register_themselves() {
        let registry = registry();
        assert!(registry.lookup("demo.AppException").is_some());
        assert!(registry.lookup("demo.ChildException").is_some());
        assert!(registry.lookup("demo.GrandchildException").is_none());
        assert!(!enlist::<ChildException>());
        assert!(EXCEPTION_FACTORIES.len() >= registry.len());
    }

    #[test]
    fn test_global_registry_has_builtins() {
        let registry = registry();
        for name in [
            "java.lang.Throwable",
            "java.lang.Exception",
            "java.lang.RuntimeException",
            "java.lang.Error",
            "java.lang.NullPointerException",
            "java.lang.NoSuchFieldError",
        ] {
            assert!(registry.lookup(name).is_some(), "{name} missing");
        }
    }
}
