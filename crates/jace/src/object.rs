//! Object proxies.
//!
//! A proxy is a Rust value standing for one foreign object. It embeds an
//! [`ObjectHandle`], which owns exactly one global reference (or none, for
//! null), and exposes per-type operations through [`ObjectProxy`]. Leaf proxy
//! types are generated with [`declare_proxy!`](crate::declare_proxy):
//!
//! ```
//! use jace::declare_proxy;
//! use jace::value::JavaType;
//!
//! declare_proxy! {
//!     /// `java.util.ArrayList`
//!     pub struct ArrayList => "java/util/ArrayList";
//! }
//!
//! assert_eq!(ArrayList::class_descriptor().type_signature(), "Ljava/util/ArrayList;");
//! ```
//!
//! # Ownership
//!
//! Setting a handle pins the new object with a fresh global reference and
//! releases the old one. Cloning ([`ObjectProxy::try_clone`]) and
//! assignment ([`ObjectProxy::assign`]) go through the same path, so two
//! proxies never share a reference. Dropping a proxy releases its reference;
//! failures at that point (typically a runtime that is already gone) are
//! logged and suppressed.

use crate::context::ThreadContext;
use crate::descriptor::ClassDescriptor;
use crate::error::{Error, Result};
use crate::method::{JConstructor, JMethod};
use crate::refs::GlobalRef;
use crate::sys::{RawRef, RawValue};
use crate::value::JavaType;
use jace_log::info;
use std::fmt;

/// Owner of one foreign object's global reference.
#[derive(Default)]
pub struct ObjectHandle {
    global: Option<GlobalRef>,
}

impl ObjectHandle {
    /// A null handle; owns nothing.
    #[must_use]
    pub const fn null() -> Self {
        ObjectHandle { global: None }
    }

    /// Pins `raw` with a new global reference. The caller keeps ownership of
    /// `raw` itself.
    ///
    /// # Errors
    ///
    /// Fails if the global reference cannot be allocated.
    pub fn new(ctx: &ThreadContext, raw: RawRef) -> Result<Self> {
        if raw.is_null() {
            return Ok(ObjectHandle::null());
        }
        Ok(ObjectHandle {
            global: Some(ctx.new_global_ref(raw)?),
        })
    }

    /// Pins a local reference returned by the runtime and releases the
    /// local.
    ///
    /// # Errors
    ///
    /// Fails if the global reference cannot be allocated.
    pub fn adopt_local(ctx: &ThreadContext, raw: RawRef) -> Result<Self> {
        let local = ctx.adopt_local(raw);
        ObjectHandle::new(ctx, local.raw())
    }

    /// [`adopt_local`](Self::adopt_local) for a call result, checking that
    /// the result is an object.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RuntimeInterop`] for a primitive value.
    pub fn from_value(ctx: &ThreadContext, raw: RawValue) -> Result<Self> {
        match raw {
            RawValue::Object(obj) => ObjectHandle::adopt_local(ctx, obj),
            other => Err(Error::interop(format!(
                "Expected an object from the runtime but received {:?}.",
                other.kind()
            ))),
        }
    }

    /// The owned reference, or null.
    #[must_use]
    pub fn raw(&self) -> RawRef {
        self.global.as_ref().map_or(RawRef::NULL, GlobalRef::raw)
    }

    /// True if no object is held.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.global.is_none()
    }

    /// Re-points the handle at `raw`.
    ///
    /// The new reference is pinned before the old one is released, so
    /// setting a handle to its own object is safe.
    ///
    /// # Errors
    ///
    /// Fails if the global reference cannot be allocated; the handle is
    /// unchanged in that case.
    pub fn set(&mut self, ctx: &ThreadContext, raw: RawRef) -> Result<()> {
        let next = ObjectHandle::new(ctx, raw)?;
        *self = next;
        Ok(())
    }

    /// Releases the held reference, leaving the handle null.
    pub fn clear(&mut self) {
        self.global = None;
    }

    /// A new handle with its own global reference to the same object.
    ///
    /// # Errors
    ///
    /// Fails if the global reference cannot be allocated.
    pub fn try_clone(&self, ctx: &ThreadContext) -> Result<Self> {
        ObjectHandle::new(ctx, self.raw())
    }
}

impl fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ObjectHandle").field(&self.raw()).finish()
    }
}

// ============================================================================
// ObjectProxy
// ============================================================================

static TO_STRING: JMethod<JString> = JMethod::new("toString");
static EQUALS: JMethod<bool> = JMethod::new("equals");
static HASH_CODE: JMethod<i32> = JMethod::new("hashCode");

/// Operations shared by every object proxy.
///
/// Calling anything but [`is_null`](Self::is_null) on a null proxy fails
/// the way the runtime fails a null dereference: with a translated
/// `NullPointerException`, or [`Error::NullPointer`] in checked builds.
pub trait ObjectProxy: JavaType {
    /// The embedded handle.
    fn handle(&self) -> &ObjectHandle;

    /// The embedded handle, mutably.
    fn handle_mut(&mut self) -> &mut ObjectHandle;

    /// Wraps a handle.
    fn from_handle(handle: ObjectHandle) -> Self;

    /// Unwraps the handle.
    fn into_handle(self) -> ObjectHandle;

    /// A null proxy.
    fn null() -> Self {
        Self::from_handle(ObjectHandle::null())
    }

    /// Pins `raw`; the caller keeps ownership of `raw`.
    ///
    /// # Errors
    ///
    /// Fails if the global reference cannot be allocated.
    fn from_ref(ctx: &ThreadContext, raw: RawRef) -> Result<Self> {
        ObjectHandle::new(ctx, raw).map(Self::from_handle)
    }

    /// The owned reference.
    fn raw(&self) -> RawRef {
        self.handle().raw()
    }

    /// True if this proxy stands for null.
    fn is_null(&self) -> bool {
        self.handle().is_null()
    }

    /// A proxy with its own reference to the same object.
    ///
    /// # Errors
    ///
    /// Fails if the global reference cannot be allocated.
    fn try_clone(&self, ctx: &ThreadContext) -> Result<Self> {
        self.handle().try_clone(ctx).map(Self::from_handle)
    }

    /// Makes this proxy refer to `other`'s object through a new reference.
    ///
    /// # Errors
    ///
    /// Fails if the global reference cannot be allocated.
    fn assign(&mut self, ctx: &ThreadContext, other: &Self) -> Result<()> {
        let raw = other.raw();
        self.handle_mut().set(ctx, raw)
    }

    /// Converts to the root proxy type.
    fn into_object(self) -> JObject {
        JObject::from_handle(self.into_handle())
    }

    /// The descriptor of the object's runtime class.
    ///
    /// # Errors
    ///
    /// Fails for null or if the class name cannot be read.
    fn dynamic_descriptor(&self, ctx: &ThreadContext) -> Result<&'static ClassDescriptor> {
        ClassDescriptor::of_object(ctx, self.raw())
    }

    /// `Object.toString()`.
    ///
    /// # Errors
    ///
    /// Returns the translated exception if the call throws.
    fn java_to_string(&self, ctx: &ThreadContext) -> Result<String> {
        to_string(ctx, self.raw())
    }

    /// `Object.equals(other)`.
    ///
    /// # Errors
    ///
    /// Returns the translated exception if the call throws.
    fn equals<O: ObjectProxy>(&self, ctx: &ThreadContext, other: &O) -> Result<bool> {
        EQUALS.call_on(
            ctx,
            JObject::class_descriptor(),
            self.raw(),
            &[&ObjectArg(other.raw())],
        )
    }

    /// `Object.hashCode()`.
    ///
    /// # Errors
    ///
    /// Returns the translated exception if the call throws.
    fn hash_code(&self, ctx: &ThreadContext) -> Result<i32> {
        HASH_CODE.call_on(ctx, JObject::class_descriptor(), self.raw(), &[])
    }

    /// Reference identity, `IsSameObject`.
    fn same_object<O: ObjectProxy>(&self, ctx: &ThreadContext, other: &O) -> bool {
        ctx.vm().is_same_object(self.raw(), other.raw())
    }

    /// `IsInstanceOf` against `class`.
    ///
    /// # Errors
    ///
    /// Fails if `class` cannot be resolved.
    fn is_instance_of(&self, ctx: &ThreadContext, class: &ClassDescriptor) -> Result<bool> {
        let class = class.resolve(ctx)?;
        Ok(ctx.vm().is_instance_of(self.raw(), class))
    }

    /// Re-types this object as `T` after an instance check.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RuntimeInterop`] if the object is not a `T`.
    fn cast<T: ObjectProxy>(&self, ctx: &ThreadContext) -> Result<T> {
        if !self.is_instance_of(ctx, T::class_descriptor())? {
            let actual = self.dynamic_descriptor(ctx)?;
            return Err(Error::interop(format!(
                "Unable to cast an instance of {actual} to {}.",
                T::class_descriptor()
            )));
        }
        T::from_ref(ctx, self.raw())
    }
}

/// An `Object`-typed argument borrowed from a raw reference.
struct ObjectArg(RawRef);

impl crate::value::Arg for ObjectArg {
    fn arg_descriptor(&self) -> &'static ClassDescriptor {
        JObject::class_descriptor()
    }

    fn arg_value(&self) -> RawValue {
        RawValue::Object(self.0)
    }
}

/// Declares an object proxy type for a foreign class.
///
/// The generated struct embeds an [`ObjectHandle`] and implements
/// [`JavaType`](crate::value::JavaType), [`ObjectProxy`] and `Debug`. Its
/// descriptor is a `static`, resolved on first use and pinned for the rest
/// of the process.
#[macro_export]
macro_rules! declare_proxy {
    ($(#[$meta:meta])* $vis:vis struct $name:ident => $class:literal;) => {
        $(#[$meta])*
        $vis struct $name {
            handle: $crate::object::ObjectHandle,
        }

        impl $crate::value::JavaType for $name {
            fn class_descriptor() -> &'static $crate::descriptor::ClassDescriptor {
                static DESCRIPTOR: $crate::descriptor::ClassDescriptor =
                    $crate::descriptor::ClassDescriptor::new($class, concat!("L", $class, ";"));
                &DESCRIPTOR
            }

            fn to_raw(&self) -> $crate::sys::RawValue {
                $crate::sys::RawValue::Object(self.handle.raw())
            }

            fn from_raw(
                ctx: &$crate::context::ThreadContext,
                raw: $crate::sys::RawValue,
            ) -> $crate::error::Result<Self> {
                $crate::object::ObjectHandle::from_value(ctx, raw).map(|handle| $name { handle })
            }
        }

        impl $crate::object::ObjectProxy for $name {
            fn handle(&self) -> &$crate::object::ObjectHandle {
                &self.handle
            }

            fn handle_mut(&mut self) -> &mut $crate::object::ObjectHandle {
                &mut self.handle
            }

            fn from_handle(handle: $crate::object::ObjectHandle) -> Self {
                $name { handle }
            }

            fn into_handle(self) -> $crate::object::ObjectHandle {
                self.handle
            }
        }

        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.debug_tuple(stringify!($name)).field(&self.handle.raw()).finish()
            }
        }
    };
}

declare_proxy! {
    /// `java.lang.Object`
    pub struct JObject => "java/lang/Object";
}

declare_proxy! {
    /// `java.lang.Class`
    pub struct JClass => "java/lang/Class";
}

declare_proxy! {
    /// `java.lang.String`
    pub struct JString => "java/lang/String";
}

impl JObject {
    /// `new Object()`.
    ///
    /// # Errors
    ///
    /// Returns the translated exception if construction throws.
    pub fn new(ctx: &ThreadContext) -> Result<Self> {
        static CTOR: JConstructor<JObject> = JConstructor::new();
        CTOR.construct(ctx, &[])
    }
}

static GET_NAME: JMethod<JString> = JMethod::new("getName");
static GET_SUPERCLASS: JMethod<JClass> = JMethod::new("getSuperclass");

impl JClass {
    /// The pinned class of `descriptor`, as a proxy.
    ///
    /// # Errors
    ///
    /// Fails if the class cannot be resolved.
    pub fn for_descriptor(ctx: &ThreadContext, descriptor: &ClassDescriptor) -> Result<Self> {
        let raw = descriptor.resolve(ctx)?;
        JClass::from_ref(ctx, raw)
    }

    /// `Class.getName()`: dotted for classes, `[I`-style for arrays.
    ///
    /// # Errors
    ///
    /// Returns the translated exception if the call throws.
    pub fn name(&self, ctx: &ThreadContext) -> Result<String> {
        GET_NAME
            .call(ctx, self, &[])?
            .to_rust_string(ctx)
    }

    /// `Class.getSuperclass()`; null for `java.lang.Object`.
    ///
    /// # Errors
    ///
    /// Returns the translated exception if the call throws.
    pub fn superclass(&self, ctx: &ThreadContext) -> Result<JClass> {
        GET_SUPERCLASS.call(ctx, self, &[])
    }
}

static LENGTH: JMethod<i32> = JMethod::new("length");

impl JString {
    /// Creates a foreign string.
    ///
    /// # Errors
    ///
    /// Returns the translated exception if allocation throws.
    pub fn new(ctx: &ThreadContext, text: &str) -> Result<Self> {
        let local = ctx.new_string(text)?;
        JString::from_ref(ctx, local.raw())
    }

    /// The characters as a Rust string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NullPointer`] for a null string.
    pub fn to_rust_string(&self, ctx: &ThreadContext) -> Result<String> {
        if self.is_null() {
            return Err(Error::NullPointer {
                operation: "JString::to_rust_string",
            });
        }
        ctx.string_chars(self.raw())
    }

    /// The characters, or `None` for a null string.
    ///
    /// # Errors
    ///
    /// Fails if the characters cannot be retrieved.
    pub fn to_option(&self, ctx: &ThreadContext) -> Result<Option<String>> {
        if self.is_null() {
            return Ok(None);
        }
        ctx.string_chars(self.raw()).map(Some)
    }

    /// `String.length()` in UTF-16 units.
    ///
    /// # Errors
    ///
    /// Returns the translated exception if the call throws.
    pub fn length(&self, ctx: &ThreadContext) -> Result<i32> {
        LENGTH.call(ctx, self, &[])
    }
}

// ============================================================================
// Diagnostics
// ============================================================================

/// `obj.toString()` as a Rust string; `"null"` for a null reference.
///
/// # Errors
///
/// Returns the translated exception if `toString` throws.
pub fn to_string(ctx: &ThreadContext, obj: RawRef) -> Result<String> {
    if obj.is_null() {
        return Ok("null".to_owned());
    }
    let text = TO_STRING.call_on(ctx, JObject::class_descriptor(), obj, &[])?;
    Ok(text.to_option(ctx)?.unwrap_or_else(|| "null".to_owned()))
}

/// Logs `obj.toString()` at info level.
///
/// # Errors
///
/// Returns the translated exception if `toString` throws.
pub fn print(ctx: &ThreadContext, obj: RawRef) -> Result<()> {
    let text = to_string(ctx, obj)?;
    info!("{}", text);
    Ok(())
}

/// Logs the name of `obj`'s class at info level.
///
/// # Errors
///
/// Fails for null or if the class name cannot be read.
pub fn print_class(ctx: &ThreadContext, obj: RawRef) -> Result<()> {
    let class = ClassDescriptor::of_object(ctx, obj)?;
    info!("{}", class);
    Ok(())
}

#[cfg(all(test, feature = "sandbox"))]
mod tests {
    use super::*;
    use crate::sandbox::testing;

    #[test]
    fn test_assign_never_aliases() {
        let ctx = testing::attach();
        let a = JString::new(&ctx, "shared").unwrap();
        let mut b = JString::null();
        assert!(b.is_null());

        b.assign(&ctx, &a).unwrap();
        assert_ne!(a.raw(), b.raw());
        assert!(a.same_object(&ctx, &b));
        assert_eq!(b.to_rust_string(&ctx).unwrap(), "shared");

        let c = b.try_clone(&ctx).unwrap();
        assert_ne!(c.raw(), b.raw());
        drop(b);
        assert_eq!(c.to_rust_string(&ctx).unwrap(), "shared");
    }

    #[test]
    fn test_self_assignment_keeps_object() {
        let ctx = testing::attach();
        let mut a = JString::new(&ctx, "me").unwrap();
        let raw = a.raw();
        a.handle_mut().set(&ctx, raw).unwrap();
        assert_eq!(a.to_rust_string(&ctx).unwrap(), "me");
    }

    #[test]
    fn test_drop_releases_reference() {
        let (bridge, sandbox) = testing::isolated();
        let ctx = bridge.attach().unwrap();
        let before = sandbox.global_ref_count();
        let s = JString::new(&ctx, "temporary").unwrap();
        assert_eq!(sandbox.global_ref_count(), before + 1);
        drop(s);
        assert_eq!(sandbox.global_ref_count(), before);
    }

    #[test]
    fn test_static_and_dynamic_descriptors_agree() {
        let ctx = testing::attach();
        let s = JString::new(&ctx, "typed").unwrap();
        assert_eq!(s.dynamic_descriptor(&ctx).unwrap(), JString::class_descriptor());

        let o = JObject::new(&ctx).unwrap();
        assert_eq!(o.dynamic_descriptor(&ctx).unwrap(), JObject::class_descriptor());

        let class = JClass::for_descriptor(&ctx, JString::class_descriptor()).unwrap();
        assert_eq!(class.dynamic_descriptor(&ctx).unwrap(), JClass::class_descriptor());
    }

    #[test]
    fn test_object_helpers() {
        let ctx = testing::attach();
        let a = JString::new(&ctx, "same").unwrap();
        let b = JString::new(&ctx, "same").unwrap();
        assert!(!a.same_object(&ctx, &b));
        assert!(a.equals(&ctx, &b).unwrap());
        assert_eq!(a.hash_code(&ctx).unwrap(), b.hash_code(&ctx).unwrap());
        assert_eq!(a.java_to_string(&ctx).unwrap(), "same");
        assert_eq!(a.length(&ctx).unwrap(), 4);
        assert!(a.is_instance_of(&ctx, JObject::class_descriptor()).unwrap());

        let o = JObject::new(&ctx).unwrap();
        assert!(o.java_to_string(&ctx).unwrap().starts_with("java.lang.Object@"));
        assert_eq!(to_string(&ctx, RawRef::NULL).unwrap(), "null");
        print(&ctx, o.raw()).unwrap();
        print_class(&ctx, o.raw()).unwrap();
    }

    #[test]
    fn test_cast() {
        let ctx = testing::attach();
        let s = JString::new(&ctx, "cast me").unwrap().into_object();
        let back: JString = s.cast(&ctx).unwrap();
        assert_eq!(back.to_rust_string(&ctx).unwrap(), "cast me");

        let err = s.cast::<JClass>(&ctx).unwrap_err();
        assert!(matches!(err, Error::RuntimeInterop { .. }));
    }

    #[test]
    fn test_class_names() {
        let ctx = testing::attach();
        let class = JClass::for_descriptor(&ctx, JString::class_descriptor()).unwrap();
        assert_eq!(class.name(&ctx).unwrap(), "java.lang.String");
        let parent = class.superclass(&ctx).unwrap();
        assert_eq!(parent.name(&ctx).unwrap(), "java.lang.Object");
        assert!(parent.superclass(&ctx).unwrap().is_null());
    }
}
