//! Class descriptors: per-type metadata with a lazily pinned class handle.
//!
//! Every proxy type owns one [`ClassDescriptor`], usually a `static`. The
//! descriptor stores the raw class name (`java/lang/String`), the type
//! signature (`Ljava/lang/String;`) and, after the first [`resolve`], a
//! global reference to the class that is kept for the rest of the process.
//!
//! Descriptors that cannot be written down statically (array types, classes
//! discovered from a live object) come from a process-wide cache keyed by
//! type signature; see [`ClassDescriptor::cached`].
//!
//! [`resolve`]: ClassDescriptor::resolve

use crate::context::{self, ThreadContext};
use crate::error::{Error, Result};
use crate::refs::{GlobalRef, LocalRef};
use crate::sys::{RawRef, RawValue, TypeKind};
use fxhash::FxHashMap;
use jace_log::trace;
use once_cell::sync::{Lazy, OnceCell};
use parking_lot::RwLock;
use std::borrow::Cow;
use std::fmt;

/// Metadata for one foreign type.
///
/// Concurrent first resolution is serialized per descriptor: exactly one
/// thread performs the lookup and pins the class, the others wait and then
/// observe the same handle.
pub struct ClassDescriptor {
    raw_name: Cow<'static, str>,
    signature: Cow<'static, str>,
    kind: TypeKind,
    pinned: OnceCell<GlobalRef>,
}

const fn kind_of(signature: &str) -> TypeKind {
    let bytes = signature.as_bytes();
    if bytes.is_empty() {
        return TypeKind::Object;
    }
    match bytes[0] {
        b'Z' => TypeKind::Boolean,
        b'B' => TypeKind::Byte,
        b'C' => TypeKind::Char,
        b'S' => TypeKind::Short,
        b'I' => TypeKind::Int,
        b'J' => TypeKind::Long,
        b'F' => TypeKind::Float,
        b'D' => TypeKind::Double,
        b'V' => TypeKind::Void,
        _ => TypeKind::Object,
    }
}

fn primitive_name(kind: TypeKind) -> &'static str {
    match kind {
        TypeKind::Boolean => "boolean",
        TypeKind::Byte => "byte",
        TypeKind::Char => "char",
        TypeKind::Short => "short",
        TypeKind::Int => "int",
        TypeKind::Long => "long",
        TypeKind::Float => "float",
        TypeKind::Double => "double",
        TypeKind::Void => "void",
        TypeKind::Object => "",
    }
}

impl ClassDescriptor {
    /// Creates an unresolved descriptor.
    ///
    /// `raw_name` is the name handed to the runtime's class lookup
    /// (`java/lang/String`, `[I`); `signature` is the type signature used in
    /// method signatures (`Ljava/lang/String;`, `[I`, `I`).
    ///
    /// ```
    /// use jace::descriptor::ClassDescriptor;
    ///
    /// static STRING: ClassDescriptor =
    ///     ClassDescriptor::new("java/lang/String", "Ljava/lang/String;");
    /// assert_eq!(STRING.raw_name(), "java/lang/String");
    /// assert!(!STRING.is_resolved());
    /// ```
    #[must_use]
    pub const fn new(raw_name: &'static str, signature: &'static str) -> Self {
        ClassDescriptor {
            raw_name: Cow::Borrowed(raw_name),
            signature: Cow::Borrowed(signature),
            kind: kind_of(signature),
            pinned: OnceCell::new(),
        }
    }

    fn from_signature(signature: &str) -> Self {
        let kind = kind_of(signature);
        let raw_name = if kind != TypeKind::Object {
            primitive_name(kind).to_owned()
        } else if let Some(class) = signature
            .strip_prefix('L')
            .and_then(|s| s.strip_suffix(';'))
        {
            class.to_owned()
        } else {
            // array classes are looked up by their signature
            signature.to_owned()
        };
        ClassDescriptor {
            raw_name: Cow::Owned(raw_name),
            signature: Cow::Owned(signature.to_owned()),
            kind,
            pinned: OnceCell::new(),
        }
    }

    /// The process-wide descriptor for `signature`, created on first use.
    ///
    /// ```
    /// use jace::descriptor::ClassDescriptor;
    ///
    /// let a = ClassDescriptor::cached("[I");
    /// let b = ClassDescriptor::cached("[I");
    /// assert!(std::ptr::eq(a, b));
    /// assert_eq!(a.raw_name(), "[I");
    /// assert_eq!(ClassDescriptor::cached("J").raw_name(), "long");
    /// ```
    pub fn cached(signature: &str) -> &'static ClassDescriptor {
        static CACHE: Lazy<RwLock<FxHashMap<String, &'static ClassDescriptor>>> =
            Lazy::new(|| RwLock::new(FxHashMap::default()));

        if let Some(descriptor) = CACHE.read().get(signature) {
            return descriptor;
        }

        let mut cache = CACHE.write();
        if let Some(descriptor) = cache.get(signature) {
            return descriptor;
        }
        let descriptor: &'static ClassDescriptor =
            Box::leak(Box::new(ClassDescriptor::from_signature(signature)));
        cache.insert(signature.to_owned(), descriptor);
        descriptor
    }

    /// The cached descriptor for a class given by raw or dotted name.
    pub fn for_class(name: &str) -> &'static ClassDescriptor {
        if name.starts_with('[') {
            return ClassDescriptor::cached(&name.replace('.', "/"));
        }
        ClassDescriptor::cached(&format!("L{};", name.replace('.', "/")))
    }

    /// The cached descriptor for arrays of `element`.
    pub fn array_of(element: &ClassDescriptor) -> &'static ClassDescriptor {
        ClassDescriptor::cached(&format!("[{}", element.type_signature()))
    }

    /// The descriptor of the live object's runtime class.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NullPointer`] for a null handle and
    /// [`Error::RuntimeInterop`] if the class name cannot be read.
    pub fn of_object(ctx: &ThreadContext, obj: RawRef) -> Result<&'static ClassDescriptor> {
        if obj.is_null() {
            return Err(Error::NullPointer {
                operation: "ClassDescriptor::of_object",
            });
        }
        let class = ctx.adopt_local(ctx.vm().get_object_class(obj));
        if class.is_null() {
            ctx.check_exception()?;
            return Err(Error::interop("Unable to retrieve the class of an object."));
        }
        let name = class_name(ctx, class.raw())?;
        Ok(ClassDescriptor::for_class(&name))
    }

    /// The name passed to the runtime's class lookup.
    #[must_use]
    pub fn raw_name(&self) -> &str {
        &self.raw_name
    }

    /// The dotted, human-readable class name.
    #[must_use]
    pub fn dotted_name(&self) -> String {
        self.raw_name.replace('/', ".")
    }

    /// The type signature (`I`, `Ljava/lang/String;`, `[D`).
    #[must_use]
    pub fn type_signature(&self) -> &str {
        &self.signature
    }

    /// The value kind carried by this type.
    #[must_use]
    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    /// True once the class handle has been pinned.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.pinned.get().is_some()
    }

    /// Returns the pinned class handle, resolving it on first call.
    ///
    /// Lookup goes through the thread's class-loader override when one is
    /// installed, otherwise through `FindClass`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClassNotFound`] with the runtime's diagnostic chained
    /// as the cause, or [`Error::RuntimeInterop`] if the handle was pinned by
    /// a different bridge.
    pub fn resolve(&self, ctx: &ThreadContext) -> Result<RawRef> {
        let pinned = self.pinned.get_or_try_init(|| self.load(ctx))?;
        if !std::ptr::eq(pinned.bridge(), ctx.bridge()) {
            return Err(Error::interop(format!(
                "The class {} was resolved through a different runtime.",
                self.dotted_name()
            )));
        }
        Ok(pinned.raw())
    }

    fn load(&self, ctx: &ThreadContext) -> Result<GlobalRef> {
        if self.kind != TypeKind::Object {
            return Err(Error::ClassNotFound {
                name: self.raw_name.to_string(),
                cause: Some("primitive types have no loadable class".to_owned()),
            });
        }

        let class = match context::class_loader(ctx)? {
            Some(loader) => self.load_through(ctx, &loader)?,
            None => ctx.find_class_local(&self.raw_name),
        };

        if class.is_null() || ctx.vm().exception_check() {
            let cause = ctx.check_exception().err().map(|e| e.to_string());
            return Err(Error::ClassNotFound {
                name: self.raw_name.to_string(),
                cause,
            });
        }

        let pinned = class.to_global()?;
        trace!("pinned class {} as {:?}", self.raw_name, pinned.raw());
        Ok(pinned)
    }

    // ClassLoader.loadClass takes the binary (dotted) name.
    fn load_through<'ctx>(
        &self,
        ctx: &'ctx ThreadContext,
        loader: &LocalRef<'ctx>,
    ) -> Result<LocalRef<'ctx>> {
        let vm = ctx.vm();
        let loader_class = ctx.adopt_local(vm.get_object_class(loader.raw()));
        let load_class = vm.get_method_id(
            loader_class.raw(),
            "loadClass",
            "(Ljava/lang/String;)Ljava/lang/Class;",
            false,
        );
        let Some(load_class) = load_class else {
            let cause = ctx.check_exception().err().map(|e| e.to_string());
            return Err(Error::MethodNotFound {
                class: "java.lang.ClassLoader".to_owned(),
                name: "loadClass".to_owned(),
                signature: "(Ljava/lang/String;)Ljava/lang/Class;".to_owned(),
                cause,
            });
        };

        let name = ctx.new_string(&self.dotted_name())?;
        let result = vm.call_method_a(
            loader.raw(),
            load_class,
            TypeKind::Object,
            &[RawValue::Object(name.raw())],
        );
        Ok(ctx.adopt_local(result.as_ref()))
    }
}

impl Clone for ClassDescriptor {
    /// A fresh, unresolved descriptor naming the same class.
    fn clone(&self) -> Self {
        ClassDescriptor {
            raw_name: self.raw_name.clone(),
            signature: self.signature.clone(),
            kind: self.kind,
            pinned: OnceCell::new(),
        }
    }
}

impl PartialEq for ClassDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.signature == other.signature
    }
}

impl Eq for ClassDescriptor {}

impl fmt::Debug for ClassDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDescriptor")
            .field("raw_name", &self.raw_name)
            .field("signature", &self.signature)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

impl fmt::Display for ClassDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dotted_name())
    }
}

/// `Class.getName()` on a class handle, without going through descriptors.
pub(crate) fn class_name(ctx: &ThreadContext, class: RawRef) -> Result<String> {
    let vm = ctx.vm();
    let class_class = ctx.find_class_local("java/lang/Class");
    if class_class.is_null() {
        vm.exception_clear();
        return Err(Error::interop("Unable to find the class, java.lang.Class."));
    }
    let Some(get_name) =
        vm.get_method_id(class_class.raw(), "getName", "()Ljava/lang/String;", false)
    else {
        vm.exception_clear();
        return Err(Error::interop(
            "Unable to find the method, java.lang.Class.getName().",
        ));
    };
    let name = ctx.adopt_local(vm.call_method(class, get_name, TypeKind::Object).as_ref());
    if name.is_null() || vm.exception_check() {
        vm.exception_clear();
        return Err(Error::interop("Unable to retrieve the name of a class."));
    }
    ctx.string_chars(name.raw())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_signature_names() {
        let d = ClassDescriptor::cached("Ljava/util/List;");
        assert_eq!(d.raw_name(), "java/util/List");
        assert_eq!(d.dotted_name(), "java.util.List");
        assert_eq!(d.kind(), TypeKind::Object);
        assert_eq!(d.to_string(), "java.util.List");
    }

    #[test]
    fn test_primitive_names() {
        assert_eq!(ClassDescriptor::cached("Z").raw_name(), "boolean");
        assert_eq!(ClassDescriptor::cached("V").kind(), TypeKind::Void);
        assert_eq!(ClassDescriptor::cached("C").kind(), TypeKind::Char);
    }

    #[test]
    fn test_for_class_accepts_dotted_and_raw() {
        let a = ClassDescriptor::for_class("java.lang.Runnable");
        let b = ClassDescriptor::for_class("java/lang/Runnable");
        assert!(std::ptr::eq(a, b));
        assert_eq!(a.type_signature(), "Ljava/lang/Runnable;");

        let arr = ClassDescriptor::for_class("[Ljava.lang.String;");
        assert_eq!(arr.type_signature(), "[Ljava/lang/String;");
    }

    #[test]
    fn test_array_of() {
        let int = ClassDescriptor::cached("I");
        let ints = ClassDescriptor::array_of(int);
        assert_eq!(ints.type_signature(), "[I");
        assert_eq!(
            ClassDescriptor::array_of(ints).type_signature(),
            "[[I"
        );
    }

    #[test]
    fn test_clone_is_unresolved_and_equal() {
        static D: ClassDescriptor = ClassDescriptor::new("pkg/Thing", "Lpkg/Thing;");
        let c = D.clone();
        assert_eq!(c, D);
        assert!(!c.is_resolved());
        assert_eq!(c.type_signature(), D.type_signature());
    }

    #[test]
    fn test_cache_is_thread_safe() {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                std::thread::spawn(|| {
                    ClassDescriptor::cached("Lpkg/Shared;") as *const ClassDescriptor as usize
                })
            })
            .collect();
        let addrs: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(addrs.windows(2).all(|w| w[0] == w[1]));
    }
}
