//! Memoized call sites.
//!
//! A [`JMethod`] names one method and remembers its method id after the
//! first successful lookup. The id and signature are computed once, from
//! the argument descriptors of that first call and the result type `R`:
//!
//! ```no_run
//! use jace::declare_proxy;
//! use jace::method::JMethod;
//!
//! declare_proxy! {
//!     pub struct Calculator => "demo/Calculator";
//! }
//!
//! static ADD: JMethod<i32> = JMethod::new("add");
//!
//! # fn demo(ctx: &jace::context::ThreadContext, calc: &Calculator) -> jace::error::Result<()> {
//! let sum = ADD.call(ctx, calc, &[&2i32, &3i32])?;
//! assert_eq!(sum, 5);
//! # Ok(())
//! # }
//! ```
//!
//! Later calls reuse the memoized pair without looking anything up. Calling
//! one site with different argument types is a programming error; builds
//! with the `checked` feature recompute the signature on every call and
//! report the mismatch.

use crate::context::ThreadContext;
use crate::descriptor::ClassDescriptor;
use crate::error::{Error, Result};
use crate::object::ObjectProxy;
use crate::signature::build_signature;
use crate::sys::{MethodId, RawRef, RawValue};
use crate::value::{Arg, JavaType};
use jace_log::trace;
use once_cell::sync::OnceCell;
use std::fmt;
use std::marker::PhantomData;

/// Looks up a method id, translating failure into
/// [`Error::MethodNotFound`].
///
/// # Errors
///
/// Fails if the class cannot be resolved or the runtime reports no such
/// method; the runtime's diagnostic is chained as the cause.
pub fn resolve_method(
    ctx: &ThreadContext,
    class: &ClassDescriptor,
    name: &str,
    signature: &str,
    is_static: bool,
) -> Result<MethodId> {
    let class_ref = class.resolve(ctx)?;
    let id = ctx.vm().get_method_id(class_ref, name, signature, is_static);
    match id {
        Some(id) if !ctx.vm().exception_check() => {
            trace!("resolved {}.{name}{signature} as {id:?}", class.dotted_name());
            Ok(id)
        }
        _ => {
            let cause = ctx.check_exception().err().map(|e| e.to_string());
            Err(Error::MethodNotFound {
                class: class.dotted_name(),
                name: name.to_owned(),
                signature: signature.to_owned(),
                cause,
            })
        }
    }
}

fn signature_of(args: &[&dyn Arg], result: &ClassDescriptor) -> String {
    let descriptors: Vec<&ClassDescriptor> = args.iter().map(|a| a.arg_descriptor()).collect();
    build_signature(&descriptors, result)
}

fn values_of(args: &[&dyn Arg]) -> Vec<RawValue> {
    args.iter().map(|a| a.arg_value()).collect()
}

/// Memoized `(method id, signature)` of one call site.
struct CallSite {
    name: &'static str,
    cache: OnceCell<(MethodId, String)>,
}

impl CallSite {
    const fn new(name: &'static str) -> Self {
        CallSite {
            name,
            cache: OnceCell::new(),
        }
    }

    fn method_id(
        &self,
        ctx: &ThreadContext,
        class: &ClassDescriptor,
        args: &[&dyn Arg],
        result: &ClassDescriptor,
        is_static: bool,
    ) -> Result<MethodId> {
        let (id, _signature) = self.cache.get_or_try_init(|| {
            let signature = signature_of(args, result);
            let id = resolve_method(ctx, class, self.name, &signature, is_static)?;
            Ok::<_, Error>((id, signature))
        })?;

        #[cfg(feature = "checked")]
        {
            let actual = signature_of(args, result);
            if actual != *_signature {
                return Err(Error::interop(format!(
                    "The call site {}.{} was resolved with signature {} but called with {}.",
                    class.dotted_name(),
                    self.name,
                    _signature,
                    actual
                )));
            }
        }

        Ok(*id)
    }
}

// ============================================================================
// JMethod
// ============================================================================

/// A named method returning `R`, memoized per call site.
///
/// Declare call sites as `static`s so the memoization lasts for the
/// process.
pub struct JMethod<R> {
    site: CallSite,
    _result: PhantomData<fn() -> R>,
}

impl<R> JMethod<R> {
    /// A call site for the method `name`.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        JMethod {
            site: CallSite::new(name),
            _result: PhantomData,
        }
    }

    /// The method name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.site.name
    }

    /// The memoized signature, once resolved.
    #[must_use]
    pub fn signature(&self) -> Option<&str> {
        self.site.cache.get().map(|(_, sig)| sig.as_str())
    }

    /// True once the method id is memoized.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.site.cache.get().is_some()
    }
}

impl<R: JavaType> JMethod<R> {
    /// Calls the method on `receiver`, looked up in `P`'s class.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MethodNotFound`] on the first call if no such
    /// method exists, and the translated exception if the call throws.
    pub fn call<P: ObjectProxy>(
        &self,
        ctx: &ThreadContext,
        receiver: &P,
        args: &[&dyn Arg],
    ) -> Result<R> {
        self.call_on(ctx, P::class_descriptor(), receiver.raw(), args)
    }

    /// Calls the method on a raw receiver, looked up in `class`.
    ///
    /// # Errors
    ///
    /// See [`call`](Self::call). Checked builds reject a null receiver
    /// with [`Error::NullPointer`].
    pub fn call_on(
        &self,
        ctx: &ThreadContext,
        class: &ClassDescriptor,
        receiver: RawRef,
        args: &[&dyn Arg],
    ) -> Result<R> {
        #[cfg(feature = "checked")]
        if receiver.is_null() {
            return Err(Error::NullPointer {
                operation: "JMethod::call",
            });
        }

        let id = self
            .site
            .method_id(ctx, class, args, R::class_descriptor(), false)?;
        let vm = ctx.vm();
        let raw = if args.is_empty() {
            vm.call_method(receiver, id, R::kind())
        } else {
            vm.call_method_a(receiver, id, R::kind(), &values_of(args))
        };
        finish(ctx, raw)
    }

    /// Calls the static method on `class`.
    ///
    /// # Errors
    ///
    /// See [`call`](Self::call).
    pub fn call_static(
        &self,
        ctx: &ThreadContext,
        class: &ClassDescriptor,
        args: &[&dyn Arg],
    ) -> Result<R> {
        let class_ref = class.resolve(ctx)?;
        let id = self
            .site
            .method_id(ctx, class, args, R::class_descriptor(), true)?;
        let vm = ctx.vm();
        let raw = if args.is_empty() {
            vm.call_static_method(class_ref, id, R::kind())
        } else {
            vm.call_static_method_a(class_ref, id, R::kind(), &values_of(args))
        };
        finish(ctx, raw)
    }
}

/// Translates a pending exception, or converts the result.
pub(crate) fn finish<R: JavaType>(ctx: &ThreadContext, raw: RawValue) -> Result<R> {
    if ctx.vm().exception_check() {
        if let RawValue::Object(obj) = raw {
            if !obj.is_null() {
                ctx.delete_local_ref(obj);
            }
        }
        ctx.check_exception()?;
    }
    R::from_raw(ctx, raw)
}

impl<R> fmt::Debug for JMethod<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JMethod")
            .field("name", &self.site.name)
            .field("signature", &self.signature())
            .finish()
    }
}

// ============================================================================
// JConstructor
// ============================================================================

/// A memoized constructor of `T`.
pub struct JConstructor<T> {
    site: CallSite,
    _class: PhantomData<fn() -> T>,
}

impl<T> JConstructor<T> {
    /// A constructor call site.
    #[must_use]
    pub const fn new() -> Self {
        JConstructor {
            site: CallSite::new("<init>"),
            _class: PhantomData,
        }
    }

    /// True once the constructor id is memoized.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.site.cache.get().is_some()
    }
}

impl<T> Default for JConstructor<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ObjectProxy> JConstructor<T> {
    /// `new T(args...)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MethodNotFound`] if no constructor matches the
    /// argument types, and the translated exception if construction throws.
    pub fn construct(&self, ctx: &ThreadContext, args: &[&dyn Arg]) -> Result<T> {
        let class = T::class_descriptor();
        let class_ref = class.resolve(ctx)?;
        let id = self
            .site
            .method_id(ctx, class, args, <()>::class_descriptor(), false)?;
        let vm = ctx.vm();
        let raw = if args.is_empty() {
            vm.new_object(class_ref, id)
        } else {
            vm.new_object_a(class_ref, id, &values_of(args))
        };
        let local = ctx.adopt_local(raw);
        ctx.check_exception()?;
        if local.is_null() {
            return Err(Error::interop(format!(
                "Unable to construct an instance of {class}."
            )));
        }
        T::from_ref(ctx, local.raw())
    }
}

impl<T> fmt::Debug for JConstructor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JConstructor")
            .field("signature", &self.site.cache.get().map(|(_, sig)| sig))
            .finish()
    }
}

#[cfg(all(test, feature = "sandbox"))]
mod tests {
    use super::*;
    use crate::declare_proxy;
    use crate::object::JString;
    use crate::sandbox::{JournalEntry, testing};

    declare_proxy! {
        struct Calculator => "demo/Calculator";
    }

    declare_proxy! {
        struct ScientificCalculator => "demo/ScientificCalculator";
    }

    static NEW: JConstructor<Calculator> = JConstructor::new();
    static NEW_WITH: JConstructor<Calculator> = JConstructor::new();
    static ADD: JMethod<i32> = JMethod::new("add");
    static DESCRIBE: JMethod<JString> = JMethod::new("describe");
    static LAST: JMethod<i32> = JMethod::new("last");
    static SQUARE: JMethod<i32> = JMethod::new("square");
    static VERSION: JMethod<i32> = JMethod::new("version");
    static FAIL: JMethod<()> = JMethod::new("fail");

    #[test]
    fn test_call_with_arguments() {
        let ctx = testing::attach();
        let calc = NEW.construct(&ctx, &[]).unwrap();
        assert_eq!(ADD.call(&ctx, &calc, &[&2i32, &3i32]).unwrap(), 5);
        assert_eq!(ADD.signature(), Some("(II)I"));
        assert_eq!(ADD.call(&ctx, &calc, &[&-4i32, &4i32]).unwrap(), 0);
    }

    #[test]
    fn test_constructor_with_arguments() {
        let ctx = testing::attach();
        let calc = NEW_WITH.construct(&ctx, &[&41i32]).unwrap();
        assert_eq!(LAST.call(&ctx, &calc, &[]).unwrap(), 41);
        let text = DESCRIBE.call(&ctx, &calc, &[]).unwrap();
        assert_eq!(text.to_rust_string(&ctx).unwrap(), "Calculator[41]");
    }

    #[test]
    fn test_virtual_dispatch_through_parent_site() {
        static SCI: JConstructor<ScientificCalculator> = JConstructor::new();
        let ctx = testing::attach();
        let sci = SCI.construct(&ctx, &[]).unwrap();
        let text = DESCRIBE
            .call_on(&ctx, Calculator::class_descriptor(), sci.raw(), &[])
            .unwrap();
        assert_eq!(text.to_rust_string(&ctx).unwrap(), "Scientific");
    }

    #[test]
    fn test_static_calls() {
        let ctx = testing::attach();
        let class = Calculator::class_descriptor();
        assert_eq!(SQUARE.call_static(&ctx, class, &[&9i32]).unwrap(), 81);
        assert_eq!(VERSION.call_static(&ctx, class, &[]).unwrap(), 3);
    }

    #[test]
    fn test_missing_method_reports_signature() {
        static ADD3: JMethod<i32> = JMethod::new("add");
        let ctx = testing::attach();
        let calc = NEW.construct(&ctx, &[]).unwrap();
        let err = ADD3.call(&ctx, &calc, &[&1i32, &2i32, &3i32]).unwrap_err();
        match err {
            Error::MethodNotFound {
                class,
                name,
                signature,
                cause,
            } => {
                assert_eq!(class, "demo.Calculator");
                assert_eq!(name, "add");
                assert_eq!(signature, "(III)I");
                assert!(cause.unwrap().contains("NoSuchMethodError"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(!ADD3.is_resolved());
        assert!(!ctx.vm().exception_check());
    }

    #[test]
    fn test_throwing_method_is_translated() {
        let ctx = testing::attach();
        let calc = NEW.construct(&ctx, &[]).unwrap();
        let err = FAIL.call(&ctx, &calc, &[]).unwrap_err();
        let foreign = err.as_foreign().expect("foreign exception");
        assert_eq!(foreign.class_name(), "java.lang.IllegalStateException");
        assert_eq!(foreign.message(), Some("calculator failure"));
        assert!(!ctx.vm().exception_check());
    }

    #[test]
    fn test_lookup_is_memoized() {
        let (bridge, sandbox) = testing::isolated();
        let ctx = bridge.attach().unwrap();
        let class = ClassDescriptor::new("demo/Calculator", "Ldemo/Calculator;");
        let class_ref = class.resolve(&ctx).unwrap();
        let init = resolve_method(&ctx, &class, "<init>", "()V", false).unwrap();
        let calc = ctx.adopt_local(ctx.vm().new_object(class_ref, init));

        let add: JMethod<i32> = JMethod::new("add");
        assert_eq!(add.call_on(&ctx, &class, calc.raw(), &[&1i32, &1i32]).unwrap(), 2);
        let lookups = sandbox.method_lookups();
        for i in 0..100 {
            assert_eq!(add.call_on(&ctx, &class, calc.raw(), &[&i, &1i32]).unwrap(), i + 1);
        }
        assert_eq!(sandbox.method_lookups(), lookups);

        let with_args = sandbox
            .journal()
            .iter()
            .filter(|e| {
                matches!(e, JournalEntry::Call { method, with_args: true, .. } if method == "add")
            })
            .count();
        assert_eq!(with_args, 101);
    }

    #[cfg(feature = "checked")]
    #[test]
    fn test_checked_rejects_changed_signature() {
        static TWICE: JMethod<i32> = JMethod::new("twice");
        let ctx = testing::attach();
        let calc = NEW.construct(&ctx, &[]).unwrap();
        assert_eq!(TWICE.call(&ctx, &calc, &[&4i32]).unwrap(), 8);
        let err = TWICE.call(&ctx, &calc, &[&4i64]).unwrap_err();
        assert!(matches!(err, Error::RuntimeInterop { .. }));

        let null = Calculator::null();
        assert!(matches!(
            TWICE.call(&ctx, &null, &[&4i32]),
            Err(Error::NullPointer { .. })
        ));
    }
}
