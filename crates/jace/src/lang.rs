//! Built-in `java.lang` exception proxies.
//!
//! Like every declared exception they register themselves at link time,
//! so every foreign exception translates to at least [`JThrowable`].
//! The `J` prefix marks the proxies whose plain names would shadow Rust
//! items (`Error`, `Exception`).

use crate::declare_exception;

declare_exception! {
    /// `java.lang.Throwable`
    pub struct JThrowable => "java/lang/Throwable";
}

declare_exception! {
    /// `java.lang.Exception`
    pub struct JException => "java/lang/Exception";
}

declare_exception! {
    /// `java.lang.RuntimeException`
    pub struct JRuntimeException => "java/lang/RuntimeException";
}

declare_exception! {
    /// `java.lang.Error`
    pub struct JError => "java/lang/Error";
}

declare_exception! {
    /// `java.lang.IllegalArgumentException`
    pub struct IllegalArgumentException => "java/lang/IllegalArgumentException";
}

declare_exception! {
    /// `java.lang.IllegalStateException`
    pub struct IllegalStateException => "java/lang/IllegalStateException";
}

declare_exception! {
    /// `java.lang.NullPointerException`
    pub struct NullPointerException => "java/lang/NullPointerException";
}

declare_exception! {
    /// `java.lang.IndexOutOfBoundsException`
    pub struct IndexOutOfBoundsException => "java/lang/IndexOutOfBoundsException";
}

declare_exception! {
    /// `java.lang.ArrayIndexOutOfBoundsException`
    pub struct ArrayIndexOutOfBoundsException => "java/lang/ArrayIndexOutOfBoundsException";
}

declare_exception! {
    /// `java.lang.UnsupportedOperationException`
    pub struct UnsupportedOperationException => "java/lang/UnsupportedOperationException";
}

declare_exception! {
    /// `java.lang.ClassNotFoundException`
    pub struct ClassNotFoundException => "java/lang/ClassNotFoundException";
}

declare_exception! {
    /// `java.lang.NoSuchMethodError`
    pub struct NoSuchMethodError => "java/lang/NoSuchMethodError";
}

declare_exception! {
    /// `java.lang.NoSuchFieldError`
    pub struct NoSuchFieldError => "java/lang/NoSuchFieldError";
}

#[cfg(all(test, feature = "sandbox"))]
mod tests {
    use super::*;
    use crate::descriptor::ClassDescriptor;
    use crate::exception::{self, Throwable};
    use crate::object::{JObject, ObjectProxy};
    use crate::sandbox::testing;
    use crate::value::JavaType;

    #[test]
    fn test_builtins_translate_to_their_own_type() {
        let ctx = testing::attach();
        exception::throw_new(&ctx, NullPointerException::class_descriptor(), "npe").unwrap();
        let err = ctx.check_exception().unwrap_err();
        let foreign = err.as_foreign().unwrap();
        assert!(foreign.is::<NullPointerException>());
        assert_eq!(foreign.message(), Some("npe"));

        let proxy = foreign.downcast_ref::<NullPointerException>().unwrap();
        assert_eq!(proxy.message(&ctx).unwrap().as_deref(), Some("npe"));
        assert!(proxy
            .is_instance_of(&ctx, JRuntimeException::class_descriptor())
            .unwrap());
    }

    #[test]
    fn test_error_hierarchy() {
        let ctx = testing::attach();
        let oom = ClassDescriptor::for_class("java.lang.OutOfMemoryError");
        exception::throw_new(&ctx, oom, "heap").unwrap();
        let err = ctx.check_exception().unwrap_err();
        let foreign = err.as_foreign().unwrap();
        assert_eq!(foreign.class_name(), "java.lang.OutOfMemoryError");
        assert!(foreign.is::<JError>());
    }

    #[test]
    fn test_null_pointer_from_runtime() {
        let ctx = testing::attach();
        let null = JObject::null();
        let err = null.hash_code(&ctx).unwrap_err();
        if cfg!(feature = "checked") {
            assert!(matches!(err, crate::error::Error::NullPointer { .. }));
        } else {
            assert!(err.as_foreign().unwrap().is::<NullPointerException>());
        }
    }

    #[test]
    fn test_message_absent() {
        let ctx = testing::attach();
        let class = JThrowable::class_descriptor().resolve(&ctx).unwrap();
        let vm = ctx.vm();
        let init = crate::method::resolve_method(
            &ctx,
            IllegalStateException::class_descriptor(),
            "<init>",
            "()V",
            false,
        )
        .unwrap();
        let state = IllegalStateException::class_descriptor().resolve(&ctx).unwrap();
        let raw = ctx.adopt_local(vm.new_object(state, init));
        assert!(vm.is_instance_of(raw.raw(), class));
        assert_eq!(vm.throw(raw.raw()), crate::sys::JNI_OK);

        let err = ctx.check_exception().unwrap_err();
        let foreign = err.as_foreign().unwrap();
        assert_eq!(foreign.message(), None);
        assert_eq!(foreign.to_string(), "java.lang.IllegalStateException");
    }
}
