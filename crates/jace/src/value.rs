//! The value model: how Rust types cross the bridge.
//!
//! [`JavaType`] ties a Rust type to its foreign descriptor and to the
//! [`RawValue`] transport. Primitive kinds map onto Rust scalars and never
//! touch the reference manager:
//!
//! | Rust   | Foreign   | Signature |
//! |--------|-----------|-----------|
//! | `bool` | `boolean` | `Z`       |
//! | `i8`   | `byte`    | `B`       |
//! | `u16`  | `char`    | `C`       |
//! | `i16`  | `short`   | `S`       |
//! | `i32`  | `int`     | `I`       |
//! | `i64`  | `long`    | `J`       |
//! | `f32`  | `float`   | `F`       |
//! | `f64`  | `double`  | `D`       |
//! | `()`   | `void`    | `V`       |
//!
//! Object proxies implement it through [`declare_proxy!`](crate::declare_proxy).

use crate::context::ThreadContext;
use crate::descriptor::ClassDescriptor;
use crate::error::{Error, Result};
use crate::sys::{RawValue, TypeKind};

/// A Rust type with a foreign counterpart.
pub trait JavaType: Sized {
    /// The per-type descriptor, shared by every value of the type.
    fn class_descriptor() -> &'static ClassDescriptor;

    /// The value as a call argument, field value or array element.
    ///
    /// Object proxies lend their own reference; nothing is allocated.
    fn to_raw(&self) -> RawValue;

    /// Builds a value from a call result, field value or array element.
    ///
    /// Object results are local references owned by the callee's caller;
    /// implementations take ownership and release them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RuntimeInterop`] if `raw` has the wrong kind, or a
    /// reference error if an object proxy cannot pin the handle.
    fn from_raw(ctx: &ThreadContext, raw: RawValue) -> Result<Self>;

    /// The value kind used in calls returning this type.
    fn kind() -> TypeKind {
        Self::class_descriptor().kind()
    }
}

/// A call argument: a value together with its descriptor.
///
/// Blanket-implemented for every [`JavaType`], so heterogeneous arguments
/// can be passed as `&[&dyn Arg]`.
pub trait Arg {
    /// Descriptor contributing to the call signature.
    fn arg_descriptor(&self) -> &'static ClassDescriptor;

    /// The transported value.
    fn arg_value(&self) -> RawValue;
}

impl<T: JavaType> Arg for T {
    fn arg_descriptor(&self) -> &'static ClassDescriptor {
        T::class_descriptor()
    }

    fn arg_value(&self) -> RawValue {
        self.to_raw()
    }
}

fn kind_mismatch(expected: &str, raw: RawValue) -> Error {
    Error::interop(format!(
        "Expected a {expected} value from the runtime but received {:?}.",
        raw.kind()
    ))
}

macro_rules! primitive {
    ($ty:ty, $variant:ident, $name:literal, $sig:literal) => {
        impl JavaType for $ty {
            fn class_descriptor() -> &'static ClassDescriptor {
                static DESCRIPTOR: ClassDescriptor = ClassDescriptor::new($name, $sig);
                &DESCRIPTOR
            }

            fn to_raw(&self) -> RawValue {
                RawValue::$variant(*self)
            }

            fn from_raw(_: &ThreadContext, raw: RawValue) -> Result<Self> {
                match raw {
                    RawValue::$variant(v) => Ok(v),
                    other => Err(kind_mismatch($name, other)),
                }
            }
        }
    };
}

primitive!(bool, Boolean, "boolean", "Z");
primitive!(i8, Byte, "byte", "B");
primitive!(u16, Char, "char", "C");
primitive!(i16, Short, "short", "S");
primitive!(i32, Int, "int", "I");
primitive!(i64, Long, "long", "J");
primitive!(f32, Float, "float", "F");
primitive!(f64, Double, "double", "D");

impl JavaType for () {
    fn class_descriptor() -> &'static ClassDescriptor {
        static DESCRIPTOR: ClassDescriptor = ClassDescriptor::new("void", "V");
        &DESCRIPTOR
    }

    fn to_raw(&self) -> RawValue {
        RawValue::Void
    }

    fn from_raw(_: &ThreadContext, _: RawValue) -> Result<Self> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_descriptors() {
        assert_eq!(i32::class_descriptor().type_signature(), "I");
        assert_eq!(u16::class_descriptor().raw_name(), "char");
        assert_eq!(<()>::class_descriptor().type_signature(), "V");
        assert_eq!(i64::kind(), TypeKind::Long);
        assert_eq!(bool::kind(), TypeKind::Boolean);
    }

    #[test]
    fn test_args_carry_descriptor_and_value() {
        let args: [&dyn Arg; 3] = [&7i32, &true, &2.5f64];
        let sigs: String = args
            .iter()
            .map(|a| a.arg_descriptor().type_signature())
            .collect();
        assert_eq!(sigs, "IZD");
        assert_eq!(args[0].arg_value(), RawValue::Int(7));
        assert_eq!(args[2].arg_value(), RawValue::Double(2.5));
    }
}
