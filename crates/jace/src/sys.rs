//! Raw host-runtime types and the embedding primitive set.
//!
//! [`HostRuntime`] is the literal boundary to the embedded virtual machine.
//! It mirrors the JNI invocation and native interfaces closely: failures are
//! reported the JNI way, by returning a null reference (or a zero value) and
//! leaving a pending exception on the calling thread, which the bridge then
//! inspects with [`HostRuntime::exception_check`]. Nothing above this module
//! talks to the runtime by any other route.
//!
//! All per-thread state (local reference tables, pending exceptions) is
//! keyed by the calling OS thread, exactly like a `JNIEnv*`.

use std::fmt;

/// JNI status code: success.
pub const JNI_OK: i32 = 0;
/// JNI status code: unknown error.
pub const JNI_ERR: i32 = -1;
/// JNI status code: thread detached from the VM.
pub const JNI_EDETACHED: i32 = -2;
/// JNI status code: JNI version error.
pub const JNI_EVERSION: i32 = -3;
/// JNI status code: not enough memory.
pub const JNI_ENOMEM: i32 = -4;
/// JNI status code: VM already created.
pub const JNI_EEXIST: i32 = -5;
/// JNI status code: invalid arguments.
pub const JNI_EINVAL: i32 = -6;

/// JNI 1.6 version constant.
pub const JNI_VERSION_1_6: i32 = 0x0001_0006;
/// JNI 1.8 version constant.
pub const JNI_VERSION_1_8: i32 = 0x0001_0008;

/// Opaque reference to a host-runtime object (`jobject`).
///
/// `RawRef::NULL` is the null reference. A `RawRef` carries no ownership;
/// whether it is a local or a global reference is known only to whoever
/// obtained it.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct RawRef(u64);

impl RawRef {
    /// The null reference.
    pub const NULL: RawRef = RawRef(0);

    /// Wraps a runtime-specific reference value.
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        RawRef(bits)
    }

    /// Returns the runtime-specific reference value.
    #[must_use]
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    /// Returns true for the null reference.
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for RawRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("RawRef(null)")
        } else {
            write!(f, "RawRef({:#x})", self.0)
        }
    }
}

/// Opaque method identifier (`jmethodID`).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodId(pub u64);

/// Opaque field identifier (`jfieldID`).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldId(pub u64);

/// The closed set of value kinds a call, field or array element can have.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// `Z`
    Boolean,
    /// `B`
    Byte,
    /// `C`
    Char,
    /// `S`
    Short,
    /// `I`
    Int,
    /// `J`
    Long,
    /// `F`
    Float,
    /// `D`
    Double,
    /// `L...;` or `[...`
    Object,
    /// `V`
    Void,
}

impl TypeKind {
    /// Classifies a type signature by its first character.
    ///
    /// ```
    /// use jace::sys::TypeKind;
    ///
    /// assert_eq!(TypeKind::from_signature("I"), Some(TypeKind::Int));
    /// assert_eq!(TypeKind::from_signature("[I"), Some(TypeKind::Object));
    /// assert_eq!(TypeKind::from_signature("Ljava/lang/String;"), Some(TypeKind::Object));
    /// assert_eq!(TypeKind::from_signature("Q"), None);
    /// ```
    #[must_use]
    pub fn from_signature(signature: &str) -> Option<Self> {
        match signature.as_bytes().first()? {
            b'Z' => Some(TypeKind::Boolean),
            b'B' => Some(TypeKind::Byte),
            b'C' => Some(TypeKind::Char),
            b'S' => Some(TypeKind::Short),
            b'I' => Some(TypeKind::Int),
            b'J' => Some(TypeKind::Long),
            b'F' => Some(TypeKind::Float),
            b'D' => Some(TypeKind::Double),
            b'V' => Some(TypeKind::Void),
            b'L' | b'[' => Some(TypeKind::Object),
            _ => None,
        }
    }

    /// The zero value of this kind, which is also what a failed call returns.
    #[must_use]
    pub const fn zero(self) -> RawValue {
        match self {
            TypeKind::Boolean => RawValue::Boolean(false),
            TypeKind::Byte => RawValue::Byte(0),
            TypeKind::Char => RawValue::Char(0),
            TypeKind::Short => RawValue::Short(0),
            TypeKind::Int => RawValue::Int(0),
            TypeKind::Long => RawValue::Long(0),
            TypeKind::Float => RawValue::Float(0.0),
            TypeKind::Double => RawValue::Double(0.0),
            TypeKind::Object => RawValue::Object(RawRef::NULL),
            TypeKind::Void => RawValue::Void,
        }
    }
}

/// A tagged `jvalue`: one primitive scalar or one object reference.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum RawValue {
    /// `jboolean`
    Boolean(bool),
    /// `jbyte`
    Byte(i8),
    /// `jchar`
    Char(u16),
    /// `jshort`
    Short(i16),
    /// `jint`
    Int(i32),
    /// `jlong`
    Long(i64),
    /// `jfloat`
    Float(f32),
    /// `jdouble`
    Double(f64),
    /// `jobject`
    Object(RawRef),
    /// No value
    Void,
}

impl RawValue {
    /// Returns the kind of this value.
    #[must_use]
    pub const fn kind(&self) -> TypeKind {
        match self {
            RawValue::Boolean(_) => TypeKind::Boolean,
            RawValue::Byte(_) => TypeKind::Byte,
            RawValue::Char(_) => TypeKind::Char,
            RawValue::Short(_) => TypeKind::Short,
            RawValue::Int(_) => TypeKind::Int,
            RawValue::Long(_) => TypeKind::Long,
            RawValue::Float(_) => TypeKind::Float,
            RawValue::Double(_) => TypeKind::Double,
            RawValue::Object(_) => TypeKind::Object,
            RawValue::Void => TypeKind::Void,
        }
    }

    /// Returns the object reference, or null for any primitive.
    #[must_use]
    pub const fn as_ref(&self) -> RawRef {
        match self {
            RawValue::Object(r) => *r,
            _ => RawRef::NULL,
        }
    }

    /// Returns the value widened to `i64` for integral kinds.
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match *self {
            RawValue::Boolean(b) => Some(b as i64),
            RawValue::Byte(v) => Some(v as i64),
            RawValue::Char(v) => Some(v as i64),
            RawValue::Short(v) => Some(v as i64),
            RawValue::Int(v) => Some(v as i64),
            RawValue::Long(v) => Some(v),
            _ => None,
        }
    }
}

/// The embedding primitive set of a host runtime.
///
/// Every method acts on behalf of the calling thread. Implementations must
/// be callable concurrently from any number of attached threads.
///
/// Reference-returning methods return `RawRef::NULL` on failure. Calls into
/// managed code return the zero value of the requested kind and leave a
/// pending exception when the callee throws.
pub trait HostRuntime: Send + Sync {
    /// JNI version implemented.
    fn version(&self) -> i32;

    /// Binds the calling thread (idempotent). Returns a JNI status code.
    fn attach_current_thread(&self) -> i32;

    /// Unbinds the calling thread. Returns a JNI status code.
    fn detach_current_thread(&self) -> i32;

    /// `GetEnv`: `JNI_OK` if the calling thread is attached, else
    /// `JNI_EDETACHED`.
    fn get_env(&self) -> i32;

    /// Tears the runtime down. Returns a JNI status code.
    fn destroy(&self) -> i32;

    // ---- references -------------------------------------------------------

    /// `NewLocalRef`
    fn new_local_ref(&self, obj: RawRef) -> RawRef;
    /// `DeleteLocalRef`
    fn delete_local_ref(&self, obj: RawRef);
    /// `NewGlobalRef`
    fn new_global_ref(&self, obj: RawRef) -> RawRef;
    /// `DeleteGlobalRef`
    fn delete_global_ref(&self, obj: RawRef);
    /// `IsSameObject`
    fn is_same_object(&self, a: RawRef, b: RawRef) -> bool;

    // ---- classes ----------------------------------------------------------

    /// `FindClass` with a slash-separated name. Returns a local ref.
    fn find_class(&self, name: &str) -> RawRef;
    /// `GetObjectClass`. Returns a local ref.
    fn get_object_class(&self, obj: RawRef) -> RawRef;
    /// `GetSuperclass`. Returns a local ref, null at the root.
    fn get_superclass(&self, class: RawRef) -> RawRef;
    /// `IsInstanceOf`
    fn is_instance_of(&self, obj: RawRef, class: RawRef) -> bool;

    // ---- members ----------------------------------------------------------

    /// `GetMethodID` / `GetStaticMethodID`.
    fn get_method_id(
        &self,
        class: RawRef,
        name: &str,
        signature: &str,
        is_static: bool,
    ) -> Option<MethodId>;

    /// `GetFieldID` / `GetStaticFieldID`.
    fn get_field_id(
        &self,
        class: RawRef,
        name: &str,
        signature: &str,
        is_static: bool,
    ) -> Option<FieldId>;

    /// `Call<Type>Method` (virtual, no arguments).
    fn call_method(&self, obj: RawRef, method: MethodId, ret: TypeKind) -> RawValue;
    /// `Call<Type>MethodA` (virtual).
    fn call_method_a(
        &self,
        obj: RawRef,
        method: MethodId,
        ret: TypeKind,
        args: &[RawValue],
    ) -> RawValue;
    /// `CallStatic<Type>Method` (no arguments).
    fn call_static_method(&self, class: RawRef, method: MethodId, ret: TypeKind) -> RawValue;
    /// `CallStatic<Type>MethodA`.
    fn call_static_method_a(
        &self,
        class: RawRef,
        method: MethodId,
        ret: TypeKind,
        args: &[RawValue],
    ) -> RawValue;

    /// `NewObject` (no arguments). Returns a local ref.
    fn new_object(&self, class: RawRef, ctor: MethodId) -> RawRef;
    /// `NewObjectA`. Returns a local ref.
    fn new_object_a(&self, class: RawRef, ctor: MethodId, args: &[RawValue]) -> RawRef;

    /// `Get<Type>Field`
    fn get_field(&self, obj: RawRef, field: FieldId, kind: TypeKind) -> RawValue;
    /// `Set<Type>Field`
    fn set_field(&self, obj: RawRef, field: FieldId, value: RawValue);
    /// `GetStatic<Type>Field`
    fn get_static_field(&self, class: RawRef, field: FieldId, kind: TypeKind) -> RawValue;
    /// `SetStatic<Type>Field`
    fn set_static_field(&self, class: RawRef, field: FieldId, value: RawValue);

    // ---- exceptions -------------------------------------------------------

    /// `ExceptionCheck`
    fn exception_check(&self) -> bool;
    /// `ExceptionOccurred`. Returns a local ref or null.
    fn exception_occurred(&self) -> RawRef;
    /// `ExceptionClear`
    fn exception_clear(&self);
    /// `ExceptionDescribe`: prints and clears the pending exception.
    fn exception_describe(&self);
    /// `Throw`
    fn throw(&self, throwable: RawRef) -> i32;
    /// `ThrowNew`
    fn throw_new(&self, class: RawRef, message: &str) -> i32;

    // ---- arrays -----------------------------------------------------------

    /// `New<Type>Array` for primitive kinds. Returns a local ref.
    fn new_primitive_array(&self, kind: TypeKind, length: i32) -> RawRef;
    /// `NewObjectArray`. Returns a local ref.
    fn new_object_array(&self, length: i32, element_class: RawRef, initial: RawRef) -> RawRef;
    /// `GetArrayLength`
    fn get_array_length(&self, array: RawRef) -> i32;
    /// `GetObjectArrayElement` / `Get<Type>ArrayRegion` of length one.
    fn get_array_element(&self, array: RawRef, index: i32, kind: TypeKind) -> RawValue;
    /// `SetObjectArrayElement` / `Set<Type>ArrayRegion` of length one.
    fn set_array_element(&self, array: RawRef, index: i32, value: RawValue);

    // ---- strings ----------------------------------------------------------

    /// `NewStringUTF`. Returns a local ref.
    fn new_string_utf(&self, text: &str) -> RawRef;
    /// `GetStringUTFChars` followed by `ReleaseStringUTFChars`.
    fn get_string_utf_chars(&self, string: RawRef) -> Option<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_ref() {
        assert!(RawRef::NULL.is_null());
        assert!(RawRef::default().is_null());
        assert!(!RawRef::from_bits(7).is_null());
        assert_eq!(RawRef::from_bits(7).to_bits(), 7);
    }

    #[test]
    fn test_type_kind_zero_matches_kind() {
        for kind in [
            TypeKind::Boolean,
            TypeKind::Byte,
            TypeKind::Char,
            TypeKind::Short,
            TypeKind::Int,
            TypeKind::Long,
            TypeKind::Float,
            TypeKind::Double,
            TypeKind::Object,
            TypeKind::Void,
        ] {
            assert_eq!(kind.zero().kind(), kind);
        }
    }

    #[test]
    fn test_raw_value_widening() {
        assert_eq!(RawValue::Char(65).as_i64(), Some(65));
        assert_eq!(RawValue::Boolean(true).as_i64(), Some(1));
        assert_eq!(RawValue::Double(1.0).as_i64(), None);
        assert!(RawValue::Int(3).as_ref().is_null());
    }
}
