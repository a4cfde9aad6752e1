//! The host runtime behind a real JNI function table.
//!
//! [`JniRuntime`] implements [`HostRuntime`] by dispatching through the
//! `JavaVM` invocation table and the per-thread `JNIEnv` native table. Only
//! the slots the bridge uses are typed; the rest are padding so the layout
//! matches `jni.h` index for index.
//!
//! Calls always go through the `...A` (jvalue array) entry points, so no
//! variadic or `va_list` slot is ever invoked.
//!
//! Strings cross the table in modified UTF-8: NUL is `C0 80` and characters
//! outside the BMP travel as two encoded surrogates.

#![allow(non_camel_case_types)]
#![allow(non_snake_case)]

use crate::sys::{
    FieldId, HostRuntime, JNI_EDETACHED, JNI_ERR, JNI_OK, MethodId, RawRef, RawValue, TypeKind,
};
use std::any::Any;
use std::ffi::{CStr, c_char, c_void};
use std::fmt;
use std::ptr;
use std::sync::Arc;

// =============================================================================
// Raw types
// =============================================================================

pub type jint = i32;
pub type jlong = i64;
pub type jbyte = i8;
pub type jboolean = u8;
pub type jchar = u16;
pub type jshort = i16;
pub type jfloat = f32;
pub type jdouble = f64;
pub type jsize = jint;

pub type jobject = *mut c_void;
pub type jclass = jobject;
pub type jstring = jobject;
pub type jarray = jobject;
pub type jthrowable = jobject;

pub type jmethodID = *mut c_void;
pub type jfieldID = *mut c_void;

#[repr(C)]
#[derive(Copy, Clone)]
pub union jvalue {
    pub z: jboolean,
    pub b: jbyte,
    pub c: jchar,
    pub s: jshort,
    pub i: jint,
    pub j: jlong,
    pub f: jfloat,
    pub d: jdouble,
    pub l: jobject,
}

/// `JNIEnv*` points at one of these.
pub type JNIEnv = *const JNINativeInterface;

/// `JavaVM*` points at one of these.
pub type JavaVM = *const JNIInvokeInterface;

type Slot = *mut c_void;

/// The `Call<Type>Method`, `...V` and `...A` triple for one result type.
#[repr(C)]
pub struct CallGroup<R> {
    pub variadic: Slot,
    pub va_list: Slot,
    pub array: Option<unsafe extern "system" fn(*mut JNIEnv, jobject, jmethodID, *const jvalue) -> R>,
}

pub type GetField<R> = Option<unsafe extern "system" fn(*mut JNIEnv, jobject, jfieldID) -> R>;
pub type SetField<V> = Option<unsafe extern "system" fn(*mut JNIEnv, jobject, jfieldID, V)>;
pub type NewArray = Option<unsafe extern "system" fn(*mut JNIEnv, jsize) -> jarray>;
pub type GetRegion<T> =
    Option<unsafe extern "system" fn(*mut JNIEnv, jarray, jsize, jsize, *mut T)>;
pub type SetRegion<T> =
    Option<unsafe extern "system" fn(*mut JNIEnv, jarray, jsize, jsize, *const T)>;

/// `struct JNINativeInterface_`, slots 0 through 228.
#[repr(C)]
pub struct JNINativeInterface {
    pub reserved: [Slot; 4],
    pub GetVersion: Option<unsafe extern "system" fn(*mut JNIEnv) -> jint>,
    pub _5: [Slot; 1],
    pub FindClass: Option<unsafe extern "system" fn(*mut JNIEnv, *const c_char) -> jclass>,
    pub _7: [Slot; 3],
    pub GetSuperclass: Option<unsafe extern "system" fn(*mut JNIEnv, jclass) -> jclass>,
    pub _11: [Slot; 2],
    pub Throw: Option<unsafe extern "system" fn(*mut JNIEnv, jthrowable) -> jint>,
    pub ThrowNew: Option<unsafe extern "system" fn(*mut JNIEnv, jclass, *const c_char) -> jint>,
    pub ExceptionOccurred: Option<unsafe extern "system" fn(*mut JNIEnv) -> jthrowable>,
    pub ExceptionDescribe: Option<unsafe extern "system" fn(*mut JNIEnv)>,
    pub ExceptionClear: Option<unsafe extern "system" fn(*mut JNIEnv)>,
    pub _18: [Slot; 3],
    pub NewGlobalRef: Option<unsafe extern "system" fn(*mut JNIEnv, jobject) -> jobject>,
    pub DeleteGlobalRef: Option<unsafe extern "system" fn(*mut JNIEnv, jobject)>,
    pub DeleteLocalRef: Option<unsafe extern "system" fn(*mut JNIEnv, jobject)>,
    pub IsSameObject: Option<unsafe extern "system" fn(*mut JNIEnv, jobject, jobject) -> jboolean>,
    pub NewLocalRef: Option<unsafe extern "system" fn(*mut JNIEnv, jobject) -> jobject>,
    pub _26: [Slot; 4],
    pub NewObjectA:
        Option<unsafe extern "system" fn(*mut JNIEnv, jclass, jmethodID, *const jvalue) -> jobject>,
    pub GetObjectClass: Option<unsafe extern "system" fn(*mut JNIEnv, jobject) -> jclass>,
    pub IsInstanceOf: Option<unsafe extern "system" fn(*mut JNIEnv, jobject, jclass) -> jboolean>,
    pub GetMethodID: Option<
        unsafe extern "system" fn(*mut JNIEnv, jclass, *const c_char, *const c_char) -> jmethodID,
    >,
    pub CallObjectMethod: CallGroup<jobject>,
    pub CallBooleanMethod: CallGroup<jboolean>,
    pub CallByteMethod: CallGroup<jbyte>,
    pub CallCharMethod: CallGroup<jchar>,
    pub CallShortMethod: CallGroup<jshort>,
    pub CallIntMethod: CallGroup<jint>,
    pub CallLongMethod: CallGroup<jlong>,
    pub CallFloatMethod: CallGroup<jfloat>,
    pub CallDoubleMethod: CallGroup<jdouble>,
    pub CallVoidMethod: CallGroup<()>,
    pub _nonvirtual: [Slot; 30],
    pub GetFieldID: Option<
        unsafe extern "system" fn(*mut JNIEnv, jclass, *const c_char, *const c_char) -> jfieldID,
    >,
    pub GetObjectField: GetField<jobject>,
    pub GetBooleanField: GetField<jboolean>,
    pub GetByteField: GetField<jbyte>,
    pub GetCharField: GetField<jchar>,
    pub GetShortField: GetField<jshort>,
    pub GetIntField: GetField<jint>,
    pub GetLongField: GetField<jlong>,
    pub GetFloatField: GetField<jfloat>,
    pub GetDoubleField: GetField<jdouble>,
    pub SetObjectField: SetField<jobject>,
    pub SetBooleanField: SetField<jboolean>,
    pub SetByteField: SetField<jbyte>,
    pub SetCharField: SetField<jchar>,
    pub SetShortField: SetField<jshort>,
    pub SetIntField: SetField<jint>,
    pub SetLongField: SetField<jlong>,
    pub SetFloatField: SetField<jfloat>,
    pub SetDoubleField: SetField<jdouble>,
    pub GetStaticMethodID: Option<
        unsafe extern "system" fn(*mut JNIEnv, jclass, *const c_char, *const c_char) -> jmethodID,
    >,
    pub CallStaticObjectMethod: CallGroup<jobject>,
    pub CallStaticBooleanMethod: CallGroup<jboolean>,
    pub CallStaticByteMethod: CallGroup<jbyte>,
    pub CallStaticCharMethod: CallGroup<jchar>,
    pub CallStaticShortMethod: CallGroup<jshort>,
    pub CallStaticIntMethod: CallGroup<jint>,
    pub CallStaticLongMethod: CallGroup<jlong>,
    pub CallStaticFloatMethod: CallGroup<jfloat>,
    pub CallStaticDoubleMethod: CallGroup<jdouble>,
    pub CallStaticVoidMethod: CallGroup<()>,
    pub GetStaticFieldID: Option<
        unsafe extern "system" fn(*mut JNIEnv, jclass, *const c_char, *const c_char) -> jfieldID,
    >,
    pub GetStaticObjectField: GetField<jobject>,
    pub GetStaticBooleanField: GetField<jboolean>,
    pub GetStaticByteField: GetField<jbyte>,
    pub GetStaticCharField: GetField<jchar>,
    pub GetStaticShortField: GetField<jshort>,
    pub GetStaticIntField: GetField<jint>,
    pub GetStaticLongField: GetField<jlong>,
    pub GetStaticFloatField: GetField<jfloat>,
    pub GetStaticDoubleField: GetField<jdouble>,
    pub SetStaticObjectField: SetField<jobject>,
    pub SetStaticBooleanField: SetField<jboolean>,
    pub SetStaticByteField: SetField<jbyte>,
    pub SetStaticCharField: SetField<jchar>,
    pub SetStaticShortField: SetField<jshort>,
    pub SetStaticIntField: SetField<jint>,
    pub SetStaticLongField: SetField<jlong>,
    pub SetStaticFloatField: SetField<jfloat>,
    pub SetStaticDoubleField: SetField<jdouble>,
    pub _163: [Slot; 4],
    pub NewStringUTF: Option<unsafe extern "system" fn(*mut JNIEnv, *const c_char) -> jstring>,
    pub _168: [Slot; 1],
    pub GetStringUTFChars:
        Option<unsafe extern "system" fn(*mut JNIEnv, jstring, *mut jboolean) -> *const c_char>,
    pub ReleaseStringUTFChars: Option<unsafe extern "system" fn(*mut JNIEnv, jstring, *const c_char)>,
    pub GetArrayLength: Option<unsafe extern "system" fn(*mut JNIEnv, jarray) -> jsize>,
    pub NewObjectArray:
        Option<unsafe extern "system" fn(*mut JNIEnv, jsize, jclass, jobject) -> jarray>,
    pub GetObjectArrayElement: Option<unsafe extern "system" fn(*mut JNIEnv, jarray, jsize) -> jobject>,
    pub SetObjectArrayElement: Option<unsafe extern "system" fn(*mut JNIEnv, jarray, jsize, jobject)>,
    pub NewBooleanArray: NewArray,
    pub NewByteArray: NewArray,
    pub NewCharArray: NewArray,
    pub NewShortArray: NewArray,
    pub NewIntArray: NewArray,
    pub NewLongArray: NewArray,
    pub NewFloatArray: NewArray,
    pub NewDoubleArray: NewArray,
    pub _183: [Slot; 16],
    pub GetBooleanArrayRegion: GetRegion<jboolean>,
    pub GetByteArrayRegion: GetRegion<jbyte>,
    pub GetCharArrayRegion: GetRegion<jchar>,
    pub GetShortArrayRegion: GetRegion<jshort>,
    pub GetIntArrayRegion: GetRegion<jint>,
    pub GetLongArrayRegion: GetRegion<jlong>,
    pub GetFloatArrayRegion: GetRegion<jfloat>,
    pub GetDoubleArrayRegion: GetRegion<jdouble>,
    pub SetBooleanArrayRegion: SetRegion<jboolean>,
    pub SetByteArrayRegion: SetRegion<jbyte>,
    pub SetCharArrayRegion: SetRegion<jchar>,
    pub SetShortArrayRegion: SetRegion<jshort>,
    pub SetIntArrayRegion: SetRegion<jint>,
    pub SetLongArrayRegion: SetRegion<jlong>,
    pub SetFloatArrayRegion: SetRegion<jfloat>,
    pub SetDoubleArrayRegion: SetRegion<jdouble>,
    pub _215: [Slot; 4],
    pub GetJavaVM: Option<unsafe extern "system" fn(*mut JNIEnv, *mut *mut JavaVM) -> jint>,
    pub _220: [Slot; 8],
    pub ExceptionCheck: Option<unsafe extern "system" fn(*mut JNIEnv) -> jboolean>,
}

/// `struct JNIInvokeInterface_`.
#[repr(C)]
pub struct JNIInvokeInterface {
    pub reserved: [Slot; 3],
    pub DestroyJavaVM: Option<unsafe extern "system" fn(*mut JavaVM) -> jint>,
    pub AttachCurrentThread:
        Option<unsafe extern "system" fn(*mut JavaVM, *mut *mut c_void, *mut c_void) -> jint>,
    pub DetachCurrentThread: Option<unsafe extern "system" fn(*mut JavaVM) -> jint>,
    pub GetEnv: Option<unsafe extern "system" fn(*mut JavaVM, *mut *mut c_void, jint) -> jint>,
    pub AttachCurrentThreadAsDaemon:
        Option<unsafe extern "system" fn(*mut JavaVM, *mut *mut c_void, *mut c_void) -> jint>,
}

#[repr(C)]
pub struct JavaVMOption {
    pub optionString: *mut c_char,
    pub extraInfo: *mut c_void,
}

#[repr(C)]
pub struct JavaVMInitArgs {
    pub version: jint,
    pub nOptions: jint,
    pub options: *mut JavaVMOption,
    pub ignoreUnrecognized: jboolean,
}

/// `JNI_CreateJavaVM`
pub type CreateJavaVm =
    unsafe extern "system" fn(*mut *mut JavaVM, *mut *mut c_void, *mut c_void) -> jint;

/// `JNI_GetCreatedJavaVMs`
pub type GetCreatedJavaVms = unsafe extern "system" fn(*mut *mut JavaVM, jsize, *mut jsize) -> jint;

/// Calls a table slot, or yields `$default` when the slot is empty.
macro_rules! jni {
    ($table:expr, $($slot:ident).+ ($($arg:expr),*) or $default:expr) => {
        match (**$table).$($slot).+ {
            Some(f) => f($table $(, $arg)*),
            None => $default,
        }
    };
}

// =============================================================================
// Modified UTF-8
// =============================================================================

/// Encodes `text` as NUL-terminated modified UTF-8.
pub fn encode_modified_utf8(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() + 1);
    for unit in text.encode_utf16() {
        match unit {
            0x0001..=0x007f => out.push(unit as u8),
            0x0000 | 0x0080..=0x07ff => {
                out.push(0xc0 | (unit >> 6) as u8);
                out.push(0x80 | (unit & 0x3f) as u8);
            }
            _ => {
                out.push(0xe0 | (unit >> 12) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3f) as u8);
                out.push(0x80 | (unit & 0x3f) as u8);
            }
        }
    }
    out.push(0);
    out
}

/// Decodes modified UTF-8 (without the terminator). `None` on malformed
/// input or unpaired surrogates.
pub fn decode_modified_utf8(bytes: &[u8]) -> Option<String> {
    fn tail(iter: &mut impl Iterator<Item = u8>) -> Option<u16> {
        let b = iter.next()?;
        (b & 0xc0 == 0x80).then_some(u16::from(b & 0x3f))
    }

    let mut units = Vec::with_capacity(bytes.len());
    let mut iter = bytes.iter().copied();
    while let Some(b) = iter.next() {
        let unit = match b {
            0x01..=0x7f => u16::from(b),
            0xc0..=0xdf => (u16::from(b & 0x1f) << 6) | tail(&mut iter)?,
            0xe0..=0xef => {
                let hi = tail(&mut iter)?;
                let lo = tail(&mut iter)?;
                (u16::from(b & 0x0f) << 12) | (hi << 6) | lo
            }
            _ => return None,
        };
        units.push(unit);
    }
    String::from_utf16(&units).ok()
}

// =============================================================================
// Runtime
// =============================================================================

fn to_obj(raw: RawRef) -> jobject {
    raw.to_bits() as usize as jobject
}

fn from_obj(obj: jobject) -> RawRef {
    RawRef::from_bits(obj as usize as u64)
}

fn to_jvalue(value: RawValue) -> jvalue {
    match value {
        RawValue::Boolean(v) => jvalue { z: jboolean::from(v) },
        RawValue::Byte(v) => jvalue { b: v },
        RawValue::Char(v) => jvalue { c: v },
        RawValue::Short(v) => jvalue { s: v },
        RawValue::Int(v) => jvalue { i: v },
        RawValue::Long(v) => jvalue { j: v },
        RawValue::Float(v) => jvalue { f: v },
        RawValue::Double(v) => jvalue { d: v },
        RawValue::Object(r) => jvalue { l: to_obj(r) },
        RawValue::Void => jvalue { j: 0 },
    }
}

fn to_jvalues(args: &[RawValue]) -> Vec<jvalue> {
    args.iter().copied().map(to_jvalue).collect()
}

/// A JNI `JavaVM` driven through its function tables.
///
/// Every call looks up the calling thread's `JNIEnv` with `GetEnv`; on a
/// thread that is not attached the call does nothing and returns the kind's
/// zero value, a null reference or `JNI_EDETACHED`.
pub struct JniRuntime {
    vm: *mut JavaVM,
    version: jint,
    _owner: Option<Arc<dyn Any + Send + Sync>>,
}

// SAFETY: a JavaVM pointer is valid on every thread; per-thread state is
// reached only through the JNIEnv fetched on the calling thread.
unsafe impl Send for JniRuntime {}
unsafe impl Sync for JniRuntime {}

impl JniRuntime {
    /// Wraps a `JavaVM*`, requesting `version` from `GetEnv`.
    ///
    /// # Safety
    ///
    /// `vm` must point to a live `JavaVM` whose invocation table stays valid
    /// until [`HostRuntime::destroy`] is called or the runtime is dropped.
    pub unsafe fn from_raw(vm: *mut JavaVM, version: jint) -> Self {
        JniRuntime {
            vm,
            version,
            _owner: None,
        }
    }

    /// Wraps the `JavaVM` an incoming native call's `JNIEnv` belongs to.
    ///
    /// # Safety
    ///
    /// `env` must be the valid `JNIEnv*` of the calling thread.
    pub unsafe fn from_env(env: *mut JNIEnv, version: jint) -> Option<Self> {
        if env.is_null() {
            return None;
        }
        let mut vm: *mut JavaVM = ptr::null_mut();
        let rc = unsafe { jni!(env, GetJavaVM(&mut vm) or JNI_ERR) };
        (rc == JNI_OK && !vm.is_null()).then(|| unsafe { JniRuntime::from_raw(vm, version) })
    }

    /// Keeps `owner` (typically the loaded library) alive as long as this
    /// runtime.
    #[must_use]
    pub fn owned_by(mut self, owner: Arc<dyn Any + Send + Sync>) -> Self {
        self._owner = Some(owner);
        self
    }

    /// The wrapped `JavaVM*`.
    pub fn as_raw(&self) -> *mut JavaVM {
        self.vm
    }

    fn env(&self) -> Option<*mut JNIEnv> {
        let mut env: *mut c_void = ptr::null_mut();
        let rc = unsafe { jni!(self.vm, GetEnv(&mut env, self.version) or JNI_ERR) };
        (rc == JNI_OK && !env.is_null()).then_some(env.cast())
    }

    fn member_id(&self, class: RawRef, name: &str, signature: &str, is_static: bool, field: bool) -> Option<u64> {
        let env = self.env()?;
        let (name, signature) = (encode_modified_utf8(name), encode_modified_utf8(signature));
        let (n, s) = (name.as_ptr().cast(), signature.as_ptr().cast());
        let class = to_obj(class);
        let id = unsafe {
            match (field, is_static) {
                (false, false) => jni!(env, GetMethodID(class, n, s) or ptr::null_mut()),
                (false, true) => jni!(env, GetStaticMethodID(class, n, s) or ptr::null_mut()),
                (true, false) => jni!(env, GetFieldID(class, n, s) or ptr::null_mut()),
                (true, true) => jni!(env, GetStaticFieldID(class, n, s) or ptr::null_mut()),
            }
        };
        (!id.is_null()).then_some(id as usize as u64)
    }

    fn call(&self, target: RawRef, method: MethodId, ret: TypeKind, args: &[RawValue], is_static: bool) -> RawValue {
        let Some(env) = self.env() else {
            return ret.zero();
        };
        let args = to_jvalues(args);
        let (o, m, a) = (to_obj(target), method.0 as usize as jmethodID, args.as_ptr());
        macro_rules! dispatch {
            ($virtual:ident, $static:ident, $default:expr) => {
                if is_static {
                    jni!(env, $static.array(o, m, a) or $default)
                } else {
                    jni!(env, $virtual.array(o, m, a) or $default)
                }
            };
        }
        unsafe {
            match ret {
                TypeKind::Object => RawValue::Object(from_obj(dispatch!(CallObjectMethod, CallStaticObjectMethod, ptr::null_mut()))),
                TypeKind::Boolean => RawValue::Boolean(dispatch!(CallBooleanMethod, CallStaticBooleanMethod, 0) != 0),
                TypeKind::Byte => RawValue::Byte(dispatch!(CallByteMethod, CallStaticByteMethod, 0)),
                TypeKind::Char => RawValue::Char(dispatch!(CallCharMethod, CallStaticCharMethod, 0)),
                TypeKind::Short => RawValue::Short(dispatch!(CallShortMethod, CallStaticShortMethod, 0)),
                TypeKind::Int => RawValue::Int(dispatch!(CallIntMethod, CallStaticIntMethod, 0)),
                TypeKind::Long => RawValue::Long(dispatch!(CallLongMethod, CallStaticLongMethod, 0)),
                TypeKind::Float => RawValue::Float(dispatch!(CallFloatMethod, CallStaticFloatMethod, 0.0)),
                TypeKind::Double => RawValue::Double(dispatch!(CallDoubleMethod, CallStaticDoubleMethod, 0.0)),
                TypeKind::Void => {
                    dispatch!(CallVoidMethod, CallStaticVoidMethod, ());
                    RawValue::Void
                }
            }
        }
    }

    fn get(&self, target: RawRef, field: FieldId, kind: TypeKind, is_static: bool) -> RawValue {
        let Some(env) = self.env() else {
            return kind.zero();
        };
        let (o, f) = (to_obj(target), field.0 as usize as jfieldID);
        macro_rules! dispatch {
            ($instance:ident, $static:ident, $default:expr) => {
                if is_static {
                    jni!(env, $static(o, f) or $default)
                } else {
                    jni!(env, $instance(o, f) or $default)
                }
            };
        }
        unsafe {
            match kind {
                TypeKind::Object => RawValue::Object(from_obj(dispatch!(GetObjectField, GetStaticObjectField, ptr::null_mut()))),
                TypeKind::Boolean => RawValue::Boolean(dispatch!(GetBooleanField, GetStaticBooleanField, 0) != 0),
                TypeKind::Byte => RawValue::Byte(dispatch!(GetByteField, GetStaticByteField, 0)),
                TypeKind::Char => RawValue::Char(dispatch!(GetCharField, GetStaticCharField, 0)),
                TypeKind::Short => RawValue::Short(dispatch!(GetShortField, GetStaticShortField, 0)),
                TypeKind::Int => RawValue::Int(dispatch!(GetIntField, GetStaticIntField, 0)),
                TypeKind::Long => RawValue::Long(dispatch!(GetLongField, GetStaticLongField, 0)),
                TypeKind::Float => RawValue::Float(dispatch!(GetFloatField, GetStaticFloatField, 0.0)),
                TypeKind::Double => RawValue::Double(dispatch!(GetDoubleField, GetStaticDoubleField, 0.0)),
                TypeKind::Void => RawValue::Void,
            }
        }
    }

    fn set(&self, target: RawRef, field: FieldId, value: RawValue, is_static: bool) {
        let Some(env) = self.env() else {
            return;
        };
        let (o, f) = (to_obj(target), field.0 as usize as jfieldID);
        macro_rules! dispatch {
            ($instance:ident, $static:ident, $value:expr) => {
                if is_static {
                    jni!(env, $static(o, f, $value) or ())
                } else {
                    jni!(env, $instance(o, f, $value) or ())
                }
            };
        }
        unsafe {
            match value {
                RawValue::Object(v) => dispatch!(SetObjectField, SetStaticObjectField, to_obj(v)),
                RawValue::Boolean(v) => dispatch!(SetBooleanField, SetStaticBooleanField, jboolean::from(v)),
                RawValue::Byte(v) => dispatch!(SetByteField, SetStaticByteField, v),
                RawValue::Char(v) => dispatch!(SetCharField, SetStaticCharField, v),
                RawValue::Short(v) => dispatch!(SetShortField, SetStaticShortField, v),
                RawValue::Int(v) => dispatch!(SetIntField, SetStaticIntField, v),
                RawValue::Long(v) => dispatch!(SetLongField, SetStaticLongField, v),
                RawValue::Float(v) => dispatch!(SetFloatField, SetStaticFloatField, v),
                RawValue::Double(v) => dispatch!(SetDoubleField, SetStaticDoubleField, v),
                RawValue::Void => {}
            }
        }
    }
}

impl fmt::Debug for JniRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JniRuntime")
            .field("vm", &self.vm)
            .field("version", &format_args!("{:#x}", self.version))
            .finish()
    }
}

impl HostRuntime for JniRuntime {
    fn version(&self) -> i32 {
        match self.env() {
            Some(env) => unsafe { jni!(env, GetVersion() or self.version) },
            None => self.version,
        }
    }

    fn attach_current_thread(&self) -> i32 {
        let mut env: *mut c_void = ptr::null_mut();
        unsafe { jni!(self.vm, AttachCurrentThread(&mut env, ptr::null_mut()) or JNI_ERR) }
    }

    fn detach_current_thread(&self) -> i32 {
        unsafe { jni!(self.vm, DetachCurrentThread() or JNI_ERR) }
    }

    fn get_env(&self) -> i32 {
        let mut env: *mut c_void = ptr::null_mut();
        unsafe { jni!(self.vm, GetEnv(&mut env, self.version) or JNI_EDETACHED) }
    }

    fn destroy(&self) -> i32 {
        unsafe { jni!(self.vm, DestroyJavaVM() or JNI_ERR) }
    }

    fn new_local_ref(&self, obj: RawRef) -> RawRef {
        let Some(env) = self.env() else {
            return RawRef::NULL;
        };
        from_obj(unsafe { jni!(env, NewLocalRef(to_obj(obj)) or ptr::null_mut()) })
    }

    fn delete_local_ref(&self, obj: RawRef) {
        if let Some(env) = self.env() {
            unsafe { jni!(env, DeleteLocalRef(to_obj(obj)) or ()) }
        }
    }

    fn new_global_ref(&self, obj: RawRef) -> RawRef {
        let Some(env) = self.env() else {
            return RawRef::NULL;
        };
        from_obj(unsafe { jni!(env, NewGlobalRef(to_obj(obj)) or ptr::null_mut()) })
    }

    fn delete_global_ref(&self, obj: RawRef) {
        if let Some(env) = self.env() {
            unsafe { jni!(env, DeleteGlobalRef(to_obj(obj)) or ()) }
        }
    }

    fn is_same_object(&self, a: RawRef, b: RawRef) -> bool {
        match self.env() {
            Some(env) => unsafe { jni!(env, IsSameObject(to_obj(a), to_obj(b)) or 0) != 0 },
            None => a == b,
        }
    }

    fn find_class(&self, name: &str) -> RawRef {
        let Some(env) = self.env() else {
            return RawRef::NULL;
        };
        let name = encode_modified_utf8(name);
        from_obj(unsafe { jni!(env, FindClass(name.as_ptr().cast()) or ptr::null_mut()) })
    }

    fn get_object_class(&self, obj: RawRef) -> RawRef {
        let Some(env) = self.env() else {
            return RawRef::NULL;
        };
        from_obj(unsafe { jni!(env, GetObjectClass(to_obj(obj)) or ptr::null_mut()) })
    }

    fn get_superclass(&self, class: RawRef) -> RawRef {
        let Some(env) = self.env() else {
            return RawRef::NULL;
        };
        from_obj(unsafe { jni!(env, GetSuperclass(to_obj(class)) or ptr::null_mut()) })
    }

    fn is_instance_of(&self, obj: RawRef, class: RawRef) -> bool {
        let Some(env) = self.env() else {
            return false;
        };
        unsafe { jni!(env, IsInstanceOf(to_obj(obj), to_obj(class)) or 0) != 0 }
    }

    fn get_method_id(&self, class: RawRef, name: &str, signature: &str, is_static: bool) -> Option<MethodId> {
        self.member_id(class, name, signature, is_static, false).map(MethodId)
    }

    fn get_field_id(&self, class: RawRef, name: &str, signature: &str, is_static: bool) -> Option<FieldId> {
        self.member_id(class, name, signature, is_static, true).map(FieldId)
    }

    fn call_method(&self, obj: RawRef, method: MethodId, ret: TypeKind) -> RawValue {
        self.call(obj, method, ret, &[], false)
    }

    fn call_method_a(&self, obj: RawRef, method: MethodId, ret: TypeKind, args: &[RawValue]) -> RawValue {
        self.call(obj, method, ret, args, false)
    }

    fn call_static_method(&self, class: RawRef, method: MethodId, ret: TypeKind) -> RawValue {
        self.call(class, method, ret, &[], true)
    }

    fn call_static_method_a(&self, class: RawRef, method: MethodId, ret: TypeKind, args: &[RawValue]) -> RawValue {
        self.call(class, method, ret, args, true)
    }

    fn new_object(&self, class: RawRef, ctor: MethodId) -> RawRef {
        self.new_object_a(class, ctor, &[])
    }

    fn new_object_a(&self, class: RawRef, ctor: MethodId, args: &[RawValue]) -> RawRef {
        let Some(env) = self.env() else {
            return RawRef::NULL;
        };
        let args = to_jvalues(args);
        let ctor = ctor.0 as usize as jmethodID;
        from_obj(unsafe { jni!(env, NewObjectA(to_obj(class), ctor, args.as_ptr()) or ptr::null_mut()) })
    }

    fn get_field(&self, obj: RawRef, field: FieldId, kind: TypeKind) -> RawValue {
        self.get(obj, field, kind, false)
    }

    fn set_field(&self, obj: RawRef, field: FieldId, value: RawValue) {
        self.set(obj, field, value, false);
    }

    fn get_static_field(&self, class: RawRef, field: FieldId, kind: TypeKind) -> RawValue {
        self.get(class, field, kind, true)
    }

    fn set_static_field(&self, class: RawRef, field: FieldId, value: RawValue) {
        self.set(class, field, value, true);
    }

    fn exception_check(&self) -> bool {
        let Some(env) = self.env() else {
            return false;
        };
        unsafe { jni!(env, ExceptionCheck() or 0) != 0 }
    }

    fn exception_occurred(&self) -> RawRef {
        let Some(env) = self.env() else {
            return RawRef::NULL;
        };
        from_obj(unsafe { jni!(env, ExceptionOccurred() or ptr::null_mut()) })
    }

    fn exception_clear(&self) {
        if let Some(env) = self.env() {
            unsafe { jni!(env, ExceptionClear() or ()) }
        }
    }

    fn exception_describe(&self) {
        if let Some(env) = self.env() {
            unsafe { jni!(env, ExceptionDescribe() or ()) }
        }
    }

    fn throw(&self, throwable: RawRef) -> i32 {
        let Some(env) = self.env() else {
            return JNI_EDETACHED;
        };
        unsafe { jni!(env, Throw(to_obj(throwable)) or JNI_ERR) }
    }

    fn throw_new(&self, class: RawRef, message: &str) -> i32 {
        let Some(env) = self.env() else {
            return JNI_EDETACHED;
        };
        let message = encode_modified_utf8(message);
        unsafe { jni!(env, ThrowNew(to_obj(class), message.as_ptr().cast()) or JNI_ERR) }
    }

    fn new_primitive_array(&self, kind: TypeKind, length: i32) -> RawRef {
        let Some(env) = self.env() else {
            return RawRef::NULL;
        };
        let array = unsafe {
            match kind {
                TypeKind::Boolean => jni!(env, NewBooleanArray(length) or ptr::null_mut()),
                TypeKind::Byte => jni!(env, NewByteArray(length) or ptr::null_mut()),
                TypeKind::Char => jni!(env, NewCharArray(length) or ptr::null_mut()),
                TypeKind::Short => jni!(env, NewShortArray(length) or ptr::null_mut()),
                TypeKind::Int => jni!(env, NewIntArray(length) or ptr::null_mut()),
                TypeKind::Long => jni!(env, NewLongArray(length) or ptr::null_mut()),
                TypeKind::Float => jni!(env, NewFloatArray(length) or ptr::null_mut()),
                TypeKind::Double => jni!(env, NewDoubleArray(length) or ptr::null_mut()),
                TypeKind::Object | TypeKind::Void => ptr::null_mut(),
            }
        };
        from_obj(array)
    }

    fn new_object_array(&self, length: i32, element_class: RawRef, initial: RawRef) -> RawRef {
        let Some(env) = self.env() else {
            return RawRef::NULL;
        };
        let (class, init) = (to_obj(element_class), to_obj(initial));
        from_obj(unsafe { jni!(env, NewObjectArray(length, class, init) or ptr::null_mut()) })
    }

    fn get_array_length(&self, array: RawRef) -> i32 {
        let Some(env) = self.env() else {
            return 0;
        };
        unsafe { jni!(env, GetArrayLength(to_obj(array)) or 0) }
    }

    fn get_array_element(&self, array: RawRef, index: i32, kind: TypeKind) -> RawValue {
        let Some(env) = self.env() else {
            return kind.zero();
        };
        let array = to_obj(array);
        macro_rules! element {
            ($region:ident, $ty:ty) => {{
                let mut value: $ty = Default::default();
                jni!(env, $region(array, index, 1, &mut value) or ());
                value
            }};
        }
        unsafe {
            match kind {
                TypeKind::Object => RawValue::Object(from_obj(jni!(env, GetObjectArrayElement(array, index) or ptr::null_mut()))),
                TypeKind::Boolean => RawValue::Boolean(element!(GetBooleanArrayRegion, jboolean) != 0),
                TypeKind::Byte => RawValue::Byte(element!(GetByteArrayRegion, jbyte)),
                TypeKind::Char => RawValue::Char(element!(GetCharArrayRegion, jchar)),
                TypeKind::Short => RawValue::Short(element!(GetShortArrayRegion, jshort)),
                TypeKind::Int => RawValue::Int(element!(GetIntArrayRegion, jint)),
                TypeKind::Long => RawValue::Long(element!(GetLongArrayRegion, jlong)),
                TypeKind::Float => RawValue::Float(element!(GetFloatArrayRegion, jfloat)),
                TypeKind::Double => RawValue::Double(element!(GetDoubleArrayRegion, jdouble)),
                TypeKind::Void => RawValue::Void,
            }
        }
    }

    fn set_array_element(&self, array: RawRef, index: i32, value: RawValue) {
        let Some(env) = self.env() else {
            return;
        };
        let array = to_obj(array);
        macro_rules! element {
            ($region:ident, $value:expr) => {{
                let value = $value;
                jni!(env, $region(array, index, 1, &value) or ())
            }};
        }
        unsafe {
            match value {
                RawValue::Object(v) => jni!(env, SetObjectArrayElement(array, index, to_obj(v)) or ()),
                RawValue::Boolean(v) => element!(SetBooleanArrayRegion, jboolean::from(v)),
                RawValue::Byte(v) => element!(SetByteArrayRegion, v),
                RawValue::Char(v) => element!(SetCharArrayRegion, v),
                RawValue::Short(v) => element!(SetShortArrayRegion, v),
                RawValue::Int(v) => element!(SetIntArrayRegion, v),
                RawValue::Long(v) => element!(SetLongArrayRegion, v),
                RawValue::Float(v) => element!(SetFloatArrayRegion, v),
                RawValue::Double(v) => element!(SetDoubleArrayRegion, v),
                RawValue::Void => {}
            }
        }
    }

    fn new_string_utf(&self, text: &str) -> RawRef {
        let Some(env) = self.env() else {
            return RawRef::NULL;
        };
        let bytes = encode_modified_utf8(text);
        from_obj(unsafe { jni!(env, NewStringUTF(bytes.as_ptr().cast()) or ptr::null_mut()) })
    }

    fn get_string_utf_chars(&self, string: RawRef) -> Option<String> {
        let env = self.env()?;
        if string.is_null() {
            return None;
        }
        let string = to_obj(string);
        unsafe {
            let chars = jni!(env, GetStringUTFChars(string, ptr::null_mut()) or ptr::null());
            if chars.is_null() {
                return None;
            }
            let text = decode_modified_utf8(CStr::from_ptr(chars).to_bytes());
            jni!(env, ReleaseStringUTFChars(string, chars) or ());
            text
        }
    }
}

/// Native half of `jace.util.ShutdownHook.signalVMShutdown()`.
#[unsafe(no_mangle)]
pub extern "system" fn Java_jace_util_ShutdownHook_signalVMShutdown(_env: *mut JNIEnv, _hook: jobject) {
    crate::helper::signal_vm_shutdown();
}
