//! Jace: native proxies for an embedded JVM
//!
//! Jace manages the lifetime of foreign objects held from Rust and turns
//! foreign exceptions into typed Rust errors. It provides:
//!
//! - **Reference Management** with a shutdown-safe global reference
//!   lifecycle and per-thread attachment
//! - **Class Descriptors** resolved once per type and pinned for the process
//! - **Object Proxies** that each own an independent global reference
//! - **Memoized Dispatch** of methods, constructors and fields by signature
//! - **Write-through Element and Field Proxies** for arrays and fields
//! - **Exception Translation** to the most specific registered proxy type
//!
//! # Architecture
//!
//! - **Primitive Layer** ([`sys`], [`jni`]): the fixed JNI operation set,
//!   behind the [`HostRuntime`](sys::HostRuntime) trait
//! - **Manager Layer** ([`helper`], [`context`], [`refs`], [`loader`]):
//!   bootstrap, attachment, reference traffic and shutdown
//! - **Proxy Layer** ([`descriptor`], [`value`], [`object`], [`method`],
//!   [`field`], [`array`]): typed access to foreign values
//! - **Exception Layer** ([`exception`], [`lang`]): classification and
//!   translation
//!
//! The `sandbox` feature (on by default) ships an in-process host runtime
//! used as the statically linked loader target. A real JVM is reached
//! through [`jni::JniRuntime`]; the `dynamic` feature adds
//! [`loader::DynamicVmLoader`], which opens `libjvm` by path.
//!
//! # Example
//!
//! ```rust
//! use jace::loader::StaticVmLoader;
//! use jace::object::JString;
//! use jace::options::OptionList;
//! use jace::sandbox::Sandbox;
//!
//! let loader = StaticVmLoader::sandbox(Sandbox::builder());
//! jace::bootstrap(&loader, &OptionList::new()).unwrap();
//!
//! let ctx = jace::attach().unwrap();
//! let greeting = JString::new(&ctx, "hello").unwrap();
//! assert_eq!(greeting.to_rust_string(&ctx).unwrap(), "hello");
//! assert_eq!(greeting.length(&ctx).unwrap(), 5);
//! ```

pub mod array;
pub mod context;
pub mod descriptor;
pub mod error;
pub mod exception;
pub mod field;
pub mod helper;
pub mod jni;
pub mod lang;
pub mod loader;
pub mod method;
pub mod object;
pub mod options;
pub mod refs;
#[cfg(feature = "sandbox")]
pub mod sandbox;
pub mod signature;
pub mod sys;
pub mod value;

#[doc(hidden)]
pub mod __private {
    pub use linkme;
}

// Re-export commonly used types
pub use array::{ElementProxy, JArray};
pub use context::ThreadContext;
pub use descriptor::ClassDescriptor;
pub use error::{Error, Result};
pub use exception::{ForeignException, Throwable};
pub use field::{FieldProxy, JField};
pub use helper::{
    Bridge, attach, bootstrap, bridge, detach, global_ref_count, has_shutdown, set_vm_loader,
    shutdown, signal_vm_shutdown,
};
pub use method::{JConstructor, JMethod};
pub use object::{JClass, JObject, JString, ObjectHandle, ObjectProxy};
pub use value::{Arg, JavaType};
