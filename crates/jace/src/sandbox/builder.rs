//! Class definitions and sandbox construction.

use super::heap::{CLASS, ClassInfo, FieldDef, Heap, MethodDef, OBJECT, STRING, Slot, member_id};
use super::{NativeFn, Sandbox};
use crate::options::{Hook, OptionList};
use crate::signature::{is_type_signature, parse_method_signature};
use crate::sys::{
    FieldId, HostRuntime, JNI_EINVAL, JNI_ERR, JNI_VERSION_1_8, MethodId, RawRef, RawValue,
    TypeKind,
};
use jace_log::{debug, warn};
use std::fmt;
use std::sync::Arc;

const DEFAULT_LOCAL_CAPACITY: usize = 512;

#[derive(Clone)]
struct MethodSpec {
    name: String,
    signature: String,
    is_static: bool,
    body: NativeFn,
}

#[derive(Clone)]
struct FieldSpec {
    name: String,
    signature: String,
    is_static: bool,
    initial: RawValue,
}

/// A class to install in a sandbox.
///
/// ```
/// use jace::sandbox::ClassDef;
/// use jace::sys::RawValue;
///
/// let counter = ClassDef::new("demo/Counter")
///     .field("count", "I")
///     .method("peek", "()I", |_, _, _| RawValue::Int(0));
/// assert_eq!(counter.name(), "demo/Counter");
/// ```
#[derive(Clone)]
pub struct ClassDef {
    name: String,
    superclass: String,
    methods: Vec<MethodSpec>,
    fields: Vec<FieldSpec>,
    loader_only: bool,
}

impl ClassDef {
    /// A class named `name` (`pkg/Name`) extending `java/lang/Object`.
    pub fn new(name: impl Into<String>) -> Self {
        ClassDef {
            name: name.into(),
            superclass: "java/lang/Object".to_owned(),
            methods: Vec::new(),
            fields: Vec::new(),
            loader_only: false,
        }
    }

    /// The raw class name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sets the superclass.
    #[must_use]
    pub fn extends(mut self, superclass: impl Into<String>) -> Self {
        self.superclass = superclass.into();
        self
    }

    /// Adds an instance method. The closure receives the sandbox, the
    /// receiver and the arguments; object results must be new local refs.
    #[must_use]
    pub fn method<F>(self, name: &str, signature: &str, body: F) -> Self
    where
        F: Fn(&Sandbox, RawRef, &[RawValue]) -> RawValue + Send + Sync + 'static,
    {
        self.add_method(name, signature, false, Arc::new(body))
    }

    /// Adds a static method. The closure receives the class as receiver.
    #[must_use]
    pub fn static_method<F>(self, name: &str, signature: &str, body: F) -> Self
    where
        F: Fn(&Sandbox, RawRef, &[RawValue]) -> RawValue + Send + Sync + 'static,
    {
        self.add_method(name, signature, true, Arc::new(body))
    }

    /// Adds a constructor with the given signature (`(I)V`).
    #[must_use]
    pub fn constructor<F>(self, signature: &str, body: F) -> Self
    where
        F: Fn(&Sandbox, RawRef, &[RawValue]) + Send + Sync + 'static,
    {
        self.add_method(
            "<init>",
            signature,
            false,
            Arc::new(move |sb: &Sandbox, this: RawRef, args: &[RawValue]| {
                body(sb, this, args);
                RawValue::Void
            }),
        )
    }

    fn add_method(mut self, name: &str, signature: &str, is_static: bool, body: NativeFn) -> Self {
        self.methods.push(MethodSpec {
            name: name.to_owned(),
            signature: signature.to_owned(),
            is_static,
            body,
        });
        self
    }

    /// Adds an instance field initialized to its zero value.
    #[must_use]
    pub fn field(mut self, name: &str, signature: &str) -> Self {
        let initial = TypeKind::from_signature(signature)
            .unwrap_or(TypeKind::Object)
            .zero();
        self.fields.push(FieldSpec {
            name: name.to_owned(),
            signature: signature.to_owned(),
            is_static: false,
            initial,
        });
        self
    }

    /// Adds a static field with a primitive (or null) initial value.
    #[must_use]
    pub fn static_field(mut self, name: &str, signature: &str, initial: RawValue) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_owned(),
            signature: signature.to_owned(),
            is_static: true,
            initial,
        });
        self
    }

    /// An exception class extending `superclass`, with the `()V` and
    /// `(Ljava/lang/String;)V` constructors of `Throwable`.
    pub fn throwable(name: impl Into<String>, superclass: impl Into<String>) -> Self {
        ClassDef::new(name)
            .extends(superclass)
            .constructor("()V", |_, _, _| {})
            .constructor("(Ljava/lang/String;)V", |sb, this, args| {
                sb.set_field(this, detail_message(), args[0]);
            })
    }

    /// Hides the class from `FindClass`; only `ClassLoader.loadClass` sees it.
    #[must_use]
    pub fn loader_only(mut self) -> Self {
        self.loader_only = true;
        self
    }

    fn install(&self, heap: &mut Heap, index: usize) -> Result<(), i32> {
        let mut has_ctor = false;
        for spec in &self.methods {
            let Some((params, ret)) = parse_method_signature(&spec.signature) else {
                warn!("invalid signature {} for {}.{}", spec.signature, self.name, spec.name);
                return Err(JNI_EINVAL);
            };
            if spec.name == "<init>" {
                if ret != "V" || spec.is_static {
                    return Err(JNI_EINVAL);
                }
                has_ctor = true;
            }
            let id = MethodId(member_id(&spec.name, &spec.signature));
            heap.classes[index].methods.insert(
                id,
                MethodDef {
                    name: Arc::from(spec.name.as_str()),
                    signature: Arc::from(spec.signature.as_str()),
                    is_static: spec.is_static,
                    params: params.len(),
                    body: Arc::clone(&spec.body),
                },
            );
        }
        if !has_ctor && index != OBJECT && index != CLASS && index != STRING {
            let id = MethodId(member_id("<init>", "()V"));
            heap.classes[index].methods.insert(
                id,
                MethodDef {
                    name: Arc::from("<init>"),
                    signature: Arc::from("()V"),
                    is_static: false,
                    params: 0,
                    body: Arc::new(|_: &Sandbox, _: RawRef, _: &[RawValue]| RawValue::Void),
                },
            );
        }

        for spec in &self.fields {
            let Some(kind) = TypeKind::from_signature(&spec.signature)
                .filter(|k| *k != TypeKind::Void && is_type_signature(&spec.signature))
            else {
                return Err(JNI_EINVAL);
            };
            if spec.initial.kind() != kind {
                return Err(JNI_EINVAL);
            }
            let initial = match spec.initial {
                RawValue::Object(_) => Slot::Object(None),
                other => heap.slot_in(other),
            };
            let id = FieldId(member_id(&spec.name, &spec.signature));
            let info: &mut ClassInfo = &mut heap.classes[index];
            info.fields.insert(
                id,
                FieldDef {
                    is_static: spec.is_static,
                    kind,
                    initial,
                },
            );
            if spec.is_static {
                info.statics.insert(id, initial);
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ClassDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDef")
            .field("name", &self.name)
            .field("superclass", &self.superclass)
            .field("methods", &self.methods.len())
            .field("fields", &self.fields.len())
            .finish()
    }
}

/// Configures and creates a [`Sandbox`].
#[derive(Clone, Debug)]
pub struct SandboxBuilder {
    classes: Vec<ClassDef>,
    local_capacity: usize,
    version: i32,
    jace_runtime: bool,
}

impl Default for SandboxBuilder {
    fn default() -> Self {
        SandboxBuilder {
            classes: Vec::new(),
            local_capacity: DEFAULT_LOCAL_CAPACITY,
            version: JNI_VERSION_1_8,
            jace_runtime: true,
        }
    }
}

impl SandboxBuilder {
    /// Adds a class. Superclasses may be added in any order.
    #[must_use]
    pub fn class(mut self, def: ClassDef) -> Self {
        self.classes.push(def);
        self
    }

    /// Bounds the per-thread local reference table.
    #[must_use]
    pub fn local_capacity(mut self, capacity: usize) -> Self {
        self.local_capacity = capacity;
        self
    }

    /// Sets the JNI version the sandbox reports.
    #[must_use]
    pub fn version(mut self, version: i32) -> Self {
        self.version = version;
        self
    }

    /// Leaves out `jace.util.ShutdownHook`, as a class path missing
    /// `jace-runtime.jar` would.
    #[must_use]
    pub fn without_jace_runtime(mut self) -> Self {
        self.jace_runtime = false;
        self
    }

    /// Creates the sandbox, as `JNI_CreateJavaVM` would.
    ///
    /// # Errors
    ///
    /// Returns `JNI_ERR` for an unrecognized option when
    /// `ignore_unrecognized` is false, and `JNI_EINVAL` for malformed class
    /// definitions (bad signatures, unknown or cyclic superclasses,
    /// duplicate names).
    pub fn build(
        self,
        options: &OptionList,
        ignore_unrecognized: bool,
    ) -> Result<Arc<Sandbox>, i32> {
        let mut rendered = Vec::new();
        let mut vfprintf = None;
        let mut exit = None;
        for option in options.render() {
            match option.extra_info {
                Some(Hook::Vfprintf(hook)) => vfprintf = Some(hook),
                Some(Hook::Exit(hook)) => exit = Some(hook),
                _ => {}
            }
            if !recognized(&option.option_string) {
                if !ignore_unrecognized {
                    warn!("unrecognized option {}", option.option_string);
                    return Err(JNI_ERR);
                }
                debug!("ignoring option {}", option.option_string);
                continue;
            }
            rendered.push(option.option_string);
        }

        let mut heap = Heap::new(self.local_capacity);
        let mut pending: Vec<&ClassDef> = builtins().iter().collect();
        if self.jace_runtime {
            pending.extend(jace_runtime());
        }
        let users: Vec<&ClassDef> = self.classes.iter().collect();
        install_all(&mut heap, &mut pending)?;
        let mut pending = users;
        install_all(&mut heap, &mut pending)?;

        Ok(Arc::new(Sandbox::from_parts(
            self.version,
            heap,
            rendered,
            vfprintf,
            exit,
        )))
    }
}

fn recognized(option: &str) -> bool {
    const PREFIXES: [&str; 9] = [
        "-D", "-X", "-verbose", "-ea", "-da", "-enableassertions", "-disableassertions",
        "-javaagent:", "-agentlib:",
    ];
    matches!(option, "vfprintf" | "exit" | "abort") || PREFIXES.iter().any(|p| option.starts_with(p))
}

/// Installs classes whose superclass is known, until none are left.
fn install_all(heap: &mut Heap, pending: &mut Vec<&ClassDef>) -> Result<(), i32> {
    while !pending.is_empty() {
        let before = pending.len();
        let mut i = 0;
        while i < pending.len() {
            let def = pending[i];
            let existing = heap.class_named(&def.name, true);
            let core = matches!(existing, Some(OBJECT | CLASS | STRING));
            if existing.is_some() && !core {
                warn!("duplicate class {}", def.name);
                return Err(JNI_EINVAL);
            }
            let index = if core {
                existing
            } else {
                heap.class_named(&def.superclass, true)
                    .map(|parent| heap.define(&def.name, Some(parent), def.loader_only))
            };
            match index {
                Some(index) => {
                    def.install(heap, index)?;
                    pending.remove(i);
                }
                None => i += 1,
            }
        }
        if pending.len() == before {
            warn!("unresolvable superclass for {}", pending[0].name);
            return Err(JNI_EINVAL);
        }
    }
    Ok(())
}

// ============================================================================
// java.lang
// ============================================================================

const DETAIL_MESSAGE: (&str, &str) = ("detailMessage", "Ljava/lang/String;");

pub(crate) fn detail_message() -> FieldId {
    FieldId(member_id(DETAIL_MESSAGE.0, DETAIL_MESSAGE.1))
}

fn string_result(sb: &Sandbox, text: &str) -> RawValue {
    RawValue::Object(sb.new_string_utf(text))
}

fn builtins() -> &'static [ClassDef] {
    use once_cell::sync::Lazy;
    static BUILTINS: Lazy<Vec<ClassDef>> = Lazy::new(java_lang);
    &BUILTINS
}

fn jace_runtime() -> &'static [ClassDef] {
    use once_cell::sync::Lazy;
    static JACE_RUNTIME: Lazy<Vec<ClassDef>> = Lazy::new(jace_util);
    &JACE_RUNTIME
}

/// The instance held in the static `field` of `class`, created with the
/// `()V` constructor on first use.
fn singleton(sb: &Sandbox, class: RawRef, field: &str, signature: &str) -> RawValue {
    let id = Sandbox::member_field(field, signature);
    let current = sb.get_static_field(class, id, TypeKind::Object);
    if !current.as_ref().is_null() || sb.exception_check() {
        return current;
    }
    let Some(init) = sb.get_method_id(class, "<init>", "()V", false) else {
        return RawValue::Object(RawRef::NULL);
    };
    let created = sb.new_object(class, init);
    if !created.is_null() {
        sb.set_static_field(class, id, RawValue::Object(created));
    }
    RawValue::Object(created)
}

fn java_lang() -> Vec<ClassDef> {
    let object = ClassDef::new("java/lang/Object")
        .constructor("()V", |_, _, _| {})
        .method("toString", "()Ljava/lang/String;", |sb, this, _| {
            let name = sb.class_name_of(this).unwrap_or_default();
            string_result(sb, &format!("{name}@{:x}", sb.identity_hash(this)))
        })
        .method("equals", "(Ljava/lang/Object;)Z", |sb, this, args| {
            RawValue::Boolean(sb.is_same_object(this, args[0].as_ref()))
        })
        .method("hashCode", "()I", |sb, this, _| {
            RawValue::Int(sb.identity_hash(this))
        })
        .method("getClass", "()Ljava/lang/Class;", |sb, this, _| {
            RawValue::Object(sb.get_object_class(this))
        });

    let class = ClassDef::new("java/lang/Class")
        .method("getName", "()Ljava/lang/String;", |sb, this, _| {
            match sb.class_object_name(this) {
                Some(name) => string_result(sb, &name.replace('/', ".")),
                None => RawValue::Object(RawRef::NULL),
            }
        })
        .method("getSuperclass", "()Ljava/lang/Class;", |sb, this, _| {
            RawValue::Object(sb.get_superclass(this))
        });

    let string = ClassDef::new("java/lang/String")
        .method("toString", "()Ljava/lang/String;", |sb, this, _| {
            RawValue::Object(sb.new_local_ref(this))
        })
        .method("length", "()I", |sb, this, _| {
            let text = sb.get_string_utf_chars(this).unwrap_or_default();
            RawValue::Int(text.encode_utf16().count() as i32)
        })
        .method("equals", "(Ljava/lang/Object;)Z", |sb, this, args| {
            let a = sb.get_string_utf_chars(this);
            let b = sb.get_string_utf_chars(args[0].as_ref());
            RawValue::Boolean(a.is_some() && a == b)
        })
        .method("hashCode", "()I", |sb, this, _| {
            let text = sb.get_string_utf_chars(this).unwrap_or_default();
            let hash = text
                .encode_utf16()
                .fold(0i32, |h, c| h.wrapping_mul(31).wrapping_add(i32::from(c)));
            RawValue::Int(hash)
        });

    let throwable = ClassDef::throwable("java/lang/Throwable", "java/lang/Object")
        .field(DETAIL_MESSAGE.0, DETAIL_MESSAGE.1)
        .method("getMessage", "()Ljava/lang/String;", |sb, this, _| {
            sb.get_field(this, detail_message(), TypeKind::Object)
        })
        .method("toString", "()Ljava/lang/String;", |sb, this, _| {
            let name = sb.class_name_of(this).unwrap_or_default();
            let message = sb.get_field(this, detail_message(), TypeKind::Object).as_ref();
            let text = match sb.get_string_utf_chars(message) {
                Some(message) => format!("{name}: {message}"),
                None => name,
            };
            if !message.is_null() {
                sb.delete_local_ref(message);
            }
            string_result(sb, &text)
        });

    let class_loader = ClassDef::new("java/lang/ClassLoader").method(
        "loadClass",
        "(Ljava/lang/String;)Ljava/lang/Class;",
        |sb, _, args| {
            let name = sb.get_string_utf_chars(args[0].as_ref()).unwrap_or_default();
            RawValue::Object(sb.load_class(&name))
        },
    );

    let thread = ClassDef::new("java/lang/Thread").method("run", "()V", |_, _, _| RawValue::Void);

    let runtime = ClassDef::new("java/lang/Runtime")
        .static_field("currentRuntime", "Ljava/lang/Runtime;", RawValue::Object(RawRef::NULL))
        .static_method("getRuntime", "()Ljava/lang/Runtime;", |sb, class, _| {
            singleton(sb, class, "currentRuntime", "Ljava/lang/Runtime;")
        })
        .method("addShutdownHook", "(Ljava/lang/Thread;)V", |sb, _, args| {
            sb.add_shutdown_hook(args[0].as_ref());
            RawValue::Void
        });

    let mut classes = vec![object, class, string, throwable, class_loader, thread, runtime];
    for (name, superclass) in [
        ("java/lang/Exception", "java/lang/Throwable"),
        ("java/lang/Error", "java/lang/Throwable"),
        ("java/lang/RuntimeException", "java/lang/Exception"),
        ("java/lang/IllegalArgumentException", "java/lang/RuntimeException"),
        ("java/lang/IllegalStateException", "java/lang/RuntimeException"),
        ("java/lang/NullPointerException", "java/lang/RuntimeException"),
        ("java/lang/IndexOutOfBoundsException", "java/lang/RuntimeException"),
        ("java/lang/ArrayIndexOutOfBoundsException", "java/lang/IndexOutOfBoundsException"),
        ("java/lang/ArrayStoreException", "java/lang/RuntimeException"),
        ("java/lang/NegativeArraySizeException", "java/lang/RuntimeException"),
        ("java/lang/UnsupportedOperationException", "java/lang/RuntimeException"),
        ("java/lang/ClassCastException", "java/lang/RuntimeException"),
        ("java/lang/ReflectiveOperationException", "java/lang/Exception"),
        ("java/lang/ClassNotFoundException", "java/lang/ReflectiveOperationException"),
        ("java/lang/LinkageError", "java/lang/Error"),
        ("java/lang/NoClassDefFoundError", "java/lang/LinkageError"),
        ("java/lang/IncompatibleClassChangeError", "java/lang/LinkageError"),
        ("java/lang/NoSuchMethodError", "java/lang/IncompatibleClassChangeError"),
        ("java/lang/NoSuchFieldError", "java/lang/IncompatibleClassChangeError"),
        ("java/lang/VirtualMachineError", "java/lang/Error"),
        ("java/lang/OutOfMemoryError", "java/lang/VirtualMachineError"),
    ] {
        classes.push(ClassDef::throwable(name, superclass));
    }
    classes
}

// ============================================================================
// jace.util
// ============================================================================

fn jace_util() -> Vec<ClassDef> {
    const INSTANCE: (&str, &str) = ("instance", "Ljace/util/ShutdownHook;");

    let shutdown_hook = ClassDef::new("jace/util/ShutdownHook")
        .extends("java/lang/Thread")
        .static_field(INSTANCE.0, INSTANCE.1, RawValue::Object(RawRef::NULL))
        .static_method("getInstance", "()Ljace/util/ShutdownHook;", |sb, class, _| {
            singleton(sb, class, INSTANCE.0, INSTANCE.1)
        })
        .method("run", "()V", |sb, this, _| {
            let class = sb.get_object_class(this);
            if let Some(signal) = sb.get_method_id(class, "signalVMShutdown", "()V", false) {
                sb.call_method(this, signal, TypeKind::Void);
            }
            sb.delete_local_ref(class);
            RawValue::Void
        })
        // Bound to the process bridge, like the exported native.
        .method("signalVMShutdown", "()V", |_, _, _| {
            crate::helper::signal_vm_shutdown();
            RawValue::Void
        });

    vec![shutdown_hook]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::VmOption;

    #[test]
    fn test_unrecognized_option_rejected() {
        let options = OptionList::new().with(VmOption::custom("--bogus"));
        assert_eq!(
            Sandbox::builder().build(&options, false).err(),
            Some(JNI_ERR)
        );
        assert!(Sandbox::builder().build(&options, true).is_ok());
    }

    #[test]
    fn test_options_are_recorded() {
        let options = OptionList::new()
            .with(VmOption::class_path("a.jar"))
            .with(VmOption::max_heap("64m"))
            .with(VmOption::system_property("demo.mode", "test"));
        let sb = Sandbox::builder().build(&options, false).unwrap();
        assert!(sb.options().iter().any(|o| o == "-Xmx64m"));
        assert_eq!(sb.system_property("demo.mode"), Some("test"));
        assert_eq!(sb.system_property("java.class.path"), Some("a.jar"));
    }

    #[test]
    fn test_jace_runtime_can_be_left_out() {
        let full = Sandbox::builder().build(&OptionList::new(), false).unwrap();
        assert!(!full.find_class("jace/util/ShutdownHook").is_null());
        assert!(!full.find_class("java/lang/Runtime").is_null());

        let bare = Sandbox::builder()
            .without_jace_runtime()
            .build(&OptionList::new(), false)
            .unwrap();
        assert!(bare.find_class("jace/util/ShutdownHook").is_null());
        assert_eq!(
            bare.pending_exception_class().as_deref(),
            Some("java.lang.NoClassDefFoundError")
        );
        assert!(!bare.find_class("java/lang/Thread").is_null());
    }

    #[test]
    fn test_superclass_order_does_not_matter() {
        let sb = Sandbox::builder()
            .class(ClassDef::new("demo/Child").extends("demo/Parent"))
            .class(ClassDef::new("demo/Parent"))
            .build(&OptionList::new(), false)
            .unwrap();
        let child = sb.find_class("demo/Child");
        let parent = sb.get_superclass(child);
        assert_eq!(sb.class_object_name(parent).as_deref(), Some("demo/Parent"));
    }

    #[test]
    fn test_bad_definitions_rejected() {
        let missing = Sandbox::builder().class(ClassDef::new("demo/Orphan").extends("demo/Nobody"));
        assert_eq!(missing.build(&OptionList::new(), false).err(), Some(JNI_EINVAL));

        let bad_sig = Sandbox::builder()
            .class(ClassDef::new("demo/Bad").method("m", "(Q)V", |_, _, _| RawValue::Void));
        assert_eq!(bad_sig.build(&OptionList::new(), false).err(), Some(JNI_EINVAL));

        let duplicate = Sandbox::builder()
            .class(ClassDef::new("demo/Twice"))
            .class(ClassDef::new("demo/Twice"));
        assert_eq!(duplicate.build(&OptionList::new(), false).err(), Some(JNI_EINVAL));
    }
}
