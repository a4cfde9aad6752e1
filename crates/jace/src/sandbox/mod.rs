//! An in-process host runtime.
//!
//! The sandbox implements every [`HostRuntime`] primitive with the JNI
//! conventions the bridge relies on: failing calls return null or zero and
//! leave a pending exception on the calling thread, local references live in
//! a bounded per-thread table, and method ids dispatch virtually by name and
//! signature. Methods are Rust closures registered through [`ClassDef`].
//!
//! Beyond the primitives it exposes diagnostics for tests: reference counts,
//! a journal of calls and writes, the number of method lookups, and the
//! number of calls that arrived after [`HostRuntime::destroy`].
//!
//! ```
//! use jace::options::OptionList;
//! use jace::sandbox::{ClassDef, Sandbox};
//! use jace::sys::{HostRuntime, RawValue, TypeKind};
//!
//! let sb = Sandbox::builder()
//!     .class(ClassDef::new("demo/Answer").static_method("get", "()I", |_, _, _| {
//!         RawValue::Int(42)
//!     }))
//!     .build(&OptionList::new(), false)
//!     .unwrap();
//!
//! let class = sb.find_class("demo/Answer");
//! let get = sb.get_method_id(class, "get", "()I", true).unwrap();
//! assert_eq!(sb.call_static_method(class, get, TypeKind::Int), RawValue::Int(42));
//! ```

mod builder;
mod heap;

pub use builder::{ClassDef, SandboxBuilder};

use self::heap::{Body, Element, Heap, OBJECT, ObjId, STRING, Slot, member_name};
use crate::options::{ExitHook, VfprintfHook};
use crate::sys::{
    FieldId, HostRuntime, JNI_EDETACHED, JNI_ERR, JNI_OK, MethodId, RawRef, RawValue, TypeKind,
};
use jace_log::{debug, trace, warn};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Longest array the sandbox allocates; longer requests raise
/// `java.lang.OutOfMemoryError` the way a real VM does past its limit.
pub const MAX_ARRAY_LENGTH: i32 = 1 << 24;

/// Implementation of a sandbox method: `(sandbox, receiver, arguments)`.
///
/// The receiver is the object for instance methods and the class for
/// static ones. Object results must be new local references.
pub type NativeFn = Arc<dyn Fn(&Sandbox, RawRef, &[RawValue]) -> RawValue + Send + Sync>;

/// One observable interaction recorded by the sandbox.
#[derive(Clone, Debug, PartialEq)]
pub enum JournalEntry {
    /// A method call. `with_args` is true for the `...A` variants.
    Call {
        /// Method name
        method: String,
        /// Method signature
        signature: String,
        /// Static call
        is_static: bool,
        /// Arguments passed as an array
        with_args: bool,
    },
    /// An object construction.
    NewObject {
        /// Raw class name
        class: String,
        /// Arguments passed as an array
        with_args: bool,
    },
    /// `Set<Type>Field` on an instance.
    SetField {
        /// Field name
        field: String,
        /// Value as passed by the caller
        value: RawValue,
    },
    /// `SetStatic<Type>Field`.
    SetStaticField {
        /// Field name
        field: String,
        /// Value as passed by the caller
        value: RawValue,
    },
    /// `Set<Type>ArrayElement(s)`.
    SetArrayElement {
        /// Array reference as passed by the caller
        array: RawRef,
        /// Element index
        index: i32,
        /// Value as passed by the caller
        value: RawValue,
    },
}

/// The in-process host runtime.
pub struct Sandbox {
    version: i32,
    heap: Mutex<Heap>,
    journal: Mutex<Vec<JournalEntry>>,
    options: Vec<String>,
    vfprintf: Option<VfprintfHook>,
    exit: Option<ExitHook>,
    // Global references to `Thread`s registered through
    // `Runtime.addShutdownHook`.
    shutdown_hooks: Mutex<Vec<RawRef>>,
    destroyed: AtomicBool,
    after_destroy: AtomicUsize,
    method_lookups: AtomicUsize,
}

impl Sandbox {
    /// Starts configuring a sandbox.
    pub fn builder() -> SandboxBuilder {
        SandboxBuilder::default()
    }

    fn from_parts(
        version: i32,
        heap: Heap,
        options: Vec<String>,
        vfprintf: Option<VfprintfHook>,
        exit: Option<ExitHook>,
    ) -> Self {
        Sandbox {
            version,
            heap: Mutex::new(heap),
            journal: Mutex::new(Vec::new()),
            options,
            vfprintf,
            exit,
            shutdown_hooks: Mutex::new(Vec::new()),
            destroyed: AtomicBool::new(false),
            after_destroy: AtomicUsize::new(0),
            method_lookups: AtomicUsize::new(0),
        }
    }

    /// Counts and rejects calls made after `destroy`.
    fn dead(&self) -> bool {
        if self.destroyed.load(Ordering::SeqCst) {
            self.after_destroy.fetch_add(1, Ordering::SeqCst);
            return true;
        }
        false
    }

    fn record(&self, entry: JournalEntry) {
        self.journal.lock().push(entry);
    }

    // ---- diagnostics --------------------------------------------------------

    /// Outstanding global references.
    pub fn global_ref_count(&self) -> usize {
        self.heap.lock().global_count()
    }

    /// Outstanding local references of the calling thread.
    pub fn local_ref_count(&self) -> usize {
        self.heap.lock().thread_locals()
    }

    /// Objects ever allocated (nothing is collected).
    pub fn live_objects(&self) -> usize {
        self.heap.lock().live_objects()
    }

    /// Threads currently attached.
    pub fn attached_threads(&self) -> usize {
        self.heap.lock().attached_threads()
    }

    /// True if the calling thread is attached.
    pub fn is_attached(&self) -> bool {
        self.heap.lock().thread_attached()
    }

    /// Recorded calls and writes, oldest first.
    pub fn journal(&self) -> Vec<JournalEntry> {
        self.journal.lock().clone()
    }

    /// Empties the journal.
    pub fn clear_journal(&self) {
        self.journal.lock().clear();
    }

    /// Number of `GetMethodID`/`GetStaticMethodID` calls served.
    pub fn method_lookups(&self) -> usize {
        self.method_lookups.load(Ordering::SeqCst)
    }

    /// Calls that arrived after [`HostRuntime::destroy`].
    pub fn calls_after_destroy(&self) -> usize {
        self.after_destroy.load(Ordering::SeqCst)
    }

    /// True once destroyed.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Number of threads registered through `Runtime.addShutdownHook` and
    /// not yet run.
    pub fn shutdown_hooks(&self) -> usize {
        self.shutdown_hooks.lock().len()
    }

    /// Runs and releases every registered shutdown hook, as the runtime
    /// does on its way out. Each hook runs at most once; an exception thrown
    /// by a hook is logged and cleared.
    pub fn run_shutdown_hooks(&self) {
        let hooks = std::mem::take(&mut *self.shutdown_hooks.lock());
        for hook in hooks {
            let class = self.get_object_class(hook);
            if let Some(run) = self.get_method_id(class, "run", "()V", false) {
                self.call_method(hook, run, TypeKind::Void);
            }
            if self.exception_check() {
                warn!(
                    "shutdown hook threw {}",
                    self.pending_exception_class().unwrap_or_default()
                );
                self.exception_clear();
            }
            self.delete_local_ref(class);
            self.delete_global_ref(hook);
        }
    }

    /// `System.exit(status)`: runs the shutdown hooks, reports `status` to
    /// the `exit` hook when one was configured, and tears the runtime down.
    pub fn exit(&self, status: i32) {
        if self.dead() {
            return;
        }
        debug!("sandbox exiting with status {status}");
        self.run_shutdown_hooks();
        if let Some(exit) = self.exit {
            exit(status);
        }
        self.destroyed.store(true, Ordering::SeqCst);
    }

    /// The accepted option strings, in order.
    pub fn options(&self) -> &[String] {
        &self.options
    }

    /// Value of a `-Dname=value` option.
    pub fn system_property(&self, name: &str) -> Option<&str> {
        self.options.iter().find_map(|o| {
            let (key, value) = o.strip_prefix("-D")?.split_once('=')?;
            (key == name).then_some(value)
        })
    }

    /// Dotted class name of the calling thread's pending exception.
    pub fn pending_exception_class(&self) -> Option<String> {
        let mut heap = self.heap.lock();
        let pending = heap.thread().pending?;
        let class = heap.class_of(pending)?;
        Some(heap.classes[class].name.replace('/', "."))
    }

    // ---- helpers for built-in methods ---------------------------------------

    /// Dotted name of an object's class.
    pub fn class_name_of(&self, obj: RawRef) -> Option<String> {
        let heap = self.heap.lock();
        let class = heap.class_of(heap.deref(obj)?)?;
        Some(heap.classes[class].name.replace('/', "."))
    }

    /// Raw name of the class a `Class` object stands for.
    pub fn class_object_name(&self, class: RawRef) -> Option<String> {
        let heap = self.heap.lock();
        let index = heap.class_index(heap.deref(class)?)?;
        Some(heap.classes[index].name.clone())
    }

    /// Identity hash of an object.
    pub fn identity_hash(&self, obj: RawRef) -> i32 {
        let heap = self.heap.lock();
        heap.deref(obj).map_or(0, |id| id as i32)
    }

    /// Id of the field `name` with `signature`. Ids are shared by every class
    /// declaring such a field, so method bodies can use them directly.
    pub fn member_field(name: &str, signature: &str) -> FieldId {
        FieldId(heap::member_id(name, signature))
    }

    /// `Runtime.addShutdownHook`: pins `hook` until the hooks run.
    pub(crate) fn add_shutdown_hook(&self, hook: RawRef) {
        if hook.is_null() {
            raise(&mut self.heap.lock(), "java/lang/NullPointerException", Some("hook is null"));
            return;
        }
        let mut hooks = self.shutdown_hooks.lock();
        if hooks.iter().any(|pinned| self.is_same_object(*pinned, hook)) {
            drop(hooks);
            raise(
                &mut self.heap.lock(),
                "java/lang/IllegalArgumentException",
                Some("Hook previously registered"),
            );
            return;
        }
        let pinned = self.new_global_ref(hook);
        if !pinned.is_null() {
            hooks.push(pinned);
        }
    }

    /// `ClassLoader.loadClass`: sees loader-only classes too.
    pub(crate) fn load_class(&self, dotted: &str) -> RawRef {
        let mut heap = self.heap.lock();
        let raw = dotted.replace('.', "/");
        match heap.class_named(&raw, true) {
            Some(index) => {
                let object = heap.classes[index].object;
                local_or_raise(&mut heap, object)
            }
            None => {
                raise(&mut heap, "java/lang/ClassNotFoundException", Some(dotted));
                RawRef::NULL
            }
        }
    }

    // ---- calls --------------------------------------------------------------

    fn invoke(
        &self,
        target: RawRef,
        method: MethodId,
        ret: TypeKind,
        args: &[RawValue],
        is_static: bool,
        with_args: bool,
    ) -> RawValue {
        if self.dead() {
            return ret.zero();
        }
        let def = {
            let mut heap = self.heap.lock();
            let class = heap.deref(target).and_then(|id| {
                if is_static {
                    heap.class_index(id)
                } else {
                    heap.class_of(id)
                }
            });
            let Some(class) = class else {
                raise(&mut heap, "java/lang/NullPointerException", Some("method receiver is null"));
                return ret.zero();
            };
            let found = heap
                .find_method(class, method)
                .filter(|d| d.is_static == is_static)
                .cloned();
            let Some(def) = found else {
                let message = describe_member(&heap.classes[class].name, method.0);
                raise(&mut heap, "java/lang/NoSuchMethodError", Some(&message));
                return ret.zero();
            };
            if def.params != args.len() {
                let message = format!(
                    "{}{}: expected {} arguments, got {}",
                    def.name,
                    def.signature,
                    def.params,
                    args.len()
                );
                raise(&mut heap, "java/lang/IllegalArgumentException", Some(&message));
                return ret.zero();
            }
            def
        };

        self.record(JournalEntry::Call {
            method: def.name.to_string(),
            signature: def.signature.to_string(),
            is_static,
            with_args,
        });
        trace!("sandbox call {}{}", def.name, def.signature);
        (def.body)(self, target, args)
    }

    fn construct(&self, class: RawRef, ctor: MethodId, args: &[RawValue], with_args: bool) -> RawRef {
        if self.dead() {
            return RawRef::NULL;
        }
        let (object, def, name) = {
            let mut heap = self.heap.lock();
            let Some(index) = heap.deref(class).and_then(|id| heap.class_index(id)) else {
                raise(&mut heap, "java/lang/NullPointerException", Some("class is null"));
                return RawRef::NULL;
            };
            let Some(def) = heap.classes[index].methods.get(&ctor).cloned() else {
                let message = describe_member(&heap.classes[index].name, ctor.0);
                raise(&mut heap, "java/lang/NoSuchMethodError", Some(&message));
                return RawRef::NULL;
            };
            if def.params != args.len() {
                raise(&mut heap, "java/lang/IllegalArgumentException", Some("wrong number of constructor arguments"));
                return RawRef::NULL;
            }
            let fields = heap.instance_fields(index);
            let obj = heap.alloc(index, Body::Fields(fields));
            let object = local_or_raise(&mut heap, obj);
            if object.is_null() {
                return RawRef::NULL;
            }
            (object, def, heap.classes[index].name.clone())
        };

        self.record(JournalEntry::NewObject {
            class: name,
            with_args,
        });
        (def.body)(self, object, args);
        if self.exception_check() {
            self.delete_local_ref(object);
            return RawRef::NULL;
        }
        object
    }

    fn new_array(&self, length: i32, class: String, element: Element, fill: Slot) -> RawRef {
        let mut heap = self.heap.lock();
        if length < 0 {
            raise(&mut heap, "java/lang/NegativeArraySizeException", Some(&length.to_string()));
            return RawRef::NULL;
        }
        if length > MAX_ARRAY_LENGTH {
            warn!("refusing array of {length} elements");
            raise(
                &mut heap,
                "java/lang/OutOfMemoryError",
                Some("Requested array size exceeds VM limit"),
            );
            return RawRef::NULL;
        }
        let Some(class) = heap.class_named(&class, true) else {
            raise(&mut heap, "java/lang/NoClassDefFoundError", Some(&class));
            return RawRef::NULL;
        };
        let values = vec![fill; length as usize];
        let obj = heap.alloc(class, Body::Array { element, values });
        local_or_raise(&mut heap, obj)
    }
}

impl fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sandbox")
            .field("version", &format_args!("{:#x}", self.version))
            .field("destroyed", &self.is_destroyed())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

fn describe_member(class: &str, id: u64) -> String {
    match member_name(id) {
        Some((name, signature)) => format!("{}.{name}{signature}", class.replace('/', ".")),
        None => format!("{}.<unknown member {id}>", class.replace('/', ".")),
    }
}

/// Makes `class(message)` pending on the calling thread.
fn raise(heap: &mut Heap, class: &str, message: Option<&str>) {
    let index = heap
        .class_named(class, true)
        .or_else(|| heap.class_named("java/lang/Throwable", true))
        .unwrap_or(OBJECT);
    raise_instance(heap, index, message);
}

fn raise_instance(heap: &mut Heap, class: usize, message: Option<&str>) {
    let mut fields = heap.instance_fields(class);
    if let Some(message) = message {
        let text = heap.alloc(STRING, Body::Str(message.to_owned()));
        fields.insert(builder::detail_message(), Slot::Object(Some(text)));
    }
    let obj = heap.alloc(class, Body::Fields(fields));
    heap.thread().pending = Some(obj);
}

/// A new local for `obj`, or null with `OutOfMemoryError` pending.
fn local_or_raise(heap: &mut Heap, obj: ObjId) -> RawRef {
    match heap.new_local(obj) {
        Some(local) => local,
        None => {
            raise(heap, "java/lang/OutOfMemoryError", Some("local reference table overflow"));
            RawRef::NULL
        }
    }
}

fn value_or_raise(heap: &mut Heap, slot: Slot, kind: TypeKind) -> RawValue {
    match heap.slot_out(slot) {
        Some(value) => value,
        None => {
            raise(heap, "java/lang/OutOfMemoryError", Some("local reference table overflow"));
            kind.zero()
        }
    }
}

/// Checks that `value` may be stored in a slot of `kind`/`class`.
fn assignable(heap: &Heap, slot: Slot, kind: TypeKind, class: Option<usize>) -> bool {
    if slot.kind() != kind {
        return false;
    }
    match (slot, class) {
        (Slot::Object(Some(obj)), Some(class)) => heap
            .class_of(obj)
            .is_some_and(|c| heap.is_subclass(c, class)),
        _ => true,
    }
}

impl HostRuntime for Sandbox {
    fn version(&self) -> i32 {
        self.version
    }

    fn attach_current_thread(&self) -> i32 {
        if self.dead() {
            return JNI_ERR;
        }
        self.heap.lock().thread().attached = true;
        JNI_OK
    }

    fn detach_current_thread(&self) -> i32 {
        if self.dead() {
            return JNI_ERR;
        }
        let mut heap = self.heap.lock();
        if heap.thread_attached() {
            heap.release_locals();
            let thread = heap.thread();
            thread.attached = false;
            thread.pending = None;
        }
        JNI_OK
    }

    fn get_env(&self) -> i32 {
        if self.dead() {
            return JNI_EDETACHED;
        }
        if self.heap.lock().thread_attached() {
            JNI_OK
        } else {
            JNI_EDETACHED
        }
    }

    fn destroy(&self) -> i32 {
        if self.dead() {
            return JNI_ERR;
        }
        self.run_shutdown_hooks();
        self.destroyed.store(true, Ordering::SeqCst);
        JNI_OK
    }

    // ---- references ---------------------------------------------------------

    fn new_local_ref(&self, obj: RawRef) -> RawRef {
        if self.dead() {
            return RawRef::NULL;
        }
        let mut heap = self.heap.lock();
        match heap.deref(obj) {
            Some(id) => heap.new_local(id).unwrap_or(RawRef::NULL),
            None => RawRef::NULL,
        }
    }

    fn delete_local_ref(&self, obj: RawRef) {
        if self.dead() {
            return;
        }
        self.heap.lock().delete_ref(obj, false);
    }

    fn new_global_ref(&self, obj: RawRef) -> RawRef {
        if self.dead() {
            return RawRef::NULL;
        }
        let mut heap = self.heap.lock();
        match heap.deref(obj) {
            Some(id) => heap.new_global(id),
            None => RawRef::NULL,
        }
    }

    fn delete_global_ref(&self, obj: RawRef) {
        if self.dead() {
            return;
        }
        if !self.heap.lock().delete_ref(obj, true) {
            warn!("sandbox: {obj:?} is not a global reference");
        }
    }

    fn is_same_object(&self, a: RawRef, b: RawRef) -> bool {
        if self.dead() {
            return false;
        }
        let heap = self.heap.lock();
        heap.deref(a) == heap.deref(b)
    }

    // ---- classes ------------------------------------------------------------

    fn find_class(&self, name: &str) -> RawRef {
        if self.dead() {
            return RawRef::NULL;
        }
        let mut heap = self.heap.lock();
        match heap.class_named(name, false) {
            Some(index) => {
                let object = heap.classes[index].object;
                local_or_raise(&mut heap, object)
            }
            None => {
                raise(&mut heap, "java/lang/NoClassDefFoundError", Some(name));
                RawRef::NULL
            }
        }
    }

    fn get_object_class(&self, obj: RawRef) -> RawRef {
        if self.dead() {
            return RawRef::NULL;
        }
        let mut heap = self.heap.lock();
        let Some(class) = heap.deref(obj).and_then(|id| heap.class_of(id)) else {
            return RawRef::NULL;
        };
        let object = heap.classes[class].object;
        local_or_raise(&mut heap, object)
    }

    fn get_superclass(&self, class: RawRef) -> RawRef {
        if self.dead() {
            return RawRef::NULL;
        }
        let mut heap = self.heap.lock();
        let parent = heap
            .deref(class)
            .and_then(|id| heap.class_index(id))
            .and_then(|index| heap.classes[index].superclass);
        match parent {
            Some(parent) => {
                let object = heap.classes[parent].object;
                local_or_raise(&mut heap, object)
            }
            None => RawRef::NULL,
        }
    }

    fn is_instance_of(&self, obj: RawRef, class: RawRef) -> bool {
        if self.dead() {
            return false;
        }
        let heap = self.heap.lock();
        let Some(obj) = heap.deref(obj) else {
            return true;
        };
        let target = heap.deref(class).and_then(|id| heap.class_index(id));
        match (heap.class_of(obj), target) {
            (Some(c), Some(t)) => heap.is_subclass(c, t),
            _ => false,
        }
    }

    // ---- member lookup ------------------------------------------------------

    fn get_method_id(
        &self,
        class: RawRef,
        name: &str,
        signature: &str,
        is_static: bool,
    ) -> Option<MethodId> {
        if self.dead() {
            return None;
        }
        self.method_lookups.fetch_add(1, Ordering::SeqCst);
        let mut heap = self.heap.lock();
        let Some(index) = heap.deref(class).and_then(|id| heap.class_index(id)) else {
            raise(&mut heap, "java/lang/NullPointerException", Some("class is null"));
            return None;
        };
        let id = MethodId(heap::member_id(name, signature));
        let def = if name == "<init>" {
            heap.classes[index].methods.get(&id)
        } else {
            heap.find_method(index, id)
        };
        if def.is_some_and(|d| d.is_static == is_static) {
            return Some(id);
        }
        let message = format!("{}.{name}{signature}", heap.classes[index].name.replace('/', "."));
        raise(&mut heap, "java/lang/NoSuchMethodError", Some(&message));
        None
    }

    fn get_field_id(
        &self,
        class: RawRef,
        name: &str,
        signature: &str,
        is_static: bool,
    ) -> Option<FieldId> {
        if self.dead() {
            return None;
        }
        let mut heap = self.heap.lock();
        let Some(index) = heap.deref(class).and_then(|id| heap.class_index(id)) else {
            raise(&mut heap, "java/lang/NullPointerException", Some("class is null"));
            return None;
        };
        let id = FieldId(heap::member_id(name, signature));
        if heap
            .find_field(index, id)
            .is_some_and(|(_, def)| def.is_static == is_static)
        {
            return Some(id);
        }
        let message = format!("{}.{name}", heap.classes[index].name.replace('/', "."));
        raise(&mut heap, "java/lang/NoSuchFieldError", Some(&message));
        None
    }

    // ---- calls --------------------------------------------------------------

    fn call_method(&self, obj: RawRef, method: MethodId, ret: TypeKind) -> RawValue {
        self.invoke(obj, method, ret, &[], false, false)
    }

    fn call_method_a(
        &self,
        obj: RawRef,
        method: MethodId,
        ret: TypeKind,
        args: &[RawValue],
    ) -> RawValue {
        self.invoke(obj, method, ret, args, false, true)
    }

    fn call_static_method(&self, class: RawRef, method: MethodId, ret: TypeKind) -> RawValue {
        self.invoke(class, method, ret, &[], true, false)
    }

    fn call_static_method_a(
        &self,
        class: RawRef,
        method: MethodId,
        ret: TypeKind,
        args: &[RawValue],
    ) -> RawValue {
        self.invoke(class, method, ret, args, true, true)
    }

    fn new_object(&self, class: RawRef, ctor: MethodId) -> RawRef {
        self.construct(class, ctor, &[], false)
    }

    fn new_object_a(&self, class: RawRef, ctor: MethodId, args: &[RawValue]) -> RawRef {
        self.construct(class, ctor, args, true)
    }

    // ---- fields -------------------------------------------------------------

    fn get_field(&self, obj: RawRef, field: FieldId, kind: TypeKind) -> RawValue {
        if self.dead() {
            return kind.zero();
        }
        let mut heap = self.heap.lock();
        let slot = heap.deref(obj).and_then(|id| match &heap.object(id)?.body {
            Body::Fields(fields) => fields.get(&field).copied(),
            _ => None,
        });
        match slot {
            Some(slot) if slot.kind() == kind => value_or_raise(&mut heap, slot, kind),
            Some(_) => {
                raise(&mut heap, "java/lang/IllegalArgumentException", Some("field type mismatch"));
                kind.zero()
            }
            None if obj.is_null() => {
                raise(&mut heap, "java/lang/NullPointerException", Some("field owner is null"));
                kind.zero()
            }
            None => {
                raise(&mut heap, "java/lang/NoSuchFieldError", None);
                kind.zero()
            }
        }
    }

    fn set_field(&self, obj: RawRef, field: FieldId, value: RawValue) {
        if self.dead() {
            return;
        }
        let name = member_name(field.0).map(|(n, _)| n).unwrap_or_default();
        self.record(JournalEntry::SetField {
            field: name,
            value,
        });
        let mut heap = self.heap.lock();
        let Some(id) = heap.deref(obj) else {
            raise(&mut heap, "java/lang/NullPointerException", Some("field owner is null"));
            return;
        };
        let declared = heap
            .class_of(id)
            .and_then(|class| heap.find_field(class, field))
            .filter(|(_, def)| !def.is_static);
        let Some((_, def)) = declared else {
            raise(&mut heap, "java/lang/NoSuchFieldError", None);
            return;
        };
        let slot = heap.slot_in(value);
        if !assignable(&heap, slot, def.kind, None) {
            raise(&mut heap, "java/lang/IllegalArgumentException", Some("field type mismatch"));
            return;
        }
        if let Some(Body::Fields(fields)) = heap.object_mut(id).map(|o| &mut o.body) {
            fields.insert(field, slot);
        }
    }

    fn get_static_field(&self, class: RawRef, field: FieldId, kind: TypeKind) -> RawValue {
        if self.dead() {
            return kind.zero();
        }
        let mut heap = self.heap.lock();
        let slot = heap
            .deref(class)
            .and_then(|id| heap.class_index(id))
            .and_then(|index| heap.find_field(index, field))
            .and_then(|(decl, _)| heap.classes[decl].statics.get(&field).copied());
        match slot {
            Some(slot) if slot.kind() == kind => value_or_raise(&mut heap, slot, kind),
            _ => {
                raise(&mut heap, "java/lang/NoSuchFieldError", None);
                kind.zero()
            }
        }
    }

    fn set_static_field(&self, class: RawRef, field: FieldId, value: RawValue) {
        if self.dead() {
            return;
        }
        let name = member_name(field.0).map(|(n, _)| n).unwrap_or_default();
        self.record(JournalEntry::SetStaticField {
            field: name,
            value,
        });
        let mut heap = self.heap.lock();
        let declared = heap
            .deref(class)
            .and_then(|id| heap.class_index(id))
            .and_then(|index| heap.find_field(index, field))
            .filter(|(_, def)| def.is_static);
        let Some((decl, def)) = declared else {
            raise(&mut heap, "java/lang/NoSuchFieldError", None);
            return;
        };
        let slot = heap.slot_in(value);
        if !assignable(&heap, slot, def.kind, None) {
            raise(&mut heap, "java/lang/IllegalArgumentException", Some("field type mismatch"));
            return;
        }
        heap.classes[decl].statics.insert(field, slot);
    }

    // ---- exceptions ---------------------------------------------------------

    fn exception_check(&self) -> bool {
        if self.dead() {
            return false;
        }
        self.heap.lock().thread().pending.is_some()
    }

    fn exception_occurred(&self) -> RawRef {
        if self.dead() {
            return RawRef::NULL;
        }
        let mut heap = self.heap.lock();
        match heap.thread().pending {
            Some(obj) => heap.new_local_unbounded(obj),
            None => RawRef::NULL,
        }
    }

    fn exception_clear(&self) {
        if self.dead() {
            return;
        }
        self.heap.lock().thread().pending = None;
    }

    fn exception_describe(&self) {
        if self.dead() {
            return;
        }
        let text = {
            let mut heap = self.heap.lock();
            let Some(obj) = heap.thread().pending.take() else {
                return;
            };
            let class = heap.class_of(obj).unwrap_or(OBJECT);
            let name = heap.classes[class].name.replace('/', ".");
            let message = match heap.object(obj).map(|o| &o.body) {
                Some(Body::Fields(fields)) => match fields.get(&builder::detail_message()) {
                    Some(Slot::Object(Some(text))) => match heap.object(*text).map(|o| &o.body) {
                        Some(Body::Str(text)) => Some(text.clone()),
                        _ => None,
                    },
                    _ => None,
                },
                _ => None,
            };
            match message {
                Some(message) => format!(
                    "Exception in thread \"{:?}\" {name}: {message}\n",
                    std::thread::current().id()
                ),
                None => format!("Exception in thread \"{:?}\" {name}\n", std::thread::current().id()),
            }
        };
        match self.vfprintf {
            Some(hook) => {
                hook(&text);
            }
            None => warn!("{}", text.trim_end()),
        }
    }

    fn throw(&self, throwable: RawRef) -> i32 {
        if self.dead() {
            return JNI_ERR;
        }
        let mut heap = self.heap.lock();
        let Some(obj) = heap.deref(throwable) else {
            return JNI_ERR;
        };
        let Some(base) = heap.class_named("java/lang/Throwable", true) else {
            return JNI_ERR;
        };
        if !heap.class_of(obj).is_some_and(|c| heap.is_subclass(c, base)) {
            return JNI_ERR;
        }
        heap.thread().pending = Some(obj);
        JNI_OK
    }

    fn throw_new(&self, class: RawRef, message: &str) -> i32 {
        if self.dead() {
            return JNI_ERR;
        }
        let mut heap = self.heap.lock();
        let Some(index) = heap.deref(class).and_then(|id| heap.class_index(id)) else {
            return JNI_ERR;
        };
        raise_instance(&mut heap, index, Some(message));
        JNI_OK
    }

    // ---- arrays -------------------------------------------------------------

    fn new_primitive_array(&self, kind: TypeKind, length: i32) -> RawRef {
        if self.dead() {
            return RawRef::NULL;
        }
        let code = match kind {
            TypeKind::Boolean => 'Z',
            TypeKind::Byte => 'B',
            TypeKind::Char => 'C',
            TypeKind::Short => 'S',
            TypeKind::Int => 'I',
            TypeKind::Long => 'J',
            TypeKind::Float => 'F',
            TypeKind::Double => 'D',
            TypeKind::Object | TypeKind::Void => {
                raise(
                    &mut self.heap.lock(),
                    "java/lang/IllegalArgumentException",
                    Some("not a primitive element type"),
                );
                return RawRef::NULL;
            }
        };
        self.new_array(length, format!("[{code}"), Element::Primitive(kind), Slot::zero(kind))
    }

    fn new_object_array(&self, length: i32, element_class: RawRef, initial: RawRef) -> RawRef {
        if self.dead() {
            return RawRef::NULL;
        }
        let (class, element, fill) = {
            let mut heap = self.heap.lock();
            let Some(element) = heap.deref(element_class).and_then(|id| heap.class_index(id))
            else {
                raise(&mut heap, "java/lang/NullPointerException", Some("element class is null"));
                return RawRef::NULL;
            };
            let fill = Slot::Object(heap.deref(initial));
            if !assignable(&heap, fill, TypeKind::Object, Some(element)) {
                raise(&mut heap, "java/lang/ArrayStoreException", None);
                return RawRef::NULL;
            }
            (heap.array_class_name(element), element, fill)
        };
        self.new_array(length, class, Element::Object(element), fill)
    }

    fn get_array_length(&self, array: RawRef) -> i32 {
        if self.dead() {
            return 0;
        }
        let mut heap = self.heap.lock();
        let length = heap.deref(array).and_then(|id| match &heap.object(id)?.body {
            Body::Array { values, .. } => Some(values.len() as i32),
            _ => None,
        });
        match length {
            Some(length) => length,
            None => {
                raise(&mut heap, "java/lang/NullPointerException", Some("not an array"));
                0
            }
        }
    }

    fn get_array_element(&self, array: RawRef, index: i32, kind: TypeKind) -> RawValue {
        if self.dead() {
            return kind.zero();
        }
        let mut heap = self.heap.lock();
        let slot = heap.deref(array).and_then(|id| match &heap.object(id)?.body {
            Body::Array { values, .. } => Some(
                usize::try_from(index)
                    .ok()
                    .and_then(|i| values.get(i).copied())
                    .ok_or(values.len()),
            ),
            _ => None,
        });
        match slot {
            None => {
                raise(&mut heap, "java/lang/NullPointerException", Some("not an array"));
                kind.zero()
            }
            Some(Err(length)) => {
                let message = format!("Index {index} out of bounds for length {length}");
                raise(&mut heap, "java/lang/ArrayIndexOutOfBoundsException", Some(&message));
                kind.zero()
            }
            Some(Ok(slot)) if slot.kind() != kind => {
                raise(&mut heap, "java/lang/IllegalArgumentException", Some("element type mismatch"));
                kind.zero()
            }
            Some(Ok(slot)) => value_or_raise(&mut heap, slot, kind),
        }
    }

    fn set_array_element(&self, array: RawRef, index: i32, value: RawValue) {
        if self.dead() {
            return;
        }
        self.record(JournalEntry::SetArrayElement {
            array,
            index,
            value,
        });
        let mut heap = self.heap.lock();
        let slot = heap.slot_in(value);
        let Some(id) = heap.deref(array) else {
            raise(&mut heap, "java/lang/NullPointerException", Some("array is null"));
            return;
        };
        let shape = match heap.object(id).map(|o| &o.body) {
            Some(Body::Array { element, values }) => Some((*element, values.len())),
            _ => None,
        };
        let Some((element, length)) = shape else {
            raise(&mut heap, "java/lang/IllegalArgumentException", Some("not an array"));
            return;
        };
        let Some(i) = usize::try_from(index).ok().filter(|i| *i < length) else {
            let message = format!("Index {index} out of bounds for length {length}");
            raise(&mut heap, "java/lang/ArrayIndexOutOfBoundsException", Some(&message));
            return;
        };
        let ok = match element {
            Element::Primitive(kind) => slot.kind() == kind,
            Element::Object(class) => assignable(&heap, slot, TypeKind::Object, Some(class)),
        };
        if !ok {
            raise(&mut heap, "java/lang/ArrayStoreException", None);
            return;
        }
        if let Some(Body::Array { values, .. }) = heap.object_mut(id).map(|o| &mut o.body) {
            values[i] = slot;
        }
    }

    // ---- strings ------------------------------------------------------------

    fn new_string_utf(&self, text: &str) -> RawRef {
        if self.dead() {
            return RawRef::NULL;
        }
        let mut heap = self.heap.lock();
        let obj = heap.alloc(STRING, Body::Str(text.to_owned()));
        local_or_raise(&mut heap, obj)
    }

    fn get_string_utf_chars(&self, string: RawRef) -> Option<String> {
        if self.dead() {
            return None;
        }
        let heap = self.heap.lock();
        match &heap.object(heap.deref(string)?)?.body {
            Body::Str(text) => Some(text.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing;
