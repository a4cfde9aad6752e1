//! Object, reference and class tables of the sandbox.
//!
//! Objects are never collected. References are the only handles callers
//! see; their bits come from one process-wide counter so a reference issued
//! by one sandbox is never valid in another.

use super::NativeFn;
use crate::sys::{FieldId, MethodId, RawRef, RawValue, TypeKind};
use fxhash::FxHashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::ThreadId;

pub(crate) type ObjId = u64;

static NEXT_REF: AtomicU64 = AtomicU64::new(0x1000);

static MEMBERS: Lazy<Mutex<FxHashMap<(String, String), u64>>> =
    Lazy::new(|| Mutex::new(FxHashMap::default()));

/// Interned id for a member name and signature, shared by every sandbox.
pub(crate) fn member_id(name: &str, signature: &str) -> u64 {
    let mut members = MEMBERS.lock();
    let next = members.len() as u64 + 1;
    *members
        .entry((name.to_owned(), signature.to_owned()))
        .or_insert(next)
}

/// Reverse lookup of [`member_id`].
pub(crate) fn member_name(id: u64) -> Option<(String, String)> {
    MEMBERS
        .lock()
        .iter()
        .find(|(_, v)| **v == id)
        .map(|(k, _)| k.clone())
}

/// A stored value: like `RawValue`, but objects are held by id.
#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) enum Slot {
    Boolean(bool),
    Byte(i8),
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Object(Option<ObjId>),
    Void,
}

impl Slot {
    pub(crate) fn zero(kind: TypeKind) -> Slot {
        match kind {
            TypeKind::Boolean => Slot::Boolean(false),
            TypeKind::Byte => Slot::Byte(0),
            TypeKind::Char => Slot::Char(0),
            TypeKind::Short => Slot::Short(0),
            TypeKind::Int => Slot::Int(0),
            TypeKind::Long => Slot::Long(0),
            TypeKind::Float => Slot::Float(0.0),
            TypeKind::Double => Slot::Double(0.0),
            TypeKind::Object => Slot::Object(None),
            TypeKind::Void => Slot::Void,
        }
    }

    pub(crate) fn kind(&self) -> TypeKind {
        match self {
            Slot::Boolean(_) => TypeKind::Boolean,
            Slot::Byte(_) => TypeKind::Byte,
            Slot::Char(_) => TypeKind::Char,
            Slot::Short(_) => TypeKind::Short,
            Slot::Int(_) => TypeKind::Int,
            Slot::Long(_) => TypeKind::Long,
            Slot::Float(_) => TypeKind::Float,
            Slot::Double(_) => TypeKind::Double,
            Slot::Object(_) => TypeKind::Object,
            Slot::Void => TypeKind::Void,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) enum Element {
    Primitive(TypeKind),
    Object(usize),
}

pub(crate) enum Body {
    Fields(FxHashMap<FieldId, Slot>),
    Str(String),
    Class(usize),
    Array { element: Element, values: Vec<Slot> },
}

pub(crate) struct Obj {
    pub(crate) class: usize,
    pub(crate) body: Body,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum Owner {
    Local(ThreadId),
    Global,
}

#[derive(Copy, Clone)]
struct RefEntry {
    obj: ObjId,
    owner: Owner,
}

#[derive(Clone)]
pub(crate) struct MethodDef {
    pub(crate) name: Arc<str>,
    pub(crate) signature: Arc<str>,
    pub(crate) is_static: bool,
    pub(crate) params: usize,
    pub(crate) body: NativeFn,
}

#[derive(Copy, Clone)]
pub(crate) struct FieldDef {
    pub(crate) is_static: bool,
    pub(crate) kind: TypeKind,
    pub(crate) initial: Slot,
}

pub(crate) struct ClassInfo {
    pub(crate) name: String,
    pub(crate) superclass: Option<usize>,
    pub(crate) methods: FxHashMap<MethodId, MethodDef>,
    pub(crate) fields: FxHashMap<FieldId, FieldDef>,
    pub(crate) statics: FxHashMap<FieldId, Slot>,
    pub(crate) object: ObjId,
    pub(crate) loader_only: bool,
}

#[derive(Default)]
pub(crate) struct ThreadState {
    pub(crate) attached: bool,
    pub(crate) locals: usize,
    pub(crate) pending: Option<ObjId>,
}

/// Well-known class indices, fixed by [`Heap::new`].
pub(crate) const OBJECT: usize = 0;
pub(crate) const CLASS: usize = 1;
pub(crate) const STRING: usize = 2;

pub(crate) struct Heap {
    next_obj: ObjId,
    objects: FxHashMap<ObjId, Obj>,
    refs: FxHashMap<u64, RefEntry>,
    globals: usize,
    pub(crate) classes: Vec<ClassInfo>,
    by_name: FxHashMap<String, usize>,
    threads: FxHashMap<ThreadId, ThreadState>,
    capacity: usize,
}

impl Heap {
    pub(crate) fn new(capacity: usize) -> Self {
        let mut heap = Heap {
            next_obj: 1,
            objects: FxHashMap::default(),
            refs: FxHashMap::default(),
            globals: 0,
            classes: Vec::new(),
            by_name: FxHashMap::default(),
            threads: FxHashMap::default(),
            capacity,
        };
        heap.define("java/lang/Object", None, false);
        heap.define("java/lang/Class", Some(OBJECT), false);
        heap.define("java/lang/String", Some(OBJECT), false);
        heap
    }

    // ---- classes ------------------------------------------------------------

    /// Adds a class and its `Class` object; returns its index.
    pub(crate) fn define(&mut self, name: &str, superclass: Option<usize>, loader_only: bool) -> usize {
        let index = self.classes.len();
        self.classes.push(ClassInfo {
            name: name.to_owned(),
            superclass,
            methods: FxHashMap::default(),
            fields: FxHashMap::default(),
            statics: FxHashMap::default(),
            object: 0,
            loader_only,
        });
        self.by_name.insert(name.to_owned(), index);
        let object = self.alloc(CLASS, Body::Class(index));
        self.classes[index].object = object;
        index
    }

    /// Looks up a class by raw name, creating array classes on demand.
    pub(crate) fn class_named(&mut self, name: &str, via_loader: bool) -> Option<usize> {
        if let Some(&index) = self.by_name.get(name) {
            let visible = via_loader || !self.classes[index].loader_only;
            return visible.then_some(index);
        }
        let element = name.strip_prefix('[')?;
        // the element type must exist before its array class does
        let valid = match element.as_bytes().first()? {
            b'Z' | b'B' | b'C' | b'S' | b'I' | b'J' | b'F' | b'D' => element.len() == 1,
            b'[' => self.class_named(element, via_loader).is_some(),
            b'L' => element
                .strip_prefix('L')
                .and_then(|e| e.strip_suffix(';'))
                .is_some_and(|e| self.class_named(e, via_loader).is_some()),
            _ => false,
        };
        valid.then(|| self.define(name, Some(OBJECT), false))
    }

    /// Array class name for elements of class `element`.
    pub(crate) fn array_class_name(&self, element: usize) -> String {
        let name = &self.classes[element].name;
        if name.starts_with('[') {
            format!("[{name}")
        } else {
            format!("[L{name};")
        }
    }

    pub(crate) fn is_subclass(&self, mut class: usize, ancestor: usize) -> bool {
        loop {
            if class == ancestor {
                return true;
            }
            match self.classes[class].superclass {
                Some(parent) => class = parent,
                None => return false,
            }
        }
    }

    /// Virtual lookup: the nearest definition of `method` from `class` up.
    pub(crate) fn find_method(&self, mut class: usize, method: MethodId) -> Option<&MethodDef> {
        loop {
            let info = &self.classes[class];
            if let Some(def) = info.methods.get(&method) {
                return Some(def);
            }
            class = info.superclass?;
        }
    }

    /// The class declaring `field`, searching from `class` up.
    pub(crate) fn find_field(&self, mut class: usize, field: FieldId) -> Option<(usize, FieldDef)> {
        loop {
            let info = &self.classes[class];
            if let Some(def) = info.fields.get(&field) {
                return Some((class, *def));
            }
            class = info.superclass?;
        }
    }

    /// Initial instance field values for a new object of `class`.
    pub(crate) fn instance_fields(&self, mut class: usize) -> FxHashMap<FieldId, Slot> {
        let mut fields = FxHashMap::default();
        loop {
            let info = &self.classes[class];
            for (id, def) in &info.fields {
                if !def.is_static {
                    fields.entry(*id).or_insert(def.initial);
                }
            }
            match info.superclass {
                Some(parent) => class = parent,
                None => return fields,
            }
        }
    }

    // ---- objects ------------------------------------------------------------

    pub(crate) fn alloc(&mut self, class: usize, body: Body) -> ObjId {
        let id = self.next_obj;
        self.next_obj += 1;
        self.objects.insert(id, Obj { class, body });
        id
    }

    pub(crate) fn object(&self, id: ObjId) -> Option<&Obj> {
        self.objects.get(&id)
    }

    pub(crate) fn object_mut(&mut self, id: ObjId) -> Option<&mut Obj> {
        self.objects.get_mut(&id)
    }

    pub(crate) fn class_of(&self, id: ObjId) -> Option<usize> {
        self.objects.get(&id).map(|o| o.class)
    }

    /// The class index a `Class` object stands for.
    pub(crate) fn class_index(&self, id: ObjId) -> Option<usize> {
        match self.objects.get(&id)?.body {
            Body::Class(index) => Some(index),
            _ => None,
        }
    }

    pub(crate) fn live_objects(&self) -> usize {
        self.objects.len()
    }

    // ---- references ---------------------------------------------------------

    pub(crate) fn deref(&self, r: RawRef) -> Option<ObjId> {
        self.refs.get(&r.to_bits()).map(|e| e.obj)
    }

    /// A new local for the calling thread, or `None` if its table is full.
    pub(crate) fn new_local(&mut self, obj: ObjId) -> Option<RawRef> {
        let capacity = self.capacity;
        let thread = self.thread();
        if thread.locals >= capacity {
            return None;
        }
        thread.locals += 1;
        Some(self.insert_ref(obj, Owner::Local(std::thread::current().id())))
    }

    /// A new local that ignores the table bound; used for pending exceptions.
    pub(crate) fn new_local_unbounded(&mut self, obj: ObjId) -> RawRef {
        self.thread().locals += 1;
        self.insert_ref(obj, Owner::Local(std::thread::current().id()))
    }

    pub(crate) fn new_global(&mut self, obj: ObjId) -> RawRef {
        self.globals += 1;
        self.insert_ref(obj, Owner::Global)
    }

    fn insert_ref(&mut self, obj: ObjId, owner: Owner) -> RawRef {
        let bits = NEXT_REF.fetch_add(1, Ordering::Relaxed);
        self.refs.insert(bits, RefEntry { obj, owner });
        RawRef::from_bits(bits)
    }

    /// Deletes `r` if it is a reference of the requested category.
    pub(crate) fn delete_ref(&mut self, r: RawRef, global: bool) -> bool {
        let Some(entry) = self.refs.get(&r.to_bits()).copied() else {
            return false;
        };
        match (entry.owner, global) {
            (Owner::Global, true) => {
                self.refs.remove(&r.to_bits());
                self.globals -= 1;
                true
            }
            (Owner::Local(owner), false) => {
                self.refs.remove(&r.to_bits());
                if let Some(thread) = self.threads.get_mut(&owner) {
                    thread.locals = thread.locals.saturating_sub(1);
                }
                true
            }
            _ => false,
        }
    }

    /// Drops every local owned by the calling thread.
    pub(crate) fn release_locals(&mut self) {
        let me = std::thread::current().id();
        self.refs.retain(|_, e| e.owner != Owner::Local(me));
        self.thread().locals = 0;
    }

    pub(crate) fn global_count(&self) -> usize {
        self.globals
    }

    // ---- values -------------------------------------------------------------

    pub(crate) fn slot_in(&self, value: RawValue) -> Slot {
        match value {
            RawValue::Boolean(v) => Slot::Boolean(v),
            RawValue::Byte(v) => Slot::Byte(v),
            RawValue::Char(v) => Slot::Char(v),
            RawValue::Short(v) => Slot::Short(v),
            RawValue::Int(v) => Slot::Int(v),
            RawValue::Long(v) => Slot::Long(v),
            RawValue::Float(v) => Slot::Float(v),
            RawValue::Double(v) => Slot::Double(v),
            RawValue::Object(r) => Slot::Object(self.deref(r)),
            RawValue::Void => Slot::Void,
        }
    }

    /// Converts a stored value for the caller; objects become new locals.
    pub(crate) fn slot_out(&mut self, slot: Slot) -> Option<RawValue> {
        Some(match slot {
            Slot::Boolean(v) => RawValue::Boolean(v),
            Slot::Byte(v) => RawValue::Byte(v),
            Slot::Char(v) => RawValue::Char(v),
            Slot::Short(v) => RawValue::Short(v),
            Slot::Int(v) => RawValue::Int(v),
            Slot::Long(v) => RawValue::Long(v),
            Slot::Float(v) => RawValue::Float(v),
            Slot::Double(v) => RawValue::Double(v),
            Slot::Object(None) => RawValue::Object(RawRef::NULL),
            Slot::Object(Some(id)) => RawValue::Object(self.new_local(id)?),
            Slot::Void => RawValue::Void,
        })
    }

    // ---- threads ------------------------------------------------------------

    pub(crate) fn thread(&mut self) -> &mut ThreadState {
        self.threads
            .entry(std::thread::current().id())
            .or_default()
    }

    pub(crate) fn attached_threads(&self) -> usize {
        self.threads.values().filter(|t| t.attached).count()
    }

    pub(crate) fn thread_attached(&self) -> bool {
        self.threads
            .get(&std::thread::current().id())
            .is_some_and(|t| t.attached)
    }

    pub(crate) fn thread_locals(&self) -> usize {
        self.threads
            .get(&std::thread::current().id())
            .map_or(0, |t| t.locals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_ids_are_shared() {
        let a = member_id("run", "()V");
        let b = member_id("run", "()V");
        let c = member_id("run", "(I)V");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(member_name(c), Some(("run".to_owned(), "(I)V".to_owned())));
    }

    #[test]
    fn test_local_table_is_bounded() {
        let mut heap = Heap::new(2);
        let obj = heap.alloc(OBJECT, Body::Fields(FxHashMap::default()));
        let a = heap.new_local(obj).unwrap();
        assert!(heap.new_local(obj).is_some());
        assert!(heap.new_local(obj).is_none());

        assert!(heap.delete_ref(a, false));
        assert!(heap.new_local(obj).is_some());
    }

    #[test]
    fn test_delete_checks_category() {
        let mut heap = Heap::new(8);
        let obj = heap.alloc(OBJECT, Body::Fields(FxHashMap::default()));
        let global = heap.new_global(obj);
        assert!(!heap.delete_ref(global, false));
        assert_eq!(heap.global_count(), 1);
        assert!(heap.delete_ref(global, true));
        assert_eq!(heap.global_count(), 0);
        assert!(!heap.delete_ref(global, true));
    }

    #[test]
    fn test_array_classes_on_demand() {
        let mut heap = Heap::new(8);
        assert!(heap.class_named("[I", false).is_some());
        assert!(heap.class_named("[[Ljava/lang/String;", false).is_some());
        assert!(heap.class_named("[Lno/Such;", false).is_none());
        assert!(heap.class_named("[Q", false).is_none());
    }

    #[test]
    fn test_loader_only_classes_are_hidden() {
        let mut heap = Heap::new(8);
        heap.define("plugin/Widget", Some(OBJECT), true);
        assert!(heap.class_named("plugin/Widget", false).is_none());
        assert!(heap.class_named("plugin/Widget", true).is_some());
    }
}
