//! Shared runtime for unit tests.
//!
//! A static descriptor pins its class for one bridge only, so every unit
//! test that resolves classes attaches through the single leaked bridge
//! kept here. Tests that count references build their own with
//! [`isolated`], and stay away from static descriptors.

use super::{ClassDef, Sandbox, SandboxBuilder};
use crate::context::ThreadContext;
use crate::helper::Bridge;
use crate::loader::{ExistingVmLoader, RuntimeHandle};
use crate::options::OptionList;
use crate::sys::{HostRuntime, RawRef, RawValue, TypeKind};
use jace_log::{Level, MemorySink, Sink};
use once_cell::sync::Lazy;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

struct Fixture {
    bridge: &'static Bridge,
    sandbox: Arc<Sandbox>,
}

static FIXTURE: Lazy<Fixture> = Lazy::new(|| {
    let (bridge, sandbox) = isolated();
    Fixture { bridge, sandbox }
});

/// Attaches the calling thread to the shared bridge.
pub(crate) fn attach() -> ThreadContext {
    FIXTURE.bridge.attach().expect("attach to the shared test bridge")
}

/// The shared sandbox.
pub(crate) fn sandbox() -> &'static Sandbox {
    &FIXTURE.sandbox
}

/// A private bridge over a fresh sandbox with the demo classes.
pub(crate) fn isolated() -> (&'static Bridge, Arc<Sandbox>) {
    let sandbox = demo_classes(Sandbox::builder().local_capacity(1 << 16))
        .build(&OptionList::new(), false)
        .expect("demo sandbox");
    let bridge: &'static Bridge = Box::leak(Box::new(Bridge::new()));
    let vm: RuntimeHandle = Arc::clone(&sandbox) as RuntimeHandle;
    bridge.set_vm_loader(&ExistingVmLoader::new(vm));
    (bridge, sandbox)
}

// Tests that swap the process-wide log sink take turns.
static LOG_LOCK: Mutex<()> = Mutex::new(());

/// Routes every log record into memory until dropped.
///
/// Other tests keep running while a capture is active, so assertions should
/// look for records only the capturing test can produce.
pub(crate) struct LogCapture {
    sink: Arc<MemorySink>,
    previous: Option<(Arc<dyn Sink>, Level)>,
    _turn: MutexGuard<'static, ()>,
}

impl LogCapture {
    pub(crate) fn start() -> Self {
        let turn = LOG_LOCK.lock();
        let sink = Arc::new(MemorySink::new());
        let level = jace_log::get_logger().level();
        let sink_before = jace_log::set_sink(Arc::clone(&sink) as Arc<dyn Sink>);
        jace_log::set_level(Level::Trace);
        LogCapture {
            sink,
            previous: Some((sink_before, level)),
            _turn: turn,
        }
    }

    pub(crate) fn contains(&self, level: Level, needle: &str) -> bool {
        self.sink.contains(level, needle)
    }
}

impl Drop for LogCapture {
    fn drop(&mut self) {
        if let Some((sink, level)) = self.previous.take() {
            jace_log::set_level(level);
            jace_log::set_sink(sink);
        }
    }
}

fn int(value: RawValue) -> i32 {
    match value {
        RawValue::Int(v) => v,
        _ => 0,
    }
}

fn string(sb: &Sandbox, value: RawValue) -> String {
    sb.get_string_utf_chars(value.as_ref()).unwrap_or_default()
}

fn text(sb: &Sandbox, text: &str) -> RawValue {
    RawValue::Object(sb.new_string_utf(text))
}

/// Throws `class(message)` from inside a method body.
fn throw(sb: &Sandbox, class: &str, message: &str) -> RawValue {
    let class = sb.find_class(&class.replace('.', "/"));
    if !class.is_null() {
        sb.throw_new(class, message);
        sb.delete_local_ref(class);
    }
    RawValue::Void
}

/// Classes exercised by the unit tests.
pub(crate) fn demo_classes(builder: SandboxBuilder) -> SandboxBuilder {
    let last = || Sandbox::member_field("last", "I");

    let calculator = ClassDef::new("demo/Calculator")
        .field("last", "I")
        .field("name", "Ljava/lang/String;")
        .static_field("instances", "I", RawValue::Int(0))
        .static_field("label", "Ljava/lang/String;", RawValue::Object(RawRef::NULL))
        .constructor("()V", |_, _, _| {})
        .constructor("(I)V", move |sb, this, args| {
            sb.set_field(this, last(), args[0]);
        })
        .method("add", "(II)I", |_, _, args| {
            RawValue::Int(int(args[0]).wrapping_add(int(args[1])))
        })
        .method("twice", "(I)I", |_, _, args| RawValue::Int(int(args[0]) * 2))
        .method("last", "()I", move |sb, this, _| sb.get_field(this, last(), TypeKind::Int))
        .method("describe", "()Ljava/lang/String;", move |sb, this, _| {
            let value = int(sb.get_field(this, last(), TypeKind::Int));
            text(sb, &format!("Calculator[{value}]"))
        })
        .method(
            "concat",
            "(Ljava/lang/String;Ljava/lang/String;)Ljava/lang/String;",
            |sb, _, args| text(sb, &(string(sb, args[0]) + &string(sb, args[1]))),
        )
        .method("sum", "([I)I", |sb, _, args| {
            let array = args[0].as_ref();
            let total = (0..sb.get_array_length(array))
                .map(|i| int(sb.get_array_element(array, i, TypeKind::Int)))
                .sum();
            RawValue::Int(total)
        })
        .method("range", "(I)[I", |sb, _, args| {
            let array = sb.new_primitive_array(TypeKind::Int, int(args[0]));
            for i in 0..int(args[0]).max(0) {
                sb.set_array_element(array, i, RawValue::Int(i));
            }
            RawValue::Object(array)
        })
        .method("fail", "()V", |sb, _, _| {
            throw(sb, "java/lang/IllegalStateException", "calculator failure")
        })
        .static_method("square", "(I)I", |_, _, args| RawValue::Int(int(args[0]) * int(args[0])))
        .static_method("version", "()I", |_, _, _| RawValue::Int(3));

    let scientific = ClassDef::new("demo/ScientificCalculator")
        .extends("demo/Calculator")
        .method("describe", "()Ljava/lang/String;", |sb, _, _| text(sb, "Scientific"));

    let thrower = ClassDef::new("demo/Thrower").static_method(
        "raise",
        "(Ljava/lang/String;Ljava/lang/String;)V",
        |sb, _, args| throw(sb, &string(sb, args[0]), &string(sb, args[1])),
    );

    builder
        .class(calculator)
        .class(scientific)
        .class(thrower)
        .class(ClassDef::throwable("demo/AppException", "java/lang/RuntimeException"))
        .class(ClassDef::throwable("demo/ChildException", "demo/AppException"))
        .class(ClassDef::throwable("demo/GrandchildException", "demo/ChildException"))
        .class(
            ClassDef::new("plugin/Widget")
                .loader_only()
                .static_method("id", "()I", |_, _, _| RawValue::Int(7)),
        )
}
