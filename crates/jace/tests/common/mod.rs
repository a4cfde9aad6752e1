// Common test utilities for integration tests
//
// Every test binary boots the process bridge once, over a sandbox holding
// the demo classes below, and shares it between its tests.

#![allow(dead_code)]

use jace::declare_exception;
use jace::declare_proxy;
use jace::helper::Bridge;
use jace::loader::{RuntimeHandle, StaticVmLoader};
use jace::options::{OptionList, VmOption};
use jace::sandbox::{ClassDef, Sandbox, SandboxBuilder};
use jace::sys::{HostRuntime, RawRef, RawValue, TypeKind};
use jace::{JConstructor, ThreadContext};
use once_cell::sync::OnceCell;
use std::sync::Arc;

declare_proxy! {
    /// `demo.Calculator`
    pub struct Calculator => "demo/Calculator";
}

declare_proxy! {
    /// `demo.ScientificCalculator`
    pub struct ScientificCalculator => "demo/ScientificCalculator";
}

declare_proxy! {
    /// `demo.Counter`
    pub struct Counter => "demo/Counter";
}

declare_exception! {
    /// `demo.AppException`
    pub struct AppException => "demo/AppException";
}

declare_exception! {
    /// `demo.ChildException`
    pub struct ChildException => "demo/ChildException";
}

/// `new Calculator()`
pub static NEW_CALCULATOR: JConstructor<Calculator> = JConstructor::new();

/// `new Calculator(int)`
pub static CALCULATOR_WITH_VALUE: JConstructor<Calculator> = JConstructor::new();

static SANDBOX: OnceCell<Arc<Sandbox>> = OnceCell::new();

/// Boots the process bridge on first call and returns its sandbox.
pub fn setup() -> &'static Sandbox {
    SANDBOX.get_or_init(|| {
        let created: Arc<OnceCell<Arc<Sandbox>>> = Arc::new(OnceCell::new());
        let slot = Arc::clone(&created);
        let loader = StaticVmLoader::new(move |options, ignore| {
            let sandbox = demo_classes(Sandbox::builder().local_capacity(1 << 16))
                .build(options, ignore)?;
            let _ = slot.set(Arc::clone(&sandbox));
            Ok(sandbox as RuntimeHandle)
        });
        let options = OptionList::new()
            .with(VmOption::class_path("demo.jar"))
            .with(VmOption::max_heap("64m"));
        jace::bootstrap(&loader, &options).expect("bootstrap the demo runtime");
        created.get().cloned().expect("sandbox created by the loader")
    })
}

/// Attaches the calling thread to the process bridge.
pub fn attach() -> ThreadContext {
    setup();
    jace::attach().expect("attach to the demo runtime")
}

/// A private bridge over a fresh demo sandbox, for tests that count.
pub fn isolated() -> (&'static Bridge, Arc<Sandbox>) {
    let sandbox = demo_classes(Sandbox::builder())
        .build(&OptionList::new(), false)
        .expect("demo sandbox");
    let bridge: &'static Bridge = Box::leak(Box::new(Bridge::new()));
    let vm = Arc::clone(&sandbox) as RuntimeHandle;
    bridge.set_vm_loader(&jace::loader::ExistingVmLoader::new(vm));
    (bridge, sandbox)
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

fn throw(sb: &Sandbox, class: &str, message: &str) -> RawValue {
    let class = sb.find_class(&class.replace('.', "/"));
    if !class.is_null() {
        sb.throw_new(class, message);
        sb.delete_local_ref(class);
    }
    RawValue::Void
}

/// The demo classes.
pub fn demo_classes(builder: SandboxBuilder) -> SandboxBuilder {
    let last = || Sandbox::member_field("last", "I");
    let count = || Sandbox::member_field("count", "J");

    let calculator = ClassDef::new("demo/Calculator")
        .field("last", "I")
        .static_field("instances", "I", RawValue::Int(0))
        .constructor("()V", |_, _, _| {})
        .constructor("(I)V", move |sb, this, args| sb.set_field(this, last(), args[0]))
        .method("add", "(II)I", |_, _, args| {
            RawValue::Int(int(args[0]).wrapping_add(int(args[1])))
        })
        .method("negate", "(I)I", |_, _, args| RawValue::Int(-int(args[0])))
        .method("describe", "()Ljava/lang/String;", move |sb, this, _| {
            let value = int(sb.get_field(this, last(), TypeKind::Int));
            RawValue::Object(sb.new_string_utf(&format!("Calculator[{value}]")))
        })
        .method("sum", "([I)I", |sb, _, args| {
            let array = args[0].as_ref();
            let total = (0..sb.get_array_length(array))
                .map(|i| int(sb.get_array_element(array, i, TypeKind::Int)))
                .sum();
            RawValue::Int(total)
        })
        .method("words", "(Ljava/lang/String;)[Ljava/lang/String;", |sb, _, args| {
            let text = string(sb, args[0]);
            let string_class = sb.find_class("java/lang/String");
            let parts: Vec<&str> = text.split_whitespace().collect();
            let array = sb.new_object_array(parts.len() as i32, string_class, RawRef::NULL);
            for (i, part) in parts.iter().enumerate() {
                let word = sb.new_string_utf(part);
                sb.set_array_element(array, i as i32, RawValue::Object(word));
                sb.delete_local_ref(word);
            }
            sb.delete_local_ref(string_class);
            RawValue::Object(array)
        })
        .method("divide", "(II)I", |sb, _, args| {
            if int(args[1]) == 0 {
                return throw(sb, "demo.ChildException", "division by zero");
            }
            RawValue::Int(int(args[0]) / int(args[1]))
        })
        .static_method("square", "(I)I", |_, _, args| RawValue::Int(int(args[0]) * int(args[0])));

    let scientific = ClassDef::new("demo/ScientificCalculator")
        .extends("demo/Calculator")
        .method("describe", "()Ljava/lang/String;", |sb, _, _| {
            RawValue::Object(sb.new_string_utf("Scientific"))
        });

    let counter = ClassDef::new("demo/Counter")
        .field("count", "J")
        .method("increment", "()J", move |sb, this, _| {
            let next = match sb.get_field(this, count(), TypeKind::Long) {
                RawValue::Long(v) => v + 1,
                _ => 1,
            };
            sb.set_field(this, count(), RawValue::Long(next));
            RawValue::Long(next)
        });

    let thrower = ClassDef::new("demo/Thrower").static_method(
        "raise",
        "(Ljava/lang/String;Ljava/lang/String;)V",
        |sb, _, args| throw(sb, &string(sb, args[0]), &string(sb, args[1])),
    );

    builder
        .class(calculator)
        .class(scientific)
        .class(counter)
        .class(thrower)
        .class(ClassDef::throwable("demo/AppException", "java/lang/RuntimeException"))
        .class(ClassDef::throwable("demo/ChildException", "demo/AppException"))
        .class(ClassDef::throwable("demo/GrandchildException", "demo/ChildException"))
        .class(ClassDef::throwable("demo/StrayError", "java/lang/Throwable"))
        .class(ClassDef::throwable("demo/QuotaException", "demo/AppException"))
        .class(
            ClassDef::new("plugin/Widget")
                .loader_only()
                .static_method("id", "()I", |_, _, _| RawValue::Int(7)),
        )
}
