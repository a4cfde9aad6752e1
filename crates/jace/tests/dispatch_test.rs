// Integration tests for memoized method and constructor dispatch

mod common;

use common::{CALCULATOR_WITH_VALUE, Calculator, NEW_CALCULATOR, ScientificCalculator};
use jace::error::Error;
use jace::method::resolve_method;
use jace::sandbox::JournalEntry;
use jace::{JConstructor, JMethod, JString, JavaType, ObjectProxy};
use std::thread;

static ADD: JMethod<i32> = JMethod::new("add");
static DESCRIBE: JMethod<JString> = JMethod::new("describe");
static SQUARE: JMethod<i32> = JMethod::new("square");

#[test]
fn test_resolve_by_exact_signature() {
    let ctx = common::attach();
    let class = Calculator::class_descriptor();

    assert!(resolve_method(&ctx, class, "add", "(II)I", false).is_ok());

    let err = resolve_method(&ctx, class, "add", "(III)I", false).unwrap_err();
    match err {
        Error::MethodNotFound { class, name, signature, .. } => {
            assert_eq!(class, "demo.Calculator");
            assert_eq!(name, "add");
            assert_eq!(signature, "(III)I");
        }
        other => panic!("expected MethodNotFound, got {other:?}"),
    }
    assert!(ctx.check_exception().is_ok());
}

#[test]
fn test_static_and_instance_lookups_are_distinct() {
    let ctx = common::attach();
    let class = Calculator::class_descriptor();
    assert!(resolve_method(&ctx, class, "square", "(I)I", true).is_ok());
    assert!(resolve_method(&ctx, class, "square", "(I)I", false).is_err());
    assert!(resolve_method(&ctx, class, "add", "(II)I", true).is_err());
}

#[test]
fn test_construct_and_call() {
    let ctx = common::attach();
    let calc = CALCULATOR_WITH_VALUE.construct(&ctx, &[&12]).unwrap();
    assert_eq!(ADD.call(&ctx, &calc, &[&40, &2]).unwrap(), 42);
    assert_eq!(ADD.signature(), Some("(II)I"));

    let text = DESCRIBE.call(&ctx, &calc, &[]).unwrap();
    assert_eq!(text.to_rust_string(&ctx).unwrap(), "Calculator[12]");
}

#[test]
fn test_dispatch_follows_runtime_class() {
    static NEW_SCIENTIFIC: JConstructor<ScientificCalculator> = JConstructor::new();

    let ctx = common::attach();
    let scientific = NEW_SCIENTIFIC.construct(&ctx, &[]).unwrap();
    let as_base: Calculator = scientific.cast(&ctx).unwrap();

    let text = DESCRIBE.call(&ctx, &as_base, &[]).unwrap();
    assert_eq!(text.to_rust_string(&ctx).unwrap(), "Scientific");
    assert_eq!(
        as_base.dynamic_descriptor(&ctx).unwrap().dotted_name(),
        "demo.ScientificCalculator"
    );
}

#[test]
fn test_static_call() {
    let ctx = common::attach();
    let squared = SQUARE
        .call_static(&ctx, Calculator::class_descriptor(), &[&9])
        .unwrap();
    assert_eq!(squared, 81);
}

#[test]
fn test_arguments_carry_proxy_types() {
    static NEGATE: JMethod<i32> = JMethod::new("negate");

    let ctx = common::attach();
    let calc = NEW_CALCULATOR.construct(&ctx, &[]).unwrap();
    assert_eq!(NEGATE.call(&ctx, &calc, &[&5]).unwrap(), -5);
    assert_eq!(NEGATE.signature(), Some("(I)I"));
}

#[test]
fn test_concurrent_first_calls_resolve_once() {
    static TWICE_ADD: JMethod<i32> = JMethod::new("add");

    common::setup();
    let workers: Vec<_> = (0..8)
        .map(|i| {
            thread::spawn(move || {
                let sum = {
                    let ctx = common::attach();
                    let calc = NEW_CALCULATOR.construct(&ctx, &[]).unwrap();
                    TWICE_ADD.call(&ctx, &calc, &[&i, &i]).unwrap()
                };
                jace::detach();
                sum
            })
        })
        .collect();

    let sums: Vec<i32> = workers.into_iter().map(|w| w.join().unwrap()).collect();
    assert_eq!(sums, (0..8).map(|i| i * 2).collect::<Vec<_>>());
    assert!(TWICE_ADD.is_resolved());
    assert_eq!(TWICE_ADD.signature(), Some("(II)I"));
}

#[test]
fn test_calls_are_journaled_with_arguments() {
    let sandbox = common::setup();
    let ctx = common::attach();
    let calc = NEW_CALCULATOR.construct(&ctx, &[]).unwrap();
    ADD.call(&ctx, &calc, &[&1, &1]).unwrap();

    let journal = sandbox.journal();
    assert!(journal.iter().any(|entry| matches!(
        entry,
        JournalEntry::Call { method, with_args: true, .. } if method == "add"
    )));
}
