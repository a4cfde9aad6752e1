// Integration tests for per-thread attachment and the class-loader override

mod common;

use common::{CALCULATOR_WITH_VALUE, Calculator, Counter};
use jace::context::{self, has_class_loader, on_thread_destruction, set_class_loader};
use jace::declare_proxy;
use jace::error::Error;
use jace::sys::{JNI_EDETACHED, JNI_OK};
use jace::{ClassDescriptor, JConstructor, JMethod, JString, JavaType, ObjectProxy};
use std::sync::{Arc, Barrier};
use std::thread;

declare_proxy! {
    /// `java.lang.ClassLoader`
    struct ClassLoader => "java/lang/ClassLoader";
}

static DESCRIBE: JMethod<JString> = JMethod::new("describe");
static INCREMENT: JMethod<i64> = JMethod::new("increment");

fn env_status() -> i32 {
    jace::bridge().runtime().unwrap().get_env()
}

#[test]
fn test_threads_attach_independently() {
    common::setup();
    let barrier = Arc::new(Barrier::new(2));
    let workers: Vec<_> = (0..2)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let counted = {
                    let ctx = common::attach();
                    assert_eq!(env_status(), JNI_OK);
                    static NEW_COUNTER: JConstructor<Counter> = JConstructor::new();
                    let counter = NEW_COUNTER.construct(&ctx, &[]).unwrap();
                    barrier.wait();
                    (0..5).map(|_| INCREMENT.call(&ctx, &counter, &[]).unwrap()).last()
                };
                jace::detach();
                assert_eq!(env_status(), JNI_EDETACHED);
                counted
            })
        })
        .collect();

    for worker in workers {
        assert_eq!(worker.join().unwrap(), Some(5));
    }
}

#[test]
fn test_proxy_shared_between_threads() {
    let ctx = common::attach();
    let calc: Arc<Calculator> =
        Arc::new(CALCULATOR_WITH_VALUE.construct(&ctx, &[&21]).unwrap());

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let calc = Arc::clone(&calc);
            thread::spawn(move || {
                let text = {
                    let ctx = common::attach();
                    let copy = calc.try_clone(&ctx).unwrap();
                    assert!(copy.same_object(&ctx, &*calc));
                    DESCRIBE.call(&ctx, &copy, &[]).unwrap().to_rust_string(&ctx).unwrap()
                };
                jace::detach();
                text
            })
        })
        .collect();

    for worker in workers {
        assert_eq!(worker.join().unwrap(), "Calculator[21]");
    }
    let text = DESCRIBE.call(&ctx, &*calc, &[]).unwrap();
    assert_eq!(text.to_rust_string(&ctx).unwrap(), "Calculator[21]");
}

#[test]
fn test_concurrent_descriptor_resolution_pins_once() {
    declare_proxy! {
        struct Pinned => "demo/ScientificCalculator";
    }

    common::setup();
    let barrier = Arc::new(Barrier::new(6));
    let workers: Vec<_> = (0..6)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let raw = {
                    let ctx = common::attach();
                    barrier.wait();
                    Pinned::class_descriptor().resolve(&ctx).unwrap()
                };
                jace::detach();
                raw
            })
        })
        .collect();

    let handles: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();
    assert!(handles.windows(2).all(|pair| pair[0] == pair[1]));
    assert!(Pinned::class_descriptor().is_resolved());
}

#[test]
fn test_class_loader_override() {
    static NEW_LOADER: JConstructor<ClassLoader> = JConstructor::new();
    static WIDGET_ID: JMethod<i32> = JMethod::new("id");

    common::setup();
    let worker = thread::spawn(|| {
        {
            let ctx = common::attach();
            let widget = ClassDescriptor::for_class("plugin.Widget");
            assert!(matches!(
                widget.resolve(&ctx),
                Err(Error::ClassNotFound { .. })
            ));

            let loader = NEW_LOADER.construct(&ctx, &[]).unwrap();
            set_class_loader(&ctx, Some(loader.raw())).unwrap();
            assert!(has_class_loader());
            drop(loader);

            let installed = context::class_loader(&ctx).unwrap().expect("override installed");
            assert!(!installed.is_null());
            drop(installed);

            assert_eq!(WIDGET_ID.call_static(&ctx, widget, &[]).unwrap(), 7);
            assert!(widget.is_resolved());
        }

        on_thread_destruction(jace::bridge());
        assert!(!has_class_loader());
        assert_eq!(env_status(), JNI_EDETACHED);
    });
    worker.join().unwrap();

    let ctx = common::attach();
    assert!(!has_class_loader());
    set_class_loader(&ctx, None).unwrap();
    assert!(context::class_loader(&ctx).unwrap().is_none());
}
