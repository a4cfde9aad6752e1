// Integration tests for array proxies and element write-through

mod common;

use common::{Calculator, NEW_CALCULATOR};
use jace::error::Error;
use jace::sandbox::JournalEntry;
use jace::sys::RawValue;
use jace::{JArray, JMethod, JString, JavaType, ObjectProxy};

static SUM: JMethod<i32> = JMethod::new("sum");
static WORDS: JMethod<JArray<JString>> = JMethod::new("words");

#[test]
fn test_element_write_through() {
    let sandbox = common::setup();
    let ctx = common::attach();
    let array = JArray::<i32>::new(&ctx, 10).unwrap();
    assert_eq!(array.length(&ctx).unwrap(), 10);

    let element = array.at(&ctx, 3).unwrap();
    assert_eq!(*element.get(), 0);
    element.set(&42).unwrap();

    assert_eq!(*element.get(), 0);
    assert_eq!(array.get(&ctx, 3).unwrap(), 42);
    assert!(sandbox.journal().contains(&JournalEntry::SetArrayElement {
        array: array.raw(),
        index: 3,
        value: RawValue::Int(42),
    }));
    assert_eq!(array.cached_length(), Some(10));
}

#[test]
fn test_foreign_code_sees_writes() {
    let ctx = common::attach();
    let calc: Calculator = NEW_CALCULATOR.construct(&ctx, &[]).unwrap();
    let array = JArray::<i32>::from_slice(&ctx, &[1, 2, 3]).unwrap();
    assert_eq!(SUM.call(&ctx, &calc, &[&array]).unwrap(), 6);

    for element in 0..3 {
        let proxy = array.at(&ctx, element).unwrap();
        let doubled = proxy.get() * 2;
        proxy.set(&doubled).unwrap();
    }
    assert_eq!(SUM.call(&ctx, &calc, &[&array]).unwrap(), 12);
}

#[test]
fn test_object_arrays_returned_from_calls() {
    let ctx = common::attach();
    let calc = NEW_CALCULATOR.construct(&ctx, &[]).unwrap();
    let text = JString::new(&ctx, "native proxies for the vm").unwrap();
    let words = WORDS.call(&ctx, &calc, &[&text]).unwrap();

    assert_eq!(words.cached_length(), None);
    let collected: Vec<String> = words
        .iter(&ctx)
        .unwrap()
        .map(|word| word.and_then(|w| w.to_rust_string(&ctx)))
        .collect::<jace::Result<_>>()
        .unwrap();
    assert_eq!(collected, ["native", "proxies", "for", "the", "vm"]);
    assert_eq!(words.cached_length(), Some(5));

    let replacement = JString::new(&ctx, "runtime").unwrap();
    words.at(&ctx, 4).unwrap().set(&replacement).unwrap();
    assert_eq!(words.get(&ctx, 4).unwrap().to_rust_string(&ctx).unwrap(), "runtime");
}

#[test]
fn test_array_descriptor() {
    let ctx = common::attach();
    let array = JArray::<JString>::new(&ctx, 2).unwrap();
    assert_eq!(
        JArray::<JString>::class_descriptor().type_signature(),
        "[Ljava/lang/String;"
    );
    assert_eq!(
        array.dynamic_descriptor(&ctx).unwrap().type_signature(),
        "[Ljava/lang/String;"
    );
    assert!(array.get(&ctx, 0).unwrap().is_null());
}

#[test]
fn test_out_of_range_index() {
    let ctx = common::attach();
    let array = JArray::<i32>::from_slice(&ctx, &[1, 2]).unwrap();
    let err = array.get(&ctx, 2).unwrap_err();
    if cfg!(feature = "checked") {
        assert!(matches!(
            err,
            Error::ArrayIndexOutOfBounds { index: 2, length: 2 }
        ));
    } else {
        let foreign = err.as_foreign().unwrap();
        assert_eq!(foreign.class_name(), "java.lang.ArrayIndexOutOfBoundsException");
    }
    assert_eq!(array.get(&ctx, 1).unwrap(), 2);
}
