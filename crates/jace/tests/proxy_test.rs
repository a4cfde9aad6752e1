// Integration tests for proxy ownership, identity and field access

mod common;

use common::{CALCULATOR_WITH_VALUE, Calculator, NEW_CALCULATOR};
use jace::{ClassDescriptor, JField, JObject, JString, JavaType, ObjectProxy};

/// Small deterministic generator for operation sequences.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self, bound: usize) -> usize {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        ((self.0 >> 33) as usize) % bound
    }
}

#[test]
fn test_global_count_tracks_live_proxies() {
    let (bridge, sandbox) = common::isolated();
    let ctx = bridge.attach().unwrap();
    let baseline = sandbox.global_ref_count();

    for seed in [1u64, 7, 42, 1234] {
        let mut rng = Lcg(seed);
        let mut live: Vec<JString> = Vec::new();

        for step in 0..200 {
            match rng.next(5) {
                0 => live.push(JString::new(&ctx, &format!("s{step}")).unwrap()),
                1 if !live.is_empty() => {
                    let i = rng.next(live.len());
                    let copy = live[i].try_clone(&ctx).unwrap();
                    live.push(copy);
                }
                2 if !live.is_empty() => {
                    let i = rng.next(live.len());
                    live.swap_remove(i);
                }
                3 if live.len() >= 2 => {
                    let from = rng.next(live.len());
                    let to = rng.next(live.len());
                    let source = live[from].try_clone(&ctx).unwrap();
                    live[to].assign(&ctx, &source).unwrap();
                }
                4 if !live.is_empty() => {
                    let i = rng.next(live.len());
                    live[i].handle_mut().clear();
                }
                _ => {}
            }

            let expected = live.iter().filter(|s| !s.is_null()).count();
            assert_eq!(bridge.global_ref_count(), expected, "seed {seed} step {step}");
            assert_eq!(sandbox.global_ref_count(), baseline + expected);
        }
    }
}

#[test]
fn test_copies_never_share_references() {
    let (bridge, _sandbox) = common::isolated();
    let ctx = bridge.attach().unwrap();

    let original = JString::new(&ctx, "value").unwrap();
    let mut copies = vec![original.try_clone(&ctx).unwrap()];
    let mut assigned = JString::null();
    assigned.assign(&ctx, &original).unwrap();
    copies.push(assigned);

    for copy in &copies {
        assert_ne!(copy.raw(), original.raw());
        assert!(copy.same_object(&ctx, &original));
    }
    assert_ne!(copies[0].raw(), copies[1].raw());

    drop(original);
    for copy in &copies {
        assert_eq!(copy.to_rust_string(&ctx).unwrap(), "value");
    }
}

#[test]
fn test_descriptor_pins_once() {
    let ctx = common::attach();
    let first = Calculator::class_descriptor().resolve(&ctx).unwrap();
    let second = Calculator::class_descriptor().resolve(&ctx).unwrap();
    assert_eq!(first, second);

    let calc = NEW_CALCULATOR.construct(&ctx, &[]).unwrap();
    let dynamic = calc.dynamic_descriptor(&ctx).unwrap();
    assert_eq!(dynamic.type_signature(), Calculator::class_descriptor().type_signature());
    assert!(ClassDescriptor::for_class("demo.Calculator").resolve(&ctx).is_ok());
}

#[test]
fn test_cross_type_views() {
    let ctx = common::attach();
    let calc = CALCULATOR_WITH_VALUE.construct(&ctx, &[&5]).unwrap();
    let object: JObject = calc.try_clone(&ctx).unwrap().into_object();
    assert!(object.same_object(&ctx, &calc));
    assert!(object.equals(&ctx, &calc).unwrap());
    assert_eq!(object.hash_code(&ctx).unwrap(), calc.hash_code(&ctx).unwrap());

    let back: Calculator = object.cast(&ctx).unwrap();
    assert!(back.same_object(&ctx, &calc));
    assert!(object.cast::<JString>(&ctx).is_err());

    let text = object.java_to_string(&ctx).unwrap();
    assert!(text.starts_with("demo.Calculator@"), "{text}");
}

#[test]
fn test_field_proxy_writes_through() {
    static LAST: JField<i32> = JField::new("last");
    static INSTANCES: JField<i32> = JField::new("instances");

    let ctx = common::attach();
    let calc = CALCULATOR_WITH_VALUE.construct(&ctx, &[&3]).unwrap();
    assert_eq!(LAST.get(&ctx, &calc).unwrap(), 3);

    let mut field = LAST.proxy(&ctx, &calc).unwrap();
    assert_eq!(*field.get(), 3);
    field.set(&9).unwrap();
    assert_eq!(*field.get(), 3);
    assert_eq!(*field.refresh().unwrap(), 9);
    assert_eq!(LAST.get(&ctx, &calc).unwrap(), 9);

    let class = Calculator::class_descriptor();
    let counter = INSTANCES.static_proxy(&ctx, class).unwrap();
    counter.set(&(counter.get() + 1)).unwrap();
    assert!(INSTANCES.get_static(&ctx, class).unwrap() >= 1);
}
