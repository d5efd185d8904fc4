//! Host payloads attached to instances

use std::sync::Arc;

use jscore_compat::{ClassDefinition, ClassRef, Payload};

use super::{create_test_context, eval, install_global};

fn holder_class() -> ClassRef {
    ClassRef::new(&ClassDefinition::new("Holder"))
}

#[test]
fn test_payload_round_trip() {
    let context = create_test_context();
    let payload: Payload = Arc::new(String::from("host data"));
    let object = context
        .make_object(Some(&holder_class()), Some(payload.clone()))
        .unwrap();

    let stored = context.get_private(&object).unwrap().unwrap();
    assert!(Arc::ptr_eq(&stored, &payload));
    assert_eq!(stored.downcast_ref::<String>().map(String::as_str), Some("host data"));
}

#[test]
fn test_set_private_replaces_payload() {
    let context = create_test_context();
    let object = context.make_object(Some(&holder_class()), None).unwrap();
    assert!(context.get_private(&object).unwrap().is_none());

    assert!(context.set_private(&object, Some(Arc::new(5u64))).unwrap());
    let stored = context.get_private(&object).unwrap().unwrap();
    assert_eq!(stored.downcast_ref::<u64>(), Some(&5));

    assert!(context.set_private(&object, None).unwrap());
    assert!(context.get_private(&object).unwrap().is_none());
}

#[test]
fn test_plain_objects_have_no_payload() {
    let context = create_test_context();
    let object = context.make_object(None, None).unwrap();

    assert!(context.get_private(&object).unwrap().is_none());
    assert!(!context.set_private(&object, Some(Arc::new(1u8))).unwrap());
}

#[test]
fn test_payload_found_through_prototype() {
    let context = create_test_context();
    let payload: Payload = Arc::new(11i32);
    let object = context
        .make_object(Some(&holder_class()), Some(payload))
        .unwrap();
    install_global(&context, "holder", &object);

    let child = eval(&context, "Object.create(holder)");
    let stored = context.get_private(&child).unwrap().unwrap();
    assert_eq!(stored.downcast_ref::<i32>(), Some(&11));

    let grandchild = eval(&context, "Object.create(Object.create(holder))");
    assert!(context.get_private(&grandchild).unwrap().is_none());
}

#[test]
fn test_hooks_read_payload_through_scope() {
    let context = create_test_context();
    let class = ClassRef::new(&ClassDefinition::new("Counter").get_property(|scope, object, name| {
        if name != "count" {
            return Ok(None);
        }
        let count = scope
            .get_private(object)?
            .and_then(|payload| payload.downcast_ref::<u32>().copied())
            .unwrap_or(0);
        Ok(Some(jscore_compat::ValueRef::number(f64::from(count))))
    }));
    let object = context
        .make_object(Some(&class), Some(Arc::new(3u32)))
        .unwrap();
    install_global(&context, "counter", &object);

    assert_eq!(super::eval_number(&context, "counter.count"), 3.0);
}
