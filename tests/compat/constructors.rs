//! Constructors, `new` and `instanceof`

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use jscore_compat::{ClassDefinition, ClassRef, JscError, PropertyAttributes, ValueRef, dispatch};

use super::{create_test_context, eval_bool, eval_number, eval_string, install_global};

fn shape_classes() -> (ClassRef, ClassRef) {
    let shape = ClassRef::new(
        &ClassDefinition::new("Shape").static_value("sides", PropertyAttributes::READ_ONLY, |_, _, _| {
            Ok(Some(ValueRef::number(0.0)))
        }),
    );
    let square = ClassRef::new(
        &ClassDefinition::new("Square")
            .parent(&shape)
            .static_value("sides", PropertyAttributes::READ_ONLY, |_, _, _| {
                Ok(Some(ValueRef::number(4.0)))
            }),
    );
    (shape, square)
}

#[test]
fn test_target_class_constructor_builds_instances() {
    let context = create_test_context();
    let (shape, _) = shape_classes();
    let constructor = context.with(|scope| scope.make_constructor(&shape)).unwrap();
    install_global(&context, "Shape", &constructor);

    assert_eq!(eval_string(&context, "typeof Shape"), "function");
    assert_eq!(eval_number(&context, "var s = new Shape(); s.sides"), 0.0);
    assert_eq!(
        eval_string(&context, "Object.prototype.toString.call(s)"),
        "[object Shape]"
    );
    assert!(eval_bool(&context, "s instanceof Shape"));
    assert!(!eval_bool(&context, "({}) instanceof Shape"));
    assert!(!eval_bool(&context, "1 instanceof Shape"));
}

#[test]
fn test_instanceof_accepts_subclass_instances() {
    let context = create_test_context();
    let (shape, square) = shape_classes();
    let shape_constructor = context.with(|scope| scope.make_constructor(&shape)).unwrap();
    let square_constructor = context.with(|scope| scope.make_constructor(&square)).unwrap();
    let unit = context.make_object(Some(&square), None).unwrap();
    let blob = context.make_object(Some(&shape), None).unwrap();
    install_global(&context, "Shape", &shape_constructor);
    install_global(&context, "Square", &square_constructor);
    install_global(&context, "unit", &unit);
    install_global(&context, "blob", &blob);

    assert!(eval_bool(&context, "unit instanceof Square && unit instanceof Shape"));
    assert!(eval_bool(&context, "blob instanceof Shape"));
    assert!(!eval_bool(&context, "blob instanceof Square"));

    let answer = context
        .with(|scope| scope.is_instance_of_constructor(&unit, &shape_constructor))
        .unwrap();
    assert!(answer);
}

#[test]
fn test_target_class_match_skips_has_instance_hook() {
    let context = create_test_context();
    let (shape, square) = shape_classes();
    let consulted = Arc::new(AtomicUsize::new(0));
    let counter = consulted.clone();
    let host = ClassRef::new(&ClassDefinition::new("Host").has_instance(move |_, _, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(false)
    }));

    context
        .with(|scope| {
            let constructor = scope.make_constructor(&shape)?;
            let candidate = scope.make_object(Some(&square), None)?;
            let plain = scope.make_object(None, None)?;

            let matched = dispatch::has_instance(
                scope,
                &host,
                Some(&shape),
                &constructor,
                &candidate,
                Some(&square),
            )?;
            assert!(matched);
            assert_eq!(consulted.load(Ordering::SeqCst), 0);

            let unmatched =
                dispatch::has_instance(scope, &host, Some(&shape), &constructor, &plain, None)?;
            assert!(!unmatched);
            assert_eq!(consulted.load(Ordering::SeqCst), 1);
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_has_instance_hook_answers() {
    let context = create_test_context();
    let class = ClassRef::new(&ClassDefinition::new("Even").has_instance(|scope, _, candidate| {
        Ok(candidate.as_number().is_some() && scope.to_number(candidate)? % 2.0 == 0.0)
    }));
    let even = context.make_object(Some(&class), None).unwrap();
    install_global(&context, "Even", &even);

    assert!(eval_bool(&context, "4 instanceof Even"));
    assert!(!eval_bool(&context, "3 instanceof Even"));
    assert!(!eval_bool(&context, "'4' instanceof Even"));
}

#[test]
fn test_constructor_callback() {
    let context = create_test_context();
    let constructor = context
        .with(|scope| {
            scope.make_constructor_with(None, |scope, _, args| {
                let object = scope.make_object(None, None)?;
                let first = args.first().cloned().unwrap_or_else(ValueRef::undefined);
                scope.set_property(&object, "first", &first, PropertyAttributes::empty())?;
                scope.set_property(
                    &object,
                    "count",
                    &ValueRef::number(args.len() as f64),
                    PropertyAttributes::empty(),
                )?;
                Ok(object)
            })
        })
        .unwrap();
    install_global(&context, "Make", &constructor);

    assert_eq!(eval_number(&context, "new Make(5, 6).first"), 5.0);
    assert_eq!(eval_number(&context, "new Make(5, 6).count"), 2.0);

    let made = context
        .call_as_constructor(&constructor, &[ValueRef::number(9.0)])
        .unwrap();
    let first = context.get_property(&made, "first").unwrap();
    assert_eq!(first.as_number(), Some(9.0));
}

#[test]
fn test_target_class_overrides_constructor_callback() {
    let context = create_test_context();
    let (shape, _) = shape_classes();
    let called = Arc::new(AtomicUsize::new(0));
    let counter = called.clone();
    let constructor = context
        .with(|scope| {
            scope.make_constructor_with(Some(&shape), move |scope, _, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                scope.make_object(None, None)
            })
        })
        .unwrap();
    install_global(&context, "Shape", &constructor);

    assert_eq!(eval_number(&context, "new Shape().sides"), 0.0);
    assert_eq!(called.load(Ordering::SeqCst), 0);
}

#[test]
fn test_constructor_returning_primitive_is_bad() {
    let context = create_test_context();
    let constructor = context
        .with(|scope| scope.make_constructor_with(None, |_, _, _| Ok(ValueRef::number(1.0))))
        .unwrap();
    install_global(&context, "Bad", &constructor);

    assert_eq!(
        eval_string(&context, "try { new Bad(); 'built' } catch (e) { e.message }"),
        "Bad constructor"
    );
    let err = context.call_as_constructor(&constructor, &[]).unwrap_err();
    assert_eq!(err.to_string(), "Error: Bad constructor");
}

#[test]
fn test_class_construct_hook() {
    let context = create_test_context();
    let class = ClassRef::new(&ClassDefinition::new("Factory").call_as_constructor(
        |scope, _, args| {
            let array = scope.make_array(args)?;
            Ok(array)
        },
    ));
    let factory = context.make_object(Some(&class), None).unwrap();
    install_global(&context, "factory", &factory);

    assert_eq!(eval_string(&context, "new factory(1, 2, 3).join('-')"), "1-2-3");
    assert_eq!(
        eval_string(&context, "try { factory(); 'called' } catch (e) { 'threw' }"),
        "called"
    );
}

#[test]
fn test_new_without_construct_hook_is_type_error() {
    let context = create_test_context();
    let class = ClassRef::new(
        &ClassDefinition::new("CallOnly").call_as_function(|_, _, _, _| Ok(ValueRef::number(1.0))),
    );
    let object = context.make_object(Some(&class), None).unwrap();
    install_global(&context, "callOnly", &object);

    assert_eq!(eval_number(&context, "callOnly()"), 1.0);
    assert_eq!(
        eval_string(&context, "try { new callOnly() } catch (e) { e.name + ': ' + e.message }"),
        "TypeError: object is not a constructor"
    );
}

#[test]
fn test_call_as_constructor_rejects_plain_objects() {
    let context = create_test_context();
    let plain = context.make_object(None, None).unwrap();

    let err = context.call_as_constructor(&plain, &[]).unwrap_err();
    assert!(matches!(err, JscError::Exception { .. }));
    assert!(err.to_string().starts_with("TypeError"), "got {err}");
}
