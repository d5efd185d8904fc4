//! Function objects and built-in object factories

use jscore_compat::{ClassDefinition, ClassRef, ValueKind, ValueRef};

use super::{create_test_context, eval_bool, eval_number, eval_string, install_global};

#[test]
fn test_make_function_and_call() {
    let context = create_test_context();
    let add = context
        .make_function(Some("add"), &["a", "b"], "return a+b;", None, 1)
        .unwrap();

    let sum = context
        .call_as_function(&add, None, &[ValueRef::number(2.0), ValueRef::number(3.0)])
        .unwrap();
    assert_eq!(sum.as_number(), Some(5.0));

    install_global(&context, "add", &add);
    assert_eq!(eval_string(&context, "add.name"), "add");
    assert_eq!(eval_number(&context, "add.length"), 2.0);
}

#[test]
fn test_make_function_defaults_to_anonymous() {
    let context = create_test_context();
    let function = context.make_function(None, &[], "return 1;", None, 1).unwrap();
    install_global(&context, "f", &function);

    assert_eq!(eval_string(&context, "f.name"), "anonymous");
}

#[test]
fn test_make_function_syntax_error_is_exception() {
    let context = create_test_context();
    let err = context
        .make_function(Some("broken"), &["a"], "return a +;", Some("broken.js"), 10)
        .unwrap_err();

    assert!(err.is_exception());
    assert!(err.to_string().starts_with("SyntaxError"), "got {err}");
}

#[test]
fn test_call_with_this() {
    let context = create_test_context();
    let getter = context
        .make_function(Some("read"), &[], "return this.value;", None, 1)
        .unwrap();
    let target = super::eval(&context, "({ value: 'inside' })");

    let value = context.call_as_function(&getter, Some(&target), &[]).unwrap();
    assert_eq!(context.to_string(&value).unwrap(), "inside");
}

#[test]
fn test_function_with_callback() {
    let context = create_test_context();
    let double = context
        .with(|scope| {
            scope.make_function_with_callback(Some("double"), |scope, _, _, args| {
                let n = match args.first() {
                    Some(arg) => scope.to_number(arg)?,
                    None => 0.0,
                };
                Ok(ValueRef::number(n * 2.0))
            })
        })
        .unwrap();
    install_global(&context, "double", &double);

    assert_eq!(eval_number(&context, "double(21)"), 42.0);
    assert_eq!(eval_string(&context, "typeof double"), "function");
    assert_eq!(eval_string(&context, "double.name"), "double");
    assert_eq!(
        eval_string(&context, "Object.prototype.toString.call(double)"),
        "[object Function]"
    );
    assert!(eval_bool(&context, "double.call !== undefined"));
}

#[test]
fn test_callback_function_is_not_a_constructor() {
    let context = create_test_context();
    let noop = context
        .with(|scope| scope.make_function_with_callback(None, |_, _, _, _| Ok(ValueRef::undefined())))
        .unwrap();
    install_global(&context, "noop", &noop);

    assert_eq!(
        eval_string(&context, "try { new noop(); 'constructed' } catch (e) { e.constructor.name }"),
        "TypeError"
    );
}

#[test]
fn test_call_hook_receives_this() {
    let context = create_test_context();
    let base = ClassRef::new(&ClassDefinition::new("Callable").call_as_function(
        |_, _, this, _| Ok(this.clone()),
    ));
    let object = context.make_object(Some(&base), None).unwrap();
    install_global(&context, "c", &object);

    assert_eq!(eval_string(&context, "typeof c"), "function");
    assert!(eval_bool(&context, "var host = { c: c }; host.c() === host"));
}

#[test]
fn test_make_array() {
    let context = create_test_context();
    let array = context
        .with(|scope| {
            let text = scope.make_string("three")?;
            scope.make_array(&[ValueRef::number(1.0), ValueRef::boolean(true), text])
        })
        .unwrap();
    install_global(&context, "arr", &array);

    assert!(eval_bool(&context, "Array.isArray(arr)"));
    assert_eq!(eval_string(&context, "arr.join('|')"), "1|true|three");
}

#[test]
fn test_make_date() {
    let context = create_test_context();
    let date = context
        .with(|scope| scope.make_date(&[ValueRef::number(86_400_000.0)]))
        .unwrap();
    install_global(&context, "d", &date);

    assert_eq!(eval_string(&context, "d.toISOString()"), "1970-01-02T00:00:00.000Z");

    let now = context.with(|scope| scope.make_date(&[])).unwrap();
    install_global(&context, "now", &now);
    assert!(eval_bool(&context, "now instanceof Date && now.getTime() > 0"));
}

#[test]
fn test_make_error() {
    let context = create_test_context();
    let error = context
        .with(|scope| {
            let message = scope.make_string("bad input")?;
            scope.make_error(&[message])
        })
        .unwrap();
    install_global(&context, "err", &error);

    assert!(eval_bool(&context, "err instanceof Error"));
    assert_eq!(eval_string(&context, "err.message"), "bad input");
}

#[test]
fn test_make_regexp_keeps_supported_flags() {
    let context = create_test_context();
    let regexp = context
        .with(|scope| {
            let pattern = scope.make_string("a+b")?;
            let flags = scope.make_string("gimy")?;
            scope.make_regexp(&[pattern, flags])
        })
        .unwrap();
    install_global(&context, "re", &regexp);

    assert_eq!(eval_string(&context, "re.flags"), "gim");
    assert!(eval_bool(&context, "re.test('xAAB')"));
}

#[test]
fn test_make_regexp_invalid_pattern() {
    let context = create_test_context();
    let err = context
        .with(|scope| {
            let pattern = scope.make_string("(")?;
            scope.make_regexp(&[pattern])
        })
        .unwrap_err();

    assert!(err.to_string().starts_with("SyntaxError"), "got {err}");
}

#[test]
fn test_value_kinds() {
    let context = create_test_context();
    context
        .with(|scope| {
            assert_eq!(scope.kind(&ValueRef::undefined())?, ValueKind::Undefined);
            assert_eq!(scope.kind(&ValueRef::null())?, ValueKind::Null);
            assert_eq!(scope.kind(&ValueRef::boolean(false))?, ValueKind::Boolean);
            assert_eq!(scope.kind(&ValueRef::number(0.1))?, ValueKind::Number);
            assert_eq!(scope.kind(&scope.make_string("s")?)?, ValueKind::String);
            let symbol = scope.evaluate_script("Symbol('s')", None, 1)?;
            assert_eq!(scope.kind(&symbol)?, ValueKind::Symbol);
            let object = scope.make_object(None, None)?;
            assert_eq!(scope.kind(&object)?, ValueKind::Object);
            assert!(!scope.is_function(&object)?);
            let function = scope.evaluate_script("(function () {})", None, 1)?;
            assert!(scope.is_function(&function)?);
            assert!(scope.is_constructor(&function)?);
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_labelled_script_still_evaluates() {
    let context = create_test_context();
    let value = context
        .evaluate_script("var base = 40;\nbase + 2", Some("labelled.js"), 7)
        .unwrap();
    assert_eq!(value.as_number(), Some(42.0));

    let err = context
        .evaluate_script("\nthrow new Error('late');", Some("late.js"), 5)
        .unwrap_err();
    assert_eq!(err.to_string(), "Error: late");
}
