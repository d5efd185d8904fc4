//! Exceptions, the engine lock and configuration

use jscore_compat::{
    ClassDefinition, ClassRef, ContextConfig, EngineLock, JsContext, JscError, ValueRef,
};

use super::{create_test_context, eval_string, install_global};

#[test]
fn test_thrown_value_is_returned() {
    let context = create_test_context();
    let err = context
        .evaluate_script("throw { code: 7, toString() { return 'custom' } }", None, 1)
        .unwrap_err();

    assert_eq!(err.to_string(), "custom");
    let thrown = err.thrown().unwrap();
    let code = context.get_property(thrown, "code").unwrap();
    assert_eq!(code.as_number(), Some(7.0));
}

#[test]
fn test_thrown_primitive() {
    let context = create_test_context();
    let err = context.evaluate_script("throw 3", None, 1).unwrap_err();

    assert_eq!(err.thrown().and_then(ValueRef::as_number), Some(3.0));
    assert_eq!(err.to_string(), "3");
}

#[test]
fn test_exceptions_do_not_leak_handles() {
    let context = create_test_context();
    context.collect_garbage().unwrap();
    let baseline = context.live_handles();

    for i in 0..10 {
        let err = context
            .evaluate_script(&format!("throw new Error('failure {i}')"), None, 1)
            .unwrap_err();
        assert!(err.is_exception());
    }
    context.collect_garbage().unwrap();

    assert_eq!(context.live_handles(), baseline);
    assert_eq!(context.parked_handles(), 0);
}

#[test]
fn test_nested_entry_is_reentrant_error() {
    let context = create_test_context();
    let result = context.with(|_| context.evaluate_script("1", None, 1));

    assert!(matches!(result, Err(JscError::Reentrant)));
    assert!(!EngineLock::is_held());
    assert_eq!(super::eval(&context, "2").as_number(), Some(2.0));
}

#[test]
fn test_hooks_cannot_take_the_lock() {
    let context = create_test_context();
    let class = ClassRef::new(&ClassDefinition::new("Locker").get_property(|scope, _, name| {
        if name != "probe" {
            return Ok(None);
        }
        let held = EngineLock::is_held();
        let reentered = matches!(EngineLock::acquire(), Err(JscError::Reentrant));
        scope.make_string(&format!("{held}/{reentered}")).map(Some)
    }));
    let object = context.make_object(Some(&class), None).unwrap();
    install_global(&context, "locker", &object);

    assert_eq!(eval_string(&context, "locker.probe"), "true/true");
}

#[test]
fn test_lock_released_after_error() {
    let context = create_test_context();
    assert!(context.evaluate_script("syntax error here", None, 1).is_err());
    assert!(!EngineLock::is_held());

    let guard = EngineLock::acquire().unwrap();
    assert!(EngineLock::is_held());
    drop(guard);
    assert!(!EngineLock::is_held());
}

#[test]
fn test_hook_errors_reach_script_as_exceptions() {
    let context = create_test_context();
    let failing = context
        .with(|scope| {
            scope.make_function_with_callback(Some("failing"), |scope, _, _, _| {
                Err(scope.type_error("nope"))
            })
        })
        .unwrap();
    let misused = context
        .with(|scope| {
            scope.make_function_with_callback(Some("misused"), |_, _, _, _| Err(JscError::NotAnObject))
        })
        .unwrap();
    install_global(&context, "failing", &failing);
    install_global(&context, "misused", &misused);

    assert_eq!(
        eval_string(&context, "try { failing() } catch (e) { e.name + ': ' + e.message }"),
        "TypeError: nope"
    );
    assert_eq!(
        eval_string(&context, "try { misused() } catch (e) { e.name }"),
        "TypeError"
    );

    let err = context.call_as_function(&failing, None, &[]).unwrap_err();
    assert_eq!(err.to_string(), "TypeError: nope");
}

#[test]
fn test_script_exception_passes_through_hooks_unchanged() {
    let context = create_test_context();
    let relay = context
        .with(|scope| {
            scope.make_function_with_callback(Some("relay"), |scope, _, _, args| {
                let callback = args.first().cloned().unwrap_or_else(ValueRef::undefined);
                scope.call_as_function(&callback, None, &[])
            })
        })
        .unwrap();
    install_global(&context, "relay", &relay);

    assert_eq!(
        eval_string(
            &context,
            "var marker = { tag: 'original' };\n\
             try { relay(() => { throw marker }) } catch (e) { e === marker ? e.tag : 'copy' }"
        ),
        "original"
    );
}

#[test]
fn test_config_from_json() {
    let config =
        ContextConfig::from_json(r#"{ "memory_limit": 67108864, "max_stack_size": 1048576 }"#)
            .unwrap();
    assert_eq!(config.memory_limit, Some(64 * 1024 * 1024));
    assert_eq!(config.max_stack_size, Some(1024 * 1024));

    let context = JsContext::with_config(&config).unwrap();
    assert_eq!(super::eval(&context, "1 + 1").as_number(), Some(2.0));
    assert!(context.memory_usage() > 0);

    let err = ContextConfig::from_json("{ \"memory_limit\": \"lots\" }").unwrap_err();
    assert!(matches!(err, JscError::Config(_)));
}

#[test]
fn test_memory_limit_is_enforced() {
    let config = ContextConfig {
        memory_limit: Some(16 * 1024 * 1024),
        ..ContextConfig::default()
    };
    let context = JsContext::with_config(&config).unwrap();

    let result = context.evaluate_script("new Array(32 * 1024 * 1024).fill(1.5)", None, 1);
    assert!(result.is_err());
}
