//! Chain dispatch for class instances.
//!
//! Every interceptor on an instance ends up here. Each operation walks the
//! instance's class chain from the leaf toward the root and applies the
//! precedence rules of the class model: hooks before static tables for
//! reads, static setters before hooks for writes, first answer wins unless
//! stated otherwise.
//!
//! A hook error stops the walk at once and is returned as-is. Temporary
//! handles are plain [`ValueRef`] values, so they are released on every path.

use log::trace;

use crate::class::{ClassRef, PrimitiveHint, PropertyAttributes, PropertyNameAccumulator, PropertyNames};
use crate::error::HookResult;
use crate::handle::ValueRef;
use crate::scope::Scope;

// ============================================================================
// Properties
// ============================================================================

/// Whether any level claims `name`, through its hook or an enumerable static value.
pub fn has_property(
    scope: &Scope<'_>,
    class: &ClassRef,
    object: &ValueRef,
    name: &str,
) -> HookResult<bool> {
    for level in class.chain() {
        if let Some(has) = &level.hooks().has_property {
            if has(scope, object, name)? {
                return Ok(true);
            }
        }
        let listed = level
            .static_value(name)
            .is_some_and(|entry| !entry.attributes.contains(PropertyAttributes::DONT_ENUM));
        if listed {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Resolve a read. `Ok(None)` means the class does not provide the property.
///
/// A level whose `has_property` claims a name it then fails to produce is a
/// broken class, reported as `Error("Invalid property: <name>")`.
pub fn get_property(
    scope: &Scope<'_>,
    class: &ClassRef,
    object: &ValueRef,
    name: &str,
) -> HookResult<Option<ValueRef>> {
    for level in class.chain() {
        let hooks = level.hooks();
        let claimed = match &hooks.has_property {
            Some(has) => has(scope, object, name)?,
            None => true,
        };
        if claimed {
            if let Some(get) = &hooks.get_property {
                if let Some(value) = get(scope, object, name)? {
                    return Ok(Some(value));
                }
            }
        }
        if let Some(getter) = level.static_value(name).and_then(|entry| entry.getter.as_ref()) {
            if let Some(value) = getter(scope, object, name)? {
                return Ok(Some(value));
            }
        }
    }

    for level in class.chain() {
        if let Some(has) = &level.hooks().has_property {
            if has(scope, object, name)? {
                return Err(scope.error(&format!("Invalid property: {name}")));
            }
        }
    }
    Ok(None)
}

/// Resolve a write. `Ok(true)` means the class intercepted it.
///
/// A static value without a setter, or a read-only one, swallows the write,
/// though the level's own hooks still see it. A `has_property` claim also
/// counts as intercepted so the value never lands on the underlying object.
pub fn set_property(
    scope: &Scope<'_>,
    class: &ClassRef,
    object: &ValueRef,
    name: &str,
    value: &ValueRef,
) -> HookResult<bool> {
    for level in class.chain() {
        let hooks = level.hooks();
        let mut swallowed = false;
        let mut handled = false;
        if let Some(entry) = level.static_value(name) {
            match &entry.setter {
                Some(setter) if !entry.attributes.contains(PropertyAttributes::READ_ONLY) => {
                    handled = setter(scope, object, name, value)?;
                }
                _ => swallowed = true,
            }
        }

        if !handled {
            if let Some(has) = &hooks.has_property {
                handled = has(scope, object, name)?;
            }
            if let Some(set) = &hooks.set_property {
                handled = set(scope, object, name, value)? || handled;
            }
        }
        if handled || swallowed {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Whether a write to `name` can take effect. The nearest static value with
/// that name decides; a read-only or setter-less one swallows writes.
pub fn static_writable(class: &ClassRef, name: &str) -> bool {
    class
        .chain()
        .find_map(|level| level.static_value(name))
        .is_none_or(|entry| {
            entry.setter.is_some() && !entry.attributes.contains(PropertyAttributes::READ_ONLY)
        })
}

pub fn delete_property(
    scope: &Scope<'_>,
    class: &ClassRef,
    object: &ValueRef,
    name: &str,
) -> HookResult<bool> {
    for level in class.chain() {
        if let Some(delete) = &level.hooks().delete_property {
            if delete(scope, object, name)? {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Collect class-provided names from every level. Nothing short-circuits.
pub fn property_names(
    scope: &Scope<'_>,
    class: &ClassRef,
    object: &ValueRef,
) -> HookResult<PropertyNames> {
    let mut accumulator = PropertyNameAccumulator::new();
    for level in class.chain() {
        if let Some(names) = &level.hooks().get_property_names {
            names(scope, object, &mut accumulator)?;
        }
        for (name, entry) in level.static_values() {
            if !entry.attributes.contains(PropertyAttributes::DONT_ENUM) {
                accumulator.add_name(name);
            }
        }
    }
    Ok(PropertyNames::merge(accumulator))
}

// ============================================================================
// Calls
// ============================================================================

/// Invoke the first `call_as_function` hook. With none, the call yields `undefined`.
pub fn call_as_function(
    scope: &Scope<'_>,
    class: &ClassRef,
    function: &ValueRef,
    this: &ValueRef,
    args: &[ValueRef],
) -> HookResult<ValueRef> {
    for level in class.chain() {
        if let Some(call) = &level.hooks().call_as_function {
            return call(scope, function, this, args);
        }
    }
    Ok(ValueRef::undefined())
}

/// Handle `new` on an instance.
///
/// A constructor made for a target class builds a plain instance of it and
/// never consults hooks. Otherwise the first `call_as_constructor` hook runs
/// and must return an object.
pub fn call_as_constructor(
    scope: &Scope<'_>,
    class: &ClassRef,
    target_class: Option<&ClassRef>,
    constructor: &ValueRef,
    args: &[ValueRef],
) -> HookResult<ValueRef> {
    if let Some(target) = target_class {
        trace!("constructing plain instance of class #{}", target.id());
        return scope.make_object(Some(target), None);
    }
    for level in class.chain() {
        if let Some(construct) = &level.hooks().call_as_constructor {
            let value = construct(scope, constructor, args)?;
            if !value.is_object() {
                return Err(scope.error("Bad constructor"));
            }
            return Ok(value);
        }
    }
    Err(scope.type_error("object is not a constructor"))
}

/// Invoke the nearest static function called `name`.
pub fn call_static_function(
    scope: &Scope<'_>,
    class: &ClassRef,
    name: &str,
    function: &ValueRef,
    this: &ValueRef,
    args: &[ValueRef],
) -> HookResult<Option<ValueRef>> {
    for level in class.chain() {
        if let Some(entry) = level.static_function(name) {
            return (entry.callback)(scope, function, this, args).map(Some);
        }
    }
    Ok(None)
}

// ============================================================================
// Conversion and type checks
// ============================================================================

pub fn convert_to_type(
    scope: &Scope<'_>,
    class: &ClassRef,
    object: &ValueRef,
    hint: PrimitiveHint,
) -> HookResult<Option<ValueRef>> {
    for level in class.chain() {
        if let Some(convert) = &level.hooks().convert_to_type {
            if let Some(value) = convert(scope, object, hint)? {
                return Ok(Some(value));
            }
        }
    }
    Ok(None)
}

/// Answer `candidate instanceof constructor`.
///
/// `candidate_class` is the class of the candidate when it is an instance.
/// If that chain contains the constructor's target class the answer is true
/// without running any hook.
pub fn has_instance(
    scope: &Scope<'_>,
    class: &ClassRef,
    target_class: Option<&ClassRef>,
    constructor: &ValueRef,
    candidate: &ValueRef,
    candidate_class: Option<&ClassRef>,
) -> HookResult<bool> {
    if let (Some(target), Some(candidate_class)) = (target_class, candidate_class) {
        if candidate_class.inherits_from(target) {
            return Ok(true);
        }
    }
    for level in class.chain() {
        if let Some(has_instance) = &level.hooks().has_instance {
            return has_instance(scope, constructor, candidate);
        }
    }
    Ok(false)
}
