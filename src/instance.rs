//! Instance creation and finalization.
//!
//! An instance is a `Proxy` over a plain object, or over a constructor-capable
//! function when the class chain can be called. The proxy handler holds an
//! [`InstanceSlot`]: an engine class object that owns the instance's
//! [`ClassRef`] and payload. The slot is reachable only through the proxy, so
//! the engine frees it together with the instance and its `Drop` runs the
//! finalize walk.
//!
//! The script side of the interceptors lives in `glue.js`; it forwards string
//! keys to the natives installed here, which run the chain dispatcher.

use std::rc::{Rc, Weak};

use log::trace;
use rquickjs::class::{JsClass, Trace, Tracer, Writable};
use rquickjs::function::Constructor;
use rquickjs::{Array, Class, Ctx, Exception, Function, JsLifetime, Object, Persistent, Value};

use crate::class::{ClassRef, Payload, PrimitiveHint, PropertyAttributes};
use crate::dispatch;
use crate::error::{HookResult, JscError};
use crate::handle::ValueRef;
use crate::scope::{Env, Scope};

const GLUE_SOURCE: &str = include_str!("glue.js");

/// Display name for instances of classes that never declare one.
pub const DEFAULT_CLASS_NAME: &str = "CallbackObject";

// ═══════════════════════════════════════════════════════════════════════════════
// InstanceSlot
// ═══════════════════════════════════════════════════════════════════════════════

/// Engine-side record binding an instance to its class.
pub struct InstanceSlot {
    class: ClassRef,
    target_class: Option<ClassRef>,
    payload: Option<Payload>,
}

impl InstanceSlot {
    pub fn class(&self) -> &ClassRef {
        &self.class
    }

    pub fn target_class(&self) -> Option<&ClassRef> {
        self.target_class.as_ref()
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    pub(crate) fn set_payload(&mut self, payload: Option<Payload>) {
        self.payload = payload;
    }
}

impl Drop for InstanceSlot {
    fn drop(&mut self) {
        trace!("finalizing instance of class #{}", self.class.id());
        for level in self.class.chain() {
            if let Some(finalize) = &level.hooks().finalize {
                finalize(self.payload.as_ref());
            }
        }
    }
}

impl<'js> Trace<'js> for InstanceSlot {
    fn trace<'a>(&self, _tracer: Tracer<'a, 'js>) {}
}

unsafe impl<'js> JsLifetime<'js> for InstanceSlot {
    type Changed<'to> = InstanceSlot;
}

impl<'js> JsClass<'js> for InstanceSlot {
    const NAME: &'static str = "InstanceSlot";

    type Mutable = Writable;

    fn constructor(_ctx: &Ctx<'js>) -> rquickjs::Result<Option<Constructor<'js>>> {
        Ok(None)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Creation
// ═══════════════════════════════════════════════════════════════════════════════

/// Build an instance of `class`.
///
/// `target_class` marks a constructor whose `new` produces plain instances of
/// that class. `name` names the callable target, if there is one.
pub(crate) fn make_instance(
    scope: &Scope<'_>,
    class: &ClassRef,
    target_class: Option<&ClassRef>,
    payload: Option<Payload>,
    name: Option<&str>,
) -> Result<ValueRef, JscError> {
    let ctx = scope.ctx().clone();
    let slot = scope.attempt(Class::instance(
        ctx.clone(),
        InstanceSlot {
            class: class.clone(),
            target_class: target_class.cloned(),
            payload,
        },
    ))?;

    let callable = target_class.is_some() || class.is_callable();
    let (target, base) = if callable {
        let function = scope.attempt(Function::new(ctx.clone(), || {}))?;
        function.set_constructor(true);
        let function = match name {
            Some(name) => scope.attempt(function.with_name(name))?,
            None => function,
        };
        (function.into_inner(), Function::prototype(ctx.clone()))
    } else {
        let object_ctor: Object<'_> = scope.attempt(ctx.globals().get("Object"))?;
        let base: Object<'_> = scope.attempt(object_ctor.get("prototype"))?;
        (scope.attempt(Object::new(ctx.clone()))?, base)
    };

    let functions = scope.attempt(Array::new(ctx.clone()))?;
    for (index, (function, attributes)) in class.static_function_names().into_iter().enumerate() {
        let entry = scope.attempt(Array::new(ctx.clone()))?;
        scope.attempt(entry.set(0, function))?;
        scope.attempt(entry.set(1, !attributes.contains(PropertyAttributes::READ_ONLY)))?;
        scope.attempt(entry.set(2, !attributes.contains(PropertyAttributes::DONT_ENUM)))?;
        scope.attempt(functions.set(index, entry))?;
    }

    let tag = if class.is_synthesized() {
        None
    } else {
        Some(class.display_name().unwrap_or(DEFAULT_CLASS_NAME))
    };
    let proto: Object<'_> = scope.attempt(scope.glue_fn("makePrototype")?.call((
        base,
        slot.clone(),
        functions,
        tag,
        class.declares_conversion(),
        target_class.is_some() || class.declares_has_instance(),
    )))?;
    let proxy: Value<'_> =
        scope.attempt(scope.glue_fn("makeInstance")?.call((target, proto, slot)))?;
    let instance = scope.wrap(proxy);
    trace!("created instance of class #{}", class.id());

    let levels: Vec<&ClassRef> = class.chain().collect();
    for level in levels.iter().rev() {
        if let Some(initialize) = &level.hooks().initialize {
            initialize(scope, &instance)?;
        }
    }
    Ok(instance)
}

/// The slot of an instance, if `value` is one.
pub(crate) fn slot_of<'js>(
    scope: &Scope<'js>,
    value: Value<'js>,
) -> Result<Option<Class<'js, InstanceSlot>>, JscError> {
    scope.attempt(scope.glue_fn("slotOf")?.call((value,)))
}

/// The slot of `object`, or else of its prototype.
pub(crate) fn slot_or_proto_slot<'js>(
    scope: &Scope<'js>,
    object: Object<'js>,
) -> Result<Option<Class<'js, InstanceSlot>>, JscError> {
    let proto = object.get_prototype();
    if let Some(slot) = slot_of(scope, object.into_value())? {
        return Ok(Some(slot));
    }
    match proto {
        Some(proto) => slot_of(scope, proto.into_value()),
        None => Ok(None),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Natives
// ═══════════════════════════════════════════════════════════════════════════════

fn enter<'js>(ctx: &Ctx<'js>, env: &Weak<Env>) -> rquickjs::Result<Scope<'js>> {
    match env.upgrade() {
        Some(env) => Ok(Scope::new(ctx.clone(), env)),
        None => Err(Exception::throw_internal(ctx, "context has been torn down")),
    }
}

fn classes(slot: &Class<'_, InstanceSlot>) -> rquickjs::Result<(ClassRef, Option<ClassRef>)> {
    let slot = slot.try_borrow()?;
    Ok((slot.class().clone(), slot.target_class().cloned()))
}

/// Run a dispatch result back into the engine, raising its error.
fn finish<'js, T>(scope: &Scope<'js>, result: HookResult<T>) -> rquickjs::Result<T> {
    result.map_err(|error| scope.throw(error))
}

fn found<'js>(scope: &Scope<'js>, value: Option<ValueRef>) -> HookResult<Option<Vec<Value<'js>>>> {
    value.map(|value| Ok(vec![scope.value_of(&value)?])).transpose()
}

/// Evaluate the glue script and hand it the natives. Returns the glue object.
pub(crate) fn install<'js>(
    ctx: &Ctx<'js>,
    env: &Rc<Env>,
) -> rquickjs::Result<Persistent<Object<'static>>> {
    let natives = Object::new(ctx.clone())?;
    let env = Rc::downgrade(env);

    natives.set(
        "get",
        Function::new(ctx.clone(), {
            let env = env.clone();
            move |ctx: Ctx<'js>, slot: Class<'js, InstanceSlot>, object: Value<'js>, name: String| {
                let scope = enter(&ctx, &env)?;
                let (class, _) = classes(&slot)?;
                let object = scope.wrap(object);
                let value = dispatch::get_property(&scope, &class, &object, &name)
                    .and_then(|value| found(&scope, value));
                finish(&scope, value)
            }
        })?,
    )?;

    natives.set(
        "set",
        Function::new(ctx.clone(), {
            let env = env.clone();
            move |ctx: Ctx<'js>,
                  slot: Class<'js, InstanceSlot>,
                  object: Value<'js>,
                  name: String,
                  value: Value<'js>| {
                let scope = enter(&ctx, &env)?;
                let (class, _) = classes(&slot)?;
                let (object, value) = (scope.wrap(object), scope.wrap(value));
                finish(&scope, dispatch::set_property(&scope, &class, &object, &name, &value))
            }
        })?,
    )?;

    natives.set(
        "has",
        Function::new(ctx.clone(), {
            let env = env.clone();
            move |ctx: Ctx<'js>, slot: Class<'js, InstanceSlot>, object: Value<'js>, name: String| {
                let scope = enter(&ctx, &env)?;
                let (class, _) = classes(&slot)?;
                let object = scope.wrap(object);
                finish(&scope, dispatch::has_property(&scope, &class, &object, &name))
            }
        })?,
    )?;

    natives.set(
        "writable",
        Function::new(ctx.clone(), |slot: Class<'js, InstanceSlot>, name: String| {
            let (class, _) = classes(&slot)?;
            rquickjs::Result::Ok(dispatch::static_writable(&class, &name))
        })?,
    )?;

    natives.set(
        "deleteProperty",
        Function::new(ctx.clone(), {
            let env = env.clone();
            move |ctx: Ctx<'js>, slot: Class<'js, InstanceSlot>, object: Value<'js>, name: String| {
                let scope = enter(&ctx, &env)?;
                let (class, _) = classes(&slot)?;
                let object = scope.wrap(object);
                finish(&scope, dispatch::delete_property(&scope, &class, &object, &name))
            }
        })?,
    )?;

    natives.set(
        "ownKeys",
        Function::new(ctx.clone(), {
            let env = env.clone();
            move |ctx: Ctx<'js>, slot: Class<'js, InstanceSlot>, object: Value<'js>| {
                let scope = enter(&ctx, &env)?;
                let (class, _) = classes(&slot)?;
                let object = scope.wrap(object);
                let names = dispatch::property_names(&scope, &class, &object);
                finish(&scope, names.map(|names| names.into_keys()))
            }
        })?,
    )?;

    natives.set(
        "apply",
        Function::new(ctx.clone(), {
            let env = env.clone();
            move |ctx: Ctx<'js>,
                  slot: Class<'js, InstanceSlot>,
                  function: Value<'js>,
                  this: Value<'js>,
                  args: Vec<Value<'js>>| {
                let scope = enter(&ctx, &env)?;
                let (class, _) = classes(&slot)?;
                let function = scope.wrap(function);
                let this = scope.wrap(this);
                let args: Vec<ValueRef> = args.into_iter().map(|arg| scope.wrap(arg)).collect();
                let result = dispatch::call_as_function(&scope, &class, &function, &this, &args)
                    .and_then(|value| scope.value_of(&value));
                finish(&scope, result)
            }
        })?,
    )?;

    natives.set(
        "construct",
        Function::new(ctx.clone(), {
            let env = env.clone();
            move |ctx: Ctx<'js>,
                  slot: Class<'js, InstanceSlot>,
                  constructor: Value<'js>,
                  args: Vec<Value<'js>>| {
                let scope = enter(&ctx, &env)?;
                let (class, target_class) = classes(&slot)?;
                let constructor = scope.wrap(constructor);
                let args: Vec<ValueRef> = args.into_iter().map(|arg| scope.wrap(arg)).collect();
                let result = dispatch::call_as_constructor(
                    &scope,
                    &class,
                    target_class.as_ref(),
                    &constructor,
                    &args,
                )
                .and_then(|value| scope.value_of(&value));
                finish(&scope, result)
            }
        })?,
    )?;

    natives.set(
        "callStatic",
        Function::new(ctx.clone(), {
            let env = env.clone();
            move |ctx: Ctx<'js>,
                  slot: Class<'js, InstanceSlot>,
                  name: String,
                  function: Value<'js>,
                  this: Value<'js>,
                  args: Vec<Value<'js>>| {
                let scope = enter(&ctx, &env)?;
                let (class, _) = classes(&slot)?;
                let function = scope.wrap(function);
                let this = scope.wrap(this);
                let args: Vec<ValueRef> = args.into_iter().map(|arg| scope.wrap(arg)).collect();
                let result =
                    dispatch::call_static_function(&scope, &class, &name, &function, &this, &args)
                        .and_then(|value| value.map(|value| scope.value_of(&value)).transpose());
                finish(&scope, result)
            }
        })?,
    )?;

    natives.set(
        "toPrimitive",
        Function::new(ctx.clone(), {
            let env = env.clone();
            move |ctx: Ctx<'js>, slot: Class<'js, InstanceSlot>, object: Value<'js>, hint: String| {
                let scope = enter(&ctx, &env)?;
                let (class, _) = classes(&slot)?;
                let object = scope.wrap(object);
                let hint = PrimitiveHint::from_hint(&hint);
                let value = dispatch::convert_to_type(&scope, &class, &object, hint)
                    .and_then(|value| found(&scope, value));
                finish(&scope, value)
            }
        })?,
    )?;

    natives.set(
        "hasInstance",
        Function::new(ctx.clone(), {
            let env = env.clone();
            move |ctx: Ctx<'js>,
                  slot: Class<'js, InstanceSlot>,
                  constructor: Value<'js>,
                  candidate: Value<'js>,
                  candidate_slot: Option<Class<'js, InstanceSlot>>| {
                let scope = enter(&ctx, &env)?;
                let (class, target_class) = classes(&slot)?;
                let candidate_class = match &candidate_slot {
                    Some(candidate_slot) => Some(classes(candidate_slot)?.0),
                    None => None,
                };
                let constructor = scope.wrap(constructor);
                let candidate = scope.wrap(candidate);
                let answer = dispatch::has_instance(
                    &scope,
                    &class,
                    target_class.as_ref(),
                    &constructor,
                    &candidate,
                    candidate_class.as_ref(),
                );
                finish(&scope, answer)
            }
        })?,
    )?;

    let factory: Function<'js> = ctx.eval(GLUE_SOURCE)?;
    let glue: Object<'js> = factory.call((natives,))?;
    Ok(Persistent::save(ctx, glue))
}
