//! The operation surface available while the engine is entered.
//!
//! A [`Scope`] exists only inside [`JsContext::with`](crate::JsContext::with)
//! or inside a class hook. It never takes the engine lock itself, so hooks
//! use it to call back into the engine without tripping the re-entry check.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use log::trace;
use rquickjs::context::EvalOptions;
use rquickjs::function::{Rest, This};
use rquickjs::{Array, Coerced, Ctx, Exception, FromJs, Function, Object, Persistent, Type, Value};

use crate::class::{CallAsConstructorHook, ClassDefinition, ClassRef, Payload, PropertyAttributes};
use crate::error::{HookResult, JscError};
use crate::handle::{BoxKind, HandleRegistry, Link, Oddball, ValueBox, ValueRef};
use crate::instance;
use crate::names::PropertyNameArray;

/// Per-context state shared by the context, its scopes and its natives.
pub(crate) struct Env {
    pub(crate) registry: Rc<RefCell<HandleRegistry>>,
    glue: RefCell<Option<Persistent<Object<'static>>>>,
}

impl Env {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Env {
            registry: HandleRegistry::new_shared(),
            glue: RefCell::new(None),
        })
    }

    pub(crate) fn install_glue(&self, glue: Persistent<Object<'static>>) {
        self.glue.replace(Some(glue));
    }

    /// Detach the glue object. The caller drops it inside the engine.
    pub(crate) fn take_glue(&self) -> Option<Persistent<Object<'static>>> {
        self.glue.take()
    }
}

/// Engine type of a value, as seen through the compatibility surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Undefined,
    Null,
    Boolean,
    Number,
    String,
    Symbol,
    BigInt,
    Object,
}

/// Unlocked access to one entered context.
pub struct Scope<'js> {
    ctx: Ctx<'js>,
    env: Rc<Env>,
}

impl<'js> Scope<'js> {
    pub(crate) fn new(ctx: Ctx<'js>, env: Rc<Env>) -> Self {
        Scope { ctx, env }
    }

    /// The underlying engine context.
    pub fn ctx(&self) -> &Ctx<'js> {
        &self.ctx
    }

    pub(crate) fn glue(&self) -> Result<Object<'js>, JscError> {
        let glue = self.env.glue.borrow().clone().ok_or(JscError::Defunct)?;
        Ok(glue.restore(&self.ctx)?)
    }

    pub(crate) fn glue_fn(&self, name: &str) -> Result<Function<'js>, JscError> {
        let glue = self.glue()?;
        self.attempt(glue.get(name))
    }

    // ========================================================================
    // Handles
    // ========================================================================

    /// Wrap an engine value. Numbers, booleans and the empty values never allocate.
    pub fn wrap(&self, value: Value<'js>) -> ValueRef {
        match value.type_of() {
            Type::Uninitialized | Type::Undefined => ValueRef::undefined(),
            Type::Null => ValueRef::null(),
            Type::Bool => ValueRef::boolean(value.as_bool().unwrap_or(false)),
            Type::Int | Type::Float => ValueRef::number(value.as_number().unwrap_or(f64::NAN)),
            _ => {
                let kind = if value.is_object() {
                    BoxKind::Object
                } else {
                    BoxKind::NonObject
                };
                let persistent = Persistent::save(&self.ctx, value);
                ValueRef::from_record(HandleRegistry::allocate(&self.env.registry, kind, persistent))
            }
        }
    }

    /// The engine value behind a handle.
    ///
    /// Fails with [`JscError::Defunct`] once the engine has reclaimed it.
    pub fn value_of(&self, handle: &ValueRef) -> Result<Value<'js>, JscError> {
        let Some(record) = handle.record() else {
            return Ok(match handle.oddball() {
                Some(Oddball::Undefined) => Value::new_undefined(self.ctx.clone()),
                Some(Oddball::Null) => Value::new_null(self.ctx.clone()),
                Some(Oddball::False) => Value::new_bool(self.ctx.clone(), false),
                Some(Oddball::True) => Value::new_bool(self.ctx.clone(), true),
                None => Value::new_number(self.ctx.clone(), handle.as_number().unwrap_or(f64::NAN)),
            });
        };

        let weak = match &*record.link() {
            Link::Double(number) => return Ok(Value::new_number(self.ctx.clone(), *number)),
            Link::Strong(value) => return Ok(value.clone().restore(&self.ctx)?),
            Link::Weak(weak) => weak.clone(),
            Link::Defunct => return Err(JscError::Defunct),
        };

        let weak = weak.restore(&self.ctx)?;
        let target: Value<'js> = self.attempt(self.glue_fn("deref")?.call((weak,)))?;
        if target.is_undefined() {
            self.retire(record);
            return Err(JscError::Defunct);
        }
        if record.external() > 0 {
            let previous = record.replace_link(Link::Strong(Persistent::save(&self.ctx, target.clone())));
            drop(previous);
        }
        Ok(target)
    }

    /// Mark a record defunct after its engine value was reclaimed.
    pub(crate) fn retire(&self, record: &Rc<ValueBox>) {
        trace!("handle #{} is defunct", record.id());
        let previous = record.replace_link(Link::Defunct);
        drop(previous);
        let parked = self.env.registry.borrow_mut().forget_parked(record.id());
        drop(parked);
    }

    /// Downgrade a parked record's strong link to an engine weak reference.
    pub(crate) fn weaken(&self, record: &Rc<ValueBox>) -> Result<(), JscError> {
        if record.external() > 0 {
            return Ok(());
        }
        let value = match &*record.link() {
            Link::Strong(value) => value.clone(),
            _ => return Ok(()),
        };
        let value = value.restore(&self.ctx)?;
        let weak: Object<'js> = self.attempt(self.glue_fn("weakRef")?.call((value,)))?;
        let previous = record.replace_link(Link::Weak(Persistent::save(&self.ctx, weak)));
        drop(previous);
        Ok(())
    }

    /// Weaken every record parked since the last pass.
    pub(crate) fn weaken_pending(&self) -> Result<(), JscError> {
        let pending = self.env.registry.borrow_mut().take_pending();
        for record in &pending {
            self.weaken(record)?;
        }
        Ok(())
    }

    /// Retire parked records whose engine object has been collected.
    pub(crate) fn sweep(&self) -> Result<usize, JscError> {
        let parked = self.env.registry.borrow().parked_records();
        let deref = self.glue_fn("deref")?;
        let mut retired = 0;
        for record in &parked {
            let weak = match &*record.link() {
                Link::Weak(weak) => weak.clone(),
                _ => continue,
            };
            let target: Value<'js> = self.attempt(deref.call((weak.restore(&self.ctx)?,)))?;
            if target.is_undefined() {
                self.retire(record);
                retired += 1;
            }
        }
        Ok(retired)
    }

    // ========================================================================
    // Exceptions
    // ========================================================================

    /// Turn an engine error into a [`JscError`], taking any pending exception.
    pub fn capture(&self, error: rquickjs::Error) -> JscError {
        if !error.is_exception() {
            return JscError::Engine(error);
        }
        let thrown = self.ctx.catch();
        let message = self.describe(&thrown);
        JscError::exception(self.wrap(thrown), message)
    }

    pub(crate) fn attempt<T>(&self, result: rquickjs::Result<T>) -> Result<T, JscError> {
        result.map_err(|error| self.capture(error))
    }

    fn describe(&self, value: &Value<'js>) -> String {
        match Coerced::<String>::from_js(&self.ctx, value.clone()) {
            Ok(Coerced(message)) => message,
            Err(error) => {
                if error.is_exception() {
                    let _ = self.ctx.catch();
                }
                String::from("uncaught exception")
            }
        }
    }

    /// Raise `error` into script code.
    ///
    /// Script exceptions are rethrown as the original value; anything else
    /// becomes a `TypeError` carrying the error message.
    pub fn throw(&self, error: JscError) -> rquickjs::Error {
        match error {
            JscError::Exception { value, message } => match self.value_of(&value) {
                Ok(value) => self.ctx.throw(value),
                Err(_) => Exception::throw_message(&self.ctx, &message),
            },
            JscError::Engine(rquickjs::Error::Exception) => rquickjs::Error::Exception,
            other => Exception::throw_type(&self.ctx, &other.to_string()),
        }
    }

    /// An engine `Error` object wrapped as an exception, without throwing it.
    pub fn error(&self, message: &str) -> JscError {
        match Exception::from_message(self.ctx.clone(), message) {
            Ok(error) => JscError::exception(self.wrap(error.into_value()), format!("Error: {message}")),
            Err(error) => self.capture(error),
        }
    }

    pub fn type_error(&self, message: &str) -> JscError {
        self.capture(Exception::throw_type(&self.ctx, message))
    }

    // ========================================================================
    // Primitive values
    // ========================================================================

    pub fn make_string(&self, text: &str) -> Result<ValueRef, JscError> {
        let string = self.attempt(rquickjs::String::from_str(self.ctx.clone(), text))?;
        Ok(self.wrap(string.into_value()))
    }

    pub fn to_number(&self, value: &ValueRef) -> Result<f64, JscError> {
        if let Some(number) = value.as_number() {
            return Ok(number);
        }
        let value = self.value_of(value)?;
        let Coerced(number) = self.attempt(Coerced::<f64>::from_js(&self.ctx, value))?;
        Ok(number)
    }

    pub fn to_string(&self, value: &ValueRef) -> Result<String, JscError> {
        let value = self.value_of(value)?;
        let Coerced(string) = self.attempt(Coerced::<String>::from_js(&self.ctx, value))?;
        Ok(string)
    }

    pub fn to_boolean(&self, value: &ValueRef) -> Result<bool, JscError> {
        if let Some(flag) = value.as_boolean() {
            return Ok(flag);
        }
        let value = self.value_of(value)?;
        let Coerced(flag) = self.attempt(Coerced::<bool>::from_js(&self.ctx, value))?;
        Ok(flag)
    }

    pub fn kind(&self, value: &ValueRef) -> Result<ValueKind, JscError> {
        if value.is_inline() {
            return Ok(match value.oddball() {
                Some(Oddball::Undefined) => ValueKind::Undefined,
                Some(Oddball::Null) => ValueKind::Null,
                Some(_) => ValueKind::Boolean,
                None => ValueKind::Number,
            });
        }
        if value.is_object() {
            return Ok(ValueKind::Object);
        }
        let engine = self.value_of(value)?;
        Ok(if engine.is_number() {
            ValueKind::Number
        } else if engine.is_string() {
            ValueKind::String
        } else if engine.is_symbol() {
            ValueKind::Symbol
        } else {
            ValueKind::BigInt
        })
    }

    pub fn is_object(&self, value: &ValueRef) -> bool {
        value.is_object()
    }

    pub fn is_function(&self, value: &ValueRef) -> Result<bool, JscError> {
        if !value.is_object() {
            return Ok(false);
        }
        Ok(self.value_of(value)?.is_function())
    }

    pub fn is_constructor(&self, value: &ValueRef) -> Result<bool, JscError> {
        if !value.is_object() {
            return Ok(false);
        }
        Ok(self.value_of(value)?.is_constructor())
    }

    /// `a === b`
    pub fn strict_equals(&self, a: &ValueRef, b: &ValueRef) -> Result<bool, JscError> {
        if a.same_handle(b) && a.as_number().is_none_or(|n| !n.is_nan()) {
            return Ok(true);
        }
        let (a, b) = (self.value_of(a)?, self.value_of(b)?);
        self.attempt(self.glue_fn("strictEquals")?.call((a, b)))
    }

    /// `value instanceof constructor`
    pub fn is_instance_of_constructor(
        &self,
        value: &ValueRef,
        constructor: &ValueRef,
    ) -> Result<bool, JscError> {
        let constructor = self.object(constructor)?;
        let value = self.value_of(value)?;
        self.attempt(self.glue_fn("instanceOf")?.call((value, constructor)))
    }

    // ========================================================================
    // Scripts
    // ========================================================================

    /// Evaluate global script code in sloppy mode.
    ///
    /// `start_line` shifts reported line numbers; `source_url` labels the code.
    pub fn evaluate_script(
        &self,
        source: &str,
        source_url: Option<&str>,
        start_line: u32,
    ) -> Result<ValueRef, JscError> {
        let source = labelled_source(source, source_url, start_line);
        let mut options = EvalOptions::default();
        options.strict = false;
        let value: Value<'js> = self.attempt(self.ctx.eval_with_options(source, options))?;
        Ok(self.wrap(value))
    }

    pub fn global_object(&self) -> ValueRef {
        self.wrap(self.ctx.globals().into_value())
    }

    // ========================================================================
    // Object creation
    // ========================================================================

    /// Create an object. With a class it is an instance of that class.
    pub fn make_object(
        &self,
        class: Option<&ClassRef>,
        payload: Option<Payload>,
    ) -> Result<ValueRef, JscError> {
        match class {
            Some(class) => instance::make_instance(self, class, None, payload, None),
            None => {
                let object = self.attempt(Object::new(self.ctx.clone()))?;
                Ok(self.wrap(object.into_value()))
            }
        }
    }

    /// Create a function object whose calls go to `callback`.
    pub fn make_function_with_callback<F>(
        &self,
        name: Option<&str>,
        callback: F,
    ) -> Result<ValueRef, JscError>
    where
        F: Fn(&Scope<'_>, &ValueRef, &ValueRef, &[ValueRef]) -> HookResult<ValueRef>
            + Send
            + Sync
            + 'static,
    {
        let class = ClassRef::new(&ClassDefinition::synthesized().call_as_function(callback));
        instance::make_instance(self, &class, None, None, name)
    }

    /// Create a constructor whose `new` produces plain instances of `class`.
    pub fn make_constructor(&self, class: &ClassRef) -> Result<ValueRef, JscError> {
        self.constructor_object(Some(class), None)
    }

    /// Create a constructor driven by `constructor`, or by `class` when given.
    ///
    /// A target class takes precedence: `new` then builds a plain instance of
    /// it and the callback never runs.
    pub fn make_constructor_with<F>(
        &self,
        class: Option<&ClassRef>,
        constructor: F,
    ) -> Result<ValueRef, JscError>
    where
        F: Fn(&Scope<'_>, &ValueRef, &[ValueRef]) -> HookResult<ValueRef> + Send + Sync + 'static,
    {
        self.constructor_object(class, Some(Arc::new(constructor)))
    }

    fn constructor_object(
        &self,
        class: Option<&ClassRef>,
        constructor: Option<CallAsConstructorHook>,
    ) -> Result<ValueRef, JscError> {
        let host = ClassRef::new(&ClassDefinition::synthesized().with_call_as_constructor(constructor));
        instance::make_instance(self, &host, class, None, None)
    }

    pub fn make_array(&self, items: &[ValueRef]) -> Result<ValueRef, JscError> {
        let array = self.attempt(Array::new(self.ctx.clone()))?;
        for (index, item) in items.iter().enumerate() {
            let item = self.value_of(item)?;
            self.attempt(array.set(index, item))?;
        }
        Ok(self.wrap(array.into_value()))
    }

    /// `new Date()` with no arguments, otherwise `new Date(ToNumber(args[0]))`.
    pub fn make_date(&self, args: &[ValueRef]) -> Result<ValueRef, JscError> {
        let time = args.first().map(|time| self.to_number(time)).transpose()?;
        let date: Value<'js> = self.attempt(self.glue_fn("makeDate")?.call((time,)))?;
        Ok(self.wrap(date))
    }

    /// `new Error(ToString(args[0]))`
    pub fn make_error(&self, args: &[ValueRef]) -> Result<ValueRef, JscError> {
        let message = args.first().map(|message| self.to_string(message)).transpose()?;
        let error: Value<'js> = self.attempt(self.glue_fn("makeError")?.call((message,)))?;
        Ok(self.wrap(error))
    }

    /// `new RegExp(ToString(args[0]), flags)`, keeping only the `g`, `i` and `m` flags.
    pub fn make_regexp(&self, args: &[ValueRef]) -> Result<ValueRef, JscError> {
        let pattern = match args.first() {
            Some(pattern) => self.to_string(pattern)?,
            None => String::new(),
        };
        let flags = match args.get(1) {
            Some(flags) if !flags.is_undefined() => regexp_flags(&self.to_string(flags)?),
            _ => String::new(),
        };
        let regexp: Value<'js> = self.attempt(self.glue_fn("makeRegExp")?.call((pattern, flags)))?;
        Ok(self.wrap(regexp))
    }

    /// Compile `function name(params) { body }`.
    ///
    /// The name defaults to `anonymous`. Syntax errors come back as exceptions.
    pub fn make_function(
        &self,
        name: Option<&str>,
        params: &[&str],
        body: &str,
        source_url: Option<&str>,
        start_line: u32,
    ) -> Result<ValueRef, JscError> {
        let source = format!(
            "(function {}({}) {{ {}\n}})",
            name.unwrap_or("anonymous"),
            params.join(","),
            body
        );
        let source = labelled_source(&source, source_url, start_line);
        let mut options = EvalOptions::default();
        options.strict = false;
        let function: Function<'js> = self.attempt(self.ctx.eval_with_options(source, options))?;
        Ok(self.wrap(function.into_value()))
    }

    // ========================================================================
    // Properties
    // ========================================================================

    pub(crate) fn object(&self, value: &ValueRef) -> Result<Object<'js>, JscError> {
        if !value.is_object() {
            return Err(JscError::NotAnObject);
        }
        self.value_of(value)?.into_object().ok_or(JscError::NotAnObject)
    }

    pub fn get_prototype(&self, object: &ValueRef) -> Result<ValueRef, JscError> {
        let object = self.object(object)?;
        Ok(match object.get_prototype() {
            Some(proto) => self.wrap(proto.into_value()),
            None => ValueRef::null(),
        })
    }

    /// Set the prototype. Values other than objects and `null` are ignored.
    pub fn set_prototype(&self, object: &ValueRef, proto: &ValueRef) -> Result<(), JscError> {
        let object = self.object(object)?;
        if proto.is_null() {
            return self.attempt(object.set_prototype(None));
        }
        if !proto.is_object() {
            return Ok(());
        }
        let proto = self.object(proto)?;
        self.attempt(object.set_prototype(Some(&proto)))
    }

    pub fn has_property(&self, object: &ValueRef, name: &str) -> Result<bool, JscError> {
        let object = self.object(object)?;
        self.attempt(object.contains_key(name))
    }

    pub fn get_property(&self, object: &ValueRef, name: &str) -> Result<ValueRef, JscError> {
        let object = self.object(object)?;
        let value: Value<'js> = self.attempt(object.get(name))?;
        Ok(self.wrap(value))
    }

    /// Assign a property. With attributes, the property is defined instead.
    pub fn set_property(
        &self,
        object: &ValueRef,
        name: &str,
        value: &ValueRef,
        attributes: PropertyAttributes,
    ) -> Result<(), JscError> {
        let object = self.object(object)?;
        let value = self.value_of(value)?;
        if attributes.is_empty() {
            return self.attempt(object.set(name, value));
        }
        self.attempt(self.glue_fn("define")?.call::<_, ()>((
            object,
            name,
            value,
            !attributes.contains(PropertyAttributes::READ_ONLY),
            !attributes.contains(PropertyAttributes::DONT_ENUM),
            !attributes.contains(PropertyAttributes::DONT_DELETE),
        )))
    }

    pub fn delete_property(&self, object: &ValueRef, name: &str) -> Result<bool, JscError> {
        let object = self.object(object)?;
        self.attempt(self.glue_fn("deleteProperty")?.call((object, name)))
    }

    pub fn get_property_at_index(&self, object: &ValueRef, index: u32) -> Result<ValueRef, JscError> {
        let object = self.object(object)?;
        let value: Value<'js> = self.attempt(object.get(index))?;
        Ok(self.wrap(value))
    }

    pub fn set_property_at_index(
        &self,
        object: &ValueRef,
        index: u32,
        value: &ValueRef,
    ) -> Result<(), JscError> {
        let object = self.object(object)?;
        let value = self.value_of(value)?;
        self.attempt(object.set(index, value))
    }

    /// Enumerable string keys in `for-in` order, inherited ones included.
    pub fn copy_property_names(&self, object: &ValueRef) -> Result<PropertyNameArray, JscError> {
        let object = self.object(object)?;
        let names: Vec<String> = self.attempt(self.glue_fn("forIn")?.call((object,)))?;
        Ok(PropertyNameArray::new(names))
    }

    // ========================================================================
    // Calls
    // ========================================================================

    fn arguments(&self, args: &[ValueRef]) -> Result<Vec<Value<'js>>, JscError> {
        args.iter().map(|arg| self.value_of(arg)).collect()
    }

    /// Call `function`. A missing `this` is `null`.
    pub fn call_as_function(
        &self,
        function: &ValueRef,
        this: Option<&ValueRef>,
        args: &[ValueRef],
    ) -> Result<ValueRef, JscError> {
        let Some(callee) = self.value_of(function)?.into_function() else {
            return Err(self.type_error("value is not a function"));
        };
        let this = match this {
            Some(this) => self.value_of(this)?,
            None => Value::new_null(self.ctx.clone()),
        };
        let args = self.arguments(args)?;
        let result: Value<'js> = self.attempt(callee.call((This(this), Rest(args))))?;
        Ok(self.wrap(result))
    }

    pub fn call_as_constructor(
        &self,
        constructor: &ValueRef,
        args: &[ValueRef],
    ) -> Result<ValueRef, JscError> {
        let Some(callee) = self.value_of(constructor)?.into_constructor() else {
            return Err(self.type_error("value is not a constructor"));
        };
        let args = self.arguments(args)?;
        let result: Value<'js> = self.attempt(callee.construct((Rest(args),)))?;
        Ok(self.wrap(result))
    }

    // ========================================================================
    // Payload
    // ========================================================================

    /// Host payload of an instance, looked up on the prototype when the
    /// object itself is not an instance.
    pub fn get_private(&self, object: &ValueRef) -> Result<Option<Payload>, JscError> {
        let object = self.object(object)?;
        match instance::slot_or_proto_slot(self, object)? {
            Some(slot) => Ok(slot.borrow().payload().cloned()),
            None => Ok(None),
        }
    }

    /// Replace the payload. Returns `false` when there is no instance to hold it.
    pub fn set_private(&self, object: &ValueRef, payload: Option<Payload>) -> Result<bool, JscError> {
        let object = self.object(object)?;
        match instance::slot_or_proto_slot(self, object)? {
            Some(slot) => {
                let mut slot = self.attempt(slot.try_borrow_mut())?;
                slot.set_payload(payload);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Class of an instance, if `object` is one.
    pub fn class_of(&self, object: &ValueRef) -> Result<Option<ClassRef>, JscError> {
        if !object.is_object() {
            return Ok(None);
        }
        let object = self.object(object)?;
        Ok(instance::slot_of(self, object.into_value())?.map(|slot| slot.borrow().class().clone()))
    }
}

fn labelled_source(source: &str, source_url: Option<&str>, start_line: u32) -> String {
    let offset = start_line.saturating_sub(1) as usize;
    let mut labelled = String::with_capacity(source.len() + offset + 32);
    labelled.extend(std::iter::repeat_n('\n', offset));
    labelled.push_str(source);
    if let Some(url) = source_url {
        labelled.push_str("\n//# sourceURL=");
        labelled.push_str(url);
    }
    labelled
}

fn regexp_flags(flags: &str) -> String {
    let mut kept = String::with_capacity(3);
    for flag in ['g', 'i', 'm'] {
        if flags.contains(flag) {
            kept.push(flag);
        }
    }
    kept
}
