//! Locked entry points.
//!
//! A [`JsContext`] owns one engine runtime and context. Every public method
//! takes the process-wide [`EngineLock`] for its whole duration, so calling
//! one from inside a hook fails with [`JscError::Reentrant`]; hooks use the
//! [`Scope`] they are given instead.

use std::mem::ManuallyDrop;
use std::rc::Rc;

use log::debug;
use rquickjs::{Context, Runtime};

use crate::class::{ClassRef, Payload, PropertyAttributes};
use crate::config::ContextConfig;
use crate::error::JscError;
use crate::handle::{Link, ValueRef};
use crate::instance;
use crate::lock::EngineLock;
use crate::names::PropertyNameArray;
use crate::scope::{Env, Scope};

/// One engine context plus the handle registry bound to it.
///
/// Dropping it makes every outstanding [`ValueRef`] into it defunct, then
/// tears the engine down. Instances still alive at that point are finalized
/// by the engine's last collection.
pub struct JsContext {
    env: Rc<Env>,
    // Released under the engine lock, context first.
    context: ManuallyDrop<Context>,
    runtime: ManuallyDrop<Runtime>,
}

impl JsContext {
    pub fn new() -> Result<Self, JscError> {
        Self::with_config(&ContextConfig::default())
    }

    pub fn with_config(config: &ContextConfig) -> Result<Self, JscError> {
        let _guard = EngineLock::acquire()?;
        let runtime = Runtime::new()?;
        config.apply(&runtime);
        let context = Context::full(&runtime)?;
        let env = Env::new();
        context.with(|ctx| {
            let glue = instance::install(&ctx, &env)
                .map_err(|error| Scope::new(ctx.clone(), env.clone()).capture(error))?;
            env.install_glue(glue);
            Ok::<_, JscError>(())
        })?;
        debug!("context created with {config:?}");
        Ok(JsContext {
            env,
            context: ManuallyDrop::new(context),
            runtime: ManuallyDrop::new(runtime),
        })
    }

    /// Enter the engine and run `f` with an unlocked [`Scope`].
    pub fn with<R, F>(&self, f: F) -> Result<R, JscError>
    where
        F: for<'js> FnOnce(&Scope<'js>) -> Result<R, JscError>,
    {
        let _guard = EngineLock::acquire()?;
        self.context.with(|ctx| {
            let scope = Scope::new(ctx, self.env.clone());
            scope.weaken_pending()?;
            f(&scope)
        })
    }

    /// Run a full engine collection, then retire handles whose objects it freed.
    pub fn collect_garbage(&self) -> Result<(), JscError> {
        let _guard = EngineLock::acquire()?;
        self.context.with(|ctx| {
            let scope = Scope::new(ctx.clone(), self.env.clone());
            scope.weaken_pending()?;
            ctx.run_gc();
            let retired = scope.sweep()?;
            if retired > 0 {
                debug!("collection retired {retired} handles");
            }
            Ok(())
        })
    }

    /// Engine-backed handle records that are still alive, parked ones included.
    pub fn live_handles(&self) -> usize {
        self.env.registry.borrow().live_count()
    }

    /// Records with no external reference, waiting for the engine to collect
    /// their object.
    pub fn parked_handles(&self) -> usize {
        self.env.registry.borrow().parked_count()
    }

    pub fn memory_usage(&self) -> usize {
        let usage = self.runtime.memory_usage();
        usize::try_from(usage.memory_used_size).unwrap_or(0)
    }

    // ========================================================================
    // Locked shorthands for the common operations
    // ========================================================================

    pub fn evaluate_script(
        &self,
        source: &str,
        source_url: Option<&str>,
        start_line: u32,
    ) -> Result<ValueRef, JscError> {
        self.with(|scope| scope.evaluate_script(source, source_url, start_line))
    }

    pub fn global_object(&self) -> Result<ValueRef, JscError> {
        self.with(|scope| Ok(scope.global_object()))
    }

    pub fn make_object(
        &self,
        class: Option<&ClassRef>,
        payload: Option<Payload>,
    ) -> Result<ValueRef, JscError> {
        self.with(|scope| scope.make_object(class, payload))
    }

    pub fn make_function(
        &self,
        name: Option<&str>,
        params: &[&str],
        body: &str,
        source_url: Option<&str>,
        start_line: u32,
    ) -> Result<ValueRef, JscError> {
        self.with(|scope| scope.make_function(name, params, body, source_url, start_line))
    }

    pub fn get_property(&self, object: &ValueRef, name: &str) -> Result<ValueRef, JscError> {
        self.with(|scope| scope.get_property(object, name))
    }

    pub fn set_property(
        &self,
        object: &ValueRef,
        name: &str,
        value: &ValueRef,
        attributes: PropertyAttributes,
    ) -> Result<(), JscError> {
        self.with(|scope| scope.set_property(object, name, value, attributes))
    }

    pub fn delete_property(&self, object: &ValueRef, name: &str) -> Result<bool, JscError> {
        self.with(|scope| scope.delete_property(object, name))
    }

    pub fn has_property(&self, object: &ValueRef, name: &str) -> Result<bool, JscError> {
        self.with(|scope| scope.has_property(object, name))
    }

    pub fn copy_property_names(&self, object: &ValueRef) -> Result<PropertyNameArray, JscError> {
        self.with(|scope| scope.copy_property_names(object))
    }

    pub fn call_as_function(
        &self,
        function: &ValueRef,
        this: Option<&ValueRef>,
        args: &[ValueRef],
    ) -> Result<ValueRef, JscError> {
        self.with(|scope| scope.call_as_function(function, this, args))
    }

    pub fn call_as_constructor(
        &self,
        constructor: &ValueRef,
        args: &[ValueRef],
    ) -> Result<ValueRef, JscError> {
        self.with(|scope| scope.call_as_constructor(constructor, args))
    }

    pub fn to_number(&self, value: &ValueRef) -> Result<f64, JscError> {
        self.with(|scope| scope.to_number(value))
    }

    pub fn to_string(&self, value: &ValueRef) -> Result<String, JscError> {
        self.with(|scope| scope.to_string(value))
    }

    pub fn get_private(&self, object: &ValueRef) -> Result<Option<Payload>, JscError> {
        self.with(|scope| scope.get_private(object))
    }

    pub fn set_private(&self, object: &ValueRef, payload: Option<Payload>) -> Result<bool, JscError> {
        self.with(|scope| scope.set_private(object, payload))
    }
}

impl Drop for JsContext {
    fn drop(&mut self) {
        let _guard = EngineLock::hold();
        let env = self.env.clone();
        self.context.with(|_ctx| {
            let (live, parked) = env.registry.borrow_mut().drain();
            let count = live.len();
            for record in &live {
                drop(record.replace_link(Link::Defunct));
            }
            drop(parked);
            drop(live);
            drop(env.take_glue());
            debug!("context torn down, {count} handles made defunct");
        });
        // SAFETY: neither field is touched again. The runtime's final
        // collection finalizes surviving instances while the lock is held.
        unsafe {
            ManuallyDrop::drop(&mut self.context);
            ManuallyDrop::drop(&mut self.runtime);
        }
    }
}
