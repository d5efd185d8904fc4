//! Integration tests for the compatibility layer, organized by feature
//!
//! These tests exercise the layer through the public API only.
//!
//! Set `GC_THRESHOLD` to make the engine collect more aggressively:
//!
//! ```bash
//! cargo test                       # Engine default threshold
//! GC_THRESHOLD=1 cargo test        # Collect on nearly every allocation
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing, clippy::panic)]

mod constructors;
mod errors;
mod functions;
mod payload;

use jscore_compat::{ContextConfig, JsContext, PropertyAttributes, ValueRef};

/// Create a context, honoring `GC_THRESHOLD` from the environment.
pub fn create_test_context() -> JsContext {
    let gc_threshold = std::env::var("GC_THRESHOLD")
        .ok()
        .and_then(|s| s.parse::<usize>().ok());
    let config = ContextConfig {
        gc_threshold,
        ..ContextConfig::default()
    };
    JsContext::with_config(&config).unwrap()
}

/// Evaluate a script and return its completion value.
pub fn eval(context: &JsContext, source: &str) -> ValueRef {
    context.evaluate_script(source, None, 1).unwrap()
}

pub fn eval_number(context: &JsContext, source: &str) -> f64 {
    let value = eval(context, source);
    context.to_number(&value).unwrap()
}

pub fn eval_string(context: &JsContext, source: &str) -> String {
    let value = eval(context, source);
    context.to_string(&value).unwrap()
}

pub fn eval_bool(context: &JsContext, source: &str) -> bool {
    let value = eval(context, source);
    context.with(|scope| scope.to_boolean(&value)).unwrap()
}

/// Store `value` on the global object under `name`.
pub fn install_global(context: &JsContext, name: &str, value: &ValueRef) {
    let global = context.global_object().unwrap();
    context
        .set_property(&global, name, value, PropertyAttributes::empty())
        .unwrap();
}
