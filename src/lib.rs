//! JavaScriptCore-style object model on an embedded QuickJS engine.
//!
//! Hosts describe classes with [`ClassDefinition`]: a name, an optional
//! parent, static value and function tables, and hooks that intercept
//! property access, calls, construction, conversion and `instanceof`.
//! Instances of a class are engine objects whose every operation walks the
//! class chain from leaf to root. Values cross the boundary as [`ValueRef`]
//! handles: numbers, booleans, `undefined` and `null` are stored inline, and
//! everything else is a reference-counted record that turns defunct once the
//! engine reclaims what it points to.
//!
//! All engine access is serialized through one process-wide, non-reentrant
//! [`EngineLock`]. Public [`JsContext`] methods take it; hooks receive a
//! [`Scope`] that works without it.
//!
//! # Example
//!
//! ```
//! use jscore_compat::{ClassDefinition, ClassRef, JsContext, PropertyAttributes, ValueRef};
//!
//! let point = ClassRef::new(
//!     &ClassDefinition::new("Point")
//!         .static_value("x", PropertyAttributes::READ_ONLY, |_, _, _| Ok(Some(ValueRef::number(3.0)))),
//! );
//! let context = JsContext::new().unwrap();
//! let object = context.make_object(Some(&point), None).unwrap();
//! let x = context.get_property(&object, "x").unwrap();
//! assert_eq!(x.as_number(), Some(3.0));
//! ```

pub mod class;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
mod handle;
mod instance;
pub mod lock;
pub mod names;
pub mod scope;

pub use class::{
    CallAsConstructorHook, CallAsFunctionHook, ClassDefinition, ClassRef, ConvertToTypeHook,
    DeletePropertyHook, FinalizeHook, GetPropertyHook, GetPropertyNamesHook, HasInstanceHook,
    HasPropertyHook, InitializeHook, Payload, PrimitiveHint, PropertyAttributes,
    PropertyNameAccumulator, PropertyNames, SetPropertyHook, StaticFunction, StaticValue,
};
pub use config::ContextConfig;
pub use context::JsContext;
pub use error::{HookResult, JscError};
pub use handle::{HandleTag, Oddball, ValueRef, fits_inline};
pub use instance::DEFAULT_CLASS_NAME;
pub use lock::{EngineGuard, EngineLock};
pub use names::PropertyNameArray;
pub use scope::{Scope, ValueKind};
