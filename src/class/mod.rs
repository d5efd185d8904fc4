//! Class definitions.
//!
//! A [`ClassDefinition`] is the host-authored descriptor: a name, an optional
//! parent, static value and function tables, and a set of optional hooks. It
//! becomes usable once turned into a [`ClassRef`], an immutable shared copy
//! that every instance of the class retains.
//!
//! Parents must exist as `ClassRef`s before a child can name them, and a
//! `ClassRef` never changes after creation, so every parent chain is finite.

pub mod accumulator;

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use log::debug;

use crate::error::HookResult;
use crate::handle::ValueRef;
use crate::scope::Scope;

pub use accumulator::{PropertyNameAccumulator, PropertyNames};

/// Host data attached to an instance.
pub type Payload = Arc<dyn Any + Send + Sync>;

bitflags::bitflags! {
    /// Attribute flags for class-provided and host-defined properties.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PropertyAttributes: u32 {
        const READ_ONLY = 1 << 1;
        const DONT_ENUM = 1 << 2;
        const DONT_DELETE = 1 << 3;
    }
}

/// Conversion requested from a `convert_to_type` hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveHint {
    Number,
    String,
}

impl PrimitiveHint {
    /// Map a `Symbol.toPrimitive` hint. `"default"` and anything unknown is a number.
    pub fn from_hint(hint: &str) -> Self {
        if hint == "string" {
            PrimitiveHint::String
        } else {
            PrimitiveHint::Number
        }
    }
}

// ============================================================================
// Hook types
// ============================================================================

pub type HasPropertyHook =
    Arc<dyn Fn(&Scope<'_>, &ValueRef, &str) -> HookResult<bool> + Send + Sync>;
pub type GetPropertyHook =
    Arc<dyn Fn(&Scope<'_>, &ValueRef, &str) -> HookResult<Option<ValueRef>> + Send + Sync>;
pub type SetPropertyHook =
    Arc<dyn Fn(&Scope<'_>, &ValueRef, &str, &ValueRef) -> HookResult<bool> + Send + Sync>;
pub type DeletePropertyHook =
    Arc<dyn Fn(&Scope<'_>, &ValueRef, &str) -> HookResult<bool> + Send + Sync>;
pub type GetPropertyNamesHook = Arc<
    dyn Fn(&Scope<'_>, &ValueRef, &mut PropertyNameAccumulator) -> HookResult<()> + Send + Sync,
>;
pub type InitializeHook = Arc<dyn Fn(&Scope<'_>, &ValueRef) -> HookResult<()> + Send + Sync>;
pub type FinalizeHook = Arc<dyn Fn(Option<&Payload>) + Send + Sync>;
/// `(scope, function, this, arguments)`
pub type CallAsFunctionHook = Arc<
    dyn Fn(&Scope<'_>, &ValueRef, &ValueRef, &[ValueRef]) -> HookResult<ValueRef> + Send + Sync,
>;
/// `(scope, constructor, arguments)`
pub type CallAsConstructorHook =
    Arc<dyn Fn(&Scope<'_>, &ValueRef, &[ValueRef]) -> HookResult<ValueRef> + Send + Sync>;
/// `(scope, constructor, candidate)`
pub type HasInstanceHook =
    Arc<dyn Fn(&Scope<'_>, &ValueRef, &ValueRef) -> HookResult<bool> + Send + Sync>;
pub type ConvertToTypeHook = Arc<
    dyn Fn(&Scope<'_>, &ValueRef, PrimitiveHint) -> HookResult<Option<ValueRef>> + Send + Sync,
>;

/// Entry in the static value table.
#[derive(Clone, Default)]
pub struct StaticValue {
    pub getter: Option<GetPropertyHook>,
    pub setter: Option<SetPropertyHook>,
    pub attributes: PropertyAttributes,
}

/// Entry in the static function table.
#[derive(Clone)]
pub struct StaticFunction {
    pub callback: CallAsFunctionHook,
    pub attributes: PropertyAttributes,
}

#[derive(Clone, Default)]
pub(crate) struct Hooks {
    pub has_property: Option<HasPropertyHook>,
    pub get_property: Option<GetPropertyHook>,
    pub set_property: Option<SetPropertyHook>,
    pub delete_property: Option<DeletePropertyHook>,
    pub get_property_names: Option<GetPropertyNamesHook>,
    pub initialize: Option<InitializeHook>,
    pub finalize: Option<FinalizeHook>,
    pub call_as_function: Option<CallAsFunctionHook>,
    pub call_as_constructor: Option<CallAsConstructorHook>,
    pub has_instance: Option<HasInstanceHook>,
    pub convert_to_type: Option<ConvertToTypeHook>,
}

// ============================================================================
// ClassDefinition
// ============================================================================

/// Descriptor for a class, consumed by [`ClassRef::new`].
///
/// ```
/// use jscore_compat::{ClassDefinition, ClassRef, PropertyAttributes, ValueRef};
///
/// let point = ClassRef::new(
///     &ClassDefinition::new("Point")
///         .static_value("x", PropertyAttributes::READ_ONLY, |_, _, _| Ok(Some(ValueRef::number(1.0))))
///         .static_value("y", PropertyAttributes::READ_ONLY, |_, _, _| Ok(Some(ValueRef::number(2.0)))),
/// );
/// assert_eq!(point.name(), Some("Point"));
/// ```
#[derive(Clone, Default)]
pub struct ClassDefinition {
    name: Option<String>,
    parent: Option<ClassRef>,
    static_values: IndexMap<String, StaticValue>,
    static_functions: IndexMap<String, StaticFunction>,
    hooks: Hooks,
    synthesized: bool,
}

impl ClassDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        ClassDefinition {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    /// A definition with no class name.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Definition backing a function object made without a host class.
    pub(crate) fn synthesized() -> Self {
        ClassDefinition {
            synthesized: true,
            ..Default::default()
        }
    }

    pub fn parent(mut self, parent: &ClassRef) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    /// Add a static value with a getter. A later entry with the same name replaces it.
    pub fn static_value<G>(
        mut self,
        name: impl Into<String>,
        attributes: PropertyAttributes,
        getter: G,
    ) -> Self
    where
        G: Fn(&Scope<'_>, &ValueRef, &str) -> HookResult<Option<ValueRef>> + Send + Sync + 'static,
    {
        self.static_values.insert(
            name.into(),
            StaticValue {
                getter: Some(Arc::new(getter)),
                setter: None,
                attributes,
            },
        );
        self
    }

    /// Add a static value with both a getter and a setter.
    pub fn static_accessor<G, S>(
        self,
        name: impl Into<String>,
        attributes: PropertyAttributes,
        getter: G,
        setter: S,
    ) -> Self
    where
        G: Fn(&Scope<'_>, &ValueRef, &str) -> HookResult<Option<ValueRef>> + Send + Sync + 'static,
        S: Fn(&Scope<'_>, &ValueRef, &str, &ValueRef) -> HookResult<bool> + Send + Sync + 'static,
    {
        self.static_entry(
            name,
            StaticValue {
                getter: Some(Arc::new(getter)),
                setter: Some(Arc::new(setter)),
                attributes,
            },
        )
    }

    /// Add a static value with an explicit entry, such as a setter-only value.
    pub fn static_entry(mut self, name: impl Into<String>, entry: StaticValue) -> Self {
        self.static_values.insert(name.into(), entry);
        self
    }

    pub fn static_function<F>(
        mut self,
        name: impl Into<String>,
        attributes: PropertyAttributes,
        callback: F,
    ) -> Self
    where
        F: Fn(&Scope<'_>, &ValueRef, &ValueRef, &[ValueRef]) -> HookResult<ValueRef>
            + Send
            + Sync
            + 'static,
    {
        self.static_functions.insert(
            name.into(),
            StaticFunction {
                callback: Arc::new(callback),
                attributes,
            },
        );
        self
    }

    pub fn has_property<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Scope<'_>, &ValueRef, &str) -> HookResult<bool> + Send + Sync + 'static,
    {
        self.hooks.has_property = Some(Arc::new(hook));
        self
    }

    pub fn get_property<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Scope<'_>, &ValueRef, &str) -> HookResult<Option<ValueRef>> + Send + Sync + 'static,
    {
        self.hooks.get_property = Some(Arc::new(hook));
        self
    }

    pub fn set_property<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Scope<'_>, &ValueRef, &str, &ValueRef) -> HookResult<bool> + Send + Sync + 'static,
    {
        self.hooks.set_property = Some(Arc::new(hook));
        self
    }

    pub fn delete_property<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Scope<'_>, &ValueRef, &str) -> HookResult<bool> + Send + Sync + 'static,
    {
        self.hooks.delete_property = Some(Arc::new(hook));
        self
    }

    pub fn get_property_names<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Scope<'_>, &ValueRef, &mut PropertyNameAccumulator) -> HookResult<()>
            + Send
            + Sync
            + 'static,
    {
        self.hooks.get_property_names = Some(Arc::new(hook));
        self
    }

    pub fn initialize<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Scope<'_>, &ValueRef) -> HookResult<()> + Send + Sync + 'static,
    {
        self.hooks.initialize = Some(Arc::new(hook));
        self
    }

    /// Runs when the engine collects an instance. It only sees the payload.
    pub fn finalize<F>(mut self, hook: F) -> Self
    where
        F: Fn(Option<&Payload>) + Send + Sync + 'static,
    {
        self.hooks.finalize = Some(Arc::new(hook));
        self
    }

    pub fn call_as_function<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Scope<'_>, &ValueRef, &ValueRef, &[ValueRef]) -> HookResult<ValueRef>
            + Send
            + Sync
            + 'static,
    {
        self.hooks.call_as_function = Some(Arc::new(hook));
        self
    }

    pub fn call_as_constructor<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Scope<'_>, &ValueRef, &[ValueRef]) -> HookResult<ValueRef> + Send + Sync + 'static,
    {
        self.hooks.call_as_constructor = Some(Arc::new(hook));
        self
    }

    pub fn has_instance<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Scope<'_>, &ValueRef, &ValueRef) -> HookResult<bool> + Send + Sync + 'static,
    {
        self.hooks.has_instance = Some(Arc::new(hook));
        self
    }

    pub fn convert_to_type<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Scope<'_>, &ValueRef, PrimitiveHint) -> HookResult<Option<ValueRef>>
            + Send
            + Sync
            + 'static,
    {
        self.hooks.convert_to_type = Some(Arc::new(hook));
        self
    }

    pub(crate) fn with_call_as_constructor(mut self, hook: Option<CallAsConstructorHook>) -> Self {
        self.hooks.call_as_constructor = hook;
        self
    }
}

// ============================================================================
// ClassRef
// ============================================================================

static NEXT_CLASS_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) struct ClassInner {
    id: u64,
    name: Option<String>,
    parent: Option<ClassRef>,
    static_values: IndexMap<String, StaticValue>,
    static_functions: IndexMap<String, StaticFunction>,
    pub(crate) hooks: Hooks,
    synthesized: bool,
}

impl Drop for ClassInner {
    fn drop(&mut self) {
        debug!("class #{} ({:?}) released", self.id, self.name);
    }
}

/// Shared, immutable class. Cloning retains; dropping releases.
#[derive(Clone)]
pub struct ClassRef(Arc<ClassInner>);

impl ClassRef {
    pub fn new(definition: &ClassDefinition) -> Self {
        let definition = definition.clone();
        let inner = ClassInner {
            id: NEXT_CLASS_ID.fetch_add(1, Ordering::Relaxed),
            name: definition.name,
            parent: definition.parent,
            static_values: definition.static_values,
            static_functions: definition.static_functions,
            hooks: definition.hooks,
            synthesized: definition.synthesized,
        };
        debug!(
            "class #{} ({:?}) created, parent {:?}",
            inner.id,
            inner.name,
            inner.parent.as_ref().map(ClassRef::id)
        );
        ClassRef(Arc::new(inner))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn name(&self) -> Option<&str> {
        self.0.name.as_deref()
    }

    pub fn parent(&self) -> Option<&ClassRef> {
        self.0.parent.as_ref()
    }

    /// Number of live references, instances included.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    pub fn ptr_eq(&self, other: &ClassRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn static_value(&self, name: &str) -> Option<&StaticValue> {
        self.0.static_values.get(name)
    }

    pub fn static_values(&self) -> impl Iterator<Item = (&str, &StaticValue)> {
        self.0.static_values.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    pub fn static_function(&self, name: &str) -> Option<&StaticFunction> {
        self.0.static_functions.get(name)
    }

    pub fn static_functions(&self) -> impl Iterator<Item = (&str, &StaticFunction)> {
        self.0.static_functions.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    pub(crate) fn hooks(&self) -> &Hooks {
        &self.0.hooks
    }

    /// This class followed by its ancestors, leaf to root.
    pub fn chain(&self) -> Chain<'_> {
        Chain { next: Some(self) }
    }

    /// Whether `other` is this class or one of its ancestors.
    pub fn inherits_from(&self, other: &ClassRef) -> bool {
        self.chain().any(|class| class.ptr_eq(other))
    }

    /// Name of the nearest class in the chain that declares one.
    pub fn display_name(&self) -> Option<&str> {
        self.chain().find_map(ClassRef::name)
    }

    pub(crate) fn is_synthesized(&self) -> bool {
        self.0.synthesized
    }

    pub(crate) fn is_callable(&self) -> bool {
        self.chain().any(|class| {
            let hooks = class.hooks();
            hooks.call_as_function.is_some() || hooks.call_as_constructor.is_some()
        })
    }

    pub(crate) fn declares_conversion(&self) -> bool {
        self.chain().any(|class| class.hooks().convert_to_type.is_some())
    }

    pub(crate) fn declares_has_instance(&self) -> bool {
        self.chain().any(|class| class.hooks().has_instance.is_some())
    }

    /// Static function names across the chain; the nearest definition wins.
    pub(crate) fn static_function_names(&self) -> IndexMap<&str, PropertyAttributes> {
        let mut names = IndexMap::new();
        for class in self.chain() {
            for (name, function) in class.static_functions() {
                names.entry(name).or_insert(function.attributes);
            }
        }
        names
    }
}

impl fmt::Debug for ClassRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassRef")
            .field("id", &self.0.id)
            .field("name", &self.0.name)
            .field("parent", &self.0.parent.as_ref().map(ClassRef::id))
            .finish()
    }
}

/// Iterator over a class chain, leaf first.
pub struct Chain<'a> {
    next: Option<&'a ClassRef>,
}

impl<'a> Iterator for Chain<'a> {
    type Item = &'a ClassRef;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.parent();
        Some(current)
    }
}
