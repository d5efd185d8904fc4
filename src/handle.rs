//! Engine value handles.
//!
//! A [`ValueRef`] is the only way a value crosses the compatibility boundary.
//! Small numbers and the four oddball constants are carried inline with no
//! allocation; everything else lives in a heap record ([`ValueBox`]) that
//! links to the engine value.
//!
//! # Raw encoding
//!
//! The raw `u64` form keeps a two-bit tag in its low bits:
//!
//! | tag  | meaning                                                   |
//! |------|-----------------------------------------------------------|
//! | `00` | double whose own low two bits are zero, stored as-is      |
//! | `10` | oddball: undefined `0x2`, null `0x6`, false `0xa`, true `0xe` |
//! | `01` | pointer to a boxed non-object (string, imprecise double)  |
//! | `11` | pointer to a boxed object                                 |
//!
//! # Ownership
//!
//! Every `ValueRef` and every raw handle unit is one external reference.
//! While an object record has external references it keeps its engine value
//! alive. When the last one goes away a record that was handed out in raw
//! form is parked in the [`HandleRegistry`] and its link is later downgraded
//! to an engine weak reference; it stays valid until the engine reclaims the
//! object, at which point it becomes defunct. Records that never left Rust
//! are disposed right away.

use std::cell::{Cell, Ref, RefCell};
use std::fmt;
use std::mem::{self, ManuallyDrop};
use std::rc::{Rc, Weak};

use rquickjs::{Object, Persistent, Value};
use rustc_hash::FxHashMap;

use crate::lock::EngineLock;

const TAG_MASK: u64 = 0b11;

// Boxed records are addressed through tagged pointers.
const _: () = assert!(mem::align_of::<ValueBox>() >= 4);

// ═══════════════════════════════════════════════════════════════════════════════
// Tags and oddballs
// ═══════════════════════════════════════════════════════════════════════════════

/// Low-bit tag of a raw handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleTag {
    InlineDouble = 0b00,
    BoxedNonObject = 0b01,
    Oddball = 0b10,
    BoxedObject = 0b11,
}

impl HandleTag {
    pub fn of_raw(raw: u64) -> HandleTag {
        match raw & TAG_MASK {
            0b00 => HandleTag::InlineDouble,
            0b01 => HandleTag::BoxedNonObject,
            0b10 => HandleTag::Oddball,
            _ => HandleTag::BoxedObject,
        }
    }

    pub fn is_boxed(self) -> bool {
        matches!(self, HandleTag::BoxedNonObject | HandleTag::BoxedObject)
    }
}

/// The four constant values that never need a heap record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Oddball {
    Undefined,
    Null,
    False,
    True,
}

impl Oddball {
    pub const fn raw(self) -> u64 {
        match self {
            Oddball::Undefined => 0x2,
            Oddball::Null => 0x6,
            Oddball::False => 0xa,
            Oddball::True => 0xe,
        }
    }

    fn from_raw(raw: u64) -> Oddball {
        match raw {
            0x6 => Oddball::Null,
            0xa => Oddball::False,
            0xe => Oddball::True,
            _ => Oddball::Undefined,
        }
    }
}

impl From<bool> for Oddball {
    fn from(value: bool) -> Self {
        if value { Oddball::True } else { Oddball::False }
    }
}

/// Whether a double survives the inline encoding unchanged.
pub fn fits_inline(number: f64) -> bool {
    number.to_bits() & TAG_MASK == 0
}

// ═══════════════════════════════════════════════════════════════════════════════
// Boxed records
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BoxKind {
    NonObject,
    Object,
}

/// Connection between a record and the engine.
pub(crate) enum Link {
    /// A double that needed full precision; no engine value involved
    Double(f64),
    /// Engine value kept alive by this record
    Strong(Persistent<Value<'static>>),
    /// Engine `WeakRef` to an object nobody references externally
    Weak(Persistent<Object<'static>>),
    /// The engine value is gone
    Defunct,
}

impl Link {
    fn is_engine_backed(&self) -> bool {
        matches!(self, Link::Strong(_) | Link::Weak(_))
    }
}

/// Heap record behind a boxed [`ValueRef`].
pub struct ValueBox {
    id: u64,
    kind: BoxKind,
    external: Cell<usize>,
    /// Set once the record has crossed the raw boundary
    exported: Cell<bool>,
    link: RefCell<Link>,
    registry: Weak<RefCell<HandleRegistry>>,
}

impl ValueBox {
    fn double(number: f64) -> Self {
        ValueBox {
            id: 0,
            kind: BoxKind::NonObject,
            external: Cell::new(1),
            exported: Cell::new(false),
            link: RefCell::new(Link::Double(number)),
            registry: Weak::new(),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn kind(&self) -> BoxKind {
        self.kind
    }

    pub(crate) fn external(&self) -> usize {
        self.external.get()
    }

    pub(crate) fn link(&self) -> Ref<'_, Link> {
        self.link.borrow()
    }

    /// Swap the engine link, returning the previous one.
    ///
    /// The caller owns the returned link and must drop it while the engine
    /// is entered.
    pub(crate) fn replace_link(&self, link: Link) -> Link {
        self.link.replace(link)
    }

    fn tag(&self) -> HandleTag {
        match self.kind {
            BoxKind::NonObject => HandleTag::BoxedNonObject,
            BoxKind::Object => HandleTag::BoxedObject,
        }
    }

    fn retain_external(self: &Rc<Self>) {
        let previous = self.external.get();
        self.external.set(previous + 1);
        if previous == 0 {
            let unparked = self
                .registry
                .upgrade()
                .and_then(|registry| registry.try_borrow_mut().ok()?.unpark(self.id));
            drop(unparked);
        }
    }

    /// Only exported object records are parked: a raw handle may still revive
    /// them. Anything else is disposed with its last `ValueRef`.
    fn release_external(self: &Rc<Self>) {
        let remaining = self.external.get().saturating_sub(1);
        self.external.set(remaining);
        if remaining == 0
            && self.exported.get()
            && self.kind == BoxKind::Object
            && self.link.borrow().is_engine_backed()
        {
            if let Some(registry) = self.registry.upgrade() {
                if let Ok(mut registry) = registry.try_borrow_mut() {
                    registry.park(Rc::clone(self));
                }
            }
        }
    }
}

impl Drop for ValueBox {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            if let Ok(mut registry) = registry.try_borrow_mut() {
                registry.live.remove(&self.id);
            }
        }
        let link = self.link.replace(Link::Defunct);
        if link.is_engine_backed() {
            let _guard = EngineLock::hold();
            drop(link);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Handle registry
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-context table of engine-backed records.
///
/// `live` sees every record so teardown can cut them loose from the engine.
/// `parked` owns object records whose external count dropped to zero; they
/// stay here until the engine reclaims their object.
#[derive(Default)]
pub struct HandleRegistry {
    next_id: u64,
    live: FxHashMap<u64, Weak<ValueBox>>,
    parked: FxHashMap<u64, Rc<ValueBox>>,
    pending: Vec<u64>,
}

impl HandleRegistry {
    pub(crate) fn new_shared() -> Rc<RefCell<HandleRegistry>> {
        Rc::new(RefCell::new(HandleRegistry::default()))
    }

    /// Create a record for an engine value with one external reference.
    pub(crate) fn allocate(
        registry: &Rc<RefCell<HandleRegistry>>,
        kind: BoxKind,
        value: Persistent<Value<'static>>,
    ) -> Rc<ValueBox> {
        let mut table = registry.borrow_mut();
        table.next_id += 1;
        let record = Rc::new(ValueBox {
            id: table.next_id,
            kind,
            external: Cell::new(1),
            exported: Cell::new(false),
            link: RefCell::new(Link::Strong(value)),
            registry: Rc::downgrade(registry),
        });
        table.live.insert(record.id, Rc::downgrade(&record));
        record
    }

    /// Records that still reach the engine.
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Records with no external reference, waiting on the engine collector.
    pub fn parked_count(&self) -> usize {
        self.parked.len()
    }

    fn park(&mut self, record: Rc<ValueBox>) {
        self.pending.push(record.id);
        self.parked.insert(record.id, record);
    }

    fn unpark(&mut self, id: u64) -> Option<Rc<ValueBox>> {
        self.parked.remove(&id)
    }

    /// Parked records whose strong link has not been downgraded yet.
    pub(crate) fn take_pending(&mut self) -> Vec<Rc<ValueBox>> {
        let pending = mem::take(&mut self.pending);
        pending
            .into_iter()
            .filter_map(|id| self.parked.get(&id).cloned())
            .collect()
    }

    pub(crate) fn parked_records(&self) -> Vec<Rc<ValueBox>> {
        self.parked.values().cloned().collect()
    }

    pub(crate) fn forget_parked(&mut self, id: u64) -> Option<Rc<ValueBox>> {
        self.parked.remove(&id)
    }

    /// Every live record, leaving the table empty.
    pub(crate) fn drain(&mut self) -> (Vec<Rc<ValueBox>>, Vec<Rc<ValueBox>>) {
        self.pending.clear();
        let live = self.live.drain().filter_map(|(_, weak)| weak.upgrade()).collect();
        let parked = self.parked.drain().map(|(_, record)| record).collect();
        (live, parked)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ValueRef
// ═══════════════════════════════════════════════════════════════════════════════

enum Repr {
    Number(f64),
    Oddball(Oddball),
    Boxed(Rc<ValueBox>),
}

/// Handle to one value on the compatibility boundary.
///
/// Cloning retains and dropping releases. Inline handles have no count.
pub struct ValueRef(Repr);

impl ValueRef {
    pub fn undefined() -> Self {
        ValueRef(Repr::Oddball(Oddball::Undefined))
    }

    pub fn null() -> Self {
        ValueRef(Repr::Oddball(Oddball::Null))
    }

    pub fn boolean(value: bool) -> Self {
        ValueRef(Repr::Oddball(value.into()))
    }

    /// Wrap a number, inline when the encoding allows it.
    pub fn number(number: f64) -> Self {
        if fits_inline(number) {
            ValueRef(Repr::Number(number))
        } else {
            ValueRef(Repr::Boxed(Rc::new(ValueBox::double(number))))
        }
    }

    pub(crate) fn from_record(record: Rc<ValueBox>) -> Self {
        ValueRef(Repr::Boxed(record))
    }

    pub(crate) fn record(&self) -> Option<&Rc<ValueBox>> {
        match &self.0 {
            Repr::Boxed(record) => Some(record),
            _ => None,
        }
    }

    pub(crate) fn oddball(&self) -> Option<Oddball> {
        match &self.0 {
            Repr::Oddball(oddball) => Some(*oddball),
            _ => None,
        }
    }

    pub fn tag(&self) -> HandleTag {
        match &self.0 {
            Repr::Number(_) => HandleTag::InlineDouble,
            Repr::Oddball(_) => HandleTag::Oddball,
            Repr::Boxed(record) => record.tag(),
        }
    }

    /// True when the handle owns no heap record.
    pub fn is_inline(&self) -> bool {
        !self.tag().is_boxed()
    }

    pub fn is_undefined(&self) -> bool {
        self.oddball() == Some(Oddball::Undefined)
    }

    pub fn is_null(&self) -> bool {
        self.oddball() == Some(Oddball::Null)
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self.oddball()? {
            Oddball::True => Some(true),
            Oddball::False => Some(false),
            _ => None,
        }
    }

    /// The number this handle carries without consulting the engine.
    pub fn as_number(&self) -> Option<f64> {
        match &self.0 {
            Repr::Number(number) => Some(*number),
            Repr::Boxed(record) => match &*record.link() {
                Link::Double(number) => Some(*number),
                _ => None,
            },
            Repr::Oddball(_) => None,
        }
    }

    pub fn is_object(&self) -> bool {
        self.tag() == HandleTag::BoxedObject
    }

    /// External references on the record, `None` for inline handles.
    pub fn external_count(&self) -> Option<usize> {
        self.record().map(|record| record.external())
    }

    /// True once the engine value behind this handle has been reclaimed.
    pub fn is_defunct(&self) -> bool {
        self.record()
            .is_some_and(|record| matches!(&*record.link(), Link::Defunct))
    }

    /// Identity of the underlying record, not value equality.
    pub fn same_handle(&self, other: &ValueRef) -> bool {
        match (&self.0, &other.0) {
            (Repr::Boxed(a), Repr::Boxed(b)) => Rc::ptr_eq(a, b),
            _ => self.clone().into_raw() == other.clone().into_raw(),
        }
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Raw boundary form
    // ───────────────────────────────────────────────────────────────────────────

    /// Convert into the tagged raw form, transferring this reference to it.
    pub fn into_raw(self) -> u64 {
        let this = ManuallyDrop::new(self);
        match &this.0 {
            Repr::Number(number) => number.to_bits(),
            Repr::Oddball(oddball) => oddball.raw(),
            Repr::Boxed(record) => {
                record.exported.set(true);
                Rc::as_ptr(record) as usize as u64 | record.tag() as u64
            }
        }
    }

    /// Take back one reference from a raw handle.
    ///
    /// # Safety
    ///
    /// A boxed `raw` must come from [`ValueRef::into_raw`] or be covered by a
    /// [`ValueRef::retain_raw`], and that reference must not have been
    /// released already.
    pub unsafe fn from_raw(raw: u64) -> ValueRef {
        match HandleTag::of_raw(raw) {
            HandleTag::InlineDouble => ValueRef(Repr::Number(f64::from_bits(raw))),
            HandleTag::Oddball => ValueRef(Repr::Oddball(Oddball::from_raw(raw))),
            HandleTag::BoxedNonObject | HandleTag::BoxedObject => {
                let ptr = (raw & !TAG_MASK) as usize as *const ValueBox;
                // SAFETY: the pointer came from Rc::as_ptr on a record whose
                // strong count includes the reference being taken back.
                ValueRef(Repr::Boxed(unsafe { Rc::from_raw(ptr) }))
            }
        }
    }

    /// Add one external reference to a raw handle.
    ///
    /// A parked record is revived by this call.
    ///
    /// # Safety
    ///
    /// A boxed `raw` must point at a record that is still allocated: either
    /// referenced elsewhere or parked and not yet reclaimed.
    pub unsafe fn retain_raw(raw: u64) {
        if HandleTag::of_raw(raw).is_boxed() {
            // SAFETY: upheld by the caller; the borrowed reference is never dropped.
            let borrowed = ManuallyDrop::new(unsafe { ValueRef::from_raw(raw) });
            let _ = ValueRef::clone(&borrowed).into_raw();
        }
    }

    /// Drop one external reference held by a raw handle.
    ///
    /// # Safety
    ///
    /// Same contract as [`ValueRef::from_raw`].
    pub unsafe fn release_raw(raw: u64) {
        drop(unsafe { ValueRef::from_raw(raw) });
    }
}

impl Clone for ValueRef {
    fn clone(&self) -> Self {
        match &self.0 {
            Repr::Number(number) => ValueRef(Repr::Number(*number)),
            Repr::Oddball(oddball) => ValueRef(Repr::Oddball(*oddball)),
            Repr::Boxed(record) => {
                // Take the new reference first: reviving a parked record
                // releases the registry's one.
                let record = Rc::clone(record);
                record.retain_external();
                ValueRef(Repr::Boxed(record))
            }
        }
    }
}

impl Drop for ValueRef {
    fn drop(&mut self) {
        if let Repr::Boxed(record) = &self.0 {
            record.release_external();
        }
    }
}

impl fmt::Debug for ValueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Repr::Number(number) => write!(f, "ValueRef({number})"),
            Repr::Oddball(oddball) => write!(f, "ValueRef({oddball:?})"),
            Repr::Boxed(record) => f
                .debug_struct("ValueRef")
                .field("id", &record.id)
                .field("tag", &record.tag())
                .field("external", &record.external())
                .finish(),
        }
    }
}

impl From<bool> for ValueRef {
    fn from(value: bool) -> Self {
        ValueRef::boolean(value)
    }
}

impl From<f64> for ValueRef {
    fn from(value: f64) -> Self {
        ValueRef::number(value)
    }
}

impl From<i32> for ValueRef {
    fn from(value: i32) -> Self {
        ValueRef::number(f64::from(value))
    }
}
