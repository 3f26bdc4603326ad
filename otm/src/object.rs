//! Object metadata, the per-table `EntityKind` contract, and the
//! `Indirect<T>` lazy by-reference wrapper.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use crate::error::CResult;
use crate::oid::Oid;

/// Lifecycle state of an object's metadata within a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectState {
    /// Materialized from storage (or otherwise known-clean); not enqueued
    /// for write at commit.
    Read,
    /// Queued for write at commit. Always has a non-zero `Id` once it has
    /// been assigned one by `Store`.
    Dirty,
    /// Removed. Stays in this state for the remainder of the transaction so
    /// further `Store` calls against the same object are no-ops.
    Deleted,
}

/// `(Id, State)` pair tracked per live object by the identity map.
///
/// Invariants (see spec's DATA MODEL section): if `State == Dirty` and
/// `Id != 0` the OID is in the Dirty Set; if `State == Deleted` the OID is
/// neither in the Dirty Set nor the identity cache; an object with `Id == 0`
/// is always either `Dirty` (pending first write) or `Deleted` (never
/// written).
#[derive(Clone, Copy, Debug)]
pub struct ObjectMetadata {
    pub id: Oid,
    pub state: ObjectState,
}

impl ObjectMetadata {
    #[must_use]
    pub fn new_dirty(id: Oid) -> Self {
        Self { id, state: ObjectState::Dirty }
    }

    #[must_use]
    pub fn new_read(id: Oid) -> Self {
        Self { id, state: ObjectState::Read }
    }

    #[must_use]
    pub fn deleted_stub() -> Self {
        Self { id: Oid::UNASSIGNED, state: ObjectState::Deleted }
    }
}

/// A boxed, dynamically-typed persistent object, shared by reference so the
/// identity map and caller-held references name the same instance.
pub type ObjectRef = Rc<RefCell<dyn Any>>;

/// Per-(table, version) behavior a registered type must supply. `Creator`
/// and `Initializer` produce fresh instances (for loads and for singleton
/// materialization respectively); `Saver`/`Loader` serialize one schema
/// version; `FreeContent` walks a serialized instance structurally to
/// collect owned dictionary ids without materializing user objects, so that
/// deleting an object can erase the dictionaries it owned.
pub trait EntityKind: Any {
    /// Stable name persisted in `TableNames`.
    fn type_name(&self) -> &'static str;

    /// Current client schema version; bumped by the type's owner whenever
    /// its on-disk shape changes.
    fn client_type_version(&self) -> u32;

    /// Builds a fresh, empty instance for the read path.
    fn create(&self) -> ObjectRef;

    /// Builds a fresh instance for first-time singleton materialization.
    /// Defaults to `create`; types with singleton-specific defaults
    /// override it.
    fn initialize(&self) -> ObjectRef {
        self.create()
    }

    /// Serializes `object` at the table's current version by appending to
    /// `out`. Append-only so a saver can freely call
    /// [`crate::inline::write_inline`] for nested fields partway through and
    /// keep writing further fields afterward.
    fn save(&self, object: &ObjectRef, out: &mut Vec<u8>) -> CResult<()>;

    /// Deserializes `object` (written at `version`, which may lag the
    /// table's current version) from `bytes`, starting at `*pos` and
    /// advancing it past everything this loader consumes. Cursor-based
    /// rather than slice-based so a loader with a nested inline field can
    /// call [`crate::inline::read_inline`] partway through and keep reading
    /// sibling fields from the same buffer afterward.
    fn load(&self, version: u32, bytes: &[u8], pos: &mut usize, object: &ObjectRef) -> CResult<()>;

    /// Collects dictionary ids transitively owned by the serialized form,
    /// without materializing nested objects. Default: none. Same
    /// cursor-based shape as `load`, for the same reason.
    fn free_content(&self, _version: u32, _bytes: &[u8], _pos: &mut usize) -> CResult<Vec<u64>> {
        Ok(Vec::new())
    }
}

/// A lazy by-reference handle. An `Indirect` with a non-zero OID names an
/// object to be fetched on demand and is stored as a pointer; one with a
/// zero OID wraps a not-yet-persisted target that, on `Store`, is treated as
/// the value itself (its own OID becomes the indirection's OID).
pub struct Indirect<T> {
    oid: Oid,
    target: RefCell<Option<T>>,
}

impl<T> Indirect<T> {
    #[must_use]
    pub fn by_oid(oid: Oid) -> Self {
        Self { oid, target: RefCell::new(None) }
    }

    #[must_use]
    pub fn by_value(value: T) -> Self {
        Self { oid: Oid::UNASSIGNED, target: RefCell::new(Some(value)) }
    }

    #[must_use]
    pub fn oid(&self) -> Oid {
        self.oid
    }

    /// Loads the target via `fetch` if not already materialized, and
    /// returns a clone of it. Requires `T: Clone` since the cached value is
    /// held behind a `RefCell` for interior mutability.
    pub fn get(&self, fetch: impl FnOnce(Oid) -> CResult<T>) -> CResult<T>
    where
        T: Clone,
    {
        if self.target.borrow().is_none() {
            let value = fetch(self.oid)?;
            *self.target.borrow_mut() = Some(value);
        }
        Ok(self.target.borrow().as_ref().expect("just populated").clone())
    }
}

impl<T> Indirect<T> {
    /// Whether this indirection should be persisted by reference (it already
    /// has an assigned OID) or by value (its target should be stored and the
    /// new OID adopted as the indirection's own). `Store`/`Delete`
    /// special-case indirections per the spec's design notes.
    #[must_use]
    pub fn is_by_reference(&self) -> bool {
        self.oid.is_assigned()
    }

    /// Runs `with_value` against the materialized target of a by-value
    /// indirection. Panics if called on a by-reference indirection or one
    /// whose target was never supplied — callers check `is_by_reference`
    /// first.
    pub fn with_target<R>(&self, with_value: impl FnOnce(&T) -> R) -> R {
        assert!(!self.is_by_reference(), "indirection is by-reference, has no local target");
        let borrowed = self.target.borrow();
        let value = borrowed.as_ref().expect("by-value indirection missing its target");
        with_value(value)
    }
}
