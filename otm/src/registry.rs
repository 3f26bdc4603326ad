//! Table registry: per-table metadata and the owner-level table of tables.
//!
//! The spec treats "Table Info" as external/referenced — owned by the
//! database, not the transaction — so it lives here rather than in
//! `txn.rs`. The transaction borrows it for the duration of a commit and
//! mutates only `last_persisted_version` / `need_store_singleton_oid`, and
//! only at commit time.

use std::any::{Any, TypeId};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use crate::object::EntityKind;
use crate::oid::Oid;

/// Per-table persistent metadata plus the behavior hooks registered for it.
pub struct TableInfo {
    pub id: u32,
    pub name: &'static str,
    pub client_type_version: u32,
    pub last_persisted_version: Cell<u32>,
    pub need_store_singleton_oid: Cell<bool>,
    pub singleton_oid: Cell<Oid>,
    pub kind: Rc<dyn EntityKind>,
    /// `TypeId` of the concrete Rust value `kind.create()` produces, probed
    /// once at registration. Lets the transaction map an already-materialized
    /// `ObjectRef` back to its owning table without a second registry keyed
    /// by runtime type name (see `TableRegistry::tables_by_type_id`).
    content_type_id: TypeId,
    /// Singleton content cache, keyed by the transaction number that read
    /// it. Safe for concurrent reads; writes happen only inside a writer
    /// transaction (see spec CONCURRENCY & RESOURCE MODEL).
    singleton_cache: RefCell<HashMap<u64, Vec<u8>>>,
}

impl TableInfo {
    #[must_use]
    pub fn new(id: u32, kind: Rc<dyn EntityKind>) -> Self {
        let client_type_version = kind.client_type_version();
        let content_type_id = (*kind.create().borrow()).type_id();
        Self {
            id,
            name: kind.type_name(),
            client_type_version,
            last_persisted_version: Cell::new(0),
            need_store_singleton_oid: Cell::new(false),
            singleton_oid: Cell::new(Oid::UNASSIGNED),
            kind,
            content_type_id,
            singleton_cache: RefCell::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn content_type_id(&self) -> TypeId {
        self.content_type_id
    }

    #[must_use]
    pub fn needs_schema_persist(&self) -> bool {
        self.last_persisted_version.get() != self.client_type_version || self.need_store_singleton_oid.get()
    }

    pub fn cached_singleton_bytes(&self, transaction_number: u64) -> Option<Vec<u8>> {
        self.singleton_cache.borrow().get(&transaction_number).cloned()
    }

    pub fn cache_singleton_bytes(&self, transaction_number: u64, bytes: Vec<u8>) {
        self.singleton_cache.borrow_mut().insert(transaction_number, bytes);
    }

    /// Invalidates any cached singleton content visible from `transaction_number`
    /// onward. Called whenever the singleton object is stored or deleted.
    pub fn invalidate_singleton_cache_from(&self, transaction_number: u64) {
        self.singleton_cache.borrow_mut().retain(|&tn, _| tn < transaction_number);
    }
}

/// Owner-level table of tables, keyed by both id and name so lookups from
/// either a persisted `tableId` or a runtime type name are O(1).
#[derive(Default)]
pub struct TableRegistry {
    by_id: RefCell<HashMap<u32, Rc<TableInfo>>>,
    by_name: RefCell<HashMap<&'static str, Rc<TableInfo>>>,
    by_type_id: RefCell<HashMap<TypeId, Rc<TableInfo>>>,
    next_id: Cell<u32>,
}

impl TableRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_id: RefCell::new(HashMap::new()),
            by_name: RefCell::new(HashMap::new()),
            by_type_id: RefCell::new(HashMap::new()),
            next_id: Cell::new(1),
        }
    }

    pub fn by_id(&self, id: u32) -> Option<Rc<TableInfo>> {
        self.by_id.borrow().get(&id).cloned()
    }

    pub fn by_name(&self, name: &str) -> Option<Rc<TableInfo>> {
        self.by_name.borrow().get(name).cloned()
    }

    /// Maps an already-materialized object's concrete `TypeId` back to the
    /// table that owns it. Used by `StoreObject` to find the saver for an
    /// object the caller only handed over by reference.
    pub fn tables_by_type_id(&self, type_id: TypeId) -> Option<Rc<TableInfo>> {
        self.by_type_id.borrow().get(&type_id).cloned()
    }

    /// Registers a new table for `kind`, allocating the next table id.
    /// Callers must already have checked `by_name` for an existing entry.
    pub fn register(&self, kind: Rc<dyn EntityKind>) -> Rc<TableInfo> {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        let info = Rc::new(TableInfo::new(id, kind));
        self.by_id.borrow_mut().insert(id, info.clone());
        self.by_name.borrow_mut().insert(info.name, info.clone());
        self.by_type_id.borrow_mut().insert(info.content_type_id(), info.clone());
        info
    }

    /// Names of every registered table whose singleton has actually been
    /// materialized (`singleton_oid` assigned by a prior `Singleton` call),
    /// in registration (id) order. A table registered only for keyed
    /// `Store`/`Enumerate` use, never `Singleton`-ed, doesn't count as a
    /// singleton type.
    pub fn singleton_type_names(&self) -> Vec<&'static str> {
        let by_id = self.by_id.borrow();
        let mut ids: Vec<u32> = by_id.keys().copied().collect();
        ids.sort_unstable();
        ids.into_iter()
            .filter_map(|id| by_id.get(&id))
            .filter(|info| info.singleton_oid.get().is_assigned())
            .map(|info| info.name)
            .collect()
    }

    /// Looks up by name, registering on a miss. Returns `None` if
    /// `allow_auto_register` is false and the table is unregistered.
    pub fn resolve_or_register(
        &self,
        kind: Rc<dyn EntityKind>,
        allow_auto_register: bool,
    ) -> Option<Rc<TableInfo>> {
        if let Some(info) = self.by_name(kind.type_name()) {
            return Some(info);
        }
        if allow_auto_register {
            Some(self.register(kind))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy;
    impl EntityKind for Dummy {
        fn type_name(&self) -> &'static str {
            "Dummy"
        }
        fn client_type_version(&self) -> u32 {
            1
        }
        fn create(&self) -> crate::object::ObjectRef {
            Rc::new(RefCell::new(()))
        }
        fn save(&self, _object: &crate::object::ObjectRef, _out: &mut Vec<u8>) -> crate::error::CResult<()> {
            Ok(())
        }
        fn load(
            &self,
            _version: u32,
            _bytes: &[u8],
            _pos: &mut usize,
            _object: &crate::object::ObjectRef,
        ) -> crate::error::CResult<()> {
            Ok(())
        }
    }

    #[test]
    fn register_then_lookup_by_name_and_id() {
        let registry = TableRegistry::new();
        let info = registry.register(Rc::new(Dummy));
        assert_eq!(info.id, 1);
        assert!(registry.by_name("Dummy").is_some());
        assert!(registry.by_id(1).is_some());
    }

    #[test]
    fn resolve_without_auto_register_fails_on_miss() {
        let registry = TableRegistry::new();
        assert!(registry.resolve_or_register(Rc::new(Dummy), false).is_none());
    }

    #[test]
    fn schema_persist_needed_until_versions_converge() {
        let registry = TableRegistry::new();
        let info = registry.register(Rc::new(Dummy));
        assert!(info.needs_schema_persist());
        info.last_persisted_version.set(info.client_type_version);
        assert!(!info.needs_schema_persist());
    }
}
