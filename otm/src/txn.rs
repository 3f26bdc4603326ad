//! Transaction Lifecycle: the orchestrator tying together the identity map,
//! dirty set, schema persistor, enumeration engine, singleton manager, and
//! relation chain into the public operations callers actually use.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::engine::{FindResult, KvTxn};
use crate::enumerate::Enumerator;
use crate::error::{CResult, Error};
use crate::identity::IdentityMap;
use crate::inline::{ReaderCtx, WriterCtx};
use crate::kvtxn::{Database as KvDatabase, ReadTxn, WriteTxn};
use crate::object::{EntityKind, ObjectMetadata, ObjectRef, ObjectState};
use crate::oid::{self, Oid};
use crate::registry::{TableInfo, TableRegistry};
use crate::relation::{RelationChain, RelationFactory, RelationKind, RelationRegistry};
use crate::schema::{self, all_objects_key};
use crate::singleton::{self, SingletonResolution};

/// Sentinel returned by `store_if_not_inlined` telling the caller to write
/// the object inline rather than by reference.
pub const INLINE_SENTINEL: u64 = u64::MAX;

/// Sanity bound on the commit drain's fixpoint loop; surfaces pathological
/// reentrant-store cycles as an error instead of hanging.
pub const COMMIT_DRAIN_SANITY_LIMIT: u64 = 1_000_000;

/// The owning database: holds the byte store, the table registry, and the
/// cross-transaction OID/dictionary-id allocators. Exactly one writer
/// transaction may be open at a time (enforced by `KvDatabase`'s internal
/// mutex); any number of readers may coexist.
pub struct ObjectStore {
    pub(crate) engine: KvDatabase,
    pub registry: Rc<TableRegistry>,
    relation_registry: RelationRegistry,
    next_oid: AtomicU64,
    next_dictionary_id: AtomicU64,
}

impl ObjectStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            engine: KvDatabase::new(),
            registry: Rc::new(TableRegistry::new()),
            relation_registry: RelationRegistry::new(true),
            next_oid: AtomicU64::new(1),
            next_dictionary_id: AtomicU64::new(1),
        }
    }

    /// Owner-level `InitRelation(name, interfaceType) -> factory`: registers
    /// a relation factory up front, independent of any transaction's
    /// `GetRelation` calls.
    pub fn init_relation<T: RelationKind + Default + 'static>(&self, name: &'static str) -> CResult<RelationFactory> {
        self.relation_registry.init_relation::<T>(name)
    }

    /// Toggles whether `GetRelation` may auto-register an unrecognized
    /// relation type on first use; forbidding it makes every relation type
    /// require an explicit prior `init_relation` call.
    pub fn set_relation_auto_register(&self, allow: bool) {
        self.relation_registry.set_allow_auto_register(allow);
    }

    fn allocate_oid(&self) -> Oid {
        Oid(self.next_oid.fetch_add(1, Ordering::SeqCst))
    }

    fn last_allocated_oid(&self) -> Oid {
        Oid(self.next_oid.load(Ordering::SeqCst).saturating_sub(1))
    }

    pub fn allocate_dictionary_id(&self) -> u64 {
        self.next_dictionary_id.fetch_add(1, Ordering::SeqCst)
    }

    #[must_use]
    pub fn begin_write(&self) -> Transaction<'_, WriteTxn<'_>> {
        Transaction::new(self, self.engine.begin_write())
    }

    #[must_use]
    pub fn begin_read(&self) -> Transaction<'_, ReadTxn> {
        Transaction::new(self, self.engine.begin_read())
    }
}

impl Default for ObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

/// A single object transaction. All state here is local to the
/// transaction; disposal (or drop) releases the underlying key-value
/// transaction if it is still held.
pub struct Transaction<'s, K: KvTxn> {
    owner: &'s ObjectStore,
    engine: Option<K>,
    identity: IdentityMap,
    /// `Oid -> object`, populated on the first dirty insertion; drained and
    /// recreated during commit.
    dirty: HashMap<Oid, ObjectRef>,
    /// Tables touched by a mutation path this transaction, needing schema
    /// persistence at commit.
    updated_tables: RefCell<Vec<Rc<TableInfo>>>,
    relations: RelationChain,
    local_dictionary_counter: u64,
    last_allocated_oid_at_open: Oid,
    /// Set by `next_commit_temporary_close_transaction_log`; tells `commit`
    /// to ask the engine to rotate its transaction log once this commit
    /// lands.
    pending_log_rotation: bool,
}

impl<'s, K: KvTxn> Transaction<'s, K> {
    fn new(owner: &'s ObjectStore, engine: K) -> Self {
        Self {
            owner,
            engine: Some(engine),
            identity: IdentityMap::new(),
            dirty: HashMap::new(),
            updated_tables: RefCell::new(Vec::new()),
            relations: RelationChain::new(),
            local_dictionary_counter: 0,
            last_allocated_oid_at_open: owner.last_allocated_oid(),
            pending_log_rotation: false,
        }
    }

    fn engine_mut(&mut self) -> CResult<&mut K> {
        self.engine.as_mut().ok_or_else(|| Error::internal("transaction already disposed"))
    }

    fn engine_ref(&self) -> CResult<&K> {
        self.engine.as_ref().ok_or_else(|| Error::internal("transaction already disposed"))
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.engine.as_ref().map(K::is_read_only).unwrap_or(true)
    }

    fn require_writable(&self) -> CResult<()> {
        if self.is_read_only() {
            Err(Error::ReadOnly)
        } else {
            Ok(())
        }
    }

    fn mark_table_updated(&self, table: &Rc<TableInfo>) {
        if table.needs_schema_persist() {
            let mut updated = self.updated_tables.borrow_mut();
            if !updated.iter().any(|t| Rc::ptr_eq(t, table)) {
                updated.push(table.clone());
            }
        }
    }

    fn resolve_table<T: EntityKind + Default + 'static>(&self) -> CResult<Rc<TableInfo>> {
        self.owner
            .registry
            .resolve_or_register(Rc::new(T::default()), true)
            .ok_or(Error::UnknownType(std::any::type_name::<T>()))
    }

    // ---- Get / GetOid / GetStorageSize ----------------------------------

    pub fn get_oid(&mut self, object: &ObjectRef) -> CResult<Oid> {
        self.identity.get_metadata(object).map(|m| m.id).ok_or(Error::Unassigned)
    }

    /// Fetches the object stored at `oid`, consulting the identity map
    /// first. `table_for_id` resolves the table registered under the
    /// decoded `tableId`, since the registry only knows concrete types
    /// through their `EntityKind`, not a raw id -> type mapping usable from
    /// here without a caller-supplied lookup.
    pub fn get(&mut self, oid: Oid) -> CResult<Option<ObjectRef>> {
        if let Some(object) = self.identity.get_by_oid(oid) {
            return Ok(Some(object));
        }

        let key = all_objects_key(oid);
        let engine = self.engine_mut()?;
        if engine.find(&key) != FindResult::Exact {
            return Ok(None);
        }
        let Some(bytes) = engine.current_value() else {
            return Ok(None);
        };

        let (table_id_oid, consumed) = oid::decode(&bytes)?;
        let table_id = u32::try_from(table_id_oid.0).map_err(|_| Error::internal("table id overflow"))?;
        let table = self
            .owner
            .registry
            .by_id(table_id)
            .ok_or(Error::UnknownTypeId(u64::from(table_id)))?;
        let (version, version_len) = oid::decode(&bytes[consumed..])?;
        let mut pos = consumed + version_len;

        let object = table.kind.create();
        table.kind.load(version.0 as u32, &bytes, &mut pos, &object)?;
        self.identity.insert(oid, object.clone(), ObjectMetadata::new_read(oid));
        Ok(Some(object))
    }

    pub fn get_storage_size(&mut self, oid: Oid) -> CResult<Option<(usize, usize)>> {
        let key = all_objects_key(oid);
        let engine = self.engine_mut()?;
        if engine.find(&key) != FindResult::Exact {
            return Ok(None);
        }
        let value_len = engine.current_value().map(|v| v.len()).unwrap_or(0);
        Ok(Some((key.len(), value_len)))
    }

    // ---- New / Store / StoreAndFlush / StoreIfNotInlined ----------------

    #[must_use]
    pub fn new_object<T: EntityKind + Default + 'static>(&self) -> CResult<ObjectRef> {
        let table = self.resolve_table::<T>()?;
        Ok(table.kind.create())
    }

    /// `Store(object) -> OID`: resolves the object's table via its concrete
    /// Rust type, then stores it under that table.
    pub fn store(&mut self, object: &ObjectRef) -> CResult<Oid> {
        let table = self.table_owning(object)?;
        self.store_with_table(&table, object)
    }

    /// `Store(object)`, with the table already resolved by the caller.
    /// Resolves metadata, allocating an OID and moving to `Dirty` state if
    /// this is the object's first store. Already-dirty objects are not
    /// re-enqueued (dedup by OID); deleted objects are a no-op returning
    /// their former OID.
    fn store_with_table(&mut self, table: &Rc<TableInfo>, object: &ObjectRef) -> CResult<Oid> {
        self.require_writable()?;

        if let Some(metadata) = self.identity.get_metadata(object) {
            match metadata.state {
                ObjectState::Deleted => return Ok(metadata.id),
                ObjectState::Dirty => return Ok(metadata.id),
                ObjectState::Read => {
                    let updated = ObjectMetadata { id: metadata.id, state: ObjectState::Dirty };
                    self.identity.set_metadata(object, updated);
                    self.dirty.insert(metadata.id, object.clone());
                    self.mark_table_updated(table);
                    return Ok(metadata.id);
                }
            }
        }

        let oid = self.owner.allocate_oid();
        let metadata = ObjectMetadata::new_dirty(oid);
        self.identity.insert(oid, object.clone(), metadata);
        self.dirty.insert(oid, object.clone());
        self.mark_table_updated(table);
        Ok(oid)
    }

    pub fn store_and_flush(&mut self, object: &ObjectRef) -> CResult<Oid> {
        let oid = self.store(object)?;
        self.store_object(oid, object.clone())?;
        Ok(oid)
    }

    /// `StoreIfNotInlined`: if the type is unregistered and auto-registration
    /// is disabled, or `forceInline` is set, returns [`INLINE_SENTINEL`]
    /// instead of a real OID; a previously-stored object that is forced
    /// inline has its stored copy erased.
    pub fn store_if_not_inlined<T: EntityKind + Default + 'static>(
        &mut self,
        object: &ObjectRef,
        auto_register: bool,
        force_inline: bool,
    ) -> CResult<u64> {
        self.require_writable()?;

        let table = match self.owner.registry.resolve_or_register(Rc::new(T::default()), auto_register) {
            Some(table) => table,
            None => return Ok(INLINE_SENTINEL),
        };

        if force_inline {
            if let Some(metadata) = self.identity.get_metadata(object) {
                if metadata.id.is_assigned() {
                    self.delete_by_oid(metadata.id, Some(object))?;
                }
            }
            return Ok(INLINE_SENTINEL);
        }

        Ok(self.store_with_table(&table, object)?.0)
    }

    /// Inline write/read entry points, delegating to [`crate::inline`].
    pub fn write_inline(
        &self,
        object: &ObjectRef,
        table: &Rc<TableInfo>,
        out: &mut Vec<u8>,
    ) -> CResult<()> {
        self.mark_table_updated(table);
        let ctx = WriterCtx::new(&self.owner.registry);
        crate::inline::write_inline(object, table.id, table.client_type_version, &ctx, out, |buf| {
            table.kind.save(object, buf)
        })
    }

    pub fn read_inline(&self, bytes: &[u8], pos: &mut usize) -> CResult<ObjectRef> {
        let ctx = ReaderCtx::new(&self.owner.registry);
        crate::inline::read_inline(bytes, pos, &ctx, |table, object, version, pos| {
            table.kind.load(version, bytes, pos, object)
        })
    }

    // ---- Singleton --------------------------------------------------------

    pub fn singleton<T: EntityKind + Default + 'static>(&mut self) -> CResult<ObjectRef> {
        let table = self.resolve_table::<T>()?;
        let transaction_number = self.engine_ref()?.transaction_number();
        let engine = self.engine_mut()?;

        match singleton::resolve_singleton(&table, &mut self.identity, engine)? {
            SingletonResolution::Existing(object) => Ok(object),
            SingletonResolution::FreshlyCreated(object) => {
                let oid = self.owner.allocate_oid();
                table.singleton_oid.set(oid);
                table.need_store_singleton_oid.set(true);
                let metadata = ObjectMetadata { id: oid, state: ObjectState::Dirty };
                self.identity.insert(oid, object.clone(), metadata);
                self.dirty.insert(oid, object.clone());
                table.invalidate_singleton_cache_from(transaction_number + 1);
                // Remove from updated tables so the subsequent mutation
                // path re-adds it, preserving version-persist ordering.
                self.updated_tables.borrow_mut().retain(|t| !Rc::ptr_eq(t, &table));
                Ok(object)
            }
        }
    }

    // ---- Enumerate ----------------------------------------------------------

    /// Enumerates all objects whose table id is in `filter` (or every
    /// object, when `filter` is empty). Collected eagerly into a `Vec`
    /// rather than returned as a lazy iterator: a genuinely lazy iterator
    /// here would need to borrow both `self.engine` and `self.identity`
    /// simultaneously across `next()` calls, which is exactly the
    /// self-referential shape Rust's borrow checker forbids without
    /// unsafe code or heavier indirection (e.g. a generator or an
    /// index-based coroutine). Scenario E ("insert during an enumerator
    /// walk") is still honored because the store scan and dirty-tail
    /// merge both re-read `self.dirty` on every step of this same call.
    pub fn enumerate(&mut self, filter: &[u32]) -> CResult<Vec<(Oid, ObjectRef, u32)>> {
        let last_allocated = self.last_allocated_oid_at_open.max(self.owner.last_allocated_oid());
        let mut enumerator = Enumerator::new(last_allocated);
        let mut results = Vec::new();

        loop {
            let dirty_oids = {
                let mut oids: Vec<Oid> = self.dirty.keys().copied().collect();
                oids.sort_unstable();
                oids
            };

            let engine = self.engine_mut()?;
            let Some((oid, raw)) = enumerator.next_raw(engine, &dirty_oids)? else {
                break;
            };

            if let Some(object) = self.identity.get_by_oid(oid) {
                let table_id = self.table_owning(&object)?.id;
                if filter.is_empty() || filter.contains(&table_id) {
                    results.push((oid, object, table_id));
                }
                continue;
            }

            if raw.is_empty() {
                // Dirty-tail entry not found in the identity map: nothing to
                // yield (it may have been deleted since being marked dirty).
                continue;
            }

            let (table_id_oid, consumed) = oid::decode(&raw)?;
            let table_id = u32::try_from(table_id_oid.0).map_err(|_| Error::internal("table id overflow"))?;

            if !filter.is_empty() && !filter.contains(&table_id) {
                continue;
            }

            let table = self
                .owner
                .registry
                .by_id(table_id)
                .ok_or(Error::UnknownTypeId(u64::from(table_id)))?;
            let (version, version_len) = oid::decode(&raw[consumed..])?;
            let mut pos = consumed + version_len;
            let object = table.kind.create();
            table.kind.load(version.0 as u32, &raw, &mut pos, &object)?;
            self.identity.insert(oid, object.clone(), ObjectMetadata::new_read(oid));
            results.push((oid, object, table_id));
        }

        Ok(results)
    }

    /// `EnumerateSingletonTypes()`: names of every table the owner has ever
    /// resolved a singleton for, in registration order. Unlike `enumerate`,
    /// this lists table metadata known to the owner rather than objects
    /// visible to this transaction.
    pub fn enumerate_singleton_types(&self) -> Vec<&'static str> {
        self.owner.registry.singleton_type_names()
    }

    /// `EnumerateRelationTypes()`: names of every relation type registered
    /// with the owner so far, whether via an explicit `InitRelation` or by
    /// auto-registration on a prior `GetRelation`.
    pub fn enumerate_relation_types(&self) -> Vec<&'static str> {
        self.owner.relation_registry.registered_names()
    }

    // ---- Relations ----------------------------------------------------------

    /// `GetRelation(type)`: probes the transaction's own chain/hash cache
    /// first; on a miss, consults the owner's factory registry (an explicit
    /// prior `init_relation`, or auto-registration if the owner allows it),
    /// then prepends exactly one new entry to the chain.
    pub fn get_relation<T: RelationKind + Default + 'static>(&mut self) -> CResult<Rc<dyn Any>> {
        let factory = self.owner.relation_registry.resolve_or_auto_register::<T>(std::any::type_name::<T>())?;
        Ok(self.relations.get_or_insert_with::<T>(move || factory()))
    }

    // ---- Delete -------------------------------------------------------------

    pub fn delete(&mut self, object: &ObjectRef) -> CResult<()> {
        self.require_writable()?;

        let metadata = match self.identity.get_metadata(object) {
            Some(m) => m,
            None => {
                self.identity.insert_deleted_stub(object);
                return Ok(());
            }
        };

        if metadata.state == ObjectState::Deleted {
            return Ok(());
        }

        if metadata.id.is_assigned() {
            self.delete_by_oid(metadata.id, Some(object))?;
        } else {
            let updated = ObjectMetadata::deleted_stub();
            self.identity.set_metadata(object, updated);
            self.identity.remove(metadata.id, object);
        }
        Ok(())
    }

    fn delete_by_oid(&mut self, oid: Oid, object: Option<&ObjectRef>) -> CResult<()> {
        self.require_writable()?;
        let transaction_number = self.engine_ref()?.transaction_number();
        let key = all_objects_key(oid);
        let stored_bytes = {
            let engine = self.engine_mut()?;
            if engine.find(&key) == FindResult::Exact {
                let bytes = engine.current_value();
                engine.erase_current();
                bytes
            } else {
                None
            }
        };

        if let Some(bytes) = &stored_bytes {
            self.free_dictionaries_owned_by(bytes)?;
        }

        self.dirty.remove(&oid);
        if let Some(object) = object {
            self.identity.set_metadata(object, ObjectMetadata { id: oid, state: ObjectState::Deleted });
            self.identity.remove(oid, object);
        }
        for table in self.owner_tables_with_singleton(oid) {
            table.invalidate_singleton_cache_from(transaction_number + 1);
        }
        Ok(())
    }

    /// Runs the FreeContent traversal over a stored `AllObjects` record — the
    /// same `[tableId, version, <bytes>]` framing `inline::free_content`
    /// already expects, since an `AllObjects` record and an inline-embedded
    /// object share that wire shape — and erases every dictionary id it
    /// reports as owned, so deleting an object doesn't leak the dictionaries
    /// it owned.
    fn free_dictionaries_owned_by(&mut self, bytes: &[u8]) -> CResult<()> {
        let mut pos = 0usize;
        let mut visited_slots = 0usize;
        let dictionary_ids =
            crate::inline::free_content(bytes, &mut pos, &self.owner.registry, &mut visited_slots)?;
        for dictionary_id in dictionary_ids {
            let key = schema::dictionary_key(dictionary_id);
            let engine = self.engine_mut()?;
            if engine.find(&key) == FindResult::Exact {
                engine.erase_current();
            }
        }
        Ok(())
    }

    fn owner_tables_with_singleton(&self, oid: Oid) -> Vec<Rc<TableInfo>> {
        // Cheap linear scan over currently-known tables; table counts in
        // this kind of embedded store are small (tens, not thousands).
        self.updated_tables
            .borrow()
            .iter()
            .filter(|t| t.singleton_oid.get() == oid)
            .cloned()
            .collect()
    }

    pub fn delete_all(&mut self, filter: &[u32]) -> CResult<()> {
        let objects = self.enumerate(filter)?;
        for (_, object, _) in objects {
            self.delete(&object)?;
        }
        Ok(())
    }

    pub fn delete_all_data(&mut self) -> CResult<()> {
        self.require_writable()?;
        let engine = self.engine_mut()?;
        engine.erase_prefix(&schema::all_objects_prefix());
        engine.erase_prefix(&schema::all_dictionaries_prefix());
        engine.erase_prefix(&schema::all_relations_pk_prefix());
        engine.erase_prefix(&schema::all_relations_sk_prefix());
        self.identity = IdentityMap::new();
        self.dirty.clear();
        Ok(())
    }

    // ---- Commit ulong ---------------------------------------------------

    pub fn get_commit_ulong(&mut self) -> CResult<u64> {
        const KEY: &[u8] = b"\xffcommit-ulong";
        let engine = self.engine_mut()?;
        if engine.find(KEY) != FindResult::Exact {
            return Ok(0);
        }
        let bytes = engine.current_value().unwrap_or_default();
        if bytes.len() < 8 {
            return Ok(0);
        }
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[..8]);
        Ok(u64::from_be_bytes(raw))
    }

    pub fn set_commit_ulong(&mut self, value: u64) -> CResult<()> {
        self.require_writable()?;
        const KEY: &[u8] = b"\xffcommit-ulong";
        let engine = self.engine_mut()?;
        engine.create_or_update_key_value(KEY, &value.to_be_bytes());
        Ok(())
    }

    pub fn allocate_dictionary_id(&mut self) -> u64 {
        let id = self.local_dictionary_counter;
        self.local_dictionary_counter += 1;
        id
    }

    /// `NextCommitTemporaryCloseTransactionLog()`: marks this transaction so
    /// that, once it commits, the underlying engine is asked to rotate its
    /// transaction log (see `KvTxn::request_log_rotation`) rather than keep
    /// appending to the current one. Has no effect on a read-only
    /// transaction, since only a writer's commit can trigger rotation.
    pub fn next_commit_temporary_close_transaction_log(&mut self) {
        self.pending_log_rotation = true;
    }

    // ---- Commit / Dispose --------------------------------------------------

    /// `StoreObject(o)`: emits `[tableId, clientTypeVersion, saver bytes]`
    /// under `AllObjects || Encode(oid)`. Refuses non-class saves via the
    /// caller already having resolved a table; fails with `MissingMetadata`
    /// if the identity map has no metadata for the OID (an internal
    /// invariant violation — always a bug if reached). Takes the object
    /// directly rather than re-looking it up in `self.dirty`, since the
    /// commit drain loop removes entries from `self.dirty` before storing
    /// them (so a later round's reentrant `Store` calls are distinguishable
    /// from ones already handled this round).
    fn store_object(&mut self, oid: Oid, object: ObjectRef) -> CResult<()> {
        let metadata = self.identity.get_metadata(&object).ok_or(Error::MissingMetadata)?;
        if metadata.state == ObjectState::Deleted {
            return Ok(());
        }

        let table = self.table_owning(&object)?;

        let mut scratch = Vec::new();
        scratch.extend(oid::encode(Oid(u64::from(table.id))));
        scratch.extend(oid::encode(Oid(u64::from(table.client_type_version))));
        table.kind.save(&object, &mut scratch)?;

        if table.singleton_oid.get() == oid {
            let transaction_number = self.engine_ref()?.transaction_number();
            table.invalidate_singleton_cache_from(transaction_number + 1);
        }

        let key = all_objects_key(oid);
        self.engine_mut()?.create_or_update_key_value(&key, &scratch);
        self.mark_table_updated(&table);
        Ok(())
    }

    /// Finds the table an already-materialized object belongs to, via the
    /// registry's `TypeId -> table` map. Works as long as each Rust type
    /// maps to exactly one table, which holds for this crate's registry
    /// (one `EntityKind` registration per concrete type).
    fn table_owning(&self, object: &ObjectRef) -> CResult<Rc<TableInfo>> {
        let type_id = (*object.borrow()).type_id();
        self.owner
            .registry
            .tables_by_type_id(type_id)
            .ok_or_else(|| Error::internal("object's concrete type is not registered with any table"))
    }

    /// `Commit`: drains the Dirty Set to a fixpoint (saver callbacks may
    /// reentrantly `Store` further objects), persists schema for touched
    /// tables, commits the underlying key-value transaction, then updates
    /// each touched table's persisted-version bookkeeping. The key-value
    /// transaction is disposed in all outcomes.
    pub fn commit(mut self) -> CResult<()> {
        self.require_writable()?;

        let mut rounds: u64 = 0;
        loop {
            let pending: Vec<(Oid, ObjectRef)> = self.dirty.drain().collect();
            if pending.is_empty() {
                break;
            }
            for (oid, object) in pending {
                self.store_object(oid, object)?;
            }
            rounds += 1;
            if rounds > COMMIT_DRAIN_SANITY_LIMIT {
                return Err(Error::CommitDrainOverflow(COMMIT_DRAIN_SANITY_LIMIT));
            }
        }
        if rounds > 1 {
            log::debug!("otm: commit drain ran {rounds} rounds");
        }

        for table in self.updated_tables.borrow().iter() {
            let engine = self.engine_mut()?;
            schema::persist_table_schema(table, engine);
        }

        let mut engine = self.engine.take().ok_or_else(|| Error::internal("transaction already disposed"))?;
        if self.pending_log_rotation {
            engine.request_log_rotation();
        }
        let result = Box::new(engine).commit();

        if result.is_ok() {
            for table in self.updated_tables.borrow().iter() {
                table.last_persisted_version.set(table.client_type_version);
                table.need_store_singleton_oid.set(false);
            }
        }

        result
    }

    /// Discards the transaction without committing; dropping an open
    /// transaction has the same effect.
    pub fn dispose(mut self) {
        if let Some(engine) = self.engine.take() {
            Box::new(engine).dispose();
        }
    }
}

impl<'s, K: KvTxn> Drop for Transaction<'s, K> {
    fn drop(&mut self) {
        if let Some(engine) = self.engine.take() {
            Box::new(engine).dispose();
        }
    }
}
