//! Singleton Manager: resolves, caches, and lazily materializes the
//! per-table root object.

use std::any::Any;
use std::rc::Rc;

use crate::engine::KvTxn;
use crate::error::{CResult, Error};
use crate::identity::IdentityMap;
use crate::object::{ObjectMetadata, ObjectRef};
use crate::oid::{self, Oid};
use crate::registry::TableInfo;
use crate::schema::all_objects_key;

/// Outcome of resolving a table's singleton, so the caller (`Transaction`)
/// can enqueue it into the Dirty Set and Updated Tables when it was freshly
/// created, matching the spec's ordering requirement.
pub enum SingletonResolution {
    Existing(ObjectRef),
    FreshlyCreated(ObjectRef),
}

/// Resolves `table`'s singleton object against the identity map, the
/// per-table content cache, and finally the store itself, in that order.
pub fn resolve_singleton<K: KvTxn>(
    table: &Rc<TableInfo>,
    identity: &mut IdentityMap,
    engine: &mut K,
) -> CResult<SingletonResolution> {
    let oid = table.singleton_oid.get();

    if oid.is_assigned() {
        if let Some(object) = identity.get_by_oid(oid) {
            check_type(table, &object)?;
            return Ok(SingletonResolution::Existing(object));
        }
    }

    let transaction_number = engine.transaction_number();

    let cached = if oid.is_assigned() {
        table.cached_singleton_bytes(transaction_number)
    } else {
        None
    };

    let bytes = match cached {
        Some(bytes) => Some(bytes),
        None if oid.is_assigned() => {
            let key = all_objects_key(oid);
            let found = engine.find(&key) == crate::engine::FindResult::Exact;
            let fetched = if found { engine.current_value() } else { None };
            if let Some(bytes) = &fetched {
                table.cache_singleton_bytes(transaction_number, bytes.clone());
            }
            fetched
        }
        None => None,
    };

    if let Some(bytes) = bytes {
        // Skip the leading `tableId` varint field; the remaining bytes are
        // `[VarUInt32 clientTypeVersion, <saver output>]`.
        let (_table_id, consumed) = oid::decode(&bytes)?;
        let (version, version_len) = oid::decode(&bytes[consumed..])?;
        let mut pos = consumed + version_len;
        let object = table.kind.create();
        table.kind.load(version.0 as u32, &bytes, &mut pos, &object)?;
        check_type(table, &object)?;
        identity.insert(oid, object.clone(), ObjectMetadata::new_read(oid));
        return Ok(SingletonResolution::Existing(object));
    }

    // No OID assigned yet, or nothing found under it: materialize fresh.
    let object = table.kind.initialize();
    Ok(SingletonResolution::FreshlyCreated(object))
}

/// A stored singleton's bytes decoded to a different concrete type than the
/// one registered for this table is an unrecoverable storage-layer
/// inconsistency (`SingletonTypeMismatch`), not a caller error.
fn check_type(table: &Rc<TableInfo>, object: &ObjectRef) -> CResult<()> {
    if (*object.borrow()).type_id() == table.content_type_id() {
        Ok(())
    } else {
        Err(type_mismatch(table, table.singleton_oid.get()))
    }
}

/// Type mismatch between the stored singleton and the requested type: fatal
/// per the spec ("Corrupted" in the original terms, `SingletonTypeMismatch`
/// here).
pub fn type_mismatch(table: &TableInfo, oid: Oid) -> Error {
    Error::SingletonTypeMismatch { oid: oid.0, table: table.name.to_string() }
}
